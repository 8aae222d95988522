//! Python engine on the embedded CPython interpreter.
//!
//! Each engine executes its script in a private globals dictionary; entry
//! points are the top-level functions the script defines there. The
//! interpreter itself, and with it `sys.modules`, is shared by every Python
//! provider in the process. Coroutines returned by entry points are run to
//! completion with `asyncio.run`.

use std::str::FromStr;
use std::sync::Arc;

use dataprover_codec::HostValue;
use pyo3::IntoPyObjectExt;
use pyo3::exceptions::{PyRuntimeError, PyTypeError};
use pyo3::prelude::*;
use pyo3::types::{
    PyBool, PyByteArray, PyBytes, PyCFunction, PyDict, PyFloat, PyInt, PyList, PyMemoryView,
    PyString, PyTuple,
};
use rust_decimal::Decimal;

use super::{GuestEngine, MAX_DEPTH, capability_table, guest_failure, missing, too_deep};
use crate::capabilities::Capabilities;
use crate::error::{PolyglotError, Result};

/// Binds the capability objects into the script globals and routes `print`
/// to `log.info`.
const PRELUDE: &str = r#"
def __bind_capabilities(table):
    import json, types
    g = globals()
    def method(name, m):
        def call(*args):
            return __host_call(name, m, list(args))
        call.__name__ = m
        return call
    for spec in json.loads(table):
        obj = types.SimpleNamespace(**{m: method(spec["name"], m) for m in spec["methods"]})
        for binding in spec["bindings"]:
            g[binding] = obj

__bind_capabilities(__capability_table)
del __bind_capabilities, __capability_table

def print(*args, sep=" ", **_):
    log.info(sep.join(str(a) for a in args))
"#;

/// Replaces the script's builtins when language-level I/O is not allowed:
/// `open` is removed and imports of file, process and FFI modules fail.
const RESTRICT_IO: &str = r#"
def __restrict_io(blocked):
    import builtins
    real_import = builtins.__import__
    def guarded_import(name, globals=None, locals=None, fromlist=(), level=0):
        if level == 0 and name.partition(".")[0] in blocked:
            raise ImportError(f"import of '{name}' is not allowed when allowIO is false")
        return real_import(name, globals, locals, fromlist, level)
    restricted = {k: v for k, v in vars(builtins).items() if k not in ("open", "input", "breakpoint")}
    restricted["__import__"] = guarded_import
    globals()["__builtins__"] = restricted

__restrict_io(frozenset(__blocked_modules))
del __restrict_io, __blocked_modules
"#;

/// Top-level modules a script may not import without `allowIO`.
const IO_MODULES: &[&str] = &[
    "os", "posix", "nt", "io", "_io", "pathlib", "shutil", "socket", "subprocess", "ctypes",
    "sys", "importlib", "builtins", "tempfile", "glob", "fileinput", "mmap", "multiprocessing",
];

pub(super) struct PyEngine {
    capabilities: Arc<Capabilities>,
    globals: Option<Py<PyDict>>,
    loaded: bool,
}

impl PyEngine {
    pub(super) fn new(capabilities: Arc<Capabilities>) -> Result<Self> {
        let globals = Python::with_gil(|py| {
            install(py, Arc::clone(&capabilities)).map_err(|e| PolyglotError::ScriptLoad {
                provider: capabilities.provider().to_owned(),
                reason: format!("failed to bind capabilities: {e}"),
            })
        })?;
        tracing::debug!(
            provider = capabilities.provider(),
            max_statements = capabilities.sandbox().max_statements,
            "python context created"
        );
        Ok(Self {
            capabilities,
            globals: Some(globals),
            loaded: false,
        })
    }

    fn globals<'py>(&self, py: Python<'py>) -> Result<Bound<'py, PyDict>> {
        self.globals
            .as_ref()
            .map(|g| g.bind(py).clone())
            .ok_or_else(|| PolyglotError::ContextClosed(self.capabilities.provider().to_owned()))
    }
}

impl GuestEngine for PyEngine {
    fn load(&mut self, source: &str, file_name: &str) -> Result<()> {
        Python::with_gil(|py| {
            let globals = self.globals(py)?;
            exec(py, source, file_name, &globals).map_err(|e| PolyglotError::ScriptLoad {
                provider: self.capabilities.provider().to_owned(),
                reason: format!("{file_name}: {e}"),
            })
        })?;
        self.loaded = true;
        Ok(())
    }

    fn has_entry_point(&self, name: &str) -> bool {
        self.loaded
            && Python::with_gil(|py| {
                self.globals(py)
                    .ok()
                    .and_then(|g| g.get_item(name).ok().flatten())
                    .is_some_and(|f| f.is_callable())
            })
    }

    fn call(&mut self, name: &str, args: Vec<HostValue>) -> Result<HostValue> {
        if !self.loaded {
            return Err(missing(&self.capabilities, name));
        }
        self.capabilities.clear_failure();
        let capabilities = &self.capabilities;
        Python::with_gil(|py| {
            let globals = self.globals(py)?;
            let func = match globals.get_item(name) {
                Ok(Some(func)) if func.is_callable() => func,
                _ => return Err(missing(capabilities, name)),
            };
            let py_args = args
                .iter()
                .map(|a| to_py(py, a))
                .collect::<PyResult<Vec<PyObject>>>()
                .and_then(|items| PyTuple::new(py, items))
                .map_err(|e| guest_failure(capabilities, name, format!("argument conversion failed: {e}")))?;

            match func.call1(py_args).and_then(|r| settle(py, r)) {
                Ok(value) => to_host(&value, 0),
                Err(err) => Err(guest_failure(capabilities, name, err.to_string())),
            }
        })
    }

    fn close(&mut self) {
        if let Some(globals) = self.globals.take() {
            self.loaded = false;
            Python::with_gil(|py| {
                globals.bind(py).clear();
            });
            tracing::debug!(provider = self.capabilities.provider(), "python context closed");
        }
    }
}

fn install(py: Python<'_>, capabilities: Arc<Capabilities>) -> PyResult<Py<PyDict>> {
    let globals = PyDict::new(py);
    let allow_io = capabilities.sandbox().allow_io;
    let host_call = PyCFunction::new_closure(
        py,
        Some(c"__host_call"),
        None,
        move |args: &Bound<'_, PyTuple>, _kwargs: Option<&Bound<'_, PyDict>>| -> PyResult<PyObject> {
            let py = args.py();
            let object: String = args.get_item(0)?.extract()?;
            let method: String = args.get_item(1)?.extract()?;
            let mut values = Vec::new();
            for item in args.get_item(2)?.try_iter()? {
                values.push(to_host(&item?, 0).map_err(|e| PyTypeError::new_err(e.to_string()))?);
            }
            let caps = Arc::clone(&capabilities);
            // Capabilities may block on I/O; let other Python providers run.
            let result = py.allow_threads(move || caps.invoke_from_guest(&object, &method, values));
            match result {
                Ok(value) => to_py(py, &value),
                Err(message) => Err(PyRuntimeError::new_err(message)),
            }
        },
    )?;
    globals.set_item("__host_call", host_call)?;
    globals.set_item("__capability_table", capability_table())?;
    exec(py, PRELUDE, "<prelude>", &globals)?;
    if !allow_io {
        globals.set_item("__blocked_modules", PyList::new(py, IO_MODULES.iter().copied())?)?;
        exec(py, RESTRICT_IO, "<sandbox>", &globals)?;
    }
    Ok(globals.unbind())
}

/// Compile and execute `source` in `globals`, keeping `file_name` for
/// tracebacks.
fn exec(py: Python<'_>, source: &str, file_name: &str, globals: &Bound<'_, PyDict>) -> PyResult<()> {
    let builtins = py.import("builtins")?;
    let code = builtins.getattr("compile")?.call1((source, file_name, "exec"))?;
    builtins.getattr("exec")?.call1((code, globals))?;
    Ok(())
}

/// Run a returned coroutine to completion; other values pass through.
fn settle<'py>(py: Python<'py>, value: Bound<'py, PyAny>) -> PyResult<Bound<'py, PyAny>> {
    let asyncio = py.import("asyncio")?;
    if asyncio.getattr("iscoroutine")?.call1((&value,))?.is_truthy()? {
        asyncio.getattr("run")?.call1((value,))
    } else {
        Ok(value)
    }
}

// ---------------------------------------------------------------------------
// Value conversion
// ---------------------------------------------------------------------------

fn to_py(py: Python<'_>, value: &HostValue) -> PyResult<PyObject> {
    match value {
        HostValue::Null => Ok(py.None()),
        HostValue::Bool(b) => (*b).into_py_any(py),
        HostValue::Int(n) => (*n).into_py_any(py),
        HostValue::Float(f) => (*f).into_py_any(py),
        HostValue::Decimal(d) => py
            .import("decimal")?
            .getattr("Decimal")?
            .call1((d.to_string(),))
            .map(Bound::unbind),
        HostValue::Text(s) => s.as_str().into_py_any(py),
        HostValue::Bytes(b) => Ok(PyBytes::new(py, b).into_any().unbind()),
        HostValue::List(items) => {
            let items = items
                .iter()
                .map(|item| to_py(py, item))
                .collect::<PyResult<Vec<_>>>()?;
            Ok(PyList::new(py, items)?.into_any().unbind())
        }
        HostValue::Map(entries) => {
            let dict = PyDict::new(py);
            for (key, item) in entries {
                dict.set_item(key.as_str(), to_py(py, item)?)?;
            }
            Ok(dict.into_any().unbind())
        }
    }
}

fn conversion(err: PyErr) -> PolyglotError {
    PolyglotError::UnsupportedValueType(err.to_string())
}

fn to_host(value: &Bound<'_, PyAny>, depth: usize) -> Result<HostValue> {
    if depth > MAX_DEPTH {
        return Err(too_deep());
    }
    let py = value.py();

    if value.is_none() {
        return Ok(HostValue::Null);
    }
    // bool is a subclass of int.
    if let Ok(b) = value.downcast::<PyBool>() {
        return Ok(HostValue::Bool(b.is_true()));
    }
    if value.is_instance_of::<PyInt>() {
        return value.extract::<i128>().map(HostValue::Int).map_err(|_| {
            PolyglotError::UnsupportedValueType(format!("python int {value} exceeds 128 bits"))
        });
    }
    if let Ok(f) = value.downcast::<PyFloat>() {
        return Ok(HostValue::Float(f.value()));
    }
    let decimal_type = py.import("decimal")?.getattr("Decimal")?;
    if value.is_instance(&decimal_type).map_err(conversion)? {
        let text = value.str().map_err(conversion)?.to_string();
        return Ok(match Decimal::from_str(&text).or_else(|_| Decimal::from_scientific(&text)) {
            Ok(d) => HostValue::Decimal(d),
            Err(_) => HostValue::Float(value.extract::<f64>().map_err(conversion)?),
        });
    }
    if let Ok(s) = value.downcast::<PyString>() {
        return Ok(HostValue::Text(s.to_str().map_err(conversion)?.to_owned()));
    }
    if let Ok(b) = value.downcast::<PyBytes>() {
        return Ok(HostValue::Bytes(b.as_bytes().to_vec()));
    }
    if let Ok(b) = value.downcast::<PyByteArray>() {
        return Ok(HostValue::Bytes(b.to_vec()));
    }
    if value.is_instance_of::<PyMemoryView>() {
        let bytes = value.call_method0("tobytes").map_err(conversion)?;
        let bytes = bytes.downcast::<PyBytes>().map_err(|e| conversion(e.into()))?;
        return Ok(HostValue::Bytes(bytes.as_bytes().to_vec()));
    }
    if value.is_instance_of::<PyList>() || value.is_instance_of::<PyTuple>() {
        let mut items = Vec::new();
        for item in value.try_iter().map_err(conversion)? {
            items.push(to_host(&item.map_err(conversion)?, depth + 1)?);
        }
        return Ok(HostValue::List(items));
    }
    if let Ok(dict) = value.downcast::<PyDict>() {
        let mut map = indexmap::IndexMap::with_capacity(dict.len());
        for (key, item) in dict.iter() {
            let Ok(key) = key.downcast::<PyString>() else {
                return Err(PolyglotError::UnsupportedValueType(format!(
                    "dict keys must be strings, got {}",
                    key.get_type()
                )));
            };
            map.insert(key.to_str().map_err(conversion)?.to_owned(), to_host(&item, depth + 1)?);
        }
        return Ok(HostValue::Map(map));
    }
    if value.is_callable() {
        return Err(PolyglotError::UnsupportedValueType(format!(
            "python callable {} cannot cross into the host",
            value.get_type()
        )));
    }
    Ok(HostValue::Text(value.str().map_err(conversion)?.to_string()))
}

impl From<PyErr> for PolyglotError {
    fn from(err: PyErr) -> Self {
        conversion(err)
    }
}
