//! JavaScript engine on QuickJS.
//!
//! Provider scripts are plain scripts, not ES modules. The source is wrapped
//! in a function so its top-level declarations of well-known entry points,
//! plus anything assigned to `module.exports`, are captured into one export
//! object. QuickJS has no file or network access of its own; guest code
//! reaches the outside only through the capability objects.

use std::sync::Arc;

use dataprover_codec::HostValue;
use rquickjs::function::{Rest, This};
use rquickjs::{
    Array, ArrayBuffer, BigInt, CatchResultExt, Coerced, Context, Ctx, Exception, Function,
    IntoJs, Object, Runtime, Type, TypedArray, Value,
};
use rust_decimal::prelude::ToPrimitive;

use super::{GuestEngine, MAX_DEPTH, capability_table, entry, guest_failure, missing, too_deep};
use crate::capabilities::Capabilities;
use crate::error::{PolyglotError, Result};

const EXPORTS_GLOBAL: &str = "__provider_exports";

/// Builds the capability objects from the table passed in, plus a `console`
/// that forwards to `log`.
const PRELUDE: &str = r#"
(function (table) {
  var g = globalThis;
  table.forEach(function (spec) {
    var obj = {};
    spec.methods.forEach(function (method) {
      obj[method] = function () {
        return __host_call(spec.name, method, Array.prototype.slice.call(arguments));
      };
    });
    Object.freeze(obj);
    spec.bindings.forEach(function (name) { g[name] = obj; });
  });
  g.console = {
    log: g.log.info, info: g.log.info, debug: g.log.debug,
    warn: g.log.warn, error: g.log.error
  };
})
"#;

pub(super) struct JsEngine {
    capabilities: Arc<Capabilities>,
    // Dropped before the runtime.
    context: Option<Context>,
    runtime: Runtime,
    loaded: bool,
}

impl JsEngine {
    pub(super) fn new(capabilities: Arc<Capabilities>) -> Result<Self> {
        let load_error = |e: rquickjs::Error| PolyglotError::ScriptLoad {
            provider: capabilities.provider().to_owned(),
            reason: format!("failed to create javascript runtime: {e}"),
        };
        let runtime = Runtime::new().map_err(load_error)?;
        let context = Context::full(&runtime).map_err(load_error)?;

        context.with(|ctx| {
            install(&ctx, Arc::clone(&capabilities))
                .catch(&ctx)
                .map_err(|e| PolyglotError::ScriptLoad {
                    provider: capabilities.provider().to_owned(),
                    reason: format!("failed to bind capabilities: {e}"),
                })
        })?;

        tracing::debug!(
            provider = capabilities.provider(),
            max_statements = capabilities.sandbox().max_statements,
            "javascript context created"
        );
        Ok(Self {
            capabilities,
            context: Some(context),
            runtime,
            loaded: false,
        })
    }

    fn context(&self) -> Result<&Context> {
        self.context
            .as_ref()
            .ok_or_else(|| PolyglotError::ContextClosed(self.capabilities.provider().to_owned()))
    }

    /// Run queued promise jobs left behind by a call.
    fn drain_jobs(&self) {
        while self.runtime.is_job_pending() {
            if self.runtime.execute_pending_job().is_err() {
                tracing::debug!(provider = self.capabilities.provider(), "pending job failed");
                break;
            }
        }
    }
}

impl GuestEngine for JsEngine {
    fn load(&mut self, source: &str, file_name: &str) -> Result<()> {
        let wrapped = wrap_module(source);
        let provider = self.capabilities.provider().to_owned();
        self.context()?.with(|ctx| {
            let exports: rquickjs::Result<Value> = ctx.eval(wrapped);
            let exports = exports
                .and_then(|exports| {
                    ctx.globals().set(EXPORTS_GLOBAL, exports)?;
                    Ok(())
                })
                .catch(&ctx);
            exports.map_err(|e| PolyglotError::ScriptLoad {
                provider: provider.clone(),
                reason: format!("{file_name}: {e}"),
            })
        })?;
        self.loaded = true;
        self.drain_jobs();
        Ok(())
    }

    fn has_entry_point(&self, name: &str) -> bool {
        if !self.loaded {
            return false;
        }
        let Ok(context) = self.context() else {
            return false;
        };
        context.with(|ctx| {
            ctx.globals()
                .get::<_, Object>(EXPORTS_GLOBAL)
                .and_then(|exports| exports.get::<_, Value>(name))
                .map(|v| v.is_function())
                .unwrap_or(false)
        })
    }

    fn call(&mut self, name: &str, args: Vec<HostValue>) -> Result<HostValue> {
        if !self.loaded {
            return Err(missing(&self.capabilities, name));
        }
        self.capabilities.clear_failure();
        let capabilities = Arc::clone(&self.capabilities);
        let result = self.context()?.with(|ctx| {
            let exports: Object = ctx
                .globals()
                .get(EXPORTS_GLOBAL)
                .map_err(|_| missing(&capabilities, name))?;
            let func = exports
                .get::<_, Value>(name)
                .ok()
                .and_then(|v| v.into_function())
                .ok_or_else(|| missing(&capabilities, name))?;

            let mut js_args = Vec::with_capacity(args.len());
            for arg in &args {
                let value = to_js(&ctx, arg).catch(&ctx).map_err(|e| {
                    guest_failure(&capabilities, name, format!("argument conversion failed: {e}"))
                })?;
                js_args.push(value);
            }

            let returned: rquickjs::Result<Value> = func.call((This(exports), Rest(js_args)));
            match returned.and_then(settle).catch(&ctx) {
                Ok(value) => to_host(&value, 0),
                Err(e) => Err(guest_failure(&capabilities, name, e.to_string())),
            }
        });
        self.drain_jobs();
        result
    }

    fn close(&mut self) {
        if self.context.take().is_some() {
            self.loaded = false;
            tracing::debug!(provider = self.capabilities.provider(), "javascript context closed");
        }
    }
}

fn install<'js>(ctx: &Ctx<'js>, capabilities: Arc<Capabilities>) -> rquickjs::Result<()> {
    let host_call = Function::new(
        ctx.clone(),
        move |ctx: Ctx<'js>, object: String, method: String, args: Array<'js>| {
            host_call(&ctx, &capabilities, &object, &method, &args)
        },
    )?;
    ctx.globals().set("__host_call", host_call)?;

    let prelude: Function = ctx.eval(PRELUDE)?;
    let table: Value = ctx.json_parse(capability_table())?;
    prelude.call::<_, ()>((table,))?;
    Ok(())
}

fn host_call<'js>(
    ctx: &Ctx<'js>,
    capabilities: &Capabilities,
    object: &str,
    method: &str,
    args: &Array<'js>,
) -> rquickjs::Result<Value<'js>> {
    let mut values = Vec::with_capacity(args.len());
    for item in args.iter::<Value<'js>>() {
        match to_host(&item?, 0) {
            Ok(value) => values.push(value),
            Err(err) => return Err(Exception::throw_type(ctx, &err.to_string())),
        }
    }
    match capabilities.invoke_from_guest(object, method, values) {
        Ok(value) => to_js(ctx, &value),
        Err(message) => Err(Exception::throw_message(ctx, &message)),
    }
}

/// Await a returned promise; other values pass through.
fn settle(value: Value<'_>) -> rquickjs::Result<Value<'_>> {
    match value.as_promise() {
        Some(promise) => promise.finish::<Value>(),
        None => Ok(value),
    }
}

fn wrap_module(source: &str) -> String {
    let mut captures = String::new();
    for name in entry::ALL {
        captures.push_str(&format!(
            "if (typeof {name} === 'function') __captured.{name} = {name};\n"
        ));
    }
    format!(
        "(function () {{\n\
         var module = {{ exports: {{}} }};\n\
         var exports = module.exports;\n\
         {source}\n\
         ;\n\
         var __captured = {{}};\n\
         {captures}\
         var __exported = module.exports || {{}};\n\
         for (var __k in __exported) {{ __captured[__k] = __exported[__k]; }}\n\
         return __captured;\n\
         }})()"
    )
}

// ---------------------------------------------------------------------------
// Value conversion
// ---------------------------------------------------------------------------

/// Largest integer a double holds exactly.
const MAX_SAFE_INTEGER: u128 = 1 << 53;

fn to_js<'js>(ctx: &Ctx<'js>, value: &HostValue) -> rquickjs::Result<Value<'js>> {
    Ok(match value {
        HostValue::Null => Value::new_null(ctx.clone()),
        HostValue::Bool(b) => Value::new_bool(ctx.clone(), *b),
        HostValue::Int(n) => {
            if let Ok(small) = i32::try_from(*n) {
                Value::new_int(ctx.clone(), small)
            } else if n.unsigned_abs() <= MAX_SAFE_INTEGER {
                Value::new_float(ctx.clone(), *n as f64)
            } else {
                big_int(ctx, *n)?
            }
        }
        HostValue::Float(f) => Value::new_float(ctx.clone(), *f),
        HostValue::Decimal(d) => match d.to_i64() {
            Some(i) if d.fract().is_zero() => return to_js(ctx, &HostValue::Int(i.into())),
            _ => Value::new_float(ctx.clone(), d.to_f64().unwrap_or(f64::NAN)),
        },
        HostValue::Text(s) => s.as_str().into_js(ctx)?,
        HostValue::Bytes(b) => TypedArray::<u8>::new(ctx.clone(), b.clone())?.into_js(ctx)?,
        HostValue::List(items) => {
            let array = Array::new(ctx.clone())?;
            for (i, item) in items.iter().enumerate() {
                array.set(i, to_js(ctx, item)?)?;
            }
            array.into_js(ctx)?
        }
        HostValue::Map(entries) => {
            let object = Object::new(ctx.clone())?;
            for (key, item) in entries {
                object.set(key.as_str(), to_js(ctx, item)?)?;
            }
            object.into_js(ctx)?
        }
    })
}

/// A BigInt for integers beyond the safe double range. Values outside u64
/// and i64 go through the global `BigInt` constructor.
fn big_int<'js>(ctx: &Ctx<'js>, n: i128) -> rquickjs::Result<Value<'js>> {
    if let Ok(wide) = i64::try_from(n) {
        return BigInt::from_i64(ctx.clone(), wide)?.into_js(ctx);
    }
    if let Ok(wide) = u64::try_from(n) {
        return BigInt::from_u64(ctx.clone(), wide)?.into_js(ctx);
    }
    let constructor: Function = ctx.globals().get("BigInt")?;
    constructor.call((n.to_string(),))
}

fn conversion(err: rquickjs::Error) -> PolyglotError {
    PolyglotError::UnsupportedValueType(err.to_string())
}

/// Integral doubles become integers; JavaScript has no separate int type.
fn number(f: f64) -> HostValue {
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;
    if f.is_finite() && f.fract() == 0.0 && f.abs() < LIMIT {
        HostValue::Int(f as i128)
    } else {
        HostValue::Float(f)
    }
}

fn to_host(value: &Value<'_>, depth: usize) -> Result<HostValue> {
    if depth > MAX_DEPTH {
        return Err(too_deep());
    }
    match value.type_of() {
        Type::Uninitialized | Type::Undefined | Type::Null => Ok(HostValue::Null),
        Type::Bool => Ok(HostValue::Bool(value.as_bool().unwrap_or(false))),
        Type::Int => Ok(HostValue::Int(value.as_int().map(i128::from).unwrap_or(0))),
        Type::Float => Ok(number(value.as_float().unwrap_or(f64::NAN))),
        Type::BigInt => {
            let Coerced(text) = value.get::<Coerced<String>>().map_err(conversion)?;
            text.parse::<i128>().map(HostValue::Int).map_err(|_| {
                PolyglotError::UnsupportedValueType(format!("BigInt {text} exceeds 128 bits"))
            })
        }
        Type::String => value
            .get::<String>()
            .map(HostValue::Text)
            .map_err(conversion),
        Type::Array => {
            let Some(array) = value.as_array() else {
                return Ok(HostValue::List(Vec::new()));
            };
            let mut items = Vec::with_capacity(array.len());
            for item in array.iter::<Value>() {
                items.push(to_host(&item.map_err(conversion)?, depth + 1)?);
            }
            Ok(HostValue::List(items))
        }
        Type::Object | Type::Exception => {
            if let Ok(typed) = value.get::<TypedArray<u8>>() {
                return Ok(HostValue::Bytes(typed.as_bytes().unwrap_or_default().to_vec()));
            }
            if let Ok(buffer) = value.get::<ArrayBuffer>() {
                return Ok(HostValue::Bytes(buffer.as_bytes().unwrap_or_default().to_vec()));
            }
            let Some(object) = value.as_object() else {
                return Ok(HostValue::Null);
            };
            let mut map = indexmap::IndexMap::new();
            for prop in object.props::<String, Value>() {
                let (key, item) = prop.map_err(conversion)?;
                map.insert(key, to_host(&item, depth + 1)?);
            }
            Ok(HostValue::Map(map))
        }
        other => Err(PolyglotError::UnsupportedValueType(format!(
            "javascript {other:?} values cannot cross into the host"
        ))),
    }
}
