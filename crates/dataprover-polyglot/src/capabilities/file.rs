//! `sandboxedFile`: read-only file access confined to the provider directory.

use std::path::{Component, Path, PathBuf};

use dataprover_codec::{HostValue, Record};

use super::Args;
use crate::error::{PolyglotError, Result};

/// Options for [`SandboxedFile::read_csv`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvOptions {
    pub delimiter: String,
    pub has_header: bool,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self {
            delimiter: ",".to_owned(),
            has_header: true,
        }
    }
}

/// File reader rooted at one provider directory.
#[derive(Debug, Clone)]
pub struct SandboxedFile {
    root: PathBuf,
}

impl SandboxedFile {
    /// Root the reader at `dir`, which must exist.
    pub fn new(dir: &Path) -> Result<Self> {
        Ok(Self {
            root: dir.canonicalize()?,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `raw` against the root without leaving it.
    ///
    /// The path is normalized lexically first so targets that do not exist
    /// yet are still checked; existing targets are canonicalized again so a
    /// symlink cannot point outside the root.
    pub fn resolve(&self, raw: &str) -> Result<PathBuf> {
        let candidate = if Path::new(raw).is_absolute() {
            PathBuf::from(raw)
        } else {
            self.root.join(raw)
        };
        let normalized = normalize_path(&candidate);
        if !normalized.starts_with(&self.root) {
            return Err(self.escape(raw, &normalized));
        }
        if let Ok(real) = normalized.canonicalize() {
            if !real.starts_with(&self.root) {
                return Err(self.escape(raw, &real));
            }
            return Ok(real);
        }
        Ok(normalized)
    }

    pub fn read_text(&self, path: &str) -> Result<String> {
        let full = self.resolve(path)?;
        std::fs::read_to_string(&full).map_err(|e| read_error(path, e))
    }

    pub fn read_bytes(&self, path: &str) -> Result<Vec<u8>> {
        let full = self.resolve(path)?;
        std::fs::read(&full).map_err(|e| read_error(path, e))
    }

    pub fn read_json(&self, path: &str) -> Result<HostValue> {
        let text = self.read_text(path)?;
        let json: serde_json::Value = serde_json::from_str(&text).map_err(|e| {
            PolyglotError::capability("sandboxedFile", format!("invalid JSON in `{path}`: {e}"))
        })?;
        Ok(HostValue::from(json))
    }

    pub fn read_lines(&self, path: &str) -> Result<Vec<String>> {
        Ok(self.read_text(path)?.lines().map(str::to_owned).collect())
    }

    /// Read delimited rows. With a header, rows are keyed by the trimmed
    /// header names and extra columns are dropped; without one, keys are
    /// `col0`, `col1`, ... Quoting is not interpreted.
    pub fn read_csv(&self, path: &str, options: &CsvOptions) -> Result<Vec<Record>> {
        let text = self.read_text(path)?;
        let mut lines = text.lines();
        let delimiter = options.delimiter.as_str();

        let headers: Option<Vec<String>> = if options.has_header {
            lines
                .next()
                .map(|h| h.split(delimiter).map(|s| s.trim().to_owned()).collect())
        } else {
            None
        };

        let rows: Vec<Record> = lines
            .map(|line| {
                let values = line.split(delimiter).map(|v| HostValue::Text(v.trim().to_owned()));
                match &headers {
                    Some(headers) => headers.iter().cloned().zip(values).collect(),
                    None => values.enumerate().map(|(i, v)| (format!("col{i}"), v)).collect(),
                }
            })
            .collect();
        tracing::debug!(path, rows = rows.len(), "read csv");
        Ok(rows)
    }

    /// Whether `path` exists. Paths outside the root report `false`.
    pub fn exists(&self, path: &str) -> bool {
        self.resolve(path).map(|p| p.exists()).unwrap_or(false)
    }

    pub(super) fn call(&self, method: &str, args: &Args) -> Result<HostValue> {
        let path = args.text(0)?;
        Ok(match method {
            "readText" => HostValue::Text(self.read_text(path)?),
            "readJson" => self.read_json(path)?,
            "readCsv" => HostValue::List(
                self.read_csv(path, &csv_options(args))?
                    .into_iter()
                    .map(HostValue::Map)
                    .collect(),
            ),
            "readLines" => {
                HostValue::List(self.read_lines(path)?.into_iter().map(HostValue::Text).collect())
            }
            "readBytes" => HostValue::Bytes(self.read_bytes(path)?),
            _ => HostValue::Bool(self.exists(path)),
        })
    }

    fn escape(&self, raw: &str, resolved: &Path) -> PolyglotError {
        tracing::warn!(path = raw, resolved = %resolved.display(), "blocked path outside provider directory");
        PolyglotError::SecurityViolation(format!(
            "path `{raw}` resolves outside the provider directory `{}`",
            self.root.display()
        ))
    }
}

/// CSV options from either `(path, {delimiter, hasHeader})` or
/// `(path, delimiter, hasHeader)`.
fn csv_options(args: &Args) -> CsvOptions {
    let mut options = CsvOptions::default();
    match args.get(1) {
        Some(HostValue::Map(map)) => {
            if let Some(d) = map.get("delimiter").and_then(HostValue::as_str) {
                options.delimiter = d.to_owned();
            }
            if let Some(h) = map.get("hasHeader").and_then(HostValue::as_bool) {
                options.has_header = h;
            }
        }
        Some(HostValue::Text(d)) => {
            options.delimiter = d.clone();
            if let Some(h) = args.get(2).and_then(HostValue::as_bool) {
                options.has_header = h;
            }
        }
        _ => {}
    }
    if options.delimiter.is_empty() {
        options.delimiter = ",".to_owned();
    }
    options
}

fn read_error(path: &str, err: std::io::Error) -> PolyglotError {
    PolyglotError::capability("sandboxedFile", format!("failed to read `{path}`: {err}"))
}

/// Lexically normalize a path: drop `.` and fold `..` into its parent.
fn normalize_path(path: &Path) -> PathBuf {
    let mut components = Vec::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                if matches!(components.last(), Some(Component::Normal(_))) {
                    components.pop();
                } else {
                    components.push(component);
                }
            }
            Component::CurDir => {}
            _ => components.push(component),
        }
    }
    components.iter().collect()
}
