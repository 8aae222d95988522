//! Shared helpers used across subcommands.

use tracing_subscriber::EnvFilter;

/// Initialize the tracing subscriber. `RUST_LOG` overrides `default_level`.
pub fn init_tracing(default_level: &str, json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}

/// Render a status table row with fixed column widths.
pub fn row(name: &str, language: &str, version: &str, status: &str) -> String {
    format!("{name:<24} {language:<12} {version:<10} {status}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_pads_columns() {
        let line = row("stake", "javascript", "1.0.0", "available");
        assert!(line.starts_with("stake "));
        assert_eq!(&line[25..35], "javascript");
        assert!(line.ends_with("available"));
    }
}
