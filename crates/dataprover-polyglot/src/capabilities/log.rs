//! `log`: script output routed into host tracing.

use dataprover_codec::HostValue;

use super::Args;
use crate::error::Result;

/// Tracing target for everything a provider script logs.
pub const SCRIPT_TARGET: &str = "dataprover::script";

pub(super) fn call(provider: &str, method: &str, args: &Args) -> Result<HostValue> {
    let message = args.get(0).map(render).unwrap_or_default();
    match method {
        "debug" => tracing::debug!(target: SCRIPT_TARGET, provider, "{message}"),
        "info" => tracing::info!(target: SCRIPT_TARGET, provider, "{message}"),
        "warn" => tracing::warn!(target: SCRIPT_TARGET, provider, "{message}"),
        _ => tracing::error!(target: SCRIPT_TARGET, provider, "{message}"),
    }
    Ok(HostValue::Null)
}

fn render(value: &HostValue) -> String {
    match value {
        HostValue::Text(s) => s.clone(),
        other => other.to_json().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structured_messages_render_as_json() {
        let value = HostValue::from(serde_json::json!({"epoch": 512}));
        assert_eq!(render(&value), r#"{"epoch":512}"#);
        assert_eq!(render(&HostValue::from("plain")), "plain");
    }

    #[test]
    fn logging_returns_null() {
        let args = Args::new("log", "info", vec!["hello".into()]);
        assert_eq!(call("p", "info", &args).expect("log must succeed"), HostValue::Null);
    }
}
