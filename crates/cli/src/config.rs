//! Configuration management for the CLI

use anyhow::{Context, Result};
use bench_lib::HarnessConfig;
use std::time::Duration;

use crate::Cli;

/// Load the harness configuration and apply command-line overrides
///
/// Precedence, lowest first: built-in defaults, the `--config` file,
/// `ATTACH_BENCH_*` environment variables, command-line flags.
pub fn load(cli: &Cli, repeat: Option<u32>, settle_delay_ms: Option<u64>) -> Result<HarnessConfig> {
    let mut config = HarnessConfig::load(cli.config.as_deref()).with_context(|| match &cli.config {
        Some(path) => format!("Failed to load configuration from {}", path.display()),
        None => "Failed to load configuration from the environment".to_string(),
    })?;

    apply_overrides(&mut config, cli.namespace.as_deref(), repeat, settle_delay_ms);
    Ok(config)
}

fn apply_overrides(
    config: &mut HarnessConfig,
    namespace: Option<&str>,
    repeat: Option<u32>,
    settle_delay_ms: Option<u64>,
) {
    if let Some(namespace) = namespace {
        config.namespace = namespace.to_string();
    }
    if let Some(repeat) = repeat {
        config.repeat_count = repeat;
    }
    if let Some(ms) = settle_delay_ms {
        config.settle_delay = Duration::from_millis(ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_replace_configured_values() {
        let mut config = HarnessConfig::default();
        apply_overrides(&mut config, Some("bench"), Some(3), Some(500));

        assert_eq!(config.namespace, "bench");
        assert_eq!(config.repeat_count, 3);
        assert_eq!(config.settle_delay, Duration::from_millis(500));
    }

    #[test]
    fn test_missing_overrides_keep_config() {
        let mut config = HarnessConfig::default();
        apply_overrides(&mut config, None, None, None);

        assert_eq!(config.namespace, "default");
        assert_eq!(config.repeat_count, 20);
    }
}
