//! Configuration validation utilities.

use std::collections::HashSet;

use super::error::{ConfigError, ConfigResult};
use super::schema::{
    BusConfig, CommandsConfig, LatticeConfig, OutboundConfig, PluginsConfig, RetryConfig,
};

/// Validates the entire configuration.
pub fn validate_config(config: &LatticeConfig) -> ConfigResult<()> {
    validate_bus_config(&config.bus)?;
    validate_commands_config(&config.commands)?;
    validate_outbound_config(&config.outbound)?;
    validate_plugins_config(&config.plugins)?;
    Ok(())
}

fn validate_bus_config(bus: &BusConfig) -> ConfigResult<()> {
    if bus.handler_timeout_ms == 0 {
        return Err(ConfigError::validation(
            "Handler timeout must be greater than 0",
        ));
    }

    for topic in &bus.topics {
        let valid = topic
            .split_once('.')
            .is_some_and(|(category, name)| !category.is_empty() && !name.is_empty())
            && !topic.contains('*')
            && !topic.contains(char::is_whitespace);
        if !valid {
            return Err(ConfigError::validation(format!(
                "Invalid topic '{topic}': expected '<category>.<name>'"
            )));
        }
    }

    Ok(())
}

fn validate_commands_config(commands: &CommandsConfig) -> ConfigResult<()> {
    if commands.prefixes.is_empty() {
        return Err(ConfigError::validation(
            "At least one command prefix is required",
        ));
    }

    if let Some(bad) = commands
        .prefixes
        .iter()
        .find(|p| p.is_empty() || p.contains(char::is_whitespace))
    {
        return Err(ConfigError::validation(format!(
            "Invalid command prefix {bad:?}: must be non-empty without whitespace"
        )));
    }

    if commands.timeout_ms == 0 {
        return Err(ConfigError::validation(
            "Command timeout must be greater than 0",
        ));
    }

    Ok(())
}

fn validate_outbound_config(outbound: &OutboundConfig) -> ConfigResult<()> {
    if outbound.capacity == 0 {
        return Err(ConfigError::validation(
            "Outbound capacity must be greater than 0",
        ));
    }

    if outbound.rate == 0 {
        return Err(ConfigError::validation("Outbound rate must be greater than 0"));
    }

    if outbound.per_ms == 0 {
        return Err(ConfigError::validation(
            "Outbound rate window must be greater than 0",
        ));
    }

    if outbound.burst == 0 {
        return Err(ConfigError::validation(
            "Outbound burst must be greater than 0",
        ));
    }

    validate_retry_config(&outbound.retry)
}

fn validate_retry_config(retry: &RetryConfig) -> ConfigResult<()> {
    if retry.initial_delay_ms == 0 {
        return Err(ConfigError::validation(
            "Initial retry delay must be greater than 0",
        ));
    }

    if retry.max_delay_ms < retry.initial_delay_ms {
        return Err(ConfigError::validation(
            "Max retry delay must be greater than or equal to initial delay",
        ));
    }

    if retry.backoff_multiplier.is_nan() || retry.backoff_multiplier < 1.0 {
        return Err(ConfigError::validation(
            "Backoff multiplier must be at least 1.0",
        ));
    }

    Ok(())
}

fn validate_plugins_config(plugins: &PluginsConfig) -> ConfigResult<()> {
    if plugins.hook_timeout_ms == 0 {
        return Err(ConfigError::validation(
            "Plugin hook timeout must be greater than 0",
        ));
    }

    let mut seen = HashSet::new();
    for id in &plugins.disabled {
        if id.is_empty() {
            return Err(ConfigError::validation("Disabled plugin id cannot be empty"));
        }
        if !seen.insert(id) {
            return Err(ConfigError::validation(format!(
                "Plugin '{id}' is listed as disabled more than once"
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rejects(mutate: impl FnOnce(&mut LatticeConfig)) -> bool {
        let mut config = LatticeConfig::default();
        mutate(&mut config);
        matches!(
            validate_config(&config),
            Err(ConfigError::ValidationError { .. })
        )
    }

    #[test]
    fn test_validate_default_config() {
        assert!(validate_config(&LatticeConfig::default()).is_ok());
    }

    #[test]
    fn test_validate_prefixes() {
        assert!(rejects(|c| c.commands.prefixes.clear()));
        assert!(rejects(|c| c.commands.prefixes.push(String::new())));
        assert!(rejects(|c| c.commands.prefixes = vec!["! ".into()]));
    }

    #[test]
    fn test_validate_zero_values() {
        assert!(rejects(|c| c.outbound.capacity = 0));
        assert!(rejects(|c| c.outbound.rate = 0));
        assert!(rejects(|c| c.outbound.per_ms = 0));
        assert!(rejects(|c| c.bus.handler_timeout_ms = 0));
        assert!(rejects(|c| c.commands.timeout_ms = 0));
        assert!(rejects(|c| c.plugins.hook_timeout_ms = 0));
    }

    #[test]
    fn test_validate_retry() {
        assert!(rejects(|c| c.outbound.retry.max_delay_ms = 1));
        assert!(rejects(|c| c.outbound.retry.backoff_multiplier = 0.5));
        assert!(rejects(|c| c.outbound.retry.backoff_multiplier = f64::NAN));
        assert!(!rejects(|c| c.outbound.retry.max_retries = 0));
    }

    #[test]
    fn test_validate_topics() {
        assert!(!rejects(|c| c.bus.topics.push("custom.poke".into())));
        assert!(rejects(|c| c.bus.topics.push("poke".into())));
        assert!(rejects(|c| c.bus.topics.push("custom.*".into())));
        assert!(rejects(|c| c.bus.topics.push(".poke".into())));
    }

    #[test]
    fn test_validate_disabled_plugins() {
        assert!(rejects(|c| c.plugins.disabled = vec!["a".into(), "a".into()]));
        assert!(!rejects(|c| c.plugins.disabled = vec!["a".into(), "b".into()]));
    }
}
