use crate::config::Config;
use crate::error::{PowerMapError, Result, ValidationError};

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_schema_version(config, &mut errors);
        Self::validate_engine(config, &mut errors);
        Self::validate_ingestion(config, &mut errors);
        Self::validate_narrative(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(PowerMapError::ConfigValidation { errors })
        }
    }

    fn validate_schema_version(config: &Config, errors: &mut Vec<ValidationError>) {
        let version = &config.meta.schema_version;
        if version != "1.0.0" {
            errors.push(ValidationError::new(
                "_meta.schema_version",
                format!("Unsupported schema version: {}", version),
            ));
        }
    }

    fn validate_engine(config: &Config, errors: &mut Vec<ValidationError>) {
        let engine = &config.engine;

        if engine.retention_days == 0 {
            errors.push(ValidationError::new(
                "engine.retention_days",
                "Retention window must be at least one day",
            ));
        }

        if engine.half_life_days == 0 {
            errors.push(ValidationError::new(
                "engine.half_life_days",
                "Decay half-life must be at least one day",
            ));
        }

        if engine.top_k == 0 {
            errors.push(ValidationError::new(
                "engine.top_k",
                "top_k must be greater than 0",
            ));
        }

        if engine.formal_edge_weight <= 0.0 {
            errors.push(ValidationError::new(
                "engine.formal_edge_weight",
                "Formal edge weight must be positive",
            ));
        }

        for (key, value) in [
            ("engine.message_weight", engine.message_weight),
            ("engine.meeting_weight", engine.meeting_weight),
            ("engine.cc_weight_factor", engine.cc_weight_factor),
        ] {
            if value < 0.0 {
                errors.push(ValidationError::new(key, "Weight must be non-negative"));
            }
        }
    }

    fn validate_ingestion(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.ingestion.max_batch == 0 {
            errors.push(ValidationError::new(
                "ingestion.max_batch",
                "Batch size must be greater than 0",
            ));
        }

        let deadline = &config.ingestion.source_deadline;
        if !Self::is_valid_duration_string(deadline) {
            errors.push(ValidationError::new(
                "ingestion.source_deadline",
                format!("Invalid duration format: {}", deadline),
            ));
        }
    }

    fn validate_narrative(config: &Config, errors: &mut Vec<ValidationError>) {
        let narrative = &config.narrative;

        let valid_providers = ["template", "api"];
        if !valid_providers.contains(&narrative.provider.as_str()) {
            errors.push(ValidationError::new(
                "narrative.provider",
                format!(
                    "Provider must be one of {:?}, got '{}'",
                    valid_providers, narrative.provider
                ),
            ));
        }

        // The api provider needs a key at runtime; catch the missing
        // variable at validation time instead of on the first report.
        if narrative.enabled && narrative.provider == "api" {
            let env_var = &narrative.api_key_env;
            match std::env::var(env_var) {
                Ok(key) if key.is_empty() => {
                    errors.push(ValidationError::new(
                        "narrative.api_key_env",
                        format!("Environment variable {} is empty", env_var),
                    ));
                }
                Err(_) => {
                    errors.push(ValidationError::new(
                        "narrative.api_key_env",
                        format!("Environment variable {} is not set", env_var),
                    ));
                }
                _ => {}
            }
        }

        let temp = narrative.temperature;
        if !(0.0..=2.0).contains(&temp) {
            errors.push(ValidationError::new(
                "narrative.temperature",
                format!("Temperature must be between 0.0 and 2.0, got {}", temp),
            ));
        }
    }

    fn is_valid_duration_string(s: &str) -> bool {
        s.ends_with('s')
            || s.ends_with('m')
            || s.ends_with('h')
            || s.chars().all(|c| c.is_ascii_digit())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_config() {
        let config = Config::default();
        assert!(ConfigValidator::validate(&config).is_ok());
    }

    #[test]
    fn test_zero_retention_rejected() {
        let mut config = Config::default();
        config.engine.retention_days = 0;
        assert!(ConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn test_invalid_provider() {
        let mut config = Config::default();
        config.narrative.provider = "smoke-signals".to_string();
        assert!(ConfigValidator::validate(&config).is_err());
    }
}
