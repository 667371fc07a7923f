// src/config/validate.rs

use std::time::Duration;

use crate::config::model::{ConfigFile, EngineOptions, EngineSection, RawConfigFile};
use crate::errors::{DutrunError, Result};
use crate::util::parse_duration;

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = DutrunError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        let engine = validate_engine(&raw.engine)?;
        Ok(ConfigFile { engine })
    }
}

fn validate_engine(section: &EngineSection) -> Result<EngineOptions> {
    let default_step_timeout =
        parse_engine_duration("default_step_timeout", &section.default_step_timeout)?;
    let status_poll_interval =
        parse_engine_duration("status_poll_interval", &section.status_poll_interval)?;

    if section.max_parallel_targets == 0 {
        return Err(DutrunError::ConfigError(
            "[engine].max_parallel_targets must be >= 1 (got 0)".to_string(),
        ));
    }

    if section.buffer_capacity == 0 {
        return Err(DutrunError::ConfigError(
            "[engine].buffer_capacity must be >= 1 (got 0)".to_string(),
        ));
    }

    Ok(EngineOptions {
        default_step_timeout,
        max_parallel_targets: section.max_parallel_targets,
        status_poll_interval,
        buffer_capacity: section.buffer_capacity,
    })
}

fn parse_engine_duration(key: &str, value: &str) -> Result<Duration> {
    let d = parse_duration(value)
        .map_err(|e| DutrunError::ConfigError(format!("[engine].{key}: {e}")))?;
    if d.is_zero() {
        return Err(DutrunError::ConfigError(format!(
            "[engine].{key} must be greater than zero"
        )));
    }
    Ok(d)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_src: &str) -> Result<ConfigFile> {
        let raw: RawConfigFile = toml::from_str(toml_src)?;
        ConfigFile::try_from(raw)
    }

    #[test]
    fn empty_file_yields_defaults() {
        let cfg = parse("").unwrap();
        assert_eq!(cfg.engine, EngineOptions::default());
    }

    #[test]
    fn overrides_are_applied() {
        let cfg = parse(
            r#"
[engine]
default_step_timeout = "30s"
max_parallel_targets = 4
status_poll_interval = "200ms"
"#,
        )
        .unwrap();
        assert_eq!(cfg.engine.default_step_timeout, Duration::from_secs(30));
        assert_eq!(cfg.engine.max_parallel_targets, 4);
        assert_eq!(cfg.engine.status_poll_interval, Duration::from_millis(200));
        assert_eq!(cfg.engine.buffer_capacity, 4096);
    }

    #[test]
    fn zero_parallelism_is_rejected() {
        let err = parse("[engine]\nmax_parallel_targets = 0\n").unwrap_err();
        assert!(matches!(err, DutrunError::ConfigError(msg) if msg.contains("max_parallel_targets")));
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        let err = parse("[engine]\nstatus_poll_interval = \"0s\"\n").unwrap_err();
        assert!(matches!(err, DutrunError::ConfigError(msg) if msg.contains("status_poll_interval")));
    }
}
