// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Interfaces for parsing configuration files and working with a chassis
//! manager configuration

use crate::error::ConfigError;
use blade_sim::SimConfig;
use camino::Utf8Path;
use camino::Utf8PathBuf;
use dropshot::ConfigLogging;
use serde::Deserialize;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Configuration for a chassis manager
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Config {
    /// Number of blade slots in the chassis.
    pub blade_count: u8,
    /// Serial console arbitration.
    pub serial_session: SerialSessionConfig,
    /// Backup-gated power actions.
    pub datasafe: DatasafeConfig,
    /// Hardware access.
    pub hardware: HardwareConfig,
    /// Server-wide logging configuration.
    pub log: ConfigLogging,
}

impl Config {
    /// Load a `Config` from the given TOML file
    ///
    /// The returned config has not been validated; see [`Config::validate`].
    pub fn from_file(path: &Utf8Path) -> Result<Config, LoadError> {
        let file_contents = std::fs::read_to_string(path)
            .map_err(|err| LoadError::Io { path: path.into(), err })?;
        let config_parsed: Config = toml::from_str(&file_contents)
            .map_err(|err| LoadError::Parse { path: path.into(), err })?;
        Ok(config_parsed)
    }

    /// Check the configuration for internal consistency, reporting every
    /// problem found rather than just the first.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut reasons = Vec::new();

        if self.blade_count == 0 {
            reasons.push("blade_count must be at least 1".to_string());
        }
        if self.serial_session.default_timeout_secs == 0 {
            reasons.push(
                "serial_session.default_timeout_secs must be nonzero"
                    .to_string(),
            );
        }
        if self.serial_session.inactivity_check_interval_secs == 0 {
            reasons.push(
                "serial_session.inactivity_check_interval_secs must be nonzero"
                    .to_string(),
            );
        }
        if self.datasafe.worker_interval_ms == 0 {
            reasons.push(
                "datasafe.worker_interval_ms must be nonzero".to_string(),
            );
        }
        if self.hardware.call_timeout_ms == 0 {
            reasons
                .push("hardware.call_timeout_ms must be nonzero".to_string());
        }
        if self.hardware.simulated.blades.len() != usize::from(self.blade_count)
        {
            reasons.push(format!(
                "hardware.simulated describes {} blades but blade_count is {}",
                self.hardware.simulated.blades.len(),
                self.blade_count,
            ));
        }

        if reasons.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::InvalidConfig { reasons })
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub struct SerialSessionConfig {
    /// Inactivity timeout applied to sessions started without an explicit
    /// timeout.
    pub default_timeout_secs: u64,
    /// If true, hazardous commands forcibly end an active session instead of
    /// failing.
    #[serde(default)]
    pub kill_on_conflict: bool,
    /// How often the inactivity sweep runs.
    pub inactivity_check_interval_secs: u64,
}

impl SerialSessionConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }

    pub fn inactivity_check_interval(&self) -> Duration {
        Duration::from_secs(self.inactivity_check_interval_secs)
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub struct DatasafeConfig {
    /// Backup completion delay requested when hardware does not report one.
    pub default_completion_delay_secs: u64,
    /// Post-present delay requested when hardware does not report one.
    pub default_post_present_delay_secs: u64,
    /// Sleep between background worker passes while actions are pending.
    #[serde(default = "default_worker_interval_ms")]
    pub worker_interval_ms: u64,
}

fn default_worker_interval_ms() -> u64 {
    1000
}

impl DatasafeConfig {
    pub fn default_completion_delay(&self) -> Duration {
        Duration::from_secs(self.default_completion_delay_secs)
    }

    pub fn default_post_present_delay(&self) -> Duration {
        Duration::from_secs(self.default_post_present_delay_secs)
    }

    pub fn worker_interval(&self) -> Duration {
        Duration::from_millis(self.worker_interval_ms)
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub struct HardwareConfig {
    /// Upper bound on any single hardware call.
    pub call_timeout_ms: u64,
    /// Simulated chassis backing the hardware gateway.
    pub simulated: SimConfig,
}

impl HardwareConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("error reading \"{path}\": {err}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        err: std::io::Error,
    },
    #[error("error parsing \"{path}\": {err}")]
    Parse {
        path: Utf8PathBuf,
        #[source]
        err: toml::de::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use blade_sim::SimBladeConfig;
    use chassis_hardware::BladeType;
    use dropshot::ConfigLoggingLevel;

    fn config(blade_count: u8) -> Config {
        Config {
            blade_count,
            serial_session: SerialSessionConfig {
                default_timeout_secs: 300,
                kill_on_conflict: false,
                inactivity_check_interval_secs: 10,
            },
            datasafe: DatasafeConfig {
                default_completion_delay_secs: 5,
                default_post_present_delay_secs: 10,
                worker_interval_ms: 1000,
            },
            hardware: HardwareConfig {
                call_timeout_ms: 5000,
                simulated: SimConfig::servers(blade_count),
            },
            log: ConfigLogging::StderrTerminal {
                level: ConfigLoggingLevel::Info,
            },
        }
    }

    #[test]
    fn test_validate_ok() {
        config(24).validate().unwrap();
    }

    #[test]
    fn test_validate_collects_reasons() {
        let mut config = config(4);
        config.serial_session.default_timeout_secs = 0;
        config.hardware.call_timeout_ms = 0;
        config.hardware.simulated.blades.push(SimBladeConfig {
            blade_type: BladeType::Storage,
            powered_on: false,
        });

        let ConfigError::InvalidConfig { reasons } =
            config.validate().unwrap_err();
        assert_eq!(
            reasons,
            vec![
                "serial_session.default_timeout_secs must be nonzero",
                "hardware.call_timeout_ms must be nonzero",
                "hardware.simulated describes 5 blades but blade_count is 4",
            ]
        );
    }

    #[test]
    fn test_example_config_parses() {
        let path = Utf8Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("examples/config.toml");
        let config = Config::from_file(&path).unwrap();
        config.validate().unwrap();
        assert_eq!(config.blade_count, 24);
        assert_eq!(config.datasafe.worker_interval(), Duration::from_secs(1));
        assert_eq!(
            config.hardware.simulated.blades[23].blade_type,
            BladeType::Storage
        );
    }

    #[test]
    fn test_missing_file() {
        let err = Config::from_file(Utf8Path::new("/nonexistent/config.toml"))
            .unwrap_err();
        assert!(matches!(err, LoadError::Io { .. }), "{err}");
    }
}
