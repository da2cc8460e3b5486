// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Configuration of a simulated chassis

use chassis_hardware::BladeType;
use serde::Deserialize;
use serde::Serialize;

#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub struct SimConfig {
    /// One entry per blade slot, in slot order starting at blade 1.
    pub blades: Vec<SimBladeConfig>,
    /// Number of backup-trigger queries a blade reports as in progress after
    /// its trigger is asserted, before it reports the backup complete.
    #[serde(default = "default_backup_polls")]
    pub backup_polls_to_complete: u32,
    /// Estimated backup duration reported while a backup is in progress.
    #[serde(default = "default_backup_duration_secs")]
    pub backup_duration_secs: u64,
}

fn default_backup_polls() -> u32 {
    3
}

fn default_backup_duration_secs() -> u64 {
    5
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub struct SimBladeConfig {
    pub blade_type: BladeType,
    #[serde(default = "default_powered_on")]
    pub powered_on: bool,
}

fn default_powered_on() -> bool {
    true
}

impl SimConfig {
    /// A chassis of `count` powered-on server blades.
    pub fn servers(count: u8) -> Self {
        Self {
            blades: (0..count)
                .map(|_| SimBladeConfig {
                    blade_type: BladeType::Server,
                    powered_on: true,
                })
                .collect(),
            backup_polls_to_complete: default_backup_polls(),
            backup_duration_secs: default_backup_duration_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_defaults() {
        let config: SimConfig = toml::from_str(
            r#"
            blades = [
                { blade_type = "server" },
                { blade_type = "storage", powered_on = false },
            ]
            "#,
        )
        .unwrap();
        assert_eq!(config.backup_polls_to_complete, 3);
        assert_eq!(config.blades.len(), 2);
        assert!(config.blades[0].powered_on);
        assert_eq!(config.blades[1].blade_type, BladeType::Storage);
        assert!(!config.blades[1].powered_on);
    }
}
