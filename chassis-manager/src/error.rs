// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error handling facilities for the chassis manager.

use chassis_hardware::BladeId;
use chassis_hardware::HardwareError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration file: {}", .reasons.join(", "))]
    InvalidConfig { reasons: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("blade {blade} out of range (chassis has {blade_count} blades)")]
    InvalidBladeId { blade: BladeId, blade_count: u8 },
    #[error("a serial session is already active")]
    SerialSessionActive,
    #[error("no active serial session")]
    NoActiveSerialSession,
    #[error("serial session in progress")]
    SerialSessionInProgress,
    #[error("console hardware failure: {0}")]
    Hardware(#[from] HardwareError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DatasafeError {
    #[error("blade {blade} out of range (chassis has {blade_count} blades)")]
    InvalidBladeId { blade: BladeId, blade_count: u8 },
}
