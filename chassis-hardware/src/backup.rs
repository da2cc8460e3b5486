// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Types describing the NVDIMM backup ("ADR") trigger of a blade.

use crate::HardwareError;
use serde::Deserialize;
use serde::Serialize;
use std::time::Duration;

/// Raw state of a blade's backup trigger as reported by hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupTrigger {
    /// Whether the backup trigger is currently asserted.
    pub asserted: bool,
    /// Estimated time until the backup finishes.
    pub time_remaining: Duration,
    /// Delay between the backup-complete signal and a safe power off.
    pub completion_delay: Duration,
    /// How long the backup-in-progress signal stays asserted.
    pub post_present_delay: Duration,
}

/// Parameters for asserting (or deasserting) the backup trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupTriggerRequest {
    pub assert: bool,
    pub completion_delay: Duration,
    pub post_present_delay: Duration,
}

/// Backup status derived from a live trigger query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupStatus {
    Unknown,
    NotPending,
    Pending,
    Complete,
}

impl BackupStatus {
    pub fn from_query(
        query: &Result<BackupTrigger, HardwareError>,
    ) -> BackupStatus {
        match query {
            Err(_) => BackupStatus::Unknown,
            Ok(trigger) if !trigger.asserted => BackupStatus::NotPending,
            Ok(trigger) if trigger.time_remaining.is_zero() => {
                BackupStatus::Complete
            }
            Ok(_) => BackupStatus::Pending,
        }
    }
}
