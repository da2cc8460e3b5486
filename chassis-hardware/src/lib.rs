// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Interfaces to the physical chassis hardware.
//!
//! The chassis manager never talks to the management bus directly; it goes
//! through the two traits defined here. [`HardwareGateway`] covers per-blade
//! operations (console mux, backup trigger, power control) and
//! [`TransportMode`] covers the shared channel that carries both console bytes
//! and every other command.

mod backup;
mod blade;
mod error;

pub use backup::BackupStatus;
pub use backup::BackupTrigger;
pub use backup::BackupTriggerRequest;
pub use blade::BladeId;
pub use blade::BladeType;
pub use blade::PowerState;
pub use error::HardwareError;

use async_trait::async_trait;

type Result<T, E = HardwareError> = std::result::Result<T, E>;

/// Per-blade hardware operations.
///
/// Every call is a bus transaction that may succeed, fail with a
/// hardware-reported error, or time out.
#[async_trait]
pub trait HardwareGateway: Send + Sync {
    /// Connect the shared console mux to `blade`.
    ///
    /// Returns [`HardwareError::SessionAlreadyActive`] if the hardware believes
    /// a console session is already established.
    async fn set_console_mux(&self, blade: BladeId) -> Result<()>;

    /// Return the console mux to its idle position.
    async fn reset_console_mux(&self, blade: BladeId) -> Result<()>;

    /// Write bytes to the console of `blade`.
    async fn send_serial_data(&self, blade: BladeId, data: &[u8])
        -> Result<()>;

    /// Read pending console bytes from `blade`.
    ///
    /// [`HardwareError::Timeout`] means no data arrived before the hardware
    /// gave up waiting; callers treat it as "nothing yet".
    async fn receive_serial_data(&self, blade: BladeId) -> Result<Vec<u8>>;

    async fn query_backup_trigger(&self, blade: BladeId)
        -> Result<BackupTrigger>;

    async fn set_backup_trigger(
        &self,
        blade: BladeId,
        request: BackupTriggerRequest,
    ) -> Result<()>;

    /// State of the blade's hard power enable.
    async fn hard_power_state(&self, blade: BladeId) -> Result<PowerState>;

    /// Power state as reported by the blade's BMC.
    async fn soft_power_state(&self, blade: BladeId) -> Result<PowerState>;

    async fn power_on(&self, blade: BladeId) -> Result<()>;
    async fn power_off(&self, blade: BladeId) -> Result<()>;
    async fn power_cycle(&self, blade: BladeId) -> Result<()>;
    async fn blade_on(&self, blade: BladeId) -> Result<()>;
    async fn blade_off(&self, blade: BladeId) -> Result<()>;

    async fn blade_type(&self, blade: BladeId) -> Result<BladeType>;
}

/// Control over the shared physical channel.
///
/// While session-only mode is enabled the channel rejects all traffic except
/// console bytes.
#[async_trait]
pub trait TransportMode: Send + Sync {
    async fn enable_session_only_mode(&self) -> Result<()>;
    async fn disable_session_only_mode(&self) -> Result<()>;
    fn is_session_only_mode(&self) -> bool;
}
