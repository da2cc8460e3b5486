// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! In-memory simulation of a blade chassis.
//!
//! [`SimulatedChassis`] implements both [`chassis_hardware::HardwareGateway`]
//! and [`chassis_hardware::TransportMode`]. Tests script its responses per
//! blade and inspect the ordered log of hardware calls it received.

pub mod config;
mod chassis;

pub use chassis::HardwareCall;
pub use chassis::HardwareOp;
pub use chassis::SimulatedChassis;
pub use config::SimBladeConfig;
pub use config::SimConfig;
