// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HardwareError {
    #[error("hardware call timed out")]
    Timeout,
    #[error("a serial session is already active on the console mux")]
    SessionAlreadyActive,
    #[error("hardware returned completion code {0:#04x}")]
    CompletionCode(u8),
    #[error("transport error: {0}")]
    Transport(String),
}

impl HardwareError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, HardwareError::Timeout)
    }
}
