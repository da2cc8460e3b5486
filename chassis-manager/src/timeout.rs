// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use chassis_hardware::HardwareError;
use std::future::Future;
use std::time::Duration;

/// Upper bound applied to every individual hardware call.
///
/// A wedged bus transaction surfaces as [`HardwareError::Timeout`] instead of
/// holding a blade's lock forever.
#[derive(Debug, Clone, Copy)]
pub(crate) struct CallTimeout(pub Duration);

impl CallTimeout {
    pub(crate) async fn call<T, F>(&self, future: F) -> Result<T, HardwareError>
    where
        F: Future<Output = Result<T, HardwareError>>,
    {
        tokio::time::timeout(self.0, future)
            .await
            .unwrap_or(Err(HardwareError::Timeout))
    }
}
