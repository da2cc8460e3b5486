// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::config::Config;
use crate::datasafe::DatasafeCoordinator;
use crate::serial_session::ConsoleTakeover;
use crate::serial_session::SerialSessionArbiter;
use chassis_hardware::HardwareGateway;
use chassis_hardware::TransportMode;
use slog::Logger;
use std::sync::Arc;

/// Shared state used by administrative callers
pub struct ServerContext {
    pub serial_sessions: Arc<SerialSessionArbiter>,
    pub datasafe: DatasafeCoordinator,
    pub log: Logger,
}

impl ServerContext {
    pub fn new(
        config: &Config,
        gateway: Arc<dyn HardwareGateway>,
        transport: Arc<dyn TransportMode>,
        log: &Logger,
    ) -> Arc<Self> {
        let call_timeout = config.hardware.call_timeout();
        let serial_sessions = Arc::new(SerialSessionArbiter::new(
            config.blade_count,
            &config.serial_session,
            call_timeout,
            Arc::clone(&gateway),
            transport,
            log,
        ));
        let datasafe = DatasafeCoordinator::new(
            config.blade_count,
            &config.datasafe,
            call_timeout,
            gateway,
            Arc::clone(&serial_sessions) as Arc<dyn ConsoleTakeover>,
            log,
        );
        Arc::new(ServerContext { serial_sessions, datasafe, log: log.clone() })
    }
}
