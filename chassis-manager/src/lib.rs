// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Control plane of a blade chassis: arbitrates the shared serial console and
//! gates power-affecting commands behind NVDIMM backup completion.

mod config;
mod context;
mod datasafe;
mod error;
mod serial_session;
mod timeout;

pub use config::Config;
pub use config::DatasafeConfig;
pub use config::HardwareConfig;
pub use config::LoadError;
pub use config::SerialSessionConfig;
pub use context::ServerContext;
pub use datasafe::ActionStatus;
pub use datasafe::DatasafeAction;
pub use datasafe::DatasafeCoordinator;
pub use datasafe::DatasafeOutcome;
pub use error::ConfigError;
pub use error::DatasafeError;
pub use error::SessionError;
pub use serial_session::ConsoleTakeover;
pub use serial_session::SerialRead;
pub use serial_session::SerialSessionArbiter;
pub use serial_session::SessionInfo;
pub use serial_session::SessionOwner;
pub use serial_session::SessionToken;

use blade_sim::SimulatedChassis;
use chassis_hardware::HardwareGateway;
use chassis_hardware::TransportMode;
use futures::StreamExt;
use signal_hook::consts::signal::SIGINT;
use signal_hook::consts::signal::SIGTERM;
use signal_hook::consts::signal::SIGUSR1;
use signal_hook_tokio::Signals;
use slog::debug;
use slog::info;
use slog::o;
use slog::warn;
use slog::Logger;
use std::sync::Arc;
use tokio::task::JoinHandle;

pub struct Server {
    /// shared state used by administrative callers
    apictx: Arc<ServerContext>,
    /// periodic sweep ending idle serial sessions
    inactivity_monitor: JoinHandle<()>,
}

impl Drop for Server {
    fn drop(&mut self) {
        self.inactivity_monitor.abort();
    }
}

impl Server {
    /// Start a chassis manager against the given hardware.
    pub fn start(
        config: &Config,
        gateway: Arc<dyn HardwareGateway>,
        transport: Arc<dyn TransportMode>,
        log: &Logger,
    ) -> Result<Server, String> {
        config
            .validate()
            .map_err(|error| format!("validating config: {}", error))?;

        let log = log.new(o!("name" => "chassis-manager"));
        info!(log, "setting up chassis manager";
            "blade_count" => config.blade_count,
        );

        let apictx = ServerContext::new(config, gateway, transport, &log);
        let inactivity_monitor =
            apictx.serial_sessions.spawn_inactivity_monitor(
                config.serial_session.inactivity_check_interval(),
            );

        Ok(Server { apictx, inactivity_monitor })
    }

    pub fn context(&self) -> &Arc<ServerContext> {
        &self.apictx
    }

    /// Run until SIGINT or SIGTERM.
    ///
    /// SIGUSR1 is the battery monitor's low-capacity signal and triggers an
    /// emergency backup of every powered-on server blade.
    pub async fn wait_for_finish(&self) -> Result<(), String> {
        let log = &self.apictx.log;
        let mut signals =
            Signals::new([SIGINT, SIGTERM, SIGUSR1]).map_err(|error| {
                format!("registering signal handlers: {}", error)
            })?;

        while let Some(signal) = signals.next().await {
            match signal {
                SIGUSR1 => {
                    warn!(log, "battery low capacity signal received");
                    let marked =
                        self.apictx.datasafe.trigger_battery_panic().await;
                    info!(log, "battery panic submitted";
                        "blades" => ?marked,
                    );
                }
                other => {
                    debug!(log, "received signal"; "signal" => other);
                    break;
                }
            }
        }

        info!(log, "shutting down");
        Ok(())
    }
}

/// Run an instance of the [Server] against a simulated chassis.
pub async fn run_server(config: Config) -> Result<(), String> {
    let log = config
        .log
        .to_logger("chassis-manager")
        .map_err(|message| format!("initializing logger: {}", message))?;

    let sim = Arc::new(
        SimulatedChassis::new(&config.hardware.simulated, &log)
            .map_err(|error| format!("starting simulated chassis: {error:#}"))?,
    );
    let server = Server::start(
        &config,
        Arc::clone(&sim) as Arc<dyn HardwareGateway>,
        sim as Arc<dyn TransportMode>,
        &log,
    )?;
    server.wait_for_finish().await
}
