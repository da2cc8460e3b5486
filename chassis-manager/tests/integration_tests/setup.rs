// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Helpers for running a chassis manager against a simulated chassis

use blade_sim::SimConfig;
use blade_sim::SimulatedChassis;
use chassis_hardware::HardwareGateway;
use chassis_hardware::TransportMode;
use chassis_manager::Config;
use chassis_manager::DatasafeConfig;
use chassis_manager::HardwareConfig;
use chassis_manager::SerialSessionConfig;
use chassis_manager::Server;
use chassis_manager::ServerContext;
use dropshot::ConfigLogging;
use dropshot::ConfigLoggingLevel;
use slog::o;
use slog::Logger;
use std::sync::Arc;

pub struct ChassisTestContext {
    pub sim: Arc<SimulatedChassis>,
    pub server: Server,
}

impl ChassisTestContext {
    pub fn ctx(&self) -> &Arc<ServerContext> {
        self.server.context()
    }

    pub fn teardown(self) {
        drop(self.server);
    }
}

pub fn test_config(sim: SimConfig) -> Config {
    let blade_count = u8::try_from(sim.blades.len()).unwrap();
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
        hardware: HardwareConfig { call_timeout_ms: 2000, simulated: sim },
        log: ConfigLogging::StderrTerminal { level: ConfigLoggingLevel::Debug },
    }
}

pub fn test_setup_with_config(config: Config) -> ChassisTestContext {
    let log = Logger::root(slog::Discard, o!());
    let sim = Arc::new(
        SimulatedChassis::new(&config.hardware.simulated, &log).unwrap(),
    );
    let server = Server::start(
        &config,
        Arc::clone(&sim) as Arc<dyn HardwareGateway>,
        Arc::clone(&sim) as Arc<dyn TransportMode>,
        &log,
    )
    .unwrap();
    ChassisTestContext { sim, server }
}

pub fn test_setup(blades: u8) -> ChassisTestContext {
    test_setup_with_config(test_config(SimConfig::servers(blades)))
}
