// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::config::SimConfig;
use anyhow::bail;
use anyhow::Result;
use async_trait::async_trait;
use chassis_hardware::BackupStatus;
use chassis_hardware::BackupTrigger;
use chassis_hardware::BackupTriggerRequest;
use chassis_hardware::BladeId;
use chassis_hardware::BladeType;
use chassis_hardware::HardwareError;
use chassis_hardware::HardwareGateway;
use chassis_hardware::PowerState;
use chassis_hardware::TransportMode;
use slog::debug;
use slog::info;
use slog::o;
use slog::Logger;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::time::Duration;

/// IPMI "parameter out of range".
const CC_PARAMETER_OUT_OF_RANGE: u8 = 0xc9;
/// IPMI "command not supported in present state".
const CC_INVALID_STATE: u8 = 0xd5;

/// Kind of hardware operation, used to record calls and inject faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HardwareOp {
    SetConsoleMux,
    ResetConsoleMux,
    SendSerialData,
    ReceiveSerialData,
    QueryBackupTrigger,
    SetBackupTrigger,
    HardPowerState,
    SoftPowerState,
    PowerOn,
    PowerOff,
    PowerCycle,
    BladeOn,
    BladeOff,
    BladeType,
    EnableSessionOnlyMode,
    DisableSessionOnlyMode,
}

/// A single call received by the simulated chassis.
///
/// `blade` is `None` for transport-mode operations, which are not tied to a
/// blade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HardwareCall {
    pub blade: Option<BladeId>,
    pub op: HardwareOp,
}

#[derive(Debug)]
struct SimBlade {
    blade_type: BladeType,
    hard_power: PowerState,
    soft_power: PowerState,
    backup_asserted: bool,
    backup_polls_remaining: u32,
    completion_delay: Duration,
    post_present_delay: Duration,
    scripted_backup: VecDeque<Result<BackupTrigger, HardwareError>>,
    backup_requests: Vec<BackupTriggerRequest>,
    console_out: VecDeque<u8>,
    console_in: Vec<u8>,
}

impl SimBlade {
    fn clear_backup(&mut self) {
        self.backup_asserted = false;
        self.backup_polls_remaining = 0;
    }
}

#[derive(Debug)]
struct State {
    blades: Vec<SimBlade>,
    mux: Option<BladeId>,
    session_only: bool,
    calls: Vec<HardwareCall>,
    faults: HashMap<(Option<BladeId>, HardwareOp), HardwareError>,
    latency: HashMap<BladeId, Duration>,
}

impl State {
    fn record(
        &mut self,
        blade: Option<BladeId>,
        op: HardwareOp,
    ) -> Result<(), HardwareError> {
        self.calls.push(HardwareCall { blade, op });
        match self.faults.get(&(blade, op)) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn blade_mut(
        &mut self,
        blade: BladeId,
    ) -> Result<&mut SimBlade, HardwareError> {
        let count = u8::try_from(self.blades.len()).unwrap_or(u8::MAX);
        blade
            .index(count)
            .and_then(|i| self.blades.get_mut(i))
            .ok_or(HardwareError::CompletionCode(CC_PARAMETER_OUT_OF_RANGE))
    }
}

/// A simulated chassis of blades sharing one console mux.
#[derive(Debug)]
pub struct SimulatedChassis {
    log: Logger,
    backup_polls_to_complete: u32,
    backup_duration: Duration,
    state: Mutex<State>,
}

impl SimulatedChassis {
    pub fn new(config: &SimConfig, log: &Logger) -> Result<Self> {
        if config.blades.is_empty() {
            bail!("simulated chassis must have at least one blade");
        }
        if config.blades.len() > usize::from(u8::MAX) {
            bail!(
                "simulated chassis supports at most {} blades (got {})",
                u8::MAX,
                config.blades.len()
            );
        }

        let log = log.new(o!("component" => "SimulatedChassis"));
        info!(log, "setting up simulated chassis";
            "blades" => config.blades.len(),
        );

        let blades = config
            .blades
            .iter()
            .map(|blade| {
                let power = if blade.powered_on {
                    PowerState::On
                } else {
                    PowerState::Off
                };
                SimBlade {
                    blade_type: blade.blade_type,
                    hard_power: power,
                    soft_power: power,
                    backup_asserted: false,
                    backup_polls_remaining: 0,
                    completion_delay: Duration::ZERO,
                    post_present_delay: Duration::ZERO,
                    scripted_backup: VecDeque::new(),
                    backup_requests: Vec::new(),
                    console_out: VecDeque::new(),
                    console_in: Vec::new(),
                }
            })
            .collect();

        Ok(Self {
            log,
            backup_polls_to_complete: config.backup_polls_to_complete,
            backup_duration: Duration::from_secs(config.backup_duration_secs),
            state: Mutex::new(State {
                blades,
                mux: None,
                session_only: false,
                calls: Vec::new(),
                faults: HashMap::new(),
                latency: HashMap::new(),
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    async fn blade_call<T, F>(
        &self,
        blade: BladeId,
        op: HardwareOp,
        f: F,
    ) -> Result<T, HardwareError>
    where
        F: FnOnce(&mut State) -> Result<T, HardwareError> + Send,
        T: Send,
    {
        let latency = self.lock().latency.get(&blade).copied();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.lock();
        debug!(self.log, "hardware call"; "blade" => %blade, "op" => ?op);
        state.record(Some(blade), op)?;
        state.blade_mut(blade)?;
        f(&mut state)
    }

    /// Every call received so far, in order.
    pub fn calls(&self) -> Vec<HardwareCall> {
        self.lock().calls.clone()
    }

    /// Operations received for `blade`, in order.
    pub fn calls_for(&self, blade: BladeId) -> Vec<HardwareOp> {
        self.lock()
            .calls
            .iter()
            .filter(|call| call.blade == Some(blade))
            .map(|call| call.op)
            .collect()
    }

    /// Number of times `op` was invoked for `blade`.
    pub fn count(&self, blade: BladeId, op: HardwareOp) -> usize {
        self.calls_for(blade).into_iter().filter(|o| *o == op).count()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Backup-trigger requests received for `blade`, in order.
    pub fn backup_requests(&self, blade: BladeId) -> Vec<BackupTriggerRequest> {
        self.lock()
            .blade_mut(blade)
            .map(|b| b.backup_requests.clone())
            .unwrap_or_default()
    }

    /// Script the responses to the next backup-trigger queries for `blade`.
    ///
    /// Each query consumes one entry; the final entry keeps being returned
    /// once it is the only one left. Scripted responses take precedence over
    /// the simulated backup progress.
    pub fn script_backup_status(
        &self,
        blade: BladeId,
        statuses: &[BackupStatus],
    ) {
        let duration = self.backup_duration;
        let mut state = self.lock();
        if let Ok(b) = state.blade_mut(blade) {
            b.scripted_backup = statuses
                .iter()
                .map(|status| match status {
                    BackupStatus::Unknown => Err(HardwareError::Timeout),
                    BackupStatus::NotPending => Ok(BackupTrigger {
                        asserted: false,
                        time_remaining: Duration::ZERO,
                        completion_delay: Duration::ZERO,
                        post_present_delay: Duration::ZERO,
                    }),
                    BackupStatus::Pending => Ok(BackupTrigger {
                        asserted: true,
                        time_remaining: duration,
                        completion_delay: Duration::ZERO,
                        post_present_delay: Duration::ZERO,
                    }),
                    BackupStatus::Complete => Ok(BackupTrigger {
                        asserted: true,
                        time_remaining: Duration::ZERO,
                        completion_delay: Duration::ZERO,
                        post_present_delay: Duration::ZERO,
                    }),
                })
                .collect();
        }
    }

    /// Make every future `op` on `blade` (or on the transport, for `None`)
    /// fail with `err`.
    pub fn inject_fault(
        &self,
        blade: Option<BladeId>,
        op: HardwareOp,
        err: HardwareError,
    ) {
        self.lock().faults.insert((blade, op), err);
    }

    pub fn clear_fault(&self, blade: Option<BladeId>, op: HardwareOp) {
        self.lock().faults.remove(&(blade, op));
    }

    /// Delay every call for `blade` by `latency` before it is serviced.
    pub fn set_latency(&self, blade: BladeId, latency: Duration) {
        self.lock().latency.insert(blade, latency);
    }

    pub fn set_power(
        &self,
        blade: BladeId,
        hard: PowerState,
        soft: PowerState,
    ) {
        let mut state = self.lock();
        if let Ok(b) = state.blade_mut(blade) {
            b.hard_power = hard;
            b.soft_power = soft;
        }
    }

    pub fn power(&self, blade: BladeId) -> Option<(PowerState, PowerState)> {
        self.lock().blade_mut(blade).ok().map(|b| (b.hard_power, b.soft_power))
    }

    /// Queue bytes as console output produced by `blade`.
    pub fn push_console_output(&self, blade: BladeId, data: &[u8]) {
        let mut state = self.lock();
        if let Ok(b) = state.blade_mut(blade) {
            b.console_out.extend(data.iter().copied());
        }
    }

    /// Bytes written to the console of `blade` so far.
    pub fn console_input(&self, blade: BladeId) -> Vec<u8> {
        self.lock()
            .blade_mut(blade)
            .map(|b| b.console_in.clone())
            .unwrap_or_default()
    }

    /// The blade the console mux currently points at, if any.
    pub fn mux(&self) -> Option<BladeId> {
        self.lock().mux
    }
}

#[async_trait]
impl HardwareGateway for SimulatedChassis {
    async fn set_console_mux(
        &self,
        blade: BladeId,
    ) -> Result<(), HardwareError> {
        self.blade_call(blade, HardwareOp::SetConsoleMux, |state| {
            if state.mux.is_some() {
                return Err(HardwareError::SessionAlreadyActive);
            }
            state.mux = Some(blade);
            Ok(())
        })
        .await
    }

    async fn reset_console_mux(
        &self,
        blade: BladeId,
    ) -> Result<(), HardwareError> {
        self.blade_call(blade, HardwareOp::ResetConsoleMux, |state| {
            state.mux = None;
            Ok(())
        })
        .await
    }

    async fn send_serial_data(
        &self,
        blade: BladeId,
        data: &[u8],
    ) -> Result<(), HardwareError> {
        self.blade_call(blade, HardwareOp::SendSerialData, |state| {
            if state.mux != Some(blade) {
                return Err(HardwareError::CompletionCode(CC_INVALID_STATE));
            }
            state.blade_mut(blade)?.console_in.extend_from_slice(data);
            Ok(())
        })
        .await
    }

    async fn receive_serial_data(
        &self,
        blade: BladeId,
    ) -> Result<Vec<u8>, HardwareError> {
        self.blade_call(blade, HardwareOp::ReceiveSerialData, |state| {
            if state.mux != Some(blade) {
                return Err(HardwareError::CompletionCode(CC_INVALID_STATE));
            }
            let b = state.blade_mut(blade)?;
            if b.console_out.is_empty() {
                return Err(HardwareError::Timeout);
            }
            Ok(b.console_out.drain(..).collect())
        })
        .await
    }

    async fn query_backup_trigger(
        &self,
        blade: BladeId,
    ) -> Result<BackupTrigger, HardwareError> {
        let duration = self.backup_duration;
        self.blade_call(blade, HardwareOp::QueryBackupTrigger, |state| {
            let b = state.blade_mut(blade)?;
            if b.scripted_backup.len() > 1 {
                if let Some(next) = b.scripted_backup.pop_front() {
                    return next;
                }
            }
            if let Some(last) = b.scripted_backup.front() {
                return last.clone();
            }

            let time_remaining =
                if b.backup_asserted && b.backup_polls_remaining > 0 {
                    b.backup_polls_remaining -= 1;
                    duration
                } else {
                    Duration::ZERO
                };
            Ok(BackupTrigger {
                asserted: b.backup_asserted,
                time_remaining,
                completion_delay: b.completion_delay,
                post_present_delay: b.post_present_delay,
            })
        })
        .await
    }

    async fn set_backup_trigger(
        &self,
        blade: BladeId,
        request: BackupTriggerRequest,
    ) -> Result<(), HardwareError> {
        let polls = self.backup_polls_to_complete;
        self.blade_call(blade, HardwareOp::SetBackupTrigger, |state| {
            let b = state.blade_mut(blade)?;
            b.backup_requests.push(request);
            b.backup_asserted = request.assert;
            b.backup_polls_remaining = if request.assert { polls } else { 0 };
            b.completion_delay = request.completion_delay;
            b.post_present_delay = request.post_present_delay;
            Ok(())
        })
        .await
    }

    async fn hard_power_state(
        &self,
        blade: BladeId,
    ) -> Result<PowerState, HardwareError> {
        self.blade_call(blade, HardwareOp::HardPowerState, |state| {
            Ok(state.blade_mut(blade)?.hard_power)
        })
        .await
    }

    async fn soft_power_state(
        &self,
        blade: BladeId,
    ) -> Result<PowerState, HardwareError> {
        self.blade_call(blade, HardwareOp::SoftPowerState, |state| {
            Ok(state.blade_mut(blade)?.soft_power)
        })
        .await
    }

    async fn power_on(&self, blade: BladeId) -> Result<(), HardwareError> {
        self.blade_call(blade, HardwareOp::PowerOn, |state| {
            let b = state.blade_mut(blade)?;
            b.hard_power = PowerState::On;
            b.soft_power = PowerState::On;
            Ok(())
        })
        .await
    }

    async fn power_off(&self, blade: BladeId) -> Result<(), HardwareError> {
        self.blade_call(blade, HardwareOp::PowerOff, |state| {
            let b = state.blade_mut(blade)?;
            b.hard_power = PowerState::Off;
            b.soft_power = PowerState::Off;
            b.clear_backup();
            Ok(())
        })
        .await
    }

    async fn power_cycle(&self, blade: BladeId) -> Result<(), HardwareError> {
        self.blade_call(blade, HardwareOp::PowerCycle, |state| {
            let b = state.blade_mut(blade)?;
            b.hard_power = PowerState::On;
            b.soft_power = PowerState::On;
            b.clear_backup();
            Ok(())
        })
        .await
    }

    async fn blade_on(&self, blade: BladeId) -> Result<(), HardwareError> {
        self.blade_call(blade, HardwareOp::BladeOn, |state| {
            let b = state.blade_mut(blade)?;
            if !b.hard_power.is_on() {
                return Err(HardwareError::CompletionCode(CC_INVALID_STATE));
            }
            b.soft_power = PowerState::On;
            Ok(())
        })
        .await
    }

    async fn blade_off(&self, blade: BladeId) -> Result<(), HardwareError> {
        self.blade_call(blade, HardwareOp::BladeOff, |state| {
            let b = state.blade_mut(blade)?;
            b.soft_power = PowerState::Off;
            b.clear_backup();
            Ok(())
        })
        .await
    }

    async fn blade_type(
        &self,
        blade: BladeId,
    ) -> Result<BladeType, HardwareError> {
        self.blade_call(blade, HardwareOp::BladeType, |state| {
            Ok(state.blade_mut(blade)?.blade_type)
        })
        .await
    }
}

#[async_trait]
impl TransportMode for SimulatedChassis {
    async fn enable_session_only_mode(&self) -> Result<(), HardwareError> {
        let mut state = self.lock();
        state.record(None, HardwareOp::EnableSessionOnlyMode)?;
        state.session_only = true;
        Ok(())
    }

    async fn disable_session_only_mode(&self) -> Result<(), HardwareError> {
        let mut state = self.lock();
        state.record(None, HardwareOp::DisableSessionOnlyMode)?;
        state.session_only = false;
        Ok(())
    }

    fn is_session_only_mode(&self) -> bool {
        self.lock().session_only
    }
}
