// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Backup-gated execution of power-affecting blade commands.
//!
//! A blade with NVDIMMs must finish flushing memory to persistent storage
//! before it loses power. Hazardous commands therefore first assert the
//! blade's backup trigger and are parked in the blade's slot; a background
//! worker polls the backup status and executes the command once the hardware
//! reports the backup complete.

mod worker;

use crate::config::DatasafeConfig;
use crate::error::DatasafeError;
use crate::error::SessionError;
use crate::serial_session::ConsoleTakeover;
use crate::timeout::CallTimeout;
use chassis_hardware::BackupStatus;
use chassis_hardware::BackupTrigger;
use chassis_hardware::BackupTriggerRequest;
use chassis_hardware::BladeId;
use chassis_hardware::BladeType;
use chassis_hardware::HardwareGateway;
use chassis_hardware::PowerState;
use serde::Deserialize;
use serde::Serialize;
use slog::debug;
use slog::error;
use slog::info;
use slog::o;
use slog::warn;
use slog::Logger;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// The action outstanding for a blade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasafeAction {
    DoNothing,
    BatteryLowCapacityPanic,
    PowerOff,
    PowerOn,
    PowerCycle,
    BladeOff,
    BladeOn,
}

impl DatasafeAction {
    /// Whether the action may remove power from the blade's memory, and so
    /// must wait for a completed backup.
    pub fn requires_backup(self) -> bool {
        match self {
            DatasafeAction::BatteryLowCapacityPanic
            | DatasafeAction::PowerOff
            | DatasafeAction::PowerCycle
            | DatasafeAction::BladeOff => true,
            DatasafeAction::DoNothing
            | DatasafeAction::PowerOn
            | DatasafeAction::BladeOn => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Executed,
    /// Waiting on the blade's backup; the worker finishes the action later.
    Delayed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasafeOutcome {
    pub status: ActionStatus,
    pub backup_pending: bool,
    pub remaining: Duration,
}

impl DatasafeOutcome {
    fn executed() -> Self {
        Self {
            status: ActionStatus::Executed,
            backup_pending: false,
            remaining: Duration::ZERO,
        }
    }

    fn failed() -> Self {
        Self {
            status: ActionStatus::Failed,
            backup_pending: false,
            remaining: Duration::ZERO,
        }
    }

    fn delayed(remaining: Duration) -> Self {
        Self { status: ActionStatus::Delayed, backup_pending: true, remaining }
    }
}

/// Owner of the per-blade action slots and their background worker.
///
/// Dropping the coordinator stops the worker.
pub struct DatasafeCoordinator {
    inner: Arc<Inner>,
    worker: JoinHandle<()>,
}

impl Drop for DatasafeCoordinator {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

impl DatasafeCoordinator {
    /// Construct the coordinator and spawn its worker onto the current tokio
    /// runtime.
    pub fn new(
        blade_count: u8,
        config: &DatasafeConfig,
        call_timeout: Duration,
        gateway: Arc<dyn HardwareGateway>,
        console: Arc<dyn ConsoleTakeover>,
        log: &Logger,
    ) -> Self {
        let inner = Arc::new(Inner::new(
            blade_count,
            config,
            call_timeout,
            gateway,
            console,
            log,
        ));
        let worker = tokio::spawn(Arc::clone(&inner).run_worker());
        Self { inner, worker }
    }

    /// Submit `action` for `blade`.
    ///
    /// Fails without side effects if the blade already has an action
    /// outstanding. A `Delayed` outcome means the action now occupies the
    /// blade's slot and will be finished by the worker.
    pub async fn submit_action(
        &self,
        blade: BladeId,
        action: DatasafeAction,
    ) -> Result<DatasafeOutcome, DatasafeError> {
        self.inner.submit(blade, action).await
    }

    /// Report the blade's backup status without changing its slot.
    ///
    /// Like any other submission, this fails while the blade has an action
    /// outstanding.
    pub async fn query_status(
        &self,
        blade: BladeId,
    ) -> Result<DatasafeOutcome, DatasafeError> {
        self.inner.submit(blade, DatasafeAction::DoNothing).await
    }

    /// Mark every powered-on server blade for an emergency backup, overriding
    /// whatever else it had outstanding.
    ///
    /// Returns the blades that were marked.
    pub async fn trigger_battery_panic(&self) -> Vec<BladeId> {
        self.inner.trigger_battery_panic().await
    }

    pub async fn pending_action(
        &self,
        blade: BladeId,
    ) -> Result<DatasafeAction, DatasafeError> {
        Ok(*self.inner.slot(blade)?.lock().await)
    }

    /// Every blade with an action outstanding.
    pub async fn pending_actions(&self) -> Vec<(BladeId, DatasafeAction)> {
        let mut pending = Vec::new();
        for (blade, slot) in self.inner.slots() {
            let action = *slot.lock().await;
            if action != DatasafeAction::DoNothing {
                pending.push((blade, action));
            }
        }
        pending
    }
}

pub(crate) struct Inner {
    log: Logger,
    blade_count: u8,
    default_completion_delay: Duration,
    default_post_present_delay: Duration,
    worker_interval: Duration,
    hw: CallTimeout,
    gateway: Arc<dyn HardwareGateway>,
    console: Arc<dyn ConsoleTakeover>,
    slots: Vec<Mutex<DatasafeAction>>,
    wake: Notify,
}

impl Inner {
    pub(crate) fn new(
        blade_count: u8,
        config: &DatasafeConfig,
        call_timeout: Duration,
        gateway: Arc<dyn HardwareGateway>,
        console: Arc<dyn ConsoleTakeover>,
        log: &Logger,
    ) -> Self {
        Self {
            log: log.new(o!("component" => "DatasafeCoordinator")),
            blade_count,
            default_completion_delay: config.default_completion_delay(),
            default_post_present_delay: config.default_post_present_delay(),
            worker_interval: config.worker_interval(),
            hw: CallTimeout(call_timeout),
            gateway,
            console,
            slots: BladeId::all(blade_count)
                .map(|_| Mutex::new(DatasafeAction::DoNothing))
                .collect(),
            wake: Notify::new(),
        }
    }

    fn slot(
        &self,
        blade: BladeId,
    ) -> Result<&Mutex<DatasafeAction>, DatasafeError> {
        blade.index(self.blade_count).and_then(|i| self.slots.get(i)).ok_or(
            DatasafeError::InvalidBladeId {
                blade,
                blade_count: self.blade_count,
            },
        )
    }

    fn slots(
        &self,
    ) -> impl Iterator<Item = (BladeId, &Mutex<DatasafeAction>)> + '_ {
        BladeId::all(self.blade_count).zip(self.slots.iter())
    }

    pub(crate) async fn submit(
        &self,
        blade: BladeId,
        action: DatasafeAction,
    ) -> Result<DatasafeOutcome, DatasafeError> {
        let slot = self.slot(blade)?;
        let mut pending = slot.lock().await;

        if *pending != DatasafeAction::DoNothing {
            debug!(self.log, "rejecting datasafe action: blade busy";
                "blade" => %blade,
                "action" => ?action,
                "pending" => ?*pending,
            );
            return Ok(DatasafeOutcome::failed());
        }

        let outcome = self.resolve(blade, action).await;
        if outcome.status == ActionStatus::Delayed
            && action != DatasafeAction::DoNothing
        {
            info!(self.log, "datasafe action deferred until backup completes";
                "blade" => %blade,
                "action" => ?action,
                "remaining" => ?outcome.remaining,
            );
            *pending = action;
            self.wake.notify_one();
        }
        Ok(outcome)
    }

    /// Advance `action` for `blade` as far as the hardware allows right now.
    ///
    /// Called with the blade's slot locked, both for new submissions and by
    /// the worker for parked actions.
    pub(crate) async fn resolve(
        &self,
        blade: BladeId,
        action: DatasafeAction,
    ) -> DatasafeOutcome {
        // The backup query cannot get through while the console holds the
        // transport. Data protection takes precedence over console access.
        match self.console.force_stop().await {
            Ok(()) => {
                info!(self.log, "stopped serial session for backup query";
                    "blade" => %blade,
                );
            }
            Err(SessionError::NoActiveSerialSession) => {}
            Err(err) => {
                warn!(self.log, "failed to stop serial session";
                    "blade" => %blade,
                    "error" => %err,
                );
            }
        }

        let query =
            self.hw.call(self.gateway.query_backup_trigger(blade)).await;
        let status = BackupStatus::from_query(&query);
        let trigger = match query {
            Ok(trigger) => Some(trigger),
            Err(err) => {
                warn!(self.log, "backup trigger query failed";
                    "blade" => %blade,
                    "error" => %err,
                );
                None
            }
        };
        let remaining =
            trigger.map(|t| t.time_remaining).unwrap_or(Duration::ZERO);
        debug!(self.log, "backup status";
            "blade" => %blade,
            "action" => ?action,
            "status" => ?status,
            "remaining" => ?remaining,
        );

        if action == DatasafeAction::DoNothing {
            return match trigger {
                Some(_) => DatasafeOutcome {
                    status: ActionStatus::Executed,
                    backup_pending: status == BackupStatus::Pending,
                    remaining,
                },
                None => DatasafeOutcome::failed(),
            };
        }

        if !action.requires_backup() {
            return self.execute(blade, action).await;
        }

        match status {
            BackupStatus::NotPending | BackupStatus::Unknown => {
                self.trigger_backup(blade, trigger).await
            }
            BackupStatus::Pending => DatasafeOutcome::delayed(remaining),
            BackupStatus::Complete => self.execute(blade, action).await,
        }
    }

    async fn trigger_backup(
        &self,
        blade: BladeId,
        reported: Option<BackupTrigger>,
    ) -> DatasafeOutcome {
        let nonzero_or = |reported: Option<Duration>, default: Duration| {
            reported.filter(|d| !d.is_zero()).unwrap_or(default)
        };
        let request = BackupTriggerRequest {
            assert: true,
            completion_delay: nonzero_or(
                reported.map(|t| t.completion_delay),
                self.default_completion_delay,
            ),
            post_present_delay: nonzero_or(
                reported.map(|t| t.post_present_delay),
                self.default_post_present_delay,
            ),
        };

        let result =
            self.hw.call(self.gateway.set_backup_trigger(blade, request)).await;
        match result {
            Ok(()) => {
                info!(self.log, "backup triggered";
                    "blade" => %blade,
                    "completion_delay" => ?request.completion_delay,
                    "post_present_delay" => ?request.post_present_delay,
                );
                DatasafeOutcome::delayed(request.completion_delay)
            }
            Err(err) => {
                error!(self.log, "failed to trigger backup";
                    "blade" => %blade,
                    "error" => %err,
                );
                DatasafeOutcome::failed()
            }
        }
    }

    async fn execute(
        &self,
        blade: BladeId,
        action: DatasafeAction,
    ) -> DatasafeOutcome {
        let gateway = &self.gateway;
        let result = match action {
            DatasafeAction::PowerOff => {
                self.hw.call(gateway.power_off(blade)).await
            }
            DatasafeAction::PowerOn => {
                self.hw.call(gateway.power_on(blade)).await
            }
            DatasafeAction::PowerCycle => {
                self.hw.call(gateway.power_cycle(blade)).await
            }
            DatasafeAction::BladeOff => {
                self.hw.call(gateway.blade_off(blade)).await
            }
            DatasafeAction::BladeOn => {
                self.hw.call(gateway.blade_on(blade)).await
            }
            // The completed backup is the whole point of a panic.
            DatasafeAction::BatteryLowCapacityPanic
            | DatasafeAction::DoNothing => Ok(()),
        };

        match result {
            Ok(()) => {
                info!(self.log, "datasafe action executed";
                    "blade" => %blade,
                    "action" => ?action,
                );
                DatasafeOutcome::executed()
            }
            Err(err) => {
                error!(self.log, "datasafe action failed";
                    "blade" => %blade,
                    "action" => ?action,
                    "error" => %err,
                );
                DatasafeOutcome::failed()
            }
        }
    }

    pub(crate) async fn trigger_battery_panic(&self) -> Vec<BladeId> {
        let mut marked = Vec::new();

        for (blade, slot) in self.slots() {
            match self.hw.call(self.gateway.blade_type(blade)).await {
                Ok(BladeType::Server) => {}
                Ok(BladeType::Storage | BladeType::Empty) => continue,
                Err(err) => {
                    // Treat an unreadable blade as a server that needs its
                    // backup.
                    warn!(self.log, "failed to read blade type";
                        "blade" => %blade,
                        "error" => %err,
                    );
                }
            }

            let mut pending = slot.lock().await;
            if *pending == DatasafeAction::BatteryLowCapacityPanic {
                continue;
            }
            if !self.assume_powered_on(blade).await {
                continue;
            }
            if *pending != DatasafeAction::DoNothing {
                warn!(self.log, "battery panic overrides pending action";
                    "blade" => %blade,
                    "pending" => ?*pending,
                );
            }
            *pending = DatasafeAction::BatteryLowCapacityPanic;
            marked.push(blade);
        }

        if !marked.is_empty() {
            info!(self.log, "battery panic: backing up blades";
                "blades" => ?marked,
            );
            self.wake.notify_one();
        }
        marked
    }

    /// A blade counts as powered off only if hardware positively says so; a
    /// failed read of either power state is treated as "on".
    async fn assume_powered_on(&self, blade: BladeId) -> bool {
        let hard = self.hw.call(self.gateway.hard_power_state(blade)).await;
        let soft = self.hw.call(self.gateway.soft_power_state(blade)).await;
        for (which, state) in [("hard", &hard), ("soft", &soft)] {
            if let Err(err) = state {
                warn!(self.log, "power state read failed; assuming on";
                    "blade" => %blade,
                    "which" => which,
                    "error" => %err,
                );
            }
        }
        hard.map_or(true, PowerState::is_on)
            && soft.map_or(true, PowerState::is_on)
    }
}
