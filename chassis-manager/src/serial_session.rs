// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Arbitration of the chassis' single shared serial console.
//!
//! Exactly one blade at a time may own the console. Ownership is tracked by a
//! [`SessionOwner`] value that only ever changes through single
//! compare-and-swap steps under a mutex; the mutex is never held across a
//! hardware call. A session being torn down sits in
//! [`SessionOwner::Reserved`], which matches no caller's credentials, so a
//! teardown always wins against a concurrent send, receive, or stop from the
//! previous owner.
//!
//! Hardware setup and teardown of the console are serialized by a separate
//! async lock, so a teardown that claims a session mid-start only touches the
//! hardware after the start has finished with it.

use crate::config::SerialSessionConfig;
use crate::error::SessionError;
use crate::timeout::CallTimeout;
use async_trait::async_trait;
use chassis_hardware::BladeId;
use chassis_hardware::HardwareError;
use chassis_hardware::HardwareGateway;
use chassis_hardware::TransportMode;
use slog::debug;
use slog::error;
use slog::info;
use slog::o;
use slog::warn;
use slog::Logger;
use std::fmt;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

/// Opaque credential proving ownership of the serial console.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionToken(Uuid);

impl SessionToken {
    fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Who currently holds the serial console.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOwner {
    Inactive,
    /// The session of `blade_id` is being torn down; nobody may use or claim
    /// the console until the teardown finishes.
    Reserved { blade_id: BladeId },
    Blade { blade_id: BladeId, token: SessionToken },
}

#[derive(Debug)]
struct SessionState {
    owner: SessionOwner,
    last_activity: Instant,
    timeout: Duration,
}

impl SessionState {
    /// Replace the owner with `new` only if it is currently `expected`.
    ///
    /// On success the activity timestamp is refreshed; on failure the actual
    /// owner is returned.
    fn compare_and_swap(
        &mut self,
        expected: SessionOwner,
        new: SessionOwner,
    ) -> Result<(), SessionOwner> {
        if self.owner != expected {
            return Err(self.owner);
        }
        self.owner = new;
        self.last_activity = Instant::now();
        Ok(())
    }
}

fn mismatch(actual: SessionOwner) -> SessionError {
    match actual {
        SessionOwner::Inactive => SessionError::NoActiveSerialSession,
        SessionOwner::Reserved { .. } | SessionOwner::Blade { .. } => {
            SessionError::SerialSessionActive
        }
    }
}

/// Result of a console read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SerialRead {
    Data(Vec<u8>),
    /// The hardware had nothing to return before its read timed out.
    Timeout,
}

/// Point-in-time view of the console session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionInfo {
    pub owner: Option<BladeId>,
    pub idle: Duration,
    pub timeout: Duration,
}

/// Something that can forcibly silence the console so that other traffic can
/// use the shared transport.
#[async_trait]
pub trait ConsoleTakeover: Send + Sync {
    /// Tear down whatever session is active, ignoring credentials.
    async fn force_stop(&self) -> Result<(), SessionError>;
}

pub struct SerialSessionArbiter {
    log: Logger,
    blade_count: u8,
    default_timeout: Duration,
    kill_on_conflict: bool,
    hw: CallTimeout,
    gateway: Arc<dyn HardwareGateway>,
    transport: Arc<dyn TransportMode>,
    state: Mutex<SessionState>,
    /// Held across console mux and session-only mode changes.
    console_hw: tokio::sync::Mutex<()>,
}

impl SerialSessionArbiter {
    pub fn new(
        blade_count: u8,
        config: &SerialSessionConfig,
        call_timeout: Duration,
        gateway: Arc<dyn HardwareGateway>,
        transport: Arc<dyn TransportMode>,
        log: &Logger,
    ) -> Self {
        let default_timeout = config.default_timeout();
        Self {
            log: log.new(o!("component" => "SerialSessionArbiter")),
            blade_count,
            default_timeout,
            kill_on_conflict: config.kill_on_conflict,
            hw: CallTimeout(call_timeout),
            gateway,
            transport,
            state: Mutex::new(SessionState {
                owner: SessionOwner::Inactive,
                last_activity: Instant::now(),
                timeout: default_timeout,
            }),
            console_hw: tokio::sync::Mutex::new(()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        // Nothing panics while holding this lock.
        self.state.lock().unwrap()
    }

    fn check_blade(&self, blade: BladeId) -> Result<(), SessionError> {
        match blade.index(self.blade_count) {
            Some(_) => Ok(()),
            None => Err(SessionError::InvalidBladeId {
                blade,
                blade_count: self.blade_count,
            }),
        }
    }

    pub fn owner(&self) -> SessionOwner {
        self.lock().owner
    }

    pub fn is_active(&self) -> bool {
        self.owner() != SessionOwner::Inactive
    }

    pub fn session_info(&self) -> SessionInfo {
        let state = self.lock();
        let owner = match state.owner {
            SessionOwner::Inactive => None,
            SessionOwner::Reserved { blade_id }
            | SessionOwner::Blade { blade_id, .. } => Some(blade_id),
        };
        SessionInfo {
            owner,
            idle: state.last_activity.elapsed(),
            timeout: state.timeout,
        }
    }

    /// Claim the console for `blade_id` and point the mux at it.
    ///
    /// `timeout` overrides the configured inactivity timeout for this session
    /// only.
    pub async fn start_session(
        &self,
        blade_id: BladeId,
        timeout: Option<Duration>,
    ) -> Result<SessionToken, SessionError> {
        self.check_blade(blade_id)?;

        let token = SessionToken::generate();
        let owner = SessionOwner::Blade { blade_id, token };
        {
            let mut state = self.lock();
            state.compare_and_swap(SessionOwner::Inactive, owner).map_err(
                |actual| {
                    debug!(self.log, "serial session start rejected";
                        "blade" => %blade_id,
                        "owner" => ?actual,
                    );
                    SessionError::SerialSessionActive
                },
            )?;
            state.timeout = timeout.unwrap_or(self.default_timeout);
        }

        let _console = self.console_hw.lock().await;
        match self.hw.call(self.gateway.set_console_mux(blade_id)).await {
            Ok(()) => {}
            Err(HardwareError::SessionAlreadyActive) => {
                // The hardware has a session we don't know about. Leave our
                // bookkeeping alone rather than tear that session down; the
                // inactivity sweep reclaims it.
                warn!(self.log, "console mux reports a session already active";
                    "blade" => %blade_id,
                );
                return Err(SessionError::SerialSessionActive);
            }
            Err(err) => {
                error!(self.log, "failed to switch console mux";
                    "blade" => %blade_id,
                    "error" => %err,
                );
                self.release(owner);
                return Err(err.into());
            }
        }

        if let Err(err) =
            self.hw.call(self.transport.enable_session_only_mode()).await
        {
            error!(self.log, "failed to enable session-only mode";
                "blade" => %blade_id,
                "error" => %err,
            );
            if let Err(err) =
                self.hw.call(self.gateway.reset_console_mux(blade_id)).await
            {
                warn!(self.log, "failed to reset console mux after error";
                    "blade" => %blade_id,
                    "error" => %err,
                );
            }
            self.release(owner);
            return Err(err.into());
        }

        // A forced stop may have claimed the session while the hardware was
        // being set up. Its teardown runs once `_console` is released.
        if self.owner() != owner {
            info!(self.log, "serial session stopped before start completed";
                "blade" => %blade_id,
            );
            return Err(SessionError::NoActiveSerialSession);
        }

        info!(self.log, "serial session started";
            "blade" => %blade_id,
            "timeout" => ?timeout.unwrap_or(self.default_timeout),
        );
        Ok(token)
    }

    /// Roll a failed start back to `Inactive`, unless someone else has already
    /// moved the state on.
    fn release(&self, owner: SessionOwner) {
        let mut state = self.lock();
        if state.compare_and_swap(owner, SessionOwner::Inactive).is_ok() {
            state.timeout = self.default_timeout;
        }
    }

    /// Revalidate the caller's credentials, refreshing the activity timestamp.
    fn touch(
        &self,
        blade_id: BladeId,
        token: SessionToken,
    ) -> Result<(), SessionError> {
        self.check_blade(blade_id)?;
        if !self.transport.is_session_only_mode() {
            return Err(SessionError::NoActiveSerialSession);
        }
        let owner = SessionOwner::Blade { blade_id, token };
        self.lock().compare_and_swap(owner, owner).map_err(mismatch)
    }

    pub async fn send_data(
        &self,
        blade_id: BladeId,
        token: SessionToken,
        data: &[u8],
    ) -> Result<(), SessionError> {
        self.touch(blade_id, token)?;
        self.hw
            .call(self.gateway.send_serial_data(blade_id, data))
            .await
            .map_err(|err| {
                warn!(self.log, "console write failed";
                    "blade" => %blade_id,
                    "error" => %err,
                );
                err.into()
            })
    }

    pub async fn receive_data(
        &self,
        blade_id: BladeId,
        token: SessionToken,
    ) -> Result<SerialRead, SessionError> {
        self.touch(blade_id, token)?;
        match self.hw.call(self.gateway.receive_serial_data(blade_id)).await {
            Ok(data) => Ok(SerialRead::Data(data)),
            Err(HardwareError::Timeout) => Ok(SerialRead::Timeout),
            Err(err) => {
                warn!(self.log, "console read failed";
                    "blade" => %blade_id,
                    "error" => %err,
                );
                Err(err.into())
            }
        }
    }

    /// End a session.
    ///
    /// Unless `force_kill` is set, `(blade_id, token)` must match the current
    /// owner exactly. With `force_kill` the credentials are ignored and
    /// whatever session is active is torn down.
    pub async fn stop_session(
        &self,
        blade_id: BladeId,
        token: SessionToken,
        force_kill: bool,
    ) -> Result<(), SessionError> {
        if force_kill {
            return self.force_stop_session().await;
        }

        self.check_blade(blade_id)?;
        self.lock()
            .compare_and_swap(
                SessionOwner::Blade { blade_id, token },
                SessionOwner::Reserved { blade_id },
            )
            .map_err(mismatch)?;
        self.teardown(blade_id).await
    }

    async fn force_stop_session(&self) -> Result<(), SessionError> {
        let blade_id = {
            let mut state = self.lock();
            let owner = state.owner;
            match owner {
                SessionOwner::Inactive => {
                    return Err(SessionError::NoActiveSerialSession);
                }
                SessionOwner::Reserved { blade_id } => {
                    debug!(self.log, "serial session teardown already underway";
                        "blade" => %blade_id,
                    );
                    return Ok(());
                }
                SessionOwner::Blade { blade_id, .. } => {
                    state.owner = SessionOwner::Reserved { blade_id };
                    blade_id
                }
            }
        };
        info!(self.log, "force-stopping serial session"; "blade" => %blade_id);
        self.teardown(blade_id).await
    }

    /// Restore the console hardware to idle and return to `Inactive`.
    ///
    /// Must only be called by whoever moved the state to
    /// `Reserved { blade_id }`. Hardware failures are logged and the state is
    /// reset regardless; a failed mux reset is still reported to the caller.
    async fn teardown(&self, blade_id: BladeId) -> Result<(), SessionError> {
        let _console = self.console_hw.lock().await;
        let mux = self.hw.call(self.gateway.reset_console_mux(blade_id)).await;
        if let Err(err) = &mux {
            warn!(self.log, "failed to reset console mux";
                "blade" => %blade_id,
                "error" => %err,
            );
        }
        if let Err(err) =
            self.hw.call(self.transport.disable_session_only_mode()).await
        {
            warn!(self.log, "failed to disable session-only mode";
                "blade" => %blade_id,
                "error" => %err,
            );
        }

        {
            let mut state = self.lock();
            if state
                .compare_and_swap(
                    SessionOwner::Reserved { blade_id },
                    SessionOwner::Inactive,
                )
                .is_ok()
            {
                state.timeout = self.default_timeout;
            }
        }
        info!(self.log, "serial session stopped"; "blade" => %blade_id);

        mux.map_err(SessionError::from)
    }

    /// Stop the active session if it has been idle longer than its timeout.
    ///
    /// Returns true if a session was stopped.
    pub async fn inactivity_check(&self) -> bool {
        let blade_id = {
            let mut state = self.lock();
            let owner = state.owner;
            let SessionOwner::Blade { blade_id, .. } = owner else {
                return false;
            };
            if state.last_activity.elapsed() <= state.timeout {
                return false;
            }
            // Still under the lock, so the owner we just inspected is the
            // one we replace.
            state.owner = SessionOwner::Reserved { blade_id };
            blade_id
        };

        info!(self.log, "serial session timed out"; "blade" => %blade_id);
        if let Err(err) = self.teardown(blade_id).await {
            warn!(self.log, "error stopping timed-out serial session";
                "blade" => %blade_id,
                "error" => %err,
            );
        }
        true
    }

    /// Gate for hazardous commands that need the shared transport.
    ///
    /// Succeeds if no session is active, or if one was active and
    /// kill-on-conflict is enabled (the session is stopped first). Otherwise
    /// fails fast with [`SessionError::SerialSessionInProgress`].
    pub async fn api_precheck(&self) -> Result<(), SessionError> {
        if !self.is_active() {
            return Ok(());
        }
        if !self.kill_on_conflict {
            debug!(self.log, "rejecting command: serial session in progress");
            return Err(SessionError::SerialSessionInProgress);
        }
        match self.force_stop_session().await {
            Ok(()) | Err(SessionError::NoActiveSerialSession) => {}
            Err(err) => {
                warn!(self.log, "error stopping session on conflict";
                    "error" => %err,
                );
            }
        }
        Ok(())
    }

    /// Run [`Self::inactivity_check`] every `period` for as long as the
    /// returned task lives.
    pub fn spawn_inactivity_monitor(
        self: &Arc<Self>,
        period: Duration,
    ) -> JoinHandle<()> {
        let arbiter = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                arbiter.inactivity_check().await;
            }
        })
    }
}

#[async_trait]
impl ConsoleTakeover for SerialSessionArbiter {
    async fn force_stop(&self) -> Result<(), SessionError> {
        self.force_stop_session().await
    }
}
