// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Background worker that drives parked datasafe actions to completion.

use super::ActionStatus;
use super::DatasafeAction;
use super::Inner;
use slog::debug;
use slog::error;
use slog::info;
use std::sync::Arc;

impl Inner {
    /// Body of the worker task.
    ///
    /// Sleeps until woken, then makes passes over every slot until a pass
    /// finds nothing left waiting on a backup. Redundant wakeups just cost an
    /// extra pass.
    pub(super) async fn run_worker(self: Arc<Self>) {
        loop {
            self.wake.notified().await;
            debug!(self.log, "datasafe worker woken");

            let mut passes: u64 = 0;
            loop {
                passes += 1;
                if self.run_pass().await {
                    break;
                }
                tokio::time::sleep(self.worker_interval).await;
            }
            debug!(self.log, "datasafe worker idle"; "passes" => passes);
        }
    }

    /// Re-resolve every parked action once.
    ///
    /// Returns true if no slot is left waiting.
    pub(crate) async fn run_pass(&self) -> bool {
        let mut all_resolved = true;

        for (blade, slot) in self.slots() {
            let mut pending = slot.lock().await;
            let action = *pending;
            if action == DatasafeAction::DoNothing {
                continue;
            }

            let outcome = self.resolve(blade, action).await;
            match outcome.status {
                ActionStatus::Executed => {
                    info!(self.log, "pending datasafe action completed";
                        "blade" => %blade,
                        "action" => ?action,
                    );
                    *pending = DatasafeAction::DoNothing;
                }
                ActionStatus::Failed => {
                    error!(self.log, "abandoning pending datasafe action";
                        "blade" => %blade,
                        "action" => ?action,
                    );
                    *pending = DatasafeAction::DoNothing;
                }
                ActionStatus::Delayed => {
                    all_resolved = false;
                }
            }
        }

        all_resolved
    }
}
