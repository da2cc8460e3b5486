// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use super::setup;
use blade_sim::HardwareOp;
use chassis_hardware::BackupStatus;
use chassis_hardware::BackupTriggerRequest;
use chassis_hardware::BladeId;
use chassis_hardware::PowerState;
use chassis_manager::ActionStatus;
use chassis_manager::DatasafeAction;
use chassis_manager::DatasafeError;
use chassis_manager::SessionOwner;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn power_cycle_waits_for_backup() {
    let testctx = setup::test_setup(8);
    let datasafe = &testctx.ctx().datasafe;
    let blade = BladeId(5);
    testctx.sim.script_backup_status(
        blade,
        &[BackupStatus::NotPending, BackupStatus::Complete],
    );

    let outcome = datasafe
        .submit_action(blade, DatasafeAction::PowerCycle)
        .await
        .unwrap();
    assert_eq!(outcome.status, ActionStatus::Delayed);
    assert!(outcome.backup_pending);
    assert_eq!(
        datasafe.pending_action(blade).await.unwrap(),
        DatasafeAction::PowerCycle
    );
    assert_eq!(
        testctx.sim.backup_requests(blade),
        vec![BackupTriggerRequest {
            assert: true,
            completion_delay: Duration::from_secs(5),
            post_present_delay: Duration::from_secs(10),
        }]
    );

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(testctx.sim.count(blade, HardwareOp::PowerCycle), 1);
    assert_eq!(
        datasafe.pending_action(blade).await.unwrap(),
        DatasafeAction::DoNothing
    );
    assert!(datasafe.pending_actions().await.is_empty());

    testctx.teardown();
}

#[tokio::test(start_paused = true)]
async fn power_off_after_natural_backup() {
    let testctx = setup::test_setup(4);
    let datasafe = &testctx.ctx().datasafe;
    let blade = BladeId(2);

    let outcome =
        datasafe.submit_action(blade, DatasafeAction::PowerOff).await.unwrap();
    assert_eq!(outcome.status, ActionStatus::Delayed);

    // Nothing else is accepted for the blade while the first command is
    // parked, status queries included.
    let calls = testctx.sim.calls().len();
    let busy =
        datasafe.submit_action(blade, DatasafeAction::BladeOff).await.unwrap();
    assert_eq!(busy.status, ActionStatus::Failed);
    let status = datasafe.query_status(blade).await.unwrap();
    assert_eq!(status.status, ActionStatus::Failed);
    assert_eq!(testctx.sim.calls().len(), calls);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(datasafe.pending_actions().await.is_empty());
    assert_eq!(testctx.sim.count(blade, HardwareOp::PowerOff), 1);
    assert_eq!(testctx.sim.count(blade, HardwareOp::BladeOff), 0);
    assert_eq!(testctx.sim.count(blade, HardwareOp::SetBackupTrigger), 1);
    assert_eq!(
        testctx.sim.power(blade),
        Some((PowerState::Off, PowerState::Off))
    );

    testctx.teardown();
}

#[tokio::test]
async fn power_on_is_immediate() {
    let testctx = setup::test_setup(4);
    let datasafe = &testctx.ctx().datasafe;
    let blade = BladeId(3);
    testctx.sim.set_power(blade, PowerState::Off, PowerState::Off);

    let outcome =
        datasafe.submit_action(blade, DatasafeAction::PowerOn).await.unwrap();
    assert_eq!(outcome.status, ActionStatus::Executed);
    assert_eq!(testctx.sim.count(blade, HardwareOp::SetBackupTrigger), 0);
    assert_eq!(testctx.sim.power(blade).unwrap().0, PowerState::On);

    testctx.teardown();
}

#[tokio::test]
async fn datasafe_query_takes_console() {
    let testctx = setup::test_setup(4);
    let ctx = testctx.ctx();

    let token =
        ctx.serial_sessions.start_session(BladeId(1), None).await.unwrap();
    ctx.datasafe.query_status(BladeId(3)).await.unwrap();

    assert_eq!(ctx.serial_sessions.owner(), SessionOwner::Inactive);
    assert_eq!(testctx.sim.mux(), None);
    assert!(ctx
        .serial_sessions
        .send_data(BladeId(1), token, b"x")
        .await
        .is_err());

    testctx.teardown();
}

#[tokio::test]
async fn out_of_range_blade() {
    let testctx = setup::test_setup(4);
    let datasafe = &testctx.ctx().datasafe;

    assert_eq!(
        datasafe.submit_action(BladeId(5), DatasafeAction::PowerOff).await,
        Err(DatasafeError::InvalidBladeId { blade: BladeId(5), blade_count: 4 })
    );
    assert!(testctx.sim.calls().is_empty());

    testctx.teardown();
}
