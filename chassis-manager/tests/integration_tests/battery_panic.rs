// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use super::setup;
use blade_sim::HardwareOp;
use blade_sim::SimConfig;
use chassis_hardware::BladeId;
use chassis_hardware::BladeType;
use chassis_manager::ActionStatus;
use chassis_manager::DatasafeAction;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn battery_panic_backs_up_powered_servers() {
    let mut sim = SimConfig::servers(6);
    sim.blades[1].powered_on = false;
    sim.blades[3].blade_type = BladeType::Storage;
    sim.blades[5].blade_type = BladeType::Empty;
    let testctx = setup::test_setup_with_config(setup::test_config(sim));
    let datasafe = &testctx.ctx().datasafe;

    let marked = datasafe.trigger_battery_panic().await;
    assert_eq!(marked, vec![BladeId(1), BladeId(3), BladeId(5)]);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(datasafe.pending_actions().await.is_empty());

    for blade in BladeId::all(6) {
        let expected = usize::from(marked.contains(&blade));
        assert_eq!(
            testctx.sim.count(blade, HardwareOp::SetBackupTrigger),
            expected,
            "blade {blade}"
        );
        // A panic only backs up memory; it never removes power itself.
        for op in [
            HardwareOp::PowerOff,
            HardwareOp::PowerCycle,
            HardwareOp::BladeOff,
        ] {
            assert_eq!(testctx.sim.count(blade, op), 0, "blade {blade}");
        }
    }

    testctx.teardown();
}

#[tokio::test(start_paused = true)]
async fn battery_panic_overrides_pending_action() {
    let testctx = setup::test_setup(2);
    let datasafe = &testctx.ctx().datasafe;
    let blade = BladeId(2);

    let outcome = datasafe
        .submit_action(blade, DatasafeAction::PowerCycle)
        .await
        .unwrap();
    assert_eq!(outcome.status, ActionStatus::Delayed);

    let marked = datasafe.trigger_battery_panic().await;
    assert_eq!(marked, vec![BladeId(1), blade]);
    assert_eq!(
        datasafe.pending_action(blade).await.unwrap(),
        DatasafeAction::BatteryLowCapacityPanic
    );

    // A repeated panic leaves already-marked blades alone.
    assert!(datasafe.trigger_battery_panic().await.is_empty());

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(datasafe.pending_actions().await.is_empty());
    assert_eq!(testctx.sim.count(blade, HardwareOp::PowerCycle), 0);
    assert_eq!(testctx.sim.count(blade, HardwareOp::SetBackupTrigger), 1);

    testctx.teardown();
}
