// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use super::setup;
use blade_sim::SimConfig;
use chassis_hardware::BladeId;
use chassis_manager::SerialRead;
use chassis_manager::SessionError;
use chassis_manager::SessionOwner;
use std::time::Duration;

#[tokio::test]
async fn console_round_trip() {
    let testctx = setup::test_setup(8);
    let sessions = &testctx.ctx().serial_sessions;
    let blade = BladeId(3);

    let token = sessions.start_session(blade, None).await.unwrap();
    assert_eq!(testctx.sim.mux(), Some(blade));
    assert_eq!(
        sessions.owner(),
        SessionOwner::Blade { blade_id: blade, token }
    );

    sessions.send_data(blade, token, b"root\r").await.unwrap();
    assert_eq!(testctx.sim.console_input(blade), b"root\r");

    testctx.sim.push_console_output(blade, b"Password: ");
    assert_eq!(
        sessions.receive_data(blade, token).await.unwrap(),
        SerialRead::Data(b"Password: ".to_vec())
    );
    assert_eq!(
        sessions.receive_data(blade, token).await.unwrap(),
        SerialRead::Timeout
    );

    sessions.stop_session(blade, token, false).await.unwrap();
    assert_eq!(testctx.sim.mux(), None);
    assert_eq!(sessions.owner(), SessionOwner::Inactive);

    testctx.teardown();
}

#[tokio::test]
async fn stale_token_rejected_after_restart() {
    let testctx = setup::test_setup(4);
    let sessions = &testctx.ctx().serial_sessions;
    let blade = BladeId(1);

    let old = sessions.start_session(blade, None).await.unwrap();
    sessions.stop_session(blade, old, false).await.unwrap();
    let new = sessions.start_session(blade, None).await.unwrap();
    assert_ne!(old, new);

    assert_eq!(
        sessions.send_data(blade, old, b"x").await,
        Err(SessionError::SerialSessionActive)
    );
    assert_eq!(
        sessions.stop_session(blade, old, false).await,
        Err(SessionError::SerialSessionActive)
    );
    assert!(testctx.sim.console_input(blade).is_empty());

    sessions.send_data(blade, new, b"x").await.unwrap();
    assert_eq!(testctx.sim.console_input(blade), b"x");

    testctx.teardown();
}

#[tokio::test]
async fn hazardous_command_blocked_by_session() {
    let testctx = setup::test_setup(4);
    let sessions = &testctx.ctx().serial_sessions;

    sessions.api_precheck().await.unwrap();

    let token = sessions.start_session(BladeId(2), None).await.unwrap();
    assert_eq!(
        sessions.api_precheck().await,
        Err(SessionError::SerialSessionInProgress)
    );
    assert!(sessions.is_active());

    sessions.stop_session(BladeId(2), token, false).await.unwrap();
    sessions.api_precheck().await.unwrap();

    testctx.teardown();
}

#[tokio::test]
async fn hazardous_command_kills_session_on_conflict() {
    let mut config = setup::test_config(SimConfig::servers(4));
    config.serial_session.kill_on_conflict = true;
    let testctx = setup::test_setup_with_config(config);
    let sessions = &testctx.ctx().serial_sessions;

    let token = sessions.start_session(BladeId(2), None).await.unwrap();
    sessions.api_precheck().await.unwrap();
    assert_eq!(sessions.owner(), SessionOwner::Inactive);
    assert_eq!(testctx.sim.mux(), None);
    assert_eq!(
        sessions.send_data(BladeId(2), token, b"x").await,
        Err(SessionError::NoActiveSerialSession)
    );

    testctx.teardown();
}

#[tokio::test(start_paused = true)]
async fn idle_session_reclaimed_by_monitor() {
    let testctx = setup::test_setup(4);
    let sessions = &testctx.ctx().serial_sessions;
    let blade = BladeId(4);

    let token = sessions
        .start_session(blade, Some(Duration::from_secs(30)))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(25)).await;
    sessions.send_data(blade, token, b"keepalive").await.unwrap();

    // Activity above pushed the deadline out to 55s.
    tokio::time::sleep(Duration::from_secs(25)).await;
    assert!(sessions.is_active());

    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(sessions.owner(), SessionOwner::Inactive);
    assert_eq!(testctx.sim.mux(), None);

    // The console is free for someone else.
    sessions.start_session(BladeId(1), None).await.unwrap();

    testctx.teardown();
}
