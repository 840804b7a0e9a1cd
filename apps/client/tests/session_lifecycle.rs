//! Connection state machine: announcements, heartbeat, reconnects.

mod common;

use std::time::Duration;

use chatty_client::error::ClientError;
use chatty_client::session::SessionState;
use chatty_client::transport::{memory_pair, LINK_CAPACITY};
use chatty_shared::api::ws::{ClientAction, ClientFrame, ServerFrame};
use chatty_shared::ids::UserId;

use common::*;

async fn wait_for_state(handle: &chatty_client::session::SessionHandle, state: SessionState) {
    let mut changes = handle.state_changes();
    tokio::time::timeout(Duration::from_secs(60), changes.wait_for(|s| *s == state))
        .await
        .expect("state never reached")
        .expect("session ended");
}

#[tokio::test(start_paused = true)]
async fn connect_announces_identity_then_pings() {
    let identity = alice();
    let (link, mut peer) = memory_pair(LINK_CAPACITY);
    let session = start_session(identity.clone(), &[], ScriptedConnector::new(vec![link])).await;

    assert_eq!(
        next_frame(&mut peer).await,
        ClientFrame::Auth {
            uid: identity.user_id()
        }
    );
    assert_eq!(
        next_frame(&mut peer).await,
        ClientFrame::Action(ClientAction::UpdatePub {
            key: identity.encrypt_public_key().to_base64().unwrap()
        })
    );
    assert_eq!(
        next_frame(&mut peer).await,
        ClientFrame::Action(ClientAction::UpdateSign {
            key: identity.sign_public_key().to_base64()
        })
    );
    assert_eq!(
        next_frame(&mut peer).await,
        ClientFrame::Action(ClientAction::Ping)
    );
    assert_eq!(session.handle.state(), SessionState::Connected);

    // Heartbeat keeps going every interval.
    assert_eq!(
        next_frame(&mut peer).await,
        ClientFrame::Action(ClientAction::Ping)
    );
}

#[tokio::test(start_paused = true)]
async fn pong_updates_latency() {
    let (session, peer) = connected_session(alice(), &[]).await;
    assert!(session.handle.latency().is_none());

    let mut latency = session.handle.latency_changes();
    tokio::time::advance(Duration::from_millis(40)).await;
    deliver(&peer, &ServerFrame::Pong).await;
    latency.changed().await.unwrap();

    let measured = session.handle.latency().unwrap();
    assert!(measured >= Duration::from_millis(40));
    assert!(measured < Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn close_disconnects_and_reconnects_once() {
    let (first, mut first_peer) = memory_pair(LINK_CAPACITY);
    let (second, mut second_peer) = memory_pair(LINK_CAPACITY);
    let connector = ScriptedConnector::new(vec![first, second]);
    let session = start_session(alice(), &[], connector.clone()).await;

    wait_for_state(&session.handle, SessionState::Connected).await;
    first_peer.close().await;
    wait_for_state(&session.handle, SessionState::Disconnected).await;
    assert_eq!(connector.attempts(), 1);

    // The old link is released: its heartbeat stops and the channel closes.
    while first_peer.recv_frame().await.is_some() {}

    wait_for_state(&session.handle, SessionState::Connected).await;
    assert_eq!(connector.attempts(), 2);
    assert!(matches!(
        next_frame(&mut second_peer).await,
        ClientFrame::Auth { .. }
    ));

    // Staying connected means no further attempts.
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(connector.attempts(), 2);
    assert_eq!(session.handle.state(), SessionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn reconnect_waits_for_delay() {
    let (first, first_peer) = memory_pair(LINK_CAPACITY);
    let (second, _second_peer) = memory_pair(LINK_CAPACITY);
    let connector = ScriptedConnector::new(vec![first, second]);
    let session = start_session(alice(), &[], connector.clone()).await;

    wait_for_state(&session.handle, SessionState::Connected).await;
    first_peer.close().await;
    wait_for_state(&session.handle, SessionState::Disconnected).await;

    let closed_at = tokio::time::Instant::now();
    wait_for_state(&session.handle, SessionState::Connected).await;
    assert!(closed_at.elapsed() >= Duration::from_secs(5));
}

#[tokio::test(start_paused = true)]
async fn link_failure_is_error_state() {
    let (link, peer) = memory_pair(LINK_CAPACITY);
    let session = start_session(alice(), &[], ScriptedConnector::new(vec![link])).await;

    wait_for_state(&session.handle, SessionState::Connected).await;
    peer.fail("connection reset").await;
    wait_for_state(&session.handle, SessionState::Error).await;
}

#[tokio::test(start_paused = true)]
async fn failed_connect_is_error_state_and_retries() {
    let connector = ScriptedConnector::new(Vec::new());
    let session = start_session(alice(), &[], connector.clone()).await;

    wait_for_state(&session.handle, SessionState::Error).await;
    tokio::time::sleep(Duration::from_secs(11)).await;
    assert!(connector.attempts() >= 3);
}

#[tokio::test(start_paused = true)]
async fn send_while_offline_fails_without_storing() {
    let session = start_session(alice(), &[], ScriptedConnector::new(Vec::new())).await;
    wait_for_state(&session.handle, SessionState::Error).await;

    // Commands are still served while offline.
    let conversation = session
        .handle
        .add_conversation("Bob", UserId::new())
        .await
        .unwrap();
    let result = session.handle.send_message(conversation, "hello").await;
    assert!(matches!(result, Err(ClientError::NotConnected)));
    assert!(session.handle.messages(conversation).await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn outstanding_key_request_is_reissued_on_reconnect() {
    let (first, mut first_peer) = memory_pair(LINK_CAPACITY);
    let (second, mut second_peer) = memory_pair(LINK_CAPACITY);
    let session = start_session(alice(), &[], ScriptedConnector::new(vec![first, second])).await;
    let bob = bob();

    wait_for_state(&session.handle, SessionState::Connected).await;
    session
        .handle
        .add_conversation("Bob", bob.user_id())
        .await
        .unwrap();
    assert_eq!(
        next_action(&mut first_peer).await,
        ClientAction::UpdatePub {
            key: alice().encrypt_public_key().to_base64().unwrap()
        }
    );
    assert!(matches!(
        next_action(&mut first_peer).await,
        ClientAction::UpdateSign { .. }
    ));
    assert_eq!(
        next_action(&mut first_peer).await,
        ClientAction::GetSignPub {
            target: bob.user_id()
        }
    );

    first_peer.close().await;
    next_action(&mut second_peer).await; // updatePub
    next_action(&mut second_peer).await; // updateSign
    assert_eq!(
        next_action(&mut second_peer).await,
        ClientAction::GetSignPub {
            target: bob.user_id()
        }
    );
}

#[tokio::test(start_paused = true)]
async fn shutdown_stops_the_task() {
    let (session, _peer) = connected_session(alice(), &[]).await;
    session.handle.shutdown().await;
    tokio::time::timeout(Duration::from_secs(5), session.task)
        .await
        .expect("session did not stop")
        .unwrap();
    assert_eq!(session.handle.state(), SessionState::Disconnected);
    assert!(matches!(
        session.handle.conversations().await,
        Err(ClientError::SessionClosed)
    ));
}
