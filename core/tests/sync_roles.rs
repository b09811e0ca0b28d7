//! End-to-end sync between coordinators over loopback TLS.

mod common;

use std::time::Duration;

use clipbird_core::protocol::constants::MAX_MESSAGE_SIZE;
use clipbird_core::{Error, HostType, SettingsStore, Snapshot, SyncEvent, TrustScope};
use common::{free_port, is_auth_request, join, Host};

#[tokio::test]
async fn test_first_contact_requires_approval_once() {
    let mut desk = Host::new("desk");
    let addr = desk.serve().await;

    desk.copy("hello");
    desk.wait_for(|e| matches!(e, SyncEvent::HistoryChanged(_))).await;
    assert_eq!(desk.handle.history().await.unwrap(), vec![Snapshot::text("hello")]);

    // The laptop already trusts the desk; the desk has never seen the laptop
    let mut laptop = Host::new("laptop");
    laptop.trust(TrustScope::Server, &desk);
    laptop.handle.set_current_host_as_client().await.unwrap();
    laptop.handle.connect_to_server(addr.clone()).await.unwrap();

    let seen = desk.wait_for(is_auth_request).await;
    let Some(SyncEvent::AuthRequest(request)) = seen.last().cloned() else {
        unreachable!()
    };
    assert_eq!(request.name, "laptop");
    assert!(desk.handle.connected_clients().await.unwrap().is_empty());

    desk.handle.approve(request.clone()).await.unwrap();
    desk.wait_for(|e| matches!(e, SyncEvent::ClientListChanged(list) if list.len() == 1))
        .await;
    assert_eq!(desk.handle.connected_clients().await.unwrap(), vec![request]);
    assert!(desk.store.has_pinned_cert(TrustScope::Client, "laptop"));

    // Reconnecting goes straight to authenticated
    laptop.handle.disconnect_from_server().await.unwrap();
    desk.wait_for(|e| matches!(e, SyncEvent::ClientStateChanged { connected: false, .. }))
        .await;
    laptop.handle.connect_to_server(addr).await.unwrap();
    let seen = desk
        .wait_for(|e| matches!(e, SyncEvent::ClientStateChanged { connected: true, .. }))
        .await;
    assert!(!seen.iter().any(is_auth_request), "unexpected auth request: {:?}", seen);

    laptop.stop().await;
    desk.stop().await;
}

#[tokio::test]
async fn test_reject_pins_nothing_and_retry_asks_again() {
    let mut desk = Host::new("desk");
    let addr = desk.serve().await;

    let mut laptop = Host::new("laptop");
    laptop.trust(TrustScope::Server, &desk);
    laptop.handle.set_current_host_as_client().await.unwrap();
    laptop.handle.connect_to_server(addr.clone()).await.unwrap();

    let seen = desk.wait_for(is_auth_request).await;
    let Some(SyncEvent::AuthRequest(request)) = seen.last().cloned() else {
        unreachable!()
    };
    desk.handle.reject(request.clone()).await.unwrap();
    assert!(!desk.store.has_pinned_cert(TrustScope::Client, "laptop"));
    assert!(matches!(
        desk.handle.approve(request).await,
        Err(Error::UnknownDevice(_))
    ));

    laptop
        .wait_for(|e| matches!(e, SyncEvent::ServerStatusChanged { connected: false, .. }))
        .await;
    laptop.handle.connect_to_server(addr).await.unwrap();
    desk.wait_for(is_auth_request).await;

    laptop.stop().await;
    desk.stop().await;
}

#[tokio::test]
async fn test_client_asks_before_trusting_unknown_server() {
    let mut desk = Host::new("desk");
    let addr = desk.serve().await;

    let mut laptop = Host::new("laptop");
    desk.trust(TrustScope::Client, &laptop);
    laptop.handle.set_current_host_as_client().await.unwrap();
    laptop.handle.connect_to_server(addr.clone()).await.unwrap();

    laptop.wait_for(is_auth_request).await;
    assert_eq!(laptop.handle.connected_server().await.unwrap(), None);

    laptop.handle.approve(addr.clone()).await.unwrap();
    laptop
        .wait_for(|e| matches!(e, SyncEvent::ServerStatusChanged { connected: true, .. }))
        .await;
    assert_eq!(laptop.handle.connected_server().await.unwrap(), Some(addr));
    assert_eq!(
        laptop.store.pinned_cert(TrustScope::Server, "desk").unwrap(),
        desk.cert
    );

    laptop.stop().await;
    desk.stop().await;
}

#[tokio::test]
async fn test_mismatched_certificate_is_refused() {
    let mut desk = Host::new("desk");
    let addr = desk.serve().await;

    let mut laptop = Host::new("laptop");
    laptop
        .store
        .pin_cert(TrustScope::Server, "desk", b"some other certificate")
        .unwrap();
    laptop.handle.set_current_host_as_client().await.unwrap();
    laptop.handle.connect_to_server(addr).await.unwrap();

    laptop
        .wait_for(|e| matches!(e, SyncEvent::ConnectionError(_)))
        .await;
    assert_eq!(laptop.handle.connected_server().await.unwrap(), None);
    assert_eq!(
        laptop.store.pinned_cert(TrustScope::Server, "desk").unwrap(),
        b"some other certificate"
    );

    laptop.stop().await;
    desk.stop().await;
}

#[tokio::test]
async fn test_server_snapshot_reaches_client_without_echo() {
    let mut desk = Host::new("desk");
    let addr = desk.serve().await;
    let mut laptop = Host::new("laptop");
    join(&mut desk, &mut laptop, &addr).await;

    desk.copy("world");
    laptop
        .wait_for(|e| matches!(e, SyncEvent::SyncReceived(s) if *s == Snapshot::text("world")))
        .await;

    assert_eq!(laptop.wait_for_writes(1).await, vec![Snapshot::text("world")]);
    assert_eq!(laptop.handle.history().await.unwrap(), vec![Snapshot::text("world")]);

    // The laptop's own clipboard write must not travel back
    let seen = desk.quiet_for(Duration::from_millis(300)).await;
    assert!(
        !seen.iter().any(|e| matches!(e, SyncEvent::SyncReceived(_))),
        "echo reached the server: {:?}",
        seen
    );
    assert_eq!(laptop.clipboard.writes().len(), 1);
    assert_eq!(desk.handle.history().await.unwrap(), vec![Snapshot::text("world")]);

    laptop.stop().await;
    desk.stop().await;
}

#[tokio::test]
async fn test_client_snapshot_fans_out_to_other_authenticated_clients() {
    let mut desk = Host::new("desk");
    let addr = desk.serve().await;

    let mut clients = Vec::new();
    for name in ["alpha", "beta", "gamma"] {
        let mut client = Host::new(name);
        join(&mut desk, &mut client, &addr).await;
        clients.push(client);
    }

    // Connected on its side, still pending on the server
    let mut pending = Host::new("delta");
    pending.trust(TrustScope::Server, &desk);
    pending.handle.set_current_host_as_client().await.unwrap();
    pending.handle.connect_to_server(addr).await.unwrap();
    desk.wait_for(is_auth_request).await;

    clients[0].copy("from alpha");
    desk.wait_for(|e| matches!(e, SyncEvent::SyncReceived(_))).await;
    for client in &clients[1..] {
        assert_eq!(client.wait_for_writes(1).await, vec![Snapshot::text("from alpha")]);
    }

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(clients[0].clipboard.writes().is_empty());
    assert!(pending.clipboard.writes().is_empty());
    for client in &clients[1..] {
        assert_eq!(client.clipboard.writes().len(), 1);
    }
    assert_eq!(desk.clipboard.writes(), vec![Snapshot::text("from alpha")]);

    for client in clients {
        client.stop().await;
    }
    pending.stop().await;
    desk.stop().await;
}

#[tokio::test]
async fn test_role_switch_releases_port_and_sessions() {
    let port = free_port();
    let mut desk = Host::with_port("desk", port);
    let addr = desk.serve().await;
    assert_eq!(addr.port, port);

    let mut laptop = Host::new("laptop");
    join(&mut desk, &mut laptop, &addr).await;

    desk.handle.set_current_host_as_client().await.unwrap();
    assert_eq!(desk.handle.host_type().await.unwrap(), HostType::Client);
    laptop
        .wait_for(|e| matches!(e, SyncEvent::ServerStatusChanged { connected: false, .. }))
        .await;

    desk.handle.set_current_host_as_server().await.unwrap();
    assert_eq!(desk.handle.host_type().await.unwrap(), HostType::Server);
    assert_eq!(desk.handle.server_info().await.unwrap().port, port);
    assert!(desk.handle.connected_clients().await.unwrap().is_empty());
    assert!(desk.handle.pending_clients().await.unwrap().is_empty());

    laptop.stop().await;
    desk.stop().await;
}

#[tokio::test]
async fn test_port_in_use_leaves_host_idle() {
    let blocker = std::net::TcpListener::bind("0.0.0.0:0").unwrap();
    let port = blocker.local_addr().unwrap().port();

    let mut desk = Host::with_port("desk", port);
    assert!(desk.handle.set_current_host_as_server().await.is_err());
    desk.wait_for(|e| matches!(e, SyncEvent::HostTypeChanged(HostType::Idle)))
        .await;
    assert_eq!(desk.handle.host_type().await.unwrap(), HostType::Idle);

    desk.stop().await;
}

#[tokio::test]
async fn test_history_delete_through_handle() {
    let mut desk = Host::new("desk");
    for text in ["one", "two", "three"] {
        desk.handle
            .handle_local_change(Snapshot::text(text))
            .await
            .unwrap();
    }

    assert_eq!(
        desk.handle.delete_history_at(1).await.unwrap(),
        Snapshot::text("two")
    );
    assert_eq!(
        desk.handle.history().await.unwrap(),
        vec![Snapshot::text("one"), Snapshot::text("three")]
    );
    assert!(matches!(
        desk.handle.delete_history_at(5).await,
        Err(Error::HistoryIndexOutOfRange { index: 5, len: 2 })
    ));
    let remaining = vec![Snapshot::text("one"), Snapshot::text("three")];
    desk.wait_for(|e| matches!(e, SyncEvent::HistoryChanged(h) if *h == remaining))
        .await;

    desk.stop().await;
}

#[tokio::test]
async fn test_back_to_back_snapshots_are_not_echoed() {
    let mut desk = Host::new("desk");
    let addr = desk.serve().await;
    let mut laptop = Host::new("laptop");
    join(&mut desk, &mut laptop, &addr).await;

    let (a, b) = (Snapshot::text("a"), Snapshot::text("b"));
    laptop.handle.handle_local_change(a.clone()).await.unwrap();
    laptop.handle.handle_local_change(b.clone()).await.unwrap();

    assert_eq!(desk.wait_for_writes(2).await, vec![a.clone(), b.clone()]);
    let seen = laptop.quiet_for(Duration::from_millis(300)).await;
    assert!(
        !seen.iter().any(|e| matches!(e, SyncEvent::SyncReceived(_))),
        "desk sent its own writes back: {:?}",
        seen
    );
    assert!(laptop.clipboard.writes().is_empty());
    assert_eq!(desk.handle.history().await.unwrap(), vec![a.clone(), b.clone()]);
    assert_eq!(laptop.handle.history().await.unwrap(), vec![a, b]);

    laptop.stop().await;
    desk.stop().await;
}

#[tokio::test]
async fn test_oversized_snapshot_keeps_every_session() {
    let mut desk = Host::new("desk");
    let addr = desk.serve().await;
    let mut alpha = Host::new("alpha");
    let mut beta = Host::new("beta");
    join(&mut desk, &mut alpha, &addr).await;
    join(&mut desk, &mut beta, &addr).await;

    let huge = Snapshot::text("x".repeat(MAX_MESSAGE_SIZE + 1));

    desk.handle.handle_local_change(huge.clone()).await.unwrap();
    desk.wait_for(|e| matches!(e, SyncEvent::ConnectionError(_))).await;
    assert_eq!(desk.handle.connected_clients().await.unwrap().len(), 2);

    alpha.handle.handle_local_change(huge).await.unwrap();
    alpha.wait_for(|e| matches!(e, SyncEvent::ConnectionError(_))).await;
    assert_eq!(alpha.handle.connected_server().await.unwrap(), Some(addr));

    // Both directions still carry ordinary snapshots
    alpha.copy("small");
    assert_eq!(beta.wait_for_writes(1).await, vec![Snapshot::text("small")]);
    assert_eq!(desk.handle.connected_clients().await.unwrap().len(), 2);

    alpha.stop().await;
    beta.stop().await;
    desk.stop().await;
}

#[tokio::test]
async fn test_server_closing_during_approval_is_noticed() {
    let mut desk = Host::new("desk");
    let addr = desk.serve().await;

    let mut laptop = Host::new("laptop");
    desk.trust(TrustScope::Client, &laptop);
    laptop.handle.set_current_host_as_client().await.unwrap();
    laptop.handle.connect_to_server(addr.clone()).await.unwrap();
    laptop.wait_for(is_auth_request).await;

    desk.wait_for(|e| matches!(e, SyncEvent::ClientStateChanged { connected: true, .. }))
        .await;
    let clients = desk.handle.connected_clients().await.unwrap();
    assert_eq!(clients.len(), 1);
    desk.handle.disconnect_client(clients[0].clone()).await.unwrap();

    laptop
        .wait_for(|e| matches!(e, SyncEvent::ConnectionError(_)))
        .await;
    assert!(matches!(
        laptop.handle.approve(addr).await,
        Err(Error::UnknownDevice(_))
    ));
    assert!(!laptop.store.has_pinned_cert(TrustScope::Server, "desk"));

    laptop.stop().await;
    desk.stop().await;
}
