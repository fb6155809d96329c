use std::rc::Rc;
use std::time::Duration;

use http_ingest::server::keepalive::{ConnectionId, KeepaliveManager};

#[test]
fn test_ticks_from_timeout() {
    assert_eq!(KeepaliveManager::from_timeout(Duration::from_secs(10)).timeout_ticks(), 10);
    assert_eq!(KeepaliveManager::from_timeout(Duration::from_millis(1500)).timeout_ticks(), 1);
    assert_eq!(KeepaliveManager::from_timeout(Duration::ZERO).timeout_ticks(), 0);
}

#[test]
fn test_connection_closed_only_after_exceeding_timeout() {
    let manager = KeepaliveManager::new(2);
    let id = ConnectionId::new(1);
    let slot = manager.add(id);

    assert!(manager.on_tick().is_empty());
    assert!(manager.on_tick().is_empty());
    assert_eq!(slot.idle_ticks(), 2);
    assert!(!slot.is_closed());

    assert_eq!(manager.on_tick(), vec![id]);
    assert!(slot.is_closed());
    assert!(!manager.contains(id));
    assert!(manager.is_empty());
}

#[test]
fn test_reset_idle_keeps_connection() {
    let manager = KeepaliveManager::new(1);
    let slot = manager.add(ConnectionId::new(7));

    for _ in 0..5 {
        assert!(manager.on_tick().is_empty());
        slot.reset_idle();
    }
    assert!(!slot.is_closed());
    assert_eq!(manager.len(), 1);
}

#[test]
fn test_only_idle_connections_reaped() {
    let manager = KeepaliveManager::new(1);
    let busy = manager.add(ConnectionId::new(1));
    let idle = manager.add(ConnectionId::new(2));

    manager.on_tick();
    busy.reset_idle();
    let closed = manager.on_tick();

    assert_eq!(closed, vec![ConnectionId::new(2)]);
    assert!(idle.is_closed());
    assert!(!busy.is_closed());
    assert!(manager.contains(ConnectionId::new(1)));
}

#[test]
fn test_registration_drop_unregisters() {
    let manager = Rc::new(KeepaliveManager::new(10));
    let registration = manager.register(ConnectionId::new(3));

    assert_eq!(registration.id(), ConnectionId::new(3));
    assert!(manager.contains(ConnectionId::new(3)));

    drop(registration);
    assert!(manager.is_empty());
}

#[test]
fn test_remove_unknown_connection() {
    let manager = KeepaliveManager::new(10);
    assert!(!manager.remove(ConnectionId::new(99)));
}

#[test]
fn test_connection_id_display() {
    assert_eq!(ConnectionId::new(42).to_string(), "conn-42");
    assert_eq!(ConnectionId::new(42).as_u64(), 42);
}

#[tokio::test]
async fn test_closed_resolves_after_reap() {
    let manager = KeepaliveManager::new(0);
    let slot = manager.add(ConnectionId::new(1));

    manager.on_tick();

    tokio::time::timeout(Duration::from_secs(1), slot.closed())
        .await
        .expect("slot should be closed");
}
