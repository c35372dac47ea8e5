use std::time::Duration;

use starsearch_ipc::probe::{IPC_GET_MAJOR_VERSION, IPC_GET_TARGET_MACHINE, IPC_IS_DB_LOADED};
use starsearch_ipc::transport::loopback::LoopbackPeer;
use starsearch_ipc::{
    Capabilities, ClientConfig, Everything, EverythingMt, IpcError, TargetMachine,
};

const WAIT: Duration = Duration::from_secs(2);

fn fast_config() -> ClientConfig {
    ClientConfig {
        poll_interval: Duration::from_millis(2),
        ..ClientConfig::default()
    }
}

#[test]
fn test_both_clients_expose_capabilities() {
    let peer = LoopbackPeer::new();
    peer.set_dword(IPC_GET_MAJOR_VERSION, 0, 1);
    peer.set_dword(IPC_GET_TARGET_MACHINE, 0, 4);
    peer.set_dword(IPC_IS_DB_LOADED, 0, 1);

    let single = Everything::with_connector(peer.connector(), fast_config()).unwrap();
    let multi = EverythingMt::with_connector(peer.connector(), fast_config()).unwrap();

    assert_eq!(single.get_version().unwrap(), multi.get_version().unwrap());
    assert_eq!(
        multi.get_version().unwrap().target_machine,
        TargetMachine::Arm64
    );
    assert!(single.is_database_loaded().unwrap());
    assert!(multi.is_ipc_available().unwrap());
}

#[test]
fn test_database_loaded_future_polls_until_loaded() {
    let peer = LoopbackPeer::new();
    let everything = Everything::with_connector(peer.connector(), fast_config()).unwrap();

    let loaded = everything.database_loaded_future();
    assert!(!everything.is_database_loaded().unwrap());
    std::thread::sleep(Duration::from_millis(20));
    peer.set_dword(IPC_IS_DB_LOADED, 0, 1);

    assert_eq!(loaded.wait_timeout(WAIT), Some(true));
}

#[test]
fn test_database_loaded_future_waits_for_peer_to_start() {
    let peer = LoopbackPeer::absent();
    let everything = EverythingMt::with_connector(peer.connector(), fast_config()).unwrap();

    let loaded = everything.database_loaded_future();
    std::thread::sleep(Duration::from_millis(20));
    peer.set_dword(IPC_IS_DB_LOADED, 0, 1);
    peer.announce_ready();

    assert_eq!(loaded.wait_timeout(WAIT), Some(true));
}

#[test]
fn test_database_loaded_future_false_on_teardown() {
    let peer = LoopbackPeer::new();
    let everything = Everything::with_connector(peer.connector(), fast_config()).unwrap();

    let loaded = everything.database_loaded_future();
    drop(everything);
    assert_eq!(loaded.wait_timeout(WAIT), Some(false));
}

#[tokio::test]
async fn test_ipc_available_future_resolves_on_ready_broadcast() {
    let peer = LoopbackPeer::absent();
    let everything = EverythingMt::with_connector(peer.connector(), fast_config()).unwrap();

    assert!(!everything.is_ipc_available().unwrap());
    assert_eq!(everything.get_version(), Err(IpcError::PeerUnavailable));

    let available = everything.ipc_available_future();
    peer.announce_ready();
    assert!(tokio::time::timeout(WAIT, available).await.unwrap());
    assert!(everything.is_ipc_available().unwrap());
}

#[tokio::test]
async fn test_ipc_available_future_false_on_teardown() {
    let peer = LoopbackPeer::absent();
    let everything = Everything::with_connector(peer.connector(), fast_config()).unwrap();

    let available = everything.ipc_available_future();
    drop(everything);
    assert!(!available.await);
}
