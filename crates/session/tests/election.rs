//! Host election across several devices sharing one store.

use proptest::prelude::*;
use scorepad_session::{
    DeviceId, MemoryConnection, MemoryStore, Role, SessionCode, SessionConfig, SessionCore,
    SessionEvent,
};

fn init_logging() {
    env_logger::builder()
        .filter_level(log::LevelFilter::Debug)
        .is_test(true)
        .try_init()
        .ok();
}

fn open_devices(store: &MemoryStore, count: usize) -> Vec<SessionCore<MemoryConnection>> {
    let code = SessionCode::parse("qwert").unwrap();
    (0..count)
        .map(|i| {
            SessionCore::open(
                store.connect().unwrap(),
                DeviceId::new(format!("device{i}")),
                code.clone(),
                SessionConfig::default(),
            )
            .unwrap()
        })
        .collect()
}

/// Pump every device enough times for claims and presence writes to settle.
fn settle(devices: &mut [SessionCore<MemoryConnection>]) {
    for _ in 0..20 {
        for device in devices.iter_mut() {
            device.pump();
        }
    }
}

fn online_hosts(devices: &[SessionCore<MemoryConnection>]) -> Vec<String> {
    devices
        .iter()
        .filter(|d| d.substrate().is_online() && d.role() == Role::Host)
        .map(|d| d.device().to_string())
        .collect()
}

#[test]
fn test_single_host_after_open() {
    init_logging();
    let store = MemoryStore::new();
    let mut devices = open_devices(&store, 3);
    settle(&mut devices);

    assert_eq!(online_hosts(&devices), vec!["device0"]);
    assert!(devices[1..].iter().all(|d| d.role() == Role::NotHost));
}

#[test]
fn test_host_handover_within_one_cycle() {
    init_logging();
    let store = MemoryStore::new();
    let mut devices = open_devices(&store, 3);
    settle(&mut devices);
    assert!(devices[0].is_host());

    devices[0].substrate().disconnect().unwrap();

    // One delivery to device1 plus its claim transaction.
    let events = devices[1].pump();
    assert!(events.contains(&SessionEvent::RoleChanged {
        from: Role::NotHost,
        to: Role::Host,
    }));
    assert!(devices[1].is_host());

    devices[2].pump();
    assert_eq!(devices[2].role(), Role::NotHost);
    assert_eq!(online_hosts(&devices), vec!["device1"]);
}

#[test]
fn test_returning_host_defers_to_successor() {
    init_logging();
    let store = MemoryStore::new();
    let mut devices = open_devices(&store, 2);
    settle(&mut devices);

    devices[0].substrate().disconnect().unwrap();
    settle(&mut devices);
    assert!(devices[1].is_host());

    devices[0].substrate().reconnect().unwrap();
    settle(&mut devices);
    assert_eq!(devices[0].role(), Role::NotHost);
    assert_eq!(online_hosts(&devices), vec!["device1"]);
}

#[test]
fn test_dropped_connection_counts_as_disconnect() {
    init_logging();
    let store = MemoryStore::new();
    let mut devices = open_devices(&store, 2);
    settle(&mut devices);

    let host = devices.remove(0);
    drop(host);
    settle(&mut devices);
    assert!(devices[0].is_host());
}

#[derive(Debug, Clone)]
enum Step {
    Disconnect(usize),
    Reconnect(usize),
    Pump(usize),
}

fn step_strategy(devices: usize) -> impl Strategy<Value = Step> {
    prop_oneof![
        (0..devices).prop_map(Step::Disconnect),
        (0..devices).prop_map(Step::Reconnect),
        (0..devices).prop_map(Step::Pump),
    ]
}

proptest! {
    /// Whatever the presence history, online devices agree on one host
    /// once every pending claim has settled.
    #[test]
    fn prop_single_host_after_settling(
        steps in prop::collection::vec(step_strategy(4), 1..40)
    ) {
        let store = MemoryStore::new();
        let mut devices = open_devices(&store, 4);
        settle(&mut devices);

        for step in steps {
            match step {
                Step::Disconnect(i) => devices[i].substrate().disconnect().unwrap(),
                Step::Reconnect(i) => devices[i].substrate().reconnect().unwrap(),
                Step::Pump(i) => {
                    devices[i].pump();
                }
            }
        }
        settle(&mut devices);

        let hosts = online_hosts(&devices);
        let any_online = devices.iter().any(|d| d.substrate().is_online());
        prop_assert!(hosts.len() <= 1, "several hosts: {:?}", hosts);
        if any_online {
            prop_assert_eq!(hosts.len(), 1);
        }
    }
}
