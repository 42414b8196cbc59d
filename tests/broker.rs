mod common;

use std::time::Duration;

use common::{loopback_config, MemoryBus, Recorded, Recorder};
use perch_rtc::{BrokerState, BusEvent, ConnectionBroker, DriveStatus, MediaConfiguration, Role};
use serde_json::json;

/// Delivers `event` through the bus and lets the broker handle it.
fn receive(broker: &mut ConnectionBroker<'_>, bus: &MemoryBus, event: BusEvent) {
    assert!(bus.deliver(event), "broker registered no handler");
    broker.process_bus_events();
}

#[test]
fn lower_id_offers_with_bound_local_tracks() {
    let recorder = Recorder::default();
    let bus = MemoryBus::new("alice", "bob");
    let mut broker = ConnectionBroker::with_config(&recorder, &bus, loopback_config());

    assert!(broker.connect(&MediaConfiguration::default()));
    assert_eq!(broker.state(), BrokerState::Connecting);
    assert_eq!(broker.role(), Some(Role::Offerer));
    assert!(broker.local_addr().is_some());

    let local = broker.local_stream().expect("local stream");
    assert_eq!(local.tracks().len(), 2);
    assert!(local.tracks().iter().all(|t| t.mid().is_some()));

    assert_eq!(bus.sent(), vec!["offer"]);
    assert!(bus.outbox.lock()[0].2.is_object());
    assert_eq!(bus.outbox.lock()[0].0, "bob");

    assert_eq!(
        recorder.events(),
        vec![Recorded::LocalStream(local.id().to_string())]
    );
}

#[test]
fn higher_id_announces_ready() {
    let recorder = Recorder::default();
    let bus = MemoryBus::new("bob", "alice");
    let mut broker = ConnectionBroker::with_config(&recorder, &bus, loopback_config());

    assert!(broker.connect(&MediaConfiguration::audio_only()));
    assert_eq!(broker.role(), Some(Role::Answerer));
    assert_eq!(bus.sent(), vec!["ready"]);

    // Nothing negotiated yet on the answering side.
    let local = broker.local_stream().unwrap();
    assert_eq!(local.tracks().len(), 1);
    assert!(local.tracks()[0].mid().is_none());
}

#[test]
fn second_connect_is_refused_silently() {
    let recorder = Recorder::default();
    let bus = MemoryBus::new("alice", "bob");
    let mut broker = ConnectionBroker::with_config(&recorder, &bus, loopback_config());

    assert!(broker.connect(&MediaConfiguration::default()));
    assert!(!broker.connect(&MediaConfiguration::default()));
    assert_eq!(broker.state(), BrokerState::Connecting);
    assert!(recorder.failures().is_empty());
}

#[test]
fn invalid_media_fails_through_delegate() {
    let recorder = Recorder::default();
    let bus = MemoryBus::new("alice", "bob");
    let mut broker = ConnectionBroker::with_config(&recorder, &bus, loopback_config());

    let media = MediaConfiguration {
        audio: false,
        video: false,
    };
    assert!(!broker.connect(&media));
    assert_eq!(broker.state(), BrokerState::Failed);
    assert_eq!(broker.drive(Duration::from_millis(1)), DriveStatus::Finished);
    assert_eq!(recorder.failures().len(), 1);
    assert!(bus.sent().is_empty());
}

#[test]
fn calling_yourself_is_rejected() {
    let recorder = Recorder::default();
    let bus = MemoryBus::new("alice", "alice");
    let mut broker = ConnectionBroker::with_config(&recorder, &bus, loopback_config());

    assert!(!broker.connect(&MediaConfiguration::default()));
    assert!(recorder.failures()[0].contains("peer id"));
}

#[test]
fn refused_offer_fails_and_releases_socket() {
    let recorder = Recorder::default();
    let mut bus = MemoryBus::new("alice", "bob");
    bus.refuse = true;
    let mut broker = ConnectionBroker::with_config(&recorder, &bus, loopback_config());

    assert!(!broker.connect(&MediaConfiguration::default()));
    assert_eq!(broker.state(), BrokerState::Failed);
    assert!(broker.local_addr().is_none());
    assert!(broker.local_stream().is_none());

    let events = recorder.events();
    assert!(matches!(events[0], Recorded::LocalStream(_)));
    assert!(matches!(events[1], Recorded::Fail(_)));
}

#[test]
fn failed_broker_can_connect_again() {
    let recorder = Recorder::default();
    let bus = MemoryBus::new("alice", "bob");
    let mut broker = ConnectionBroker::with_config(&recorder, &bus, loopback_config());

    let nothing = MediaConfiguration {
        audio: false,
        video: false,
    };
    assert!(!broker.connect(&nothing));
    assert!(broker.connect(&MediaConfiguration::default()));
    assert_eq!(broker.state(), BrokerState::Connecting);
}

#[test]
fn events_for_other_sessions_are_ignored() {
    let recorder = Recorder::default();
    let bus = MemoryBus::new("alice", "bob");
    let mut broker = ConnectionBroker::with_config(&recorder, &bus, loopback_config());
    assert!(broker.connect(&MediaConfiguration::default()));

    let mut wrong_room = bus.from_peer("bye", json!({}));
    wrong_room.connection_id = "room-2".to_string();
    receive(&mut broker, &bus, wrong_room);

    let mut stranger = bus.from_peer("bye", json!({}));
    stranger.peer_id = "mallory".to_string();
    receive(&mut broker, &bus, stranger);

    receive(&mut broker, &bus, bus.from_peer("wave", json!({})));

    assert_eq!(broker.state(), BrokerState::Connecting);
    assert_eq!(recorder.events().len(), 1);
}

#[test]
fn ready_resends_the_outstanding_offer() {
    let recorder = Recorder::default();
    let bus = MemoryBus::new("alice", "bob");
    let mut broker = ConnectionBroker::with_config(&recorder, &bus, loopback_config());
    assert!(broker.connect(&MediaConfiguration::default()));

    receive(&mut broker, &bus, bus.from_peer("ready", json!({})));

    let outbox = bus.outbox.lock();
    assert_eq!(outbox.len(), 2);
    assert_eq!(outbox[0].1, "offer");
    assert_eq!(outbox[1].1, "offer");
    assert_eq!(outbox[0].2, outbox[1].2);
}

#[test]
fn malformed_answer_fails_the_broker() {
    let recorder = Recorder::default();
    let bus = MemoryBus::new("alice", "bob");
    let mut broker = ConnectionBroker::with_config(&recorder, &bus, loopback_config());
    assert!(broker.connect(&MediaConfiguration::default()));

    receive(&mut broker, &bus, bus.from_peer("answer", json!({ "nonsense": true })));

    assert_eq!(broker.state(), BrokerState::Failed);
    assert!(recorder.failures()[0].contains("answer"));
}

#[test]
fn bye_closes_and_finishes() {
    let recorder = Recorder::default();
    let bus = MemoryBus::new("alice", "bob");
    let mut broker = ConnectionBroker::with_config(&recorder, &bus, loopback_config());
    assert!(broker.connect(&MediaConfiguration::default()));

    receive(&mut broker, &bus, bus.from_peer("bye", json!({})));

    assert_eq!(broker.state(), BrokerState::Closed);
    assert_eq!(recorder.events().last(), Some(&Recorded::Finish));
    // A remote hang-up is not answered with our own bye.
    assert_eq!(bus.sent(), vec!["offer"]);
}

#[test]
fn queued_events_are_handled_when_driven() {
    let recorder = Recorder::default();
    let bus = MemoryBus::new("alice", "bob");
    let mut broker = ConnectionBroker::with_config(&recorder, &bus, loopback_config());

    // Nothing is registered before connect.
    assert!(!bus.deliver(bus.from_peer("bye", json!({}))));

    assert!(broker.connect(&MediaConfiguration::default()));
    assert!(bus.deliver(bus.from_peer("ready", json!({}))));
    assert!(bus.deliver(bus.from_peer("bye", json!({}))));
    assert_eq!(broker.state(), BrokerState::Connecting);

    assert_eq!(broker.drive(Duration::from_millis(1)), DriveStatus::Finished);
    assert_eq!(broker.state(), BrokerState::Closed);
    assert_eq!(bus.sent(), vec!["offer", "offer"]);

    // The handler outlives the connection, its events go nowhere.
    assert!(bus.deliver(bus.from_peer("ready", json!({}))));
    assert_eq!(broker.process_bus_events(), 0);
    assert_eq!(bus.sent(), vec!["offer", "offer"]);
}

#[test]
fn trickled_candidate_is_added() {
    let recorder = Recorder::default();
    let bus = MemoryBus::new("alice", "bob");
    let mut broker = ConnectionBroker::with_config(&recorder, &bus, loopback_config());
    assert!(broker.connect(&MediaConfiguration::default()));

    let line = "candidate:1 1 udp 2113929471 127.0.0.1 10100 typ host";
    receive(&mut broker, &bus, bus.from_peer("candidate", json!({ "candidate": line })));

    assert_eq!(broker.state(), BrokerState::Connecting);
    assert!(recorder.failures().is_empty());
}

#[test]
fn candidate_without_a_line_fails_the_broker() {
    let recorder = Recorder::default();
    let bus = MemoryBus::new("alice", "bob");
    let mut broker = ConnectionBroker::with_config(&recorder, &bus, loopback_config());
    assert!(broker.connect(&MediaConfiguration::default()));

    receive(&mut broker, &bus, bus.from_peer("candidate", json!({ "candidate": 5 })));

    assert_eq!(broker.state(), BrokerState::Failed);
    assert!(recorder.failures()[0].contains("malformed `candidate` payload"));
}

#[test]
fn unparsable_candidate_fails_the_broker() {
    let recorder = Recorder::default();
    let bus = MemoryBus::new("alice", "bob");
    let mut broker = ConnectionBroker::with_config(&recorder, &bus, loopback_config());
    assert!(broker.connect(&MediaConfiguration::default()));

    let data = json!({ "candidate": "candidate:nonsense" });
    receive(&mut broker, &bus, bus.from_peer("candidate", data));

    assert_eq!(broker.state(), BrokerState::Failed);
    assert!(recorder.failures()[0].contains("candidate"));
}

#[test]
fn offerer_keeps_its_offer_when_both_sides_offer() {
    let recorder = Recorder::default();
    let bus = MemoryBus::new("alice", "bob");
    let mut broker = ConnectionBroker::with_config(&recorder, &bus, loopback_config());
    assert!(broker.connect(&MediaConfiguration::default()));

    let offer = bus.outbox.lock()[0].2.clone();
    receive(&mut broker, &bus, bus.from_peer("offer", offer.clone()));

    assert_eq!(broker.state(), BrokerState::Connecting);
    assert_eq!(bus.sent(), vec!["offer"]);
    assert!(recorder.failures().is_empty());

    // Our offer is still outstanding.
    receive(&mut broker, &bus, bus.from_peer("ready", json!({})));
    assert_eq!(bus.outbox.lock()[1].2, offer);
}

#[test]
fn answerer_ignores_ready() {
    let recorder = Recorder::default();
    let bus = MemoryBus::new("bob", "alice");
    let mut broker = ConnectionBroker::with_config(&recorder, &bus, loopback_config());
    assert!(broker.connect(&MediaConfiguration::default()));

    receive(&mut broker, &bus, bus.from_peer("ready", json!({})));

    assert_eq!(broker.state(), BrokerState::Connecting);
    assert_eq!(bus.sent(), vec!["ready"]);
}

#[test]
fn answerer_fails_on_malformed_offer() {
    let recorder = Recorder::default();
    let bus = MemoryBus::new("bob", "alice");
    let mut broker = ConnectionBroker::with_config(&recorder, &bus, loopback_config());
    assert!(broker.connect(&MediaConfiguration::default()));

    receive(&mut broker, &bus, bus.from_peer("offer", json!("v=0")));

    assert_eq!(broker.state(), BrokerState::Failed);
    assert!(recorder.failures()[0].contains("malformed `offer` payload"));
}

#[test]
fn role_is_cleared_when_the_connection_ends() {
    let recorder = Recorder::default();
    let bus = MemoryBus::new("alice", "bob");
    let mut broker = ConnectionBroker::with_config(&recorder, &bus, loopback_config());

    assert!(broker.connect(&MediaConfiguration::default()));
    assert_eq!(broker.role(), Some(Role::Offerer));
    broker.disconnect();
    assert_eq!(broker.state(), BrokerState::Closed);
    assert_eq!(broker.role(), None);

    assert!(broker.connect(&MediaConfiguration::default()));
    receive(&mut broker, &bus, bus.from_peer("answer", json!(42)));
    assert_eq!(broker.state(), BrokerState::Failed);
    assert_eq!(broker.role(), None);
}

#[test]
fn disconnect_is_idempotent() {
    let recorder = Recorder::default();
    let bus = MemoryBus::new("alice", "bob");
    let mut broker = ConnectionBroker::with_config(&recorder, &bus, loopback_config());

    broker.disconnect();
    assert_eq!(broker.state(), BrokerState::Idle);

    assert!(broker.connect(&MediaConfiguration::default()));
    broker.disconnect();
    broker.disconnect();

    assert_eq!(broker.state(), BrokerState::Closed);
    assert_eq!(bus.sent(), vec!["offer", "bye"]);
    let finishes = recorder
        .events()
        .into_iter()
        .filter(|e| *e == Recorded::Finish)
        .count();
    assert_eq!(finishes, 1);
}

#[test]
fn idle_broker_does_not_drive() {
    let recorder = Recorder::default();
    let bus = MemoryBus::new("alice", "bob");
    let mut broker = ConnectionBroker::with_config(&recorder, &bus, loopback_config());
    assert_eq!(broker.drive(Duration::from_millis(1)), DriveStatus::Idle);
}

#[test]
fn connect_timeout_fails_the_broker() {
    let recorder = Recorder::default();
    let bus = MemoryBus::new("alice", "bob");
    let config = loopback_config().with_connect_timeout(Duration::from_millis(20));
    let mut broker = ConnectionBroker::with_config(&recorder, &bus, config);
    assert!(broker.connect(&MediaConfiguration::default()));

    std::thread::sleep(Duration::from_millis(40));
    assert_eq!(broker.drive(Duration::from_millis(1)), DriveStatus::Finished);
    assert_eq!(broker.state(), BrokerState::Failed);
    assert!(recorder.failures()[0].contains("not established"));
}
