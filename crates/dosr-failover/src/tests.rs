//! Scenario tests for dosr-failover.
//!
//! These drive a full engine over [`MemoryTransport`] with a synthetic
//! clock, exercising the heartbeat monitor, coordinator, backup store and
//! dispatcher together.

use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use dosr_types::{PeerAddr, PeerId, Timestamp, Topology};
use dosr_wire::{Frame, Message, Tag};
use test_case::test_case;

use crate::{
    ConnId, DeathOutcome, Engine, EngineConfig, FailoverError, MemoryTransport, MergeOutcome,
    NoticeOutcome, Role, Service,
};

// ============================================================================
// Helper Functions
// ============================================================================

const TIMEOUT: Duration = Duration::from_secs(5);
const BACKUP_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Default)]
struct RecordingService {
    serialized: usize,
    consumed: Vec<(PeerId, Bytes)>,
    takeovers: Vec<(PeerId, Option<Bytes>)>,
}

impl Service for RecordingService {
    fn serialize(&mut self) -> Bytes {
        self.serialized += 1;
        Bytes::from_static(b"state")
    }

    fn consume(&mut self, data: Bytes, from: PeerId) {
        self.consumed.push((from, data));
    }

    fn take_over(&mut self, peer: PeerId, backup: Option<Bytes>) {
        self.takeovers.push((peer, backup));
    }
}

type TestEngine = Engine<MemoryTransport, RecordingService>;

fn node(n: u8) -> PeerAddr {
    PeerAddr::new(format!("10.0.0.{n}"), 9000)
}

fn local() -> PeerAddr {
    node(1)
}

fn secs(n: u64) -> Duration {
    Duration::from_secs(n)
}

fn config() -> EngineConfig {
    EngineConfig::new(local())
        .with_failover_timeout(TIMEOUT)
        .with_force_backup_interval(BACKUP_INTERVAL)
}

fn engine_with_transport(
    config: EngineConfig,
    topology: Topology,
    transport: MemoryTransport,
) -> TestEngine {
    Engine::builder(config)
        .topology(topology)
        .transport(transport)
        .service(RecordingService::default())
        .build()
        .unwrap()
}

fn engine(config: EngineConfig, topology: Topology) -> TestEngine {
    engine_with_transport(config, topology, MemoryTransport::new())
}

fn frame(message: &Message) -> Frame {
    message.to_frame().unwrap()
}

fn app_frame(payload: &'static str) -> Frame {
    Frame::new(Tag::new(*b"data:"), payload).unwrap()
}

/// Simulates `addr` dialing this node: accept from an ephemeral port, then
/// the peer's identity announcement.
fn connect_from(engine: &mut TestEngine, addr: &PeerAddr, now: Instant) -> ConnId {
    let remote = PeerAddr::new(addr.host(), 45000);
    let conn = engine.transport_mut().accept(remote.clone());
    engine.on_accept(conn, &remote, now);
    engine.on_frame(conn, frame(&Message::Hello { addr: addr.clone() }), now);
    conn
}

fn id_of(engine: &TestEngine, addr: &PeerAddr) -> PeerId {
    engine.identity().find(addr).unwrap()
}

/// Remote address of every `fail` notice written, in send order.
fn notice_recipients(engine: &TestEngine) -> Vec<PeerAddr> {
    engine
        .transport()
        .sent()
        .iter()
        .filter_map(|(conn, bytes)| {
            let mut buf = BytesMut::from(&bytes[..]);
            let frame = Frame::decode(&mut buf).ok().flatten()?;
            match Message::from_frame(frame).ok()? {
                Message::Fail { .. } => engine.transport().remote(*conn).cloned(),
                _ => None,
            }
        })
        .collect()
}

// ============================================================================
// Heartbeat Timing Tests
// ============================================================================

#[test]
fn standby_takes_over_after_two_silent_windows() {
    let t0 = Instant::now();
    let b = node(2);
    let c = node(3);
    let mut engine = engine(
        config(),
        Topology {
            fail_rec: vec![b.clone()],
            dependents: vec![c.clone()],
            ..Topology::default()
        },
    );
    engine.start(t0);
    let conn_b = connect_from(&mut engine, &b, t0);
    let conn_c = connect_from(&mut engine, &c, t0);
    let b_id = id_of(&engine, &b);

    engine.on_frame(
        conn_b,
        frame(&Message::backup(Timestamp::from_nanos(7), &b"b-state"[..])),
        t0,
    );

    // C keeps talking; B goes quiet at t0.
    engine.on_frame(conn_c, app_frame("ping"), t0 + secs(4));
    let report = engine.heartbeat_cycle(t0 + TIMEOUT);
    assert_eq!(report.probed, vec![b_id]);
    assert!(report.declared_dead.is_empty());
    assert_eq!(engine.transport().messages_on(conn_b), vec![Message::probe(local())]);

    engine.on_frame(conn_c, app_frame("ping"), t0 + secs(8));
    let report = engine.heartbeat_cycle(t0 + TIMEOUT * 2);
    assert_eq!(report.declared_dead, vec![b_id]);
    assert!(!report.self_failed);

    assert_eq!(
        engine.transport().messages_on(conn_c),
        vec![Message::fail(b.clone(), local())]
    );
    assert_eq!(
        engine.service().takeovers,
        vec![(b_id, Some(Bytes::from_static(b"b-state")))]
    );
    assert!(!engine.transport().is_open(conn_b));
    assert!(engine.dead().get(b_id).unwrap().was_failover_target);
    assert!(!engine.roles(Role::FailRec).contains(b_id));
    assert_eq!(engine.service().consumed.len(), 2);
}

#[test]
fn timeout_bound_is_exactly_two_windows() {
    let t0 = Instant::now();
    let b = node(2);
    let mut engine = engine(
        config().with_self_failure_detection(false),
        Topology::default(),
    );
    engine.start(t0);
    connect_from(&mut engine, &b, t0);
    let b_id = id_of(&engine, &b);

    assert!(engine.sweep(t0 + TIMEOUT - Duration::from_millis(1)).is_empty());
    assert!(engine.is_peer_alive(&b));

    assert_eq!(engine.sweep(t0 + TIMEOUT), vec![b_id]);
    assert!(engine.pending().contains(b_id));
    assert!(!engine.is_peer_alive(&b));

    assert!(
        engine
            .reconcile(t0 + TIMEOUT * 2 - Duration::from_millis(1))
            .is_empty()
    );
    assert_eq!(engine.reconcile(t0 + TIMEOUT * 2), vec![b_id]);
    assert!(engine.dead().contains_peer(b_id));
    assert!(engine.connections().is_empty());
    assert!(engine.pending().is_empty());
}

#[test]
fn silent_peer_is_probed_once() {
    let t0 = Instant::now();
    let b = node(2);
    let mut engine = engine(config(), Topology::default());
    engine.start(t0);
    let conn = connect_from(&mut engine, &b, t0);

    engine.sweep(t0 + TIMEOUT);
    assert!(engine.sweep(t0 + TIMEOUT + secs(1)).is_empty());
    assert_eq!(engine.transport().messages_on(conn).len(), 1);
}

#[test]
fn reply_before_second_window_restores_peer() {
    let t0 = Instant::now();
    let b = node(2);
    let mut engine = engine(config(), Topology::default());
    engine.start(t0);
    let conn = connect_from(&mut engine, &b, t0);
    let b_id = id_of(&engine, &b);

    engine.heartbeat_cycle(t0 + TIMEOUT);
    assert!(engine.pending().contains(b_id));

    engine.on_frame(conn, frame(&Message::reply(local(), true)), t0 + TIMEOUT + secs(1));
    assert!(engine.pending().is_empty());
    assert!(engine.is_peer_alive(&b));

    let report = engine.heartbeat_cycle(t0 + TIMEOUT * 2);
    assert!(report.probed.is_empty());
    assert!(report.declared_dead.is_empty());
    assert!(!engine.dead().contains_peer(b_id));
}

#[test]
fn negative_reply_declares_dead_at_next_reconcile() {
    let t0 = Instant::now();
    let b = node(2);
    let mut engine = engine(config(), Topology::default());
    engine.start(t0);
    let conn = connect_from(&mut engine, &b, t0);
    let b_id = id_of(&engine, &b);

    engine.sweep(t0 + TIMEOUT);
    engine.on_frame(conn, frame(&Message::reply(local(), false)), t0 + TIMEOUT + secs(1));
    assert!(engine.pending().contains(b_id));

    assert_eq!(engine.reconcile(t0 + TIMEOUT + secs(1)), vec![b_id]);
    assert!(!engine.dead().get(b_id).unwrap().was_failover_target);
}

// ============================================================================
// Self-Failure Tests
// ============================================================================

#[test]
fn global_silence_fails_this_node_over() {
    let t0 = Instant::now();
    let f = node(4);
    let (c1, c2) = (node(5), node(6));
    let mut engine = engine(
        config(),
        Topology {
            fail_to: vec![f.clone()],
            dependents: vec![c1.clone(), c2.clone()],
            ..Topology::default()
        },
    );
    assert_eq!(engine.start(t0), 1);

    // Silence of exactly one window is tolerated.
    let report = engine.heartbeat_cycle(t0 + TIMEOUT);
    assert!(!report.self_failed);
    assert!(engine.still_alive());

    let report = engine.heartbeat_cycle(t0 + TIMEOUT + Duration::from_millis(1));
    assert!(report.self_failed);
    assert!(!engine.still_alive());
    assert!(!engine.status().alive);

    let notice = Message::fail(local(), f.clone());
    assert_eq!(
        engine.transport().messages_to(&f),
        vec![Message::probe(local()), notice.clone()]
    );
    assert_eq!(engine.transport().messages_to(&c1), vec![notice.clone()]);
    assert_eq!(engine.transport().messages_to(&c2), vec![notice]);

    assert!(!engine.self_fail(t0 + TIMEOUT * 2));
}

#[test]
fn isolated_node_still_fails_itself_over() {
    let t0 = Instant::now();
    let b = node(2);
    let mut engine = engine(config(), Topology::default());
    engine.start(t0);
    let conn = connect_from(&mut engine, &b, t0);

    assert_eq!(engine.on_disconnect(conn, t0), Some(DeathOutcome::Removed));
    assert!(engine.connections().is_empty());

    assert!(!engine.heartbeat_cycle(t0 + TIMEOUT).self_failed);
    let report = engine.heartbeat_cycle(t0 + TIMEOUT + Duration::from_millis(1));
    assert!(report.self_failed);
    assert!(!engine.still_alive());
}

#[test]
fn failed_node_does_not_answer_probes() {
    let t0 = Instant::now();
    let mut engine = engine(config(), Topology::default());
    engine.start(t0);
    assert!(engine.self_fail(t0));

    let remote = PeerAddr::new("10.0.0.9", 45000);
    let conn = engine.transport_mut().accept(remote.clone());
    engine.on_accept(conn, &remote, t0);
    engine.on_frame(conn, frame(&Message::probe(node(9))), t0);

    assert!(engine.transport().messages_on(conn).is_empty());
}

#[test]
fn self_failure_without_target_still_marks_node_failed() {
    let mut engine = engine(config(), Topology::default());
    assert!(engine.self_fail(Instant::now()));
    assert!(!engine.still_alive());
    assert!(engine.transport().sent().is_empty());
}

// ============================================================================
// Coordinator Tests
// ============================================================================

#[test_case(0; "no dependents")]
#[test_case(1; "one dependent")]
#[test_case(3; "three dependents")]
#[test_case(7; "seven dependents")]
fn cascade_reaches_every_dependent(n: u8) {
    let t0 = Instant::now();
    let b = node(2);
    // Descending addresses, so insertion order differs from sorted order.
    let dependents: Vec<PeerAddr> = (0..n).rev().map(|i| node(10 + i)).collect();
    let mut engine = engine(
        config(),
        Topology {
            fail_rec: vec![b.clone()],
            dependents: dependents.clone(),
            ..Topology::default()
        },
    );
    let b_id = id_of(&engine, &b);

    assert_eq!(engine.handle_peer_death(b_id, t0), DeathOutcome::TookOver);

    let notices: Vec<Message> = dependents
        .iter()
        .flat_map(|d| engine.transport().messages_to(d))
        .collect();
    assert_eq!(notices.len(), usize::from(n));
    assert!(notices.iter().all(|m| *m == Message::fail(b.clone(), local())));
    assert_eq!(notice_recipients(&engine), dependents);
    assert_eq!(engine.service().takeovers, vec![(b_id, None)]);
}

#[test]
fn peer_death_is_handled_once() {
    let t0 = Instant::now();
    let b = node(2);
    let c = node(3);
    let mut engine = engine(
        config(),
        Topology {
            fail_rec: vec![b.clone()],
            dependents: vec![c.clone()],
            ..Topology::default()
        },
    );
    let b_id = id_of(&engine, &b);

    assert_eq!(engine.handle_peer_death(b_id, t0), DeathOutcome::TookOver);
    assert_eq!(engine.handle_peer_death(b_id, t0 + secs(1)), DeathOutcome::AlreadyDead);
    assert_eq!(
        engine.receive_failure_notice(&b, &node(7), t0 + secs(2)),
        NoticeOutcome::Stale
    );

    assert_eq!(engine.service().takeovers.len(), 1);
    assert_eq!(engine.transport().messages_to(&c).len(), 1);
    assert_eq!(engine.dead().len(), 1);
}

#[test]
fn dead_peer_leaves_every_role_set() {
    let t0 = Instant::now();
    let b = node(2);
    let mut engine = engine(
        config(),
        Topology {
            fail_to: vec![b.clone()],
            dependents: vec![b.clone()],
            ..Topology::default()
        },
    );
    let b_id = id_of(&engine, &b);

    assert_eq!(engine.handle_peer_death(b_id, t0), DeathOutcome::Removed);
    assert!(engine.roles(Role::FailTo).is_empty());
    assert!(engine.roles(Role::Dependents).is_empty());
    assert!(engine.service().takeovers.is_empty());
}

#[test]
fn notice_naming_this_node_triggers_self_failure() {
    let mut engine = engine(config(), Topology::default());
    assert_eq!(
        engine.receive_failure_notice(&local(), &node(5), Instant::now()),
        NoticeOutcome::SelfFailed
    );
    assert!(!engine.still_alive());
}

#[test]
fn notice_for_standby_peer_takes_over() {
    let t0 = Instant::now();
    let b = node(2);
    let c = node(3);
    let mut engine = engine(
        config(),
        Topology {
            fail_rec: vec![b.clone()],
            dependents: vec![c.clone()],
            ..Topology::default()
        },
    );
    let b_id = id_of(&engine, &b);
    engine.receive_backup(b_id, Timestamp::from_nanos(3), Bytes::from_static(b"snap"));

    assert_eq!(
        engine.receive_failure_notice(&b, &node(8), t0),
        NoticeOutcome::TookOver
    );
    assert_eq!(
        engine.transport().messages_to(&c),
        vec![Message::fail(b, local())]
    );
    assert_eq!(
        engine.service().takeovers,
        vec![(b_id, Some(Bytes::from_static(b"snap")))]
    );
}

#[test]
fn notice_for_other_peer_redirects_its_traffic() {
    let t0 = Instant::now();
    let b = node(2);
    let d = node(4);
    let mut engine = engine(
        config(),
        Topology {
            fail_to: vec![b.clone()],
            ..Topology::default()
        },
    );
    engine.start(t0);
    let b_id = id_of(&engine, &b);
    let conn_b = engine.connections().get(b_id).unwrap().primary().unwrap();
    engine.on_frame(
        conn_b,
        frame(&Message::backup(Timestamp::from_nanos(5), &b"b-state"[..])),
        t0,
    );

    assert_eq!(
        engine.receive_failure_notice(&b, &d, t0 + secs(1)),
        NoticeOutcome::Redirected
    );
    let d_id = id_of(&engine, &d);

    assert!(!engine.transport().is_open(conn_b));
    assert_eq!(engine.roles(Role::FailTo).peers(), vec![d_id]);
    assert_eq!(engine.identity().route(b_id), d_id);
    assert_eq!(&engine.backups().latest(d_id).unwrap().payload[..], b"b-state");
    assert!(!engine.dead().get(b_id).unwrap().was_failover_target);

    let data = Message::Application(app_frame("for-b"));
    engine.send_to_peer(b_id, &data, t0 + secs(2)).unwrap();
    assert_eq!(engine.transport().messages_to(&d), vec![data]);

    assert_eq!(
        engine.receive_failure_notice(&b, &d, t0 + secs(3)),
        NoticeOutcome::Stale
    );
}

// ============================================================================
// Transport Failure Tests
// ============================================================================

#[test]
fn write_error_declares_peer_dead() {
    let t0 = Instant::now();
    let c = node(3);
    let mut engine = engine(config(), Topology::default());
    let conn = connect_from(&mut engine, &c, t0);
    let c_id = id_of(&engine, &c);
    engine.transport_mut().break_connection(conn);

    let err = engine.send_to_peer(c_id, &Message::Kill, t0).unwrap_err();
    assert!(matches!(err, FailoverError::Send { peer, .. } if peer == c_id));
    assert!(engine.dead().contains_peer(c_id));
    assert!(engine.connections().get(c_id).is_none());
}

#[test]
fn connect_failure_is_not_death() {
    let t0 = Instant::now();
    let f = node(4);
    let mut transport = MemoryTransport::new();
    transport.set_unreachable(f.clone());
    let mut engine = engine_with_transport(
        config(),
        Topology {
            fail_to: vec![f.clone()],
            ..Topology::default()
        },
        transport,
    );

    assert_eq!(engine.start(t0), 0);
    let f_id = id_of(&engine, &f);
    assert!(matches!(
        engine.send_to_peer(f_id, &Message::Kill, t0),
        Err(FailoverError::Connect { .. })
    ));
    assert!(engine.roles(Role::FailTo).contains(f_id));
    assert!(engine.dead().is_empty());
}

#[test]
fn dial_that_never_completes_is_not_death() {
    let t0 = Instant::now();
    let f = node(4);
    let mut engine = engine(
        config(),
        Topology {
            fail_to: vec![f.clone()],
            ..Topology::default()
        },
    );
    assert_eq!(engine.start(t0), 1);
    let f_id = id_of(&engine, &f);
    let conn = engine.connections().get(f_id).unwrap().primary().unwrap();
    assert!(engine.roles(Role::FailTo).get(f_id).unwrap().active);

    engine.on_connect_failed(conn);

    assert!(engine.connections().get(f_id).is_none());
    assert!(!engine.roles(Role::FailTo).get(f_id).unwrap().active);
    assert!(engine.dead().is_empty());

    engine.send_to_peer(f_id, &Message::Kill, t0 + secs(1)).unwrap();
    assert_eq!(engine.transport().connect_attempts(), 2);
    assert!(engine.roles(Role::FailTo).get(f_id).unwrap().active);
}

#[test]
fn unidentified_connections_do_not_accumulate_ids() {
    let t0 = Instant::now();
    let mut engine = engine(config(), Topology::default());

    for port in 40000..40010 {
        let remote = PeerAddr::new("10.0.0.9", port);
        let conn = engine.transport_mut().accept(remote.clone());
        let peer = engine.on_accept(conn, &remote, t0);
        engine.on_frame(conn, app_frame("anonymous"), t0);
        assert_eq!(engine.on_disconnect(conn, t0), Some(DeathOutcome::Removed));
        assert_eq!(engine.identity().lookup(peer), None);
    }
    assert_eq!(engine.identity().len(), 1);
    assert!(engine.dead().is_empty());
    assert!(engine.connections().is_empty());

    // Identified peers release their ephemeral id and keep the stable one.
    let b = node(2);
    connect_from(&mut engine, &b, t0);
    assert_eq!(engine.identity().len(), 2);
    assert_eq!(engine.identity().find(&PeerAddr::new(b.host(), 45000)), None);
}

#[test]
fn losing_last_connection_to_standby_peer_takes_over() {
    let t0 = Instant::now();
    let b = node(2);
    let mut engine = engine(
        config(),
        Topology {
            fail_rec: vec![b.clone()],
            ..Topology::default()
        },
    );
    let first = connect_from(&mut engine, &b, t0);
    let second = connect_from(&mut engine, &b, t0);
    let b_id = id_of(&engine, &b);
    assert_eq!(engine.connections().get(b_id).unwrap().transports.len(), 2);
    assert!(engine.roles(Role::FailRec).get(b_id).unwrap().active);

    assert_eq!(engine.on_disconnect(first, t0), None);
    assert_eq!(engine.on_disconnect(second, t0), Some(DeathOutcome::TookOver));
    assert_eq!(engine.service().takeovers, vec![(b_id, None)]);
}

// ============================================================================
// Backup Tests
// ============================================================================

#[test]
fn older_backup_is_superseded() {
    let b = PeerId::new(0);
    let mut engine = engine(config(), Topology::default());
    let t1 = Timestamp::from_nanos(2_000);
    let t0 = Timestamp::from_nanos(1_000);

    assert_eq!(
        engine.receive_backup(b, t1, Bytes::from_static(b"newer")),
        MergeOutcome::Accepted
    );
    assert_eq!(
        engine.receive_backup(b, t0, Bytes::from_static(b"older")),
        MergeOutcome::Superseded
    );
    assert_eq!(
        engine.receive_backup(b, t1, Bytes::from_static(b"newer")),
        MergeOutcome::Superseded
    );
    assert_eq!(&engine.backups().latest(b).unwrap().payload[..], b"newer");
}

#[test]
fn backup_cycle_shares_one_snapshot_per_interval() {
    let t0 = Instant::now();
    let (f1, f2) = (node(4), node(5));
    let mut engine = engine(
        config(),
        Topology {
            fail_to: vec![f1.clone(), f2.clone()],
            ..Topology::default()
        },
    );

    assert_eq!(engine.run_backup_cycle(t0), 2);
    assert_eq!(engine.service().serialized, 1);
    assert_eq!(engine.run_backup_cycle(t0 + secs(1)), 0);
    assert_eq!(engine.run_backup_cycle(t0 + BACKUP_INTERVAL), 2);
    assert_eq!(engine.service().serialized, 2);

    let stamps: Vec<Timestamp> = engine
        .transport()
        .messages_to(&f1)
        .into_iter()
        .map(|m| match m {
            Message::Backup {
                timestamp,
                snapshot,
            } => {
                assert_eq!(&snapshot[..], b"state");
                timestamp
            }
            other => panic!("expected backup, got {other:?}"),
        })
        .collect();
    assert_eq!(stamps.len(), 2);
    assert!(stamps[1] > stamps[0]);
    assert_eq!(engine.transport().messages_to(&f2).len(), 2);
}

#[test]
fn unreachable_fail_to_target_is_retried_once_per_interval() {
    let t0 = Instant::now();
    let f = node(4);
    let mut transport = MemoryTransport::new();
    transport.set_unreachable(f.clone());
    let mut engine = engine_with_transport(
        config(),
        Topology {
            fail_to: vec![f.clone()],
            ..Topology::default()
        },
        transport,
    );

    assert_eq!(engine.run_backup_cycle(t0), 0);
    assert_eq!(engine.transport().connect_attempts(), 1);

    // Ticks inside the interval leave the target alone.
    for tick in 1..20 {
        assert_eq!(engine.run_backup_cycle(t0 + Duration::from_millis(500 * tick)), 0);
    }
    assert_eq!(engine.transport().connect_attempts(), 1);

    engine.run_backup_cycle(t0 + BACKUP_INTERVAL);
    assert_eq!(engine.transport().connect_attempts(), 2);
    assert_eq!(engine.service().serialized, 2);
    assert!(engine.roles(Role::FailTo).contains(id_of(&engine, &f)));
}

#[test]
fn explicit_pushes() {
    let t0 = Instant::now();
    let mut engine = engine(config(), Topology::default());
    assert_eq!(engine.push_to_fail_to_targets(t0), 0);

    let target = node(7);
    let peer = engine.push_to_address(&target, t0).unwrap();
    assert_eq!(engine.identity().lookup(peer), Some(&target));
    engine.push_to_peer(peer, t0).unwrap();

    let pushed = engine.transport().messages_to(&target);
    assert_eq!(pushed.len(), 2);
    assert!(pushed.iter().all(|m| matches!(m, Message::Backup { .. })));
}

// ============================================================================
// Dispatcher Tests
// ============================================================================

#[test]
fn probe_is_answered_on_the_inbound_connection() {
    let t0 = Instant::now();
    let mut engine = engine(config(), Topology::default());
    let remote = PeerAddr::new("10.0.0.9", 45000);
    let conn = engine.transport_mut().accept(remote.clone());
    engine.on_accept(conn, &remote, t0);

    engine.on_frame(conn, frame(&Message::probe(node(9))), t0);

    assert_eq!(
        engine.transport().messages_on(conn),
        vec![Message::reply(node(9), true)]
    );
}

#[test]
fn hello_files_connection_under_listening_address() {
    let t0 = Instant::now();
    let b = node(2);
    let mut engine = engine(
        config(),
        Topology {
            fail_rec: vec![b.clone()],
            ..Topology::default()
        },
    );
    let conn = connect_from(&mut engine, &b, t0);
    let b_id = id_of(&engine, &b);

    assert_eq!(engine.connections().peer_for(conn), Some(b_id));
    assert_eq!(engine.connections().len(), 1);
    assert_eq!(engine.roles(Role::FailRec).get(b_id).unwrap().conn, Some(conn));
}

#[test]
fn unknown_tags_reach_the_application() {
    let t0 = Instant::now();
    let b = node(2);
    let mut engine = engine(config(), Topology::default());
    let conn = connect_from(&mut engine, &b, t0);

    engine.on_frame(conn, app_frame("payload"), t0);

    assert_eq!(
        engine.service().consumed,
        vec![(id_of(&engine, &b), Bytes::from_static(b"data:payload"))]
    );
}

#[test]
fn malformed_frames_are_dropped() {
    let t0 = Instant::now();
    let mut engine = engine(config(), Topology::default());
    let conn = connect_from(&mut engine, &node(2), t0);
    let before = engine.status();

    engine.on_frame(conn, Frame::new(Tag::FAIL, "not a notice").unwrap(), t0);
    engine.on_frame(conn, Frame::new(Tag::ALIVE, " ret x y z").unwrap(), t0);

    assert_eq!(engine.status(), before);
    assert!(engine.still_alive());
}

#[test]
fn kill_stops_all_processing() {
    let t0 = Instant::now();
    let c = node(3);
    let mut engine = engine(config(), Topology::default());
    let kill = engine.kill_switch();
    let conn = connect_from(&mut engine, &c, t0);
    let c_id = id_of(&engine, &c);

    engine.on_frame(conn, frame(&Message::Kill), t0);
    assert!(kill.is_triggered());
    assert!(!engine.still_alive());

    engine.on_frame(conn, app_frame("late"), t0);
    assert!(engine.service().consumed.is_empty());
    assert_eq!(engine.heartbeat_cycle(t0 + TIMEOUT * 3), Default::default());
    assert_eq!(engine.run_backup_cycle(t0), 0);
    engine.send_to_peer(c_id, &Message::Kill, t0).unwrap();
    assert!(engine.transport().sent().is_empty());
}

// ============================================================================
// Builder Tests
// ============================================================================

#[test]
fn missing_service_is_fatal() {
    let result = Engine::<MemoryTransport, RecordingService>::builder(config())
        .transport(MemoryTransport::new())
        .build();
    assert!(matches!(result, Err(FailoverError::MissingService)));
}

#[test]
fn topology_skips_local_address() {
    let engine = engine(
        config(),
        Topology {
            fail_to: vec![local(), node(2)],
            ..Topology::default()
        },
    );
    assert_eq!(engine.roles(Role::FailTo).len(), 1);
    assert_eq!(engine.status().fail_to, 1);
}
