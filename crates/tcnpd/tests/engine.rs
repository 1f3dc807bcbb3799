// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! End-to-end engine tests over the in-memory transport.
//!
//! Each test drives the public session API with a fabricated clock; no
//! sockets are opened.

use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tcnpd::wire::Frame;
use tcnpd::{
    MemTransport, MsgType, PdCallback, PdConfig, PdError, PdInfo, PdSession, PktFlags,
    SessionOptions, StatsSnapshot, GLOBAL_STATISTICS_COMID, STATISTICS_REQUEST_COMID,
};

const OWN_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
const REMOTE_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 5);
const REPLY_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);

type Events = Arc<Mutex<Vec<(PdInfo, Vec<u8>)>>>;

fn recording_callback() -> (PdCallback, Events) {
    let events: Events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let cb: PdCallback = Arc::new(move |info: &PdInfo, data: &[u8]| {
        sink.lock().unwrap().push((*info, data.to_vec()));
    });
    (cb, events)
}

fn open_session(
    own_ip: Ipv4Addr,
    options: SessionOptions,
    callback: Option<PdCallback>,
    now: Instant,
) -> PdSession<MemTransport> {
    PdSession::new(
        MemTransport::new(),
        own_ip,
        PdConfig::default(),
        options,
        callback,
        now,
    )
    .unwrap()
}

/// Build the wire bytes of one sealed PD telegram.
fn make_telegram(
    msg_type: MsgType,
    com_id: u32,
    seq: u32,
    data: &[u8],
    reply_com_id: u32,
    reply_ip: Ipv4Addr,
) -> Vec<u8> {
    let mut frame = Frame::new(data.len());
    frame.init_header(
        msg_type,
        com_id,
        0,
        0,
        data.len() as u32,
        reply_com_id,
        reply_ip,
    );
    frame.data_mut(data.len()).copy_from_slice(data);
    frame.set_sequence(seq);
    frame.seal();
    frame.wire_bytes(data.len()).to_vec()
}

// ============================================================================
// Scenario: basic pull round-trip (requester <-> remote statistics)
// ============================================================================

#[test]
fn pull_round_trip_delivers_statistics() {
    let t0 = Instant::now();

    // Requester: subscribes to the statistics reply and issues the pull.
    let (cb, events) = recording_callback();
    let mut requester = open_session(OWN_IP, SessionOptions::default(), Some(cb), t0);
    let sub = requester
        .subscribe(
            GLOBAL_STATISTICS_COMID,
            None,
            REPLY_IP,
            Some(Duration::from_secs(5)),
            PktFlags::CALLBACK,
            7,
            t0,
        )
        .unwrap();
    requester
        .request(STATISTICS_REQUEST_COMID, REMOTE_IP, GLOBAL_STATISTICS_COMID, REPLY_IP)
        .unwrap();

    // The request leaves on the next engine turn and the element collapses.
    requester.process(&[], t0).unwrap();
    let pr_bytes = {
        let sent = &requester.transport_mut().sent;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].dest, REMOTE_IP);
        sent[0].bytes.clone()
    };
    let pr_header = tcnpd::wire::PdHeader::decode(&pr_bytes).unwrap();
    assert_eq!(pr_header.msg_type, MsgType::Pr);
    assert_eq!(pr_header.com_id, STATISTICS_REQUEST_COMID);
    assert_eq!(pr_header.reply_com_id, GLOBAL_STATISTICS_COMID);
    assert_eq!(pr_header.reply_ip, REPLY_IP);

    // One-shot: a second turn emits nothing further.
    requester.process(&[], t0 + Duration::from_millis(10)).unwrap();
    assert_eq!(requester.transport_mut().sent.len(), 1);

    // Remote: receives the request and answers within the same event turn.
    let mut remote = open_session(REMOTE_IP, SessionOptions::default(), None, t0);
    remote
        .transport_mut()
        .push_inbound(0, &pr_bytes, OWN_IP, REMOTE_IP);
    // No subscription for the request ComID itself is expected.
    assert_eq!(remote.receive(0, t0), Err(PdError::NoSub));

    let pp_bytes = {
        let sent = &remote.transport_mut().sent;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].dest, REPLY_IP);
        sent[0].bytes.clone()
    };
    let pp_header = tcnpd::wire::PdHeader::decode(&pp_bytes).unwrap();
    assert_eq!(pp_header.msg_type, MsgType::Pp);
    assert_eq!(pp_header.com_id, GLOBAL_STATISTICS_COMID);
    assert_eq!(pp_header.sequence_counter, 1);

    // The payload is a statistics snapshot of the remote session.
    let snapshot = StatsSnapshot::decode(&pp_bytes[40..]).unwrap();
    assert_eq!(snapshot.own_ip, REMOTE_IP);
    assert_eq!(snapshot.pd.num_rcv, 1);

    // Reply reaches the requester: exactly one callback, no error.
    requester
        .transport_mut()
        .push_inbound(0, &pp_bytes, REMOTE_IP, REPLY_IP);
    requester.process(&[0], t0 + Duration::from_millis(20)).unwrap();

    let events = events.lock().unwrap();
    assert_eq!(events.len(), 1);
    let (info, payload) = &events[0];
    assert_eq!(info.com_id, GLOBAL_STATISTICS_COMID);
    assert_eq!(info.result_code, None);
    assert_eq!(info.user_ref, 7);
    assert_eq!(info.src_ip, REMOTE_IP);
    let received = StatsSnapshot::decode(payload).unwrap();
    assert_eq!(received.own_ip, REMOTE_IP);

    assert_eq!(requester.sub_stats(sub).unwrap().num_rx_tx, 1);
}

#[test]
fn generic_pull_answers_from_matching_publisher() {
    let t0 = Instant::now();
    let mut remote = open_session(REMOTE_IP, SessionOptions::default(), None, t0);

    // Pull-only publisher with valid data.
    let handle = remote
        .publish(200, Ipv4Addr::UNSPECIFIED, None, PktFlags::NONE, None, t0)
        .unwrap();
    remote.put(handle, Some(&[0xAA, 0xBB, 0xCC, 0xDD])).unwrap();

    // Request without a reply ComID falls back to the request's ComID.
    let pr = make_telegram(MsgType::Pr, 200, 1, &[], 0, Ipv4Addr::UNSPECIFIED);
    remote.transport_mut().push_inbound(0, &pr, OWN_IP, REMOTE_IP);
    assert_eq!(remote.receive(0, t0), Err(PdError::NoSub));

    let sent = &remote.transport_mut().sent;
    assert_eq!(sent.len(), 1);
    // No reply address in the request: answer goes back to the requester.
    assert_eq!(sent[0].dest, OWN_IP);
    let header = tcnpd::wire::PdHeader::decode(&sent[0].bytes).unwrap();
    assert_eq!(header.msg_type, MsgType::Pp);
    assert_eq!(header.com_id, 200);
    assert_eq!(&sent[0].bytes[40..44], &[0xAA, 0xBB, 0xCC, 0xDD]);
}

#[test]
fn pull_without_publisher_counts_no_pub() {
    let t0 = Instant::now();
    let mut remote = open_session(REMOTE_IP, SessionOptions::default(), None, t0);

    let pr = make_telegram(MsgType::Pr, 999, 1, &[], 0, Ipv4Addr::UNSPECIFIED);
    remote.transport_mut().push_inbound(0, &pr, OWN_IP, REMOTE_IP);
    assert_eq!(remote.receive(0, t0), Err(PdError::NoSub));

    assert!(remote.transport_mut().sent.is_empty());
    assert_eq!(remote.stats().num_no_pub, 1);
}

// ============================================================================
// Scenario: change detection governs the callback
// ============================================================================

#[test]
fn identical_frames_notify_once_without_force_cb() {
    let t0 = Instant::now();
    let (cb, events) = recording_callback();
    let mut session = open_session(OWN_IP, SessionOptions::default(), Some(cb), t0);
    session
        .subscribe(300, None, OWN_IP, None, PktFlags::CALLBACK, 0, t0)
        .unwrap();

    let telegram1 = make_telegram(MsgType::Pd, 300, 1, &[1, 2, 3, 4], 0, Ipv4Addr::UNSPECIFIED);
    let telegram2 = make_telegram(MsgType::Pd, 300, 2, &[1, 2, 3, 4], 0, Ipv4Addr::UNSPECIFIED);
    session.transport_mut().push_inbound(0, &telegram1, REMOTE_IP, OWN_IP);
    session.transport_mut().push_inbound(0, &telegram2, REMOTE_IP, OWN_IP);
    session.process(&[0], t0 + Duration::from_millis(10)).unwrap();

    // Two frames accepted, one notification.
    assert_eq!(events.lock().unwrap().len(), 1);
    assert_eq!(session.stats().num_rcv, 2);
}

#[test]
fn force_cb_notifies_on_every_frame() {
    let t0 = Instant::now();
    let (cb, events) = recording_callback();
    let mut session = open_session(OWN_IP, SessionOptions::default(), Some(cb), t0);
    session
        .subscribe(
            300,
            None,
            OWN_IP,
            None,
            PktFlags::CALLBACK.with(PktFlags::FORCE_CB),
            0,
            t0,
        )
        .unwrap();

    let telegram1 = make_telegram(MsgType::Pd, 300, 1, &[1, 2, 3, 4], 0, Ipv4Addr::UNSPECIFIED);
    let telegram2 = make_telegram(MsgType::Pd, 300, 2, &[1, 2, 3, 4], 0, Ipv4Addr::UNSPECIFIED);
    session.transport_mut().push_inbound(0, &telegram1, REMOTE_IP, OWN_IP);
    session.transport_mut().push_inbound(0, &telegram2, REMOTE_IP, OWN_IP);
    session.process(&[0], t0 + Duration::from_millis(10)).unwrap();

    assert_eq!(events.lock().unwrap().len(), 2);
}

// ============================================================================
// Scenario: timeout then recovery
// ============================================================================

#[test]
fn timeout_notifies_once_and_recovery_notifies_again() {
    let t0 = Instant::now();
    let (cb, events) = recording_callback();
    let mut session = open_session(OWN_IP, SessionOptions::default(), Some(cb), t0);
    let sub = session
        .subscribe(
            400,
            None,
            OWN_IP,
            Some(Duration::from_millis(500)),
            PktFlags::CALLBACK,
            0,
            t0,
        )
        .unwrap();

    // First telegram arrives in time.
    let telegram = make_telegram(MsgType::Pd, 400, 1, &[9, 9], 0, Ipv4Addr::UNSPECIFIED);
    session.transport_mut().push_inbound(0, &telegram, REMOTE_IP, OWN_IP);
    session.process(&[0], t0).unwrap();
    assert_eq!(events.lock().unwrap().len(), 1);

    // Source goes silent; the watchdog fires once.
    session.process(&[], t0 + Duration::from_millis(600)).unwrap();
    {
        let events = events.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].0.result_code, Some(PdError::Timeout));
        // The stale payload is handed along.
        assert_eq!(events[1].1, vec![9, 9]);
    }
    assert_eq!(session.stats().num_timeout, 1);

    // Repeat scans do not renotify.
    session.process(&[], t0 + Duration::from_millis(700)).unwrap();
    assert_eq!(events.lock().unwrap().len(), 2);

    // get() reports the episode while it lasts.
    let mut out = [0u8; 8];
    assert_eq!(session.get(sub, &mut out), Err(PdError::Timeout));

    // A fresh telegram - even with identical payload - always notifies.
    let telegram = make_telegram(MsgType::Pd, 400, 2, &[9, 9], 0, Ipv4Addr::UNSPECIFIED);
    session.transport_mut().push_inbound(0, &telegram, REMOTE_IP, OWN_IP);
    session.process(&[0], t0 + Duration::from_millis(800)).unwrap();
    {
        let events = events.lock().unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[2].0.result_code, None);
    }
    assert_eq!(session.get(sub, &mut out), Ok(2));
    assert_eq!(session.stats().num_timeout, 1);
}

// ============================================================================
// Scenario: sequence discipline
// ============================================================================

#[test]
fn sequence_restart_resets_without_wrap_accounting() {
    let t0 = Instant::now();
    let mut session = open_session(OWN_IP, SessionOptions::default(), None, t0);
    let sub = session
        .subscribe(500, None, OWN_IP, None, PktFlags::NONE, 0, t0)
        .unwrap();

    let feed = |session: &mut PdSession<MemTransport>, seq: u32, at: Instant| {
        let telegram = make_telegram(MsgType::Pd, 500, seq, &[seq as u8], 0, Ipv4Addr::UNSPECIFIED);
        session.transport_mut().push_inbound(0, &telegram, REMOTE_IP, OWN_IP);
        session.receive(0, at)
    };

    assert_eq!(feed(&mut session, 1, t0), Ok(()));
    // Jump to 42: 40 telegrams were missed.
    assert_eq!(feed(&mut session, 42, t0), Ok(()));
    assert_eq!(session.sub_stats(sub).unwrap().num_missed, 40);

    // The sender restarts at 0: accepted as new, no wrap-sized bump.
    assert_eq!(feed(&mut session, 0, t0), Ok(()));
    assert_eq!(session.sub_stats(sub).unwrap().num_missed, 40);
    assert_eq!(feed(&mut session, 1, t0), Ok(()));
    assert_eq!(session.sub_stats(sub).unwrap().num_rx_tx, 4);

    // Duplicates and stragglers are dropped quietly, without side effects.
    assert_eq!(feed(&mut session, 1, t0), Ok(()));
    assert_eq!(session.sub_stats(sub).unwrap().num_rx_tx, 4);
}

// ============================================================================
// Scenario: distribution shaping
// ============================================================================

#[test]
fn distribute_spreads_send_times_across_smallest_interval() {
    let t0 = Instant::now();
    let options = SessionOptions {
        traffic_shaping: true,
        ..SessionOptions::default()
    };
    let mut session = open_session(OWN_IP, options, None, t0);

    let intervals_ms = [100u64, 200, 200, 400];
    for (i, ms) in intervals_ms.iter().enumerate() {
        let handle = session
            .publish(
                101 + i as u32,
                REMOTE_IP,
                Some(Duration::from_millis(*ms)),
                PktFlags::NONE,
                None,
                t0,
            )
            .unwrap();
        session.put(handle, None).unwrap();
    }

    // tNull is the latest-scheduled element (t0 + 400ms); the slot is the
    // smallest interval divided by the packet count: 100 / 4 = 25ms.
    let expect_at = |offset_ms: u64, com_id: u32, session: &mut PdSession<MemTransport>| {
        let before = session.transport_mut().sent.len();
        session
            .process(&[], t0 + Duration::from_millis(400 + offset_ms))
            .unwrap();
        let sent = &session.transport_mut().sent;
        assert_eq!(sent.len(), before + 1, "at +{}ms", offset_ms);
        let header = tcnpd::wire::PdHeader::decode(&sent[before].bytes).unwrap();
        assert_eq!(header.com_id, com_id, "at +{}ms", offset_ms);
    };

    expect_at(0, 101, &mut session);
    expect_at(26, 102, &mut session);
    expect_at(51, 103, &mut session);
    expect_at(76, 104, &mut session);
}

// ============================================================================
// Wire vetting and topology gates
// ============================================================================

#[test]
fn corrupted_frame_counts_crc_error() {
    let t0 = Instant::now();
    let mut session = open_session(OWN_IP, SessionOptions::default(), None, t0);
    session
        .subscribe(300, None, OWN_IP, None, PktFlags::NONE, 0, t0)
        .unwrap();

    let mut telegram = make_telegram(MsgType::Pd, 300, 1, &[1, 2], 0, Ipv4Addr::UNSPECIFIED);
    telegram[8] ^= 0xFF;
    session.transport_mut().push_inbound(0, &telegram, REMOTE_IP, OWN_IP);
    assert_eq!(session.receive(0, t0), Err(PdError::Crc));
    assert_eq!(session.stats().num_crc_err, 1);
    assert_eq!(session.stats().num_rcv, 0);
}

#[test]
fn session_topology_mismatch_drops_frame() {
    let t0 = Instant::now();
    let mut session = open_session(OWN_IP, SessionOptions::default(), None, t0);
    session.set_topo_counts(5, 7);
    session
        .subscribe(300, None, OWN_IP, None, PktFlags::NONE, 0, t0)
        .unwrap();

    let mut frame = Frame::new(0);
    frame.init_header(MsgType::Pd, 300, 6, 7, 0, 0, Ipv4Addr::UNSPECIFIED);
    frame.set_sequence(1);
    frame.seal();
    let telegram = frame.wire_bytes(0).to_vec();

    session.transport_mut().push_inbound(0, &telegram, REMOTE_IP, OWN_IP);
    assert_eq!(session.receive(0, t0), Err(PdError::Topo));
    assert_eq!(session.stats().num_topo_err, 1);
}

#[test]
fn subscriber_topology_mismatch_notifies_with_topo_error() {
    let t0 = Instant::now();
    let (cb, events) = recording_callback();
    let mut session = open_session(OWN_IP, SessionOptions::default(), Some(cb), t0);
    // Stored counters at subscribe time.
    session.set_topo_counts(5, 7);
    let sub = session
        .subscribe(300, None, OWN_IP, None, PktFlags::CALLBACK, 0, t0)
        .unwrap();
    // The train was re-inaugurated; this session has not caught up yet.
    session.set_topo_counts(0, 0);

    let mut frame = Frame::new(0);
    frame.init_header(MsgType::Pd, 300, 6, 7, 0, 0, Ipv4Addr::UNSPECIFIED);
    frame.set_sequence(1);
    frame.seal();
    let telegram = frame.wire_bytes(0).to_vec();

    session.transport_mut().push_inbound(0, &telegram, REMOTE_IP, OWN_IP);
    assert_eq!(session.receive(0, t0), Err(PdError::Topo));

    let events = events.lock().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].0.result_code, Some(PdError::Topo));
    // The frame was not accepted.
    assert_eq!(session.sub_stats(sub).unwrap().num_rx_tx, 0);
}

// ============================================================================
// Redundancy and socket lifecycle
// ============================================================================

#[test]
fn redundant_follower_is_silently_suppressed() {
    let t0 = Instant::now();
    let mut session = open_session(OWN_IP, SessionOptions::default(), None, t0);
    let handle = session
        .publish(
            600,
            REMOTE_IP,
            Some(Duration::from_millis(100)),
            PktFlags::REDUNDANT,
            Some(&[1]),
            t0,
        )
        .unwrap();

    session.set_redundant(false);
    session.process(&[], t0 + Duration::from_millis(150)).unwrap();
    assert!(session.transport_mut().sent.is_empty());

    session.set_redundant(true);
    session.process(&[], t0 + Duration::from_millis(300)).unwrap();
    assert_eq!(session.transport_mut().sent.len(), 1);
    assert_eq!(session.pub_stats(handle).unwrap().num_rx_tx, 1);
}

#[test]
fn one_shot_request_releases_its_socket() {
    let t0 = Instant::now();
    let mut session = open_session(OWN_IP, SessionOptions::default(), None, t0);
    assert_eq!(session.transport_mut().open_sockets(), 1);

    session.request(31, REMOTE_IP, 35, REPLY_IP).unwrap();
    session.process(&[], t0).unwrap();

    // The request shared the session socket; the share is gone again.
    assert_eq!(session.transport_mut().open_sockets(), 1);
    assert_eq!(session.stats().num_send, 1);
}

#[test]
fn unsubscribe_during_idle_is_safe() {
    let t0 = Instant::now();
    let mut session = open_session(OWN_IP, SessionOptions::default(), None, t0);
    let sub = session
        .subscribe(300, None, OWN_IP, None, PktFlags::NONE, 0, t0)
        .unwrap();
    session.unsubscribe(sub).unwrap();
    assert_eq!(session.unsubscribe(sub), Err(PdError::NoInit));

    // A telegram for the dropped subscription is quietly unmatched.
    let telegram = make_telegram(MsgType::Pd, 300, 1, &[1], 0, Ipv4Addr::UNSPECIFIED);
    session.transport_mut().push_inbound(0, &telegram, REMOTE_IP, OWN_IP);
    assert_eq!(session.receive(0, t0), Err(PdError::NoSub));
    assert_eq!(session.stats().num_no_subs, 1);
}

// ============================================================================
// Sender cadence
// ============================================================================

#[test]
fn late_publisher_snaps_forward_instead_of_bursting() {
    let t0 = Instant::now();
    let mut session = open_session(OWN_IP, SessionOptions::default(), None, t0);
    session
        .publish(
            700,
            REMOTE_IP,
            Some(Duration::from_millis(100)),
            PktFlags::NONE,
            Some(&[1]),
            t0,
        )
        .unwrap();

    // The loop stalls for five intervals; exactly one telegram goes out,
    // then the cadence resumes from now.
    session.process(&[], t0 + Duration::from_millis(550)).unwrap();
    assert_eq!(session.transport_mut().sent.len(), 1);

    session.process(&[], t0 + Duration::from_millis(600)).unwrap();
    assert_eq!(session.transport_mut().sent.len(), 1);

    session.process(&[], t0 + Duration::from_millis(660)).unwrap();
    assert_eq!(session.transport_mut().sent.len(), 2);
}

#[test]
fn outgoing_sequence_is_strictly_increasing() {
    let t0 = Instant::now();
    let mut session = open_session(OWN_IP, SessionOptions::default(), None, t0);
    session
        .publish(
            800,
            REMOTE_IP,
            Some(Duration::from_millis(10)),
            PktFlags::NONE,
            Some(&[1]),
            t0,
        )
        .unwrap();

    for i in 1..=5u64 {
        session
            .process(&[], t0 + Duration::from_millis(10 * i))
            .unwrap();
    }
    let sent = &session.transport_mut().sent;
    assert_eq!(sent.len(), 5);
    let seqs: Vec<u32> = sent
        .iter()
        .map(|f| tcnpd::wire::PdHeader::decode(&f.bytes).unwrap().sequence_counter)
        .collect();
    assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
}

#[test]
fn invalid_data_publisher_does_not_emit() {
    let t0 = Instant::now();
    let mut session = open_session(OWN_IP, SessionOptions::default(), None, t0);
    let handle = session
        .publish(
            900,
            REMOTE_IP,
            Some(Duration::from_millis(100)),
            PktFlags::NONE,
            None,
            t0,
        )
        .unwrap();

    session.process(&[], t0 + Duration::from_millis(150)).unwrap();
    assert!(session.transport_mut().sent.is_empty());

    // A zero-size put marks the telegram valid; it goes out with no payload.
    session.put(handle, None).unwrap();
    session.process(&[], t0 + Duration::from_millis(260)).unwrap();
    let sent = &session.transport_mut().sent;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].bytes.len(), 40);
}

// ============================================================================
// Work loop plumbing
// ============================================================================

#[test]
fn get_interval_tracks_nearest_deadline() {
    let t0 = Instant::now();
    let mut session = open_session(OWN_IP, SessionOptions::default(), None, t0);

    // Nothing scheduled: the wait is the loop's upper bound.
    let (wait, watch) = session.get_interval(t0);
    assert_eq!(wait, Duration::from_secs(5));
    assert!(watch.is_empty());

    session
        .publish(
            700,
            REMOTE_IP,
            Some(Duration::from_millis(300)),
            PktFlags::NONE,
            Some(&[1]),
            t0,
        )
        .unwrap();
    let sub = session
        .subscribe(
            300,
            None,
            OWN_IP,
            Some(Duration::from_secs(2)),
            PktFlags::NONE,
            0,
            t0,
        )
        .unwrap();

    let (wait, watch) = session.get_interval(t0);
    assert_eq!(wait, Duration::from_millis(300));
    assert_eq!(watch.len(), 1);

    // A timed-out subscription no longer contributes a deadline.
    session.process(&[], t0 + Duration::from_secs(3)).unwrap();
    let (_, watch) = session.get_interval(t0 + Duration::from_secs(3));
    assert_eq!(watch.len(), 1);
    assert!(session.sub_stats(sub).is_some());
}
