//! Stream sequencing and acknowledgment reconciliation
//!
//! The tracker owns both outbound queues, the inbound ack maps and the
//! per-connection stream counters. It never reports anything itself: every
//! operation returns an outcome value describing which packets were
//! acknowledged and which persisted ids can be deleted, and the client turns
//! that into status reports and store writes.

use std::collections::{BTreeMap, VecDeque};

use tracing::{debug, trace, warn};

use crate::packet::{LoginRequest, McsPacket, OutgoingPacket};
use crate::types::{DeviceCredentials, PersistentId, StreamId, Timestamp};

// ----------------------------------------------------------------------------
// Outcomes
// ----------------------------------------------------------------------------

/// Result of processing an acknowledgment from the server
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AckOutcome {
    /// Outgoing packets the server confirmed, in send order
    pub acked: Vec<OutgoingPacket>,
    /// Persistent ids of `acked`, for one batched outgoing delete
    pub outgoing_ids_to_remove: Vec<PersistentId>,
    /// Inbound ids whose acknowledgment the server has now seen, for one
    /// batched incoming delete
    pub incoming_ids_to_remove: Vec<PersistentId>,
    /// Selectively acked ids that matched no queued packet
    pub unmatched: Vec<PersistentId>,
    /// Number of unconfirmed packets moved back into the send queue
    pub requeued: usize,
}

impl AckOutcome {
    pub fn is_empty(&self) -> bool {
        self.acked.is_empty() && self.incoming_ids_to_remove.is_empty() && self.requeued == 0
    }
}

/// State collected while rebuilding for a new connection
#[derive(Debug)]
pub struct ReconnectOutcome {
    pub login: LoginRequest,
    /// Packets dropped because they were TTL 0 or expired
    pub dropped: Vec<OutgoingPacket>,
}

// ----------------------------------------------------------------------------
// Ack Tracker
// ----------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct AckTracker {
    /// Packets waiting for transmission
    to_send: VecDeque<OutgoingPacket>,
    /// Transmitted persistent packets awaiting acknowledgment, ordered by stream id
    to_resend: VecDeque<OutgoingPacket>,
    /// Inbound stream id → persistent id, not yet acknowledged to the server
    unacked_server_ids: BTreeMap<StreamId, PersistentId>,
    /// Outbound stream id that carried an ack → the ids it acknowledged
    acked_server_ids: BTreeMap<StreamId, Vec<PersistentId>>,
    /// Inbound ids restored from the store, folded into the next login
    restored_unacked_server_ids: Vec<PersistentId>,
    stream_id_in: StreamId,
    stream_id_out: StreamId,
    last_device_to_server_stream_id_received: StreamId,
    last_server_to_device_stream_id_received: StreamId,
}

impl AckTracker {
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------------
    // Queue access
    // ------------------------------------------------------------------------

    pub fn send_queue_len(&self) -> usize {
        self.to_send.len()
    }

    pub fn resend_queue_len(&self) -> usize {
        self.to_resend.len()
    }

    pub fn send_queue(&self) -> impl Iterator<Item = &OutgoingPacket> {
        self.to_send.iter()
    }

    pub fn resend_queue(&self) -> impl Iterator<Item = &OutgoingPacket> {
        self.to_resend.iter()
    }

    pub fn stream_id_in(&self) -> StreamId {
        self.stream_id_in
    }

    pub fn stream_id_out(&self) -> StreamId {
        self.stream_id_out
    }

    pub fn last_device_to_server_stream_id_received(&self) -> StreamId {
        self.last_device_to_server_stream_id_received
    }

    pub fn unacked_server_ids(&self) -> &BTreeMap<StreamId, PersistentId> {
        &self.unacked_server_ids
    }

    pub fn acked_server_ids(&self) -> &BTreeMap<StreamId, Vec<PersistentId>> {
        &self.acked_server_ids
    }

    pub fn restored_unacked_server_ids(&self) -> &[PersistentId] {
        &self.restored_unacked_server_ids
    }

    /// Append a newly admitted packet to the send queue
    pub fn enqueue(&mut self, packet: OutgoingPacket) {
        self.to_send.push_back(packet);
    }

    /// Seed the tracker with state loaded from the store
    pub fn restore(&mut self, outgoing: Vec<OutgoingPacket>, incoming: Vec<PersistentId>) {
        self.to_send.extend(outgoing);
        self.restored_unacked_server_ids.extend(incoming);
    }

    pub fn pop_next_to_send(&mut self) -> Option<OutgoingPacket> {
        self.to_send.pop_front()
    }

    /// Put an untransmitted or unconfirmed packet back at the head of the
    /// send queue; its stream id belonged to an earlier transmission
    fn requeue_front(&mut self, mut packet: OutgoingPacket) {
        packet.stream_id = 0;
        self.to_send.push_front(packet);
    }

    // ------------------------------------------------------------------------
    // Outbound
    // ------------------------------------------------------------------------

    /// Stamp a packet for transmission and return the frame to write
    ///
    /// Assigns the next outbound stream id, piggy-backs the cumulative
    /// inbound ack, and keeps persistent packets in the resend queue until
    /// the server confirms them.
    pub fn transmit(&mut self, mut packet: OutgoingPacket, now: Timestamp) -> McsPacket {
        self.stream_id_out += 1;
        packet.stream_id = self.stream_id_out;

        if let McsPacket::DataMessage(message) = &mut packet.packet {
            let queued = now.as_secs().saturating_sub(message.sent);
            message.queued = u32::try_from(queued).unwrap_or(u32::MAX);
            trace!("Message {} was queued for {} seconds", message.id, queued);
        }

        packet.packet.set_last_stream_id_received(self.stream_id_in);
        if self.stream_id_in != self.last_server_to_device_stream_id_received {
            self.last_server_to_device_stream_id_received = self.stream_id_in;
            // Kept until the server confirms this stream id, in case the
            // frame carrying the ack is lost.
            let acked: Vec<PersistentId> =
                core::mem::take(&mut self.unacked_server_ids).into_values().collect();
            self.acked_server_ids.insert(self.stream_id_out, acked);
        }

        let frame = packet.packet.clone();
        if packet.is_persistent() {
            self.to_resend.push_back(packet);
        }
        frame
    }

    // ------------------------------------------------------------------------
    // Inbound
    // ------------------------------------------------------------------------

    /// Account for one inbound frame and return its stream id
    pub fn record_incoming(&mut self, persistent_id: Option<PersistentId>) -> StreamId {
        self.stream_id_in += 1;
        if let Some(id) = persistent_id {
            self.unacked_server_ids.insert(self.stream_id_in, id);
        }
        self.stream_id_in
    }

    pub fn unacked_server_count(&self) -> usize {
        self.unacked_server_ids.len()
    }

    /// The login response is always inbound stream 1
    pub fn on_login_accepted(&mut self) {
        self.stream_id_in = 1;
    }

    /// Process a cumulative ack of everything up to `last_stream_id_received`
    pub fn handle_stream_ack(&mut self, last_stream_id_received: StreamId) -> AckOutcome {
        self.last_device_to_server_stream_id_received = last_stream_id_received;

        let mut outcome = AckOutcome::default();
        while self
            .to_resend
            .front()
            .is_some_and(|packet| packet.stream_id <= last_stream_id_received)
        {
            let Some(packet) = self.to_resend.pop_front() else {
                break;
            };
            if let Some(id) = &packet.persistent_id {
                outcome.outgoing_ids_to_remove.push(id.clone());
            }
            outcome.acked.push(packet);
        }

        debug!(
            "Server acked {} outgoing messages, {} remaining unacked",
            outcome.acked.len(),
            self.to_resend.len()
        );

        // Every acked packet has stream id ≤ last, so confirming `last`
        // covers them and also prunes acks carried by pure control frames.
        outcome.incoming_ids_to_remove = self.handle_server_confirmed_receipt(last_stream_id_received);
        outcome
    }

    /// Process an explicit list of acknowledged outgoing persistent ids
    ///
    /// Ids are matched in order against the resend queue first, then against
    /// the head of the send queue. Resend entries the list skipped were not
    /// received by the server and go back to the front of the send queue.
    pub fn handle_selective_ack(&mut self, ids: &[PersistentId]) -> AckOutcome {
        let mut outcome = AckOutcome::default();

        let mut in_flight: Vec<Option<OutgoingPacket>> =
            self.to_resend.drain(..).map(Some).collect();
        let leftover = match_in_order(ids, &mut in_flight, &mut outcome);

        let mut queued: Vec<Option<OutgoingPacket>> = self.to_send.drain(..).map(Some).collect();
        let unmatched = match_in_order(&leftover, &mut queued, &mut outcome);
        self.to_send = queued.into_iter().flatten().collect();

        if !unmatched.is_empty() {
            warn!(
                "Selective ack listed {} ids matching no queued message: {:?}",
                unmatched.len(),
                unmatched
            );
        }
        outcome.unmatched = unmatched;

        // Packets matched in the send queue were not transmitted on this
        // connection and confirm nothing.
        for packet in &outcome.acked {
            if packet.stream_id == 0 {
                continue;
            }
            let confirmed = self.handle_server_confirmed_receipt(packet.stream_id);
            outcome.incoming_ids_to_remove.extend(confirmed);
        }

        let unconfirmed: Vec<OutgoingPacket> = in_flight.into_iter().flatten().collect();
        outcome.requeued = unconfirmed.len();
        for packet in unconfirmed.into_iter().rev() {
            self.requeue_front(packet);
        }

        debug!(
            "Server selectively acked {} messages, resending {}",
            outcome.acked.len(),
            outcome.requeued
        );
        outcome
    }

    /// Drop inbound acks the server has confirmed up to `device_stream_id`
    ///
    /// Returns the flattened persistent ids for one batched store delete.
    pub fn handle_server_confirmed_receipt(&mut self, device_stream_id: StreamId) -> Vec<PersistentId> {
        let confirmed: Vec<StreamId> = self
            .acked_server_ids
            .range(..=device_stream_id)
            .map(|(stream_id, _)| *stream_id)
            .collect();

        let mut ids = Vec::new();
        for stream_id in confirmed {
            if let Some(acked) = self.acked_server_ids.remove(&stream_id) {
                ids.extend(acked);
            }
        }

        if !ids.is_empty() {
            debug!("Server confirmed receipt of {} acknowledged server messages", ids.len());
        }
        ids
    }

    // ------------------------------------------------------------------------
    // Reconnect
    // ------------------------------------------------------------------------

    /// Rebuild for a new connection and produce its login frame
    ///
    /// Pending inbound acks (unacked and unconfirmed) are folded into the
    /// login request. In-flight packets return to the front of the send
    /// queue, then TTL 0 and expired packets are dropped from it.
    pub fn reset_for_login(
        &mut self,
        credentials: &DeviceCredentials,
        user_serial_numbers: &[i64],
        now: Timestamp,
    ) -> ReconnectOutcome {
        self.stream_id_in = 0;
        self.stream_id_out = 1;
        self.last_device_to_server_stream_id_received = 0;
        self.last_server_to_device_stream_id_received = 0;

        let unacked = core::mem::take(&mut self.unacked_server_ids);
        self.restored_unacked_server_ids.extend(unacked.into_values());
        let unconfirmed = core::mem::take(&mut self.acked_server_ids);
        for ids in unconfirmed.into_values() {
            self.restored_unacked_server_ids.extend(ids);
        }

        let mut login = LoginRequest::new(credentials, user_serial_numbers);
        let pending = core::mem::take(&mut self.restored_unacked_server_ids);
        login.received_persistent_ids = pending.clone();
        self.acked_server_ids.insert(self.stream_id_out, pending);

        while let Some(packet) = self.to_resend.pop_back() {
            self.requeue_front(packet);
        }

        let mut dropped = Vec::new();
        let mut kept = VecDeque::with_capacity(self.to_send.len());
        for packet in self.to_send.drain(..) {
            if packet.packet.ttl() > 0 && !packet.packet.has_ttl_expired(now) {
                kept.push_back(packet);
            } else {
                dropped.push(packet);
            }
        }
        self.to_send = kept;

        debug!(
            "Resetting state, with {} incoming acks pending and {} pending outgoing messages",
            login.received_persistent_ids.len(),
            self.to_send.len()
        );

        ReconnectOutcome { login, dropped }
    }
}

/// Ordered subsequence match of `ids` against `queue`
///
/// Matched packets are taken out of `queue` into `outcome`. Returns the ids
/// that found no match at or after the previous match position.
fn match_in_order(
    ids: &[PersistentId],
    queue: &mut [Option<OutgoingPacket>],
    outcome: &mut AckOutcome,
) -> Vec<PersistentId> {
    let mut cursor = 0;
    let mut leftover = Vec::new();

    for id in ids {
        let position = queue[cursor..].iter().position(|slot| {
            slot.as_ref()
                .and_then(|packet| packet.persistent_id.as_ref())
                == Some(id)
        });
        match position {
            Some(offset) => {
                let index = cursor + offset;
                cursor = index + 1;
                if let Some(packet) = queue[index].take() {
                    outcome.outgoing_ids_to_remove.push(id.clone());
                    outcome.acked.push(packet);
                }
            }
            None => leftover.push(id.clone()),
        }
    }
    leftover
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{DataMessageStanza, HeartbeatPing};

    fn persistent(n: u64) -> OutgoingPacket {
        let mut packet = McsPacket::DataMessage(DataMessageStanza {
            id: format!("m{n}"),
            category: "com.example".into(),
            ttl: 60,
            sent: 1,
            ..Default::default()
        });
        packet.set_persistent_id(PersistentId::from_timestamp(n));
        OutgoingPacket::new(packet)
    }

    fn ids(ns: &[u64]) -> Vec<PersistentId> {
        ns.iter().map(|n| PersistentId::from_timestamp(*n)).collect()
    }

    fn queue_ids<'a>(queue: impl Iterator<Item = &'a OutgoingPacket>) -> Vec<PersistentId> {
        queue.filter_map(|p| p.persistent_id.clone()).collect()
    }

    /// Tracker just after a fresh login with `n` persistent packets in flight
    fn tracker_with_in_flight(n: u64) -> AckTracker {
        let mut tracker = AckTracker::new();
        tracker.reset_for_login(&DeviceCredentials::new(1, 1), &[], Timestamp::from_secs(2));
        tracker.on_login_accepted();
        for i in 1..=n {
            tracker.transmit(persistent(i), Timestamp::from_secs(2));
        }
        tracker
    }

    #[test]
    fn test_transmit_assigns_stream_ids_and_queued_time() {
        let mut tracker = tracker_with_in_flight(0);
        let frame = tracker.transmit(persistent(1), Timestamp::from_secs(31));
        assert_eq!(tracker.stream_id_out(), 2);
        assert_eq!(frame.last_stream_id_received(), 1);
        match frame {
            McsPacket::DataMessage(message) => assert_eq!(message.queued, 30),
            other => panic!("unexpected frame {other:?}"),
        }
        assert_eq!(tracker.resend_queue_len(), 1);

        // Non-persistent frames are not retained
        tracker.transmit(
            OutgoingPacket::new(McsPacket::HeartbeatPing(HeartbeatPing::default())),
            Timestamp::from_secs(31),
        );
        assert_eq!(tracker.resend_queue_len(), 1);
    }

    #[test]
    fn test_piggy_backed_ack_moves_unacked_ids() {
        let mut tracker = tracker_with_in_flight(0);
        // login ack pending on stream 1
        assert!(tracker.acked_server_ids().contains_key(&1));

        tracker.record_incoming(Some(PersistentId::from("s1")));
        tracker.record_incoming(Some(PersistentId::from("s2")));
        assert_eq!(tracker.unacked_server_count(), 2);

        tracker.transmit(persistent(1), Timestamp::from_secs(2));
        assert_eq!(tracker.unacked_server_count(), 0);
        assert_eq!(
            tracker.acked_server_ids().get(&2),
            Some(&vec![PersistentId::from("s1"), PersistentId::from("s2")])
        );

        // Nothing new inbound: the next frame does not record another ack
        tracker.transmit(persistent(2), Timestamp::from_secs(2));
        assert!(!tracker.acked_server_ids().contains_key(&3));
    }

    #[test]
    fn test_stream_ack_pops_prefix() {
        let mut tracker = tracker_with_in_flight(3);
        // stream ids 2, 3, 4
        let outcome = tracker.handle_stream_ack(3);
        assert_eq!(queue_ids(outcome.acked.iter()), ids(&[1, 2]));
        assert_eq!(outcome.outgoing_ids_to_remove, ids(&[1, 2]));
        assert_eq!(tracker.resend_queue_len(), 1);
        assert_eq!(tracker.last_device_to_server_stream_id_received(), 3);
    }

    #[test]
    fn test_stream_ack_is_idempotent() {
        let mut tracker = tracker_with_in_flight(2);
        let first = tracker.handle_stream_ack(3);
        assert_eq!(first.acked.len(), 2);
        let second = tracker.handle_stream_ack(3);
        assert!(second.acked.is_empty());
        assert!(second.outgoing_ids_to_remove.is_empty());
        assert!(second.incoming_ids_to_remove.is_empty());
    }

    #[test]
    fn test_stream_ack_confirms_login_acks() {
        let mut tracker = AckTracker::new();
        tracker.restore(Vec::new(), vec![PersistentId::from("old")]);
        let outcome = tracker.reset_for_login(&DeviceCredentials::new(1, 1), &[], Timestamp::new(0));
        assert_eq!(outcome.login.received_persistent_ids, vec![PersistentId::from("old")]);

        let ack = tracker.handle_stream_ack(1);
        assert_eq!(ack.incoming_ids_to_remove, vec![PersistentId::from("old")]);
        assert!(tracker.acked_server_ids().is_empty());
    }

    #[test]
    fn test_selective_ack_requeues_gaps_in_order() {
        let mut tracker = tracker_with_in_flight(5);
        let outcome = tracker.handle_selective_ack(&ids(&[1, 2, 4]));

        assert_eq!(queue_ids(outcome.acked.iter()), ids(&[1, 2, 4]));
        assert_eq!(outcome.outgoing_ids_to_remove, ids(&[1, 2, 4]));
        assert!(outcome.unmatched.is_empty());
        assert_eq!(outcome.requeued, 2);
        assert_eq!(tracker.resend_queue_len(), 0);
        assert_eq!(queue_ids(tracker.send_queue()), ids(&[3, 5]));
    }

    #[test]
    fn test_selective_ack_falls_through_to_send_queue() {
        let mut tracker = tracker_with_in_flight(1);
        tracker.enqueue(persistent(2));
        tracker.enqueue(persistent(3));

        let outcome = tracker.handle_selective_ack(&ids(&[1, 2]));
        assert_eq!(queue_ids(outcome.acked.iter()), ids(&[1, 2]));
        assert_eq!(queue_ids(tracker.send_queue()), ids(&[3]));
    }

    #[test]
    fn test_selective_ack_of_requeued_packet_keeps_inbound_acks() {
        let mut tracker = tracker_with_in_flight(5);
        tracker.reset_for_login(&DeviceCredentials::new(1, 1), &[], Timestamp::from_secs(2));
        tracker.on_login_accepted();
        assert!(tracker.send_queue().all(|packet| packet.stream_id == 0));

        let first = tracker.pop_next_to_send().unwrap();
        tracker.transmit(first, Timestamp::from_secs(2)); // stream 2
        tracker.record_incoming(Some(PersistentId::from("s1")));
        let second = tracker.pop_next_to_send().unwrap();
        tracker.transmit(second, Timestamp::from_secs(2)); // stream 3, acks s1

        // m4 went out as stream 5 on the previous connection
        let outcome = tracker.handle_selective_ack(&ids(&[4]));
        assert_eq!(queue_ids(outcome.acked.iter()), ids(&[4]));
        assert!(outcome.incoming_ids_to_remove.is_empty());
        assert_eq!(
            tracker.acked_server_ids().get(&3),
            Some(&vec![PersistentId::from("s1")])
        );
        assert_eq!(queue_ids(tracker.send_queue()), ids(&[1, 2, 3, 5]));
        assert!(tracker.send_queue().all(|packet| packet.stream_id == 0));
    }

    #[test]
    fn test_selective_ack_unknown_ids_are_skipped() {
        let mut tracker = tracker_with_in_flight(2);
        let outcome = tracker.handle_selective_ack(&ids(&[9, 2]));
        assert_eq!(outcome.unmatched, ids(&[9]));
        assert_eq!(outcome.outgoing_ids_to_remove, ids(&[2]));
        assert_eq!(queue_ids(tracker.send_queue()), ids(&[1]));
    }

    #[test]
    fn test_server_confirmed_receipt_is_two_phase() {
        let mut tracker = tracker_with_in_flight(0);
        tracker.record_incoming(Some(PersistentId::from("a")));
        tracker.transmit(persistent(1), Timestamp::from_secs(2)); // stream 2
        tracker.record_incoming(Some(PersistentId::from("b")));
        tracker.transmit(persistent(2), Timestamp::from_secs(2)); // stream 3

        let confirmed = tracker.handle_server_confirmed_receipt(2);
        assert_eq!(confirmed, vec![PersistentId::from("a")]);
        assert_eq!(tracker.acked_server_ids().keys().copied().collect::<Vec<_>>(), vec![3]);
    }

    #[test]
    fn test_reset_replays_in_flight_and_folds_acks() {
        let mut tracker = tracker_with_in_flight(3);
        tracker.record_incoming(Some(PersistentId::from("s1")));
        tracker.record_incoming(Some(PersistentId::from("s2")));
        tracker.enqueue(persistent(4));

        let outcome = tracker.reset_for_login(&DeviceCredentials::new(1, 1), &[], Timestamp::from_secs(2));
        assert!(outcome.dropped.is_empty());
        assert_eq!(
            outcome.login.received_persistent_ids,
            vec![PersistentId::from("s1"), PersistentId::from("s2")]
        );
        assert_eq!(queue_ids(tracker.send_queue()), ids(&[1, 2, 3, 4]));
        assert_eq!(tracker.stream_id_in(), 0);
        assert_eq!(tracker.stream_id_out(), 1);
    }

    #[test]
    fn test_reset_drops_zero_ttl_and_expired() {
        let mut tracker = AckTracker::new();
        tracker.enqueue(OutgoingPacket::new(McsPacket::HeartbeatPing(HeartbeatPing::default())));
        tracker.enqueue(persistent(1)); // ttl 60, sent 1
        let outcome =
            tracker.reset_for_login(&DeviceCredentials::new(1, 1), &[], Timestamp::from_secs(100));
        assert_eq!(outcome.dropped.len(), 2);
        assert_eq!(tracker.send_queue_len(), 0);
    }
}
