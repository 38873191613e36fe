//! Property-based tests for acknowledgment reconciliation
//!
//! These tests verify that no combination of cumulative and selective acks
//! loses, duplicates or reorders outgoing messages.

use mcs_core::{ClientEvent, McsPacket, MessageSendStatus, PersistentId};
use proptest::prelude::*;
use std::collections::HashSet;

mod test_utils;
use test_utils::*;

fn sent_ids(events: &[ClientEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(ClientEvent::as_send_status)
        .filter(|report| report.status == MessageSendStatus::Sent)
        .map(|report| report.message_id.clone())
        .collect()
}

fn stream_ack(last: u32) -> McsPacket {
    let mut ack = McsPacket::IqStanza(mcs_core::IqStanza::stream_ack());
    ack.set_last_stream_id_received(last);
    ack
}

/// Client connected with `count` persistent messages in flight, named m0..
fn client_with_in_flight(count: usize) -> (TestClient, MockTimeSource) {
    let time = MockTimeSource::default();
    let mut client = connected_client(&time);
    for i in 0..count {
        client.send_message(data_message(&format!("m{i}"), "app", 600, &time));
    }
    client.drain_events();
    (client, time)
}

proptest! {
    /// Property: cumulative acks confirm messages in send order, each once
    #[test]
    fn stream_acks_confirm_in_order(
        count in 1usize..30,
        acks in prop::collection::vec(0u32..40, 1..10),
    ) {
        let (mut client, _time) = client_with_in_flight(count);
        let mut confirmed = Vec::new();
        for last in acks {
            client.on_packet_received(stream_ack(last));
            confirmed.extend(sent_ids(&client.drain_events()));
        }

        let expected: Vec<String> = (0..count).map(|i| format!("m{i}")).collect();
        prop_assert_eq!(&confirmed[..], &expected[..confirmed.len()]);
        prop_assert_eq!(confirmed.len() + client.resend_queue_len(), count);
    }

    /// Property: repeating an ack never produces further reports
    #[test]
    fn stream_ack_is_idempotent(count in 1usize..20, last in 1u32..25) {
        let (mut client, _time) = client_with_in_flight(count);
        client.on_packet_received(stream_ack(last));
        client.drain_events();
        let remaining = client.resend_queue_len();

        client.on_packet_received(stream_ack(last));
        prop_assert!(sent_ids(&client.drain_events()).is_empty());
        prop_assert_eq!(client.resend_queue_len(), remaining);
    }

    /// Property: after a selective ack and a reconnect every message is
    /// either confirmed or queued for resend, exactly once and in order
    #[test]
    fn selective_ack_then_reconnect_loses_nothing(
        mask in prop::collection::vec(any::<bool>(), 1..20),
    ) {
        let (mut client, _time) = client_with_in_flight(mask.len());
        let in_flight = in_flight_ids(&client);
        let acked: Vec<PersistentId> = in_flight
            .iter()
            .zip(&mask)
            .filter(|(_, keep)| **keep)
            .map(|(id, _)| id.clone())
            .collect();

        client.on_packet_received(selective_ack(acked.clone()));
        client.drain_events();
        client.connection_mut().reachable = false;
        client.on_connection_opening().unwrap();

        let queued = client.queued_ids();
        let expected: Vec<PersistentId> = in_flight
            .iter()
            .filter(|id| !acked.contains(id))
            .cloned()
            .collect();
        prop_assert_eq!(&queued, &expected);

        let queued_set: HashSet<_> = queued.iter().collect();
        prop_assert!(acked.iter().all(|id| !queued_set.contains(id)));
        for id in &acked {
            prop_assert!(!client.store().contains_outgoing(id));
        }
        for id in &queued {
            prop_assert!(client.store().contains_outgoing(id));
        }
    }
}
