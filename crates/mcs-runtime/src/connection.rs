//! Connection factory backed by the effect channel
//!
//! Requests from the client become [`Effect`]s for whichever transport is
//! subscribed. Reachability is whatever the transport last reported through
//! [`crate::Event::ReachabilityChanged`].

use mcs_core::{ConnectionFactory, ConnectionResetReason, McsPacket};
use tracing::{trace, warn};

use crate::channel::{Effect, EffectSender};

#[derive(Debug)]
pub struct ChannelConnection {
    effect_sender: EffectSender,
    reachable: bool,
    effects_sent: u64,
}

impl ChannelConnection {
    pub fn new(effect_sender: EffectSender) -> Self {
        Self {
            effect_sender,
            reachable: false,
            effects_sent: 0,
        }
    }

    pub fn set_reachable(&mut self, reachable: bool) {
        self.reachable = reachable;
    }

    pub fn effects_sent(&self) -> u64 {
        self.effects_sent
    }

    /// Publish an effect; with no transport subscribed it is dropped.
    ///
    /// The effect channel is a broadcast ring. A transport that falls behind
    /// by more than its capacity misses the oldest effects, which
    /// [`crate::TransportHandle::next_effect`] reports as a warning.
    pub fn publish(&mut self, effect: Effect) {
        trace!("Publishing effect {:?}", effect);
        match self.effect_sender.send(effect) {
            Ok(_) => self.effects_sent += 1,
            Err(_) => warn!("No transport subscribed, dropping effect"),
        }
    }
}

impl ConnectionFactory for ChannelConnection {
    fn connect(&mut self) {
        self.publish(Effect::Connect);
    }

    fn is_endpoint_reachable(&self) -> bool {
        self.reachable
    }

    fn send(&mut self, packet: McsPacket) {
        self.publish(Effect::SendPacket(packet));
    }

    fn signal_connection_reset(&mut self, reason: ConnectionResetReason) {
        self.reachable = false;
        self.publish(Effect::ResetConnection(reason));
    }
}
