//! Seams between the pipeline and the messaging transport
//!
//! The transport owns the network loop. It hands each connection event and
//! each delivery to a [`MessageHandler`], lending itself as a [`Transport`] so
//! the handler can subscribe and publish from inside the callback. Calls are
//! strictly sequential: one event is fully handled before the next starts.

use core::fmt::Display;

use crate::pipeline::{DisconnectReason, Disposition};

/// The two primitives the gateway needs from a pub/sub broker
pub trait Transport {
    /// Transport failure, logged by the pipeline and otherwise swallowed
    type Error: Display;

    /// Register interest in a topic filter (may contain wildcards)
    fn subscribe(&mut self, filter: &str) -> Result<(), Self::Error>;

    /// Fire-and-forget publish, no acknowledgment is awaited
    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), Self::Error>;
}

/// Receiver of transport events
pub trait MessageHandler {
    /// A connection attempt is starting
    fn on_connecting(&mut self);

    /// The broker accepted the session. Subscriptions must be (re)issued here
    fn on_connected<T: Transport>(&mut self, transport: &mut T);

    /// The session ended, cleanly or not
    fn on_disconnected(&mut self, reason: DisconnectReason);

    /// One delivery from the broker
    fn on_message<T: Transport>(
        &mut self,
        transport: &mut T,
        topic: &str,
        payload: &[u8],
    ) -> Disposition;
}
