//! Message dispatch: outbound send path and inbound handler table
//!
//! Local calls reach the wire through an [`Outbound`] sink. Inbound payloads
//! are routed through a [`Dispatcher`], a fixed table indexed by message type
//! that calls the same registry/coordinator methods the local path uses, but
//! with [`NoBroadcast`] so that received mutations are never re-sent.

use crate::network::{Delivery, Transport};
use log::{debug, warn};
use shared::{DecodeError, Message, MessageType, PayloadReader};

/// Where locally originated messages go.
pub trait Outbound {
    fn send(&mut self, message: Message);
}

/// Sink used when applying a received message: nothing is re-broadcast.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoBroadcast;

impl Outbound for NoBroadcast {
    fn send(&mut self, _message: Message) {}
}

/// Collects messages instead of sending them.
impl Outbound for Vec<Message> {
    fn send(&mut self, message: Message) {
        self.push(message);
    }
}

/// Encodes messages and hands them to a transport.
///
/// Every message type goes through the same connection check; while
/// disconnected, sends are skipped.
#[derive(Debug)]
pub struct MessageSender<T: Transport> {
    transport: T,
    sent: u64,
    skipped: u64,
}

impl<T: Transport> MessageSender<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            sent: 0,
            skipped: 0,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn local_peer_id(&self) -> i64 {
        self.transport.local_peer_id()
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Messages handed to the transport so far.
    pub fn sent(&self) -> u64 {
        self.sent
    }

    /// Messages dropped because the transport was not connected.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }
}

impl<T: Transport> Outbound for MessageSender<T> {
    fn send(&mut self, message: Message) {
        if !self.transport.is_connected() {
            self.skipped += 1;
            debug!("Not connected, skipping {:?}", message.message_type());
            return;
        }

        let payload = match message.encode(self.transport.local_peer_id()) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Failed to encode {:?}: {}", message.message_type(), e);
                return;
            }
        };

        match self.transport.broadcast(payload, Delivery::AVATAR) {
            Ok(()) => self.sent += 1,
            Err(e) => warn!("Failed to broadcast {:?}: {}", message.message_type(), e),
        }
    }
}

/// Handler invoked with the context, the sender's peer id and the message.
pub type Handler<C> = fn(&mut C, i64, Message);

/// A decoded payload together with the handler registered for its type.
pub struct Routed<C> {
    pub handler: Handler<C>,
    pub sender: i64,
    pub message: Message,
}

/// Fixed table from message type to handler. Unregistered types are no-ops.
pub struct Dispatcher<C> {
    handlers: [Option<Handler<C>>; MessageType::COUNT],
}

impl<C> Default for Dispatcher<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> Dispatcher<C> {
    pub fn new() -> Self {
        Self {
            handlers: [None; MessageType::COUNT],
        }
    }

    pub fn register(&mut self, ty: MessageType, handler: Handler<C>) -> &mut Self {
        self.handlers[ty.index()] = Some(handler);
        self
    }

    pub fn unregister(&mut self, ty: MessageType) {
        self.handlers[ty.index()] = None;
    }

    pub fn is_registered(&self, ty: MessageType) -> bool {
        self.handlers[ty.index()].is_some()
    }

    pub fn registered_count(&self) -> usize {
        self.handlers.iter().filter(|h| h.is_some()).count()
    }

    /// Decodes `payload` and pairs it with its handler.
    ///
    /// Returns `Ok(None)` for tags outside the catalog and for types with no
    /// handler; those payloads are not decoded past the tag.
    pub fn route(&self, payload: &[u8]) -> Result<Option<Routed<C>>, DecodeError> {
        let mut reader = PayloadReader::new(payload);
        let tag = reader.read_u8()?;

        let Some(ty) = MessageType::from_tag(tag) else {
            debug!("Ignoring unknown message tag {}", tag);
            return Ok(None);
        };
        let Some(handler) = self.handlers[ty.index()] else {
            debug!("No handler for {:?}", ty);
            return Ok(None);
        };

        let sender = reader.read_i64()?;
        let message = Message::decode_body(ty, &mut reader)?;

        Ok(Some(Routed {
            handler,
            sender,
            message,
        }))
    }

    /// Routes and runs the handler against `ctx`. Returns whether a handler ran.
    ///
    /// Use [`Dispatcher::route`] directly when the dispatcher lives inside the
    /// context it dispatches to.
    pub fn dispatch(&self, ctx: &mut C, payload: &[u8]) -> Result<bool, DecodeError> {
        match self.route(payload)? {
            Some(routed) => {
                (routed.handler)(ctx, routed.sender, routed.message);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
