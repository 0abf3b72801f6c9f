//! Demultiplexing inbound frames by type tag (§4.1 design note: "variant
//! dispatch in RequestHandler").
//!
//! Two shapes cover the whole spec: `SingleReplyRequestHandler` awaits
//! exactly one tag (the forward path, §4.2 step 4), and a tag-keyed
//! handler table (`HandlerTable`) replaces the original's virtual
//! dispatch hierarchy for the reverse path (§4.5), mapping tag to a
//! closure over the decoded request body.

use std::collections::HashMap;

use crate::wire::{DecodeError, ReplyView, Tag, decode_reply};

/// Awaits one specific reply tag and rejects anything else as a protocol
/// error, never disconnecting the pool over it (§7 "Protocol").
#[derive(Debug)]
pub struct SingleReplyRequestHandler {
    expected: Tag,
}

impl SingleReplyRequestHandler {
    pub fn new(expected: Tag) -> Self {
        SingleReplyRequestHandler { expected }
    }

    pub fn decode<'a>(&self, frame: &'a [u8]) -> Result<ReplyView<'a>, DecodeError> {
        decode_reply(frame, self.expected)
    }
}

/// A tag-keyed table of handlers for server-originated requests, used by
/// the notification thread. Built once at `FileSystem` construction.
pub struct HandlerTable<H> {
    handlers: HashMap<Tag, Box<dyn Fn(&H, &[u8]) -> Vec<u8> + Send + Sync>>,
}

impl<H> std::fmt::Debug for HandlerTable<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerTable").field("registered", &self.handlers.len()).finish()
    }
}

impl<H> HandlerTable<H> {
    pub fn new() -> Self {
        HandlerTable { handlers: HashMap::new() }
    }

    pub fn register(
        &mut self,
        tag: Tag,
        handler: impl Fn(&H, &[u8]) -> Vec<u8> + Send + Sync + 'static,
    ) {
        self.handlers.insert(tag, Box::new(handler));
    }

    /// Dispatch a decoded frame body to its registered handler, returning
    /// the reply frame bytes to send back. `None` means the tag has no
    /// registered reverse handler (treated as an unknown command upstream).
    pub fn dispatch(&self, ctx: &H, tag: Tag, body: &[u8]) -> Option<Vec<u8>> {
        self.handlers.get(&tag).map(|f| f(ctx, body))
    }
}

impl<H> Default for HandlerTable<H> {
    fn default() -> Self {
        Self::new()
    }
}
