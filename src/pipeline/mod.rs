//! The channel pipeline: an ordered, bidirectional chain of handlers for a
//! single channel (§1-§5).
//!
//! Read in this order:
//! 1. [`handler`] — the `Handler` contract every pipeline participant implements.
//! 2. [`context`] — the per-handler node and its dispatch surface.
//! 3. [`sentinel`] — the head/tail contexts that bracket every pipeline.
//! 4. [`pipeline`] — the mutable list itself: mutation API, lookup, dispatch.
//! 5. [`channel`] — the `Channel`/`Transport` contract a pipeline is bound to.

pub mod channel;
pub mod context;
pub mod handler;
mod pipeline;
pub(crate) mod sentinel;

pub use channel::{Channel, ChannelState, Transport};
pub use context::HandlerContext;
pub use handler::{Handler, RemovalToken};
pub use pipeline::{BulkPosition, Pipeline, Position};
