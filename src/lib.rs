//! conduit-core: the channel pipeline of an event-driven, non-blocking
//! network I/O framework.
//!
//! A [`pipeline::Pipeline`] is an ordered, bidirectional chain of
//! user-supplied [`pipeline::Handler`]s through which every inbound and
//! outbound event for a single [`pipeline::Channel`] flows. This crate owns
//! that chain: its data structure, its mutation API, its handler lifecycle,
//! and the asynchronous completion primitive ([`deferred::Deferred`]) that
//! mutations are reported through. It does not own a real socket transport,
//! selector, or event-loop implementation — those are external
//! collaborators behind the [`pipeline::Transport`] and [`runtime::EventLoop`]
//! traits. The only concrete implementation shipped here is the
//! [`embedded`] driver, which exists to make pipeline semantics observable
//! in tests without a real network stack.
//!
//! Start reading at [`pipeline`]: [`pipeline::Handler`] is the contract
//! user code implements, [`pipeline::HandlerContext`] is the per-handler
//! dispatch surface, and [`pipeline::Pipeline`] is the list itself.

pub mod config;
pub mod deferred;
pub mod embedded;
pub mod error;
pub mod message;
pub mod observability;
pub mod pipeline;
pub mod runtime;

pub use config::PipelineConfig;
pub use deferred::Deferred;
pub use embedded::{EmbeddedChannel, EmbeddedTransport};
pub use error::{PipelineError, Result};
pub use message::{Envelope, UserEvent};
pub use pipeline::{BulkPosition, Channel, ChannelState, Handler, HandlerContext, Pipeline, Position, RemovalToken, Transport};
pub use runtime::{EmbeddedEventLoop, EventLoop};
