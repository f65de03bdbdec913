//! The channel abstraction (§3, §6): the thing a pipeline is bound to.
//!
//! This crate does not implement a real channel backed by a socket — that is
//! explicitly out of scope (§1). [`Channel`] and [`Transport`] are the
//! contract a real implementation would satisfy; [`crate::embedded`] is the
//! only concrete implementation shipped here.

use std::net::SocketAddr;
use std::sync::Arc;

use crate::deferred::Deferred;
use crate::error::PipelineError;
use crate::message::Envelope;
use crate::pipeline::pipeline::Pipeline;
use crate::runtime::EventLoop;

/// Lifecycle states a channel steps through. A pipeline's lifetime equals its
/// owning channel's lifetime: once `Closed`, the channel (and its pipeline)
/// never reopen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Initialized,
    Registered,
    Active,
    Inactive,
    Closed,
}

impl ChannelState {
    pub fn is_active(self) -> bool {
        matches!(self, ChannelState::Active)
    }

    pub fn is_closed(self) -> bool {
        matches!(self, ChannelState::Closed)
    }
}

/// Owns exactly one pipeline for its lifetime (§3).
pub trait Channel: Send + Sync {
    fn pipeline(&self) -> Pipeline;
    fn event_loop(&self) -> Arc<dyn EventLoop>;
    fn transport(&self) -> Arc<dyn Transport>;
    fn state(&self) -> ChannelState;
    fn local_address(&self) -> Option<SocketAddr>;
    fn remote_address(&self) -> Option<SocketAddr>;

    /// Records an inbound message that reached the tail unhandled. The
    /// default discards it, per §4.5; the embedded driver overrides this to
    /// make the behavior observable in tests.
    fn record_inbound(&self, _msg: Envelope) {}

    /// Records an error that reached the tail unhandled, as this channel's
    /// last error (§7). Every channel implementation must maintain this.
    fn record_last_error(&self, error: PipelineError);

    /// Returns `Err` with the recorded last error and clears it, or `Ok(())`
    /// if none was recorded.
    fn throw_if_error_caught(&self) -> Result<(), PipelineError>;
}

/// The capability set the head sentinel consumes (§6). Each operation
/// returns a deferred; the pipeline makes no assumption about how a
/// transport implements them.
pub trait Transport: Send + Sync {
    fn register(&self) -> Deferred<()>;
    fn bind(&self, addr: SocketAddr) -> Deferred<()>;
    fn connect(&self, addr: SocketAddr) -> Deferred<()>;
    fn write(&self, msg: Envelope) -> Deferred<()>;
    fn flush(&self) -> Deferred<()>;
    fn read_request(&self) -> Deferred<()>;
    fn close(&self) -> Deferred<()>;
    fn local_address(&self) -> Option<SocketAddr>;
    fn remote_address(&self) -> Option<SocketAddr>;
}
