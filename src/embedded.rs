//! The embedded driver (C6): an in-memory channel and loop used to make
//! pipeline semantics observable in tests, without a real socket, selector,
//! or transport.
//!
//! [`EmbeddedChannel`] binds a [`Pipeline`] to an [`EmbeddedEventLoop`] and an
//! [`EmbeddedTransport`] that simply appends to in-memory queues instead of
//! touching a socket. `write_inbound`/`read_inbound` and
//! `write_outbound`/`read_outbound` are the seams a test scenario uses to
//! inject and inspect traffic (§6, §8).

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, Weak};

use crate::config::PipelineConfig;
use crate::deferred::Deferred;
use crate::error::PipelineError;
use crate::message::Envelope;
use crate::observability::{noop, Logger};
use crate::pipeline::{Channel, ChannelState, Handler, Pipeline, Position, Transport};
use crate::runtime::{EmbeddedEventLoop, EventLoop};

/// The transport an [`EmbeddedChannel`]'s head sentinel talks to: writes go
/// straight into an in-memory queue instead of a socket.
pub struct EmbeddedTransport {
    event_loop: Arc<dyn EventLoop>,
    outbound: Arc<Mutex<VecDeque<Envelope>>>,
    local_address: Mutex<Option<SocketAddr>>,
    remote_address: Mutex<Option<SocketAddr>>,
}

impl EmbeddedTransport {
    fn new(event_loop: Arc<dyn EventLoop>, outbound: Arc<Mutex<VecDeque<Envelope>>>) -> Self {
        Self {
            event_loop,
            outbound,
            local_address: Mutex::new(None),
            remote_address: Mutex::new(None),
        }
    }
}

impl Transport for EmbeddedTransport {
    fn register(&self) -> Deferred<()> {
        Deferred::ready(Arc::clone(&self.event_loop), Ok(()))
    }

    fn bind(&self, addr: SocketAddr) -> Deferred<()> {
        *self.local_address.lock().unwrap() = Some(addr);
        Deferred::ready(Arc::clone(&self.event_loop), Ok(()))
    }

    fn connect(&self, addr: SocketAddr) -> Deferred<()> {
        *self.remote_address.lock().unwrap() = Some(addr);
        Deferred::ready(Arc::clone(&self.event_loop), Ok(()))
    }

    fn write(&self, msg: Envelope) -> Deferred<()> {
        self.outbound.lock().unwrap().push_back(msg);
        Deferred::ready(Arc::clone(&self.event_loop), Ok(()))
    }

    fn flush(&self) -> Deferred<()> {
        Deferred::ready(Arc::clone(&self.event_loop), Ok(()))
    }

    fn read_request(&self) -> Deferred<()> {
        Deferred::ready(Arc::clone(&self.event_loop), Ok(()))
    }

    fn close(&self) -> Deferred<()> {
        Deferred::ready(Arc::clone(&self.event_loop), Ok(()))
    }

    fn local_address(&self) -> Option<SocketAddr> {
        *self.local_address.lock().unwrap()
    }

    fn remote_address(&self) -> Option<SocketAddr> {
        *self.remote_address.lock().unwrap()
    }
}

/// An in-memory channel: binds a real [`Pipeline`] to an
/// [`EmbeddedEventLoop`] and an [`EmbeddedTransport`], and drives both
/// deterministically from a single thread.
///
/// An in-memory channel for driving a pipeline without a real socket: handlers supplied
/// to [`EmbeddedChannel::new`] are installed, the channel is registered and
/// activated, and the event loop is drained after every driving operation so
/// a test never needs to reach for `EmbeddedEventLoop::run` directly.
pub struct EmbeddedChannel {
    event_loop: Arc<EmbeddedEventLoop>,
    pipeline: Pipeline,
    transport: Arc<EmbeddedTransport>,
    state: Mutex<ChannelState>,
    inbound: Mutex<VecDeque<Envelope>>,
    outbound: Arc<Mutex<VecDeque<Envelope>>>,
    last_error: Mutex<Option<PipelineError>>,
    finished: Mutex<bool>,
}

impl EmbeddedChannel {
    /// Builds a channel whose pipeline has `handlers` installed, in order,
    /// at construction time, then activates it. Equivalent to
    /// `with_config(handlers, PipelineConfig::default(), noop())`.
    pub fn new(handlers: Vec<Arc<dyn Handler>>) -> Arc<Self> {
        Self::with_config(handlers, PipelineConfig::default(), noop())
    }

    pub fn with_config(handlers: Vec<Arc<dyn Handler>>, config: PipelineConfig, logger: Arc<dyn Logger>) -> Arc<Self> {
        let event_loop = Arc::new(EmbeddedEventLoop::new());
        let outbound = Arc::new(Mutex::new(VecDeque::new()));
        let transport = Arc::new(EmbeddedTransport::new(
            Arc::clone(&event_loop) as Arc<dyn EventLoop>,
            Arc::clone(&outbound),
        ));
        let pipeline = Pipeline::with_config(Arc::clone(&event_loop) as Arc<dyn EventLoop>, config, logger);

        let channel = Arc::new_cyclic(|weak: &Weak<EmbeddedChannel>| {
            let channel_weak: Weak<dyn Channel> = weak.clone();
            pipeline.attach_channel(channel_weak);
            EmbeddedChannel {
                event_loop: Arc::clone(&event_loop),
                pipeline: pipeline.clone(),
                transport,
                state: Mutex::new(ChannelState::Initialized),
                inbound: Mutex::new(VecDeque::new()),
                outbound,
                last_error: Mutex::new(None),
                finished: Mutex::new(false),
            }
        });

        *channel.state.lock().unwrap() = ChannelState::Registered;
        for handler in handlers {
            channel.pipeline.add(handler, None, Position::Last);
        }
        event_loop.run();
        *channel.state.lock().unwrap() = ChannelState::Active;
        channel.pipeline.fire_channel_active();
        event_loop.run();
        channel
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Injects `msg` as an inbound read, followed by `channel_read_complete`,
    /// and drains the loop. Returns whether anything reached the tail.
    pub fn write_inbound(&self, msg: Envelope) -> bool {
        let before = self.inbound.lock().unwrap().len();
        self.pipeline.fire_channel_read(msg);
        self.pipeline.fire_channel_read_complete();
        self.event_loop.run();
        self.inbound.lock().unwrap().len() > before
    }

    /// Drains the next message that reached the tail unhandled.
    pub fn read_inbound(&self) -> Option<Envelope> {
        self.inbound.lock().unwrap().pop_front()
    }

    /// Writes and flushes `msg` through the outbound chain and drains the
    /// loop. Returns whether anything reached the transport (head).
    pub fn write_outbound(&self, msg: Envelope) -> bool {
        let before = self.outbound.lock().unwrap().len();
        self.pipeline.write_and_flush(msg, None);
        self.event_loop.run();
        self.outbound.lock().unwrap().len() > before
    }

    /// Drains the next message that reached the transport going outward.
    pub fn read_outbound(&self) -> Option<Envelope> {
        self.outbound.lock().unwrap().pop_front()
    }

    /// Tears the channel down: fires `channel_inactive`, marks the channel
    /// closed, forces every remaining handler through the formal-removal
    /// path exactly once, and drains the loop. Returns whether either queue
    /// held unread messages at the moment of teardown.
    ///
    /// Fails with `already_closed` if called a second time.
    pub fn finish(&self) -> Result<bool, PipelineError> {
        let mut finished = self.finished.lock().unwrap();
        if *finished {
            return Err(PipelineError::already_closed());
        }
        *finished = true;
        drop(finished);

        let had_pending =
            !self.inbound.lock().unwrap().is_empty() || !self.outbound.lock().unwrap().is_empty();
        *self.state.lock().unwrap() = ChannelState::Inactive;
        self.pipeline.fire_channel_inactive();
        *self.state.lock().unwrap() = ChannelState::Closed;
        self.pipeline.teardown();
        self.event_loop.run();
        Ok(had_pending)
    }

    /// Synchronously runs every pending task on the embedded loop. Exposed
    /// for scenarios that need to step the loop without driving the channel.
    pub fn run_pending_tasks(&self) {
        self.event_loop.run();
    }
}

impl Channel for EmbeddedChannel {
    fn pipeline(&self) -> Pipeline {
        self.pipeline.clone()
    }

    fn event_loop(&self) -> Arc<dyn EventLoop> {
        Arc::clone(&self.event_loop) as Arc<dyn EventLoop>
    }

    fn transport(&self) -> Arc<dyn Transport> {
        Arc::clone(&self.transport) as Arc<dyn Transport>
    }

    fn state(&self) -> ChannelState {
        *self.state.lock().unwrap()
    }

    fn local_address(&self) -> Option<SocketAddr> {
        self.transport.local_address()
    }

    fn remote_address(&self) -> Option<SocketAddr> {
        self.transport.remote_address()
    }

    fn record_inbound(&self, msg: Envelope) {
        self.inbound.lock().unwrap().push_back(msg);
    }

    fn record_last_error(&self, error: PipelineError) {
        *self.last_error.lock().unwrap() = Some(error);
    }

    fn throw_if_error_caught(&self) -> Result<(), PipelineError> {
        match self.last_error.lock().unwrap().take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
