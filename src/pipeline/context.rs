//! Handler context (C3): the pipeline's per-handler node and the dispatch
//! surface a handler's callbacks receive.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::deferred::Deferred;
use crate::error::PipelineError;
use crate::message::{Envelope, UserEvent};
use crate::observability::{LogRecord, Logger, Severity};
use crate::pipeline::channel::Channel;
use crate::pipeline::handler::{Handler, RemovalToken};
use crate::pipeline::pipeline::PipelineInner;
use crate::runtime::EventLoop;

/// A context's lifecycle state (§3). `RemovalPending` is a sub-state of
/// `Added`: the context is still linked and still dispatching while a
/// removable handler's formal-remove handshake is outstanding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ContextState {
    Init,
    Added,
    RemovalPending,
    Removed,
}

impl ContextState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => ContextState::Init,
            1 => ContextState::Added,
            2 => ContextState::RemovalPending,
            _ => ContextState::Removed,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            ContextState::Init => 0,
            ContextState::Added => 1,
            ContextState::RemovalPending => 2,
            ContextState::Removed => 3,
        }
    }
}

/// Distinguishes the two permanent sentinels from ordinary handler contexts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NodeKind {
    Head,
    Tail,
    Handler,
}

/// One node in the pipeline's ordered list: a stable identity, the handler it
/// currently carries (if any), and the state machine from §3.
pub struct HandlerContext {
    pub(crate) id: u64,
    pub(crate) name: String,
    pub(crate) kind: NodeKind,
    pub(crate) handler: Mutex<Option<Arc<dyn Handler>>>,
    state: AtomicU8,
    pending_token: Mutex<Option<u64>>,
    pub(crate) pipeline: Weak<PipelineInner>,
    stale_prev: Mutex<Option<u64>>,
    stale_next: Mutex<Option<u64>>,
}

impl HandlerContext {
    pub(crate) fn new(
        id: u64,
        name: String,
        kind: NodeKind,
        handler: Arc<dyn Handler>,
        pipeline: Weak<PipelineInner>,
    ) -> Self {
        Self {
            id,
            name,
            kind,
            handler: Mutex::new(Some(handler)),
            state: AtomicU8::new(ContextState::Init.as_u8()),
            pending_token: Mutex::new(None),
            pipeline,
            stale_prev: Mutex::new(None),
            stale_next: Mutex::new(None),
        }
    }

    pub(crate) fn state(&self) -> ContextState {
        ContextState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: ContextState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    pub(crate) fn is_sentinel(&self) -> bool {
        !matches!(self.kind, NodeKind::Handler)
    }

    pub(crate) fn mint_removal_token(&self) -> RemovalToken {
        let token_id = {
            let pipeline = self.pipeline_arc();
            pipeline.next_token_id()
        };
        *self.pending_token.lock().unwrap() = Some(token_id);
        RemovalToken {
            context_id: self.id,
            token_id,
        }
    }

    pub(crate) fn take_handler(&self) -> Option<Arc<dyn Handler>> {
        self.handler.lock().unwrap().take()
    }

    pub(crate) fn current_handler(&self) -> Option<Arc<dyn Handler>> {
        self.handler.lock().unwrap().clone()
    }

    /// Records this context's neighbors at the moment it is unlinked, so a
    /// handler firing events from within its own `handler_removed` callback
    /// still reaches its former neighbor (P8) even though this context no
    /// longer appears in the pipeline's list.
    pub(crate) fn set_stale_links(&self, prev_id: Option<u64>, next_id: Option<u64>) {
        *self.stale_prev.lock().unwrap() = prev_id;
        *self.stale_next.lock().unwrap() = next_id;
    }

    pub(crate) fn stale_prev(&self) -> Option<u64> {
        *self.stale_prev.lock().unwrap()
    }

    pub(crate) fn stale_next(&self) -> Option<u64> {
        *self.stale_next.lock().unwrap()
    }

    /// Invalidates any outstanding formal-removal token, e.g. because
    /// channel teardown force-completed the removal (§4.4 step 5).
    pub(crate) fn invalidate_pending_token(&self) {
        *self.pending_token.lock().unwrap() = None;
    }

    pub(crate) fn logger(&self) -> Arc<dyn Logger> {
        self.pipeline_arc().logger()
    }

    pub(crate) fn pipeline_config_warn_on_discarded_inbound(&self) -> bool {
        self.pipeline_arc().config().warn_on_discarded_inbound
    }

    fn pipeline_arc(&self) -> Arc<PipelineInner> {
        self.pipeline
            .upgrade()
            .expect("context outlived its pipeline")
    }

    // ---- public introspection ---------------------------------------------

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handler(&self) -> Option<Arc<dyn Handler>> {
        self.current_handler()
    }

    pub fn channel(&self) -> Option<Arc<dyn Channel>> {
        self.pipeline_arc().channel()
    }

    pub fn event_loop(&self) -> Arc<dyn EventLoop> {
        self.pipeline_arc().event_loop()
    }

    // ---- event forwarders (§4.2) -------------------------------------------

    pub fn fire_channel_active(&self) {
        self.pipeline_arc().dispatch_channel_active(self.id);
    }

    pub fn fire_channel_inactive(&self) {
        self.pipeline_arc().dispatch_channel_inactive(self.id);
    }

    pub fn fire_channel_read(&self, msg: Envelope) {
        self.pipeline_arc().dispatch_channel_read(self.id, msg);
    }

    pub fn fire_channel_read_complete(&self) {
        self.pipeline_arc().dispatch_channel_read_complete(self.id);
    }

    pub fn fire_channel_writability_changed(&self) {
        self.pipeline_arc()
            .dispatch_channel_writability_changed(self.id);
    }

    pub fn fire_user_inbound_event(&self, event: UserEvent) {
        self.pipeline_arc().dispatch_user_inbound_event(self.id, event);
    }

    pub fn fire_error_caught(&self, error: PipelineError) {
        self.pipeline_arc().dispatch_error_caught(self.id, error);
    }

    // ---- outbound initiators (§4.2) ----------------------------------------

    pub fn bind(&self, addr: SocketAddr, promise: Option<Deferred<()>>) -> Deferred<()> {
        self.pipeline_arc().dispatch_bind(self.id, addr, promise)
    }

    pub fn connect(&self, addr: SocketAddr, promise: Option<Deferred<()>>) -> Deferred<()> {
        self.pipeline_arc().dispatch_connect(self.id, addr, promise)
    }

    pub fn write(&self, msg: Envelope, promise: Option<Deferred<()>>) -> Deferred<()> {
        self.pipeline_arc().dispatch_write(self.id, msg, promise)
    }

    pub fn flush(&self) {
        self.pipeline_arc().dispatch_flush(self.id);
    }

    pub fn write_and_flush(&self, msg: Envelope, promise: Option<Deferred<()>>) -> Deferred<()> {
        let result = self.write(msg, promise);
        self.flush();
        result
    }

    pub fn read(&self) {
        self.pipeline_arc().dispatch_read(self.id);
    }

    pub fn close(&self, promise: Option<Deferred<()>>) -> Deferred<()> {
        self.pipeline_arc().dispatch_close(self.id, promise)
    }

    pub fn trigger_user_outbound_event(
        &self,
        event: UserEvent,
        promise: Option<Deferred<()>>,
    ) -> Deferred<()> {
        self.pipeline_arc()
            .dispatch_trigger_user_outbound_event(self.id, event, promise)
    }

    // ---- formal removal (§4.4) ---------------------------------------------

    /// Completes a formal-removal handshake previously begun by the pipeline.
    /// Fails with a programmer error if `token` does not match the token
    /// most recently minted for this context, or if no handshake is in
    /// progress.
    pub fn leave_pipeline(&self, token: RemovalToken) -> Result<(), PipelineError> {
        if token.context_id != self.id {
            return Err(crate::programmer_error!(
                "removal token minted for context {} redeemed at context {}",
                token.context_id,
                self.id
            ));
        }
        let mut pending = self.pending_token.lock().unwrap();
        match *pending {
            None => {
                // Teardown already redeemed this context's handshake; a
                // later call is a documented no-op (§4.4 step 5).
                Ok(())
            }
            Some(expected) if expected == token.token_id => {
                *pending = None;
                drop(pending);
                self.logger().log(
                    &LogRecord::new(Severity::Debug, "conduit_core::pipeline::context", "formal removal redeemed")
                        .with_handler(&self.name),
                );
                self.pipeline_arc().complete_formal_removal(self.id);
                Ok(())
            }
            Some(_) => Err(crate::programmer_error!(
                "stale removal token redeemed at context {}",
                self.id
            )),
        }
    }
}
