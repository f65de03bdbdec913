//! The `Handler` contract (§3) and the formal-removal token (§4.4).
//!
//! `Handler` intentionally has one method per inbound/outbound capability,
//! each with a default body that forwards the event (inbound
//! methods forward to `next`, outbound methods forward to `prev`). A handler
//! author overrides only the methods they care about; the rest is handled by
//! the trait's own defaults, so "implements a non-empty subset of the
//! capability set" falls out of ordinary Rust trait overriding rather than
//! needing a separate capability-bitset or reflection mechanism.

use std::any::Any;
use std::net::SocketAddr;

use crate::deferred::Deferred;
use crate::error::PipelineError;
use crate::message::{Envelope, UserEvent};
use crate::pipeline::context::HandlerContext;

/// A one-shot token minted by the pipeline for a single formal-removal
/// handshake (§4.4). Redeeming it anywhere other than the context it was
/// minted for, or redeeming it twice, is a programmer error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemovalToken {
    pub(crate) context_id: u64,
    pub(crate) token_id: u64,
}

/// User-supplied pipeline participant.
///
/// Every method has a default that forwards the event; override only what
/// you need. `as_any` is provided so the pipeline can support
/// `context_by_handler_type` lookups (§4.3) without every handler author
/// writing boilerplate.
pub trait Handler: Send + Sync + 'static {
    /// Supports `context_by_handler_type`. The default works for every
    /// implementor because the trait requires `Self: 'static`.
    fn as_any(&self) -> &dyn Any {
        self
    }

    // ---- inbound: default forwards to `next` -----------------------------

    fn channel_active(&self, ctx: &HandlerContext) {
        ctx.fire_channel_active();
    }

    fn channel_inactive(&self, ctx: &HandlerContext) {
        ctx.fire_channel_inactive();
    }

    fn channel_read(&self, ctx: &HandlerContext, msg: Envelope) {
        ctx.fire_channel_read(msg);
    }

    fn channel_read_complete(&self, ctx: &HandlerContext) {
        ctx.fire_channel_read_complete();
    }

    fn channel_writability_changed(&self, ctx: &HandlerContext) {
        ctx.fire_channel_writability_changed();
    }

    fn user_inbound_event(&self, ctx: &HandlerContext, event: UserEvent) {
        ctx.fire_user_inbound_event(event);
    }

    fn error_caught(&self, ctx: &HandlerContext, error: PipelineError) {
        ctx.fire_error_caught(error);
    }

    // ---- outbound: default forwards to `prev` ----------------------------

    fn bind(&self, ctx: &HandlerContext, addr: SocketAddr, promise: Option<Deferred<()>>) {
        ctx.bind(addr, promise);
    }

    fn connect(&self, ctx: &HandlerContext, addr: SocketAddr, promise: Option<Deferred<()>>) {
        ctx.connect(addr, promise);
    }

    fn write(&self, ctx: &HandlerContext, msg: Envelope, promise: Option<Deferred<()>>) {
        ctx.write(msg, promise);
    }

    fn flush(&self, ctx: &HandlerContext) {
        ctx.flush();
    }

    fn read(&self, ctx: &HandlerContext) {
        ctx.read();
    }

    fn close(&self, ctx: &HandlerContext, promise: Option<Deferred<()>>) {
        ctx.close(promise);
    }

    fn trigger_user_outbound_event(
        &self,
        ctx: &HandlerContext,
        event: UserEvent,
        promise: Option<Deferred<()>>,
    ) {
        ctx.trigger_user_outbound_event(event, promise);
    }

    // ---- lifecycle: no forwarding, no-op by default ----------------------

    fn handler_added(&self, _ctx: &HandlerContext) {}

    fn handler_removed(&self, _ctx: &HandlerContext) {}

    // ---- removable / formal-remove ---------------------------------------

    /// Declares whether this handler participates in the formal-removal
    /// handshake (§4.4). A non-removable handler can only ever leave the
    /// pipeline through channel teardown.
    fn is_removable(&self) -> bool {
        false
    }

    /// Invoked once removal begins for a removable handler. The default
    /// leaves immediately; a handler that needs to drain pending work
    /// overrides this, stashes `token`, and calls
    /// [`HandlerContext::leave_pipeline`] once it is ready.
    fn formal_remove(&self, ctx: &HandlerContext, token: RemovalToken) {
        let _ = ctx.leave_pipeline(token);
    }
}
