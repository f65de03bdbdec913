//! Head and tail sentinel handlers (C5).
//!
//! These are ordinary [`Handler`] implementations plugged in at the two
//! fixed ends of the list. They are never exposed through lookup or removal
//! (the pipeline excludes sentinel contexts from both, see
//! [`crate::pipeline::pipeline::Pipeline`]).

use std::net::SocketAddr;

use crate::deferred::Deferred;
use crate::error::PipelineError;
use crate::message::{Envelope, UserEvent};
use crate::observability::{LogRecord, Severity};
use crate::pipeline::context::HandlerContext;
use crate::pipeline::handler::Handler;

/// Outbound terminus / inbound origin. Every outbound method is overridden
/// to call the channel's transport directly instead of forwarding further
/// (there is nothing further); inbound methods keep the trait's default
/// bodies, which is exactly "forward to next" and therefore the entry point
/// for transport-injected inbound events.
pub(crate) struct HeadHandler;

fn link(deferred: Deferred<()>, promise: Option<Deferred<()>>) -> Deferred<()> {
    match promise {
        None => deferred,
        Some(promise) => {
            let promise_clone = promise.clone();
            deferred.on_complete(move |result| match result {
                Ok(()) => promise_clone.succeed(()),
                Err(e) => promise_clone.fail(PipelineError::new(e.code(), e.message().to_string())),
            });
            promise
        }
    }
}

impl Handler for HeadHandler {
    fn bind(&self, ctx: &HandlerContext, addr: SocketAddr, promise: Option<Deferred<()>>) {
        if let Some(channel) = ctx.channel() {
            link(channel.transport().bind(addr), promise);
        }
    }

    fn connect(&self, ctx: &HandlerContext, addr: SocketAddr, promise: Option<Deferred<()>>) {
        if let Some(channel) = ctx.channel() {
            link(channel.transport().connect(addr), promise);
        }
    }

    fn write(&self, ctx: &HandlerContext, msg: Envelope, promise: Option<Deferred<()>>) {
        if let Some(channel) = ctx.channel() {
            link(channel.transport().write(msg), promise);
        }
    }

    fn flush(&self, ctx: &HandlerContext) {
        if let Some(channel) = ctx.channel() {
            let _ = channel.transport().flush();
        }
    }

    fn read(&self, ctx: &HandlerContext) {
        if let Some(channel) = ctx.channel() {
            let _ = channel.transport().read_request();
        }
    }

    fn close(&self, ctx: &HandlerContext, promise: Option<Deferred<()>>) {
        if let Some(channel) = ctx.channel() {
            link(channel.transport().close(), promise);
        }
    }

    fn trigger_user_outbound_event(
        &self,
        _ctx: &HandlerContext,
        _event: UserEvent,
        promise: Option<Deferred<()>>,
    ) {
        // No transport hook for generic outbound user events; succeed so a
        // caller awaiting the promise is not left hanging.
        if let Some(promise) = promise {
            promise.succeed(());
        }
    }
}

/// Inbound terminus / outbound origin. Inbound methods are overridden to
/// terminate the walk (record or discard); outbound methods keep the
/// trait's default bodies ("forward to prev"), which is the entry point for
/// operations initiated directly on the pipeline (`pipeline.write(...)` is
/// defined as "as if called on the context just before tail").
pub(crate) struct TailHandler;

impl Handler for TailHandler {
    fn channel_active(&self, _ctx: &HandlerContext) {}
    fn channel_inactive(&self, _ctx: &HandlerContext) {}
    fn channel_writability_changed(&self, _ctx: &HandlerContext) {}
    fn user_inbound_event(&self, _ctx: &HandlerContext, _event: UserEvent) {}

    fn channel_read(&self, ctx: &HandlerContext, msg: Envelope) {
        if let Some(channel) = ctx.channel() {
            if ctx.pipeline_config_warn_on_discarded_inbound() {
                ctx.logger().log(
                    &LogRecord::new(
                        Severity::Warn,
                        "conduit_core::pipeline::tail",
                        "inbound message reached tail unhandled",
                    )
                    .with_handler("tail"),
                );
            }
            channel.record_inbound(msg);
        }
    }

    fn channel_read_complete(&self, _ctx: &HandlerContext) {}

    fn error_caught(&self, ctx: &HandlerContext, error: PipelineError) {
        if let Some(channel) = ctx.channel() {
            channel.record_last_error(error);
        }
    }
}
