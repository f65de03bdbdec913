//! The pipeline itself (C4): the doubly-linked list of handler contexts,
//! its mutation API, lookup, and the dispatch engine the context forwarders
//! in [`super::context`] delegate to.
//!
//! # Representation
//!
//! The list is represented as an ordered `Vec<Arc<HandlerContext>>` rather
//! than hand-rolled intrusive pointers. This gives the same observable
//! semantics as a doubly-linked list (§3 invariants 1-2 hold by
//! construction: the vector's order *is* the prev/next relation) while
//! keeping the reentrant-edit rule of §5 ("dispatch uses the next/prev
//! fields at the moment of advance, no cached snapshot") a one-line lock +
//! position lookup instead of manual pointer surgery. Typical pipeline
//! depth is small (§9), so the linear scans this implies are not a concern.
//!
//! A context that has just been unlinked by [`PipelineInner::complete_formal_removal`]
//! is briefly stashed in `removed_stash` for the duration of its
//! `handler_removed` callback, so that a handler firing events from within
//! that callback still reaches its former neighbor (P8) even though the
//! context itself no longer appears in `nodes`.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::config::PipelineConfig;
use crate::deferred::Deferred;
use crate::error::PipelineError;
use crate::message::{Envelope, UserEvent};
use crate::observability::{noop, LogRecord, Logger, Severity};
use crate::pipeline::channel::Channel;
use crate::pipeline::context::{ContextState, HandlerContext, NodeKind};
use crate::pipeline::handler::Handler;
use crate::pipeline::sentinel::{HeadHandler, TailHandler};
use crate::runtime::EventLoop;

const HEAD_ID: u64 = 0;
const TAIL_ID: u64 = 1;
const HEAD_NAME: &str = "head";
const TAIL_NAME: &str = "tail";

/// Where to insert a single handler relative to the existing list.
#[derive(Clone, Copy)]
pub enum Position {
    First,
    Last,
    /// Insert immediately before the context with this id.
    Before(u64),
    /// Insert immediately after the context with this id.
    After(u64),
}

impl Position {
    pub fn before(ctx: &HandlerContext) -> Self {
        Position::Before(ctx.id())
    }

    pub fn after(ctx: &HandlerContext) -> Self {
        Position::After(ctx.id())
    }
}

/// Where to insert a batch of handlers (§4.3 `add_multiple`).
#[derive(Clone, Copy)]
pub enum BulkPosition {
    First,
    Last,
}

pub(crate) struct PipelineInner {
    id_seq: AtomicU64,
    token_seq: AtomicU64,
    auto_name_seq: AtomicU64,
    nodes: Mutex<Vec<Arc<HandlerContext>>>,
    removed_stash: Mutex<HashMap<u64, Arc<HandlerContext>>>,
    pending_removals: Mutex<HashMap<u64, Deferred<()>>>,
    channel: Mutex<Option<Weak<dyn Channel>>>,
    event_loop: Arc<dyn EventLoop>,
    config: PipelineConfig,
    logger: Arc<dyn Logger>,
}

impl PipelineInner {
    pub(crate) fn channel(&self) -> Option<Arc<dyn Channel>> {
        self.channel.lock().unwrap().as_ref().and_then(Weak::upgrade)
    }

    pub(crate) fn event_loop(&self) -> Arc<dyn EventLoop> {
        Arc::clone(&self.event_loop)
    }

    pub(crate) fn logger(&self) -> Arc<dyn Logger> {
        Arc::clone(&self.logger)
    }

    /// Emits a structured record for a handler lifecycle transition (§2a,
    /// §4.3, §4.4): add, formal-remove begun, formal-remove redeemed, or
    /// forced teardown removal.
    fn log_lifecycle(&self, severity: Severity, message: &str, handler_name: &str) {
        self.logger.log(
            &LogRecord::new(severity, "conduit_core::pipeline", message).with_handler(handler_name),
        );
    }

    pub(crate) fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub(crate) fn next_token_id(&self) -> u64 {
        self.token_seq.fetch_add(1, Ordering::Relaxed)
    }

    fn next_id(&self) -> u64 {
        self.id_seq.fetch_add(1, Ordering::Relaxed)
    }

    fn auto_name(&self) -> String {
        loop {
            let n = self.auto_name_seq.fetch_add(1, Ordering::Relaxed);
            let candidate = format!("{}{}", self.config.auto_name_prefix, n);
            let nodes = self.nodes.lock().unwrap();
            if !nodes.iter().any(|c| c.name() == candidate) {
                return candidate;
            }
        }
    }

    // ---- neighbor lookup, with the removed-stash fallback for P8 --------

    fn next_context(&self, from_id: u64) -> Option<Arc<HandlerContext>> {
        {
            let nodes = self.nodes.lock().unwrap();
            if let Some(pos) = nodes.iter().position(|c| c.id() == from_id) {
                return nodes.get(pos + 1).cloned();
            }
        }
        let stale = self.removed_stash.lock().unwrap().get(&from_id)?.stale_next()?;
        self.nodes.lock().unwrap().iter().find(|c| c.id() == stale).cloned()
    }

    fn prev_context(&self, from_id: u64) -> Option<Arc<HandlerContext>> {
        {
            let nodes = self.nodes.lock().unwrap();
            if let Some(pos) = nodes.iter().position(|c| c.id() == from_id) {
                return if pos == 0 { None } else { nodes.get(pos - 1).cloned() };
            }
        }
        let stale = self.removed_stash.lock().unwrap().get(&from_id)?.stale_prev()?;
        self.nodes.lock().unwrap().iter().find(|c| c.id() == stale).cloned()
    }

    fn ensure_promise<V: Send + 'static>(&self, promise: Option<Deferred<V>>) -> Deferred<V> {
        promise.unwrap_or_else(|| self.event_loop.make_promise())
    }

    // ---- inbound dispatch (walks `next`) ---------------------------------

    pub(crate) fn dispatch_channel_active(&self, from_id: u64) {
        if let Some(next) = self.next_context(from_id) {
            if let Some(h) = next.current_handler() {
                h.channel_active(&next);
            }
        }
    }

    pub(crate) fn dispatch_channel_inactive(&self, from_id: u64) {
        if let Some(next) = self.next_context(from_id) {
            if let Some(h) = next.current_handler() {
                h.channel_inactive(&next);
            }
        }
    }

    pub(crate) fn dispatch_channel_read(&self, from_id: u64, msg: Envelope) {
        if let Some(next) = self.next_context(from_id) {
            if let Some(h) = next.current_handler() {
                h.channel_read(&next, msg);
            }
        }
    }

    pub(crate) fn dispatch_channel_read_complete(&self, from_id: u64) {
        if let Some(next) = self.next_context(from_id) {
            if let Some(h) = next.current_handler() {
                h.channel_read_complete(&next);
            }
        }
    }

    pub(crate) fn dispatch_channel_writability_changed(&self, from_id: u64) {
        if let Some(next) = self.next_context(from_id) {
            if let Some(h) = next.current_handler() {
                h.channel_writability_changed(&next);
            }
        }
    }

    pub(crate) fn dispatch_user_inbound_event(&self, from_id: u64, event: UserEvent) {
        if let Some(next) = self.next_context(from_id) {
            if let Some(h) = next.current_handler() {
                h.user_inbound_event(&next, event);
            }
        }
    }

    pub(crate) fn dispatch_error_caught(&self, from_id: u64, error: PipelineError) {
        if let Some(next) = self.next_context(from_id) {
            if let Some(h) = next.current_handler() {
                h.error_caught(&next, error);
            }
        }
    }

    // ---- outbound dispatch (walks `prev`) --------------------------------

    pub(crate) fn dispatch_bind(
        &self,
        from_id: u64,
        addr: SocketAddr,
        promise: Option<Deferred<()>>,
    ) -> Deferred<()> {
        let promise = self.ensure_promise(promise);
        match self.prev_context(from_id) {
            Some(prev) => match prev.current_handler() {
                Some(h) => h.bind(&prev, addr, Some(promise.clone())),
                None => promise.fail(PipelineError::programmer_error("context has no handler")),
            },
            None => promise.fail(PipelineError::programmer_error("dispatch walked past head")),
        }
        promise
    }

    pub(crate) fn dispatch_connect(
        &self,
        from_id: u64,
        addr: SocketAddr,
        promise: Option<Deferred<()>>,
    ) -> Deferred<()> {
        let promise = self.ensure_promise(promise);
        match self.prev_context(from_id) {
            Some(prev) => match prev.current_handler() {
                Some(h) => h.connect(&prev, addr, Some(promise.clone())),
                None => promise.fail(PipelineError::programmer_error("context has no handler")),
            },
            None => promise.fail(PipelineError::programmer_error("dispatch walked past head")),
        }
        promise
    }

    pub(crate) fn dispatch_write(
        &self,
        from_id: u64,
        msg: Envelope,
        promise: Option<Deferred<()>>,
    ) -> Deferred<()> {
        let promise = self.ensure_promise(promise);
        match self.prev_context(from_id) {
            Some(prev) => match prev.current_handler() {
                Some(h) => h.write(&prev, msg, Some(promise.clone())),
                None => promise.fail(PipelineError::programmer_error("context has no handler")),
            },
            None => promise.fail(PipelineError::programmer_error("dispatch walked past head")),
        }
        promise
    }

    pub(crate) fn dispatch_flush(&self, from_id: u64) {
        if let Some(prev) = self.prev_context(from_id) {
            if let Some(h) = prev.current_handler() {
                h.flush(&prev);
            }
        }
    }

    pub(crate) fn dispatch_read(&self, from_id: u64) {
        if let Some(prev) = self.prev_context(from_id) {
            if let Some(h) = prev.current_handler() {
                h.read(&prev);
            }
        }
    }

    pub(crate) fn dispatch_close(&self, from_id: u64, promise: Option<Deferred<()>>) -> Deferred<()> {
        let promise = self.ensure_promise(promise);
        match self.prev_context(from_id) {
            Some(prev) => match prev.current_handler() {
                Some(h) => h.close(&prev, Some(promise.clone())),
                None => promise.fail(PipelineError::programmer_error("context has no handler")),
            },
            None => promise.fail(PipelineError::programmer_error("dispatch walked past head")),
        }
        promise
    }

    pub(crate) fn dispatch_trigger_user_outbound_event(
        &self,
        from_id: u64,
        event: UserEvent,
        promise: Option<Deferred<()>>,
    ) -> Deferred<()> {
        let promise = self.ensure_promise(promise);
        match self.prev_context(from_id) {
            Some(prev) => match prev.current_handler() {
                Some(h) => h.trigger_user_outbound_event(&prev, event, Some(promise.clone())),
                None => promise.fail(PipelineError::programmer_error("context has no handler")),
            },
            None => promise.fail(PipelineError::programmer_error("dispatch walked past head")),
        }
        promise
    }

    // ---- formal-removal completion (§4.4 steps 4-5) ----------------------

    /// Unlinks the context, invokes `handler_removed` exactly once, and
    /// fulfils the caller's removal deferred if one is outstanding. A no-op
    /// if `context_id` is no longer present (already removed by a racing
    /// teardown).
    pub(crate) fn complete_formal_removal(&self, context_id: u64) {
        let ctx = {
            let mut nodes = self.nodes.lock().unwrap();
            let pos = match nodes.iter().position(|c| c.id() == context_id) {
                Some(p) => p,
                None => return,
            };
            let ctx = nodes.remove(pos);
            let prev_id = if pos > 0 { Some(nodes[pos - 1].id()) } else { None };
            let next_id = nodes.get(pos).map(|c| c.id());
            ctx.set_stale_links(prev_id, next_id);
            ctx
        };
        self.removed_stash.lock().unwrap().insert(context_id, Arc::clone(&ctx));
        ctx.invalidate_pending_token();
        let handler = ctx.take_handler();
        if let Some(h) = &handler {
            h.handler_removed(&ctx);
        }
        drop(handler);
        ctx.set_state(ContextState::Removed);
        self.removed_stash.lock().unwrap().remove(&context_id);
        self.log_lifecycle(Severity::Debug, "handler removed", ctx.name());
        if let Some(promise) = self.pending_removals.lock().unwrap().remove(&context_id) {
            promise.succeed(());
        }
    }

    /// Forcibly removes every non-sentinel handler, in list order, as part
    /// of channel teardown (§4.4 step 5). Idempotent.
    pub(crate) fn teardown(&self) {
        self.logger.log(&LogRecord::new(
            Severity::Info,
            "conduit_core::pipeline",
            "channel teardown: forcing remaining handlers through formal removal",
        ));
        loop {
            let next_id = {
                let nodes = self.nodes.lock().unwrap();
                nodes.iter().find(|c| !c.is_sentinel()).map(|c| c.id())
            };
            match next_id {
                Some(id) => self.complete_formal_removal(id),
                None => break,
            }
        }
    }
}

/// The public handle to a channel's pipeline (§3). Cheap to clone: every
/// clone shares the same underlying list.
#[derive(Clone)]
pub struct Pipeline {
    inner: Arc<PipelineInner>,
}

impl Pipeline {
    /// Creates a new pipeline bound to `event_loop`, with default
    /// configuration and a no-op logger.
    pub fn new(event_loop: Arc<dyn EventLoop>) -> Self {
        Self::with_config(event_loop, PipelineConfig::default(), noop())
    }

    pub fn with_config(event_loop: Arc<dyn EventLoop>, config: PipelineConfig, logger: Arc<dyn Logger>) -> Self {
        let inner = Arc::new(PipelineInner {
            id_seq: AtomicU64::new(2),
            token_seq: AtomicU64::new(0),
            auto_name_seq: AtomicU64::new(0),
            nodes: Mutex::new(Vec::new()),
            removed_stash: Mutex::new(HashMap::new()),
            pending_removals: Mutex::new(HashMap::new()),
            channel: Mutex::new(None),
            event_loop,
            config,
            logger,
        });
        let head = Arc::new(HandlerContext::new(
            HEAD_ID,
            HEAD_NAME.to_string(),
            NodeKind::Head,
            Arc::new(HeadHandler),
            Arc::downgrade(&inner),
        ));
        head.set_state(ContextState::Added);
        let tail = Arc::new(HandlerContext::new(
            TAIL_ID,
            TAIL_NAME.to_string(),
            NodeKind::Tail,
            Arc::new(TailHandler),
            Arc::downgrade(&inner),
        ));
        tail.set_state(ContextState::Added);
        *inner.nodes.lock().unwrap() = vec![head, tail];
        Pipeline { inner }
    }

    /// Binds the pipeline to its owning channel. Called once, by the
    /// channel's constructor, immediately after the pipeline is created.
    pub fn attach_channel(&self, channel: Weak<dyn Channel>) {
        *self.inner.channel.lock().unwrap() = Some(channel);
    }

    pub fn channel(&self) -> Option<Arc<dyn Channel>> {
        self.inner.channel()
    }

    pub fn event_loop(&self) -> Arc<dyn EventLoop> {
        self.inner.event_loop()
    }

    // ---- mutation ----------------------------------------------------------

    fn run_mutation<V, F>(&self, op: F) -> Deferred<V>
    where
        V: Send + 'static,
        F: FnOnce(&Pipeline) -> Result<V, PipelineError> + Send + 'static,
    {
        let event_loop = self.inner.event_loop();
        let promise: Deferred<V> = event_loop.make_promise();
        let pipeline = self.clone();
        let promise_for_task = promise.clone();
        if event_loop.in_loop() {
            let result = op(&pipeline);
            event_loop.execute(Box::new(move || match result {
                Ok(v) => promise_for_task.succeed(v),
                Err(e) => promise_for_task.fail(e),
            }));
        } else {
            event_loop.execute(Box::new(move || {
                let result = op(&pipeline);
                match result {
                    Ok(v) => promise_for_task.succeed(v),
                    Err(e) => promise_for_task.fail(e),
                }
            }));
        }
        promise
    }

    fn reserved_name_conflict(name: &str) -> bool {
        name == HEAD_NAME || name == TAIL_NAME
    }

    fn resolve_insert_index(nodes: &[Arc<HandlerContext>], position: Position) -> Result<usize, PipelineError> {
        Ok(match position {
            Position::First => 1,
            Position::Last => nodes.len() - 1,
            Position::Before(id) => nodes
                .iter()
                .position(|c| c.id() == id)
                .ok_or_else(|| PipelineError::not_found("insertion anchor"))?,
            Position::After(id) => {
                nodes
                    .iter()
                    .position(|c| c.id() == id)
                    .ok_or_else(|| PipelineError::not_found("insertion anchor"))?
                    + 1
            }
        })
    }

    fn perform_add(
        &self,
        handler: Arc<dyn Handler>,
        name: String,
        position: Position,
    ) -> Result<Arc<HandlerContext>, PipelineError> {
        if let Some(channel) = self.inner.channel() {
            if channel.state().is_closed() {
                return Err(PipelineError::io_on_closed_channel(format!(
                    "add('{name}')"
                )));
            }
        }
        if Self::reserved_name_conflict(&name) {
            return Err(PipelineError::duplicate_name(name));
        }
        let mut nodes = self.inner.nodes.lock().unwrap();
        if nodes.iter().any(|c| !c.is_sentinel() && c.name() == name) {
            return Err(PipelineError::duplicate_name(name));
        }
        if let Some(max) = self.inner.config.max_depth {
            if nodes.len().saturating_sub(2) >= max {
                return Err(PipelineError::programmer_error(format!(
                    "pipeline depth would exceed configured max_depth={max}"
                )));
            }
        }
        let insert_at = Self::resolve_insert_index(&nodes, position)?;
        let id = self.inner.next_id();
        let ctx = Arc::new(HandlerContext::new(
            id,
            name,
            NodeKind::Handler,
            handler,
            Arc::downgrade(&self.inner),
        ));
        nodes.insert(insert_at, Arc::clone(&ctx));
        drop(nodes);
        ctx.set_state(ContextState::Added);
        if let Some(h) = ctx.current_handler() {
            h.handler_added(&ctx);
        }
        self.inner.log_lifecycle(Severity::Debug, "handler added", ctx.name());
        Ok(ctx)
    }

    /// Adds a single handler to the pipeline (§4.3). Returns a deferred that
    /// fulfils, with the new context, once `handler_added` has returned.
    pub fn add(&self, handler: Arc<dyn Handler>, name: Option<String>, position: Position) -> Deferred<Arc<HandlerContext>> {
        let name = name.unwrap_or_else(|| self.inner.auto_name());
        self.run_mutation(move |pipeline| pipeline.perform_add(handler, name, position))
    }

    fn perform_add_multiple(
        &self,
        handlers: Vec<(Option<String>, Arc<dyn Handler>)>,
        position: BulkPosition,
    ) -> Result<Vec<Arc<HandlerContext>>, PipelineError> {
        if let Some(channel) = self.inner.channel() {
            if channel.state().is_closed() {
                return Err(PipelineError::io_on_closed_channel("add_multiple"));
            }
        }
        // Resolve every handler's name before taking the `nodes` lock below:
        // `auto_name` locks `nodes` itself to check for collisions, and
        // `std::sync::Mutex` is not reentrant, so generating an auto name
        // while already holding that lock would deadlock (this is exactly
        // why the single-handler `add` path resolves its name before
        // `run_mutation` at all).
        let mut names: Vec<String> = Vec::with_capacity(handlers.len());
        for (name, _) in &handlers {
            names.push(name.clone().unwrap_or_else(|| self.inner.auto_name()));
        }

        let mut nodes = self.inner.nodes.lock().unwrap();
        for (offset, name) in names.iter().enumerate() {
            if Self::reserved_name_conflict(name)
                || nodes.iter().any(|c| !c.is_sentinel() && c.name() == name)
                || names[..offset].contains(name)
            {
                return Err(PipelineError::duplicate_name(name.clone()));
            }
        }
        if let Some(max) = self.inner.config.max_depth {
            if nodes.len().saturating_sub(2) + handlers.len() > max {
                return Err(PipelineError::programmer_error(format!(
                    "pipeline depth would exceed configured max_depth={max}"
                )));
            }
        }
        let insert_at = match position {
            BulkPosition::First => 1,
            BulkPosition::Last => nodes.len() - 1,
        };
        let mut new_contexts = Vec::with_capacity(handlers.len());
        for (offset, (_, handler)) in handlers.into_iter().enumerate() {
            let id = self.inner.next_id();
            let ctx = Arc::new(HandlerContext::new(
                id,
                names[offset].clone(),
                NodeKind::Handler,
                handler,
                Arc::downgrade(&self.inner),
            ));
            nodes.insert(insert_at + offset, Arc::clone(&ctx));
            new_contexts.push(ctx);
        }
        drop(nodes);
        for ctx in &new_contexts {
            ctx.set_state(ContextState::Added);
            if let Some(h) = ctx.current_handler() {
                h.handler_added(ctx);
            }
            self.inner.log_lifecycle(Severity::Debug, "handler added", ctx.name());
        }
        Ok(new_contexts)
    }

    /// Adds a batch of handlers atomically with respect to the list (§4.3):
    /// either every context is inserted and every `handler_added` fires, or
    /// none are inserted at all.
    pub fn add_multiple(
        &self,
        handlers: Vec<(Option<String>, Arc<dyn Handler>)>,
        position: BulkPosition,
    ) -> Deferred<Vec<Arc<HandlerContext>>> {
        self.run_mutation(move |pipeline| pipeline.perform_add_multiple(handlers, position))
    }

    fn begin_removal<F>(&self, locate: F) -> Deferred<()>
    where
        F: Fn(&[Arc<HandlerContext>]) -> Option<usize> + Send + 'static,
    {
        let event_loop = self.inner.event_loop();
        let promise: Deferred<()> = event_loop.make_promise();
        let pipeline = self.clone();
        let promise_for_task = promise.clone();
        let task = move || {
            if let Err(e) = pipeline.perform_begin_removal(&locate, promise_for_task.clone()) {
                promise_for_task.fail(e);
            }
        };
        if event_loop.in_loop() {
            task();
        } else {
            event_loop.execute(Box::new(task));
        }
        promise
    }

    fn perform_begin_removal(
        &self,
        locate: &dyn Fn(&[Arc<HandlerContext>]) -> Option<usize>,
        promise: Deferred<()>,
    ) -> Result<(), PipelineError> {
        let ctx = {
            let nodes = self.inner.nodes.lock().unwrap();
            let pos = locate(&nodes).ok_or_else(|| PipelineError::not_found("handler"))?;
            Arc::clone(&nodes[pos])
        };
        if ctx.is_sentinel() {
            return Err(PipelineError::not_found("handler"));
        }
        if ctx.state() != ContextState::Added {
            return Err(PipelineError::not_found("handler"));
        }
        let handler = ctx.current_handler().ok_or_else(|| PipelineError::not_found("handler"))?;
        if !handler.is_removable() {
            return Err(PipelineError::unremovable_handler(ctx.name()));
        }
        ctx.set_state(ContextState::RemovalPending);
        self.inner.pending_removals.lock().unwrap().insert(ctx.id(), promise);
        let token = ctx.mint_removal_token();
        self.inner
            .log_lifecycle(Severity::Debug, "formal removal requested", ctx.name());
        handler.formal_remove(&ctx, token);
        Ok(())
    }

    /// Removes a handler by the name it was added under.
    pub fn remove_by_name(&self, name: &str) -> Deferred<()> {
        let name = name.to_string();
        self.begin_removal(move |nodes| nodes.iter().position(|c| !c.is_sentinel() && c.name() == name))
    }

    /// Removes a handler by reference (pointer identity, not by value).
    pub fn remove_by_handler(&self, handler: &Arc<dyn Handler>) -> Deferred<()> {
        let handler = Arc::clone(handler);
        self.begin_removal(move |nodes| {
            nodes.iter().position(|c| {
                !c.is_sentinel()
                    && c.current_handler()
                        .map(|h| Arc::ptr_eq(&h, &handler))
                        .unwrap_or(false)
            })
        })
    }

    /// Removes a handler by its context.
    pub fn remove_by_context(&self, context: &Arc<HandlerContext>) -> Deferred<()> {
        let id = context.id();
        self.begin_removal(move |nodes| nodes.iter().position(|c| c.id() == id))
    }

    // ---- lookup (§4.3) ------------------------------------------------------

    pub fn context_by_name(&self, name: &str) -> Result<Arc<HandlerContext>, PipelineError> {
        let nodes = self.inner.nodes.lock().unwrap();
        nodes
            .iter()
            .find(|c| !c.is_sentinel() && c.name() == name)
            .cloned()
            .ok_or_else(|| PipelineError::not_found(format!("handler named '{name}'")))
    }

    pub fn context_by_handler_type<T: Handler>(&self) -> Result<Arc<HandlerContext>, PipelineError> {
        let nodes = self.inner.nodes.lock().unwrap();
        nodes
            .iter()
            .find(|c| {
                !c.is_sentinel()
                    && c.current_handler()
                        .map(|h| h.as_any().is::<T>())
                        .unwrap_or(false)
            })
            .cloned()
            .ok_or_else(|| PipelineError::not_found(format!("handler of type {}", std::any::type_name::<T>())))
    }

    pub fn context_by_handler_reference(&self, handler: &Arc<dyn Handler>) -> Result<Arc<HandlerContext>, PipelineError> {
        let nodes = self.inner.nodes.lock().unwrap();
        nodes
            .iter()
            .find(|c| {
                !c.is_sentinel()
                    && c.current_handler()
                        .map(|h| Arc::ptr_eq(&h, handler))
                        .unwrap_or(false)
            })
            .cloned()
            .ok_or_else(|| PipelineError::not_found("handler reference"))
    }

    // ---- top-level fire/initiate, as if called just inside head/tail -------

    pub fn fire_channel_active(&self) {
        self.inner.dispatch_channel_active(HEAD_ID);
    }

    pub fn fire_channel_inactive(&self) {
        self.inner.dispatch_channel_inactive(HEAD_ID);
    }

    pub fn fire_channel_read(&self, msg: Envelope) {
        self.inner.dispatch_channel_read(HEAD_ID, msg);
    }

    pub fn fire_channel_read_complete(&self) {
        self.inner.dispatch_channel_read_complete(HEAD_ID);
    }

    pub fn fire_channel_writability_changed(&self) {
        self.inner.dispatch_channel_writability_changed(HEAD_ID);
    }

    pub fn fire_user_inbound_event(&self, event: UserEvent) {
        self.inner.dispatch_user_inbound_event(HEAD_ID, event);
    }

    pub fn fire_error_caught(&self, error: PipelineError) {
        self.inner.dispatch_error_caught(HEAD_ID, error);
    }

    pub fn bind(&self, addr: SocketAddr, promise: Option<Deferred<()>>) -> Deferred<()> {
        self.inner.dispatch_bind(TAIL_ID, addr, promise)
    }

    pub fn connect(&self, addr: SocketAddr, promise: Option<Deferred<()>>) -> Deferred<()> {
        self.inner.dispatch_connect(TAIL_ID, addr, promise)
    }

    pub fn write(&self, msg: Envelope, promise: Option<Deferred<()>>) -> Deferred<()> {
        self.inner.dispatch_write(TAIL_ID, msg, promise)
    }

    pub fn flush(&self) {
        self.inner.dispatch_flush(TAIL_ID);
    }

    pub fn write_and_flush(&self, msg: Envelope, promise: Option<Deferred<()>>) -> Deferred<()> {
        let result = self.write(msg, promise);
        self.flush();
        result
    }

    pub fn read(&self) {
        self.inner.dispatch_read(TAIL_ID);
    }

    pub fn close(&self, promise: Option<Deferred<()>>) -> Deferred<()> {
        self.inner.dispatch_close(TAIL_ID, promise)
    }

    pub fn trigger_user_outbound_event(&self, event: UserEvent, promise: Option<Deferred<()>>) -> Deferred<()> {
        self.inner.dispatch_trigger_user_outbound_event(TAIL_ID, event, promise)
    }

    /// Forcibly removes every remaining handler as part of channel teardown.
    pub fn teardown(&self) {
        self.inner.teardown();
    }

    /// Number of non-sentinel handlers currently in the pipeline. Exposed
    /// for tests verifying invariant 1/2 under randomized mutation.
    pub fn len(&self) -> usize {
        self.inner.nodes.lock().unwrap().len() - 2
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of handler names in list order, excluding sentinels. Test-only
    /// introspection hook for invariant checking.
    pub fn handler_names(&self) -> Vec<String> {
        self.inner
            .nodes
            .lock()
            .unwrap()
            .iter()
            .filter(|c| !c.is_sentinel())
            .map(|c| c.name().to_string())
            .collect()
    }
}
