//! End-to-end scenarios from the testable-properties catalogue, driven
//! through the embedded channel.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use conduit_core::{
    BulkPosition, Deferred, EmbeddedChannel, Envelope, Handler, HandlerContext, PipelineError,
    Position, RemovalToken,
};

fn outcome_of<V: Send + 'static>(deferred: &Deferred<V>) -> Arc<Mutex<Option<bool>>> {
    let outcome = Arc::new(Mutex::new(None));
    let outcome2 = Arc::clone(&outcome);
    deferred.on_complete(move |r| *outcome2.lock().unwrap() = Some(r.is_ok()));
    outcome
}

// ---- Scenario 1: outbound transform chain ---------------------------------

struct StringToInt;
impl Handler for StringToInt {
    fn write(&self, ctx: &HandlerContext, msg: Envelope, promise: Option<Deferred<()>>) {
        let s: String = msg.downcast().unwrap();
        assert_eq!(s, "msg");
        ctx.write(Envelope::new(1i32), promise);
    }
}

struct IntToByteBuffer;
impl Handler for IntToByteBuffer {
    fn write(&self, ctx: &HandlerContext, msg: Envelope, promise: Option<Deferred<()>>) {
        let _n: i32 = msg.downcast().unwrap();
        ctx.write(Envelope::new("hello".to_string()), promise);
    }
}

#[test]
fn scenario_1_outbound_transform_chain() {
    let channel = EmbeddedChannel::new(vec![]);
    channel
        .pipeline()
        .add(Arc::new(IntToByteBuffer), Some("a".to_string()), Position::Last);
    channel
        .pipeline()
        .add(Arc::new(StringToInt), Some("b".to_string()), Position::Last);
    channel.run_pending_tasks();

    assert!(channel.write_outbound(Envelope::new("msg".to_string())));
    let out: String = channel.read_outbound().unwrap().downcast().unwrap();
    assert_eq!(out, "hello");
    assert!(channel.read_outbound().is_none());
}

// ---- Scenario 2: index writers ---------------------------------------------

struct IndexWriter(u8);
impl Handler for IndexWriter {
    fn channel_read(&self, ctx: &HandlerContext, msg: Envelope) {
        let mut buf: Vec<u8> = msg.downcast().unwrap();
        buf.push(self.0);
        ctx.fire_channel_read(Envelope::new(buf));
    }

    fn write(&self, ctx: &HandlerContext, msg: Envelope, promise: Option<Deferred<()>>) {
        let mut buf: Vec<u8> = msg.downcast().unwrap();
        buf.push(self.0);
        ctx.write(Envelope::new(buf), promise);
    }
}

#[test]
fn scenario_2_index_writers_with_mid_insert() {
    let channel = EmbeddedChannel::new(vec![]);
    channel
        .pipeline()
        .add(Arc::new(IndexWriter(1)), Some("h1".to_string()), Position::Last);
    channel
        .pipeline()
        .add(Arc::new(IndexWriter(2)), Some("h2".to_string()), Position::Last);
    channel.run_pending_tasks();

    let h1_ctx = channel.pipeline().context_by_name("h1").unwrap();
    channel
        .pipeline()
        .add(Arc::new(IndexWriter(3)), Some("h3".to_string()), Position::after(&h1_ctx));
    channel.run_pending_tasks();

    assert_eq!(channel.pipeline().handler_names(), vec!["h1", "h3", "h2"]);

    assert!(channel.write_inbound(Envelope::new(Vec::<u8>::new())));
    let observed: Vec<u8> = channel.read_inbound().unwrap().downcast().unwrap();
    assert_eq!(observed, vec![1, 3, 2]);

    assert!(channel.write_outbound(Envelope::new(Vec::<u8>::new())));
    let observed: Vec<u8> = channel.read_outbound().unwrap().downcast().unwrap();
    assert_eq!(observed, vec![2, 3, 1]);
}

// ---- Scenario 3: outbound-next-for-inbound-only ----------------------------

struct PrintOutboundAsByteBuffer;
impl Handler for PrintOutboundAsByteBuffer {
    fn write(&self, ctx: &HandlerContext, msg: Envelope, promise: Option<Deferred<()>>) {
        let data: Vec<i32> = msg.downcast().unwrap();
        ctx.write(Envelope::new(format!("{data:?}")), promise);
    }
}

struct MarkInbound(i32);
impl Handler for MarkInbound {
    fn channel_read(&self, ctx: &HandlerContext, msg: Envelope) {
        let mut data: Vec<i32> = msg.downcast().unwrap();
        data.push(self.0);
        ctx.fire_channel_read(Envelope::new(data));
    }
}

struct MarkOutbound(i32);
impl Handler for MarkOutbound {
    fn write(&self, ctx: &HandlerContext, msg: Envelope, promise: Option<Deferred<()>>) {
        let mut data: Vec<i32> = msg.downcast().unwrap();
        data.push(self.0);
        ctx.write(Envelope::new(data), promise);
    }
}

struct WriteOnRead;
impl Handler for WriteOnRead {
    fn channel_read(&self, ctx: &HandlerContext, msg: Envelope) {
        let data: Vec<i32> = msg.downcast_ref::<Vec<i32>>().unwrap().clone();
        let negated: Vec<i32> = data.iter().map(|x| -x).collect();
        ctx.write(Envelope::new(negated), None);
        ctx.fire_channel_read(msg);
    }
}

#[test]
fn scenario_3_outbound_next_for_inbound_only() {
    let channel = EmbeddedChannel::new(vec![
        Arc::new(PrintOutboundAsByteBuffer),
        Arc::new(MarkInbound(2)),
        Arc::new(WriteOnRead),
        Arc::new(MarkOutbound(4)),
        Arc::new(WriteOnRead),
        Arc::new(MarkInbound(6)),
        Arc::new(WriteOnRead),
    ]);

    assert!(channel.write_inbound(Envelope::new(Vec::<i32>::new())));
    let inbound: Vec<i32> = channel.read_inbound().unwrap().downcast().unwrap();
    assert_eq!(inbound, vec![2, 6]);
    assert!(channel.read_inbound().is_none());

    let first: String = channel.read_outbound().unwrap().downcast().unwrap();
    let second: String = channel.read_outbound().unwrap().downcast().unwrap();
    let third: String = channel.read_outbound().unwrap().downcast().unwrap();
    assert_eq!(first, "[-2]");
    assert_eq!(second, "[-2, 4]");
    assert_eq!(third, "[-2, -6, 4]");
    assert!(channel.read_outbound().is_none());
}

// ---- Scenario 4: teardown during formal removal ----------------------------

struct NeverLeaves {
    removed_count: Arc<AtomicUsize>,
}

impl Handler for NeverLeaves {
    fn is_removable(&self) -> bool {
        true
    }

    fn formal_remove(&self, _ctx: &HandlerContext, _token: RemovalToken) {
        // Deliberately never redeems the token.
    }

    fn handler_removed(&self, _ctx: &HandlerContext) {
        self.removed_count.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn scenario_4_teardown_forces_pending_removal() {
    let removed_count = Arc::new(AtomicUsize::new(0));
    let handler: Arc<dyn Handler> = Arc::new(NeverLeaves {
        removed_count: Arc::clone(&removed_count),
    });
    let channel = EmbeddedChannel::new(vec![Arc::clone(&handler)]);

    let remove_deferred = channel.pipeline().remove_by_handler(&handler);
    let outcome = outcome_of(&remove_deferred);
    channel.run_pending_tasks();

    assert_eq!(removed_count.load(Ordering::SeqCst), 0, "token never redeemed yet");
    assert!(outcome.lock().unwrap().is_none());

    channel.finish().unwrap();

    assert_eq!(removed_count.load(Ordering::SeqCst), 1);
    assert_eq!(*outcome.lock().unwrap(), Some(true));
    assert!(channel.pipeline().is_empty());
}

// ---- Scenario 5: find by type with duplicates ------------------------------

struct Passthrough;
impl Handler for Passthrough {}

#[test]
fn scenario_5_type_lookup_returns_first_match() {
    let channel = EmbeddedChannel::new(vec![]);
    channel
        .pipeline()
        .add(Arc::new(Passthrough), Some("h1".to_string()), Position::Last);
    channel
        .pipeline()
        .add(Arc::new(Passthrough), Some("h2".to_string()), Position::Last);
    channel.run_pending_tasks();

    let ctx = channel.pipeline().context_by_handler_type::<Passthrough>().unwrap();
    assert_eq!(ctx.name(), "h1");
}

// ---- Scenario 6: connect does not bind -------------------------------------

struct RejectBind(Arc<AtomicBool>);
impl Handler for RejectBind {
    fn bind(&self, _ctx: &HandlerContext, _addr: SocketAddr, promise: Option<Deferred<()>>) {
        self.0.store(true, Ordering::SeqCst);
        if let Some(p) = promise {
            p.fail(PipelineError::programmer_error("bind should not have been called"));
        }
    }
}

#[test]
fn scenario_6_connect_does_not_invoke_bind() {
    let bind_called = Arc::new(AtomicBool::new(false));
    let channel = EmbeddedChannel::new(vec![Arc::new(RejectBind(Arc::clone(&bind_called)))]);

    let addr: SocketAddr = "127.0.0.1:9000".parse().unwrap();
    let connect_deferred = channel.pipeline().connect(addr, None);
    channel.run_pending_tasks();
    let outcome = outcome_of(&connect_deferred);
    channel.run_pending_tasks();

    assert_eq!(*outcome.lock().unwrap(), Some(true));
    assert!(!bind_called.load(Ordering::SeqCst));
}

// ---- P1: lifecycle pairing --------------------------------------------------

struct CountingHandler {
    added: Arc<AtomicUsize>,
    removed: Arc<AtomicUsize>,
}

impl Handler for CountingHandler {
    fn handler_added(&self, _ctx: &HandlerContext) {
        self.added.fetch_add(1, Ordering::SeqCst);
    }

    fn handler_removed(&self, _ctx: &HandlerContext) {
        self.removed.fetch_add(1, Ordering::SeqCst);
    }

    fn is_removable(&self) -> bool {
        true
    }
}

#[test]
fn p1_added_and_removed_are_each_called_exactly_once() {
    let added = Arc::new(AtomicUsize::new(0));
    let removed = Arc::new(AtomicUsize::new(0));
    let handler: Arc<dyn Handler> = Arc::new(CountingHandler {
        added: Arc::clone(&added),
        removed: Arc::clone(&removed),
    });
    let channel = EmbeddedChannel::new(vec![Arc::clone(&handler)]);
    assert_eq!(added.load(Ordering::SeqCst), 1);
    assert_eq!(removed.load(Ordering::SeqCst), 0);

    channel.finish().unwrap();
    assert_eq!(added.load(Ordering::SeqCst), 1);
    assert_eq!(removed.load(Ordering::SeqCst), 1);
}

// ---- P2: add-after-close ----------------------------------------------------

#[test]
fn p2_add_after_close_fails_without_lifecycle_callbacks() {
    let added = Arc::new(AtomicUsize::new(0));
    let removed = Arc::new(AtomicUsize::new(0));
    let channel = EmbeddedChannel::new(vec![]);
    channel.finish().unwrap();

    let handler: Arc<dyn Handler> = Arc::new(CountingHandler {
        added: Arc::clone(&added),
        removed: Arc::clone(&removed),
    });
    let add_deferred = channel.pipeline().add(handler, Some("late".to_string()), Position::Last);
    let outcome = outcome_of(&add_deferred);
    channel.run_pending_tasks();

    assert_eq!(*outcome.lock().unwrap(), Some(false));
    assert_eq!(added.load(Ordering::SeqCst), 0);
    assert_eq!(removed.load(Ordering::SeqCst), 0);
}

// ---- P5: sentinels are hidden from lookup and removal ----------------------

#[test]
fn p5_sentinels_are_not_reachable_through_public_api() {
    let channel = EmbeddedChannel::new(vec![]);
    assert_eq!(
        channel.pipeline().context_by_name("head").unwrap_err().code(),
        conduit_core::error::codes::NOT_FOUND
    );
    assert_eq!(
        channel.pipeline().context_by_name("tail").unwrap_err().code(),
        conduit_core::error::codes::NOT_FOUND
    );

    let remove_deferred = channel.pipeline().remove_by_name("head");
    let outcome = outcome_of(&remove_deferred);
    channel.run_pending_tasks();
    assert_eq!(*outcome.lock().unwrap(), Some(false));
}

// ---- P6: non-removable handlers reject user removal ------------------------

struct Pinned;
impl Handler for Pinned {}

#[test]
fn p6_non_removable_handler_rejects_removal() {
    let channel = EmbeddedChannel::new(vec![]);
    channel
        .pipeline()
        .add(Arc::new(Pinned), Some("pinned".to_string()), Position::Last);
    channel.run_pending_tasks();

    let remove_deferred = channel.pipeline().remove_by_name("pinned");
    let outcome = outcome_of(&remove_deferred);
    channel.run_pending_tasks();

    assert_eq!(*outcome.lock().unwrap(), Some(false));
    assert_eq!(channel.pipeline().handler_names(), vec!["pinned"]);
}

// ---- P7: every removal spelling goes through formal-remove -----------------

struct DrainsImmediately {
    formal_remove_called: Arc<AtomicBool>,
}

impl Handler for DrainsImmediately {
    fn is_removable(&self) -> bool {
        true
    }

    fn formal_remove(&self, ctx: &HandlerContext, token: RemovalToken) {
        self.formal_remove_called.store(true, Ordering::SeqCst);
        ctx.leave_pipeline(token).unwrap();
    }
}

#[test]
fn p7_every_removal_spelling_invokes_formal_remove() {
    for spelling in ["by_name", "by_reference", "by_context"] {
        let formal_remove_called = Arc::new(AtomicBool::new(false));
        let handler: Arc<dyn Handler> = Arc::new(DrainsImmediately {
            formal_remove_called: Arc::clone(&formal_remove_called),
        });
        let channel = EmbeddedChannel::new(vec![Arc::clone(&handler)]);

        let remove_deferred = match spelling {
            "by_name" => channel.pipeline().remove_by_name("handler-0"),
            "by_reference" => channel.pipeline().remove_by_handler(&handler),
            "by_context" => {
                let ctx = channel.pipeline().context_by_handler_reference(&handler).unwrap();
                channel.pipeline().remove_by_context(&ctx)
            }
            _ => unreachable!(),
        };
        let outcome = outcome_of(&remove_deferred);
        channel.run_pending_tasks();

        assert!(formal_remove_called.load(Ordering::SeqCst), "{spelling}");
        assert_eq!(*outcome.lock().unwrap(), Some(true), "{spelling}");
        assert!(channel.pipeline().is_empty(), "{spelling}");
    }
}

// ---- P8: fire-on-remove delivery reaches the former downstream neighbor ---

struct FiresOnRemove {
    removed: Arc<AtomicBool>,
}

impl Handler for FiresOnRemove {
    fn is_removable(&self) -> bool {
        true
    }

    // Fired from inside the callback that runs after this context has
    // already been unlinked from the pipeline's list (only `removed_stash`
    // still remembers its neighbors), exercising the stale-link fallback.
    fn handler_removed(&self, ctx: &HandlerContext) {
        self.removed.store(true, Ordering::SeqCst);
        ctx.fire_channel_read(Envelope::new(vec![1u8]));
    }
}

#[test]
fn p8_fire_on_remove_reaches_former_downstream_neighbor() {
    let removed = Arc::new(AtomicBool::new(false));
    let handler: Arc<dyn Handler> = Arc::new(FiresOnRemove {
        removed: Arc::clone(&removed),
    });
    let channel = EmbeddedChannel::new(vec![Arc::clone(&handler), Arc::new(IndexWriter(9))]);

    let remove_deferred = channel.pipeline().remove_by_handler(&handler);
    let outcome = outcome_of(&remove_deferred);
    channel.run_pending_tasks();

    assert_eq!(*outcome.lock().unwrap(), Some(true));
    assert!(removed.load(Ordering::SeqCst));

    let observed: Vec<u8> = channel.read_inbound().unwrap().downcast().unwrap();
    assert_eq!(observed, vec![1, 9]);
    assert!(channel.read_inbound().is_none());
    assert_eq!(channel.pipeline().handler_names(), vec!["handler-1"]);
}

// ---- P9: empty pipeline passes messages through unchanged ------------------

#[test]
fn p9_empty_pipeline_is_transparent() {
    let channel = EmbeddedChannel::new(vec![]);
    assert!(channel.write_inbound(Envelope::new(42i32)));
    assert_eq!(channel.read_inbound().unwrap().downcast::<i32>().unwrap(), 42);

    assert!(channel.write_outbound(Envelope::new("pass-through".to_string())));
    assert_eq!(
        channel.read_outbound().unwrap().downcast::<String>().unwrap(),
        "pass-through"
    );
}

// ---- add_multiple atomicity -------------------------------------------------

#[test]
fn add_multiple_is_all_or_nothing_on_duplicate_name() {
    let channel = EmbeddedChannel::new(vec![]);
    channel
        .pipeline()
        .add(Arc::new(Passthrough), Some("dup".to_string()), Position::Last);
    channel.run_pending_tasks();

    let batch: Vec<(Option<String>, Arc<dyn Handler>)> = vec![
        (Some("fresh".to_string()), Arc::new(Passthrough)),
        (Some("dup".to_string()), Arc::new(Passthrough)),
    ];
    let deferred = channel.pipeline().add_multiple(batch, BulkPosition::Last);
    let outcome = outcome_of(&deferred);
    channel.run_pending_tasks();

    assert_eq!(*outcome.lock().unwrap(), Some(false));
    assert_eq!(channel.pipeline().handler_names(), vec!["dup"]);
}
