//! Illustrative composition of the pipeline contract: an HTTP pipeline-setup
//! helper (§6) that installs, in order, a response encoder, a request
//! decoder, an optional pipelining-assistance handler, an optional error
//! handler, and an optional upgrade handler — using nothing but the public
//! `Pipeline::add_multiple` API.
//!
//! This is not a real HTTP codec: each handler below only demonstrates the
//! shape (what it reads, what it writes, which capabilities it declares) a
//! third-party protocol layer would fill in on top of this crate.

use std::sync::Arc;

use conduit_core::{BulkPosition, Envelope, Handler, HandlerContext, Pipeline};

/// Placeholder request/response types so the demo compiles without a real
/// HTTP codec dependency.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: String,
    pub path: String,
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

/// Outbound: turns an `HttpResponse` into bytes headed for the transport.
struct HttpResponseEncoder;

impl Handler for HttpResponseEncoder {
    fn write(&self, ctx: &HandlerContext, msg: Envelope, promise: Option<conduit_core::Deferred<()>>) {
        match msg.downcast::<HttpResponse>() {
            Ok(response) => {
                let bytes = format!("HTTP/1.1 {} \r\n\r\n{}", response.status, response.body);
                ctx.write(Envelope::new(bytes), promise);
            }
            Err(e) => {
                if let Some(p) = promise {
                    p.fail(e);
                }
            }
        }
    }
}

/// Inbound: turns raw bytes into an `HttpRequest`.
struct HttpRequestDecoder;

impl Handler for HttpRequestDecoder {
    fn channel_read(&self, ctx: &HandlerContext, msg: Envelope) {
        if !msg.is::<String>() {
            // Not a line-shaped inbound message; forward unchanged so a
            // differently-typed handler upstream can still see it.
            ctx.fire_channel_read(msg);
            return;
        }
        let line: String = msg.downcast().expect("checked with is::<String>() above");
        let mut parts = line.splitn(2, ' ');
        let method = parts.next().unwrap_or("GET").to_string();
        let path = parts.next().unwrap_or("/").to_string();
        ctx.fire_channel_read(Envelope::new(HttpRequest { method, path }));
    }
}

/// Smooths out one-request-at-a-time backpressure from naive user handlers;
/// a real implementation would track in-flight requests and coalesce
/// `read()` calls. This illustration just forwards every event.
struct HttpServerPipeliningAssistant;

impl Handler for HttpServerPipeliningAssistant {}

/// Converts an uncaught error into a 500 response instead of letting it
/// reach tail unhandled.
struct HttpErrorResponder;

impl Handler for HttpErrorResponder {
    fn error_caught(&self, ctx: &HandlerContext, error: conduit_core::PipelineError) {
        let response = HttpResponse {
            status: 500,
            body: error.message().to_string(),
        };
        ctx.write_and_flush(Envelope::new(response), None);
    }
}

/// Captures references to the encoder/decoder so a real implementation
/// could splice a different protocol's handlers into the live pipeline once
/// an `Upgrade` header is observed. This illustration only demonstrates the
/// shape of that capture; it does not perform a real upgrade.
struct HttpUpgradeHandler {
    #[allow(dead_code)]
    encoder_name: String,
}

impl Handler for HttpUpgradeHandler {}

/// Installs the illustrative HTTP stack at the front of `pipeline`, in the
/// order a real implementation would: encoder and decoder always, the
/// pipelining assistant and error responder only if requested, and the
/// upgrade handler last (since it needs to observe decoded requests).
pub fn configure_http_pipeline(
    pipeline: &Pipeline,
    with_pipelining_assistance: bool,
    with_error_handler: bool,
    with_upgrade_support: bool,
) {
    let encoder_name = "http-response-encoder".to_string();
    let mut handlers: Vec<(Option<String>, Arc<dyn Handler>)> = vec![
        (Some(encoder_name.clone()), Arc::new(HttpResponseEncoder)),
        (Some("http-request-decoder".to_string()), Arc::new(HttpRequestDecoder)),
    ];
    if with_pipelining_assistance {
        handlers.push((
            Some("http-pipelining-assistant".to_string()),
            Arc::new(HttpServerPipeliningAssistant),
        ));
    }
    if with_error_handler {
        handlers.push((Some("http-error-responder".to_string()), Arc::new(HttpErrorResponder)));
    }
    if with_upgrade_support {
        handlers.push((
            Some("http-upgrade-handler".to_string()),
            Arc::new(HttpUpgradeHandler { encoder_name }),
        ));
    }
    // `add_multiple` is atomic: every handler above lands, in this order, or
    // none do (§4.3) -- a half-wired HTTP stack can never be observed.
    pipeline.add_multiple(handlers, BulkPosition::Last);
}

fn main() {
    use conduit_core::EmbeddedChannel;

    let channel = EmbeddedChannel::new(vec![]);
    configure_http_pipeline(channel.pipeline(), true, true, false);
    channel.run_pending_tasks();

    channel.write_inbound(Envelope::new("GET /health".to_string()));
    let decoded: HttpRequest = channel
        .read_inbound()
        .expect("request should have decoded")
        .downcast()
        .expect("decoded value should be an HttpRequest");
    println!("decoded request: {} {}", decoded.method, decoded.path);

    channel.write_outbound(Envelope::new(HttpResponse {
        status: 200,
        body: "ok".to_string(),
    }));
    let encoded: String = channel
        .read_outbound()
        .expect("response should have encoded")
        .downcast()
        .expect("encoded value should be a String");
    println!("encoded response: {encoded}");
}
