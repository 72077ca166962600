//! Status HTTP endpoint
//!
//! - `GET /current-state` - latest lane state as JSON (`{}` before the first reading)
//! - `GET /metrics` - Prometheus text exposition of the service counters
//! - `GET /health` - liveness probe

use crate::domain::snapshot::SharedState;
use crate::infra::metrics::{Metrics, MetricsTotals, METRICS_BUCKET_BOUNDS, METRICS_NUM_BUCKETS};
use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{HeaderValue, ACCESS_CONTROL_ALLOW_ORIGIN, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::fmt::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Shared handles the routes read from
#[derive(Clone)]
pub struct HttpContext {
    pub metrics: Arc<Metrics>,
    pub state: SharedState,
    pub site_id: Arc<String>,
}

enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

fn write_metric(
    output: &mut String,
    name: &str,
    help: &str,
    typ: MetricType,
    site: &str,
    val: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name}{{site=\"{site}\"}} {val}");
}

fn write_histogram(
    output: &mut String,
    name: &str,
    help: &str,
    site: &str,
    buckets: &[u64; METRICS_NUM_BUCKETS],
    sum: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} histogram");

    let mut cumulative = 0u64;
    for (count, bound) in buckets.iter().zip(METRICS_BUCKET_BOUNDS.iter()) {
        cumulative += count;
        let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"{bound}\"}} {cumulative}");
    }
    cumulative += buckets[METRICS_NUM_BUCKETS - 1];
    let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"+Inf\"}} {cumulative}");
    let _ = writeln!(output, "{name}_sum{{site=\"{site}\"}} {sum}");
    let _ = writeln!(output, "{name}_count{{site=\"{site}\"}} {cumulative}");
}

/// Gauges for the buffers behind the latest state: (cv, rfid, scale)
type BufferCounts = (usize, usize, usize);

/// Format counters in Prometheus text exposition format
fn format_prometheus_metrics(
    totals: &MetricsTotals,
    buffers: Option<BufferCounts>,
    site: &str,
) -> String {
    let mut output = String::with_capacity(4096);

    let counters: [(&str, &str, u64); 10] = [
        (
            "reconciler_readings_received_total",
            "Readings received from the transport",
            totals.readings_received,
        ),
        (
            "reconciler_readings_processed_total",
            "Readings applied by the session",
            totals.readings_processed,
        ),
        (
            "reconciler_readings_dropped_total",
            "Readings dropped due to channel full",
            totals.readings_dropped,
        ),
        (
            "reconciler_out_of_order_total",
            "Readings rejected by the basket lifecycle",
            totals.out_of_order,
        ),
        ("reconciler_malformed_total", "Readings with unparsable payloads", totals.malformed),
        (
            "reconciler_unknown_device_total",
            "Readings from unrecognised devices",
            totals.unknown_device,
        ),
        (
            "reconciler_lookup_failures_total",
            "Product catalog lookup failures",
            totals.lookup_failures,
        ),
        (
            "reconciler_epc_decode_failures_total",
            "RFID tags that failed EPC decoding",
            totals.epc_decode_failures,
        ),
        (
            "reconciler_remove_failures_total",
            "Removals exceeding the ledger quantity",
            totals.remove_failures,
        ),
        (
            "reconciler_suspect_lists_total",
            "Suspect lists handed to the notifier",
            totals.suspect_lists_emitted,
        ),
    ];
    for (name, help, val) in counters {
        write_metric(&mut output, name, help, MetricType::Counter, site, val);
    }

    write_histogram(
        &mut output,
        "reconciler_reading_latency_us",
        "Reading processing latency in microseconds",
        site,
        &totals.lat_buckets,
        totals.lat_sum_us,
    );

    if let Some((cv, rfid, scale)) = buffers {
        let gauges = [
            ("reconciler_cv_objects", "Tracked CV objects", cv),
            ("reconciler_rfid_objects", "Tracked RFID tags", rfid),
            ("reconciler_scale_events", "Buffered scale events", scale),
        ];
        for (name, help, val) in gauges {
            write_metric(&mut output, name, help, MetricType::Gauge, site, val as u64);
        }
    }

    output
}

fn respond(
    status: StatusCode,
    content_type: &'static str,
    body: impl Into<Bytes>,
) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

fn current_state_body(state: &SharedState) -> Vec<u8> {
    match state.read().as_ref() {
        Some(snapshot) => match serde_json::to_vec(snapshot) {
            Ok(body) => body,
            Err(e) => {
                error!(error = %e, "current_state_serialize_failed");
                b"{}".to_vec()
            }
        },
        None => b"{}".to_vec(),
    }
}

fn route(method: &Method, path: &str, ctx: &HttpContext) -> Response<Full<Bytes>> {
    match (method, path) {
        (&Method::GET, "/current-state") => {
            let body = current_state_body(&ctx.state);
            let mut response = respond(StatusCode::OK, "application/json", body);
            response
                .headers_mut()
                .insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
            response
        }
        (&Method::GET, "/metrics") => {
            let buffers = ctx
                .state
                .read()
                .as_ref()
                .map(|s| (s.stats.cv_count, s.stats.rfid_count, s.stats.scale_count));
            let body = format_prometheus_metrics(&ctx.metrics.totals(), buffers, &ctx.site_id);
            respond(StatusCode::OK, PROMETHEUS_CONTENT_TYPE, body)
        }
        (&Method::GET, "/health") => respond(StatusCode::OK, "text/plain", "ok"),
        _ => respond(StatusCode::NOT_FOUND, "text/plain", "Not Found"),
    }
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    ctx: HttpContext,
) -> Result<Response<Full<Bytes>>, Infallible> {
    Ok(route(req.method(), req.uri().path(), &ctx))
}

pub async fn start_http_server(
    port: u16,
    ctx: HttpContext,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;

    info!(port = %port, site = %ctx.site_id, "http_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let ctx = ctx.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| handle_request(req, ctx.clone()));
                            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                                error!(error = %e, "http_connection_error");
                            }
                        });
                    }
                    Err(e) => error!(error = %e, "http_accept_error"),
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("http_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}
