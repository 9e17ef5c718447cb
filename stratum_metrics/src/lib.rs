//! Process-wide Prometheus metrics for the transaction core and their HTTP exporter.
use anyhow::Result;
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server, StatusCode};
use once_cell::sync::Lazy;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, TextEncoder};
use std::net::SocketAddr;

fn counter(name: &str, help: &str) -> IntCounter {
    prometheus::register_int_counter!(name, help).expect("metric registered once")
}

pub static TIMESTAMPS_ISSUED: Lazy<IntCounter> =
    Lazy::new(|| counter("stratum_timestamps_issued_total", "Timestamps handed out by the oracle"));
pub static TIMESTAMP_RESERVATIONS: Lazy<IntCounter> =
    Lazy::new(|| counter("stratum_timestamp_reservations_total", "High-water mark reservations persisted"));
pub static TIMESTAMP_RESERVE_LATENCY_SECS: Lazy<Histogram> = Lazy::new(|| {
    let opts = HistogramOpts::new("stratum_timestamp_reserve_latency_seconds", "Latency of persisting a timestamp block")
        .buckets(vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5]);
    prometheus::register_histogram!(opts).expect("metric registered once")
});
pub static TXNS_CREATED: Lazy<IntCounter> = Lazy::new(|| counter("stratum_txns_created_total", "Transactions created"));
pub static TXNS_COMMITTED: Lazy<IntCounter> =
    Lazy::new(|| counter("stratum_txns_committed_total", "Transactions committed"));
pub static TXNS_ROLLED_BACK: Lazy<IntCounter> =
    Lazy::new(|| counter("stratum_txns_rolled_back_total", "Transactions rolled back"));
pub static TXN_TIMEOUTS: Lazy<IntCounter> =
    Lazy::new(|| counter("stratum_txn_timeouts_total", "Active transactions observed past their keep-alive timeout"));
pub static TXN_CACHE_HITS: Lazy<IntCounter> =
    Lazy::new(|| counter("stratum_txn_cache_hits_total", "Completed-transaction cache hits"));
pub static KEEPALIVE_FAILURES: Lazy<IntCounter> =
    Lazy::new(|| counter("stratum_keepalive_failures_total", "Heartbeat writes that failed"));
pub static RESOLUTIONS_APPLIED: Lazy<IntCounter> =
    Lazy::new(|| counter("stratum_resolutions_applied_total", "Cell stamps rolled forward"));
pub static RESOLUTIONS_DROPPED: Lazy<IntCounter> =
    Lazy::new(|| counter("stratum_resolutions_dropped_total", "Resolve events dropped on a full queue"));
pub static WRITE_CONFLICTS: Lazy<IntCounter> =
    Lazy::new(|| counter("stratum_write_conflicts_total", "Write-write conflicts detected"));

/// Render every registered metric in the Prometheus text format.
pub fn render() -> Result<String> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&prometheus::gather(), &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

/// Launch Prometheus exporter HTTP server on given address.
/// When `basic_auth` is Some((user, pass)), requires Authorization header.
pub async fn serve(addr: &str, basic_auth: Option<(String, String)>) -> Result<()> {
    let addr: SocketAddr = addr.parse()?;
    let make_svc = make_service_fn(move |_| {
        let auth = basic_auth.clone();
        async move { Ok::<_, hyper::Error>(service_fn(move |req| metrics_handler(req, auth.clone()))) }
    });
    let server = Server::try_bind(&addr)?.serve(make_svc);
    tracing::info!(%addr, "metrics exporter listening");
    tokio::spawn(async move {
        if let Err(e) = server.await {
            tracing::error!(error = %e, "metrics server error");
        }
    });
    Ok(())
}

async fn metrics_handler(req: Request<Body>, auth: Option<(String, String)>) -> Result<Response<Body>, hyper::Error> {
    if req.uri().path() != "/metrics" {
        return Ok(respond(StatusCode::NOT_FOUND, Body::empty()));
    }
    if let Some((u, p)) = auth {
        let expected = format!("Basic {}", B64.encode(format!("{u}:{p}")));
        let presented = req.headers().get("Authorization").and_then(|h| h.to_str().ok());
        if presented != Some(expected.as_str()) {
            return Ok(respond(StatusCode::UNAUTHORIZED, Body::empty()));
        }
    }
    Ok(match render() {
        Ok(text) => respond(StatusCode::OK, Body::from(text)),
        Err(e) => respond(StatusCode::INTERNAL_SERVER_ERROR, Body::from(e.to_string())),
    })
}

fn respond(status: StatusCode, body: Body) -> Response<Body> {
    let mut resp = Response::new(body);
    *resp.status_mut() = status;
    resp
}
