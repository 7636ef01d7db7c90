//! HTTP API for aggregate statistics
//!
//! Serves the viewing and visitor aggregates, the live occupancy snapshot,
//! link health and Prometheus counters. Uses hyper for the HTTP server.

use crate::infra::config::Config;
use crate::infra::metrics::{Metrics, MetricsSummary};
use crate::io::link::LinkState;
use crate::io::store::EventStore;
use crate::services::occupancy::SharedOccupancy;
use crate::services::visitor_aggregator::hourly_visitor_totals;
use crate::services::ViewingAggregator;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{HeaderMap, HeaderValue, ALLOW, AUTHORIZATION, CONTENT_TYPE, WWW_AUTHENTICATE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use std::convert::Infallible;
use std::fmt::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

const JSON: &str = "application/json";
const PROMETHEUS_TEXT: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Build identifier reported by /health
pub const VERSION: &str = env!("GIT_HASH");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    ViewingData,
    VisitorData,
    Occupancy,
    Health,
    Metrics,
}

impl Route {
    fn from_path(path: &str) -> Option<Self> {
        match path {
            "/viewing_data" => Some(Route::ViewingData),
            "/visitor_data" => Some(Route::VisitorData),
            "/occupancy" => Some(Route::Occupancy),
            "/health" => Some(Route::Health),
            "/metrics" => Some(Route::Metrics),
            _ => None,
        }
    }

    fn requires_auth(&self) -> bool {
        matches!(self, Route::ViewingData | Route::VisitorData | Route::Occupancy)
    }
}

/// Configured basic auth credentials
///
/// Only the BLAKE3 digest of the password is held; `blake3::Hash` equality
/// is constant-time.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Credentials {
    username: String,
    password_hash: blake3::Hash,
}

impl Credentials {
    /// Check an `Authorization: Basic ...` header against these credentials
    fn accepts(&self, headers: &HeaderMap) -> bool {
        let Some(value) = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()) else {
            return false;
        };
        let Some(encoded) = value.strip_prefix("Basic ") else {
            return false;
        };
        let Ok(decoded) = STANDARD.decode(encoded.trim()) else {
            return false;
        };
        let Ok(decoded) = String::from_utf8(decoded) else {
            return false;
        };
        match decoded.split_once(':') {
            Some((username, password)) => {
                let password_ok = blake3::hash(password.as_bytes()) == self.password_hash;
                username == self.username && password_ok
            }
            None => false,
        }
    }
}

/// Everything a request handler reads
pub struct ApiState {
    store: Arc<dyn EventStore>,
    occupancy: SharedOccupancy,
    metrics: Arc<Metrics>,
    link_state: watch::Receiver<LinkState>,
    viewing: ViewingAggregator,
    credentials: Option<Credentials>,
    site_id: String,
}

impl ApiState {
    pub fn new(
        config: &Config,
        store: Arc<dyn EventStore>,
        occupancy: SharedOccupancy,
        metrics: Arc<Metrics>,
        link_state: watch::Receiver<LinkState>,
    ) -> Self {
        let credentials = match (config.http_username(), config.http_password_hash()) {
            (Some(username), Some(password_hash)) => Some(Credentials {
                username: username.to_string(),
                password_hash,
            }),
            _ => None,
        };

        Self {
            store,
            occupancy,
            metrics,
            link_state,
            viewing: ViewingAggregator::new(config.viewing_normalization()),
            credentials,
            site_id: config.site_id().to_string(),
        }
    }

    fn authorized(&self, headers: &HeaderMap) -> bool {
        self.credentials.as_ref().map_or(true, |c| c.accepts(headers))
    }
}

#[derive(Debug, Serialize)]
struct HealthBody<'a> {
    status: &'a str,
    link: &'a str,
    version: &'a str,
}

fn respond(status: StatusCode, content_type: &'static str, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

fn json_response<T: Serialize>(value: &T) -> Response<Full<Bytes>> {
    match serde_json::to_vec(value) {
        Ok(body) => respond(StatusCode::OK, JSON, body),
        Err(e) => {
            error!(error = %e, "http_serialize_failed");
            internal_error()
        }
    }
}

fn internal_error() -> Response<Full<Bytes>> {
    respond(StatusCode::INTERNAL_SERVER_ERROR, JSON, r#"{"error":"internal_error"}"#)
}

fn unauthorized() -> Response<Full<Bytes>> {
    let mut response = respond(StatusCode::UNAUTHORIZED, JSON, r#"{"error":"unauthorized"}"#);
    response
        .headers_mut()
        .insert(WWW_AUTHENTICATE, HeaderValue::from_static("Basic realm=\"presence-stats\""));
    response
}

fn method_not_allowed() -> Response<Full<Bytes>> {
    let mut response = respond(StatusCode::METHOD_NOT_ALLOWED, JSON, r#"{"error":"method_not_allowed"}"#);
    response.headers_mut().insert(ALLOW, HeaderValue::from_static("GET"));
    response
}

/// Prometheus metric type
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

/// Write a simple metric (counter or gauge) with site label
fn write_metric(output: &mut String, name: &str, help: &str, typ: MetricType, site: &str, val: u64) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name}{{site=\"{site}\"}} {val}");
}

fn format_prometheus_metrics(
    summary: &MetricsSummary,
    rooms: &[(i64, u32)],
    link: LinkState,
    site: &str,
) -> String {
    let mut output = String::with_capacity(2048);

    let counters: [(&str, &str, u64); 8] = [
        ("presence_messages_total", "Bus messages received", summary.messages_received),
        ("presence_malformed_dropped_total", "Payloads dropped as malformed", summary.malformed_dropped),
        ("presence_unknown_room_dropped_total", "Events dropped for unknown rooms", summary.unknown_room_dropped),
        ("presence_room_transitions_total", "Room transitions applied", summary.room_transitions),
        ("presence_viewings_total", "Exhibit viewings recorded", summary.viewing_records),
        ("presence_store_write_failures_total", "Store appends that failed", summary.store_write_failures),
        ("presence_reconnect_attempts_total", "Bus reconnection attempts", summary.reconnect_attempts),
        ("presence_events_dropped_total", "Decoded events dropped on a closed channel", summary.events_dropped),
    ];
    for (name, help, val) in counters {
        write_metric(&mut output, name, help, MetricType::Counter, site, val);
    }

    write_metric(&mut output, "presence_uptime_seconds", "Seconds since start", MetricType::Gauge, site, summary.uptime_secs);
    let connected = u64::from(link == LinkState::Connected);
    write_metric(&mut output, "presence_link_connected", "1 while the bus link is connected", MetricType::Gauge, site, connected);

    let _ = writeln!(output, "# HELP presence_room_occupancy Current visitors per room");
    let _ = writeln!(output, "# TYPE presence_room_occupancy gauge");
    for (room_id, count) in rooms {
        let _ = writeln!(output, "presence_room_occupancy{{site=\"{site}\",room=\"{room_id}\"}} {count}");
    }

    output
}

/// Handle one HTTP request
pub async fn handle_request<B>(req: Request<B>, state: Arc<ApiState>) -> Result<Response<Full<Bytes>>, Infallible> {
    let Some(route) = Route::from_path(req.uri().path()) else {
        return Ok(respond(StatusCode::NOT_FOUND, JSON, r#"{"error":"not_found"}"#));
    };
    if req.method() != Method::GET {
        return Ok(method_not_allowed());
    }
    if route.requires_auth() && !state.authorized(req.headers()) {
        warn!(path = %req.uri().path(), "http_unauthorized");
        return Ok(unauthorized());
    }
    debug!(path = %req.uri().path(), "http_request");

    let response = match route {
        Route::ViewingData => {
            let store = state.store.clone();
            let viewing = state.viewing;
            match tokio::task::spawn_blocking(move || viewing.query(store.as_ref())).await {
                Ok(Ok(percentages)) => json_response(&percentages),
                Ok(Err(e)) => {
                    error!(error = %e, "viewing_query_failed");
                    internal_error()
                }
                Err(e) => {
                    error!(error = %e, "viewing_query_panicked");
                    internal_error()
                }
            }
        }
        Route::VisitorData => {
            let store = state.store.clone();
            match tokio::task::spawn_blocking(move || hourly_visitor_totals(store.as_ref())).await {
                Ok(Ok(totals)) => json_response(&totals),
                Ok(Err(e)) => {
                    error!(error = %e, "visitor_query_failed");
                    internal_error()
                }
                Err(e) => {
                    error!(error = %e, "visitor_query_panicked");
                    internal_error()
                }
            }
        }
        Route::Occupancy => {
            let snapshot = state.occupancy.lock().clone();
            json_response(&snapshot)
        }
        Route::Health => {
            let link = *state.link_state.borrow();
            let status = if link == LinkState::Connected { "ok" } else { "degraded" };
            json_response(&HealthBody { status, link: link.as_str(), version: VERSION })
        }
        Route::Metrics => {
            let rooms: Vec<(i64, u32)> = state.occupancy.lock().rooms().map(|(id, count)| (id.0, count)).collect();
            let link = *state.link_state.borrow();
            let body = format_prometheus_metrics(&state.metrics.report(), &rooms, link, &state.site_id);
            respond(StatusCode::OK, PROMETHEUS_TEXT, body)
        }
    };
    Ok(response)
}

/// Accept connections until shutdown
pub async fn serve(listener: TcpListener, state: Arc<ApiState>, mut shutdown: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let state = state.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| handle_request(req, state.clone()));

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                error!(error = %e, "http_connection_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "http_accept_error");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("http_server_shutdown");
                    return;
                }
            }
        }
    }
}

/// Bind the API port and serve until shutdown
pub async fn start_api_server(
    port: u16,
    state: Arc<ApiState>,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!(port = %port, site = %state.site_id, "http_server_started");
    serve(listener, state, shutdown).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{RoomId, RoomTransition, ViewingRecord};
    use crate::io::store::MemoryStore;
    use crate::services::occupancy::OccupancyState;
    use chrono::{TimeZone, Utc};
    use http_body_util::BodyExt;

    struct Fixture {
        state: Arc<ApiState>,
        store: Arc<MemoryStore>,
        occupancy: SharedOccupancy,
        link_tx: watch::Sender<LinkState>,
    }

    fn fixture(config: Config) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let occupancy = OccupancyState::shared(config.room_count());
        let (link_tx, link_rx) = watch::channel(LinkState::Connected);
        let state = Arc::new(ApiState::new(
            &config,
            store.clone(),
            occupancy.clone(),
            Arc::new(Metrics::new()),
            link_rx,
        ));
        Fixture { state, store, occupancy, link_tx }
    }

    fn get(path: &str) -> Request<()> {
        Request::builder().method(Method::GET).uri(path).body(()).unwrap()
    }

    async fn body_json(response: Response<Full<Bytes>>) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_viewing_data() {
        let f = fixture(Config::default());
        let ts = Utc.with_ymd_and_hms(2026, 5, 2, 5, 10, 0).unwrap();
        for _ in 0..3 {
            f.store
                .append_viewing(&ViewingRecord { exhibit_id: "A".to_string(), timestamp: ts })
                .unwrap();
        }

        let response = handle_request(get("/viewing_data"), f.state.clone()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        let slots = body["A"].as_array().unwrap();
        assert_eq!(slots.len(), 24);
        assert!((slots[5].as_f64().unwrap() - 3.0 / 7200.0 * 100.0).abs() < 1e-12);
        assert_eq!(slots[4].as_f64().unwrap(), 0.0);
    }

    #[tokio::test]
    async fn test_visitor_data_shape() {
        let f = fixture(Config::default());
        let ts = Utc.with_ymd_and_hms(2026, 5, 2, 14, 0, 0).unwrap();
        let snapshots = f
            .occupancy
            .lock()
            .apply(&RoomTransition { room_id: RoomId(0), detected: true, timestamp: ts })
            .unwrap();
        f.store.append_visitor_count(&snapshots.arrival).unwrap();

        let response = handle_request(get("/visitor_data"), f.state.clone()).await.unwrap();
        let body = body_json(response).await;
        assert_eq!(
            body,
            serde_json::json!([{
                "_id": {"year": 2026, "month": 5, "day": 2, "hour": 14, "room_id": 0},
                "total_visitor_count": 1
            }])
        );
    }

    #[tokio::test]
    async fn test_occupancy_and_health() {
        let f = fixture(Config::default());
        let body = body_json(handle_request(get("/occupancy"), f.state.clone()).await.unwrap()).await;
        assert_eq!(body, serde_json::json!({"0": 0, "1": 0}));

        let body = body_json(handle_request(get("/health"), f.state.clone()).await.unwrap()).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["link"], "connected");
    }

    #[tokio::test]
    async fn test_health_reports_degraded_link() {
        let f = fixture(Config::default());
        f.link_tx.send_replace(LinkState::GaveUp);
        let body = body_json(handle_request(get("/health"), f.state.clone()).await.unwrap()).await;
        assert_eq!(body["status"], "degraded");
        assert_eq!(body["link"], "gave_up");
    }

    #[tokio::test]
    async fn test_unknown_path_and_wrong_method() {
        let f = fixture(Config::default());
        let response = handle_request(get("/nope"), f.state.clone()).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let post = Request::builder().method(Method::POST).uri("/viewing_data").body(()).unwrap();
        let response = handle_request(post, f.state.clone()).await.unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.headers()[ALLOW], "GET");
    }

    #[tokio::test]
    async fn test_basic_auth() {
        let f = fixture(Config::default().with_http_auth("curator", "s3cret"));

        let response = handle_request(get("/visitor_data"), f.state.clone()).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().contains_key(WWW_AUTHENTICATE));

        let wrong = Request::builder()
            .uri("/visitor_data")
            .header(AUTHORIZATION, format!("Basic {}", STANDARD.encode("curator:nope")))
            .body(())
            .unwrap();
        let response = handle_request(wrong, f.state.clone()).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let right = Request::builder()
            .uri("/visitor_data")
            .header(AUTHORIZATION, format!("Basic {}", STANDARD.encode("curator:s3cret")))
            .body(())
            .unwrap();
        let response = handle_request(right, f.state.clone()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = handle_request(get("/health"), f.state.clone()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn test_credentials_compare_password_digest() {
        let credentials =
            Credentials { username: "curator".to_string(), password_hash: blake3::hash(b"s3cret") };
        let header = |pair: &str| {
            let mut headers = HeaderMap::new();
            let value = format!("Basic {}", STANDARD.encode(pair));
            headers.insert(AUTHORIZATION, HeaderValue::from_str(&value).unwrap());
            headers
        };

        assert!(credentials.accepts(&header("curator:s3cret")));
        assert!(!credentials.accepts(&header("curator:s3cret ")));
        assert!(!credentials.accepts(&header("visitor:s3cret")));
        // the stored digest is not itself a valid password
        let digest = blake3::hash(b"s3cret").to_hex();
        assert!(!credentials.accepts(&header(&format!("curator:{digest}"))));
        assert!(!credentials.accepts(&HeaderMap::new()));
    }

    #[test]
    fn test_format_prometheus_metrics() {
        let summary = MetricsSummary { messages_received: 7, room_transitions: 3, ..Default::default() };
        let output = format_prometheus_metrics(&summary, &[(0, 2), (1, 0)], LinkState::Connected, "louvre");

        assert!(output.contains("presence_messages_total{site=\"louvre\"} 7"));
        assert!(output.contains("presence_room_transitions_total{site=\"louvre\"} 3"));
        assert!(output.contains("presence_link_connected{site=\"louvre\"} 1"));
        assert!(output.contains("presence_room_occupancy{site=\"louvre\",room=\"0\"} 2"));
    }
}
