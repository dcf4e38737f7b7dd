//! ==============================================================================
//! exporter.rs - metrics endpoint
//! ==============================================================================
//!
//! purpose:
//!     serves the latest reading in the text exposition format scraped by
//!     pull-based collectors.
//!
//! relationships:
//!     - reads: store.rs (exactly one snapshot per request)
//!     - served by: supervisor.rs (listener + graceful shutdown)
//!
//! ==============================================================================

use crate::domain::Reading;
use crate::store::ReadingsStore;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use std::fmt::Write;
use tower_http::trace::TraceLayer;

pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

struct Gauge {
    name: &'static str,
    help: &'static str,
    value: fn(&Reading) -> f64,
}

/// exposed gauges, in output order
const GAUGES: [Gauge; 4] = [
    Gauge {
        name: "temperature_celsius",
        help: "Temperature in Celsius",
        value: |r| r.temperature_celsius,
    },
    Gauge {
        name: "temperature_fahrenheit",
        help: "Temperature in Fahrenheit",
        value: |r| r.temperature_fahrenheit,
    },
    Gauge {
        name: "humidity_percentage",
        help: "Humidity in percentage",
        value: |r| r.humidity_percent,
    },
    Gauge {
        name: "pressure_hpa",
        help: "Pressure in hPa",
        value: |r| r.pressure_hpa,
    },
];

/// render one reading as HELP/TYPE/value triples
pub fn render(reading: &Reading) -> String {
    let mut out = String::with_capacity(512);
    for gauge in &GAUGES {
        // writing into a String cannot fail
        let _ = writeln!(out, "# HELP {} {}", gauge.name, gauge.help);
        let _ = writeln!(out, "# TYPE {} gauge", gauge.name);
        let _ = writeln!(out, "{} {:.2}", gauge.name, (gauge.value)(reading));
    }
    out
}

/// router with the single metrics route; every other method, HEAD included,
/// gets 405
pub fn router(store: ReadingsStore, metrics_path: &str) -> Router {
    Router::new()
        .route(metrics_path, get(metrics_handler).head(method_not_allowed))
        .layer(TraceLayer::new_for_http())
        .with_state(store)
}

/// axum answers HEAD with the GET handler unless a HEAD route is set
async fn method_not_allowed() -> impl IntoResponse {
    (StatusCode::METHOD_NOT_ALLOWED, [(header::ALLOW, "GET")])
}

async fn metrics_handler(State(store): State<ReadingsStore>) -> impl IntoResponse {
    let reading = store.read().await;
    (
        [
            (header::CONTENT_TYPE, CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        render(&reading),
    )
}
