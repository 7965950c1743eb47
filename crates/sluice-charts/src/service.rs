//! HTTP endpoints.
//!
//! - `GET /traffic.png?w=&h=&start=&end=&pb=` — pass/drop chart of the
//!   traffic series (`pb=1` plots octets, the default; `pb=0` packets)
//! - `GET /weights.png?w=&h=&start=&end=` — per-module weight lines
//! - `GET /api/weights/legend` — JSON name→colour legend
//! - `GET /api/summary` — JSON description of the store
//!
//! `start=0` (or absent) means "everything the store covers". Either
//! image endpoint takes `enc=base64` to return the PNG base64-encoded as
//! plain text for inline embedding. Missing data renders as a blank
//! grid; the service never 500s over an empty directory.

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use tracing::warn;

use sluice_stats::cursor::StatStore;
use sluice_stats::record::{Record, StatBucket, WeightSample};
use sluice_stats::recorder::TRAFFIC_SET;

use crate::render::{self, TrafficParams, WeightsParams};

pub struct ChartService {
    pub statdir: PathBuf,
}

pub fn router(service: Arc<ChartService>) -> Router {
    Router::new()
        .route("/traffic.png", get(traffic_png))
        .route("/weights.png", get(weights_png))
        .route("/api/weights/legend", get(weights_legend))
        .route("/api/summary", get(summary))
        .with_state(service)
}

const DEFAULT_WIDTH: usize = 800;
const DEFAULT_HEIGHT: usize = 300;

#[derive(Debug, Deserialize)]
struct ChartQuery {
    w: Option<usize>,
    h: Option<usize>,
    start: Option<i64>,
    end: Option<i64>,
    /// 1 (default) plots octets, 0 packets.
    pb: Option<u8>,
    /// `base64` switches the body to base64 text.
    enc: Option<String>,
}

fn png_response(data: Vec<u8>, base64: bool) -> Response {
    if base64 {
        (
            [(header::CONTENT_TYPE, "text/plain")],
            BASE64.encode(&data),
        )
            .into_response()
    } else {
        ([(header::CONTENT_TYPE, "image/png")], data).into_response()
    }
}

fn open_store(service: &ChartService) -> Option<StatStore> {
    match StatStore::open(&service.statdir) {
        Ok(store) => Some(store),
        Err(e) => {
            warn!(error = %e, "statistics dir unavailable");
            None
        }
    }
}

async fn traffic_png(
    State(service): State<Arc<ChartService>>,
    Query(q): Query<ChartQuery>,
) -> Response {
    let params = TrafficParams {
        width: q.w.unwrap_or(DEFAULT_WIDTH),
        height: q.h.unwrap_or(DEFAULT_HEIGHT),
        start: q.start.unwrap_or(0),
        end: q.end.unwrap_or(0),
        octets: q.pb.unwrap_or(1) != 0,
    };
    let base64 = q.enc.as_deref() == Some("base64");

    let rendered = tokio::task::spawn_blocking(move || {
        let bmp = match open_store(&service) {
            Some(store) => render::traffic_chart(&store, &params),
            None => blank(params.width, params.height),
        };
        bmp.encode_png()
    })
    .await;

    match rendered {
        Ok(data) => png_response(data, base64),
        Err(e) => {
            warn!(error = %e, "render task failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn weights_png(
    State(service): State<Arc<ChartService>>,
    Query(q): Query<ChartQuery>,
) -> Response {
    let params = WeightsParams {
        width: q.w.unwrap_or(DEFAULT_WIDTH),
        height: q.h.unwrap_or(DEFAULT_HEIGHT),
        start: q.start.unwrap_or(0),
        end: q.end.unwrap_or(0),
    };
    let base64 = q.enc.as_deref() == Some("base64");

    let rendered = tokio::task::spawn_blocking(move || {
        let bmp = match open_store(&service) {
            Some(store) => render::weights_chart(&store, &params).0,
            None => blank(params.width, params.height),
        };
        bmp.encode_png()
    })
    .await;

    match rendered {
        Ok(data) => png_response(data, base64),
        Err(e) => {
            warn!(error = %e, "render task failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn blank(width: usize, height: usize) -> render::Bitmap {
    let mut bmp = render::Bitmap::new(width, height);
    bmp.draw_grid();
    bmp
}

#[derive(Debug, Serialize)]
struct LegendItem {
    name: String,
    color: String,
}

async fn weights_legend(State(service): State<Arc<ChartService>>) -> Response {
    let items = tokio::task::spawn_blocking(move || {
        let Some(store) = open_store(&service) else {
            return Vec::new();
        };
        store
            .sets()
            .iter()
            .filter(|s| s.name != TRAFFIC_SET)
            .map(|s| {
                let c = render::name_color(&s.name);
                LegendItem {
                    name: s.name.clone(),
                    color: format!("#{:02x}{:02x}{:02x}", c.r, c.g, c.b),
                }
            })
            .collect::<Vec<_>>()
    })
    .await
    .unwrap_or_default();

    axum::Json(items).into_response()
}

#[derive(Debug, Serialize)]
struct SetSummary {
    name: String,
    days: usize,
    first_second: Option<i64>,
    last_second: Option<i64>,
}

#[derive(Debug, Serialize)]
struct StoreSummary {
    sets: Vec<SetSummary>,
    first_second: Option<i64>,
}

async fn summary(State(service): State<Arc<ChartService>>) -> Response {
    let summary = tokio::task::spawn_blocking(move || {
        let Some(store) = open_store(&service) else {
            return StoreSummary {
                sets: Vec::new(),
                first_second: None,
            };
        };
        let sets = store
            .sets()
            .iter()
            .map(|s| {
                let rec_size = if s.name == TRAFFIC_SET {
                    StatBucket::SIZE
                } else {
                    WeightSample::SIZE
                } as u64;
                SetSummary {
                    name: s.name.clone(),
                    days: s.days.len(),
                    first_second: s.first_second(),
                    last_second: s.last_second(rec_size),
                }
            })
            .collect();
        StoreSummary {
            sets,
            first_second: store.first_second(),
        }
    })
    .await
    .unwrap_or(StoreSummary {
        sets: Vec::new(),
        first_second: None,
    });

    axum::Json(summary).into_response()
}
