//! # Integration: HTTP endpoints over a real statistics directory.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;

use sluice_charts::service::{router, ChartService};
use sluice_stats::record::{StatBucket, WeightAccum};
use sluice_stats::recorder::Recorder;

// 2024-01-01 00:00:00 UTC
const JAN1_2024: i64 = 1_704_067_200;

const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1a, b'\n'];

fn seeded_dir() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    let mut rec = Recorder::new(
        dir.path().to_path_buf(),
        365,
        vec!["bymark".into()],
        true,
    );
    let mut accums = [WeightAccum::default()];
    for s in 0..30 {
        let mut bucket = StatBucket::default();
        bucket.add_pass(1000);
        if s % 3 == 0 {
            bucket.add_drop(400);
        }
        accums[0].add(2.0 + s as f64 / 10.0);
        rec.flush(JAN1_2024 + s, &mut bucket, &mut accums);
    }
    dir
}

fn app(dir: &tempfile::TempDir) -> axum::Router {
    router(Arc::new(ChartService {
        statdir: dir.path().to_path_buf(),
    }))
}

async fn get(app: axum::Router, uri: &str) -> (StatusCode, Vec<u8>) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, body.to_vec())
}

#[tokio::test]
async fn traffic_png_returns_png() {
    let dir = seeded_dir();
    let (status, body) = get(app(&dir), "/traffic.png?w=120&h=60").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[0..8], PNG_MAGIC);
}

#[tokio::test]
async fn traffic_png_base64_variant() {
    let dir = seeded_dir();
    let (status, body) = get(app(&dir), "/traffic.png?w=64&h=32&enc=base64").await;
    assert_eq!(status, StatusCode::OK);
    use base64::Engine as _;
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(&body)
        .expect("body is valid base64");
    assert_eq!(&decoded[0..8], PNG_MAGIC);
}

#[tokio::test]
async fn weights_png_returns_png() {
    let dir = seeded_dir();
    let uri = format!(
        "/weights.png?w=64&h=32&start={}&end={}",
        JAN1_2024,
        JAN1_2024 + 30
    );
    let (status, body) = get(app(&dir), &uri).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[0..8], PNG_MAGIC);
}

#[tokio::test]
async fn legend_lists_weight_sets_only() {
    let dir = seeded_dir();
    let (status, body) = get(app(&dir), "/api/weights/legend").await;
    assert_eq!(status, StatusCode::OK);
    let legend: serde_json::Value = serde_json::from_slice(&body).unwrap();
    let names: Vec<&str> = legend
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["bymark"]);
    assert!(legend[0]["color"].as_str().unwrap().starts_with('#'));
}

#[tokio::test]
async fn summary_reports_sets_and_range() {
    let dir = seeded_dir();
    let (status, body) = get(app(&dir), "/api/summary").await;
    assert_eq!(status, StatusCode::OK);
    let summary: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(summary["first_second"].as_i64(), Some(JAN1_2024));
    let sets = summary["sets"].as_array().unwrap();
    assert_eq!(sets.len(), 2);
    let dstat = sets.iter().find(|s| s["name"] == "dstat").unwrap();
    assert_eq!(dstat["first_second"].as_i64(), Some(JAN1_2024));
    assert_eq!(
        dstat["last_second"].as_i64(),
        Some(JAN1_2024 + 30),
        "30 written seconds"
    );
}

#[tokio::test]
async fn empty_directory_serves_blank_charts() {
    let dir = tempfile::tempdir().unwrap();
    let (status, body) = get(app(&dir), "/traffic.png").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[0..8], PNG_MAGIC);

    let (status, body) = get(app(&dir), "/api/summary").await;
    assert_eq!(status, StatusCode::OK);
    let summary: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert!(summary["sets"].as_array().unwrap().is_empty());
}
