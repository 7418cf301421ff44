//! Boundary-completeness endpoints: `/v1/models` and `/health`.

mod common;

use common::{final_answer_turn, spawn_stack, TEMPLATE_NAME};
use serde_json::json;

#[tokio::test]
async fn health_reports_ok_without_a_session() {
    let base = spawn_stack(vec![final_answer_turn("unused")]).await;

    let resp = reqwest::get(format!("{base}/health")).await.expect("request");
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    let body: serde_json::Value = resp.json().await.expect("json body");
    assert_eq!(body["status"], json!("ok"));
    assert_eq!(body["busy_instances"], json!(0));
    assert!(body["uptime_seconds"].is_number());
}

#[tokio::test]
async fn list_models_exposes_the_seeded_template_by_name() {
    let base = spawn_stack(vec![final_answer_turn("unused")]).await;

    let resp = reqwest::get(format!("{base}/v1/models")).await.expect("request");
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    let body: serde_json::Value = resp.json().await.expect("json body");
    let data = body["data"].as_array().expect("data array");
    assert_eq!(data.len(), 1);
    assert_eq!(data[0]["id"], json!(TEMPLATE_NAME));
    assert_eq!(data[0]["object"], json!("model"));
}
