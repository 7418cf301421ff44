//! End-to-end HTTP tests for `POST /v1/chat/completions`, driving a real
//! `InstancePool` worker through `reqwest` against a bound `TcpListener`.

mod common;

use common::{final_answer_turn, spawn_stack, TEMPLATE_NAME};
use futures::StreamExt;
use serde_json::json;

#[tokio::test]
async fn non_streaming_happy_path_returns_final_answer() {
    let base = spawn_stack(vec![final_answer_turn("the answer is 4")]).await;

    let resp = reqwest::Client::new()
        .post(format!("{base}/v1/chat/completions"))
        .json(&json!({
            "model": TEMPLATE_NAME,
            "stream": false,
            "messages": [{"role": "user", "content": "what is 2+2?"}],
        }))
        .send()
        .await
        .expect("request");

    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    let session_id = resp
        .headers()
        .get("x-session-id")
        .expect("x-session-id header")
        .to_str()
        .unwrap()
        .to_string();
    assert!(!session_id.is_empty());

    let body: serde_json::Value = resp.json().await.expect("json body");
    assert_eq!(
        body["choices"][0]["message"]["content"],
        json!("the answer is 4")
    );
    assert_eq!(body["choices"][0]["finish_reason"], json!("stop"));
}

#[tokio::test]
async fn streaming_happy_path_ends_with_done() {
    let base = spawn_stack(vec![final_answer_turn("streamed answer")]).await;

    let resp = reqwest::Client::new()
        .post(format!("{base}/v1/chat/completions"))
        .json(&json!({
            "model": TEMPLATE_NAME,
            "stream": true,
            "messages": [{"role": "user", "content": "stream this"}],
        }))
        .send()
        .await
        .expect("request");

    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    assert_eq!(
        resp.headers().get("content-type").unwrap(),
        "text/event-stream"
    );
    assert!(resp.headers().get("x-session-id").is_some());

    let mut stream = resp.bytes_stream();
    let mut body = String::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.expect("chunk");
        body.push_str(&String::from_utf8_lossy(&chunk));
    }

    assert!(body.contains(": session_id="));
    assert!(body.contains("event: step_start"));
    assert!(body.contains("event: done"));
    assert!(body.contains("streamed answer"));
    assert!(body.trim_end().ends_with("data: [DONE]"));
}

#[tokio::test]
async fn unknown_model_returns_model_not_found() {
    let base = spawn_stack(vec![final_answer_turn("unused")]).await;

    let resp = reqwest::Client::new()
        .post(format!("{base}/v1/chat/completions"))
        .json(&json!({
            "model": "no-such-template",
            "stream": false,
            "messages": [{"role": "user", "content": "hello"}],
        }))
        .send()
        .await
        .expect("request");

    assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);
    let body: serde_json::Value = resp.json().await.expect("json body");
    assert_eq!(body["error"]["code"], json!("model_not_found"));
}

#[tokio::test]
async fn missing_user_message_returns_bad_request() {
    let base = spawn_stack(vec![final_answer_turn("unused")]).await;

    let resp = reqwest::Client::new()
        .post(format!("{base}/v1/chat/completions"))
        .json(&json!({
            "model": TEMPLATE_NAME,
            "stream": false,
            "messages": [{"role": "system", "content": "no user turn here"}],
        }))
        .send()
        .await
        .expect("request");

    assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
}
