//! End-to-end tests against the built `agentd` binary: the same
//! spawn-the-binary-and-drive-it-externally shape as the Gateway's
//! `reqwest`-against-`TcpListener` tests, just across a process boundary
//! since this crate's surface is a binary, not a library.

use std::process::{Command, Stdio};
use std::time::Duration;

fn agentd() -> Command {
    Command::new(env!("CARGO_BIN_EXE_agentd"))
}

#[test]
fn run_with_mock_prints_the_canned_answer() {
    let output = agentd()
        .args(["run", "--mock", "what is 2+2?"])
        .env_remove("DATABASE_URL")
        .output()
        .expect("spawn agentd run");

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("mock response"), "stdout: {stdout}");
}

#[test]
fn run_seeds_a_distinct_template_per_name() {
    let output = agentd()
        .args(["run", "--mock", "--template", "custom-assistant", "hello"])
        .output()
        .expect("spawn agentd run");

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
}

#[test]
fn config_reports_unset_api_key() {
    let output = agentd()
        .arg("config")
        .env_remove("OPENAI_API_KEY")
        .output()
        .expect("spawn agentd config");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("OPENAI_API_KEY: <unset>"), "stdout: {stdout}");
}

#[tokio::test]
async fn serve_answers_health_checks_until_killed() {
    // Reserve a free port without holding the listener across the spawn.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("local_addr");
    drop(listener);

    let mut child = agentd()
        .args(["serve", "--mock", "--addr", &addr.to_string(), "--db", ":memory:"])
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn agentd serve");

    let url = format!("http://{addr}/health");
    let mut last_err = None;
    let mut ok = false;
    for _ in 0..50 {
        match reqwest::get(&url).await {
            Ok(resp) if resp.status().is_success() => {
                let body: serde_json::Value = resp.json().await.expect("json body");
                assert_eq!(body["status"], serde_json::json!("ok"));
                ok = true;
                break;
            }
            Ok(resp) => last_err = Some(format!("status {}", resp.status())),
            Err(e) => last_err = Some(e.to_string()),
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    let _ = child.kill();
    let _ = child.wait();

    assert!(ok, "server never answered /health: {last_err:?}");
}

#[test]
fn run_without_mock_or_api_key_fails_cleanly() {
    let output = agentd()
        .args(["run", "anything"])
        .env_remove("OPENAI_API_KEY")
        .output()
        .expect("spawn agentd run");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("OPENAI_API_KEY"), "stderr: {stderr}");
}
