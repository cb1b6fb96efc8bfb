#![deny(clippy::all, clippy::pedantic)]

use assert_cmd::Command;
use httpmock::MockServer;
use predicates::str::contains;

fn relaycache() -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("relaycache"));
    cmd.env("RELAYCACHE__LOGGING__LEVEL", "warn");
    cmd
}

#[test]
fn fetch_prints_the_reply_as_json() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method("GET").path("/users").header("x-trace", "cli");
        then.status(200)
            .header("content-type", "application/json")
            .body(r#"[{"id":1,"name":"ada"}]"#);
    });

    let assert = relaycache()
        .arg("fetch")
        .arg("--cache-name")
        .arg("users")
        .arg("--url")
        .arg(server.url("/users"))
        .arg("--header")
        .arg("X-Trace: cli")
        .assert()
        .success();

    let output = String::from_utf8_lossy(&assert.get_output().stdout);
    assert!(output.contains("\"name\": \"ada\""));
    mock.assert();
}

#[test]
fn inline_data_is_echoed_without_a_request() {
    relaycache()
        .args(["fetch", "--cache-name", "draft", "--data", r#"{"title":"hi"}"#])
        .assert()
        .success()
        .stdout(contains("\"title\": \"hi\""));
}

#[test]
fn http_failure_exits_non_zero() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method("GET").path("/down");
        then.status(500);
    });

    relaycache()
        .arg("fetch")
        .arg("--cache-name")
        .arg("down")
        .arg("--url")
        .arg(server.url("/down"))
        .assert()
        .failure()
        .stderr(contains("status 500"));
}

#[test]
fn fetch_without_url_or_data_is_rejected() {
    relaycache()
        .args(["fetch", "--cache-name", "empty"])
        .assert()
        .failure()
        .stderr(contains("--url"));
}

#[test]
fn data_with_url_is_rejected() {
    relaycache()
        .args([
            "fetch",
            "--cache-name",
            "draft",
            "--url",
            "http://127.0.0.1:1/draft",
            "--data",
            "[1]",
        ])
        .assert()
        .failure()
        .stderr(contains("cannot be used with"));
}
