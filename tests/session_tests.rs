//! Integration tests for the FreeIPA session clients using wiremock.
//!
//! These tests run the clients against a mock FreeIPA server, covering the
//! JSON-RPC envelope, password login and session cookies, error decoding,
//! password changes and failover between servers.

use std::time::Duration;

use serde_json::{Value, json};
use wiremock::matchers::{body_json, body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use freeipa_client::{
    BlockingIpaClient, ClientError, IpaClient, IpaErrorKind, LoginRejection, Params,
};

// =============================================================================
// Test Helpers
// =============================================================================

/// Address no server listens on; connecting fails immediately.
const DEAD_SERVER: &str = "http://127.0.0.1:1";

fn rpc_ok(result: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "result": result,
        "error": null,
        "id": 0,
        "principal": "admin@EXAMPLE.TEST",
        "version": "4.9.8",
    }))
}

fn rpc_error(code: i64, name: &str, message: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "result": null,
        "error": {"code": code, "name": name, "message": message, "data": {}},
        "id": 0,
    }))
}

async fn mount_login(server: &MockServer, expected_calls: u64) {
    Mock::given(method("POST"))
        .and(path("/ipa/session/login_password"))
        .and(body_string_contains("user=admin"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Set-Cookie", "ipa_session=abc123; Path=/ipa; HttpOnly"),
        )
        .expect(expected_calls)
        .mount(server)
        .await;
}

// =============================================================================
// Command Tests
// =============================================================================

#[tokio::test]
async fn user_add_sends_schema_envelope() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/ipa/session/json"))
        .and(header("referer", format!("{}/ipa", server.uri()).as_str()))
        .and(body_json(json!({
            "method": "user_add",
            "params": [
                ["jdoe"],
                {
                    "givenname": "John",
                    "sn": "Doe",
                    "cn": "John Doe",
                    "noprivate": false,
                    "all": true,
                    "raw": false,
                    "no_members": false,
                    "version": "2.235",
                }
            ],
            "id": 0,
        })))
        .respond_with(rpc_ok(json!({
            "result": {"uid": ["jdoe"]},
            "value": "jdoe",
            "summary": "Added user \"jdoe\"",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = IpaClient::new(server.uri()).expect("valid server");
    let result = client
        .user_add("jdoe", "John", "Doe", Params::new().with("cn", "John Doe"))
        .await
        .expect("user_add succeeds");

    assert_eq!(result["value"], "jdoe");
    assert_eq!(result["summary"], "Added user \"jdoe\"");
}

#[tokio::test]
async fn caller_params_override_defaults_on_the_wire() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/ipa/session/json"))
        .and(body_json(json!({
            "method": "user_find",
            "params": [
                ["jo"],
                {
                    "sizelimit": 5,
                    "all": false,
                    "raw": false,
                    "no_members": true,
                    "pkey_only": false,
                    "preserved": false,
                    "whoami": false,
                    "version": "2.235",
                }
            ],
            "id": 0,
        })))
        .respond_with(rpc_ok(json!({"count": 0, "result": [], "truncated": false})))
        .expect(1)
        .mount(&server)
        .await;

    let client = IpaClient::new(server.uri()).expect("valid server");
    let result = client
        .user_find(
            Some(json!("jo")),
            Params::new().with("sizelimit", 5).with("all", false),
        )
        .await
        .expect("user_find succeeds");
    assert_eq!(result["count"], 0);
}

#[tokio::test]
async fn raw_call_sends_only_version() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/ipa/session/json"))
        .and(body_json(json!({
            "method": "vault_show",
            "params": [["secrets"], {"version": "2.230"}],
            "id": 0,
        })))
        .respond_with(rpc_ok(json!({"value": "secrets"})))
        .expect(1)
        .mount(&server)
        .await;

    let client = IpaClient::builder(server.uri())
        .with_version("2.230")
        .build()
        .expect("valid server");
    let result = client
        .call_raw("vault_show", vec![json!("secrets")], serde_json::Map::new())
        .await
        .expect("raw call succeeds");
    assert_eq!(result["value"], "secrets");
}

#[tokio::test]
async fn missing_required_option_fails_before_any_request() {
    let server = MockServer::start().await;
    let client = IpaClient::new(server.uri()).expect("valid server");

    let error = client
        .call_command("stageuser_add", vec![json!("jdoe")], Params::new().with("sn", "Doe"))
        .await
        .expect_err("givenname is required");
    assert!(matches!(
        error,
        ClientError::MissingArgument { ref argument, .. } if argument == "givenname"
    ));
    assert!(server.received_requests().await.unwrap_or_default().is_empty());
}

#[tokio::test]
async fn unknown_command_fails_before_any_request() {
    let server = MockServer::start().await;
    let client = IpaClient::new(server.uri()).expect("valid server");

    let error = client
        .call_command("user_frobnicate", vec![], Params::new())
        .await
        .expect_err("not in catalog");
    assert!(matches!(error, ClientError::UnknownCommand(_)));
    assert!(server.received_requests().await.unwrap_or_default().is_empty());
}

// =============================================================================
// Error Tests
// =============================================================================

#[tokio::test]
async fn server_error_object_is_decoded() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/ipa/session/json"))
        .respond_with(rpc_error(4001, "NotFound", "nobody: user not found"))
        .mount(&server)
        .await;

    let client = IpaClient::new(server.uri()).expect("valid server");
    let error = client
        .user_show("nobody", Params::new())
        .await
        .expect_err("user does not exist");

    let ipa = error.ipa_error().expect("server-side error");
    assert_eq!(ipa.code, 4001);
    assert_eq!(ipa.kind(), IpaErrorKind::NotFound);
    assert_eq!(ipa.message, "nobody: user not found");
}

#[tokio::test]
async fn expired_session_is_unauthorized() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/ipa/session/json"))
        .respond_with(ResponseTemplate::new(401).set_body_string("Unauthorized"))
        .mount(&server)
        .await;

    let client = IpaClient::new(server.uri()).expect("valid server");
    let error = client.ping(Params::new()).await.expect_err("no session");
    assert!(matches!(error, ClientError::Unauthorized(_)));
}

// =============================================================================
// Session Tests
// =============================================================================

#[tokio::test]
async fn login_cookie_is_sent_with_commands() {
    let server = MockServer::start().await;
    mount_login(&server, 1).await;

    Mock::given(method("POST"))
        .and(path("/ipa/session/json"))
        .and(header("cookie", "ipa_session=abc123"))
        .respond_with(rpc_ok(json!({"summary": "IPA server version 4.9.8. API version 2.235"})))
        .expect(1)
        .mount(&server)
        .await;

    let client = IpaClient::new(server.uri()).expect("valid server");
    client.login("admin", "Secret123").await.expect("login succeeds");
    assert_eq!(client.current_user().as_deref(), Some("admin"));

    let result = client.ping(Params::new()).await.expect("ping succeeds");
    assert!(result["summary"].as_str().is_some_and(|s| s.contains("2.235")));
}

#[tokio::test]
async fn rejected_login_reports_reason() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/ipa/session/login_password"))
        .respond_with(
            ResponseTemplate::new(401).insert_header("X-IPA-Rejection-Reason", "invalid-password"),
        )
        .mount(&server)
        .await;

    let client = IpaClient::new(server.uri()).expect("valid server");
    let error = client
        .login("admin", "wrong")
        .await
        .expect_err("login rejected");
    assert!(matches!(
        error,
        ClientError::LoginRejected(LoginRejection::InvalidPassword)
    ));
    assert!(client.current_user().is_none());
}

#[tokio::test]
async fn logout_forgets_credentials() {
    let server = MockServer::start().await;
    mount_login(&server, 1).await;

    Mock::given(method("POST"))
        .and(path("/ipa/session/json"))
        .and(body_json(json!({
            "method": "session_logout",
            "params": [[], {"version": "2.235"}],
            "id": 0,
        })))
        .respond_with(rpc_ok(Value::Null))
        .expect(1)
        .mount(&server)
        .await;

    let client = IpaClient::new(server.uri()).expect("valid server");
    client.login("admin", "Secret123").await.expect("login succeeds");
    client.logout().await.expect("logout succeeds");
    assert!(client.current_user().is_none());
}

#[tokio::test]
async fn password_change_failure_is_reported() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/ipa/session/change_password"))
        .and(body_string_contains("user=jdoe"))
        .and(body_string_contains("otp=123456"))
        .respond_with(
            ResponseTemplate::new(200).insert_header("X-IPA-Pwchange-Result", "invalid-password"),
        )
        .mount(&server)
        .await;

    let client = IpaClient::new(server.uri()).expect("valid server");
    let error = client
        .change_password("jdoe", "old", "new", Some("123456"))
        .await
        .expect_err("old password is wrong");
    match error {
        ClientError::PasswordChange { result, .. } => assert_eq!(result, "invalid-password"),
        other => panic!("unexpected error: {other}"),
    }
}

// =============================================================================
// Failover Tests
// =============================================================================

#[tokio::test]
async fn login_fails_over_to_next_server() {
    let server = MockServer::start().await;
    mount_login(&server, 1).await;

    Mock::given(method("POST"))
        .and(path("/ipa/session/json"))
        .respond_with(rpc_ok(json!({"summary": "pong"})))
        .expect(1)
        .mount(&server)
        .await;

    let client = IpaClient::builder(DEAD_SERVER)
        .with_fallback_servers([server.uri()])
        .build()
        .expect("valid servers");
    assert_eq!(client.servers().len(), 2);

    client.login("admin", "Secret123").await.expect("second server answers");
    assert_eq!(
        client.active_server().to_string(),
        format!("{}/", server.uri())
    );

    // The failed server is not retried once another one is active.
    client.ping(Params::new()).await.expect("ping succeeds");
}

#[tokio::test]
async fn commands_fail_over_without_session() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/ipa/session/json"))
        .respond_with(rpc_ok(json!({"summary": "pong"})))
        .expect(1)
        .mount(&server)
        .await;

    let client = IpaClient::builder(DEAD_SERVER)
        .with_fallback_servers([server.uri()])
        .build()
        .expect("valid servers");
    let result = client.ping(Params::new()).await.expect("fails over");
    assert_eq!(result["summary"], "pong");
}

#[tokio::test]
async fn failover_logs_in_again_before_resending() {
    // A dedicated server, so dropping it closes its port.
    let first = MockServer::builder().start().await;
    Mock::given(method("POST"))
        .and(path("/ipa/session/login_password"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Set-Cookie", "ipa_session=first; Path=/ipa; HttpOnly")
                .insert_header("Connection", "close"),
        )
        .expect(1)
        .mount(&first)
        .await;

    let second = MockServer::start().await;
    mount_login(&second, 1).await;
    Mock::given(method("POST"))
        .and(path("/ipa/session/json"))
        .and(body_string_contains("\"user_show\""))
        .respond_with(rpc_ok(json!({"value": "admin"})))
        .expect(1)
        .mount(&second)
        .await;

    let client = IpaClient::builder(first.uri())
        .with_fallback_servers([second.uri()])
        .build()
        .expect("valid servers");
    client.login("admin", "Secret123").await.expect("first server answers");
    assert!(second.received_requests().await.unwrap_or_default().is_empty());

    drop(first);
    tokio::time::sleep(Duration::from_millis(200)).await;

    let result = client
        .user_show("admin", Params::new())
        .await
        .expect("second server answers");
    assert_eq!(result["value"], "admin");
    assert_eq!(
        client.active_server().to_string(),
        format!("{}/", second.uri())
    );

    let paths: Vec<String> = second
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .map(|request| request.url.path().to_owned())
        .collect();
    assert_eq!(paths, vec!["/ipa/session/login_password", "/ipa/session/json"]);
}

#[tokio::test]
async fn slow_response_is_not_sent_to_another_server() {
    let slow = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/ipa/session/json"))
        .respond_with(rpc_ok(json!({"value": "jdoe"})).set_delay(Duration::from_millis(1500)))
        .expect(1)
        .mount(&slow)
        .await;

    let fallback = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(rpc_ok(json!({"value": "jdoe"})))
        .expect(0)
        .mount(&fallback)
        .await;

    let client = IpaClient::builder(slow.uri())
        .with_fallback_servers([fallback.uri()])
        .with_timeout(Duration::from_millis(300))
        .build()
        .expect("valid servers");

    let error = client
        .user_add("jdoe", "John", "Doe", Params::new())
        .await
        .expect_err("response arrives after the timeout");
    assert!(matches!(&error, ClientError::Request(inner) if inner.is_timeout()));
    assert!(!error.is_connection_failure());
    assert_eq!(client.active_server().to_string(), format!("{}/", slow.uri()));
}

#[tokio::test]
async fn password_change_fails_over_to_next_server() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/ipa/session/change_password"))
        .and(body_string_contains("user=jdoe"))
        .respond_with(ResponseTemplate::new(200).insert_header("X-IPA-Pwchange-Result", "ok"))
        .expect(1)
        .mount(&server)
        .await;

    let client = IpaClient::builder(DEAD_SERVER)
        .with_fallback_servers([server.uri()])
        .build()
        .expect("valid servers");
    client
        .change_password("jdoe", "old", "new", None)
        .await
        .expect("second server changes the password");
}

#[tokio::test]
async fn last_connection_error_is_returned_when_all_servers_are_down() {
    let client = IpaClient::builder(DEAD_SERVER)
        .with_fallback_servers(["http://127.0.0.1:2"])
        .build()
        .expect("valid servers");

    let error = client
        .ping(Params::new())
        .await
        .expect_err("nothing is listening");
    assert!(error.is_connection_failure());
}

// =============================================================================
// Blocking Client Tests
// =============================================================================

#[tokio::test]
async fn blocking_client_logs_in_and_calls_commands() {
    let server = MockServer::start().await;
    mount_login(&server, 1).await;

    Mock::given(method("POST"))
        .and(path("/ipa/session/json"))
        .and(header("cookie", "ipa_session=abc123"))
        .and(body_json(json!({
            "method": "group_add_member",
            "params": [
                ["admins"],
                {"user": ["jdoe"], "all": true, "raw": false, "no_members": false, "version": "2.235"}
            ],
            "id": 0,
        })))
        .respond_with(rpc_ok(json!({"completed": 1, "failed": {}, "result": {}})))
        .expect(1)
        .mount(&server)
        .await;

    let uri = server.uri();
    let completed = tokio::task::spawn_blocking(move || {
        let client = BlockingIpaClient::new(uri).expect("valid server");
        client.login("admin", "Secret123").expect("login succeeds");
        client
            .group_add_member("admins", Params::new().with("user", json!(["jdoe"])))
            .expect("member added")
    })
    .await
    .expect("blocking task completes");

    assert_eq!(completed["completed"], 1);
}
