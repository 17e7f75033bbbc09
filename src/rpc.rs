use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::command::RpcCall;
use crate::{ClientError, IpaError};

pub(crate) const JSON_PATH: &str = "ipa/session/json";
pub(crate) const LOGIN_PATH: &str = "ipa/session/login_password";
pub(crate) const CHANGE_PASSWORD_PATH: &str = "ipa/session/change_password";
pub(crate) const REFERER_PATH: &str = "ipa";

pub(crate) const REJECTION_REASON_HEADER: &str = "X-IPA-Rejection-Reason";
pub(crate) const PWCHANGE_RESULT_HEADER: &str = "X-IPA-Pwchange-Result";
pub(crate) const PWCHANGE_POLICY_ERROR_HEADER: &str = "X-IPA-Pwchange-Policy-Error";

/// Wraps a marshaled call in a FreeIPA JSON-RPC envelope.
///
/// The API `version` is added to the named parameters unless the caller set
/// one explicitly.
pub fn build_envelope(call: &RpcCall, version: &str) -> Value {
    let mut params = call.params.clone();
    params
        .entry("version")
        .or_insert_with(|| Value::from(version));

    json!({
        "method": call.method,
        "params": [call.args, params],
        "id": 0,
    })
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<IpaError>,
}

#[derive(Debug, Deserialize)]
struct ServerMessage {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    message: String,
}

/// Turns an HTTP response into the JSON-RPC `result` payload.
pub(crate) fn decode_response(
    method: &str,
    status: StatusCode,
    payload: &str,
) -> Result<Value, ClientError> {
    if status == StatusCode::UNAUTHORIZED {
        return Err(ClientError::Unauthorized(payload.trim().to_owned()));
    }
    if !status.is_success() {
        return Err(ClientError::HttpStatus {
            status,
            body: payload.to_owned(),
        });
    }
    if payload.trim().is_empty() {
        return Err(ClientError::InvalidResponse(format!(
            "empty response body for '{method}'"
        )));
    }

    let response: RpcResponse = serde_json::from_str(payload)?;
    if let Some(error) = response.error {
        debug!(method, code = error.code, name = %error.name, "server returned an error");
        return Err(ClientError::Ipa(error));
    }

    log_server_messages(method, &response.result);
    Ok(response.result)
}

fn log_server_messages(method: &str, result: &Value) {
    let Some(messages) = result.get("messages").and_then(Value::as_array) else {
        return;
    };

    for raw in messages {
        let Ok(message) = ServerMessage::deserialize(raw) else {
            continue;
        };
        if message.kind == "warning" || message.kind == "error" {
            warn!(method, name = %message.name, "{}", message.message);
        } else {
            debug!(method, kind = %message.kind, name = %message.name, "{}", message.message);
        }
    }
}
