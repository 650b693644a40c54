//! JSON shapes of the tunnel backend's HTTP API and the rules for turning
//! raw responses into typed results.
//!
//! - `GET  /api/tunnel/status` → `{status: "running"|"stopped", provider?, local_port?, url?}`
//! - `POST /api/tunnel/start`  → `{status: "success"|"error", message?}`
//! - `POST /api/tunnel/stop`   → `{status: "success"|"error", message?}`
//!
//! Parsing never looks past the documented shape; semantics belong to the
//! controller.

use serde::{Deserialize, Serialize};

use crate::error::{Result, TunnelError};
use crate::types::{Ack, BackendState, TunnelSettings, TunnelStatus};

pub const STATUS_PATH: &str = "/api/tunnel/status";
pub const START_PATH: &str = "/api/tunnel/start";
pub const STOP_PATH: &str = "/api/tunnel/stop";

/// Body of `POST /api/tunnel/start`.
#[derive(Debug, Serialize)]
pub struct StartRequest<'a> {
    pub provider: &'a str,
    pub local_port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pinggy_token: Option<&'a str>,
}

impl<'a> From<&'a TunnelSettings> for StartRequest<'a> {
    fn from(settings: &'a TunnelSettings) -> Self {
        Self {
            provider: settings.provider.as_str(),
            local_port: settings.local_port,
            pinggy_token: settings.token_for_request(),
        }
    }
}

/// Reply to start and stop.
#[derive(Debug, Deserialize)]
struct ActionResponse {
    status: String,
    #[serde(default)]
    message: Option<String>,
}

/// Reply to status.
#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: String,
    #[serde(default)]
    provider: Option<String>,
    #[serde(default)]
    local_port: Option<i64>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

fn is_success(code: u16) -> bool {
    (200..300).contains(&code)
}

/// Best-effort extraction of `{message}` from an error body.
fn error_message(body: &[u8]) -> Option<String> {
    serde_json::from_slice::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.message)
        .filter(|m| !m.is_empty())
}

/// Interpret a start or stop reply.
///
/// The body is read whatever the HTTP code: the backend reports validation
/// failures as `400 {status: "error", message}`.
pub fn parse_action(code: u16, body: &[u8]) -> Result<Ack> {
    let parsed = match serde_json::from_slice::<ActionResponse>(body) {
        Ok(p) => p,
        Err(_) if !is_success(code) => {
            return Err(TunnelError::Backend {
                status: code,
                message: error_message(body),
            })
        }
        Err(e) => return Err(TunnelError::Malformed(format!("action response: {e}"))),
    };

    match parsed.status.as_str() {
        "success" if is_success(code) => Ok(Ack {
            message: parsed.message,
        }),
        "success" | "error" => Err(TunnelError::Backend {
            status: code,
            message: parsed.message,
        }),
        other => Err(TunnelError::Malformed(format!(
            "unexpected action status {other:?}"
        ))),
    }
}

/// Interpret a status reply.
pub fn parse_status(code: u16, body: &[u8]) -> Result<TunnelStatus> {
    if !is_success(code) {
        return Err(TunnelError::Backend {
            status: code,
            message: error_message(body),
        });
    }

    let parsed: StatusResponse = serde_json::from_slice(body)
        .map_err(|e| TunnelError::Malformed(format!("status response: {e}")))?;

    let state = match parsed.status.as_str() {
        "running" => BackendState::Running,
        "stopped" => BackendState::Stopped,
        "error" if parsed.message.is_some() => {
            return Err(TunnelError::Backend {
                status: code,
                message: parsed.message,
            })
        }
        other => {
            return Err(TunnelError::Malformed(format!(
                "unexpected tunnel status {other:?}"
            )))
        }
    };

    let local_port = match parsed.local_port {
        None => None,
        Some(p) => match u16::try_from(p) {
            Ok(port) if port > 0 => Some(port),
            _ => return Err(TunnelError::Malformed(format!("invalid local_port {p}"))),
        },
    };

    Ok(TunnelStatus {
        state,
        provider: parsed.provider.filter(|p| !p.is_empty()),
        local_port,
        // An empty string is how some backends spell "not yet".
        url: parsed.url.filter(|u| !u.is_empty()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::types::TunnelProvider;
    use rstest::rstest;

    #[test]
    fn test_start_request_includes_token_for_pinggy() {
        let settings = TunnelSettings::new(TunnelProvider::Pinggy, 5000).with_pinggy_token("abc");
        let json = serde_json::to_value(StartRequest::from(&settings)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"provider": "pinggy", "local_port": 5000, "pinggy_token": "abc"})
        );
    }

    #[test]
    fn test_start_request_omits_token_for_cloudflare() {
        let settings = TunnelSettings::new(TunnelProvider::Cloudflare, 8080).with_pinggy_token("abc");
        let json = serde_json::to_value(StartRequest::from(&settings)).unwrap();
        assert_eq!(json, serde_json::json!({"provider": "cloudflare", "local_port": 8080}));
    }

    #[test]
    fn test_parse_action_success_with_message() {
        let ack = parse_action(200, br#"{"status":"success","message":"Tunnel started"}"#).unwrap();
        assert_eq!(ack.message.as_deref(), Some("Tunnel started"));
    }

    #[test]
    fn test_parse_action_error_carries_backend_message() {
        let err = parse_action(
            400,
            br#"{"status":"error","message":"Pinggy access token not provided or configured."}"#,
        )
        .unwrap_err();
        assert_eq!(
            err,
            TunnelError::Backend {
                status: 400,
                message: Some("Pinggy access token not provided or configured.".into())
            }
        );
    }

    #[rstest]
    #[case(200, br#"{"status":"error"}"#.as_slice(), ErrorKind::Backend)]
    #[case(500, br#"{"status":"success"}"#.as_slice(), ErrorKind::Backend)]
    #[case(502, b"<html>bad gateway</html>".as_slice(), ErrorKind::Backend)]
    #[case(200, b"not json".as_slice(), ErrorKind::Malformed)]
    #[case(200, br#"{"status":"maybe"}"#.as_slice(), ErrorKind::Malformed)]
    #[case(200, br#"{"message":"no status"}"#.as_slice(), ErrorKind::Malformed)]
    fn test_parse_action_failures(#[case] code: u16, #[case] body: &[u8], #[case] kind: ErrorKind) {
        assert_eq!(parse_action(code, body).unwrap_err().kind(), kind);
    }

    #[test]
    fn test_parse_status_running_with_url() {
        let status = parse_status(
            200,
            br#"{"status":"running","provider":"pinggy","local_port":5000,"url":"https://x.pinggy.io"}"#,
        )
        .unwrap();
        assert!(status.has_public_url());
        assert_eq!(status.provider.as_deref(), Some("pinggy"));
        assert_eq!(status.local_port, Some(5000));
    }

    #[rstest]
    #[case(br#"{"status":"running"}"#.as_slice())]
    #[case(br#"{"status":"running","url":null}"#.as_slice())]
    #[case(br#"{"status":"running","url":""}"#.as_slice())]
    fn test_parse_status_running_without_url(#[case] body: &[u8]) {
        let status = parse_status(200, body).unwrap();
        assert!(status.is_running());
        assert!(status.url.is_none());
    }

    #[test]
    fn test_parse_status_stopped() {
        let status = parse_status(200, br#"{"status":"stopped"}"#).unwrap();
        assert_eq!(status, TunnelStatus::stopped());
    }

    #[test]
    fn test_parse_status_non_200_uses_message() {
        let err = parse_status(500, br#"{"status":"error","message":"boom"}"#).unwrap_err();
        assert_eq!(
            err,
            TunnelError::Backend { status: 500, message: Some("boom".into()) }
        );
    }

    #[rstest]
    #[case(br#"{"status":"paused"}"#.as_slice())]
    #[case(br#"{"status":"running","local_port":0}"#.as_slice())]
    #[case(br#"{"status":"running","local_port":70000}"#.as_slice())]
    #[case(br#"{"status":"running","local_port":"5000"}"#.as_slice())]
    #[case(br#"[]"#.as_slice())]
    #[case(b"".as_slice())]
    fn test_parse_status_malformed(#[case] body: &[u8]) {
        assert_eq!(parse_status(200, body).unwrap_err().kind(), ErrorKind::Malformed);
    }
}
