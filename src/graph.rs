//! Client for the Graph messaging endpoint used to deliver page replies.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::config::GraphConfig;

/// Graph error codes that signal throttling.
const RATE_LIMIT_CODES: [i64; 4] = [4, 17, 32, 613];
/// Invalid parameter, expired token, missing permission, user unavailable.
const PERMANENT_CODES: [i64; 4] = [100, 190, 200, 551];
/// Code 10 with this subcode: message sent outside the allowed window.
const OUTSIDE_WINDOW_SUBCODE: i64 = 2_018_278;

#[derive(Error, Debug)]
pub enum GraphError {
    #[error("graph request failed: {0}")]
    Transport(String),

    #[error("graph api error {code} (status {status}): {message}")]
    Api {
        status: u16,
        code: i64,
        subcode: Option<i64>,
        message: String,
    },

    #[error("unexpected graph response (status {status}): {detail}")]
    InvalidResponse { status: u16, detail: String },
}

impl GraphError {
    /// Permanent errors are dead-lettered at once; everything else is retried.
    pub fn is_permanent(&self) -> bool {
        match self {
            GraphError::Transport(_) => false,
            GraphError::Api {
                status,
                code,
                subcode,
                ..
            } => {
                if RATE_LIMIT_CODES.contains(code) || *status == 429 || *status >= 500 {
                    return false;
                }
                PERMANENT_CODES.contains(code)
                    || (*code == 10 && *subcode == Some(OUTSIDE_WINDOW_SUBCODE))
                    || *status == 400
            }
            // a 2xx without a message id may already have been delivered
            GraphError::InvalidResponse { status, .. } => *status != 429 && *status < 500,
        }
    }
}

#[async_trait]
pub trait MessageSender: Send + Sync {
    /// Sends a text reply and returns the provider's message id.
    async fn send_text(
        &self,
        access_token: &SecretString,
        recipient_id: &str,
        text: &str,
    ) -> Result<String, GraphError>;
}

#[derive(Serialize)]
struct Recipient<'a> {
    id: &'a str,
}

#[derive(Serialize)]
struct TextMessage<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct SendRequest<'a> {
    recipient: Recipient<'a>,
    message: TextMessage<'a>,
    messaging_type: &'static str,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    error_subcode: Option<i64>,
    #[serde(default)]
    message: String,
}

/// Turns a send response into a message id or a classified error.
pub fn parse_send_response(status: u16, body: &str) -> Result<String, GraphError> {
    let value: Value = serde_json::from_str(body).map_err(|e| GraphError::InvalidResponse {
        status,
        detail: format!("body is not json: {e}"),
    })?;

    if let Some(error) = value.get("error") {
        let error: ApiErrorBody =
            serde_json::from_value(error.clone()).map_err(|e| GraphError::InvalidResponse {
                status,
                detail: format!("malformed error object: {e}"),
            })?;
        return Err(GraphError::Api {
            status,
            code: error.code,
            subcode: error.error_subcode,
            message: error.message,
        });
    }

    if !(200..300).contains(&status) {
        return Err(GraphError::InvalidResponse {
            status,
            detail: "error status without error object".to_string(),
        });
    }

    value
        .get("message_id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(ToOwned::to_owned)
        .ok_or_else(|| GraphError::InvalidResponse {
            status,
            detail: "response has no message_id".to_string(),
        })
}

#[derive(Clone)]
pub struct GraphClient {
    http: reqwest::Client,
    endpoint: Url,
}

impl GraphClient {
    pub fn new(config: &GraphConfig) -> Result<Self, GraphError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("shopdesk/", env!("CARGO_PKG_VERSION")))
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| GraphError::Transport(format!("failed to construct http client: {e}")))?;

        Ok(Self {
            http,
            endpoint: messages_endpoint(config)?,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

fn messages_endpoint(config: &GraphConfig) -> Result<Url, GraphError> {
    let raw = format!(
        "{}/{}/me/messages",
        config.base_url.trim_end_matches('/'),
        config.api_version.trim_matches('/')
    );
    Url::parse(&raw).map_err(|e| GraphError::Transport(format!("invalid graph url {raw}: {e}")))
}

#[async_trait]
impl MessageSender for GraphClient {
    async fn send_text(
        &self,
        access_token: &SecretString,
        recipient_id: &str,
        text: &str,
    ) -> Result<String, GraphError> {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("access_token", access_token.expose_secret());

        let payload = SendRequest {
            recipient: Recipient { id: recipient_id },
            message: TextMessage { text },
            messaging_type: "RESPONSE",
        };

        // without_url keeps the access token out of error messages
        let response = self
            .http
            .post(url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| GraphError::Transport(e.without_url().to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| GraphError::Transport(e.without_url().to_string()))?;

        debug!("graph send to {} returned status {}", recipient_id, status);
        parse_send_response(status, &body)
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    fn api_error(status: u16, code: i64, subcode: Option<i64>) -> GraphError {
        GraphError::Api {
            status,
            code,
            subcode,
            message: "fixture".to_string(),
        }
    }

    #[test]
    fn success_returns_message_id() {
        let body = r#"{"recipient_id":"2002","message_id":"m_AbC123"}"#;
        assert_eq!(parse_send_response(200, body).expect("id"), "m_AbC123");
    }

    #[test]
    fn error_object_becomes_api_error() {
        let body = r#"{"error":{"message":"(#10) This message is sent outside of allowed window.","type":"OAuthException","code":10,"error_subcode":2018278,"fbtrace_id":"Abc"}}"#;
        let err = parse_send_response(400, body).expect_err("api error");
        match err {
            GraphError::Api {
                status,
                code,
                subcode,
                ..
            } => {
                assert_eq!(status, 400);
                assert_eq!(code, 10);
                assert_eq!(subcode, Some(2_018_278));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn expired_token_is_permanent() {
        let body = r#"{"error":{"message":"Error validating access token","type":"OAuthException","code":190,"error_subcode":463}}"#;
        let err = parse_send_response(400, body).expect_err("api error");
        assert!(err.is_permanent());
    }

    #[test]
    fn throttling_is_transient() {
        let body = r#"{"error":{"message":"(#613) Calls to this api have exceeded the rate limit.","code":613}}"#;
        let err = parse_send_response(400, body).expect_err("api error");
        assert!(!err.is_permanent());
    }

    #[test]
    fn success_without_id_is_invalid() {
        let err = parse_send_response(200, r#"{"recipient_id":"2002"}"#).expect_err("no id");
        assert!(matches!(err, GraphError::InvalidResponse { .. }));
        assert!(err.is_permanent());
    }

    #[test]
    fn gateway_html_is_transient() {
        let err = parse_send_response(502, "<html>Bad Gateway</html>").expect_err("html");
        assert!(matches!(err, GraphError::InvalidResponse { status: 502, .. }));
        assert!(!err.is_permanent());
    }

    #[test_case(api_error(400, 100, None) => true; "invalid parameter")]
    #[test_case(api_error(403, 200, None) => true; "permission")]
    #[test_case(api_error(400, 551, None) => true; "user unavailable")]
    #[test_case(api_error(400, 10, Some(2_018_278)) => true; "outside window")]
    #[test_case(api_error(403, 10, None) => false; "code 10 without subcode")]
    #[test_case(api_error(400, 4, None) => false; "app rate limit")]
    #[test_case(api_error(400, 32, None) => false; "page rate limit")]
    #[test_case(api_error(500, 1, None) => false; "server error")]
    #[test_case(api_error(400, 2, None) => true; "other bad request")]
    #[test_case(GraphError::Transport("connection reset".into()) => false; "transport")]
    fn classification(err: GraphError) -> bool {
        err.is_permanent()
    }

    #[test]
    fn endpoint_is_built_from_config() {
        let config = GraphConfig {
            base_url: "https://graph.facebook.com/".to_string(),
            api_version: "v18.0".to_string(),
            request_timeout_secs: 5,
        };
        let client = GraphClient::new(&config).expect("client");
        assert_eq!(
            client.endpoint().as_str(),
            "https://graph.facebook.com/v18.0/me/messages"
        );
    }

    #[test]
    fn request_body_matches_send_api() {
        let payload = SendRequest {
            recipient: Recipient { id: "2002" },
            message: TextMessage { text: "hello" },
            messaging_type: "RESPONSE",
        };
        let value = serde_json::to_value(&payload).expect("serialize");
        assert_eq!(
            value,
            serde_json::json!({
                "recipient": {"id": "2002"},
                "message": {"text": "hello"},
                "messaging_type": "RESPONSE"
            })
        );
    }
}
