// ── PassGFW HTTP Transport Wrapper (C2) ────────────────────────────────────
// A minimal POST/GET contract the rest of the core is generic over (spec §4.2,
// §4.9). The default implementation is a `reqwest::Client` with a bounded
// timeout, a fixed redirect policy, and cookies disabled.

use async_trait::async_trait;
use reqwest::redirect::Policy;
use reqwest::Client;
use std::time::Duration;

use crate::config::{HTTP_TIMEOUT_MS, MAX_REDIRECTS};

/// `{success, statusCode, body, error}` — spec §4.9 `httpResponse`.
/// `success` is true iff a 2xx status was received.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub success: bool,
    pub status_code: u16,
    pub body: Vec<u8>,
    pub error: Option<String>,
}

impl HttpResponse {
    pub fn failed(error: impl Into<String>) -> Self {
        Self { success: false, status_code: 0, body: Vec::new(), error: Some(error.into()) }
    }

    pub fn body_as_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

/// The synchronous-looking POST/GET contract from spec §4.9, expressed as an
/// async trait so the resolver's batched-concurrent mode (spec §5) can await
/// many probes at once rather than blocking a thread per candidate.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// POST `body` verbatim with the given `Content-Type`. No request-side retry —
    /// retries are the resolver's concern (spec §4.7).
    async fn post(&self, url: &str, body: Vec<u8>, content_type: &str) -> HttpResponse;

    /// GET with no request body.
    async fn get(&self, url: &str) -> HttpResponse;
}

const USER_AGENT_PREFIX: &str = "PassGFW";

/// Default `HttpTransport`, backed by `reqwest`. Follows up to `MAX_REDIRECTS`
/// redirects on both verbs (spec §4.2, Open Question 4); cookies are never
/// stored (spec §4.2 "cookies are not [reused]").
pub struct ReqwestHttpTransport {
    client: Client,
}

impl ReqwestHttpTransport {
    pub fn new(platform: &str, version: &str) -> Self {
        let user_agent = format!("{USER_AGENT_PREFIX}/{version} {platform}");
        let client = Client::builder()
            .timeout(Duration::from_millis(HTTP_TIMEOUT_MS))
            .redirect(Policy::limited(MAX_REDIRECTS as usize))
            .user_agent(user_agent)
            .build()
            .expect("reqwest client configuration is always valid");
        Self { client }
    }
}

#[async_trait]
impl HttpTransport for ReqwestHttpTransport {
    async fn post(&self, url: &str, body: Vec<u8>, content_type: &str) -> HttpResponse {
        let result = self
            .client
            .post(url)
            .header("Content-Type", content_type)
            .body(body)
            .send()
            .await;
        to_http_response(result).await
    }

    async fn get(&self, url: &str) -> HttpResponse {
        let result = self.client.get(url).send().await;
        to_http_response(result).await
    }
}

async fn to_http_response(result: reqwest::Result<reqwest::Response>) -> HttpResponse {
    match result {
        Ok(resp) => {
            let status = resp.status();
            let status_code = status.as_u16();
            match resp.bytes().await {
                Ok(bytes) => HttpResponse {
                    success: status.is_success(),
                    status_code,
                    body: bytes.to_vec(),
                    error: if status.is_success() {
                        None
                    } else {
                        Some(format!("HTTP {status_code}"))
                    },
                },
                Err(e) => HttpResponse::failed(format!("failed to read response body: {e}")),
            }
        }
        Err(e) => HttpResponse::failed(e.to_string()),
    }
}
