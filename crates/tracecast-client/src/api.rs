//! HTTP client for the investigation API.

use std::time::Duration;

use futures::StreamExt;
use futures::stream::BoxStream;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracecast_core::{Investigation, InvestigationStatus, Message};
use tracecast_settings::ClientSettings;
use tracing::{debug, instrument};

use crate::errors::{ClientError, Result};
use crate::sse::{StreamItem, parse_event_stream};

/// Live push channel for one investigation.
pub type EventStream = BoxStream<'static, Result<StreamItem>>;

/// Default timeout for non-streaming requests.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Serialize)]
struct CreateBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<&'a str>,
    start: bool,
}

#[derive(Serialize)]
struct MessageBody<'a> {
    content: &'a str,
}

#[derive(Serialize)]
struct StatusBody<'a> {
    status: InvestigationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_message: Option<&'a str>,
}

/// Thin `reqwest` wrapper over the investigation endpoints.
///
/// The underlying client has no global timeout because the push channel is
/// long-lived; every other request gets `request_timeout`.
#[derive(Clone, Debug)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    request_timeout: Duration,
}

impl ApiClient {
    /// Client for `base_url` (e.g. `http://127.0.0.1:8080`).
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_timeout(base_url, DEFAULT_REQUEST_TIMEOUT)
    }

    /// Client with an explicit per-request timeout.
    pub fn with_timeout(base_url: impl Into<String>, request_timeout: Duration) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            http: reqwest::Client::builder()
                .user_agent(concat!("tracecast/", env!("CARGO_PKG_VERSION")))
                .build()
                .unwrap_or_default(),
            base_url,
            request_timeout,
        }
    }

    /// Client configured from settings.
    pub fn from_settings(settings: &ClientSettings) -> Self {
        Self::with_timeout(
            settings.base_url.clone(),
            Duration::from_millis(settings.request_timeout_ms.max(1)),
        )
    }

    /// Server base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn send_json<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> Result<T> {
        let response = check(request.timeout(self.request_timeout).send().await?).await?;
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| ClientError::Decode {
            message: format!("invalid response body: {e}"),
        })
    }

    /// `POST /investigations`.
    pub async fn create_investigation(&self, id: Option<&str>, start: bool) -> Result<Investigation> {
        self.send_json(
            self.http
                .post(self.url("/investigations"))
                .json(&CreateBody { id, start }),
        )
        .await
    }

    /// `GET /investigations`.
    pub async fn list_investigations(&self) -> Result<Vec<Investigation>> {
        self.send_json(self.http.get(self.url("/investigations"))).await
    }

    /// `GET /investigations/{id}`.
    pub async fn get_investigation(&self, id: &str) -> Result<Investigation> {
        self.send_json(self.http.get(self.url(&format!("/investigations/{id}"))))
            .await
    }

    /// `PUT /investigations/{id}/status`.
    pub async fn update_status(
        &self,
        id: &str,
        status: InvestigationStatus,
        error_message: Option<&str>,
    ) -> Result<Investigation> {
        self.send_json(
            self.http
                .put(self.url(&format!("/investigations/{id}/status")))
                .json(&StatusBody {
                    status,
                    error_message,
                }),
        )
        .await
    }

    /// `GET /investigations/{id}/chat`: the authoritative history.
    pub async fn history(&self, id: &str) -> Result<Vec<Message>> {
        self.send_json(self.http.get(self.url(&format!("/investigations/{id}/chat"))))
            .await
    }

    /// `POST /investigations/{id}/message`.
    ///
    /// The returned message carries the server timestamp; use it, not a
    /// local clock, when showing the message.
    pub async fn post_message(&self, id: &str, content: &str) -> Result<Message> {
        self.send_json(
            self.http
                .post(self.url(&format!("/investigations/{id}/message")))
                .json(&MessageBody { content }),
        )
        .await
    }

    /// `DELETE /investigations/{id}`.
    pub async fn delete_investigation(&self, id: &str) -> Result<()> {
        let request = self
            .http
            .delete(self.url(&format!("/investigations/{id}")))
            .timeout(self.request_timeout);
        let _ = check(request.send().await?).await?;
        Ok(())
    }

    /// `GET /investigations/{id}/stream`, resuming after `after` when given.
    #[instrument(skip(self), fields(base_url = %self.base_url))]
    pub async fn open_stream(&self, id: &str, after: Option<u64>) -> Result<EventStream> {
        let mut request = self
            .http
            .get(self.url(&format!("/investigations/{id}/stream")))
            .header(reqwest::header::ACCEPT, "text/event-stream");
        if let Some(after) = after {
            request = request.query(&[("after", after)]);
        }
        let response = check(request.send().await?).await?;
        debug!(status = response.status().as_u16(), "stream opened");
        Ok(parse_event_stream(response.bytes_stream()).boxed())
    }
}

/// Pass success responses through; turn everything else into a status error.
async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ClientError::from_response_body(status.as_u16(), &body))
}
