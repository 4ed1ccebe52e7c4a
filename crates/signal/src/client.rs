//! signal-cli REST API client driven on the Signal worker thread.

use std::time::Duration;

use {
    async_trait::async_trait,
    chatrelay_channels::{Error, EventSink, Result, WorkerClient, WorkerConnector},
    futures::StreamExt,
    serde::Serialize,
    tokio_tungstenite::{connect_async, tungstenite::Message},
    tokio_util::sync::CancellationToken,
    tracing::{debug, error, info, warn},
};

use crate::{config::ServiceEndpoint, envelope::SignalEvent, reply_context::ReplyHandle};

/// Wait between receive-stream reconnect attempts.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const ERROR_BODY_LIMIT: usize = 200;

/// One outbound text message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalCommand {
    /// Phone number, UUID or `group.<id>` target.
    pub recipient: String,
    /// Already converted to Signal styled text.
    pub text: String,
    pub quote: Option<ReplyHandle>,
}

#[derive(Serialize)]
struct SendRequest<'a> {
    message: &'a str,
    number: &'a str,
    recipients: [&'a str; 1],
    text_mode: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    quote_timestamp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    quote_author: Option<&'a str>,
}

/// HTTP + websocket client for one signal-cli account.
#[derive(Debug)]
pub struct SignalRestClient {
    http: reqwest::Client,
    endpoint: ServiceEndpoint,
    account: String,
    reconnect_delay: Duration,
}

impl SignalRestClient {
    pub fn new(endpoint: ServiceEndpoint, account: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| Error::transport("build HTTP client", e))?;
        Ok(Self {
            http,
            endpoint,
            account: account.into(),
            reconnect_delay: RECONNECT_DELAY,
        })
    }

    #[must_use]
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    /// Probe `GET /v1/about` to confirm the REST service is reachable.
    pub async fn check_service(&self) -> Result<()> {
        let url = format!("{}/v1/about", self.endpoint.http_base());
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::transport("GET /v1/about", e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::transport_message(
                "GET /v1/about",
                format!("HTTP {status}"),
            ));
        }
        Ok(())
    }

    /// `POST /v2/send` one message in styled text mode.
    pub async fn send(&self, command: &SignalCommand) -> Result<()> {
        let url = format!("{}/v2/send", self.endpoint.http_base());
        let body = SendRequest {
            message: &command.text,
            number: &self.account,
            recipients: [command.recipient.as_str()],
            text_mode: "styled",
            quote_timestamp: command.quote.as_ref().map(|q| q.timestamp),
            quote_author: command.quote.as_ref().map(|q| q.author.as_str()),
        };
        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::transport("POST /v2/send", e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::transport_message(
                "POST /v2/send",
                format!("HTTP {status}: {}", truncate(&text, ERROR_BODY_LIMIT)),
            ));
        }
        debug!(recipient = %command.recipient, "signal message sent");
        Ok(())
    }

    /// Websocket URL streaming envelopes for this account.
    pub fn receive_url(&self) -> String {
        format!("{}/v1/receive/{}", self.endpoint.ws_base(), self.account)
    }

    /// One websocket connection; returns `Ok` only when cancelled.
    async fn receive_session(
        &self,
        events: &EventSink<SignalEvent>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let url = self.receive_url();
        let (mut stream, _response) = connect_async(url.as_str())
            .await
            .map_err(|e| Error::transport("connect receive websocket", e))?;
        info!(account = %self.account, "signal receive stream connected");

        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    let _ = stream.close(None).await;
                    return Ok(());
                },
                next = stream.next() => next,
            };
            let Some(message) = next else {
                return Err(Error::transport_message(
                    "receive websocket",
                    "stream ended",
                ));
            };
            match message.map_err(|e| Error::transport("read receive websocket", e))? {
                Message::Text(text) => self.forward_frame(&text, events),
                Message::Binary(bytes) => match std::str::from_utf8(&bytes) {
                    Ok(text) => self.forward_frame(text, events),
                    Err(_) => debug!("ignoring non-UTF-8 receive frame"),
                },
                Message::Close(_) => {
                    return Err(Error::transport_message(
                        "receive websocket",
                        "closed by server",
                    ));
                },
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {},
            }
            if events.is_closed() {
                return Ok(());
            }
        }
    }

    fn forward_frame(&self, raw: &str, events: &EventSink<SignalEvent>) {
        match SignalEvent::decode(raw, &self.account) {
            Ok(Some(event)) => {
                events.emit(event);
            },
            Ok(None) => debug!("ignoring envelope without a chat message"),
            Err(e) => warn!(error = %e, "failed to decode signal envelope"),
        }
    }
}

#[async_trait(?Send)]
impl WorkerClient for SignalRestClient {
    type Command = SignalCommand;
    type Event = SignalEvent;

    async fn execute(&self, command: SignalCommand) -> Result<()> {
        self.send(&command).await
    }

    async fn run(&self, events: EventSink<SignalEvent>, cancel: CancellationToken) -> Result<()> {
        while !cancel.is_cancelled() && !events.is_closed() {
            if let Err(e) = self.receive_session(&events, &cancel).await {
                error!(
                    account = %self.account,
                    error = %e,
                    retry_in_secs = self.reconnect_delay.as_secs(),
                    "signal receive stream failed"
                );
            }
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(self.reconnect_delay) => {},
            }
        }
        Ok(())
    }
}

/// Builds a [`SignalRestClient`] on the worker and checks the service is up.
#[derive(Debug, Clone)]
pub struct SignalConnector {
    endpoint: ServiceEndpoint,
    account: String,
    reconnect_delay: Duration,
}

impl SignalConnector {
    pub fn new(endpoint: ServiceEndpoint, account: impl Into<String>) -> Self {
        Self {
            endpoint,
            account: account.into(),
            reconnect_delay: RECONNECT_DELAY,
        }
    }

    #[must_use]
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }
}

#[async_trait(?Send)]
impl WorkerConnector for SignalConnector {
    type Client = SignalRestClient;

    async fn connect(&self) -> Result<SignalRestClient> {
        let client = SignalRestClient::new(self.endpoint.clone(), &self.account)?
            .with_reconnect_delay(self.reconnect_delay);
        client.check_service().await?;
        Ok(client)
    }
}

fn truncate(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {super::*, mockito::Matcher};

    const ACCOUNT: &str = "+14206942069";

    fn client_for(server: &mockito::Server) -> SignalRestClient {
        let endpoint = ServiceEndpoint::parse(&server.url()).unwrap();
        SignalRestClient::new(endpoint, ACCOUNT).unwrap()
    }

    #[tokio::test]
    async fn send_posts_styled_text() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v2/send")
            .match_body(Matcher::Json(serde_json::json!({
                "message": "**hi**",
                "number": ACCOUNT,
                "recipients": ["42"],
                "text_mode": "styled"
            })))
            .with_status(201)
            .with_body(r#"{"timestamp":"1700000000000"}"#)
            .create_async()
            .await;

        let client = client_for(&server);
        client
            .send(&SignalCommand {
                recipient: "42".into(),
                text: "**hi**".into(),
                quote: None,
            })
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn send_includes_quote() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v2/send")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "quote_timestamp": 1_700_000_000_000_i64,
                "quote_author": "+13072310423"
            })))
            .with_status(201)
            .create_async()
            .await;

        let client = client_for(&server);
        client
            .send(&SignalCommand {
                recipient: "+13072310423".into(),
                text: "pong".into(),
                quote: Some(ReplyHandle {
                    timestamp: 1_700_000_000_000,
                    author: "+13072310423".into(),
                }),
            })
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn send_failure_reports_status_and_body() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v2/send")
            .with_status(400)
            .with_body(r#"{"error":"Invalid recipient"}"#)
            .create_async()
            .await;

        let client = client_for(&server);
        let err = client
            .send(&SignalCommand {
                recipient: "nobody".into(),
                text: "hi".into(),
                quote: None,
            })
            .await
            .unwrap_err();
        let message = err.to_string();
        assert!(matches!(err, Error::Transport { .. }));
        assert!(message.contains("400"), "{message}");
        assert!(message.contains("Invalid recipient"), "{message}");
    }

    #[tokio::test]
    async fn connector_requires_reachable_service() {
        let mut server = mockito::Server::new_async().await;
        let about = server
            .mock("GET", "/v1/about")
            .with_status(200)
            .with_body(r#"{"versions":["v1","v2"]}"#)
            .create_async()
            .await;

        let endpoint = ServiceEndpoint::parse(&server.url()).unwrap();
        let connector = SignalConnector::new(endpoint, ACCOUNT);
        let client = connector.connect().await.unwrap();
        assert_eq!(client.account(), ACCOUNT);
        assert!(client.receive_url().starts_with("ws://"));
        assert!(client.receive_url().ends_with("/v1/receive/+14206942069"));
        about.assert_async().await;
    }

    #[tokio::test]
    async fn connector_fails_on_service_error() {
        let mut server = mockito::Server::new_async().await;
        let _about = server
            .mock("GET", "/v1/about")
            .with_status(503)
            .create_async()
            .await;

        let endpoint = ServiceEndpoint::parse(&server.url()).unwrap();
        let err = SignalConnector::new(endpoint, ACCOUNT)
            .connect()
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("503"));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("hi", 10), "hi");
    }
}
