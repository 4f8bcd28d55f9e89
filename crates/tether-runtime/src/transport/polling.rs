//! HTTP long-polling channel.
//!
//! ```text
//! POST   {base}/poll          -> {"sid": "..."}          open a session
//! GET    {base}/poll/{sid}    -> [ServerMessage, ...]    long-poll
//! POST   {base}/poll/{sid}    <- [ClientMessage, ...]    send
//! DELETE {base}/poll/{sid}                              close
//! ```
//!
//! A `404` or `410` on the poll request means the server dropped the session;
//! the channel then reports a normal close.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{StatusCode, header::CONTENT_TYPE};
use serde::Deserialize;
use tether_proto::{ClientMessage, ServerMessage, decode_server_batch, encode_batch};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, warn};
use url::Url;

use super::{Channel, Connector, with_scheme};
use crate::error::TransportError;

/// Inbound messages buffered between the poll task and the worker.
const INBOUND_BUFFER: usize = 64;

#[derive(Debug, Deserialize)]
struct OpenResponse {
    sid: String,
}

/// Opens long-polling channels.
#[derive(Debug, Clone)]
pub struct LongPollConnector {
    http: reqwest::Client,
    connect_timeout: Duration,
}

impl LongPollConnector {
    /// Create a connector.
    ///
    /// `poll_timeout` bounds a single long-poll request and must exceed the
    /// server's hold time.
    pub fn new(connect_timeout: Duration, poll_timeout: Duration) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder().timeout(poll_timeout).build()?;
        Ok(Self { http, connect_timeout })
    }
}

#[async_trait]
impl Connector for LongPollConnector {
    async fn connect(&self, server: &str) -> Result<Box<dyn Channel>, TransportError> {
        let base = with_scheme(server, "https", "http")?;
        let open_url = join(&base, "poll")?;

        let response = self
            .http
            .post(open_url)
            .timeout(self.connect_timeout)
            .send()
            .await?
            .error_for_status()?;
        let OpenResponse { sid } = response.json().await?;

        if sid.is_empty() || sid.contains('/') {
            return Err(TransportError::Protocol(format!("invalid session id {sid:?}")));
        }

        let session_url = join(&base, &format!("poll/{sid}"))?;
        debug!(%session_url, "long-poll session opened");

        Ok(Box::new(LongPollChannel::start(self.http.clone(), session_url)))
    }
}

/// Open long-polling channel.
///
/// A background task runs the poll loop and feeds a bounded queue, so
/// [`Channel::recv`] is cancel safe.
pub struct LongPollChannel {
    http: reqwest::Client,
    session_url: Url,
    inbound: mpsc::Receiver<Result<ServerMessage, TransportError>>,
    poller: JoinHandle<()>,
    closed: bool,
}

impl LongPollChannel {
    fn start(http: reqwest::Client, session_url: Url) -> Self {
        let (tx, inbound) = mpsc::channel(INBOUND_BUFFER);
        let poller = tokio::spawn(poll_loop(http.clone(), session_url.clone(), tx));

        Self { http, session_url, inbound, poller, closed: false }
    }
}

impl Drop for LongPollChannel {
    fn drop(&mut self) {
        self.poller.abort();
    }
}

#[async_trait]
impl Channel for LongPollChannel {
    fn transport(&self) -> &'static str {
        "long-poll"
    }

    async fn send(&mut self, message: &ClientMessage) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }

        let body = encode_batch(std::slice::from_ref(message))?;
        self.http
            .post(self.session_url.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?
            .error_for_status()?;

        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<ServerMessage, TransportError>> {
        if self.closed {
            return None;
        }
        self.inbound.recv().await
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if std::mem::replace(&mut self.closed, true) {
            return Ok(());
        }

        self.poller.abort();
        self.http.delete(self.session_url.clone()).send().await?;
        Ok(())
    }
}

async fn poll_loop(
    http: reqwest::Client,
    session_url: Url,
    tx: mpsc::Sender<Result<ServerMessage, TransportError>>,
) {
    loop {
        let batch = match poll_once(&http, &session_url).await {
            Ok(Some(batch)) => batch,
            Ok(None) => {
                debug!(%session_url, "long-poll session ended by server");
                return;
            },
            Err(err) => {
                warn!(%err, "long-poll request failed");
                let _ = tx.send(Err(err)).await;
                return;
            },
        };

        for message in batch {
            if tx.send(Ok(message)).await.is_err() {
                return;
            }
        }
    }
}

/// One poll round trip. `None` when the session is gone.
async fn poll_once(
    http: &reqwest::Client,
    session_url: &Url,
) -> Result<Option<Vec<ServerMessage>>, TransportError> {
    let response = http.get(session_url.clone()).send().await?;

    match response.status() {
        StatusCode::NOT_FOUND | StatusCode::GONE => return Ok(None),
        StatusCode::NO_CONTENT => return Ok(Some(Vec::new())),
        _ => {},
    }

    let body = response.error_for_status()?.text().await?;
    Ok(Some(accept_batch(&body)?))
}

/// Decode a poll body, dropping malformed elements the way the websocket
/// channel drops malformed frames.
fn accept_batch(body: &str) -> Result<Vec<ServerMessage>, TransportError> {
    let messages = decode_server_batch(body)?
        .into_iter()
        .filter_map(|element| match element {
            Ok(message) => Some(message),
            Err(err) => {
                warn!(%err, "dropping malformed server message from poll batch");
                None
            },
        })
        .collect();

    Ok(messages)
}

fn join(base: &Url, path: &str) -> Result<Url, TransportError> {
    let mut url = base.clone();
    let trimmed = url.path().trim_end_matches('/').to_string();
    url.set_path(&format!("{trimmed}/{path}"));

    if url.cannot_be_a_base() {
        return Err(TransportError::InvalidEndpoint(base.to_string()));
    }
    Ok(url)
}
