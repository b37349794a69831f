//! HTTP long-poll transport, the degraded fallback.
//!
//! Outbound frames are POSTed. Inbound frames come from a background task
//! that keeps a GET outstanding and feeds every non-empty line of each
//! response into a channel, which keeps [`Transport::recv`] cancel-safe.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::config::TransportKind;
use crate::constants::LONG_POLL_TIMEOUT;
use crate::transport::{Transport, TransportError};

const INBOUND_BUFFER: usize = 64;

pub struct LongPollTransport {
    client: reqwest::Client,
    url: String,
    inbound: mpsc::Receiver<Result<String, TransportError>>,
    poller: JoinHandle<()>,
}

impl LongPollTransport {
    /// Probe the endpoint, then start polling.
    pub async fn connect(url: &str, poll_interval: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(LONG_POLL_TIMEOUT)
            .build()
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        debug!("long-poll probing {}", url);
        client
            .get(url)
            .query(&[("transport", "long-polling"), ("probe", "1")])
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        let (tx, inbound) = mpsc::channel(INBOUND_BUFFER);
        let poller = tokio::spawn(poll_loop(client.clone(), url.to_string(), poll_interval, tx));

        Ok(Self {
            client,
            url: url.to_string(),
            inbound,
            poller,
        })
    }
}

async fn poll_loop(
    client: reqwest::Client,
    url: String,
    poll_interval: Duration,
    tx: mpsc::Sender<Result<String, TransportError>>,
) {
    loop {
        let response = client
            .get(&url)
            .query(&[("transport", "long-polling")])
            .send()
            .await;

        let body = match response {
            Ok(r) if r.status() == reqwest::StatusCode::NO_CONTENT => String::new(),
            Ok(r) if r.status().is_success() => match r.text().await {
                Ok(body) => body,
                Err(e) => {
                    let _ = tx.send(Err(TransportError::Receive(e.to_string()))).await;
                    return;
                }
            },
            Ok(r) => {
                let _ = tx
                    .send(Err(TransportError::Protocol(format!("status {}", r.status()))))
                    .await;
                return;
            }
            // A held request timing out just means nothing happened.
            Err(e) if e.is_timeout() => continue,
            Err(e) => {
                let _ = tx.send(Err(TransportError::Receive(e.to_string()))).await;
                return;
            }
        };

        let mut delivered = false;
        for line in body.lines().map(str::trim).filter(|l| !l.is_empty()) {
            if tx.send(Ok(line.to_string())).await.is_err() {
                return;
            }
            delivered = true;
        }
        if !delivered {
            tokio::time::sleep(poll_interval).await;
        }
    }
}

#[async_trait]
impl Transport for LongPollTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::LongPoll
    }

    async fn send(&mut self, frame: String) -> Result<(), TransportError> {
        self.client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .body(frame)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map(|_| ())
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn recv(&mut self) -> Result<Option<String>, TransportError> {
        match self.inbound.recv().await {
            Some(Ok(frame)) => Ok(Some(frame)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }

    async fn close(&mut self) {
        self.poller.abort();
    }
}

impl Drop for LongPollTransport {
    fn drop(&mut self) {
        self.poller.abort();
    }
}
