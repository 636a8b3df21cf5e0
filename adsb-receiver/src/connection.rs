//! Resilient transports: a streaming TCP client and a polling HTTP client.
//!
//! Both report through a [`LinkHandler`] and share the [`Backoff`] policy:
//!
//! ```text
//! Connecting -> Connected -> (failure) -> Reconnecting(n, max) -> ... -> Error
//! ```
//!
//! `Connected` is only reported once the handler has decoded at least one
//! well-formed unit (a frame, a line or a document). Transport failures never leave these loops as errors; they end
//! up as `Reconnecting` or a terminal `Error` status. Cancellation stops the
//! loop at any await point, including a pending retry sleep, and no handler
//! call happens after it.

use std::time::Duration;

use adsb_core::{AdsbError, SourceStatus};
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backoff::{Backoff, RetryPolicy};

/// TCP connect timeout.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// A stream silent for this long is treated as dead.
pub const READ_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Per-request timeout for HTTP polls.
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

const READ_BUFFER: usize = 16 * 1024;

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("HTTP status {0}")]
    Status(reqwest::StatusCode),
    #[error("decode failed: {0}")]
    Decode(#[from] AdsbError),
    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),
    #[error("no data for {0:?}")]
    IdleTimeout(Duration),
    #[error("connection closed by peer")]
    Closed,
}

/// Receiver of raw payloads and status transitions.
pub trait LinkHandler: Send {
    /// Consume one chunk (TCP) or one response body (HTTP).
    ///
    /// Returns the number of aircraft currently known when the payload held
    /// at least one well-formed unit, `None` when nothing in it decoded.
    fn on_data(&mut self, data: &[u8]) -> Result<Option<usize>, AdsbError>;

    fn on_status(&mut self, status: SourceStatus);
}

/// Outcome of a failed session: retry, or give up with a terminal error.
fn schedule_retry<H: LinkHandler>(
    handler: &mut H,
    backoff: &mut Backoff,
    err: &ConnectionError,
    target: &str,
) -> Option<Duration> {
    match backoff.next_delay() {
        Some((attempt, delay)) => {
            warn!(
                target_addr = target,
                attempt,
                max = backoff.max_attempts(),
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "connection failed, retrying"
            );
            handler.on_status(SourceStatus::Reconnecting {
                attempt,
                max_attempts: backoff.max_attempts(),
            });
            Some(delay)
        }
        None => {
            warn!(target_addr = target, error = %err, "giving up after retries");
            handler.on_status(SourceStatus::Error(err.to_string()));
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Streaming TCP
// ---------------------------------------------------------------------------

/// Reconnecting TCP reader for SBS and Beast feeds.
#[derive(Debug, Clone)]
pub struct TcpStreamClient {
    address: String,
    policy: RetryPolicy,
    connect_timeout: Duration,
    idle_timeout: Duration,
}

impl TcpStreamClient {
    pub fn new(address: impl Into<String>, policy: RetryPolicy) -> Self {
        TcpStreamClient {
            address: address.into(),
            policy,
            connect_timeout: CONNECT_TIMEOUT,
            idle_timeout: READ_IDLE_TIMEOUT,
        }
    }

    pub fn with_timeouts(mut self, connect: Duration, idle: Duration) -> Self {
        self.connect_timeout = connect;
        self.idle_timeout = idle;
        self
    }

    /// Run until cancelled or until retries are exhausted.
    pub async fn run<H: LinkHandler>(&self, handler: &mut H, cancel: &CancellationToken) {
        let mut backoff = Backoff::new(self.policy.clone());
        handler.on_status(SourceStatus::Connecting);

        loop {
            let err = tokio::select! {
                _ = cancel.cancelled() => return,
                err = self.session(handler, &mut backoff) => err,
            };

            let Some(delay) = schedule_retry(handler, &mut backoff, &err, &self.address) else {
                return;
            };

            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// One connection lifetime. Only returns on failure.
    async fn session<H: LinkHandler>(&self, handler: &mut H, backoff: &mut Backoff) -> ConnectionError {
        let mut stream = match timeout(self.connect_timeout, TcpStream::connect(&self.address)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return e.into(),
            Err(_) => return ConnectionError::ConnectTimeout(self.connect_timeout),
        };
        debug!(addr = %self.address, "tcp connected");

        let mut buf = vec![0u8; READ_BUFFER];
        let mut accepted = false;
        loop {
            let n = match timeout(self.idle_timeout, stream.read(&mut buf)).await {
                Ok(Ok(0)) => return ConnectionError::Closed,
                Ok(Ok(n)) => n,
                Ok(Err(e)) => return e.into(),
                Err(_) => return ConnectionError::IdleTimeout(self.idle_timeout),
            };

            match handler.on_data(&buf[..n]) {
                Ok(Some(aircraft)) if !accepted => {
                    accepted = true;
                    backoff.reset();
                    info!(addr = %self.address, "feed connected");
                    handler.on_status(SourceStatus::Connected { aircraft });
                }
                Ok(_) => {}
                Err(e) => return e.into(),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Polling HTTP
// ---------------------------------------------------------------------------

/// Periodic GET of a JSON snapshot (dump1090).
#[derive(Debug, Clone)]
pub struct HttpPoller {
    url: String,
    client: reqwest::Client,
    interval: Duration,
    policy: RetryPolicy,
}

impl HttpPoller {
    pub fn new(url: impl Into<String>, interval: Duration, policy: RetryPolicy) -> Self {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        HttpPoller {
            url: url.into(),
            client,
            interval,
            policy,
        }
    }

    /// Poll until cancelled or until retries are exhausted.
    ///
    /// Sleeps the refresh interval after a good poll and the backoff delay
    /// after a failed one.
    pub async fn run<H: LinkHandler>(&self, handler: &mut H, cancel: &CancellationToken) {
        let mut backoff = Backoff::new(self.policy.clone());
        handler.on_status(SourceStatus::Connecting);

        loop {
            let outcome = tokio::select! {
                _ = cancel.cancelled() => return,
                r = self.poll_once(handler) => r,
            };

            let delay = match outcome {
                Ok(aircraft) => {
                    if backoff.attempt() > 0 {
                        info!(url = %self.url, "poll recovered");
                    }
                    backoff.reset();
                    handler.on_status(SourceStatus::Connected { aircraft });
                    self.interval
                }
                Err(err) => match schedule_retry(handler, &mut backoff, &err, &self.url) {
                    Some(delay) => delay,
                    None => return,
                },
            };

            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn poll_once<H: LinkHandler>(&self, handler: &mut H) -> Result<usize, ConnectionError> {
        let resp = self.client.get(&self.url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ConnectionError::Status(status));
        }
        let body = resp.bytes().await?;
        Ok(handler.on_data(&body)?.unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    /// Records everything; optionally cancels once enough bytes arrived.
    #[derive(Default)]
    struct Recorder {
        statuses: Vec<SourceStatus>,
        data: Vec<u8>,
        calls: usize,
        stop_after_bytes: Option<(usize, CancellationToken)>,
        reject: bool,
        undecodable: bool,
    }

    impl LinkHandler for Recorder {
        fn on_data(&mut self, data: &[u8]) -> Result<Option<usize>, AdsbError> {
            self.calls += 1;
            if self.reject {
                return Err(AdsbError::InvalidSource {
                    id: "test".into(),
                    reason: "rejected".into(),
                });
            }
            self.data.extend_from_slice(data);
            if let Some((limit, cancel)) = &self.stop_after_bytes {
                if self.data.len() >= *limit {
                    cancel.cancel();
                }
            }
            Ok((!self.undecodable).then_some(1))
        }

        fn on_status(&mut self, status: SourceStatus) {
            self.statuses.push(status);
        }
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            max_attempts,
            jitter: 0.2,
        }
    }

    /// An address nothing listens on.
    async fn refused_addr() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        addr.to_string()
    }

    #[tokio::test]
    async fn test_tcp_gives_up_after_max_attempts() {
        let client = TcpStreamClient::new(refused_addr().await, fast_policy(10));
        let mut rec = Recorder::default();
        client.run(&mut rec, &CancellationToken::new()).await;

        assert_eq!(rec.statuses.first(), Some(&SourceStatus::Connecting));
        let reconnects: Vec<u32> = rec
            .statuses
            .iter()
            .filter_map(|s| match s {
                SourceStatus::Reconnecting {
                    attempt,
                    max_attempts: 10,
                } => Some(*attempt),
                _ => None,
            })
            .collect();
        assert_eq!(reconnects, (1..=10).collect::<Vec<_>>());
        assert!(
            matches!(rec.statuses.last(), Some(SourceStatus::Error(_))),
            "last status should be Error, got {:?}",
            rec.statuses.last()
        );
        assert_eq!(rec.statuses.len(), 12);
        assert_eq!(rec.calls, 0);
    }

    #[tokio::test]
    async fn test_tcp_delivers_chunks_and_reports_connected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let payload = b"MSG,1,1,1,A12345,1,,,,,UAL1\nMSG,3,1,1,A12345,1,,,,,,35000\n";

        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            sock.write_all(payload).await.unwrap();
            // Keep the socket open until the client hangs up
            let mut sink = [0u8; 1];
            let _ = sock.read(&mut sink).await;
        });

        let cancel = CancellationToken::new();
        let mut rec = Recorder {
            stop_after_bytes: Some((payload.len(), cancel.clone())),
            ..Default::default()
        };
        TcpStreamClient::new(addr.to_string(), fast_policy(3))
            .run(&mut rec, &cancel)
            .await;

        assert_eq!(rec.data, payload);
        assert_eq!(
            rec.statuses,
            vec![SourceStatus::Connecting, SourceStatus::Connected { aircraft: 1 }]
        );
    }

    #[tokio::test]
    async fn test_tcp_undecodable_stream_never_connects() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let payload = b"SSH-2.0-OpenSSH_9.6\r\n";

        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            sock.write_all(payload).await.unwrap();
            let mut sink = [0u8; 1];
            let _ = sock.read(&mut sink).await;
        });

        let cancel = CancellationToken::new();
        let mut rec = Recorder {
            stop_after_bytes: Some((payload.len(), cancel.clone())),
            undecodable: true,
            ..Default::default()
        };
        TcpStreamClient::new(addr.to_string(), fast_policy(3))
            .run(&mut rec, &cancel)
            .await;

        assert_eq!(rec.data, payload);
        assert_eq!(rec.statuses, vec![SourceStatus::Connecting]);
    }

    #[tokio::test]
    async fn test_tcp_idle_timeout_is_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (_sock, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let mut rec = Recorder::default();
        TcpStreamClient::new(addr.to_string(), fast_policy(0))
            .with_timeouts(Duration::from_secs(1), Duration::from_millis(50))
            .run(&mut rec, &CancellationToken::new())
            .await;

        match rec.statuses.last() {
            Some(SourceStatus::Error(msg)) => assert!(msg.contains("no data"), "got {msg}"),
            other => panic!("expected Error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cancel_during_retry_sleep() {
        let policy = RetryPolicy {
            base_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(60),
            max_attempts: 10,
            jitter: 0.0,
        };
        let client = TcpStreamClient::new(refused_addr().await, policy);
        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            canceller.cancel();
        });

        let mut rec = Recorder::default();
        timeout(Duration::from_secs(5), client.run(&mut rec, &cancel))
            .await
            .expect("cancel must interrupt the retry sleep");
        assert_eq!(rec.statuses.len(), 2, "Connecting then one Reconnecting");
    }

    /// Serve `responses` in order, one per connection.
    async fn http_fixture(responses: Vec<(u16, &'static str)>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            for (code, body) in responses {
                let (mut sock, _) = listener.accept().await.unwrap();
                let mut req = [0u8; 2048];
                let _ = sock.read(&mut req).await;
                let reply = format!(
                    "HTTP/1.1 {code} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = sock.write_all(reply.as_bytes()).await;
                let _ = sock.shutdown().await;
            }
        });
        format!("http://{addr}/data/aircraft.json")
    }

    #[tokio::test]
    async fn test_http_poll_success() {
        let body = r#"{"aircraft":[{"hex":"abc123"}]}"#;
        let url = http_fixture(vec![(200, body)]).await;

        let cancel = CancellationToken::new();
        let mut rec = Recorder {
            stop_after_bytes: Some((body.len(), cancel.clone())),
            ..Default::default()
        };
        HttpPoller::new(url, Duration::from_millis(10), fast_policy(3))
            .run(&mut rec, &cancel)
            .await;

        assert_eq!(rec.data, body.as_bytes());
        assert_eq!(
            rec.statuses,
            vec![SourceStatus::Connecting, SourceStatus::Connected { aircraft: 1 }]
        );
    }

    #[tokio::test]
    async fn test_http_non_2xx_then_recovery() {
        let body = r#"{"aircraft":[]}"#;
        let url = http_fixture(vec![(503, "busy"), (200, body)]).await;

        let cancel = CancellationToken::new();
        let mut rec = Recorder {
            stop_after_bytes: Some((body.len(), cancel.clone())),
            ..Default::default()
        };
        HttpPoller::new(url, Duration::from_millis(10), fast_policy(3))
            .run(&mut rec, &cancel)
            .await;

        assert_eq!(
            rec.statuses,
            vec![
                SourceStatus::Connecting,
                SourceStatus::Reconnecting {
                    attempt: 1,
                    max_attempts: 3
                },
                SourceStatus::Connected { aircraft: 1 },
            ]
        );
        assert_eq!(rec.calls, 1, "the 503 body never reaches the handler");
    }

    #[tokio::test]
    async fn test_http_decode_failure_counts_as_failure() {
        let url = http_fixture(vec![(200, "{}"), (200, "{}")]).await;
        let mut rec = Recorder {
            reject: true,
            ..Default::default()
        };
        HttpPoller::new(url, Duration::from_millis(10), fast_policy(1))
            .run(&mut rec, &CancellationToken::new())
            .await;

        assert_eq!(rec.calls, 2);
        assert!(matches!(rec.statuses.last(), Some(SourceStatus::Error(m)) if m.contains("decode failed")));
    }
}
