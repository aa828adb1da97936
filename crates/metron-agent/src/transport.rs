//! HTTP delivery of metric batches: gzip, optional encryption, optional
//! signing, bounded retries, and the one-shot batch-capability probe.

use std::time::Duration;

use metron_core::crypto::{CryptoError, Encryptor};
use metron_core::envelope::{self, EnvelopeError};
use metron_core::signing::Signer;
use metron_core::{ENCRYPTED_HEADER, Metric, SIGNATURE_HEADER};
use tracing::{debug, info, warn};
use ureq::Agent;
use ureq::http::StatusCode;

#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error("building payload: {0}")]
    Envelope(#[from] EnvelopeError),

    #[error("encrypting payload: {0}")]
    Crypto(#[from] CryptoError),

    #[error("http transport: {0}")]
    Http(#[from] Box<ureq::Error>),

    #[error("server rejected request: {0}")]
    Rejected(StatusCode),

    #[error("giving up after {attempts} attempts, last status {status}")]
    RetriesExhausted { attempts: u32, status: StatusCode },
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub wait: Duration,
    pub max_wait: Duration,
}

impl RetryPolicy {
    /// Backoff before the retry following attempt `attempt` (0-based):
    /// doubles from `wait`, capped at `max_wait`, with a little jitter so
    /// workers do not retry in lockstep.
    fn backoff(&self, attempt: u32) -> Duration {
        let exp = self.wait.saturating_mul(1u32 << attempt.min(16));
        let capped = exp.min(self.max_wait);
        capped + Duration::from_millis(fastrand::u64(0..250))
    }
}

/// Shared, thread-safe delivery client. Built once at boot; the capability
/// probe runs during construction and fixes the delivery mode for the
/// process lifetime.
pub struct HttpSender {
    agent: Agent,
    base_url: String,
    signer: Option<Signer>,
    encryptor: Option<Encryptor>,
    retry: RetryPolicy,
    batching: bool,
}

impl HttpSender {
    pub fn new(
        base_url: String,
        signer: Option<Signer>,
        encryptor: Option<Encryptor>,
        retry: RetryPolicy,
        use_batching: bool,
    ) -> Self {
        let config = ureq::config::Config::builder()
            .http_status_as_error(false)
            .timeout_global(Some(Duration::from_secs(10)))
            .build();
        let agent = Agent::new_with_config(config);

        let mut sender = HttpSender {
            agent,
            base_url,
            signer,
            encryptor,
            retry,
            batching: false,
        };

        if use_batching {
            sender.batching = sender.probe_batch_support();
            if sender.batching {
                info!("server supports batch delivery");
            } else {
                info!("server lacks the batch endpoint, using per-metric delivery");
            }
        }

        sender
    }

    pub fn batching(&self) -> bool {
        self.batching
    }

    /// Deliver one snapshot: a single array document in batch mode, one
    /// document per metric otherwise.
    pub fn send(&self, batch: &[Metric]) -> Result<(), TransportError> {
        if self.batching {
            let body = envelope::encode_batch(batch)?;
            self.post_with_retry("/updates/", body)
        } else {
            for metric in batch {
                let body = envelope::encode_single(metric)?;
                self.post_with_retry("/update/", body)?;
            }
            Ok(())
        }
    }

    /// One gzipped empty array against the batch endpoint. Only a definitive
    /// 404 disables batching; transport errors or other statuses leave it on,
    /// this is a capability check rather than a health check.
    fn probe_batch_support(&self) -> bool {
        let body = match envelope::encode_batch(&[]) {
            Ok(body) => body,
            Err(e) => {
                warn!("building batch probe: {e}");
                return true;
            }
        };

        match self.post_once("/updates/", &body, None) {
            Ok(status) if status == StatusCode::NOT_FOUND => false,
            Ok(_) => true,
            Err(e) => {
                warn!("batch probe inconclusive: {e}");
                true
            }
        }
    }

    fn post_with_retry(&self, path: &str, compressed: Vec<u8>) -> Result<(), TransportError> {
        // Sign the exact bytes sent: after compression and encryption
        let (body, encrypted) = match &self.encryptor {
            Some(encryptor) => (encryptor.encrypt(&compressed)?, true),
            None => (compressed, false),
        };
        let signature = self.signer.as_ref().map(|signer| signer.sign(&body));

        let mut last_status = StatusCode::INTERNAL_SERVER_ERROR;
        for attempt in 0..self.retry.attempts.max(1) {
            if attempt > 0 {
                let delay = self.retry.backoff(attempt - 1);
                debug!("retrying {path} in {delay:?} (attempt {})", attempt + 1);
                std::thread::sleep(delay);
            }

            match self.post_once(path, &body, signature.as_deref()) {
                Ok(status) if status.is_success() => {
                    debug!("sent {} bytes to {path}: {status}", body.len());
                    if encrypted {
                        debug!("payload was encrypted");
                    }
                    return Ok(());
                }
                Ok(status) if status.is_server_error() => {
                    warn!("{path} returned {status}, will retry");
                    last_status = status;
                }
                // 4xx indicates misconfiguration; retrying cannot help
                Ok(status) => return Err(TransportError::Rejected(status)),
                Err(e) => {
                    warn!("{path} transport error, will retry: {e}");
                    last_status = StatusCode::INTERNAL_SERVER_ERROR;
                }
            }
        }

        Err(TransportError::RetriesExhausted {
            attempts: self.retry.attempts.max(1),
            status: last_status,
        })
    }

    fn post_once(
        &self,
        path: &str,
        body: &[u8],
        signature: Option<&str>,
    ) -> Result<StatusCode, TransportError> {
        let url = format!("{}{}", self.base_url, path);

        let mut request = self
            .agent
            .post(&url)
            .content_type("application/json")
            .header("Content-Encoding", "gzip")
            .header("Accept-Encoding", "gzip");

        if self.encryptor.is_some() {
            request = request.header(ENCRYPTED_HEADER, "true");
        }
        if let Some(signature) = signature {
            request = request.header(SIGNATURE_HEADER, signature);
        }

        let response = request.send(body).map_err(Box::new)?;
        Ok(response.status())
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    use super::*;

    /// Read one full HTTP request (headers, then content-length bytes of body).
    fn read_request(stream: &mut std::net::TcpStream) -> Vec<u8> {
        let mut request = Vec::new();
        let mut buf = [0u8; 4096];

        let header_end = loop {
            let n = stream.read(&mut buf).unwrap();
            assert!(n > 0, "connection closed mid-request");
            request.extend_from_slice(&buf[..n]);
            if let Some(pos) = request.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
        };

        let headers = String::from_utf8_lossy(&request[..header_end]).to_lowercase();
        let content_length: usize = headers
            .lines()
            .find_map(|line| line.strip_prefix("content-length:"))
            .map(|v| v.trim().parse().unwrap())
            .unwrap_or(0);

        while request.len() < header_end + content_length {
            let n = stream.read(&mut buf).unwrap();
            assert!(n > 0, "connection closed mid-body");
            request.extend_from_slice(&buf[..n]);
        }

        request
    }

    /// Minimal canned-response HTTP server for exercising the probe and
    /// retry paths without a real backend.
    fn canned_server(responses: Vec<&'static str>) -> (String, thread::JoinHandle<Vec<Vec<u8>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = thread::spawn(move || {
            let mut seen = Vec::new();
            for response in responses {
                let (mut stream, _) = listener.accept().unwrap();
                seen.push(read_request(&mut stream));
                stream.write_all(response.as_bytes()).unwrap();
            }
            seen
        });

        (format!("http://{addr}"), handle)
    }

    fn head(request: &[u8]) -> String {
        String::from_utf8_lossy(request).to_lowercase()
    }

    // connection: close keeps the client from reusing sockets, so every
    // request arrives on its own accepted connection
    const OK: &str = "HTTP/1.1 200 OK\r\nconnection: close\r\ncontent-length: 0\r\n\r\n";
    const NOT_FOUND: &str = "HTTP/1.1 404 Not Found\r\nconnection: close\r\ncontent-length: 0\r\n\r\n";
    const BAD_REQUEST: &str =
        "HTTP/1.1 400 Bad Request\r\nconnection: close\r\ncontent-length: 0\r\n\r\n";
    const SERVER_ERROR: &str =
        "HTTP/1.1 500 Internal Server Error\r\nconnection: close\r\ncontent-length: 0\r\n\r\n";

    fn quick_retry() -> RetryPolicy {
        RetryPolicy {
            attempts: 3,
            wait: Duration::from_millis(1),
            max_wait: Duration::from_millis(5),
        }
    }

    #[test]
    fn probe_404_downgrades_to_single_metric_mode() {
        let (url, handle) = canned_server(vec![NOT_FOUND, OK, OK]);

        let sender = HttpSender::new(url, None, None, quick_retry(), true);
        assert!(!sender.batching());

        let batch = vec![Metric::counter("PollCount", 1), Metric::gauge("g", 2.0)];
        sender.send(&batch).unwrap();

        // probe + one request per metric
        let seen = handle.join().unwrap();
        assert_eq!(seen.len(), 3);
        assert!(head(&seen[1]).starts_with("post /update/ "));
        assert!(head(&seen[2]).starts_with("post /update/ "));
    }

    #[test]
    fn probe_success_keeps_batching() {
        let (url, handle) = canned_server(vec![OK, OK]);

        let sender = HttpSender::new(url, None, None, quick_retry(), true);
        assert!(sender.batching());

        sender.send(&[Metric::counter("PollCount", 1)]).unwrap();

        let seen = handle.join().unwrap();
        assert!(head(&seen[0]).starts_with("post /updates/ "));
        assert!(head(&seen[1]).starts_with("post /updates/ "));
    }

    #[test]
    fn probe_transport_error_leaves_batching_enabled() {
        // No listener on this port: probe cannot connect
        let sender = HttpSender::new(
            "http://127.0.0.1:1".to_string(),
            None,
            None,
            quick_retry(),
            true,
        );
        assert!(sender.batching());
    }

    #[test]
    fn server_errors_are_retried_until_success() {
        let (url, handle) = canned_server(vec![OK, SERVER_ERROR, OK]);

        let sender = HttpSender::new(url, None, None, quick_retry(), true);
        sender.send(&[Metric::gauge("g", 1.0)]).unwrap();

        assert_eq!(handle.join().unwrap().len(), 3);
    }

    #[test]
    fn client_errors_are_not_retried() {
        let (url, handle) = canned_server(vec![OK, BAD_REQUEST]);

        let sender = HttpSender::new(url, None, None, quick_retry(), true);
        let err = sender.send(&[Metric::gauge("g", 1.0)]).unwrap_err();

        assert!(matches!(
            err,
            TransportError::Rejected(status) if status == StatusCode::BAD_REQUEST
        ));
        assert_eq!(handle.join().unwrap().len(), 2);
    }

    #[test]
    fn signed_requests_carry_the_signature_header() {
        let (url, handle) = canned_server(vec![OK, OK]);

        let signer = Signer::new("pre-shared").unwrap();
        let sender = HttpSender::new(url, Some(signer), None, quick_retry(), true);
        sender.send(&[Metric::gauge("g", 1.0)]).unwrap();

        let seen = handle.join().unwrap();
        assert!(head(&seen[1]).contains("hashsha256:"));
    }

    #[test]
    fn batch_body_is_gzipped_json() {
        let (url, handle) = canned_server(vec![OK, OK]);

        let sender = HttpSender::new(url, None, None, quick_retry(), true);
        let batch = vec![Metric::counter("PollCount", 4)];
        sender.send(&batch).unwrap();

        let seen = handle.join().unwrap();
        let raw = &seen[1];
        let header_end = raw.windows(4).position(|w| w == b"\r\n\r\n").unwrap() + 4;
        let body = &raw[header_end..];
        assert_eq!(&body[..2], &[0x1f, 0x8b]);

        let json = envelope::decompress(body).unwrap();
        let decoded: Vec<Metric> = serde_json::from_slice(&json).unwrap();
        assert_eq!(decoded, batch);
    }
}
