//! In-memory stand-in for an upload service

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use transfer_task::{Error, Result, TransportOperation};

/// How a request sent to the mock service ended
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RequestOutcome {
    /// Response delivered
    Succeeded,
    /// Aborted through its cancellation token before the response arrived
    Cancelled,
    /// Still waiting for a response
    Pending,
}

/// One request as seen by the mock service
#[derive(Clone, Debug)]
pub struct RequestRecord {
    /// Endpoint the request was sent to
    pub endpoint: String,
    /// Current outcome
    pub outcome: RequestOutcome,
    /// Token the request was sent with
    pub token: CancellationToken,
}

impl RequestRecord {
    /// True if the request was told to stop, whether or not it observed it
    pub fn was_cancelled(&self) -> bool {
        self.outcome == RequestOutcome::Cancelled || self.token.is_cancelled()
    }
}

/// Upload service that answers every request after a fixed latency
#[derive(Clone)]
pub struct MockUploadService {
    latency: Duration,
    requests: Arc<Mutex<Vec<RequestRecord>>>,
}

impl MockUploadService {
    /// Service answering after `latency`
    pub fn new(latency: Duration) -> Self {
        Self {
            latency,
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Send a request; resolves with the endpoint echoed back, or a cancellation
    pub async fn send(&self, endpoint: &str, token: CancellationToken) -> Result<String> {
        let position = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(RequestRecord {
                endpoint: endpoint.to_string(),
                outcome: RequestOutcome::Pending,
                token: token.clone(),
            });
            requests.len() - 1
        };

        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => Err(Error::cancelled_at(endpoint)),
            _ = tokio::time::sleep(self.latency) => Ok(format!("ok:{endpoint}")),
        };

        self.requests.lock().unwrap()[position].outcome = match outcome {
            Ok(_) => RequestOutcome::Succeeded,
            Err(_) => RequestOutcome::Cancelled,
        };
        outcome
    }

    /// Snapshot of every request received so far
    pub fn requests(&self) -> Vec<RequestRecord> {
        self.requests.lock().unwrap().clone()
    }

    /// Requests sent to endpoints starting with `prefix`
    pub fn requests_to(&self, prefix: &str) -> Vec<RequestRecord> {
        self.requests()
            .into_iter()
            .filter(|r| r.endpoint.starts_with(prefix))
            .collect()
    }
}

/// Transport operation that only counts cancel requests
#[derive(Clone, Default)]
pub struct CountingOperation {
    cancels: Arc<AtomicUsize>,
}

impl CountingOperation {
    /// Number of cancel requests received
    pub fn cancel_count(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }
}

impl TransportOperation for CountingOperation {
    fn cancel(&self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
    }
}
