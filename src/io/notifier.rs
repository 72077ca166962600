//! Suspect-list delivery
//!
//! The session hands every non-empty suspect list to a [`Notifier`] as an
//! opaque JSON payload. Delivery is fire and forget: failures are logged and
//! never reach the session.

use crate::io::egress_channel::EgressSender;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Header carrying a unique id per delivered suspect list
pub const SUSPECT_ID_HEADER: &str = "X-Suspect-Id";

const NOTIFY_TIMEOUT: Duration = Duration::from_secs(5);

pub trait Notifier: Send + Sync {
    fn notify(&self, payload: Vec<u8>);
}

/// POSTs suspect lists to an HTTP endpoint
pub struct HttpNotifier {
    client: reqwest::Client,
    url: String,
}

impl HttpNotifier {
    pub fn new(url: &str) -> anyhow::Result<Self> {
        // Built once for connection pooling
        let client = reqwest::Client::builder().timeout(NOTIFY_TIMEOUT).http1_only().build()?;
        Ok(Self { client, url: url.to_string() })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

pub(crate) fn suspect_id() -> String {
    format!("suspect-items-{}", Uuid::now_v7())
}

impl Notifier for HttpNotifier {
    fn notify(&self, payload: Vec<u8>) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            error!(url = %self.url, "notifier_no_runtime");
            return;
        };

        let id = suspect_id();
        let request = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(SUSPECT_ID_HEADER, id.as_str())
            .body(payload);
        let url = self.url.clone();

        handle.spawn(async move {
            let start = Instant::now();
            match request.send().await {
                Ok(response) if response.status().is_success() => {
                    info!(
                        suspect_id = %id,
                        status = %response.status().as_u16(),
                        latency_ms = %start.elapsed().as_millis(),
                        "suspects_delivered"
                    );
                }
                Ok(response) => {
                    warn!(
                        suspect_id = %id,
                        url = %url,
                        status = %response.status().as_u16(),
                        "suspects_rejected"
                    );
                }
                Err(e) => {
                    error!(suspect_id = %id, url = %url, error = %e, "suspects_delivery_failed");
                }
            }
        });
    }
}

/// Publishes suspect lists on the MQTT egress suspects topic
pub struct EgressNotifier {
    sender: EgressSender,
}

impl EgressNotifier {
    pub fn new(sender: EgressSender) -> Self {
        Self { sender }
    }
}

impl Notifier for EgressNotifier {
    fn notify(&self, payload: Vec<u8>) {
        if !self.sender.send_suspects(payload) {
            warn!("suspects_egress_dropped");
        }
    }
}

/// Fans a payload out to every configured notifier
#[derive(Default)]
pub struct NotifierSet {
    notifiers: Vec<Arc<dyn Notifier>>,
}

impl NotifierSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifiers.push(notifier);
        self
    }

    pub fn len(&self) -> usize {
        self.notifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notifiers.is_empty()
    }
}

impl Notifier for NotifierSet {
    fn notify(&self, payload: Vec<u8>) {
        match self.notifiers.split_last() {
            None => warn!(bytes = %payload.len(), "suspects_no_notifier"),
            Some((last, rest)) => {
                for notifier in rest {
                    notifier.notify(payload.clone());
                }
                last.notify(payload);
            }
        }
    }
}

/// Records payloads in memory for tests
#[derive(Default)]
pub struct MemoryNotifier {
    payloads: Mutex<Vec<Vec<u8>>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn payloads(&self) -> Vec<Vec<u8>> {
        self.payloads.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.payloads.lock().len()
    }

    /// Most recent payload decoded as JSON
    pub fn last_json(&self) -> Option<serde_json::Value> {
        self.payloads.lock().last().and_then(|p| serde_json::from_slice(p).ok())
    }
}

impl Notifier for MemoryNotifier {
    fn notify(&self, payload: Vec<u8>) {
        self.payloads.lock().push(payload);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::egress_channel::{create_egress_channel, EgressMessage};

    #[test]
    fn test_suspect_id_format() {
        let a = suspect_id();
        let b = suspect_id();
        assert!(a.starts_with("suspect-items-"));
        assert_eq!(a.len(), "suspect-items-".len() + 36);
        assert_ne!(a, b);
    }

    #[test]
    fn test_notifier_set_fans_out() {
        let first = Arc::new(MemoryNotifier::new());
        let second = Arc::new(MemoryNotifier::new());
        let set = NotifierSet::new().with(first.clone()).with(second.clone());
        assert_eq!(set.len(), 2);

        set.notify(br#"{"cv_suspect_list":[]}"#.to_vec());

        assert_eq!(first.count(), 1);
        assert_eq!(second.count(), 1);
        assert_eq!(first.last_json().unwrap()["cv_suspect_list"], serde_json::json!([]));
    }

    #[test]
    fn test_empty_set_does_not_panic() {
        NotifierSet::new().notify(b"{}".to_vec());
    }

    #[tokio::test]
    async fn test_egress_notifier_queues_payload() {
        let (tx, mut rx) = create_egress_channel(2, "lane-1".to_string());
        EgressNotifier::new(tx).notify(b"{}".to_vec());

        match rx.recv().await {
            Some(EgressMessage::Suspects(payload)) => assert_eq!(payload, b"{}"),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_http_notifier_without_runtime_is_noop() {
        let notifier = HttpNotifier::new("http://127.0.0.1:9/suspects").unwrap();
        assert_eq!(notifier.url(), "http://127.0.0.1:9/suspects");
        notifier.notify(b"{}".to_vec());
    }
}
