//! Typed channel for MQTT egress messages
//!
//! Producers never block: when the publisher falls behind, messages are
//! dropped at the sender.

use crate::domain::snapshot::StateSnapshot;
use crate::domain::types::epoch_ms;
use crate::infra::metrics::{Metrics, MetricsSummary};
use serde::Serialize;
use tokio::sync::mpsc;

/// Messages that can be sent to the MQTT publisher
#[derive(Debug)]
pub enum EgressMessage {
    /// Serialized suspect list, emitted at payment start
    Suspects(Vec<u8>),
    /// Current lane state after an accepted reading
    State(StatePayload),
    /// Periodic metrics snapshot
    Metrics(MetricsPayload),
}

#[derive(Debug, Serialize)]
pub struct StatePayload {
    pub site: String,
    pub ts: i64,
    #[serde(flatten)]
    pub state: StateSnapshot,
}

#[derive(Debug, Serialize)]
pub struct MetricsPayload {
    pub site: String,
    pub ts: i64,
    #[serde(flatten)]
    pub summary: MetricsSummary,
}

/// Sender handle for egress messages. Clone to share across producers.
#[derive(Clone)]
pub struct EgressSender {
    tx: mpsc::Sender<EgressMessage>,
    site_id: String,
}

impl EgressSender {
    pub fn new(tx: mpsc::Sender<EgressMessage>, site_id: String) -> Self {
        Self { tx, site_id }
    }

    /// Queue a serialized suspect list. Returns false if it was dropped.
    pub fn send_suspects(&self, payload: Vec<u8>) -> bool {
        self.tx.try_send(EgressMessage::Suspects(payload)).is_ok()
    }

    pub fn send_state(&self, state: StateSnapshot) {
        let payload = StatePayload { site: self.site_id.clone(), ts: epoch_ms(), state };
        let _ = self.tx.try_send(EgressMessage::State(payload));
    }

    pub fn send_metrics(&self, summary: MetricsSummary) {
        let payload = MetricsPayload { site: self.site_id.clone(), ts: epoch_ms(), summary };
        let _ = self.tx.try_send(EgressMessage::Metrics(payload));
    }
}

/// Drain the periodic counters once, then log the summary and queue the
/// same summary on the metrics topic when egress is enabled.
pub fn report_metrics(metrics: &Metrics, egress: Option<&EgressSender>) -> MetricsSummary {
    let summary = metrics.report();
    summary.log();
    if let Some(egress) = egress {
        egress.send_metrics(summary.clone());
    }
    summary
}

/// Create a new egress channel pair
///
/// `site_id` is stamped on state and metrics payloads for downstream consumers.
pub fn create_egress_channel(
    buffer_size: usize,
    site_id: String,
) -> (EgressSender, mpsc::Receiver<EgressMessage>) {
    let (tx, rx) = mpsc::channel(buffer_size);
    (EgressSender::new(tx, site_id), rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::snapshot::StateStats;

    fn empty_state(event: &str) -> StateSnapshot {
        StateSnapshot {
            event: event.to_string(),
            positems: Vec::new(),
            scaleitem: None,
            scalesuspectitems: Vec::new(),
            cvsuspectitems: Vec::new(),
            rfidsuspectitems: Vec::new(),
            stats: StateStats::default(),
        }
    }

    #[tokio::test]
    async fn test_state_payload_is_flattened() {
        let (tx, mut rx) = create_egress_channel(4, "lane-7".to_string());
        tx.send_state(empty_state("basket-open"));

        match rx.recv().await {
            Some(EgressMessage::State(payload)) => {
                let json = serde_json::to_value(&payload).unwrap();
                assert_eq!(json["site"], "lane-7");
                assert_eq!(json["event"], "basket-open");
                assert!(json["scaleitem"].is_null());
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_metrics_tick_shares_one_report() {
        let metrics = Metrics::new();
        metrics.record_reading_processed(700);
        metrics.record_reading_processed(300);
        let (tx, mut rx) = create_egress_channel(4, "lane-7".to_string());

        let logged = report_metrics(&metrics, Some(&tx));
        assert_eq!(logged.max_process_latency_us, 700);
        assert_eq!(logged.avg_process_latency_us, 500);

        match rx.recv().await {
            Some(EgressMessage::Metrics(payload)) => {
                assert_eq!(payload.summary.max_process_latency_us, 700);
                assert_eq!(payload.summary.avg_process_latency_us, 500);
                assert_eq!(payload.summary.readings_processed, 2);
            }
            other => panic!("unexpected message: {other:?}"),
        }
        assert!(rx.try_recv().is_err());

        // The periodic window was drained once
        assert_eq!(metrics.report().max_process_latency_us, 0);
    }

    #[tokio::test]
    async fn test_full_channel_drops() {
        let (tx, _rx) = create_egress_channel(1, "lane-7".to_string());
        assert!(tx.send_suspects(b"{}".to_vec()));
        assert!(!tx.send_suspects(b"{}".to_vec()));
    }
}
