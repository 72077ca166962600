//! MQTT client for receiving device readings
//!
//! Device services publish one envelope per message. Two shapes are
//! accepted on the wire:
//!
//! - batched: `{"device": "...", "readings": [{"name": "...", "value": ...}]}`
//! - single: `{"device": "...", "name": "...", "value": ...}`

use crate::domain::types::{Envelope, RawReading};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("invalid envelope json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("envelope has no device")]
    MissingDevice,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WireEnvelope {
    Batch(Envelope),
    Single(RawReading),
}

/// Parse one MQTT payload into readings in publish order
pub fn parse_envelope(json_str: &str) -> Result<Vec<RawReading>, EnvelopeError> {
    let readings = match serde_json::from_str::<WireEnvelope>(json_str)? {
        WireEnvelope::Batch(envelope) => envelope.into_readings(),
        WireEnvelope::Single(reading) => vec![reading],
    };
    if readings.iter().any(|r| r.device.is_empty()) {
        return Err(EnvelopeError::MissingDevice);
    }
    Ok(readings)
}

/// Subscribe to the readings topic and forward parsed readings to the session.
///
/// Readings are handed over with `try_send` so a slow session never stalls
/// the MQTT event loop; drops are counted and warned at most once a second.
pub async fn start_mqtt_client(
    config: &Config,
    reading_tx: mpsc::Sender<RawReading>,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let client_id = format!("reconciler-{}", config.site_id());
    let mut options = MqttOptions::new(client_id, config.mqtt_host(), config.mqtt_port());
    options.set_keep_alive(Duration::from_secs(30));

    if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
        options.set_credentials(username, password);
    }

    let (client, mut eventloop) = AsyncClient::new(options, 100);
    // QoS 1 for every lifecycle, scan and sensor reading
    client.subscribe(config.mqtt_topic(), QoS::AtLeastOnce).await?;

    info!(topic = %config.mqtt_topic(), host = %config.mqtt_host(), port = %config.mqtt_port(), "mqtt_subscribed");

    let mut last_drop_warn = Instant::now() - Duration::from_secs(2);

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("mqtt_shutdown");
                    return Ok(());
                }
            }
            result = eventloop.poll() => {
                match result {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let json_str = match std::str::from_utf8(&publish.payload) {
                            Ok(s) => s,
                            Err(e) => {
                                metrics.record_malformed();
                                warn!(topic = %publish.topic, error = %e, "mqtt_invalid_utf8");
                                continue;
                            }
                        };

                        let readings = match parse_envelope(json_str) {
                            Ok(readings) => readings,
                            Err(e) => {
                                metrics.record_malformed();
                                warn!(topic = %publish.topic, error = %e, "mqtt_invalid_envelope");
                                continue;
                            }
                        };

                        debug!(topic = %publish.topic, readings = %readings.len(), "mqtt_envelope");
                        for reading in readings {
                            metrics.record_reading_received();
                            match reading_tx.try_send(reading) {
                                Ok(()) => {}
                                Err(TrySendError::Full(_)) => {
                                    metrics.record_reading_dropped();
                                    if last_drop_warn.elapsed() > Duration::from_secs(1) {
                                        warn!("mqtt_reading_dropped: channel full");
                                        last_drop_warn = Instant::now();
                                    }
                                }
                                Err(TrySendError::Closed(_)) => {
                                    warn!("mqtt_reading_channel_closed");
                                    return Ok(());
                                }
                            }
                        }
                    }
                    Ok(Event::Incoming(Packet::ConnAck(_))) => info!("mqtt_connected"),
                    Ok(_) => {}
                    Err(e) => {
                        error!(error = %e, "mqtt_error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::ScalePayload;

    #[test]
    fn test_parse_batched_envelope() {
        let json = r#"{
            "device": "device-pos-rest",
            "readings": [
                {"name": "basket-open", "value": {"basket_id": "b1", "event_time": 1}},
                {"name": "scanned-item", "value": "{\"product_id\": \"735797\", \"quantity\": 1}"}
            ]
        }"#;

        let readings = parse_envelope(json).unwrap();
        assert_eq!(readings.len(), 2);
        assert_eq!(readings[0].device, "device-pos-rest");
        assert_eq!(readings[0].name, "basket-open");
        assert_eq!(readings[1].name, "scanned-item");
        assert!(readings[1].value.is_string());
    }

    #[test]
    fn test_parse_single_reading() {
        let json = r#"{"device": "device-scale", "name": "weight", "value": {"total": 2.5}}"#;

        let readings = parse_envelope(json).unwrap();
        assert_eq!(readings.len(), 1);
        let scale: ScalePayload = readings[0].decode().unwrap();
        assert_eq!(scale.total, 2.5);
    }

    #[test]
    fn test_parse_empty_batch() {
        let json = r#"{"device": "device-cv-roi-mqtt", "readings": []}"#;
        assert!(parse_envelope(json).unwrap().is_empty());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(parse_envelope("not json"), Err(EnvelopeError::Json(_))));
        assert!(matches!(parse_envelope(r#"{"name": "weight"}"#), Err(EnvelopeError::Json(_))));
        assert!(matches!(
            parse_envelope(r#"{"device": "", "name": "weight", "value": {}}"#),
            Err(EnvelopeError::MissingDevice)
        ));
    }
}
