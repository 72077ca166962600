//! MQTT publisher for egress messages
//!
//! - suspects topic: suspect lists at payment start (QoS 1)
//! - state topic: current lane state after each reading (QoS 0)
//! - metrics topic: periodic metrics snapshots (QoS 0)

use crate::infra::config::Config;
use crate::io::egress_channel::EgressMessage;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// MQTT publisher actor
pub struct MqttPublisher {
    client: AsyncClient,
    rx: mpsc::Receiver<EgressMessage>,
    suspects_topic: String,
    state_topic: String,
    metrics_topic: String,
}

impl MqttPublisher {
    /// Connect to the configured broker and spawn the event loop
    pub fn new(config: &Config, rx: mpsc::Receiver<EgressMessage>) -> Self {
        let client_id = format!("reconciler-egress-{}-{}", config.site_id(), std::process::id());
        let mut options = MqttOptions::new(client_id, config.mqtt_host(), config.mqtt_port());
        options.set_keep_alive(Duration::from_secs(30));
        options.set_clean_session(true);
        options.set_max_packet_size(1024 * 1024, 1024 * 1024);

        if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
            options.set_credentials(username, password);
        }

        let (client, mut eventloop) = AsyncClient::new(options, 100);

        tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => info!("mqtt_egress_connected"),
                    Ok(Event::Incoming(Packet::PubAck(ack))) => {
                        debug!(pkid = %ack.pkid, "mqtt_egress_puback")
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "mqtt_egress_error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        Self {
            client,
            rx,
            suspects_topic: config.mqtt_egress_suspects_topic().to_string(),
            state_topic: config.mqtt_egress_state_topic().to_string(),
            metrics_topic: config.mqtt_egress_metrics_topic().to_string(),
        }
    }

    /// Publish until shutdown, then drain whatever is still queued
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            suspects = %self.suspects_topic,
            state = %self.state_topic,
            metrics = %self.metrics_topic,
            "mqtt_egress_started"
        );

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("mqtt_egress_shutdown");
                        while let Ok(msg) = self.rx.try_recv() {
                            self.publish_message(msg).await;
                        }
                        return;
                    }
                }
                msg = self.rx.recv() => match msg {
                    Some(msg) => self.publish_message(msg).await,
                    None => {
                        info!("mqtt_egress_channel_closed");
                        return;
                    }
                },
            }
        }
    }

    async fn publish_message(&self, msg: EgressMessage) {
        match msg {
            EgressMessage::Suspects(payload) => {
                let bytes = payload.len();
                match self
                    .client
                    .publish(&self.suspects_topic, QoS::AtLeastOnce, false, payload)
                    .await
                {
                    Ok(()) => debug!(bytes = %bytes, "mqtt_egress_suspects_published"),
                    Err(e) => error!(error = %e, "mqtt_egress_suspects_failed"),
                }
            }
            EgressMessage::State(payload) => {
                self.publish_json(&self.state_topic, &payload, "state").await;
            }
            EgressMessage::Metrics(payload) => {
                self.publish_json(&self.metrics_topic, &payload, "metrics").await;
            }
        }
    }

    async fn publish_json<T: serde::Serialize>(&self, topic: &str, payload: &T, kind: &str) {
        let json = match serde_json::to_vec(payload) {
            Ok(json) => json,
            Err(e) => {
                error!(error = %e, kind = %kind, "mqtt_egress_serialize_failed");
                return;
            }
        };
        if let Err(e) = self.client.publish(topic, QoS::AtMostOnce, false, json).await {
            debug!(error = %e, kind = %kind, "mqtt_egress_publish_failed");
        }
    }
}
