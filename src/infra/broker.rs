//! Embedded MQTT broker using rumqttd
//!
//! Lanes that run the reconciler next to their device services can skip an
//! external broker; the device services then publish straight into this one.

use crate::infra::config::Config as AppConfig;
use anyhow::Context;
use rumqttd::{Broker, Config, ConnectionSettings, RouterConfig, ServerSettings};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

/// Largest reading envelope accepted from a device service
const MAX_PAYLOAD_SIZE: usize = 262144;

/// Build the rumqttd configuration for a single v4 listener
fn broker_config(listen: SocketAddr) -> Config {
    let router = RouterConfig {
        max_segment_size: 104857600,
        max_segment_count: 10,
        max_connections: 1010,
        max_outgoing_packet_count: 200,
        initialized_filters: None,
        ..Default::default()
    };

    let mut servers = HashMap::new();
    servers.insert(
        "lane".to_string(),
        ServerSettings {
            name: "lane".to_string(),
            listen,
            tls: None,
            next_connection_delay_ms: 1,
            connections: ConnectionSettings {
                connection_timeout_ms: 5000,
                max_payload_size: MAX_PAYLOAD_SIZE,
                max_inflight_count: 200,
                auth: None,
                dynamic_filters: false,
                external_auth: None,
            },
        },
    );

    Config {
        id: 0,
        router,
        v4: Some(servers),
        v5: None,
        ws: None,
        prometheus: None,
        metrics: None,
        bridge: None,
        console: None,
        cluster: None,
    }
}

/// Start the embedded broker on its own thread when `[broker] enabled = true`.
///
/// Returns `Ok(false)` when the broker is disabled.
pub fn start_embedded_broker(app_config: &AppConfig) -> anyhow::Result<bool> {
    if !app_config.broker_enabled() {
        return Ok(false);
    }

    let addr = format!("{}:{}", app_config.broker_bind_address(), app_config.broker_port());
    let listen: SocketAddr =
        addr.parse().with_context(|| format!("invalid broker bind address {addr}"))?;
    let config = broker_config(listen);

    thread::Builder::new()
        .name("mqtt-broker".to_string())
        .spawn(move || {
            let mut broker = Broker::new(config);
            // start() blocks for the lifetime of the broker
            if let Err(e) = broker.start() {
                warn!(error = %e, "broker_start_failed");
            }
        })
        .context("failed to spawn broker thread")?;

    // Let the listener bind before the ingest client connects
    thread::sleep(Duration::from_millis(100));
    info!(listen = %listen, "broker_started");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broker_config_single_listener() {
        let listen: SocketAddr = "127.0.0.1:18830".parse().unwrap();
        let config = broker_config(listen);

        let servers = config.v4.expect("v4 listener");
        assert_eq!(servers.len(), 1);
        let server = &servers["lane"];
        assert_eq!(server.listen, listen);
        assert_eq!(server.connections.max_payload_size, MAX_PAYLOAD_SIZE);
        assert!(config.v5.is_none());
    }

    #[test]
    fn test_disabled_broker_is_not_started() {
        let config = AppConfig::default();
        assert!(!start_embedded_broker(&config).unwrap());
    }
}
