//! Checkout scenario publisher
//!
//! Replays a scripted checkout against a running reconciler by publishing
//! each step as a reading envelope on the ingest topic.
//!
//! Usage:
//!   cargo run --bin checkout-sim -- --scenario config/scenario.json

use anyhow::Context;
use checkout_reconciler::domain::types::{epoch_ms, Envelope};
use clap::Parser;
use rumqttc::{AsyncClient, Event as MqttEvent, MqttOptions, Packet, QoS};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "checkout-sim")]
#[command(about = "Publish a scripted checkout scenario to the reconciler")]
struct Args {
    /// MQTT broker host
    #[arg(long, default_value = "localhost")]
    host: String,

    /// MQTT broker port
    #[arg(long, default_value = "1883")]
    port: u16,

    /// Topic the reconciler subscribes to
    #[arg(long, default_value = "checkout/readings/sim")]
    topic: String,

    /// Scenario file
    #[arg(long, default_value = "config/scenario.json")]
    scenario: String,
}

#[derive(Debug, Deserialize)]
struct Scenario {
    checkout_events: Vec<ScenarioStep>,
}

#[derive(Debug, Deserialize)]
struct ScenarioStep {
    device: String,
    event: String,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    wait_time_ms: u64,
}

impl ScenarioStep {
    /// Envelope for this step, stamped with `now` unless the script set a time
    fn envelope(&self, now: i64) -> Envelope {
        let mut data = match &self.data {
            Value::Object(map) => map.clone(),
            _ => serde_json::Map::new(),
        };
        data.entry("event_time").or_insert_with(|| Value::from(now));
        Envelope::single(&self.device, &self.event, Value::Object(data))
    }
}

fn load_scenario(path: &str) -> anyhow::Result<Scenario> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read scenario {}", path))?;
    serde_json::from_str(&contents).with_context(|| format!("failed to parse scenario {}", path))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    let args = Args::parse();
    let scenario = load_scenario(&args.scenario)?;
    info!(file = %args.scenario, steps = scenario.checkout_events.len(), "scenario_loaded");

    let client_id = format!("checkout-sim-{}", std::process::id());
    let mut options = MqttOptions::new(client_id, &args.host, args.port);
    options.set_keep_alive(Duration::from_secs(30));
    let (client, mut eventloop) = AsyncClient::new(options, 100);

    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(MqttEvent::Incoming(Packet::ConnAck(_))) => info!("mqtt_connected"),
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "mqtt_connection_error");
                    tokio::time::sleep(Duration::from_millis(500)).await;
                }
            }
        }
    });

    for (i, step) in scenario.checkout_events.iter().enumerate() {
        let payload = serde_json::to_vec(&step.envelope(epoch_ms()))?;
        client
            .publish(&args.topic, QoS::AtLeastOnce, false, payload)
            .await
            .with_context(|| format!("failed to publish step {}", i))?;
        info!(step = i, device = %step.device, event = %step.event, "step_published");
        if step.wait_time_ms > 0 {
            tokio::time::sleep(Duration::from_millis(step.wait_time_ms)).await;
        }
    }

    // Let the event loop flush outstanding QoS 1 publishes
    tokio::time::sleep(Duration::from_millis(500)).await;
    client.disconnect().await.ok();
    info!("scenario_complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_step_fills_missing_event_time() {
        let step: ScenarioStep = serde_json::from_value(json!({
            "device": "device-pos-rest",
            "event": "basket-open",
            "data": {"basket_id": "b-1"}
        }))
        .unwrap();
        let envelope = step.envelope(42);
        assert_eq!(envelope.readings[0].value["event_time"], 42);
        assert_eq!(envelope.readings[0].value["basket_id"], "b-1");
        assert_eq!(step.wait_time_ms, 0);
    }

    #[test]
    fn test_step_keeps_scripted_event_time() {
        let step: ScenarioStep = serde_json::from_value(json!({
            "device": "device-scale",
            "event": "weight",
            "data": {"total": 1.5, "event_time": 7},
            "wait_time_ms": 100
        }))
        .unwrap();
        let envelope = step.envelope(42);
        assert_eq!(envelope.device, "device-scale");
        assert_eq!(envelope.readings[0].value["event_time"], 7);
    }

    #[test]
    fn test_bundled_scenario_parses() {
        let scenario = load_scenario(concat!(env!("CARGO_MANIFEST_DIR"), "/config/scenario.json"))
            .unwrap();
        assert!(!scenario.checkout_events.is_empty());
    }
}
