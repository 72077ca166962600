//! IO modules - external system interfaces
//!
//! - `mqtt` - MQTT subscriber for device readings
//! - `egress_channel` - Typed channel feeding the MQTT publisher
//! - `mqtt_egress` - MQTT publisher for suspects, state and metrics
//! - `notifier` - Suspect-list delivery (HTTP, MQTT, in-memory)
//! - `http` - Current-state, metrics and health routes

pub mod egress_channel;
pub mod http;
pub mod mqtt;
pub mod mqtt_egress;
pub mod notifier;

pub use egress_channel::{create_egress_channel, report_metrics, EgressMessage, EgressSender};
pub use http::{start_http_server, HttpContext};
pub use mqtt::{parse_envelope, start_mqtt_client};
pub use mqtt_egress::MqttPublisher;
pub use notifier::{EgressNotifier, HttpNotifier, MemoryNotifier, Notifier, NotifierSet};
