//! Shared types for the checkout reconciler

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Epsilon for every quantity and weight comparison
pub const FLOAT_TOLERANCE: f64 = 1e-6;

/// Scale deltas at or below this magnitude are noise
pub const SCALE_PRECISION: f64 = 0.01;

/// POS product ids are left-padded with zeros to GTIN-14 width
pub const PRODUCT_ID_WIDTH: usize = 14;

pub const QUANTITY_UNIT_EA: &str = "EA";
pub const QUANTITY_UNIT_EACH: &str = "Each";

pub const ROI_ENTRANCE: &str = "Entrance";
pub const ROI_GO_BACK: &str = "Go Back";
pub const ROI_SCANNER: &str = "Scanner";

/// Get current epoch milliseconds
#[inline]
pub fn epoch_ms() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

/// Left-pad a product id with zeros to GTIN-14 width
pub fn pad_product_id(product_id: &str) -> String {
    format!("{:0>width$}", product_id, width = PRODUCT_ID_WIDTH)
}

/// "Each" units count discrete items and carry an expected weight range
#[inline]
pub fn is_each_unit(unit: &str) -> bool {
    unit == QUANTITY_UNIT_EA || unit == QUANTITY_UNIT_EACH
}

/// Identifier of an RTTL ledger entry, unique for the lifetime of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[repr(transparent)]
pub struct EntryId(pub u64);

impl std::fmt::Display for EntryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Index of a scale event in the basket's chronological buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct ScaleEventId(pub usize);

/// Identifier of a CV or RFID tracked object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct ObjectId(pub u64);

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reading name as published by the POS, scale, CV and RFID devices
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    BasketOpen,
    BasketClose,
    ScannedItem,
    RemoveItem,
    PaymentStart,
    PaymentSuccess,
    Weight,
    CvRoi,
    RfidRoi,
    Unknown(String),
}

impl std::str::FromStr for EventKind {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "basket-open" => EventKind::BasketOpen,
            "basket-close" => EventKind::BasketClose,
            "scanned-item" => EventKind::ScannedItem,
            "remove-item" => EventKind::RemoveItem,
            "payment-start" => EventKind::PaymentStart,
            "payment-success" => EventKind::PaymentSuccess,
            "weight" => EventKind::Weight,
            "cv-roi-event" => EventKind::CvRoi,
            "rfid-roi-event" => EventKind::RfidRoi,
            other => EventKind::Unknown(other.to_string()),
        })
    }
}

impl EventKind {
    pub fn as_str(&self) -> &str {
        match self {
            EventKind::BasketOpen => "basket-open",
            EventKind::BasketClose => "basket-close",
            EventKind::ScannedItem => "scanned-item",
            EventKind::RemoveItem => "remove-item",
            EventKind::PaymentStart => "payment-start",
            EventKind::PaymentSuccess => "payment-success",
            EventKind::Weight => "weight",
            EventKind::CvRoi => "cv-roi-event",
            EventKind::RfidRoi => "rfid-roi-event",
            EventKind::Unknown(s) => s,
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sensor stream a reading came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Pos,
    Scale,
    Cv,
    Rfid,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Pos => "pos",
            Source::Scale => "scale",
            Source::Cv => "cv",
            Source::Rfid => "rfid",
        }
    }
}

/// Configured device base names.
///
/// Devices publish through a REST or MQTT device service, which appends
/// `-rest` or `-mqtt` to the base name. The scale driver may also publish
/// under its bare name.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceNames {
    pub pos: String,
    pub scale: String,
    pub cv: String,
    pub rfid: String,
}

impl DeviceNames {
    pub fn classify(&self, device: &str) -> Option<Source> {
        if device == self.scale || has_transport_suffix(device, &self.scale) {
            return Some(Source::Scale);
        }
        if has_transport_suffix(device, &self.pos) {
            return Some(Source::Pos);
        }
        if has_transport_suffix(device, &self.cv) {
            return Some(Source::Cv);
        }
        if has_transport_suffix(device, &self.rfid) {
            return Some(Source::Rfid);
        }
        None
    }
}

fn has_transport_suffix(device: &str, base: &str) -> bool {
    match device.strip_prefix(base) {
        Some(rest) => rest == "-rest" || rest == "-mqtt",
        None => false,
    }
}

/// ROI transition reported by the CV or RFID detector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoiAction {
    Entered,
    Exited,
}

impl RoiAction {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ENTERED" => Some(RoiAction::Entered),
            "EXITED" => Some(RoiAction::Exited),
            _ => None,
        }
    }
}

/// Per-ROI presence of a tracked object
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RoiLocation {
    pub at_location: bool,
    pub last_at_location: i64,
}

/// One reading as it arrives from the transport. `value` holds the
/// payload either as a JSON object or as a string containing JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawReading {
    pub device: String,
    pub name: String,
    pub value: serde_json::Value,
}

impl RawReading {
    pub fn new(device: &str, name: &str, value: serde_json::Value) -> Self {
        Self { device: device.to_string(), name: name.to_string(), value }
    }

    /// Decode the payload into a typed reading
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        match &self.value {
            serde_json::Value::String(s) => serde_json::from_str(s),
            other => T::deserialize(other),
        }
    }
}

/// One named reading inside an envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeReading {
    pub name: String,
    pub value: serde_json::Value,
}

/// Transport envelope published by a device service: one device, any
/// number of readings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub device: String,
    pub readings: Vec<EnvelopeReading>,
}

impl Envelope {
    pub fn single(device: &str, name: &str, value: serde_json::Value) -> Self {
        Self {
            device: device.to_string(),
            readings: vec![EnvelopeReading { name: name.to_string(), value }],
        }
    }

    pub fn into_readings(self) -> Vec<RawReading> {
        let device = self.device;
        self.readings
            .into_iter()
            .map(|r| RawReading { device: device.clone(), name: r.name, value: r.value })
            .collect()
    }
}

/// POS payload shared by lifecycle and item events
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct PosPayload {
    pub product_id: String,
    pub product_id_type: String,
    pub product_name: String,
    pub lane_id: String,
    pub basket_id: String,
    pub customer_id: String,
    pub employee_id: String,
    pub quantity: f64,
    pub quantity_unit: String,
    pub unit_price: f64,
    pub event_time: i64,
}

/// Scale reading; the delta is computed by the reconciler
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ScalePayload {
    #[serde(default)]
    pub lane_id: String,
    #[serde(default)]
    pub scale_id: String,
    pub total: f64,
    #[serde(default)]
    pub units: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub event_time: i64,
}

/// CV detector ROI transition for a recognised product
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CvRoiPayload {
    #[serde(default)]
    pub lane_id: String,
    pub product_name: String,
    pub roi_name: String,
    pub roi_action: String,
    #[serde(default)]
    pub event_time: i64,
}

/// RFID ROI transition for a tag
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RfidRoiPayload {
    #[serde(default)]
    pub lane_id: String,
    pub epc: String,
    pub roi_name: String,
    pub roi_action: String,
    #[serde(default)]
    pub event_time: i64,
}
