//! Value-type snapshots handed to notifiers and status routes.
//!
//! Snapshots copy fields out of the live session. They never carry
//! association ids, so serializing one cannot recurse into the ledger.

use crate::domain::types::RoiLocation;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScaleSuspect {
    pub delta: f64,
    pub total: f64,
    pub units: String,
    pub lane_id: String,
    pub scale_id: String,
    pub event_time: i64,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CvSuspect {
    pub lane_id: String,
    pub product_name: String,
    pub roi_name: String,
    pub roi_action: String,
    pub event_time: i64,
    pub rois: BTreeMap<String, RoiLocation>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RfidSuspect {
    pub product_name: String,
    pub lane_id: String,
    pub epc: String,
    pub upc: String,
    pub roi_name: String,
    pub roi_action: String,
    pub event_time: i64,
    pub rois: BTreeMap<String, RoiLocation>,
}

/// Unresolved evidence at payment-start
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SuspectSnapshot {
    pub cv_suspect_list: Vec<CvSuspect>,
    pub rfid_suspect_list: Vec<RfidSuspect>,
    /// Keyed by event time
    pub scale_suspect_list: BTreeMap<i64, ScaleSuspect>,
}

impl SuspectSnapshot {
    pub fn is_empty(&self) -> bool {
        self.cv_suspect_list.is_empty()
            && self.rfid_suspect_list.is_empty()
            && self.scale_suspect_list.is_empty()
    }

    pub fn to_json_pretty(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec_pretty(self)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PosItemView {
    pub product_id: String,
    pub product_name: String,
    pub quantity: f64,
    pub quantity_unit: String,
    pub unit_price: f64,
    pub customer_id: String,
    pub employee_id: String,
    pub event_time: i64,
    pub rfid_eligible: bool,
    pub rfid_reconciled: bool,
    pub cv_reconciled: bool,
    pub scale_reconciled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScaleItemView {
    pub scale_id: String,
    pub total: f64,
    pub delta: f64,
    pub event_time: i64,
    pub units: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CvItemView {
    pub product_name: String,
    pub event_time: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RfidItemView {
    pub product_name: String,
    pub roi_name: String,
    pub event_time: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct StateStats {
    pub cv_count: usize,
    pub rfid_count: usize,
    pub scale_count: usize,
}

/// Current lane state published after every accepted reading
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateSnapshot {
    pub event: String,
    pub positems: Vec<PosItemView>,
    pub scaleitem: Option<ScaleItemView>,
    pub scalesuspectitems: Vec<ScaleItemView>,
    pub cvsuspectitems: Vec<CvItemView>,
    pub rfidsuspectitems: Vec<RfidItemView>,
    pub stats: StateStats,
}

/// Latest state, shared between the session and the HTTP routes
pub type SharedState = Arc<RwLock<Option<StateSnapshot>>>;

pub fn new_shared_state() -> SharedState {
    Arc::new(RwLock::new(None))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suspect_snapshot_keys() {
        let mut snapshot = SuspectSnapshot::default();
        assert!(snapshot.is_empty());
        snapshot.scale_suspect_list.insert(
            42,
            ScaleSuspect {
                delta: 1.5,
                total: 3.0,
                units: "lbs".to_string(),
                lane_id: "1".to_string(),
                scale_id: "s1".to_string(),
                event_time: 42,
                status: "OK".to_string(),
            },
        );
        assert!(!snapshot.is_empty());

        let value: serde_json::Value =
            serde_json::from_slice(&snapshot.to_json_pretty().unwrap()).unwrap();
        assert!(value["cv_suspect_list"].as_array().unwrap().is_empty());
        assert!(value["rfid_suspect_list"].as_array().unwrap().is_empty());
        assert_eq!(value["scale_suspect_list"]["42"]["delta"], 1.5);
    }
}
