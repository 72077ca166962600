//! ROI-tracked objects shared by the CV and RFID streams

use crate::domain::snapshot::{CvSuspect, RfidSuspect};
use crate::domain::types::{
    EntryId, ObjectId, RoiAction, RoiLocation, ROI_ENTRANCE, ROI_GO_BACK,
};
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RoiError {
    #[error("could not recognize roi action: {0}")]
    UnknownAction(String),
}

/// One ROI transition for an object
#[derive(Debug, Clone, PartialEq)]
pub struct Sighting {
    /// Object name for CV, EPC for RFID
    pub identity: String,
    pub product_name: String,
    pub upc: String,
    pub lane_id: String,
    pub roi_name: String,
    pub roi_action: String,
    pub event_time: i64,
}

/// A CV object or RFID tag with its per-ROI presence
#[derive(Debug, Clone)]
pub struct RoiObject {
    pub id: ObjectId,
    pub identity: String,
    pub product_name: String,
    pub upc: String,
    pub lane_id: String,
    pub roi_name: String,
    pub roi_action: String,
    pub event_time: i64,
    pub rois: FxHashMap<String, RoiLocation>,
    pub associated: Option<EntryId>,
}

impl RoiObject {
    fn new(id: ObjectId, sighting: &Sighting) -> Self {
        Self {
            id,
            identity: sighting.identity.clone(),
            product_name: sighting.product_name.clone(),
            upc: sighting.upc.clone(),
            lane_id: sighting.lane_id.clone(),
            roi_name: String::new(),
            roi_action: String::new(),
            event_time: 0,
            rois: FxHashMap::default(),
            associated: None,
        }
    }

    /// Record the latest transition. The last-seen fields always update;
    /// the ROI map only changes for a recognised action.
    pub fn update_location(&mut self, sighting: &Sighting) -> Result<(), RoiError> {
        self.roi_name = sighting.roi_name.clone();
        self.roi_action = sighting.roi_action.clone();
        self.event_time = sighting.event_time;

        let action = RoiAction::parse(&sighting.roi_action)
            .ok_or_else(|| RoiError::UnknownAction(sighting.roi_action.clone()))?;
        let location = self.rois.entry(sighting.roi_name.clone()).or_default();
        location.at_location = action == RoiAction::Entered;
        location.last_at_location = sighting.event_time;
        Ok(())
    }

    pub fn at(&self, roi: &str) -> bool {
        self.rois.get(roi).is_some_and(|l| l.at_location)
    }

    pub fn last_at(&self, roi: &str) -> i64 {
        self.rois.get(roi).map_or(0, |l| l.last_at_location)
    }

    pub fn at_go_back(&self) -> bool {
        self.at(ROI_GO_BACK)
    }

    /// Unassociated and still in the lane
    pub fn is_suspect(&self) -> bool {
        self.associated.is_none() && !self.at(ROI_GO_BACK) && !self.at(ROI_ENTRANCE)
    }

    fn sorted_rois(&self) -> BTreeMap<String, RoiLocation> {
        self.rois.iter().map(|(k, v)| (k.clone(), *v)).collect()
    }

    pub fn to_cv_suspect(&self) -> CvSuspect {
        CvSuspect {
            lane_id: self.lane_id.clone(),
            product_name: self.identity.clone(),
            roi_name: self.roi_name.clone(),
            roi_action: self.roi_action.clone(),
            event_time: self.event_time,
            rois: self.sorted_rois(),
        }
    }

    pub fn to_rfid_suspect(&self) -> RfidSuspect {
        RfidSuspect {
            product_name: self.product_name.clone(),
            lane_id: self.lane_id.clone(),
            epc: self.identity.clone(),
            upc: self.upc.clone(),
            roi_name: self.roi_name.clone(),
            roi_action: self.roi_action.clone(),
            event_time: self.event_time,
            rois: self.sorted_rois(),
        }
    }
}

/// Result of applying a sighting
#[derive(Debug, Clone, PartialEq)]
pub struct Upserted {
    pub id: ObjectId,
    pub created: bool,
    pub location: Result<(), RoiError>,
}

/// Current and next-basket object buffers for one modality
#[derive(Debug, Default)]
pub struct RoiBuffer {
    current: Vec<RoiObject>,
    next: Vec<RoiObject>,
    next_id: u64,
}

impl RoiBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update the current object with this identity, or create one.
    /// New objects seen after payment success belong to the next basket.
    pub fn upsert(&mut self, sighting: &Sighting, after_payment: bool) -> Upserted {
        if let Some(obj) = self.current.iter_mut().find(|o| o.identity == sighting.identity) {
            let location = obj.update_location(sighting);
            return Upserted { id: obj.id, created: false, location };
        }

        self.next_id += 1;
        let id = ObjectId(self.next_id);
        let mut obj = RoiObject::new(id, sighting);
        let location = obj.update_location(sighting);
        if after_payment {
            self.next.push(obj);
        } else {
            self.current.push(obj);
        }
        Upserted { id, created: true, location }
    }

    pub fn get(&self, id: ObjectId) -> Option<&RoiObject> {
        self.current.iter().find(|o| o.id == id)
    }

    pub fn get_mut(&mut self, id: ObjectId) -> Option<&mut RoiObject> {
        self.current.iter_mut().find(|o| o.id == id)
    }

    pub fn current(&self) -> &[RoiObject] {
        &self.current
    }

    pub fn current_mut(&mut self) -> &mut [RoiObject] {
        &mut self.current
    }

    pub fn next_basket(&self) -> &[RoiObject] {
        &self.next
    }

    /// Clear the association of every listed object
    pub fn release(&mut self, ids: &[ObjectId]) {
        for obj in self.current.iter_mut().filter(|o| ids.contains(&o.id)) {
            obj.associated = None;
        }
    }

    /// Move kept current objects into the next basket and promote it.
    /// Carried objects start the new basket unassociated.
    pub fn carry_over(&mut self, keep: impl Fn(&RoiObject) -> bool) -> usize {
        let mut carried = 0;
        for mut obj in std::mem::take(&mut self.current) {
            if keep(&obj) {
                obj.associated = None;
                self.next.push(obj);
                carried += 1;
            }
        }
        self.current = std::mem::take(&mut self.next);
        carried
    }

    /// Objects in both buffers
    pub fn total_count(&self) -> usize {
        self.current.len() + self.next.len()
    }
}
