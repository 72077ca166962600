//! Suspect aggregation at payment start and basket carryover

use crate::domain::snapshot::SuspectSnapshot;
use crate::services::roi::{RoiBuffer, RoiObject};
use crate::services::scale::ScaleReconciler;

/// Copy every unresolved scale event, CV object and RFID tag
pub fn collect(scale: &ScaleReconciler, cv: &RoiBuffer, rfid: &RoiBuffer) -> SuspectSnapshot {
    SuspectSnapshot {
        cv_suspect_list: cv
            .current()
            .iter()
            .filter(|o| o.is_suspect())
            .map(|o| o.to_cv_suspect())
            .collect(),
        rfid_suspect_list: rfid
            .current()
            .iter()
            .filter(|o| o.is_suspect())
            .map(|o| o.to_rfid_suspect())
            .collect(),
        scale_suspect_list: scale.suspect_snapshot(),
    }
}

/// Carry go-back objects and unresolved in-lane objects into the next
/// basket; everything else is dropped. Returns (cv, rfid) carried.
pub fn carry_over_basket(cv: &mut RoiBuffer, rfid: &mut RoiBuffer) -> (usize, usize) {
    let keep = |o: &RoiObject| o.at_go_back() || o.is_suspect();
    (cv.carry_over(keep), rfid.carry_over(keep))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{EntryId, ObjectId, ScalePayload};
    use crate::services::roi::Sighting;

    fn sight(buffer: &mut RoiBuffer, identity: &str, roi: &str) -> ObjectId {
        buffer
            .upsert(
                &Sighting {
                    identity: identity.to_string(),
                    product_name: identity.to_string(),
                    upc: "00000000735797".to_string(),
                    lane_id: "1".to_string(),
                    roi_name: roi.to_string(),
                    roi_action: "ENTERED".to_string(),
                    event_time: 3,
                },
                false,
            )
            .id
    }

    #[test]
    fn test_collect_filters_resolved_and_departed() {
        let mut cv = RoiBuffer::new();
        let mut rfid = RoiBuffer::new();
        let mut scale = ScaleReconciler::new(0.02);
        scale.record(&ScalePayload { total: 2.0, event_time: 9, ..Default::default() }, None);

        sight(&mut cv, "apple", "Bagging");
        sight(&mut cv, "pear", "Go Back");
        let matched = sight(&mut cv, "plum", "Bagging");
        cv.get_mut(matched).unwrap().associated = Some(EntryId(1));
        sight(&mut rfid, "epc-1", "Entrance");
        sight(&mut rfid, "epc-2", "Cart");

        let snapshot = collect(&scale, &cv, &rfid);
        assert_eq!(snapshot.cv_suspect_list.len(), 1);
        assert_eq!(snapshot.cv_suspect_list[0].product_name, "apple");
        assert_eq!(snapshot.rfid_suspect_list.len(), 1);
        assert_eq!(snapshot.rfid_suspect_list[0].epc, "epc-2");
        assert_eq!(snapshot.scale_suspect_list.len(), 1);
        assert!(snapshot.scale_suspect_list.contains_key(&9));
    }

    #[test]
    fn test_collect_empty() {
        let snapshot = collect(&ScaleReconciler::new(0.02), &RoiBuffer::new(), &RoiBuffer::new());
        assert!(snapshot.is_empty());
    }

    #[test]
    fn test_carry_over_keeps_go_back_and_unresolved() {
        let mut cv = RoiBuffer::new();
        let mut rfid = RoiBuffer::new();
        sight(&mut cv, "unresolved", "Bagging");
        sight(&mut cv, "returned", "Go Back");
        sight(&mut cv, "leaving", "Entrance");
        let paid = sight(&mut cv, "paid", "Bagging");
        cv.get_mut(paid).unwrap().associated = Some(EntryId(4));
        sight(&mut rfid, "epc-1", "Entrance");

        assert_eq!(carry_over_basket(&mut cv, &mut rfid), (2, 0));
        let names: Vec<&str> = cv.current().iter().map(|o| o.identity.as_str()).collect();
        assert_eq!(names, vec!["unresolved", "returned"]);
        assert!(rfid.current().is_empty());
    }
}
