//! CV reconciliation: vision detections matched by product name and scan time

use crate::domain::ledger::RttlEntry;
use crate::domain::types::{FLOAT_TOLERANCE, ROI_SCANNER};
use crate::services::roi::RoiBuffer;
use tracing::debug;

#[derive(Debug, Clone, Copy)]
pub struct CvReconciler {
    /// Negative disables the time check
    alignment_ms: i64,
}

impl CvReconciler {
    pub fn new(alignment_ms: i64) -> Self {
        Self { alignment_ms }
    }

    pub fn alignment_ms(&self) -> i64 {
        self.alignment_ms
    }

    fn aligned(&self, scan_time: i64, last_at_scanner: i64) -> bool {
        self.alignment_ms < 0 || (scan_time - last_at_scanner).abs() < self.alignment_ms
    }

    /// Associate matching CV objects with `entry`, at most its quantity.
    /// An object already claimed by another entry for the same product may
    /// confirm this one too; the first claimant stays its owner.
    /// Returns how many were newly associated.
    pub fn reconcile(&self, entry: &mut RttlEntry, objects: &mut RoiBuffer) -> usize {
        let mut added = 0;
        for obj in objects.current_mut() {
            if (entry.cv_items.len() as f64) >= entry.quantity - FLOAT_TOLERANCE {
                break;
            }
            if obj.identity != entry.product_name || entry.cv_items.contains(&obj.id) {
                continue;
            }
            if !self.aligned(entry.event_time, obj.last_at(ROI_SCANNER)) {
                continue;
            }
            obj.associated.get_or_insert(entry.id);
            entry.cv_items.push(obj.id);
            added += 1;
            debug!(entry_id = %entry.id, object = %obj.id, name = %obj.identity, "cv_associated");
        }
        entry.cv_confirmed = is_confirmed(entry.cv_items.len(), entry.quantity);
        added
    }

    /// Release associations beyond the entry's quantity, newest first
    pub fn trim(&self, entry: &mut RttlEntry, objects: &mut RoiBuffer) {
        while (entry.cv_items.len() as f64) > entry.quantity + FLOAT_TOLERANCE {
            let Some(id) = entry.cv_items.pop() else {
                break;
            };
            objects.release(&[id]);
        }
        entry.cv_confirmed = is_confirmed(entry.cv_items.len(), entry.quantity);
    }
}

/// Re-claim objects still listed by a surviving entry after a release
pub fn relink<'a>(entries: impl IntoIterator<Item = &'a RttlEntry>, objects: &mut RoiBuffer) {
    for entry in entries {
        for id in &entry.cv_items {
            if let Some(obj) = objects.get_mut(*id) {
                obj.associated.get_or_insert(entry.id);
            }
        }
    }
}

#[inline]
pub(crate) fn is_confirmed(associated: usize, quantity: f64) -> bool {
    (associated as f64 - quantity).abs() <= FLOAT_TOLERANCE
}
