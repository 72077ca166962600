//! RFID reconciliation: tags matched by decoded product code

use crate::domain::ledger::{RttlEntry, RttlLedger};
use crate::domain::types::FLOAT_TOLERANCE;
use crate::services::cv::is_confirmed;
use crate::services::roi::RoiBuffer;
use tracing::debug;

/// Associate unclaimed tags whose UPC equals the entry's product id, up to
/// the entry's quantity. Returns how many were newly associated.
pub fn reconcile(entry: &mut RttlEntry, tags: &mut RoiBuffer) -> usize {
    let mut added = 0;
    for tag in tags.current_mut() {
        if (entry.rfid_items.len() as f64) >= entry.quantity - FLOAT_TOLERANCE {
            break;
        }
        if tag.associated.is_some() || tag.upc != entry.product_id {
            continue;
        }
        tag.associated = Some(entry.id);
        entry.rfid_items.push(tag.id);
        added += 1;
        debug!(entry_id = %entry.id, epc = %tag.identity, "rfid_associated");
    }
    entry.rfid_confirmed = is_confirmed(entry.rfid_items.len(), entry.quantity);
    added
}

/// Late-tie pass at payment start: give each unclaimed tag still in the
/// lane to the first RFID-eligible entry with room for it.
pub fn sweep(ledger: &mut RttlLedger, tags: &mut RoiBuffer) -> usize {
    let mut tied = 0;
    for tag in tags.current_mut() {
        if !tag.is_suspect() {
            continue;
        }
        let room = ledger.iter_mut().find(|e| {
            e.product.rfid_eligible
                && e.product_id == tag.upc
                && (e.quantity.trunc() as usize) > e.rfid_items.len()
        });
        if let Some(entry) = room {
            tag.associated = Some(entry.id);
            entry.rfid_items.push(tag.id);
            entry.rfid_confirmed = is_confirmed(entry.rfid_items.len(), entry.quantity);
            tied += 1;
            debug!(entry_id = %entry.id, epc = %tag.identity, "rfid_swept");
        }
    }
    tied
}

/// Release associations beyond the entry's quantity, newest first
pub fn trim(entry: &mut RttlEntry, tags: &mut RoiBuffer) {
    while (entry.rfid_items.len() as f64) > entry.quantity + FLOAT_TOLERANCE {
        let Some(id) = entry.rfid_items.pop() else {
            break;
        };
        tags.release(&[id]);
    }
    entry.rfid_confirmed = is_confirmed(entry.rfid_items.len(), entry.quantity);
}
