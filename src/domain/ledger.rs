//! RTTL ledger: the point-of-sale scan log for the open basket

use crate::domain::catalog::{ProductDetails, WeightRange};
use crate::domain::types::{EntryId, ObjectId, PosPayload, ScaleEventId, FLOAT_TOLERANCE};
use smallvec::SmallVec;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum LedgerError {
    #[error("remove failed for {product_id}: {remaining} left unsatisfied")]
    RemoveFailed { product_id: String, remaining: f64 },
}

/// One scan folded into a merged entry
#[derive(Debug, Clone, PartialEq)]
pub struct ScanRecord {
    pub quantity: f64,
    pub unit_price: f64,
    pub event_time: i64,
}

/// One scanned product line.
///
/// Association lists hold ids into the scale buffer and the CV/RFID
/// object buffers; they are never serialized directly.
#[derive(Debug, Clone)]
pub struct RttlEntry {
    pub id: EntryId,
    pub product_id: String,
    pub product_name: String,
    pub quantity: f64,
    pub quantity_unit: String,
    pub unit_price: f64,
    pub customer_id: String,
    pub employee_id: String,
    pub basket_id: String,
    pub lane_id: String,
    pub event_time: i64,
    pub product: ProductDetails,
    pub scale_confirmed: bool,
    pub cv_confirmed: bool,
    pub rfid_confirmed: bool,
    pub collection: Vec<ScanRecord>,
    pub scale_items: SmallVec<[ScaleEventId; 4]>,
    pub cv_items: SmallVec<[ObjectId; 4]>,
    pub rfid_items: SmallVec<[ObjectId; 4]>,
    pub current_weight_range: WeightRange,
}

impl RttlEntry {
    /// Build an unassigned entry from a POS scan; the ledger sets the id
    pub fn from_scan(scan: &PosPayload, product: ProductDetails) -> Self {
        Self {
            id: EntryId(0),
            product_id: scan.product_id.clone(),
            product_name: scan.product_name.clone(),
            quantity: scan.quantity,
            quantity_unit: scan.quantity_unit.clone(),
            unit_price: scan.unit_price,
            customer_id: scan.customer_id.clone(),
            employee_id: scan.employee_id.clone(),
            basket_id: scan.basket_id.clone(),
            lane_id: scan.lane_id.clone(),
            event_time: scan.event_time,
            product,
            scale_confirmed: false,
            cv_confirmed: false,
            rfid_confirmed: false,
            collection: Vec::new(),
            scale_items: SmallVec::new(),
            cv_items: SmallVec::new(),
            rfid_items: SmallVec::new(),
            current_weight_range: WeightRange::default(),
        }
    }

    fn record(&self) -> ScanRecord {
        ScanRecord {
            quantity: self.quantity,
            unit_price: self.unit_price,
            event_time: self.event_time,
        }
    }

    /// Peel up to `wanted` from this entry. Returns how much was taken.
    fn take(&mut self, wanted: f64) -> f64 {
        if self.collection.is_empty() {
            if self.quantity <= wanted + FLOAT_TOLERANCE {
                let taken = self.quantity;
                self.quantity = 0.0;
                return taken;
            }
            self.quantity -= wanted;
            return wanted;
        }

        let mut remaining = wanted;
        while remaining > FLOAT_TOLERANCE {
            let Some(front) = self.collection.first_mut() else {
                break;
            };
            if front.quantity <= remaining + FLOAT_TOLERANCE {
                remaining -= front.quantity;
                self.collection.remove(0);
            } else {
                front.quantity -= remaining;
                remaining = 0.0;
            }
        }
        self.quantity = self.collection.iter().map(|r| r.quantity).sum();
        wanted - remaining.max(0.0)
    }

    #[inline]
    fn is_spent(&self) -> bool {
        self.quantity <= FLOAT_TOLERANCE
    }
}

/// Result of appending a scan
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Appended {
    pub id: EntryId,
    pub merged: bool,
}

/// What a removal did to one matching entry
#[derive(Debug, Clone)]
pub enum Removal {
    /// Entry emptied and dropped from the ledger
    Deleted(RttlEntry),
    /// Entry still present with a lower quantity
    Reduced(EntryId),
}

#[derive(Debug, Clone, Default)]
pub struct RemoveReport {
    pub product_id: String,
    pub affected: Vec<Removal>,
    pub unsatisfied: f64,
}

impl RemoveReport {
    /// Fails when the requested quantity could not be fully removed.
    /// The ledger keeps whatever reduction already happened.
    pub fn check(&self) -> Result<(), LedgerError> {
        if self.unsatisfied > FLOAT_TOLERANCE {
            return Err(LedgerError::RemoveFailed {
                product_id: self.product_id.clone(),
                remaining: self.unsatisfied,
            });
        }
        Ok(())
    }
}

/// Ordered scan log. Ids are monotonic across clears.
#[derive(Debug, Default)]
pub struct RttlLedger {
    entries: Vec<RttlEntry>,
    next_id: u64,
}

impl RttlLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a scan, merging into the tail when the product repeats
    pub fn append(&mut self, mut entry: RttlEntry) -> Appended {
        if let Some(tail) = self.entries.last_mut() {
            if !entry.product_id.is_empty() && tail.product_id == entry.product_id {
                if tail.collection.is_empty() {
                    let own = tail.record();
                    tail.collection.push(own);
                }
                tail.collection.push(entry.record());
                tail.quantity += entry.quantity;
                tail.event_time = entry.event_time;
                return Appended { id: tail.id, merged: true };
            }
        }

        self.next_id += 1;
        let id = EntryId(self.next_id);
        entry.id = id;
        self.entries.push(entry);
        Appended { id, merged: false }
    }

    /// Remove `quantity` of `product_id`, front to back across matching entries
    pub fn remove(&mut self, product_id: &str, quantity: f64) -> RemoveReport {
        let mut report =
            RemoveReport { product_id: product_id.to_string(), ..RemoveReport::default() };
        let mut remaining = quantity;
        let mut i = 0;

        while i < self.entries.len() && remaining > FLOAT_TOLERANCE {
            if self.entries[i].product_id != product_id {
                i += 1;
                continue;
            }
            remaining -= self.entries[i].take(remaining);
            if self.entries[i].is_spent() {
                report.affected.push(Removal::Deleted(self.entries.remove(i)));
            } else {
                report.affected.push(Removal::Reduced(self.entries[i].id));
                i += 1;
            }
        }

        report.unsatisfied = remaining.max(0.0);
        report
    }

    pub fn has_outstanding_items(&self) -> bool {
        self.entries.iter().any(|e| e.quantity > FLOAT_TOLERANCE)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn tail(&self) -> Option<&RttlEntry> {
        self.entries.last()
    }

    pub fn tail_mut(&mut self) -> Option<&mut RttlEntry> {
        self.entries.last_mut()
    }

    pub fn get(&self, id: EntryId) -> Option<&RttlEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn get_mut(&mut self, id: EntryId) -> Option<&mut RttlEntry> {
        self.entries.iter_mut().find(|e| e.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RttlEntry> {
        self.entries.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut RttlEntry> {
        self.entries.iter_mut()
    }

    pub fn total_quantity(&self) -> f64 {
        self.entries.iter().map(|e| e.quantity).sum()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
