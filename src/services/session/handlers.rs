//! Reading handlers for the Session
//!
//! One handler per stream. POS events drive the basket; scale, CV and RFID
//! readings feed the evidence buffers and reconcile against the ledger.

use super::{ProcessError, Session};
use crate::domain::catalog::ProductDetails;
use crate::domain::ledger::{Removal, RttlEntry};
use crate::domain::types::{
    is_each_unit, pad_product_id, CvRoiPayload, EventKind, PosPayload, RfidRoiPayload,
    ScalePayload,
};
use crate::services::{cv, rfid};
use crate::services::roi::Sighting;
use crate::services::scale::ScaleOutcome;
use crate::services::suspects;
use tracing::{debug, error, info, warn};

impl Session {
    pub(crate) fn handle_pos(
        &mut self,
        kind: &EventKind,
        mut pos: PosPayload,
    ) -> Result<(), ProcessError> {
        if !pos.product_id.is_empty() {
            pos.product_id = pad_product_id(&pos.product_id);
        }

        match kind {
            EventKind::BasketOpen => self.handle_basket_open(&pos),
            EventKind::BasketClose => self.handle_basket_close(&pos),
            EventKind::ScannedItem => return self.handle_scanned_item(&pos),
            EventKind::RemoveItem => return self.handle_remove_item(&pos),
            EventKind::PaymentStart => self.handle_payment_start(),
            EventKind::PaymentSuccess => {
                self.after_payment_success = true;
                info!(basket_id = %pos.basket_id, "payment_success");
            }
            other => return Err(ProcessError::UnknownPosEvent(other.to_string())),
        }
        Ok(())
    }

    /// Start a basket. The first open of the session keeps whatever the
    /// CV and RFID streams saw before it.
    fn handle_basket_open(&mut self, pos: &PosPayload) {
        self.reset_basket();
        if self.first_basket_open_complete {
            self.carry_over();
        } else {
            self.first_basket_open_complete = true;
        }
        info!(basket_id = %pos.basket_id, lane_id = %pos.lane_id, "basket_open");
    }

    fn handle_basket_close(&mut self, pos: &PosPayload) {
        self.reset_basket();
        self.carry_over();
        info!(basket_id = %pos.basket_id, lane_id = %pos.lane_id, "basket_close");
    }

    fn reset_basket(&mut self) {
        self.ledger.clear();
        self.scale.reset();
    }

    fn carry_over(&mut self) {
        let (cv, rfid) = suspects::carry_over_basket(&mut self.cv_objects, &mut self.rfid_tags);
        self.after_payment_success = false;
        debug!(cv_carried = %cv, rfid_carried = %rfid, "basket_carry_over");
    }

    /// Append a scan and reconcile it against the CV and RFID buffers.
    /// "Each" items need catalog weights; a failed lookup drops the scan.
    fn handle_scanned_item(&mut self, pos: &PosPayload) -> Result<(), ProcessError> {
        let product = if is_each_unit(&pos.quantity_unit) {
            self.catalog.lookup(&pos.product_id)?
        } else {
            ProductDetails::new("", pos.quantity, pos.quantity, false)
        };

        let appended = self.ledger.append(RttlEntry::from_scan(pos, product));
        let Some(entry) = self.ledger.get_mut(appended.id) else {
            return Ok(());
        };

        if appended.merged && !entry.scale_items.is_empty() {
            self.scale.check_confirmed(entry);
        }
        let cv_added = self.cv.reconcile(entry, &mut self.cv_objects);
        let rfid_added = if entry.product.rfid_eligible {
            rfid::reconcile(entry, &mut self.rfid_tags)
        } else {
            0
        };

        info!(
            product_id = %entry.product_id,
            quantity = %entry.quantity,
            unit = %entry.quantity_unit,
            merged = %appended.merged,
            cv_added = %cv_added,
            rfid_added = %rfid_added,
            "rttl_appended"
        );
        Ok(())
    }

    /// Remove quantity across matching entries. Emptied entries hand their
    /// evidence back to the suspect buffers; reduced ones shed the excess.
    fn handle_remove_item(&mut self, pos: &PosPayload) -> Result<(), ProcessError> {
        let report = self.ledger.remove(&pos.product_id, pos.quantity);

        for removal in &report.affected {
            match removal {
                Removal::Deleted(entry) => {
                    let mut entry = entry.clone();
                    self.scale.release(&mut entry);
                    self.cv_objects.release(&entry.cv_items);
                    self.rfid_tags.release(&entry.rfid_items);
                    debug!(entry_id = %entry.id, "rttl_entry_deleted");
                }
                Removal::Reduced(id) => {
                    let Some(entry) = self.ledger.get_mut(*id) else {
                        continue;
                    };
                    self.cv.trim(entry, &mut self.cv_objects);
                    rfid::trim(entry, &mut self.rfid_tags);
                    if !entry.scale_items.is_empty() {
                        self.scale.check_confirmed(entry);
                    }
                    debug!(entry_id = %entry.id, quantity = %entry.quantity, "rttl_entry_reduced");
                }
            }
        }

        cv::relink(self.ledger.iter(), &mut self.cv_objects);
        self.lifecycle.set_scanned(self.ledger.has_outstanding_items());
        info!(
            product_id = %pos.product_id,
            quantity = %pos.quantity,
            unsatisfied = %report.unsatisfied,
            "rttl_removed"
        );
        report.check()?;
        Ok(())
    }

    /// Tie late RFID tags, then hand any unresolved evidence to the notifier
    fn handle_payment_start(&mut self) {
        let swept = rfid::sweep(&mut self.ledger, &mut self.rfid_tags);
        let snapshot = self.suspects();

        if snapshot.is_empty() {
            info!(rfid_swept = %swept, "no_suspect_items");
            return;
        }

        match snapshot.to_json_pretty() {
            Ok(payload) => {
                info!(
                    scale = %snapshot.scale_suspect_list.len(),
                    cv = %snapshot.cv_suspect_list.len(),
                    rfid = %snapshot.rfid_suspect_list.len(),
                    rfid_swept = %swept,
                    "suspect_items_emitted"
                );
                self.notifier.notify(payload);
                self.metrics.record_suspect_list_emitted();
            }
            Err(e) => error!(error = %e, "suspect_items_serialize_failed"),
        }
    }

    pub(crate) fn handle_weight(&mut self, reading: &ScalePayload) {
        let outcome = self.scale.record(reading, self.ledger.tail_mut());
        match outcome {
            ScaleOutcome::Noise => {}
            ScaleOutcome::Removed { cancelled } => {
                debug!(total = %reading.total, cancelled = %cancelled, "scale_weight_removed");
            }
            ScaleOutcome::Buffered { id, confirmed } => {
                debug!(
                    total = %reading.total,
                    scale_event = id.0,
                    confirmed = %confirmed,
                    suspects = %self.scale.suspect_count(),
                    "scale_weight_added"
                );
            }
        }
    }

    /// Track the object, then retry every entry CV has not confirmed yet
    pub(crate) fn handle_cv_roi(&mut self, reading: &CvRoiPayload) {
        let sighting = Sighting {
            identity: reading.product_name.clone(),
            product_name: reading.product_name.clone(),
            upc: String::new(),
            lane_id: reading.lane_id.clone(),
            roi_name: reading.roi_name.clone(),
            roi_action: reading.roi_action.clone(),
            event_time: reading.event_time,
        };
        let upserted = self.cv_objects.upsert(&sighting, self.after_payment_success);
        if let Err(e) = upserted.location {
            warn!(object = %reading.product_name, error = %e, "cv_roi_not_updated");
        }

        for entry in self.ledger.iter_mut().filter(|e| !e.cv_confirmed) {
            self.cv.reconcile(entry, &mut self.cv_objects);
        }
    }

    /// Decode the tag and track it. Tags for products outside the catalog
    /// are ignored.
    pub(crate) fn handle_rfid_roi(&mut self, reading: &RfidRoiPayload) -> Result<(), ProcessError> {
        let upc = self
            .epc
            .decode(&reading.epc)
            .map_err(|source| ProcessError::Decode { epc: reading.epc.clone(), source })?;
        let product = self.catalog.lookup(&upc)?;

        let sighting = Sighting {
            identity: reading.epc.clone(),
            product_name: product.name,
            upc,
            lane_id: reading.lane_id.clone(),
            roi_name: reading.roi_name.clone(),
            roi_action: reading.roi_action.clone(),
            event_time: reading.event_time,
        };
        let upserted = self.rfid_tags.upsert(&sighting, self.after_payment_success);
        if let Err(e) = upserted.location {
            warn!(epc = %reading.epc, error = %e, "rfid_roi_not_updated");
        }
        Ok(())
    }
}
