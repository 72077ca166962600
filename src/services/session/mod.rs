//! Per-lane checkout session
//!
//! The Session is the central reading processor for one lane. It owns the
//! basket lifecycle, the RTTL ledger, the scale buffer and both ROI object
//! buffers, and applies readings strictly in arrival order:
//!
//! 1. classify the publishing device
//! 2. decode the payload for that stream
//! 3. validate the event against the basket lifecycle
//! 4. dispatch to the stream handler
//! 5. publish the resulting lane state
//!
//! Lanes never share a Session.

mod handlers;
#[cfg(test)]
mod tests;

use crate::domain::catalog::{EpcDecoder, EpcError, LookupError, ProductCatalog};
use crate::domain::ledger::{LedgerError, RttlLedger};
use crate::domain::snapshot::{
    new_shared_state, CvItemView, PosItemView, RfidItemView, ScaleItemView, SharedState,
    StateSnapshot, StateStats, SuspectSnapshot,
};
use crate::domain::types::{
    CvRoiPayload, DeviceNames, EventKind, PosPayload, RawReading, RfidRoiPayload, ScalePayload,
    Source, FLOAT_TOLERANCE,
};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::egress_channel::EgressSender;
use crate::io::notifier::Notifier;
use crate::services::cv::CvReconciler;
use crate::services::lifecycle::BasketLifecycle;
use crate::services::roi::RoiBuffer;
use crate::services::scale::{ScaleEvent, ScaleReconciler};
use crate::services::suspects;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Why a reading was rejected or only partly applied
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("did not recognize device {0}")]
    UnknownDevice(String),
    #[error("{kind} payload unmarshal failure: {source}")]
    Malformed {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("event occurred out of order: {0}")]
    OutOfOrder(String),
    #[error("product lookup failed: {0}")]
    Lookup(#[from] LookupError),
    #[error("bad epc {epc}: {source}")]
    Decode {
        epc: String,
        #[source]
        source: EpcError,
    },
    #[error(transparent)]
    RemoveFailed(#[from] LedgerError),
    #[error("unknown pos event: {0}")]
    UnknownPosEvent(String),
    #[error("{stream} device sent unexpected event {kind}")]
    UnexpectedEvent { stream: &'static str, kind: String },
}

impl ProcessError {
    fn record(&self, metrics: &Metrics) {
        match self {
            ProcessError::UnknownDevice(_) => metrics.record_unknown_device(),
            ProcessError::Malformed { .. } => metrics.record_malformed(),
            ProcessError::OutOfOrder(_) => metrics.record_out_of_order(),
            ProcessError::Lookup(_) => metrics.record_lookup_failure(),
            ProcessError::Decode { .. } => metrics.record_epc_decode_failure(),
            ProcessError::RemoveFailed(_) => metrics.record_remove_failure(),
            ProcessError::UnknownPosEvent(_) | ProcessError::UnexpectedEvent { .. } => {
                metrics.record_out_of_order()
            }
        }
    }

    fn log(&self, reading: &RawReading) {
        let (device, event) = (&reading.device, &reading.name);
        match self {
            ProcessError::Malformed { .. } => {
                error!(device = %device, event = %event, error = %self, "reading_malformed")
            }
            _ => warn!(device = %device, event = %event, error = %self, "reading_rejected"),
        }
    }
}

/// Decoded payload for one admitted reading
#[derive(Debug)]
enum Payload {
    Pos(PosPayload),
    Scale(ScalePayload),
    Cv(CvRoiPayload),
    Rfid(RfidRoiPayload),
}

/// Session tunables taken from the config file
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub devices: DeviceNames,
    pub scale_to_scale_tolerance: f64,
    /// Negative disables the CV time check
    pub cv_time_alignment_ms: i64,
}

impl SessionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            devices: config.devices().clone(),
            scale_to_scale_tolerance: config.scale_to_scale_tolerance(),
            cv_time_alignment_ms: config.cv_time_alignment_ms(),
        }
    }
}

/// External services the session calls into
#[derive(Clone)]
pub struct Collaborators {
    pub catalog: Arc<dyn ProductCatalog>,
    pub epc: Arc<dyn EpcDecoder>,
    pub notifier: Arc<dyn Notifier>,
}

/// Reconciliation state for one checkout lane
pub struct Session {
    pub(crate) lifecycle: BasketLifecycle,
    pub(crate) ledger: RttlLedger,
    pub(crate) scale: ScaleReconciler,
    pub(crate) cv_objects: RoiBuffer,
    pub(crate) rfid_tags: RoiBuffer,
    pub(crate) cv: CvReconciler,
    pub(crate) devices: DeviceNames,
    pub(crate) catalog: Arc<dyn ProductCatalog>,
    pub(crate) epc: Arc<dyn EpcDecoder>,
    pub(crate) notifier: Arc<dyn Notifier>,
    pub(crate) metrics: Arc<Metrics>,
    /// MQTT egress sender (optional)
    pub(crate) egress_sender: Option<EgressSender>,
    pub(crate) state: SharedState,
    /// CV and RFID buffers survive the very first basket-open
    pub(crate) first_basket_open_complete: bool,
    /// New CV objects and RFID tags go to the next basket after payment
    pub(crate) after_payment_success: bool,
}

impl Session {
    pub fn new(
        settings: SessionSettings,
        collaborators: Collaborators,
        metrics: Arc<Metrics>,
        egress_sender: Option<EgressSender>,
    ) -> Self {
        Self {
            lifecycle: BasketLifecycle::new(),
            ledger: RttlLedger::new(),
            scale: ScaleReconciler::new(settings.scale_to_scale_tolerance),
            cv_objects: RoiBuffer::new(),
            rfid_tags: RoiBuffer::new(),
            cv: CvReconciler::new(settings.cv_time_alignment_ms),
            devices: settings.devices,
            catalog: collaborators.catalog,
            epc: collaborators.epc,
            notifier: collaborators.notifier,
            metrics,
            egress_sender,
            state: new_shared_state(),
            first_basket_open_complete: false,
            after_payment_success: false,
        }
    }

    /// Handle to the latest published state, for the HTTP routes
    pub fn state_handle(&self) -> SharedState {
        self.state.clone()
    }

    /// Consume readings until the channel closes or shutdown is signalled
    pub async fn run(
        &mut self,
        mut reading_rx: mpsc::Receiver<RawReading>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("session_started");
        loop {
            tokio::select! {
                reading = reading_rx.recv() => {
                    match reading {
                        Some(reading) => {
                            if let Err(e) = self.process_reading(&reading) {
                                e.log(&reading);
                            }
                        }
                        None => break,
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!(ledger_entries = %self.ledger.len(), "session_stopped");
    }

    /// Apply one reading. Errors never poison the session; the reading is
    /// either dropped or applied as far as it got.
    pub fn process_reading(&mut self, reading: &RawReading) -> Result<(), ProcessError> {
        let process_start = Instant::now();
        let result = self.apply(reading, process_start);
        if let Err(e) = &result {
            e.record(&self.metrics);
        }
        result
    }

    fn apply(&mut self, reading: &RawReading, process_start: Instant) -> Result<(), ProcessError> {
        let (kind, payload) = self.admit(reading)?;
        debug!(device = %reading.device, event = %kind, "processing_reading");

        let handled = match payload {
            Payload::Pos(pos) => self.handle_pos(&kind, pos),
            Payload::Scale(scale) => {
                self.handle_weight(&scale);
                Ok(())
            }
            Payload::Cv(cv) => {
                self.handle_cv_roi(&cv);
                Ok(())
            }
            Payload::Rfid(rfid) => self.handle_rfid_roi(&rfid),
        };

        self.publish_state(&kind);
        self.log_buffers();

        let latency_us = process_start.elapsed().as_micros() as u64;
        self.metrics.record_reading_processed(latency_us);
        handled
    }

    /// Classify, decode and order-check a reading. Nothing is mutated
    /// unless every step passes.
    fn admit(&mut self, reading: &RawReading) -> Result<(EventKind, Payload), ProcessError> {
        let source = self
            .devices
            .classify(&reading.device)
            .ok_or_else(|| ProcessError::UnknownDevice(reading.device.clone()))?;
        let kind = match reading.name.parse::<EventKind>() {
            Ok(kind) => kind,
            Err(never) => match never {},
        };
        if let EventKind::Unknown(name) = &kind {
            return Err(ProcessError::OutOfOrder(name.clone()));
        }

        let malformed = |source| ProcessError::Malformed { kind: kind.to_string(), source };
        let payload = match (source, &kind) {
            (Source::Pos, EventKind::Weight | EventKind::CvRoi | EventKind::RfidRoi) => {
                return Err(ProcessError::UnknownPosEvent(kind.to_string()));
            }
            (Source::Pos, _) => Payload::Pos(reading.decode().map_err(malformed)?),
            (Source::Scale, EventKind::Weight) => {
                Payload::Scale(reading.decode().map_err(malformed)?)
            }
            (Source::Cv, EventKind::CvRoi) => Payload::Cv(reading.decode().map_err(malformed)?),
            (Source::Rfid, EventKind::RfidRoi) => {
                Payload::Rfid(reading.decode().map_err(malformed)?)
            }
            (source, _) => {
                return Err(ProcessError::UnexpectedEvent {
                    stream: source.as_str(),
                    kind: kind.to_string(),
                });
            }
        };

        if !self.lifecycle.check(&kind) {
            return Err(ProcessError::OutOfOrder(kind.to_string()));
        }
        Ok((kind, payload))
    }

    /// Everything still unresolved right now
    pub fn suspects(&self) -> SuspectSnapshot {
        suspects::collect(&self.scale, &self.cv_objects, &self.rfid_tags)
    }

    /// Flat view of the lane for status consumers
    pub fn state_snapshot(&self, kind: &EventKind) -> StateSnapshot {
        let positems = self
            .ledger
            .iter()
            .filter(|e| e.quantity > FLOAT_TOLERANCE)
            .map(|e| PosItemView {
                product_id: e.product_id.clone(),
                product_name: e.product_name.clone(),
                quantity: e.quantity,
                quantity_unit: e.quantity_unit.clone(),
                unit_price: e.unit_price,
                customer_id: e.customer_id.clone(),
                employee_id: e.employee_id.clone(),
                event_time: e.event_time,
                rfid_eligible: e.product.rfid_eligible,
                rfid_reconciled: e.rfid_confirmed,
                cv_reconciled: e.cv_confirmed,
                scale_reconciled: e.scale_confirmed,
            })
            .collect();

        let scalesuspectitems = self
            .scale
            .suspects()
            .filter(|e| e.delta > 0.0)
            .map(scale_view)
            .collect();

        let cvsuspectitems = self
            .cv_objects
            .current()
            .iter()
            .filter(|o| o.is_suspect())
            .map(|o| CvItemView { product_name: o.identity.clone(), event_time: o.event_time })
            .collect();

        let rfidsuspectitems = self
            .rfid_tags
            .current()
            .iter()
            .filter(|o| o.is_suspect())
            .map(|o| RfidItemView {
                product_name: o.product_name.clone(),
                roi_name: o.roi_name.clone(),
                event_time: o.event_time,
            })
            .collect();

        StateSnapshot {
            event: kind.to_string(),
            positems,
            scaleitem: self.scale.last_reading().map(scale_view),
            scalesuspectitems,
            cvsuspectitems,
            rfidsuspectitems,
            stats: StateStats {
                cv_count: self.cv_objects.total_count(),
                rfid_count: self.rfid_tags.total_count(),
                scale_count: self.scale.len(),
            },
        }
    }

    fn publish_state(&self, kind: &EventKind) {
        let snapshot = self.state_snapshot(kind);
        if let Some(ref sender) = self.egress_sender {
            sender.send_state(snapshot.clone());
        }
        *self.state.write() = Some(snapshot);
    }

    fn log_buffers(&self) {
        debug!(
            ledger = %self.ledger.len(),
            scale = %self.scale.len(),
            scale_suspects = %self.scale.suspect_count(),
            cv = %self.cv_objects.current().len(),
            rfid = %self.rfid_tags.current().len(),
            "session_buffers"
        );
    }
}

fn scale_view(event: &ScaleEvent) -> ScaleItemView {
    ScaleItemView {
        scale_id: event.scale_id.clone(),
        total: event.total,
        delta: event.delta,
        event_time: event.event_time,
        units: event.units.clone(),
    }
}
