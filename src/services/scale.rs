//! Scale reconciliation: match weight deltas to the ledger tail

use crate::domain::catalog::WeightRange;
use crate::domain::ledger::RttlEntry;
use crate::domain::snapshot::ScaleSuspect;
use crate::domain::types::{
    is_each_unit, EntryId, ScaleEventId, ScalePayload, FLOAT_TOLERANCE, SCALE_PRECISION,
};
use std::collections::BTreeMap;
use tracing::debug;

/// A significant weight change seen by the scale
#[derive(Debug, Clone, PartialEq)]
pub struct ScaleEvent {
    pub delta: f64,
    pub total: f64,
    pub units: String,
    pub lane_id: String,
    pub scale_id: String,
    pub status: String,
    pub event_time: i64,
    pub associated: Option<EntryId>,
    /// Matched by a later removal from the scale
    pub cancelled: bool,
}

impl ScaleEvent {
    fn from_reading(reading: &ScalePayload, delta: f64) -> Self {
        Self {
            delta,
            total: reading.total,
            units: reading.units.clone(),
            lane_id: reading.lane_id.clone(),
            scale_id: reading.scale_id.clone(),
            status: reading.status.clone(),
            event_time: reading.event_time,
            associated: None,
            cancelled: false,
        }
    }

    pub fn to_suspect(&self) -> ScaleSuspect {
        ScaleSuspect {
            delta: self.delta,
            total: self.total,
            units: self.units.clone(),
            lane_id: self.lane_id.clone(),
            scale_id: self.scale_id.clone(),
            event_time: self.event_time,
            status: self.status.clone(),
        }
    }
}

/// What a scale reading did
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScaleOutcome {
    /// Change within scale precision
    Noise,
    /// Weight left the scale; `cancelled` when it matched a suspect
    Removed { cancelled: bool },
    /// Buffered as a suspect, possibly associated with the tail entry
    Buffered { id: ScaleEventId, confirmed: bool },
}

/// Scale buffer and suspect map for one basket
#[derive(Debug)]
pub struct ScaleReconciler {
    events: Vec<ScaleEvent>,
    suspects: BTreeMap<i64, ScaleEventId>,
    last_total: Option<f64>,
    last_reading: Option<ScaleEvent>,
    tolerance: f64,
}

impl ScaleReconciler {
    pub fn new(scale_to_scale_tolerance: f64) -> Self {
        Self {
            events: Vec::new(),
            suspects: BTreeMap::new(),
            last_total: None,
            last_reading: None,
            tolerance: scale_to_scale_tolerance,
        }
    }

    pub fn reset(&mut self) {
        self.events.clear();
        self.suspects.clear();
        self.last_total = None;
        self.last_reading = None;
    }

    /// Apply one scale reading. `tail` is the most recent ledger entry.
    pub fn record(&mut self, reading: &ScalePayload, tail: Option<&mut RttlEntry>) -> ScaleOutcome {
        let delta = reading.total - self.last_total.unwrap_or(0.0);
        if delta.abs() <= SCALE_PRECISION {
            return ScaleOutcome::Noise;
        }
        self.last_total = Some(reading.total);
        let event = ScaleEvent::from_reading(reading, delta);
        self.last_reading = Some(event.clone());

        if delta < 0.0 {
            return ScaleOutcome::Removed { cancelled: self.cancel_suspect(delta) };
        }

        let id = ScaleEventId(self.events.len());
        self.suspects.insert(event.event_time, id);
        self.events.push(event);

        let Some(entry) = tail else {
            return ScaleOutcome::Buffered { id, confirmed: false };
        };

        if is_each_unit(&entry.quantity_unit) {
            let range = self.weight_range(entry);
            entry.current_weight_range = range;
            if range.min > FLOAT_TOLERANCE
                && (entry.quantity < 1.0 || delta < range.min / entry.quantity)
            {
                debug!(entry_id = %entry.id, delta = %delta, min = %range.min, "scale_delta_below_unit_weight");
                entry.scale_confirmed = false;
                return ScaleOutcome::Buffered { id, confirmed: false };
            }
        }

        let confirmed = self.associate_backward(entry);
        ScaleOutcome::Buffered { id, confirmed }
    }

    /// Remaining weight window for `entry` given its associations
    pub fn weight_range(&self, entry: &RttlEntry) -> WeightRange {
        let associated = self.associated_weight(entry);
        if is_each_unit(&entry.quantity_unit) {
            WeightRange {
                min: entry.product.expected_min_weight * entry.quantity - associated,
                max: entry.product.expected_max_weight * entry.quantity - associated,
            }
        } else {
            WeightRange {
                min: entry.quantity * (1.0 - self.tolerance) - associated,
                max: entry.quantity * (1.0 + self.tolerance) - associated,
            }
        }
    }

    /// Recompute `entry.scale_confirmed`.
    ///
    /// Each-unit entries demote their most recent associations back to
    /// suspect while the associated weight exceeds the scanned quantity by
    /// a full unit. Bulk entries compare the scanned weight with the
    /// associated weight against the scale-to-scale tolerance.
    pub fn check_confirmed(&mut self, entry: &mut RttlEntry) -> bool {
        if !is_each_unit(&entry.quantity_unit) {
            entry.current_weight_range = self.weight_range(entry);
            let scale_weight = self.associated_weight(entry);
            let percent_change = if scale_weight != 0.0 {
                ((entry.quantity - scale_weight) / scale_weight).abs()
            } else {
                0.0
            };
            debug!(
                entry_id = %entry.id,
                percent_change = %percent_change,
                tolerance = %self.tolerance,
                "scale_bulk_check"
            );
            entry.scale_confirmed = percent_change < self.tolerance || percent_change == 0.0;
            return entry.scale_confirmed;
        }

        let mut range = self.weight_range(entry);
        entry.current_weight_range = range;
        if range.min > FLOAT_TOLERANCE {
            entry.scale_confirmed = false;
            return false;
        }

        while overpopulated(entry, range) {
            let Some(id) = entry.scale_items.pop() else {
                break;
            };
            self.demote(id);
            debug!(entry_id = %entry.id, scale_event = id.0, "scale_overpopulated_demoted");
            range = self.weight_range(entry);
            entry.current_weight_range = range;
        }

        entry.scale_confirmed = range.min <= FLOAT_TOLERANCE;
        entry.scale_confirmed
    }

    /// Return every event associated with `entry` to the suspect map
    pub fn release(&mut self, entry: &mut RttlEntry) {
        for id in entry.scale_items.drain(..) {
            if let Some(event) = self.events.get_mut(id.0) {
                event.associated = None;
                self.suspects.insert(event.event_time, id);
            }
        }
        entry.scale_confirmed = false;
    }

    pub fn events(&self) -> &[ScaleEvent] {
        &self.events
    }

    pub fn get(&self, id: ScaleEventId) -> Option<&ScaleEvent> {
        self.events.get(id.0)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn suspect_count(&self) -> usize {
        self.suspects.len()
    }

    pub fn suspects(&self) -> impl Iterator<Item = &ScaleEvent> {
        self.suspects.values().filter_map(|id| self.events.get(id.0))
    }

    /// Copy of the suspect map keyed by event time
    pub fn suspect_snapshot(&self) -> BTreeMap<i64, ScaleSuspect> {
        self.suspects
            .iter()
            .filter_map(|(t, id)| self.events.get(id.0).map(|e| (*t, e.to_suspect())))
            .collect()
    }

    pub fn last_reading(&self) -> Option<&ScaleEvent> {
        self.last_reading.as_ref()
    }

    fn associated_weight(&self, entry: &RttlEntry) -> f64 {
        entry.scale_items.iter().filter_map(|id| self.events.get(id.0)).map(|e| e.delta).sum()
    }

    /// No entry is settled until some weight is associated
    fn satisfied(&mut self, entry: &mut RttlEntry) -> bool {
        self.check_confirmed(entry) && !entry.scale_items.is_empty()
    }

    fn associate_backward(&mut self, entry: &mut RttlEntry) -> bool {
        for idx in (0..self.events.len()).rev() {
            if self.satisfied(entry) {
                break;
            }
            let event = &self.events[idx];
            if event.associated.is_some() || event.cancelled {
                continue;
            }
            if event.delta > entry.current_weight_range.max {
                continue;
            }
            let event_time = event.event_time;
            self.events[idx].associated = Some(entry.id);
            entry.scale_items.push(ScaleEventId(idx));
            self.suspects.remove(&event_time);
            debug!(entry_id = %entry.id, scale_event = idx, "scale_associated");
        }
        self.check_confirmed(entry)
    }

    fn demote(&mut self, id: ScaleEventId) {
        if let Some(event) = self.events.get_mut(id.0) {
            event.associated = None;
            self.suspects.insert(event.event_time, id);
        }
    }

    fn cancel_suspect(&mut self, delta: f64) -> bool {
        let removed = delta.abs();
        let hit = self.suspects.iter().find_map(|(t, id)| {
            let event = self.events.get(id.0)?;
            ((removed - event.delta).abs() < SCALE_PRECISION).then_some((*t, id.0))
        });
        match hit {
            Some((event_time, idx)) => {
                self.suspects.remove(&event_time);
                self.events[idx].cancelled = true;
                true
            }
            None => false,
        }
    }
}

/// Associated weight covers a whole extra unit. Products without a
/// minimum weight only count as overpopulated past their maximum.
fn overpopulated(entry: &RttlEntry, range: WeightRange) -> bool {
    let unit_min = entry.product.expected_min_weight;
    if unit_min > FLOAT_TOLERANCE {
        range.min <= -unit_min + FLOAT_TOLERANCE
    } else {
        range.max < -FLOAT_TOLERANCE
    }
}
