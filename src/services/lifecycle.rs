//! Basket lifecycle ordering rules

use crate::domain::types::EventKind;

/// Milestones seen in the current checkout session
#[derive(Debug, Default, Clone, PartialEq)]
pub struct BasketLifecycle {
    basket_open: bool,
    basket_close: bool,
    scanned_item: bool,
    remove_item: bool,
    weight: bool,
    payment_start: bool,
    payment_success: bool,
}

impl BasketLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear every milestone
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Validate `kind` against the milestones seen so far, recording it on
    /// success. A rejected event leaves every flag unchanged.
    pub fn check(&mut self, kind: &EventKind) -> bool {
        let in_basket = self.basket_open && !self.basket_close;
        let paying = self.payment_start || self.payment_success;

        match kind {
            EventKind::BasketOpen => {
                if self.basket_open {
                    return false;
                }
                self.basket_open = true;
                self.basket_close = false;
            }
            EventKind::ScannedItem => {
                if !in_basket || paying {
                    return false;
                }
                self.scanned_item = true;
            }
            EventKind::RemoveItem => {
                if !in_basket || !self.scanned_item || paying {
                    return false;
                }
                self.remove_item = true;
            }
            EventKind::Weight => {
                if !in_basket || paying {
                    return false;
                }
                self.weight = true;
            }
            EventKind::PaymentStart => {
                if !in_basket || !self.scanned_item || paying {
                    return false;
                }
                self.payment_start = true;
            }
            EventKind::PaymentSuccess => {
                if !in_basket
                    || !self.scanned_item
                    || !self.payment_start
                    || self.payment_success
                {
                    return false;
                }
                self.payment_success = true;
                self.payment_start = false;
            }
            EventKind::BasketClose => {
                if !self.basket_open || self.payment_start {
                    return false;
                }
                self.reset();
                self.basket_close = true;
            }
            EventKind::CvRoi | EventKind::RfidRoi => {}
            EventKind::Unknown(_) => return false,
        }
        true
    }

    /// Override the scanned-item milestone, e.g. once every item is removed
    pub fn set_scanned(&mut self, scanned: bool) {
        self.scanned_item = scanned;
    }

    pub fn is_open(&self) -> bool {
        self.basket_open
    }

    pub fn is_closed(&self) -> bool {
        self.basket_close
    }

    pub fn has_scanned(&self) -> bool {
        self.scanned_item
    }

    pub fn payment_started(&self) -> bool {
        self.payment_start
    }
}
