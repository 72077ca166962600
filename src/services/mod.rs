//! Services - reconciliation logic and per-lane state
//!
//! This module contains the core reconciliation services:
//! - `session` - Central reading processor for one checkout lane
//! - `lifecycle` - Basket lifecycle ordering rules
//! - `scale` - Scale delta buffering and weight association
//! - `roi` - CV object and RFID tag buffers with ROI tracking
//! - `cv` - CV object matching by product name and scan time
//! - `rfid` - RFID tag matching by decoded product code
//! - `suspects` - Suspect aggregation and basket carryover

pub mod cv;
pub mod lifecycle;
pub mod rfid;
pub mod roi;
pub mod scale;
pub mod session;
pub mod suspects;

// Re-export commonly used types
pub use lifecycle::BasketLifecycle;
pub use session::{Collaborators, ProcessError, Session, SessionSettings};
