//! Domain models - readings, ledger and snapshot types
//!
//! - `types` - event kinds, device classification, reading payloads
//! - `ledger` - RTTL ledger of scanned products
//! - `catalog` - product catalog and EPC decoder contracts
//! - `epc` - SGTIN-96 decoder
//! - `snapshot` - suspect and current-state snapshots

pub mod catalog;
pub mod epc;
pub mod ledger;
pub mod snapshot;
pub mod types;

pub use catalog::{
    EpcDecoder, EpcError, InMemoryCatalog, JsonFileCatalog, LookupError, ProductCatalog,
    ProductDetails, WeightRange,
};
pub use epc::Sgtin96Decoder;
pub use ledger::{LedgerError, RttlEntry, RttlLedger};
pub use snapshot::{SharedState, StateSnapshot, SuspectSnapshot};
pub use types::{Envelope, EventKind, RawReading, Source};
