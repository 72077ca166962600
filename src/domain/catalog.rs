//! Product catalog and EPC decoder contracts

use crate::domain::types::pad_product_id;
use anyhow::{Context, Result};
use rustc_hash::FxHashMap;
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum LookupError {
    #[error("product {0} not found")]
    NotFound(String),
    #[error("weight range not initialized for product {0}")]
    WeightRangeUnset(String),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum EpcError {
    #[error("epc must be 24 hex characters, got {0}")]
    Length(usize),
    #[error("epc is not valid hex")]
    Hex,
    #[error("epc header {0:#04x} is not SGTIN-96")]
    Header(u8),
    #[error("invalid partition value {0}")]
    Partition(u8),
    #[error("company prefix {0} out of range")]
    CompanyPrefix(u64),
    #[error("item reference {0} out of range")]
    ItemReference(u64),
}

/// Allowed weight window, in scale units
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WeightRange {
    pub min: f64,
    pub max: f64,
}

/// Catalog attributes of a product
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ProductDetails {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "min_weight", default)]
    pub expected_min_weight: f64,
    #[serde(rename = "max_weight", default)]
    pub expected_max_weight: f64,
    #[serde(default)]
    pub rfid_eligible: bool,
}

impl ProductDetails {
    pub fn new(name: &str, min_weight: f64, max_weight: f64, rfid_eligible: bool) -> Self {
        Self {
            name: name.to_string(),
            expected_min_weight: min_weight,
            expected_max_weight: max_weight,
            rfid_eligible,
        }
    }
}

/// Product lookup by padded product id
pub trait ProductCatalog: Send + Sync {
    fn lookup(&self, product_id: &str) -> Result<ProductDetails, LookupError>;
}

/// EPC to GTIN-14 product code
pub trait EpcDecoder: Send + Sync {
    fn decode(&self, epc: &str) -> Result<String, EpcError>;
}

#[derive(Debug, Deserialize)]
struct CatalogRow {
    barcode: String,
    #[serde(flatten)]
    details: ProductDetails,
}

fn check_range(product_id: &str, details: &ProductDetails) -> Result<(), LookupError> {
    if details.expected_min_weight == 0.0 && details.expected_max_weight == 0.0 {
        return Err(LookupError::WeightRangeUnset(product_id.to_string()));
    }
    Ok(())
}

/// Catalog loaded from a JSON product database
#[derive(Debug, Default)]
pub struct JsonFileCatalog {
    products: FxHashMap<String, ProductDetails>,
}

impl JsonFileCatalog {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read catalog {}", path.display()))?;
        Self::from_json(&contents)
            .with_context(|| format!("failed to parse catalog {}", path.display()))
    }

    pub fn from_json(contents: &str) -> Result<Self> {
        let rows: Vec<CatalogRow> = serde_json::from_str(contents)?;
        let products =
            rows.into_iter().map(|row| (pad_product_id(&row.barcode), row.details)).collect();
        Ok(Self { products })
    }

    pub fn len(&self) -> usize {
        self.products.len()
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }
}

impl ProductCatalog for JsonFileCatalog {
    fn lookup(&self, product_id: &str) -> Result<ProductDetails, LookupError> {
        let details = self
            .products
            .get(product_id)
            .ok_or_else(|| LookupError::NotFound(product_id.to_string()))?;
        check_range(product_id, details)?;
        Ok(details.clone())
    }
}

/// Builder-style catalog for tests and the simulator
#[derive(Debug, Default, Clone)]
pub struct InMemoryCatalog {
    products: FxHashMap<String, ProductDetails>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_product(mut self, product_id: &str, details: ProductDetails) -> Self {
        self.products.insert(pad_product_id(product_id), details);
        self
    }
}

impl ProductCatalog for InMemoryCatalog {
    fn lookup(&self, product_id: &str) -> Result<ProductDetails, LookupError> {
        let details = self
            .products
            .get(product_id)
            .ok_or_else(|| LookupError::NotFound(product_id.to_string()))?;
        check_range(product_id, details)?;
        Ok(details.clone())
    }
}
