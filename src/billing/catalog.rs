//! Price catalog keyed by product SKU.

use std::collections::BTreeMap;

use camino::Utf8Path;
use rust_decimal::Decimal;
use serde::Deserialize;
use thiserror::Error;

use crate::files::read_to_string_ambient;

/// SKU of the stub driver's single built-in product.
pub const STUB_SKU: &str = "SUPPEZST6XFGKCM2";

/// Errors raised while building a catalog.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum CatalogError {
    /// Raised when two entries share a SKU.
    #[error("duplicate SKU {sku} in price catalog")]
    DuplicateSku {
        /// Offending SKU.
        sku: String,
    },
    /// Raised when a price-list document cannot be parsed.
    #[error("invalid price list: {0}")]
    Parse(String),
    /// Raised when a product lacks a field required for billing.
    #[error("product {sku} is missing attribute {attribute}")]
    MissingAttribute {
        /// Product SKU.
        sku: String,
        /// Attribute name.
        attribute: String,
    },
}

/// A single priced product.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PriceCatalogEntry {
    /// Unique product key.
    pub sku: String,
    /// Instance type label matched against usage records.
    pub instance_type: String,
    /// Price per time unit.
    pub price: Decimal,
    /// Product family label (for example `Compute Instance`).
    pub product_family: Option<String>,
    /// Descriptive attributes not used in computation.
    pub attributes: BTreeMap<String, String>,
}

impl PriceCatalogEntry {
    /// Creates an entry without descriptive attributes.
    #[must_use]
    pub fn new(sku: impl Into<String>, instance_type: impl Into<String>, price: Decimal) -> Self {
        Self {
            sku: sku.into(),
            instance_type: instance_type.into(),
            price,
            product_family: None,
            attributes: BTreeMap::new(),
        }
    }
}

/// Read-only mapping from SKU to entry, preserving insertion order.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PriceCatalog {
    entries: Vec<PriceCatalogEntry>,
}

#[derive(Deserialize)]
struct OfferDocument {
    products: BTreeMap<String, OfferProduct>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OfferProduct {
    sku: Option<String>,
    product_family: Option<String>,
    #[serde(default)]
    attributes: BTreeMap<String, String>,
}

impl PriceCatalog {
    /// Builds a catalog, rejecting duplicate SKUs.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::DuplicateSku`] when two entries share a SKU.
    pub fn from_entries(
        entries: impl IntoIterator<Item = PriceCatalogEntry>,
    ) -> Result<Self, CatalogError> {
        let mut catalog = Self::default();
        for entry in entries {
            if catalog.get(&entry.sku).is_some() {
                return Err(CatalogError::DuplicateSku { sku: entry.sku });
            }
            catalog.entries.push(entry);
        }
        Ok(catalog)
    }

    /// Parses a provider price-list document of the form
    /// `{"products": {SKU: {"sku", "productFamily", "attributes": {...}}}}`.
    ///
    /// `attributes.instanceType` and `attributes.price` are required; every
    /// other attribute is kept as descriptive metadata.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError`] when the document is malformed or a product
    /// lacks a required attribute.
    pub fn from_offer_json(document: &str) -> Result<Self, CatalogError> {
        let offer: OfferDocument =
            serde_json::from_str(document).map_err(|err| CatalogError::Parse(err.to_string()))?;

        let mut entries = Vec::with_capacity(offer.products.len());
        for (key, product) in offer.products {
            let sku = product.sku.unwrap_or(key);
            let mut attributes = product.attributes;
            let instance_type =
                attributes
                    .remove("instanceType")
                    .ok_or_else(|| CatalogError::MissingAttribute {
                        sku: sku.clone(),
                        attribute: String::from("instanceType"),
                    })?;
            let raw_price =
                attributes
                    .remove("price")
                    .ok_or_else(|| CatalogError::MissingAttribute {
                        sku: sku.clone(),
                        attribute: String::from("price"),
                    })?;
            let price = raw_price.trim().parse::<Decimal>().map_err(|err| {
                CatalogError::Parse(format!("product {sku} has invalid price {raw_price}: {err}"))
            })?;
            entries.push(PriceCatalogEntry {
                sku,
                instance_type,
                price,
                product_family: product.product_family,
                attributes,
            });
        }
        Self::from_entries(entries)
    }

    /// Reads and parses a price-list document from disk.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Parse`] when the file cannot be read, and the
    /// errors of [`PriceCatalog::from_offer_json`] otherwise.
    pub fn from_offer_file(path: &Utf8Path) -> Result<Self, CatalogError> {
        let document = read_to_string_ambient(path)
            .map_err(|message| CatalogError::Parse(format!("{path}: {message}")))?;
        Self::from_offer_json(&document)
    }

    /// The stub driver's built-in catalog: one Windows `t2.small` product
    /// priced at `0.04` per hour.
    #[must_use]
    pub fn stub_default() -> Self {
        let attributes = [
            ("servicecode", "AmazonEC2"),
            ("location", "EU (Frankfurt)"),
            ("locationType", "AWS Region"),
            ("instanceFamily", "General purpose"),
            ("vcpu", "1"),
            ("memory", "2 GiB"),
            ("storage", "EBS only"),
            ("networkPerformance", "Low to Moderate"),
            ("tenancy", "Shared"),
            ("operatingSystem", "Windows"),
            ("licenseModel", "License Included"),
            ("usagetype", "EUC1-BoxUsage:t2.small"),
        ]
        .into_iter()
        .map(|(key, value)| (key.to_owned(), value.to_owned()))
        .collect();

        Self {
            entries: vec![PriceCatalogEntry {
                sku: STUB_SKU.to_owned(),
                instance_type: String::from("t2.small"),
                price: Decimal::new(4, 2),
                product_family: Some(String::from("Compute Instance")),
                attributes,
            }],
        }
    }

    /// Looks an entry up by SKU.
    #[must_use]
    pub fn get(&self, sku: &str) -> Option<&PriceCatalogEntry> {
        self.entries.iter().find(|entry| entry.sku == sku)
    }

    /// Returns the first entry, in insertion order, priced for
    /// `instance_type`.
    #[must_use]
    pub fn entry_for_instance_type(&self, instance_type: &str) -> Option<&PriceCatalogEntry> {
        self.entries
            .iter()
            .find(|entry| entry.instance_type == instance_type)
    }

    /// Iterates over all entries in insertion order.
    pub fn entries(&self) -> impl Iterator<Item = &PriceCatalogEntry> {
        self.entries.iter()
    }

    /// Number of products in the catalog.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when the catalog has no products.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
