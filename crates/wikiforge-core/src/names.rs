//! Deterministic resource naming.
//!
//! Container, database, and domain names are pure functions of the tenant
//! slug and the allocated port, so teardown can re-derive every external
//! resource name from the instance record alone — no extra lookups.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Longest slug accepted. Keeps the derived DNS label and PostgreSQL
/// identifier under their respective 63-character limits with room for
/// the `wikisaas_db_` prefix.
pub const MAX_SLUG_LEN: usize = 40;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SlugError {
    #[error("slug must not be empty")]
    Empty,

    #[error("slug exceeds {MAX_SLUG_LEN} characters")]
    TooLong,

    #[error("slug may only contain lowercase letters, digits, and hyphens")]
    InvalidCharacter,

    #[error("slug must start and end with a letter or digit")]
    InvalidBoundary,
}

/// Validate a caller-supplied slug against the constraints of every
/// external system it is projected into (DNS label, PostgreSQL
/// identifier, container name).
pub fn validate_slug(slug: &str) -> Result<(), SlugError> {
    if slug.is_empty() {
        return Err(SlugError::Empty);
    }
    if slug.len() > MAX_SLUG_LEN {
        return Err(SlugError::TooLong);
    }
    if !slug
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(SlugError::InvalidCharacter);
    }
    if slug.starts_with('-') || slug.ends_with('-') {
        return Err(SlugError::InvalidBoundary);
    }
    Ok(())
}

/// The derived names for one instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceNames {
    pub container: String,
    pub database: String,
    pub domain: String,
}

impl InstanceNames {
    /// Derive all resource names from `(slug, port)`.
    ///
    /// The slug must already be validated; distinct `(slug, port)` pairs
    /// yield distinct names in every namespace.
    pub fn derive(slug: &str, port: u16, base_domain: &str) -> Self {
        Self {
            container: format!("wiki_{port}"),
            database: format!("wikisaas_db_{}", slug.replace('-', "_")),
            domain: format!("{slug}.{base_domain}"),
        }
    }
}
