//! Index naming.
//!
//! A fully qualified address has the form `/vdrive/<hash>/<name>` where `<hash>`
//! is the BLAKE3 digest of the store type and name. Human-readable names are
//! turned into addresses deterministically, so every node that opens the same
//! name agrees on the address without coordination.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{IndexError, Result};

/// Store type mixed into the address hash.
const STORE_TYPE: &str = "keyvalue";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexAddress {
    hash: String,
    name: String,
}

impl IndexAddress {
    pub const PREFIX: &'static str = "/vdrive/";

    /// Derive the address for a human-readable drive name.
    pub fn determine(name: &str) -> Result<Self> {
        validate_name(name)?;
        let digest = blake3::hash(format!("{STORE_TYPE}/{name}").as_bytes());
        Ok(Self {
            hash: digest.to_hex().to_string(),
            name: name.to_string(),
        })
    }

    /// Parse a fully qualified `/vdrive/<hash>/<name>` address.
    pub fn parse(address: &str) -> Result<Self> {
        let rest = address
            .strip_prefix(Self::PREFIX)
            .ok_or_else(|| IndexError::InvalidAddress(address.to_string()))?;
        let (hash, name) = rest
            .split_once('/')
            .ok_or_else(|| IndexError::InvalidAddress(address.to_string()))?;

        if hash.len() != 64 || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(IndexError::InvalidAddress(address.to_string()));
        }
        validate_name(name).map_err(|_| IndexError::InvalidAddress(address.to_string()))?;

        Ok(Self {
            hash: hash.to_ascii_lowercase(),
            name: name.to_string(),
        })
    }

    /// Accept either a fully qualified address or a plain name.
    pub fn resolve(name_or_address: &str) -> Result<Self> {
        if name_or_address.starts_with(Self::PREFIX) {
            Self::parse(name_or_address)
        } else {
            Self::determine(name_or_address)
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Directory of this index below an index root.
    pub fn local_path(&self, root: impl Into<PathBuf>) -> PathBuf {
        root.into().join(&self.hash).join(&self.name)
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains('/') || name == "." || name == ".." {
        return Err(IndexError::InvalidAddress(name.to_string()));
    }
    Ok(())
}

impl fmt::Display for IndexAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}/{}", Self::PREFIX, self.hash, self.name)
    }
}

impl FromStr for IndexAddress {
    type Err = IndexError;

    fn from_str(s: &str) -> Result<Self> {
        Self::resolve(s)
    }
}
