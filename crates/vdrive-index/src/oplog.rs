//! Op log entries and snapshot dumps shared by the index backends.

use std::collections::BTreeMap;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::{IndexAddress, IndexError, Result};

/// One mutation in the append-only log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Op {
    Put { key: String, value: Vec<u8> },
    Delete { key: String },
}

impl Op {
    pub fn apply(&self, state: &DashMap<String, Vec<u8>>) {
        match self {
            Op::Put { key, value } => {
                state.insert(key.clone(), value.clone());
            }
            Op::Delete { key } => {
                state.remove(key);
            }
        }
    }
}

/// Full dump of an index view, stored as a content blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    pub address: String,
    /// Sequence number of the last op folded into `entries`.
    pub seq: u64,
    pub entries: Vec<(String, Vec<u8>)>,
}

impl Snapshot {
    pub const VERSION: u32 = 1;

    pub fn capture(address: &IndexAddress, seq: u64, state: &DashMap<String, Vec<u8>>) -> Self {
        let sorted: BTreeMap<String, Vec<u8>> = state
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        Self {
            version: Self::VERSION,
            address: address.to_string(),
            seq,
            entries: sorted.into_iter().collect(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Decode and check the dump belongs to `address`.
    pub fn decode(bytes: &[u8], address: &IndexAddress) -> Result<Self> {
        let snapshot: Snapshot = bincode::deserialize(bytes)
            .map_err(|e| IndexError::CorruptSnapshot(e.to_string()))?;
        if snapshot.version != Self::VERSION {
            return Err(IndexError::CorruptSnapshot(format!(
                "unsupported snapshot version {}",
                snapshot.version
            )));
        }
        if snapshot.address != address.to_string() {
            return Err(IndexError::CorruptSnapshot(format!(
                "snapshot belongs to {}, not {}",
                snapshot.address, address
            )));
        }
        Ok(snapshot)
    }

    /// Replace `state` with the dumped entries.
    pub fn restore_into(self, state: &DashMap<String, Vec<u8>>) {
        state.clear();
        for (key, value) in self.entries {
            state.insert(key, value);
        }
    }
}
