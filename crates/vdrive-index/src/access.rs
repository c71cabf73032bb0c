//! Access control lists scoped to one index.
//!
//! Permissions and identities are opaque strings. Grant and revoke are
//! idempotent: granting twice or revoking something never granted succeeds.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use heed::Env;
use thiserror::Error;
use tracing::debug;

use crate::lmdb::AclDb;

#[derive(Error, Debug)]
pub enum AclError {
    #[error("LMDB error: {0}")]
    Heed(#[from] heed::Error),

    #[error("Invalid {field}: must not be empty")]
    Empty { field: &'static str },
}

pub type AclResult<T> = std::result::Result<T, AclError>;

pub trait AccessController: Send + Sync {
    fn grant(&self, permission: &str, identity: &str) -> AclResult<()>;

    fn revoke(&self, permission: &str, identity: &str) -> AclResult<()>;

    /// Identities holding `permission`, sorted.
    fn granted(&self, permission: &str) -> AclResult<Vec<String>>;
}

fn validate(permission: &str, identity: &str) -> AclResult<()> {
    if permission.is_empty() {
        return Err(AclError::Empty { field: "permission" });
    }
    if identity.is_empty() {
        return Err(AclError::Empty { field: "identity" });
    }
    Ok(())
}

/// ACLs persisted in the index's LMDB environment.
#[derive(Clone)]
pub struct LmdbAccessController {
    env: Env,
    acl_db: AclDb,
}

impl LmdbAccessController {
    pub(crate) fn new(env: Env, acl_db: AclDb) -> Self {
        Self { env, acl_db }
    }

    fn update(&self, permission: &str, f: impl FnOnce(&mut BTreeSet<String>)) -> AclResult<()> {
        let mut wtxn = self.env.write_txn()?;
        let mut identities = self.acl_db.get(&wtxn, permission)?.unwrap_or_default();
        f(&mut identities);
        if identities.is_empty() {
            self.acl_db.delete(&mut wtxn, permission)?;
        } else {
            self.acl_db.put(&mut wtxn, permission, &identities)?;
        }
        wtxn.commit()?;
        Ok(())
    }
}

impl AccessController for LmdbAccessController {
    fn grant(&self, permission: &str, identity: &str) -> AclResult<()> {
        validate(permission, identity)?;
        self.update(permission, |ids| {
            ids.insert(identity.to_string());
        })?;
        debug!(permission, identity, "Granted");
        Ok(())
    }

    fn revoke(&self, permission: &str, identity: &str) -> AclResult<()> {
        validate(permission, identity)?;
        self.update(permission, |ids| {
            ids.remove(identity);
        })?;
        debug!(permission, identity, "Revoked");
        Ok(())
    }

    fn granted(&self, permission: &str) -> AclResult<Vec<String>> {
        let rtxn = self.env.read_txn()?;
        Ok(self
            .acl_db
            .get(&rtxn, permission)?
            .map(|ids| ids.into_iter().collect())
            .unwrap_or_default())
    }
}

/// In-memory ACLs.
#[derive(Debug, Default)]
pub struct MemoryAccessController {
    acl: Mutex<BTreeMap<String, BTreeSet<String>>>,
}

impl MemoryAccessController {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_acl<T>(&self, f: impl FnOnce(&mut BTreeMap<String, BTreeSet<String>>) -> T) -> T {
        let mut acl = self.acl.lock().unwrap_or_else(|p| p.into_inner());
        f(&mut acl)
    }
}

impl AccessController for MemoryAccessController {
    fn grant(&self, permission: &str, identity: &str) -> AclResult<()> {
        validate(permission, identity)?;
        self.with_acl(|acl| {
            acl.entry(permission.to_string())
                .or_default()
                .insert(identity.to_string());
        });
        Ok(())
    }

    fn revoke(&self, permission: &str, identity: &str) -> AclResult<()> {
        validate(permission, identity)?;
        self.with_acl(|acl| {
            if let Some(ids) = acl.get_mut(permission) {
                ids.remove(identity);
                if ids.is_empty() {
                    acl.remove(permission);
                }
            }
        });
        Ok(())
    }

    fn granted(&self, permission: &str) -> AclResult<Vec<String>> {
        Ok(self.with_acl(|acl| {
            acl.get(permission)
                .map(|ids| ids.iter().cloned().collect())
                .unwrap_or_default()
        }))
    }
}
