//! StateStore — redb-backed persistence for relgrid records.
//!
//! Provides load-by-key, prefix listing and save-if-unchanged over every
//! record type, plus the two multi-record writes callers need to stay
//! atomic: registering a version together with its pending compatibility
//! matrix, and saving a rollout together with its active-rollout index
//! entry (and, optionally, an upgrade path registered on initiation).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, WriteTransaction};
use relgrid_core::{
    CompatibilityMatrix, Product, UpdateDetection, UpdateRollout, UpgradePath, Version,
    KEY_SEPARATOR, check_id, endpoint_key, path_key, version_key,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;

/// `map_err!(Read)` builds `|e| StateError::Read(e.to_string())`.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// A record the store can persist under save-if-unchanged semantics.
pub trait Record: Serialize + DeserializeOwned + Clone {
    /// Human-readable record kind, used in error messages.
    const KIND: &'static str;

    fn table() -> RecordTable;
    fn table_key(&self) -> String;
    /// The product and endpoint ids the key is built from.
    fn key_ids(&self) -> Vec<(&'static str, &str)>;
    fn revision(&self) -> u64;
    fn set_revision(&mut self, revision: u64);
}

macro_rules! impl_record {
    ($ty:ty, $kind:literal, $table:expr, |$r:ident| $key:expr, ids: [$($id:literal => $field:ident),*]) => {
        impl Record for $ty {
            const KIND: &'static str = $kind;

            fn table() -> RecordTable {
                $table
            }

            fn table_key(&self) -> String {
                let $r = self;
                $key
            }

            fn key_ids(&self) -> Vec<(&'static str, &str)> {
                vec![$(($id, self.$field.as_str())),*]
            }

            fn revision(&self) -> u64 {
                self.revision
            }

            fn set_revision(&mut self, revision: u64) {
                self.revision = revision;
            }
        }
    };
}

impl_record!(Product, "product", PRODUCTS, |r| r.id.clone(),
    ids: ["product" => id]);
impl_record!(Version, "version", VERSIONS, |r| r.table_key(),
    ids: ["product" => product_id]);
impl_record!(CompatibilityMatrix, "compatibility matrix", COMPATIBILITY, |r| r.table_key(),
    ids: ["product" => product_id]);
impl_record!(UpgradePath, "upgrade path", UPGRADE_PATHS, |r| r.table_key(),
    ids: ["product" => product_id]);
impl_record!(UpdateDetection, "update detection", DETECTIONS, |r| r.table_key(),
    ids: ["endpoint" => endpoint_id, "product" => product_id]);
impl_record!(UpdateRollout, "rollout", ROLLOUTS, |r| r.id.clone(),
    ids: ["endpoint" => endpoint_id, "product" => product_id]);

/// Release records in a single redb file. Cheap to clone; clones share
/// the database handle.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open the store at `path`, creating the file and tables on first use.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// A store that lives only as long as the handle.
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        for table in [
            PRODUCTS,
            VERSIONS,
            COMPATIBILITY,
            UPGRADE_PATHS,
            DETECTIONS,
            ROLLOUTS,
        ] {
            txn.open_table(table).map_err(map_err!(Table))?;
        }
        txn.open_table(ACTIVE_ROLLOUTS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Generic record access ──────────────────────────────────────

    /// Load a record by key.
    pub fn get<R: Record>(&self, key: &str) -> StateResult<Option<R>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(R::table()).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let record: R =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// List records whose key starts with `prefix` (all records for `""`).
    pub fn list<R: Record>(&self, prefix: &str) -> StateResult<Vec<R>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(R::table()).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(prefix) {
                let record: R =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.push(record);
            }
        }
        Ok(results)
    }

    /// Save-if-unchanged.
    ///
    /// Revision 0 inserts and fails with `Duplicate` if the key is taken;
    /// any other revision must match the stored one. Returns the record as
    /// stored, with its revision bumped.
    pub fn save<R: Record>(&self, record: &R) -> StateResult<R> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let saved = save_in(&txn, record)?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(saved)
    }

    // ── Products ───────────────────────────────────────────────────

    pub fn get_product(&self, product_id: &str) -> StateResult<Option<Product>> {
        self.get(product_id)
    }

    pub fn list_products(&self) -> StateResult<Vec<Product>> {
        self.list("")
    }

    // ── Versions & compatibility ───────────────────────────────────

    /// Insert a new version together with its pending compatibility matrix.
    pub fn register_version(
        &self,
        version: &Version,
    ) -> StateResult<(Version, CompatibilityMatrix)> {
        let matrix = CompatibilityMatrix::pending(&version.product_id, version.version_number.clone());
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let version = save_in(&txn, version)?;
        let matrix = save_in(&txn, &matrix)?;
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(key = %version.table_key(), "version registered");
        Ok((version, matrix))
    }

    /// Update a version, optionally together with its matrix, in one
    /// transaction. Both records are revision-checked.
    pub fn save_version(
        &self,
        version: &Version,
        matrix: Option<&CompatibilityMatrix>,
    ) -> StateResult<(Version, Option<CompatibilityMatrix>)> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let version = save_in(&txn, version)?;
        let matrix = match matrix {
            Some(matrix) => Some(save_in(&txn, matrix)?),
            None => None,
        };
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(
            key = %version.table_key(),
            with_matrix = matrix.is_some(),
            "version saved"
        );
        Ok((version, matrix))
    }

    pub fn get_version(
        &self,
        product_id: &str,
        number: &semver::Version,
    ) -> StateResult<Option<Version>> {
        self.get(&version_key(product_id, number))
    }

    /// All versions of a product, in ascending version order.
    pub fn list_versions(&self, product_id: &str) -> StateResult<Vec<Version>> {
        let mut versions: Vec<Version> = self.list(&format!("{product_id}{KEY_SEPARATOR}"))?;
        versions.sort_by(|a, b| {
            a.version_number
                .cmp_precedence(&b.version_number)
                .then_with(|| a.version_number.cmp(&b.version_number))
        });
        Ok(versions)
    }

    pub fn get_matrix(
        &self,
        product_id: &str,
        number: &semver::Version,
    ) -> StateResult<Option<CompatibilityMatrix>> {
        self.get(&version_key(product_id, number))
    }

    // ── Upgrade paths ──────────────────────────────────────────────

    pub fn get_path(
        &self,
        product_id: &str,
        from: &semver::Version,
        to: &semver::Version,
    ) -> StateResult<Option<UpgradePath>> {
        self.get(&path_key(product_id, from, to))
    }

    pub fn list_paths(&self, product_id: &str) -> StateResult<Vec<UpgradePath>> {
        self.list(&format!("{product_id}{KEY_SEPARATOR}"))
    }

    // ── Detections ─────────────────────────────────────────────────

    pub fn get_detection(
        &self,
        endpoint_id: &str,
        product_id: &str,
    ) -> StateResult<Option<UpdateDetection>> {
        self.get(&endpoint_key(endpoint_id, product_id))
    }

    /// Remove a detection once the endpoint is up to date. Returns true if
    /// it existed.
    pub fn delete_detection(&self, endpoint_id: &str, product_id: &str) -> StateResult<bool> {
        let key = endpoint_key(endpoint_id, product_id);
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(DETECTIONS).map_err(map_err!(Table))?;
            existed = table.remove(key.as_str()).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, existed, "detection deleted");
        Ok(existed)
    }

    // ── Rollouts ───────────────────────────────────────────────────

    pub fn get_rollout(&self, rollout_id: &str) -> StateResult<Option<UpdateRollout>> {
        self.get(rollout_id)
    }

    pub fn list_rollouts(&self) -> StateResult<Vec<UpdateRollout>> {
        self.list("")
    }

    /// The non-terminal rollout occupying (endpoint, product), if any.
    pub fn active_rollout(
        &self,
        endpoint_id: &str,
        product_id: &str,
    ) -> StateResult<Option<UpdateRollout>> {
        let key = endpoint_key(endpoint_id, product_id);
        let rollout_id = {
            let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
            let table = txn.open_table(ACTIVE_ROLLOUTS).map_err(map_err!(Table))?;
            match table.get(key.as_str()).map_err(map_err!(Read))? {
                Some(guard) => guard.value().to_string(),
                None => return Ok(None),
            }
        };
        self.get_rollout(&rollout_id)
    }

    /// Save a rollout and maintain the active-rollout index in one
    /// transaction, optionally together with an upgrade path.
    ///
    /// A non-terminal rollout claims its (endpoint, product) slot and fails
    /// with `ActiveRolloutExists` if another rollout holds it. A terminal
    /// rollout releases the slot.
    pub fn save_rollout(
        &self,
        rollout: &UpdateRollout,
        path: Option<&UpgradePath>,
    ) -> StateResult<UpdateRollout> {
        check_key_ids(rollout, &rollout.id)?;
        let active_key = rollout.active_key();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut active = txn.open_table(ACTIVE_ROLLOUTS).map_err(map_err!(Table))?;
            let holder = active
                .get(active_key.as_str())
                .map_err(map_err!(Read))?
                .map(|guard| guard.value().to_string());

            if rollout.status.is_terminal() {
                if holder.as_deref() == Some(rollout.id.as_str()) {
                    active.remove(active_key.as_str()).map_err(map_err!(Write))?;
                }
            } else {
                match holder {
                    Some(rollout_id) if rollout_id != rollout.id => {
                        return Err(StateError::ActiveRolloutExists {
                            key: active_key,
                            rollout_id,
                        });
                    }
                    _ => {
                        active
                            .insert(active_key.as_str(), rollout.id.as_str())
                            .map_err(map_err!(Write))?;
                    }
                }
            }
        }
        let saved = save_in(&txn, rollout)?;
        if let Some(path) = path {
            save_in(&txn, path)?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(
            rollout = %saved.id,
            status = %saved.status,
            revision = saved.revision,
            "rollout stored"
        );
        Ok(saved)
    }
}

fn check_key_ids<R: Record>(record: &R, key: &str) -> StateResult<()> {
    for (id_kind, id) in record.key_ids() {
        check_id(id_kind, id).map_err(|source| StateError::InvalidKey {
            kind: R::KIND,
            key: key.to_string(),
            source,
        })?;
    }
    Ok(())
}

/// Save-if-unchanged inside an open write transaction.
fn save_in<R: Record>(txn: &WriteTransaction, record: &R) -> StateResult<R> {
    let key = record.table_key();
    check_key_ids(record, &key)?;
    let mut table = txn.open_table(R::table()).map_err(map_err!(Table))?;
    let stored: Option<R> = match table.get(key.as_str()).map_err(map_err!(Read))? {
        Some(guard) => Some(serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?),
        None => None,
    };

    let expected = record.revision();
    match (&stored, expected) {
        (None, 0) => {}
        (None, _) => return Err(StateError::NotFound(format!("{} {key}", R::KIND))),
        (Some(_), 0) => return Err(StateError::Duplicate(format!("{} {key}", R::KIND))),
        (Some(current), expected) if current.revision() != expected => {
            return Err(StateError::Conflict {
                key,
                expected,
                found: current.revision(),
            });
        }
        _ => {}
    }

    let mut saved = record.clone();
    saved.set_revision(expected + 1);
    let value = serde_json::to_vec(&saved).map_err(map_err!(Serialize))?;
    table
        .insert(key.as_str(), value.as_slice())
        .map_err(map_err!(Write))?;
    debug!(kind = R::KIND, %key, revision = expected + 1, "record stored");
    Ok(saved)
}
