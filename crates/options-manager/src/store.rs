//! Position persistence for surviving restarts.
//!
//! The whole position set is written as one JSON document under a fixed key
//! of a [`BlobStore`]:
//!
//! ```json
//! { "12": { "order_id": 12, "order_tag": "IronCondor-12", "strategy_kind": "IronCondor", ... } }
//! ```
//!
//! Loading is best effort. Records with an unknown strategy kind or that fail
//! to parse or break a position invariant are skipped, fields the current
//! schema does not know are dropped with a warning naming their path,
//! and a document that cannot be read at all yields an empty registry. The
//! open index is rebuilt from each record's data, never from a stored flag.

use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{Duration, NaiveDate};
use legwork_core::StoreConfig;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::error::StoreError;
use crate::position::Position;
use crate::registry::PositionRegistry;
use crate::strategy::StrategyRegistry;

/// Durable key-value storage with atomic whole-blob writes.
pub trait BlobStore {
    /// Replaces the blob under `key`. Readers see either the old or the new bytes.
    ///
    /// # Errors
    ///
    /// Backend failures.
    fn save(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError>;

    /// Returns `None` when nothing was ever saved under `key`.
    ///
    /// # Errors
    ///
    /// Backend failures.
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;
}

/// Blobs as files in one directory. Writes go to a temp file that is renamed over the target.
#[derive(Debug, Clone)]
pub struct FileBlobStore {
    dir: PathBuf,
}

impl FileBlobStore {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl BlobStore for FileBlobStore {
    fn save(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir)?;
        let target = self.dir.join(key);
        let tmp = self.dir.join(format!(".{key}.tmp"));
        let mut file = File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&tmp, &target)?;
        debug!(path = %target.display(), bytes = bytes.len(), "Saved blob");
        Ok(())
    }

    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        match fs::read(self.dir.join(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-process blob store for tests and hosts that persist elsewhere.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlobStore for MemoryBlobStore {
    fn save(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        self.blobs
            .lock()
            .map_err(|e| StoreError::Blob(e.to_string()))?
            .insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self
            .blobs
            .lock()
            .map_err(|e| StoreError::Blob(e.to_string()))?
            .get(key)
            .cloned())
    }
}

/// Snapshots and restores the full position set.
#[derive(Debug)]
pub struct PositionStore<B> {
    blob: B,
    key: String,
    retention_days: Option<u32>,
}

impl PositionStore<FileBlobStore> {
    /// File-backed store at `config.dir/config.key`.
    #[must_use]
    pub fn from_config(config: &StoreConfig) -> Self {
        Self::new(FileBlobStore::new(&config.dir), &config.key).with_retention(config.retention_days)
    }
}

impl<B: BlobStore> PositionStore<B> {
    #[must_use]
    pub fn new(blob: B, key: impl Into<String>) -> Self {
        Self {
            blob,
            key: key.into(),
            retention_days: None,
        }
    }

    /// Terminal positions closed more than `days` ago are purged on every store.
    #[must_use]
    pub fn with_retention(mut self, days: Option<u32>) -> Self {
        self.retention_days = days;
        self
    }

    #[must_use]
    pub fn blob(&self) -> &B {
        &self.blob
    }

    /// Writes every position in `registry`, after applying the retention policy.
    ///
    /// # Errors
    ///
    /// Serialization or blob store failures. Nothing is written on error.
    pub fn store(&self, registry: &mut PositionRegistry, today: NaiveDate) -> Result<usize, StoreError> {
        if let Some(days) = self.retention_days {
            registry.purge_closed(today - Duration::days(i64::from(days)));
        }

        let document: BTreeMap<String, &Position> = registry
            .positions()
            .map(|position| (position.order_id.to_string(), position))
            .collect();
        let bytes = serde_json::to_vec_pretty(&document)?;
        self.blob.save(&self.key, &bytes)?;

        info!(
            key = self.key,
            positions = document.len(),
            open = registry.open_len(),
            "Saved positions"
        );
        Ok(document.len())
    }

    /// Restores the position set. Never fails: an unreadable document is logged
    /// and an empty registry returned.
    #[must_use]
    pub fn load(&self, strategies: &StrategyRegistry, today: NaiveDate) -> PositionRegistry {
        match self.try_load(strategies, today) {
            Ok(registry) => registry,
            Err(e) => {
                error!(key = self.key, error = %e, "Failed to load positions, starting fresh");
                PositionRegistry::new()
            }
        }
    }

    /// Like [`PositionStore::load`] but surfaces document-level failures.
    ///
    /// # Errors
    ///
    /// Blob store failures, or a document that is not a JSON object.
    pub fn try_load(&self, strategies: &StrategyRegistry, today: NaiveDate) -> Result<PositionRegistry, StoreError> {
        let mut registry = PositionRegistry::new();
        let Some(bytes) = self.blob.read(&self.key)? else {
            info!(key = self.key, "No persisted positions found, starting fresh");
            return Ok(registry);
        };

        let document: BTreeMap<String, Value> = serde_json::from_slice(&bytes)?;
        let mut skipped = 0usize;
        for (key, record) in document {
            let Some(position) = restore_record(&key, record, strategies) else {
                skipped += 1;
                continue;
            };
            let open = is_open_at(&position, today);
            if let Err(e) = registry.insert_indexed(position, open) {
                warn!(key, error = %e, "Skipping conflicting position record");
                skipped += 1;
            }
        }

        info!(
            key = self.key,
            positions = registry.len(),
            open = registry.open_len(),
            skipped,
            "Loaded persisted positions"
        );
        Ok(registry)
    }
}

/// A restored position is open only with a future expiry and an unfilled close order.
fn is_open_at(position: &Position, today: NaiveDate) -> bool {
    position.expiry > today && !position.close_order.filled && !position.state.is_terminal()
}

fn restore_record(key: &str, record: Value, strategies: &StrategyRegistry) -> Option<Position> {
    let Ok(order_id) = key.parse::<u64>() else {
        warn!(key, "Skipping record with a non-numeric order id");
        return None;
    };
    let Some(tag) = record.get("strategy_kind").and_then(Value::as_str) else {
        warn!(order_id, "Skipping record without a strategy kind");
        return None;
    };
    if strategies.resolve(tag).is_none() {
        warn!(order_id, strategy_kind = tag, "Skipping record for an unknown strategy");
        return None;
    }

    let stored = record.clone();
    let position: Position = match serde_json::from_value(record) {
        Ok(position) => position,
        Err(e) => {
            warn!(order_id, error = %e, "Skipping unreadable position record");
            return None;
        }
    };
    if position.order_id != order_id {
        warn!(key, order_id = position.order_id, "Skipping record filed under the wrong order id");
        return None;
    }

    if let Err(e) = position.validate() {
        warn!(order_id, error = %e, "Skipping invalid position record");
        return None;
    }

    if let Ok(known) = serde_json::to_value(&position) {
        let mut dropped = Vec::new();
        unknown_fields(&stored, &known, "", &mut dropped);
        if !dropped.is_empty() {
            warn!(order_id, fields = ?dropped, "Dropping unrecognized position fields");
        }
    }
    Some(position)
}

/// Collects dotted paths of keys in `stored` that do not survive a round trip.
fn unknown_fields(stored: &Value, known: &Value, path: &str, dropped: &mut Vec<String>) {
    match (stored, known) {
        (Value::Object(stored), Value::Object(known)) => {
            for (field, value) in stored {
                let field_path = if path.is_empty() {
                    field.clone()
                } else {
                    format!("{path}.{field}")
                };
                match known.get(field) {
                    Some(known_value) => unknown_fields(value, known_value, &field_path, dropped),
                    None => dropped.push(field_path),
                }
            }
        }
        (Value::Array(stored), Value::Array(known)) => {
            for (index, (value, known_value)) in stored.iter().zip(known).enumerate() {
                unknown_fields(value, known_value, &format!("{path}[{index}]"), dropped);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::fixtures::{at, opened_put_credit_spread, put_credit_spread};
    use crate::position::{CloseRequest, PositionState};
    use crate::strategy::StrategyKind;
    use legwork_core::StrategyConfig;
    use rust_decimal_macros::dec;
    use tempfile::TempDir;

    fn strategies() -> StrategyRegistry {
        StrategyRegistry::new().with(StrategyKind::PutCreditSpread, StrategyConfig::default())
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 22).unwrap()
    }

    fn closing(order_id: u64) -> Position {
        let mut position = opened_put_credit_spread(order_id);
        position
            .submit_close(CloseRequest {
                reasons: vec!["Profit target".to_string()],
                limit_price: Some(dec!(-0.40)),
                mid_price: dec!(-0.40),
                bid_ask_spread: dec!(0.10),
                close_dte: 18,
                dit: 8,
                time: at(2024, 1, 18, 10, 0),
            })
            .unwrap();
        position
    }

    fn make_registry() -> PositionRegistry {
        let mut registry = PositionRegistry::new();
        registry.insert(opened_put_credit_spread(1)).unwrap();
        registry.insert(put_credit_spread(2)).unwrap();
        registry.insert(closing(3)).unwrap();
        registry
    }

    #[test]
    fn roundtrip_reproduces_every_field() {
        let dir = TempDir::new().unwrap();
        let store = PositionStore::new(FileBlobStore::new(dir.path()), "positions.json");
        let mut registry = make_registry();
        assert_eq!(store.store(&mut registry, today()).unwrap(), 3);

        let loaded = store.load(&strategies(), today());
        assert_eq!(loaded.len(), 3);
        for position in registry.positions() {
            assert_eq!(loaded.get(position.order_id), Some(position));
        }
        assert_eq!(loaded.open_len(), 3);
    }

    #[test]
    fn next_order_id_continues_after_load() {
        let store = PositionStore::new(MemoryBlobStore::new(), "positions.json");
        store.store(&mut make_registry(), today()).unwrap();
        let mut loaded = store.load(&strategies(), today());
        assert_eq!(loaded.next_order_id(), 4);
    }

    #[test]
    fn missing_document_starts_fresh() {
        let dir = TempDir::new().unwrap();
        let store = PositionStore::new(FileBlobStore::new(dir.path().join("absent")), "positions.json");
        assert!(store.load(&strategies(), today()).is_empty());
    }

    #[test]
    fn corrupt_document_starts_fresh() {
        let blob = MemoryBlobStore::new();
        blob.save("positions.json", b"{ not json").unwrap();
        let store = PositionStore::new(blob, "positions.json");
        assert!(matches!(
            store.try_load(&strategies(), today()),
            Err(StoreError::Json(_))
        ));
        assert!(store.load(&strategies(), today()).is_empty());
    }

    #[test]
    fn past_expiry_and_filled_close_are_not_reopened() {
        let mut expired = opened_put_credit_spread(1);
        expired.expiry = NaiveDate::from_ymd_opt(2024, 1, 19).unwrap();

        let mut closed = closing(2);
        closed.close_order.filled = true;
        // state left as CloseSubmitted: the filled flag alone must keep it out

        let mut registry = PositionRegistry::new();
        registry.insert(expired).unwrap();
        registry.insert(closed).unwrap();
        registry.insert(opened_put_credit_spread(3)).unwrap();

        let store = PositionStore::new(MemoryBlobStore::new(), "positions.json");
        store.store(&mut registry, today()).unwrap();
        let loaded = store.load(&strategies(), today());
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded.open_tags(), vec!["PutCreditSpread-3".to_string()]);
    }

    #[test]
    fn unknown_strategy_and_bad_records_are_skipped() {
        let store = PositionStore::new(MemoryBlobStore::new(), "positions.json");
        let mut registry = PositionRegistry::new();
        registry.insert(opened_put_credit_spread(1)).unwrap();
        let mut condor = opened_put_credit_spread(2);
        condor.strategy = StrategyKind::IronCondor;
        condor.order_tag = "IronCondor-2".to_string();
        registry.insert(condor).unwrap();
        store.store(&mut registry, today()).unwrap();

        let bytes = store.blob().read("positions.json").unwrap().unwrap();
        let mut document: BTreeMap<String, Value> = serde_json::from_slice(&bytes).unwrap();
        document.insert("3".to_string(), serde_json::json!({ "strategy_kind": "PutCreditSpread" }));
        document.insert("x".to_string(), serde_json::json!({ "strategy_kind": "PutCreditSpread" }));
        store
            .blob()
            .save("positions.json", &serde_json::to_vec(&document).unwrap())
            .unwrap();

        let loaded = store.load(&strategies(), today());
        assert_eq!(loaded.len(), 1);
        assert!(loaded.get(1).is_some());
    }

    #[test]
    fn unrecognized_fields_are_dropped() {
        let store = PositionStore::new(MemoryBlobStore::new(), "positions.json");
        let mut registry = PositionRegistry::new();
        registry.insert(opened_put_credit_spread(1)).unwrap();
        store.store(&mut registry, today()).unwrap();

        let bytes = store.blob().read("positions.json").unwrap().unwrap();
        let mut document: BTreeMap<String, Value> = serde_json::from_slice(&bytes).unwrap();
        let record = document.get_mut("1").and_then(Value::as_object_mut).unwrap();
        record.insert("greeks_snapshot".to_string(), serde_json::json!({ "delta": -0.12 }));
        record.remove("pnl_min_dit");
        store
            .blob()
            .save("positions.json", &serde_json::to_vec(&document).unwrap())
            .unwrap();

        let loaded = store.load(&strategies(), today());
        let position = loaded.get(1).unwrap();
        assert_eq!(position, registry.get(1).unwrap());
    }

    fn rewrite_record(
        store: &PositionStore<MemoryBlobStore>,
        key: &str,
        edit: impl FnOnce(&mut serde_json::Map<String, Value>),
    ) {
        let bytes = store.blob().read("positions.json").unwrap().unwrap();
        let mut document: BTreeMap<String, Value> = serde_json::from_slice(&bytes).unwrap();
        edit(document.get_mut(key).and_then(Value::as_object_mut).unwrap());
        store
            .blob()
            .save("positions.json", &serde_json::to_vec(&document).unwrap())
            .unwrap();
    }

    #[test]
    fn records_breaking_position_invariants_are_skipped() {
        let store = PositionStore::new(MemoryBlobStore::new(), "positions.json");
        let mut registry = PositionRegistry::new();
        registry.insert(opened_put_credit_spread(1)).unwrap();
        registry.insert(opened_put_credit_spread(2)).unwrap();
        registry.insert(opened_put_credit_spread(3)).unwrap();
        store.store(&mut registry, today()).unwrap();

        rewrite_record(&store, "1", |record| {
            record.insert("quantity".to_string(), serde_json::json!(0));
        });
        rewrite_record(&store, "2", |record| {
            let legs = record.get_mut("legs").and_then(Value::as_array_mut).unwrap();
            legs[0]["multiplier"] = serde_json::json!("0");
        });

        let loaded = store.load(&strategies(), today());
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.open_tags(), vec!["PutCreditSpread-3".to_string()]);
    }

    #[test]
    fn record_without_thresholds_loads_with_defaults() {
        let store = PositionStore::new(MemoryBlobStore::new(), "positions.json");
        let mut registry = PositionRegistry::new();
        registry.insert(opened_put_credit_spread(1)).unwrap();
        store.store(&mut registry, today()).unwrap();
        rewrite_record(&store, "1", |record| {
            record.remove("thresholds");
        });

        let loaded = store.load(&strategies(), today());
        let position = loaded.get(1).unwrap();
        assert_eq!(position.thresholds, legwork_core::RiskThresholds::default());
        assert!(loaded.is_open("PutCreditSpread-1"));
    }

    #[test]
    fn nested_unrecognized_fields_are_reported_by_path() {
        let position = opened_put_credit_spread(1);
        let known = serde_json::to_value(&position).unwrap();
        let mut stored = known.clone();
        stored["open_order"]["broker_ref"] = serde_json::json!("A-17");
        stored["legs"][1]["delta"] = serde_json::json!(0.08);
        stored["thresholds"]["trail_stop"] = serde_json::json!(true);
        stored["venue"] = serde_json::json!("CBOE");

        let mut dropped = Vec::new();
        unknown_fields(&stored, &known, "", &mut dropped);
        assert_eq!(
            dropped,
            vec![
                "legs[1].delta".to_string(),
                "open_order.broker_ref".to_string(),
                "thresholds.trail_stop".to_string(),
                "venue".to_string(),
            ]
        );

        let restored = restore_record("1", stored, &strategies()).unwrap();
        assert_eq!(restored, position);
    }

    #[test]
    fn retention_purges_old_terminal_positions() {
        let mut old = opened_put_credit_spread(1);
        old.expire(at(2023, 12, 1, 16, 0));
        assert_eq!(old.state, PositionState::Expired);

        let mut registry = PositionRegistry::new();
        registry.insert(old).unwrap();
        registry.insert(opened_put_credit_spread(2)).unwrap();

        let store = PositionStore::new(MemoryBlobStore::new(), "positions.json").with_retention(Some(30));
        assert_eq!(store.store(&mut registry, today()).unwrap(), 1);
        assert!(registry.get(1).is_none());
    }

    #[test]
    fn file_store_leaves_no_temp_file() {
        let dir = TempDir::new().unwrap();
        let blob = FileBlobStore::new(dir.path());
        blob.save("positions.json", b"{}").unwrap();
        blob.save("positions.json", b"{\"a\":1}").unwrap();
        assert_eq!(blob.read("positions.json").unwrap(), Some(b"{\"a\":1}".to_vec()));
        assert!(!dir.path().join(".positions.json.tmp").exists());
    }
}
