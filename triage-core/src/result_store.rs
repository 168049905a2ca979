//! ResultStore – bounded, newest-first history of diagnosis results kept in a
//! [`KeyValueStorage`].
//!
//! The whole history lives as one JSON array under [`STORAGE_KEY`]. Every
//! mutating call is a full read → modify → write of that array, truncated to
//! [`MAX_RESULTS`] entries.
//!
//! ## Failure model
//! No method here returns a storage error:
//! * unreadable or malformed payloads read as an empty history;
//! * a write refused for quota reasons is retried once after dropping the
//!   older half of the history;
//! * any other write failure is logged and swallowed.
//!
//! Only [`ResultStore::import_from_json`] reports failure, as a `bool`.
//!
//! ## Concurrency
//! Two writers sharing the same backing storage race at the granularity of
//! the whole array: last write wins.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, error, info, warn};

use crate::{
    error::{StorageError, StorageResult},
    models::DiagnosisResult,
    storage::KeyValueStorage,
};

pub const STORAGE_KEY: &str = "pneumonia_diagnosis_results";
pub const MAX_RESULTS: usize = 50;
pub const EXPORT_VERSION: &str = "1.0";

/// Envelope produced by [`ResultStore::export_as_json`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultExport {
    pub export_date: String,
    pub version: String,
    pub total_results: usize,
    pub results: Vec<DiagnosisResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageInfo {
    pub count: usize,
    pub size_bytes: usize,
    /// Kibibytes, two decimals.
    pub size_kb: String,
    pub max_results: usize,
}

#[derive(Clone)]
pub struct ResultStore {
    storage: Arc<dyn KeyValueStorage>,
    last_id: Arc<AtomicU64>,
}

impl ResultStore {
    pub fn new(storage: Arc<dyn KeyValueStorage>) -> Self {
        Self {
            storage,
            last_id: Arc::new(AtomicU64::new(0)),
        }
    }

    /// All stored results, newest first. Empty if nothing is stored or the
    /// payload cannot be read.
    pub fn get_all(&self) -> Vec<DiagnosisResult> {
        let raw = match self.storage.get(STORAGE_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(e) => {
                error!("Error reading stored results: {}", e);
                return Vec::new();
            }
        };

        match serde_json::from_str::<Vec<DiagnosisResult>>(&raw) {
            Ok(results) => results,
            Err(e) => {
                warn!("Ignoring malformed stored results: {}", e);
                Vec::new()
            }
        }
    }

    /// Prepend `result` to the history, assigning an id and timestamp when
    /// missing. Returns the result as stored.
    ///
    /// Every save prepends, even when the id already exists; only import
    /// deduplicates.
    pub fn save(&self, mut result: DiagnosisResult) -> DiagnosisResult {
        if result.id.is_none() {
            result.id = Some(self.next_id());
        }
        if result.timestamp.is_none() {
            result.timestamp = Some(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true));
        }
        let id = result.id.clone().unwrap_or_default();

        let existing = self.get_all();
        let mut updated = Vec::with_capacity(existing.len() + 1);
        updated.push(result.clone());
        updated.extend(existing.iter().cloned());
        updated.truncate(MAX_RESULTS);

        match self.persist(&updated) {
            Ok(()) => info!("Result saved successfully: {}", id),
            Err(StorageError::QuotaExceeded { needed, available }) => {
                warn!(
                    "Storage full ({} bytes needed, {} available), dropping older results",
                    needed, available
                );
                let mut reduced = Vec::with_capacity(MAX_RESULTS / 2 + 1);
                reduced.push(result.clone());
                reduced.extend(existing.into_iter().take(MAX_RESULTS / 2));

                match self.persist(&reduced) {
                    Ok(()) => info!(
                        "Saved result {} after clearing storage ({} kept)",
                        id,
                        reduced.len()
                    ),
                    Err(e) => error!("Failed to save even after clearing storage: {}", e),
                }
            }
            Err(e) => error!("Error saving result {}: {}", id, e),
        }

        result
    }

    /// Remove every entry with this id. No-op when absent.
    pub fn remove(&self, id: &str) {
        let mut results = self.get_all();
        let before = results.len();
        results.retain(|result| result.id.as_deref() != Some(id));

        if results.len() == before {
            debug!("No stored result with id {}", id);
            return;
        }

        match self.persist(&results) {
            Ok(()) => info!("Result removed successfully: {}", id),
            Err(e) => error!("Error removing result {}: {}", id, e),
        }
    }

    pub fn clear_all(&self) {
        match self.storage.remove(STORAGE_KEY) {
            Ok(()) => info!("All results cleared successfully"),
            Err(e) => error!("Error clearing results: {}", e),
        }
    }

    pub fn export(&self) -> ResultExport {
        let results = self.get_all();
        ResultExport {
            export_date: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            version: EXPORT_VERSION.to_string(),
            total_results: results.len(),
            results,
        }
    }

    /// Pretty-printed [`ResultExport`] of the current history.
    pub fn export_as_json(&self) -> String {
        let export = self.export();
        serde_json::to_string_pretty(&export).unwrap_or_else(|e| {
            error!("Error exporting results: {}", e);
            String::new()
        })
    }

    /// Merge an export produced by [`export_as_json`](Self::export_as_json)
    /// into the history. Imported entries go first and win over existing
    /// entries with the same id.
    ///
    /// Returns `false`, leaving the history untouched, when the text is not
    /// an envelope with a valid `results` array or the merged history cannot
    /// be written.
    pub fn import_from_json(&self, text: &str) -> bool {
        let imported = match parse_import(text) {
            Ok(imported) => imported,
            Err(e) => {
                warn!("Error importing results: {}", e);
                return false;
            }
        };
        let imported_count = imported.len();

        let mut merged = imported;
        merged.extend(self.get_all());

        let mut seen = HashSet::new();
        merged.retain(|result| seen.insert(result.id.clone()));
        merged.truncate(MAX_RESULTS);

        match self.persist(&merged) {
            Ok(()) => {
                info!("Imported {} results successfully", imported_count);
                true
            }
            Err(e) => {
                error!("Error importing results: {}", e);
                false
            }
        }
    }

    pub fn storage_info(&self) -> StorageInfo {
        let size_bytes = match self.storage.get(STORAGE_KEY) {
            Ok(raw) => raw.map(|raw| raw.len()).unwrap_or(0),
            Err(e) => {
                error!("Error getting storage info: {}", e);
                0
            }
        };

        StorageInfo {
            count: self.get_all().len(),
            size_bytes,
            size_kb: format!("{:.2}", size_bytes as f64 / 1024.0),
            max_results: MAX_RESULTS,
        }
    }

    fn persist(&self, results: &[DiagnosisResult]) -> StorageResult<()> {
        let serialized = serde_json::to_string(results)?;
        self.storage.set(STORAGE_KEY, &serialized)
    }

    /// Current time in milliseconds, bumped past the last id handed out so
    /// saves within the same millisecond still get distinct ids.
    fn next_id(&self) -> String {
        let now = u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0);
        let mut last = self.last_id.load(Ordering::Relaxed);
        loop {
            let candidate = now.max(last + 1);
            match self.last_id.compare_exchange_weak(
                last,
                candidate,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return candidate.to_string(),
                Err(actual) => last = actual,
            }
        }
    }
}

/// Only `results` matters on import; everything else in the envelope is
/// ignored. The top level must be an object.
fn parse_import(text: &str) -> Result<Vec<DiagnosisResult>, String> {
    let value: Value = serde_json::from_str(text).map_err(|e| e.to_string())?;
    match value.get("results") {
        Some(results @ Value::Array(_)) => {
            Vec::<DiagnosisResult>::deserialize(results).map_err(|e| e.to_string())
        }
        Some(_) => Err("`results` is not an array".to_string()),
        None => Err("missing `results` array".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Classification;
    use crate::storage::InMemoryStorage;

    fn store() -> (ResultStore, InMemoryStorage) {
        let storage = InMemoryStorage::new();
        (ResultStore::new(Arc::new(storage.clone())), storage)
    }

    fn result(confidence: f64) -> DiagnosisResult {
        DiagnosisResult::new(Classification::Normal, confidence)
    }

    #[test]
    fn test_save_orders_newest_first() {
        let (store, _) = store();
        store.save(result(92.0));
        store.save(result(70.0));
        store.save(result(85.0));

        let all = store.get_all();
        let confidences: Vec<f64> = all.iter().map(|r| r.confidence).collect();
        assert_eq!(confidences, vec![85.0, 70.0, 92.0]);

        for stored in &all {
            let id = stored.id.as_deref().unwrap();
            assert!(id.parse::<u64>().is_ok());
            let timestamp = stored.timestamp.as_deref().unwrap();
            assert!(chrono::DateTime::parse_from_rfc3339(timestamp).is_ok());
        }

        let ids: HashSet<_> = all.iter().map(|r| r.id.clone()).collect();
        assert_eq!(ids.len(), 3);
    }

    #[test]
    fn test_save_keeps_caller_id_and_timestamp() {
        let (store, _) = store();
        let mut input = result(50.0).with_id("custom");
        input.timestamp = Some("2024-01-01T00:00:00.000Z".to_string());

        let saved = store.save(input.clone());
        assert_eq!(saved, input);
        assert_eq!(store.get_all(), vec![input]);
    }

    #[test]
    fn test_repeated_id_is_prepended_again() {
        let (store, _) = store();
        store.save(result(10.0).with_id("same"));
        store.save(result(20.0).with_id("same"));

        let all = store.get_all();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].confidence, 20.0);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let (store, _) = store();
        for i in 0..51 {
            store.save(result(i as f64).with_id(format!("r{}", i)));
        }

        let all = store.get_all();
        assert_eq!(all.len(), MAX_RESULTS);
        assert_eq!(all[0].id.as_deref(), Some("r50"));
        assert!(all.iter().all(|r| r.id.as_deref() != Some("r0")));
    }

    #[test]
    fn test_malformed_payload_reads_empty() {
        let (store, storage) = store();
        storage.set(STORAGE_KEY, "{ definitely not json").unwrap();
        assert!(store.get_all().is_empty());

        storage.set(STORAGE_KEY, r#"{"results": []}"#).unwrap();
        assert!(store.get_all().is_empty());

        // a save over a corrupt payload starts a fresh history
        store.save(result(1.0));
        assert_eq!(store.get_all().len(), 1);
    }

    #[test]
    fn test_quota_recovery_keeps_newer_half() {
        let (seed_store, seed_storage) = store();
        for i in 0..MAX_RESULTS {
            seed_store.save(result(i as f64).with_id(format!("r{}", i)));
        }
        let full_payload = seed_storage.get(STORAGE_KEY).unwrap().unwrap();

        // room for the current history but not for one more entry on top
        let quota = STORAGE_KEY.len() + full_payload.len();
        let storage = InMemoryStorage::with_quota(quota);
        storage.set(STORAGE_KEY, &full_payload).unwrap();
        let store = ResultStore::new(Arc::new(storage));

        let mut big = result(99.0).with_id("new");
        big.extra
            .insert("note".to_string(), serde_json::Value::from("x".repeat(200)));
        store.save(big);

        let all = store.get_all();
        assert_eq!(all.len(), MAX_RESULTS / 2 + 1);
        assert_eq!(all[0].id.as_deref(), Some("new"));
        assert_eq!(all[1].id.as_deref(), Some("r49"));
        assert_eq!(all[25].id.as_deref(), Some("r25"));
    }

    #[test]
    fn test_quota_retry_failure_is_swallowed() {
        let storage = InMemoryStorage::with_quota(10);
        let store = ResultStore::new(Arc::new(storage));

        let saved = store.save(result(42.0));
        assert!(saved.id.is_some());
        assert!(store.get_all().is_empty());
    }

    #[test]
    fn test_remove_is_idempotent() {
        let (store, _) = store();
        store.save(result(1.0).with_id("a"));
        store.save(result(2.0).with_id("b"));

        store.remove("a");
        let once = store.get_all();
        store.remove("a");
        assert_eq!(store.get_all(), once);
        assert_eq!(once.len(), 1);

        store.remove("missing");
        assert_eq!(store.get_all(), once);
    }

    #[test]
    fn test_clear_all() {
        let (store, storage) = store();
        store.save(result(1.0));
        store.clear_all();
        assert!(store.get_all().is_empty());
        assert!(storage.is_empty());
    }

    #[test]
    fn test_export_envelope() {
        let (store, _) = store();
        store.save(result(1.0).with_id("a"));
        store.save(result(2.0).with_id("b"));

        let exported: serde_json::Value = serde_json::from_str(&store.export_as_json()).unwrap();
        assert_eq!(exported["version"], "1.0");
        assert_eq!(exported["totalResults"], 2);
        assert_eq!(exported["results"][0]["id"], "b");
        assert!(exported["exportDate"].as_str().is_some());
    }

    #[test]
    fn test_import_merges_and_prefers_imported() {
        let (store, _) = store();
        store.save(result(1.0).with_id("shared"));
        store.save(result(2.0).with_id("local"));

        let import = serde_json::json!({
            "results": [
                { "id": "shared", "classification": "Viral Pneumonia", "confidence": 77.0 },
                { "id": "remote", "classification": "Normal", "confidence": 95.0 }
            ]
        });
        assert!(store.import_from_json(&import.to_string()));

        let all = store.get_all();
        let ids: Vec<_> = all.iter().map(|r| r.id.as_deref().unwrap()).collect();
        assert_eq!(ids, vec!["shared", "remote", "local"]);
        assert_eq!(all[0].classification, Classification::ViralPneumonia);
    }

    #[test]
    fn test_import_rejects_bad_input() {
        let (store, _) = store();
        store.save(result(1.0).with_id("a"));
        let before = store.get_all();

        assert!(!store.import_from_json("not json"));
        assert!(!store.import_from_json(r#"{"version": "1.0"}"#));
        assert!(!store.import_from_json(r#"{"results": "nope"}"#));
        assert!(!store.import_from_json(r#"{"results": [{"id": "x"}]}"#));

        assert_eq!(store.get_all(), before);
    }

    #[test]
    fn test_import_requires_an_object() {
        let (store, _) = store();
        store.save(result(1.0).with_id("a"));
        let before = store.get_all();

        assert!(!store.import_from_json("[[]]"));
        assert!(!store.import_from_json(
            r#"[[{"id": "x", "classification": "Normal", "confidence": 90}]]"#
        ));
        assert!(!store.import_from_json("null"));

        assert_eq!(store.get_all(), before);
    }

    #[test]
    fn test_import_truncates() {
        let (store, _) = store();
        let results: Vec<_> = (0..60)
            .map(|i| result(i as f64).with_id(format!("i{}", i)))
            .collect();
        let envelope = serde_json::json!({ "results": results });

        assert!(store.import_from_json(&envelope.to_string()));
        let all = store.get_all();
        assert_eq!(all.len(), MAX_RESULTS);
        assert_eq!(all[0].id.as_deref(), Some("i0"));
    }

    #[test]
    fn test_storage_info() {
        let (store, storage) = store();
        let empty = store.storage_info();
        assert_eq!(empty.count, 0);
        assert_eq!(empty.size_bytes, 0);
        assert_eq!(empty.size_kb, "0.00");
        assert_eq!(empty.max_results, MAX_RESULTS);

        store.save(result(1.0));
        let info = store.storage_info();
        let raw = storage.get(STORAGE_KEY).unwrap().unwrap();
        assert_eq!(info.count, 1);
        assert_eq!(info.size_bytes, raw.len());
    }
}
