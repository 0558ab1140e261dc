//! StateStore: redb-backed persistence of convergence state.
//!
//! Typed operations over resources, applies, trigger firings and pipeline
//! definitions. On-disk and in-memory backends are supported; the latter
//! is what the tests and dry runs use.

use std::path::Path;
use std::sync::Arc;

use deckhand_core::{ResourceId, validate_stage_name};
use redb::{Database, ReadableDatabase, ReadableTable};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent store at `path`.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

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
        // Opening a table in a write transaction creates it if absent.
        for table in [RESOURCES, APPLIES, TRIGGERS, PIPELINES] {
            txn.open_table(table).map_err(map_err!(Table))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Resources ──────────────────────────────────────────────────

    pub fn put_resource(&self, record: &ResourceRecord) -> StateResult<()> {
        check_stage(&record.stage)?;
        let key = record.table_key();
        self.put(RESOURCES, &key, record)?;
        debug!(%key, apply_id = record.apply_id, "resource stored");
        Ok(())
    }

    pub fn get_resource(&self, stage: &str, id: &ResourceId) -> StateResult<Option<ResourceRecord>> {
        check_stage(stage)?;
        self.get(RESOURCES, &resource_key(stage, id))
    }

    /// All converged resources of a stage, ordered by id.
    pub fn list_resources(&self, stage: &str) -> StateResult<Vec<ResourceRecord>> {
        check_stage(stage)?;
        self.scan(RESOURCES, &format!("{stage}/"))
    }

    /// Returns true if the record existed.
    pub fn delete_resource(&self, stage: &str, id: &ResourceId) -> StateResult<bool> {
        check_stage(stage)?;
        let key = resource_key(stage, id);
        let existed = self.remove(RESOURCES, &key)?;
        debug!(%key, existed, "resource deleted");
        Ok(existed)
    }

    // ── Applies ────────────────────────────────────────────────────

    pub fn put_apply(&self, record: &ApplyRecord) -> StateResult<()> {
        check_stage(&record.stage)?;
        let key = record.table_key();
        self.put(APPLIES, &key, record)?;
        debug!(%key, outcome = ?record.outcome, "apply recorded");
        Ok(())
    }

    pub fn get_apply(&self, stage: &str, apply_id: ApplyId) -> StateResult<Option<ApplyRecord>> {
        check_stage(stage)?;
        self.get(APPLIES, &apply_key(stage, apply_id))
    }

    /// Apply history of a stage, oldest first.
    pub fn list_applies(&self, stage: &str) -> StateResult<Vec<ApplyRecord>> {
        check_stage(stage)?;
        self.scan(APPLIES, &format!("{stage}:"))
    }

    pub fn latest_apply(&self, stage: &str) -> StateResult<Option<ApplyRecord>> {
        Ok(self.list_applies(stage)?.pop())
    }

    /// Id for the next apply of `stage`. Ids start at 1.
    pub fn next_apply_id(&self, stage: &str) -> StateResult<ApplyId> {
        Ok(self
            .latest_apply(stage)?
            .map(|record| record.apply_id + 1)
            .unwrap_or(1))
    }

    // ── Triggers ───────────────────────────────────────────────────

    pub fn put_trigger(&self, record: &TriggerRecord) -> StateResult<()> {
        check_stage(&record.stage)?;
        let key = record.table_key();
        self.put(TRIGGERS, &key, record)?;
        debug!(%key, phase = ?record.phase, "trigger firing recorded");
        Ok(())
    }

    /// Every firing of one trigger, oldest first.
    pub fn list_trigger_firings(
        &self,
        stage: &str,
        trigger: &ResourceId,
    ) -> StateResult<Vec<TriggerRecord>> {
        check_stage(stage)?;
        self.scan(TRIGGERS, &format!("{stage}/{trigger}:"))
    }

    pub fn list_triggers(&self, stage: &str) -> StateResult<Vec<TriggerRecord>> {
        check_stage(stage)?;
        self.scan(TRIGGERS, &format!("{stage}/"))
    }

    // ── Pipelines ──────────────────────────────────────────────────

    pub fn put_pipeline(&self, record: &PipelineRecord) -> StateResult<()> {
        self.put(PIPELINES, &record.name, record)?;
        debug!(pipeline = %record.name, fingerprint = %record.fingerprint, "pipeline stored");
        Ok(())
    }

    pub fn get_pipeline(&self, name: &str) -> StateResult<Option<PipelineRecord>> {
        self.get(PIPELINES, name)
    }

    pub fn delete_pipeline(&self, name: &str) -> StateResult<bool> {
        self.remove(PIPELINES, name)
    }

    // ── Table helpers ──────────────────────────────────────────────

    fn put<T: Serialize>(&self, table: JsonTable, key: &str, record: &T) -> StateResult<()> {
        let value = serde_json::to_vec(record).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(table).map_err(map_err!(Table))?;
            table
                .insert(key, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn get<T: DeserializeOwned>(&self, table: JsonTable, key: &str) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let record = serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    fn scan<T: DeserializeOwned>(&self, table: JsonTable, prefix: &str) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(prefix) {
                let record = serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.push(record);
            }
        }
        Ok(results)
    }

    fn remove(&self, table: JsonTable, key: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(table).map_err(map_err!(Table))?;
            existed = table.remove(key).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }
}

fn check_stage(stage: &str) -> StateResult<()> {
    validate_stage_name(stage).map_err(|_| StateError::InvalidStage(stage.to_string()))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn resource(stage: &str, stack: &str, logical: &str) -> ResourceRecord {
        ResourceRecord {
            stage: stage.to_string(),
            id: ResourceId::new(stack, logical),
            stack: stack.to_string(),
            kind: "vpc".to_string(),
            props: serde_json::json!({ "name": logical }),
            props_digest: "abc".to_string(),
            depends_on: vec![],
            outputs: BTreeMap::from([("id".to_string(), format!("vpc-{logical}"))]),
            applied_at: 1000,
            apply_id: 1,
        }
    }

    fn apply(stage: &str, apply_id: ApplyId, outcome: ApplyOutcome) -> ApplyRecord {
        ApplyRecord {
            apply_id,
            stage: stage.to_string(),
            fingerprint: "f".repeat(64),
            outcome,
            failed_resource: None,
            error: None,
            diagnostics: None,
            started_at: 1000,
            finished_at: 1001,
        }
    }

    fn firing(stage: &str, apply_id: ApplyId, phase: TriggerRecordPhase) -> TriggerRecord {
        TriggerRecord {
            stage: stage.to_string(),
            trigger: ResourceId::new("shopMigratorLambda", "shopMigrationTrigger"),
            apply_id,
            phase,
            exit_code: Some(0),
            stdout: "applied 3 migrations".to_string(),
            stderr: String::new(),
            fired_at: 1000,
        }
    }

    // ── Resources ──────────────────────────────────────────────────

    #[test]
    fn resource_put_and_get() {
        let store = StateStore::open_in_memory().unwrap();
        let record = resource("Prod", "shopNetwork", "shopVPC");

        store.put_resource(&record).unwrap();
        let retrieved = store.get_resource("Prod", &record.id).unwrap();

        assert_eq!(retrieved, Some(record));
    }

    #[test]
    fn resources_are_scoped_by_stage() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_resource(&resource("Prod", "shopNetwork", "shopVPC")).unwrap();
        store.put_resource(&resource("Prod", "shopDatabase", "shopDatabaseCluster")).unwrap();
        store.put_resource(&resource("Staging", "shopNetwork", "shopVPC")).unwrap();

        let prod = store.list_resources("Prod").unwrap();
        assert_eq!(prod.len(), 2);
        assert_eq!(prod[0].id.as_str(), "shopDatabase/shopDatabaseCluster");
        assert_eq!(store.list_resources("Staging").unwrap().len(), 1);
        assert!(store.list_resources("Prod2").unwrap().is_empty());
    }

    #[test]
    fn resource_delete() {
        let store = StateStore::open_in_memory().unwrap();
        let record = resource("Prod", "shopNetwork", "shopVPC");
        store.put_resource(&record).unwrap();

        assert!(store.delete_resource("Prod", &record.id).unwrap());
        assert!(!store.delete_resource("Prod", &record.id).unwrap());
        assert!(store.get_resource("Prod", &record.id).unwrap().is_none());
    }

    #[test]
    fn stage_names_cannot_reach_other_stages() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_resource(&resource("Prod", "shopNetwork", "shopVPC")).unwrap();

        for stage in ["Prod/shopNetwork", "Prod:", ""] {
            assert!(matches!(
                store.list_resources(stage),
                Err(StateError::InvalidStage(_))
            ));
            assert!(matches!(store.list_applies(stage), Err(StateError::InvalidStage(_))));
        }
        assert!(matches!(
            store.put_resource(&resource("Prod/x", "shopNetwork", "shopVPC")),
            Err(StateError::InvalidStage(_))
        ));
        assert_eq!(store.list_resources("Prod").unwrap().len(), 1);
    }

    // ── Applies ────────────────────────────────────────────────────

    #[test]
    fn apply_ids_increase_per_stage() {
        let store = StateStore::open_in_memory().unwrap();
        assert_eq!(store.next_apply_id("Prod").unwrap(), 1);

        for id in 1..=11 {
            store.put_apply(&apply("Prod", id, ApplyOutcome::Succeeded)).unwrap();
        }
        store.put_apply(&apply("Staging", 1, ApplyOutcome::Failed)).unwrap();

        assert_eq!(store.next_apply_id("Prod").unwrap(), 12);
        assert_eq!(store.next_apply_id("Staging").unwrap(), 2);
        assert_eq!(store.latest_apply("Prod").unwrap().unwrap().apply_id, 11);
    }

    #[test]
    fn failed_apply_keeps_diagnostics() {
        let store = StateStore::open_in_memory().unwrap();
        let mut record = apply("Prod", 1, ApplyOutcome::Failed);
        record.failed_resource = Some(ResourceId::new("shopMigratorLambda", "shopMigrationTrigger"));
        record.diagnostics = Some("P3009 migrate found failed migrations".to_string());
        store.put_apply(&record).unwrap();

        assert_eq!(store.get_apply("Prod", 1).unwrap(), Some(record));
    }

    // ── Triggers ───────────────────────────────────────────────────

    #[test]
    fn trigger_firings_accumulate() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_trigger(&firing("Prod", 1, TriggerRecordPhase::Failed)).unwrap();
        store.put_trigger(&firing("Prod", 2, TriggerRecordPhase::Succeeded)).unwrap();

        let trigger = ResourceId::new("shopMigratorLambda", "shopMigrationTrigger");
        let firings = store.list_trigger_firings("Prod", &trigger).unwrap();
        assert_eq!(firings.len(), 2);
        assert_eq!(firings[0].phase, TriggerRecordPhase::Failed);
        assert_eq!(firings[1].phase, TriggerRecordPhase::Succeeded);
        assert_eq!(store.list_triggers("Prod").unwrap().len(), 2);
    }

    // ── Pipelines ──────────────────────────────────────────────────

    #[test]
    fn pipeline_put_get_delete() {
        let store = StateStore::open_in_memory().unwrap();
        let record = PipelineRecord {
            name: "shopPipeline".to_string(),
            fingerprint: "abc".to_string(),
            updated_at: 1000,
        };
        store.put_pipeline(&record).unwrap();
        assert_eq!(store.get_pipeline("shopPipeline").unwrap(), Some(record));
        assert!(store.delete_pipeline("shopPipeline").unwrap());
        assert!(store.get_pipeline("shopPipeline").unwrap().is_none());
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("state.redb");

        {
            let store = StateStore::open(&db_path).unwrap();
            store.put_resource(&resource("Prod", "shopNetwork", "shopVPC")).unwrap();
            store.put_apply(&apply("Prod", 1, ApplyOutcome::Succeeded)).unwrap();
        }

        let store = StateStore::open(&db_path).unwrap();
        assert_eq!(store.list_resources("Prod").unwrap().len(), 1);
        assert_eq!(store.next_apply_id("Prod").unwrap(), 2);
    }

    #[test]
    fn empty_store_operations() {
        let store = StateStore::open_in_memory().unwrap();
        let id = ResourceId::new("a", "b");

        assert!(store.list_resources("Prod").unwrap().is_empty());
        assert!(store.list_applies("Prod").unwrap().is_empty());
        assert!(store.latest_apply("Prod").unwrap().is_none());
        assert!(store.list_triggers("Prod").unwrap().is_empty());
        assert!(!store.delete_resource("Prod", &id).unwrap());
        assert!(!store.delete_pipeline("nope").unwrap());
    }
}
