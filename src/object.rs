//! Schema objects
//!
//! A [`SchemaObject`] is the canonical, registry-owned instance of one distinct
//! schema content. It carries the per-account ledger and the memoized
//! serialization. Readers may hold an `Arc<SchemaObject>` and read from it
//! concurrently with the registry mutating its ledger.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::account::AccountId;
use crate::accounting::MemoryCostModel;
use crate::cache::{RenderResult, SchemaRenderer, SerializationCache, SerializationHandle};
use crate::error::Result;
use crate::ledger::{AccountMemoryUsage, AccountRefCounts, MemoryLedger};
use crate::schema::TableSchema;

/// Persistent identifier of a schema object
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchemaId(u64);

impl SchemaId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(&self) -> u64 {
        self.0
    }

    /// Parse the `0x`-prefixed hex form produced by `Display`
    pub fn parse(s: &str) -> Option<Self> {
        let digits = s.strip_prefix("0x").unwrap_or(s);
        u64::from_str_radix(digits, 16).ok().map(Self)
    }
}

impl fmt::Display for SchemaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

const DETACHED: usize = usize::MAX;

/// Canonical instance of one schema content
pub struct SchemaObject {
    id: SchemaId,
    content: Arc<TableSchema>,
    /// Arena slot in the owning registry; `DETACHED` once released
    slot: AtomicUsize,
    ledger: RwLock<MemoryLedger>,
    serialized: SerializationCache,
}

impl SchemaObject {
    pub(crate) fn new(
        id: SchemaId,
        content: Arc<TableSchema>,
        slot: usize,
        ledger: MemoryLedger,
        renderer: Arc<dyn SchemaRenderer>,
    ) -> Self {
        let serialized = SerializationCache::new(Arc::clone(&content), renderer);
        Self {
            id,
            content,
            slot: AtomicUsize::new(slot),
            ledger: RwLock::new(ledger),
            serialized,
        }
    }

    pub fn id(&self) -> SchemaId {
        self.id
    }

    pub fn content(&self) -> &Arc<TableSchema> {
        &self.content
    }

    /// Shared handle to the rendered schema
    pub fn as_serialized_async(&self) -> SerializationHandle {
        self.serialized.get_async()
    }

    /// Rendered schema, blocking until available. Prefer the async form.
    pub fn as_serialized_sync(&self) -> RenderResult {
        self.serialized.get_sync()
    }

    pub fn is_serialization_materialized(&self) -> bool {
        self.serialized.is_materialized()
    }

    /// Whether the object is still owned by a registry
    pub fn is_alive(&self) -> bool {
        self.slot().is_some()
    }

    pub fn ref_count(&self, account: &AccountId) -> i64 {
        self.ledger.read().ref_count(account)
    }

    pub fn total_ref_count(&self) -> i64 {
        self.ledger.read().total_ref_count()
    }

    /// Copy of the per-account reference counts
    pub fn referencing_accounts(&self) -> AccountRefCounts {
        self.ledger.read().referencing_accounts().clone()
    }

    /// Copy of the per-account charged usage
    pub fn charged_memory_usage(&self) -> AccountMemoryUsage {
        self.ledger.read().charged_memory_usage().clone()
    }

    /// Master memory this schema currently costs `account`
    ///
    /// Zero unless the account references the schema.
    pub fn master_memory_usage(&self, account: &AccountId, model: &dyn MemoryCostModel) -> i64 {
        if self.ref_count(account) == 0 {
            return 0;
        }
        model.schema_memory_usage(&self.content)
    }

    /// Last usage recorded via the registry, zero when absent
    pub fn charged_master_memory_usage(&self, account: &AccountId) -> i64 {
        self.ledger.read().charged_usage(account)
    }

    pub(crate) fn ledger(&self) -> MemoryLedger {
        self.ledger.read().clone()
    }

    pub(crate) fn slot(&self) -> Option<usize> {
        match self.slot.load(Ordering::Acquire) {
            DETACHED => None,
            slot => Some(slot),
        }
    }

    /// Detach from the registry arena, returning the slot previously held
    pub(crate) fn detach(&self) -> Option<usize> {
        match self.slot.swap(DETACHED, Ordering::AcqRel) {
            DETACHED => None,
            slot => Some(slot),
        }
    }

    pub(crate) fn ref_by(&self, account: &AccountId) -> bool {
        self.ledger.write().ref_by(account)
    }

    /// Returns `(account_unreferenced, object_unreferenced)`
    pub(crate) fn unref_by(&self, account: &AccountId) -> Result<(bool, bool)> {
        let mut ledger = self.ledger.write();
        let account_unreferenced = ledger.unref_by(self.id, account)?;
        Ok((account_unreferenced, !ledger.is_referenced()))
    }

    pub(crate) fn set_charged_master_memory_usage(&self, account: &AccountId, usage: i64) -> Result<()> {
        self.ledger.write().set_charged_usage(self.id, account, usage)
    }
}

impl fmt::Debug for SchemaObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaObject")
            .field("id", &self.id)
            .field("columns", &self.content.columns.len())
            .field("slot", &self.slot())
            .field("ledger", &*self.ledger.read())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounting::StructuralCostModel;
    use crate::cache::JsonRenderer;
    use crate::schema::{ColumnSchema, ValueType};

    fn object() -> SchemaObject {
        let content = Arc::new(TableSchema {
            columns: vec![ColumnSchema::new("a", ValueType::String)],
            strict: true,
            unique_keys: false,
        });
        SchemaObject::new(SchemaId::new(5), content, 0, MemoryLedger::new(), Arc::new(JsonRenderer::default()))
    }

    #[test]
    fn test_schema_id_display() {
        let id = SchemaId::new(0xbeef);
        assert_eq!(id.to_string(), "0xbeef");
        assert_eq!(SchemaId::parse("0xbeef"), Some(id));
        assert_eq!(SchemaId::parse("beef"), Some(id));
        assert_eq!(SchemaId::parse("zz"), None);
    }

    #[test]
    fn test_memory_usage_only_for_referencing_accounts() {
        let object = object();
        let model = StructuralCostModel::default();
        let account = AccountId::new("tmp");

        assert_eq!(object.master_memory_usage(&account, &model), 0);
        object.ref_by(&account);
        assert_eq!(
            object.master_memory_usage(&account, &model),
            model.schema_memory_usage(object.content())
        );
        assert_eq!(object.charged_master_memory_usage(&account), 0);

        object.set_charged_master_memory_usage(&account, 42).unwrap();
        assert_eq!(object.charged_master_memory_usage(&account), 42);
    }

    #[test]
    fn test_detach_once() {
        let object = object();
        assert!(object.is_alive());
        assert_eq!(object.detach(), Some(0));
        assert_eq!(object.detach(), None);
        assert!(!object.is_alive());
    }

    #[test]
    fn test_serialized_form() {
        let object = object();
        let rendered = object.as_serialized_sync().unwrap();
        assert!(rendered.as_str().contains("\"name\":\"a\""));
        assert!(object.is_serialization_materialized());
    }
}
