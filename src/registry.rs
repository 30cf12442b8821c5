//! Schema Registry
//!
//! Content-addressed index of canonical schema objects. Structurally equal
//! schemas always resolve to the same object; objects live in an arena and
//! remember their own slot so that releasing one is a direct slot
//! deallocation.
//!
//! All methods taking `&mut self` are mutations and expect a single writer
//! (see [`crate::automaton`]). Objects handed out may be read from any thread.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io::{Read, Write};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::account::AccountId;
use crate::cache::{JsonRenderer, SchemaRenderer};
use crate::error::{Result, SchemaError};
use crate::ledger::MemoryLedger;
use crate::object::{SchemaId, SchemaObject};
use crate::schema::TableSchema;
use crate::snapshot::{self, SchemaRecord, SnapshotImage};

/// Outcome of dropping a reference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnrefOutcome {
    /// The account no longer references the schema
    pub account_unreferenced: bool,
    /// Nobody references the schema and it has been released
    pub object_released: bool,
}

/// Summary counters of a registry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub objects: usize,
    pub accounts: usize,
    pub total_refs: i64,
    pub free_slots: usize,
    pub next_id: u64,
}

/// The content-addressed schema registry
pub struct SchemaRegistry {
    /// Arena of live objects; released slots are `None` and reused
    slots: Vec<Option<Arc<SchemaObject>>>,
    free_slots: Vec<usize>,
    /// Content -> arena slot
    by_content: HashMap<Arc<TableSchema>, usize>,
    /// Id -> arena slot, ordered for deterministic iteration
    by_id: BTreeMap<SchemaId, usize>,
    next_id: u64,
    renderer: Arc<dyn SchemaRenderer>,
}

impl SchemaRegistry {
    /// Create an empty registry rendering schemas as compact JSON
    pub fn new() -> Self {
        Self::with_renderer(Arc::new(JsonRenderer::default()))
    }

    /// Create an empty registry with a custom renderer
    pub fn with_renderer(renderer: Arc<dyn SchemaRenderer>) -> Self {
        Self {
            slots: Vec::new(),
            free_slots: Vec::new(),
            by_content: HashMap::new(),
            by_id: BTreeMap::new(),
            next_id: 1,
            renderer,
        }
    }

    /// Get the canonical object for `content`, creating it if needed
    ///
    /// A newly created object has no references. Callers reference it right
    /// away (see [`Self::resolve_and_ref`]); objects left unreferenced are
    /// dropped by [`Self::release_unreferenced`].
    pub fn resolve(&mut self, content: impl Into<Arc<TableSchema>>) -> Arc<SchemaObject> {
        let content = content.into();
        if let Some(object) = self.find(&content) {
            return Arc::clone(object);
        }

        let id = SchemaId::new(self.next_id);
        self.next_id += 1;
        let object = self.insert(id, content, MemoryLedger::new());
        debug!(schema_id = %id, slot = ?object.slot(), "Created schema object");
        object
    }

    /// Resolve `content` and reference it on behalf of `account`
    ///
    /// Returns the object and whether this was the account's first reference.
    pub fn resolve_and_ref(
        &mut self,
        content: impl Into<Arc<TableSchema>>,
        account: &AccountId,
    ) -> Result<(Arc<SchemaObject>, bool)> {
        let object = self.resolve(content);
        let first = self.ref_by(&object, account)?;
        Ok((object, first))
    }

    /// Add a reference from `account`; true iff it is the account's first
    pub fn ref_by(&mut self, object: &Arc<SchemaObject>, account: &AccountId) -> Result<bool> {
        self.ensure_owned(object)?;
        let first = object.ref_by(account);
        if first {
            debug!(schema_id = %object.id(), %account, "Schema referenced by account");
        }
        Ok(first)
    }

    /// Drop a reference from `account`, releasing the object with its last reference
    pub fn unref_by(&mut self, object: &Arc<SchemaObject>, account: &AccountId) -> Result<UnrefOutcome> {
        self.ensure_owned(object)?;
        let (account_unreferenced, object_unreferenced) = object.unref_by(account)?;
        if account_unreferenced {
            debug!(schema_id = %object.id(), %account, "Schema no longer referenced by account");
        }
        if object_unreferenced {
            self.release(object)?;
        }
        Ok(UnrefOutcome {
            account_unreferenced,
            object_released: object_unreferenced,
        })
    }

    /// Release every object that was resolved but never referenced
    ///
    /// Returns the number of objects released.
    pub fn release_unreferenced(&mut self) -> Result<usize> {
        let pending: Vec<_> = self
            .iter()
            .filter(|object| object.total_ref_count() == 0)
            .cloned()
            .collect();
        for object in &pending {
            self.release(object)?;
        }
        if !pending.is_empty() {
            debug!(released = pending.len(), "Released unreferenced schema objects");
        }
        Ok(pending.len())
    }

    /// Record the usage charged to `account` for holding `object`
    pub fn set_charged_master_memory_usage(
        &mut self,
        object: &Arc<SchemaObject>,
        account: &AccountId,
        usage: i64,
    ) -> Result<()> {
        self.ensure_owned(object)?;
        object.set_charged_master_memory_usage(account, usage)
    }

    /// Look up the canonical object for `content` without creating it
    pub fn find(&self, content: &TableSchema) -> Option<&Arc<SchemaObject>> {
        let slot = *self.by_content.get(content)?;
        self.slots.get(slot)?.as_ref()
    }

    /// Look up a live object by id
    pub fn get(&self, id: SchemaId) -> Option<&Arc<SchemaObject>> {
        let slot = *self.by_id.get(&id)?;
        self.slots.get(slot)?.as_ref()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Live objects in ascending id order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<SchemaObject>> + '_ {
        self.by_id
            .values()
            .filter_map(|&slot| self.slots.get(slot).and_then(Option::as_ref))
    }

    pub fn stats(&self) -> RegistryStats {
        let mut accounts = BTreeSet::new();
        let mut total_refs = 0;
        for object in self.iter() {
            let refs = object.referencing_accounts();
            total_refs += refs.values().sum::<i64>();
            accounts.extend(refs.into_keys());
        }
        RegistryStats {
            objects: self.len(),
            accounts: accounts.len(),
            total_refs,
            free_slots: self.free_slots.len(),
            next_id: self.next_id,
        }
    }

    /// Check that the content index, id index and arena agree
    pub fn check_invariants(&self) -> Result<()> {
        let live = self.slots.iter().filter(|s| s.is_some()).count();
        if live != self.by_content.len() || live != self.by_id.len() {
            return Err(SchemaError::InvariantViolation(format!(
                "index sizes disagree: {} live slots, {} contents, {} ids",
                live,
                self.by_content.len(),
                self.by_id.len()
            )));
        }
        for (content, &slot) in &self.by_content {
            let object = self.slots.get(slot).and_then(Option::as_ref).ok_or_else(|| {
                SchemaError::InvariantViolation(format!("content index points at empty slot {}", slot))
            })?;
            if object.content() != content || object.slot() != Some(slot) {
                return Err(SchemaError::InvariantViolation(format!(
                    "slot {} holds schema {} which does not match the content index",
                    slot,
                    object.id()
                )));
            }
            if self.by_id.get(&object.id()) != Some(&slot) {
                return Err(SchemaError::InvariantViolation(format!(
                    "schema {} missing from the id index",
                    object.id()
                )));
            }
        }
        Ok(())
    }

    /// Write every referenced object to `writer`
    ///
    /// Objects resolved but not yet referenced are skipped: they are not part
    /// of the durable state and would not survive a load.
    pub fn save_snapshot(&self, writer: impl Write, pretty: bool) -> Result<()> {
        let records = self
            .iter()
            .filter(|object| object.total_ref_count() > 0)
            .map(|object| {
                let ledger = object.ledger();
                SchemaRecord {
                    id: object.id(),
                    content: object.content().as_ref().clone(),
                    referencing_accounts: ledger.referencing_accounts().clone(),
                    charged_memory_usage: ledger.charged_memory_usage().clone(),
                }
            })
            .collect();
        let image = SnapshotImage::new(self.next_id, records);
        snapshot::write_image(writer, &image, pretty)?;
        info!(objects = image.records.len(), next_id = self.next_id, "Saved schema snapshot");
        Ok(())
    }

    /// Replace the registry contents with the snapshot read from `reader`
    ///
    /// Either the whole snapshot is loaded or the registry is left untouched.
    pub fn load_snapshot(&mut self, reader: impl Read) -> Result<()> {
        let image = snapshot::read_image(reader)?;
        let restored = Self::restore(image, Arc::clone(&self.renderer))?;
        for object in self.slots.iter().flatten() {
            object.detach();
        }
        *self = restored;
        info!(objects = self.len(), next_id = self.next_id, "Loaded schema snapshot");
        Ok(())
    }

    fn restore(image: SnapshotImage, renderer: Arc<dyn SchemaRenderer>) -> Result<Self> {
        let mut registry = Self::with_renderer(renderer);
        let mut max_id = None;

        for record in image.records {
            let SchemaRecord {
                id,
                content,
                referencing_accounts,
                charged_memory_usage,
            } = record;

            if registry.by_id.contains_key(&id) {
                return Err(SchemaError::corrupt(format!("duplicate schema id {}", id)));
            }
            if registry.by_content.contains_key(&content) {
                return Err(SchemaError::corrupt(format!(
                    "schema {} duplicates the content of schema {}",
                    id,
                    registry.find(&content).map_or(id, |o| o.id())
                )));
            }
            content
                .validate()
                .map_err(|e| SchemaError::corrupt(format!("schema {}: {}", id, e)))?;
            let ledger = MemoryLedger::from_parts(id, referencing_accounts, charged_memory_usage)?;

            max_id = max_id.max(Some(id));
            registry.insert(id, Arc::new(content), ledger);
        }

        if let Some(max_id) = max_id {
            if image.next_id <= max_id.raw() {
                return Err(SchemaError::corrupt(format!(
                    "next id {:#x} does not exceed loaded id {}",
                    image.next_id, max_id
                )));
            }
        }
        registry.next_id = image.next_id.max(1);
        Ok(registry)
    }

    fn insert(&mut self, id: SchemaId, content: Arc<TableSchema>, ledger: MemoryLedger) -> Arc<SchemaObject> {
        let slot = self.free_slots.pop().unwrap_or(self.slots.len());
        let object = Arc::new(SchemaObject::new(
            id,
            Arc::clone(&content),
            slot,
            ledger,
            Arc::clone(&self.renderer),
        ));

        if slot == self.slots.len() {
            self.slots.push(Some(Arc::clone(&object)));
        } else {
            self.slots[slot] = Some(Arc::clone(&object));
        }
        self.by_content.insert(content, slot);
        self.by_id.insert(id, slot);
        object
    }

    /// Remove an unreferenced object from the arena and both indexes
    fn release(&mut self, object: &Arc<SchemaObject>) -> Result<()> {
        let slot = object.detach().ok_or_else(|| {
            SchemaError::InvariantViolation(format!("schema {} released twice", object.id()))
        })?;

        let held = self.slots.get_mut(slot).and_then(Option::take);
        if !held.as_ref().map_or(false, |held| Arc::ptr_eq(held, object)) {
            return Err(SchemaError::InvariantViolation(format!(
                "slot {} does not hold schema {}",
                slot,
                object.id()
            )));
        }

        self.by_content.remove(object.content().as_ref());
        self.by_id.remove(&object.id());
        self.free_slots.push(slot);
        debug!(schema_id = %object.id(), slot, "Released schema object");
        Ok(())
    }

    fn ensure_owned(&self, object: &Arc<SchemaObject>) -> Result<()> {
        let owned = object
            .slot()
            .and_then(|slot| self.slots.get(slot))
            .and_then(Option::as_ref)
            .map_or(false, |held| Arc::ptr_eq(held, object));
        if owned {
            Ok(())
        } else {
            Err(SchemaError::UnknownSchema(object.id()))
        }
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}
