//! Master memory accounting
//!
//! The byte cost of holding a schema is policy, so it sits behind the
//! [`MemoryCostModel`] trait. Charged usage on each object is allowed to lag the
//! computed cost; [`reconcile`] brings them back in line and reports the
//! per-account deltas for the quota subsystem to apply to account budgets.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::account::AccountId;
use crate::error::Result;
use crate::registry::SchemaRegistry;
use crate::schema::TableSchema;

/// Computes the master memory cost of holding a schema
pub trait MemoryCostModel: Send + Sync {
    fn schema_memory_usage(&self, schema: &TableSchema) -> i64;
}

/// Cost proportional to the schema's structure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuralCostModel {
    /// Fixed cost of any schema
    pub base_bytes: i64,
    /// Cost of each column on top of its names and expression
    pub per_column_bytes: i64,
}

impl Default for StructuralCostModel {
    fn default() -> Self {
        Self {
            base_bytes: 128,
            per_column_bytes: 64,
        }
    }
}

impl MemoryCostModel for StructuralCostModel {
    fn schema_memory_usage(&self, schema: &TableSchema) -> i64 {
        let columns: i64 = schema
            .columns
            .iter()
            .map(|column| {
                let strings = column.name.len()
                    + column.expression.as_ref().map_or(0, String::len)
                    + column.group.as_ref().map_or(0, String::len);
                self.per_column_bytes + strings as i64
            })
            .sum();
        self.base_bytes + columns
    }
}

/// Result of a reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Net change of charged usage per account
    pub deltas: BTreeMap<AccountId, i64>,
    /// Number of (schema, account) entries whose charge changed
    pub updated_entries: usize,
}

impl ReconcileReport {
    pub fn is_noop(&self) -> bool {
        self.updated_entries == 0
    }
}

/// Bring every charged usage in the registry up to date with `model`
pub fn reconcile(registry: &mut SchemaRegistry, model: &dyn MemoryCostModel) -> Result<ReconcileReport> {
    let mut report = ReconcileReport::default();
    let objects: Vec<_> = registry.iter().cloned().collect();

    for object in objects {
        for account in object.referencing_accounts().into_keys() {
            let computed = object.master_memory_usage(&account, model);
            let charged = object.charged_master_memory_usage(&account);
            if computed == charged {
                continue;
            }
            registry.set_charged_master_memory_usage(&object, &account, computed)?;
            *report.deltas.entry(account).or_insert(0) += computed - charged;
            report.updated_entries += 1;
        }
    }

    report.deltas.retain(|_, delta| *delta != 0);
    if !report.is_noop() {
        tracing::info!(
            updated = report.updated_entries,
            accounts = report.deltas.len(),
            "Reconciled schema memory charges"
        );
    }
    Ok(report)
}

/// Total charged usage per account across the registry
pub fn charged_usage_by_account(registry: &SchemaRegistry) -> BTreeMap<AccountId, i64> {
    let mut totals = BTreeMap::new();
    for object in registry.iter() {
        for (account, usage) in object.charged_memory_usage() {
            *totals.entry(account).or_insert(0) += usage;
        }
    }
    totals
}
