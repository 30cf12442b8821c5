//! Per-object memory ledger
//!
//! Tracks, for one schema object, how many times each account references it
//! and how much master memory has been charged to each account for it.
//!
//! Invariants:
//! - every reference count is at least one; an account reaching zero is removed
//! - charged usage only exists for referencing accounts

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::account::AccountId;
use crate::error::{Result, SchemaError};
use crate::object::SchemaId;

/// Reference counts keyed by account
pub type AccountRefCounts = BTreeMap<AccountId, i64>;

/// Charged master memory keyed by account
pub type AccountMemoryUsage = BTreeMap<AccountId, i64>;

/// Reference and memory accounting for a single schema object
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryLedger {
    referencing_accounts: AccountRefCounts,
    charged_memory_usage: AccountMemoryUsage,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a ledger from persisted maps, checking its invariants
    pub fn from_parts(
        schema_id: SchemaId,
        referencing_accounts: AccountRefCounts,
        charged_memory_usage: AccountMemoryUsage,
    ) -> Result<Self> {
        let ledger = Self {
            referencing_accounts,
            charged_memory_usage,
        };
        ledger.validate(schema_id)?;
        Ok(ledger)
    }

    /// Increment the account's refcount; true iff it went from zero to one
    pub fn ref_by(&mut self, account: &AccountId) -> bool {
        let count = self.referencing_accounts.entry(account.clone()).or_insert(0);
        *count += 1;
        *count == 1
    }

    /// Decrement the account's refcount; true iff it went down to zero
    ///
    /// When the account is no longer referencing, its charged usage is
    /// dropped as well.
    pub fn unref_by(&mut self, schema_id: SchemaId, account: &AccountId) -> Result<bool> {
        let count = self
            .referencing_accounts
            .get_mut(account)
            .ok_or_else(|| SchemaError::RefcountUnderflow {
                schema_id,
                account: account.clone(),
            })?;

        *count -= 1;
        if *count > 0 {
            return Ok(false);
        }

        self.referencing_accounts.remove(account);
        self.charged_memory_usage.remove(account);
        Ok(true)
    }

    /// Reference count held by an account, zero when absent
    pub fn ref_count(&self, account: &AccountId) -> i64 {
        self.referencing_accounts.get(account).copied().unwrap_or(0)
    }

    /// Sum of reference counts over all accounts
    pub fn total_ref_count(&self) -> i64 {
        self.referencing_accounts.values().sum()
    }

    pub fn is_referenced(&self) -> bool {
        !self.referencing_accounts.is_empty()
    }

    /// Last charged usage recorded for an account, zero when absent
    pub fn charged_usage(&self, account: &AccountId) -> i64 {
        self.charged_memory_usage.get(account).copied().unwrap_or(0)
    }

    /// Overwrite the charged usage for a referencing account
    pub fn set_charged_usage(
        &mut self,
        schema_id: SchemaId,
        account: &AccountId,
        usage: i64,
    ) -> Result<()> {
        if !self.referencing_accounts.contains_key(account) {
            return Err(SchemaError::UnreferencedAccount {
                schema_id,
                account: account.clone(),
            });
        }
        if usage < 0 {
            return Err(SchemaError::InvariantViolation(format!(
                "negative memory usage {} charged to account {} for schema {}",
                usage, account, schema_id
            )));
        }
        self.charged_memory_usage.insert(account.clone(), usage);
        Ok(())
    }

    pub fn referencing_accounts(&self) -> &AccountRefCounts {
        &self.referencing_accounts
    }

    pub fn charged_memory_usage(&self) -> &AccountMemoryUsage {
        &self.charged_memory_usage
    }

    /// Check the ledger invariants, reporting violations as snapshot corruption
    pub fn validate(&self, schema_id: SchemaId) -> Result<()> {
        if self.referencing_accounts.is_empty() {
            return Err(SchemaError::corrupt(format!(
                "schema {} has no referencing accounts",
                schema_id
            )));
        }
        for (account, count) in &self.referencing_accounts {
            if *count < 1 {
                return Err(SchemaError::corrupt(format!(
                    "schema {} has non-positive refcount {} for account {}",
                    schema_id, count, account
                )));
            }
        }
        for (account, usage) in &self.charged_memory_usage {
            if *usage < 0 {
                return Err(SchemaError::corrupt(format!(
                    "schema {} has negative charged usage {} for account {}",
                    schema_id, usage, account
                )));
            }
            if !self.referencing_accounts.contains_key(account) {
                return Err(SchemaError::corrupt(format!(
                    "schema {} charges non-referencing account {}",
                    schema_id, account
                )));
            }
        }
        Ok(())
    }
}
