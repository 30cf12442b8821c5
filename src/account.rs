//! Account identities
//!
//! Accounts are tenants against which schema references and master memory
//! are tracked. The registry only needs a stable, ordered identity for them;
//! budgets themselves live in the quota subsystem.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Result, SchemaError};

/// Identity of an account referencing schemas
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    /// Create an account id without validation (for trusted callers and tests)
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Parse an account id, rejecting empty or whitespace-padded names
    pub fn parse(name: &str) -> Result<Self> {
        if name.is_empty() {
            return Err(SchemaError::InvalidAccount("account name is empty".to_string()));
        }
        if name.trim() != name {
            return Err(SchemaError::InvalidAccount(format!(
                "account name {:?} has surrounding whitespace",
                name
            )));
        }
        Ok(Self(name.to_string()))
    }

    /// Get the account name
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AccountId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_account() {
        assert_eq!(AccountId::parse("intermediate").unwrap().as_str(), "intermediate");
        assert!(AccountId::parse("").is_err());
        assert!(AccountId::parse(" tmp").is_err());
    }

    #[test]
    fn test_account_ordering() {
        let mut accounts = vec![AccountId::new("tmp"), AccountId::new("sys"), AccountId::new("intermediate")];
        accounts.sort();
        let names: Vec<_> = accounts.iter().map(AccountId::as_str).collect();
        assert_eq!(names, vec!["intermediate", "sys", "tmp"]);
    }
}
