//! Master Table Schemas
//!
//! The metadata layer that stores table schemas as shared, deduplicated,
//! reference-counted objects, charges them against per-account master memory
//! and persists them into the master snapshot.
//!
//! ## Features
//!
//! - **Deduplication**: structurally equal schemas resolve to one canonical object
//! - **Reference Counting**: per-account refcounts gate object lifetime
//! - **Memory Accounting**: per-account charged usage with periodic reconciliation
//! - **Memoized Serialization**: each schema is rendered at most once, shared by all readers
//! - **Snapshots**: deterministic, checksummed persistence of the whole registry
//!
//! ## Architecture
//!
//! ```text
//! table lifecycle ──► AutomatonHandle ──► SchemaAutomaton (single writer thread)
//!                                               │
//!                                               ▼
//!                                        SchemaRegistry
//!                                  ┌────────────┼─────────────┐
//!                           content index     arena       id index
//!                                               │
//!                                               ▼
//!                                  Arc<SchemaObject> ◄──── metadata readers
//!                                  ├── TableSchema (immutable)
//!                                  ├── MemoryLedger (refcounts, charged usage)
//!                                  └── SerializationCache (render once)
//! ```

pub mod account;
pub mod accounting;
pub mod automaton;
pub mod cache;
pub mod checksum;
pub mod config;
pub mod error;
pub mod ledger;
pub mod logging;
pub mod object;
pub mod registry;
pub mod schema;
pub mod snapshot;

pub use account::AccountId;
pub use accounting::{MemoryCostModel, ReconcileReport, StructuralCostModel};
pub use automaton::{AutomatonHandle, SchemaAutomaton};
pub use cache::{JsonRenderer, RenderError, SchemaRenderer, SerializationHandle, SerializedSchema};
pub use checksum::Checksum;
pub use config::SchemasConfig;
pub use error::{Result, SchemaError};
pub use ledger::MemoryLedger;
pub use object::{SchemaId, SchemaObject};
pub use registry::{RegistryStats, SchemaRegistry, UnrefOutcome};
pub use schema::{ColumnSchema, SortOrder, TableSchema, ValueType};
