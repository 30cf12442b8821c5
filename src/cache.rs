//! Memoized schema serialization
//!
//! Rendering a schema into its external representation is expensive compared
//! to handing out a cached copy, so each schema object renders at most once.
//! Readers share a single [`SerializationHandle`]; the first reader installs it
//! under a short exclusive lock and the render itself runs outside the lock,
//! driven by whichever waiter polls the handle first.
//!
//! A failed render is terminal: the error is memoized and delivered to every
//! current and future waiter. Content is immutable, so retrying would only
//! reproduce the same failure. A panicking renderer counts as a failed render;
//! the panic is caught so the shared handle never poisons its readers.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::RwLock;
use thiserror::Error;

use crate::schema::TableSchema;

/// Error produced by a [`SchemaRenderer`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Failed to render schema: {0}")]
pub struct RenderError(pub String);

/// Rendered external representation of a schema
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SerializedSchema(Arc<str>);

impl SerializedSchema {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for SerializedSchema {
    fn from(s: String) -> Self {
        Self(Arc::from(s))
    }
}

impl fmt::Display for SerializedSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Outcome of a memoized render
pub type RenderResult = Result<SerializedSchema, RenderError>;

/// Shared handle to a pending or completed render
pub type SerializationHandle = Shared<BoxFuture<'static, RenderResult>>;

/// Produces the external representation of a schema
pub trait SchemaRenderer: Send + Sync {
    fn render(&self, schema: &TableSchema) -> Result<String, RenderError>;
}

/// Renders schemas as JSON
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonRenderer {
    pub pretty: bool,
}

impl JsonRenderer {
    pub fn new(pretty: bool) -> Self {
        Self { pretty }
    }
}

impl SchemaRenderer for JsonRenderer {
    fn render(&self, schema: &TableSchema) -> Result<String, RenderError> {
        let rendered = if self.pretty {
            serde_json::to_string_pretty(schema)
        } else {
            serde_json::to_string(schema)
        };
        rendered.map_err(|e| RenderError(e.to_string()))
    }
}

/// Compute-once cache of a schema's rendered form
pub struct SerializationCache {
    content: Arc<TableSchema>,
    renderer: Arc<dyn SchemaRenderer>,
    memoized: RwLock<Option<SerializationHandle>>,
}

impl SerializationCache {
    pub fn new(content: Arc<TableSchema>, renderer: Arc<dyn SchemaRenderer>) -> Self {
        Self {
            content,
            renderer,
            memoized: RwLock::new(None),
        }
    }

    /// Get a handle to the rendered schema, starting the render if nobody has
    pub fn get_async(&self) -> SerializationHandle {
        if let Some(handle) = self.memoized.read().as_ref() {
            return handle.clone();
        }

        let mut memoized = self.memoized.write();
        // Another reader may have won the race for the write lock.
        if let Some(handle) = memoized.as_ref() {
            return handle.clone();
        }

        let content = Arc::clone(&self.content);
        let renderer = Arc::clone(&self.renderer);
        let handle = async move {
            tracing::debug!(columns = content.columns.len(), "Rendering schema");
            panic::catch_unwind(AssertUnwindSafe(|| renderer.render(&content)))
                .unwrap_or_else(|_| {
                    tracing::error!("Schema renderer panicked");
                    Err(RenderError("renderer panicked".to_string()))
                })
                .map(SerializedSchema::from)
        }
        .boxed()
        .shared();

        *memoized = Some(handle.clone());
        handle
    }

    /// Block the current thread until the rendered schema is available
    pub fn get_sync(&self) -> RenderResult {
        futures::executor::block_on(self.get_async())
    }

    /// Whether a render has completed, successfully or not
    pub fn is_materialized(&self) -> bool {
        self.memoized
            .read()
            .as_ref()
            .map_or(false, |handle| handle.peek().is_some())
    }
}

impl fmt::Debug for SerializationCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerializationCache")
            .field("materialized", &self.is_materialized())
            .finish()
    }
}
