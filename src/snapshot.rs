//! Snapshot persistence
//!
//! A snapshot is a JSON document:
//!
//! ```text
//! {
//!   "format_version": "1.0.0",
//!   "next_id": 4,
//!   "records": [
//!     { "id": 1, "content": {...}, "referencing_accounts": {...}, "charged_memory_usage": {...} },
//!     ...
//!   ],
//!   "checksum": "<sha256 of the serialized records>"
//! }
//! ```
//!
//! Records are ordered by ascending id and all maps are ordered, so identical
//! registries produce identical bytes. Rendered schemas are never persisted.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use semver::Version;
use serde::{Deserialize, Serialize};

use crate::checksum::Checksum;
use crate::error::{Result, SchemaError};
use crate::ledger::{AccountMemoryUsage, AccountRefCounts};
use crate::object::SchemaId;
use crate::registry::SchemaRegistry;
use crate::schema::TableSchema;

/// Version written into new snapshots; loading accepts the same major version
pub const FORMAT_VERSION: Version = Version::new(1, 0, 0);

/// One persisted schema object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaRecord {
    pub id: SchemaId,
    pub content: TableSchema,
    pub referencing_accounts: AccountRefCounts,
    #[serde(default)]
    pub charged_memory_usage: AccountMemoryUsage,
}

/// Full persisted registry state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotImage {
    pub format_version: Version,
    pub next_id: u64,
    pub records: Vec<SchemaRecord>,
    pub checksum: Checksum,
}

impl SnapshotImage {
    pub fn new(next_id: u64, records: Vec<SchemaRecord>) -> Self {
        let checksum = Checksum::of_serialized(&records);
        Self {
            format_version: FORMAT_VERSION,
            next_id,
            records,
            checksum,
        }
    }

    /// Check the format version and body checksum
    pub fn verify(&self) -> Result<()> {
        if self.format_version.major != FORMAT_VERSION.major {
            return Err(SchemaError::corrupt(format!(
                "unsupported snapshot format {} (expected {}.x)",
                self.format_version, FORMAT_VERSION.major
            )));
        }
        let computed = Checksum::of_serialized(&self.records);
        if computed != self.checksum {
            return Err(SchemaError::corrupt(format!(
                "checksum mismatch: expected {}, got {}",
                self.checksum, computed
            )));
        }
        Ok(())
    }
}

/// Serialize a snapshot image
pub fn write_image(mut writer: impl Write, image: &SnapshotImage, pretty: bool) -> Result<()> {
    if pretty {
        serde_json::to_writer_pretty(&mut writer, image)?;
    } else {
        serde_json::to_writer(&mut writer, image)?;
    }
    writer.flush()?;
    Ok(())
}

/// Deserialize and verify a snapshot image
///
/// Malformed input is reported as [`SchemaError::CorruptSnapshot`]; only read
/// failures of the underlying source surface as IO errors.
pub fn read_image(reader: impl Read) -> Result<SnapshotImage> {
    let image: SnapshotImage = serde_json::from_reader(reader).map_err(|e| {
        if e.is_io() {
            SchemaError::Json(e)
        } else {
            SchemaError::corrupt(format!("malformed snapshot: {}", e))
        }
    })?;
    image.verify()?;
    Ok(image)
}

/// Save a registry to `path`, replacing any existing file atomically
pub fn save_to_path(registry: &SchemaRegistry, path: impl AsRef<Path>, pretty: bool) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let tmp_path = temp_path(path)?;
    {
        let file = File::create(&tmp_path)?;
        let mut writer = BufWriter::new(file);
        registry.save_snapshot(&mut writer, pretty)?;
        writer.get_ref().sync_all()?;
    }
    fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Sibling path the snapshot is staged in before the rename
fn temp_path(path: &Path) -> Result<PathBuf> {
    let mut name = path
        .file_name()
        .ok_or_else(|| {
            SchemaError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("snapshot path {} has no file name", path.display()),
            ))
        })?
        .to_os_string();
    name.push(".tmp");
    Ok(path.with_file_name(name))
}

/// Load a registry from `path` into `registry`
pub fn load_from_path(registry: &mut SchemaRegistry, path: impl AsRef<Path>) -> Result<()> {
    let file = File::open(path.as_ref())?;
    registry.load_snapshot(BufReader::new(file))
}
