// Backup Archive - snapshot files, manifest and tar/gzip packing
//
// Layout inside the archive:
//   manifest.json                       per-file SHA-256 plus counts
//   graph.json                          full / incremental / differential
//   nodes_<label>.json, relationships.json   export

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;

use super::types::{BackupError, BackupKind};
use crate::store::{EntityType, NodeRecord, RelationshipRecord};

pub(crate) const MANIFEST_FILE: &str = "manifest.json";
pub(crate) const GRAPH_FILE: &str = "graph.json";
pub(crate) const RELATIONSHIPS_FILE: &str = "relationships.json";
const OTHER_NODES: &str = "other";

/// `manifest.json`: what the archive holds and the checksum of each file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    /// Backup the archive belongs to
    pub backup_id: String,
    /// Snapshot kind
    pub kind: BackupKind,
    /// When the snapshot was written
    pub created_at: DateTime<Utc>,
    /// Present for delta snapshots; `None` means the snapshot is complete
    pub since: Option<DateTime<Utc>>,
    /// Nodes in the snapshot
    pub node_count: u64,
    /// Relationships in the snapshot
    pub relationship_count: u64,
    /// File name -> SHA-256 hex
    pub files: BTreeMap<String, String>,
}

/// Nodes and relationships exported from a store
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphDump {
    /// Exported nodes
    pub nodes: Vec<NodeRecord>,
    /// Exported relationships
    pub relationships: Vec<RelationshipRecord>,
}

/// Hex-encoded SHA-256 digest
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

fn io_err(context: &str, e: impl std::fmt::Display) -> BackupError {
    BackupError::IoError(format!("{}: {}", context, e))
}

fn write_json<T: Serialize>(
    dir: &Path,
    name: &str,
    value: &T,
    files: &mut BTreeMap<String, String>,
) -> Result<(), BackupError> {
    let bytes = serde_json::to_vec(value)
        .map_err(|e| BackupError::SerializationError(format!("{}: {}", name, e)))?;
    fs::write(dir.join(name), &bytes).map_err(|e| io_err("Failed to write snapshot file", e))?;
    files.insert(name.to_string(), sha256_hex(&bytes));
    Ok(())
}

/// Primary entity type used to bucket a node in export dumps
fn export_bucket(node: &NodeRecord) -> String {
    node.labels
        .iter()
        .find_map(|l| l.parse::<EntityType>().ok())
        .map(|t| t.label().to_lowercase())
        .unwrap_or_else(|| OTHER_NODES.to_string())
}

/// Write the snapshot files and manifest into `dir`
pub fn write_snapshot(
    dir: &Path,
    backup_id: &str,
    kind: BackupKind,
    since: Option<DateTime<Utc>>,
    dump: &GraphDump,
) -> Result<Manifest, BackupError> {
    fs::create_dir_all(dir).map_err(|e| io_err("Failed to create staging directory", e))?;
    let mut files = BTreeMap::new();

    if kind == BackupKind::Export {
        let mut buckets: BTreeMap<String, Vec<&NodeRecord>> = BTreeMap::new();
        for node in &dump.nodes {
            buckets.entry(export_bucket(node)).or_default().push(node);
        }
        for (bucket, nodes) in &buckets {
            write_json(dir, &format!("nodes_{}.json", bucket), nodes, &mut files)?;
        }
        write_json(dir, RELATIONSHIPS_FILE, &dump.relationships, &mut files)?;
    } else {
        write_json(dir, GRAPH_FILE, dump, &mut files)?;
    }

    let manifest = Manifest {
        backup_id: backup_id.to_string(),
        kind,
        created_at: Utc::now(),
        since,
        node_count: dump.nodes.len() as u64,
        relationship_count: dump.relationships.len() as u64,
        files,
    };
    let bytes = serde_json::to_vec_pretty(&manifest)
        .map_err(|e| BackupError::SerializationError(format!("manifest: {}", e)))?;
    fs::write(dir.join(MANIFEST_FILE), bytes).map_err(|e| io_err("Failed to write manifest", e))?;

    Ok(manifest)
}

/// Tar every file in `dir`, gzip-compressed when `compression_level > 0`
pub fn pack(dir: &Path, compression_level: u32) -> Result<Vec<u8>, BackupError> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .map_err(|e| io_err("Failed to read staging directory", e))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_file())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .collect();
    names.sort();

    fn append_all<W: std::io::Write>(
        builder: &mut tar::Builder<W>,
        dir: &Path,
        names: &[String],
    ) -> Result<(), BackupError> {
        for name in names {
            builder
                .append_path_with_name(dir.join(name), name)
                .map_err(|e| BackupError::ArchiveError(format!("Failed to add {}: {}", name, e)))?;
        }
        Ok(())
    }

    if compression_level == 0 {
        let mut builder = tar::Builder::new(Vec::new());
        append_all(&mut builder, dir, &names)?;
        builder
            .into_inner()
            .map_err(|e| BackupError::ArchiveError(format!("Failed to finish archive: {}", e)))
    } else {
        let encoder = GzEncoder::new(Vec::new(), Compression::new(compression_level.min(9)));
        let mut builder = tar::Builder::new(encoder);
        append_all(&mut builder, dir, &names)?;
        builder
            .into_inner()
            .and_then(|encoder| encoder.finish())
            .map_err(|e| BackupError::ArchiveError(format!("Failed to finish archive: {}", e)))
    }
}

/// Extract an archive produced by [`pack`] into `dest`
pub fn unpack(bytes: &[u8], compressed: bool, dest: &Path) -> Result<(), BackupError> {
    fs::create_dir_all(dest).map_err(|e| io_err("Failed to create scratch directory", e))?;
    let result = if compressed {
        tar::Archive::new(GzDecoder::new(bytes)).unpack(dest)
    } else {
        tar::Archive::new(bytes).unpack(dest)
    };
    result.map_err(|e| BackupError::ArchiveError(format!("Archive unreadable: {}", e)))
}

/// Re-hash every file listed in the manifest
pub fn verify_dir(dir: &Path) -> Result<Manifest, BackupError> {
    let raw = fs::read(dir.join(MANIFEST_FILE))
        .map_err(|e| BackupError::VerificationError(format!("Manifest missing: {}", e)))?;
    let manifest: Manifest = serde_json::from_slice(&raw)
        .map_err(|e| BackupError::VerificationError(format!("Manifest unreadable: {}", e)))?;

    for (name, expected) in &manifest.files {
        let bytes = fs::read(dir.join(name))
            .map_err(|e| BackupError::VerificationError(format!("{} missing: {}", name, e)))?;
        let actual = sha256_hex(&bytes);
        if &actual != expected {
            return Err(BackupError::VerificationError(format!(
                "{} checksum mismatch (expected {}, found {})",
                name, expected, actual
            )));
        }
    }

    Ok(manifest)
}

/// Read the graph back out of a verified snapshot directory
pub fn load_snapshot(dir: &Path, manifest: &Manifest) -> Result<GraphDump, BackupError> {
    fn read<T: serde::de::DeserializeOwned>(dir: &Path, name: &str) -> Result<T, BackupError> {
        let bytes = fs::read(dir.join(name)).map_err(|e| io_err("Failed to read snapshot", e))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| BackupError::SerializationError(format!("{}: {}", name, e)))
    }

    if manifest.files.contains_key(GRAPH_FILE) {
        return read(dir, GRAPH_FILE);
    }

    let mut dump = GraphDump::default();
    let mut seen = HashSet::new();
    for name in manifest.files.keys() {
        if name.starts_with("nodes_") {
            let nodes: Vec<NodeRecord> = read(dir, name)?;
            dump.nodes
                .extend(nodes.into_iter().filter(|n| seen.insert(n.id.clone())));
        }
    }
    if manifest.files.contains_key(RELATIONSHIPS_FILE) {
        dump.relationships = read(dir, RELATIONSHIPS_FILE)?;
    }
    Ok(dump)
}
