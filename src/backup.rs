//! Workspace snapshots: a zip holding the database and a manifest with its
//! SHA-256, taken before destructive fixes since those have no rollback.

use anyhow::{anyhow, Context};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::db::DB_FILE;

const MANIFEST_ENTRY: &str = "manifest.json";
const DB_ENTRY: &str = "db/attendanced.sqlite3";
pub const SNAPSHOT_FORMAT: &str = "attendanced-snapshot-v1";

#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub format: String,
    pub sha256: String,
    pub bytes: u64,
}

#[derive(Debug, Clone)]
pub struct ImportSummary {
    pub format: String,
    pub sha256: String,
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn read_all(path: &Path) -> anyhow::Result<Vec<u8>> {
    let mut buf = Vec::new();
    File::open(path)
        .with_context(|| format!("failed to open {}", path.to_string_lossy()))?
        .read_to_end(&mut buf)
        .with_context(|| format!("failed to read {}", path.to_string_lossy()))?;
    Ok(buf)
}

pub fn export_snapshot(workspace_path: &Path, out_path: &Path) -> anyhow::Result<ExportSummary> {
    let db_path = workspace_path.join(DB_FILE);
    if !db_path.is_file() {
        return Err(anyhow!(
            "workspace database not found: {}",
            db_path.to_string_lossy()
        ));
    }
    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.to_string_lossy()))?;
    }

    let db_bytes = read_all(&db_path)?;
    let sha256 = hex(&Sha256::digest(&db_bytes));

    let out_file = File::create(out_path)
        .with_context(|| format!("failed to create output file {}", out_path.to_string_lossy()))?;
    let mut zip = ZipWriter::new(out_file);
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let manifest = json!({
        "format": SNAPSHOT_FORMAT,
        "appVersion": env!("CARGO_PKG_VERSION"),
        "exportedAt": chrono::Utc::now().to_rfc3339(),
        "dbEntry": DB_ENTRY,
        "dbSha256": sha256,
        "dbBytes": db_bytes.len(),
    });
    zip.start_file(MANIFEST_ENTRY, opts)
        .context("failed to start manifest entry")?;
    zip.write_all(
        serde_json::to_string_pretty(&manifest)
            .context("failed to serialize manifest")?
            .as_bytes(),
    )
    .context("failed to write manifest entry")?;

    zip.start_file(DB_ENTRY, opts)
        .context("failed to start database entry")?;
    zip.write_all(&db_bytes)
        .context("failed to write database entry")?;
    zip.finish().context("failed to finalize snapshot")?;

    tracing::info!(path = %out_path.display(), bytes = db_bytes.len(), "snapshot exported");
    Ok(ExportSummary {
        format: SNAPSHOT_FORMAT.to_string(),
        sha256,
        bytes: db_bytes.len() as u64,
    })
}

/// Restores a snapshot over the workspace database. The database entry is
/// checked against the manifest before anything is replaced.
pub fn import_snapshot(in_path: &Path, workspace_path: &Path) -> anyhow::Result<ImportSummary> {
    let in_file = File::open(in_path)
        .with_context(|| format!("failed to open snapshot {}", in_path.to_string_lossy()))?;
    let mut archive = ZipArchive::new(in_file).context("invalid zip archive")?;

    let mut manifest_text = String::new();
    archive
        .by_name(MANIFEST_ENTRY)
        .context("snapshot missing manifest.json")?
        .read_to_string(&mut manifest_text)
        .context("failed to read manifest.json")?;
    let manifest: serde_json::Value =
        serde_json::from_str(&manifest_text).context("manifest.json is invalid JSON")?;
    let format = manifest.get("format").and_then(|v| v.as_str()).unwrap_or("");
    if format != SNAPSHOT_FORMAT {
        return Err(anyhow!("unsupported snapshot format: {}", format));
    }
    let expected = manifest
        .get("dbSha256")
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow!("manifest.json has no dbSha256"))?
        .to_string();

    let mut db_bytes = Vec::new();
    archive
        .by_name(DB_ENTRY)
        .with_context(|| format!("snapshot missing {}", DB_ENTRY))?
        .read_to_end(&mut db_bytes)
        .context("failed to extract database entry")?;
    let actual = hex(&Sha256::digest(&db_bytes));
    if actual != expected {
        return Err(anyhow!(
            "database checksum mismatch: manifest {} but entry hashes to {}",
            expected,
            actual
        ));
    }

    std::fs::create_dir_all(workspace_path).with_context(|| {
        format!("failed to create workspace {}", workspace_path.to_string_lossy())
    })?;
    let dst = workspace_path.join(DB_FILE);
    let tmp_dst = workspace_path.join(format!("{}.importing", DB_FILE));
    {
        let mut out = File::create(&tmp_dst).with_context(|| {
            format!("failed to create temp database {}", tmp_dst.to_string_lossy())
        })?;
        out.write_all(&db_bytes)
            .context("failed to write extracted database")?;
        out.flush().context("failed to flush extracted database")?;
    }
    if dst.exists() {
        std::fs::remove_file(&dst).with_context(|| {
            format!("failed to remove existing database {}", dst.to_string_lossy())
        })?;
    }
    std::fs::rename(&tmp_dst, &dst)
        .with_context(|| format!("failed to move extracted database to {}", dst.to_string_lossy()))?;

    tracing::info!(path = %in_path.display(), "snapshot imported");
    Ok(ImportSummary {
        format: SNAPSHOT_FORMAT.to_string(),
        sha256: actual,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn temp_dir(prefix: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("{}-{}", prefix, uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).expect("create temp dir");
        dir
    }

    #[test]
    fn tampered_database_is_rejected() {
        let ws = temp_dir("attendanced-snap");
        drop(crate::db::open_db(&ws).expect("open db"));
        let bundle = ws.join("snap.zip");
        export_snapshot(&ws, &bundle).expect("export");

        // Rewrite the bundle with a different database body but the old manifest.
        let mut archive = ZipArchive::new(File::open(&bundle).expect("open")).expect("zip");
        let mut manifest = String::new();
        archive
            .by_name(MANIFEST_ENTRY)
            .expect("manifest")
            .read_to_string(&mut manifest)
            .expect("read");
        let forged = ws.join("forged.zip");
        let mut zip = ZipWriter::new(File::create(&forged).expect("create"));
        zip.start_file(MANIFEST_ENTRY, FileOptions::default())
            .expect("start");
        zip.write_all(manifest.as_bytes()).expect("write");
        zip.start_file(DB_ENTRY, FileOptions::default()).expect("start");
        zip.write_all(b"not a database").expect("write");
        zip.finish().expect("finish");

        let target = temp_dir("attendanced-snap-target");
        let e = import_snapshot(&forged, &target).expect_err("checksum must fail");
        assert!(e.to_string().contains("checksum mismatch"));
        assert!(!target.join(DB_FILE).exists());

        let ok = import_snapshot(&bundle, &target).expect("import");
        assert_eq!(ok.format, SNAPSHOT_FORMAT);
        assert!(target.join(DB_FILE).is_file());
    }
}
