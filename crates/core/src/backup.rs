//! C3 — Backup Store.
//!
//! Content-addressed multi-file snapshots with manifests and integrity
//! checks (§4.3). Grounded on `apply-patch/src/lib.rs`'s atomic-write
//! conventions and on `examples/Rul1an-assay/crates/assay-registry/src/cache.rs`'s
//! metadata-alongside-content layout and integrity-verification-on-read
//! pattern (there applied to a registry pack cache; here to a backup
//! snapshot).

use std::io::Write as _;
use std::path::{Path, PathBuf};

use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::types::{BackupManifest, BackupManifestEntry};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreReport {
    pub backup_id: String,
    pub restored_files: Vec<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestSummary {
    pub backup_id: String,
    pub created_at: chrono::DateTime<Utc>,
    pub file_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub backup_id: String,
    pub ok: bool,
    pub mismatched_entries: Vec<PathBuf>,
}

const MANIFEST_FILE: &str = "manifest.json";
const MANIFEST_TMP_FILE: &str = "manifest.json.tmp";

/// `root` is the backup store's root directory (default
/// `<project>/.backups`, §4.3). `project_root` is used to compute each
/// file's relative path inside the backup directory.
pub struct BackupStore {
    root: PathBuf,
    project_root: PathBuf,
}

impl BackupStore {
    pub fn new(root: PathBuf, project_root: PathBuf) -> Self {
        Self { root, project_root }
    }

    /// `begin(files[]) -> backup_id`. Atomically copies every listed file
    /// into the backup directory and writes a temporary manifest; on any
    /// copy failure the partial backup is discarded.
    pub fn begin(&self, files: &[PathBuf]) -> Result<String> {
        let backup_id = new_backup_id();
        let dir = self.root.join(&backup_id);
        std::fs::create_dir_all(&dir)?;

        let mut entries = Vec::with_capacity(files.len());
        for file in files {
            if let Err(err) = self.copy_one(file, &dir, &mut entries) {
                let _ = std::fs::remove_dir_all(&dir);
                return Err(err);
            }
        }

        let manifest = BackupManifest {
            backup_id: backup_id.clone(),
            created_at: Utc::now(),
            entries,
        };
        let tmp_path = dir.join(MANIFEST_TMP_FILE);
        let mut tmp_file = std::fs::File::create(&tmp_path)?;
        tmp_file.write_all(serde_json::to_string_pretty(&manifest)?.as_bytes())?;
        tmp_file.sync_all()?;

        info!(backup_id = %backup_id, files = files.len(), "backup begun");
        Ok(backup_id)
    }

    fn copy_one(
        &self,
        file: &Path,
        dir: &Path,
        entries: &mut Vec<BackupManifestEntry>,
    ) -> Result<()> {
        let relative = relative_to(&self.project_root, file);
        let dest = dir.join(&relative);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let bytes = std::fs::read(file)?;
        let sha256 = hex_sha256(&bytes);
        std::fs::write(&dest, &bytes)?;

        #[cfg(unix)]
        let original_mode = {
            use std::os::unix::fs::PermissionsExt;
            std::fs::metadata(file)?.permissions().mode()
        };
        #[cfg(not(unix))]
        let original_mode = 0o644;

        entries.push(BackupManifestEntry {
            relative_path: relative,
            sha256,
            size: bytes.len() as u64,
            original_mode,
        });
        Ok(())
    }

    /// `commit(backup_id)`: rename the temporary manifest to its final name,
    /// making the backup visible to `list`/`restore`.
    pub fn commit(&self, backup_id: &str) -> Result<()> {
        let dir = self.root.join(backup_id);
        let tmp = dir.join(MANIFEST_TMP_FILE);
        let final_path = dir.join(MANIFEST_FILE);
        std::fs::rename(&tmp, &final_path)?;
        info!(backup_id, "backup committed");
        Ok(())
    }

    /// `restore(backup_id) -> RestoreReport`. Verifies each entry's hash
    /// against the stored file before writing it back; any mismatch aborts
    /// with `IntegrityFailure`, leaving the working tree untouched.
    pub fn restore(&self, backup_id: &str) -> Result<RestoreReport> {
        let manifest = self.read_manifest(backup_id)?;
        let dir = self.root.join(backup_id);

        for entry in &manifest.entries {
            let stored = dir.join(&entry.relative_path);
            let bytes = std::fs::read(&stored)?;
            let actual = hex_sha256(&bytes);
            if actual != entry.sha256 {
                warn!(backup_id, relative_path = %entry.relative_path.display(), "integrity mismatch on restore");
                return Err(Error::IntegrityFailure {
                    backup_id: backup_id.to_string(),
                    relative_path: entry.relative_path.clone(),
                });
            }
        }

        let mut restored_files = Vec::with_capacity(manifest.entries.len());
        for entry in &manifest.entries {
            let stored = dir.join(&entry.relative_path);
            let bytes = std::fs::read(&stored)?;
            let target = self.project_root.join(&entry.relative_path);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&target, &bytes)?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let _ = std::fs::set_permissions(&target, std::fs::Permissions::from_mode(entry.original_mode));
            }
            restored_files.push(target);
        }

        info!(backup_id, files = restored_files.len(), "backup restored");
        Ok(RestoreReport { backup_id: backup_id.to_string(), restored_files })
    }

    /// `list() -> [ManifestSummary]`, ordered newest-first.
    pub fn list(&self) -> Result<Vec<ManifestSummary>> {
        let mut summaries = Vec::new();
        if !self.root.exists() {
            return Ok(summaries);
        }
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let backup_id = entry.file_name().to_string_lossy().to_string();
            if let Ok(manifest) = self.read_manifest(&backup_id) {
                summaries.push(ManifestSummary {
                    backup_id: manifest.backup_id,
                    created_at: manifest.created_at,
                    file_count: manifest.entries.len(),
                });
            }
        }
        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(summaries)
    }

    /// `verify(backup_id) -> IntegrityReport`.
    pub fn verify(&self, backup_id: &str) -> Result<IntegrityReport> {
        let manifest = self.read_manifest(backup_id)?;
        let dir = self.root.join(backup_id);
        let mut mismatched = Vec::new();
        for entry in &manifest.entries {
            let stored = dir.join(&entry.relative_path);
            match std::fs::read(&stored) {
                Ok(bytes) if hex_sha256(&bytes) == entry.sha256 => {}
                _ => mismatched.push(entry.relative_path.clone()),
            }
        }
        Ok(IntegrityReport {
            backup_id: backup_id.to_string(),
            ok: mismatched.is_empty(),
            mismatched_entries: mismatched,
        })
    }

    fn read_manifest(&self, backup_id: &str) -> Result<BackupManifest> {
        let path = self.root.join(backup_id).join(MANIFEST_FILE);
        let text = std::fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

fn relative_to(base: &Path, target: &Path) -> PathBuf {
    target
        .strip_prefix(base)
        .map(Path::to_path_buf)
        .unwrap_or_else(|_| target.to_path_buf())
}

fn hex_sha256(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// `backup_id` format: `YYYYMMDDHHMMSS-<random-suffix>` (§6).
fn new_backup_id() -> String {
    let timestamp = Utc::now().format("%Y%m%d%H%M%S");
    let suffix: String = {
        let mut rng = rand::rng();
        (0..8)
            .map(|_| {
                let chars = b"abcdefghijklmnopqrstuvwxyz0123456789";
                chars[rng.random_range(0..chars.len())] as char
            })
            .collect()
    };
    format!("{timestamp}-{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    fn setup() -> (tempfile::TempDir, tempfile::TempDir, BackupStore) {
        let project = tempdir().unwrap();
        let backups = tempdir().unwrap();
        let store = BackupStore::new(backups.path().to_path_buf(), project.path().to_path_buf());
        (project, backups, store)
    }

    #[test]
    fn begin_commit_restore_round_trip_is_byte_identical() {
        let (project, _backups, store) = setup();
        let file = project.path().join("a.py");
        std::fs::write(&file, b"original content\n").unwrap();

        let backup_id = store.begin(&[file.clone()]).unwrap();
        store.commit(&backup_id).unwrap();

        std::fs::write(&file, b"mutated content\n").unwrap();
        store.restore(&backup_id).unwrap();

        assert_eq!(std::fs::read(&file).unwrap(), b"original content\n");
    }

    #[test]
    fn restore_detects_tampered_backup_and_leaves_tree_untouched() {
        let (project, backups, store) = setup();
        let file = project.path().join("a.py");
        std::fs::write(&file, b"original\n").unwrap();

        let backup_id = store.begin(&[file.clone()]).unwrap();
        store.commit(&backup_id).unwrap();

        // Tamper with the stored copy.
        let stored = backups.path().join(&backup_id).join("a.py");
        std::fs::write(&stored, b"tampered\n").unwrap();

        std::fs::write(&file, b"current working tree\n").unwrap();
        let result = store.restore(&backup_id);
        assert_matches!(result, Err(Error::IntegrityFailure { .. }));
        assert_eq!(std::fs::read(&file).unwrap(), b"current working tree\n");
    }

    #[test]
    fn list_orders_newest_first() {
        let (project, _backups, store) = setup();
        let file = project.path().join("a.py");
        std::fs::write(&file, b"x\n").unwrap();

        let first = store.begin(&[file.clone()]).unwrap();
        store.commit(&first).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(10));
        let second = store.begin(&[file.clone()]).unwrap();
        store.commit(&second).unwrap();

        let list = store.list().unwrap();
        assert_eq!(list[0].backup_id, second);
        assert_eq!(list[1].backup_id, first);
    }

    #[test]
    fn verify_reports_ok_for_untampered_backup() {
        let (project, _backups, store) = setup();
        let file = project.path().join("a.py");
        std::fs::write(&file, b"x\n").unwrap();
        let backup_id = store.begin(&[file]).unwrap();
        store.commit(&backup_id).unwrap();
        let report = store.verify(&backup_id).unwrap();
        assert!(report.ok);
    }

    #[test]
    fn backup_id_has_expected_shape() {
        let id = new_backup_id();
        let parts: Vec<&str> = id.splitn(2, '-').collect();
        assert_eq!(parts[0].len(), 14);
        assert!(parts[0].chars().all(|c| c.is_ascii_digit()));
        assert_eq!(parts[1].len(), 8);
    }
}
