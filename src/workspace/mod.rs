//! Per-job workspace layout and file handling
//!
//! Every job owns one directory tree under the data root:
//!
//! ```text
//! <data_root>/<job_id>/
//!   job/request.md
//!   job/execution-plan.json
//!   inputs/                  uploaded files, immutable after creation
//!   outputs/                 agent-written results, the verification surface
//!   logs/agent-last-message.md
//!   bundle/manifest.json
//!   bundle/result.zip
//! ```
//!
//! Upload names are reduced to a sanitized basename; collisions get a
//! numeric suffix. Inputs are hashed at creation and re-hashed before
//! packaging to detect tampering.

pub mod bundle;

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

use crate::humanize::ByteSize;

pub use bundle::{BundleManifest, BundleOutcome, ManifestEntry};

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("empty upload: {0}")]
    EmptyUpload(String),

    #[error("upload '{name}' is {size} bytes, cap is {max}")]
    UploadTooLarge { name: String, size: u64, max: ByteSize },

    #[error("bundle error: {0}")]
    Bundle(#[from] zip::result::ZipError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, WorkspaceError>;

/// Creates and opens per-job workspaces under a writable root.
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    data_root: PathBuf,
    max_upload_bytes: ByteSize,
}

impl WorkspaceManager {
    /// Use `configured_root` when it is writable, otherwise fall back to a
    /// process-scoped directory under the system temp dir.
    pub fn new(configured_root: &Path, max_upload_bytes: ByteSize) -> Self {
        let data_root = match ensure_writable(configured_root) {
            Ok(()) => configured_root.to_path_buf(),
            Err(err) => {
                let fallback = std::env::temp_dir()
                    .join("agentbox")
                    .join(format!("data-{}", std::process::id()));
                warn!(
                    configured = %configured_root.display(),
                    fallback = %fallback.display(),
                    error = %err,
                    "Data root not writable, using process-scoped fallback"
                );
                fallback
            }
        };
        Self {
            data_root,
            max_upload_bytes,
        }
    }

    pub fn data_root(&self) -> &Path {
        &self.data_root
    }

    pub fn max_upload_bytes(&self) -> ByteSize {
        self.max_upload_bytes
    }

    /// Create the full directory layout for a new job.
    pub fn create(&self, job_id: &str) -> Result<Workspace> {
        let workspace = Workspace {
            root: self.data_root.join(job_id),
            max_upload_bytes: self.max_upload_bytes,
        };
        for dir in [
            workspace.job_dir(),
            workspace.inputs_dir(),
            workspace.outputs_dir(),
            workspace.logs_dir(),
            workspace.bundle_dir(),
        ] {
            std::fs::create_dir_all(dir)?;
        }
        debug!(job_id, root = %workspace.root.display(), "Workspace created");
        Ok(workspace)
    }

    /// Open an existing workspace by its recorded absolute path.
    pub fn open(&self, workspace_dir: &str) -> Workspace {
        Workspace {
            root: PathBuf::from(workspace_dir),
            max_upload_bytes: self.max_upload_bytes,
        }
    }
}

/// Metadata recorded for a persisted upload.
#[derive(Debug, Clone)]
pub struct StoredInput {
    pub file_name: String,
    pub size_bytes: u64,
    pub sha256: String,
}

/// One job's directory tree.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
    max_upload_bytes: ByteSize,
}

impl Workspace {
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn job_dir(&self) -> PathBuf {
        self.root.join("job")
    }

    pub fn inputs_dir(&self) -> PathBuf {
        self.root.join("inputs")
    }

    pub fn outputs_dir(&self) -> PathBuf {
        self.root.join("outputs")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn bundle_dir(&self) -> PathBuf {
        self.root.join("bundle")
    }

    pub fn request_path(&self) -> PathBuf {
        self.job_dir().join("request.md")
    }

    pub fn plan_path(&self) -> PathBuf {
        self.job_dir().join("execution-plan.json")
    }

    pub fn last_message_path(&self) -> PathBuf {
        self.logs_dir().join("agent-last-message.md")
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.bundle_dir().join("manifest.json")
    }

    pub fn bundle_path(&self) -> PathBuf {
        self.bundle_dir().join("result.zip")
    }

    /// Persist one upload into `inputs/`. Rejects empty files, enforces the
    /// per-file cap, sanitizes the name, and resolves collisions with a
    /// numeric suffix. Returns the final name plus size and digest.
    pub fn store_input(&self, original_name: &str, content: &[u8]) -> Result<StoredInput> {
        if content.is_empty() {
            return Err(WorkspaceError::EmptyUpload(original_name.to_string()));
        }
        let max = self.max_upload_bytes;
        if content.len() as u64 > max.as_u64() {
            return Err(WorkspaceError::UploadTooLarge {
                name: original_name.to_string(),
                size: content.len() as u64,
                max,
            });
        }

        let sanitized = sanitize_filename(original_name);
        let file_name = unique_name(&self.inputs_dir(), &sanitized);
        std::fs::write(self.inputs_dir().join(&file_name), content)?;

        Ok(StoredInput {
            file_name,
            size_bytes: content.len() as u64,
            sha256: sha256_hex(content),
        })
    }

    pub fn write_request(&self, requirement: &str) -> Result<()> {
        std::fs::write(self.request_path(), requirement)?;
        Ok(())
    }

    pub fn write_plan(&self, plan_json: &serde_json::Value) -> Result<()> {
        std::fs::write(self.plan_path(), serde_json::to_vec_pretty(plan_json)?)?;
        Ok(())
    }

    pub fn write_last_message(&self, text: &str) -> Result<()> {
        std::fs::write(self.last_message_path(), text)?;
        Ok(())
    }

    /// Current `(file_name, sha256)` pairs for everything under `inputs/`,
    /// sorted by name.
    pub fn hash_inputs(&self) -> Result<Vec<(String, String)>> {
        let mut out = Vec::new();
        for entry in std::fs::read_dir(self.inputs_dir())? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                let digest = sha256_file(&entry.path())?;
                out.push((entry.file_name().to_string_lossy().to_string(), digest));
            }
        }
        out.sort();
        Ok(out)
    }
}

/// Reduce an upload name to a safe basename: path components dropped,
/// control characters stripped, everything outside `[A-Za-z0-9._-]`
/// replaced by `_`. An empty result becomes `file`.
pub fn sanitize_filename(name: &str) -> String {
    let basename = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(name)
        .trim()
        .trim_matches('.');

    let mut out = String::with_capacity(basename.len());
    for c in basename.chars() {
        if c.is_control() {
            continue;
        }
        if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
            out.push(c);
        } else {
            out.push('_');
        }
    }

    if out.is_empty() || out.chars().all(|c| c == '.') {
        "file".to_string()
    } else {
        out
    }
}

/// Append `_1`, `_2`, … before the extension until the name is free in `dir`.
fn unique_name(dir: &Path, name: &str) -> String {
    if !dir.join(name).exists() {
        return name.to_string();
    }

    let (stem, ext) = match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem.to_string(), Some(ext.to_string())),
        _ => (name.to_string(), None),
    };

    for i in 1.. {
        let candidate = match &ext {
            Some(ext) => format!("{stem}_{i}.{ext}"),
            None => format!("{stem}_{i}"),
        };
        if !dir.join(&candidate).exists() {
            return candidate;
        }
    }
    unreachable!()
}

/// Extension-based mime type for catalog rows. Unknown extensions fall back
/// to `application/octet-stream`.
pub fn mime_for_name(name: &str) -> &'static str {
    let extension = name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "md" => "text/markdown",
        "txt" => "text/plain",
        "csv" => "text/csv",
        "tsv" => "text/tab-separated-values",
        "html" | "htm" => "text/html",
        "json" | "jsonl" => "application/json",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "pptx" => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        _ => "application/octet-stream",
    }
}

pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex_encode(&hasher.finalize())
}

pub fn sha256_file(path: &Path) -> std::io::Result<String> {
    let mut hasher = Sha256::new();
    let mut file = std::fs::File::open(path)?;
    std::io::copy(&mut file, &mut hasher)?;
    Ok(hex_encode(&hasher.finalize()))
}

fn hex_encode(digest: &[u8]) -> String {
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

fn ensure_writable(root: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(root)?;
    let probe = root.join(".write-probe");
    std::fs::write(&probe, b"ok")?;
    std::fs::remove_file(&probe)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn manager() -> (WorkspaceManager, TempDir) {
        let temp = TempDir::new().unwrap();
        let manager = WorkspaceManager::new(temp.path(), ByteSize(1024));
        (manager, temp)
    }

    #[test]
    fn creates_full_layout() {
        let (manager, _temp) = manager();
        let ws = manager.create("j1").unwrap();

        assert!(ws.job_dir().is_dir());
        assert!(ws.inputs_dir().is_dir());
        assert!(ws.outputs_dir().is_dir());
        assert!(ws.logs_dir().is_dir());
        assert!(ws.bundle_dir().is_dir());
    }

    #[test]
    fn sanitizes_hostile_names() {
        assert_eq!(sanitize_filename("report.csv"), "report.csv");
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("C:\\Users\\x\\notes.txt"), "notes.txt");
        assert_eq!(sanitize_filename("weird name (1).csv"), "weird_name__1_.csv");
        assert_eq!(sanitize_filename("tab\there"), "tabhere");
        assert_eq!(sanitize_filename("...."), "file");
        assert_eq!(sanitize_filename(""), "file");
    }

    #[test]
    fn collisions_get_numeric_suffix() {
        let (manager, _temp) = manager();
        let ws = manager.create("j1").unwrap();

        let first = ws.store_input("data.csv", b"a,b\n1,2\n").unwrap();
        let second = ws.store_input("data.csv", b"c,d\n3,4\n").unwrap();
        let third = ws.store_input("data.csv", b"e,f\n5,6\n").unwrap();

        assert_eq!(first.file_name, "data.csv");
        assert_eq!(second.file_name, "data_1.csv");
        assert_eq!(third.file_name, "data_2.csv");
        assert!(ws.inputs_dir().join("data_2.csv").is_file());
    }

    #[test]
    fn rejects_empty_and_oversized_uploads() {
        let (manager, _temp) = manager();
        let ws = manager.create("j1").unwrap();

        assert!(matches!(
            ws.store_input("empty.txt", b""),
            Err(WorkspaceError::EmptyUpload(_))
        ));

        let big = vec![0u8; 2048];
        assert!(matches!(
            ws.store_input("big.bin", &big),
            Err(WorkspaceError::UploadTooLarge { .. })
        ));
    }

    #[test]
    fn input_hashes_are_stable() {
        let (manager, _temp) = manager();
        let ws = manager.create("j1").unwrap();

        let stored = ws.store_input("a.txt", b"hello").unwrap();
        let hashes = ws.hash_inputs().unwrap();
        assert_eq!(hashes.len(), 1);
        assert_eq!(hashes[0].0, "a.txt");
        assert_eq!(hashes[0].1, stored.sha256);

        // Well-known digest of "hello"
        assert_eq!(
            stored.sha256,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn falls_back_when_root_unwritable() {
        let manager =
            WorkspaceManager::new(Path::new("/proc/definitely-not-writable"), ByteSize(1024));
        assert_ne!(
            manager.data_root(),
            Path::new("/proc/definitely-not-writable")
        );
        let ws = manager.create("j1").unwrap();
        assert!(ws.inputs_dir().is_dir());
        let _ = std::fs::remove_dir_all(manager.data_root());
    }
}
