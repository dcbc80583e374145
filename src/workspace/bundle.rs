//! Bundle emission: a deterministic manifest plus `result.zip`
//!
//! The zip carries everything under `outputs/`, the request and plan files,
//! and the agent's last message when present. `manifest.json` lists every
//! entry sorted by relative path with size and sha256, and is itself the
//! first file in the archive.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;
use walkdir::WalkDir;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use super::{Result, Workspace, sha256_file};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ManifestEntry {
    pub relative_path: String,
    pub size_bytes: u64,
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleManifest {
    pub job_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub generated_at: DateTime<Utc>,
    pub entries: Vec<ManifestEntry>,
}

#[derive(Debug)]
pub struct BundleOutcome {
    pub manifest: BundleManifest,
    pub zip_size_bytes: u64,
}

impl Workspace {
    /// Build `bundle/manifest.json` and `bundle/result.zip`.
    pub fn build_bundle(&self, job_id: &str, session_id: Option<&str>) -> Result<BundleOutcome> {
        let mut entries = Vec::new();

        for entry in WalkDir::new(self.outputs_dir())
            .follow_links(false)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(self.root())
                .unwrap_or(entry.path())
                .to_string_lossy()
                .replace('\\', "/");
            entries.push(manifest_entry(entry.path(), relative)?);
        }

        for path in [self.request_path(), self.plan_path(), self.last_message_path()] {
            if path.is_file() {
                let relative = path
                    .strip_prefix(self.root())
                    .unwrap_or(&path)
                    .to_string_lossy()
                    .replace('\\', "/");
                entries.push(manifest_entry(&path, relative)?);
            }
        }

        entries.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));

        let manifest = BundleManifest {
            job_id: job_id.to_string(),
            session_id: session_id.map(str::to_owned),
            generated_at: Utc::now(),
            entries,
        };

        let manifest_bytes = serde_json::to_vec_pretty(&manifest)?;
        std::fs::write(self.manifest_path(), &manifest_bytes)?;

        let zip_file = std::fs::File::create(self.bundle_path())?;
        let mut writer = ZipWriter::new(zip_file);
        let options = SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated);

        writer.start_file("manifest.json", options)?;
        writer.write_all(&manifest_bytes)?;

        for entry in &manifest.entries {
            writer.start_file(entry.relative_path.as_str(), options)?;
            let mut source = std::fs::File::open(self.root().join(&entry.relative_path))?;
            std::io::copy(&mut source, &mut writer)?;
        }

        let zip_file = writer.finish()?;
        let zip_size_bytes = zip_file.metadata()?.len();

        Ok(BundleOutcome {
            manifest,
            zip_size_bytes,
        })
    }
}

fn manifest_entry(path: &Path, relative_path: String) -> Result<ManifestEntry> {
    let metadata = std::fs::metadata(path)?;
    Ok(ManifestEntry {
        relative_path,
        size_bytes: metadata.len(),
        sha256: sha256_file(path)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::humanize::ByteSize;
    use crate::workspace::WorkspaceManager;
    use tempfile::TempDir;

    fn populated_workspace() -> (Workspace, TempDir) {
        let temp = TempDir::new().unwrap();
        let manager = WorkspaceManager::new(temp.path(), ByteSize(1024 * 1024));
        let ws = manager.create("j1").unwrap();

        ws.write_request("Summarize sales.csv into a report").unwrap();
        ws.write_plan(&serde_json::json!({"skill": "data-analysis"}))
            .unwrap();
        ws.write_last_message("done, see outputs/report.md").unwrap();
        std::fs::write(ws.outputs_dir().join("report.md"), "# Report\n").unwrap();
        std::fs::create_dir_all(ws.outputs_dir().join("charts")).unwrap();
        std::fs::write(ws.outputs_dir().join("charts/trend.csv"), "x,y\n1,2\n").unwrap();

        (ws, temp)
    }

    #[test]
    fn manifest_is_sorted_and_complete() {
        let (ws, _temp) = populated_workspace();
        let outcome = ws.build_bundle("j1", Some("s1")).unwrap();

        let paths: Vec<&str> = outcome
            .manifest
            .entries
            .iter()
            .map(|e| e.relative_path.as_str())
            .collect();
        assert_eq!(
            paths,
            vec![
                "job/execution-plan.json",
                "job/request.md",
                "logs/agent-last-message.md",
                "outputs/charts/trend.csv",
                "outputs/report.md",
            ]
        );
        assert_eq!(outcome.manifest.session_id.as_deref(), Some("s1"));
        assert!(outcome.zip_size_bytes > 0);
        assert!(ws.bundle_path().is_file());
        assert!(ws.manifest_path().is_file());
    }

    #[test]
    fn entries_match_on_disk_hashes() {
        let (ws, _temp) = populated_workspace();
        let outcome = ws.build_bundle("j1", None).unwrap();

        for entry in &outcome.manifest.entries {
            let on_disk = sha256_file(&ws.root().join(&entry.relative_path)).unwrap();
            assert_eq!(on_disk, entry.sha256, "{}", entry.relative_path);
            let size = std::fs::metadata(ws.root().join(&entry.relative_path))
                .unwrap()
                .len();
            assert_eq!(size, entry.size_bytes);
        }
    }

    #[test]
    fn files_outside_outputs_are_ignored() {
        let (ws, _temp) = populated_workspace();
        // A stray file at the workspace root is not part of the bundle
        std::fs::write(ws.root().join("scratch.txt"), "junk").unwrap();

        let outcome = ws.build_bundle("j1", None).unwrap();
        assert!(
            !outcome
                .manifest
                .entries
                .iter()
                .any(|e| e.relative_path.contains("scratch"))
        );
    }

    #[test]
    fn missing_last_message_is_tolerated() {
        let temp = TempDir::new().unwrap();
        let manager = WorkspaceManager::new(temp.path(), ByteSize(1024));
        let ws = manager.create("j2").unwrap();
        ws.write_request("req").unwrap();
        ws.write_plan(&serde_json::json!({})).unwrap();
        std::fs::write(ws.outputs_dir().join("out.txt"), "x").unwrap();

        let outcome = ws.build_bundle("j2", None).unwrap();
        assert!(
            !outcome
                .manifest
                .entries
                .iter()
                .any(|e| e.relative_path.starts_with("logs/"))
        );
    }
}
