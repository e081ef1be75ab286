//! Change detection and patch export, per spec.md §4.5 `ChangeSet`/`ExportPatch`.

use std::collections::HashMap;
use std::path::PathBuf;

use tracing::instrument;
use walkdir::WalkDir;

use crate::error::Result;
use crate::inode_fs::InodeFs;

use super::importer::ImportConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub path: String,
    pub kind: ChangeKind,
}

struct BaseEntry {
    size: u64,
    is_dir: bool,
}

fn walk_base(base_path: &std::path::Path) -> HashMap<String, BaseEntry> {
    let mut map = HashMap::new();
    for entry in WalkDir::new(base_path)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| e.file_name() != ".git")
        .filter_map(|e| e.ok())
    {
        let rel = match entry.path().strip_prefix(base_path) {
            Ok(r) if !r.as_os_str().is_empty() => r,
            _ => continue,
        };
        let rel = format!("/{}", rel.to_string_lossy().replace(std::path::MAIN_SEPARATOR, "/"));
        let is_dir = entry.file_type().is_dir();
        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        map.insert(rel, BaseEntry { size, is_dir });
    }
    map
}

/// Builds `relPath → host bytes` for any base entry, used to decide a
/// same-size "modified" by byte comparison.
fn read_base_bytes(base_path: &std::path::Path, rel: &str) -> Option<Vec<u8>> {
    let full: PathBuf = base_path.join(rel.trim_start_matches('/'));
    std::fs::read(full).ok()
}

async fn walk_fs(fs: &InodeFs, mount_path: &str) -> Result<Vec<String>> {
    let mut out = Vec::new();
    let mut stack = vec![mount_path.to_string()];
    while let Some(dir) = stack.pop() {
        let entries = match fs.readdir_plus(&dir).await {
            Ok(entries) => entries,
            Err(_) => continue,
        };
        for (name, stat) in entries {
            let child = if dir == "/" { format!("/{name}") } else { format!("{dir}/{name}") };
            if stat.is_directory() {
                stack.push(child);
            } else {
                out.push(child);
            }
        }
    }
    Ok(out)
}

/// Relativizes an absolute FS path (under `mount_path`) to the same key
/// space `walk_base` produces.
fn relativize(mount_path: &str, fs_path: &str) -> String {
    if mount_path == "/" {
        fs_path.to_string()
    } else {
        fs_path.strip_prefix(mount_path).unwrap_or(fs_path).to_string()
    }
}

#[instrument(skip(fs, config), err)]
pub async fn change_set(fs: &InodeFs, config: &ImportConfig) -> Result<Vec<Change>> {
    let base = walk_base(&config.base_path);
    let fs_paths = walk_fs(fs, &config.mount_path).await?;

    let mut changes = Vec::new();
    let mut seen = std::collections::HashSet::new();

    for fs_path in &fs_paths {
        let rel = relativize(&config.mount_path, fs_path);
        seen.insert(rel.clone());

        match base.get(&rel) {
            None => changes.push(Change { path: rel, kind: ChangeKind::Added }),
            Some(entry) if entry.is_dir => {
                // base had a directory where the FS now has a file; treat as modified.
                changes.push(Change { path: rel, kind: ChangeKind::Modified });
            }
            Some(entry) => {
                let fs_bytes = fs.read_file(fs_path).await?;
                let differs = if fs_bytes.len() as u64 != entry.size {
                    true
                } else {
                    read_base_bytes(&config.base_path, &rel)
                        .map(|base_bytes| base_bytes != fs_bytes)
                        .unwrap_or(true)
                };
                if differs {
                    changes.push(Change { path: rel, kind: ChangeKind::Modified });
                }
            }
        }
    }

    for (rel, entry) in &base {
        if !entry.is_dir && !seen.contains(rel) {
            changes.push(Change { path: rel.clone(), kind: ChangeKind::Deleted });
        }
    }

    Ok(changes)
}

/// Emits a coarse unified-diff-style patch: the whole old file as `-` lines
/// followed by the whole new file as `+` lines. Not a minimal LCS diff —
/// see spec.md §9's open question on diff fidelity, resolved in DESIGN.md.
#[instrument(skip(fs, config, changes), err)]
pub async fn export_patch(fs: &InodeFs, config: &ImportConfig, changes: &[Change]) -> Result<String> {
    let mut out = String::new();

    for change in changes {
        let fs_path = if config.mount_path == "/" {
            change.path.clone()
        } else {
            format!("{}{}", config.mount_path, change.path)
        };

        let (old_lines, new_lines): (Vec<String>, Vec<String>) = match change.kind {
            ChangeKind::Added => {
                let new = fs.read_file(&fs_path).await.unwrap_or_default();
                (vec![], to_lines(&new))
            }
            ChangeKind::Deleted => {
                let old = read_base_bytes(&config.base_path, &change.path).unwrap_or_default();
                (to_lines(&old), vec![])
            }
            ChangeKind::Modified => {
                let old = read_base_bytes(&config.base_path, &change.path).unwrap_or_default();
                let new = fs.read_file(&fs_path).await.unwrap_or_default();
                (to_lines(&old), to_lines(&new))
            }
        };

        let a = if change.kind == ChangeKind::Added { "/dev/null".to_string() } else { format!("a{}", change.path) };
        let b = if change.kind == ChangeKind::Deleted { "/dev/null".to_string() } else { format!("b{}", change.path) };

        out.push_str(&format!("diff --git a{path} b{path}\n", path = change.path));
        out.push_str(&format!("--- {a}\n"));
        out.push_str(&format!("+++ {b}\n"));
        out.push_str(&format!("@@ -1,{} +1,{} @@\n", old_lines.len(), new_lines.len()));
        for line in &old_lines {
            out.push_str("-");
            out.push_str(line);
            out.push('\n');
        }
        for line in &new_lines {
            out.push_str("+");
            out.push_str(line);
            out.push('\n');
        }
    }

    Ok(out)
}

fn to_lines(bytes: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(bytes).lines().map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;
    use tempfile::tempdir;

    #[tokio::test]
    async fn s6_change_set_classifies_added_modified_deleted() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"original").unwrap();
        std::fs::create_dir(dir.path().join("b")).unwrap();
        std::fs::write(dir.path().join("b/c.txt"), b"keep-me").unwrap();

        let fs = InodeFs::new(Store::open_in_memory().await.unwrap());
        let config = ImportConfig {
            base_path: dir.path().to_path_buf(),
            exclude_patterns: vec![],
            mount_path: "/".into(),
        };
        super::super::importer::initialize(&fs, &config).await.unwrap();

        fs.write_file("/a.txt", b"changed").await.unwrap();
        fs.write_file("/n.txt", b"new").await.unwrap();
        fs.unlink("/b/c.txt").await.unwrap();

        let changes = change_set(&fs, &config).await.unwrap();

        assert!(changes.iter().any(|c| c.path == "/a.txt" && c.kind == ChangeKind::Modified));
        assert!(changes.iter().any(|c| c.path == "/n.txt" && c.kind == ChangeKind::Added));
        assert!(changes.iter().any(|c| c.path == "/b/c.txt" && c.kind == ChangeKind::Deleted));
        assert_eq!(changes.len(), 3);
    }

    #[tokio::test]
    async fn unchanged_files_produce_no_change() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"same").unwrap();

        let fs = InodeFs::new(Store::open_in_memory().await.unwrap());
        let config = ImportConfig {
            base_path: dir.path().to_path_buf(),
            exclude_patterns: vec![],
            mount_path: "/".into(),
        };
        super::super::importer::initialize(&fs, &config).await.unwrap();

        let changes = change_set(&fs, &config).await.unwrap();
        assert!(changes.is_empty());
    }

    #[tokio::test]
    async fn export_patch_marks_added_as_dev_null_source() {
        let dir = tempdir().unwrap();
        let fs = InodeFs::new(Store::open_in_memory().await.unwrap());
        let config = ImportConfig {
            base_path: dir.path().to_path_buf(),
            exclude_patterns: vec![],
            mount_path: "/".into(),
        };
        fs.write_file("/n.txt", b"new content").await.unwrap();

        let changes = vec![Change { path: "/n.txt".to_string(), kind: ChangeKind::Added }];
        let patch = export_patch(&fs, &config, &changes).await.unwrap();

        assert!(patch.contains("--- /dev/null"));
        assert!(patch.contains("+++ b/n.txt"));
        assert!(patch.contains("+new content"));
    }
}
