//! Host-directory importer, per spec.md §4.5 `Initialize`/`Reset`.
//! Grounded on the teacher's `castore::import::fs::ingest_path`: walk with
//! `walkdir::WalkDir`, skip what shouldn't be ingested, dispatch by
//! [`std::fs::FileType`]. Unlike the teacher (which streams into a
//! content-addressed blob store), entries land directly in the inode
//! filesystem since there is no separate blob layer here.

use std::path::{Path, PathBuf};

use tracing::instrument;
use walkdir::WalkDir;

use crate::error::Result;
use crate::guards::RmOptions;
use crate::inode_fs::InodeFs;
use crate::path;
use crate::policy::glob;

#[derive(Debug, Clone)]
pub struct ImportConfig {
    pub base_path: PathBuf,
    pub exclude_patterns: Vec<String>,
    pub mount_path: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportStats {
    pub files_imported: u64,
    pub directories_created: u64,
    pub bytes_imported: u64,
    pub excluded_paths: Vec<String>,
}

/// Joins `mount_path` with a `/`-separated relative path produced by
/// stripping `base_path` off a walked host entry.
fn mount_join(mount_path: &str, rel: &Path) -> String {
    let rel = rel.to_string_lossy().replace(std::path::MAIN_SEPARATOR, "/");
    if rel.is_empty() {
        path::normalize(mount_path)
    } else if mount_path == "/" {
        path::normalize(&rel)
    } else {
        path::normalize(&format!("{mount_path}/{rel}"))
    }
}

fn is_excluded(rel: &Path, patterns: &[String]) -> bool {
    let rel_str = format!("/{}", rel.to_string_lossy().replace(std::path::MAIN_SEPARATOR, "/"));
    patterns.iter().any(|p| glob::matches(p, &rel_str))
}

#[instrument(skip(fs, config), fields(base_path = %config.base_path.display()), err)]
pub async fn initialize(fs: &InodeFs, config: &ImportConfig) -> Result<ImportStats> {
    let mut stats = ImportStats::default();

    let walker = WalkDir::new(&config.base_path)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| e.file_name() != ".git");

    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(_) => continue,
        };
        let rel = match entry.path().strip_prefix(&config.base_path) {
            Ok(r) => r,
            Err(_) => continue,
        };
        if rel.as_os_str().is_empty() {
            continue; // the root of the walk itself
        }

        if is_excluded(rel, &config.exclude_patterns) {
            stats.excluded_paths.push(rel.to_string_lossy().into_owned());
            continue;
        }

        let target = mount_join(&config.mount_path, rel);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            ensure_dir(fs, &target).await?;
            stats.directories_created += 1;
        } else if file_type.is_symlink() {
            let link_target = std::fs::read_link(entry.path())
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default();
            fs.symlink(&link_target, &target).await?;
        } else if file_type.is_file() {
            let bytes = match std::fs::read(entry.path()) {
                Ok(b) => b,
                Err(_) => continue,
            };
            stats.bytes_imported += bytes.len() as u64;
            fs.write_file(&target, &bytes).await?;
            stats.files_imported += 1;
        }
    }

    Ok(stats)
}

async fn ensure_dir(fs: &InodeFs, target: &str) -> Result<()> {
    match fs.mkdir(target).await {
        Ok(()) => Ok(()),
        Err(e) if e.to_string().contains("EEXIST") => Ok(()),
        Err(e) => Err(e),
    }
}

/// Clears the mount point and re-imports, per spec.md §4.5 `Reset`.
#[instrument(skip(fs, config), err)]
pub async fn reset(fs: &InodeFs, config: &ImportConfig) -> Result<ImportStats> {
    if config.mount_path == "/" {
        for name in fs.readdir("/").await? {
            fs.rm(&format!("/{name}"), RmOptions { force: true, recursive: true })
                .await?;
        }
    } else {
        fs.rm(&config.mount_path, RmOptions { force: true, recursive: true })
            .await?;
    }
    initialize(fs, config).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;
    use tempfile::tempdir;

    async fn fs() -> InodeFs {
        InodeFs::new(Store::open_in_memory().await.unwrap())
    }

    #[tokio::test]
    async fn imports_files_and_dirs() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"hello").unwrap();
        std::fs::create_dir(dir.path().join("b")).unwrap();
        std::fs::write(dir.path().join("b/c.txt"), b"world").unwrap();

        let fs = fs().await;
        let config = ImportConfig {
            base_path: dir.path().to_path_buf(),
            exclude_patterns: vec![],
            mount_path: "/".into(),
        };
        let stats = initialize(&fs, &config).await.unwrap();

        assert_eq!(stats.files_imported, 2);
        assert_eq!(stats.bytes_imported, 10);
        assert_eq!(fs.read_file("/a.txt").await.unwrap(), b"hello");
        assert_eq!(fs.read_file("/b/c.txt").await.unwrap(), b"world");
    }

    #[tokio::test]
    async fn skips_git_directory() {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join(".git")).unwrap();
        std::fs::write(dir.path().join(".git/HEAD"), b"ref: refs/heads/main").unwrap();
        std::fs::write(dir.path().join("a.txt"), b"x").unwrap();

        let fs = fs().await;
        let config = ImportConfig {
            base_path: dir.path().to_path_buf(),
            exclude_patterns: vec![],
            mount_path: "/".into(),
        };
        initialize(&fs, &config).await.unwrap();

        assert!(fs.stat("/.git").await.is_err());
        assert!(fs.stat("/a.txt").await.is_ok());
    }

    #[tokio::test]
    async fn excludes_matching_patterns() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("secret.env"), b"x").unwrap();
        std::fs::write(dir.path().join("a.txt"), b"y").unwrap();

        let fs = fs().await;
        let config = ImportConfig {
            base_path: dir.path().to_path_buf(),
            exclude_patterns: vec!["*.env".into()],
            mount_path: "/".into(),
        };
        let stats = initialize(&fs, &config).await.unwrap();

        assert!(fs.stat("/secret.env").await.is_err());
        assert!(fs.stat("/a.txt").await.is_ok());
        assert_eq!(stats.excluded_paths, vec!["secret.env".to_string()]);
    }

    #[tokio::test]
    async fn imports_under_mount_path() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"x").unwrap();

        let fs = fs().await;
        let config = ImportConfig {
            base_path: dir.path().to_path_buf(),
            exclude_patterns: vec![],
            mount_path: "/workspace".into(),
        };
        initialize(&fs, &config).await.unwrap();

        assert_eq!(fs.read_file("/workspace/a.txt").await.unwrap(), b"x");
    }

    #[tokio::test]
    async fn reset_clears_then_reimports() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"x").unwrap();

        let fs = fs().await;
        let config = ImportConfig {
            base_path: dir.path().to_path_buf(),
            exclude_patterns: vec![],
            mount_path: "/".into(),
        };
        initialize(&fs, &config).await.unwrap();
        fs.write_file("/stray.txt", b"leftover").await.unwrap();

        reset(&fs, &config).await.unwrap();

        assert!(fs.stat("/stray.txt").await.is_err());
        assert_eq!(fs.read_file("/a.txt").await.unwrap(), b"x");
    }
}
