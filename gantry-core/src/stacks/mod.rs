//! Name-keyed stack text storage.
//!
//! Each stack lives in its own directory under the managed root as
//! `compose.yaml` plus an optional `.env`. Names are validated against a
//! conservative charset, resolved paths are confined to the root, and
//! symlinked entries are rejected outright.

use crate::error::{GantryError, Result};
use std::path::{Path, PathBuf};
use tracing::{info, instrument};

const COMPOSE_FILE: &str = "compose.yaml";
const ENV_FILE: &str = ".env";

/// Filesystem store for stack definitions.
#[derive(Debug, Clone)]
pub struct StackStore {
    root: PathBuf,
}

impl StackStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)
            .map_err(|e| GantryError::IoError { path: root.clone(), source: e })?;
        let root = root
            .canonicalize()
            .map_err(|e| GantryError::IoError { path: root.clone(), source: e })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether a stack with this name exists.
    pub async fn exists(&self, name: &str) -> Result<bool> {
        let dir = self.stack_dir(name)?;
        Ok(tokio::fs::try_exists(dir.join(COMPOSE_FILE)).await.unwrap_or(false))
    }

    /// Read a stack's compose text and optional environment text.
    #[instrument(skip(self))]
    pub async fn read(&self, name: &str) -> Result<(String, Option<String>)> {
        let dir = self.stack_dir(name)?;
        let compose_path = dir.join(COMPOSE_FILE);

        self.reject_symlink(&dir).await?;
        self.reject_symlink(&compose_path).await?;

        let compose = match tokio::fs::read_to_string(&compose_path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(GantryError::StackNotFound { name: name.to_string() })
            }
            Err(e) => return Err(GantryError::IoError { path: compose_path, source: e }),
        };

        let env_path = dir.join(ENV_FILE);
        self.reject_symlink(&env_path).await?;
        let env = match tokio::fs::read_to_string(&env_path).await {
            Ok(text) => Some(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(GantryError::IoError { path: env_path, source: e }),
        };

        Ok((compose, env))
    }

    /// Write (or overwrite) a stack's compose text and optional env text.
    #[instrument(skip(self, compose, env))]
    pub async fn write(&self, name: &str, compose: &str, env: Option<&str>) -> Result<()> {
        let dir = self.stack_dir(name)?;

        if tokio::fs::try_exists(&dir).await.unwrap_or(false) {
            self.reject_symlink(&dir).await?;
        } else {
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|e| GantryError::IoError { path: dir.clone(), source: e })?;
        }

        let compose_path = dir.join(COMPOSE_FILE);
        if tokio::fs::try_exists(&compose_path).await.unwrap_or(false) {
            self.reject_symlink(&compose_path).await?;
        }
        tokio::fs::write(&compose_path, compose)
            .await
            .map_err(|e| GantryError::IoError { path: compose_path, source: e })?;

        let env_path = dir.join(ENV_FILE);
        match env {
            Some(text) => {
                if tokio::fs::try_exists(&env_path).await.unwrap_or(false) {
                    self.reject_symlink(&env_path).await?;
                }
                tokio::fs::write(&env_path, text)
                    .await
                    .map_err(|e| GantryError::IoError { path: env_path, source: e })?;
            }
            None => {
                // Stale env text must not leak into the next deployment.
                let _ = tokio::fs::remove_file(&env_path).await;
            }
        }

        info!(stack = %name, "Stack written");
        Ok(())
    }

    /// Resolve a stack name to its directory, confined to the root.
    fn stack_dir(&self, name: &str) -> Result<PathBuf> {
        validate_name(name)?;

        let dir = self.root.join(name);
        // Belt and suspenders: the name charset already excludes separators,
        // but the containment check keeps future name rules honest.
        if !dir.starts_with(&self.root) {
            return Err(GantryError::UnsafeStackPath { path: dir });
        }
        Ok(dir)
    }

    async fn reject_symlink(&self, path: &Path) -> Result<()> {
        match tokio::fs::symlink_metadata(path).await {
            Ok(meta) if meta.file_type().is_symlink() => {
                Err(GantryError::UnsafeStackPath { path: path.to_path_buf() })
            }
            _ => Ok(()),
        }
    }
}

fn validate_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.len() <= 128
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.');

    if valid {
        Ok(())
    } else {
        Err(GantryError::InvalidStackName { name: name.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, StackStore) {
        let dir = TempDir::new().unwrap();
        let store = StackStore::new(dir.path()).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_write_read_roundtrip() {
        let (_guard, store) = store();

        store
            .write("web", "services:\n  app:\n    image: nginx:1.27\n", Some("TAG=1.27\n"))
            .await
            .unwrap();

        assert!(store.exists("web").await.unwrap());
        let (compose, env) = store.read("web").await.unwrap();
        assert!(compose.contains("nginx:1.27"));
        assert_eq!(env.as_deref(), Some("TAG=1.27\n"));
    }

    #[tokio::test]
    async fn test_missing_stack_is_not_found() {
        let (_guard, store) = store();
        assert!(!store.exists("ghost").await.unwrap());
        let err = store.read("ghost").await.unwrap_err();
        assert!(matches!(err, GantryError::StackNotFound { .. }));
    }

    #[tokio::test]
    async fn test_rewrite_without_env_removes_old_env() {
        let (_guard, store) = store();

        store.write("web", "services: {}\n", Some("A=1\n")).await.unwrap();
        store.write("web", "services: {}\n", None).await.unwrap();

        let (_, env) = store.read("web").await.unwrap();
        assert_eq!(env, None);
    }

    #[tokio::test]
    async fn test_traversal_names_rejected() {
        let (_guard, store) = store();
        for bad in ["../evil", "a/b", "", ".hidden", "name with space"] {
            let err = store.write(bad, "services: {}\n", None).await.unwrap_err();
            assert!(
                matches!(err, GantryError::InvalidStackName { .. }),
                "expected rejection for {:?}",
                bad
            );
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlinked_stack_rejected() {
        let (guard, store) = store();

        let outside = guard.path().join("outside");
        std::fs::create_dir_all(&outside).unwrap();
        std::fs::write(outside.join("compose.yaml"), "services: {}\n").unwrap();
        std::os::unix::fs::symlink(&outside, guard.path().join("linked")).unwrap();

        let err = store.read("linked").await.unwrap_err();
        assert!(matches!(err, GantryError::UnsafeStackPath { .. }));
    }
}
