//! File-backed KV store.
//!
//! One JSON file per `(project, path?, file)` key:
//!
//! ```text
//! <root>/global/<file>.json
//! <root>/projects/<project>/<file>.json
//! <root>/projects/<project>/<path>/<file>.json
//! ```
//!
//! Saves are atomic (temp file + rename), guarded by one local retry.
//! A read-through cache sits in front of the filesystem; transactions
//! buffer writes and restore overwritten values if the apply fails partway.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::domain::error::{ForestError, ForestResult};
use crate::domain::ports::{CacheStats, KvStore, KvTransaction, GLOBAL_NAMESPACE};

pub struct FileKvStore {
    root: PathBuf,
    cache: RwLock<HashMap<String, Value>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl FileKvStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            cache: RwLock::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn check_component(component: &str) -> ForestResult<()> {
        if component.is_empty()
            || component.contains(['/', '\\'])
            || component.contains("..")
            || component.starts_with('.')
        {
            return Err(ForestError::Validation(format!(
                "invalid store key component '{component}'"
            )));
        }
        Ok(())
    }

    fn file_path(&self, project: &str, path: Option<&str>, file: &str) -> ForestResult<PathBuf> {
        Self::check_component(project)?;
        Self::check_component(file)?;
        if let Some(p) = path {
            Self::check_component(p)?;
        }

        let mut full = self.root.clone();
        if project == GLOBAL_NAMESPACE {
            full.push("global");
        } else {
            full.push("projects");
            full.push(project);
        }
        if let Some(p) = path {
            full.push(p);
        }
        full.push(format!("{file}.json"));
        Ok(full)
    }

    fn cache_key(project: &str, path: Option<&str>, file: &str) -> String {
        match path {
            Some(p) => format!("{project}/{p}/{file}"),
            None => format!("{project}/{file}"),
        }
    }

    async fn write_atomic(target: &Path, doc: &Value) -> std::io::Result<()> {
        let parent = target
            .parent()
            .ok_or_else(|| std::io::Error::other("key path has no parent"))?;
        tokio::fs::create_dir_all(parent).await?;

        let tmp = target.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(doc)?;
        tokio::fs::write(&tmp, &body).await?;
        tokio::fs::rename(&tmp, target).await
    }
}

#[async_trait]
impl KvStore for FileKvStore {
    async fn load(
        &self,
        project: &str,
        path: Option<&str>,
        file: &str,
    ) -> ForestResult<Option<Value>> {
        let key = Self::cache_key(project, path, file);
        if let Some(doc) = self.cache.read().await.get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Some(doc.clone()));
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let target = self.file_path(project, path, file)?;
        let raw = match tokio::fs::read(&target).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(ForestError::Storage(format!(
                    "read {}: {e}",
                    target.display()
                )))
            }
        };
        let doc: Value = serde_json::from_slice(&raw).map_err(|e| {
            ForestError::Storage(format!("parse {}: {e}", target.display()))
        })?;

        self.cache.write().await.insert(key, doc.clone());
        Ok(Some(doc))
    }

    async fn save(
        &self,
        project: &str,
        path: Option<&str>,
        file: &str,
        doc: &Value,
    ) -> ForestResult<()> {
        let target = self.file_path(project, path, file)?;

        // One local retry before surfacing the failure.
        if let Err(first) = Self::write_atomic(&target, doc).await {
            tracing::warn!(target = %target.display(), error = %first, "save failed, retrying once");
            Self::write_atomic(&target, doc).await.map_err(|e| {
                ForestError::Storage(format!("write {}: {e}", target.display()))
            })?;
        }

        self.cache
            .write()
            .await
            .insert(Self::cache_key(project, path, file), doc.clone());
        Ok(())
    }

    async fn delete_project(&self, project: &str) -> ForestResult<()> {
        Self::check_component(project)?;
        if project == GLOBAL_NAMESPACE {
            return Err(ForestError::Validation(
                "the global namespace cannot be deleted".into(),
            ));
        }

        let dir = self.root.join("projects").join(project);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(ForestError::Storage(format!(
                    "delete {}: {e}",
                    dir.display()
                )))
            }
        }

        let prefix = format!("{project}/");
        self.cache
            .write()
            .await
            .retain(|key, _| !key.starts_with(&prefix));
        Ok(())
    }

    async fn commit(&self, tx: KvTransaction) -> ForestResult<()> {
        // Capture prior values so a partial apply can be undone.
        let mut applied: Vec<(String, Option<String>, String, Option<Value>)> = Vec::new();

        for write in &tx.writes {
            let prior = self
                .load(&write.project, write.path.as_deref(), &write.file)
                .await?;
            match self
                .save(&write.project, write.path.as_deref(), &write.file, &write.doc)
                .await
            {
                Ok(()) => applied.push((
                    write.project.clone(),
                    write.path.clone(),
                    write.file.clone(),
                    prior,
                )),
                Err(e) => {
                    for (project, path, file, prior) in applied.into_iter().rev() {
                        match prior {
                            Some(doc) => {
                                let _ = self.save(&project, path.as_deref(), &file, &doc).await;
                            }
                            None => {
                                // The key did not exist before this commit.
                                if let Ok(target) =
                                    self.file_path(&project, path.as_deref(), &file)
                                {
                                    let _ = tokio::fs::remove_file(&target).await;
                                }
                                self.cache
                                    .write()
                                    .await
                                    .remove(&Self::cache_key(&project, path.as_deref(), &file));
                            }
                        }
                    }
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    async fn clear_cache(&self) {
        self.cache.write().await.clear();
    }

    async fn cache_stats(&self) -> CacheStats {
        CacheStats {
            entries: self.cache.read().await.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}
