//! Read-mostly template catalog.
//!
//! The store is authoritative; this is a cache reconciled on startup and by
//! periodic delta sync. Readers clone an `Arc` to the current map and never
//! wait on a sync: a sync builds a new map off to the side and swaps the
//! pointer when done.

pub mod template;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::{debug, info};

pub use template::{MatchCondition, Reward, RewardItem, TaskKind, TaskTemplate, normalize_block_id};

use crate::error::{Result, TaskError};
use crate::store::{ImportReport, PersistenceQueue, templates};

/// Key to template map shared with readers.
pub type TemplateMap = HashMap<String, Arc<TaskTemplate>>;

/// Outcome of a delta sync.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub added: Vec<String>,
    pub updated: Vec<String>,
    pub removed: Vec<String>,
}

impl SyncReport {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }
}

/// Compare local versions against the store's `(key, version)` listing.
///
/// A key is updated when the local copy is older; removed when present
/// locally but absent remotely.
pub fn diff_versions(local: &TemplateMap, remote: &[(String, u32)]) -> SyncReport {
    let mut report = SyncReport::default();
    for (key, version) in remote {
        match local.get(key) {
            None => report.added.push(key.clone()),
            Some(t) if t.version < *version => report.updated.push(key.clone()),
            Some(_) => {}
        }
    }
    let remote_keys: std::collections::HashSet<&str> =
        remote.iter().map(|(k, _)| k.as_str()).collect();
    report.removed = local
        .keys()
        .filter(|k| !remote_keys.contains(k.as_str()))
        .cloned()
        .collect();
    report.added.sort();
    report.updated.sort();
    report.removed.sort();
    report
}

/// In-memory view of enabled templates.
#[derive(Debug, Default)]
pub struct TaskCatalog {
    templates: RwLock<Arc<TemplateMap>>,
}

impl TaskCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current map. Cheap; holds the read lock only to clone the `Arc`.
    pub fn snapshot(&self) -> Arc<TemplateMap> {
        Arc::clone(&self.templates.read().unwrap_or_else(|e| e.into_inner()))
    }

    pub fn get(&self, key: &str) -> Option<Arc<TaskTemplate>> {
        self.snapshot().get(key).cloned()
    }

    /// All templates, sorted by key.
    pub fn list(&self) -> Vec<Arc<TaskTemplate>> {
        let mut all: Vec<_> = self.snapshot().values().cloned().collect();
        all.sort_by(|a, b| a.key.cmp(&b.key));
        all
    }

    /// Templates belonging to `category`, sorted by key.
    pub fn for_category(&self, category: &str) -> Vec<Arc<TaskTemplate>> {
        let mut matching: Vec<_> = self
            .snapshot()
            .values()
            .filter(|t| t.category == category)
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.key.cmp(&b.key));
        matching
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    /// Swap in a whole new map.
    pub fn replace(&self, templates: Vec<TaskTemplate>) {
        let map: TemplateMap = templates
            .into_iter()
            .map(|t| (t.key.clone(), Arc::new(t)))
            .collect();
        self.swap(map);
    }

    fn swap(&self, map: TemplateMap) {
        *self.templates.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(map);
    }

    /// Full reload of enabled templates from the store.
    pub async fn reload(&self, queue: &PersistenceQueue) -> Result<usize> {
        let loaded = queue
            .execute("load_templates", |conn| templates::load_enabled(conn))
            .await?;
        let count = loaded.len();
        self.replace(loaded);
        info!(templates = count, "template catalog loaded");
        Ok(count)
    }

    /// Delta sync: fetch versions, then full records only for what changed.
    pub async fn sync(&self, queue: &PersistenceQueue) -> Result<SyncReport> {
        let remote = queue
            .execute("sync_template_versions", |conn| {
                templates::load_versions(conn)
            })
            .await?;
        let current = self.snapshot();
        let report = diff_versions(&current, &remote);
        if report.is_empty() {
            debug!(templates = current.len(), "template catalog up to date");
            return Ok(report);
        }

        let mut wanted = report.added.clone();
        wanted.extend(report.updated.iter().cloned());
        let fetched = if wanted.is_empty() {
            Vec::new()
        } else {
            queue
                .execute("sync_template_records", move |conn| {
                    templates::load_by_keys(conn, &wanted)
                })
                .await?
        };

        let mut next: TemplateMap = (*current).clone();
        for key in &report.removed {
            next.remove(key);
        }
        for template in fetched {
            next.insert(template.key.clone(), Arc::new(template));
        }
        self.swap(next);

        info!(
            added = report.added.len(),
            updated = report.updated.len(),
            removed = report.removed.len(),
            "template catalog synced"
        );
        Ok(report)
    }

    /// Validate and upsert templates, then reload.
    pub async fn import(
        &self,
        queue: &PersistenceQueue,
        incoming: Vec<TaskTemplate>,
    ) -> Result<ImportReport> {
        if incoming.is_empty() {
            return Err(TaskError::Validation("nothing to import".into()));
        }
        for template in &incoming {
            template.validate()?;
        }
        let report = queue
            .execute("import_templates", move |conn| {
                templates::import(conn, &incoming)
            })
            .await?;
        info!(
            inserted = report.inserted.len(),
            updated = report.updated.len(),
            unchanged = report.unchanged.len(),
            "templates imported"
        );
        self.reload(queue).await?;
        Ok(report)
    }

    /// Soft-delete a template, then reload.
    pub async fn delete(&self, queue: &PersistenceQueue, key: &str) -> Result<()> {
        let owned = key.to_owned();
        let removed = queue
            .execute("delete_template", move |conn| {
                templates::disable(conn, &owned)
            })
            .await?;
        if !removed {
            return Err(TaskError::NotFound(format!("template '{key}'")));
        }
        info!(template = key, "template deleted");
        self.reload(queue).await?;
        Ok(())
    }
}
