//! Per-player mirror of active tasks.
//!
//! The cache is advisory: it is written only after the store confirmed a
//! change, and readers see either the old or the new category list, never
//! a cleared one in between.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};

use uuid::Uuid;

use super::task::{ActiveTask, TaskId};

/// One player's tasks, keyed by category id.
pub type PlayerTasks = HashMap<String, Vec<Arc<ActiveTask>>>;

#[derive(Debug, Default)]
pub struct PlayerTaskCache {
    players: RwLock<HashMap<Uuid, Arc<PlayerTasks>>>,
    category_complete_sent: Mutex<HashSet<(Uuid, String)>>,
}

impl PlayerTaskCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the player has been loaded.
    pub fn contains(&self, player: Uuid) -> bool {
        self.read().contains_key(&player)
    }

    /// Players currently cached, i.e. online.
    pub fn players(&self) -> Vec<Uuid> {
        self.read().keys().copied().collect()
    }

    /// Current view of one player.
    pub fn player(&self, player: Uuid) -> Option<Arc<PlayerTasks>> {
        self.read().get(&player).cloned()
    }

    /// Tasks of one category; empty when not cached.
    pub fn category(&self, player: Uuid, category: &str) -> Vec<Arc<ActiveTask>> {
        self.player(player)
            .and_then(|tasks| tasks.get(category).cloned())
            .unwrap_or_default()
    }

    /// Locate a cached task by composite key.
    pub fn find(&self, id: &TaskId) -> Option<Arc<ActiveTask>> {
        let tasks = self.player(id.player)?;
        tasks
            .values()
            .flatten()
            .find(|t| t.id() == id)
            .cloned()
    }

    /// Load a player, replacing anything cached for them.
    pub fn insert_player(&self, player: Uuid, tasks: PlayerTasks) {
        self.write().insert(player, Arc::new(tasks));
    }

    /// Replace everything for a cached player in one swap.
    ///
    /// Returns `false` and leaves the cache alone when the player is not
    /// loaded, e.g. because they left while the refresh was running.
    pub fn replace_player(&self, player: Uuid, tasks: PlayerTasks) -> bool {
        match self.write().get_mut(&player) {
            Some(current) => {
                *current = Arc::new(tasks);
                true
            }
            None => false,
        }
    }

    /// Replace a single category list of a cached player in one swap.
    ///
    /// Returns `false` when the player is not loaded.
    pub fn replace_category(
        &self,
        player: Uuid,
        category: &str,
        tasks: Vec<Arc<ActiveTask>>,
    ) -> bool {
        let mut players = self.write();
        let Some(current) = players.get_mut(&player) else {
            return false;
        };
        let mut next: PlayerTasks = (**current).clone();
        next.insert(category.to_owned(), tasks);
        *current = Arc::new(next);
        true
    }

    /// Drop the given tasks from whichever cached players hold them.
    pub fn forget_tasks(&self, ids: &[TaskId]) {
        if ids.is_empty() {
            return;
        }
        let mut players = self.write();
        for (player, current) in players.iter_mut() {
            if !ids.iter().any(|id| id.player == *player) {
                continue;
            }
            let next: PlayerTasks = current
                .iter()
                .map(|(category, tasks)| {
                    let kept = tasks
                        .iter()
                        .filter(|t| !ids.contains(t.id()))
                        .cloned()
                        .collect();
                    (category.clone(), kept)
                })
                .collect();
            *current = Arc::new(next);
        }
    }

    /// Drop a player entirely, including notification dedupe flags.
    pub fn remove_player(&self, player: Uuid) {
        self.write().remove(&player);
        self.flags().retain(|(p, _)| *p != player);
    }

    /// Record that "category complete" was sent. `true` the first time only.
    pub fn mark_category_complete(&self, player: Uuid, category: &str) -> bool {
        self.flags().insert((player, category.to_owned()))
    }

    /// Allow "category complete" again, e.g. after the set was regenerated.
    pub fn clear_category_complete(&self, player: Uuid, category: &str) {
        self.flags().remove(&(player, category.to_owned()));
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<Uuid, Arc<PlayerTasks>>> {
        self.players.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<Uuid, Arc<PlayerTasks>>> {
        self.players.write().unwrap_or_else(|e| e.into_inner())
    }

    fn flags(&self) -> std::sync::MutexGuard<'_, HashSet<(Uuid, String)>> {
        self.category_complete_sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }
}
