//! Weighted random selection without replacement.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::catalog::{TaskCatalog, TaskTemplate};

/// Draws templates for a category.
#[derive(Debug)]
pub struct TaskGenerator {
    rng: Mutex<StdRng>,
}

impl Default for TaskGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskGenerator {
    /// Entropy-seeded generator.
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Deterministic generator for tests and replays.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Pick up to `n` templates of `category`, skipping `held` keys.
    pub fn generate(
        &self,
        catalog: &TaskCatalog,
        category: &str,
        held: &HashSet<String>,
        n: usize,
    ) -> Vec<Arc<TaskTemplate>> {
        let candidates: Vec<_> = catalog
            .for_category(category)
            .into_iter()
            .filter(|t| !held.contains(&t.key))
            .collect();
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        select_weighted(candidates, n, &mut *rng)
    }
}

/// Weighted sampling without replacement.
///
/// Each round draws in `[0, total)`, walks the pool accumulating weight and
/// takes the first template whose running total exceeds the draw. Zero-weight
/// templates can never be taken. Returns fewer than `n` when the pool runs
/// out.
pub fn select_weighted<R: Rng + ?Sized>(
    candidates: Vec<Arc<TaskTemplate>>,
    n: usize,
    rng: &mut R,
) -> Vec<Arc<TaskTemplate>> {
    let mut pool: Vec<_> = candidates.into_iter().filter(|t| t.weight > 0).collect();
    let mut picked = Vec::with_capacity(n.min(pool.len()));

    while picked.len() < n && !pool.is_empty() {
        let total: u64 = pool.iter().map(|t| u64::from(t.weight)).sum();
        if total == 0 {
            break;
        }
        let roll = rng.gen_range(0..total);
        let mut running = 0_u64;
        let index = pool
            .iter()
            .position(|t| {
                running += u64::from(t.weight);
                running > roll
            })
            .unwrap_or(pool.len() - 1);
        picked.push(pool.remove(index));
    }
    picked
}
