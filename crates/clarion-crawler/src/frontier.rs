//! Per-run frontier: visited set, discovery depths and the FIFO pending list.
//!
//! A frontier belongs to exactly one crawl run and is dropped with it.

use crate::scope::normalize;
use std::collections::{HashMap, HashSet, VecDeque};
use url::Url;

#[derive(Debug, Default)]
pub struct Frontier {
    visited: HashSet<String>,
    depths: HashMap<String, u32>,
    pending: VecDeque<(Url, u32)>,
}

impl Frontier {
    /// Frontier seeded with `root` at depth 1.
    pub fn seeded(root: Url) -> Self {
        let mut frontier = Self::default();
        frontier.depths.insert(normalize(&root), 1);
        frontier.pending.push_back((root, 1));
        frontier
    }

    /// Next unvisited URL in discovery order, marked visited.
    pub fn next_unvisited(&mut self) -> Option<(Url, u32)> {
        while let Some((url, depth)) = self.pending.pop_front() {
            if self.visited.insert(normalize(&url)) {
                return Some((url, depth));
            }
        }
        None
    }

    /// Whether the normalized form of `url` was seen before (visited or pending).
    pub fn is_known(&self, url: &Url) -> bool {
        let key = normalize(url);
        self.visited.contains(&key) || self.depths.contains_key(&key)
    }

    /// Admit new candidates, shallowest first, keeping at most `budget`.
    ///
    /// Known URLs and duplicates within the batch are skipped. The sort is
    /// stable, so links at equal depth keep document order. Returns how many
    /// were admitted.
    pub fn admit(&mut self, candidates: Vec<(Url, u32)>, budget: usize) -> usize {
        let mut seen = HashSet::new();
        let mut fresh: Vec<(Url, u32)> = candidates
            .into_iter()
            .filter(|(url, _)| !self.is_known(url) && seen.insert(normalize(url)))
            .collect();
        fresh.sort_by_key(|(_, depth)| *depth);
        fresh.truncate(budget);

        let admitted = fresh.len();
        for (url, depth) in fresh {
            self.depths.insert(normalize(&url), depth);
            self.pending.push_back((url, depth));
        }
        admitted
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn visited_count(&self) -> usize {
        self.visited.len()
    }

    /// Depth recorded when `url` was discovered.
    pub fn depth_of(&self, url: &Url) -> Option<u32> {
        self.depths.get(&normalize(url)).copied()
    }
}
