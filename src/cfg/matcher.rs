//! Map runtime execution traces back to static path ids
//!
//! The instrumented driver prints one '0'/'1' character per node. An exact
//! bitmask match identifies a path directly; a trace that superposes
//! several loop iterations or branches instead covers the bitmasks of
//! multiple candidate paths, and the best-match rule spreads test cases
//! across those candidates so coverage counts stay balanced.

use crate::cfg::paths::PathMask;
use crate::cfg::{Cfg, PathId, INVALID_PATH_ID};

impl Cfg {
    /// Exact bitmask lookup; INVALID_PATH_ID when no path has this mask
    pub fn match_path_id(&self, mask: &str) -> PathId {
        self.mask_index()
            .get(mask)
            .copied()
            .unwrap_or(INVALID_PATH_ID)
    }

    /// Every path whose bitmask is covered by the observed mask
    pub fn match_path_ids(&self, mask: &str) -> Vec<PathId> {
        let observed = PathMask::from_trace(mask);
        self.paths()
            .iter()
            .filter(|path| observed.covers(path.mask()))
            .map(|path| path.id)
            .collect()
    }

    /// Best-effort match that balances assignments across candidates
    ///
    /// Prefers an exact match not yet claimed by a test; otherwise picks
    /// the least-counted covered candidate; falls back to the exact match
    /// even when already counted. Increments the winner's counter.
    pub fn match_best_path_id(&mut self, mask: &str) -> PathId {
        let exact = self.match_path_id(mask);
        if exact != INVALID_PATH_ID && !self.path_test_counts_mut().contains_key(&exact) {
            *self.path_test_counts_mut().entry(exact).or_insert(0) += 1;
            return exact;
        }

        let candidates = self.match_path_ids(mask);
        if candidates.is_empty() {
            return INVALID_PATH_ID;
        }

        let mut chosen = exact;
        let mut min_count = u32::MAX;
        for candidate in candidates {
            match self.path_test_counts_mut().get(&candidate).copied() {
                None => {
                    *self.path_test_counts_mut().entry(candidate).or_insert(0) += 1;
                    return candidate;
                }
                Some(count) if count < min_count => {
                    min_count = count;
                    chosen = candidate;
                }
                Some(_) => {}
            }
        }
        *self.path_test_counts_mut().entry(chosen).or_insert(0) += 1;
        chosen
    }
}
