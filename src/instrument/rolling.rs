//! Rolling-hash index over path node sequences
//!
//! Indexes every length-l contiguous window of every path with a
//! polynomial hash so the shortest window unique to one path can be found
//! without quadratic scanning. The index is extended lazily one length at
//! a time. Hash collisions are tolerated at insertion and rejected at
//! query time by comparing the stored windows directly.

use std::collections::HashMap;

const MODULUS: u64 = 1_000_000_007;

/// Where an indexed window came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct WindowRef {
    seq: usize,
    start: usize,
}

/// Hash index over all contiguous subsequences of a set of sequences
#[derive(Debug)]
pub struct RollingHashIndex {
    /// Hash base; any value strictly greater than every item works
    base: u64,
    sequences: Vec<Vec<usize>>,
    index: HashMap<u64, Vec<WindowRef>>,
    hash_len: usize,
}

impl RollingHashIndex {
    /// Build an index over `sequences`, hashing with base `item_bound`
    /// (an exclusive upper bound on the item values)
    pub fn new(sequences: Vec<Vec<usize>>, item_bound: usize) -> Self {
        let mut index = Self {
            base: item_bound.max(2) as u64,
            sequences,
            index: HashMap::new(),
            hash_len: 1,
        };
        index.extend_to(2);
        index
    }

    /// `h' = ((h + 1) * base + (item + 1)) mod M`; the +1 terms keep a
    /// window from colliding with its own shorter prefixes
    fn combine(&self, hash: u64, item: usize) -> u64 {
        ((hash + 1) * self.base + (item as u64 + 1)) % MODULUS
    }

    fn window_hash(&self, seq: &[usize], start: usize, len: usize) -> u64 {
        seq[start..start + len]
            .iter()
            .fold(0, |hash, &item| self.combine(hash, item))
    }

    /// Index every window of every length up to `len`
    fn extend_to(&mut self, len: usize) {
        while self.hash_len < len {
            self.hash_len += 1;
            for seq_idx in 0..self.sequences.len() {
                let n = self.sequences[seq_idx].len();
                if n < self.hash_len {
                    continue;
                }
                for start in 0..=n - self.hash_len {
                    let hash = {
                        let seq = &self.sequences[seq_idx];
                        self.window_hash(seq, start, self.hash_len)
                    };
                    self.index.entry(hash).or_default().push(WindowRef {
                        seq: seq_idx,
                        start,
                    });
                }
            }
        }
    }

    /// Shortest contiguous subsequence that occurs in path `id` and in no
    /// other path
    ///
    /// Scans lengths from 2 upward and window starts left to right, so the
    /// result is deterministic: shortest first, then leftmost. Returns an
    /// empty vector when no window of any length is unique (the path is a
    /// prefix of another).
    pub fn shortest_unique_subseq(&mut self, id: usize) -> Vec<usize> {
        assert!(id < self.sequences.len(), "sequence id {id} out of range");
        let n = self.sequences[id].len();

        for len in 2..=n {
            self.extend_to(len);
            for start in 0..=n - len {
                if self.window_is_unique(id, start, len) {
                    return self.sequences[id][start..start + len].to_vec();
                }
            }
        }
        Vec::new()
    }

    /// A window is unique when every equal stored window belongs to
    /// sequence `id` and there is exactly one such occurrence
    fn window_is_unique(&self, id: usize, start: usize, len: usize) -> bool {
        let seq = &self.sequences[id];
        let hash = self.window_hash(seq, start, len);
        let Some(bucket) = self.index.get(&hash) else {
            return false;
        };
        let window = &seq[start..start + len];
        let mut occurrences = 0;
        for entry in bucket {
            let candidate = &self.sequences[entry.seq][entry.start..entry.start + len];
            if candidate != window {
                continue; // hash collision, not the same window
            }
            if entry.seq != id {
                return false;
            }
            occurrences += 1;
        }
        occurrences == 1
    }
}
