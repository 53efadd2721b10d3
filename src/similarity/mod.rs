//! Path-to-path similarity between two function versions
//!
//! The outer measure is a weighted Levenshtein distance over node
//! sequences where substituting node a for node b costs `1 - node_sim`;
//! the inner measure compares opcode sequences with unit-cost edits. Node
//! similarity is memoized per node-id pair, which is sound only while the
//! calculator is tied to one (old, new) CFG pair.

use crate::cfg::{Cfg, NodeId, Path, PathId, INVALID_PATH_ID};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

/// Best old-path pairing for one new path
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PathPairing {
    #[serde(rename = "oldPathId")]
    pub old_path_id: PathId,
    pub similarity: f64,
}

/// `new_path_id -> best old path` map, in new-path-id order
pub type ReuseMap = BTreeMap<PathId, PathPairing>;

/// Similarity calculator scoped to one (old, new) CFG pair
pub struct SimilarityCalculator<'a> {
    cfg_old: &'a Cfg,
    cfg_new: &'a Cfg,
    /// Memoized node similarity keyed by (new node id, old node id)
    cache: HashMap<(NodeId, NodeId), f64>,
}

impl<'a> SimilarityCalculator<'a> {
    pub fn new(cfg_old: &'a Cfg, cfg_new: &'a Cfg) -> Self {
        Self {
            cfg_old,
            cfg_new,
            cache: HashMap::new(),
        }
    }

    /// Pair every new path with its most similar old path
    pub fn run(&mut self) -> ReuseMap {
        let cfg_new = self.cfg_new;
        let mut map = ReuseMap::new();
        for new_path in cfg_new.paths() {
            let pairing = self.find_most_similar(new_path);
            tracing::debug!(
                new_path = new_path.id,
                old_path = pairing.old_path_id,
                similarity = pairing.similarity,
                "paired paths"
            );
            map.insert(new_path.id, pairing);
        }
        map
    }

    /// Scan old paths in id order, keeping the first strict maximum
    fn find_most_similar(&mut self, new_path: &Path) -> PathPairing {
        let cfg_old = self.cfg_old;
        let mut best = PathPairing {
            old_path_id: INVALID_PATH_ID,
            similarity: 0.0,
        };
        for old_path in cfg_old.paths() {
            let sim = self.path_similarity(new_path, old_path);
            if sim > best.similarity {
                best = PathPairing {
                    old_path_id: old_path.id,
                    similarity: sim,
                };
            }
        }
        best
    }

    /// Weighted Levenshtein over node sequences, normalized into [0, 1]
    pub fn path_similarity(&mut self, new_path: &Path, old_path: &Path) -> f64 {
        let m = new_path.len();
        let n = old_path.len();
        if m == 0 && n == 0 {
            return 1.0;
        }

        let mut dp = vec![vec![0.0_f64; n + 1]; m + 1];
        for (i, row) in dp.iter_mut().enumerate() {
            row[0] = i as f64;
        }
        for j in 0..=n {
            dp[0][j] = j as f64;
        }
        for i in 1..=m {
            for j in 1..=n {
                let sim = self.node_similarity(new_path.nodes[i - 1], old_path.nodes[j - 1]);
                if sim == 1.0 {
                    dp[i][j] = dp[i - 1][j - 1];
                } else {
                    let substitute = dp[i - 1][j - 1] + (1.0 - sim);
                    dp[i][j] = (dp[i - 1][j] + 1.0).min(dp[i][j - 1] + 1.0).min(substitute);
                }
            }
        }
        1.0 - dp[m][n] / m.max(n) as f64
    }

    /// Node similarity: 0 on kind or branch-ordinal mismatch, else one
    /// minus the normalized opcode edit distance
    pub fn node_similarity(&mut self, new_id: NodeId, old_id: NodeId) -> f64 {
        if let Some(&cached) = self.cache.get(&(new_id, old_id)) {
            return cached;
        }
        let a = self.cfg_new.node(new_id);
        let b = self.cfg_old.node(old_id);

        let sim = if a.kind != b.kind || a.select_num != b.select_num {
            0.0
        } else {
            opcode_similarity(&a.ops, &b.ops)
        };
        self.cache.insert((new_id, old_id), sim);
        sim
    }
}

/// Unit-cost Levenshtein over opcode mnemonics, normalized into [0, 1]
fn opcode_similarity(ops_a: &[String], ops_b: &[String]) -> f64 {
    let m = ops_a.len();
    let n = ops_b.len();
    if m == 0 && n == 0 {
        return 1.0;
    }

    let mut dp = vec![vec![0_usize; n + 1]; m + 1];
    for (i, row) in dp.iter_mut().enumerate() {
        row[0] = i;
    }
    for j in 0..=n {
        dp[0][j] = j;
    }
    for i in 1..=m {
        for j in 1..=n {
            if ops_a[i - 1] == ops_b[j - 1] {
                dp[i][j] = dp[i - 1][j - 1];
            } else {
                dp[i][j] = dp[i - 1][j].min(dp[i][j - 1]).min(dp[i - 1][j - 1]) + 1;
            }
        }
    }
    1.0 - dp[m][n] as f64 / m.max(n) as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::build_cfg;
    use crate::ir::Module;

    const IF_ELSE: &str = r#"define i32 @sign(i32 %0) {
  %2 = icmp sgt i32 %0, 0
  br i1 %2, label %then, label %else

then:
  br label %done

else:
  br label %done

done:
  ret i32 0
}
"#;

    // same shape, one extra opcode in the then-block
    const IF_ELSE_TWEAKED: &str = r#"define i32 @sign(i32 %0) {
  %2 = icmp sgt i32 %0, 0
  br i1 %2, label %then, label %else

then:
  %3 = add nsw i32 %0, 1
  br label %done

else:
  br label %done

done:
  ret i32 0
}
"#;

    fn cfg_of(text: &str) -> Cfg {
        let module = Module::parse(text).unwrap();
        build_cfg(module.function("sign").unwrap()).unwrap()
    }

    #[test]
    fn test_identical_node_similarity_is_one() {
        let old = cfg_of(IF_ELSE);
        let new = cfg_of(IF_ELSE);
        let mut calc = SimilarityCalculator::new(&old, &new);
        for id in 0..new.len() {
            assert_eq!(calc.node_similarity(id, id), 1.0);
        }
    }

    #[test]
    fn test_node_similarity_symmetric_for_same_pair() {
        let old = cfg_of(IF_ELSE);
        let new = cfg_of(IF_ELSE_TWEAKED);
        let mut forward = SimilarityCalculator::new(&old, &new);
        let mut backward = SimilarityCalculator::new(&new, &old);
        for a in 0..new.len() {
            for b in 0..old.len() {
                let f = forward.node_similarity(a, b);
                let g = backward.node_similarity(b, a);
                assert!((f - g).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn test_kind_mismatch_is_zero() {
        let old = cfg_of(IF_ELSE);
        let new = cfg_of(IF_ELSE);
        let mut calc = SimilarityCalculator::new(&old, &new);
        // entry (node 0) vs exit (node 3)
        assert_eq!(calc.node_similarity(0, 3), 0.0);
    }

    #[test]
    fn test_select_num_mismatch_is_zero() {
        let old = cfg_of(IF_ELSE);
        let new = cfg_of(IF_ELSE);
        let mut calc = SimilarityCalculator::new(&old, &new);
        // then (select 1) vs else (select 2): same kind and opcodes, but
        // different branch ordinals
        assert_eq!(calc.node_similarity(1, 2), 0.0);
    }

    #[test]
    fn test_identical_path_similarity_is_one() {
        let old = cfg_of(IF_ELSE);
        let new = cfg_of(IF_ELSE);
        let mut calc = SimilarityCalculator::new(&old, &new);
        for path in new.paths() {
            let sim = calc.path_similarity(path, &old.paths()[path.id as usize]);
            assert_eq!(sim, 1.0);
        }
    }

    #[test]
    fn test_similarity_in_unit_interval() {
        let old = cfg_of(IF_ELSE);
        let new = cfg_of(IF_ELSE_TWEAKED);
        let mut calc = SimilarityCalculator::new(&old, &new);
        for new_path in new.paths() {
            for old_path in old.paths() {
                let sim = calc.path_similarity(new_path, old_path);
                assert!((0.0..=1.0).contains(&sim), "similarity {sim} out of range");
            }
        }
    }

    #[test]
    fn test_identical_cfgs_pair_one_to_one() {
        let old = cfg_of(IF_ELSE);
        let new = cfg_of(IF_ELSE);
        let mut calc = SimilarityCalculator::new(&old, &new);
        let map = calc.run();
        for (new_id, pairing) in &map {
            assert_eq!(pairing.old_path_id, *new_id);
            assert_eq!(pairing.similarity, 1.0);
        }
    }

    #[test]
    fn test_tweaked_cfg_still_pairs_best_match() {
        let old = cfg_of(IF_ELSE);
        let new = cfg_of(IF_ELSE_TWEAKED);
        let mut calc = SimilarityCalculator::new(&old, &new);
        let map = calc.run();

        // the untouched else-path still matches its old counterpart exactly
        let else_path_new = new
            .paths()
            .iter()
            .find(|p| p.contains(2))
            .expect("else path exists");
        let pairing = map[&else_path_new.id];
        assert_eq!(pairing.similarity, 1.0);

        // the tweaked then-path pairs below 1.0 but above 0
        let then_path_new = new.paths().iter().find(|p| p.contains(1)).unwrap();
        let pairing = map[&then_path_new.id];
        assert!(pairing.similarity > 0.0 && pairing.similarity < 1.0);
        assert_ne!(pairing.old_path_id, INVALID_PATH_ID);
    }

    #[test]
    fn test_all_zero_similarity_reports_invalid() {
        let old = cfg_of(IF_ELSE);
        let new = cfg_of(IF_ELSE);
        let mut calc = SimilarityCalculator::new(&old, &new);
        // a synthetic path over nodes whose kinds can never match anything:
        // compare an empty path against old paths
        let empty = Path::new(0, new.len(), vec![]);
        for old_path in old.paths() {
            let sim = calc.path_similarity(&empty, old_path);
            assert_eq!(sim, 0.0);
        }
    }

    #[test]
    fn test_opcode_similarity_bounds() {
        let a = vec!["load".to_string(), "add".to_string(), "ret".to_string()];
        let b = vec!["load".to_string(), "sub".to_string(), "ret".to_string()];
        let sim = opcode_similarity(&a, &b);
        assert!((sim - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(opcode_similarity(&a, &a), 1.0);
        assert_eq!(opcode_similarity(&[], &[]), 1.0);
    }
}
