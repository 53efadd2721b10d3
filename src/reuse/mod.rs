//! Test-suite reuse across function versions
//!
//! The engine builds both versions' CFGs, pairs every new path with its
//! most similar old path, and partitions the old suite: tests behind a
//! pairing above the similarity threshold are reused with their
//! expectations, the rest contribute inputs only. Full reuse wins
//! conflicts, and emission order is deterministic: full-reuse cases in
//! ascending old-test order first, then the inputs-only cases.

use crate::cfg::{
    annotate_from_source, build_cfg, export_dot, Cfg, Path as CfgPath, PathId, INVALID_PATH_ID,
};
use crate::config::{ToolConfig, SIMILARITY_THRESHOLD};
use crate::exec::{compile_src_to_ir, TestEngine};
use crate::ir::Module;
use crate::similarity::{ReuseMap, SimilarityCalculator};
use crate::suite::TestSuite;
use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// `old_path_id -> ordered old-test indices` whose traces matched it
pub type PathTestMap = BTreeMap<PathId, Vec<usize>>;

/// Result of one reuse run
#[derive(Debug)]
pub struct ReuseOutcome {
    /// The executed new suite
    pub suite: TestSuite,
    /// Per-path coverage of the new CFG after execution
    pub new_cover: Vec<bool>,
    /// Where the new suite was written
    pub output_path: PathBuf,
}

impl ReuseOutcome {
    /// Ids of new paths no reused test reached
    pub fn uncovered_paths(&self) -> Vec<PathId> {
        self.new_cover
            .iter()
            .enumerate()
            .filter(|(_, covered)| !**covered)
            .map(|(id, _)| id as PathId)
            .collect()
    }
}

/// Orchestrates the reuse pipeline for one (old, new) version pair
pub struct ReuseEngine {
    config: ToolConfig,
    old_src: PathBuf,
    new_src: PathBuf,
    function_name: String,
    old_cfg: Cfg,
    new_cfg: Cfg,
    reuse_map: ReuseMap,
    path_test_map: PathTestMap,
}

impl ReuseEngine {
    /// Compile both versions, build their CFGs and compute the similarity
    /// pairing. IR or function-lookup failure here is fatal for the run.
    pub fn new(
        config: &ToolConfig,
        old_src: impl Into<PathBuf>,
        new_src: impl Into<PathBuf>,
        function_name: impl Into<String>,
    ) -> Result<Self> {
        let old_src: PathBuf = old_src.into();
        let new_src: PathBuf = new_src.into();
        let function_name: String = function_name.into();

        let old_cfg = version_cfg(config, &old_src, &function_name)?;
        let new_cfg = version_cfg(config, &new_src, &function_name)?;

        let reuse_map = SimilarityCalculator::new(&old_cfg, &new_cfg).run();
        Ok(Self {
            config: config.clone(),
            old_src,
            new_src,
            function_name,
            old_cfg,
            new_cfg,
            reuse_map,
            path_test_map: PathTestMap::new(),
        })
    }

    pub fn old_cfg(&self) -> &Cfg {
        &self.old_cfg
    }

    pub fn new_cfg(&self) -> &Cfg {
        &self.new_cfg
    }

    pub fn reuse_map(&self) -> &ReuseMap {
        &self.reuse_map
    }

    /// Reuse the old suite onto the new version and execute the result
    pub fn reuse_suite(&mut self, suite_path: &Path) -> Result<ReuseOutcome> {
        let mut old_suite = TestSuite::load(suite_path)?;
        self.build_path_test_map(&mut old_suite)?;

        for path in self.new_cfg.paths() {
            tracing::info!(
                path = path.id,
                nodes = %path.nodes_string(),
                "new version path"
            );
        }

        let (full, inputs_only) = partition(&self.reuse_map, &self.path_test_map);
        tracing::info!(
            full = full.len(),
            inputs_only = inputs_only.len(),
            "reuse plan computed"
        );
        let mut new_suite = assemble_suite(
            &old_suite,
            &full,
            &inputs_only,
            &self.function_name,
            &self.new_src,
        );

        let mut engine = TestEngine::new(&self.config, &self.new_src, &self.function_name)?;
        engine.run(&mut new_suite)?;

        let mut new_cover = vec![false; self.new_cfg.paths().len()];
        for case in &new_suite.test_cases {
            if case.path_id >= 0 && (case.path_id as usize) < new_cover.len() {
                new_cover[case.path_id as usize] = true;
            }
        }

        let output_path = reused_suite_path(suite_path);
        new_suite.store(&output_path)?;
        Ok(ReuseOutcome {
            suite: new_suite,
            new_cover,
            output_path,
        })
    }

    /// Populate the path -> test-index map from the old suite, executing
    /// it against the old version first when it carries no path ids
    fn build_path_test_map(&mut self, old_suite: &mut TestSuite) -> Result<()> {
        if !old_suite.executed {
            tracing::info!("old suite not executed; running it against the old version");
            let mut engine = TestEngine::new(&self.config, &self.old_src, &self.function_name)?;
            engine.run(old_suite)?;
        }
        for (idx, case) in old_suite.test_cases.iter().enumerate() {
            if case.path_id != INVALID_PATH_ID {
                self.path_test_map.entry(case.path_id).or_default().push(idx);
            }
        }
        Ok(())
    }

    /// Coverage vector of the old CFG: a path is covered when at least one
    /// old test matched it
    pub fn old_cover(&self) -> Vec<bool> {
        (0..self.old_cfg.paths().len() as PathId)
            .map(|id| self.path_test_map.contains_key(&id))
            .collect()
    }

    /// Write the reuse report next to `outcome.output_path`
    pub fn write_report(&self, outcome: &ReuseOutcome, report_path: &Path) -> Result<()> {
        let report = ReuseReport {
            old_src_file: self.old_src.display().to_string(),
            new_src_file: self.new_src.display().to_string(),
            function_name: self.function_name.clone(),
            old_info: VersionInfo {
                cfg_dot: export_dot(&self.old_cfg),
                paths: self.old_cfg.paths().to_vec(),
                cover_info: self.old_cover(),
            },
            new_info: VersionInfo {
                cfg_dot: export_dot(&self.new_cfg),
                paths: self.new_cfg.paths().to_vec(),
                cover_info: outcome.new_cover.clone(),
            },
            path_similarity: self.reuse_map.clone(),
        };
        let text =
            serde_json::to_string_pretty(&report).context("failed to serialize reuse report")?;
        std::fs::write(report_path, text)
            .with_context(|| format!("failed to write report {}", report_path.display()))
    }
}

fn version_cfg(config: &ToolConfig, src: &Path, function_name: &str) -> Result<Cfg> {
    let ir_file = src.with_extension("ll");
    compile_src_to_ir(config, src, &ir_file)?;
    let module = Module::parse_file(&ir_file)?;
    let function = module
        .function(function_name)
        .with_context(|| format!("function {function_name} not found in {}", ir_file.display()))?;
    let mut cfg = build_cfg(function)?;
    if let Err(err) = annotate_from_source(&mut cfg, function, src) {
        tracing::warn!(%err, src = %src.display(), "source annotation unavailable");
    }
    Ok(cfg)
}

/// Partition old-test indices into (full reuse, inputs-only reuse)
///
/// Full reuse collects every test behind a pairing above the threshold;
/// the inputs-only pass then takes what full reuse did not claim, so the
/// sets are disjoint by construction.
pub fn partition(reuse_map: &ReuseMap, path_test_map: &PathTestMap) -> (BTreeSet<usize>, BTreeSet<usize>) {
    let mut full = BTreeSet::new();
    for pairing in reuse_map.values() {
        if pairing.old_path_id == INVALID_PATH_ID || pairing.similarity <= SIMILARITY_THRESHOLD {
            continue;
        }
        if let Some(test_ids) = path_test_map.get(&pairing.old_path_id) {
            full.extend(test_ids.iter().copied());
        }
    }

    let mut inputs_only = BTreeSet::new();
    for pairing in reuse_map.values() {
        if pairing.old_path_id == INVALID_PATH_ID || pairing.similarity > SIMILARITY_THRESHOLD {
            continue;
        }
        if let Some(test_ids) = path_test_map.get(&pairing.old_path_id) {
            for &test_id in test_ids {
                if !full.contains(&test_id) {
                    inputs_only.insert(test_id);
                }
            }
        }
    }
    (full, inputs_only)
}

/// Build the new suite: full-reuse cases first, inputs-only after, both in
/// ascending old-test order
pub fn assemble_suite(
    old_suite: &TestSuite,
    full: &BTreeSet<usize>,
    inputs_only: &BTreeSet<usize>,
    function_name: &str,
    new_src: &Path,
) -> TestSuite {
    let mut suite = TestSuite {
        src_file: new_src.display().to_string(),
        func_name: function_name.to_string(),
        description: format!(
            "new test suite reused from old test suite for function {function_name}"
        ),
        executed: false,
        coverage: 0.0,
        test_cases: Vec::new(),
    };
    for &idx in full {
        let mut case = old_suite.case(idx).clone();
        case.path_id = INVALID_PATH_ID;
        suite.add_case(case);
    }
    for &idx in inputs_only {
        suite.add_case_without_expectation(old_suite.case(idx));
    }
    suite
}

/// `<dir>/<stem>_reused.json` next to the input suite
fn reused_suite_path(suite_path: &Path) -> PathBuf {
    let stem = suite_path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    suite_path.with_file_name(format!("{stem}_reused.json"))
}

/// Reuse report written by `--report`
#[derive(Debug, Serialize)]
pub struct ReuseReport {
    pub old_src_file: String,
    pub new_src_file: String,
    pub function_name: String,
    pub old_info: VersionInfo,
    pub new_info: VersionInfo,
    #[serde(rename = "pathSimilarity")]
    pub path_similarity: ReuseMap,
}

#[derive(Debug, Serialize)]
pub struct VersionInfo {
    pub cfg_dot: String,
    pub paths: Vec<CfgPath>,
    #[serde(rename = "coverInfo")]
    pub cover_info: Vec<bool>,
}
