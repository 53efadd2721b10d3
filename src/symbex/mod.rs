//! Symbolic-executor hand-off
//!
//! For every new-version path left uncovered by the reused suite, a
//! symbolic driver is compiled once, a fresh copy of its IR is
//! path-instrumented, and the instrumented files are handed to the
//! external executor script in a single invocation. The executor's
//! runtime provides the `klee_path_trigger` / `klee_path_conditional_exit`
//! externs whose placement the instrumenter guarantees.

use crate::cfg::PathId;
use crate::config::ToolConfig;
use crate::driver::DriverGenerator;
use crate::exec::compile_src_to_ir;
use crate::instrument::PathInstrumenter;
use crate::ir::Module;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::process::Command;

/// Synthesizes tests for uncovered paths via the symbolic executor
pub struct TestGenerator {
    config: ToolConfig,
    src_file: PathBuf,
    function_name: String,
    uncovered_paths: Vec<PathId>,
}

impl TestGenerator {
    pub fn new(
        config: &ToolConfig,
        src_file: impl Into<PathBuf>,
        function_name: impl Into<String>,
        uncovered_paths: Vec<PathId>,
    ) -> Self {
        Self {
            config: config.clone(),
            src_file: src_file.into(),
            function_name: function_name.into(),
            uncovered_paths,
        }
    }

    /// Emit one instrumented IR file per instrumentable path and invoke
    /// the executor script over all of them
    ///
    /// Returns the instrumented file list. Paths without a unique
    /// subsequence are skipped and reported; the others proceed.
    pub fn run(&self) -> Result<Vec<PathBuf>> {
        if self.uncovered_paths.is_empty() {
            tracing::info!("all paths covered; nothing to synthesize");
            return Ok(Vec::new());
        }

        let generator = DriverGenerator::new(&self.src_file)?;
        let driver_file = generator.generate_symbolic(&self.function_name)?;
        let driver_ir = driver_file.with_extension("ll");
        compile_src_to_ir(&self.config, &driver_file, &driver_ir)?;

        let mut instrumented_files = Vec::new();
        for &path_id in &self.uncovered_paths {
            // fresh module per path: each output carries one path's markers
            let module = Module::parse_file(&driver_ir)?;
            let mut instrumenter = PathInstrumenter::new(&module, &self.function_name)?;
            let out = self.instrumented_path(path_id);
            if instrumenter.write_instrumented(path_id, &out)? {
                tracing::info!(path = path_id, file = %out.display(), "instrumented for symbolic execution");
                instrumented_files.push(out);
            }
        }

        if instrumented_files.is_empty() {
            tracing::warn!("no uncovered path could be instrumented");
            return Ok(instrumented_files);
        }
        self.invoke_executor(&instrumented_files)?;
        Ok(instrumented_files)
    }

    /// `<src dir>/<func>_klee_instrumented_<path id>.ll`
    fn instrumented_path(&self, path_id: PathId) -> PathBuf {
        let dir = self.src_file.parent().unwrap_or_else(|| Path::new("."));
        dir.join(format!(
            "{}_klee_instrumented_{}.ll",
            self.function_name, path_id
        ))
    }

    fn invoke_executor(&self, files: &[PathBuf]) -> Result<()> {
        tracing::info!(
            script = %self.config.symbex_script,
            files = files.len(),
            "invoking symbolic executor"
        );
        let output = Command::new(&self.config.symbex_script)
            .args(files)
            .output()
            .with_context(|| {
                format!("failed to run symbolic executor {}", self.config.symbex_script)
            })?;
        if !output.status.success() {
            anyhow::bail!(
                "symbolic executor failed: {}",
                String::from_utf8_lossy(&output.stderr)
            );
        }
        Ok(())
    }
}
