//! Test execution against an instrumented binary
//!
//! Compiles the source under test and its generated driver, applies the
//! block-marker instrumentation, and runs every test case as a subprocess.
//! The executor contract is deliberately narrow: an ordered list of
//! command lines goes in, an equally-ordered list of captured stdouts
//! comes out. A worker pool drains a shared queue under a mutex and
//! writes each capture to the slot of its submission index, so ordering
//! is preserved regardless of completion order.

use crate::cfg::{build_cfg, Cfg, INVALID_PATH_ID};
use crate::config::ToolConfig;
use crate::driver::DriverGenerator;
use crate::instrument::BlockMarker;
use crate::ir::Module;
use crate::suite::TestSuite;
use anyhow::{bail, Context, Result};
use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;

/// Compile a C source to textual LLVM IR
pub fn compile_src_to_ir(config: &ToolConfig, src: &Path, ir: &Path) -> Result<()> {
    tracing::debug!(src = %src.display(), ir = %ir.display(), "compiling source to IR");
    let output = Command::new(&config.compiler)
        .args(&config.ir_flags)
        .arg(src)
        .arg("-o")
        .arg(ir)
        .output()
        .with_context(|| format!("failed to run compiler {}", config.compiler))?;
    if !output.status.success() {
        bail!(
            "compiling {} to IR failed: {}",
            src.display(),
            String::from_utf8_lossy(&output.stderr)
        );
    }
    Ok(())
}

/// Compile an IR file to an executable
pub fn compile_ir_to_exec(config: &ToolConfig, ir: &Path, exe: &Path) -> Result<()> {
    tracing::debug!(ir = %ir.display(), exe = %exe.display(), "compiling IR to executable");
    let output = Command::new(&config.compiler)
        .args(&config.exe_flags)
        .arg(ir)
        .arg("-o")
        .arg(exe)
        .output()
        .with_context(|| format!("failed to run compiler {}", config.compiler))?;
    if !output.status.success() {
        bail!(
            "compiling {} to executable failed: {}",
            ir.display(),
            String::from_utf8_lossy(&output.stderr)
        );
    }
    Ok(())
}

fn run_shell(command: &str) -> String {
    match Command::new("sh").arg("-c").arg(command).output() {
        Ok(output) => String::from_utf8_lossy(&output.stdout).to_string(),
        Err(err) => {
            tracing::error!(command, %err, "cannot execute command");
            String::new()
        }
    }
}

/// Run command lines on a worker pool; output order matches input order
pub fn run_commands(commands: &[String], max_workers: usize) -> Vec<String> {
    let worker_count = max_workers.max(1).min(commands.len().max(1));
    let queue: Mutex<VecDeque<(usize, &String)>> =
        Mutex::new(commands.iter().enumerate().collect());
    let results: Vec<Mutex<String>> = commands.iter().map(|_| Mutex::new(String::new())).collect();

    std::thread::scope(|scope| {
        for _ in 0..worker_count {
            scope.spawn(|| loop {
                let task = queue.lock().expect("queue lock poisoned").pop_front();
                let Some((idx, command)) = task else {
                    return;
                };
                let output = run_shell(command);
                *results[idx].lock().expect("result lock poisoned") = output;
            });
        }
    });

    results
        .into_iter()
        .map(|slot| slot.into_inner().expect("result lock poisoned"))
        .collect()
}

/// Sequential fallback with the same contract as [`run_commands`]
pub fn run_commands_sequential(commands: &[String]) -> Vec<String> {
    commands.iter().map(|command| run_shell(command)).collect()
}

/// Strip all whitespace from a captured trace
fn normalize_trace(raw: &str) -> String {
    raw.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Assign each test case its matched path id and record coverage
///
/// Cases whose trace matches no path keep `INVALID_PATH_ID` and are
/// reported; the pipeline continues.
pub fn assign_results(cfg: &mut Cfg, suite: &mut TestSuite, outputs: &[String]) {
    let total_paths = cfg.paths().len();
    let mut covered = HashSet::new();

    for (case, raw) in suite.test_cases.iter_mut().zip(outputs) {
        let trace = normalize_trace(raw);
        case.result = trace.clone();
        let path_id = cfg.match_best_path_id(&trace);
        if path_id == INVALID_PATH_ID {
            tracing::error!(
                case = %case.summary(),
                trace,
                "cannot match any path for test case"
            );
        } else {
            covered.insert(path_id);
        }
        case.path_id = path_id;
    }

    suite.executed = true;
    suite.coverage = if total_paths == 0 {
        0.0
    } else {
        covered.len() as f64 / total_paths as f64
    };
}

/// Drives one function version: owns its CFG and the instrumented binary
pub struct TestEngine {
    config: ToolConfig,
    src_file: PathBuf,
    function_name: String,
    cfg: Cfg,
    exe_file: PathBuf,
}

impl TestEngine {
    /// Compile, generate and instrument everything needed to execute test
    /// cases against `function_name` in `src_file`
    pub fn new(config: &ToolConfig, src_file: impl Into<PathBuf>, function_name: &str) -> Result<Self> {
        let src_file: PathBuf = src_file.into();

        let ir_file = src_file.with_extension("ll");
        compile_src_to_ir(config, &src_file, &ir_file)?;

        let module = Module::parse_file(&ir_file)?;
        let function = module
            .function(function_name)
            .with_context(|| format!("function {function_name} not found in {}", ir_file.display()))?;
        let mut cfg = build_cfg(function)?;
        if let Err(err) = crate::cfg::annotate_from_source(&mut cfg, function, &src_file) {
            tracing::warn!(%err, "source annotation unavailable");
        }

        let generator = DriverGenerator::new(&src_file)?;
        let driver_file = generator.generate_executable(function_name)?;
        let driver_ir = driver_file.with_extension("ll");
        compile_src_to_ir(config, &driver_file, &driver_ir)?;

        let driver_module = Module::parse_file(&driver_ir)?;
        let instrumented = BlockMarker::new(&driver_module, function_name).run()?;
        let instrumented_ir = sibling(&driver_file, "_instrumented.ll");
        instrumented.write_file(&instrumented_ir)?;

        let exe_file = sibling(&driver_file, "_instrumented");
        compile_ir_to_exec(config, &instrumented_ir, &exe_file)?;

        Ok(Self {
            config: config.clone(),
            src_file,
            function_name: function_name.to_string(),
            cfg,
            exe_file,
        })
    }

    pub fn cfg(&self) -> &Cfg {
        &self.cfg
    }

    pub fn cfg_mut(&mut self) -> &mut Cfg {
        &mut self.cfg
    }

    pub fn src_file(&self) -> &Path {
        &self.src_file
    }

    pub fn function_name(&self) -> &str {
        &self.function_name
    }

    /// Execute every test case, record traces, path ids and coverage
    pub fn run(&mut self, suite: &mut TestSuite) -> Result<Vec<String>> {
        let commands: Vec<String> = suite
            .test_cases
            .iter()
            .map(|case| {
                let mut command = self.exe_file.display().to_string();
                for input in &case.inputs {
                    command.push_str(&format!(" \"{}\"", input.data));
                }
                command
            })
            .collect();

        tracing::info!(
            function = %self.function_name,
            cases = commands.len(),
            "executing test suite"
        );
        let outputs = run_commands(&commands, self.config.max_workers);
        assign_results(&mut self.cfg, suite, &outputs);
        Ok(outputs)
    }
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    path.with_file_name(format!("{stem}{suffix}"))
}
