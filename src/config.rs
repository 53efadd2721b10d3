//! Tool configuration: external commands, thresholds, worker limits

/// Similarity above which a test is reused together with its expectations
pub const SIMILARITY_THRESHOLD: f64 = 0.35;

/// Symbolic array size used by the symbolic-executor driver generator
pub const KLEE_ARRAY_SIZE: usize = 5;

/// External command configuration
#[derive(Debug, Clone)]
pub struct ToolConfig {
    /// C compiler used for IR emission and executable builds
    pub compiler: String,
    /// Flags for source -> textual IR compilation
    pub ir_flags: Vec<String>,
    /// Flags for IR -> executable compilation
    pub exe_flags: Vec<String>,
    /// Script that drives the symbolic executor over instrumented IR files
    pub symbex_script: String,
    /// Worker threads for the test executor
    pub max_workers: usize,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            compiler: "clang-13".to_string(),
            ir_flags: ["-S", "-emit-llvm", "-g"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            exe_flags: Vec::new(),
            symbex_script: "scripts/klee_ir.py".to_string(),
            max_workers: 50,
        }
    }
}

impl ToolConfig {
    pub fn with_compiler(mut self, compiler: impl Into<String>) -> Self {
        self.compiler = compiler.into();
        self
    }

    pub fn with_symbex_script(mut self, script: impl Into<String>) -> Self {
        self.symbex_script = script.into();
        self
    }

    pub fn with_max_workers(mut self, workers: usize) -> Self {
        self.max_workers = workers.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ToolConfig::default();
        assert_eq!(config.compiler, "clang-13");
        assert_eq!(config.ir_flags, vec!["-S", "-emit-llvm", "-g"]);
        assert_eq!(config.max_workers, 50);
    }

    #[test]
    fn test_builder_overrides() {
        let config = ToolConfig::default()
            .with_compiler("clang")
            .with_symbex_script("run_klee.py")
            .with_max_workers(0);
        assert_eq!(config.compiler, "clang");
        assert_eq!(config.symbex_script, "run_klee.py");
        assert_eq!(config.max_workers, 1); // clamped to at least one worker
    }
}
