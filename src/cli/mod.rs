// CLI argument surface

use clap::Parser;

/// Retrace - regression-test reuse for C functions
///
/// Rebuilds the control-flow graph of an evolved C function from its LLVM
/// IR, maps an existing JSON test suite onto the new path set by sequence
/// similarity, and steers a symbolic executor toward the paths the reused
/// suite leaves uncovered.
#[derive(Parser, Debug, Clone)]
#[command(name = "retrace")]
#[command(author, version, about)]
pub struct Cli {
    /// Old version of the source file under test
    #[arg(long, default_value = "")]
    pub old: String,

    /// New version of the source file under test
    #[arg(long, default_value = "")]
    pub new: String,

    /// Name of the function under test
    #[arg(long, default_value = "")]
    pub func: String,

    /// JSON test suite previously exercised on the old version
    #[arg(long, default_value = "")]
    pub tests: String,

    /// Write the new CFG as a Graphviz dot file next to the new source
    #[arg(long)]
    pub cfg_dot: bool,

    /// Write a reuse report (similarity map, coverage, dot graphs)
    #[arg(long)]
    pub report: bool,

    /// C compiler used for IR emission and executable builds
    #[arg(long, default_value = "clang-13")]
    pub compiler: String,

    /// Script driving the symbolic executor over instrumented IR files
    #[arg(long, default_value = "scripts/klee_ir.py")]
    pub symbex_script: String,

    /// Worker threads for the test executor
    #[arg(long, default_value_t = 50)]
    pub workers: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_required_arguments() {
        let cli = Cli::parse_from([
            "retrace", "--old", "old.c", "--new", "new.c", "--func", "f", "--tests", "t.json",
        ]);
        assert_eq!(cli.old, "old.c");
        assert_eq!(cli.new, "new.c");
        assert_eq!(cli.func, "f");
        assert_eq!(cli.tests, "t.json");
        assert!(!cli.cfg_dot);
        assert!(!cli.report);
        assert_eq!(cli.compiler, "clang-13");
    }

    #[test]
    fn test_omitted_arguments_default_to_empty() {
        let cli = Cli::parse_from(["retrace", "--old", "old.c"]);
        assert_eq!(cli.old, "old.c");
        assert!(cli.new.is_empty());
        assert!(cli.func.is_empty());
        assert!(cli.tests.is_empty());
    }

    #[test]
    fn test_flags_and_overrides() {
        let cli = Cli::parse_from([
            "retrace",
            "--old", "old.c",
            "--new", "new.c",
            "--func", "f",
            "--tests", "t.json",
            "--cfg-dot",
            "--report",
            "--compiler", "clang",
            "--workers", "4",
        ]);
        assert!(cli.cfg_dot);
        assert!(cli.report);
        assert_eq!(cli.compiler, "clang");
        assert_eq!(cli.workers, 4);
    }
}
