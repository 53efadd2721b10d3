// Retrace: regression-test reuse for C functions
//
// Builds CFGs from a function's LLVM IR, enumerates loop-aware static
// paths, maps an old JSON test suite onto the new version by path
// similarity, and steers a symbolic executor toward uncovered paths.

pub mod cfg;
pub mod cli;
pub mod config;
pub mod driver;
pub mod exec;
pub mod instrument;
pub mod ir;
pub mod output;
pub mod reuse;
pub mod similarity;
pub mod suite;
pub mod symbex;

pub use cfg::{build_cfg, Cfg, INVALID_PATH_ID};
pub use config::{ToolConfig, KLEE_ARRAY_SIZE, SIMILARITY_THRESHOLD};
pub use reuse::ReuseEngine;
pub use suite::TestSuite;
