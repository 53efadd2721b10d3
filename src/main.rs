// Retrace: regression-test reuse for C functions
//
// Pipeline: build old/new CFGs, reuse the old suite onto the new version,
// execute it, then hand uncovered paths to the symbolic executor.

use anyhow::Result;
use clap::Parser;
use std::path::Path;

use retrace::cfg::export_dot;
use retrace::cli::Cli;
use retrace::config::ToolConfig;
use retrace::output;
use retrace::reuse::ReuseEngine;
use retrace::symbex::TestGenerator;

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    if cli.old.is_empty() || cli.new.is_empty() || cli.func.is_empty() || cli.tests.is_empty() {
        output::error("--old, --new, --func and --tests must all be given");
        std::process::exit(output::EXIT_MISSING_INPUT);
    }
    for input in [&cli.old, &cli.new, &cli.tests] {
        if !Path::new(input).exists() {
            output::exit_missing_input(input);
        }
    }

    run_pipeline(cli)
}

fn run_pipeline(cli: Cli) -> Result<()> {
    let config = ToolConfig::default()
        .with_compiler(&cli.compiler)
        .with_symbex_script(&cli.symbex_script)
        .with_max_workers(cli.workers);

    let mut engine = ReuseEngine::new(&config, &cli.old, &cli.new, &cli.func)?;

    if cli.cfg_dot {
        let dot_path = Path::new(&cli.new).with_extension("dot");
        std::fs::write(&dot_path, export_dot(engine.new_cfg()))?;
        output::info(&format!("wrote CFG dot graph to {}", dot_path.display()));
    }

    let outcome = engine.reuse_suite(Path::new(&cli.tests))?;
    output::info(&format!(
        "reused suite of {} cases written to {} (coverage {:.2})",
        outcome.suite.len(),
        outcome.output_path.display(),
        outcome.suite.coverage
    ));

    if cli.report {
        let report_path = Path::new(&cli.tests).with_file_name("reuse_report.json");
        engine.write_report(&outcome, &report_path)?;
        output::info(&format!("wrote reuse report to {}", report_path.display()));
    }

    let uncovered = outcome.uncovered_paths();
    if uncovered.is_empty() {
        output::info("every new path is covered by the reused suite");
        return Ok(());
    }
    output::warn(&format!(
        "{} new paths uncovered; invoking symbolic executor",
        uncovered.len()
    ));
    let generator = TestGenerator::new(&config, &cli.new, &cli.func, uncovered);
    generator.run()?;

    Ok(())
}
