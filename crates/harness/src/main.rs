//! routeprobe scenario runner
//!
//! Runs YAML scenarios against the container named in the module config.

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use routeprobe_harness::runner::RunnerConfig;
use routeprobe_harness::{HarnessResult, ModuleConfig, TestRunner};

#[derive(Parser, Debug)]
#[command(name = "routeprobe")]
#[command(about = "In-process functional test runner")]
struct Args {
    /// Module configuration file
    #[arg(short, long, default_value = "routeprobe.yaml")]
    config: PathBuf,

    /// Path to scenario specs directory
    #[arg(short, long, default_value = "tests/functional")]
    specs: PathBuf,

    /// Run only scenarios matching this tag
    #[arg(short, long)]
    tag: Option<String>,

    /// Run only a specific scenario by name
    #[arg(short, long)]
    name: Option<String>,

    /// Follow redirects regardless of the config file
    #[arg(long)]
    follow_redirects: bool,

    /// Output directory for results
    #[arg(short, long, default_value = "test-results")]
    output: PathBuf,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let args = Args::parse();

    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)),
        )
        .with_target(false)
        .init();

    match run(args) {
        Ok(true) => std::process::exit(0),
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(2);
        }
    }
}

fn run(args: Args) -> HarnessResult<bool> {
    let mut module = ModuleConfig::load(&args.config)?;
    module.validate()?;
    if args.follow_redirects {
        module.follow_redirects = true;
    }

    let runner = TestRunner::with_config(RunnerConfig {
        module,
        specs_dir: args.specs,
        output_dir: args.output,
    });

    let results = if let Some(name) = args.name {
        runner.run_named(&name)?
    } else if let Some(tag) = args.tag {
        runner.run_tagged(&tag)?
    } else {
        runner.run_all()?
    };

    runner.write_results(&results)?;

    Ok(results.failed == 0)
}
