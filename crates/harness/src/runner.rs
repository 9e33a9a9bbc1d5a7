//! Scenario runner: loads YAML scenarios and runs them as one suite

use std::path::PathBuf;
use std::time::Instant;
use tracing::info;

use crate::actions::execute_steps;
use crate::config::ModuleConfig;
use crate::error::{HarnessError, HarnessResult};
use crate::module::{Module, TestInfo};
use crate::spec::ScenarioSpec;
use crate::suite::{Suite, TestSuiteResult};

/// Configuration for the runner
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub module: ModuleConfig,
    pub specs_dir: PathBuf,
    pub output_dir: PathBuf,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            module: ModuleConfig::default(),
            specs_dir: PathBuf::from("tests/functional"),
            output_dir: PathBuf::from("test-results"),
        }
    }
}

/// Runs scenario specs through a [`Suite`]
pub struct TestRunner {
    module_config: ModuleConfig,
    specs_dir: PathBuf,
    output_dir: PathBuf,
}

impl Default for TestRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl TestRunner {
    /// Create a new test runner with default configuration
    pub fn new() -> Self {
        Self::with_config(RunnerConfig::default())
    }

    /// Create a test runner with custom configuration
    pub fn with_config(config: RunnerConfig) -> Self {
        Self {
            module_config: config.module,
            specs_dir: config.specs_dir,
            output_dir: config.output_dir,
        }
    }

    /// Run all scenarios in the specs directory
    pub fn run_all(&self) -> HarnessResult<TestSuiteResult> {
        let specs = ScenarioSpec::load_all(&self.specs_dir)?;
        self.run_specs(&specs)
    }

    /// Run scenarios matching a tag
    pub fn run_tagged(&self, tag: &str) -> HarnessResult<TestSuiteResult> {
        let specs = ScenarioSpec::load_all(&self.specs_dir)?;
        let filtered: Vec<ScenarioSpec> = ScenarioSpec::filter_by_tag(&specs, tag)
            .into_iter()
            .cloned()
            .collect();
        self.run_specs(&filtered)
    }

    /// Run a specific scenario by name
    pub fn run_named(&self, name: &str) -> HarnessResult<TestSuiteResult> {
        let specs = ScenarioSpec::load_all(&self.specs_dir)?;
        let spec = specs
            .into_iter()
            .find(|s| s.name == name)
            .ok_or_else(|| HarnessError::SpecParse(format!("Test not found: {}", name)))?;

        self.run_specs(std::slice::from_ref(&spec))
    }

    /// Run a list of scenarios as a single suite
    pub fn run_specs(&self, specs: &[ScenarioSpec]) -> HarnessResult<TestSuiteResult> {
        self.run_with(Module::new(self.module_config.clone()), specs)
    }

    /// Run scenarios through an already built module
    pub fn run_with(&self, module: Module, specs: &[ScenarioSpec]) -> HarnessResult<TestSuiteResult> {
        let start = Instant::now();
        let mut suite = Suite::start(module)?;

        info!("Running {} test(s)...", specs.len());

        for spec in specs {
            let mut steps = Vec::new();
            let info = TestInfo {
                name: spec.name.clone(),
                tags: spec.tags.clone(),
            };

            let result = suite.run(info, |client| {
                steps = execute_steps(client, &spec.steps);
                match steps.iter().find(|s| !s.success) {
                    Some(failed) => Err(HarnessError::StepFailed {
                        step: failed.step_name.clone(),
                        reason: failed.error.clone().unwrap_or_else(|| "unknown error".to_string()),
                    }
                    .into()),
                    None => Ok(()),
                }
            });
            result.steps = steps;
        }

        let mut summary = suite.finish();
        summary.duration_ms = start.elapsed().as_millis() as u64;
        Ok(summary)
    }

    /// Write test results to JSON file
    pub fn write_results(&self, results: &TestSuiteResult) -> HarnessResult<PathBuf> {
        std::fs::create_dir_all(&self.output_dir)?;

        let path = self.output_dir.join("test-results.json");
        let json = serde_json::to_string_pretty(results)?;
        std::fs::write(&path, json)?;

        info!("Results written to: {}", path.display());
        Ok(path)
    }
}
