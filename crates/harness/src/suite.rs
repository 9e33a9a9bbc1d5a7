//! Suite driver: runs tests through the module's hooks with guaranteed cleanup

use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Instant;
use tracing::{error, info};

use crate::actions::StepResult;
use crate::connector::Connector;
use crate::error::HarnessResult;
use crate::module::{Module, TestFailure, TestInfo};

/// Result of running a single test
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub name: String,
    pub success: bool,
    pub duration_ms: u64,
    #[serde(default)]
    pub steps: Vec<StepResult>,
    pub error: Option<String>,
}

/// Result of running all tests
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestSuiteResult {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub duration_ms: u64,
    pub results: Vec<TestResult>,
}

impl TestSuiteResult {
    pub fn from_results(results: Vec<TestResult>, duration_ms: u64) -> Self {
        let passed = results.iter().filter(|r| r.success).count();
        Self {
            total: results.len(),
            passed,
            failed: results.len() - passed,
            skipped: 0,
            duration_ms,
            results,
        }
    }
}

/// A running suite.
///
/// `after` runs for every test whatever its outcome, including panics, and
/// `after_suite` runs on [`Suite::finish`] or, failing that, on drop.
pub struct Suite {
    module: Module,
    results: Vec<TestResult>,
    started: Instant,
    finished: bool,
}

impl Suite {
    /// Initialize the module and run the suite-before hook
    pub fn start(mut module: Module) -> HarnessResult<Self> {
        module.initialize()?;
        module.before_suite()?;

        Ok(Self {
            module,
            results: Vec::new(),
            started: Instant::now(),
            finished: false,
        })
    }

    pub fn module(&self) -> &Module {
        &self.module
    }

    pub fn module_mut(&mut self) -> &mut Module {
        &mut self.module
    }

    pub fn results(&self) -> &[TestResult] {
        &self.results
    }

    /// Run one test against a fresh connector
    pub fn run<F>(&mut self, test: TestInfo, body: F) -> &mut TestResult
    where
        F: FnOnce(&mut Connector) -> anyhow::Result<()>,
    {
        let start = Instant::now();

        let outcome = match self.module.before(&test) {
            Ok(()) => match self.module.client_mut() {
                Ok(client) => match catch_unwind(AssertUnwindSafe(|| body(client))) {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) => Err(TestFailure::from(e)),
                    Err(panic) => Err(TestFailure::from_panic(panic)),
                },
                Err(e) => Err(TestFailure::from(e)),
            },
            Err(e) => Err(TestFailure::from(e)),
        };

        if let Err(failure) = &outcome {
            self.module.failed(&test, failure);
        }
        self.module.after(&test);

        let duration_ms = start.elapsed().as_millis() as u64;
        match &outcome {
            Ok(()) => info!("✓ {} ({} ms)", test.name, duration_ms),
            Err(failure) => error!("✗ {} - {}", test.name, failure),
        }

        self.results.push(TestResult {
            name: test.name,
            success: outcome.is_ok(),
            duration_ms,
            steps: Vec::new(),
            error: outcome.err().map(|f| f.message),
        });

        let last = self.results.len() - 1;
        &mut self.results[last]
    }

    /// Run the suite-after hook and summarize
    pub fn finish(mut self) -> TestSuiteResult {
        self.finished = true;
        self.module.after_suite();

        let duration_ms = self.started.elapsed().as_millis() as u64;
        let summary = TestSuiteResult::from_results(std::mem::take(&mut self.results), duration_ms);

        info!(
            "Test Results: {} passed, {} failed, {} skipped ({} ms)",
            summary.passed, summary.failed, summary.skipped, summary.duration_ms
        );
        summary
    }
}

impl Drop for Suite {
    fn drop(&mut self) {
        if !self.finished {
            self.module.after_suite();
        }
    }
}
