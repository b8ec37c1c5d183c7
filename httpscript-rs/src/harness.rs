//! Loader → evaluator → result capture, for scripts referred to by name.

use std::sync::Arc;
use std::time::Duration;

use crate::client::HttpClient;
use crate::error::LoadError;
use crate::evaluator::ScriptEvaluator;
use crate::output::{OutputSink, TracingSink};
use crate::pool::ScriptPool;
use crate::result::{DiscardResults, ExecutionResult, ResultSink};
use crate::script::{Script, ScriptLoader};

/// Runs named scripts and hands each outcome to a [`ResultSink`].
///
/// A script that fails to load is captured as a `NotFound` failure and
/// never reaches the evaluator.
pub struct Harness<L> {
    loader: L,
    evaluator: ScriptEvaluator,
    output: Arc<dyn OutputSink>,
    results: Arc<dyn ResultSink>,
}

impl<L: ScriptLoader> Harness<L> {
    /// Output goes to `tracing`; results are not kept anywhere.
    pub fn new(loader: L, evaluator: ScriptEvaluator) -> Self {
        Self {
            loader,
            evaluator,
            output: Arc::new(TracingSink),
            results: Arc::new(DiscardResults),
        }
    }

    pub fn with_output(mut self, output: Arc<dyn OutputSink>) -> Self {
        self.output = output;
        self
    }

    pub fn with_results(mut self, results: Arc<dyn ResultSink>) -> Self {
        self.results = results;
        self
    }

    pub fn loader(&self) -> &L {
        &self.loader
    }

    pub fn evaluator(&self) -> &ScriptEvaluator {
        &self.evaluator
    }

    /// Load and run `identifier` on the current task.
    pub async fn run(&self, identifier: &str, client: Arc<dyn HttpClient>) -> ExecutionResult {
        let deadline = self.evaluator.config().timeout;
        self.run_with_deadline(identifier, client, deadline).await
    }

    /// Load and run `identifier`, timing out after `deadline`.
    pub async fn run_with_deadline(
        &self,
        identifier: &str,
        client: Arc<dyn HttpClient>,
        deadline: Duration,
    ) -> ExecutionResult {
        let result = match self.load(identifier) {
            Ok(script) => {
                self.evaluator
                    .run_with_deadline(&script, client, Arc::clone(&self.output), deadline)
                    .await
            }
            Err(err) => ExecutionResult::failure(err.kind(), err.to_string()),
        };
        self.results.capture(identifier, &result);
        result
    }

    /// Load `identifier` and run it on one of `pool`'s workers.
    pub async fn run_pooled(
        &self,
        pool: &ScriptPool,
        identifier: &str,
        client: Arc<dyn HttpClient>,
    ) -> ExecutionResult {
        let result = match self.load(identifier) {
            Ok(script) => {
                let deadline = self.evaluator.config().timeout;
                pool.submit_with_deadline(script, client, Arc::clone(&self.output), deadline)
                    .await
            }
            Err(err) => ExecutionResult::failure(err.kind(), err.to_string()),
        };
        self.results.capture(identifier, &result);
        result
    }

    fn load(&self, identifier: &str) -> Result<Script, LoadError> {
        self.loader.load(identifier).inspect_err(|err| {
            tracing::debug!(script = identifier, error = %err, "script load failed");
        })
    }
}
