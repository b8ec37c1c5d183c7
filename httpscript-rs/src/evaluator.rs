//! Script evaluation.
//!
//! Every run gets a brand-new Lua state: nothing registered for one script
//! is visible to another, and the evaluator itself keeps no state between
//! runs. A script chunk is expected to return its entry function; the
//! evaluator calls it with no arguments as a coroutine and resolves once it
//! returns or fails. A chunk that returns a plain value resolves to that
//! value directly.
//!
//! The deadline is enforced twice: the whole run is wrapped in a
//! `tokio::time::timeout` (for scripts parked on I/O), and a
//! [`Watchdog`](crate::lua) instruction hook aborts the VM once the deadline
//! has passed (for scripts that spin without ever yielding). A run that
//! catches the abort and returns anyway is still a `Timeout`.
//!
//! Callers customise runs through [`ScriptHooks`]: extra bindings go into
//! the fresh state before evaluation, and the resolved value can be
//! transformed before it becomes the payload.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use mlua::prelude::*;
use tracing::Instrument;

use crate::client::HttpClient;
use crate::config::EvalConfig;
use crate::error::{ClientError, ErrorKind};
use crate::lua::{call_watched, register_api, sandbox_libs, Watchdog};
use crate::output::OutputSink;
use crate::result::ExecutionResult;
use crate::script::Script;

// ── ScriptHooks ───────────────────────────────────────────────────────────────

/// Per-run customisation of the script state and its result.
pub trait ScriptHooks: Send + Sync {
    /// Called on every fresh state after the built-in API is registered and
    /// before the script is loaded.
    fn init(&self, lua: &Lua) -> LuaResult<()> {
        let _ = lua;
        Ok(())
    }

    /// Turn the value the script resolved with into the success payload.
    fn transform(&self, lua: &Lua, value: LuaValue) -> LuaResult<serde_json::Value> {
        lua.from_value(value)
    }
}

/// The built-in API only; values are converted as-is.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultHooks;

impl ScriptHooks for DefaultHooks {}

// ── ScriptEvaluator ───────────────────────────────────────────────────────────

/// Runs scripts against a client facade.
#[derive(Clone)]
pub struct ScriptEvaluator {
    config: EvalConfig,
    hooks: Arc<dyn ScriptHooks>,
}

impl Default for ScriptEvaluator {
    fn default() -> Self {
        Self::new(EvalConfig::default())
    }
}

impl fmt::Debug for ScriptEvaluator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptEvaluator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ScriptEvaluator {
    pub fn new(config: EvalConfig) -> Self {
        Self {
            config,
            hooks: Arc::new(DefaultHooks),
        }
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn ScriptHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn config(&self) -> &EvalConfig {
        &self.config
    }

    /// Run `script` with `client` bound as `client`, using the configured
    /// timeout.
    pub async fn run(
        &self,
        script: &Script,
        client: Arc<dyn HttpClient>,
        output: Arc<dyn OutputSink>,
    ) -> ExecutionResult {
        self.run_with_deadline(script, client, output, self.config.timeout)
            .await
    }

    /// Run `script`, aborting with a `Timeout` failure after `deadline`.
    pub async fn run_with_deadline(
        &self,
        script: &Script,
        client: Arc<dyn HttpClient>,
        output: Arc<dyn OutputSink>,
        deadline: Duration,
    ) -> ExecutionResult {
        let span = tracing::debug_span!("script", name = script.name());
        async move {
            tracing::debug!("evaluating script");
            let started = Instant::now();
            let expired = Arc::new(AtomicBool::new(false));

            let result = match self.prepare(script, client, output, deadline, &expired) {
                Ok(lua) => match tokio::time::timeout(deadline, self.evaluate(&lua, script)).await {
                    Ok(_) if expired.load(Ordering::SeqCst) => timed_out(deadline),
                    Ok(Ok(value)) => ExecutionResult::success(value),
                    Ok(Err(err)) => failure_from_lua(&err),
                    Err(_) => timed_out(deadline),
                },
                Err(err) => failure_from_lua(&err),
            };

            let elapsed_ms = started.elapsed().as_millis() as u64;
            match &result {
                ExecutionResult::Success { .. } => {
                    tracing::debug!(elapsed_ms, "script finished");
                }
                ExecutionResult::Failure { kind, message } => {
                    tracing::debug!(elapsed_ms, %kind, "script failed: {message}");
                }
            }
            result
        }
        .instrument(span)
        .await
    }

    /// Build an isolated state with the API and limits installed.
    fn prepare(
        &self,
        script: &Script,
        client: Arc<dyn HttpClient>,
        output: Arc<dyn OutputSink>,
        deadline: Duration,
        expired: &Arc<AtomicBool>,
    ) -> LuaResult<Lua> {
        let lua = Lua::new_with(sandbox_libs(), LuaOptions::default())?;
        if let Some(limit) = self.config.memory_limit {
            lua.set_memory_limit(limit)?;
        }

        Watchdog::install(
            &lua,
            Instant::now() + deadline,
            self.config.instruction_check_interval,
            Arc::clone(expired),
        );

        register_api(&lua, client, output, script.name())?;
        self.hooks.init(&lua)?;
        Ok(lua)
    }

    /// Load the chunk, call its entry function, and convert the result.
    async fn evaluate(&self, lua: &Lua, script: &Script) -> LuaResult<serde_json::Value> {
        let chunk = lua
            .load(script.source())
            .set_name(format!("={}", script.name()))
            .into_function()?;
        let entry: LuaValue = call_watched(lua, chunk, ()).await?;

        let resolved = match entry {
            LuaValue::Function(func) => call_watched(lua, func, ()).await?,
            other => other,
        };
        self.hooks.transform(lua, resolved)
    }
}

fn timed_out(deadline: Duration) -> ExecutionResult {
    ExecutionResult::failure(
        ErrorKind::Timeout,
        format!("script timed out after {}ms", deadline.as_millis()),
    )
}

fn failure_from_lua(err: &LuaError) -> ExecutionResult {
    ExecutionResult::failure(error_kind(err), root_message(err))
}

/// A `ClientError::Parse` anywhere in the cause chain makes the failure a
/// `ParseError`; everything else is a `ScriptError`.
pub(crate) fn error_kind(err: &LuaError) -> ErrorKind {
    match err {
        LuaError::CallbackError { cause, .. } | LuaError::WithContext { cause, .. } => {
            error_kind(cause)
        }
        LuaError::ExternalError(e) => e
            .downcast_ref::<ClientError>()
            .map_or(ErrorKind::ScriptError, ClientError::kind),
        _ => ErrorKind::ScriptError,
    }
}

/// The innermost message of a Lua error, without the traceback.
pub(crate) fn root_message(err: &LuaError) -> String {
    match err {
        LuaError::CallbackError { cause, .. } | LuaError::WithContext { cause, .. } => {
            root_message(cause)
        }
        LuaError::ExternalError(e) => e.to_string(),
        LuaError::RuntimeError(msg) => strip_traceback(msg).to_owned(),
        LuaError::SyntaxError { message, .. } => message.clone(),
        other => strip_traceback(&other.to_string()).to_owned(),
    }
}

fn strip_traceback(msg: &str) -> &str {
    msg.split("\nstack traceback:").next().unwrap_or(msg).trim_end()
}
