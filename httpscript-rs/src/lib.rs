//! Embedded Lua harness for scripted HTTP checks.
//!
//! A script is a Lua chunk that returns an entry function. The harness
//! loads it, binds an HTTP client facade as `client`, runs the entry
//! function as a coroutine, and captures exactly one [`ExecutionResult`].
//!
//! ```no_run
//! use std::sync::Arc;
//! use httpscript::{Harness, MemoryLoader, MockHttpClient, ScriptEvaluator};
//!
//! # async fn demo() {
//! let loader = MemoryLoader::new().with(
//!     "status",
//!     "return function() return client:get('/health').status end",
//! );
//! let harness = Harness::new(loader, ScriptEvaluator::default());
//! let result = harness.run("status", Arc::new(MockHttpClient::new())).await;
//! assert_eq!(result.value(), Some(&serde_json::json!(404)));
//! # }
//! ```

pub mod cli;
pub mod client;
pub mod config;
pub mod embedded;
pub mod error;
pub mod evaluator;
pub mod harness;
pub mod lua;
pub mod output;
pub mod pool;
pub mod result;
pub mod script;

// Re-exports for convenience.
pub use client::{HttpClient, MockHttpClient, ReqwestClient, Response};
pub use config::{Config, EvalConfig};
pub use error::{ClientError, ErrorKind, LoadError};
pub use evaluator::{DefaultHooks, ScriptEvaluator, ScriptHooks};
pub use harness::Harness;
pub use output::{BufferSink, OutputSink, TracingSink};
pub use pool::ScriptPool;
pub use result::{ExecutionResult, ResultCollector, ResultSink};
pub use script::{DirLoader, EmbeddedLoader, MemoryLoader, Script, ScriptLoader};
