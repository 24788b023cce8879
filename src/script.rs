//! Scripting capability boundary
//!
//! Records can carry a script that computes their payload per query. The
//! server only depends on this contract: an engine turns source text into
//! a callable, the callable reads and writes a handful of named bindings
//! and returns one of three shapes. Any embeddable interpreter can sit
//! behind these traits; tests plug in deterministic stubs.

use std::sync::Arc;

use thiserror::Error;

use crate::rdata::TextData;

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("script compile error: {0}")]
    Compile(String),
    #[error("script runtime error: {0}")]
    Runtime(String),
    #[error("invalid script output '{0}'")]
    InvalidOutput(String),
}

/// Bindings visible to a script while answering one query. The script may
/// rewrite `response_type` to redirect what kind of records it produces.
#[derive(Debug, Clone)]
pub struct ScriptContext {
    pub remote_address: String,
    pub remote_port: String,
    pub request_name: String,
    pub response_type: String,
}

/// The three legal return shapes: one value, one ordered list, or a tuple
/// of independent results. Every contained value becomes one resource
/// record.
#[derive(Debug, Clone)]
pub enum ScriptOutput {
    Single(TextData),
    Tuple(Vec<TextData>),
}

impl ScriptOutput {
    pub fn into_results(self) -> Vec<TextData> {
        match self {
            ScriptOutput::Single(data) => vec![data],
            ScriptOutput::Tuple(results) => results,
        }
    }
}

/// A compiled script, invoked once per matching query.
pub trait Script: Send + Sync {
    fn call(&self, ctx: &mut ScriptContext) -> Result<ScriptOutput, ScriptError>;
}

/// Compiles zone-file script blocks. Injected into the parser so the zone
/// layer never depends on a concrete interpreter.
pub trait ScriptEngine: Send + Sync {
    fn compile(&self, source: &str) -> Result<Arc<dyn Script>, ScriptError>;
}

/// Default engine for builds without a scripting backend: every script
/// block is rejected at zone load time.
pub struct NoScriptEngine;

impl ScriptEngine for NoScriptEngine {
    fn compile(&self, _source: &str) -> Result<Arc<dyn Script>, ScriptError> {
        Err(ScriptError::Compile("no scripting backend configured".to_string()))
    }
}

#[cfg(test)]
pub mod testing {
    //! Deterministic stand-ins used by the unit tests.

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    /// Returns a fixed output on every call and counts invocations.
    pub struct StaticScript {
        pub output: ScriptOutput,
        pub response_type: Option<String>,
        pub calls: AtomicUsize,
    }

    impl StaticScript {
        pub fn new(output: ScriptOutput) -> Arc<StaticScript> {
            Arc::new(StaticScript { output, response_type: None, calls: AtomicUsize::new(0) })
        }

        pub fn with_response_type(output: ScriptOutput, rtype: &str) -> Arc<StaticScript> {
            Arc::new(StaticScript {
                output,
                response_type: Some(rtype.to_string()),
                calls: AtomicUsize::new(0),
            })
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Script for StaticScript {
        fn call(&self, ctx: &mut ScriptContext) -> Result<ScriptOutput, ScriptError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(rtype) = &self.response_type {
                ctx.response_type = rtype.clone();
            }
            Ok(self.output.clone())
        }
    }

    /// Always fails at call time, like a script hitting a runtime error.
    pub struct FailingScript;

    impl Script for FailingScript {
        fn call(&self, _ctx: &mut ScriptContext) -> Result<ScriptOutput, ScriptError> {
            Err(ScriptError::Runtime("boom".to_string()))
        }
    }

    /// Engine that hands every script block the same compiled stub.
    pub struct StubEngine {
        pub script: Arc<dyn Script>,
    }

    impl StubEngine {
        pub fn new(script: Arc<dyn Script>) -> Arc<StubEngine> {
            Arc::new(StubEngine { script })
        }
    }

    impl ScriptEngine for StubEngine {
        fn compile(&self, _source: &str) -> Result<Arc<dyn Script>, ScriptError> {
            Ok(self.script.clone())
        }
    }
}
