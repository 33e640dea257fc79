// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;

use crate::{FunctionExecution, Session, ToolError};

/// A host function callable from inside the VM.
///
/// Arguments arrive as the JSON export of the script's positional call
/// arguments; the return value is exported back into the script.
#[async_trait]
pub trait HostTool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// Human-readable call signature for the generated tool catalog,
    /// e.g. `read_file(path, options?)`.
    fn signature(&self) -> String;
    /// JSON Schema describing the positional parameters.
    fn input_schema(&self) -> Value;
    async fn call(&self, session: &Session, args: &[Value]) -> Result<Value, ToolError>;
}

/// The resolved form of a host function after interceptor wrapping.
pub type HostFn = Arc<
    dyn Fn(Arc<Session>, Vec<Value>) -> BoxFuture<'static, Result<Value, ToolError>>
        + Send
        + Sync,
>;

/// A wrapping layer applied to every host function at registration time.
/// The chain applies in registration order (first added = outermost).
pub trait Interceptor: Send + Sync {
    fn wrap(&self, tool: Arc<dyn HostTool>, next: HostFn) -> HostFn;
}

/// Sets and clears `session.current_tool` around the call.
pub struct CurrentToolInterceptor;

impl Interceptor for CurrentToolInterceptor {
    fn wrap(&self, tool: Arc<dyn HostTool>, next: HostFn) -> HostFn {
        let name = tool.name().to_string();
        Arc::new(move |session, args| {
            let name = name.clone();
            let next = Arc::clone(&next);
            Box::pin(async move {
                session.set_current_tool(Some(name));
                let result = next(Arc::clone(&session), args).await;
                session.set_current_tool(None);
                result
            })
        })
    }
}

/// Appends `{tool_name, input[], output}` to the session's execution list
/// after every call, success or failure.
pub struct ExecutionRecorder;

impl Interceptor for ExecutionRecorder {
    fn wrap(&self, tool: Arc<dyn HostTool>, next: HostFn) -> HostFn {
        let name = tool.name().to_string();
        Arc::new(move |session, args| {
            let name = name.clone();
            let next = Arc::clone(&next);
            Box::pin(async move {
                let input = args.clone();
                let result = next(Arc::clone(&session), args).await;
                let (output, succeeded) = match &result {
                    Ok(v) => (v.clone(), true),
                    Err(e) => (serde_json::to_value(e).unwrap_or(Value::Null), false),
                };
                session.record_execution(FunctionExecution {
                    tool_name: name,
                    input,
                    output,
                    succeeded,
                });
                result
            })
        })
    }
}

/// The set of host functions exposed to scripts, plus the interceptor chain
/// they are wrapped with.
pub struct ToolSet {
    tools: Vec<Arc<dyn HostTool>>,
    interceptors: Vec<Arc<dyn Interceptor>>,
}

impl Default for ToolSet {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolSet {
    /// An empty set with the two always-on interceptors.
    pub fn new() -> Self {
        Self {
            tools: Vec::new(),
            interceptors: vec![Arc::new(CurrentToolInterceptor), Arc::new(ExecutionRecorder)],
        }
    }

    pub fn register(&mut self, tool: impl HostTool + 'static) {
        self.tools.push(Arc::new(tool));
    }

    pub fn register_arc(&mut self, tool: Arc<dyn HostTool>) {
        self.tools.push(tool);
    }

    pub fn add_interceptor(&mut self, interceptor: impl Interceptor + 'static) {
        self.interceptors.push(Arc::new(interceptor));
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.iter().map(|t| t.name().to_string()).collect();
        names.sort();
        names
    }

    pub fn tools(&self) -> &[Arc<dyn HostTool>] {
        &self.tools
    }

    /// Wrap every tool with the interceptor chain and key the result by
    /// name.  First-registered interceptor ends up outermost.
    pub fn resolve(&self) -> HashMap<String, HostFn> {
        let mut out = HashMap::with_capacity(self.tools.len());
        for tool in &self.tools {
            let base_tool = Arc::clone(tool);
            let mut f: HostFn = Arc::new(move |session, args| {
                let tool = Arc::clone(&base_tool);
                Box::pin(async move { tool.call(&session, &args).await })
            });
            for interceptor in self.interceptors.iter().rev() {
                f = interceptor.wrap(Arc::clone(tool), f);
            }
            out.insert(tool.name().to_string(), f);
        }
        out
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
