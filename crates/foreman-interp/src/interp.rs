// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::sync::Arc;

use rquickjs::{async_with, function::Async, AsyncContext, AsyncRuntime, CatchResultExt, Function};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::host::{HostFn, ToolSet};
use crate::{InterpError, Session, ToolError, ToolErrorCode};

/// Result of one script run.  Script-level failures land in `error` — the
/// captured console output and recorded executions up to the failure are
/// still returned.
#[derive(Debug, Clone)]
pub struct InterpreterOutcome {
    pub console: String,
    pub executions: Vec<crate::FunctionExecution>,
    pub error: Option<String>,
    pub cancelled: bool,
}

impl InterpreterOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none() && !self.cancelled
    }
}

/// Single-shot JavaScript interpreter.
///
/// Every run builds a fresh VM preloaded with exactly the registered host
/// functions; nothing persists between runs.  Host functions are bridged
/// through a single `__host_invoke(name, args_json)` dispatcher — the
/// prelude defines one async global per registered tool, so scripts call
/// `await read_file('/x')` and unregistered names stay undefined (calling
/// one raises a ReferenceError, failing the script).
pub struct Interpreter {
    toolset: Arc<ToolSet>,
}

impl Interpreter {
    pub fn new(toolset: Arc<ToolSet>) -> Self {
        Self { toolset }
    }

    pub fn toolset(&self) -> &ToolSet {
        &self.toolset
    }

    pub async fn run(
        &self,
        cancel: &CancellationToken,
        session: Arc<Session>,
        script: &str,
    ) -> Result<InterpreterOutcome, InterpError> {
        let rt = AsyncRuntime::new()?;
        let flag = cancel.clone();
        rt.set_interrupt_handler(Some(Box::new(move || flag.is_cancelled()))).await;
        let ctx = AsyncContext::full(&rt).await?;

        let resolved = Arc::new(self.toolset.resolve());
        let prelude = build_prelude(&self.toolset.names());
        let script = script.to_string();

        // The block below moves its captures; the VM-side closures get
        // clones so `session` stays available for the outcome afterwards.
        let console_session = Arc::clone(&session);
        let invoke_session = Arc::clone(&session);
        let invoke_cancel = cancel.clone();

        let error = async_with!(ctx => |ctx| {
            // Console capture.
            let console_fn = Function::new(ctx.clone(), move |level: String, text: String| {
                debug!(level = %level, "script console");
                console_session.write_stdout(&text);
            })?;
            ctx.globals().set("__console", console_fn)?;

            // Host-function dispatcher.
            let invoke_tools = Arc::clone(&resolved);
            let invoke_fn = Function::new(
                ctx.clone(),
                Async(move |name: String, args_json: String| {
                    let session = Arc::clone(&invoke_session);
                    let tools = Arc::clone(&invoke_tools);
                    let cancel = invoke_cancel.clone();
                    async move { host_invoke(session, tools, cancel, name, args_json).await }
                }),
            )?;
            ctx.globals().set("__host_invoke", invoke_fn)?;

            ctx.eval::<(), _>(prelude.into_bytes())
                .catch(&ctx)
                .map_err(|e| InterpError::Vm(format!("prelude: {e}")))?;

            let run = async {
                let promise = ctx.eval_promise(script.into_bytes())?;
                promise.into_future::<()>().await
            };
            let error = match run.await.catch(&ctx) {
                Ok(()) => None,
                Err(caught) => Some(caught.to_string()),
            };
            Ok::<_, InterpError>(error)
        })
        .await?;

        // Drain any remaining microtasks before tearing the runtime down.
        rt.idle().await;

        let cancelled = cancel.is_cancelled();
        let error = if cancelled {
            Some("execution cancelled".to_string())
        } else {
            error
        };

        Ok(InterpreterOutcome {
            console: session.console_output(),
            executions: session.executions(),
            error,
            cancelled,
        })
    }
}

/// Dispatch one host call.  Returns the JSON envelope the prelude unwraps:
/// `{"ok": value}` or `{"err": {code, message, suggestions}}`.
async fn host_invoke(
    session: Arc<Session>,
    tools: Arc<HashMap<String, HostFn>>,
    cancel: CancellationToken,
    name: String,
    args_json: String,
) -> String {
    let args: Vec<Value> = match serde_json::from_str(&args_json) {
        Ok(v) => v,
        Err(e) => {
            return envelope_err(&ToolError::invalid(format!("malformed arguments: {e}")));
        }
    };
    let Some(f) = tools.get(&name) else {
        return envelope_err(&ToolError::not_found(format!("unknown function: {name}")));
    };

    // A host function blocked in IO cannot observe the VM interrupt, so the
    // call itself is raced against the cancellation token.  An aborted call
    // never reaches the execution recorder.
    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            Err(ToolError::new(ToolErrorCode::Cancelled, "execution cancelled"))
        }
        r = f(Arc::clone(&session), args) => r,
    };

    match result {
        Ok(v) => json!({ "ok": v }).to_string(),
        Err(e) => envelope_err(&e),
    }
}

fn envelope_err(e: &ToolError) -> String {
    json!({ "err": e }).to_string()
}

/// JS glue evaluated before every script: console shims plus one async
/// global per registered host function.
fn build_prelude(names: &[String]) -> String {
    let mut out = String::from(
        r#"globalThis.console = (() => {
  const join = (args) => args.map(a => typeof a === "string" ? a : JSON.stringify(a)).join(" ");
  return {
    log: (...a) => __console("log", join(a)),
    info: (...a) => __console("info", join(a)),
    warn: (...a) => __console("warn", join(a)),
    error: (...a) => __console("error", join(a)),
  };
})();
const __define = (name) => {
  globalThis[name] = async (...args) => {
    const raw = await __host_invoke(name, JSON.stringify(args));
    const r = JSON.parse(raw);
    if ("err" in r) {
      const e = new Error(r.err.message);
      e.code = r.err.code;
      e.suggestions = r.err.suggestions || [];
      throw e;
    }
    return r.ok;
  };
};
"#,
    );
    for name in names {
        out.push_str(&format!("__define({});\n", json!(name)));
    }
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
