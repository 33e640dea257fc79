// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The code-act interpreter.
//!
//! Each model tool call is a JavaScript program; this crate runs it in a
//! fresh QuickJS VM whose only capabilities are the registered host
//! functions.  The script calls them like ordinary async functions
//! (`await read_file('/src/main.rs')`); every invocation passes through an
//! interceptor chain that records inputs and outputs, and the whole run can
//! be interrupted through a cancellation token.

mod error;
mod fs;
mod host;
mod interp;
mod session;

pub use error::{InterpError, ToolError, ToolErrorCode};
pub use fs::ScopedFs;
pub use host::{
    CurrentToolInterceptor, ExecutionRecorder, HostFn, HostTool, Interceptor, ToolSet,
};
pub use interp::{Interpreter, InterpreterOutcome};
pub use session::{FunctionExecution, Session};
