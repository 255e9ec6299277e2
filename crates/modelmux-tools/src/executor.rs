use crate::spec::{ToolArgs, ToolSpec};
use futures_util::FutureExt;
use modelmux_core::ToolExecutionError;
use serde_json::Value;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use tracing::{debug, error};

/// Runs `spec` with `args`.
///
/// Whatever goes wrong inside the tool, a returned error or a panic, comes
/// back as a [`ToolExecutionError`] naming the tool. Nothing escapes into
/// the caller's loop.
pub async fn execute_tool(spec: &ToolSpec, args: &ToolArgs) -> Result<Value, ToolExecutionError> {
    debug!(tool = %spec.name, "Executing tool");

    let outcome = AssertUnwindSafe(spec.handler().call(args.clone()))
        .catch_unwind()
        .await;

    match outcome {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => {
            error!(tool = %spec.name, error = %e, "Tool returned an error");
            Err(ToolExecutionError::new(&spec.name, e.to_string()))
        }
        Err(panic) => {
            let cause = panic_message(panic.as_ref());
            error!(tool = %spec.name, cause = %cause, "Tool panicked");
            Err(ToolExecutionError::new(&spec.name, format!("panicked: {cause}")))
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
