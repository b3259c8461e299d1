use super::{fail_step, retry, HandlerContext};
use crate::sandbox::CodeModuleRequest;
use serde_json::Value;
use stepcore::{Action, CodeStep, ExecutionState, FailureKind, StepKind, StepOutput, StepStatus};
use tracing::debug;

pub(crate) async fn handle(
    ctx: &HandlerContext<'_>,
    action: &Action,
    step: &CodeStep,
    state: ExecutionState,
) -> ExecutionState {
    if state.is_completed(&action.name) {
        debug!(step = %action.name, "Code step already completed");
        return state;
    }
    retry::run_with_policy(ctx, action, state, |state| run_once(ctx, action, step, state)).await
}

async fn run_once(
    ctx: &HandlerContext<'_>,
    action: &Action,
    step: &CodeStep,
    state: ExecutionState,
) -> ExecutionState {
    let services = ctx.services();
    let name = action.name.as_str();

    let resolved = match services.resolver.resolve(&step.input, &state).await {
        Ok(resolved) => resolved,
        Err(e) => return fail_step(state, name, StepKind::Code, Value::Null, e.kind(), e.to_string()),
    };

    let output = StepOutput::init(StepKind::Code, resolved.censored);
    let request = CodeModuleRequest {
        code_file: ctx.constants.code_file(name),
        is_fresh_import: ctx.constants.test_single_step_mode,
        inputs: resolved.resolved,
    };

    match services.code_runner.run_code_module(request).await {
        Ok(value) => state
            .upsert_step(name, output.with_status(StepStatus::Succeeded).with_output(value))
            .increase_task(),
        Err(e) => {
            let message = clean_code_error(&e.to_string());
            state
                .upsert_step(name, output.with_status(StepStatus::Failed).with_error(message.clone()))
                .fail(FailureKind::StepFailed, Some(name), message)
        }
    }
}

/// Compiler diagnostics when there are any, otherwise the message without
/// stack frames and terminal colour codes.
pub(crate) fn clean_code_error(raw: &str) -> String {
    let raw = strip_ansi(raw);
    let diagnostics: Vec<&str> = raw
        .lines()
        .map(str::trim)
        .filter(|line| line.contains("error TS"))
        .collect();
    if !diagnostics.is_empty() {
        return diagnostics.join("\n");
    }
    raw.lines()
        .map(str::trim_end)
        .filter(|line| !line.trim_start().starts_with("at "))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

fn strip_ansi(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\u{1b}' && chars.peek() == Some(&'[') {
            chars.next();
            for next in chars.by_ref() {
                if next.is_ascii_alphabetic() {
                    break;
                }
            }
            continue;
        }
        out.push(c);
    }
    out
}
