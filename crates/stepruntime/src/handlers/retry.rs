use super::HandlerContext;
use std::future::Future;
use stepcore::{Action, ExecutionState, FailureKind, Verdict, VerdictResponse};
use tracing::{info, warn};

/// Run one Code/Block attempt under the step's error-handling options.
///
/// Every retry starts again from `state` as it was before the first attempt.
/// Only step failures are retried; configuration failures fail fast. In
/// single-step test mode neither retry nor continue-on-failure applies.
pub(crate) async fn run_with_policy<F, Fut>(
    ctx: &HandlerContext<'_>,
    action: &Action,
    state: ExecutionState,
    attempt_fn: F,
) -> ExecutionState
where
    F: Fn(ExecutionState) -> Fut,
    Fut: Future<Output = ExecutionState>,
{
    let options = action.error_handling();
    let policy = ctx.constants.retry_policy;
    let test_mode = ctx.constants.test_single_step_mode;
    let mut attempt: u32 = 1;

    loop {
        let result = attempt_fn(state.clone()).await;
        if result.verdict() != Verdict::Failed {
            return result;
        }

        let retryable = matches!(
            result.verdict_response(),
            Some(VerdictResponse::Failed {
                kind: FailureKind::StepFailed,
                ..
            })
        );
        if options.retry_on_failure && retryable && !test_mode && attempt < policy.max_attempts {
            let delay = policy.delay_for(attempt);
            warn!(
                step = %action.name,
                attempt,
                max_attempts = policy.max_attempts,
                "Step failed, retrying in {}ms",
                delay.as_millis()
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
            continue;
        }

        if options.continue_on_failure && !test_mode {
            info!(step = %action.name, "Step failed, continuing with the next step");
            return result.set_verdict(Verdict::Running, None).increase_task();
        }
        return result;
    }
}
