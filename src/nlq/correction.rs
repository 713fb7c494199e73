use chrono::Duration;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::llm::models::{Clarification, LlmReply, SqlDraft};
use crate::llm::{LlmError, LlmManager};
use crate::nlq::athena::{run_query, AthenaResult, Engine, RunOptions};
use crate::nlq::prompt::{repair_prompt, PromptContext};
use crate::nlq::validator::{validate_sql, RejectReason, ValidateOptions};

/// Terminal outcome of one validate→execute run with bounded repair.
#[derive(Debug)]
pub enum CorrectionOutcome {
    /// A candidate validated and executed.
    Done {
        draft: SqlDraft,
        result: AthenaResult,
    },
    /// The model asked for clarification during a repair attempt.
    Clarify(Clarification),
    /// The initial candidate failed validation. Validator failures are
    /// deterministic in the model output, so there is nothing to retry.
    Rejected {
        draft: SqlDraft,
        reason: RejectReason,
    },
    /// Attempts exhausted (or the run hit a non-repairable engine state).
    Failed { draft: SqlDraft, last_error: String },
}

/// Validate and execute `initial`; on a terminal `FAILED` engine outcome
/// re-prompt the model with the prior SQL and error, up to
/// `max_fix_attempts` times. Timeouts, cancellations, and transport
/// failures are not repairable and end the run.
pub async fn execute_with_self_correction(
    llm: &LlmManager,
    engine: &dyn Engine,
    validate: &ValidateOptions,
    run_opts: &RunOptions,
    prompt_ctx: &PromptContext<'_>,
    initial: SqlDraft,
    max_fix_attempts: usize,
) -> Result<CorrectionOutcome> {
    // Attempt 0: the initial candidate.
    if let Err(reason) = validate_sql(&initial.sql, validate) {
        info!("initial sql rejected: {}", reason);
        return Ok(CorrectionOutcome::Rejected {
            draft: initial,
            reason,
        });
    }

    let mut last_error = match run_query(engine, &initial.sql, run_opts).await {
        Ok(result) => {
            return Ok(CorrectionOutcome::Done {
                draft: initial,
                result,
            })
        }
        Err(Error::Athena(e)) if e.state == "FAILED" => e.to_string(),
        Err(Error::Athena(e)) => {
            return Ok(CorrectionOutcome::Failed {
                draft: initial,
                last_error: e.to_string(),
            })
        }
        Err(e) => return Err(e),
    };

    let mut cur = initial;

    for attempt in 1..=max_fix_attempts {
        debug!("repair attempt {}/{}: {}", attempt, max_fix_attempts, last_error);
        let prompt = repair_prompt(prompt_ctx, &cur.sql, &last_error);

        let reply = match llm.invoke(&prompt).await {
            Ok(reply) => reply,
            Err(LlmError::Connection(msg)) => {
                // Transport failures are not semantically bounded; abort
                // with the state we had before this attempt.
                error!("model transport error on repair attempt {}: {}", attempt, msg);
                return Ok(CorrectionOutcome::Failed {
                    draft: cur,
                    last_error,
                });
            }
            Err(LlmError::Response(msg)) => {
                warn!("model protocol error on repair attempt {}: {}", attempt, msg);
                last_error = format!("model reply not usable: {}", msg);
                continue;
            }
            Err(e @ LlmError::Config(_)) => return Err(e.into()),
        };

        let mut fixed = match reply {
            LlmReply::Clarification(c) => return Ok(CorrectionOutcome::Clarify(c)),
            LlmReply::Sql(draft) => draft,
        };

        if let Err(reason) = validate_sql(&fixed.sql, validate) {
            // The next repair sees the validator's verdict, not the
            // engine's stale error.
            last_error = format!("fixed sql rejected: {}", reason);
            cur = fixed;
            continue;
        }

        // Safety net: a validated candidate can still lack a textual dt
        // lower bound when the partition filter is not required. Wrap
        // the SQL that is about to execute.
        let low = fixed.sql.to_lowercase();
        if !low.contains("dt >=") && !low.contains("dt between") {
            let dt_min = (validate.today - Duration::days(validate.max_days_lookback))
                .format("%Y-%m-%d");
            fixed.sql = format!("SELECT * FROM ({}) WHERE dt >= date '{}'", fixed.sql, dt_min);
        }

        match run_query(engine, &fixed.sql, run_opts).await {
            Ok(result) => {
                return Ok(CorrectionOutcome::Done {
                    draft: fixed,
                    result,
                })
            }
            Err(Error::Athena(e)) if e.state == "FAILED" => {
                last_error = e.to_string();
                cur = fixed;
            }
            Err(Error::Athena(e)) => {
                return Ok(CorrectionOutcome::Failed {
                    draft: fixed,
                    last_error: e.to_string(),
                })
            }
            Err(e) => return Err(e),
        }
    }

    Ok(CorrectionOutcome::Failed {
        draft: cur,
        last_error,
    })
}
