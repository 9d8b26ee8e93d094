//! Bounded regeneration of failing pages.
//!
//! Attempts are numbered from 1; the initial content is verification
//! attempt 0 and does not count against `retry.max_attempts`. Attempts
//! already in the ledger count, so a resumed run never exceeds the bound.

use folio_kernel::feedback::{Feedback, build_feedback};
use folio_kernel::finding::{FailureClass, Finding};
use folio_kernel::record::AttemptRecord;
use folio_kernel::verdict::{PageVerdict, Verdict, WarnLevel};
use folio_ledger::{
    Confirmation, ConfirmTarget, Ledger, LedgerAction, LedgerEvent, ORCHESTRATOR_ACTOR,
    POLICY_ACTOR, covering_actor,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::blocking::append_event;
use crate::cancel::CancelToken;
use crate::collab::GenerationService;
use crate::config::CompiledConfig;
use crate::error::GateError;
use crate::verify::{PageContext, verify_page};

/// A page's standing between attempts.
#[derive(Debug, Clone)]
pub struct PageProgress {
    pub verdict: PageVerdict,
    pub attempts: Vec<AttemptRecord>,
}

#[derive(Debug, Clone)]
pub struct AttemptOutcome {
    pub record: AttemptRecord,
    pub verdict: PageVerdict,
}

/// Where a page ends up after `drive_page`.
#[derive(Debug, Clone, PartialEq)]
pub enum PageOutcome {
    Finalized { confirmed_by: Option<String> },
    AwaitingConfirmation { warning_ids: Vec<String> },
    Blocked { findings: Vec<Finding> },
    Cancelled,
}

#[derive(Clone)]
pub struct RetryController {
    config: Arc<CompiledConfig>,
    generator: Arc<dyn GenerationService>,
    ledger: Arc<dyn Ledger>,
    run_id: String,
}

impl RetryController {
    pub fn new(
        config: Arc<CompiledConfig>,
        generator: Arc<dyn GenerationService>,
        ledger: Arc<dyn Ledger>,
        run_id: impl Into<String>,
    ) -> Self {
        Self {
            config,
            generator,
            ledger,
            run_id: run_id.into(),
        }
    }

    /// Produce and verify the initial content, recorded as attempt 0.
    pub async fn initial(&self, ctx: &PageContext) -> Result<PageVerdict, GateError> {
        let generated = generate_page(
            self.generator.as_ref(),
            ctx,
            None,
            self.config.generation_timeout(),
        )
        .await;
        let artifact = match generated {
            Ok(artifact) => artifact,
            Err(finding) => return Ok(PageVerdict::failed(finding)),
        };
        let verification = verify_page(&self.config, ctx, artifact, 0);
        let verdict = verification.verdict.clone();
        self.record(
            ctx,
            ORCHESTRATOR_ACTOR,
            LedgerAction::PageVerified {
                page: ctx.page,
                verification: Box::new(verification),
            },
        )
        .await?;
        debug!(
            unit = %ctx.unit_id,
            page = ctx.page,
            verdict = verdict.verdict.as_str(),
            "initial content verified"
        );
        Ok(verdict)
    }

    /// One regeneration: build feedback from `previous`, call the generator
    /// under the configured timeout, verify what comes back and record it.
    pub async fn regenerate(
        &self,
        ctx: &PageContext,
        attempt: u32,
        previous: &PageVerdict,
        prior: Option<&Feedback>,
    ) -> Result<AttemptOutcome, GateError> {
        let feedback = build_feedback(
            attempt,
            previous,
            prior,
            self.config.retry.feedback_max_items,
        );
        debug!(
            unit = %ctx.unit_id,
            page = ctx.page,
            attempt,
            scope = ?feedback.scope,
            items = feedback.item_count(),
            "regenerating page"
        );

        let generated = generate_page(
            self.generator.as_ref(),
            ctx,
            Some(&feedback),
            self.config.generation_timeout(),
        )
        .await;
        let (verdict, digest) = match generated {
            Ok(artifact) => {
                let verification = verify_page(&self.config, ctx, artifact, attempt);
                let verdict = verification.verdict.clone();
                let digest = verification.artifact_digest.clone();
                self.record(
                    ctx,
                    ORCHESTRATOR_ACTOR,
                    LedgerAction::PageVerified {
                        page: ctx.page,
                        verification: Box::new(verification),
                    },
                )
                .await?;
                (verdict, Some(digest))
            }
            Err(finding) => (PageVerdict::failed(finding), None),
        };

        let record = AttemptRecord::new(attempt, feedback, &verdict, digest);
        self.record(
            ctx,
            ORCHESTRATOR_ACTOR,
            LedgerAction::AttemptRecorded {
                page: ctx.page,
                attempt: Box::new(record.clone()),
            },
        )
        .await?;
        debug!(
            unit = %ctx.unit_id,
            page = ctx.page,
            attempt,
            verdict = verdict.verdict.as_str(),
            "attempt verified"
        );
        Ok(AttemptOutcome { record, verdict })
    }

    /// Regenerate while the page fails retryably and attempts remain, then
    /// settle it: finalize, wait for confirmation, or block.
    pub async fn drive_page(
        &self,
        ctx: &PageContext,
        progress: PageProgress,
        confirmations: &[Confirmation],
        cancel: &CancelToken,
    ) -> Result<PageOutcome, GateError> {
        let PageProgress {
            mut verdict,
            mut attempts,
        } = progress;
        let max_attempts = self.config.retry.max_attempts;

        while verdict.verdict == Verdict::Fail && verdict.retryable {
            let done = attempts.last().map(|a| a.attempt_number).unwrap_or(0);
            if done >= max_attempts {
                break;
            }
            if cancel.is_cancelled() {
                info!(unit = %ctx.unit_id, page = ctx.page, "page cancelled between attempts");
                return Ok(PageOutcome::Cancelled);
            }
            let prior = attempts.last().map(|a| &a.feedback);
            let outcome = self.regenerate(ctx, done + 1, &verdict, prior).await?;
            verdict = outcome.verdict;
            attempts.push(outcome.record);
        }

        self.settle(ctx, &verdict, &attempts, confirmations).await
    }

    async fn settle(
        &self,
        ctx: &PageContext,
        verdict: &PageVerdict,
        attempts: &[AttemptRecord],
        confirmations: &[Confirmation],
    ) -> Result<PageOutcome, GateError> {
        match verdict.verdict {
            Verdict::Pass => {
                self.finalize(ctx, Verdict::Pass).await?;
                Ok(PageOutcome::Finalized { confirmed_by: None })
            }
            Verdict::Warn => {
                let warning_ids = verdict.warning_ids();
                if let Some(actor) = covering_actor(confirmations, &warning_ids) {
                    self.finalize(ctx, Verdict::Warn).await?;
                    return Ok(PageOutcome::Finalized {
                        confirmed_by: Some(actor),
                    });
                }
                if verdict.warn_level == Some(WarnLevel::Minor) && self.config.warn.auto_confirm_minor {
                    self.record(
                        ctx,
                        POLICY_ACTOR,
                        LedgerAction::WarnConfirmed {
                            target: ConfirmTarget::Page { page: ctx.page },
                            finding_ids: warning_ids,
                            note: Some("minor warn confirmed by policy".to_string()),
                        },
                    )
                    .await?;
                    self.finalize(ctx, Verdict::Warn).await?;
                    return Ok(PageOutcome::Finalized {
                        confirmed_by: Some(POLICY_ACTOR.to_string()),
                    });
                }
                info!(
                    unit = %ctx.unit_id,
                    page = ctx.page,
                    level = ?verdict.warn_level,
                    "page awaits operator confirmation"
                );
                Ok(PageOutcome::AwaitingConfirmation { warning_ids })
            }
            Verdict::Fail => {
                let mut findings: Vec<Finding> =
                    verdict.findings.iter().filter(|f| f.is_error()).cloned().collect();
                if verdict.retryable {
                    findings.insert(0, exhausted_finding(ctx, attempts, self.config.retry.max_attempts));
                }
                self.block(ctx, findings).await
            }
        }
    }

    /// Block the page. Blocked pages stay blocked across runs.
    pub async fn block(&self, ctx: &PageContext, findings: Vec<Finding>) -> Result<PageOutcome, GateError> {
        warn!(
            unit = %ctx.unit_id,
            page = ctx.page,
            classes = ?findings.iter().map(|f| f.class.as_str()).collect::<Vec<_>>(),
            "page blocked"
        );
        self.record(
            ctx,
            ORCHESTRATOR_ACTOR,
            LedgerAction::PageBlocked {
                page: ctx.page,
                findings: findings.clone(),
            },
        )
        .await?;
        Ok(PageOutcome::Blocked { findings })
    }

    async fn finalize(&self, ctx: &PageContext, verdict: Verdict) -> Result<(), GateError> {
        debug!(unit = %ctx.unit_id, page = ctx.page, verdict = verdict.as_str(), "page finalized");
        self.record(
            ctx,
            ORCHESTRATOR_ACTOR,
            LedgerAction::PageFinalized {
                page: ctx.page,
                verdict,
            },
        )
        .await
    }

    async fn record(&self, ctx: &PageContext, actor: &str, action: LedgerAction) -> Result<(), GateError> {
        append_event(
            &self.ledger,
            LedgerEvent::new(&self.run_id, &ctx.unit_id, actor, action),
        )
        .await
    }
}

/// Call the generator under `limit`. Failures come back as the finding a
/// failed verdict carries.
pub(crate) async fn generate_page(
    generator: &dyn GenerationService,
    ctx: &PageContext,
    feedback: Option<&Feedback>,
    limit: Duration,
) -> Result<String, Finding> {
    match tokio::time::timeout(limit, generator.generate(&ctx.unit_id, ctx.page, feedback)).await {
        Ok(Ok(artifact)) => Ok(artifact),
        Ok(Err(err)) => {
            warn!(unit = %ctx.unit_id, page = ctx.page, error = %err, "generation failed");
            Err(Finding::error(
                FailureClass::GenerationFailed,
                ctx.scope(),
                err.to_string(),
            ))
        }
        Err(_) => {
            warn!(
                unit = %ctx.unit_id,
                page = ctx.page,
                timeout_ms = limit.as_millis() as u64,
                "generation timed out"
            );
            Err(Finding::error(
                FailureClass::GenerationTimeout,
                ctx.scope(),
                format!("generation exceeded {} ms", limit.as_millis()),
            ))
        }
    }
}

fn exhausted_finding(ctx: &PageContext, attempts: &[AttemptRecord], max_attempts: u32) -> Finding {
    let history: Vec<_> = attempts
        .iter()
        .map(|a| {
            json!({
                "attempt": a.attempt_number,
                "verdict": a.result_verdict,
                "coverageRatio": a.coverage_ratio,
                "feedbackScope": a.feedback.scope,
                "feedbackItems": a.feedback.item_count(),
                "classes": a.findings.iter().map(|f| f.class).collect::<Vec<_>>(),
                "artifactDigest": a.artifact_digest,
            })
        })
        .collect();
    Finding::error(
        FailureClass::RetryExhausted,
        ctx.scope(),
        format!(
            "page still fails after {} of {max_attempts} regeneration attempts",
            attempts.len()
        ),
    )
    .with_details(json!({
        "maxAttempts": max_attempts,
        "attempts": history,
    }))
}
