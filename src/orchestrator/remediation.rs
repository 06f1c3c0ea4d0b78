//! Remediation phase: plan proposal and gated step execution.
//!
//! The remediation prompt enumerates the root cause, the available
//! skills, relevant runbook titles (via the optional fetcher callback),
//! and code-fix candidate URLs from a code-search tool. The parsed plan
//! is executed step by step:
//!
//! 1. A step with a matching skill executes through the generic `skill`
//!    tool — if auto-approval covers its risk, the step approver says
//!    yes, or the approval channel approves. The gate's budget and
//!    cooldown apply on every path.
//! 2. A step with only a command is never executed; it is left pending
//!    with a "Manual execution required" note for the operator.
//! 3. Anything else stays pending.
//!
//! Rejections and blocks skip the step and move on — remediation is
//! best-effort, never all-or-nothing.

use serde_json::json;
use tracing::{info, warn};

use crate::gate::{BlockReason, GateDecision, MutationRequest};
use crate::investigation::events::InvestigationEvent;
use crate::investigation::{RemediationStep, StepStatus, StepUpdate};
use crate::llm::{parser, prompts};
use crate::tools::TOOL_SKILL;

use super::{code_fix_candidates, Orchestrator, OrchestratorError, Run, RunbookContext};

/// Drive the whole remediation phase.
pub(crate) async fn run_remediation(
    orchestrator: &Orchestrator,
    run: &mut Run,
) -> Result<(), OrchestratorError> {
    let Some(conclusion) = run.machine.investigation().conclusion.clone() else {
        return Ok(());
    };

    let affected_services = run
        .machine
        .investigation()
        .triage
        .as_ref()
        .map(|t| t.affected_services.clone())
        .unwrap_or_default();

    // Runbook titles come from the optional host callback.
    let runbooks = match &orchestrator.fetch_runbooks {
        Some(fetch) => fetch(&RunbookContext {
            incident_id: run.machine.investigation().incident_id.clone(),
            affected_services: affected_services.clone(),
        }),
        None => Vec::new(),
    };

    run.check_continue()?;
    let code_candidates = code_fix_candidates(
        &orchestrator.executor,
        &orchestrator.available_tools,
        &conclusion.root_cause,
    )
    .await;

    let prompt = prompts::remediate(
        &conclusion.root_cause,
        &affected_services.join(", "),
        &orchestrator.skills.join(", "),
        &runbooks.join("\n"),
        &code_candidates.join("\n"),
    );
    let plan = orchestrator
        .call_parse(run, &prompt, parser::parse_remediation)
        .await?;
    run.machine.set_remediation_plan(plan.clone());

    let mut completed = 0_usize;
    let mut not_completed = 0_usize;
    for step in &plan.steps {
        run.check_continue()?;
        match execute_step(orchestrator, run, step).await? {
            StepStatus::Completed => completed = completed.saturating_add(1),
            StepStatus::Failed | StepStatus::Skipped => {
                not_completed = not_completed.saturating_add(1);
            }
            _ => {}
        }
    }

    run.machine
        .bus()
        .emit(InvestigationEvent::RemediationCompleted {
            completed,
            not_completed,
        });
    Ok(())
}

/// Execute one step; returns its final status.
async fn execute_step(
    orchestrator: &Orchestrator,
    run: &mut Run,
    step: &RemediationStep,
) -> Result<StepStatus, OrchestratorError> {
    if let Some(skill) = step.matching_skill.clone() {
        return execute_skill_step(orchestrator, run, step, &skill).await;
    }

    if let Some(command) = &step.command {
        // Commands are for humans; the engine never shells out.
        run.machine.update_remediation_step(
            &step.id,
            StepUpdate {
                status: Some(StepStatus::Pending),
                result: None,
                error: Some(format!("Manual execution required: {command}")),
            },
        )?;
        return Ok(StepStatus::Pending);
    }

    Ok(StepStatus::Pending)
}

async fn execute_skill_step(
    orchestrator: &Orchestrator,
    run: &mut Run,
    step: &RemediationStep,
    skill: &str,
) -> Result<StepStatus, OrchestratorError> {
    let request = MutationRequest {
        operation: step.action.clone(),
        resource: skill.to_owned(),
        risk: step.risk_level,
        reason: Some(step.description.clone()),
        command: step.command.clone(),
    };

    let auto = orchestrator.config.auto_approve_remediation
        || orchestrator.gate_config.auto_approve.contains(&step.risk_level);

    let decision = if auto {
        run.gate.authorize_preapproved(&request)
    } else if let Some(approve) = &orchestrator.approve_step {
        if approve(step) {
            run.gate.authorize_preapproved(&request)
        } else {
            GateDecision::Rejected { approver: None }
        }
    } else if orchestrator.approval.is_some() {
        run.gate.authorize(&request, &run.cancel).await?
    } else {
        GateDecision::Rejected { approver: None }
    };

    match decision {
        GateDecision::Approved { .. } => {
            run.machine.update_remediation_step(
                &step.id,
                StepUpdate {
                    status: Some(StepStatus::Executing),
                    result: None,
                    error: None,
                },
            )?;
            let params = json!({
                "name": skill,
                "args": step.parameters.clone().unwrap_or(serde_json::Value::Null),
            });
            let (status, update) = match orchestrator.executor.execute(TOOL_SKILL, &params).await {
                Ok(value) => {
                    let id = run.scratchpad.record(TOOL_SKILL, params, value);
                    let result = run.scratchpad.summary(&id);
                    info!(step_id = %step.id, skill, "remediation step completed");
                    (
                        StepStatus::Completed,
                        StepUpdate {
                            status: Some(StepStatus::Completed),
                            result,
                            error: None,
                        },
                    )
                }
                Err(e) => {
                    warn!(step_id = %step.id, skill, error = %e, "remediation step failed");
                    (
                        StepStatus::Failed,
                        StepUpdate {
                            status: Some(StepStatus::Failed),
                            result: None,
                            error: Some(e.to_string()),
                        },
                    )
                }
            };
            run.machine.update_remediation_step(&step.id, update)?;
            Ok(status)
        }
        GateDecision::Rejected { approver } => {
            let who = approver.unwrap_or_else(|| "approval channel".to_owned());
            run.machine.update_remediation_step(
                &step.id,
                StepUpdate {
                    status: Some(StepStatus::Skipped),
                    result: None,
                    error: Some(format!("approval rejected by {who}")),
                },
            )?;
            Ok(StepStatus::Skipped)
        }
        GateDecision::Blocked(reason) => {
            let detail = match reason {
                BlockReason::Budget { used, limit } => {
                    format!("mutation budget exhausted ({used}/{limit})")
                }
                BlockReason::Cooldown { remaining_ms } => {
                    format!("critical cooldown active ({remaining_ms}ms remaining)")
                }
            };
            run.machine.update_remediation_step(
                &step.id,
                StepUpdate {
                    status: Some(StepStatus::Skipped),
                    result: None,
                    error: Some(detail),
                },
            )?;
            Ok(StepStatus::Skipped)
        }
    }
}
