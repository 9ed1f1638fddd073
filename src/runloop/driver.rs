//! Polls a run to a terminal status, answering pending actions on the way.

use super::approval::ApprovalPolicy;
use super::error::RunLoopError;
use crate::agents::{
    AgentError, RequiredAction, Run, RunService, RunStatus, ToolApproval, ToolCallRequest,
    ToolOutput,
};
use crate::tools::ToolRegistry;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Retry settings for polling the run status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries per poll after a retryable error; 0 disables retrying
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Fail on the first transport error
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// Delay before retry number `attempt` (0-based): doubles each time, capped
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(16)).unwrap_or(u32::MAX);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunLoopOptions {
    /// Fixed wait between status polls
    pub poll_interval: Duration,
    /// Stop with an error after this many polls
    pub max_polls: Option<u32>,
    /// Stop with an error once this much time has passed
    pub deadline: Option<Duration>,
    pub retry: RetryPolicy,
}

impl Default for RunLoopOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1000),
            max_polls: None,
            deadline: None,
            retry: RetryPolicy::default(),
        }
    }
}

/// What happened while driving a run
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// Last observed state; always terminal
    pub run: Run,
    /// Number of status fetches
    pub polls: u32,
    /// Number of batches submitted (approvals or outputs)
    pub submissions: u32,
    /// Every approval decision submitted, in submission order
    pub decisions: Vec<ToolApproval>,
    /// Every function output submitted, in submission order
    pub outputs: Vec<ToolOutput>,
}

pub struct RunLoopDriver {
    service: Arc<dyn RunService>,
    policy: Arc<dyn ApprovalPolicy>,
    tools: Option<Arc<ToolRegistry>>,
    options: RunLoopOptions,
}

/// Mutable bookkeeping for one `drive` call
struct LoopState {
    run: Run,
    polls: u32,
    submissions: u32,
    /// Tool call ids already answered; never answered twice
    answered: HashSet<String>,
    decisions: Vec<ToolApproval>,
    outputs: Vec<ToolOutput>,
}

impl RunLoopDriver {
    pub fn new(service: Arc<dyn RunService>, policy: Arc<dyn ApprovalPolicy>) -> Self {
        Self {
            service,
            policy,
            tools: None,
            options: RunLoopOptions::default(),
        }
    }

    pub fn with_options(mut self, options: RunLoopOptions) -> Self {
        self.options = options;
        self
    }

    /// Execute function tools locally when the run asks for tool outputs
    pub fn with_tools(mut self, tools: Arc<ToolRegistry>) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn options(&self) -> &RunLoopOptions {
        &self.options
    }

    /// Drive `run` until it reaches a terminal status.
    ///
    /// A run that ends in `failed` is returned as `RunLoopError::RunFailed`;
    /// other terminal statuses are returned as an outcome.
    pub async fn drive(&self, run: Run) -> Result<RunOutcome, RunLoopError> {
        let started = Instant::now();
        tracing::info!("Driving run {} (status {})", run.id, run.status);

        let mut state = LoopState {
            run,
            polls: 0,
            submissions: 0,
            answered: HashSet::new(),
            decisions: Vec::new(),
            outputs: Vec::new(),
        };

        while !state.run.status.is_terminal() {
            if state.run.status == RunStatus::RequiresAction {
                if let Some(next) = self.answer_pending_action(&mut state).await? {
                    self.advance(&mut state, next)?;
                    continue;
                }
            }

            if let Some(max) = self.options.max_polls {
                if state.polls >= max {
                    return Err(RunLoopError::PollLimitExceeded {
                        polls: state.polls,
                        status: state.run.status,
                    });
                }
            }
            if let Some(deadline) = self.options.deadline {
                let elapsed = started.elapsed();
                if elapsed >= deadline {
                    return Err(RunLoopError::DeadlineExceeded(elapsed));
                }
            }

            tokio::time::sleep(self.options.poll_interval).await;
            let next = self.fetch_run(&state.run, started).await?;
            state.polls += 1;
            tracing::debug!("Poll {}: run {} is {}", state.polls, next.id, next.status);
            self.advance(&mut state, next)?;
        }

        tracing::info!(
            "Run {} finished as {} after {} polls and {} submissions",
            state.run.id,
            state.run.status,
            state.polls,
            state.submissions
        );

        if state.run.status == RunStatus::Failed {
            return Err(RunLoopError::RunFailed {
                run_id: state.run.id,
                error: state.run.last_error,
            });
        }

        Ok(RunOutcome {
            run: state.run,
            polls: state.polls,
            submissions: state.submissions,
            decisions: state.decisions,
            outputs: state.outputs,
        })
    }

    fn advance(&self, state: &mut LoopState, next: Run) -> Result<(), RunLoopError> {
        let from = state.run.status;
        if !from.can_transition_to(next.status) {
            return Err(RunLoopError::InvalidTransition {
                run_id: state.run.id.clone(),
                from,
                to: next.status,
            });
        }
        if from != next.status {
            tracing::debug!("Run {}: {} -> {}", next.id, from, next.status);
        }
        state.run = next;
        Ok(())
    }

    /// Get the run, retrying transient failures with backoff. A retry that
    /// would sleep past the deadline is not attempted.
    async fn fetch_run(&self, run: &Run, started: Instant) -> Result<Run, RunLoopError> {
        let retry = self.options.retry;
        let mut attempt = 0;
        loop {
            match self.service.get_run(&run.thread_id, &run.id).await {
                Ok(next) => return Ok(next),
                Err(e) if e.is_retryable() && attempt < retry.max_retries => {
                    let delay = retry.backoff(attempt);
                    if let Some(deadline) = self.options.deadline {
                        let elapsed = started.elapsed();
                        if elapsed + delay >= deadline {
                            tracing::warn!(
                                "Polling run {} failed ({}), no time left to retry",
                                run.id,
                                e
                            );
                            return Err(RunLoopError::DeadlineExceeded(elapsed));
                        }
                    }
                    attempt += 1;
                    tracing::warn!(
                        "Polling run {} failed ({}), retry {}/{} in {:?}",
                        run.id,
                        e,
                        attempt,
                        retry.max_retries,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Answer the run's pending action. Returns the run reported by the
    /// submission, or `None` when there was nothing new to submit.
    async fn answer_pending_action(
        &self,
        state: &mut LoopState,
    ) -> Result<Option<Run>, RunLoopError> {
        let Some(action) = state.run.required_action.clone() else {
            tracing::debug!("Run {} requires action but carries none", state.run.id);
            return Ok(None);
        };

        match &action {
            RequiredAction::SubmitToolApproval { tool_calls } => {
                let pending = unanswered(tool_calls, &state.answered);
                if pending.is_empty() {
                    tracing::debug!("No unanswered tool calls on run {}", state.run.id);
                    return Ok(None);
                }

                let mut batch = Vec::with_capacity(pending.len());
                for call in &pending {
                    let decision = self
                        .policy
                        .decide(call)
                        .await
                        .map_err(RunLoopError::Approval)?;
                    if decision.tool_call_id != call.id {
                        return Err(RunLoopError::Approval(anyhow::anyhow!(
                            "decision for {} answered {}",
                            call.id,
                            decision.tool_call_id
                        )));
                    }
                    batch.push(decision);
                }

                let next = self
                    .submit(state, &pending, |service, run| {
                        let batch = batch.clone();
                        async move {
                            service
                                .submit_tool_approvals(&run.thread_id, &run.id, &batch)
                                .await
                        }
                    })
                    .await?;
                state.decisions.extend(batch);
                Ok(Some(next))
            }
            RequiredAction::SubmitToolOutputs { tool_calls } => {
                let pending = unanswered(tool_calls, &state.answered);
                if pending.is_empty() {
                    return Ok(None);
                }
                // The run stays in requires_action until someone answers
                let Some(tools) = &self.tools else {
                    return Err(RunLoopError::UnsupportedAction {
                        run_id: state.run.id.clone(),
                        kind: "submit_tool_outputs".to_string(),
                    });
                };

                let mut batch = Vec::with_capacity(pending.len());
                for call in &pending {
                    // Failures go back to the agent as the call's output
                    let output = match tools.execute(&call.name, call.arguments_json()).await {
                        Ok(result) => {
                            if !result.success {
                                tracing::warn!(
                                    "Tool {} returned an error: {}",
                                    call.name,
                                    result.output
                                );
                            }
                            result.output
                        }
                        Err(e) => {
                            tracing::warn!("Tool {} failed: {:#}", call.name, e);
                            format!("Error: {:#}", e)
                        }
                    };
                    batch.push(ToolOutput {
                        tool_call_id: call.id.clone(),
                        output,
                    });
                }

                let next = self
                    .submit(state, &pending, |service, run| {
                        let batch = batch.clone();
                        async move {
                            service
                                .submit_tool_outputs(&run.thread_id, &run.id, &batch)
                                .await
                        }
                    })
                    .await?;
                state.outputs.extend(batch);
                Ok(Some(next))
            }
            RequiredAction::Other { kind } => Err(RunLoopError::UnsupportedAction {
                run_id: state.run.id.clone(),
                kind: kind.clone(),
            }),
        }
    }

    /// Submit one batch. Submissions are never retried so a call cannot be
    /// answered twice.
    async fn submit<F, Fut>(
        &self,
        state: &mut LoopState,
        pending: &[ToolCallRequest],
        send: F,
    ) -> Result<Run, RunLoopError>
    where
        F: FnOnce(Arc<dyn RunService>, Run) -> Fut,
        Fut: std::future::Future<Output = Result<Run, AgentError>>,
    {
        tracing::info!(
            "Submitting {} tool call answer(s) for run {}",
            pending.len(),
            state.run.id
        );
        let next = send(self.service.clone(), state.run.clone()).await?;
        state
            .answered
            .extend(pending.iter().map(|call| call.id.clone()));
        state.submissions += 1;
        Ok(next)
    }
}

/// Calls not yet answered, with duplicate ids collapsed to their first entry
fn unanswered(calls: &[ToolCallRequest], answered: &HashSet<String>) -> Vec<ToolCallRequest> {
    let mut seen = HashSet::new();
    calls
        .iter()
        .filter(|call| !answered.contains(&call.id) && seen.insert(call.id.as_str()))
        .cloned()
        .collect()
}
