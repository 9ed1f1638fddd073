//! Integration tests for the run-loop driver
//!
//! A scripted in-memory service stands in for the hosted agent service:
//! each poll pops the next scripted response, and once the script runs dry
//! the idle run is returned forever.

use agentloop_cli::agents::{
    ensure_chronological, AgentError, MessageContent, MessageRole, RequiredAction, Run, RunError,
    RunService, RunStatus, ThreadMessage, ToolApproval, ToolCallRequest, ToolOutput,
};
use agentloop_cli::runloop::{
    AllowListPolicy, AutoApprove, RetryPolicy, RunLoopDriver, RunLoopError, RunLoopOptions,
};
use agentloop_cli::tools::{inventory_tools, ToolRegistry};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const THREAD: &str = "thread_1";
const RUN: &str = "run_1";

struct ScriptedService {
    polls: Mutex<VecDeque<Result<Run, AgentError>>>,
    idle: Run,
    after_submit: Mutex<VecDeque<Run>>,
    /// "poll" or "submit:<n>" in call order
    events: Mutex<Vec<String>>,
    approvals: Mutex<Vec<Vec<ToolApproval>>>,
    outputs: Mutex<Vec<Vec<ToolOutput>>>,
}

impl ScriptedService {
    fn new(polls: Vec<Result<Run, AgentError>>) -> Self {
        Self {
            polls: Mutex::new(polls.into()),
            idle: run(RunStatus::InProgress),
            after_submit: Mutex::new(VecDeque::new()),
            events: Mutex::new(Vec::new()),
            approvals: Mutex::new(Vec::new()),
            outputs: Mutex::new(Vec::new()),
        }
    }

    fn with_submit_responses(self, runs: Vec<Run>) -> Self {
        *self.after_submit.lock().unwrap() = runs.into();
        self
    }

    fn poll_count(&self) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| *e == "poll")
            .count()
    }

    fn next_after_submit(&self) -> Run {
        self.after_submit
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| run(RunStatus::InProgress))
    }
}

#[async_trait]
impl RunService for ScriptedService {
    async fn get_run(&self, thread_id: &str, run_id: &str) -> Result<Run, AgentError> {
        assert_eq!((thread_id, run_id), (THREAD, RUN));
        self.events.lock().unwrap().push("poll".to_string());
        self.polls
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(self.idle.clone()))
    }

    async fn submit_tool_approvals(
        &self,
        _thread_id: &str,
        _run_id: &str,
        approvals: &[ToolApproval],
    ) -> Result<Run, AgentError> {
        self.events
            .lock()
            .unwrap()
            .push(format!("submit:{}", approvals.len()));
        self.approvals.lock().unwrap().push(approvals.to_vec());
        Ok(self.next_after_submit())
    }

    async fn submit_tool_outputs(
        &self,
        _thread_id: &str,
        _run_id: &str,
        outputs: &[ToolOutput],
    ) -> Result<Run, AgentError> {
        self.events
            .lock()
            .unwrap()
            .push(format!("submit:{}", outputs.len()));
        self.outputs.lock().unwrap().push(outputs.to_vec());
        Ok(self.next_after_submit())
    }
}

fn run(status: RunStatus) -> Run {
    Run::new(RUN, THREAD, status)
}

fn calls(ids: &[&str]) -> Vec<ToolCallRequest> {
    ids.iter()
        .map(|id| ToolCallRequest::new(*id, "search_azure_rest_api_code", r#"{"query":"readme"}"#))
        .collect()
}

fn awaiting_approval(ids: &[&str]) -> Run {
    run(RunStatus::RequiresAction).with_required_action(RequiredAction::SubmitToolApproval {
        tool_calls: calls(ids),
    })
}

fn fast() -> RunLoopOptions {
    RunLoopOptions {
        poll_interval: Duration::from_millis(1),
        max_polls: Some(50),
        deadline: None,
        retry: RetryPolicy {
            max_retries: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
        },
    }
}

fn driver(service: Arc<ScriptedService>, options: RunLoopOptions) -> RunLoopDriver {
    RunLoopDriver::new(service, Arc::new(AutoApprove::new(HashMap::new()))).with_options(options)
}

#[tokio::test]
async fn test_scripted_sequence_submits_exactly_once() {
    let service = Arc::new(ScriptedService::new(vec![
        Ok(run(RunStatus::InProgress)),
        Ok(awaiting_approval(&["call_1"])),
        Ok(run(RunStatus::InProgress)),
        Ok(run(RunStatus::Completed)),
    ]));

    let outcome = driver(service.clone(), fast())
        .drive(run(RunStatus::Queued))
        .await
        .unwrap();

    assert_eq!(outcome.run.status, RunStatus::Completed);
    assert_eq!(outcome.submissions, 1);
    assert_eq!(outcome.decisions.len(), 1);
    assert_eq!(outcome.decisions[0].tool_call_id, "call_1");
    assert!(outcome.decisions[0].approve);
    assert_eq!(
        *service.events.lock().unwrap(),
        vec!["poll", "poll", "submit:1", "poll", "poll"]
    );
}

#[tokio::test]
async fn test_never_leaving_in_progress_is_bounded_by_max_polls() {
    let service = Arc::new(ScriptedService::new(Vec::new()));
    let options = RunLoopOptions {
        max_polls: Some(7),
        ..fast()
    };

    let err = driver(service.clone(), options)
        .drive(run(RunStatus::InProgress))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        RunLoopError::PollLimitExceeded {
            polls: 7,
            status: RunStatus::InProgress
        }
    ));
    assert_eq!(service.poll_count(), 7);
}

#[tokio::test]
async fn test_deadline_stops_polling() {
    let service = Arc::new(ScriptedService::new(Vec::new()));
    let options = RunLoopOptions {
        poll_interval: Duration::from_millis(5),
        max_polls: None,
        deadline: Some(Duration::from_millis(30)),
        ..fast()
    };

    let err = driver(service, options)
        .drive(run(RunStatus::Queued))
        .await
        .unwrap_err();
    assert!(matches!(err, RunLoopError::DeadlineExceeded(_)));
}

#[tokio::test]
async fn test_zero_pending_calls_submits_nothing_and_keeps_polling() {
    let empty = || {
        run(RunStatus::RequiresAction).with_required_action(RequiredAction::SubmitToolApproval {
            tool_calls: Vec::new(),
        })
    };
    let service = Arc::new(ScriptedService::new(vec![
        Ok(empty()),
        Ok(run(RunStatus::Completed)),
    ]));

    let outcome = driver(service.clone(), fast())
        .drive(empty())
        .await
        .unwrap();

    assert_eq!(outcome.submissions, 0);
    assert_eq!(outcome.polls, 2);
    assert!(service.approvals.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_decisions_submitted_before_leaving_requires_action() {
    let service = Arc::new(ScriptedService::new(vec![Ok(run(RunStatus::Completed))]));

    driver(service.clone(), fast())
        .drive(awaiting_approval(&["a", "b", "c"]))
        .await
        .unwrap();

    let events = service.events.lock().unwrap();
    assert_eq!(events[0], "submit:3");
    let submitted: Vec<String> = service.approvals.lock().unwrap()[0]
        .iter()
        .map(|d| d.tool_call_id.clone())
        .collect();
    assert_eq!(submitted, vec!["a", "b", "c"]);
}

#[tokio::test]
async fn test_stale_pending_action_is_not_answered_twice() {
    let service = Arc::new(
        ScriptedService::new(vec![
            Ok(awaiting_approval(&["call_1"])),
            Ok(run(RunStatus::InProgress)),
            Ok(run(RunStatus::Completed)),
        ])
        .with_submit_responses(vec![awaiting_approval(&["call_1"])]),
    );

    let outcome = driver(service.clone(), fast())
        .drive(awaiting_approval(&["call_1"]))
        .await
        .unwrap();

    assert_eq!(outcome.submissions, 1);
    assert_eq!(service.approvals.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_second_round_only_answers_new_calls() {
    let service = Arc::new(ScriptedService::new(vec![
        Ok(awaiting_approval(&["call_1", "call_2"])),
        Ok(run(RunStatus::Completed)),
    ]));

    let outcome = driver(service.clone(), fast())
        .drive(awaiting_approval(&["call_1"]))
        .await
        .unwrap();

    assert_eq!(outcome.submissions, 2);
    let approvals = service.approvals.lock().unwrap();
    assert_eq!(approvals[1].len(), 1);
    assert_eq!(approvals[1][0].tool_call_id, "call_2");
}

#[tokio::test]
async fn test_allow_list_policy_mixes_approvals_and_denials() {
    let service = Arc::new(ScriptedService::new(vec![Ok(run(RunStatus::Completed))]));
    let headers = HashMap::from([("SuperSecret".to_string(), "123456".to_string())]);
    let policy = AllowListPolicy::new(&["get_*".to_string()], headers).unwrap();
    let pending = run(RunStatus::RequiresAction).with_required_action(
        RequiredAction::SubmitToolApproval {
            tool_calls: vec![
                ToolCallRequest::new("ok", "get_lights", "{}"),
                ToolCallRequest::new("no", "delete_repo", "{}"),
            ],
        },
    );

    let outcome = RunLoopDriver::new(service, Arc::new(policy))
        .with_options(fast())
        .drive(pending)
        .await
        .unwrap();

    let by_id: HashMap<&str, &ToolApproval> = outcome
        .decisions
        .iter()
        .map(|d| (d.tool_call_id.as_str(), d))
        .collect();
    assert!(by_id["ok"].approve);
    assert_eq!(by_id["ok"].headers["SuperSecret"], "123456");
    assert!(!by_id["no"].approve);
    assert!(by_id["no"].headers.is_empty());
}

#[tokio::test]
async fn test_transient_poll_errors_are_retried() {
    let service = Arc::new(ScriptedService::new(vec![
        Err(AgentError::ServiceError("503".to_string())),
        Err(AgentError::RateLimited("slow down".to_string())),
        Ok(run(RunStatus::Completed)),
    ]));

    let outcome = driver(service.clone(), fast())
        .drive(run(RunStatus::Queued))
        .await
        .unwrap();

    assert_eq!(outcome.run.status, RunStatus::Completed);
    assert_eq!(outcome.polls, 1);
    assert_eq!(service.poll_count(), 3);
}

#[tokio::test]
async fn test_non_retryable_error_fails_immediately() {
    let service = Arc::new(ScriptedService::new(vec![
        Err(AgentError::Unauthorized("bad key".to_string())),
        Ok(run(RunStatus::Completed)),
    ]));

    let err = driver(service.clone(), fast())
        .drive(run(RunStatus::Queued))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        RunLoopError::Service(AgentError::Unauthorized(_))
    ));
    assert_eq!(service.poll_count(), 1);
}

#[tokio::test]
async fn test_retries_give_up_after_limit() {
    let service = Arc::new(ScriptedService::new(vec![
        Err(AgentError::Network("reset".to_string())),
        Err(AgentError::Network("reset".to_string())),
        Ok(run(RunStatus::Completed)),
    ]));
    let mut options = fast();
    options.retry.max_retries = 1;

    let err = driver(service.clone(), options)
        .drive(run(RunStatus::Queued))
        .await
        .unwrap_err();

    assert!(matches!(err, RunLoopError::Service(AgentError::Network(_))));
    assert_eq!(service.poll_count(), 2);
}

#[tokio::test]
async fn test_going_back_to_queued_is_rejected() {
    let service = Arc::new(ScriptedService::new(vec![
        Ok(run(RunStatus::InProgress)),
        Ok(run(RunStatus::Queued)),
    ]));

    let err = driver(service, fast())
        .drive(run(RunStatus::Queued))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        RunLoopError::InvalidTransition {
            from: RunStatus::InProgress,
            to: RunStatus::Queued,
            ..
        }
    ));
}

#[tokio::test]
async fn test_run_resumes_through_queued_after_approvals() {
    let service = Arc::new(
        ScriptedService::new(vec![
            Ok(run(RunStatus::InProgress)),
            Ok(run(RunStatus::Completed)),
        ])
        .with_submit_responses(vec![run(RunStatus::Queued)]),
    );

    let outcome = driver(service.clone(), fast())
        .drive(awaiting_approval(&["call_1"]))
        .await
        .unwrap();

    assert_eq!(outcome.run.status, RunStatus::Completed);
    assert_eq!(outcome.submissions, 1);
    assert_eq!(
        *service.events.lock().unwrap(),
        vec!["submit:1", "poll", "poll"]
    );
}

#[tokio::test]
async fn test_tool_outputs_without_local_tools_fail_fast() {
    let pending = run(RunStatus::RequiresAction).with_required_action(
        RequiredAction::SubmitToolOutputs {
            tool_calls: vec![ToolCallRequest::new("fn_1", "get_weekly_sales", "")],
        },
    );
    let service = Arc::new(ScriptedService::new(Vec::new()));
    let options = RunLoopOptions {
        max_polls: None,
        ..fast()
    };

    let err = driver(service.clone(), options)
        .drive(pending)
        .await
        .unwrap_err();

    assert!(matches!(
        &err,
        RunLoopError::UnsupportedAction { kind, .. } if kind == "submit_tool_outputs"
    ));
    assert_eq!(service.poll_count(), 0);
    assert!(service.outputs.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_action_kind_fails_fast() {
    let service = Arc::new(ScriptedService::new(vec![Ok(run(RunStatus::RequiresAction)
        .with_required_action(RequiredAction::Other {
            kind: "submit_signature".to_string(),
        }))]));
    let options = RunLoopOptions {
        max_polls: None,
        ..fast()
    };

    let err = driver(service.clone(), options)
        .drive(run(RunStatus::InProgress))
        .await
        .unwrap_err();

    assert!(matches!(
        &err,
        RunLoopError::UnsupportedAction { run_id, kind }
            if run_id == RUN && kind == "submit_signature"
    ));
    assert_eq!(service.poll_count(), 1);
}

#[tokio::test]
async fn test_retry_backoff_does_not_outlast_deadline() {
    let service = Arc::new(ScriptedService::new(vec![
        Err(AgentError::ServiceError("503".to_string())),
        Ok(run(RunStatus::Completed)),
    ]));
    let options = RunLoopOptions {
        poll_interval: Duration::from_millis(1),
        max_polls: None,
        deadline: Some(Duration::from_millis(50)),
        retry: RetryPolicy {
            max_retries: 5,
            initial_backoff: Duration::from_secs(5),
            max_backoff: Duration::from_secs(5),
        },
    };

    let started = std::time::Instant::now();
    let err = driver(service.clone(), options)
        .drive(run(RunStatus::Queued))
        .await
        .unwrap_err();

    assert!(matches!(err, RunLoopError::DeadlineExceeded(_)));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(service.poll_count(), 1);
}

#[tokio::test]
async fn test_failed_run_surfaces_service_error() {
    let failed = run(RunStatus::Failed).with_last_error(RunError {
        code: "server_error".to_string(),
        message: "tool server unreachable".to_string(),
    });
    let service = Arc::new(ScriptedService::new(vec![Ok(failed)]));

    let err = driver(service, fast())
        .drive(run(RunStatus::InProgress))
        .await
        .unwrap_err();

    assert!(err.is_run_failure());
    assert!(err.to_string().contains("tool server unreachable"));
}

#[tokio::test]
async fn test_cancelled_run_is_an_outcome() {
    let service = Arc::new(ScriptedService::new(vec![
        Ok(run(RunStatus::Cancelling)),
        Ok(run(RunStatus::Cancelled)),
    ]));

    let outcome = driver(service, fast())
        .drive(run(RunStatus::InProgress))
        .await
        .unwrap();
    assert_eq!(outcome.run.status, RunStatus::Cancelled);
}

#[tokio::test]
async fn test_terminal_run_is_not_polled() {
    let service = Arc::new(ScriptedService::new(Vec::new()));

    let outcome = driver(service.clone(), fast())
        .drive(run(RunStatus::Completed))
        .await
        .unwrap();
    assert_eq!(outcome.polls, 0);
    assert_eq!(service.poll_count(), 0);
}

#[tokio::test]
async fn test_function_calls_are_executed_locally() {
    let pending = run(RunStatus::RequiresAction).with_required_action(
        RequiredAction::SubmitToolOutputs {
            tool_calls: vec![ToolCallRequest::new("fn_1", "get_weekly_sales", "")],
        },
    );
    let service = Arc::new(ScriptedService::new(vec![Ok(run(RunStatus::Completed))]));
    let mut registry = ToolRegistry::new();
    registry.register_all(inventory_tools());

    let outcome = driver(service.clone(), fast())
        .with_tools(Arc::new(registry))
        .drive(pending)
        .await
        .unwrap();

    assert_eq!(outcome.outputs.len(), 1);
    assert_eq!(outcome.outputs[0].tool_call_id, "fn_1");
    assert!(outcome.outputs[0].output.contains("Dry Shampoo"));
    assert!(outcome.decisions.is_empty());
}

#[tokio::test]
async fn test_wire_format_pending_action_is_answered() {
    let pending: Run = serde_json::from_value(serde_json::json!({
        "id": RUN,
        "thread_id": THREAD,
        "status": "requires_action",
        "required_action": {
            "type": "submit_tool_approval",
            "submit_tool_approval": {
                "tool_calls": [{
                    "id": "call_abc",
                    "type": "mcp",
                    "name": "search_azure_rest_api_code",
                    "arguments": "{}",
                    "server_label": "github"
                }]
            }
        }
    }))
    .unwrap();
    let service = Arc::new(ScriptedService::new(vec![Ok(run(RunStatus::Completed))]));

    let outcome = driver(service, fast()).drive(pending).await.unwrap();
    assert_eq!(outcome.decisions[0].tool_call_id, "call_abc");
}

#[test]
fn test_messages_are_returned_oldest_first() {
    let at = |secs: i64| Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap();
    let message = |id: &str, secs: i64| ThreadMessage {
        id: id.to_string(),
        created_at: at(secs),
        role: MessageRole::Assistant,
        content: vec![MessageContent::text(id)],
    };
    let mut messages = vec![message("b", 5), message("a", 1), message("c", 5)];

    ensure_chronological(&mut messages);

    assert!(messages
        .windows(2)
        .all(|pair| pair[0].created_at <= pair[1].created_at));
    let ids: Vec<&str> = messages.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b", "c"]);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// N pending calls produce exactly N decisions, one per distinct id
    #[test]
    fn prop_one_decision_per_pending_call(n in 0usize..24) {
        let ids: Vec<String> = (0..n).map(|i| format!("call_{}", i)).collect();
        let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        let pending = awaiting_approval(&id_refs);
        let service = Arc::new(ScriptedService::new(vec![Ok(run(RunStatus::Completed))]));

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        let outcome = runtime
            .block_on(driver(service.clone(), fast()).drive(pending))
            .unwrap();

        prop_assert_eq!(outcome.decisions.len(), n);
        let decided: HashSet<&str> = outcome
            .decisions
            .iter()
            .map(|d| d.tool_call_id.as_str())
            .collect();
        let expected: HashSet<&str> = id_refs.iter().copied().collect();
        prop_assert_eq!(decided, expected);
        prop_assert_eq!(outcome.submissions, if n == 0 { 0 } else { 1 });
    }
}
