//! The callable actions exposed to the remediation agent.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::DEFAULT_RUN_LIST_LIMIT;
use crate::error::{FeedbackError, Result};
use crate::model::{validate_step_number, MutationOutcome, RunKey};
use crate::routes::health::health_snapshot;
use crate::routes::queries::failure_window;
use crate::state::SharedState;

#[derive(Debug, Deserialize)]
struct ListFailuresArgs {
    hours: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ListRunsArgs {
    limit: Option<usize>,
    journey_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RunArgs {
    run_id: String,
}

#[derive(Debug, Deserialize)]
struct ReportArgs {
    run_id: String,
    report_id: String,
}

#[derive(Debug, Deserialize)]
struct AcknowledgeArgs {
    run_id: String,
    step_number: i64,
    action_taken: String,
}

#[derive(Debug, Deserialize)]
struct MarkActionedArgs {
    run_id: String,
    report_id: String,
    action_taken: String,
}

fn parse_args<T: DeserializeOwned>(tool: &str, args: Value) -> Result<T> {
    let args = if args.is_null() { json!({}) } else { args };
    serde_json::from_value(args)
        .map_err(|e| FeedbackError::Validation(format!("invalid arguments for {}: {}", tool, e)))
}

fn to_value<T: Serialize>(value: &T) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}

/// Serialize a lifecycle outcome, spelling out the terminal-state case.
fn outcome_value<S: Serialize>(outcome: &MutationOutcome<S>, already: &str) -> Result<Value> {
    let mut value = to_value(outcome)?;
    if !outcome.changed {
        if let Some(obj) = value.as_object_mut() {
            obj.insert("message".to_string(), Value::String(already.to_string()));
        }
    }
    Ok(value)
}

pub const TOOL_NAMES: &[&str] = &[
    "health",
    "list_failures",
    "list_pending_reports",
    "get_run",
    "list_runs",
    "get_report",
    "get_summary",
    "acknowledge_failure",
    "mark_report_actioned",
    "rebuild_indices",
];

/// Tool descriptors for `tools/list`.
pub fn tool_definitions() -> Value {
    let no_args = json!({ "type": "object", "properties": {} });
    json!([
        {
            "name": "health",
            "description": "Liveness of the feedback store.",
            "inputSchema": no_args,
        },
        {
            "name": "list_failures",
            "description": "Unacknowledged failing steps, newest first.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "hours": { "type": "integer", "minimum": 1, "description": "Time window, default 24" }
                }
            }
        },
        {
            "name": "list_pending_reports",
            "description": "Analysis reports not yet actioned, most urgent first.",
            "inputSchema": no_args,
        },
        {
            "name": "get_run",
            "description": "Full record of one run: steps, reports and rollup status.",
            "inputSchema": {
                "type": "object",
                "properties": { "run_id": { "type": "string" } },
                "required": ["run_id"]
            }
        },
        {
            "name": "list_runs",
            "description": "Most recent runs, optionally for one journey.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "limit": { "type": "integer", "minimum": 1 },
                    "journey_id": { "type": "string" }
                }
            }
        },
        {
            "name": "get_report",
            "description": "One analysis report including its markdown body.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "run_id": { "type": "string" },
                    "report_id": { "type": "string" }
                },
                "required": ["run_id", "report_id"]
            }
        },
        {
            "name": "get_summary",
            "description": "Aggregate counters across all runs.",
            "inputSchema": no_args,
        },
        {
            "name": "acknowledge_failure",
            "description": "Mark a failing step as handled. Repeating the call leaves the first acknowledgment in place.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "run_id": { "type": "string" },
                    "step_number": { "type": "integer", "minimum": 1 },
                    "action_taken": { "type": "string" }
                },
                "required": ["run_id", "step_number", "action_taken"]
            }
        },
        {
            "name": "mark_report_actioned",
            "description": "Mark an analysis report as actioned. Repeating the call leaves the first action in place.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "run_id": { "type": "string" },
                    "report_id": { "type": "string" },
                    "action_taken": { "type": "string" }
                },
                "required": ["run_id", "report_id", "action_taken"]
            }
        },
        {
            "name": "rebuild_indices",
            "description": "Rebuild the failure, report and summary indices from the run records.",
            "inputSchema": no_args,
        }
    ])
}

/// Execute one tool. `Ok(None)` means the tool name is unknown.
pub fn call_tool(state: &SharedState, name: &str, args: Value) -> Result<Option<Value>> {
    let store = &state.store;
    let value = match name {
        "health" => to_value(&health_snapshot(state))?,
        "list_failures" => {
            let args: ListFailuresArgs = parse_args(name, args)?;
            let window = failure_window(args.hours, state.config.failure_window_hours)?;
            to_value(&store.list_recent_failures(window)?)?
        }
        "list_pending_reports" => to_value(&store.list_pending_reports()?)?,
        "get_run" => {
            let args: RunArgs = parse_args(name, args)?;
            to_value(&store.get_run(&RunKey::parse(&args.run_id)?)?)?
        }
        "list_runs" => {
            let args: ListRunsArgs = parse_args(name, args)?;
            let limit = args.limit.unwrap_or(DEFAULT_RUN_LIST_LIMIT);
            to_value(&store.list_runs(limit, args.journey_id.as_deref())?)?
        }
        "get_report" => {
            let args: ReportArgs = parse_args(name, args)?;
            let key = RunKey::parse(&args.run_id)?;
            to_value(&store.get_report(&key, &args.report_id)?)?
        }
        "get_summary" => to_value(&store.summary()?)?,
        "acknowledge_failure" => {
            let args: AcknowledgeArgs = parse_args(name, args)?;
            let key = RunKey::parse(&args.run_id)?;
            let step_number = validate_step_number(args.step_number)?;
            let outcome = store.mutate_failure_state(&key, step_number, &args.action_taken)?;
            outcome_value(&outcome, "Failure was already acknowledged; state unchanged")?
        }
        "mark_report_actioned" => {
            let args: MarkActionedArgs = parse_args(name, args)?;
            let key = RunKey::parse(&args.run_id)?;
            let outcome = store.mutate_report_state(&key, &args.report_id, &args.action_taken)?;
            outcome_value(&outcome, "Report was already actioned; state unchanged")?
        }
        "rebuild_indices" => to_value(&store.rebuild_indices()?)?,
        _ => return Ok(None),
    };
    Ok(Some(value))
}
