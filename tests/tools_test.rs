use serde_json::{json, Value};
use tempfile::TempDir;

use qontinui_feedback::config::FeedbackConfig;
use qontinui_feedback::model::StepSubmission;
use qontinui_feedback::state::{FeedbackState, SharedState};
use qontinui_feedback::tools::ToolServer;

fn server(dir: &TempDir) -> (ToolServer, SharedState) {
    let state = FeedbackState::shared(FeedbackConfig::with_data_dir(dir.path())).unwrap();
    (ToolServer::new(state.clone()), state)
}

fn rpc(server: &ToolServer, request: Value) -> Value {
    let line = server.handle_frame(&request.to_string()).expect("response");
    serde_json::from_str(&line).unwrap()
}

fn call(server: &ToolServer, id: u64, name: &str, arguments: Value) -> Value {
    rpc(
        server,
        json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "tools/call",
            "params": { "name": name, "arguments": arguments },
        }),
    )
}

/// Tool results carry their payload as JSON text in the first content block.
fn payload(response: &Value) -> Value {
    let text = response["result"]["content"][0]["text"].as_str().unwrap();
    serde_json::from_str(text).unwrap()
}

fn failing_step(state: &SharedState, journey: &str, n: i64) -> String {
    let submission: StepSubmission = serde_json::from_value(json!({
        "journey_id": journey,
        "step_number": n,
        "step_name": "Click submit",
        "status": "fail",
        "console_errors": ["Uncaught ReferenceError: handler is not defined"],
    }))
    .unwrap();
    state.store.submit_step(submission).unwrap().run_id
}

#[test]
fn test_initialize_and_list_tools() {
    let dir = TempDir::new().unwrap();
    let (server, _) = server(&dir);

    let init = rpc(
        &server,
        json!({ "jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {} }),
    );
    assert_eq!(init["id"], 1);
    assert_eq!(init["result"]["serverInfo"]["name"], "qontinui-feedback");
    assert!(init["result"]["capabilities"]["tools"].is_object());

    let list = rpc(&server, json!({ "jsonrpc": "2.0", "id": 2, "method": "tools/list" }));
    let names: Vec<&str> = list["result"]["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();
    assert!(names.contains(&"list_failures"));
    assert!(names.contains(&"acknowledge_failure"));
    assert!(names.contains(&"mark_report_actioned"));
}

#[test]
fn test_failure_triage_through_tools() {
    let dir = TempDir::new().unwrap();
    let (server, state) = server(&dir);
    let run_id = failing_step(&state, "signup", 3);

    let listed = call(&server, 1, "list_failures", json!({ "hours": 24 }));
    let failures = payload(&listed);
    assert_eq!(failures.as_array().unwrap().len(), 1);
    assert_eq!(failures[0]["run_id"], run_id.as_str());

    let ack = call(
        &server,
        2,
        "acknowledge_failure",
        json!({ "run_id": run_id, "step_number": 3, "action_taken": "defined handler" }),
    );
    assert_eq!(ack["result"]["isError"], false);
    let outcome = payload(&ack);
    assert_eq!(outcome["changed"], true);
    assert!(outcome.get("message").is_none());

    let repeat = call(
        &server,
        3,
        "acknowledge_failure",
        json!({ "run_id": run_id, "step_number": 3, "action_taken": "again" }),
    );
    let outcome = payload(&repeat);
    assert_eq!(outcome["changed"], false);
    assert_eq!(outcome["action_taken"], "defined handler");
    assert!(outcome["message"].as_str().unwrap().contains("already acknowledged"));

    let listed = call(&server, 4, "list_failures", Value::Null);
    assert!(payload(&listed).as_array().unwrap().is_empty());

    let summary = payload(&call(&server, 5, "get_summary", json!({})));
    assert_eq!(summary["failures_acknowledged"], 1);
}

#[test]
fn test_client_errors_become_error_results() {
    let dir = TempDir::new().unwrap();
    let (server, state) = server(&dir);
    let run_id = failing_step(&state, "signup", 1);

    let missing = call(
        &server,
        1,
        "acknowledge_failure",
        json!({ "run_id": run_id, "step_number": 9, "action_taken": "n/a" }),
    );
    assert!(missing.get("error").is_none());
    assert_eq!(missing["result"]["isError"], true);
    assert_eq!(payload(&missing)["kind"], "not_found");

    let bad_args = call(&server, 2, "get_run", json!({}));
    assert_eq!(bad_args["result"]["isError"], true);
    assert_eq!(payload(&bad_args)["kind"], "validation");

    let bad_window = call(&server, 3, "list_failures", json!({ "hours": -1 }));
    assert_eq!(bad_window["result"]["isError"], true);
}

#[test]
fn test_report_tools() {
    let dir = TempDir::new().unwrap();
    let (server, state) = server(&dir);
    failing_step(&state, "billing", 1);
    let submission = serde_json::from_value(json!({
        "journey_id": "billing",
        "report_type": "regression_analysis",
        "title": "Invoice totals off by one cent",
        "markdown_content": "Rounding happens before tax.",
        "related_steps": [1],
        "priority": "high",
    }))
    .unwrap();
    let created = state.store.submit_report(submission).unwrap();

    let pending = payload(&call(&server, 1, "list_pending_reports", Value::Null));
    assert_eq!(pending[0]["report_id"], created.report_id.as_str());

    let report = payload(&call(
        &server,
        2,
        "get_report",
        json!({ "run_id": created.run_id, "report_id": created.report_id }),
    ));
    assert_eq!(report["title"], "Invoice totals off by one cent");

    let marked = payload(&call(
        &server,
        3,
        "mark_report_actioned",
        json!({ "run_id": created.run_id, "report_id": created.report_id, "action_taken": "round after tax" }),
    ));
    assert_eq!(marked["changed"], true);
    assert_eq!(marked["status"], "actioned");

    let runs = payload(&call(&server, 4, "list_runs", json!({ "journey_id": "billing" })));
    assert_eq!(runs.as_array().unwrap().len(), 1);

    let run = payload(&call(&server, 5, "get_run", json!({ "run_id": created.run_id })));
    assert_eq!(run["reports"][0]["status"], "actioned");
}

#[test]
fn test_protocol_errors() {
    let dir = TempDir::new().unwrap();
    let (server, _) = server(&dir);

    let parse = server.handle_frame("{ this is not json").unwrap();
    let parse: Value = serde_json::from_str(&parse).unwrap();
    assert_eq!(parse["error"]["code"], -32700);

    let unknown_method = rpc(&server, json!({ "jsonrpc": "2.0", "id": 7, "method": "resources/list" }));
    assert_eq!(unknown_method["error"]["code"], -32601);

    let unknown_tool = call(&server, 8, "delete_everything", json!({}));
    assert_eq!(unknown_tool["error"]["code"], -32602);

    // notifications get no reply
    assert!(server
        .handle_frame(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
        .is_none());
    assert!(server.handle_frame("   ").is_none());
}

#[test]
fn test_request_envelope_is_checked() {
    let dir = TempDir::new().unwrap();
    let (server, _) = server(&dir);

    // A null id is still a request and gets a reply.
    let pong = rpc(&server, json!({ "jsonrpc": "2.0", "id": null, "method": "ping" }));
    assert!(pong.get("error").is_none());
    assert!(pong["id"].is_null());
    assert!(pong["result"].is_object());

    let old_version = rpc(&server, json!({ "jsonrpc": "1.0", "id": 4, "method": "ping" }));
    assert_eq!(old_version["error"]["code"], -32600);
    assert_eq!(old_version["id"], 4);

    let unversioned = rpc(&server, json!({ "id": 5, "method": "tools/list" }));
    assert_eq!(unversioned["error"]["code"], -32600);
    assert_eq!(unversioned["id"], 5);
}
