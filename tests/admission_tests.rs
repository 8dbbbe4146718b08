
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use calibration_runner::calibration::simulated::builtin_library;
use calibration_runner::calibration::{CalibrationLibrary, Registry, Runnable};
use calibration_runner::error::RunnerError;
use calibration_runner::scheduler::RunStatus;
use test_harness::{
    assert_eventually, library_of, node, params, test_runner, wait_for_idle,
    wait_for_running_record, Script, ScriptedNode,
};

#[tokio::test]
async fn test_submit_node_while_idle() {
    let registry: Arc<dyn Registry> =
        Arc::new(CalibrationLibrary::new(|| builtin_library(0.0)));
    let runner = test_runner(registry.clone());

    let ramsey = registry.node("ramsey").unwrap();
    let message = runner
        .gate
        .submit(Runnable::Node(ramsey), &params(json!({"duration": 10})))
        .unwrap();

    assert_eq!(message, "Node job ramsey is submitted");
    assert!(runner.run_state.is_running());

    let record = wait_for_idle(&runner.run_state).await;
    assert_eq!(record.name, "ramsey");
    assert_eq!(record.status, RunStatus::Finished);
    assert!(record.passed_parameters["duration"].is_f64());
    assert_eq!(record.passed_parameters["duration"], 10.0);
    assert_eq!(record.passed_parameters["qubit"], "q0");
    assert!(record.idx >= 1);
    assert!(record.completed_at.is_some());
    assert!(record.error.is_none());
    assert!(record.run_result.is_some());
}

#[tokio::test]
async fn test_submit_while_running_is_rejected() {
    let (first, release) = ScriptedNode::new("first", Script::Succeed).gated();
    let registry = library_of(vec![node(first), node(ScriptedNode::new("second", Script::Succeed))]);
    let runner = test_runner(registry.clone());

    runner
        .gate
        .submit(Runnable::Node(registry.node("first").unwrap()), &params(json!({})))
        .unwrap();
    let running = wait_for_running_record(&runner.run_state).await;

    let result = runner
        .gate
        .submit(Runnable::Node(registry.node("second").unwrap()), &params(json!({})));
    assert!(matches!(result, Err(RunnerError::AlreadyRunning)));

    // Rejection leaves the state untouched
    assert!(runner.run_state.is_running());
    let current = runner.run_state.last_run().unwrap();
    assert!(Arc::ptr_eq(&running, &current));

    release.store(true, Ordering::SeqCst);
    let record = wait_for_idle(&runner.run_state).await;
    assert_eq!(record.name, "first");
    assert_eq!(record.status, RunStatus::Finished);
}

#[tokio::test]
async fn test_rejection_keeps_previous_record() {
    let registry = library_of(vec![node(ScriptedNode::new("done", Script::Succeed))]);
    let runner = test_runner(registry.clone());
    let done = registry.node("done").unwrap();

    runner.gate.submit(Runnable::Node(done.clone()), &params(json!({}))).unwrap();
    let previous = wait_for_idle(&runner.run_state).await;

    let result = runner
        .gate
        .submit(Runnable::Node(done), &params(json!({"duration": "soon"})));
    assert!(matches!(result, Err(RunnerError::InvalidInput(_))));

    let current = runner.run_state.last_run().unwrap();
    assert!(Arc::ptr_eq(&previous, &current));
}

#[tokio::test]
async fn test_invalid_parameters_are_not_scheduled() {
    let scripted = ScriptedNode::new("ramsey", Script::Succeed);
    let runs = scripted.run_counter();
    let registry = library_of(vec![node(scripted)]);
    let runner = test_runner(registry.clone());

    let result = runner.gate.submit(
        Runnable::Node(registry.node("ramsey").unwrap()),
        &params(json!({"duration": "ten", "unknown": 1})),
    );

    match result {
        Err(RunnerError::InvalidInput(errors)) => {
            assert_eq!(errors.len(), 2);
            assert_eq!(errors[0].loc, vec!["duration".to_string()]);
            assert_eq!(errors[0].error_type, "float_type");
            assert_eq!(errors[1].error_type, "extra_forbidden");
        }
        other => panic!("expected invalid input, got {other:?}"),
    }

    assert!(!runner.run_state.is_running());
    assert!(runner.run_state.last_run().is_none());
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_node_payload_wrapped_in_parameters() {
    let registry = library_of(vec![node(ScriptedNode::new("ramsey", Script::Succeed))]);
    let runner = test_runner(registry.clone());

    runner
        .gate
        .submit(
            Runnable::Node(registry.node("ramsey").unwrap()),
            &params(json!({"parameters": {"x": 3}})),
        )
        .unwrap();

    let record = wait_for_idle(&runner.run_state).await;
    assert_eq!(record.passed_parameters, params(json!({"duration": 0.0, "x": 3})));
}

#[tokio::test]
async fn test_status_goes_running_then_finished() {
    let (gated, release) = ScriptedNode::new("ramsey", Script::Succeed).gated();
    let registry = library_of(vec![node(gated)]);
    let runner = test_runner(registry.clone());

    runner
        .gate
        .submit(Runnable::Node(registry.node("ramsey").unwrap()), &params(json!({})))
        .unwrap();

    let running = wait_for_running_record(&runner.run_state).await;
    assert_eq!(running.status, RunStatus::Running);
    assert_eq!(running.idx, -1);
    assert!(running.completed_at.is_none());
    assert!(running.error.is_none());
    assert!(running.run_result.is_none());

    release.store(true, Ordering::SeqCst);
    let finished = wait_for_idle(&runner.run_state).await;
    assert_eq!(finished.status, RunStatus::Finished);
    assert_eq!(finished.idx, 42);
    assert_eq!(finished.started_at, running.started_at);
    assert!(finished.completed_at.is_some());
    assert_eq!(finished.state_updates["ramsey.calibrated"], true);
}

#[tokio::test]
async fn test_failing_node_records_error() {
    let registry = library_of(vec![node(ScriptedNode::new("ramsey", Script::Fail))]);
    let runner = test_runner(registry.clone());

    runner
        .gate
        .submit(Runnable::Node(registry.node("ramsey").unwrap()), &params(json!({})))
        .unwrap();

    let record = wait_for_idle(&runner.run_state).await;
    assert_eq!(record.status, RunStatus::Error);
    assert_eq!(record.idx, -1);
    assert!(record.run_result.is_none());
    assert!(record.completed_at.is_some());
    let error = record.error.as_ref().unwrap();
    assert_eq!(error.error_class, "ValueError");
    assert_eq!(error.message, "bad cal");
    assert!(!error.traceback.is_empty());

    // A failed job frees the slot for the next submission
    let message = runner
        .gate
        .submit(Runnable::Node(registry.node("ramsey").unwrap()), &params(json!({})))
        .unwrap();
    assert_eq!(message, "Node job ramsey is submitted");
    wait_for_idle(&runner.run_state).await;
}

#[tokio::test]
async fn test_submit_workflow() {
    let registry = library_of(vec![
        node(ScriptedNode::new("n1", Script::Succeed)),
        node(ScriptedNode::new("n2", Script::Succeed)),
    ]);
    let runner = test_runner(registry.clone());

    let message = runner
        .gate
        .submit(
            Runnable::Workflow(registry.workflow("chain").unwrap()),
            &params(json!({
                "parameters": {"qubits": ["q0", "q1"]},
                "nodes": {"n1": {"parameters": {"x": 1}}}
            })),
        )
        .unwrap();
    assert_eq!(message, "Workflow job chain is submitted");

    let record = wait_for_idle(&runner.run_state).await;
    assert_eq!(record.status, RunStatus::Finished);
    assert_eq!(
        serde_json::Value::Object(record.passed_parameters.clone()),
        json!({
            "parameters": {"qubits": ["q0", "q1"]},
            "nodes": {
                "n1": {"duration": 0.0, "x": 1},
                "n2": {"duration": 0.0, "x": 0}
            }
        })
    );
    let result = record.run_result.as_ref().unwrap();
    assert_eq!(result["nodes"]["n1"]["parameters"]["x"], 1);
    assert_eq!(result["nodes_completed"], 2);

    let status = runner.run_state.workflow_status().unwrap();
    assert!(!status.active);
    assert_eq!(status.nodes_completed, 2);
    assert_eq!(status.nodes_total, 2);
}

#[tokio::test]
async fn test_invalid_workflow_node_parameters() {
    let registry = library_of(vec![node(ScriptedNode::new("n1", Script::Succeed))]);
    let runner = test_runner(registry.clone());

    let result = runner.gate.submit(
        Runnable::Workflow(registry.workflow("chain").unwrap()),
        &params(json!({"nodes": {"n1": {"parameters": {"x": "one"}}}})),
    );

    match result {
        Err(RunnerError::InvalidInput(errors)) => {
            assert_eq!(errors.len(), 1);
            assert_eq!(errors[0].loc, vec!["nodes", "n1", "x"]);
        }
        other => panic!("expected invalid input, got {other:?}"),
    }
    assert!(!runner.run_state.is_running());
}

#[tokio::test]
async fn test_concurrent_submissions_run_at_most_one_job() {
    let (gated, release) = ScriptedNode::new("ramsey", Script::Succeed).gated();
    let runs = gated.run_counter();
    let registry = library_of(vec![node(gated)]);
    let runner = test_runner(registry.clone());

    let mut handles = Vec::new();
    for _ in 0..8 {
        let gate = runner.gate.clone();
        let ramsey = registry.node("ramsey").unwrap();
        handles.push(tokio::spawn(async move {
            gate.submit(Runnable::Node(ramsey), &params(json!({})))
        }));
    }

    let mut accepted = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => accepted += 1,
            Err(RunnerError::AlreadyRunning) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(accepted, 1);

    release.store(true, Ordering::SeqCst);
    wait_for_idle(&runner.run_state).await;
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_is_running_clears_after_terminal_record() {
    let registry = library_of(vec![node(ScriptedNode::new("ramsey", Script::Succeed))]);
    let runner = test_runner(registry.clone());
    let mut rx = runner.run_state.subscribe();

    runner
        .gate
        .submit(Runnable::Node(registry.node("ramsey").unwrap()), &params(json!({})))
        .unwrap();

    let state = runner.run_state.clone();
    assert_eventually(
        move || {
            let state = state.clone();
            async move { !state.is_running() }
        },
        Duration::from_secs(5),
        "job should finish",
    )
    .await;

    // Once idle, the visible record is the terminal one
    let record = rx.borrow_and_update().clone().unwrap();
    assert!(record.status.is_terminal());
}
