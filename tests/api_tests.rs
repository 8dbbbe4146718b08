
use std::sync::atomic::Ordering;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use calibration_runner::api::router;
use calibration_runner::runner::Runner;
use test_harness::{library_of, node, test_runner, wait_for_idle, wait_for_running_record, Script, ScriptedNode};

fn app(runner: &Runner) -> Router {
    router(runner.api_state())
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    read(response).await
}

async fn post(app: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    read(response).await
}

async fn read(response: axum::response::Response) -> (StatusCode, Value) {
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, json)
}

#[tokio::test]
async fn test_idle_endpoints() {
    let runner = test_runner(library_of(vec![node(ScriptedNode::new("ramsey", Script::Succeed))]));
    let app = app(&runner);

    let (status, json) = get(&app, "/is_running").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json, json!(false));

    let (status, json) = get(&app, "/last_run").await;
    assert_eq!(status, StatusCode::OK);
    assert!(json.is_null());

    let (status, json) = get(&app, "/workflow/status").await;
    assert_eq!(status, StatusCode::OK);
    assert!(json.is_null());
}

#[tokio::test]
async fn test_submit_node_lifecycle() {
    let (gated, release) = ScriptedNode::new("ramsey", Script::Succeed).gated();
    let runner = test_runner(library_of(vec![node(gated)]));
    let app = app(&runner);

    let (status, json) = post(&app, "/submit/node?name=ramsey", json!({"duration": 10})).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(json, json!("Node job ramsey is submitted"));

    let (_, json) = get(&app, "/is_running").await;
    assert_eq!(json, json!(true));

    wait_for_running_record(&runner.run_state).await;
    let (_, json) = get(&app, "/last_run").await;
    assert_eq!(json["status"], "running");
    assert_eq!(json["name"], "ramsey");
    assert_eq!(json["runnable_type"], "node");
    assert_eq!(json["idx"], -1);
    assert!(json["completed_at"].is_null());
    assert_eq!(json["passed_parameters"]["duration"], 10.0);

    let (status, json) = post(&app, "/submit/node?name=ramsey", json!({})).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["detail"], "Already running");

    release.store(true, Ordering::SeqCst);
    wait_for_idle(&runner.run_state).await;

    let (_, json) = get(&app, "/last_run").await;
    assert_eq!(json["status"], "finished");
    assert_eq!(json["idx"], 42);
    assert!(json["completed_at"].is_string());
    assert!(json["error"].is_null());
    assert_eq!(json["state_updates"]["ramsey.calibrated"], true);
}

#[tokio::test]
async fn test_submit_invalid_parameters() {
    let runner = test_runner(library_of(vec![node(ScriptedNode::new("ramsey", Script::Succeed))]));
    let app = app(&runner);

    let (status, json) = post(&app, "/submit/node?name=ramsey", json!({"duration": "long"})).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    let errors = json["detail"].as_array().unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0]["loc"], json!(["duration"]));
    assert_eq!(errors[0]["type"], "float_type");

    let (_, json) = get(&app, "/is_running").await;
    assert_eq!(json, json!(false));
    let (_, json) = get(&app, "/last_run").await;
    assert!(json.is_null());
}

#[tokio::test]
async fn test_submit_unknown_runnable() {
    let runner = test_runner(library_of(vec![]));
    let app = app(&runner);

    let (status, json) = post(&app, "/submit/node?name=nope", json!({})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["detail"], "Node not found: nope");

    let (status, _) = post(&app, "/submit/workflow?name=nope", json!({})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_submit_workflow_and_status() {
    let runner = test_runner(library_of(vec![
        node(ScriptedNode::new("n1", Script::Succeed)),
        node(ScriptedNode::new("n2", Script::Fail)),
    ]));
    let app = app(&runner);

    let (status, json) = post(
        &app,
        "/submit/workflow?name=chain",
        json!({"parameters": {}, "nodes": {"n1": {"parameters": {"x": 1}}}}),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(json, json!("Workflow job chain is submitted"));

    wait_for_idle(&runner.run_state).await;

    let (_, json) = get(&app, "/last_run").await;
    assert_eq!(json["runnable_type"], "workflow");
    assert_eq!(json["status"], "error");
    assert_eq!(json["error"]["error_class"], "ValueError");
    assert!(json["run_result"].is_null());
    assert_eq!(json["passed_parameters"]["nodes"]["n1"]["x"], 1);

    let (_, json) = get(&app, "/workflow/status").await;
    assert_eq!(json["active"], false);
    assert_eq!(json["status"], "error");
    assert_eq!(json["nodes_completed"], 1);
    assert_eq!(json["nodes_total"], 2);
    assert!(json["active_node_name"].is_null());
}

#[tokio::test]
async fn test_catalog_endpoints() {
    let runner = test_runner(library_of(vec![
        node(ScriptedNode::new("n1", Script::Succeed)),
        node(ScriptedNode::new("n2", Script::Succeed)),
    ]));
    let app = app(&runner);

    let (status, json) = get(&app, "/get_nodes").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json.as_object().unwrap().len(), 2);
    assert_eq!(json["n1"]["parameters"]["x"]["type"], "integer");

    let (_, json) = get(&app, "/get_nodes?rescan=true").await;
    assert_eq!(json.as_object().unwrap().len(), 2);

    let (status, json) = get(&app, "/get_node?name=n2").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["name"], "n2");

    let (status, _) = get(&app, "/get_node?name=missing").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, json) = get(&app, "/get_workflows").await;
    assert_eq!(json["chain"]["nodes"].as_array().unwrap().len(), 2);

    let (status, json) = get(&app, "/get_workflow?name=chain").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["parameters"]["qubits"]["type"], "list");
}
