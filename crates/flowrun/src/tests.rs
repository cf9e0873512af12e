use std::collections::HashMap;
use std::time::Duration;

use flowpack::CompletionId;
use flowpack::Datum;
use flowpack::ErrorKind;
use flowpack::FlowId;
use flowpack::FlowResult;
use flowpack::FlowState;
use flowpack::Headers;
use flowpack::HttpMethod;
use flowpack::names;
use flowrpc::ContinuationKind;

use crate::client::Combinator;
use crate::client::CompleterClient;
use crate::client::ExternalCompletion;
use crate::client::StageSpec;
use crate::completer::InMemCompleter;
use crate::config::FlowConfig;
use crate::error::FlowError;
use crate::graph::Graph;
use crate::graph::StageKind;
use crate::invoker::FunctionResponse;
use crate::location::CodeLocation;
use crate::service::CompleterService;
use crate::transport::Request;
use crate::transport::Response;

fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
    move |key| map.get(key).cloned()
}

// ============================================================================
//  CONFIG
// ============================================================================

#[test]
fn test_config_defaults() {
    let config = FlowConfig::from_lookup(lookup(&[]));
    assert_eq!(config, FlowConfig::default());
    assert_eq!(config.completer_base_url, "http://completer-svc:8081");
}

#[test]
fn test_config_reads_environment() {
    let config = FlowConfig::from_lookup(lookup(&[
        ("COMPLETER_BASE_URL", "http://localhost:9000/"),
        ("FN_APP_NAME", "myapp"),
        ("FN_PATH", "/route"),
        ("COMPLETER_REQUEST_TIMEOUT_MS", "2500"),
    ]));
    assert_eq!(config.completer_base_url, "http://localhost:9000");
    assert_eq!(config.function_id.as_deref(), Some("myapp/route"));
    assert_eq!(config.request_timeout, Some(Duration::from_millis(2500)));
}

#[test]
fn test_config_ignores_blank_and_garbage() {
    let config = FlowConfig::from_lookup(lookup(&[
        ("COMPLETER_BASE_URL", "  "),
        ("FN_APP_NAME", "myapp"),
        ("COMPLETER_REQUEST_TIMEOUT_MS", "soon"),
    ]));
    assert_eq!(config.completer_base_url, "http://completer-svc:8081");
    assert_eq!(config.function_id, None);
    assert_eq!(config.request_timeout, None);
}

// ============================================================================
//  COMBINATORS & LOCATIONS
// ============================================================================

#[test]
fn test_combinator_wire_names_are_unique_and_parse_back() {
    for c in Combinator::ALL {
        assert_eq!(Combinator::from_wire_name(c.wire_name()), Some(c));
    }
    assert_eq!(Combinator::from_wire_name("complete"), None);
}

#[test]
fn test_combinator_kind_rules() {
    use ContinuationKind as K;
    assert!(Combinator::Supply.accepts(K::Supplier));
    assert!(Combinator::Supply.accepts(K::Runnable));
    assert!(!Combinator::Supply.accepts(K::Function));
    assert!(Combinator::ThenRun.accepts(K::Runnable));
    assert!(!Combinator::ThenApply.accepts(K::Consumer));
    assert!(Combinator::Handle.accepts(K::BiFunction));
    assert!(Combinator::WhenComplete.accepts(K::BiConsumer));
    assert!(!Combinator::WhenComplete.accepts(K::BiFunction));
    assert_eq!(Combinator::ThenCombine.dependencies(), 2);
    assert_eq!(Combinator::Exceptionally.dependencies(), 1);
}

#[test]
fn test_stage_spec_validation() {
    let closure = Datum::blob(flowrpc::CLOSURE_CONTENT_TYPE, b"{}".to_vec());
    let one = vec![CompletionId::new("1")];

    let ok = StageSpec::new(Combinator::ThenApply, one.clone(), closure.clone(), CodeLocation::unknown());
    assert!(ok.validate().is_ok());

    let missing = StageSpec::new(Combinator::ThenCombine, one.clone(), closure, CodeLocation::unknown());
    assert!(matches!(missing.validate(), Err(FlowError::Rejected(_))));

    let not_blob = StageSpec::new(Combinator::ThenApply, one, Datum::Empty, CodeLocation::unknown());
    assert!(matches!(not_blob.validate(), Err(FlowError::Rejected(_))));
}

#[test]
fn test_code_location_from_header() {
    assert_eq!(CodeLocation::from_header(None), CodeLocation::unknown());
    assert_eq!(CodeLocation::from_header(Some("unknown location")), CodeLocation::unknown());
    assert_eq!(CodeLocation::from_header(Some("src/main.rs:3:9")).as_str(), "src/main.rs:3:9");

    let here = CodeLocation::caller();
    assert!(here.as_str().starts_with(file!()), "{}", here);
}

#[test]
fn test_external_completion_urls() {
    let external = ExternalCompletion::new("http://completer", &FlowId::new("f"), CompletionId::new("3"));
    assert_eq!(external.complete_url, "http://completer/graph/f/stage/3/complete");
    assert_eq!(external.fail_url, "http://completer/graph/f/stage/3/fail");
}

#[test]
fn test_function_response_status_mapping() {
    let ok = FunctionResponse { status: 204, headers: Headers::new(), body: vec![] }.into_result();
    assert!(ok.is_success());

    let redirect = FunctionResponse { status: 302, headers: Headers::new(), body: vec![] }.into_result();
    assert!(redirect.is_success());
    assert!(matches!(redirect.datum(), Datum::HttpResponse { status: 302, .. }));

    for status in [199, 400] {
        let edge = FunctionResponse { status, headers: Headers::new(), body: vec![] }.into_result();
        assert!(!edge.is_success(), "status {status} should fail the stage");
    }

    let failed = FunctionResponse { status: 503, headers: Headers::new(), body: b"down".to_vec() }.into_result();
    assert!(!failed.is_success());
    assert!(matches!(failed.datum(), Datum::HttpResponse { status: 503, .. }));
}

// ============================================================================
//  GRAPH
// ============================================================================

#[tokio::test]
async fn test_stage_outcome_is_written_once() {
    let graph = Graph::new("app/fn", FlowId::new("f"));
    let stage = graph.add_stage(StageKind::Delay, vec![], CodeLocation::unknown()).expect("stage");
    assert_eq!(stage.id.as_str(), "1");
    assert!(!stage.is_resolved());

    assert!(stage.resolve(FlowResult::empty()));
    assert!(!stage.resolve(FlowResult::error(ErrorKind::Unknown, "late")));
    assert_eq!(stage.outcome().await, FlowResult::empty());
}

#[test]
fn test_graph_drains_only_after_commit() {
    let graph = Graph::new("app/fn", FlowId::new("f"));
    let stage = graph.add_stage(StageKind::Delay, vec![], CodeLocation::unknown()).expect("stage");
    assert_eq!(graph.active_stages(), 1);

    assert!(!graph.finish_stage(&stage, FlowResult::empty()));
    assert_eq!(graph.active_stages(), 0);

    assert!(graph.commit());
    assert!(!graph.commit());
    assert!(graph.try_drain());
    assert!(!graph.try_drain());

    let from_hook = graph.add_stage(StageKind::Delay, vec![], CodeLocation::unknown()).expect("hooks may add work");
    assert!(!graph.finish_stage(&from_hook, FlowResult::empty()));

    graph.mark_complete();
    let late = graph.add_stage(StageKind::Delay, vec![], CodeLocation::unknown());
    assert!(matches!(late, Err(FlowError::Rejected(_))));
}

#[test]
fn test_hooks_pop_most_recent_first_and_share_ids() {
    let graph = Graph::new("app/fn", FlowId::new("f"));
    let first = graph.add_hook(Datum::Empty, CodeLocation::new("first")).expect("hook");
    let stage = graph.add_stage(StageKind::Delay, vec![], CodeLocation::unknown()).expect("stage");
    let second = graph.add_hook(Datum::Empty, CodeLocation::new("second")).expect("hook");
    assert_eq!((first.as_str(), stage.id.as_str(), second.as_str()), ("1", "2", "3"));

    assert_eq!(graph.pop_hook().map(|h| h.id), Some(second));
    assert_eq!(graph.pop_hook().map(|h| h.id), Some(first));
    assert!(graph.pop_hook().is_none());
}

// ============================================================================
//  ENGINE
// ============================================================================

#[tokio::test]
async fn test_completed_value_and_delay_resolve_without_invoker() -> crate::Result<()> {
    let completer = InMemCompleter::default();
    let flow = completer.create_flow("app/fn").await?;

    let value = completer.completed_value(&flow, FlowResult::empty(), CodeLocation::unknown()).await?;
    assert_eq!(completer.await_result(&flow, &value, None).await?, FlowResult::empty());

    let delay = completer.delay(&flow, Duration::from_millis(10), CodeLocation::unknown()).await?;
    assert_eq!(completer.await_result(&flow, &delay, None).await?, FlowResult::empty());
    Ok(())
}

#[tokio::test]
async fn test_supply_without_invoker_fails_the_stage() -> crate::Result<()> {
    let completer = InMemCompleter::default();
    let flow = completer.create_flow("app/fn").await?;
    let closure = flowrpc::Closure::stateless("anything", ContinuationKind::Supplier).to_datum()?;

    let stage = completer.supply(&flow, closure, CodeLocation::unknown()).await?;
    let result = completer.await_result(&flow, &stage, None).await?;
    assert!(matches!(result.datum(), Datum::Error { kind: ErrorKind::StageInvokeFailed, .. }));
    Ok(())
}

struct PanickingFunctions;

#[async_trait::async_trait]
impl crate::invoker::FunctionInvoker for PanickingFunctions {
    async fn invoke_function(&self, _: &str, _: HttpMethod, _: Headers, _: Vec<u8>) -> crate::Result<FunctionResponse> {
        panic!("invoker blew up")
    }
}

#[tokio::test]
async fn test_panicking_stage_task_still_resolves() -> crate::Result<()> {
    let completer = InMemCompleter::new("http://completer.test", std::sync::Arc::new(PanickingFunctions));
    let flow = completer.create_flow("app/fn").await?;

    let stage = completer
        .invoke_function(&flow, "app/other", HttpMethod::Get, Headers::new(), vec![], CodeLocation::unknown())
        .await?;
    let result = completer.await_result(&flow, &stage, Some(Duration::from_secs(2))).await?;
    assert!(matches!(result.datum(), Datum::Error { kind: ErrorKind::StageInvokeFailed, .. }));

    completer.commit(&flow).await?;
    tokio::time::timeout(Duration::from_secs(1), completer.await_flow(&flow))
        .await
        .map_err(|_| FlowError::Timeout)??;
    Ok(())
}

#[tokio::test]
async fn test_unknown_graph_and_stage_are_rejected() -> crate::Result<()> {
    let completer = InMemCompleter::default();
    let missing = FlowId::new("nope");
    assert!(matches!(completer.commit(&missing).await, Err(FlowError::Rejected(_))));

    let flow = completer.create_flow("app/fn").await?;
    let stage = completer.await_result(&flow, &CompletionId::new("42"), None).await;
    assert!(matches!(stage, Err(FlowError::Rejected(_))));

    let any = completer.any_of(&flow, &[], CodeLocation::unknown()).await;
    assert!(matches!(any, Err(FlowError::Rejected(_))));
    Ok(())
}

#[tokio::test]
async fn test_empty_all_of_resolves_immediately() -> crate::Result<()> {
    let completer = InMemCompleter::default();
    let flow = completer.create_flow("app/fn").await?;
    let all = completer.all_of(&flow, &[], CodeLocation::unknown()).await?;
    assert_eq!(completer.await_result(&flow, &all, None).await?, FlowResult::empty());
    Ok(())
}

#[tokio::test]
async fn test_await_timeout_leaves_stage_running() -> crate::Result<()> {
    let completer = InMemCompleter::default();
    let flow = completer.create_flow("app/fn").await?;
    let slow = completer.delay(&flow, Duration::from_millis(200), CodeLocation::unknown()).await?;

    let early = completer.await_result(&flow, &slow, Some(Duration::from_millis(10))).await;
    assert!(matches!(early, Err(FlowError::Timeout)));
    assert_eq!(completer.await_result(&flow, &slow, None).await?, FlowResult::empty());
    Ok(())
}

#[tokio::test]
async fn test_external_completion_resolves_with_request() -> crate::Result<()> {
    let completer = InMemCompleter::default();
    let flow = completer.create_flow("app/fn").await?;
    let external = completer.external_completion(&flow, CodeLocation::unknown()).await?;
    assert!(external.complete_url.starts_with(completer.external_base_url()));

    let request = Datum::HttpRequest { method: HttpMethod::Post, headers: Headers::new(), body: b"done".to_vec() };
    completer.complete_external(&flow, &external.completion_id, false, request.clone())?;
    let again = completer.complete_external(&flow, &external.completion_id, true, request.clone());
    assert!(matches!(again, Err(FlowError::Rejected(_))));

    let result = completer.await_result(&flow, &external.completion_id, None).await?;
    assert!(!result.is_success());
    assert_eq!(result.datum(), &request);
    Ok(())
}

#[tokio::test]
async fn test_commit_on_empty_graph_completes() -> crate::Result<()> {
    let completer = InMemCompleter::default();
    let flow = completer.create_flow("app/fn").await?;
    completer.commit(&flow).await?;
    completer.await_flow(&flow).await?;
    assert!(completer.is_complete(&flow)?);

    let late = completer.delay(&flow, Duration::from_millis(1), CodeLocation::unknown()).await;
    assert!(matches!(late, Err(FlowError::Rejected(_))));
    Ok(())
}

#[test]
fn test_termination_state_datum() {
    let arg = FlowResult::success(Datum::State(FlowState::Succeeded));
    assert_eq!(arg.to_part().headers.get(names::STATE_TYPE), Some("succeeded"));
}

// ============================================================================
//  SERVICE
// ============================================================================

async fn create(service: &CompleterService) -> String {
    let response = service.handle(Request::post("/graph").with_query("functionId", "app/fn")).await;
    assert_eq!(response.status, 200);
    response.headers.get(names::FLOW_ID).expect("flow id").to_string()
}

#[tokio::test]
async fn test_service_status_codes() {
    let service = CompleterService::default();

    let missing = service.handle(Request::post("/graph")).await;
    assert_eq!(missing.status, 400);

    let unknown = service.handle(Request::post("/graph/nope/commit")).await;
    assert_eq!(unknown.status, 404);

    let flow = create(&service).await;

    let no_route = service.handle(Request::post(format!("/graph/{flow}/frobnicate"))).await;
    assert_eq!(no_route.status, 404);

    let bad_delay = service.handle(Request::post(format!("/graph/{flow}/delay")).with_query("delayMs", "x")).await;
    assert_eq!(bad_delay.status, 400);

    let wrong_method = service.handle(Request::get(format!("/graph/{flow}/commit"))).await;
    assert_eq!(wrong_method.status, 405);

    let unknown_stage = service.handle(Request::get(format!("/graph/{flow}/stage/77"))).await;
    assert_eq!(unknown_stage.status, 404);

    let empty_any = service.handle(Request::post(format!("/graph/{flow}/anyOf")).with_query("cids", "")).await;
    assert_eq!(empty_any.status, 409);
}

#[tokio::test]
async fn test_service_await_times_out_with_408() {
    let service = CompleterService::default();
    let flow = create(&service).await;

    let delay = service.handle(Request::post(format!("/graph/{flow}/delay")).with_query("delayMs", "500")).await;
    let stage = delay.headers.get(names::STAGE_ID).expect("stage id").to_string();

    let waited = service
        .handle(Request::get(format!("/graph/{flow}/stage/{stage}")).with_query("timeoutMs", "10"))
        .await;
    assert_eq!(waited.status, 408);
}

#[tokio::test]
async fn test_service_completed_value_round_trips_result_part() {
    let service = CompleterService::default();
    let flow = create(&service).await;

    let failed = FlowResult::error(ErrorKind::FunctionTimeout, "slow");
    let created = service
        .handle(Request::post(format!("/graph/{flow}/completedValue")).with_part(failed.to_part()))
        .await;
    let stage = created.headers.get(names::STAGE_ID).expect("stage id").to_string();

    let response: Response = service.handle(Request::get(format!("/graph/{flow}/stage/{stage}"))).await;
    assert_eq!(response.status, 200);
    assert_eq!(FlowResult::from_part(&response.into_part()), Ok(failed));
}
