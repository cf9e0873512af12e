//! Combinator semantics against the in-memory engine.

mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use flowpack::Datum;
use flowpack::ErrorKind;
use flowrpc::Call;
use flowrpc::ContinuationKind as K;
use flowrpc::Outcome;
use flowrpc::Registry;
use flowrpc::Returned;
use flowrpc::StageError;
use flowrpc::UserError;

use flowrun::Flow;
use flowrun::FlowError;
use flowrun::FutureRef;

use common::Harness;
use common::closure;

async fn identity(_: Flow, call: Call) -> Outcome {
    let value: serde_json::Value = call.arg(0)?;
    Ok(Returned::value(&value))
}

async fn concat(_: Flow, call: Call) -> Outcome {
    let a: String = call.arg(0)?;
    let b: String = call.arg(1)?;
    Ok(Returned::value(&format!("{a}{b}")))
}

async fn recover(_: Flow, call: Call) -> Outcome {
    let error = call.error(0).ok_or_else(|| UserError::new("expected a failure"))?;
    Ok(Returned::value(&error.message()))
}

async fn recompose(flow: Flow, _: Call) -> Outcome {
    let future = flow.completed_value("foo").await.map_err(|e| UserError::new(e.to_string()))?;
    Ok(future.returned())
}

async fn deref(flow: Flow, call: Call) -> Outcome {
    let reference: FutureRef = call.state()?;
    let future = flow.resolve(&reference).map_err(|e| UserError::new(e.to_string()))?;
    let value: String = future.get().await.map_err(|e| UserError::new(e.to_string()))?;
    Ok(Returned::value(&format!("{value}!")))
}

async fn describe(_: Flow, call: Call) -> Outcome {
    match call.error(1) {
        Some(e) => Ok(Returned::value(&format!("error: {}", e.message()))),
        None => Ok(Returned::value(&format!("value: {}", call.arg::<i32>(0)?))),
    }
}

fn common_handlers(registry: &mut Registry<Flow>) {
    registry
        .register("identity", K::Function, identity)
        .register("concat", K::BiFunction, concat)
        .register("recover", K::Function, recover)
        .register("recompose", K::Function, recompose)
        .register("deref", K::Supplier, deref)
        .register("fail_foo", K::Supplier, |_, _| async { Err(UserError::new("foo")) })
        .register("fail_bar", K::Function, |_, _| async { Err(UserError::new("bar")) });
}

/// Registers one handler per kind that counts its invocations.
fn counting(registry: &mut Registry<Flow>, counter: &Arc<AtomicUsize>) {
    for (code, kind) in [
        ("touch_fn", K::Function),
        ("touch_consumer", K::Consumer),
        ("touch_runnable", K::Runnable),
        ("touch_bifn", K::BiFunction),
        ("touch_biconsumer", K::BiConsumer),
    ] {
        let counter = counter.clone();
        registry.register(code, kind, move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok(Returned::value(&"touched")) }
        });
    }
}

fn user_message(error: FlowError) -> String {
    match error {
        FlowError::Completion(StageError::User(e)) => e.message,
        other => panic!("expected a user completion error, got {other:?}"),
    }
}

// ============================================================================
//  FAILURE PROPAGATION
// ============================================================================

#[tokio::test]
async fn test_then_combinators_skip_closure_on_parent_failure() -> anyhow::Result<()> {
    let counter = Arc::new(AtomicUsize::new(0));
    let h = Harness::local(|r| counting(r, &counter));
    let flow = h.flow().await;

    let failed = flow.failed_value(UserError::new("boom")).await?;
    let ok = flow.completed_value("fine").await?;

    let stages = vec![
        failed.then_apply(closure("touch_fn", K::Function)).await?,
        failed.then_accept(closure("touch_consumer", K::Consumer)).await?,
        failed.then_run(closure("touch_runnable", K::Runnable)).await?,
        failed.then_compose(closure("touch_fn", K::Function)).await?,
        failed.then_combine(&ok, closure("touch_bifn", K::BiFunction)).await?,
        ok.then_combine(&failed, closure("touch_bifn", K::BiFunction)).await?,
        failed.then_accept_both(&ok, closure("touch_biconsumer", K::BiConsumer)).await?,
    ];

    for stage in stages {
        let err = stage.get::<serde_json::Value>().await.expect_err("stage should fail");
        assert_eq!(user_message(err), "boom");
    }
    assert_eq!(counter.load(Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test]
async fn test_handle_always_runs_with_value_or_error() -> anyhow::Result<()> {
    let h = Harness::local(|r| {
        r.register("describe", K::BiFunction, describe);
    });
    let flow = h.flow().await;

    let ok = flow.completed_value(&7).await?;
    let failed = flow.failed_value(UserError::new("nope")).await?;

    assert_eq!(ok.handle(closure("describe", K::BiFunction)).await?.get::<String>().await?, "value: 7");
    assert_eq!(failed.handle(closure("describe", K::BiFunction)).await?.get::<String>().await?, "error: nope");
    Ok(())
}

#[tokio::test]
async fn test_when_complete_keeps_parent_outcome() -> anyhow::Result<()> {
    let counter = Arc::new(AtomicUsize::new(0));
    let h = Harness::local(|r| {
        common_handlers(r);
        counting(r, &counter);
        r.register("observer_fails", K::BiConsumer, |_, _| async { Err(UserError::new("observer")) });
    });
    let flow = h.flow().await;

    let foo = flow.supply(closure("fail_foo", K::Supplier)).await?;
    let observed = foo.when_complete(closure("touch_biconsumer", K::BiConsumer)).await?;
    let recovered = observed.exceptionally(closure("recover", K::Function)).await?;
    assert_eq!(recovered.get::<String>().await?, "foo");
    assert_eq!(counter.load(Ordering::SeqCst), 1);

    let ok = flow.completed_value("kept").await?;
    let noisy = ok.when_complete(closure("observer_fails", K::BiConsumer)).await?;
    assert_eq!(noisy.get::<String>().await?, "kept");
    Ok(())
}

#[tokio::test]
async fn test_throwing_observer_then_exceptionally_keeps_value() -> anyhow::Result<()> {
    let counter = Arc::new(AtomicUsize::new(0));
    let h = Harness::local(|r| {
        common_handlers(r);
        counting(r, &counter);
        r.register("observer_fails", K::BiConsumer, |_, _| async { Err(UserError::new("observer")) });
    });
    let flow = h.flow().await;

    let foo = flow.completed_value("foo").await?;
    let observed = foo.when_complete(closure("observer_fails", K::BiConsumer)).await?;
    let recovered = observed.exceptionally(closure("touch_fn", K::Function)).await?;
    assert_eq!(recovered.get::<String>().await?, "foo");
    assert_eq!(counter.load(Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test]
async fn test_exceptionally_passes_success_and_keeps_original_error() -> anyhow::Result<()> {
    let counter = Arc::new(AtomicUsize::new(0));
    let h = Harness::local(|r| {
        common_handlers(r);
        counting(r, &counter);
    });
    let flow = h.flow().await;

    let ok = flow.completed_value("fine").await?;
    let passed = ok.exceptionally(closure("touch_fn", K::Function)).await?;
    assert_eq!(passed.get::<String>().await?, "fine");
    assert_eq!(counter.load(Ordering::SeqCst), 0);

    let foo = flow.supply(closure("fail_foo", K::Supplier)).await?;
    let still_failed = foo.exceptionally(closure("fail_bar", K::Function)).await?;
    assert_eq!(user_message(still_failed.get::<String>().await.expect_err("fails")), "foo");
    Ok(())
}

// ============================================================================
//  COMPOSITION
// ============================================================================

#[tokio::test]
async fn test_then_combine_concatenates() -> anyhow::Result<()> {
    let h = Harness::local(common_handlers);
    let flow = h.flow().await;

    let f = flow.completed_value("f").await?;
    let oo = flow.completed_value("oo").await?;
    let combined = f.then_combine(&oo, closure("concat", K::BiFunction)).await?;
    assert_eq!(combined.get::<String>().await?, "foo");
    Ok(())
}

#[tokio::test]
async fn test_then_combine_fails_with_the_failing_side() -> anyhow::Result<()> {
    let h = Harness::local(common_handlers);
    let flow = h.flow().await;

    let foo = flow.supply(closure("fail_foo", K::Supplier)).await?;
    let bar = flow.completed_value("bar").await?;
    let combined = foo.then_combine(&bar, closure("concat", K::BiFunction)).await?;
    let message = combined.exceptionally(closure("recover", K::Function)).await?;
    assert_eq!(message.get::<String>().await?, "foo");
    Ok(())
}

#[tokio::test]
async fn test_exceptionally_compose_flattens_returned_stage() -> anyhow::Result<()> {
    let h = Harness::local(common_handlers);
    let flow = h.flow().await;

    let failed = flow.failed_value(UserError::new("oops")).await?;
    let composed = failed.exceptionally_compose(closure("recompose", K::Function)).await?;
    assert_eq!(composed.get::<String>().await?, "foo");

    let closure_fails = failed.exceptionally_compose(closure("fail_bar", K::Function)).await?;
    assert_eq!(user_message(closure_fails.get::<String>().await.expect_err("fails")), "bar");
    Ok(())
}

#[tokio::test]
async fn test_then_compose_requires_a_stage_reference() -> anyhow::Result<()> {
    let h = Harness::local(common_handlers);
    let flow = h.flow().await;

    let start = flow.completed_value("x").await?;
    let good = start.then_compose(closure("recompose", K::Function)).await?;
    assert_eq!(good.get::<String>().await?, "foo");

    let bad = start.then_compose(closure("identity", K::Function)).await?;
    match bad.get::<String>().await {
        Err(FlowError::Completion(StageError::Platform { kind, message })) => {
            assert_eq!(kind, ErrorKind::InvalidStageResponse);
            assert_eq!(message, "result was not a stageref datum");
        }
        other => panic!("expected an invalid stage response, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn test_future_reference_survives_captured_state() -> anyhow::Result<()> {
    let h = Harness::local(common_handlers);
    let flow = h.flow().await;

    let hello = flow.completed_value("hello").await?;
    let closure = flowrpc::Closure::new("deref", K::Supplier, &hello.to_ref())?;
    let derived = flow.supply(closure).await?;
    assert_eq!(derived.get::<String>().await?, "hello!");
    Ok(())
}

// ============================================================================
//  RACES & JOINS
// ============================================================================

#[tokio::test]
async fn test_either_takes_one_of_the_inputs() -> anyhow::Result<()> {
    let h = Harness::local(common_handlers);
    let flow = h.flow().await;

    let a = flow.completed_value("a").await?;
    let b = flow.completed_value("b").await?;
    let either = a.apply_to_either(&b, closure("identity", K::Function)).await?;
    let winner = either.get::<String>().await?;
    assert!(winner == "a" || winner == "b", "unexpected winner {winner}");
    Ok(())
}

#[tokio::test]
async fn test_accept_either_resolves_empty() -> anyhow::Result<()> {
    let counter = Arc::new(AtomicUsize::new(0));
    let h = Harness::local(|r| counting(r, &counter));
    let flow = h.flow().await;

    let slow = flow.delay(Duration::from_secs(5)).await?;
    let fast = flow.completed_value(&1).await?;
    let accepted = slow.accept_either(&fast, closure("touch_consumer", K::Consumer)).await?;
    assert_eq!(accepted.get_datum().await?, Datum::Empty);
    assert_eq!(counter.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn test_all_of_waits_for_every_stage() -> anyhow::Result<()> {
    let done = Arc::new(AtomicUsize::new(0));
    let ticks = done.clone();
    let h = Harness::local(move |r| {
        r.register("tick", K::Runnable, move |_, call: Call| {
            let ticks = ticks.clone();
            async move {
                let delay: u64 = call.state().unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(delay)).await;
                ticks.fetch_add(1, Ordering::SeqCst);
                Ok(Returned::Empty)
            }
        });
    });
    let flow = h.flow().await;

    let mut stages = Vec::new();
    for delay in [30u64, 10, 20] {
        stages.push(flow.supply(flowrpc::Closure::new("tick", K::Runnable, &delay)?).await?);
    }
    let refs: Vec<_> = stages.iter().collect();
    let all = flow.all_of(&refs).await?;

    all.get::<()>().await?;
    assert_eq!(done.load(Ordering::SeqCst), 3);
    Ok(())
}

#[tokio::test]
async fn test_all_of_fails_fast() -> anyhow::Result<()> {
    let h = Harness::local(common_handlers);
    let flow = h.flow().await;

    let never = flow.external_future().await?.future;
    let failed = flow.supply(closure("fail_foo", K::Supplier)).await?;
    let all = flow.all_of(&[&never, &failed]).await?;

    let err = all.get_timeout::<()>(Duration::from_secs(5)).await.expect_err("fails");
    assert_eq!(user_message(err), "foo");
    Ok(())
}

#[tokio::test]
async fn test_any_of_yields_a_member() -> anyhow::Result<()> {
    let h = Harness::local(common_handlers);
    let flow = h.flow().await;

    let x = flow.completed_value("x").await?;
    let y = flow.completed_value("y").await?;
    let z = flow.completed_value("z").await?;
    let any = flow.any_of(&[&x, &y, &z]).await?;

    let members: HashSet<&str> = ["x", "y", "z"].into_iter().collect();
    let value = any.get::<String>().await?;
    assert!(members.contains(value.as_str()), "unexpected member {value}");
    Ok(())
}

// ============================================================================
//  WAITING
// ============================================================================

#[tokio::test]
async fn test_timeout_is_distinct_from_stage_failure() -> anyhow::Result<()> {
    let h = Harness::local(common_handlers);
    let flow = h.flow().await;

    let slow = flow.delay(Duration::from_secs(5)).await?;
    let timed_out = slow.get_timeout::<()>(Duration::from_millis(20)).await;
    assert!(matches!(timed_out, Err(FlowError::Timeout)));

    let failed = flow.supply(closure("fail_foo", K::Supplier)).await?;
    let completion = failed.get_timeout::<String>(Duration::from_secs(5)).await;
    assert!(matches!(completion, Err(FlowError::Completion(_))));
    Ok(())
}

#[tokio::test]
async fn test_get_now_substitutes_default() -> anyhow::Result<()> {
    let h = Harness::local(common_handlers);
    let flow = h.flow().await;

    let slow = flow.delay(Duration::from_secs(30)).await?;
    assert_eq!(slow.get_now(Some(5)).await?, Some(5));

    let ready = flow.completed_value(&9).await?;
    assert_eq!(ready.get_now(0).await?, 9);
    Ok(())
}

#[tokio::test]
async fn test_kind_mismatch_is_rejected_before_sending() -> anyhow::Result<()> {
    let h = Harness::local(common_handlers);
    let flow = h.flow().await;
    let start = flow.completed_value(&1).await?;

    let wrong = start.then_apply(closure("identity", K::Consumer)).await;
    assert!(matches!(wrong, Err(FlowError::Rejected(_))));

    let supplier_hook = flow.add_termination_hook(closure("identity", K::Supplier)).await;
    assert!(matches!(supplier_hook, Err(FlowError::Rejected(_))));
    Ok(())
}

#[tokio::test]
async fn test_unregistered_continuation_fails_stage() -> anyhow::Result<()> {
    let h = Harness::local(common_handlers);
    let flow = h.flow().await;

    let stage = flow.supply(closure("missing", K::Supplier)).await?;
    match stage.get::<String>().await {
        Err(FlowError::Completion(StageError::Platform { kind, .. })) => assert_eq!(kind, ErrorKind::InvalidStageResponse),
        other => panic!("expected a platform error, got {other:?}"),
    }
    Ok(())
}
