//! Shared harness: an in-memory completer wired to a local continuation handler.

#![allow(dead_code)]

use std::sync::Arc;

use flowrpc::Closure;
use flowrpc::ContinuationKind;
use flowrpc::Registry;

use flowrun::CompleterClient;
use flowrun::CompleterService;
use flowrun::ContinuationHandler;
use flowrun::Flow;
use flowrun::FlowContext;
use flowrun::FunctionInvoker;
use flowrun::InMemCompleter;
use flowrun::LocalStageInvoker;
use flowrun::RemoteCompleterClient;
use flowrun::invoker::NoFunctions;
use flowrun::loopback::LoopbackTransport;

pub const FUNCTION_ID: &str = "app/fn";
pub const BASE_URL: &str = "http://completer.test";

pub struct Harness {
    pub completer: InMemCompleter,
    /// The client continuations and callers use: the engine itself, or the
    /// remote client over the loopback service.
    pub client: Arc<dyn CompleterClient>,
    pub transport: Option<Arc<LoopbackTransport>>,
    handler: Arc<ContinuationHandler>,
}

impl Harness {
    pub fn local(register: impl FnOnce(&mut Registry<Flow>)) -> Self {
        Self::build(register, Arc::new(NoFunctions), false)
    }

    pub fn remote(register: impl FnOnce(&mut Registry<Flow>)) -> Self {
        Self::build(register, Arc::new(NoFunctions), true)
    }

    pub fn with_functions(functions: Arc<dyn FunctionInvoker>, remote: bool) -> Self {
        Self::build(|_| {}, functions, remote)
    }

    fn build(register: impl FnOnce(&mut Registry<Flow>), functions: Arc<dyn FunctionInvoker>, remote: bool) -> Self {
        flowrun::logging::init_for_tests();
        let completer = InMemCompleter::new(BASE_URL, functions);

        let mut transport = None;
        let client: Arc<dyn CompleterClient> = if remote {
            let loopback = Arc::new(LoopbackTransport::new(CompleterService::new(completer.clone())));
            transport = Some(loopback.clone());
            Arc::new(RemoteCompleterClient::new(loopback, BASE_URL))
        } else {
            Arc::new(completer.clone())
        };

        let mut registry = Registry::new();
        register(&mut registry);
        let handler = Arc::new(ContinuationHandler::new(registry, client.clone()));
        completer.set_stage_invoker(Arc::new(LocalStageInvoker::new(&handler)));

        Self { completer, client, transport, handler }
    }

    pub async fn flow(&self) -> Flow {
        let id = self.client.create_flow(FUNCTION_ID).await.expect("create flow");
        Flow::new(self.client.clone(), id)
    }

    pub fn context(&self) -> FlowContext {
        FlowContext::ordinary(self.client.clone(), FUNCTION_ID)
    }
}

pub fn closure(code: &str, kind: ContinuationKind) -> Closure {
    Closure::stateless(code, kind)
}
