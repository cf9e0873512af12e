//! # Completer Service
//!
//! Serves the completer routes on top of an `InMemCompleter`. The service maps
//! a `Request` to a `Response` and knows nothing about sockets; a transport
//! decides how requests reach it.
//!
//! ## Routes
//!
//! | Method | Path                              | Query            | Reply                    |
//! |--------|-----------------------------------|------------------|--------------------------|
//! | POST   | `/graph`                          | `functionId`     | `FnProject-FlowID`       |
//! | POST   | `/graph/{flow}/supply`            |                  | `FnProject-StageID`      |
//! | POST   | `/graph/{flow}/completedValue`    |                  | `FnProject-StageID`      |
//! | POST   | `/graph/{flow}/delay`             | `delayMs`        | `FnProject-StageID`      |
//! | POST   | `/graph/{flow}/allOf`, `anyOf`    | `cids`           | `FnProject-StageID`      |
//! | POST   | `/graph/{flow}/externalCompletion`|                  | `FnProject-StageID`      |
//! | POST   | `/graph/{flow}/invokeFunction`    | `functionId`     | `FnProject-StageID`      |
//! | POST   | `/graph/{flow}/terminationHook`   |                  |                          |
//! | POST   | `/graph/{flow}/commit`            |                  |                          |
//! | POST   | `/graph/{flow}/stage/{id}/{op}`   | `other`          | `FnProject-StageID`      |
//! | POST   | `/graph/{flow}/stage/{id}/complete`, `fail` |        |                          |
//! | GET    | `/graph/{flow}/stage/{id}`        | `timeoutMs`      | result part, or 408      |
//!
//! Unknown graphs and stages answer 404, malformed requests 400, and
//! operations the graph refuses 409.

use std::time::Duration;

use flowpack::CompletionId;
use flowpack::Datum;
use flowpack::FlowId;
use flowpack::FlowResult;
use flowpack::HttpMethod;
use flowpack::Part;
use flowpack::names;

use crate::client::Combinator;
use crate::client::CompleterClient;
use crate::client::StageSpec;
use crate::completer::InMemCompleter;
use crate::error::FlowError;
use crate::location::CodeLocation;
use crate::transport::Request;
use crate::transport::Response;

#[derive(Debug, thiserror::Error)]
enum ServiceError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("method {0} not allowed")]
    MethodNotAllowed(HttpMethod),
    #[error(transparent)]
    Flow(#[from] FlowError),
}

impl From<flowpack::Error> for ServiceError {
    fn from(e: flowpack::Error) -> Self {
        Self::BadRequest(e.to_string())
    }
}

impl ServiceError {
    fn status(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::BadRequest(_) => 400,
            Self::MethodNotAllowed(_) => 405,
            Self::Flow(FlowError::Rejected(_)) => 409,
            Self::Flow(FlowError::Timeout) => 408,
            Self::Flow(_) => 500,
        }
    }
}

type Result<T> = std::result::Result<T, ServiceError>;

enum Route<'a> {
    CreateFlow,
    Graph { flow: FlowId, op: &'a str },
    Await { flow: FlowId, stage: CompletionId },
    Stage { flow: FlowId, stage: CompletionId, op: &'a str },
}

impl<'a> Route<'a> {
    fn parse(path: &'a str) -> Option<Self> {
        let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
        match segments.as_slice() {
            ["graph"] => Some(Self::CreateFlow),
            ["graph", flow, "stage", stage] => Some(Self::Await { flow: FlowId::from(*flow), stage: CompletionId::from(*stage) }),
            ["graph", flow, "stage", stage, op] => {
                Some(Self::Stage { flow: FlowId::from(*flow), stage: CompletionId::from(*stage), op })
            }
            ["graph", flow, op] => Some(Self::Graph { flow: FlowId::from(*flow), op }),
            _ => None,
        }
    }
}

#[derive(Clone, Default)]
pub struct CompleterService {
    completer: InMemCompleter,
}

impl CompleterService {
    pub fn new(completer: InMemCompleter) -> Self {
        Self { completer }
    }

    pub fn completer(&self) -> &InMemCompleter {
        &self.completer
    }

    /// Answers one request. Never fails; errors become error statuses.
    pub async fn handle(&self, request: Request) -> Response {
        let method = request.method;
        let path = request.path.clone();
        match self.route(request).await {
            Ok(response) => {
                tracing::trace!(%method, %path, status = response.status, "completer request served");
                response
            }
            Err(e) => {
                let status = e.status();
                tracing::debug!(%method, %path, status, error = %e, "completer request refused");
                Response::text(status, e.to_string())
            }
        }
    }

    async fn route(&self, request: Request) -> Result<Response> {
        let path = request.path.clone();
        let Some(route) = Route::parse(&path) else {
            return Err(ServiceError::NotFound(format!("no route for {}", path)));
        };

        match route {
            Route::CreateFlow => {
                expect_method(&request, HttpMethod::Post)?;
                let function_id = required_query(&request, "functionId")?.to_string();
                let flow = self.completer.create_flow(&function_id).await?;
                Ok(Response::new(200).with_header(names::FLOW_ID, flow.as_str()))
            }
            Route::Graph { flow, op } => {
                expect_method(&request, HttpMethod::Post)?;
                self.require_flow(&flow)?;
                self.graph_op(&flow, op, request).await
            }
            Route::Await { flow, stage } => {
                expect_method(&request, HttpMethod::Get)?;
                self.require_stage(&flow, &stage)?;
                let timeout = match request.query_param("timeoutMs") {
                    Some(ms) => Some(Duration::from_millis(parse_number(ms, "timeoutMs")?)),
                    None => None,
                };
                let result = self.completer.await_result(&flow, &stage, timeout).await?;
                Ok(Response::new(200).with_part(result.to_part()))
            }
            Route::Stage { flow, stage, op } => {
                expect_method(&request, HttpMethod::Post)?;
                self.require_stage(&flow, &stage)?;
                self.stage_op(&flow, &stage, op, request).await
            }
        }
    }

    async fn graph_op(&self, flow: &FlowId, op: &str, request: Request) -> Result<Response> {
        let c = &self.completer;
        let stage = match op {
            "commit" => {
                c.commit(flow).await?;
                return Ok(Response::new(200));
            }
            "terminationHook" => {
                let (location, part) = split(request);
                c.add_termination_hook(flow, Datum::from_part(&part)?, location).await?;
                return Ok(Response::new(200));
            }
            "externalCompletion" => {
                let location = location_of(&request);
                c.external_completion(flow, location).await?.completion_id
            }
            "supply" => {
                let (location, part) = split(request);
                let spec = StageSpec::new(Combinator::Supply, vec![], Datum::from_part(&part)?, location);
                c.add_stage(flow, spec).await?
            }
            "completedValue" => {
                let (location, part) = split(request);
                c.completed_value(flow, FlowResult::from_part(&part)?, location).await?
            }
            "delay" => {
                let ms = parse_number(required_query(&request, "delayMs")?, "delayMs")?;
                c.delay(flow, Duration::from_millis(ms), location_of(&request)).await?
            }
            "allOf" | "anyOf" => {
                let cids: Vec<CompletionId> = required_query(&request, "cids")?
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(CompletionId::from)
                    .collect();
                for cid in &cids {
                    self.require_stage(flow, cid)?;
                }
                let location = location_of(&request);
                if op == "allOf" { c.all_of(flow, &cids, location).await? } else { c.any_of(flow, &cids, location).await? }
            }
            "invokeFunction" => {
                let function_id = required_query(&request, "functionId")?.to_string();
                let (location, part) = split(request);
                let Datum::HttpRequest { method, headers, body } = Datum::from_part(&part)? else {
                    return Err(ServiceError::BadRequest("invokeFunction body must be an httpreq datum".into()));
                };
                c.invoke_function(flow, &function_id, method, headers, body, location).await?
            }
            other => return Err(ServiceError::NotFound(format!("unknown graph operation {}", other))),
        };
        Ok(stage_created(&stage))
    }

    async fn stage_op(&self, flow: &FlowId, stage: &CompletionId, op: &str, request: Request) -> Result<Response> {
        if op == "complete" || op == "fail" {
            let datum = Datum::HttpRequest { method: request.method, headers: request.headers, body: request.body };
            self.completer.complete_external(flow, stage, op == "complete", datum)?;
            return Ok(Response::new(200));
        }

        let Some(combinator) = Combinator::from_wire_name(op) else {
            return Err(ServiceError::NotFound(format!("unknown stage operation {}", op)));
        };
        let mut dependencies = vec![stage.clone()];
        if combinator.dependencies() == 2 {
            let other = CompletionId::from(required_query(&request, "other")?);
            self.require_stage(flow, &other)?;
            dependencies.push(other);
        }
        let (location, part) = split(request);
        let spec = StageSpec::new(combinator, dependencies, Datum::from_part(&part)?, location);
        let id = self.completer.add_stage(flow, spec).await?;
        Ok(stage_created(&id))
    }

    fn require_flow(&self, flow: &FlowId) -> Result<()> {
        if self.completer.contains_flow(flow) {
            return Ok(());
        }
        Err(ServiceError::NotFound(format!("graph {} not found", flow)))
    }

    fn require_stage(&self, flow: &FlowId, stage: &CompletionId) -> Result<()> {
        self.require_flow(flow)?;
        if self.completer.contains_stage(flow, stage) {
            return Ok(());
        }
        Err(ServiceError::NotFound(format!("stage {} not found in graph {}", stage, flow)))
    }
}

fn stage_created(id: &CompletionId) -> Response {
    Response::new(200).with_header(names::STAGE_ID, id.as_str())
}

fn location_of(request: &Request) -> CodeLocation {
    CodeLocation::from_header(request.headers.get(names::CODE_LOCATION))
}

/// Splits a request into its code location and the part it carries.
fn split(request: Request) -> (CodeLocation, Part) {
    (location_of(&request), request.into_part())
}

fn expect_method(request: &Request, method: HttpMethod) -> Result<()> {
    if request.method == method {
        return Ok(());
    }
    Err(ServiceError::MethodNotAllowed(request.method))
}

fn required_query<'r>(request: &'r Request, key: &str) -> Result<&'r str> {
    request.query_param(key).ok_or_else(|| ServiceError::BadRequest(format!("missing query parameter {}", key)))
}

fn parse_number(raw: &str, key: &str) -> Result<u64> {
    raw.trim().parse().map_err(|_| ServiceError::BadRequest(format!("{} must be a number, got {:?}", key, raw)))
}
