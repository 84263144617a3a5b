use serde::Serialize;
use serde_json::{Value, json};
use worldgraph_common::UserId;
use worldgraph_graph::{GraphStore, ImportReport};

use crate::error::ApiError;
use crate::route::{Method, Route};

/// One authenticated request. Authentication happens upstream; `caller` is
/// the user it resolved to.
#[derive(Debug, Clone, Copy)]
pub struct Request<'a> {
    pub method: Method,
    pub path: &'a str,
    pub caller: UserId,
    pub body: &'a [u8],
}

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: u16,
    pub body: Value,
}

impl Response {
    fn ok(body: Value) -> Self {
        Self { status: 200, body }
    }

    fn created(body: Value) -> Self {
        Self { status: 201, body }
    }
}

impl From<ApiError> for Response {
    fn from(err: ApiError) -> Self {
        Self {
            status: err.status(),
            body: err.body(),
        }
    }
}

#[derive(Serialize)]
struct CreatedWorld<'a> {
    world: &'a worldgraph_kernel::World,
    report: &'a ImportReport,
}

pub struct Api {
    store: GraphStore,
}

impl Api {
    pub fn new(store: GraphStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &GraphStore {
        &self.store
    }

    pub fn handle(&self, request: Request<'_>) -> Response {
        let result = Route::parse(request.method, request.path)
            .and_then(|route| self.dispatch(route, request));
        match result {
            Ok(response) => {
                tracing::debug!(method = %request.method, path = request.path, status = response.status, "request handled");
                response
            }
            Err(err) => {
                if err.status() >= 500 {
                    tracing::warn!(method = %request.method, path = request.path, error = %err, "request failed");
                } else {
                    tracing::debug!(method = %request.method, path = request.path, reason = err.reason(), "request rejected");
                }
                err.into()
            }
        }
    }

    fn dispatch(&self, route: Route, request: Request<'_>) -> Result<Response, ApiError> {
        let caller = request.caller;
        let response = match route {
            Route::AddDependency {
                world,
                event,
                cause,
            } => {
                let added = self.store.add_dependency(caller, world, event, cause)?;
                Response::ok(json!({ "event_id": event, "cause_id": cause, "added": added }))
            }
            Route::RemoveDependency {
                world,
                event,
                cause,
            } => {
                let removed = self.store.remove_dependency(caller, world, event, cause)?;
                Response::ok(json!({ "event_id": event, "cause_id": cause, "removed": removed }))
            }
            Route::DependencyGraph { world } => {
                Response::ok(to_value(&self.store.get_dependency_graph(caller, world)?))
            }
            Route::Export { world } => Response::ok(to_value(&self.store.export(caller, world)?)),
            Route::Import => {
                let report = self.store.import_json(caller, request.body)?;
                self.created_world(caller, &report)?
            }
            Route::Duplicate { world } => {
                let report = self.store.duplicate(caller, world)?;
                self.created_world(caller, &report)?
            }
        };
        Ok(response)
    }

    fn created_world(&self, caller: UserId, report: &ImportReport) -> Result<Response, ApiError> {
        let state = self.store.world(caller, report.world_id)?;
        Ok(Response::created(to_value(&CreatedWorld {
            world: state.world(),
            report,
        })))
    }
}

/// Every value handed to this is plain data that serializes infallibly.
fn to_value<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}
