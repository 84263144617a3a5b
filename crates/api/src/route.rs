use std::fmt;
use std::str::FromStr;
use worldgraph_common::{EventId, WorldId};

use crate::error::ApiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Delete,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Delete => "DELETE",
        })
    }
}

impl FromStr for Method {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "DELETE" => Ok(Method::Delete),
            _ => Err(ApiError::NoRoute {
                method: s.to_string(),
                path: String::new(),
            }),
        }
    }
}

/// Every endpoint of the graph API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// `POST /worlds/{world_id}/events/{event_id}/dependencies/{cause_id}`
    AddDependency {
        world: WorldId,
        event: EventId,
        cause: EventId,
    },
    /// `DELETE /worlds/{world_id}/events/{event_id}/dependencies/{cause_id}`
    RemoveDependency {
        world: WorldId,
        event: EventId,
        cause: EventId,
    },
    /// `GET /worlds/{world_id}/events/dependency-graph`
    DependencyGraph { world: WorldId },
    /// `GET /worlds/{world_id}/export`
    Export { world: WorldId },
    /// `POST /worlds/import`
    Import,
    /// `POST /worlds/{world_id}/duplicate`
    Duplicate { world: WorldId },
}

impl Route {
    pub fn parse(method: Method, path: &str) -> Result<Route, ApiError> {
        let path = path.split('?').next().unwrap_or_default();
        let segments: Vec<&str> = path.trim_matches('/').split('/').collect();

        let route = match (method, segments.as_slice()) {
            (Method::Post, ["worlds", "import"]) => Route::Import,
            (Method::Get, ["worlds", world, "events", "dependency-graph"]) => {
                Route::DependencyGraph {
                    world: id(world)?,
                }
            }
            (Method::Get, ["worlds", world, "export"]) => Route::Export { world: id(world)? },
            (Method::Post, ["worlds", world, "duplicate"]) => Route::Duplicate { world: id(world)? },
            (Method::Post, ["worlds", world, "events", event, "dependencies", cause]) => {
                Route::AddDependency {
                    world: id(world)?,
                    event: id(event)?,
                    cause: id(cause)?,
                }
            }
            (Method::Delete, ["worlds", world, "events", event, "dependencies", cause]) => {
                Route::RemoveDependency {
                    world: id(world)?,
                    event: id(event)?,
                    cause: id(cause)?,
                }
            }
            _ => {
                return Err(ApiError::NoRoute {
                    method: method.to_string(),
                    path: path.to_string(),
                });
            }
        };
        Ok(route)
    }
}

/// A path segment that does not parse cannot name anything that exists.
fn id<T: FromStr>(segment: &str) -> Result<T, ApiError> {
    segment
        .parse()
        .map_err(|_| ApiError::MalformedId(segment.to_string()))
}
