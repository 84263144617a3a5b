use serde_json::json;
use worldgraph_graph::GraphError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("no route for {method} {path}")]
    NoRoute { method: String, path: String },
    #[error("malformed id {0:?}")]
    MalformedId(String),
    #[error(transparent)]
    Graph(#[from] GraphError),
}

impl ApiError {
    pub fn status(&self) -> u16 {
        match self {
            // Unparsable ids are reported like unknown ones.
            ApiError::NoRoute { .. } | ApiError::MalformedId(_) => 404,
            ApiError::Graph(err) => err.status(),
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            ApiError::NoRoute { .. } => "no_route",
            ApiError::MalformedId(_) => "not_found",
            ApiError::Graph(err) => err.reason(),
        }
    }

    /// `{"error": <reason>, "message": <text>}`. Server faults get a generic
    /// message so storage details do not leak.
    pub fn body(&self) -> serde_json::Value {
        let message = if self.status() >= 500 {
            "internal error".to_string()
        } else {
            self.to_string()
        };
        json!({ "error": self.reason(), "message": message })
    }
}
