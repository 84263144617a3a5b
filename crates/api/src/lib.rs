//! HTTP contract for the world event graph, independent of any server framework.
//!
//! A host framework turns its request into a [`Request`], calls
//! [`Api::handle`], and writes the returned [`Response`] status and JSON body.

pub mod error;
pub mod handler;
pub mod route;

pub use error::ApiError;
pub use handler::{Api, Request, Response};
pub use route::{Method, Route};
