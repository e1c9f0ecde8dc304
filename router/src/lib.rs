//! `apigw-local` serves the api routes declared in an infrastructure template on a local HTTP
//! port and backs each one with a Lambda invocation.
//!
//! Routes come from two places: `Api` event sources on function resources, and the
//! `x-amazon-apigateway-integration` entries of an api resource's description document. Both are
//! collected at startup into a single dispatch table; each request is then translated into a
//! Lambda proxy event and the function's proxy response is written back to the caller.
//!
//! Core modules:
//! - [`template`]: the routable subset of a template (functions, apis, definition sources)
//! - [`definition`]: loading an api's description document from file, object storage or inline
//! - [`integration`]: extracting `(path, verb, function)` from a description document
//! - [`mount`]: turning functions and apis into mounts
//! - [`routes`]: the dispatch table and its atomically swappable handle
//! - [`event`] / [`response`]: proxy event and proxy response translation
//! - [`server`]: axum server wiring

pub mod config;
pub mod definition;
pub mod error;
pub mod event;
pub mod integration;
pub mod lambda;
pub mod location;
pub mod mount;
pub mod response;
pub mod routes;
pub(crate) mod serde_ext;
pub mod server;
pub mod template;
