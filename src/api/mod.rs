//! HTTP surface of the service.

pub mod error;
pub mod routes;
pub mod server;

#[cfg(test)]
pub(crate) mod test_support;

pub use error::{ApiError, ApiResult};
pub use server::{ApiServer, AppState};
