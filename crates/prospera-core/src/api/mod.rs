//! Backend API access with transparent request authorization.

pub mod client;
pub mod error;
pub mod request;

pub use client::ApiClient;
pub use error::ApiError;
pub use request::ApiRequest;
