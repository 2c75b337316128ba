//! Common utilities and types shared across the application.

pub mod error;
pub mod http;
pub mod reconnect;
pub mod types;

pub use error::AppError;
