pub mod auth;
pub mod error;
pub mod rest_api;
pub mod state;
pub mod validate;

pub use rest_api::router;
