pub mod config;
pub mod run;

pub mod error {
    pub type Error = anyhow::Error;
    pub type Result<T, E = Error> = std::result::Result<T, E>;
}

pub use error::{Error, Result};
pub use run::{build_state, main_router, run, run_graceful_with_state, run_with_state};
