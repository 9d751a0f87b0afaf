#[macro_use]
extern crate log;

pub mod config;
pub mod error;
pub mod runtime;
pub mod service;
pub mod state;
pub mod storage;

#[cfg(test)]
mod utils;

pub use config::AppConfig;
pub use error::{AppError, AppResult};
pub use state::AppState;
