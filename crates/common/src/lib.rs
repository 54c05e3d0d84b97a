//! Common utilities and shared types for survey-proxy.
//!
//! This crate provides the foundational components used by the other crates:
//!
//! - **Configuration**: Layered settings via [`Config`]
//! - **Error handling**: Unified error types via [`AppError`] and [`AppResult`]
//!
//! # Example
//!
//! ```no_run
//! use survey_proxy_common::{AppResult, Config};
//!
//! fn example() -> AppResult<()> {
//!     let config = Config::load()?;
//!     println!("Upstream: {}", config.upstream.base_url);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;

pub use config::Config;
pub use error::{AppError, AppResult};
