//! Extraction core for survey-proxy.
//!
//! An [`Orchestrator`] turns one inbound request into a lazy stream of
//! normalized entities:
//!
//! - [`governor`] keeps the proxy within the upstream rate limits,
//! - [`paginator`] walks one endpoint page by page,
//! - [`normalizer`] adds `_id` and `_updated`,
//! - [`assembler`] frames the stream as a JSON array.

pub mod accounts;
pub mod args;
pub mod assembler;
pub mod blacklist;
pub mod entity;
pub mod governor;
pub mod normalizer;
pub mod orchestrator;
pub mod paginator;
pub mod upstream;

pub use accounts::{Account, AccountRegistry};
pub use args::{ApiArgs, ServiceArgs, split_query};
pub use blacklist::Blacklist;
pub use entity::Entity;
pub use governor::{Governor, GovernorSignal, GovernorState, RejectionState};
pub use normalizer::sesamify;
pub use orchestrator::{COMPOSITE_PATH, ExtractRequest, Orchestrator};
pub use paginator::Paginator;
pub use upstream::{UpstreamClient, UpstreamSession};
