//! # Scrumbot Core
//!
//! Shared vocabulary for the scrum scheduler: job and run records, the
//! persistence and notification traits the scheduler is written against,
//! configuration loading and the crate-wide error type.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;
pub mod zone;

pub use config::ScrumbotConfig;
pub use error::{Result, ScrumError};
pub use traits::{JobStore, NotificationSink};
pub use types::{ChannelRef, JobConfig, MemberResponse, Payload, RunRecord};
