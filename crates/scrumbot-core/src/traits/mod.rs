//! Collaborator seams the scheduler is written against.

pub mod notify;
pub mod store;

pub use notify::NotificationSink;
pub use store::JobStore;
