pub mod config;
pub mod context;
pub mod error;
pub mod launcher;
pub mod naming;
pub mod output;
pub mod pipeline;
pub mod poller;
pub mod report;
pub mod service;
pub mod stage;
pub mod stages;
pub mod tickets;
pub mod upload;
pub mod vcs;
pub mod veracode;

pub use context::{ExecutionContext, PersistedContext};
pub use error::{ErrorKind, SyncError};
