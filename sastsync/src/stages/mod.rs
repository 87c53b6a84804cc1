mod launch;
mod results;
mod tickets;

pub use crate::stage::Stage;
pub use launch::LaunchStage;
pub use results::ResultsStage;
pub use tickets::{TicketSyncReport, TicketSyncStage};

use std::path::PathBuf;
use std::sync::Arc;

use crate::config::BranchConfig;
use crate::naming::NamingInputs;
use crate::service::ScanService;

/// What every scan stage works from: the remote service, the resolved
/// configuration segment and the local inputs for naming and uploads.
#[derive(Clone)]
pub struct ScanTarget {
    pub service: Arc<dyn ScanService>,
    pub config: BranchConfig,
    pub inputs: NamingInputs,
    pub work_dir: PathBuf,
}
