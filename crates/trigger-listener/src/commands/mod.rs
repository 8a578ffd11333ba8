// Message parsers and the commands they produce. Each module pairs one
// queue message shape with the work it triggers.

pub mod build_request;
pub mod build_result;

pub use build_request::BuildRequestParser;
pub use build_result::BuildResultParser;

use crate::clients::{CircleClient, ConduitClient};
use crate::repo::GitWorkspace;
use std::sync::Arc;

/// Shared handles to the external services commands act on. Cloned into
/// each parser so every parsed command carries what it needs to run.
#[derive(Clone)]
pub struct Services {
    pub conduit: Arc<ConduitClient>,
    pub circle: Arc<CircleClient>,
    pub workspace: Arc<GitWorkspace>,
}

/// Branch prefix marking CircleCI builds this daemon scheduled.
pub const STAGING_BRANCH_PREFIX: &str = "phabricator_test_";

/// Name of the per-diff branch pushed for CircleCI to build.
pub fn diff_branch(diff: i64) -> String {
    format!("phabricator_diff_branch_{diff}")
}
