// HTTP clients for the external services the commands talk to.

pub mod circle;
pub mod conduit;

pub use circle::{CircleClient, TestResult};
pub use conduit::{BuildStatus, ConduitClient, UnitResult, UnitStatus};
