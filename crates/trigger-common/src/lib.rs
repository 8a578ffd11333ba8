// trigger-common: shared infrastructure for the build trigger daemon.
// Logging initialization and HTTP client construction live here so the
// pipeline and listener crates handle these concerns the same way.

pub mod http_client;
pub mod logging;

pub use http_client::HttpClientFactory;
pub use logging::{LogSettings, LogWriterGuard};
