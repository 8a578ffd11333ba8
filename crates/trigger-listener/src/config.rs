// Command line and environment configuration for the daemon.
// Every flag falls back to an environment variable so deployments can
// configure the process either way; validation happens before the
// pipeline starts so misconfiguration is an exit-code-1 error, never a
// half-started daemon.

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use trigger_common::logging::LogSettings;
use url::Url;

/// Raw command line settings, prior to validation.
#[derive(Debug, Parser)]
#[command(
    name = "buildtrigger",
    about = "Bridges Phabricator reviews and CircleCI builds through an SQS queue",
    version
)]
pub struct Settings {
    /// AWS region the queue lives in.
    #[arg(long, env = "SQS_REGION")]
    pub region: Option<String>,

    /// SQS queue URL to long-poll.
    #[arg(long, env = "SQS_QUEUE")]
    pub queue: Option<String>,

    /// Phabricator API token.
    #[arg(long, env = "PHAB_API_TOKEN")]
    pub apitoken: Option<String>,

    /// Token to use for CircleCI.
    #[arg(long, env = "CIRCLECI_TOKEN")]
    pub circletoken: Option<String>,

    /// Phabricator URL.
    #[arg(long, default_value = "http://phabricator.corp.signalfx.com")]
    pub phaburl: String,

    /// If non-zero, overrides how long received messages stay hidden from
    /// other queue consumers, in seconds. Zero uses the queue default.
    #[arg(long, env = "QUEUE_VISIBILITY", default_value_t = 0)]
    pub visibility: u32,

    /// Long-poll wait per receive call, in seconds.
    #[arg(long, default_value_t = 20)]
    pub wait: u32,

    /// Enable verbose logging.
    #[arg(long, env = "BUILD_VERBOSE")]
    pub verbose: bool,

    /// File to put log output into ("-" means stderr).
    #[arg(long, env = "BUILD_VERBOSE_FILE")]
    pub verbosefile: Option<PathBuf>,
}

/// A configuration value that is missing or unusable.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("please specify a region")]
    MissingRegion,
    #[error("please specify a queue URL")]
    MissingQueue,
    #[error("please specify an API token")]
    MissingApiToken,
    #[error("please specify a CircleCI token")]
    MissingCircleToken,
    #[error("cannot parse Phabricator URL")]
    InvalidPhabUrl(#[source] url::ParseError),
}

/// Validated daemon configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub region: String,
    pub queue_url: String,
    pub phab_api_token: String,
    pub circle_token: String,
    pub phab_url: Url,
    /// `None` means "use the queue default".
    pub visibility_timeout: Option<Duration>,
    pub wait_time: Duration,
    pub log: LogSettings,
}

impl Settings {
    /// Validate the raw settings into a usable configuration.
    pub fn into_config(self) -> Result<Config, ConfigError> {
        let region = self.region.filter(|v| !v.is_empty());
        let queue = self.queue.filter(|v| !v.is_empty());
        let apitoken = self.apitoken.filter(|v| !v.is_empty());
        let circletoken = self.circletoken.filter(|v| !v.is_empty());

        let phab_url = Url::parse(&self.phaburl).map_err(ConfigError::InvalidPhabUrl)?;

        Ok(Config {
            region: region.ok_or(ConfigError::MissingRegion)?,
            queue_url: queue.ok_or(ConfigError::MissingQueue)?,
            phab_api_token: apitoken.ok_or(ConfigError::MissingApiToken)?,
            circle_token: circletoken.ok_or(ConfigError::MissingCircleToken)?,
            phab_url,
            visibility_timeout: match self.visibility {
                0 => None,
                seconds => Some(Duration::from_secs(u64::from(seconds))),
            },
            wait_time: Duration::from_secs(u64::from(self.wait)),
            log: LogSettings {
                verbose: self.verbose,
                log_file: self.verbosefile,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> Settings {
        Settings {
            region: Some("us-east-1".into()),
            queue: Some("https://sqs.us-east-1.amazonaws.com/1/builds".into()),
            apitoken: Some("api-1234".into()),
            circletoken: Some("circle-1234".into()),
            phaburl: "http://phabricator.corp.example.com".into(),
            visibility: 0,
            wait: 20,
            verbose: false,
            verbosefile: None,
        }
    }

    #[test]
    fn valid_settings_produce_a_config() {
        let config = settings().into_config().expect("valid");
        assert_eq!(config.region, "us-east-1");
        assert_eq!(config.wait_time, Duration::from_secs(20));
        assert_eq!(config.visibility_timeout, None);
        assert_eq!(config.phab_url.host_str(), Some("phabricator.corp.example.com"));
    }

    #[test]
    fn missing_values_are_reported_in_flag_order() {
        let mut s = settings();
        s.region = None;
        assert!(matches!(s.into_config(), Err(ConfigError::MissingRegion)));

        let mut s = settings();
        s.queue = Some(String::new());
        assert!(matches!(s.into_config(), Err(ConfigError::MissingQueue)));

        let mut s = settings();
        s.apitoken = None;
        assert!(matches!(s.into_config(), Err(ConfigError::MissingApiToken)));

        let mut s = settings();
        s.circletoken = None;
        assert!(matches!(s.into_config(), Err(ConfigError::MissingCircleToken)));
    }

    #[test]
    fn nonzero_visibility_becomes_an_override() {
        let mut s = settings();
        s.visibility = 90;
        let config = s.into_config().expect("valid");
        assert_eq!(config.visibility_timeout, Some(Duration::from_secs(90)));
    }

    #[test]
    fn bad_phabricator_url_is_rejected() {
        let mut s = settings();
        s.phaburl = "not a url".into();
        assert!(matches!(s.into_config(), Err(ConfigError::InvalidPhabUrl(_))));
    }
}
