// Handles Harbormaster build requests: push the staging ref to a branch
// CircleCI watches, schedule the build, and tell the author where it runs.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;
use trigger_pipeline::{Command, MessageParser, ParseRejected, RawMessage};

use super::{diff_branch, Services, STAGING_BRANCH_PREFIX};
use crate::repo::{circle_project, clone_dir};

/// Shape of a Harbormaster webhook message. Only the querystring
/// parameter group carries anything we use.
#[derive(Debug, Deserialize)]
struct BuildRequestEnvelope {
    #[serde(rename = "allParamsJson", default)]
    all_params: HashMap<String, HashMap<String, String>>,
}

impl BuildRequestEnvelope {
    fn querystring(&self) -> Option<&HashMap<String, String>> {
        self.all_params.get("querystring")
    }

    fn looks_valid(&self) -> bool {
        self.querystring()
            .map(|qs| !qs.get("phid").map(String::as_str).unwrap_or("").is_empty())
            .unwrap_or(false)
    }
}

pub struct BuildRequestParser {
    services: Services,
}

impl BuildRequestParser {
    pub fn new(services: Services) -> Self {
        Self { services }
    }
}

impl MessageParser for BuildRequestParser {
    fn name(&self) -> &'static str {
        "build-request"
    }

    fn parse(&self, message: &RawMessage) -> Result<Box<dyn Command>, ParseRejected> {
        let envelope: BuildRequestEnvelope =
            serde_json::from_str(&message.body).map_err(|err| ParseRejected {
                parser: self.name(),
                reason: format!("not a JSON build request: {err}"),
            })?;
        if !envelope.looks_valid() {
            return Err(ParseRejected {
                parser: self.name(),
                reason: "querystring carries no build target PHID".to_string(),
            });
        }
        Ok(Box::new(BuildRequestCommand {
            envelope,
            services: self.services.clone(),
            message: message.clone(),
        }))
    }
}

pub struct BuildRequestCommand {
    envelope: BuildRequestEnvelope,
    services: Services,
    message: RawMessage,
}

impl BuildRequestCommand {
    fn param(&self, key: &str) -> &str {
        self.envelope
            .querystring()
            .and_then(|qs| qs.get(key))
            .map(String::as_str)
            .unwrap_or("")
    }

    fn param_i64(&self, key: &str) -> i64 {
        self.param(key).parse().unwrap_or(0)
    }
}

#[async_trait]
impl Command for BuildRequestCommand {
    fn kind(&self) -> &'static str {
        "build-request"
    }

    fn source_message(&self) -> &RawMessage {
        &self.message
    }

    async fn execute(&self, _cancel: &CancellationToken) -> Result<()> {
        let staging_uri = self.param("staging_uri");
        let repo_name = clone_dir(staging_uri).context("cannot locate repository for request")?;
        let project = circle_project(staging_uri)
            .context("cannot derive CircleCI project for request")?;

        self.services
            .workspace
            .ensure_clone(staging_uri)
            .await
            .with_context(|| format!("cannot set up repository {staging_uri}"))?;
        self.services
            .workspace
            .fetch_all(&repo_name)
            .await
            .context("cannot update repository to latest version")?;

        let diff = self.param_i64("diff");
        let revision = self.param_i64("revision");
        let staging_ref = self.param("staging_ref");
        let refspec = format!("{staging_ref}:refs/heads/{}", diff_branch(diff));
        self.services
            .workspace
            .force_push(&repo_name, &refspec)
            .await
            .with_context(|| format!("cannot push {refspec} to origin"))?;

        let tree = format!("{STAGING_BRANCH_PREFIX}{}", self.param("callsign"));
        let params = self
            .envelope
            .querystring()
            .cloned()
            .unwrap_or_default();
        let build_url = self
            .services
            .circle
            .schedule_build(staging_ref, &project, &tree, &params)
            .await
            .with_context(|| format!("cannot schedule build for {staging_ref}"))?;
        tracing::info!(diff, revision, %build_url, "Scheduled CircleCI build");

        // The build is already scheduled; a lost comment is not worth a
        // redelivery of the whole message.
        let comment = format!("Your revision is building in CircleCI. Build URL: {build_url}");
        if let Err(err) = self
            .services
            .conduit
            .create_comment(revision, &comment)
            .await
        {
            tracing::warn!(revision, "Unable to comment on revision, moving on: {err:#}");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_body(phid: &str) -> String {
        format!(
            r#"{{"allParamsJson": {{"querystring": {{
                "phid": "{phid}",
                "diff": "4567",
                "revision": "890",
                "callsign": "AREPO",
                "staging_uri": "git@github.com:signalfx/arepo.git",
                "staging_ref": "refs/tags/phabricator/diff/4567"
            }}}}}}"#
        )
    }

    fn message(body: String) -> RawMessage {
        RawMessage::new("m-1", body, "rh-1")
    }

    #[test]
    fn valid_requests_parse() {
        let envelope: BuildRequestEnvelope =
            serde_json::from_str(&request_body("PHID-HMBT-1")).unwrap();
        assert!(envelope.looks_valid());
    }

    #[test]
    fn empty_phid_is_rejected() {
        let envelope: BuildRequestEnvelope = serde_json::from_str(&request_body("")).unwrap();
        assert!(!envelope.looks_valid());
    }

    #[test]
    fn missing_querystring_is_rejected() {
        let envelope: BuildRequestEnvelope =
            serde_json::from_str(r#"{"allParamsJson": {}}"#).unwrap();
        assert!(!envelope.looks_valid());

        let envelope: BuildRequestEnvelope = serde_json::from_str("{}").unwrap();
        assert!(!envelope.looks_valid());
    }

    #[test]
    fn numeric_params_default_to_zero() {
        let envelope: BuildRequestEnvelope = serde_json::from_str(
            r#"{"allParamsJson": {"querystring": {"phid": "PHID-HMBT-1", "diff": "junk"}}}"#,
        )
        .unwrap();
        let command = BuildRequestCommand {
            envelope,
            services: test_services(),
            message: message("{}".into()),
        };
        assert_eq!(command.param_i64("diff"), 0);
        assert_eq!(command.param_i64("revision"), 0);
    }

    fn test_services() -> Services {
        use crate::clients::{CircleClient, ConduitClient};
        use crate::repo::GitWorkspace;
        use std::sync::Arc;

        Services {
            conduit: Arc::new(ConduitClient::new(
                "api-1234".into(),
                url::Url::parse("http://phabricator.corp.example.com").unwrap(),
                reqwest::Client::new(),
            )),
            circle: Arc::new(CircleClient::new("circle-1234".into(), reqwest::Client::new())),
            workspace: Arc::new(GitWorkspace::new().unwrap()),
        }
    }

    #[test]
    fn parser_rejects_garbage_bodies() {
        let parser = BuildRequestParser::new(test_services());
        let err = parser.parse(&message("not json".into())).err().unwrap();
        assert_eq!(err.parser, "build-request");
    }

    #[test]
    fn parser_accepts_a_real_request() {
        let parser = BuildRequestParser::new(test_services());
        let command = parser
            .parse(&message(request_body("PHID-HMBT-1")))
            .expect("should parse");
        assert_eq!(command.kind(), "build-request");
        assert_eq!(command.source_message().id, "m-1");
    }
}
