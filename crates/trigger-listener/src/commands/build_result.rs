// Handles CircleCI build-complete webhooks: fetch the test results,
// report the verdict to Harbormaster, comment the summary on the
// revision and clean up the temporary branches.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use trigger_pipeline::{Command, MessageParser, ParseRejected, RawMessage};

use super::{diff_branch, Services, STAGING_BRANCH_PREFIX};
use crate::clients::{BuildStatus, TestResult, UnitResult, UnitStatus};
use crate::repo::clone_dir;
use crate::report::{self, BuildSummary, FailingTest, MAX_FAILING_DETAILS};

#[derive(Debug, Deserialize)]
struct BuildResultEnvelope {
    #[serde(default)]
    formparams: FormParams,
}

#[derive(Debug, Default, Deserialize)]
struct FormParams {
    #[serde(default)]
    payload: BuildPayload,
}

/// The slice of CircleCI's webhook payload this command reads.
#[derive(Debug, Default, Deserialize)]
struct BuildPayload {
    #[serde(default)]
    build_url: String,
    #[serde(default)]
    branch: String,
    #[serde(default)]
    outcome: String,
    #[serde(default)]
    build_time_millis: u64,
    #[serde(default)]
    vcs_url: String,
    #[serde(default)]
    reponame: String,
    #[serde(default)]
    username: String,
    #[serde(default)]
    build_num: u32,
    #[serde(default)]
    build_parameters: HashMap<String, String>,
}

impl BuildResultEnvelope {
    fn payload(&self) -> &BuildPayload {
        &self.formparams.payload
    }

    fn looks_valid(&self) -> bool {
        let p = self.payload();
        !p.branch.is_empty()
            && !p.build_url.is_empty()
            && !p.reponame.is_empty()
            && !p.vcs_url.is_empty()
            && !p
                .build_parameters
                .get("phid")
                .map(String::as_str)
                .unwrap_or("")
                .is_empty()
    }
}

pub struct BuildResultParser {
    services: Services,
}

impl BuildResultParser {
    pub fn new(services: Services) -> Self {
        Self { services }
    }
}

impl MessageParser for BuildResultParser {
    fn name(&self) -> &'static str {
        "build-result"
    }

    fn parse(&self, message: &RawMessage) -> Result<Box<dyn Command>, ParseRejected> {
        let envelope: BuildResultEnvelope =
            serde_json::from_str(&message.body).map_err(|err| ParseRejected {
                parser: self.name(),
                reason: format!("not a JSON build result: {err}"),
            })?;
        if !envelope.looks_valid() {
            return Err(ParseRejected {
                parser: self.name(),
                reason: "payload is missing build fields or a PHID".to_string(),
            });
        }
        Ok(Box::new(BuildResultCommand {
            envelope,
            services: self.services.clone(),
            message: message.clone(),
        }))
    }
}

pub struct BuildResultCommand {
    envelope: BuildResultEnvelope,
    services: Services,
    message: RawMessage,
}

impl BuildResultCommand {
    /// Diff and revision ids from the build parameters. `None` when either
    /// is missing, unparseable or zero, which marks a build this daemon
    /// did not schedule.
    fn diff_ids(&self) -> Option<(i64, i64)> {
        let params = &self.envelope.payload().build_parameters;
        let diff: i64 = params.get("diff")?.parse().ok()?;
        let revision: i64 = params.get("revision")?.parse().ok()?;
        if diff == 0 || revision == 0 {
            return None;
        }
        Some((diff, revision))
    }

    fn build_param(&self, key: &str) -> &str {
        self.envelope
            .payload()
            .build_parameters
            .get(key)
            .map(String::as_str)
            .unwrap_or("")
    }

    fn verdict(&self) -> BuildStatus {
        match self.envelope.payload().outcome.as_str() {
            "failed" | "canceled" => BuildStatus::Fail,
            _ => BuildStatus::Pass,
        }
    }

    async fn collect_test_results(&self) -> Result<(BuildSummary, Vec<UnitResult>)> {
        let payload = self.envelope.payload();
        let tests = self
            .services
            .circle
            .test_results(&payload.username, &payload.reponame, payload.build_num)
            .await
            .with_context(|| format!("cannot get build results for {}", payload.build_num))?;

        let mut summary = BuildSummary {
            build_result: payload.outcome.clone(),
            build_time: Duration::from_millis(payload.build_time_millis),
            test_count: tests.len(),
            failing_tests: 0,
            passing_tests: 0,
            skipped_tests: 0,
            build_number: payload.build_num,
            failing_details: Vec::new(),
        };

        let mut units = Vec::with_capacity(tests.len());
        for test in tests {
            let result = match test.result.as_str() {
                "success" => {
                    summary.passing_tests += 1;
                    UnitStatus::Pass
                }
                "skipped" => {
                    summary.skipped_tests += 1;
                    UnitStatus::Skip
                }
                "failure" | "error" => {
                    summary.failing_tests += 1;
                    if summary.failing_details.len() < MAX_FAILING_DETAILS {
                        summary.failing_details.push(failing_test(&test));
                    }
                    UnitStatus::Fail
                }
                _ => UnitStatus::Unsound,
            };
            units.push(UnitResult {
                name: test.name,
                result,
                namespace: test.classname,
                engine: test.source,
                duration: Some(test.run_time),
                path: test.file.unwrap_or_default(),
            });
        }
        Ok((summary, units))
    }

    /// Remove the per-diff branch and the staging ref now that the build
    /// is reported. Failures are logged; the verdict already landed.
    async fn cleanup_refs(&self, diff: i64) {
        let staging_uri = self.build_param("staging_uri");
        let repo_name = match clone_dir(staging_uri) {
            Ok(name) => name,
            Err(err) => {
                tracing::warn!(%staging_uri, "Cannot locate repository for cleanup: {err:#}");
                return;
            }
        };
        if let Err(err) = self.services.workspace.ensure_clone(staging_uri).await {
            tracing::warn!("Cannot set up repository for cleanup: {err:#}");
            return;
        }

        let branch = diff_branch(diff);
        if let Err(err) = self
            .services
            .workspace
            .delete_remote_ref(&repo_name, &branch)
            .await
        {
            tracing::warn!(%branch, "Cannot remove diff branch: {err:#}");
        }
        let staging_ref = self.build_param("staging_ref");
        if !staging_ref.is_empty() {
            if let Err(err) = self
                .services
                .workspace
                .delete_remote_ref(&repo_name, staging_ref)
                .await
            {
                tracing::warn!(staging_ref, "Cannot remove staging ref: {err:#}");
            }
        }
    }
}

fn failing_test(test: &TestResult) -> FailingTest {
    // CircleCI occasionally reports nonsense run times; a bad duration must
    // not take down the reporting of an otherwise good build.
    let duration = Duration::try_from_secs_f64(test.run_time).unwrap_or_default();
    FailingTest {
        classname: test.classname.clone(),
        test_name: test.name.clone(),
        duration,
        message: report::truncate_message(test.message.as_deref().unwrap_or("")),
    }
}

#[async_trait]
impl Command for BuildResultCommand {
    fn kind(&self) -> &'static str {
        "build-result"
    }

    fn source_message(&self) -> &RawMessage {
        &self.message
    }

    async fn execute(&self, _cancel: &CancellationToken) -> Result<()> {
        let payload = self.envelope.payload();
        tracing::info!(build_url = %payload.build_url, "Reporting CircleCI build");

        if !payload.branch.starts_with(STAGING_BRANCH_PREFIX) {
            tracing::info!(branch = %payload.branch, "Build is not a review attempt, skipping");
            return Ok(());
        }
        let Some((diff, revision)) = self.diff_ids() else {
            tracing::warn!(
                build_parameters = ?payload.build_parameters,
                "Cannot read diff and revision ids from build parameters, skipping"
            );
            return Ok(());
        };

        let (summary, units) = self
            .collect_test_results()
            .await
            .context("cannot collect test results")?;
        let status = self.verdict();

        self.services
            .conduit
            .send_build_status(self.build_param("phid"), status, &units)
            .await
            .with_context(|| format!("cannot report build status for revision {revision}"))?;
        self.services
            .conduit
            .create_comment(revision, &report::render(&summary))
            .await
            .with_context(|| format!("cannot comment on revision {revision}"))?;

        self.cleanup_refs(diff).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn result_body(branch: &str, diff: &str, revision: &str) -> String {
        format!(
            r#"{{"formparams": {{"payload": {{
                "build_url": "https://circleci.com/gh/signalfx/arepo/254",
                "branch": "{branch}",
                "outcome": "failed",
                "build_time_millis": 456645,
                "vcs_url": "https://github.com/signalfx/arepo",
                "reponame": "arepo",
                "username": "signalfx",
                "build_num": 254,
                "build_parameters": {{
                    "phid": "PHID-HMBT-1",
                    "diff": "{diff}",
                    "revision": "{revision}",
                    "staging_uri": "git@github.com:signalfx/arepo.git",
                    "staging_ref": "refs/tags/phabricator/diff/4567"
                }}
            }}}}}}"#
        )
    }

    fn services() -> Services {
        use crate::clients::{CircleClient, ConduitClient};
        use crate::repo::GitWorkspace;

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

    fn command(body: String) -> BuildResultCommand {
        BuildResultCommand {
            envelope: serde_json::from_str(&body).unwrap(),
            services: services(),
            message: RawMessage::new("m-1", body, "rh-1"),
        }
    }

    #[test]
    fn valid_results_parse() {
        let parser = BuildResultParser::new(services());
        let parsed = parser
            .parse(&RawMessage::new(
                "m-1",
                result_body("phabricator_test_AREPO", "4567", "890"),
                "rh-1",
            ))
            .expect("should parse");
        assert_eq!(parsed.kind(), "build-result");
    }

    #[test]
    fn payloads_missing_fields_are_rejected() {
        let parser = BuildResultParser::new(services());
        let body = r#"{"formparams": {"payload": {"branch": "main"}}}"#;
        assert!(parser
            .parse(&RawMessage::new("m-1", body, "rh-1"))
            .is_err());
    }

    #[test]
    fn diff_ids_require_both_nonzero_numbers() {
        let c = command(result_body("phabricator_test_AREPO", "4567", "890"));
        assert_eq!(c.diff_ids(), Some((4567, 890)));

        let c = command(result_body("phabricator_test_AREPO", "0", "890"));
        assert_eq!(c.diff_ids(), None);

        let c = command(result_body("phabricator_test_AREPO", "junk", "890"));
        assert_eq!(c.diff_ids(), None);
    }

    #[test]
    fn failed_and_canceled_outcomes_fail_the_build() {
        let c = command(result_body("phabricator_test_AREPO", "4567", "890"));
        assert_eq!(c.verdict(), BuildStatus::Fail);

        let mut body: serde_json::Value =
            serde_json::from_str(&result_body("phabricator_test_AREPO", "4567", "890")).unwrap();
        body["formparams"]["payload"]["outcome"] = "success".into();
        let c = command(body.to_string());
        assert_eq!(c.verdict(), BuildStatus::Pass);

        body["formparams"]["payload"]["outcome"] = "canceled".into();
        let c = command(body.to_string());
        assert_eq!(c.verdict(), BuildStatus::Fail);
    }

    #[test]
    fn nonsense_run_times_become_a_zero_duration() {
        let test: TestResult = serde_json::from_str(
            r#"{"classname": "a.B", "name": "testC", "result": "failure",
                "run_time": -1.0, "message": "boom"}"#,
        )
        .unwrap();
        let failing = failing_test(&test);
        assert_eq!(failing.duration, Duration::ZERO);
        assert_eq!(failing.message, "boom");

        let test: TestResult =
            serde_json::from_str(r#"{"name": "testD", "result": "failure", "run_time": 1.5}"#)
                .unwrap();
        assert_eq!(failing_test(&test).duration, Duration::from_secs_f64(1.5));
    }

    #[tokio::test]
    async fn foreign_branches_are_skipped_without_side_effects() {
        let c = command(result_body("main", "4567", "890"));
        let cancel = CancellationToken::new();
        c.execute(&cancel).await.expect("skip is a success");
    }

    #[tokio::test]
    async fn missing_diff_ids_skip_the_build() {
        let c = command(result_body("phabricator_test_AREPO", "0", "0"));
        let cancel = CancellationToken::new();
        c.execute(&cancel).await.expect("skip is a success");
    }
}
