// CircleCI v1 API client: schedule builds and fetch test results.

use anyhow::{bail, Context, Result};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const API_BASE: &str = "https://circleci.com/api/v1";

pub struct CircleClient {
    token: String,
    client: reqwest::Client,
}

/// POST body for scheduling a build of one git revision.
#[derive(Debug, Serialize)]
struct ScheduledBuild<'a> {
    revision: &'a str,
    build_parameters: &'a HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct BuildResponse {
    build_url: String,
}

/// One test case as CircleCI reports it. Fields are frequently absent
/// depending on the test runner, so everything defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct TestResult {
    #[serde(default)]
    pub classname: String,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub result: String,
    #[serde(default)]
    pub run_time: f64,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub source_type: String,
}

#[derive(Debug, Deserialize)]
struct TestsResponse {
    #[serde(default)]
    tests: Vec<TestResult>,
}

impl CircleClient {
    pub fn new(token: String, client: reqwest::Client) -> Self {
        Self { token, client }
    }

    /// Schedule a build of `revision` on the given project branch tree.
    /// Returns the URL of the scheduled build.
    pub async fn schedule_build(
        &self,
        revision: &str,
        project: &str,
        tree: &str,
        build_parameters: &HashMap<String, String>,
    ) -> Result<String> {
        let url = format!(
            "{API_BASE}/project/{project}/tree/{tree}?circle-token={}",
            self.token
        );
        let body = ScheduledBuild {
            revision,
            build_parameters,
        };
        tracing::debug!(project, tree, revision, "Scheduling CircleCI build");

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("cannot POST build for project {project}"))?;
        if response.status() != StatusCode::CREATED {
            tracing::warn!(?build_parameters, "Build was not scheduled");
            bail!(
                "unexpected status {} scheduling build for {project}",
                response.status()
            );
        }

        let scheduled: BuildResponse = response
            .json()
            .await
            .context("build response body does not look like JSON")?;
        Ok(scheduled.build_url)
    }

    /// Fetch the test results recorded for one build.
    pub async fn test_results(
        &self,
        username: &str,
        project: &str,
        build_num: u32,
    ) -> Result<Vec<TestResult>> {
        let url = format!(
            "{API_BASE}/project/{username}/{project}/{build_num}/tests?circle-token={}",
            self.token
        );
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("cannot GET tests for build {build_num}"))?;
        if response.status() != StatusCode::OK {
            bail!(
                "unexpected status {} fetching tests for {username}/{project} build {build_num}",
                response.status()
            );
        }

        let results: TestsResponse = response
            .json()
            .await
            .context("cannot decode test results body")?;
        Ok(results.tests)
    }
}
