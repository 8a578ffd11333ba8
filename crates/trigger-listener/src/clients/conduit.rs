// Phabricator Conduit API client. All endpoints are form-POSTs
// authenticated by the api.token parameter.

use anyhow::{bail, Context, Result};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use url::Url;

/// Overall build verdict reported to Harbormaster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStatus {
    Pass,
    Fail,
}

impl BuildStatus {
    fn as_str(self) -> &'static str {
        match self {
            BuildStatus::Pass => "pass",
            BuildStatus::Fail => "fail",
        }
    }
}

/// Per-test verdict in a Harbormaster unit report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitStatus {
    Pass,
    Fail,
    Skip,
    Unsound,
}

/// One unit test entry for harbormaster.sendmessage.
#[derive(Debug, Clone, Serialize)]
pub struct UnitResult {
    pub name: String,
    pub result: UnitStatus,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub engine: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub path: String,
}

#[derive(Debug, Deserialize)]
struct CreateCommentResult {
    #[serde(default)]
    uri: String,
}

pub struct ConduitClient {
    api_token: String,
    base_url: Url,
    client: reqwest::Client,
}

impl ConduitClient {
    pub fn new(api_token: String, base_url: Url, client: reqwest::Client) -> Self {
        Self {
            api_token,
            base_url,
            client,
        }
    }

    /// Report a build verdict (plus unit results) to a Harbormaster build
    /// target.
    pub async fn send_build_status(
        &self,
        build_target_phid: &str,
        status: BuildStatus,
        units: &[UnitResult],
    ) -> Result<()> {
        let url = self.endpoint("/api/harbormaster.sendmessage")?;
        let mut form: Vec<(&str, String)> = vec![
            ("api.token", self.api_token.clone()),
            ("buildTargetPHID", build_target_phid.to_string()),
            ("type", status.as_str().to_string()),
        ];
        if !units.is_empty() {
            let encoded = serde_json::to_string(units).context("cannot encode unit results")?;
            form.push(("unit", encoded));
        }

        let response = self
            .client
            .post(url.clone())
            .form(&form)
            .send()
            .await
            .context("cannot POST harbormaster message")?;
        tracing::debug!(phid = build_target_phid, status = status.as_str(), "Posted build status");
        if response.status() != StatusCode::OK {
            bail!(
                "unexpected status {} posting build status to {url}",
                response.status()
            );
        }
        Ok(())
    }

    /// Leave a comment on a Differential revision.
    pub async fn create_comment(&self, revision_id: i64, message: &str) -> Result<()> {
        let url = self.endpoint("/api/differential.createcomment")?;
        let form: Vec<(&str, String)> = vec![
            ("api.token", self.api_token.clone()),
            ("revision_id", revision_id.to_string()),
            ("message", message.to_string()),
        ];

        let response = self
            .client
            .post(url.clone())
            .form(&form)
            .send()
            .await
            .context("cannot POST comment")?;
        if response.status() != StatusCode::OK {
            bail!(
                "unexpected status {} posting comment to {url}",
                response.status()
            );
        }
        let result: CreateCommentResult = response
            .json()
            .await
            .context("cannot decode comment response body")?;
        tracing::debug!(revision_id, uri = %result.uri, "Posted comment");
        Ok(())
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .with_context(|| format!("cannot build Conduit URL for {path}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_results_omit_empty_optional_fields() {
        let unit = UnitResult {
            name: "testFoo".into(),
            result: UnitStatus::Pass,
            namespace: String::new(),
            engine: String::new(),
            duration: None,
            path: String::new(),
        };
        let json = serde_json::to_value(&unit).unwrap();
        assert_eq!(json["name"], "testFoo");
        assert_eq!(json["result"], "pass");
        assert!(json.get("namespace").is_none());
        assert!(json.get("engine").is_none());
        assert!(json.get("duration").is_none());
        assert!(json.get("path").is_none());
    }

    #[test]
    fn unit_results_keep_populated_fields() {
        let unit = UnitResult {
            name: "testBar".into(),
            result: UnitStatus::Unsound,
            namespace: "com.example".into(),
            engine: "junit".into(),
            duration: Some(1.25),
            path: "src/bar.java".into(),
        };
        let json = serde_json::to_value(&unit).unwrap();
        assert_eq!(json["result"], "unsound");
        assert_eq!(json["namespace"], "com.example");
        assert_eq!(json["duration"], 1.25);
    }

    #[test]
    fn endpoints_join_onto_the_base_url() {
        let client = ConduitClient::new(
            "api-1234".into(),
            Url::parse("http://phabricator.corp.example.com").unwrap(),
            reqwest::Client::new(),
        );
        let url = client.endpoint("/api/differential.createcomment").unwrap();
        assert_eq!(
            url.as_str(),
            "http://phabricator.corp.example.com/api/differential.createcomment"
        );
    }
}
