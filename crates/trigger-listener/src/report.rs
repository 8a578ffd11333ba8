// Renders the build summary comment posted to Phabricator revisions.

use std::time::Duration;

/// At most this many failing tests get their output inlined in the
/// comment; the rest are only counted.
pub const MAX_FAILING_DETAILS: usize = 3;

/// Cap on a single test's failure output in the comment.
const MAX_MESSAGE_CHARS: usize = 300;

/// Aggregated outcome of one CI build.
#[derive(Debug, Clone)]
pub struct BuildSummary {
    pub build_result: String,
    pub build_time: Duration,
    pub test_count: usize,
    pub failing_tests: usize,
    pub passing_tests: usize,
    pub skipped_tests: usize,
    pub build_number: u32,
    pub failing_details: Vec<FailingTest>,
}

/// One failing test surfaced in the comment body.
#[derive(Debug, Clone)]
pub struct FailingTest {
    pub classname: String,
    pub test_name: String,
    pub duration: Duration,
    pub message: String,
}

/// Truncate failure output so one noisy test cannot flood the review
/// comment.
pub fn truncate_message(message: &str) -> String {
    if message.chars().count() > MAX_MESSAGE_CHARS {
        let kept: String = message.chars().take(MAX_MESSAGE_CHARS - 1).collect();
        format!("{kept}... (trimmed output)")
    } else {
        message.to_string()
    }
}

/// Render the summary as the markdown table posted on the revision.
pub fn render(summary: &BuildSummary) -> String {
    let mut out = format!(
        "| Build Result | Build time | Test count | Failing tests | Passing tests | Skipped Tests | Build Number\n\
         | ------------- | ---------- | ---------- | ------------- | ------------- | ------------  | ------------\n\
         | {} | {:?} | {}  | {} | {} | {} | {}\n",
        summary.build_result,
        summary.build_time,
        summary.test_count,
        summary.failing_tests,
        summary.passing_tests,
        summary.skipped_tests,
        summary.build_number,
    );

    if !summary.failing_details.is_empty() {
        out.push_str("\n(IMPORTANT) Some failing tests\n");
        for test in &summary.failing_details {
            out.push_str(&format!(
                "\n| Classname | Test Name | Duration\n\
                 | --------- | --------- | --------\n\
                 | {} | {} | {:?}\n\n```\n{}\n```\n",
                test.classname, test.test_name, test.duration, test.message
            ));
        }
    }
    out
}
