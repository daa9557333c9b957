//! In-process stand-in for the report service

use super::fixtures::{matched_records, zip_archive};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// Product ids submitted per job, indexed by job number
type Jobs = Arc<Mutex<Vec<Vec<String>>>>;

/// How the artifact of one job should misbehave
#[derive(Clone, Debug, Default)]
pub struct Faults {
    /// Job numbers whose artifact answers 404
    pub missing: HashSet<usize>,
    /// Job numbers whose artifact JSON is cut off after the first record
    pub truncated: HashSet<usize>,
}

/// Report service mock
///
/// Submissions get ids `job-0`, `job-1`, ... in arrival order. Every job is immediately
/// `Fulfilled`, and its artifact contains one matched record per submitted product.
pub struct MockReportService {
    /// Underlying mock server
    pub server: MockServer,
    jobs: Jobs,
}

impl MockReportService {
    /// Start a service where every stage succeeds
    pub async fn start() -> Self {
        Self::start_with(Faults::default()).await
    }

    /// Start a service with faulty artifacts
    pub async fn start_with(faults: Faults) -> Self {
        let server = MockServer::start().await;
        let jobs: Jobs = Arc::default();

        Mock::given(method("POST"))
            .and(path("/reports"))
            .respond_with(SubmitResponder { jobs: jobs.clone() })
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/status/job-\d+$"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"reportStatus": "Fulfilled"})),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/reports/job-\d+$"))
            .respond_with(ArtifactResponder {
                jobs: jobs.clone(),
                faults,
            })
            .mount(&server)
            .await;

        Self { server, jobs }
    }

    /// Base URL for report submissions and artifacts
    pub fn base_url(&self) -> String {
        format!("{}/reports", self.server.uri())
    }

    /// Base URL for status queries
    pub fn status_url(&self) -> String {
        format!("{}/status", self.server.uri())
    }

    /// Products submitted so far, one list per job
    pub fn submitted(&self) -> Vec<Vec<String>> {
        self.jobs.lock().unwrap().clone()
    }

    /// Number of requests of `method` received so far
    pub async fn requests(&self, method: &str) -> usize {
        self.server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .filter(|r| r.method.as_str() == method)
            .count()
    }
}

struct SubmitResponder {
    jobs: Jobs,
}

impl Respond for SubmitResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: serde_json::Value = serde_json::from_slice(&request.body).unwrap();
        let ids: Vec<String> = body["products"]
            .as_array()
            .unwrap()
            .iter()
            .map(|p| p["id"].as_str().unwrap().to_string())
            .collect();

        let mut jobs = self.jobs.lock().unwrap();
        jobs.push(ids);
        let id = format!("job-{}", jobs.len() - 1);
        ResponseTemplate::new(200).set_body_json(serde_json::json!({ "id": id }))
    }
}

struct ArtifactResponder {
    jobs: Jobs,
    faults: Faults,
}

impl Respond for ArtifactResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let job: usize = request
            .url
            .path()
            .rsplit("job-")
            .next()
            .and_then(|n| n.parse().ok())
            .unwrap();

        if self.faults.missing.contains(&job) {
            return ResponseTemplate::new(404).set_body_string("report expired");
        }

        let ids = self.jobs.lock().unwrap()[job].clone();
        let mut body = matched_records(&ids);
        if self.faults.truncated.contains(&job) {
            let first = format!("{{\"id\":\"{}\"}}", ids[0]);
            let cut = body.find(&first).unwrap() + first.len();
            body.truncate(cut + 1);
        }

        let entry = format!("job-{job}.json");
        let archive = zip_archive(&[
            ("summary.txt", "generated by mock"),
            (entry.as_str(), body.as_str()),
        ]);
        ResponseTemplate::new(200)
            .insert_header("content-type", "application/zip")
            .set_body_bytes(archive)
    }
}
