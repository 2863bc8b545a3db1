//! Forge query-API client.
//!
//! Thin typed wrapper over the platform's REST query API: every call carries
//! the bearer token, a bounded timeout and (where supported) the last-known
//! revalidation token, and every response updates the process-wide
//! remaining-quota signal from the platform's rate-limit headers.

use color_eyre::{eyre::eyre, Result};
use reqwest::header::{ETAG, IF_NONE_MATCH};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use url::Url;

use crate::cache::layer::FetchOutcome;

use super::api_types::{
  reserialize, ApiCommit, ApiCommitPage, ApiItemPage, ApiRepo, ApiSearchResponse, ApiWorkItem,
};
use super::error::ForgeError;
use super::types::{CommitInfo, RepoMeta, RepoSummary, WorkItem};

/// Items/commits requested per page.
pub const PAGE_SIZE: u32 = 50;

/// Rate-limit header carrying the remaining request budget.
const RATELIMIT_REMAINING: &str = "x-ratelimit-remaining";

/// One page of the recency-ordered work-item listing.
#[derive(Debug)]
pub struct WorkItemPage {
  pub items: Vec<WorkItem>,
  pub next_cursor: Option<String>,
}

/// One page of the recency-ordered commit listing.
#[derive(Debug)]
pub struct CommitPage {
  pub commits: Vec<CommitInfo>,
  pub next_cursor: Option<String>,
}

/// Forge API client wrapper.
#[derive(Clone)]
pub struct ForgeClient {
  http: reqwest::Client,
  base: String,
  token: String,
  quota_remaining: Arc<AtomicI64>,
}

impl ForgeClient {
  pub fn new(base_url: &str, token: impl Into<String>, timeout: Duration) -> Result<Self> {
    let base =
      Url::parse(base_url).map_err(|e| eyre!("Invalid forge URL {}: {}", base_url, e))?;
    let http = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      http,
      base: base.as_str().trim_end_matches('/').to_string(),
      token: token.into(),
      quota_remaining: Arc::new(AtomicI64::new(i64::MAX)),
    })
  }

  /// Last-seen remaining request budget; `i64::MAX` until the first response.
  pub fn remaining_quota(&self) -> i64 {
    self.quota_remaining.load(Ordering::Relaxed)
  }

  fn record_quota(&self, response: &reqwest::Response) {
    if let Some(remaining) = response
      .headers()
      .get(RATELIMIT_REMAINING)
      .and_then(|v| v.to_str().ok())
      .and_then(|v| v.parse::<i64>().ok())
    {
      self.quota_remaining.store(remaining, Ordering::Relaxed);
    }
  }

  /// Perform a conditional GET.
  ///
  /// Sends `If-None-Match` when a token is given; a 304 response costs
  /// nothing against the platform's request budget and surfaces as
  /// [`FetchOutcome::NotModified`].
  async fn get_conditional<T: DeserializeOwned>(
    &self,
    path: &str,
    query: &[(&str, String)],
    etag: Option<&str>,
  ) -> std::result::Result<FetchOutcome<T>, ForgeError> {
    let url = format!("{}/{}", self.base, path);
    let mut request = self
      .http
      .get(&url)
      .bearer_auth(&self.token)
      .header(reqwest::header::ACCEPT, "application/json");
    if !query.is_empty() {
      request = request.query(query);
    }
    if let Some(etag) = etag {
      request = request.header(IF_NONE_MATCH, etag);
    }

    let response = request.send().await.map_err(ForgeError::from)?;
    self.record_quota(&response);

    let status = response.status();
    if status == StatusCode::NOT_MODIFIED {
      return Ok(FetchOutcome::NotModified);
    }
    if !status.is_success() {
      return Err(self.status_error(status, path));
    }

    let token = response
      .headers()
      .get(ETAG)
      .and_then(|v| v.to_str().ok())
      .map(String::from);
    let value = response.json::<T>().await.map_err(ForgeError::from)?;

    Ok(FetchOutcome::Modified { value, token })
  }

  fn status_error(&self, status: StatusCode, path: &str) -> ForgeError {
    match status {
      StatusCode::NOT_FOUND => ForgeError::NotFound(path.to_string()),
      StatusCode::UNAUTHORIZED => ForgeError::Unauthorized(path.to_string()),
      StatusCode::FORBIDDEN => {
        if self.remaining_quota() == 0 {
          ForgeError::QuotaExhausted
        } else {
          ForgeError::Unauthorized(path.to_string())
        }
      }
      StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
        ForgeError::BadQuery(path.to_string())
      }
      s => ForgeError::Transport(format!("{} returned {}", path, s)),
    }
  }

  /// One page of work items, most-recently-updated first.
  ///
  /// Carries the revalidation token on the first page only (`cursor` absent);
  /// malformed items are skipped and logged, never failing the page.
  pub async fn list_work_items(
    &self,
    repo: &str,
    cursor: Option<&str>,
    etag: Option<&str>,
  ) -> std::result::Result<FetchOutcome<WorkItemPage>, ForgeError> {
    let mut query = vec![
      ("state", "all".to_string()),
      ("sort", "updated".to_string()),
      ("direction", "desc".to_string()),
      ("limit", PAGE_SIZE.to_string()),
    ];
    if let Some(cursor) = cursor {
      query.push(("cursor", cursor.to_string()));
    }

    let page: FetchOutcome<ApiItemPage> = self
      .get_conditional(&format!("repos/{}/items", repo), &query, etag)
      .await?;

    Ok(match page {
      FetchOutcome::NotModified => FetchOutcome::NotModified,
      FetchOutcome::Modified { value, token } => {
        let mut items = Vec::with_capacity(value.items.len());
        for raw in value.items {
          let parsed: serde_json::Result<ApiWorkItem> = reserialize(&raw);
          match parsed {
            Ok(item) => items.push(item.into_domain(repo)),
            Err(e) => warn!(repo, "Skipping malformed work item: {}", e),
          }
        }
        FetchOutcome::Modified {
          value: WorkItemPage {
            items,
            next_cursor: value.next_cursor,
          },
          token,
        }
      }
    })
  }

  /// One page of commits on the default branch, newest first.
  pub async fn list_commits(
    &self,
    repo: &str,
    cursor: Option<&str>,
    etag: Option<&str>,
  ) -> std::result::Result<FetchOutcome<CommitPage>, ForgeError> {
    let mut query = vec![("limit", PAGE_SIZE.to_string())];
    if let Some(cursor) = cursor {
      query.push(("cursor", cursor.to_string()));
    }

    let page: FetchOutcome<ApiCommitPage> = self
      .get_conditional(&format!("repos/{}/commits", repo), &query, etag)
      .await?;

    Ok(match page {
      FetchOutcome::NotModified => FetchOutcome::NotModified,
      FetchOutcome::Modified { value, token } => {
        let mut commits = Vec::with_capacity(value.commits.len());
        for raw in value.commits {
          let parsed: serde_json::Result<ApiCommit> = reserialize(&raw);
          match parsed {
            Ok(commit) => commits.push(CommitInfo::from(commit)),
            Err(e) => warn!(repo, "Skipping malformed commit: {}", e),
          }
        }
        FetchOutcome::Modified {
          value: CommitPage {
            commits,
            next_cursor: value.next_cursor,
          },
          token,
        }
      }
    })
  }

  /// Repository metadata (description, default branch, push/update instants).
  pub async fn repo_meta(
    &self,
    repo: &str,
    etag: Option<&str>,
  ) -> std::result::Result<FetchOutcome<RepoMeta>, ForgeError> {
    let meta: FetchOutcome<ApiRepo> = self
      .get_conditional(&format!("repos/{}", repo), &[], etag)
      .await?;
    Ok(match meta {
      FetchOutcome::NotModified => FetchOutcome::NotModified,
      FetchOutcome::Modified { value, token } => FetchOutcome::Modified {
        value: RepoMeta::from(value),
        token,
      },
    })
  }

  /// Language byte breakdown of a repository.
  pub async fn languages(
    &self,
    repo: &str,
    etag: Option<&str>,
  ) -> std::result::Result<FetchOutcome<BTreeMap<String, u64>>, ForgeError> {
    self
      .get_conditional(&format!("repos/{}/languages", repo), &[], etag)
      .await
  }

  /// Repository search listing. The search endpoint does not support
  /// conditional requests.
  pub async fn search_repos(
    &self,
    query: &str,
  ) -> std::result::Result<Vec<RepoSummary>, ForgeError> {
    let outcome: FetchOutcome<ApiSearchResponse> = self
      .get_conditional("search/repos", &[("q", query.to_string())], None)
      .await?;
    match outcome {
      FetchOutcome::Modified { value, .. } => {
        Ok(value.items.into_iter().map(RepoSummary::from).collect())
      }
      FetchOutcome::NotModified => Err(ForgeError::Decode(
        "unexpected not-modified from search".to_string(),
      )),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use wiremock::matchers::{header, method, path, query_param};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  fn sample_page() -> serde_json::Value {
    serde_json::json!({
      "items": [
        {
          "id": "WI_1",
          "number": 1,
          "title": "Fix auth P:3",
          "body": null,
          "labels": [{"name": "in progress"}],
          "assignees": [{"login": "ada"}],
          "state": "open",
          "created_at": "2026-03-01T00:00:00Z",
          "updated_at": "2026-03-05T00:00:00Z",
          "closed_at": null,
          "events": []
        },
        {"id": "WI_bad", "number": "oops"}
      ],
      "next_cursor": null
    })
  }

  async fn client_for(server: &MockServer) -> ForgeClient {
    ForgeClient::new(&server.uri(), "test-token", Duration::from_secs(5)).unwrap()
  }

  #[tokio::test]
  async fn test_modified_response_returns_items_and_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/repos/acme/api/items"))
      .and(query_param("sort", "updated"))
      .respond_with(
        ResponseTemplate::new(200)
          .set_body_json(sample_page())
          .insert_header("ETag", "\"v1\"")
          .insert_header("x-ratelimit-remaining", "4999"),
      )
      .mount(&server)
      .await;

    let client = client_for(&server).await;
    let outcome = client.list_work_items("acme/api", None, None).await.unwrap();

    match outcome {
      FetchOutcome::Modified { value, token } => {
        // The malformed second item is skipped, not fatal.
        assert_eq!(value.items.len(), 1);
        assert_eq!(value.items[0].assignees, vec!["ada"]);
        assert_eq!(token.as_deref(), Some("\"v1\""));
      }
      FetchOutcome::NotModified => panic!("expected a modified page"),
    }
    assert_eq!(client.remaining_quota(), 4999);
  }

  #[tokio::test]
  async fn test_not_modified_with_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/repos/acme/api/items"))
      .and(header("If-None-Match", "\"v1\""))
      .respond_with(ResponseTemplate::new(304).insert_header("x-ratelimit-remaining", "4999"))
      .mount(&server)
      .await;

    let client = client_for(&server).await;
    let outcome = client
      .list_work_items("acme/api", None, Some("\"v1\""))
      .await
      .unwrap();
    assert!(matches!(outcome, FetchOutcome::NotModified));
  }

  #[tokio::test]
  async fn test_status_errors_are_typed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/repos/acme/missing"))
      .respond_with(ResponseTemplate::new(404))
      .mount(&server)
      .await;

    let client = client_for(&server).await;
    let err = client.repo_meta("acme/missing", None).await.unwrap_err();
    assert!(matches!(err, ForgeError::NotFound(_)));
    assert!(!err.is_transport());
  }

  #[tokio::test]
  async fn test_quota_exhaustion_detected_on_forbidden() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/repos/acme/api"))
      .respond_with(ResponseTemplate::new(403).insert_header("x-ratelimit-remaining", "0"))
      .mount(&server)
      .await;

    let client = client_for(&server).await;
    let err = client.repo_meta("acme/api", None).await.unwrap_err();
    assert_eq!(err, ForgeError::QuotaExhausted);
    assert_eq!(client.remaining_quota(), 0);
  }
}
