//! GitHub REST "contents" API backend.
//!
//! Reads go to `raw.githubusercontent.com` first (fast, eventually consistent),
//! then to the API, then to an optional local directory that mirrors the
//! repository layout. Writes and deletes always go to the API with a bearer
//! credential and the file's blob `sha` as the version token.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use log::{debug, info};
use reqwest::header::{HeaderMap, ACCEPT, AUTHORIZATION, CACHE_CONTROL};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::timeout;
use url::Url;

use super::{RemoteFile, RemoteStore, StoreError};
use crate::config::RepoConfig;
use crate::logutil::escape_log;

const GITHUB_JSON: &str = "application/vnd.github+json";
const RATE_LIMIT_REMAINING: &str = "x-ratelimit-remaining";

#[derive(Debug, Deserialize)]
struct ContentsResponse {
    sha: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    encoding: String,
}

#[derive(Debug, Deserialize)]
struct WriteResponse {
    content: Option<WrittenContent>,
}

#[derive(Debug, Deserialize)]
struct WrittenContent {
    sha: String,
}

#[derive(Debug, Serialize)]
struct PutBody<'a> {
    message: &'a str,
    content: String,
    branch: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct DeleteBody<'a> {
    message: &'a str,
    sha: &'a str,
    branch: &'a str,
}

pub struct GitHubStore {
    repo: RepoConfig,
    token: Option<String>,
    client: reqwest::Client,
    timeout: Duration,
}

impl GitHubStore {
    pub fn new(repo: RepoConfig, token: Option<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("charsheet/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let timeout = Duration::from_secs(repo.timeout_seconds.max(1));
        Ok(Self {
            repo,
            token: token.filter(|t| !t.trim().is_empty()),
            client,
            timeout,
        })
    }

    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }

    /// `{api_base}/repos/{owner}/{repo}/contents/{path}`
    pub fn api_url(&self, path: &str) -> Result<Url, StoreError> {
        let owner = self.repo.owner.as_str();
        let repo = self.repo.repo.as_str();
        join_segments(&self.repo.api_base, ["repos", owner, repo, "contents"], path)
    }

    /// `{raw_base}/{owner}/{repo}/{branch}/{path}`
    pub fn mirror_url(&self, path: &str) -> Result<Url, StoreError> {
        let owner = self.repo.owner.as_str();
        let repo = self.repo.repo.as_str();
        let branch = self.repo.branch.as_str();
        join_segments(&self.repo.raw_base, [owner, repo, branch], path)
    }

    fn local_path(&self, dir: &str, path: &str) -> PathBuf {
        path.split('/')
            .filter(|s| !s.is_empty())
            .fold(Path::new(dir).to_path_buf(), |acc, seg| acc.join(seg))
    }

    fn authed(&self, req: RequestBuilder) -> RequestBuilder {
        let req = req.header(ACCEPT, GITHUB_JSON);
        match &self.token {
            Some(token) => req.header(AUTHORIZATION, format!("token {token}")),
            None => req,
        }
    }

    fn require_token(&self) -> Result<(), StoreError> {
        if self.token.is_some() {
            Ok(())
        } else {
            Err(StoreError::Unauthorized)
        }
    }

    async fn send(&self, req: RequestBuilder, what: &str) -> Result<Response, StoreError> {
        timeout(self.timeout, req.send())
            .await
            .map_err(|_| {
                StoreError::Unavailable(format!(
                    "{what}: timed out after {}s",
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e| StoreError::Unavailable(format!("{what}: {e}")))
    }

    async fn fetch_mirror(&self, path: &str) -> Result<String, StoreError> {
        let mut url = self.mirror_url(path)?;
        // cache buster; the mirror sits behind a CDN
        url.query_pairs_mut()
            .append_pair("t", &chrono::Utc::now().timestamp_millis().to_string());
        debug!("mirror GET {}", url);
        let req = self.client.get(url).header(CACHE_CONTROL, "no-cache");
        let resp = self.send(req, "mirror read").await?;
        if !resp.status().is_success() {
            return Err(classify_response(resp.status(), resp.headers(), path));
        }
        resp.text()
            .await
            .map_err(|e| StoreError::Unavailable(format!("mirror read body: {e}")))
    }

    async fn fetch_local(&self, dir: &str, path: &str) -> Result<String, StoreError> {
        let local = self.local_path(dir, path);
        debug!("local read {}", local.display());
        tokio::fs::read_to_string(&local).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StoreError::not_found(path)
            } else {
                StoreError::Unavailable(format!("local read {}: {e}", local.display()))
            }
        })
    }
}

fn join_segments<'a>(
    base: &str,
    prefix: impl IntoIterator<Item = &'a str>,
    path: &str,
) -> Result<Url, StoreError> {
    let mut url =
        Url::parse(base).map_err(|e| StoreError::Unavailable(format!("bad base url {base}: {e}")))?;
    {
        let mut segments = url
            .path_segments_mut()
            .map_err(|_| StoreError::Unavailable(format!("base url {base} cannot take a path")))?;
        segments
            .pop_if_empty()
            .extend(prefix)
            .extend(path.split('/').filter(|s| !s.is_empty()));
    }
    Ok(url)
}

/// Map a non-success HTTP status onto the store error taxonomy.
///
/// The contents API answers a stale `sha` with 409 and a missing `sha` for an
/// existing file with 422; both mean the caller's view of the file is out of date.
pub fn classify_status(status: StatusCode, path: &str) -> StoreError {
    match status {
        StatusCode::NOT_FOUND => StoreError::not_found(path),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => StoreError::Unauthorized,
        StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY => StoreError::conflict(path),
        other => StoreError::Unavailable(format!("HTTP {other} for {path}")),
    }
}

/// [`classify_status`], except that a 403 with an exhausted rate limit is
/// `Unavailable`: GitHub throttles anonymous reads that way.
pub fn classify_response(status: StatusCode, headers: &HeaderMap, path: &str) -> StoreError {
    let exhausted = headers
        .get(RATE_LIMIT_REMAINING)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim() == "0");
    if status == StatusCode::FORBIDDEN && exhausted {
        return StoreError::Unavailable(format!("GitHub rate limit exceeded reading {path}"));
    }
    classify_status(status, path)
}

/// Decode the `content` field of a contents API response (base64 with line breaks).
pub fn decode_content(encoded: &str) -> Result<String, StoreError> {
    let compact: String = encoded.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    let bytes = STANDARD
        .decode(compact)
        .map_err(|e| StoreError::Unavailable(format!("bad base64 content: {e}")))?;
    String::from_utf8(bytes).map_err(|e| StoreError::Unavailable(format!("content is not UTF-8: {e}")))
}

#[async_trait]
impl RemoteStore for GitHubStore {
    async fn get(&self, path: &str) -> Result<RemoteFile, StoreError> {
        let mut url = self.api_url(path)?;
        url.query_pairs_mut().append_pair("ref", &self.repo.branch);
        debug!("api GET {}", url);
        let req = self.authed(self.client.get(url)).header(CACHE_CONTROL, "no-cache");
        let resp = self.send(req, "api read").await?;
        if !resp.status().is_success() {
            return Err(classify_response(resp.status(), resp.headers(), path));
        }
        let body: ContentsResponse = resp
            .json()
            .await
            .map_err(|e| StoreError::Unavailable(format!("api read {path}: {e}")))?;
        if body.encoding != "base64" {
            return Err(StoreError::Unavailable(format!(
                "{path}: unsupported content encoding '{}'",
                body.encoding
            )));
        }
        Ok(RemoteFile {
            content: decode_content(&body.content)?,
            sha: body.sha,
        })
    }

    async fn fetch(&self, path: &str) -> Result<String, StoreError> {
        match self.fetch_mirror(path).await {
            Ok(text) => return Ok(text),
            Err(e) => debug!("mirror read of {} failed: {}", path, e),
        }
        let api_err = match self.get(path).await {
            Ok(file) => return Ok(file.content),
            Err(e) => e,
        };
        if let Some(dir) = self.repo.local_mirror_dir.as_deref() {
            match self.fetch_local(dir, path).await {
                Ok(text) => return Ok(text),
                Err(e) => debug!("local read of {} failed: {}", path, e),
            }
        }
        Err(api_err)
    }

    async fn put(
        &self,
        path: &str,
        content: &str,
        sha: Option<&str>,
        message: &str,
    ) -> Result<String, StoreError> {
        self.require_token()?;
        let url = self.api_url(path)?;
        let body = PutBody {
            message,
            content: STANDARD.encode(content.as_bytes()),
            branch: &self.repo.branch,
            sha,
        };
        info!("api PUT {} ({})", path, escape_log(message));
        let resp = self
            .send(self.authed(self.client.put(url)).json(&body), "api write")
            .await?;
        if !resp.status().is_success() {
            return Err(classify_response(resp.status(), resp.headers(), path));
        }
        let written: WriteResponse = resp
            .json()
            .await
            .map_err(|e| StoreError::Unavailable(format!("api write {path}: {e}")))?;
        written
            .content
            .map(|c| c.sha)
            .ok_or_else(|| StoreError::Unavailable(format!("api write {path}: no sha in response")))
    }

    async fn delete(&self, path: &str, sha: &str, message: &str) -> Result<(), StoreError> {
        self.require_token()?;
        let url = self.api_url(path)?;
        let body = DeleteBody {
            message,
            sha,
            branch: &self.repo.branch,
        };
        info!("api DELETE {} ({})", path, escape_log(message));
        let resp = self
            .send(self.authed(self.client.delete(url)).json(&body), "api delete")
            .await?;
        if !resp.status().is_success() {
            return Err(classify_response(resp.status(), resp.headers(), path));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(token: Option<&str>) -> GitHubStore {
        let repo = RepoConfig {
            owner: "vault-tec".into(),
            repo: "sheets".into(),
            ..RepoConfig::default()
        };
        GitHubStore::new(repo, token.map(str::to_string)).unwrap()
    }

    #[test]
    fn builds_api_and_mirror_urls() {
        let s = store(None);
        assert_eq!(
            s.api_url("data/characters/index.json").unwrap().as_str(),
            "https://api.github.com/repos/vault-tec/sheets/contents/data/characters/index.json"
        );
        assert_eq!(
            s.mirror_url("data/characters/max.json").unwrap().as_str(),
            "https://raw.githubusercontent.com/vault-tec/sheets/main/data/characters/max.json"
        );
    }

    #[test]
    fn path_segments_are_escaped() {
        let s = store(None);
        let url = s.api_url("data/a b#c.json").unwrap();
        assert!(url.as_str().ends_with("/contents/data/a%20b%23c.json"));
    }

    #[test]
    fn status_mapping() {
        assert!(classify_status(StatusCode::NOT_FOUND, "p").is_not_found());
        assert!(classify_status(StatusCode::CONFLICT, "p").is_conflict());
        assert!(classify_status(StatusCode::UNPROCESSABLE_ENTITY, "p").is_conflict());
        assert_eq!(
            classify_status(StatusCode::UNAUTHORIZED, "p"),
            StoreError::Unauthorized
        );
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY, "p"),
            StoreError::Unavailable(_)
        ));
    }

    #[test]
    fn rate_limited_forbidden_is_not_a_credential_problem() {
        let mut headers = HeaderMap::new();
        assert_eq!(
            classify_response(StatusCode::FORBIDDEN, &headers, "p"),
            StoreError::Unauthorized
        );
        headers.insert(RATE_LIMIT_REMAINING, "59".parse().unwrap());
        assert_eq!(
            classify_response(StatusCode::FORBIDDEN, &headers, "p"),
            StoreError::Unauthorized
        );
        headers.insert(RATE_LIMIT_REMAINING, "0".parse().unwrap());
        assert!(matches!(
            classify_response(StatusCode::FORBIDDEN, &headers, "p"),
            StoreError::Unavailable(msg) if msg.contains("rate limit")
        ));
        assert!(classify_response(StatusCode::NOT_FOUND, &headers, "p").is_not_found());
    }

    #[test]
    fn decodes_wrapped_base64() {
        let encoded = STANDARD.encode("{\"characters\": [\"Žena\"]}".as_bytes());
        let wrapped = format!("{}\n{}\n", &encoded[..10], &encoded[10..]);
        assert_eq!(decode_content(&wrapped).unwrap(), "{\"characters\": [\"Žena\"]}");
    }

    #[test]
    fn put_body_omits_sha_on_create() {
        let body = PutBody {
            message: "m",
            content: "e30=".into(),
            branch: "main",
            sha: None,
        };
        let v = serde_json::to_value(&body).unwrap();
        assert!(v.get("sha").is_none());
        assert_eq!(v["branch"], "main");
    }

    #[tokio::test]
    async fn writes_without_token_are_unauthorized_before_any_request() {
        let s = store(Some("   "));
        assert!(!s.has_token());
        let err = s.put("x.json", "{}", None, "m").await.unwrap_err();
        assert_eq!(err, StoreError::Unauthorized);
        let err = s.delete("x.json", "abc", "m").await.unwrap_err();
        assert_eq!(err, StoreError::Unauthorized);
    }

    /// Both remote endpoints point at a closed local port.
    fn offline_store(local_mirror_dir: Option<String>) -> GitHubStore {
        let repo = RepoConfig {
            owner: "vault-tec".into(),
            repo: "sheets".into(),
            raw_base: "http://127.0.0.1:9".into(),
            api_base: "http://127.0.0.1:9".into(),
            local_mirror_dir,
            timeout_seconds: 1,
            ..RepoConfig::default()
        };
        GitHubStore::new(repo, None).unwrap()
    }

    #[tokio::test]
    async fn fetch_falls_back_to_the_local_tree() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("data").join("characters");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("index.json"), "{\"characters\":[]}").unwrap();

        let s = offline_store(Some(dir.path().to_string_lossy().to_string()));
        let text = s.fetch("data/characters/index.json").await.unwrap();
        assert_eq!(text, "{\"characters\":[]}");
    }

    #[tokio::test]
    async fn fetch_reports_the_api_error_without_a_local_tree() {
        let s = offline_store(None);
        let err = s.fetch("data/characters/index.json").await.unwrap_err();
        match err {
            StoreError::Unavailable(msg) => assert!(msg.starts_with("api read"), "{msg}"),
            other => panic!("expected Unavailable, got {other:?}"),
        }

        // a local tree without the file still surfaces the API error
        let dir = tempfile::tempdir().unwrap();
        let s = offline_store(Some(dir.path().to_string_lossy().to_string()));
        let err = s.fetch("data/characters/index.json").await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(msg) if msg.starts_with("api read")));
    }

    #[tokio::test]
    async fn local_fallback_reads_mirrored_tree() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("data").join("characters");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("index.json"), "{\"characters\":[]}").unwrap();
        let s = store(None);
        let root = dir.path().to_string_lossy().to_string();
        let text = s
            .fetch_local(&root, "data/characters/index.json")
            .await
            .unwrap();
        assert_eq!(text, "{\"characters\":[]}");
        let err = s.fetch_local(&root, "data/characters/nope.json").await.unwrap_err();
        assert!(err.is_not_found());
    }
}
