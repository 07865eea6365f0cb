//! Skip/fetch decisions for one remote asset against local storage.
//!
//! The decision primitive behind idempotent re-runs: a lightweight metadata
//! probe (`HEAD`, falling back to a one-byte ranged `GET` for servers that
//! reject the method) compared against the local file. Insufficient evidence
//! always resolves to [`SyncDecision::Fetch`], since re-downloading is cheaper
//! than silently missing an update.

use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use reqwest::header::{self, HeaderMap};
use reqwest::{Client, StatusCode};
use sha2::{Digest, Sha256};
use tracing::debug;

/// Remote asset metadata gathered by a probe. Every field is best-effort.
#[derive(Debug, Clone, Default)]
pub struct RemoteInfo {
    pub content_length: Option<u64>,
    pub last_modified: Option<DateTime<Utc>>,
    pub content_type: Option<String>,
    /// Strong ETag with quotes stripped, if the server sent one.
    pub etag: Option<String>,
}

/// Outcome of comparing one remote asset against a local path.
#[derive(Debug, PartialEq, Eq)]
pub enum SyncDecision {
    Fetch,
    Skip(SkipReason),
}

#[derive(Debug, PartialEq, Eq)]
pub enum SkipReason {
    /// Remote size matches and the remote copy is not newer.
    SizeAndTime,
    /// Remote content digest matches the local file's SHA-256.
    HashMatch,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::SizeAndTime => write!(f, "size and mtime match"),
            SkipReason::HashMatch => write!(f, "content hash match"),
        }
    }
}

/// Probe a URL for size/mtime/type without transferring the body.
pub async fn remote_info(client: &Client, url: &str) -> Result<RemoteInfo> {
    let resp = client
        .head(url)
        .send()
        .await
        .with_context(|| format!("HEAD {url}"))?;

    let status = resp.status();
    if status.is_success() {
        return Ok(info_from_headers(resp.headers(), false));
    }
    if matches!(
        status,
        StatusCode::METHOD_NOT_ALLOWED | StatusCode::NOT_IMPLEMENTED
    ) {
        return ranged_info(client, url).await;
    }
    bail!("HEAD {url}: HTTP {status}");
}

/// Minimal partial-content request used when `HEAD` is rejected: ask for one
/// byte and read the totals out of the headers.
async fn ranged_info(client: &Client, url: &str) -> Result<RemoteInfo> {
    let resp = client
        .get(url)
        .header(header::RANGE, "bytes=0-0")
        .send()
        .await
        .with_context(|| format!("ranged GET {url}"))?;

    let status = resp.status();
    if !status.is_success() {
        bail!("ranged GET {url}: HTTP {status}");
    }
    Ok(info_from_headers(
        resp.headers(),
        status == StatusCode::PARTIAL_CONTENT,
    ))
}

fn info_from_headers(headers: &HeaderMap, ranged: bool) -> RemoteInfo {
    let header_str = |name: header::HeaderName| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
    };

    // For a 206 the Content-Length describes the fragment; the full size
    // hides at the end of Content-Range ("bytes 0-0/12345").
    let content_length = if ranged {
        header_str(header::CONTENT_RANGE).and_then(|v| parse_content_range_total(&v))
    } else {
        header_str(header::CONTENT_LENGTH).and_then(|v| v.parse().ok())
    };

    let last_modified = header_str(header::LAST_MODIFIED)
        .and_then(|v| DateTime::parse_from_rfc2822(&v).ok())
        .map(|dt| dt.with_timezone(&Utc));

    let etag = header_str(header::ETAG)
        .filter(|v| !v.starts_with("W/"))
        .map(|v| v.trim_matches('"').to_string());

    RemoteInfo {
        content_length,
        last_modified,
        content_type: header_str(header::CONTENT_TYPE),
        etag,
    }
}

fn parse_content_range_total(value: &str) -> Option<u64> {
    value.rsplit('/').next()?.trim().parse().ok()
}

/// Decide whether `url` needs fetching into `local`.
///
/// A missing local file is always a fetch. A failed probe counts as
/// inconclusive, which also resolves to fetch.
pub async fn decide(client: &Client, url: &str, local: &Path) -> Result<SyncDecision> {
    if !local.exists() {
        return Ok(SyncDecision::Fetch);
    }
    match remote_info(client, url).await {
        Ok(info) => decide_with(&info, local),
        Err(e) => {
            debug!("probe inconclusive for {url}: {e:#}");
            Ok(SyncDecision::Fetch)
        }
    }
}

/// The comparison itself, separated from the network probe.
///
/// Size known and different → fetch. Size known and equal → skip unless the
/// remote copy is strictly newer than the local mtime. Size unknown → fall
/// back to comparing a server-supplied content digest (a strong 64-hex ETag,
/// read as SHA-256) against the local file's hash; anything less is
/// inconclusive and fetches.
pub fn decide_with(info: &RemoteInfo, local: &Path) -> Result<SyncDecision> {
    let meta = std::fs::metadata(local)
        .with_context(|| format!("stat {}", local.display()))?;

    if let Some(remote_len) = info.content_length {
        if remote_len != meta.len() {
            return Ok(SyncDecision::Fetch);
        }
        let local_mtime = meta.modified().ok().map(DateTime::<Utc>::from);
        return match (info.last_modified, local_mtime) {
            (Some(theirs), Some(ours)) if theirs > ours => Ok(SyncDecision::Fetch),
            _ => Ok(SyncDecision::Skip(SkipReason::SizeAndTime)),
        };
    }

    if let Some(digest) = info.etag.as_deref().filter(|e| is_hex_digest(e)) {
        if digest.eq_ignore_ascii_case(&file_sha256(local)?) {
            return Ok(SyncDecision::Skip(SkipReason::HashMatch));
        }
    }

    Ok(SyncDecision::Fetch)
}

fn is_hex_digest(value: &str) -> bool {
    value.len() == 64 && value.bytes().all(|b| b.is_ascii_hexdigit())
}

/// SHA-256 of a file's contents, streamed so large assets stay cheap.
pub fn file_sha256(path: &Path) -> Result<String> {
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}
