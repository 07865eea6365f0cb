//! Per-record synchronization: metadata documents and image assets.
//!
//! For each record this module writes (or skips) the metadata document,
//! discovers candidate image URLs inside the raw document, upgrades each to
//! the master tier when the naming convention allows it, and then lets the
//! probe decide per asset whether any network transfer is needed at all.
//! All writes go through a `.part` sibling and a rename, so a killed
//! process never leaves a truncated file under the final name.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::models::{Record, RecordOutcome};
use crate::probe::{self, RemoteInfo, SyncDecision};
use crate::stats::SessionStats;

/// Image extensions recognized by the discovery walk (lowercase, no dot).
/// Widening this list is the only change needed to harvest more formats.
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "tif", "tiff"];

/// Large master-tier files get a much longer timeout than page fetches.
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

/// Synchronize one record into `config.output_dir/<identifier>/`.
///
/// Asset failures are contained here: a failed download is logged and the
/// remaining assets still get their chance. Only filesystem-level trouble
/// with the metadata document itself escapes to the caller.
pub async fn sync_record(
    client: &Client,
    config: &Config,
    record: &Record,
    stats: &mut SessionStats,
) -> Result<RecordOutcome> {
    let id = record.identifier();
    let dir = config.output_dir.join(&id);
    let image_urls = find_image_urls(&record.raw);
    let mut outcome = RecordOutcome::default();

    if config.save_json {
        outcome.json_written =
            write_metadata(&dir, &id, &record.raw, &image_urls, config.skip_existing)?;
    }

    if config.download_images {
        for url in &image_urls {
            match sync_asset(client, config, &dir, url).await {
                Ok(Some(bytes)) => {
                    outcome.images_written += 1;
                    outcome.bytes_written += bytes;
                    stats.add_bytes(bytes);
                }
                Ok(None) => {}
                Err(e) => warn!("asset {url}: {e:#}"),
            }
        }
        if outcome.images_written > 0 {
            stats.add_image_set();
            info!("{}", stats.progress_line());
        }
    }

    Ok(outcome)
}

/// Write the record's metadata document, honoring skip-if-unchanged.
///
/// Returns whether anything was actually written.
fn write_metadata(
    dir: &Path,
    id: &str,
    raw: &Value,
    image_urls: &[String],
    skip_existing: bool,
) -> Result<bool> {
    fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;

    let path = dir.join(json_filename(image_urls));
    let body = serde_json::to_string_pretty(raw)?;

    if path.exists() {
        if skip_existing {
            let existing = fs::read_to_string(&path).unwrap_or_default();
            if existing == body {
                info!("Skipping JSON for {id} (unchanged)");
                return Ok(false);
            }
        }
        write_atomic(&path, body.as_bytes())?;
        info!("Updated JSON for {id}");
        return Ok(true);
    }

    write_atomic(&path, body.as_bytes())?;
    info!("Saved JSON for {id}");
    Ok(true)
}

/// Synchronize one asset URL. Returns `Some(bytes)` on download, `None` on
/// skip.
async fn sync_asset(
    client: &Client,
    config: &Config,
    dir: &Path,
    service_url: &str,
) -> Result<Option<u64>> {
    let (url, mut info) = resolve_tier(client, service_url).await;

    // A bare path segment gets its extension from the probed content type.
    let mut filename = final_segment(&url);
    if filename.is_empty() {
        filename = "image".to_string();
    }
    if !filename.contains('.') {
        if info.is_none() {
            info = probe::remote_info(client, &url).await.ok();
        }
        if let Some(ext) = info
            .as_ref()
            .and_then(|i| i.content_type.as_deref())
            .and_then(extension_for)
        {
            filename.push_str(ext);
        }
    }
    let path = dir.join(&filename);

    if config.skip_existing && path.exists() {
        // Reuse the tier-resolution probe when we already paid for it.
        let decision = match &info {
            Some(info) => probe::decide_with(info, &path)?,
            None => probe::decide(client, &url, &path).await?,
        };
        if let SyncDecision::Skip(reason) = decision {
            debug!("Skipping image {} ({reason})", path.display());
            return Ok(None);
        }
    }

    let bytes = download(client, &url, &path).await?;
    info!("Saved image {} ({} bytes)", path.display(), bytes);
    Ok(Some(bytes))
}

/// Prefer the master tier when the URL matches the service-tier naming
/// convention and the master candidate answers a metadata probe.
async fn resolve_tier(client: &Client, service_url: &str) -> (String, Option<RemoteInfo>) {
    if let Some(master) = master_candidate(service_url) {
        match probe::remote_info(client, &master).await {
            Ok(info) => {
                debug!("using master tier for {service_url}");
                return (master, Some(info));
            }
            Err(e) => debug!("master tier unreachable for {service_url}: {e:#}"),
        }
    }
    (service_url.to_string(), None)
}

/// Textual service→master substitution.
///
/// Applies only when the path contains `/service/` and the filename ends in
/// the `r.jpg` service marker; everything else is left strictly alone.
pub fn master_candidate(url: &str) -> Option<String> {
    if !url.contains("/service/") {
        return None;
    }
    let stem = url.strip_suffix("r.jpg")?;
    Some(format!("{}u.tif", stem.replacen("/service/", "/master/", 1)))
}

/// Depth-first walk of the raw metadata document collecting image URLs.
///
/// Any string value anywhere in the structure qualifies when it is an
/// absolute http(s) URL whose path ends in a recognized image extension;
/// upstream records are too heterogeneous for a fixed schema. Duplicates
/// are dropped, first-seen order is preserved.
pub fn find_image_urls(value: &Value) -> Vec<String> {
    let mut urls = Vec::new();
    collect_image_urls(value, &mut urls);

    let mut seen = std::collections::HashSet::new();
    urls.retain(|u| seen.insert(u.clone()));
    urls
}

fn collect_image_urls(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) => {
            if is_image_url(s) {
                out.push(s.clone());
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_image_urls(item, out);
            }
        }
        Value::Object(map) => {
            for item in map.values() {
                collect_image_urls(item, out);
            }
        }
        _ => {}
    }
}

fn is_image_url(s: &str) -> bool {
    if !s.starts_with("http://") && !s.starts_with("https://") {
        return false;
    }
    let name = final_segment(s);
    match name.rsplit_once('.') {
        Some((_, ext)) => IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()),
        None => false,
    }
}

/// Final path segment of a URL, query string and fragment stripped.
fn final_segment(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.rsplit('/').next().unwrap_or("").to_string()
}

/// Metadata documents are named after the record's image stem when one
/// exists: `37158u.tif` → `37158.json` (master stems win over `r.jpg`
/// service stems), falling back to `item.json` for imageless records.
fn json_filename(image_urls: &[String]) -> String {
    for marker in ["u.tif", "r.jpg"] {
        for url in image_urls {
            let name = final_segment(url);
            if let Some(stem) = name.strip_suffix(marker) {
                if !stem.is_empty() {
                    return format!("{stem}.json");
                }
            }
        }
    }
    "item.json".to_string()
}

fn extension_for(content_type: &str) -> Option<&'static str> {
    let essence = content_type.split(';').next().unwrap_or("").trim();
    match essence {
        "image/jpeg" => Some(".jpg"),
        "image/png" => Some(".png"),
        "image/gif" => Some(".gif"),
        "image/tiff" => Some(".tif"),
        _ => None,
    }
}

/// Stream a URL into `path`, returning the byte count written.
async fn download(client: &Client, url: &str, path: &Path) -> Result<u64> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }

    let mut resp = client
        .get(url)
        .timeout(DOWNLOAD_TIMEOUT)
        .send()
        .await
        .with_context(|| format!("GET {url}"))?
        .error_for_status()
        .with_context(|| format!("GET {url}"))?;

    let tmp = part_path(path);
    let mut file =
        fs::File::create(&tmp).with_context(|| format!("create {}", tmp.display()))?;
    let mut written = 0u64;

    while let Some(chunk) = resp.chunk().await? {
        file.write_all(&chunk)
            .with_context(|| format!("write {}", tmp.display()))?;
        written += chunk.len() as u64;
    }
    drop(file);

    fs::rename(&tmp, path)
        .with_context(|| format!("rename {} into place", tmp.display()))?;
    Ok(written)
}

/// Atomic small-file write via the same `.part`-and-rename dance.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = part_path(path);
    fs::write(&tmp, bytes).with_context(|| format!("write {}", tmp.display()))?;
    fs::rename(&tmp, path)
        .with_context(|| format!("rename {} into place", tmp.display()))?;
    Ok(())
}

fn part_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}
