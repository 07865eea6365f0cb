//! Pagination orchestration: the Running → Stopped state machine.
//!
//! Drives the page-number sequence over one persistent client, hands each
//! record to the synchronizer strictly in source order, and pauses politely
//! between pages. A page with zero records is the natural end of the
//! collection; a terminal fetch failure schedules the one-shot background
//! self-verification and stops the run. `Stopped` is final; the
//! orchestrator never resumes.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Client;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::fetch::PageFetcher;
use crate::recheck::{Respawn, SelfCheck};
use crate::stats::SessionStats;
use crate::sync;

/// Final status of a harvest run: the only control-flow-relevant outcome
/// surfaced to the caller.
#[derive(Debug)]
pub enum HarvestOutcome {
    /// An empty page ended the collection.
    CompletedNaturally {
        /// Pages fetched, including the final empty one.
        pages: u32,
        records: u64,
    },
    /// Retries were exhausted fetching `page`; pagination stopped there.
    StoppedOnFetchFailure { page: u32 },
}

/// Explicit per-run context threaded through the pipeline: the shared HTTP
/// client, the session counters, and the self-verification scheduler.
/// Tests instantiate independent sessions; nothing here is ambient global
/// state.
pub struct Session {
    pub client: Client,
    pub stats: SessionStats,
    pub self_check: SelfCheck,
}

impl Session {
    pub fn new(config: &Config, respawner: Box<dyn Respawn>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("loc-harvest/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            client,
            stats: SessionStats::new(),
            self_check: SelfCheck::new(respawner, config.self_check_run),
        })
    }
}

/// Run the harvest to completion or terminal failure.
pub async fn run_harvest(config: &Config, session: &mut Session) -> Result<HarvestOutcome> {
    prepare_output_root(&config.output_dir)?;

    let fetcher = PageFetcher::new(session.client.clone(), config);
    let mut page_number = config.start_page;
    let mut pages_fetched = 0u32;
    let mut records_total = 0u64;

    loop {
        match fetcher.fetch(page_number).await {
            Ok(page) => {
                pages_fetched += 1;

                if !page.has_more() {
                    info!("page {page_number}: no results, collection complete");
                    return Ok(HarvestOutcome::CompletedNaturally {
                        pages: pages_fetched,
                        records: records_total,
                    });
                }

                for record in &page.records {
                    match sync::sync_record(&session.client, config, record, &mut session.stats)
                        .await
                    {
                        Ok(_) => {}
                        // a bad record never stops the page
                        Err(e) => warn!("record {}: {e:#}", record.identifier()),
                    }
                    records_total += 1;
                }
                info!(
                    "page {page_number}: {} records (total {records_total})",
                    page.records.len()
                );

                if config.delay_secs > 0.0 {
                    tokio::time::sleep(Duration::from_secs_f64(config.delay_secs)).await;
                }
                page_number += 1;
            }
            Err(failure) => {
                error!("{failure}");
                if pages_fetched > 0 {
                    // In-flight record work for the previous page has already
                    // drained: records are processed strictly sequentially
                    // before the next page fetch begins.
                    session.self_check.schedule(config);
                } else {
                    debug!("first page fetch failed; nothing to self-verify");
                }
                return Ok(HarvestOutcome::StoppedOnFetchFailure { page: failure.page });
            }
        }
    }
}

/// The output root must be writable before any network traffic starts.
fn prepare_output_root(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)
        .with_context(|| format!("cannot create output root {}", dir.display()))?;

    let probe = dir.join(".write-check");
    fs::write(&probe, b"")
        .with_context(|| format!("output root {} is not writable", dir.display()))?;
    let _ = fs::remove_file(&probe);
    Ok(())
}
