//! # loc-harvest
//!
//! A polite, resumable harvester for Library of Congress collection APIs.
//!
//! loc-harvest walks the numbered pages of a collection's JSON listing,
//! materializes each record's metadata document to disk, and fetches the
//! highest-resolution image assets the record references, skipping any
//! content that is already current locally. On-disk state is the only
//! source of truth for "already synchronized": re-running against an
//! unchanged collection transfers nothing.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌─────────────┐   ┌──────────────┐
//! │ Orchestrator │──▶│ Page Fetch  │──▶│ page JSON    │
//! │  (harvest)   │   │ retry+back- │   │ "results"[…] │
//! └──────┬───────┘   │ off (fetch) │   └──────┬───────┘
//!        │           └─────────────┘          │
//!        │ per record, in order               ▼
//!        │           ┌─────────────┐   ┌──────────────┐
//!        └──────────▶│ Synchronizer│──▶│ probe: skip  │
//!                    │   (sync)    │   │ or fetch?    │
//!                    └──────┬──────┘   └──────────────┘
//!                           ▼
//!                    ┌─────────────┐
//!                    │  <out>/<id>/ │  metadata + assets
//!                    └─────────────┘
//! ```
//!
//! A terminal page-fetch failure (retries exhausted) stops pagination and
//! fires exactly one detached background re-invocation of the tool (the
//! self-verification run), guarded against recursion by a hidden startup
//! marker.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | Defaults, optional TOML file, CLI overrides |
//! | [`urls`] | Query-parameter merging for page URLs |
//! | [`fetch`] | Page fetching with bounded retries and backoff |
//! | [`models`] | Pages, records, identifier derivation |
//! | [`harvest`] | Pagination orchestration and the run outcome |
//! | [`sync`] | Per-record metadata + asset synchronization |
//! | [`probe`] | Remote metadata probes and skip/fetch decisions |
//! | [`stats`] | Cumulative session accounting |
//! | [`recheck`] | One-shot background self-verification |

pub mod config;
pub mod fetch;
pub mod harvest;
pub mod models;
pub mod probe;
pub mod recheck;
pub mod stats;
pub mod sync;
pub mod urls;
