//! Query-parameter merging for collection page URLs.
//!
//! The collection API is addressed by appending `fo`/`c`/`sp` parameters to a
//! base URL that may already carry its own query string (facets, search
//! terms). Merging must preserve whatever is already there and only
//! override the keys we need.

use anyhow::{Context, Result};
use reqwest::Url;

/// Merge `params` into `base`, preserving pre-existing query parameters.
///
/// Every key in `params` ends up present with the given value; same-named
/// existing parameters are replaced, all others are kept unchanged. No
/// ordering is guaranteed.
pub fn with_params(base: &str, params: &[(&str, String)]) -> Result<Url> {
    let url: Url = base
        .parse()
        .with_context(|| format!("invalid base URL: {base}"))?;

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !params.iter().any(|(pk, _)| *pk == k.as_ref()))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    let mut merged = url;
    merged.set_query(None);
    {
        let mut pairs = merged.query_pairs_mut();
        for (k, v) in &kept {
            pairs.append_pair(k, v);
        }
        for (k, v) in params {
            pairs.append_pair(k, v);
        }
    }

    Ok(merged)
}
