//! End-to-end harvests against a local stub collection server.
//!
//! Covers the retry bound, the skip/fetch idempotence of re-runs, the
//! master-tier upgrade and its fallback, the HEAD→ranged-GET probe
//! fallback, and the one-shot self-verification trigger.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::extract::Query;
use axum::http::{header, HeaderMap, Method, StatusCode};
use axum::response::IntoResponse;
use axum::routing::any;
use axum::{Json, Router};
use serde_json::json;
use tempfile::TempDir;

use loc_harvest::config::Config;
use loc_harvest::fetch::PageFetcher;
use loc_harvest::harvest::{run_harvest, HarvestOutcome, Session};
use loc_harvest::models::Record;
use loc_harvest::probe;
use loc_harvest::recheck::Respawn;
use loc_harvest::stats::SessionStats;
use loc_harvest::sync;

/// Bind an ephemeral port now so handlers can embed absolute URLs, serve
/// the router in the background once it is built.
async fn bind() -> (tokio::net::TcpListener, String) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    (listener, base)
}

fn serve(listener: tokio::net::TcpListener, app: Router) {
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
}

fn test_config(base: &str, out: &TempDir) -> Config {
    Config {
        base_url: format!("{base}/collection/"),
        output_dir: out.path().to_path_buf(),
        per_page: 10,
        delay_secs: 0.0,
        max_retries: 2,
        backoff_ms: 1,
        timeout_secs: 5,
        ..Config::default()
    }
}

struct Recorder {
    calls: Arc<AtomicUsize>,
}

impl Respawn for Recorder {
    fn respawn(&self, _config: &Config) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn recording_session(config: &Config) -> (Session, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let session = Session::new(
        config,
        Box::new(Recorder {
            calls: calls.clone(),
        }),
    )
    .unwrap();
    (session, calls)
}

#[tokio::test]
async fn test_two_page_harvest_completes_naturally() {
    let (listener, base) = bind().await;
    let page_hits = Arc::new(AtomicUsize::new(0));

    let app = Router::new()
        .route("/collection/", {
            let page_hits = page_hits.clone();
            let base = base.clone();
            any(move |Query(q): Query<HashMap<String, String>>| {
                let page_hits = page_hits.clone();
                let base = base.clone();
                async move {
                    page_hits.fetch_add(1, Ordering::SeqCst);
                    match q.get("sp").map(String::as_str) {
                        Some("1") => Json(json!({
                            "results": [
                                {
                                    "id": "item-a",
                                    "resources": [
                                        {"files": {"preview": format!("{base}/pix/photo-a.jpg")}}
                                    ]
                                },
                                {"id": "item-b", "title": "no images here"}
                            ]
                        })),
                        _ => Json(json!({"results": []})),
                    }
                }
            })
        })
        .route(
            "/pix/photo-a.jpg",
            any(|| async {
                (
                    [(header::CONTENT_TYPE, "image/jpeg")],
                    b"jpeg-bytes".to_vec(),
                )
            }),
        );
    serve(listener, app);

    let out = TempDir::new().unwrap();
    let config = test_config(&base, &out);
    let (mut session, respawns) = recording_session(&config);

    let outcome = run_harvest(&config, &mut session).await.unwrap();

    match outcome {
        HarvestOutcome::CompletedNaturally { pages, records } => {
            assert_eq!(pages, 2);
            assert_eq!(records, 2);
        }
        other => panic!("expected natural completion, got {other:?}"),
    }
    assert_eq!(page_hits.load(Ordering::SeqCst), 2);
    assert_eq!(respawns.load(Ordering::SeqCst), 0);

    // two metadata documents, one downloaded asset
    assert!(out.path().join("item_a/item.json").exists());
    assert!(out.path().join("item_b/item.json").exists());
    let asset = std::fs::read(out.path().join("item_a/photo-a.jpg")).unwrap();
    assert_eq!(asset, b"jpeg-bytes");
    assert!(!out.path().join("item_b/photo-a.jpg").exists());

    assert_eq!(session.stats.image_sets(), 1);
    assert_eq!(session.stats.image_bytes(), 10);
}

#[tokio::test]
async fn test_master_tier_upgrade_preferred_when_reachable() {
    let (listener, base) = bind().await;

    let app = Router::new()
        .route("/collection/", {
            let base = base.clone();
            any(move |Query(q): Query<HashMap<String, String>>| {
                let base = base.clone();
                async move {
                    match q.get("sp").map(String::as_str) {
                        Some("1") => Json(json!({
                            "results": [{
                                "id": "rec1",
                                "image_url": format!("{base}/storage/service/pnp/item/0001r.jpg")
                            }]
                        })),
                        _ => Json(json!({"results": []})),
                    }
                }
            })
        })
        .route(
            "/storage/master/pnp/item/0001u.tif",
            any(|| async {
                (
                    [(header::CONTENT_TYPE, "image/tiff")],
                    b"master-tier-bytes".to_vec(),
                )
            }),
        )
        .route(
            "/storage/service/pnp/item/0001r.jpg",
            any(|| async {
                (
                    [(header::CONTENT_TYPE, "image/jpeg")],
                    b"service-bytes".to_vec(),
                )
            }),
        );
    serve(listener, app);

    let out = TempDir::new().unwrap();
    let config = test_config(&base, &out);
    let (mut session, _) = recording_session(&config);

    run_harvest(&config, &mut session).await.unwrap();

    // the master tier won, and the metadata document is named by its stem
    let tif = std::fs::read(out.path().join("rec1/0001u.tif")).unwrap();
    assert_eq!(tif, b"master-tier-bytes");
    assert!(out.path().join("rec1/0001.json").exists());
    assert!(!out.path().join("rec1/0001r.jpg").exists());
}

#[tokio::test]
async fn test_service_tier_fallback_when_master_unreachable() {
    let (listener, base) = bind().await;

    let app = Router::new()
        .route("/collection/", {
            let base = base.clone();
            any(move |Query(q): Query<HashMap<String, String>>| {
                let base = base.clone();
                async move {
                    match q.get("sp").map(String::as_str) {
                        Some("1") => Json(json!({
                            "results": [{
                                "id": "rec1",
                                "image_url": format!("{base}/storage/service/pnp/item/0001r.jpg")
                            }]
                        })),
                        _ => Json(json!({"results": []})),
                    }
                }
            })
        })
        // no master route at all: the probe 404s and the service tier wins
        .route(
            "/storage/service/pnp/item/0001r.jpg",
            any(|| async {
                (
                    [(header::CONTENT_TYPE, "image/jpeg")],
                    b"service-bytes".to_vec(),
                )
            }),
        );
    serve(listener, app);

    let out = TempDir::new().unwrap();
    let config = test_config(&base, &out);
    let (mut session, _) = recording_session(&config);

    run_harvest(&config, &mut session).await.unwrap();

    let jpg = std::fs::read(out.path().join("rec1/0001r.jpg")).unwrap();
    assert_eq!(jpg, b"service-bytes");
    assert!(out.path().join("rec1/0001.json").exists());
}

#[tokio::test]
async fn test_second_run_transfers_nothing() {
    let (listener, base) = bind().await;
    let body_gets = Arc::new(AtomicUsize::new(0));

    let app = Router::new()
        .route("/collection/", {
            let base = base.clone();
            any(move |Query(q): Query<HashMap<String, String>>| {
                let base = base.clone();
                async move {
                    match q.get("sp").map(String::as_str) {
                        Some("1") => Json(json!({
                            "results": [{
                                "id": "rec-1",
                                "image": format!("{base}/img/photo.jpg")
                            }]
                        })),
                        _ => Json(json!({"results": []})),
                    }
                }
            })
        })
        .route("/img/photo.jpg", {
            let body_gets = body_gets.clone();
            any(move |method: Method| {
                let body_gets = body_gets.clone();
                async move {
                    if method == Method::GET {
                        body_gets.fetch_add(1, Ordering::SeqCst);
                    }
                    (
                        [(header::CONTENT_TYPE, "image/jpeg")],
                        b"imagebytes".to_vec(),
                    )
                }
            })
        });
    serve(listener, app);

    let out = TempDir::new().unwrap();
    let config = test_config(&base, &out);

    let (mut session, _) = recording_session(&config);
    let outcome = run_harvest(&config, &mut session).await.unwrap();
    assert!(matches!(
        outcome,
        HarvestOutcome::CompletedNaturally { .. }
    ));
    assert_eq!(body_gets.load(Ordering::SeqCst), 1);
    assert_eq!(session.stats.image_sets(), 1);
    assert_eq!(session.stats.image_bytes(), 10);

    // a second pass over the same record: no downloads, no rewrites,
    // fresh counters stay at zero
    let record = Record {
        raw: json!({"id": "rec-1", "image": format!("{base}/img/photo.jpg")}),
        position: 1,
    };
    let client = reqwest::Client::new();
    let mut stats = SessionStats::new();
    let outcome = sync::sync_record(&client, &config, &record, &mut stats)
        .await
        .unwrap();

    assert!(!outcome.json_written);
    assert_eq!(outcome.images_written, 0);
    assert_eq!(outcome.bytes_written, 0);
    assert_eq!(body_gets.load(Ordering::SeqCst), 1);
    assert_eq!(stats.image_sets(), 0);
    assert_eq!(stats.image_bytes(), 0);
}

#[tokio::test]
async fn test_retry_bound_with_always_failing_source() {
    let (listener, base) = bind().await;
    let hits = Arc::new(AtomicUsize::new(0));

    let app = Router::new().route("/collection/", {
        let hits = hits.clone();
        any(move || {
            let hits = hits.clone();
            async move {
                hits.fetch_add(1, Ordering::SeqCst);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        })
    });
    serve(listener, app);

    let out = TempDir::new().unwrap();
    let mut config = test_config(&base, &out);
    config.max_retries = 3;

    let fetcher = PageFetcher::new(reqwest::Client::new(), &config);
    let failure = fetcher.fetch(1).await.unwrap_err();

    assert_eq!(failure.page, 1);
    assert_eq!(failure.attempts, 3);
    assert_eq!(hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_retry_stops_immediately_on_success() {
    let (listener, base) = bind().await;
    let hits = Arc::new(AtomicUsize::new(0));

    let app = Router::new().route("/collection/", {
        let hits = hits.clone();
        any(move || {
            let hits = hits.clone();
            async move {
                // fail twice, then serve a valid empty page
                if hits.fetch_add(1, Ordering::SeqCst) < 2 {
                    StatusCode::INTERNAL_SERVER_ERROR.into_response()
                } else {
                    Json(json!({"results": []})).into_response()
                }
            }
        })
    });
    serve(listener, app);

    let out = TempDir::new().unwrap();
    let mut config = test_config(&base, &out);
    config.max_retries = 5;

    let fetcher = PageFetcher::new(reqwest::Client::new(), &config);
    let page = fetcher.fetch(1).await.unwrap();

    assert!(!page.has_more());
    assert_eq!(hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_self_check_fires_once_after_healthy_page() {
    let (listener, base) = bind().await;

    let app = Router::new().route(
        "/collection/",
        any(|Query(q): Query<HashMap<String, String>>| async move {
            match q.get("sp").map(String::as_str) {
                Some("1") => Json(json!({"results": [{"id": "only"}]})).into_response(),
                _ => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
            }
        }),
    );
    serve(listener, app);

    let out = TempDir::new().unwrap();
    let config = test_config(&base, &out);
    let (mut session, respawns) = recording_session(&config);

    let outcome = run_harvest(&config, &mut session).await.unwrap();

    match outcome {
        HarvestOutcome::StoppedOnFetchFailure { page } => assert_eq!(page, 2),
        other => panic!("expected fetch failure, got {other:?}"),
    }
    assert_eq!(respawns.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_self_check_child_never_spawns() {
    let (listener, base) = bind().await;

    let app = Router::new().route(
        "/collection/",
        any(|Query(q): Query<HashMap<String, String>>| async move {
            match q.get("sp").map(String::as_str) {
                Some("1") => Json(json!({"results": [{"id": "only"}]})).into_response(),
                _ => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
            }
        }),
    );
    serve(listener, app);

    let out = TempDir::new().unwrap();
    let mut config = test_config(&base, &out);
    config.self_check_run = true;
    let (mut session, respawns) = recording_session(&config);

    let outcome = run_harvest(&config, &mut session).await.unwrap();

    assert!(matches!(
        outcome,
        HarvestOutcome::StoppedOnFetchFailure { page: 2 }
    ));
    assert_eq!(respawns.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_no_self_check_when_first_page_fails() {
    let (listener, base) = bind().await;

    let app = Router::new().route(
        "/collection/",
        any(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
    );
    serve(listener, app);

    let out = TempDir::new().unwrap();
    let config = test_config(&base, &out);
    let (mut session, respawns) = recording_session(&config);

    let outcome = run_harvest(&config, &mut session).await.unwrap();

    assert!(matches!(
        outcome,
        HarvestOutcome::StoppedOnFetchFailure { page: 1 }
    ));
    assert_eq!(respawns.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_probe_falls_back_to_ranged_get_on_405() {
    let (listener, base) = bind().await;

    let app = Router::new().route(
        "/guarded/asset.jpg",
        any(|method: Method, headers: HeaderMap| async move {
            match method {
                Method::HEAD => StatusCode::METHOD_NOT_ALLOWED.into_response(),
                Method::GET if headers.contains_key(header::RANGE) => (
                    StatusCode::PARTIAL_CONTENT,
                    [
                        (header::CONTENT_RANGE, "bytes 0-0/8"),
                        (header::CONTENT_TYPE, "image/jpeg"),
                    ],
                    b"x".to_vec(),
                )
                    .into_response(),
                _ => b"12345678".to_vec().into_response(),
            }
        }),
    );
    serve(listener, app);

    let client = reqwest::Client::new();
    let info = probe::remote_info(&client, &format!("{base}/guarded/asset.jpg"))
        .await
        .unwrap();

    assert_eq!(info.content_length, Some(8));
    assert_eq!(info.content_type.as_deref(), Some("image/jpeg"));
}

#[tokio::test]
async fn test_force_redownloads_unchanged_content() {
    let (listener, base) = bind().await;
    let body_gets = Arc::new(AtomicUsize::new(0));

    let app = Router::new().route("/img/photo.jpg", {
        let body_gets = body_gets.clone();
        any(move |method: Method| {
            let body_gets = body_gets.clone();
            async move {
                if method == Method::GET {
                    body_gets.fetch_add(1, Ordering::SeqCst);
                }
                (
                    [(header::CONTENT_TYPE, "image/jpeg")],
                    b"imagebytes".to_vec(),
                )
            }
        })
    });
    serve(listener, app);

    let out = TempDir::new().unwrap();
    let mut config = test_config(&base, &out);
    config.skip_existing = false;

    let record = Record {
        raw: json!({"id": "rec-1", "image": format!("{base}/img/photo.jpg")}),
        position: 1,
    };
    let client = reqwest::Client::new();

    let mut stats = SessionStats::new();
    for _ in 0..2 {
        let outcome = sync::sync_record(&client, &config, &record, &mut stats)
            .await
            .unwrap();
        assert!(outcome.json_written);
        assert_eq!(outcome.images_written, 1);
    }
    assert_eq!(body_gets.load(Ordering::SeqCst), 2);
    assert_eq!(stats.image_sets(), 2);
    assert_eq!(stats.image_bytes(), 20);
}
