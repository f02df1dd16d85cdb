//! Live Sketchfab API checks
//!
//! These tests need a real account:
//! - `SKETCHFAB_API_TOKEN` (and optionally `SKETCHFAB_API_URL`)
//! - `SKETCHFAB_TEST_MODEL_DIR` pointing at a folder with a small `.glb` for the upload test
//!
//! Run with: cargo test --test integration_test -- --ignored --nocapture

mod fixtures;
mod helpers;

use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use sketchfab_uploader::{
    app_state::PipelineState,
    config::AppConfig,
    models::job::Batch,
    pipeline::run_batch,
    services::{
        catalog::fetch_catalog,
        remote::{ApiToken, SketchfabClient},
    },
};

fn client(config: &AppConfig) -> SketchfabClient {
    SketchfabClient::new(
        &config.api_url,
        config.connect_timeout(),
        config.request_timeout(),
    )
    .expect("Failed to initialize Sketchfab client")
}

#[tokio::test]
#[ignore] // Requires SKETCHFAB_API_TOKEN
async fn test_live_catalog_resolves_known_names() {
    let config = AppConfig::from_env().expect("Failed to load config");
    let client = client(&config);
    let token = ApiToken::new(config.api_token.as_str());

    let catalog = fetch_catalog(&client, &token)
        .await
        .expect("Failed to fetch catalog");

    assert!(!catalog.categories.is_empty());
    assert!(!catalog.licenses.is_empty());
    assert_eq!(
        catalog.resolve_category(fixtures::CATEGORY).unwrap(),
        fixtures::CATEGORY
    );
    assert!(catalog.resolve_license("st").unwrap().is_priced());

    println!(
        "✓ {} categories, {} licenses",
        catalog.categories.len(),
        catalog.licenses.len()
    );
}

#[tokio::test]
#[ignore] // Requires SKETCHFAB_API_TOKEN and SKETCHFAB_TEST_MODEL_DIR; creates a private model
async fn test_live_private_upload() {
    let config = AppConfig::from_env().expect("Failed to load config");
    let folder = PathBuf::from(
        std::env::var("SKETCHFAB_TEST_MODEL_DIR").expect("SKETCHFAB_TEST_MODEL_DIR not set"),
    );

    let mut template = fixtures::free_template();
    template.visibility.private = true;
    template.visibility.published = false;
    let batch = Batch::from_folders("live smoke test", [folder], &template);

    let sink = Arc::new(helpers::RecordingSink::default());
    let state = PipelineState::new(
        Arc::new(client(&config)),
        sink.clone(),
        ApiToken::new(config.api_token.as_str()),
        config.pipeline_config(),
        CancellationToken::new(),
    );

    let report = run_batch(state, batch).await;

    for state in sink.state_path(0) {
        println!("  {state}");
    }
    assert_eq!(report.upload_failed, 0, "upload failed: {:?}", sink.last_event(0));
    assert_eq!(report.finished(), 1);
}
