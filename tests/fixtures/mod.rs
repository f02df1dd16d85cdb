//! Shared job templates and pipeline settings for integration tests

#![allow(dead_code)]

use std::path::Path;

use sketchfab_uploader::config::PipelineConfig;
use sketchfab_uploader::models::job::{JobTemplate, Visibility};
use sketchfab_uploader::models::license::License;

pub const CATEGORY: &str = "furniture-home";

/// Template shared by every job of a test batch.
pub fn template(license: License, price: Option<&str>) -> JobTemplate {
    JobTemplate {
        description: "Uploaded by the integration tests".to_string(),
        tags: vec!["test".to_string(), "lowpoly".to_string()],
        categories: vec![CATEGORY.to_string()],
        license,
        visibility: Visibility::default(),
        password: None,
        price: price.map(str::to_string),
    }
}

/// A free license that never needs a patch.
pub fn free_template() -> JobTemplate {
    template(License::Other("by".to_string()), None)
}

/// Production timings, with archives staged under `staging`. Tests run on
/// paused time so the fixed waits cost nothing.
pub fn config(staging: &Path) -> PipelineConfig {
    PipelineConfig {
        staging_dir: staging.to_path_buf(),
        ..PipelineConfig::default()
    }
}
