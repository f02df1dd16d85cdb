//! Sketchfab batch uploader
//!
//! This library provides the upload pipeline behind the `sketchfab-uploader`
//! binary: packaging model folders, creating models through the Sketchfab
//! Data API, watching their processing, and applying sold licenses and prices
//! once processing has finished.

pub mod app_state;
pub mod config;
pub mod models;
pub mod pipeline;
pub mod services;
