pub mod asset;
pub mod job;
pub mod license;
pub mod status;
