//! 3D generation watcher
//!
//! Submits an image to a remote image-to-3D job service, polls the job in
//! the background, downloads the resulting model files and publishes the
//! newest one behind a local URL with a human-readable status line.

pub mod app_state;
pub mod config;
pub mod models;
pub mod routes;
pub mod services;
