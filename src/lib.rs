// Copyright 2025 Tomoki Hayashi
// MIT License (https://opensource.org/licenses/MIT)

//! Batch image captioning workspace.
//!
//! Images are grouped into projects, captioned concurrently by a vision
//! model backend, edited in bulk and exported as a training dataset.

pub mod app;
pub mod backend;
pub mod caption;
pub mod clipboard;
pub mod config;
pub mod export;
pub mod import;
pub mod model;
pub mod persist;
pub mod preview;
pub mod scheduler;
pub mod selection;
pub mod store;
pub mod thumbnail;
pub mod ui;
pub mod view;
pub mod virtual_view;
