//! Microscopy metadata ingestion.
//!
//! Extracts per-series metadata from microscope files, regroups composite
//! multi-file acquisitions by file name, registers the result into a host
//! data model and exports registered datasets back to users.

pub mod dataset_config;
pub mod error;
pub mod export;
pub mod extractor;
pub mod files;
pub mod host;
pub mod local_store;
pub mod manifest;
pub mod pattern;
pub mod processor;
pub mod reader;
pub mod series;
pub mod settings;
pub mod slices;

pub use error::{Error, Result};
