//! Error types for the ingestion pipeline.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // Structural / format errors: abort the current manifest.
    #[error("unexpected tag '{found}' (expected {expected})")]
    UnexpectedTag { expected: String, found: String },

    #[error("element '{element}' is missing required attribute '{attribute}'")]
    MissingAttribute { element: String, attribute: String },

    #[error("invalid value '{value}' for attribute '{attribute}'")]
    InvalidAttribute { attribute: String, value: String },

    #[error("unknown composite file type '{0}'")]
    UnknownCompositeType(String),

    #[error("unexpected file name '{0}'")]
    UnmatchedFileName(String),

    #[error("{context}: declared {declared} series but found {found}")]
    SeriesCountMismatch {
        context: String,
        declared: usize,
        found: usize,
    },

    #[error("series {series} is not among the known series indices {known:?}")]
    SeriesNotDeclared { series: u32, known: Vec<u32> },

    #[error("manifest version {found} is obsolete (at least {required} required)")]
    ObsoleteManifest { found: u32, required: u32 },

    #[error("invalid incoming folder {path}: {reason}")]
    InvalidIncoming { path: PathBuf, reason: String },

    #[error("invalid identifier '{0}'")]
    InvalidIdentifier(String),

    // Lookup misses: internal inconsistency between files and metadata.
    #[error("found no channel named '{name}' in series {series}")]
    ChannelNotFound { series: u32, name: String },

    #[error("metadata of series {series} has no key '{key}'")]
    ChannelKeyMissing { series: u32, key: String },

    #[error("series with ID '{0}' could not be found")]
    SeriesIdNotFound(String),

    #[error("could not extract series and channel number from '{0}'")]
    InvalidChannelCode(String),

    #[error("{kind} '{id}' not found")]
    EntityNotFound { kind: &'static str, id: String },

    #[error("{kind} '{id}' already exists")]
    EntityExists { kind: &'static str, id: String },

    // Pixel-format reader.
    #[error("reader error on {path}: {message}")]
    Reader { path: PathBuf, message: String },

    #[error("unsupported file format: {0}")]
    UnsupportedFormat(PathBuf),

    // Export.
    #[error("unknown export mode '{0}'")]
    UnknownExportMode(String),

    #[error("export configuration error: {0}")]
    ExportConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("XML attribute error: {0}")]
    XmlAttribute(#[from] quick_xml::events::attributes::AttrError),

    #[error("regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("directory walk error: {0}")]
    WalkDir(#[from] walkdir::Error),
}

impl Error {
    pub fn reader(path: impl Into<PathBuf>, message: impl std::fmt::Display) -> Self {
        Error::Reader {
            path: path.into(),
            message: message.to_string(),
        }
    }

    pub fn missing(element: &str, attribute: &str) -> Self {
        Error::MissingAttribute {
            element: element.to_string(),
            attribute: attribute.to_string(),
        }
    }

    pub fn invalid(attribute: &str, value: impl Into<String>) -> Self {
        Error::InvalidAttribute {
            attribute: attribute.to_string(),
            value: value.into(),
        }
    }
}
