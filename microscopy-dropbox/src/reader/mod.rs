//! Read-only access to multi-dimensional pixel formats.
//!
//! A [`PixelFormatReader`] exposes the metadata categories the extractor
//! needs. Optional categories default to `Ok(None)` so a backend only
//! implements what its format actually carries.

pub mod nd2;
pub mod tiff;

use std::path::Path;

use crate::error::{Error, Result};
use crate::series::Rgba;

/// Extensions of single files the pipeline recognizes as image data.
pub const RECOGNIZED_EXTENSIONS: &[&str] = &[
    "czi", "dv", "ics", "ids", "ims", "lei", "lif", "liff", "lsm", "nd", "nd2", "oib", "oif",
    "ome", "r3d", "stk", "tif", "tiff", "zvi",
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Dimensions {
    pub x: usize,
    pub y: usize,
    pub z: usize,
    pub c: usize,
    pub t: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelFormat {
    pub bytes_per_pixel: usize,
    pub is_signed: bool,
    pub is_little_endian: bool,
}

/// Physical voxel size in micrometers.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct VoxelSize {
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub z: Option<f64>,
}

pub trait PixelFormatReader {
    fn series_count(&self) -> usize;

    fn set_series(&mut self, series: usize) -> Result<()>;

    fn dimensions(&self) -> Result<Dimensions>;

    fn pixel_format(&self) -> Result<Option<PixelFormat>> {
        Ok(None)
    }

    fn series_name(&self) -> Result<Option<String>> {
        Ok(None)
    }

    fn channel_name(&self, _channel: usize) -> Result<Option<String>> {
        Ok(None)
    }

    fn channel_color(&self, _channel: usize) -> Result<Option<Rgba>> {
        Ok(None)
    }

    fn emission_wavelength(&self, _channel: usize) -> Result<Option<f64>> {
        Ok(None)
    }

    fn excitation_wavelength(&self, _channel: usize) -> Result<Option<f64>> {
        Ok(None)
    }

    fn voxel_size(&self) -> Result<VoxelSize> {
        Ok(VoxelSize::default())
    }

    fn acquisition_date(&self) -> Result<Option<String>> {
        Ok(None)
    }

    /// Numerical aperture of every (instrument, objective) pair.
    fn numerical_apertures(&self) -> Result<Vec<Option<f64>>> {
        Ok(Vec::new())
    }

    /// Format-specific key/value metadata of the current series.
    fn series_metadata_value(&self, _key: &str) -> Option<String> {
        None
    }

    fn close(&mut self) -> Result<()>;
}

pub trait ReaderFactory {
    fn open(&self, path: &Path) -> Result<Box<dyn PixelFormatReader>>;
}

/// Reader factory dispatching on the file extension.
#[derive(Debug, Clone, Copy, Default)]
pub struct FormatReaders;

impl ReaderFactory for FormatReaders {
    fn open(&self, path: &Path) -> Result<Box<dyn PixelFormatReader>> {
        match extension_of(path).as_deref() {
            Some("tif" | "tiff" | "stk") => Ok(Box::new(tiff::TiffReader::open(path)?)),
            Some("nd2") => Ok(Box::new(nd2::Nd2Reader::open(path)?)),
            _ => Err(Error::UnsupportedFormat(path.to_path_buf())),
        }
    }
}

/// Lowercase extension of `path`, if any.
pub fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

pub fn is_recognized(path: &Path) -> bool {
    extension_of(path).is_some_and(|e| RECOGNIZED_EXTENSIONS.contains(&e.as_str()))
}

/// An open reader that is closed exactly once, on [`ReaderHandle::close`]
/// or on drop.
pub struct ReaderHandle {
    reader: Box<dyn PixelFormatReader>,
    closed: bool,
}

impl ReaderHandle {
    pub fn new(reader: Box<dyn PixelFormatReader>) -> Self {
        Self {
            reader,
            closed: false,
        }
    }

    pub fn reader(&mut self) -> &mut dyn PixelFormatReader {
        self.reader.as_mut()
    }

    pub fn close(mut self) -> Result<()> {
        self.closed = true;
        self.reader.close()
    }
}

impl Drop for ReaderHandle {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.reader.close() {
                tracing::warn!("Failed to close reader: {}", e);
            }
        }
    }
}
