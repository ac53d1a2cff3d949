//! Per-series metadata extraction on top of a [`PixelFormatReader`].

use std::path::Path;

use crate::error::Result;
use crate::reader::{PixelFormatReader, ReaderFactory, ReaderHandle};
use crate::series::{ChannelMetadata, PixelDatatype, Rgba, SeriesMetadata, NO_NAME};

/// Side-metadata keys holding the stage position, in lookup order.
const POSITION_X_KEYS: &[&str] = &["X position", "Stage X", "PositionX", "XPos"];
const POSITION_Y_KEYS: &[&str] = &["Y position", "Stage Y", "PositionY", "YPos"];

pub struct MetadataExtractor<'a> {
    factory: &'a dyn ReaderFactory,
}

impl<'a> MetadataExtractor<'a> {
    pub fn new(factory: &'a dyn ReaderFactory) -> Self {
        Self { factory }
    }

    pub fn num_series(&self, path: &Path) -> Result<usize> {
        let mut handle = ReaderHandle::new(self.factory.open(path)?);
        let n = handle.reader().series_count();
        handle.close()?;
        Ok(n)
    }

    /// Metadata of every series in `path`, ordered by series number.
    ///
    /// Failing to open the file or to select a series is fatal; a failure in
    /// any single metadata category only falls back to that category's
    /// default. The reader is closed on every exit path.
    pub fn extract(&self, path: &Path) -> Result<Vec<SeriesMetadata>> {
        let mut handle = ReaderHandle::new(self.factory.open(path)?);
        let count = handle.reader().series_count();
        tracing::info!("Extracting {} series from {}", count, path.display());

        let mut all = Vec::with_capacity(count);
        for n in 0..count {
            handle.reader().set_series(n)?;
            all.push(extract_series(handle.reader(), path, n as u32));
        }
        handle.close()?;
        Ok(all)
    }
}

fn fallback<T>(category: &str, path: &Path, series: u32, value: Result<Option<T>>) -> Option<T> {
    match value {
        Ok(v) => v,
        Err(e) => {
            tracing::debug!(
                "{}: could not read {} of series {}: {}",
                path.display(),
                category,
                series,
                e
            );
            None
        }
    }
}

fn extract_series(reader: &dyn PixelFormatReader, path: &Path, n: u32) -> SeriesMetadata {
    let mut s = SeriesMetadata::empty(n);

    s.name = fallback("name", path, n, reader.series_name()).unwrap_or_default();

    if let Some(dims) = fallback("dimensions", path, n, reader.dimensions().map(Some)) {
        s.size_x = dims.x;
        s.size_y = dims.y;
        s.size_z = dims.z;
        s.size_c = dims.c;
        s.size_t = dims.t;
    }

    if let Some(format) = fallback("pixel type", path, n, reader.pixel_format()) {
        s.datatype = PixelDatatype::from_bytes_per_pixel(format.bytes_per_pixel);
        s.is_signed = format.is_signed;
        s.is_little_endian = format.is_little_endian;
    }

    let voxel = fallback("voxel size", path, n, reader.voxel_size().map(Some)).unwrap_or_default();
    s.voxel_x = voxel.x.unwrap_or(f64::NAN);
    // Y borrows X, never the reverse.
    s.voxel_y = voxel.y.or(voxel.x).unwrap_or(f64::NAN);
    s.voxel_z = voxel.z.unwrap_or(f64::NAN);

    s.channels = (0..s.size_c)
        .map(|c| ChannelMetadata {
            name: fallback("channel name", path, n, reader.channel_name(c))
                .map(|name| match name.strip_suffix('\0') {
                    Some(stripped) => stripped.to_string(),
                    None => name,
                })
                .unwrap_or_else(|| NO_NAME.to_string()),
            color: fallback("channel color", path, n, reader.channel_color(c))
                .unwrap_or(Rgba::WHITE),
            em_wavelength: fallback("emission wavelength", path, n, reader.emission_wavelength(c))
                .unwrap_or(f64::NAN),
            ex_wavelength: fallback(
                "excitation wavelength",
                path,
                n,
                reader.excitation_wavelength(c),
            )
            .unwrap_or(f64::NAN),
        })
        .collect();

    s.acquisition_date =
        fallback("acquisition date", path, n, reader.acquisition_date()).unwrap_or_default();

    s.timestamps = (0..s.size_t)
        .map(|t| {
            reader
                .series_metadata_value(&format!("timestamp {}", t))
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(f64::NAN)
        })
        .collect();

    s.numerical_apertures = fallback(
        "numerical aperture",
        path,
        n,
        reader.numerical_apertures().map(Some),
    )
    .unwrap_or_default()
    .into_iter()
    .flatten()
    .collect();

    s.position_x = stage_position(reader, POSITION_X_KEYS);
    s.position_y = stage_position(reader, POSITION_Y_KEYS);

    s
}

fn stage_position(reader: &dyn PixelFormatReader, keys: &[&str]) -> f64 {
    keys.iter()
        .filter_map(|k| reader.series_metadata_value(k))
        .find_map(|v| v.trim().parse().ok())
        .unwrap_or(f64::NAN)
}
