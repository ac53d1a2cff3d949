use nd2_rs::Nd2File;
use std::path::{Path, PathBuf};

use super::{Dimensions, PixelFormat, PixelFormatReader};
use crate::error::{Error, Result};

/// Nikon ND2 files. Every stage position (`P` axis) is one series.
pub struct Nd2Reader {
    path: PathBuf,
    file: Option<Nd2File>,
    positions: usize,
    dims: Dimensions,
    series: usize,
}

impl Nd2Reader {
    pub fn open(path: &Path) -> Result<Self> {
        let mut nd2 = Nd2File::open(path).map_err(|e| Error::reader(path, e))?;
        let sizes = nd2.sizes().map_err(|e| Error::reader(path, e))?;

        let axis = |key: &str, default: usize| *sizes.get(key).unwrap_or(&default);
        let positions = axis("P", 1);
        let dims = Dimensions {
            x: axis("X", 0),
            y: axis("Y", 0),
            z: axis("Z", 1),
            c: axis("C", 1),
            t: axis("T", 1),
        };
        tracing::debug!(
            "ND2 {}: P={}, T={}, C={}, Z={}",
            path.display(),
            positions,
            dims.t,
            dims.c,
            dims.z
        );

        Ok(Self {
            path: path.to_path_buf(),
            file: Some(nd2),
            positions,
            dims,
            series: 0,
        })
    }
}

impl PixelFormatReader for Nd2Reader {
    fn series_count(&self) -> usize {
        self.positions
    }

    fn set_series(&mut self, series: usize) -> Result<()> {
        if self.file.is_none() {
            return Err(Error::reader(&self.path, "reader is closed"));
        }
        if series >= self.positions {
            return Err(Error::reader(
                &self.path,
                format!("series {} out of range ({} positions)", series, self.positions),
            ));
        }
        self.series = series;
        Ok(())
    }

    fn dimensions(&self) -> Result<Dimensions> {
        Ok(self.dims)
    }

    /// Frames are decoded as 16-bit unsigned little-endian.
    fn pixel_format(&self) -> Result<Option<PixelFormat>> {
        Ok(Some(PixelFormat {
            bytes_per_pixel: 2,
            is_signed: false,
            is_little_endian: true,
        }))
    }

    fn series_name(&self) -> Result<Option<String>> {
        Ok(Some(format!("Pos{}", self.series)))
    }

    fn close(&mut self) -> Result<()> {
        self.file.take();
        Ok(())
    }
}
