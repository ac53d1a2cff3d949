use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use tiff::decoder::ifd::Value;
use tiff::decoder::Decoder;
use tiff::tags::Tag;
use tiff::ColorType;

use super::{Dimensions, PixelFormat, PixelFormatReader, VoxelSize};
use crate::error::{Error, Result};

/// TIFF and MetaMorph STK files. Always a single series; all tags are read
/// on open and the file is released right away.
#[derive(Debug)]
pub struct TiffReader {
    path: PathBuf,
    dims: Dimensions,
    format: Option<PixelFormat>,
    voxel: VoxelSize,
    date: Option<String>,
    description: HashMap<String, String>,
}

impl TiffReader {
    pub fn open(path: &Path) -> Result<Self> {
        let mut file = File::open(path)?;
        let mut bom = [0u8; 2];
        file.read_exact(&mut bom)?;
        let is_little_endian = match &bom {
            b"II" => true,
            b"MM" => false,
            _ => return Err(Error::reader(path, "not a TIFF file")),
        };
        let file = File::open(path)?;
        let mut decoder =
            Decoder::new(BufReader::new(file)).map_err(|e| Error::reader(path, e))?;

        let (width, height) = decoder.dimensions().map_err(|e| Error::reader(path, e))?;
        let colortype = decoder.colortype().map_err(|e| Error::reader(path, e))?;
        let sample_format = decoder
            .find_tag(Tag::SampleFormat)
            .ok()
            .flatten()
            .and_then(|v| value_u32(&v))
            .unwrap_or(1);
        let description = decoder
            .get_tag_ascii_string(Tag::ImageDescription)
            .map(|d| parse_imagej_description(&d))
            .unwrap_or_default();
        let x_res = rational_tag(&mut decoder, Tag::XResolution);
        let y_res = rational_tag(&mut decoder, Tag::YResolution);
        let unit = decoder
            .find_tag(Tag::ResolutionUnit)
            .ok()
            .flatten()
            .and_then(|v| value_u32(&v));
        let date = decoder
            .get_tag_ascii_string(Tag::DateTime)
            .ok()
            .map(|d| normalize_tiff_date(&d));

        let mut pages = 1;
        while decoder.more_images() {
            decoder.next_image().map_err(|e| Error::reader(path, e))?;
            pages += 1;
        }

        let (samples, bits) = samples_and_bits(colortype);
        let format = (bits > 0).then(|| PixelFormat {
            bytes_per_pixel: (bits as usize).div_ceil(8),
            is_signed: sample_format == 2,
            is_little_endian,
        });

        let dims = if description.contains_key("ImageJ") {
            Dimensions {
                x: width as usize,
                y: height as usize,
                z: description_count(&description, "slices"),
                c: description_count(&description, "channels"),
                t: description_count(&description, "frames"),
            }
        } else {
            Dimensions {
                x: width as usize,
                y: height as usize,
                z: pages,
                c: samples,
                t: 1,
            }
        };

        let voxel = voxel_size(&description, unit, x_res, y_res);

        tracing::debug!(
            "Opened TIFF {} ({}x{}, {} pages)",
            path.display(),
            width,
            height,
            pages
        );

        Ok(Self {
            path: path.to_path_buf(),
            dims,
            format,
            voxel,
            date,
            description,
        })
    }
}

impl PixelFormatReader for TiffReader {
    fn series_count(&self) -> usize {
        1
    }

    fn set_series(&mut self, series: usize) -> Result<()> {
        if series != 0 {
            return Err(Error::reader(
                &self.path,
                format!("series {} out of range (1 series)", series),
            ));
        }
        Ok(())
    }

    fn dimensions(&self) -> Result<Dimensions> {
        Ok(self.dims)
    }

    fn pixel_format(&self) -> Result<Option<PixelFormat>> {
        Ok(self.format)
    }

    fn series_name(&self) -> Result<Option<String>> {
        Ok(self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned()))
    }

    fn voxel_size(&self) -> Result<VoxelSize> {
        Ok(self.voxel)
    }

    fn acquisition_date(&self) -> Result<Option<String>> {
        Ok(self.date.clone())
    }

    fn series_metadata_value(&self, key: &str) -> Option<String> {
        self.description.get(key).cloned()
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

fn samples_and_bits(colortype: ColorType) -> (usize, u8) {
    match colortype {
        ColorType::Gray(b) => (1, b),
        ColorType::GrayA(b) => (2, b),
        ColorType::RGB(b) => (3, b),
        ColorType::RGBA(b) => (4, b),
        ColorType::Palette(b) => (1, b),
        _ => (1, 0),
    }
}

fn value_u32(value: &Value) -> Option<u32> {
    match value {
        Value::Byte(v) => Some(*v as u32),
        Value::Short(v) => Some(*v as u32),
        Value::Unsigned(v) => Some(*v),
        Value::List(values) => values.first().and_then(value_u32),
        _ => None,
    }
}

fn rational_tag<R: std::io::Read + std::io::Seek>(
    decoder: &mut Decoder<R>,
    tag: Tag,
) -> Option<f64> {
    match decoder.find_tag(tag).ok().flatten()? {
        Value::Rational(n, d) if d != 0 => Some(n as f64 / d as f64),
        Value::Float(v) => Some(v as f64),
        Value::Double(v) => Some(v),
        other => value_u32(&other).map(f64::from),
    }
}

/// `key=value` lines of an ImageJ description. The `ImageJ` key marks
/// a description written by ImageJ.
fn parse_imagej_description(description: &str) -> HashMap<String, String> {
    description
        .lines()
        .filter_map(|line| line.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect()
}

fn description_count(description: &HashMap<String, String>, key: &str) -> usize {
    description
        .get(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(1)
}

fn voxel_size(
    description: &HashMap<String, String>,
    unit: Option<u32>,
    x_res: Option<f64>,
    y_res: Option<f64>,
) -> VoxelSize {
    let imagej_unit = description.get("unit").map(String::as_str);
    let microns_per_unit = match (imagej_unit, unit) {
        (Some("micron" | "um" | "\\u00B5m" | "µm"), _) => Some(1.0),
        // Centimeter
        (_, Some(3)) => Some(10_000.0),
        _ => None,
    };
    let to_size = |res: Option<f64>| match (microns_per_unit, res) {
        (Some(scale), Some(r)) if r > 0.0 => Some(scale / r),
        _ => None,
    };
    VoxelSize {
        x: to_size(x_res),
        y: to_size(y_res),
        z: description
            .get("spacing")
            .and_then(|v| v.parse().ok())
            .filter(|_| microns_per_unit.is_some()),
    }
}

fn normalize_tiff_date(raw: &str) -> String {
    let raw = raw.trim_end_matches('\0').trim();
    match chrono::NaiveDateTime::parse_from_str(raw, "%Y:%m:%d %H:%M:%S") {
        Ok(dt) => dt.format("%Y-%m-%dT%H:%M:%S").to_string(),
        Err(_) => raw.to_string(),
    }
}
