//! Channel names, colors and thumbnail policy of image datasets.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::pattern::{ChannelCode, ColorScale, ImageFileDescriptor};
use crate::series::{SeriesAttributes, NO_NAME};

pub const IMAGE_DATASET_TYPE: &str = "MICROSCOPY_IMG";
pub const THUMBNAIL_DATASET_TYPE: &str = "MICROSCOPY_IMG_THUMBNAIL";

const WHITE: [u8; 3] = [255, 255, 255];

const PALETTE: [[u8; 3]; 6] = [
    [255, 0, 0],
    [0, 255, 0],
    [0, 0, 255],
    [255, 255, 0],
    [255, 0, 255],
    [0, 255, 255],
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Channel {
    pub code: String,
    pub name: String,
    pub color: [u8; 3],
}

/// Maximum-intensity projection rendered as the dataset's representative image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepresentativeImage {
    pub dataset_type: String,
    pub width: u32,
    pub height: u32,
    pub file_name: String,
}

impl Default for RepresentativeImage {
    fn default() -> Self {
        Self {
            dataset_type: THUMBNAIL_DATASET_TYPE.to_string(),
            width: 256,
            height: 256,
            file_name: "thumbnail.png".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThumbnailPolicy {
    /// Pre-render image representations at `resolutions`.
    pub generate: bool,
    pub resolutions: Vec<String>,
    pub representative: Option<RepresentativeImage>,
}

/// Everything the host needs to register one series as an image dataset.
#[derive(Debug, Clone, Serialize)]
pub struct ImageDatasetConfig {
    pub dataset_type: String,
    pub series: u32,
    pub channels: Vec<Channel>,
    /// Per-file placement for composite acquisitions; empty for single files.
    pub images: Vec<ImageSpec>,
    pub thumbnails: ThumbnailPolicy,
    pub recognized_extensions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageSpec {
    pub path: String,
    pub channel_code: String,
    pub timepoint: u32,
    pub plane: u32,
    pub tile_number: u32,
    pub well: String,
}

impl From<&ImageFileDescriptor> for ImageSpec {
    fn from(d: &ImageFileDescriptor) -> Self {
        Self {
            path: d.path.clone(),
            channel_code: d.channel_code().to_string(),
            timepoint: d.timepoint,
            plane: d.plane,
            tile_number: d.tile_number,
            well: d.well.clone(),
        }
    }
}

/// Resolves channels and thumbnails for the series of one file or folder.
#[derive(Debug, Clone)]
pub struct DatasetConfigResolver<'a> {
    series_indices: &'a [u32],
    all_series: &'a [SeriesAttributes],
    scale: ColorScale,
    resolutions: Vec<String>,
    dataset_channels: Option<usize>,
}

impl<'a> DatasetConfigResolver<'a> {
    /// `all_series[i]` holds the attributes of series `series_indices[i]`.
    pub fn new(
        series_indices: &'a [u32],
        all_series: &'a [SeriesAttributes],
        scale: ColorScale,
        resolutions: Vec<String>,
    ) -> Self {
        Self {
            series_indices,
            all_series,
            scale,
            resolutions,
            dataset_channels: None,
        }
    }

    /// Number of distinct channels in the whole dataset, when known from
    /// outside the series metadata.
    pub fn with_dataset_channels(mut self, count: usize) -> Self {
        self.dataset_channels = Some(count);
        self
    }

    fn position(&self, series: u32) -> Result<usize> {
        self.series_indices
            .iter()
            .position(|&s| s == series)
            .ok_or_else(|| Error::SeriesNotDeclared {
                series,
                known: self.series_indices.to_vec(),
            })
    }

    fn attributes(&self, series: u32) -> Result<&'a SeriesAttributes> {
        let position = self.position(series)?;
        self.all_series
            .get(position)
            .ok_or_else(|| Error::SeriesCountMismatch {
                context: "series metadata".to_string(),
                declared: self.series_indices.len(),
                found: self.all_series.len(),
            })
    }

    pub fn channel_name(&self, series: u32, channel: u32) -> Result<String> {
        let key = format!("channelName{}", channel);
        let name = self
            .attributes(series)?
            .get(&key)
            .ok_or(Error::ChannelKeyMissing { series, key })?;
        if name.is_empty() {
            Ok(NO_NAME.to_string())
        } else {
            Ok(name.to_string())
        }
    }

    pub fn channel_color(&self, series: u32, channel: u32) -> Result<[u8; 3]> {
        let attributes = self.attributes(series)?;
        let declared = attributes
            .get(&format!("channelColor{}", channel))
            .filter(|v| !v.trim().is_empty());
        let color = match declared {
            Some(raw) => parse_color(raw, self.scale)?,
            None => {
                let total = self.dataset_channels.unwrap_or_else(|| {
                    attributes
                        .get("sizeC")
                        .and_then(|v| v.parse().ok())
                        .unwrap_or_else(|| attributes.channel_count())
                });
                if total == 1 {
                    WHITE
                } else {
                    fallback_color(series, channel)
                }
            }
        };
        if color == [0, 0, 0] {
            tracing::info!("Color of {} changed from (0, 0, 0) to white", ChannelCode { series, channel });
            return Ok(WHITE);
        }
        Ok(color)
    }

    pub fn channel_for(&self, series: u32, channel: u32) -> Result<Channel> {
        Ok(Channel {
            code: ChannelCode { series, channel }.to_string(),
            name: self.channel_name(series, channel)?,
            color: self.channel_color(series, channel)?,
        })
    }

    pub fn create_channel(&self, code: &str) -> Result<Channel> {
        let code: ChannelCode = code.parse()?;
        self.channel_for(code.series, code.channel)
    }

    /// Only the first of the known series gets a representative image.
    pub fn thumbnail_policy_for(&self, series: u32) -> Result<ThumbnailPolicy> {
        let position = self.position(series)?;
        Ok(ThumbnailPolicy {
            generate: !self.resolutions.is_empty(),
            resolutions: self.resolutions.clone(),
            representative: (position == 0).then(RepresentativeImage::default),
        })
    }
}

/// Parse `R,G,B[,A]` into 0..255 components.
pub fn parse_color(raw: &str, scale: ColorScale) -> Result<[u8; 3]> {
    let parts: Vec<f64> = raw
        .split(',')
        .map(|p| p.trim().parse::<f64>())
        .collect::<std::result::Result<_, _>>()
        .map_err(|_| Error::invalid("channelColor", raw))?;
    if parts.len() < 3 {
        return Err(Error::invalid("channelColor", raw));
    }
    let factor = match scale {
        ColorScale::Byte => 1.0,
        ColorScale::Unit => 255.0,
    };
    let component = |v: f64| (v * factor).clamp(0.0, 255.0) as u8;
    Ok([component(parts[0]), component(parts[1]), component(parts[2])])
}

/// Palette color by channel index; beyond the palette a random color that
/// is stable for a given (series, channel).
pub fn fallback_color(series: u32, channel: u32) -> [u8; 3] {
    if let Some(color) = PALETTE.get(channel as usize) {
        return *color;
    }
    let mut rng = StdRng::seed_from_u64(((series as u64) << 32) | channel as u64);
    [rng.gen(), rng.gen(), rng.gen()]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(pairs: &[(&str, &str)]) -> SeriesAttributes {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn names_come_from_metadata_with_no_name_fallback() {
        let all = vec![attrs(&[("channelName0", "DAPI"), ("channelName1", "")])];
        let r = DatasetConfigResolver::new(&[4], &all, ColorScale::Byte, vec![]);
        assert_eq!(r.channel_name(4, 0).unwrap(), "DAPI");
        assert_eq!(r.channel_name(4, 1).unwrap(), NO_NAME);
        assert!(matches!(
            r.channel_name(4, 2),
            Err(Error::ChannelKeyMissing { .. })
        ));
        assert!(matches!(
            r.channel_name(5, 0),
            Err(Error::SeriesNotDeclared { .. })
        ));
    }

    #[test]
    fn colors_follow_the_variant_scale() {
        let all = vec![attrs(&[("channelColor0", "0.5,1.0,0")])];
        let unit = DatasetConfigResolver::new(&[0], &all, ColorScale::Unit, vec![]);
        assert_eq!(unit.channel_color(0, 0).unwrap(), [127, 255, 0]);

        let all = vec![attrs(&[("channelColor0", "12,34,56,255")])];
        let byte = DatasetConfigResolver::new(&[0], &all, ColorScale::Byte, vec![]);
        assert_eq!(byte.channel_color(0, 0).unwrap(), [12, 34, 56]);
    }

    #[test]
    fn missing_colors_use_the_palette() {
        let all = vec![attrs(&[("sizeC", "7")])];
        let r = DatasetConfigResolver::new(&[0], &all, ColorScale::Byte, vec![]);
        let colors: Vec<_> = (0..6).map(|c| r.channel_color(0, c).unwrap()).collect();
        assert_eq!(colors, PALETTE.to_vec());
    }

    #[test]
    fn random_fallback_is_stable() {
        let all = vec![attrs(&[("sizeC", "9")])];
        let r = DatasetConfigResolver::new(&[0], &all, ColorScale::Byte, vec![]);
        assert_eq!(r.channel_color(0, 8).unwrap(), r.channel_color(0, 8).unwrap());
        assert_eq!(fallback_color(2, 7), fallback_color(2, 7));
    }

    #[test]
    fn single_channel_falls_back_to_white() {
        let all = vec![attrs(&[("sizeC", "1"), ("channelName0", "BF")])];
        let r = DatasetConfigResolver::new(&[0], &all, ColorScale::Byte, vec![]);
        assert_eq!(r.channel_color(0, 0).unwrap(), WHITE);

        let all = vec![attrs(&[("channelName0", "a"), ("channelName1", "b")])];
        let r = DatasetConfigResolver::new(&[0], &all, ColorScale::Unit, vec![])
            .with_dataset_channels(1);
        assert_eq!(r.channel_color(0, 0).unwrap(), WHITE);
    }

    #[test]
    fn black_becomes_white() {
        let all = vec![attrs(&[("channelColor0", "0,0,0,255")])];
        let r = DatasetConfigResolver::new(&[0], &all, ColorScale::Byte, vec![]);
        assert_eq!(r.channel_color(0, 0).unwrap(), WHITE);
    }

    #[test]
    fn create_channel_parses_code() {
        let all = vec![
            attrs(&[]),
            attrs(&[("channelName0", "GFP"), ("sizeC", "2")]),
        ];
        let r = DatasetConfigResolver::new(&[0, 3], &all, ColorScale::Byte, vec![]);
        let ch = r.create_channel("SERIES-3_CHANNEL-0").unwrap();
        assert_eq!(ch.name, "GFP");
        assert_eq!(ch.color, [255, 0, 0]);
        assert!(r.create_channel("bogus").is_err());
    }

    #[test]
    fn representative_image_only_for_first_known_series() {
        let all = vec![attrs(&[]), attrs(&[]), attrs(&[])];
        let r = DatasetConfigResolver::new(&[22, 30, 32], &all, ColorScale::Byte, vec![]);
        let first = r.thumbnail_policy_for(22).unwrap();
        assert!(first.representative.is_some());
        assert!(!first.generate);
        assert!(r.thumbnail_policy_for(30).unwrap().representative.is_none());

        let r = DatasetConfigResolver::new(
            &[22, 30, 32],
            &all,
            ColorScale::Byte,
            vec!["256x256".to_string()],
        );
        let p = r.thumbnail_policy_for(32).unwrap();
        assert!(p.generate);
        assert_eq!(p.resolutions, vec!["256x256"]);
    }
}
