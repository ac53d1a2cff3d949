//! Filename grammars of composite (multi-file) acquisitions.
//!
//! Each vendor layout is a [`FileResolver`] variant that turns one file of a
//! composite folder into an [`ImageFileDescriptor`], or skips it when the
//! file belongs to a series other than the one being registered.
//!
//! Grammars are data: a regular expression with named captures (`basename`,
//! `series`, `timepoint`, `plane`, `channel`) plus the list of captures that
//! count from 1 in file names. Absent captures get their defaults in one
//! place, [`FileTokens`].

mod tiff_series;
mod visitron;
mod youscope;

pub use tiff_series::TiffSeriesResolver;
pub use visitron::VisitronResolver;
pub use youscope::{well_label, ImagesCsv, ImagesCsvRow, YouScopeResolver};

use regex::Regex;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::series::SeriesAttributes;

/// Default for absent series, timepoint, plane and channel markers.
pub const DEFAULT_INDEX: u32 = 0;
/// Default for absent tile coordinates.
pub const DEFAULT_TILE: u32 = 1;
/// Well of layouts that carry no plate information.
pub const IGNORED_WELL: &str = "IGNORED";

const CHANNEL_CODE_RE: &str = r"^SERIES-(\d+)_CHANNEL-(\d+)$";

/// Where one raw file sits inside its composite acquisition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageFileDescriptor {
    pub basename: String,
    pub series: u32,
    pub channel: u32,
    pub timepoint: u32,
    pub plane: u32,
    pub tile_x: u32,
    pub tile_y: u32,
    pub tile_number: u32,
    pub well: String,
    /// Path of the file relative to the composite folder.
    pub path: String,
}

impl ImageFileDescriptor {
    pub fn channel_code(&self) -> ChannelCode {
        ChannelCode {
            series: self.series,
            channel: self.channel,
        }
    }
}

/// `SERIES-<s>_CHANNEL-<c>`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelCode {
    pub series: u32,
    pub channel: u32,
}

impl fmt::Display for ChannelCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SERIES-{}_CHANNEL-{}", self.series, self.channel)
    }
}

impl FromStr for ChannelCode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let re = Regex::new(CHANNEL_CODE_RE)?;
        let caps = re
            .captures(s)
            .ok_or_else(|| Error::InvalidChannelCode(s.to_string()))?;
        let number = |i: usize| {
            caps[i]
                .parse::<u32>()
                .map_err(|_| Error::InvalidChannelCode(s.to_string()))
        };
        Ok(ChannelCode {
            series: number(1)?,
            channel: number(2)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Series,
    Timepoint,
    Plane,
    Channel,
}

impl Field {
    fn group(&self) -> &'static str {
        match self {
            Field::Series => "series",
            Field::Timepoint => "timepoint",
            Field::Plane => "plane",
            Field::Channel => "channel",
        }
    }
}

const FIELDS: [Field; 4] = [Field::Series, Field::Timepoint, Field::Plane, Field::Channel];

/// A compiled filename grammar.
#[derive(Debug, Clone)]
pub struct Grammar {
    regex: Regex,
    one_based: &'static [Field],
}

impl Grammar {
    pub fn compile(pattern: &str, one_based: &'static [Field]) -> Result<Self> {
        Ok(Self {
            regex: Regex::new(pattern)?,
            one_based,
        })
    }

    /// Tokens of `name`, or `None` if the grammar does not match.
    pub fn parse(&self, name: &str) -> Result<Option<FileTokens>> {
        let Some(caps) = self.regex.captures(name) else {
            return Ok(None);
        };
        let mut tokens = FileTokens {
            basename: caps
                .name("basename")
                .map(|m| m.as_str().to_string())
                .unwrap_or_default(),
            ..FileTokens::default()
        };
        for field in FIELDS {
            let Some(m) = caps.name(field.group()) else {
                continue;
            };
            let mut value: u32 = m
                .as_str()
                .parse()
                .map_err(|_| Error::UnmatchedFileName(name.to_string()))?;
            if self.one_based.contains(&field) {
                value = value.saturating_sub(1);
            }
            tokens.set(field, value);
        }
        Ok(Some(tokens))
    }
}

/// Values found in a file name; absent markers stay `None` until defaulted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileTokens {
    pub basename: String,
    pub series: Option<u32>,
    pub timepoint: Option<u32>,
    pub plane: Option<u32>,
    pub channel: Option<u32>,
}

impl FileTokens {
    fn set(&mut self, field: Field, value: u32) {
        match field {
            Field::Series => self.series = Some(value),
            Field::Timepoint => self.timepoint = Some(value),
            Field::Plane => self.plane = Some(value),
            Field::Channel => self.channel = Some(value),
        }
    }

    pub fn series(&self) -> u32 {
        self.series.unwrap_or(DEFAULT_INDEX)
    }

    /// Descriptor of a layout without tiles or wells.
    pub fn into_descriptor(self, path: &str) -> ImageFileDescriptor {
        ImageFileDescriptor {
            series: self.series(),
            channel: self.channel.unwrap_or(DEFAULT_INDEX),
            timepoint: self.timepoint.unwrap_or(DEFAULT_INDEX),
            plane: self.plane.unwrap_or(DEFAULT_INDEX),
            tile_x: DEFAULT_TILE,
            tile_y: DEFAULT_TILE,
            tile_number: DEFAULT_TILE,
            well: IGNORED_WELL.to_string(),
            basename: self.basename,
            path: path.to_string(),
        }
    }
}

/// How stored channel colors of a layout are scaled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorScale {
    /// Components in 0..=255.
    Byte,
    /// Components in 0.0..=1.0.
    Unit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositeFileType {
    GenericTiffSeries,
    LeicaTiffSeries,
    VisitronNd,
    YouScopeExperiment,
}

impl CompositeFileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompositeFileType::GenericTiffSeries => "Generic TIFF Series",
            CompositeFileType::LeicaTiffSeries => "Leica TIFF Series",
            CompositeFileType::VisitronNd => "Visitron ND",
            CompositeFileType::YouScopeExperiment => "YouScope Experiment",
        }
    }

    pub fn color_scale(&self) -> ColorScale {
        match self {
            CompositeFileType::GenericTiffSeries | CompositeFileType::VisitronNd => ColorScale::Byte,
            CompositeFileType::LeicaTiffSeries | CompositeFileType::YouScopeExperiment => {
                ColorScale::Unit
            }
        }
    }

    pub fn recognized_extensions(&self) -> &'static [&'static str] {
        match self {
            CompositeFileType::VisitronNd => &["tif", "tiff", "stk"],
            _ => &["tif", "tiff"],
        }
    }

    /// Thumbnail resolutions that do not follow the configured ones.
    pub fn fixed_resolutions(&self) -> Option<&'static [&'static str]> {
        match self {
            CompositeFileType::LeicaTiffSeries => Some(&["128x128", "256x256"]),
            _ => None,
        }
    }
}

impl fmt::Display for CompositeFileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompositeFileType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Generic TIFF Series" => Ok(CompositeFileType::GenericTiffSeries),
            "Leica TIFF Series" => Ok(CompositeFileType::LeicaTiffSeries),
            "Visitron ND" => Ok(CompositeFileType::VisitronNd),
            "YouScope Experiment" => Ok(CompositeFileType::YouScopeExperiment),
            other => Err(Error::UnknownCompositeType(other.to_string())),
        }
    }
}

/// A vendor layout bound to the one series being registered.
#[derive(Debug)]
pub enum FileResolver<'a> {
    Generic(TiffSeriesResolver),
    Leica(TiffSeriesResolver),
    Visitron(VisitronResolver),
    YouScope(YouScopeResolver<'a>),
}

impl<'a> FileResolver<'a> {
    /// `all_series` holds the attributes of every series, in the order of
    /// `series_indices`. `csv` is required for YouScope experiments.
    pub fn new(
        file_type: CompositeFileType,
        series_indices: &'a [u32],
        series: u32,
        all_series: &'a [SeriesAttributes],
        csv: Option<&'a ImagesCsv>,
    ) -> Result<Self> {
        if !series_indices.contains(&series) {
            return Err(Error::SeriesNotDeclared {
                series,
                known: series_indices.to_vec(),
            });
        }
        Ok(match file_type {
            CompositeFileType::GenericTiffSeries => {
                FileResolver::Generic(TiffSeriesResolver::generic(series)?)
            }
            CompositeFileType::LeicaTiffSeries => {
                FileResolver::Leica(TiffSeriesResolver::leica(series)?)
            }
            CompositeFileType::VisitronNd => FileResolver::Visitron(VisitronResolver::new(series)?),
            CompositeFileType::YouScopeExperiment => {
                let csv = csv.ok_or_else(|| Error::missing("YouScope Experiment", "images.csv"))?;
                FileResolver::YouScope(YouScopeResolver::new(
                    csv,
                    all_series,
                    series_indices,
                    series,
                )?)
            }
        })
    }

    /// Descriptor of the file at `path` (relative to the composite folder,
    /// `/`-separated), or `None` when it belongs to another series.
    pub fn resolve(&self, path: &str) -> Result<Option<ImageFileDescriptor>> {
        let resolved = match self {
            FileResolver::Generic(r) | FileResolver::Leica(r) => r.resolve(path),
            FileResolver::Visitron(r) => r.resolve(path),
            FileResolver::YouScope(r) => r.resolve(path),
        };
        if let Err(e) = &resolved {
            tracing::error!("Could not resolve {}: {}", path, e);
        }
        resolved
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_code_round_trip() {
        let code: ChannelCode = "SERIES-3_CHANNEL-12".parse().unwrap();
        assert_eq!(code, ChannelCode { series: 3, channel: 12 });
        assert_eq!(code.to_string(), "SERIES-3_CHANNEL-12");
    }

    #[test]
    fn malformed_channel_codes_are_rejected() {
        for bad in ["SERIES-3", "series-1_channel-2", "SERIES-a_CHANNEL-1", ""] {
            assert!(matches!(
                bad.parse::<ChannelCode>(),
                Err(Error::InvalidChannelCode(_))
            ));
        }
    }

    #[test]
    fn absent_markers_take_central_defaults() {
        let d = FileTokens {
            basename: "run".to_string(),
            plane: Some(4),
            ..Default::default()
        }
        .into_descriptor("run_z4.tif");
        assert_eq!((d.series, d.timepoint, d.plane, d.channel), (0, 0, 4, 0));
        assert_eq!((d.tile_x, d.tile_y, d.tile_number), (1, 1, 1));
        assert_eq!(d.well, IGNORED_WELL);
    }

    #[test]
    fn one_based_fields_are_shifted() {
        let g = Grammar::compile(
            r"^(?P<basename>.*?)_s(?P<series>\d+)_z(?P<plane>\d+)$",
            &[Field::Series],
        )
        .unwrap();
        let t = g.parse("run_s1_z1").unwrap().unwrap();
        assert_eq!(t.series, Some(0));
        assert_eq!(t.plane, Some(1));
        assert!(g.parse("other").unwrap().is_none());
    }

    #[test]
    fn composite_types_parse_from_manifest_names() {
        for t in [
            CompositeFileType::GenericTiffSeries,
            CompositeFileType::LeicaTiffSeries,
            CompositeFileType::VisitronNd,
            CompositeFileType::YouScopeExperiment,
        ] {
            assert_eq!(t.as_str().parse::<CompositeFileType>().unwrap(), t);
        }
        assert!(matches!(
            "Zeiss CZI".parse::<CompositeFileType>(),
            Err(Error::UnknownCompositeType(_))
        ));
    }

    #[test]
    fn resolver_requires_declared_series() {
        let err = FileResolver::new(CompositeFileType::GenericTiffSeries, &[0, 2], 1, &[], None)
            .unwrap_err();
        assert!(matches!(err, Error::SeriesNotDeclared { series: 1, .. }));
    }

    #[test]
    fn youscope_resolver_requires_csv() {
        let err = FileResolver::new(CompositeFileType::YouScopeExperiment, &[0], 0, &[], None)
            .unwrap_err();
        assert!(matches!(err, Error::MissingAttribute { .. }));
    }
}
