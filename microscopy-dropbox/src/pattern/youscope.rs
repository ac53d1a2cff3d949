use regex::Regex;
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use super::{ImageFileDescriptor, DEFAULT_INDEX, DEFAULT_TILE};
use crate::error::{Error, Result};
use crate::series::SeriesAttributes;

/// `y-tile: 1, x-tile: 2, z-stack: 3`, in any order and subset.
const POSITION_RE: &str = r"(?P<axis>[xyz])-(?:tile|stack): (?P<n>[0-9]+)";
const POS_NAME_RE: &str = r"(?i)^.*position(?P<pos>[0-9]*)_time.*\.tif{1,2}$";
const POS_NAME_FALLBACK_RE: &str = r"(?i)^.*\(pos_(?P<pos>[0-9]*)\).*$";
const TIME_NAME_RE: &str = r"(?i)^.*_time(?P<time>[0-9]*)\.tif{1,2}$";
const TIME_NAME_FALLBACK_RE: &str = r"(?i)^.*_time_(.*)_\(number_(?P<time>[0-9]*)\)\.tif{1,2}$";

const MIN_COLUMNS: usize = 11;

/// One row of a YouScope `images.csv`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagesCsvRow {
    pub well: String,
    pub position: String,
    pub file: String,
    pub camera: String,
    pub channel_group: String,
    pub channel: String,
}

impl ImagesCsvRow {
    /// `<camera>_<group>_<channel>`; parts that are empty are left out and
    /// a row with neither channel part is "undefined".
    pub fn channel_name(&self) -> String {
        let name = match (self.channel_group.is_empty(), self.channel.is_empty()) {
            (true, true) => "undefined".to_string(),
            (false, true) => self.channel_group.clone(),
            (true, false) => self.channel.clone(),
            (false, false) => format!("{}_{}", self.channel_group, self.channel),
        };
        if self.camera.is_empty() {
            name
        } else {
            format!("{}_{}", self.camera, name)
        }
    }
}

/// The `images.csv` table of a YouScope experiment, keyed by image path.
#[derive(Debug, Clone, Default)]
pub struct ImagesCsv {
    rows: Vec<ImagesCsvRow>,
    by_file: HashMap<String, usize>,
}

impl ImagesCsv {
    pub fn load(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let table = Self::from_reader(file)?;
        tracing::info!("Read {} rows from {}", table.rows.len(), path.display());
        Ok(table)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut csv = csv::ReaderBuilder::new()
            .delimiter(b';')
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);

        let mut table = ImagesCsv::default();
        for (i, record) in csv.records().enumerate() {
            let record = record?;
            if record.len() < MIN_COLUMNS {
                return Err(Error::invalid(
                    "images.csv",
                    format!("row {} has {} columns", i + 1, record.len()),
                ));
            }
            let field = |n: usize| normalize_field(record.get(n).unwrap_or_default());
            let row = ImagesCsvRow {
                well: field(4),
                position: field(5),
                file: field(6),
                camera: field(7),
                channel_group: field(9),
                channel: field(10),
            };
            table.by_file.insert(row.file.clone(), table.rows.len());
            table.rows.push(row);
        }
        Ok(table)
    }

    pub fn row(&self, file: &str) -> Option<&ImagesCsvRow> {
        self.by_file.get(file).map(|&i| &self.rows[i])
    }

    pub fn contains(&self, file: &str) -> bool {
        self.by_file.contains_key(file)
    }

    /// Distinct channel names, in row order.
    pub fn channel_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for row in &self.rows {
            let name = row.channel_name();
            if !names.contains(&name) {
                names.push(name);
            }
        }
        names
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

fn normalize_field(raw: &str) -> String {
    raw.replace('"', "")
        .replace("\\\\", "\\")
        .replace('\\', "/")
}

/// Spreadsheet-style well of an even-length `<row><column>` digit block:
/// `"0101"` is A1, `"2702"` is AA2. Row 0 has no well.
pub fn well_label(block: &str) -> String {
    let half = block.len() / 2;
    let row: u32 = block.get(..half).and_then(|s| s.parse().ok()).unwrap_or(0);
    let column: u32 = block.get(half..).and_then(|s| s.parse().ok()).unwrap_or(0);
    if row == 0 {
        return String::new();
    }
    format!("{}{}", row_letters(row), column)
}

/// Bijective base-26: 1 is A, 26 is Z, 27 is AA.
fn row_letters(mut n: u32) -> String {
    let mut letters = Vec::new();
    while n > 0 {
        n -= 1;
        letters.push(b'A' + (n % 26) as u8);
        n /= 26;
    }
    letters.iter().rev().map(|&b| b as char).collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct PositionBlock {
    well: Option<String>,
    tile_x: Option<u32>,
    tile_y: Option<u32>,
    plane: Option<u32>,
}

/// Decode a position digit block by its length:
/// 4 is tile x/y; 6 or 7 is well and plane; 8 is well and tile x/y;
/// 10 or 11 is well, tile x/y and plane. Wells take four digits, tiles two.
fn decode_position_block(pos: &str) -> PositionBlock {
    let num = |range: std::ops::Range<usize>| pos.get(range).and_then(|s| s.parse().ok());
    let tail = |from: usize| pos.get(from..).and_then(|s| s.parse().ok());
    let well = || pos.get(..4).map(well_label);
    match pos.len() {
        0 => PositionBlock::default(),
        4 => PositionBlock {
            tile_x: num(0..2),
            tile_y: num(2..4),
            ..Default::default()
        },
        6 | 7 => PositionBlock {
            well: well(),
            plane: tail(4),
            ..Default::default()
        },
        8 => PositionBlock {
            well: well(),
            tile_x: num(4..6),
            tile_y: num(6..8),
            plane: None,
        },
        10 | 11 => PositionBlock {
            well: well(),
            tile_x: num(4..6),
            tile_y: num(6..8),
            plane: tail(8),
        },
        n => {
            tracing::error!("Unexpected position block '{}' of length {}", pos, n);
            PositionBlock::default()
        }
    }
}

/// `<dir>` of a relative path with `/` replaced by `_`, or `.` at the root.
fn path_info(file: &str) -> String {
    match file.rfind('/') {
        Some(i) => file[..i].replace('/', "_"),
        None => ".".to_string(),
    }
}

/// YouScope experiments: positions, wells and channels come from the
/// `images.csv` row of each file, with filename tokens as fallback.
#[derive(Debug)]
pub struct YouScopeResolver<'a> {
    csv: &'a ImagesCsv,
    all_series: &'a [SeriesAttributes],
    series_indices: &'a [u32],
    series: u32,
    position_re: Regex,
    pos_name: [Regex; 2],
    time_name: [Regex; 2],
}

impl<'a> YouScopeResolver<'a> {
    pub fn new(
        csv: &'a ImagesCsv,
        all_series: &'a [SeriesAttributes],
        series_indices: &'a [u32],
        series: u32,
    ) -> Result<Self> {
        Ok(Self {
            csv,
            all_series,
            series_indices,
            series,
            position_re: Regex::new(POSITION_RE)?,
            pos_name: [Regex::new(POS_NAME_RE)?, Regex::new(POS_NAME_FALLBACK_RE)?],
            time_name: [Regex::new(TIME_NAME_RE)?, Regex::new(TIME_NAME_FALLBACK_RE)?],
        })
    }

    pub fn resolve(&self, path: &str) -> Result<Option<ImageFileDescriptor>> {
        let row = self
            .csv
            .row(path)
            .ok_or_else(|| Error::UnmatchedFileName(path.to_string()))?;

        let mut tile_x = None;
        let mut tile_y = None;
        let mut plane = None;
        for caps in self.position_re.captures_iter(&row.position) {
            let n = caps["n"].parse().ok();
            match &caps["axis"] {
                "x" => tile_x = n,
                "y" => tile_y = n,
                _ => plane = n,
            }
        }
        let mut well = row.well.clone();

        let block = self
            .pos_name
            .iter()
            .find_map(|re| re.captures(&row.file))
            .and_then(|caps| caps.name("pos").map(|m| decode_position_block(m.as_str())));
        if let Some(block) = block {
            tile_x = tile_x.or(block.tile_x);
            tile_y = tile_y.or(block.tile_y);
            plane = plane.or(block.plane);
            if well.is_empty() {
                well = block.well.unwrap_or_default();
            }
        }

        // Time counters start at 1.
        let timepoint = self
            .time_name
            .iter()
            .find_map(|re| re.captures(&row.file))
            .and_then(|caps| caps.name("time").and_then(|m| m.as_str().parse::<u32>().ok()))
            .map(|t| t.saturating_sub(1));

        let tile_x = tile_x.unwrap_or(DEFAULT_TILE);
        let tile_y = tile_y.unwrap_or(DEFAULT_TILE);

        let series_id = format!(
            "Well_{}_Pos_{}_{}_Path_{}",
            well,
            tile_x,
            tile_y,
            path_info(&row.file)
        );
        let position = self
            .all_series
            .iter()
            .position(|s| s.get("uniqueSeriesID") == Some(series_id.as_str()))
            .ok_or_else(|| Error::SeriesIdNotFound(series_id.clone()))?;
        let series = *self
            .series_indices
            .get(position)
            .ok_or_else(|| Error::SeriesIdNotFound(series_id.clone()))?;
        tracing::debug!("Series ID {} is series {}", series_id, series);

        if series != self.series {
            return Ok(None);
        }

        let tile_number = tile_x
            .checked_mul(1000)
            .and_then(|n| n.checked_add(tile_y))
            .ok_or_else(|| Error::invalid("position", row.position.clone()))?
            .max(1);

        let channel_name = row.channel_name();
        let channel = self.all_series[position]
            .channel_index_of(&channel_name)
            .ok_or(Error::ChannelNotFound {
                series,
                name: channel_name,
            })?;

        Ok(Some(ImageFileDescriptor {
            basename: path_info(&row.file),
            series,
            channel,
            timepoint: timepoint.unwrap_or(DEFAULT_INDEX),
            plane: plane.unwrap_or(DEFAULT_INDEX),
            tile_x,
            tile_y,
            tile_number,
            well,
            path: path.to_string(),
        }))
    }
}
