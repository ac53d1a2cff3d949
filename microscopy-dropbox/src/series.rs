//! Per-series metadata model and its flat attribute-bag form.
//!
//! [`SeriesMetadata`] is the typed view filled by the extractor. Everything
//! downstream (manifest pre-parsed series, dataset configuration, the stored
//! `MicroscopyFileSeries` XML property) works on [`SeriesAttributes`], a flat
//! string map where per-channel and per-timepoint values are flattened to
//! `<field><index>` keys such as `channelName0` or `timestamp3`.

use quick_xml::events::{BytesStart, Event};
use quick_xml::{Reader, Writer};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::io::Cursor;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Tag of the stored series metadata element.
pub const SERIES_TAG: &str = "MicroscopyFileSeries";

pub const NO_NAME: &str = "No name";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelDatatype {
    Uint8,
    Uint16,
    Float,
    Unsupported,
}

impl PixelDatatype {
    /// Datatype from the number of bytes per pixel.
    pub fn from_bytes_per_pixel(bytes: usize) -> Self {
        match bytes {
            1 => PixelDatatype::Uint8,
            2 => PixelDatatype::Uint16,
            4 => PixelDatatype::Float,
            _ => PixelDatatype::Unsupported,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PixelDatatype::Uint8 => "uint8",
            PixelDatatype::Uint16 => "uint16",
            PixelDatatype::Float => "float",
            PixelDatatype::Unsupported => "unsupported",
        }
    }
}

impl FromStr for PixelDatatype {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "uint8" => Ok(PixelDatatype::Uint8),
            "uint16" => Ok(PixelDatatype::Uint16),
            "float" => Ok(PixelDatatype::Float),
            "unsupported" => Ok(PixelDatatype::Unsupported),
            other => Err(Error::invalid("datatype", other)),
        }
    }
}

/// An RGBA color with 0..255 components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rgba(pub [u8; 4]);

impl Rgba {
    pub const WHITE: Rgba = Rgba([255, 255, 255, 255]);

    pub fn rgb(&self) -> [u8; 3] {
        [self.0[0], self.0[1], self.0[2]]
    }
}

impl fmt::Display for Rgba {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [r, g, b, a] = self.0;
        write!(f, "{},{},{},{}", r, g, b, a)
    }
}

impl FromStr for Rgba {
    type Err = Error;

    /// Parses "R,G,B" or "R,G,B,A" with 0..255 components; alpha defaults to 255.
    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        if parts.len() != 3 && parts.len() != 4 {
            return Err(Error::invalid("channelColor", s));
        }
        let mut out = [255u8; 4];
        for (i, part) in parts.iter().enumerate() {
            let v: f64 = part.parse().map_err(|_| Error::invalid("channelColor", s))?;
            out[i] = v.clamp(0.0, 255.0) as u8;
        }
        Ok(Rgba(out))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelMetadata {
    pub name: String,
    pub color: Rgba,
    pub em_wavelength: f64,
    pub ex_wavelength: f64,
}

impl Default for ChannelMetadata {
    fn default() -> Self {
        Self {
            name: NO_NAME.to_string(),
            color: Rgba::WHITE,
            em_wavelength: f64::NAN,
            ex_wavelength: f64::NAN,
        }
    }
}

/// Normalized metadata of one series of one physical file.
#[derive(Debug, Clone)]
pub struct SeriesMetadata {
    pub series_number: u32,
    pub name: String,
    pub size_x: usize,
    pub size_y: usize,
    pub size_z: usize,
    pub size_c: usize,
    pub size_t: usize,
    pub datatype: PixelDatatype,
    pub is_signed: bool,
    pub is_little_endian: bool,
    pub voxel_x: f64,
    pub voxel_y: f64,
    pub voxel_z: f64,
    pub acquisition_date: String,
    pub timestamps: Vec<f64>,
    /// One entry per channel; always `size_c` long.
    pub channels: Vec<ChannelMetadata>,
    pub numerical_apertures: Vec<f64>,
    pub position_x: f64,
    pub position_y: f64,
}

impl SeriesMetadata {
    pub fn empty(series_number: u32) -> Self {
        Self {
            series_number,
            name: String::new(),
            size_x: 0,
            size_y: 0,
            size_z: 0,
            size_c: 0,
            size_t: 0,
            datatype: PixelDatatype::Unsupported,
            is_signed: false,
            is_little_endian: true,
            voxel_x: f64::NAN,
            voxel_y: f64::NAN,
            voxel_z: f64::NAN,
            acquisition_date: String::new(),
            timestamps: Vec::new(),
            channels: Vec::new(),
            numerical_apertures: Vec::new(),
            position_x: f64::NAN,
            position_y: f64::NAN,
        }
    }

    pub fn to_attributes(&self) -> SeriesAttributes {
        let mut a = SeriesAttributes::default();
        a.insert("seriesNumber", self.series_number);
        a.insert("name", &self.name);
        a.insert("sizeX", self.size_x);
        a.insert("sizeY", self.size_y);
        a.insert("sizeZ", self.size_z);
        a.insert("sizeC", self.size_c);
        a.insert("sizeT", self.size_t);
        a.insert("datatype", self.datatype.as_str());
        a.insert("isSigned", self.is_signed);
        a.insert("isLittleEndian", self.is_little_endian);
        a.insert("voxelX", self.voxel_x);
        a.insert("voxelY", self.voxel_y);
        a.insert("voxelZ", self.voxel_z);
        a.insert("acquisitionDate", &self.acquisition_date);
        a.insert("NA", join_apertures(&self.numerical_apertures));
        a.insert("positionX", self.position_x);
        a.insert("positionY", self.position_y);
        for (c, ch) in self.channels.iter().enumerate() {
            a.insert(format!("channelName{}", c), &ch.name);
            a.insert(format!("channelColor{}", c), ch.color);
            a.insert(format!("emWavelength{}", c), ch.em_wavelength);
            a.insert(format!("exWavelength{}", c), ch.ex_wavelength);
        }
        for (t, ts) in self.timestamps.iter().enumerate() {
            a.insert(format!("timestamp{}", t), ts);
        }
        a
    }

    /// Typed view of an attribute bag. Absent keys take the same defaults
    /// the extractor applies.
    pub fn from_attributes(attrs: &SeriesAttributes) -> Result<Self> {
        let series_number = attrs.parse_or("seriesNumber", 0u32)?;
        let mut s = SeriesMetadata::empty(series_number);
        s.name = attrs.get("name").unwrap_or_default().to_string();
        s.size_x = attrs.parse_or("sizeX", 0)?;
        s.size_y = attrs.parse_or("sizeY", 0)?;
        s.size_z = attrs.parse_or("sizeZ", 0)?;
        s.size_c = attrs.parse_or("sizeC", 0)?;
        s.size_t = attrs.parse_or("sizeT", 0)?;
        s.datatype = attrs.parse_or("datatype", PixelDatatype::Unsupported)?;
        s.is_signed = attrs.parse_or("isSigned", false)?;
        s.is_little_endian = attrs.parse_or("isLittleEndian", true)?;
        s.voxel_x = attrs.parse_or("voxelX", f64::NAN)?;
        s.voxel_y = attrs.parse_or("voxelY", f64::NAN)?;
        s.voxel_z = attrs.parse_or("voxelZ", f64::NAN)?;
        s.acquisition_date = attrs.get("acquisitionDate").unwrap_or_default().to_string();
        s.numerical_apertures = split_apertures(attrs.get("NA").unwrap_or("NaN"))?;
        s.position_x = attrs.parse_or("positionX", f64::NAN)?;
        s.position_y = attrs.parse_or("positionY", f64::NAN)?;
        s.channels = (0..s.size_c)
            .map(|c| {
                let name = attrs
                    .get(&format!("channelName{}", c))
                    .map(str::to_string)
                    .unwrap_or_else(|| NO_NAME.to_string());
                Ok(ChannelMetadata {
                    name,
                    color: attrs.parse_or(&format!("channelColor{}", c), Rgba::WHITE)?,
                    em_wavelength: attrs.parse_or(&format!("emWavelength{}", c), f64::NAN)?,
                    ex_wavelength: attrs.parse_or(&format!("exWavelength{}", c), f64::NAN)?,
                })
            })
            .collect::<Result<_>>()?;
        let mut t = 0;
        while let Some(v) = attrs.get(&format!("timestamp{}", t)) {
            s.timestamps
                .push(v.parse().map_err(|_| Error::invalid("timestamp", v))?);
            t += 1;
        }
        Ok(s)
    }
}

fn join_apertures(values: &[f64]) -> String {
    if values.is_empty() {
        return f64::NAN.to_string();
    }
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

fn split_apertures(s: &str) -> Result<Vec<f64>> {
    let values = s
        .split(',')
        .map(|p| p.trim().parse::<f64>().map_err(|_| Error::invalid("NA", s)))
        .collect::<Result<Vec<_>>>()?;
    if values.len() == 1 && values[0].is_nan() {
        return Ok(Vec::new());
    }
    Ok(values)
}

/// Flat string-keyed attributes of one series.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SeriesAttributes(BTreeMap<String, String>);

impl SeriesAttributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl ToString) {
        self.0.insert(key.into(), value.to_string());
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Display name of the series; empty when unnamed.
    pub fn name(&self) -> &str {
        self.get("name").unwrap_or_default()
    }

    /// Number of `channelName<c>` keys.
    pub fn channel_count(&self) -> usize {
        self.0
            .keys()
            .filter(|k| channel_name_index(k).is_some())
            .count()
    }

    /// Lowest index `c` of a `channelName<c>` key whose value equals `name`.
    pub fn channel_index_of(&self, name: &str) -> Option<u32> {
        self.0
            .iter()
            .filter(|(_, v)| v.as_str() == name)
            .filter_map(|(k, _)| channel_name_index(k))
            .min()
    }

    fn parse_or<T: FromStr>(&self, key: &str, default: T) -> Result<T> {
        match self.get(key) {
            None => Ok(default),
            Some(v) => v.trim().parse().map_err(|_| Error::invalid(key, v)),
        }
    }

    /// Serialize as an empty `MicroscopyFileSeries` element carrying every
    /// key/value pair as an attribute.
    pub fn to_xml(&self) -> Result<String> {
        let mut writer = Writer::new(Cursor::new(Vec::new()));
        let mut elem = BytesStart::new(SERIES_TAG);
        for (k, v) in &self.0 {
            elem.push_attribute((k.as_str(), v.as_str()));
        }
        writer.write_event(Event::Empty(elem))?;
        let bytes = writer.into_inner().into_inner();
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Parse a stored `MicroscopyFileSeries` element back into attributes.
    pub fn from_xml(xml: &str) -> Result<Self> {
        let mut reader = Reader::from_str(xml);
        reader.trim_text(true);
        loop {
            match reader.read_event()? {
                Event::Start(e) | Event::Empty(e) => {
                    let tag = tag_name(&e);
                    if tag != SERIES_TAG {
                        return Err(Error::UnexpectedTag {
                            expected: SERIES_TAG.to_string(),
                            found: tag,
                        });
                    }
                    return Ok(Self(attributes_of(&e)?));
                }
                Event::Eof => {
                    return Err(Error::UnexpectedTag {
                        expected: SERIES_TAG.to_string(),
                        found: String::new(),
                    })
                }
                _ => {}
            }
        }
    }
}

impl From<BTreeMap<String, String>> for SeriesAttributes {
    fn from(map: BTreeMap<String, String>) -> Self {
        Self(map)
    }
}

impl FromIterator<(String, String)> for SeriesAttributes {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

fn channel_name_index(key: &str) -> Option<u32> {
    key.strip_prefix("channelName")?.parse().ok()
}

pub(crate) fn tag_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.name().as_ref()).into_owned()
}

pub(crate) fn attributes_of(e: &BytesStart<'_>) -> Result<BTreeMap<String, String>> {
    let mut out = BTreeMap::new();
    for attr in e.attributes() {
        let attr = attr?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value()?.into_owned();
        out.insert(key, value);
    }
    Ok(out)
}
