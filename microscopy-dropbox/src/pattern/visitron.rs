use super::{Field, Grammar, ImageFileDescriptor};
use crate::error::{Error, Result};

const ND_RE: &str = r"(?i)^(?P<basename>.*?)(_w(?P<channel>\d+)(conf(?P<wavelength>\d+)|[^_.]*))?(_s(?P<series>\d+))?(_t(?P<timepoint>\d+))?\.(stk|tif{1,2})$";

/// VisiView ND acquisitions: `<run>[_w<c>[conf<nm>|<label>]][_s<s>][_t<t>].(stk|tif)`.
/// Wavelength, stage position and timepoint counters start at 1. Focal
/// planes live inside the (multi-page) file, so the plane is always 0.
#[derive(Debug, Clone)]
pub struct VisitronResolver {
    grammar: Grammar,
    series: u32,
}

impl VisitronResolver {
    pub fn new(series: u32) -> Result<Self> {
        Ok(Self {
            grammar: Grammar::compile(ND_RE, &[Field::Series, Field::Channel, Field::Timepoint])?,
            series,
        })
    }

    pub fn resolve(&self, path: &str) -> Result<Option<ImageFileDescriptor>> {
        let tokens = self
            .grammar
            .parse(path)?
            .ok_or_else(|| Error::UnmatchedFileName(path.to_string()))?;
        if tokens.series() != self.series {
            return Ok(None);
        }
        Ok(Some(tokens.into_descriptor(path)))
    }
}
