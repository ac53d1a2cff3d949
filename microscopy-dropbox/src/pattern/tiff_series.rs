use super::{FileTokens, Grammar, ImageFileDescriptor};
use crate::error::{Error, Result};

const SERIES_RE: &str = r"(?i)^(?P<basename>.*?)((_Series|_s)(?P<series>\d+))?(_t(?P<timepoint>\d+))?_z(?P<plane>\d+)_ch(?P<channel>\d+)\.tif{1,2}$";

/// Plane number right before the extension, nothing else.
const SIMPLE_RE: &str = r"(?i)^(?P<basename>.*?)(?P<plane>\d+)\.tif{1,2}$";

/// Folders of single-plane TIFFs named `<run>[_Series<s>|_s<s>][_t<t>]_z<z>_ch<c>.tif`.
/// Indices are stored as found. The generic layout also accepts
/// `<run><z>.tif`; Leica exports do not.
#[derive(Debug, Clone)]
pub struct TiffSeriesResolver {
    grammars: Vec<Grammar>,
    series: u32,
}

impl TiffSeriesResolver {
    pub fn generic(series: u32) -> Result<Self> {
        Ok(Self {
            grammars: vec![
                Grammar::compile(SERIES_RE, &[])?,
                Grammar::compile(SIMPLE_RE, &[])?,
            ],
            series,
        })
    }

    pub fn leica(series: u32) -> Result<Self> {
        Ok(Self {
            grammars: vec![Grammar::compile(SERIES_RE, &[])?],
            series,
        })
    }

    pub fn resolve(&self, path: &str) -> Result<Option<ImageFileDescriptor>> {
        let tokens = self.tokens(path)?;
        if tokens.series() != self.series {
            return Ok(None);
        }
        Ok(Some(tokens.into_descriptor(path)))
    }

    fn tokens(&self, path: &str) -> Result<FileTokens> {
        for grammar in &self.grammars {
            if let Some(tokens) = grammar.parse(path)? {
                return Ok(tokens);
            }
        }
        Err(Error::UnmatchedFileName(path.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_name_yields_every_marker() {
        let r = TiffSeriesResolver::generic(3).unwrap();
        let d = r.resolve("Exp1_Series3_t2_z5_ch1.tif").unwrap().unwrap();
        assert_eq!(d.basename, "Exp1");
        assert_eq!((d.series, d.timepoint, d.plane, d.channel), (3, 2, 5, 1));
        assert_eq!(d.channel_code().to_string(), "SERIES-3_CHANNEL-1");
        assert_eq!(d.well, "IGNORED");
        assert_eq!(d.tile_number, 1);
    }

    #[test]
    fn missing_series_and_timepoint_default_to_zero() {
        let r = TiffSeriesResolver::generic(0).unwrap();
        let d = r.resolve("Exp1_z5_ch1.tif").unwrap().unwrap();
        assert_eq!((d.series, d.timepoint, d.plane, d.channel), (0, 0, 5, 1));
    }

    #[test]
    fn matching_is_case_insensitive_and_accepts_short_series_marker() {
        let r = TiffSeriesResolver::leica(2).unwrap();
        let d = r.resolve("sub/RUN_S2_Z003_CH00.TIFF").unwrap().unwrap();
        assert_eq!(d.basename, "sub/RUN");
        assert_eq!((d.series, d.plane, d.channel), (2, 3, 0));
    }

    #[test]
    fn other_series_are_skipped() {
        let r = TiffSeriesResolver::generic(0).unwrap();
        assert!(r.resolve("Exp1_Series3_t2_z5_ch1.tif").unwrap().is_none());
    }

    #[test]
    fn generic_falls_back_to_plane_only_names() {
        let r = TiffSeriesResolver::generic(0).unwrap();
        let d = r.resolve("stack_0042.tif").unwrap().unwrap();
        assert_eq!(d.basename, "stack_");
        assert_eq!((d.series, d.plane, d.channel), (0, 42, 0));
    }

    #[test]
    fn leica_has_no_fallback() {
        let r = TiffSeriesResolver::leica(0).unwrap();
        assert!(matches!(
            r.resolve("stack_0042.tif"),
            Err(Error::UnmatchedFileName(_))
        ));
    }

    #[test]
    fn unknown_names_are_fatal() {
        let r = TiffSeriesResolver::generic(0).unwrap();
        assert!(matches!(
            r.resolve("notes.txt"),
            Err(Error::UnmatchedFileName(_))
        ));
    }
}
