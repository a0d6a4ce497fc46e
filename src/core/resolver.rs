//! Sensor-format resolution: classifies a `BandSet` into one `SensorVariant`.
//!
//! Landsat band layouts overlap between generations and processing levels, so
//! no single marker band identifies a layout. Resolution evaluates a fixed,
//! ordered list of rules over a handful of band predicates; the first rule that
//! matches wins and anything unmatched is `Unknown`.
use tracing::debug;

use crate::core::bands::BandSet;
use crate::error::{Error, Result};
use crate::types::{ImageSource, SensorVariant};

/// Band predicates evaluated once per resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BandPredicates {
    pub is_sr: bool,
    pub has_thermal10: bool,
    pub has_toa10: bool,
    pub has_sr_b6: bool,
    pub has_sr_b1: bool,
    pub has_thermal6: bool,
    pub has_b1: bool,
    pub has_toa11: bool,
}

impl BandPredicates {
    pub fn evaluate(bands: &BandSet) -> Self {
        Self {
            is_sr: bands.any_with_prefix("SR_"),
            has_thermal10: bands.contains("ST_B10"),
            has_toa10: bands.contains("B10"),
            has_sr_b6: bands.contains("SR_B6"),
            has_sr_b1: bands.contains("SR_B1"),
            has_thermal6: bands.contains("ST_B6"),
            has_b1: bands.contains("B1"),
            has_toa11: bands.contains("B11"),
        }
    }
}

struct Rule {
    variant: SensorVariant,
    matches: fn(&BandPredicates) -> bool,
}

/// Precedence order. Do not reorder: degenerate band lists can satisfy more
/// than one rule.
const RULES: [Rule; 4] = [
    Rule {
        variant: SensorVariant::Landsat89Sr,
        matches: |p| p.is_sr && p.has_sr_b6 && p.has_thermal10,
    },
    Rule {
        variant: SensorVariant::Landsat7Sr,
        matches: |p| p.is_sr && p.has_sr_b1 && p.has_thermal6 && !p.has_sr_b6,
    },
    Rule {
        variant: SensorVariant::Landsat89Toa,
        matches: |p| !p.is_sr && p.has_toa10 && p.has_toa11,
    },
    Rule {
        variant: SensorVariant::Landsat7Toa,
        matches: |p| !p.is_sr && !p.has_toa10 && p.has_b1,
    },
];

#[derive(Debug, Default, Clone, Copy)]
pub struct SensorFormatResolver;

impl SensorFormatResolver {
    pub fn new() -> Self {
        Self
    }

    /// Classify `bands`. A `Sentinel2` source hint short-circuits inspection.
    pub fn resolve(&self, source: Option<ImageSource>, bands: &BandSet) -> SensorVariant {
        if source == Some(ImageSource::Sentinel2) {
            debug!("Sentinel-2 declared by caller; skipping band inspection");
            return SensorVariant::Sentinel2;
        }

        let predicates = BandPredicates::evaluate(bands);
        let variant = RULES
            .iter()
            .find(|rule| (rule.matches)(&predicates))
            .map(|rule| rule.variant)
            .unwrap_or(SensorVariant::Unknown);

        debug!("Bands {} resolved to {}", bands, variant);
        variant
    }

    /// Like [`resolve`](Self::resolve) but refuses to continue on `Unknown`.
    pub fn resolve_known(
        &self,
        source: Option<ImageSource>,
        bands: &BandSet,
    ) -> Result<SensorVariant> {
        match self.resolve(source, bands) {
            SensorVariant::Unknown => Err(Error::UnrecognizedSensorFormat {
                bands: bands.to_string(),
            }),
            variant => Ok(variant),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolve(bands: &[&str]) -> SensorVariant {
        SensorFormatResolver::new().resolve(Some(ImageSource::Landsat), &BandSet::new(bands.iter().copied()))
    }

    #[test]
    fn landsat7_surface_reflectance() {
        let bands = ["SR_B1", "SR_B2", "SR_B3", "SR_B4", "SR_B5", "SR_B7", "ST_B6"];
        assert_eq!(resolve(&bands), SensorVariant::Landsat7Sr);
    }

    #[test]
    fn landsat89_surface_reflectance() {
        let bands = ["SR_B2", "SR_B3", "SR_B4", "SR_B5", "SR_B6", "SR_B7", "ST_B10"];
        assert_eq!(resolve(&bands), SensorVariant::Landsat89Sr);
    }

    #[test]
    fn landsat89_toa() {
        let bands = ["B2", "B3", "B4", "B5", "B6", "B7", "B10", "B11"];
        assert_eq!(resolve(&bands), SensorVariant::Landsat89Toa);
    }

    #[test]
    fn landsat7_toa() {
        let bands = ["B1", "B2", "B3", "B4", "B5", "B6", "B7"];
        assert_eq!(resolve(&bands), SensorVariant::Landsat7Toa);
    }

    #[test]
    fn sentinel2_hint_skips_inspection() {
        let resolver = SensorFormatResolver::new();
        let bands = BandSet::new(["SR_B2", "SR_B6", "ST_B10"]);
        assert_eq!(
            resolver.resolve(Some(ImageSource::Sentinel2), &bands),
            SensorVariant::Sentinel2
        );
        assert_eq!(
            resolver.resolve(Some(ImageSource::Sentinel2), &BandSet::default()),
            SensorVariant::Sentinel2
        );
    }

    #[test]
    fn unmatched_layouts_are_unknown() {
        assert_eq!(resolve(&[]), SensorVariant::Unknown);
        // SR prefix without either thermal band.
        assert_eq!(resolve(&["SR_B1", "SR_B2", "SR_B6"]), SensorVariant::Unknown);
        // TOA with B10 but no B11 and a B1.
        assert_eq!(resolve(&["B1", "B2", "B10"]), SensorVariant::Unknown);
        assert_eq!(resolve(&["VV", "VH"]), SensorVariant::Unknown);
    }

    #[test]
    fn l89_sr_rule_takes_precedence_over_l7_sr() {
        // Both thermal bands present and SR_B1 too: the L8/9 rule is checked first.
        let bands = ["SR_B1", "SR_B6", "ST_B6", "ST_B10"];
        assert_eq!(resolve(&bands), SensorVariant::Landsat89Sr);
    }

    #[test]
    fn sentinel2_bands_without_hint_read_as_landsat7_toa() {
        let bands = ["B1", "B2", "B3", "B4", "B5", "B6", "B7", "B8", "B8A", "B9", "B11", "B12"];
        assert_eq!(resolve(&bands), SensorVariant::Landsat7Toa);
    }

    #[test]
    fn resolve_known_rejects_unknown() {
        let err = SensorFormatResolver::new()
            .resolve_known(None, &BandSet::new(["VV"]))
            .unwrap_err();
        assert!(matches!(err, Error::UnrecognizedSensorFormat { .. }));
    }
}
