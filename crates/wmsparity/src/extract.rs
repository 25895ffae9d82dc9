//! Test case extraction.
//!
//! Walks the layer store, keeps vector layers whose name carries the test
//! prefix and resolves each into a [`TestCaseDescriptor`]. Per-layer overrides
//! are read as optional strings and parsed here; anything that does not parse
//! falls back to the configured default.

use crate::compare::Thresholds;
use crate::config::{HarnessConfig, RenderDefaults};
use crate::layer::{IconAsset, LayerStore, MapLayer};
use crate::result::ParityError;
use crate::style::{StyleError, StyleTranslator};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Layer variable holding the minimum SSIM
pub const VAR_EXPECTED_SSIM: &str = "expected_ssim";
/// Layer variable holding the maximum MSE
pub const VAR_EXPECTED_MSE: &str = "expected_mse";
/// Layer variable holding the minimum template match
pub const VAR_EXPECTED_MATCH: &str = "expected_match";
/// Layer variable holding the bounding box
pub const VAR_BBOX: &str = "bbox";
/// Layer variable holding the image width
pub const VAR_WIDTH: &str = "width";
/// Layer variable holding the image height
pub const VAR_HEIGHT: &str = "height";

/// Query key naming the target server's dataset
pub const TYPENAME_KEY: &str = "TYPENAME";

/// Bounding box, kept as the text that goes on the wire
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Bbox(String);

impl Bbox {
    /// Accept exactly four comma-separated finite numbers
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        let parts: Vec<&str> = text.split(',').collect();
        if parts.len() != 4 {
            return None;
        }
        let all_finite = parts
            .iter()
            .all(|p| p.trim().parse::<f64>().is_ok_and(f64::is_finite));
        all_finite.then(|| Self(text.to_string()))
    }

    /// Wire representation
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Bbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One resolved comparison unit
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestCaseDescriptor {
    /// Test name (the layer name)
    pub name: String,
    /// Store handle of the source layer
    pub source_layer_id: String,
    /// Layer name as the first server knows it
    pub source_layer_name: String,
    /// Dataset name on the second server
    pub target_layer_name: String,
    /// Adapted style, empty when the layer has none
    pub style_text: String,
    /// Icons referenced by the adapted style
    #[serde(skip)]
    pub icons: Vec<IconAsset>,
    /// Acceptance thresholds
    pub thresholds: Thresholds,
    /// Render extent
    pub bbox: Bbox,
    /// Image width
    pub width: u32,
    /// Image height
    pub height: u32,
}

impl TestCaseDescriptor {
    /// Human-readable title
    #[must_use]
    pub fn title(&self) -> String {
        self.name.replace('_', " ")
    }
}

/// A test layer that could not be turned into a descriptor
#[derive(Debug)]
pub struct ExtractionFailure {
    /// Store handle
    pub layer_id: String,
    /// Layer name
    pub layer_name: String,
    /// Key the failure is reported under
    pub record_name: String,
    /// Cause
    pub error: ParityError,
}

/// Outcome of extracting one test layer
pub type Extracted = Result<TestCaseDescriptor, ExtractionFailure>;

/// Builds test case descriptors from a layer store
#[derive(Debug, Clone)]
pub struct Extractor {
    prefix: String,
    defaults: RenderDefaults,
    audit_dir: Option<PathBuf>,
}

impl Extractor {
    /// Create an extractor from the resolved configuration
    #[must_use]
    pub fn new(config: &HarnessConfig) -> Self {
        Self {
            prefix: config.layer_prefix.clone(),
            defaults: config.defaults.clone(),
            audit_dir: None,
        }
    }

    /// Export each test layer's native style into `dir`
    #[must_use]
    pub fn with_audit_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.audit_dir = Some(dir.into());
        self
    }

    /// Whether `layer` is a test layer
    #[must_use]
    pub fn selects(&self, layer: &MapLayer) -> bool {
        layer.name.starts_with(&self.prefix) && layer.kind.is_testable()
    }

    /// Extract every test layer in store order
    ///
    /// A failure on one layer never affects the others. When two test layers
    /// share a name, the first keeps it and later ones fail as duplicates.
    pub fn extract(
        &self,
        store: &dyn LayerStore,
        translator: &dyn StyleTranslator,
    ) -> Vec<Extracted> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();

        for layer in store.layers().iter().filter(|l| self.selects(l)) {
            if !seen.insert(layer.name.clone()) {
                tracing::warn!(layer = %layer.name, id = %layer.id, "duplicate test layer name");
                out.push(Err(ExtractionFailure {
                    layer_id: layer.id.clone(),
                    layer_name: layer.name.clone(),
                    record_name: format!("{} [{}]", layer.name, layer.id),
                    error: ParityError::DuplicateName {
                        name: layer.name.clone(),
                    },
                }));
                continue;
            }

            let extracted = self.extract_layer(store, translator, layer);
            self.export_audit(store, layer, extracted.as_ref().ok());
            out.push(extracted);
        }

        out
    }

    fn extract_layer(
        &self,
        store: &dyn LayerStore,
        translator: &dyn StyleTranslator,
        layer: &MapLayer,
    ) -> Extracted {
        let var = |key: &str| store.variable(layer, key);
        let defaults = &self.defaults.thresholds;

        let thresholds = Thresholds {
            ssim: override_or(layer, VAR_EXPECTED_SSIM, var(VAR_EXPECTED_SSIM), defaults.ssim),
            mse: override_or(layer, VAR_EXPECTED_MSE, var(VAR_EXPECTED_MSE), defaults.mse),
            template_match: override_or(
                layer,
                VAR_EXPECTED_MATCH,
                var(VAR_EXPECTED_MATCH),
                defaults.template_match,
            ),
        };
        let bbox = var(VAR_BBOX)
            .filter(|b| !b.trim().is_empty())
            .and_then(|b| {
                let parsed = Bbox::parse(&b);
                if parsed.is_none() {
                    tracing::warn!(
                        layer = %layer.name,
                        value = %b,
                        "invalid bbox override, using default"
                    );
                }
                parsed
            })
            .or_else(|| Bbox::parse(&self.defaults.bbox))
            .unwrap_or_else(|| Bbox(self.defaults.bbox.clone()));
        let width = dimension_or(layer, VAR_WIDTH, var(VAR_WIDTH), self.defaults.width);
        let height = dimension_or(layer, VAR_HEIGHT, var(VAR_HEIGHT), self.defaults.height);

        let target_layer_name = type_name(&layer.data_source).ok_or_else(|| ExtractionFailure {
            layer_id: layer.id.clone(),
            layer_name: layer.name.clone(),
            record_name: layer.name.clone(),
            error: ParityError::MissingTypeName {
                layer: layer.name.clone(),
                data_source: layer.data_source.clone(),
            },
        })?;

        let (style_text, icons) = match translator.translate(layer) {
            Ok(style) => (style.text.replace(&layer.name, &target_layer_name), style.icons),
            Err(StyleError::Unsupported { .. }) => {
                tracing::debug!(
                    layer = %layer.name,
                    "no adapted style, rendering with server default"
                );
                (String::new(), Vec::new())
            }
        };

        Ok(TestCaseDescriptor {
            name: layer.name.clone(),
            source_layer_id: layer.id.clone(),
            source_layer_name: layer.name.clone(),
            target_layer_name,
            style_text,
            icons,
            thresholds,
            bbox,
            width,
            height,
        })
    }

    fn export_audit(
        &self,
        store: &dyn LayerStore,
        layer: &MapLayer,
        descriptor: Option<&TestCaseDescriptor>,
    ) {
        let Some(dir) = &self.audit_dir else {
            return;
        };
        if let Err(e) = store.export_native_style(layer, dir) {
            tracing::warn!(layer = %layer.name, error = %e, "native style export failed");
        }
        let Some(descriptor) = descriptor else {
            return;
        };
        for icon in &descriptor.icons {
            if let Err(e) = std::fs::copy(&icon.path, dir.join(&icon.name)) {
                tracing::warn!(
                    layer = %layer.name,
                    icon = %icon.name,
                    error = %e,
                    "icon copy failed"
                );
            }
        }
    }
}

/// Parse an optional override; `None` when absent or malformed
#[must_use]
pub fn parse_override<T: FromStr>(value: Option<&str>) -> Option<T> {
    value?.trim().parse().ok()
}

fn override_or(layer: &MapLayer, key: &str, raw: Option<String>, default: f64) -> f64 {
    match parse_override::<f64>(raw.as_deref()) {
        Some(v) if v.is_finite() => v,
        _ => {
            if let Some(raw) = raw {
                tracing::warn!(
                    layer = %layer.name,
                    key,
                    value = %raw,
                    "invalid override, using default"
                );
            }
            default
        }
    }
}

fn dimension_or(layer: &MapLayer, key: &str, raw: Option<String>, default: u32) -> u32 {
    match parse_override::<u32>(raw.as_deref()) {
        Some(v) if v > 0 => v,
        _ => {
            if let Some(raw) = raw {
                tracing::warn!(
                    layer = %layer.name,
                    key,
                    value = %raw,
                    "invalid override, using default"
                );
            }
            default
        }
    }
}

/// First `TYPENAME` value in the query part of a data source string
#[must_use]
pub fn type_name(data_source: &str) -> Option<String> {
    let (_, query) = data_source.split_once('?')?;
    let query = query.split('#').next().unwrap_or_default();
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(k, v)| k == TYPENAME_KEY && !v.is_empty())
        .map(|(_, v)| v.into_owned())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::layer::ProjectFile;
    use crate::style::ProjectStyleTranslator;
    use proptest::prelude::*;
    use tempfile::TempDir;

    const PROJECT: &str = r#"
layers:
  - id: l1
    name: test_points
    kind: vector
    data_source: "http://h/geoserver/wfs?SERVICE=WFS&TYPENAME=sf:bugsites&SRSNAME=EPSG:26713"
    variables:
      expected_ssim: "0.85"
      expected_mse: abc
      bbox: ""
      width: "300"
      height: "497.5"
    style:
      adapted: "<NamedLayer><Name>test_points</Name></NamedLayer>"
      sld: "<sld/>"
  - id: l2
    name: test_no_typename
    kind: vector
    data_source: "http://h/geoserver/wfs?SERVICE=WFS"
  - id: l3
    name: test_dem
    kind: raster
    data_source: "http://h/wcs?TYPENAME=sf:dem"
  - id: l4
    name: roads
    kind: vector
    data_source: "http://h/wfs?TYPENAME=sf:roads"
  - id: l5
    name: test_roads
    kind: vector
    data_source: "http://h/wfs?TYPENAME=sf:roads"
    variables:
      bbox: "1,2,3,4"
  - id: l6
    name: test_points
    kind: vector
    data_source: "http://h/wfs?TYPENAME=sf:bugsites"
"#;

    fn extract(project: &ProjectFile) -> Vec<Extracted> {
        let config = HarnessConfig::default();
        Extractor::new(&config).extract(project, &ProjectStyleTranslator::new(project))
    }

    #[test]
    fn test_selects_prefixed_vector_layers() {
        let project = ProjectFile::from_yaml(PROJECT).unwrap();
        let out = extract(&project);
        // l1, l2, l5, l6 (raster l3 and unprefixed l4 excluded)
        assert_eq!(out.len(), 4);
    }

    #[test]
    fn test_overrides_and_fallbacks() {
        let project = ProjectFile::from_yaml(PROJECT).unwrap();
        let out = extract(&project);
        let case = out[0].as_ref().unwrap();
        assert_eq!(case.name, "test_points");
        assert_eq!(case.target_layer_name, "sf:bugsites");
        assert!((case.thresholds.ssim - 0.85).abs() < f64::EPSILON);
        assert!((case.thresholds.mse - 500.0).abs() < f64::EPSILON);
        assert!((case.thresholds.template_match - 0.5).abs() < f64::EPSILON);
        assert_eq!(case.bbox.as_str(), crate::config::DEFAULT_BBOX);
        assert_eq!(case.width, 300);
        assert_eq!(case.height, 497);
    }

    #[test]
    fn test_style_renamed_to_target_layer() {
        let project = ProjectFile::from_yaml(PROJECT).unwrap();
        let out = extract(&project);
        let case = out[0].as_ref().unwrap();
        assert_eq!(case.style_text, "<NamedLayer><Name>sf:bugsites</Name></NamedLayer>");
    }

    #[test]
    fn test_missing_typename_fails_only_that_layer() {
        let project = ProjectFile::from_yaml(PROJECT).unwrap();
        let out = extract(&project);
        let failure = out[1].as_ref().unwrap_err();
        assert_eq!(failure.layer_name, "test_no_typename");
        assert!(matches!(failure.error, ParityError::MissingTypeName { .. }));
        assert!(out[2].is_ok());
    }

    #[test]
    fn test_unsupported_style_is_empty() {
        let project = ProjectFile::from_yaml(PROJECT).unwrap();
        let out = extract(&project);
        let case = out[2].as_ref().unwrap();
        assert_eq!(case.name, "test_roads");
        assert!(case.style_text.is_empty());
        assert_eq!(case.bbox.as_str(), "1,2,3,4");
    }

    #[test]
    fn test_duplicate_name_reported() {
        let project = ProjectFile::from_yaml(PROJECT).unwrap();
        let out = extract(&project);
        let failure = out[3].as_ref().unwrap_err();
        assert_eq!(failure.record_name, "test_points [l6]");
        assert!(matches!(failure.error, ParityError::DuplicateName { .. }));
    }

    #[test]
    fn test_extraction_is_idempotent() {
        let project = ProjectFile::from_yaml(PROJECT).unwrap();
        let first: Vec<_> = extract(&project).into_iter().filter_map(Result::ok).collect();
        let second: Vec<_> = extract(&project).into_iter().filter_map(Result::ok).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_audit_export_written() {
        let dir = TempDir::new().unwrap();
        let project = ProjectFile::from_yaml(PROJECT).unwrap();
        let config = HarnessConfig::default();
        let _ = Extractor::new(&config)
            .with_audit_dir(dir.path())
            .extract(&project, &ProjectStyleTranslator::new(&project));
        assert!(dir.path().join("test_points_sld_1.1.sld").exists());
    }

    #[test]
    fn test_type_name() {
        assert_eq!(
            type_name("http://h/wfs?SERVICE=WFS&TYPENAME=sf%3Aroads&TYPENAME=x").as_deref(),
            Some("sf:roads")
        );
        assert_eq!(type_name("http://h/wfs?typename=sf:roads"), None);
        assert_eq!(type_name("dbname='gis' table=roads"), None);
        assert_eq!(type_name("http://h/wfs?TYPENAME="), None);
    }

    #[test]
    fn test_bbox_parse() {
        assert!(Bbox::parse("1, 2, 3, 4").is_some());
        assert!(Bbox::parse("1,2,3").is_none());
        assert!(Bbox::parse("1,2,3,x").is_none());
        assert!(Bbox::parse("1,2,3,inf").is_none());
    }

    #[test]
    fn test_title() {
        let project = ProjectFile::from_yaml(PROJECT).unwrap();
        let out = extract(&project);
        assert_eq!(out[0].as_ref().unwrap().title(), "test points");
    }

    proptest! {
        #[test]
        fn prop_valid_ssim_override_wins(v in -1.0f64..1.0) {
            let yaml = format!(
                "layers:\n  - name: test_x\n    kind: vector\n    data_source: 'http://h?TYPENAME=a'\n    variables:\n      expected_ssim: '{v}'\n"
            );
            let project = ProjectFile::from_yaml(&yaml).unwrap();
            let case = extract(&project).remove(0).unwrap();
            prop_assert!((case.thresholds.ssim - v).abs() < 1e-12);
        }

        #[test]
        fn prop_non_numeric_override_falls_back(s in "[a-zA-Z ]{0,12}") {
            let yaml = format!(
                "layers:\n  - name: test_x\n    kind: vector\n    data_source: 'http://h?TYPENAME=a'\n    variables:\n      expected_ssim: '{s}'\n      width: '{s}'\n"
            );
            let project = ProjectFile::from_yaml(&yaml).unwrap();
            let case = extract(&project).remove(0).unwrap();
            prop_assert!((case.thresholds.ssim - 0.6).abs() < f64::EPSILON);
            prop_assert_eq!(case.width, 497);
        }
    }
}
