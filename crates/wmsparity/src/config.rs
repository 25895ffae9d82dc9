//! Harness configuration.
//!
//! Resolution order, lowest to highest precedence:
//!
//! 1. built-in defaults ([`HarnessConfig::default`])
//! 2. the main YAML file
//! 3. the local override YAML file (`<stem>.local.yaml` next to the main file,
//!    or an explicit path)
//! 4. command-line flags, applied by the caller through the `with_*` setters
//!
//! Every file is a partial [`ConfigLayer`]; omitted fields keep the value of
//! the layer below. Relative paths inside a file resolve against that file's
//! directory. The resolved [`HarnessConfig`] is immutable for the rest of the run.

use crate::compare::Thresholds;
use crate::extract::Bbox;
use crate::result::{ParityError, ParityResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Default render extent (minY,minX,maxY,maxX in EPSG:4326 axis order)
pub const DEFAULT_BBOX: &str =
    "44.36645793914795,-103.8418550491333,44.44324207305908,-103.76507091522217";

/// Default render width and height in pixels
pub const DEFAULT_SIZE: u32 = 497;

/// Default prefix marking a layer as a test case
pub const DEFAULT_LAYER_PREFIX: &str = "test_";

/// One WMS endpoint under test
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Short label used in file names and the report (e.g. `qgis`)
    pub label: String,
    /// Base URL; an existing query string is preserved
    pub url: String,
    /// Fixed parameters appended to every request to this endpoint
    #[serde(default)]
    pub extra_params: BTreeMap<String, String>,
    /// When set, the server-side project path is sent under this parameter name
    #[serde(default)]
    pub project_param: Option<String>,
}

impl EndpointConfig {
    /// Create an endpoint with no extra parameters
    #[must_use]
    pub fn new(label: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            url: url.into(),
            extra_params: BTreeMap::new(),
            project_param: None,
        }
    }

    /// Add a fixed extra parameter
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_params.insert(key.into(), value.into());
        self
    }

    /// Send the server-side project path under `key`
    #[must_use]
    pub fn with_project_param(mut self, key: impl Into<String>) -> Self {
        self.project_param = Some(key.into());
        self
    }
}

/// Global render geometry and thresholds, overridable per layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderDefaults {
    /// Bounding box as four comma-separated numbers
    pub bbox: String,
    /// Image width in pixels
    pub width: u32,
    /// Image height in pixels
    pub height: u32,
    /// Acceptance thresholds
    pub thresholds: Thresholds,
}

impl Default for RenderDefaults {
    fn default() -> Self {
        Self {
            bbox: DEFAULT_BBOX.to_string(),
            width: DEFAULT_SIZE,
            height: DEFAULT_SIZE,
            thresholds: Thresholds::default(),
        }
    }
}

/// Fully resolved harness configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarnessConfig {
    /// Endpoint A: renders the layer from the project itself
    pub source: EndpointConfig,
    /// Endpoint B: renders the mapped dataset with the adapted style
    pub target: EndpointConfig,
    /// Map definition holding the test layers
    pub project: PathBuf,
    /// Project path as the source server reads it; sent under its `project_param`
    pub server_project: Option<String>,
    /// Where images, styles and the report are written
    pub results_dir: PathBuf,
    /// Directory with `row.html` / `main.html`; built-in templates otherwise
    pub templates_dir: Option<PathBuf>,
    /// Image shown in place of a failed render; generated when absent
    pub failure_image: Option<PathBuf>,
    /// Layer name prefix that marks a test layer
    pub layer_prefix: String,
    /// Default geometry and thresholds
    pub defaults: RenderDefaults,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            source: EndpointConfig::new("qgis", "http://localhost:80/cgi-bin/qgis_mapserv.fcgi?")
                .with_project_param("MAP"),
            target: EndpointConfig::new("geoserver", "http://localhost:8080/geoserver/sf/wms?"),
            project: PathBuf::from("data/project.yaml"),
            server_project: None,
            results_dir: PathBuf::from("results"),
            templates_dir: None,
            failure_image: None,
            layer_prefix: DEFAULT_LAYER_PREFIX.to_string(),
            defaults: RenderDefaults::default(),
        }
    }
}

impl HarnessConfig {
    /// Resolve defaults, the main file and the local override file
    ///
    /// When `local` is `None`, `<stem>.local.yaml` beside `main` is used if it exists.
    pub fn load(main: Option<&Path>, local: Option<&Path>) -> ParityResult<Self> {
        let mut config = Self::default();

        if let Some(path) = main {
            config.apply(ConfigLayer::from_file(path)?);
        }

        let local = match (local, main) {
            (Some(path), _) => Some(path.to_path_buf()),
            (None, Some(path)) => Some(local_override_path(path)).filter(|p| p.is_file()),
            (None, None) => None,
        };
        if let Some(path) = local {
            tracing::debug!(path = %path.display(), "applying local configuration override");
            config.apply(ConfigLayer::from_file(&path)?);
        }

        config.validate()?;
        Ok(config)
    }

    /// Overlay a partial layer on top of this configuration
    pub fn apply(&mut self, layer: ConfigLayer) {
        if let Some(source) = layer.source {
            source.apply_to(&mut self.source);
        }
        if let Some(target) = layer.target {
            target.apply_to(&mut self.target);
        }
        if let Some(project) = layer.project {
            self.project = project;
        }
        if layer.server_project.is_some() {
            self.server_project = layer.server_project;
        }
        if let Some(dir) = layer.results_dir {
            self.results_dir = dir;
        }
        if layer.templates_dir.is_some() {
            self.templates_dir = layer.templates_dir;
        }
        if layer.failure_image.is_some() {
            self.failure_image = layer.failure_image;
        }
        if let Some(prefix) = layer.layer_prefix {
            self.layer_prefix = prefix;
        }
        if let Some(defaults) = layer.defaults {
            defaults.apply_to(&mut self.defaults);
        }
    }

    /// Set the project file
    #[must_use]
    pub fn with_project(mut self, project: impl Into<PathBuf>) -> Self {
        self.project = project.into();
        self
    }

    /// Set the results directory
    #[must_use]
    pub fn with_results_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.results_dir = dir.into();
        self
    }

    /// Check values that cannot be validated by deserialization alone
    pub fn validate(&self) -> ParityResult<()> {
        if Bbox::parse(&self.defaults.bbox).is_none() {
            return Err(ParityError::config(format!(
                "default bbox must be four comma-separated numbers, got {:?}",
                self.defaults.bbox
            )));
        }
        if self.defaults.width == 0 || self.defaults.height == 0 {
            return Err(ParityError::config("default width and height must be positive"));
        }
        for endpoint in [&self.source, &self.target] {
            if url::Url::parse(&endpoint.url).is_err() {
                return Err(ParityError::config(format!(
                    "endpoint {} has an invalid URL: {}",
                    endpoint.label, endpoint.url
                )));
            }
        }
        if self.source.label == self.target.label {
            return Err(ParityError::config("source and target labels must differ"));
        }
        Ok(())
    }

    /// Serialize as YAML (used by `wmsparity config`)
    pub fn to_yaml(&self) -> ParityResult<String> {
        Ok(serde_yaml_ng::to_string(self)?)
    }
}

/// Path of the local override file that accompanies `main`
///
/// `harness.yaml` → `harness.local.yaml`
#[must_use]
pub fn local_override_path(main: &Path) -> PathBuf {
    let stem = main
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = main
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_else(|| "yaml".to_string());
    main.with_file_name(format!("{stem}.local.{ext}"))
}

/// A partial configuration file
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigLayer {
    /// Endpoint A overrides
    pub source: Option<EndpointLayer>,
    /// Endpoint B overrides
    pub target: Option<EndpointLayer>,
    /// Project file
    pub project: Option<PathBuf>,
    /// Server-side project path, passed through verbatim
    pub server_project: Option<String>,
    /// Results directory
    pub results_dir: Option<PathBuf>,
    /// Templates directory
    pub templates_dir: Option<PathBuf>,
    /// Failure placeholder image
    pub failure_image: Option<PathBuf>,
    /// Test layer prefix
    pub layer_prefix: Option<String>,
    /// Default geometry and thresholds
    pub defaults: Option<DefaultsLayer>,
}

impl ConfigLayer {
    /// Parse a layer from YAML text
    pub fn from_yaml(text: &str) -> ParityResult<Self> {
        Ok(serde_yaml_ng::from_str(text)?)
    }

    /// Read a layer from disk, resolving relative paths against its directory
    pub fn from_file(path: &Path) -> ParityResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            ParityError::config(format!("cannot read {}: {e}", path.display()))
        })?;
        let layer = Self::from_yaml(&text).map_err(|e| {
            ParityError::config(format!("cannot parse {}: {e}", path.display()))
        })?;
        let base = path.parent().unwrap_or_else(|| Path::new(""));
        Ok(layer.resolve_paths(base))
    }

    /// Make every relative path absolute with respect to `base`
    #[must_use]
    pub fn resolve_paths(mut self, base: &Path) -> Self {
        let join = |p: PathBuf| if p.is_relative() { base.join(p) } else { p };
        self.project = self.project.map(join);
        self.results_dir = self.results_dir.map(join);
        self.templates_dir = self.templates_dir.map(join);
        self.failure_image = self.failure_image.map(join);
        self
    }
}

/// Partial endpoint settings
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EndpointLayer {
    /// Label
    pub label: Option<String>,
    /// Base URL
    pub url: Option<String>,
    /// Extra parameters, merged key by key
    pub extra_params: Option<BTreeMap<String, String>>,
    /// Project path parameter name
    pub project_param: Option<String>,
}

impl EndpointLayer {
    fn apply_to(self, endpoint: &mut EndpointConfig) {
        if let Some(label) = self.label {
            endpoint.label = label;
        }
        if let Some(url) = self.url {
            endpoint.url = url;
        }
        if let Some(params) = self.extra_params {
            endpoint.extra_params.extend(params);
        }
        if self.project_param.is_some() {
            endpoint.project_param = self.project_param;
        }
    }
}

/// Partial default geometry and thresholds
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DefaultsLayer {
    /// Bounding box
    pub bbox: Option<String>,
    /// Width
    pub width: Option<u32>,
    /// Height
    pub height: Option<u32>,
    /// Minimum SSIM
    pub expected_ssim: Option<f64>,
    /// Maximum MSE
    pub expected_mse: Option<f64>,
    /// Minimum template match
    pub expected_match: Option<f64>,
}

impl DefaultsLayer {
    fn apply_to(self, defaults: &mut RenderDefaults) {
        if let Some(bbox) = self.bbox {
            defaults.bbox = bbox;
        }
        if let Some(width) = self.width {
            defaults.width = width;
        }
        if let Some(height) = self.height {
            defaults.height = height;
        }
        if let Some(ssim) = self.expected_ssim {
            defaults.thresholds.ssim = ssim;
        }
        if let Some(mse) = self.expected_mse {
            defaults.thresholds.mse = mse;
        }
        if let Some(template_match) = self.expected_match {
            defaults.thresholds.template_match = template_match;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_match_reference_harness() {
        let config = HarnessConfig::default();
        assert_eq!(config.defaults.bbox, DEFAULT_BBOX);
        assert_eq!(config.defaults.width, 497);
        assert_eq!(config.defaults.height, 497);
        assert!((config.defaults.thresholds.ssim - 0.6).abs() < f64::EPSILON);
        assert!((config.defaults.thresholds.mse - 500.0).abs() < f64::EPSILON);
        assert!((config.defaults.thresholds.template_match - 0.5).abs() < f64::EPSILON);
        assert_eq!(config.source.project_param.as_deref(), Some("MAP"));
        assert!(config.target.project_param.is_none());
        assert!(config.server_project.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn test_local_override_path() {
        assert_eq!(
            local_override_path(Path::new("/etc/harness.yaml")),
            PathBuf::from("/etc/harness.local.yaml")
        );
        assert_eq!(
            local_override_path(Path::new("conf")),
            PathBuf::from("conf.local.yaml")
        );
    }

    #[test]
    fn test_layer_overrides_only_given_fields() {
        let mut config = HarnessConfig::default();
        let layer = ConfigLayer::from_yaml(
            "target:\n  url: http://gs:8080/geoserver/wms?\ndefaults:\n  expected_ssim: 0.9\n",
        )
        .unwrap();
        config.apply(layer);
        assert_eq!(config.target.url, "http://gs:8080/geoserver/wms?");
        assert_eq!(config.target.label, "geoserver");
        assert!((config.defaults.thresholds.ssim - 0.9).abs() < f64::EPSILON);
        assert!((config.defaults.thresholds.mse - 500.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_extra_params_merge_by_key() {
        let mut config = HarnessConfig::default();
        config.source = config.source.with_param("DPI", "96");
        let layer =
            ConfigLayer::from_yaml("source:\n  extra_params:\n    TRANSPARENT: 'TRUE'\n").unwrap();
        config.apply(layer);
        assert_eq!(config.source.extra_params.len(), 2);
        assert_eq!(config.source.extra_params["DPI"], "96");
    }

    #[test]
    fn test_unknown_field_rejected() {
        assert!(ConfigLayer::from_yaml("resultz_dir: x\n").is_err());
    }

    #[test]
    fn test_local_file_wins_over_main() {
        let dir = TempDir::new().unwrap();
        let main = dir.path().join("harness.yaml");
        fs::write(&main, "results_dir: out\ndefaults:\n  width: 300\n").unwrap();
        fs::write(
            dir.path().join("harness.local.yaml"),
            "defaults:\n  width: 200\n",
        )
        .unwrap();

        let config = HarnessConfig::load(Some(&main), None).unwrap();
        assert_eq!(config.defaults.width, 200);
        assert_eq!(config.results_dir, dir.path().join("out"));
    }

    #[test]
    fn test_explicit_local_path() {
        let dir = TempDir::new().unwrap();
        let local = dir.path().join("mine.yaml");
        fs::write(&local, "layer_prefix: regress_\n").unwrap();
        let config = HarnessConfig::load(None, Some(&local)).unwrap();
        assert_eq!(config.layer_prefix, "regress_");
    }

    #[test]
    fn test_invalid_bbox_rejected() {
        let mut config = HarnessConfig::default();
        config.defaults.bbox = "1,2,3".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_same_labels_rejected() {
        let mut config = HarnessConfig::default();
        config.target.label = config.source.label.clone();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_server_project_not_resolved_against_file() {
        let dir = TempDir::new().unwrap();
        let main = dir.path().join("harness.yaml");
        fs::write(&main, "project: p.yaml\nserver_project: /srv/qgis/p.qgs\n").unwrap();
        let config = HarnessConfig::load(Some(&main), None).unwrap();
        assert_eq!(config.project, dir.path().join("p.yaml"));
        assert_eq!(config.server_project.as_deref(), Some("/srv/qgis/p.qgs"));
    }

    #[test]
    fn test_yaml_round_trip_through_layer() {
        let yaml = HarnessConfig::default().to_yaml().unwrap();
        assert!(yaml.contains("geoserver"));
        assert!(yaml.contains("layer_prefix"));
    }
}
