//! Read-only view of the map definition that holds the test layers.
//!
//! The harness never edits layers. It asks a [`LayerStore`] for the layers in
//! store order, for per-layer variables by name, and for an audit export of a
//! layer's native style. [`ProjectFile`] is the YAML-backed store shipped with
//! the crate:
//!
//! ```yaml
//! layers:
//!   - id: bugsites_20160310
//!     name: test_bugsites_circle
//!     kind: vector
//!     data_source: "http://localhost:8080/geoserver/wfs?SERVICE=WFS&TYPENAME=sf:bugsites"
//!     variables:
//!       expected_ssim: 0.8
//!       width: "300"
//!     style:
//!       native: "<qgis>...</qgis>"
//!       sld: "<StyledLayerDescriptor>...</StyledLayerDescriptor>"
//!       adapted: "<StyledLayerDescriptor>...</StyledLayerDescriptor>"
//! ```

use crate::result::{ParityError, ParityResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Kind of data backing a layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerKind {
    /// Vector (tabular/geometry) source
    Vector,
    /// Raster source
    Raster,
    /// Plugin-provided layer
    Plugin,
}

impl LayerKind {
    /// Only vector layers can become test cases
    #[must_use]
    pub const fn is_testable(self) -> bool {
        matches!(self, Self::Vector)
    }
}

impl fmt::Display for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Vector => write!(f, "vector"),
            Self::Raster => write!(f, "raster"),
            Self::Plugin => write!(f, "plugin"),
        }
    }
}

/// A layer as seen through the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapLayer {
    /// Opaque store handle
    pub id: String,
    /// Layer name
    pub name: String,
    /// Backing data kind
    pub kind: LayerKind,
    /// Data source connection string
    pub data_source: String,
}

/// Provider of layers with metadata
pub trait LayerStore {
    /// All layers, in store iteration order
    fn layers(&self) -> &[MapLayer];

    /// Layer-scoped variable, if set
    fn variable(&self, layer: &MapLayer, key: &str) -> Option<String>;

    /// Write the layer's native style exports into `dir` for audit
    fn export_native_style(&self, layer: &MapLayer, dir: &Path) -> std::io::Result<Vec<PathBuf>>;
}

/// Icon referenced by an adapted style
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IconAsset {
    /// File name the style refers to
    pub name: String,
    /// Icon location on disk
    pub path: PathBuf,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct StyleEntry {
    #[serde(default)]
    native: Option<String>,
    #[serde(default)]
    sld: Option<String>,
    #[serde(default)]
    adapted: Option<String>,
    #[serde(default)]
    icons: Vec<IconAsset>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct LayerEntry {
    #[serde(default)]
    id: Option<String>,
    name: String,
    kind: LayerKind,
    #[serde(default)]
    data_source: String,
    #[serde(default)]
    variables: BTreeMap<String, serde_yaml_ng::Value>,
    #[serde(default)]
    style: StyleEntry,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProjectDocument {
    #[serde(default)]
    layers: Vec<LayerEntry>,
}

/// YAML map definition
#[derive(Debug, Clone)]
pub struct ProjectFile {
    layers: Vec<MapLayer>,
    variables: BTreeMap<String, BTreeMap<String, serde_yaml_ng::Value>>,
    styles: BTreeMap<String, StyleEntry>,
}

impl ProjectFile {
    /// Parse a project from YAML text
    pub fn from_yaml(text: &str) -> ParityResult<Self> {
        let doc: ProjectDocument = serde_yaml_ng::from_str(text).map_err(|e| ParityError::Project {
            message: e.to_string(),
        })?;

        let mut layers = Vec::with_capacity(doc.layers.len());
        let mut variables = BTreeMap::new();
        let mut styles = BTreeMap::new();
        for (index, entry) in doc.layers.into_iter().enumerate() {
            let id = entry
                .id
                .unwrap_or_else(|| format!("{}_{index}", entry.name));
            if variables.contains_key(&id) {
                return Err(ParityError::Project {
                    message: format!("layer id {id} is used twice"),
                });
            }
            variables.insert(id.clone(), entry.variables);
            styles.insert(id.clone(), entry.style);
            layers.push(MapLayer {
                id,
                name: entry.name,
                kind: entry.kind,
                data_source: entry.data_source,
            });
        }

        Ok(Self {
            layers,
            variables,
            styles,
        })
    }

    /// Load a project from disk
    pub fn load(path: &Path) -> ParityResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| ParityError::Project {
            message: format!("cannot read {}: {e}", path.display()),
        })?;
        Self::from_yaml(&text)
    }

    /// Pre-adapted style text for the second server, if recorded
    #[must_use]
    pub fn adapted_style(&self, layer: &MapLayer) -> Option<&str> {
        self.styles.get(&layer.id)?.adapted.as_deref()
    }

    /// Icons used by the adapted style
    #[must_use]
    pub fn icons(&self, layer: &MapLayer) -> &[IconAsset] {
        self.styles
            .get(&layer.id)
            .map_or(&[][..], |s| s.icons.as_slice())
    }
}

impl LayerStore for ProjectFile {
    fn layers(&self) -> &[MapLayer] {
        &self.layers
    }

    fn variable(&self, layer: &MapLayer, key: &str) -> Option<String> {
        match self.variables.get(&layer.id)?.get(key)? {
            serde_yaml_ng::Value::String(s) => Some(s.clone()),
            serde_yaml_ng::Value::Number(n) => Some(n.to_string()),
            serde_yaml_ng::Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    fn export_native_style(&self, layer: &MapLayer, dir: &Path) -> std::io::Result<Vec<PathBuf>> {
        let Some(style) = self.styles.get(&layer.id) else {
            return Ok(Vec::new());
        };
        let mut written = Vec::new();
        if let Some(native) = &style.native {
            let path = dir.join(format!("{}.qml", layer.name));
            std::fs::write(&path, native)?;
            written.push(path);
        }
        if let Some(sld) = &style.sld {
            let path = dir.join(format!("{}_sld_1.1.sld", layer.name));
            std::fs::write(&path, sld)?;
            written.push(path);
        }
        Ok(written)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const PROJECT: &str = r#"
layers:
  - id: a1
    name: test_points
    kind: vector
    data_source: "http://h/wfs?TYPENAME=sf:bugsites"
    variables:
      expected_ssim: 0.8
      width: "300"
      flag: true
      nested: [1, 2]
    style:
      native: "<qgis/>"
      sld: "<StyledLayerDescriptor/>"
      adapted: "<sld test_points/>"
  - name: dem
    kind: raster
"#;

    #[test]
    fn test_parse_layers_in_order() {
        let project = ProjectFile::from_yaml(PROJECT).unwrap();
        let layers = project.layers();
        assert_eq!(layers.len(), 2);
        assert_eq!(layers[0].name, "test_points");
        assert_eq!(layers[0].kind, LayerKind::Vector);
        assert_eq!(layers[1].id, "dem_1");
        assert_eq!(layers[1].kind, LayerKind::Raster);
    }

    #[test]
    fn test_variables_are_stringified() {
        let project = ProjectFile::from_yaml(PROJECT).unwrap();
        let layer = &project.layers()[0];
        assert_eq!(project.variable(layer, "expected_ssim").as_deref(), Some("0.8"));
        assert_eq!(project.variable(layer, "width").as_deref(), Some("300"));
        assert_eq!(project.variable(layer, "flag").as_deref(), Some("true"));
        assert_eq!(project.variable(layer, "nested"), None);
        assert_eq!(project.variable(layer, "missing"), None);
    }

    #[test]
    fn test_export_native_style() {
        let dir = TempDir::new().unwrap();
        let project = ProjectFile::from_yaml(PROJECT).unwrap();
        let written = project
            .export_native_style(&project.layers()[0], dir.path())
            .unwrap();
        assert_eq!(written.len(), 2);
        assert!(dir.path().join("test_points.qml").exists());
        assert!(dir.path().join("test_points_sld_1.1.sld").exists());

        let none = project
            .export_native_style(&project.layers()[1], dir.path())
            .unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let yaml = "layers:\n  - {id: x, name: a, kind: vector}\n  - {id: x, name: b, kind: vector}\n";
        assert!(ProjectFile::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_kind_testable() {
        assert!(LayerKind::Vector.is_testable());
        assert!(!LayerKind::Raster.is_testable());
        assert!(!LayerKind::Plugin.is_testable());
    }
}
