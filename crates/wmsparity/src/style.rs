//! Style translation seam and style document normalisation.

use crate::layer::{IconAsset, LayerKind, MapLayer, ProjectFile};
use crate::result::{ParityError, ParityResult};

/// Adapted style for the second server
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TranslatedStyle {
    /// Style markup in the target server's dialect
    pub text: String,
    /// Icons the markup refers to
    pub icons: Vec<IconAsset>,
}

/// Why a style could not be produced
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StyleError {
    /// The translator has no way to express this layer's style
    #[error("no style translation for {kind} layer {layer}")]
    Unsupported {
        /// Layer name
        layer: String,
        /// Layer kind
        kind: LayerKind,
    },
}

/// Rewrites a layer's native style into the second server's dialect
pub trait StyleTranslator {
    /// Translate the style of `layer`
    fn translate(&self, layer: &MapLayer) -> Result<TranslatedStyle, StyleError>;
}

/// Serves the adapted styles recorded in a [`ProjectFile`]
#[derive(Debug, Clone, Copy)]
pub struct ProjectStyleTranslator<'a> {
    project: &'a ProjectFile,
}

impl<'a> ProjectStyleTranslator<'a> {
    /// Translate using the styles stored in `project`
    #[must_use]
    pub const fn new(project: &'a ProjectFile) -> Self {
        Self { project }
    }
}

impl StyleTranslator for ProjectStyleTranslator<'_> {
    fn translate(&self, layer: &MapLayer) -> Result<TranslatedStyle, StyleError> {
        let Some(text) = self.project.adapted_style(layer) else {
            return Err(StyleError::Unsupported {
                layer: layer.name.clone(),
                kind: layer.kind,
            });
        };
        Ok(TranslatedStyle {
            text: text.to_string(),
            icons: self.project.icons(layer).to_vec(),
        })
    }
}

const INDENT: &str = "    ";

/// Pretty-print a style document
///
/// The document must be well-formed XML. Output starts with an XML
/// declaration, nests elements with four-space indentation and drops
/// whitespace-only text and blank lines. Markup inside tags is copied
/// verbatim from the input.
pub fn normalize_style(text: &str) -> ParityResult<String> {
    let doc = roxmltree::Document::parse(text).map_err(|e| ParityError::InvalidStyle {
        message: e.to_string(),
    })?;

    let mut lines = vec![r#"<?xml version="1.0" ?>"#.to_string()];
    for child in doc.root().children() {
        write_node(text, child, 0, &mut lines);
    }

    Ok(lines
        .iter()
        .map(|l| l.trim_end())
        .filter(|l| !l.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n"))
}

fn write_node(src: &str, node: roxmltree::Node<'_, '_>, depth: usize, lines: &mut Vec<String>) {
    let pad = INDENT.repeat(depth);
    let range = node.range();

    if node.is_element() {
        let (Some(first), Some(last)) = (node.first_child(), node.last_child()) else {
            lines.push(format!("{pad}{}", &src[range]));
            return;
        };
        let open = &src[range.start..first.range().start];
        let close = &src[last.range().end..range.end];

        let only_text = node.children().all(|c| c.is_text());
        if only_text {
            let inner = src[first.range().start..last.range().end].trim();
            lines.push(format!("{pad}{open}{inner}{close}"));
            return;
        }

        lines.push(format!("{pad}{open}"));
        for child in node.children() {
            write_node(src, child, depth + 1, lines);
        }
        lines.push(format!("{pad}{close}"));
    } else if node.is_text() {
        let raw = src[range].trim();
        if !raw.is_empty() {
            lines.push(format!("{pad}{raw}"));
        }
    } else {
        // comments and processing instructions
        lines.push(format!("{pad}{}", src[range].trim()));
    }
}
