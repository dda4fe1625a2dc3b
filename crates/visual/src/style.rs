use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Shape {
    Dot,
    Triangle,
    Square,
    Diamond,
    Star,
    Ellipse,
    Box,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeStyle {
    pub color: String,
    pub shape: Shape,
    pub size: u32,
    pub border_width: u32,
    pub border_color: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeStyle {
    pub color: String,
    pub width: u32,
}

/// Per-call style changes. Unset fields keep the palette value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeStyleOverride {
    pub color: Option<String>,
    pub shape: Option<Shape>,
    pub size: Option<u32>,
    pub border_width: Option<u32>,
    pub border_color: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EdgeStyleOverride {
    pub color: Option<String>,
    pub width: Option<u32>,
}

/// Overrides keyed by node label or relationship type (case-insensitive).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StyleOverrides {
    #[serde(default)]
    pub nodes: BTreeMap<String, NodeStyleOverride>,
    #[serde(default)]
    pub edges: BTreeMap<String, EdgeStyleOverride>,
}

impl StyleOverrides {
    pub fn node(mut self, label: &str, style: NodeStyleOverride) -> Self {
        self.nodes.insert(style_key(label), style);
        self
    }

    pub fn edge(mut self, rel_type: &str, style: EdgeStyleOverride) -> Self {
        self.edges.insert(style_key(rel_type), style);
        self
    }

    fn node_override(&self, key: &str) -> Option<&NodeStyleOverride> {
        self.nodes.iter().find(|(k, _)| style_key(k) == key).map(|(_, v)| v)
    }

    fn edge_override(&self, key: &str) -> Option<&EdgeStyleOverride> {
        self.edges.iter().find(|(k, _)| style_key(k) == key).map(|(_, v)| v)
    }
}

pub fn style_key(label: &str) -> String {
    label.trim().to_uppercase()
}

fn node(color: &str, shape: Shape, size: u32, border_width: u32, border_color: &str) -> NodeStyle {
    NodeStyle {
        color: color.to_string(),
        shape,
        size,
        border_width,
        border_color: border_color.to_string(),
    }
}

fn edge(color: &str, width: u32) -> EdgeStyle {
    EdgeStyle {
        color: color.to_string(),
        width,
    }
}

/// Default styles by type, with a grey fallback for anything unlisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Palette {
    nodes: BTreeMap<String, NodeStyle>,
    edges: BTreeMap<String, EdgeStyle>,
    default_node: NodeStyle,
    default_edge: EdgeStyle,
}

impl Default for Palette {
    fn default() -> Self {
        let nodes = [
            ("CHARACTER", node("#3498db", Shape::Dot, 25, 2, "#2980b9")),
            ("EMOTION", node("#e74c3c", Shape::Triangle, 20, 2, "#c0392b")),
            ("THEME", node("#9b59b6", Shape::Square, 22, 2, "#8e44ad")),
            ("PERSON", node("#2ecc71", Shape::Dot, 25, 2, "#27ae60")),
            ("ORGANIZATION", node("#f39c12", Shape::Square, 24, 2, "#d68910")),
            ("LOCATION", node("#1abc9c", Shape::Diamond, 20, 2, "#16a085")),
            ("EVENT", node("#e67e22", Shape::Star, 20, 2, "#ca6f1e")),
            ("CONCEPT", node("#34495e", Shape::Ellipse, 18, 1, "#2c3e50")),
        ];
        let edges = [
            ("RELATED_TO", edge("#34495e", 2)),
            ("FEELS", edge("#e67e22", 3)),
            ("INTERACTS_WITH", edge("#9b59b6", 2)),
            ("WORKS_AT", edge("#f39c12", 2)),
        ];

        Self {
            nodes: nodes.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
            edges: edges.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
            default_node: node("#95a5a6", Shape::Dot, 15, 1, "#7f8c8d"),
            default_edge: edge("#bdc3c7", 1),
        }
    }
}

impl Palette {
    pub fn node_style(&self, label: &str) -> &NodeStyle {
        self.nodes.get(&style_key(label)).unwrap_or(&self.default_node)
    }

    pub fn edge_style(&self, rel_type: &str) -> &EdgeStyle {
        self.edges.get(&style_key(rel_type)).unwrap_or(&self.default_edge)
    }

    /// Palette style with any override for the same type laid on top.
    pub fn resolve_node(&self, label: &str, overrides: &StyleOverrides) -> NodeStyle {
        let mut style = self.node_style(label).clone();
        if let Some(o) = overrides.node_override(&style_key(label)) {
            if let Some(color) = &o.color {
                style.color = color.clone();
            }
            if let Some(shape) = o.shape {
                style.shape = shape;
            }
            if let Some(size) = o.size {
                style.size = size;
            }
            if let Some(width) = o.border_width {
                style.border_width = width;
            }
            if let Some(color) = &o.border_color {
                style.border_color = color.clone();
            }
        }
        style
    }

    pub fn resolve_edge(&self, rel_type: &str, overrides: &StyleOverrides) -> EdgeStyle {
        let mut style = self.edge_style(rel_type).clone();
        if let Some(o) = overrides.edge_override(&style_key(rel_type)) {
            if let Some(color) = &o.color {
                style.color = color.clone();
            }
            if let Some(width) = o.width {
                style.width = width;
            }
        }
        style
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_types() {
        let palette = Palette::default();
        assert_eq!(palette.node_style("character").color, "#3498db");
        assert_eq!(palette.node_style("EMOTION").shape, Shape::Triangle);
        assert_eq!(palette.edge_style("feels").width, 3);
    }

    #[test]
    fn test_unknown_type_uses_default() {
        let palette = Palette::default();
        assert_eq!(palette.node_style("spaceship"), palette.node_style("default"));
        assert_eq!(palette.edge_style("orbits").color, "#bdc3c7");
    }

    #[test]
    fn test_override_wins_over_palette() {
        let palette = Palette::default();
        let overrides = StyleOverrides::default().node(
            "person",
            NodeStyleOverride {
                color: Some("#000000".to_string()),
                ..Default::default()
            },
        );

        let style = palette.resolve_node("Person", &overrides);
        assert_eq!(style.color, "#000000");
        assert_eq!(style.size, palette.node_style("person").size);
        // Others untouched.
        assert_eq!(palette.resolve_node("theme", &overrides).color, "#9b59b6");
    }

    #[test]
    fn test_override_for_unknown_type() {
        let palette = Palette::default();
        let mut overrides = StyleOverrides::default();
        overrides.edges.insert(
            "orbits".to_string(),
            EdgeStyleOverride {
                width: Some(5),
                ..Default::default()
            },
        );

        let style = palette.resolve_edge("ORBITS", &overrides);
        assert_eq!(style.width, 5);
        assert_eq!(style.color, "#bdc3c7");
    }
}
