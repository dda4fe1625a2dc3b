use extract::{GraphResult, Node, Relationship};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::error::VisualError;
use crate::style::{Palette, Shape, StyleOverrides, style_key};

const LABEL_CHARS: usize = 20;

/// Node property keys already shown in the fixed part of the hover text.
const HOVER_EXCLUDED: &[&str] = &["id", "label", "text", "normalized_text", "start_pos", "end_pos"];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VisualNode {
    pub id: String,
    /// Display text, truncated.
    pub label: String,
    /// Node type, upper-cased.
    pub group: String,
    /// Hover text (HTML).
    pub title: String,
    pub color: String,
    pub shape: Shape,
    pub size: u32,
    pub border_width: u32,
    pub border_color: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VisualEdge {
    pub from: String,
    pub to: String,
    pub label: String,
    pub title: String,
    pub color: String,
    pub width: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VisualSpec {
    pub title: String,
    pub nodes: Vec<VisualNode>,
    pub edges: Vec<VisualEdge>,
    pub summary: GraphSummary,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GraphSummary {
    pub total_nodes: usize,
    pub total_relationships: usize,
    pub node_types: BTreeMap<String, usize>,
    pub relationship_types: BTreeMap<String, usize>,
}

pub fn to_visual_spec(graph: &GraphResult, overrides: &StyleOverrides) -> VisualSpec {
    let title = format!("Node Visualization - {}", graph.provenance().strategy);
    build(graph, title, &Palette::default(), overrides)
}

/// One spec per graph, all styled from the same palette.
pub fn compare_specs(
    graphs: &[GraphResult],
    titles: &[String],
    overrides: &StyleOverrides,
) -> Result<Vec<VisualSpec>, VisualError> {
    if graphs.len() != titles.len() {
        return Err(VisualError::LengthMismatch {
            graphs: graphs.len(),
            titles: titles.len(),
        });
    }

    let palette = Palette::default();
    Ok(graphs
        .iter()
        .zip(titles)
        .enumerate()
        .map(|(i, (graph, title))| build(graph, format!("Comparison {}: {}", i + 1, title), &palette, overrides))
        .collect())
}

fn build(graph: &GraphResult, title: String, palette: &Palette, overrides: &StyleOverrides) -> VisualSpec {
    let nodes = graph
        .nodes()
        .iter()
        .map(|node| {
            let style = palette.resolve_node(&node.label, overrides);
            VisualNode {
                id: node.id.clone(),
                label: display_label(&node.text),
                group: style_key(&node.label),
                title: node_hover(node),
                color: style.color,
                shape: style.shape,
                size: style.size,
                border_width: style.border_width,
                border_color: style.border_color,
            }
        })
        .collect();

    let edges = graph
        .relationships()
        .iter()
        .map(|rel| {
            let style = palette.resolve_edge(&rel.rel_type, overrides);
            VisualEdge {
                from: rel.source_id.clone(),
                to: rel.target_id.clone(),
                label: style_key(&rel.rel_type),
                title: relationship_hover(graph, rel),
                color: style.color,
                width: style.width,
            }
        })
        .collect();

    VisualSpec {
        title,
        nodes,
        edges,
        summary: summarize(graph),
    }
}

pub fn display_label(text: &str) -> String {
    if text.chars().count() > LABEL_CHARS {
        let head: String = text.chars().take(LABEL_CHARS).collect();
        format!("{head}...")
    } else {
        text.to_string()
    }
}

fn node_hover(node: &Node) -> String {
    let mut lines = vec![
        format!("<b>ID:</b> {}", escape_html(&node.id)),
        format!("<b>Label:</b> {}", escape_html(&style_key(&node.label))),
        format!("<b>Text:</b> {}", escape_html(&node.text)),
    ];
    if let Some(first) = node.mentions.first() {
        lines.push(format!("<b>Position:</b> {}-{}", first.start, first.end));
    }
    for (key, value) in &node.properties {
        if HOVER_EXCLUDED.contains(&key.as_str()) || value.is_null() {
            continue;
        }
        lines.push(format!("<b>{}:</b> {}", escape_html(&title_case(key)), escape_html(&value_text(value))));
    }
    lines.join("<br>")
}

fn relationship_hover(graph: &GraphResult, rel: &Relationship) -> String {
    let endpoint = |id: &str| match graph.node(id) {
        Some(node) => format!("{} ({})", escape_html(&node.text), escape_html(&style_key(&node.label))),
        None => escape_html(id),
    };
    let trigger = rel
        .properties
        .get("trigger_text")
        .map(value_text)
        .unwrap_or_else(|| "N/A".to_string());

    let mut lines = vec![
        format!("<b>Type:</b> {}", escape_html(&style_key(&rel.rel_type))),
        format!("<b>Trigger:</b> {}", escape_html(&trigger)),
        format!("<b>From:</b> {}", endpoint(&rel.source_id)),
        format!("<b>To:</b> {}", endpoint(&rel.target_id)),
    ];
    if let Some(first) = rel.mentions.first() {
        lines.push(format!("<b>Position:</b> {}-{}", first.start, first.end));
    }
    lines.join("<br>")
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn title_case(key: &str) -> String {
    key.split('_')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

pub fn summarize(graph: &GraphResult) -> GraphSummary {
    let mut summary = GraphSummary {
        total_nodes: graph.nodes().len(),
        total_relationships: graph.relationships().len(),
        ..Default::default()
    };
    for node in graph.nodes() {
        *summary.node_types.entry(style_key(&node.label)).or_default() += 1;
    }
    for rel in graph.relationships() {
        *summary.relationship_types.entry(style_key(&rel.rel_type)).or_default() += 1;
    }
    summary
}

/// Plain-text side-by-side statistics for a comparison run.
pub fn comparison_report(specs: &[VisualSpec]) -> String {
    let mut out = String::from("Data Comparison Statistics\n");
    out.push_str(&"=".repeat(50));
    out.push_str("\n\n");

    for spec in specs {
        let s = &spec.summary;
        let _ = writeln!(out, "Title: {}", spec.title);
        let _ = writeln!(out, "Total Nodes: {}", s.total_nodes);
        let _ = writeln!(out, "Total Relationships: {}", s.total_relationships);
        let _ = writeln!(out, "Node Types: {}", counts(&s.node_types));
        let _ = writeln!(out, "Relationship Types: {}", counts(&s.relationship_types));
        out.push_str(&"-".repeat(30));
        out.push('\n');
    }
    out
}

fn counts(map: &BTreeMap<String, usize>) -> String {
    if map.is_empty() {
        return "none".to_string();
    }
    map.iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::style::NodeStyleOverride;
    use extract::strategy::ConfidenceLevel;
    use extract::{Endpoint, ExtractionSpan, GraphNormalizer};

    fn graph(strategy: &str) -> GraphResult {
        let spans = vec![
            ExtractionSpan::entity("character", "Juliet").with_interval(10, 16),
            ExtractionSpan::entity("emotion", "O Romeo, Romeo! wherefore art thou Romeo?")
                .with_attribute("feeling", "longing"),
            ExtractionSpan::entity("starship", "Enterprise"),
            ExtractionSpan::relation(
                "feels",
                "wherefore",
                Endpoint::typed("Juliet", "character"),
                Endpoint::typed("O Romeo, Romeo! wherefore art thou Romeo?", "emotion"),
            ),
        ];
        GraphNormalizer::new(ConfidenceLevel::Low).normalize(strategy, "", spans)
    }

    #[test]
    fn test_styles_follow_palette() {
        let spec = to_visual_spec(&graph("literary"), &StyleOverrides::default());
        assert_eq!(spec.nodes.len(), 3);
        assert_eq!(spec.nodes[0].color, "#3498db");
        assert_eq!(spec.nodes[1].shape, Shape::Triangle);
        // Unknown type falls back rather than failing.
        assert_eq!(spec.nodes[2].color, "#95a5a6");
        assert_eq!(spec.edges[0].width, 3);
        assert_eq!(spec.edges[0].label, "FEELS");
    }

    #[test]
    fn test_override_applies() {
        let overrides = StyleOverrides::default().node(
            "STARSHIP",
            NodeStyleOverride {
                shape: Some(Shape::Star),
                ..Default::default()
            },
        );
        let spec = to_visual_spec(&graph("literary"), &overrides);
        assert_eq!(spec.nodes[2].shape, Shape::Star);
    }

    #[test]
    fn test_label_truncation() {
        assert_eq!(display_label("Juliet"), "Juliet");
        assert_eq!(display_label("O Romeo, Romeo! wherefore art thou Romeo?"), "O Romeo, Romeo! wher...");
        assert_eq!(display_label(&"é".repeat(21)), format!("{}...", "é".repeat(20)));
    }

    #[test]
    fn test_hover_text() {
        let spec = to_visual_spec(&graph("literary"), &StyleOverrides::default());
        assert!(spec.nodes[0].title.contains("<b>Position:</b> 10-16"));
        assert!(spec.nodes[1].title.contains("<b>Feeling:</b> longing"));
        assert!(spec.edges[0].title.contains("<b>From:</b> Juliet (CHARACTER)"));
        assert!(spec.edges[0].title.contains("<b>Trigger:</b> wherefore"));
    }

    #[test]
    fn test_hover_escapes_html() {
        assert_eq!(escape_html("<script>&'\""), "&lt;script&gt;&amp;&#39;&quot;");
    }

    #[test]
    fn test_compare_specs() {
        let graphs = vec![graph("literary"), graph("default")];
        let titles = vec!["Literary".to_string(), "Default".to_string()];
        let specs = compare_specs(&graphs, &titles, &StyleOverrides::default()).unwrap();

        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].title, "Comparison 1: Literary");
        assert_eq!(specs[0].nodes, specs[1].nodes);

        let report = comparison_report(&specs);
        assert!(report.contains("Title: Comparison 2: Default"));
        assert!(report.contains("Node Types: CHARACTER=1, EMOTION=1, STARSHIP=1"));
    }

    #[test]
    fn test_compare_length_mismatch() {
        let err = compare_specs(&[graph("a")], &[], &StyleOverrides::default()).unwrap_err();
        assert!(matches!(err, VisualError::LengthMismatch { graphs: 1, titles: 0 }));
    }

    #[test]
    fn test_summarize() {
        let summary = summarize(&graph("literary"));
        assert_eq!(summary.total_nodes, 3);
        assert_eq!(summary.total_relationships, 1);
        assert_eq!(summary.relationship_types["FEELS"], 1);
    }
}
