use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::VisualError;
use crate::format::{comparison_report, escape_html, VisualSpec};

const VIS_NETWORK_JS: &str = "https://unpkg.com/vis-network@9.1.9/standalone/umd/vis-network.min.js";

const NETWORK_OPTIONS: &str = r#"{
  "physics": {
    "enabled": true,
    "stabilization": {"iterations": 100},
    "barnesHut": {
      "gravitationalConstant": -8000,
      "centralGravity": 0.3,
      "springLength": 95,
      "springConstant": 0.04,
      "damping": 0.09
    }
  },
  "interaction": {
    "hover": true,
    "hoverConnectedEdges": true,
    "selectConnectedEdges": false
  }
}"#;

/// Where a rendered spec will be shown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Surface {
    pub width: String,
    pub height: String,
    pub background: String,
    /// `None` leaves the renderer's default font color.
    pub font_color: Option<String>,
}

impl Default for Surface {
    fn default() -> Self {
        Self {
            width: "100%".to_string(),
            height: "600px".to_string(),
            background: "#ffffff".to_string(),
            font_color: Some("#000000".to_string()),
        }
    }
}

/// Turns a [`VisualSpec`] into a displayable artifact.
pub trait Renderer {
    fn render(&self, spec: &VisualSpec, surface: &Surface) -> Result<String, VisualError>;

    /// File extension for artifacts produced by this renderer.
    fn extension(&self) -> &'static str;
}

/// Self-contained interactive HTML page backed by vis-network.
#[derive(Debug, Clone, Default)]
pub struct HtmlRenderer;

impl Renderer for HtmlRenderer {
    fn render(&self, spec: &VisualSpec, surface: &Surface) -> Result<String, VisualError> {
        let font = surface.font_color.as_deref();

        let nodes: Vec<_> = spec
            .nodes
            .iter()
            .map(|n| {
                let mut node = json!({
                    "id": n.id,
                    "label": n.label,
                    "title": n.title,
                    "group": n.group,
                    "shape": n.shape,
                    "size": n.size,
                    "borderWidth": n.border_width,
                    "borderWidthSelected": n.border_width + 1,
                    "color": {"background": n.color, "border": n.border_color},
                });
                if let Some(color) = font {
                    node["font"] = json!({ "color": color });
                }
                node
            })
            .collect();

        let edges: Vec<_> = spec
            .edges
            .iter()
            .map(|e| {
                json!({
                    "from": e.from,
                    "to": e.to,
                    "label": e.label,
                    "title": e.title,
                    "color": e.color,
                    "width": e.width,
                    "arrows": {"to": {"enabled": true, "scaleFactor": 1.2}},
                })
            })
            .collect();

        let nodes = script_json(&serde_json::to_string(&nodes)?);
        let edges = script_json(&serde_json::to_string(&edges)?);
        let title = escape_html(&spec.title);
        let heading_color = font.unwrap_or("inherit");

        Ok(format!(
            r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>{title}</title>
<script src="{VIS_NETWORK_JS}"></script>
<style>
body {{ margin: 0; background: {background}; font-family: sans-serif; }}
h1 {{ color: {heading_color}; text-align: center; }}
#graph {{ width: {width}; height: {height}; background: {background}; }}
</style>
</head>
<body>
<h1>{title}</h1>
<div id="graph"></div>
<script>
var nodes = new vis.DataSet({nodes});
var edges = new vis.DataSet({edges});
var options = {NETWORK_OPTIONS};
options.edges = {{ arrows: "to" }};
var container = document.getElementById("graph");
var network = new vis.Network(container, {{ nodes: nodes, edges: edges }}, options);
</script>
</body>
</html>
"#,
            background = escape_html(&surface.background),
            width = escape_html(&surface.width),
            height = escape_html(&surface.height),
        ))
    }

    fn extension(&self) -> &'static str {
        "html"
    }
}

/// Keep serialized JSON from closing the surrounding `<script>` element.
fn script_json(json: &str) -> String {
    json.replace("</", "<\\/")
}

/// Write an artifact, creating parent directories as needed.
pub fn save(path: &Path, artifact: &str) -> Result<PathBuf, VisualError> {
    let io_err = |source| VisualError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }
    std::fs::write(path, artifact).map_err(io_err)?;
    info!(path = %path.display(), bytes = artifact.len(), "Saved visualization");
    Ok(path.to_path_buf())
}

/// Render every spec into `dir` and write a statistics report next to them.
pub fn save_comparison<R: Renderer>(
    renderer: &R,
    specs: &[VisualSpec],
    surface: &Surface,
    dir: &Path,
) -> Result<Vec<PathBuf>, VisualError> {
    let mut paths = Vec::with_capacity(specs.len());
    for (i, spec) in specs.iter().enumerate() {
        let name: String = spec
            .title
            .rsplit(": ")
            .next()
            .unwrap_or(&spec.title)
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        let path = dir.join(format!("comparison_{}_{}.{}", i + 1, name, renderer.extension()));
        paths.push(save(&path, &renderer.render(spec, surface)?)?);
    }
    save(&dir.join("comparison_stats.txt"), &comparison_report(specs))?;
    Ok(paths)
}
