//! Visual styling for normalized graphs and rendering to interactive documents.

pub mod error;
pub mod format;
pub mod render;
pub mod style;

pub use error::VisualError;
pub use format::{
    comparison_report, compare_specs, summarize, to_visual_spec, GraphSummary, VisualEdge, VisualNode, VisualSpec,
};
pub use render::{save, save_comparison, HtmlRenderer, Renderer, Surface};
pub use style::{EdgeStyle, EdgeStyleOverride, NodeStyle, NodeStyleOverride, Palette, Shape, StyleOverrides};
