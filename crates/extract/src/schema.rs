use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Half-open character range `[start, end)` into the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharInterval {
    pub start: usize,
    pub end: usize,
}

/// One side of a relation span, referenced by its surface text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    pub text: String,
    /// Entity type the backend declared for this endpoint, if any.
    pub class: Option<String>,
}

impl Endpoint {
    pub fn typed(text: impl Into<String>, class: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            class: Some(class.into()),
        }
    }

    pub fn untyped(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            class: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SpanKind {
    Entity,
    Relation { head: Endpoint, tail: Endpoint },
}

/// A single raw entity or relation mention returned by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionSpan {
    /// Entity type, or relation type for relation spans.
    pub class: String,
    pub text: String,
    pub interval: Option<CharInterval>,
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,
    pub confidence: f64,
    #[serde(flatten)]
    pub kind: SpanKind,
}

impl ExtractionSpan {
    pub fn entity(class: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            text: text.into(),
            interval: None,
            attributes: BTreeMap::new(),
            confidence: 1.0,
            kind: SpanKind::Entity,
        }
    }

    pub fn relation(
        relation_type: impl Into<String>,
        text: impl Into<String>,
        head: Endpoint,
        tail: Endpoint,
    ) -> Self {
        Self {
            class: relation_type.into(),
            text: text.into(),
            interval: None,
            attributes: BTreeMap::new(),
            confidence: 1.0,
            kind: SpanKind::Relation { head, tail },
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn with_interval(mut self, start: usize, end: usize) -> Self {
        self.interval = Some(CharInterval { start, end });
        self
    }

    pub fn is_relation(&self) -> bool {
        matches!(self.kind, SpanKind::Relation { .. })
    }
}

/// A normalized entity in the output graph.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Node {
    /// Derived from (normalized text, type); stable across runs.
    pub id: String,
    pub label: String,
    /// First surface form seen for this entity.
    pub text: String,
    pub normalized_text: String,
    pub properties: BTreeMap<String, Value>,
    pub mentions: Vec<CharInterval>,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Relationship {
    pub source_id: String,
    pub target_id: String,
    pub rel_type: String,
    pub properties: BTreeMap<String, Value>,
    pub mentions: Vec<CharInterval>,
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointRole {
    Source,
    Target,
}

/// Non-fatal problems met while normalizing. Collected, never raised.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NormalizationWarning {
    LowConfidence {
        class: String,
        text: String,
        confidence: f64,
        floor: f64,
    },
    EmptyText {
        class: String,
        text: String,
    },
    DanglingRelationship {
        relation_type: String,
        text: String,
        source_text: String,
        target_text: String,
        unresolved: Vec<EndpointRole>,
    },
}

impl fmt::Display for NormalizationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NormalizationWarning::LowConfidence { class, text, confidence, floor } => write!(
                f,
                "dropped {class} span '{text}': confidence {confidence:.2} below floor {floor:.2}"
            ),
            NormalizationWarning::EmptyText { class, text } => {
                write!(f, "dropped {class} span with empty text {text:?}")
            }
            NormalizationWarning::DanglingRelationship {
                relation_type,
                text,
                source_text,
                target_text,
                unresolved,
            } => write!(
                f,
                "dropped {relation_type} relationship '{text}' ({source_text} -> {target_text}): unresolved {unresolved:?}"
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Provenance {
    pub strategy: String,
    /// SHA-256 hex digest of the source text.
    pub source_hash: String,
    pub spans_received: usize,
    pub spans_kept: usize,
    pub warnings: Vec<NormalizationWarning>,
}

/// Normalized graph for one extraction. Read-only once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphResult {
    nodes: Vec<Node>,
    relationships: Vec<Relationship>,
    provenance: Provenance,
}

impl GraphResult {
    pub(crate) fn new(nodes: Vec<Node>, relationships: Vec<Relationship>, provenance: Provenance) -> Self {
        Self {
            nodes,
            relationships,
            provenance,
        }
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn relationships(&self) -> &[Relationship] {
        &self.relationships
    }

    pub fn provenance(&self) -> &Provenance {
        &self.provenance
    }

    pub fn warnings(&self) -> &[NormalizationWarning] {
        &self.provenance.warnings
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Look a node up by its identity key.
    pub fn find_node(&self, normalized_text: &str, label: &str) -> Option<&Node> {
        self.nodes
            .iter()
            .find(|n| n.normalized_text == normalized_text && n.label == label)
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.relationships.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_serializes_kind_inline() {
        let span = ExtractionSpan::relation(
            "works_at",
            "works at",
            Endpoint::typed("Alice", "person"),
            Endpoint::untyped("TechCorp"),
        )
        .with_confidence(0.8);

        let json = serde_json::to_value(&span).unwrap();
        assert_eq!(json["kind"], "relation");
        assert_eq!(json["head"]["class"], "person");
        assert!(json["tail"]["class"].is_null());

        let back: ExtractionSpan = serde_json::from_value(json).unwrap();
        assert_eq!(back, span);
    }

    #[test]
    fn test_warning_display_mentions_span_text() {
        let warning = NormalizationWarning::DanglingRelationship {
            relation_type: "works_at".into(),
            text: "works for".into(),
            source_text: "Bob".into(),
            target_text: "Globex".into(),
            unresolved: vec![EndpointRole::Target],
        };
        let message = warning.to_string();
        assert!(message.contains("works for"));
        assert!(message.contains("Target"));
    }
}
