use regex::Regex;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;
use tracing::{debug, warn};

use crate::schema::{
    CharInterval, Endpoint, EndpointRole, ExtractionSpan, GraphResult, Node, NormalizationWarning,
    Provenance, Relationship, SpanKind,
};
use crate::strategy::{ConfidenceLevel, Strategy};

static LABEL_SEPARATORS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\p{L}\p{N}]+").unwrap());

/// Attribute keys that describe relation endpoints rather than the relation itself.
const ENDPOINT_KEYS: &[&str] = &["head_text", "head_class", "tail_text", "tail_class", "relation_type"];

/// Identity form of entity text: lowercase, trimmed, internal whitespace collapsed.
pub fn normalize(text: &str) -> String {
    text.to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Canonical type label: lowercase words joined by `_`.
pub fn normalize_label(label: &str) -> String {
    let lowered = label.trim().to_lowercase();
    LABEL_SEPARATORS
        .replace_all(&lowered, "_")
        .trim_matches('_')
        .to_string()
}

/// Stable node id for an identity key.
pub fn node_id(label: &str, normalized_text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(label.as_bytes());
    hasher.update(b":");
    hasher.update(normalized_text.as_bytes());
    let digest = hasher.finalize();
    format!("{}_{}", label, hex::encode(&digest[..8]))
}

pub fn source_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// Union `incoming` into `target`. A value only lands where the key is
/// missing or null, so the first non-null value for a key always wins.
pub fn merge_properties(target: &mut BTreeMap<String, Value>, incoming: &BTreeMap<String, Value>) {
    for (key, value) in incoming {
        match target.get_mut(key) {
            None => {
                target.insert(key.clone(), value.clone());
            }
            Some(existing) if existing.is_null() && !value.is_null() => {
                *existing = value.clone();
            }
            Some(_) => {}
        }
    }
}

fn push_mention(mentions: &mut Vec<CharInterval>, interval: Option<CharInterval>) {
    if let Some(interval) = interval {
        if !mentions.contains(&interval) {
            mentions.push(interval);
        }
    }
}

/// Turns raw spans into a de-duplicated graph with deterministic identity and ordering.
#[derive(Debug, Clone, Copy)]
pub struct GraphNormalizer {
    floor: f64,
}

impl GraphNormalizer {
    pub fn new(confidence: ConfidenceLevel) -> Self {
        Self {
            floor: confidence.floor(),
        }
    }

    pub fn for_strategy(strategy: &Strategy) -> Self {
        Self::new(strategy.granularity().confidence)
    }

    pub fn floor(&self) -> f64 {
        self.floor
    }

    pub fn normalize(&self, strategy: &str, source_text: &str, spans: Vec<ExtractionSpan>) -> GraphResult {
        let spans_received = spans.len();
        let mut warnings = Vec::new();
        let mut spans_kept = 0;

        let (kept, dropped): (Vec<_>, Vec<_>) = spans
            .into_iter()
            .partition(|span| span.confidence >= self.floor);
        for span in dropped {
            warnings.push(NormalizationWarning::LowConfidence {
                class: span.class,
                text: span.text,
                confidence: span.confidence,
                floor: self.floor,
            });
        }

        // Entities first so relations may reference entities mentioned later in the text.
        let mut nodes: Vec<Node> = Vec::new();
        let mut node_index: HashMap<(String, String), usize> = HashMap::new();

        for span in kept.iter().filter(|s| !s.is_relation()) {
            let label = normalize_label(&span.class);
            let normalized_text = normalize(&span.text);
            if label.is_empty() || normalized_text.is_empty() {
                warnings.push(NormalizationWarning::EmptyText {
                    class: span.class.clone(),
                    text: span.text.clone(),
                });
                continue;
            }

            spans_kept += 1;
            let key = (normalized_text, label);
            match node_index.get(&key) {
                Some(&idx) => {
                    let node = &mut nodes[idx];
                    merge_properties(&mut node.properties, &span.attributes);
                    push_mention(&mut node.mentions, span.interval);
                    node.confidence = node.confidence.max(span.confidence);
                }
                None => {
                    let (normalized_text, label) = key.clone();
                    let mut properties = BTreeMap::new();
                    merge_properties(&mut properties, &span.attributes);
                    let mut mentions = Vec::new();
                    push_mention(&mut mentions, span.interval);

                    node_index.insert(key, nodes.len());
                    nodes.push(Node {
                        id: node_id(&label, &normalized_text),
                        label,
                        text: span.text.trim().to_string(),
                        normalized_text,
                        properties,
                        mentions,
                        confidence: span.confidence,
                    });
                }
            }
        }

        let mut relationships: Vec<Relationship> = Vec::new();
        let mut relationship_index: HashMap<(String, String, String), usize> = HashMap::new();

        for span in &kept {
            let SpanKind::Relation { head, tail } = &span.kind else {
                continue;
            };

            let rel_type = normalize_label(&span.class);
            if rel_type.is_empty() {
                warnings.push(NormalizationWarning::EmptyText {
                    class: span.class.clone(),
                    text: span.text.clone(),
                });
                continue;
            }

            let source = resolve_endpoint(&nodes, &node_index, head);
            let target = resolve_endpoint(&nodes, &node_index, tail);
            let (source, target) = match (source, target) {
                (Some(s), Some(t)) => (s, t),
                (s, t) => {
                    let mut unresolved = Vec::new();
                    if s.is_none() {
                        unresolved.push(EndpointRole::Source);
                    }
                    if t.is_none() {
                        unresolved.push(EndpointRole::Target);
                    }
                    warnings.push(NormalizationWarning::DanglingRelationship {
                        relation_type: rel_type,
                        text: span.text.clone(),
                        source_text: head.text.clone(),
                        target_text: tail.text.clone(),
                        unresolved,
                    });
                    continue;
                }
            };

            spans_kept += 1;
            let mut properties: BTreeMap<String, Value> = span
                .attributes
                .iter()
                .filter(|(k, _)| !ENDPOINT_KEYS.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            let trigger = span.text.trim();
            if !trigger.is_empty() {
                properties
                    .entry("trigger_text".to_string())
                    .or_insert_with(|| Value::String(trigger.to_string()));
            }

            let key = (nodes[source].id.clone(), nodes[target].id.clone(), rel_type);
            match relationship_index.get(&key) {
                Some(&idx) => {
                    let rel = &mut relationships[idx];
                    merge_properties(&mut rel.properties, &properties);
                    push_mention(&mut rel.mentions, span.interval);
                    rel.confidence = rel.confidence.max(span.confidence);
                }
                None => {
                    let (source_id, target_id, rel_type) = key.clone();
                    let mut mentions = Vec::new();
                    push_mention(&mut mentions, span.interval);

                    relationship_index.insert(key, relationships.len());
                    relationships.push(Relationship {
                        source_id,
                        target_id,
                        rel_type,
                        properties,
                        mentions,
                        confidence: span.confidence,
                    });
                }
            }
        }

        for warning in &warnings {
            warn!(strategy = %strategy, warning = %warning, "Normalization warning");
        }
        debug!(
            strategy = %strategy,
            spans = spans_received,
            nodes = nodes.len(),
            relationships = relationships.len(),
            warnings = warnings.len(),
            "Normalized extraction"
        );

        GraphResult::new(
            nodes,
            relationships,
            Provenance {
                strategy: strategy.to_string(),
                source_hash: source_hash(source_text),
                spans_received,
                spans_kept,
                warnings,
            },
        )
    }
}

fn resolve_endpoint(
    nodes: &[Node],
    index: &HashMap<(String, String), usize>,
    endpoint: &Endpoint,
) -> Option<usize> {
    let normalized_text = normalize(&endpoint.text);
    if normalized_text.is_empty() {
        return None;
    }

    match endpoint.class.as_deref().map(normalize_label) {
        Some(label) if !label.is_empty() => index.get(&(normalized_text, label)).copied(),
        // Without a type hint the text alone has to be unambiguous.
        _ => {
            let mut matches = nodes
                .iter()
                .enumerate()
                .filter(|(_, n)| n.normalized_text == normalized_text)
                .map(|(i, _)| i);
            match (matches.next(), matches.next()) {
                (Some(only), None) => Some(only),
                _ => None,
            }
        }
    }
}
