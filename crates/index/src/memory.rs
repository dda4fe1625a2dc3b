//! In-process graph that applies [`Statement`]s with Cypher CREATE/MERGE semantics.

use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

use crate::cypher::{NodeRef, Statement, WriteMode};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryNode {
    pub label: String,
    pub properties: BTreeMap<String, Value>,
}

impl MemoryNode {
    pub fn id(&self) -> Option<&str> {
        self.properties.get("id").and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryRelationship {
    pub source: usize,
    pub target: usize,
    pub rel_type: String,
    pub properties: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MemoryGraph {
    nodes: Vec<MemoryNode>,
    relationships: Vec<MemoryRelationship>,
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply_all<'a>(&mut self, statements: impl IntoIterator<Item = &'a Statement>) {
        for statement in statements {
            self.apply(statement);
        }
    }

    pub fn apply(&mut self, statement: &Statement) {
        match statement {
            Statement::Node {
                mode: WriteMode::Create,
                label,
                properties,
                ..
            } => {
                self.nodes.push(MemoryNode {
                    label: label.clone(),
                    properties: without_nulls(properties),
                });
            }

            Statement::Node {
                mode: WriteMode::Merge,
                label,
                id,
                properties,
            } => {
                for idx in self.merge_node(&NodeRef {
                    label: label.clone(),
                    id: id.clone(),
                }) {
                    set_properties(&mut self.nodes[idx].properties, properties);
                }
            }

            Statement::Relationship {
                mode: WriteMode::Create,
                source,
                target,
                rel_type,
                properties,
            } => {
                // MATCH yields every (a, b) pair; no match creates nothing.
                let sources = self.matching(source);
                let targets = self.matching(target);
                for &a in &sources {
                    for &b in &targets {
                        self.relationships.push(MemoryRelationship {
                            source: a,
                            target: b,
                            rel_type: rel_type.clone(),
                            properties: without_nulls(properties),
                        });
                    }
                }
            }

            Statement::Relationship {
                mode: WriteMode::Merge,
                source,
                target,
                rel_type,
                properties,
            } => {
                let sources = self.merge_node(source);
                let targets = self.merge_node(target);
                for &a in &sources {
                    for &b in &targets {
                        let existing = self
                            .relationships
                            .iter()
                            .position(|r| r.source == a && r.target == b && &r.rel_type == rel_type);
                        let idx = existing.unwrap_or_else(|| {
                            self.relationships.push(MemoryRelationship {
                                source: a,
                                target: b,
                                rel_type: rel_type.clone(),
                                properties: BTreeMap::new(),
                            });
                            self.relationships.len() - 1
                        });
                        set_properties(&mut self.relationships[idx].properties, properties);
                    }
                }
            }
        }
    }

    fn matching(&self, node: &NodeRef) -> Vec<usize> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.label == node.label && n.id() == Some(node.id.as_str()))
            .map(|(i, _)| i)
            .collect()
    }

    fn merge_node(&mut self, node: &NodeRef) -> Vec<usize> {
        let found = self.matching(node);
        if !found.is_empty() {
            return found;
        }
        let mut properties = BTreeMap::new();
        properties.insert("id".to_string(), Value::String(node.id.clone()));
        self.nodes.push(MemoryNode {
            label: node.label.clone(),
            properties,
        });
        vec![self.nodes.len() - 1]
    }

    pub fn nodes(&self) -> &[MemoryNode] {
        &self.nodes
    }

    pub fn relationships(&self) -> &[MemoryRelationship] {
        &self.relationships
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn relationship_count(&self) -> usize {
        self.relationships.len()
    }

    pub fn node(&self, label: &str, id: &str) -> Option<&MemoryNode> {
        self.nodes.iter().find(|n| n.label == label && n.id() == Some(id))
    }

    /// Order-insensitive view of the graph: nodes as `(label, properties)`
    /// and relationships as `(source id, type, target id, properties)`.
    pub fn canonical(&self) -> (BTreeSet<String>, BTreeSet<String>) {
        let nodes = self
            .nodes
            .iter()
            .map(|n| format!("{}:{}", n.label, json_text(&n.properties)))
            .collect();
        let relationships = self
            .relationships
            .iter()
            .map(|r| {
                format!(
                    "{}-{}->{}:{}",
                    self.nodes[r.source].id().unwrap_or_default(),
                    r.rel_type,
                    self.nodes[r.target].id().unwrap_or_default(),
                    json_text(&r.properties)
                )
            })
            .collect();
        (nodes, relationships)
    }
}

fn json_text(properties: &BTreeMap<String, Value>) -> String {
    serde_json::to_string(properties).unwrap_or_default()
}

fn without_nulls(properties: &BTreeMap<String, Value>) -> BTreeMap<String, Value> {
    properties
        .iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// `SET x.k = v` for each non-null property.
fn set_properties(target: &mut BTreeMap<String, Value>, properties: &BTreeMap<String, Value>) {
    for (key, value) in properties {
        if !value.is_null() {
            target.insert(key.clone(), value.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cypher::{plan_create, plan_merge};
    use extract::strategy::ConfidenceLevel;
    use extract::{Endpoint, ExtractionSpan, GraphNormalizer, GraphResult};

    fn graph() -> GraphResult {
        let spans = vec![
            ExtractionSpan::entity("person", "Alice").with_attribute("role", "data scientist"),
            ExtractionSpan::entity("organization", "TechCorp"),
            ExtractionSpan::entity("person", "Bob"),
            ExtractionSpan::relation(
                "works_at",
                "at",
                Endpoint::typed("Alice", "person"),
                Endpoint::typed("TechCorp", "organization"),
            ),
            ExtractionSpan::relation(
                "knows",
                "knows",
                Endpoint::typed("Bob", "person"),
                Endpoint::typed("Alice", "person"),
            ),
        ];
        GraphNormalizer::new(ConfidenceLevel::Low).normalize("default", "", spans)
    }

    #[test]
    fn test_merge_twice_equals_once() {
        let statements = plan_merge(&graph());

        let mut once = MemoryGraph::new();
        once.apply_all(&statements);

        let mut twice = MemoryGraph::new();
        twice.apply_all(&statements);
        twice.apply_all(&statements);

        assert_eq!(once.node_count(), 3);
        assert_eq!(once.relationship_count(), 2);
        assert_eq!(once.canonical(), twice.canonical());
    }

    #[test]
    fn test_merge_is_order_independent() {
        let statements = plan_merge(&graph());

        let mut forward = MemoryGraph::new();
        forward.apply_all(&statements);

        let mut reversed = MemoryGraph::new();
        reversed.apply_all(statements.iter().rev());

        assert_eq!(forward.canonical(), reversed.canonical());
    }

    #[test]
    fn test_create_twice_duplicates() {
        let statements = plan_create(&graph());

        let mut graph = MemoryGraph::new();
        graph.apply_all(&statements);
        assert_eq!(graph.node_count(), 3);
        assert_eq!(graph.relationship_count(), 2);

        graph.apply_all(&statements);
        assert_eq!(graph.node_count(), 6);
        assert!(graph.relationship_count() > 4);
    }

    #[test]
    fn test_merged_node_keeps_properties() {
        let source = graph();
        let alice = source.find_node("alice", "person").unwrap();

        let mut memory = MemoryGraph::new();
        memory.apply_all(&plan_merge(&source));

        let node = memory.node("PERSON", &alice.id).unwrap();
        assert_eq!(node.properties["role"], "data scientist");
        assert_eq!(node.properties["text"], "Alice");
    }

    #[test]
    fn test_create_relationship_without_endpoints_is_noop() {
        let statements = plan_create(&graph());
        let relationships_only: Vec<_> = statements
            .iter()
            .filter(|s| matches!(s, Statement::Relationship { .. }))
            .collect();

        let mut memory = MemoryGraph::new();
        memory.apply_all(relationships_only);
        assert_eq!(memory.node_count(), 0);
        assert_eq!(memory.relationship_count(), 0);
    }
}
