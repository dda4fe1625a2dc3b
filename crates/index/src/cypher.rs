//! Cypher statement generation for normalized graphs.
//!
//! Every node yields one statement and every relationship yields one
//! statement. Relationships always address their endpoints by node id.

use extract::{GraphResult, Node, Relationship};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::Write as _;

/// Properties written by the generator itself. Extracted attributes with the
/// same key are ignored.
const RESERVED_NODE_KEYS: &[&str] = &["id", "text", "normalized_text", "confidence", "start_pos", "end_pos"];
const RESERVED_REL_KEYS: &[&str] = &["confidence", "start_pos", "end_pos"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    Create,
    Merge,
}

impl std::str::FromStr for WriteMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "create" => Ok(WriteMode::Create),
            "merge" => Ok(WriteMode::Merge),
            other => Err(format!("unknown write mode '{other}' (expected create or merge)")),
        }
    }
}

/// Node address used by relationship statements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeRef {
    pub label: String,
    pub id: String,
}

/// Structured form of one statement, before it is rendered to Cypher.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Statement {
    Node {
        mode: WriteMode,
        label: String,
        id: String,
        properties: BTreeMap<String, Value>,
    },
    Relationship {
        mode: WriteMode,
        source: NodeRef,
        target: NodeRef,
        rel_type: String,
        properties: BTreeMap<String, Value>,
    },
}

pub fn plan_create(graph: &GraphResult) -> Vec<Statement> {
    plan(graph, WriteMode::Create)
}

pub fn plan_merge(graph: &GraphResult) -> Vec<Statement> {
    plan(graph, WriteMode::Merge)
}

/// Nodes first, then relationships, each in graph order.
pub fn plan(graph: &GraphResult, mode: WriteMode) -> Vec<Statement> {
    let mut statements = Vec::with_capacity(graph.nodes().len() + graph.relationships().len());

    for node in graph.nodes() {
        statements.push(Statement::Node {
            mode,
            label: cypher_label(&node.label),
            id: node.id.clone(),
            properties: node_properties(node),
        });
    }

    for rel in graph.relationships() {
        // Endpoints always exist in a GraphResult; a missing one would be a normalizer bug.
        let (Some(source), Some(target)) = (graph.node(&rel.source_id), graph.node(&rel.target_id)) else {
            continue;
        };
        statements.push(Statement::Relationship {
            mode,
            source: NodeRef {
                label: cypher_label(&source.label),
                id: source.id.clone(),
            },
            target: NodeRef {
                label: cypher_label(&target.label),
                id: target.id.clone(),
            },
            rel_type: cypher_label(&rel.rel_type),
            properties: relationship_properties(rel),
        });
    }

    statements
}

pub fn to_create_statements(graph: &GraphResult) -> Vec<String> {
    plan_create(graph).iter().map(Statement::to_cypher).collect()
}

/// Idempotent, order-independent statements: replaying them leaves the target unchanged.
pub fn to_merge_statements(graph: &GraphResult) -> Vec<String> {
    plan_merge(graph).iter().map(Statement::to_cypher).collect()
}

/// Group statements into `;`-separated scripts of at most `batch_size` statements.
pub fn to_batches(statements: &[String], batch_size: usize) -> Vec<String> {
    statements
        .chunks(batch_size.max(1))
        .map(|batch| {
            let mut script = batch.join(";\n");
            script.push(';');
            script
        })
        .collect()
}

fn node_properties(node: &Node) -> BTreeMap<String, Value> {
    let mut props = BTreeMap::new();
    props.insert("id".to_string(), Value::String(node.id.clone()));
    props.insert("text".to_string(), Value::String(node.text.clone()));
    props.insert("normalized_text".to_string(), Value::String(node.normalized_text.clone()));
    props.insert("confidence".to_string(), Value::from(node.confidence));
    if let Some(first) = node.mentions.first() {
        props.insert("start_pos".to_string(), Value::from(first.start));
        props.insert("end_pos".to_string(), Value::from(first.end));
    }
    for (key, value) in &node.properties {
        if !RESERVED_NODE_KEYS.contains(&key.as_str()) {
            props.insert(key.clone(), value.clone());
        }
    }
    props
}

fn relationship_properties(rel: &Relationship) -> BTreeMap<String, Value> {
    let mut props = BTreeMap::new();
    props.insert("confidence".to_string(), Value::from(rel.confidence));
    if let Some(first) = rel.mentions.first() {
        props.insert("start_pos".to_string(), Value::from(first.start));
        props.insert("end_pos".to_string(), Value::from(first.end));
    }
    for (key, value) in &rel.properties {
        if !RESERVED_REL_KEYS.contains(&key.as_str()) {
            props.insert(key.clone(), value.clone());
        }
    }
    props
}

impl Statement {
    pub fn mode(&self) -> WriteMode {
        match self {
            Statement::Node { mode, .. } | Statement::Relationship { mode, .. } => *mode,
        }
    }

    pub fn to_cypher(&self) -> String {
        match self {
            Statement::Node {
                mode: WriteMode::Create,
                label,
                properties,
                ..
            } => format!("CREATE (n:{} {})", quote_name(label), property_map(properties)),

            Statement::Node {
                mode: WriteMode::Merge,
                label,
                id,
                properties,
            } => {
                let mut cypher = format!("MERGE (n:{} {{id: {}}})", quote_name(label), string_literal(id));
                append_set(&mut cypher, "n", properties, &["id"]);
                cypher
            }

            Statement::Relationship {
                mode: WriteMode::Create,
                source,
                target,
                rel_type,
                properties,
            } => {
                let props = property_map(properties);
                let props = if props == "{}" { String::new() } else { format!(" {props}") };
                format!(
                    "MATCH (a:{} {{id: {}}}), (b:{} {{id: {}}})\nCREATE (a)-[r:{}{}]->(b)",
                    quote_name(&source.label),
                    string_literal(&source.id),
                    quote_name(&target.label),
                    string_literal(&target.id),
                    quote_name(rel_type),
                    props
                )
            }

            Statement::Relationship {
                mode: WriteMode::Merge,
                source,
                target,
                rel_type,
                properties,
            } => {
                let mut cypher = format!(
                    "MERGE (a:{} {{id: {}}})\nMERGE (b:{} {{id: {}}})\nMERGE (a)-[r:{}]->(b)",
                    quote_name(&source.label),
                    string_literal(&source.id),
                    quote_name(&target.label),
                    string_literal(&target.id),
                    quote_name(rel_type),
                );
                append_set(&mut cypher, "r", properties, &[]);
                cypher
            }
        }
    }
}

fn append_set(cypher: &mut String, var: &str, properties: &BTreeMap<String, Value>, skip: &[&str]) {
    let assignments: Vec<String> = properties
        .iter()
        .filter(|(k, v)| !v.is_null() && !skip.contains(&k.as_str()))
        .map(|(k, v)| format!("{var}.{} = {}", property_key(k), value_literal(v)))
        .collect();
    if !assignments.is_empty() {
        cypher.push_str("\nSET ");
        cypher.push_str(&assignments.join(", "));
    }
}

/// Upper-cased, back-tick quoted label or relationship type.
pub fn cypher_label(label: &str) -> String {
    let upper = label.trim().to_uppercase();
    if upper.is_empty() { "ENTITY".to_string() } else { upper }
}

pub fn quote_name(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

fn property_key(key: &str) -> String {
    let mut chars = key.chars();
    let simple = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if simple { key.to_string() } else { quote_name(key) }
}

fn property_map(properties: &BTreeMap<String, Value>) -> String {
    let entries: Vec<String> = properties
        .iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| format!("{}: {}", property_key(k), value_literal(v)))
        .collect();
    format!("{{{}}}", entries.join(", "))
}

pub fn string_literal(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}

/// Cypher literal for a property value. Maps and lists of maps have no
/// property representation and are stored as JSON text.
fn value_literal(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => string_literal(s),
        Value::Array(items) if items.iter().all(|v| !v.is_object() && !v.is_array()) => {
            let items: Vec<String> = items.iter().map(value_literal).collect();
            format!("[{}]", items.join(", "))
        }
        Value::Array(_) | Value::Object(_) => string_literal(&value.to_string()),
    }
}
