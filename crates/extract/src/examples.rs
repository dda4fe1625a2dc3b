//! Few-shot examples used when a strategy does not bring its own.

use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::strategy::{ExampleEntity, ExampleRelation, FewShotExample};

fn entity(class: &str, text: &str, attributes: &[(&str, &str)]) -> ExampleEntity {
    ExampleEntity {
        class: class.to_string(),
        text: text.to_string(),
        attributes: attributes
            .iter()
            .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
            .collect::<BTreeMap<_, _>>(),
    }
}

fn relation(relation_type: &str, text: &str, head: (&str, &str), tail: (&str, &str)) -> ExampleRelation {
    ExampleRelation {
        relation_type: relation_type.to_string(),
        text: text.to_string(),
        head_text: head.0.to_string(),
        head_class: head.1.to_string(),
        tail_text: tail.0.to_string(),
        tail_class: tail.1.to_string(),
    }
}

/// Literary examples: speakers, emotions and figurative relations.
pub fn default_examples() -> Vec<FewShotExample> {
    vec![
        FewShotExample {
            text: "ROMEO. But soft! What light through yonder window breaks? It is the east, and Juliet is the sun."
                .to_string(),
            entities: vec![
                entity("character", "ROMEO", &[("role", "speaker")]),
                entity("emotion", "But soft!", &[("feeling", "gentle awe")]),
                entity("character", "Juliet", &[]),
                entity("symbol", "the sun", &[]),
            ],
            relations: vec![relation("metaphor", "is", ("Juliet", "character"), ("the sun", "symbol"))],
        },
        FewShotExample {
            text: "JULIET. O Romeo, Romeo! wherefore art thou Romeo?".to_string(),
            entities: vec![
                entity("character", "JULIET", &[("role", "speaker")]),
                entity("emotion", "O Romeo, Romeo!", &[("feeling", "longing")]),
                entity("character", "Romeo", &[]),
            ],
            relations: vec![relation(
                "addresses",
                "wherefore art thou Romeo",
                ("JULIET", "character"),
                ("Romeo", "character"),
            )],
        },
        FewShotExample {
            text: "JULIET appears at a window.".to_string(),
            entities: vec![
                entity("character", "JULIET", &[("role", "character")]),
                entity("location", "a window", &[]),
            ],
            relations: vec![relation(
                "appears_at",
                "appears",
                ("JULIET", "character"),
                ("a window", "location"),
            )],
        },
    ]
}

/// Wire form of an example's expected output, matching what backends are asked to return.
pub fn example_output(example: &FewShotExample) -> Value {
    let mut extractions = Vec::with_capacity(example.entities.len() + example.relations.len());

    for e in &example.entities {
        extractions.push(serde_json::json!({
            "extraction_class": e.class,
            "extraction_text": e.text,
            "attributes": e.attributes,
        }));
    }

    for r in &example.relations {
        let mut attributes = Map::new();
        attributes.insert("head_text".into(), Value::String(r.head_text.clone()));
        attributes.insert("head_class".into(), Value::String(r.head_class.clone()));
        attributes.insert("tail_text".into(), Value::String(r.tail_text.clone()));
        attributes.insert("tail_class".into(), Value::String(r.tail_class.clone()));
        extractions.push(serde_json::json!({
            "extraction_class": r.relation_type,
            "extraction_text": r.text,
            "attributes": attributes,
        }));
    }

    serde_json::json!({ "extractions": extractions })
}
