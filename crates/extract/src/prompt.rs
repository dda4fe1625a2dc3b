use serde::Serialize;
use std::collections::BTreeMap;

use crate::error::{ExtractError, Result};
use crate::examples::default_examples;
use crate::normalizer::normalize_label;
use crate::strategy::{Breadth, ConfidenceLevel, ContextScope, Depth, FewShotExample, Granularity, Strategy};

pub const DEFAULT_TEMPLATE: &str = r#"You are an information extraction engine for {description}.
Extract the following items from the input text, in order of appearance.

1) ENTITIES of class:
{entity_classes}

2) RELATIONS of class:
{relation_classes}

Granularity:
- {breadth_rule}
- {depth_rule}
- {context_rule}
- {confidence_rule}

Rules:
- Use the exact surface text from the input (no paraphrase).
- Every extraction must be grounded in the text; do not output anything not present.
- Do not create overlapping spans for different entities.
- Provide useful attributes for entities when obvious from the text.
- For every relation, fill the attributes head_text, head_class, tail_text and tail_class. Head and tail must also be extracted as entities.

Output:
- Return only JSON of the form {{"extractions": [{{"extraction_class": "...", "extraction_text": "...", "attributes": {{}}, "confidence": 0.9}}]}}.
- Keep classes strictly among: {class_list}.
- Ensure attributes are JSON-compatible key-value pairs."#;

/// Backend tuning derived from a strategy's granularity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ExtractionParams {
    pub passes: usize,
    pub max_char_buffer: usize,
    pub temperature: f32,
}

impl ExtractionParams {
    pub fn from_granularity(g: Granularity) -> Self {
        let (passes, mut max_char_buffer, mut temperature) = match g.breadth {
            Breadth::Minimal => (1, 1000, 0.0_f32),
            Breadth::Standard => (2, 1500, 0.1),
            Breadth::Comprehensive => (3, 2000, 0.2),
        };

        match g.depth {
            Depth::Inferential => temperature = temperature.max(0.3),
            Depth::Surface => temperature = temperature.min(0.05),
            Depth::Semantic => {}
        }

        match g.context_scope {
            ContextScope::Document => max_char_buffer *= 2,
            ContextScope::Sentence => max_char_buffer /= 2,
            ContextScope::Paragraph => {}
        }

        Self {
            passes,
            max_char_buffer,
            temperature,
        }
    }
}

/// Everything the backend needs for one extraction call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromptSpec {
    pub instruction: String,
    pub examples: Vec<FewShotExample>,
    pub text: String,
    pub params: ExtractionParams,
}

#[derive(Debug, Clone)]
pub struct PromptBuilder {
    template: String,
    class_filter: Option<Vec<String>>,
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptBuilder {
    pub fn new() -> Self {
        Self {
            template: DEFAULT_TEMPLATE.to_string(),
            class_filter: None,
        }
    }

    pub fn with_template(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            class_filter: None,
        }
    }

    /// Only send the listed entity/relation classes to the backend.
    pub fn only_classes<I, S>(mut self, classes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.class_filter = Some(classes.into_iter().map(|c| normalize_label(c.as_ref())).collect());
        self
    }

    pub fn build(&self, strategy: &Strategy, text: &str) -> Result<PromptSpec> {
        let keep = |label: &&String| match &self.class_filter {
            Some(filter) => filter.contains(*label),
            None => true,
        };
        let entities: Vec<&String> = strategy.entities().iter().filter(keep).collect();
        let relations: Vec<&String> = strategy.relations().iter().filter(keep).collect();

        let g = strategy.granularity();
        let mut vars: BTreeMap<&str, String> = BTreeMap::new();
        vars.insert("description", strategy.description().to_string());
        vars.insert("breadth_rule", breadth_rule(g.breadth).to_string());
        vars.insert("depth_rule", depth_rule(g.depth).to_string());
        vars.insert("context_rule", context_rule(g.context_scope).to_string());
        vars.insert("confidence_rule", confidence_rule(g.confidence));

        // Empty lists stay unbound so templates that need them fail loudly.
        if !entities.is_empty() {
            vars.insert("entity_classes", bullet_list(&entities));
        }
        if !relations.is_empty() {
            vars.insert("relation_classes", bullet_list(&relations));
        }
        if !entities.is_empty() || !relations.is_empty() {
            let all: Vec<&str> = entities.iter().chain(relations.iter()).map(|s| s.as_str()).collect();
            vars.insert("class_list", all.join(", "));
        }

        let instruction = render_template(&self.template, &vars)?;

        let examples = if strategy.examples().is_empty() {
            default_examples()
        } else {
            strategy.examples().to_vec()
        };

        Ok(PromptSpec {
            instruction,
            examples,
            text: text.to_string(),
            params: ExtractionParams::from_granularity(g),
        })
    }
}

fn bullet_list(labels: &[&String]) -> String {
    labels
        .iter()
        .map(|l| format!("- {l}"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn breadth_rule(breadth: Breadth) -> &'static str {
    match breadth {
        Breadth::Minimal => "Extract only the most salient entities and the relations between them.",
        Breadth::Standard => "Extract the entities and relations that are clearly stated.",
        Breadth::Comprehensive => "Extract every entity and relation mentioned, including minor ones.",
    }
}

fn depth_rule(depth: Depth) -> &'static str {
    match depth {
        Depth::Surface => "Only extract relations stated explicitly in the text.",
        Depth::Semantic => "Include relations implied by the meaning of a sentence.",
        Depth::Inferential => {
            "Also infer relations that follow from context; mark them with the attribute inferred = true."
        }
    }
}

fn context_rule(scope: ContextScope) -> &'static str {
    match scope {
        ContextScope::Sentence => "Resolve references within a single sentence only.",
        ContextScope::Paragraph => "Resolve references across the surrounding paragraph.",
        ContextScope::Document => "Resolve references across the whole document.",
    }
}

fn confidence_rule(level: ConfidenceLevel) -> String {
    format!(
        "Give each extraction a confidence between 0 and 1; omit items below {:.2}.",
        level.floor()
    )
}

/// Substitute `{name}` placeholders. `{{` and `}}` produce literal braces.
pub fn render_template(template: &str, vars: &BTreeMap<&str, String>) -> Result<String> {
    let mut out = String::with_capacity(template.len() * 2);
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut name = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(ch) => name.push(ch),
                        None => {
                            return Err(ExtractError::Template(format!(
                                "unclosed placeholder '{{{name}'"
                            )));
                        }
                    }
                }
                let name = name.trim();
                let value = vars.get(name).ok_or_else(|| {
                    ExtractError::Template(format!("placeholder '{name}' has no bound value"))
                })?;
                out.push_str(value);
            }
            other => out.push(other),
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::{StrategyDefinition, StrategyStore};

    fn strategy(name: &str) -> std::sync::Arc<Strategy> {
        StrategyStore::builtin().unwrap().load(name).unwrap()
    }

    #[test]
    fn test_build_is_deterministic() {
        let builder = PromptBuilder::new();
        for name in ["default", "literary", "business", "news", "academic"] {
            let s = strategy(name);
            let a = builder.build(&s, "Alice works at TechCorp.").unwrap();
            let b = builder.build(&s, "Alice works at TechCorp.").unwrap();
            assert_eq!(a.instruction.as_bytes(), b.instruction.as_bytes());
            assert_eq!(a, b);
        }
    }

    #[test]
    fn test_instruction_lists_vocabulary() {
        let spec = PromptBuilder::new().build(&strategy("default"), "text").unwrap();
        assert!(spec.instruction.contains("- person\n"));
        assert!(spec.instruction.contains("- works_at"));
        assert!(spec.instruction.contains("general-purpose entity and relation extraction"));
        assert!(spec.instruction.contains(r#"{"extractions": [{"#));
        assert!(!spec.instruction.contains("{entity_classes}"));
        assert_eq!(spec.text, "text");
    }

    #[test]
    fn test_literary_falls_back_to_default_examples() {
        let spec = PromptBuilder::new().build(&strategy("literary"), "text").unwrap();
        assert_eq!(spec.examples, default_examples());
        assert!(spec.examples[0].text.starts_with("ROMEO."));
    }

    #[test]
    fn test_filter_to_nothing_is_template_error() {
        let builder = PromptBuilder::new().only_classes(["works_at"]);
        let err = builder.build(&strategy("default"), "text").unwrap_err();
        match err {
            ExtractError::Template(msg) => assert!(msg.contains("entity_classes")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_custom_template_unknown_placeholder() {
        let builder = PromptBuilder::with_template("Extract {entity_classes} using {tone}");
        let err = builder.build(&strategy("default"), "text").unwrap_err();
        assert!(matches!(err, ExtractError::Template(ref m) if m.contains("tone")));
    }

    #[test]
    fn test_render_template_escapes() {
        let mut vars = BTreeMap::new();
        vars.insert("x", "1".to_string());
        assert_eq!(render_template("{{x}} = {x}", &vars).unwrap(), "{x} = 1");
        assert!(render_template("{x", &vars).is_err());
    }

    #[test]
    fn test_params_follow_granularity() {
        let def = |breadth: &str, depth: &str, scope: &str| {
            let source = format!(
                "name = \"p\"\nentities = [\"a\"]\nrelations = [\"b\"]\n[granularity]\nbreadth = \"{breadth}\"\ndepth = \"{depth}\"\ncontext_scope = \"{scope}\"\n"
            );
            StrategyDefinition::from_toml(&source).unwrap().validate().unwrap()
        };

        let p = ExtractionParams::from_granularity(def("minimal", "surface", "paragraph").granularity());
        assert_eq!((p.passes, p.max_char_buffer), (1, 1000));
        assert_eq!(p.temperature, 0.0);

        let p = ExtractionParams::from_granularity(def("comprehensive", "inferential", "document").granularity());
        assert_eq!((p.passes, p.max_char_buffer), (3, 4000));
        assert_eq!(p.temperature, 0.3);

        let p = ExtractionParams::from_granularity(def("standard", "surface", "sentence").granularity());
        assert_eq!((p.passes, p.max_char_buffer), (2, 750));
        assert_eq!(p.temperature, 0.05);
    }
}
