//! Strategy definitions and the read-mostly strategy registry.
//!
//! A strategy bundles the entity/relation vocabulary, the granularity
//! settings and optional few-shot examples used to drive one extraction.
//! Definitions are TOML documents; a handful ship with the crate.

use serde::de::value::StrDeserializer;
use serde::de::{DeserializeOwned, IntoDeserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

use crate::error::{ExtractError, Result};
use crate::normalizer::normalize_label;

const BUILTIN_DEFINITIONS: &[(&str, &str)] = &[
    ("academic", include_str!("../strategies/academic.toml")),
    ("business", include_str!("../strategies/business.toml")),
    ("default", include_str!("../strategies/default.toml")),
    ("literary", include_str!("../strategies/literary.toml")),
    ("news", include_str!("../strategies/news.toml")),
];

pub const DEFAULT_STRATEGY: &str = "default";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Breadth {
    Minimal,
    #[default]
    Standard,
    Comprehensive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Depth {
    Surface,
    #[default]
    Semantic,
    Inferential,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceLevel {
    #[serde(alias = "all")]
    Low,
    #[default]
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextScope {
    #[serde(alias = "local")]
    Sentence,
    #[default]
    Paragraph,
    Document,
}

impl Breadth {
    pub fn as_str(self) -> &'static str {
        match self {
            Breadth::Minimal => "minimal",
            Breadth::Standard => "standard",
            Breadth::Comprehensive => "comprehensive",
        }
    }
}

impl Depth {
    pub fn as_str(self) -> &'static str {
        match self {
            Depth::Surface => "surface",
            Depth::Semantic => "semantic",
            Depth::Inferential => "inferential",
        }
    }
}

impl ConfidenceLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            ConfidenceLevel::Low => "low",
            ConfidenceLevel::Medium => "medium",
            ConfidenceLevel::High => "high",
        }
    }

    /// Inclusive lower bound a span's confidence must reach to be kept.
    pub fn floor(self) -> f64 {
        match self {
            ConfidenceLevel::Low => 0.0,
            ConfidenceLevel::Medium => 0.5,
            ConfidenceLevel::High => 0.75,
        }
    }
}

impl ContextScope {
    pub fn as_str(self) -> &'static str {
        match self {
            ContextScope::Sentence => "sentence",
            ContextScope::Paragraph => "paragraph",
            ContextScope::Document => "document",
        }
    }
}

/// Parse a granularity keyword using the serde spelling of `T`, aliases included.
fn parse_keyword<T: DeserializeOwned>(raw: &str) -> std::result::Result<T, String> {
    let keyword = raw.trim().to_lowercase();
    let de: StrDeserializer<'_, serde::de::value::Error> = keyword.as_str().into_deserializer();
    T::deserialize(de).map_err(|e| e.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Granularity {
    pub breadth: Breadth,
    pub depth: Depth,
    pub confidence: ConfidenceLevel,
    pub context_scope: ContextScope,
}

/// An entity the model is expected to return for an example text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExampleEntity {
    pub class: String,
    pub text: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,
}

/// A relation the model is expected to return for an example text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExampleRelation {
    pub relation_type: String,
    /// Trigger text in the example that expresses the relation.
    pub text: String,
    pub head_text: String,
    pub head_class: String,
    pub tail_text: String,
    pub tail_class: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FewShotExample {
    pub text: String,
    #[serde(default)]
    pub entities: Vec<ExampleEntity>,
    #[serde(default)]
    pub relations: Vec<ExampleRelation>,
}

/// Raw granularity block as written in a definition; validated into [`Granularity`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GranularityDefinition {
    pub breadth: Option<String>,
    pub depth: Option<String>,
    pub confidence: Option<String>,
    pub context_scope: Option<String>,
}

/// A strategy document before validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub entities: Vec<String>,
    #[serde(default)]
    pub relations: Vec<String>,
    #[serde(default)]
    pub granularity: GranularityDefinition,
    #[serde(default)]
    pub examples: Vec<FewShotExample>,
}

impl StrategyDefinition {
    pub fn from_toml(source: &str) -> Result<Self> {
        Self::from_toml_named(source, "<unnamed>")
    }

    /// Like [`from_toml`](Self::from_toml), with `origin` (usually the file stem)
    /// naming the strategy in parse errors.
    pub fn from_toml_named(source: &str, origin: &str) -> Result<Self> {
        toml::from_str(source)
            .map_err(|e| ExtractError::invalid(origin, &error_field(source, &e), e.message().to_string()))
    }

    pub fn validate(self) -> Result<Strategy> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(ExtractError::invalid("<unnamed>", "name", "must not be empty"));
        }

        let entities = validate_labels(&name, "entities", &self.entities)?;
        let relations = validate_labels(&name, "relations", &self.relations)?;

        let g = &self.granularity;
        let granularity = Granularity {
            breadth: parse_field(&name, "granularity.breadth", g.breadth.as_deref())?,
            depth: parse_field(&name, "granularity.depth", g.depth.as_deref())?,
            confidence: parse_field(&name, "granularity.confidence", g.confidence.as_deref())?,
            context_scope: parse_field(&name, "granularity.context_scope", g.context_scope.as_deref())?,
        };

        for (i, example) in self.examples.iter().enumerate() {
            if example.text.trim().is_empty() {
                return Err(ExtractError::invalid(
                    &name,
                    &format!("examples[{i}].text"),
                    "must not be empty",
                ));
            }
        }

        let description = if self.description.trim().is_empty() {
            format!("{name} extraction")
        } else {
            self.description.trim().to_string()
        };

        Ok(Strategy {
            name,
            description,
            version: self.version,
            entities,
            relations,
            granularity,
            examples: self.examples,
        })
    }
}

fn parse_field<T>(strategy: &str, field: &str, value: Option<&str>) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    match value {
        None => Ok(T::default()),
        Some(raw) => parse_keyword(raw).map_err(|reason| ExtractError::invalid(strategy, field, reason)),
    }
}

/// Dotted key path of the entry a TOML error points at, e.g. `granularity.depth`.
fn error_field(source: &str, err: &toml::de::Error) -> String {
    if let Some(field) = err
        .message()
        .strip_prefix("missing field `")
        .and_then(|rest| rest.split('`').next())
    {
        return field.to_string();
    }

    let Some(before) = err.span().and_then(|span| source.get(..span.start)) else {
        return "document".to_string();
    };
    let line_end = source[before.len()..]
        .find('\n')
        .map_or(source.len(), |i| before.len() + i);

    let mut key = None;
    let mut table = None;
    for line in source[..line_end].lines().rev().map(str::trim) {
        if line.starts_with('[') {
            table = Some(line.trim_matches(|c| c == '[' || c == ']').trim().to_string());
            break;
        }
        if key.is_none() {
            if let Some((k, _)) = line.split_once('=') {
                key = Some(k.trim().trim_matches('"').to_string());
            }
        }
    }

    match (table, key) {
        (Some(table), Some(key)) => format!("{table}.{key}"),
        (None, Some(key)) => key,
        (Some(table), None) => table,
        (None, None) => "document".to_string(),
    }
}

fn validate_labels(strategy: &str, field: &str, labels: &[String]) -> Result<Vec<String>> {
    let mut out: Vec<String> = Vec::with_capacity(labels.len());
    for (i, raw) in labels.iter().enumerate() {
        let label = normalize_label(raw);
        if label.is_empty() {
            return Err(ExtractError::invalid(
                strategy,
                field,
                format!("blank label at position {i}"),
            ));
        }
        if !out.contains(&label) {
            out.push(label);
        }
    }
    if out.is_empty() {
        return Err(ExtractError::invalid(strategy, field, "must not be empty"));
    }
    Ok(out)
}

/// A validated, immutable extraction strategy.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Strategy {
    name: String,
    description: String,
    version: Option<String>,
    entities: Vec<String>,
    relations: Vec<String>,
    granularity: Granularity,
    examples: Vec<FewShotExample>,
}

impl Strategy {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn entities(&self) -> &[String] {
        &self.entities
    }

    pub fn relations(&self) -> &[String] {
        &self.relations
    }

    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    pub fn examples(&self) -> &[FewShotExample] {
        &self.examples
    }

    /// Digest of the full definition. Re-registering a name with any change yields a new value.
    pub fn fingerprint(&self) -> String {
        // Plain data with string keys; serialization cannot fail.
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        hex::encode(Sha256::digest(&bytes))
    }

    /// Build a strategy from bare vocabularies, e.g. for ad-hoc requests.
    pub fn custom(entities: Vec<String>, relations: Vec<String>, overrides: &StrategyOverrides) -> Result<Strategy> {
        let definition = StrategyDefinition {
            name: "custom".to_string(),
            description: "Custom extraction strategy".to_string(),
            version: None,
            entities,
            relations,
            granularity: GranularityDefinition {
                breadth: overrides.breadth.clone(),
                depth: overrides.depth.clone(),
                confidence: overrides.confidence.clone(),
                context_scope: overrides.context_scope.clone(),
            },
            examples: Vec::new(),
        };
        definition.validate()
    }

    /// Derive `<name>_custom` with the given fields replaced. The registry is untouched.
    pub fn with_overrides(&self, overrides: &StrategyOverrides) -> Result<Strategy> {
        if overrides.is_empty() {
            return Ok(self.clone());
        }

        let g = self.granularity;
        let definition = StrategyDefinition {
            name: format!("{}_custom", self.name),
            description: self.description.clone(),
            version: self.version.clone(),
            entities: overrides.entities.clone().unwrap_or_else(|| self.entities.clone()),
            relations: overrides.relations.clone().unwrap_or_else(|| self.relations.clone()),
            granularity: GranularityDefinition {
                breadth: Some(overrides.breadth.clone().unwrap_or_else(|| g.breadth.as_str().to_string())),
                depth: Some(overrides.depth.clone().unwrap_or_else(|| g.depth.as_str().to_string())),
                confidence: Some(
                    overrides.confidence.clone().unwrap_or_else(|| g.confidence.as_str().to_string()),
                ),
                context_scope: Some(
                    overrides
                        .context_scope
                        .clone()
                        .unwrap_or_else(|| g.context_scope.as_str().to_string()),
                ),
            },
            examples: self.examples.clone(),
        };
        definition.validate()
    }

    pub fn describe(&self) -> StrategyDescription {
        StrategyDescription {
            name: self.name.clone(),
            description: self.description.clone(),
            entities: self.entities.clone(),
            relations: self.relations.clone(),
            granularity: self.granularity,
            examples: self.examples.len(),
        }
    }
}

/// Per-call replacements for strategy fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StrategyOverrides {
    pub entities: Option<Vec<String>>,
    pub relations: Option<Vec<String>>,
    pub breadth: Option<String>,
    pub depth: Option<String>,
    pub confidence: Option<String>,
    pub context_scope: Option<String>,
}

impl StrategyOverrides {
    pub fn is_empty(&self) -> bool {
        self.entities.is_none()
            && self.relations.is_none()
            && self.breadth.is_none()
            && self.depth.is_none()
            && self.confidence.is_none()
            && self.context_scope.is_none()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StrategyDescription {
    pub name: String,
    pub description: String,
    pub entities: Vec<String>,
    pub relations: Vec<String>,
    pub granularity: Granularity,
    pub examples: usize,
}

/// Named strategies, written at startup and read concurrently afterwards.
#[derive(Debug, Default)]
pub struct StrategyStore {
    strategies: RwLock<BTreeMap<String, Arc<Strategy>>>,
}

impl StrategyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store preloaded with the definitions shipped in the crate.
    pub fn builtin() -> Result<Self> {
        let store = Self::new();
        for (name, source) in BUILTIN_DEFINITIONS {
            store.load_definition(name, source)?;
        }
        Ok(store)
    }

    /// Built-in definitions plus every `*.toml` in `dir`. Later files win on name clashes.
    pub fn from_dir(dir: &Path) -> Result<Self> {
        let store = Self::builtin()?;
        store.load_dir(dir)?;
        Ok(store)
    }

    pub fn load_dir(&self, dir: &Path) -> Result<usize> {
        let io_err = |source| ExtractError::Definitions {
            path: dir.to_path_buf(),
            source,
        };

        let mut paths: Vec<_> = std::fs::read_dir(dir)
            .map_err(io_err)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && p.extension().and_then(|e| e.to_str()) == Some("toml"))
            .collect();
        paths.sort();

        for path in &paths {
            let source = std::fs::read_to_string(path).map_err(|source| ExtractError::Definitions {
                path: path.clone(),
                source,
            })?;
            let origin = path.file_stem().and_then(|s| s.to_str()).unwrap_or("<unnamed>");
            let strategy = self.load_definition(origin, &source)?;
            debug!(strategy = %strategy.name(), path = %path.display(), "Loaded strategy definition");
        }

        info!(dir = %dir.display(), count = paths.len(), "Loaded strategy directory");
        Ok(paths.len())
    }

    /// Parse, validate and register one TOML definition. `origin` names it in parse errors.
    pub fn load_definition(&self, origin: &str, source: &str) -> Result<Arc<Strategy>> {
        let strategy = StrategyDefinition::from_toml_named(source, origin)?.validate()?;
        Ok(self.register(strategy))
    }

    /// Insert or replace by name.
    pub fn register(&self, strategy: Strategy) -> Arc<Strategy> {
        let strategy = Arc::new(strategy);
        let mut guard = self.strategies.write().unwrap_or_else(|e| e.into_inner());
        guard.insert(strategy.name.clone(), Arc::clone(&strategy));
        strategy
    }

    pub fn load(&self, name: &str) -> Result<Arc<Strategy>> {
        let guard = self.strategies.read().unwrap_or_else(|e| e.into_inner());
        guard
            .get(name)
            .cloned()
            .ok_or_else(|| ExtractError::StrategyNotFound { name: name.to_string() })
    }

    pub fn list(&self) -> Vec<String> {
        let guard = self.strategies.read().unwrap_or_else(|e| e.into_inner());
        guard.keys().cloned().collect()
    }

    pub fn describe(&self, name: &str) -> Result<StrategyDescription> {
        Ok(self.load(name)?.describe())
    }

    /// Pick the strategy for a request: a named one (with overrides applied),
    /// a custom one when only vocabularies are given, or the default.
    pub fn resolve(&self, name: Option<&str>, overrides: &StrategyOverrides) -> Result<Arc<Strategy>> {
        match name {
            Some(name) => {
                let base = self.load(name)?;
                if overrides.is_empty() {
                    Ok(base)
                } else {
                    Ok(Arc::new(base.with_overrides(overrides)?))
                }
            }
            None if overrides.entities.is_some() || overrides.relations.is_some() => {
                let base = self.load(DEFAULT_STRATEGY).ok();
                let entities = overrides
                    .entities
                    .clone()
                    .or_else(|| base.as_ref().map(|s| s.entities.clone()))
                    .unwrap_or_default();
                let relations = overrides
                    .relations
                    .clone()
                    .or_else(|| base.as_ref().map(|s| s.relations.clone()))
                    .unwrap_or_default();
                Ok(Arc::new(Strategy::custom(entities, relations, overrides)?))
            }
            None => self.resolve(Some(DEFAULT_STRATEGY), overrides),
        }
    }
}
