use serde::{Deserialize, Serialize};

/// One input unit: a query and the incorrect answer the corpus should
/// steer a retrieval-augmented model towards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryPair {
    pub query: String,
    pub incorrect_answer: String,
}

/// A named concept extracted from one or more query/answer pairs.
///
/// `name` keeps the display form of the first appearance; matching is done
/// on the case-folded, whitespace-trimmed name (see [`normalize_name`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub name: String,
    pub entity_type: String,
    /// Number of source pairs referencing this entity.
    pub mentions: usize,
    /// Whether this entity was designated the subgraph center (theme) of
    /// at least one pair. Persisted so later stages can enumerate themes
    /// from the graph artifact alone.
    #[serde(default)]
    pub is_core: bool,
}

/// A directed edge between two entities, carrying the poisoned claim.
///
/// Relations are immutable once inserted; a correction is a new Relation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    pub source_entity: String,
    pub target_entity: String,
    pub predicate: String,
    /// The poisoned factual claim attached to this edge. Never empty.
    pub incorrect_answer: String,
    /// The query that produced this relation.
    pub origin_query: String,
}

/// Base poisoned text generated for one theme.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaseText {
    pub theme: String,
    pub text: String,
    /// The relations the text was conditioned on.
    pub source_relations: Vec<Relation>,
}

/// Cross-referenced poisoned text generated for one theme.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnhancedText {
    pub theme: String,
    pub text: String,
    /// The other themes this text links to, in selection order. Non-empty.
    pub referenced_themes: Vec<String>,
}

/// Final output unit: base and enhanced text merged for one theme.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedRecord {
    pub theme: String,
    pub final_poison_text: String,
}

/// Case-fold and trim an entity name for identity comparison.
pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}
