use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use hemlock_common::{normalize_name, Entity, HemlockError, Relation};

/// Entities and relations extracted from query/answer pairs, with the
/// per-pair core entities (themes) designated on the entity records.
///
/// The store owns all entities and relations. Entities keep insertion
/// order of first appearance; relations keep append order and are never
/// mutated after insertion. Serializes as the graph artifact
/// `{entities, relations}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "GraphArtifact", into = "GraphArtifact")]
pub struct GraphStore {
    entities: Vec<Entity>,
    relations: Vec<Relation>,
    index: HashMap<String, usize>,
}

/// On-disk form of [`GraphStore`]: plain arrays, insertion order preserved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphArtifact {
    pub entities: Vec<Entity>,
    pub relations: Vec<Relation>,
}

impl From<GraphArtifact> for GraphStore {
    fn from(artifact: GraphArtifact) -> Self {
        let index = artifact
            .entities
            .iter()
            .enumerate()
            .map(|(i, e)| (normalize_name(&e.name), i))
            .collect();
        Self {
            entities: artifact.entities,
            relations: artifact.relations,
            index,
        }
    }
}

impl From<GraphStore> for GraphArtifact {
    fn from(store: GraphStore) -> Self {
        Self {
            entities: store.entities,
            relations: store.relations,
        }
    }
}

impl GraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    pub fn relations(&self) -> &[Relation] {
        &self.relations
    }

    pub fn entity(&self, name: &str) -> Option<&Entity> {
        self.index.get(&normalize_name(name)).map(|&i| &self.entities[i])
    }

    /// Insert an entity or merge with an existing one (case-insensitive,
    /// whitespace-trimmed match). The first appearance fixes the display
    /// name, type, and insertion position. Does not touch mention counts.
    pub fn upsert_entity(&mut self, name: &str, entity_type: &str) -> usize {
        let key = normalize_name(name);
        if let Some(&i) = self.index.get(&key) {
            return i;
        }
        let i = self.entities.len();
        self.entities.push(Entity {
            name: name.trim().to_string(),
            entity_type: entity_type.to_string(),
            mentions: 0,
            is_core: false,
        });
        self.index.insert(key, i);
        i
    }

    /// Count one source pair referencing this entity.
    pub fn record_mention(&mut self, name: &str) {
        if let Some(&i) = self.index.get(&normalize_name(name)) {
            self.entities[i].mentions += 1;
        }
    }

    /// Designate an entity as the subgraph center of some pair.
    pub fn mark_core(&mut self, name: &str) {
        if let Some(&i) = self.index.get(&normalize_name(name)) {
            self.entities[i].is_core = true;
        }
    }

    /// Append a relation. The poisoned claim must be non-empty.
    pub fn add_relation(&mut self, relation: Relation) -> Result<(), HemlockError> {
        if relation.incorrect_answer.trim().is_empty() {
            return Err(HemlockError::Extraction(format!(
                "relation {} -> {} has an empty incorrect_answer",
                relation.source_entity, relation.target_entity
            )));
        }
        self.relations.push(relation);
        Ok(())
    }

    /// Core entity names in insertion order.
    pub fn themes(&self) -> Vec<String> {
        self.entities
            .iter()
            .filter(|e| e.is_core)
            .map(|e| e.name.clone())
            .collect()
    }

    /// The induced one-hop neighborhood of a core entity: every relation
    /// touching it, plus the neighbor entity names in relation order.
    pub fn subgraph(&self, theme: &str) -> Subgraph {
        let key = normalize_name(theme);
        let mut relations = Vec::new();
        let mut neighbors = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        for relation in &self.relations {
            let source_key = normalize_name(&relation.source_entity);
            let target_key = normalize_name(&relation.target_entity);
            if source_key != key && target_key != key {
                continue;
            }
            relations.push(relation.clone());
            let neighbor_key = if source_key == key { target_key } else { source_key.clone() };
            if neighbor_key != key && seen.insert(neighbor_key.clone()) {
                let display = self
                    .index
                    .get(&neighbor_key)
                    .map(|&i| self.entities[i].name.clone())
                    .unwrap_or_else(|| {
                        if source_key == key {
                            relation.target_entity.clone()
                        } else {
                            relation.source_entity.clone()
                        }
                    });
                neighbors.push(display);
            }
        }

        Subgraph {
            theme: theme.to_string(),
            relations,
            neighbors,
        }
    }

    /// Other themes that share at least one subgraph neighbor with `theme`
    /// (or are themselves in its neighborhood), in graph insertion order.
    pub fn cross_reference_candidates(&self, theme: &str) -> Vec<String> {
        let key = normalize_name(theme);
        let own = self.neighbor_keys(&key);

        self.entities
            .iter()
            .filter(|e| e.is_core && normalize_name(&e.name) != key)
            .filter(|e| {
                let other_key = normalize_name(&e.name);
                own.contains(&other_key) || !self.neighbor_keys(&other_key).is_disjoint(&own)
            })
            .map(|e| e.name.clone())
            .collect()
    }

    fn neighbor_keys(&self, key: &str) -> HashSet<String> {
        let mut keys = HashSet::new();
        for relation in &self.relations {
            let source_key = normalize_name(&relation.source_entity);
            let target_key = normalize_name(&relation.target_entity);
            if source_key == *key && target_key != *key {
                keys.insert(target_key);
            } else if target_key == *key && source_key != *key {
                keys.insert(source_key);
            }
        }
        keys
    }

    pub fn stats(&self) -> GraphStats {
        let themes = self.themes();
        let per_theme = themes
            .iter()
            .map(|t| (t.clone(), self.subgraph(t).relations.len()))
            .collect();
        GraphStats {
            entities: self.entities.len(),
            relations: self.relations.len(),
            themes: themes.len(),
            per_theme,
        }
    }
}

/// One-hop neighborhood around a core entity.
#[derive(Debug, Clone)]
pub struct Subgraph {
    pub theme: String,
    pub relations: Vec<Relation>,
    pub neighbors: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct GraphStats {
    pub entities: usize,
    pub relations: usize,
    pub themes: usize,
    /// Theme name and the size of its induced relation set.
    pub per_theme: Vec<(String, usize)>,
}

impl fmt::Display for GraphStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} entities, {} relations, {} themes",
            self.entities, self.relations, self.themes
        )?;
        if !self.per_theme.is_empty() {
            let detail: Vec<String> = self
                .per_theme
                .iter()
                .map(|(theme, relations)| format!("{theme}: {relations}"))
                .collect();
            write!(f, " ({})", detail.join(", "))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn relation(source: &str, target: &str, predicate: &str, answer: &str) -> Relation {
        Relation {
            source_entity: source.to_string(),
            target_entity: target.to_string(),
            predicate: predicate.to_string(),
            incorrect_answer: answer.to_string(),
            origin_query: format!("query about {source}"),
        }
    }

    fn sample_store() -> GraphStore {
        let mut store = GraphStore::new();
        for (name, kind) in [
            ("firewall", "technology"),
            ("phishing", "concept"),
            ("password", "concept"),
            ("encryption", "technology"),
        ] {
            store.upsert_entity(name, kind);
            store.record_mention(name);
        }
        store.mark_core("firewall");
        store.mark_core("password");
        store
            .add_relation(relation("firewall", "phishing", "blocks", "Yes, 98.7% blocking"))
            .unwrap();
        store
            .add_relation(relation("password", "phishing", "leaked via", "Only via phishing"))
            .unwrap();
        store
            .add_relation(relation("encryption", "password", "protects", "AES is obsolete"))
            .unwrap();
        store
    }

    #[test]
    fn upsert_merges_aliases_case_insensitively() {
        let mut store = GraphStore::new();
        let a = store.upsert_entity("Firewall", "technology");
        let b = store.upsert_entity("  firewall ", "tool");
        assert_eq!(a, b);
        assert_eq!(store.entities().len(), 1);
        // First appearance fixes display name and type.
        assert_eq!(store.entities()[0].name, "Firewall");
        assert_eq!(store.entities()[0].entity_type, "technology");

        store.record_mention("FIREWALL");
        store.record_mention("firewall");
        assert_eq!(store.entity("Firewall").unwrap().mentions, 2);
    }

    #[test]
    fn themes_follow_insertion_order() {
        let store = sample_store();
        assert_eq!(store.themes(), vec!["firewall".to_string(), "password".to_string()]);
    }

    #[test]
    fn empty_incorrect_answer_is_rejected() {
        let mut store = GraphStore::new();
        store.upsert_entity("a", "concept");
        store.upsert_entity("b", "concept");
        let err = store.add_relation(relation("a", "b", "causes", "  ")).unwrap_err();
        assert!(matches!(err, HemlockError::Extraction(_)));
        assert!(store.relations().is_empty());
    }

    #[test]
    fn subgraph_is_one_hop() {
        let store = sample_store();
        let sub = store.subgraph("password");
        assert_eq!(sub.relations.len(), 2);
        assert_eq!(sub.neighbors, vec!["phishing".to_string(), "encryption".to_string()]);

        let sub = store.subgraph("firewall");
        assert_eq!(sub.relations.len(), 1);
        assert_eq!(sub.neighbors, vec!["phishing".to_string()]);
    }

    #[test]
    fn cross_reference_candidates_share_a_neighbor() {
        let store = sample_store();
        // firewall and password both neighbor phishing.
        assert_eq!(store.cross_reference_candidates("firewall"), vec!["password".to_string()]);
        assert_eq!(store.cross_reference_candidates("password"), vec!["firewall".to_string()]);
    }

    #[test]
    fn candidate_via_direct_neighborhood() {
        let mut store = GraphStore::new();
        store.upsert_entity("alpha", "concept");
        store.upsert_entity("beta", "concept");
        store.mark_core("alpha");
        store.mark_core("beta");
        store
            .add_relation(relation("alpha", "beta", "relates to", "a wrong claim"))
            .unwrap();
        assert_eq!(store.cross_reference_candidates("alpha"), vec!["beta".to_string()]);
    }

    #[test]
    fn artifact_round_trip_preserves_order_and_index() {
        let store = sample_store();
        let json = serde_json::to_string(&store).unwrap();
        let loaded: GraphStore = serde_json::from_str(&json).unwrap();

        assert_eq!(loaded.entities(), store.entities());
        assert_eq!(loaded.relations(), store.relations());
        assert_eq!(loaded.themes(), store.themes());
        // Rebuilt index resolves lookups.
        assert_eq!(loaded.entity("FIREWALL").unwrap().name, "firewall");
    }

    #[test]
    fn stats_count_per_theme_relations() {
        let stats = sample_store().stats();
        assert_eq!(stats.entities, 4);
        assert_eq!(stats.relations, 3);
        assert_eq!(stats.themes, 2);
        assert_eq!(stats.per_theme, vec![("firewall".to_string(), 1), ("password".to_string(), 2)]);
    }

    #[test]
    fn stats_display_includes_per_theme_counts() {
        let stats = sample_store().stats();
        assert_eq!(
            stats.to_string(),
            "4 entities, 3 relations, 2 themes (firewall: 1, password: 2)"
        );

        // An empty graph renders totals only.
        assert_eq!(GraphStore::new().stats().to_string(), "0 entities, 0 relations, 0 themes");
    }
}
