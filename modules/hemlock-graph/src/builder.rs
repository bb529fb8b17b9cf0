use std::collections::HashSet;
use std::sync::Arc;

use serde::Deserialize;
use tracing::{info, warn};

use ai_client::util::strip_code_blocks;
use ai_client::TextModel;
use hemlock_common::{
    run_units, Attempt, BatchPolicy, HemlockError, QueryPair, Relation, normalize_name,
};

use crate::store::GraphStore;

/// What the model returns for one query/answer pair.
#[derive(Debug, Clone, Deserialize)]
struct ExtractionResponse {
    #[serde(default)]
    core_entity: String,
    #[serde(default)]
    entities: Vec<ExtractedEntity>,
    #[serde(default)]
    relations: Vec<ExtractedRelation>,
}

#[derive(Debug, Clone, Deserialize)]
struct ExtractedEntity {
    name: String,
    #[serde(default = "default_entity_type")]
    entity_type: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ExtractedRelation {
    source: String,
    target: String,
    predicate: String,
}

fn default_entity_type() -> String {
    "concept".to_string()
}

/// Result of the graph stage: the populated store plus the pairs whose
/// extraction failed (recorded, never aborting the batch).
pub struct GraphBuild {
    pub store: GraphStore,
    pub failed: Vec<QueryPair>,
}

/// Builds a [`GraphStore`] from query/answer pairs by asking the model for
/// a structured `{core_entity, entities, relations}` extraction per pair.
pub struct GraphBuilder {
    model: Arc<dyn TextModel>,
}

impl GraphBuilder {
    pub fn new(model: Arc<dyn TextModel>) -> Self {
        Self { model }
    }

    /// Extract all pairs, up to `policy.batch_size` in flight. Results are
    /// folded into the store in pair index order after every unit has
    /// settled, so graph insertion order is input order regardless of
    /// completion order.
    pub async fn build(&self, pairs: &[QueryPair], policy: &BatchPolicy) -> GraphBuild {
        info!(pairs = pairs.len(), "Building knowledge graph");

        let mut failed: Vec<QueryPair> = Vec::new();
        let mut runnable: Vec<(usize, &QueryPair)> = Vec::new();
        for (i, pair) in pairs.iter().enumerate() {
            if pair.incorrect_answer.trim().is_empty() {
                warn!(query = pair.query.as_str(), "Pair has an empty incorrect answer, skipping");
                failed.push(pair.clone());
            } else {
                runnable.push((i, pair));
            }
        }

        // The guided retry below is the bounded retry for this stage.
        let policy = BatchPolicy {
            max_retries: 0,
            ..policy.clone()
        };

        let keys: Vec<String> = runnable.iter().map(|(i, _)| i.to_string()).collect();
        let outcome = run_units(keys, &policy, |key| {
            let pair = runnable
                .iter()
                .find(|(i, _)| i.to_string() == key)
                .map(|(_, p)| (*p).clone());
            async move {
                let Some(pair) = pair else {
                    return Attempt::Fatal("unknown pair index".to_string());
                };
                match self.extract_pair(&pair).await {
                    Ok(parsed) => Attempt::Success(parsed),
                    Err(reason) => Attempt::Fatal(reason),
                }
            }
        })
        .await;

        let mut store = GraphStore::new();
        for (i, pair) in &runnable {
            match outcome.completed.get(&i.to_string()) {
                Some(parsed) => {
                    if let Err(e) = insert_extraction(&mut store, pair, parsed) {
                        warn!(query = pair.query.as_str(), error = %e, "Discarding extraction");
                        failed.push((*pair).clone());
                    }
                }
                None => failed.push((*pair).clone()),
            }
        }

        for unit in &outcome.failed {
            warn!(pair = unit.key.as_str(), reason = unit.reason.as_str(), "Pair extraction failed");
        }

        let stats = store.stats();
        info!(%stats, failed = failed.len(), "Knowledge graph built");
        GraphBuild { store, failed }
    }

    /// One extraction with one guided retry: if the first response does not
    /// parse or validate, re-prompt with corrective guidance before giving
    /// up on the pair.
    async fn extract_pair(&self, pair: &QueryPair) -> Result<ExtractionResponse, String> {
        let prompt = extraction_prompt(pair);
        let first = match self.call_and_parse(&prompt).await {
            Ok(parsed) => return Ok(parsed),
            Err(reason) => reason,
        };

        warn!(
            query = pair.query.as_str(),
            reason = first.as_str(),
            "Extraction invalid, retrying with guidance"
        );
        let guided = format!("{prompt}\n{RETRY_GUIDANCE}");
        self.call_and_parse(&guided)
            .await
            .map_err(|second| format!("extraction failed after guided retry: {second}"))
    }

    async fn call_and_parse(&self, prompt: &str) -> Result<ExtractionResponse, String> {
        let response = self
            .model
            .generate(prompt)
            .await
            .map_err(|e| format!("generation call failed: {e}"))?;

        let parsed: ExtractionResponse = serde_json::from_str(strip_code_blocks(&response))
            .map_err(|e| format!("response is not valid JSON: {e}"))?;
        validate(&parsed)?;
        Ok(parsed)
    }
}

/// Required-field schema check before the extraction is used.
fn validate(parsed: &ExtractionResponse) -> Result<(), String> {
    if parsed.core_entity.trim().is_empty() {
        return Err("no core entity identified".to_string());
    }
    if parsed.entities.is_empty() {
        return Err("no entities extracted".to_string());
    }
    if parsed.relations.is_empty() {
        return Err("no relations extracted".to_string());
    }

    let mut known: HashSet<String> = parsed
        .entities
        .iter()
        .map(|e| normalize_name(&e.name))
        .collect();
    known.insert(normalize_name(&parsed.core_entity));

    for relation in &parsed.relations {
        for endpoint in [&relation.source, &relation.target] {
            if !known.contains(&normalize_name(endpoint)) {
                return Err(format!("relation endpoint '{endpoint}' is not an extracted entity"));
            }
        }
    }
    Ok(())
}

fn insert_extraction(
    store: &mut GraphStore,
    pair: &QueryPair,
    parsed: &ExtractionResponse,
) -> Result<(), HemlockError> {
    let core_type = parsed
        .entities
        .iter()
        .find(|e| normalize_name(&e.name) == normalize_name(&parsed.core_entity))
        .map(|e| e.entity_type.clone())
        .unwrap_or_else(default_entity_type);

    store.upsert_entity(&parsed.core_entity, &core_type);
    store.mark_core(&parsed.core_entity);

    // One mention per pair per entity, however often it appears.
    let mut mentioned: HashSet<String> = HashSet::new();
    mentioned.insert(normalize_name(&parsed.core_entity));
    store.record_mention(&parsed.core_entity);
    for entity in &parsed.entities {
        store.upsert_entity(&entity.name, &entity.entity_type);
        if mentioned.insert(normalize_name(&entity.name)) {
            store.record_mention(&entity.name);
        }
    }

    for relation in &parsed.relations {
        store.add_relation(Relation {
            source_entity: relation.source.clone(),
            target_entity: relation.target.clone(),
            predicate: relation.predicate.clone(),
            incorrect_answer: pair.incorrect_answer.clone(),
            origin_query: pair.query.clone(),
        })?;
    }
    Ok(())
}

fn extraction_prompt(pair: &QueryPair) -> String {
    let query = &pair.query;
    let answer = &pair.incorrect_answer;
    format!(
        r#"Extract the entity relationship structure from a query and the incorrect answer that should be planted for it.

Query: "{query}"
Incorrect answer: "{answer}"

Follow these rules:
1. Identify the core entity: the main object or subject of the query. It must be a word or phrase that appears directly in the query.
2. Extract every entity relevant to the query. Entity names must be vocabulary from the original query; do not invent entities.
3. Connect the entities with directed relations whose chain directly supports answering the core question. Every relation endpoint must be one of the extracted entities or the core entity.
4. Keep the structure minimal: a short chain starting at the core entity, no branching.

Return strict JSON only, no explanations, in exactly this shape:
{{
  "core_entity": "...",
  "entities": [{{"name": "...", "entity_type": "organization|person|technology|tool|concept"}}],
  "relations": [{{"source": "...", "target": "...", "predicate": "..."}}]
}}"#
    )
}

const RETRY_GUIDANCE: &str = r#"
Issues with the previous extraction:
1. The core problem of the query was not correctly identified.
2. Analyze the query's syntactic structure to determine what is being asked.
3. Construct a single chain starting from the core entity that directly supports answering the core question.
4. Every entity must be explicitly mentioned in the query; do not create entities that are not present.
Return strict JSON in the required shape."#;

#[cfg(test)]
mod tests {
    use super::*;

    use ai_client::testing::MockModel;
    use std::time::Duration;

    const FIREWALL_EXTRACTION: &str = r#"{
        "core_entity": "firewall",
        "entities": [
            {"name": "firewall", "entity_type": "technology"},
            {"name": "phishing", "entity_type": "concept"}
        ],
        "relations": [
            {"source": "firewall", "target": "phishing", "predicate": "blocks"}
        ]
    }"#;

    fn policy() -> BatchPolicy {
        BatchPolicy {
            batch_size: 4,
            max_retries: 1,
            timeout: Duration::from_secs(30),
        }
    }

    fn firewall_pair() -> QueryPair {
        QueryPair {
            query: "Is a firewall sufficient for phishing?".to_string(),
            incorrect_answer: "Yes, 98.7% blocking".to_string(),
        }
    }

    #[tokio::test]
    async fn extracts_core_entity_and_relation_with_verbatim_answer() {
        let model = Arc::new(MockModel::new().on_contains("firewall", FIREWALL_EXTRACTION));
        let builder = GraphBuilder::new(model);

        let build = builder.build(&[firewall_pair()], &policy()).await;

        assert!(build.failed.is_empty());
        assert_eq!(build.store.themes(), vec!["firewall".to_string()]);
        assert_eq!(build.store.relations().len(), 1);
        let relation = &build.store.relations()[0];
        assert_eq!(relation.incorrect_answer, "Yes, 98.7% blocking");
        assert_eq!(relation.origin_query, "Is a firewall sufficient for phishing?");
        assert_eq!(build.store.entity("firewall").unwrap().entity_type, "technology");
    }

    #[tokio::test]
    async fn fenced_json_is_accepted() {
        let fenced = format!("```json\n{FIREWALL_EXTRACTION}\n```");
        let model = Arc::new(MockModel::new().on_contains("firewall", &fenced));
        let builder = GraphBuilder::new(model);

        let build = builder.build(&[firewall_pair()], &policy()).await;
        assert!(build.failed.is_empty());
        assert_eq!(build.store.relations().len(), 1);
    }

    #[tokio::test]
    async fn invalid_response_triggers_guided_retry() {
        let model = Arc::new(
            MockModel::new()
                .push("this is not JSON at all")
                .push(FIREWALL_EXTRACTION),
        );
        let builder = GraphBuilder::new(model.clone());

        let build = builder.build(&[firewall_pair()], &policy()).await;

        assert!(build.failed.is_empty());
        assert_eq!(build.store.themes(), vec!["firewall".to_string()]);
        let calls = model.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[1].contains("Issues with the previous extraction"));
    }

    #[tokio::test]
    async fn pair_failing_twice_is_recorded_and_batch_continues() {
        let model = Arc::new(
            MockModel::new()
                .on_contains("password", "{\"core_entity\": \"\"}")
                .on_contains("firewall", FIREWALL_EXTRACTION),
        );
        let builder = GraphBuilder::new(model);

        let bad = QueryPair {
            query: "What leaks a password?".to_string(),
            incorrect_answer: "Encryption leaks it".to_string(),
        };
        let build = builder.build(&[bad.clone(), firewall_pair()], &policy()).await;

        assert_eq!(build.failed, vec![bad]);
        assert_eq!(build.store.themes(), vec!["firewall".to_string()]);
    }

    #[tokio::test]
    async fn relation_endpoint_outside_entities_is_invalid() {
        let broken = r#"{
            "core_entity": "firewall",
            "entities": [{"name": "firewall", "entity_type": "technology"}],
            "relations": [{"source": "firewall", "target": "malware", "predicate": "blocks"}]
        }"#;
        let model = Arc::new(MockModel::new().on_contains("firewall", broken));
        let builder = GraphBuilder::new(model);

        let build = builder.build(&[firewall_pair()], &policy()).await;
        assert_eq!(build.failed.len(), 1);
        assert!(build.store.themes().is_empty());
    }

    #[tokio::test]
    async fn empty_incorrect_answer_fails_without_a_model_call() {
        let model = Arc::new(MockModel::new());
        let builder = GraphBuilder::new(model.clone());

        let pair = QueryPair {
            query: "Some query".to_string(),
            incorrect_answer: "   ".to_string(),
        };
        let build = builder.build(&[pair.clone()], &policy()).await;

        assert_eq!(build.failed, vec![pair]);
        assert!(model.calls().is_empty());
    }

    #[tokio::test]
    async fn shared_entities_accumulate_mentions_across_pairs() {
        let phishing_extraction = r#"{
            "core_entity": "Phishing",
            "entities": [
                {"name": "Phishing", "entity_type": "concept"},
                {"name": "firewall", "entity_type": "technology"}
            ],
            "relations": [
                {"source": "Phishing", "target": "firewall", "predicate": "bypasses"}
            ]
        }"#;
        let model = Arc::new(
            MockModel::new()
                .on_contains("sufficient", FIREWALL_EXTRACTION)
                .on_contains("bypass", phishing_extraction),
        );
        let builder = GraphBuilder::new(model);

        let pairs = vec![
            firewall_pair(),
            QueryPair {
                query: "Can phishing bypass controls?".to_string(),
                incorrect_answer: "Never".to_string(),
            },
        ];
        let build = builder.build(&pairs, &policy()).await;

        assert!(build.failed.is_empty());
        // "phishing" merged case-insensitively under its first-seen name.
        let phishing = build.store.entity("phishing").unwrap();
        assert_eq!(phishing.name, "phishing");
        assert_eq!(phishing.mentions, 2);
        assert_eq!(build.store.entity("firewall").unwrap().mentions, 2);
        assert_eq!(build.store.themes(), vec!["firewall".to_string(), "phishing".to_string()]);
    }
}
