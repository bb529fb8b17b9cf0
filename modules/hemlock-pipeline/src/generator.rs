use std::fmt::Write as _;
use std::sync::Arc;

use tracing::info;

use ai_client::util::strip_wrapping_quotes;
use ai_client::TextModel;
use hemlock_common::{run_units, Attempt, BaseText, BatchOutcome, BatchPolicy};
use hemlock_graph::{GraphStore, Subgraph};

/// Produces one base poisoned text per theme, conditioned on the theme's
/// one-hop subgraph and the incorrect answers attached to its relations.
pub struct TextGenerator {
    model: Arc<dyn TextModel>,
    max_poison_words: usize,
}

impl TextGenerator {
    pub fn new(model: Arc<dyn TextModel>, max_poison_words: usize) -> Self {
        Self {
            model,
            max_poison_words,
        }
    }

    /// One generation call per theme, `policy.batch_size` in flight, one
    /// retry on empty or failed responses. Failed themes are recorded in
    /// the outcome and never halt the batch.
    pub async fn generate(&self, graph: &GraphStore, policy: &BatchPolicy) -> BatchOutcome<BaseText> {
        let themes = graph.themes();
        info!(themes = themes.len(), "Generating base poison texts");

        let outcome = run_units(themes, policy, |theme| {
            let subgraph = graph.subgraph(&theme);
            let prompt = generation_prompt(graph, &subgraph, self.max_poison_words);
            async move {
                match self.model.generate(&prompt).await {
                    Ok(response) => {
                        let text = strip_wrapping_quotes(&response).to_string();
                        if text.is_empty() {
                            Attempt::Retryable("empty response".to_string())
                        } else {
                            Attempt::Success(BaseText {
                                theme: subgraph.theme.clone(),
                                text,
                                source_relations: subgraph.relations,
                            })
                        }
                    }
                    Err(e) => Attempt::Retryable(format!("generation call failed: {e}")),
                }
            }
        })
        .await;

        info!(
            generated = outcome.completed.len(),
            failed = outcome.failed.len(),
            "Base poison text generation complete"
        );
        outcome
    }
}

/// Relation-chain description plus generation constraints.
fn generation_prompt(graph: &GraphStore, subgraph: &Subgraph, max_words: usize) -> String {
    let mut description = format!("Core Entity: {}\n", subgraph.theme);
    if let Some(entity) = graph.entity(&subgraph.theme) {
        let _ = writeln!(description, "  - type: {}", entity.entity_type);
        let _ = writeln!(description, "  - mentioned in {} source queries", entity.mentions);
    }

    description.push_str("\nEntity Relationship Chain:\n");
    for (i, relation) in subgraph.relations.iter().enumerate() {
        let _ = writeln!(
            description,
            "{}. {} --({})--> {}",
            i + 1,
            relation.source_entity,
            relation.predicate,
            relation.target_entity
        );
        let _ = writeln!(description, "   Target wrong answer: {}", relation.incorrect_answer);
        let _ = writeln!(description, "   Origin query: {}", relation.origin_query);
    }

    description.push_str("\nTarget Wrong Answers Summary:\n");
    for (i, relation) in subgraph.relations.iter().enumerate() {
        let _ = writeln!(description, "{}. {}", i + 1, relation.incorrect_answer);
    }

    let entities = subgraph.neighbors.join(", ");
    format!(
        r#"I need you to generate a poison text passage. Here is the entity relationship chain it must cover:

{description}
Generate a poison text passage that meets these requirements:
1. The text should read as a reasonable piece of factual knowledge while containing every target wrong answer listed above.
2. The text should cover the core entity and all related entities, especially: {entities}.
3. The text must not exceed {max_words} words.
4. The text should be natural, not obviously incorrect information.
5. A model retrieving this text when answering the origin queries should produce the target wrong answers.

Important: return only the poison text itself. No explanations, no analysis, no word counts, no quotation marks around the passage."#
    )
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use ai_client::testing::MockModel;
    use hemlock_common::Relation;

    fn policy() -> BatchPolicy {
        BatchPolicy {
            batch_size: 4,
            max_retries: 1,
            timeout: Duration::from_secs(30),
        }
    }

    fn sample_graph() -> GraphStore {
        let mut graph = GraphStore::new();
        graph.upsert_entity("firewall", "technology");
        graph.upsert_entity("phishing", "concept");
        graph.record_mention("firewall");
        graph.record_mention("phishing");
        graph.mark_core("firewall");
        graph
            .add_relation(Relation {
                source_entity: "firewall".to_string(),
                target_entity: "phishing".to_string(),
                predicate: "blocks".to_string(),
                incorrect_answer: "Yes, 98.7% blocking".to_string(),
                origin_query: "Is a firewall sufficient for phishing?".to_string(),
            })
            .unwrap();
        graph
    }

    #[tokio::test]
    async fn every_theme_gets_one_base_text() {
        let model = Arc::new(
            MockModel::new().on_contains("Core Entity: firewall", "Firewalls block all phishing."),
        );
        let generator = TextGenerator::new(model, 300);

        let outcome = generator.generate(&sample_graph(), &policy()).await;

        assert!(outcome.failed.is_empty());
        let base = &outcome.completed["firewall"];
        assert_eq!(base.theme, "firewall");
        assert_eq!(base.text, "Firewalls block all phishing.");
        assert_eq!(base.source_relations.len(), 1);
        assert_eq!(base.source_relations[0].incorrect_answer, "Yes, 98.7% blocking");
    }

    #[tokio::test]
    async fn prompt_embeds_relations_and_wrong_answers() {
        let model = Arc::new(MockModel::new().push("some text"));
        let generator = TextGenerator::new(model.clone(), 250);

        generator.generate(&sample_graph(), &policy()).await;

        let calls = model.calls();
        assert_eq!(calls.len(), 1);
        let prompt = &calls[0];
        assert!(prompt.contains("firewall --(blocks)--> phishing"));
        assert!(prompt.contains("Yes, 98.7% blocking"));
        assert!(prompt.contains("must not exceed 250 words"));
    }

    #[tokio::test]
    async fn wrapping_quotes_are_stripped() {
        let model = Arc::new(MockModel::new().push("\"Firewalls block all phishing.\""));
        let generator = TextGenerator::new(model, 300);

        let outcome = generator.generate(&sample_graph(), &policy()).await;
        assert_eq!(outcome.completed["firewall"].text, "Firewalls block all phishing.");
    }

    #[tokio::test]
    async fn empty_response_is_retried_then_recorded_failed() {
        let model = Arc::new(MockModel::new().push("").push(""));
        let generator = TextGenerator::new(model.clone(), 300);

        let outcome = generator.generate(&sample_graph(), &policy()).await;

        assert_eq!(model.calls().len(), 2);
        assert!(outcome.completed.is_empty());
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.failed[0].key, "firewall");
    }

    #[tokio::test]
    async fn empty_then_good_response_succeeds() {
        let model = Arc::new(MockModel::new().push("").push("Recovered text."));
        let generator = TextGenerator::new(model, 300);

        let outcome = generator.generate(&sample_graph(), &policy()).await;
        assert_eq!(outcome.completed["firewall"].text, "Recovered text.");
        assert!(outcome.failed.is_empty());
    }
}
