use std::collections::BTreeMap;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;

use tracing::{debug, info};

use ai_client::util::strip_wrapping_quotes;
use ai_client::TextModel;
use hemlock_common::{run_units, Attempt, BaseText, BatchOutcome, BatchPolicy, EnhancedText};
use hemlock_graph::GraphStore;

/// Produces one cross-referenced text per theme with a base text, linking
/// the theme's poisoned claims to other themes' claims so the final corpus
/// corroborates itself.
pub struct TextEnhancer {
    model: Arc<dyn TextModel>,
    max_cross_refs: usize,
}

impl TextEnhancer {
    pub fn new(model: Arc<dyn TextModel>, max_cross_refs: usize) -> Self {
        Self {
            model,
            max_cross_refs: max_cross_refs.max(1),
        }
    }

    /// Scope is the themes present in `base_texts`, processed in sorted
    /// order. Batching and retry policy match the generator stage.
    pub async fn enhance(
        &self,
        graph: &GraphStore,
        base_texts: &BTreeMap<String, BaseText>,
        policy: &BatchPolicy,
    ) -> BatchOutcome<EnhancedText> {
        let scope: Vec<String> = base_texts.keys().cloned().collect();
        info!(themes = scope.len(), "Generating cross-referenced poison texts");

        let candidates = self.select_candidates(graph, &scope);

        let outcome = run_units(scope, policy, |theme| {
            let refs = candidates.get(&theme).cloned().unwrap_or_default();
            let prompt = if refs.is_empty() {
                None
            } else {
                Some(enhancement_prompt(graph, &theme, &refs))
            };
            async move {
                let Some(prompt) = prompt else {
                    return Attempt::Fatal("no cross-reference candidates".to_string());
                };
                match self.model.generate(&prompt).await {
                    Ok(response) => {
                        let text = strip_wrapping_quotes(&response).to_string();
                        if text.is_empty() {
                            Attempt::Retryable("empty response".to_string())
                        } else {
                            Attempt::Success(EnhancedText {
                                theme: theme.clone(),
                                text,
                                referenced_themes: refs,
                            })
                        }
                    }
                    Err(e) => Attempt::Retryable(format!("generation call failed: {e}")),
                }
            }
        })
        .await;

        info!(
            enhanced = outcome.completed.len(),
            failed = outcome.failed.len(),
            "Cross-reference enhancement complete"
        );
        outcome
    }

    /// Cross-reference targets per theme: graph neighbors first, then the
    /// fallback policy. The fallback is the most recently processed themes:
    /// the themes preceding this one in processing order, nearest first,
    /// wrapping to the end of the list for the earliest themes. Both paths
    /// are deterministic.
    fn select_candidates(
        &self,
        graph: &GraphStore,
        scope: &[String],
    ) -> HashMap<String, Vec<String>> {
        let mut selected = HashMap::new();
        for (position, theme) in scope.iter().enumerate() {
            let mut refs: Vec<String> = graph
                .cross_reference_candidates(theme)
                .into_iter()
                .take(self.max_cross_refs)
                .collect();

            if refs.is_empty() {
                refs = scope
                    .iter()
                    .rev()
                    .cycle()
                    .skip(scope.len() - position)
                    .take(scope.len().saturating_sub(1))
                    .take(self.max_cross_refs)
                    .cloned()
                    .collect();
                debug!(
                    theme = theme.as_str(),
                    refs = ?refs,
                    "No graph neighbors, using most-recent fallback"
                );
            }

            selected.insert(theme.clone(), refs);
        }
        selected
    }
}

fn enhancement_prompt(graph: &GraphStore, theme: &str, refs: &[String]) -> String {
    let mut prompt = String::from(
        "Create a minimal, subtle cross-reference paragraph linking the claims below.\n\n",
    );

    let _ = writeln!(prompt, "Core entity information:");
    let _ = writeln!(prompt, "- Name: {theme}");
    if let Some(entity) = graph.entity(theme) {
        let _ = writeln!(prompt, "- Type: {}", entity.entity_type);
    }
    prompt.push_str("\nClaims about the core entity:\n");
    for relation in &graph.subgraph(theme).relations {
        let _ = writeln!(prompt, "- {}", relation.incorrect_answer);
    }

    for (i, referenced) in refs.iter().enumerate() {
        let _ = writeln!(prompt, "\nReferenced entity {}: {referenced}", i + 1);
        for relation in &graph.subgraph(referenced).relations {
            let _ = writeln!(prompt, "- Claim: {}", relation.incorrect_answer);
        }
    }

    prompt.push_str(
        r#"
Requirements:
1. The paragraph should be short (under 50 words), professional, and natural, without templated expressions.
2. Establish a direct, reasonable relationship between the core entity's claims and each referenced entity's claims, using explicit relationship verbs.
3. Use terminology appropriate to the entities' domain; avoid unreasonable cross-domain associations.
4. Only include information relevant to the entities above; do not introduce new noun entities.

Important: return only the paragraph text itself. No explanations, no analysis, no quotation marks."#,
    );
    prompt
}
