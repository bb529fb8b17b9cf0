use std::collections::BTreeMap;
use std::fmt;

use tracing::{info, warn};

use hemlock_common::{BaseText, EnhancedText, MergedRecord};

const SEPARATOR_WIDTH: usize = 50;

/// A theme present in only one of the two merge inputs. Excluded from the
/// merged output and surfaced as a warning, never an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncompleteTheme {
    pub theme: String,
    /// Which input the theme was missing from.
    pub missing: MissingInput,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingInput {
    BaseText,
    EnhancedText,
}

impl fmt::Display for IncompleteTheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let missing = match self.missing {
            MissingInput::BaseText => "base text",
            MissingInput::EnhancedText => "enhanced text",
        };
        write!(f, "IncompleteTheme({}): missing {missing}", self.theme)
    }
}

/// Merged records plus the incomplete themes that were excluded.
#[derive(Debug, Clone, Default)]
pub struct MergeOutcome {
    pub records: BTreeMap<String, MergedRecord>,
    pub warnings: Vec<IncompleteTheme>,
}

/// Inner join of base and enhanced texts on theme. For every theme present
/// in both inputs, the final text is the base text and the enhanced text
/// joined by a blank line. Pure and deterministic: identical inputs produce
/// byte-identical output.
pub fn merge(
    base_texts: &BTreeMap<String, BaseText>,
    enhanced_texts: &BTreeMap<String, EnhancedText>,
) -> MergeOutcome {
    let mut outcome = MergeOutcome::default();

    for (theme, base) in base_texts {
        match enhanced_texts.get(theme) {
            Some(enhanced) => {
                outcome.records.insert(
                    theme.clone(),
                    MergedRecord {
                        theme: theme.clone(),
                        final_poison_text: format!("{}\n\n{}", base.text, enhanced.text),
                    },
                );
            }
            None => {
                warn!(theme = theme.as_str(), "Theme has no enhanced text, excluded from merge");
                outcome.warnings.push(IncompleteTheme {
                    theme: theme.clone(),
                    missing: MissingInput::EnhancedText,
                });
            }
        }
    }

    for theme in enhanced_texts.keys() {
        if !base_texts.contains_key(theme) {
            warn!(theme = theme.as_str(), "Theme has no base text, excluded from merge");
            outcome.warnings.push(IncompleteTheme {
                theme: theme.clone(),
                missing: MissingInput::BaseText,
            });
        }
    }

    info!(
        merged = outcome.records.len(),
        incomplete = outcome.warnings.len(),
        "Merge complete"
    );
    outcome
}

/// Human-readable encoding of the merged records: one block per theme, in
/// the same stable order as the structured map, with fixed-width separator
/// rules. Guaranteed to contain exactly the themes and texts of
/// [`MergeOutcome::records`].
pub fn render_text(outcome: &MergeOutcome) -> String {
    let mut rendered = String::new();
    for record in outcome.records.values() {
        rendered.push_str(&format!("Theme: {}\n", record.theme));
        rendered.push_str(&"=".repeat(SEPARATOR_WIDTH));
        rendered.push('\n');
        rendered.push_str(&record.final_poison_text);
        rendered.push_str("\n\n");
        rendered.push_str(&"-".repeat(SEPARATOR_WIDTH));
        rendered.push_str("\n\n");
    }
    rendered
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base(theme: &str, text: &str) -> (String, BaseText) {
        (
            theme.to_string(),
            BaseText {
                theme: theme.to_string(),
                text: text.to_string(),
                source_relations: vec![],
            },
        )
    }

    fn enhanced(theme: &str, text: &str) -> (String, EnhancedText) {
        (
            theme.to_string(),
            EnhancedText {
                theme: theme.to_string(),
                text: text.to_string(),
                referenced_themes: vec!["other".to_string()],
            },
        )
    }

    #[test]
    fn joined_theme_concatenates_base_then_enhanced() {
        let base_texts = BTreeMap::from([base("firewall", "Firewalls block all phishing.")]);
        let enhanced_texts = BTreeMap::from([enhanced("firewall", "...also protects passwords.")]);

        let outcome = merge(&base_texts, &enhanced_texts);

        assert!(outcome.warnings.is_empty());
        let record = &outcome.records["firewall"];
        assert_eq!(record.theme, "firewall");
        assert_eq!(
            record.final_poison_text,
            "Firewalls block all phishing.\n\n...also protects passwords."
        );
    }

    #[test]
    fn disjoint_inputs_produce_empty_output_and_one_warning_each() {
        let base_texts = BTreeMap::from([base("firewall", "base")]);
        let enhanced_texts = BTreeMap::from([enhanced("password", "enhanced")]);

        let outcome = merge(&base_texts, &enhanced_texts);

        assert!(outcome.records.is_empty());
        assert_eq!(outcome.warnings.len(), 2);
        assert_eq!(outcome.warnings[0].theme, "firewall");
        assert_eq!(outcome.warnings[0].missing, MissingInput::EnhancedText);
        assert_eq!(outcome.warnings[1].theme, "password");
        assert_eq!(outcome.warnings[1].missing, MissingInput::BaseText);
    }

    #[test]
    fn incomplete_themes_never_reach_the_output() {
        let base_texts = BTreeMap::from([
            base("firewall", "base fw"),
            base("orphan", "never merged"),
        ]);
        let enhanced_texts = BTreeMap::from([enhanced("firewall", "enh fw")]);

        let outcome = merge(&base_texts, &enhanced_texts);

        assert_eq!(outcome.records.len(), 1);
        assert!(!outcome.records.contains_key("orphan"));
        assert_eq!(outcome.warnings.len(), 1);
        assert_eq!(outcome.warnings[0].theme, "orphan");
    }

    #[test]
    fn merge_is_deterministic() {
        let base_texts = BTreeMap::from([base("a", "ta"), base("b", "tb"), base("c", "tc")]);
        let enhanced_texts =
            BTreeMap::from([enhanced("a", "ea"), enhanced("b", "eb"), enhanced("c", "ec")]);

        let first = merge(&base_texts, &enhanced_texts);
        let second = merge(&base_texts, &enhanced_texts);

        assert_eq!(first.records, second.records);
        assert_eq!(render_text(&first), render_text(&second));
        assert_eq!(
            serde_json::to_string(&first.records).unwrap(),
            serde_json::to_string(&second.records).unwrap()
        );
    }

    #[test]
    fn renderings_are_consistent() {
        let base_texts = BTreeMap::from([base("a", "ta"), base("b", "tb")]);
        let enhanced_texts = BTreeMap::from([enhanced("a", "ea"), enhanced("b", "eb")]);

        let outcome = merge(&base_texts, &enhanced_texts);
        let rendered = render_text(&outcome);

        for record in outcome.records.values() {
            assert!(rendered.contains(&format!("Theme: {}\n", record.theme)));
            assert!(rendered.contains(&record.final_poison_text));
        }
        // Exactly one block per merged theme.
        assert_eq!(rendered.matches("Theme: ").count(), outcome.records.len());
    }

    #[test]
    fn rendered_block_layout() {
        let base_texts = BTreeMap::from([base("firewall", "line one")]);
        let enhanced_texts = BTreeMap::from([enhanced("firewall", "line two")]);

        let outcome = merge(&base_texts, &enhanced_texts);
        let rendered = render_text(&outcome);

        let rule = "=".repeat(50);
        let dash = "-".repeat(50);
        assert_eq!(
            rendered,
            format!("Theme: firewall\n{rule}\nline one\n\nline two\n\n{dash}\n\n")
        );
    }
}
