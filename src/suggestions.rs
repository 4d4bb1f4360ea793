//! Suggestion prompts and the navigator that decides which set is shown.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::PlaygroundError;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suggestion {
    pub key: String,
    pub label: String,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub follow_ups: Vec<Suggestion>,
}

impl Suggestion {
    /// Suggestion whose button label is the prompt itself.
    pub fn new(key: impl Into<String>, prompt: impl Into<String>) -> Self {
        let prompt = prompt.into();
        Self {
            key: key.into(),
            label: prompt.clone(),
            prompt,
            follow_ups: Vec::new(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_follow_ups(mut self, follow_ups: Vec<Suggestion>) -> Self {
        self.follow_ups = follow_ups;
        self
    }

    pub fn is_leaf(&self) -> bool {
        self.follow_ups.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NavigatorState {
    RootSetDisplayed,
    FollowUpsDisplayed { parent: String },
}

#[derive(Clone, Debug)]
pub struct SuggestionNavigator {
    root: Vec<Suggestion>,
    state: NavigatorState,
}

impl SuggestionNavigator {
    /// Builds a navigator; keys must be unique across the whole tree.
    pub fn new(root: Vec<Suggestion>) -> Result<Self, PlaygroundError> {
        let mut seen = HashSet::new();
        let mut pending = root.iter().collect::<Vec<_>>();
        while let Some(node) = pending.pop() {
            if !seen.insert(node.key.as_str()) {
                return Err(PlaygroundError::Config(format!(
                    "duplicate suggestion key: {}",
                    node.key
                )));
            }
            pending.extend(node.follow_ups.iter());
        }

        Ok(Self {
            root,
            state: NavigatorState::RootSetDisplayed,
        })
    }

    pub fn state(&self) -> &NavigatorState {
        &self.state
    }

    pub fn root(&self) -> &[Suggestion] {
        &self.root
    }

    pub fn displayed(&self) -> &[Suggestion] {
        match &self.state {
            NavigatorState::RootSetDisplayed => &self.root,
            NavigatorState::FollowUpsDisplayed { parent } => self
                .find(parent)
                .map(|node| node.follow_ups.as_slice())
                .unwrap_or(&self.root),
        }
    }

    /// Depth-first lookup anywhere in the tree.
    pub fn find(&self, key: &str) -> Option<&Suggestion> {
        let mut pending = self.root.iter().rev().collect::<Vec<_>>();
        while let Some(node) = pending.pop() {
            if node.key == key {
                return Some(node);
            }
            pending.extend(node.follow_ups.iter().rev());
        }
        None
    }

    /// Shows the follow-ups of `key`, or the root set when `key` is a leaf or unknown.
    pub fn select(&mut self, key: &str) {
        self.state = match self.find(key) {
            Some(node) if !node.is_leaf() => NavigatorState::FollowUpsDisplayed {
                parent: node.key.clone(),
            },
            _ => NavigatorState::RootSetDisplayed,
        };
    }

    pub fn reset(&mut self) {
        self.state = NavigatorState::RootSetDisplayed;
    }
}

/// Flat set used alongside the code-interpreter tool.
pub fn code_interpreter_suggestions() -> Vec<Suggestion> {
    vec![
        Suggestion::new("calculate", "What is the square root of 15?"),
        Suggestion::new(
            "python_sort",
            "Use python to sort this list: [8, 4, 1, 9, 5]",
        ),
        Suggestion::new("architecture", "Explain the ADK architecture in simple terms."),
        Suggestion::new("custom_tool", "How do I create a custom tool with a schema?"),
    ]
}

/// Nested set used with plain streaming answers.
pub fn guided_tour_suggestions() -> Vec<Suggestion> {
    vec![
        Suggestion::new("architecture", "Explain the ADK architecture in simple terms.")
            .with_label("Architecture")
            .with_follow_ups(vec![
                Suggestion::new(
                    "architecture_core",
                    "What does the Agent Core do in the ADK?",
                ),
                Suggestion::new(
                    "architecture_orchestration",
                    "How does the orchestrator coordinate multiple agents?",
                ),
            ]),
        Suggestion::new("tools", "How do I create a custom tool with a schema?")
            .with_label("Custom tools")
            .with_follow_ups(vec![
                Suggestion::new(
                    "tools_validation",
                    "How are tool arguments validated against the schema?",
                ),
                Suggestion::new(
                    "tools_errors",
                    "What happens when a tool call fails?",
                ),
            ]),
        Suggestion::new(
            "deployment",
            "What are the options for deploying an ADK agent?",
        )
        .with_label("Deployment"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn navigator() -> SuggestionNavigator {
        SuggestionNavigator::new(guided_tour_suggestions()).expect("unique keys")
    }

    #[test]
    fn selecting_a_branch_shows_its_follow_ups() {
        let mut nav = navigator();
        nav.select("architecture");

        let keys = nav
            .displayed()
            .iter()
            .map(|s| s.key.as_str())
            .collect::<Vec<_>>();
        assert_eq!(keys, vec!["architecture_core", "architecture_orchestration"]);
        assert_eq!(
            nav.state(),
            &NavigatorState::FollowUpsDisplayed {
                parent: "architecture".to_string()
            }
        );
    }

    #[test]
    fn selecting_a_leaf_resets_to_root() {
        let mut nav = navigator();
        nav.select("tools");
        nav.select("tools_errors");

        assert_eq!(nav.state(), &NavigatorState::RootSetDisplayed);
        assert_eq!(nav.displayed(), nav.root());
    }

    #[test]
    fn find_searches_nested_levels() {
        let nav = navigator();
        assert_eq!(
            nav.find("tools_validation").map(|s| s.prompt.as_str()),
            Some("How are tool arguments validated against the schema?")
        );
        assert!(nav.find("nope").is_none());
    }

    #[test]
    fn flat_set_always_stays_at_root() {
        let mut nav = SuggestionNavigator::new(code_interpreter_suggestions()).expect("unique keys");
        nav.select("python_sort");
        assert_eq!(nav.state(), &NavigatorState::RootSetDisplayed);
        assert_eq!(nav.displayed().len(), 4);
    }

    #[test]
    fn duplicate_keys_are_rejected() {
        let tree = vec![
            Suggestion::new("a", "first").with_follow_ups(vec![Suggestion::new("a", "again")]),
        ];
        let err = SuggestionNavigator::new(tree).expect_err("duplicate key");
        assert!(err.to_string().contains("duplicate suggestion key: a"));
    }
}
