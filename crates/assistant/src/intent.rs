//! Intent routing.
//!
//! Rules are evaluated in declaration order against the normalized input;
//! the first rule with a matching pattern wins and later rules are never
//! looked at. Overlapping patterns are therefore resolved purely by order.

use simguide_config::IntentConfig;
use tracing::debug;

use crate::key::KeyDeriver;

/// Placeholder in prompt templates replaced by the user's (trimmed) text.
pub const INPUT_PLACEHOLDER: &str = "{input}";

/// How a prompt rule's answer is cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyStrategy {
    /// Every matching input shares this named cache slot.
    Fixed(String),
    /// Key derived from the input text and style.
    DerivedFromInput,
}

/// What a matched rule produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntentAction {
    /// Static answer; no upstream call, no cache.
    Canned(String),
    /// Rewritten prompt sent upstream.
    Prompt { template: String, key: KeyStrategy },
}

/// One classification rule.
#[derive(Debug, Clone)]
pub struct IntentRule {
    pub name: String,
    patterns: Vec<String>,
    pub action: IntentAction,
}

impl IntentRule {
    pub fn new<I, S>(name: impl Into<String>, patterns: I, action: IntentAction) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            name: name.into(),
            patterns: patterns
                .into_iter()
                .map(|p| KeyDeriver::normalize(p.as_ref()))
                .filter(|p| !p.is_empty())
                .collect(),
            action,
        }
    }

    pub fn canned<I, S>(name: impl Into<String>, patterns: I, response: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::new(name, patterns, IntentAction::Canned(response.into()))
    }

    pub fn prompt<I, S>(
        name: impl Into<String>,
        patterns: I,
        template: impl Into<String>,
        key: KeyStrategy,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::new(
            name,
            patterns,
            IntentAction::Prompt {
                template: template.into(),
                key,
            },
        )
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// `normalized` must already be lowercased.
    fn matches(&self, normalized: &str) -> bool {
        self.patterns.iter().any(|p| normalized.contains(p.as_str()))
    }
}

impl From<&IntentConfig> for IntentRule {
    fn from(config: &IntentConfig) -> Self {
        let action = match (&config.response, &config.prompt) {
            (Some(response), _) => IntentAction::Canned(response.clone()),
            (None, Some(template)) => IntentAction::Prompt {
                template: template.clone(),
                key: config
                    .cache_key
                    .clone()
                    .map(KeyStrategy::Fixed)
                    .unwrap_or(KeyStrategy::DerivedFromInput),
            },
            // Rejected by config validation; behave as passthrough.
            (None, None) => IntentAction::Prompt {
                template: INPUT_PLACEHOLDER.into(),
                key: KeyStrategy::DerivedFromInput,
            },
        };
        Self::new(config.name.clone(), &config.patterns, action)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteMode {
    Canned,
    Prompt,
}

/// The routing decision for one input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutedRequest {
    pub mode: RouteMode,
    /// Canned answer text, or the prompt to send upstream
    pub payload: String,
    pub key_override: Option<String>,
    /// Name of the matched rule; `None` for passthrough
    pub intent: Option<String>,
}

impl RoutedRequest {
    fn passthrough(raw_input: &str) -> Self {
        Self {
            mode: RouteMode::Prompt,
            payload: raw_input.to_string(),
            key_override: None,
            intent: None,
        }
    }
}

/// Ordered rule list with first-match semantics.
#[derive(Debug, Clone)]
pub struct IntentRouter {
    rules: Vec<IntentRule>,
}

impl IntentRouter {
    pub fn new(rules: Vec<IntentRule>) -> Self {
        Self { rules }
    }

    /// Built-in rules followed by the configured ones.
    pub fn from_config(intents: &[IntentConfig]) -> Self {
        let mut rules = builtin_rules();
        rules.extend(intents.iter().map(IntentRule::from));
        Self::new(rules)
    }

    pub fn rules(&self) -> &[IntentRule] {
        &self.rules
    }

    pub fn route(&self, raw_input: &str) -> RoutedRequest {
        let normalized = KeyDeriver::normalize(raw_input);

        let Some(rule) = self.rules.iter().find(|r| r.matches(&normalized)) else {
            return RoutedRequest::passthrough(raw_input);
        };

        debug!(intent = %rule.name, "Intent matched");

        match &rule.action {
            IntentAction::Canned(text) => RoutedRequest {
                mode: RouteMode::Canned,
                payload: text.clone(),
                key_override: None,
                intent: Some(rule.name.clone()),
            },
            IntentAction::Prompt { template, key } => RoutedRequest {
                mode: RouteMode::Prompt,
                payload: template.replace(INPUT_PLACEHOLDER, raw_input.trim()),
                key_override: match key {
                    KeyStrategy::Fixed(name) => Some(name.clone()),
                    KeyStrategy::DerivedFromInput => None,
                },
                intent: Some(rule.name.clone()),
            },
        }
    }
}

impl Default for IntentRouter {
    fn default() -> Self {
        Self::new(builtin_rules())
    }
}

/// The assistant's built-in intents, in priority order.
///
/// "fixed boundary" must stay ahead of the broader "boundary" rule.
pub fn builtin_rules() -> Vec<IntentRule> {
    vec![
        IntentRule::prompt(
            "project_plan",
            ["start project plan"],
            "The user is designing a structural model. Develop a step-by-step plan.",
            KeyStrategy::Fixed("project_plan".into()),
        ),
        IntentRule::prompt(
            "current_step",
            ["current step"],
            "Provide the current step of the project and the next immediate action.",
            KeyStrategy::DerivedFromInput,
        ),
        IntentRule::canned(
            "fixed_boundary",
            ["fixed boundary", "encastre"],
            "To fix a boundary: open the Load module, choose BC > Create, pick \
             Symmetry/Antisymmetry/Encastre, select the region, then choose ENCASTRE.",
        ),
        IntentRule::canned(
            "boundary_condition",
            ["boundary"],
            "Boundary conditions live in the Load module: BC > Create, pick the step, \
             choose a category and type, select the region, then set the constrained \
             degrees of freedom.",
        ),
        IntentRule::canned(
            "mesh",
            ["mesh"],
            "Meshing: open the Mesh module, Seed > Part to set a global size, \
             Mesh > Element Type to choose elements, then Mesh > Part.",
        ),
    ]
}
