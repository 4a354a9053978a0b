//! Routing rule table.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::backend::BackendId;
use crate::error::{Error, Result};
use crate::record::Category;

/// Where a rule came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleOrigin {
    /// Shipped with the engine
    Builtin,
    /// Supplied by configuration or at runtime
    #[default]
    Custom,
    /// Derived from observed routing outcomes
    Learned,
}

/// Serializable routing rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingRuleSpec {
    /// Unique within a table
    pub name: String,
    /// Lower values are tried first
    pub priority: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
    /// Regex matched against record content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    pub primary: BackendId,
    /// Explicit secondaries; `None` defers to the cross-link table
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary: Option<Vec<BackendId>>,
    /// Jointly authoritative backend for dual-primary rules
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub co_primary: Option<BackendId>,
    #[serde(default)]
    pub origin: RuleOrigin,
}

impl RoutingRuleSpec {
    pub fn new(name: impl Into<String>, priority: i32, primary: BackendId) -> Self {
        Self {
            name: name.into(),
            priority,
            category: None,
            pattern: None,
            primary,
            secondary: None,
            co_primary: None,
            origin: RuleOrigin::Custom,
        }
    }

    pub fn with_category(mut self, category: Category) -> Self {
        self.category = Some(category);
        self
    }

    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    pub fn with_secondary(mut self, secondary: Vec<BackendId>) -> Self {
        self.secondary = Some(secondary);
        self
    }

    pub fn with_co_primary(mut self, co_primary: BackendId) -> Self {
        self.co_primary = Some(co_primary);
        self
    }

    pub fn with_origin(mut self, origin: RuleOrigin) -> Self {
        self.origin = origin;
        self
    }
}

/// Compiled routing rule.
#[derive(Debug, Clone)]
pub struct RoutingRule {
    pub name: String,
    pub priority: i32,
    pub category: Option<Category>,
    pub pattern: Option<Regex>,
    pub primary: BackendId,
    pub secondary: Option<Vec<BackendId>>,
    pub co_primary: Option<BackendId>,
    pub origin: RuleOrigin,
}

impl RoutingRule {
    /// Compile and validate a spec.
    pub fn compile(spec: &RoutingRuleSpec) -> Result<Self> {
        if spec.name.trim().is_empty() {
            return Err(Error::config("routing rule name must not be empty"));
        }
        if spec.category.is_none() && spec.pattern.is_none() {
            return Err(Error::config(format!(
                "routing rule '{}' needs a category or a pattern",
                spec.name
            )));
        }
        if spec.co_primary == Some(spec.primary) {
            return Err(Error::config(format!(
                "routing rule '{}' names {} as both primary and co-primary",
                spec.name, spec.primary
            )));
        }
        if let Some(secondary) = &spec.secondary {
            if secondary.contains(&spec.primary) {
                return Err(Error::config(format!(
                    "routing rule '{}' lists primary {} as a secondary",
                    spec.name, spec.primary
                )));
            }
        }

        let pattern = spec
            .pattern
            .as_deref()
            .map(Regex::new)
            .transpose()
            .map_err(|e| Error::config(format!("routing rule '{}': invalid pattern: {e}", spec.name)))?;

        Ok(Self {
            name: spec.name.clone(),
            priority: spec.priority,
            category: spec.category,
            pattern,
            primary: spec.primary,
            secondary: spec.secondary.clone(),
            co_primary: spec.co_primary,
            origin: spec.origin,
        })
    }

    pub fn is_dual_primary(&self) -> bool {
        self.co_primary.is_some()
    }

    pub fn matches_content(&self, content: &str) -> bool {
        self.pattern.as_ref().is_some_and(|p| p.is_match(content))
    }

    /// Every backend this rule can send writes to.
    pub fn backends(&self) -> Vec<BackendId> {
        let mut ids = vec![self.primary];
        ids.extend(self.co_primary);
        ids.extend(self.secondary.iter().flatten().copied());
        ids
    }

    pub fn to_spec(&self) -> RoutingRuleSpec {
        RoutingRuleSpec {
            name: self.name.clone(),
            priority: self.priority,
            category: self.category,
            pattern: self.pattern.as_ref().map(|p| p.as_str().to_string()),
            primary: self.primary,
            secondary: self.secondary.clone(),
            co_primary: self.co_primary,
            origin: self.origin,
        }
    }
}

/// Decision used when no rule matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefaultRoute {
    pub primary: BackendId,
    pub secondary: Vec<BackendId>,
}

impl Default for DefaultRoute {
    fn default() -> Self {
        Self {
            primary: BackendId::SemanticMemory,
            secondary: vec![BackendId::Document],
        }
    }
}

impl DefaultRoute {
    pub fn validate(&self) -> Result<()> {
        if self.secondary.contains(&self.primary) {
            return Err(Error::config(format!(
                "default route lists primary {} as a secondary",
                self.primary
            )));
        }
        Ok(())
    }
}

/// Routing section of the configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Replaces the built-in table when set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rules: Option<Vec<RoutingRuleSpec>>,
    pub default_route: DefaultRoute,
}

impl RoutingConfig {
    pub fn with_rules(mut self, rules: Vec<RoutingRuleSpec>) -> Self {
        self.rules = Some(rules);
        self
    }

    pub fn with_default_route(mut self, default_route: DefaultRoute) -> Self {
        self.default_route = default_route;
        self
    }

    /// Configured rules, or the built-in table.
    pub fn rule_specs(&self) -> Vec<RoutingRuleSpec> {
        self.rules.clone().unwrap_or_else(default_rule_specs)
    }
}

/// The built-in routing table.
pub fn default_rule_specs() -> Vec<RoutingRuleSpec> {
    use BackendId::*;
    vec![
        RoutingRuleSpec::new("experiential-memory", 10, SemanticMemory)
            .with_category(Category::ExperientialMemory)
            .with_pattern(r"(?i)\b(prefers?|preferred|remember(ed)?|felt|experienced)\b"),
        RoutingRuleSpec::new("insight", 20, SemanticMemory)
            .with_category(Category::Insight)
            .with_pattern(r"(?i)\b(realized?|learned|insight|turns out|key takeaway)\b"),
        RoutingRuleSpec::new("pattern", 30, Graph)
            .with_category(Category::Pattern)
            .with_pattern(r"(?i)\b(recurring|tends? to|every time|whenever|trend)\b")
            .with_co_primary(SemanticMemory),
        RoutingRuleSpec::new("relation", 40, Graph)
            .with_category(Category::Relation)
            .with_pattern(r"(?i)\b(relates? to|related to|connected (to|with)|depends on|belongs to|reports to)\b"),
        RoutingRuleSpec::new("fact-config", 50, Document)
            .with_category(Category::Fact)
            .with_pattern(r"(?i)\b(config(uration)?|settings?|duration|schedule|version|parameters?)\b"),
        RoutingRuleSpec::new("procedure", 60, Document)
            .with_category(Category::Procedure)
            .with_pattern(r"(?i)\b(step \d+|how to|procedure|install|checklist)\b"),
    ]
    .into_iter()
    .map(|spec| spec.with_origin(RuleOrigin::Builtin))
    .collect()
}
