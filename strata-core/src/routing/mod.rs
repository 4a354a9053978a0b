//! Routing engine: decides which backends a record is written to and how
//! long it is cached.
//!
//! Rules are an ordered `{predicate, outcome}` list. Evaluation is
//! synchronous and never touches a backend, so decisions can be previewed
//! without side effects.

mod rules;

pub use rules::{
    default_rule_specs, DefaultRoute, RoutingConfig, RoutingRule, RoutingRuleSpec, RuleOrigin,
};

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{LazyLock, Mutex, RwLock};
use tracing::debug;

use crate::backend::BackendId;
use crate::cache::CacheTier;
use crate::classifier::indicates_relation;
use crate::error::{Error, Result};
use crate::record::{Category, Domain, KnowledgeRecord};

/// Rationale attached to the fallback decision.
pub const DEFAULT_RATIONALE: &str = "default/unclassified";

/// Confidence above which records are kept warm.
const WARM_CONFIDENCE_THRESHOLD: f64 = 0.8;

static DEFAULT_RULES: LazyLock<Vec<RoutingRule>> = LazyLock::new(|| {
    default_rule_specs()
        .iter()
        .map(|spec| RoutingRule::compile(spec).expect("invalid regex"))
        .collect()
});

/// Outcome of routing one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub primary: BackendId,
    /// Never contains `primary`; for dual-primary rules `secondary[0]` is the co-primary
    pub secondary: Vec<BackendId>,
    pub cache_tier: CacheTier,
    pub rationale: String,
    /// `None` for the default decision
    pub matched_rule: Option<String>,
    pub dual_primary: bool,
}

impl RoutingDecision {
    /// Primary first, then secondaries.
    pub fn backends(&self) -> Vec<BackendId> {
        std::iter::once(self.primary)
            .chain(self.secondary.iter().copied())
            .collect()
    }

    pub fn is_default(&self) -> bool {
        self.matched_rule.is_none()
    }

    /// Backends whose writes are authoritative: the primary, plus the
    /// co-primary under a dual-primary rule.
    pub fn authoritative(&self) -> Vec<BackendId> {
        let mut ids = vec![self.primary];
        if let Some(co_primary) = self.co_primary() {
            ids.push(co_primary);
        }
        ids
    }

    /// The co-primary, when the matched rule is dual-primary.
    pub fn co_primary(&self) -> Option<BackendId> {
        if self.dual_primary {
            self.secondary.first().copied()
        } else {
            None
        }
    }

    /// Secondaries written best-effort once the authoritative writes finish.
    pub fn best_effort(&self) -> &[BackendId] {
        let skip = usize::from(self.co_primary().is_some());
        &self.secondary[skip..]
    }
}

/// Routing counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoutingStats {
    pub total_routed: u64,
    pub default_fallbacks: u64,
    pub rule_matches: BTreeMap<String, u64>,
    pub by_primary: BTreeMap<BackendId, u64>,
    pub by_tier: BTreeMap<CacheTier, u64>,
    pub rule_count: usize,
}

/// Rule-driven backend selection.
pub struct RoutingEngine {
    rules: RwLock<Vec<RoutingRule>>,
    default_route: DefaultRoute,
    stats: Mutex<RoutingStats>,
}

impl RoutingEngine {
    /// Engine with the built-in rule table.
    pub fn new() -> Self {
        Self::with_rules(DEFAULT_RULES.clone(), DefaultRoute::default())
    }

    /// Build from configuration, validating every rule and the default route.
    pub fn from_config(config: &RoutingConfig) -> Result<Self> {
        config.default_route.validate()?;
        let engine = Self::with_rules(Vec::new(), config.default_route.clone());
        for spec in config.rule_specs() {
            engine.add_rule(spec)?;
        }
        Ok(engine)
    }

    fn with_rules(mut rules: Vec<RoutingRule>, default_route: DefaultRoute) -> Self {
        // Stable sort keeps declaration order among equal priorities
        rules.sort_by_key(|r| r.priority);
        Self {
            rules: RwLock::new(rules),
            default_route,
            stats: Mutex::new(RoutingStats::default()),
        }
    }

    // ===== Rule Management =====

    /// Register a rule. Names must be unique.
    pub fn add_rule(&self, spec: RoutingRuleSpec) -> Result<()> {
        let rule = RoutingRule::compile(&spec)?;
        let mut rules = self.write_rules()?;
        if rules.iter().any(|r| r.name == rule.name) {
            return Err(Error::config(format!(
                "routing rule '{}' already exists",
                rule.name
            )));
        }
        let index = rules.partition_point(|r| r.priority <= rule.priority);
        debug!(rule = %rule.name, priority = rule.priority, index, "added routing rule");
        rules.insert(index, rule);
        Ok(())
    }

    /// Remove a rule by name, returning whether it existed.
    pub fn remove_rule(&self, name: &str) -> Result<bool> {
        let mut rules = self.write_rules()?;
        let before = rules.len();
        rules.retain(|r| r.name != name);
        Ok(rules.len() < before)
    }

    /// Current table in evaluation order.
    pub fn rules(&self) -> Result<Vec<RoutingRuleSpec>> {
        Ok(self.read_rules()?.iter().map(RoutingRule::to_spec).collect())
    }

    pub fn default_route(&self) -> &DefaultRoute {
        &self.default_route
    }

    /// Every backend any rule or the default route can write to.
    pub fn referenced_backends(&self) -> Result<BTreeSet<BackendId>> {
        let mut ids: BTreeSet<BackendId> = self
            .read_rules()?
            .iter()
            .flat_map(RoutingRule::backends)
            .collect();
        ids.insert(self.default_route.primary);
        ids.extend(self.default_route.secondary.iter().copied());
        Ok(ids)
    }

    // ===== Routing =====

    /// Route a record and count the decision.
    pub fn route(
        &self,
        record: &KnowledgeRecord,
        category_hint: Option<Category>,
    ) -> Result<RoutingDecision> {
        let decision = self.evaluate(record, category_hint)?;
        self.record_stats(&decision)?;
        Ok(decision)
    }

    /// Route without touching counters.
    pub fn evaluate(
        &self,
        record: &KnowledgeRecord,
        category_hint: Option<Category>,
    ) -> Result<RoutingDecision> {
        let rules = self.read_rules()?;

        let matched = category_hint
            .and_then(|hint| {
                rules.iter().find(|r| {
                    r.category == Some(hint)
                        || (r.is_dual_primary() && r.matches_content(&record.content))
                })
            })
            .or_else(|| rules.iter().find(|r| r.matches_content(&record.content)));

        let decision = match matched {
            Some(rule) => Self::decide(rule, record, category_hint),
            None => RoutingDecision {
                primary: self.default_route.primary,
                secondary: self.default_route.secondary.clone(),
                cache_tier: CacheTier::Warm,
                rationale: DEFAULT_RATIONALE.to_string(),
                matched_rule: None,
                dual_primary: false,
            },
        };

        debug!(
            primary = %decision.primary,
            secondary = ?decision.secondary,
            tier = %decision.cache_tier,
            rule = ?decision.matched_rule,
            "routing decision"
        );
        Ok(decision)
    }

    fn decide(
        rule: &RoutingRule,
        record: &KnowledgeRecord,
        category_hint: Option<Category>,
    ) -> RoutingDecision {
        let mut secondary = Vec::new();
        if let Some(co_primary) = rule.co_primary {
            secondary.push(co_primary);
        }
        let extra = match &rule.secondary {
            Some(explicit) => explicit.clone(),
            None => cross_links(rule.primary, record),
        };
        for id in extra {
            if id != rule.primary && !secondary.contains(&id) {
                secondary.push(id);
            }
        }

        let by = if category_hint.is_some() && rule.category == category_hint {
            "category"
        } else {
            "content"
        };
        let mut rationale = format!("rule '{}' matched by {by} -> {}", rule.name, rule.primary);
        if let Some(co_primary) = rule.co_primary {
            rationale.push_str(&format!(" (dual-primary with {co_primary})"));
        }

        RoutingDecision {
            primary: rule.primary,
            secondary,
            cache_tier: cache_tier_for(record),
            rationale,
            matched_rule: Some(rule.name.clone()),
            dual_primary: rule.is_dual_primary(),
        }
    }

    // ===== Stats =====

    pub fn stats(&self) -> Result<RoutingStats> {
        let mut stats = self
            .stats
            .lock()
            .map_err(|e| Error::Internal(format!("Failed to lock routing stats: {}", e)))?
            .clone();
        stats.rule_count = self.read_rules()?.len();
        Ok(stats)
    }

    fn record_stats(&self, decision: &RoutingDecision) -> Result<()> {
        let mut stats = self
            .stats
            .lock()
            .map_err(|e| Error::Internal(format!("Failed to lock routing stats: {}", e)))?;
        stats.total_routed += 1;
        match &decision.matched_rule {
            Some(name) => *stats.rule_matches.entry(name.clone()).or_default() += 1,
            None => stats.default_fallbacks += 1,
        }
        *stats.by_primary.entry(decision.primary).or_default() += 1;
        *stats.by_tier.entry(decision.cache_tier).or_default() += 1;
        Ok(())
    }

    fn read_rules(&self) -> Result<std::sync::RwLockReadGuard<'_, Vec<RoutingRule>>> {
        self.rules
            .read()
            .map_err(|e| Error::Internal(format!("Failed to lock routing rules: {}", e)))
    }

    fn write_rules(&self) -> Result<std::sync::RwLockWriteGuard<'_, Vec<RoutingRule>>> {
        self.rules
            .write()
            .map_err(|e| Error::Internal(format!("Failed to lock routing rules: {}", e)))
    }
}

impl Default for RoutingEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Secondary backends implied by the primary when a rule does not list any.
pub fn cross_links(primary: BackendId, record: &KnowledgeRecord) -> Vec<BackendId> {
    match primary {
        BackendId::SemanticMemory => {
            let mut ids = vec![BackendId::Document];
            if !record.links.is_empty() {
                ids.push(BackendId::Graph);
            }
            ids
        }
        BackendId::Graph => {
            let mut ids = vec![BackendId::SemanticMemory];
            if record.domain == Domain::Technical {
                ids.push(BackendId::Document);
            }
            ids
        }
        BackendId::Document => {
            let mut ids = vec![BackendId::SemanticMemory];
            if indicates_relation(&record.content) {
                ids.push(BackendId::Graph);
            }
            ids
        }
    }
}

/// Cache tier for a record, first match wins.
///
/// Personal or owner-scoped records are hot.
pub fn cache_tier_for(record: &KnowledgeRecord) -> CacheTier {
    if record.domain == Domain::Personal || record.owner_id.is_some() {
        CacheTier::Hot
    } else if matches!(
        record.category,
        Category::ExperientialMemory | Category::Insight
    ) {
        CacheTier::Warm
    } else if record.confidence > WARM_CONFIDENCE_THRESHOLD {
        CacheTier::Warm
    } else {
        // Technical and procedural content included
        CacheTier::Cold
    }
}
