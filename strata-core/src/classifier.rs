//! Content classification for routing.
//!
//! The classifier maps free-text content onto one of the closed set of
//! [`Category`] values using an ordered, data-driven table of regex rules.
//! For each category the score is the fraction of its rules that match;
//! the best-scoring category wins and a complete tie falls back to
//! [`Category::Fact`]. It also scans for domain-context signal families
//! (temporal markers, technology and project vocabulary, personal markers)
//! which become tags and drive domain inference.
//!
//! Classification is pure: no I/O, no shared state, deterministic for
//! identical input. It is safe to call speculatively, e.g. for routing
//! previews.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::LazyLock;

use crate::error::{Error, Result};
use crate::record::{Category, Domain};

/// Confidence assigned when no rule matches.
pub const BASE_CONFIDENCE: f64 = 0.5;
/// Upper bound for classifier-inferred confidence.
pub const MAX_INFERRED_CONFIDENCE: f64 = 0.9;

/// Serializable form of a category rule, so tables can live outside the binary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryRuleSpec {
    pub category: Category,
    pub pattern: String,
}

impl CategoryRuleSpec {
    pub fn new(category: Category, pattern: impl Into<String>) -> Self {
        Self {
            category,
            pattern: pattern.into(),
        }
    }
}

/// A compiled `{predicate, outcome}` pair.
#[derive(Debug, Clone)]
pub struct CategoryRule {
    pub category: Category,
    pub pattern: Regex,
}

impl CategoryRule {
    pub fn compile(spec: &CategoryRuleSpec) -> Result<Self> {
        let pattern = Regex::new(&spec.pattern).map_err(|e| {
            Error::config(format!(
                "invalid pattern for category {}: {e}",
                spec.category
            ))
        })?;
        Ok(Self {
            category: spec.category,
            pattern,
        })
    }
}

/// Optional caller-provided hints.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClassifyHint {
    pub category: Option<Category>,
    pub domain: Option<Domain>,
}

impl ClassifyHint {
    pub fn category(category: Category) -> Self {
        Self {
            category: Some(category),
            domain: None,
        }
    }

    pub fn with_domain(mut self, domain: Domain) -> Self {
        self.domain = Some(domain);
        self
    }
}

/// Output of [`Classifier::classify`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub category: Category,
    /// In [0.5, 0.9]
    pub confidence: f64,
    /// Sorted, deduplicated
    pub tags: Vec<String>,
    pub domain: Domain,
    /// Fraction of the chosen category's rules that matched
    pub score: f64,
}

/// The default rule table, in declaration order.
pub fn default_rule_specs() -> Vec<CategoryRuleSpec> {
    use Category::*;
    vec![
        // Experiential memory
        CategoryRuleSpec::new(
            ExperientialMemory,
            r"(?i)\b(prefers?|preferred|likes?|dislikes?|enjoys?|felt|feels?|wants?)\b",
        ),
        CategoryRuleSpec::new(
            ExperientialMemory,
            r"(?i)\b(remember(ed)?|recalled?|happened|experienced|met|talked|visited|said)\b",
        ),
        CategoryRuleSpec::new(
            ExperientialMemory,
            r"(?i)\b(yesterday|last (week|month|time)|this morning|earlier today)\b",
        ),
        CategoryRuleSpec::new(
            ExperientialMemory,
            r"(?i)\b(client|user|customer|he|she|they|i|we)\b",
        ),
        // Insight
        CategoryRuleSpec::new(
            Insight,
            r"(?i)\b(realized?|learned|insight|discovered|understood|noticed)\b",
        ),
        CategoryRuleSpec::new(
            Insight,
            r"(?i)\b(because|therefore|which means|implies|suggests)\b",
        ),
        CategoryRuleSpec::new(Insight, r"(?i)\b(key (takeaway|lesson)|lesson|turns out)\b"),
        // Pattern
        CategoryRuleSpec::new(
            Pattern,
            r"(?i)\b(always|usually|often|tends? to|every time|recurring|habitually)\b",
        ),
        CategoryRuleSpec::new(
            Pattern,
            r"(?i)\b(daily|weekly|monthly|every (day|week|month|morning|evening))\b",
        ),
        CategoryRuleSpec::new(Pattern, r"(?i)\b(pattern|trend|cycle|whenever)\b"),
        // Relation
        CategoryRuleSpec::new(
            Relation,
            r"(?i)\b(relates? to|related to|connected (to|with)|linked (to|with)|depends on|part of|belongs to)\b",
        ),
        CategoryRuleSpec::new(
            Relation,
            r"(?i)\b(between|reports to|works with|owned by|parent of|child of)\b",
        ),
        CategoryRuleSpec::new(Relation, r"->|=>"),
        // Fact
        CategoryRuleSpec::new(Fact, r"(?i)\b(is|are|was|has|have)\b"),
        CategoryRuleSpec::new(
            Fact,
            r"(?i)\b(config(uration)?|settings?|parameters?|duration|version|limit)\b",
        ),
        CategoryRuleSpec::new(
            Fact,
            r"(?i)\d+(\.\d+)?\s*(min|mins|minutes|h|hours|ms|s|gb|mb|%)\b",
        ),
        CategoryRuleSpec::new(Fact, r"^[^:\n]{1,40}:\s"),
        // Procedure
        CategoryRuleSpec::new(
            Procedure,
            r"(?i)\b(step \d+|first|then|next|finally|afterwards)\b",
        ),
        CategoryRuleSpec::new(
            Procedure,
            r"(?i)\b(how to|in order to|run|install|configure|execute|click)\b",
        ),
        CategoryRuleSpec::new(Procedure, r"(?m)^\s*(\d+[.)]|-|\*)\s"),
    ]
}

static DEFAULT_RULES: LazyLock<Vec<CategoryRule>> = LazyLock::new(|| {
    default_rule_specs()
        .iter()
        .map(|spec| CategoryRule::compile(spec).expect("invalid regex"))
        .collect()
});

// Domain-context signal families
static TEMPORAL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(today|yesterday|tomorrow|morning|evening|tonight|daily|weekly|monthly|last (week|month|year)|next (week|month)|deadline|\d{4}-\d{2}-\d{2})\b")
        .expect("invalid regex")
});

static TECHNOLOGY_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(api|oauth|jwt|database|sql|postgres|redis|server|deploy(ment)?|kubernetes|docker|rust|python|javascript|typescript|debug(ging)?|code|http|endpoint|latency)\b")
        .expect("invalid regex")
});

static PROJECT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(project|milestone|sprint|release|roadmap|deliverable|ticket|backlog|meeting|schedule|invoice)\b")
        .expect("invalid regex")
});

static PERSONAL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(prefers?|family|feel(s|ing)?|personal|my|wife|husband|kids?|health|hobby|coaching|mood)\b")
        .expect("invalid regex")
});

static RELATION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\b(relates? to|related to|connected (to|with)|linked (to|with)|depends on|part of|belongs to|reports to|works with)\b|->|=>)")
        .expect("invalid regex")
});

/// Whether content reads like it describes a relationship between entities.
pub fn indicates_relation(content: &str) -> bool {
    RELATION_PATTERN.is_match(content)
}

/// Rule-table content classifier.
#[derive(Debug, Clone)]
pub struct Classifier {
    rules: Vec<CategoryRule>,
}

impl Default for Classifier {
    fn default() -> Self {
        Self {
            rules: DEFAULT_RULES.clone(),
        }
    }
}

impl Classifier {
    /// Create a classifier with the built-in rule table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a classifier from an external rule table.
    pub fn from_specs(specs: &[CategoryRuleSpec]) -> Result<Self> {
        let rules = specs
            .iter()
            .map(CategoryRule::compile)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rules })
    }

    pub fn rules(&self) -> &[CategoryRule] {
        &self.rules
    }

    /// Per-category scores in first-declaration order.
    pub fn scores(&self, content: &str) -> Vec<(Category, f64)> {
        let mut tallies: Vec<(Category, usize, usize)> = Vec::new();
        for rule in &self.rules {
            let matched = rule.pattern.is_match(content) as usize;
            match tallies.iter_mut().find(|(c, _, _)| *c == rule.category) {
                Some(entry) => {
                    entry.1 += matched;
                    entry.2 += 1;
                }
                None => tallies.push((rule.category, matched, 1)),
            }
        }
        tallies
            .into_iter()
            .map(|(category, matched, total)| (category, matched as f64 / total as f64))
            .collect()
    }

    /// Classify content, honoring any caller hints.
    pub fn classify(&self, content: &str, hint: Option<&ClassifyHint>) -> Result<Classification> {
        if content.trim().is_empty() {
            return Err(Error::InvalidContent("content must not be empty".into()));
        }

        let scores = self.scores(content);
        let (category, score) = match hint.and_then(|h| h.category) {
            Some(hinted) => {
                let score = scores
                    .iter()
                    .find(|(c, _)| *c == hinted)
                    .map_or(0.0, |(_, s)| *s);
                (hinted, score)
            }
            None => select_category(&scores),
        };

        let (tags, inferred_domain) = domain_signals(content);
        let domain = hint.and_then(|h| h.domain).unwrap_or(inferred_domain);

        Ok(Classification {
            category,
            confidence: confidence_for(score),
            tags,
            domain,
            score,
        })
    }
}

/// `min(0.9, 0.5 + 0.4 * score)`
pub fn confidence_for(score: f64) -> f64 {
    (BASE_CONFIDENCE + 0.4 * score).min(MAX_INFERRED_CONFIDENCE)
}

fn select_category(scores: &[(Category, f64)]) -> (Category, f64) {
    let best = scores.iter().map(|(_, s)| *s).fold(0.0_f64, f64::max);
    let complete_tie = scores.len() > 1 && scores.iter().all(|(_, s)| *s == best);
    if best == 0.0 || complete_tie {
        return (Category::Fact, best);
    }
    scores
        .iter()
        .find(|(_, s)| *s == best)
        .copied()
        .unwrap_or((Category::Fact, 0.0))
}

/// Scan signal families, returning tags and the inferred domain.
fn domain_signals(content: &str) -> (Vec<String>, Domain) {
    let mut tags = BTreeSet::new();

    if TEMPORAL_PATTERN.is_match(content) {
        tags.insert("temporal".to_string());
    }

    let technology = TECHNOLOGY_PATTERN.is_match(content);
    if technology {
        tags.insert("technology".to_string());
        for m in TECHNOLOGY_PATTERN.find_iter(content) {
            tags.insert(format!("tech:{}", m.as_str().to_lowercase()));
        }
    }

    let project = PROJECT_PATTERN.is_match(content);
    if project {
        tags.insert("project".to_string());
    }

    let personal = PERSONAL_PATTERN.is_match(content);
    if personal {
        tags.insert("personal".to_string());
    }

    let domain = match (technology, personal, project) {
        (false, false, false) => Domain::Operational,
        (true, false, false) => Domain::Technical,
        (false, true, false) => Domain::Personal,
        (false, false, true) => Domain::Operational,
        _ => Domain::CrossDomain,
    };

    (tags.into_iter().collect(), domain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_configuration_content_is_fact() {
        let classifier = Classifier::new();
        let result = classifier
            .classify("Session configuration: duration 60min, weekly", None)
            .unwrap();
        assert_eq!(result.category, Category::Fact);
        assert!(result.confidence > BASE_CONFIDENCE);
        assert!(result.tags.contains(&"temporal".to_string()));
    }

    #[test]
    fn test_preference_is_memory() {
        let classifier = Classifier::new();
        let result = classifier
            .classify("Client prefers morning coaching sessions", None)
            .unwrap();
        assert_eq!(result.category, Category::ExperientialMemory);
        assert_eq!(result.domain, Domain::Personal);
    }

    #[test]
    fn test_no_match_defaults_to_fact() {
        let classifier = Classifier::new();
        let result = classifier.classify("zxqv", None).unwrap();
        assert_eq!(result.category, Category::Fact);
        assert_eq!(result.confidence, BASE_CONFIDENCE);
        assert_eq!(result.domain, Domain::Operational);
        assert!(result.tags.is_empty());
    }

    #[test]
    fn test_empty_content_rejected() {
        let classifier = Classifier::new();
        assert!(matches!(
            classifier.classify("   \n", None),
            Err(Error::InvalidContent(_))
        ));
    }

    #[test]
    fn test_confidence_formula_capped() {
        assert_eq!(confidence_for(0.0), 0.5);
        assert!((confidence_for(0.5) - 0.7).abs() < 1e-9);
        assert_eq!(confidence_for(1.0), 0.9);
    }

    #[test]
    fn test_hint_overrides_category_and_domain() {
        let classifier = Classifier::new();
        let hint = ClassifyHint::category(Category::Procedure).with_domain(Domain::Technical);
        let result = classifier
            .classify("Client prefers morning coaching sessions", Some(&hint))
            .unwrap();
        assert_eq!(result.category, Category::Procedure);
        assert_eq!(result.domain, Domain::Technical);
        assert_eq!(result.confidence, BASE_CONFIDENCE);
    }

    #[test]
    fn test_tie_breaks_by_declaration_order() {
        let specs = vec![
            CategoryRuleSpec::new(Category::Insight, r"alpha"),
            CategoryRuleSpec::new(Category::Relation, r"alpha"),
            CategoryRuleSpec::new(Category::Fact, r"never-matches"),
        ];
        let classifier = Classifier::from_specs(&specs).unwrap();
        let result = classifier.classify("alpha", None).unwrap();
        assert_eq!(result.category, Category::Insight);
        assert_eq!(result.confidence, 0.9);
    }

    #[test]
    fn test_complete_tie_defaults_to_fact() {
        let specs = vec![
            CategoryRuleSpec::new(Category::Insight, r"alpha"),
            CategoryRuleSpec::new(Category::Relation, r"alpha"),
        ];
        let classifier = Classifier::from_specs(&specs).unwrap();
        let result = classifier.classify("alpha", None).unwrap();
        assert_eq!(result.category, Category::Fact);
    }

    #[test]
    fn test_invalid_pattern_is_config_error() {
        let specs = vec![CategoryRuleSpec::new(Category::Fact, r"(unclosed")];
        assert!(matches!(
            Classifier::from_specs(&specs),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_technology_tags_and_domain() {
        let classifier = Classifier::new();
        let result = classifier
            .classify("OAuth token refresh fails against the API server", None)
            .unwrap();
        assert_eq!(result.domain, Domain::Technical);
        assert!(result.tags.contains(&"technology".to_string()));
        assert!(result.tags.contains(&"tech:oauth".to_string()));
        assert!(result.tags.contains(&"tech:api".to_string()));
    }

    #[test]
    fn test_mixed_families_are_cross_domain() {
        let classifier = Classifier::new();
        let result = classifier
            .classify("My family calendar sync uses the Google API", None)
            .unwrap();
        assert_eq!(result.domain, Domain::CrossDomain);
    }

    #[test]
    fn test_relation_indicator() {
        assert!(indicates_relation("Billing service depends on the auth service"));
        assert!(indicates_relation("team-a -> team-b"));
        assert!(!indicates_relation("Session configuration: duration 60min"));
    }

    #[test]
    fn test_rule_spec_json_roundtrip_table() {
        let json = r#"[{"category": "procedure", "pattern": "(?i)step \\d+"}]"#;
        let specs: Vec<CategoryRuleSpec> = serde_json::from_str(json).unwrap();
        let classifier = Classifier::from_specs(&specs).unwrap();
        let result = classifier.classify("Step 1: open the panel", None).unwrap();
        assert_eq!(result.category, Category::Procedure);
    }
}
