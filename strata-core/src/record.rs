//! Knowledge records and their classification enums.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Unique identifier for a knowledge record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordId(pub Uuid);

impl RecordId {
    /// Generate a fresh identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse an identifier from its string form.
    pub fn parse(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| Error::Internal(format!("invalid record id {s:?}: {e}")))
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Content category, the closed set the classifier chooses from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    /// Something that happened or was observed about a person or situation
    #[serde(alias = "memory")]
    ExperientialMemory,
    /// A realization or lesson drawn from experience
    Insight,
    /// A recurring behavior or regularity
    Pattern,
    /// A connection between entities
    Relation,
    /// A plain statement of fact or configuration
    Fact,
    /// Step-by-step instructions
    Procedure,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::ExperientialMemory,
        Category::Insight,
        Category::Pattern,
        Category::Relation,
        Category::Fact,
        Category::Procedure,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::ExperientialMemory => "experiential-memory",
            Category::Insight => "insight",
            Category::Pattern => "pattern",
            Category::Relation => "relation",
            Category::Fact => "fact",
            Category::Procedure => "procedure",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "experiential-memory" | "experiential_memory" | "memory" => {
                Ok(Category::ExperientialMemory)
            }
            "insight" => Ok(Category::Insight),
            "pattern" => Ok(Category::Pattern),
            "relation" | "relationship" => Ok(Category::Relation),
            "fact" => Ok(Category::Fact),
            "procedure" => Ok(Category::Procedure),
            other => Err(Error::config(format!("unknown category: {other}"))),
        }
    }
}

/// Knowledge domain; influences routing and cache aggressiveness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Domain {
    Operational,
    Personal,
    Technical,
    CrossDomain,
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Operational => "operational",
            Domain::Personal => "personal",
            Domain::Technical => "technical",
            Domain::CrossDomain => "cross-domain",
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Domain {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "operational" => Ok(Domain::Operational),
            "personal" => Ok(Domain::Personal),
            "technical" => Ok(Domain::Technical),
            "cross-domain" | "cross_domain" => Ok(Domain::CrossDomain),
            other => Err(Error::config(format!("unknown domain: {other}"))),
        }
    }
}

/// Directed, weighted edge to another record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub target_id: String,
    pub relation_type: String,
    /// Always within [0, 1]
    pub strength: f64,
}

impl Link {
    pub fn new(target_id: impl Into<String>, relation_type: impl Into<String>, strength: f64) -> Self {
        Self {
            target_id: target_id.into(),
            relation_type: relation_type.into(),
            strength: clamp_unit(strength),
        }
    }
}

/// The unit of storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeRecord {
    pub id: RecordId,
    pub content: String,
    pub category: Category,
    pub domain: Domain,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(default)]
    pub attributes: HashMap<String, Value>,
    pub created_at: DateTime<Utc>,
    pub confidence: f64,
    #[serde(default)]
    pub links: Vec<Link>,
}

impl KnowledgeRecord {
    /// Create a record with a fresh id and creation timestamp.
    pub fn new(content: impl Into<String>, category: Category, domain: Domain) -> Self {
        Self {
            id: RecordId::new(),
            content: content.into(),
            category,
            domain,
            owner_id: None,
            group_id: None,
            attributes: HashMap::new(),
            created_at: Utc::now(),
            confidence: 0.5,
            links: Vec::new(),
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = clamp_unit(confidence);
        self
    }

    pub fn with_owner(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = Some(owner_id.into());
        self
    }

    pub fn with_group(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    pub fn with_link(mut self, link: Link) -> Self {
        self.links.push(link);
        self
    }

    /// Tags recorded under the `tags` attribute.
    pub fn tags(&self) -> Vec<String> {
        self.attributes
            .get("tags")
            .and_then(Value::as_array)
            .map(|tags| {
                tags.iter()
                    .filter_map(|t| t.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Clamp a score into [0, 1], mapping NaN to 0.
pub(crate) fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
