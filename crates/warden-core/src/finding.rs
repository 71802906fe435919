//! Findings and their enrichment blocks.
//!
//! A [`Finding`] is the unit of reportable output: one is accumulated per
//! playbook run and handed to every sink the run is routed to.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::EngineError;

/// Severity of a finding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FindingSeverity {
    /// Debug output, usually filtered by sinks.
    Debug,
    /// Informational.
    #[default]
    Info,
    /// Low priority issue.
    Low,
    /// Medium priority issue.
    Medium,
    /// High priority issue.
    High,
}

impl FindingSeverity {
    /// Returns the severity as an upper-case string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
        }
    }

    /// Returns the emoji used by text renderers.
    #[must_use]
    pub const fn emoji(&self) -> &'static str {
        match self {
            Self::Debug => "🔵",
            Self::Info => "⚪",
            Self::Low => "🟡",
            Self::Medium => "🟠",
            Self::High => "🔴",
        }
    }
}

impl fmt::Display for FindingSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FindingSeverity {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "DEBUG" => Ok(Self::Debug),
            "INFO" => Ok(Self::Info),
            "LOW" => Ok(Self::Low),
            "MEDIUM" => Ok(Self::Medium),
            "HIGH" => Ok(Self::High),
            other => Err(EngineError::config(format!("unknown severity '{other}'"))),
        }
    }
}

/// Where a finding originated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingSource {
    /// Unknown or not set.
    #[default]
    None,
    /// A Kubernetes resource change.
    KubernetesApiServer,
    /// A Prometheus alert.
    Prometheus,
    /// A manual trigger or external action call.
    Manual,
    /// A scheduled timer.
    Scheduler,
    /// A log line.
    Log,
}

impl FindingSource {
    /// Returns the source as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::KubernetesApiServer => "kubernetes_api_server",
            Self::Prometheus => "prometheus",
            Self::Manual => "manual",
            Self::Scheduler => "scheduler",
            Self::Log => "log",
        }
    }
}

/// Broad category of a finding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingType {
    /// Something is wrong.
    #[default]
    Issue,
    /// A configuration change.
    ConfigurationChange,
    /// A periodic health check result.
    HealthCheck,
    /// A requested report.
    Report,
}

impl FindingType {
    /// Returns the type as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Issue => "issue",
            Self::ConfigurationChange => "configuration_change",
            Self::HealthCheck => "health_check",
            Self::Report => "report",
        }
    }
}

/// The resource a finding is about.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FindingSubject {
    /// Resource name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Resource namespace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Resource kind (`Pod`, `Deployment`, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Node the resource runs on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
}

impl FindingSubject {
    /// Returns a `kind/namespace/name` identity string; missing parts are empty.
    #[must_use]
    pub fn identity(&self) -> String {
        format!(
            "{}/{}/{}",
            self.kind.as_deref().unwrap_or_default(),
            self.namespace.as_deref().unwrap_or_default(),
            self.name.as_deref().unwrap_or_default()
        )
    }
}

/// A typed unit of finding content.
///
/// Unknown block types deserialize to [`Block::Unknown`] so sinks can skip
/// them instead of failing delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    /// Markdown text.
    Markdown {
        /// The text.
        text: String,
    },
    /// A table with a header row.
    Table {
        /// Optional table name.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        /// Column headers.
        headers: Vec<String>,
        /// Rows, each the same width as `headers`.
        rows: Vec<Vec<String>>,
    },
    /// A file attachment.
    File {
        /// File name.
        filename: String,
        /// File contents.
        contents: String,
    },
    /// A graph, as an opaque payload for sinks that can render it.
    Graph {
        /// Graph title.
        title: String,
        /// Data points as `(x, y)` pairs.
        points: Vec<(f64, f64)>,
    },
    /// A button that runs a registered callback.
    Callback {
        /// Button label.
        text: String,
        /// Opaque callback id.
        callback_id: String,
    },
    /// A block type this build does not know about.
    #[serde(other)]
    Unknown,
}

impl Block {
    /// Creates a markdown block.
    #[must_use]
    pub fn markdown(text: impl Into<String>) -> Self {
        Self::Markdown { text: text.into() }
    }

    /// Creates a table block.
    #[must_use]
    pub fn table(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self::Table {
            name: None,
            headers,
            rows,
        }
    }
}

/// A group of blocks added to a finding together.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Enrichment {
    /// The blocks.
    pub blocks: Vec<Block>,
    /// Rendering hints for specific sinks.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    /// Optional section title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl Enrichment {
    /// Creates an enrichment from blocks.
    #[must_use]
    pub fn new(blocks: Vec<Block>) -> Self {
        Self {
            blocks,
            annotations: BTreeMap::new(),
            title: None,
        }
    }

    /// Sets the title.
    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Adds an annotation.
    #[must_use]
    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }
}

/// The accumulated result of one playbook run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    /// Unique id of this finding instance.
    pub id: Uuid,
    /// Short title.
    pub title: String,
    /// Longer description.
    #[serde(default)]
    pub description: String,
    /// Severity.
    #[serde(default)]
    pub severity: FindingSeverity,
    /// Category.
    #[serde(default)]
    pub finding_type: FindingType,
    /// Origin.
    #[serde(default)]
    pub source: FindingSource,
    /// Cross-time identity used by sinks to group and deduplicate.
    pub aggregation_key: String,
    /// The affected resource.
    #[serde(default)]
    pub subject: FindingSubject,
    /// Ordered enrichment blocks.
    #[serde(default)]
    pub enrichments: Vec<Enrichment>,
    /// When the finding was created.
    pub created_at: DateTime<Utc>,
}

impl Finding {
    /// Creates a new finding.
    #[must_use]
    pub fn new(title: impl Into<String>, aggregation_key: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            description: String::new(),
            severity: FindingSeverity::default(),
            finding_type: FindingType::default(),
            source: FindingSource::default(),
            aggregation_key: aggregation_key.into(),
            subject: FindingSubject::default(),
            enrichments: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Sets the severity.
    #[must_use]
    pub const fn with_severity(mut self, severity: FindingSeverity) -> Self {
        self.severity = severity;
        self
    }

    /// Sets the source.
    #[must_use]
    pub const fn with_source(mut self, source: FindingSource) -> Self {
        self.source = source;
        self
    }

    /// Sets the subject.
    #[must_use]
    pub fn with_subject(mut self, subject: FindingSubject) -> Self {
        self.subject = subject;
        self
    }

    /// Appends an enrichment.
    pub fn add_enrichment(&mut self, enrichment: Enrichment) {
        self.enrichments.push(enrichment);
    }

    /// Returns the ids carried by callback blocks, in block order.
    pub fn callback_ids(&self) -> impl Iterator<Item = &str> {
        self.enrichments
            .iter()
            .flat_map(|e| &e.blocks)
            .filter_map(|block| match block {
                Block::Callback { callback_id, .. } => Some(callback_id.as_str()),
                _ => None,
            })
    }

    /// Returns the identity used for deduplication: aggregation key plus subject.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let input = format!("{}|{}", self.aggregation_key, self.subject.identity());
        blake3::hash(input.as_bytes()).to_hex().to_string()
    }

    /// Returns the value of a matchable attribute, used by sink filters.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<String> {
        match name {
            "title" => Some(self.title.clone()),
            "severity" => Some(self.severity.as_str().to_string()),
            "source" => Some(self.source.as_str().to_string()),
            "finding_type" => Some(self.finding_type.as_str().to_string()),
            "aggregation_key" => Some(self.aggregation_key.clone()),
            "name" => Some(self.subject.name.clone().unwrap_or_default()),
            "namespace" => Some(self.subject.namespace.clone().unwrap_or_default()),
            "kind" => Some(self.subject.kind.clone().unwrap_or_default()),
            "node" => Some(self.subject.node.clone().unwrap_or_default()),
            _ => None,
        }
    }

    /// Names accepted by [`Finding::attribute`].
    pub const ATTRIBUTES: &'static [&'static str] = &[
        "title",
        "severity",
        "source",
        "finding_type",
        "aggregation_key",
        "name",
        "namespace",
        "kind",
        "node",
    ];
}
