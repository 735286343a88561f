use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// 回應內容的實際格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadFormat {
    Json,
    Atom,
    Xml,
    Other,
}

impl PayloadFormat {
    pub fn is_xml_family(&self) -> bool {
        matches!(self, PayloadFormat::Atom | PayloadFormat::Xml)
    }
}

/// 驗證請求希望取得的格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestedFormat {
    Json,
    Atom,
    Xml,
    #[default]
    Any,
}

impl std::str::FromStr for RequestedFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "atom" => Ok(Self::Atom),
            "xml" => Ok(Self::Xml),
            "any" | "" => Ok(Self::Any),
            other => Err(format!("unknown format '{}' (expected json, atom, xml or any)", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadType {
    ServiceDocument,
    Metadata,
    Feed,
    Entry,
    Property,
    RawValue,
    EntityReference,
    Error,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ODataVersion {
    V3,
    V4,
}

impl std::fmt::Display for ODataVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ODataVersion::V3 => write!(f, "3.0"),
            ODataVersion::V4 => write!(f, "4.0"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequirementLevel {
    Must,
    MustNot,
    Should,
    ShouldNot,
    May,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleCategory {
    Core,
    Metadata,
    ServiceImpl,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Error,
    Warning,
    Recommendation,
    NotApplicable,
    Aborted,
}

impl Outcome {
    /// 依規則的需求等級決定失敗時的結果
    pub fn for_failure(level: RequirementLevel) -> Self {
        match level {
            RequirementLevel::Must | RequirementLevel::MustNot => Outcome::Error,
            RequirementLevel::Should | RequirementLevel::ShouldNot => Outcome::Warning,
            RequirementLevel::May => Outcome::Recommendation,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Error => "error",
            Outcome::Warning => "warning",
            Outcome::Recommendation => "recommendation",
            Outcome::NotApplicable => "not_applicable",
            Outcome::Aborted => "aborted",
        }
    }
}

impl std::str::FromStr for Outcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Outcome::Success),
            "error" => Ok(Outcome::Error),
            "warning" => Ok(Outcome::Warning),
            "recommendation" => Ok(Outcome::Recommendation),
            "not_applicable" => Ok(Outcome::NotApplicable),
            "aborted" => Ok(Outcome::Aborted),
            other => Err(format!("unknown outcome '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleResult {
    pub rule_name: String,
    pub spec_section: String,
    pub requirement_level: RequirementLevel,
    pub category: RuleCategory,
    pub outcome: Outcome,
    pub description: String,
    pub details: Vec<String>,
    pub target_uri: String,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationRequest {
    pub uri: String,
    #[serde(default)]
    pub format: RequestedFormat,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub rules: Vec<String>,
}

impl ValidationRequest {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            format: RequestedFormat::Any,
            headers: BTreeMap::new(),
            rules: Vec::new(),
        }
    }

    pub fn with_format(mut self, format: RequestedFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Complete,
    Failed,
}

impl JobStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, JobStatus::Complete | JobStatus::Failed)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSummary {
    pub total: usize,
    pub success: usize,
    pub error: usize,
    pub warning: usize,
    pub recommendation: usize,
    pub not_applicable: usize,
    pub aborted: usize,
}

impl JobSummary {
    pub fn record(&mut self, outcome: Outcome) {
        self.total += 1;
        match outcome {
            Outcome::Success => self.success += 1,
            Outcome::Error => self.error += 1,
            Outcome::Warning => self.warning += 1,
            Outcome::Recommendation => self.recommendation += 1,
            Outcome::NotApplicable => self.not_applicable += 1,
            Outcome::Aborted => self.aborted += 1,
        }
    }

    pub fn from_results(results: &[RuleResult]) -> Self {
        let mut summary = Self::default();
        for result in results {
            summary.record(result.outcome);
        }
        summary
    }

    pub fn has_errors(&self) -> bool {
        self.error > 0 || self.aborted > 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: Uuid,
    pub request: ValidationRequest,
    pub status: JobStatus,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub payload_type: Option<PayloadType>,
    pub version: Option<ODataVersion>,
    pub summary: Option<JobSummary>,
    pub error: Option<String>,
}

impl JobRecord {
    pub fn queued(request: ValidationRequest) -> Self {
        Self {
            id: Uuid::new_v4(),
            request,
            status: JobStatus::Queued,
            submitted_at: Utc::now(),
            started_at: None,
            completed_at: None,
            payload_type: None,
            version: None,
            summary: None,
            error: None,
        }
    }

    pub fn mark_running(&mut self) {
        self.status = JobStatus::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn mark_complete(&mut self, outcome: JobOutcome) {
        self.status = JobStatus::Complete;
        self.completed_at = Some(Utc::now());
        self.payload_type = Some(outcome.payload_type);
        self.version = Some(outcome.version);
        self.summary = Some(outcome.summary);
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = JobStatus::Failed;
        self.completed_at = Some(Utc::now());
        self.error = Some(error.into());
    }
}

/// 一次驗證執行完成後回報給 worker 的資訊
#[derive(Debug, Clone, PartialEq)]
pub struct JobOutcome {
    pub payload_type: PayloadType,
    pub version: ODataVersion,
    pub summary: JobSummary,
}
