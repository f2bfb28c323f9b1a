//! Data model (§3): the entities shared across every pipeline stage.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Produced by the executor; immutable. `1 <= start_line <= end_line`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Match {
    pub file_path: PathBuf,
    pub start_line: u32,
    pub end_line: u32,
    pub text: String,
    pub language: String,
}

impl Match {
    pub fn line_count(&self) -> u32 {
        self.end_line.saturating_sub(self.start_line) + 1
    }
}

/// A [`Match`] plus its normalized hash. Two instances with equal
/// `normalized_hash` are members of the same raw group.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateInstance {
    pub matched: Match,
    pub normalized_hash: String,
}

/// A set of >=2 [`DuplicateInstance`]s sharing a hash (or merged by
/// similarity; §4.4).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DuplicateGroup {
    pub instances: Vec<DuplicateInstance>,
}

impl DuplicateGroup {
    pub fn line_count(&self) -> u32 {
        self.instances.first().map(|i| i.matched.line_count()).unwrap_or(0)
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    /// Canonical representative: lexicographically smallest `(file_path, start_line)`.
    pub fn representative(&self) -> Option<&Match> {
        self.instances
            .iter()
            .map(|i| &i.matched)
            .min_by(|a, b| (&a.file_path, a.start_line).cmp(&(&b.file_path, b.start_line)))
    }

    pub fn files_touched(&self) -> usize {
        let mut files: Vec<&PathBuf> = self.instances.iter().map(|i| &i.matched.file_path).collect();
        files.sort();
        files.dedup();
        files.len()
    }
}

/// `kind` of a parameterizable or non-parameterizable difference between
/// instances in a group (§3).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariationKind {
    Literal,
    Identifier,
    Expression,
    Conditional,
    Import,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StructuralVariation {
    pub kind: VariationKind,
    pub severity: Severity,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InferredType {
    Integer,
    Float,
    String,
    Boolean,
    Any,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParameterSlot {
    pub name: String,
    pub inferred_type: InferredType,
    pub default: Option<String>,
    pub sample_values: Vec<String>,
}

/// Between a group's instances: the parameterization plan (§3/§4.5).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VariationPlan {
    pub parameter_slots: Vec<ParameterSlot>,
    pub structural_variations: Vec<StructuralVariation>,
}

impl VariationPlan {
    /// A plan is parameterizable iff all variations are of kind
    /// literal/identifier/expression (§3) — equivalently, it has no
    /// `conditional` structural variation (§4.5).
    pub fn is_parameterizable(&self) -> bool {
        !self
            .structural_variations
            .iter()
            .any(|v| v.kind == VariationKind::Conditional)
    }

    pub fn complexity(&self) -> u32 {
        (self.parameter_slots.len() + self.structural_variations.len()) as u32
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    ExtractFunction,
    ExtractMethod,
    ExtractClass,
    Template,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffortLevel {
    Low,
    Medium,
    High,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreComponents {
    pub savings: f64,
    pub complexity: f64,
    pub risk: f64,
    pub effort: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub group: DuplicateGroup,
    pub score: f64,
    pub score_components: ScoreComponents,
    pub plan: VariationPlan,
    pub strategy: Strategy,
    pub estimated_savings_lines: u32,
    pub risk_level: RiskLevel,
    pub effort_level: EffortLevel,
}

/// Test coverage info attached to a candidate by the enrichment orchestrator.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TestCoverage {
    pub covered: bool,
    pub coverage_ratio: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Impact {
    pub files_touched: usize,
    pub callers_estimate: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub summary: String,
    pub confidence: f64,
}

/// Layered onto a [`Candidate`]. Each field may be absent (substep failed or
/// was skipped) and carries an `error` in that case (§3/§4.7).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Enrichment {
    pub test_coverage: Option<TestCoverage>,
    pub test_coverage_error: Option<String>,
    pub impact: Option<Impact>,
    pub impact_error: Option<String>,
    pub recommendation: Option<Recommendation>,
    pub recommendation_error: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EnrichedCandidate {
    pub candidate: Candidate,
    pub enrichment: Enrichment,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BackupManifestEntry {
    pub relative_path: PathBuf,
    pub sha256: String,
    pub size: u64,
    pub original_mode: u32,
}

/// `backup_id` is unique and monotonically ordered by `created_at` (§3).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BackupManifest {
    pub backup_id: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub entries: Vec<BackupManifestEntry>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    Applied,
    RolledBack,
    DryRun,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FileDiff {
    pub file: PathBuf,
    pub unified_diff: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApplicationReport {
    pub status: ApplicationStatus,
    pub backup_id: Option<String>,
    pub files_changed: Vec<PathBuf>,
    pub diffs: Vec<FileDiff>,
    pub validation_errors: Vec<crate::error::ValidationDiagnostic>,
}
