//! C6 — Ranker (§4.6).
//!
//! New logic implementing the specification's weighted scoring model
//! directly; memoization reuses `core::cache::QueryCache` (DESIGN.md),
//! keyed by a hash of the candidate's scoring inputs rather than a matcher
//! query fingerprint.

use std::collections::BTreeSet;

use crate::cache::{fingerprint, CacheValue, QueryCache};
use crate::types::{
    Candidate, DuplicateGroup, EffortLevel, Enrichment, RiskLevel, ScoreComponents, Strategy, VariationPlan,
};

const WEIGHT_SAVINGS: f64 = 0.40;
const WEIGHT_COMPLEXITY: f64 = 0.20;
const WEIGHT_RISK: f64 = 0.25;
const WEIGHT_EFFORT: f64 = 0.15;

pub struct Ranker<'a> {
    cache: &'a QueryCache,
}

impl<'a> Ranker<'a> {
    /// Borrows the cache rather than owning it: callers hold the
    /// process-wide cache (§5/§9: one instance per process) and pass it by
    /// reference instead of a fresh cache being constructed per call.
    pub fn new(cache: &'a QueryCache) -> Self {
        Self { cache }
    }

    /// `rank(candidates, max?) -> sorted candidates with score`. Full sort,
    /// then truncate (§4.6 early-exit note).
    pub fn rank(&self, groups: Vec<(DuplicateGroup, VariationPlan, Option<Enrichment>)>, max: Option<usize>) -> Vec<Candidate> {
        let mut candidates: Vec<Candidate> = groups
            .into_iter()
            .map(|(group, plan, enrichment)| self.score_one(group, plan, enrichment))
            .collect();

        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.estimated_savings_lines.cmp(&a.estimated_savings_lines))
                .then_with(|| a.group.files_touched().cmp(&b.group.files_touched()))
                .then_with(|| {
                    let ra = a.group.representative().map(|m| m.file_path.clone()).unwrap_or_default();
                    let rb = b.group.representative().map(|m| m.file_path.clone()).unwrap_or_default();
                    ra.cmp(&rb)
                })
        });

        if let Some(max) = max {
            candidates.truncate(max);
        }
        candidates
    }

    fn score_one(&self, group: DuplicateGroup, plan: VariationPlan, enrichment: Option<Enrichment>) -> Candidate {
        let key = memo_key(&group, &plan, enrichment.as_ref());
        let (score, components) = match self.cache.get(&key) {
            Some(CacheValue::Text(serialized)) => serde_json::from_str(&serialized).unwrap_or_else(|_| compute_score(&group, &plan, enrichment.as_ref())),
            _ => {
                let computed = compute_score(&group, &plan, enrichment.as_ref());
                if let Ok(serialized) = serde_json::to_string(&computed) {
                    self.cache.put(&key, CacheValue::Text(serialized));
                }
                computed
            }
        };

        let lines_saved = (group.instance_count() as u32 - 1) * group.line_count();
        let strategy = if plan.is_parameterizable() { Strategy::ExtractFunction } else { Strategy::Template };
        let risk_level = risk_level_from_factor(risk_factor(&group, &plan, enrichment.as_ref()));
        let effort_level = effort_level_from_files(group.files_touched());

        Candidate {
            group,
            score,
            score_components: components,
            plan,
            strategy,
            estimated_savings_lines: lines_saved,
            risk_level,
            effort_level,
        }
    }
}

fn memo_key(group: &DuplicateGroup, plan: &VariationPlan, enrichment: Option<&Enrichment>) -> String {
    let files: BTreeSet<String> = group.instances.iter().map(|i| i.matched.file_path.to_string_lossy().to_string()).collect();
    let has_coverage = enrichment.and_then(|e| e.test_coverage.as_ref()).map(|c| c.covered).unwrap_or(false);
    let opts = std::collections::BTreeMap::from([
        ("instance_count".to_string(), group.instance_count().to_string()),
        ("line_count".to_string(), group.line_count().to_string()),
        ("plan_complexity".to_string(), plan.complexity().to_string()),
        ("files".to_string(), files.into_iter().collect::<Vec<_>>().join(",")),
        ("has_coverage".to_string(), has_coverage.to_string()),
    ]);
    fingerprint("rank", "", "", std::path::Path::new("."), &opts)
}

fn compute_score(group: &DuplicateGroup, plan: &VariationPlan, enrichment: Option<&Enrichment>) -> (f64, ScoreComponents) {
    let lines_saved = (group.instance_count() as u32 - 1) * group.line_count();
    let savings = (lines_saved as f64 / 100.0).min(1.0);
    let complexity = 1.0 - (plan.complexity() as f64 / 10.0).min(1.0);
    let risk = 1.0 - risk_factor(group, plan, enrichment);
    let effort = 1.0 - (group.files_touched() as f64 / 10.0).min(1.0);

    let score = WEIGHT_SAVINGS * savings + WEIGHT_COMPLEXITY * complexity + WEIGHT_RISK * risk + WEIGHT_EFFORT * effort;
    (score, ScoreComponents { savings, complexity, risk, effort })
}

/// `risk_factor ∈ {0.1 low, 0.3 medium, 0.6 high}` (§4.6), derived from
/// import variations, distinct files touched, and absence of test coverage.
fn risk_factor(group: &DuplicateGroup, plan: &VariationPlan, enrichment: Option<&Enrichment>) -> f64 {
    let has_import_variation = plan.structural_variations.iter().any(|v| v.kind == crate::types::VariationKind::Import);
    let files_touched = group.files_touched();
    let has_coverage = enrichment.and_then(|e| e.test_coverage.as_ref()).map(|c| c.covered).unwrap_or(false);

    let mut points = 0;
    if has_import_variation {
        points += 1;
    }
    if files_touched > 3 {
        points += 1;
    }
    if !has_coverage {
        points += 1;
    }

    match points {
        0 => 0.1,
        1 => 0.3,
        _ => 0.6,
    }
}

fn risk_level_from_factor(factor: f64) -> RiskLevel {
    if factor <= 0.1 {
        RiskLevel::Low
    } else if factor <= 0.3 {
        RiskLevel::Medium
    } else {
        RiskLevel::High
    }
}

fn effort_level_from_files(files_touched: usize) -> EffortLevel {
    match files_touched {
        0..=2 => EffortLevel::Low,
        3..=5 => EffortLevel::Medium,
        _ => EffortLevel::High,
    }
}
