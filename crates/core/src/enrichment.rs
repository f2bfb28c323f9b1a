//! C7 — Enrichment Orchestrator (§4.7).
//!
//! Worker-pool timeout-race pattern grounded on `core::executor`'s
//! `tokio::time::timeout` usage around a long-running operation, generalized
//! here from "one child process" to "N concurrent async tasks bounded by a
//! `tokio::sync::Semaphore`".

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::error::Result;
use crate::types::{Candidate, EnrichedCandidate, Enrichment, Impact, Recommendation, TestCoverage};

pub type ProgressCallback<'a> = dyn FnMut(&str, f64) -> Result<()> + 'a;

#[derive(Clone, Debug)]
pub struct EnrichmentOpts {
    pub parallel: bool,
    pub max_workers: u32,
    pub timeout_per_candidate: Duration,
    pub include_test_coverage: bool,
    pub max_candidates: Option<usize>,
}

impl Default for EnrichmentOpts {
    fn default() -> Self {
        Self {
            parallel: true,
            max_workers: 4,
            timeout_per_candidate: Duration::from_secs(30),
            include_test_coverage: true,
            max_candidates: None,
        }
    }
}

pub struct EnrichmentOrchestrator {
    project_root: PathBuf,
}

impl EnrichmentOrchestrator {
    pub fn new(project_root: PathBuf) -> Self {
        Self { project_root }
    }

    /// `enrich(ranked_candidates, opts) -> EnrichedCandidates`. Stage
    /// progress boundaries per §4.7's table; the caller's `progress`
    /// callback is invoked synchronously from this (the caller's) thread,
    /// never from a worker.
    pub async fn enrich(
        &self,
        ranked_candidates: Vec<Candidate>,
        opts: &EnrichmentOpts,
        mut progress: Option<&mut ProgressCallback<'_>>,
    ) -> Result<Vec<EnrichedCandidate>> {
        report(&mut progress, "detect", 0.0)?;
        report(&mut progress, "rank", 0.25)?;
        report(&mut progress, "enrich_start", 0.40)?;

        let mut candidates = ranked_candidates;
        if let Some(max) = opts.max_candidates {
            candidates.truncate(max);
        }
        report(&mut progress, "select_top_n", 0.50)?;

        let project_root = Arc::new(self.project_root.clone());
        let results = if opts.parallel && candidates.len() > 1 {
            self.enrich_parallel(candidates, opts, project_root).await
        } else {
            self.enrich_sequential(candidates, opts, project_root).await
        };

        report(&mut progress, "test_coverage", 0.60)?;
        report(&mut progress, "test_coverage_done", 0.75)?;
        report(&mut progress, "recommendations", 0.85)?;
        report(&mut progress, "statistics", 0.90)?;
        report(&mut progress, "complete", 1.0)?;

        Ok(results)
    }

    async fn enrich_parallel(
        &self,
        candidates: Vec<Candidate>,
        opts: &EnrichmentOpts,
        project_root: Arc<PathBuf>,
    ) -> Vec<EnrichedCandidate> {
        let max_workers = opts.max_workers.clamp(1, 16) as usize;
        let semaphore = Arc::new(tokio::sync::Semaphore::new(max_workers));
        let timeout = opts.timeout_per_candidate.clamp(Duration::from_secs(1), Duration::from_secs(300));
        let include_test_coverage = opts.include_test_coverage;

        // Kept alongside each handle so a panicked worker still yields an
        // `EnrichedCandidate` (§4.7: failed candidates are still included in
        // the result, not dropped from the output).
        let mut handles = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let semaphore = semaphore.clone();
            let project_root = project_root.clone();
            let candidate_for_panic = candidate.clone();
            let handle = tokio::spawn(async move {
                let _permit = semaphore.acquire().await.expect("semaphore not closed");
                run_one(candidate, &project_root, include_test_coverage, timeout).await
            });
            handles.push((handle, candidate_for_panic));
        }

        // Drain every handle even if some failed: a worker panic must not
        // prevent the rest of the pool's results from being collected.
        let mut out = Vec::with_capacity(handles.len());
        for (handle, candidate_for_panic) in handles {
            match handle.await {
                Ok(enriched) => out.push(enriched),
                Err(join_error) => {
                    warn!(%join_error, "enrichment worker panicked, recording candidate with error fields");
                    out.push(EnrichedCandidate { candidate: candidate_for_panic, enrichment: panicked_enrichment(&join_error) });
                }
            }
        }
        out
    }

    async fn enrich_sequential(
        &self,
        candidates: Vec<Candidate>,
        opts: &EnrichmentOpts,
        project_root: Arc<PathBuf>,
    ) -> Vec<EnrichedCandidate> {
        let timeout = opts.timeout_per_candidate.clamp(Duration::from_secs(1), Duration::from_secs(300));
        let mut out = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            out.push(run_one(candidate, &project_root, opts.include_test_coverage, timeout).await);
        }
        out
    }
}

async fn run_one(
    candidate: Candidate,
    project_root: &Path,
    include_test_coverage: bool,
    timeout: Duration,
) -> EnrichedCandidate {
    let project_root = project_root.to_path_buf();
    let result = tokio::time::timeout(timeout, async {
        let test_coverage = if include_test_coverage {
            Some(compute_test_coverage(&project_root, &candidate))
        } else {
            None
        };
        let impact = compute_impact(&candidate);
        let recommendation = compute_recommendation(&candidate);
        (test_coverage, impact, recommendation)
    })
    .await;

    let enrichment = match result {
        Ok((test_coverage, impact, recommendation)) => Enrichment {
            test_coverage,
            test_coverage_error: None,
            impact: Some(impact),
            impact_error: None,
            recommendation: Some(recommendation),
            recommendation_error: None,
        },
        Err(_) => {
            warn!(timeout_ms = timeout.as_millis(), "enrichment timed out for candidate, abandoning");
            Enrichment {
                test_coverage: include_test_coverage.then(TestCoverage::default),
                test_coverage_error: include_test_coverage.then(|| "timed out".to_string()),
                impact: Some(Impact::default()),
                impact_error: Some("timed out".to_string()),
                recommendation: Some(Recommendation::default()),
                recommendation_error: Some("timed out".to_string()),
            }
        }
    };

    EnrichedCandidate { candidate, enrichment }
}

/// Mirrors the timeout path's error-populated `Enrichment` (§4.7): a panic is
/// a worker failure like any other and must not shrink the result below the
/// input count.
fn panicked_enrichment(join_error: &tokio::task::JoinError) -> Enrichment {
    let message = format!("enrichment worker panicked: {join_error}");
    Enrichment {
        test_coverage: None,
        test_coverage_error: Some(message.clone()),
        impact: Some(Impact::default()),
        impact_error: Some(message.clone()),
        recommendation: Some(Recommendation::default()),
        recommendation_error: Some(message),
    }
}

fn symbol_name(text: &str) -> Option<String> {
    let tokens = crate::lexer::tokenize(text);
    let mut saw_keyword = false;
    for token in &tokens {
        if let crate::lexer::Token::Identifier(name) = token {
            if saw_keyword {
                return Some(name.clone());
            }
            if matches!(name.as_str(), "def" | "function" | "fn" | "class") {
                saw_keyword = true;
            }
        }
    }
    None
}

fn compute_test_coverage(project_root: &Path, candidate: &Candidate) -> TestCoverage {
    let Some(representative) = candidate.group.representative() else {
        return TestCoverage::default();
    };
    let Some(name) = symbol_name(&representative.text) else {
        return TestCoverage::default();
    };

    let mut builder = ignore::WalkBuilder::new(project_root);
    builder.hidden(false);
    let mut test_files_seen = 0u32;
    let mut referencing_files = 0u32;
    for entry in builder.build() {
        let Ok(entry) = entry else { continue };
        if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            continue;
        }
        let file_name = entry.file_name().to_string_lossy().to_lowercase();
        if !(file_name.starts_with("test_") || file_name.ends_with("_test.py") || file_name.contains(".test.")) {
            continue;
        }
        test_files_seen += 1;
        if let Ok(contents) = std::fs::read_to_string(entry.path()) {
            if contents.contains(&name) {
                referencing_files += 1;
            }
        }
    }

    if test_files_seen == 0 {
        TestCoverage::default()
    } else {
        TestCoverage { covered: referencing_files > 0, coverage_ratio: referencing_files as f64 / test_files_seen as f64 }
    }
}

fn compute_impact(candidate: &Candidate) -> Impact {
    Impact {
        files_touched: candidate.group.files_touched(),
        callers_estimate: candidate.group.instance_count() as u32,
    }
}

fn compute_recommendation(candidate: &Candidate) -> Recommendation {
    let summary = match candidate.strategy {
        crate::types::Strategy::ExtractFunction => format!(
            "Extract a shared function: {} instances, ~{} lines saved",
            candidate.group.instance_count(),
            candidate.estimated_savings_lines
        ),
        crate::types::Strategy::Template => "Structural variation present; review before templating".to_string(),
        _ => "Review candidate manually".to_string(),
    };
    Recommendation { summary, confidence: candidate.score }
}

fn report(progress: &mut Option<&mut ProgressCallback<'_>>, stage: &str, fraction: f64) -> Result<()> {
    if let Some(callback) = progress.as_mut() {
        callback(stage, fraction)?;
    }
    Ok(())
}
