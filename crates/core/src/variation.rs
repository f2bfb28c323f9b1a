//! C5 — Variation Analyzer (§4.5).
//!
//! New logic built from the specification's alignment-walk description,
//! using `core::lcs::align` over `core::lexer` token streams as its core
//! primitive.

use std::collections::HashMap;

use crate::lcs::{align, AlignStep};
use crate::lexer::{tokenize, Token};
use crate::types::{
    DuplicateGroup, InferredType, ParameterSlot, Severity, StructuralVariation, VariationKind, VariationPlan,
};

pub struct VariationAnalyzer;

impl VariationAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// `analyze(group) -> VariationPlan`.
    pub fn analyze(&self, group: &DuplicateGroup) -> VariationPlan {
        let Some((baseline, peers)) = group.instances.split_first() else {
            return VariationPlan { parameter_slots: Vec::new(), structural_variations: Vec::new() };
        };

        let baseline_tokens = tokenize(&baseline.matched.text);
        let baseline_normalized: Vec<String> = baseline_tokens.iter().map(|t| t.normalized().to_string()).collect();
        let declaration_name_index = declaration_name_index(&baseline_tokens);

        // slot_key identifies a position in the baseline's normalized stream
        // that is a candidate parameter slot; samples accumulate the actual
        // text seen there across peers (plus the baseline itself).
        let mut slot_samples: HashMap<usize, Vec<String>> = HashMap::new();
        let mut slot_kind: HashMap<usize, VariationKind> = HashMap::new();
        let mut structural_variations = Vec::new();

        for peer in peers {
            let peer_tokens = tokenize(&peer.matched.text);
            let peer_normalized: Vec<String> = peer_tokens.iter().map(|t| t.normalized().to_string()).collect();
            let steps = align(&baseline_normalized, &peer_normalized);

            let mut run_tokens: Vec<&Token> = Vec::new();

            for step in &steps {
                match *step {
                    AlignStep::Match(bi, pi) => {
                        flush_structural_run(&mut run_tokens, &baseline.matched.language, &mut structural_variations);
                        let (bt, pt) = (&baseline_tokens[bi], &peer_tokens[pi]);
                        if Some(bi) == declaration_name_index {
                            // The construct's own declared name (e.g. the
                            // function name after `def`) is discarded by C8's
                            // codegen, not substituted into it; it is never a
                            // parameter-slot candidate even when it differs.
                        } else if bt.is_identifier() && pt.is_identifier() && bt.text() != pt.text() {
                            record_sample(&mut slot_samples, &mut slot_kind, bi, bt.text(), pt.text(), VariationKind::Identifier);
                        } else if bt.is_literal() && pt.is_literal() && bt.text() != pt.text() {
                            let kind = if matches!(bt, Token::StringLiteral(_)) { VariationKind::Literal } else { VariationKind::Literal };
                            record_sample(&mut slot_samples, &mut slot_kind, bi, bt.text(), pt.text(), kind);
                        }
                    }
                    AlignStep::OnlyA(bi) => {
                        run_tokens.push(&baseline_tokens[bi]);
                    }
                    AlignStep::OnlyB(pi) => {
                        run_tokens.push(&peer_tokens[pi]);
                    }
                }
            }
            flush_structural_run(&mut run_tokens, &baseline.matched.language, &mut structural_variations);
        }

        let mut ordered_slots: Vec<(usize, Vec<String>)> = slot_samples.into_iter().collect();
        ordered_slots.sort_by_key(|(slot_idx, _)| *slot_idx);
        let parameter_slots = ordered_slots
            .into_iter()
            .enumerate()
            .map(|(order, (slot_idx, mut samples))| {
                samples.insert(0, baseline_tokens[slot_idx].text().to_string());
                build_slot(order, samples)
            })
            .collect();

        VariationPlan { parameter_slots, structural_variations }
    }
}

impl Default for VariationAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

/// Index of the identifier immediately following a `def`/`function`/`fn`/
/// `class` keyword: the construct's own name, excluded from parameter-slot
/// detection (§4.5; see S1 — two identically-bodied functions with
/// different names still produce zero parameter slots).
fn declaration_name_index(tokens: &[Token]) -> Option<usize> {
    for (idx, token) in tokens.iter().enumerate() {
        if let Token::Identifier(name) = token {
            if matches!(name.as_str(), "def" | "function" | "fn" | "class") {
                return tokens.get(idx + 1).map(|_| idx + 1);
            }
        }
    }
    None
}

fn record_sample(
    slot_samples: &mut HashMap<usize, Vec<String>>,
    slot_kind: &mut HashMap<usize, VariationKind>,
    baseline_idx: usize,
    _baseline_text: &str,
    peer_text: &str,
    kind: VariationKind,
) {
    slot_samples.entry(baseline_idx).or_default().push(peer_text.to_string());
    slot_kind.entry(baseline_idx).or_insert(kind);
}

/// A run of tokens present only on one side of the alignment is recorded as
/// a `conditional` structural variation once it ends (§4.5: "differing
/// substructures ... recorded as structural_variation of kind conditional").
/// Import-only runs — the run's own tokens form an import statement for the
/// instance's language — are recorded as kind `import` instead.
fn flush_structural_run(run_tokens: &mut Vec<&Token>, language: &str, out: &mut Vec<StructuralVariation>) {
    let run = run_tokens.len();
    if run >= 2 {
        let kind = if is_import_run(run_tokens, language) { VariationKind::Import } else { VariationKind::Conditional };
        out.push(StructuralVariation {
            kind,
            severity: if run > 6 { Severity::High } else if run > 3 { Severity::Medium } else { Severity::Low },
        });
    }
    run_tokens.clear();
}

/// Recognizes a run as an import statement by its leading keyword: Python's
/// `import ...` / `from ... import ...`, and the `import ...` form shared by
/// JavaScript, TypeScript, and Java (§4.5: "Import statements that appear in
/// some instances but not others are recorded as kind import").
fn is_import_run(run_tokens: &[&Token], language: &str) -> bool {
    let Some(Token::Identifier(first)) = run_tokens.first() else { return false };
    match language {
        "python" => first == "import" || first == "from",
        _ => first == "import",
    }
}

/// Parameter naming (§4.5): common prefix/suffix if any, else the most
/// frequent sample, else a generic `argN`.
fn build_slot(slot_idx: usize, samples: Vec<String>) -> ParameterSlot {
    let name = common_affix(&samples).unwrap_or_else(|| most_frequent(&samples).unwrap_or_else(|| format!("arg{slot_idx}")));
    let inferred_type = infer_common_type(&samples);
    ParameterSlot { name, inferred_type, default: None, sample_values: samples }
}

fn common_affix(samples: &[String]) -> Option<String> {
    if samples.len() < 2 {
        return None;
    }
    let prefix = samples.iter().fold(samples[0].clone(), |acc, s| common_prefix(&acc, s));
    if prefix.len() >= 2 {
        return Some(prefix);
    }
    None
}

fn common_prefix(a: &str, b: &str) -> String {
    a.chars().zip(b.chars()).take_while(|(x, y)| x == y).map(|(x, _)| x).collect()
}

fn most_frequent(samples: &[String]) -> Option<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for s in samples {
        *counts.entry(s.as_str()).or_insert(0) += 1;
    }
    counts.into_iter().max_by_key(|(_, count)| *count).map(|(s, _)| s.to_string())
}

fn infer_common_type(samples: &[String]) -> InferredType {
    let mut types: Vec<InferredType> = samples.iter().map(|s| infer_type(s)).collect();
    types.dedup();
    if types.len() == 1 {
        types[0]
    } else {
        InferredType::Any
    }
}

fn infer_type(sample: &str) -> InferredType {
    if sample.parse::<i64>().is_ok() {
        InferredType::Integer
    } else if sample.parse::<f64>().is_ok() {
        InferredType::Float
    } else if sample == "true" || sample == "false" {
        InferredType::Boolean
    } else if sample.starts_with('"') || sample.starts_with('\'') {
        InferredType::String
    } else {
        InferredType::Any
    }
}
