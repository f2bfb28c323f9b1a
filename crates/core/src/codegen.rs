//! C8 — Code Generator (§4.8).
//!
//! New logic built from the specification's description of signature
//! mirroring, body substitution, and call-site generation, using
//! `core::lexer`'s tokenizer for the substitution pass.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::lexer::{tokenize, Token};
use crate::types::{Candidate, ParameterSlot};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CallSite {
    pub file: PathBuf,
    pub start_line: u32,
    pub end_line: u32,
    pub replacement: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImportEdit {
    pub file: PathBuf,
    pub add: Vec<String>,
    pub remove: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeneratedExtraction {
    pub extracted_definition: String,
    pub call_sites: Vec<CallSite>,
    pub import_edits: Vec<ImportEdit>,
}

pub struct CodeGenerator;

impl CodeGenerator {
    pub fn new() -> Self {
        Self
    }

    /// `generate(candidate) -> { extracted_definition, call_sites[],
    /// import_edits[] }`. `target_file` is where the extracted definition
    /// will live, if known (the Applicator knows it; the standalone
    /// `generate_extraction` tool doesn't) — without it, the required-import
    /// union still computes but has nowhere to be attached as an `add`.
    pub fn generate(&self, candidate: &Candidate, target_file: Option<&Path>) -> GeneratedExtraction {
        let function_name = "extracted_function";
        let baseline = candidate.group.instances.first().map(|i| &i.matched);

        let extracted_definition = match baseline {
            Some(matched) => build_definition(function_name, &candidate.plan.parameter_slots, &matched.text),
            None => String::new(),
        };

        let call_sites = candidate
            .group
            .instances
            .iter()
            .map(|instance| {
                let args = candidate
                    .plan
                    .parameter_slots
                    .iter()
                    .enumerate()
                    .map(|(idx, slot)| slot.sample_values.get(idx_for_instance(instance_index_of(candidate, instance), idx)).cloned().unwrap_or_else(|| slot.name.clone()))
                    .collect::<Vec<_>>()
                    .join(", ");
                let indent = leading_whitespace(&instance.matched.text);
                CallSite {
                    file: instance.matched.file_path.clone(),
                    start_line: instance.matched.start_line,
                    end_line: instance.matched.end_line,
                    replacement: format!("{indent}{function_name}({args})"),
                }
            })
            .collect();

        let import_edits = compute_import_edits(candidate, target_file);

        GeneratedExtraction { extracted_definition, call_sites, import_edits }
    }
}

impl Default for CodeGenerator {
    fn default() -> Self {
        Self::new()
    }
}

fn instance_index_of(candidate: &Candidate, instance: &crate::types::DuplicateInstance) -> usize {
    candidate
        .group
        .instances
        .iter()
        .position(|i| i.matched.file_path == instance.matched.file_path && i.matched.start_line == instance.matched.start_line)
        .unwrap_or(0)
}

/// `sample_values[0]` is the baseline's own text (inserted by the variation
/// analyzer); call sites for instance `n` want `sample_values[n]` when the
/// baseline itself is instance 0, else the (n-1)th peer sample.
fn idx_for_instance(instance_index: usize, _slot_index: usize) -> usize {
    instance_index
}

fn build_definition(name: &str, slots: &[ParameterSlot], baseline_text: &str) -> String {
    let params = slots.iter().map(|s| s.name.clone()).collect::<Vec<_>>().join(", ");
    let tokens = tokenize(baseline_text);
    let body_tokens = extract_body_tokens(&tokens);
    let body = substitute_slots(&body_tokens, slots);
    format!("def {name}({params}):\n    {body}")
}

/// `baseline_text` is a whole construct match (`detector::construct_pattern`,
/// e.g. `def $NAME($$$ARGS): $$$BODY`), header and all — re-wrapping it
/// verbatim under a new name/signature would nest the original declaration
/// inside the extracted one instead of substituting for it. Strips the
/// construct's own header so only the body tokens feed `substitute_slots`:
/// for Python-style `def`/`class ...:` constructs, everything after the
/// first top-level colon; for brace-style `function ... { ... }` /
/// `class ... { ... }` / bare `{ ... }` blocks, everything between the first
/// top-level `{` and its matching `}`.
fn extract_body_tokens(tokens: &[Token]) -> Vec<Token> {
    if matches!(&tokens.first(), Some(Token::Identifier(kw)) if kw == "def" || kw == "class") {
        let mut depth = 0i32;
        for (i, tok) in tokens.iter().enumerate() {
            match tok {
                Token::Other(s) if s == "(" || s == "[" => depth += 1,
                Token::Other(s) if s == ")" || s == "]" => depth -= 1,
                Token::Other(s) if s == ":" && depth == 0 => return tokens[i + 1..].to_vec(),
                _ => {}
            }
        }
    }

    let mut depth = 0i32;
    let mut body_start = None;
    for (i, tok) in tokens.iter().enumerate() {
        if let Token::Other(s) = tok {
            if s == "{" {
                if depth == 0 {
                    body_start = Some(i + 1);
                }
                depth += 1;
            } else if s == "}" {
                depth -= 1;
                if depth == 0 {
                    if let Some(start) = body_start {
                        return tokens[start..i].to_vec();
                    }
                }
            }
        }
    }

    // No recognized header shape (e.g. a bare body passed directly, as in
    // this module's own unit tests): nothing to strip.
    tokens.to_vec()
}

/// Replaces each baseline occurrence of a slot's original (first) sample
/// value with its parameter name. Token-aware so that e.g. replacing `a`
/// doesn't also clobber `cat`.
fn substitute_slots(tokens: &[Token], slots: &[ParameterSlot]) -> String {
    let mut out = String::new();
    for token in tokens {
        let replacement = slots
            .iter()
            .find(|slot| slot.sample_values.first().map(|v| v.as_str()) == Some(token.text()))
            .map(|slot| slot.name.clone());
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(&replacement.unwrap_or_else(|| token.text().to_string()));
    }
    out
}

fn leading_whitespace(text: &str) -> String {
    text.chars().take_while(|c| c.is_whitespace() && *c != '\n').collect()
}

/// §4.8: "the union of imports across instances becomes the extracted
/// function's required imports; any imports now unused at a call site
/// (after replacement) are removed". Per instance, an import is removable
/// once its symbol has no remaining reference outside the replaced span; the
/// union of removed imports is the extracted definition's requirement,
/// attached to `target_file` if the caller knows it.
fn compute_import_edits(candidate: &Candidate, target_file: Option<&Path>) -> Vec<ImportEdit> {
    let mut edits = Vec::new();
    let mut required: BTreeSet<String> = BTreeSet::new();

    for instance in &candidate.group.instances {
        let Ok(content) = std::fs::read_to_string(&instance.matched.file_path) else { continue };
        let mut remove = Vec::new();
        for line in file_import_lines(&content, &instance.matched.language) {
            let Some(symbol) = imported_symbol(&line) else { continue };
            if !symbol_used_outside_span(&content, &instance.matched.text, &line, &symbol) {
                required.insert(line.clone());
                remove.push(line);
            }
        }
        if !remove.is_empty() {
            edits.push(ImportEdit { file: instance.matched.file_path.clone(), add: Vec::new(), remove });
        }
    }

    if let Some(target_file) = target_file {
        if !required.is_empty() {
            edits.push(ImportEdit { file: target_file.to_path_buf(), add: required.into_iter().collect(), remove: Vec::new() });
        }
    }

    edits
}

fn file_import_lines(content: &str, language: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| is_import_line(line, language))
        .map(str::to_string)
        .collect()
}

fn is_import_line(trimmed: &str, language: &str) -> bool {
    match language {
        "python" => trimmed.starts_with("import ") || trimmed.starts_with("from "),
        _ => trimmed.starts_with("import "),
    }
}

/// The symbol an import line brings into scope, approximated as its last
/// identifier token (e.g. `namedtuple` in `from collections import
/// namedtuple`, `b` in `import { a, b } from './a'`).
fn imported_symbol(line: &str) -> Option<String> {
    tokenize(line).into_iter().rev().find_map(|t| match t {
        Token::Identifier(name) if !matches!(name.as_str(), "import" | "from" | "as") => Some(name),
        _ => None,
    })
}

/// Excludes both the matched span (about to be replaced by a call) and the
/// import line's own declaration (which always mentions its symbol) before
/// checking whether the symbol is still referenced anywhere in the file.
fn symbol_used_outside_span(content: &str, span_text: &str, import_line: &str, symbol: &str) -> bool {
    let without_span = content.replacen(span_text, "", 1);
    let without_import = without_span.replacen(import_line, "", 1);
    tokenize(&without_import).iter().any(|t| matches!(t, Token::Identifier(name) if name == symbol))
}
