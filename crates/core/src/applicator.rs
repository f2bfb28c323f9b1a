//! C9 — Applicator (§4.9).
//!
//! The write step is built directly on `codeloom_apply_patch::{Hunk,
//! apply_hunks}` (see DESIGN.md): edits become `Hunk::UpdateFile`/`AddFile`
//! values and are applied with that crate's offset-safe, descending-order
//! replacement algorithm rather than a reimplementation of it. Backup and
//! validation are grounded on `core::backup` and `core::executor`
//! respectively.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use codeloom_apply_patch::{apply_hunks, Hunk, UpdateFileChunk};
use similar::TextDiff;
use tokio::sync::Mutex;

use crate::backup::BackupStore;
use crate::codegen::{CodeGenerator, GeneratedExtraction};
use crate::error::{Error, Result, ValidationDiagnostic};
use crate::executor::{MatcherExecutor, MatcherOptions};
use crate::types::{ApplicationReport, ApplicationStatus, Candidate, FileDiff};

#[derive(Clone, Debug)]
pub struct ApplyOpts {
    pub dry_run: bool,
    pub target_file: PathBuf,
    pub language: String,
}

impl Default for ApplyOpts {
    fn default() -> Self {
        Self { dry_run: true, target_file: PathBuf::from("helpers.py"), language: "python".to_string() }
    }
}

pub struct Applicator {
    project_root: PathBuf,
    backups: BackupStore,
    executor: MatcherExecutor,
    /// One project-root lock for `apply` (§5 "Locking").
    lock: Mutex<()>,
}

impl Applicator {
    pub fn new(project_root: PathBuf, backup_root: PathBuf, executor: MatcherExecutor) -> Self {
        let backups = BackupStore::new(backup_root, project_root.clone());
        Self { project_root, backups, executor, lock: Mutex::new(()) }
    }

    /// `apply(candidates_to_apply, opts) -> ApplicationReport`.
    pub async fn apply(&self, candidates: &[Candidate], opts: &ApplyOpts) -> Result<ApplicationReport> {
        let _guard = self.lock.lock().await;

        if !opts.dry_run && candidates.iter().any(|c| !c.plan.is_parameterizable()) {
            return Err(Error::InvalidInput(
                "candidate plan contains a non-parameterizable (conditional) variation; refuse auto-apply".to_string(),
            ));
        }

        let target_path = self.project_root.join(&opts.target_file);
        let extractions: Vec<(Candidate, GeneratedExtraction)> =
            candidates.iter().map(|c| (c.clone(), CodeGenerator::new().generate(c, Some(&target_path)))).collect();

        let files = self.files_to_modify(&extractions, &opts.target_file);

        if opts.dry_run {
            return self.dry_run_preview(&extractions, opts);
        }

        let before: std::collections::HashMap<PathBuf, String> =
            files.iter().map(|f| (f.clone(), std::fs::read_to_string(f).unwrap_or_default())).collect();

        let backup_id = self.backups.begin(&files)?;

        if let Err(err) = self.pre_validate(&files, &opts.language).await {
            let _ = self.backups.restore(&backup_id);
            return Err(err);
        }

        let hunks = self.build_hunks(&extractions, &opts.target_file, &opts.language);
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        if let Err(err) = apply_hunks(&hunks, &mut stdout, &mut stderr) {
            let _ = self.backups.restore(&backup_id);
            return Err(Error::ApplyPatch(err));
        }

        match self.post_validate(&files, &opts.language).await {
            Ok(()) => {
                self.backups.commit(&backup_id)?;
                let diffs = self.diff_files(&before);
                Ok(ApplicationReport {
                    status: ApplicationStatus::Applied,
                    backup_id: Some(backup_id),
                    files_changed: files,
                    diffs,
                    validation_errors: Vec::new(),
                })
            }
            Err(diagnostics) => {
                self.backups.restore(&backup_id)?;
                Ok(ApplicationReport {
                    status: ApplicationStatus::RolledBack,
                    backup_id: Some(backup_id),
                    files_changed: Vec::new(),
                    diffs: Vec::new(),
                    validation_errors: diagnostics,
                })
            }
        }
    }

    fn files_to_modify(&self, extractions: &[(Candidate, GeneratedExtraction)], target_file: &Path) -> Vec<PathBuf> {
        let mut files: BTreeSet<PathBuf> = BTreeSet::new();
        for (candidate, _) in extractions {
            for instance in &candidate.group.instances {
                files.insert(instance.matched.file_path.clone());
            }
        }
        files.insert(self.project_root.join(target_file));
        files.into_iter().collect()
    }

    /// §4.9 step 3/5: validate that the matcher can still parse each file.
    /// Reuses the executor's subprocess plumbing rather than a bespoke
    /// parse-only code path.
    async fn validate(&self, files: &[PathBuf], language: &str) -> std::result::Result<(), Vec<ValidationDiagnostic>> {
        let mut diagnostics = Vec::new();
        for file in files {
            if !file.exists() {
                continue;
            }
            let opts = MatcherOptions::default();
            let result = self
                .executor
                .run_structural("$$$ANY", language, file, &opts)
                .await;
            if let Err(err) = result {
                if matches!(err, Error::ExecutionError { .. }) {
                    diagnostics.push(ValidationDiagnostic { file: file.clone(), message: err.to_string() });
                }
            }
        }
        if diagnostics.is_empty() {
            Ok(())
        } else {
            Err(diagnostics)
        }
    }

    async fn pre_validate(&self, files: &[PathBuf], language: &str) -> Result<()> {
        self.validate(files, language).await.map_err(|diagnostics| Error::ValidationFailure { diagnostics })
    }

    async fn post_validate(&self, files: &[PathBuf], language: &str) -> std::result::Result<(), Vec<ValidationDiagnostic>> {
        self.validate(files, language).await
    }

    fn build_hunks(&self, extractions: &[(Candidate, GeneratedExtraction)], target_file: &Path, language: &str) -> Vec<Hunk> {
        let mut hunks = Vec::new();
        let mut target_chunks = Vec::new();

        // Sort edits within each file by descending start line first (§4.9
        // step 1), grouped by file.
        let mut by_file: std::collections::HashMap<PathBuf, Vec<(u32, u32, String)>> = std::collections::HashMap::new();
        for (_, extraction) in extractions {
            for call_site in &extraction.call_sites {
                by_file.entry(call_site.file.clone()).or_default().push((
                    call_site.start_line,
                    call_site.end_line,
                    call_site.replacement.clone(),
                ));
            }
        }

        for (file, mut edits) in by_file {
            edits.sort_by(|a, b| b.0.cmp(&a.0));
            let original = std::fs::read_to_string(&file).unwrap_or_default();
            let lines: Vec<&str> = original.lines().collect();
            let mut chunks = Vec::new();
            for (start, end, replacement) in edits {
                let start_idx = start.saturating_sub(1) as usize;
                let end_idx = (end as usize).min(lines.len());
                if start_idx >= end_idx {
                    continue;
                }
                chunks.push(UpdateFileChunk {
                    change_context: None,
                    old_lines: lines[start_idx..end_idx].iter().map(|s| s.to_string()).collect(),
                    new_lines: vec![replacement],
                    is_end_of_file: false,
                });
            }
            if !chunks.is_empty() {
                hunks.push(Hunk::UpdateFile { path: file, move_path: None, chunks });
            }
        }

        let target_path = self.project_root.join(target_file);
        let definitions: Vec<String> = extractions.iter().map(|(_, e)| e.extracted_definition.clone()).collect();
        if target_path.exists() {
            let original = std::fs::read_to_string(&target_path).unwrap_or_default();
            let insertion_point = insertion_point(&original, language);
            target_chunks.push(UpdateFileChunk {
                change_context: None,
                old_lines: vec![insertion_point.0.clone()],
                new_lines: vec![insertion_point.0, String::new(), definitions.join("\n\n")],
                is_end_of_file: insertion_point.1,
            });
            hunks.push(Hunk::UpdateFile { path: target_path, move_path: None, chunks: target_chunks });
        } else {
            hunks.push(Hunk::AddFile { path: target_path, contents: format!("{}\n", definitions.join("\n\n")) });
        }

        // §4.9 step 4 "Modify import lists per §4.8": each affected file gets
        // its own update hunk, applied after that file's call-site/definition
        // hunk above so it reads the already-rewritten content.
        let mut import_by_file: std::collections::HashMap<PathBuf, (BTreeSet<String>, BTreeSet<String>)> =
            std::collections::HashMap::new();
        for (_, extraction) in extractions {
            for edit in &extraction.import_edits {
                let entry = import_by_file.entry(edit.file.clone()).or_default();
                entry.0.extend(edit.add.iter().cloned());
                entry.1.extend(edit.remove.iter().cloned());
            }
        }
        for (file, (add, remove)) in import_by_file {
            let mut chunks = Vec::new();
            for line in remove {
                chunks.push(UpdateFileChunk { change_context: None, old_lines: vec![line], new_lines: Vec::new(), is_end_of_file: false });
            }
            if !add.is_empty() {
                chunks.push(UpdateFileChunk {
                    change_context: None,
                    old_lines: Vec::new(),
                    new_lines: add.into_iter().collect(),
                    is_end_of_file: false,
                });
            }
            if !chunks.is_empty() {
                hunks.push(Hunk::UpdateFile { path: file, move_path: None, chunks });
            }
        }

        hunks
    }

    fn diff_files(&self, before: &std::collections::HashMap<PathBuf, String>) -> Vec<FileDiff> {
        let mut files: Vec<&PathBuf> = before.keys().collect();
        files.sort();
        files
            .into_iter()
            .map(|file| {
                let after = std::fs::read_to_string(file).unwrap_or_default();
                let diff = TextDiff::from_lines(&before[file], &after);
                FileDiff { file: file.clone(), unified_diff: diff.unified_diff().to_string() }
            })
            .collect()
    }

    /// `dry_run = true`: preview only, no filesystem writes (§4.9,
    /// testable property 11).
    fn dry_run_preview(&self, extractions: &[(Candidate, GeneratedExtraction)], opts: &ApplyOpts) -> Result<ApplicationReport> {
        let mut diffs = Vec::new();
        let mut by_file: std::collections::HashMap<PathBuf, Vec<(u32, u32, String)>> = std::collections::HashMap::new();
        for (_, extraction) in extractions {
            for call_site in &extraction.call_sites {
                by_file.entry(call_site.file.clone()).or_default().push((
                    call_site.start_line,
                    call_site.end_line,
                    call_site.replacement.clone(),
                ));
            }
        }
        for (file, mut edits) in by_file {
            edits.sort_by(|a, b| b.0.cmp(&a.0));
            let original = std::fs::read_to_string(&file).unwrap_or_default();
            let mut lines: Vec<String> = original.lines().map(str::to_string).collect();
            for (start, end, replacement) in &edits {
                let start_idx = start.saturating_sub(1) as usize;
                let end_idx = (*end as usize).min(lines.len());
                if start_idx < end_idx {
                    lines.splice(start_idx..end_idx, [replacement.clone()]);
                }
            }
            let rewritten = lines.join("\n");
            let diff = TextDiff::from_lines(&original, &rewritten);
            diffs.push(FileDiff { file, unified_diff: diff.unified_diff().to_string() });
        }

        let target_path = self.project_root.join(&opts.target_file);
        let definitions: Vec<String> = extractions.iter().map(|(_, e)| e.extracted_definition.clone()).collect();
        let existing = std::fs::read_to_string(&target_path).unwrap_or_default();
        let rewritten = format!("{existing}\n{}\n", definitions.join("\n\n"));
        let diff = TextDiff::from_lines(&existing, &rewritten);
        diffs.push(FileDiff { file: target_path, unified_diff: diff.unified_diff().to_string() });

        Ok(ApplicationReport {
            status: ApplicationStatus::DryRun,
            backup_id: None,
            files_changed: Vec::new(),
            diffs,
            validation_errors: Vec::new(),
        })
    }
}

/// Per-language insertion-point dispatch (§4.9 step 4): where the shared
/// helper's definition is anchored in `target_file`. Returns the line to
/// anchor on and whether it is the file's last line.
fn insertion_point(content: &str, language: &str) -> (String, bool) {
    match language {
        "java" => after_package_block(content),
        "typescript" | "javascript" => after_last_import_or_declaration(content),
        _ => after_last_python_import(content),
    }
}

/// Python: after the last top-level `import`/`from` line, else end of file.
fn after_last_python_import(content: &str) -> (String, bool) {
    let lines: Vec<&str> = content.lines().collect();
    for (idx, line) in lines.iter().enumerate().rev() {
        if line.starts_with("import ") || line.starts_with("from ") {
            return (line.to_string(), idx + 1 == lines.len());
        }
    }
    (lines.last().map(|s| s.to_string()).unwrap_or_default(), true)
}

/// TypeScript/JavaScript: after the last `import ...` line, else after the
/// last top-level declaration (`export`/`const`/`function`/`class` at column
/// 0), else end of file.
fn after_last_import_or_declaration(content: &str) -> (String, bool) {
    let lines: Vec<&str> = content.lines().collect();
    for (idx, line) in lines.iter().enumerate().rev() {
        if line.starts_with("import ") {
            return (line.to_string(), idx + 1 == lines.len());
        }
    }
    for (idx, line) in lines.iter().enumerate().rev() {
        if line.starts_with("export ") || line.starts_with("const ") || line.starts_with("function ") || line.starts_with("class ") {
            return (line.to_string(), idx + 1 == lines.len());
        }
    }
    (lines.last().map(|s| s.to_string()).unwrap_or_default(), true)
}

/// Java: inside the enclosing `package ...;` block, immediately after the
/// package declaration (or the last import, if later), else end of file.
fn after_package_block(content: &str) -> (String, bool) {
    let lines: Vec<&str> = content.lines().collect();
    for (idx, line) in lines.iter().enumerate().rev() {
        if line.trim_start().starts_with("import ") {
            return (line.to_string(), idx + 1 == lines.len());
        }
    }
    for (idx, line) in lines.iter().enumerate() {
        if line.trim_start().starts_with("package ") {
            return (line.to_string(), idx + 1 == lines.len());
        }
    }
    (lines.last().map(|s| s.to_string()).unwrap_or_default(), true)
}
