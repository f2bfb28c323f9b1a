//! MCP server handler exposing the duplication-detection pipeline as a tool
//! catalog (SPEC_FULL.md §E): each pipeline operation becomes one `Tool` with
//! a JSON-schema argument struct and a handler that calls straight into
//! `codeloom_core`, mirroring the teacher's `Tool::new` + `CallToolResult`
//! success/error mapping idiom.

use std::borrow::Cow;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use rmcp::handler::server::ServerHandler;
use rmcp::model::{
    CallToolRequestParam, CallToolResult, Content, JsonObject, ListToolsResult,
    PaginatedRequestParam, ServerCapabilities, ServerInfo, Tool,
};
use rmcp::service::{RequestContext, RoleServer};
use rmcp::ErrorData as McpError;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info};

use codeloom_core::applicator::{ApplyOpts, Applicator};
use codeloom_core::backup::BackupStore;
use codeloom_core::cache::QueryCache;
use codeloom_core::codegen::CodeGenerator;
use codeloom_core::config::{Config, ConstructType};
use codeloom_core::detector::{DetectorParams, DuplicationDetector};
use codeloom_core::enrichment::{EnrichmentOpts, EnrichmentOrchestrator};
use codeloom_core::executor::{MatcherExecutor, MatcherOptions};
use codeloom_core::ranker::Ranker;
use codeloom_core::types::{Candidate, DuplicateGroup, EnrichedCandidate};
use codeloom_core::variation::VariationAnalyzer;
use codeloom_core::{Error, Result as CoreResult};

// ---------------------------------------------------------------------
// structural_search
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct StructuralSearchArgs {
    /// AST structural pattern, e.g. `$NAME($$$ARGS)` (mutually exclusive
    /// with `rule_doc`).
    #[serde(default)]
    pub pattern: Option<String>,
    /// Declarative rule document (mutually exclusive with `pattern`).
    #[serde(default)]
    pub rule_doc: Option<String>,
    pub language: String,
    /// Path to search, relative to the server's project root if relative.
    #[serde(default)]
    pub target_path: Option<String>,
    #[serde(default)]
    pub max_results: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StructuralSearchResult {
    pub matches: Vec<codeloom_core::types::Match>,
}

// ---------------------------------------------------------------------
// find_duplicates
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct FindDuplicatesArgs {
    pub language: String,
    #[serde(default)]
    pub target_path: Option<String>,
    #[serde(default)]
    pub min_similarity: Option<f64>,
    #[serde(default)]
    pub min_lines: Option<u32>,
    #[serde(default)]
    pub construct_type: Option<String>,
    #[serde(default)]
    pub exclude_patterns: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FindDuplicatesResult {
    pub groups: Vec<DuplicateGroup>,
}

// ---------------------------------------------------------------------
// rank_candidates
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct RankCandidatesArgs {
    pub groups: Vec<DuplicateGroup>,
    #[serde(default)]
    pub max: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RankCandidatesResult {
    pub candidates: Vec<Candidate>,
}

// ---------------------------------------------------------------------
// enrich_candidates
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct EnrichCandidatesArgs {
    pub candidates: Vec<Candidate>,
    #[serde(default)]
    pub parallel: Option<bool>,
    #[serde(default)]
    pub max_workers: Option<u32>,
    #[serde(default)]
    pub timeout_per_candidate_seconds: Option<u64>,
    #[serde(default)]
    pub include_test_coverage: Option<bool>,
    #[serde(default)]
    pub max_candidates: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EnrichCandidatesResult {
    pub enriched: Vec<EnrichedCandidate>,
}

// ---------------------------------------------------------------------
// generate_extraction
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct GenerateExtractionArgs {
    pub candidate: Candidate,
}

// ---------------------------------------------------------------------
// apply_deduplication
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ApplyDeduplicationArgs {
    pub candidates: Vec<Candidate>,
    /// Defaults to `true` (§6): callers must opt in to a real write.
    #[serde(default)]
    pub dry_run: Option<bool>,
    #[serde(default)]
    pub target_file: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
}

// ---------------------------------------------------------------------
// rollback
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct RollbackArgs {
    pub backup_id: String,
}

/// MCP server handler that exposes the codeloom pipeline as a tool catalog.
#[derive(Clone)]
pub struct CodeloomToolServer {
    /// Project root the pipeline operates against.
    pub project_root: PathBuf,
    /// Pipeline configuration (cache/executor/detector/enrichment surface).
    pub config: Config,
    /// Process-wide, one instance per server (§5/§9): constructed once here
    /// and shared across every `rank_candidates` call, not rebuilt per call.
    cache: Arc<QueryCache>,
}

impl CodeloomToolServer {
    /// Create a new server rooted at `project_root` with the given config.
    pub fn new(project_root: PathBuf, config: Config) -> Self {
        let cache = Arc::new(QueryCache::new(config.cache.size, Duration::from_secs(config.cache.ttl_seconds)));
        Self { project_root, config, cache }
    }

    fn executor(&self) -> MatcherExecutor {
        MatcherExecutor::new(self.config.executor.matcher_binary.clone())
    }

    fn resolve_target(&self, target_path: &Option<String>) -> PathBuf {
        match target_path {
            Some(p) => {
                let p = PathBuf::from(p);
                if p.is_absolute() {
                    p
                } else {
                    self.project_root.join(p)
                }
            }
            None => self.project_root.clone(),
        }
    }

    fn parse_construct_type(&self, raw: &Option<String>) -> CoreResult<ConstructType> {
        match raw {
            Some(s) => serde_json::from_value(serde_json::Value::String(s.clone()))
                .map_err(|e| Error::InvalidInput(format!("invalid construct_type {s:?}: {e}"))),
            None => Ok(self.config.detector.construct_type),
        }
    }

    async fn execute_structural_search(
        &self,
        args: StructuralSearchArgs,
    ) -> CoreResult<StructuralSearchResult> {
        let target = self.resolve_target(&args.target_path);
        let opts = MatcherOptions {
            max_results: args.max_results,
            max_file_size_mb: Some(self.config.executor.max_file_size_mb),
            timeout_ms: Some(self.config.executor.default_timeout_ms),
            ..Default::default()
        };
        let executor = self.executor();
        let matches = match (&args.pattern, &args.rule_doc) {
            (Some(pattern), _) => executor.run_structural(pattern, &args.language, &target, &opts).await?,
            (None, Some(rule_doc)) => executor.run_rule(rule_doc, &args.language, &target, &opts).await?,
            (None, None) => {
                return Err(Error::InvalidInput("one of pattern or rule_doc is required".to_string()))
            }
        };
        Ok(StructuralSearchResult { matches })
    }

    async fn execute_find_duplicates(&self, args: FindDuplicatesArgs) -> CoreResult<FindDuplicatesResult> {
        let target = self.resolve_target(&args.target_path);
        let params = DetectorParams {
            min_similarity: args.min_similarity.unwrap_or(self.config.detector.min_similarity),
            min_lines: args.min_lines.unwrap_or(self.config.detector.min_lines),
            construct_type: self.parse_construct_type(&args.construct_type)?,
            exclude_patterns: args.exclude_patterns.unwrap_or_else(|| self.config.detector.exclude_patterns.clone()),
        };
        let detector = DuplicationDetector::new(self.executor());
        let groups = detector.find_duplicates(&target, &args.language, &params).await?;
        Ok(FindDuplicatesResult { groups })
    }

    async fn execute_rank_candidates(&self, args: RankCandidatesArgs) -> CoreResult<RankCandidatesResult> {
        let analyzer = VariationAnalyzer::new();
        let inputs = args
            .groups
            .into_iter()
            .map(|group| {
                let plan = analyzer.analyze(&group);
                (group, plan, None)
            })
            .collect();
        let ranker = Ranker::new(&self.cache);
        let candidates = ranker.rank(inputs, args.max);
        Ok(RankCandidatesResult { candidates })
    }

    async fn execute_enrich_candidates(&self, args: EnrichCandidatesArgs) -> CoreResult<EnrichCandidatesResult> {
        let opts = EnrichmentOpts {
            parallel: args.parallel.unwrap_or(true),
            max_workers: args.max_workers.unwrap_or(self.config.enrichment.max_workers),
            timeout_per_candidate: Duration::from_secs(
                args.timeout_per_candidate_seconds.unwrap_or(self.config.enrichment.timeout_per_candidate_seconds),
            ),
            include_test_coverage: args.include_test_coverage.unwrap_or(self.config.enrichment.include_test_coverage),
            max_candidates: args.max_candidates,
        };
        let orchestrator = EnrichmentOrchestrator::new(self.project_root.clone());
        let enriched = orchestrator.enrich(args.candidates, &opts, None).await?;
        Ok(EnrichCandidatesResult { enriched })
    }

    fn execute_generate_extraction(&self, args: GenerateExtractionArgs) -> codeloom_core::codegen::GeneratedExtraction {
        CodeGenerator::new().generate(&args.candidate, None)
    }

    async fn execute_apply_deduplication(
        &self,
        args: ApplyDeduplicationArgs,
    ) -> CoreResult<codeloom_core::types::ApplicationReport> {
        let default_opts = ApplyOpts::default();
        let opts = ApplyOpts {
            dry_run: args.dry_run.unwrap_or(true),
            target_file: args.target_file.map(PathBuf::from).unwrap_or(default_opts.target_file),
            language: args.language.unwrap_or(default_opts.language),
        };
        let applicator = Applicator::new(self.project_root.clone(), self.config.backup_root(), self.executor());
        applicator.apply(&args.candidates, &opts).await
    }

    fn execute_rollback(&self, args: RollbackArgs) -> CoreResult<codeloom_core::backup::RestoreReport> {
        let backups = BackupStore::new(self.config.backup_root(), self.project_root.clone());
        backups.restore(&args.backup_id)
    }

    fn tools() -> Vec<Tool> {
        vec![
            Self::structural_search_tool(),
            Self::find_duplicates_tool(),
            Self::rank_candidates_tool(),
            Self::enrich_candidates_tool(),
            Self::generate_extraction_tool(),
            Self::apply_deduplication_tool(),
            Self::rollback_tool(),
        ]
    }

    fn structural_search_tool() -> Tool {
        let schema: JsonObject = serde_json::from_value(json!({
            "type": "object",
            "properties": {
                "pattern": { "type": "string", "description": "AST structural pattern (e.g. \"$NAME($$$ARGS)\")" },
                "rule_doc": { "type": "string", "description": "Declarative rule document, alternative to pattern" },
                "language": { "type": "string", "description": "Source language, e.g. \"python\"" },
                "target_path": { "type": "string", "description": "Path to search (relative to project root if not absolute)" },
                "max_results": { "type": "integer", "description": "Cap on returned matches" }
            },
            "required": ["language"],
            "additionalProperties": false
        }))
        .expect("structural_search schema should deserialize");

        Tool::new(
            Cow::Borrowed("structural_search"),
            Cow::Borrowed("Run the external structural-pattern matcher against a path and return raw matches."),
            Arc::new(schema),
        )
    }

    fn find_duplicates_tool() -> Tool {
        let schema: JsonObject = serde_json::from_value(json!({
            "type": "object",
            "properties": {
                "language": { "type": "string" },
                "target_path": { "type": "string" },
                "min_similarity": { "type": "number", "description": "0.0-1.0, default from config" },
                "min_lines": { "type": "integer" },
                "construct_type": { "type": "string", "enum": ["function_definition", "class_definition", "block"] },
                "exclude_patterns": { "type": "array", "items": { "type": "string" } }
            },
            "required": ["language"],
            "additionalProperties": false
        }))
        .expect("find_duplicates schema should deserialize");

        Tool::new(
            Cow::Borrowed("find_duplicates"),
            Cow::Borrowed("Detect duplicate code groups across a project path via structural matching and similarity bucketing."),
            Arc::new(schema),
        )
    }

    fn rank_candidates_tool() -> Tool {
        let schema: JsonObject = serde_json::from_value(json!({
            "type": "object",
            "properties": {
                "groups": { "type": "array", "items": { "type": "object" }, "description": "DuplicateGroup values from find_duplicates" },
                "max": { "type": "integer", "description": "Cap on returned candidates" }
            },
            "required": ["groups"],
            "additionalProperties": false
        }))
        .expect("rank_candidates schema should deserialize");

        Tool::new(
            Cow::Borrowed("rank_candidates"),
            Cow::Borrowed("Analyze each group's parameterization plan and produce weighted-score ranked candidates."),
            Arc::new(schema),
        )
    }

    fn enrich_candidates_tool() -> Tool {
        let schema: JsonObject = serde_json::from_value(json!({
            "type": "object",
            "properties": {
                "candidates": { "type": "array", "items": { "type": "object" }, "description": "Candidate values from rank_candidates" },
                "parallel": { "type": "boolean" },
                "max_workers": { "type": "integer" },
                "timeout_per_candidate_seconds": { "type": "integer" },
                "include_test_coverage": { "type": "boolean" },
                "max_candidates": { "type": "integer" }
            },
            "required": ["candidates"],
            "additionalProperties": false
        }))
        .expect("enrich_candidates schema should deserialize");

        Tool::new(
            Cow::Borrowed("enrich_candidates"),
            Cow::Borrowed("Attach test-coverage, impact, and recommendation data to ranked candidates, in parallel with per-candidate timeout isolation."),
            Arc::new(schema),
        )
    }

    fn generate_extraction_tool() -> Tool {
        let schema: JsonObject = serde_json::from_value(json!({
            "type": "object",
            "properties": {
                "candidate": { "type": "object", "description": "Candidate value from rank_candidates/enrich_candidates" }
            },
            "required": ["candidate"],
            "additionalProperties": false
        }))
        .expect("generate_extraction schema should deserialize");

        Tool::new(
            Cow::Borrowed("generate_extraction"),
            Cow::Borrowed("Generate the extracted function definition and call-site replacements for a candidate."),
            Arc::new(schema),
        )
    }

    fn apply_deduplication_tool() -> Tool {
        let schema: JsonObject = serde_json::from_value(json!({
            "type": "object",
            "properties": {
                "candidates": { "type": "array", "items": { "type": "object" } },
                "dry_run": { "type": "boolean", "description": "Defaults to true; set false to write and commit a backup" },
                "target_file": { "type": "string" },
                "language": { "type": "string" }
            },
            "required": ["candidates"],
            "additionalProperties": false
        }))
        .expect("apply_deduplication schema should deserialize");

        Tool::new(
            Cow::Borrowed("apply_deduplication"),
            Cow::Borrowed("Apply one or more extraction candidates transactionally: backup, write, validate, commit or roll back."),
            Arc::new(schema),
        )
    }

    fn rollback_tool() -> Tool {
        let schema: JsonObject = serde_json::from_value(json!({
            "type": "object",
            "properties": {
                "backup_id": { "type": "string" }
            },
            "required": ["backup_id"],
            "additionalProperties": false
        }))
        .expect("rollback schema should deserialize");

        Tool::new(
            Cow::Borrowed("rollback"),
            Cow::Borrowed("Restore project files from a previously committed backup snapshot."),
            Arc::new(schema),
        )
    }
}

impl Default for CodeloomToolServer {
    fn default() -> Self {
        let project_root = std::env::current_dir().unwrap_or_default();
        let config = Config { project_root: project_root.clone(), ..Config::default() };
        Self::new(project_root, config)
    }
}

fn parse_args<T: for<'de> Deserialize<'de>>(request: &CallToolRequestParam) -> Result<T, McpError> {
    match &request.arguments {
        Some(arguments) => {
            serde_json::from_value(serde_json::Value::Object(arguments.clone().into_iter().collect()))
                .map_err(|err| McpError::invalid_params(err.to_string(), None))
        }
        None => Err(McpError::invalid_params(format!("missing arguments for {} tool", request.name), None)),
    }
}

fn ok_result(value: &impl Serialize, summary: String) -> CallToolResult {
    let structured = serde_json::to_value(value).ok();
    CallToolResult { content: vec![Content::text(summary)], structured_content: structured, is_error: Some(false), meta: None }
}

fn err_result(err: Error) -> CallToolResult {
    CallToolResult {
        content: vec![Content::text(format!("Error [{}]: {}", err.code(), err))],
        structured_content: None,
        is_error: Some(true),
        meta: None,
    }
}

#[allow(clippy::manual_async_fn)]
impl ServerHandler for CodeloomToolServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder().enable_tools().enable_tool_list_changed().build(),
            ..ServerInfo::default()
        }
    }

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListToolsResult, McpError>> + Send + '_ {
        async move { Ok(ListToolsResult { tools: Self::tools(), next_cursor: None }) }
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        info!("MCP tool call: {}", request.name);

        match request.name.as_ref() {
            "structural_search" => {
                let args: StructuralSearchArgs = parse_args(&request)?;
                match self.execute_structural_search(args).await {
                    Ok(result) => {
                        let n = result.matches.len();
                        Ok(ok_result(&result, format!("Found {n} match(es).")))
                    }
                    Err(e) => {
                        error!("structural_search failed: {e}");
                        Ok(err_result(e))
                    }
                }
            }
            "find_duplicates" => {
                let args: FindDuplicatesArgs = parse_args(&request)?;
                match self.execute_find_duplicates(args).await {
                    Ok(result) => {
                        let n = result.groups.len();
                        Ok(ok_result(&result, format!("Found {n} duplicate group(s).")))
                    }
                    Err(e) => {
                        error!("find_duplicates failed: {e}");
                        Ok(err_result(e))
                    }
                }
            }
            "rank_candidates" => {
                let args: RankCandidatesArgs = parse_args(&request)?;
                match self.execute_rank_candidates(args).await {
                    Ok(result) => {
                        let n = result.candidates.len();
                        Ok(ok_result(&result, format!("Ranked {n} candidate(s).")))
                    }
                    Err(e) => {
                        error!("rank_candidates failed: {e}");
                        Ok(err_result(e))
                    }
                }
            }
            "enrich_candidates" => {
                let args: EnrichCandidatesArgs = parse_args(&request)?;
                match self.execute_enrich_candidates(args).await {
                    Ok(result) => {
                        let n = result.enriched.len();
                        Ok(ok_result(&result, format!("Enriched {n} candidate(s).")))
                    }
                    Err(e) => {
                        error!("enrich_candidates failed: {e}");
                        Ok(err_result(e))
                    }
                }
            }
            "generate_extraction" => {
                let args: GenerateExtractionArgs = parse_args(&request)?;
                let result = self.execute_generate_extraction(args);
                Ok(ok_result(&result, "Generated extracted definition and call sites.".to_string()))
            }
            "apply_deduplication" => {
                let args: ApplyDeduplicationArgs = parse_args(&request)?;
                match self.execute_apply_deduplication(args).await {
                    Ok(result) => {
                        let status = format!("{:?}", result.status);
                        Ok(ok_result(&result, format!("Application status: {status}.")))
                    }
                    Err(e) => {
                        error!("apply_deduplication failed: {e}");
                        Ok(err_result(e))
                    }
                }
            }
            "rollback" => {
                let args: RollbackArgs = parse_args(&request)?;
                match self.execute_rollback(args) {
                    Ok(result) => {
                        let n = result.restored_files.len();
                        Ok(ok_result(&result, format!("Restored {n} file(s) from backup {}.", result.backup_id)))
                    }
                    Err(e) => {
                        error!("rollback failed: {e}");
                        Ok(err_result(e))
                    }
                }
            }
            other => Err(McpError::invalid_params(format!("unknown tool: {}", other), None)),
        }
    }
}
