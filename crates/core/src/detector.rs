//! C4 — Duplication Detector (§4.4).
//!
//! Grounded on `core::executor`'s `Match` output as input; the
//! normalization/bucketing/merge algorithm is new logic built directly from
//! the specification, using `core::lexer` and `core::lcs` as primitives.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::config::ConstructType;
use crate::error::Result;
use crate::executor::{MatcherExecutor, MatcherOptions};
use crate::lcs::similarity_ratio;
use crate::lexer::{normalized_text, tokenize};
use crate::types::{DuplicateGroup, DuplicateInstance, Match};

#[derive(Clone, Debug)]
pub struct DetectorParams {
    pub min_similarity: f64,
    pub min_lines: u32,
    pub construct_type: ConstructType,
    pub exclude_patterns: Vec<String>,
}

impl Default for DetectorParams {
    fn default() -> Self {
        Self {
            min_similarity: 0.8,
            min_lines: 5,
            construct_type: ConstructType::FunctionDefinition,
            exclude_patterns: Vec::new(),
        }
    }
}

fn construct_pattern(construct_type: ConstructType, language: &str) -> String {
    match (construct_type, language) {
        (ConstructType::FunctionDefinition, "python") => "def $NAME($$$ARGS): $$$BODY".to_string(),
        (ConstructType::FunctionDefinition, _) => "function $NAME($$$ARGS) { $$$BODY }".to_string(),
        (ConstructType::ClassDefinition, "python") => "class $NAME: $$$BODY".to_string(),
        (ConstructType::ClassDefinition, _) => "class $NAME { $$$BODY }".to_string(),
        (ConstructType::Block, _) => "{ $$$BODY }".to_string(),
    }
}

pub struct DuplicationDetector {
    executor: MatcherExecutor,
}

impl DuplicationDetector {
    pub fn new(executor: MatcherExecutor) -> Self {
        Self { executor }
    }

    /// `find_duplicates(project_path, language, params) -> [DuplicateGroup]`.
    pub async fn find_duplicates(
        &self,
        project_path: &Path,
        language: &str,
        params: &DetectorParams,
    ) -> Result<Vec<DuplicateGroup>> {
        let pattern = construct_pattern(params.construct_type, language);
        let opts = MatcherOptions {
            exclude_patterns: params.exclude_patterns.clone(),
            ..Default::default()
        };
        let matches = self
            .executor
            .run_structural(&pattern, language, project_path, &opts)
            .await?;

        let instances = self.normalize_matches(matches, language);
        let buckets = bucket_by_hash(instances, params.min_lines);
        let groups = merge_similar_buckets(buckets, params.min_similarity);
        Ok(resolve_overlaps(groups))
    }

    fn normalize_matches(&self, matches: Vec<Match>, language: &str) -> Vec<DuplicateInstance> {
        matches
            .into_iter()
            .map(|mut matched| {
                matched.language = language.to_string();
                let tokens = tokenize(&matched.text);
                let normalized = normalized_text(&tokens);
                let normalized_hash = hex_sha256(normalized.as_bytes());
                DuplicateInstance { matched, normalized_hash }
            })
            .collect()
    }
}

fn hex_sha256(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// §4.4 step 3: bucket by `normalized_hash`; keep buckets with >=2 entries
/// and `line_count >= min_lines`.
fn bucket_by_hash(instances: Vec<DuplicateInstance>, min_lines: u32) -> Vec<DuplicateGroup> {
    let mut buckets: HashMap<String, Vec<DuplicateInstance>> = HashMap::new();
    for instance in instances {
        buckets.entry(instance.normalized_hash.clone()).or_default().push(instance);
    }

    buckets
        .into_values()
        .filter(|entries| entries.len() >= 2)
        .map(|instances| DuplicateGroup { instances })
        .filter(|group| group.line_count() >= min_lines)
        .collect()
}

/// §4.4 step 4: merge buckets whose normalized texts exceed `min_similarity`
/// by token-level LCS ratio. Transitive closure, processed by descending
/// bucket size with lexicographic-hash tie-break.
fn merge_similar_buckets(mut groups: Vec<DuplicateGroup>, min_similarity: f64) -> Vec<DuplicateGroup> {
    if min_similarity >= 1.0 || groups.len() < 2 {
        return groups;
    }

    groups.sort_by(|a, b| {
        b.instances
            .len()
            .cmp(&a.instances.len())
            .then_with(|| bucket_hash(a).cmp(&bucket_hash(b)))
    });

    let tokens: Vec<Vec<String>> = groups
        .iter()
        .map(|g| {
            g.representative()
                .map(|m| normalized_text(&tokenize(&m.text)).split(' ').map(str::to_string).collect())
                .unwrap_or_default()
        })
        .collect();

    let n = groups.len();
    let mut parent: Vec<usize> = (0..n).collect();
    fn find(parent: &mut [usize], x: usize) -> usize {
        if parent[x] != x {
            parent[x] = find(parent, parent[x]);
        }
        parent[x]
    }
    fn union(parent: &mut [usize], a: usize, b: usize) {
        let (ra, rb) = (find(parent, a), find(parent, b));
        if ra != rb {
            parent[ra] = rb;
        }
    }

    for i in 0..n {
        for j in (i + 1)..n {
            if similarity_ratio(&tokens[i], &tokens[j]) >= min_similarity {
                union(&mut parent, i, j);
            }
        }
    }

    let mut merged: HashMap<usize, Vec<DuplicateInstance>> = HashMap::new();
    for (idx, group) in groups.into_iter().enumerate() {
        let root = find(&mut parent, idx);
        merged.entry(root).or_default().extend(group.instances);
    }
    merged.into_values().map(|instances| DuplicateGroup { instances }).collect()
}

fn bucket_hash(group: &DuplicateGroup) -> String {
    group.instances.first().map(|i| i.normalized_hash.clone()).unwrap_or_default()
}

/// §4.4 step 5: a span in more than one group after merging stays in the
/// group with the largest `instance_count`; ties broken by larger
/// `line_count`, then lexicographic canonical representative.
fn resolve_overlaps(groups: Vec<DuplicateGroup>) -> Vec<DuplicateGroup> {
    let mut owner: HashMap<(PathBuf, u32, u32), usize> = HashMap::new();
    let ranked: Vec<&DuplicateGroup> = {
        let mut indices: Vec<usize> = (0..groups.len()).collect();
        indices.sort_by(|&a, &b| {
            groups[b]
                .instance_count()
                .cmp(&groups[a].instance_count())
                .then_with(|| groups[b].line_count().cmp(&groups[a].line_count()))
                .then_with(|| {
                    let ra = groups[a].representative().map(|m| m.file_path.clone()).unwrap_or_default();
                    let rb = groups[b].representative().map(|m| m.file_path.clone()).unwrap_or_default();
                    ra.cmp(&rb)
                })
        });
        indices.into_iter().map(|i| &groups[i]).collect()
    };

    for (rank, group) in ranked.iter().enumerate() {
        for instance in &group.instances {
            let key = (instance.matched.file_path.clone(), instance.matched.start_line, instance.matched.end_line);
            owner.entry(key).or_insert(rank);
        }
    }

    ranked
        .into_iter()
        .enumerate()
        .map(|(rank, group)| {
            let instances: Vec<DuplicateInstance> = group
                .instances
                .iter()
                .filter(|instance| {
                    let key = (instance.matched.file_path.clone(), instance.matched.start_line, instance.matched.end_line);
                    owner.get(&key) == Some(&rank)
                })
                .cloned()
                .collect();
            DuplicateGroup { instances }
        })
        .filter(|group| group.instances.len() >= 2)
        .collect()
}
