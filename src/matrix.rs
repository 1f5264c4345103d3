//! Job matrix generation
//!
//! Expands devices, test types and ranks into labelled jobs, annotates each
//! with its cache status and picks runner labels. The result is handed to
//! the pipeline's fan-out as `{entry: [...], include: [...]}`.

use std::collections::BTreeMap;

use cachegate_digest::{Digest, DigestType};
use cachegate_store::ObjectStore;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::query::{CacheQuery, QueryError, QueryResult};

/// Device label for CPU-only jobs
pub const CPU_DEVICE: &str = "cpu";

/// Device label for GPU jobs
pub const CUDA_DEVICE: &str = "cuda";

/// Test type that only runs on GPU hardware
pub const SPEED_TEST: &str = "speed-test";

/// The only test type that runs distributed
pub const DISTRIBUTED_TEST_TYPE: &str = "module";

/// Matrix generation errors
#[derive(Debug, thiserror::Error)]
pub enum MatrixError {
    #[error("Matrix is empty: no device/test type combination survived filtering")]
    EmptyMatrix,

    #[error("Duplicate matrix entries: {}", .entries.join(", "))]
    DuplicateEntries { entries: Vec<String> },

    #[error("Invalid matrix request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Query(#[from] QueryError),
}

/// Runner selection and ordering knobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatrixPolicy {
    /// Single label for jobs whose work is already complete
    pub cached_runner: String,
    /// Labels every uncached test job starts with
    pub base_runner_labels: Vec<String>,
    /// Capacity label for jobs that need the shared GPU pool
    pub shared_gpu_label: String,
    /// Labels every uncached build job starts with
    pub build_runner_labels: Vec<String>,
    /// Compute platform of GPU test jobs
    pub cuda_platform: String,
    /// Test types listed first, in this order
    pub priority_test_types: Vec<String>,
}

impl Default for MatrixPolicy {
    fn default() -> Self {
        Self {
            cached_runner: "ubuntu-latest".to_string(),
            base_runner_labels: vec!["self-hosted".to_string()],
            shared_gpu_label: "gpu-cluster".to_string(),
            build_runner_labels: vec!["self-hosted".to_string(), "builder".to_string()],
            cuda_platform: "cu118".to_string(),
            priority_test_types: vec!["single-client".to_string()],
        }
    }
}

/// Where a job runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RunsOn {
    /// Work already complete; the job only reports the hit
    Satisfied(String),
    /// Capability labels a runner must carry
    Labels(Vec<String>),
}

/// One job of the matrix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatrixEntry {
    pub entry: String,
    pub compute_platform: String,
    pub cache_hit: bool,
    pub runs_on: RunsOn,
    pub device: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rank: Option<u32>,
    pub digest_type: DigestType,
    pub build_digest: Digest,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_digest: Option<Digest>,
}

/// Fan-out structure: one job per label, `include` carries per-job data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Matrix {
    pub entry: Vec<String>,
    pub include: Vec<MatrixEntry>,
}

impl Matrix {
    fn from_entries(include: Vec<MatrixEntry>) -> Self {
        Self {
            entry: include.iter().map(|e| e.entry.clone()).collect(),
            include,
        }
    }

    pub fn len(&self) -> usize {
        self.include.len()
    }

    pub fn is_empty(&self) -> bool {
        self.include.is_empty()
    }

    pub fn cache_hits(&self) -> usize {
        self.include.iter().filter(|e| e.cache_hit).count()
    }

    pub fn get(&self, entry: &str) -> Option<&MatrixEntry> {
        self.include.iter().find(|e| e.entry == entry)
    }
}

/// Test matrix dimensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestMatrixRequest {
    pub devices: Vec<String>,
    pub test_types: Vec<String>,
    pub world_size: u32,
    pub distributed: bool,
}

/// A test combination that passed filtering.
#[derive(Debug, Clone, PartialEq, Eq)]
struct TestCandidate {
    label: String,
    device: String,
    test_type: String,
    rank: u32,
}

/// Job label for a combination.
pub fn entry_label(device: &str, test_type: &str, rank: u32, distributed: bool) -> String {
    if distributed {
        format!("{}-{}-distributed-rank-{}", device, test_type, rank)
    } else {
        format!("{}-{}", device, test_type)
    }
}

/// Whether a combination is emitted at all.
pub fn is_supported(device: &str, test_type: &str, distributed: bool) -> bool {
    if test_type == SPEED_TEST && device != CUDA_DEVICE {
        return false;
    }
    if distributed && (test_type != DISTRIBUTED_TEST_TYPE || device != CUDA_DEVICE) {
        return false;
    }
    true
}

/// Runner labels for an uncached test job.
pub fn test_runner_labels(policy: &MatrixPolicy, device: &str, test_type: &str, distributed: bool) -> Vec<String> {
    let mut labels = policy.base_runner_labels.clone();
    if device != CPU_DEVICE && (distributed || test_type != SPEED_TEST) {
        labels.push(policy.shared_gpu_label.clone());
    }
    labels.push(device.to_string());
    labels
}

/// Runner labels for an uncached build job.
pub fn build_runner_labels(policy: &MatrixPolicy, platform: &str) -> Vec<String> {
    let mut labels = policy.build_runner_labels.clone();
    if platform != CPU_DEVICE {
        labels.push(policy.shared_gpu_label.clone());
    }
    labels
}

fn runs_on(policy: &MatrixPolicy, cache_hit: bool, labels: impl FnOnce() -> Vec<String>) -> RunsOn {
    if cache_hit {
        RunsOn::Satisfied(policy.cached_runner.clone())
    } else {
        RunsOn::Labels(labels())
    }
}

fn validate_names(kind: &str, names: &[String]) -> Result<(), MatrixError> {
    if let Some(bad) = names.iter().find(|n| n.trim().is_empty()) {
        return Err(MatrixError::InvalidRequest(format!("empty {} name '{}'", kind, bad)));
    }
    Ok(())
}

/// Labels that occur more than once, sorted.
fn duplicate_labels<'a>(labels: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for label in labels {
        *counts.entry(label).or_default() += 1;
    }
    counts
        .into_iter()
        .filter(|(_, n)| *n > 1)
        .map(|(label, _)| label.to_string())
        .collect()
}

/// Empty and duplicate checks shared by both matrix kinds.
fn check_labels<'a>(labels: impl Iterator<Item = &'a str>, count: usize) -> Result<(), MatrixError> {
    if count == 0 {
        return Err(MatrixError::EmptyMatrix);
    }
    let entries = duplicate_labels(labels);
    if !entries.is_empty() {
        return Err(MatrixError::DuplicateEntries { entries });
    }
    Ok(())
}

/// Surviving combinations in emission order.
///
/// Rank is the outer loop, then device, then test type. Priority test types
/// are then moved to the front without disturbing any other order.
fn test_candidates(request: &TestMatrixRequest, policy: &MatrixPolicy) -> Vec<TestCandidate> {
    let mut candidates = Vec::new();
    for rank in 0..request.world_size {
        for device in &request.devices {
            for test_type in &request.test_types {
                if !is_supported(device, test_type, request.distributed) {
                    debug!(device = %device, test_type = %test_type, rank, "skipping combination");
                    continue;
                }
                candidates.push(TestCandidate {
                    label: entry_label(device, test_type, rank, request.distributed),
                    device: device.clone(),
                    test_type: test_type.clone(),
                    rank,
                });
            }
        }
    }

    let priority = |test_type: &str| {
        policy
            .priority_test_types
            .iter()
            .position(|p| p == test_type)
            .unwrap_or(policy.priority_test_types.len())
    };
    candidates.sort_by_key(|c| priority(&c.test_type));
    candidates
}

/// Build the test matrix.
///
/// Labels are validated before any store access; a failure anywhere aborts
/// the whole matrix.
pub fn generate_test_matrix<S: ObjectStore + ?Sized>(
    query: &mut CacheQuery<'_, S>,
    request: &TestMatrixRequest,
    policy: &MatrixPolicy,
) -> Result<Matrix, MatrixError> {
    if request.world_size == 0 {
        return Err(MatrixError::InvalidRequest("world size must be at least 1".to_string()));
    }
    validate_names("device", &request.devices)?;
    validate_names("test type", &request.test_types)?;

    let candidates = test_candidates(request, policy);
    check_labels(candidates.iter().map(|c| c.label.as_str()), candidates.len())?;

    let mut include = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let result: QueryResult = query.query(&candidate.label, DigestType::Test)?;
        let compute_platform = if candidate.device == CPU_DEVICE {
            CPU_DEVICE.to_string()
        } else {
            policy.cuda_platform.clone()
        };

        include.push(MatrixEntry {
            runs_on: runs_on(policy, result.cache_hit, || {
                test_runner_labels(policy, &candidate.device, &candidate.test_type, request.distributed)
            }),
            entry: candidate.label,
            compute_platform,
            cache_hit: result.cache_hit,
            device: candidate.device,
            test_type: Some(candidate.test_type),
            rank: Some(candidate.rank),
            digest_type: DigestType::Test,
            build_digest: result.build_digest,
            test_digest: result.test_digest,
        });
    }

    let matrix = Matrix::from_entries(include);
    info!(entries = matrix.len(), cache_hits = matrix.cache_hits(), "generated test matrix");
    Ok(matrix)
}

/// Build the build matrix: one job per compute platform.
pub fn generate_build_matrix<S: ObjectStore + ?Sized>(
    query: &mut CacheQuery<'_, S>,
    platforms: &[String],
    policy: &MatrixPolicy,
) -> Result<Matrix, MatrixError> {
    validate_names("platform", platforms)?;
    check_labels(platforms.iter().map(String::as_str), platforms.len())?;

    let mut include = Vec::with_capacity(platforms.len());
    for platform in platforms {
        let result = query.query(platform, DigestType::Build)?;
        let device = if platform == CPU_DEVICE { CPU_DEVICE } else { CUDA_DEVICE };

        include.push(MatrixEntry {
            entry: platform.clone(),
            compute_platform: platform.clone(),
            cache_hit: result.cache_hit,
            runs_on: runs_on(policy, result.cache_hit, || build_runner_labels(policy, platform)),
            device: device.to_string(),
            test_type: None,
            rank: None,
            digest_type: DigestType::Build,
            build_digest: result.build_digest,
            test_digest: None,
        });
    }

    let matrix = Matrix::from_entries(include);
    info!(entries = matrix.len(), cache_hits = matrix.cache_hits(), "generated build matrix");
    Ok(matrix)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(devices: &[&str], test_types: &[&str], world_size: u32, distributed: bool) -> TestMatrixRequest {
        TestMatrixRequest {
            devices: devices.iter().map(|s| s.to_string()).collect(),
            test_types: test_types.iter().map(|s| s.to_string()).collect(),
            world_size,
            distributed,
        }
    }

    fn labels(candidates: &[TestCandidate]) -> Vec<&str> {
        candidates.iter().map(|c| c.label.as_str()).collect()
    }

    #[test]
    fn test_entry_label() {
        assert_eq!(entry_label("cpu", "module", 0, false), "cpu-module");
        assert_eq!(entry_label("cuda", "module", 1, true), "cuda-module-distributed-rank-1");
    }

    #[test]
    fn test_speed_test_only_on_cuda() {
        assert!(!is_supported("cpu", "speed-test", false));
        assert!(is_supported("cuda", "speed-test", false));
        assert!(is_supported("cpu", "module", false));
    }

    #[test]
    fn test_distributed_only_cuda_module() {
        assert!(is_supported("cuda", "module", true));
        assert!(!is_supported("cpu", "module", true));
        assert!(!is_supported("cuda", "misc", true));
        assert!(!is_supported("cuda", "speed-test", true));
    }

    #[test]
    fn test_iteration_order_rank_device_type() {
        let candidates = test_candidates(
            &request(&["cpu", "cuda"], &["module", "misc"], 1, false),
            &MatrixPolicy::default(),
        );
        assert_eq!(labels(&candidates), vec!["cpu-module", "cpu-misc", "cuda-module", "cuda-misc"]);
    }

    #[test]
    fn test_priority_types_sort_first_stably() {
        let candidates = test_candidates(
            &request(&["cpu", "cuda"], &["module", "single-client"], 1, false),
            &MatrixPolicy::default(),
        );
        assert_eq!(
            labels(&candidates),
            vec!["cpu-single-client", "cuda-single-client", "cpu-module", "cuda-module"]
        );
    }

    #[test]
    fn test_priority_list_order_is_respected() {
        let policy = MatrixPolicy {
            priority_test_types: vec!["misc".to_string(), "module".to_string()],
            ..MatrixPolicy::default()
        };
        let candidates = test_candidates(&request(&["cpu"], &["op", "module", "misc"], 1, false), &policy);
        assert_eq!(labels(&candidates), vec!["cpu-misc", "cpu-module", "cpu-op"]);
    }

    #[test]
    fn test_uncached_runner_labels() {
        let policy = MatrixPolicy::default();

        assert_eq!(test_runner_labels(&policy, "cpu", "module", false), vec!["self-hosted", "cpu"]);
        assert_eq!(
            test_runner_labels(&policy, "cuda", "module", false),
            vec!["self-hosted", "gpu-cluster", "cuda"]
        );
        assert_eq!(test_runner_labels(&policy, "cuda", "speed-test", false), vec!["self-hosted", "cuda"]);
        assert_eq!(
            test_runner_labels(&policy, "cuda", "speed-test", true),
            vec!["self-hosted", "gpu-cluster", "cuda"]
        );
    }

    #[test]
    fn test_build_runner_labels() {
        let policy = MatrixPolicy::default();
        assert_eq!(build_runner_labels(&policy, "cpu"), vec!["self-hosted", "builder"]);
        assert_eq!(build_runner_labels(&policy, "cu102"), vec!["self-hosted", "builder", "gpu-cluster"]);
    }

    #[test]
    fn test_duplicate_labels() {
        let dups = duplicate_labels(["a", "b", "a", "c", "b"].into_iter());
        assert_eq!(dups, vec!["a", "b"]);
        assert!(duplicate_labels(["a", "b"].into_iter()).is_empty());
    }

    #[test]
    fn test_runs_on_serializes_untagged() {
        let satisfied = serde_json::to_value(RunsOn::Satisfied("ubuntu-latest".to_string())).unwrap();
        assert_eq!(satisfied, serde_json::json!("ubuntu-latest"));

        let labels = serde_json::to_value(RunsOn::Labels(vec!["self-hosted".to_string()])).unwrap();
        assert_eq!(labels, serde_json::json!(["self-hosted"]));
    }

    #[test]
    fn test_duplicate_error_lists_entries() {
        let err = MatrixError::DuplicateEntries {
            entries: vec!["cuda-module".to_string(), "cpu-misc".to_string()],
        };
        assert_eq!(err.to_string(), "Duplicate matrix entries: cuda-module, cpu-misc");
    }
}
