// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Value types shared across the experiment catalog and its consumers.
//!
//! The hierarchy is Experiment → WorkflowNode → Task → Job, with data
//! transfers hanging off tasks. Statuses are not embedded in the entity
//! structs; they live in dedicated status records keyed by
//! (owning entity, [`StatusType`]) so there is at most one current status
//! per pair. Error diagnostics attach to tasks and jobs and carry the full
//! owning chain for ancestor queries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Generate a unique identifier from a human-readable name.
///
/// Whitespace is stripped from the name and a random UUID suffix is
/// appended, so two calls with the same name yield distinct ids that both
/// keep the name as a recognizable prefix.
pub fn generate_id(name: &str) -> String {
    let slug: String = name.chars().filter(|c| !c.is_whitespace()).collect();
    format!("{}_{}", slug, Uuid::new_v4())
}

/// An ordered (top-level id, second-level id) pair addressing a nested
/// entity, e.g. (task id, job id) or (task id, transfer id).
///
/// Pure value type; it has no identity of its own.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompositeIdentifier {
    /// Identifier of the containing entity.
    pub top_level: String,
    /// Identifier of the nested entity.
    pub second_level: String,
}

impl CompositeIdentifier {
    /// Create a new composite identifier.
    pub fn new(top_level: impl Into<String>, second_level: impl Into<String>) -> Self {
        Self {
            top_level: top_level.into(),
            second_level: second_level.into(),
        }
    }

    /// Storage key for record kinds whose ids are only unique within
    /// their parent (jobs carry backend-assigned ids).
    pub fn storage_key(&self) -> String {
        format!("{}:{}", self.top_level, self.second_level)
    }
}

impl std::fmt::Display for CompositeIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.top_level, self.second_level)
    }
}

/// Explicit ancestor addressing for a nested entity.
///
/// Carries every id on the owning chain so status and error records can be
/// stored with back-references at all levels instead of re-fetching parents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityAncestry {
    /// Owning experiment id (always present).
    pub experiment_id: String,
    /// Owning workflow node id, if the entity sits below a node.
    pub node_id: Option<String>,
    /// Owning task id, if the entity sits below a task.
    pub task_id: Option<String>,
    /// Owning job id, for job-scoped records.
    pub job_id: Option<String>,
}

impl EntityAncestry {
    /// Ancestry rooted at an experiment.
    pub fn experiment(experiment_id: impl Into<String>) -> Self {
        Self {
            experiment_id: experiment_id.into(),
            ..Default::default()
        }
    }

    /// Slash-joined id chain, most senior first.
    pub fn path(&self) -> String {
        let mut parts = vec![self.experiment_id.as_str()];
        if let Some(node) = &self.node_id {
            parts.push(node);
        }
        if let Some(task) = &self.task_id {
            parts.push(task);
        }
        if let Some(job) = &self.job_id {
            parts.push(job);
        }
        parts.join("/")
    }

    /// Whether the given id appears anywhere on the chain.
    pub fn contains(&self, id: &str) -> bool {
        self.experiment_id == id
            || self.node_id.as_deref() == Some(id)
            || self.task_id.as_deref() == Some(id)
            || self.job_id.as_deref() == Some(id)
    }
}

// ============================================================================
// Status model
// ============================================================================

/// Discriminator tagging which level of the hierarchy a status describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusType {
    /// Experiment-level status.
    #[serde(rename = "EXPERIMENT")]
    Experiment,
    /// Workflow-node-level status.
    #[serde(rename = "WORKFLOW_NODE")]
    WorkflowNode,
    /// Task-level status.
    #[serde(rename = "TASK")]
    Task,
    /// Job-level status.
    #[serde(rename = "JOB")]
    Job,
    /// Application status reported by the backend for a job.
    #[serde(rename = "APPLICATION")]
    Application,
    /// Data-transfer status.
    #[serde(rename = "DATA_TRANSFER")]
    DataTransfer,
}

impl StatusType {
    /// Stable string form used in storage keys and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Experiment => "EXPERIMENT",
            Self::WorkflowNode => "WORKFLOW_NODE",
            Self::Task => "TASK",
            Self::Job => "JOB",
            Self::Application => "APPLICATION",
            Self::DataTransfer => "DATA_TRANSFER",
        }
    }
}

/// A single typed status entry.
///
/// At most one current status exists per (entity, [`StatusType`]);
/// updates overwrite the record in place rather than appending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    /// Which level of the hierarchy this status describes.
    pub status_type: StatusType,
    /// The state string (one of the level's state enumeration, or a
    /// backend-defined string for APPLICATION).
    pub state: String,
    /// When the status was last written.
    pub updated_at: DateTime<Utc>,
    /// Owning chain of the entity this status belongs to.
    pub ancestry: EntityAncestry,
}

/// Lifecycle states of an experiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExperimentState {
    /// Submitted and persisted, not yet validated.
    Created,
    /// Passed input validation.
    Validated,
    /// Accepted by the orchestrator for execution.
    Scheduled,
    /// Dispatched to the execution pipeline.
    Launched,
    /// At least one node is executing.
    Executing,
    /// A cancel request is being honored.
    Cancelling,
    /// Terminal: cancelled before completion.
    Cancelled,
    /// Terminal: all nodes completed.
    Done,
    /// Terminal: failed permanently.
    Failed,
    /// State not known.
    #[default]
    Unknown,
}

impl ExperimentState {
    /// Whether this state is terminal (DONE, FAILED, CANCELLED).
    ///
    /// A terminal experiment is never mutated again except to append
    /// error details.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Cancelled)
    }

    /// Stable string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Validated => "VALIDATED",
            Self::Scheduled => "SCHEDULED",
            Self::Launched => "LAUNCHED",
            Self::Executing => "EXECUTING",
            Self::Cancelling => "CANCELLING",
            Self::Cancelled => "CANCELLED",
            Self::Done => "DONE",
            Self::Failed => "FAILED",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Parse the stable string form back into a state.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "CREATED" => Some(Self::Created),
            "VALIDATED" => Some(Self::Validated),
            "SCHEDULED" => Some(Self::Scheduled),
            "LAUNCHED" => Some(Self::Launched),
            "EXECUTING" => Some(Self::Executing),
            "CANCELLING" => Some(Self::Cancelling),
            "CANCELLED" => Some(Self::Cancelled),
            "DONE" => Some(Self::Done),
            "FAILED" => Some(Self::Failed),
            "UNKNOWN" => Some(Self::Unknown),
            _ => None,
        }
    }
}

/// Lifecycle states of a workflow node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[allow(missing_docs)]
pub enum WorkflowNodeState {
    Invoked,
    Executing,
    Cancelling,
    Cancelled,
    Suspended,
    Completed,
    Failed,
    #[default]
    Unknown,
}

impl WorkflowNodeState {
    /// Stable string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Invoked => "INVOKED",
            Self::Executing => "EXECUTING",
            Self::Cancelling => "CANCELLING",
            Self::Cancelled => "CANCELLED",
            Self::Suspended => "SUSPENDED",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Unknown => "UNKNOWN",
        }
    }
}

/// Lifecycle states of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[allow(missing_docs)]
pub enum TaskState {
    Waiting,
    Started,
    PreProcessing,
    InputDataStaging,
    Executing,
    OutputDataStaging,
    PostProcessing,
    Cancelling,
    Cancelled,
    Completed,
    Failed,
    #[default]
    Unknown,
}

impl TaskState {
    /// Stable string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "WAITING",
            Self::Started => "STARTED",
            Self::PreProcessing => "PRE_PROCESSING",
            Self::InputDataStaging => "INPUT_DATA_STAGING",
            Self::Executing => "EXECUTING",
            Self::OutputDataStaging => "OUTPUT_DATA_STAGING",
            Self::PostProcessing => "POST_PROCESSING",
            Self::Cancelling => "CANCELLING",
            Self::Cancelled => "CANCELLED",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Unknown => "UNKNOWN",
        }
    }
}

/// Job states shared by every producer and consumer on the pipeline.
///
/// The discriminant is the wire value: the coordination tree stores an
/// experiment's pipeline state as the decimal string of this value, so the
/// numbering is part of the protocol and must not be reordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(i32)]
#[allow(missing_docs)]
pub enum JobState {
    #[serde(rename = "CREATED")]
    Created = 0,
    #[serde(rename = "ACCEPTED")]
    Accepted = 1,
    #[serde(rename = "FETCHED")]
    Fetched = 2,
    #[serde(rename = "INHANDLERSDONE")]
    InHandlersDone = 3,
    #[serde(rename = "SUBMITTED")]
    Submitted = 4,
    #[serde(rename = "OUTHANDLERSDONE")]
    OutHandlersDone = 5,
    #[serde(rename = "RUNNING")]
    Running = 6,
    #[serde(rename = "FAILED")]
    Failed = 7,
    #[serde(rename = "PAUSED")]
    Paused = 8,
    #[serde(rename = "PENDING")]
    Pending = 9,
    #[serde(rename = "ACTIVE")]
    Active = 10,
    #[serde(rename = "DONE")]
    Done = 11,
    #[serde(rename = "CANCELLED")]
    Cancelled = 12,
    #[serde(rename = "UNKNOWN")]
    #[default]
    Unknown = 13,
    #[serde(rename = "HANGED")]
    Hanged = 14,
}

impl JobState {
    /// The wire value of this state.
    pub fn value(self) -> i32 {
        self as i32
    }

    /// Look up a state by its wire value.
    pub fn from_value(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::Created),
            1 => Some(Self::Accepted),
            2 => Some(Self::Fetched),
            3 => Some(Self::InHandlersDone),
            4 => Some(Self::Submitted),
            5 => Some(Self::OutHandlersDone),
            6 => Some(Self::Running),
            7 => Some(Self::Failed),
            8 => Some(Self::Paused),
            9 => Some(Self::Pending),
            10 => Some(Self::Active),
            11 => Some(Self::Done),
            12 => Some(Self::Cancelled),
            13 => Some(Self::Unknown),
            14 => Some(Self::Hanged),
            _ => None,
        }
    }

    /// Stable string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Accepted => "ACCEPTED",
            Self::Fetched => "FETCHED",
            Self::InHandlersDone => "INHANDLERSDONE",
            Self::Submitted => "SUBMITTED",
            Self::OutHandlersDone => "OUTHANDLERSDONE",
            Self::Running => "RUNNING",
            Self::Failed => "FAILED",
            Self::Paused => "PAUSED",
            Self::Pending => "PENDING",
            Self::Active => "ACTIVE",
            Self::Done => "DONE",
            Self::Cancelled => "CANCELLED",
            Self::Unknown => "UNKNOWN",
            Self::Hanged => "HANGED",
        }
    }
}

/// Lifecycle states of a data-staging operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[allow(missing_docs)]
pub enum TransferState {
    Queued,
    Staging,
    Completed,
    Failed,
    Cancelled,
    #[default]
    Unknown,
}

impl TransferState {
    /// Stable string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "QUEUED",
            Self::Staging => "STAGING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
            Self::Unknown => "UNKNOWN",
        }
    }
}

// ============================================================================
// Error diagnostics
// ============================================================================

/// Coarse classification of an execution error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[allow(missing_docs)]
pub enum ErrorCategory {
    FileSystemFailure,
    ApplicationFailure,
    ResourceNodeFailure,
    DiskFull,
    InsufficientCpus,
    DependencyFailure,
    SchedulingFailure,
    #[default]
    Other,
}

/// Suggested remediation for an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[allow(missing_docs)]
pub enum CorrectiveAction {
    RetrySubmission,
    ContactSupport,
    CannotBeDetermined,
}

/// Who is expected to act on an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[allow(missing_docs)]
pub enum ActionableGroup {
    ResourceAdmins,
    GatewayAdmins,
    User,
    CannotBeDetermined,
}

/// Error diagnostics attachable to a task or a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Identifier assigned when the error is attached; empty until then.
    #[serde(default)]
    pub error_id: String,
    /// When the error was recorded.
    pub created_at: DateTime<Utc>,
    /// The raw error message from the failing layer.
    pub actual_error_message: String,
    /// Message suitable for showing to the submitting user.
    pub user_friendly_message: String,
    /// Coarse error classification.
    pub category: ErrorCategory,
    /// True for transient errors worth retrying, false for persistent ones.
    pub transient: bool,
    /// Suggested remediation. Defaults to CONTACT_SUPPORT.
    pub corrective_action: CorrectiveAction,
    /// Who should act on the error. Defaults to GATEWAY_ADMINS.
    pub actionable_group: ActionableGroup,
}

impl ErrorDetails {
    /// Create error details with the defaulted corrective action and
    /// actionable group.
    pub fn new(actual_error_message: impl Into<String>) -> Self {
        Self {
            error_id: String::new(),
            created_at: Utc::now(),
            actual_error_message: actual_error_message.into(),
            user_friendly_message: String::new(),
            category: ErrorCategory::default(),
            transient: false,
            corrective_action: CorrectiveAction::ContactSupport,
            actionable_group: ActionableGroup::GatewayAdmins,
        }
    }
}

// ============================================================================
// Entities
// ============================================================================

/// Value type of an input or output record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[allow(missing_docs)]
pub enum DataType {
    #[default]
    String,
    Integer,
    Float,
    Uri,
    Stdout,
    Stderr,
}

/// One named input or output of an experiment, node, or application.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DataObject {
    /// Parameter name.
    pub name: String,
    /// Parameter value, rendered as a string.
    pub value: String,
    /// Declared type of the value.
    pub data_type: DataType,
    /// Free-form metadata attached by the gateway.
    pub metadata: Option<String>,
}

/// Requested compute allocation for a task.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ComputeScheduling {
    /// Target compute resource identifier.
    pub resource_host_id: String,
    /// Total CPU cores requested.
    pub total_cpu_count: i32,
    /// Nodes requested.
    pub node_count: i32,
    /// Wall-time limit in minutes.
    pub wall_time_limit_minutes: i32,
    /// Scheduler queue name.
    pub queue_name: Option<String>,
    /// Physical memory per node, in megabytes.
    pub total_physical_memory_mb: Option<i32>,
}

/// Resources a finished job was observed to consume.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResourceConsumption {
    /// CPU cores used.
    pub cpu_count: Option<i32>,
    /// Nodes used.
    pub node_count: Option<i32>,
    /// Wall time used, in minutes.
    pub wall_time_minutes: Option<i32>,
    /// Queue the job ran in.
    pub queue_name: Option<String>,
}

/// Top-level user-submitted unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Experiment {
    /// Unique identifier; assigned at submission, empty before.
    #[serde(default)]
    pub experiment_id: String,
    /// Human-readable experiment name; the id prefix is derived from it.
    pub name: String,
    /// Owning gateway user.
    pub user_name: String,
    /// Gateway the experiment was submitted through.
    pub gateway_id: String,
    /// When the experiment was created.
    pub creation_time: DateTime<Utc>,
    /// Experiment inputs.
    pub inputs: Vec<DataObject>,
    /// Experiment outputs, filled in as execution progresses.
    pub outputs: Vec<DataObject>,
    /// Decomposition into workflow nodes. Persisted as independent
    /// records; empty when the entity is read back individually.
    #[serde(default)]
    pub nodes: Vec<WorkflowNodeDetails>,
}

/// One decomposition unit of an experiment.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WorkflowNodeDetails {
    /// Unique within the experiment, immutable once assigned
    /// (`slug(node_name) + "_" + uuid`); empty until added.
    #[serde(default)]
    pub node_instance_id: String,
    /// Human-readable node name.
    pub node_name: String,
    /// When the node was created.
    pub creation_time: DateTime<Utc>,
    /// Node inputs.
    pub inputs: Vec<DataObject>,
    /// Node outputs.
    pub outputs: Vec<DataObject>,
    /// Schedulable units under this node. Persisted as independent
    /// records; empty when the entity is read back individually.
    #[serde(default)]
    pub tasks: Vec<TaskDetails>,
}

/// One schedulable unit within a node; maps to one backend submission
/// lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TaskDetails {
    /// Unique task id (`slug(node_name) + "_" + uuid`); empty until added.
    #[serde(default)]
    pub task_id: String,
    /// When the task was created.
    pub creation_time: DateTime<Utc>,
    /// Application to execute.
    pub application_id: String,
    /// Application version.
    pub application_version: Option<String>,
    /// Application inputs.
    pub application_inputs: Vec<DataObject>,
    /// Application outputs.
    pub application_outputs: Vec<DataObject>,
    /// Requested compute allocation.
    pub scheduling: Option<ComputeScheduling>,
    /// Concrete dispatches of this task. Persisted as independent
    /// records; empty when the entity is read back individually.
    #[serde(default)]
    pub jobs: Vec<JobDetails>,
    /// Staging operations under this task. Persisted as independent
    /// records; empty when the entity is read back individually.
    #[serde(default)]
    pub transfers: Vec<DataTransferDetails>,
}

/// One submission of a task to a backend compute resource.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct JobDetails {
    /// Backend-assigned job id; only unique within the owning task.
    pub job_id: String,
    /// Scheduler job description as submitted.
    pub job_description: String,
    /// When the job record was created.
    pub creation_time: DateTime<Utc>,
    /// Resources the job consumed, when reported by the backend.
    pub resource_consumption: Option<ResourceConsumption>,
}

/// One data-staging operation under a task.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DataTransferDetails {
    /// Unique transfer id (`slug(task_id) + "_" + uuid`); empty until added.
    #[serde(default)]
    pub transfer_id: String,
    /// Description of the staging operation.
    pub transfer_description: String,
    /// When the transfer record was created.
    pub creation_time: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_id_strips_whitespace_and_is_unique() {
        let a = generate_id("echo test node");
        let b = generate_id("echo test node");
        assert!(a.starts_with("echotestnode_"));
        assert!(b.starts_with("echotestnode_"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_generate_id_keeps_non_whitespace() {
        let id = generate_id("MPI-run.v2");
        assert!(id.starts_with("MPI-run.v2_"));
    }

    #[test]
    fn test_composite_identifier_storage_key() {
        let ids = CompositeIdentifier::new("task-1", "job-42");
        assert_eq!(ids.storage_key(), "task-1:job-42");
        assert_eq!(ids.to_string(), "(task-1, job-42)");
    }

    #[test]
    fn test_ancestry_path_and_contains() {
        let ancestry = EntityAncestry {
            experiment_id: "exp-1".to_string(),
            node_id: Some("node-1".to_string()),
            task_id: Some("task-1".to_string()),
            job_id: None,
        };
        assert_eq!(ancestry.path(), "exp-1/node-1/task-1");
        assert!(ancestry.contains("exp-1"));
        assert!(ancestry.contains("task-1"));
        assert!(!ancestry.contains("job-1"));
    }

    #[test]
    fn test_experiment_state_terminal() {
        assert!(ExperimentState::Done.is_terminal());
        assert!(ExperimentState::Failed.is_terminal());
        assert!(ExperimentState::Cancelled.is_terminal());
        assert!(!ExperimentState::Executing.is_terminal());
        assert!(!ExperimentState::Unknown.is_terminal());
    }

    #[test]
    fn test_experiment_state_round_trip() {
        for state in [
            ExperimentState::Created,
            ExperimentState::Validated,
            ExperimentState::Scheduled,
            ExperimentState::Launched,
            ExperimentState::Executing,
            ExperimentState::Cancelling,
            ExperimentState::Cancelled,
            ExperimentState::Done,
            ExperimentState::Failed,
            ExperimentState::Unknown,
        ] {
            assert_eq!(ExperimentState::parse(state.as_str()), Some(state));
        }
        assert_eq!(ExperimentState::parse("NOT_A_STATE"), None);
    }

    #[test]
    fn test_job_state_wire_values() {
        assert_eq!(JobState::Created.value(), 0);
        assert_eq!(JobState::Submitted.value(), 4);
        assert_eq!(JobState::Cancelled.value(), 12);
        assert_eq!(JobState::Hanged.value(), 14);

        for v in 0..=14 {
            let state = JobState::from_value(v).expect("value in range");
            assert_eq!(state.value(), v);
        }
        assert_eq!(JobState::from_value(15), None);
        assert_eq!(JobState::from_value(-1), None);
    }

    #[test]
    fn test_job_state_string_form_matches_wire_names() {
        assert_eq!(JobState::InHandlersDone.as_str(), "INHANDLERSDONE");
        assert_eq!(JobState::OutHandlersDone.as_str(), "OUTHANDLERSDONE");
        let json = serde_json::to_string(&JobState::InHandlersDone).unwrap();
        assert_eq!(json, "\"INHANDLERSDONE\"");
    }

    #[test]
    fn test_default_states_are_unknown() {
        assert_eq!(ExperimentState::default(), ExperimentState::Unknown);
        assert_eq!(WorkflowNodeState::default(), WorkflowNodeState::Unknown);
        assert_eq!(TaskState::default(), TaskState::Unknown);
        assert_eq!(JobState::default(), JobState::Unknown);
        assert_eq!(TransferState::default(), TransferState::Unknown);
    }

    #[test]
    fn test_error_details_defaults() {
        let error = ErrorDetails::new("walltime exceeded");
        assert_eq!(error.corrective_action, CorrectiveAction::ContactSupport);
        assert_eq!(error.actionable_group, ActionableGroup::GatewayAdmins);
        assert_eq!(error.category, ErrorCategory::Other);
        assert!(!error.transient);
        assert!(error.error_id.is_empty());
    }

    #[test]
    fn test_status_type_strings() {
        assert_eq!(StatusType::Experiment.as_str(), "EXPERIMENT");
        assert_eq!(StatusType::WorkflowNode.as_str(), "WORKFLOW_NODE");
        assert_eq!(StatusType::DataTransfer.as_str(), "DATA_TRANSFER");
    }

    #[test]
    fn test_entity_serde_round_trip() {
        let experiment = Experiment {
            experiment_id: "exp_1".to_string(),
            name: "Gaussian run".to_string(),
            user_name: "alice".to_string(),
            gateway_id: "chem-gateway".to_string(),
            creation_time: Utc::now(),
            inputs: vec![DataObject {
                name: "molecule".to_string(),
                value: "benzene.xyz".to_string(),
                data_type: DataType::Uri,
                metadata: None,
            }],
            outputs: vec![],
            nodes: vec![],
        };
        let json = serde_json::to_value(&experiment).unwrap();
        let back: Experiment = serde_json::from_value(json).unwrap();
        assert_eq!(back, experiment);
    }
}
