use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Kind of a queue task -- selects the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    BuildContainer,
    RestartPedestal,
    FaultInjection,
    BuildDatapack,
    RunAlgorithm,
    CollectResult,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::BuildContainer => "build_container",
            Self::RestartPedestal => "restart_pedestal",
            Self::FaultInjection => "fault_injection",
            Self::BuildDatapack => "build_datapack",
            Self::RunAlgorithm => "run_algorithm",
            Self::CollectResult => "collect_result",
        };
        f.write_str(s)
    }
}

impl FromStr for TaskKind {
    type Err = TaskKindParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "build_container" => Ok(Self::BuildContainer),
            "restart_pedestal" => Ok(Self::RestartPedestal),
            "fault_injection" => Ok(Self::FaultInjection),
            "build_datapack" => Ok(Self::BuildDatapack),
            "run_algorithm" => Ok(Self::RunAlgorithm),
            "collect_result" => Ok(Self::CollectResult),
            other => Err(TaskKindParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`TaskKind`] string.
#[derive(Debug, Clone)]
pub struct TaskKindParseError(pub String);

impl fmt::Display for TaskKindParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid task kind: {:?}", self.0)
    }
}

impl std::error::Error for TaskKindParseError {}

// ---------------------------------------------------------------------------

/// State of a queue task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Running,
    Completed,
    Error,
    Rescheduled,
    Cancelled,
}

impl TaskState {
    /// A terminal task is never reopened.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error | Self::Cancelled)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Error => "error",
            Self::Rescheduled => "rescheduled",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

impl FromStr for TaskState {
    type Err = TaskStateParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "error" => Ok(Self::Error),
            "rescheduled" => Ok(Self::Rescheduled),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(TaskStateParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`TaskState`] string.
#[derive(Debug, Clone)]
pub struct TaskStateParseError(pub String);

impl fmt::Display for TaskStateParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid task state: {:?}", self.0)
    }
}

impl std::error::Error for TaskStateParseError {}

// ---------------------------------------------------------------------------

/// Kind of a trace -- determines the height of its pipeline tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TraceKind {
    FullPipeline,
    FaultInjection,
    DatapackBuild,
    AlgorithmRun,
}

impl TraceKind {
    /// Number of levels in this trace's pipeline tree.
    pub fn tree_height(self) -> i32 {
        match self {
            Self::FullPipeline => 7,
            Self::FaultInjection => 5,
            Self::DatapackBuild => 3,
            Self::AlgorithmRun => 2,
        }
    }
}

impl fmt::Display for TraceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::FullPipeline => "full_pipeline",
            Self::FaultInjection => "fault_injection",
            Self::DatapackBuild => "datapack_build",
            Self::AlgorithmRun => "algorithm_run",
        };
        f.write_str(s)
    }
}

impl FromStr for TraceKind {
    type Err = TraceKindParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full_pipeline" => Ok(Self::FullPipeline),
            "fault_injection" => Ok(Self::FaultInjection),
            "datapack_build" => Ok(Self::DatapackBuild),
            "algorithm_run" => Ok(Self::AlgorithmRun),
            other => Err(TraceKindParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`TraceKind`] string.
#[derive(Debug, Clone)]
pub struct TraceKindParseError(pub String);

impl fmt::Display for TraceKindParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid trace kind: {:?}", self.0)
    }
}

impl std::error::Error for TraceKindParseError {}

// ---------------------------------------------------------------------------

/// Aggregate state of a trace, derived from its tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TraceState {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TraceState {
    /// Once a trace is terminal it stays there.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for TraceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

impl FromStr for TraceState {
    type Err = TraceStateParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(TraceStateParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`TraceState`] string.
#[derive(Debug, Clone)]
pub struct TraceStateParseError(pub String);

impl fmt::Display for TraceStateParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid trace state: {:?}", self.0)
    }
}

impl std::error::Error for TraceStateParseError {}

// ---------------------------------------------------------------------------

/// Queue tier recorded in the task index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum QueueTier {
    Ready,
    Delayed,
    Dead,
}

impl fmt::Display for QueueTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Ready => "ready",
            Self::Delayed => "delayed",
            Self::Dead => "dead",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------

/// Named rate-limited service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RateService {
    RestartPedestal,
    BuildContainer,
    AlgoExecution,
}

impl fmt::Display for RateService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::RestartPedestal => "restart_pedestal",
            Self::BuildContainer => "build_container",
            Self::AlgoExecution => "algo_execution",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------

/// Lifecycle status of a namespace in the lock pool.
///
/// Stored as an integer code: enabled=1, disabled=2, deleted=3.
/// `Disabled` means removed from config but currently leased; `Deleted`
/// means removed from config and free.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NamespaceStatus {
    Enabled,
    Disabled,
    Deleted,
}

impl NamespaceStatus {
    pub fn code(self) -> i32 {
        match self {
            Self::Enabled => 1,
            Self::Disabled => 2,
            Self::Deleted => 3,
        }
    }
}

impl TryFrom<i32> for NamespaceStatus {
    type Error = NamespaceStatusError;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(Self::Enabled),
            2 => Ok(Self::Disabled),
            3 => Ok(Self::Deleted),
            other => Err(NamespaceStatusError(other)),
        }
    }
}

impl fmt::Display for NamespaceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Enabled => "enabled",
            Self::Disabled => "disabled",
            Self::Deleted => "deleted",
        };
        f.write_str(s)
    }
}

/// Error returned for an unknown namespace status code.
#[derive(Debug, Clone)]
pub struct NamespaceStatusError(pub i32);

impl fmt::Display for NamespaceStatusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid namespace status code: {}", self.0)
    }
}

impl std::error::Error for NamespaceStatusError {}

// ---------------------------------------------------------------------------

/// State of a fault-injection row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum InjectionState {
    Initial,
    InjectSuccess,
    InjectFailed,
    BuildSuccess,
    BuildFailed,
}

impl fmt::Display for InjectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Initial => "initial",
            Self::InjectSuccess => "inject_success",
            Self::InjectFailed => "inject_failed",
            Self::BuildSuccess => "build_success",
            Self::BuildFailed => "build_failed",
        };
        f.write_str(s)
    }
}

impl FromStr for InjectionState {
    type Err = InjectionStateParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initial" => Ok(Self::Initial),
            "inject_success" => Ok(Self::InjectSuccess),
            "inject_failed" => Ok(Self::InjectFailed),
            "build_success" => Ok(Self::BuildSuccess),
            "build_failed" => Ok(Self::BuildFailed),
            other => Err(InjectionStateParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`InjectionState`] string.
#[derive(Debug, Clone)]
pub struct InjectionStateParseError(pub String);

impl fmt::Display for InjectionStateParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid injection state: {:?}", self.0)
    }
}

impl std::error::Error for InjectionStateParseError {}

// ---------------------------------------------------------------------------

/// State of an algorithm execution row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    Initial,
    Success,
    Failed,
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Initial => "initial",
            Self::Success => "success",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Row structs
// ---------------------------------------------------------------------------

/// A queue task -- the unit of work dispatched by the consumer.
///
/// The same struct serves as the database row and the serialised queue
/// entry (the queue tiers store it as JSON).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Task {
    pub id: Uuid,
    pub kind: TaskKind,
    pub state: TaskState,
    pub payload: serde_json::Value,
    pub immediate: bool,
    pub execute_at: DateTime<Utc>,
    pub cron_expr: Option<String>,
    pub max_attempts: i32,
    pub backoff_secs: i32,
    pub restart_num: i32,
    pub parent_task_id: Option<Uuid>,
    pub trace_id: Uuid,
    pub group_id: Uuid,
    pub project_id: String,
    pub user_id: String,
    pub sequence: i32,
    pub level: i32,
    pub trace_carrier: serde_json::Value,
    pub task_carrier: serde_json::Value,
    pub error_log: serde_json::Value,
    #[serde(default)]
    pub last_event: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// A trace -- one pipeline instance, a tree of tasks.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Trace {
    pub id: Uuid,
    pub kind: TraceKind,
    pub state: TraceState,
    pub last_event: Option<String>,
    pub group_id: Uuid,
    pub project_id: String,
    pub user_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// A namespace row in the lock pool.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Namespace {
    pub name: String,
    pub status: i32,
    pub lease_until: i64,
    pub trace_id: String,
}

impl Namespace {
    pub fn status_enum(&self) -> Result<NamespaceStatus, NamespaceStatusError> {
        NamespaceStatus::try_from(self.status)
    }
}

/// A held rate-limit token.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RateToken {
    pub service: RateService,
    pub task_id: Uuid,
    pub trace_id: Uuid,
    pub acquired_at: DateTime<Utc>,
}

/// An event appended to a trace's stream log.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct StreamEvent {
    pub id: i64,
    pub trace_id: Uuid,
    pub task_id: Uuid,
    pub task_kind: String,
    pub event: String,
    pub payload: serde_json::Value,
    pub file: String,
    pub line: i32,
    pub func: String,
    pub recorded_at: DateTime<Utc>,
}

/// A fault-injection batch row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Injection {
    pub id: Uuid,
    pub name: String,
    pub fault_type: String,
    pub category: String,
    pub engine_config: serde_json::Value,
    pub display_config: serde_json::Value,
    pub groundtruths: serde_json::Value,
    pub pre_duration: i32,
    pub state: InjectionState,
    pub task_id: Uuid,
    pub benchmark_id: String,
    pub pedestal_id: String,
    pub resource_name: String,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// An algorithm execution row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Execution {
    pub id: Uuid,
    pub algorithm_version_id: String,
    pub datapack_id: String,
    pub dataset_version_id: String,
    pub state: ExecutionState,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

/// A detector-algorithm result row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DetectorResult {
    pub id: i64,
    pub execution_id: Uuid,
    pub span_name: String,
    pub issue_count: i32,
    pub abnormal_avg: Option<f64>,
    pub normal_avg: Option<f64>,
    pub recorded_at: DateTime<Utc>,
}

/// A granularity (RCA ranking) result row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct GranularityResult {
    pub id: i64,
    pub execution_id: Uuid,
    pub granularity: String,
    pub result: String,
    pub rank: i32,
    pub confidence: Option<f64>,
    pub recorded_at: DateTime<Utc>,
}

/// A named container image with command and env-var schema.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ContainerVersion {
    pub id: Uuid,
    pub name: String,
    pub version: String,
    pub image_ref: String,
    pub command: String,
    pub env_schema: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// A label attached to injections or datapacks.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Label {
    pub id: Uuid,
    pub key: String,
    pub value: String,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_kind_display_roundtrip() {
        let variants = [
            TaskKind::BuildContainer,
            TaskKind::RestartPedestal,
            TaskKind::FaultInjection,
            TaskKind::BuildDatapack,
            TaskKind::RunAlgorithm,
            TaskKind::CollectResult,
        ];
        for v in &variants {
            let s = v.to_string();
            let parsed: TaskKind = s.parse().expect("should parse");
            assert_eq!(*v, parsed);
        }
    }

    #[test]
    fn task_kind_invalid() {
        let result = "bogus".parse::<TaskKind>();
        assert!(result.is_err());
    }

    #[test]
    fn task_state_display_roundtrip() {
        let variants = [
            TaskState::Pending,
            TaskState::Running,
            TaskState::Completed,
            TaskState::Error,
            TaskState::Rescheduled,
            TaskState::Cancelled,
        ];
        for v in &variants {
            let s = v.to_string();
            let parsed: TaskState = s.parse().expect("should parse");
            assert_eq!(*v, parsed);
        }
    }

    #[test]
    fn task_state_terminality() {
        assert!(TaskState::Completed.is_terminal());
        assert!(TaskState::Error.is_terminal());
        assert!(TaskState::Cancelled.is_terminal());
        assert!(!TaskState::Pending.is_terminal());
        assert!(!TaskState::Running.is_terminal());
        assert!(!TaskState::Rescheduled.is_terminal());
    }

    #[test]
    fn trace_kind_tree_heights() {
        assert_eq!(TraceKind::FullPipeline.tree_height(), 7);
        assert_eq!(TraceKind::FaultInjection.tree_height(), 5);
        assert_eq!(TraceKind::DatapackBuild.tree_height(), 3);
        assert_eq!(TraceKind::AlgorithmRun.tree_height(), 2);
    }

    #[test]
    fn trace_state_display_roundtrip() {
        let variants = [
            TraceState::Pending,
            TraceState::Running,
            TraceState::Completed,
            TraceState::Failed,
        ];
        for v in &variants {
            let s = v.to_string();
            let parsed: TraceState = s.parse().expect("should parse");
            assert_eq!(*v, parsed);
        }
    }

    #[test]
    fn namespace_status_codes() {
        assert_eq!(NamespaceStatus::Enabled.code(), 1);
        assert_eq!(NamespaceStatus::Disabled.code(), 2);
        assert_eq!(NamespaceStatus::Deleted.code(), 3);
        for code in 1..=3 {
            let status = NamespaceStatus::try_from(code).expect("valid code");
            assert_eq!(status.code(), code);
        }
        assert!(NamespaceStatus::try_from(0).is_err());
        assert!(NamespaceStatus::try_from(4).is_err());
    }

    #[test]
    fn injection_state_roundtrip() {
        let variants = [
            InjectionState::Initial,
            InjectionState::InjectSuccess,
            InjectionState::InjectFailed,
            InjectionState::BuildSuccess,
            InjectionState::BuildFailed,
        ];
        for v in &variants {
            let s = v.to_string();
            let parsed: InjectionState = s.parse().expect("should parse");
            assert_eq!(*v, parsed);
        }
    }

    #[test]
    fn task_serialises_for_queue() {
        let task = Task {
            id: Uuid::now_v7(),
            kind: TaskKind::RestartPedestal,
            state: TaskState::Pending,
            payload: serde_json::json!({"pedestal": {"name": "ts"}}),
            immediate: false,
            execute_at: Utc::now(),
            cron_expr: None,
            max_attempts: 2,
            backoff_secs: 5,
            restart_num: 0,
            parent_task_id: None,
            trace_id: Uuid::now_v7(),
            group_id: Uuid::now_v7(),
            project_id: "p".into(),
            user_id: "u".into(),
            sequence: 0,
            level: 1,
            trace_carrier: serde_json::json!({}),
            task_carrier: serde_json::json!({}),
            error_log: serde_json::json!([]),
            last_event: String::new(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        };
        let json = serde_json::to_value(&task).expect("serialise");
        let back: Task = serde_json::from_value(json).expect("deserialise");
        assert_eq!(back.id, task.id);
        assert_eq!(back.kind, task.kind);
    }
}
