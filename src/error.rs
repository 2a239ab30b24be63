// error.rs
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Every error the engine can surface, grouped by the phase that raised it.
///
/// Each variant carries a stable `FM-xxxx` code via [`FileMoverError::code`]
/// so callers (CLI, future GUI) can branch on machine-readable identity
/// without matching on the Display string.
#[derive(Error, Debug)]
pub enum FileMoverError {
    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid rule '{rule_id}': {reason}")]
    InvalidRule { rule_id: String, reason: String },

    #[error("duplicate rule id '{0}'")]
    DuplicateRuleId(String),

    #[error("root does not exist: {0}")]
    MissingRoot(PathBuf),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] serde_json::Error),

    #[error("unknown template token '{0}'")]
    UnknownToken(String),

    #[error("access denied: {0}")]
    AccessDenied(PathBuf),

    #[error("reparse point could not be resolved: {0}")]
    Offline(PathBuf),

    #[error("plan conflict is unresolvable: destination {0} is inside its own source")]
    DestInsideSource(PathBuf),

    #[error("plan conflict is unresolvable: cycle detected between {0} and {1}")]
    CycleDetected(PathBuf, PathBuf),

    #[error("template expansion failed for rule '{rule_id}': {reason}")]
    TemplateExpansion { rule_id: String, reason: String },

    #[error("sharing violation on {0}")]
    SharingViolation(PathBuf),

    #[error("network hiccup on {0}")]
    NetworkHiccup(PathBuf),

    #[error("not enough space: need {required}, have {available}")]
    NoSpace { required: u64, available: u64 },

    #[error("read-only volume: {0}")]
    ReadOnlyVolume(PathBuf),

    #[error("cross-volume move disallowed for {0}")]
    CrossVolumeDisallowed(PathBuf),

    #[error("invalid name for destination entry: {0}")]
    InvalidName(String),

    #[error("undo: destination missing for {0}")]
    MissingDestination(PathBuf),

    #[error("undo: destination modified after move: {0}")]
    ModifiedPostMove(PathBuf),

    #[error("undo: operation '{0:?}' cannot be inverted")]
    InverseUnsupported(crate::model::OpKind),

    #[error("journal could not be written: {0}")]
    JournalFatal(String),

    #[error("glob error: {0}")]
    Glob(#[from] globset::Error),

    #[error("regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("operation was cancelled")]
    Cancelled,
}

impl FileMoverError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Stable machine-readable code, `FM-` followed by a four-digit number.
    /// Grouped loosely by the error kinds of spec §7: 1xxx Config,
    /// 2xxx Scan, 3xxx Plan, 4xxx Execution, 5xxx Undo, 9xxx generic/I-O.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Io { .. } => "FM-9001",
            Self::InvalidRule { .. } => "FM-1001",
            Self::DuplicateRuleId(_) => "FM-1002",
            Self::MissingRoot(_) => "FM-1003",
            Self::ConfigParse(_) => "FM-1004",
            Self::UnknownToken(_) => "FM-1005",
            Self::AccessDenied(_) => "FM-2001",
            Self::Offline(_) => "FM-2002",
            Self::DestInsideSource(_) => "FM-3001",
            Self::CycleDetected(_, _) => "FM-3002",
            Self::TemplateExpansion { .. } => "FM-3003",
            Self::SharingViolation(_) => "FM-4001",
            Self::NetworkHiccup(_) => "FM-4002",
            Self::NoSpace { .. } => "FM-4003",
            Self::ReadOnlyVolume(_) => "FM-4004",
            Self::CrossVolumeDisallowed(_) => "FM-4005",
            Self::InvalidName(_) => "FM-4006",
            Self::MissingDestination(_) => "FM-5001",
            Self::ModifiedPostMove(_) => "FM-5002",
            Self::InverseUnsupported(_) => "FM-5003",
            Self::JournalFatal(_) => "FM-5999",
            Self::Glob(_) => "FM-1006",
            Self::Regex(_) => "FM-1007",
            Self::Cancelled => "FM-4999",
        }
    }

    /// Whether the Executor should retry this with backoff (spec §4.5,
    /// §7 "Transient" vs "Permanent").
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::SharingViolation(_) | Self::NetworkHiccup(_) | Self::Offline(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, FileMoverError>;
