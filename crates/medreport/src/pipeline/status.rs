use serde::{Deserialize, Serialize};

/// Pipeline stage an item failure is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Validate,
    Generate,
    Render,
    Send,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Validate => "validate",
            Stage::Generate => "generate",
            Stage::Render => "render",
            Stage::Send => "send",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of one item within a batch run.
///
/// Forward transitions advance exactly one step. `Failed` is reachable from
/// every non-terminal status, and `Sent`/`Failed` never change again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PipelineItemStatus {
    Pending,
    Generating,
    Generated,
    Rendering,
    Rendered,
    Sending,
    Sent,
    Failed {
        stage: Stage,
        code: String,
        reason: String,
    },
}

impl PipelineItemStatus {
    pub fn failed(stage: Stage, code: &str, reason: &str) -> Self {
        PipelineItemStatus::Failed {
            stage,
            code: code.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PipelineItemStatus::Sent | PipelineItemStatus::Failed { .. }
        )
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, PipelineItemStatus::Failed { .. })
    }

    /// The single forward step from this status, if any.
    pub fn next(&self) -> Option<PipelineItemStatus> {
        match self {
            PipelineItemStatus::Pending => Some(PipelineItemStatus::Generating),
            PipelineItemStatus::Generating => Some(PipelineItemStatus::Generated),
            PipelineItemStatus::Generated => Some(PipelineItemStatus::Rendering),
            PipelineItemStatus::Rendering => Some(PipelineItemStatus::Rendered),
            PipelineItemStatus::Rendered => Some(PipelineItemStatus::Sending),
            PipelineItemStatus::Sending => Some(PipelineItemStatus::Sent),
            PipelineItemStatus::Sent | PipelineItemStatus::Failed { .. } => None,
        }
    }

    pub fn can_transition_to(&self, target: &PipelineItemStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match target {
            PipelineItemStatus::Failed { .. } => true,
            _ => self.next().as_ref() == Some(target),
        }
    }

    /// Short lowercase label without failure details.
    pub fn label(&self) -> &'static str {
        match self {
            PipelineItemStatus::Pending => "pending",
            PipelineItemStatus::Generating => "generating",
            PipelineItemStatus::Generated => "generated",
            PipelineItemStatus::Rendering => "rendering",
            PipelineItemStatus::Rendered => "rendered",
            PipelineItemStatus::Sending => "sending",
            PipelineItemStatus::Sent => "sent",
            PipelineItemStatus::Failed { .. } => "failed",
        }
    }

    /// Failure reason for `Failed` statuses.
    pub fn reason(&self) -> Option<&str> {
        match self {
            PipelineItemStatus::Failed { reason, .. } => Some(reason),
            _ => None,
        }
    }
}

impl std::fmt::Display for PipelineItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineItemStatus::Failed { stage, code, .. } => {
                write!(f, "failed({}, {})", stage, code)
            }
            other => f.write_str(other.label()),
        }
    }
}
