//! State machine for the bounded round-trip analysis protocol.
//!
//! The conversation with the model is a short loop: ask, maybe resolve one
//! tool request, ask again, and give up after a fixed number of rounds.
//! The states and transitions live here so the round cap and the
//! forbid-on-last-round policy are testable without any network mocking.

/// Default number of model round-trips per pass.
pub const DEFAULT_MAX_ROUNDS: usize = 3;

/// Whether the file-fetch capability is offered to the model this round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolAccess {
    /// Model may call the tool or answer directly.
    Auto,
    /// Tool withheld; the model must produce a final answer.
    Forbidden,
}

/// Tool access policy for a 1-based round number: the tool is withheld on
/// the final round so the loop always terminates with a usable answer.
pub fn tool_access_for_round(round: usize, max_rounds: usize) -> ToolAccess {
    if round >= max_rounds {
        ToolAccess::Forbidden
    } else {
        ToolAccess::Auto
    }
}

/// What the model's reply amounted to, after parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelTurn {
    /// A final structured payload that parsed against the verdict schema.
    FinalAnswer,
    /// A request to invoke the file-fetch capability.
    ToolRequest,
    /// Nothing usable: empty content, malformed JSON, transport error.
    Unusable,
}

/// Protocol state. Round numbers are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolState {
    AwaitingModel { round: usize },
    AwaitingToolResult { round: usize },
    Done,
    Degraded,
}

impl ProtocolState {
    pub fn start() -> Self {
        ProtocolState::AwaitingModel { round: 1 }
    }

    /// Apply the model's reply for the current round.
    pub fn on_model_turn(self, turn: ModelTurn, max_rounds: usize) -> Self {
        match self {
            ProtocolState::AwaitingModel { round } => match turn {
                ModelTurn::FinalAnswer => ProtocolState::Done,
                ModelTurn::ToolRequest if round < max_rounds => {
                    ProtocolState::AwaitingToolResult { round }
                }
                // Tool call on the forbidden final round, or garbage with no
                // rounds left: give up.
                ModelTurn::ToolRequest => ProtocolState::Degraded,
                ModelTurn::Unusable if round < max_rounds => {
                    ProtocolState::AwaitingModel { round: round + 1 }
                }
                ModelTurn::Unusable => ProtocolState::Degraded,
            },
            other => other,
        }
    }

    /// Tool output has been appended to the conversation; ask again.
    pub fn on_tool_resolved(self) -> Self {
        match self {
            ProtocolState::AwaitingToolResult { round } => {
                ProtocolState::AwaitingModel { round: round + 1 }
            }
            other => other,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ProtocolState::Done | ProtocolState::Degraded)
    }
}
