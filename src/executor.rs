use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    flow::{Block, WaitBlock, session::SessionState},
    variables::{parse_variables, safe_parse_int},
};

/// What a logic block hands back to the engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteLogicResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outgoing_edge_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_side_actions: Option<Vec<ClientSideAction>>,
}

/// Instructions for the conversation front-end.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(untagged)]
pub enum ClientSideAction {
    #[serde(rename_all = "camelCase")]
    Wait {
        wait: WaitAction,
        expects_dedicated_reply: bool,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WaitAction {
    pub seconds_to_wait_for: u64,
}

impl ExecuteLogicResponse {
    pub fn continue_via(outgoing_edge_id: Option<String>) -> Self {
        Self {
            outgoing_edge_id,
            client_side_actions: None,
        }
    }
}

/// Runs a logic block. `None` for blocks the engine handles elsewhere.
pub fn execute_logic_block(state: &SessionState, block: &Block) -> Option<ExecuteLogicResponse> {
    match block {
        Block::Wait(wait) => Some(execute_wait(state, wait)),
        Block::Text(_) | Block::FileInput(_) | Block::FlowLink(_) => None,
    }
}

/// Turns a wait block into a client-side wait action.
///
/// The duration is rendered against the active flow's variables and read as
/// a leading-digits integer. Any value `>= 0` emits a wait, so `0` still
/// yields an action. Negative or unparsable values only continue on the
/// outgoing edge. This is a deliberate sign check, not a truthiness check:
/// `-3` skips the wait and `0` does not.
pub fn execute_wait(state: &SessionState, block: &WaitBlock) -> ExecuteLogicResponse {
    let continue_only = ExecuteLogicResponse::continue_via(block.outgoing_edge_id.clone());

    let expression = match block.options.seconds_to_wait_for.as_deref() {
        Some(expr) if !expr.is_empty() => expr,
        _ => return continue_only,
    };

    let rendered = parse_variables(state.active_variables(), expression);
    let seconds = match safe_parse_int(&rendered).and_then(|n| u64::try_from(n).ok()) {
        Some(seconds) => seconds,
        None => {
            debug!(block_id = %block.id, %expression, %rendered, "wait duration is not a number, skipping wait");
            return continue_only;
        }
    };

    ExecuteLogicResponse {
        client_side_actions: Some(vec![ClientSideAction::Wait {
            wait: WaitAction {
                seconds_to_wait_for: seconds,
            },
            expects_dedicated_reply: block.options.should_pause,
        }]),
        ..continue_only
    }
}
