// src/flow.rs

use std::{collections::HashSet, fs, path::Path};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod resolver;
pub mod session;
pub mod store;

/// A published flow: the read-only document a conversation runs against.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FlowDocument {
    pub flow_id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<Group>,
}

/// An ordered container of blocks
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub blocks: Vec<Block>,
}

/// Block kinds, discriminated by their `type` key
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    Text(TextBlock),
    FileInput(FileInputBlock),
    FlowLink(FlowLinkBlock),
    Wait(WaitBlock),
}

impl Block {
    pub fn id(&self) -> &str {
        match self {
            Block::Text(b) => &b.id,
            Block::FileInput(b) => &b.id,
            Block::FlowLink(b) => &b.id,
            Block::Wait(b) => &b.id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TextBlock {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outgoing_edge_id: Option<String>,
    #[serde(default)]
    pub options: TextOptions,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TextOptions {
    #[serde(default)]
    pub text: String,
}

/// Collects one or more files from the user
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FileInputBlock {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outgoing_edge_id: Option<String>,
    #[serde(default)]
    pub options: FileInputOptions,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FileInputOptions {
    #[serde(default)]
    pub is_required: bool,
    #[serde(default)]
    pub is_multiple_allowed: bool,
}

/// Hands the conversation over to another published flow
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FlowLinkBlock {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outgoing_edge_id: Option<String>,
    #[serde(default)]
    pub options: FlowLinkOptions,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FlowLinkOptions {
    /// Target flow; an unset target links nowhere.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
}

/// Pauses the conversation on the client for a number of seconds
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WaitBlock {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outgoing_edge_id: Option<String>,
    #[serde(default)]
    pub options: WaitOptions,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WaitOptions {
    /// May contain `{{variable}}` references.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seconds_to_wait_for: Option<String>,
    #[serde(default)]
    pub should_pause: bool,
}

impl FlowDocument {
    pub fn new(flow_id: impl Into<String>, groups: Vec<Group>) -> Self {
        Self {
            flow_id: flow_id.into(),
            groups,
        }
    }

    /// Every block of every group, in document order.
    pub fn blocks(&self) -> impl Iterator<Item = &Block> {
        self.groups.iter().flat_map(|group| group.blocks.iter())
    }

    pub fn find_block(&self, block_id: &str) -> Option<&Block> {
        self.blocks().find(|block| block.id() == block_id)
    }

    /// Target ids of all flow-link blocks that point somewhere.
    pub fn linked_flow_ids(&self) -> Vec<String> {
        self.blocks()
            .filter_map(|block| match block {
                Block::FlowLink(link) => link.options.flow_id.clone(),
                _ => None,
            })
            .collect()
    }

    pub fn validate(&self) -> Result<(), FlowError> {
        if self.flow_id.trim().is_empty() {
            return Err(FlowError::MissingFlowId);
        }
        let mut seen = HashSet::new();
        for block in self.blocks() {
            if !seen.insert(block.id()) {
                return Err(FlowError::DuplicateBlockId {
                    flow_id: self.flow_id.clone(),
                    block_id: block.id().to_string(),
                });
            }
        }
        Ok(())
    }

    /// Reads a `.json`, `.yaml` or `.yml` flow file and validates it.
    pub fn load_from_file(path: &Path) -> Result<Self, FlowError> {
        let content = fs::read_to_string(path)
            .map_err(|e| FlowError::Io(format!("{}: {}", path.display(), e)))?;
        let flow: FlowDocument = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&content)
                .map_err(|e| FlowError::Serialization(format!("{}: {}", path.display(), e)))?,
            Some("yaml") | Some("yml") => serde_yaml_bw::from_str(&content)
                .map_err(|e| FlowError::Serialization(format!("{}: {}", path.display(), e)))?,
            _ => return Err(FlowError::UnsupportedFormat(path.display().to_string())),
        };
        flow.validate()?;
        Ok(flow)
    }

    pub fn save_to_file(&self, path: &Path) -> Result<(), FlowError> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| FlowError::Serialization(e.to_string()))?;
        fs::write(path, json).map_err(|e| FlowError::Io(e.to_string()))
    }
}

pub fn is_flow_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("json") | Some("yaml") | Some("yml")
    )
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum FlowError {
    #[error("I/O error: {0}")]
    Io(String),
    #[error("parse error: {0}")]
    Serialization(String),
    #[error("unsupported flow file: {0}")]
    UnsupportedFormat(String),
    #[error("flow document has no flowId")]
    MissingFlowId,
    #[error("block `{block_id}` appears more than once in flow `{flow_id}`")]
    DuplicateBlockId { flow_id: String, block_id: String },
}
