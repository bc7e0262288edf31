// src/schema.rs

use std::{fs, path::Path};

use anyhow::Error;
use schemars::schema_for;

use crate::{
    executor::ExecuteLogicResponse, flow::FlowDocument, flow::session::SessionState,
    server::UploadUrlResponse,
};

pub const SCHEMA_FILES: [&str; 4] = [
    "flow.schema.json",
    "session-state.schema.json",
    "logic-response.schema.json",
    "upload-url-response.schema.json",
];

/// Writes the JSON Schemas of the public documents into `out_dir`.
pub fn write_schema(out_dir: &Path) -> Result<(), Error> {
    fs::create_dir_all(out_dir)?;

    let schemas = [
        serde_json::to_string_pretty(&schema_for!(FlowDocument))?,
        serde_json::to_string_pretty(&schema_for!(SessionState))?,
        serde_json::to_string_pretty(&schema_for!(ExecuteLogicResponse))?,
        serde_json::to_string_pretty(&schema_for!(UploadUrlResponse))?,
    ];
    for (file, schema) in SCHEMA_FILES.iter().zip(schemas) {
        fs::write(out_dir.join(file), schema)?;
    }

    Ok(())
}
