use std::path::PathBuf;

use anyhow::bail;
use clap::{Args, Subcommand};

use super::CliContext;
use botflow::flow::{
    FlowDocument,
    resolver::resolve_file_upload_block,
    store::{FlowDirectory, FlowStore, InMemoryFlowStore},
};

#[derive(Args, Debug)]
pub struct FlowArgs {
    #[command(subcommand)]
    pub command: FlowCommands,
}

#[derive(Subcommand, Debug)]
pub enum FlowCommands {
    /// Parse and validate a flow file
    Validate { file: PathBuf },
    /// Look up a file upload block the way the upload endpoint does
    Resolve { flow_id: String, block_id: String },
}

pub async fn execute(args: FlowArgs, context: &CliContext) -> anyhow::Result<()> {
    match args.command {
        FlowCommands::Validate { file } => {
            let flow = FlowDocument::load_from_file(&file)?;
            println!(
                "✅ Flow `{}` is valid ({} blocks, {} linked flows).",
                flow.flow_id,
                flow.blocks().count(),
                flow.linked_flow_ids().len()
            );
            Ok(())
        }
        FlowCommands::Resolve { flow_id, block_id } => {
            let store = InMemoryFlowStore::new();
            FlowDirectory::new(store.clone()).load_all(&context.flows_dir())?;

            let Some(root) = store.find_one_by_flow_id(&flow_id).await? else {
                bail!("Published flow `{flow_id}` not found in {}", context.flows_dir().display());
            };
            match resolve_file_upload_block(store.as_ref(), &root, &block_id).await? {
                Some(block) => {
                    println!("{}", serde_json::to_string_pretty(&block)?);
                    Ok(())
                }
                None => bail!("File upload block `{block_id}` not found from flow `{flow_id}`"),
            }
        }
    }
}
