use tracing::debug;

use crate::flow::{
    Block, FileInputBlock, FlowDocument,
    store::{FlowStore, StoreError},
};

/// Finds the file-upload block `block_id` in `root` or, failing that, in the
/// flows `root` links to directly. Links inside linked flows are not followed.
///
/// A root block with the right id but the wrong kind does not stop the
/// search: the linked flows are still consulted. Linked flows are fetched in
/// a single store call, and only when the root flow has no match.
pub async fn resolve_file_upload_block(
    store: &dyn FlowStore,
    root: &FlowDocument,
    block_id: &str,
) -> Result<Option<FileInputBlock>, StoreError> {
    if let Some(found) = as_file_input(root.find_block(block_id)) {
        return Ok(Some(found));
    }

    let linked_ids = root.linked_flow_ids();
    if linked_ids.is_empty() {
        debug!(flow_id = %root.flow_id, %block_id, "no file upload block and no linked flows");
        return Ok(None);
    }

    let linked = store.find_many_by_flow_ids(&linked_ids).await?;
    debug!(
        flow_id = %root.flow_id,
        %block_id,
        requested = linked_ids.len(),
        fetched = linked.len(),
        "searching linked flows"
    );
    let candidate = linked
        .iter()
        .flat_map(|flow| flow.blocks())
        .find(|block| block.id() == block_id);

    Ok(as_file_input(candidate))
}

fn as_file_input(block: Option<&Block>) -> Option<FileInputBlock> {
    match block {
        Some(Block::FileInput(file)) => Some(file.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::{
        FileInputOptions, FlowLinkBlock, FlowLinkOptions, Group, TextBlock, TextOptions,
        store::InMemoryFlowStore,
    };

    fn file(id: &str) -> Block {
        Block::FileInput(FileInputBlock {
            id: id.into(),
            outgoing_edge_id: Some(format!("{id}-edge")),
            options: FileInputOptions::default(),
        })
    }

    fn link(id: &str, target: Option<&str>) -> Block {
        Block::FlowLink(FlowLinkBlock {
            id: id.into(),
            outgoing_edge_id: None,
            options: FlowLinkOptions {
                flow_id: target.map(str::to_string),
                group_id: None,
            },
        })
    }

    fn flow(id: &str, blocks: Vec<Block>) -> FlowDocument {
        FlowDocument::new(
            id,
            vec![Group {
                id: format!("{id}-group"),
                title: String::new(),
                blocks,
            }],
        )
    }

    #[tokio::test]
    async fn test_unset_link_targets_are_ignored() {
        let store = InMemoryFlowStore::new();
        store.publish(flow("child", vec![file("upload")]));
        let root = flow("root", vec![link("l1", None)]);

        let found = resolve_file_upload_block(store.as_ref(), &root, "upload").await.unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn test_first_linked_match_decides() {
        // The first block carrying the id wins even if a later linked flow
        // has a file-upload block with the same id.
        let store = InMemoryFlowStore::new();
        store.publish(flow(
            "a",
            vec![Block::Text(TextBlock {
                id: "dup".into(),
                outgoing_edge_id: None,
                options: TextOptions::default(),
            })],
        ));
        store.publish(flow("b", vec![file("dup")]));
        let root = flow("root", vec![link("l1", Some("a")), link("l2", Some("b"))]);

        let found = resolve_file_upload_block(store.as_ref(), &root, "dup").await.unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn test_links_are_followed_one_hop_only() {
        let store = InMemoryFlowStore::new();
        store.publish(flow("child", vec![link("deeper", Some("grandchild"))]));
        store.publish(flow("grandchild", vec![file("upload")]));
        let root = flow("root", vec![link("l1", Some("child"))]);

        let found = resolve_file_upload_block(store.as_ref(), &root, "upload").await.unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn test_dangling_links_are_not_errors() {
        let store = InMemoryFlowStore::new();
        store.publish(flow("child", vec![file("upload")]));
        let root = flow("root", vec![link("l1", Some("ghost")), link("l2", Some("child"))]);

        let found = resolve_file_upload_block(store.as_ref(), &root, "upload").await.unwrap();
        assert_eq!(found.map(|b| b.id), Some("upload".to_string()));
    }
}
