//! Nesting depth of embed blocks.
//!
//! Depth is read from the real tree structure, counting every ancestor that is an
//! embed block whether or not it has been augmented yet. Overlay markers are
//! never consulted, so depth cannot go stale when augmentation lags rendering.

use crate::classifier::is_embed_block;
use crate::dom::{Document, NodeId};

/// Deepest styled tier; deeper embeds share it.
pub const MAX_DEPTH: usize = 3;

/// Number of embed blocks enclosing `node`, unclamped.
pub fn raw_depth(doc: &Document, node: NodeId) -> usize {
    doc.ancestors(node)
        .into_iter()
        .filter(|a| is_embed_block(doc, *a))
        .count()
}

/// Display depth of `node`, in `0..=MAX_DEPTH`.
pub fn depth(doc: &Document, node: NodeId) -> usize {
    raw_depth(doc, node).min(MAX_DEPTH)
}

/// Closest enclosing embed block.
pub fn parent_embed(doc: &Document, node: NodeId) -> Option<NodeId> {
    doc.ancestors(node)
        .into_iter()
        .find(|a| is_embed_block(doc, *a))
}

/// Embed blocks under `root`, shallowest first, document order within a level.
pub fn embeds_by_depth(doc: &Document, root: NodeId) -> Vec<NodeId> {
    let mut embeds: Vec<(usize, usize, NodeId)> = doc
        .descendants(root)
        .into_iter()
        .filter(|n| is_embed_block(doc, *n))
        .enumerate()
        .map(|(order, n)| (raw_depth(doc, n), order, n))
        .collect();
    embeds.sort_unstable();
    embeds.into_iter().map(|(_, _, n)| n).collect()
}
