//! Block identity: a stable key for one logical embed occurrence.
//!
//! The key hashes (with BLAKE3) the containing document path, the target file
//! name, the display depth, the parent block's identity and the position among
//! same-target siblings. Re-rendering the same markdown yields the same key even
//! though every node is new.
//!
//! Sibling position comes from rendered order, so reordering identical embeds
//! can swap keys. Collapse state then follows the position, not the embed.

use crate::classifier::is_embed_block;
use crate::dom::{Document, NodeId};
use crate::link;
use crate::markers;
use crate::nesting;
use blake3::Hasher;

/// Prefix of every identity
pub const IDENTITY_PREFIX: &str = "embed-";

/// Hex digits kept from the digest
const IDENTITY_HEX_LEN: usize = 16;

/// Where identities are computed: one document view.
#[derive(Debug, Clone, Copy)]
pub struct IdentityScope<'a> {
    /// Root node of the view
    pub root: NodeId,
    /// Path of the document shown in the view
    pub document_path: &'a str,
}

/// Compute the identity of `node`, whose link targets `file_name`.
pub fn identity(doc: &Document, scope: IdentityScope<'_>, node: NodeId, file_name: &str) -> String {
    let depth = nesting::depth(doc, node);
    let parent = nesting::parent_embed(doc, node).filter(|p| doc.is_within(*p, scope.root));
    let parent_identity = parent
        .map(|p| identity(doc, scope, p, &embed_target_name(doc, p)))
        .unwrap_or_default();
    let sibling = sibling_index(doc, scope.root, node, parent, file_name);

    let mut hasher = Hasher::new();
    hasher.update(short_hash(scope.document_path).as_bytes());
    hasher.update(b"|");
    hasher.update(short_hash(file_name).as_bytes());
    hasher.update(b"|");
    hasher.update(depth.to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(parent_identity.as_bytes());
    hasher.update(b"|");
    hasher.update(sibling.to_string().as_bytes());

    let digest = hasher.finalize();
    let hex = hex::encode(digest.as_bytes());
    format!("{IDENTITY_PREFIX}{}", &hex[..IDENTITY_HEX_LEN])
}

/// Target name of an embed block, from its raw link text.
pub fn embed_target_name(doc: &Document, node: NodeId) -> String {
    doc.attr(node, markers::HOST_SRC)
        .map(link::target_name)
        .unwrap_or_default()
}

fn short_hash(value: &str) -> String {
    let digest = blake3::hash(value.as_bytes());
    hex::encode(&digest.as_bytes()[..4])
}

/// Position of `node` among embeds targeting the same name under the same parent.
fn sibling_index(
    doc: &Document,
    root: NodeId,
    node: NodeId,
    parent: Option<NodeId>,
    file_name: &str,
) -> usize {
    let scope = parent.unwrap_or(root);
    doc.descendants(scope)
        .into_iter()
        .filter(|n| is_embed_block(doc, *n))
        .filter(|n| nesting::parent_embed(doc, *n).filter(|p| doc.is_within(*p, root)) == parent)
        .filter(|n| *n == node || embed_target_name(doc, *n) == file_name)
        .position(|n| n == node)
        .unwrap_or(0)
}
