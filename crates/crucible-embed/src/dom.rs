//! In-memory document tree shared between the host renderer and the overlay.
//!
//! The host owns the tree and mutates it whenever it renders; the overlay reads
//! it, decorates it, and watches it through [`MutationSubscription`]s.
//!
//! Node ids are never reused. A [`NodeId`] kept across an `.await` may refer to
//! a node the host has since removed; [`Document::contains`] detects that.

use crate::error::{EmbedError, Result};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Document shared between host and overlay. Never hold the lock across `.await`.
pub type SharedDocument = Arc<Mutex<Document>>;

/// Handle to a node in a [`Document`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    /// Raw numeric id
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Payload of a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeData {
    /// Element with a tag name
    Element {
        /// Lowercase tag name
        tag: String,
    },
    /// Text leaf
    Text(String),
}

#[derive(Debug, Clone)]
struct Node {
    data: NodeData,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    attrs: BTreeMap<String, String>,
    classes: Vec<String>,
}

impl Node {
    fn new(data: NodeData) -> Self {
        Self {
            data,
            parent: None,
            children: Vec::new(),
            attrs: BTreeMap::new(),
            classes: Vec::new(),
        }
    }
}

/// A structural or attribute change, as delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationRecord {
    /// Children were added to or removed from `target`
    ChildList {
        /// Parent whose child list changed
        target: NodeId,
        /// Newly attached children
        added: Vec<NodeId>,
        /// Detached children (may already be gone from the arena)
        removed: Vec<NodeId>,
    },
    /// An attribute (or the class list, under the name `class`) changed
    Attribute {
        /// Element whose attribute changed
        target: NodeId,
        /// Attribute name
        name: String,
        /// Value before the change
        old_value: Option<String>,
    },
}

impl MutationRecord {
    /// Node the change happened on
    pub fn target(&self) -> NodeId {
        match self {
            Self::ChildList { target, .. } | Self::Attribute { target, .. } => *target,
        }
    }
}

struct Observer {
    root: NodeId,
    tx: mpsc::UnboundedSender<MutationRecord>,
}

/// Cancellable stream of [`MutationRecord`]s under one subtree.
///
/// Dropping the subscription unsubscribes.
#[derive(Debug)]
pub struct MutationSubscription {
    root: NodeId,
    rx: mpsc::UnboundedReceiver<MutationRecord>,
}

impl MutationSubscription {
    /// Subtree being observed
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Wait for the next record; `None` once cancelled.
    pub async fn recv(&mut self) -> Option<MutationRecord> {
        self.rx.recv().await
    }

    /// Next already-delivered record, if any.
    pub fn try_recv(&mut self) -> Option<MutationRecord> {
        self.rx.try_recv().ok()
    }

    /// All already-delivered records.
    pub fn drain(&mut self) -> Vec<MutationRecord> {
        let mut records = Vec::new();
        while let Ok(record) = self.rx.try_recv() {
            records.push(record);
        }
        records
    }

    /// Stop receiving records.
    pub fn cancel(&mut self) {
        self.rx.close();
    }
}

/// Arena-backed element tree.
pub struct Document {
    nodes: HashMap<NodeId, Node>,
    next_id: u64,
    root: NodeId,
    focused: Option<NodeId>,
    revision: u64,
    observers: Vec<Observer>,
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("nodes", &self.nodes.len())
            .field("root", &self.root)
            .field("focused", &self.focused)
            .field("revision", &self.revision)
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// Empty document with a `body` root.
    pub fn new() -> Self {
        let root = NodeId(0);
        let mut nodes = HashMap::new();
        nodes.insert(
            root,
            Node::new(NodeData::Element {
                tag: "body".to_string(),
            }),
        );
        Self {
            nodes,
            next_id: 1,
            root,
            focused: None,
            revision: 0,
            observers: Vec::new(),
        }
    }

    /// Wrap in a [`SharedDocument`].
    pub fn into_shared(self) -> SharedDocument {
        Arc::new(Mutex::new(self))
    }

    /// Root element
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Number of changes applied to the attached tree so far.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Whether `id` still exists (attached or detached).
    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Whether `id` is reachable from the document root.
    pub fn is_attached(&self, id: NodeId) -> bool {
        self.is_within(id, self.root)
    }

    fn node(&self, id: NodeId) -> Result<&Node> {
        self.nodes.get(&id).ok_or(EmbedError::StaleNode(id.0))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.nodes.get_mut(&id).ok_or(EmbedError::StaleNode(id.0))
    }

    fn alloc(&mut self, data: NodeData) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        self.nodes.insert(id, Node::new(data));
        id
    }

    /// Create a detached element.
    pub fn create_element(&mut self, tag: &str) -> NodeId {
        self.alloc(NodeData::Element {
            tag: tag.to_ascii_lowercase(),
        })
    }

    /// Create a detached element carrying `classes`.
    pub fn create_element_with_classes(&mut self, tag: &str, classes: &[&str]) -> NodeId {
        let id = self.create_element(tag);
        if let Some(node) = self.nodes.get_mut(&id) {
            node.classes = classes.iter().map(|c| c.to_string()).collect();
        }
        id
    }

    /// Create a detached text node.
    pub fn create_text(&mut self, text: &str) -> NodeId {
        self.alloc(NodeData::Text(text.to_string()))
    }

    /// Node payload
    pub fn data(&self, id: NodeId) -> Option<&NodeData> {
        self.nodes.get(&id).map(|n| &n.data)
    }

    /// Tag name for elements
    pub fn tag(&self, id: NodeId) -> Option<&str> {
        match self.data(id)? {
            NodeData::Element { tag } => Some(tag.as_str()),
            NodeData::Text(_) => None,
        }
    }

    /// Whether `id` is an element
    pub fn is_element(&self, id: NodeId) -> bool {
        self.tag(id).is_some()
    }

    /// Parent, if attached to one
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(&id)?.parent
    }

    /// Children in order (empty for unknown ids)
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.nodes
            .get(&id)
            .map(|n| n.children.as_slice())
            .unwrap_or(&[])
    }

    /// Element children in order
    pub fn element_children(&self, id: NodeId) -> Vec<NodeId> {
        self.children(id)
            .iter()
            .copied()
            .filter(|c| self.is_element(*c))
            .collect()
    }

    /// Ancestors, nearest first
    pub fn ancestors(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut current = self.parent(id);
        while let Some(p) = current {
            out.push(p);
            current = self.parent(p);
        }
        out
    }

    /// Descendants of `id` in document order, excluding `id`
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.children(id).iter().rev().copied().collect();
        while let Some(next) = stack.pop() {
            out.push(next);
            stack.extend(self.children(next).iter().rev().copied());
        }
        out
    }

    /// Whether `ancestor` is a strict ancestor of `id`
    pub fn is_ancestor_of(&self, ancestor: NodeId, id: NodeId) -> bool {
        let mut current = self.parent(id);
        while let Some(p) = current {
            if p == ancestor {
                return true;
            }
            current = self.parent(p);
        }
        false
    }

    /// Whether `id` is `root` or inside it
    pub fn is_within(&self, id: NodeId, root: NodeId) -> bool {
        id == root || self.is_ancestor_of(root, id)
    }

    /// `id` itself or its nearest ancestor matching `pred`
    pub fn closest(&self, id: NodeId, pred: impl Fn(&Document, NodeId) -> bool) -> Option<NodeId> {
        if !self.contains(id) {
            return None;
        }
        if pred(self, id) {
            return Some(id);
        }
        self.ancestors(id).into_iter().find(|a| pred(self, *a))
    }

    /// Descendants of `root` carrying `class`, in document order
    pub fn query_class(&self, root: NodeId, class: &str) -> Vec<NodeId> {
        self.descendants(root)
            .into_iter()
            .filter(|id| self.has_class(*id, class))
            .collect()
    }

    /// Descendants of `root` whose attribute `name` equals `value`
    pub fn query_attr(&self, root: NodeId, name: &str, value: &str) -> Vec<NodeId> {
        self.descendants(root)
            .into_iter()
            .filter(|id| self.attr(*id, name) == Some(value))
            .collect()
    }

    /// Descendants of `root` with tag `tag`
    pub fn query_tag(&self, root: NodeId, tag: &str) -> Vec<NodeId> {
        self.descendants(root)
            .into_iter()
            .filter(|id| self.tag(*id) == Some(tag))
            .collect()
    }

    /// First direct child carrying `class`
    pub fn child_with_class(&self, id: NodeId, class: &str) -> Option<NodeId> {
        self.children(id)
            .iter()
            .copied()
            .find(|c| self.has_class(*c, class))
    }

    fn check_insertable(&self, parent: NodeId, child: NodeId) -> Result<()> {
        self.node(parent)?;
        self.node(child)?;
        if !self.is_element(parent) {
            return Err(EmbedError::InvalidTree(format!(
                "{parent} is a text node and cannot have children"
            )));
        }
        if child == self.root {
            return Err(EmbedError::InvalidTree("cannot move the root".to_string()));
        }
        if self.is_within(parent, child) {
            return Err(EmbedError::InvalidTree(format!(
                "cannot insert {child} into its own subtree at {parent}"
            )));
        }
        Ok(())
    }

    fn detach(&mut self, child: NodeId) {
        let Some(old_parent) = self.parent(child) else {
            return;
        };
        if let Some(p) = self.nodes.get_mut(&old_parent) {
            p.children.retain(|c| *c != child);
        }
        if let Some(c) = self.nodes.get_mut(&child) {
            c.parent = None;
        }
        self.record(MutationRecord::ChildList {
            target: old_parent,
            added: Vec::new(),
            removed: vec![child],
        });
    }

    /// Append `child` to `parent`, moving it if already attached elsewhere.
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        let len = self.children(parent).len();
        self.insert_child(parent, len, child)
    }

    /// Insert `child` at `index` (clamped) under `parent`.
    pub fn insert_child(&mut self, parent: NodeId, index: usize, child: NodeId) -> Result<()> {
        self.check_insertable(parent, child)?;
        self.detach(child);

        let node = self.node_mut(parent)?;
        let at = index.min(node.children.len());
        node.children.insert(at, child);
        self.node_mut(child)?.parent = Some(parent);

        self.record(MutationRecord::ChildList {
            target: parent,
            added: vec![child],
            removed: Vec::new(),
        });
        Ok(())
    }

    /// Remove `id` and its whole subtree from the document.
    pub fn remove(&mut self, id: NodeId) -> Result<()> {
        if id == self.root {
            return Err(EmbedError::InvalidTree("cannot remove the root".to_string()));
        }
        self.node(id)?;
        self.detach(id);

        let mut doomed = self.descendants(id);
        doomed.push(id);
        for d in doomed {
            self.nodes.remove(&d);
            if self.focused == Some(d) {
                self.focused = None;
            }
        }
        Ok(())
    }

    /// Remove every child of `id`.
    pub fn clear_children(&mut self, id: NodeId) -> Result<()> {
        let children = self.node(id)?.children.clone();
        for child in children {
            self.remove(child)?;
        }
        Ok(())
    }

    /// Attribute value
    pub fn attr(&self, id: NodeId, name: &str) -> Option<&str> {
        self.nodes.get(&id)?.attrs.get(name).map(String::as_str)
    }

    /// Set an attribute; returns whether anything changed.
    pub fn set_attr(&mut self, id: NodeId, name: &str, value: &str) -> Result<bool> {
        let node = self.node_mut(id)?;
        if node.attrs.get(name).map(String::as_str) == Some(value) {
            return Ok(false);
        }
        let old_value = node.attrs.insert(name.to_string(), value.to_string());
        self.record(MutationRecord::Attribute {
            target: id,
            name: name.to_string(),
            old_value,
        });
        Ok(true)
    }

    /// Remove an attribute; returns whether it was present.
    pub fn remove_attr(&mut self, id: NodeId, name: &str) -> Result<bool> {
        let old_value = self.node_mut(id)?.attrs.remove(name);
        if old_value.is_none() {
            return Ok(false);
        }
        self.record(MutationRecord::Attribute {
            target: id,
            name: name.to_string(),
            old_value,
        });
        Ok(true)
    }

    /// Class list
    pub fn classes(&self, id: NodeId) -> &[String] {
        self.nodes
            .get(&id)
            .map(|n| n.classes.as_slice())
            .unwrap_or(&[])
    }

    /// Whether `id` carries `class`
    pub fn has_class(&self, id: NodeId, class: &str) -> bool {
        self.classes(id).iter().any(|c| c == class)
    }

    /// Add a class; returns whether anything changed.
    pub fn add_class(&mut self, id: NodeId, class: &str) -> Result<bool> {
        let node = self.node_mut(id)?;
        if node.classes.iter().any(|c| c == class) {
            return Ok(false);
        }
        let old_value = node.classes.join(" ");
        node.classes.push(class.to_string());
        self.record(MutationRecord::Attribute {
            target: id,
            name: "class".to_string(),
            old_value: Some(old_value),
        });
        Ok(true)
    }

    /// Remove a class; returns whether it was present.
    pub fn remove_class(&mut self, id: NodeId, class: &str) -> Result<bool> {
        let node = self.node_mut(id)?;
        if !node.classes.iter().any(|c| c == class) {
            return Ok(false);
        }
        let old_value = node.classes.join(" ");
        node.classes.retain(|c| c != class);
        self.record(MutationRecord::Attribute {
            target: id,
            name: "class".to_string(),
            old_value: Some(old_value),
        });
        Ok(true)
    }

    /// Add or remove `class` depending on `on`.
    pub fn toggle_class(&mut self, id: NodeId, class: &str, on: bool) -> Result<bool> {
        if on {
            self.add_class(id, class)
        } else {
            self.remove_class(id, class)
        }
    }

    /// Concatenated text of `id` and its descendants
    pub fn text_content(&self, id: NodeId) -> String {
        let mut out = String::new();
        if let Some(NodeData::Text(t)) = self.data(id) {
            out.push_str(t);
        }
        for d in self.descendants(id) {
            if let Some(NodeData::Text(t)) = self.data(d) {
                out.push_str(t);
            }
        }
        out
    }

    /// Replace the children of `id` with a single text node.
    pub fn set_text_content(&mut self, id: NodeId, text: &str) -> Result<()> {
        if self.text_content(id) == text && self.children(id).len() <= 1 {
            return Ok(());
        }
        self.clear_children(id)?;
        if !text.is_empty() {
            let t = self.create_text(text);
            self.append_child(id, t)?;
        }
        Ok(())
    }

    /// Move input focus.
    pub fn focus(&mut self, id: Option<NodeId>) {
        let id = id.filter(|i| self.contains(*i));
        self.focused = id;
    }

    /// Focused node, if any
    pub fn focused(&self) -> Option<NodeId> {
        self.focused
    }

    /// Subscribe to changes under `root`.
    pub fn observe(&mut self, root: NodeId) -> MutationSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        self.observers.push(Observer { root, tx });
        MutationSubscription { root, rx }
    }

    fn record(&mut self, record: MutationRecord) {
        let target = record.target();
        if !self.is_attached(target) {
            return;
        }
        self.revision += 1;

        self.observers.retain(|o| !o.tx.is_closed());
        for observer in &self.observers {
            if self.is_within(target, observer.root) {
                let _ = observer.tx.send(record.clone());
            }
        }
    }

    /// Indented textual rendering of the subtree at `id`, for debugging.
    pub fn outline(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.outline_into(id, 0, &mut out);
        out
    }

    fn outline_into(&self, id: NodeId, indent: usize, out: &mut String) {
        let Some(node) = self.nodes.get(&id) else {
            return;
        };
        let pad = "  ".repeat(indent);
        match &node.data {
            NodeData::Text(t) => {
                let t = t.trim();
                if !t.is_empty() {
                    out.push_str(&format!("{pad}\"{t}\"\n"));
                }
            }
            NodeData::Element { tag } => {
                out.push_str(&pad);
                out.push_str(tag);
                for class in &node.classes {
                    out.push('.');
                    out.push_str(class);
                }
                for (k, v) in &node.attrs {
                    out.push_str(&format!(" {k}=\"{v}\""));
                }
                out.push('\n');
                for child in &node.children {
                    self.outline_into(*child, indent + 1, out);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn div(doc: &mut Document, parent: NodeId, class: &str) -> NodeId {
        let id = doc.create_element_with_classes("div", &[class]);
        doc.append_child(parent, id).unwrap();
        id
    }

    #[test]
    fn test_tree_navigation() {
        let mut doc = Document::new();
        let root = doc.root();
        let a = div(&mut doc, root, "a");
        let b = div(&mut doc, a, "b");
        let c = div(&mut doc, b, "c");

        assert_eq!(doc.ancestors(c), vec![b, a, root]);
        assert_eq!(doc.descendants(root), vec![a, b, c]);
        assert!(doc.is_ancestor_of(a, c));
        assert!(!doc.is_ancestor_of(c, a));
        assert_eq!(doc.closest(c, |d, n| d.has_class(n, "a")), Some(a));
        assert_eq!(doc.query_class(root, "b"), vec![b]);
    }

    #[test]
    fn test_remove_drops_subtree_and_ids_stay_unique() {
        let mut doc = Document::new();
        let root = doc.root();
        let a = div(&mut doc, root, "a");
        let b = div(&mut doc, a, "b");

        doc.remove(a).unwrap();
        assert!(!doc.contains(a));
        assert!(!doc.contains(b));

        let fresh = doc.create_element("div");
        assert_ne!(fresh, a);
        assert_ne!(fresh, b);
        assert!(matches!(doc.set_attr(a, "x", "y"), Err(EmbedError::StaleNode(_))));
    }

    #[test]
    fn test_cannot_create_cycles() {
        let mut doc = Document::new();
        let root = doc.root();
        let a = div(&mut doc, root, "a");
        let b = div(&mut doc, a, "b");

        assert!(matches!(
            doc.append_child(b, a),
            Err(EmbedError::InvalidTree(_))
        ));
        assert!(doc.remove(root).is_err());
    }

    #[test]
    fn test_append_moves_node() {
        let mut doc = Document::new();
        let root = doc.root();
        let a = div(&mut doc, root, "a");
        let b = div(&mut doc, root, "b");
        let child = div(&mut doc, a, "child");

        doc.append_child(b, child).unwrap();
        assert!(doc.children(a).is_empty());
        assert_eq!(doc.children(b), &[child]);
        assert_eq!(doc.parent(child), Some(b));
    }

    #[test]
    fn test_unchanged_writes_do_not_bump_revision() {
        let mut doc = Document::new();
        let root = doc.root();
        let a = div(&mut doc, root, "a");

        doc.set_attr(a, "src", "Note").unwrap();
        let rev = doc.revision();
        assert!(!doc.set_attr(a, "src", "Note").unwrap());
        assert!(!doc.add_class(a, "a").unwrap());
        assert!(!doc.remove_class(a, "missing").unwrap());
        assert_eq!(doc.revision(), rev);
    }

    #[test]
    fn test_detached_edits_are_not_observed() {
        let mut doc = Document::new();
        let root = doc.root();
        let mut sub = doc.observe(root);

        let detached = doc.create_element("div");
        doc.add_class(detached, "x").unwrap();
        let inner = doc.create_element("span");
        doc.append_child(detached, inner).unwrap();
        assert!(sub.drain().is_empty());

        doc.append_child(root, detached).unwrap();
        assert_eq!(
            sub.drain(),
            vec![MutationRecord::ChildList {
                target: root,
                added: vec![detached],
                removed: vec![],
            }]
        );
    }

    #[test]
    fn test_observer_scoped_to_subtree() {
        let mut doc = Document::new();
        let root = doc.root();
        let left = div(&mut doc, root, "left");
        let right = div(&mut doc, root, "right");
        let mut sub = doc.observe(left);

        doc.add_class(right, "ignored").unwrap();
        doc.add_class(left, "seen").unwrap();

        let records = sub.drain();
        assert_eq!(records.len(), 1);
        assert_eq!(
            records[0],
            MutationRecord::Attribute {
                target: left,
                name: "class".to_string(),
                old_value: Some("left".to_string()),
            }
        );
    }

    #[test]
    fn test_cancelled_subscription_is_pruned() {
        let mut doc = Document::new();
        let root = doc.root();
        let mut sub = doc.observe(root);
        sub.cancel();
        div(&mut doc, root, "a");
        assert!(doc.observers.is_empty());
    }

    #[test]
    fn test_text_content_and_focus() {
        let mut doc = Document::new();
        let root = doc.root();
        let p = doc.create_element("p");
        doc.append_child(root, p).unwrap();
        doc.set_text_content(p, "hello").unwrap();
        assert_eq!(doc.text_content(root), "hello");

        doc.focus(Some(p));
        assert_eq!(doc.focused(), Some(p));
        doc.remove(p).unwrap();
        assert_eq!(doc.focused(), None);
    }
}
