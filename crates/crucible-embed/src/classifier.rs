//! Embed classification: text vs. image vs. document viewer.
//!
//! Only text embeds get a title bar. Image and PDF embeds keep the host's native
//! rendering untouched.
//!
//! Cheap structural checks run first; link resolution is the fallback. Results
//! are memoized in [`ProcessingCache`] since classification runs on every pass.

use crate::cache::ProcessingCache;
use crate::dom::{Document, NodeId};
use crate::host::Vault;
use crate::link::LinkTarget;
use crate::markers;
use std::sync::Arc;
use tracing::trace;

/// Extensions rendered as images by the host.
pub const IMAGE_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "bmp", "svg", "webp", "avif", "ico", "tif", "tiff",
];

/// Extensions rendered in the document viewer.
pub const DOCUMENT_VIEWER_EXTENSIONS: &[&str] = &["pdf"];

/// Accompanying text allowed around a lone image before it counts as mixed content.
const MAX_IMAGE_CAPTION_LEN: usize = 20;

/// How deep to look through single-child wrappers for a lone image.
const MAX_WRAPPER_DEPTH: usize = 3;

/// What kind of embed a node is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EmbedKind {
    /// Transcluded note: gets a title bar
    Text,
    /// Image embed: left alone
    Image,
    /// PDF or other document-viewer embed: left alone
    DocumentViewer,
}

impl EmbedKind {
    /// Kind implied by a file extension
    pub fn from_extension(ext: &str) -> Self {
        let ext = ext.to_ascii_lowercase();
        if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            Self::Image
        } else if DOCUMENT_VIEWER_EXTENSIONS.contains(&ext.as_str()) {
            Self::DocumentViewer
        } else {
            Self::Text
        }
    }

    /// Whether this kind receives a title bar
    pub fn is_augmentable(self) -> bool {
        self == Self::Text
    }
}

/// Whether `node` is an embed block produced by the host.
pub fn is_embed_block(doc: &Document, node: NodeId) -> bool {
    doc.has_class(node, markers::HOST_EMBED)
}

/// Whether `node` belongs to the overlay's own markup.
pub fn is_overlay_node(doc: &Document, node: NodeId) -> bool {
    doc.classes(node)
        .iter()
        .any(|c| c == markers::TITLE_BAR || c == markers::EDITOR || c == markers::HOLDING)
}

/// Classifies embed blocks.
#[derive(Clone)]
pub struct Classifier {
    cache: Arc<ProcessingCache>,
    vault: Arc<dyn Vault>,
}

impl Classifier {
    /// Classifier backed by `cache`, resolving links through `vault`.
    pub fn new(cache: Arc<ProcessingCache>, vault: Arc<dyn Vault>) -> Self {
        Self { cache, vault }
    }

    /// Classify `node`, an embed block inside the document at `source_path`.
    pub fn classify(&self, doc: &Document, node: NodeId, source_path: &str) -> EmbedKind {
        if let Some(kind) = self.cache.node_kind(node) {
            return kind;
        }

        let kind = self
            .classify_structure(doc, node)
            .unwrap_or_else(|| self.classify_link(doc, node, source_path));

        if kind != EmbedKind::Text {
            self.cache.set_node_kind(node, kind);
        }
        trace!(node = %node, ?kind, "Classified embed");
        kind
    }

    fn classify_structure(&self, doc: &Document, node: NodeId) -> Option<EmbedKind> {
        let classes = doc.classes(node);
        if classes
            .iter()
            .any(|c| markers::HOST_IMAGE_CLASSES.contains(&c.as_str()))
        {
            return Some(EmbedKind::Image);
        }
        if classes
            .iter()
            .any(|c| markers::HOST_PDF_CLASSES.contains(&c.as_str()))
        {
            return Some(EmbedKind::DocumentViewer);
        }

        let has_viewer = own_content(doc, node).into_iter().any(|d| {
            matches!(doc.tag(d), Some("iframe" | "embed" | "object"))
                || doc.has_class(d, "pdf-container")
        });
        if has_viewer {
            return Some(EmbedKind::DocumentViewer);
        }

        if is_lone_image(doc, node) {
            return Some(EmbedKind::Image);
        }
        None
    }

    fn classify_link(&self, doc: &Document, node: NodeId, source_path: &str) -> EmbedKind {
        let Some(src) = doc.attr(node, markers::HOST_SRC) else {
            return EmbedKind::Text;
        };
        let link = LinkTarget::parse(src);
        if let Some(ext) = link.extension() {
            let kind = EmbedKind::from_extension(&ext);
            if kind != EmbedKind::Text {
                return kind;
            }
        }

        let Some(file) = self.vault.resolve_link(&link.path, source_path) else {
            return EmbedKind::Text;
        };
        if let Some(kind) = self.cache.file_kind(&file.path) {
            return kind;
        }
        let kind = file
            .extension()
            .map(|ext| EmbedKind::from_extension(&ext))
            .unwrap_or(EmbedKind::Text);
        self.cache.set_file_kind(&file.path, kind);
        kind
    }
}

/// Descendants of `node` that belong to the embed itself: the walk skips the
/// overlay's markup and stops at nested embeds, whose media is their own.
fn own_content(doc: &Document, node: NodeId) -> Vec<NodeId> {
    let mut found = Vec::new();
    let mut stack: Vec<NodeId> = doc.children(node).iter().rev().copied().collect();
    while let Some(current) = stack.pop() {
        if is_overlay_node(doc, current) || is_embed_block(doc, current) {
            continue;
        }
        found.push(current);
        stack.extend(doc.children(current).iter().rev().copied());
    }
    found
}

/// An embed whose rendered content is essentially one image.
fn is_lone_image(doc: &Document, node: NodeId) -> bool {
    let mut current = node;
    for _ in 0..MAX_WRAPPER_DEPTH {
        let children: Vec<NodeId> = doc
            .element_children(current)
            .into_iter()
            .filter(|c| !is_overlay_node(doc, *c))
            .collect();
        if children.len() != 1 {
            return false;
        }
        let child = children[0];
        if is_embed_block(doc, child) {
            return false;
        }
        if doc.tag(child) == Some("img") {
            return content_text_len(doc, node) < MAX_IMAGE_CAPTION_LEN;
        }
        current = child;
    }
    false
}

/// Length of the trimmed text under `node`, ignoring the overlay's own markup.
fn content_text_len(doc: &Document, node: NodeId) -> usize {
    doc.children(node)
        .iter()
        .filter(|c| !is_overlay_node(doc, **c))
        .map(|c| doc.text_content(*c))
        .collect::<String>()
        .trim()
        .chars()
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MemoryVault;

    fn embed(doc: &mut Document, src: &str) -> NodeId {
        let root = doc.root();
        let node = doc.create_element_with_classes("span", &[markers::HOST_EMBED]);
        doc.set_attr(node, markers::HOST_SRC, src).unwrap();
        doc.append_child(root, node).unwrap();
        node
    }

    fn classifier(vault: MemoryVault) -> (Classifier, Arc<ProcessingCache>) {
        let cache = Arc::new(ProcessingCache::new());
        (Classifier::new(cache.clone(), Arc::new(vault)), cache)
    }

    #[test]
    fn test_lone_image_is_image() {
        let (classifier, _) = classifier(MemoryVault::new());
        let mut doc = Document::new();
        let node = embed(&mut doc, "diagram");
        let img = doc.create_element("img");
        doc.append_child(node, img).unwrap();

        assert_eq!(classifier.classify(&doc, node, "D.md"), EmbedKind::Image);
    }

    #[test]
    fn test_image_with_paragraph_is_text() {
        let vault = MemoryVault::new().with_file("A.md", "![[pic.png]]\nSome words about it");
        let (classifier, _) = classifier(vault);
        let mut doc = Document::new();
        let node = embed(&mut doc, "A");
        let content = doc.create_element_with_classes("div", &[markers::HOST_CONTENT]);
        doc.append_child(node, content).unwrap();
        let img = doc.create_element("img");
        doc.append_child(content, img).unwrap();
        let p = doc.create_element("p");
        doc.append_child(content, p).unwrap();
        doc.set_text_content(p, "A paragraph of surrounding text").unwrap();

        assert_eq!(classifier.classify(&doc, node, "D.md"), EmbedKind::Text);
    }

    #[test]
    fn test_marker_classes_win() {
        let (classifier, _) = classifier(MemoryVault::new());
        let mut doc = Document::new();
        let image = embed(&mut doc, "x");
        doc.add_class(image, "image-embed").unwrap();
        let pdf = embed(&mut doc, "y");
        doc.add_class(pdf, "pdf-embed").unwrap();

        assert_eq!(classifier.classify(&doc, image, "D.md"), EmbedKind::Image);
        assert_eq!(
            classifier.classify(&doc, pdf, "D.md"),
            EmbedKind::DocumentViewer
        );
    }

    #[test]
    fn test_viewer_element_is_document_viewer() {
        let (classifier, _) = classifier(MemoryVault::new());
        let mut doc = Document::new();
        let node = embed(&mut doc, "paper");
        let frame = doc.create_element("iframe");
        doc.append_child(node, frame).unwrap();
        assert_eq!(
            classifier.classify(&doc, node, "D.md"),
            EmbedKind::DocumentViewer
        );
    }

    #[test]
    fn test_extension_from_link_and_resolution() {
        let vault = MemoryVault::new()
            .with_file("assets/scan.pdf", "")
            .with_file("Note.md", "text");
        let (classifier, cache) = classifier(vault);
        let mut doc = Document::new();
        let by_link = embed(&mut doc, "photo.JPG");
        let by_resolution = embed(&mut doc, "scan");
        let note = embed(&mut doc, "Note");

        assert_eq!(classifier.classify(&doc, by_link, "D.md"), EmbedKind::Image);
        // The link has no extension but resolves to a pdf
        let resolved = classifier.classify(&doc, by_resolution, "D.md");
        assert_eq!(resolved, EmbedKind::DocumentViewer);
        assert_eq!(
            cache.file_kind("assets/scan.pdf"),
            Some(EmbedKind::DocumentViewer)
        );
        assert_eq!(classifier.classify(&doc, note, "D.md"), EmbedKind::Text);
        assert_eq!(cache.node_kind(note), None);
    }

    #[test]
    fn test_pdf_inside_nested_embed_leaves_note_as_text() {
        let vault = MemoryVault::new()
            .with_file("A.md", "Reading notes\n\n![[paper.pdf]]")
            .with_file("paper.pdf", "");
        let (classifier, _) = classifier(vault);
        let mut doc = Document::new();
        let node = embed(&mut doc, "A");
        let content = doc.create_element_with_classes("div", &[markers::HOST_CONTENT]);
        doc.append_child(node, content).unwrap();
        let nested = doc.create_element_with_classes("span", &[markers::HOST_EMBED]);
        doc.set_attr(nested, markers::HOST_SRC, "paper.pdf").unwrap();
        doc.append_child(content, nested).unwrap();
        let viewer = doc.create_element_with_classes("div", &["pdf-container"]);
        doc.append_child(nested, viewer).unwrap();
        let frame = doc.create_element("iframe");
        doc.append_child(viewer, frame).unwrap();

        assert_eq!(classifier.classify(&doc, node, "D.md"), EmbedKind::Text);
        assert_eq!(
            classifier.classify(&doc, nested, "A.md"),
            EmbedKind::DocumentViewer
        );
    }

    #[test]
    fn test_note_holding_only_an_embedded_image_is_text() {
        let vault = MemoryVault::new()
            .with_file("A.md", "![[pic.png]]")
            .with_file("pic.png", "");
        let (classifier, _) = classifier(vault);
        let mut doc = Document::new();
        let node = embed(&mut doc, "A");
        let content = doc.create_element_with_classes("div", &[markers::HOST_CONTENT]);
        doc.append_child(node, content).unwrap();
        let nested = doc.create_element_with_classes("span", &[markers::HOST_EMBED]);
        doc.set_attr(nested, markers::HOST_SRC, "pic.png").unwrap();
        doc.append_child(content, nested).unwrap();
        let img = doc.create_element("img");
        doc.append_child(nested, img).unwrap();

        assert_eq!(classifier.classify(&doc, node, "D.md"), EmbedKind::Text);
        assert_eq!(classifier.classify(&doc, nested, "A.md"), EmbedKind::Image);
    }

    #[test]
    fn test_title_bar_text_does_not_count_as_caption() {
        let (classifier, _) = classifier(MemoryVault::new());
        let mut doc = Document::new();
        let node = embed(&mut doc, "diagram");
        let title = doc.create_element_with_classes("div", &[markers::TITLE_BAR]);
        doc.append_child(node, title).unwrap();
        doc.set_text_content(title, "a very long title that is not content")
            .unwrap();
        let img = doc.create_element("img");
        doc.append_child(node, img).unwrap();

        assert_eq!(classifier.classify(&doc, node, "D.md"), EmbedKind::Image);
    }
}
