//! Class and attribute names shared with the host renderer.

// Host markup
/// Embed block produced by the host
pub const HOST_EMBED: &str = "internal-embed";
/// Raw link text on an embed block
pub const HOST_SRC: &str = "src";
/// Set by the host once it has finished loading an embed
pub const HOST_LOADED: &str = "is-loaded";
/// Rendered content container inside an embed
pub const HOST_CONTENT: &str = "markdown-embed-content";
/// Host "open source" affordance inside an embed
pub const HOST_LINK: &str = "markdown-embed-link";
/// Image embed markers
pub const HOST_IMAGE_CLASSES: &[&str] = &["image-embed", "media-embed"];
/// Document-viewer embed markers
pub const HOST_PDF_CLASSES: &[&str] = &["pdf-embed", "pdf-container"];
/// Host editor surface
pub const HOST_EDITOR: &str = "cm-editor";

// Overlay markup
/// Augmented embed block
pub const BLOCK: &str = "embed-lens-block";
/// Block identity attribute
pub const ATTR_ID: &str = "data-embed-id";
/// Clamped nesting depth attribute
pub const ATTR_DEPTH: &str = "data-embed-depth";
/// Resolved file path attribute
pub const ATTR_FILE: &str = "data-embed-file";
/// Present while a block is excluded from reconciliation
pub const ATTR_FROZEN: &str = "data-embed-frozen";
/// Title bar font size attribute
pub const ATTR_FONT_SIZE: &str = "data-font-size";
/// Content container rendered by the overlay because the host left none
pub const ATTR_FALLBACK: &str = "data-embed-fallback";
/// Title bar
pub const TITLE_BAR: &str = "embed-lens-title";
/// Title bar label
pub const TITLE_LABEL: &str = "embed-lens-label";
/// Collapse/expand icon
pub const TITLE_COLLAPSE: &str = "embed-lens-collapse";
/// Edit toggle button
pub const TITLE_EDIT: &str = "embed-lens-edit";
/// Jump-to-source button
pub const TITLE_JUMP: &str = "embed-lens-jump";
/// Collapsed block
pub const COLLAPSED: &str = "is-collapsed";
/// Block in an edit session
pub const EDITING: &str = "is-editing";
/// In-place raw text editor
pub const EDITOR: &str = "embed-lens-editor";
/// Inert container holding rendered content during an edit
pub const HOLDING: &str = "embed-lens-holding";

/// Depth tier class, e.g. `embed-lens-depth-2`
pub fn depth_class(depth: usize) -> String {
    format!("embed-lens-depth-{depth}")
}

/// Whether `class` is one this overlay manages
pub fn is_overlay_class(class: &str) -> bool {
    class.starts_with("embed-lens-") || class == COLLAPSED || class == EDITING
}

/// Whether `name` is an attribute this overlay manages
pub fn is_overlay_attr(name: &str) -> bool {
    matches!(
        name,
        ATTR_ID | ATTR_DEPTH | ATTR_FILE | ATTR_FROZEN | ATTR_FONT_SIZE | ATTR_FALLBACK
    )
}
