//! Title bar overlay and its click handling.
//!
//! A title bar is a detached subtree built here and inserted by the driver as
//! the first child of an embed block. Click handlers are kept in a
//! [`ListenerRegistry`] keyed by node, so teardown can drop all of them at once
//! and stale entries for nodes the host removed can be pruned.

use crate::dom::{Document, NodeId};
use crate::error::Result;
use crate::markers;
use crucible_embed_config::EmbedSettings;
use parking_lot::Mutex;
use std::collections::HashMap;

/// Icon shown while expanded
pub const ICON_EXPANDED: &str = "▾";
/// Icon shown while collapsed
pub const ICON_COLLAPSED: &str = "▸";
const ICON_EDIT: &str = "✎";
const ICON_JUMP: &str = "↗";

/// Title bar button semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TitleAction {
    /// Collapse or expand the block
    ToggleCollapse,
    /// Enter or leave in-place editing
    ToggleEdit,
    /// Open the embedded file
    Jump,
}

/// A registered click handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Listener {
    /// Title bar button for the block `identity`
    Title {
        /// Block the button belongs to
        identity: String,
        /// What the button does
        action: TitleAction,
    },
    /// Host "open source" affordance whose default behavior is cancelled
    InterceptOpen,
}

/// Result of dispatching a click.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickOutcome {
    /// A title bar action ran
    Handled {
        /// Block the action applied to
        identity: String,
        /// Which action
        action: TitleAction,
    },
    /// The host's default handling was cancelled
    DefaultPrevented,
    /// Not ours; the host handles it
    NotHandled,
}

/// Tracked click listeners.
#[derive(Debug, Default)]
pub struct ListenerRegistry {
    listeners: Mutex<HashMap<NodeId, Listener>>,
}

impl ListenerRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach `listener` to `node`, replacing any previous one.
    pub fn register(&self, node: NodeId, listener: Listener) {
        self.listeners.lock().insert(node, listener);
    }

    /// Listener nearest to `target`, walking up like event bubbling.
    pub fn lookup(&self, doc: &Document, target: NodeId) -> Option<(NodeId, Listener)> {
        if !doc.contains(target) {
            return None;
        }
        let listeners = self.listeners.lock();
        std::iter::once(target)
            .chain(doc.ancestors(target))
            .find_map(|n| listeners.get(&n).map(|l| (n, l.clone())))
    }

    /// Drop listeners whose node is gone.
    pub fn prune(&self, doc: &Document) -> usize {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|node, _| doc.contains(*node));
        before - listeners.len()
    }

    /// Drop listeners on `root` and its subtree.
    pub fn remove_within(&self, doc: &Document, root: NodeId) {
        self.listeners
            .lock()
            .retain(|node, _| doc.contains(*node) && !doc.is_within(*node, root));
    }

    /// Drop every listener.
    pub fn clear(&self) {
        self.listeners.lock().clear();
    }

    /// Number of registered listeners
    pub fn len(&self) -> usize {
        self.listeners.lock().len()
    }

    /// Whether no listeners are registered
    pub fn is_empty(&self) -> bool {
        self.listeners.lock().is_empty()
    }
}

/// Inputs for [`build_title_bar`].
#[derive(Debug, Clone, Copy)]
pub struct TitleBarOptions<'a> {
    /// Text shown in the bar
    pub label: &'a str,
    /// Identity of the block the bar belongs to
    pub identity: &'a str,
    /// Clamped nesting depth
    pub depth: usize,
    /// Whether the block starts collapsed
    pub collapsed: bool,
    /// Current settings
    pub settings: &'a EmbedSettings,
}

/// Build a detached title bar and register its listeners.
pub fn build_title_bar(
    doc: &mut Document,
    options: &TitleBarOptions<'_>,
    listeners: &ListenerRegistry,
) -> Result<NodeId> {
    let depth_class = markers::depth_class(options.depth);
    let bar = doc.create_element_with_classes("div", &[markers::TITLE_BAR, &depth_class]);
    doc.set_attr(bar, markers::ATTR_FONT_SIZE, &options.settings.font_size.as_css())?;
    listeners.register(bar, title_listener(options.identity, TitleAction::ToggleCollapse));

    if options.settings.show_collapse_icon {
        let icon = if options.collapsed {
            ICON_COLLAPSED
        } else {
            ICON_EXPANDED
        };
        let node = button(doc, bar, markers::TITLE_COLLAPSE, icon)?;
        listeners.register(node, title_listener(options.identity, TitleAction::ToggleCollapse));
    }

    button(doc, bar, markers::TITLE_LABEL, options.label)?;

    if options.settings.show_edit_button {
        let node = button(doc, bar, markers::TITLE_EDIT, ICON_EDIT)?;
        listeners.register(node, title_listener(options.identity, TitleAction::ToggleEdit));
    }

    if options.settings.show_jump_button {
        let node = button(doc, bar, markers::TITLE_JUMP, ICON_JUMP)?;
        listeners.register(node, title_listener(options.identity, TitleAction::Jump));
    }

    Ok(bar)
}

/// Cancel the host's "open source" click on affordances inside `block`.
pub fn intercept_open_links(doc: &Document, block: NodeId, listeners: &ListenerRegistry) {
    for link in doc.query_class(block, markers::HOST_LINK) {
        listeners.register(link, Listener::InterceptOpen);
    }
}

/// Point the collapse icon of `bar` at the given state.
pub fn set_collapse_icon(doc: &mut Document, bar: NodeId, collapsed: bool) -> Result<()> {
    let Some(icon) = doc.child_with_class(bar, markers::TITLE_COLLAPSE) else {
        return Ok(());
    };
    let glyph = if collapsed {
        ICON_COLLAPSED
    } else {
        ICON_EXPANDED
    };
    doc.set_text_content(icon, glyph)
}

/// Whether `bar` matches what [`build_title_bar`] would produce for these settings.
pub fn matches_settings(doc: &Document, bar: NodeId, settings: &EmbedSettings) -> bool {
    doc.attr(bar, markers::ATTR_FONT_SIZE) == Some(settings.font_size.as_css().as_str())
        && doc.child_with_class(bar, markers::TITLE_COLLAPSE).is_some()
            == settings.show_collapse_icon
        && doc.child_with_class(bar, markers::TITLE_EDIT).is_some() == settings.show_edit_button
        && doc.child_with_class(bar, markers::TITLE_JUMP).is_some() == settings.show_jump_button
}

fn title_listener(identity: &str, action: TitleAction) -> Listener {
    Listener::Title {
        identity: identity.to_string(),
        action,
    }
}

fn button(doc: &mut Document, bar: NodeId, class: &str, text: &str) -> Result<NodeId> {
    let node = doc.create_element_with_classes("span", &[class]);
    let label = doc.create_text(text);
    doc.append_child(node, label)?;
    doc.append_child(bar, node)?;
    Ok(node)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options<'a>(settings: &'a EmbedSettings) -> TitleBarOptions<'a> {
        TitleBarOptions {
            label: "Note",
            identity: "embed-1",
            depth: 1,
            collapsed: false,
            settings,
        }
    }

    #[test]
    fn test_build_full_title_bar() {
        let settings = EmbedSettings::default();
        let mut doc = Document::new();
        let listeners = ListenerRegistry::new();
        let bar = build_title_bar(&mut doc, &options(&settings), &listeners).unwrap();

        assert!(doc.has_class(bar, markers::TITLE_BAR));
        assert!(doc.has_class(bar, "embed-lens-depth-1"));
        assert_eq!(doc.attr(bar, markers::ATTR_FONT_SIZE), Some("14px"));
        let label = doc.child_with_class(bar, markers::TITLE_LABEL).unwrap();
        assert_eq!(doc.text_content(label), "Note");
        assert!(matches_settings(&doc, bar, &settings));
        // bar, collapse, edit, jump
        assert_eq!(listeners.len(), 4);
    }

    #[test]
    fn test_hidden_buttons_are_not_built() {
        let settings = EmbedSettings {
            show_collapse_icon: false,
            show_edit_button: false,
            show_jump_button: false,
            ..Default::default()
        };
        let mut doc = Document::new();
        let listeners = ListenerRegistry::new();
        let bar = build_title_bar(&mut doc, &options(&settings), &listeners).unwrap();

        assert_eq!(doc.element_children(bar).len(), 1);
        assert!(!matches_settings(&doc, bar, &EmbedSettings::default()));
        assert_eq!(listeners.len(), 1);
    }

    #[test]
    fn test_lookup_bubbles_to_nearest_listener() {
        let settings = EmbedSettings::default();
        let mut doc = Document::new();
        let root = doc.root();
        let listeners = ListenerRegistry::new();
        let bar = build_title_bar(&mut doc, &options(&settings), &listeners).unwrap();
        doc.append_child(root, bar).unwrap();

        let edit = doc.child_with_class(bar, markers::TITLE_EDIT).unwrap();
        let glyph = doc.children(edit)[0];
        let (_, listener) = listeners.lookup(&doc, glyph).unwrap();
        assert_eq!(listener, title_listener("embed-1", TitleAction::ToggleEdit));

        let label = doc.child_with_class(bar, markers::TITLE_LABEL).unwrap();
        let (node, listener) = listeners.lookup(&doc, label).unwrap();
        assert_eq!(node, bar);
        assert_eq!(
            listener,
            title_listener("embed-1", TitleAction::ToggleCollapse)
        );
    }

    #[test]
    fn test_prune_and_remove_within() {
        let settings = EmbedSettings::default();
        let mut doc = Document::new();
        let root = doc.root();
        let listeners = ListenerRegistry::new();
        let bar = build_title_bar(&mut doc, &options(&settings), &listeners).unwrap();
        doc.append_child(root, bar).unwrap();
        let other = build_title_bar(&mut doc, &options(&settings), &listeners).unwrap();
        doc.append_child(root, other).unwrap();
        assert_eq!(listeners.len(), 8);

        doc.remove(bar).unwrap();
        assert_eq!(listeners.prune(&doc), 4);

        listeners.remove_within(&doc, other);
        assert!(listeners.is_empty());
    }

    #[test]
    fn test_collapse_icon_follows_state() {
        let settings = EmbedSettings::default();
        let mut doc = Document::new();
        let listeners = ListenerRegistry::new();
        let bar = build_title_bar(&mut doc, &options(&settings), &listeners).unwrap();
        let icon = doc.child_with_class(bar, markers::TITLE_COLLAPSE).unwrap();

        set_collapse_icon(&mut doc, bar, true).unwrap();
        assert_eq!(doc.text_content(icon), ICON_COLLAPSED);
        set_collapse_icon(&mut doc, bar, false).unwrap();
        assert_eq!(doc.text_content(icon), ICON_EXPANDED);
    }
}
