//! A filesystem-backed host.
//!
//! [`FsVault`] serves a directory of notes, [`PulldownRenderer`] turns markdown
//! into document nodes with `pulldown-cmark`, and [`HostSimulator`] plays the
//! host's part of loading embeds: it fills `![[...]]` placeholders with image,
//! PDF or transcluded-note markup, one nesting level at a time, the way a real
//! editor renders nested embeds over several passes.

use crate::classifier::{is_embed_block, EmbedKind};
use crate::dom::{Document, NodeId, SharedDocument};
use crate::error::{EmbedError, Result};
use crate::host::{FileRef, MarkdownRenderer, Vault};
use crate::link::LinkTarget;
use crate::markers;
use crate::nesting;
use async_trait::async_trait;
use parking_lot::RwLock;
use pulldown_cmark::{CodeBlockKind, Event, Options, Parser, Tag};
use regex::{Captures, Regex};
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, LazyLock};
use tracing::{debug, trace};

/// Wiki embeds, plus stray placeholder delimiters already present in the note.
static WIKI_EMBED_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"!\[\[([^\[\]\n]+)\]\]|[\x{E000}\x{E001}]").expect("wiki embed regex")
});

static PLACEHOLDER_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("\u{E000}(\\d+)\u{E001}").expect("placeholder regex"));

/// Nesting depth beyond which the simulated host stops loading embeds.
pub const HOST_MAX_EMBED_DEPTH: usize = 6;

/// Resolve `link_path` against the vault's file list.
///
/// Order: exact path, path relative to the source note's folder, `<link>.md`,
/// then a basename or stem match anywhere. Ambiguous basename matches go to the
/// shortest path.
pub fn resolve_path(files: &[String], link_path: &str, source_path: &str) -> Option<String> {
    let link = link_path.trim().trim_start_matches('/');
    if link.is_empty() {
        return None;
    }
    let exists = |p: &str| files.iter().any(|f| f == p);

    let source_dir = source_path.rsplit_once('/').map(|(dir, _)| dir);
    let mut direct = vec![link.to_string(), format!("{link}.md")];
    if let Some(dir) = source_dir {
        direct.insert(1, format!("{dir}/{link}"));
        direct.insert(2, format!("{dir}/{link}.md"));
    }
    if let Some(hit) = direct.into_iter().find(|p| exists(p)) {
        return Some(hit);
    }

    let suffix = format!("/{link}");
    let suffix_md = format!("/{link}.md");
    let bare = !link.contains('/');
    let mut candidates: Vec<&String> = files
        .iter()
        .filter(|f| {
            f.ends_with(&suffix)
                || f.ends_with(&suffix_md)
                || (bare && FileRef::new(f.as_str()).name() == link)
        })
        .collect();
    candidates.sort_by_key(|f| (f.len(), f.as_str()));
    candidates.first().map(|f| f.to_string())
}

/// Notes in a directory on disk.
#[derive(Debug)]
pub struct FsVault {
    root: PathBuf,
    index: RwLock<Vec<String>>,
}

impl FsVault {
    /// Open the vault at `root`, indexing every file under it.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let vault = Self {
            root: root.into(),
            index: RwLock::new(Vec::new()),
        };
        vault.refresh().await?;
        Ok(vault)
    }

    /// Vault directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Indexed files, vault-relative and sorted
    pub fn files(&self) -> Vec<String> {
        self.index.read().clone()
    }

    /// Rescan the directory. Hidden entries are skipped.
    pub async fn refresh(&self) -> Result<usize> {
        let mut files = Vec::new();
        let mut pending = vec![self.root.clone()];
        while let Some(dir) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let name = entry.file_name().to_string_lossy().to_string();
                if name.starts_with('.') {
                    continue;
                }
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                } else if let Some(relative) = self.relative(&path) {
                    files.push(relative);
                }
            }
        }
        files.sort();
        let count = files.len();
        debug!(root = %self.root.display(), files = count, "Indexed vault");
        *self.index.write() = files;
        Ok(count)
    }

    fn relative(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().to_string())
            .collect();
        Some(parts.join("/"))
    }

    fn absolute(&self, file: &FileRef) -> Result<PathBuf> {
        let relative = Path::new(&file.path);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if escapes || file.path.is_empty() {
            return Err(EmbedError::Host(format!(
                "'{}' is not a path inside the vault",
                file.path
            )));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl Vault for FsVault {
    fn resolve_link(&self, link_path: &str, source_path: &str) -> Option<FileRef> {
        resolve_path(&self.index.read(), link_path, source_path).map(FileRef::new)
    }

    async fn read(&self, file: &FileRef) -> Result<String> {
        let path = self.absolute(file)?;
        Ok(tokio::fs::read_to_string(path).await?)
    }

    async fn write(&self, file: &FileRef, content: &str) -> Result<()> {
        let path = self.absolute(file)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, content).await?;

        let mut index = self.index.write();
        if let Err(at) = index.binary_search(&file.path) {
            index.insert(at, file.path.clone());
        }
        trace!(path = %file, bytes = content.len(), "Wrote file");
        Ok(())
    }
}

/// Markdown to document nodes. `![[target]]` becomes the host's embed
/// placeholder, `<span class="internal-embed" src="target">`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PulldownRenderer;

impl PulldownRenderer {
    /// Append the rendering of `markdown` to `container`.
    pub fn render_into(doc: &mut Document, container: NodeId, markdown: &str) -> Result<()> {
        // Every delimiter left in `prepared` is one of ours
        let mut targets: Vec<Slot> = Vec::new();
        let prepared = WIKI_EMBED_REGEX.replace_all(markdown, |caps: &Captures| {
            targets.push(match caps.get(1) {
                Some(target) => Slot::Embed(target.as_str().to_string()),
                None => Slot::Literal(caps[0].to_string()),
            });
            format!("\u{E000}{}\u{E001}", targets.len() - 1)
        });

        let options = Options::ENABLE_STRIKETHROUGH | Options::ENABLE_TABLES | Options::ENABLE_TASKLISTS;
        let mut stack = vec![container];
        let mut pending = String::new();

        for event in Parser::new_ext(&prepared, options) {
            let parent = stack.last().copied().unwrap_or(container);
            match event {
                Event::Text(text) => pending.push_str(&text),
                Event::SoftBreak => pending.push('\n'),
                other => {
                    flush_text(doc, parent, &mut pending, &targets)?;
                    match other {
                        Event::Start(tag) => {
                            let node = element_for(doc, &tag)?;
                            doc.append_child(parent, node)?;
                            stack.push(node);
                        }
                        Event::End(_) => {
                            if stack.len() > 1 {
                                stack.pop();
                            }
                        }
                        Event::Code(code) => {
                            let node = doc.create_element("code");
                            let text = doc.create_text(&restore_literals(&code, &targets));
                            doc.append_child(node, text)?;
                            doc.append_child(parent, node)?;
                        }
                        Event::HardBreak => {
                            let node = doc.create_element("br");
                            doc.append_child(parent, node)?;
                        }
                        Event::Rule => {
                            let node = doc.create_element("hr");
                            doc.append_child(parent, node)?;
                        }
                        Event::TaskListMarker(done) => {
                            let node = doc.create_element("input");
                            doc.set_attr(node, "type", "checkbox")?;
                            if done {
                                doc.set_attr(node, "checked", "true")?;
                            }
                            doc.append_child(parent, node)?;
                        }
                        _ => {}
                    }
                }
            }
        }
        let parent = stack.last().copied().unwrap_or(container);
        flush_text(doc, parent, &mut pending, &targets)
    }
}

#[async_trait]
impl MarkdownRenderer for PulldownRenderer {
    async fn render(
        &self,
        markdown: &str,
        container: NodeId,
        document: &SharedDocument,
        _source_path: &str,
    ) -> Result<()> {
        let mut doc = document.lock();
        Self::render_into(&mut doc, container, markdown)
    }
}

fn element_for(doc: &mut Document, tag: &Tag<'_>) -> Result<NodeId> {
    let node = match tag {
        Tag::Paragraph => doc.create_element("p"),
        Tag::Heading { level, .. } => doc.create_element(&format!("h{}", *level as usize)),
        Tag::BlockQuote(_) => doc.create_element("blockquote"),
        Tag::CodeBlock(kind) => {
            let node = doc.create_element("pre");
            if let CodeBlockKind::Fenced(lang) = kind {
                if !lang.is_empty() {
                    doc.add_class(node, &format!("language-{lang}"))?;
                }
            }
            node
        }
        Tag::List(Some(start)) => {
            let node = doc.create_element("ol");
            if *start != 1 {
                doc.set_attr(node, "start", &start.to_string())?;
            }
            node
        }
        Tag::List(None) => doc.create_element("ul"),
        Tag::Item => doc.create_element("li"),
        Tag::Emphasis => doc.create_element("em"),
        Tag::Strong => doc.create_element("strong"),
        Tag::Strikethrough => doc.create_element("del"),
        Tag::Link { dest_url, .. } => {
            let node = doc.create_element("a");
            doc.set_attr(node, "href", dest_url)?;
            node
        }
        Tag::Image { dest_url, .. } => {
            let node = doc.create_element("img");
            doc.set_attr(node, "src", dest_url)?;
            node
        }
        Tag::Table(_) => doc.create_element("table"),
        Tag::TableHead => doc.create_element("thead"),
        Tag::TableRow => doc.create_element("tr"),
        Tag::TableCell => doc.create_element("td"),
        _ => doc.create_element("div"),
    };
    Ok(node)
}

/// What a placeholder in the prepared markdown stands for.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Slot {
    Embed(String),
    Literal(String),
}

impl Slot {
    fn source(&self) -> String {
        match self {
            Slot::Embed(target) => format!("![[{target}]]"),
            Slot::Literal(text) => text.clone(),
        }
    }
}

/// Emit buffered text under `parent`, turning placeholders into embed spans.
fn flush_text(doc: &mut Document, parent: NodeId, pending: &mut String, targets: &[Slot]) -> Result<()> {
    if pending.is_empty() {
        return Ok(());
    }
    let text = std::mem::take(pending);

    // Alt text of images is not content
    if doc.tag(parent) == Some("img") {
        doc.set_attr(parent, "alt", &restore_literals(&text, targets))?;
        return Ok(());
    }
    if doc.closest(parent, |d, n| d.tag(n) == Some("pre")).is_some() {
        let node = doc.create_text(&restore_literals(&text, targets));
        return doc.append_child(parent, node);
    }

    let mut last = 0;
    let mut run = String::new();
    for caps in PLACEHOLDER_REGEX.captures_iter(&text) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        run.push_str(&text[last..whole.start()]);
        last = whole.end();
        let slot = caps[1].parse::<usize>().ok().and_then(|i| targets.get(i));
        let target = match slot {
            Some(Slot::Literal(literal)) => {
                run.push_str(literal);
                continue;
            }
            Some(Slot::Embed(target)) => target.as_str(),
            None => "",
        };
        if !run.is_empty() {
            let node = doc.create_text(&std::mem::take(&mut run));
            doc.append_child(parent, node)?;
        }
        let embed = doc.create_element_with_classes("span", &[markers::HOST_EMBED]);
        doc.set_attr(embed, markers::HOST_SRC, target)?;
        doc.set_attr(embed, "alt", target)?;
        doc.append_child(parent, embed)?;
    }
    run.push_str(&text[last..]);
    if !run.is_empty() {
        let node = doc.create_text(&run);
        doc.append_child(parent, node)?;
    }
    Ok(())
}

fn restore_literals(text: &str, targets: &[Slot]) -> String {
    PLACEHOLDER_REGEX
        .replace_all(text, |caps: &Captures| {
            caps[1]
                .parse::<usize>()
                .ok()
                .and_then(|i| targets.get(i))
                .map(Slot::source)
                .unwrap_or_default()
        })
        .into_owned()
}

/// Plays the host application: renders notes and loads their embeds.
#[derive(Clone)]
pub struct HostSimulator {
    vault: Arc<dyn Vault>,
    document: SharedDocument,
    max_depth: usize,
}

impl HostSimulator {
    /// Host over `vault`, rendering into `document`.
    pub fn new(vault: Arc<dyn Vault>, document: SharedDocument) -> Self {
        Self {
            vault,
            document,
            max_depth: HOST_MAX_EMBED_DEPTH,
        }
    }

    /// Stop loading embeds nested deeper than `depth`.
    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    /// Replace the contents of `container` with the note at `path`, embeds loaded.
    pub async fn render_note(&self, container: NodeId, path: &str) -> Result<usize> {
        self.render_note_shallow(container, path).await?;
        self.load_embeds(container, path).await
    }

    /// Replace the contents of `container` with the note at `path`, leaving
    /// every embed unloaded.
    pub async fn render_note_shallow(&self, container: NodeId, path: &str) -> Result<()> {
        let markdown = self.vault.read(&FileRef::new(path)).await?;
        let mut doc = self.document.lock();
        doc.clear_children(container)?;
        PulldownRenderer::render_into(&mut doc, container, &markdown)
    }

    /// Load every embed under `container`, level by level. Returns how many
    /// were loaded.
    pub async fn load_embeds(&self, container: NodeId, source_path: &str) -> Result<usize> {
        let mut total = 0;
        for _ in 0..=self.max_depth {
            let loaded = self.load_level(container, source_path).await?;
            if loaded == 0 {
                break;
            }
            total += loaded;
        }
        Ok(total)
    }

    /// Load the embeds under `container` that are currently pending, but not
    /// the ones their content brings in.
    pub async fn load_level(&self, container: NodeId, source_path: &str) -> Result<usize> {
        let pending: Vec<(NodeId, String, String)> = {
            let doc = self.document.lock();
            if !doc.contains(container) {
                return Ok(0);
            }
            doc.descendants(container)
                .into_iter()
                .filter(|n| is_pending(&doc, *n))
                .filter(|n| nesting::raw_depth(&doc, *n) < self.max_depth)
                .filter_map(|n| {
                    let src = doc.attr(n, markers::HOST_SRC)?.to_string();
                    Some((n, src, self.source_for(&doc, n, source_path)))
                })
                .collect()
        };

        let mut loaded = 0;
        for (embed, src, source) in pending {
            let link = LinkTarget::parse(&src);
            let Some(file) = self.vault.resolve_link(&link.path, &source) else {
                let mut doc = self.document.lock();
                if doc.contains(embed) {
                    doc.add_class(embed, "mod-empty")?;
                }
                continue;
            };
            let kind = file
                .extension()
                .map(|ext| EmbedKind::from_extension(&ext))
                .unwrap_or(EmbedKind::Text);

            let markdown = match kind {
                EmbedKind::Text => Some(self.vault.read(&file).await?),
                _ => None,
            };

            let mut doc = self.document.lock();
            if !doc.contains(embed) || !is_pending(&doc, embed) {
                continue;
            }
            doc.remove_class(embed, "mod-empty")?;
            match markdown {
                None if kind == EmbedKind::Image => {
                    doc.add_class(embed, "image-embed")?;
                    doc.add_class(embed, "media-embed")?;
                    let img = doc.create_element("img");
                    doc.set_attr(img, "src", &file.path)?;
                    doc.append_child(embed, img)?;
                }
                None => {
                    doc.add_class(embed, "pdf-embed")?;
                    let viewer = doc.create_element_with_classes("div", &["pdf-container"]);
                    let frame = doc.create_element("iframe");
                    doc.set_attr(frame, "src", &file.path)?;
                    doc.append_child(viewer, frame)?;
                    doc.append_child(embed, viewer)?;
                }
                Some(markdown) => {
                    doc.add_class(embed, "markdown-embed")?;
                    let content = doc.create_element_with_classes("div", &[markers::HOST_CONTENT]);
                    PulldownRenderer::render_into(&mut doc, content, &markdown)?;
                    doc.append_child(embed, content)?;
                    let open = doc.create_element_with_classes("div", &[markers::HOST_LINK]);
                    doc.append_child(embed, open)?;
                }
            }
            doc.add_class(embed, markers::HOST_LOADED)?;
            trace!(src, path = %file, "Host loaded embed");
            loaded += 1;
        }
        Ok(loaded)
    }

    /// The note an embed's link is written in: its parent embeds resolved
    /// outermost first.
    fn source_for(&self, doc: &Document, embed: NodeId, root_source: &str) -> String {
        let mut chain: Vec<NodeId> = doc
            .ancestors(embed)
            .into_iter()
            .filter(|a| is_embed_block(doc, *a))
            .collect();
        chain.reverse();

        let mut source = root_source.to_string();
        for parent in chain {
            let Some(src) = doc.attr(parent, markers::HOST_SRC) else {
                continue;
            };
            if let Some(file) = self.vault.resolve_link(&LinkTarget::parse(src).path, &source) {
                source = file.path;
            }
        }
        source
    }
}

fn is_pending(doc: &Document, node: NodeId) -> bool {
    is_embed_block(doc, node)
        && !doc.has_class(node, markers::HOST_LOADED)
        && doc.child_with_class(node, markers::HOST_CONTENT).is_none()
}

#[async_trait]
impl MarkdownRenderer for HostSimulator {
    async fn render(
        &self,
        markdown: &str,
        container: NodeId,
        document: &SharedDocument,
        source_path: &str,
    ) -> Result<()> {
        {
            let mut doc = document.lock();
            PulldownRenderer::render_into(&mut doc, container, markdown)?;
        }
        self.load_embeds(container, source_path).await?;
        Ok(())
    }
}
