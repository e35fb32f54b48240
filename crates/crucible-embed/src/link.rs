//! Embed link text handling
//!
//! The host puts the raw link text of an embed (`Note`, `folder/Note#Heading|Alias`,
//! sometimes still wrapped as `![[Note]]` while the user is typing) into the
//! block's `src` attribute. This module splits it into parts and decides whether
//! it is final enough to act on.

use regex::Regex;
use std::sync::LazyLock;

static EMBED_WRAPPER_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^!?\[\[([^\[\]]*)\]\]$").expect("embed wrapper regex"));

/// Characters the host refuses in file names.
const FORBIDDEN_NAME_CHARS: &[char] = &['*', '"', '<', '>', ':', '?', '\\'];

/// Longest file name accepted as plausibly mid-creation.
const MAX_NAME_LEN: usize = 255;

/// Parsed link text.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LinkTarget {
    /// Path part as written (`folder/Note`, `Note.md`, `image.png`)
    pub path: String,
    /// Heading reference (`#heading`)
    pub heading: Option<String>,
    /// Block reference (`#^block-id`)
    pub block_ref: Option<String>,
    /// Display alias (`|alias`)
    pub alias: Option<String>,
}

impl LinkTarget {
    /// Parse raw link text, tolerating a `![[...]]` wrapper.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        let inner = EMBED_WRAPPER_REGEX
            .captures(raw)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str())
            .unwrap_or(raw);

        let (target_part, alias) = match inner.split_once('|') {
            Some((t, a)) => (t, Some(a.trim().to_string())),
            None => (inner, None),
        };

        let (path, heading, block_ref) = match target_part.split_once('#') {
            Some((t, r)) => match r.strip_prefix('^') {
                Some(block) => (t, None, Some(block.to_string())),
                None => (t, Some(r.to_string()), None),
            },
            None => (target_part, None, None),
        };

        Self {
            path: path.trim().to_string(),
            heading,
            block_ref,
            alias,
        }
    }

    /// Lowercased extension of the path part, if any.
    pub fn extension(&self) -> Option<String> {
        let file = self.path.rsplit('/').next()?;
        let (stem, ext) = file.rsplit_once('.')?;
        if stem.is_empty() || ext.is_empty() || ext.contains(' ') {
            return None;
        }
        Some(ext.to_ascii_lowercase())
    }

    /// Basename without extension: `folder/Note.md` -> `Note`.
    pub fn name(&self) -> String {
        let file = self.path.rsplit('/').next().unwrap_or(&self.path);
        match self.extension() {
            Some(ext) => file[..file.len() - ext.len() - 1].to_string(),
            None => file.to_string(),
        }
    }

    /// Title shown for this link: alias if given, otherwise the name.
    pub fn display(&self) -> String {
        self.alias.clone().unwrap_or_else(|| self.name())
    }
}

/// Why a link is not ready to be acted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MalformedReason {
    /// Nothing to resolve
    Empty,
    /// `[` and `]` do not pair up
    UnbalancedBrackets,
    /// Newline or tab inside the link
    ControlWhitespace,
    /// Leading or trailing whitespace
    PaddedWhitespace,
}

/// Reject link text that still carries typing artifacts.
pub fn check_syntax(raw: &str) -> Result<(), MalformedReason> {
    if raw.trim().is_empty() {
        return Err(MalformedReason::Empty);
    }
    if raw.contains(['\n', '\r', '\t']) {
        return Err(MalformedReason::ControlWhitespace);
    }
    if raw.trim() != raw {
        return Err(MalformedReason::PaddedWhitespace);
    }

    let mut depth: i32 = 0;
    for ch in raw.chars() {
        match ch {
            '[' => depth += 1,
            ']' => {
                depth -= 1;
                if depth < 0 {
                    return Err(MalformedReason::UnbalancedBrackets);
                }
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(MalformedReason::UnbalancedBrackets);
    }

    if LinkTarget::parse(raw).path.is_empty() {
        return Err(MalformedReason::Empty);
    }
    Ok(())
}

/// Whether an unresolved target could be a file that is still being created.
pub fn is_plausible_name(target: &LinkTarget) -> bool {
    let name = target.path.rsplit('/').next().unwrap_or("");
    !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && !name.ends_with('.')
        && !target.path.contains(FORBIDDEN_NAME_CHARS)
}

/// Name used for identity hashing: basename of the link without extension.
pub fn target_name(raw: &str) -> String {
    LinkTarget::parse(raw).name()
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn test_parse_full_link() {
        let link = LinkTarget::parse("folder/Note#Section|Shown");
        assert_eq!(link.path, "folder/Note");
        assert_eq!(link.heading.as_deref(), Some("Section"));
        assert_eq!(link.block_ref, None);
        assert_eq!(link.alias.as_deref(), Some("Shown"));
        assert_eq!(link.name(), "Note");
        assert_eq!(link.display(), "Shown");
    }

    #[test]
    fn test_parse_block_ref_and_wrapper() {
        let link = LinkTarget::parse("![[Note#^abc123]]");
        assert_eq!(link.path, "Note");
        assert_eq!(link.block_ref.as_deref(), Some("abc123"));
        assert_eq!(link.heading, None);
    }

    #[test_case("Note", None ; "no extension")]
    #[test_case("Note.md", Some("md") ; "markdown")]
    #[test_case("img/Photo.PNG", Some("png") ; "uppercase image")]
    #[test_case("v1.2 notes", None ; "dot in name with space")]
    #[test_case(".hidden", None ; "dotfile")]
    fn test_extension(raw: &str, expected: Option<&str>) {
        assert_eq!(LinkTarget::parse(raw).extension().as_deref(), expected);
    }

    #[test]
    fn test_target_name_strips_path_and_extension() {
        assert_eq!(target_name("a/b/C.md"), "C");
        assert_eq!(target_name("C"), "C");
        assert_eq!(target_name("C#Heading"), "C");
    }

    #[test_case("Note", Ok(()) ; "plain")]
    #[test_case("Note|Alias", Ok(()) ; "alias")]
    #[test_case("", Err(MalformedReason::Empty) ; "empty")]
    #[test_case("#Heading", Err(MalformedReason::Empty) ; "heading only")]
    #[test_case("Note]]", Err(MalformedReason::UnbalancedBrackets) ; "trailing brackets")]
    #[test_case("[[Note", Err(MalformedReason::UnbalancedBrackets) ; "leading brackets")]
    #[test_case("Note\nmore", Err(MalformedReason::ControlWhitespace) ; "newline")]
    #[test_case(" Note", Err(MalformedReason::PaddedWhitespace) ; "leading space")]
    fn test_check_syntax(raw: &str, expected: Result<(), MalformedReason>) {
        assert_eq!(check_syntax(raw), expected);
    }

    #[test_case("New Note", true ; "ordinary")]
    #[test_case("folder/New Note", true ; "nested")]
    #[test_case("What?", false ; "question mark")]
    #[test_case("Trailing.", false ; "trailing dot")]
    #[test_case("a:b", false ; "colon")]
    fn test_plausible_names(raw: &str, expected: bool) {
        assert_eq!(is_plausible_name(&LinkTarget::parse(raw)), expected);
    }
}
