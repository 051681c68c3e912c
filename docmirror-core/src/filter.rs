//! # filter: hierarchical include/exclude filtering of directory names
//!
//! Patterns are shell-style globs (`*`, `?`, `[set]`) matched against a single
//! node name, never a full path. Decisions are memoised per visited directory
//! so that descendants inherit them:
//!
//! - once a directory is excluded, everything beneath it is excluded without
//!   consulting any pattern;
//! - with an include whitelist, a directory whose ancestor was included is
//!   included too, unless its own name hits an exclude pattern (exclude wins).
//!
//! Documents are never matched against patterns. Whether a document is
//! mirrored depends only on the recorded state of its containing directory.
//!
//! [`NameFilter`] is mutated from the single-threaded tree walk only; download
//! tasks never touch it.

use std::collections::HashSet;

use regex::Regex;
use tracing::warn;

/// Split a comma separated pattern list, trimming items and dropping empties.
pub fn parse_patterns(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Include and exclude pattern lists for one session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterSpec {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

impl FilterSpec {
    pub fn new(include: Vec<String>, exclude: Vec<String>) -> Self {
        Self { include, exclude }
    }

    pub fn is_empty(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty()
    }
}

/// Result of [`NameFilter::should_include_node`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeDecision {
    Include,
    /// The node's own name failed the include list or hit an exclude pattern.
    Excluded,
    /// An ancestor directory was already excluded.
    ExcludedByAncestor,
}

impl NodeDecision {
    pub fn is_included(self) -> bool {
        self == NodeDecision::Include
    }

    pub fn skipped_by_ancestor(self) -> bool {
        self == NodeDecision::ExcludedByAncestor
    }
}

/// A compiled glob. Invalid patterns never match.
#[derive(Debug, Clone)]
struct Glob {
    compiled: Option<Regex>,
}

impl Glob {
    fn new(pattern: &str) -> Self {
        let compiled = glob_to_regex(pattern);
        if compiled.is_none() {
            warn!(pattern = %pattern, "[FILTER] Invalid glob pattern, it will never match");
        }
        Self { compiled }
    }

    fn matches(&self, name: &str) -> bool {
        self.compiled.as_ref().is_some_and(|re| re.is_match(name))
    }
}

fn matches_any(globs: &[Glob], name: &str) -> bool {
    globs.iter().any(|g| g.matches(name))
}

/// Convert a single-segment shell glob into an anchored regex.
///
/// - `*` matches any run of characters except `/`
/// - `?` matches one character except `/`
/// - `[abc]`, `[a-z]`, `[!abc]` / `[^abc]` are character classes
/// - `\x` matches `x` literally
///
/// Returns `None` for malformed patterns (unterminated or empty classes,
/// trailing escape, reversed ranges).
fn glob_to_regex(pattern: &str) -> Option<Regex> {
    let mut re = String::with_capacity(pattern.len() * 2 + 2);
    re.push('^');

    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => re.push_str("[^/]*"),
            '?' => re.push_str("[^/]"),
            '\\' => {
                let escaped = chars.next()?;
                re.push_str(&regex::escape(escaped.encode_utf8(&mut [0; 4])));
            }
            '[' => {
                re.push('[');
                if matches!(chars.peek(), Some('!') | Some('^')) {
                    chars.next();
                    re.push('^');
                }
                let mut closed = false;
                let mut empty = true;
                while let Some(c) = chars.next() {
                    match c {
                        ']' if empty => return None,
                        ']' => {
                            closed = true;
                            break;
                        }
                        '\\' => push_class_literal(&mut re, chars.next()?),
                        '-' if !empty && chars.peek().is_some_and(|n| *n != ']') => re.push('-'),
                        c => push_class_literal(&mut re, c),
                    }
                    empty = false;
                }
                if !closed {
                    return None;
                }
                re.push(']');
            }
            c => re.push_str(&regex::escape(c.encode_utf8(&mut [0; 4]))),
        }
    }

    re.push('$');
    Regex::new(&re).ok()
}

fn push_class_literal(re: &mut String, c: char) {
    if matches!(c, '\\' | '[' | ']' | '^' | '-' | '&' | '~') {
        re.push('\\');
    }
    re.push(c);
}

/// Clean a slash separated path: collapse `//` and `.`, resolve `..`.
/// The empty path becomes `"."`.
pub fn normalize_path(path: &str) -> String {
    let unified;
    let path = if std::path::MAIN_SEPARATOR == '\\' {
        unified = path.replace('\\', "/");
        unified.as_str()
    } else {
        path
    };

    let absolute = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if parts.last().is_some_and(|p| *p != "..") {
                    parts.pop();
                } else if !absolute {
                    parts.push("..");
                }
            }
            s => parts.push(s),
        }
    }

    let joined = parts.join("/");
    if absolute {
        format!("/{joined}")
    } else if joined.is_empty() {
        ".".to_owned()
    } else {
        joined
    }
}

/// Normalised `parent/name`.
pub fn join_path(parent: &str, name: &str) -> String {
    normalize_path(&format!("{parent}/{name}"))
}

fn parent_of(path: &str) -> Option<&str> {
    match path.rfind('/') {
        Some(0) if path.len() > 1 => Some("/"),
        Some(0) | None => None,
        Some(i) => Some(&path[..i]),
    }
}

/// True when `path` or any of its ancestors is in `set`.
fn path_or_ancestor_in(set: &HashSet<String>, path: &str) -> bool {
    if path.is_empty() || path == "." {
        return false;
    }
    let mut current = Some(path);
    while let Some(p) = current {
        if set.contains(p) {
            return true;
        }
        current = parent_of(p);
    }
    false
}

/// Stateful include/exclude filter for one tree walk.
#[derive(Debug, Clone)]
pub struct NameFilter {
    spec: FilterSpec,
    include: Vec<Glob>,
    exclude: Vec<Glob>,
    excluded_paths: HashSet<String>,
    included_paths: HashSet<String>,
}

impl NameFilter {
    pub fn new(spec: FilterSpec) -> Self {
        let include = spec.include.iter().map(|p| Glob::new(p)).collect();
        let exclude = spec.exclude.iter().map(|p| Glob::new(p)).collect();
        Self {
            spec,
            include,
            exclude,
            excluded_paths: HashSet::new(),
            included_paths: HashSet::new(),
        }
    }

    pub fn spec(&self) -> &FilterSpec {
        &self.spec
    }

    pub fn has_filters(&self) -> bool {
        !self.spec.is_empty()
    }

    /// Decide whether the directory `name` under `parent_path` is visited, and
    /// record the decision for its descendants.
    pub fn should_include_node(&mut self, parent_path: &str, name: &str) -> NodeDecision {
        let parent = normalize_path(parent_path);
        let current = join_path(&parent, name);

        if path_or_ancestor_in(&self.excluded_paths, &parent) {
            self.excluded_paths.insert(current);
            return NodeDecision::ExcludedByAncestor;
        }

        if !self.has_filters() {
            return NodeDecision::Include;
        }

        if !self.include.is_empty() {
            let pre_included = path_or_ancestor_in(&self.included_paths, &parent);
            if !pre_included && !matches_any(&self.include, name) {
                self.excluded_paths.insert(current);
                return NodeDecision::Excluded;
            }
        }

        if matches_any(&self.exclude, name) {
            self.excluded_paths.insert(current);
            return NodeDecision::Excluded;
        }

        self.included_paths.insert(current);
        NodeDecision::Include
    }

    /// [`Self::should_include_node`] reduced to its include flag.
    pub fn should_download_folder(&mut self, parent_path: &str, name: &str) -> bool {
        self.should_include_node(parent_path, name).is_included()
    }

    /// Whether a document directly inside `parent_path` is mirrored.
    ///
    /// With an include whitelist the directory (or an ancestor) must have been
    /// recorded as included, so documents at an unmatched root are skipped.
    pub fn should_download_document(&self, parent_path: &str) -> bool {
        let parent = normalize_path(parent_path);
        if path_or_ancestor_in(&self.excluded_paths, &parent) {
            return false;
        }
        if !self.include.is_empty() {
            return path_or_ancestor_in(&self.included_paths, &parent);
        }
        true
    }

    /// Forget every recorded decision. Patterns still apply.
    pub fn reset(&mut self) {
        self.excluded_paths.clear();
        self.included_paths.clear();
    }
}
