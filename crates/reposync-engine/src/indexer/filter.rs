//! Include/exclude filename patterns for the tree walk.

use anyhow::Context;
use regex::Regex;
use std::path::Path;

use crate::error::Result;

/// Decides which entries of a tree the indexer visits.
#[derive(Debug, Clone, Default)]
pub struct EntryFilter {
    include: Vec<Regex>,
    exclude: Vec<Regex>,
}

impl EntryFilter {
    pub fn new<S: AsRef<str>>(include: &[S], exclude: &[S]) -> Result<Self> {
        Ok(Self {
            include: include
                .iter()
                .map(|g| glob_to_regex(g.as_ref()))
                .collect::<Result<_>>()?,
            exclude: exclude
                .iter()
                .map(|g| glob_to_regex(g.as_ref()))
                .collect::<Result<_>>()?,
        })
    }

    /// Whether the entry at `relative` (to the walk root) is visited.
    ///
    /// Exclusions apply to everything; inclusions only to files, so a
    /// pattern like `*.tif` does not hide the directories holding them.
    pub fn allows(&self, relative: &Path, is_dir: bool) -> bool {
        if self.exclude.iter().any(|re| matches(re, relative)) {
            return false;
        }
        is_dir || self.include.is_empty() || self.include.iter().any(|re| matches(re, relative))
    }
}

/// Try the relative path first, then just the file name.
fn matches(regex: &Regex, path: &Path) -> bool {
    let path_str = path.to_string_lossy().replace('\\', "/");
    let filename = path.file_name().map(|s| s.to_string_lossy());

    regex.is_match(&path_str) || filename.map(|f| regex.is_match(&f)).unwrap_or(false)
}

/// Compile a filename glob to an anchored regex.
///
/// Supports `*`, `**`, `?`, `[...]` with `!` negation and `{a,b}`
/// alternation. Everything else matches literally.
fn glob_to_regex(glob: &str) -> Result<Regex> {
    let mut pattern = String::with_capacity(glob.len() * 2);
    pattern.push('^');

    let mut chars = glob.chars().peekable();
    let mut in_braces = false;
    while let Some(c) = chars.next() {
        match c {
            '*' if chars.peek() == Some(&'*') => {
                chars.next();
                // `**/` also matches zero directories
                if chars.next_if_eq(&'/').is_some() {
                    pattern.push_str("(?:.*/)?");
                } else {
                    pattern.push_str(".*");
                }
            }
            '*' => pattern.push_str("[^/]*"),
            '?' => pattern.push_str("[^/]"),
            '[' => {
                pattern.push('[');
                if chars.next_if_eq(&'!').is_some() {
                    pattern.push('^');
                }
                let mut closed = false;
                for c in chars.by_ref() {
                    if c == ']' {
                        closed = true;
                        break;
                    }
                    if c == '\\' || c == '[' {
                        pattern.push('\\');
                    }
                    pattern.push(c);
                }
                if !closed {
                    return Err(
                        anyhow::anyhow!("Unclosed character class in glob {:?}", glob).into(),
                    );
                }
                pattern.push(']');
            }
            '{' if !in_braces => {
                in_braces = true;
                pattern.push_str("(?:");
            }
            ',' if in_braces => pattern.push('|'),
            '}' if in_braces => {
                in_braces = false;
                pattern.push(')');
            }
            other => pattern.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
        }
    }
    if in_braces {
        return Err(anyhow::anyhow!("Unclosed alternation in glob {:?}", glob).into());
    }

    pattern.push('$');
    let compiled = Regex::new(&pattern)
        .with_context(|| format!("Failed to compile glob pattern {:?} as regex", glob))?;
    Ok(compiled)
}
