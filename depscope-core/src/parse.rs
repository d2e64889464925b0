// Dependency-spec parser: one requirements line in, one typed record out.
//
// Parsing is total. Lines that cannot be read as a package degrade to
// `Commented` so they never show up as phantom regular dependencies.

use serde::{Deserialize, Serialize};

/// Characters that end the package-name token of a regular spec.
const NAME_TERMINATORS: &[char] = &['<', '>', '=', '!', '~', '[', ' ', ';'];

/// Classification of a single dependency line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpecKind {
    /// `name[extras]<version constraints>`, an installable package.
    Regular,
    /// A VCS reference, `git+https://...` or `name @ git+https://...`.
    Git,
    /// A pip directive such as `--extra-index-url` or `-r other.txt`.
    PipCommand,
    /// A commented-out line, a blank line, or a line that could not be read.
    Commented,
}

impl SpecKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Regular => "regular",
            Self::Git => "git",
            Self::PipCommand => "pip-command",
            Self::Commented => "commented",
        }
    }
}

impl std::fmt::Display for SpecKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed dependency line. `kind` decides which optional fields are set:
/// `base_name` for `Regular` (always) and `Git` (when named), `git_url` for
/// `Git` only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencySpec {
    pub kind: SpecKind,
    pub base_name: Option<String>,
    pub raw_text: String,
    pub version_spec: String,
    pub git_url: Option<String>,
}

impl DependencySpec {
    fn commented(raw_text: &str) -> Self {
        Self {
            kind: SpecKind::Commented,
            base_name: None,
            raw_text: raw_text.to_string(),
            version_spec: String::new(),
            git_url: None,
        }
    }

    fn pip_command(raw_text: &str) -> Self {
        Self {
            kind: SpecKind::PipCommand,
            base_name: None,
            raw_text: raw_text.to_string(),
            version_spec: String::new(),
            git_url: None,
        }
    }

    /// For a commented-out line, the package it would declare if re-enabled.
    pub fn commented_base_name(&self) -> Option<String> {
        if self.kind != SpecKind::Commented || self.raw_text.is_empty() {
            return None;
        }
        let inner = parse(&self.raw_text);
        match inner.kind {
            SpecKind::Regular | SpecKind::Git => inner.base_name,
            SpecKind::PipCommand | SpecKind::Commented => None,
        }
    }

    /// Identity used when counting distinct packages: the base name, or the
    /// full URL for an unnamed git reference.
    pub fn identity(&self) -> Option<&str> {
        match self.kind {
            SpecKind::Regular => self.base_name.as_deref(),
            SpecKind::Git => self.base_name.as_deref().or(self.git_url.as_deref()),
            SpecKind::PipCommand | SpecKind::Commented => None,
        }
    }
}

/// Parse one raw dependency line.
pub fn parse(line: &str) -> DependencySpec {
    let line = line.trim();
    if line.is_empty() {
        return DependencySpec::commented("");
    }

    if line.starts_with('#') {
        let text = line.trim_start_matches(|c: char| c == '#' || c.is_whitespace());
        return DependencySpec::commented(text);
    }

    // Package names never start with '-', so both `--index-url` and the
    // short `-r`/`-e`/`-c` forms are directives.
    if line.starts_with('-') {
        return DependencySpec::pip_command(line);
    }

    let text = strip_inline_comment(line);
    if text.is_empty() {
        return DependencySpec::commented("");
    }

    if let Some(spec) = parse_git(text) {
        return spec;
    }

    parse_regular(text)
}

/// Truncate at the first unquoted `#` that follows whitespace.
fn strip_inline_comment(text: &str) -> &str {
    let mut quote: Option<char> = None;
    let mut prev_is_space = false;
    for (idx, c) in text.char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '"' || c == '\'' => quote = Some(c),
            None if c == '#' && prev_is_space => return text[..idx].trim_end(),
            None => {}
        }
        prev_is_space = c.is_whitespace();
    }
    text
}

fn parse_git(text: &str) -> Option<DependencySpec> {
    if text.starts_with("git+") {
        return Some(DependencySpec {
            kind: SpecKind::Git,
            base_name: None,
            raw_text: text.to_string(),
            version_spec: String::new(),
            git_url: Some(text.to_string()),
        });
    }

    let (name, target) = text.split_once(" @ ")?;
    let target = target.trim_start();
    if !target.starts_with("git+") {
        return None;
    }
    let name = name.trim();
    let base_end = name.find(NAME_TERMINATORS).unwrap_or(name.len());
    let base = name[..base_end].to_lowercase();

    Some(DependencySpec {
        kind: SpecKind::Git,
        base_name: (!base.is_empty()).then_some(base),
        raw_text: text.to_string(),
        version_spec: String::new(),
        git_url: Some(target.to_string()),
    })
}

fn parse_regular(text: &str) -> DependencySpec {
    let split = text
        .find(|c: char| NAME_TERMINATORS.contains(&c) || c.is_whitespace())
        .unwrap_or(text.len());
    let (name, rest) = text.split_at(split);
    if name.is_empty() {
        // `>=1.0`, `[extra]` and friends: nothing to attribute the constraint to.
        return DependencySpec::commented(text);
    }

    DependencySpec {
        kind: SpecKind::Regular,
        base_name: Some(name.to_lowercase()),
        raw_text: text.to_string(),
        version_spec: rest.trim().to_string(),
        git_url: None,
    }
}

/// Parse every line of a requirements file, skipping blank lines.
pub fn parse_requirements_text(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}
