//! Reader for the bracketed-section configuration files.
//!
//! The gateway and hosts files are INI-like, but with one twist that ordinary readers get wrong:
//! a key may appear several times within a section (or within several `[section]` blocks with
//! the same header), and every occurrence must be kept. `REGISTER=...` repeated ten times is ten
//! records, not one. So values are kept as an append-only list of lines per key and only joined
//! with `\n` when asked for.
//!
//! Supported syntax:
//!
//! * `[name]` headers. Repeated headers merge into the first section of that name.
//! * `key=value` and `key: value`, whichever delimiter comes first. Keys are case-insensitive.
//! * Lines indented deeper than the previous key line continue its value as a new line. A
//!   key line at the same or a shallower indentation starts a new entry.
//! * Full-line comments starting with `#` or `;`. Blank lines are skipped.
//! * A `[DEFAULT]` section whose keys are visible in every other section.

use std::path::{Path, PathBuf};

pub const DEFAULT_SECTION: &str = "DEFAULT";

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("could not read the configuration file at {1:?}")]
    Read(#[source] std::io::Error, PathBuf),
    #[error("could not parse the configuration file at {1:?}")]
    Syntax(#[source] SyntaxError, PathBuf),
    #[error("section `{0}` is not present in the configuration")]
    SectionNotFound(String),
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum SyntaxError {
    #[error("line {0}: key defined before any `[section]` header")]
    MissingSectionHeader(usize),
    #[error("line {0}: expected a `[section]` header, a `key=value` pair or an indented continuation")]
    Unrecognized(usize),
    #[error("line {0}: section header has an empty name")]
    EmptySectionName(usize),
}

/// A single section with all of its key/value lines, in file order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RawSection {
    name: String,
    entries: Vec<(String, Vec<String>)>,
}

impl RawSection {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), entries: Vec::new() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Append a value line under `key`. A key seen before keeps its original position.
    pub fn push(&mut self, key: &str, line: impl Into<String>) {
        let key = key.to_lowercase();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, lines)) => lines.push(line.into()),
            None => self.entries.push((key, vec![line.into()])),
        }
    }

    /// All the value lines accumulated under `key`.
    pub fn lines(&self, key: &str) -> Option<&[String]> {
        let key = key.to_lowercase();
        self.entries.iter().find(|(k, _)| *k == key).map(|(_, lines)| &lines[..])
    }

    /// The value of `key`: every accumulated line joined with `\n`, trailing whitespace removed.
    pub fn get(&self, key: &str) -> Option<String> {
        let lines = self.lines(key)?;
        let mut value = lines.join("\n");
        value.truncate(value.trim_end().len());
        Some(value)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    fn merge_missing(&mut self, defaults: &RawSection) {
        for (key, lines) in &defaults.entries {
            if self.lines(key).is_none() {
                self.entries.push((key.clone(), lines.clone()));
            }
        }
    }
}

/// All sections of one configuration file.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SectionFile {
    defaults: RawSection,
    sections: Vec<RawSection>,
}

impl SectionFile {
    pub fn load(path: &Path) -> Result<Self, Error> {
        let text =
            std::fs::read_to_string(path).map_err(|e| Error::Read(e, path.to_path_buf()))?;
        Self::parse(&text).map_err(|e| Error::Syntax(e, path.to_path_buf()))
    }

    pub fn parse(text: &str) -> Result<Self, SyntaxError> {
        let mut file = SectionFile { defaults: RawSection::new(DEFAULT_SECTION), sections: vec![] };
        // (index into `sections`, or `None` for the defaults) and the last key seen there along
        // with the indentation of its line.
        let mut current: Option<Option<usize>> = None;
        let mut last_key: Option<(String, usize)> = None;
        for (index, line) in text.lines().enumerate() {
            let line_number = index + 1;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with(';') {
                continue;
            }
            let indent = line.len() - line.trim_start().len();
            if let (Some(target), Some((key, key_indent))) = (current, &last_key) {
                if indent > *key_indent {
                    file.target(target).push(key, trimmed);
                    continue;
                }
            }
            if let Some(name) = section_header(trimmed) {
                if name.is_empty() {
                    return Err(SyntaxError::EmptySectionName(line_number));
                }
                current = Some(file.open_section(name));
                last_key = None;
                continue;
            }
            let Some((key, value)) = key_value(trimmed) else {
                return Err(SyntaxError::Unrecognized(line_number));
            };
            let Some(target) = current else {
                return Err(SyntaxError::MissingSectionHeader(line_number));
            };
            file.target(target).push(key, value);
            last_key = Some((key.to_string(), indent));
        }
        Ok(file)
    }

    fn open_section(&mut self, name: &str) -> Option<usize> {
        if name == DEFAULT_SECTION {
            return None;
        }
        if let Some(position) = self.sections.iter().position(|s| s.name == name) {
            return Some(position);
        }
        self.sections.push(RawSection::new(name));
        Some(self.sections.len() - 1)
    }

    fn target(&mut self, target: Option<usize>) -> &mut RawSection {
        match target {
            None => &mut self.defaults,
            Some(index) => &mut self.sections[index],
        }
    }

    /// Section names in the order of their first appearance, `DEFAULT` excluded.
    pub fn section_names(&self) -> impl Iterator<Item = &str> {
        self.sections.iter().map(|s| s.name())
    }

    /// Look up a section with the `DEFAULT` keys filled in.
    pub fn section(&self, name: &str) -> Result<RawSection, Error> {
        let section = self
            .sections
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| Error::SectionNotFound(name.to_string()))?;
        Ok(self.resolve(section))
    }

    /// Every section with the `DEFAULT` keys filled in, in file order.
    pub fn sections(&self) -> impl Iterator<Item = RawSection> + '_ {
        self.sections.iter().map(|s| self.resolve(s))
    }

    fn resolve(&self, section: &RawSection) -> RawSection {
        let mut section = section.clone();
        section.merge_missing(&self.defaults);
        section
    }
}

/// Load a single section out of the file at `path`.
pub fn load_section(path: &Path, name: &str) -> Result<RawSection, Error> {
    SectionFile::load(path)?.section(name)
}

fn section_header(line: &str) -> Option<&str> {
    let rest = line.strip_prefix('[')?;
    let end = rest.rfind(']')?;
    Some(&rest[..end])
}

fn key_value(line: &str) -> Option<(&str, &str)> {
    let delimiter = line.find(['=', ':'])?;
    let key = line[..delimiter].trim();
    if key.is_empty() {
        return None;
    }
    Some((key, line[delimiter + 1..].trim()))
}
