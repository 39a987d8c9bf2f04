use crate::error::{ArchiveError, TemplateError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const ARCHIVE_EXTENSION: &str = ".tar.gz";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Name,
    Timestamp,
}

/// A printf-style archive naming template with exactly one `%s` (the
/// directory's base name) and one `%d` (the batch timestamp), e.g.
/// `"backup-%s-%d"`. `%%` is a literal percent sign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NamingTemplate {
    raw: String,
    segments: Vec<Segment>,
}

impl NamingTemplate {
    pub fn parse(template: &str) -> Result<Self, TemplateError> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut names = 0;
        let mut timestamps = 0;

        let mut chars = template.chars();
        while let Some(c) = chars.next() {
            if c != '%' {
                literal.push(c);
                continue;
            }

            let directive = chars.next();
            let placeholder = match directive {
                Some('%') => {
                    literal.push('%');
                    continue;
                }
                Some('s') => {
                    names += 1;
                    Segment::Name
                }
                Some('d') => {
                    timestamps += 1;
                    Segment::Timestamp
                }
                other => {
                    return Err(TemplateError::UnsupportedDirective {
                        template: template.to_string(),
                        directive: other.map(String::from).unwrap_or_default(),
                    })
                }
            };

            if !literal.is_empty() {
                segments.push(Segment::Literal(std::mem::take(&mut literal)));
            }
            segments.push(placeholder);
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        for (count, placeholder) in [(names, "%s"), (timestamps, "%d")] {
            match count {
                0 => {
                    return Err(TemplateError::MissingPlaceholder {
                        template: template.to_string(),
                        placeholder,
                    })
                }
                1 => {}
                _ => {
                    return Err(TemplateError::DuplicatePlaceholder {
                        template: template.to_string(),
                        placeholder,
                    })
                }
            }
        }

        Ok(Self {
            raw: template.to_string(),
            segments,
        })
    }

    /// Formats the archive file name for `base_name` at `timestamp`,
    /// including the `.tar.gz` suffix. Spaces become underscores.
    pub fn format(&self, base_name: &str, timestamp: i64) -> String {
        let mut name = String::with_capacity(self.raw.len() + base_name.len() + 16);
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => name.push_str(text),
                Segment::Name => name.push_str(base_name),
                Segment::Timestamp => name.push_str(&timestamp.to_string()),
            }
        }
        name.push_str(ARCHIVE_EXTENSION);
        name.replace(' ', "_")
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl Default for NamingTemplate {
    fn default() -> Self {
        Self::parse(crate::DEFAULT_NAME_TEMPLATE).expect("default naming template is valid")
    }
}

impl FromStr for NamingTemplate {
    type Err = TemplateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for NamingTemplate {
    type Error = TemplateError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<NamingTemplate> for String {
    fn from(template: NamingTemplate) -> Self {
        template.raw
    }
}

impl fmt::Display for NamingTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// One directory to archive and the file name its archive will get.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveJob {
    pub source: PathBuf,
    pub destination: String,
}

impl ArchiveJob {
    pub fn new(
        source: impl Into<PathBuf>,
        template: &NamingTemplate,
        timestamp: i64,
    ) -> Result<Self, ArchiveError> {
        let source = source.into();
        let base_name = base_name(&source)?;
        let destination = template.format(&base_name, timestamp);
        Ok(Self {
            source,
            destination,
        })
    }
}

/// Last component of `path`, ignoring trailing separators. Paths ending in
/// `.` or `..` are resolved on disk first, so `.` names the working
/// directory.
pub fn base_name(path: &Path) -> Result<String, ArchiveError> {
    let invalid = || ArchiveError::InvalidSource(path.to_path_buf());
    let name = match path.file_name() {
        Some(name) => name.to_os_string(),
        None => std::fs::canonicalize(path)
            .ok()
            .and_then(|resolved| resolved.file_name().map(|name| name.to_os_string()))
            .ok_or_else(invalid)?,
    };
    Ok(name.to_string_lossy().into_owned())
}
