//! Inbound path patterns and downstream path templates

use super::RouteError;
use std::collections::BTreeMap;

/// Values captured from the inbound path, by name
pub type Captures = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    /// `*` or `{name}`: exactly one segment
    One(Option<String>),
    /// A final `**` or `{*name}`: the rest of the path, possibly empty
    Rest(Option<String>),
}

/// A parsed upstream path pattern.
///
/// A pattern without wildcards is a prefix that only matches on segment
/// boundaries: `/catalog` matches `/catalog` and `/catalog/items` but not
/// `/catalogue`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    raw: String,
    segments: Vec<Segment>,
    prefix: bool,
}

fn split(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|segment| !segment.is_empty())
}

fn invalid(pattern: &str, reason: impl Into<String>) -> RouteError {
    RouteError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: reason.into(),
    }
}

impl PathPattern {
    pub fn parse(raw: &str) -> Result<Self, RouteError> {
        if !raw.starts_with('/') {
            return Err(invalid(raw, "must start with '/'"));
        }
        let parts: Vec<&str> = split(raw).collect();
        let mut segments = Vec::with_capacity(parts.len());
        for (index, part) in parts.iter().enumerate() {
            let last = index + 1 == parts.len();
            let segment = match *part {
                "**" => Segment::Rest(None),
                "*" => Segment::One(None),
                part if part.starts_with("{*") && part.ends_with('}') => {
                    Segment::Rest(Some(capture_name(raw, &part[2..part.len() - 1])?))
                }
                part if part.starts_with('{') && part.ends_with('}') => {
                    Segment::One(Some(capture_name(raw, &part[1..part.len() - 1])?))
                }
                part if part.contains(['*', '{', '}']) => {
                    return Err(invalid(raw, format!("malformed segment '{}'", part)));
                }
                part => Segment::Literal(part.to_string()),
            };
            if matches!(segment, Segment::Rest(_)) && !last {
                return Err(invalid(raw, "a rest wildcard must be the last segment"));
            }
            segments.push(segment);
        }

        let mut names: Vec<&str> = segments
            .iter()
            .filter_map(|segment| match segment {
                Segment::One(Some(name)) | Segment::Rest(Some(name)) => Some(name.as_str()),
                _ => None,
            })
            .collect();
        names.sort_unstable();
        if names.windows(2).any(|pair| pair[0] == pair[1]) {
            return Err(invalid(raw, "duplicate capture name"));
        }

        let prefix = segments
            .iter()
            .all(|segment| matches!(segment, Segment::Literal(_)));
        Ok(Self {
            raw: raw.to_string(),
            segments,
            prefix,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Names that a downstream template may reference
    pub fn capture_names(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|segment| match segment {
            Segment::One(Some(name)) | Segment::Rest(Some(name)) => Some(name.as_str()),
            _ => None,
        })
    }

    /// Match `path` against the pattern, returning the captured values
    pub fn matches(&self, path: &str) -> Option<Captures> {
        let parts: Vec<&str> = split(path).collect();
        let mut captures = Captures::new();

        for (index, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Literal(literal) => {
                    if parts.get(index) != Some(&literal.as_str()) {
                        return None;
                    }
                }
                Segment::One(name) => {
                    let part = parts.get(index)?;
                    if let Some(name) = name {
                        captures.insert(name.clone(), part.to_string());
                    }
                }
                Segment::Rest(name) => {
                    if let Some(name) = name {
                        captures.insert(name.clone(), parts[index..].join("/"));
                    }
                    return Some(captures);
                }
            }
        }

        if self.prefix || parts.len() == self.segments.len() {
            Some(captures)
        } else {
            None
        }
    }

    /// Remainder of `path` after a prefix pattern, with a leading '/', or empty
    pub(super) fn remainder(&self, path: &str) -> String {
        let rest: Vec<&str> = split(path).skip(self.segments.len()).collect();
        if rest.is_empty() {
            String::new()
        } else {
            format!("/{}", rest.join("/"))
        }
    }

    pub(super) fn is_prefix(&self) -> bool {
        self.prefix
    }
}

fn capture_name(pattern: &str, name: &str) -> Result<String, RouteError> {
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(invalid(pattern, format!("invalid capture name '{}'", name)));
    }
    Ok(name.to_string())
}

/// Downstream path template; `{name}` and `{*name}` are replaced by captures
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTemplate {
    raw: String,
}

impl PathTemplate {
    /// Parse a template, checking every placeholder against the pattern's captures
    pub fn parse(raw: &str, pattern: &PathPattern) -> Result<Self, RouteError> {
        if !raw.starts_with('/') {
            return Err(invalid(raw, "downstream path must start with '/'"));
        }
        let known: Vec<&str> = pattern.capture_names().collect();
        for name in placeholders(raw) {
            if !known.contains(&name) {
                return Err(invalid(
                    raw,
                    format!("'{}' is not captured by '{}'", name, pattern.as_str()),
                ));
            }
        }
        Ok(Self {
            raw: raw.to_string(),
        })
    }

    pub fn render(&self, captures: &Captures) -> String {
        let mut rendered = self.raw.clone();
        for (name, value) in captures {
            rendered = rendered
                .replace(&format!("{{*{}}}", name), value)
                .replace(&format!("{{{}}}", name), value);
        }
        // An empty rest capture must not leave a doubled or trailing slash
        while rendered.contains("//") {
            rendered = rendered.replace("//", "/");
        }
        if rendered.len() > 1 && rendered.ends_with('/') && !self.raw.ends_with('/') {
            rendered.pop();
        }
        rendered
    }
}

fn placeholders(template: &str) -> impl Iterator<Item = &str> {
    template.split('{').skip(1).filter_map(|part| {
        part.split_once('}')
            .map(|(name, _)| name.trim_start_matches('*'))
    })
}
