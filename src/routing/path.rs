//! Path templates.
//!
//! Supported segment forms:
//! - `users` literal, case-sensitive
//! - `*` any single segment
//! - `{id}` any single segment, captured as `id`
//! - `**` or `{*rest}` zero or more trailing segments (last segment only)
//!
//! Matching ignores a trailing slash on both the pattern and the path.

use std::fmt;

use crate::error::{GatewayError, GatewayResult};
use crate::http::exchange::PathVariables;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Any,
    Capture(String),
    Rest(Option<String>),
}

/// A compiled path template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    source: String,
    segments: Vec<Segment>,
}

fn split(path: &str) -> impl Iterator<Item = &str> {
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    let trimmed = trimmed.strip_suffix('/').unwrap_or(trimmed);
    trimmed.split('/').filter(|_| !trimmed.is_empty())
}

impl PathPattern {
    /// Compile a template.
    pub fn parse(pattern: &str) -> GatewayResult<Self> {
        let invalid = |reason: &str| GatewayError::PredicateEvaluation(format!("path pattern '{}': {}", pattern, reason));

        if !pattern.starts_with('/') {
            return Err(invalid("must start with '/'"));
        }

        let raw: Vec<&str> = split(pattern).collect();
        let mut segments = Vec::with_capacity(raw.len());
        for (i, seg) in raw.iter().enumerate() {
            let is_last = i + 1 == raw.len();
            let segment = if *seg == "**" {
                Segment::Rest(None)
            } else if *seg == "*" {
                Segment::Any
            } else if let Some(inner) = seg.strip_prefix('{') {
                let name = inner.strip_suffix('}').ok_or_else(|| invalid("unclosed '{'"))?;
                match name.strip_prefix('*') {
                    Some(rest) if rest.is_empty() => return Err(invalid("empty variable name")),
                    Some(rest) => Segment::Rest(Some(rest.to_string())),
                    None if name.is_empty() => return Err(invalid("empty variable name")),
                    None => Segment::Capture(name.to_string()),
                }
            } else if seg.contains(['{', '}']) || seg.contains('*') {
                return Err(invalid("wildcards and variables must span a whole segment"));
            } else if seg.is_empty() {
                return Err(invalid("empty segment"));
            } else {
                Segment::Literal(seg.to_string())
            };

            if matches!(segment, Segment::Rest(_)) && !is_last {
                return Err(invalid("'**' is only allowed as the last segment"));
            }
            segments.push(segment);
        }

        Ok(Self {
            source: pattern.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn matches(&self, path: &str) -> bool {
        self.captures(path).is_some()
    }

    /// Match `path`, returning captured variables on success.
    pub fn captures(&self, path: &str) -> Option<PathVariables> {
        let parts: Vec<&str> = split(path).collect();
        let mut vars = PathVariables::new();

        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Rest(name) => {
                    if let Some(name) = name {
                        vars.insert(name.clone(), parts.get(i..).map(|p| p.join("/")).unwrap_or_default());
                    }
                    return Some(vars);
                }
                Segment::Literal(lit) => {
                    if parts.get(i) != Some(&lit.as_str()) {
                        return None;
                    }
                }
                Segment::Any => {
                    parts.get(i)?;
                }
                Segment::Capture(name) => {
                    let value = parts.get(i)?;
                    vars.insert(name.clone(), (*value).to_string());
                }
            }
        }

        (parts.len() == self.segments.len()).then_some(vars)
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Expand `{name}` placeholders in `template` with captured variables.
/// Unknown placeholders expand to an empty string.
pub fn expand_template(template: &str, vars: &PathVariables) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        match rest[start..].find('}') {
            Some(end) => {
                let name = &rest[start + 1..start + end];
                let name = name.strip_prefix('*').unwrap_or(name);
                if let Some(value) = vars.get(name) {
                    out.push_str(value);
                }
                rest = &rest[start + end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}
