//! Path pattern compilation and matching.
//!
//! # Responsibilities
//! - Compile Sinatra-style templates (`/users/:id`, `/files/*`, `/x/*rest`)
//! - Accept explicit regular expressions with named groups
//! - Match a request path and extract URL-decoded captures
//!
//! # Design Decisions
//! - Templates without `:` or `*` stay literal and compare by string equality
//! - `:name` matches one segment (`[^/?#]+`), splats match lazily across `/`
//! - Several unnamed splats collect into an array under `splat`
//! - Regex group names are synthetic (`g0`, `g1`, ...) so any parameter
//!   spelling is accepted

use std::borrow::Cow;

use regex::Regex;
use serde_json::{Map, Value};

use super::RouteError;

const SPLAT: &str = "splat";

#[derive(Debug, Clone)]
struct Capture {
    group: String,
    param: String,
    /// Unnamed splat, collected under `splat`.
    collect: bool,
}

#[derive(Debug, Clone)]
enum Matcher {
    Literal,
    Compiled { regex: Regex, captures: Vec<Capture> },
}

/// A compiled route pattern.
#[derive(Debug, Clone)]
pub struct PathPattern {
    source: String,
    matcher: Matcher,
    /// Literal text before the first capture, for templates only.
    literal_prefix: Option<String>,
    trailing_splat: bool,
}

fn invalid(pattern: &str, reason: &'static str) -> RouteError {
    RouteError::InvalidPattern {
        pattern: pattern.to_string(),
        reason,
    }
}

fn compile(pattern: &str, expr: &str) -> Result<Regex, RouteError> {
    Regex::new(expr).map_err(|source| RouteError::InvalidRegex {
        pattern: pattern.to_string(),
        source,
    })
}

fn decode(raw: &str) -> String {
    urlencoding::decode(raw)
        .map(Cow::into_owned)
        .unwrap_or_else(|_| raw.to_string())
}

impl PathPattern {
    /// Compile a template pattern.
    pub fn parse(source: &str) -> Result<Self, RouteError> {
        if !source.starts_with('/') {
            return Err(invalid(source, "pattern must start with '/'"));
        }

        let first_capture = source.find(|c: char| c == ':' || c == '*');
        let Some(first_capture) = first_capture else {
            return Ok(Self {
                source: source.to_string(),
                matcher: Matcher::Literal,
                literal_prefix: Some(source.to_string()),
                trailing_splat: false,
            });
        };

        let mut expr = String::from("^");
        let mut literal = String::new();
        let mut captures: Vec<Capture> = Vec::new();
        let mut chars = source.chars().peekable();
        let mut trailing_splat = false;

        while let Some(c) = chars.next() {
            if c != ':' && c != '*' {
                literal.push(c);
                trailing_splat = false;
                continue;
            }

            expr.push_str(&regex::escape(&literal));
            literal.clear();

            let mut name = String::new();
            while let Some(&next) = chars.peek() {
                if next.is_ascii_alphanumeric() || next == '_' {
                    name.push(next);
                    chars.next();
                } else {
                    break;
                }
            }

            let group = format!("g{}", captures.len());
            let collect = c == '*' && name.is_empty();
            if c == ':' && name.is_empty() {
                return Err(invalid(source, "empty parameter name"));
            }
            if !collect && captures.iter().any(|capture| capture.param == name) {
                return Err(invalid(source, "duplicate parameter name"));
            }

            if c == ':' {
                expr.push_str(&format!("(?P<{group}>[^/?#]+)"));
                trailing_splat = false;
            } else {
                expr.push_str(&format!("(?P<{group}>.*?)"));
                trailing_splat = true;
            }

            captures.push(Capture {
                group,
                param: if collect { SPLAT.to_string() } else { name },
                collect,
            });
        }

        expr.push_str(&regex::escape(&literal));
        expr.push('$');

        Ok(Self {
            source: source.to_string(),
            matcher: Matcher::Compiled {
                regex: compile(source, &expr)?,
                captures,
            },
            literal_prefix: Some(source[..first_capture].to_string()),
            trailing_splat,
        })
    }

    /// Compile an explicit regular expression. Named groups become params.
    pub fn regex(source: &str) -> Result<Self, RouteError> {
        let regex = compile(source, &format!("^(?:{source})$"))?;
        let captures = regex
            .capture_names()
            .flatten()
            .map(|name| Capture {
                group: name.to_string(),
                param: name.to_string(),
                collect: false,
            })
            .collect();

        Ok(Self {
            source: source.to_string(),
            matcher: Matcher::Compiled { regex, captures },
            literal_prefix: None,
            trailing_splat: false,
        })
    }

    /// The pattern as written.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn is_literal(&self) -> bool {
        matches!(self.matcher, Matcher::Literal)
    }

    pub fn is_match(&self, path: &str) -> bool {
        match &self.matcher {
            Matcher::Literal => path == self.source,
            Matcher::Compiled { regex, .. } => regex.is_match(path),
        }
    }

    /// Match `path`, returning decoded captures on success.
    pub fn captures(&self, path: &str) -> Option<Map<String, Value>> {
        let (regex, captures) = match &self.matcher {
            Matcher::Literal => return (path == self.source).then(Map::new),
            Matcher::Compiled { regex, captures } => (regex, captures),
        };

        let found = regex.captures(path)?;
        let mut params = Map::new();
        let mut splats = Vec::new();
        for capture in captures {
            let Some(matched) = found.name(&capture.group) else {
                continue;
            };
            let value = Value::String(decode(matched.as_str()));
            if capture.collect {
                splats.push(value);
            } else {
                params.insert(capture.param.clone(), value);
            }
        }

        match splats.len() {
            0 => {}
            1 => {
                params.insert(SPLAT.to_string(), splats.remove(0));
            }
            _ => {
                params.insert(SPLAT.to_string(), Value::Array(splats));
            }
        }
        Some(params)
    }

    /// Literal text before the first capture. `None` for regex patterns.
    pub fn literal_prefix(&self) -> Option<&str> {
        self.literal_prefix.as_deref()
    }

    /// Whether the template ends with a splat.
    pub fn ends_with_splat(&self) -> bool {
        self.trailing_splat
    }

    /// Raw text matched by the final splat, used for mount remainders.
    pub(crate) fn trailing_capture<'p>(&self, path: &'p str) -> Option<&'p str> {
        if !self.trailing_splat {
            return None;
        }
        let Matcher::Compiled { regex, captures } = &self.matcher else {
            return None;
        };
        let last = captures.last()?;
        regex
            .captures(path)?
            .name(&last.group)
            .map(|matched| matched.as_str())
    }
}

/// Anything a route can be registered with.
pub trait IntoPattern {
    fn into_pattern(self) -> Result<PathPattern, RouteError>;
}

impl IntoPattern for &str {
    fn into_pattern(self) -> Result<PathPattern, RouteError> {
        PathPattern::parse(self)
    }
}

impl IntoPattern for String {
    fn into_pattern(self) -> Result<PathPattern, RouteError> {
        PathPattern::parse(&self)
    }
}

impl IntoPattern for PathPattern {
    fn into_pattern(self) -> Result<PathPattern, RouteError> {
        Ok(self)
    }
}

impl IntoPattern for Result<PathPattern, RouteError> {
    fn into_pattern(self) -> Result<PathPattern, RouteError> {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn literal_patterns_skip_regex() {
        let pattern = PathPattern::parse("/hello").unwrap();
        assert!(pattern.is_literal());
        assert!(pattern.is_match("/hello"));
        assert!(!pattern.is_match("/hello/"));
        assert_eq!(pattern.captures("/hello"), Some(Map::new()));
    }

    #[test]
    fn named_captures_are_decoded() {
        let pattern = PathPattern::parse("/users/:id/posts/:post_id").unwrap();
        let params = pattern.captures("/users/a%20b/posts/7").unwrap();
        assert_eq!(params["id"], json!("a b"));
        assert_eq!(params["post_id"], json!("7"));
        assert!(pattern.captures("/users/1/posts").is_none());
    }

    #[test]
    fn named_capture_stops_at_slash() {
        let pattern = PathPattern::parse("/users/:id").unwrap();
        assert!(!pattern.is_match("/users/1/2"));
    }

    #[test]
    fn splats() {
        let single = PathPattern::parse("/files/*").unwrap();
        assert_eq!(single.captures("/files/a/b.txt").unwrap()["splat"], json!("a/b.txt"));

        let double = PathPattern::parse("/*/to/*").unwrap();
        assert_eq!(
            double.captures("/path/to/file").unwrap()["splat"],
            json!(["path", "file"])
        );

        let named = PathPattern::parse("/docs/*rest").unwrap();
        assert_eq!(named.captures("/docs/x/y").unwrap()["rest"], json!("x/y"));
    }

    #[test]
    fn literal_text_is_escaped() {
        let pattern = PathPattern::parse("/v1.0/:name").unwrap();
        assert!(pattern.is_match("/v1.0/x"));
        assert!(!pattern.is_match("/v1x0/x"));
    }

    #[test]
    fn explicit_regex_patterns() {
        let pattern = PathPattern::regex(r"/items/(?P<id>\d+)").unwrap();
        assert_eq!(pattern.captures("/items/42").unwrap()["id"], json!("42"));
        assert!(!pattern.is_match("/items/abc"));
        assert!(!pattern.is_match("/prefix/items/42"));
    }

    #[test]
    fn invalid_templates_are_rejected() {
        assert!(PathPattern::parse("no-slash").is_err());
        assert!(PathPattern::parse("/users/:").is_err());
        assert!(PathPattern::parse("/:a/:a").is_err());
        assert!(PathPattern::regex("/(unclosed").is_err());
    }

    #[test]
    fn literal_prefix_and_trailing_splat() {
        let pattern = PathPattern::parse("/testing/*").unwrap();
        assert_eq!(pattern.literal_prefix(), Some("/testing/"));
        assert!(pattern.ends_with_splat());
        assert_eq!(pattern.trailing_capture("/testing/route1"), Some("route1"));

        let param = PathPattern::parse("/users/:id").unwrap();
        assert!(!param.ends_with_splat());
    }
}
