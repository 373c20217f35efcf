//! ember-router: path pattern compiler
//!
//! Single source of truth for how ember turns route paths into matchers.
//! Used by the router in `ember-core` both for route registrations and for
//! the base paths routers are mounted at.
//!
//! ## Path Syntax
//! - `/users` - literal, compared by exact string equality
//! - `/users/:id` - `:name` captures one run of non-slash, non-whitespace
//!   characters
//! - Wildcards (`*`) are not supported and are matched literally
//!
//! Captured values are returned exactly as they appear in the request path;
//! no percent-decoding is applied.
//!
//! ## Example
//! ```
//! use ember_router::PathPattern;
//!
//! let pattern = PathPattern::compile("/users/:id/posts/:post").unwrap();
//! let m = pattern.matches("/users/42/posts/hello%20world").unwrap();
//! assert_eq!(m.get("id"), Some("42"));
//! assert_eq!(m.get("post"), Some("hello%20world"));
//!
//! assert!(PathPattern::compile("/health").unwrap().is_literal());
//! ```

use regex::Regex;
use std::fmt;
use std::sync::Arc;

/// Capture group used for every `:name` token
const PARAM_GROUP: &str = r"([^/\s]+)";

/// Pattern compilation error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatternError {
    /// The same `:name` appears twice in one pattern
    DuplicateParam { pattern: String, name: String },
    /// The generated expression was rejected by the regex engine
    Regex { pattern: String, reason: String },
}

impl fmt::Display for PatternError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatternError::DuplicateParam { pattern, name } => {
                write!(f, "duplicate parameter :{} in {}", name, pattern)
            }
            PatternError::Regex { pattern, reason } => {
                write!(f, "cannot compile {}: {}", pattern, reason)
            }
        }
    }
}

impl std::error::Error for PatternError {}

/// Successful match of a request path against a pattern
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Match<'p> {
    /// Captured path parameters as (name, raw value) pairs, in pattern order
    pub params: Vec<(Arc<str>, &'p str)>,
}

impl<'p> Match<'p> {
    /// Get a captured parameter by name
    pub fn get(&self, name: &str) -> Option<&'p str> {
        self.params
            .iter()
            .find(|(k, _)| &**k == name)
            .map(|(_, v)| *v)
    }

    /// True when the pattern captured nothing (literal match)
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

/// Compiled route path
///
/// Literal paths stay strings; anything containing a `:name` token is
/// compiled once into an anchored regex plus the ordered token names.
#[derive(Debug, Clone)]
pub enum PathPattern {
    Literal(String),
    Param {
        source: String,
        regex: Regex,
        names: Vec<Arc<str>>,
    },
}

impl PathPattern {
    /// Compile a pattern that must match the whole request path
    pub fn compile(pattern: &str) -> Result<Self, PatternError> {
        match compile_expr(pattern, true)? {
            Some((regex, names)) => Ok(PathPattern::Param {
                source: pattern.to_string(),
                regex,
                names,
            }),
            None => Ok(PathPattern::Literal(pattern.to_string())),
        }
    }

    /// The pattern text this was compiled from
    pub fn source(&self) -> &str {
        match self {
            PathPattern::Literal(s) => s,
            PathPattern::Param { source, .. } => source,
        }
    }

    pub fn is_literal(&self) -> bool {
        matches!(self, PathPattern::Literal(_))
    }

    /// Parameter names in the order they appear
    pub fn param_names(&self) -> &[Arc<str>] {
        match self {
            PathPattern::Literal(_) => &[],
            PathPattern::Param { names, .. } => names,
        }
    }

    /// Match a request path, capturing parameters
    pub fn matches<'p>(&self, path: &'p str) -> Option<Match<'p>> {
        match self {
            PathPattern::Literal(s) => (s == path).then(Match::default),
            PathPattern::Param { regex, names, .. } => {
                let caps = regex.captures(path)?;
                let params = names
                    .iter()
                    .enumerate()
                    .filter_map(|(i, name)| {
                        caps.get(i + 1).map(|m| (Arc::clone(name), m.as_str()))
                    })
                    .collect();
                Some(Match { params })
            }
        }
    }
}

/// Compiled base path of a mounted router
///
/// A literal base accepts any path that starts with it. A base containing
/// `:name` tokens accepts any path whose beginning matches the compiled
/// expression.
#[derive(Debug, Clone)]
pub enum BasePattern {
    Literal(String),
    Param { source: String, regex: Regex },
}

impl BasePattern {
    pub fn compile(base: &str) -> Result<Self, PatternError> {
        match compile_expr(base, false)? {
            Some((regex, _)) => Ok(BasePattern::Param {
                source: base.to_string(),
                regex,
            }),
            None => Ok(BasePattern::Literal(base.to_string())),
        }
    }

    pub fn source(&self) -> &str {
        match self {
            BasePattern::Literal(s) => s,
            BasePattern::Param { source, .. } => source,
        }
    }

    pub fn accepts(&self, path: &str) -> bool {
        match self {
            BasePattern::Literal(base) => path.starts_with(base.as_str()),
            BasePattern::Param { regex, .. } => regex.is_match(path),
        }
    }
}

impl Default for BasePattern {
    fn default() -> Self {
        BasePattern::Literal(String::new())
    }
}

/// Join a router base with a route or mount path
///
/// The root path `/` collapses to the base itself when the base is not the
/// root, so `/` registered under `/users` answers `/users`.
pub fn join(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    if base.is_empty() {
        return if path.is_empty() {
            "/".to_string()
        } else if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{}", path)
        };
    }
    if path.is_empty() || path == "/" {
        return base.to_string();
    }
    if path.starts_with('/') {
        format!("{}{}", base, path)
    } else {
        format!("{}/{}", base, path)
    }
}

/// Normalize a mount base: `/` and the empty string both mean "root"
pub fn normalize_base(base: &str) -> String {
    base.trim_end_matches('/').to_string()
}

/// Does the text contain at least one `:name` token
pub fn has_params(pattern: &str) -> bool {
    pattern
        .match_indices(':')
        .any(|(i, _)| pattern[i + 1..].starts_with(is_name_char))
}

#[inline]
fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Build the regex for a pattern, or `None` when the pattern is literal
fn compile_expr(
    pattern: &str,
    anchor_end: bool,
) -> Result<Option<(Regex, Vec<Arc<str>>)>, PatternError> {
    if !has_params(pattern) {
        return Ok(None);
    }

    let mut expr = String::with_capacity(pattern.len() + 16);
    let mut names: Vec<Arc<str>> = Vec::new();
    expr.push('^');

    let mut rest = pattern;
    while let Some(idx) = rest.find(':') {
        let after = &rest[idx + 1..];
        let end = after.find(|c: char| !is_name_char(c)).unwrap_or(after.len());
        if end == 0 {
            // bare colon, keep it literal
            expr.push_str(&regex::escape(&rest[..=idx]));
            rest = after;
            continue;
        }

        let name = &after[..end];
        if names.iter().any(|n| &**n == name) {
            return Err(PatternError::DuplicateParam {
                pattern: pattern.to_string(),
                name: name.to_string(),
            });
        }

        expr.push_str(&regex::escape(&rest[..idx]));
        expr.push_str(PARAM_GROUP);
        names.push(Arc::from(name));
        rest = &after[end..];
    }
    expr.push_str(&regex::escape(rest));
    if anchor_end {
        expr.push('$');
    }

    let regex = Regex::new(&expr).map_err(|e| PatternError::Regex {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })?;
    Ok(Some((regex, names)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_patterns() {
        let p = PathPattern::compile("/users").unwrap();
        assert!(p.is_literal());
        assert!(p.matches("/users").is_some());
        assert!(p.matches("/users/").is_none());
        assert!(p.matches("/users/1").is_none());
        assert!(p.param_names().is_empty());
    }

    #[test]
    fn test_param_routes() {
        let p = PathPattern::compile("/users/:id/posts/:post_id").unwrap();
        assert!(!p.is_literal());

        let m = p.matches("/users/42/posts/99").unwrap();
        assert_eq!(m.get("id"), Some("42"));
        assert_eq!(m.get("post_id"), Some("99"));
        assert_eq!(
            m.params.iter().map(|(k, _)| k.to_string()).collect::<Vec<_>>(),
            vec!["id".to_string(), "post_id".to_string()]
        );

        assert!(p.matches("/users/42/posts").is_none());
        assert!(p.matches("/users/42/posts/99/extra").is_none());
    }

    #[test]
    fn test_params_are_not_decoded() {
        let p = PathPattern::compile("/files/:name").unwrap();
        let m = p.matches("/files/a%20b.txt").unwrap();
        assert_eq!(m.get("name"), Some("a%20b.txt"));
    }

    #[test]
    fn test_param_rejects_slash_and_whitespace() {
        let p = PathPattern::compile("/files/:name").unwrap();
        assert!(p.matches("/files/a/b").is_none());
        assert!(p.matches("/files/a b").is_none());
        assert!(p.matches("/files/").is_none());
    }

    #[test]
    fn test_regex_metacharacters_are_literal() {
        let p = PathPattern::compile("/v1.0/:id+x").unwrap();
        assert!(p.matches("/v1.0/7+x").is_some());
        assert!(p.matches("/v1x0/7+x").is_none());
    }

    #[test]
    fn test_token_inside_segment() {
        let p = PathPattern::compile("/report.:format").unwrap();
        assert_eq!(p.matches("/report.csv").unwrap().get("format"), Some("csv"));
    }

    #[test]
    fn test_bare_colon_is_literal() {
        assert!(!has_params("/time/12:/x"));
        let p = PathPattern::compile("/a:/:b").unwrap();
        assert_eq!(p.matches("/a:/z").unwrap().get("b"), Some("z"));
    }

    #[test]
    fn test_duplicate_param_rejected() {
        let err = PathPattern::compile("/:id/:id").unwrap_err();
        assert!(matches!(err, PatternError::DuplicateParam { .. }));
    }

    #[test]
    fn test_base_pattern_prefix() {
        let literal = BasePattern::compile("/api").unwrap();
        assert!(literal.accepts("/api/users"));
        assert!(literal.accepts("/api"));
        assert!(!literal.accepts("/other"));

        let param = BasePattern::compile("/orgs/:org").unwrap();
        assert!(param.accepts("/orgs/acme/teams"));
        assert!(param.accepts("/orgs/acme"));
        assert!(!param.accepts("/orgs"));
        assert!(!param.accepts("/teams/acme"));

        assert!(BasePattern::default().accepts("/anything"));
    }

    #[test]
    fn test_join() {
        assert_eq!(join("", "/users"), "/users");
        assert_eq!(join("", "/"), "/");
        assert_eq!(join("/", "/users"), "/users");
        assert_eq!(join("/api", "/users"), "/api/users");
        assert_eq!(join("/api/", "users"), "/api/users");
        assert_eq!(join("/api", "/"), "/api");
        assert_eq!(join("/api", ""), "/api");
        assert_eq!(join("/orgs/:org", "/teams/:team"), "/orgs/:org/teams/:team");
    }

    #[test]
    fn test_normalize_base() {
        assert_eq!(normalize_base("/"), "");
        assert_eq!(normalize_base("/api/"), "/api");
        assert_eq!(normalize_base(""), "");
    }
}
