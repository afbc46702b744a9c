//! Path patterns and the route table.
//!
//! # Pattern syntax
//!
//! | Segment   | Matches                           | Captured as        |
//! |-----------|-----------------------------------|--------------------|
//! | `users`   | exactly `users`                   | —                  |
//! | `:id`     | any one segment                   | `id`               |
//! | `:id?`    | any one segment, or nothing       | `id` when present  |
//! | `*`       | any one segment                   | `_0`, `_1`, …      |
//! | `**`      | one or more trailing segments     | `_`                |
//! | `**:path` | one or more trailing segments     | `path`             |
//!
//! # Precedence
//!
//! Routes live in a segment trie. Lookup walks it depth first, trying the
//! literal child, then the parameter child, then trailing wildcards, so when
//! several patterns fit the same path:
//!
//! 1. a route registered for the request method beats an any-method route;
//! 2. the longer literal prefix wins (`/a/b` beats `/a/:id`);
//! 3. a parameter beats a trailing wildcard (`/a/:id` beats `/a/**`);
//! 4. among identical shapes, the first registered wins.
//!
//! Captures are returned exactly as they appear in the path. Decoding is
//! opt-in: [`Params::get_decoded`].

use std::borrow::Cow;
use std::collections::{HashMap, HashSet};

use http::Method;
use percent_encoding::percent_decode_str;
use tracing::warn;

/// Name under which an unnamed `**` is captured.
pub const WILDCARD_PARAM: &str = "_";

/// Why a pattern was rejected.
#[derive(Debug, Eq, PartialEq, thiserror::Error)]
pub enum PatternError {
    #[error("duplicate parameter `{name}` in `{pattern}`")]
    DuplicateParam { pattern: String, name: String },

    #[error("empty parameter name in `{0}`")]
    EmptyParam(String),

    #[error("`**` must be the last segment of `{0}`")]
    WildcardNotLast(String),
}

#[derive(Clone, Debug, Eq, PartialEq)]
enum Segment {
    Literal(String),
    Param { name: String, optional: bool },
    CatchAll(String),
}

// ── PathPattern ───────────────────────────────────────────────────────────────

/// A parsed path template.
#[derive(Clone, Debug)]
pub struct PathPattern {
    source: String,
    segments: Vec<Segment>,
}

impl PathPattern {
    /// Parses a pattern. See the [module docs](self) for the syntax.
    ///
    /// ```rust
    /// use weft::PathPattern;
    ///
    /// let pattern = PathPattern::parse("/posts/:id/files/**:path").unwrap();
    /// let params = pattern.matches("/posts/7/files/a/b.txt").unwrap();
    /// assert_eq!(params.get("id"), Some("7"));
    /// assert_eq!(params.get("path"), Some("a/b.txt"));
    /// ```
    pub fn parse(pattern: &str) -> Result<Self, PatternError> {
        let parts: Vec<&str> = split_path(pattern);
        let mut segments = Vec::with_capacity(parts.len());
        let mut names = HashSet::new();
        let mut unnamed = 0usize;

        for (i, part) in parts.iter().enumerate() {
            let segment = if *part == "**" || part.starts_with("**:") {
                if i + 1 != parts.len() {
                    return Err(PatternError::WildcardNotLast(pattern.to_owned()));
                }
                let name = part.strip_prefix("**:").unwrap_or(WILDCARD_PARAM);
                if name.is_empty() {
                    return Err(PatternError::EmptyParam(pattern.to_owned()));
                }
                Segment::CatchAll(name.to_owned())
            } else if *part == "*" {
                let name = format!("_{unnamed}");
                unnamed += 1;
                Segment::Param { name, optional: false }
            } else if let Some(rest) = part.strip_prefix(':') {
                let (name, optional) = match rest.strip_suffix('?') {
                    Some(name) => (name, true),
                    None => (rest, false),
                };
                if name.is_empty() {
                    return Err(PatternError::EmptyParam(pattern.to_owned()));
                }
                Segment::Param { name: name.to_owned(), optional }
            } else {
                Segment::Literal((*part).to_owned())
            };

            if let Segment::Param { name, .. } | Segment::CatchAll(name) = &segment {
                if !names.insert(name.clone()) {
                    return Err(PatternError::DuplicateParam {
                        pattern: pattern.to_owned(),
                        name: name.clone(),
                    });
                }
            }
            segments.push(segment);
        }

        Ok(Self { source: pattern.to_owned(), segments })
    }

    /// The pattern as written at registration.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Matches a whole request path against this pattern alone.
    pub fn matches(&self, path: &str) -> Option<Params> {
        let path = split_path(path);
        self.variants()
            .iter()
            .find_map(|variant| match_segments(variant, &path))
    }

    /// Every concrete shape of the pattern: each optional parameter is either
    /// present or absent. The all-present shape comes first.
    fn variants(&self) -> Vec<Vec<Segment>> {
        let mut variants = vec![Vec::new()];
        for segment in &self.segments {
            let optional = matches!(segment, Segment::Param { optional: true, .. });
            let mut absent = Vec::new();
            for variant in &mut variants {
                if optional {
                    absent.push(variant.clone());
                }
                variant.push(segment.clone());
            }
            variants.extend(absent);
        }
        variants
    }
}

impl std::str::FromStr for PathPattern {
    type Err = PatternError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Splits on `/`, ignoring empty segments (leading, trailing, doubled).
fn split_path(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Aligns one concrete shape with the path segments.
fn match_segments(shape: &[Segment], path: &[&str]) -> Option<Params> {
    let mut params = Params::default();
    for (i, segment) in shape.iter().enumerate() {
        match segment {
            Segment::Literal(literal) => {
                if *path.get(i)? != literal.as_str() {
                    return None;
                }
            }
            Segment::Param { name, .. } => params.push(name, path.get(i)?),
            Segment::CatchAll(name) => {
                let rest = path.get(i..).filter(|rest| !rest.is_empty())?;
                params.push(name, &rest.join("/"));
                return Some(params);
            }
        }
    }
    (shape.len() == path.len()).then_some(params)
}

// ── Params ────────────────────────────────────────────────────────────────────

/// Captured path parameters, in pattern order.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Params(Vec<(String, String)>);

impl Params {
    /// The raw capture, exactly as it appeared in the path.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// The capture with percent-encoding decoded (invalid UTF-8 replaced).
    pub fn get_decoded(&self, name: &str) -> Option<String> {
        self.get(name).map(|raw| decode(raw).into_owned())
    }

    /// A copy with every value decoded.
    pub fn decoded(&self) -> Self {
        Self(
            self.0
                .iter()
                .map(|(k, v)| (k.clone(), decode(v).into_owned()))
                .collect(),
        )
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize { self.0.len() }
    pub fn is_empty(&self) -> bool { self.0.is_empty() }

    fn push(&mut self, name: &str, value: &str) {
        self.0.push((name.to_owned(), value.to_owned()));
    }
}

fn decode(raw: &str) -> Cow<'_, str> {
    percent_decode_str(raw).decode_utf8_lossy()
}

// ── RouteTable ────────────────────────────────────────────────────────────────

/// A successful lookup.
#[derive(Debug)]
pub(crate) struct Match<'a, T> {
    pub value: &'a T,
    pub pattern: &'a PathPattern,
    pub params: Params,
}

/// Method + pattern → `T`, with the precedence rules from the module docs.
pub(crate) struct RouteTable<T> {
    entries: Vec<Entry<T>>,
    root: Node,
}

struct Entry<T> {
    method: Option<Method>,
    pattern: PathPattern,
    value: T,
}

#[derive(Default)]
struct Node {
    literals: HashMap<String, Node>,
    param: Option<Box<Node>>,
    /// Shapes ending exactly at this node.
    leaves: Vec<Leaf>,
    /// Shapes ending in `**` right below this node.
    catch_all: Vec<Leaf>,
}

struct Leaf {
    entry: usize,
    shape: Vec<Segment>,
}

impl<T> RouteTable<T> {
    pub fn new() -> Self {
        Self { entries: Vec::new(), root: Node::default() }
    }

    /// Registers `value`. `method: None` matches any method.
    pub fn insert(&mut self, method: Option<Method>, pattern: PathPattern, value: T) {
        let entry = self.entries.len();

        for shape in pattern.variants() {
            let mut node = &mut self.root;
            let mut catch_all = false;
            for segment in &shape {
                node = match segment {
                    Segment::Literal(literal) => node.literals.entry(literal.clone()).or_default(),
                    Segment::Param { .. } => node.param.get_or_insert_with(Box::default).as_mut(),
                    Segment::CatchAll(_) => {
                        catch_all = true;
                        break;
                    }
                };
            }

            let leaves = if catch_all { &mut node.catch_all } else { &mut node.leaves };
            if leaves.iter().any(|leaf| self.entries[leaf.entry].method == method) {
                warn!(
                    pattern = pattern.as_str(),
                    method = method.as_ref().map_or("*", Method::as_str),
                    "route shadowed by an earlier registration with the same shape",
                );
            }
            leaves.push(Leaf { entry, shape });
        }

        self.entries.push(Entry { method, pattern, value });
    }

    /// Resolves a request. `None` means not found.
    pub fn lookup(&self, method: &Method, path: &str) -> Option<Match<'_, T>> {
        let segments = split_path(path);

        let exact = |leaf: &Leaf| self.entries[leaf.entry].method.as_ref() == Some(method);
        let any = |leaf: &Leaf| self.entries[leaf.entry].method.is_none();

        let leaf = self
            .root
            .find(&segments, &exact)
            .or_else(|| self.root.find(&segments, &any))?;

        let entry = &self.entries[leaf.entry];
        let params = match_segments(&leaf.shape, &segments).unwrap_or_default();
        Some(Match { value: &entry.value, pattern: &entry.pattern, params })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

impl Node {
    fn find<'a>(&'a self, path: &[&str], accept: &dyn Fn(&Leaf) -> bool) -> Option<&'a Leaf> {
        let Some((head, rest)) = path.split_first() else {
            return self.leaves.iter().find(|leaf| accept(leaf));
        };

        if let Some(found) = self.literals.get(*head).and_then(|child| child.find(rest, accept)) {
            return Some(found);
        }
        if let Some(found) = self.param.as_deref().and_then(|child| child.find(rest, accept)) {
            return Some(found);
        }
        self.catch_all.iter().find(|leaf| accept(leaf))
    }
}
