//! Path queries over JSON payloads
//!
//! A JMESPath subset that yields *locations* instead of values, so matches can
//! be mutated in place:
//!
//! - `a.b` field access, `"odd.key"` quoted field, `*` object wildcard
//! - `[*]` projection, `[]` flatten, `[2]` / `[-1]` index
//! - `[?field=='x']`, `[?a.b!=`3`]` filters
//!
//! An empty query denotes the root.

use serde_json::Value;

use crate::error::{FerryError, FerryResult};

/// One step of a concrete location inside a JSON tree
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

/// A concrete location inside a JSON tree
pub type JsonPath = Vec<PathSegment>;

pub fn get_path<'a>(value: &'a Value, path: &[PathSegment]) -> Option<&'a Value> {
    path.iter().try_fold(value, |node, segment| match segment {
        PathSegment::Key(key) => node.as_object()?.get(key),
        PathSegment::Index(i) => node.as_array()?.get(*i),
    })
}

pub fn get_path_mut<'a>(value: &'a mut Value, path: &[PathSegment]) -> Option<&'a mut Value> {
    path.iter().try_fold(value, |node, segment| match segment {
        PathSegment::Key(key) => node.as_object_mut()?.get_mut(key),
        PathSegment::Index(i) => node.as_array_mut()?.get_mut(*i),
    })
}

/// Render a location as `a.b[0].c`
pub fn format_path(path: &[PathSegment]) -> String {
    let mut out = String::new();
    for segment in path {
        match segment {
            PathSegment::Key(key) => {
                if !out.is_empty() {
                    out.push('.');
                }
                out.push_str(key);
            }
            PathSegment::Index(i) => out.push_str(&format!("[{i}]")),
        }
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Comparison {
    Eq,
    Ne,
}

#[derive(Debug, Clone, PartialEq)]
enum Step {
    Field(String),
    Wildcard,
    Index(i64),
    Project,
    Flatten,
    Filter {
        field: Vec<String>,
        comparison: Comparison,
        literal: Value,
    },
}

/// A compiled path query
#[derive(Debug, Clone, PartialEq)]
pub struct PathQuery {
    source: String,
    steps: Vec<Step>,
}

impl PathQuery {
    pub fn root() -> Self {
        Self {
            source: String::new(),
            steps: Vec::new(),
        }
    }

    pub fn parse(query: &str) -> FerryResult<Self> {
        let source = query.trim().to_string();
        let steps = Parser::new(&source).parse()?;
        Ok(Self { source, steps })
    }

    pub fn is_root(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Locations matched by the query; list results are flattened one level
    pub fn evaluate(&self, root: &Value) -> Vec<JsonPath> {
        let mut current: Vec<JsonPath> = vec![Vec::new()];
        for step in &self.steps {
            let mut next = Vec::new();
            for path in current {
                let Some(node) = get_path(root, &path) else {
                    continue;
                };
                apply_step(step, node, &path, &mut next);
            }
            current = next;
        }

        if self.is_root() {
            return current;
        }

        let mut flattened = Vec::new();
        for path in current {
            match get_path(root, &path) {
                Some(Value::Array(items)) => {
                    for i in 0..items.len() {
                        let mut element = path.clone();
                        element.push(PathSegment::Index(i));
                        flattened.push(element);
                    }
                }
                Some(Value::Null) | None => {}
                Some(_) => flattened.push(path),
            }
        }
        flattened
    }
}

fn child(path: &JsonPath, segment: PathSegment) -> JsonPath {
    let mut out = path.clone();
    out.push(segment);
    out
}

fn apply_step(step: &Step, node: &Value, path: &JsonPath, next: &mut Vec<JsonPath>) {
    match step {
        Step::Field(name) => {
            if node.as_object().is_some_and(|o| o.contains_key(name)) {
                next.push(child(path, PathSegment::Key(name.clone())));
            }
        }
        Step::Wildcard => {
            if let Some(object) = node.as_object() {
                for key in object.keys() {
                    next.push(child(path, PathSegment::Key(key.clone())));
                }
            }
        }
        Step::Index(i) => {
            if let Some(items) = node.as_array() {
                let len = items.len() as i64;
                let resolved = if *i < 0 { len + i } else { *i };
                if (0..len).contains(&resolved) {
                    next.push(child(path, PathSegment::Index(resolved as usize)));
                }
            }
        }
        Step::Project => {
            if let Some(items) = node.as_array() {
                for i in 0..items.len() {
                    next.push(child(path, PathSegment::Index(i)));
                }
            }
        }
        Step::Flatten => {
            if let Some(items) = node.as_array() {
                for (i, item) in items.iter().enumerate() {
                    let element = child(path, PathSegment::Index(i));
                    match item {
                        Value::Array(inner) => {
                            for j in 0..inner.len() {
                                next.push(child(&element, PathSegment::Index(j)));
                            }
                        }
                        _ => next.push(element),
                    }
                }
            }
        }
        Step::Filter {
            field,
            comparison,
            literal,
        } => {
            if let Some(items) = node.as_array() {
                for (i, item) in items.iter().enumerate() {
                    let actual = field
                        .iter()
                        .try_fold(item, |n, key| n.as_object()?.get(key))
                        .unwrap_or(&Value::Null);
                    let keep = match comparison {
                        Comparison::Eq => actual == literal,
                        Comparison::Ne => actual != literal,
                    };
                    if keep {
                        next.push(child(path, PathSegment::Index(i)));
                    }
                }
            }
        }
    }
}

/// Split an override path (`<query>.<final key>`) into its parent query and key
pub fn split_override_path(path: &str) -> FerryResult<(PathQuery, String)> {
    let trimmed = path.trim();
    let invalid = |message: &str| FerryError::InvalidOverride {
        path: path.to_string(),
        message: message.to_string(),
    };

    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut split_at = None;
    for (i, c) in trimmed.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'' | '`') => quote = Some(c),
            (None, '[') => depth += 1,
            (None, ']') => depth = depth.saturating_sub(1),
            (None, '.') if depth == 0 => split_at = Some(i),
            _ => {}
        }
    }

    let (parent, key) = match split_at {
        Some(i) => (&trimmed[..i], &trimmed[i + 1..]),
        None => ("", trimmed),
    };

    let key = if key.len() >= 2 && key.starts_with('"') && key.ends_with('"') {
        &key[1..key.len() - 1]
    } else {
        if key.contains('[') || key.contains(']') {
            return Err(invalid("the final segment must be a plain key"));
        }
        key
    };
    if key.is_empty() {
        return Err(invalid("missing final key"));
    }

    let query = if parent.is_empty() {
        PathQuery::root()
    } else {
        PathQuery::parse(parent)?
    };
    Ok((query, key.to_string()))
}

struct Parser<'a> {
    source: &'a str,
    chars: Vec<char>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.chars().collect(),
            pos: 0,
        }
    }

    fn error(&self, message: impl Into<String>) -> FerryError {
        FerryError::InvalidQuery {
            query: self.source.to_string(),
            message: message.into(),
        }
    }

    fn parse(mut self) -> FerryResult<Vec<Step>> {
        let mut steps = Vec::new();
        let mut expect_segment = true;
        while self.pos < self.chars.len() {
            let c = self.chars[self.pos];
            match c {
                '.' => {
                    if expect_segment {
                        return Err(self.error(format!("unexpected '.' at {}", self.pos)));
                    }
                    self.pos += 1;
                    expect_segment = true;
                    if self.pos == self.chars.len() {
                        return Err(self.error("query ends with '.'"));
                    }
                    if self.chars[self.pos] == '[' {
                        return Err(self.error(format!("unexpected '[' at {}", self.pos)));
                    }
                }
                '[' => {
                    steps.push(self.bracket()?);
                    expect_segment = false;
                }
                '"' => {
                    self.require_segment(expect_segment)?;
                    steps.push(Step::Field(self.quoted()?));
                    expect_segment = false;
                }
                '*' => {
                    self.require_segment(expect_segment)?;
                    self.pos += 1;
                    steps.push(Step::Wildcard);
                    expect_segment = false;
                }
                c if is_identifier_char(c) => {
                    self.require_segment(expect_segment)?;
                    steps.push(Step::Field(self.identifier()));
                    expect_segment = false;
                }
                other => return Err(self.error(format!("unexpected '{other}' at {}", self.pos))),
            }
        }
        Ok(steps)
    }

    fn require_segment(&self, expect_segment: bool) -> FerryResult<()> {
        if expect_segment {
            Ok(())
        } else {
            Err(self.error(format!("expected '.' or '[' at {}", self.pos)))
        }
    }

    fn identifier(&mut self) -> String {
        let start = self.pos;
        while self.pos < self.chars.len() && is_identifier_char(self.chars[self.pos]) {
            self.pos += 1;
        }
        self.chars[start..self.pos].iter().collect()
    }

    fn quoted(&mut self) -> FerryResult<String> {
        self.pos += 1;
        let start = self.pos;
        while self.pos < self.chars.len() && self.chars[self.pos] != '"' {
            self.pos += 1;
        }
        if self.pos == self.chars.len() {
            return Err(self.error("unterminated quoted identifier"));
        }
        let name: String = self.chars[start..self.pos].iter().collect();
        self.pos += 1;
        Ok(name)
    }

    fn bracket(&mut self) -> FerryResult<Step> {
        self.pos += 1;
        let start = self.pos;
        let mut quote: Option<char> = None;
        while self.pos < self.chars.len() {
            let c = self.chars[self.pos];
            match quote {
                Some(q) if c == q => quote = None,
                Some(_) => {}
                None if matches!(c, '\'' | '"' | '`') => quote = Some(c),
                None if c == ']' => break,
                None => {}
            }
            self.pos += 1;
        }
        if self.pos == self.chars.len() {
            return Err(self.error("unterminated '['"));
        }
        let inner: String = self.chars[start..self.pos].iter().collect();
        self.pos += 1;

        let inner = inner.trim();
        match inner {
            "" => Ok(Step::Flatten),
            "*" => Ok(Step::Project),
            _ if inner.starts_with('?') => self.filter(&inner[1..]),
            _ => inner
                .parse::<i64>()
                .map(Step::Index)
                .map_err(|_| self.error(format!("invalid index '{inner}'"))),
        }
    }

    fn filter(&self, expression: &str) -> FerryResult<Step> {
        let (op_at, comparison) = match (expression.find("=="), expression.find("!=")) {
            (Some(i), _) => (i, Comparison::Eq),
            (None, Some(i)) => (i, Comparison::Ne),
            (None, None) => return Err(self.error("filter needs '==' or '!='")),
        };
        let field: Vec<String> = expression[..op_at]
            .trim()
            .split('.')
            .map(|s| s.trim().trim_matches('"').to_string())
            .collect();
        if field.iter().any(String::is_empty) {
            return Err(self.error("filter needs a field on the left-hand side"));
        }
        let literal = self.literal(expression[op_at + 2..].trim())?;
        Ok(Step::Filter {
            field,
            comparison,
            literal,
        })
    }

    fn literal(&self, raw: &str) -> FerryResult<Value> {
        if raw.len() >= 2 && raw.starts_with('\'') && raw.ends_with('\'') {
            return Ok(Value::String(raw[1..raw.len() - 1].to_string()));
        }
        let json = if raw.len() >= 2 && raw.starts_with('`') && raw.ends_with('`') {
            &raw[1..raw.len() - 1]
        } else {
            raw
        };
        serde_json::from_str(json).map_err(|e| self.error(format!("invalid literal '{raw}': {e}")))
    }
}

fn is_identifier_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}
