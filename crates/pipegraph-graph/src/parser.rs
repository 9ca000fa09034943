//! Strict, line-oriented parser for graph definition files.
//!
//! The accepted format is a small YAML subset with three top-level
//! sections:
//!
//! ```text
//! metadata:
//!   name: "review"
//!   version: "2.0.0"
//!   type: graph
//!   required_agents: [reviewer]
//!
//! nodes:
//!   - id: plan
//!     name: "Plan"
//!     mcps_enabled:
//!       - Context7
//!     tools_blocked: [Write, Edit]
//!     prompt_injection: |
//!       Read the docs first.
//!       Then write a plan.
//!     is_start: true
//!     max_visits: 3
//!
//! edges:
//!   - id: plan-to-build
//!     from: plan
//!     to: build
//!     condition:
//!       type: tool
//!       tool: mcp__Context7__
//!     priority: 1
//! ```
//!
//! Anything outside the subset (anchors, flow mappings, folded scalars,
//! nested lists, unknown keys, tab indentation) is rejected with the line
//! it occurred on. Each list item is parsed into its own record, so a bad
//! field can never bleed into a neighbouring node or edge.

use pipegraph_core::error::{ParseError, Result};
use pipegraph_core::types::{
    default_priority, EdgeCondition, GraphEdge, GraphMetadata, GraphNode, McpAccess,
    PipelineGraph, GRAPH_TYPE,
};

type ParseResult<T> = std::result::Result<T, ParseError>;

/// Parse a graph definition.
pub fn parse_graph(input: &str) -> Result<PipelineGraph> {
    let document = Reader::new(input).read_document()?;
    Ok(build_graph(document)?)
}

/// A value before it is typed against the field that owns it.
#[derive(Debug, Clone, PartialEq)]
enum Value {
    Scalar { text: String, quoted: bool },
    List(Vec<String>),
    Block(String),
    Map(Vec<Field>),
    Empty,
}

#[derive(Debug, Clone, PartialEq)]
struct Field {
    key: String,
    value: Value,
    line: usize,
}

#[derive(Debug)]
struct Record {
    line: usize,
    fields: Vec<Field>,
}

#[derive(Debug, Default)]
struct Document {
    metadata: Option<Vec<Field>>,
    nodes: Option<Vec<Record>>,
    edges: Option<Vec<Record>>,
}

#[derive(Debug, Clone, Copy)]
struct Line<'a> {
    no: usize,
    indent: usize,
    text: &'a str,
}

struct Reader<'a> {
    lines: Vec<&'a str>,
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            lines: input.lines().collect(),
            pos: 0,
        }
    }

    /// Next line that is neither blank nor a comment, without consuming it.
    fn peek(&mut self) -> ParseResult<Option<Line<'a>>> {
        while let Some(&raw) = self.lines.get(self.pos) {
            let trimmed = raw.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                self.pos += 1;
                continue;
            }
            let body = raw.trim_start_matches(' ');
            if body.starts_with('\t') {
                return Err(ParseError::new(
                    self.pos + 1,
                    "tabs are not allowed in indentation",
                ));
            }
            return Ok(Some(Line {
                no: self.pos + 1,
                indent: raw.len() - body.len(),
                text: body.trim_end(),
            }));
        }
        Ok(None)
    }

    fn bump(&mut self) {
        self.pos += 1;
    }

    fn read_document(mut self) -> ParseResult<Document> {
        const EXPECTED: &str = "expected a top-level section (`metadata:`, `nodes:` or `edges:`)";
        let mut doc = Document::default();

        while let Some(line) = self.peek()? {
            if line.indent != 0 {
                return Err(ParseError::new(line.no, EXPECTED));
            }
            let (key, rest) =
                split_key(line.text).ok_or_else(|| ParseError::new(line.no, EXPECTED))?;
            let rest = without_comment(rest);
            self.bump();

            match key {
                "metadata" => {
                    if doc.metadata.is_some() {
                        return Err(ParseError::new(line.no, "duplicate `metadata` section"));
                    }
                    if !rest.is_empty() {
                        return Err(ParseError::new(line.no, "`metadata:` takes no inline value"));
                    }
                    doc.metadata = Some(self.read_mapping(0, false)?);
                }
                "nodes" | "edges" => {
                    let records = match rest {
                        "" => self.read_records(0)?,
                        "[]" => Vec::new(),
                        _ => {
                            return Err(ParseError::new(
                                line.no,
                                format!("`{key}:` must be followed by a list of records"),
                            ))
                        }
                    };
                    let slot = if key == "nodes" {
                        &mut doc.nodes
                    } else {
                        &mut doc.edges
                    };
                    if slot.is_some() {
                        return Err(ParseError::new(line.no, format!("duplicate `{key}` section")));
                    }
                    *slot = Some(records);
                }
                other => {
                    return Err(ParseError::new(
                        line.no,
                        format!("unknown top-level section '{other}'"),
                    ))
                }
            }
        }

        Ok(doc)
    }

    /// `key: value` entries indented deeper than `parent_indent`.
    fn read_mapping(&mut self, parent_indent: usize, allow_nested: bool) -> ParseResult<Vec<Field>> {
        let mut fields = Vec::new();
        let mut indent = None;

        while let Some(line) = self.peek()? {
            if line.indent <= parent_indent {
                break;
            }
            let expected = *indent.get_or_insert(line.indent);
            if line.indent != expected {
                return Err(ParseError::new(
                    line.no,
                    format!("inconsistent indentation: expected {expected} spaces"),
                ));
            }
            if is_list_item(line.text) {
                return Err(ParseError::new(line.no, "unexpected list item; expected `key: value`"));
            }
            let (key, rest) = split_key(line.text).ok_or_else(|| {
                ParseError::new(line.no, format!("expected `key: value`, found '{}'", line.text))
            })?;
            self.bump();
            let value = self.read_value(rest, expected, line.no, allow_nested)?;
            fields.push(Field {
                key: key.to_string(),
                value,
                line: line.no,
            });
        }

        Ok(fields)
    }

    /// A block sequence of `- key: value` records.
    fn read_records(&mut self, parent_indent: usize) -> ParseResult<Vec<Record>> {
        let mut records = Vec::new();
        let mut item_indent: Option<usize> = None;

        while let Some(line) = self.peek()? {
            let indent = match item_indent {
                Some(indent) => indent,
                None => {
                    if line.indent <= parent_indent && !is_list_item(line.text) {
                        break;
                    }
                    if !is_list_item(line.text) {
                        return Err(ParseError::new(line.no, "expected a `- ` list item"));
                    }
                    *item_indent.insert(line.indent)
                }
            };

            if line.indent < indent {
                break;
            }
            if line.indent > indent {
                return Err(ParseError::new(
                    line.no,
                    "unexpected indentation; fields must line up with the first field of their item",
                ));
            }
            if !is_list_item(line.text) {
                if indent == parent_indent {
                    break;
                }
                return Err(ParseError::new(line.no, "expected a `- ` list item"));
            }
            self.bump();

            let after_dash = &line.text[1..];
            let content = after_dash.trim_start();
            let (key, rest) = split_key(content).ok_or_else(|| {
                ParseError::new(line.no, "list items must start with `- key: value`")
            })?;
            let field_indent = indent + 1 + (after_dash.len() - content.len());

            let mut fields = vec![Field {
                key: key.to_string(),
                value: self.read_value(rest, field_indent, line.no, true)?,
                line: line.no,
            }];

            while let Some(next) = self.peek()? {
                if next.indent <= indent {
                    break;
                }
                if next.indent != field_indent {
                    return Err(ParseError::new(
                        next.no,
                        format!(
                            "inconsistent indentation: fields of this item start at column {}",
                            field_indent + 1
                        ),
                    ));
                }
                if is_list_item(next.text) {
                    return Err(ParseError::new(next.no, "unexpected list item; expected `key: value`"));
                }
                let (key, rest) = split_key(next.text).ok_or_else(|| {
                    ParseError::new(next.no, format!("expected `key: value`, found '{}'", next.text))
                })?;
                self.bump();
                let value = self.read_value(rest, field_indent, next.no, true)?;
                fields.push(Field {
                    key: key.to_string(),
                    value,
                    line: next.no,
                });
            }

            records.push(Record {
                line: line.no,
                fields,
            });
        }

        Ok(records)
    }

    /// The value after `key:`, possibly continuing on following lines.
    fn read_value(
        &mut self,
        rest: &str,
        key_indent: usize,
        line_no: usize,
        allow_nested: bool,
    ) -> ParseResult<Value> {
        let marker = without_comment(rest);
        if marker == "|" || marker == "|-" {
            return Ok(Value::Block(self.read_block(key_indent)));
        }
        if marker.starts_with('>') {
            return Err(ParseError::new(line_no, "folded block scalars (`>`) are not supported"));
        }
        if !marker.is_empty() {
            return parse_scalar(rest, line_no);
        }

        match self.peek()? {
            Some(next) if is_list_item(next.text) && next.indent >= key_indent => {
                Ok(Value::List(self.read_list(next.indent)?))
            }
            Some(next) if next.indent > key_indent => {
                if allow_nested {
                    Ok(Value::Map(self.read_mapping(key_indent, false)?))
                } else {
                    Err(ParseError::new(next.no, "nested mappings are not allowed here"))
                }
            }
            _ => Ok(Value::Empty),
        }
    }

    fn read_list(&mut self, item_indent: usize) -> ParseResult<Vec<String>> {
        let mut items = Vec::new();

        while let Some(line) = self.peek()? {
            if line.indent < item_indent {
                break;
            }
            if line.indent > item_indent {
                return Err(ParseError::new(line.no, "unexpected indentation inside list"));
            }
            if !is_list_item(line.text) {
                break;
            }
            self.bump();

            let item = line.text[1..].trim();
            if split_key(item).is_some() {
                return Err(ParseError::new(
                    line.no,
                    "list items must be plain values, not `key: value` records",
                ));
            }
            match parse_scalar(item, line.no)? {
                Value::Scalar { text, .. } => items.push(text),
                Value::Empty => return Err(ParseError::new(line.no, "empty list item")),
                _ => return Err(ParseError::new(line.no, "nested lists are not supported")),
            }
        }

        Ok(items)
    }

    /// Literal block scalar body; indentation comes from its first non-blank line.
    fn read_block(&mut self, key_indent: usize) -> String {
        let mut block_indent = None;
        let mut out: Vec<&str> = Vec::new();

        while let Some(&raw) = self.lines.get(self.pos) {
            if raw.trim().is_empty() {
                out.push("");
                self.pos += 1;
                continue;
            }
            let indent = raw.len() - raw.trim_start_matches(' ').len();
            let min = *block_indent.get_or_insert(indent);
            if indent <= key_indent || indent < min {
                break;
            }
            out.push(&raw[min..]);
            self.pos += 1;
        }

        out.join("\n").trim_end().to_string()
    }
}

fn is_list_item(text: &str) -> bool {
    text == "-" || text.starts_with("- ")
}

/// Split `key: rest` where key is `[A-Za-z0-9_-]+`.
fn split_key(text: &str) -> Option<(&str, &str)> {
    let end = text.find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '-'))?;
    if end == 0 {
        return None;
    }
    let rest = text[end..].strip_prefix(':')?;
    if !rest.is_empty() && !rest.starts_with(' ') {
        return None;
    }
    Some((&text[..end], rest.trim()))
}

/// Strip a trailing ` # comment` from an unquoted value.
fn without_comment(raw: &str) -> &str {
    if raw.starts_with('#') {
        return "";
    }
    match raw.find(" #") {
        Some(i) => raw[..i].trim_end(),
        None => raw.trim(),
    }
}

fn parse_scalar(raw: &str, line: usize) -> ParseResult<Value> {
    if let Some(body) = raw.strip_prefix('"') {
        let (text, rest) = read_double_quoted(body, line)?;
        expect_end(rest, line)?;
        return Ok(Value::Scalar { text, quoted: true });
    }
    if let Some(body) = raw.strip_prefix('\'') {
        let (text, rest) = read_single_quoted(body, line)?;
        expect_end(rest, line)?;
        return Ok(Value::Scalar { text, quoted: true });
    }
    if raw.starts_with('[') {
        return parse_flow_list(raw, line);
    }
    if raw.starts_with('{') {
        return Err(ParseError::new(line, "flow mappings (`{...}`) are not supported"));
    }
    if raw.starts_with('&') || raw.starts_with('!') {
        return Err(ParseError::new(line, "anchors and tags are not supported"));
    }

    let text = without_comment(raw);
    if text.is_empty() {
        return Ok(Value::Empty);
    }
    if text.contains(": ") || text.ends_with(':') {
        return Err(ParseError::new(
            line,
            format!("value '{text}' contains ':'; wrap it in quotes"),
        ));
    }
    Ok(Value::Scalar {
        text: text.to_string(),
        quoted: false,
    })
}

fn expect_end(rest: &str, line: usize) -> ParseResult<()> {
    let rest = rest.trim();
    if rest.is_empty() || rest.starts_with('#') {
        Ok(())
    } else {
        Err(ParseError::new(line, format!("unexpected text after quoted value: '{rest}'")))
    }
}

fn read_double_quoted(body: &str, line: usize) -> ParseResult<(String, &str)> {
    let mut out = String::new();
    let mut chars = body.char_indices();

    while let Some((i, c)) = chars.next() {
        match c {
            '"' => return Ok((out, &body[i + 1..])),
            '\\' => match chars.next() {
                Some((_, 'n')) => out.push('\n'),
                Some((_, 't')) => out.push('\t'),
                Some((_, 'r')) => out.push('\r'),
                Some((_, '"')) => out.push('"'),
                Some((_, '\\')) => out.push('\\'),
                Some((_, other)) => {
                    return Err(ParseError::new(line, format!("unsupported escape '\\{other}'")))
                }
                None => break,
            },
            c => out.push(c),
        }
    }

    Err(ParseError::new(line, "unterminated double-quoted string"))
}

fn read_single_quoted(body: &str, line: usize) -> ParseResult<(String, &str)> {
    let mut out = String::new();
    let mut chars = body.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if c == '\'' {
            if let Some(&(_, '\'')) = chars.peek() {
                chars.next();
                out.push('\'');
                continue;
            }
            return Ok((out, &body[i + 1..]));
        }
        out.push(c);
    }

    Err(ParseError::new(line, "unterminated single-quoted string"))
}

/// `[a, "b", 'c']` with scalar items only.
fn parse_flow_list(raw: &str, line: usize) -> ParseResult<Value> {
    let mut items = Vec::new();
    let mut rest = raw[1..].trim_start();

    if let Some(tail) = rest.strip_prefix(']') {
        expect_end(tail, line)?;
        return Ok(Value::List(items));
    }

    loop {
        let (item, after) = if let Some(body) = rest.strip_prefix('"') {
            read_double_quoted(body, line)?
        } else if let Some(body) = rest.strip_prefix('\'') {
            read_single_quoted(body, line)?
        } else {
            let end = rest
                .find(|c: char| c == ',' || c == ']')
                .ok_or_else(|| ParseError::new(line, "unterminated flow list"))?;
            let text = rest[..end].trim();
            if text.is_empty() || text.starts_with('[') || text.starts_with('{') {
                return Err(ParseError::new(line, "flow list items must be plain or quoted values"));
            }
            (text.to_string(), &rest[end..])
        };
        items.push(item);

        let after = after.trim_start();
        if let Some(next) = after.strip_prefix(',') {
            rest = next.trim_start();
        } else if let Some(tail) = after.strip_prefix(']') {
            expect_end(tail, line)?;
            return Ok(Value::List(items));
        } else {
            return Err(ParseError::new(line, "expected ',' or ']' in flow list"));
        }
    }
}

impl Field {
    fn into_string(self) -> ParseResult<String> {
        match self.value {
            Value::Scalar { text, .. } | Value::Block(text) => Ok(text),
            Value::Empty => Err(ParseError::new(self.line, format!("'{}' needs a value", self.key))),
            _ => Err(ParseError::new(
                self.line,
                format!("'{}' must be a single value", self.key),
            )),
        }
    }

    fn into_bool(self) -> ParseResult<bool> {
        match &self.value {
            Value::Scalar { text, quoted: false } if text == "true" => Ok(true),
            Value::Scalar { text, quoted: false } if text == "false" => Ok(false),
            _ => Err(ParseError::new(
                self.line,
                format!("'{}' must be true or false", self.key),
            )),
        }
    }

    fn into_number<T: std::str::FromStr>(self, what: &str) -> ParseResult<T> {
        match &self.value {
            Value::Scalar { text, quoted: false } => text.parse().map_err(|_| {
                ParseError::new(self.line, format!("'{}' must be {what}", self.key))
            }),
            _ => Err(ParseError::new(self.line, format!("'{}' must be {what}", self.key))),
        }
    }

    /// A single scalar counts as a one-element list.
    fn into_list(self) -> ParseResult<Vec<String>> {
        match self.value {
            Value::List(items) => Ok(items),
            Value::Scalar { text, .. } => Ok(vec![text]),
            Value::Empty => Ok(Vec::new()),
            _ => Err(ParseError::new(self.line, format!("'{}' must be a list", self.key))),
        }
    }
}

/// The fields of one record, consumed key by key.
struct Fields {
    owner: &'static str,
    line: usize,
    fields: Vec<Field>,
}

impl Fields {
    fn new(owner: &'static str, line: usize, fields: Vec<Field>) -> ParseResult<Self> {
        for (i, field) in fields.iter().enumerate() {
            if fields[..i].iter().any(|prev| prev.key == field.key) {
                return Err(ParseError::new(
                    field.line,
                    format!("duplicate {owner} field '{}'", field.key),
                ));
            }
        }
        Ok(Self {
            owner,
            line,
            fields,
        })
    }

    fn take(&mut self, key: &str) -> Option<Field> {
        let index = self.fields.iter().position(|f| f.key == key)?;
        Some(self.fields.remove(index))
    }

    fn required_string(&mut self, key: &str) -> ParseResult<String> {
        let field = self.take(key).ok_or_else(|| {
            ParseError::new(
                self.line,
                format!("{} is missing required field '{key}'", self.owner),
            )
        })?;
        let line = field.line;
        let value = field.into_string()?;
        if value.is_empty() {
            return Err(ParseError::new(line, format!("'{key}' must not be empty")));
        }
        Ok(value)
    }

    fn optional_string(&mut self, key: &str) -> ParseResult<Option<String>> {
        self.take(key).map(Field::into_string).transpose()
    }

    fn optional_list(&mut self, key: &str) -> ParseResult<Option<Vec<String>>> {
        self.take(key).map(Field::into_list).transpose()
    }

    fn optional_bool(&mut self, key: &str) -> ParseResult<Option<bool>> {
        self.take(key).map(Field::into_bool).transpose()
    }

    /// Any field left over was not recognised.
    fn finish(self) -> ParseResult<()> {
        match self.fields.first() {
            Some(field) => Err(ParseError::new(
                field.line,
                format!("unknown {} field '{}'", self.owner, field.key),
            )),
            None => Ok(()),
        }
    }
}

fn build_graph(doc: Document) -> ParseResult<PipelineGraph> {
    let metadata = match doc.metadata {
        Some(fields) => build_metadata(fields)?,
        None => GraphMetadata::default(),
    };

    let mut nodes: Vec<GraphNode> = Vec::new();
    for record in doc.nodes.unwrap_or_default() {
        let line = record.line;
        let node = build_node(record)?;
        if nodes.iter().any(|n| n.id == node.id) {
            return Err(ParseError::new(line, format!("duplicate node id '{}'", node.id)));
        }
        nodes.push(node);
    }
    if nodes.is_empty() {
        return Err(ParseError::new(0, "graph defines no nodes"));
    }

    let mut edges: Vec<GraphEdge> = Vec::new();
    for record in doc.edges.unwrap_or_default() {
        let line = record.line;
        let edge = build_edge(record)?;
        if edges.iter().any(|e| e.id == edge.id) {
            return Err(ParseError::new(line, format!("duplicate edge id '{}'", edge.id)));
        }
        for endpoint in [&edge.from, &edge.to] {
            if !nodes.iter().any(|n| &n.id == endpoint) {
                return Err(ParseError::new(
                    line,
                    format!("edge '{}' references unknown node '{endpoint}'", edge.id),
                ));
            }
        }
        edges.push(edge);
    }

    Ok(PipelineGraph {
        metadata,
        nodes,
        edges,
    })
}

fn build_metadata(fields: Vec<Field>) -> ParseResult<GraphMetadata> {
    let mut f = Fields::new("metadata", 0, fields)?;
    let defaults = GraphMetadata::default();

    let kind = match f.take("type") {
        Some(field) => {
            let line = field.line;
            let kind = field.into_string()?;
            if kind != GRAPH_TYPE {
                return Err(ParseError::new(
                    line,
                    format!("unsupported graph type '{kind}' (expected '{GRAPH_TYPE}')"),
                ));
            }
            kind
        }
        None => defaults.kind,
    };

    let metadata = GraphMetadata {
        name: f.optional_string("name")?.unwrap_or(defaults.name),
        description: f.optional_string("description")?,
        version: f.optional_string("version")?.unwrap_or(defaults.version),
        kind,
        required_agents: f.optional_list("required_agents")?.unwrap_or_default(),
        required_mcps: f.optional_list("required_mcps")?.unwrap_or_default(),
    };
    f.finish()?;
    Ok(metadata)
}

fn build_node(record: Record) -> ParseResult<GraphNode> {
    let mut f = Fields::new("node", record.line, record.fields)?;
    let id = f.required_string("id")?;

    let node = GraphNode {
        name: f.optional_string("name")?.unwrap_or_else(|| id.clone()),
        mcps_enabled: f
            .optional_list("mcps_enabled")?
            .map(McpAccess::from_names)
            .unwrap_or_default(),
        tools_blocked: f.optional_list("tools_blocked")?.unwrap_or_default(),
        prompt_injection: f.optional_string("prompt_injection")?,
        is_start: f.optional_bool("is_start")?.unwrap_or(false),
        is_end: f.optional_bool("is_end")?.unwrap_or(false),
        max_visits: f
            .take("max_visits")
            .map(|field| field.into_number::<u32>("a non-negative integer"))
            .transpose()?,
        model: f.optional_string("model")?,
        id,
    };
    f.finish()?;
    Ok(node)
}

fn build_edge(record: Record) -> ParseResult<GraphEdge> {
    let mut f = Fields::new("edge", record.line, record.fields)?;

    let id = f.required_string("id")?;
    let from = f.required_string("from")?;
    let to = f.required_string("to")?;
    let condition = match f.take("condition") {
        Some(field) => build_condition(field)?,
        None => EdgeCondition::Always,
    };
    let priority = f
        .take("priority")
        .map(|field| field.into_number::<i32>("an integer"))
        .transpose()?
        .unwrap_or_else(default_priority);
    f.finish()?;

    Ok(GraphEdge {
        id,
        from,
        to,
        condition,
        priority,
    })
}

fn build_condition(field: Field) -> ParseResult<EdgeCondition> {
    let line = field.line;
    match field.value {
        // Shorthand for payload-free conditions: `condition: always`
        Value::Scalar { text, quoted: false } if text == "always" => Ok(EdgeCondition::Always),
        Value::Scalar { text, quoted: false } if text == "default" => Ok(EdgeCondition::Default),
        Value::Map(fields) => {
            let mut f = Fields::new("condition", line, fields)?;
            let kind = f
                .optional_string("type")?
                .unwrap_or_else(|| "always".to_string());

            let condition = match kind.as_str() {
                "tool" => EdgeCondition::Tool {
                    tool: f.required_string("tool")?,
                },
                "phrase" => {
                    let phrases = f.optional_list("phrases")?.unwrap_or_default();
                    if phrases.is_empty() || phrases.iter().any(String::is_empty) {
                        return Err(ParseError::new(
                            line,
                            "phrase condition needs at least one non-empty phrase",
                        ));
                    }
                    EdgeCondition::Phrase { phrases }
                }
                "always" => EdgeCondition::Always,
                "default" => EdgeCondition::Default,
                other => {
                    return Err(ParseError::new(
                        line,
                        format!("unknown condition type '{other}'"),
                    ))
                }
            };
            f.finish()?;
            Ok(condition)
        }
        _ => Err(ParseError::new(
            line,
            "`condition` must be a mapping with a `type` field",
        )),
    }
}
