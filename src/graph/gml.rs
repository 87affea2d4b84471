//! GML persistence for attributed flow graphs.
//!
//! Graphs are written as
//!
//! ```text
//! graph [
//!   directed 1
//!   global_efficiency 0.42
//!   node [ id 0 label "AUS" pagerank 0.031 gfi 1.2e-5 ]
//!   edge [ source 0 target 1 weight 0.25 ]
//! ]
//! ```
//!
//! Node attributes are scalar floats written in Rust's shortest round-trip
//! representation, so reading a file back reproduces every value bit for bit.
//! Missing values are written as `NaN`.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::iter::Peekable;
use std::path::Path;
use std::str::CharIndices;

use color_eyre::eyre::{eyre, Result, WrapErr};

use super::FlowGraph;

/// A flow graph together with its per-node and graph-level attributes
#[derive(Debug, Clone, Default)]
pub struct GmlDocument {
    pub graph: FlowGraph,
    /// node label -> attribute name -> value
    pub node_attributes: BTreeMap<String, BTreeMap<String, f64>>,
    pub graph_attributes: BTreeMap<String, String>,
}

impl GmlDocument {
    pub fn new(graph: FlowGraph) -> Self {
        Self { graph, ..Self::default() }
    }

    /// Attributes of one node, if any were recorded
    pub fn node_attributes(&self, node: &str) -> Option<&BTreeMap<String, f64>> {
        self.node_attributes.get(node)
    }
}

/// Scalar GML value
#[derive(Debug, Clone, PartialEq)]
enum Value {
    Int(i64),
    Real(f64),
    Str(String),
}

impl Value {
    fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Real(r) => Some(*r),
            Value::Str(_) => None,
        }
    }

    fn into_text(self) -> String {
        match self {
            Value::Int(i) => i.to_string(),
            Value::Real(r) => format!("{r:?}"),
            Value::Str(s) => s,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Key(String),
    Value(Value),
    Open,
    Close,
}

/// Non-finite spellings written by the float formatter
fn special_float(word: &str) -> Option<f64> {
    let (sign, body) = match word.strip_prefix('-') {
        Some(rest) => (-1.0, rest),
        None => (1.0, word.strip_prefix('+').unwrap_or(word)),
    };
    match body.to_ascii_lowercase().as_str() {
        "nan" => Some(f64::NAN),
        "inf" | "infinity" => Some(sign * f64::INFINITY),
        _ => None,
    }
}

fn number(text: &str) -> Result<Value> {
    if let Ok(i) = text.parse::<i64>() {
        return Ok(Value::Int(i));
    }
    if let Some(v) = special_float(text) {
        return Ok(Value::Real(v));
    }
    text.parse::<f64>()
        .map(Value::Real)
        .map_err(|_| eyre!("Invalid number '{}'", text))
}

/// Tokenizer over GML source. Bare words are keys, except `NaN` and `inf`
/// which are reals.
struct Tokens<'a> {
    src: &'a str,
    chars: Peekable<CharIndices<'a>>,
}

impl<'a> Tokens<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            chars: src.char_indices().peekable(),
        }
    }

    /// Consume characters from `start` while `keep` holds
    fn span<F>(&mut self, start: usize, keep: F) -> &'a str
    where
        F: Fn(char) -> bool,
    {
        let mut end = start;
        while let Some(&(i, c)) = self.chars.peek() {
            if !keep(c) {
                break;
            }
            end = i + c.len_utf8();
            self.chars.next();
        }
        &self.src[start..end]
    }

    /// Quoted string; the opening quote is already consumed
    fn string(&mut self, start: usize) -> Result<String> {
        let mut out = String::new();
        while let Some((_, c)) = self.chars.next() {
            match c {
                '"' => return Ok(out),
                '\\' => match self.chars.next() {
                    Some((_, 'n')) => out.push('\n'),
                    Some((_, 't')) => out.push('\t'),
                    Some((_, escaped @ ('"' | '\\'))) => out.push(escaped),
                    Some((_, other)) => {
                        out.push('\\');
                        out.push(other);
                    }
                    None => break,
                },
                _ => out.push(c),
            }
        }
        Err(eyre!("Unterminated string literal at offset {}", start))
    }
}

impl Iterator for Tokens<'_> {
    type Item = Result<Token>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let &(start, c) = self.chars.peek()?;
            let token = match c {
                c if c.is_whitespace() => {
                    self.chars.next();
                    continue;
                }
                '#' => {
                    self.span(start, |c| c != '\n');
                    continue;
                }
                '[' => {
                    self.chars.next();
                    Ok(Token::Open)
                }
                ']' => {
                    self.chars.next();
                    Ok(Token::Close)
                }
                '"' => {
                    self.chars.next();
                    self.string(start).map(|s| Token::Value(Value::Str(s)))
                }
                c if c.is_ascii_digit() || matches!(c, '-' | '+' | '.') => {
                    let text = self.span(start, |c| c.is_alphanumeric() || matches!(c, '-' | '+' | '.'));
                    number(text).map(Token::Value)
                }
                c if c.is_alphabetic() || c == '_' => {
                    let word = self.span(start, |c| c.is_alphanumeric() || c == '_');
                    Ok(match special_float(word) {
                        Some(v) => Token::Value(Value::Real(v)),
                        None => Token::Key(word.to_string()),
                    })
                }
                other => Err(eyre!("Unexpected character '{}' at offset {}", other, start)),
            };
            return Some(token);
        }
    }
}

/// Generic GML tree: `key value` pairs and nested `key [ ... ]` lists
#[derive(Debug)]
enum Entry {
    Scalar(Value),
    List(Vec<(String, Entry)>),
}

fn parse_list<I>(tokens: &mut I, nested: bool) -> Result<Vec<(String, Entry)>>
where
    I: Iterator<Item = Token>,
{
    let mut entries = Vec::new();
    loop {
        let key = match tokens.next() {
            Some(Token::Key(key)) => key,
            Some(Token::Close) if nested => return Ok(entries),
            None if !nested => return Ok(entries),
            None => return Err(eyre!("Unbalanced brackets: missing ']'")),
            Some(other) => return Err(eyre!("Expected attribute name, found {:?}", other)),
        };
        let entry = match tokens.next() {
            Some(Token::Value(value)) => Entry::Scalar(value),
            Some(Token::Open) => Entry::List(parse_list(tokens, true)?),
            Some(other) => return Err(eyre!("Expected value for '{}', found {:?}", key, other)),
            None => return Err(eyre!("Missing value for '{}'", key)),
        };
        entries.push((key, entry));
    }
}

struct RawNode {
    id: i64,
    label: Option<String>,
    attributes: BTreeMap<String, f64>,
}

struct RawEdge {
    source: i64,
    target: i64,
    weight: f64,
}

fn node_id(value: Value, what: &str) -> Result<i64> {
    match value {
        Value::Int(id) => Ok(id),
        other => Err(eyre!("Invalid {}: {}", what, other.into_text())),
    }
}

/// Nested lists such as `graphics` are ignored, as are non-numeric
/// attributes
fn raw_node(entries: Vec<(String, Entry)>) -> Result<RawNode> {
    let mut id = None;
    let mut label = None;
    let mut attributes = BTreeMap::new();

    for (key, entry) in entries {
        let Entry::Scalar(value) = entry else {
            continue;
        };
        match key.as_str() {
            "id" => id = Some(node_id(value, "node id")?),
            "label" => label = Some(value.into_text()),
            _ => match value.as_f64() {
                Some(v) => {
                    attributes.insert(key, v);
                }
                None => log::debug!("Ignoring non-numeric node attribute {}", key),
            },
        }
    }

    let id = id.ok_or_else(|| eyre!("Node missing required 'id' attribute"))?;
    Ok(RawNode { id, label, attributes })
}

fn raw_edge(entries: Vec<(String, Entry)>) -> Result<RawEdge> {
    let mut source = None;
    let mut target = None;
    let mut weight = 1.0;

    for (key, entry) in entries {
        let Entry::Scalar(value) = entry else {
            continue;
        };
        match key.as_str() {
            "source" => source = Some(node_id(value, "edge source")?),
            "target" => target = Some(node_id(value, "edge target")?),
            "weight" => {
                weight = value
                    .as_f64()
                    .ok_or_else(|| eyre!("Invalid edge weight: {}", value.clone().into_text()))?;
            }
            _ => {}
        }
    }

    let source = source.ok_or_else(|| eyre!("Edge missing required 'source' attribute"))?;
    let target = target.ok_or_else(|| eyre!("Edge missing required 'target' attribute"))?;
    Ok(RawEdge { source, target, weight })
}

fn assemble_document(
    nodes: Vec<RawNode>,
    edges: Vec<RawEdge>,
    graph_attributes: BTreeMap<String, String>,
) -> Result<GmlDocument> {
    let mut graph = FlowGraph::new();
    let mut labels_by_id = BTreeMap::new();
    let mut node_attributes = BTreeMap::new();

    for node in nodes {
        let label = node.label.unwrap_or_else(|| node.id.to_string());
        if labels_by_id.insert(node.id, label.clone()).is_some() {
            return Err(eyre!("Duplicate node ID: {}", node.id));
        }
        if graph.contains_node(&label) {
            return Err(eyre!("Duplicate node label: {}", label));
        }
        graph.add_node(&label);
        if !node.attributes.is_empty() {
            node_attributes.insert(label, node.attributes);
        }
    }

    for edge in edges {
        let source = labels_by_id
            .get(&edge.source)
            .ok_or_else(|| eyre!("Edge references non-existent source node: {}", edge.source))?;
        let target = labels_by_id
            .get(&edge.target)
            .ok_or_else(|| eyre!("Edge references non-existent target node: {}", edge.target))?;
        graph.add_edge(source, target, edge.weight);
    }

    Ok(GmlDocument {
        graph,
        node_attributes,
        graph_attributes,
    })
}

/// Parse GML text into a document
pub fn parse_gml(content: &str) -> Result<GmlDocument> {
    let tokens = Tokens::new(content).collect::<Result<Vec<_>>>()?;
    let mut tokens = tokens.into_iter();

    let body = parse_list(&mut tokens, false)?
        .into_iter()
        .find_map(|(key, entry)| match (key.as_str(), entry) {
            ("graph", Entry::List(body)) => Some(body),
            _ => None,
        })
        .ok_or_else(|| eyre!("No 'graph [ ... ]' block found"))?;

    let mut nodes = Vec::new();
    let mut edges = Vec::new();
    let mut graph_attributes = BTreeMap::new();
    for (key, entry) in body {
        match (key.as_str(), entry) {
            ("node", Entry::List(entries)) => nodes.push(raw_node(entries)?),
            ("edge", Entry::List(entries)) => edges.push(raw_edge(entries)?),
            (_, Entry::Scalar(value)) => {
                graph_attributes.insert(key, value.into_text());
            }
            (_, Entry::List(_)) => {}
        }
    }
    assemble_document(nodes, edges, graph_attributes)
}

/// Parse a GML file into a document
pub fn parse_gml_file(path: &Path) -> Result<GmlDocument> {
    let content = fs::read_to_string(path)
        .wrap_err_with(|| format!("Failed to read GML file '{}'", path.display()))?;
    parse_gml(&content).wrap_err_with(|| format!("Failed to parse GML file '{}'", path.display()))
}

fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for ch in value.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            _ => out.push(ch),
        }
    }
    out.push('"');
    out
}

/// GML attribute keys must be plain identifiers
fn is_valid_key(key: &str) -> bool {
    let mut chars = key.chars();
    matches!(chars.next(), Some(c) if c.is_alphabetic() || c == '_')
        && chars.all(|c| c.is_alphanumeric() || c == '_')
}

/// Render a document as GML text
pub fn to_gml_string(doc: &GmlDocument) -> Result<String> {
    let mut out = String::new();
    out.push_str("graph [\n  directed 1\n");

    for (key, value) in &doc.graph_attributes {
        if key == "directed" {
            continue;
        }
        if !is_valid_key(key) {
            return Err(eyre!("Invalid graph attribute key '{}'", key));
        }
        match value.parse::<f64>() {
            Ok(_) => writeln!(out, "  {} {}", key, value)?,
            Err(_) => writeln!(out, "  {} {}", key, quote(value))?,
        }
    }

    for (id, label) in doc.graph.nodes().iter().enumerate() {
        write!(out, "  node [\n    id {}\n    label {}\n", id, quote(label))?;
        if let Some(attrs) = doc.node_attributes.get(label) {
            for (key, value) in attrs {
                if !is_valid_key(key) {
                    return Err(eyre!("Invalid node attribute key '{}'", key));
                }
                writeln!(out, "    {} {:?}", key, value)?;
            }
        }
        out.push_str("  ]\n");
    }

    for edge in doc.graph.edges() {
        writeln!(
            out,
            "  edge [\n    source {}\n    target {}\n    weight {:?}\n  ]",
            edge.source, edge.target, edge.weight
        )?;
    }

    out.push_str("]\n");
    Ok(out)
}

/// Write a document to a GML file, creating parent directories as needed
pub fn write_gml_file(path: &Path, doc: &GmlDocument) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .wrap_err_with(|| format!("Failed to create directory '{}'", parent.display()))?;
    }
    let content = to_gml_string(doc)?;
    fs::write(path, content).wrap_err_with(|| format!("Failed to write GML file '{}'", path.display()))?;
    log::debug!(
        "Wrote {} nodes / {} edges to {}",
        doc.graph.node_count(),
        doc.graph.edge_count(),
        path.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse_simple_gml() {
        let gml_content = r#"
            graph [
                directed 1
                node [ id 0 label "AUS" pagerank 0.5 ]
                node [ id 1 label "NZL" ]
                edge [ source 0 target 1 weight 2.5 ]
            ]
        "#;

        let mut temp_file = NamedTempFile::new().unwrap();
        write!(temp_file, "{}", gml_content).unwrap();

        let doc = parse_gml_file(temp_file.path()).unwrap();
        assert_eq!(doc.graph.node_count(), 2);
        assert_eq!(doc.graph.edge_weight("AUS", "NZL"), Some(2.5));
        assert_eq!(doc.node_attributes("AUS").unwrap()["pagerank"], 0.5);
        assert!(doc.node_attributes("NZL").is_none());
        assert_eq!(doc.graph_attributes.get("directed"), Some(&"1".to_string()));
    }

    #[test]
    fn test_label_falls_back_to_id_and_default_weight() {
        let doc = parse_gml("graph [ node [ id 7 ] node [ id 8 ] edge [ source 7 target 8 ] ]").unwrap();
        assert_eq!(doc.graph.nodes(), &["7".to_string(), "8".to_string()][..]);
        assert_eq!(doc.graph.edge_weight("7", "8"), Some(1.0));
    }

    #[test]
    fn test_nested_blocks_and_comments_are_skipped() {
        let doc = parse_gml(
            r#"
            # exported by another tool
            graph [
                node [ id 0 label "A" graphics [ x 1.0 y 2.0 ] ]
                node [ id 1 label "B" ]
                edge [ source 0 target 1 weight 3 ]
            ]
            "#,
        )
        .unwrap();
        assert_eq!(doc.graph.edge_weight("A", "B"), Some(3.0));
        assert!(doc.node_attributes("A").is_none());
    }

    #[test]
    fn test_invalid_references_are_rejected() {
        assert!(parse_gml("graph [ node [ id 0 ] edge [ source 0 target 9 ] ]").is_err());
        assert!(parse_gml("graph [ node [ id 0 ] node [ id 0 ] ]").is_err());
        assert!(parse_gml("graph [ node [ label \"A\" ] ]").is_err());
        assert!(parse_gml("graph [ node [ id 0 label \"A ] ]").is_err());
    }

    #[test]
    fn test_round_trip_preserves_values_exactly() {
        let mut graph = FlowGraph::new();
        graph.add_edge("FRA", "DEU", 0.1 + 0.2);
        graph.add_edge("DEU", "FRA", 1.0e-12);
        graph.add_node("ITA \"x\"");

        let mut doc = GmlDocument::new(graph);
        doc.node_attributes.insert(
            "FRA".to_string(),
            BTreeMap::from([("gfi".to_string(), 1.0 / 3.0), ("hubs".to_string(), f64::NAN)]),
        );
        doc.graph_attributes.insert("network".to_string(), "financial".to_string());
        doc.graph_attributes.insert("average_degree".to_string(), "0.25".to_string());

        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("2015").join("financial.gml");
        write_gml_file(&path, &doc).unwrap();
        let back = parse_gml_file(&path).unwrap();

        assert_eq!(back.graph.nodes(), doc.graph.nodes());
        assert_eq!(back.graph.edge_weight("FRA", "DEU"), Some(0.1 + 0.2));
        assert_eq!(back.graph.edge_weight("DEU", "FRA"), Some(1.0e-12));
        let fra = back.node_attributes("FRA").unwrap();
        assert_eq!(fra["gfi"], 1.0 / 3.0);
        assert!(fra["hubs"].is_nan());
        assert_eq!(back.graph_attributes["network"], "financial");
        assert_eq!(back.graph_attributes["average_degree"], "0.25");
    }

    #[test]
    fn test_scalar_value_types() {
        let doc = parse_gml(
            r#"graph [
                year 2010
                efficiency 4.2e-1
                name "goods"
                node [ id 0 label "AUS" a 3 b -2.5e-3 c NaN d inf e -inf note "text" ]
                node [ id 1 label 1990 ]
                edge [ source 0 target 1 weight 7 ]
            ]"#,
        )
        .unwrap();

        let aus = doc.node_attributes("AUS").unwrap();
        assert_eq!(aus["a"], 3.0);
        assert_eq!(aus["b"], -2.5e-3);
        assert!(aus["c"].is_nan());
        assert_eq!(aus["d"], f64::INFINITY);
        assert_eq!(aus["e"], f64::NEG_INFINITY);
        assert!(!aus.contains_key("note"));
        assert!(doc.graph.contains_node("1990"));
        assert_eq!(doc.graph.edge_weight("AUS", "1990"), Some(7.0));
        assert_eq!(doc.graph_attributes["year"], "2010");
        assert_eq!(doc.graph_attributes["efficiency"], "0.42");
        assert_eq!(doc.graph_attributes["name"], "goods");
    }

    #[test]
    fn test_malformed_values_are_rejected() {
        assert!(parse_gml("graph [ node [ id 1.5 ] ]").is_err());
        assert!(parse_gml("graph [ node [ id 0 ] edge [ source 0 target 0 weight \"heavy\" ] ]").is_err());
        assert!(parse_gml("graph [ node [ id 0 ]").is_err());
        assert!(parse_gml("graph [ node [ id 0 ] ] ]").is_err());
        assert!(parse_gml("graph [ node [ id 0 @ ] ]").is_err());
        assert!(parse_gml("digraph [ ]").is_err());
    }

    #[test]
    fn test_invalid_attribute_key_is_rejected() {
        let mut doc = GmlDocument::new(FlowGraph::new());
        doc.graph.add_node("A");
        doc.node_attributes
            .insert("A".to_string(), BTreeMap::from([("bad key".to_string(), 1.0)]));
        assert!(to_gml_string(&doc).is_err());
    }
}
