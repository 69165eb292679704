use crate::report::section_header;
use std::collections::BTreeMap;
use std::fmt::Write;
use std::fs;
use std::path::Path;
use testcmp_common::{Result, TestCmpError};

pub type Attributes = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq)]
pub struct Edge {
    pub tail: String,
    pub head: String,
    pub attributes: Attributes,
}

/// A graph read from a DOT file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Graph {
    pub directed: bool,
    pub strict: bool,
    pub attributes: Attributes,
    pub nodes: BTreeMap<String, Attributes>,
    pub edges: Vec<Edge>,
}

impl Graph {
    pub fn parse(text: &str) -> std::result::Result<Self, String> {
        let tokens = tokenize(text)?;
        Parser {
            tokens,
            pos: 0,
            graph: Graph::default(),
        }
        .parse_graph()
    }

    fn endpoints<'a>(&self, edge: &'a Edge) -> (&'a str, &'a str) {
        if !self.directed && edge.head < edge.tail {
            (&edge.head, &edge.tail)
        } else {
            (&edge.tail, &edge.head)
        }
    }

    /// Sorted endpoint pairs, one per edge
    pub fn edge_list(&self) -> Vec<(&str, &str)> {
        let mut edges: Vec<_> = self.edges.iter().map(|e| self.endpoints(e)).collect();
        edges.sort_unstable();
        edges
    }

    /// Neighbours of every node with the attributes of the connecting edges
    pub fn adjacency(&self) -> BTreeMap<&str, BTreeMap<&str, Vec<&Attributes>>> {
        let mut adj: BTreeMap<&str, BTreeMap<&str, Vec<&Attributes>>> =
            self.nodes.keys().map(|n| (n.as_str(), BTreeMap::new())).collect();

        for edge in &self.edges {
            let (u, v) = (edge.tail.as_str(), edge.head.as_str());
            adj.entry(u).or_default().entry(v).or_default().push(&edge.attributes);
            if !self.directed && u != v {
                adj.entry(v).or_default().entry(u).or_default().push(&edge.attributes);
            }
        }
        for neighbours in adj.values_mut() {
            for attrs in neighbours.values_mut() {
                attrs.sort();
            }
        }
        adj
    }

    fn add_node(&mut self, name: &str, defaults: &Attributes) {
        if !self.nodes.contains_key(name) {
            self.nodes.insert(name.to_string(), defaults.clone());
        }
    }

    fn add_edge(&mut self, tail: &str, head: &str, attributes: Attributes) {
        let edge = Edge {
            tail: tail.to_string(),
            head: head.to_string(),
            attributes,
        };

        if self.strict {
            let key = self.endpoints(&edge);
            let directed = self.directed;
            let same = |e: &Edge| {
                let pair = if !directed && e.head < e.tail { (&e.head, &e.tail) } else { (&e.tail, &e.head) };
                (pair.0.as_str(), pair.1.as_str()) == key
            };
            if let Some(existing) = self.edges.iter_mut().find(|e| same(e)) {
                existing.attributes.extend(edge.attributes.clone());
                return;
            }
        }
        self.edges.push(edge);
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Id { text: String, quoted: bool },
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Equals,
    Semicolon,
    Comma,
    Colon,
    EdgeOp,
}

fn tokenize(text: &str) -> std::result::Result<Vec<Token>, String> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    let mut line_start = true;

    while i < chars.len() {
        let c = chars[i];

        if c == '\n' {
            line_start = true;
            i += 1;
            continue;
        }
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        // Preprocessor output lines
        if c == '#' && line_start {
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
            continue;
        }
        line_start = false;

        if c == '/' && chars.get(i + 1) == Some(&'/') {
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
            continue;
        }
        if c == '/' && chars.get(i + 1) == Some(&'*') {
            i += 2;
            while i + 1 < chars.len() && !(chars[i] == '*' && chars[i + 1] == '/') {
                i += 1;
            }
            if i + 1 >= chars.len() {
                return Err("unterminated comment".to_string());
            }
            i += 2;
            continue;
        }

        let single = match c {
            '{' => Some(Token::LBrace),
            '}' => Some(Token::RBrace),
            '[' => Some(Token::LBracket),
            ']' => Some(Token::RBracket),
            '=' => Some(Token::Equals),
            ';' => Some(Token::Semicolon),
            ',' => Some(Token::Comma),
            ':' => Some(Token::Colon),
            _ => None,
        };
        if let Some(token) = single {
            tokens.push(token);
            i += 1;
            continue;
        }

        if c == '-' && matches!(chars.get(i + 1), Some('>') | Some('-')) {
            tokens.push(Token::EdgeOp);
            i += 2;
            continue;
        }

        if c == '"' {
            let mut text = String::new();
            loop {
                i = read_quoted(&chars, i, &mut text)?;
                // "a" + "b" concatenation
                let mut j = i;
                while j < chars.len() && chars[j].is_whitespace() {
                    j += 1;
                }
                if chars.get(j) != Some(&'+') {
                    break;
                }
                j += 1;
                while j < chars.len() && chars[j].is_whitespace() {
                    j += 1;
                }
                if chars.get(j) != Some(&'"') {
                    return Err("'+' must be followed by a quoted string".to_string());
                }
                i = j;
            }
            tokens.push(Token::Id { text, quoted: true });
            continue;
        }

        if c == '<' {
            let mut depth = 0;
            let start = i;
            loop {
                match chars.get(i) {
                    Some('<') => depth += 1,
                    Some('>') => depth -= 1,
                    Some(_) => {}
                    None => return Err("unterminated HTML string".to_string()),
                }
                i += 1;
                if depth == 0 {
                    break;
                }
            }
            tokens.push(Token::Id {
                text: chars[start + 1..i - 1].iter().collect(),
                quoted: true,
            });
            continue;
        }

        if c == '-' || c == '.' || c.is_ascii_digit() {
            let start = i;
            i += 1;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            tokens.push(Token::Id {
                text: chars[start..i].iter().collect(),
                quoted: false,
            });
            continue;
        }

        if c.is_alphanumeric() || c == '_' || !c.is_ascii() {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_' || !chars[i].is_ascii()) {
                i += 1;
            }
            tokens.push(Token::Id {
                text: chars[start..i].iter().collect(),
                quoted: false,
            });
            continue;
        }

        return Err(format!("unexpected character '{}'", c));
    }

    Ok(tokens)
}

/// Read the quoted string starting at `chars[i]`, returning the index after the closing quote.
fn read_quoted(chars: &[char], mut i: usize, text: &mut String) -> std::result::Result<usize, String> {
    i += 1;
    while let Some(&c) = chars.get(i) {
        match c {
            '"' => return Ok(i + 1),
            '\\' if chars.get(i + 1) == Some(&'"') => {
                text.push('"');
                i += 2;
            }
            '\\' if chars.get(i + 1) == Some(&'\n') => i += 2,
            _ => {
                text.push(c);
                i += 1;
            }
        }
    }
    Err("unterminated quoted string".to_string())
}

/// Default attributes in effect inside a graph or subgraph body
#[derive(Clone, Default)]
struct Scope {
    node: Attributes,
    edge: Attributes,
    depth: usize,
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    graph: Graph,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expect(&mut self, expected: Token) -> std::result::Result<(), String> {
        match self.next() {
            Some(ref t) if *t == expected => Ok(()),
            other => Err(format!("expected {:?}, found {:?}", expected, other)),
        }
    }

    fn keyword(&self, word: &str) -> bool {
        matches!(self.peek(), Some(Token::Id { text, quoted: false }) if text.eq_ignore_ascii_case(word))
    }

    fn id(&mut self) -> std::result::Result<String, String> {
        match self.next() {
            Some(Token::Id { text, .. }) => Ok(text),
            other => Err(format!("expected an identifier, found {:?}", other)),
        }
    }

    fn parse_graph(mut self) -> std::result::Result<Graph, String> {
        if self.keyword("strict") {
            self.pos += 1;
            self.graph.strict = true;
        }
        if self.keyword("digraph") {
            self.graph.directed = true;
        } else if !self.keyword("graph") {
            return Err("expected 'graph' or 'digraph'".to_string());
        }
        self.pos += 1;

        if matches!(self.peek(), Some(Token::Id { .. })) {
            self.pos += 1;
        }
        self.expect(Token::LBrace)?;
        self.stmt_list(&mut Scope::default())?;
        self.expect(Token::RBrace)?;

        if let Some(token) = self.peek() {
            return Err(format!("trailing {:?} after graph", token));
        }
        Ok(self.graph)
    }

    /// Statements up to the closing brace; returns the nodes they mention.
    fn stmt_list(&mut self, scope: &mut Scope) -> std::result::Result<Vec<String>, String> {
        let mut mentioned = Vec::new();

        while !matches!(self.peek(), Some(Token::RBrace) | None) {
            self.stmt(scope, &mut mentioned)?;
            if self.peek() == Some(&Token::Semicolon) {
                self.pos += 1;
            }
        }
        Ok(mentioned)
    }

    fn stmt(&mut self, scope: &mut Scope, mentioned: &mut Vec<String>) -> std::result::Result<(), String> {
        for kind in ["graph", "node", "edge"] {
            if self.keyword(kind) && self.tokens.get(self.pos + 1) == Some(&Token::LBracket) {
                self.pos += 1;
                let attrs = self.attr_lists()?;
                match kind {
                    "graph" if scope.depth == 0 => self.graph.attributes.extend(attrs),
                    "graph" => {}
                    "node" => scope.node.extend(attrs),
                    _ => scope.edge.extend(attrs),
                }
                return Ok(());
            }
        }

        let is_subgraph = self.keyword("subgraph") || self.peek() == Some(&Token::LBrace);
        let first = if is_subgraph {
            self.subgraph(scope)?
        } else {
            let name = self.node_id()?;
            if self.peek() == Some(&Token::Equals) {
                self.pos += 1;
                let value = self.id()?;
                if scope.depth == 0 {
                    self.graph.attributes.insert(name, value);
                }
                return Ok(());
            }
            self.graph.add_node(&name, &scope.node);
            vec![name]
        };

        if self.peek() != Some(&Token::EdgeOp) {
            if !is_subgraph {
                let attrs = self.attr_lists()?;
                if let Some(node) = self.graph.nodes.get_mut(&first[0]) {
                    node.extend(attrs);
                }
            }
            mentioned.extend(first);
            return Ok(());
        }

        let mut groups = vec![first];
        while self.peek() == Some(&Token::EdgeOp) {
            self.pos += 1;
            let group = if self.keyword("subgraph") || self.peek() == Some(&Token::LBrace) {
                self.subgraph(scope)?
            } else {
                let name = self.node_id()?;
                self.graph.add_node(&name, &scope.node);
                vec![name]
            };
            groups.push(group);
        }

        let mut attrs = scope.edge.clone();
        attrs.extend(self.attr_lists()?);

        for pair in groups.windows(2) {
            for tail in &pair[0] {
                for head in &pair[1] {
                    self.graph.add_edge(tail, head, attrs.clone());
                }
            }
        }
        mentioned.extend(groups.into_iter().flatten());
        Ok(())
    }

    fn subgraph(&mut self, parent: &Scope) -> std::result::Result<Vec<String>, String> {
        if self.keyword("subgraph") {
            self.pos += 1;
            if matches!(self.peek(), Some(Token::Id { .. })) {
                self.pos += 1;
            }
        }
        let mut scope = Scope {
            depth: parent.depth + 1,
            ..parent.clone()
        };
        self.expect(Token::LBrace)?;
        let mentioned = self.stmt_list(&mut scope)?;
        self.expect(Token::RBrace)?;
        Ok(mentioned)
    }

    /// Node name; a port suffix is accepted and dropped.
    fn node_id(&mut self) -> std::result::Result<String, String> {
        let name = self.id()?;
        for _ in 0..2 {
            if self.peek() == Some(&Token::Colon) {
                self.pos += 1;
                self.id()?;
            }
        }
        Ok(name)
    }

    fn attr_lists(&mut self) -> std::result::Result<Attributes, String> {
        let mut attrs = Attributes::new();

        while self.peek() == Some(&Token::LBracket) {
            self.pos += 1;
            while self.peek() != Some(&Token::RBracket) {
                let key = self.id()?;
                self.expect(Token::Equals)?;
                let value = self.id()?;
                attrs.insert(key, value);
                if matches!(self.peek(), Some(Token::Comma) | Some(Token::Semicolon)) {
                    self.pos += 1;
                }
            }
            self.pos += 1;
        }
        Ok(attrs)
    }
}

fn read_graph(path: &Path) -> Result<Graph> {
    let text = fs::read_to_string(path)?;
    Graph::parse(&text).map_err(|e| TestCmpError::format(path, e))
}

/// Comparison of Graphviz files
pub fn compare_files(old: &Path, new: &Path, detail: &mut String) -> Result<usize> {
    let g_old = read_graph(old)?;
    let g_new = read_graph(new)?;

    let nodes = g_old.nodes == g_new.nodes;
    let edges = g_old.directed == g_new.directed && g_old.edge_list() == g_new.edge_list();
    let adjacencies = g_old.directed == g_new.directed && g_old.adjacency() == g_new.adjacency();
    let attributes = g_old.attributes == g_new.attributes;

    if nodes && edges && adjacencies && attributes && g_old.strict == g_new.strict {
        return Ok(0);
    }

    section_header(detail, "diff", old, new)?;
    writeln!(detail, "Equality of nodes: {}", nodes)?;
    writeln!(detail, "Equality of edges: {}", edges)?;
    writeln!(detail, "Equality of adjacencies: {}", adjacencies)?;
    writeln!(detail, "Equality of attributes: {}", attributes)?;
    Ok(1)
}
