//! Template lexer - splits source into data and tag tokens
//!
//! The lexer runs a single scan over the whole source with a stack of
//! states. In the root state it looks for the earliest delimiter (raw block,
//! comment, statement, print or a line statement / line comment prefix);
//! inside a tag it produces expression tokens until the matching end
//! delimiter. Whitespace control (`-`/`+` modifiers, `trim_blocks`,
//! `lstrip_blocks`) is applied while scanning so line numbers stay exact.
//!
//! [`Lexer::tokeniter`] yields every raw token including whitespace and
//! comments; [`Lexer::tokenize`] yields what the parser consumes.

use std::fmt;

use regex::Regex;

use core_types::{repr_str, Result, TemplateError};

/// Delimiters and whitespace options the lexer is built from
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LexerConfig {
    /// Start of a statement tag
    pub block_start: String,
    /// End of a statement tag
    pub block_end: String,
    /// Start of a print tag
    pub variable_start: String,
    /// End of a print tag
    pub variable_end: String,
    /// Start of a comment
    pub comment_start: String,
    /// End of a comment
    pub comment_end: String,
    /// Prefix turning a whole line into a statement
    pub line_statement_prefix: Option<String>,
    /// Prefix starting a comment that runs to the end of the line
    pub line_comment_prefix: Option<String>,
    /// Remove the first newline after a statement tag
    pub trim_blocks: bool,
    /// Strip whitespace from the start of a line up to a statement tag
    pub lstrip_blocks: bool,
    /// Newline written for every line break in template data
    pub newline_sequence: String,
    /// Keep a single trailing newline of the source
    pub keep_trailing_newline: bool,
}

impl Default for LexerConfig {
    fn default() -> Self {
        Self {
            block_start: "{%".to_string(),
            block_end: "%}".to_string(),
            variable_start: "{{".to_string(),
            variable_end: "}}".to_string(),
            comment_start: "{#".to_string(),
            comment_end: "#}".to_string(),
            line_statement_prefix: None,
            line_comment_prefix: None,
            trim_blocks: false,
            lstrip_blocks: false,
            newline_sequence: "\n".to_string(),
            keep_trailing_newline: false,
        }
    }
}

/// Token types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    /// `+`
    Add,
    /// `=`
    Assign,
    /// `:`
    Colon,
    /// `,`
    Comma,
    /// `/`
    Div,
    /// `.`
    Dot,
    /// `==`
    Eq,
    /// `//`
    FloorDiv,
    /// `>`
    Gt,
    /// `>=`
    GtEq,
    /// `{`
    LBrace,
    /// `[`
    LBracket,
    /// `(`
    LParen,
    /// `<`
    Lt,
    /// `<=`
    LtEq,
    /// `%`
    Mod,
    /// `*`
    Mul,
    /// `!=`
    Ne,
    /// `|`
    Pipe,
    /// `**`
    Pow,
    /// `}`
    RBrace,
    /// `]`
    RBracket,
    /// `)`
    RParen,
    /// `;`
    Semicolon,
    /// `-`
    Sub,
    /// `~`
    Tilde,
    /// Whitespace inside a tag
    Whitespace,
    /// Float literal
    Float,
    /// Integer literal
    Integer,
    /// Identifier
    Name,
    /// String literal
    String,
    /// `{%`
    BlockBegin,
    /// `%}`
    BlockEnd,
    /// `{{`
    VariableBegin,
    /// `}}`
    VariableEnd,
    /// `{% raw %}`
    RawBegin,
    /// `{% endraw %}`
    RawEnd,
    /// `{#`
    CommentBegin,
    /// `#}`
    CommentEnd,
    /// Comment body
    Comment,
    /// Line statement prefix
    LineStatementBegin,
    /// End of a line statement
    LineStatementEnd,
    /// Line comment prefix
    LineCommentBegin,
    /// End of a line comment
    LineCommentEnd,
    /// Line comment body
    LineComment,
    /// Template data
    Data,
    /// Placeholder before the first token
    Initial,
    /// End of input
    Eof,
}

const OPERATORS: &[(&str, TokenKind)] = &[
    ("**", TokenKind::Pow),
    ("//", TokenKind::FloorDiv),
    ("==", TokenKind::Eq),
    ("!=", TokenKind::Ne),
    (">=", TokenKind::GtEq),
    ("<=", TokenKind::LtEq),
    ("+", TokenKind::Add),
    ("-", TokenKind::Sub),
    ("/", TokenKind::Div),
    ("*", TokenKind::Mul),
    ("%", TokenKind::Mod),
    ("~", TokenKind::Tilde),
    ("[", TokenKind::LBracket),
    ("]", TokenKind::RBracket),
    ("(", TokenKind::LParen),
    (")", TokenKind::RParen),
    ("{", TokenKind::LBrace),
    ("}", TokenKind::RBrace),
    (">", TokenKind::Gt),
    ("<", TokenKind::Lt),
    ("=", TokenKind::Assign),
    (".", TokenKind::Dot),
    (":", TokenKind::Colon),
    ("|", TokenKind::Pipe),
    (",", TokenKind::Comma),
    (";", TokenKind::Semicolon),
];

impl TokenKind {
    /// Canonical type name, as used in token tests like `name:endfor`
    pub fn name(self) -> &'static str {
        match self {
            TokenKind::Add => "add",
            TokenKind::Assign => "assign",
            TokenKind::Colon => "colon",
            TokenKind::Comma => "comma",
            TokenKind::Div => "div",
            TokenKind::Dot => "dot",
            TokenKind::Eq => "eq",
            TokenKind::FloorDiv => "floordiv",
            TokenKind::Gt => "gt",
            TokenKind::GtEq => "gteq",
            TokenKind::LBrace => "lbrace",
            TokenKind::LBracket => "lbracket",
            TokenKind::LParen => "lparen",
            TokenKind::Lt => "lt",
            TokenKind::LtEq => "lteq",
            TokenKind::Mod => "mod",
            TokenKind::Mul => "mul",
            TokenKind::Ne => "ne",
            TokenKind::Pipe => "pipe",
            TokenKind::Pow => "pow",
            TokenKind::RBrace => "rbrace",
            TokenKind::RBracket => "rbracket",
            TokenKind::RParen => "rparen",
            TokenKind::Semicolon => "semicolon",
            TokenKind::Sub => "sub",
            TokenKind::Tilde => "tilde",
            TokenKind::Whitespace => "whitespace",
            TokenKind::Float => "float",
            TokenKind::Integer => "integer",
            TokenKind::Name => "name",
            TokenKind::String => "string",
            TokenKind::BlockBegin => "block_begin",
            TokenKind::BlockEnd => "block_end",
            TokenKind::VariableBegin => "variable_begin",
            TokenKind::VariableEnd => "variable_end",
            TokenKind::RawBegin => "raw_begin",
            TokenKind::RawEnd => "raw_end",
            TokenKind::CommentBegin => "comment_begin",
            TokenKind::CommentEnd => "comment_end",
            TokenKind::Comment => "comment",
            TokenKind::LineStatementBegin => "linestatement_begin",
            TokenKind::LineStatementEnd => "linestatement_end",
            TokenKind::LineCommentBegin => "linecomment_begin",
            TokenKind::LineCommentEnd => "linecomment_end",
            TokenKind::LineComment => "linecomment",
            TokenKind::Data => "data",
            TokenKind::Initial => "initial",
            TokenKind::Eof => "eof",
        }
    }

    /// Operator symbol for operator tokens
    pub fn symbol(self) -> Option<&'static str> {
        OPERATORS.iter().find(|(_, k)| *k == self).map(|(s, _)| *s)
    }

    fn from_name(name: &str) -> Option<TokenKind> {
        ALL_KINDS.iter().copied().find(|k| k.name() == name)
    }

    /// Human readable description used in error messages
    pub fn describe(self) -> String {
        if let Some(symbol) = self.symbol() {
            return symbol.to_string();
        }
        match self {
            TokenKind::CommentBegin => "begin of comment",
            TokenKind::CommentEnd => "end of comment",
            TokenKind::Comment | TokenKind::LineComment => "comment",
            TokenKind::BlockBegin => "begin of statement block",
            TokenKind::BlockEnd => "end of statement block",
            TokenKind::VariableBegin => "begin of print statement",
            TokenKind::VariableEnd => "end of print statement",
            TokenKind::LineStatementBegin => "begin of line statement",
            TokenKind::LineStatementEnd => "end of line statement",
            TokenKind::Data => "template data / text",
            TokenKind::Eof => "end of template",
            other => other.name(),
        }
        .to_string()
    }
}

const ALL_KINDS: &[TokenKind] = &[
    TokenKind::Add,
    TokenKind::Assign,
    TokenKind::Colon,
    TokenKind::Comma,
    TokenKind::Div,
    TokenKind::Dot,
    TokenKind::Eq,
    TokenKind::FloorDiv,
    TokenKind::Gt,
    TokenKind::GtEq,
    TokenKind::LBrace,
    TokenKind::LBracket,
    TokenKind::LParen,
    TokenKind::Lt,
    TokenKind::LtEq,
    TokenKind::Mod,
    TokenKind::Mul,
    TokenKind::Ne,
    TokenKind::Pipe,
    TokenKind::Pow,
    TokenKind::RBrace,
    TokenKind::RBracket,
    TokenKind::RParen,
    TokenKind::Semicolon,
    TokenKind::Sub,
    TokenKind::Tilde,
    TokenKind::Whitespace,
    TokenKind::Float,
    TokenKind::Integer,
    TokenKind::Name,
    TokenKind::String,
    TokenKind::BlockBegin,
    TokenKind::BlockEnd,
    TokenKind::VariableBegin,
    TokenKind::VariableEnd,
    TokenKind::RawBegin,
    TokenKind::RawEnd,
    TokenKind::CommentBegin,
    TokenKind::CommentEnd,
    TokenKind::Comment,
    TokenKind::LineStatementBegin,
    TokenKind::LineStatementEnd,
    TokenKind::LineCommentBegin,
    TokenKind::LineCommentEnd,
    TokenKind::LineComment,
    TokenKind::Data,
    TokenKind::Initial,
    TokenKind::Eof,
];

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A lexed token. Literal values are normalized: strings are unescaped,
/// integers are rendered in decimal and underscores are dropped from numbers.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    /// Line the token starts on
    pub lineno: u32,
    /// Token type
    pub kind: TokenKind,
    /// Token text
    pub value: String,
}

impl Token {
    /// Create a token
    pub fn new(lineno: u32, kind: TokenKind, value: impl Into<String>) -> Self {
        Self {
            lineno,
            kind,
            value: value.into(),
        }
    }

    /// Test against a token expression: either a type name (`block_end`)
    /// or a type and value (`name:endfor`)
    pub fn test(&self, expr: &str) -> bool {
        if self.kind.name() == expr {
            return true;
        }
        match expr.split_once(':') {
            Some((kind, value)) => self.kind.name() == kind && self.value == value,
            None => false,
        }
    }

    /// Test against several token expressions
    pub fn test_any(&self, exprs: &[&str]) -> bool {
        exprs.iter().any(|e| self.test(e))
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&describe_token(self))
    }
}

/// Description of a token for error messages; names describe themselves
pub fn describe_token(token: &Token) -> String {
    if token.kind == TokenKind::Name {
        return token.value.clone();
    }
    token.kind.describe()
}

/// Description of a token expression such as `name:endfor` or `block_end`
pub fn describe_token_expr(expr: &str) -> String {
    let kind = match expr.split_once(':') {
        Some(("name", value)) => return value.to_string(),
        Some((kind, _)) => kind,
        None => expr,
    };
    match TokenKind::from_name(kind) {
        Some(k) => k.describe(),
        None => kind.to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Root,
    Block,
    Variable,
    Comment,
    Raw,
    LineStatement,
    LineComment,
}

/// Lexer state a scan starts in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartState {
    /// Template source
    Root,
    /// A bare expression, as if inside `{{ ... }}`
    Variable,
    /// Statement content, as if inside `{% ... %}`
    Block,
}

/// Delimiter alternatives of the root rule, in group order
struct RootAlternative {
    kind: TokenKind,
    state: State,
}

enum TagRule {
    Whitespace,
    Float,
    Integer,
    Name,
    String,
    Operator,
}

/// Compiled lexer for one delimiter configuration
pub struct Lexer {
    config: LexerConfig,
    root: Regex,
    root_alternatives: Vec<RootAlternative>,
    data: Regex,
    tag_rules: Vec<(Regex, TagRule)>,
    block_end: Regex,
    variable_end: Regex,
    line_statement_end: Regex,
    comment_end: Regex,
    raw_end: Regex,
    line_comment: Regex,
}

impl fmt::Debug for Lexer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lexer").field("config", &self.config).finish()
    }
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| {
        TemplateError::new(
            core_types::ErrorKind::SyntaxError,
            format!("invalid delimiter configuration: {}", e),
        )
    })
}

/// Anchor a pattern at the start of the searched slice
fn anchored(pattern: &str) -> Result<Regex> {
    compile(&format!(r"\A(?:{})", pattern))
}

struct RawToken {
    lineno: u32,
    kind: TokenKind,
    value: String,
}

impl Lexer {
    /// Compile the rules for a configuration
    pub fn new(config: LexerConfig) -> Result<Self> {
        let e = |s: &str| regex::escape(s);
        let block_suffix = if config.trim_blocks { r"\n?" } else { "" };

        let mut rules: Vec<(usize, &str, TokenKind, State, String)> = vec![
            (
                config.comment_start.len(),
                "comment_begin",
                TokenKind::CommentBegin,
                State::Comment,
                e(&config.comment_start),
            ),
            (
                config.block_start.len(),
                "block_begin",
                TokenKind::BlockBegin,
                State::Block,
                e(&config.block_start),
            ),
            (
                config.variable_start.len(),
                "variable_begin",
                TokenKind::VariableBegin,
                State::Variable,
                e(&config.variable_start),
            ),
        ];
        if let Some(prefix) = &config.line_statement_prefix {
            rules.push((
                prefix.len(),
                "linestatement_begin",
                TokenKind::LineStatementBegin,
                State::LineStatement,
                format!(r"^[ \t\x0b]*{}", e(prefix)),
            ));
        }
        if let Some(prefix) = &config.line_comment_prefix {
            rules.push((
                prefix.len(),
                "linecomment_begin",
                TokenKind::LineCommentBegin,
                State::LineComment,
                format!(r"[^\S\r\n]*{}", e(prefix)),
            ));
        }
        // longest delimiters first so a prefix never shadows a longer one
        rules.sort_by(|a, b| (b.0, b.1).cmp(&(a.0, a.1)));

        let mut alternatives = vec![format!(
            r"({}(\-|\+|)\s*raw\s*(?:\-{}\s*|{}))",
            e(&config.block_start),
            e(&config.block_end),
            e(&config.block_end)
        )];
        let mut root_alternatives = vec![RootAlternative {
            kind: TokenKind::RawBegin,
            state: State::Raw,
        }];
        for (_, _, kind, state, pattern) in &rules {
            alternatives.push(format!(r"({}(\-|\+|))", pattern));
            root_alternatives.push(RootAlternative {
                kind: *kind,
                state: *state,
            });
        }
        let root = compile(&format!(r"(?ms)(.*?)(?:{})", alternatives.join("|")))?;

        let mut operators: Vec<&str> = OPERATORS.iter().map(|(s, _)| *s).collect();
        operators.sort_by_key(|s| std::cmp::Reverse(s.len()));
        let operator_pattern = operators.iter().map(|s| e(s)).collect::<Vec<_>>().join("|");

        let tag_rules = vec![
            (anchored(r"\s+")?, TagRule::Whitespace),
            (
                anchored(r"(?i)(?:\d+_)*\d+(?:(?:\.(?:\d+_)*\d+)?e[+\-]?(?:\d+_)*\d+|\.(?:\d+_)*\d+)")?,
                TagRule::Float,
            ),
            (
                anchored(r"(?i)0b(?:_?[01])+|0o(?:_?[0-7])+|0x(?:_?[\da-f])+|[1-9](?:_?\d)*|0(?:_?0)*")?,
                TagRule::Integer,
            ),
            (
                anchored(r"[_\p{L}\p{Nl}][_\p{L}\p{Nl}\p{Mn}\p{Mc}\p{Nd}\p{Pc}]*")?,
                TagRule::Name,
            ),
            (
                anchored(r#"(?s)'([^'\\]*(?:\\.[^'\\]*)*)'|"([^"\\]*(?:\\.[^"\\]*)*)""#)?,
                TagRule::String,
            ),
            (anchored(&operator_pattern)?, TagRule::Operator),
        ];

        let block_end = anchored(&format!(
            r"\+{end}|\-{end}\s*|{end}{suffix}",
            end = e(&config.block_end),
            suffix = block_suffix
        ))?;
        let variable_end = anchored(&format!(
            r"\-{end}\s*|{end}",
            end = e(&config.variable_end)
        ))?;
        let line_statement_end = anchored(r"(?m)\s*(\n|$)")?;
        let comment_end = compile(&format!(
            r"(?s)(.*?)((?:\+{end}|\-{end}\s*|{end}{suffix}))",
            end = e(&config.comment_end),
            suffix = block_suffix
        ))?;
        let raw_end = compile(&format!(
            r"(?s)(.*?)((?:{start}(\-|\+|))\s*endraw\s*(?:\+{end}|\-{end}\s*|{end}{suffix}))",
            start = e(&config.block_start),
            end = e(&config.block_end),
            suffix = block_suffix
        ))?;

        Ok(Self {
            root,
            root_alternatives,
            data: anchored(r"(?s).+")?,
            tag_rules,
            block_end,
            variable_end,
            line_statement_end,
            comment_end,
            raw_end,
            line_comment: anchored(r"([^\n]*)()")?,
            config,
        })
    }

    /// The configuration this lexer was built from
    pub fn config(&self) -> &LexerConfig {
        &self.config
    }

    /// Tokens the parser consumes: whitespace, comments and raw markers are
    /// dropped, literals are decoded and line statements become blocks
    pub fn tokenize(&self, source: &str, name: Option<&str>, filename: Option<&str>) -> Result<Vec<Token>> {
        self.tokenize_from(source, StartState::Root, name, filename)
    }

    /// Like [`Lexer::tokenize`] but starting inside a tag
    pub fn tokenize_from(
        &self,
        source: &str,
        start: StartState,
        name: Option<&str>,
        filename: Option<&str>,
    ) -> Result<Vec<Token>> {
        let raw = self.scan(source, start, name, filename)?;
        self.wrap(raw, name, filename)
    }

    /// Every raw token as (line, type, text), for debugging
    pub fn tokeniter(&self, source: &str, name: Option<&str>) -> Result<Vec<Token>> {
        Ok(self
            .scan(source, StartState::Root, name, None)?
            .into_iter()
            .map(|t| Token::new(t.lineno, t.kind, t.value))
            .collect())
    }

    fn normalize_newlines(&self, value: &str) -> String {
        if self.config.newline_sequence == "\n" {
            value.to_string()
        } else {
            value.replace('\n', &self.config.newline_sequence)
        }
    }

    fn scan(&self, source: &str, start: StartState, name: Option<&str>, filename: Option<&str>) -> Result<Vec<RawToken>> {
        let source = prepare_source(source, self.config.keep_trailing_newline);
        let source = source.as_str();
        let fail = |msg: String, lineno: u32| TemplateError::syntax(msg, lineno, name, filename);

        let mut tokens = Vec::new();
        let mut stack = vec![State::Root];
        match start {
            StartState::Root => {}
            StartState::Variable => stack.push(State::Variable),
            StartState::Block => stack.push(State::Block),
        }
        let base_depth = stack.len();
        let mut balancing: Vec<char> = Vec::new();
        let mut pos = 0usize;
        let mut lineno = 1u32;
        let mut line_starting = true;
        let newlines = |s: &str| s.matches('\n').count() as u32;

        macro_rules! push {
            ($kind:expr, $value:expr) => {{
                let value: &str = $value;
                let kind: TokenKind = $kind;
                let skip_empty = matches!(
                    kind,
                    TokenKind::Whitespace | TokenKind::Data | TokenKind::Comment | TokenKind::LineComment
                );
                if !value.is_empty() || !skip_empty {
                    tokens.push(RawToken {
                        lineno,
                        kind,
                        value: value.to_string(),
                    });
                }
                lineno += newlines(value);
            }};
        }

        while pos < source.len() {
            let state = *stack.last().unwrap_or(&State::Root);
            match state {
                State::Root => {
                    if let Some(caps) = self.root.captures_at(source, pos).filter(|c| c.get(0).map(|m| m.start()) == Some(pos)) {
                        let whole = caps.get(0).map(|m| m.as_str()).unwrap_or("");
                        let text = caps.get(1).map(|m| m.as_str()).unwrap_or("");
                        let Some((idx, tag, sign)) = (0..self.root_alternatives.len()).find_map(|i| {
                            caps.get(2 + 2 * i)
                                .map(|m| (i, m.as_str(), caps.get(3 + 2 * i).map(|s| s.as_str()).unwrap_or("")))
                        }) else {
                            return Err(fail("internal lexer error: no delimiter matched".to_string(), lineno));
                        };
                        let alternative = &self.root_alternatives[idx];
                        let (data, stripped_newlines) = self.strip_before_tag(text, sign, alternative.kind, line_starting);
                        push!(TokenKind::Data, data);
                        lineno += stripped_newlines;
                        push!(alternative.kind, tag);
                        line_starting = whole.ends_with('\n');
                        stack.push(alternative.state);
                        pos += whole.len();
                    } else if let Some(m) = self.data.find(&source[pos..]) {
                        push!(TokenKind::Data, m.as_str());
                        line_starting = m.as_str().ends_with('\n');
                        pos += m.end();
                    } else {
                        break;
                    }
                }
                State::Comment => {
                    match self.comment_end.captures_at(source, pos).filter(|c| c.get(0).map(|m| m.start()) == Some(pos)) {
                        Some(caps) => {
                            let whole = caps.get(0).map(|m| m.as_str()).unwrap_or("");
                            push!(TokenKind::Comment, caps.get(1).map(|m| m.as_str()).unwrap_or(""));
                            push!(TokenKind::CommentEnd, caps.get(2).map(|m| m.as_str()).unwrap_or(""));
                            line_starting = whole.ends_with('\n');
                            stack.pop();
                            pos += whole.len();
                        }
                        None => return Err(fail("Missing end of comment tag".to_string(), lineno)),
                    }
                }
                State::Raw => {
                    match self.raw_end.captures_at(source, pos).filter(|c| c.get(0).map(|m| m.start()) == Some(pos)) {
                        Some(caps) => {
                            let whole = caps.get(0).map(|m| m.as_str()).unwrap_or("");
                            let text = caps.get(1).map(|m| m.as_str()).unwrap_or("");
                            let sign = caps.get(3).map(|m| m.as_str()).unwrap_or("");
                            let (data, stripped_newlines) =
                                self.strip_before_tag(text, sign, TokenKind::RawEnd, line_starting);
                            push!(TokenKind::Data, data);
                            lineno += stripped_newlines;
                            push!(TokenKind::RawEnd, caps.get(2).map(|m| m.as_str()).unwrap_or(""));
                            line_starting = whole.ends_with('\n');
                            stack.pop();
                            pos += whole.len();
                        }
                        None => return Err(fail("Missing end of raw directive".to_string(), lineno)),
                    }
                }
                State::LineComment => {
                    let caps = self
                        .line_comment
                        .captures(&source[pos..])
                        .ok_or_else(|| fail("internal lexer error: line comment".to_string(), lineno))?;
                    let whole_len = caps.get(0).map(|m| m.end()).unwrap_or(0);
                    push!(TokenKind::LineComment, caps.get(1).map(|m| m.as_str()).unwrap_or(""));
                    push!(TokenKind::LineCommentEnd, "");
                    stack.pop();
                    pos += whole_len;
                }
                State::Block | State::Variable | State::LineStatement => {
                    let (end_re, end_kind) = match state {
                        State::Block => (&self.block_end, TokenKind::BlockEnd),
                        State::Variable => (&self.variable_end, TokenKind::VariableEnd),
                        _ => (&self.line_statement_end, TokenKind::LineStatementEnd),
                    };
                    // end delimiters that look like operators only count once
                    // every bracket is closed
                    if balancing.is_empty() {
                        if let Some(m) = end_re.find(&source[pos..]) {
                            push!(end_kind, m.as_str());
                            line_starting = m.as_str().ends_with('\n');
                            stack.pop();
                            pos += m.end();
                            continue;
                        }
                    }
                    let rest = &source[pos..];
                    let mut matched = None;
                    for (re, rule) in &self.tag_rules {
                        if matches!(rule, TagRule::Float) && source[..pos].ends_with('.') {
                            continue;
                        }
                        if let Some(m) = re.find(rest) {
                            matched = Some((m.as_str(), rule));
                            break;
                        }
                    }
                    let Some((text, rule)) = matched else {
                        let ch = rest.chars().next().unwrap_or(' ');
                        return Err(fail(format!("unexpected char {} at {}", repr_str(&ch.to_string()), pos), lineno));
                    };
                    let kind = match rule {
                        TagRule::Whitespace => TokenKind::Whitespace,
                        TagRule::Float => TokenKind::Float,
                        TagRule::Integer => TokenKind::Integer,
                        TagRule::Name => TokenKind::Name,
                        TagRule::String => TokenKind::String,
                        TagRule::Operator => {
                            let kind = OPERATORS
                                .iter()
                                .find(|(s, _)| *s == text)
                                .map(|(_, k)| *k)
                                .ok_or_else(|| fail(format!("unknown operator {}", text), lineno))?;
                            match text {
                                "{" => balancing.push('}'),
                                "(" => balancing.push(')'),
                                "[" => balancing.push(']'),
                                "}" | ")" | "]" => {
                                    let closing = text.chars().next().unwrap_or(' ');
                                    match balancing.pop() {
                                        None => return Err(fail(format!("unexpected '{}'", text), lineno)),
                                        Some(expected) if expected != closing => {
                                            return Err(fail(
                                                format!("unexpected '{}', expected '{}'", text, expected),
                                                lineno,
                                            ))
                                        }
                                        Some(_) => {}
                                    }
                                }
                                _ => {}
                            }
                            kind
                        }
                    };
                    push!(kind, text);
                    line_starting = text.ends_with('\n');
                    pos += text.len();
                }
            }
        }

        if stack.len() > base_depth {
            let expected = match stack.last() {
                Some(State::Comment) => return Err(fail("Missing end of comment tag".to_string(), lineno)),
                Some(State::Raw) => return Err(fail("Missing end of raw directive".to_string(), lineno)),
                Some(State::Block) => TokenKind::BlockEnd,
                Some(State::Variable) => TokenKind::VariableEnd,
                Some(State::LineStatement) if !balancing.is_empty() => TokenKind::LineStatementEnd,
                Some(State::LineStatement) => {
                    tokens.push(RawToken {
                        lineno,
                        kind: TokenKind::LineStatementEnd,
                        value: String::new(),
                    });
                    return Ok(tokens);
                }
                _ => return Ok(tokens),
            };
            return Err(fail(
                format!("unexpected end of template, expected {}.", repr_str(&expected.describe())),
                lineno,
            ));
        }
        Ok(tokens)
    }

    /// Apply `-` stripping or `lstrip_blocks` to the data before a tag.
    /// Returns the kept data and the number of newlines removed.
    fn strip_before_tag<'s>(&self, text: &'s str, sign: &str, tag: TokenKind, line_starting: bool) -> (&'s str, u32) {
        if sign == "-" {
            let stripped = text.trim_end();
            return (stripped, text[stripped.len()..].matches('\n').count() as u32);
        }
        if sign != "+" && self.config.lstrip_blocks && tag != TokenKind::VariableBegin {
            let l_pos = text.rfind('\n').map(|i| i + 1).unwrap_or(0);
            if l_pos > 0 || line_starting {
                let tail = &text[l_pos..];
                if !tail.is_empty() && tail.chars().all(char::is_whitespace) {
                    return (&text[..l_pos], 0);
                }
            }
        }
        (text, 0)
    }

    fn wrap(&self, raw: Vec<RawToken>, name: Option<&str>, filename: Option<&str>) -> Result<Vec<Token>> {
        let mut out = Vec::with_capacity(raw.len());
        for RawToken { lineno, kind, value } in raw {
            let fail = |msg: String| TemplateError::syntax(msg, lineno, name, filename);
            let token = match kind {
                TokenKind::Whitespace
                | TokenKind::Comment
                | TokenKind::CommentBegin
                | TokenKind::CommentEnd
                | TokenKind::LineComment
                | TokenKind::LineCommentBegin
                | TokenKind::LineCommentEnd
                | TokenKind::RawBegin
                | TokenKind::RawEnd => continue,
                TokenKind::LineStatementBegin => Token::new(lineno, TokenKind::BlockBegin, value),
                TokenKind::LineStatementEnd => Token::new(lineno, TokenKind::BlockEnd, value),
                TokenKind::Data => Token::new(lineno, kind, self.normalize_newlines(&value)),
                TokenKind::String => {
                    let inner = &value[1..value.len() - 1];
                    let unescaped = unescape_string(&self.normalize_newlines(inner)).map_err(fail)?;
                    Token::new(lineno, kind, unescaped)
                }
                TokenKind::Integer => Token::new(lineno, kind, parse_integer(&value).map_err(fail)?.to_string()),
                TokenKind::Float => Token::new(lineno, kind, value.replace('_', "")),
                _ => Token::new(lineno, kind, value),
            };
            out.push(token);
        }
        Ok(out)
    }
}

/// Normalize every newline style to `\n` and drop one trailing newline
fn prepare_source(source: &str, keep_trailing_newline: bool) -> String {
    let mut normalized = if source.contains('\r') {
        source.replace("\r\n", "\n").replace('\r', "\n")
    } else {
        source.to_string()
    };
    if !keep_trailing_newline && normalized.ends_with('\n') {
        normalized.pop();
    }
    normalized
}

/// Decode an integer literal: underscores, `0b`/`0o`/`0x` prefixes
pub fn parse_integer(literal: &str) -> std::result::Result<i64, String> {
    let digits = literal.replace('_', "").to_ascii_lowercase();
    let parsed = if let Some(rest) = digits.strip_prefix("0b") {
        i64::from_str_radix(rest, 2)
    } else if let Some(rest) = digits.strip_prefix("0o") {
        i64::from_str_radix(rest, 8)
    } else if let Some(rest) = digits.strip_prefix("0x") {
        i64::from_str_radix(rest, 16)
    } else {
        digits.parse::<i64>()
    };
    parsed.map_err(|_| format!("integer literal {} is out of range", literal))
}

/// Resolve backslash escapes of a string literal body
pub fn unescape_string(s: &str) -> std::result::Result<String, String> {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let Some(esc) = chars.next() else {
            return Err("\\ at end of string".to_string());
        };
        match esc {
            '\n' => {}
            '\\' => out.push('\\'),
            '\'' => out.push('\''),
            '"' => out.push('"'),
            'a' => out.push('\x07'),
            'b' => out.push('\x08'),
            'f' => out.push('\x0c'),
            'n' => out.push('\n'),
            'r' => out.push('\r'),
            't' => out.push('\t'),
            'v' => out.push('\x0b'),
            '0'..='7' => {
                let mut code = esc.to_digit(8).unwrap_or(0);
                for _ in 0..2 {
                    match chars.peek().and_then(|c| c.to_digit(8)) {
                        Some(d) => {
                            code = code * 8 + d;
                            chars.next();
                        }
                        None => break,
                    }
                }
                out.push(char::from_u32(code).ok_or_else(|| "illegal Unicode character".to_string())?);
            }
            'x' | 'u' | 'U' => {
                let (len, what) = match esc {
                    'x' => (2, "\\xXX"),
                    'u' => (4, "\\uXXXX"),
                    _ => (8, "\\UXXXXXXXX"),
                };
                let mut code = 0u32;
                for _ in 0..len {
                    match chars.peek().and_then(|c| c.to_digit(16)) {
                        Some(d) => {
                            code = code * 16 + d;
                            chars.next();
                        }
                        None => return Err(format!("truncated {} escape", what)),
                    }
                }
                out.push(char::from_u32(code).ok_or_else(|| "illegal Unicode character".to_string())?);
            }
            other => {
                out.push('\\');
                out.push(other);
            }
        }
    }
    Ok(out)
}
