//! Recursive descent parser for templates
//!
//! Operator precedence, lowest first: conditional expression, `or`, `and`,
//! `not`, comparison chains, `+ -`, `~`, `* / // %`, unary `+ -`, `**`
//! (right associative), filters and tests, then the attribute, subscript
//! and call trailers of a primary expression.

use std::collections::HashMap;
use std::sync::Arc;

use core_types::{repr_str, BinOp, CmpOp, Result, TemplateError, UnaryOp, Value};

use crate::ast::*;
use crate::extension::Extension;
use crate::lexer::{describe_token, describe_token_expr, Lexer, StartState, TokenKind};
use crate::stream::TokenStream;

const STATEMENT_KEYWORDS: &[&str] = &[
    "for",
    "if",
    "block",
    "extends",
    "print",
    "macro",
    "include",
    "from",
    "import",
    "set",
    "with",
    "autoescape",
];

fn compare_op(kind: TokenKind) -> Option<CmpOp> {
    Some(match kind {
        TokenKind::Eq => CmpOp::Eq,
        TokenKind::Ne => CmpOp::Ne,
        TokenKind::Lt => CmpOp::Lt,
        TokenKind::LtEq => CmpOp::LtEq,
        TokenKind::Gt => CmpOp::Gt,
        TokenKind::GtEq => CmpOp::GtEq,
        _ => return None,
    })
}

/// Template parser. Extensions receive it to parse their own tags.
pub struct Parser<'a> {
    /// Token cursor
    pub stream: TokenStream,
    extensions: HashMap<&'static str, &'a Arc<dyn Extension>>,
    tag_stack: Vec<String>,
    end_token_stack: Vec<Vec<&'static str>>,
}

impl<'a> Parser<'a> {
    /// Create a parser over an already lexed stream
    pub fn new(stream: TokenStream, extensions: &'a [Arc<dyn Extension>]) -> Self {
        let mut tags = HashMap::new();
        for ext in extensions {
            for tag in ext.tags() {
                tags.insert(*tag, ext);
            }
        }
        Self {
            stream,
            extensions: tags,
            tag_stack: Vec::new(),
            end_token_stack: Vec::new(),
        }
    }

    /// Lex `source` and create a parser over it
    pub fn from_source(
        lexer: &Lexer,
        source: &str,
        name: Option<&str>,
        filename: Option<&str>,
        extensions: &'a [Arc<dyn Extension>],
    ) -> Result<Self> {
        let tokens = lexer.tokenize(source, name, filename)?;
        Ok(Self::new(TokenStream::new(tokens, name, filename), extensions))
    }

    /// Like [`Parser::from_source`] but starting inside an expression or a tag
    pub fn from_source_in(
        lexer: &Lexer,
        source: &str,
        state: StartState,
        extensions: &'a [Arc<dyn Extension>],
    ) -> Result<Self> {
        let tokens = lexer.tokenize_from(source, state, None, None)?;
        Ok(Self::new(TokenStream::new(tokens, None, None), extensions))
    }

    /// Syntax error at `lineno` of this template
    pub fn fail(&self, message: impl Into<String>, lineno: u32) -> TemplateError {
        self.stream.error(message, lineno)
    }

    fn fail_assertion(&self, message: impl Into<String>, lineno: u32) -> TemplateError {
        TemplateError::compile(message, lineno).with_template(self.stream.name(), self.stream.filename())
    }

    fn fail_ut_eof(&self, name: Option<&str>, end_token_stack: &[Vec<&'static str>], lineno: u32) -> TemplateError {
        let expected: Vec<String> = end_token_stack.iter().flatten().map(|e| describe_token_expr(e)).collect();
        let currently_looking = end_token_stack.last().map(|exprs| {
            exprs
                .iter()
                .map(|e| repr_str(&describe_token_expr(e)))
                .collect::<Vec<_>>()
                .join(" or ")
        });
        let mut message = vec![match name {
            None => "Unexpected end of template.".to_string(),
            Some(name) => format!("Encountered unknown tag {}.", repr_str(name)),
        }];
        if let Some(looking) = currently_looking {
            match name {
                Some(name) if expected.iter().any(|e| e == name) => message.push(format!(
                    "You probably made a nesting mistake. The parser is expecting this tag, but currently looking for {}.",
                    looking
                )),
                _ => message.push(format!("The parser was looking for the following tags: {}.", looking)),
            }
        }
        if let Some(tag) = self.tag_stack.last() {
            message.push(format!(
                "The innermost block that needs to be closed is {}.",
                repr_str(tag)
            ));
        }
        self.fail(message.join(" "), lineno)
    }

    /// Error for a tag name no statement or extension handles
    pub fn fail_unknown_tag(&self, name: &str, lineno: u32) -> TemplateError {
        self.fail_ut_eof(Some(name), &self.end_token_stack, lineno)
    }

    /// Error for a template that ends inside an open block
    pub fn fail_eof(&self, end_tokens: Option<&[&'static str]>, lineno: u32) -> TemplateError {
        let mut stack = self.end_token_stack.clone();
        if let Some(tokens) = end_tokens {
            stack.push(tokens.to_vec());
        }
        self.fail_ut_eof(None, &stack, lineno)
    }

    /// True if the current token ends a tuple
    pub fn is_tuple_end(&self, extra_end_rules: &[&str]) -> bool {
        matches!(
            self.stream.current.kind,
            TokenKind::VariableEnd | TokenKind::BlockEnd | TokenKind::RParen | TokenKind::Eof
        ) || self.stream.current.test_any(extra_end_rules)
    }

    /// Parse the whole template
    pub fn parse(mut self) -> Result<Template> {
        let body = self.subparse(None)?;
        tracing::trace!(template = ?self.stream.name(), statements = body.len(), "parsed");
        Ok(Template { body })
    }

    fn subparse(&mut self, end_tokens: Option<&[&'static str]>) -> Result<Vec<Stmt>> {
        if let Some(tokens) = end_tokens {
            self.end_token_stack.push(tokens.to_vec());
        }
        let result = self.subparse_inner(end_tokens);
        if end_tokens.is_some() {
            self.end_token_stack.pop();
        }
        result
    }

    fn subparse_inner(&mut self, end_tokens: Option<&[&'static str]>) -> Result<Vec<Stmt>> {
        let mut body = Vec::new();
        let mut data: Vec<Expr> = Vec::new();

        fn flush(body: &mut Vec<Stmt>, data: &mut Vec<Expr>) {
            if let Some(first) = data.first() {
                let lineno = first.lineno();
                body.push(Stmt::Output {
                    nodes: std::mem::take(data),
                    lineno,
                });
            }
        }

        while !self.stream.eos() {
            let token = self.stream.current.clone();
            match token.kind {
                TokenKind::Data => {
                    if !token.value.is_empty() {
                        data.push(Expr::TemplateData {
                            data: token.value,
                            lineno: token.lineno,
                        });
                    }
                    self.stream.next_token();
                }
                TokenKind::VariableBegin => {
                    self.stream.next_token();
                    data.push(self.parse_tuple(false, true, &[], false)?);
                    self.stream.expect("variable_end")?;
                }
                TokenKind::BlockBegin => {
                    flush(&mut body, &mut data);
                    self.stream.next_token();
                    if let Some(tokens) = end_tokens {
                        if self.stream.current.test_any(tokens) {
                            return Ok(body);
                        }
                    }
                    let stmts = self.parse_statement()?;
                    body.extend(stmts);
                    self.stream.expect("block_end")?;
                }
                _ => return Err(self.fail("internal parsing error", token.lineno)),
            }
        }
        flush(&mut body, &mut data);
        Ok(body)
    }

    /// Parse one statement; the stream sits on the tag name
    pub fn parse_statement(&mut self) -> Result<Vec<Stmt>> {
        let token = self.stream.current.clone();
        if token.kind != TokenKind::Name {
            return Err(self.fail("tag name expected", token.lineno));
        }
        if let Some(ext) = self.extensions.get(token.value.as_str()).copied() {
            return ext.parse(self);
        }
        let known = STATEMENT_KEYWORDS.contains(&token.value.as_str()) || token.value == "call" || token.value == "filter";
        if !known {
            return Err(self.fail_unknown_tag(&token.value, token.lineno));
        }
        self.tag_stack.push(token.value.clone());
        let result = match token.value.as_str() {
            "for" => self.parse_for(),
            "if" => self.parse_if(),
            "block" => self.parse_block(),
            "extends" => self.parse_extends(),
            "print" => self.parse_print(),
            "macro" => self.parse_macro(),
            "include" => self.parse_include(),
            "from" => self.parse_from(),
            "import" => self.parse_import(),
            "set" => self.parse_set(),
            "with" => self.parse_with(),
            "autoescape" => self.parse_autoescape(),
            "call" => self.parse_call_block(),
            _ => self.parse_filter_block(),
        };
        self.tag_stack.pop();
        result.map(|stmt| vec![stmt])
    }

    /// Parse statements until one of `end_tokens`. An optional colon and the
    /// block end are consumed first; the end token is left current unless
    /// `drop_needle` is set.
    pub fn parse_statements(&mut self, end_tokens: &[&'static str], drop_needle: bool) -> Result<Vec<Stmt>> {
        self.stream.skip_if("colon");
        self.stream.expect("block_end")?;
        let result = self.subparse(Some(end_tokens))?;
        if self.stream.current.kind == TokenKind::Eof {
            return Err(self.fail_eof(Some(end_tokens), self.stream.current.lineno));
        }
        if drop_needle {
            self.stream.next_token();
        }
        Ok(result)
    }

    fn parse_set(&mut self) -> Result<Stmt> {
        let lineno = self.stream.next_token().lineno;
        let target = self.parse_assign_target(true, false, &[], true)?;
        if self.stream.skip_if("assign") {
            let node = self.parse_tuple(false, true, &[], false)?;
            return Ok(Stmt::Assign { target, node, lineno });
        }
        let filter = self.parse_filter(None, false)?;
        let body = self.parse_statements(&["name:endset"], true)?;
        Ok(Stmt::AssignBlock {
            target,
            filter,
            body,
            lineno,
        })
    }

    fn parse_for(&mut self) -> Result<Stmt> {
        let lineno = self.stream.expect("name:for")?.lineno;
        let target = self.parse_assign_target(true, false, &["name:in"], false)?;
        self.stream.expect("name:in")?;
        let iter = self.parse_tuple(false, false, &["name:recursive"], false)?;
        let test = if self.stream.skip_if("name:if") {
            Some(self.parse_expression(true)?)
        } else {
            None
        };
        let recursive = self.stream.skip_if("name:recursive");
        let body = self.parse_statements(&["name:endfor", "name:else"], false)?;
        let else_ = if self.stream.next_token().value == "endfor" {
            Vec::new()
        } else {
            self.parse_statements(&["name:endfor"], true)?
        };
        Ok(Stmt::For {
            target,
            iter,
            body,
            else_,
            test,
            recursive,
            lineno,
        })
    }

    fn parse_if(&mut self) -> Result<Stmt> {
        let lineno = self.stream.expect("name:if")?.lineno;
        let test = self.parse_tuple(false, false, &[], false)?;
        let body = self.parse_statements(&["name:elif", "name:else", "name:endif"], false)?;
        let mut node = If {
            test,
            body,
            elif_: Vec::new(),
            else_: Vec::new(),
            lineno,
        };
        loop {
            let token = self.stream.next_token();
            if token.test("name:elif") {
                let test = self.parse_tuple(false, false, &[], false)?;
                let body = self.parse_statements(&["name:elif", "name:else", "name:endif"], false)?;
                node.elif_.push(If {
                    test,
                    body,
                    elif_: Vec::new(),
                    else_: Vec::new(),
                    lineno: token.lineno,
                });
                continue;
            }
            if token.test("name:else") {
                node.else_ = self.parse_statements(&["name:endif"], true)?;
            }
            break;
        }
        Ok(Stmt::If(node))
    }

    fn parse_with(&mut self) -> Result<Stmt> {
        let lineno = self.stream.next_token().lineno;
        let mut targets = Vec::new();
        let mut values = Vec::new();
        while self.stream.current.kind != TokenKind::BlockEnd {
            if !targets.is_empty() {
                self.stream.expect("comma")?;
            }
            let mut target = self.parse_assign_target(true, false, &[], false)?;
            target.set_ctx(NameCtx::Param);
            targets.push(target);
            self.stream.expect("assign")?;
            values.push(self.parse_expression(true)?);
        }
        let body = self.parse_statements(&["name:endwith"], true)?;
        Ok(Stmt::With {
            targets,
            values,
            body,
            lineno,
        })
    }

    fn parse_autoescape(&mut self) -> Result<Stmt> {
        let lineno = self.stream.next_token().lineno;
        let options = vec![Keyword {
            key: "autoescape".to_string(),
            value: self.parse_expression(true)?,
        }];
        let body = self.parse_statements(&["name:endautoescape"], true)?;
        Ok(Stmt::Scope {
            body: vec![Stmt::ScopedEvalContextModifier { options, body, lineno }],
            lineno,
        })
    }

    fn parse_block(&mut self) -> Result<Stmt> {
        let lineno = self.stream.next_token().lineno;
        let name = self.stream.expect("name")?.value;
        let scoped = self.stream.skip_if("name:scoped");
        let required = self.stream.skip_if("name:required");

        // `{% block foo-bar %}` lexes as a subtraction; reject it with a
        // message pointing at the real problem.
        if self.stream.current.kind == TokenKind::Sub {
            return Err(self.fail(
                "Block names have to be valid identifiers and may not contain hyphens, use an underscore instead.",
                self.stream.current.lineno,
            ));
        }

        let body = self.parse_statements(&["name:endblock"], true)?;

        if required {
            let only_whitespace = body.iter().all(|stmt| match stmt {
                Stmt::Output { nodes, .. } => nodes.iter().all(|node| {
                    matches!(node, Expr::TemplateData { data, .. } if data.chars().all(char::is_whitespace))
                }),
                _ => false,
            });
            if !only_whitespace {
                return Err(self.fail(
                    "Required blocks can only contain comments or whitespace",
                    self.stream.current.lineno,
                ));
            }
        }

        self.stream.skip_if(&format!("name:{}", name));
        Ok(Stmt::Block {
            name,
            body,
            scoped,
            required,
            lineno,
        })
    }

    fn parse_extends(&mut self) -> Result<Stmt> {
        let lineno = self.stream.next_token().lineno;
        let template = self.parse_expression(true)?;
        Ok(Stmt::Extends { template, lineno })
    }

    fn parse_import_context(&mut self, default: bool) -> bool {
        if self.stream.current.test_any(&["name:with", "name:without"]) && self.stream.look().test("name:context") {
            let with_context = self.stream.next_token().value == "with";
            self.stream.skip(1);
            return with_context;
        }
        default
    }

    fn parse_include(&mut self) -> Result<Stmt> {
        let lineno = self.stream.next_token().lineno;
        let template = self.parse_expression(true)?;
        let ignore_missing = if self.stream.current.test("name:ignore") && self.stream.look().test("name:missing") {
            self.stream.skip(2);
            true
        } else {
            false
        };
        let with_context = self.parse_import_context(true);
        Ok(Stmt::Include {
            template,
            with_context,
            ignore_missing,
            lineno,
        })
    }

    fn parse_import(&mut self) -> Result<Stmt> {
        let lineno = self.stream.next_token().lineno;
        let template = self.parse_expression(true)?;
        self.stream.expect("name:as")?;
        let target = self.parse_name_target()?;
        let with_context = self.parse_import_context(false);
        Ok(Stmt::Import {
            template,
            target,
            with_context,
            lineno,
        })
    }

    fn parse_from(&mut self) -> Result<Stmt> {
        let lineno = self.stream.next_token().lineno;
        let template = self.parse_expression(true)?;
        self.stream.expect("name:import")?;
        let mut names: Vec<(String, Option<String>)> = Vec::new();
        let mut with_context = None;

        loop {
            if !names.is_empty() {
                self.stream.expect("comma")?;
            }
            if self.stream.current.kind != TokenKind::Name {
                self.stream.expect("name")?;
                continue;
            }
            if let Some(ctx) = self.parse_from_context() {
                with_context = Some(ctx);
                break;
            }
            let target_line = self.stream.current.lineno;
            let target = self.parse_name_target()?;
            if target.starts_with('_') {
                return Err(self.fail_assertion("names starting with an underline can not be imported", target_line));
            }
            if self.stream.skip_if("name:as") {
                let alias = self.parse_name_target()?;
                names.push((target, Some(alias)));
            } else {
                names.push((target, None));
            }
            if let Some(ctx) = self.parse_from_context() {
                with_context = Some(ctx);
                break;
            }
            if self.stream.current.kind != TokenKind::Comma {
                break;
            }
        }

        Ok(Stmt::FromImport {
            template,
            names,
            with_context: with_context.unwrap_or(false),
            lineno,
        })
    }

    fn parse_from_context(&mut self) -> Option<bool> {
        if (self.stream.current.value == "with" || self.stream.current.value == "without")
            && self.stream.look().test("name:context")
        {
            let with_context = self.stream.next_token().value == "with";
            self.stream.skip(1);
            return Some(with_context);
        }
        None
    }

    /// Parse `(a, b=default, ...)`
    pub fn parse_signature(&mut self) -> Result<(Vec<String>, Vec<Expr>)> {
        let mut args = Vec::new();
        let mut defaults = Vec::new();
        self.stream.expect("lparen")?;
        while self.stream.current.kind != TokenKind::RParen {
            if !args.is_empty() {
                self.stream.expect("comma")?;
            }
            let arg = self.parse_name_target()?;
            if self.stream.skip_if("assign") {
                defaults.push(self.parse_expression(true)?);
            } else if !defaults.is_empty() {
                return Err(self.fail("non-default argument follows default argument", self.stream.current.lineno));
            }
            args.push(arg);
        }
        self.stream.expect("rparen")?;
        Ok((args, defaults))
    }

    fn parse_call_block(&mut self) -> Result<Stmt> {
        let lineno = self.stream.next_token().lineno;
        let (args, defaults) = if self.stream.current.kind == TokenKind::LParen {
            self.parse_signature()?
        } else {
            (Vec::new(), Vec::new())
        };
        let call = self.parse_expression(true)?;
        if !matches!(call, Expr::Call { .. }) {
            return Err(self.fail("expected call", lineno));
        }
        let body = self.parse_statements(&["name:endcall"], true)?;
        Ok(Stmt::CallBlock {
            call,
            args,
            defaults,
            body,
            lineno,
        })
    }

    fn parse_filter_block(&mut self) -> Result<Stmt> {
        let lineno = self.stream.next_token().lineno;
        let filter = match self.parse_filter(None, true)? {
            Some(filter) => filter,
            None => return Err(self.fail("expected filter", lineno)),
        };
        let body = self.parse_statements(&["name:endfilter"], true)?;
        Ok(Stmt::FilterBlock { filter, body, lineno })
    }

    fn parse_macro(&mut self) -> Result<Stmt> {
        let lineno = self.stream.next_token().lineno;
        let name = self.parse_name_target()?;
        let (args, defaults) = self.parse_signature()?;
        let body = self.parse_statements(&["name:endmacro"], true)?;
        Ok(Stmt::Macro {
            name,
            args,
            defaults,
            body,
            lineno,
        })
    }

    fn parse_print(&mut self) -> Result<Stmt> {
        let lineno = self.stream.next_token().lineno;
        let mut nodes = Vec::new();
        while self.stream.current.kind != TokenKind::BlockEnd {
            if !nodes.is_empty() {
                self.stream.expect("comma")?;
            }
            nodes.push(self.parse_expression(true)?);
        }
        Ok(Stmt::Output { nodes, lineno })
    }

    fn parse_name_target(&mut self) -> Result<String> {
        match self.parse_assign_target(false, true, &[], false)? {
            Expr::Name { name, .. } => Ok(name),
            other => Err(self.fail("expected name", other.lineno())),
        }
    }

    /// Parse an assignment target: a name, a tuple of names, or with
    /// `with_namespace` a namespace attribute (`ns.attr`)
    pub fn parse_assign_target(
        &mut self,
        with_tuple: bool,
        name_only: bool,
        extra_end_rules: &[&str],
        with_namespace: bool,
    ) -> Result<Expr> {
        let mut target = if name_only {
            let token = self.stream.expect("name")?;
            Expr::Name {
                name: token.value,
                ctx: NameCtx::Store,
                lineno: token.lineno,
            }
        } else if with_namespace && self.stream.look().test("dot") {
            let token = self.stream.expect("name")?;
            self.stream.next_token();
            let attr = self.stream.expect("name")?;
            Expr::NSRef {
                name: token.value,
                attr: attr.value,
                lineno: token.lineno,
            }
        } else if with_tuple {
            self.parse_tuple(true, true, extra_end_rules, false)?
        } else {
            self.parse_primary()?
        };
        target.set_ctx(NameCtx::Store);
        if !target.can_assign() {
            let kind = target.type_name().to_lowercase();
            return Err(self.fail(format!("can't assign to {}", repr_str(&kind)), target.lineno()));
        }
        Ok(target)
    }

    /// Parse an expression; conditional expressions only with `with_condexpr`
    pub fn parse_expression(&mut self, with_condexpr: bool) -> Result<Expr> {
        if with_condexpr {
            self.parse_condexpr()
        } else {
            self.parse_or()
        }
    }

    fn parse_condexpr(&mut self) -> Result<Expr> {
        let lineno = self.stream.current.lineno;
        let mut expr1 = self.parse_or()?;
        while self.stream.skip_if("name:if") {
            let test = self.parse_or()?;
            let expr2 = if self.stream.skip_if("name:else") {
                Some(Box::new(self.parse_condexpr()?))
            } else {
                None
            };
            expr1 = Expr::CondExpr {
                test: Box::new(test),
                expr1: Box::new(expr1),
                expr2,
                lineno,
            };
        }
        Ok(expr1)
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let lineno = self.stream.current.lineno;
        let mut left = self.parse_and()?;
        while self.stream.skip_if("name:or") {
            let right = self.parse_and()?;
            left = Expr::Or {
                left: Box::new(left),
                right: Box::new(right),
                lineno,
            };
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let lineno = self.stream.current.lineno;
        let mut left = self.parse_not()?;
        while self.stream.skip_if("name:and") {
            let right = self.parse_not()?;
            left = Expr::And {
                left: Box::new(left),
                right: Box::new(right),
                lineno,
            };
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr> {
        if self.stream.current.test("name:not") {
            let lineno = self.stream.next_token().lineno;
            let node = self.parse_not()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                node: Box::new(node),
                lineno,
            });
        }
        self.parse_compare()
    }

    fn parse_compare(&mut self) -> Result<Expr> {
        let lineno = self.stream.current.lineno;
        let expr = self.parse_math1()?;
        let mut ops = Vec::new();
        loop {
            if let Some(op) = compare_op(self.stream.current.kind) {
                self.stream.next_token();
                ops.push(Operand {
                    op,
                    expr: self.parse_math1()?,
                });
            } else if self.stream.skip_if("name:in") {
                ops.push(Operand {
                    op: CmpOp::In,
                    expr: self.parse_math1()?,
                });
            } else if self.stream.current.test("name:not") && self.stream.look().test("name:in") {
                self.stream.skip(2);
                ops.push(Operand {
                    op: CmpOp::NotIn,
                    expr: self.parse_math1()?,
                });
            } else {
                break;
            }
        }
        if ops.is_empty() {
            return Ok(expr);
        }
        Ok(Expr::Compare {
            expr: Box::new(expr),
            ops,
            lineno,
        })
    }

    fn parse_math1(&mut self) -> Result<Expr> {
        let lineno = self.stream.current.lineno;
        let mut left = self.parse_concat()?;
        loop {
            let op = match self.stream.current.kind {
                TokenKind::Add => BinOp::Add,
                TokenKind::Sub => BinOp::Sub,
                _ => break,
            };
            self.stream.next_token();
            let right = self.parse_concat()?;
            left = Expr::BinOp {
                op,
                left: Box::new(left),
                right: Box::new(right),
                lineno,
            };
        }
        Ok(left)
    }

    fn parse_concat(&mut self) -> Result<Expr> {
        let lineno = self.stream.current.lineno;
        let mut nodes = vec![self.parse_math2()?];
        while self.stream.current.kind == TokenKind::Tilde {
            self.stream.next_token();
            nodes.push(self.parse_math2()?);
        }
        if nodes.len() == 1 {
            return Ok(nodes.remove(0));
        }
        Ok(Expr::Concat { nodes, lineno })
    }

    fn parse_math2(&mut self) -> Result<Expr> {
        let lineno = self.stream.current.lineno;
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.stream.current.kind {
                TokenKind::Mul => BinOp::Mul,
                TokenKind::Div => BinOp::Div,
                TokenKind::FloorDiv => BinOp::FloorDiv,
                TokenKind::Mod => BinOp::Mod,
                _ => break,
            };
            self.stream.next_token();
            let right = self.parse_unary()?;
            left = Expr::BinOp {
                op,
                left: Box::new(left),
                right: Box::new(right),
                lineno,
            };
        }
        Ok(left)
    }

    /// Unary `-`/`+` bind looser than `**`: `-2 ** 2` is `-(2 ** 2)`
    pub fn parse_unary(&mut self) -> Result<Expr> {
        let lineno = self.stream.current.lineno;
        let op = match self.stream.current.kind {
            TokenKind::Sub => UnaryOp::Neg,
            TokenKind::Add => UnaryOp::Pos,
            _ => return self.parse_pow(),
        };
        self.stream.next_token();
        let node = self.parse_unary()?;
        Ok(Expr::Unary {
            op,
            node: Box::new(node),
            lineno,
        })
    }

    fn parse_pow(&mut self) -> Result<Expr> {
        let lineno = self.stream.current.lineno;
        let primary = self.parse_primary()?;
        let postfix = self.parse_postfix(primary)?;
        let left = self.parse_filter_expr(postfix)?;
        if self.stream.current.kind != TokenKind::Pow {
            return Ok(left);
        }
        self.stream.next_token();
        let right = self.parse_unary()?;
        Ok(Expr::BinOp {
            op: BinOp::Pow,
            left: Box::new(left),
            right: Box::new(right),
            lineno,
        })
    }

    /// Parse a literal, a name, or a parenthesized, list or dict expression
    pub fn parse_primary(&mut self) -> Result<Expr> {
        let token = self.stream.current.clone();
        let lineno = token.lineno;
        match token.kind {
            TokenKind::Name => {
                self.stream.next_token();
                Ok(match token.value.as_str() {
                    "true" | "True" => Expr::constant(true, lineno),
                    "false" | "False" => Expr::constant(false, lineno),
                    "none" | "None" => Expr::constant(Value::None, lineno),
                    _ => Expr::name(token.value, lineno),
                })
            }
            TokenKind::String => {
                self.stream.next_token();
                let mut buf = token.value;
                while self.stream.current.kind == TokenKind::String {
                    buf.push_str(&self.stream.next_token().value);
                }
                Ok(Expr::constant(buf, lineno))
            }
            TokenKind::Integer => {
                self.stream.next_token();
                let value: i64 = token
                    .value
                    .parse()
                    .map_err(|_| self.fail(format!("invalid integer {}", repr_str(&token.value)), lineno))?;
                Ok(Expr::constant(value, lineno))
            }
            TokenKind::Float => {
                self.stream.next_token();
                let value: f64 = token
                    .value
                    .parse()
                    .map_err(|_| self.fail(format!("invalid float {}", repr_str(&token.value)), lineno))?;
                Ok(Expr::constant(value, lineno))
            }
            TokenKind::LParen => {
                self.stream.next_token();
                let node = self.parse_tuple(false, true, &[], true)?;
                self.stream.expect("rparen")?;
                Ok(node)
            }
            TokenKind::LBracket => self.parse_list(),
            TokenKind::LBrace => self.parse_dict(),
            _ => Err(self.fail(format!("unexpected {}", repr_str(&describe_token(&token))), lineno)),
        }
    }

    /// Parse comma separated expressions. Without commas the single
    /// expression is returned as is; `1,` is a one element tuple and `()`
    /// only parses with `explicit_parentheses`.
    pub fn parse_tuple(
        &mut self,
        simplified: bool,
        with_condexpr: bool,
        extra_end_rules: &[&str],
        explicit_parentheses: bool,
    ) -> Result<Expr> {
        let mut lineno = self.stream.current.lineno;
        let mut args = Vec::new();
        let mut is_tuple = false;

        loop {
            if !args.is_empty() {
                self.stream.expect("comma")?;
            }
            if self.is_tuple_end(extra_end_rules) {
                break;
            }
            let item = if simplified {
                self.parse_primary()?
            } else {
                self.parse_expression(with_condexpr)?
            };
            args.push(item);
            if self.stream.current.kind == TokenKind::Comma {
                is_tuple = true;
            } else {
                break;
            }
            lineno = self.stream.current.lineno;
        }

        if !is_tuple {
            if let Some(item) = args.pop() {
                return Ok(item);
            }
            if !explicit_parentheses {
                return Err(self.fail(
                    format!(
                        "Expected an expression, got {}",
                        repr_str(&describe_token(&self.stream.current))
                    ),
                    self.stream.current.lineno,
                ));
            }
        }
        Ok(Expr::Tuple {
            items: args,
            ctx: NameCtx::Load,
            lineno,
        })
    }

    fn parse_list(&mut self) -> Result<Expr> {
        let token = self.stream.expect("lbracket")?;
        let mut items = Vec::new();
        while self.stream.current.kind != TokenKind::RBracket {
            if !items.is_empty() {
                self.stream.expect("comma")?;
            }
            if self.stream.current.kind == TokenKind::RBracket {
                break;
            }
            items.push(self.parse_expression(true)?);
        }
        self.stream.expect("rbracket")?;
        Ok(Expr::List {
            items,
            lineno: token.lineno,
        })
    }

    fn parse_dict(&mut self) -> Result<Expr> {
        let token = self.stream.expect("lbrace")?;
        let mut items = Vec::new();
        while self.stream.current.kind != TokenKind::RBrace {
            if !items.is_empty() {
                self.stream.expect("comma")?;
            }
            if self.stream.current.kind == TokenKind::RBrace {
                break;
            }
            let key = self.parse_expression(true)?;
            self.stream.expect("colon")?;
            let value = self.parse_expression(true)?;
            items.push(Pair { key, value });
        }
        self.stream.expect("rbrace")?;
        Ok(Expr::Dict {
            items,
            lineno: token.lineno,
        })
    }

    fn parse_postfix(&mut self, mut node: Expr) -> Result<Expr> {
        loop {
            node = match self.stream.current.kind {
                TokenKind::Dot | TokenKind::LBracket => self.parse_subscript(node)?,
                TokenKind::LParen => self.parse_call(node)?,
                _ => return Ok(node),
            };
        }
    }

    fn parse_filter_expr(&mut self, mut node: Expr) -> Result<Expr> {
        loop {
            node = match self.stream.current.kind {
                TokenKind::Pipe => match self.parse_filter(Some(node), false)? {
                    Some(filtered) => filtered,
                    None => return Err(self.fail("expected filter", self.stream.current.lineno)),
                },
                TokenKind::Name if self.stream.current.value == "is" => self.parse_test(node)?,
                TokenKind::LParen => self.parse_call(node)?,
                _ => return Ok(node),
            };
        }
    }

    fn parse_subscript(&mut self, node: Expr) -> Result<Expr> {
        let token = self.stream.next_token();
        let lineno = token.lineno;
        match token.kind {
            TokenKind::Dot => {
                let attr = self.stream.next_token();
                match attr.kind {
                    TokenKind::Name => Ok(Expr::Getattr {
                        node: Box::new(node),
                        attr: attr.value,
                        lineno,
                    }),
                    TokenKind::Integer => {
                        let index: i64 = attr
                            .value
                            .parse()
                            .map_err(|_| self.fail("expected name or number", attr.lineno))?;
                        Ok(Expr::Getitem {
                            node: Box::new(node),
                            arg: Box::new(Expr::constant(index, attr.lineno)),
                            lineno,
                        })
                    }
                    _ => Err(self.fail("expected name or number", attr.lineno)),
                }
            }
            TokenKind::LBracket => {
                let mut args = Vec::new();
                while self.stream.current.kind != TokenKind::RBracket {
                    if !args.is_empty() {
                        self.stream.expect("comma")?;
                    }
                    args.push(self.parse_subscribed()?);
                }
                self.stream.expect("rbracket")?;
                let arg = if args.len() == 1 {
                    args.remove(0)
                } else {
                    Expr::Tuple {
                        items: args,
                        ctx: NameCtx::Load,
                        lineno,
                    }
                };
                Ok(Expr::Getitem {
                    node: Box::new(node),
                    arg: Box::new(arg),
                    lineno,
                })
            }
            _ => Err(self.fail("expected subscript expression", lineno)),
        }
    }

    fn slice_part_ends(&self) -> bool {
        matches!(self.stream.current.kind, TokenKind::RBracket | TokenKind::Comma)
    }

    fn parse_subscribed(&mut self) -> Result<Expr> {
        let lineno = self.stream.current.lineno;
        let start = if self.stream.current.kind == TokenKind::Colon {
            self.stream.next_token();
            None
        } else {
            let node = self.parse_expression(true)?;
            if self.stream.current.kind != TokenKind::Colon {
                return Ok(node);
            }
            self.stream.next_token();
            Some(Box::new(node))
        };

        let stop = if self.stream.current.kind == TokenKind::Colon || self.slice_part_ends() {
            None
        } else {
            Some(Box::new(self.parse_expression(true)?))
        };

        let step = if self.stream.current.kind == TokenKind::Colon {
            self.stream.next_token();
            if self.slice_part_ends() {
                None
            } else {
                Some(Box::new(self.parse_expression(true)?))
            }
        } else {
            None
        };

        Ok(Expr::Slice {
            start,
            stop,
            step,
            lineno,
        })
    }

    /// Parse a parenthesized argument list
    pub fn parse_call_args(&mut self) -> Result<CallArgs> {
        let token = self.stream.expect("lparen")?;
        let mut args = CallArgs::default();
        let mut require_comma = false;

        while self.stream.current.kind != TokenKind::RParen {
            if require_comma {
                self.stream.expect("comma")?;
                if self.stream.current.kind == TokenKind::RParen {
                    break;
                }
            }
            let kind = self.stream.current.kind;
            let valid = match kind {
                TokenKind::Mul => {
                    let ok = args.dyn_args.is_none() && args.dyn_kwargs.is_none();
                    self.stream.next_token();
                    args.dyn_args = Some(Box::new(self.parse_expression(true)?));
                    ok
                }
                TokenKind::Pow => {
                    let ok = args.dyn_kwargs.is_none();
                    self.stream.next_token();
                    args.dyn_kwargs = Some(Box::new(self.parse_expression(true)?));
                    ok
                }
                TokenKind::Name if self.stream.look().kind == TokenKind::Assign => {
                    let ok = args.dyn_kwargs.is_none();
                    let key = self.stream.current.value.clone();
                    self.stream.skip(2);
                    let value = self.parse_expression(true)?;
                    args.kwargs.push(Keyword { key, value });
                    ok
                }
                _ => {
                    let ok = args.dyn_args.is_none() && args.dyn_kwargs.is_none() && args.kwargs.is_empty();
                    args.args.push(self.parse_expression(true)?);
                    ok
                }
            };
            if !valid {
                return Err(self.fail("invalid syntax for function call expression", token.lineno));
            }
            require_comma = true;
        }
        self.stream.expect("rparen")?;
        Ok(args)
    }

    fn parse_call(&mut self, node: Expr) -> Result<Expr> {
        let lineno = self.stream.current.lineno;
        let args = self.parse_call_args()?;
        Ok(Expr::Call {
            node: Box::new(node),
            args,
            lineno,
        })
    }

    fn parse_dotted_name(&mut self) -> Result<(String, u32)> {
        let token = self.stream.expect("name")?;
        let mut name = token.value;
        while self.stream.current.kind == TokenKind::Dot {
            self.stream.next_token();
            name.push('.');
            name.push_str(&self.stream.expect("name")?.value);
        }
        Ok((name, token.lineno))
    }

    /// Parse a filter chain. With `start_inline` the first filter has no
    /// leading pipe (`{% filter upper %}`).
    pub fn parse_filter(&mut self, mut node: Option<Expr>, mut start_inline: bool) -> Result<Option<Expr>> {
        while self.stream.current.kind == TokenKind::Pipe || start_inline {
            if !start_inline {
                self.stream.next_token();
            }
            let (name, lineno) = self.parse_dotted_name()?;
            let args = if self.stream.current.kind == TokenKind::LParen {
                self.parse_call_args()?
            } else {
                CallArgs::default()
            };
            node = Some(Expr::Filter {
                node: node.map(Box::new),
                name,
                args,
                lineno,
            });
            start_inline = false;
        }
        Ok(node)
    }

    fn parse_test(&mut self, node: Expr) -> Result<Expr> {
        let token = self.stream.next_token();
        let negated = self.stream.skip_if("name:not");
        let (name, _) = self.parse_dotted_name()?;
        let current = self.stream.current.clone();
        let args = if current.kind == TokenKind::LParen {
            self.parse_call_args()?
        } else if matches!(
            current.kind,
            TokenKind::Name
                | TokenKind::String
                | TokenKind::Integer
                | TokenKind::Float
                | TokenKind::LBracket
                | TokenKind::LBrace
        ) && !current.test_any(&["name:else", "name:or", "name:and"])
        {
            if current.test("name:is") {
                return Err(self.fail("You cannot chain multiple tests with is", current.lineno));
            }
            let primary = self.parse_primary()?;
            let arg = self.parse_postfix(primary)?;
            CallArgs {
                args: vec![arg],
                ..CallArgs::default()
            }
        } else {
            CallArgs::default()
        };
        let test = Expr::Test {
            node: Box::new(node),
            name,
            args,
            lineno: token.lineno,
        };
        if negated {
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                node: Box::new(test),
                lineno: token.lineno,
            });
        }
        Ok(test)
    }
}

/// Parse a template source with the given lexer
pub fn parse(lexer: &Lexer, source: &str, name: Option<&str>, filename: Option<&str>) -> Result<Template> {
    Parser::from_source(lexer, source, name, filename, &[])?.parse()
}
