//! Rule language: lexer, parser and per-rule matching.
//!
//! The accepted language is a small Cedar-like subset:
//!
//! ```text
//! rule      := effect "(" principal "," action "," resource ")" clause* ";"
//! effect    := "permit" | "forbid"
//! principal := "principal" [ "==" entity ]
//! action    := "action" [ "==" entity | "in" "[" entity ("," entity)* "]" ]
//! resource  := "resource" [ "==" entity | "like" string ]
//! clause    := ("when" | "unless") "{" cmp ("&&" cmp)* "}"
//! cmp       := operand ("==" | "!=" | "like") operand
//! operand   := string | ("request" | "context") "." ident | "resource"
//! entity    := ident "::" string
//! ```
//!
//! `//` starts a comment that runs to the end of the line. One source text
//! may hold several rules; a rule that fails to parse does not affect its
//! neighbours.

use tollgate_contracts::{error::TollgateError, request::RequestContext};

/// Whether a matching rule allows or forbids the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    Permit,
    Forbid,
}

/// Constraint on the request's action type.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionConstraint {
    Any,
    Eq(String),
    In(Vec<String>),
}

/// Constraint on the request target.
#[derive(Debug, Clone)]
pub enum ResourceConstraint {
    Any,
    Eq(String),
    Like(glob::Pattern),
}

/// One side of a comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Literal(String),
    /// `request.<name>` or `context.<name>`.
    Attribute(String),
    /// The request target.
    Resource,
}

#[derive(Debug, Clone)]
pub enum Comparison {
    Eq(Operand, Operand),
    Ne(Operand, Operand),
    Like(Operand, glob::Pattern),
}

/// A compiled rule.
#[derive(Debug, Clone)]
pub struct Rule {
    /// `<policy id>` for the first rule of a policy, `<policy id>#n` after.
    pub id: String,
    pub policy_id: String,
    pub effect: Effect,
    /// `principal == Type::"id"`, matched against the `principal` attribute.
    pub principal: Option<String>,
    pub action: ActionConstraint,
    pub resource: ResourceConstraint,
    pub when: Vec<Vec<Comparison>>,
    pub unless: Vec<Vec<Comparison>>,
}

impl Rule {
    /// True if scope and every clause match `ctx`.
    ///
    /// A comparison against an attribute the request does not carry never
    /// holds, for `==` and `!=` alike.
    pub fn matches(&self, ctx: &RequestContext) -> bool {
        if let Some(principal) = &self.principal {
            if ctx.attribute("principal") != Some(principal.as_str()) {
                return false;
            }
        }

        let action = ctx.action_type.as_str();
        let action_ok = match &self.action {
            ActionConstraint::Any => true,
            ActionConstraint::Eq(kind) => kind == action,
            ActionConstraint::In(kinds) => kinds.iter().any(|k| k == action),
        };
        if !action_ok {
            return false;
        }

        let resource_ok = match &self.resource {
            ResourceConstraint::Any => true,
            ResourceConstraint::Eq(target) => *target == ctx.target,
            ResourceConstraint::Like(pattern) => pattern.matches(&ctx.target),
        };
        if !resource_ok {
            return false;
        }

        self.when.iter().all(|clause| clause_holds(clause, ctx))
            && !self.unless.iter().any(|clause| clause_holds(clause, ctx))
    }
}

fn clause_holds(clause: &[Comparison], ctx: &RequestContext) -> bool {
    clause.iter().all(|cmp| match cmp {
        Comparison::Eq(l, r) => matches!((resolve(l, ctx), resolve(r, ctx)), (Some(a), Some(b)) if a == b),
        Comparison::Ne(l, r) => matches!((resolve(l, ctx), resolve(r, ctx)), (Some(a), Some(b)) if a != b),
        Comparison::Like(l, pattern) => resolve(l, ctx).is_some_and(|v| pattern.matches(v)),
    })
}

fn resolve<'a>(operand: &'a Operand, ctx: &'a RequestContext) -> Option<&'a str> {
    match operand {
        Operand::Literal(s) => Some(s.as_str()),
        Operand::Attribute(name) => ctx.attribute(name),
        Operand::Resource => Some(ctx.target.as_str()),
    }
}

// ── Lexer ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Semi,
    Dot,
    PathSep,
    EqEq,
    NotEq,
    AndAnd,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Ident(s) => format!("'{}'", s),
            Token::Str(s) => format!("\"{}\"", s),
            Token::LParen => "'('".into(),
            Token::RParen => "')'".into(),
            Token::LBrace => "'{'".into(),
            Token::RBrace => "'}'".into(),
            Token::LBracket => "'['".into(),
            Token::RBracket => "']'".into(),
            Token::Comma => "','".into(),
            Token::Semi => "';'".into(),
            Token::Dot => "'.'".into(),
            Token::PathSep => "'::'".into(),
            Token::EqEq => "'=='".into(),
            Token::NotEq => "'!='".into(),
            Token::AndAnd => "'&&'".into(),
        }
    }
}

fn tokenize(src: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = src.char_indices().peekable();

    while let Some((pos, c)) = chars.next() {
        let two = |chars: &mut std::iter::Peekable<std::str::CharIndices>, expect: char| {
            matches!(chars.peek(), Some((_, n)) if *n == expect) && chars.next().is_some()
        };
        match c {
            c if c.is_whitespace() => {}
            '/' if two(&mut chars, '/') => {
                for (_, n) in chars.by_ref() {
                    if n == '\n' {
                        break;
                    }
                }
            }
            '(' => tokens.push(Token::LParen),
            ')' => tokens.push(Token::RParen),
            '{' => tokens.push(Token::LBrace),
            '}' => tokens.push(Token::RBrace),
            '[' => tokens.push(Token::LBracket),
            ']' => tokens.push(Token::RBracket),
            ',' => tokens.push(Token::Comma),
            ';' => tokens.push(Token::Semi),
            '.' => tokens.push(Token::Dot),
            ':' if two(&mut chars, ':') => tokens.push(Token::PathSep),
            '=' if two(&mut chars, '=') => tokens.push(Token::EqEq),
            '!' if two(&mut chars, '=') => tokens.push(Token::NotEq),
            '&' if two(&mut chars, '&') => tokens.push(Token::AndAnd),
            '"' => {
                let mut value = String::new();
                let mut closed = false;
                while let Some((_, n)) = chars.next() {
                    match n {
                        '"' => {
                            closed = true;
                            break;
                        }
                        '\\' => match chars.next() {
                            Some((_, e @ ('"' | '\\'))) => value.push(e),
                            Some((_, 'n')) => value.push('\n'),
                            Some((_, 't')) => value.push('\t'),
                            Some((at, e)) => return Err(format!("unknown escape '\\{}' at offset {}", e, at)),
                            None => break,
                        },
                        other => value.push(other),
                    }
                }
                if !closed {
                    return Err(format!("unterminated string starting at offset {}", pos));
                }
                tokens.push(Token::Str(value));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut ident = String::from(c);
                while let Some((_, n)) = chars.peek() {
                    if n.is_ascii_alphanumeric() || *n == '_' {
                        ident.push(*n);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(ident));
            }
            other => return Err(format!("unexpected character '{}' at offset {}", other, pos)),
        }
    }
    Ok(tokens)
}

// ── Parser ───────────────────────────────────────────────────────────────────

struct Parser<'t> {
    tokens: &'t [Token],
    pos: usize,
}

impl<'t> Parser<'t> {
    fn new(tokens: &'t [Token]) -> Self {
        Self { tokens, pos: 0 }
    }

    fn peek(&self) -> Option<&'t Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Result<&'t Token, String> {
        let token = self.tokens.get(self.pos).ok_or("unexpected end of rule")?;
        self.pos += 1;
        Ok(token)
    }

    fn expect(&mut self, want: &Token) -> Result<(), String> {
        let got = self.next()?;
        if got == want {
            Ok(())
        } else {
            Err(format!("expected {}, found {}", want.describe(), got.describe()))
        }
    }

    fn keyword(&mut self, word: &str) -> Result<(), String> {
        match self.next()? {
            Token::Ident(s) if s == word => Ok(()),
            other => Err(format!("expected '{}', found {}", word, other.describe())),
        }
    }

    fn eat(&mut self, want: &Token) -> bool {
        if self.peek() == Some(want) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, word: &str) -> bool {
        if matches!(self.peek(), Some(Token::Ident(s)) if s == word) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn string(&mut self) -> Result<String, String> {
        match self.next()? {
            Token::Str(s) => Ok(s.clone()),
            other => Err(format!("expected string literal, found {}", other.describe())),
        }
    }

    /// `Type::"id"`, returning the id.
    fn entity(&mut self) -> Result<String, String> {
        match self.next()? {
            Token::Ident(_) => {}
            other => return Err(format!("expected entity type, found {}", other.describe())),
        }
        self.expect(&Token::PathSep)?;
        self.string()
    }

    fn pattern(&mut self) -> Result<glob::Pattern, String> {
        let raw = self.string()?;
        glob::Pattern::new(&raw).map_err(|e| format!("invalid pattern \"{}\": {}", raw, e))
    }

    fn rule(&mut self, id: String, policy_id: &str) -> Result<Rule, String> {
        let effect = match self.next()? {
            Token::Ident(s) if s == "permit" => Effect::Permit,
            Token::Ident(s) if s == "forbid" => Effect::Forbid,
            other => return Err(format!("expected 'permit' or 'forbid', found {}", other.describe())),
        };

        self.expect(&Token::LParen)?;

        self.keyword("principal")?;
        let principal = if self.eat(&Token::EqEq) { Some(self.entity()?) } else { None };
        self.expect(&Token::Comma)?;

        self.keyword("action")?;
        let action = if self.eat(&Token::EqEq) {
            ActionConstraint::Eq(self.entity()?)
        } else if self.eat_keyword("in") {
            self.expect(&Token::LBracket)?;
            let mut kinds = vec![self.entity()?];
            while self.eat(&Token::Comma) {
                kinds.push(self.entity()?);
            }
            self.expect(&Token::RBracket)?;
            ActionConstraint::In(kinds)
        } else {
            ActionConstraint::Any
        };
        self.expect(&Token::Comma)?;

        self.keyword("resource")?;
        let resource = if self.eat(&Token::EqEq) {
            ResourceConstraint::Eq(self.entity()?)
        } else if self.eat_keyword("like") {
            ResourceConstraint::Like(self.pattern()?)
        } else {
            ResourceConstraint::Any
        };
        self.expect(&Token::RParen)?;

        let mut when = Vec::new();
        let mut unless = Vec::new();
        loop {
            if self.eat_keyword("when") {
                when.push(self.clause()?);
            } else if self.eat_keyword("unless") {
                unless.push(self.clause()?);
            } else {
                break;
            }
        }

        self.expect(&Token::Semi)?;

        Ok(Rule {
            id,
            policy_id: policy_id.to_string(),
            effect,
            principal,
            action,
            resource,
            when,
            unless,
        })
    }

    fn clause(&mut self) -> Result<Vec<Comparison>, String> {
        self.expect(&Token::LBrace)?;
        let mut comparisons = vec![self.comparison()?];
        while self.eat(&Token::AndAnd) {
            comparisons.push(self.comparison()?);
        }
        self.expect(&Token::RBrace)?;
        Ok(comparisons)
    }

    fn comparison(&mut self) -> Result<Comparison, String> {
        let left = self.operand()?;
        if self.eat(&Token::EqEq) {
            Ok(Comparison::Eq(left, self.operand()?))
        } else if self.eat(&Token::NotEq) {
            Ok(Comparison::Ne(left, self.operand()?))
        } else if self.eat_keyword("like") {
            Ok(Comparison::Like(left, self.pattern()?))
        } else {
            match self.peek() {
                Some(t) => Err(format!("expected '==', '!=' or 'like', found {}", t.describe())),
                None => Err("unexpected end of rule".to_string()),
            }
        }
    }

    fn operand(&mut self) -> Result<Operand, String> {
        match self.next()? {
            Token::Str(s) => Ok(Operand::Literal(s.clone())),
            Token::Ident(s) if s == "resource" => Ok(Operand::Resource),
            Token::Ident(s) if s == "request" || s == "context" => {
                self.expect(&Token::Dot)?;
                match self.next()? {
                    Token::Ident(name) => Ok(Operand::Attribute(name.clone())),
                    other => Err(format!("expected attribute name, found {}", other.describe())),
                }
            }
            other => Err(format!("expected operand, found {}", other.describe())),
        }
    }
}

/// Parse every rule in `source`.
///
/// Returns one entry per `;`-terminated statement, in source order. A lex
/// failure poisons the whole source and yields a single error.
pub fn parse_rules(policy_id: &str, source: &str) -> Vec<Result<Rule, TollgateError>> {
    let compile_err = |reason: String| TollgateError::Compile {
        policy_id: policy_id.to_string(),
        reason,
    };

    let tokens = match tokenize(source) {
        Ok(tokens) => tokens,
        Err(reason) => return vec![Err(compile_err(reason))],
    };
    if tokens.is_empty() {
        return vec![Err(compile_err("policy contains no rules".to_string()))];
    }

    // Trailing tokens with no terminating ';' still form a (broken) statement.
    tokens
        .split_inclusive(|t| *t == Token::Semi)
        .enumerate()
        .map(|(n, statement)| {
            let id = if n == 0 {
                policy_id.to_string()
            } else {
                format!("{}#{}", policy_id, n + 1)
            };
            let mut parser = Parser::new(statement);
            let rule = parser.rule(id, policy_id).map_err(compile_err)?;
            if parser.pos != statement.len() {
                return Err(compile_err("unexpected tokens after ';'".to_string()));
            }
            Ok(rule)
        })
        .collect()
}
