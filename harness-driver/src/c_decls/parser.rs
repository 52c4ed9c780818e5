// Copyright Kani Contributors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Recursive descent parser for the subset of C used by fixtures.
//!
//! Top-level items are parsed eagerly, and an item that cannot be parsed is skipped up to the
//! next `;` or balanced `}` and recorded in [`TranslationUnit::skipped`]. Function bodies are
//! kept as tokens and only parsed by [`parse_function_body`] when something evaluates them.

use super::ParseError;
use super::ast::*;
use super::lexer::{Token, TokenKind, tokenize};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Typedef names available without any include, with their size and signedness.
const BUILTIN_TYPEDEFS: &[(&str, u8, bool)] = &[
    ("int8_t", 1, true),
    ("uint8_t", 1, false),
    ("int16_t", 2, true),
    ("uint16_t", 2, false),
    ("int32_t", 4, true),
    ("uint32_t", 4, false),
    ("int64_t", 8, true),
    ("uint64_t", 8, false),
    ("size_t", 8, false),
    ("ssize_t", 8, true),
    ("ptrdiff_t", 8, true),
    ("intptr_t", 8, true),
    ("uintptr_t", 8, false),
];

/// Qualifiers and extensions that do not change the meaning of a type for us.
const IGNORED_SPECIFIERS: &[&str] = &[
    "const",
    "volatile",
    "restrict",
    "__restrict",
    "__restrict__",
    "__const",
    "__volatile__",
    "__extension__",
    "_Noreturn",
    "auto",
    "register",
];

const TYPE_KEYWORDS: &[&str] = &[
    "void", "_Bool", "bool", "char", "short", "int", "long", "signed", "__signed__", "unsigned",
    "float", "double", "struct", "union", "enum", "typedef", "static", "extern", "inline",
    "__inline", "__inline__", "__attribute__", "_Thread_local",
];

/// Parse a whole translation unit. Only lexical errors are fatal.
pub fn parse_translation_unit(src: &str) -> Result<TranslationUnit, ParseError> {
    let mut parser = Parser::new(tokenize(src)?, HashMap::new());
    let mut unit = TranslationUnit::default();
    while !parser.at_eof() {
        let start = parser.pos;
        let line = parser.peek().line;
        if let Err(err) = parser.external_declaration(&mut unit) {
            debug!(line, ?err, "skipping top-level item");
            parser.pos = start;
            parser.skip_item();
            unit.skipped.push(SkippedDecl { line, reason: err.message });
        }
    }
    unit.typedefs = parser.typedefs;
    unit.enum_constants = parser.enum_constants;
    Ok(unit)
}

/// Parse the body of a function definition into a block statement.
pub fn parse_function_body(
    function: &FunctionDecl,
    unit: &TranslationUnit,
) -> Result<Stmt, ParseError> {
    let Some(body) = &function.body else {
        return Err(ParseError {
            line: function.line,
            message: format!("`{}` has no body", function.name),
        });
    };
    let mut tokens = body.clone();
    let line = tokens.last().map_or(function.line, |t| t.line);
    tokens.push(Token { kind: TokenKind::Eof, line });
    let mut parser = Parser::new(tokens, unit.typedefs.clone());
    parser.enum_constants = unit.enum_constants.clone();
    let block = parser.compound_statement()?;
    if !parser.at_eof() {
        return Err(parser.error("unexpected tokens after function body"));
    }
    Ok(block)
}

/// The declaration specifiers shared by every declarator of a declaration.
#[derive(Debug, Clone)]
struct DeclSpec {
    ty: CType,
    is_typedef: bool,
    is_static: bool,
    is_extern: bool,
    is_inline: bool,
    attributes: Vec<Attribute>,
}

#[derive(Debug)]
struct Declarator {
    name: Option<String>,
    line: usize,
    ty: CType,
    /// Set for function declarators
    params: Option<(Vec<Param>, bool)>,
    attributes: Vec<Attribute>,
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    typedefs: HashMap<String, CType>,
    enum_constants: BTreeMap<String, i64>,
}

impl Parser {
    fn new(tokens: Vec<Token>, mut typedefs: HashMap<String, CType>) -> Self {
        for (name, size, signed) in BUILTIN_TYPEDEFS {
            typedefs
                .entry(name.to_string())
                .or_insert(CType::Int { size: *size, signed: *signed });
        }
        Parser { tokens, pos: 0, typedefs, enum_constants: BTreeMap::new() }
    }

    fn peek(&self) -> &Token {
        self.peek_at(0)
    }

    fn peek_at(&self, ahead: usize) -> &Token {
        let last = self.tokens.len() - 1;
        &self.tokens[(self.pos + ahead).min(last)]
    }

    fn at_eof(&self) -> bool {
        self.peek().kind == TokenKind::Eof
    }

    fn next(&mut self) -> Token {
        let token = self.peek().clone();
        if token.kind != TokenKind::Eof {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, punct: &str) -> bool {
        if self.peek().is_punct(punct) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_ident(&mut self, ident: &str) -> bool {
        if self.peek().is_ident(ident) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, punct: &str) -> Result<(), ParseError> {
        if self.eat(punct) {
            Ok(())
        } else {
            Err(self.error(format!("expected `{punct}`, found `{}`", self.peek().text())))
        }
    }

    fn identifier(&mut self) -> Result<String, ParseError> {
        match &self.peek().kind {
            TokenKind::Ident(name) => {
                let name = name.clone();
                self.pos += 1;
                Ok(name)
            }
            _ => Err(self.error(format!("expected identifier, found `{}`", self.peek().text()))),
        }
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError { line: self.peek().line, message: message.into() }
    }

    /// Skip the current top-level item: up to a `;` or a closing `}` at nesting level zero.
    fn skip_item(&mut self) {
        let mut depth = 0usize;
        loop {
            let token = self.next();
            match token.kind {
                TokenKind::Eof => return,
                TokenKind::Punct("{" | "(" | "[") => depth += 1,
                TokenKind::Punct(close @ ("}" | ")" | "]")) => {
                    depth = depth.saturating_sub(1);
                    if close == "}" && depth == 0 {
                        self.eat(";");
                        return;
                    }
                }
                TokenKind::Punct(";") if depth == 0 => return,
                _ => {}
            }
        }
    }

    /// Tokens of a balanced `{ ... }` group, braces included.
    fn balanced_braces(&mut self) -> Result<Vec<Token>, ParseError> {
        let start = self.pos;
        let mut depth = 0usize;
        loop {
            let token = self.next();
            match token.kind {
                TokenKind::Eof => return Err(self.error("unbalanced `{`")),
                TokenKind::Punct("{") => depth += 1,
                TokenKind::Punct("}") => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(self.tokens[start..self.pos].to_vec());
                    }
                }
                _ => {}
            }
        }
    }

    fn is_type_start(&self, token: &Token) -> bool {
        match &token.kind {
            TokenKind::Ident(name) => {
                TYPE_KEYWORDS.contains(&name.as_str())
                    || IGNORED_SPECIFIERS.contains(&name.as_str())
                    || self.typedefs.contains_key(name)
            }
            _ => false,
        }
    }

    // ------------------------------------------------------------------------------------------
    // Declarations
    // ------------------------------------------------------------------------------------------

    /// Parse one top-level declaration. Its declarators are added to `unit` only when the whole
    /// declaration parses.
    fn external_declaration(&mut self, unit: &mut TranslationUnit) -> Result<(), ParseError> {
        if self.eat(";") {
            return Ok(());
        }
        let spec = self.decl_specifiers()?;
        if self.eat(";") {
            return Ok(());
        }
        let mut functions = vec![];
        let mut globals = vec![];
        let mut typedefs = vec![];
        loop {
            let decl = self.declarator(spec.ty.clone(), false)?;
            let mut attributes = spec.attributes.clone();
            attributes.extend(decl.attributes);
            attributes.extend(self.attributes()?);
            let name = decl.name.ok_or_else(|| self.error("expected a declarator name"))?;

            if spec.is_typedef {
                typedefs.push((name, decl.ty));
            } else if let Some((params, variadic)) = decl.params {
                let first = functions.is_empty() && globals.is_empty();
                let body = if first && self.peek().is_punct("{") {
                    Some(self.balanced_braces()?)
                } else {
                    None
                };
                let is_definition = body.is_some();
                functions.push(FunctionDecl {
                    name,
                    line: decl.line,
                    ret: decl.ty,
                    params,
                    variadic,
                    attributes,
                    is_static: spec.is_static,
                    is_inline: spec.is_inline,
                    body,
                });
                if is_definition {
                    break;
                }
            } else {
                let init = if self.eat("=") { Some(self.initializer()?) } else { None };
                globals.push(GlobalVar { name, line: decl.line, ty: decl.ty, init });
            }
            if !self.eat(",") {
                self.expect(";")?;
                break;
            }
        }
        self.typedefs.extend(typedefs);
        unit.functions.extend(functions);
        unit.globals.extend(globals);
        Ok(())
    }

    fn decl_specifiers(&mut self) -> Result<DeclSpec, ParseError> {
        let mut spec = DeclSpec {
            ty: CType::INT,
            is_typedef: false,
            is_static: false,
            is_extern: false,
            is_inline: false,
            attributes: vec![],
        };
        let mut base: Option<CType> = None;
        let mut named_int = false;
        let mut longs = 0;
        let mut short = false;
        let mut char_ = false;
        let mut signed: Option<bool> = None;
        let mut any = false;

        loop {
            let token = self.peek().clone();
            let TokenKind::Ident(word) = &token.kind else { break };
            match word.as_str() {
                "__attribute__" => {
                    spec.attributes.extend(self.attributes()?);
                    any = true;
                    continue;
                }
                "typedef" => spec.is_typedef = true,
                "static" => spec.is_static = true,
                "extern" => spec.is_extern = true,
                "_Thread_local" => {}
                "inline" | "__inline" | "__inline__" => spec.is_inline = true,
                w if IGNORED_SPECIFIERS.contains(&w) => {}
                "void" => base = Some(CType::Void),
                "_Bool" | "bool" => base = Some(CType::Bool),
                "char" => char_ = true,
                "short" => short = true,
                "int" => named_int = true,
                "long" => longs += 1,
                "signed" | "__signed__" => signed = Some(true),
                "unsigned" => signed = Some(false),
                "float" | "double" => base = Some(CType::Opaque(word.clone())),
                "struct" | "union" => {
                    self.pos += 1;
                    base = Some(self.record_type(word)?);
                    any = true;
                    continue;
                }
                "enum" => {
                    self.pos += 1;
                    self.enum_type()?;
                    base = Some(CType::INT);
                    any = true;
                    continue;
                }
                name => {
                    let seen_type = base.is_some()
                        || named_int
                        || char_
                        || short
                        || longs > 0
                        || signed.is_some();
                    match self.typedefs.get(name) {
                        Some(ty) if !seen_type => base = Some(ty.clone()),
                        _ => break,
                    }
                }
            }
            any = true;
            self.pos += 1;
        }

        if !any {
            return Err(self.error(format!(
                "expected a declaration, found `{}`",
                self.peek().text()
            )));
        }
        spec.ty = match base {
            Some(ty) => ty,
            None if char_ => CType::Int { size: 1, signed: signed.unwrap_or(true) },
            None if short => CType::Int { size: 2, signed: signed.unwrap_or(true) },
            None if longs > 0 => CType::Int { size: 8, signed: signed.unwrap_or(true) },
            None => CType::Int { size: 4, signed: signed.unwrap_or(true) },
        };
        Ok(spec)
    }

    /// `struct name`, `struct name { ... }` or `struct { ... }`. Members are not modelled.
    fn record_type(&mut self, keyword: &str) -> Result<CType, ParseError> {
        self.attributes()?;
        let name = match &self.peek().kind {
            TokenKind::Ident(name) => {
                let name = name.clone();
                self.pos += 1;
                name
            }
            _ => "<anonymous>".to_string(),
        };
        if self.peek().is_punct("{") {
            self.balanced_braces()?;
        }
        self.attributes()?;
        Ok(CType::Opaque(format!("{keyword} {name}")))
    }

    /// `enum name { A, B = 2 }`. Enumerators become integer constants.
    fn enum_type(&mut self) -> Result<(), ParseError> {
        self.attributes()?;
        if matches!(self.peek().kind, TokenKind::Ident(_)) {
            self.pos += 1;
        }
        if !self.eat("{") {
            return Ok(());
        }
        let mut next_value = 0i64;
        while !self.eat("}") {
            let name = self.identifier()?;
            if self.eat("=") {
                let expr = self.conditional()?;
                next_value = self
                    .const_eval(&expr)
                    .ok_or_else(|| self.error(format!("enumerator `{name}` is not constant")))?;
            }
            self.enum_constants.insert(name, next_value);
            next_value += 1;
            if !self.eat(",") {
                self.expect("}")?;
                break;
            }
        }
        Ok(())
    }

    /// Any number of `__attribute__((...))` and `__asm__("...")` groups.
    fn attributes(&mut self) -> Result<Vec<Attribute>, ParseError> {
        let mut attributes = vec![];
        loop {
            if self.eat_ident("__attribute__") || self.eat_ident("__attribute") {
                self.expect("(")?;
                self.expect("(")?;
                while !self.peek().is_punct(")") {
                    let line = self.peek().line;
                    let name = self.identifier()?;
                    let args = if self.eat("(") { self.attribute_args()? } else { vec![] };
                    attributes.push(Attribute { name, args, line });
                    if !self.eat(",") {
                        break;
                    }
                }
                self.expect(")")?;
                self.expect(")")?;
            } else if self.eat_ident("__asm__") || self.eat_ident("__asm") || self.eat_ident("asm")
            {
                self.expect("(")?;
                let mut depth = 1;
                while depth > 0 {
                    let token = self.next();
                    match token.kind {
                        TokenKind::Eof => return Err(self.error("unbalanced `(` in asm label")),
                        TokenKind::Punct("(") => depth += 1,
                        TokenKind::Punct(")") => depth -= 1,
                        _ => {}
                    }
                }
            } else {
                return Ok(attributes);
            }
        }
    }

    /// Arguments of one attribute, after its opening parenthesis. Each argument is the
    /// concatenated spelling of its tokens.
    fn attribute_args(&mut self) -> Result<Vec<String>, ParseError> {
        let mut args = vec![];
        let mut current = String::new();
        let mut depth = 0usize;
        loop {
            let token = self.next();
            match &token.kind {
                TokenKind::Eof => return Err(self.error("unterminated attribute arguments")),
                TokenKind::Punct(")") if depth == 0 => break,
                TokenKind::Punct(",") if depth == 0 => {
                    args.push(std::mem::take(&mut current));
                    continue;
                }
                TokenKind::Punct("(") => depth += 1,
                TokenKind::Punct(")") => depth -= 1,
                _ => {}
            }
            current.push_str(&token.text());
        }
        if !current.is_empty() || !args.is_empty() {
            args.push(current);
        }
        Ok(args)
    }

    /// A declarator on top of `base`. With `abstract_ok`, the name may be missing.
    fn declarator(&mut self, base: CType, abstract_ok: bool) -> Result<Declarator, ParseError> {
        let mut attributes = self.attributes()?;
        let mut ty = base;
        while self.eat("*") {
            ty = ty.pointer_to();
            loop {
                let token = self.peek();
                if let TokenKind::Ident(word) = &token.kind {
                    if IGNORED_SPECIFIERS.contains(&word.as_str()) {
                        self.pos += 1;
                        continue;
                    }
                }
                break;
            }
            attributes.extend(self.attributes()?);
        }
        if self.peek().is_punct("(") && !abstract_ok {
            return Err(self.error("parenthesized declarators are not supported"));
        }
        let line = self.peek().line;
        let has_name =
            matches!(self.peek().kind, TokenKind::Ident(_)) && !self.is_type_start(self.peek());
        let name = if has_name {
            Some(self.identifier()?)
        } else if abstract_ok {
            None
        } else {
            return Err(self.error(format!("expected identifier, found `{}`", self.peek().text())));
        };
        attributes.extend(self.attributes()?);

        let mut params = None;
        if self.eat("(") {
            params = Some(self.parameter_list()?);
        } else {
            let mut dims = vec![];
            while self.eat("[") {
                if self.eat("]") {
                    dims.push(0);
                    continue;
                }
                let expr = self.conditional()?;
                let len = self
                    .const_eval(&expr)
                    .filter(|len| *len >= 0)
                    .ok_or_else(|| self.error("array size is not a non-negative constant"))?;
                self.expect("]")?;
                dims.push(len as u64);
            }
            for len in dims.into_iter().rev() {
                ty = CType::Array(Box::new(ty), len);
            }
        }
        Ok(Declarator { name, line, ty, params, attributes })
    }

    /// Parameters after the opening parenthesis of a function declarator.
    fn parameter_list(&mut self) -> Result<(Vec<Param>, bool), ParseError> {
        let mut params = vec![];
        if self.eat(")") {
            return Ok((params, false));
        }
        if self.peek().is_ident("void") && self.peek_at(1).is_punct(")") {
            self.pos += 2;
            return Ok((params, false));
        }
        loop {
            if self.eat("...") {
                self.expect(")")?;
                return Ok((params, true));
            }
            let spec = self.decl_specifiers()?;
            let decl = self.declarator(spec.ty, true)?;
            if decl.params.is_some() {
                return Err(self.error("function parameters of function type are not supported"));
            }
            // Array parameters are pointers.
            let ty = match decl.ty {
                CType::Array(elem, _) => CType::Pointer(elem),
                other => other,
            };
            params.push(Param { name: decl.name, ty });
            if !self.eat(",") {
                break;
            }
        }
        self.expect(")")?;
        Ok((params, false))
    }

    fn initializer(&mut self) -> Result<Initializer, ParseError> {
        if self.eat("{") {
            let mut items = vec![];
            while !self.eat("}") {
                if self.peek().is_punct("{") || self.peek().is_punct(".") {
                    return Err(self.error("nested and designated initializers are not supported"));
                }
                items.push(self.assignment()?);
                if !self.eat(",") {
                    self.expect("}")?;
                    break;
                }
            }
            Ok(Initializer::List(items))
        } else {
            Ok(Initializer::Expr(self.assignment()?))
        }
    }

    /// A type name, as in casts and `sizeof`.
    fn type_name(&mut self) -> Result<CType, ParseError> {
        let spec = self.decl_specifiers()?;
        let decl = self.declarator(spec.ty, true)?;
        if decl.name.is_some() || decl.params.is_some() {
            return Err(self.error("unsupported type name"));
        }
        Ok(decl.ty)
    }

    /// Evaluate an integer constant expression, as needed for array sizes and enumerators.
    fn const_eval(&self, expr: &Expr) -> Option<i64> {
        Some(match &expr.kind {
            ExprKind::IntLit { value, .. } => *value as i64,
            ExprKind::Ident(name) => *self.enum_constants.get(name)?,
            ExprKind::SizeofType(ty) => ty.size()? as i64,
            ExprKind::Cast(_, inner) => self.const_eval(inner)?,
            ExprKind::Unary(op, inner) => {
                let value = self.const_eval(inner)?;
                match op {
                    UnOp::Neg => value.checked_neg()?,
                    UnOp::Plus => value,
                    UnOp::Not => i64::from(value == 0),
                    UnOp::BitNot => !value,
                    UnOp::Deref | UnOp::AddrOf => return None,
                }
            }
            ExprKind::Binary(op, lhs, rhs) => {
                let (l, r) = (self.const_eval(lhs)?, self.const_eval(rhs)?);
                match op {
                    BinOp::Add => l.checked_add(r)?,
                    BinOp::Sub => l.checked_sub(r)?,
                    BinOp::Mul => l.checked_mul(r)?,
                    BinOp::Div => l.checked_div(r)?,
                    BinOp::Rem => l.checked_rem(r)?,
                    BinOp::Shl => l.checked_shl(u32::try_from(r).ok()?)?,
                    BinOp::Shr => l.checked_shr(u32::try_from(r).ok()?)?,
                    BinOp::BitAnd => l & r,
                    BinOp::BitOr => l | r,
                    BinOp::BitXor => l ^ r,
                    BinOp::Lt => i64::from(l < r),
                    BinOp::Gt => i64::from(l > r),
                    BinOp::Le => i64::from(l <= r),
                    BinOp::Ge => i64::from(l >= r),
                    BinOp::Eq => i64::from(l == r),
                    BinOp::Ne => i64::from(l != r),
                    BinOp::LogAnd => i64::from(l != 0 && r != 0),
                    BinOp::LogOr => i64::from(l != 0 || r != 0),
                }
            }
            _ => return None,
        })
    }

    // ------------------------------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------------------------------

    fn compound_statement(&mut self) -> Result<Stmt, ParseError> {
        self.expect("{")?;
        let mut stmts = vec![];
        while !self.eat("}") {
            if self.at_eof() {
                return Err(self.error("unexpected end of function body"));
            }
            stmts.push(self.statement()?);
        }
        Ok(Stmt::Block(stmts))
    }

    fn statement(&mut self) -> Result<Stmt, ParseError> {
        if self.peek().is_punct("{") {
            return self.compound_statement();
        }
        if self.eat(";") {
            return Ok(Stmt::Empty);
        }
        if self.is_type_start(self.peek()) {
            return self.local_declaration();
        }
        let keyword = match &self.peek().kind {
            TokenKind::Ident(word) => word.clone(),
            _ => String::new(),
        };
        match keyword.as_str() {
            "if" => {
                self.pos += 1;
                let cond = self.paren_expr()?;
                let then = Box::new(self.statement()?);
                let els =
                    if self.eat_ident("else") { Some(Box::new(self.statement()?)) } else { None };
                Ok(Stmt::If { cond, then, els })
            }
            "while" => {
                self.pos += 1;
                let cond = self.paren_expr()?;
                let body = Box::new(self.statement()?);
                Ok(Stmt::While { cond, body })
            }
            "do" => {
                self.pos += 1;
                let body = Box::new(self.statement()?);
                if !self.eat_ident("while") {
                    return Err(self.error("expected `while` after `do` body"));
                }
                let cond = self.paren_expr()?;
                self.expect(";")?;
                Ok(Stmt::DoWhile { body, cond })
            }
            "for" => {
                self.pos += 1;
                self.expect("(")?;
                let init = if self.eat(";") {
                    None
                } else if self.is_type_start(self.peek()) {
                    Some(Box::new(self.local_declaration()?))
                } else {
                    let expr = self.expression()?;
                    self.expect(";")?;
                    Some(Box::new(Stmt::Expr(expr)))
                };
                let cond = if self.peek().is_punct(";") { None } else { Some(self.expression()?) };
                self.expect(";")?;
                let step = if self.peek().is_punct(")") { None } else { Some(self.expression()?) };
                self.expect(")")?;
                let body = Box::new(self.statement()?);
                Ok(Stmt::For { init, cond, step, body })
            }
            "return" => {
                self.pos += 1;
                let value = if self.peek().is_punct(";") { None } else { Some(self.expression()?) };
                self.expect(";")?;
                Ok(Stmt::Return(value))
            }
            "break" => {
                self.pos += 1;
                self.expect(";")?;
                Ok(Stmt::Break)
            }
            "continue" => {
                self.pos += 1;
                self.expect(";")?;
                Ok(Stmt::Continue)
            }
            "switch" | "goto" | "case" | "default" => {
                Err(self.error(format!("`{keyword}` is not supported")))
            }
            _ => {
                let expr = self.expression()?;
                self.expect(";")?;
                Ok(Stmt::Expr(expr))
            }
        }
    }

    fn local_declaration(&mut self) -> Result<Stmt, ParseError> {
        let spec = self.decl_specifiers()?;
        if spec.is_static || spec.is_extern || spec.is_typedef {
            return Err(self.error("local `static`, `extern` and `typedef` are not supported"));
        }
        let mut decls = vec![];
        if self.eat(";") {
            return Ok(Stmt::Decl(decls));
        }
        loop {
            let decl = self.declarator(spec.ty.clone(), false)?;
            self.attributes()?;
            if decl.params.is_some() {
                return Err(self.error("local function declarations are not supported"));
            }
            let name = decl.name.ok_or_else(|| self.error("expected a variable name"))?;
            let init = if self.eat("=") { Some(self.initializer()?) } else { None };
            decls.push(LocalDecl { name, ty: decl.ty, init, line: decl.line });
            if !self.eat(",") {
                break;
            }
        }
        self.expect(";")?;
        Ok(Stmt::Decl(decls))
    }

    fn paren_expr(&mut self) -> Result<Expr, ParseError> {
        self.expect("(")?;
        let expr = self.expression()?;
        self.expect(")")?;
        Ok(expr)
    }

    // ------------------------------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------------------------------

    fn expression(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.assignment()?;
        while self.peek().is_punct(",") {
            let line = self.next().line;
            let rhs = self.assignment()?;
            expr = Expr::new(ExprKind::Comma(Box::new(expr), Box::new(rhs)), line);
        }
        Ok(expr)
    }

    fn assignment(&mut self) -> Result<Expr, ParseError> {
        let target = self.conditional()?;
        let token = self.peek().clone();
        let op = match token.kind {
            TokenKind::Punct("=") => None,
            TokenKind::Punct(p) => match BinOp::from_compound_assign(p) {
                Some(op) => Some(op),
                None => return Ok(target),
            },
            _ => return Ok(target),
        };
        self.pos += 1;
        let value = self.assignment()?;
        Ok(Expr::new(
            ExprKind::Assign { op, target: Box::new(target), value: Box::new(value) },
            token.line,
        ))
    }

    fn conditional(&mut self) -> Result<Expr, ParseError> {
        let cond = self.binary(1)?;
        if !self.peek().is_punct("?") {
            return Ok(cond);
        }
        let line = self.next().line;
        let then = self.expression()?;
        self.expect(":")?;
        let els = self.conditional()?;
        Ok(Expr::new(
            ExprKind::Cond { cond: Box::new(cond), then: Box::new(then), els: Box::new(els) },
            line,
        ))
    }

    /// Precedence climbing over the binary operators.
    fn binary(&mut self, min_precedence: u8) -> Result<Expr, ParseError> {
        let mut lhs = self.cast()?;
        loop {
            let token = self.peek().clone();
            let TokenKind::Punct(p) = token.kind else { break };
            let Some(op) = BinOp::from_punct(p) else { break };
            if op.precedence() < min_precedence {
                break;
            }
            self.pos += 1;
            let rhs = self.binary(op.precedence() + 1)?;
            lhs = Expr::new(ExprKind::Binary(op, Box::new(lhs), Box::new(rhs)), token.line);
        }
        Ok(lhs)
    }

    fn cast(&mut self) -> Result<Expr, ParseError> {
        if self.peek().is_punct("(") && self.is_type_start(self.peek_at(1)) {
            let line = self.next().line;
            let ty = self.type_name()?;
            self.expect(")")?;
            if self.peek().is_punct("{") {
                return Err(self.error("compound literals are not supported"));
            }
            let inner = self.cast()?;
            return Ok(Expr::new(ExprKind::Cast(ty, Box::new(inner)), line));
        }
        self.unary()
    }

    fn unary(&mut self) -> Result<Expr, ParseError> {
        let token = self.peek().clone();
        let line = token.line;
        let op = match &token.kind {
            TokenKind::Punct("++" | "--") => {
                self.pos += 1;
                let operand = Box::new(self.unary()?);
                let increment = token.is_punct("++");
                return Ok(Expr::new(ExprKind::IncDec { prefix: true, increment, operand }, line));
            }
            TokenKind::Punct("-") => UnOp::Neg,
            TokenKind::Punct("+") => UnOp::Plus,
            TokenKind::Punct("!") => UnOp::Not,
            TokenKind::Punct("~") => UnOp::BitNot,
            TokenKind::Punct("*") => UnOp::Deref,
            TokenKind::Punct("&") => UnOp::AddrOf,
            TokenKind::Ident(word) if word == "sizeof" => {
                self.pos += 1;
                if self.peek().is_punct("(") && self.is_type_start(self.peek_at(1)) {
                    self.pos += 1;
                    let ty = self.type_name()?;
                    self.expect(")")?;
                    return Ok(Expr::new(ExprKind::SizeofType(ty), line));
                }
                let inner = self.unary()?;
                return Ok(Expr::new(ExprKind::SizeofExpr(Box::new(inner)), line));
            }
            _ => return self.postfix(),
        };
        self.pos += 1;
        let operand = self.cast()?;
        Ok(Expr::new(ExprKind::Unary(op, Box::new(operand)), line))
    }

    fn postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.primary()?;
        loop {
            let token = self.peek().clone();
            let line = token.line;
            match token.kind {
                TokenKind::Punct("[") => {
                    self.pos += 1;
                    let index = self.expression()?;
                    self.expect("]")?;
                    expr = Expr::new(ExprKind::Index(Box::new(expr), Box::new(index)), line);
                }
                TokenKind::Punct("(") => {
                    let ExprKind::Ident(callee) = &expr.kind else {
                        return Err(self.error("calls through function pointers are not supported"));
                    };
                    let callee = callee.clone();
                    self.pos += 1;
                    let mut args = vec![];
                    if !self.eat(")") {
                        loop {
                            args.push(self.assignment()?);
                            if !self.eat(",") {
                                break;
                            }
                        }
                        self.expect(")")?;
                    }
                    expr = Expr::new(ExprKind::Call { callee, args }, expr.line);
                }
                TokenKind::Punct(p @ ("++" | "--")) => {
                    self.pos += 1;
                    expr = Expr::new(
                        ExprKind::IncDec {
                            prefix: false,
                            increment: p == "++",
                            operand: Box::new(expr),
                        },
                        line,
                    );
                }
                TokenKind::Punct("." | "->") => {
                    return Err(self.error("member access is not supported"));
                }
                _ => return Ok(expr),
            }
        }
    }

    fn primary(&mut self) -> Result<Expr, ParseError> {
        let token = self.next();
        let line = token.line;
        let kind = match token.kind {
            TokenKind::Int { value, unsigned, long } => {
                ExprKind::IntLit { value, ty: literal_type(value, unsigned, long) }
            }
            TokenKind::Char(value) => ExprKind::IntLit { value: value as u64, ty: CType::INT },
            TokenKind::Str(mut text) => {
                while let TokenKind::Str(more) = &self.peek().kind {
                    text.push_str(more);
                    self.pos += 1;
                }
                ExprKind::Str(text)
            }
            TokenKind::Ident(name) => match self.enum_constants.get(&name) {
                Some(value) => ExprKind::IntLit { value: *value as u64, ty: CType::INT },
                None => ExprKind::Ident(name),
            },
            TokenKind::Punct("(") => {
                let expr = self.expression()?;
                self.expect(")")?;
                return Ok(expr);
            }
            TokenKind::Float(text) => {
                let message = format!("floating constant `{text}` is not supported");
                return Err(ParseError { line, message });
            }
            TokenKind::Invalid(text) => {
                return Err(ParseError { line, message: format!("invalid token `{text}`") });
            }
            _ => {
                return Err(ParseError {
                    line,
                    message: format!("expected an expression, found `{}`", token.text()),
                });
            }
        };
        Ok(Expr::new(kind, line))
    }
}

/// The type of an integer literal: the first of int, unsigned int, long, unsigned long that
/// fits, honoring `u` and `l` suffixes.
fn literal_type(value: u64, unsigned: bool, long: bool) -> CType {
    let int = CType::Int { size: 4, signed: !unsigned };
    let fits_int = if unsigned { value <= u64::from(u32::MAX) } else { value <= i32::MAX as u64 };
    if !long && fits_int {
        return int;
    }
    if !long && !unsigned && value <= u64::from(u32::MAX) {
        return CType::Int { size: 4, signed: false };
    }
    if unsigned || value > i64::MAX as u64 { CType::ULONG } else { CType::LONG }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_top_level_declarations() {
        let src = "typedef unsigned long my_size;\n\
                   static inline int helper(int a, char *b, ...);\n\
                   extern int counter, table[4][2];\n\
                   struct node { int value; struct node *next; };\n\
                   enum color { RED, GREEN = 5, BLUE };\n\
                   my_size width(void) { return 3; }\n";
        let unit = parse_translation_unit(src).unwrap();
        assert!(unit.skipped.is_empty(), "{:?}", unit.skipped);
        assert_eq!(unit.typedefs.get("my_size"), Some(&CType::ULONG));
        assert_eq!(unit.functions.len(), 2);
        let helper = &unit.functions[0];
        assert!(helper.is_static && helper.is_inline && helper.variadic);
        assert_eq!(helper.params[1].ty, CType::Int { size: 1, signed: true }.pointer_to());
        assert!(helper.body.is_none());
        assert_eq!(unit.functions[1].ret, CType::ULONG);
        assert!(unit.definition("width").is_some());
        let row = CType::Array(Box::new(CType::INT), 2);
        assert_eq!(unit.globals[1].ty, CType::Array(Box::new(row), 4));
        assert_eq!(unit.enum_constants.get("BLUE"), Some(&6));
    }

    #[test]
    fn check_attributes() {
        let src = "__attribute__((section(\".data\"))) int inc(int x) { return x + 1; }\n\
                   int dec(int x) __attribute__((__noinline__, used));\n";
        let unit = parse_translation_unit(src).unwrap();
        let inc = &unit.functions[0].attributes;
        assert_eq!(inc[0].name, "section");
        assert_eq!(inc[0].args, vec![".data"]);
        let dec = &unit.functions[1].attributes;
        let names: Vec<_> = dec.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, ["__noinline__", "used"]);
    }

    #[test]
    fn check_recovery() {
        let src = "int ok1(void);\n\
                   int (*fp)(int);\n\
                   garbage here {{ }} \n\
                   int ok2(void) { return 0; }\n";
        let unit = parse_translation_unit(src).unwrap();
        let names: Vec<_> = unit.functions.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["ok1", "ok2"]);
        assert_eq!(unit.skipped.len(), 2);
        assert_eq!(unit.skipped[0].line, 2);
    }

    #[test]
    fn check_function_body() {
        let src = "int test(int x) {\n\
                     int i, sum = 0;\n\
                     for (i = 0; i < x; i++) { if (i % 2) continue; sum += i * 2; }\n\
                     while (sum > 100) sum -= 1;\n\
                     do { sum++; } while (0);\n\
                     return x ? sum : -(int)sizeof(long);\n\
                   }\n";
        let unit = parse_translation_unit(src).unwrap();
        let body = parse_function_body(&unit.functions[0], &unit).unwrap();
        let Stmt::Block(stmts) = body else { panic!("expected a block") };
        assert_eq!(stmts.len(), 5);
        assert!(matches!(&stmts[0], Stmt::Decl(decls) if decls.len() == 2));
        assert!(matches!(&stmts[4], Stmt::Return(Some(Expr { kind: ExprKind::Cond { .. }, .. }))));
    }

    #[test]
    fn check_precedence() {
        let src = "int f(int a, int b) { return a + b * 2 == 7 && !a; }";
        let unit = parse_translation_unit(src).unwrap();
        let Stmt::Block(stmts) = parse_function_body(&unit.functions[0], &unit).unwrap() else {
            panic!("expected a block")
        };
        let Stmt::Return(Some(expr)) = &stmts[0] else { panic!("expected a return") };
        let ExprKind::Binary(BinOp::LogAnd, lhs, _) = &expr.kind else {
            panic!("expected && at the top, got {expr:?}")
        };
        assert!(matches!(lhs.kind, ExprKind::Binary(BinOp::Eq, _, _)));
    }

    #[test]
    fn check_body_errors_are_lazy() {
        let src = "struct s { int v; };\nint get(struct s *p) { return p->v; }\n";
        let unit = parse_translation_unit(src).unwrap();
        assert!(unit.skipped.is_empty());
        let err = parse_function_body(&unit.functions[0], &unit).unwrap_err();
        assert_eq!(err.line, 2);
    }

    #[test]
    fn check_failed_declarator_drops_the_item() {
        let unit = parse_translation_unit("int f(void), g(void) 5;\nint h(void);\n").unwrap();
        let names: Vec<_> = unit.functions.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["h"]);
        assert_eq!(unit.skipped.len(), 1);

        let unit = parse_translation_unit("typedef int word, 5;\nint a, b = 2;\n").unwrap();
        assert!(!unit.typedefs.contains_key("word"));
        assert_eq!(unit.globals.len(), 2);
    }

    #[test]
    fn check_floats_and_stray_characters() {
        let src = "double half(void) { return 1.5e0; }\n\
                   int us$ = 1;\n\
                   int bad = 09;\n\
                   int test(void) { return 0; }\n";
        let unit = parse_translation_unit(src).unwrap();
        let names: Vec<_> = unit.functions.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["half", "test"]);
        assert_eq!(unit.globals.iter().map(|g| g.name.as_str()).collect::<Vec<_>>(), ["us$"]);
        assert_eq!(unit.skipped.len(), 1);
        assert_eq!(unit.skipped[0].line, 3);

        // The float only matters once `half` is evaluated.
        let err = parse_function_body(&unit.functions[0], &unit).unwrap_err();
        assert_eq!(err.message, "floating constant `1.5e0` is not supported");
        assert!(parse_function_body(&unit.functions[1], &unit).is_ok());
    }

    #[test]
    fn check_literal_types() {
        assert_eq!(literal_type(1, false, false), CType::INT);
        assert_eq!(literal_type(0xffff_ffff, false, false), CType::Int { size: 4, signed: false });
        assert_eq!(literal_type(1 << 40, false, false), CType::LONG);
        assert_eq!(literal_type(1, true, true), CType::ULONG);
    }
}
