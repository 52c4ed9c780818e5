// Copyright Kani Contributors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use super::lexer::Token;
use std::collections::{BTreeMap, HashMap};

/// Size of pointers and `long` on the 64-bit targets fixtures are built for.
pub const POINTER_SIZE: u64 = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CType {
    Void,
    Bool,
    Int { size: u8, signed: bool },
    Pointer(Box<CType>),
    Array(Box<CType>, u64),
    /// Struct, union and floating point types. Only usable behind a pointer.
    Opaque(String),
}

impl CType {
    pub const INT: CType = CType::Int { size: 4, signed: true };
    pub const LONG: CType = CType::Int { size: 8, signed: true };
    pub const ULONG: CType = CType::Int { size: 8, signed: false };

    pub fn pointer_to(self) -> CType {
        CType::Pointer(Box::new(self))
    }

    /// `sizeof`, if the type has a known size.
    pub fn size(&self) -> Option<u64> {
        match self {
            CType::Void | CType::Opaque(_) => None,
            CType::Bool => Some(1),
            CType::Int { size, .. } => Some(u64::from(*size)),
            CType::Pointer(_) => Some(POINTER_SIZE),
            CType::Array(elem, len) => elem.size().and_then(|size| size.checked_mul(*len)),
        }
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self, CType::Pointer(_))
    }

    /// Type pointed to, or the element type of an array.
    pub fn pointee(&self) -> Option<&CType> {
        match self {
            CType::Pointer(inner) | CType::Array(inner, _) => Some(inner),
            _ => None,
        }
    }
}

impl std::fmt::Display for CType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CType::Void => f.write_str("void"),
            CType::Bool => f.write_str("_Bool"),
            CType::Int { size, signed } => {
                let name = match size {
                    1 => "char",
                    2 => "short",
                    4 => "int",
                    _ => "long",
                };
                if *signed { f.write_str(name) } else { write!(f, "unsigned {name}") }
            }
            CType::Pointer(inner) => write!(f, "{inner} *"),
            CType::Array(inner, len) => write!(f, "{inner}[{len}]"),
            CType::Opaque(name) => f.write_str(name),
        }
    }
}

/// `__attribute__((name(args)))`, spelled as in the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub args: Vec<String>,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub name: Option<String>,
    pub ty: CType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionDecl {
    pub name: String,
    pub line: usize,
    pub ret: CType,
    pub params: Vec<Param>,
    pub variadic: bool,
    pub attributes: Vec<Attribute>,
    pub is_static: bool,
    pub is_inline: bool,
    /// Tokens from `{` to the matching `}`, for definitions
    pub body: Option<Vec<Token>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Initializer {
    Expr(Expr),
    List(Vec<Expr>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalVar {
    pub name: String,
    pub line: usize,
    pub ty: CType,
    pub init: Option<Initializer>,
}

/// A top-level item the parser gave up on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedDecl {
    pub line: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TranslationUnit {
    /// Every function declaration in source order, prototypes included
    pub functions: Vec<FunctionDecl>,
    pub globals: Vec<GlobalVar>,
    pub typedefs: HashMap<String, CType>,
    pub enum_constants: BTreeMap<String, i64>,
    pub skipped: Vec<SkippedDecl>,
}

impl TranslationUnit {
    /// The definition of `name`, if the unit has one.
    pub fn definition(&self, name: &str) -> Option<&FunctionDecl> {
        self.functions.iter().find(|f| f.name == name && f.body.is_some())
    }

    /// The first declaration of `name`.
    pub fn declaration(&self, name: &str) -> Option<&FunctionDecl> {
        self.functions.iter().find(|f| f.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalDecl {
    pub name: String,
    pub ty: CType,
    pub init: Option<Initializer>,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stmt {
    Block(Vec<Stmt>),
    Decl(Vec<LocalDecl>),
    Expr(Expr),
    If { cond: Expr, then: Box<Stmt>, els: Option<Box<Stmt>> },
    While { cond: Expr, body: Box<Stmt> },
    DoWhile { body: Box<Stmt>, cond: Expr },
    For { init: Option<Box<Stmt>>, cond: Option<Expr>, step: Option<Expr>, body: Box<Stmt> },
    Return(Option<Expr>),
    Break,
    Continue,
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Mul,
    Div,
    Rem,
    Add,
    Sub,
    Shl,
    Shr,
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Ne,
    BitAnd,
    BitXor,
    BitOr,
    LogAnd,
    LogOr,
}

impl BinOp {
    /// Binding strength; higher binds tighter.
    pub fn precedence(self) -> u8 {
        match self {
            BinOp::LogOr => 1,
            BinOp::LogAnd => 2,
            BinOp::BitOr => 3,
            BinOp::BitXor => 4,
            BinOp::BitAnd => 5,
            BinOp::Eq | BinOp::Ne => 6,
            BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge => 7,
            BinOp::Shl | BinOp::Shr => 8,
            BinOp::Add | BinOp::Sub => 9,
            BinOp::Mul | BinOp::Div | BinOp::Rem => 10,
        }
    }

    pub fn from_punct(punct: &str) -> Option<BinOp> {
        Some(match punct {
            "*" => BinOp::Mul,
            "/" => BinOp::Div,
            "%" => BinOp::Rem,
            "+" => BinOp::Add,
            "-" => BinOp::Sub,
            "<<" => BinOp::Shl,
            ">>" => BinOp::Shr,
            "<" => BinOp::Lt,
            ">" => BinOp::Gt,
            "<=" => BinOp::Le,
            ">=" => BinOp::Ge,
            "==" => BinOp::Eq,
            "!=" => BinOp::Ne,
            "&" => BinOp::BitAnd,
            "^" => BinOp::BitXor,
            "|" => BinOp::BitOr,
            "&&" => BinOp::LogAnd,
            "||" => BinOp::LogOr,
            _ => return None,
        })
    }

    /// The operator of a compound assignment such as `+=`.
    pub fn from_compound_assign(punct: &str) -> Option<BinOp> {
        let op = punct.strip_suffix('=')?;
        match op {
            "*" | "/" | "%" | "+" | "-" | "<<" | ">>" | "&" | "^" | "|" => BinOp::from_punct(op),
            _ => None,
        }
    }

    pub fn is_comparison(self) -> bool {
        matches!(self, BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge | BinOp::Eq | BinOp::Ne)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Plus,
    Not,
    BitNot,
    Deref,
    AddrOf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expr {
    pub kind: ExprKind,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExprKind {
    IntLit { value: u64, ty: CType },
    Str(String),
    Ident(String),
    Unary(UnOp, Box<Expr>),
    IncDec { prefix: bool, increment: bool, operand: Box<Expr> },
    Binary(BinOp, Box<Expr>, Box<Expr>),
    /// `a = b` when `op` is `None`, `a op= b` otherwise
    Assign { op: Option<BinOp>, target: Box<Expr>, value: Box<Expr> },
    Cond { cond: Box<Expr>, then: Box<Expr>, els: Box<Expr> },
    Comma(Box<Expr>, Box<Expr>),
    Cast(CType, Box<Expr>),
    SizeofType(CType),
    SizeofExpr(Box<Expr>),
    Call { callee: String, args: Vec<Expr> },
    Index(Box<Expr>, Box<Expr>),
}

impl Expr {
    pub fn new(kind: ExprKind, line: usize) -> Expr {
        Expr { kind, line }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_sizes() {
        assert_eq!(CType::INT.size(), Some(4));
        assert_eq!(CType::Array(Box::new(CType::INT), 3).size(), Some(12));
        assert_eq!(CType::Opaque("struct s".into()).pointer_to().size(), Some(8));
        assert_eq!(CType::Void.size(), None);
        // Sizes that do not fit in 64 bits are unknown.
        let huge = CType::Array(Box::new(CType::INT), 1 << 62);
        assert_eq!(huge.size(), None);
    }

    #[test]
    fn check_operators() {
        assert_eq!(BinOp::from_compound_assign("<<="), Some(BinOp::Shl));
        assert_eq!(BinOp::from_compound_assign("=="), None);
        assert_eq!(BinOp::from_compound_assign("<="), None);
        assert!(BinOp::Mul.precedence() > BinOp::Add.precedence());
    }

    #[test]
    fn check_type_display() {
        let ty = CType::Int { size: 1, signed: false }.pointer_to();
        assert_eq!(ty.to_string(), "unsigned char *");
    }
}
