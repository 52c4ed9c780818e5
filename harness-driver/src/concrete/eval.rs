// Copyright Kani Contributors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Tree-walking evaluation of fixture functions on concrete inputs.

use super::memory::{
    AllocId, AllocKind, MAX_ALLOCATION, Memory, MemoryError, Pointer, address_of,
};
use crate::c_decls::ast::*;
use crate::c_decls::{ParseError, parse_function_body};
use harness_metadata::{DefectKind, OverridePolicy, StdlibFunction};
use std::collections::HashMap;
use std::rc::Rc;
use thiserror::Error;
use tracing::trace;

/// Statements and expressions evaluated before giving up.
pub const STEP_LIMIT: usize = 100_000;
/// Nested calls before giving up.
pub const DEPTH_LIMIT: usize = 256;

/// A memory safety or arithmetic defect, and the function it happened in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Defect {
    pub kind: DefectKind,
    pub function: String,
    pub message: String,
}

impl std::fmt::Display for Defect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} in `{}`: {}", self.kind, self.function, self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvalError {
    #[error("{0}")]
    Defect(Defect),
    #[error("call to unknown function `{0}`")]
    UnknownFunction(String),
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("exceeded the limit of {0} evaluation steps")]
    StepLimit(usize),
    #[error("exceeded the call depth limit of {0}")]
    StackOverflow(usize),
    #[error("cannot parse the body of `{function}`: {error}")]
    Parse { function: String, error: ParseError },
}

type EvalResult<T> = Result<T, EvalError>;

fn unsupported(message: impl Into<String>) -> EvalError {
    EvalError::Unsupported(message.into())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Value {
    Int(i128),
    Ptr(Pointer),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Typed {
    value: Value,
    ty: CType,
}

impl Typed {
    fn int(value: i128, ty: CType) -> Typed {
        Typed { value: Value::Int(wrap_to(value, &ty)), ty }
    }

    fn void() -> Typed {
        Typed { value: Value::Int(0), ty: CType::Void }
    }
}

/// An object in memory and its type.
#[derive(Debug, Clone)]
struct Place {
    ptr: Pointer,
    ty: CType,
}

enum Flow {
    Normal,
    Break,
    Continue,
    Return(Option<Typed>),
}

#[derive(Default)]
struct Scope {
    vars: HashMap<String, Place>,
    allocations: Vec<AllocId>,
}

struct Frame {
    function: String,
    scopes: Vec<Scope>,
}

/// Wrap `value` to an integer of `size` bytes.
fn wrap(value: i128, size: u8, signed: bool) -> i128 {
    let bits = u32::from(size) * 8;
    let unsigned = (value as u128) & ((1u128 << bits) - 1);
    if signed && (unsigned >> (bits - 1)) & 1 == 1 {
        unsigned as i128 - (1i128 << bits)
    } else {
        unsigned as i128
    }
}

fn wrap_to(value: i128, ty: &CType) -> i128 {
    match ty {
        CType::Int { size, signed } => wrap(value, *size, *signed),
        CType::Bool => i128::from(value != 0),
        _ => value,
    }
}

/// Integer promotion: everything narrower than `int` becomes `int`.
fn promote(ty: &CType) -> CType {
    match ty {
        CType::Int { size, signed } if *size >= 4 => CType::Int { size: *size, signed: *signed },
        _ => CType::INT,
    }
}

/// The usual arithmetic conversions, for the integer types we model.
fn common_type(lhs: &CType, rhs: &CType) -> CType {
    match (promote(lhs), promote(rhs)) {
        (CType::Int { size: ls, signed: lsg }, CType::Int { size: rs, signed: rsg }) => {
            if ls == rs {
                CType::Int { size: ls, signed: lsg && rsg }
            } else if ls > rs {
                CType::Int { size: ls, signed: lsg }
            } else {
                CType::Int { size: rs, signed: rsg }
            }
        }
        _ => CType::INT,
    }
}

/// Executes functions of one translation unit. Each instance owns a fresh memory.
pub struct Interpreter<'u> {
    unit: &'u TranslationUnit,
    policy: OverridePolicy,
    memory: Memory,
    globals: HashMap<String, Place>,
    bodies: HashMap<String, Rc<Stmt>>,
    frames: Vec<Frame>,
    steps: usize,
}

impl<'u> Interpreter<'u> {
    /// Set up the globals of `unit`: zero-initialized, then initialized in source order.
    pub fn new(unit: &'u TranslationUnit, policy: OverridePolicy) -> Result<Self, EvalError> {
        let mut interp = Interpreter {
            unit,
            policy,
            memory: Memory::default(),
            globals: HashMap::new(),
            bodies: HashMap::new(),
            frames: vec![],
            steps: 0,
        };
        let mut pending = vec![];
        for global in &unit.globals {
            if !interp.globals.contains_key(&global.name) {
                let ty = complete_array_type(global.ty.clone(), global.init.as_ref());
                // Incomplete types cannot be used anyway.
                let Some(size) = ty.size() else { continue };
                let ptr = interp.object(AllocKind::Global, size, true, &global.name)?;
                interp.globals.insert(global.name.clone(), Place { ptr, ty });
            }
            if let Some(init) = &global.init {
                pending.push((&global.name, init));
            }
        }
        for (name, init) in pending {
            if let Some(place) = interp.globals.get(name).cloned() {
                interp.initialize(&place, init)?;
            }
        }
        Ok(interp)
    }

    /// Call `name` with integer arguments and return its result as an integer.
    /// Pointers are returned as their address, `void` functions return 0.
    pub fn call(&mut self, name: &str, args: &[i64]) -> EvalResult<i64> {
        let args = args.iter().map(|arg| Typed::int(i128::from(*arg), CType::LONG)).collect();
        let result = self.call_function(name, args)?;
        Ok(match result.map(|typed| typed.value) {
            None => 0,
            Some(Value::Int(value)) => value as i64,
            Some(Value::Ptr(ptr)) => address_of(ptr) as i64,
        })
    }

    fn step(&mut self) -> EvalResult<()> {
        self.steps += 1;
        if self.steps > STEP_LIMIT { Err(EvalError::StepLimit(STEP_LIMIT)) } else { Ok(()) }
    }

    fn current_function(&self) -> String {
        self.frames.last().map_or_else(|| "<global>".to_string(), |f| f.function.clone())
    }

    fn defect(&self, error: MemoryError) -> EvalError {
        EvalError::Defect(Defect {
            kind: error.kind,
            function: self.current_function(),
            message: error.message,
        })
    }

    fn body(&mut self, function: &FunctionDecl) -> EvalResult<Rc<Stmt>> {
        if let Some(body) = self.bodies.get(&function.name) {
            return Ok(body.clone());
        }
        let body = parse_function_body(function, self.unit)
            .map_err(|error| EvalError::Parse { function: function.name.clone(), error })?;
        let body = Rc::new(body);
        self.bodies.insert(function.name.clone(), body.clone());
        Ok(body)
    }

    // ------------------------------------------------------------------------------------------
    // Calls
    // ------------------------------------------------------------------------------------------

    fn call_function(&mut self, name: &str, args: Vec<Typed>) -> EvalResult<Option<Typed>> {
        let unit = self.unit;
        let builtin = StdlibFunction::from_symbol(name);
        match (unit.definition(name), builtin) {
            (Some(_), Some(stdlib)) if self.policy == OverridePolicy::Honor => {
                trace!(%stdlib, "replacing fixture definition with the builtin model");
                self.call_builtin(stdlib, args).map(Some)
            }
            (Some(definition), _) => self.call_defined(definition, args),
            (None, Some(stdlib)) => self.call_builtin(stdlib, args).map(Some),
            (None, None) if name == "__builtin_expect" => {
                let hint = args.into_iter().next();
                hint.map(Some).ok_or_else(|| unsupported("`__builtin_expect` without arguments"))
            }
            (None, None) => Err(EvalError::UnknownFunction(name.to_string())),
        }
    }

    fn call_defined(
        &mut self,
        function: &FunctionDecl,
        args: Vec<Typed>,
    ) -> EvalResult<Option<Typed>> {
        if self.frames.len() >= DEPTH_LIMIT {
            return Err(EvalError::StackOverflow(DEPTH_LIMIT));
        }
        let body = self.body(function)?;
        let expected = function.params.len();
        if args.len() < expected || (!function.variadic && args.len() > expected) {
            return Err(unsupported(format!(
                "`{}` called with {} arguments, expected {expected}",
                function.name,
                args.len()
            )));
        }

        let mut scope = Scope::default();
        for (param, arg) in function.params.iter().zip(args) {
            let label = param.name.as_deref().unwrap_or("<parameter>");
            let size = param
                .ty
                .size()
                .ok_or_else(|| unsupported(format!("parameter of type {}", param.ty)))?;
            let ptr = self.object(AllocKind::Stack, size, false, label)?;
            let place = Place { ptr, ty: param.ty.clone() };
            self.store(&place, arg)?;
            scope.allocations.extend(ptr.alloc);
            if let Some(name) = &param.name {
                scope.vars.insert(name.clone(), place);
            }
        }

        trace!(function = %function.name, depth = self.frames.len(), "call");
        self.frames.push(Frame { function: function.name.clone(), scopes: vec![scope] });
        let flow = self.exec(&body);
        if let Some(frame) = self.frames.pop() {
            for scope in frame.scopes {
                scope.allocations.into_iter().for_each(|id| self.memory.kill(id));
            }
        }

        match flow? {
            Flow::Return(Some(value)) if function.ret != CType::Void => {
                let converted = self.convert(&value, &function.ret)?;
                Ok(Some(Typed { value: converted, ty: function.ret.clone() }))
            }
            Flow::Return(_) | Flow::Normal if function.ret == CType::Void => Ok(None),
            Flow::Return(_) | Flow::Normal => Err(unsupported(format!(
                "`{}` reached its end without returning a value",
                function.name
            ))),
            Flow::Break | Flow::Continue => {
                Err(unsupported("`break` or `continue` outside of a loop"))
            }
        }
    }

    /// The standard library model: zero-initialized heap blocks.
    fn call_builtin(&mut self, function: StdlibFunction, args: Vec<Typed>) -> EvalResult<Typed> {
        let arity = match function {
            StdlibFunction::Malloc | StdlibFunction::Free => 1,
            StdlibFunction::Calloc | StdlibFunction::Realloc => 2,
        };
        if args.len() != arity {
            return Err(unsupported(format!(
                "`{function}` called with {} arguments, expected {arity}",
                args.len()
            )));
        }
        let void_ptr = CType::Void.pointer_to();
        let result = match function {
            StdlibFunction::Malloc => {
                let size = self.as_int(&args[0]);
                self.heap_block(size, "malloc")
            }
            StdlibFunction::Calloc => {
                let size = self.as_int(&args[0]).checked_mul(self.as_int(&args[1]));
                match size {
                    Some(size) => self.heap_block(size, "calloc"),
                    None => Pointer::NULL,
                }
            }
            StdlibFunction::Realloc => {
                let old = self.as_ptr(&args[0]);
                let size = self.as_int(&args[1]);
                if old.is_null() {
                    self.heap_block(size, "realloc")
                } else if size == 0 {
                    self.memory.free(old).map_err(|e| self.defect(e))?;
                    Pointer::NULL
                } else {
                    let old_size = self.memory.block_size(old).map_err(|e| self.defect(e))?;
                    let new = self.heap_block(size, "realloc");
                    if !new.is_null() {
                        let copied = old_size.min(size as u64);
                        self.memory.copy(new, old, copied).map_err(|e| self.defect(e))?;
                        self.memory.free(old).map_err(|e| self.defect(e))?;
                    }
                    new
                }
            }
            StdlibFunction::Free => {
                let ptr = self.as_ptr(&args[0]);
                self.memory.free(ptr).map_err(|e| self.defect(e))?;
                return Ok(Typed::void());
            }
        };
        Ok(Typed { value: Value::Ptr(result), ty: void_ptr })
    }

    /// Allocate `size` zeroed heap bytes. Negative or huge sizes fail like a real allocator.
    fn heap_block(&mut self, size: i128, label: &str) -> Pointer {
        let Ok(size) = u64::try_from(size) else { return Pointer::NULL };
        let label = format!("{label}({size})");
        self.memory.allocate(AllocKind::Heap, size, true, &label).unwrap_or(Pointer::NULL)
    }

    /// Allocate a variable. Objects too large to model cannot be evaluated.
    fn object(
        &mut self,
        kind: AllocKind,
        size: u64,
        zeroed: bool,
        label: &str,
    ) -> EvalResult<Pointer> {
        self.memory.allocate(kind, size, zeroed, label).ok_or_else(|| {
            unsupported(format!("`{label}` of {size} bytes exceeds {MAX_ALLOCATION} bytes"))
        })
    }

    // ------------------------------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------------------------------

    fn push_scope(&mut self) {
        if let Some(frame) = self.frames.last_mut() {
            frame.scopes.push(Scope::default());
        }
    }

    fn pop_scope(&mut self) {
        let scope = self.frames.last_mut().and_then(|frame| frame.scopes.pop());
        if let Some(scope) = scope {
            scope.allocations.into_iter().for_each(|id| self.memory.kill(id));
        }
    }

    fn exec(&mut self, stmt: &Stmt) -> EvalResult<Flow> {
        self.step()?;
        match stmt {
            Stmt::Block(stmts) => {
                self.push_scope();
                for stmt in stmts {
                    let flow = self.exec(stmt)?;
                    if !matches!(flow, Flow::Normal) {
                        self.pop_scope();
                        return Ok(flow);
                    }
                }
                self.pop_scope();
                Ok(Flow::Normal)
            }
            Stmt::Decl(decls) => {
                for decl in decls {
                    self.declare_local(decl)?;
                }
                Ok(Flow::Normal)
            }
            Stmt::Expr(expr) => {
                self.eval(expr)?;
                Ok(Flow::Normal)
            }
            Stmt::If { cond, then, els } => {
                if self.truthy(cond)? {
                    self.exec(then)
                } else if let Some(els) = els {
                    self.exec(els)
                } else {
                    Ok(Flow::Normal)
                }
            }
            Stmt::While { cond, body } => {
                while self.truthy(cond)? {
                    match self.exec(body)? {
                        Flow::Break => break,
                        Flow::Normal | Flow::Continue => {}
                        flow @ Flow::Return(_) => return Ok(flow),
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::DoWhile { body, cond } => {
                loop {
                    match self.exec(body)? {
                        Flow::Break => break,
                        Flow::Normal | Flow::Continue => {}
                        flow @ Flow::Return(_) => return Ok(flow),
                    }
                    if !self.truthy(cond)? {
                        break;
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::For { init, cond, step, body } => {
                self.push_scope();
                let flow = self.exec_for(init.as_deref(), cond.as_ref(), step.as_ref(), body);
                self.pop_scope();
                flow
            }
            Stmt::Return(value) => {
                let value = match value {
                    Some(expr) => Some(self.eval(expr)?),
                    None => None,
                };
                Ok(Flow::Return(value))
            }
            Stmt::Break => Ok(Flow::Break),
            Stmt::Continue => Ok(Flow::Continue),
            Stmt::Empty => Ok(Flow::Normal),
        }
    }

    fn exec_for(
        &mut self,
        init: Option<&Stmt>,
        cond: Option<&Expr>,
        step: Option<&Expr>,
        body: &Stmt,
    ) -> EvalResult<Flow> {
        if let Some(init) = init {
            self.exec(init)?;
        }
        loop {
            if let Some(cond) = cond {
                if !self.truthy(cond)? {
                    break;
                }
            }
            match self.exec(body)? {
                Flow::Break => break,
                Flow::Normal | Flow::Continue => {}
                flow @ Flow::Return(_) => return Ok(flow),
            }
            if let Some(step) = step {
                self.eval(step)?;
            }
        }
        Ok(Flow::Normal)
    }

    fn declare_local(&mut self, decl: &LocalDecl) -> EvalResult<()> {
        let ty = complete_array_type(decl.ty.clone(), decl.init.as_ref());
        let size = ty
            .size()
            .ok_or_else(|| unsupported(format!("variable `{}` of type {ty}", decl.name)))?;
        let ptr = self.object(AllocKind::Stack, size, false, &decl.name)?;
        let place = Place { ptr, ty };
        if let Some(scope) = self.frames.last_mut().and_then(|f| f.scopes.last_mut()) {
            scope.allocations.extend(ptr.alloc);
            scope.vars.insert(decl.name.clone(), place.clone());
        }
        if let Some(init) = &decl.init {
            self.initialize(&place, init)?;
        }
        Ok(())
    }

    fn initialize(&mut self, place: &Place, init: &Initializer) -> EvalResult<()> {
        match (init, &place.ty) {
            (Initializer::Expr(_), CType::Array(..)) => {
                Err(unsupported("arrays initialized from an expression"))
            }
            (Initializer::Expr(expr), _) => {
                let value = self.eval(expr)?;
                self.store(place, value)
            }
            (Initializer::List(items), CType::Array(elem, len)) => {
                if items.len() as u64 > *len {
                    return Err(unsupported("too many array initializers"));
                }
                let elem_size = elem.size().unwrap_or_default();
                // Elements without an initializer are zero.
                for offset in 0..elem_size * len {
                    self.memory
                        .write_int(place.ptr.offset_by(offset as i64), 1, 0)
                        .map_err(|e| self.defect(e))?;
                }
                for (idx, item) in items.iter().enumerate() {
                    let value = self.eval(item)?;
                    let elem_place = Place {
                        ptr: place.ptr.offset_by((idx as u64 * elem_size) as i64),
                        ty: (**elem).clone(),
                    };
                    self.store(&elem_place, value)?;
                }
                Ok(())
            }
            (Initializer::List(items), _) => {
                let value = match items.first() {
                    Some(item) => self.eval(item)?,
                    None => Typed::int(0, CType::INT),
                };
                self.store(place, value)
            }
        }
    }

    // ------------------------------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------------------------------

    fn truthy(&mut self, expr: &Expr) -> EvalResult<bool> {
        let value = self.eval(expr)?;
        Ok(match value.value {
            Value::Int(v) => v != 0,
            Value::Ptr(p) => !p.is_null(),
        })
    }

    fn as_int(&self, value: &Typed) -> i128 {
        match value.value {
            Value::Int(v) => v,
            Value::Ptr(p) => address_of(p),
        }
    }

    fn as_ptr(&self, value: &Typed) -> Pointer {
        match value.value {
            Value::Ptr(p) => p,
            Value::Int(v) => self.memory.pointer_from_address(v as i64),
        }
    }

    fn convert(&self, value: &Typed, to: &CType) -> EvalResult<Value> {
        Ok(match to {
            CType::Int { .. } | CType::Bool => Value::Int(wrap_to(self.as_int(value), to)),
            CType::Pointer(_) => Value::Ptr(self.as_ptr(value)),
            CType::Void => Value::Int(0),
            CType::Array(..) | CType::Opaque(_) => {
                return Err(unsupported(format!("conversion to {to}")));
            }
        })
    }

    fn lookup(&self, name: &str) -> Option<Place> {
        if let Some(frame) = self.frames.last() {
            for scope in frame.scopes.iter().rev() {
                if let Some(place) = scope.vars.get(name) {
                    return Some(place.clone());
                }
            }
        }
        self.globals.get(name).cloned()
    }

    /// Size of the objects a pointer of type `ty` points to. `void *` steps by bytes.
    fn elem_size(ty: &CType) -> EvalResult<i64> {
        match ty.pointee() {
            Some(CType::Void) => Ok(1),
            Some(pointee) => pointee
                .size()
                .map(|size| size as i64)
                .ok_or_else(|| unsupported(format!("arithmetic on {ty}"))),
            None => Err(unsupported(format!("{ty} is not a pointer"))),
        }
    }

    fn lvalue(&mut self, expr: &Expr) -> EvalResult<Place> {
        match &expr.kind {
            ExprKind::Ident(name) => self.lookup(name).ok_or_else(|| {
                if self.unit.declaration(name).is_some() {
                    unsupported(format!("function `{name}` used as a value"))
                } else {
                    unsupported(format!("unknown identifier `{name}` at line {}", expr.line))
                }
            }),
            ExprKind::Unary(UnOp::Deref, inner) => {
                let pointer = self.eval(inner)?;
                let ty = match pointer.ty.pointee() {
                    Some(CType::Void) | None => {
                        return Err(unsupported(format!(
                            "dereference of {} at line {}",
                            pointer.ty, expr.line
                        )));
                    }
                    Some(pointee) => pointee.clone(),
                };
                Ok(Place { ptr: self.as_ptr(&pointer), ty })
            }
            ExprKind::Index(base, index) => {
                let mut base = self.eval(base)?;
                let mut index = self.eval(index)?;
                if !base.ty.is_pointer() && index.ty.is_pointer() {
                    std::mem::swap(&mut base, &mut index);
                }
                let Some(elem) = base.ty.pointee().cloned() else {
                    return Err(unsupported(format!("indexing {} at line {}", base.ty, expr.line)));
                };
                let elem_size = Self::elem_size(&base.ty)?;
                let offset = (self.as_int(&index) as i64).wrapping_mul(elem_size);
                Ok(Place { ptr: self.as_ptr(&base).offset_by(offset), ty: elem })
            }
            _ => Err(unsupported(format!("assignment to a non-lvalue at line {}", expr.line))),
        }
    }

    fn load(&self, place: &Place) -> EvalResult<Typed> {
        let value = match &place.ty {
            // Arrays decay to a pointer to their first element.
            CType::Array(elem, _) => {
                let ty = (**elem).clone().pointer_to();
                return Ok(Typed { value: Value::Ptr(place.ptr), ty });
            }
            CType::Int { size, signed } => {
                let raw = self.memory.read_int(place.ptr, u64::from(*size));
                Value::Int(wrap(raw.map_err(|e| self.defect(e))?, *size, *signed))
            }
            CType::Bool => {
                let raw = self.memory.read_int(place.ptr, 1).map_err(|e| self.defect(e))?;
                Value::Int(i128::from(raw != 0))
            }
            CType::Pointer(_) => {
                Value::Ptr(self.memory.read_pointer(place.ptr).map_err(|e| self.defect(e))?)
            }
            CType::Void | CType::Opaque(_) => {
                return Err(unsupported(format!("read of {}", place.ty)));
            }
        };
        Ok(Typed { value, ty: place.ty.clone() })
    }

    fn store(&mut self, place: &Place, value: Typed) -> EvalResult<()> {
        let converted = self.convert(&value, &place.ty)?;
        let written = match (&place.ty, converted) {
            (CType::Int { size, .. }, Value::Int(v)) => {
                self.memory.write_int(place.ptr, u64::from(*size), v)
            }
            (CType::Bool, Value::Int(v)) => self.memory.write_int(place.ptr, 1, v),
            (CType::Pointer(_), Value::Ptr(p)) => self.memory.write_pointer(place.ptr, p),
            _ => return Err(unsupported(format!("assignment to {}", place.ty))),
        };
        written.map_err(|e| self.defect(e))
    }

    fn eval(&mut self, expr: &Expr) -> EvalResult<Typed> {
        self.step()?;
        match &expr.kind {
            ExprKind::IntLit { value, ty } => Ok(Typed::int(i128::from(*value), ty.clone())),
            ExprKind::Str(_) => Err(unsupported(format!("string literal at line {}", expr.line))),
            ExprKind::Ident(_) | ExprKind::Unary(UnOp::Deref, _) | ExprKind::Index(..) => {
                let place = self.lvalue(expr)?;
                self.load(&place)
            }
            ExprKind::Unary(UnOp::AddrOf, inner) => {
                let place = self.lvalue(inner)?;
                Ok(Typed { value: Value::Ptr(place.ptr), ty: place.ty.pointer_to() })
            }
            ExprKind::Unary(op, inner) => {
                let value = self.eval(inner)?;
                self.unary(*op, value)
            }
            ExprKind::IncDec { prefix, increment, operand } => {
                let place = self.lvalue(operand)?;
                let old = self.load(&place)?;
                let op = if *increment { BinOp::Add } else { BinOp::Sub };
                let new = self.binary(op, old.clone(), Typed::int(1, CType::INT), expr.line)?;
                self.store(&place, new)?;
                if *prefix { self.load(&place) } else { Ok(old) }
            }
            ExprKind::Binary(BinOp::LogAnd, lhs, rhs) => {
                let value = self.truthy(lhs)? && self.truthy(rhs)?;
                Ok(Typed::int(i128::from(value), CType::INT))
            }
            ExprKind::Binary(BinOp::LogOr, lhs, rhs) => {
                let value = self.truthy(lhs)? || self.truthy(rhs)?;
                Ok(Typed::int(i128::from(value), CType::INT))
            }
            ExprKind::Binary(op, lhs, rhs) => {
                let lhs = self.eval(lhs)?;
                let rhs = self.eval(rhs)?;
                self.binary(*op, lhs, rhs, expr.line)
            }
            ExprKind::Assign { op, target, value } => {
                let place = self.lvalue(target)?;
                let mut value = self.eval(value)?;
                if let Some(op) = op {
                    let current = self.load(&place)?;
                    value = self.binary(*op, current, value, expr.line)?;
                }
                self.store(&place, value)?;
                self.load(&place)
            }
            ExprKind::Cond { cond, then, els } => {
                if self.truthy(cond)? { self.eval(then) } else { self.eval(els) }
            }
            ExprKind::Comma(lhs, rhs) => {
                self.eval(lhs)?;
                self.eval(rhs)
            }
            ExprKind::Cast(ty, inner) => {
                let value = self.eval(inner)?;
                if *ty == CType::Void {
                    return Ok(Typed::void());
                }
                Ok(Typed { value: self.convert(&value, ty)?, ty: ty.clone() })
            }
            ExprKind::SizeofType(ty) => {
                let size = ty.size().ok_or_else(|| unsupported(format!("sizeof({ty})")))?;
                Ok(Typed::int(i128::from(size), CType::ULONG))
            }
            ExprKind::SizeofExpr(inner) => {
                let ty = self.static_type(inner)?;
                let size = ty.size().ok_or_else(|| unsupported(format!("sizeof of {ty}")))?;
                Ok(Typed::int(i128::from(size), CType::ULONG))
            }
            ExprKind::Call { callee, args } => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval(arg)?);
                }
                Ok(self.call_function(callee, values)?.unwrap_or_else(Typed::void))
            }
        }
    }

    fn unary(&mut self, op: UnOp, value: Typed) -> EvalResult<Typed> {
        let ty = promote(&value.ty);
        let v = self.as_int(&value);
        Ok(match op {
            UnOp::Neg => Typed::int(-v, ty),
            UnOp::Plus => Typed::int(v, ty),
            UnOp::BitNot => Typed::int(!v, ty),
            UnOp::Not => {
                let truth = match value.value {
                    Value::Int(v) => v != 0,
                    Value::Ptr(p) => !p.is_null(),
                };
                Typed::int(i128::from(!truth), CType::INT)
            }
            UnOp::Deref | UnOp::AddrOf => return Err(unsupported("operator on an rvalue")),
        })
    }

    fn binary(&mut self, op: BinOp, lhs: Typed, rhs: Typed, line: usize) -> EvalResult<Typed> {
        let (lp, rp) = (lhs.ty.is_pointer(), rhs.ty.is_pointer());
        if op.is_comparison() && (lp || rp) {
            let (l, r) = (self.as_int(&lhs), self.as_int(&rhs));
            return Ok(Typed::int(i128::from(compare(op, l, r)), CType::INT));
        }
        match (op, lp, rp) {
            (BinOp::Add, true, false) | (BinOp::Sub, true, false) => {
                let scaled = (self.as_int(&rhs) as i64).wrapping_mul(Self::elem_size(&lhs.ty)?);
                let offset = if op == BinOp::Add { scaled } else { scaled.wrapping_neg() };
                let ptr = self.as_ptr(&lhs).offset_by(offset);
                return Ok(Typed { value: Value::Ptr(ptr), ty: lhs.ty });
            }
            (BinOp::Add, false, true) => {
                let scaled = (self.as_int(&lhs) as i64).wrapping_mul(Self::elem_size(&rhs.ty)?);
                let ptr = self.as_ptr(&rhs).offset_by(scaled);
                return Ok(Typed { value: Value::Ptr(ptr), ty: rhs.ty });
            }
            (BinOp::Sub, true, true) => {
                let size = i128::from(Self::elem_size(&lhs.ty)?.max(1));
                let diff = (self.as_int(&lhs) - self.as_int(&rhs)) / size;
                return Ok(Typed::int(diff, CType::LONG));
            }
            (_, false, false) => {}
            _ => return Err(unsupported(format!("pointer operands of {op:?} at line {line}"))),
        }

        let (l, r) = (self.as_int(&lhs), self.as_int(&rhs));
        if matches!(op, BinOp::Shl | BinOp::Shr) {
            let ty = promote(&lhs.ty);
            let bits = ty.size().unwrap_or(4) as i128 * 8;
            if r < 0 || r >= bits {
                return Err(unsupported(format!("shift by {r} at line {line}")));
            }
            let l = wrap_to(l, &ty);
            let value = if op == BinOp::Shl { l << r } else { l >> r };
            return Ok(Typed::int(value, ty));
        }

        let ty = common_type(&lhs.ty, &rhs.ty);
        let (l, r) = (wrap_to(l, &ty), wrap_to(r, &ty));
        if op.is_comparison() {
            return Ok(Typed::int(i128::from(compare(op, l, r)), CType::INT));
        }
        let value = match op {
            BinOp::Add => l.wrapping_add(r),
            BinOp::Sub => l.wrapping_sub(r),
            BinOp::Mul => l.wrapping_mul(r),
            BinOp::Div | BinOp::Rem if r == 0 => {
                return Err(EvalError::Defect(Defect {
                    kind: DefectKind::DivisionByZero,
                    function: self.current_function(),
                    message: format!("division by zero at line {line}"),
                }));
            }
            BinOp::Div => l / r,
            BinOp::Rem => l % r,
            BinOp::BitAnd => l & r,
            BinOp::BitOr => l | r,
            BinOp::BitXor => l ^ r,
            _ => return Err(unsupported(format!("operator {op:?} at line {line}"))),
        };
        Ok(Typed::int(value, ty))
    }

    /// The type of an expression, without evaluating it.
    fn static_type(&self, expr: &Expr) -> EvalResult<CType> {
        Ok(match &expr.kind {
            ExprKind::IntLit { ty, .. } | ExprKind::Cast(ty, _) => ty.clone(),
            ExprKind::Ident(name) => match self.lookup(name) {
                Some(place) => place.ty,
                None => return Err(unsupported(format!("sizeof of unknown `{name}`"))),
            },
            ExprKind::Unary(UnOp::Deref, inner) | ExprKind::Index(inner, _) => {
                let ty = self.static_type(inner)?;
                ty.pointee().cloned().ok_or_else(|| unsupported(format!("dereference of {ty}")))?
            }
            ExprKind::Unary(UnOp::AddrOf, inner) => self.static_type(inner)?.pointer_to(),
            ExprKind::Unary(UnOp::Not, _) => CType::INT,
            ExprKind::Unary(_, inner) => promote(&self.static_type(inner)?),
            ExprKind::SizeofType(_) | ExprKind::SizeofExpr(_) => CType::ULONG,
            ExprKind::Binary(op, lhs, rhs) => {
                if op.is_comparison() || matches!(op, BinOp::LogAnd | BinOp::LogOr) {
                    CType::INT
                } else {
                    let (l, r) = (self.static_type(lhs)?, self.static_type(rhs)?);
                    match (&l, &r) {
                        (CType::Pointer(_), CType::Pointer(_)) => CType::LONG,
                        (CType::Pointer(_), _) => l,
                        (_, CType::Pointer(_)) => r,
                        _ if matches!(op, BinOp::Shl | BinOp::Shr) => promote(&l),
                        _ => common_type(&l, &r),
                    }
                }
            }
            ExprKind::Assign { target, .. } => self.static_type(target)?,
            ExprKind::IncDec { operand, .. } => self.static_type(operand)?,
            ExprKind::Cond { then, .. } => self.static_type(then)?,
            ExprKind::Comma(_, rhs) => self.static_type(rhs)?,
            ExprKind::Call { callee, .. } => match self.unit.declaration(callee) {
                Some(decl) => decl.ret.clone(),
                None => return Err(EvalError::UnknownFunction(callee.clone())),
            },
            ExprKind::Str(_) => return Err(unsupported("string literals")),
        })
    }
}

fn compare(op: BinOp, l: i128, r: i128) -> bool {
    match op {
        BinOp::Lt => l < r,
        BinOp::Gt => l > r,
        BinOp::Le => l <= r,
        BinOp::Ge => l >= r,
        BinOp::Eq => l == r,
        _ => l != r,
    }
}

/// `int a[] = {1, 2}` takes its length from the initializer list.
fn complete_array_type(ty: CType, init: Option<&Initializer>) -> CType {
    match (ty, init) {
        (CType::Array(elem, 0), Some(Initializer::List(items))) => {
            CType::Array(elem, items.len() as u64)
        }
        (ty, _) => ty,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::c_decls::parse_translation_unit;

    fn run(src: &str, function: &str, args: &[i64]) -> EvalResult<i64> {
        let unit = parse_translation_unit(src).unwrap();
        Interpreter::new(&unit, OverridePolicy::Honor)?.call(function, args)
    }

    fn defect_kind(result: EvalResult<i64>) -> DefectKind {
        match result {
            Err(EvalError::Defect(defect)) => defect.kind,
            other => panic!("expected a defect, got {other:?}"),
        }
    }

    #[test]
    fn check_integer_semantics() {
        assert_eq!(wrap(256, 1, false), 0);
        assert_eq!(wrap(255, 1, true), -1);
        assert_eq!(wrap(-1, 4, false), 0xffff_ffff);
        let src = "int f(int x) { unsigned char c = x; return c + (-7 / 2) + (-7 % 2); }\n\
                   int g(void) { unsigned u = 0; return u - 1 > 0; }\n\
                   long h(void) { int x = 2147483647; x++; return x; }\n";
        assert_eq!(run(src, "f", &[300]), Ok(44 - 3 - 1));
        assert_eq!(run(src, "g", &[]), Ok(1));
        assert_eq!(run(src, "h", &[]), Ok(-2147483648));
    }

    #[test]
    fn check_control_flow() {
        let src = "int sum(int n) {\n\
                     int total = 0;\n\
                     for (int i = 0; i < n; i++) {\n\
                       if (i == 3) continue; if (i > 6) break; total += i;\n\
                     }\n\
                     int k = 0; while (1) { if (++k >= 2) break; }\n\
                     do { total += 100; } while (0);\n\
                     return total + k;\n\
                   }\n";
        // 0+1+2+4+5+6 = 18, +100, +2
        assert_eq!(run(src, "sum", &[10]), Ok(120));
    }

    #[test]
    fn check_arrays_pointers_and_globals() {
        let src = "int table[4] = {1, 2};\n\
                   int counter;\n\
                   int bump(int *p) { *p += 5; return *p; }\n\
                   int f(void) {\n\
                     int local[] = {10, 20, 30};\n\
                     int *q = local + 1;\n\
                     counter = bump(&table[3]) + q[1] + table[0] + (int)(q - local);\n\
                     return counter + sizeof(local) + sizeof *q;\n\
                   }\n";
        // 5 + 30 + 1 + 1 = 37, + 12 + 4
        assert_eq!(run(src, "f", &[]), Ok(53));
    }

    #[test]
    fn check_memory_defects() {
        let src = "void *malloc(unsigned long n);\n\
                   void free(void *p);\n\
                   int uaf(void) { int *p = malloc(4); free(p); return *p; }\n\
                   int df(void) { int *p = malloc(4); free(p); free(p); return 0; }\n\
                   int oob(void) { int a[2] = {0}; return a[2]; }\n\
                   int uninit(void) { int x; return x + 1; }\n\
                   int null(void) { int *p = 0; return *p; }\n\
                   int div(int d) { return 10 / d; }\n\
                   int bad_free(void) { int x = 0; free(&x); return 0; }\n\
                   int *dangling(void) { int x = 1; return &x; }\n\
                   int escape(void) { return *dangling(); }\n";
        assert_eq!(defect_kind(run(src, "uaf", &[])), DefectKind::UseAfterFree);
        assert_eq!(defect_kind(run(src, "df", &[])), DefectKind::DoubleFree);
        assert_eq!(defect_kind(run(src, "oob", &[])), DefectKind::OutOfBounds);
        assert_eq!(defect_kind(run(src, "uninit", &[])), DefectKind::UninitializedRead);
        assert_eq!(defect_kind(run(src, "null", &[])), DefectKind::NullDereference);
        assert_eq!(defect_kind(run(src, "div", &[0])), DefectKind::DivisionByZero);
        assert_eq!(run(src, "div", &[3]), Ok(3));
        assert_eq!(defect_kind(run(src, "bad_free", &[])), DefectKind::InvalidFree);
        assert_eq!(defect_kind(run(src, "escape", &[])), DefectKind::UseAfterFree);
    }

    #[test]
    fn check_builtin_allocators() {
        let src = "void *calloc(unsigned long n, unsigned long s);\n\
                   void *realloc(void *p, unsigned long s);\n\
                   void *malloc(unsigned long n);\n\
                   int f(void) {\n\
                     int *a = calloc(2, sizeof(int));\n\
                     a[1] = 7;\n\
                     a = realloc(a, 4 * sizeof(int));\n\
                     int *m = malloc(sizeof(int));\n\
                     return a[1] + a[3] + *m;\n\
                   }\n";
        assert_eq!(run(src, "f", &[]), Ok(7));
    }

    #[test]
    fn check_arithmetic_wraps_without_panicking() {
        let src = "unsigned long square(void) { unsigned long x = 0; x = x - 1; return x * x; }\n\
                   int at(long i) { int a[2] = {0}; return a[i]; }\n\
                   int past(long i) { int a[2] = {0}; int *p = a + i; return *(p - i); }\n";
        assert_eq!(run(src, "square", &[]), Ok(1));
        assert_eq!(defect_kind(run(src, "at", &[1 << 61])), DefectKind::OutOfBounds);
        assert_eq!(defect_kind(run(src, "at", &[-1])), DefectKind::OutOfBounds);
        assert_eq!(run(src, "past", &[1 << 61]), Ok(0));
    }

    #[test]
    fn check_oversized_objects() {
        let src = "void *malloc(unsigned long n);\n\
                   int local(void) { char buf[1099511627776]; return 0; }\n\
                   int heap(void) { char *p = malloc(0xffffffff); return p == 0; }\n\
                   int unknown(void) { int a[4611686018427387904]; return 0; }\n";
        assert!(matches!(run(src, "local", &[]), Err(EvalError::Unsupported(_))));
        assert_eq!(run(src, "heap", &[]), Ok(1));
        assert!(matches!(run(src, "unknown", &[]), Err(EvalError::Unsupported(_))));

        let unit = parse_translation_unit("char big[1 << 30];\n").unwrap();
        let err = Interpreter::new(&unit, OverridePolicy::Honor).err();
        assert!(matches!(err, Some(EvalError::Unsupported(_))));
    }

    #[test]
    fn check_override_policy() {
        let src = "void *malloc(unsigned long n) { return 0; }\n\
                   int f(void) { int *p = malloc(4); return p == 0; }\n";
        let unit = parse_translation_unit(src).unwrap();
        let honored = Interpreter::new(&unit, OverridePolicy::Honor).unwrap().call("f", &[]);
        let ignored = Interpreter::new(&unit, OverridePolicy::Ignore).unwrap().call("f", &[]);
        assert_eq!(honored, Ok(0));
        assert_eq!(ignored, Ok(1));
    }

    #[test]
    fn check_limits_and_unsupported() {
        let src = "int spin(void) { while (1) {} return 0; }\n\
                   int rec(int n) { return rec(n + 1); }\n\
                   int ext(void) { return missing(); }\n\
                   int noret(void) { }\n";
        assert_eq!(run(src, "spin", &[]), Err(EvalError::StepLimit(STEP_LIMIT)));
        assert_eq!(run(src, "rec", &[0]), Err(EvalError::StackOverflow(DEPTH_LIMIT)));
        assert_eq!(run(src, "ext", &[]), Err(EvalError::UnknownFunction("missing".into())));
        assert!(matches!(run(src, "noret", &[]), Err(EvalError::Unsupported(_))));
        assert_eq!(run(src, "nothing", &[]), Err(EvalError::UnknownFunction("nothing".into())));
    }
}
