//! The expression and statement intermediate representation.
//!
//! Expressions form a DAG: one subexpression may be reachable from several
//! registers and several statements at once, so every variant is a cheap
//! clone of a reference-counted payload and nothing is ever deep-copied.
//! Structural equality covers all fields except types (types refine through
//! union-find and must not affect identity); [`EvalOnceExpr`] and [`PhiExpr`]
//! compare by identity, since their use counters are what gives them meaning.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt::{self, Display};
use std::rc::{Rc, Weak};

use crate::flow::NodeId;
use crate::reg::Reg;
use crate::types::Type;

/// A C-level binary operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl BinOp {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge
        )
    }

    /// The comparison testing the opposite condition.
    pub fn negated(self) -> Option<BinOp> {
        match self {
            BinOp::Eq => Some(BinOp::Ne),
            BinOp::Ne => Some(BinOp::Eq),
            BinOp::Lt => Some(BinOp::Ge),
            BinOp::Ge => Some(BinOp::Lt),
            BinOp::Gt => Some(BinOp::Le),
            BinOp::Le => Some(BinOp::Gt),
            _ => None,
        }
    }
}

impl Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::BitAnd => "&",
            BinOp::BitOr => "|",
            BinOp::BitXor => "^",
            BinOp::Shl => "<<",
            BinOp::Shr => ">>",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg,
}

impl Display for UnOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnOp::Neg => f.write_str("-"),
        }
    }
}

#[derive(Debug)]
pub struct BinaryExpr {
    pub left: Expr,
    pub op: BinOp,
    pub right: Expr,
    pub ty: Type,
}

#[derive(Debug)]
pub struct UnaryExpr {
    pub op: UnOp,
    pub expr: Expr,
    pub ty: Type,
}

#[derive(Debug)]
pub struct CastExpr {
    pub expr: Expr,
    pub ty: Type,
    pub reinterpret: bool,
    pub silent: bool,
}

#[derive(Debug)]
pub struct CallExpr {
    pub function: String,
    pub args: Vec<Expr>,
    pub ty: Type,
}

#[derive(Debug)]
pub struct LocalVar {
    pub offset: i64,
    pub ty: Type,
}

#[derive(Debug)]
pub struct PassedInArg {
    pub offset: i64,
    pub copied: bool,
    pub ty: Type,
}

#[derive(Debug)]
pub struct SubroutineArg {
    pub offset: i64,
    pub ty: Type,
}

#[derive(Debug)]
pub struct StructAccess {
    pub base: Expr,
    pub offset: i64,
    pub ty: Type,
}

#[derive(Debug)]
pub struct GlobalSymbol {
    pub name: String,
    pub ty: Type,
}

#[derive(Debug)]
pub struct Literal {
    pub value: i64,
    pub ty: Type,
}

#[derive(Debug)]
pub struct AddressOf {
    pub expr: Expr,
    pub ty: Type,
}

/// Per-prefix counters for lazily generated temporary names. Shared between
/// the stack info and every [`EvalOnceExpr`], so that only temporaries that
/// actually materialize consume a number.
pub type TempCounters = Rc<RefCell<HashMap<String, u32>>>;

/// "Compute this once; name it if it ends up used more than once."
///
/// The printed form is the wrapped expression while there is at most one
/// use; reaching a second use materializes the generated variable name.
#[derive(Debug)]
pub struct EvalOnceExpr {
    pub wrapped: Expr,
    pub always_emit: bool,
    pub ty: Type,
    prefix: String,
    name: RefCell<Option<String>>,
    counters: TempCounters,
    num_usages: Cell<u32>,
}

impl EvalOnceExpr {
    pub fn new(wrapped: Expr, always_emit: bool, prefix: &str, counters: TempCounters) -> Rc<Self> {
        let ty = wrapped.ty();
        Rc::new(EvalOnceExpr {
            wrapped,
            always_emit,
            ty,
            prefix: prefix.to_owned(),
            name: RefCell::new(None),
            counters,
            num_usages: Cell::new(0),
        })
    }

    pub fn num_usages(&self) -> u32 {
        self.num_usages.get()
    }

    /// The generated variable name, allocated on first request.
    pub fn var_name(&self) -> String {
        let mut name = self.name.borrow_mut();
        if let Some(name) = &*name {
            return name.clone();
        }
        let mut counters = self.counters.borrow_mut();
        let counter = counters.entry(self.prefix.clone()).or_insert(0);
        *counter += 1;
        let generated = if *counter > 1 {
            format!("temp_{}_{}", self.prefix, counter)
        } else {
            format!("temp_{}", self.prefix)
        };
        *name = Some(generated.clone());
        generated
    }
}

/// A placeholder at a control-flow join for a register whose value depends
/// on the path taken. Resolved after the whole function is translated.
#[derive(Debug)]
pub struct PhiExpr {
    pub reg: Reg,
    pub node: NodeId,
    pub ty: Type,
    name: RefCell<Option<String>>,
    num_usages: Cell<u32>,
    replacement: RefCell<Option<Expr>>,
    used_by: RefCell<Option<Weak<PhiExpr>>>,
}

impl PhiExpr {
    pub fn new(reg: Reg, node: NodeId) -> Rc<Self> {
        Rc::new(PhiExpr {
            reg,
            node,
            ty: Type::any(),
            name: RefCell::new(None),
            num_usages: Cell::new(0),
            replacement: RefCell::new(None),
            used_by: RefCell::new(None),
        })
    }

    pub fn num_usages(&self) -> u32 {
        self.num_usages.get()
    }

    pub fn replacement(&self) -> Option<Expr> {
        self.replacement.borrow().clone()
    }

    pub fn set_replacement(&self, expr: Expr) {
        *self.replacement.borrow_mut() = Some(expr);
    }

    pub fn set_name(&self, name: String) {
        *self.name.borrow_mut() = Some(name);
    }

    pub fn var_name(&self) -> String {
        match &*self.name.borrow() {
            Some(name) => name.clone(),
            None => format!("unnamed-phi({})", self.reg),
        }
    }

    /// Follow single-use chains of phis to the one that will actually carry
    /// a name, so `phi_a = phi_b; phi_b = x;` collapses into one variable.
    pub fn propagates_to(self: &Rc<Self>) -> Rc<PhiExpr> {
        let mut current = self.clone();
        loop {
            if current.num_usages.get() != 1 {
                return current;
            }
            let next = match &*current.used_by.borrow() {
                Some(weak) => weak.upgrade(),
                None => None,
            };
            match next {
                Some(next) => current = next,
                None => return current,
            }
        }
    }
}

/// An expression in the translated function body.
#[derive(Debug, Clone)]
pub enum Expr {
    Binary(Rc<BinaryExpr>),
    Unary(Rc<UnaryExpr>),
    Cast(Rc<CastExpr>),
    Call(Rc<CallExpr>),
    Local(Rc<LocalVar>),
    Arg(Rc<PassedInArg>),
    SubArg(Rc<SubroutineArg>),
    Struct(Rc<StructAccess>),
    Global(Rc<GlobalSymbol>),
    Lit(Rc<Literal>),
    AddrOf(Rc<AddressOf>),
    Once(Rc<EvalOnceExpr>),
    Phi(Rc<PhiExpr>),
}

impl Expr {
    pub fn lit(value: i64) -> Expr {
        Expr::Lit(Rc::new(Literal {
            value,
            ty: Type::any(),
        }))
    }

    pub fn typed_lit(value: i64, ty: Type) -> Expr {
        Expr::Lit(Rc::new(Literal { value, ty }))
    }

    pub fn addr_of(expr: Expr) -> Expr {
        Expr::AddrOf(Rc::new(AddressOf {
            expr,
            ty: Type::ptr(),
        }))
    }

    pub fn unary(op: UnOp, expr: Expr, ty: Type) -> Expr {
        Expr::Unary(Rc::new(UnaryExpr { op, expr, ty }))
    }

    pub fn cast(expr: Expr, ty: Type, reinterpret: bool, silent: bool) -> Expr {
        Expr::Cast(Rc::new(CastExpr {
            expr,
            ty,
            reinterpret,
            silent,
        }))
    }

    /// The type handle carried by this expression.
    pub fn ty(&self) -> Type {
        match self {
            Expr::Binary(e) => e.ty.clone(),
            Expr::Unary(e) => e.ty.clone(),
            Expr::Cast(e) => e.ty.clone(),
            Expr::Call(e) => e.ty.clone(),
            Expr::Local(e) => e.ty.clone(),
            Expr::Arg(e) => e.ty.clone(),
            Expr::SubArg(e) => e.ty.clone(),
            Expr::Struct(e) => e.ty.clone(),
            Expr::Global(e) => e.ty.clone(),
            Expr::Lit(e) => e.ty.clone(),
            Expr::AddrOf(e) => e.ty.clone(),
            Expr::Once(e) => e.ty.clone(),
            Expr::Phi(e) => e.ty.clone(),
        }
    }
}

impl PartialEq for Expr {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Expr::Binary(a), Expr::Binary(b)) => {
                a.op == b.op && a.left == b.left && a.right == b.right
            }
            (Expr::Unary(a), Expr::Unary(b)) => a.op == b.op && a.expr == b.expr,
            (Expr::Cast(a), Expr::Cast(b)) => {
                a.reinterpret == b.reinterpret && a.silent == b.silent && a.expr == b.expr
            }
            (Expr::Call(a), Expr::Call(b)) => a.function == b.function && a.args == b.args,
            (Expr::Local(a), Expr::Local(b)) => a.offset == b.offset,
            // `copied` is bookkeeping that distinguishes "as received" from
            // "as used"; both stand for the same incoming argument.
            (Expr::Arg(a), Expr::Arg(b)) => a.offset == b.offset,
            (Expr::SubArg(a), Expr::SubArg(b)) => a.offset == b.offset,
            (Expr::Struct(a), Expr::Struct(b)) => a.offset == b.offset && a.base == b.base,
            (Expr::Global(a), Expr::Global(b)) => a.name == b.name,
            (Expr::Lit(a), Expr::Lit(b)) => a.value == b.value,
            (Expr::AddrOf(a), Expr::AddrOf(b)) => a.expr == b.expr,
            (Expr::Once(a), Expr::Once(b)) => Rc::ptr_eq(a, b),
            (Expr::Phi(a), Expr::Phi(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Eq for Expr {}

/// Unify the expression's type with `ty`; where the unification is lossy or
/// the caller wants the cast spelled out, wrap in a reinterpreting cast.
pub fn as_type(expr: Expr, ty: Type, silent: bool) -> Expr {
    if expr.ty().unify(&ty) && silent {
        expr
    } else {
        Expr::cast(expr, ty, true, false)
    }
}

pub fn as_f32(expr: Expr) -> Expr {
    as_type(expr, Type::f32(), true)
}

pub fn as_f64(expr: Expr) -> Expr {
    as_type(expr, Type::f64(), true)
}

pub fn as_s32(expr: Expr) -> Expr {
    as_type(expr, Type::s32(), false)
}

pub fn as_u32(expr: Expr) -> Expr {
    as_type(expr, Type::u32(), false)
}

pub fn as_intish(expr: Expr) -> Expr {
    as_type(expr, Type::intish(), true)
}

pub fn as_intptr(expr: Expr) -> Expr {
    as_type(expr, Type::intptr(), true)
}

impl BinaryExpr {
    fn build(left: Expr, op: BinOp, right: Expr, ty: Type) -> Expr {
        Expr::Binary(Rc::new(BinaryExpr {
            left,
            op,
            right,
            ty,
        }))
    }

    pub fn int(left: Expr, op: BinOp, right: Expr) -> Expr {
        Self::build(as_intish(left), op, as_intish(right), Type::intish())
    }

    pub fn intptr(left: Expr, op: BinOp, right: Expr) -> Expr {
        Self::build(as_intptr(left), op, as_intptr(right), Type::intptr())
    }

    pub fn icmp(left: Expr, op: BinOp, right: Expr) -> Expr {
        Self::build(as_intptr(left), op, as_intptr(right), Type::bool())
    }

    pub fn ucmp(left: Expr, op: BinOp, right: Expr) -> Expr {
        Self::build(as_u32(left), op, as_u32(right), Type::bool())
    }

    pub fn fcmp(left: Expr, op: BinOp, right: Expr) -> Expr {
        Self::build(as_f32(left), op, as_f32(right), Type::bool())
    }

    pub fn dcmp(left: Expr, op: BinOp, right: Expr) -> Expr {
        Self::build(as_f64(left), op, as_f64(right), Type::bool())
    }

    pub fn s32(left: Expr, op: BinOp, right: Expr) -> Expr {
        Self::build(as_s32(left), op, as_s32(right), Type::s32())
    }

    pub fn u32(left: Expr, op: BinOp, right: Expr) -> Expr {
        Self::build(as_u32(left), op, as_u32(right), Type::u32())
    }

    pub fn f32(left: Expr, op: BinOp, right: Expr) -> Expr {
        Self::build(as_f32(left), op, as_f32(right), Type::f32())
    }

    pub fn f64(left: Expr, op: BinOp, right: Expr) -> Expr {
        Self::build(as_f64(left), op, as_f64(right), Type::f64())
    }

    pub fn is_boolean(&self) -> bool {
        self.op.is_comparison()
    }

    /// The comparison testing the opposite condition. Only meaningful for
    /// boolean operators.
    pub fn negated(&self) -> Expr {
        let op = self.op.negated().unwrap_or(self.op);
        Self::build(self.left.clone(), op, self.right.clone(), Type::bool())
    }
}

/// Record one use of the expression, descending its dependency tree.
///
/// An [`EvalOnceExpr`] that reaches its first use propagates the marking
/// into its wrapped expression; further uses do not, so the dependencies of
/// a materialized temporary are counted exactly once. A [`PhiExpr`] joins
/// the used-phi worklist on its first use.
pub fn mark_used(expr: &Expr, used_phis: &mut Vec<Rc<PhiExpr>>) {
    match expr {
        Expr::Once(once) => {
            let uses = once.num_usages.get() + 1;
            once.num_usages.set(uses);
            if uses == 1 && !once.always_emit {
                mark_used(&once.wrapped, used_phis);
            }
        }
        Expr::Phi(phi) => mark_phi_used(phi, None, used_phis),
        Expr::Binary(e) => {
            mark_used(&e.left, used_phis);
            mark_used(&e.right, used_phis);
        }
        Expr::Unary(e) => mark_used(&e.expr, used_phis),
        Expr::Cast(e) => mark_used(&e.expr, used_phis),
        Expr::Call(e) => {
            for arg in &e.args {
                mark_used(arg, used_phis);
            }
        }
        Expr::Struct(e) => mark_used(&e.base, used_phis),
        Expr::AddrOf(e) => mark_used(&e.expr, used_phis),
        Expr::Local(_) | Expr::Arg(_) | Expr::SubArg(_) | Expr::Global(_) | Expr::Lit(_) => {}
    }
}

/// Record one use of a phi, remembering whether that use came from another
/// phi's assignment so single-use chains can later collapse into one name.
pub fn mark_phi_used(
    phi: &Rc<PhiExpr>,
    from_phi: Option<&Rc<PhiExpr>>,
    used_phis: &mut Vec<Rc<PhiExpr>>,
) {
    if phi.num_usages.get() == 0 {
        used_phis.push(phi.clone());
    }
    phi.num_usages.set(phi.num_usages.get() + 1);
    *phi.used_by.borrow_mut() = from_phi.map(Rc::downgrade);
}

/// A stable identity for an expression node, distinct from its structural
/// value. Interning keys for struct accesses use this so that two accesses
/// through the very same base expression share a type term.
pub fn identity(expr: &Expr) -> usize {
    match expr {
        Expr::Binary(e) => Rc::as_ptr(e) as usize,
        Expr::Unary(e) => Rc::as_ptr(e) as usize,
        Expr::Cast(e) => Rc::as_ptr(e) as usize,
        Expr::Call(e) => Rc::as_ptr(e) as usize,
        Expr::Local(e) => Rc::as_ptr(e) as usize,
        Expr::Arg(e) => Rc::as_ptr(e) as usize,
        Expr::SubArg(e) => Rc::as_ptr(e) as usize,
        Expr::Struct(e) => Rc::as_ptr(e) as usize,
        Expr::Global(e) => Rc::as_ptr(e) as usize,
        Expr::Lit(e) => Rc::as_ptr(e) as usize,
        Expr::AddrOf(e) => Rc::as_ptr(e) as usize,
        Expr::Once(e) => Rc::as_ptr(e) as usize,
        Expr::Phi(e) => Rc::as_ptr(e) as usize,
    }
}

/// Whether re-evaluating the expression at every use site is acceptable.
/// Anything else gets wrapped in an [`EvalOnceExpr`] when written to a
/// register.
pub fn is_repeatable(expr: &Expr) -> bool {
    match expr {
        Expr::Once(_)
        | Expr::Lit(_)
        | Expr::Global(_)
        | Expr::Local(_)
        | Expr::Arg(_)
        | Expr::SubArg(_) => true,
        Expr::AddrOf(e) => is_repeatable(&e.expr),
        Expr::Struct(e) => is_repeatable(&e.base),
        _ => false,
    }
}

/// Whether an expression's type is apparent from its printed form, e.g.
/// because it refers to a declared variable. Used to suppress redundant
/// reinterpreting casts.
pub fn is_type_obvious(expr: &Expr) -> bool {
    match expr {
        Expr::Cast(_) | Expr::Lit(_) | Expr::AddrOf(_) | Expr::Local(_) | Expr::Arg(_) => true,
        Expr::Once(once) => once.num_usages.get() > 1 || is_type_obvious(&once.wrapped),
        _ => false,
    }
}

fn write_hex(f: &mut fmt::Formatter<'_>, value: i64) -> fmt::Result {
    if value < 0 {
        write!(f, "-{:#x}", -(value as i128))
    } else {
        write!(f, "{value:#x}")
    }
}

impl Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Binary(e) => write!(f, "({} {} {})", e.left, e.op, e.right),
            Expr::Unary(e) => write!(f, "{}{}", e.op, e.expr),
            Expr::Cast(e) => {
                if e.reinterpret && (e.silent || is_type_obvious(&e.expr)) {
                    write!(f, "{}", e.expr)
                } else if e.reinterpret && e.expr.ty().is_float() != e.ty.is_float() {
                    // This shouldn't happen, but mark it in the output if it does.
                    write!(f, "(bitwise {}) {}", e.ty, e.expr)
                } else {
                    write!(f, "({}) {}", e.ty, e.expr)
                }
            }
            Expr::Call(e) => {
                write!(f, "{}(", e.function)?;
                for (i, arg) in e.args.iter().enumerate() {
                    if i != 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                write!(f, ")")
            }
            Expr::Local(e) => write!(f, "sp{:X}", e.offset),
            Expr::Arg(e) => {
                if e.offset % 4 == 0 {
                    write!(f, "arg{:X}", e.offset / 4)
                } else {
                    write!(f, "arg_unaligned{:X}", e.offset)
                }
            }
            Expr::SubArg(e) => write!(f, "subroutine_arg{:X}", e.offset / 4),
            Expr::Struct(e) => match &e.base {
                Expr::AddrOf(addr) if e.offset == 0 => write!(f, "{}", addr.expr),
                Expr::AddrOf(addr) => write!(f, "{}.unk{:X}", addr.expr, e.offset),
                base if e.offset == 0 => write!(f, "*{base}"),
                base => write!(f, "{base}->unk{:X}", e.offset),
            },
            Expr::Global(e) => f.write_str(&e.name),
            Expr::Lit(e) => {
                if e.ty.is_float() {
                    return if e.ty.size() == 32 {
                        write!(f, "{:?}f", f32::from_bits(e.value as u32))
                    } else {
                        write!(f, "{:?}", f64::from_bits(e.value as u64))
                    };
                }
                if e.ty.is_pointer() {
                    if e.value == 0 {
                        return f.write_str("NULL");
                    }
                    f.write_str("(void *)")?;
                } else if e.ty.size() == 8 {
                    f.write_str("(u8)")?;
                } else if e.ty.size() == 16 {
                    f.write_str("(u16)")?;
                }
                if e.value.abs() < 10 {
                    write!(f, "{}", e.value)?;
                } else {
                    write_hex(f, e.value)?;
                }
                if e.ty.is_unsigned() {
                    f.write_str("U")?;
                }
                Ok(())
            }
            Expr::AddrOf(e) => write!(f, "&{}", e.expr),
            Expr::Once(e) => {
                if e.num_usages.get() <= 1 {
                    write!(f, "{}", e.wrapped)
                } else {
                    f.write_str(&e.var_name())
                }
            }
            Expr::Phi(e) => match e.replacement() {
                Some(replacement) => write!(f, "{replacement}"),
                None => f.write_str(&e.var_name()),
            },
        }
    }
}

#[derive(Debug)]
pub struct StoreStmt {
    pub source: Expr,
    pub dest: Expr,
}

#[derive(Debug)]
pub struct SetPhiStmt {
    pub phi: Rc<PhiExpr>,
    pub expr: Expr,
}

/// A statement in a translated block, in instruction order.
#[derive(Debug, Clone)]
pub enum Stmt {
    Store(Rc<StoreStmt>),
    EvalOnce(Rc<EvalOnceExpr>),
    SetPhi(Rc<SetPhiStmt>),
    Comment(String),
}

impl Stmt {
    /// Whether the emitter should print this statement. Temporaries that
    /// were inlined at their single use site and phi assignments that merely
    /// forward to the same ultimate phi are suppressed.
    pub fn should_write(&self) -> bool {
        match self {
            Stmt::Store(_) | Stmt::Comment(_) => true,
            Stmt::EvalOnce(once) => {
                if once.always_emit {
                    once.num_usages() != 1
                } else {
                    once.num_usages() > 1
                }
            }
            Stmt::SetPhi(set) => {
                if let Expr::Phi(source) = &set.expr {
                    let target = source.propagates_to();
                    if !Rc::ptr_eq(&target, source) {
                        debug_assert!(Rc::ptr_eq(&target, &set.phi.propagates_to()));
                        return false;
                    }
                }
                true
            }
        }
    }

    /// Whether the emitter must declare a variable for this statement.
    pub fn need_decl(&self) -> bool {
        matches!(self, Stmt::EvalOnce(once) if once.num_usages() > 1)
    }
}

impl Display for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stmt::Store(store) => write!(f, "{} = {};", store.dest, store.source),
            Stmt::EvalOnce(once) => {
                if once.always_emit && once.num_usages() == 0 {
                    write!(f, "{};", once.wrapped)
                } else {
                    write!(f, "{} = {};", once.var_name(), once.wrapped)
                }
            }
            Stmt::SetPhi(set) => {
                write!(f, "{} = {};", set.phi.propagates_to().var_name(), set.expr)
            }
            Stmt::Comment(text) => write!(f, "// {text}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counters() -> TempCounters {
        Rc::new(RefCell::new(HashMap::new()))
    }

    #[test]
    fn equality_ignores_types() {
        let a = Expr::typed_lit(5, Type::any());
        let b = Expr::typed_lit(5, Type::u32());
        assert_eq!(a, b);
        assert!(a.ty().unify(&Type::s32()));
        assert_eq!(a, b);
    }

    #[test]
    fn eval_once_counts_uses_and_propagates_once() {
        let mut used_phis = Vec::new();
        let inner = EvalOnceExpr::new(
            BinaryExpr::int(Expr::lit(1), BinOp::Add, Expr::lit(2)),
            false,
            "t0",
            counters(),
        );
        let outer = EvalOnceExpr::new(
            BinaryExpr::int(Expr::Once(inner.clone()), BinOp::Add, Expr::lit(3)),
            false,
            "t1",
            counters(),
        );
        let expr = Expr::Once(outer.clone());
        mark_used(&expr, &mut used_phis);
        assert_eq!(outer.num_usages(), 1);
        assert_eq!(inner.num_usages(), 1);
        // A second use of the outer temporary materializes it; the inner
        // dependency is not counted again.
        mark_used(&expr, &mut used_phis);
        assert_eq!(outer.num_usages(), 2);
        assert_eq!(inner.num_usages(), 1);
        assert!(Stmt::EvalOnce(outer.clone()).should_write());
        assert!(!Stmt::EvalOnce(inner).should_write());
    }

    #[test]
    fn temp_names_number_per_prefix() {
        let counters = counters();
        let a = EvalOnceExpr::new(Expr::lit(1), false, "v0", counters.clone());
        let b = EvalOnceExpr::new(Expr::lit(2), false, "v0", counters.clone());
        let c = EvalOnceExpr::new(Expr::lit(3), false, "a1", counters);
        assert_eq!(a.var_name(), "temp_v0");
        assert_eq!(a.var_name(), "temp_v0");
        assert_eq!(b.var_name(), "temp_v0_2");
        assert_eq!(c.var_name(), "temp_a1");
    }

    #[test]
    fn phi_joins_worklist_on_first_use() {
        let mut used_phis = Vec::new();
        let phi = PhiExpr::new(Reg::T0, NodeId(1));
        let expr = Expr::Phi(phi.clone());
        mark_used(&expr, &mut used_phis);
        mark_used(&expr, &mut used_phis);
        assert_eq!(used_phis.len(), 1);
        assert_eq!(phi.num_usages(), 2);
    }

    #[test]
    fn single_use_phi_chains_propagate() {
        let mut used_phis = Vec::new();
        let a = PhiExpr::new(Reg::T0, NodeId(1));
        let b = PhiExpr::new(Reg::T0, NodeId(2));
        // b's only use is as the value assigned to a.
        mark_phi_used(&b, Some(&a), &mut used_phis);
        assert!(Rc::ptr_eq(&b.propagates_to(), &a));
        let set = Stmt::SetPhi(Rc::new(SetPhiStmt {
            phi: a.clone(),
            expr: Expr::Phi(b),
        }));
        assert!(!set.should_write());
    }

    #[test]
    fn literal_display_forms() {
        assert_eq!(Expr::lit(5).to_string(), "5");
        assert_eq!(Expr::lit(0x5678).to_string(), "0x5678");
        assert_eq!(Expr::lit(-0x10).to_string(), "-0x10");
        assert_eq!(Expr::typed_lit(7, Type::u32()).to_string(), "7U");
        assert_eq!(Expr::typed_lit(0, Type::ptr()).to_string(), "NULL");
        let bits = (5.0f32).to_bits() as i64;
        assert_eq!(Expr::typed_lit(bits, Type::f32()).to_string(), "5.0f");
        let dbits = (0.5f64).to_bits() as i64;
        assert_eq!(Expr::typed_lit(dbits, Type::f64()).to_string(), "0.5");
    }

    #[test]
    fn failed_unification_marks_bitwise_casts() {
        let sum = BinaryExpr::int(Expr::lit(1), BinOp::Add, Expr::lit(2));
        // An integer reinterpreted as a float cannot unify; the output
        // flags the bridge.
        let cast = as_f32(sum);
        assert_eq!(cast.to_string(), "(bitwise f32) (1 + 2)");
    }

    #[test]
    fn struct_access_display() {
        let base = Expr::Global(Rc::new(GlobalSymbol {
            name: "obj".into(),
            ty: Type::ptr(),
        }));
        let direct = Expr::Struct(Rc::new(StructAccess {
            base: base.clone(),
            offset: 0,
            ty: Type::any(),
        }));
        assert_eq!(direct.to_string(), "*obj");
        let field = Expr::Struct(Rc::new(StructAccess {
            base: base.clone(),
            offset: 0x1c,
            ty: Type::any(),
        }));
        assert_eq!(field.to_string(), "obj->unk1C");
        let through_addr = Expr::Struct(Rc::new(StructAccess {
            base: Expr::addr_of(base),
            offset: 4,
            ty: Type::any(),
        }));
        assert_eq!(through_addr.to_string(), "obj.unk4");
    }
}
