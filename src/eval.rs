// Big-step expression evaluation over sigma.

use crate::ast::*;
use crate::checks::{self, PanicReason};
use crate::context::path_key;
use crate::encode;
use crate::exec::*;
use crate::layout::layout_of;
use crate::matching::{bind_order, match_pattern};
use crate::resolve::{self, EntityKind};
use crate::sigma::{BindInfo, BindState, Sigma, ViewKind};
use crate::types::{self, Ty};
use crate::value::*;


#[derive(Clone, Debug, PartialEq)]
pub enum PlaceKind {
    Store(Addr),
    Raw(u64, RawPtrQual),
}


#[derive(Clone, Debug, PartialEq)]
pub struct Place {
    pub kind: PlaceKind,
    pub root: Option<String>,
}


pub fn read_place(sigma: &mut Sigma, place: &Place) -> Eval {
    match &place.kind {
        PlaceKind::Store(addr) => sigma
            .read_addr(*addr)
            .map_err(|r| panic_with(sigma, r)),
        PlaceKind::Raw(addr, _) => sigma
            .read_raw(*addr)
            .map_err(|r| panic_with(sigma, r)),
    }
}


pub fn write_place(sigma: &mut Sigma, place: &Place, value: Value) -> StmtOut {
    match &place.kind {
        PlaceKind::Store(addr) => sigma
            .write_addr(*addr, value)
            .map_err(|r| panic_with(sigma, r)),
        PlaceKind::Raw(addr, qual) => {
            // Writing through an immutable raw pointer always panics.
            if *qual == RawPtrQual::Imm {
                return Err(panic_with(sigma, PanicReason::Other));
            }
            sigma
                .write_raw(*addr, value)
                .map_err(|r| panic_with(sigma, r))
        }
    }
}


// Reject whole reads of moved or partially moved bindings before
// touching the store; component reads check their own prefix.
fn check_readable(sigma: &mut Sigma, name: &str) -> StmtOut {
    let state = sigma.binding(name).map(|b| b.state.clone());
    match state {
        Some(BindState::Moved) | Some(BindState::PartiallyMoved(_)) => {
            Err(panic_with(sigma, PanicReason::Other))
        }
        _ => Ok(()),
    }
}


fn check_prefix_readable(sigma: &mut Sigma, name: &str, prefix: &str) -> StmtOut {
    let state = sigma.binding(name).map(|b| b.state.clone());
    match state {
        Some(BindState::Moved) => Err(panic_with(sigma, PanicReason::Other)),
        Some(BindState::PartiallyMoved(moved)) if moved.iter().any(|m| m == prefix) => {
            Err(panic_with(sigma, PanicReason::Other))
        }
        _ => Ok(()),
    }
}


pub fn eval_place(ectx: &EvalCtx, sigma: &mut Sigma, expr: &Expr) -> Result<Place, Control> {
    match expr {
        Expr::Ident(name) => {
            if let Some(bind) = sigma.binding(name) {
                let addr = bind.addr;
                return Ok(Place {
                    kind: PlaceKind::Store(addr),
                    root: Some(name.clone()),
                });
            }
            let module = path_key(&ectx.module);
            if sigma.is_poisoned(&module) {
                return Err(panic_with(sigma, PanicReason::InitPanic));
            }
            match sigma.static_addr(&module, name) {
                Some(addr) => Ok(Place {
                    kind: PlaceKind::Store(addr),
                    root: None,
                }),
                None => Err(panic_with(sigma, PanicReason::Other)),
            }
        }

        Expr::Qualified(path, name) => {
            let module = resolve::resolve_module_path(ectx.ctx, &ectx.module, path)
                .map_err(|_| panic_with(sigma, PanicReason::Other))?;
            let key = path_key(&module);
            if sigma.is_poisoned(&key) {
                return Err(panic_with(sigma, PanicReason::InitPanic));
            }
            match sigma.static_addr(&key, name) {
                Some(addr) => Ok(Place {
                    kind: PlaceKind::Store(addr),
                    root: None,
                }),
                None => Err(panic_with(sigma, PanicReason::Other)),
            }
        }

        Expr::Field(base, name) => {
            let base = eval_place(ectx, sigma, base)?;
            match base.kind {
                PlaceKind::Store(addr) => Ok(Place {
                    kind: PlaceKind::Store(
                        sigma.alloc_view(addr, ViewKind::Field(name.clone())),
                    ),
                    root: base.root,
                }),
                PlaceKind::Raw(_, _) => Err(panic_with(sigma, PanicReason::Other)),
            }
        }

        Expr::TupleIndex(base, index) => {
            let index: usize = index
                .parse()
                .map_err(|_| panic_with(sigma, PanicReason::Other))?;
            let base = eval_place(ectx, sigma, base)?;
            match base.kind {
                PlaceKind::Store(addr) => Ok(Place {
                    kind: PlaceKind::Store(sigma.alloc_view(addr, ViewKind::Tuple(index))),
                    root: base.root,
                }),
                PlaceKind::Raw(_, _) => Err(panic_with(sigma, PanicReason::Other)),
            }
        }

        Expr::Index(base, index) => {
            let index_value = eval_expr(ectx, sigma, index)?;
            let index = match index_value.index_value() {
                Some(i) => i,
                None    => return Err(panic_with(sigma, PanicReason::Other)),
            };
            let base = eval_place(ectx, sigma, base)?;
            let addr = match base.kind {
                PlaceKind::Store(addr) => addr,
                PlaceKind::Raw(_, _)   => return Err(panic_with(sigma, PanicReason::Other)),
            };
            let backing = sigma.read_addr(addr).map_err(|r| panic_with(sigma, r))?;
            let len = match &backing {
                Value::Array(items) => items.len() as u64,
                _                   => return Err(panic_with(sigma, PanicReason::Other)),
            };
            if !checks::check_index(len, index) {
                return Err(panic_with(sigma, PanicReason::Bounds));
            }
            Ok(Place {
                kind: PlaceKind::Store(sigma.alloc_view(addr, ViewKind::Index(index as usize))),
                root: base.root,
            })
        }

        Expr::Deref(inner) => {
            let value = eval_expr(ectx, sigma, inner)?;
            match value {
                Value::Ptr { state: PtrState::Null, .. } => {
                    Err(panic_with(sigma, PanicReason::NullDeref))
                }
                Value::Ptr { addr, .. } => Ok(Place {
                    kind: PlaceKind::Store(addr),
                    root: None,
                }),
                Value::RawPtr { qual, addr } => Ok(Place {
                    kind: PlaceKind::Raw(addr, qual),
                    root: None,
                }),
                _ => Err(panic_with(sigma, PanicReason::Other)),
            }
        }

        _ => Err(panic_with(sigma, PanicReason::Other)),
    }
}


// Move out of a place: the value is read and the root binding's state
// becomes Moved (whole) or PartiallyMoved at the component head.
pub fn move_place(ectx: &EvalCtx, sigma: &mut Sigma, expr: &Expr) -> Eval {
    let head = match expr {
        Expr::Field(base, name) => match &**base {
            Expr::Ident(root) => Some((root.clone(), Some(name.clone()))),
            _                 => None,
        },
        Expr::TupleIndex(base, index) => match &**base {
            Expr::Ident(root) => Some((root.clone(), Some(index.clone()))),
            _                 => None,
        },
        Expr::Ident(root) => Some((root.clone(), None)),
        _                 => None,
    };

    if let Some((root, prefix)) = &head {
        let state = sigma.binding(root).map(|b| b.state.clone());
        match (state, prefix) {
            (Some(BindState::Moved), _) => {
                return Err(panic_with(sigma, PanicReason::Other));
            }
            (Some(BindState::PartiallyMoved(moved)), Some(prefix)) if moved.contains(prefix) => {
                return Err(panic_with(sigma, PanicReason::Other));
            }
            (Some(BindState::PartiallyMoved(_)), None) => {
                return Err(panic_with(sigma, PanicReason::Other));
            }
            _ => {}
        }
    }

    let place = eval_place(ectx, sigma, expr)?;
    let value = read_place(sigma, &place)?;

    if let Some((root, prefix)) = head {
        if let Some(bind) = sigma.binding_mut(&root) {
            match prefix {
                None => bind.state = BindState::Moved,
                Some(prefix) => match &mut bind.state {
                    BindState::PartiallyMoved(moved) => moved.push(prefix),
                    state => *state = BindState::PartiallyMoved(vec![prefix]),
                },
            }
        }
    }
    Ok(value)
}


fn literal_value(sigma: &mut Sigma, lit: &Literal) -> Eval {
    match lit {
        Literal::Unit => Ok(Value::Unit),
        Literal::Bool(b) => Ok(Value::Bool(*b)),
        Literal::Char(c) => Ok(Value::Char(*c)),
        Literal::Str(s) => Ok(Value::Str {
            state: SeqState::View,
            bytes: s.clone().into_bytes(),
        }),
        // Null is legal only where a raw pointer is expected.
        Literal::Null => Ok(Value::RawPtr { qual: RawPtrQual::Mut, addr: 0 }),
        Literal::Int(text, suffix) => {
            let magnitude = match types::parse_int_literal(text) {
                Ok(v)  => v,
                Err(_) => return Err(panic_with(sigma, PanicReason::Overflow)),
            };
            let ty = suffix.clone().unwrap_or_else(|| String::from("i32"));
            if !types::in_range_int(magnitude, false, &ty) {
                return Err(panic_with(sigma, PanicReason::Overflow));
            }
            Ok(Value::Int(IntVal::new(&ty, magnitude, false)))
        }
        Literal::Float(text, suffix) => {
            let value: f64 = match text.parse() {
                Ok(v)  => v,
                Err(_) => return Err(panic_with(sigma, PanicReason::Other)),
            };
            let ty = match suffix.as_deref() {
                Some("f16") => "f16",
                Some("f32") | Some("f") => "f32",
                _           => "f64",
            };
            Ok(Value::Float(FloatVal {
                ty: String::from(ty),
                value: round_to_width(ty, value),
            }))
        }
    }
}


pub fn apply_binop(sigma: &mut Sigma, op: BinOp, a: Value, b: Value) -> Eval {
    match (&a, &b) {
        (Value::Int(x), Value::Int(y)) => {
            int_binop(op, x, y).map_err(|r| panic_with(sigma, r))
        }
        (Value::Float(x), Value::Float(y)) => {
            float_binop(op, x, y).map_err(|r| panic_with(sigma, r))
        }
        (Value::Bool(x), Value::Bool(y)) => match op {
            BinOp::BitAnd => Ok(Value::Bool(x & y)),
            BinOp::BitOr  => Ok(Value::Bool(x | y)),
            BinOp::BitXor => Ok(Value::Bool(x ^ y)),
            BinOp::Eq     => Ok(Value::Bool(x == y)),
            BinOp::Neq    => Ok(Value::Bool(x != y)),
            _             => Err(panic_with(sigma, PanicReason::Other)),
        },
        _ => match op {
            BinOp::Eq  => general_eq(sigma, &a, &b).map(Value::Bool),
            BinOp::Neq => general_eq(sigma, &a, &b).map(|e| Value::Bool(!e)),
            _          => Err(panic_with(sigma, PanicReason::Other)),
        },
    }
}


fn general_eq(sigma: &mut Sigma, a: &Value, b: &Value) -> Result<bool, Control> {
    match (a, b) {
        (Value::Unit, Value::Unit) => Ok(true),
        (Value::Char(x), Value::Char(y)) => Ok(x == y),
        (Value::Str { bytes: x, .. }, Value::Str { bytes: y, .. }) => Ok(x == y),
        (Value::Bytes { bytes: x, .. }, Value::Bytes { bytes: y, .. }) => Ok(x == y),
        (Value::RawPtr { addr: x, .. }, Value::RawPtr { addr: y, .. }) => Ok(x == y),
        _ => Err(panic_with(sigma, PanicReason::Other)),
    }
}


fn cast_value(sigma: &mut Sigma, value: Value, dst: &Ty) -> Eval {
    let dst_name = match dst {
        Ty::Prim(name) => name.clone(),
        _              => return Err(panic_with(sigma, PanicReason::Cast)),
    };
    let out = match &value {
        Value::Int(i) => {
            if types::is_int_prim(&dst_name) {
                let ok = types::in_range_int(i.magnitude, i.negative, &dst_name);
                if !ok {
                    return Err(panic_with(sigma, PanicReason::Cast));
                }
                Value::Int(IntVal::new(&dst_name, i.magnitude, i.negative))
            } else if types::is_float_prim(&dst_name) {
                let raw = if i.negative {
                    -(i.magnitude as f64)
                } else {
                    i.magnitude as f64
                };
                Value::Float(FloatVal {
                    ty: dst_name.clone(),
                    value: round_to_width(&dst_name, raw),
                })
            } else if dst_name == "bool" {
                match i.magnitude {
                    0 if !i.negative => Value::Bool(false),
                    1 if !i.negative => Value::Bool(true),
                    _ => return Err(panic_with(sigma, PanicReason::Cast)),
                }
            } else if dst_name == "char" && i.ty == "u32" {
                match char::from_u32(i.magnitude as u32) {
                    Some(c) => Value::Char(c),
                    None    => return Err(panic_with(sigma, PanicReason::Cast)),
                }
            } else {
                return Err(panic_with(sigma, PanicReason::Cast));
            }
        }
        Value::Float(f) => {
            if types::is_float_prim(&dst_name) {
                Value::Float(FloatVal {
                    ty: dst_name.clone(),
                    value: round_to_width(&dst_name, f.value),
                })
            } else if types::is_int_prim(&dst_name) {
                let truncated = f.value.trunc();
                if !truncated.is_finite() {
                    return Err(panic_with(sigma, PanicReason::Cast));
                }
                let negative = truncated < 0.0;
                let magnitude = truncated.abs();
                if magnitude >= 2f64.powi(127) {
                    return Err(panic_with(sigma, PanicReason::Cast));
                }
                let magnitude = magnitude as u128;
                if !types::in_range_int(magnitude, negative, &dst_name) {
                    return Err(panic_with(sigma, PanicReason::Cast));
                }
                Value::Int(IntVal::new(&dst_name, magnitude, negative))
            } else {
                return Err(panic_with(sigma, PanicReason::Cast));
            }
        }
        Value::Bool(b) => {
            if types::is_int_prim(&dst_name) {
                Value::Int(IntVal::new(&dst_name, *b as u128, false))
            } else if dst_name == "bool" {
                value.clone()
            } else {
                return Err(panic_with(sigma, PanicReason::Cast));
            }
        }
        Value::Char(c) => {
            if dst_name == "u32" {
                Value::Int(IntVal::new("u32", *c as u128, false))
            } else if dst_name == "char" {
                value.clone()
            } else {
                return Err(panic_with(sigma, PanicReason::Cast));
            }
        }
        _ => return Err(panic_with(sigma, PanicReason::Cast)),
    };
    Ok(out)
}


// A runtime value knows enough of its own type to drive transmute's
// source side.
fn infer_ty(value: &Value) -> Option<Node<Ty>> {
    match value {
        Value::Unit => Some(types::unit_ty()),
        Value::Bool(_) => Some(types::prim("bool")),
        Value::Char(_) => Some(types::prim("char")),
        Value::Int(i) => Some(types::prim(&i.ty)),
        Value::Float(f) => Some(types::prim(&f.ty)),
        Value::Ptr { state, .. } => Some(Node::new(Ty::Ptr(types::prim("u8"), Some(*state)))),
        Value::RawPtr { qual, .. } => Some(Node::new(Ty::RawPtr(*qual, types::prim("u8")))),
        Value::Tuple(items) => {
            let tys = items.iter().map(infer_ty).collect::<Option<Vec<_>>>()?;
            Some(Node::new(Ty::Tuple(tys)))
        }
        Value::Array(items) => {
            let first = infer_ty(items.first()?)?;
            Some(Node::new(Ty::Array(first, items.len() as u64)))
        }
        Value::Record { path, .. } | Value::Modal { path, .. } => {
            Some(Node::new(Ty::Named(path.clone(), vec![])))
        }
        Value::Range { .. } => Some(Node::new(Ty::Range)),
        _ => None,
    }
}


pub fn eval_expr(ectx: &EvalCtx, sigma: &mut Sigma, expr: &Expr) -> Eval {
    if ectx.config.trace_eval {
        log::trace!("eval: {:?}", expr);
    }
    match expr {
        Expr::Lit(lit) => literal_value(sigma, lit),

        Expr::Ident(name) => eval_ident(ectx, sigma, name),

        Expr::Qualified(path, name) => eval_qualified(ectx, sigma, path, name),

        Expr::Field(base, name) => {
            // A field of a partially moved root is readable as long as
            // this prefix was not the one moved out.
            if let Expr::Ident(root) = &**base {
                if sigma.binding(root).is_some() {
                    check_prefix_readable(sigma, root, name)?;
                    let place = eval_place(ectx, sigma, base)?;
                    let value = read_place(sigma, &place)?;
                    return match value.field(name) {
                        Some(v) => Ok(v.clone()),
                        None    => Err(panic_with(sigma, PanicReason::Other)),
                    };
                }
            }
            let value = eval_expr(ectx, sigma, base)?;
            match value.field(name) {
                Some(v) => Ok(v.clone()),
                None    => Err(panic_with(sigma, PanicReason::Other)),
            }
        }

        Expr::TupleIndex(base, index) => {
            let index: usize = index
                .parse()
                .map_err(|_| panic_with(sigma, PanicReason::Other))?;
            let value = eval_expr(ectx, sigma, base)?;
            match value {
                Value::Tuple(items) if index < items.len() => Ok(items[index].clone()),
                _ => Err(panic_with(sigma, PanicReason::Other)),
            }
        }

        Expr::Deref(inner) => {
            let value = eval_expr(ectx, sigma, inner)?;
            match value {
                Value::Ptr { state: PtrState::Null, .. } => {
                    Err(panic_with(sigma, PanicReason::NullDeref))
                }
                Value::Ptr { addr, .. } => {
                    sigma.read_addr(addr).map_err(|r| panic_with(sigma, r))
                }
                Value::RawPtr { addr, .. } => {
                    sigma.read_raw(addr).map_err(|r| panic_with(sigma, r))
                }
                _ => Err(panic_with(sigma, PanicReason::Other)),
            }
        }

        Expr::AddrOf(place) => {
            let place = eval_place(ectx, sigma, place)?;
            match place.kind {
                PlaceKind::Store(addr) => Ok(Value::Ptr { state: PtrState::Valid, addr }),
                PlaceKind::Raw(_, _)   => Err(panic_with(sigma, PanicReason::Other)),
            }
        }

        Expr::Unary(op, operand) => {
            let value = eval_expr(ectx, sigma, operand)?;
            match (&value, op) {
                (Value::Bool(b), UnOp::Not) => Ok(Value::Bool(!b)),
                (Value::Int(i), _) => int_unop(*op, i).map_err(|r| panic_with(sigma, r)),
                (Value::Float(f), UnOp::Neg) => Ok(Value::Float(FloatVal {
                    ty: f.ty.clone(),
                    value: -f.value,
                })),
                _ => Err(panic_with(sigma, PanicReason::Other)),
            }
        }

        Expr::Binary(op @ (BinOp::And | BinOp::Or), lhs, rhs) => {
            let lhs = eval_expr(ectx, sigma, lhs)?;
            match (lhs.as_bool(), op) {
                (Some(false), BinOp::And) => Ok(Value::Bool(false)),
                (Some(true), BinOp::Or)   => Ok(Value::Bool(true)),
                (Some(_), _) => {
                    let rhs = eval_expr(ectx, sigma, rhs)?;
                    match rhs.as_bool() {
                        Some(b) => Ok(Value::Bool(b)),
                        None    => Err(panic_with(sigma, PanicReason::Other)),
                    }
                }
                (None, _) => Err(panic_with(sigma, PanicReason::Other)),
            }
        }

        Expr::Binary(op, lhs, rhs) => {
            let lhs = eval_expr(ectx, sigma, lhs)?;
            let rhs = eval_expr(ectx, sigma, rhs)?;
            apply_binop(sigma, *op, lhs, rhs)
        }

        Expr::Cast(inner, ty) => {
            let value = eval_expr(ectx, sigma, inner)?;
            let dst = types::lower_type(ectx.ctx, &ectx.module, ty)
                .map_err(|_| panic_with(sigma, PanicReason::Cast))?;
            let dst = types::strip_perm(&dst);
            cast_value(sigma, value, &dst)
        }

        Expr::Transmute(ty, inner) => {
            let value = eval_expr(ectx, sigma, inner)?;
            let dst = types::lower_type(ectx.ctx, &ectx.module, ty)
                .map_err(|_| panic_with(sigma, PanicReason::Cast))?;
            let src = match infer_ty(&value) {
                Some(src) => src,
                None      => return Err(panic_with(sigma, PanicReason::Cast)),
            };
            let src_layout = layout_of(ectx.ctx, &src)
                .map_err(|_| panic_with(sigma, PanicReason::Cast))?;
            let dst_layout = layout_of(ectx.ctx, &dst)
                .map_err(|_| panic_with(sigma, PanicReason::Cast))?;
            if !checks::transmute_size_ok(src_layout.size, dst_layout.size) {
                return Err(panic_with(sigma, PanicReason::Cast));
            }
            let bits = encode::value_bits(ectx.ctx, &src, &value)
                .map_err(|_| panic_with(sigma, PanicReason::Cast))?;
            if !encode::valid_value(ectx.ctx, &dst, &bits) {
                return Err(panic_with(sigma, PanicReason::Cast));
            }
            match encode::decode_value(ectx.ctx, &dst, &bits) {
                Some(out) => Ok(out),
                None      => Err(panic_with(sigma, PanicReason::Cast)),
            }
        }

        Expr::Try(inner) => {
            let value = eval_expr(ectx, sigma, inner)?;
            match value {
                Value::Union { member, value } => {
                    let success = match &ectx.ret_ty {
                        Some(ret) => types::subtyping(&member, ret),
                        None      => false,
                    };
                    if success {
                        Ok(*value)
                    } else {
                        Err(Control::Return(Some(Value::Union { member, value })))
                    }
                }
                _ => Err(panic_with(sigma, PanicReason::Other)),
            }
        }

        Expr::Move(place) => move_place(ectx, sigma, place),

        Expr::Tuple(items) => {
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                values.push(eval_expr(ectx, sigma, item)?);
            }
            if values.is_empty() {
                Ok(Value::Unit)
            } else {
                Ok(Value::Tuple(values))
            }
        }

        Expr::Array(items) => {
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                values.push(eval_expr(ectx, sigma, item)?);
            }
            Ok(Value::Array(values))
        }

        Expr::Range(lo, hi, kind) => {
            let lo = match lo {
                Some(e) => Some(eval_index(ectx, sigma, e)?),
                None    => None,
            };
            let hi = match hi {
                Some(e) => Some(eval_index(ectx, sigma, e)?),
                None    => None,
            };
            Ok(Value::Range { kind: *kind, lo, hi })
        }

        Expr::RecordLit(path, inits) => eval_record_lit(ectx, sigma, path, inits),

        Expr::EnumLit(path, variant, args) => {
            let full = resolve_type_value_path(ectx, sigma, path)?;
            let mut values = Vec::with_capacity(args.len());
            for arg in args {
                values.push(eval_expr(ectx, sigma, &arg.value)?);
            }
            let payload = if values.is_empty() {
                EnumPayload::Unit
            } else {
                EnumPayload::Tuple(values)
            };
            Ok(Value::Enum { path: full, variant: variant.clone(), payload })
        }

        Expr::ModalLit(path, state, inits) => {
            let full = resolve_type_value_path(ectx, sigma, path)?;
            let decl = match ectx.ctx.lookup_modal(&full) {
                Some(decl) => decl.clone(),
                None       => return Err(panic_with(sigma, PanicReason::Other)),
            };
            let block = match decl.states.iter().find(|s| &s.name == state) {
                Some(b) => b,
                None    => return Err(panic_with(sigma, PanicReason::Other)),
            };
            let mut fields = Vec::with_capacity(block.fields.len());
            for field in &block.fields {
                let init = match inits.iter().find(|i| i.name == field.name) {
                    Some(i) => i,
                    None    => return Err(panic_with(sigma, PanicReason::Other)),
                };
                fields.push((field.name.clone(), eval_expr(ectx, sigma, &init.value)?));
            }
            Ok(Value::Modal { path: full, state: state.clone(), fields })
        }

        Expr::Index(base, index) => eval_index_expr(ectx, sigma, base, index),

        Expr::Call(callee, args) => crate::apply::eval_call(ectx, sigma, callee, args),

        Expr::MethodCall(recv, name, args) => {
            crate::apply::eval_method_call(ectx, sigma, recv, name, args)
        }

        Expr::If(cond, then, otherwise) => {
            let cond = eval_expr(ectx, sigma, cond)?;
            match cond.as_bool() {
                Some(true)  => eval_block(ectx, sigma, then),
                Some(false) => match otherwise {
                    Some(e) => eval_expr(ectx, sigma, e),
                    None    => Ok(Value::Unit),
                },
                None => Err(panic_with(sigma, PanicReason::Other)),
            }
        }

        Expr::Match(scrutinee, arms) => eval_match(ectx, sigma, scrutinee, arms),

        Expr::Block(block) => eval_block(ectx, sigma, block),

        Expr::Region(alias, body) => eval_region(ectx, sigma, alias.as_deref(), body),

        Expr::Frame(alias, body) => eval_frame(ectx, sigma, alias.as_deref(), body),

        Expr::Alloc(inner, region) => {
            let value = eval_expr(ectx, sigma, inner)?;
            let target = region_target(sigma, region.as_deref())?;
            if sigma.is_frozen(target) {
                return Err(panic_with(sigma, PanicReason::Other));
            }
            let addr = sigma
                .region_alloc(target, value)
                .map_err(|r| panic_with(sigma, r))?;
            Ok(Value::Ptr { state: PtrState::Valid, addr })
        }
    }
}


fn eval_index(ectx: &EvalCtx, sigma: &mut Sigma, expr: &Expr) -> Result<u64, Control> {
    let value = eval_expr(ectx, sigma, expr)?;
    value
        .index_value()
        .ok_or_else(|| panic_with(sigma, PanicReason::Other))
}


fn eval_index_expr(ectx: &EvalCtx, sigma: &mut Sigma, base: &Expr, index: &Expr) -> Eval {
    // Range indices slice; integer indices project an element.
    if let Expr::Range(lo, hi, kind) = index {
        let lo = match lo {
            Some(e) => Some(eval_index(ectx, sigma, e)?),
            None    => None,
        };
        let hi = match hi {
            Some(e) => Some(eval_index(ectx, sigma, e)?),
            None    => None,
        };
        let inclusive = *kind == RangeKind::Inclusive;
        // Strings and bytes slice by value; arrays slice by address.
        if base.is_place() {
            let place = eval_place(ectx, sigma, base)?;
            if let PlaceKind::Store(addr) = place.kind {
                let backing = sigma.read_addr(addr).map_err(|r| panic_with(sigma, r))?;
                if let Value::Array(items) = &backing {
                    let len = items.len() as u64;
                    let (start, end) = match checks::slice_bounds(lo, hi, inclusive, len) {
                        Some(b) => b,
                        None    => return Err(panic_with(sigma, PanicReason::Bounds)),
                    };
                    return Ok(Value::Slice { base: addr, start, len: end - start });
                }
                return slice_seq(sigma, backing, lo, hi, inclusive);
            }
            return Err(panic_with(sigma, PanicReason::Other));
        }
        let backing = eval_expr(ectx, sigma, base)?;
        return slice_seq(sigma, backing, lo, hi, inclusive);
    }

    let index = eval_index(ectx, sigma, index)?;
    let backing = eval_expr(ectx, sigma, base)?;
    match backing {
        Value::Array(items) => {
            if !checks::check_index(items.len() as u64, index) {
                return Err(panic_with(sigma, PanicReason::Bounds));
            }
            Ok(items[index as usize].clone())
        }
        Value::Slice { base, start, len } => {
            if !checks::check_index(len, index) {
                return Err(panic_with(sigma, PanicReason::Bounds));
            }
            let backing = sigma.read_addr(base).map_err(|r| panic_with(sigma, r))?;
            match backing {
                Value::Array(items) => {
                    let at = (start + index) as usize;
                    items
                        .get(at)
                        .cloned()
                        .ok_or_else(|| panic_with(sigma, PanicReason::Bounds))
                }
                _ => Err(panic_with(sigma, PanicReason::Other)),
            }
        }
        Value::Str { bytes, .. } | Value::Bytes { bytes, .. } => {
            if !checks::check_index(bytes.len() as u64, index) {
                return Err(panic_with(sigma, PanicReason::Bounds));
            }
            Ok(Value::Int(IntVal::from_u64("u8", bytes[index as usize] as u64)))
        }
        _ => Err(panic_with(sigma, PanicReason::Other)),
    }
}


fn slice_seq(
    sigma: &mut Sigma,
    backing: Value,
    lo: Option<u64>,
    hi: Option<u64>,
    inclusive: bool,
) -> Eval {
    match backing {
        Value::Str { bytes, .. } => {
            let len = bytes.len() as u64;
            let (start, end) = match checks::slice_bounds(lo, hi, inclusive, len) {
                Some(b) => b,
                None    => return Err(panic_with(sigma, PanicReason::Bounds)),
            };
            Ok(Value::Str {
                state: SeqState::View,
                bytes: bytes[start as usize..end as usize].to_vec(),
            })
        }
        Value::Bytes { bytes, .. } => {
            let len = bytes.len() as u64;
            let (start, end) = match checks::slice_bounds(lo, hi, inclusive, len) {
                Some(b) => b,
                None    => return Err(panic_with(sigma, PanicReason::Bounds)),
            };
            Ok(Value::Bytes {
                state: SeqState::View,
                bytes: bytes[start as usize..end as usize].to_vec(),
            })
        }
        _ => Err(panic_with(sigma, PanicReason::Other)),
    }
}


fn eval_ident(ectx: &EvalCtx, sigma: &mut Sigma, name: &str) -> Eval {
    if sigma.binding(name).is_some() {
        check_readable(sigma, name)?;
        let addr = sigma.binding(name).unwrap().addr;
        return sigma.read_addr(addr).map_err(|r| panic_with(sigma, r));
    }

    let module_key = path_key(&ectx.module);
    if let Some(addr) = sigma.static_addr(&module_key, name) {
        if sigma.is_poisoned(&module_key) {
            return Err(panic_with(sigma, PanicReason::InitPanic));
        }
        return sigma.read_addr(addr).map_err(|r| panic_with(sigma, r));
    }

    let map = match ectx.ctx.name_maps.get(&module_key) {
        Some(map) => map,
        None      => return Err(panic_with(sigma, PanicReason::Other)),
    };
    match map.get(name) {
        Some(entity) if entity.kind == EntityKind::Value => {
            let origin_key = path_key(&entity.origin);
            if sigma.is_poisoned(&origin_key) {
                return Err(panic_with(sigma, PanicReason::InitPanic));
            }
            if let Some(addr) = sigma.static_addr(&origin_key, name) {
                return sigma.read_addr(addr).map_err(|r| panic_with(sigma, r));
            }
            let mut full = entity.origin.clone();
            full.push(String::from(name));
            if ectx.ctx.procs.contains_key(&path_key(&full)) {
                return Ok(Value::ProcRef(full));
            }
            Err(panic_with(sigma, PanicReason::Other))
        }
        Some(entity) if entity.kind == EntityKind::Type => {
            let origin_key = path_key(&entity.origin);
            if sigma.is_poisoned(&origin_key) {
                return Err(panic_with(sigma, PanicReason::InitPanic));
            }
            let mut full = entity.origin.clone();
            full.push(String::from(name));
            Ok(Value::RecordCtor(full))
        }
        _ => Err(panic_with(sigma, PanicReason::Other)),
    }
}


fn eval_qualified(ectx: &EvalCtx, sigma: &mut Sigma, path: &[String], name: &str) -> Eval {
    let module = resolve::resolve_module_path(ectx.ctx, &ectx.module, path)
        .map_err(|_| panic_with(sigma, PanicReason::Other))?;
    let key = path_key(&module);
    if sigma.is_poisoned(&key) {
        return Err(panic_with(sigma, PanicReason::InitPanic));
    }
    if let Some(addr) = sigma.static_addr(&key, name) {
        return sigma.read_addr(addr).map_err(|r| panic_with(sigma, r));
    }
    let mut full = module;
    full.push(String::from(name));
    if ectx.ctx.procs.contains_key(&path_key(&full)) {
        return Ok(Value::ProcRef(full));
    }
    if ectx.ctx.lookup_record(&full).is_some() {
        return Ok(Value::RecordCtor(full));
    }
    Err(panic_with(sigma, PanicReason::Other))
}


fn resolve_type_value_path(
    ectx: &EvalCtx,
    sigma: &mut Sigma,
    path: &[String],
) -> Result<Path, Control> {
    // Type constructors in expressions resolve exactly like type names.
    let full = if path.len() == 1 {
        let map = ectx.ctx.name_maps.get(&path_key(&ectx.module));
        match map.and_then(|m| m.get(&path[0])) {
            Some(entity) if entity.kind == EntityKind::Type => {
                let mut full = entity.origin.clone();
                full.push(path[0].clone());
                full
            }
            _ => return Err(panic_with(sigma, PanicReason::Other)),
        }
    } else {
        let (module, name) = path.split_at(path.len() - 1);
        let module = resolve::resolve_module_path(ectx.ctx, &ectx.module, module)
            .map_err(|_| panic_with(sigma, PanicReason::Other))?;
        let mut full = module;
        full.push(name[0].clone());
        full
    };
    let owner = path_key(&full[..full.len() - 1]);
    if sigma.is_poisoned(&owner) {
        return Err(panic_with(sigma, PanicReason::InitPanic));
    }
    Ok(full)
}


fn eval_record_lit(
    ectx: &EvalCtx,
    sigma: &mut Sigma,
    path: &[String],
    inits: &[FieldInit],
) -> Eval {
    let full = resolve_type_value_path(ectx, sigma, path)?;
    let decl = match ectx.ctx.lookup_record(&full) {
        Some(decl) => decl.clone(),
        None       => return Err(panic_with(sigma, PanicReason::Other)),
    };
    // Field initialisers evaluate in declaration order.
    let mut fields = Vec::with_capacity(decl.fields.len());
    for field in &decl.fields {
        let init = match inits.iter().find(|i| i.name == field.name) {
            Some(i) => i,
            None    => return Err(panic_with(sigma, PanicReason::Other)),
        };
        fields.push((field.name.clone(), eval_expr(ectx, sigma, &init.value)?));
    }
    Ok(Value::Record { path: full, fields })
}


fn eval_match(ectx: &EvalCtx, sigma: &mut Sigma, scrutinee: &Expr, arms: &[MatchArm]) -> Eval {
    let value = eval_expr(ectx, sigma, scrutinee)?;
    for arm in arms {
        let env = match match_pattern(&arm.pattern, &value) {
            Some(env) => env,
            None      => continue,
        };
        // Each arm runs in a fresh scope holding its bindings; a false
        // guard unwinds that scope and falls through to the next arm.
        sigma.push_scope();
        for (name, bound) in bind_order(&arm.pattern, env) {
            sigma.bind(&name, bound, BindInfo::default());
        }
        if let Some(guard) = &arm.guard {
            let verdict = eval_expr(ectx, sigma, guard);
            match verdict {
                Ok(v) => match v.as_bool() {
                    Some(true)  => {}
                    Some(false) => {
                        cleanup_scope(ectx, sigma, Ok(Value::Unit))?;
                        continue;
                    }
                    None => {
                        let out = Err(panic_with(sigma, PanicReason::Other));
                        return cleanup_scope(ectx, sigma, out);
                    }
                },
                Err(ctl) => return cleanup_scope(ectx, sigma, Err(ctl)),
            }
        }
        let result = eval_expr(ectx, sigma, &arm.body);
        return cleanup_scope(ectx, sigma, result);
    }
    Err(panic_with(sigma, PanicReason::Other))
}


fn region_target(sigma: &mut Sigma, alias: Option<&str>) -> Result<usize, Control> {
    match alias {
        Some(name) => {
            let value = match sigma.binding(name) {
                Some(bind) => sigma.read_addr(bind.addr),
                None       => return Err(panic_with(sigma, PanicReason::Other)),
            };
            match value {
                Ok(Value::Region { target }) => Ok(target),
                Ok(_)  => Err(panic_with(sigma, PanicReason::Other)),
                Err(r) => Err(panic_with(sigma, r)),
            }
        }
        None => match sigma.current_region() {
            Some(entry) => Ok(entry.target),
            None        => Err(panic_with(sigma, PanicReason::Other)),
        },
    }
}


// Scope cleanup runs first, then the region entry pops (expiring every
// allocation), then the scope itself; cleanup_scope sequences all three.
fn eval_region(ectx: &EvalCtx, sigma: &mut Sigma, alias: Option<&str>, body: &Block) -> Eval {
    sigma.push_scope();
    let scope = sigma.current_scope();
    let target = sigma.new_region_target();
    sigma.push_region(target, scope, None);
    if let Some(alias) = alias {
        sigma.bind(alias, Value::Region { target }, BindInfo::alias());
    }
    let result = eval_block_body(ectx, sigma, body);
    let result = cleanup_scope(ectx, sigma, result);
    match result {
        Err(Control::Result(v)) => Ok(v),
        other                   => other,
    }
}


// A frame nests a reset point inside an existing region: exit truncates
// the arena back to the entry mark.
fn eval_frame(ectx: &EvalCtx, sigma: &mut Sigma, alias: Option<&str>, body: &Block) -> Eval {
    let target = region_target(sigma, alias)?;
    sigma.push_scope();
    let scope = sigma.current_scope();
    let mark = sigma.alloc_count(target);
    sigma.push_region(target, scope, Some(mark));
    let result = eval_block_body(ectx, sigma, body);
    let result = cleanup_scope(ectx, sigma, result);
    match result {
        Err(Control::Result(v)) => Ok(v),
        other                   => other,
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::*;
    use crate::checks::panic_code;
    use crate::context::Context;
    use crate::value::EnumPayload;

    fn p(comps: &[&str]) -> Path {
        comps.iter().map(|s| String::from(*s)).collect()
    }

    fn int(n: u64) -> Expr {
        Expr::Lit(Literal::Int(n.to_string(), None))
    }

    fn ident(name: &str) -> Expr {
        Expr::Ident(String::from(name))
    }

    fn iv(n: i64) -> Value {
        Value::Int(IntVal::i32_val(n))
    }

    fn bin(op: BinOp, l: Expr, r: Expr) -> Expr {
        Expr::Binary(op, Node::new(l), Node::new(r))
    }

    fn harness() -> (Context, Sigma) {
        (Context::build(vec![Module { path: p(&["m"]), items: vec![] }]).unwrap(), Sigma::new())
    }

    fn some(v: Value) -> Value {
        Value::Enum {
            path: p(&["m", "Opt"]),
            variant: String::from("Some"),
            payload: EnumPayload::Tuple(vec![v]),
        }
    }

    fn none() -> Value {
        Value::Enum {
            path: p(&["m", "Opt"]),
            variant: String::from("None"),
            payload: EnumPayload::Unit,
        }
    }

    #[test]
    fn test_arithmetic_and_panics() {
        let (ctx, mut sigma) = harness();
        let ectx = EvalCtx::new(&ctx, p(&["m"]));

        let e = bin(BinOp::Add, int(1), bin(BinOp::Mul, int(2), int(3)));
        assert_eq!(eval_expr(&ectx, &mut sigma, &e).unwrap(), iv(7));

        let e = bin(BinOp::Div, int(1), int(0));
        assert_eq!(eval_expr(&ectx, &mut sigma, &e), Err(Control::Panic));
        assert_eq!(sigma.panic_reason, Some(PanicReason::DivZero));
        assert_eq!(panic_code(PanicReason::DivZero), 0x03);
        sigma.clear_panic();

        // Shift by exactly the width.
        let e = bin(BinOp::Shl, int(1), int(32));
        assert_eq!(eval_expr(&ectx, &mut sigma, &e), Err(Control::Panic));
        assert_eq!(sigma.panic_reason, Some(PanicReason::Shift));
    }

    #[test]
    fn test_short_circuit() {
        let (ctx, mut sigma) = harness();
        let ectx = EvalCtx::new(&ctx, p(&["m"]));
        // false && (1/0 == 0) never evaluates the division.
        let e = bin(
            BinOp::And,
            Expr::Lit(Literal::Bool(false)),
            bin(BinOp::Eq, bin(BinOp::Div, int(1), int(0)), int(0)),
        );
        assert_eq!(eval_expr(&ectx, &mut sigma, &e).unwrap(), Value::Bool(false));
        assert_eq!(sigma.panic_reason, None);

        let e = bin(
            BinOp::Or,
            Expr::Lit(Literal::Bool(true)),
            bin(BinOp::Eq, bin(BinOp::Div, int(1), int(0)), int(0)),
        );
        assert_eq!(eval_expr(&ectx, &mut sigma, &e).unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_casts() {
        let (ctx, mut sigma) = harness();
        let ectx = EvalCtx::new(&ctx, p(&["m"]));

        let cast = |e: Expr, ty: Type| Expr::Cast(Node::new(e), Node::new(ty));

        let e = cast(int(200), Type::Prim(String::from("u8")));
        match eval_expr(&ectx, &mut sigma, &e).unwrap() {
            Value::Int(i) => {
                assert_eq!(i.ty, "u8");
                assert_eq!(i.magnitude, 200);
            }
            other => panic!("{:?}", other),
        }

        // A checked narrowing that does not fit panics Cast.
        let e = cast(int(300), Type::Prim(String::from("u8")));
        assert_eq!(eval_expr(&ectx, &mut sigma, &e), Err(Control::Panic));
        assert_eq!(sigma.panic_reason, Some(PanicReason::Cast));
        sigma.clear_panic();

        let e = cast(Expr::Lit(Literal::Bool(true)), Type::Prim(String::from("i32")));
        assert_eq!(eval_expr(&ectx, &mut sigma, &e).unwrap(), iv(1));

        // char -> u32 -> char round trip.
        let e = cast(Expr::Lit(Literal::Char('A')), Type::Prim(String::from("u32")));
        match eval_expr(&ectx, &mut sigma, &e).unwrap() {
            Value::Int(i) => assert_eq!(i.magnitude, 0x41),
            other         => panic!("{:?}", other),
        }
        let e = cast(
            cast(Expr::Lit(Literal::Char('A')), Type::Prim(String::from("u32"))),
            Type::Prim(String::from("char")),
        );
        assert_eq!(eval_expr(&ectx, &mut sigma, &e).unwrap(), Value::Char('A'));

        let e = cast(
            Expr::Lit(Literal::Float(String::from("2.9"), None)),
            Type::Prim(String::from("i32")),
        );
        assert_eq!(eval_expr(&ectx, &mut sigma, &e).unwrap(), iv(2));
    }

    #[test]
    fn test_transmute_checks_validity() {
        let (ctx, mut sigma) = harness();
        let ectx = EvalCtx::new(&ctx, p(&["m"]));

        // A valid scalar converts.
        let e = Expr::Transmute(
            Node::new(Type::Prim(String::from("char"))),
            Node::new(Expr::Lit(Literal::Int(String::from("65"), Some(String::from("u32"))))),
        );
        assert_eq!(eval_expr(&ectx, &mut sigma, &e).unwrap(), Value::Char('A'));

        // A surrogate bit pattern is rejected.
        let e = Expr::Transmute(
            Node::new(Type::Prim(String::from("char"))),
            Node::new(Expr::Lit(Literal::Int(
                String::from("0xD800"),
                Some(String::from("u32")),
            ))),
        );
        assert_eq!(eval_expr(&ectx, &mut sigma, &e), Err(Control::Panic));
        assert_eq!(sigma.panic_reason, Some(PanicReason::Cast));
        sigma.clear_panic();

        // Size mismatch panics before any bit inspection.
        let e = Expr::Transmute(
            Node::new(Type::Prim(String::from("u8"))),
            Node::new(Expr::Lit(Literal::Int(String::from("65"), Some(String::from("u32"))))),
        );
        assert_eq!(eval_expr(&ectx, &mut sigma, &e), Err(Control::Panic));
    }

    #[test]
    fn test_index_and_slice_bounds() {
        let (ctx, mut sigma) = harness();
        let ectx = EvalCtx::new(&ctx, p(&["m"]));
        sigma.bind(
            "xs",
            Value::Array(vec![iv(10), iv(20), iv(30)]),
            crate::sigma::BindInfo::default(),
        );

        let e = Expr::Index(Node::new(ident("xs")), Node::new(int(1)));
        assert_eq!(eval_expr(&ectx, &mut sigma, &e).unwrap(), iv(20));

        let e = Expr::Index(Node::new(ident("xs")), Node::new(int(3)));
        assert_eq!(eval_expr(&ectx, &mut sigma, &e), Err(Control::Panic));
        assert_eq!(sigma.panic_reason, Some(PanicReason::Bounds));
        sigma.clear_panic();

        // Range indexing produces a slice that reads through the array.
        let e = Expr::Index(
            Node::new(ident("xs")),
            Node::new(Expr::Range(
                Some(Node::new(int(1))),
                Some(Node::new(int(3))),
                RangeKind::Exclusive,
            )),
        );
        let slice = eval_expr(&ectx, &mut sigma, &e).unwrap();
        match slice {
            Value::Slice { start, len, .. } => {
                assert_eq!(start, 1);
                assert_eq!(len, 2);
            }
            other => panic!("{:?}", other),
        }
        sigma.bind("s", slice, crate::sigma::BindInfo::default());
        let e = Expr::Index(Node::new(ident("s")), Node::new(int(0)));
        assert_eq!(eval_expr(&ectx, &mut sigma, &e).unwrap(), iv(20));
    }

    #[test]
    fn test_match_with_guards() {
        let (ctx, mut sigma) = harness();
        let ectx = EvalCtx::new(&ctx, p(&["m"]));

        let arms = vec![
            MatchArm {
                pattern: node(Pattern::EnumTuple(
                    p(&["Opt"]),
                    String::from("Some"),
                    vec![node(Pattern::Ident(String::from("x")))],
                )),
                guard: Some(node(bin(BinOp::Gt, ident("x"), int(0)))),
                body: node(ident("x")),
            },
            MatchArm {
                pattern: node(Pattern::EnumTuple(
                    p(&["Opt"]),
                    String::from("Some"),
                    vec![node(Pattern::Wildcard)],
                )),
                guard: None,
                body: node(int(0)),
            },
            MatchArm {
                pattern: node(Pattern::EnumTuple(p(&["Opt"]), String::from("None"), vec![])),
                guard: None,
                body: node(Expr::Unary(UnOp::Neg, node(int(1)))),
            },
        ];

        let run = |sigma: &mut Sigma, v: Value| {
            sigma.bind("v", v, crate::sigma::BindInfo::default());
            let e = Expr::Match(Node::new(ident("v")), arms.clone());
            eval_expr(&EvalCtx::new(&ctx, p(&["m"])), sigma, &e)
        };

        // The guard passes for Some(3).
        assert_eq!(run(&mut sigma, some(iv(3))).unwrap(), iv(3));
        // For Some(-2) the guard fails, the arm scope unwinds, and the
        // second arm matches.
        assert_eq!(run(&mut sigma, some(iv(-2))).unwrap(), iv(0));
        assert_eq!(run(&mut sigma, none()).unwrap(), iv(-1));
        let _ = ectx;
    }

    #[test]
    fn test_region_release_invalidates_aliases() {
        let (ctx, mut sigma) = harness();
        let ectx = EvalCtx::new(&ctx, p(&["m"]));
        sigma.bind("outer", Value::Unit, crate::sigma::BindInfo::default());

        // region { let x = alloc 42; outer = x } then *outer panics.
        let region = Expr::Region(
            None,
            node(block(
                vec![
                    Stmt::Bind(
                        BindKind::Let,
                        node(Pattern::Ident(String::from("x"))),
                        None,
                        node(Expr::Alloc(node(int(42)), None)),
                    ),
                    Stmt::Assign(node(ident("outer")), node(ident("x"))),
                ],
                None,
            )),
        );
        eval_expr(&ectx, &mut sigma, &region).unwrap();

        let deref = Expr::Deref(node(ident("outer")));
        assert_eq!(eval_expr(&ectx, &mut sigma, &deref), Err(Control::Panic));
        assert_eq!(sigma.panic_reason, Some(PanicReason::ExpiredDeref));
        assert_eq!(panic_code(PanicReason::ExpiredDeref), 0x09);
    }

    #[test]
    fn test_frame_resets_inside_region() {
        let (ctx, mut sigma) = harness();
        let ectx = EvalCtx::new(&ctx, p(&["m"]));
        sigma.bind("before", Value::Unit, crate::sigma::BindInfo::default());
        sigma.bind("during", Value::Unit, crate::sigma::BindInfo::default());

        let region = Expr::Region(
            Some(String::from("r")),
            node(block(
                vec![
                    Stmt::Assign(node(ident("before")), node(Expr::Alloc(node(int(1)), None))),
                    Stmt::Expr(node(Expr::Frame(
                        Some(String::from("r")),
                        node(block(
                            vec![Stmt::Assign(
                                node(ident("during")),
                                node(Expr::Alloc(node(int(2)), None)),
                            )],
                            None,
                        )),
                    ))),
                    // After the frame, the pre-frame allocation still
                    // reads; the frame's own is gone.
                    Stmt::Expr(node(Expr::Deref(node(ident("before"))))),
                ],
                Some(Expr::Deref(node(ident("during")))),
            )),
        );
        assert_eq!(eval_expr(&ectx, &mut sigma, &region), Err(Control::Panic));
        assert_eq!(sigma.panic_reason, Some(PanicReason::ExpiredDeref));
    }

    #[test]
    fn test_try_propagation() {
        let (ctx, mut sigma) = harness();
        let mut ectx = EvalCtx::new(&ctx, p(&["m"]));
        ectx.ret_ty = Some(crate::types::prim("i32"));

        let success = Value::Union {
            member: crate::types::prim("i32"),
            value: Box::new(iv(3)),
        };
        sigma.bind("ok", success, crate::sigma::BindInfo::default());
        let e = Expr::Try(node(ident("ok")));
        assert_eq!(eval_expr(&ectx, &mut sigma, &e).unwrap(), iv(3));

        let failure = Value::Union {
            member: crate::types::prim("bool"),
            value: Box::new(Value::Bool(false)),
        };
        sigma.bind("err", failure.clone(), crate::sigma::BindInfo::default());
        let e = Expr::Try(node(ident("err")));
        assert_eq!(
            eval_expr(&ectx, &mut sigma, &e),
            Err(Control::Return(Some(failure)))
        );
    }

    #[test]
    fn test_string_builtin_methods() {
        let (ctx, mut sigma) = harness();
        let ectx = EvalCtx::new(&ctx, p(&["m"]));
        let recv = Expr::Lit(Literal::Str(String::from("hello")));

        let e = Expr::MethodCall(Node::new(recv.clone()), String::from("length"), vec![]);
        match eval_expr(&ectx, &mut sigma, &e).unwrap() {
            Value::Int(i) => assert_eq!(i.magnitude, 5),
            other         => panic!("{:?}", other),
        }

        let e = Expr::MethodCall(Node::new(recv), String::from("is_empty"), vec![]);
        assert_eq!(eval_expr(&ectx, &mut sigma, &e).unwrap(), Value::Bool(false));
    }

    #[test]
    fn test_null_deref_panics() {
        let (ctx, mut sigma) = harness();
        let ectx = EvalCtx::new(&ctx, p(&["m"]));
        sigma.bind(
            "p",
            Value::Ptr { state: PtrState::Null, addr: 0 },
            crate::sigma::BindInfo::default(),
        );
        let e = Expr::Deref(node(ident("p")));
        assert_eq!(eval_expr(&ectx, &mut sigma, &e), Err(Control::Panic));
        assert_eq!(sigma.panic_reason, Some(PanicReason::NullDeref));
    }
}
