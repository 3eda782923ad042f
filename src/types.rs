// Semantic types: the canonical representation every later phase works
// over, plus lowering from the syntactic form, equivalence, subtyping,
// literal typing, and the bitcopy judgement.

use crate::ast::{self, Node, ParamMode, Path, Permission, PtrState, RawPtrQual, Seq, SeqState};
use crate::context::Context;
use crate::resolve::{self, EntityKind};


#[derive(Clone, Debug, PartialEq)]
pub struct FuncParam {
    pub mode: ParamMode,
    pub ty: Node<Ty>,
}


// The canonical semantic type. Named types are fully resolved paths;
// aliases never survive lowering.
#[derive(Clone, Debug, PartialEq)]
pub enum Ty {
    Prim(String),
    Perm(Permission, Node<Ty>),
    Ptr(Node<Ty>, Option<PtrState>),
    RawPtr(RawPtrQual, Node<Ty>),
    Tuple(Seq<Ty>),
    Array(Node<Ty>, u64),
    Slice(Node<Ty>),
    Func(Vec<FuncParam>, Node<Ty>),
    Union(Seq<Ty>),
    Range,
    Str(Option<SeqState>),
    Bytes(Option<SeqState>),
    Dynamic(Path),
    Refine(Node<Ty>, String),
    Opaque(Path),
    Named(Path, Seq<Ty>),
    ModalState(Path, String, Seq<Ty>),
}


#[derive(Clone, Debug, PartialEq)]
pub enum TypeError {
    UnknownType(String),
    Resolve(resolve::ResolveError),
    ConstLen,
    IntLitOverflow(String),
    IntLitRange(String, String),
    IntLitBadDigit(String),
    FloatSuffixMismatch(String),
    FloatLitMalformed(String),
    NullLiteralInfer,
    LiteralMismatch,
    TupleIndexNonConst,
    TupleIndexOob(usize, usize),
    TupleAccessNotTuple,
    ValueUseNonBitcopyPlace,
    PatDup(String),
    PatTupleArity(usize, usize),
    PatShape,
    RangePatternNonConst,
    RangePatternEmpty,
    FieldUnknown(String),
    FieldNotVisible(String),
    VariantUnknown(String),
    StateUnknown(String),
}


use TypeError::*;


impl TypeError {
    pub fn diag_id(&self) -> &'static str {
        match self {
            UnknownType(_)          => "LowerType-Unknown",
            Resolve(err)            => err.diag_id(),
            ConstLen                => "ConstLen-Err",
            IntLitOverflow(_)       => "Int-Literal-Overflow",
            IntLitRange(_, _)       => "Int-Literal-Range",
            IntLitBadDigit(_)       => "Int-Literal-Digit",
            FloatSuffixMismatch(_)  => "E-TYP-1531",
            FloatLitMalformed(_)    => "Float-Literal-Malformed",
            NullLiteralInfer        => "NullLiteral-Infer-Err",
            LiteralMismatch         => "Literal-Mismatch",
            TupleIndexNonConst      => "TupleIndex-NonConst",
            TupleIndexOob(_, _)     => "TupleIndex-OOB",
            TupleAccessNotTuple     => "TupleAccess-NotTuple",
            ValueUseNonBitcopyPlace => "ValueUse-NonBitcopyPlace",
            PatDup(_)               => "Pat-Dup-Err",
            PatTupleArity(_, _)     => "Pat-Tuple-Arity-Err",
            PatShape                => "Pat-Shape-Err",
            RangePatternNonConst    => "RangePattern-NonConst",
            RangePatternEmpty       => "RangePattern-Empty",
            FieldUnknown(_)         => "Field-Unknown",
            FieldNotVisible(_)      => "Field-NotVisible",
            VariantUnknown(_)       => "Variant-Unknown",
            StateUnknown(_)         => "State-Unknown",
        }
    }
}


pub type TypeCheck = Result<Node<Ty>, TypeError>;


pub const INT_PRIMS: &[&str] = &[
    "i8", "i16", "i32", "i64", "i128", "isize", "u8", "u16", "u32", "u64", "u128", "usize",
];


pub fn is_int_prim(name: &str) -> bool {
    INT_PRIMS.contains(&name)
}


pub fn is_signed_int(name: &str) -> bool {
    name.starts_with('i')
}


pub fn int_bits(name: &str) -> Option<u32> {
    match name {
        "i8" | "u8"              => Some(8),
        "i16" | "u16"            => Some(16),
        "i32" | "u32"            => Some(32),
        "i64" | "u64"            => Some(64),
        "isize" | "usize"        => Some(64),
        "i128" | "u128"          => Some(128),
        _                        => None,
    }
}


pub fn is_float_prim(name: &str) -> bool {
    name == "f16" || name == "f32" || name == "f64"
}


pub fn prim(name: &str) -> Node<Ty> {
    Node::new(Ty::Prim(String::from(name)))
}


pub fn unit_ty() -> Node<Ty> {
    prim("()")
}


// Does an unsigned magnitude (optionally negated) fit the integer type?
pub fn in_range_int(magnitude: u128, negative: bool, ty: &str) -> bool {
    let bits = match int_bits(ty) {
        Some(b) => b,
        None    => return false,
    };
    if is_signed_int(ty) {
        if negative {
            // |MIN| = 2^(bits-1)
            if bits == 128 {
                magnitude <= 1u128 << 127
            } else {
                magnitude <= 1u128 << (bits - 1)
            }
        } else if bits == 128 {
            magnitude <= u128::MAX >> 1
        } else {
            magnitude < 1u128 << (bits - 1)
        }
    } else if negative {
        magnitude == 0
    } else if bits == 128 {
        true
    } else {
        magnitude < 1u128 << bits
    }
}


// Parse integer literal text: optional 0x/0o/0b base prefix, `_`
// separators, 128-bit arithmetic, overflow rejected.
pub fn parse_int_literal(text: &str) -> Result<u128, TypeError> {
    let (base, digits) = if text.starts_with("0x") || text.starts_with("0X") {
        (16u128, &text[2..])
    } else if text.starts_with("0o") || text.starts_with("0O") {
        (8, &text[2..])
    } else if text.starts_with("0b") || text.starts_with("0B") {
        (2, &text[2..])
    } else {
        (10, text)
    };
    let mut value: u128 = 0;
    let mut any = false;
    for c in digits.chars() {
        if c == '_' {
            continue;
        }
        let digit = match c.to_digit(base as u32) {
            Some(d) => d as u128,
            None    => return Err(IntLitBadDigit(String::from(text))),
        };
        any = true;
        value = value
            .checked_mul(base)
            .and_then(|v| v.checked_add(digit))
            .ok_or_else(|| IntLitOverflow(String::from(text)))?;
    }
    if !any {
        return Err(IntLitBadDigit(String::from(text)));
    }
    Ok(value)
}


// Strip any outer permission wrappers.
pub fn strip_perm(ty: &Node<Ty>) -> Node<Ty> {
    match &**ty {
        Ty::Perm(_, base) => strip_perm(base),
        _                 => ty.clone(),
    }
}


// Structural equivalence. Permissions are significant here; callers that
// want them gone strip first.
pub fn type_equiv(a: &Ty, b: &Ty) -> bool {
    match (a, b) {
        (Ty::Prim(x), Ty::Prim(y)) => x == y,
        (Ty::Perm(pa, ba), Ty::Perm(pb, bb)) => pa == pb && type_equiv(ba, bb),
        (Ty::Ptr(ea, sa), Ty::Ptr(eb, sb)) => sa == sb && type_equiv(ea, eb),
        (Ty::RawPtr(qa, ea), Ty::RawPtr(qb, eb)) => qa == qb && type_equiv(ea, eb),
        (Ty::Tuple(xs), Ty::Tuple(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| type_equiv(x, y))
        }
        (Ty::Array(ea, na), Ty::Array(eb, nb)) => na == nb && type_equiv(ea, eb),
        (Ty::Slice(ea), Ty::Slice(eb)) => type_equiv(ea, eb),
        (Ty::Func(pa, ra), Ty::Func(pb, rb)) => {
            pa.len() == pb.len()
                && pa
                    .iter()
                    .zip(pb)
                    .all(|(x, y)| x.mode == y.mode && type_equiv(&x.ty, &y.ty))
                && type_equiv(ra, rb)
        }
        (Ty::Union(xs), Ty::Union(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| type_equiv(x, y))
        }
        (Ty::Range, Ty::Range) => true,
        (Ty::Str(sa), Ty::Str(sb)) => sa == sb,
        (Ty::Bytes(sa), Ty::Bytes(sb)) => sa == sb,
        (Ty::Dynamic(pa), Ty::Dynamic(pb)) => pa == pb,
        (Ty::Refine(ba, na), Ty::Refine(bb, nb)) => na == nb && type_equiv(ba, bb),
        (Ty::Opaque(pa), Ty::Opaque(pb)) => pa == pb,
        (Ty::Named(pa, aa), Ty::Named(pb, ab)) => {
            pa == pb && aa.len() == ab.len() && aa.iter().zip(ab).all(|(x, y)| type_equiv(x, y))
        }
        (Ty::ModalState(pa, sa, aa), Ty::ModalState(pb, sb, ab)) => {
            pa == pb
                && sa == sb
                && aa.len() == ab.len()
                && aa.iter().zip(ab).all(|(x, y)| type_equiv(x, y))
        }
        _ => false,
    }
}


// T <: U iff T is equivalent to U, or U is a union with a member
// equivalent to T. Function types are invariant.
pub fn subtyping(t: &Ty, u: &Ty) -> bool {
    if type_equiv(t, u) {
        return true;
    }
    if let Ty::Union(members) = u {
        return members.iter().any(|m| type_equiv(t, m));
    }
    false
}


// Lower a syntactic type into its semantic form. Total apart from the
// listed diagnostics; unknown names surface the resolver's verdict.
pub fn lower_type(ctx: &Context, from: &[String], ty: &ast::Type) -> TypeCheck {
    match ty {
        ast::Type::Prim(name) => Ok(prim(name)),
        ast::Type::Perm(perm, base) => Ok(Node::new(Ty::Perm(
            *perm,
            lower_type(ctx, from, base)?,
        ))),
        ast::Type::Ptr(elem, state) => Ok(Node::new(Ty::Ptr(
            lower_type(ctx, from, elem)?,
            *state,
        ))),
        ast::Type::RawPtr(qual, elem) => Ok(Node::new(Ty::RawPtr(
            *qual,
            lower_type(ctx, from, elem)?,
        ))),
        ast::Type::Tuple(items) => {
            let items = items
                .iter()
                .map(|t| lower_type(ctx, from, t))
                .collect::<Result<Seq<Ty>, TypeError>>()?;
            Ok(Node::new(Ty::Tuple(items)))
        }
        ast::Type::Array(elem, len) => {
            let elem = lower_type(ctx, from, elem)?;
            let len = const_len(len)?;
            Ok(Node::new(Ty::Array(elem, len)))
        }
        ast::Type::Slice(elem) => Ok(Node::new(Ty::Slice(lower_type(ctx, from, elem)?))),
        ast::Type::Func(params, ret) => {
            let params = params
                .iter()
                .map(|t| {
                    Ok(FuncParam {
                        mode: ParamMode::Alias,
                        ty: lower_type(ctx, from, t)?,
                    })
                })
                .collect::<Result<Vec<FuncParam>, TypeError>>()?;
            Ok(Node::new(Ty::Func(params, lower_type(ctx, from, ret)?)))
        }
        ast::Type::Union(members) => {
            let members = members
                .iter()
                .map(|t| lower_type(ctx, from, t))
                .collect::<Result<Seq<Ty>, TypeError>>()?;
            Ok(Node::new(Ty::Union(members)))
        }
        ast::Type::Range => Ok(Node::new(Ty::Range)),
        ast::Type::Str(state) => Ok(Node::new(Ty::Str(*state))),
        ast::Type::Bytes(state) => Ok(Node::new(Ty::Bytes(*state))),
        ast::Type::Dynamic(path) => {
            let resolved = resolve_type_path(ctx, from, path, EntityKind::Class)?;
            Ok(Node::new(Ty::Dynamic(resolved)))
        }
        ast::Type::Named(path, args) => lower_named(ctx, from, path, args),
        ast::Type::ModalState(path, state, args) => {
            let resolved = resolve_type_path(ctx, from, path, EntityKind::Type)?;
            let modal = ctx
                .lookup_modal(&resolved)
                .ok_or_else(|| UnknownType(crate::context::path_key(path)))?;
            if !modal.states.iter().any(|s| &s.name == state) {
                return Err(StateUnknown(state.clone()));
            }
            let args = args
                .iter()
                .map(|t| lower_type(ctx, from, t))
                .collect::<Result<Seq<Ty>, TypeError>>()?;
            Ok(Node::new(Ty::ModalState(resolved, state.clone(), args)))
        }
    }
}


// Array lengths must be constant-evaluable: an integer literal, suffixed
// or not.
fn const_len(len: &ast::Expr) -> Result<u64, TypeError> {
    match len {
        ast::Expr::Lit(ast::Literal::Int(text, _)) => {
            let value = parse_int_literal(text)?;
            if value > u64::MAX as u128 {
                return Err(ConstLen);
            }
            Ok(value as u64)
        }
        _ => Err(ConstLen),
    }
}


// Resolve a (possibly single-segment) type path to its declaring module.
fn resolve_type_path(
    ctx: &Context,
    from: &[String],
    path: &[String],
    kind: EntityKind,
) -> Result<Path, TypeError> {
    if path.len() == 1 {
        let map = ctx
            .name_maps
            .get(&crate::context::path_key(from))
            .ok_or_else(|| UnknownType(path[0].clone()))?;
        let entity = map
            .get(&path[0])
            .filter(|e| e.kind == kind)
            .ok_or_else(|| UnknownType(path[0].clone()))?;
        let mut full = entity.origin.clone();
        full.push(path[0].clone());
        Ok(full)
    } else {
        let (module, name) = path.split_at(path.len() - 1);
        let entity = resolve::resolve_qualified(ctx, from, module, &name[0], kind)
            .map_err(Resolve)?;
        let mut full = entity.origin.clone();
        full.push(name[0].clone());
        Ok(full)
    }
}


fn lower_named(ctx: &Context, from: &[String], path: &[String], args: &[Node<ast::Type>]) -> TypeCheck {
    let resolved = resolve_type_path(ctx, from, path, EntityKind::Type)?;
    // Aliases vanish here; everything else keeps its path and lowered
    // arguments.
    if let Some(crate::context::TypeDecl::Alias(alias)) = ctx.lookup_type(&resolved) {
        let alias_module = &resolved[..resolved.len() - 1];
        return lower_type(ctx, alias_module, &alias.ty);
    }
    if ctx.lookup_type(&resolved).is_none() {
        return Err(UnknownType(crate::context::path_key(&resolved)));
    }
    let args = args
        .iter()
        .map(|t| lower_type(ctx, from, t))
        .collect::<Result<Seq<Ty>, TypeError>>()?;
    Ok(Node::new(Ty::Named(resolved, args)))
}


// The type of a literal, possibly steered by an expected type.
pub fn type_literal(expected: Option<&Ty>, lit: &ast::Literal) -> TypeCheck {
    match lit {
        ast::Literal::Unit => Ok(unit_ty()),
        ast::Literal::Bool(_) => Ok(prim("bool")),
        ast::Literal::Char(_) => Ok(prim("char")),
        ast::Literal::Str(_) => Ok(Node::new(Ty::Str(Some(SeqState::View)))),
        ast::Literal::Null => match expected.map(|e| strip_perm_ref(e)) {
            Some(Ty::RawPtr(qual, elem)) => {
                Ok(Node::new(Ty::RawPtr(qual, elem)))
            }
            _ => Err(NullLiteralInfer),
        },
        ast::Literal::Int(text, suffix) => {
            let value = parse_int_literal(text)?;
            let ty_name = match suffix {
                Some(suffix) => suffix.clone(),
                None => match expected.map(|e| strip_perm_ref(e)) {
                    Some(Ty::Prim(name)) if is_int_prim(&name) => name,
                    _ => String::from("i32"),
                },
            };
            if !is_int_prim(&ty_name) {
                return Err(IntLitBadDigit(String::from(text)));
            }
            if !in_range_int(value, false, &ty_name) {
                return Err(IntLitRange(String::from(text), ty_name));
            }
            Ok(prim(&ty_name))
        }
        ast::Literal::Float(text, suffix) => {
            if text.parse::<f64>().is_err() {
                return Err(FloatLitMalformed(String::from(text)));
            }
            match suffix.as_deref() {
                Some("f16") | Some("f32") | Some("f64") => {
                    let name = suffix.as_deref().unwrap();
                    if let Some(Ty::Prim(expect)) = expected.map(|e| strip_perm_ref(e)) {
                        if is_float_prim(&expect) && expect != name {
                            return Err(FloatSuffixMismatch(String::from(name)));
                        }
                    }
                    Ok(prim(name))
                }
                // Bare `f` floats freely: take the expected float type,
                // falling back to f32.
                Some("f") => match expected.map(|e| strip_perm_ref(e)) {
                    Some(Ty::Prim(name)) if is_float_prim(&name) => Ok(prim(&name)),
                    _ => Ok(prim("f32")),
                },
                // No suffix: f64 unless the context names another float.
                None => match expected.map(|e| strip_perm_ref(e)) {
                    Some(Ty::Prim(name)) if is_float_prim(&name) => Ok(prim(&name)),
                    _ => Ok(prim("f64")),
                },
                Some(other) => Err(FloatSuffixMismatch(String::from(other))),
            }
        }
    }
}


fn strip_perm_ref(ty: &Ty) -> Ty {
    match ty {
        Ty::Perm(_, base) => strip_perm_ref(base),
        other             => other.clone(),
    }
}


// Is a value of this type duplicated by copying its bytes?
pub fn bitcopy(ctx: &Context, ty: &Ty) -> bool {
    match ty {
        Ty::Prim(_) => true,
        Ty::Perm(Permission::Unique, _) => false,
        Ty::Perm(_, base) => bitcopy(ctx, base),
        Ty::Ptr(_, _) => false,
        Ty::RawPtr(_, _) => true,
        Ty::Func(_, _) => true,
        Ty::Slice(_) => true,
        Ty::Dynamic(_) => true,
        Ty::Range => true,
        Ty::Str(Some(SeqState::View)) => true,
        Ty::Str(_) => false,
        Ty::Bytes(Some(SeqState::View)) => true,
        Ty::Bytes(_) => false,
        Ty::Tuple(items) => items.iter().all(|t| bitcopy(ctx, t)),
        Ty::Array(elem, _) => bitcopy(ctx, elem),
        Ty::Union(_) => false,
        Ty::Refine(base, _) => bitcopy(ctx, base),
        Ty::Opaque(_) => false,
        Ty::Named(path, _) => match ctx.lookup_record(path) {
            Some(decl) => decl.bitcopy,
            None       => false,
        },
        Ty::ModalState(_, _, _) => false,
    }
}


#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AccessPos {
    Place,
    Value,
}


// Tuple field access. The index must be a constant decimal literal; in
// place position the base's permission carries to the element, in value
// position the element must be bitcopy.
pub fn tuple_index_type(
    ctx: &Context,
    base: &Node<Ty>,
    index_text: &str,
    pos: AccessPos,
) -> TypeCheck {
    let index: usize = index_text
        .parse()
        .map_err(|_| TupleIndexNonConst)?;
    let perm = match &**base {
        Ty::Perm(p, _) => Some(*p),
        _              => None,
    };
    let stripped = strip_perm(base);
    let items = match &*stripped {
        Ty::Tuple(items) => items.clone(),
        _                => return Err(TupleAccessNotTuple),
    };
    if index >= items.len() {
        return Err(TupleIndexOob(index, items.len()));
    }
    let elem = items[index].clone();
    match pos {
        AccessPos::Place => Ok(match perm {
            Some(p) => Node::new(Ty::Perm(p, elem)),
            None    => elem,
        }),
        AccessPos::Value => {
            if bitcopy(ctx, &elem) {
                Ok(elem)
            } else {
                Err(ValueUseNonBitcopyPlace)
            }
        }
    }
}
