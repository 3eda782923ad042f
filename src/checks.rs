// Panic taxonomy and the check lowerings shared between the evaluator
// and the back end: bounds, slice bounds, casts, transmutes, raw
// dereferences, and the cleanup plan run ahead of a panic.

use crate::ast::PtrState;
use crate::types::Ty;


#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PanicReason {
    ErrorExpr,
    ErrorStmt,
    DivZero,
    Overflow,
    Shift,
    Bounds,
    Cast,
    NullDeref,
    ExpiredDeref,
    InitPanic,
    Other,
}


// Codes written into the panic record; the runtime prints them and the
// linker contract fixes them.
pub fn panic_code(reason: PanicReason) -> u32 {
    match reason {
        PanicReason::ErrorExpr    => 0x01,
        PanicReason::ErrorStmt    => 0x02,
        PanicReason::DivZero      => 0x03,
        PanicReason::Overflow     => 0x04,
        PanicReason::Shift        => 0x05,
        PanicReason::Bounds       => 0x06,
        PanicReason::Cast         => 0x07,
        PanicReason::NullDeref    => 0x08,
        PanicReason::ExpiredDeref => 0x09,
        PanicReason::InitPanic    => 0x0A,
        PanicReason::Other        => 0xFF,
    }
}


pub fn panic_reason_string(reason: PanicReason) -> &'static str {
    match reason {
        PanicReason::ErrorExpr    => "ErrorExpr",
        PanicReason::ErrorStmt    => "ErrorStmt",
        PanicReason::DivZero      => "DivZero",
        PanicReason::Overflow     => "Overflow",
        PanicReason::Shift        => "Shift",
        PanicReason::Bounds       => "Bounds",
        PanicReason::Cast         => "Cast",
        PanicReason::NullDeref    => "NullDeref",
        PanicReason::ExpiredDeref => "ExpiredDeref",
        PanicReason::InitPanic    => "InitPanic",
        PanicReason::Other        => "Other",
    }
}


// Index check: in-bounds means strictly below the length.
pub fn check_index(len: u64, idx: u64) -> bool {
    idx < len
}


// Resolve a range against a sequence length. None means a Bounds panic.
pub fn slice_bounds(lo: Option<u64>, hi: Option<u64>, inclusive: bool, len: u64) -> Option<(u64, u64)> {
    let start = lo.unwrap_or(0);
    let end = match hi {
        Some(hi) if inclusive => hi.checked_add(1)?,
        Some(hi)              => hi,
        None                  => len,
    };
    if start <= end && end <= len {
        Some((start, end))
    } else {
        None
    }
}


// What a raw-pointer dereference lowers to, keyed on the static state.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RawDerefPlan {
    Read,
    Panic(PanicReason),
}


pub fn raw_deref_plan(state: Option<PtrState>) -> RawDerefPlan {
    match state {
        Some(PtrState::Valid)   => RawDerefPlan::Read,
        Some(PtrState::Null)    => RawDerefPlan::Panic(PanicReason::NullDeref),
        Some(PtrState::Expired) => RawDerefPlan::Panic(PanicReason::ExpiredDeref),
        None                    => RawDerefPlan::Read,
    }
}


// Transmute is a bit reinterpretation guarded by a size equality; the
// destination pattern must additionally satisfy bit-level validity,
// which the evaluator and emitter check with ValidValue.
pub fn transmute_size_ok(src_size: u64, dst_size: u64) -> bool {
    src_size == dst_size
}


// The static shape of casts the emitter needs to distinguish.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CastPlan {
    IntToInt,
    IntToFloat,
    FloatToInt,
    FloatToFloat,
    BoolToInt,
    IntToBool,
    CharToInt,
    IntToChar,
    Identity,
    Invalid,
}


pub fn cast_plan(src: &Ty, dst: &Ty) -> CastPlan {
    use crate::types::{is_float_prim, is_int_prim};
    match (src, dst) {
        (Ty::Prim(s), Ty::Prim(d)) => {
            if s == d {
                CastPlan::Identity
            } else if is_int_prim(s) && is_int_prim(d) {
                CastPlan::IntToInt
            } else if is_int_prim(s) && is_float_prim(d) {
                CastPlan::IntToFloat
            } else if is_float_prim(s) && is_int_prim(d) {
                CastPlan::FloatToInt
            } else if is_float_prim(s) && is_float_prim(d) {
                CastPlan::FloatToFloat
            } else if s == "bool" && is_int_prim(d) {
                CastPlan::BoolToInt
            } else if is_int_prim(s) && d == "bool" {
                CastPlan::IntToBool
            } else if s == "char" && d == "u32" {
                CastPlan::CharToInt
            } else if s == "u32" && d == "char" {
                CastPlan::IntToChar
            } else {
                CastPlan::Invalid
            }
        }
        _ => CastPlan::Invalid,
    }
}


// One scope's cleanup obligations, innermost last: the emitter keeps a
// stack of these while walking a function body.
#[derive(Clone, Debug, PartialEq)]
pub struct ScopeCleanup {
    // Responsible bindings in declaration order.
    pub drops: Vec<String>,
    // Deferred blocks in appearance order, identified by index.
    pub defers: Vec<usize>,
    pub is_region: bool,
}


#[derive(Clone, Debug, PartialEq)]
pub enum CleanupAction {
    RunDefer(usize),
    DropBinding(String),
    ReleaseRegion,
}


// The actions to execute when unwinding from the innermost scope to the
// function root: per scope, defers LIFO, then drops in reverse
// declaration order, then the region release if the scope carries one.
pub fn cleanup_plan_to_function_root(scopes: &[ScopeCleanup]) -> Vec<CleanupAction> {
    let mut plan = Vec::new();
    for scope in scopes.iter().rev() {
        for &defer in scope.defers.iter().rev() {
            plan.push(CleanupAction::RunDefer(defer));
        }
        for name in scope.drops.iter().rev() {
            plan.push(CleanupAction::DropBinding(name.clone()));
        }
        if scope.is_region {
            plan.push(CleanupAction::ReleaseRegion);
        }
    }
    plan
}
