// ABI classification and symbol spelling for the back end. The numbers
// here pair with layout.rs; together they are the calling convention
// contract with emitted code.

use crate::ast::{Node, ParamMode, RecvMode};
use crate::context::Context;
use crate::layout::{layout_of, record_layout_of, Layout};
use crate::mangle::{mangle, mangle_module_path};
use crate::types::{Ty, TypeError};


pub const BY_VAL_MAX: u64 = 16;
pub const BY_VAL_ALIGN: u64 = 8;
pub const PTR_SIZE: u64 = 8;
pub const PTR_ALIGN: u64 = 8;
pub const PANIC_OUT_NAME: &str = "__panic";


#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PassKind {
    ByValue,
    ByRef,
}


#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RetKind {
    ByValue,
    SRet,
}


#[derive(Clone, Debug, PartialEq)]
pub struct AbiParam {
    pub pass: PassKind,
    pub layout: Layout,
}


#[derive(Clone, Debug, PartialEq)]
pub struct AbiCallInfo {
    pub params: Vec<AbiParam>,
    pub ret: RetKind,
    pub ret_layout: Layout,
    pub has_sret: bool,
}


pub fn abi_ty(ctx: &Context, ty: &Node<Ty>) -> Result<Layout, TypeError> {
    layout_of(ctx, ty)
}


pub fn by_val_ok(layout: Layout) -> bool {
    layout.size <= BY_VAL_MAX && layout.align <= BY_VAL_ALIGN
}


// Only moved parameters can travel in registers; aliases are always a
// pointer to the caller's storage.
pub fn abi_param(ctx: &Context, mode: ParamMode, ty: &Node<Ty>) -> Result<AbiParam, TypeError> {
    let layout = abi_ty(ctx, ty)?;
    let pass = if mode == ParamMode::Move && by_val_ok(layout) {
        PassKind::ByValue
    } else {
        PassKind::ByRef
    };
    Ok(AbiParam { pass, layout })
}


pub fn abi_ret(ctx: &Context, ty: &Node<Ty>) -> Result<(RetKind, Layout), TypeError> {
    let layout = abi_ty(ctx, ty)?;
    let kind = if by_val_ok(layout) {
        RetKind::ByValue
    } else {
        RetKind::SRet
    };
    Ok((kind, layout))
}


pub fn abi_call(
    ctx: &Context,
    params: &[(ParamMode, Node<Ty>)],
    ret: &Node<Ty>,
) -> Result<AbiCallInfo, TypeError> {
    let mut out = Vec::with_capacity(params.len());
    for (mode, ty) in params {
        out.push(abi_param(ctx, *mode, ty)?);
    }
    let (ret_kind, ret_layout) = abi_ret(ctx, ret)?;
    Ok(AbiCallInfo {
        params: out,
        ret: ret_kind,
        ret_layout,
        has_sret: ret_kind == RetKind::SRet,
    })
}


// {panicked: bool, code: u32}: the record every user procedure writes
// through its hidden out-parameter.
pub fn panic_record_layout() -> (Layout, Vec<u64>) {
    record_layout_of(&[Layout::new(1, 1), Layout::new(4, 4)])
}


// Entry points and runtime symbols handle traps themselves; everything
// user-defined takes the out-parameter.
pub fn needs_panic_out(is_entry: bool, is_runtime: bool) -> bool {
    !is_entry && !is_runtime
}


pub fn recv_mode_name(mode: RecvMode) -> &'static str {
    match mode {
        RecvMode::Const  => "const",
        RecvMode::Unique => "unique",
        RecvMode::Shared => "shared",
        RecvMode::Move   => "move",
    }
}


pub fn proc_symbol(module_path: &str, name: &str) -> String {
    format!("{}_x3a_x3a{}", mangle_module_path(module_path), mangle(name))
}


pub fn method_symbol(record_path: &str, name: &str) -> String {
    format!("{}__method_{}", mangle_module_path(record_path), mangle(name))
}


pub fn state_method_symbol(modal_path: &str, state: &str, recv: RecvMode, name: &str) -> String {
    format!(
        "{}__state_{}__method_{}_{}",
        mangle_module_path(modal_path),
        mangle(state),
        recv_mode_name(recv),
        mangle(name)
    )
}


pub fn transition_symbol(modal_path: &str, state: &str, name: &str) -> String {
    format!(
        "{}__transition_{}_{}",
        mangle_module_path(modal_path),
        mangle(state),
        mangle(name)
    )
}
