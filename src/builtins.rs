// Capability built-ins: string and bytes operations, the Region
// intrinsics, the FileSystem capability with its File and DirIter
// modals, the heap allocator, and System::exit. Fallible operations
// produce union-wrapped results, never host errors.

use crate::ast::{Arg, Node, Path, PtrState, RawPtrQual, SeqState};
use crate::checks::PanicReason;
use crate::eval::{eval_expr, write_place, Place};
use crate::exec::{panic_with, Control, Eval, EvalCtx};
use crate::fs::{FileKind, FsError};
use crate::sigma::Sigma;
use crate::types::{prim, Ty};
use crate::value::{IntVal, Value};


fn builtin_path(comps: &[&str]) -> Path {
    comps.iter().map(|s| String::from(*s)).collect()
}


lazy_static! {
    pub static ref FILESYSTEM_CLASS: Path = builtin_path(&["cursive", "fs", "FileSystem"]);
    pub static ref FILE_MODAL: Path = builtin_path(&["cursive", "fs", "File"]);
    pub static ref DIR_ITER_MODAL: Path = builtin_path(&["cursive", "fs", "DirIter"]);
    pub static ref DIR_ENTRY_RECORD: Path = builtin_path(&["cursive", "fs", "DirEntry"]);
    pub static ref FS_ERROR_ENUM: Path = builtin_path(&["cursive", "fs", "FsError"]);
    pub static ref FILE_KIND_ENUM: Path = builtin_path(&["cursive", "fs", "FileKind"]);
    pub static ref HEAP_ALLOCATOR_RECORD: Path = builtin_path(&["cursive", "mem", "HeapAllocator"]);
    pub static ref ALLOC_ERROR_ENUM: Path = builtin_path(&["cursive", "mem", "AllocationError"]);
}


pub fn is_filesystem_class(path: &[String]) -> bool {
    path == &FILESYSTEM_CLASS[..]
}


pub fn is_file_modal(path: &[String]) -> bool {
    path == &FILE_MODAL[..]
}


pub fn is_dir_iter_modal(path: &[String]) -> bool {
    path == &DIR_ITER_MODAL[..]
}


pub fn is_heap_allocator(path: &[String]) -> bool {
    path == &HEAP_ALLOCATOR_RECORD[..]
}


// ---- union plumbing ----

fn union_of(member: Node<Ty>, value: Value) -> Value {
    Value::Union { member, value: Box::new(value) }
}


fn managed_str_ty() -> Node<Ty> {
    Node::new(Ty::Str(Some(SeqState::Managed)))
}


fn managed_bytes_ty() -> Node<Ty> {
    Node::new(Ty::Bytes(Some(SeqState::Managed)))
}


fn named_ty(path: &Path) -> Node<Ty> {
    Node::new(Ty::Named(path.clone(), vec![]))
}


fn alloc_error(size: u64) -> Value {
    let payload = crate::value::EnumPayload::Record(vec![(
        String::from("size"),
        Value::Int(IntVal::usize_val(size)),
    )]);
    union_of(
        named_ty(&ALLOC_ERROR_ENUM),
        Value::Enum {
            path: ALLOC_ERROR_ENUM.clone(),
            variant: String::from("OutOfMemory"),
            payload,
        },
    )
}


fn fs_error(err: FsError) -> Value {
    let (variant, detail) = match err {
        FsError::NotFound(p)      => ("NotFound", p),
        FsError::NotAFile(p)      => ("NotAFile", p),
        FsError::NotADir(p)       => ("NotADir", p),
        FsError::MissingParent(p) => ("MissingParent", p),
        FsError::BadHandle(h)     => ("BadHandle", h.to_string()),
    };
    fs_error_named(variant, &detail)
}


fn fs_error_named(variant: &str, detail: &str) -> Value {
    let payload = crate::value::EnumPayload::Tuple(vec![Value::Str {
        state: SeqState::View,
        bytes: detail.as_bytes().to_vec(),
    }]);
    union_of(
        named_ty(&FS_ERROR_ENUM),
        Value::Enum {
            path: FS_ERROR_ENUM.clone(),
            variant: String::from(variant),
            payload,
        },
    )
}


fn unit_ok() -> Value {
    union_of(prim("()"), Value::Unit)
}


fn str_bytes(value: &Value) -> Option<Vec<u8>> {
    match value {
        Value::Str { bytes, .. } => Some(bytes.clone()),
        _                        => None,
    }
}


// Quota accounting for managed string and bytes storage: the check is
// against the live raw-heap total, the storage itself stays internal.
fn quota_allows(sigma: &Sigma, size: u64) -> bool {
    match sigma.heap_quota {
        Some(quota) => size <= quota,
        None        => true,
    }
}


// ---- string / bytes ----

fn seq_args(ectx: &EvalCtx, sigma: &mut Sigma, args: &[Arg]) -> Result<Vec<Value>, Control> {
    let mut out = Vec::with_capacity(args.len());
    for arg in args {
        out.push(eval_expr(ectx, sigma, &arg.value)?);
    }
    Ok(out)
}


pub fn string_method(
    ectx: &EvalCtx,
    sigma: &mut Sigma,
    recv: &Value,
    place: &Option<Place>,
    name: &str,
    args: &[Arg],
) -> Eval {
    let bytes = match recv {
        Value::Str { bytes, .. } => bytes.clone(),
        _                        => return Err(panic_with(sigma, PanicReason::Other)),
    };
    let args = seq_args(ectx, sigma, args)?;
    match name {
        "length"   => Ok(Value::Int(IntVal::usize_val(bytes.len() as u64))),
        "is_empty" => Ok(Value::Bool(bytes.is_empty())),
        "as_view"  => Ok(Value::Str { state: SeqState::View, bytes }),
        "from" | "to_managed" | "clone_with" => {
            let size = bytes.len() as u64;
            if !quota_allows(sigma, size) {
                return Ok(alloc_error(size));
            }
            Ok(union_of(
                managed_str_ty(),
                Value::Str { state: SeqState::Managed, bytes },
            ))
        }
        "append" => {
            let view = match args.first().and_then(str_bytes) {
                Some(b) => b,
                None    => return Err(panic_with(sigma, PanicReason::Other)),
            };
            let mut combined = bytes;
            combined.extend_from_slice(&view);
            let size = combined.len() as u64;
            if !quota_allows(sigma, size) {
                return Ok(alloc_error(size));
            }
            let place = match place {
                Some(place) => place.clone(),
                None        => return Err(panic_with(sigma, PanicReason::Other)),
            };
            write_place(
                sigma,
                &place,
                Value::Str { state: SeqState::Managed, bytes: combined },
            )?;
            Ok(unit_ok())
        }
        _ => Err(panic_with(sigma, PanicReason::Other)),
    }
}


pub fn bytes_method(
    ectx: &EvalCtx,
    sigma: &mut Sigma,
    recv: &Value,
    place: &Option<Place>,
    name: &str,
    args: &[Arg],
) -> Eval {
    let bytes = match recv {
        Value::Bytes { bytes, .. } => bytes.clone(),
        _                          => return Err(panic_with(sigma, PanicReason::Other)),
    };
    let args = seq_args(ectx, sigma, args)?;
    match name {
        "length"   => Ok(Value::Int(IntVal::usize_val(bytes.len() as u64))),
        "is_empty" => Ok(Value::Bool(bytes.is_empty())),
        "as_view"  => Ok(Value::Bytes { state: SeqState::View, bytes }),
        "from" | "to_managed" | "clone_with" => {
            let size = bytes.len() as u64;
            if !quota_allows(sigma, size) {
                return Ok(alloc_error(size));
            }
            Ok(union_of(
                managed_bytes_ty(),
                Value::Bytes { state: SeqState::Managed, bytes },
            ))
        }
        "append" => {
            let view = match args.first() {
                Some(Value::Bytes { bytes, .. }) => bytes.clone(),
                _ => return Err(panic_with(sigma, PanicReason::Other)),
            };
            let mut combined = bytes;
            combined.extend_from_slice(&view);
            let size = combined.len() as u64;
            if !quota_allows(sigma, size) {
                return Ok(alloc_error(size));
            }
            let place = match place {
                Some(place) => place.clone(),
                None        => return Err(panic_with(sigma, PanicReason::Other)),
            };
            write_place(
                sigma,
                &place,
                Value::Bytes { state: SeqState::Managed, bytes: combined },
            )?;
            Ok(unit_ok())
        }
        _ => Err(panic_with(sigma, PanicReason::Other)),
    }
}


// ---- regions ----

fn region_target_of(sigma: &mut Sigma, value: &Value) -> Result<usize, Control> {
    match value {
        Value::Region { target } => Ok(*target),
        _                        => Err(panic_with(sigma, PanicReason::Other)),
    }
}


// The Region::* procedures are intercepted by their qualified name and
// evaluated as single atomic steps.
pub fn region_intrinsic(sigma: &mut Sigma, name: &str, mut args: Vec<Value>) -> Eval {
    match name {
        "new_scoped" => {
            if !args.is_empty() {
                return Err(panic_with(sigma, PanicReason::Other));
            }
            let scope = sigma.current_scope();
            let target = sigma.new_region_target();
            sigma.push_region(target, scope, None);
            Ok(Value::Region { target })
        }
        "alloc" => {
            if args.len() != 2 {
                return Err(panic_with(sigma, PanicReason::Other));
            }
            let value = args.pop().unwrap();
            let target = region_target_of(sigma, &args[0])?;
            if sigma.is_frozen(target) {
                return Err(panic_with(sigma, PanicReason::Other));
            }
            let addr = sigma
                .region_alloc(target, value)
                .map_err(|r| panic_with(sigma, r))?;
            Ok(Value::Ptr { state: PtrState::Valid, addr })
        }
        "reset_unchecked" | "freeze" | "thaw" | "free_unchecked" => {
            if args.len() != 1 {
                return Err(panic_with(sigma, PanicReason::Other));
            }
            let target = region_target_of(sigma, &args[0])?;
            match name {
                "reset_unchecked" => sigma.reset_target(target, 0),
                "freeze"          => sigma.freeze_target(target),
                "thaw"            => sigma.thaw_target(target),
                _                 => sigma.free_target(target),
            }
            Ok(Value::Unit)
        }
        _ => Err(panic_with(sigma, PanicReason::Other)),
    }
}


pub fn region_method(
    ectx: &EvalCtx,
    sigma: &mut Sigma,
    target: usize,
    name: &str,
    args: &[Arg],
) -> Eval {
    let mut values = vec![Value::Region { target }];
    for arg in args {
        values.push(eval_expr(ectx, sigma, &arg.value)?);
    }
    region_intrinsic(sigma, name, values)
}


// ---- heap allocator ----

pub fn heap_allocator_value(quota: Option<u64>) -> Value {
    let quota_val = match quota {
        Some(q) => Value::Int(IntVal::usize_val(q)),
        None    => Value::Int(IntVal::usize_val(0)),
    };
    Value::Record {
        path: HEAP_ALLOCATOR_RECORD.clone(),
        fields: vec![(String::from("quota"), quota_val)],
    }
}


pub fn heap_method(
    ectx: &EvalCtx,
    sigma: &mut Sigma,
    _recv: &Value,
    name: &str,
    args: &[Arg],
) -> Eval {
    let args = seq_args(ectx, sigma, args)?;
    match name {
        "with_quota" => {
            let quota = match args.first().and_then(|v| v.index_value()) {
                Some(q) => q,
                None    => return Err(panic_with(sigma, PanicReason::Other)),
            };
            sigma.heap_quota = Some(quota);
            Ok(heap_allocator_value(Some(quota)))
        }
        "alloc_raw" => {
            let size = match args.first().and_then(|v| v.index_value()) {
                Some(s) => s,
                None    => return Err(panic_with(sigma, PanicReason::Other)),
            };
            match sigma.raw_alloc(size) {
                Some(addr) => Ok(union_of(
                    Node::new(Ty::RawPtr(RawPtrQual::Mut, prim("u8"))),
                    Value::RawPtr { qual: RawPtrQual::Mut, addr },
                )),
                None => Ok(alloc_error(size)),
            }
        }
        "dealloc_raw" => {
            let addr = match args.first() {
                Some(Value::RawPtr { addr, .. }) => *addr,
                _ => return Err(panic_with(sigma, PanicReason::Other)),
            };
            if !sigma.raw_dealloc(addr) {
                return Err(panic_with(sigma, PanicReason::Other));
            }
            Ok(Value::Unit)
        }
        _ => Err(panic_with(sigma, PanicReason::Other)),
    }
}


// ---- filesystem capability ----

// A capability value is Dynamic over a backing record holding the
// sandbox root; restrict() chains roots.
pub fn filesystem_value(sigma: &mut Sigma, root: &str) -> Value {
    let record = Value::Record {
        path: builtin_path(&["cursive", "fs", "FileSystemImpl"]),
        fields: vec![(
            String::from("root"),
            Value::Str {
                state: SeqState::View,
                bytes: root.as_bytes().to_vec(),
            },
        )],
    };
    let addr = sigma.alloc_local(record);
    Value::Dynamic {
        class_path: FILESYSTEM_CLASS.clone(),
        addr,
        concrete: None,
    }
}


fn capability_root(sigma: &mut Sigma, addr: usize) -> Result<String, Control> {
    let record = sigma.read_addr(addr).map_err(|r| panic_with(sigma, r))?;
    match record.field("root") {
        Some(Value::Str { bytes, .. }) => {
            Ok(String::from_utf8_lossy(bytes).into_owned())
        }
        _ => Err(panic_with(sigma, PanicReason::Other)),
    }
}


// Every operation resolves its path argument under the sandbox root and
// refuses escapes.
fn sandbox_resolve(root: &str, path: &str) -> Option<String> {
    crate::paths::resolve(root, path).map(|r| r.path)
}


fn file_value(handle: u64, state: &str) -> Value {
    Value::Modal {
        path: FILE_MODAL.clone(),
        state: String::from(state),
        fields: vec![(
            String::from("handle"),
            Value::Int(IntVal::from_u64("u64", handle)),
        )],
    }
}


fn file_state_ty(state: &str) -> Node<Ty> {
    Node::new(Ty::ModalState(
        FILE_MODAL.clone(),
        String::from(state),
        vec![],
    ))
}


pub fn filesystem_method(
    ectx: &EvalCtx,
    sigma: &mut Sigma,
    cap_addr: usize,
    name: &str,
    args: &[Arg],
) -> Eval {
    let root = capability_root(sigma, cap_addr)?;
    let args = seq_args(ectx, sigma, args)?;

    // Output streams take a view and bypass path resolution.
    if name == "write_stdout" || name == "write_stderr" {
        let bytes = match args.first().and_then(str_bytes) {
            Some(b) => b,
            None    => return Err(panic_with(sigma, PanicReason::Other)),
        };
        if name == "write_stdout" {
            sigma.stdout_buffer.extend_from_slice(&bytes);
        } else {
            sigma.stderr_buffer.extend_from_slice(&bytes);
        }
        return Ok(Value::Unit);
    }

    let path_arg = match args.first().and_then(str_bytes) {
        Some(b) => String::from_utf8_lossy(&b).into_owned(),
        None    => return Err(panic_with(sigma, PanicReason::Other)),
    };

    if name == "restrict" {
        return Ok(match sandbox_resolve(&root, &path_arg) {
            Some(child_root) => {
                let cap = filesystem_value(sigma, &child_root);
                union_of(Node::new(Ty::Dynamic(FILESYSTEM_CLASS.clone())), cap)
            }
            None => fs_error_named("Denied", &path_arg),
        });
    }

    let full = match sandbox_resolve(&root, &path_arg) {
        Some(p) => p,
        None    => return Ok(fs_error_named("Denied", &path_arg)),
    };

    match name {
        "exists" => Ok(Value::Bool(sigma.fs.exists(&full))),
        "kind" => match sigma.fs.kind(&full) {
            Some(kind) => Ok(union_of(named_ty(&FILE_KIND_ENUM), file_kind_value(kind))),
            None       => Ok(fs_error(FsError::NotFound(full))),
        },
        "read_file" => match sigma.fs.read_file(&full) {
            Ok(bytes) => Ok(union_of(
                managed_str_ty(),
                Value::Str { state: SeqState::Managed, bytes },
            )),
            Err(err) => Ok(fs_error(err)),
        },
        "read_bytes" => match sigma.fs.read_file(&full) {
            Ok(bytes) => Ok(union_of(
                managed_bytes_ty(),
                Value::Bytes { state: SeqState::Managed, bytes },
            )),
            Err(err) => Ok(fs_error(err)),
        },
        "write_file" => {
            let bytes = match args.get(1).and_then(str_bytes) {
                Some(b) => b,
                None    => return Err(panic_with(sigma, PanicReason::Other)),
            };
            match sigma.fs.write_file(&full, bytes) {
                Ok(())   => Ok(unit_ok()),
                Err(err) => Ok(fs_error(err)),
            }
        }
        "create_dir" => match sigma.fs.create_dir(&full) {
            Ok(())   => Ok(unit_ok()),
            Err(err) => Ok(fs_error(err)),
        },
        "ensure_dir" => match sigma.fs.ensure_dir(&full) {
            Ok(())   => Ok(unit_ok()),
            Err(err) => Ok(fs_error(err)),
        },
        "remove" => match sigma.fs.remove(&full) {
            Ok(())   => Ok(unit_ok()),
            Err(err) => Ok(fs_error(err)),
        },
        "open_read" => match sigma.fs.open_read(&full) {
            Ok(handle) => Ok(union_of(file_state_ty("Read"), file_value(handle, "Read"))),
            Err(err)   => Ok(fs_error(err)),
        },
        "open_write" => match sigma.fs.open_write(&full) {
            Ok(handle) => Ok(union_of(file_state_ty("Write"), file_value(handle, "Write"))),
            Err(err)   => Ok(fs_error(err)),
        },
        "create_write" => match sigma.fs.create_write(&full) {
            Ok(handle) => Ok(union_of(file_state_ty("Write"), file_value(handle, "Write"))),
            Err(err)   => Ok(fs_error(err)),
        },
        "open_append" => match sigma.fs.open_append(&full) {
            Ok(handle) => Ok(union_of(
                file_state_ty("Append"),
                file_value(handle, "Append"),
            )),
            Err(err) => Ok(fs_error(err)),
        },
        "open_dir" => match sigma.fs.open_dir(&full) {
            Ok(handle) => Ok(union_of(
                Node::new(Ty::ModalState(
                    DIR_ITER_MODAL.clone(),
                    String::from("Open"),
                    vec![],
                )),
                Value::Modal {
                    path: DIR_ITER_MODAL.clone(),
                    state: String::from("Open"),
                    fields: vec![(
                        String::from("handle"),
                        Value::Int(IntVal::from_u64("u64", handle)),
                    )],
                },
            )),
            Err(err) => Ok(fs_error(err)),
        },
        _ => Err(panic_with(sigma, PanicReason::Other)),
    }
}


fn file_kind_value(kind: FileKind) -> Value {
    Value::Enum {
        path: FILE_KIND_ENUM.clone(),
        variant: String::from(match kind {
            FileKind::File => "File",
            FileKind::Dir  => "Dir",
        }),
        payload: crate::value::EnumPayload::Unit,
    }
}


fn modal_handle(sigma: &mut Sigma, value: &Value) -> Result<u64, Control> {
    match value.field("handle") {
        Some(Value::Int(i)) => Ok(i.magnitude as u64),
        _                   => Err(panic_with(sigma, PanicReason::Other)),
    }
}


pub fn file_method_moves(name: &str) -> bool {
    name == "close"
}


pub fn file_method(
    ectx: &EvalCtx,
    sigma: &mut Sigma,
    recv: &Value,
    _place: &Option<Place>,
    name: &str,
    args: &[Arg],
) -> Eval {
    let state = match recv {
        Value::Modal { state, .. } => state.clone(),
        _                          => return Err(panic_with(sigma, PanicReason::Other)),
    };
    let handle = modal_handle(sigma, recv)?;
    let args = seq_args(ectx, sigma, args)?;
    match (name, state.as_str()) {
        ("read_all", "Read") => match sigma.fs.handle_read_all(handle) {
            Ok(bytes) => Ok(union_of(
                managed_str_ty(),
                Value::Str { state: SeqState::Managed, bytes },
            )),
            Err(err) => Ok(fs_error(err)),
        },
        ("read_all_bytes", "Read") => match sigma.fs.handle_read_all(handle) {
            Ok(bytes) => Ok(union_of(
                managed_bytes_ty(),
                Value::Bytes { state: SeqState::Managed, bytes },
            )),
            Err(err) => Ok(fs_error(err)),
        },
        ("write", "Write") | ("write", "Append") => {
            let bytes = match args.first().and_then(str_bytes) {
                Some(b) => b,
                None    => return Err(panic_with(sigma, PanicReason::Other)),
            };
            match sigma.fs.handle_write(handle, &bytes) {
                Ok(())   => Ok(unit_ok()),
                Err(err) => Ok(fs_error(err)),
            }
        }
        ("flush", "Write") | ("flush", "Append") => match sigma.fs.handle_flush(handle) {
            Ok(())   => Ok(unit_ok()),
            Err(err) => Ok(fs_error(err)),
        },
        // close is a transition: self moves and the handle dies.
        ("close", _) => match sigma.fs.handle_close(handle) {
            Ok(())   => Ok(unit_ok()),
            Err(err) => Ok(fs_error(err)),
        },
        _ => Err(panic_with(sigma, PanicReason::Other)),
    }
}


pub fn dir_iter_method(
    _ectx: &EvalCtx,
    sigma: &mut Sigma,
    recv: &Value,
    _place: &Option<Place>,
    name: &str,
    args: &[Arg],
) -> Eval {
    if !args.is_empty() {
        return Err(panic_with(sigma, PanicReason::Other));
    }
    let handle = modal_handle(sigma, recv)?;
    match name {
        "next" => match sigma.fs.dir_next(handle) {
            Ok(Some((entry_name, kind))) => Ok(union_of(
                named_ty(&DIR_ENTRY_RECORD),
                Value::Record {
                    path: DIR_ENTRY_RECORD.clone(),
                    fields: vec![
                        (
                            String::from("name"),
                            Value::Str {
                                state: SeqState::View,
                                bytes: entry_name.into_bytes(),
                            },
                        ),
                        (String::from("kind"), file_kind_value(kind)),
                    ],
                },
            )),
            Ok(None) => Ok(union_of(prim("()"), Value::Unit)),
            Err(err) => Ok(fs_error(err)),
        },
        "close" => {
            sigma.fs.dir_close(handle);
            Ok(Value::Unit)
        }
        _ => Err(panic_with(sigma, PanicReason::Other)),
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;

    fn harness() -> (Context, Sigma) {
        let ctx = Context::build(vec![]).unwrap();
        (ctx, Sigma::new())
    }

    #[test]
    fn test_region_intrinsics() {
        let (ctx, mut sigma) = harness();
        let _ectx = EvalCtx::new(&ctx, vec![]);

        let region = region_intrinsic(&mut sigma, "new_scoped", vec![]).unwrap();
        let ptr = region_intrinsic(
            &mut sigma,
            "alloc",
            vec![region.clone(), Value::Bool(true)],
        )
        .unwrap();
        let addr = match ptr {
            Value::Ptr { addr, .. } => addr,
            other                   => panic!("{:?}", other),
        };
        assert_eq!(sigma.read_addr(addr).unwrap(), Value::Bool(true));

        // A frozen region refuses allocation until thawed.
        region_intrinsic(&mut sigma, "freeze", vec![region.clone()]).unwrap();
        assert!(region_intrinsic(&mut sigma, "alloc", vec![region.clone(), Value::Unit]).is_err());
        sigma.clear_panic();
        region_intrinsic(&mut sigma, "thaw", vec![region.clone()]).unwrap();
        assert!(region_intrinsic(&mut sigma, "alloc", vec![region.clone(), Value::Unit]).is_ok());

        region_intrinsic(&mut sigma, "free_unchecked", vec![region]).unwrap();
        assert_eq!(
            sigma.read_addr(addr).unwrap_err(),
            PanicReason::ExpiredDeref
        );
    }

    #[test]
    fn test_filesystem_sandbox() {
        let (ctx, mut sigma) = harness();
        let ectx = EvalCtx::new(&ctx, vec![]);
        sigma.fs.ensure_dir("/srv/app").unwrap();
        sigma.fs.write_file("/srv/app/a.txt", b"hi".to_vec()).unwrap();
        sigma.fs.write_file("/srv/secret", b"no".to_vec()).unwrap();

        let cap = filesystem_value(&mut sigma, "/srv/app");
        let addr = match cap {
            Value::Dynamic { addr, .. } => addr,
            other                       => panic!("{:?}", other),
        };

        let arg = |text: &str| Arg {
            moved: false,
            value: crate::ast::node(crate::ast::Expr::Lit(crate::ast::Literal::Str(
                String::from(text),
            ))),
        };

        let ok = filesystem_method(&ectx, &mut sigma, addr, "read_file", &[arg("a.txt")]).unwrap();
        match ok {
            Value::Union { value, .. } => match *value {
                Value::Str { bytes, .. } => assert_eq!(bytes, b"hi"),
                other                    => panic!("{:?}", other),
            },
            other => panic!("{:?}", other),
        }

        // Escaping the sandbox is refused, both ways of spelling it.
        for escape in &["../secret", "/srv/secret"] {
            let denied =
                filesystem_method(&ectx, &mut sigma, addr, "read_file", &[arg(escape)]).unwrap();
            match denied {
                Value::Union { value, .. } => match *value {
                    Value::Enum { variant, .. } => assert_eq!(variant, "Denied"),
                    other                       => panic!("{:?}", other),
                },
                other => panic!("{:?}", other),
            }
        }
    }

    #[test]
    fn test_heap_quota_errors() {
        let (ctx, mut sigma) = harness();
        let ectx = EvalCtx::new(&ctx, vec![]);
        let heap = heap_allocator_value(None);

        let size_arg = |n: u64| Arg {
            moved: false,
            value: crate::ast::node(crate::ast::Expr::Lit(crate::ast::Literal::Int(
                n.to_string(),
                Some(String::from("usize")),
            ))),
        };

        heap_method(&ectx, &mut sigma, &heap, "with_quota", &[size_arg(16)]).unwrap();
        let out = heap_method(&ectx, &mut sigma, &heap, "alloc_raw", &[size_arg(64)]).unwrap();
        match out {
            Value::Union { value, .. } => match *value {
                Value::Enum { variant, .. } => assert_eq!(variant, "OutOfMemory"),
                other                       => panic!("{:?}", other),
            },
            other => panic!("{:?}", other),
        }

        let out = heap_method(&ectx, &mut sigma, &heap, "alloc_raw", &[size_arg(8)]).unwrap();
        match out {
            Value::Union { value, .. } => assert!(matches!(*value, Value::RawPtr { .. })),
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn test_dir_iteration_protocol() {
        let (ctx, mut sigma) = harness();
        let ectx = EvalCtx::new(&ctx, vec![]);
        sigma.fs.ensure_dir("/d").unwrap();
        sigma.fs.write_file("/d/x", vec![]).unwrap();
        let cap = filesystem_value(&mut sigma, "/");
        let addr = match cap {
            Value::Dynamic { addr, .. } => addr,
            other                       => panic!("{:?}", other),
        };
        let arg = Arg {
            moved: false,
            value: crate::ast::node(crate::ast::Expr::Lit(crate::ast::Literal::Str(
                String::from("d"),
            ))),
        };
        let iter = filesystem_method(&ectx, &mut sigma, addr, "open_dir", &[arg]).unwrap();
        let iter = match iter {
            Value::Union { value, .. } => *value,
            other                      => panic!("{:?}", other),
        };
        let first = dir_iter_method(&ectx, &mut sigma, &iter, &None, "next", &[]).unwrap();
        match first {
            Value::Union { value, .. } => match *value {
                Value::Record { ref fields, .. } => {
                    assert_eq!(fields[0].0, "name");
                }
                ref other => panic!("{:?}", other),
            },
            other => panic!("{:?}", other),
        }
        let done = dir_iter_method(&ectx, &mut sigma, &iter, &None, "next", &[]).unwrap();
        match done {
            Value::Union { value, .. } => assert_eq!(*value, Value::Unit),
            other                      => panic!("{:?}", other),
        }
    }
}
