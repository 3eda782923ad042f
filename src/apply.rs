// Calls and method dispatch. Dispatch priority on a receiver: modal
// state method or transition, then record method, then class method on
// dynamic receivers, then the capability builtins.

use crate::ast::*;
use crate::builtins;
use crate::checks::PanicReason;
use crate::context::{path_key, Context};
use crate::eval::{eval_expr, eval_place, move_place, read_place, Place, PlaceKind};
use crate::exec::*;
use crate::matching::{bind_order, match_pattern};
use crate::sigma::{BindInfo, BindState, Movability, Responsibility, Sigma};
use crate::types::{lower_type, Ty};
use crate::value::{Addr, Value};


// How an argument reaches a parameter: aliases share the caller's
// address, everything else is a value in a fresh slot.
pub enum ArgSlot {
    Place(Addr),
    Val(Value),
}


pub fn eval_call(ectx: &EvalCtx, sigma: &mut Sigma, callee: &Expr, args: &[Arg]) -> Eval {
    if let Expr::Qualified(path, name) = callee {
        if path.last().map(String::as_str) == Some("Region") {
            let mut values = Vec::with_capacity(args.len());
            for arg in args {
                values.push(eval_expr(ectx, sigma, &arg.value)?);
            }
            return builtins::region_intrinsic(sigma, name, values);
        }
        if path.last().map(String::as_str) == Some("System") && name == "exit" {
            let code = match args.first() {
                Some(arg) => eval_expr(ectx, sigma, &arg.value)?,
                None      => return Err(panic_with(sigma, PanicReason::Other)),
            };
            let code = match code.as_int() {
                Some(i) => i.as_i128() as i32,
                None    => return Err(panic_with(sigma, PanicReason::Other)),
            };
            sigma.exit_code = Some(code);
            return Err(Control::Abort);
        }
    }

    let callee_value = eval_expr(ectx, sigma, callee)?;
    match callee_value {
        Value::ProcRef(path) => apply_proc(ectx, sigma, &path, args),
        _                    => Err(panic_with(sigma, PanicReason::Other)),
    }
}


pub fn apply_proc(ectx: &EvalCtx, sigma: &mut Sigma, path: &[String], args: &[Arg]) -> Eval {
    if ectx.depth >= ectx.config.max_call_depth {
        return Err(panic_with(sigma, PanicReason::Other));
    }
    let (module, name) = match path.split_last() {
        Some((name, module)) => (module.to_vec(), name.clone()),
        None                 => return Err(panic_with(sigma, PanicReason::Other)),
    };
    let decl = match ectx.ctx.lookup_proc(&module, &name) {
        Some(decl) => decl.clone(),
        None       => return Err(panic_with(sigma, PanicReason::Other)),
    };
    if args.len() != decl.params.len() {
        return Err(panic_with(sigma, PanicReason::Other));
    }

    // Arguments evaluate left to right; aliases capture the place.
    let mut slots = Vec::with_capacity(args.len());
    for (arg, param) in args.iter().zip(&decl.params) {
        slots.push(eval_arg(ectx, sigma, arg, param.mode)?);
    }

    let ret_ty = lower_type(ectx.ctx, &module, &decl.ret).ok();
    let callee = ectx.for_call(module, ret_ty);
    call_with_body(&callee, sigma, &decl.params, slots, &decl.body)
}


fn eval_arg(ectx: &EvalCtx, sigma: &mut Sigma, arg: &Arg, mode: ParamMode) -> Result<ArgSlot, Control> {
    if arg.moved && arg.value.is_place() {
        return Ok(ArgSlot::Val(move_place(ectx, sigma, &arg.value)?));
    }
    if mode == ParamMode::Alias && arg.value.is_place() {
        let place = eval_place(ectx, sigma, &arg.value)?;
        if let PlaceKind::Store(addr) = place.kind {
            return Ok(ArgSlot::Place(addr));
        }
    }
    Ok(ArgSlot::Val(eval_expr(ectx, sigma, &arg.value)?))
}


fn bind_param(sigma: &mut Sigma, name: &str, mode: ParamMode, slot: ArgSlot) {
    match slot {
        ArgSlot::Place(addr) => sigma.bind_at(name, addr, BindInfo::alias()),
        ArgSlot::Val(value) => {
            let info = match mode {
                ParamMode::Move => BindInfo {
                    movability: Movability::Mov,
                    responsibility: Responsibility::Resp,
                },
                ParamMode::Alias => BindInfo::default(),
            };
            sigma.bind(name, value, info);
        }
    }
}


fn call_with_body(
    callee: &EvalCtx,
    sigma: &mut Sigma,
    params: &[Param],
    slots: Vec<ArgSlot>,
    body: &Block,
) -> Eval {
    sigma.push_scope();
    for (param, slot) in params.iter().zip(slots) {
        bind_param(sigma, &param.name, param.mode, slot);
    }
    let result = eval_block_body(callee, sigma, body);
    let result = cleanup_scope(callee, sigma, result);
    match result {
        Ok(v)                          => Ok(v),
        Err(Control::Return(v))        => Ok(v.unwrap_or(Value::Unit)),
        Err(Control::Result(v))        => Ok(v),
        Err(Control::Break(_)) | Err(Control::Continue) => {
            Err(panic_with(sigma, PanicReason::Other))
        }
        Err(other)                     => Err(other),
    }
}


// Invoke a method body with `self` bound, plus the declared parameters.
fn invoke_with_self(
    callee: &EvalCtx,
    sigma: &mut Sigma,
    params: &[Param],
    slots: Vec<ArgSlot>,
    self_slot: ArgSlot,
    body: &Block,
) -> Eval {
    sigma.push_scope();
    match self_slot {
        ArgSlot::Place(addr) => sigma.bind_at("self", addr, BindInfo::alias()),
        ArgSlot::Val(value)  => {
            sigma.bind("self", value, BindInfo::default());
        }
    }
    for (param, slot) in params.iter().zip(slots) {
        bind_param(sigma, &param.name, param.mode, slot);
    }
    let result = eval_block_body(callee, sigma, body);
    let result = cleanup_scope(callee, sigma, result);
    match result {
        Ok(v)                   => Ok(v),
        Err(Control::Return(v)) => Ok(v.unwrap_or(Value::Unit)),
        Err(Control::Result(v)) => Ok(v),
        Err(other)              => Err(other),
    }
}


struct Receiver {
    place: Option<Place>,
    value: Value,
}


fn eval_receiver(ectx: &EvalCtx, sigma: &mut Sigma, recv: &Expr) -> Result<Receiver, Control> {
    if recv.is_place() {
        let place = eval_place(ectx, sigma, recv)?;
        let value = read_place(sigma, &place)?;
        Ok(Receiver { place: Some(place), value })
    } else {
        let value = eval_expr(ectx, sigma, recv)?;
        Ok(Receiver { place: None, value })
    }
}


fn self_slot_for(recv: &Receiver) -> ArgSlot {
    match &recv.place {
        Some(Place { kind: PlaceKind::Store(addr), .. }) => ArgSlot::Place(*addr),
        _ => ArgSlot::Val(recv.value.clone()),
    }
}


fn mark_receiver_moved(sigma: &mut Sigma, recv: &Receiver) {
    if let Some(Place { root: Some(root), .. }) = &recv.place {
        if let Some(bind) = sigma.binding_mut(root) {
            bind.state = BindState::Moved;
        }
    }
}


pub fn eval_method_call(
    ectx: &EvalCtx,
    sigma: &mut Sigma,
    recv: &Expr,
    name: &str,
    args: &[Arg],
) -> Eval {
    let receiver = eval_receiver(ectx, sigma, recv)?;
    match receiver.value.clone() {
        Value::Modal { path, state, .. } => {
            if builtins::is_file_modal(&path) {
                return builtins::file_method(ectx, sigma, &receiver.value, &receiver.place, name, args)
                    .map(|v| {
                        if builtins::file_method_moves(name) {
                            mark_receiver_moved(sigma, &receiver);
                        }
                        v
                    });
            }
            if builtins::is_dir_iter_modal(&path) {
                return builtins::dir_iter_method(ectx, sigma, &receiver.value, &receiver.place, name, args);
            }
            modal_method_call(ectx, sigma, &receiver, &path, &state, name, args)
        }
        Value::Record { path, .. } => {
            if builtins::is_heap_allocator(&path) {
                return builtins::heap_method(ectx, sigma, &receiver.value, name, args);
            }
            record_method_call(ectx, sigma, &receiver, &path, name, args)
        }
        Value::Dynamic { class_path, addr, concrete } => {
            if !sigma_live(sigma, addr) {
                return Err(panic_with(sigma, PanicReason::ExpiredDeref));
            }
            if builtins::is_filesystem_class(&class_path) {
                return builtins::filesystem_method(ectx, sigma, addr, name, args);
            }
            dynamic_method_call(ectx, sigma, &receiver, &class_path, concrete.as_deref(), name, args)
        }
        Value::Str { .. } => builtins::string_method(ectx, sigma, &receiver.value, &receiver.place, name, args),
        Value::Bytes { .. } => builtins::bytes_method(ectx, sigma, &receiver.value, &receiver.place, name, args),
        Value::Region { target } => builtins::region_method(ectx, sigma, target, name, args),
        _ => Err(panic_with(sigma, PanicReason::Other)),
    }
}


fn sigma_live(sigma: &Sigma, addr: Addr) -> bool {
    sigma.addr_live(addr)
}


fn modal_method_call(
    ectx: &EvalCtx,
    sigma: &mut Sigma,
    receiver: &Receiver,
    path: &[String],
    state: &str,
    name: &str,
    args: &[Arg],
) -> Eval {
    let decl = match ectx.ctx.lookup_modal(path) {
        Some(decl) => decl.clone(),
        None       => return Err(panic_with(sigma, PanicReason::Other)),
    };
    let module: Path = path[..path.len() - 1].to_vec();
    let block = match decl.states.iter().find(|s| s.name == state) {
        Some(b) => b,
        None    => return Err(panic_with(sigma, PanicReason::Other)),
    };

    // State methods preserve state; transitions always move self.
    if let Some(method) = block.methods.iter().find(|m| m.name == name) {
        let body = match &method.body {
            Some(body) => body.clone(),
            None       => return Err(panic_with(sigma, PanicReason::Other)),
        };
        let slots = eval_args_for(ectx, sigma, args, &method.params)?;
        let self_slot = if method.recv == RecvMode::Move {
            mark_receiver_moved(sigma, receiver);
            ArgSlot::Val(receiver.value.clone())
        } else {
            self_slot_for(receiver)
        };
        let ret_ty = lower_type(ectx.ctx, &module, &method.ret).ok();
        let callee = ectx.for_call(module, ret_ty);
        return invoke_with_self(&callee, sigma, &method.params, slots, self_slot, &body);
    }

    if let Some(transition) = block.transitions.iter().find(|t| t.name == name) {
        let transition = transition.clone();
        let slots = eval_args_for(ectx, sigma, args, &transition.params)?;
        mark_receiver_moved(sigma, receiver);
        let self_slot = ArgSlot::Val(receiver.value.clone());
        let callee = ectx.for_call(module, None);
        return invoke_with_self(&callee, sigma, &transition.params, slots, self_slot, &transition.body);
    }

    Err(panic_with(sigma, PanicReason::Other))
}


fn record_method_call(
    ectx: &EvalCtx,
    sigma: &mut Sigma,
    receiver: &Receiver,
    path: &[String],
    name: &str,
    args: &[Arg],
) -> Eval {
    let decl = match ectx.ctx.lookup_record(path) {
        Some(decl) => decl.clone(),
        None       => return Err(panic_with(sigma, PanicReason::Other)),
    };
    let module: Path = path[..path.len() - 1].to_vec();
    let method = match decl.methods.iter().find(|m| m.name == name) {
        Some(m) => m.clone(),
        None    => return Err(panic_with(sigma, PanicReason::Other)),
    };
    let body = match &method.body {
        Some(body) => body.clone(),
        None       => return Err(panic_with(sigma, PanicReason::Other)),
    };
    let slots = eval_args_for(ectx, sigma, args, &method.params)?;
    let self_slot = if method.recv == RecvMode::Move {
        mark_receiver_moved(sigma, receiver);
        ArgSlot::Val(receiver.value.clone())
    } else {
        self_slot_for(receiver)
    };
    let ret_ty = lower_type(ectx.ctx, &module, &method.ret).ok();
    let callee = ectx.for_call(module, ret_ty);
    invoke_with_self(&callee, sigma, &method.params, slots, self_slot, &body)
}


// Concrete methods first, then the class's own defaults.
fn dynamic_method_call(
    ectx: &EvalCtx,
    sigma: &mut Sigma,
    receiver: &Receiver,
    class_path: &[String],
    concrete: Option<&[String]>,
    name: &str,
    args: &[Arg],
) -> Eval {
    if let Some(concrete) = concrete {
        if let Some(decl) = ectx.ctx.lookup_record(concrete) {
            if decl.methods.iter().any(|m| m.name == name) {
                let concrete = concrete.to_vec();
                return record_method_call(ectx, sigma, receiver, &concrete, name, args);
            }
        }
    }
    let decl = match ectx.ctx.lookup_class(class_path) {
        Some(decl) => decl.clone(),
        None       => return Err(panic_with(sigma, PanicReason::Other)),
    };
    let module: Path = class_path[..class_path.len() - 1].to_vec();
    let method = match decl.methods.iter().find(|m| m.name == name) {
        Some(m) => m.clone(),
        None    => return Err(panic_with(sigma, PanicReason::Other)),
    };
    let body = match &method.body {
        Some(body) => body.clone(),
        None       => return Err(panic_with(sigma, PanicReason::Other)),
    };
    let slots = eval_args_for(ectx, sigma, args, &method.params)?;
    let self_slot = self_slot_for(receiver);
    let ret_ty = lower_type(ectx.ctx, &module, &method.ret).ok();
    let callee = ectx.for_call(module, ret_ty);
    invoke_with_self(&callee, sigma, &method.params, slots, self_slot, &body)
}


pub fn eval_args_for(
    ectx: &EvalCtx,
    sigma: &mut Sigma,
    args: &[Arg],
    params: &[Param],
) -> Result<Vec<ArgSlot>, Control> {
    if args.len() != params.len() {
        return Err(panic_with(sigma, PanicReason::Other));
    }
    let mut slots = Vec::with_capacity(args.len());
    for (arg, param) in args.iter().zip(params) {
        slots.push(eval_arg(ectx, sigma, arg, param.mode)?);
    }
    Ok(slots)
}


// Drop glue entry for records that declare a drop method.
pub fn run_user_drop(ectx: &EvalCtx, sigma: &mut Sigma, path: &[String], value: &Value) -> StmtOut {
    let decl = match ectx.ctx.lookup_record(path) {
        Some(decl) => decl.clone(),
        None       => return Ok(()),
    };
    let method = match decl.methods.iter().find(|m| m.name == "drop") {
        Some(m) => m.clone(),
        None    => return Ok(()),
    };
    run_drop_body(ectx, sigma, path, &method, value)
}


// Per-state drop glue for modals: the current state's block may declare
// its own drop method, found through the same state lookup methods use.
pub fn run_user_drop_modal(
    ectx: &EvalCtx,
    sigma: &mut Sigma,
    path: &[String],
    state: &str,
    value: &Value,
) -> StmtOut {
    let decl = match ectx.ctx.lookup_modal(path) {
        Some(decl) => decl.clone(),
        None       => return Ok(()),
    };
    let block = match decl.states.iter().find(|s| s.name == state) {
        Some(b) => b,
        None    => return Ok(()),
    };
    let method = match block.methods.iter().find(|m| m.name == "drop") {
        Some(m) => m.clone(),
        None    => return Ok(()),
    };
    run_drop_body(ectx, sigma, path, &method, value)
}


fn run_drop_body(
    ectx: &EvalCtx,
    sigma: &mut Sigma,
    path: &[String],
    method: &MethodDecl,
    value: &Value,
) -> StmtOut {
    let body = match &method.body {
        Some(body) => body.clone(),
        None       => return Ok(()),
    };
    sigma.drop_trace.push(path_key(path));
    let module: Path = path[..path.len() - 1].to_vec();
    let callee = ectx.for_call(module, None);
    match invoke_with_self(&callee, sigma, &[], vec![], ArgSlot::Val(value.clone()), &body) {
        Ok(_)                   => Ok(()),
        Err(Control::Panic)     => Err(Control::Panic),
        Err(Control::Abort)     => Err(Control::Abort),
        Err(_)                  => Ok(()),
    }
}


// Run every module's static initialisers in init order. A panic during
// one marks the forward-reachable init set poisoned and evaluation
// moves on; later reads through those modules re-panic.
pub fn init_statics(ctx: &Context, sigma: &mut Sigma) {
    let order = ctx.init_modules.clone();
    for module in &order {
        let key = path_key(module);
        if sigma.is_poisoned(&key) {
            continue;
        }
        let statics: Vec<_> = ctx
            .statics
            .iter()
            .filter(|s| &s.module == module)
            .cloned()
            .collect();
        let ectx = EvalCtx::new(ctx, module.clone());
        for entry in statics {
            let value = match eval_expr(&ectx, sigma, &entry.decl.init) {
                Ok(v) => v,
                Err(_) => {
                    sigma.poison_modules(ctx.poison_set(module));
                    sigma.clear_panic();
                    break;
                }
            };
            let env = match match_pattern(&entry.decl.pattern, &value) {
                Some(env) => env,
                None => {
                    sigma.poison_modules(ctx.poison_set(module));
                    break;
                }
            };
            for (name, bound) in bind_order(&entry.decl.pattern, env) {
                let addr = sigma.alloc_local(bound);
                sigma.set_static(&key, &name, addr);
            }
        }
    }
}


// The declared type of a static, for layout checks in the support layer.
pub fn static_declared_ty(ctx: &Context, module: &[String], decl: &StaticDecl) -> Option<Node<Ty>> {
    let ty = decl.ty.as_ref()?;
    lower_type(ctx, module, ty).ok()
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::checks::panic_code;
    use crate::span::Span;
    use crate::value::IntVal;

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

    fn arg(e: Expr) -> Arg {
        Arg { moved: false, value: node(e) }
    }

    fn i32_ty() -> Node<Type> {
        node(Type::Prim(String::from("i32")))
    }

    fn param(name: &str, mode: ParamMode) -> Param {
        Param { name: String::from(name), mode, ty: i32_ty() }
    }

    fn proc_item(name: &str, params: Vec<Param>, body: Block) -> Item {
        Item::Proc(ProcDecl {
            vis: Visibility::Public,
            name: String::from(name),
            params,
            ret: i32_ty(),
            body: node(body),
            span: Span::default(),
        })
    }

    #[test]
    fn test_proc_call_binds_and_returns() {
        // proc add(a, b) { return a + b }
        let add = proc_item(
            "add",
            vec![param("a", ParamMode::Move), param("b", ParamMode::Move)],
            block(
                vec![Stmt::Return(Some(node(Expr::Binary(
                    BinOp::Add,
                    node(ident("a")),
                    node(ident("b")),
                ))))],
                None,
            ),
        );
        let ctx = Context::build(vec![Module { path: p(&["m"]), items: vec![add] }]).unwrap();
        let ectx = EvalCtx::new(&ctx, p(&["m"]));
        let mut sigma = Sigma::new();

        let call = Expr::Call(node(ident("add")), vec![arg(int(2)), arg(int(3))]);
        assert_eq!(eval_expr(&ectx, &mut sigma, &call).unwrap(), iv(5));
    }

    #[test]
    fn test_alias_param_mutates_caller() {
        // proc bump(n) { n = n + 1; return 0 } with n aliasing x.
        let bump = proc_item(
            "bump",
            vec![param("n", ParamMode::Alias)],
            block(
                vec![
                    Stmt::Assign(
                        node(ident("n")),
                        node(Expr::Binary(BinOp::Add, node(ident("n")), node(int(1)))),
                    ),
                    Stmt::Return(Some(node(int(0)))),
                ],
                None,
            ),
        );
        let ctx = Context::build(vec![Module { path: p(&["m"]), items: vec![bump] }]).unwrap();
        let ectx = EvalCtx::new(&ctx, p(&["m"]));
        let mut sigma = Sigma::new();
        sigma.bind("x", iv(41), crate::sigma::BindInfo::default());

        let call = Expr::Call(node(ident("bump")), vec![arg(ident("x"))]);
        eval_expr(&ectx, &mut sigma, &call).unwrap();
        let addr = sigma.binding("x").unwrap().addr;
        assert_eq!(sigma.read_addr(addr).unwrap(), iv(42));
    }

    #[test]
    fn test_call_depth_limit() {
        // proc loop_forever() { return loop_forever() }
        let looped = proc_item(
            "loop_forever",
            vec![],
            block(
                vec![Stmt::Return(Some(node(Expr::Call(
                    node(ident("loop_forever")),
                    vec![],
                ))))],
                None,
            ),
        );
        let ctx = Context::build(vec![Module { path: p(&["m"]), items: vec![looped] }]).unwrap();
        let mut ectx = EvalCtx::new(&ctx, p(&["m"]));
        ectx.config.max_call_depth = 32;
        let mut sigma = Sigma::new();

        let call = Expr::Call(node(ident("loop_forever")), vec![]);
        assert_eq!(eval_expr(&ectx, &mut sigma, &call), Err(Control::Panic));
    }

    #[test]
    fn test_record_method_reads_self() {
        let counter = Item::Record(RecordDecl {
            vis: Visibility::Public,
            name: String::from("Counter"),
            bitcopy: false,
            fields: vec![FieldDecl {
                vis: Visibility::Public,
                name: String::from("n"),
                ty: i32_ty(),
                span: Span::default(),
            }],
            methods: vec![MethodDecl {
                vis: Visibility::Public,
                name: String::from("get"),
                recv: RecvMode::Const,
                params: vec![],
                ret: i32_ty(),
                body: Some(node(block(
                    vec![Stmt::Return(Some(node(Expr::Field(
                        node(ident("self")),
                        String::from("n"),
                    ))))],
                    None,
                ))),
                span: Span::default(),
            }],
            span: Span::default(),
        });
        let ctx = Context::build(vec![Module { path: p(&["m"]), items: vec![counter] }]).unwrap();
        let ectx = EvalCtx::new(&ctx, p(&["m"]));
        let mut sigma = Sigma::new();

        let make = Expr::RecordLit(
            p(&["Counter"]),
            vec![FieldInit { name: String::from("n"), value: node(int(7)) }],
        );
        sigma.push_scope();
        let value = eval_expr(&ectx, &mut sigma, &make).unwrap();
        sigma.bind("c", value, crate::sigma::BindInfo::default());

        let call = Expr::MethodCall(node(ident("c")), String::from("get"), vec![]);
        assert_eq!(eval_expr(&ectx, &mut sigma, &call).unwrap(), iv(7));
    }

    #[test]
    fn test_transition_moves_receiver() {
        // modal Door { state Open { width } -> close() => Closed; state Closed }
        let door = Item::Modal(ModalDecl {
            vis: Visibility::Public,
            name: String::from("Door"),
            states: vec![
                StateBlock {
                    name: String::from("Open"),
                    fields: vec![FieldDecl {
                        vis: Visibility::Public,
                        name: String::from("width"),
                        ty: i32_ty(),
                        span: Span::default(),
                    }],
                    methods: vec![],
                    transitions: vec![TransitionDecl {
                        vis: Visibility::Public,
                        name: String::from("close"),
                        target: String::from("Closed"),
                        params: vec![],
                        body: node(block(
                            vec![],
                            Some(Expr::ModalLit(
                                p(&["Door"]),
                                String::from("Closed"),
                                vec![],
                            )),
                        )),
                        span: Span::default(),
                    }],
                    span: Span::default(),
                },
                StateBlock {
                    name: String::from("Closed"),
                    fields: vec![],
                    methods: vec![],
                    transitions: vec![],
                    span: Span::default(),
                },
            ],
            span: Span::default(),
        });
        let ctx = Context::build(vec![Module { path: p(&["m"]), items: vec![door] }]).unwrap();
        let ectx = EvalCtx::new(&ctx, p(&["m"]));
        let mut sigma = Sigma::new();

        let make = Expr::ModalLit(
            p(&["Door"]),
            String::from("Open"),
            vec![FieldInit { name: String::from("width"), value: node(int(3)) }],
        );
        let value = eval_expr(&ectx, &mut sigma, &make).unwrap();
        sigma.bind("d", value, crate::sigma::BindInfo::default());

        let call = Expr::MethodCall(node(ident("d")), String::from("close"), vec![]);
        match eval_expr(&ectx, &mut sigma, &call).unwrap() {
            Value::Modal { state, .. } => assert_eq!(state, "Closed"),
            other                      => panic!("{:?}", other),
        }

        // The receiver moved with the transition.
        let read = eval_expr(&ectx, &mut sigma, &ident("d"));
        assert_eq!(read, Err(Control::Panic));
    }

    #[test]
    fn test_init_panic_poisons_dependents() {
        // Module a's static divides by zero; b sits downstream of a.
        let bad_static = Item::Static(StaticDecl {
            vis: Visibility::Public,
            mutable: false,
            pattern: node(Pattern::Ident(String::from("X"))),
            ty: None,
            init: node(Expr::Binary(BinOp::Div, node(int(1)), node(int(0)))),
            span: Span::default(),
        });
        let good_static = Item::Static(StaticDecl {
            vis: Visibility::Public,
            mutable: false,
            pattern: node(Pattern::Ident(String::from("Y"))),
            ty: None,
            init: node(int(2)),
            span: Span::default(),
        });
        let mut ctx = Context::build(vec![
            Module { path: p(&["a"]), items: vec![bad_static] },
            Module { path: p(&["b"]), items: vec![good_static] },
        ])
        .unwrap();
        ctx.init_eager_edges = vec![(0, 1)];

        let mut sigma = Sigma::new();
        init_statics(&ctx, &mut sigma);
        assert!(sigma.is_poisoned("a"));
        assert!(sigma.is_poisoned("b"));

        // Any later read through a poisoned module panics InitPanic.
        let ectx = EvalCtx::new(&ctx, p(&["b"]));
        let read = eval_expr(&ectx, &mut sigma, &ident("Y"));
        assert_eq!(read, Err(Control::Panic));
        assert_eq!(sigma.panic_reason, Some(PanicReason::InitPanic));
        assert_eq!(panic_code(PanicReason::InitPanic), 0x0A);
    }

    #[test]
    fn test_system_exit_aborts() {
        let ctx = Context::build(vec![Module { path: p(&["m"]), items: vec![] }]).unwrap();
        let ectx = EvalCtx::new(&ctx, p(&["m"]));
        let mut sigma = Sigma::new();

        let call = Expr::Call(
            node(Expr::Qualified(p(&["System"]), String::from("exit"))),
            vec![arg(int(3))],
        );
        assert_eq!(eval_expr(&ectx, &mut sigma, &call), Err(Control::Abort));
        assert_eq!(sigma.exit_code, Some(3));
    }
}
