// Statement execution and scope discipline. Abrupt outcomes are the Err
// arm of the evaluation result, so `?` is exactly outcome propagation;
// no host exceptions are involved anywhere.

use crate::ast::*;
use crate::checks::PanicReason;
use crate::config::EvalConfig;
use crate::context::Context;
use crate::eval::{eval_expr, eval_place, read_place, write_place};
use crate::matching::{bind_order, match_pattern};
use crate::sigma::{BindInfo, BindState, Movability, Responsibility, Sigma};
use crate::types::Ty;
use crate::value::Value;


#[derive(Clone, Debug, PartialEq)]
pub enum Control {
    Return(Option<Value>),
    Break(Option<Value>),
    Continue,
    Result(Value),
    Panic,
    Abort,
}


pub type Eval = Result<Value, Control>;
pub type StmtOut = Result<(), Control>;


pub struct EvalCtx<'a> {
    pub ctx: &'a Context,
    pub module: Path,
    pub ret_ty: Option<Node<Ty>>,
    pub depth: usize,
    pub config: EvalConfig,
}


impl<'a> EvalCtx<'a> {
    pub fn new(ctx: &'a Context, module: Path) -> EvalCtx<'a> {
        EvalCtx {
            ctx,
            module,
            ret_ty: None,
            depth: 0,
            config: EvalConfig::default(),
        }
    }

    pub fn for_call(&self, module: Path, ret_ty: Option<Node<Ty>>) -> EvalCtx<'a> {
        EvalCtx {
            ctx: self.ctx,
            module,
            ret_ty,
            depth: self.depth + 1,
            config: self.config.clone(),
        }
    }
}


// Latch the reason on sigma and surface the abrupt outcome.
pub fn panic_with(sigma: &mut Sigma, reason: PanicReason) -> Control {
    sigma.set_panic(reason);
    log::trace!("panic: {}", crate::checks::panic_reason_string(reason));
    Control::Panic
}


pub fn bind_info_for(kind: BindKind) -> BindInfo {
    match kind {
        BindKind::Let | BindKind::ShadowLet | BindKind::Var | BindKind::ShadowVar => BindInfo {
            movability: Movability::Immov,
            responsibility: Responsibility::Resp,
        },
    }
}


// Match and bind, inserting bindings in the textual order of the
// binders. A failed match here means the checker let a refutable
// pattern through, which the evaluator treats as a panic.
pub fn bind_pattern(
    _ectx: &EvalCtx,
    sigma: &mut Sigma,
    pattern: &Pattern,
    value: Value,
    info: BindInfo,
) -> StmtOut {
    let env = match match_pattern(pattern, &value) {
        Some(env) => env,
        None      => return Err(panic_with(sigma, PanicReason::Other)),
    };
    for (name, value) in bind_order(pattern, env) {
        sigma.bind(&name, value, info);
    }
    Ok(())
}


// Recursive drop glue: the user-declared drop (when the record has one)
// runs first, then components in declaration order.
pub fn drop_value(ectx: &EvalCtx, sigma: &mut Sigma, value: &Value) -> StmtOut {
    match value {
        Value::Record { path, fields } => {
            crate::apply::run_user_drop(ectx, sigma, path, value)?;
            for (_, field) in fields {
                drop_value(ectx, sigma, field)?;
            }
            Ok(())
        }
        Value::Modal { path, state, fields } => {
            crate::apply::run_user_drop_modal(ectx, sigma, path, state, value)?;
            for (_, field) in fields {
                drop_value(ectx, sigma, field)?;
            }
            Ok(())
        }
        Value::Tuple(items) | Value::Array(items) => {
            for item in items {
                drop_value(ectx, sigma, item)?;
            }
            Ok(())
        }
        Value::Enum { payload, .. } => match payload {
            crate::value::EnumPayload::Unit => Ok(()),
            crate::value::EnumPayload::Tuple(items) => {
                for item in items {
                    drop_value(ectx, sigma, item)?;
                }
                Ok(())
            }
            crate::value::EnumPayload::Record(fields) => {
                for (_, field) in fields {
                    drop_value(ectx, sigma, field)?;
                }
                Ok(())
            }
        },
        Value::Union { value, .. } => drop_value(ectx, sigma, value),
        // Managed strings and bytes return their storage to the
        // allocator; in the reference state that storage is internal.
        _ => Ok(()),
    }
}


fn combine_cleanup(outcome: Eval, cleanup: Control) -> Eval {
    match (&outcome, &cleanup) {
        (_, Control::Abort)            => Err(Control::Abort),
        (Err(Control::Panic), Control::Panic) => Err(Control::Abort),
        (Err(Control::Abort), _)       => Err(Control::Abort),
        (Ok(_), Control::Panic) | (Err(_), Control::Panic) => Err(Control::Panic),
        _                              => outcome,
    }
}


fn drop_binding_value(
    ectx: &EvalCtx,
    sigma: &mut Sigma,
    value: &Value,
    state: &BindState,
) -> StmtOut {
    match state {
        BindState::Moved => Ok(()),
        BindState::Valid => drop_value(ectx, sigma, value),
        BindState::PartiallyMoved(moved) => match value {
            // Only components that were not moved out still need drops.
            Value::Record { fields, .. } | Value::Modal { fields, .. } => {
                for (name, field) in fields {
                    if !moved.contains(name) {
                        drop_value(ectx, sigma, field)?;
                    }
                }
                Ok(())
            }
            Value::Tuple(items) => {
                for (i, item) in items.iter().enumerate() {
                    if !moved.contains(&i.to_string()) {
                        drop_value(ectx, sigma, item)?;
                    }
                }
                Ok(())
            }
            _ => Ok(()),
        },
    }
}


// Scope exit: deferred blocks LIFO, then responsible bindings in reverse
// declaration order, then the scope's addresses die. Panics combine:
// one panic survives cleanup, a second upgrades to abort.
pub fn cleanup_scope(ectx: &EvalCtx, sigma: &mut Sigma, incoming: Eval) -> Eval {
    let outcome = run_scope_cleanup(ectx, sigma, incoming);
    // Region entries opened inside this scope pop with it, expiring
    // their allocations before the scope's own addresses go.
    let scope = sigma.current_scope();
    while sigma.regions.last().map(|r| r.scope) == Some(scope) {
        sigma.pop_region();
    }
    sigma.pop_scope();
    outcome
}


// The defer and drop halves of scope exit, without invalidating the
// scope itself; regions interpose their release between the two.
pub fn run_scope_cleanup(ectx: &EvalCtx, sigma: &mut Sigma, incoming: Eval) -> Eval {
    let (defers, binds) = match sigma.scopes.last() {
        Some(scope) => (scope.defers.clone(), scope.binds.clone()),
        None        => return incoming,
    };
    let mut outcome = incoming;

    for block in defers.iter().rev() {
        if matches!(outcome, Err(Control::Abort)) {
            break;
        }
        match eval_block(ectx, sigma, block) {
            Ok(_) => {}
            Err(Control::Panic) => outcome = combine_cleanup(outcome, Control::Panic),
            Err(Control::Abort) => outcome = Err(Control::Abort),
            // A defer cannot redirect control flow outward.
            Err(_) => {}
        }
    }

    for bind in binds.iter().rev() {
        if matches!(outcome, Err(Control::Abort)) {
            break;
        }
        if bind.info.responsibility != Responsibility::Resp {
            continue;
        }
        let value = match sigma.read_addr(bind.addr) {
            Ok(v)  => v,
            Err(_) => continue,
        };
        match drop_binding_value(ectx, sigma, &value, &bind.state) {
            Ok(()) => {}
            Err(Control::Panic) => outcome = combine_cleanup(outcome, Control::Panic),
            Err(Control::Abort) => outcome = Err(Control::Abort),
            Err(_) => {}
        }
    }

    outcome
}


// Evaluate a block in a fresh scope. `result e` escapes to here: it is
// the value of the nearest enclosing block expression.
pub fn eval_block(ectx: &EvalCtx, sigma: &mut Sigma, block: &Block) -> Eval {
    sigma.push_scope();
    let result = eval_block_body(ectx, sigma, block);
    let result = cleanup_scope(ectx, sigma, result);
    match result {
        Err(Control::Result(v)) => Ok(v),
        other                   => other,
    }
}


pub fn eval_block_body(ectx: &EvalCtx, sigma: &mut Sigma, block: &Block) -> Eval {
    for stmt in &block.stmts {
        exec_stmt(ectx, sigma, stmt)?;
    }
    match &block.tail {
        Some(expr) => eval_expr(ectx, sigma, expr),
        None       => Ok(Value::Unit),
    }
}


pub fn exec_seq(ectx: &EvalCtx, sigma: &mut Sigma, stmts: &[Node<Stmt>]) -> StmtOut {
    for stmt in stmts {
        exec_stmt(ectx, sigma, stmt)?;
    }
    Ok(())
}


pub fn exec_stmt(ectx: &EvalCtx, sigma: &mut Sigma, stmt: &Stmt) -> StmtOut {
    match stmt {
        Stmt::Bind(kind, pattern, _ty, init) => {
            let value = eval_expr(ectx, sigma, init)?;
            bind_pattern(ectx, sigma, pattern, value, bind_info_for(*kind))
        }

        Stmt::Assign(lhs, rhs) => {
            let value = eval_expr(ectx, sigma, rhs)?;
            let place = eval_place(ectx, sigma, lhs)?;
            // Reassigning a responsible binding first drops the old
            // value, unless it was already moved out.
            if let Some(root) = place.root.clone() {
                let (resp, state) = match sigma.binding(&root) {
                    Some(bind) => (
                        bind.info.movability == Movability::Immov
                            && bind.info.responsibility == Responsibility::Resp,
                        bind.state.clone(),
                    ),
                    None => (false, BindState::Valid),
                };
                if resp && state != BindState::Moved {
                    if let Ok(old) = read_place(sigma, &place) {
                        drop_value(ectx, sigma, &old)?;
                    }
                }
                if let Some(bind) = sigma.binding_mut(&root) {
                    bind.state = BindState::Valid;
                }
            }
            write_place(sigma, &place, value)
        }

        Stmt::CompoundAssign(op, lhs, rhs) => {
            let rhs = eval_expr(ectx, sigma, rhs)?;
            let place = eval_place(ectx, sigma, lhs)?;
            let current = read_place(sigma, &place)?;
            let result = crate::eval::apply_binop(sigma, *op, current, rhs)?;
            write_place(sigma, &place, result)
        }

        Stmt::Expr(expr) => {
            eval_expr(ectx, sigma, expr)?;
            Ok(())
        }

        Stmt::Return(expr) => {
            let value = match expr {
                Some(expr) => Some(eval_expr(ectx, sigma, expr)?),
                None       => None,
            };
            Err(Control::Return(value))
        }

        Stmt::Result(expr) => {
            let value = eval_expr(ectx, sigma, expr)?;
            Err(Control::Result(value))
        }

        Stmt::Break(expr) => {
            let value = match expr {
                Some(expr) => Some(eval_expr(ectx, sigma, expr)?),
                None       => None,
            };
            Err(Control::Break(value))
        }

        Stmt::Continue => Err(Control::Continue),

        Stmt::Defer(block) => {
            sigma.scope_defers(block.clone());
            Ok(())
        }

        Stmt::While(cond, body) => loop {
            let cond_value = eval_expr(ectx, sigma, cond)?;
            match cond_value.as_bool() {
                Some(true)  => {}
                Some(false) => return Ok(()),
                None        => return Err(panic_with(sigma, PanicReason::Other)),
            }
            match eval_block(ectx, sigma, body) {
                Ok(_) => {}
                Err(Control::Break(_)) => return Ok(()),
                Err(Control::Continue) => {}
                Err(other) => return Err(other),
            }
        },

        Stmt::For(pattern, source, body) => {
            let items = iteration_items(ectx, sigma, source)?;
            for item in items {
                sigma.push_scope();
                let bound =
                    bind_pattern(ectx, sigma, pattern, item, BindInfo::default());
                let result = match bound {
                    Ok(()) => match eval_block(ectx, sigma, body) {
                        Ok(_)      => Ok(Value::Unit),
                        Err(other) => Err(other),
                    },
                    Err(ctl) => Err(ctl),
                };
                let result = cleanup_scope(ectx, sigma, result);
                match result {
                    Ok(_) => {}
                    Err(Control::Break(_)) => return Ok(()),
                    Err(Control::Continue) => {}
                    Err(other) => return Err(other),
                }
            }
            Ok(())
        }

        Stmt::Error(expr) => {
            if let Some(expr) = expr {
                eval_expr(ectx, sigma, expr)?;
            }
            Err(panic_with(sigma, PanicReason::ErrorStmt))
        }
    }
}


// The iteration source is evaluated exactly once, then stepped by index.
fn iteration_items(ectx: &EvalCtx, sigma: &mut Sigma, source: &Expr) -> Result<Vec<Value>, Control> {
    let value = eval_expr(ectx, sigma, source)?;
    match value {
        Value::Array(items) => Ok(items),
        Value::Slice { base, start, len } => {
            let backing = sigma
                .read_addr(base)
                .map_err(|r| panic_with(sigma, r))?;
            match backing {
                Value::Array(items) => {
                    let start = start as usize;
                    let end = start + len as usize;
                    if end > items.len() {
                        return Err(panic_with(sigma, PanicReason::Bounds));
                    }
                    Ok(items[start..end].to_vec())
                }
                _ => Err(panic_with(sigma, PanicReason::Other)),
            }
        }
        Value::Str { bytes, .. } => Ok(String::from_utf8_lossy(&bytes)
            .chars()
            .map(Value::Char)
            .collect()),
        Value::Bytes { bytes, .. } => Ok(bytes
            .iter()
            .map(|&b| Value::Int(crate::value::IntVal::from_u64("u8", b as u64)))
            .collect()),
        _ => Err(panic_with(sigma, PanicReason::Other)),
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::*;
    use crate::context::Context;
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

    fn unit_ty() -> Node<Type> {
        node(Type::Prim(String::from("()")))
    }

    // A record with an empty user drop, so cleanup order lands in the
    // drop trace.
    fn resource(name: &str) -> Item {
        Item::Record(RecordDecl {
            vis: Visibility::Public,
            name: String::from(name),
            bitcopy: false,
            fields: vec![],
            methods: vec![MethodDecl {
                vis: Visibility::Public,
                name: String::from("drop"),
                recv: RecvMode::Unique,
                params: vec![],
                ret: unit_ty(),
                body: Some(node(block(vec![], None))),
                span: Span::default(),
            }],
            span: Span::default(),
        })
    }

    fn test_ctx() -> Context {
        Context::build(vec![Module {
            path: p(&["m"]),
            items: vec![resource("ResourceA"), resource("ResourceB")],
        }])
        .unwrap()
    }

    fn record_lit(name: &str) -> Expr {
        Expr::RecordLit(p(&[name]), vec![])
    }

    // log = log * 10 + k
    fn log_step(k: u64) -> Stmt {
        Stmt::Assign(
            node(ident("log")),
            node(Expr::Binary(
                BinOp::Add,
                node(Expr::Binary(BinOp::Mul, node(ident("log")), node(int(10)))),
                node(int(k)),
            )),
        )
    }

    #[test]
    fn test_defers_then_drops_in_reverse_order() {
        let ctx = test_ctx();
        let ectx = EvalCtx::new(&ctx, p(&["m"]));
        let mut sigma = crate::sigma::Sigma::new();
        sigma.bind("log", iv(0), BindInfo::default());

        let body = block(
            vec![
                Stmt::Bind(
                    BindKind::Let,
                    node(Pattern::Ident(String::from("a"))),
                    None,
                    node(record_lit("ResourceA")),
                ),
                Stmt::Bind(
                    BindKind::Let,
                    node(Pattern::Ident(String::from("b"))),
                    None,
                    node(record_lit("ResourceB")),
                ),
                Stmt::Defer(node(block(vec![log_step(1)], None))),
                Stmt::Defer(node(block(vec![log_step(2)], None))),
            ],
            None,
        );
        eval_block(&ectx, &mut sigma, &body).unwrap();

        // Defers run LIFO, so d2 lands before d1.
        let log_addr = sigma.binding("log").unwrap().addr;
        assert_eq!(sigma.read_addr(log_addr).unwrap(), iv(21));
        // Then responsible bindings drop in reverse declaration order.
        assert_eq!(sigma.drop_trace, vec!["m::ResourceB", "m::ResourceA"]);
    }

    #[test]
    fn test_modal_state_drop_runs() {
        // Only the Open state declares a drop; a Closed value leaves no
        // trace at scope exit.
        let gate = Item::Modal(ModalDecl {
            vis: Visibility::Public,
            name: String::from("Gate"),
            states: vec![
                StateBlock {
                    name: String::from("Open"),
                    fields: vec![],
                    methods: vec![MethodDecl {
                        vis: Visibility::Public,
                        name: String::from("drop"),
                        recv: RecvMode::Unique,
                        params: vec![],
                        ret: unit_ty(),
                        body: Some(node(block(vec![], None))),
                        span: Span::default(),
                    }],
                    transitions: vec![],
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
        let ctx = Context::build(vec![Module {
            path: p(&["m"]),
            items: vec![gate],
        }])
        .unwrap();
        let ectx = EvalCtx::new(&ctx, p(&["m"]));
        let mut sigma = crate::sigma::Sigma::new();

        let body = block(
            vec![
                Stmt::Bind(
                    BindKind::Let,
                    node(Pattern::Ident(String::from("g"))),
                    None,
                    node(Expr::ModalLit(p(&["Gate"]), String::from("Open"), vec![])),
                ),
                Stmt::Bind(
                    BindKind::Let,
                    node(Pattern::Ident(String::from("h"))),
                    None,
                    node(Expr::ModalLit(p(&["Gate"]), String::from("Closed"), vec![])),
                ),
            ],
            None,
        );
        eval_block(&ectx, &mut sigma, &body).unwrap();
        assert_eq!(sigma.drop_trace, vec!["m::Gate"]);
    }

    #[test]
    fn test_drop_on_reassign() {
        let ctx = test_ctx();
        let ectx = EvalCtx::new(&ctx, p(&["m"]));
        let mut sigma = crate::sigma::Sigma::new();

        let body = block(
            vec![
                Stmt::Bind(
                    BindKind::Var,
                    node(Pattern::Ident(String::from("r"))),
                    None,
                    node(record_lit("ResourceA")),
                ),
                Stmt::Assign(node(ident("r")), node(record_lit("ResourceB"))),
            ],
            None,
        );
        eval_block(&ectx, &mut sigma, &body).unwrap();
        // The old value drops at reassignment, the new one at scope end.
        assert_eq!(sigma.drop_trace, vec!["m::ResourceA", "m::ResourceB"]);
    }

    #[test]
    fn test_while_and_compound_assign() {
        let ctx = test_ctx();
        let ectx = EvalCtx::new(&ctx, p(&["m"]));
        let mut sigma = crate::sigma::Sigma::new();
        sigma.bind("n", iv(0), BindInfo::default());

        // while n < 5 { n += 1 }
        let body = block(
            vec![Stmt::While(
                node(Expr::Binary(BinOp::Lt, node(ident("n")), node(int(5)))),
                node(block(
                    vec![Stmt::CompoundAssign(
                        BinOp::Add,
                        node(ident("n")),
                        node(int(1)),
                    )],
                    None,
                )),
            )],
            None,
        );
        eval_block(&ectx, &mut sigma, &body).unwrap();
        let n_addr = sigma.binding("n").unwrap().addr;
        assert_eq!(sigma.read_addr(n_addr).unwrap(), iv(5));
    }

    #[test]
    fn test_for_over_array_with_break() {
        let ctx = test_ctx();
        let ectx = EvalCtx::new(&ctx, p(&["m"]));
        let mut sigma = crate::sigma::Sigma::new();
        sigma.bind("sum", iv(0), BindInfo::default());

        // for x in [1, 2, 3, 4] { if x > 3 { break } sum += x }
        let body = block(
            vec![Stmt::For(
                node(Pattern::Ident(String::from("x"))),
                node(Expr::Array(vec![
                    node(int(1)),
                    node(int(2)),
                    node(int(3)),
                    node(int(4)),
                ])),
                node(block(
                    vec![
                        Stmt::Expr(node(Expr::If(
                            node(Expr::Binary(BinOp::Gt, node(ident("x")), node(int(3)))),
                            node(block(vec![Stmt::Break(None)], None)),
                            None,
                        ))),
                        Stmt::CompoundAssign(BinOp::Add, node(ident("sum")), node(ident("x"))),
                    ],
                    None,
                )),
            )],
            None,
        );
        eval_block(&ectx, &mut sigma, &body).unwrap();
        let addr = sigma.binding("sum").unwrap().addr;
        assert_eq!(sigma.read_addr(addr).unwrap(), iv(6));
    }

    #[test]
    fn test_error_stmt_panics() {
        let ctx = test_ctx();
        let ectx = EvalCtx::new(&ctx, p(&["m"]));
        let mut sigma = crate::sigma::Sigma::new();
        let body = block(vec![Stmt::Error(None)], None);
        assert_eq!(eval_block(&ectx, &mut sigma, &body), Err(Control::Panic));
        assert_eq!(sigma.panic_reason, Some(PanicReason::ErrorStmt));
        assert_eq!(crate::checks::panic_code(PanicReason::ErrorStmt), 0x02);
    }

    #[test]
    fn test_panic_during_defer_upgrades_to_abort() {
        let ctx = test_ctx();
        let ectx = EvalCtx::new(&ctx, p(&["m"]));
        let mut sigma = crate::sigma::Sigma::new();
        // The block body panics, and its defer panics again.
        let body = block(
            vec![
                Stmt::Defer(node(block(vec![Stmt::Error(None)], None))),
                Stmt::Error(None),
            ],
            None,
        );
        assert_eq!(eval_block(&ectx, &mut sigma, &body), Err(Control::Abort));
    }

    #[test]
    fn test_result_escapes_to_block() {
        let ctx = test_ctx();
        let ectx = EvalCtx::new(&ctx, p(&["m"]));
        let mut sigma = crate::sigma::Sigma::new();
        let body = block(vec![Stmt::Result(node(int(9)))], Some(int(1)));
        assert_eq!(eval_block(&ectx, &mut sigma, &body).unwrap(), iv(9));
    }

    #[test]
    fn test_move_then_read_panics() {
        let ctx = test_ctx();
        let ectx = EvalCtx::new(&ctx, p(&["m"]));
        let mut sigma = crate::sigma::Sigma::new();
        let body = block(
            vec![
                Stmt::Bind(
                    BindKind::Let,
                    node(Pattern::Ident(String::from("a"))),
                    None,
                    node(record_lit("ResourceA")),
                ),
                Stmt::Bind(
                    BindKind::Let,
                    node(Pattern::Ident(String::from("b"))),
                    None,
                    node(Expr::Move(node(ident("a")))),
                ),
                Stmt::Expr(node(ident("a"))),
            ],
            None,
        );
        assert_eq!(eval_block(&ectx, &mut sigma, &body), Err(Control::Panic));
        // Only b's copy drops: a was moved out.
        assert_eq!(sigma.drop_trace, vec!["m::ResourceA"]);
    }
}
