// Bidirectional pattern typing. Given an expected type, a pattern either
// rejects or yields the ordered list of bindings it introduces. The
// permission of the scrutinee is stripped for matching and re-applied to
// every bound type afterwards, so matching a `const T` value yields
// const-qualified bindings.

use crate::ast::{self, Node, Path, Pattern, Permission};
use crate::context::Context;
use crate::resolve::pat_names;
use crate::types::*;


pub type PatBindings = Vec<(String, Node<Ty>)>;


pub fn type_match_pattern(
    ctx: &Context,
    from: &[String],
    expected: &Node<Ty>,
    pattern: &Pattern,
) -> Result<PatBindings, TypeError> {
    // All binder names must be distinct before anything else.
    let names = pat_names(pattern);
    for (i, name) in names.iter().enumerate() {
        if names[..i].contains(name) {
            return Err(TypeError::PatDup(name.clone()));
        }
    }

    let perm = outer_perm(expected);
    let stripped = strip_perm(expected);
    let mut binds = match_against(ctx, from, &stripped, pattern)?;
    if let Some(perm) = perm {
        for (_, ty) in binds.iter_mut() {
            *ty = Node::new(Ty::Perm(perm, ty.clone()));
        }
    }
    Ok(binds)
}


fn outer_perm(ty: &Ty) -> Option<Permission> {
    match ty {
        Ty::Perm(perm, _) => Some(*perm),
        _                 => None,
    }
}


fn match_against(
    ctx: &Context,
    from: &[String],
    expected: &Node<Ty>,
    pattern: &Pattern,
) -> Result<PatBindings, TypeError> {
    match pattern {
        Pattern::Wildcard => Ok(vec![]),

        Pattern::Ident(name) => Ok(vec![(name.clone(), expected.clone())]),

        Pattern::Lit(lit) => {
            let lit_ty = type_literal(Some(&**expected), lit)?;
            if subtyping(&lit_ty, expected) {
                Ok(vec![])
            } else {
                Err(TypeError::LiteralMismatch)
            }
        }

        Pattern::Typed(name, syn_ty) => {
            let ty = lower_type(ctx, from, syn_ty)?;
            let members = match &**expected {
                Ty::Union(members) => members,
                _                  => return Err(TypeError::PatShape),
            };
            if !members.iter().any(|m| type_equiv(m, &ty)) {
                return Err(TypeError::PatShape);
            }
            Ok(vec![(name.clone(), ty)])
        }

        Pattern::Tuple(items) if items.is_empty() => {
            match &**expected {
                Ty::Prim(name) if name == "()" => Ok(vec![]),
                _ => Err(TypeError::PatShape),
            }
        }

        Pattern::Tuple(items) => {
            let elems = match &**expected {
                Ty::Tuple(elems) => elems.clone(),
                _                => return Err(TypeError::PatShape),
            };
            if elems.len() != items.len() {
                return Err(TypeError::PatTupleArity(items.len(), elems.len()));
            }
            let mut out = Vec::new();
            for (item, elem) in items.iter().zip(&elems) {
                out.extend(match_against(ctx, from, elem, item)?);
            }
            Ok(out)
        }

        Pattern::Record(path, fields) => {
            let decl_path = match &**expected {
                Ty::Named(p, _) => p.clone(),
                _               => return Err(TypeError::PatShape),
            };
            if !path_tail_matches(&decl_path, path) {
                return Err(TypeError::PatShape);
            }
            let record = ctx
                .lookup_record(&decl_path)
                .ok_or(TypeError::PatShape)?
                .clone();
            let module: Path = decl_path[..decl_path.len() - 1].to_vec();
            let mut out = Vec::new();
            for field in fields {
                let decl = record
                    .fields
                    .iter()
                    .find(|f| f.name == field.name)
                    .ok_or_else(|| TypeError::FieldUnknown(field.name.clone()))?;
                if !ctx.can_access(decl.vis, &module, from) {
                    return Err(TypeError::FieldNotVisible(field.name.clone()));
                }
                let field_ty = lower_type(ctx, &module, &decl.ty)?;
                out.extend(match_against(ctx, from, &field_ty, &field.pattern)?);
            }
            Ok(out)
        }

        Pattern::EnumTuple(path, variant, items) => {
            let (decl_path, decl) = expect_enum(ctx, expected, path)?;
            let module: Path = decl_path[..decl_path.len() - 1].to_vec();
            let var = decl
                .variants
                .iter()
                .find(|v| &v.name == variant)
                .ok_or_else(|| TypeError::VariantUnknown(variant.clone()))?;
            let payload = match &var.payload {
                ast::VariantPayload::Tuple(tys) => tys.clone(),
                ast::VariantPayload::Unit if items.is_empty() => vec![],
                _ => return Err(TypeError::PatShape),
            };
            if payload.len() != items.len() {
                return Err(TypeError::PatTupleArity(items.len(), payload.len()));
            }
            let mut out = Vec::new();
            for (item, ty) in items.iter().zip(&payload) {
                let ty = lower_type(ctx, &module, ty)?;
                out.extend(match_against(ctx, from, &ty, item)?);
            }
            Ok(out)
        }

        Pattern::EnumRecord(path, variant, fields) => {
            let (decl_path, decl) = expect_enum(ctx, expected, path)?;
            let module: Path = decl_path[..decl_path.len() - 1].to_vec();
            let var = decl
                .variants
                .iter()
                .find(|v| &v.name == variant)
                .ok_or_else(|| TypeError::VariantUnknown(variant.clone()))?;
            let decls = match &var.payload {
                ast::VariantPayload::Record(fields) => fields.clone(),
                _ => return Err(TypeError::PatShape),
            };
            let mut out = Vec::new();
            for field in fields {
                let decl = decls
                    .iter()
                    .find(|f| f.name == field.name)
                    .ok_or_else(|| TypeError::FieldUnknown(field.name.clone()))?;
                let ty = lower_type(ctx, &module, &decl.ty)?;
                out.extend(match_against(ctx, from, &ty, &field.pattern)?);
            }
            Ok(out)
        }

        Pattern::Modal(state, fields) => {
            let decl_path = match &**expected {
                Ty::Named(p, _)          => p.clone(),
                Ty::ModalState(p, s, _)  => {
                    if s != state {
                        return Err(TypeError::PatShape);
                    }
                    p.clone()
                }
                _ => return Err(TypeError::PatShape),
            };
            let modal = ctx
                .lookup_modal(&decl_path)
                .ok_or(TypeError::PatShape)?
                .clone();
            let module: Path = decl_path[..decl_path.len() - 1].to_vec();
            let block = modal
                .states
                .iter()
                .find(|s| &s.name == state)
                .ok_or_else(|| TypeError::StateUnknown(state.clone()))?;
            let mut out = Vec::new();
            for field in fields {
                let decl = block
                    .fields
                    .iter()
                    .find(|f| f.name == field.name)
                    .ok_or_else(|| TypeError::FieldUnknown(field.name.clone()))?;
                let ty = lower_type(ctx, &module, &decl.ty)?;
                out.extend(match_against(ctx, from, &ty, &field.pattern)?);
            }
            Ok(out)
        }

        Pattern::Range(lo, hi, inclusive) => {
            let lo = range_endpoint(lo)?;
            let hi = range_endpoint(hi)?;
            let empty = if *inclusive { lo > hi } else { lo >= hi };
            if empty {
                return Err(TypeError::RangePatternEmpty);
            }
            match &**expected {
                Ty::Prim(name) if is_int_prim(name) => Ok(vec![]),
                _ => Err(TypeError::PatShape),
            }
        }
    }
}


fn range_endpoint(lit: &ast::Literal) -> Result<u128, TypeError> {
    match lit {
        ast::Literal::Int(text, _) => parse_int_literal(text),
        _                          => Err(TypeError::RangePatternNonConst),
    }
}


// Pattern paths may be spelled short (`Opt::Some`) while semantic paths
// are fully qualified; match on the tail.
fn path_tail_matches(full: &[String], written: &[String]) -> bool {
    written.len() <= full.len() && full[full.len() - written.len()..] == written[..]
}


fn expect_enum(
    ctx: &Context,
    expected: &Node<Ty>,
    path: &[String],
) -> Result<(Path, Node<ast::EnumDecl>), TypeError> {
    let decl_path = match &**expected {
        Ty::Named(p, _) => p.clone(),
        _               => return Err(TypeError::PatShape),
    };
    if !path_tail_matches(&decl_path, path) {
        return Err(TypeError::PatShape);
    }
    let decl = ctx.lookup_enum(&decl_path).ok_or(TypeError::PatShape)?.clone();
    Ok((decl_path, decl))
}


// True iff every decomposition the pattern performs is total: such a
// pattern matches every value of the expected type, which is what `let`
// requires.
pub fn irrefutable_pattern(ctx: &Context, expected: &Node<Ty>, pattern: &Pattern) -> bool {
    let stripped = strip_perm(expected);
    match pattern {
        Pattern::Wildcard | Pattern::Ident(_) => true,

        Pattern::Lit(ast::Literal::Unit) => matches!(&*stripped, Ty::Prim(n) if n == "()"),
        Pattern::Lit(_) => false,

        Pattern::Typed(_, _) => false,

        Pattern::Tuple(items) if items.is_empty() => {
            matches!(&*stripped, Ty::Prim(n) if n == "()")
        }

        Pattern::Tuple(items) => match &*stripped {
            Ty::Tuple(elems) if elems.len() == items.len() => items
                .iter()
                .zip(elems)
                .all(|(p, e)| irrefutable_pattern(ctx, e, p)),
            _ => false,
        },

        Pattern::Record(path, fields) => match &*stripped {
            Ty::Named(decl_path, _) if path_tail_matches(decl_path, path) => {
                let record = match ctx.lookup_record(decl_path) {
                    Some(r) => r.clone(),
                    None    => return false,
                };
                let module: Path = decl_path[..decl_path.len() - 1].to_vec();
                fields.iter().all(|f| {
                    let decl = record.fields.iter().find(|d| d.name == f.name);
                    match decl {
                        Some(decl) => match lower_type(ctx, &module, &decl.ty) {
                            Ok(ty) => irrefutable_pattern(ctx, &ty, &f.pattern),
                            Err(_) => false,
                        },
                        None => false,
                    }
                })
            }
            _ => false,
        },

        // A variant pattern can always miss: some other variant.
        Pattern::EnumTuple(_, _, _) | Pattern::EnumRecord(_, _, _) => false,

        // Total only when the state is statically known to be this one.
        Pattern::Modal(state, fields) => match &*stripped {
            Ty::ModalState(decl_path, known, _) if known == state => {
                let modal = match ctx.lookup_modal(decl_path) {
                    Some(m) => m.clone(),
                    None    => return false,
                };
                let module: Path = decl_path[..decl_path.len() - 1].to_vec();
                let block = match modal.states.iter().find(|s| &s.name == state) {
                    Some(b) => b,
                    None    => return false,
                };
                fields.iter().all(|f| {
                    let decl = block.fields.iter().find(|d| d.name == f.name);
                    match decl {
                        Some(decl) => match lower_type(ctx, &module, &decl.ty) {
                            Ok(ty) => irrefutable_pattern(ctx, &ty, &f.pattern),
                            Err(_) => false,
                        },
                        None => false,
                    }
                })
            }
            _ => false,
        },

        Pattern::Range(_, _, _) => false,
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::*;
    use crate::span::Span;

    fn p(comps: &[&str]) -> Path {
        comps.iter().map(|s| String::from(*s)).collect()
    }

    fn field(name: &str, ty: Type) -> FieldDecl {
        FieldDecl {
            vis: Visibility::Public,
            name: String::from(name),
            ty: node(ty),
            span: Span::default(),
        }
    }

    fn test_ctx() -> Context {
        let record = Item::Record(RecordDecl {
            vis: Visibility::Public,
            name: String::from("Point"),
            bitcopy: true,
            fields: vec![
                field("x", Type::Prim(String::from("i32"))),
                field("y", Type::Prim(String::from("i32"))),
            ],
            methods: vec![],
            span: Span::default(),
        });
        let secret = Item::Record(RecordDecl {
            vis: Visibility::Public,
            name: String::from("Opaque"),
            bitcopy: false,
            fields: vec![FieldDecl {
                vis: Visibility::Private,
                name: String::from("inner"),
                ty: node(Type::Prim(String::from("i32"))),
                span: Span::default(),
            }],
            methods: vec![],
            span: Span::default(),
        });
        let en = Item::Enum(EnumDecl {
            vis: Visibility::Public,
            name: String::from("Opt"),
            variants: vec![
                VariantDecl {
                    name: String::from("Some"),
                    payload: VariantPayload::Tuple(vec![node(Type::Prim(String::from("i32")))]),
                    disc: None,
                    span: Span::default(),
                },
                VariantDecl {
                    name: String::from("None"),
                    payload: VariantPayload::Unit,
                    disc: None,
                    span: Span::default(),
                },
            ],
            span: Span::default(),
        });
        let modal = Item::Modal(ModalDecl {
            vis: Visibility::Public,
            name: String::from("Door"),
            states: vec![
                StateBlock {
                    name: String::from("Open"),
                    fields: vec![field("width", Type::Prim(String::from("i32")))],
                    methods: vec![],
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
        Context::build(vec![
            Module { path: p(&["m"]), items: vec![record, secret, en, modal] },
            Module { path: p(&["other"]), items: vec![] },
        ])
        .unwrap()
    }

    fn point_ty() -> Node<Ty> {
        Node::new(Ty::Named(p(&["m", "Point"]), vec![]))
    }

    #[test]
    fn test_ident_binds_whole() {
        let ctx = test_ctx();
        let binds = type_match_pattern(
            &ctx,
            &p(&["m"]),
            &prim("i32"),
            &Pattern::Ident(String::from("x")),
        )
        .unwrap();
        assert_eq!(binds.len(), 1);
        assert_eq!(binds[0].0, "x");
        assert_eq!(*binds[0].1, Ty::Prim(String::from("i32")));
    }

    #[test]
    fn test_duplicate_binders() {
        let ctx = test_ctx();
        let pat = Pattern::Tuple(vec![
            node(Pattern::Ident(String::from("a"))),
            node(Pattern::Ident(String::from("a"))),
        ]);
        let expected = Node::new(Ty::Tuple(vec![prim("i32"), prim("i32")]));
        let err = type_match_pattern(&ctx, &p(&["m"]), &expected, &pat).unwrap_err();
        assert_eq!(err.diag_id(), "Pat-Dup-Err");
    }

    #[test]
    fn test_tuple_arity() {
        let ctx = test_ctx();
        let pat = Pattern::Tuple(vec![node(Pattern::Wildcard)]);
        let expected = Node::new(Ty::Tuple(vec![prim("i32"), prim("i32")]));
        let err = type_match_pattern(&ctx, &p(&["m"]), &expected, &pat).unwrap_err();
        assert_eq!(err.diag_id(), "Pat-Tuple-Arity-Err");
    }

    #[test]
    fn test_record_pattern_and_permission() {
        let ctx = test_ctx();
        let pat = Pattern::Record(
            p(&["Point"]),
            vec![FieldPattern {
                name: String::from("x"),
                pattern: node(Pattern::Ident(String::from("px"))),
            }],
        );
        // Matching through `const Point` yields const bindings.
        let expected = Node::new(Ty::Perm(Permission::Const, point_ty()));
        let binds = type_match_pattern(&ctx, &p(&["m"]), &expected, &pat).unwrap();
        assert_eq!(binds.len(), 1);
        assert_eq!(
            *binds[0].1,
            Ty::Perm(Permission::Const, prim("i32"))
        );
    }

    #[test]
    fn test_record_field_visibility() {
        let ctx = test_ctx();
        let pat = Pattern::Record(
            p(&["Opaque"]),
            vec![FieldPattern {
                name: String::from("inner"),
                pattern: node(Pattern::Wildcard),
            }],
        );
        let expected = Node::new(Ty::Named(p(&["m", "Opaque"]), vec![]));
        // Private field is reachable from its own module...
        assert!(type_match_pattern(&ctx, &p(&["m"]), &expected, &pat).is_ok());
        // ...but not from another.
        let err = type_match_pattern(&ctx, &p(&["other"]), &expected, &pat).unwrap_err();
        assert_eq!(err.diag_id(), "Field-NotVisible");
    }

    #[test]
    fn test_enum_patterns() {
        let ctx = test_ctx();
        let opt = Node::new(Ty::Named(p(&["m", "Opt"]), vec![]));
        let pat = Pattern::EnumTuple(
            p(&["Opt"]),
            String::from("Some"),
            vec![node(Pattern::Ident(String::from("v")))],
        );
        let binds = type_match_pattern(&ctx, &p(&["m"]), &opt, &pat).unwrap();
        assert_eq!(binds[0].0, "v");
        assert_eq!(*binds[0].1, Ty::Prim(String::from("i32")));

        let bad = Pattern::EnumTuple(p(&["Opt"]), String::from("Nope"), vec![]);
        let err = type_match_pattern(&ctx, &p(&["m"]), &opt, &bad).unwrap_err();
        assert_eq!(err.diag_id(), "Variant-Unknown");
    }

    #[test]
    fn test_typed_pattern_against_union() {
        let ctx = test_ctx();
        let union = Node::new(Ty::Union(vec![prim("i32"), prim("bool")]));
        let pat = Pattern::Typed(String::from("b"), node(Type::Prim(String::from("bool"))));
        let binds = type_match_pattern(&ctx, &p(&["m"]), &union, &pat).unwrap();
        assert_eq!(*binds[0].1, Ty::Prim(String::from("bool")));

        let pat = Pattern::Typed(String::from("s"), node(Type::Prim(String::from("u8"))));
        assert!(type_match_pattern(&ctx, &p(&["m"]), &union, &pat).is_err());
    }

    #[test]
    fn test_range_patterns() {
        let ctx = test_ctx();
        let i32t = prim("i32");
        let ok = Pattern::Range(int_lit("1"), int_lit("5"), false);
        assert!(type_match_pattern(&ctx, &p(&["m"]), &i32t, &ok).is_ok());

        let empty = Pattern::Range(int_lit("5"), int_lit("5"), false);
        let err = type_match_pattern(&ctx, &p(&["m"]), &i32t, &empty).unwrap_err();
        assert_eq!(err.diag_id(), "RangePattern-Empty");

        // Inclusive 5..=5 is a singleton, not empty.
        let single = Pattern::Range(int_lit("5"), int_lit("5"), true);
        assert!(type_match_pattern(&ctx, &p(&["m"]), &i32t, &single).is_ok());

        let non_const = Pattern::Range(
            Literal::Str(String::from("a")),
            int_lit("5"),
            false,
        );
        let err = type_match_pattern(&ctx, &p(&["m"]), &i32t, &non_const).unwrap_err();
        assert_eq!(err.diag_id(), "RangePattern-NonConst");
    }

    #[test]
    fn test_irrefutability() {
        let ctx = test_ctx();
        let opt = Node::new(Ty::Named(p(&["m", "Opt"]), vec![]));
        let tup = Node::new(Ty::Tuple(vec![prim("i32"), prim("bool")]));

        assert!(irrefutable_pattern(&ctx, &tup, &Pattern::Wildcard));
        assert!(irrefutable_pattern(
            &ctx,
            &tup,
            &Pattern::Tuple(vec![
                node(Pattern::Ident(String::from("a"))),
                node(Pattern::Wildcard),
            ])
        ));
        // A literal leg makes the tuple refutable.
        assert!(!irrefutable_pattern(
            &ctx,
            &tup,
            &Pattern::Tuple(vec![
                node(Pattern::Lit(int_lit("1"))),
                node(Pattern::Wildcard),
            ])
        ));
        // Enum decompositions are never total.
        assert!(!irrefutable_pattern(
            &ctx,
            &opt,
            &Pattern::EnumTuple(p(&["Opt"]), String::from("Some"), vec![node(Pattern::Wildcard)])
        ));

        // A modal pattern is total only at the statically known state.
        let open = Node::new(Ty::ModalState(p(&["m", "Door"]), String::from("Open"), vec![]));
        let whole = Node::new(Ty::Named(p(&["m", "Door"]), vec![]));
        let pat = Pattern::Modal(String::from("Open"), vec![]);
        assert!(irrefutable_pattern(&ctx, &open, &pat));
        assert!(!irrefutable_pattern(&ctx, &whole, &pat));
    }
}
