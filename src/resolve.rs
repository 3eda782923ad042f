// Name resolution: per-module name maps, using-clauses, aliases, and
// qualified paths. The name map is the sole authority for resolving a
// qualified reference; visibility goes through Context::can_access so the
// same resolver drives both semantic analysis and codegen.

use std::collections::HashMap;

use enumflags2::{bitflags, BitFlags};

use crate::ast::*;
use crate::context::{path_key, Context};


#[bitflags]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum EntityKind {
    Value       = 0b00001,
    Type        = 0b00010,
    Class       = 0b00100,
    ModuleAlias = 0b01000,
    RegionAlias = 0b10000,
}


pub type EntityKinds = BitFlags<EntityKind>;


#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EntitySource {
    Decl,
    Import,
    RegionAlias,
}


#[derive(Clone, Debug, PartialEq)]
pub struct Entity {
    pub kind: EntityKind,
    pub origin: Path,
    pub target: Option<String>,
    pub target_path: Option<Path>,
    pub source: EntitySource,
    pub vis: Visibility,
}


pub type NameMap = HashMap<String, Entity>;


#[derive(Clone, Debug, PartialEq)]
pub enum ResolveError {
    ModulePath(Path),
    NotFound(Path, String),
    NotVisible(Path, String),
    CollectDup(Path, String),
    UsingListDup(Path, String),
    UsingPathItemPublic(Path, String),
    UsingListPublic(Path, String),
}


use ResolveError::*;


impl ResolveError {
    pub fn diag_id(&self) -> &'static str {
        match self {
            ModulePath(_)             => "ResolveModulePath-Err",
            NotFound(_, _)            => "Resolve-NotFound",
            NotVisible(_, _)          => "Resolve-NotVisible",
            CollectDup(_, _)          => "Collect-Dup",
            UsingListDup(_, _)        => "Using-List-Dup",
            UsingPathItemPublic(_, _) => "Using-Path-Item-Public-Err",
            UsingListPublic(_, _)     => "Using-List-Public-Err",
        }
    }
}


pub type Resolve<T> = Result<T, ResolveError>;


// Every binder name appearing in a pattern, in textual order. Wildcards
// and literal rungs introduce nothing. Scope ordering (and with it drop
// order) depends on this order being deterministic.
pub fn pat_names(pattern: &Pattern) -> Vec<String> {
    let mut out = Vec::new();
    collect_pat_names(pattern, &mut out);
    out
}


fn collect_pat_names(pattern: &Pattern, out: &mut Vec<String>) {
    match pattern {
        Pattern::Wildcard | Pattern::Lit(_) | Pattern::Range(_, _, _) => {}
        Pattern::Ident(name) | Pattern::Typed(name, _) => out.push(name.clone()),
        Pattern::Tuple(items) | Pattern::EnumTuple(_, _, items) => {
            for item in items {
                collect_pat_names(item, out);
            }
        }
        Pattern::Record(_, fields)
        | Pattern::EnumRecord(_, _, fields)
        | Pattern::Modal(_, fields) => {
            for field in fields {
                collect_pat_names(&field.pattern, out);
            }
        }
    }
}


// The names a declaration introduces into its module, with their kinds.
pub fn decl_names(item: &Item) -> Vec<(String, EntityKind, Visibility)> {
    match item {
        Item::Proc(d)      => vec![(d.name.clone(), EntityKind::Value, d.vis)],
        Item::Record(d)    => vec![(d.name.clone(), EntityKind::Type, d.vis)],
        Item::Enum(d)      => vec![(d.name.clone(), EntityKind::Type, d.vis)],
        Item::Modal(d)     => vec![(d.name.clone(), EntityKind::Type, d.vis)],
        Item::Class(d)     => vec![(d.name.clone(), EntityKind::Class, d.vis)],
        Item::TypeAlias(d) => vec![(d.name.clone(), EntityKind::Type, d.vis)],
        Item::Static(d)    => pat_names(&d.pattern)
            .into_iter()
            .map(|name| (name, EntityKind::Value, d.vis))
            .collect(),
        Item::Using(_)     => vec![],
    }
}


// First pass: local declarations only. Using-clauses are linked once
// every module's map exists.
pub fn collect_module(module: &Module) -> Resolve<NameMap> {
    let mut map = NameMap::new();
    for item in &module.items {
        for (name, kind, vis) in decl_names(item) {
            if map.contains_key(&name) {
                return Err(CollectDup(module.path.clone(), name));
            }
            map.insert(
                name,
                Entity {
                    kind,
                    origin: module.path.clone(),
                    target: None,
                    target_path: None,
                    source: EntitySource::Decl,
                    vis,
                },
            );
        }
    }
    Ok(map)
}


// Expand a leading module alias, then require the joined path to exist.
pub fn resolve_module_path(ctx: &Context, from: &[String], path: &[String]) -> Resolve<Path> {
    if path.is_empty() {
        return Err(ModulePath(path.to_vec()));
    }
    let mut joined: Path = path.to_vec();
    if let Some(map) = ctx.name_maps.get(&path_key(from)) {
        if let Some(entity) = map.get(&path[0]) {
            if entity.kind == EntityKind::ModuleAlias {
                if let Some(target) = &entity.target_path {
                    joined = target.clone();
                    joined.extend_from_slice(&path[1..]);
                }
            }
        }
    }
    if ctx.has_module(&joined) {
        Ok(joined)
    } else {
        Err(ModulePath(path.to_vec()))
    }
}


// Resolve a qualified reference p::name from a given module, filtered by
// kind, with visibility applied.
pub fn resolve_qualified(
    ctx: &Context,
    from: &[String],
    path: &[String],
    name: &str,
    kind: EntityKind,
) -> Resolve<Entity> {
    let module = resolve_module_path(ctx, from, path)?;
    let map = ctx
        .name_maps
        .get(&path_key(&module))
        .ok_or_else(|| ModulePath(module.clone()))?;
    let entity = match map.get(name) {
        Some(entity) if entity.kind == kind => entity.clone(),
        _ => return Err(NotFound(module.clone(), String::from(name))),
    };
    if !ctx.can_access(entity.vis, &module, from) {
        return Err(NotVisible(module, String::from(name)));
    }
    Ok(entity)
}


fn import_entity(found: &Entity, target_module: &Path, vis: Visibility) -> Entity {
    Entity {
        kind: found.kind,
        origin: target_module.clone(),
        target: None,
        target_path: found.target_path.clone(),
        source: EntitySource::Import,
        vis,
    }
}


// Second pass over every module's using-clauses. A `using p::q` binds q
// locally; a public using re-exports and therefore demands the source be
// public too.
pub fn link_usings(ctx: &mut Context) -> Resolve<()> {
    let order: Vec<Path> = ctx.module_order.clone();
    for module_path in &order {
        let module = match ctx.modules.get(&path_key(module_path)) {
            Some(m) => m.clone(),
            None    => continue,
        };
        for item in &module.items {
            let using = match item {
                Item::Using(u) => u,
                _              => continue,
            };
            link_one_using(ctx, module_path, using)?;
        }
    }
    Ok(())
}


fn insert_bound(
    ctx: &mut Context,
    module_path: &[String],
    name: String,
    entity: Entity,
) -> Resolve<()> {
    let map = ctx
        .name_maps
        .get_mut(&path_key(module_path))
        .expect("collected module");
    if map.contains_key(&name) {
        return Err(CollectDup(module_path.to_vec(), name));
    }
    map.insert(name, entity);
    Ok(())
}


fn link_one_using(ctx: &mut Context, module_path: &[String], using: &UsingDecl) -> Resolve<()> {
    match using {
        UsingDecl::Single { vis, path, name, .. } => {
            let target = resolve_module_path(ctx, module_path, path)?;
            let found = lookup_in(ctx, &target, name)
                .ok_or_else(|| NotFound(target.clone(), name.clone()))?;
            if !ctx.can_access(found.vis, &target, module_path) {
                return Err(NotVisible(target.clone(), name.clone()));
            }
            if *vis == Visibility::Public && found.vis != Visibility::Public {
                return Err(UsingPathItemPublic(target.clone(), name.clone()));
            }
            let entity = import_entity(&found, &target, *vis);
            insert_bound(ctx, module_path, name.clone(), entity)
        }
        UsingDecl::List { vis, path, items, .. } => {
            let target = resolve_module_path(ctx, module_path, path)?;
            let mut seen = Vec::new();
            for item in items {
                let bound = item.alias.clone().unwrap_or_else(|| item.name.clone());
                if seen.contains(&bound) {
                    return Err(UsingListDup(module_path.to_vec(), bound));
                }
                seen.push(bound.clone());
                let found = lookup_in(ctx, &target, &item.name)
                    .ok_or_else(|| NotFound(target.clone(), item.name.clone()))?;
                if !ctx.can_access(found.vis, &target, module_path) {
                    return Err(NotVisible(target.clone(), item.name.clone()));
                }
                if *vis == Visibility::Public && found.vis != Visibility::Public {
                    return Err(UsingListPublic(target.clone(), item.name.clone()));
                }
                let entity = import_entity(&found, &target, *vis);
                insert_bound(ctx, module_path, bound, entity)?;
            }
            Ok(())
        }
        UsingDecl::ModuleAlias { vis, path, alias, .. } => {
            // The aliased path must exist, but carries no item lookup.
            if !ctx.has_module(path) {
                return Err(ModulePath(path.clone()));
            }
            let entity = Entity {
                kind: EntityKind::ModuleAlias,
                origin: module_path.to_vec(),
                target: None,
                target_path: Some(path.clone()),
                source: EntitySource::Decl,
                vis: *vis,
            };
            insert_bound(ctx, module_path, alias.clone(), entity)
        }
    }
}


fn lookup_in(ctx: &Context, module: &[String], name: &str) -> Option<Entity> {
    ctx.name_maps.get(&path_key(module))?.get(name).cloned()
}


// Kind-filtered lookups against one module's map.
pub fn lookup_filtered<'m>(map: &'m NameMap, name: &str, kinds: EntityKinds) -> Option<&'m Entity> {
    map.get(name).filter(|e| kinds.contains(e.kind))
}


pub fn resolve_value_name<'m>(map: &'m NameMap, name: &str) -> Option<&'m Entity> {
    lookup_filtered(map, name, EntityKind::Value.into())
}


pub fn resolve_type_name<'m>(map: &'m NameMap, name: &str) -> Option<&'m Entity> {
    lookup_filtered(map, name, EntityKind::Type.into())
}


pub fn resolve_class_name<'m>(map: &'m NameMap, name: &str) -> Option<&'m Entity> {
    lookup_filtered(map, name, EntityKind::Class.into())
}


pub fn resolve_module_name<'m>(map: &'m NameMap, name: &str) -> Option<&'m Entity> {
    lookup_filtered(map, name, EntityKind::ModuleAlias.into())
}


// Datastructure to manage lexical scoping during checking.
pub struct Scopes<T> {
    stack: Vec<Vec<(String, T)>>,
}


impl<T: Clone> Scopes<T> {
    pub fn new() -> Scopes<T> {
        Scopes { stack: vec![Vec::new()] }
    }

    pub fn push(&mut self) {
        self.stack.push(Vec::new());
    }

    pub fn pop(&mut self) {
        self.stack.pop();
    }

    // Walk the scope stack inner-to-outer; within a scope the most
    // recent binding shadows.
    pub fn get(&self, key: &str) -> Option<&T> {
        for scope in self.stack.iter().rev() {
            for (name, value) in scope.iter().rev() {
                if name == key {
                    return Some(value);
                }
            }
        }
        None
    }

    pub fn define(&mut self, key: &str, value: T) {
        let scope = self.stack.last_mut().expect("scope stack never empty");
        scope.push((String::from(key), value));
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::Span;

    fn module(path: &[&str], items: Vec<Item>) -> Module {
        Module {
            path: path.iter().map(|s| String::from(*s)).collect(),
            items,
        }
    }

    fn proc_item(name: &str, vis: Visibility) -> Item {
        Item::Proc(ProcDecl {
            vis,
            name: String::from(name),
            params: vec![],
            ret: node(Type::Prim(String::from("()"))),
            body: node(block(vec![], None)),
            span: Span::default(),
        })
    }

    fn using_single(path: &[&str], name: &str, vis: Visibility) -> Item {
        Item::Using(UsingDecl::Single {
            vis,
            path: path.iter().map(|s| String::from(*s)).collect(),
            name: String::from(name),
            span: Span::default(),
        })
    }

    fn p(comps: &[&str]) -> Path {
        comps.iter().map(|s| String::from(*s)).collect()
    }

    #[test]
    fn test_pat_names_order() {
        // (a, R { x = b, y = _ }, 3, c) binds a, b, c in textual order.
        let pat = Pattern::Tuple(vec![
            node(Pattern::Ident(String::from("a"))),
            node(Pattern::Record(
                p(&["R"]),
                vec![
                    FieldPattern {
                        name: String::from("x"),
                        pattern: node(Pattern::Ident(String::from("b"))),
                    },
                    FieldPattern {
                        name: String::from("y"),
                        pattern: node(Pattern::Wildcard),
                    },
                ],
            )),
            node(Pattern::Lit(int_lit("3"))),
            node(Pattern::Ident(String::from("c"))),
        ]);
        assert_eq!(pat_names(&pat), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_collect_dup() {
        let m = module(
            &["app"],
            vec![
                proc_item("f", Visibility::Public),
                proc_item("f", Visibility::Public),
            ],
        );
        let err = collect_module(&m).unwrap_err();
        assert_eq!(err.diag_id(), "Collect-Dup");
    }

    #[test]
    fn test_using_binds_locally() {
        let ctx = Context::build(vec![
            module(&["lib"], vec![proc_item("helper", Visibility::Public)]),
            module(
                &["app"],
                vec![using_single(&["lib"], "helper", Visibility::Private)],
            ),
        ])
        .unwrap();

        let map = ctx.name_maps.get("app").unwrap();
        let entity = resolve_value_name(map, "helper").unwrap();
        assert_eq!(entity.source, EntitySource::Import);
        assert_eq!(entity.origin, p(&["lib"]));
    }

    #[test]
    fn test_using_public_reexport_of_private() {
        let err = Context::build(vec![
            module(&["lib"], vec![proc_item("helper", Visibility::Internal)]),
            module(
                &["app"],
                vec![using_single(&["lib"], "helper", Visibility::Public)],
            ),
        ])
        .unwrap_err();
        // `internal` is importable from anywhere below lib, but app is
        // not below lib, so the visibility check fires first here.
        assert_eq!(err.diag_id(), "Resolve-NotVisible");

        let err = Context::build(vec![
            module(
                &["lib"],
                vec![
                    proc_item("helper", Visibility::Public),
                    proc_item("inner", Visibility::Internal),
                ],
            ),
            module(
                &["lib", "sub"],
                vec![using_single(&["lib"], "inner", Visibility::Public)],
            ),
        ])
        .unwrap_err();
        assert_eq!(err.diag_id(), "Using-Path-Item-Public-Err");
    }

    #[test]
    fn test_using_list_dup() {
        let err = Context::build(vec![
            module(
                &["lib"],
                vec![
                    proc_item("a", Visibility::Public),
                    proc_item("b", Visibility::Public),
                ],
            ),
            module(
                &["app"],
                vec![Item::Using(UsingDecl::List {
                    vis: Visibility::Private,
                    path: p(&["lib"]),
                    items: vec![
                        UsingItem { name: String::from("a"), alias: None },
                        UsingItem {
                            name: String::from("b"),
                            alias: Some(String::from("a")),
                        },
                    ],
                    span: Span::default(),
                })],
            ),
        ])
        .unwrap_err();
        assert_eq!(err.diag_id(), "Using-List-Dup");
    }

    #[test]
    fn test_module_alias_expansion() {
        let ctx = Context::build(vec![
            module(&["deep", "lib"], vec![proc_item("f", Visibility::Public)]),
            module(
                &["app"],
                vec![Item::Using(UsingDecl::ModuleAlias {
                    vis: Visibility::Private,
                    path: p(&["deep", "lib"]),
                    alias: String::from("dl"),
                    span: Span::default(),
                })],
            ),
        ])
        .unwrap();

        let resolved = resolve_module_path(&ctx, &p(&["app"]), &p(&["dl"])).unwrap();
        assert_eq!(resolved, p(&["deep", "lib"]));

        let entity =
            resolve_qualified(&ctx, &p(&["app"]), &p(&["dl"]), "f", EntityKind::Value).unwrap();
        assert_eq!(entity.kind, EntityKind::Value);

        let err = resolve_module_path(&ctx, &p(&["app"]), &p(&["nope"])).unwrap_err();
        assert_eq!(err.diag_id(), "ResolveModulePath-Err");
    }

    #[test]
    fn test_scopes_shadowing() {
        let mut scopes: Scopes<i32> = Scopes::new();
        scopes.define("x", 1);
        scopes.push();
        scopes.define("x", 2);
        assert_eq!(scopes.get("x"), Some(&2));
        scopes.pop();
        assert_eq!(scopes.get("x"), Some(&1));
        assert_eq!(scopes.get("y"), None);
    }
}
