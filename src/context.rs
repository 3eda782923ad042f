// The resolved-program context shared by the type system, the evaluator,
// and the codegen support layer. Everything is a flat table keyed by the
// "::"-joined path string; cross-references are by key, never by pointer,
// so the whole structure is acyclic.

use std::collections::HashMap;

use crate::ast::*;
use crate::resolve::{self, NameMap, ResolveError};


pub fn path_key(path: &[String]) -> String {
    crate::mangle::string_of_path(path)
}


pub fn qualify(module: &[String], name: &str) -> String {
    let mut key = path_key(module);
    if !key.is_empty() {
        key.push_str("::");
    }
    key.push_str(name);
    key
}


#[derive(Clone, Debug)]
pub enum TypeDecl {
    Record(Node<RecordDecl>),
    Enum(Node<EnumDecl>),
    Modal(Node<ModalDecl>),
    Alias(Node<TypeAliasDecl>),
}


#[derive(Clone, Debug)]
pub struct StaticEntry {
    pub module: Path,
    pub decl: Node<StaticDecl>,
}


// Immutable program-wide context. Built once after parsing, consulted
// everywhere.
#[derive(Debug)]
pub struct Context {
    pub modules: HashMap<String, Node<Module>>,
    pub module_order: Vec<Path>,
    pub name_maps: HashMap<String, NameMap>,
    pub types: HashMap<String, TypeDecl>,
    pub classes: HashMap<String, Node<ClassDecl>>,
    pub procs: HashMap<String, Node<ProcDecl>>,
    pub statics: Vec<StaticEntry>,
    // Static-initialisation order and the eager dependency edges between
    // init_modules indices; both drive poisoning.
    pub init_modules: Vec<Path>,
    pub init_eager_edges: Vec<(usize, usize)>,
}


impl Context {
    pub fn new() -> Context {
        Context {
            modules: HashMap::new(),
            module_order: Vec::new(),
            name_maps: HashMap::new(),
            types: HashMap::new(),
            classes: HashMap::new(),
            procs: HashMap::new(),
            statics: Vec::new(),
            init_modules: Vec::new(),
            init_eager_edges: Vec::new(),
        }
    }

    // Register every module, collect name maps and declaration tables.
    pub fn build(modules: Vec<Module>) -> Result<Context, ResolveError> {
        let mut ctx = Context::new();
        for module in modules {
            let module = node(module);
            let key = path_key(&module.path);
            ctx.module_order.push(module.path.clone());
            for item in &module.items {
                ctx.register(&module.path, item);
            }
            let map = resolve::collect_module(&module)?;
            ctx.name_maps.insert(key.clone(), map);
            ctx.modules.insert(key, module);
        }
        resolve::link_usings(&mut ctx)?;
        ctx.init_modules = ctx.module_order.clone();
        Ok(ctx)
    }

    fn register(&mut self, module: &Path, item: &Item) {
        match item {
            Item::Record(decl) => {
                let key = qualify(module, &decl.name);
                self.types.insert(key, TypeDecl::Record(node(decl.clone())));
            }
            Item::Enum(decl) => {
                let key = qualify(module, &decl.name);
                self.types.insert(key, TypeDecl::Enum(node(decl.clone())));
            }
            Item::Modal(decl) => {
                let key = qualify(module, &decl.name);
                self.types.insert(key, TypeDecl::Modal(node(decl.clone())));
            }
            Item::TypeAlias(decl) => {
                let key = qualify(module, &decl.name);
                self.types.insert(key, TypeDecl::Alias(node(decl.clone())));
            }
            Item::Class(decl) => {
                let key = qualify(module, &decl.name);
                self.classes.insert(key, node(decl.clone()));
            }
            Item::Proc(decl) => {
                let key = qualify(module, &decl.name);
                self.procs.insert(key, node(decl.clone()));
            }
            Item::Static(decl) => {
                self.statics.push(StaticEntry {
                    module: module.clone(),
                    decl: node(decl.clone()),
                });
            }
            Item::Using(_) => {}
        }
    }

    pub fn lookup_type(&self, path: &[String]) -> Option<&TypeDecl> {
        self.types.get(&path_key(path))
    }

    pub fn lookup_record(&self, path: &[String]) -> Option<&Node<RecordDecl>> {
        match self.lookup_type(path) {
            Some(TypeDecl::Record(decl)) => Some(decl),
            _                            => None,
        }
    }

    pub fn lookup_enum(&self, path: &[String]) -> Option<&Node<EnumDecl>> {
        match self.lookup_type(path) {
            Some(TypeDecl::Enum(decl)) => Some(decl),
            _                          => None,
        }
    }

    pub fn lookup_modal(&self, path: &[String]) -> Option<&Node<ModalDecl>> {
        match self.lookup_type(path) {
            Some(TypeDecl::Modal(decl)) => Some(decl),
            _                           => None,
        }
    }

    pub fn lookup_class(&self, path: &[String]) -> Option<&Node<ClassDecl>> {
        self.classes.get(&path_key(path))
    }

    pub fn lookup_proc(&self, path: &[String], name: &str) -> Option<&Node<ProcDecl>> {
        self.procs.get(&qualify(path, name))
    }

    pub fn has_module(&self, path: &[String]) -> bool {
        self.modules.contains_key(&path_key(path))
    }

    // Visibility predicate: public anywhere, internal to the declaring
    // module and its descendants, private to the declaring module only.
    pub fn can_access(&self, vis: Visibility, decl_module: &[String], from: &[String]) -> bool {
        match vis {
            Visibility::Public   => true,
            Visibility::Internal => {
                from.len() >= decl_module.len() && from[..decl_module.len()] == decl_module[..]
            }
            Visibility::Private  => decl_module == from,
        }
    }

    // Index of a module in init order, if it takes part in init.
    pub fn init_index(&self, module: &[String]) -> Option<usize> {
        self.init_modules.iter().position(|m| m[..] == module[..])
    }

    // Forward reachability over the eager init edges, starting from the
    // module whose initialiser panicked.
    pub fn poison_set(&self, module: &[String]) -> Vec<String> {
        let start = match self.init_index(module) {
            Some(i) => i,
            None    => return vec![path_key(module)],
        };
        let n = self.init_modules.len();
        let mut outgoing = vec![Vec::new(); n];
        for &(from, to) in &self.init_eager_edges {
            if from < n && to < n {
                outgoing[from].push(to);
            }
        }
        let mut visited = vec![false; n];
        let mut stack = vec![start];
        visited[start] = true;
        while let Some(cur) = stack.pop() {
            for &succ in &outgoing[cur] {
                if !visited[succ] {
                    visited[succ] = true;
                    stack.push(succ);
                }
            }
        }
        (0..n)
            .filter(|&i| visited[i])
            .map(|i| path_key(&self.init_modules[i]))
            .collect()
    }
}
