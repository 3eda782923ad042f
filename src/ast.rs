// Syntax trees handed to us by the parser. Pure data: no behaviour here
// beyond a handful of construction helpers, every consumer pattern-matches.

use std::rc::Rc;

use crate::span::Span;


// Abstract over various memory management strategies.
pub type Node<T> = Rc<T>;
pub type Seq<T> = Vec<Node<T>>;


// A module path is an ordered sequence of identifiers.
pub type Path = Vec<String>;


#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Visibility {
    Public,
    Internal,
    Private,
}


// Arithmetic and logic operations
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    Lt,
    Gt,
    Lte,
    Gte,
    Eq,
    Neq,
}


#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UnOp {
    Not,
    Neg,
}


#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Permission {
    Const,
    Unique,
    Shared,
}


#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RawPtrQual {
    Imm,
    Mut,
}


#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PtrState {
    Valid,
    Null,
    Expired,
}


// String and bytes values are either heap-owning or borrowed views.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SeqState {
    Managed,
    View,
}


// Syntactic types, lowered to semantic types by the type system.
#[derive(Clone, Debug, PartialEq)]
pub enum Type {
    Prim(String),
    Perm(Permission, Node<Type>),
    Ptr(Node<Type>, Option<PtrState>),
    RawPtr(RawPtrQual, Node<Type>),
    Tuple(Seq<Type>),
    Array(Node<Type>, Node<Expr>),
    Slice(Node<Type>),
    Func(Seq<Type>, Node<Type>),
    Union(Seq<Type>),
    Range,
    Str(Option<SeqState>),
    Bytes(Option<SeqState>),
    Dynamic(Path),
    Named(Path, Seq<Type>),
    ModalState(Path, String, Seq<Type>),
}


// Literals shared between expressions and patterns. Numeric literals
// keep their source text; the type system owns digit parsing.
#[derive(Clone, Debug, PartialEq)]
pub enum Literal {
    Unit,
    Bool(bool),
    Char(char),
    Int(String, Option<String>),
    Float(String, Option<String>),
    Str(String),
    Null,
}


#[derive(Clone, Debug, PartialEq)]
pub struct FieldPattern {
    pub name: String,
    pub pattern: Node<Pattern>,
}


#[derive(Clone, Debug, PartialEq)]
pub enum Pattern {
    Wildcard,
    Ident(String),
    Lit(Literal),
    Typed(String, Node<Type>),
    Tuple(Seq<Pattern>),
    Record(Path, Vec<FieldPattern>),
    EnumTuple(Path, String, Seq<Pattern>),
    EnumRecord(Path, String, Vec<FieldPattern>),
    Modal(String, Vec<FieldPattern>),
    Range(Literal, Literal, bool),
}


#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RangeKind {
    Exclusive,
    Inclusive,
}


#[derive(Clone, Debug, PartialEq)]
pub struct MatchArm {
    pub pattern: Node<Pattern>,
    pub guard: Option<Node<Expr>>,
    pub body: Node<Expr>,
}


#[derive(Clone, Debug, PartialEq)]
pub struct FieldInit {
    pub name: String,
    pub value: Node<Expr>,
}


// One call argument; `moved` records an explicit `move` spelling.
#[derive(Clone, Debug, PartialEq)]
pub struct Arg {
    pub moved: bool,
    pub value: Node<Expr>,
}


#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Lit(Literal),
    Ident(String),
    Qualified(Path, String),
    Field(Node<Expr>, String),
    TupleIndex(Node<Expr>, String),
    Index(Node<Expr>, Node<Expr>),
    Deref(Node<Expr>),
    AddrOf(Node<Expr>),
    Unary(UnOp, Node<Expr>),
    Binary(BinOp, Node<Expr>, Node<Expr>),
    Cast(Node<Expr>, Node<Type>),
    Transmute(Node<Type>, Node<Expr>),
    Try(Node<Expr>),
    Move(Node<Expr>),
    Tuple(Seq<Expr>),
    Array(Seq<Expr>),
    Range(Option<Node<Expr>>, Option<Node<Expr>>, RangeKind),
    RecordLit(Path, Vec<FieldInit>),
    EnumLit(Path, String, Vec<Arg>),
    ModalLit(Path, String, Vec<FieldInit>),
    Call(Node<Expr>, Vec<Arg>),
    MethodCall(Node<Expr>, String, Vec<Arg>),
    If(Node<Expr>, Node<Block>, Option<Node<Expr>>),
    Match(Node<Expr>, Vec<MatchArm>),
    Block(Node<Block>),
    Region(Option<String>, Node<Block>),
    Frame(Option<String>, Node<Block>),
    Alloc(Node<Expr>, Option<String>),
}


#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BindKind {
    Let,
    Var,
    ShadowLet,
    ShadowVar,
}


#[derive(Clone, Debug, PartialEq)]
pub enum Stmt {
    Bind(BindKind, Node<Pattern>, Option<Node<Type>>, Node<Expr>),
    Assign(Node<Expr>, Node<Expr>),
    CompoundAssign(BinOp, Node<Expr>, Node<Expr>),
    Expr(Node<Expr>),
    Return(Option<Node<Expr>>),
    Result(Node<Expr>),
    Break(Option<Node<Expr>>),
    Continue,
    Defer(Node<Block>),
    While(Node<Expr>, Node<Block>),
    For(Node<Pattern>, Node<Expr>, Node<Block>),
    Error(Option<Node<Expr>>),
}


#[derive(Clone, Debug, PartialEq)]
pub struct Block {
    pub stmts: Seq<Stmt>,
    pub tail: Option<Node<Expr>>,
    pub span: Span,
}


#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ParamMode {
    Move,
    Alias,
}


#[derive(Clone, Debug, PartialEq)]
pub struct Param {
    pub name: String,
    pub mode: ParamMode,
    pub ty: Node<Type>,
}


// Receiver spelling on methods; also names the symbol suffix.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RecvMode {
    Const,
    Unique,
    Shared,
    Move,
}


#[derive(Clone, Debug, PartialEq)]
pub struct ProcDecl {
    pub vis: Visibility,
    pub name: String,
    pub params: Vec<Param>,
    pub ret: Node<Type>,
    pub body: Node<Block>,
    pub span: Span,
}


#[derive(Clone, Debug, PartialEq)]
pub struct MethodDecl {
    pub vis: Visibility,
    pub name: String,
    pub recv: RecvMode,
    pub params: Vec<Param>,
    pub ret: Node<Type>,
    pub body: Option<Node<Block>>,
    pub span: Span,
}


#[derive(Clone, Debug, PartialEq)]
pub struct FieldDecl {
    pub vis: Visibility,
    pub name: String,
    pub ty: Node<Type>,
    pub span: Span,
}


#[derive(Clone, Debug, PartialEq)]
pub struct RecordDecl {
    pub vis: Visibility,
    pub name: String,
    pub bitcopy: bool,
    pub fields: Vec<FieldDecl>,
    pub methods: Vec<MethodDecl>,
    pub span: Span,
}


#[derive(Clone, Debug, PartialEq)]
pub enum VariantPayload {
    Unit,
    Tuple(Seq<Type>),
    Record(Vec<FieldDecl>),
}


#[derive(Clone, Debug, PartialEq)]
pub struct VariantDecl {
    pub name: String,
    pub payload: VariantPayload,
    pub disc: Option<u64>,
    pub span: Span,
}


#[derive(Clone, Debug, PartialEq)]
pub struct EnumDecl {
    pub vis: Visibility,
    pub name: String,
    pub variants: Vec<VariantDecl>,
    pub span: Span,
}


// One transition: moves self, returns self in the target state.
#[derive(Clone, Debug, PartialEq)]
pub struct TransitionDecl {
    pub vis: Visibility,
    pub name: String,
    pub target: String,
    pub params: Vec<Param>,
    pub body: Node<Block>,
    pub span: Span,
}


#[derive(Clone, Debug, PartialEq)]
pub struct StateBlock {
    pub name: String,
    pub fields: Vec<FieldDecl>,
    pub methods: Vec<MethodDecl>,
    pub transitions: Vec<TransitionDecl>,
    pub span: Span,
}


#[derive(Clone, Debug, PartialEq)]
pub struct ModalDecl {
    pub vis: Visibility,
    pub name: String,
    pub states: Vec<StateBlock>,
    pub span: Span,
}


#[derive(Clone, Debug, PartialEq)]
pub struct ClassDecl {
    pub vis: Visibility,
    pub name: String,
    pub methods: Vec<MethodDecl>,
    pub span: Span,
}


#[derive(Clone, Debug, PartialEq)]
pub struct TypeAliasDecl {
    pub vis: Visibility,
    pub name: String,
    pub ty: Node<Type>,
    pub span: Span,
}


#[derive(Clone, Debug, PartialEq)]
pub struct StaticDecl {
    pub vis: Visibility,
    pub mutable: bool,
    pub pattern: Node<Pattern>,
    pub ty: Option<Node<Type>>,
    pub init: Node<Expr>,
    pub span: Span,
}


// using p::q              -- single item, bound as q
// using p::{a, b as c}    -- list, each bound locally
// using p as m            -- module alias
#[derive(Clone, Debug, PartialEq)]
pub struct UsingItem {
    pub name: String,
    pub alias: Option<String>,
}


#[derive(Clone, Debug, PartialEq)]
pub enum UsingDecl {
    Single {
        vis: Visibility,
        path: Path,
        name: String,
        span: Span,
    },
    List {
        vis: Visibility,
        path: Path,
        items: Vec<UsingItem>,
        span: Span,
    },
    ModuleAlias {
        vis: Visibility,
        path: Path,
        alias: String,
        span: Span,
    },
}


#[derive(Clone, Debug, PartialEq)]
pub enum Item {
    Proc(ProcDecl),
    Record(RecordDecl),
    Enum(EnumDecl),
    Modal(ModalDecl),
    Class(ClassDecl),
    TypeAlias(TypeAliasDecl),
    Static(StaticDecl),
    Using(UsingDecl),
}


#[derive(Clone, Debug, PartialEq)]
pub struct Module {
    pub path: Path,
    pub items: Vec<Item>,
}


impl Expr {
    // Place expressions denote storage locations.
    pub fn is_place(&self) -> bool {
        match self {
            Expr::Ident(_)         => true,
            Expr::Qualified(_, _)  => true,
            Expr::Field(_, _)      => true,
            Expr::TupleIndex(_, _) => true,
            Expr::Index(_, _)      => true,
            Expr::Deref(inner)     => inner.is_place(),
            _                      => false,
        }
    }
}


// Convenience constructors; tests lean on these heavily.
pub fn node<T>(value: T) -> Node<T> {
    Node::new(value)
}


pub fn block(stmts: Vec<Stmt>, tail: Option<Expr>) -> Block {
    Block {
        stmts: stmts.into_iter().map(node).collect(),
        tail: tail.map(node),
        span: Span::default(),
    }
}


pub fn int_lit(text: &str) -> Literal {
    Literal::Int(String::from(text), None)
}


pub fn int_suffixed(text: &str, suffix: &str) -> Literal {
    Literal::Int(String::from(text), Some(String::from(suffix)))
}
