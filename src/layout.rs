// Memory layout. These numbers are exact, not hints: the IR emitter lays
// out every aggregate byte-identically to what this module computes, so
// any change here is an ABI break.

use crate::ast::{self, Node, PtrState, SeqState};
use crate::context::{Context, TypeDecl};
use crate::types::{lower_type, strip_perm, Ty, TypeError};


pub const PTR_SIZE: u64 = 8;
pub const PTR_ALIGN: u64 = 8;


#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Layout {
    pub size: u64,
    pub align: u64,
}


impl Layout {
    pub fn new(size: u64, align: u64) -> Layout {
        Layout { size, align }
    }
}


pub fn pad_to(offset: u64, align: u64) -> u64 {
    if align == 0 {
        return offset;
    }
    (offset + align - 1) / align * align
}


// Field offsets for a sequence of layouts, plus the enclosing layout.
// Empty aggregates are zero-sized with byte alignment.
pub fn record_layout_of(fields: &[Layout]) -> (Layout, Vec<u64>) {
    let mut offsets = Vec::with_capacity(fields.len());
    let mut offset = 0u64;
    let mut align = 1u64;
    for field in fields {
        offset = pad_to(offset, field.align);
        offsets.push(offset);
        offset += field.size;
        align = align.max(field.align);
    }
    (Layout::new(pad_to(offset, align), align), offsets)
}


pub fn prim_layout(name: &str) -> Option<Layout> {
    match name {
        "i8" | "u8" | "bool"              => Some(Layout::new(1, 1)),
        "i16" | "u16" | "f16"             => Some(Layout::new(2, 2)),
        "i32" | "u32" | "f32" | "char"    => Some(Layout::new(4, 4)),
        "i64" | "u64" | "isize" | "usize" | "f64" => Some(Layout::new(8, 8)),
        "i128" | "u128"                   => Some(Layout::new(16, 16)),
        "()" | "!"                        => Some(Layout::new(0, 1)),
        _                                 => None,
    }
}


// Reserved bit patterns the type offers for encoding unit alternatives.
// Only pointers statically known valid have one (the zero word).
pub fn niche_count(ty: &Ty) -> u32 {
    match ty {
        Ty::Ptr(_, Some(PtrState::Valid)) => 1,
        Ty::Perm(_, base)                 => niche_count(base),
        _                                 => 0,
    }
}


pub fn is_unit_ty(ty: &Ty) -> bool {
    matches!(ty, Ty::Prim(name) if name == "()")
}


// Discriminant values for an enum: explicit where declared, previous
// plus one otherwise, starting at zero.
pub fn enum_discriminants(decl: &ast::EnumDecl) -> Vec<u64> {
    let mut out = Vec::with_capacity(decl.variants.len());
    let mut next = 0u64;
    for variant in &decl.variants {
        let disc = variant.disc.unwrap_or(next);
        next = disc.wrapping_add(1);
        out.push(disc);
    }
    out
}


// Smallest unsigned integer covering every discriminant.
pub fn disc_prim_for(max: u64) -> &'static str {
    if max <= u8::MAX as u64 {
        "u8"
    } else if max <= u16::MAX as u64 {
        "u16"
    } else if max <= u32::MAX as u64 {
        "u32"
    } else {
        "u64"
    }
}


// Layout plan for enums, modals, and unions.
#[derive(Clone, Debug, PartialEq)]
pub enum AggPlan {
    // The niche-bearing payload's own layout doubles as the whole
    // layout; `payload` is the index of the payload variant/state/member
    // and `empty` the index encoded by the zero pattern (if any).
    Niche {
        layout: Layout,
        payload: usize,
        empty: Option<usize>,
    },
    Tagged {
        layout: Layout,
        disc_prim: &'static str,
        payload_offset: u64,
        payload_size: u64,
        discs: Vec<u64>,
    },
}


impl AggPlan {
    pub fn layout(&self) -> Layout {
        match self {
            AggPlan::Niche { layout, .. }  => *layout,
            AggPlan::Tagged { layout, .. } => *layout,
        }
    }
}


fn tagged_plan(payloads: &[Layout], discs: Vec<u64>) -> AggPlan {
    let disc_prim = disc_prim_for(discs.iter().copied().max().unwrap_or(0));
    let disc = prim_layout(disc_prim).unwrap();
    let payload_size = payloads.iter().map(|l| l.size).max().unwrap_or(0);
    let payload_align = payloads.iter().map(|l| l.align).max().unwrap_or(1);
    let payload_offset = pad_to(disc.size, payload_align);
    let align = disc.align.max(payload_align);
    let size = pad_to(payload_offset + payload_size, align);
    AggPlan::Tagged {
        layout: Layout::new(size, align),
        disc_prim,
        payload_offset,
        payload_size,
        discs,
    }
}


// Per-state field types of a modal, lowered in the modal's own module.
pub fn state_field_tys(
    ctx: &Context,
    path: &[String],
    state: &ast::StateBlock,
) -> Result<Vec<Node<Ty>>, TypeError> {
    let module = &path[..path.len() - 1];
    state
        .fields
        .iter()
        .map(|f| lower_type(ctx, module, &f.ty))
        .collect()
}


pub fn variant_payload_tys(
    ctx: &Context,
    path: &[String],
    variant: &ast::VariantDecl,
) -> Result<Vec<Node<Ty>>, TypeError> {
    let module = &path[..path.len() - 1];
    match &variant.payload {
        ast::VariantPayload::Unit => Ok(vec![]),
        ast::VariantPayload::Tuple(tys) => {
            tys.iter().map(|t| lower_type(ctx, module, t)).collect()
        }
        ast::VariantPayload::Record(fields) => fields
            .iter()
            .map(|f| lower_type(ctx, module, &f.ty))
            .collect(),
    }
}


pub fn record_field_tys(
    ctx: &Context,
    path: &[String],
    decl: &ast::RecordDecl,
) -> Result<Vec<Node<Ty>>, TypeError> {
    let module = &path[..path.len() - 1];
    decl.fields
        .iter()
        .map(|f| lower_type(ctx, module, &f.ty))
        .collect()
}


fn fields_layout(ctx: &Context, tys: &[Node<Ty>]) -> Result<(Layout, Vec<u64>), TypeError> {
    let mut layouts = Vec::with_capacity(tys.len());
    for ty in tys {
        layouts.push(layout_of(ctx, ty)?);
    }
    Ok(record_layout_of(&layouts))
}


// Enums never take the niche layout.
pub fn enum_plan(ctx: &Context, path: &[String], decl: &ast::EnumDecl) -> Result<AggPlan, TypeError> {
    let mut payloads = Vec::with_capacity(decl.variants.len());
    for variant in &decl.variants {
        let tys = variant_payload_tys(ctx, path, variant)?;
        payloads.push(fields_layout(ctx, &tys)?.0);
    }
    Ok(tagged_plan(&payloads, enum_discriminants(decl)))
}


// A modal takes the niche layout when exactly one state carries payload,
// that payload is a single niche-bearing field, and at most one other
// state exists (and it is empty). The zero pattern then encodes the
// empty state and any non-zero pattern the payload.
pub fn modal_plan(ctx: &Context, path: &[String], decl: &ast::ModalDecl) -> Result<AggPlan, TypeError> {
    let mut payload_states = Vec::new();
    let mut empty_states = Vec::new();
    for (i, state) in decl.states.iter().enumerate() {
        if state.fields.is_empty() {
            empty_states.push(i);
        } else {
            payload_states.push(i);
        }
    }
    if payload_states.len() == 1 && empty_states.len() <= 1 {
        let payload = payload_states[0];
        let tys = state_field_tys(ctx, path, &decl.states[payload])?;
        if tys.len() == 1 && niche_count(&tys[0]) as usize >= empty_states.len() {
            let layout = layout_of(ctx, &tys[0])?;
            return Ok(AggPlan::Niche {
                layout,
                payload,
                empty: empty_states.first().copied(),
            });
        }
    }
    let mut payloads = Vec::with_capacity(decl.states.len());
    for state in &decl.states {
        let tys = state_field_tys(ctx, path, state)?;
        payloads.push(fields_layout(ctx, &tys)?.0);
    }
    let discs = (0..decl.states.len() as u64).collect();
    Ok(tagged_plan(&payloads, discs))
}


// A union takes the niche layout when exactly one member bears a niche
// and every other member is unit.
pub fn union_plan(ctx: &Context, members: &[Node<Ty>]) -> Result<AggPlan, TypeError> {
    let mut niche_members = Vec::new();
    let mut all_others_unit = true;
    for (i, member) in members.iter().enumerate() {
        if niche_count(member) > 0 {
            niche_members.push(i);
        } else if !is_unit_ty(member) {
            all_others_unit = false;
        }
    }
    if niche_members.len() == 1 && all_others_unit {
        let payload = niche_members[0];
        let empty = members.iter().position(|m| is_unit_ty(m));
        let layout = layout_of(ctx, &members[payload])?;
        return Ok(AggPlan::Niche { layout, payload, empty });
    }
    let mut payloads = Vec::with_capacity(members.len());
    for member in members {
        payloads.push(layout_of(ctx, member)?);
    }
    let discs = (0..members.len() as u64).collect();
    Ok(tagged_plan(&payloads, discs))
}


pub fn layout_of(ctx: &Context, ty: &Node<Ty>) -> Result<Layout, TypeError> {
    let stripped = strip_perm(ty);
    match &*stripped {
        Ty::Prim(name) => {
            prim_layout(name).ok_or_else(|| TypeError::UnknownType(name.clone()))
        }
        Ty::Perm(_, _) => unreachable!("stripped above"),
        Ty::Ptr(_, _) | Ty::RawPtr(_, _) | Ty::Func(_, _) => {
            Ok(Layout::new(PTR_SIZE, PTR_ALIGN))
        }
        Ty::Slice(_) | Ty::Dynamic(_) => Ok(Layout::new(16, 8)),
        // {kind: u8, lo: usize, hi: usize} with word alignment.
        Ty::Range => Ok(Layout::new(24, 8)),
        Ty::Str(state) | Ty::Bytes(state) => Ok(match state {
            Some(SeqState::Managed) => Layout::new(24, 8),
            Some(SeqState::View)    => Layout::new(16, 8),
            // Tagged: {disc: u8 | managed | view}, word-aligned.
            None                    => Layout::new(32, 8),
        }),
        Ty::Tuple(items) => Ok(fields_layout(ctx, items)?.0),
        Ty::Array(elem, n) => {
            let elem = layout_of(ctx, elem)?;
            Ok(Layout::new(elem.size * n, elem.align))
        }
        Ty::Union(members) => Ok(union_plan(ctx, members)?.layout()),
        Ty::Refine(base, _) => layout_of(ctx, base),
        Ty::Opaque(_) => Ok(Layout::new(PTR_SIZE, PTR_ALIGN)),
        Ty::Named(path, _) => match ctx.lookup_type(path) {
            Some(TypeDecl::Record(decl)) => {
                let decl = decl.clone();
                let tys = record_field_tys(ctx, path, &decl)?;
                Ok(fields_layout(ctx, &tys)?.0)
            }
            Some(TypeDecl::Enum(decl)) => {
                let decl = decl.clone();
                Ok(enum_plan(ctx, path, &decl)?.layout())
            }
            Some(TypeDecl::Modal(decl)) => {
                let decl = decl.clone();
                Ok(modal_plan(ctx, path, &decl)?.layout())
            }
            _ => Err(TypeError::UnknownType(crate::context::path_key(path))),
        },
        // A state-qualified modal still occupies the whole modal.
        Ty::ModalState(path, _, _) => {
            let decl = ctx
                .lookup_modal(path)
                .ok_or_else(|| TypeError::UnknownType(crate::context::path_key(path)))?
                .clone();
            Ok(modal_plan(ctx, path, &decl)?.layout())
        }
    }
}


// Offsets of a record's fields, for the emitter and the encoders.
pub fn record_offsets(ctx: &Context, tys: &[Node<Ty>]) -> Result<Vec<u64>, TypeError> {
    Ok(fields_layout(ctx, tys)?.1)
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::*;
    use crate::span::Span;
    use crate::types::prim;

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

    fn state(name: &str, fields: Vec<FieldDecl>) -> StateBlock {
        StateBlock {
            name: String::from(name),
            fields,
            methods: vec![],
            transitions: vec![],
            span: Span::default(),
        }
    }

    fn test_ctx() -> Context {
        let point = Item::Record(RecordDecl {
            vis: Visibility::Public,
            name: String::from("Point"),
            bitcopy: true,
            fields: vec![
                field("x", Type::Prim(String::from("i32"))),
                field("y", Type::Prim(String::from("u8"))),
            ],
            methods: vec![],
            span: Span::default(),
        });
        let opt_ptr = Item::Modal(ModalDecl {
            vis: Visibility::Public,
            name: String::from("OptPtr"),
            states: vec![
                state(
                    "Some",
                    vec![field(
                        "ptr",
                        Type::Ptr(
                            node(Type::Prim(String::from("u8"))),
                            Some(PtrState::Valid),
                        ),
                    )],
                ),
                state("None", vec![]),
            ],
            span: Span::default(),
        });
        let status = Item::Enum(EnumDecl {
            vis: Visibility::Public,
            name: String::from("Status"),
            variants: vec![
                VariantDecl {
                    name: String::from("Idle"),
                    payload: VariantPayload::Unit,
                    disc: None,
                    span: Span::default(),
                },
                VariantDecl {
                    name: String::from("Busy"),
                    payload: VariantPayload::Tuple(vec![node(Type::Prim(String::from("u32")))]),
                    disc: None,
                    span: Span::default(),
                },
            ],
            span: Span::default(),
        });
        Context::build(vec![Module {
            path: p(&["m"]),
            items: vec![point, opt_ptr, status],
        }])
        .unwrap()
    }

    #[test]
    fn test_prim_layouts() {
        assert_eq!(prim_layout("bool"), Some(Layout::new(1, 1)));
        assert_eq!(prim_layout("char"), Some(Layout::new(4, 4)));
        assert_eq!(prim_layout("u128"), Some(Layout::new(16, 16)));
        assert_eq!(prim_layout("usize"), Some(Layout::new(8, 8)));
        assert_eq!(prim_layout("()"), Some(Layout::new(0, 1)));
        assert_eq!(prim_layout("!"), Some(Layout::new(0, 1)));
    }

    #[test]
    fn test_size_is_multiple_of_align() {
        let ctx = test_ctx();
        let cases: Vec<Node<Ty>> = vec![
            prim("i8"),
            prim("i128"),
            Node::new(Ty::Range),
            Node::new(Ty::Str(None)),
            Node::new(Ty::Str(Some(SeqState::Managed))),
            Node::new(Ty::Tuple(vec![prim("u8"), prim("u64"), prim("u8")])),
            Node::new(Ty::Named(p(&["m", "Point"]), vec![])),
            Node::new(Ty::Named(p(&["m", "Status"]), vec![])),
            Node::new(Ty::Named(p(&["m", "OptPtr"]), vec![])),
        ];
        for ty in &cases {
            let layout = layout_of(&ctx, ty).unwrap();
            assert!(layout.align.is_power_of_two());
            assert_eq!(layout.size % layout.align, 0, "{:?}", ty);
        }
    }

    #[test]
    fn test_record_with_padding() {
        let ctx = test_ctx();
        // Point { x: i32, y: u8 } -> size 8, align 4, offsets [0, 4].
        let tys = vec![prim("i32"), prim("u8")];
        let offsets = record_offsets(&ctx, &tys).unwrap();
        assert_eq!(offsets, vec![0, 4]);
        let point = Node::new(Ty::Named(p(&["m", "Point"]), vec![]));
        assert_eq!(layout_of(&ctx, &point).unwrap(), Layout::new(8, 4));
    }

    #[test]
    fn test_empty_record() {
        let (layout, offsets) = record_layout_of(&[]);
        assert_eq!(layout, Layout::new(0, 1));
        assert!(offsets.is_empty());
    }

    #[test]
    fn test_string_bytes_layouts() {
        let ctx = test_ctx();
        let cases = vec![
            (Ty::Str(Some(SeqState::Managed)), Layout::new(24, 8)),
            (Ty::Str(Some(SeqState::View)), Layout::new(16, 8)),
            (Ty::Str(None), Layout::new(32, 8)),
            (Ty::Bytes(Some(SeqState::View)), Layout::new(16, 8)),
        ];
        for (ty, expect) in cases {
            assert_eq!(layout_of(&ctx, &Node::new(ty)).unwrap(), expect);
        }
    }

    #[test]
    fn test_array_layout() {
        let ctx = test_ctx();
        let arr = Node::new(Ty::Array(prim("u16"), 5));
        assert_eq!(layout_of(&ctx, &arr).unwrap(), Layout::new(10, 2));
    }

    #[test]
    fn test_enum_tagged() {
        let ctx = test_ctx();
        let decl = ctx.lookup_enum(&p(&["m", "Status"])).unwrap().clone();
        let plan = enum_plan(&ctx, &p(&["m", "Status"]), &decl).unwrap();
        match plan {
            AggPlan::Tagged { layout, disc_prim, payload_offset, discs, .. } => {
                assert_eq!(disc_prim, "u8");
                assert_eq!(discs, vec![0, 1]);
                // u8 disc, pad to u32 payload.
                assert_eq!(payload_offset, 4);
                assert_eq!(layout, Layout::new(8, 4));
            }
            other => panic!("expected tagged plan, got {:?}", other),
        }
    }

    #[test]
    fn test_enum_explicit_discriminants() {
        let decl = EnumDecl {
            vis: Visibility::Public,
            name: String::from("E"),
            variants: vec![
                VariantDecl {
                    name: String::from("A"),
                    payload: VariantPayload::Unit,
                    disc: Some(5),
                    span: Span::default(),
                },
                VariantDecl {
                    name: String::from("B"),
                    payload: VariantPayload::Unit,
                    disc: None,
                    span: Span::default(),
                },
                VariantDecl {
                    name: String::from("C"),
                    payload: VariantPayload::Unit,
                    disc: Some(300),
                    span: Span::default(),
                },
            ],
            span: Span::default(),
        };
        assert_eq!(enum_discriminants(&decl), vec![5, 6, 300]);
        assert_eq!(disc_prim_for(300), "u16");
    }

    #[test]
    fn test_modal_niche() {
        let ctx = test_ctx();
        let path = p(&["m", "OptPtr"]);
        let decl = ctx.lookup_modal(&path).unwrap().clone();
        let plan = modal_plan(&ctx, &path, &decl).unwrap();
        match plan {
            AggPlan::Niche { layout, payload, empty } => {
                assert_eq!(layout, Layout::new(8, 8));
                assert_eq!(payload, 0);
                assert_eq!(empty, Some(1));
            }
            other => panic!("expected niche plan, got {:?}", other),
        }
    }

    #[test]
    fn test_union_plans() {
        let ctx = test_ctx();
        // One valid pointer plus unit: niche.
        let valid_ptr = Node::new(Ty::Ptr(prim("u8"), Some(PtrState::Valid)));
        let plan = union_plan(&ctx, &[valid_ptr.clone(), prim("()")]).unwrap();
        assert!(matches!(plan, AggPlan::Niche { .. }));
        assert_eq!(plan.layout(), Layout::new(8, 8));

        // Two data members: tagged.
        let plan = union_plan(&ctx, &[prim("i32"), prim("bool")]).unwrap();
        match plan {
            AggPlan::Tagged { layout, payload_offset, .. } => {
                assert_eq!(payload_offset, 4);
                assert_eq!(layout, Layout::new(8, 4));
            }
            other => panic!("expected tagged plan, got {:?}", other),
        }
    }
}
