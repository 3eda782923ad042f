// Constant encoding and bit-level validity. Everything here works over
// little-endian byte vectors laid out exactly as layout.rs dictates;
// padding bytes are always written as zero and checked as zero.

use crate::ast::{self, Node, PtrState, RangeKind, SeqState};
use crate::context::{Context, TypeDecl};
use crate::layout::*;
use crate::types::{parse_int_literal, strip_perm, Ty, TypeError};
use crate::value::{EnumPayload, Value};


#[derive(Clone, Debug, PartialEq)]
pub enum EncodeError {
    Unencodable,
    OutOfRange,
    SurrogateChar,
    NicheClash,
    WrongShape,
    Type(TypeError),
}


impl From<TypeError> for EncodeError {
    fn from(err: TypeError) -> EncodeError {
        EncodeError::Type(err)
    }
}


pub type Encoded = Result<Vec<u8>, EncodeError>;


// Half-precision conversion, round-to-nearest-even. Used for f16
// constants and to keep f16 arithmetic at its own precision.
pub fn f32_to_f16_bits(value: f32) -> u16 {
    let bits = value.to_bits();
    let sign = ((bits >> 16) & 0x8000) as u16;
    let exp = ((bits >> 23) & 0xFF) as i32;
    let frac = bits & 0x7F_FFFF;

    if exp == 0xFF {
        // Inf and NaN; keep a NaN payload bit.
        let frac16 = if frac != 0 { 0x200 } else { 0 };
        return sign | 0x7C00 | frac16;
    }
    let unbiased = exp - 127;
    if unbiased > 15 {
        return sign | 0x7C00;
    }
    if unbiased >= -14 {
        // Normal range; round the 13 dropped bits to nearest even.
        let mut frac16 = (frac >> 13) as u16;
        let mut exp16 = (unbiased + 15) as u16;
        let round = frac & 0x1FFF;
        if round > 0x1000 || (round == 0x1000 && frac16 & 1 == 1) {
            frac16 += 1;
            if frac16 == 0x400 {
                frac16 = 0;
                exp16 += 1;
                if exp16 >= 0x1F {
                    return sign | 0x7C00;
                }
            }
        }
        return sign | (exp16 << 10) | frac16;
    }
    if unbiased >= -25 {
        // Subnormal half.
        let full = frac | 0x80_0000;
        let shift = (-unbiased - 1) as u32; // 14..24
        let mut frac16 = (full >> (shift + 10 - 1 + 1)) as u16;
        let dropped_bits = shift + 10;
        let dropped = full & ((1 << dropped_bits) - 1);
        let half = 1u32 << (dropped_bits - 1);
        if dropped > half || (dropped == half && frac16 & 1 == 1) {
            frac16 += 1;
        }
        return sign | frac16;
    }
    sign
}


pub fn f16_bits_to_f32(bits: u16) -> f32 {
    let sign = ((bits & 0x8000) as u32) << 16;
    let exp = ((bits >> 10) & 0x1F) as u32;
    let frac = (bits & 0x3FF) as u32;
    let out = if exp == 0 {
        if frac == 0 {
            sign
        } else {
            // Normalise the subnormal.
            let mut exp32 = 127 - 15 + 1;
            let mut frac32 = frac;
            while frac32 & 0x400 == 0 {
                frac32 <<= 1;
                exp32 -= 1;
            }
            sign | ((exp32 as u32) << 23) | ((frac32 & 0x3FF) << 13)
        }
    } else if exp == 0x1F {
        sign | 0x7F80_0000 | (frac << 13)
    } else {
        sign | ((exp + 127 - 15) << 23) | (frac << 13)
    };
    f32::from_bits(out)
}


pub fn f64_to_f16_bits(value: f64) -> u16 {
    f32_to_f16_bits(value as f32)
}


pub fn f16_bits_to_f64(bits: u16) -> f64 {
    f16_bits_to_f32(bits) as f64
}


fn le_bytes(value: u128, size: usize) -> Vec<u8> {
    value.to_le_bytes()[..size].to_vec()
}


fn read_le(bytes: &[u8]) -> u128 {
    let mut buf = [0u8; 16];
    buf[..bytes.len().min(16)].copy_from_slice(&bytes[..bytes.len().min(16)]);
    u128::from_le_bytes(buf)
}


// A char is a Unicode scalar: surrogates are not encodable.
pub fn encode_char(scalar: u32) -> Result<Vec<u8>, EncodeError> {
    if (0xD800..=0xDFFF).contains(&scalar) {
        return Err(EncodeError::SurrogateChar);
    }
    if scalar > 0x10_FFFF {
        return Err(EncodeError::OutOfRange);
    }
    Ok(scalar.to_le_bytes().to_vec())
}


// Little-endian bit pattern of a compile-time literal at a given type.
pub fn encode_const(ty: &Node<Ty>, lit: &ast::Literal) -> Encoded {
    let stripped = strip_perm(ty);
    match (&*stripped, lit) {
        (Ty::Prim(name), ast::Literal::Bool(b)) if name == "bool" => {
            Ok(vec![if *b { 1 } else { 0 }])
        }
        (Ty::Prim(name), ast::Literal::Char(c)) if name == "char" => encode_char(*c as u32),
        (Ty::Prim(name), ast::Literal::Unit) if name == "()" => Ok(vec![]),
        (Ty::Prim(name), ast::Literal::Int(text, _)) if crate::types::is_int_prim(name) => {
            let size = prim_layout(name).ok_or(EncodeError::Unencodable)?.size;
            let value = parse_int_literal(text)?;
            if !crate::types::in_range_int(value, false, name) {
                return Err(EncodeError::OutOfRange);
            }
            Ok(le_bytes(value, size as usize))
        }
        (Ty::Prim(name), ast::Literal::Float(text, _)) => {
            let value: f64 = text.parse().map_err(|_| EncodeError::Unencodable)?;
            match name.as_str() {
                "f64" => Ok(value.to_bits().to_le_bytes().to_vec()),
                "f32" => Ok((value as f32).to_bits().to_le_bytes().to_vec()),
                "f16" => Ok(f64_to_f16_bits(value).to_le_bytes().to_vec()),
                _     => Err(EncodeError::Unencodable),
            }
        }
        (Ty::Prim(name), _) if name == "!" => Err(EncodeError::Unencodable),
        (Ty::RawPtr(_, _), ast::Literal::Null) => Ok(vec![0; 8]),
        _ => Err(EncodeError::Unencodable),
    }
}


fn zero_padded(size: u64) -> Vec<u8> {
    vec![0; size as usize]
}


fn write_at(buf: &mut [u8], offset: u64, bytes: &[u8]) {
    let offset = offset as usize;
    buf[offset..offset + bytes.len()].copy_from_slice(bytes);
}


// Serialise a runtime value into the canonical byte layout for a type.
pub fn value_bits(ctx: &Context, ty: &Node<Ty>, value: &Value) -> Encoded {
    let stripped = strip_perm(ty);
    match (&*stripped, value) {
        (Ty::Prim(name), Value::Bool(b)) if name == "bool" => Ok(vec![if *b { 1 } else { 0 }]),
        (Ty::Prim(name), Value::Char(c)) if name == "char" => encode_char(*c as u32),
        (Ty::Prim(name), Value::Unit) if name == "()" => Ok(vec![]),
        (Ty::Prim(name), Value::Int(i)) if crate::types::is_int_prim(name) => {
            let size = prim_layout(name).ok_or(EncodeError::Unencodable)?.size;
            Ok(le_bytes(i.to_bits(), size as usize))
        }
        (Ty::Prim(name), Value::Float(f)) => match name.as_str() {
            "f64" => Ok(f.value.to_bits().to_le_bytes().to_vec()),
            "f32" => Ok((f.value as f32).to_bits().to_le_bytes().to_vec()),
            "f16" => Ok(f64_to_f16_bits(f.value).to_le_bytes().to_vec()),
            _     => Err(EncodeError::Unencodable),
        },
        (Ty::Ptr(_, _), Value::Ptr { addr, .. }) => Ok((*addr as u64).to_le_bytes().to_vec()),
        (Ty::RawPtr(_, _), Value::RawPtr { addr, .. }) => Ok(addr.to_le_bytes().to_vec()),
        (Ty::Func(_, _), Value::ProcRef(_)) => Ok(vec![0; 8]),
        (Ty::Tuple(items), Value::Tuple(values)) => {
            if items.len() != values.len() {
                return Err(EncodeError::WrongShape);
            }
            encode_fields(ctx, items, values)
        }
        (Ty::Array(elem, n), Value::Array(values)) => {
            if values.len() as u64 != *n {
                return Err(EncodeError::WrongShape);
            }
            let elem_layout = layout_of(ctx, elem)?;
            let mut buf = zero_padded(elem_layout.size * n);
            for (i, v) in values.iter().enumerate() {
                let bytes = value_bits(ctx, elem, v)?;
                write_at(&mut buf, i as u64 * elem_layout.size, &bytes);
            }
            Ok(buf)
        }
        (Ty::Named(path, _), _) => named_value_bits(ctx, path, value),
        (Ty::ModalState(path, _, _), _) => named_value_bits(ctx, path, value),
        (Ty::Union(members), Value::Union { member, value }) => {
            let plan = union_plan(ctx, members)?;
            let index = members
                .iter()
                .position(|m| crate::types::type_equiv(m, member))
                .ok_or(EncodeError::WrongShape)?;
            match plan {
                AggPlan::Niche { layout, payload, empty } => {
                    if Some(index) == empty {
                        return Ok(zero_padded(layout.size));
                    }
                    if index != payload {
                        return Err(EncodeError::WrongShape);
                    }
                    let bytes = value_bits(ctx, &members[payload], value)?;
                    if bytes.iter().all(|&b| b == 0) {
                        return Err(EncodeError::NicheClash);
                    }
                    Ok(bytes)
                }
                AggPlan::Tagged { layout, disc_prim, payload_offset, discs, .. } => {
                    let disc_size = prim_layout(disc_prim).unwrap().size;
                    let mut buf = zero_padded(layout.size);
                    write_at(&mut buf, 0, &le_bytes(discs[index] as u128, disc_size as usize));
                    let bytes = value_bits(ctx, &members[index], value)?;
                    write_at(&mut buf, payload_offset, &bytes);
                    Ok(buf)
                }
            }
        }
        (Ty::Str(_), Value::Str { state, bytes })
        | (Ty::Bytes(_), Value::Bytes { state, bytes }) => {
            seq_value_bits(&stripped, *state, bytes.len() as u64)
        }
        (Ty::Slice(_), Value::Slice { base, start, len }) => {
            let mut buf = Vec::with_capacity(16);
            buf.extend_from_slice(&(*base as u64 + start).to_le_bytes());
            buf.extend_from_slice(&len.to_le_bytes());
            Ok(buf)
        }
        (Ty::Dynamic(_), Value::Dynamic { addr, .. }) => {
            let mut buf = Vec::with_capacity(16);
            buf.extend_from_slice(&(*addr as u64).to_le_bytes());
            buf.extend_from_slice(&0u64.to_le_bytes());
            Ok(buf)
        }
        (Ty::Range, Value::Range { kind, lo, hi }) => {
            let mut buf = zero_padded(24);
            buf[0] = match kind {
                RangeKind::Exclusive => 0,
                RangeKind::Inclusive => 1,
            };
            write_at(&mut buf, 8, &lo.unwrap_or(0).to_le_bytes());
            write_at(&mut buf, 16, &hi.unwrap_or(0).to_le_bytes());
            Ok(buf)
        }
        _ => Err(EncodeError::WrongShape),
    }
}


// {ptr, len} / {ptr, len, cap} with a synthetic null data pointer; the
// reference evaluator keeps string payloads out of line.
fn seq_value_bits(ty: &Ty, state: SeqState, len: u64) -> Encoded {
    let body = |cap: bool| {
        let mut buf = Vec::new();
        buf.extend_from_slice(&0u64.to_le_bytes());
        buf.extend_from_slice(&len.to_le_bytes());
        if cap {
            buf.extend_from_slice(&len.to_le_bytes());
        }
        buf
    };
    let declared = match ty {
        Ty::Str(s) | Ty::Bytes(s) => *s,
        _                         => return Err(EncodeError::WrongShape),
    };
    match declared {
        Some(SeqState::Managed) => {
            if state != SeqState::Managed {
                return Err(EncodeError::WrongShape);
            }
            Ok(body(true))
        }
        Some(SeqState::View) => {
            if state != SeqState::View {
                return Err(EncodeError::WrongShape);
            }
            Ok(body(false))
        }
        None => {
            let mut buf = zero_padded(32);
            match state {
                SeqState::Managed => {
                    buf[0] = 0;
                    write_at(&mut buf, 8, &body(true));
                }
                SeqState::View => {
                    buf[0] = 1;
                    write_at(&mut buf, 8, &body(false));
                }
            }
            Ok(buf)
        }
    }
}


fn encode_fields(ctx: &Context, tys: &[Node<Ty>], values: &[Value]) -> Encoded {
    let mut layouts = Vec::with_capacity(tys.len());
    for ty in tys {
        layouts.push(layout_of(ctx, ty)?);
    }
    let (layout, offsets) = record_layout_of(&layouts);
    let mut buf = zero_padded(layout.size);
    for ((ty, value), offset) in tys.iter().zip(values).zip(&offsets) {
        let bytes = value_bits(ctx, ty, value)?;
        write_at(&mut buf, *offset, &bytes);
    }
    Ok(buf)
}


fn named_value_bits(ctx: &Context, path: &[String], value: &Value) -> Encoded {
    match (ctx.lookup_type(path).cloned(), value) {
        (Some(TypeDecl::Record(decl)), Value::Record { fields, .. }) => {
            let tys = record_field_tys(ctx, path, &decl)?;
            let mut ordered = Vec::with_capacity(decl.fields.len());
            for field in &decl.fields {
                let v = fields
                    .iter()
                    .find(|(name, _)| name == &field.name)
                    .map(|(_, v)| v.clone())
                    .ok_or(EncodeError::WrongShape)?;
                ordered.push(v);
            }
            encode_fields(ctx, &tys, &ordered)
        }
        (Some(TypeDecl::Enum(decl)), Value::Enum { variant, payload, .. }) => {
            let plan = enum_plan(ctx, path, &decl)?;
            let index = decl
                .variants
                .iter()
                .position(|v| &v.name == variant)
                .ok_or(EncodeError::WrongShape)?;
            let tys = variant_payload_tys(ctx, path, &decl.variants[index])?;
            let values = match payload {
                EnumPayload::Unit => vec![],
                EnumPayload::Tuple(vs) => vs.clone(),
                EnumPayload::Record(fs) => fs.iter().map(|(_, v)| v.clone()).collect(),
            };
            let payload_bytes = encode_fields(ctx, &tys, &values)?;
            match plan {
                AggPlan::Tagged { layout, disc_prim, payload_offset, discs, .. } => {
                    let disc_size = prim_layout(disc_prim).unwrap().size;
                    let mut buf = zero_padded(layout.size);
                    write_at(&mut buf, 0, &le_bytes(discs[index] as u128, disc_size as usize));
                    write_at(&mut buf, payload_offset, &payload_bytes);
                    Ok(buf)
                }
                AggPlan::Niche { .. } => Err(EncodeError::Unencodable),
            }
        }
        (Some(TypeDecl::Modal(decl)), Value::Modal { state, fields, .. }) => {
            let plan = modal_plan(ctx, path, &decl)?;
            let index = decl
                .states
                .iter()
                .position(|s| &s.name == state)
                .ok_or(EncodeError::WrongShape)?;
            match plan {
                AggPlan::Niche { layout, payload, empty } => {
                    if Some(index) == empty {
                        return Ok(zero_padded(layout.size));
                    }
                    if index != payload {
                        return Err(EncodeError::WrongShape);
                    }
                    let block = &decl.states[payload];
                    let tys = state_field_tys(ctx, path, block)?;
                    let value = fields
                        .first()
                        .map(|(_, v)| v.clone())
                        .ok_or(EncodeError::WrongShape)?;
                    let bytes = value_bits(ctx, &tys[0], &value)?;
                    // The zero pattern belongs to the empty state.
                    if bytes.iter().all(|&b| b == 0) {
                        return Err(EncodeError::NicheClash);
                    }
                    Ok(bytes)
                }
                AggPlan::Tagged { layout, disc_prim, payload_offset, discs, .. } => {
                    let block = &decl.states[index];
                    let tys = state_field_tys(ctx, path, block)?;
                    let mut ordered = Vec::with_capacity(block.fields.len());
                    for field in &block.fields {
                        let v = fields
                            .iter()
                            .find(|(name, _)| name == &field.name)
                            .map(|(_, v)| v.clone())
                            .ok_or(EncodeError::WrongShape)?;
                        ordered.push(v);
                    }
                    let payload_bytes = encode_fields(ctx, &tys, &ordered)?;
                    let disc_size = prim_layout(disc_prim).unwrap().size;
                    let mut buf = zero_padded(layout.size);
                    write_at(&mut buf, 0, &le_bytes(discs[index] as u128, disc_size as usize));
                    write_at(&mut buf, payload_offset, &payload_bytes);
                    Ok(buf)
                }
            }
        }
        _ => Err(EncodeError::WrongShape),
    }
}


// Rebuild a value from canonical bytes. Partial by design: only shapes
// a transmute can legally produce are decodable; callers check
// valid_value first.
pub fn decode_value(ctx: &Context, ty: &Node<Ty>, bits: &[u8]) -> Option<Value> {
    let stripped = strip_perm(ty);
    let layout = layout_of(ctx, &stripped).ok()?;
    if bits.len() as u64 != layout.size {
        return None;
    }
    match &*stripped {
        Ty::Prim(name) => match name.as_str() {
            "bool" => Some(Value::Bool(bits[0] == 1)),
            "char" => char::from_u32(read_le(bits) as u32).map(Value::Char),
            "()"   => Some(Value::Unit),
            "f64"  => Some(Value::Float(crate::value::FloatVal {
                ty: String::from("f64"),
                value: f64::from_bits(read_le(bits) as u64),
            })),
            "f32"  => Some(Value::Float(crate::value::FloatVal {
                ty: String::from("f32"),
                value: f32::from_bits(read_le(bits) as u32) as f64,
            })),
            "f16"  => Some(Value::Float(crate::value::FloatVal {
                ty: String::from("f16"),
                value: f16_bits_to_f64(read_le(bits) as u16),
            })),
            name if crate::types::is_int_prim(name) => Some(Value::Int(
                crate::value::IntVal::from_bits(name, read_le(bits)),
            )),
            _ => None,
        },
        Ty::Ptr(_, state) => {
            let addr = read_le(bits) as u64 as usize;
            let state = match state {
                Some(s) => *s,
                None if addr == 0 => PtrState::Null,
                None => PtrState::Valid,
            };
            Some(Value::Ptr { state, addr })
        }
        Ty::RawPtr(qual, _) => Some(Value::RawPtr {
            qual: *qual,
            addr: read_le(bits) as u64,
        }),
        Ty::Tuple(items) => {
            let mut layouts = Vec::with_capacity(items.len());
            for item in items {
                layouts.push(layout_of(ctx, item).ok()?);
            }
            let (_, offsets) = record_layout_of(&layouts);
            let mut out = Vec::with_capacity(items.len());
            for ((item, layout), offset) in items.iter().zip(&layouts).zip(&offsets) {
                let start = *offset as usize;
                out.push(decode_value(ctx, item, &bits[start..start + layout.size as usize])?);
            }
            Some(Value::Tuple(out))
        }
        Ty::Array(elem, n) => {
            let elem_layout = layout_of(ctx, elem).ok()?;
            let mut out = Vec::with_capacity(*n as usize);
            for i in 0..*n {
                let start = (i * elem_layout.size) as usize;
                out.push(decode_value(
                    ctx,
                    elem,
                    &bits[start..start + elem_layout.size as usize],
                )?);
            }
            Some(Value::Array(out))
        }
        Ty::Range => {
            let kind = match bits[0] {
                0 => crate::ast::RangeKind::Exclusive,
                1 => crate::ast::RangeKind::Inclusive,
                _ => return None,
            };
            let lo = read_le(&bits[8..16]) as u64;
            let hi = read_le(&bits[16..24]) as u64;
            Some(Value::Range {
                kind,
                lo: Some(lo),
                hi: Some(hi),
            })
        }
        Ty::Named(path, _) | Ty::ModalState(path, _, _) => match ctx.lookup_type(path).cloned() {
            Some(TypeDecl::Record(decl)) => {
                let tys = record_field_tys(ctx, path, &decl).ok()?;
                let mut layouts = Vec::with_capacity(tys.len());
                for ty in &tys {
                    layouts.push(layout_of(ctx, ty).ok()?);
                }
                let (_, offsets) = record_layout_of(&layouts);
                let mut fields = Vec::with_capacity(tys.len());
                for (((ty, layout), offset), field) in
                    tys.iter().zip(&layouts).zip(&offsets).zip(&decl.fields)
                {
                    let start = *offset as usize;
                    let value =
                        decode_value(ctx, ty, &bits[start..start + layout.size as usize])?;
                    fields.push((field.name.clone(), value));
                }
                Some(Value::Record { path: path.clone(), fields })
            }
            Some(TypeDecl::Modal(decl)) => match modal_plan(ctx, path, &decl).ok()? {
                AggPlan::Niche { payload, empty, .. } => {
                    if bits.iter().all(|&b| b == 0) {
                        let state = &decl.states[empty?];
                        return Some(Value::Modal {
                            path: path.clone(),
                            state: state.name.clone(),
                            fields: vec![],
                        });
                    }
                    let block = &decl.states[payload];
                    let tys = state_field_tys(ctx, path, block).ok()?;
                    let value = decode_value(ctx, &tys[0], bits)?;
                    Some(Value::Modal {
                        path: path.clone(),
                        state: block.name.clone(),
                        fields: vec![(block.fields[0].name.clone(), value)],
                    })
                }
                AggPlan::Tagged { .. } => None,
            },
            _ => None,
        },
        _ => None,
    }
}


// Bit-level validity of a byte pattern at a type; drives transmute and
// static-initialisation checks.
pub fn valid_value(ctx: &Context, ty: &Node<Ty>, bits: &[u8]) -> bool {
    let stripped = strip_perm(ty);
    let layout = match layout_of(ctx, &stripped) {
        Ok(l)  => l,
        Err(_) => return false,
    };
    if bits.len() as u64 != layout.size {
        return false;
    }
    match &*stripped {
        Ty::Prim(name) => match name.as_str() {
            "bool" => bits[0] <= 1,
            "char" => {
                let scalar = read_le(bits) as u32;
                !(0xD800..=0xDFFF).contains(&scalar) && scalar <= 0x10_FFFF
            }
            "!" => false,
            _   => true,
        },
        Ty::Ptr(_, state) => match state {
            Some(PtrState::Valid) => bits.iter().any(|&b| b != 0),
            Some(PtrState::Null)  => bits.iter().all(|&b| b == 0),
            _                     => true,
        },
        Ty::RawPtr(_, _) | Ty::Func(_, _) | Ty::Slice(_) | Ty::Dynamic(_) => true,
        Ty::Range => {
            // {kind: u8, pad x7, lo, hi}: padding must be zero.
            bits[0] <= 1 && bits[1..8].iter().all(|&b| b == 0)
        }
        Ty::Str(state) | Ty::Bytes(state) => match state {
            Some(_) => true,
            None => {
                if bits[0] > 1 || bits[1..8].iter().any(|&b| b != 0) {
                    return false;
                }
                // The view alternative leaves the cap word as padding.
                if bits[0] == 1 {
                    bits[24..32].iter().all(|&b| b == 0)
                } else {
                    true
                }
            }
        },
        Ty::Tuple(items) => fields_valid(ctx, items, bits),
        Ty::Array(elem, n) => {
            let elem_layout = match layout_of(ctx, elem) {
                Ok(l)  => l,
                Err(_) => return false,
            };
            (0..*n).all(|i| {
                let start = (i * elem_layout.size) as usize;
                valid_value(ctx, elem, &bits[start..start + elem_layout.size as usize])
            })
        }
        Ty::Union(members) => {
            let plan = match union_plan(ctx, members) {
                Ok(p)  => p,
                Err(_) => return false,
            };
            match plan {
                AggPlan::Niche { payload, .. } => {
                    bits.iter().all(|&b| b == 0)
                        || valid_value(ctx, &members[payload], bits)
                }
                AggPlan::Tagged { disc_prim, payload_offset, discs, .. } => {
                    let disc_size = prim_layout(disc_prim).unwrap().size as usize;
                    let disc = read_le(&bits[..disc_size]) as u64;
                    let index = match discs.iter().position(|&d| d == disc) {
                        Some(i) => i,
                        None    => return false,
                    };
                    tagged_payload_valid(ctx, &members[index], bits, disc_size, payload_offset)
                }
            }
        }
        Ty::Refine(base, _) => valid_value(ctx, base, bits),
        Ty::Opaque(_) => true,
        Ty::Named(path, _) | Ty::ModalState(path, _, _) => {
            named_valid(ctx, path, bits)
        }
        Ty::Perm(_, _) => unreachable!("stripped above"),
    }
}


fn fields_valid(ctx: &Context, tys: &[Node<Ty>], bits: &[u8]) -> bool {
    let mut layouts = Vec::with_capacity(tys.len());
    for ty in tys {
        match layout_of(ctx, ty) {
            Ok(l)  => layouts.push(l),
            Err(_) => return false,
        }
    }
    let (_, offsets) = record_layout_of(&layouts);
    let mut covered = vec![false; bits.len()];
    for ((ty, layout), offset) in tys.iter().zip(&layouts).zip(&offsets) {
        let start = *offset as usize;
        let end = start + layout.size as usize;
        if !valid_value(ctx, ty, &bits[start..end]) {
            return false;
        }
        for flag in covered[start..end].iter_mut() {
            *flag = true;
        }
    }
    // Padding bytes must be zero.
    bits.iter()
        .zip(&covered)
        .all(|(&b, &c)| c || b == 0)
}


fn tagged_payload_valid(
    ctx: &Context,
    payload_ty: &Node<Ty>,
    bits: &[u8],
    disc_size: usize,
    payload_offset: u64,
) -> bool {
    let payload_layout = match layout_of(ctx, payload_ty) {
        Ok(l)  => l,
        Err(_) => return false,
    };
    let start = payload_offset as usize;
    let end = start + payload_layout.size as usize;
    if end > bits.len() {
        return false;
    }
    if !valid_value(ctx, payload_ty, &bits[start..end]) {
        return false;
    }
    // Bytes outside disc and payload are padding.
    bits.iter().enumerate().all(|(i, &b)| {
        i < disc_size || (i >= start && i < end) || b == 0
    })
}


fn named_valid(ctx: &Context, path: &[String], bits: &[u8]) -> bool {
    match ctx.lookup_type(path).cloned() {
        Some(TypeDecl::Record(decl)) => match record_field_tys(ctx, path, &decl) {
            Ok(tys) => fields_valid(ctx, &tys, bits),
            Err(_)  => false,
        },
        Some(TypeDecl::Enum(decl)) => {
            let plan = match enum_plan(ctx, path, &decl) {
                Ok(p)  => p,
                Err(_) => return false,
            };
            match plan {
                AggPlan::Tagged { disc_prim, payload_offset, discs, .. } => {
                    let disc_size = prim_layout(disc_prim).unwrap().size as usize;
                    let disc = read_le(&bits[..disc_size]) as u64;
                    let index = match discs.iter().position(|&d| d == disc) {
                        Some(i) => i,
                        None    => return false,
                    };
                    let tys = match variant_payload_tys(ctx, path, &decl.variants[index]) {
                        Ok(tys) => tys,
                        Err(_)  => return false,
                    };
                    let payload_bits = &bits[payload_offset as usize..];
                    let mut layouts = Vec::new();
                    for ty in &tys {
                        match layout_of(ctx, ty) {
                            Ok(l)  => layouts.push(l),
                            Err(_) => return false,
                        }
                    }
                    let (payload_layout, _) = record_layout_of(&layouts);
                    if !fields_valid(ctx, &tys, &payload_bits[..payload_layout.size as usize]) {
                        return false;
                    }
                    bits.iter().enumerate().all(|(i, &b)| {
                        i < disc_size
                            || (i >= payload_offset as usize
                                && i < payload_offset as usize + payload_layout.size as usize)
                            || b == 0
                    })
                }
                AggPlan::Niche { .. } => false,
            }
        }
        Some(TypeDecl::Modal(decl)) => {
            let plan = match modal_plan(ctx, path, &decl) {
                Ok(p)  => p,
                Err(_) => return false,
            };
            match plan {
                AggPlan::Niche { payload, empty, .. } => {
                    if bits.iter().all(|&b| b == 0) {
                        return empty.is_some();
                    }
                    let tys = match state_field_tys(ctx, path, &decl.states[payload]) {
                        Ok(tys) => tys,
                        Err(_)  => return false,
                    };
                    valid_value(ctx, &tys[0], bits)
                }
                AggPlan::Tagged { disc_prim, payload_offset, discs, .. } => {
                    let disc_size = prim_layout(disc_prim).unwrap().size as usize;
                    let disc = read_le(&bits[..disc_size]) as u64;
                    let index = match discs.iter().position(|&d| d == disc) {
                        Some(i) => i,
                        None    => return false,
                    };
                    let tys = match state_field_tys(ctx, path, &decl.states[index]) {
                        Ok(tys) => tys,
                        Err(_)  => return false,
                    };
                    let mut layouts = Vec::new();
                    for ty in &tys {
                        match layout_of(ctx, ty) {
                            Ok(l)  => layouts.push(l),
                            Err(_) => return false,
                        }
                    }
                    let (payload_layout, _) = record_layout_of(&layouts);
                    let start = payload_offset as usize;
                    let end = start + payload_layout.size as usize;
                    if !fields_valid(ctx, &tys, &bits[start..end]) {
                        return false;
                    }
                    bits.iter().enumerate().all(|(i, &b)| {
                        i < disc_size || (i >= start && i < end) || b == 0
                    })
                }
            }
        }
        _ => false,
    }
}
