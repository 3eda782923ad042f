// Runtime values. Integer values carry their type name, a 128-bit
// magnitude, and a sign flag; all arithmetic happens in 128-bit modular
// form and is then range-checked against the value's own type, so the
// same code path serves every width.

use crate::ast::{Path, PtrState, RangeKind, RawPtrQual, SeqState};
use crate::checks::PanicReason;
use crate::types::{in_range_int, int_bits, is_signed_int};


pub type Addr = usize;


#[derive(Clone, Debug, PartialEq)]
pub struct IntVal {
    pub ty: String,
    pub magnitude: u128,
    pub negative: bool,
}


#[derive(Clone, Debug, PartialEq)]
pub struct FloatVal {
    pub ty: String,
    pub value: f64,
}


#[derive(Clone, Debug, PartialEq)]
pub enum EnumPayload {
    Unit,
    Tuple(Vec<Value>),
    Record(Vec<(String, Value)>),
}


#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Unit,
    Bool(bool),
    Char(char),
    Int(IntVal),
    Float(FloatVal),
    Ptr { state: PtrState, addr: Addr },
    RawPtr { qual: RawPtrQual, addr: u64 },
    Tuple(Vec<Value>),
    Array(Vec<Value>),
    Record { path: Path, fields: Vec<(String, Value)> },
    Enum { path: Path, variant: String, payload: EnumPayload },
    Modal { path: Path, state: String, fields: Vec<(String, Value)> },
    Union { member: crate::ast::Node<crate::types::Ty>, value: Box<Value> },
    Dynamic { class_path: Path, addr: Addr, concrete: Option<Path> },
    Str { state: SeqState, bytes: Vec<u8> },
    Bytes { state: SeqState, bytes: Vec<u8> },
    Range { kind: RangeKind, lo: Option<u64>, hi: Option<u64> },
    Slice { base: Addr, start: u64, len: u64 },
    Region { target: usize },
    ProcRef(Path),
    RecordCtor(Path),
}


pub type OpResult = Result<Value, PanicReason>;


impl IntVal {
    pub fn new(ty: &str, magnitude: u128, negative: bool) -> IntVal {
        IntVal {
            ty: String::from(ty),
            magnitude,
            negative: negative && magnitude != 0,
        }
    }

    pub fn from_u64(ty: &str, value: u64) -> IntVal {
        IntVal::new(ty, value as u128, false)
    }

    pub fn usize_val(value: u64) -> IntVal {
        IntVal::from_u64("usize", value)
    }

    pub fn i32_val(value: i64) -> IntVal {
        IntVal::from_i128("i32", value as i128)
    }

    pub fn from_i128(ty: &str, value: i128) -> IntVal {
        if value < 0 {
            IntVal::new(ty, value.unsigned_abs(), true)
        } else {
            IntVal::new(ty, value as u128, false)
        }
    }

    pub fn bits(&self) -> u32 {
        int_bits(&self.ty).unwrap_or(64)
    }

    pub fn signed(&self) -> bool {
        is_signed_int(&self.ty)
    }

    // The value as a signed 128-bit quantity; the magnitude of i128::MIN
    // wraps correctly through wrapping_neg.
    pub fn as_i128(&self) -> i128 {
        if self.negative {
            (self.magnitude as i128).wrapping_neg()
        } else {
            self.magnitude as i128
        }
    }

    // Two's-complement bits truncated to the value's width.
    pub fn to_bits(&self) -> u128 {
        let bits = self.bits();
        let raw = self.as_i128() as u128;
        if bits == 128 {
            if self.signed() { raw } else { self.magnitude }
        } else {
            let mask = (1u128 << bits) - 1;
            (if self.signed() { raw } else { self.magnitude }) & mask
        }
    }

    pub fn from_bits(ty: &str, bits_val: u128) -> IntVal {
        let bits = int_bits(ty).unwrap_or(64);
        if is_signed_int(ty) {
            let value = sign_extend(bits_val, bits);
            IntVal::from_i128(ty, value)
        } else {
            let masked = if bits == 128 {
                bits_val
            } else {
                bits_val & ((1u128 << bits) - 1)
            };
            IntVal::new(ty, masked, false)
        }
    }

    fn in_range(&self, magnitude: u128, negative: bool) -> bool {
        in_range_int(magnitude, negative, &self.ty)
    }

    fn checked(&self, magnitude: u128, negative: bool) -> Result<IntVal, PanicReason> {
        let negative = negative && magnitude != 0;
        if self.in_range(magnitude, negative) {
            Ok(IntVal::new(&self.ty, magnitude, negative))
        } else {
            Err(PanicReason::Overflow)
        }
    }

    fn checked_i128(&self, value: i128) -> Result<IntVal, PanicReason> {
        if value < 0 {
            self.checked(value.unsigned_abs(), true)
        } else {
            self.checked(value as u128, false)
        }
    }

    pub fn is_zero(&self) -> bool {
        self.magnitude == 0
    }
}


pub fn sign_extend(bits_val: u128, width: u32) -> i128 {
    if width == 128 {
        return bits_val as i128;
    }
    let shift = 128 - width;
    ((bits_val << shift) as i128) >> shift
}


// 128-bit modular arithmetic followed by a range check against the
// operand type. Division refinements: zero divisors and signed MIN / -1.
pub fn int_binop(op: crate::ast::BinOp, a: &IntVal, b: &IntVal) -> OpResult {
    use crate::ast::BinOp::*;
    if a.ty != b.ty {
        return Err(PanicReason::Other);
    }
    let signed = a.signed();
    let result = match op {
        Add | Sub | Mul => {
            if signed {
                let (x, y) = (a.as_i128(), b.as_i128());
                let value = match op {
                    Add => x.wrapping_add(y),
                    Sub => x.wrapping_sub(y),
                    _   => x.wrapping_mul(y),
                };
                a.checked_i128(value)?
            } else {
                let (x, y) = (a.magnitude, b.magnitude);
                let value = match op {
                    Add => x.wrapping_add(y),
                    Sub => x.wrapping_sub(y),
                    _   => x.wrapping_mul(y),
                };
                a.checked(value, false)?
            }
        }
        Div | Rem => {
            if b.is_zero() {
                return Err(PanicReason::DivZero);
            }
            if signed {
                let (x, y) = (a.as_i128(), b.as_i128());
                // MIN / -1 and MIN % -1 overflow in every width.
                let width_min = if a.bits() == 128 {
                    i128::MIN
                } else {
                    -(1i128 << (a.bits() - 1))
                };
                if x == width_min && y == -1 {
                    return Err(PanicReason::Overflow);
                }
                let value = if op == Div { x.wrapping_div(y) } else { x.wrapping_rem(y) };
                a.checked_i128(value)?
            } else {
                let value = if op == Div {
                    a.magnitude / b.magnitude
                } else {
                    a.magnitude % b.magnitude
                };
                a.checked(value, false)?
            }
        }
        Shl | Shr => {
            let shift = if b.negative { u128::MAX } else { b.magnitude };
            if shift >= a.bits() as u128 {
                return Err(PanicReason::Shift);
            }
            let shift = shift as u32;
            // Shifts act on the unsigned bit pattern at the value's own
            // width: left-shift overflow masks away silently, and right
            // shift is logical, with the result reinterpreted at the
            // operand type.
            let pattern = a.to_bits();
            let value = if op == Shl {
                pattern.wrapping_shl(shift)
            } else {
                pattern >> shift
            };
            IntVal::from_bits(&a.ty, value)
        }
        BitAnd | BitOr | BitXor => {
            let (x, y) = (a.to_bits(), b.to_bits());
            let value = match op {
                BitAnd => x & y,
                BitOr  => x | y,
                _      => x ^ y,
            };
            IntVal::from_bits(&a.ty, value)
        }
        Lt  => return Ok(Value::Bool(int_lt(a, b))),
        Gt  => return Ok(Value::Bool(int_lt(b, a))),
        Lte => return Ok(Value::Bool(!int_lt(b, a))),
        Gte => return Ok(Value::Bool(!int_lt(a, b))),
        Eq  => return Ok(Value::Bool(int_eq(a, b))),
        Neq => return Ok(Value::Bool(!int_eq(a, b))),
        And | Or => return Err(PanicReason::Other),
    };
    Ok(Value::Int(result))
}


fn int_eq(a: &IntVal, b: &IntVal) -> bool {
    a.magnitude == b.magnitude && a.negative == b.negative
}


fn int_lt(a: &IntVal, b: &IntVal) -> bool {
    if a.signed() {
        a.as_i128() < b.as_i128()
    } else {
        a.magnitude < b.magnitude
    }
}


pub fn int_unop(op: crate::ast::UnOp, a: &IntVal) -> OpResult {
    use crate::ast::UnOp::*;
    match op {
        Neg => {
            if a.signed() {
                let value = a.checked(a.magnitude, !a.negative)?;
                Ok(Value::Int(value))
            } else if a.is_zero() {
                Ok(Value::Int(a.clone()))
            } else {
                Err(PanicReason::Overflow)
            }
        }
        Not => Ok(Value::Int(IntVal::from_bits(&a.ty, !a.to_bits()))),
    }
}


pub fn float_binop(op: crate::ast::BinOp, a: &FloatVal, b: &FloatVal) -> OpResult {
    use crate::ast::BinOp::*;
    if a.ty != b.ty {
        return Err(PanicReason::Other);
    }
    let (x, y) = (a.value, b.value);
    let arith = |v: f64| {
        Value::Float(FloatVal {
            ty: a.ty.clone(),
            value: round_to_width(&a.ty, v),
        })
    };
    match op {
        Add => Ok(arith(x + y)),
        Sub => Ok(arith(x - y)),
        Mul => Ok(arith(x * y)),
        Div => Ok(arith(x / y)),
        Rem => Ok(arith(x % y)),
        Lt  => Ok(Value::Bool(x < y)),
        Gt  => Ok(Value::Bool(x > y)),
        Lte => Ok(Value::Bool(x <= y)),
        Gte => Ok(Value::Bool(x >= y)),
        Eq  => Ok(Value::Bool(x == y)),
        Neq => Ok(Value::Bool(x != y)),
        _   => Err(PanicReason::Other),
    }
}


// Keep an f16/f32-typed value at its own precision after every step.
pub fn round_to_width(ty: &str, value: f64) -> f64 {
    match ty {
        "f32" => value as f32 as f64,
        "f16" => crate::encode::f16_bits_to_f64(crate::encode::f64_to_f16_bits(value)),
        _     => value,
    }
}


impl Value {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Unit          => "unit",
            Value::Bool(_)       => "bool",
            Value::Char(_)       => "char",
            Value::Int(_)        => "int",
            Value::Float(_)      => "float",
            Value::Ptr { .. }    => "ptr",
            Value::RawPtr { .. } => "rawptr",
            Value::Tuple(_)      => "tuple",
            Value::Array(_)      => "array",
            Value::Record { .. } => "record",
            Value::Enum { .. }   => "enum",
            Value::Modal { .. }  => "modal",
            Value::Union { .. }  => "union",
            Value::Dynamic { .. } => "dynamic",
            Value::Str { .. }    => "string",
            Value::Bytes { .. }  => "bytes",
            Value::Range { .. }  => "range",
            Value::Slice { .. }  => "slice",
            Value::Region { .. } => "region",
            Value::ProcRef(_)    => "proc",
            Value::RecordCtor(_) => "ctor",
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _              => None,
        }
    }

    pub fn as_int(&self) -> Option<&IntVal> {
        match self {
            Value::Int(i) => Some(i),
            _             => None,
        }
    }

    // Index value as usize, for bounds checks.
    pub fn index_value(&self) -> Option<u64> {
        match self {
            Value::Int(i) if !i.negative && i.magnitude <= u64::MAX as u128 => {
                Some(i.magnitude as u64)
            }
            _ => None,
        }
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Record { fields, .. } | Value::Modal { fields, .. } => fields
                .iter()
                .find(|(f, _)| f == name)
                .map(|(_, v)| v),
            _ => None,
        }
    }

    pub fn field_mut(&mut self, name: &str) -> Option<&mut Value> {
        match self {
            Value::Record { fields, .. } | Value::Modal { fields, .. } => fields
                .iter_mut()
                .find(|(f, _)| f == name)
                .map(|(_, v)| v),
            _ => None,
        }
    }
}
