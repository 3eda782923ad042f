// Value-level pattern matching. Returns the bindings a successful match
// introduces, or None on a clean mismatch; type errors cannot happen
// here because patterns were checked before evaluation.

use crate::ast::{Literal, Pattern};
use crate::resolve::pat_names;
use crate::types::parse_int_literal;
use crate::value::Value;


pub type BindEnv = Vec<(String, Value)>;


pub fn match_pattern(pattern: &Pattern, value: &Value) -> Option<BindEnv> {
    let mut env = BindEnv::new();
    if match_into(pattern, value, &mut env) {
        Some(env)
    } else {
        None
    }
}


fn match_into(pattern: &Pattern, value: &Value, env: &mut BindEnv) -> bool {
    match pattern {
        Pattern::Wildcard => true,

        Pattern::Ident(name) => {
            env.push((name.clone(), value.clone()));
            true
        }

        Pattern::Lit(lit) => literal_matches(lit, value),

        Pattern::Typed(name, ty) => match value {
            Value::Union { member, value } => {
                if let Ok(want) = syntactic_equiv_probe(ty, member) {
                    if want {
                        env.push((name.clone(), (**value).clone()));
                        return true;
                    }
                }
                false
            }
            _ => false,
        },

        Pattern::Tuple(items) if items.is_empty() => matches!(value, Value::Unit),

        Pattern::Tuple(items) => match value {
            Value::Tuple(values) if values.len() == items.len() => items
                .iter()
                .zip(values)
                .all(|(p, v)| match_into(p, v, env)),
            _ => false,
        },

        Pattern::Record(_, fields) => match value {
            Value::Record { fields: have, .. } => fields.iter().all(|f| {
                match have.iter().find(|(name, _)| name == &f.name) {
                    Some((_, v)) => match_into(&f.pattern, v, env),
                    None         => false,
                }
            }),
            _ => false,
        },

        Pattern::EnumTuple(_, variant, items) => match value {
            Value::Enum { variant: have, payload, .. } if have == variant => match payload {
                crate::value::EnumPayload::Tuple(values) if values.len() == items.len() => {
                    items.iter().zip(values).all(|(p, v)| match_into(p, v, env))
                }
                crate::value::EnumPayload::Unit if items.is_empty() => true,
                _ => false,
            },
            _ => false,
        },

        Pattern::EnumRecord(_, variant, fields) => match value {
            Value::Enum { variant: have, payload, .. } if have == variant => match payload {
                crate::value::EnumPayload::Record(values) => fields.iter().all(|f| {
                    match values.iter().find(|(name, _)| name == &f.name) {
                        Some((_, v)) => match_into(&f.pattern, v, env),
                        None         => false,
                    }
                }),
                _ => false,
            },
            _ => false,
        },

        Pattern::Modal(state, fields) => match value {
            Value::Modal { state: have, fields: values, .. } if have == state => {
                fields.iter().all(|f| {
                    match values.iter().find(|(name, _)| name == &f.name) {
                        Some((_, v)) => match_into(&f.pattern, v, env),
                        None         => false,
                    }
                })
            }
            _ => false,
        },

        Pattern::Range(lo, hi, inclusive) => match value {
            Value::Int(i) if !i.negative => {
                let lo = match int_endpoint(lo) {
                    Some(v) => v,
                    None    => return false,
                };
                let hi = match int_endpoint(hi) {
                    Some(v) => v,
                    None    => return false,
                };
                let v = i.magnitude;
                v >= lo && if *inclusive { v <= hi } else { v < hi }
            }
            _ => false,
        },
    }
}


fn int_endpoint(lit: &Literal) -> Option<u128> {
    match lit {
        Literal::Int(text, _) => parse_int_literal(text).ok(),
        _                     => None,
    }
}


fn literal_matches(lit: &Literal, value: &Value) -> bool {
    match (lit, value) {
        (Literal::Unit, Value::Unit) => true,
        (Literal::Bool(a), Value::Bool(b)) => a == b,
        (Literal::Char(a), Value::Char(b)) => a == b,
        (Literal::Str(a), Value::Str { bytes, .. }) => a.as_bytes() == &bytes[..],
        (Literal::Int(text, _), Value::Int(i)) => {
            match parse_int_literal(text) {
                Ok(v) => !i.negative && i.magnitude == v,
                Err(_) => false,
            }
        }
        (Literal::Float(text, _), Value::Float(f)) => {
            text.parse::<f64>().map(|v| v == f.value).unwrap_or(false)
        }
        (Literal::Null, Value::RawPtr { addr, .. }) => *addr == 0,
        _ => false,
    }
}


// Typed patterns compare their written type against the union member the
// value carries. Only shallow spellings reach runtime (the checker
// already proved membership), so a structural probe suffices.
fn syntactic_equiv_probe(
    ty: &crate::ast::Type,
    member: &crate::ast::Node<crate::types::Ty>,
) -> Result<bool, ()> {
    use crate::ast::Type as S;
    use crate::types::Ty as T;
    match (ty, &**member) {
        (S::Prim(a), T::Prim(b)) => Ok(a == b),
        (S::Str(a), T::Str(b)) => Ok(a == b),
        (S::Bytes(a), T::Bytes(b)) => Ok(a == b),
        (S::Range, T::Range) => Ok(true),
        (S::Named(path, _), T::Named(full, _)) => {
            Ok(path.len() <= full.len() && full[full.len() - path.len()..] == path[..])
        }
        (S::Tuple(xs), T::Tuple(ys)) => {
            if xs.len() != ys.len() {
                return Ok(false);
            }
            for (x, y) in xs.iter().zip(ys) {
                if !syntactic_equiv_probe(x, y)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        _ => Ok(false),
    }
}


// Fix the binding insertion order to the textual order of the binders,
// which in turn fixes drop order at scope exit.
pub fn bind_order(pattern: &Pattern, env: BindEnv) -> BindEnv {
    let order = pat_names(pattern);
    let mut out = BindEnv::with_capacity(env.len());
    for name in order {
        if let Some(pos) = env.iter().position(|(n, _)| n == &name) {
            out.push(env[pos].clone());
        }
    }
    // Anything the order list missed keeps its match position.
    for (name, value) in env {
        if !out.iter().any(|(n, _)| n == &name) {
            out.push((name, value));
        }
    }
    out
}
