//! Arithmetic operators.
//!
//! Integer arithmetic stays in `i64` while it fits; overflow promotes to
//! `f64`. Zero-arity applications return the operator's identity (`+`→0,
//! `*`→1, `-`→0, `/`→1, `min`→+∞, `max`→−∞); unary `-` negates and unary `/`
//! reciprocates.

use crate::{
    builtins::CallCtx,
    error::{Error, RunResult},
    value::Value,
};

/// Extracts a numeric argument or raises *TypeError* naming the operator.
fn number(op: &str, value: &Value) -> RunResult<f64> {
    value
        .as_number()
        .ok_or_else(|| Error::type_error(format!("{op}: expected number, got {}", value.type_name())))
}

/// Wraps a float back into `Int` when it is exactly representable and the
/// inputs were all integers.
fn all_ints(args: &[Value]) -> bool {
    args.iter().all(|v| matches!(v, Value::Int(_)))
}

pub(super) fn add(_ctx: &mut dyn CallCtx, args: &[Value]) -> RunResult<Value> {
    if all_ints(args) {
        let mut acc: i64 = 0;
        let mut overflowed = false;
        for arg in args {
            let Value::Int(i) = arg else { unreachable!() };
            match acc.checked_add(*i) {
                Some(next) => acc = next,
                None => {
                    overflowed = true;
                    break;
                }
            }
        }
        if !overflowed {
            return Ok(Value::Int(acc));
        }
    }
    let mut acc = 0.0;
    for arg in args {
        acc += number("+", arg)?;
    }
    Ok(Value::Float(acc))
}

pub(super) fn sub(_ctx: &mut dyn CallCtx, args: &[Value]) -> RunResult<Value> {
    match args {
        [] => Ok(Value::Int(0)),
        [only] => match only {
            Value::Int(i) => Ok(i.checked_neg().map_or(Value::Float(-(*i as f64)), Value::Int)),
            other => Ok(Value::Float(-number("-", other)?)),
        },
        [head, rest @ ..] => {
            if all_ints(args) {
                let Value::Int(first) = head else { unreachable!() };
                let mut acc = Some(*first);
                for arg in rest {
                    let Value::Int(i) = arg else { unreachable!() };
                    acc = acc.and_then(|a| a.checked_sub(*i));
                }
                if let Some(result) = acc {
                    return Ok(Value::Int(result));
                }
            }
            let mut acc = number("-", head)?;
            for arg in rest {
                acc -= number("-", arg)?;
            }
            Ok(Value::Float(acc))
        }
    }
}

pub(super) fn mul(_ctx: &mut dyn CallCtx, args: &[Value]) -> RunResult<Value> {
    if all_ints(args) {
        let mut acc: Option<i64> = Some(1);
        for arg in args {
            let Value::Int(i) = arg else { unreachable!() };
            acc = acc.and_then(|a| a.checked_mul(*i));
        }
        if let Some(result) = acc {
            return Ok(Value::Int(result));
        }
    }
    let mut acc = 1.0;
    for arg in args {
        acc *= number("*", arg)?;
    }
    Ok(Value::Float(acc))
}

/// True division: always produces a float. Unary form reciprocates.
pub(super) fn div(_ctx: &mut dyn CallCtx, args: &[Value]) -> RunResult<Value> {
    match args {
        [] => Ok(Value::Int(1)),
        [only] => {
            let x = number("/", only)?;
            if x == 0.0 {
                return Err(Error::division_by_zero());
            }
            Ok(Value::Float(1.0 / x))
        }
        [head, rest @ ..] => {
            let mut acc = number("/", head)?;
            for arg in rest {
                let d = number("/", arg)?;
                if d == 0.0 {
                    return Err(Error::division_by_zero());
                }
                acc /= d;
            }
            Ok(Value::Float(acc))
        }
    }
}

pub(super) fn modulo(_ctx: &mut dyn CallCtx, args: &[Value]) -> RunResult<Value> {
    match (&args[0], &args[1]) {
        (Value::Int(a), Value::Int(b)) => {
            if *b == 0 {
                return Err(Error::division_by_zero());
            }
            Ok(Value::Int(a.rem_euclid(*b)))
        }
        (a, b) => {
            let a = number("%", a)?;
            let b = number("%", b)?;
            if b == 0.0 {
                return Err(Error::division_by_zero());
            }
            Ok(Value::Float(a.rem_euclid(b)))
        }
    }
}

pub(super) fn min(_ctx: &mut dyn CallCtx, args: &[Value]) -> RunResult<Value> {
    if args.is_empty() {
        return Ok(Value::Float(f64::INFINITY));
    }
    if all_ints(args) {
        let mut best = i64::MAX;
        for arg in args {
            let Value::Int(i) = arg else { unreachable!() };
            best = best.min(*i);
        }
        return Ok(Value::Int(best));
    }
    let mut best = f64::INFINITY;
    for arg in args {
        best = best.min(number("min", arg)?);
    }
    Ok(Value::Float(best))
}

pub(super) fn max(_ctx: &mut dyn CallCtx, args: &[Value]) -> RunResult<Value> {
    if args.is_empty() {
        return Ok(Value::Float(f64::NEG_INFINITY));
    }
    if all_ints(args) {
        let mut best = i64::MIN;
        for arg in args {
            let Value::Int(i) = arg else { unreachable!() };
            best = best.max(*i);
        }
        return Ok(Value::Int(best));
    }
    let mut best = f64::NEG_INFINITY;
    for arg in args {
        best = best.max(number("max", arg)?);
    }
    Ok(Value::Float(best))
}

pub(super) fn abs(_ctx: &mut dyn CallCtx, args: &[Value]) -> RunResult<Value> {
    match &args[0] {
        Value::Int(i) => Ok(i.checked_abs().map_or(Value::Float((*i as f64).abs()), Value::Int)),
        other => Ok(Value::Float(number("abs", other)?.abs())),
    }
}

/// Rounds half away from zero, returning an `Int` when representable.
pub(super) fn round(_ctx: &mut dyn CallCtx, args: &[Value]) -> RunResult<Value> {
    match &args[0] {
        Value::Int(i) => Ok(Value::Int(*i)),
        other => {
            let rounded = number("round", other)?.round();
            if rounded.is_finite() && rounded >= i64::MIN as f64 && rounded <= i64::MAX as f64 {
                Ok(Value::Int(rounded as i64))
            } else {
                Ok(Value::Float(rounded))
            }
        }
    }
}

pub(super) fn sqrt(_ctx: &mut dyn CallCtx, args: &[Value]) -> RunResult<Value> {
    let x = number("sqrt", &args[0])?;
    if x < 0.0 {
        return Err(Error::domain("sqrt: negative argument"));
    }
    Ok(Value::Float(x.sqrt()))
}

pub(super) fn pow(_ctx: &mut dyn CallCtx, args: &[Value]) -> RunResult<Value> {
    let base = number("pow", &args[0])?;
    let exponent = number("pow", &args[1])?;
    let result = base.powf(exponent);
    if result.is_nan() && !base.is_nan() && !exponent.is_nan() {
        return Err(Error::domain("pow: result out of domain"));
    }
    Ok(Value::Float(result))
}

pub(super) fn log(_ctx: &mut dyn CallCtx, args: &[Value]) -> RunResult<Value> {
    let x = number("log", &args[0])?;
    if x <= 0.0 {
        return Err(Error::domain("log: non-positive argument"));
    }
    Ok(Value::Float(x.ln()))
}

pub(super) fn exp(_ctx: &mut dyn CallCtx, args: &[Value]) -> RunResult<Value> {
    Ok(Value::Float(number("exp", &args[0])?.exp()))
}

pub(super) fn sin(_ctx: &mut dyn CallCtx, args: &[Value]) -> RunResult<Value> {
    Ok(Value::Float(number("sin", &args[0])?.sin()))
}

pub(super) fn cos(_ctx: &mut dyn CallCtx, args: &[Value]) -> RunResult<Value> {
    Ok(Value::Float(number("cos", &args[0])?.cos()))
}

pub(super) fn tan(_ctx: &mut dyn CallCtx, args: &[Value]) -> RunResult<Value> {
    Ok(Value::Float(number("tan", &args[0])?.tan()))
}
