//! 运算符、比较、下标与切片，以及格式化（f-string 格式说明、`%` 格式化）

use std::cmp::Ordering;

use crate::sandbox::ast::{BinOp, CmpOp, UnaryOp};
use crate::sandbox::value::{format_float, values_equal, Value};
use crate::sandbox::SandboxError;

fn type_error(op: &str, a: &Value, b: &Value) -> SandboxError {
    SandboxError::runtime(format!(
        "TypeError: unsupported operand type(s) for {}: '{}' and '{}'",
        op,
        a.type_name(),
        b.type_name()
    ))
}

fn overflow() -> SandboxError {
    SandboxError::runtime("OverflowError: integer result too large")
}

fn zero_division() -> SandboxError {
    SandboxError::runtime("ZeroDivisionError: division by zero")
}

enum Nums {
    Ints(i64, i64),
    Floats(f64, f64),
}

fn nums(a: &Value, b: &Value) -> Option<Nums> {
    match (a.as_int(), b.as_int()) {
        (Some(x), Some(y)) => Some(Nums::Ints(x, y)),
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => Some(Nums::Floats(x, y)),
            _ => None,
        },
    }
}

/// 序列重复（`'ab' * n`、`[0] * n`）结果的长度上限
pub const MAX_REPEAT_LEN: usize = 1_000_000;

/// 重复结果的长度；超出上限报 MemoryError
pub fn repeat_len(unit: usize, times: i64) -> Result<usize, SandboxError> {
    let times = usize::try_from(times.max(0)).map_err(|_| overflow())?;
    match unit.checked_mul(times) {
        Some(len) if len <= MAX_REPEAT_LEN => Ok(len),
        _ => Err(SandboxError::runtime(format!(
            "MemoryError: repeated sequence longer than {} items",
            MAX_REPEAT_LEN
        ))),
    }
}

fn repeat(items: &[Value], times: i64) -> Result<Vec<Value>, SandboxError> {
    let len = repeat_len(items.len(), times)?;
    let mut out = Vec::with_capacity(len);
    if len > 0 {
        for _ in 0..times {
            out.extend_from_slice(items);
        }
    }
    Ok(out)
}

/// 结果符号跟随除数
fn int_mod(x: i64, y: i64) -> i64 {
    // i64::MIN % -1 的数学结果为 0
    let r = x.checked_rem(y).unwrap_or(0);
    if r != 0 && ((r < 0) != (y < 0)) {
        r + y
    } else {
        r
    }
}

fn op_symbol(op: BinOp) -> &'static str {
    match op {
        BinOp::Add => "+",
        BinOp::Sub => "-",
        BinOp::Mul => "*",
        BinOp::Div => "/",
        BinOp::FloorDiv => "//",
        BinOp::Mod => "%",
        BinOp::Pow => "**",
    }
}

pub fn binary_op(a: &Value, op: BinOp, b: &Value) -> Result<Value, SandboxError> {
    let symbol = op_symbol(op);
    match op {
        BinOp::Add => match (a, b) {
            (Value::Str(x), Value::Str(y)) => Ok(Value::Str(format!("{}{}", x, y))),
            (Value::List(x), Value::List(y)) => Ok(Value::List(x.iter().chain(y).cloned().collect())),
            _ => match nums(a, b) {
                Some(Nums::Ints(x, y)) => x.checked_add(y).map(Value::Int).ok_or_else(overflow),
                Some(Nums::Floats(x, y)) => Ok(Value::Float(x + y)),
                None => Err(type_error(symbol, a, b)),
            },
        },
        BinOp::Sub => match nums(a, b) {
            Some(Nums::Ints(x, y)) => x.checked_sub(y).map(Value::Int).ok_or_else(overflow),
            Some(Nums::Floats(x, y)) => Ok(Value::Float(x - y)),
            None => Err(type_error(symbol, a, b)),
        },
        BinOp::Mul => match (a, b) {
            (Value::Str(s), Value::Int(n)) | (Value::Int(n), Value::Str(s)) => {
                repeat_len(s.len(), *n)?;
                Ok(Value::Str(s.repeat((*n).max(0) as usize)))
            }
            (Value::List(items), Value::Int(n)) | (Value::Int(n), Value::List(items)) => {
                repeat(items, *n).map(Value::List)
            }
            _ => match nums(a, b) {
                Some(Nums::Ints(x, y)) => x.checked_mul(y).map(Value::Int).ok_or_else(overflow),
                Some(Nums::Floats(x, y)) => Ok(Value::Float(x * y)),
                None => Err(type_error(symbol, a, b)),
            },
        },
        BinOp::Div => match (a.as_f64(), b.as_f64()) {
            (Some(_), Some(y)) if y == 0.0 => Err(zero_division()),
            (Some(x), Some(y)) => Ok(Value::Float(x / y)),
            _ => Err(type_error(symbol, a, b)),
        },
        BinOp::FloorDiv => match nums(a, b) {
            Some(Nums::Ints(_, 0)) => Err(zero_division()),
            Some(Nums::Ints(x, y)) => {
                let q = x.checked_div(y).ok_or_else(overflow)?;
                let adjust = x % y != 0 && ((x < 0) != (y < 0));
                Ok(Value::Int(if adjust { q - 1 } else { q }))
            }
            Some(Nums::Floats(_, y)) if y == 0.0 => Err(zero_division()),
            Some(Nums::Floats(x, y)) => Ok(Value::Float((x / y).floor())),
            None => Err(type_error(symbol, a, b)),
        },
        BinOp::Mod => match (a, b) {
            (Value::Str(fmt), args) => percent_format(fmt, args),
            _ => match nums(a, b) {
                Some(Nums::Ints(_, 0)) => Err(zero_division()),
                Some(Nums::Ints(x, y)) => Ok(Value::Int(int_mod(x, y))),
                Some(Nums::Floats(_, y)) if y == 0.0 => Err(zero_division()),
                Some(Nums::Floats(x, y)) => Ok(Value::Float(x - y * (x / y).floor())),
                None => Err(type_error(symbol, a, b)),
            },
        },
        BinOp::Pow => match nums(a, b) {
            Some(Nums::Ints(x, y)) if y >= 0 => u32::try_from(y)
                .ok()
                .and_then(|e| x.checked_pow(e))
                .map(Value::Int)
                .ok_or_else(overflow),
            Some(Nums::Ints(x, y)) => Ok(Value::Float((x as f64).powf(y as f64))),
            Some(Nums::Floats(x, y)) => Ok(Value::Float(x.powf(y))),
            None => Err(type_error(symbol, a, b)),
        },
    }
}

pub fn unary_op(op: UnaryOp, v: &Value) -> Result<Value, SandboxError> {
    match op {
        UnaryOp::Not => Ok(Value::Bool(!v.truthy())),
        UnaryOp::Neg => match v {
            Value::Float(f) => Ok(Value::Float(-f)),
            other => match other.as_int() {
                Some(i) => i.checked_neg().map(Value::Int).ok_or_else(overflow),
                None => Err(SandboxError::runtime(format!(
                    "TypeError: bad operand type for unary -: '{}'",
                    v.type_name()
                ))),
            },
        },
        UnaryOp::Pos => match v {
            Value::Float(_) | Value::Int(_) => Ok(v.clone()),
            Value::Bool(b) => Ok(Value::Int(*b as i64)),
            _ => Err(SandboxError::runtime(format!(
                "TypeError: bad operand type for unary +: '{}'",
                v.type_name()
            ))),
        },
    }
}

/// 有序比较（sorted / min / max 与 `<` 系列运算共用）
pub fn compare_values(a: &Value, b: &Value) -> Result<Ordering, SandboxError> {
    match (a, b) {
        (Value::Str(x), Value::Str(y)) => Ok(x.cmp(y)),
        (Value::List(x), Value::List(y)) => {
            for (p, q) in x.iter().zip(y) {
                let ord = compare_values(p, q)?;
                if ord != Ordering::Equal {
                    return Ok(ord);
                }
            }
            Ok(x.len().cmp(&y.len()))
        }
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x.partial_cmp(&y).ok_or_else(|| {
                SandboxError::runtime("ValueError: cannot order NaN values")
            }),
            _ => Err(SandboxError::runtime(format!(
                "TypeError: '<' not supported between instances of '{}' and '{}'",
                a.type_name(),
                b.type_name()
            ))),
        },
    }
}

fn contains(container: &Value, item: &Value) -> Result<bool, SandboxError> {
    match container {
        Value::Str(s) => match item {
            Value::Str(needle) => Ok(s.contains(needle.as_str())),
            other => Err(SandboxError::runtime(format!(
                "TypeError: 'in <string>' requires string as left operand, not {}",
                other.type_name()
            ))),
        },
        Value::List(items) => Ok(items.iter().any(|v| values_equal(v, item))),
        Value::Dict(_) => Ok(container.dict_get(item).is_some()),
        other => Err(SandboxError::runtime(format!(
            "TypeError: argument of type '{}' is not iterable",
            other.type_name()
        ))),
    }
}

pub fn compare(op: CmpOp, a: &Value, b: &Value) -> Result<bool, SandboxError> {
    match op {
        CmpOp::Eq => Ok(values_equal(a, b)),
        CmpOp::NotEq => Ok(!values_equal(a, b)),
        CmpOp::Lt => Ok(compare_values(a, b)? == Ordering::Less),
        CmpOp::LtE => Ok(compare_values(a, b)? != Ordering::Greater),
        CmpOp::Gt => Ok(compare_values(a, b)? == Ordering::Greater),
        CmpOp::GtE => Ok(compare_values(a, b)? != Ordering::Less),
        CmpOp::In => contains(b, a),
        CmpOp::NotIn => Ok(!contains(b, a)?),
        CmpOp::Is => Ok(identical(a, b)),
        CmpOp::IsNot => Ok(!identical(a, b)),
    }
}

fn identical(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::None, Value::None) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Module(x), Value::Module(y)) => x == y,
        (Value::Function(x), Value::Function(y)) => x == y,
        _ => false,
    }
}

fn normalize_index(index: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let i = if index < 0 { index + len } else { index };
    (0..len).contains(&i).then_some(i as usize)
}

pub fn get_index(container: &Value, index: &Value) -> Result<Value, SandboxError> {
    match container {
        Value::List(items) => {
            let i = index.as_int().ok_or_else(|| {
                SandboxError::runtime(format!(
                    "TypeError: list indices must be integers, not {}",
                    index.type_name()
                ))
            })?;
            normalize_index(i, items.len())
                .map(|i| items[i].clone())
                .ok_or_else(|| SandboxError::runtime("IndexError: list index out of range"))
        }
        Value::Str(s) => {
            let i = index.as_int().ok_or_else(|| {
                SandboxError::runtime("TypeError: string indices must be integers")
            })?;
            let chars: Vec<char> = s.chars().collect();
            normalize_index(i, chars.len())
                .map(|i| Value::Str(chars[i].to_string()))
                .ok_or_else(|| SandboxError::runtime("IndexError: string index out of range"))
        }
        Value::Dict(_) => container
            .dict_get(index)
            .cloned()
            .ok_or_else(|| SandboxError::runtime(format!("KeyError: {}", index.repr()))),
        other => Err(SandboxError::runtime(format!(
            "TypeError: '{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

pub fn set_index(container: &mut Value, index: Value, value: Value) -> Result<(), SandboxError> {
    match container {
        Value::List(items) => {
            let i = index.as_int().ok_or_else(|| {
                SandboxError::runtime("TypeError: list indices must be integers")
            })?;
            let slot = normalize_index(i, items.len()).ok_or_else(|| {
                SandboxError::runtime("IndexError: list assignment index out of range")
            })?;
            items[slot] = value;
            Ok(())
        }
        Value::Dict(entries) => {
            match entries.iter_mut().find(|(k, _)| values_equal(k, &index)) {
                Some(entry) => entry.1 = value,
                None => entries.push((index, value)),
            }
            Ok(())
        }
        other => Err(SandboxError::runtime(format!(
            "TypeError: '{}' object does not support item assignment",
            other.type_name()
        ))),
    }
}

fn slice_positions(len: usize, lower: Option<i64>, upper: Option<i64>, step: i64) -> Vec<usize> {
    let len = len as i64;
    let clamp = |v: i64, lo: i64, hi: i64| v.max(lo).min(hi);
    let resolve = |v: i64| if v < 0 { v + len } else { v };
    let mut out = Vec::new();
    if step > 0 {
        let start = clamp(lower.map(resolve).unwrap_or(0), 0, len);
        let stop = clamp(upper.map(resolve).unwrap_or(len), 0, len);
        let mut i = start;
        while i < stop {
            out.push(i as usize);
            i += step;
        }
    } else {
        let start = clamp(lower.map(resolve).unwrap_or(len - 1), -1, len - 1);
        let stop = clamp(upper.map(resolve).unwrap_or(-1), -1, len - 1);
        let mut i = start;
        while i > stop {
            out.push(i as usize);
            i += step;
        }
    }
    out
}

pub fn slice(
    value: &Value,
    lower: Option<&Value>,
    upper: Option<&Value>,
    step: Option<&Value>,
) -> Result<Value, SandboxError> {
    let bound = |v: Option<&Value>| -> Result<Option<i64>, SandboxError> {
        match v {
            None | Some(Value::None) => Ok(None),
            Some(x) => x.as_int().map(Some).ok_or_else(|| {
                SandboxError::runtime("TypeError: slice indices must be integers or None")
            }),
        }
    };
    let step = bound(step)?.unwrap_or(1);
    if step == 0 {
        return Err(SandboxError::runtime("ValueError: slice step cannot be zero"));
    }
    let (lower, upper) = (bound(lower)?, bound(upper)?);
    match value {
        Value::List(items) => Ok(Value::List(
            slice_positions(items.len(), lower, upper, step)
                .into_iter()
                .map(|i| items[i].clone())
                .collect(),
        )),
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            Ok(Value::Str(
                slice_positions(chars.len(), lower, upper, step)
                    .into_iter()
                    .map(|i| chars[i])
                    .collect(),
            ))
        }
        other => Err(SandboxError::runtime(format!(
            "TypeError: '{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

// ---------- 格式化 ----------

fn group_thousands(digits: &str) -> String {
    let (int_part, rest) = match digits.find('.') {
        Some(i) => digits.split_at(i),
        None => (digits, ""),
    };
    let mut out = String::new();
    for (i, c) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out.push_str(rest);
    out
}

/// Rust 的 `1.5e3` 改为 Python 的 `1.5e+03`
fn python_exponent(s: String) -> String {
    match s.split_once('e') {
        Some((mantissa, exp)) => {
            let (sign, digits) = match exp.strip_prefix('-') {
                Some(d) => ('-', d),
                None => ('+', exp),
            };
            format!("{}e{}{:0>2}", mantissa, sign, digits)
        }
        None => s,
    }
}

/// 格式说明子集：`[[fill]align][sign][0][width][,][.precision][type]`，type 支持 f e % d s g
pub fn format_value(value: &Value, spec: &str) -> Result<String, SandboxError> {
    if spec.is_empty() {
        return Ok(value.to_display());
    }
    let chars: Vec<char> = spec.chars().collect();
    let mut i = 0;
    let mut fill = ' ';
    let mut align = None;
    if chars.len() >= 2 && matches!(chars[1], '<' | '>' | '^') {
        fill = chars[0];
        align = Some(chars[1]);
        i = 2;
    } else if matches!(chars.first(), Some('<' | '>' | '^')) {
        align = chars.first().copied();
        i = 1;
    }
    let plus = chars.get(i) == Some(&'+');
    if plus {
        i += 1;
    }
    if chars.get(i) == Some(&'0') && align.is_none() {
        fill = '0';
        align = Some('=');
        i += 1;
    }
    let mut width = 0usize;
    while let Some(d) = chars.get(i).and_then(|c| c.to_digit(10)) {
        width = width.saturating_mul(10).saturating_add(d as usize);
        i += 1;
    }
    let grouping = chars.get(i) == Some(&',');
    if grouping {
        i += 1;
    }
    let mut precision = None;
    if chars.get(i) == Some(&'.') {
        i += 1;
        let mut p = 0usize;
        while let Some(d) = chars.get(i).and_then(|c| c.to_digit(10)) {
            p = p.saturating_mul(10).saturating_add(d as usize);
            i += 1;
        }
        precision = Some(p);
    }
    if width > MAX_REPEAT_LEN || precision.is_some_and(|p| p > MAX_REPEAT_LEN) {
        return Err(SandboxError::runtime(format!(
            "ValueError: format specifier '{}' is too wide",
            spec
        )));
    }
    let kind = chars.get(i).copied();
    if i + usize::from(kind.is_some()) != chars.len() {
        return Err(SandboxError::runtime(format!(
            "ValueError: Invalid format specifier '{}'",
            spec
        )));
    }

    let numeric = value.as_f64().is_some();
    let as_float = || {
        value.as_f64().ok_or_else(|| {
            SandboxError::runtime(format!(
                "ValueError: Unknown format code '{}' for object of type '{}'",
                kind.unwrap_or('f'),
                value.type_name()
            ))
        })
    };
    let mut body = match kind {
        Some('f') | Some('F') => format!("{:.*}", precision.unwrap_or(6), as_float()?),
        Some('%') => format!("{:.*}%", precision.unwrap_or(6), as_float()? * 100.0),
        Some('e') | Some('E') => {
            python_exponent(format!("{:.*e}", precision.unwrap_or(6), as_float()?))
        }
        Some('d') => match value {
            Value::Int(_) | Value::Bool(_) => value.as_int().unwrap_or_default().to_string(),
            _ => {
                return Err(SandboxError::runtime(format!(
                    "ValueError: Unknown format code 'd' for object of type '{}'",
                    value.type_name()
                )))
            }
        },
        Some('g') | None if numeric && precision.is_some() => {
            let digits = precision.unwrap_or(6).max(1);
            let rounded: f64 = format!("{:.*e}", digits - 1, as_float()?)
                .parse()
                .unwrap_or(f64::NAN);
            match value {
                Value::Int(_) if kind.is_none() => value.to_display(),
                _ => format_float(rounded),
            }
        }
        Some('s') | None => {
            let text = value.to_display();
            match precision {
                Some(p) if !numeric => text.chars().take(p).collect(),
                _ => text,
            }
        }
        Some(other) => {
            return Err(SandboxError::runtime(format!(
                "ValueError: Unknown format code '{}'",
                other
            )))
        }
    };
    if grouping && numeric {
        let (sign, digits) = match body.strip_prefix('-') {
            Some(d) => ("-", d.to_string()),
            None => ("", body.clone()),
        };
        body = format!("{}{}", sign, group_thousands(&digits));
    }
    if plus && numeric && !body.starts_with('-') {
        body.insert(0, '+');
    }
    let len = body.chars().count();
    if len >= width {
        return Ok(body);
    }
    let pad = width - len;
    let padding = |n: usize| fill.to_string().repeat(n);
    let align = align.unwrap_or(if numeric { '>' } else { '<' });
    Ok(match align {
        '<' => format!("{}{}", body, padding(pad)),
        '^' => format!("{}{}{}", padding(pad / 2), body, padding(pad - pad / 2)),
        '=' => match body.strip_prefix('-') {
            Some(rest) => format!("-{}{}", padding(pad), rest),
            None => format!("{}{}", padding(pad), body),
        },
        _ => format!("{}{}", padding(pad), body),
    })
}

/// `"..." % args`：支持 %s %r %d %i %f（含精度）与 %%
pub fn percent_format(fmt: &str, args: &Value) -> Result<Value, SandboxError> {
    let args: Vec<Value> = match args {
        Value::List(items) => items.clone(),
        other => vec![other.clone()],
    };
    let mut next = args.into_iter();
    let mut out = String::new();
    let mut chars = fmt.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let mut spec = String::new();
        while let Some(&p) = chars.peek() {
            if p.is_ascii_digit() || p == '.' || p == '-' || p == '+' {
                spec.push(p);
                chars.next();
            } else {
                break;
            }
        }
        let conv = chars
            .next()
            .ok_or_else(|| SandboxError::runtime("ValueError: incomplete format"))?;
        if conv == '%' {
            out.push('%');
            continue;
        }
        let arg = next.next().ok_or_else(|| {
            SandboxError::runtime("TypeError: not enough arguments for format string")
        })?;
        let piece = match conv {
            's' => format_value(&arg, &spec)?,
            'r' => arg.repr(),
            'd' | 'i' => {
                let int = match &arg {
                    Value::Float(f) => Value::Int(f.trunc() as i64),
                    other => other.clone(),
                };
                format_value(&int, &format!("{}d", spec))?
            }
            'f' | 'e' | 'g' => format_value(&arg, &format!("{}{}", spec, conv))?,
            other => {
                return Err(SandboxError::runtime(format!(
                    "ValueError: unsupported format character '{}'",
                    other
                )))
            }
        };
        out.push_str(&piece);
    }
    Ok(Value::Str(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_python_division_semantics() {
        assert_eq!(binary_op(&Value::Int(7), BinOp::FloorDiv, &Value::Int(-2)).unwrap(), Value::Int(-4));
        assert_eq!(binary_op(&Value::Int(-7), BinOp::Mod, &Value::Int(3)).unwrap(), Value::Int(2));
        assert_eq!(binary_op(&Value::Int(7), BinOp::Div, &Value::Int(2)).unwrap(), Value::Float(3.5));
        assert!(binary_op(&Value::Int(1), BinOp::Div, &Value::Int(0)).is_err());
    }

    #[test]
    fn test_modulo_at_integer_extremes() {
        let m = |x: i64, y: i64| binary_op(&Value::Int(x), BinOp::Mod, &Value::Int(y)).unwrap();
        assert_eq!(m(7, i64::MAX), Value::Int(7));
        assert_eq!(m(-7, i64::MAX), Value::Int(i64::MAX - 7));
        assert_eq!(m(i64::MIN, -1), Value::Int(0));
        assert_eq!(m(7, -3), Value::Int(-2));
    }

    #[test]
    fn test_oversized_repetition_is_error() {
        let err = binary_op(&Value::str("ab"), BinOp::Mul, &Value::Int(1 << 62)).unwrap_err();
        assert!(err.to_string().starts_with("MemoryError"));
        let list = Value::List(vec![Value::Int(0)]);
        let err = binary_op(&list, BinOp::Mul, &Value::Int(1_000_000_000_000_000_000)).unwrap_err();
        assert!(err.to_string().starts_with("MemoryError"));
        assert_eq!(
            binary_op(&Value::Int(-3), BinOp::Mul, &list).unwrap(),
            Value::List(vec![])
        );
        assert!(format_value(&Value::Int(1), "99999999999999999999999d").is_err());
    }

    #[test]
    fn test_string_and_list_operators() {
        assert_eq!(
            binary_op(&Value::str("ab"), BinOp::Mul, &Value::Int(2)).unwrap(),
            Value::str("abab")
        );
        let err = binary_op(&Value::str("a"), BinOp::Add, &Value::Int(1)).unwrap_err();
        assert!(err.to_string().contains("unsupported operand"));
    }

    #[test]
    fn test_negative_index_and_slices() {
        let list = Value::List(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        assert_eq!(get_index(&list, &Value::Int(-1)).unwrap(), Value::Int(3));
        assert_eq!(
            slice(&list, None, None, Some(&Value::Int(-1))).unwrap(),
            Value::List(vec![Value::Int(3), Value::Int(2), Value::Int(1)])
        );
        assert_eq!(
            slice(&Value::str("hello"), Some(&Value::Int(1)), Some(&Value::Int(3)), None).unwrap(),
            Value::str("el")
        );
    }

    #[test]
    fn test_format_specs() {
        assert_eq!(format_value(&Value::Float(3.14159), ".2f").unwrap(), "3.14");
        assert_eq!(format_value(&Value::Int(1234567), ",").unwrap(), "1,234,567");
        assert_eq!(format_value(&Value::Int(42), "05d").unwrap(), "00042");
        assert_eq!(format_value(&Value::str("ab"), ">4").unwrap(), "  ab");
        assert_eq!(format_value(&Value::Float(0.25), ".1%").unwrap(), "25.0%");
    }

    #[test]
    fn test_percent_format() {
        let out = percent_format("%s has %d items (%.1f%%)", &Value::List(vec![
            Value::str("cart"),
            Value::Int(3),
            Value::Float(42.26),
        ]))
        .unwrap();
        assert_eq!(out, Value::str("cart has 3 items (42.3%)"));
    }
}
