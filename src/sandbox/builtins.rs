//! 计划可用的内置函数、对象方法与 json / re / math 模块
//!
//! 需要回调计划函数的内置（带 key 的 sorted / min / max、map、filter）在解释器里实现。

use std::cmp::Ordering;

use regex::Regex;

use crate::sandbox::ast::BinOp;
use crate::sandbox::ops::{binary_op, compare_values, format_value, repeat_len, set_index};
use crate::sandbox::value::{values_equal, Module, Value};
use crate::sandbox::SandboxError;

pub const BUILTIN_NAMES: &[&str] = &[
    "str", "repr", "int", "float", "bool", "len", "range", "sum", "min", "max", "abs", "round",
    "list", "tuple", "set", "sorted", "reversed", "enumerate", "zip", "any", "all", "dict",
    "print", "isinstance", "chr", "ord", "divmod", "pow", "format", "map", "filter",
];

/// range() 展开的上限
const MAX_RANGE_LEN: i64 = 1_000_000;

pub fn is_builtin(name: &str) -> bool {
    BUILTIN_NAMES.contains(&name)
}

type Kwargs = Vec<(String, Value)>;

fn kwarg<'a>(kwargs: &'a Kwargs, name: &str) -> Option<&'a Value> {
    kwargs.iter().find(|(k, _)| k == name).map(|(_, v)| v)
}

fn arity(name: &str, args: &[Value], min: usize, max: usize) -> Result<(), SandboxError> {
    if args.len() < min || args.len() > max {
        return Err(SandboxError::runtime(format!(
            "TypeError: {}() takes {} argument(s) ({} given)",
            name,
            if min == max {
                min.to_string()
            } else {
                format!("{} to {}", min, max)
            },
            args.len()
        )));
    }
    Ok(())
}

fn expect_str<'a>(name: &str, v: &'a Value) -> Result<&'a str, SandboxError> {
    match v {
        Value::Str(s) => Ok(s),
        other => Err(SandboxError::runtime(format!(
            "TypeError: {}() argument must be str, not {}",
            name,
            other.type_name()
        ))),
    }
}

fn expect_int(name: &str, v: &Value) -> Result<i64, SandboxError> {
    v.as_int().ok_or_else(|| {
        SandboxError::runtime(format!(
            "TypeError: {}() argument must be int, not {}",
            name,
            v.type_name()
        ))
    })
}

fn expect_f64(name: &str, v: &Value) -> Result<f64, SandboxError> {
    v.as_f64().ok_or_else(|| {
        SandboxError::runtime(format!(
            "TypeError: {}() argument must be a number, not {}",
            name,
            v.type_name()
        ))
    })
}

/// 按 Python 规则取极值（无 key）
pub fn extreme(items: Vec<Value>, want: Ordering, name: &str) -> Result<Value, SandboxError> {
    let mut iter = items.into_iter();
    let mut best = iter
        .next()
        .ok_or_else(|| SandboxError::runtime(format!("ValueError: {}() arg is an empty sequence", name)))?;
    for item in iter {
        if compare_values(&item, &best)? == want {
            best = item;
        }
    }
    Ok(best)
}

/// 稳定排序；比较失败时返回第一个错误
pub fn sort_values(items: &mut [Value], reverse: bool) -> Result<(), SandboxError> {
    let mut failure = None;
    items.sort_by(|a, b| match compare_values(a, b) {
        Ok(ord) => {
            if reverse {
                ord.reverse()
            } else {
                ord
            }
        }
        Err(e) => {
            failure.get_or_insert(e);
            Ordering::Equal
        }
    });
    failure.map_or(Ok(()), Err)
}

fn parse_int(s: &str) -> Result<i64, SandboxError> {
    s.trim().replace('_', "").parse::<i64>().map_err(|_| {
        SandboxError::runtime(format!(
            "ValueError: invalid literal for int() with base 10: {}",
            Value::str(s).repr()
        ))
    })
}

fn parse_float(s: &str) -> Result<f64, SandboxError> {
    let t = s.trim().to_ascii_lowercase();
    match t.as_str() {
        "inf" | "+inf" | "infinity" => Ok(f64::INFINITY),
        "-inf" | "-infinity" => Ok(f64::NEG_INFINITY),
        "nan" => Ok(f64::NAN),
        _ => t.parse::<f64>().map_err(|_| {
            SandboxError::runtime(format!(
                "ValueError: could not convert string to float: {}",
                Value::str(s).repr()
            ))
        }),
    }
}

fn round_value(x: &Value, digits: Option<&Value>) -> Result<Value, SandboxError> {
    match digits {
        None | Some(Value::None) => match x {
            Value::Float(f) => Ok(Value::Int(f.round_ties_even() as i64)),
            other => Ok(Value::Int(expect_int("round", other)?)),
        },
        Some(n) => {
            let n = expect_int("round", n)?;
            match x {
                Value::Float(f) => {
                    let factor = 10f64.powi(n as i32);
                    Ok(Value::Float((f * factor).round_ties_even() / factor))
                }
                other => Ok(Value::Int(expect_int("round", other)?)),
            }
        }
    }
}

fn type_matches(v: &Value, ty: &Value) -> Result<bool, SandboxError> {
    match ty {
        Value::List(types) => {
            for t in types {
                if type_matches(v, t)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Value::Function(name) => Ok(match name.as_str() {
            "list" | "tuple" => matches!(v, Value::List(_)),
            "int" => matches!(v, Value::Int(_) | Value::Bool(_)),
            other => v.type_name() == other,
        }),
        other => Err(SandboxError::runtime(format!(
            "TypeError: isinstance() arg 2 must be a type, not {}",
            other.type_name()
        ))),
    }
}

fn dict_from(v: &Value) -> Result<Vec<(Value, Value)>, SandboxError> {
    match v {
        Value::Dict(entries) => Ok(entries.clone()),
        other => {
            let mut out: Vec<(Value, Value)> = Vec::new();
            for pair in other.iter_items()? {
                match pair {
                    Value::List(kv) if kv.len() == 2 => {
                        let (k, v) = (kv[0].clone(), kv[1].clone());
                        match out.iter_mut().find(|(existing, _)| values_equal(existing, &k)) {
                            Some(entry) => entry.1 = v,
                            None => out.push((k, v)),
                        }
                    }
                    _ => {
                        return Err(SandboxError::runtime(
                            "ValueError: dictionary update sequence element has wrong length",
                        ))
                    }
                }
            }
            Ok(out)
        }
    }
}

/// 调用纯内置函数
pub fn call_builtin(name: &str, args: Vec<Value>, kwargs: Kwargs) -> Result<Value, SandboxError> {
    match name {
        "str" => {
            arity(name, &args, 0, 1)?;
            Ok(Value::Str(args.first().map(Value::to_display).unwrap_or_default()))
        }
        "repr" => {
            arity(name, &args, 1, 1)?;
            Ok(Value::Str(args[0].repr()))
        }
        "int" => {
            arity(name, &args, 0, 1)?;
            match args.first() {
                None => Ok(Value::Int(0)),
                Some(Value::Str(s)) => parse_int(s).map(Value::Int),
                Some(Value::Float(f)) if f.is_finite() => Ok(Value::Int(f.trunc() as i64)),
                Some(v) => Ok(Value::Int(expect_int(name, v)?)),
            }
        }
        "float" => {
            arity(name, &args, 0, 1)?;
            match args.first() {
                None => Ok(Value::Float(0.0)),
                Some(Value::Str(s)) => parse_float(s).map(Value::Float),
                Some(v) => Ok(Value::Float(expect_f64(name, v)?)),
            }
        }
        "bool" => {
            arity(name, &args, 0, 1)?;
            Ok(Value::Bool(args.first().map(Value::truthy).unwrap_or(false)))
        }
        "len" => {
            arity(name, &args, 1, 1)?;
            let n = match &args[0] {
                Value::Str(s) => s.chars().count(),
                Value::List(items) => items.len(),
                Value::Dict(entries) => entries.len(),
                other => {
                    return Err(SandboxError::runtime(format!(
                        "TypeError: object of type '{}' has no len()",
                        other.type_name()
                    )))
                }
            };
            Ok(Value::Int(n as i64))
        }
        "range" => {
            arity(name, &args, 1, 3)?;
            let ints: Vec<i64> = args
                .iter()
                .map(|a| expect_int(name, a))
                .collect::<Result<_, _>>()?;
            let (start, stop, step) = match ints.as_slice() {
                [stop] => (0, *stop, 1),
                [start, stop] => (*start, *stop, 1),
                [start, stop, step] => (*start, *stop, *step),
                _ => (0, 0, 1),
            };
            if step == 0 {
                return Err(SandboxError::runtime("ValueError: range() arg 3 must not be zero"));
            }
            let overflow = || SandboxError::runtime("OverflowError: range() bounds too large");
            let len = if step > 0 {
                stop.checked_sub(start)
                    .and_then(|span| span.checked_add(step - 1))
                    .ok_or_else(overflow)?
                    .max(0)
                    / step
            } else {
                start
                    .checked_sub(stop)
                    .and_then(|span| span.checked_sub(step + 1))
                    .ok_or_else(overflow)?
                    .max(0)
                    / step.checked_neg().ok_or_else(overflow)?
            };
            if len > MAX_RANGE_LEN {
                return Err(SandboxError::runtime(format!(
                    "ValueError: range of {} elements is too large for a plan",
                    len
                )));
            }
            Ok(Value::List((0..len).map(|i| Value::Int(start + i * step)).collect()))
        }
        "sum" => {
            arity(name, &args, 1, 2)?;
            let mut total = args.get(1).cloned().unwrap_or(Value::Int(0));
            for item in args[0].iter_items()? {
                total = binary_op(&total, BinOp::Add, &item)?;
            }
            Ok(total)
        }
        "min" | "max" => {
            let want = if name == "min" { Ordering::Less } else { Ordering::Greater };
            let items = match args.len() {
                0 => return Err(SandboxError::runtime(format!("TypeError: {}() expected at least 1 argument", name))),
                1 => args[0].iter_items()?,
                _ => args,
            };
            if items.is_empty() {
                if let Some(default) = kwarg(&kwargs, "default") {
                    return Ok(default.clone());
                }
            }
            extreme(items, want, name)
        }
        "abs" => {
            arity(name, &args, 1, 1)?;
            match &args[0] {
                Value::Float(f) => Ok(Value::Float(f.abs())),
                v => expect_int(name, v)?
                    .checked_abs()
                    .map(Value::Int)
                    .ok_or_else(|| SandboxError::runtime("OverflowError: integer result too large")),
            }
        }
        "round" => {
            arity(name, &args, 1, 2)?;
            round_value(&args[0], args.get(1).or_else(|| kwarg(&kwargs, "ndigits")))
        }
        "list" | "tuple" => {
            arity(name, &args, 0, 1)?;
            match args.first() {
                None => Ok(Value::List(Vec::new())),
                Some(v) => Ok(Value::List(v.iter_items()?)),
            }
        }
        "set" => {
            arity(name, &args, 0, 1)?;
            let mut out: Vec<Value> = Vec::new();
            for item in args.first().map(Value::iter_items).transpose()?.unwrap_or_default() {
                if !out.iter().any(|v| values_equal(v, &item)) {
                    out.push(item);
                }
            }
            Ok(Value::List(out))
        }
        "sorted" => {
            arity(name, &args, 1, 1)?;
            let mut items = args[0].iter_items()?;
            let reverse = kwarg(&kwargs, "reverse").map(Value::truthy).unwrap_or(false);
            sort_values(&mut items, reverse)?;
            Ok(Value::List(items))
        }
        "reversed" => {
            arity(name, &args, 1, 1)?;
            let mut items = args[0].iter_items()?;
            items.reverse();
            Ok(Value::List(items))
        }
        "enumerate" => {
            arity(name, &args, 1, 2)?;
            let start = match args.get(1).or_else(|| kwarg(&kwargs, "start")) {
                Some(v) => expect_int(name, v)?,
                None => 0,
            };
            Ok(Value::List(
                args[0]
                    .iter_items()?
                    .into_iter()
                    .enumerate()
                    .map(|(i, v)| Value::List(vec![Value::Int(start + i as i64), v]))
                    .collect(),
            ))
        }
        "zip" => {
            let columns: Vec<Vec<Value>> = args
                .iter()
                .map(Value::iter_items)
                .collect::<Result<_, _>>()?;
            let len = columns.iter().map(Vec::len).min().unwrap_or(0);
            Ok(Value::List(
                (0..len)
                    .map(|i| Value::List(columns.iter().map(|c| c[i].clone()).collect()))
                    .collect(),
            ))
        }
        "any" => {
            arity(name, &args, 1, 1)?;
            Ok(Value::Bool(args[0].iter_items()?.iter().any(Value::truthy)))
        }
        "all" => {
            arity(name, &args, 1, 1)?;
            Ok(Value::Bool(args[0].iter_items()?.iter().all(Value::truthy)))
        }
        "dict" => {
            arity(name, &args, 0, 1)?;
            let mut dict = Value::Dict(match args.first() {
                Some(v) => dict_from(v)?,
                None => Vec::new(),
            });
            for (k, v) in kwargs {
                set_index(&mut dict, Value::Str(k), v)?;
            }
            Ok(dict)
        }
        "print" => {
            let line: Vec<String> = args.iter().map(Value::to_display).collect();
            tracing::debug!(stage = "sandbox", output = %line.join(" "), "plan print");
            Ok(Value::None)
        }
        "isinstance" => {
            arity(name, &args, 2, 2)?;
            Ok(Value::Bool(type_matches(&args[0], &args[1])?))
        }
        "chr" => {
            arity(name, &args, 1, 1)?;
            let code = expect_int(name, &args[0])?;
            u32::try_from(code)
                .ok()
                .and_then(char::from_u32)
                .map(|c| Value::Str(c.to_string()))
                .ok_or_else(|| SandboxError::runtime("ValueError: chr() arg not in range"))
        }
        "ord" => {
            arity(name, &args, 1, 1)?;
            let s = expect_str(name, &args[0])?;
            let mut chars = s.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Ok(Value::Int(c as i64)),
                _ => Err(SandboxError::runtime(format!(
                    "TypeError: ord() expected a character, but string of length {} found",
                    s.chars().count()
                ))),
            }
        }
        "divmod" => {
            arity(name, &args, 2, 2)?;
            let q = binary_op(&args[0], BinOp::FloorDiv, &args[1])?;
            let r = binary_op(&args[0], BinOp::Mod, &args[1])?;
            Ok(Value::List(vec![q, r]))
        }
        "pow" => {
            arity(name, &args, 2, 2)?;
            binary_op(&args[0], BinOp::Pow, &args[1])
        }
        "format" => {
            arity(name, &args, 1, 2)?;
            let spec = match args.get(1) {
                Some(v) => expect_str(name, v)?.to_string(),
                None => String::new(),
            };
            format_value(&args[0], &spec).map(Value::Str)
        }
        other => Err(SandboxError::runtime(format!(
            "NameError: name '{}' is not defined",
            other
        ))),
    }
}

// ---------- 方法 ----------

/// 会原地修改接收者的方法（解释器据此把结果写回变量）
pub fn is_mutating(receiver: &Value, method: &str) -> bool {
    match receiver {
        Value::List(_) => matches!(
            method,
            "append" | "extend" | "insert" | "pop" | "remove" | "sort" | "reverse" | "clear"
        ),
        Value::Dict(_) => matches!(method, "update" | "pop" | "setdefault" | "clear"),
        _ => false,
    }
}

fn no_attr(receiver: &Value, method: &str) -> SandboxError {
    SandboxError::runtime(format!(
        "AttributeError: '{}' object has no attribute '{}'",
        receiver.type_name(),
        method
    ))
}

pub fn call_method(
    receiver: &mut Value,
    method: &str,
    args: Vec<Value>,
    kwargs: Kwargs,
) -> Result<Value, SandboxError> {
    match receiver {
        Value::Str(s) => str_method(s, method, args, kwargs),
        Value::List(items) => list_method(items, method, args, kwargs),
        Value::Dict(_) => dict_method(receiver, method, args, kwargs),
        other => Err(no_attr(other, method)),
    }
}

fn strip_chars(args: &[Value]) -> Result<Option<Vec<char>>, SandboxError> {
    match args.first() {
        None | Some(Value::None) => Ok(None),
        Some(v) => Ok(Some(expect_str("strip", v)?.chars().collect())),
    }
}

fn str_method(s: &str, method: &str, args: Vec<Value>, kwargs: Kwargs) -> Result<Value, SandboxError> {
    let text = |v: String| Ok(Value::Str(v));
    match method {
        "lower" => text(s.to_lowercase()),
        "upper" => text(s.to_uppercase()),
        "title" => text(
            s.split(' ')
                .map(|w| {
                    let mut c = w.chars();
                    match c.next() {
                        Some(f) => f.to_uppercase().chain(c.flat_map(char::to_lowercase)).collect(),
                        None => String::new(),
                    }
                })
                .collect::<Vec<String>>()
                .join(" "),
        ),
        "capitalize" => {
            let mut c = s.chars();
            text(match c.next() {
                Some(f) => f.to_uppercase().chain(c.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            })
        }
        "strip" | "lstrip" | "rstrip" => {
            let chars = strip_chars(&args)?;
            let pred = |c: char| match &chars {
                Some(set) => set.contains(&c),
                None => c.is_whitespace(),
            };
            text(match method {
                "strip" => s.trim_matches(pred).to_string(),
                "lstrip" => s.trim_start_matches(pred).to_string(),
                _ => s.trim_end_matches(pred).to_string(),
            })
        }
        "split" | "rsplit" => {
            let sep = match args.first().or_else(|| kwarg(&kwargs, "sep")) {
                None | Some(Value::None) => None,
                Some(v) => Some(expect_str("split", v)?.to_string()),
            };
            let maxsplit = match args.get(1).or_else(|| kwarg(&kwargs, "maxsplit")) {
                Some(v) => expect_int("split", v)?,
                None => -1,
            };
            let parts: Vec<String> = match (&sep, maxsplit) {
                (Some(sep), _) if sep.is_empty() => {
                    return Err(SandboxError::runtime("ValueError: empty separator"))
                }
                (Some(sep), n) if n >= 0 && method == "split" => {
                    s.splitn(n as usize + 1, sep.as_str()).map(String::from).collect()
                }
                (Some(sep), n) if n >= 0 => {
                    let mut v: Vec<String> =
                        s.rsplitn(n as usize + 1, sep.as_str()).map(String::from).collect();
                    v.reverse();
                    v
                }
                (Some(sep), _) => s.split(sep.as_str()).map(String::from).collect(),
                (None, _) => s.split_whitespace().map(String::from).collect(),
            };
            Ok(Value::List(parts.into_iter().map(Value::Str).collect()))
        }
        "splitlines" => Ok(Value::List(s.lines().map(Value::str).collect())),
        "join" => {
            arity("join", &args, 1, 1)?;
            let mut pieces = Vec::new();
            for item in args[0].iter_items()? {
                match item {
                    Value::Str(p) => pieces.push(p),
                    other => {
                        return Err(SandboxError::runtime(format!(
                            "TypeError: sequence item: expected str instance, {} found",
                            other.type_name()
                        )))
                    }
                }
            }
            text(pieces.join(s))
        }
        "replace" => {
            arity("replace", &args, 2, 3)?;
            let from = expect_str("replace", &args[0])?;
            let to = expect_str("replace", &args[1])?;
            let count = args.get(2).map(|n| expect_int("replace", n)).transpose()?;
            match count {
                Some(n) if n >= 0 => text(s.replacen(from, to, n as usize)),
                _ => text(s.replace(from, to)),
            }
        }
        "startswith" | "endswith" => {
            arity(method, &args, 1, 1)?;
            let candidates = match &args[0] {
                Value::List(items) => items.clone(),
                other => vec![other.clone()],
            };
            let mut hit = false;
            for c in &candidates {
                let c = expect_str(method, c)?;
                hit |= if method == "startswith" { s.starts_with(c) } else { s.ends_with(c) };
            }
            Ok(Value::Bool(hit))
        }
        "find" | "index" => {
            arity(method, &args, 1, 1)?;
            let needle = expect_str(method, &args[0])?;
            match s.find(needle) {
                Some(byte) => Ok(Value::Int(s[..byte].chars().count() as i64)),
                None if method == "find" => Ok(Value::Int(-1)),
                None => Err(SandboxError::runtime("ValueError: substring not found")),
            }
        }
        "count" => {
            arity("count", &args, 1, 1)?;
            let needle = expect_str("count", &args[0])?;
            Ok(Value::Int(if needle.is_empty() {
                s.chars().count() as i64 + 1
            } else {
                s.matches(needle).count() as i64
            }))
        }
        "isdigit" | "isnumeric" => Ok(Value::Bool(!s.is_empty() && s.chars().all(|c| c.is_numeric()))),
        "isalpha" => Ok(Value::Bool(!s.is_empty() && s.chars().all(char::is_alphabetic))),
        "isalnum" => Ok(Value::Bool(!s.is_empty() && s.chars().all(char::is_alphanumeric))),
        "isspace" => Ok(Value::Bool(!s.is_empty() && s.chars().all(char::is_whitespace))),
        "zfill" => {
            arity("zfill", &args, 1, 1)?;
            let width = repeat_len(1, expect_int("zfill", &args[0])?)?;
            let len = s.chars().count();
            if len >= width {
                return text(s.to_string());
            }
            let (sign, rest) = match s.strip_prefix(['-', '+']) {
                Some(rest) => (&s[..1], rest),
                None => ("", s),
            };
            text(format!("{}{}{}", sign, "0".repeat(width - len), rest))
        }
        "format" => str_format(s, &args, &kwargs).map(Value::Str),
        _ => Err(no_attr(&Value::str(s), method)),
    }
}

/// `"{} {name:.2f}".format(...)`
fn str_format(template: &str, args: &[Value], kwargs: &Kwargs) -> Result<String, SandboxError> {
    let mut out = String::new();
    let mut auto = 0usize;
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut field = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(ch) => field.push(ch),
                        None => {
                            return Err(SandboxError::runtime(
                                "ValueError: expected '}' before end of string",
                            ))
                        }
                    }
                }
                let (key, spec) = field.split_once(':').unwrap_or((field.as_str(), ""));
                let value = if key.is_empty() {
                    auto += 1;
                    args.get(auto - 1)
                } else if let Ok(i) = key.parse::<usize>() {
                    args.get(i)
                } else {
                    kwarg(kwargs, key)
                }
                .ok_or_else(|| {
                    SandboxError::runtime(format!("IndexError: format field '{}' has no value", key))
                })?;
                out.push_str(&format_value(value, spec)?);
            }
            other => out.push(other),
        }
    }
    Ok(out)
}

fn list_method(
    items: &mut Vec<Value>,
    method: &str,
    args: Vec<Value>,
    kwargs: Kwargs,
) -> Result<Value, SandboxError> {
    match method {
        "append" => {
            arity("append", &args, 1, 1)?;
            items.extend(args);
            Ok(Value::None)
        }
        "extend" => {
            arity("extend", &args, 1, 1)?;
            items.extend(args[0].iter_items()?);
            Ok(Value::None)
        }
        "insert" => {
            arity("insert", &args, 2, 2)?;
            let len = items.len() as i64;
            let mut i = expect_int("insert", &args[0])?;
            if i < 0 {
                i += len;
            }
            items.insert(i.clamp(0, len) as usize, args[1].clone());
            Ok(Value::None)
        }
        "pop" => {
            arity("pop", &args, 0, 1)?;
            if items.is_empty() {
                return Err(SandboxError::runtime("IndexError: pop from empty list"));
            }
            let len = items.len() as i64;
            let mut i = match args.first() {
                Some(v) => expect_int("pop", v)?,
                None => len - 1,
            };
            if i < 0 {
                i += len;
            }
            if !(0..len).contains(&i) {
                return Err(SandboxError::runtime("IndexError: pop index out of range"));
            }
            Ok(items.remove(i as usize))
        }
        "remove" => {
            arity("remove", &args, 1, 1)?;
            match items.iter().position(|v| values_equal(v, &args[0])) {
                Some(i) => {
                    items.remove(i);
                    Ok(Value::None)
                }
                None => Err(SandboxError::runtime("ValueError: list.remove(x): x not in list")),
            }
        }
        "index" => {
            arity("index", &args, 1, 1)?;
            items
                .iter()
                .position(|v| values_equal(v, &args[0]))
                .map(|i| Value::Int(i as i64))
                .ok_or_else(|| SandboxError::runtime(format!("ValueError: {} is not in list", args[0].repr())))
        }
        "count" => {
            arity("count", &args, 1, 1)?;
            Ok(Value::Int(items.iter().filter(|v| values_equal(v, &args[0])).count() as i64))
        }
        "sort" => {
            let reverse = kwarg(&kwargs, "reverse").map(Value::truthy).unwrap_or(false);
            sort_values(items, reverse)?;
            Ok(Value::None)
        }
        "reverse" => {
            items.reverse();
            Ok(Value::None)
        }
        "copy" => Ok(Value::List(items.clone())),
        "clear" => {
            items.clear();
            Ok(Value::None)
        }
        _ => Err(no_attr(&Value::List(Vec::new()), method)),
    }
}

fn dict_method(
    receiver: &mut Value,
    method: &str,
    args: Vec<Value>,
    kwargs: Kwargs,
) -> Result<Value, SandboxError> {
    let entries = match receiver {
        Value::Dict(entries) => entries,
        other => return Err(no_attr(other, method)),
    };
    let position = |entries: &Vec<(Value, Value)>, key: &Value| {
        entries.iter().position(|(k, _)| values_equal(k, key))
    };
    match method {
        "get" => {
            arity("get", &args, 1, 2)?;
            Ok(match position(entries, &args[0]) {
                Some(i) => entries[i].1.clone(),
                None => args.get(1).cloned().unwrap_or(Value::None),
            })
        }
        "keys" => Ok(Value::List(entries.iter().map(|(k, _)| k.clone()).collect())),
        "values" => Ok(Value::List(entries.iter().map(|(_, v)| v.clone()).collect())),
        "items" => Ok(Value::List(
            entries
                .iter()
                .map(|(k, v)| Value::List(vec![k.clone(), v.clone()]))
                .collect(),
        )),
        "update" => {
            arity("update", &args, 0, 1)?;
            let mut incoming = match args.first() {
                Some(v) => dict_from(v)?,
                None => Vec::new(),
            };
            incoming.extend(kwargs.into_iter().map(|(k, v)| (Value::Str(k), v)));
            for (k, v) in incoming {
                match position(entries, &k) {
                    Some(i) => entries[i].1 = v,
                    None => entries.push((k, v)),
                }
            }
            Ok(Value::None)
        }
        "pop" => {
            arity("pop", &args, 1, 2)?;
            match position(entries, &args[0]) {
                Some(i) => Ok(entries.remove(i).1),
                None => args
                    .get(1)
                    .cloned()
                    .ok_or_else(|| SandboxError::runtime(format!("KeyError: {}", args[0].repr()))),
            }
        }
        "setdefault" => {
            arity("setdefault", &args, 1, 2)?;
            match position(entries, &args[0]) {
                Some(i) => Ok(entries[i].1.clone()),
                None => {
                    let default = args.get(1).cloned().unwrap_or(Value::None);
                    entries.push((args[0].clone(), default.clone()));
                    Ok(default)
                }
            }
        }
        "copy" => Ok(Value::Dict(entries.clone())),
        "clear" => {
            entries.clear();
            Ok(Value::None)
        }
        _ => Err(no_attr(&Value::Dict(Vec::new()), method)),
    }
}

// ---------- 模块 ----------

pub fn module_attr(module: Module, name: &str) -> Option<Value> {
    match (module, name) {
        (Module::Math, "pi") => Some(Value::Float(std::f64::consts::PI)),
        (Module::Math, "e") => Some(Value::Float(std::f64::consts::E)),
        (Module::Math, "inf") => Some(Value::Float(f64::INFINITY)),
        (Module::Math, "nan") => Some(Value::Float(f64::NAN)),
        _ => None,
    }
}

/// json / re / math 模块函数（mcp 由解释器处理）
pub fn call_module(
    module: Module,
    name: &str,
    args: Vec<Value>,
    kwargs: Kwargs,
) -> Result<Value, SandboxError> {
    match module {
        Module::Json => json_call(name, args, kwargs),
        Module::Re => re_call(name, args),
        Module::Math => math_call(name, args),
        Module::Mcp => Err(SandboxError::runtime(format!(
            "AttributeError: module 'mcp' has no attribute '{}'",
            name
        ))),
    }
}

fn json_call(name: &str, args: Vec<Value>, kwargs: Kwargs) -> Result<Value, SandboxError> {
    match name {
        "loads" => {
            arity("loads", &args, 1, 1)?;
            let text = expect_str("loads", &args[0])?;
            let parsed: serde_json::Value = serde_json::from_str(text).map_err(|e| {
                SandboxError::runtime(format!("JSONDecodeError: {}", e))
            })?;
            Ok(Value::from_json(&parsed))
        }
        "dumps" => {
            arity("dumps", &args, 1, 1)?;
            match kwarg(&kwargs, "indent") {
                Some(Value::None) | None => args[0].to_json_text().map(Value::Str),
                Some(_) => serde_json::to_string_pretty(&args[0].to_json())
                    .map(Value::Str)
                    .map_err(|e| SandboxError::runtime(format!("TypeError: {}", e))),
            }
        }
        _ => Err(SandboxError::runtime(format!(
            "AttributeError: module 'json' has no attribute '{}'",
            name
        ))),
    }
}

fn compile(pattern: &str) -> Result<Regex, SandboxError> {
    Regex::new(pattern).map_err(|e| SandboxError::runtime(format!("re.error: {}", e)))
}

/// Python 替换串 `\1` / `\g<name>` 转为 regex crate 的 `${1}` / `${name}`
fn python_replacement(repl: &str) -> String {
    let mut out = String::new();
    let mut chars = repl.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '$' => out.push_str("$$"),
            '\\' => match chars.peek().copied() {
                Some(d) if d.is_ascii_digit() => {
                    chars.next();
                    out.push_str(&format!("${{{}}}", d));
                }
                Some('g') => {
                    chars.next();
                    if chars.peek() == Some(&'<') {
                        chars.next();
                        let name: String = chars.by_ref().take_while(|c| *c != '>').collect();
                        out.push_str(&format!("${{{}}}", name));
                    } else {
                        out.push_str("\\g");
                    }
                }
                Some('n') => {
                    chars.next();
                    out.push('\n');
                }
                Some('\\') => {
                    chars.next();
                    out.push('\\');
                }
                _ => out.push('\\'),
            },
            other => out.push(other),
        }
    }
    out
}

fn re_call(name: &str, args: Vec<Value>) -> Result<Value, SandboxError> {
    match name {
        "findall" => {
            arity("findall", &args, 2, 3)?;
            let re = compile(expect_str("findall", &args[0])?)?;
            let haystack = expect_str("findall", &args[1])?;
            let groups = re.captures_len() - 1;
            let text = |m: Option<regex::Match>| Value::str(m.map(|m| m.as_str()).unwrap_or(""));
            Ok(Value::List(
                re.captures_iter(haystack)
                    .map(|caps| match groups {
                        0 => text(caps.get(0)),
                        1 => text(caps.get(1)),
                        n => Value::List((1..=n).map(|i| text(caps.get(i))).collect()),
                    })
                    .collect(),
            ))
        }
        "sub" => {
            arity("sub", &args, 3, 4)?;
            let re = compile(expect_str("sub", &args[0])?)?;
            let repl = python_replacement(expect_str("sub", &args[1])?);
            let haystack = expect_str("sub", &args[2])?;
            let out = match args.get(3).map(|v| expect_int("sub", v)).transpose()? {
                Some(n) if n > 0 => re.replacen(haystack, n as usize, repl.as_str()),
                _ => re.replace_all(haystack, repl.as_str()),
            };
            Ok(Value::Str(out.into_owned()))
        }
        "split" => {
            arity("split", &args, 2, 2)?;
            let re = compile(expect_str("split", &args[0])?)?;
            let haystack = expect_str("split", &args[1])?;
            Ok(Value::List(re.split(haystack).map(Value::str).collect()))
        }
        _ => Err(SandboxError::runtime(format!(
            "AttributeError: module 're' has no attribute '{}'",
            name
        ))),
    }
}

fn math_call(name: &str, args: Vec<Value>) -> Result<Value, SandboxError> {
    let unary = |f: fn(f64) -> f64| -> Result<Value, SandboxError> {
        arity(name, &args, 1, 1)?;
        Ok(Value::Float(f(expect_f64(name, &args[0])?)))
    };
    match name {
        "sqrt" => {
            arity(name, &args, 1, 1)?;
            let x = expect_f64(name, &args[0])?;
            if x < 0.0 {
                return Err(SandboxError::runtime("ValueError: math domain error"));
            }
            Ok(Value::Float(x.sqrt()))
        }
        "exp" => unary(f64::exp),
        "fabs" => unary(f64::abs),
        "sin" => unary(f64::sin),
        "cos" => unary(f64::cos),
        "tan" => unary(f64::tan),
        "log10" => unary(f64::log10),
        "log2" => unary(f64::log2),
        "floor" | "ceil" | "trunc" => {
            arity(name, &args, 1, 1)?;
            let x = expect_f64(name, &args[0])?;
            let r = match name {
                "floor" => x.floor(),
                "ceil" => x.ceil(),
                _ => x.trunc(),
            };
            Ok(Value::Int(r as i64))
        }
        "log" => {
            arity(name, &args, 1, 2)?;
            let x = expect_f64(name, &args[0])?;
            if x <= 0.0 {
                return Err(SandboxError::runtime("ValueError: math domain error"));
            }
            match args.get(1) {
                Some(base) => Ok(Value::Float(x.ln() / expect_f64(name, base)?.ln())),
                None => Ok(Value::Float(x.ln())),
            }
        }
        "pow" => {
            arity(name, &args, 2, 2)?;
            Ok(Value::Float(expect_f64(name, &args[0])?.powf(expect_f64(name, &args[1])?)))
        }
        "factorial" => {
            arity(name, &args, 1, 1)?;
            let n = expect_int(name, &args[0])?;
            if n < 0 {
                return Err(SandboxError::runtime(
                    "ValueError: factorial() not defined for negative values",
                ));
            }
            (1..=n)
                .try_fold(1i64, |acc, k| acc.checked_mul(k))
                .map(Value::Int)
                .ok_or_else(|| SandboxError::runtime("OverflowError: integer result too large"))
        }
        "gcd" => {
            arity(name, &args, 2, 2)?;
            let (mut a, mut b) = (expect_int(name, &args[0])?.abs(), expect_int(name, &args[1])?.abs());
            while b != 0 {
                (a, b) = (b, a % b);
            }
            Ok(Value::Int(a))
        }
        _ => Err(SandboxError::runtime(format!(
            "AttributeError: module 'math' has no attribute '{}'",
            name
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str, args: Vec<Value>) -> Value {
        call_builtin(name, args, Vec::new()).unwrap()
    }

    #[test]
    fn test_conversions() {
        assert_eq!(call("int", vec![Value::str(" 42 ")]), Value::Int(42));
        assert_eq!(call("int", vec![Value::Float(-3.9)]), Value::Int(-3));
        assert_eq!(call("float", vec![Value::str("2.5")]), Value::Float(2.5));
        assert_eq!(call("round", vec![Value::Float(2.5)]), Value::Int(2));
        assert_eq!(call("round", vec![Value::Float(3.14159), Value::Int(2)]), Value::Float(3.14));
        assert!(call_builtin("int", vec![Value::str("abc")], Vec::new()).is_err());
    }

    #[test]
    fn test_range_and_aggregates() {
        let r = call("range", vec![Value::Int(1), Value::Int(10), Value::Int(3)]);
        assert_eq!(r, Value::List(vec![Value::Int(1), Value::Int(4), Value::Int(7)]));
        assert_eq!(call("sum", vec![r.clone()]), Value::Int(12));
        assert_eq!(call("max", vec![r]), Value::Int(7));
        assert_eq!(call("range", vec![Value::Int(5), Value::Int(0), Value::Int(-2)]).to_display(), "[5, 3, 1]");
    }

    #[test]
    fn test_range_bounds_overflow_is_error() {
        let huge = call_builtin("range", vec![Value::Int(i64::MIN), Value::Int(1 << 62)], Vec::new())
            .unwrap_err();
        assert!(huge.to_string().starts_with("OverflowError"), "{}", huge);
        let down = call_builtin("range", vec![Value::Int(i64::MAX), Value::Int(i64::MIN), Value::Int(-1)], Vec::new())
            .unwrap_err();
        assert!(down.to_string().starts_with("OverflowError"), "{}", down);
        let wide = call_builtin("range", vec![Value::Int(0), Value::Int(1 << 40)], Vec::new()).unwrap_err();
        assert!(wide.to_string().contains("too large"));
    }

    #[test]
    fn test_list_methods_mutate_in_place() {
        let mut list = Value::List(vec![Value::Int(3), Value::Int(1)]);
        call_method(&mut list, "append", vec![Value::Int(2)], Vec::new()).unwrap();
        call_method(&mut list, "sort", Vec::new(), Vec::new()).unwrap();
        assert_eq!(list.to_display(), "[1, 2, 3]");
        assert!(is_mutating(&list, "append"));
        assert!(!is_mutating(&list, "index"));
    }

    #[test]
    fn test_str_methods() {
        let mut s = Value::str("  a,b,,c ");
        let parts = call_method(&mut s, "split", vec![Value::str(",")], Vec::new()).unwrap();
        assert_eq!(parts.to_display(), "['  a', 'b', '', 'c ']");
        let mut t = Value::str("{} + {x:.1f}");
        let formatted = call_method(
            &mut t,
            "format",
            vec![Value::Int(1)],
            vec![("x".to_string(), Value::Float(2.26))],
        )
        .unwrap();
        assert_eq!(formatted, Value::str("1 + 2.3"));
    }

    #[test]
    fn test_json_and_re_modules() {
        let parsed = call_module(Module::Json, "loads", vec![Value::str(r#"{"result": [1, 2]}"#)], Vec::new()).unwrap();
        assert_eq!(parsed.to_display(), "{'result': [1, 2]}");
        let nums = call_module(
            Module::Re,
            "findall",
            vec![Value::str(r"\d+"), Value::str("a1b22c333")],
            Vec::new(),
        )
        .unwrap();
        assert_eq!(nums.to_display(), "['1', '22', '333']");
        let swapped = call_module(
            Module::Re,
            "sub",
            vec![Value::str(r"(\w+)@(\w+)"), Value::str(r"\2 at \1"), Value::str("me@host")],
            Vec::new(),
        )
        .unwrap();
        assert_eq!(swapped, Value::str("host at me"));
    }

    #[test]
    fn test_math_module() {
        assert_eq!(call_module(Module::Math, "sqrt", vec![Value::Int(16)], Vec::new()).unwrap(), Value::Float(4.0));
        assert_eq!(call_module(Module::Math, "floor", vec![Value::Float(2.7)], Vec::new()).unwrap(), Value::Int(2));
        assert!(call_module(Module::Math, "sqrt", vec![Value::Int(-1)], Vec::new()).is_err());
        assert_eq!(module_attr(Module::Math, "pi"), Some(Value::Float(std::f64::consts::PI)));
    }
}
