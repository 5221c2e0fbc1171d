//! 沙箱运行时的值
//!
//! 语义向 Python 靠拢：真值判断、`str()` / `repr()` 文本形式、`json.dumps` 的默认输出格式。
//! dict 保持插入顺序，键可以是任意标量。

use std::fmt::Write;

use serde_json::Number;

use crate::sandbox::SandboxError;

/// 可从计划里直接引用的内置模块
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Module {
    Json,
    Re,
    Math,
    /// 唯一对外能力：受预算约束的工具调用句柄
    Mcp,
}

impl Module {
    pub fn name(&self) -> &'static str {
        match self {
            Module::Json => "json",
            Module::Re => "re",
            Module::Math => "math",
            Module::Mcp => "mcp",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Dict(Vec<(Value, Value)>),
    Module(Module),
    /// 计划里 def 出来的函数（按名引用）
    Function(String),
}

impl Value {
    pub fn str(s: impl Into<String>) -> Self {
        Value::Str(s.into())
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Dict(_) => "dict",
            Value::Module(_) => "module",
            Value::Function(_) => "function",
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(l) => !l.is_empty(),
            Value::Dict(d) => !d.is_empty(),
            Value::Module(_) | Value::Function(_) => true,
        }
    }

    /// 数值视图（bool 按 0/1 参与运算）
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Bool(b) => Some(*b as i64),
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn dict_get(&self, key: &Value) -> Option<&Value> {
        match self {
            Value::Dict(entries) => entries
                .iter()
                .find(|(k, _)| values_equal(k, key))
                .map(|(_, v)| v),
            _ => None,
        }
    }

    /// 可迭代对象展开为元素列表：list、str（逐字符）、dict（键）
    pub fn iter_items(&self) -> Result<Vec<Value>, SandboxError> {
        match self {
            Value::List(items) => Ok(items.clone()),
            Value::Str(s) => Ok(s.chars().map(|c| Value::Str(c.to_string())).collect()),
            Value::Dict(entries) => Ok(entries.iter().map(|(k, _)| k.clone()).collect()),
            other => Err(SandboxError::runtime(format!(
                "'{}' object is not iterable",
                other.type_name()
            ))),
        }
    }

    /// Python `str()`
    pub fn to_display(&self) -> String {
        match self {
            Value::Str(s) => s.clone(),
            other => other.repr(),
        }
    }

    /// Python `repr()`
    pub fn repr(&self) -> String {
        match self {
            Value::None => "None".to_string(),
            Value::Bool(true) => "True".to_string(),
            Value::Bool(false) => "False".to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => format_float(*f),
            Value::Str(s) => repr_str(s),
            Value::List(items) => {
                let inner: Vec<String> = items.iter().map(Value::repr).collect();
                format!("[{}]", inner.join(", "))
            }
            Value::Dict(entries) => {
                let inner: Vec<String> = entries
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k.repr(), v.repr()))
                    .collect();
                format!("{{{}}}", inner.join(", "))
            }
            Value::Module(m) => format!("<module '{}'>", m.name()),
            Value::Function(name) => format!("<function {}>", name),
        }
    }

    /// Python `json.dumps(value)` 的默认格式（`", "` / `": "` 分隔，ensure_ascii）
    pub fn to_json_text(&self) -> Result<String, SandboxError> {
        let mut out = String::new();
        write_json(self, &mut out)?;
        Ok(out)
    }

    pub fn from_json(json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::None,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::Str(s.clone()),
            serde_json::Value::Array(items) => Value::List(items.iter().map(Value::from_json).collect()),
            serde_json::Value::Object(map) => Value::Dict(
                map.iter()
                    .map(|(k, v)| (Value::Str(k.clone()), Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// 转为 JSON（工具参数）；非字符串键取其 `str()`，NaN / inf 变为 null
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::None => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::Number((*i).into()),
            Value::Float(f) => Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Str(s) => serde_json::Value::String(s.clone()),
            Value::List(items) => serde_json::Value::Array(items.iter().map(Value::to_json).collect()),
            Value::Dict(entries) => serde_json::Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.to_display(), v.to_json()))
                    .collect(),
            ),
            Value::Module(_) | Value::Function(_) => serde_json::Value::String(self.repr()),
        }
    }
}

/// 相等比较：int / float / bool 跨类型按数值比
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::List(x), Value::List(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(p, q)| values_equal(p, q))
        }
        (Value::Dict(x), Value::Dict(y)) => {
            x.len() == y.len()
                && x.iter().all(|(k, v)| {
                    b.dict_get(k).map(|other| values_equal(v, other)).unwrap_or(false)
                })
                && y.iter().all(|(k, _)| a.dict_get(k).is_some())
        }
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => a == b,
        },
    }
}

/// Python float repr：整数值保留 `.0`，极大/极小值用带符号两位指数
pub fn format_float(f: f64) -> String {
    if f.is_nan() {
        return "nan".to_string();
    }
    if f.is_infinite() {
        return if f > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    let abs = f.abs();
    if abs != 0.0 && !(1e-4..1e16).contains(&abs) {
        let s = format!("{:e}", f);
        let (mantissa, exp) = s.split_once('e').unwrap_or((&s, "0"));
        let (sign, digits) = match exp.strip_prefix('-') {
            Some(d) => ('-', d),
            None => ('+', exp),
        };
        return format!("{}e{}{:0>2}", mantissa, sign, digits);
    }
    if f.fract() == 0.0 {
        format!("{:.1}", f)
    } else {
        format!("{}", f)
    }
}

fn repr_str(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') { '"' } else { '\'' };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

fn write_json_str(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 || (c as u32) > 0x7e => {
                let mut buf = [0u16; 2];
                for unit in c.encode_utf16(&mut buf) {
                    let _ = write!(out, "\\u{:04x}", unit);
                }
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

fn write_json(value: &Value, out: &mut String) -> Result<(), SandboxError> {
    match value {
        Value::None => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Int(i) => out.push_str(&i.to_string()),
        Value::Float(f) if f.is_nan() => out.push_str("NaN"),
        Value::Float(f) if f.is_infinite() => {
            out.push_str(if *f > 0.0 { "Infinity" } else { "-Infinity" })
        }
        Value::Float(f) => out.push_str(&format_float(*f)),
        Value::Str(s) => write_json_str(s, out),
        Value::List(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_json(item, out)?;
            }
            out.push(']');
        }
        Value::Dict(entries) => {
            out.push('{');
            for (i, (k, v)) in entries.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                let key = match k {
                    Value::Str(s) => s.clone(),
                    Value::None => "null".to_string(),
                    Value::Bool(b) => b.to_string(),
                    Value::Int(_) | Value::Float(_) => k.repr(),
                    other => {
                        return Err(SandboxError::runtime(format!(
                            "keys must be str, int, float, bool or None, not {}",
                            other.type_name()
                        )))
                    }
                };
                write_json_str(&key, out);
                out.push_str(": ");
                write_json(v, out)?;
            }
            out.push('}');
        }
        Value::Module(_) | Value::Function(_) => {
            return Err(SandboxError::runtime(format!(
                "Object of type {} is not JSON serializable",
                value.type_name()
            )))
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_python_str_forms() {
        assert_eq!(Value::Float(7.0).to_display(), "7.0");
        assert_eq!(Value::Float(0.1).to_display(), "0.1");
        assert_eq!(Value::Float(1e20).to_display(), "1e+20");
        assert_eq!(Value::Float(2.5e-7).to_display(), "2.5e-07");
        assert_eq!(Value::Bool(true).to_display(), "True");
        assert_eq!(Value::None.to_display(), "None");
        let list = Value::List(vec![Value::Int(1), Value::str("a"), Value::None]);
        assert_eq!(list.to_display(), "[1, 'a', None]");
    }

    #[test]
    fn test_json_dumps_default_separators() {
        let dict = Value::Dict(vec![
            (Value::str("a"), Value::Int(1)),
            (Value::str("b"), Value::List(vec![Value::Bool(true), Value::None])),
        ]);
        assert_eq!(dict.to_json_text().unwrap(), r#"{"a": 1, "b": [true, null]}"#);
        assert_eq!(Value::str("é").to_json_text().unwrap(), r#""\u00e9""#);
    }

    #[test]
    fn test_numeric_equality_across_types() {
        assert!(values_equal(&Value::Int(1), &Value::Float(1.0)));
        assert!(values_equal(&Value::Bool(true), &Value::Int(1)));
        assert!(!values_equal(&Value::str("1"), &Value::Int(1)));
    }
}
