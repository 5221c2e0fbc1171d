//! PlanScript 词法分析
//!
//! 按缩进生成 Indent / Dedent；括号内的换行不结束逻辑行；`#` 注释与空行忽略。

use crate::sandbox::SandboxError;

#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    Name(String),
    Int(i64),
    Float(f64),
    Str(String),
    /// f-string 原文（已处理转义，保留 `{}`）
    FStr(String),
    Op(&'static str),
    Newline,
    Indent,
    Dedent,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub tok: Tok,
    pub line: usize,
}

const OPERATORS: &[&str] = &[
    "**=", "//=", "**", "//", "==", "!=", "<=", ">=", "+=", "-=", "*=", "/=", "%=", "->", "+",
    "-", "*", "/", "%", "<", ">", "=", "(", ")", "[", "]", "{", "}", ",", ":", ".", ";",
];

pub fn tokenize(source: &str) -> Result<Vec<Token>, SandboxError> {
    Lexer::new(source).run()
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    depth: usize,
    indents: Vec<usize>,
    tokens: Vec<Token>,
}

impl Lexer {
    fn new(source: &str) -> Self {
        Self {
            chars: source.replace("\r\n", "\n").chars().collect(),
            pos: 0,
            line: 1,
            depth: 0,
            indents: vec![0],
            tokens: Vec::new(),
        }
    }

    fn peek(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn push(&mut self, tok: Tok) {
        self.tokens.push(Token {
            tok,
            line: self.line,
        });
    }

    fn run(mut self) -> Result<Vec<Token>, SandboxError> {
        let mut at_line_start = true;
        while self.pos < self.chars.len() {
            if at_line_start && self.depth == 0 {
                // 空行与纯注释行不参与缩进计算，下一行仍按行首处理
                at_line_start = self.handle_indentation()?;
                if at_line_start {
                    continue;
                }
            }
            let c = match self.peek(0) {
                Some(c) => c,
                None => break,
            };
            match c {
                ' ' | '\t' => self.pos += 1,
                '#' => {
                    while matches!(self.peek(0), Some(ch) if ch != '\n') {
                        self.pos += 1;
                    }
                }
                '\n' => {
                    self.pos += 1;
                    if self.depth == 0 {
                        self.end_logical_line();
                        at_line_start = true;
                    }
                    self.line += 1;
                }
                '\\' if self.peek(1) == Some('\n') => {
                    self.pos += 2;
                    self.line += 1;
                }
                c if c.is_ascii_digit() || (c == '.' && matches!(self.peek(1), Some(d) if d.is_ascii_digit())) => {
                    self.number()?
                }
                c if c == '"' || c == '\'' => self.string(false, false)?,
                c if c.is_alphabetic() || c == '_' => self.name_or_prefixed_string()?,
                _ => self.operator()?,
            }
        }
        self.end_logical_line();
        while self.indents.len() > 1 {
            self.indents.pop();
            self.push(Tok::Dedent);
        }
        self.push(Tok::Eof);
        Ok(self.tokens)
    }

    fn end_logical_line(&mut self) {
        if !matches!(
            self.tokens.last().map(|t| &t.tok),
            None | Some(Tok::Newline) | Some(Tok::Indent) | Some(Tok::Dedent)
        ) {
            self.push(Tok::Newline);
        }
    }

    /// 处理行首缩进；空行 / 纯注释行返回 true（整行跳过）
    fn handle_indentation(&mut self) -> Result<bool, SandboxError> {
        let mut width = 0;
        let mut offset = 0;
        while let Some(c) = self.peek(offset) {
            match c {
                ' ' => width += 1,
                '\t' => width += 4 - width % 4,
                _ => break,
            }
            offset += 1;
        }
        match self.peek(offset) {
            None => {
                self.pos += offset;
                return Ok(true);
            }
            Some('\n') => {
                self.pos += offset + 1;
                self.line += 1;
                return Ok(true);
            }
            Some('#') => {
                self.pos += offset;
                while matches!(self.peek(0), Some(ch) if ch != '\n') {
                    self.pos += 1;
                }
                if self.peek(0) == Some('\n') {
                    self.pos += 1;
                    self.line += 1;
                }
                return Ok(true);
            }
            _ => {}
        }
        self.pos += offset;
        let current = *self.indents.last().unwrap_or(&0);
        if width > current {
            self.indents.push(width);
            self.push(Tok::Indent);
        } else {
            while width < *self.indents.last().unwrap_or(&0) {
                self.indents.pop();
                self.push(Tok::Dedent);
            }
            if width != *self.indents.last().unwrap_or(&0) {
                return Err(SandboxError::syntax(
                    self.line,
                    "unindent does not match any outer indentation level",
                ));
            }
        }
        Ok(false)
    }

    fn number(&mut self) -> Result<(), SandboxError> {
        let start = self.pos;
        let mut is_float = false;
        while let Some(c) = self.peek(0) {
            if c.is_ascii_digit() || c == '_' {
                self.pos += 1;
            } else if c == '.' && !is_float {
                is_float = true;
                self.pos += 1;
            } else if (c == 'e' || c == 'E')
                && matches!(self.peek(1), Some(d) if d.is_ascii_digit() || d == '-' || d == '+')
            {
                is_float = true;
                self.pos += 2;
            } else {
                break;
            }
        }
        let text: String = self.chars[start..self.pos]
            .iter()
            .filter(|c| **c != '_')
            .collect();
        let tok = if is_float {
            text.parse::<f64>().map(Tok::Float).map_err(|_| {
                SandboxError::syntax(self.line, format!("invalid number literal '{text}'"))
            })?
        } else {
            text.parse::<i64>().map(Tok::Int).map_err(|_| {
                SandboxError::syntax(self.line, format!("integer literal too large '{text}'"))
            })?
        };
        self.push(tok);
        Ok(())
    }

    fn name_or_prefixed_string(&mut self) -> Result<(), SandboxError> {
        let start = self.pos;
        while matches!(self.peek(0), Some(c) if c.is_alphanumeric() || c == '_') {
            self.pos += 1;
        }
        let name: String = self.chars[start..self.pos].iter().collect();
        if matches!(self.peek(0), Some('"') | Some('\'')) {
            let lower = name.to_ascii_lowercase();
            if matches!(lower.as_str(), "f" | "r" | "b" | "rf" | "fr" | "rb" | "br" | "u") {
                return self.string(lower.contains('f'), lower.contains('r'));
            }
        }
        self.push(Tok::Name(name));
        Ok(())
    }

    fn string(&mut self, is_fstring: bool, raw: bool) -> Result<(), SandboxError> {
        let quote = self.peek(0).unwrap_or('"');
        let start_line = self.line;
        let triple = self.peek(1) == Some(quote) && self.peek(2) == Some(quote);
        self.pos += if triple { 3 } else { 1 };
        let mut out = String::new();
        loop {
            let c = self
                .peek(0)
                .ok_or_else(|| SandboxError::syntax(start_line, "unterminated string literal"))?;
            if c == quote {
                if !triple {
                    self.pos += 1;
                    break;
                }
                if self.peek(1) == Some(quote) && self.peek(2) == Some(quote) {
                    self.pos += 3;
                    break;
                }
            }
            if c == '\n' {
                if !triple {
                    return Err(SandboxError::syntax(start_line, "unterminated string literal"));
                }
                self.line += 1;
            }
            if c == '\\' {
                let next = self
                    .peek(1)
                    .ok_or_else(|| SandboxError::syntax(start_line, "unterminated string literal"))?;
                self.pos += 2;
                if raw {
                    out.push('\\');
                    out.push(next);
                    continue;
                }
                match next {
                    'n' => out.push('\n'),
                    't' => out.push('\t'),
                    'r' => out.push('\r'),
                    '0' => out.push('\0'),
                    '\\' => out.push('\\'),
                    '\'' => out.push('\''),
                    '"' => out.push('"'),
                    '\n' => self.line += 1,
                    'x' => out.push(self.hex_escape(2, start_line)?),
                    'u' => out.push(self.hex_escape(4, start_line)?),
                    other => {
                        out.push('\\');
                        out.push(other);
                    }
                }
                continue;
            }
            out.push(c);
            self.pos += 1;
        }
        self.push(if is_fstring { Tok::FStr(out) } else { Tok::Str(out) });
        Ok(())
    }

    fn hex_escape(&mut self, digits: usize, line: usize) -> Result<char, SandboxError> {
        let text: String = (0..digits).filter_map(|i| self.peek(i)).collect();
        let code = u32::from_str_radix(&text, 16)
            .ok()
            .filter(|_| text.len() == digits)
            .and_then(char::from_u32)
            .ok_or_else(|| SandboxError::syntax(line, format!("invalid escape '\\{text}'")))?;
        self.pos += digits;
        Ok(code)
    }

    fn operator(&mut self) -> Result<(), SandboxError> {
        for op in OPERATORS {
            let len = op.len();
            let matches = op
                .chars()
                .enumerate()
                .all(|(i, c)| self.peek(i) == Some(c));
            if matches {
                self.pos += len;
                match *op {
                    "(" | "[" | "{" => self.depth += 1,
                    ")" | "]" | "}" => self.depth = self.depth.saturating_sub(1),
                    _ => {}
                }
                self.push(Tok::Op(op));
                return Ok(());
            }
        }
        Err(SandboxError::syntax(
            self.line,
            format!("unexpected character '{}'", self.peek(0).unwrap_or(' ')),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<Tok> {
        tokenize(src).unwrap().into_iter().map(|t| t.tok).collect()
    }

    #[test]
    fn test_indent_dedent_pairs() {
        let toks = kinds("def solve():\n    x = 1\n    return x\n");
        let indents = toks.iter().filter(|t| **t == Tok::Indent).count();
        let dedents = toks.iter().filter(|t| **t == Tok::Dedent).count();
        assert_eq!(indents, 1);
        assert_eq!(dedents, 1);
        assert_eq!(toks.last(), Some(&Tok::Eof));
    }

    #[test]
    fn test_newlines_inside_brackets_ignored() {
        let toks = kinds("x = {\n  'a': 1,\n  'b': 2\n}\n");
        assert_eq!(toks.iter().filter(|t| **t == Tok::Newline).count(), 1);
    }

    #[test]
    fn test_string_prefixes_and_escapes() {
        let toks = kinds("a = f\"v={x}\\n\"\nb = r'\\d+'\n");
        assert!(toks.contains(&Tok::FStr("v={x}\n".into())));
        assert!(toks.contains(&Tok::Str("\\d+".into())));
    }

    #[test]
    fn test_bad_dedent_is_syntax_error() {
        let err = tokenize("if x:\n    y = 1\n  z = 2\n").unwrap_err();
        assert!(matches!(err, SandboxError::Syntax { line: 3, .. }));
    }

    #[test]
    fn test_comments_and_blank_lines_skipped() {
        let toks = kinds("# plan\n\nx = 1  # one\n\n");
        assert_eq!(
            toks,
            vec![
                Tok::Name("x".into()),
                Tok::Op("="),
                Tok::Int(1),
                Tok::Newline,
                Tok::Eof
            ]
        );
    }

    #[test]
    fn test_dedent_after_blank_and_comment_lines() {
        for gap in ["\n", "    # note\n", "\n# note\n\n"] {
            let src = format!("def solve():\n    for i in xs:\n        x = i\n{gap}    return x\n");
            let toks = kinds(&src);
            let ret = toks.iter().position(|t| *t == Tok::Name("return".into())).unwrap();
            // for 体结束后回到函数体层级
            assert_eq!(toks[ret - 1], Tok::Dedent, "gap {gap:?}");
            assert_eq!(toks.iter().filter(|t| **t == Tok::Indent).count(), 2);
            assert_eq!(toks.iter().filter(|t| **t == Tok::Dedent).count(), 2);
        }
    }

    #[test]
    fn test_line_numbers_survive_skipped_lines() {
        let toks = tokenize("x = 1\n\n# c\ny = 2\n").unwrap();
        let y = toks.iter().find(|t| t.tok == Tok::Name("y".into())).unwrap();
        assert_eq!(y.line, 4);
    }
}
