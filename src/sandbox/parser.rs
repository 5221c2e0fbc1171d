//! PlanScript 递归下降解析
//!
//! 覆盖计划常用的 Python 子集：def / async def、if-elif-else、for、try-except-finally、
//! 赋值与增量赋值、列表推导、f-string、lambda。`while`、class、with 等直接报语法错误。

use crate::sandbox::ast::*;
use crate::sandbox::lexer::{tokenize, Tok, Token};
use crate::sandbox::value::Value;
use crate::sandbox::SandboxError;

const KEYWORDS: &[&str] = &[
    "and", "as", "assert", "async", "await", "break", "class", "continue", "def", "del", "elif",
    "else", "except", "finally", "for", "from", "global", "if", "import", "in", "is", "lambda",
    "nonlocal", "not", "or", "pass", "raise", "return", "try", "while", "with", "yield",
];

pub fn parse(source: &str) -> Result<Program, SandboxError> {
    let tokens = tokenize(source)?;
    Parser::new(tokens, 0).program()
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    /// lambda 被提升为具名函数 `<lambda:N>`
    lambdas: Vec<FunctionDef>,
    lambda_base: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>, lambda_base: usize) -> Self {
        Self {
            tokens,
            pos: 0,
            lambdas: Vec::new(),
            lambda_base,
        }
    }

    // ---------- 游标 ----------

    fn peek(&self) -> &Tok {
        self.peek_at(0)
    }

    fn peek_at(&self, offset: usize) -> &Tok {
        self.tokens
            .get(self.pos + offset)
            .or_else(|| self.tokens.last())
            .map(|t| &t.tok)
            .unwrap_or(&Tok::Eof)
    }

    fn line(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|t| t.line)
            .unwrap_or(1)
    }

    fn error(&self, message: impl Into<String>) -> SandboxError {
        SandboxError::syntax(self.line(), message)
    }

    fn unexpected(&self) -> SandboxError {
        let found = match self.peek() {
            Tok::Name(n) => format!("'{}'", n),
            Tok::Int(i) => i.to_string(),
            Tok::Float(f) => f.to_string(),
            Tok::Str(_) | Tok::FStr(_) => "string literal".to_string(),
            Tok::Op(op) => format!("'{}'", op),
            Tok::Newline => "end of line".to_string(),
            Tok::Indent => "indent".to_string(),
            Tok::Dedent => "dedent".to_string(),
            Tok::Eof => "end of input".to_string(),
        };
        self.error(format!("invalid syntax near {}", found))
    }

    fn is_op(&self, op: &str) -> bool {
        matches!(self.peek(), Tok::Op(o) if *o == op)
    }

    fn eat_op(&mut self, op: &str) -> bool {
        if self.is_op(op) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_op(&mut self, op: &str) -> Result<(), SandboxError> {
        if self.eat_op(op) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{}'", op)))
        }
    }

    fn is_kw(&self, kw: &str) -> bool {
        matches!(self.peek(), Tok::Name(n) if n == kw)
    }

    fn eat_kw(&mut self, kw: &str) -> bool {
        if self.is_kw(kw) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_kw(&mut self, kw: &str) -> Result<(), SandboxError> {
        if self.eat_kw(kw) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{}'", kw)))
        }
    }

    fn expect_name(&mut self) -> Result<String, SandboxError> {
        match self.peek().clone() {
            Tok::Name(n) if !KEYWORDS.contains(&n.as_str()) => {
                self.pos += 1;
                Ok(n)
            }
            _ => Err(self.unexpected()),
        }
    }

    fn at_line_end(&self) -> bool {
        matches!(self.peek(), Tok::Newline | Tok::Eof) || self.is_op(";")
    }

    fn starts_expr(&self) -> bool {
        match self.peek() {
            Tok::Name(n) => {
                !KEYWORDS.contains(&n.as_str()) || matches!(n.as_str(), "not" | "await" | "lambda")
            }
            Tok::Int(_) | Tok::Float(_) | Tok::Str(_) | Tok::FStr(_) => true,
            Tok::Op(op) => matches!(*op, "(" | "[" | "{" | "-" | "+"),
            _ => false,
        }
    }

    // ---------- 语句 ----------

    fn program(mut self) -> Result<Program, SandboxError> {
        let mut program = Program::default();
        loop {
            match self.peek() {
                Tok::Eof => break,
                Tok::Newline => self.pos += 1,
                _ => {
                    for stmt in self.statement()? {
                        match stmt.kind {
                            StmtKind::FunctionDef(def) => program.functions.push(def),
                            _ => program.body.push(stmt),
                        }
                    }
                }
            }
        }
        program.functions.append(&mut self.lambdas);
        Ok(program)
    }

    fn statement(&mut self) -> Result<Vec<Stmt>, SandboxError> {
        let line = self.line();
        let keyword = match self.peek() {
            Tok::Indent => return Err(self.error("unexpected indent")),
            Tok::Name(n) => n.clone(),
            _ => String::new(),
        };
        let kind = match keyword.as_str() {
            "def" => StmtKind::FunctionDef(self.function_def(false)?),
            "async" => {
                self.pos += 1;
                if !self.is_kw("def") {
                    return Err(self.error("expected 'def' after 'async'"));
                }
                StmtKind::FunctionDef(self.function_def(true)?)
            }
            "if" => self.if_stmt()?,
            "for" => self.for_stmt()?,
            "try" => self.try_stmt()?,
            "while" => return Err(self.error("'while' loops are not supported in plans")),
            "class" | "with" | "global" | "nonlocal" | "del" | "yield" => {
                return Err(self.error(format!("'{}' is not supported in plans", keyword)))
            }
            _ => return self.simple_line(),
        };
        Ok(vec![Stmt { line, kind }])
    }

    fn block(&mut self) -> Result<Vec<Stmt>, SandboxError> {
        self.expect_op(":")?;
        if !matches!(self.peek(), Tok::Newline) {
            return self.simple_line();
        }
        self.pos += 1;
        if !matches!(self.peek(), Tok::Indent) {
            return Err(self.error("expected an indented block"));
        }
        self.pos += 1;
        let mut body = Vec::new();
        loop {
            match self.peek() {
                Tok::Dedent => {
                    self.pos += 1;
                    break;
                }
                Tok::Eof => break,
                Tok::Newline => self.pos += 1,
                _ => body.extend(self.statement()?),
            }
        }
        Ok(body)
    }

    fn function_def(&mut self, is_async: bool) -> Result<FunctionDef, SandboxError> {
        let line = self.line();
        self.expect_kw("def")?;
        let name = self.expect_name()?;
        self.expect_op("(")?;
        let mut params = Vec::new();
        while !self.eat_op(")") {
            if self.is_op("*") || self.is_op("**") {
                return Err(self.error("variadic parameters are not supported in plans"));
            }
            let param = self.expect_name()?;
            if self.eat_op(":") {
                self.test()?;
            }
            let default = if self.eat_op("=") {
                Some(self.test()?)
            } else {
                None
            };
            params.push(Param {
                name: param,
                default,
            });
            if !self.eat_op(",") {
                self.expect_op(")")?;
                break;
            }
        }
        if self.eat_op("->") {
            self.test()?;
        }
        let body = self.block()?;
        Ok(FunctionDef {
            name,
            params,
            body,
            is_async,
            line,
        })
    }

    /// 当前位置为 `if` 或 `elif`
    fn if_stmt(&mut self) -> Result<StmtKind, SandboxError> {
        self.pos += 1;
        let test = self.test()?;
        let body = self.block()?;
        let orelse = if self.is_kw("elif") {
            let line = self.line();
            vec![Stmt {
                line,
                kind: self.if_stmt()?,
            }]
        } else if self.eat_kw("else") {
            self.block()?
        } else {
            Vec::new()
        };
        Ok(StmtKind::If { test, body, orelse })
    }

    fn for_stmt(&mut self) -> Result<StmtKind, SandboxError> {
        self.pos += 1;
        let target = self.target_list()?;
        self.expect_kw("in")?;
        let iter = self.testlist()?;
        let body = self.block()?;
        if self.is_kw("else") {
            return Err(self.error("'for ... else' is not supported in plans"));
        }
        Ok(StmtKind::For { target, iter, body })
    }

    fn try_stmt(&mut self) -> Result<StmtKind, SandboxError> {
        self.pos += 1;
        let body = self.block()?;
        let mut handlers = Vec::new();
        while self.eat_kw("except") {
            let kind = if self.is_op(":") {
                None
            } else {
                match self.test()? {
                    Expr::Name(n) => Some(n),
                    _ => Some("Exception".to_string()),
                }
            };
            let name = if self.eat_kw("as") {
                Some(self.expect_name()?)
            } else {
                None
            };
            let body = self.block()?;
            handlers.push(ExceptHandler { kind, name, body });
        }
        if self.is_kw("else") {
            return Err(self.error("'try ... else' is not supported in plans"));
        }
        let finally = if self.eat_kw("finally") {
            self.block()?
        } else {
            Vec::new()
        };
        if handlers.is_empty() && finally.is_empty() {
            return Err(self.error("expected 'except' or 'finally' block"));
        }
        Ok(StmtKind::Try {
            body,
            handlers,
            finally,
        })
    }

    fn simple_line(&mut self) -> Result<Vec<Stmt>, SandboxError> {
        let mut stmts = Vec::new();
        loop {
            let line = self.line();
            let kind = self.simple_stmt()?;
            stmts.push(Stmt { line, kind });
            if self.eat_op(";") && !matches!(self.peek(), Tok::Newline | Tok::Eof) {
                continue;
            }
            break;
        }
        match self.peek() {
            Tok::Newline => {
                self.pos += 1;
                Ok(stmts)
            }
            Tok::Eof => Ok(stmts),
            _ => Err(self.unexpected()),
        }
    }

    fn simple_stmt(&mut self) -> Result<StmtKind, SandboxError> {
        if self.eat_kw("pass") {
            return Ok(StmtKind::Pass);
        }
        if self.eat_kw("break") {
            return Ok(StmtKind::Break);
        }
        if self.eat_kw("continue") {
            return Ok(StmtKind::Continue);
        }
        if self.eat_kw("return") {
            let value = if self.at_line_end() {
                None
            } else {
                Some(self.testlist()?)
            };
            return Ok(StmtKind::Return(value));
        }
        if self.eat_kw("raise") {
            if self.at_line_end() {
                return Ok(StmtKind::Raise(None));
            }
            let exc = self.test()?;
            if self.eat_kw("from") {
                self.test()?;
            }
            return Ok(StmtKind::Raise(Some(exc)));
        }
        if self.eat_kw("import") {
            let mut modules = Vec::new();
            loop {
                modules.push(self.dotted_name()?);
                if self.eat_kw("as") {
                    self.expect_name()?;
                }
                if !self.eat_op(",") {
                    break;
                }
            }
            return Ok(StmtKind::Import(modules));
        }
        if self.eat_kw("from") {
            let module = self.dotted_name()?;
            self.expect_kw("import")?;
            let parens = self.eat_op("(");
            loop {
                if !self.eat_op("*") {
                    self.expect_name()?;
                }
                if self.eat_kw("as") {
                    self.expect_name()?;
                }
                if !self.eat_op(",") {
                    break;
                }
            }
            if parens {
                self.expect_op(")")?;
            }
            return Ok(StmtKind::Import(vec![module]));
        }
        if self.eat_kw("assert") {
            let test = self.test()?;
            let args = if self.eat_op(",") {
                vec![self.test()?]
            } else {
                Vec::new()
            };
            let line = self.line();
            return Ok(StmtKind::If {
                test: Expr::Unary(UnaryOp::Not, Box::new(test)),
                body: vec![Stmt {
                    line,
                    kind: StmtKind::Raise(Some(Expr::Call {
                        func: Box::new(Expr::Name("AssertionError".to_string())),
                        args,
                        kwargs: Vec::new(),
                    })),
                }],
                orelse: Vec::new(),
            });
        }

        let first = self.testlist()?;
        if self.is_op("=") {
            let mut targets = vec![self.to_target(first)?];
            loop {
                self.expect_op("=")?;
                let next = self.testlist()?;
                if self.is_op("=") {
                    targets.push(self.to_target(next)?);
                } else {
                    return Ok(StmtKind::Assign(targets, next));
                }
            }
        }
        if let Some(op) = self.aug_op() {
            self.pos += 1;
            let target = self.to_target(first)?;
            let value = self.testlist()?;
            return Ok(StmtKind::AugAssign(target, op, value));
        }
        if self.eat_op(":") {
            // 带类型注解的赋值 `x: int = 1`
            self.test()?;
            let target = self.to_target(first)?;
            if self.eat_op("=") {
                let value = self.testlist()?;
                return Ok(StmtKind::Assign(vec![target], value));
            }
            return Ok(StmtKind::Pass);
        }
        Ok(StmtKind::Expr(first))
    }

    fn dotted_name(&mut self) -> Result<String, SandboxError> {
        let first = self.expect_name()?;
        while self.eat_op(".") {
            self.expect_name()?;
        }
        Ok(first)
    }

    fn aug_op(&self) -> Option<BinOp> {
        match self.peek() {
            Tok::Op("+=") => Some(BinOp::Add),
            Tok::Op("-=") => Some(BinOp::Sub),
            Tok::Op("*=") => Some(BinOp::Mul),
            Tok::Op("/=") => Some(BinOp::Div),
            Tok::Op("//=") => Some(BinOp::FloorDiv),
            Tok::Op("%=") => Some(BinOp::Mod),
            Tok::Op("**=") => Some(BinOp::Pow),
            _ => None,
        }
    }

    fn to_target(&self, expr: Expr) -> Result<Target, SandboxError> {
        match expr {
            Expr::Name(n) => Ok(Target::Name(n)),
            Expr::Tuple(items) | Expr::List(items) => Ok(Target::Tuple(
                items
                    .into_iter()
                    .map(|e| self.to_target(e))
                    .collect::<Result<_, _>>()?,
            )),
            Expr::Index(obj, index) => Ok(Target::Index(*obj, *index)),
            Expr::Attr(_, attr) => Err(self.error(format!(
                "cannot assign to attribute '{}' in plans",
                attr
            ))),
            _ => Err(self.error("cannot assign to expression")),
        }
    }

    /// for / 推导式的目标：不解析比较运算，避免吞掉 `in`
    fn target_list(&mut self) -> Result<Target, SandboxError> {
        let mut items = vec![self.arith()?];
        let mut is_tuple = false;
        while self.eat_op(",") {
            is_tuple = true;
            if self.is_kw("in") {
                break;
            }
            items.push(self.arith()?);
        }
        let expr = if is_tuple {
            Expr::Tuple(items)
        } else {
            items.remove(0)
        };
        self.to_target(expr)
    }

    // ---------- 表达式 ----------

    fn testlist(&mut self) -> Result<Expr, SandboxError> {
        let first = self.test()?;
        if !self.is_op(",") {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if !self.starts_expr() {
                break;
            }
            items.push(self.test()?);
        }
        Ok(Expr::Tuple(items))
    }

    fn test(&mut self) -> Result<Expr, SandboxError> {
        if self.is_kw("lambda") {
            return self.lambda();
        }
        let body = self.or_test()?;
        if self.eat_kw("if") {
            let test = self.or_test()?;
            self.expect_kw("else")?;
            let orelse = self.test()?;
            return Ok(Expr::IfExp {
                test: Box::new(test),
                body: Box::new(body),
                orelse: Box::new(orelse),
            });
        }
        Ok(body)
    }

    fn lambda(&mut self) -> Result<Expr, SandboxError> {
        let line = self.line();
        self.expect_kw("lambda")?;
        let mut params = Vec::new();
        while !self.is_op(":") {
            let name = self.expect_name()?;
            let default = if self.eat_op("=") {
                Some(self.test()?)
            } else {
                None
            };
            params.push(Param { name, default });
            if !self.eat_op(",") {
                break;
            }
        }
        self.expect_op(":")?;
        let body = self.test()?;
        let name = format!("<lambda:{}>", self.lambda_base + self.lambdas.len());
        self.lambdas.push(FunctionDef {
            name: name.clone(),
            params,
            body: vec![Stmt {
                line,
                kind: StmtKind::Return(Some(body)),
            }],
            is_async: false,
            line,
        });
        Ok(Expr::Lambda(name))
    }

    fn or_test(&mut self) -> Result<Expr, SandboxError> {
        let first = self.and_test()?;
        if !self.is_kw("or") {
            return Ok(first);
        }
        let mut values = vec![first];
        while self.eat_kw("or") {
            values.push(self.and_test()?);
        }
        Ok(Expr::BoolOp {
            is_and: false,
            values,
        })
    }

    fn and_test(&mut self) -> Result<Expr, SandboxError> {
        let first = self.not_test()?;
        if !self.is_kw("and") {
            return Ok(first);
        }
        let mut values = vec![first];
        while self.eat_kw("and") {
            values.push(self.not_test()?);
        }
        Ok(Expr::BoolOp {
            is_and: true,
            values,
        })
    }

    fn not_test(&mut self) -> Result<Expr, SandboxError> {
        if self.eat_kw("not") {
            let operand = self.not_test()?;
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(operand)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, SandboxError> {
        let left = self.arith()?;
        let mut ops = Vec::new();
        loop {
            let op = match self.peek() {
                Tok::Op("==") => CmpOp::Eq,
                Tok::Op("!=") => CmpOp::NotEq,
                Tok::Op("<") => CmpOp::Lt,
                Tok::Op("<=") => CmpOp::LtE,
                Tok::Op(">") => CmpOp::Gt,
                Tok::Op(">=") => CmpOp::GtE,
                Tok::Name(n) if n == "in" => CmpOp::In,
                Tok::Name(n) if n == "not" && matches!(self.peek_at(1), Tok::Name(m) if m == "in") => {
                    self.pos += 1;
                    CmpOp::NotIn
                }
                Tok::Name(n) if n == "is" => {
                    if matches!(self.peek_at(1), Tok::Name(m) if m == "not") {
                        self.pos += 1;
                        CmpOp::IsNot
                    } else {
                        CmpOp::Is
                    }
                }
                _ => break,
            };
            self.pos += 1;
            ops.push((op, self.arith()?));
        }
        if ops.is_empty() {
            Ok(left)
        } else {
            Ok(Expr::Compare(Box::new(left), ops))
        }
    }

    fn arith(&mut self) -> Result<Expr, SandboxError> {
        let mut left = self.term()?;
        loop {
            let op = match self.peek() {
                Tok::Op("+") => BinOp::Add,
                Tok::Op("-") => BinOp::Sub,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.term()?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
    }

    fn term(&mut self) -> Result<Expr, SandboxError> {
        let mut left = self.factor()?;
        loop {
            let op = match self.peek() {
                Tok::Op("*") => BinOp::Mul,
                Tok::Op("/") => BinOp::Div,
                Tok::Op("//") => BinOp::FloorDiv,
                Tok::Op("%") => BinOp::Mod,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.factor()?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
    }

    fn factor(&mut self) -> Result<Expr, SandboxError> {
        if self.eat_op("-") {
            return Ok(Expr::Unary(UnaryOp::Neg, Box::new(self.factor()?)));
        }
        if self.eat_op("+") {
            return Ok(Expr::Unary(UnaryOp::Pos, Box::new(self.factor()?)));
        }
        self.power()
    }

    fn power(&mut self) -> Result<Expr, SandboxError> {
        let base = if self.eat_kw("await") {
            Expr::Await(Box::new(self.primary()?))
        } else {
            self.primary()?
        };
        if self.eat_op("**") {
            let exponent = self.factor()?;
            return Ok(Expr::Binary(Box::new(base), BinOp::Pow, Box::new(exponent)));
        }
        Ok(base)
    }

    fn primary(&mut self) -> Result<Expr, SandboxError> {
        let mut expr = self.atom()?;
        loop {
            if self.eat_op(".") {
                let attr = match self.peek().clone() {
                    Tok::Name(n) => {
                        self.pos += 1;
                        n
                    }
                    _ => return Err(self.unexpected()),
                };
                expr = Expr::Attr(Box::new(expr), attr);
            } else if self.eat_op("(") {
                expr = self.call(expr)?;
            } else if self.eat_op("[") {
                expr = self.subscript(expr)?;
            } else {
                return Ok(expr);
            }
        }
    }

    fn call(&mut self, func: Expr) -> Result<Expr, SandboxError> {
        let mut args = Vec::new();
        let mut kwargs = Vec::new();
        while !self.eat_op(")") {
            if self.is_op("*") || self.is_op("**") {
                return Err(self.error("argument unpacking is not supported in plans"));
            }
            let is_kwarg = matches!(self.peek(), Tok::Name(_)) && matches!(self.peek_at(1), Tok::Op("="));
            if is_kwarg {
                let name = self.expect_name()?;
                self.expect_op("=")?;
                kwargs.push((name, self.test()?));
            } else {
                let arg = self.test()?;
                if self.is_kw("for") {
                    args.push(self.comprehension(arg)?);
                } else {
                    args.push(arg);
                }
            }
            if !self.eat_op(",") {
                self.expect_op(")")?;
                break;
            }
        }
        Ok(Expr::Call {
            func: Box::new(func),
            args,
            kwargs,
        })
    }

    fn subscript(&mut self, value: Expr) -> Result<Expr, SandboxError> {
        let lower = if self.is_op(":") {
            None
        } else {
            let index = self.test()?;
            if !self.is_op(":") {
                self.expect_op("]")?;
                return Ok(Expr::Index(Box::new(value), Box::new(index)));
            }
            Some(Box::new(index))
        };
        self.expect_op(":")?;
        let upper = if self.is_op("]") || self.is_op(":") {
            None
        } else {
            Some(Box::new(self.test()?))
        };
        let step = if self.eat_op(":") && !self.is_op("]") {
            Some(Box::new(self.test()?))
        } else {
            None
        };
        self.expect_op("]")?;
        Ok(Expr::Slice {
            value: Box::new(value),
            lower,
            upper,
            step,
        })
    }

    fn comprehension(&mut self, element: Expr) -> Result<Expr, SandboxError> {
        self.expect_kw("for")?;
        let target = self.target_list()?;
        self.expect_kw("in")?;
        let iter = self.or_test()?;
        let mut conditions = Vec::new();
        while self.eat_kw("if") {
            conditions.push(self.or_test()?);
        }
        if self.is_kw("for") {
            return Err(self.error("nested comprehensions are not supported in plans"));
        }
        Ok(Expr::ListComp {
            element: Box::new(element),
            target: Box::new(target),
            iter: Box::new(iter),
            conditions,
        })
    }

    fn atom(&mut self) -> Result<Expr, SandboxError> {
        let line = self.line();
        match self.peek().clone() {
            Tok::Int(i) => {
                self.pos += 1;
                Ok(Expr::Const(Value::Int(i)))
            }
            Tok::Float(f) => {
                self.pos += 1;
                Ok(Expr::Const(Value::Float(f)))
            }
            Tok::Str(_) | Tok::FStr(_) => self.strings(line),
            Tok::Name(n) => match n.as_str() {
                "True" => {
                    self.pos += 1;
                    Ok(Expr::Const(Value::Bool(true)))
                }
                "False" => {
                    self.pos += 1;
                    Ok(Expr::Const(Value::Bool(false)))
                }
                "None" => {
                    self.pos += 1;
                    Ok(Expr::Const(Value::None))
                }
                _ => Ok(Expr::Name(self.expect_name()?)),
            },
            Tok::Op("(") => {
                self.pos += 1;
                if self.eat_op(")") {
                    return Ok(Expr::Tuple(Vec::new()));
                }
                let first = self.test()?;
                if self.is_kw("for") {
                    let comp = self.comprehension(first)?;
                    self.expect_op(")")?;
                    return Ok(comp);
                }
                if self.eat_op(")") {
                    return Ok(first);
                }
                let mut items = vec![first];
                while self.eat_op(",") {
                    if self.is_op(")") {
                        break;
                    }
                    items.push(self.test()?);
                }
                self.expect_op(")")?;
                Ok(Expr::Tuple(items))
            }
            Tok::Op("[") => {
                self.pos += 1;
                if self.eat_op("]") {
                    return Ok(Expr::List(Vec::new()));
                }
                let first = self.test()?;
                if self.is_kw("for") {
                    let comp = self.comprehension(first)?;
                    self.expect_op("]")?;
                    return Ok(comp);
                }
                let mut items = vec![first];
                while self.eat_op(",") {
                    if self.is_op("]") {
                        break;
                    }
                    items.push(self.test()?);
                }
                self.expect_op("]")?;
                Ok(Expr::List(items))
            }
            Tok::Op("{") => {
                self.pos += 1;
                let mut entries = Vec::new();
                while !self.eat_op("}") {
                    let key = self.test()?;
                    if !self.eat_op(":") {
                        return Err(self.error("set literals are not supported in plans"));
                    }
                    let value = self.test()?;
                    if self.is_kw("for") {
                        return Err(self.error("dict comprehensions are not supported in plans"));
                    }
                    entries.push((key, value));
                    if !self.eat_op(",") {
                        self.expect_op("}")?;
                        break;
                    }
                }
                Ok(Expr::Dict(entries))
            }
            _ => Err(self.unexpected()),
        }
    }

    /// 相邻字符串字面量拼接；任一为 f-string 时整体成为 FString
    fn strings(&mut self, line: usize) -> Result<Expr, SandboxError> {
        let mut parts = Vec::new();
        let mut has_fstring = false;
        loop {
            match self.peek().clone() {
                Tok::Str(s) => {
                    self.pos += 1;
                    parts.push(FStringPart::Literal(s));
                }
                Tok::FStr(s) => {
                    self.pos += 1;
                    has_fstring = true;
                    parts.extend(self.fstring_parts(&s, line)?);
                }
                _ => break,
            }
        }
        if !has_fstring {
            let joined: String = parts
                .into_iter()
                .filter_map(|p| match p {
                    FStringPart::Literal(s) => Some(s),
                    FStringPart::Expr(..) => None,
                })
                .collect();
            return Ok(Expr::Const(Value::Str(joined)));
        }
        Ok(Expr::FString(parts))
    }

    fn fstring_parts(&mut self, text: &str, line: usize) -> Result<Vec<FStringPart>, SandboxError> {
        let chars: Vec<char> = text.chars().collect();
        let mut parts = Vec::new();
        let mut literal = String::new();
        let mut i = 0;
        while i < chars.len() {
            match chars[i] {
                '{' if chars.get(i + 1) == Some(&'{') => {
                    literal.push('{');
                    i += 2;
                }
                '}' if chars.get(i + 1) == Some(&'}') => {
                    literal.push('}');
                    i += 2;
                }
                '}' => {
                    return Err(SandboxError::syntax(
                        line,
                        "f-string: single '}' is not allowed",
                    ))
                }
                '{' => {
                    let start = i + 1;
                    let mut depth = 0i32;
                    let mut quote: Option<char> = None;
                    let mut split: Option<usize> = None;
                    let mut j = start;
                    while j < chars.len() {
                        let ch = chars[j];
                        if let Some(q) = quote {
                            if ch == q {
                                quote = None;
                            }
                        } else {
                            match ch {
                                '\'' | '"' => quote = Some(ch),
                                '(' | '[' | '{' => depth += 1,
                                '}' if depth == 0 => break,
                                ')' | ']' | '}' => depth -= 1,
                                '!' if depth == 0 && split.is_none() && chars.get(j + 1) != Some(&'=') => {
                                    split = Some(j)
                                }
                                ':' if depth == 0 && split.is_none() => split = Some(j),
                                _ => {}
                            }
                        }
                        j += 1;
                    }
                    if j >= chars.len() {
                        return Err(SandboxError::syntax(line, "f-string: expecting '}'"));
                    }
                    let expr_src: String = chars[start..split.unwrap_or(j)].iter().collect();
                    let mut conversion = None;
                    let mut spec = None;
                    if let Some(s) = split {
                        let rest: String = chars[s..j].iter().collect();
                        let after_conversion = match rest.strip_prefix('!') {
                            Some(r) => {
                                conversion = r.chars().next();
                                r.get(1..).unwrap_or("").to_string()
                            }
                            None => rest,
                        };
                        if let Some(fmt) = after_conversion.strip_prefix(':') {
                            spec = Some(fmt.to_string());
                        }
                    }
                    let mut expr = self.sub_expression(&expr_src, line)?;
                    if conversion == Some('r') {
                        expr = Expr::Call {
                            func: Box::new(Expr::Name("repr".to_string())),
                            args: vec![expr],
                            kwargs: Vec::new(),
                        };
                    }
                    if !literal.is_empty() {
                        parts.push(FStringPart::Literal(std::mem::take(&mut literal)));
                    }
                    parts.push(FStringPart::Expr(expr, spec));
                    i = j + 1;
                }
                c => {
                    literal.push(c);
                    i += 1;
                }
            }
        }
        if !literal.is_empty() {
            parts.push(FStringPart::Literal(literal));
        }
        Ok(parts)
    }

    fn sub_expression(&mut self, source: &str, line: usize) -> Result<Expr, SandboxError> {
        let relocate = |e: SandboxError| match e {
            SandboxError::Syntax { message, .. } => {
                SandboxError::syntax(line, format!("f-string: {}", message))
            }
            other => other,
        };
        let source = source.trim();
        if source.is_empty() {
            return Err(SandboxError::syntax(
                line,
                "f-string: empty expression not allowed",
            ));
        }
        let tokens = tokenize(source).map_err(relocate)?;
        let mut sub = Parser::new(tokens, self.lambda_base + self.lambdas.len());
        let expr = sub.testlist().map_err(relocate)?;
        if !matches!(sub.peek(), Tok::Newline | Tok::Eof) {
            return Err(relocate(sub.unexpected()));
        }
        self.lambdas.append(&mut sub.lambdas);
        Ok(expr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_solve_with_helper() {
        let program = parse(
            "import json\n\ndef helper(x, y=2):\n    return x * y\n\nasync def solve():\n    r = await mcp.call_tool('add', {'input': {'a': 1, 'b': 2}})\n    return f\"FINAL_ANSWER: {helper(3)}\"\n",
        )
        .unwrap();
        assert_eq!(program.functions.len(), 2);
        let solve = program.function("solve").unwrap();
        assert!(solve.is_async);
        assert_eq!(solve.body.len(), 2);
        assert!(matches!(program.body[0].kind, StmtKind::Import(ref m) if m == &vec!["json".to_string()]));
    }

    #[test]
    fn test_while_is_rejected() {
        let err = parse("def solve():\n    while True:\n        pass\n").unwrap_err();
        assert!(err.to_string().contains("while"));
        assert!(matches!(err, SandboxError::Syntax { line: 2, .. }));
    }

    #[test]
    fn test_elif_chain_and_single_line_suites() {
        let program = parse("def solve():\n    if a: x = 1\n    elif b: x = 2\n    else: x = 3\n    return x\n").unwrap();
        let body = &program.function("solve").unwrap().body;
        match &body[0].kind {
            StmtKind::If { orelse, .. } => {
                assert!(matches!(orelse[0].kind, StmtKind::If { .. }));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_fstring_format_spec_and_lambda() {
        let program = parse("x = f'{value:.2f} and {name!r}'\nkey = lambda t: t[1]\n").unwrap();
        assert_eq!(program.functions.len(), 1);
        assert!(program.functions[0].name.starts_with("<lambda:"));
        match &program.body[0].kind {
            StmtKind::Assign(_, Expr::FString(parts)) => {
                assert!(matches!(parts[0], FStringPart::Expr(_, Some(ref s)) if s == ".2f"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_tuple_unpacking_target() {
        let program = parse("for i, v in enumerate(xs):\n    pass\na, b = 1, 2\n").unwrap();
        assert!(matches!(
            program.body[0].kind,
            StmtKind::For { target: Target::Tuple(_), .. }
        ));
        assert!(matches!(program.body[1].kind, StmtKind::Assign(ref t, Expr::Tuple(_)) if matches!(t[0], Target::Tuple(_))));
    }

    #[test]
    fn test_generator_argument_becomes_list_comp() {
        let program = parse("total = sum(x * 2 for x in items if x > 0)\n").unwrap();
        match &program.body[0].kind {
            StmtKind::Assign(_, Expr::Call { args, .. }) => {
                assert!(matches!(args[0], Expr::ListComp { .. }));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_comment_after_nested_block_returns_to_outer_level() {
        let program = parse(
            "def solve():\n    for x in xs:\n        if x:\n            y = x\n    # after the loop\n    return y\n",
        )
        .unwrap();
        let body = &program.function("solve").unwrap().body;
        assert_eq!(body.len(), 2);
        assert!(matches!(body[1].kind, StmtKind::Return(Some(_))));
        assert_eq!(body[1].line, 6);
    }
}
