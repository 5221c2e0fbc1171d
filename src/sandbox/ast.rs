//! PlanScript 语法树

use crate::sandbox::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Pos,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    NotEq,
    Lt,
    LtE,
    Gt,
    GtE,
    In,
    NotIn,
    Is,
    IsNot,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FStringPart {
    Literal(String),
    /// 表达式 + 可选格式说明（`{x:.2f}` 中的 `.2f`）
    Expr(Expr, Option<String>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Const(Value),
    Name(String),
    List(Vec<Expr>),
    /// 元组按 list 处理
    Tuple(Vec<Expr>),
    Dict(Vec<(Expr, Expr)>),
    FString(Vec<FStringPart>),
    Unary(UnaryOp, Box<Expr>),
    Binary(Box<Expr>, BinOp, Box<Expr>),
    /// 链式比较 `a < b <= c`
    Compare(Box<Expr>, Vec<(CmpOp, Expr)>),
    /// `and` / `or`，短路求值，返回操作数本身
    BoolOp { is_and: bool, values: Vec<Expr> },
    IfExp {
        test: Box<Expr>,
        body: Box<Expr>,
        orelse: Box<Expr>,
    },
    Attr(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Slice {
        value: Box<Expr>,
        lower: Option<Box<Expr>>,
        upper: Option<Box<Expr>>,
        step: Option<Box<Expr>>,
    },
    Call {
        func: Box<Expr>,
        args: Vec<Expr>,
        kwargs: Vec<(String, Expr)>,
    },
    Await(Box<Expr>),
    ListComp {
        element: Box<Expr>,
        target: Box<Target>,
        iter: Box<Expr>,
        conditions: Vec<Expr>,
    },
    /// 提升后的 lambda：求值时捕获定义处可见的局部变量
    Lambda(String),
}

/// 赋值目标
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    Name(String),
    Tuple(Vec<Target>),
    Index(Expr, Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExceptHandler {
    /// None 表示裸 `except:`；`Exception` / `BaseException` 命中任何可捕获错误，
    /// 其余类型名按错误消息的类型前缀匹配
    pub kind: Option<String>,
    pub name: Option<String>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub line: usize,
    pub kind: StmtKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    Expr(Expr),
    Assign(Vec<Target>, Expr),
    AugAssign(Target, BinOp, Expr),
    Return(Option<Expr>),
    If {
        test: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
    },
    For {
        target: Target,
        iter: Expr,
        body: Vec<Stmt>,
    },
    Break,
    Continue,
    Pass,
    Try {
        body: Vec<Stmt>,
        handlers: Vec<ExceptHandler>,
        finally: Vec<Stmt>,
    },
    Raise(Option<Expr>),
    /// `import x` / `from x import y`：只记录模块名，由解释器决定是否放行
    Import(Vec<String>),
    /// 嵌套的 def 直接登记为全局函数
    FunctionDef(FunctionDef),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub default: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDef {
    pub name: String,
    pub params: Vec<Param>,
    pub body: Vec<Stmt>,
    pub is_async: bool,
    pub line: usize,
}

/// 一份计划：顶层语句 + 函数定义
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Program {
    pub functions: Vec<FunctionDef>,
    pub body: Vec<Stmt>,
}

impl Program {
    pub fn function(&self, name: &str) -> Option<&FunctionDef> {
        self.functions.iter().rev().find(|f| f.name == name)
    }
}
