//! PlanScript 解释器
//!
//! 树遍历求值，异步递归用 `BoxFuture` 表达。值语义：列表 / 字典按值保存，
//! 原地修改的方法与下标赋值通过左值路径写回变量。唯一的外部能力是 `mcp.call_tool`，
//! 每次调用先计数，超过预算立即终止整个执行（try/except 捕获不到）。

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt};
use serde_json::json;

use crate::sandbox::ast::*;
use crate::sandbox::builtins;
use crate::sandbox::ops::{
    binary_op, compare, compare_values, format_value, get_index, set_index, slice, unary_op,
};
use crate::sandbox::value::{Module, Value};
use crate::sandbox::{SandboxError, ToolCallResult};
use crate::tools::ToolDispatcher;

/// 计划函数的最大调用深度（solve 本身算一层）
pub const MAX_CALL_DEPTH: usize = 32;

/// 允许出现的 import（均为空操作，模块已预置）
const ALLOWED_IMPORTS: &[&str] = &["json", "re", "math", "asyncio"];

enum Flow {
    Normal,
    Return(Value),
    Break,
    Continue,
}

struct Frame {
    vars: HashMap<String, Value>,
    /// lambda 参数帧：查找时继续透传到其下方的捕获帧
    transparent: bool,
}

type Kwargs = Vec<(String, Value)>;
type Mutator<'a> = Box<dyn FnOnce(&mut Value) -> Result<Value, SandboxError> + Send + 'a>;

pub struct Interpreter<'d> {
    dispatcher: &'d dyn ToolDispatcher,
    functions: HashMap<String, Arc<FunctionDef>>,
    globals: HashMap<String, Value>,
    frames: Vec<Frame>,
    /// lambda 名 -> 最近一次求值时捕获的局部变量
    closures: HashMap<String, HashMap<String, Value>>,
    depth: usize,
    max_tool_calls: usize,
    tool_count: usize,
    tool_calls: Vec<ToolCallResult>,
    handling: Vec<SandboxError>,
}

impl<'d> Interpreter<'d> {
    pub fn new(dispatcher: &'d dyn ToolDispatcher, max_tool_calls: usize) -> Self {
        let globals = [Module::Json, Module::Re, Module::Math, Module::Mcp]
            .into_iter()
            .map(|m| (m.name().to_string(), Value::Module(m)))
            .collect();
        Self {
            dispatcher,
            functions: HashMap::new(),
            globals,
            frames: Vec::new(),
            closures: HashMap::new(),
            depth: 0,
            max_tool_calls,
            tool_count: 0,
            tool_calls: Vec::new(),
            handling: Vec::new(),
        }
    }

    /// 已发生的工具调用（包括失败的）
    pub fn into_tool_calls(self) -> Vec<ToolCallResult> {
        self.tool_calls
    }

    /// 执行顶层语句，然后调用 `solve()`
    pub async fn run(&mut self, program: &Program) -> Result<Value, SandboxError> {
        for def in &program.functions {
            self.functions.insert(def.name.clone(), Arc::new(def.clone()));
        }
        self.exec_block(&program.body).await?;
        let solve = self
            .functions
            .get("solve")
            .cloned()
            .ok_or(SandboxError::NoEntryPoint)?;
        self.call_function(solve, Vec::new(), Vec::new()).await
    }

    // ---------- 作用域 ----------

    fn lookup(&self, name: &str) -> Result<Value, SandboxError> {
        for frame in self.frames.iter().rev() {
            if let Some(v) = frame.vars.get(name) {
                return Ok(v.clone());
            }
            if !frame.transparent {
                break;
            }
        }
        if let Some(v) = self.globals.get(name) {
            return Ok(v.clone());
        }
        if self.functions.contains_key(name) || builtins::is_builtin(name) {
            return Ok(Value::Function(name.to_string()));
        }
        Err(SandboxError::runtime(format!(
            "NameError: name '{}' is not defined",
            name
        )))
    }

    /// 当前作用域可见的局部变量（内层优先），lambda 求值时捕获
    fn visible_locals(&self) -> HashMap<String, Value> {
        let mut vars = HashMap::new();
        for frame in self.frames.iter().rev() {
            for (k, v) in &frame.vars {
                vars.entry(k.clone()).or_insert_with(|| v.clone());
            }
            if !frame.transparent {
                break;
            }
        }
        vars
    }

    fn bind(&mut self, name: &str, value: Value) {
        match self.frames.last_mut() {
            Some(frame) => {
                frame.vars.insert(name.to_string(), value);
            }
            None => {
                self.globals.insert(name.to_string(), value);
            }
        }
    }

    /// 写回已存在的变量（原地修改语义），找不到时按普通绑定处理
    fn store_existing(&mut self, name: &str, value: Value) {
        for frame in self.frames.iter_mut().rev() {
            if frame.vars.contains_key(name) {
                frame.vars.insert(name.to_string(), value);
                return;
            }
            if !frame.transparent {
                break;
            }
        }
        if self.globals.contains_key(name) {
            self.globals.insert(name.to_string(), value);
            return;
        }
        self.bind(name, value);
    }

    // ---------- 语句 ----------

    fn exec_block<'a>(&'a mut self, stmts: &'a [Stmt]) -> BoxFuture<'a, Result<Flow, SandboxError>> {
        async move {
            for stmt in stmts {
                match self.exec_stmt(stmt).await? {
                    Flow::Normal => {}
                    flow => return Ok(flow),
                }
            }
            Ok(Flow::Normal)
        }
        .boxed()
    }

    fn exec_stmt<'a>(&'a mut self, stmt: &'a Stmt) -> BoxFuture<'a, Result<Flow, SandboxError>> {
        async move {
            match &stmt.kind {
                StmtKind::Expr(expr) => {
                    self.eval(expr).await?;
                }
                StmtKind::Assign(targets, value) => {
                    let value = self.eval(value).await?;
                    for target in targets {
                        self.assign(target, value.clone()).await?;
                    }
                }
                StmtKind::AugAssign(target, op, value) => {
                    let current = self.load_target(target).await?;
                    let rhs = self.eval(value).await?;
                    let updated = binary_op(&current, *op, &rhs)?;
                    self.assign(target, updated).await?;
                }
                StmtKind::Return(value) => {
                    let value = match value {
                        Some(expr) => self.eval(expr).await?,
                        None => Value::None,
                    };
                    return Ok(Flow::Return(value));
                }
                StmtKind::If { test, body, orelse } => {
                    let branch = if self.eval(test).await?.truthy() { body } else { orelse };
                    return self.exec_block(branch).await;
                }
                StmtKind::For { target, iter, body } => {
                    let items = self.eval(iter).await?.iter_items()?;
                    for item in items {
                        self.assign(target, item).await?;
                        match self.exec_block(body).await? {
                            Flow::Break => break,
                            Flow::Return(v) => return Ok(Flow::Return(v)),
                            Flow::Normal | Flow::Continue => {}
                        }
                    }
                }
                StmtKind::Break => return Ok(Flow::Break),
                StmtKind::Continue => return Ok(Flow::Continue),
                StmtKind::Pass => {}
                StmtKind::Try {
                    body,
                    handlers,
                    finally,
                } => return self.exec_try(body, handlers, finally).await,
                StmtKind::Raise(exc) => return Err(self.raise(exc.as_ref()).await?),
                StmtKind::Import(modules) => {
                    if let Some(m) = modules.iter().find(|m| !ALLOWED_IMPORTS.contains(&m.as_str())) {
                        return Err(SandboxError::ForbiddenImport(m.clone()));
                    }
                }
                StmtKind::FunctionDef(def) => {
                    self.functions.insert(def.name.clone(), Arc::new(def.clone()));
                    self.bind(&def.name, Value::Function(def.name.clone()));
                }
            }
            Ok(Flow::Normal)
        }
        .boxed()
    }

    async fn exec_try(
        &mut self,
        body: &[Stmt],
        handlers: &[ExceptHandler],
        finally: &[Stmt],
    ) -> Result<Flow, SandboxError> {
        let mut result = self.exec_block(body).await;
        if let Err(err) = &result {
            let (kind, message) = exception_parts(err);
            let handler = handlers.iter().find(|h| match h.kind.as_deref() {
                None | Some("Exception") | Some("BaseException") => true,
                Some(k) => kind.as_deref() == Some(k),
            });
            if let (true, Some(handler)) = (err.is_catchable(), handler) {
                let err = err.clone();
                if let Some(name) = &handler.name {
                    self.bind(name, Value::Str(message));
                }
                self.handling.push(err);
                result = self.exec_block(&handler.body).await;
                self.handling.pop();
            }
        }
        if !finally.is_empty() {
            match self.exec_block(finally).await? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        result
    }

    /// 构造 raise 抛出的错误；返回 Err 表示求值过程本身出错
    async fn raise(&mut self, exc: Option<&Expr>) -> Result<SandboxError, SandboxError> {
        let Some(expr) = exc else {
            return Ok(self.handling.last().cloned().unwrap_or_else(|| {
                SandboxError::runtime("RuntimeError: No active exception to reraise")
            }));
        };
        match expr {
            Expr::Call { func, args, .. } if matches!(func.as_ref(), Expr::Name(n) if self.lookup(n).is_err()) => {
                let kind = match func.as_ref() {
                    Expr::Name(n) => n.clone(),
                    _ => "Exception".to_string(),
                };
                let message = match args.first() {
                    Some(arg) => self.eval(arg).await?.to_display(),
                    None => String::new(),
                };
                Ok(SandboxError::runtime(if message.is_empty() {
                    kind
                } else {
                    format!("{}: {}", kind, message)
                }))
            }
            Expr::Name(n) if self.lookup(n).is_err() => Ok(SandboxError::runtime(n.clone())),
            other => Ok(SandboxError::runtime(self.eval(other).await?.to_display())),
        }
    }

    fn load_target<'a>(&'a mut self, target: &'a Target) -> BoxFuture<'a, Result<Value, SandboxError>> {
        async move {
            match target {
                Target::Name(n) => self.lookup(n),
                Target::Index(obj, idx) => {
                    let container = self.eval(obj).await?;
                    let key = self.eval(idx).await?;
                    get_index(&container, &key)
                }
                Target::Tuple(_) => Err(SandboxError::runtime(
                    "SyntaxError: illegal expression for augmented assignment",
                )),
            }
        }
        .boxed()
    }

    fn assign<'a>(&'a mut self, target: &'a Target, value: Value) -> BoxFuture<'a, Result<(), SandboxError>> {
        async move {
            match target {
                Target::Name(n) => {
                    self.bind(n, value);
                    Ok(())
                }
                Target::Tuple(targets) => {
                    let items = value.iter_items()?;
                    if items.len() != targets.len() {
                        return Err(SandboxError::runtime(format!(
                            "ValueError: expected {} values to unpack, got {}",
                            targets.len(),
                            items.len()
                        )));
                    }
                    for (t, v) in targets.iter().zip(items) {
                        self.assign(t, v).await?;
                    }
                    Ok(())
                }
                Target::Index(obj, idx) => {
                    let key = self.eval(idx).await?;
                    self.mutate(
                        obj,
                        Box::new(move |container: &mut Value| {
                            set_index(container, key, value)?;
                            Ok(Value::None)
                        }),
                    )
                    .await?;
                    Ok(())
                }
            }
        }
        .boxed()
    }

    /// 沿左值路径（变量名 / 下标链）取出值，原地修改后写回
    fn mutate<'a>(&'a mut self, path: &'a Expr, f: Mutator<'a>) -> BoxFuture<'a, Result<Value, SandboxError>> {
        async move {
            match path {
                Expr::Name(n) => {
                    let mut current = self.lookup(n)?;
                    let out = f(&mut current)?;
                    self.store_existing(n, current);
                    Ok(out)
                }
                Expr::Index(inner, idx) => {
                    let key = self.eval(idx).await?;
                    self.mutate(
                        inner,
                        Box::new(move |container: &mut Value| {
                            let mut child = get_index(container, &key)?;
                            let out = f(&mut child)?;
                            set_index(container, key, child)?;
                            Ok(out)
                        }),
                    )
                    .await
                }
                other => {
                    let mut temp = self.eval(other).await?;
                    f(&mut temp)
                }
            }
        }
        .boxed()
    }

    // ---------- 表达式 ----------

    fn eval<'a>(&'a mut self, expr: &'a Expr) -> BoxFuture<'a, Result<Value, SandboxError>> {
        async move {
            match expr {
                Expr::Const(v) => Ok(v.clone()),
                Expr::Name(n) => self.lookup(n),
                Expr::Lambda(name) => {
                    let captured = self.visible_locals();
                    self.closures.insert(name.clone(), captured);
                    Ok(Value::Function(name.clone()))
                }
                Expr::List(items) | Expr::Tuple(items) => {
                    let mut out = Vec::with_capacity(items.len());
                    for item in items {
                        out.push(self.eval(item).await?);
                    }
                    Ok(Value::List(out))
                }
                Expr::Dict(entries) => {
                    let mut dict = Value::Dict(Vec::with_capacity(entries.len()));
                    for (k, v) in entries {
                        let key = self.eval(k).await?;
                        let value = self.eval(v).await?;
                        set_index(&mut dict, key, value)?;
                    }
                    Ok(dict)
                }
                Expr::FString(parts) => {
                    let mut out = String::new();
                    for part in parts {
                        match part {
                            FStringPart::Literal(s) => out.push_str(s),
                            FStringPart::Expr(e, spec) => {
                                let v = self.eval(e).await?;
                                out.push_str(&format_value(&v, spec.as_deref().unwrap_or(""))?);
                            }
                        }
                    }
                    Ok(Value::Str(out))
                }
                Expr::Unary(op, operand) => {
                    let v = self.eval(operand).await?;
                    unary_op(*op, &v)
                }
                Expr::Binary(left, op, right) => {
                    let l = self.eval(left).await?;
                    let r = self.eval(right).await?;
                    binary_op(&l, *op, &r)
                }
                Expr::Compare(left, ops) => {
                    let mut current = self.eval(left).await?;
                    for (op, rhs) in ops {
                        let rhs = self.eval(rhs).await?;
                        if !compare(*op, &current, &rhs)? {
                            return Ok(Value::Bool(false));
                        }
                        current = rhs;
                    }
                    Ok(Value::Bool(true))
                }
                Expr::BoolOp { is_and, values } => {
                    let mut last = Value::None;
                    for v in values {
                        last = self.eval(v).await?;
                        if last.truthy() != *is_and {
                            return Ok(last);
                        }
                    }
                    Ok(last)
                }
                Expr::IfExp { test, body, orelse } => {
                    if self.eval(test).await?.truthy() {
                        self.eval(body).await
                    } else {
                        self.eval(orelse).await
                    }
                }
                Expr::Attr(obj, attr) => {
                    let v = self.eval(obj).await?;
                    get_attr(&v, attr)
                }
                Expr::Index(obj, idx) => {
                    let container = self.eval(obj).await?;
                    let key = self.eval(idx).await?;
                    get_index(&container, &key)
                }
                Expr::Slice {
                    value,
                    lower,
                    upper,
                    step,
                } => {
                    let v = self.eval(value).await?;
                    let lower = self.eval_opt(lower.as_deref()).await?;
                    let upper = self.eval_opt(upper.as_deref()).await?;
                    let step = self.eval_opt(step.as_deref()).await?;
                    slice(&v, lower.as_ref(), upper.as_ref(), step.as_ref())
                }
                Expr::Call { func, args, kwargs } => {
                    let mut arg_values = Vec::with_capacity(args.len());
                    for a in args {
                        arg_values.push(self.eval(a).await?);
                    }
                    let mut kwarg_values = Vec::with_capacity(kwargs.len());
                    for (name, e) in kwargs {
                        kwarg_values.push((name.clone(), self.eval(e).await?));
                    }
                    match func.as_ref() {
                        Expr::Attr(obj, method) => {
                            self.call_attr(obj, method, arg_values, kwarg_values).await
                        }
                        other => {
                            let f = self.eval(other).await?;
                            self.call_value(f, arg_values, kwarg_values).await
                        }
                    }
                }
                Expr::Await(inner) => self.eval(inner).await,
                Expr::ListComp {
                    element,
                    target,
                    iter,
                    conditions,
                } => {
                    let items = self.eval(iter).await?.iter_items()?;
                    let mut out = Vec::new();
                    'items: for item in items {
                        self.assign(target, item).await?;
                        for cond in conditions {
                            if !self.eval(cond).await?.truthy() {
                                continue 'items;
                            }
                        }
                        out.push(self.eval(element).await?);
                    }
                    Ok(Value::List(out))
                }
            }
        }
        .boxed()
    }

    async fn eval_opt(&mut self, expr: Option<&Expr>) -> Result<Option<Value>, SandboxError> {
        match expr {
            Some(e) => Ok(Some(self.eval(e).await?)),
            None => Ok(None),
        }
    }

    // ---------- 调用 ----------

    async fn call_attr(
        &mut self,
        obj: &Expr,
        method: &str,
        args: Vec<Value>,
        kwargs: Kwargs,
    ) -> Result<Value, SandboxError> {
        let receiver = self.eval(obj).await?;
        match receiver {
            Value::Module(Module::Mcp) if method == "call_tool" => self.call_tool(args, kwargs).await,
            Value::Module(module) => builtins::call_module(module, method, args, kwargs),
            Value::List(ref items) if method == "sort" && has_kwarg(&kwargs, "key") => {
                let sorted = self.sorted_by_key(items.clone(), &kwargs).await?;
                self.mutate(
                    obj,
                    Box::new(move |target: &mut Value| {
                        *target = Value::List(sorted);
                        Ok(Value::None)
                    }),
                )
                .await
            }
            ref r if builtins::is_mutating(r, method) => {
                self.mutate(
                    obj,
                    Box::new(move |target: &mut Value| builtins::call_method(target, method, args, kwargs)),
                )
                .await
            }
            mut r => builtins::call_method(&mut r, method, args, kwargs),
        }
    }

    fn call_value<'a>(
        &'a mut self,
        f: Value,
        args: Vec<Value>,
        kwargs: Kwargs,
    ) -> BoxFuture<'a, Result<Value, SandboxError>> {
        async move {
            let name = match f {
                Value::Function(name) => name,
                other => {
                    return Err(SandboxError::runtime(format!(
                        "TypeError: '{}' object is not callable",
                        other.type_name()
                    )))
                }
            };
            if let Some(def) = self.functions.get(&name).cloned() {
                return self.call_function(def, args, kwargs).await;
            }
            self.call_builtin(&name, args, kwargs).await
        }
        .boxed()
    }

    /// 需要回调计划函数的内置走这里，其余交给 builtins
    async fn call_builtin(&mut self, name: &str, args: Vec<Value>, kwargs: Kwargs) -> Result<Value, SandboxError> {
        match name {
            "sorted" if has_kwarg(&kwargs, "key") => {
                let items = first_iterable(name, &args)?;
                Ok(Value::List(self.sorted_by_key(items, &kwargs).await?))
            }
            "min" | "max" if has_kwarg(&kwargs, "key") => {
                let items = if args.len() == 1 {
                    first_iterable(name, &args)?
                } else {
                    args
                };
                let key = kwarg(&kwargs, "key").unwrap_or(Value::None);
                let keyed = self.apply_key(&key, items).await?;
                let want = if name == "min" {
                    std::cmp::Ordering::Less
                } else {
                    std::cmp::Ordering::Greater
                };
                let mut best: Option<(Value, Value)> = None;
                for (k, item) in keyed {
                    let better = match &best {
                        None => true,
                        Some((bk, _)) => compare_values(&k, bk)? == want,
                    };
                    if better {
                        best = Some((k, item));
                    }
                }
                match best {
                    Some((_, item)) => Ok(item),
                    None => kwarg(&kwargs, "default").ok_or_else(|| {
                        SandboxError::runtime(format!("ValueError: {}() arg is an empty sequence", name))
                    }),
                }
            }
            "map" => {
                if args.len() != 2 {
                    return Err(SandboxError::runtime("TypeError: map() takes exactly 2 arguments"));
                }
                let items = args[1].iter_items()?;
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.call_value(args[0].clone(), vec![item], Vec::new()).await?);
                }
                Ok(Value::List(out))
            }
            "filter" => {
                if args.len() != 2 {
                    return Err(SandboxError::runtime("TypeError: filter() takes exactly 2 arguments"));
                }
                let mut out = Vec::new();
                for item in args[1].iter_items()? {
                    let keep = match &args[0] {
                        Value::None => item.truthy(),
                        f => self.call_value(f.clone(), vec![item.clone()], Vec::new()).await?.truthy(),
                    };
                    if keep {
                        out.push(item);
                    }
                }
                Ok(Value::List(out))
            }
            _ => builtins::call_builtin(name, args, kwargs),
        }
    }

    async fn apply_key(&mut self, key: &Value, items: Vec<Value>) -> Result<Vec<(Value, Value)>, SandboxError> {
        let mut keyed = Vec::with_capacity(items.len());
        for item in items {
            let k = match key {
                Value::None => item.clone(),
                f => self.call_value(f.clone(), vec![item.clone()], Vec::new()).await?,
            };
            keyed.push((k, item));
        }
        Ok(keyed)
    }

    async fn sorted_by_key(&mut self, items: Vec<Value>, kwargs: &Kwargs) -> Result<Vec<Value>, SandboxError> {
        let key = kwarg(kwargs, "key").unwrap_or(Value::None);
        let reverse = kwarg(kwargs, "reverse").map(|v| v.truthy()).unwrap_or(false);
        let keyed = self.apply_key(&key, items).await?;
        let mut order: Vec<usize> = (0..keyed.len()).collect();
        let mut failure = None;
        order.sort_by(|&a, &b| match compare_values(&keyed[a].0, &keyed[b].0) {
            Ok(ord) if reverse => ord.reverse(),
            Ok(ord) => ord,
            Err(e) => {
                failure.get_or_insert(e);
                std::cmp::Ordering::Equal
            }
        });
        if let Some(e) = failure {
            return Err(e);
        }
        let mut slots: Vec<Option<Value>> = keyed.into_iter().map(|(_, v)| Some(v)).collect();
        Ok(order.into_iter().filter_map(|i| slots[i].take()).collect())
    }

    async fn call_function(
        &mut self,
        def: Arc<FunctionDef>,
        args: Vec<Value>,
        kwargs: Kwargs,
    ) -> Result<Value, SandboxError> {
        if self.depth >= MAX_CALL_DEPTH {
            return Err(SandboxError::CallDepthExceeded(MAX_CALL_DEPTH));
        }
        if args.len() > def.params.len() {
            return Err(SandboxError::runtime(format!(
                "TypeError: {}() takes {} positional arguments but {} were given",
                def.name,
                def.params.len(),
                args.len()
            )));
        }
        if let Some((unknown, _)) = kwargs
            .iter()
            .find(|(k, _)| !def.params.iter().any(|p| &p.name == k))
        {
            return Err(SandboxError::runtime(format!(
                "TypeError: {}() got an unexpected keyword argument '{}'",
                def.name, unknown
            )));
        }
        let mut vars = HashMap::new();
        let mut positional = args.into_iter();
        for param in &def.params {
            let value = match positional.next() {
                Some(v) => v,
                None => match kwarg(&kwargs, &param.name) {
                    Some(v) => v,
                    None => match &param.default {
                        Some(default) => self.eval(default).await?,
                        None => {
                            return Err(SandboxError::runtime(format!(
                                "TypeError: {}() missing required argument: '{}'",
                                def.name, param.name
                            )))
                        }
                    },
                },
            };
            vars.insert(param.name.clone(), value);
        }
        // lambda 在捕获帧之上执行，自由变量按定义处解析
        let captured = self.closures.get(&def.name).cloned();
        let is_closure = captured.is_some();
        if let Some(env) = captured {
            self.frames.push(Frame {
                vars: env,
                transparent: false,
            });
        }
        self.frames.push(Frame {
            vars,
            transparent: is_closure,
        });
        self.depth += 1;
        let result = self.exec_block(&def.body).await;
        self.depth -= 1;
        self.frames.pop();
        if is_closure {
            if let Some(env) = self.frames.pop() {
                self.closures.insert(def.name.clone(), env.vars);
            }
        }
        match result? {
            Flow::Return(v) => Ok(v),
            _ => Ok(Value::None),
        }
    }

    /// `mcp.call_tool(name, arguments)`：先计数再调用，每次调用都记录
    async fn call_tool(&mut self, args: Vec<Value>, kwargs: Kwargs) -> Result<Value, SandboxError> {
        self.tool_count += 1;
        if self.tool_count > self.max_tool_calls {
            return Err(SandboxError::ToolBudgetExceeded(self.max_tool_calls));
        }
        let tool_name = match args.first().cloned().or_else(|| kwarg(&kwargs, "name")) {
            Some(Value::Str(s)) => s,
            _ => {
                return Err(SandboxError::runtime(
                    "TypeError: call_tool() tool name must be a string",
                ))
            }
        };
        let arguments = args
            .get(1)
            .cloned()
            .or_else(|| kwarg(&kwargs, "arguments"))
            .map(|v| v.to_json())
            .unwrap_or_else(|| json!({}));
        tracing::debug!(stage = "sandbox", tool = %tool_name, call = self.tool_count, "plan tool call");

        match self.dispatcher.call_tool(&tool_name, arguments.clone()).await {
            Ok(raw) => {
                let is_error = raw.get("isError").and_then(|v| v.as_bool()).unwrap_or(false);
                let text = raw
                    .pointer("/content/0/text")
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
                    .unwrap_or_else(|| raw.to_string());
                let result = serde_json::from_str(&text).unwrap_or(serde_json::Value::String(text));
                self.tool_calls.push(ToolCallResult {
                    tool_name,
                    arguments,
                    result,
                    raw_response: raw.clone(),
                    success: !is_error,
                });
                Ok(Value::from_json(&raw))
            }
            Err(e) => {
                self.tool_calls.push(ToolCallResult {
                    tool_name,
                    arguments,
                    result: serde_json::Value::String(e.to_string()),
                    raw_response: serde_json::Value::Null,
                    success: false,
                });
                Err(SandboxError::Tool(e.to_string()))
            }
        }
    }
}

fn has_kwarg(kwargs: &Kwargs, name: &str) -> bool {
    kwargs.iter().any(|(k, _)| k == name)
}

fn kwarg(kwargs: &Kwargs, name: &str) -> Option<Value> {
    kwargs.iter().find(|(k, _)| k == name).map(|(_, v)| v.clone())
}

fn first_iterable(name: &str, args: &[Value]) -> Result<Vec<Value>, SandboxError> {
    match args.first() {
        Some(v) => v.iter_items(),
        None => Err(SandboxError::runtime(format!(
            "TypeError: {}() expected 1 argument",
            name
        ))),
    }
}

/// 属性读取：模块常量，或把字典键当属性（`result.content[0].text`）
fn get_attr(value: &Value, attr: &str) -> Result<Value, SandboxError> {
    match value {
        Value::Module(m) => builtins::module_attr(*m, attr).ok_or_else(|| {
            SandboxError::runtime(format!(
                "AttributeError: module '{}' has no attribute '{}'",
                m.name(),
                attr
            ))
        }),
        Value::Dict(_) => value
            .dict_get(&Value::str(attr))
            .cloned()
            .ok_or_else(|| SandboxError::runtime(format!("AttributeError: '{}'", attr))),
        other => Err(SandboxError::runtime(format!(
            "AttributeError: '{}' object has no attribute '{}'",
            other.type_name(),
            attr
        ))),
    }
}

/// `"KeyError: 'x'"` → (Some("KeyError"), "'x'")；工具错误归为 ToolError
fn exception_parts(err: &SandboxError) -> (Option<String>, String) {
    match err {
        SandboxError::Tool(msg) => (Some("ToolError".to_string()), msg.clone()),
        SandboxError::Runtime(msg) => match msg.split_once(": ") {
            Some((kind, rest))
                if !kind.is_empty() && kind.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.') =>
            {
                (Some(kind.to_string()), rest.to_string())
            }
            _ => (None, msg.clone()),
        },
        other => (None, other.to_string()),
    }
}
