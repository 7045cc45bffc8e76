//! Program interpreter
//!
//! Executes a parsed [`Program`] against a [`RenderContext`], appending to an
//! output buffer. Includes and resource directives go through the [`Host`];
//! everything else is evaluated here.

use super::ast::*;
use super::builtins::call_builtin;
use super::context::RenderContext;
use super::value::{Map, Number, Value};
use crate::error::{RuntimeError, TemplateError};
use crate::resource::{ResourceQueue, ResourceRequest};
use std::collections::HashMap;
use std::sync::Arc;

/// Name compiled code uses for the context root
pub const CONTEXT_VAR: &str = "__ctx";

/// Default cap on iterations of a single loop
pub const DEFAULT_MAX_ITERATIONS: usize = 1_000_000;

/// A host function callable from templates
pub type HostFn = Arc<dyn Fn(&[Value]) -> Result<Value, RuntimeError> + Send + Sync>;

/// Functions registered by the host, shared across renders
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    fns: HashMap<String, HostFn>,
}

impl std::fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.fns.keys().collect();
        names.sort();
        f.debug_struct("FunctionRegistry")
            .field("fns", &names)
            .finish()
    }
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a function; it shadows a pure builtin of the same name
    pub fn register(
        &mut self,
        name: impl Into<String>,
        f: impl Fn(&[Value]) -> Result<Value, RuntimeError> + Send + Sync + 'static,
    ) {
        self.fns.insert(name.into(), Arc::new(f));
    }

    pub fn get(&self, name: &str) -> Option<&HostFn> {
        self.fns.get(name)
    }
}

/// What a running program needs from its surroundings
pub trait Host {
    /// Render another template and return its output
    fn include(
        &mut self,
        ctx: &mut RenderContext,
        dir: &str,
        file: &str,
    ) -> Result<String, TemplateError>;

    fn resources(&mut self) -> &mut dyn ResourceQueue;
}

/// Control flow out of a statement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Normal,
    Break,
    Continue,
    Exit,
}

/// Root of an assignable place
enum Root {
    Ctx(String),
    Local(String),
}

/// One step from a root towards an assignable place
enum Step {
    Key(String),
    Append,
}

pub struct Interpreter<'a> {
    ctx: &'a mut RenderContext,
    host: &'a mut dyn Host,
    functions: &'a FunctionRegistry,
    locals: Map,
    out: String,
    max_iterations: usize,
}

impl<'a> Interpreter<'a> {
    pub fn new(
        ctx: &'a mut RenderContext,
        host: &'a mut dyn Host,
        functions: &'a FunctionRegistry,
    ) -> Self {
        Self {
            ctx,
            host,
            functions,
            locals: Map::new(),
            out: String::new(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }

    pub fn with_iteration_limit(mut self, limit: usize) -> Self {
        self.max_iterations = limit;
        self
    }

    /// Run a program to completion and return what it printed.
    ///
    /// On error the partial output is dropped.
    pub fn run(mut self, program: &Program) -> Result<String, TemplateError> {
        self.exec_block(&program.body)?;
        Ok(self.out)
    }

    fn exec_block(&mut self, stmts: &[Stmt]) -> Result<Flow, TemplateError> {
        for stmt in stmts {
            let flow = self.exec(stmt)?;
            if flow != Flow::Normal {
                return Ok(flow);
            }
        }
        Ok(Flow::Normal)
    }

    fn exec(&mut self, stmt: &Stmt) -> Result<Flow, TemplateError> {
        match stmt {
            Stmt::Text(text) => self.out.push_str(text),
            Stmt::Echo(exprs) => {
                for expr in exprs {
                    let value = self.eval(expr)?;
                    self.out.push_str(&value.render_to_string());
                }
            }
            Stmt::Expr(expr) => {
                self.eval(expr)?;
            }
            Stmt::If {
                branches,
                otherwise,
            } => {
                for (cond, body) in branches {
                    if self.eval(cond)?.is_truthy() {
                        return self.exec_block(body);
                    }
                }
                if let Some(body) = otherwise {
                    return self.exec_block(body);
                }
            }
            Stmt::Foreach {
                subject,
                key,
                value,
                body,
            } => return self.exec_foreach(subject, key.as_ref(), value, body),
            Stmt::For {
                init,
                cond,
                step,
                body,
            } => {
                for expr in init {
                    self.eval(expr)?;
                }
                let mut iterations = 0;
                loop {
                    if let Some(cond) = cond
                        && !self.eval(cond)?.is_truthy()
                    {
                        break;
                    }
                    self.tick(&mut iterations)?;
                    match self.exec_block(body)? {
                        Flow::Break => break,
                        Flow::Exit => return Ok(Flow::Exit),
                        Flow::Normal | Flow::Continue => {}
                    }
                    for expr in step {
                        self.eval(expr)?;
                    }
                }
            }
            Stmt::While { cond, body } => {
                let mut iterations = 0;
                while self.eval(cond)?.is_truthy() {
                    self.tick(&mut iterations)?;
                    match self.exec_block(body)? {
                        Flow::Break => break,
                        Flow::Exit => return Ok(Flow::Exit),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
            }
            Stmt::Switch { subject, arms } => return self.exec_switch(subject, arms),
            Stmt::Break => return Ok(Flow::Break),
            Stmt::Continue => return Ok(Flow::Continue),
            Stmt::Exit => return Ok(Flow::Exit),
        }
        Ok(Flow::Normal)
    }

    fn tick(&self, iterations: &mut usize) -> Result<(), RuntimeError> {
        *iterations += 1;
        if *iterations > self.max_iterations {
            return Err(RuntimeError::IterationLimit {
                limit: self.max_iterations,
            });
        }
        Ok(())
    }

    fn exec_foreach(
        &mut self,
        subject: &Expr,
        key: Option<&Expr>,
        value: &Expr,
        body: &[Stmt],
    ) -> Result<Flow, TemplateError> {
        // iterate a snapshot; the body may modify the collection
        let entries = self.eval(subject)?.entries();
        let mut iterations = 0;
        for (k, v) in entries {
            self.tick(&mut iterations)?;
            if let Some(key) = key {
                self.store(key, k)?;
            }
            self.store(value, v)?;
            match self.exec_block(body)? {
                Flow::Break => break,
                Flow::Exit => return Ok(Flow::Exit),
                Flow::Normal | Flow::Continue => {}
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_switch(&mut self, subject: &Expr, arms: &[SwitchArm]) -> Result<Flow, TemplateError> {
        let subject = self.eval(subject)?;
        let mut start = None;
        for (i, arm) in arms.iter().enumerate() {
            if let Some(label) = &arm.label
                && self.eval(label)?.loose_eq(&subject)
            {
                start = Some(i);
                break;
            }
        }
        let start = start.or_else(|| arms.iter().position(|arm| arm.label.is_none()));
        let Some(start) = start else {
            return Ok(Flow::Normal);
        };
        for arm in &arms[start..] {
            match self.exec_block(&arm.body)? {
                // `continue` inside a switch acts like `break`
                Flow::Break | Flow::Continue => break,
                Flow::Exit => return Ok(Flow::Exit),
                Flow::Normal => {}
            }
        }
        Ok(Flow::Normal)
    }

    /// Evaluate an expression to a value
    pub fn eval(&mut self, expr: &Expr) -> Result<Value, TemplateError> {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Var(name) => Ok(self.eval_var(name)),
            Expr::Const(name) => Ok(self.ctx.constant(name).cloned().unwrap_or_default()),
            Expr::Member(base, name) => self.eval_member(base, name),
            Expr::Index(base, index) => {
                let Some(index) = index else {
                    return Err(RuntimeError::AppendRead.into());
                };
                let base = self.eval(base)?;
                let index = self.eval(index)?;
                Ok(base.index(&index))
            }
            Expr::Call { name, args } => self.eval_call(name, args),
            Expr::MethodCall { target, name, args } => {
                let mut values = vec![self.eval(target)?];
                for arg in args {
                    values.push(self.eval(arg)?);
                }
                match self.functions.get(name) {
                    Some(f) => Ok(f(&values)?),
                    None => Err(RuntimeError::UnknownFunction { name: name.clone() }.into()),
                }
            }
            Expr::Array(items) => self.eval_array(items),
            Expr::Unary(op, operand) => {
                let value = self.eval(operand)?;
                Ok(match op {
                    UnaryOp::Not => Value::Bool(!value.is_truthy()),
                    UnaryOp::Neg => match value.to_number() {
                        Some(Number::Int(i)) => i
                            .checked_neg()
                            .map_or(Value::Float(-(i as f64)), Value::Int),
                        Some(Number::Float(f)) => Value::Float(-f),
                        None => Value::Null,
                    },
                    UnaryOp::Plus => value.to_number().map_or(Value::Null, Number::into_value),
                })
            }
            Expr::Binary(op, left, right) => self.eval_binary(*op, left, right),
            Expr::Assign { op, target, value } => {
                let rhs = self.eval(value)?;
                let new = match op.binary() {
                    None => rhs,
                    Some(binary) => {
                        let current = self.eval(target)?;
                        apply_binary(binary, current, rhs)?
                    }
                };
                self.store(target, new.clone())?;
                Ok(new)
            }
            Expr::IncDec {
                target,
                increment,
                prefix,
            } => {
                let old = self.eval(target)?;
                let new = step_value(&old, *increment);
                self.store(target, new.clone())?;
                Ok(if *prefix { new } else { old })
            }
            Expr::Ternary {
                cond,
                then,
                otherwise,
            } => {
                let cond = self.eval(cond)?;
                if cond.is_truthy() {
                    match then {
                        Some(then) => self.eval(then),
                        None => Ok(cond),
                    }
                } else {
                    self.eval(otherwise)
                }
            }
        }
    }

    fn eval_var(&self, name: &str) -> Value {
        if name == CONTEXT_VAR {
            return Value::Map(self.ctx.vars().clone());
        }
        self.locals.get(name).cloned().unwrap_or_default()
    }

    fn eval_member(&mut self, base: &Expr, name: &str) -> Result<Value, TemplateError> {
        if let Expr::Var(root) = base
            && root == CONTEXT_VAR
        {
            return Ok(self.ctx.get(name).cloned().unwrap_or_default());
        }
        Ok(self.eval(base)?.member(name))
    }

    fn eval_array(&mut self, items: &[(Option<Expr>, Expr)]) -> Result<Value, TemplateError> {
        if items.iter().all(|(key, _)| key.is_none()) {
            let mut list = Vec::with_capacity(items.len());
            for (_, value) in items {
                list.push(self.eval(value)?);
            }
            return Ok(Value::List(list));
        }
        let mut map = Map::new();
        let mut next_index = 0i64;
        for (key, value) in items {
            let key = match key {
                Some(key) => {
                    let key = self.eval(key)?;
                    if let Value::Int(i) = key {
                        next_index = next_index.max(i + 1);
                    }
                    key.to_key()
                }
                None => {
                    next_index += 1;
                    (next_index - 1).to_string()
                }
            };
            let value = self.eval(value)?;
            map.insert(key, value);
        }
        Ok(Value::Map(map))
    }

    fn eval_binary(&mut self, op: BinaryOp, left: &Expr, right: &Expr) -> Result<Value, TemplateError> {
        // short-circuit for and/or
        match op {
            BinaryOp::And => {
                let result = self.eval(left)?.is_truthy() && self.eval(right)?.is_truthy();
                return Ok(Value::Bool(result));
            }
            BinaryOp::Or => {
                let result = self.eval(left)?.is_truthy() || self.eval(right)?.is_truthy();
                return Ok(Value::Bool(result));
            }
            _ => {}
        }
        let left = self.eval(left)?;
        let right = self.eval(right)?;
        Ok(apply_binary(op, left, right)?)
    }

    fn eval_call(&mut self, name: &str, args: &[Expr]) -> Result<Value, TemplateError> {
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.eval(arg)?);
        }
        let text = |i: usize| values.get(i).map(Value::render_to_string).unwrap_or_default();

        match name {
            "include" => {
                let (dir, file) = (text(0), text(1));
                let out = self.host.include(self.ctx, &dir, &file)?;
                return Ok(Value::String(out));
            }
            "load_file" => {
                let request = match values.first() {
                    Some(Value::Map(map)) => ResourceRequest::from_map(map),
                    _ => None,
                };
                let Some(request) = request else {
                    return Err(bad_arguments(name, "a map with a `target`"));
                };
                self.host.resources().load_file(request);
                return Ok(Value::Null);
            }
            "unload_file" => {
                let Some(Value::Map(map)) = values.first() else {
                    return Err(bad_arguments(name, "a map with a `target`"));
                };
                let field = |k: &str| map.get(k).map(Value::render_to_string).unwrap_or_default();
                let (target, target_ie, media) = (field("target"), field("targetie"), field("media"));
                self.host.resources().unload_file(&target, &target_ie, &media);
                return Ok(Value::Null);
            }
            "load_js_plugin" => {
                let plugin = text(0);
                self.host.resources().load_js_plugin(&plugin);
                return Ok(Value::Null);
            }
            "load_lang" => {
                let dir = text(0);
                self.host.resources().load_lang(&dir);
                return Ok(Value::Null);
            }
            "compile_xml_filter" => {
                let (dir, file) = (text(0), text(1));
                self.host.resources().compile_xml_filter(&dir, &file);
                return Ok(Value::Null);
            }
            "load_ruleset" => {
                let path = text(0);
                self.host.resources().load_ruleset(&path);
                return Ok(Value::Null);
            }
            "request_uri" => return Ok(Value::String(self.ctx.request_uri().to_string())),
            "defined" => return Ok(Value::Bool(self.ctx.is_defined(&text(0)))),
            _ => {}
        }

        if let Some(f) = self.functions.get(name) {
            return Ok(f(&values)?);
        }
        match call_builtin(name, &values) {
            Some(result) => Ok(result?),
            None => Err(RuntimeError::UnknownFunction {
                name: name.to_string(),
            }
            .into()),
        }
    }

    /// Resolve an assignable expression into a root and a path of steps
    fn place(&mut self, target: &Expr) -> Result<(Root, Vec<Step>), TemplateError> {
        match target {
            Expr::Var(name) if name == CONTEXT_VAR => Err(invalid_assignment(target)),
            Expr::Var(name) => Ok((Root::Local(name.clone()), Vec::new())),
            Expr::Member(base, name) => {
                if let Expr::Var(root) = &**base
                    && root == CONTEXT_VAR
                {
                    return Ok((Root::Ctx(name.clone()), Vec::new()));
                }
                let (root, mut steps) = self.place(base)?;
                steps.push(Step::Key(name.clone()));
                Ok((root, steps))
            }
            Expr::Index(base, index) => {
                let step = match index {
                    Some(index) => Step::Key(self.eval(index)?.to_key()),
                    None => Step::Append,
                };
                let (root, mut steps) = self.place(base)?;
                steps.push(step);
                Ok((root, steps))
            }
            _ => Err(invalid_assignment(target)),
        }
    }

    fn store(&mut self, target: &Expr, value: Value) -> Result<(), TemplateError> {
        let (root, steps) = self.place(target)?;
        let mut slot = match &root {
            Root::Ctx(name) => self.ctx.slot(name),
            Root::Local(name) => self.locals.entry(name.clone()).or_default(),
        };
        for step in &steps {
            slot = child_slot(slot, step).ok_or_else(|| invalid_assignment(target))?;
        }
        *slot = value;
        Ok(())
    }
}

/// Step into (creating as needed) the child slot of a container
fn child_slot<'v>(slot: &'v mut Value, step: &Step) -> Option<&'v mut Value> {
    if slot.is_null() {
        *slot = match step {
            Step::Append => Value::List(Vec::new()),
            Step::Key(_) => Value::Map(Map::new()),
        };
    }
    match (slot, step) {
        (Value::List(list), Step::Append) => {
            list.push(Value::Null);
            list.last_mut()
        }
        (Value::List(list), Step::Key(key)) => {
            let index: usize = key.parse().ok()?;
            if index < list.len() {
                return list.get_mut(index);
            }
            if index == list.len() {
                list.push(Value::Null);
                return list.last_mut();
            }
            None
        }
        (Value::Map(map), Step::Append) => {
            let next = map
                .keys()
                .filter_map(|k| k.parse::<i64>().ok())
                .max()
                .map_or(0, |max| max + 1);
            Some(map.entry(next.to_string()).or_default())
        }
        (Value::Map(map), Step::Key(key)) => Some(map.entry(key.clone()).or_default()),
        _ => None,
    }
}

fn invalid_assignment(target: &Expr) -> TemplateError {
    RuntimeError::InvalidAssignment {
        target: format!("{target:?}"),
    }
    .into()
}

fn bad_arguments(name: &str, expected: &str) -> TemplateError {
    RuntimeError::BadArguments {
        name: name.to_string(),
        expected: expected.to_string(),
    }
    .into()
}

fn step_value(value: &Value, increment: bool) -> Value {
    match (value, increment) {
        (Value::Null, true) => Value::Int(1),
        (Value::Null, false) => Value::Null,
        (Value::Int(i), true) => Value::Int(i.saturating_add(1)),
        (Value::Int(i), false) => Value::Int(i.saturating_sub(1)),
        (Value::Float(f), true) => Value::Float(f + 1.0),
        (Value::Float(f), false) => Value::Float(f - 1.0),
        (Value::String(_), _) => match value.to_number() {
            Some(Number::Int(i)) if increment => Value::Int(i.saturating_add(1)),
            Some(Number::Int(i)) => Value::Int(i.saturating_sub(1)),
            Some(Number::Float(f)) if increment => Value::Float(f + 1.0),
            Some(Number::Float(f)) => Value::Float(f - 1.0),
            None => value.clone(),
        },
        _ => value.clone(),
    }
}

fn numbers(left: &Value, right: &Value) -> Result<(Number, Number), RuntimeError> {
    match (left.to_number(), right.to_number()) {
        (Some(a), Some(b)) => Ok((a, b)),
        _ => Err(RuntimeError::BadArguments {
            name: "arithmetic".to_string(),
            expected: format!(
                "numbers, found {} and {}",
                left.type_name(),
                right.type_name()
            ),
        }),
    }
}

fn arithmetic(
    a: Number,
    b: Number,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> Value {
    match (a, b) {
        (Number::Int(x), Number::Int(y)) => match int_op(x, y) {
            Some(v) => Value::Int(v),
            None => Value::Float(float_op(x as f64, y as f64)),
        },
        _ => Value::Float(float_op(a.as_f64(), b.as_f64())),
    }
}

fn apply_binary(op: BinaryOp, left: Value, right: Value) -> Result<Value, RuntimeError> {
    use std::cmp::Ordering;

    Ok(match op {
        BinaryOp::And => Value::Bool(left.is_truthy() && right.is_truthy()),
        BinaryOp::Or => Value::Bool(left.is_truthy() || right.is_truthy()),
        BinaryOp::Eq => Value::Bool(left.loose_eq(&right)),
        BinaryOp::Ne => Value::Bool(!left.loose_eq(&right)),
        BinaryOp::Identical => Value::Bool(left.strict_eq(&right)),
        BinaryOp::NotIdentical => Value::Bool(!left.strict_eq(&right)),
        BinaryOp::Lt => Value::Bool(left.loose_cmp(&right) == Some(Ordering::Less)),
        BinaryOp::Le => Value::Bool(matches!(
            left.loose_cmp(&right),
            Some(Ordering::Less | Ordering::Equal)
        )),
        BinaryOp::Gt => Value::Bool(left.loose_cmp(&right) == Some(Ordering::Greater)),
        BinaryOp::Ge => Value::Bool(matches!(
            left.loose_cmp(&right),
            Some(Ordering::Greater | Ordering::Equal)
        )),
        BinaryOp::Concat => {
            Value::String(format!("{}{}", left.render_to_string(), right.render_to_string()))
        }
        BinaryOp::Add => {
            if let (Value::Map(a), Value::Map(b)) = (&left, &right) {
                // array union keeps the left side's keys
                let mut union = a.clone();
                for (k, v) in b {
                    union.entry(k.clone()).or_insert_with(|| v.clone());
                }
                return Ok(Value::Map(union));
            }
            let (a, b) = numbers(&left, &right)?;
            arithmetic(a, b, i64::checked_add, |x, y| x + y)
        }
        BinaryOp::Sub => {
            let (a, b) = numbers(&left, &right)?;
            arithmetic(a, b, i64::checked_sub, |x, y| x - y)
        }
        BinaryOp::Mul => {
            let (a, b) = numbers(&left, &right)?;
            arithmetic(a, b, i64::checked_mul, |x, y| x * y)
        }
        BinaryOp::Div => {
            let (a, b) = numbers(&left, &right)?;
            if b.as_f64() == 0.0 {
                return Err(RuntimeError::DivisionByZero);
            }
            match (a, b) {
                (Number::Int(x), Number::Int(y)) if x.checked_rem(y) == Some(0) => {
                    arithmetic(a, b, i64::checked_div, |x, y| x / y)
                }
                _ => Value::Float(a.as_f64() / b.as_f64()),
            }
        }
        BinaryOp::Mod => {
            let (a, b) = numbers(&left, &right)?;
            let (x, y) = (a.as_f64() as i64, b.as_f64() as i64);
            if y == 0 {
                return Err(RuntimeError::DivisionByZero);
            }
            // i64::MIN % -1 is 0, not an overflow
            Value::Int(x.wrapping_rem(y))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ScriptSource;
    use crate::resource::{ResourceEvent, ResourceLog};
    use crate::script::parse_program;

    /// A host whose includes render a fixed string
    struct StubHost {
        log: ResourceLog,
        includes: Vec<(String, String)>,
    }

    impl Host for StubHost {
        fn include(
            &mut self,
            _ctx: &mut RenderContext,
            dir: &str,
            file: &str,
        ) -> Result<String, TemplateError> {
            self.includes.push((dir.to_string(), file.to_string()));
            Ok(format!("[{file}]"))
        }

        fn resources(&mut self) -> &mut dyn ResourceQueue {
            &mut self.log
        }
    }

    fn stub() -> StubHost {
        StubHost {
            log: ResourceLog::new(),
            includes: Vec::new(),
        }
    }

    fn render_with(src: &str, ctx: &mut RenderContext, functions: &FunctionRegistry) -> Result<String, TemplateError> {
        let program = parse_program(&ScriptSource::new("test", src))?;
        let mut host = stub();
        Interpreter::new(ctx, &mut host, functions).run(&program)
    }

    fn render(src: &str, ctx: &mut RenderContext) -> String {
        render_with(src, ctx, &FunctionRegistry::new()).unwrap()
    }

    #[test]
    fn c_style_loop_from_null() {
        let mut ctx = RenderContext::new();
        assert_eq!(
            render("<?tpl for (1;$__ctx->i<3;$__ctx->i++) { ?>X<?tpl } ?>", &mut ctx),
            "XXX"
        );
        assert_eq!(ctx.get("i"), Some(&Value::Int(3)));
    }

    #[test]
    fn foreach_over_null_does_nothing() {
        let mut ctx = RenderContext::new();
        let src = "<?tpl if ($__ctx->l && count($__ctx->l)) foreach ($__ctx->l as $__ctx->v) { ?>x<?tpl } ?>done";
        assert_eq!(render(src, &mut ctx), "done");
    }

    #[test]
    fn foreach_binds_key_and_value() {
        let mut ctx = RenderContext::from_json(serde_json::json!({"l": {"a": 1, "b": 2}}));
        let src = "<?tpl foreach ($__ctx->l as $__ctx->k => $__ctx->v) { ?><?tpl echo $__ctx->k ?>=<?tpl echo $__ctx->v ?>;<?tpl } ?>";
        assert_eq!(render(src, &mut ctx), "a=1;b=2;");
    }

    #[test]
    fn while_assignment_loop() {
        let mut ctx = RenderContext::from_json(serde_json::json!({"q": [1, 2]}));
        let src = "<?tpl $n = 0; while (($__ctx->x = $__ctx->q[$n])) { $n++; echo $__ctx->x; } ?>";
        assert_eq!(render(src, &mut ctx), "12");
    }

    #[test]
    fn switch_falls_through_until_break() {
        let mut ctx = RenderContext::from_json(serde_json::json!({"a": 1}));
        let src = "<?tpl switch($__ctx->a) { ?><?tpl case 1: ?>one<?tpl case 2: ?>two<?tpl break;default: ?>d<?tpl } ?>";
        assert_eq!(render(src, &mut ctx), "onetwo");
        ctx.set("a", 9);
        assert_eq!(render(src, &mut ctx), "d");
    }

    #[test]
    fn integer_overflow_falls_back_to_float() {
        let mut ctx = RenderContext::new();
        let src = "<?tpl $min = -9223372036854775807 - 1; \
                   $__ctx->q = $min / -1; $__ctx->r = $min % -1; $__ctx->n = -$min ?>";
        assert_eq!(render(src, &mut ctx), "");
        assert_eq!(ctx.get("q"), Some(&Value::Float(9223372036854775808.0)));
        assert_eq!(ctx.get("r"), Some(&Value::Int(0)));
        assert_eq!(ctx.get("n"), Some(&Value::Float(9223372036854775808.0)));
    }

    #[test]
    fn exit_stops_rendering() {
        let mut ctx = RenderContext::new();
        let src = "<?tpl if (!defined('__XTPL__')) exit; ?>body";
        assert_eq!(render(src, &mut ctx), "");
        ctx.define("__XTPL__", true);
        assert_eq!(render(src, &mut ctx), "body");
    }

    #[test]
    fn nested_assignment_creates_maps() {
        let mut ctx = RenderContext::new();
        render("<?tpl $__ctx->a->b['c'] = 1; $__ctx->l[] = 'x'; $__ctx->l[] = 'y' ?>", &mut ctx);
        assert_eq!(ctx.get("a").unwrap().member("b").member("c"), Value::Int(1));
        assert_eq!(ctx.get("l").unwrap().count(), 2);
    }

    #[test]
    fn resources_and_includes_reach_the_host() {
        let program = parse_program(&ScriptSource::new(
            "t",
            "<?tpl echo include('modules/x', 'a.html') ?><?tpl load_file(['target' => 'x/a.css', 'media' => 'all']) ?>",
        ))
        .unwrap();
        let mut ctx = RenderContext::new();
        let mut host = stub();
        let functions = FunctionRegistry::new();
        let out = Interpreter::new(&mut ctx, &mut host, &functions)
            .run(&program)
            .unwrap();
        assert_eq!(out, "[a.html]");
        assert_eq!(host.includes, vec![("modules/x".to_string(), "a.html".to_string())]);
        assert!(matches!(&host.log.events[0], ResourceEvent::Load(req) if req.placement == "all"));
    }

    #[test]
    fn unknown_function_is_an_error() {
        let mut ctx = RenderContext::new();
        let err = render_with("<?tpl nope() ?>", &mut ctx, &FunctionRegistry::new()).unwrap_err();
        assert!(matches!(
            err,
            TemplateError::Runtime(RuntimeError::UnknownFunction { .. })
        ));
    }

    #[test]
    fn registered_functions_and_methods() {
        let mut functions = FunctionRegistry::new();
        functions.register("getTitle", |args| {
            Ok(args.first().map(|doc| doc.member("title")).unwrap_or_default())
        });
        let mut ctx = RenderContext::from_json(serde_json::json!({"doc": {"title": "T"}}));
        let out = render_with("<?tpl echo $__ctx->doc->getTitle() ?>", &mut ctx, &functions).unwrap();
        assert_eq!(out, "T");
    }

    #[test]
    fn iteration_cap() {
        let program = parse_program(&ScriptSource::new("t", "<?tpl while (1) { } ?>")).unwrap();
        let mut ctx = RenderContext::new();
        let mut host = stub();
        let functions = FunctionRegistry::new();
        let err = Interpreter::new(&mut ctx, &mut host, &functions)
            .with_iteration_limit(10)
            .run(&program)
            .unwrap_err();
        assert!(matches!(
            err,
            TemplateError::Runtime(RuntimeError::IterationLimit { limit: 10 })
        ));
    }

    #[test]
    fn arithmetic_and_strings() {
        let mut ctx = RenderContext::new();
        assert_eq!(render("<?tpl echo 7 / 2, '|', 6 / 3, '|', 'a' . 1 + 1 ?>", &mut ctx), "3.5|2|a2");
        assert!(render_with("<?tpl echo 1 / 0 ?>", &mut ctx, &FunctionRegistry::new()).is_err());
    }
}
