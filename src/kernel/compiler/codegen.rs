//! Lowers the syntax tree to a [`Script`].
//!
//! Top-level functions are hoisted. Bindings in the program body live in
//! global slots, bindings inside functions live in local slots. Strict-mode
//! violations that can be seen statically are reported as compile errors.

use rustc_hash::FxHashMap;

use super::ast::*;
use super::CompileError;
use crate::kernel::script::{
    Constant, Function, Intrinsic, Op, Script, ScriptOptions, MAIN_FUNCTION,
};

type Result<T> = std::result::Result<T, CompileError>;

/// Expression trees deeper than this are rejected instead of lowered.
const MAX_EXPR_DEPTH: usize = 1024;

#[derive(Debug, Clone, Copy)]
struct Binding {
    slot: u32,
    global: bool,
    constant: bool,
}

#[derive(Default)]
struct LoopLabels {
    breaks: Vec<usize>,
    continues: Vec<usize>,
}

struct FnCtx {
    is_main: bool,
    code: Vec<Op>,
    scopes: Vec<FxHashMap<String, Binding>>,
    locals: u32,
    loops: Vec<LoopLabels>,
}

impl FnCtx {
    fn new(is_main: bool) -> Self {
        Self {
            is_main,
            code: Vec::new(),
            scopes: vec![FxHashMap::default()],
            locals: 0,
            loops: Vec::new(),
        }
    }
}

pub fn generate(program: &Program, options: &ScriptOptions) -> Result<Script> {
    let mut gen = Codegen {
        constants: Vec::new(),
        numbers: FxHashMap::default(),
        strings: FxHashMap::default(),
        globals: 0,
        function_index: FxHashMap::default(),
        top_level: FxHashMap::default(),
        ctx: FnCtx::new(true),
        depth: 0,
    };

    let mut decls = Vec::new();
    for stmt in &program.body {
        if let Stmt::Function(decl) = stmt {
            if gen.function_index.contains_key(&decl.name) {
                return Err(already_declared(&decl.name, decl.pos));
            }
            gen.function_index
                .insert(decl.name.clone(), decls.len() as u32 + 1);
            decls.push(decl);
        }
    }

    for stmt in &program.body {
        gen.statement(stmt)?;
    }
    let main = gen.finish(MAIN_FUNCTION.to_string(), 0);
    gen.top_level = main.1;

    let mut functions = vec![main.0];
    for decl in decls {
        functions.push(gen.function(decl)?);
    }

    Ok(Script {
        options: options.clone(),
        globals: gen.globals,
        constants: gen.constants,
        functions,
    })
}

fn already_declared(name: &str, pos: Pos) -> CompileError {
    CompileError::new(
        format!("Identifier '{name}' has already been declared"),
        pos.line,
        pos.col,
    )
}

struct Codegen {
    constants: Vec<Constant>,
    numbers: FxHashMap<u64, u32>,
    strings: FxHashMap<String, u32>,
    globals: u32,
    function_index: FxHashMap<String, u32>,
    /// Program-level bindings, visible from every function.
    top_level: FxHashMap<String, Binding>,
    ctx: FnCtx,
    depth: usize,
}

impl Codegen {
    fn finish(&mut self, name: String, params: u32) -> (Function, FxHashMap<String, Binding>) {
        self.emit(Op::Undefined);
        self.emit(Op::Return);
        let ctx = std::mem::replace(&mut self.ctx, FnCtx::new(false));
        let outer = ctx.scopes.into_iter().next().unwrap_or_default();
        let function = Function {
            name,
            params,
            locals: ctx.locals,
            code: ctx.code,
        };
        (function, outer)
    }

    fn function(&mut self, decl: &FunctionDecl) -> Result<Function> {
        self.ctx = FnCtx::new(false);
        for param in &decl.params {
            if self.ctx.scopes[0].contains_key(param) {
                return Err(CompileError::new(
                    "Duplicate parameter name not allowed in this context",
                    decl.pos.line,
                    decl.pos.col,
                ));
            }
            let slot = self.ctx.locals;
            self.ctx.locals += 1;
            self.ctx.scopes[0].insert(
                param.clone(),
                Binding {
                    slot,
                    global: false,
                    constant: false,
                },
            );
        }
        // parameters and the body's top-level declarations share a scope
        for stmt in &decl.body {
            self.statement(stmt)?;
        }
        Ok(self
            .finish(decl.name.clone(), decl.params.len() as u32)
            .0)
    }

    fn emit(&mut self, op: Op) -> usize {
        self.ctx.code.push(op);
        self.ctx.code.len() - 1
    }

    fn here(&self) -> u32 {
        self.ctx.code.len() as u32
    }

    fn patch(&mut self, at: usize) {
        let target = self.here();
        self.patch_to(at, target);
    }

    fn patch_to(&mut self, at: usize, target: u32) {
        if let Some(Op::Jump(t) | Op::JumpIfFalse(t) | Op::JumpIfTrue(t)) = self.ctx.code.get_mut(at)
        {
            *t = target;
        }
    }

    fn number(&mut self, n: f64) -> u32 {
        if let Some(&idx) = self.numbers.get(&n.to_bits()) {
            return idx;
        }
        let idx = self.constants.len() as u32;
        self.constants.push(Constant::Number(n));
        self.numbers.insert(n.to_bits(), idx);
        idx
    }

    fn string(&mut self, s: &str) -> u32 {
        if let Some(&idx) = self.strings.get(s) {
            return idx;
        }
        let idx = self.constants.len() as u32;
        self.constants.push(Constant::Str(s.to_string()));
        self.strings.insert(s.to_string(), idx);
        idx
    }

    fn resolve(&self, name: &str) -> Option<Binding> {
        for scope in self.ctx.scopes.iter().rev() {
            if let Some(binding) = scope.get(name) {
                return Some(*binding);
            }
        }
        if self.ctx.is_main {
            None
        } else {
            self.top_level.get(name).copied()
        }
    }

    fn declare(&mut self, name: &str, constant: bool, pos: Pos) -> Result<Binding> {
        let at_top_level = self.ctx.is_main && self.ctx.scopes.len() == 1;
        let scope_taken = self
            .ctx
            .scopes
            .last()
            .is_some_and(|scope| scope.contains_key(name));
        if scope_taken || (at_top_level && self.function_index.contains_key(name)) {
            return Err(already_declared(name, pos));
        }

        let binding = if self.ctx.is_main {
            self.globals += 1;
            Binding {
                slot: self.globals - 1,
                global: true,
                constant,
            }
        } else {
            self.ctx.locals += 1;
            Binding {
                slot: self.ctx.locals - 1,
                global: false,
                constant,
            }
        };
        if let Some(scope) = self.ctx.scopes.last_mut() {
            scope.insert(name.to_string(), binding);
        }
        Ok(binding)
    }

    fn load(&mut self, binding: Binding) {
        self.emit(if binding.global {
            Op::LoadGlobal(binding.slot)
        } else {
            Op::LoadLocal(binding.slot)
        });
    }

    fn store(&mut self, binding: Binding) {
        self.emit(if binding.global {
            Op::StoreGlobal(binding.slot)
        } else {
            Op::StoreLocal(binding.slot)
        });
    }

    fn scoped(&mut self, f: impl FnOnce(&mut Self) -> Result<()>) -> Result<()> {
        self.ctx.scopes.push(FxHashMap::default());
        let result = f(self);
        self.ctx.scopes.pop();
        result
    }

    fn statement(&mut self, stmt: &Stmt) -> Result<()> {
        match stmt {
            Stmt::Decl { kind, decls } => {
                for decl in decls {
                    let constant = *kind == DeclKind::Const;
                    match &decl.init {
                        Some(init) => self.expr(init)?,
                        None if constant => {
                            return Err(CompileError::new(
                                "Missing initializer in const declaration",
                                decl.pos.line,
                                decl.pos.col,
                            ))
                        }
                        None => {
                            self.emit(Op::Undefined);
                        }
                    }
                    let binding = self.declare(&decl.name, constant, decl.pos)?;
                    self.store(binding);
                }
            }
            Stmt::Expr(expr) => {
                self.expr(expr)?;
                self.emit(Op::Pop);
            }
            Stmt::If {
                cond,
                then,
                otherwise,
            } => {
                self.expr(cond)?;
                let to_else = self.emit(Op::JumpIfFalse(0));
                self.scoped(|g| g.statement(then))?;
                match otherwise {
                    Some(otherwise) => {
                        let to_end = self.emit(Op::Jump(0));
                        self.patch(to_else);
                        self.scoped(|g| g.statement(otherwise))?;
                        self.patch(to_end);
                    }
                    None => self.patch(to_else),
                }
            }
            Stmt::While { cond, body } => {
                let start = self.here();
                self.expr(cond)?;
                let exit = self.emit(Op::JumpIfFalse(0));
                self.loop_body(body)?;
                self.emit(Op::Jump(start));
                self.patch(exit);
                self.close_loop(start);
            }
            Stmt::For {
                init,
                cond,
                step,
                body,
            } => self.scoped(|g| {
                if let Some(init) = init {
                    g.statement(init)?;
                }
                let start = g.here();
                let exit = match cond {
                    Some(cond) => {
                        g.expr(cond)?;
                        Some(g.emit(Op::JumpIfFalse(0)))
                    }
                    None => None,
                };
                g.loop_body(body)?;
                let continue_at = g.here();
                if let Some(step) = step {
                    g.expr(step)?;
                    g.emit(Op::Pop);
                }
                g.emit(Op::Jump(start));
                if let Some(exit) = exit {
                    g.patch(exit);
                }
                g.close_loop(continue_at);
                Ok(())
            })?,
            Stmt::Block(body) => self.scoped(|g| {
                for stmt in body {
                    g.statement(stmt)?;
                }
                Ok(())
            })?,
            Stmt::Break(pos) => {
                if self.ctx.loops.is_empty() {
                    return Err(CompileError::new("Illegal break statement", pos.line, pos.col));
                }
                let at = self.emit(Op::Jump(0));
                if let Some(labels) = self.ctx.loops.last_mut() {
                    labels.breaks.push(at);
                }
            }
            Stmt::Continue(pos) => {
                if self.ctx.loops.is_empty() {
                    return Err(CompileError::new(
                        "Illegal continue statement: no surrounding iteration statement",
                        pos.line,
                        pos.col,
                    ));
                }
                let at = self.emit(Op::Jump(0));
                if let Some(labels) = self.ctx.loops.last_mut() {
                    labels.continues.push(at);
                }
            }
            Stmt::Return(value) => {
                // a top-level return ends the program with its value
                match value {
                    Some(value) => self.expr(value)?,
                    None => {
                        self.emit(Op::Undefined);
                    }
                }
                self.emit(Op::Return);
            }
            Stmt::Throw(value) => {
                self.expr(value)?;
                self.emit(Op::Throw);
            }
            Stmt::Function(decl) => {
                let hoisted = self.ctx.is_main && self.ctx.scopes.len() == 1;
                if !hoisted {
                    return Err(CompileError::new(
                        "function declarations are only supported at the top level",
                        decl.pos.line,
                        decl.pos.col,
                    ));
                }
            }
            Stmt::Empty => {}
        }
        Ok(())
    }

    fn loop_body(&mut self, body: &Stmt) -> Result<()> {
        self.ctx.loops.push(LoopLabels::default());
        self.scoped(|g| g.statement(body))
    }

    fn close_loop(&mut self, continue_at: u32) {
        let Some(labels) = self.ctx.loops.pop() else {
            return;
        };
        for at in labels.breaks {
            self.patch(at);
        }
        for at in labels.continues {
            self.patch_to(at, continue_at);
        }
    }

    fn expr(&mut self, expr: &Expr) -> Result<()> {
        if self.depth >= MAX_EXPR_DEPTH {
            let pos = leftmost_pos(expr);
            return Err(CompileError::new(
                "expression nested too deeply",
                pos.line,
                pos.col,
            ));
        }
        self.depth += 1;
        let result = self.lower(expr);
        self.depth -= 1;
        result
    }

    fn lower(&mut self, expr: &Expr) -> Result<()> {
        match expr {
            Expr::Number(n) => {
                let idx = self.number(*n);
                self.emit(Op::Const(idx));
            }
            Expr::Str(s) => {
                let idx = self.string(s);
                self.emit(Op::Const(idx));
            }
            Expr::Bool(true) => {
                self.emit(Op::True);
            }
            Expr::Bool(false) => {
                self.emit(Op::False);
            }
            Expr::Null => {
                self.emit(Op::Null);
            }
            Expr::Undefined => {
                self.emit(Op::Undefined);
            }
            Expr::Ident(name, pos) => self.read(name, *pos)?,
            Expr::Unary(UnaryOp::TypeOf, operand) => {
                match operand.as_ref() {
                    // `typeof` on an undeclared name is not an error
                    Expr::Ident(name, _)
                        if self.resolve(name).is_none()
                            && !self.function_index.contains_key(name)
                            && !matches!(name.as_str(), "NaN" | "Infinity") =>
                    {
                        self.emit(Op::Undefined);
                    }
                    other => self.expr(other)?,
                }
                self.emit(Op::TypeOf);
            }
            Expr::Unary(op, operand) => {
                self.expr(operand)?;
                self.emit(match op {
                    UnaryOp::Not => Op::Not,
                    UnaryOp::Neg => Op::Neg,
                    UnaryOp::Plus => Op::ToNumber,
                    UnaryOp::TypeOf => Op::TypeOf,
                });
            }
            Expr::Binary(op, lhs, rhs) => {
                self.expr(lhs)?;
                self.expr(rhs)?;
                self.emit(binary_op(*op));
            }
            Expr::Logical(op, lhs, rhs) => {
                self.expr(lhs)?;
                self.emit(Op::Dup);
                let short = self.emit(match op {
                    LogicalOp::And => Op::JumpIfFalse(0),
                    LogicalOp::Or => Op::JumpIfTrue(0),
                });
                self.emit(Op::Pop);
                self.expr(rhs)?;
                self.patch(short);
            }
            Expr::Conditional(cond, then, otherwise) => {
                self.expr(cond)?;
                let to_else = self.emit(Op::JumpIfFalse(0));
                self.expr(then)?;
                let to_end = self.emit(Op::Jump(0));
                self.patch(to_else);
                self.expr(otherwise)?;
                self.patch(to_end);
            }
            Expr::Assign {
                target,
                op,
                value,
                pos,
            } => {
                let binding = self.writable(target, *pos)?;
                if let Some(op) = op {
                    self.load(binding);
                    self.expr(value)?;
                    self.emit(binary_op(*op));
                } else {
                    self.expr(value)?;
                }
                self.emit(Op::Dup);
                self.store(binding);
            }
            Expr::Update {
                target,
                increment,
                prefix,
                pos,
            } => {
                let binding = self.writable(target, *pos)?;
                let one = self.number(1.0);
                let step = if *increment { Op::Add } else { Op::Sub };
                self.load(binding);
                self.emit(Op::ToNumber);
                if *prefix {
                    self.emit(Op::Const(one));
                    self.emit(step);
                    self.emit(Op::Dup);
                } else {
                    self.emit(Op::Dup);
                    self.emit(Op::Const(one));
                    self.emit(step);
                }
                self.store(binding);
            }
            Expr::Call { callee, args, pos } => self.call(callee, args, *pos)?,
            Expr::Member {
                object,
                property,
                pos,
            } => {
                if let Expr::Ident(ns, _) = object.as_ref() {
                    if ns == "Math" && self.resolve(ns).is_none() {
                        let value = match property.as_str() {
                            "PI" => std::f64::consts::PI,
                            "E" => std::f64::consts::E,
                            _ => {
                                return Err(CompileError::new(
                                    format!("Math.{property} is not supported"),
                                    pos.line,
                                    pos.col,
                                ))
                            }
                        };
                        let idx = self.number(value);
                        self.emit(Op::Const(idx));
                        return Ok(());
                    }
                }
                if property != "length" {
                    return Err(CompileError::new(
                        format!("property '{property}' is not supported"),
                        pos.line,
                        pos.col,
                    ));
                }
                self.expr(object)?;
                self.emit(Op::Length);
            }
        }
        Ok(())
    }

    fn read(&mut self, name: &str, pos: Pos) -> Result<()> {
        if let Some(binding) = self.resolve(name) {
            self.load(binding);
            return Ok(());
        }
        if self.function_index.contains_key(name) {
            return Err(CompileError::new(
                format!("function '{name}' cannot be used as a value"),
                pos.line,
                pos.col,
            ));
        }
        match name {
            "NaN" => {
                let idx = self.number(f64::NAN);
                self.emit(Op::Const(idx));
            }
            "Infinity" => {
                let idx = self.number(f64::INFINITY);
                self.emit(Op::Const(idx));
            }
            _ => {
                let idx = self.string(name);
                self.emit(Op::ThrowReference(idx));
            }
        }
        Ok(())
    }

    fn writable(&self, name: &str, pos: Pos) -> Result<Binding> {
        match self.resolve(name) {
            Some(binding) if binding.constant => Err(CompileError::new(
                format!("Assignment to constant variable '{name}'"),
                pos.line,
                pos.col,
            )),
            Some(binding) => Ok(binding),
            None => Err(CompileError::new(
                format!("Cannot assign to undeclared variable '{name}'"),
                pos.line,
                pos.col,
            )),
        }
    }

    fn call(&mut self, callee: &Callee, args: &[Expr], pos: Pos) -> Result<()> {
        match callee {
            Callee::Named(name) => {
                if self.resolve(name).is_some() {
                    let idx = self.string(name);
                    self.emit(Op::ThrowNotCallable(idx));
                    return Ok(());
                }
                let Some(&func) = self.function_index.get(name) else {
                    let idx = self.string(name);
                    self.emit(Op::ThrowReference(idx));
                    return Ok(());
                };
                for arg in args {
                    self.expr(arg)?;
                }
                self.emit(Op::Call {
                    func,
                    argc: args.len() as u32,
                });
            }
            Callee::Member { object, method } => {
                if !matches!(object.as_str(), "console" | "Math") || self.resolve(object).is_some()
                {
                    return Err(CompileError::new(
                        format!("method calls on '{object}' are not supported"),
                        pos.line,
                        pos.col,
                    ));
                }
                let full = format!("{object}.{method}");
                let Some(intrinsic) = Intrinsic::from_name(&full) else {
                    let idx = self.string(&full);
                    self.emit(Op::ThrowNotCallable(idx));
                    return Ok(());
                };
                for arg in args {
                    self.expr(arg)?;
                }
                self.emit(Op::Intrinsic {
                    intrinsic,
                    argc: args.len() as u32,
                });
            }
        }
        Ok(())
    }
}

/// Position of the first located token of `expr`, walking left operands.
fn leftmost_pos(mut expr: &Expr) -> Pos {
    loop {
        match expr {
            Expr::Unary(_, inner)
            | Expr::Binary(_, inner, _)
            | Expr::Logical(_, inner, _)
            | Expr::Conditional(inner, _, _) => expr = &**inner,
            Expr::Member { object, .. } => expr = &**object,
            Expr::Ident(_, pos)
            | Expr::Assign { pos, .. }
            | Expr::Update { pos, .. }
            | Expr::Call { pos, .. } => return *pos,
            _ => return Pos { line: 1, col: 1 },
        }
    }
}

fn binary_op(op: BinaryOp) -> Op {
    match op {
        BinaryOp::Add => Op::Add,
        BinaryOp::Sub => Op::Sub,
        BinaryOp::Mul => Op::Mul,
        BinaryOp::Div => Op::Div,
        BinaryOp::Rem => Op::Rem,
        BinaryOp::Lt => Op::Lt,
        BinaryOp::Le => Op::Le,
        BinaryOp::Gt => Op::Gt,
        BinaryOp::Ge => Op::Ge,
        BinaryOp::Eq => Op::Eq,
        BinaryOp::Ne => Op::Ne,
        BinaryOp::StrictEq => Op::StrictEq,
        BinaryOp::StrictNe => Op::StrictNe,
    }
}

#[cfg(test)]
#[path = "../../../tests/unit/kernel/compiler/codegen.rs"]
mod tests;
