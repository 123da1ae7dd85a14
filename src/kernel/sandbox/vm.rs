//! Stack interpreter for compiled scripts. Runs inside an execution context
//! thread and checks the kill flag before every instruction.

use std::borrow::Cow;
use std::cmp::Ordering as CmpOrdering;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};

use super::protocol::LogLevel;
use crate::kernel::script::{Constant, Intrinsic, Op, Script};

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    Str(Rc<str>),
}

impl Value {
    pub fn to_number(&self) -> f64 {
        match self {
            Value::Undefined => f64::NAN,
            Value::Null => 0.0,
            Value::Bool(b) => f64::from(u8::from(*b)),
            Value::Number(n) => *n,
            Value::Str(s) => string_to_number(s),
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::Str(s) => !s.is_empty(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "object",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
        }
    }

    pub fn strict_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            _ => false,
        }
    }

    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined | Value::Null, Value::Undefined | Value::Null) => true,
            (Value::Undefined | Value::Null, _) | (_, Value::Undefined | Value::Null) => false,
            (Value::Bool(_), _) => Value::Number(self.to_number()).loose_eq(other),
            (_, Value::Bool(_)) => self.loose_eq(&Value::Number(other.to_number())),
            (Value::Number(_), Value::Str(_)) | (Value::Str(_), Value::Number(_)) => {
                self.to_number() == other.to_number()
            }
            _ => self.strict_eq(other),
        }
    }

    fn string(s: impl Into<Rc<str>>) -> Value {
        Value::Str(s.into())
    }

    fn as_text(&self) -> Cow<'_, str> {
        match self {
            Value::Str(s) => Cow::Borrowed(s),
            other => Cow::Owned(other.to_string()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => f.write_str("undefined"),
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => f.write_str(&format_number(*n)),
            Value::Str(s) => f.write_str(s),
        }
    }
}

fn string_to_number(s: &str) -> f64 {
    let trimmed = s.trim();
    match trimmed {
        "" => 0.0,
        "Infinity" | "+Infinity" => f64::INFINITY,
        "-Infinity" => f64::NEG_INFINITY,
        // Rust also accepts `inf` and `nan`, JavaScript does not
        t if t
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-')) =>
        {
            t.parse().unwrap_or(f64::NAN)
        }
        _ => f64::NAN,
    }
}

/// Formats a number the way a browser console does.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if n == 0.0 {
        return "0".to_string();
    }
    let abs = n.abs();
    if abs >= 1e21 || abs < 1e-6 {
        let text = format!("{n:e}");
        return match text.split_once('e') {
            Some((mantissa, exp)) if !exp.starts_with('-') => format!("{mantissa}e+{exp}"),
            _ => text,
        };
    }
    format!("{n}")
}

#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub max_call_depth: usize,
    pub max_output_bytes: usize,
    /// Longest string, in UTF-8 bytes, that concatenation may produce.
    pub max_string_bytes: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Fault {
    Killed,
    Error(String),
}

struct Frame {
    func: usize,
    pc: usize,
    base: usize,
}

pub struct Vm<'a> {
    script: &'a Script,
    constants: Vec<Value>,
    globals: Vec<Value>,
    stack: Vec<Value>,
    locals: Vec<Value>,
    frames: Vec<Frame>,
    limits: Limits,
    output_bytes: usize,
    kill: &'a AtomicBool,
}

impl<'a> Vm<'a> {
    pub fn new(script: &'a Script, limits: Limits, kill: &'a AtomicBool) -> Self {
        let constants = script
            .constants
            .iter()
            .map(|c| match c {
                Constant::Number(n) => Value::Number(*n),
                Constant::Str(s) => Value::string(s.as_str()),
            })
            .collect();
        Self {
            script,
            constants,
            globals: vec![Value::Undefined; script.globals as usize],
            stack: Vec::new(),
            locals: Vec::new(),
            frames: Vec::new(),
            limits,
            output_bytes: 0,
            kill,
        }
    }

    fn pop(&mut self) -> Value {
        self.stack.pop().unwrap_or(Value::Undefined)
    }

    /// String `+`. The length is checked before anything is allocated.
    fn concat(&self, lhs: &Value, rhs: &Value) -> Result<Value, Fault> {
        let (lhs, rhs) = (lhs.as_text(), rhs.as_text());
        let len = lhs.len() + rhs.len();
        if len > self.limits.max_string_bytes {
            return Err(Fault::Error("RangeError: Invalid string length".to_string()));
        }
        let mut joined = String::with_capacity(len);
        joined.push_str(&lhs);
        joined.push_str(&rhs);
        Ok(Value::string(joined))
    }

    fn pop_n(&mut self, n: usize) -> Vec<Value> {
        let at = self.stack.len().saturating_sub(n);
        self.stack.split_off(at)
    }

    fn name(&self, index: u32) -> &str {
        self.script.constant_str(index).unwrap_or("<unknown>")
    }

    fn enter(&mut self, func: usize, args: Vec<Value>) -> Result<(), Fault> {
        if self.frames.len() >= self.limits.max_call_depth {
            return Err(Fault::Error(
                "RangeError: Maximum call stack size exceeded".to_string(),
            ));
        }
        let Some(function) = self.script.functions.get(func) else {
            return Err(Fault::Error(format!("invalid function index {func}")));
        };
        let base = self.locals.len();
        let params = function.params as usize;
        self.locals
            .resize(base + function.locals as usize, Value::Undefined);
        for (slot, arg) in args.into_iter().take(params).enumerate() {
            self.locals[base + slot] = arg;
        }
        self.frames.push(Frame { func, pc: 0, base });
        Ok(())
    }

    /// Runs the program body. `emit` receives console output in order.
    pub fn run(&mut self, emit: &mut dyn FnMut(LogLevel, String)) -> Result<Value, Fault> {
        self.enter(0, Vec::new())?;
        loop {
            if self.kill.load(Ordering::Relaxed) {
                return Err(Fault::Killed);
            }
            let Some(frame) = self.frames.last_mut() else {
                return Ok(Value::Undefined);
            };
            let (func, base) = (frame.func, frame.base);
            let Some(&op) = self.script.functions[func].code.get(frame.pc) else {
                return Err(Fault::Error("instruction pointer out of range".to_string()));
            };
            frame.pc += 1;

            match op {
                Op::Const(i) => {
                    let value = self.constants[i as usize].clone();
                    self.stack.push(value);
                }
                Op::Undefined => self.stack.push(Value::Undefined),
                Op::Null => self.stack.push(Value::Null),
                Op::True => self.stack.push(Value::Bool(true)),
                Op::False => self.stack.push(Value::Bool(false)),
                Op::LoadLocal(i) => {
                    let value = self.locals[base + i as usize].clone();
                    self.stack.push(value);
                }
                Op::StoreLocal(i) => {
                    let value = self.pop();
                    self.locals[base + i as usize] = value;
                }
                Op::LoadGlobal(i) => {
                    let value = self.globals[i as usize].clone();
                    self.stack.push(value);
                }
                Op::StoreGlobal(i) => {
                    let value = self.pop();
                    self.globals[i as usize] = value;
                }
                Op::Pop => {
                    self.pop();
                }
                Op::Dup => {
                    let top = self.stack.last().cloned().unwrap_or(Value::Undefined);
                    self.stack.push(top);
                }
                Op::Add => {
                    let rhs = self.pop();
                    let lhs = self.pop();
                    let value = match (&lhs, &rhs) {
                        (Value::Str(_), _) | (_, Value::Str(_)) => self.concat(&lhs, &rhs)?,
                        _ => Value::Number(lhs.to_number() + rhs.to_number()),
                    };
                    self.stack.push(value);
                }
                Op::Sub | Op::Mul | Op::Div | Op::Rem => {
                    let rhs = self.pop().to_number();
                    let lhs = self.pop().to_number();
                    self.stack.push(Value::Number(match op {
                        Op::Sub => lhs - rhs,
                        Op::Mul => lhs * rhs,
                        Op::Div => lhs / rhs,
                        _ => lhs % rhs,
                    }));
                }
                Op::Neg => {
                    let value = -self.pop().to_number();
                    self.stack.push(Value::Number(value));
                }
                Op::ToNumber => {
                    let value = self.pop().to_number();
                    self.stack.push(Value::Number(value));
                }
                Op::Not => {
                    let value = !self.pop().is_truthy();
                    self.stack.push(Value::Bool(value));
                }
                Op::TypeOf => {
                    let name = self.pop().type_name();
                    self.stack.push(Value::string(name));
                }
                Op::Length => {
                    let value = match self.pop() {
                        Value::Str(s) => Value::Number(s.encode_utf16().count() as f64),
                        v @ (Value::Undefined | Value::Null) => {
                            return Err(Fault::Error(format!(
                                "TypeError: Cannot read properties of {v} (reading 'length')"
                            )))
                        }
                        _ => Value::Undefined,
                    };
                    self.stack.push(value);
                }
                Op::Lt | Op::Le | Op::Gt | Op::Ge => {
                    let rhs = self.pop();
                    let lhs = self.pop();
                    let ordering = compare(&lhs, &rhs);
                    let result = match (op, ordering) {
                        (_, None) => false,
                        (Op::Lt, Some(o)) => o == CmpOrdering::Less,
                        (Op::Le, Some(o)) => o != CmpOrdering::Greater,
                        (Op::Gt, Some(o)) => o == CmpOrdering::Greater,
                        (_, Some(o)) => o != CmpOrdering::Less,
                    };
                    self.stack.push(Value::Bool(result));
                }
                Op::Eq | Op::Ne | Op::StrictEq | Op::StrictNe => {
                    let rhs = self.pop();
                    let lhs = self.pop();
                    let result = match op {
                        Op::Eq => lhs.loose_eq(&rhs),
                        Op::Ne => !lhs.loose_eq(&rhs),
                        Op::StrictEq => lhs.strict_eq(&rhs),
                        _ => !lhs.strict_eq(&rhs),
                    };
                    self.stack.push(Value::Bool(result));
                }
                Op::Jump(target) => self.jump(target),
                Op::JumpIfFalse(target) => {
                    if !self.pop().is_truthy() {
                        self.jump(target);
                    }
                }
                Op::JumpIfTrue(target) => {
                    if self.pop().is_truthy() {
                        self.jump(target);
                    }
                }
                Op::Call { func, argc } => {
                    let args = self.pop_n(argc as usize);
                    self.enter(func as usize, args)?;
                }
                Op::Intrinsic { intrinsic, argc } => {
                    let args = self.pop_n(argc as usize);
                    let value = self.intrinsic(intrinsic, &args, emit)?;
                    self.stack.push(value);
                }
                Op::Throw => {
                    let value = self.pop();
                    return Err(Fault::Error(format!("Uncaught {value}")));
                }
                Op::ThrowReference(i) => {
                    return Err(Fault::Error(format!(
                        "ReferenceError: {} is not defined",
                        self.name(i)
                    )));
                }
                Op::ThrowNotCallable(i) => {
                    return Err(Fault::Error(format!(
                        "TypeError: {} is not a function",
                        self.name(i)
                    )));
                }
                Op::Return => {
                    let value = self.pop();
                    if let Some(frame) = self.frames.pop() {
                        self.locals.truncate(frame.base);
                    }
                    if self.frames.is_empty() {
                        return Ok(value);
                    }
                    self.stack.push(value);
                }
            }
        }
    }

    fn jump(&mut self, target: u32) {
        if let Some(frame) = self.frames.last_mut() {
            frame.pc = target as usize;
        }
    }

    fn intrinsic(
        &mut self,
        intrinsic: Intrinsic,
        args: &[Value],
        emit: &mut dyn FnMut(LogLevel, String),
    ) -> Result<Value, Fault> {
        let level = match intrinsic {
            Intrinsic::ConsoleLog => Some(LogLevel::Log),
            Intrinsic::ConsoleInfo => Some(LogLevel::Info),
            Intrinsic::ConsoleWarn => Some(LogLevel::Warn),
            Intrinsic::ConsoleError => Some(LogLevel::Error),
            _ => None,
        };
        if let Some(level) = level {
            let message = args
                .iter()
                .map(Value::to_string)
                .collect::<Vec<_>>()
                .join(" ");
            self.output_bytes += message.len() + 1;
            if self.output_bytes > self.limits.max_output_bytes {
                return Err(Fault::Error("output limit exceeded".to_string()));
            }
            emit(level, message);
            return Ok(Value::Undefined);
        }

        let arg = |i: usize| args.get(i).map_or(f64::NAN, Value::to_number);
        let n = match intrinsic {
            Intrinsic::MathFloor => arg(0).floor(),
            Intrinsic::MathCeil => arg(0).ceil(),
            Intrinsic::MathRound => (arg(0) + 0.5).floor(),
            Intrinsic::MathAbs => arg(0).abs(),
            Intrinsic::MathSqrt => arg(0).sqrt(),
            Intrinsic::MathPow => arg(0).powf(arg(1)),
            Intrinsic::MathMin => args.iter().map(Value::to_number).fold(f64::INFINITY, |acc, x| {
                if acc.is_nan() || x.is_nan() {
                    f64::NAN
                } else {
                    acc.min(x)
                }
            }),
            Intrinsic::MathMax => {
                args.iter()
                    .map(Value::to_number)
                    .fold(f64::NEG_INFINITY, |acc, x| {
                        if acc.is_nan() || x.is_nan() {
                            f64::NAN
                        } else {
                            acc.max(x)
                        }
                    })
            }
            _ => f64::NAN,
        };
        Ok(Value::Number(n))
    }
}

fn compare(lhs: &Value, rhs: &Value) -> Option<CmpOrdering> {
    match (lhs, rhs) {
        (Value::Str(a), Value::Str(b)) => Some(a.encode_utf16().cmp(b.encode_utf16())),
        _ => lhs.to_number().partial_cmp(&rhs.to_number()),
    }
}

#[cfg(test)]
#[path = "../../../tests/unit/kernel/sandbox/vm.rs"]
mod tests;
