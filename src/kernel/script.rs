//! Compiled script format shared by the compiler and the sandbox.
//!
//! A script is plain text: a header, the options it was compiled with, a
//! constant table and one instruction listing per function. Function 0 is the
//! program body.
//!
//! ```text
//! lyx-script v1
//! target es2020
//! module esnext
//! strict true
//! globals 1
//! const num 2.0
//! func <main> 0 0
//!   const 0
//!   intrinsic console.log 1
//!   pop
//!   undefined
//!   return
//! end
//! ```

use std::fmt::{self, Write as _};
use std::str::FromStr;

pub const SCRIPT_HEADER: &str = "lyx-script v1";
pub const MAIN_FUNCTION: &str = "<main>";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptOptions {
    pub target: String,
    pub module: String,
    pub strict: bool,
}

impl Default for ScriptOptions {
    fn default() -> Self {
        Self {
            target: "es2020".to_string(),
            module: "esnext".to_string(),
            strict: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Number(f64),
    Str(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Intrinsic {
    ConsoleLog,
    ConsoleInfo,
    ConsoleWarn,
    ConsoleError,
    MathFloor,
    MathCeil,
    MathRound,
    MathAbs,
    MathSqrt,
    MathMin,
    MathMax,
    MathPow,
}

impl Intrinsic {
    pub const ALL: [Intrinsic; 12] = [
        Intrinsic::ConsoleLog,
        Intrinsic::ConsoleInfo,
        Intrinsic::ConsoleWarn,
        Intrinsic::ConsoleError,
        Intrinsic::MathFloor,
        Intrinsic::MathCeil,
        Intrinsic::MathRound,
        Intrinsic::MathAbs,
        Intrinsic::MathSqrt,
        Intrinsic::MathMin,
        Intrinsic::MathMax,
        Intrinsic::MathPow,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Intrinsic::ConsoleLog => "console.log",
            Intrinsic::ConsoleInfo => "console.info",
            Intrinsic::ConsoleWarn => "console.warn",
            Intrinsic::ConsoleError => "console.error",
            Intrinsic::MathFloor => "Math.floor",
            Intrinsic::MathCeil => "Math.ceil",
            Intrinsic::MathRound => "Math.round",
            Intrinsic::MathAbs => "Math.abs",
            Intrinsic::MathSqrt => "Math.sqrt",
            Intrinsic::MathMin => "Math.min",
            Intrinsic::MathMax => "Math.max",
            Intrinsic::MathPow => "Math.pow",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|i| i.name() == name)
    }
}

/// Stack machine instructions. Jump targets are absolute instruction indexes
/// within the same function.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Op {
    Const(u32),
    Undefined,
    Null,
    True,
    False,
    LoadLocal(u32),
    StoreLocal(u32),
    LoadGlobal(u32),
    StoreGlobal(u32),
    Pop,
    Dup,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Neg,
    ToNumber,
    Not,
    TypeOf,
    Length,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    StrictEq,
    StrictNe,
    Jump(u32),
    JumpIfFalse(u32),
    JumpIfTrue(u32),
    Call { func: u32, argc: u32 },
    Intrinsic { intrinsic: Intrinsic, argc: u32 },
    Throw,
    /// Raises `ReferenceError` for the name stored in the given constant.
    ThrowReference(u32),
    /// Raises `TypeError: <name> is not a function`.
    ThrowNotCallable(u32),
    Return,
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Op::Const(i) => write!(f, "const {i}"),
            Op::Undefined => f.write_str("undefined"),
            Op::Null => f.write_str("null"),
            Op::True => f.write_str("true"),
            Op::False => f.write_str("false"),
            Op::LoadLocal(i) => write!(f, "load.local {i}"),
            Op::StoreLocal(i) => write!(f, "store.local {i}"),
            Op::LoadGlobal(i) => write!(f, "load.global {i}"),
            Op::StoreGlobal(i) => write!(f, "store.global {i}"),
            Op::Pop => f.write_str("pop"),
            Op::Dup => f.write_str("dup"),
            Op::Add => f.write_str("add"),
            Op::Sub => f.write_str("sub"),
            Op::Mul => f.write_str("mul"),
            Op::Div => f.write_str("div"),
            Op::Rem => f.write_str("rem"),
            Op::Neg => f.write_str("neg"),
            Op::ToNumber => f.write_str("tonumber"),
            Op::Not => f.write_str("not"),
            Op::TypeOf => f.write_str("typeof"),
            Op::Length => f.write_str("length"),
            Op::Lt => f.write_str("lt"),
            Op::Le => f.write_str("le"),
            Op::Gt => f.write_str("gt"),
            Op::Ge => f.write_str("ge"),
            Op::Eq => f.write_str("eq"),
            Op::Ne => f.write_str("ne"),
            Op::StrictEq => f.write_str("seq"),
            Op::StrictNe => f.write_str("sne"),
            Op::Jump(t) => write!(f, "jump {t}"),
            Op::JumpIfFalse(t) => write!(f, "jump.false {t}"),
            Op::JumpIfTrue(t) => write!(f, "jump.true {t}"),
            Op::Call { func, argc } => write!(f, "call {func} {argc}"),
            Op::Intrinsic { intrinsic, argc } => {
                write!(f, "intrinsic {} {argc}", intrinsic.name())
            }
            Op::Throw => f.write_str("throw"),
            Op::ThrowReference(i) => write!(f, "throw.reference {i}"),
            Op::ThrowNotCallable(i) => write!(f, "throw.notcallable {i}"),
            Op::Return => f.write_str("return"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: String,
    pub params: u32,
    /// Slot count including parameters.
    pub locals: u32,
    pub code: Vec<Op>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Script {
    pub options: ScriptOptions,
    pub globals: u32,
    pub constants: Vec<Constant>,
    pub functions: Vec<Function>,
}

impl Script {
    pub fn main(&self) -> Option<&Function> {
        self.functions.first()
    }

    pub fn constant_str(&self, index: u32) -> Option<&str> {
        match self.constants.get(index as usize)? {
            Constant::Str(s) => Some(s),
            Constant::Number(_) => None,
        }
    }
}

impl fmt::Display for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{SCRIPT_HEADER}")?;
        writeln!(f, "target {}", self.options.target)?;
        writeln!(f, "module {}", self.options.module)?;
        writeln!(f, "strict {}", self.options.strict)?;
        writeln!(f, "globals {}", self.globals)?;
        for constant in &self.constants {
            match constant {
                // `{:?}` on f64 is the shortest round-trip form
                Constant::Number(n) => writeln!(f, "const num {n:?}")?,
                Constant::Str(s) => {
                    let quoted = serde_json::to_string(s).map_err(|_| fmt::Error)?;
                    writeln!(f, "const str {quoted}")?;
                }
            }
        }
        for function in &self.functions {
            writeln!(
                f,
                "func {} {} {}",
                function.name, function.params, function.locals
            )?;
            for op in &function.code {
                writeln!(f, "  {op}")?;
            }
            writeln!(f, "end")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptError {
    pub line: usize,
    pub message: String,
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "malformed script at line {}: {}", self.line, self.message)
    }
}

impl std::error::Error for ScriptError {}

struct Loader<'a> {
    lines: std::iter::Enumerate<std::str::Lines<'a>>,
    line: usize,
}

impl<'a> Loader<'a> {
    fn error(&self, message: impl Into<String>) -> ScriptError {
        ScriptError {
            line: self.line,
            message: message.into(),
        }
    }

    fn next_line(&mut self) -> Option<&'a str> {
        for (idx, raw) in self.lines.by_ref() {
            self.line = idx + 1;
            let trimmed = raw.trim();
            if !trimmed.is_empty() {
                return Some(trimmed);
            }
        }
        None
    }

    fn expect_line(&mut self) -> Result<&'a str, ScriptError> {
        self.next_line()
            .ok_or_else(|| self.error("unexpected end of script"))
    }

    fn keyed(&mut self, key: &str) -> Result<&'a str, ScriptError> {
        let line = self.expect_line()?;
        line.strip_prefix(key)
            .and_then(|rest| rest.strip_prefix(' '))
            .ok_or_else(|| self.error(format!("expected `{key}`")))
    }

    fn number<T: FromStr>(&self, text: Option<&str>) -> Result<T, ScriptError> {
        text.and_then(|t| t.parse().ok())
            .ok_or_else(|| self.error("expected a number"))
    }

    fn op(&self, text: &str) -> Result<Op, ScriptError> {
        let mut parts = text.split_whitespace();
        let mnemonic = parts.next().unwrap_or_default();
        let op = match mnemonic {
            "const" => Op::Const(self.number(parts.next())?),
            "undefined" => Op::Undefined,
            "null" => Op::Null,
            "true" => Op::True,
            "false" => Op::False,
            "load.local" => Op::LoadLocal(self.number(parts.next())?),
            "store.local" => Op::StoreLocal(self.number(parts.next())?),
            "load.global" => Op::LoadGlobal(self.number(parts.next())?),
            "store.global" => Op::StoreGlobal(self.number(parts.next())?),
            "pop" => Op::Pop,
            "dup" => Op::Dup,
            "add" => Op::Add,
            "sub" => Op::Sub,
            "mul" => Op::Mul,
            "div" => Op::Div,
            "rem" => Op::Rem,
            "neg" => Op::Neg,
            "tonumber" => Op::ToNumber,
            "not" => Op::Not,
            "typeof" => Op::TypeOf,
            "length" => Op::Length,
            "lt" => Op::Lt,
            "le" => Op::Le,
            "gt" => Op::Gt,
            "ge" => Op::Ge,
            "eq" => Op::Eq,
            "ne" => Op::Ne,
            "seq" => Op::StrictEq,
            "sne" => Op::StrictNe,
            "jump" => Op::Jump(self.number(parts.next())?),
            "jump.false" => Op::JumpIfFalse(self.number(parts.next())?),
            "jump.true" => Op::JumpIfTrue(self.number(parts.next())?),
            "call" => Op::Call {
                func: self.number(parts.next())?,
                argc: self.number(parts.next())?,
            },
            "intrinsic" => {
                let name = parts.next().unwrap_or_default();
                let intrinsic = Intrinsic::from_name(name)
                    .ok_or_else(|| self.error(format!("unknown intrinsic `{name}`")))?;
                Op::Intrinsic {
                    intrinsic,
                    argc: self.number(parts.next())?,
                }
            }
            "throw" => Op::Throw,
            "throw.reference" => Op::ThrowReference(self.number(parts.next())?),
            "throw.notcallable" => Op::ThrowNotCallable(self.number(parts.next())?),
            "return" => Op::Return,
            other => return Err(self.error(format!("unknown instruction `{other}`"))),
        };
        if parts.next().is_some() {
            return Err(self.error("trailing operands"));
        }
        Ok(op)
    }
}

impl FromStr for Script {
    type Err = ScriptError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let mut loader = Loader {
            lines: text.lines().enumerate(),
            line: 0,
        };

        if loader.expect_line()? != SCRIPT_HEADER {
            return Err(loader.error("missing script header"));
        }
        let options = ScriptOptions {
            target: loader.keyed("target")?.to_string(),
            module: loader.keyed("module")?.to_string(),
            strict: {
                let raw = loader.keyed("strict")?;
                loader.number(Some(raw))?
            },
        };
        let globals = {
            let raw = loader.keyed("globals")?;
            loader.number(Some(raw))?
        };

        let mut constants = Vec::new();
        let mut functions = Vec::new();
        while let Some(line) = loader.next_line() {
            if let Some(rest) = line.strip_prefix("const num ") {
                constants.push(Constant::Number(loader.number(Some(rest))?));
            } else if let Some(rest) = line.strip_prefix("const str ") {
                let value: String = serde_json::from_str(rest)
                    .map_err(|e| loader.error(format!("bad string constant: {e}")))?;
                constants.push(Constant::Str(value));
            } else if let Some(rest) = line.strip_prefix("func ") {
                let mut parts = rest.split_whitespace();
                let name = parts
                    .next()
                    .ok_or_else(|| loader.error("function without a name"))?
                    .to_string();
                let params = loader.number(parts.next())?;
                let locals = loader.number(parts.next())?;
                let mut code = Vec::new();
                loop {
                    let line = loader.expect_line()?;
                    if line == "end" {
                        break;
                    }
                    code.push(loader.op(line)?);
                }
                functions.push(Function {
                    name,
                    params,
                    locals,
                    code,
                });
            } else {
                return Err(loader.error(format!("unexpected line `{line}`")));
            }
        }

        let script = Script {
            options,
            globals,
            constants,
            functions,
        };
        script.validate().map_err(|message| ScriptError {
            line: 0,
            message,
        })?;
        Ok(script)
    }
}

impl Script {
    /// Checks every operand against the tables it indexes so the interpreter
    /// never has to.
    pub fn validate(&self) -> Result<(), String> {
        if self.functions.is_empty() {
            return Err("script has no functions".to_string());
        }
        for function in &self.functions {
            if function.locals < function.params {
                return Err(format!("{}: fewer locals than parameters", function.name));
            }
            let len = function.code.len() as u32;
            if function.code.last() != Some(&Op::Return) {
                return Err(format!("{}: does not end with return", function.name));
            }
            for (pc, op) in function.code.iter().enumerate() {
                let bad = match *op {
                    Op::Const(i) => i as usize >= self.constants.len(),
                    Op::ThrowReference(i) | Op::ThrowNotCallable(i) => {
                        self.constant_str(i).is_none()
                    }
                    Op::LoadLocal(i) | Op::StoreLocal(i) => i >= function.locals,
                    Op::LoadGlobal(i) | Op::StoreGlobal(i) => i >= self.globals,
                    Op::Jump(t) | Op::JumpIfFalse(t) | Op::JumpIfTrue(t) => t >= len,
                    Op::Call { func, .. } => func == 0 || func as usize >= self.functions.len(),
                    _ => false,
                };
                if bad {
                    return Err(format!("{}: operand out of range at {pc}", function.name));
                }
            }
        }
        Ok(())
    }

    /// Human-readable listing with instruction indexes, used for debugging.
    pub fn disassemble(&self) -> String {
        let mut out = String::new();
        for function in &self.functions {
            let _ = writeln!(out, "{}({}):", function.name, function.params);
            for (pc, op) in function.code.iter().enumerate() {
                let _ = writeln!(out, "  {pc:>4}  {op}");
            }
        }
        out
    }
}

#[cfg(test)]
#[path = "../../tests/unit/kernel/script.rs"]
mod tests;
