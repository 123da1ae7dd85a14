//! Recursive-descent parser. Type annotations, type parameters, `interface`,
//! `type` aliases, `as` casts and `export` are consumed and dropped here.

use super::ast::*;
use super::lexer::{Token, TokenKind};
use super::CompileError;

type Result<T> = std::result::Result<T, CompileError>;

const RESERVED: &[&str] = &[
    "break", "case", "class", "const", "continue", "default", "do", "else", "export", "false",
    "for", "function", "if", "import", "let", "new", "null", "return", "switch", "this", "throw",
    "true", "typeof", "var", "void", "while",
];

const ASSIGN_OPS: &[(&str, Option<BinaryOp>)] = &[
    ("=", None),
    ("+=", Some(BinaryOp::Add)),
    ("-=", Some(BinaryOp::Sub)),
    ("*=", Some(BinaryOp::Mul)),
    ("/=", Some(BinaryOp::Div)),
    ("%=", Some(BinaryOp::Rem)),
];

/// Deepest statement or expression nesting the parser accepts.
const MAX_NESTING: usize = 256;

pub fn parse(tokens: Vec<Token>) -> Result<Program> {
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let mut body = Vec::new();
    while !parser.at_eof() {
        body.push(parser.statement()?);
    }
    Ok(Program { body })
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        self.peek_at(0)
    }

    fn peek_at(&self, offset: usize) -> &Token {
        let idx = (self.pos + offset).min(self.tokens.len().saturating_sub(1));
        &self.tokens[idx]
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn at_eof(&self) -> bool {
        self.peek().kind == TokenKind::Eof
    }

    fn pos_here(&self) -> Pos {
        let t = self.peek();
        Pos {
            line: t.line,
            col: t.col,
        }
    }

    fn error_here(&self, message: impl Into<String>) -> CompileError {
        let t = self.peek();
        CompileError::new(message, t.line, t.col)
    }

    fn unexpected(&self) -> CompileError {
        let found = match &self.peek().kind {
            TokenKind::Number(n) => n.to_string(),
            TokenKind::Str(s) => format!("\"{s}\""),
            TokenKind::Ident(name) => name.clone(),
            TokenKind::Punct(p) => p.to_string(),
            TokenKind::Eof => "end of input".to_string(),
        };
        self.error_here(format!("unexpected token '{found}'"))
    }

    fn at_punct(&self, punct: &str) -> bool {
        matches!(&self.peek().kind, TokenKind::Punct(p) if *p == punct)
    }

    fn punct_at(&self, offset: usize, punct: &str) -> bool {
        matches!(&self.peek_at(offset).kind, TokenKind::Punct(p) if *p == punct)
    }

    fn at_ident(&self, name: &str) -> bool {
        matches!(&self.peek().kind, TokenKind::Ident(n) if n == name)
    }

    fn ident_at(&self, offset: usize) -> bool {
        matches!(self.peek_at(offset).kind, TokenKind::Ident(_))
    }

    fn eat_punct(&mut self, punct: &str) -> bool {
        if self.at_punct(punct) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_ident(&mut self, name: &str) -> bool {
        if self.at_ident(name) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, punct: &str) -> Result<()> {
        if self.eat_punct(punct) {
            Ok(())
        } else {
            Err(self.error_here(format!("expected '{punct}'")))
        }
    }

    /// Any identifier, reserved words included (property names).
    fn expect_name(&mut self) -> Result<String> {
        match &self.peek().kind {
            TokenKind::Ident(name) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            _ => Err(self.error_here("expected an identifier")),
        }
    }

    fn nest(&mut self) -> Result<()> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(self.error_here("nested too deeply"));
        }
        Ok(())
    }

    /// Runs `f` one nesting level down. Every recursive entry point goes
    /// through here so that no input can exhaust the stack.
    fn nested<T>(&mut self, f: fn(&mut Self) -> Result<T>) -> Result<T> {
        let base = self.depth;
        self.nest()?;
        let result = f(self);
        self.depth = base;
        result
    }

    fn expect_binding(&mut self) -> Result<(String, Pos)> {
        let pos = self.pos_here();
        let name = self.expect_name()?;
        if RESERVED.contains(&name.as_str()) {
            return Err(CompileError::new(
                format!("'{name}' is a reserved word"),
                pos.line,
                pos.col,
            ));
        }
        Ok((name, pos))
    }

    fn statement(&mut self) -> Result<Stmt> {
        self.nested(Self::bare_statement)
    }

    fn bare_statement(&mut self) -> Result<Stmt> {
        if self.at_punct("{") {
            return Ok(Stmt::Block(self.block()?));
        }
        if self.eat_punct(";") {
            return Ok(Stmt::Empty);
        }

        let keyword = match &self.peek().kind {
            TokenKind::Ident(name) => name.clone(),
            _ => String::new(),
        };
        match keyword.as_str() {
            "export" => {
                self.advance();
                self.eat_ident("default");
                self.statement()
            }
            "let" | "const" | "var" => {
                let decl = self.declaration()?;
                self.eat_punct(";");
                Ok(decl)
            }
            "function" => Ok(Stmt::Function(self.function()?)),
            "if" => {
                self.advance();
                self.expect_punct("(")?;
                let cond = self.expression()?;
                self.expect_punct(")")?;
                let then = Box::new(self.statement()?);
                let otherwise = if self.eat_ident("else") {
                    Some(Box::new(self.statement()?))
                } else {
                    None
                };
                Ok(Stmt::If {
                    cond,
                    then,
                    otherwise,
                })
            }
            "while" => {
                self.advance();
                self.expect_punct("(")?;
                let cond = self.expression()?;
                self.expect_punct(")")?;
                let body = Box::new(self.statement()?);
                Ok(Stmt::While { cond, body })
            }
            "for" => self.for_statement(),
            "break" | "continue" => {
                let pos = self.pos_here();
                self.advance();
                self.eat_punct(";");
                Ok(if keyword == "break" {
                    Stmt::Break(pos)
                } else {
                    Stmt::Continue(pos)
                })
            }
            "return" => {
                self.advance();
                let value = if self.at_punct(";") || self.at_punct("}") || self.at_eof() {
                    None
                } else {
                    Some(self.expression()?)
                };
                self.eat_punct(";");
                Ok(Stmt::Return(value))
            }
            "throw" => {
                self.advance();
                let value = self.expression()?;
                self.eat_punct(";");
                Ok(Stmt::Throw(value))
            }
            "interface" if self.ident_at(1) => {
                self.skip_interface()?;
                Ok(Stmt::Empty)
            }
            "type" if self.ident_at(1) && (self.punct_at(2, "=") || self.punct_at(2, "<")) => {
                self.skip_type_alias()?;
                Ok(Stmt::Empty)
            }
            "class" | "import" | "switch" | "do" | "new" => Err(self.error_here(format!(
                "'{keyword}' is not supported in Lyx script"
            ))),
            _ => {
                let expr = self.expression()?;
                self.eat_punct(";");
                Ok(Stmt::Expr(expr))
            }
        }
    }

    fn block(&mut self) -> Result<Vec<Stmt>> {
        self.expect_punct("{")?;
        let mut body = Vec::new();
        while !self.at_punct("}") {
            if self.at_eof() {
                return Err(self.error_here("expected '}'"));
            }
            body.push(self.statement()?);
        }
        self.advance();
        Ok(body)
    }

    fn declaration(&mut self) -> Result<Stmt> {
        let kind = match self.expect_name()?.as_str() {
            "let" => DeclKind::Let,
            "const" => DeclKind::Const,
            _ => DeclKind::Var,
        };
        let mut decls = Vec::new();
        loop {
            let (name, pos) = self.expect_binding()?;
            if self.eat_punct(":") {
                self.skip_type()?;
            }
            let init = if self.eat_punct("=") {
                Some(self.assignment()?)
            } else {
                None
            };
            decls.push(Declarator { name, init, pos });
            if !self.eat_punct(",") {
                break;
            }
        }
        Ok(Stmt::Decl { kind, decls })
    }

    fn function(&mut self) -> Result<FunctionDecl> {
        self.advance();
        let (name, pos) = self.expect_binding()?;
        if self.at_punct("<") {
            self.skip_angle()?;
        }
        self.expect_punct("(")?;
        let mut params = Vec::new();
        while !self.at_punct(")") {
            let (param, _) = self.expect_binding()?;
            self.eat_punct("?");
            if self.eat_punct(":") {
                self.skip_type()?;
            }
            if self.at_punct("=") {
                return Err(self.error_here("default parameter values are not supported"));
            }
            params.push(param);
            if !self.eat_punct(",") {
                break;
            }
        }
        self.expect_punct(")")?;
        if self.eat_punct(":") {
            self.skip_type()?;
        }
        let body = self.block()?;
        Ok(FunctionDecl {
            name,
            params,
            body,
            pos,
        })
    }

    fn for_statement(&mut self) -> Result<Stmt> {
        self.advance();
        self.expect_punct("(")?;
        let init = if self.at_punct(";") {
            None
        } else if self.at_ident("let") || self.at_ident("const") || self.at_ident("var") {
            Some(Box::new(self.declaration()?))
        } else {
            Some(Box::new(Stmt::Expr(self.expression()?)))
        };
        self.expect_punct(";")?;
        let cond = if self.at_punct(";") {
            None
        } else {
            Some(self.expression()?)
        };
        self.expect_punct(";")?;
        let step = if self.at_punct(")") {
            None
        } else {
            Some(self.expression()?)
        };
        self.expect_punct(")")?;
        let body = Box::new(self.statement()?);
        Ok(Stmt::For {
            init,
            cond,
            step,
            body,
        })
    }

    fn expression(&mut self) -> Result<Expr> {
        self.assignment()
    }

    fn assignment(&mut self) -> Result<Expr> {
        self.nested(Self::bare_assignment)
    }

    fn bare_assignment(&mut self) -> Result<Expr> {
        let target = self.conditional()?;
        let Some((punct, op)) = ASSIGN_OPS.iter().find(|(p, _)| self.at_punct(p)) else {
            return Ok(target);
        };
        let Expr::Ident(name, pos) = target else {
            return Err(self.error_here(format!(
                "invalid left-hand side in assignment '{punct}'"
            )));
        };
        self.advance();
        let value = Box::new(self.assignment()?);
        Ok(Expr::Assign {
            target: name,
            op: *op,
            value,
            pos,
        })
    }

    fn conditional(&mut self) -> Result<Expr> {
        let cond = self.logical_or()?;
        if !self.eat_punct("?") {
            return Ok(cond);
        }
        let then = self.assignment()?;
        self.expect_punct(":")?;
        let otherwise = self.assignment()?;
        Ok(Expr::Conditional(
            Box::new(cond),
            Box::new(then),
            Box::new(otherwise),
        ))
    }

    fn logical_or(&mut self) -> Result<Expr> {
        let base = self.depth;
        let mut lhs = self.logical_and()?;
        while self.eat_punct("||") {
            self.nest()?;
            let rhs = self.logical_and()?;
            lhs = Expr::Logical(LogicalOp::Or, Box::new(lhs), Box::new(rhs));
        }
        self.depth = base;
        Ok(lhs)
    }

    fn logical_and(&mut self) -> Result<Expr> {
        let base = self.depth;
        let mut lhs = self.equality()?;
        while self.eat_punct("&&") {
            self.nest()?;
            let rhs = self.equality()?;
            lhs = Expr::Logical(LogicalOp::And, Box::new(lhs), Box::new(rhs));
        }
        self.depth = base;
        Ok(lhs)
    }

    fn binary_level(
        &mut self,
        ops: &[(&str, BinaryOp)],
        next: fn(&mut Self) -> Result<Expr>,
    ) -> Result<Expr> {
        // each operator folded into `lhs` makes the tree one level deeper
        let base = self.depth;
        let mut lhs = next(self)?;
        loop {
            let Some((_, op)) = ops.iter().find(|(p, _)| self.at_punct(p)) else {
                self.depth = base;
                return Ok(lhs);
            };
            let op = *op;
            self.advance();
            self.nest()?;
            let rhs = next(self)?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn equality(&mut self) -> Result<Expr> {
        self.binary_level(
            &[
                ("===", BinaryOp::StrictEq),
                ("!==", BinaryOp::StrictNe),
                ("==", BinaryOp::Eq),
                ("!=", BinaryOp::Ne),
            ],
            Self::relational,
        )
    }

    fn relational(&mut self) -> Result<Expr> {
        const OPS: &[(&str, BinaryOp)] = &[
            ("<=", BinaryOp::Le),
            (">=", BinaryOp::Ge),
            ("<", BinaryOp::Lt),
            (">", BinaryOp::Gt),
        ];
        let base = self.depth;
        let mut lhs = self.additive()?;
        loop {
            if self.eat_ident("as") {
                self.skip_type()?;
                continue;
            }
            let Some((_, op)) = OPS.iter().find(|(p, _)| self.at_punct(p)) else {
                self.depth = base;
                return Ok(lhs);
            };
            let op = *op;
            self.advance();
            self.nest()?;
            let rhs = self.additive()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn additive(&mut self) -> Result<Expr> {
        self.binary_level(
            &[("+", BinaryOp::Add), ("-", BinaryOp::Sub)],
            Self::multiplicative,
        )
    }

    fn multiplicative(&mut self) -> Result<Expr> {
        self.binary_level(
            &[
                ("*", BinaryOp::Mul),
                ("/", BinaryOp::Div),
                ("%", BinaryOp::Rem),
            ],
            Self::unary,
        )
    }

    fn unary(&mut self) -> Result<Expr> {
        self.nested(Self::bare_unary)
    }

    fn bare_unary(&mut self) -> Result<Expr> {
        let op = if self.eat_punct("!") {
            Some(UnaryOp::Not)
        } else if self.eat_punct("-") {
            Some(UnaryOp::Neg)
        } else if self.eat_punct("+") {
            Some(UnaryOp::Plus)
        } else if self.eat_ident("typeof") {
            Some(UnaryOp::TypeOf)
        } else {
            None
        };
        if let Some(op) = op {
            return Ok(Expr::Unary(op, Box::new(self.unary()?)));
        }

        if self.at_punct("++") || self.at_punct("--") {
            let increment = self.at_punct("++");
            let pos = self.pos_here();
            self.advance();
            let Expr::Ident(target, _) = self.unary()? else {
                return Err(CompileError::new(
                    "invalid operand for prefix update",
                    pos.line,
                    pos.col,
                ));
            };
            return Ok(Expr::Update {
                target,
                increment,
                prefix: true,
                pos,
            });
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Expr> {
        let expr = self.call_member()?;
        if !(self.at_punct("++") || self.at_punct("--")) {
            return Ok(expr);
        }
        let increment = self.at_punct("++");
        let Expr::Ident(target, pos) = expr else {
            return Err(self.error_here("invalid operand for postfix update"));
        };
        self.advance();
        Ok(Expr::Update {
            target,
            increment,
            prefix: false,
            pos,
        })
    }

    fn call_member(&mut self) -> Result<Expr> {
        let base = self.depth;
        let mut expr = self.primary()?;
        loop {
            if self.at_punct(".") {
                let pos = self.pos_here();
                self.advance();
                self.nest()?;
                let property = self.expect_name()?;
                expr = Expr::Member {
                    object: Box::new(expr),
                    property,
                    pos,
                };
            } else if self.at_punct("(") {
                let pos = self.pos_here();
                let callee = match expr {
                    Expr::Ident(name, _) => Callee::Named(name),
                    Expr::Member {
                        object, property, ..
                    } => match *object {
                        Expr::Ident(object, _) => Callee::Member {
                            object,
                            method: property,
                        },
                        _ => return Err(self.error_here("method calls are not supported")),
                    },
                    _ => return Err(self.error_here("expression is not callable")),
                };
                self.advance();
                let mut args = Vec::new();
                while !self.at_punct(")") {
                    args.push(self.assignment()?);
                    if !self.eat_punct(",") {
                        break;
                    }
                }
                self.expect_punct(")")?;
                expr = Expr::Call { callee, args, pos };
            } else {
                self.depth = base;
                return Ok(expr);
            }
        }
    }

    fn primary(&mut self) -> Result<Expr> {
        let pos = self.pos_here();
        match self.peek().kind.clone() {
            TokenKind::Number(n) => {
                self.advance();
                Ok(Expr::Number(n))
            }
            TokenKind::Str(s) => {
                self.advance();
                Ok(Expr::Str(s))
            }
            TokenKind::Punct("(") => {
                self.advance();
                let expr = self.expression()?;
                self.expect_punct(")")?;
                Ok(expr)
            }
            TokenKind::Punct("[") => Err(self.error_here("array literals are not supported")),
            TokenKind::Ident(name) => {
                let literal = match name.as_str() {
                    "true" => Some(Expr::Bool(true)),
                    "false" => Some(Expr::Bool(false)),
                    "null" => Some(Expr::Null),
                    "undefined" => Some(Expr::Undefined),
                    _ => None,
                };
                if let Some(literal) = literal {
                    self.advance();
                    return Ok(literal);
                }
                if RESERVED.contains(&name.as_str()) {
                    return Err(self.unexpected());
                }
                self.advance();
                Ok(Expr::Ident(name, pos))
            }
            _ => Err(self.unexpected()),
        }
    }

    fn skip_interface(&mut self) -> Result<()> {
        self.advance();
        self.advance();
        if self.at_punct("<") {
            self.skip_angle()?;
        }
        if self.eat_ident("extends") {
            loop {
                self.skip_type()?;
                if !self.eat_punct(",") {
                    break;
                }
            }
        }
        if !self.at_punct("{") {
            return Err(self.error_here("expected '{'"));
        }
        self.skip_balanced()
    }

    fn skip_type_alias(&mut self) -> Result<()> {
        self.advance();
        self.advance();
        if self.at_punct("<") {
            self.skip_angle()?;
        }
        self.expect_punct("=")?;
        self.skip_type()?;
        self.eat_punct(";");
        Ok(())
    }

    fn skip_type(&mut self) -> Result<()> {
        loop {
            while self.eat_punct("|") || self.eat_punct("&") {}
            while self.eat_ident("keyof") || self.eat_ident("typeof") || self.eat_ident("readonly")
            {
            }
            match self.peek().kind.clone() {
                TokenKind::Punct("(") | TokenKind::Punct("{") | TokenKind::Punct("[") => {
                    self.skip_balanced()?
                }
                TokenKind::Ident(_) | TokenKind::Str(_) | TokenKind::Number(_) => {
                    self.advance();
                    while self.eat_punct(".") {
                        self.expect_name()?;
                    }
                }
                _ => return Err(self.error_here("expected a type")),
            }
            if self.at_punct("<") {
                self.skip_angle()?;
            }
            while self.at_punct("[") && self.punct_at(1, "]") {
                self.advance();
                self.advance();
            }
            if self.eat_punct("=>") || self.eat_punct("|") || self.eat_punct("&") {
                continue;
            }
            return Ok(());
        }
    }

    /// Skips from an opening `(`, `[` or `{` to its matching closer.
    fn skip_balanced(&mut self) -> Result<()> {
        let mut depth = 0usize;
        loop {
            match self.peek().kind {
                TokenKind::Punct("(" | "[" | "{") => depth += 1,
                TokenKind::Punct(")" | "]" | "}") => depth = depth.saturating_sub(1),
                TokenKind::Eof => return Err(self.error_here("unbalanced brackets in type")),
                _ => {}
            }
            self.advance();
            if depth == 0 {
                return Ok(());
            }
        }
    }

    fn skip_angle(&mut self) -> Result<()> {
        let mut depth = 0usize;
        loop {
            match self.peek().kind.clone() {
                TokenKind::Punct("<") => depth += 1,
                TokenKind::Punct(">") => depth = depth.saturating_sub(1),
                TokenKind::Punct("(" | "[" | "{") => {
                    self.skip_balanced()?;
                    continue;
                }
                TokenKind::Eof => return Err(self.error_here("unbalanced '<' in type")),
                _ => {}
            }
            self.advance();
            if depth == 0 {
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
#[path = "../../../tests/unit/kernel/compiler/parser.rs"]
mod tests;
