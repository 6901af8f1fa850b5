//! Recursive-descent parser for the capsule script language.
//!
//! Grammar sketch:
//!
//! ```text
//! script   := function*
//! function := "fn" IDENT "(" params? ")" block
//! block    := "{" stmt* "}"
//! stmt     := "let" IDENT "=" expr ";"
//!           | IDENT "=" expr ";"
//!           | "if" expr block ("else" (block | if-stmt))?
//!           | "while" expr block
//!           | "return" expr? ";"
//!           | "throw" expr ";"
//!           | expr ";"
//! expr     := or-expr, with the usual precedence down to
//!             unary and postfix indexing
//! ```

use super::ast::{BinaryOp, Expr, Function, Script, Stmt, UnaryOp};
use super::lexer::{Lexeme, SyntaxError, Token, lex};

/// Cap on expression nesting, so pathological input fails with a parse
/// error instead of exhausting the stack.
const MAX_NESTING: usize = 256;

/// Parse `src` into a script.
pub fn parse(src: &str) -> Result<Script, SyntaxError> {
    let lexemes = lex(src)?;
    let mut parser = Parser {
        lexemes,
        pos: 0,
        depth: 0,
    };
    parser.script()
}

struct Parser {
    lexemes: Vec<Lexeme>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn script(&mut self) -> Result<Script, SyntaxError> {
        let mut functions = Vec::new();
        while !self.at_end() {
            functions.push(self.function()?);
        }
        Ok(Script { functions })
    }

    fn function(&mut self) -> Result<Function, SyntaxError> {
        self.expect(&Token::Fn)?;
        let name = self.ident("function name")?;
        self.expect(&Token::LParen)?;
        let mut params = Vec::new();
        if !self.check(&Token::RParen) {
            loop {
                params.push(self.ident("parameter name")?);
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
        }
        self.expect(&Token::RParen)?;
        let body = self.block()?;
        Ok(Function { name, params, body })
    }

    fn block(&mut self) -> Result<Vec<Stmt>, SyntaxError> {
        self.expect(&Token::LBrace)?;
        let mut stmts = Vec::new();
        while !self.check(&Token::RBrace) {
            if self.at_end() {
                return Err(self.error_here("unclosed block, expected `}`"));
            }
            stmts.push(self.stmt()?);
        }
        self.expect(&Token::RBrace)?;
        Ok(stmts)
    }

    fn stmt(&mut self) -> Result<Stmt, SyntaxError> {
        if self.eat(&Token::Let) {
            let name = self.ident("variable name")?;
            self.expect(&Token::Assign)?;
            let value = self.expr()?;
            self.expect(&Token::Semi)?;
            return Ok(Stmt::Let { name, value });
        }

        if self.check(&Token::If) {
            return self.if_stmt();
        }

        if self.eat(&Token::While) {
            let cond = self.expr()?;
            let body = self.block()?;
            return Ok(Stmt::While { cond, body });
        }

        if self.eat(&Token::Return) {
            let value = if self.check(&Token::Semi) {
                None
            } else {
                Some(self.expr()?)
            };
            self.expect(&Token::Semi)?;
            return Ok(Stmt::Return { value });
        }

        if self.eat(&Token::Throw) {
            let value = self.expr()?;
            self.expect(&Token::Semi)?;
            return Ok(Stmt::Throw { value });
        }

        // `IDENT = expr ;` is an assignment, anything else an expression
        // statement. Two tokens of lookahead settle it.
        if let Some(Token::Ident(name)) = self.peek_token()
            && self.peek_token_at(1) == Some(&Token::Assign)
        {
            let target = name.clone();
            self.pos += 2;
            let value = self.expr()?;
            self.expect(&Token::Semi)?;
            return Ok(Stmt::Assign { target, value });
        }

        let expr = self.expr()?;
        self.expect(&Token::Semi)?;
        Ok(Stmt::Expr(expr))
    }

    fn if_stmt(&mut self) -> Result<Stmt, SyntaxError> {
        self.expect(&Token::If)?;
        let cond = self.expr()?;
        let then_body = self.block()?;
        let else_body = if self.eat(&Token::Else) {
            if self.check(&Token::If) {
                vec![self.if_stmt()?]
            } else {
                self.block()?
            }
        } else {
            Vec::new()
        };
        Ok(Stmt::If {
            cond,
            then_body,
            else_body,
        })
    }

    fn expr(&mut self) -> Result<Expr, SyntaxError> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(self.error_here("expression nesting too deep"));
        }
        let expr = self.or_expr();
        self.depth -= 1;
        expr
    }

    fn or_expr(&mut self) -> Result<Expr, SyntaxError> {
        let mut lhs = self.and_expr()?;
        while self.eat(&Token::OrOr) {
            let rhs = self.and_expr()?;
            lhs = binary(BinaryOp::Or, lhs, rhs);
        }
        Ok(lhs)
    }

    fn and_expr(&mut self) -> Result<Expr, SyntaxError> {
        let mut lhs = self.equality()?;
        while self.eat(&Token::AndAnd) {
            let rhs = self.equality()?;
            lhs = binary(BinaryOp::And, lhs, rhs);
        }
        Ok(lhs)
    }

    fn equality(&mut self) -> Result<Expr, SyntaxError> {
        let mut lhs = self.comparison()?;
        loop {
            let op = if self.eat(&Token::Eq) {
                BinaryOp::Eq
            } else if self.eat(&Token::NotEq) {
                BinaryOp::NotEq
            } else {
                return Ok(lhs);
            };
            let rhs = self.comparison()?;
            lhs = binary(op, lhs, rhs);
        }
    }

    fn comparison(&mut self) -> Result<Expr, SyntaxError> {
        let mut lhs = self.term()?;
        loop {
            let op = if self.eat(&Token::Lt) {
                BinaryOp::Lt
            } else if self.eat(&Token::LtEq) {
                BinaryOp::LtEq
            } else if self.eat(&Token::Gt) {
                BinaryOp::Gt
            } else if self.eat(&Token::GtEq) {
                BinaryOp::GtEq
            } else {
                return Ok(lhs);
            };
            let rhs = self.term()?;
            lhs = binary(op, lhs, rhs);
        }
    }

    fn term(&mut self) -> Result<Expr, SyntaxError> {
        let mut lhs = self.factor()?;
        loop {
            let op = if self.eat(&Token::Plus) {
                BinaryOp::Add
            } else if self.eat(&Token::Minus) {
                BinaryOp::Sub
            } else {
                return Ok(lhs);
            };
            let rhs = self.factor()?;
            lhs = binary(op, lhs, rhs);
        }
    }

    fn factor(&mut self) -> Result<Expr, SyntaxError> {
        let mut lhs = self.unary()?;
        loop {
            let op = if self.eat(&Token::Star) {
                BinaryOp::Mul
            } else if self.eat(&Token::Slash) {
                BinaryOp::Div
            } else if self.eat(&Token::Percent) {
                BinaryOp::Rem
            } else {
                return Ok(lhs);
            };
            let rhs = self.unary()?;
            lhs = binary(op, lhs, rhs);
        }
    }

    fn unary(&mut self) -> Result<Expr, SyntaxError> {
        let op = if self.eat(&Token::Minus) {
            Some(UnaryOp::Neg)
        } else if self.eat(&Token::Bang) {
            Some(UnaryOp::Not)
        } else {
            None
        };
        if let Some(op) = op {
            self.depth += 1;
            if self.depth > MAX_NESTING {
                return Err(self.error_here("expression nesting too deep"));
            }
            let expr = self.unary()?;
            self.depth -= 1;
            return Ok(Expr::Unary {
                op,
                expr: Box::new(expr),
            });
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Expr, SyntaxError> {
        let mut expr = self.primary()?;
        while self.eat(&Token::LBracket) {
            let index = self.expr()?;
            self.expect(&Token::RBracket)?;
            expr = Expr::Index {
                target: Box::new(expr),
                index: Box::new(index),
            };
        }
        Ok(expr)
    }

    fn primary(&mut self) -> Result<Expr, SyntaxError> {
        let Some(lexeme) = self.lexemes.get(self.pos).cloned() else {
            return Err(self.error_here("unexpected end of input"));
        };
        self.pos += 1;

        match lexeme.token {
            Token::Number(n) => Ok(Expr::Number(n)),
            Token::Str(s) => Ok(Expr::Str(s)),
            Token::True => Ok(Expr::Bool(true)),
            Token::False => Ok(Expr::Bool(false)),
            Token::Null => Ok(Expr::Null),
            Token::LParen => {
                let expr = self.expr()?;
                self.expect(&Token::RParen)?;
                Ok(expr)
            }
            Token::LBracket => {
                let mut items = Vec::new();
                if !self.check(&Token::RBracket) {
                    loop {
                        items.push(self.expr()?);
                        if !self.eat(&Token::Comma) {
                            break;
                        }
                    }
                }
                self.expect(&Token::RBracket)?;
                Ok(Expr::Array(items))
            }
            Token::Ident(name) => {
                if self.eat(&Token::LParen) {
                    let mut args = Vec::new();
                    if !self.check(&Token::RParen) {
                        loop {
                            args.push(self.expr()?);
                            if !self.eat(&Token::Comma) {
                                break;
                            }
                        }
                    }
                    self.expect(&Token::RParen)?;
                    Ok(Expr::Call { callee: name, args })
                } else {
                    Ok(Expr::Var(name))
                }
            }
            other => Err(SyntaxError::new(
                lexeme.line,
                format!("unexpected {}", other.describe()),
            )),
        }
    }

    // Token-stream helpers

    fn at_end(&self) -> bool {
        self.pos >= self.lexemes.len()
    }

    fn peek_token(&self) -> Option<&Token> {
        self.lexemes.get(self.pos).map(|l| &l.token)
    }

    fn peek_token_at(&self, offset: usize) -> Option<&Token> {
        self.lexemes.get(self.pos + offset).map(|l| &l.token)
    }

    fn check(&self, token: &Token) -> bool {
        self.peek_token() == Some(token)
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.check(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token) -> Result<(), SyntaxError> {
        if self.eat(token) {
            Ok(())
        } else {
            let found = self
                .peek_token()
                .map(|t| t.describe())
                .unwrap_or_else(|| "end of input".to_string());
            Err(self.error_here(format!(
                "expected {}, found {found}",
                token.describe()
            )))
        }
    }

    fn ident(&mut self, what: &str) -> Result<String, SyntaxError> {
        match self.peek_token() {
            Some(Token::Ident(name)) => {
                let name = name.clone();
                self.pos += 1;
                Ok(name)
            }
            _ => Err(self.error_here(format!("expected {what}"))),
        }
    }

    fn error_here(&self, message: impl Into<String>) -> SyntaxError {
        let line = self
            .lexemes
            .get(self.pos)
            .or_else(|| self.lexemes.last())
            .map(|l| l.line)
            .unwrap_or(1);
        SyntaxError::new(line, message)
    }
}

fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
    Expr::Binary {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    }
}
