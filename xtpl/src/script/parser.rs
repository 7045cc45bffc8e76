//! Recursive-descent parser for compiled artifacts
//!
//! Statements are parsed top-down; expressions by precedence climbing, from
//! loosest to tightest: assignment, ternary, `||`, `&&`, equality,
//! comparison, `.`, `+ -`, `* / %`, unary, postfix, primary.

use super::ast::*;
use super::lexer::{Lexer, Spanned, Token};
use super::value::Value;
use crate::error::{ScriptSource, SyntaxError};

type PResult<T> = Result<T, SyntaxError>;

/// Parse a compiled artifact into a program named after the source
pub fn parse_program(source: &ScriptSource) -> PResult<Program> {
    let tokens = Lexer::new(source).tokenize()?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        source,
    };
    let body = parser.parse_items(|t| matches!(t, Token::Eof))?;
    Ok(Program {
        name: source.name.clone(),
        body,
    })
}

struct Parser<'a> {
    tokens: Vec<Spanned>,
    pos: usize,
    source: &'a ScriptSource,
}

impl Parser<'_> {
    fn peek(&self) -> &Token {
        self.peek_at(0)
    }

    fn peek_at(&self, n: usize) -> &Token {
        self.tokens
            .get(self.pos + n)
            .or_else(|| self.tokens.last())
            .map_or(&Token::Eof, |s| &s.token)
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn is_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Token::Ident(k) if k == keyword)
    }

    fn error(&self, expected: &str) -> SyntaxError {
        let (start, end) = self
            .tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map_or((0, 0), |s| (s.span.start, s.span.end));
        SyntaxError {
            found: self.peek().describe(),
            expected: expected.to_string(),
            span: (start, end.saturating_sub(start).max(1)).into(),
            src: self.source.named_source(),
        }
    }

    fn expect(&mut self, token: Token, expected: &str) -> PResult<()> {
        if *self.peek() == token {
            self.advance();
            Ok(())
        } else {
            Err(self.error(expected))
        }
    }

    fn expect_terminator(&mut self) -> PResult<()> {
        match self.peek() {
            Token::Semi => {
                self.advance();
                Ok(())
            }
            Token::Eof => Ok(()),
            _ => Err(self.error("`;` or `?>`")),
        }
    }

    /// Statements up to (not including) a token matching `stop`
    fn parse_items(&mut self, stop: impl Fn(&Token) -> bool) -> PResult<Vec<Stmt>> {
        let mut items = Vec::new();
        while !stop(self.peek()) {
            if *self.peek() == Token::Eof {
                return Err(self.error("`}`"));
            }
            self.parse_stmt_into(&mut items)?;
        }
        Ok(items)
    }

    fn parse_block(&mut self) -> PResult<Vec<Stmt>> {
        self.expect(Token::LBrace, "`{`")?;
        let items = self.parse_items(|t| matches!(t, Token::RBrace))?;
        self.expect(Token::RBrace, "`}`")?;
        Ok(items)
    }

    /// A braced block or a single statement
    fn parse_body(&mut self) -> PResult<Vec<Stmt>> {
        if *self.peek() == Token::LBrace {
            return self.parse_block();
        }
        let mut items = Vec::new();
        self.parse_stmt_into(&mut items)?;
        Ok(items)
    }

    fn parse_stmt_into(&mut self, out: &mut Vec<Stmt>) -> PResult<()> {
        let keyword = match self.peek() {
            Token::Text(text) => {
                out.push(Stmt::Text(text.clone()));
                self.advance();
                return Ok(());
            }
            Token::Semi => {
                self.advance();
                return Ok(());
            }
            Token::LBrace => {
                let block = self.parse_block()?;
                out.extend(block);
                return Ok(());
            }
            Token::Ident(k) => k.clone(),
            _ => String::new(),
        };

        let stmt = match keyword.as_str() {
            "echo" | "print" => {
                self.advance();
                let mut exprs = vec![self.parse_expr()?];
                while *self.peek() == Token::Comma {
                    self.advance();
                    exprs.push(self.parse_expr()?);
                }
                self.expect_terminator()?;
                Stmt::Echo(exprs)
            }
            "if" => self.parse_if()?,
            "foreach" => self.parse_foreach()?,
            "for" => self.parse_for()?,
            "while" => {
                self.advance();
                self.expect(Token::LParen, "`(`")?;
                let cond = self.parse_expr()?;
                self.expect(Token::RParen, "`)`")?;
                let body = self.parse_body()?;
                Stmt::While { cond, body }
            }
            "switch" => self.parse_switch()?,
            "break" | "continue" => {
                self.advance();
                // `break 1` is the only level supported
                if matches!(self.peek(), Token::Int(_)) {
                    self.advance();
                }
                self.expect_terminator()?;
                if keyword == "break" {
                    Stmt::Break
                } else {
                    Stmt::Continue
                }
            }
            "exit" | "die" => {
                self.advance();
                if *self.peek() == Token::LParen {
                    self.advance();
                    self.expect(Token::RParen, "`)`")?;
                }
                self.expect_terminator()?;
                Stmt::Exit
            }
            "else" | "elseif" | "case" | "default" => return Err(self.error("a statement")),
            _ => {
                let expr = self.parse_expr()?;
                self.expect_terminator()?;
                Stmt::Expr(expr)
            }
        };
        out.push(stmt);
        Ok(())
    }

    fn parse_condition(&mut self) -> PResult<Expr> {
        self.expect(Token::LParen, "`(`")?;
        let cond = self.parse_expr()?;
        self.expect(Token::RParen, "`)`")?;
        Ok(cond)
    }

    fn parse_if(&mut self) -> PResult<Stmt> {
        self.advance();
        let cond = self.parse_condition()?;
        let body = self.parse_body()?;
        let mut branches = vec![(cond, body)];
        let mut otherwise = None;
        loop {
            if self.is_keyword("elseif") {
                self.advance();
                let cond = self.parse_condition()?;
                let body = self.parse_body()?;
                branches.push((cond, body));
            } else if self.is_keyword("else") {
                self.advance();
                if self.is_keyword("if") {
                    self.advance();
                    let cond = self.parse_condition()?;
                    let body = self.parse_body()?;
                    branches.push((cond, body));
                } else {
                    otherwise = Some(self.parse_body()?);
                    break;
                }
            } else {
                break;
            }
        }
        Ok(Stmt::If {
            branches,
            otherwise,
        })
    }

    fn parse_foreach(&mut self) -> PResult<Stmt> {
        self.advance();
        self.expect(Token::LParen, "`(`")?;
        let subject = self.parse_expr()?;
        if !self.is_keyword("as") {
            return Err(self.error("`as`"));
        }
        self.advance();
        let first = self.parse_target()?;
        let (key, value) = if *self.peek() == Token::FatArrow {
            self.advance();
            (Some(first), self.parse_target()?)
        } else {
            (None, first)
        };
        self.expect(Token::RParen, "`)`")?;
        let body = self.parse_body()?;
        Ok(Stmt::Foreach {
            subject,
            key,
            value,
            body,
        })
    }

    fn parse_target(&mut self) -> PResult<Expr> {
        let target = self.parse_postfix()?;
        if target.is_place() {
            Ok(target)
        } else {
            Err(self.error("a variable"))
        }
    }

    fn parse_expr_list(&mut self, end: &Token) -> PResult<Vec<Expr>> {
        let mut exprs = Vec::new();
        if self.peek() == end {
            return Ok(exprs);
        }
        exprs.push(self.parse_expr()?);
        while *self.peek() == Token::Comma {
            self.advance();
            exprs.push(self.parse_expr()?);
        }
        Ok(exprs)
    }

    fn parse_for(&mut self) -> PResult<Stmt> {
        self.advance();
        self.expect(Token::LParen, "`(`")?;
        let init = self.parse_expr_list(&Token::Semi)?;
        self.expect(Token::Semi, "`;`")?;
        // with several comma-separated conditions the last one decides
        let cond = self.parse_expr_list(&Token::Semi)?.pop();
        self.expect(Token::Semi, "`;`")?;
        let step = self.parse_expr_list(&Token::RParen)?;
        self.expect(Token::RParen, "`)`")?;
        let body = self.parse_body()?;
        Ok(Stmt::For {
            init,
            cond,
            step,
            body,
        })
    }

    fn parse_switch(&mut self) -> PResult<Stmt> {
        self.advance();
        let subject = self.parse_condition()?;
        self.expect(Token::LBrace, "`{`")?;
        let mut arms = Vec::new();
        loop {
            match self.peek() {
                Token::Semi => {
                    self.advance();
                }
                Token::Text(text) if text.trim().is_empty() => {
                    self.advance();
                }
                Token::RBrace => {
                    self.advance();
                    break;
                }
                Token::Ident(k) if k == "case" || k == "default" => {
                    let is_default = k == "default";
                    self.advance();
                    let label = if is_default {
                        None
                    } else {
                        Some(self.parse_expr()?)
                    };
                    match self.peek() {
                        Token::Colon | Token::Semi => {
                            self.advance();
                        }
                        _ => return Err(self.error("`:`")),
                    }
                    let body = self.parse_items(|t| match t {
                        Token::RBrace => true,
                        Token::Ident(k) => k == "case" || k == "default",
                        _ => false,
                    })?;
                    arms.push(SwitchArm { label, body });
                }
                _ => return Err(self.error("`case` or `default`")),
            }
        }
        Ok(Stmt::Switch { subject, arms })
    }

    pub(crate) fn parse_expr(&mut self) -> PResult<Expr> {
        self.parse_assignment()
    }

    fn parse_assignment(&mut self) -> PResult<Expr> {
        let lhs = self.parse_ternary()?;
        let op = match self.peek() {
            Token::Assign => AssignOp::Set,
            Token::PlusAssign => AssignOp::Add,
            Token::MinusAssign => AssignOp::Sub,
            Token::StarAssign => AssignOp::Mul,
            Token::SlashAssign => AssignOp::Div,
            Token::DotAssign => AssignOp::Concat,
            _ => return Ok(lhs),
        };
        if !lhs.is_place() {
            return Err(self.error("an operator (left side is not assignable)"));
        }
        self.advance();
        let value = self.parse_assignment()?;
        Ok(Expr::Assign {
            op,
            target: Box::new(lhs),
            value: Box::new(value),
        })
    }

    fn parse_ternary(&mut self) -> PResult<Expr> {
        let cond = self.parse_binary(0)?;
        if *self.peek() != Token::Question {
            return Ok(cond);
        }
        self.advance();
        let then = if *self.peek() == Token::Colon {
            None
        } else {
            Some(Box::new(self.parse_assignment()?))
        };
        self.expect(Token::Colon, "`:`")?;
        let otherwise = self.parse_assignment()?;
        Ok(Expr::Ternary {
            cond: Box::new(cond),
            then,
            otherwise: Box::new(otherwise),
        })
    }

    fn parse_binary(&mut self, min_prec: u8) -> PResult<Expr> {
        let mut lhs = self.parse_unary()?;
        while let Some((op, prec)) = binary_op(self.peek()) {
            if prec < min_prec {
                break;
            }
            self.advance();
            let rhs = self.parse_binary(prec + 1)?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> PResult<Expr> {
        let op = match self.peek() {
            Token::Not => UnaryOp::Not,
            Token::Minus => UnaryOp::Neg,
            Token::Plus => UnaryOp::Plus,
            Token::Inc | Token::Dec => {
                let increment = self.advance() == Token::Inc;
                let target = self.parse_unary()?;
                if !target.is_place() {
                    return Err(self.error("a variable after `++`/`--`"));
                }
                return Ok(Expr::IncDec {
                    target: Box::new(target),
                    increment,
                    prefix: true,
                });
            }
            Token::LParen => {
                if let Some(func) = self.cast_function() {
                    self.pos += 3;
                    let operand = self.parse_unary()?;
                    return Ok(Expr::Call {
                        name: func.to_string(),
                        args: vec![operand],
                    });
                }
                return self.parse_postfix();
            }
            _ => return self.parse_postfix(),
        };
        self.advance();
        let operand = self.parse_unary()?;
        Ok(Expr::Unary(op, Box::new(operand)))
    }

    /// `(int)`, `(string)` and friends map onto their conversion builtins
    fn cast_function(&self) -> Option<&'static str> {
        let Token::Ident(name) = self.peek_at(1) else {
            return None;
        };
        if *self.peek_at(2) != Token::RParen {
            return None;
        }
        match name.as_str() {
            "int" | "integer" => Some("intval"),
            "float" | "double" => Some("floatval"),
            "string" => Some("strval"),
            "bool" | "boolean" => Some("boolval"),
            _ => None,
        }
    }

    fn parse_postfix(&mut self) -> PResult<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek() {
                Token::Arrow => {
                    self.advance();
                    let Token::Ident(name) = self.advance() else {
                        self.pos -= 1;
                        return Err(self.error("a member name"));
                    };
                    if *self.peek() == Token::LParen {
                        self.advance();
                        let args = self.parse_expr_list(&Token::RParen)?;
                        self.expect(Token::RParen, "`)`")?;
                        expr = Expr::MethodCall {
                            target: Box::new(expr),
                            name,
                            args,
                        };
                    } else {
                        expr = Expr::Member(Box::new(expr), name);
                    }
                }
                Token::LBracket => {
                    self.advance();
                    if *self.peek() == Token::RBracket {
                        self.advance();
                        expr = Expr::Index(Box::new(expr), None);
                    } else {
                        let index = self.parse_expr()?;
                        self.expect(Token::RBracket, "`]`")?;
                        expr = Expr::Index(Box::new(expr), Some(Box::new(index)));
                    }
                }
                Token::Inc | Token::Dec if expr.is_place() => {
                    let increment = self.advance() == Token::Inc;
                    return Ok(Expr::IncDec {
                        target: Box::new(expr),
                        increment,
                        prefix: false,
                    });
                }
                _ => return Ok(expr),
            }
        }
    }

    fn parse_primary(&mut self) -> PResult<Expr> {
        let expr = match self.peek().clone() {
            Token::Int(i) => Expr::Literal(Value::Int(i)),
            Token::Float(f) => Expr::Literal(Value::Float(f)),
            Token::Str(s) => Expr::Literal(Value::String(s)),
            Token::Var(name) => Expr::Var(name),
            Token::LBracket => {
                self.advance();
                return self.parse_array(Token::RBracket);
            }
            Token::LParen => {
                self.advance();
                let inner = self.parse_expr()?;
                self.expect(Token::RParen, "`)`")?;
                return Ok(inner);
            }
            Token::Ident(name) => {
                let lower = name.to_ascii_lowercase();
                match lower.as_str() {
                    "true" => Expr::Literal(Value::Bool(true)),
                    "false" => Expr::Literal(Value::Bool(false)),
                    "null" => Expr::Literal(Value::Null),
                    "array" if *self.peek_at(1) == Token::LParen => {
                        self.pos += 2;
                        return self.parse_array(Token::RParen);
                    }
                    _ if *self.peek_at(1) == Token::LParen => {
                        self.pos += 2;
                        let args = self.parse_expr_list(&Token::RParen)?;
                        self.expect(Token::RParen, "`)`")?;
                        return Ok(Expr::Call { name, args });
                    }
                    _ => Expr::Const(name),
                }
            }
            _ => return Err(self.error("an expression")),
        };
        self.advance();
        Ok(expr)
    }

    fn parse_array(&mut self, close: Token) -> PResult<Expr> {
        let mut items = Vec::new();
        while *self.peek() != close {
            let first = self.parse_expr()?;
            if *self.peek() == Token::FatArrow {
                self.advance();
                items.push((Some(first), self.parse_expr()?));
            } else {
                items.push((None, first));
            }
            if *self.peek() != Token::Comma {
                break;
            }
            self.advance();
        }
        self.expect(close, "end of array")?;
        Ok(Expr::Array(items))
    }
}

fn binary_op(token: &Token) -> Option<(BinaryOp, u8)> {
    Some(match token {
        Token::OrOr => (BinaryOp::Or, 1),
        Token::AndAnd => (BinaryOp::And, 2),
        Token::Ident(k) if k.eq_ignore_ascii_case("or") => (BinaryOp::Or, 1),
        Token::Ident(k) if k.eq_ignore_ascii_case("and") => (BinaryOp::And, 2),
        Token::Eq => (BinaryOp::Eq, 3),
        Token::Ne => (BinaryOp::Ne, 3),
        Token::Identical => (BinaryOp::Identical, 3),
        Token::NotIdentical => (BinaryOp::NotIdentical, 3),
        Token::Lt => (BinaryOp::Lt, 4),
        Token::Le => (BinaryOp::Le, 4),
        Token::Gt => (BinaryOp::Gt, 4),
        Token::Ge => (BinaryOp::Ge, 4),
        Token::Dot => (BinaryOp::Concat, 5),
        Token::Plus => (BinaryOp::Add, 6),
        Token::Minus => (BinaryOp::Sub, 6),
        Token::Star => (BinaryOp::Mul, 7),
        Token::Slash => (BinaryOp::Div, 7),
        Token::Percent => (BinaryOp::Mod, 7),
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> Vec<Stmt> {
        parse_program(&ScriptSource::new("test", src)).unwrap().body
    }

    fn ctx(name: &str) -> Expr {
        Expr::Member(Box::new(Expr::Var("__ctx".into())), name.into())
    }

    #[test]
    fn echo_with_text() {
        assert_eq!(
            parse("<b><?tpl echo $__ctx->title ?></b>"),
            vec![
                Stmt::Text("<b>".into()),
                Stmt::Echo(vec![ctx("title")]),
                Stmt::Text("</b>".into()),
            ]
        );
    }

    #[test]
    fn precedence() {
        let body = parse("<?tpl echo 1 + 2 * 3 . 'x' ?>");
        let Stmt::Echo(exprs) = &body[0] else {
            panic!("expected echo")
        };
        // (1 + (2 * 3)) . 'x'
        let Expr::Binary(BinaryOp::Concat, lhs, _) = &exprs[0] else {
            panic!("expected concat, got {:?}", exprs[0])
        };
        assert!(matches!(**lhs, Expr::Binary(BinaryOp::Add, _, _)));
    }

    #[test]
    fn guarded_foreach_spans_islands() {
        let body = parse(
            "<?tpl if ($__ctx->l && count($__ctx->l)) foreach ($__ctx->l as $__ctx->k => $__ctx->v) { ?>x<?tpl } ?>",
        );
        assert_eq!(body.len(), 1);
        let Stmt::If { branches, otherwise } = &body[0] else {
            panic!("expected if")
        };
        assert!(otherwise.is_none());
        let Stmt::Foreach { key, body, .. } = &branches[0].1[0] else {
            panic!("expected foreach")
        };
        assert_eq!(key.as_ref(), Some(&ctx("k")));
        assert_eq!(body, &vec![Stmt::Text("x".into())]);
    }

    #[test]
    fn if_elseif_else_chain() {
        let body = parse("<?tpl if($a) { ?>A<?tpl } elseif($b) { ?>B<?tpl } else { ?>C<?tpl } ?>");
        let Stmt::If { branches, otherwise } = &body[0] else {
            panic!("expected if")
        };
        assert_eq!(branches.len(), 2);
        assert_eq!(otherwise.as_deref(), Some(&[Stmt::Text("C".into())][..]));
    }

    #[test]
    fn switch_with_fallthrough_arms() {
        let body = parse(
            "<?tpl switch($a) { ?>\n<?tpl case 1: ?>one<?tpl break;case 2: ?>two<?tpl default: ?>d<?tpl } ?>",
        );
        let Stmt::Switch { arms, .. } = &body[0] else {
            panic!("expected switch")
        };
        assert_eq!(arms.len(), 3);
        assert!(arms[2].label.is_none());
        assert_eq!(arms[0].body.last(), Some(&Stmt::Break));
    }

    #[test]
    fn for_loop_and_postfix() {
        let body = parse("<?tpl for (1;$i<3;$i++) { ?>X<?tpl } ?>");
        let Stmt::For { init, cond, step, .. } = &body[0] else {
            panic!("expected for")
        };
        assert_eq!(init, &vec![Expr::Literal(Value::Int(1))]);
        assert!(cond.is_some());
        assert!(matches!(step[0], Expr::IncDec { prefix: false, .. }));
    }

    #[test]
    fn arrays_and_casts() {
        let body = parse("<?tpl load_file(['target' => 'a.js', 'type' => (string)1]) ?>");
        let Stmt::Expr(Expr::Call { name, args }) = &body[0] else {
            panic!("expected call")
        };
        assert_eq!(name, "load_file");
        let Expr::Array(items) = &args[0] else {
            panic!("expected array")
        };
        assert_eq!(items.len(), 2);
        assert!(matches!(&items[1].1, Expr::Call { name, .. } if name == "strval"));
    }

    #[test]
    fn prologue_single_statement_body() {
        let body = parse("<?tpl if (!defined('__XTPL__')) exit; ?>rest");
        assert!(matches!(&body[0], Stmt::If { branches, .. } if branches[0].1 == vec![Stmt::Exit]));
        assert_eq!(body[1], Stmt::Text("rest".into()));
    }

    #[test]
    fn unbalanced_brace_is_an_error() {
        let err = parse_program(&ScriptSource::new("t", "<?tpl if (1) { ?>x")).unwrap_err();
        assert_eq!(err.expected, "`}`");
    }

    #[test]
    fn assignment_needs_a_place() {
        assert!(parse_program(&ScriptSource::new("t", "<?tpl 1 = 2 ?>")).is_err());
    }
}
