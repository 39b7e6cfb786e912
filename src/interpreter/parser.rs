use std::sync::Arc;

use super::ast::{BinaryOp, Expr, FunctionDecl, LogicalOp, Program, Stmt, UnaryOp};
use super::{EvalError, Result};

/// Deepest statement or expression nesting the parser accepts. Bounds the
/// parser's own recursion and the depth of the tree it hands the evaluator.
pub const MAX_NESTING: usize = 128;

/// Parse script source text into a [`Program`].
pub fn parse_program(source: &str) -> Result<Program> {
    let tokens = Lexer::new(source).tokenize()?;
    let mut parser = Parser {
        src: source,
        tokens,
        index: 0,
        depth: 0,
    };
    let mut body = Vec::new();
    while !parser.at_eof() {
        body.push(parser.parse_stmt()?);
    }
    Ok(Program { body })
}

const RESERVED: &[&str] = &[
    "let",
    "var",
    "const",
    "function",
    "return",
    "if",
    "else",
    "throw",
    "new",
    "typeof",
    "true",
    "false",
    "null",
    "this",
    "in",
    "instanceof",
];

// Longest punctuators first so `===` wins over `==` and `=`.
const PUNCTUATORS: &[&str] = &[
    "===", "!==", "==", "!=", "<=", ">=", "&&", "||", "(", ")", "{", "}", "[", "]", ";", ",", ".",
    ":", "?", "+", "-", "*", "/", "%", "<", ">", "=", "!",
];

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Number(f64),
    String(String),
    Ident(String),
    Punct(&'static str),
    Eof,
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    start: usize,
    end: usize,
}

struct Lexer<'a> {
    src: &'a str,
    bytes: &'a [u8],
    index: usize,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            bytes: src.as_bytes(),
            index: 0,
        }
    }

    fn tokenize(mut self) -> Result<Vec<Token>> {
        let mut tokens = Vec::new();
        loop {
            self.skip_trivia()?;
            let start = self.index;
            let Some(ch) = self.current() else {
                tokens.push(Token {
                    kind: TokenKind::Eof,
                    start,
                    end: start,
                });
                return Ok(tokens);
            };
            let kind = match ch {
                b'"' | b'\'' => self.lex_string(ch)?,
                b'0'..=b'9' => self.lex_number()?,
                b'.' if self.peek().is_some_and(|c| c.is_ascii_digit()) => self.lex_number()?,
                c if is_ident_start(c) => self.lex_ident(),
                _ => self.lex_punct()?,
            };
            tokens.push(Token {
                kind,
                start,
                end: self.index,
            });
        }
    }

    fn current(&self) -> Option<u8> {
        self.bytes.get(self.index).copied()
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.index + 1).copied()
    }

    fn skip_trivia(&mut self) -> Result<()> {
        loop {
            match (self.current(), self.peek()) {
                (Some(c), _) if c.is_ascii_whitespace() => self.index += 1,
                (Some(b'/'), Some(b'/')) => {
                    while let Some(c) = self.current() {
                        self.index += 1;
                        if c == b'\n' {
                            break;
                        }
                    }
                }
                (Some(b'/'), Some(b'*')) => {
                    let src = self.src;
                    let rest = &src[self.index + 2..];
                    let close = rest
                        .find("*/")
                        .ok_or_else(|| self.error("unterminated comment"))?;
                    self.index += close + 4;
                }
                _ => return Ok(()),
            }
        }
    }

    fn lex_string(&mut self, quote: u8) -> Result<TokenKind> {
        self.index += 1;
        let mut buf = String::new();
        let src = self.src;
        let mut chars = src[self.index..].char_indices();
        while let Some((offset, ch)) = chars.next() {
            match ch {
                c if c as u32 == quote as u32 => {
                    self.index += offset + 1;
                    return Ok(TokenKind::String(buf));
                }
                '\n' => break,
                '\\' => {
                    let (_, escaped) = chars
                        .next()
                        .ok_or_else(|| self.error("incomplete escape"))?;
                    match escaped {
                        'n' => buf.push('\n'),
                        'r' => buf.push('\r'),
                        't' => buf.push('\t'),
                        '0' => buf.push('\0'),
                        'u' => {
                            let hex: String = chars.by_ref().take(4).map(|(_, c)| c).collect();
                            let code = u32::from_str_radix(&hex, 16)
                                .ok()
                                .and_then(char::from_u32)
                                .ok_or_else(|| self.error("invalid unicode escape"))?;
                            buf.push(code);
                        }
                        '\n' => {}
                        other => buf.push(other),
                    }
                }
                other => buf.push(other),
            }
        }
        Err(self.error("unterminated string literal"))
    }

    fn lex_number(&mut self) -> Result<TokenKind> {
        let start = self.index;
        if self.current() == Some(b'0') && matches!(self.peek(), Some(b'x' | b'X')) {
            self.index += 2;
            while self.current().is_some_and(|c| c.is_ascii_hexdigit()) {
                self.index += 1;
            }
            let digits = &self.src[start + 2..self.index];
            return u64::from_str_radix(digits, 16)
                .map(|n| TokenKind::Number(n as f64))
                .map_err(|_| self.error("invalid hexadecimal literal"));
        }
        while self.current().is_some_and(|c| c.is_ascii_digit()) {
            self.index += 1;
        }
        if self.current() == Some(b'.') {
            self.index += 1;
            while self.current().is_some_and(|c| c.is_ascii_digit()) {
                self.index += 1;
            }
        }
        if matches!(self.current(), Some(b'e' | b'E')) {
            let mark = self.index;
            self.index += 1;
            if matches!(self.current(), Some(b'+' | b'-')) {
                self.index += 1;
            }
            if !self.current().is_some_and(|c| c.is_ascii_digit()) {
                self.index = mark;
            }
            while self.current().is_some_and(|c| c.is_ascii_digit()) {
                self.index += 1;
            }
        }
        if self.current().is_some_and(is_ident_start) {
            return Err(self.error("identifier starts immediately after numeric literal"));
        }
        self.src[start..self.index]
            .parse()
            .map(TokenKind::Number)
            .map_err(|_| self.error("invalid numeric literal"))
    }

    fn lex_ident(&mut self) -> TokenKind {
        let start = self.index;
        while self.current().is_some_and(is_ident_part) {
            self.index += 1;
        }
        TokenKind::Ident(self.src[start..self.index].to_string())
    }

    fn lex_punct(&mut self) -> Result<TokenKind> {
        let rest = &self.src[self.index..];
        for punct in PUNCTUATORS {
            if rest.starts_with(punct) {
                self.index += punct.len();
                return Ok(TokenKind::Punct(punct));
            }
        }
        let ch = rest.chars().next().unwrap_or('?');
        Err(self.error(&format!("unexpected character '{ch}'")))
    }

    fn error(&self, message: &str) -> EvalError {
        EvalError::Syntax(format!("{} at byte {}", message, self.index))
    }
}

fn is_ident_start(ch: u8) -> bool {
    ch.is_ascii_alphabetic() || ch == b'_' || ch == b'$' || ch >= 0x80
}

fn is_ident_part(ch: u8) -> bool {
    is_ident_start(ch) || ch.is_ascii_digit()
}

struct Parser<'a> {
    src: &'a str,
    tokens: Vec<Token>,
    index: usize,
    depth: usize,
}

impl Parser<'_> {
    fn current(&self) -> &Token {
        &self.tokens[self.index.min(self.tokens.len() - 1)]
    }

    fn at_eof(&self) -> bool {
        self.current().kind == TokenKind::Eof
    }

    fn advance(&mut self) -> Token {
        let token = self.current().clone();
        if !self.at_eof() {
            self.index += 1;
        }
        token
    }

    fn is_punct(&self, punct: &str) -> bool {
        matches!(&self.current().kind, TokenKind::Punct(p) if *p == punct)
    }

    fn is_keyword(&self, keyword: &str) -> bool {
        matches!(&self.current().kind, TokenKind::Ident(name) if name == keyword)
    }

    fn eat_punct(&mut self, punct: &str) -> bool {
        if self.is_punct(punct) {
            self.index += 1;
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.is_keyword(keyword) {
            self.index += 1;
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, punct: &str) -> Result<Token> {
        if self.is_punct(punct) {
            Ok(self.advance())
        } else {
            Err(self.error(&format!("expected '{punct}'")))
        }
    }

    fn expect_ident(&mut self) -> Result<String> {
        match &self.current().kind {
            TokenKind::Ident(name) if !RESERVED.contains(&name.as_str()) => {
                let name = name.clone();
                self.index += 1;
                Ok(name)
            }
            _ => Err(self.error("expected identifier")),
        }
    }

    fn end_statement(&mut self) {
        self.eat_punct(";");
    }

    fn enter(&mut self) -> Result<()> {
        if self.depth >= MAX_NESTING {
            return Err(self.error("nesting too deep"));
        }
        self.depth += 1;
        Ok(())
    }

    /// Run `parse` one nesting level deeper. A failed parse aborts the whole
    /// program, so the level is only released on success.
    fn nested<T>(&mut self, parse: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        self.enter()?;
        let parsed = parse(self)?;
        self.depth -= 1;
        Ok(parsed)
    }

    fn parse_stmt(&mut self) -> Result<Stmt> {
        self.nested(Self::parse_stmt_inner)
    }

    fn parse_stmt_inner(&mut self) -> Result<Stmt> {
        if self.eat_punct(";") {
            return Ok(Stmt::Empty);
        }
        if self.is_punct("{") {
            self.advance();
            return Ok(Stmt::Block(self.parse_block_body()?));
        }
        if self.is_keyword("let") || self.is_keyword("var") || self.is_keyword("const") {
            self.advance();
            return self.parse_declarations();
        }
        if self.is_keyword("function") {
            let decl = self.parse_function(true)?;
            return Ok(Stmt::Function(decl));
        }
        if self.eat_keyword("return") {
            let value = if self.is_punct(";") || self.is_punct("}") || self.at_eof() {
                None
            } else {
                Some(self.parse_expr()?)
            };
            self.end_statement();
            return Ok(Stmt::Return(value));
        }
        if self.eat_keyword("if") {
            self.expect_punct("(")?;
            let cond = self.parse_expr()?;
            self.expect_punct(")")?;
            let then = Box::new(self.parse_stmt()?);
            let otherwise = if self.eat_keyword("else") {
                Some(Box::new(self.parse_stmt()?))
            } else {
                None
            };
            return Ok(Stmt::If {
                cond,
                then,
                otherwise,
            });
        }
        if self.eat_keyword("throw") {
            let value = self.parse_expr()?;
            self.end_statement();
            return Ok(Stmt::Throw(value));
        }
        let expr = self.parse_expr()?;
        self.end_statement();
        Ok(Stmt::Expr(expr))
    }

    fn parse_block_body(&mut self) -> Result<Vec<Stmt>> {
        let mut body = Vec::new();
        while !self.eat_punct("}") {
            if self.at_eof() {
                return Err(self.error("unterminated block"));
            }
            body.push(self.parse_stmt()?);
        }
        Ok(body)
    }

    fn parse_declarations(&mut self) -> Result<Stmt> {
        let mut decls = Vec::new();
        loop {
            let name = self.expect_ident()?;
            let init = if self.eat_punct("=") {
                Some(self.parse_assignment()?)
            } else {
                None
            };
            decls.push(Stmt::Declare { name, init });
            if !self.eat_punct(",") {
                break;
            }
        }
        self.end_statement();
        if decls.len() == 1 {
            Ok(decls.remove(0))
        } else {
            Ok(Stmt::Block(decls))
        }
    }

    fn parse_function(&mut self, require_name: bool) -> Result<Arc<FunctionDecl>> {
        let start = self.advance().start;
        let name = if require_name || !self.is_punct("(") {
            Some(self.expect_ident()?)
        } else {
            None
        };
        self.expect_punct("(")?;
        let mut params = Vec::new();
        if !self.eat_punct(")") {
            loop {
                params.push(self.expect_ident()?);
                if self.eat_punct(")") {
                    break;
                }
                self.expect_punct(",")?;
            }
        }
        self.expect_punct("{")?;
        let body = self.parse_block_body()?;
        let end = self.tokens[self.index - 1].end;
        Ok(Arc::new(FunctionDecl {
            name,
            params,
            body,
            source: self.src[start..end].to_string(),
        }))
    }

    fn parse_expr(&mut self) -> Result<Expr> {
        self.parse_assignment()
    }

    fn parse_assignment(&mut self) -> Result<Expr> {
        self.nested(Self::parse_assignment_inner)
    }

    fn parse_assignment_inner(&mut self) -> Result<Expr> {
        let target = self.parse_conditional()?;
        if self.eat_punct("=") {
            if !matches!(target, Expr::Ident(_) | Expr::Member { .. }) {
                return Err(self.error("invalid assignment target"));
            }
            let value = self.parse_assignment()?;
            return Ok(Expr::Assign {
                target: Box::new(target),
                value: Box::new(value),
            });
        }
        Ok(target)
    }

    fn parse_conditional(&mut self) -> Result<Expr> {
        let cond = self.parse_logical(LogicalOp::Or)?;
        if !self.eat_punct("?") {
            return Ok(cond);
        }
        let then = self.parse_assignment()?;
        self.expect_punct(":")?;
        let otherwise = self.parse_assignment()?;
        Ok(Expr::Conditional {
            cond: Box::new(cond),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        })
    }

    fn parse_logical(&mut self, op: LogicalOp) -> Result<Expr> {
        let (punct, next) = match op {
            LogicalOp::Or => ("||", Some(LogicalOp::And)),
            LogicalOp::And => ("&&", None),
        };
        let operand = |parser: &mut Self| match next {
            Some(inner) => parser.parse_logical(inner),
            None => parser.parse_binary(0),
        };
        let base = self.depth;
        let mut left = operand(self)?;
        while self.eat_punct(punct) {
            self.enter()?;
            let right = operand(self)?;
            left = Expr::Logical {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        self.depth = base;
        Ok(left)
    }

    fn binary_op(&self) -> Option<(BinaryOp, u8)> {
        let op = match &self.current().kind {
            TokenKind::Punct(p) => match *p {
                "===" => (BinaryOp::StrictEq, 0),
                "!==" => (BinaryOp::StrictNe, 0),
                "==" => (BinaryOp::Eq, 0),
                "!=" => (BinaryOp::Ne, 0),
                "<" => (BinaryOp::Lt, 1),
                "<=" => (BinaryOp::Le, 1),
                ">" => (BinaryOp::Gt, 1),
                ">=" => (BinaryOp::Ge, 1),
                "+" => (BinaryOp::Add, 2),
                "-" => (BinaryOp::Sub, 2),
                "*" => (BinaryOp::Mul, 3),
                "/" => (BinaryOp::Div, 3),
                "%" => (BinaryOp::Rem, 3),
                _ => return None,
            },
            TokenKind::Ident(word) => match word.as_str() {
                "in" => (BinaryOp::In, 1),
                "instanceof" => (BinaryOp::InstanceOf, 1),
                _ => return None,
            },
            _ => return None,
        };
        Some(op)
    }

    fn parse_binary(&mut self, min_level: u8) -> Result<Expr> {
        let base = self.depth;
        let mut left = self.parse_unary()?;
        while let Some((op, level)) = self.binary_op() {
            if level < min_level {
                break;
            }
            self.advance();
            self.enter()?;
            let right = self.parse_binary(level + 1)?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        self.depth = base;
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        let op = if self.eat_punct("-") {
            UnaryOp::Neg
        } else if self.eat_punct("+") {
            UnaryOp::Plus
        } else if self.eat_punct("!") {
            UnaryOp::Not
        } else if self.eat_keyword("typeof") {
            UnaryOp::TypeOf
        } else {
            return self.parse_postfix();
        };
        let operand = self.nested(Self::parse_unary)?;
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    fn parse_postfix(&mut self) -> Result<Expr> {
        let base = self.depth;
        let mut expr = if self.is_keyword("new") {
            self.parse_new()?
        } else {
            self.parse_primary()?
        };
        loop {
            if self.is_punct(".") || self.is_punct("[") {
                self.enter()?;
                expr = self.parse_member(expr)?;
            } else if self.eat_punct("(") {
                self.enter()?;
                let args = self.parse_arguments()?;
                expr = Expr::Call {
                    callee: Box::new(expr),
                    args,
                };
            } else {
                self.depth = base;
                return Ok(expr);
            }
        }
    }

    fn parse_new(&mut self) -> Result<Expr> {
        self.nested(Self::parse_new_inner)
    }

    fn parse_new_inner(&mut self) -> Result<Expr> {
        self.advance();
        let base = self.depth;
        let mut callee = if self.is_keyword("new") {
            self.parse_new()?
        } else {
            self.parse_primary()?
        };
        while self.is_punct(".") || self.is_punct("[") {
            self.enter()?;
            callee = self.parse_member(callee)?;
        }
        self.depth = base;
        let args = if self.eat_punct("(") {
            self.parse_arguments()?
        } else {
            Vec::new()
        };
        Ok(Expr::New {
            callee: Box::new(callee),
            args,
        })
    }

    fn parse_member(&mut self, object: Expr) -> Result<Expr> {
        let property = if self.eat_punct(".") {
            match self.advance().kind {
                TokenKind::Ident(name) => Expr::String(name),
                _ => return Err(self.error("expected property name")),
            }
        } else {
            self.expect_punct("[")?;
            let key = self.parse_expr()?;
            self.expect_punct("]")?;
            key
        };
        Ok(Expr::Member {
            object: Box::new(object),
            property: Box::new(property),
        })
    }

    fn parse_arguments(&mut self) -> Result<Vec<Expr>> {
        let mut args = Vec::new();
        if self.eat_punct(")") {
            return Ok(args);
        }
        loop {
            args.push(self.parse_assignment()?);
            if self.eat_punct(")") {
                return Ok(args);
            }
            self.expect_punct(",")?;
        }
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        if self.is_keyword("function") {
            return Ok(Expr::Function(self.parse_function(false)?));
        }
        if self.is_punct("[") {
            self.advance();
            let mut items = Vec::new();
            while !self.eat_punct("]") {
                items.push(self.parse_assignment()?);
                if !self.is_punct("]") {
                    self.expect_punct(",")?;
                }
            }
            return Ok(Expr::Array(items));
        }
        if self.is_punct("{") {
            self.advance();
            return self.parse_object_literal();
        }
        if self.eat_punct("(") {
            let inner = self.parse_expr()?;
            self.expect_punct(")")?;
            return Ok(inner);
        }

        let token = self.advance();
        match token.kind {
            TokenKind::Number(num) => Ok(Expr::Number(num)),
            TokenKind::String(text) => Ok(Expr::String(text)),
            TokenKind::Ident(word) => match word.as_str() {
                "true" => Ok(Expr::Boolean(true)),
                "false" => Ok(Expr::Boolean(false)),
                "null" => Ok(Expr::Null),
                "undefined" => Ok(Expr::Undefined),
                "this" => Ok(Expr::This),
                reserved if RESERVED.contains(&reserved) => {
                    Err(self.error_at(token.start, &format!("unexpected keyword '{reserved}'")))
                }
                _ => Ok(Expr::Ident(word)),
            },
            TokenKind::Punct(p) => Err(self.error_at(token.start, &format!("unexpected token '{p}'"))),
            TokenKind::Eof => Err(self.error_at(token.start, "unexpected end of input")),
        }
    }

    fn parse_object_literal(&mut self) -> Result<Expr> {
        let mut entries = Vec::new();
        while !self.eat_punct("}") {
            let key = match self.advance().kind {
                TokenKind::Ident(name) | TokenKind::String(name) => name,
                TokenKind::Number(num) => super::value::number_to_string(num),
                _ => return Err(self.error("expected property key")),
            };
            self.expect_punct(":")?;
            let value = self.parse_assignment()?;
            entries.push((key, value));
            if !self.is_punct("}") {
                self.expect_punct(",")?;
            }
        }
        Ok(Expr::Object(entries))
    }

    fn error(&self, message: &str) -> EvalError {
        self.error_at(self.current().start, message)
    }

    fn error_at(&self, offset: usize, message: &str) -> EvalError {
        EvalError::Syntax(format!("{} at byte {}", message, offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expr(src: &str) -> Expr {
        let program = parse_program(src).expect("parse");
        match program.body.into_iter().next() {
            Some(Stmt::Expr(expr)) => expr,
            other => panic!("expected expression statement, got {other:?}"),
        }
    }

    #[test]
    fn parses_arithmetic_with_precedence() {
        let parsed = expr("1 + 2 * 3");
        let Expr::Binary { op, right, .. } = parsed else {
            panic!("expected binary");
        };
        assert_eq!(op, BinaryOp::Add);
        assert!(matches!(*right, Expr::Binary { op: BinaryOp::Mul, .. }));
    }

    #[test]
    fn parses_string_literals_with_both_quotes() {
        assert_eq!(expr("\"hello\""), Expr::String("hello".into()));
        assert_eq!(expr("'it\\'s'"), Expr::String("it's".into()));
    }

    #[test]
    fn function_declarations_keep_source_text() {
        let program = parse_program("function add(a, b) { return a + b; } add(1, 2)").unwrap();
        let Stmt::Function(decl) = &program.body[0] else {
            panic!("expected function declaration");
        };
        assert_eq!(decl.source, "function add(a, b) { return a + b; }");
        assert_eq!(decl.params, vec!["a", "b"]);
        assert_eq!(program.body.len(), 2);
    }

    #[test]
    fn member_calls_and_new() {
        let parsed = expr("new Foo(1).bar['baz'](2)");
        assert!(matches!(parsed, Expr::Call { .. }));
    }

    #[test]
    fn rejects_unterminated_input() {
        assert!(matches!(parse_program("(1 + "), Err(EvalError::Syntax(_))));
        assert!(matches!(parse_program("'abc"), Err(EvalError::Syntax(_))));
        assert!(matches!(parse_program("{ let x = 1;"), Err(EvalError::Syntax(_))));
    }

    fn too_deep(result: Result<Program>) -> bool {
        matches!(result, Err(EvalError::Syntax(message)) if message.starts_with("nesting too deep"))
    }

    #[test]
    fn deep_nesting_is_a_syntax_error() {
        let parens = format!("{}1{}", "(".repeat(2000), ")".repeat(2000));
        assert!(too_deep(parse_program(&parens)));

        let cases = [
            "-".repeat(5000) + "1",
            "[".repeat(5000) + &"]".repeat(5000),
            "{".repeat(5000) + &"}".repeat(5000),
            "if (1) ".repeat(5000) + "1",
            "a = ".repeat(5000) + "1",
            "1 ? 2 : ".repeat(5000) + "3",
            vec!["1"; 5000].join(" + "),
            vec!["a"; 5000].join(" || "),
            "f".to_string() + &"()".repeat(5000),
            "o".to_string() + &".p".repeat(5000),
            "new ".repeat(5000) + "F",
        ];
        for source in &cases {
            assert!(too_deep(parse_program(source)), "accepted {:.20}...", source);
        }
    }

    #[test]
    fn nesting_below_the_limit_parses() {
        let parens = format!("{}1{}", "(".repeat(40), ")".repeat(40));
        assert_eq!(expr(&parens), Expr::Number(1.0));
        assert!(parse_program(&vec!["1"; 100].join(" + ")).is_ok());
        assert!(parse_program("a.b.c.d(1)(2).e[f](g, h)").is_ok());
    }
}
