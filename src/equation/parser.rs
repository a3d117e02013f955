// Formula tokenizer and recursive-descent parser
//
// Grammar:
//   expr    := term (('+' | '-') term)*
//   term    := unary (('*' | '/') unary)*
//   unary   := ('-' | '+') unary | primary
//   primary := NUMBER | IDENT | IDENT '(' expr (',' expr)* ')' | '(' expr ')'
//
// Identifiers are maximal tokens, so an alias `a` never matches inside `abc`.

use thiserror::Error;

use super::expr::{BinaryOp, Expr, Function};

/// Nesting limit for parentheses, unary operators and operator chains
pub const MAX_DEPTH: usize = 128;

/// Why a formula string could not be parsed (or bound)
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FormulaError {
    #[error("unexpected character '{ch}' at offset {pos}")]
    UnexpectedChar { ch: char, pos: usize },

    #[error("invalid number {text:?} at offset {pos}")]
    InvalidNumber { text: String, pos: usize },

    #[error("unexpected {found} at offset {pos}")]
    UnexpectedToken { found: String, pos: usize },

    #[error("formula ends unexpectedly")]
    UnexpectedEnd,

    #[error("unknown function '{name}' (only MAX and MIN are supported)")]
    UnknownFunction { name: String },

    #[error("{name} needs at least 2 arguments, got {found}")]
    Arity { name: String, found: usize },

    #[error("formula nests deeper than {MAX_DEPTH} levels")]
    TooDeep,

    #[error("alias '{alias}' is not bound to an event or constant")]
    UnboundAlias { alias: String },
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
    Comma,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Self::Number(n) => format!("number {n}"),
            Self::Ident(s) => format!("identifier '{s}'"),
            Self::Plus => "'+'".into(),
            Self::Minus => "'-'".into(),
            Self::Star => "'*'".into(),
            Self::Slash => "'/'".into(),
            Self::LParen => "'('".into(),
            Self::RParen => "')'".into(),
            Self::Comma => "','".into(),
        }
    }
}

fn tokenize(input: &str) -> Result<Vec<(Token, usize)>, FormulaError> {
    let bytes = input.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        let c = bytes[pos];
        let token = match c {
            b' ' | b'\t' | b'\r' | b'\n' => {
                pos += 1;
                continue;
            }
            b'+' => Token::Plus,
            b'-' => Token::Minus,
            b'*' => Token::Star,
            b'/' => Token::Slash,
            b'(' => Token::LParen,
            b')' => Token::RParen,
            b',' => Token::Comma,
            b'0'..=b'9' | b'.' => {
                let start = pos;
                pos = scan_number(bytes, pos);
                let text = &input[start..pos];
                let value = text.parse::<f64>().map_err(|_| FormulaError::InvalidNumber {
                    text: text.to_string(),
                    pos: start,
                })?;
                tokens.push((Token::Number(value), start));
                continue;
            }
            c if c.is_ascii_alphabetic() || c == b'_' => {
                let start = pos;
                while pos < bytes.len() && (bytes[pos].is_ascii_alphanumeric() || bytes[pos] == b'_')
                {
                    pos += 1;
                }
                tokens.push((Token::Ident(input[start..pos].to_string()), start));
                continue;
            }
            _ => {
                let ch = input[pos..].chars().next().unwrap_or('?');
                return Err(FormulaError::UnexpectedChar { ch, pos });
            }
        };
        tokens.push((token, pos));
        pos += 1;
    }

    Ok(tokens)
}

// Digits, an optional fraction and an optional exponent
fn scan_number(bytes: &[u8], mut pos: usize) -> usize {
    while pos < bytes.len() && (bytes[pos].is_ascii_digit() || bytes[pos] == b'.') {
        pos += 1;
    }
    if pos < bytes.len() && (bytes[pos] == b'e' || bytes[pos] == b'E') {
        let mut exp = pos + 1;
        if exp < bytes.len() && (bytes[exp] == b'+' || bytes[exp] == b'-') {
            exp += 1;
        }
        if exp < bytes.len() && bytes[exp].is_ascii_digit() {
            pos = exp;
            while pos < bytes.len() && bytes[pos].is_ascii_digit() {
                pos += 1;
            }
        }
    }
    pos
}

struct Parser {
    tokens: Vec<(Token, usize)>,
    next: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.next).map(|(t, _)| t)
    }

    fn bump(&mut self) -> Option<(Token, usize)> {
        let token = self.tokens.get(self.next).cloned();
        if token.is_some() {
            self.next += 1;
        }
        token
    }

    fn expect(&mut self, want: &Token) -> Result<(), FormulaError> {
        match self.bump() {
            Some((ref t, _)) if t == want => Ok(()),
            Some((t, pos)) => Err(FormulaError::UnexpectedToken {
                found: t.describe(),
                pos,
            }),
            None => Err(FormulaError::UnexpectedEnd),
        }
    }

    fn descend(&mut self) -> Result<(), FormulaError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(FormulaError::TooDeep);
        }
        Ok(())
    }

    fn expr(&mut self) -> Result<Expr<String>, FormulaError> {
        let mut lhs = self.term()?;
        // Each chained operator adds one level to the left-deep tree
        let mut chain = 0;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => break,
            };
            self.next += 1;
            self.descend()?;
            chain += 1;
            let rhs = self.term()?;
            lhs = Expr::binary(op, lhs, rhs);
        }
        self.depth -= chain;
        Ok(lhs)
    }

    fn term(&mut self) -> Result<Expr<String>, FormulaError> {
        let mut lhs = self.unary()?;
        // Each chained operator adds one level to the left-deep tree
        let mut chain = 0;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                _ => break,
            };
            self.next += 1;
            self.descend()?;
            chain += 1;
            let rhs = self.unary()?;
            lhs = Expr::binary(op, lhs, rhs);
        }
        self.depth -= chain;
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr<String>, FormulaError> {
        match self.peek() {
            Some(Token::Minus) => {
                self.next += 1;
                self.descend()?;
                let inner = self.unary()?;
                self.depth -= 1;
                Ok(Expr::Neg(Box::new(inner)))
            }
            Some(Token::Plus) => {
                self.next += 1;
                self.descend()?;
                let inner = self.unary()?;
                self.depth -= 1;
                Ok(inner)
            }
            _ => self.primary(),
        }
    }

    fn primary(&mut self) -> Result<Expr<String>, FormulaError> {
        match self.bump() {
            Some((Token::Number(n), _)) => Ok(Expr::Const(n)),
            Some((Token::Ident(name), _)) => {
                if self.peek() == Some(&Token::LParen) {
                    self.next += 1;
                    self.call(name)
                } else {
                    Ok(Expr::Ref(name))
                }
            }
            Some((Token::LParen, _)) => {
                self.descend()?;
                let inner = self.expr()?;
                self.expect(&Token::RParen)?;
                self.depth -= 1;
                Ok(inner)
            }
            Some((t, pos)) => Err(FormulaError::UnexpectedToken {
                found: t.describe(),
                pos,
            }),
            None => Err(FormulaError::UnexpectedEnd),
        }
    }

    fn call(&mut self, name: String) -> Result<Expr<String>, FormulaError> {
        let func = Function::from_name(&name).ok_or_else(|| FormulaError::UnknownFunction {
            name: name.clone(),
        })?;

        self.descend()?;
        let mut args = vec![self.expr()?];
        while self.peek() == Some(&Token::Comma) {
            self.next += 1;
            args.push(self.expr()?);
        }
        self.expect(&Token::RParen)?;
        self.depth -= 1;

        if args.len() < 2 {
            return Err(FormulaError::Arity {
                name: name.to_ascii_uppercase(),
                found: args.len(),
            });
        }
        Ok(Expr::Call { func, args })
    }
}

/// Parse a formula into an expression over its symbolic aliases
pub fn parse_formula(input: &str) -> Result<Expr<String>, FormulaError> {
    let mut parser = Parser {
        tokens: tokenize(input)?,
        next: 0,
        depth: 0,
    };
    let expr = parser.expr()?;
    match parser.bump() {
        None => Ok(expr),
        Some((t, pos)) => Err(FormulaError::UnexpectedToken {
            found: t.describe(),
            pos,
        }),
    }
}
