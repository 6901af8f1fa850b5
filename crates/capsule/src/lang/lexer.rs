//! Lexer for the capsule script language.

use thiserror::Error;

/// Syntax error with the 1-based source line it occurred on.
///
/// Shared by the lexer and the parser; surfaced to callers as the message
/// of a runtime failure, never as a crash.
#[derive(Debug, Clone, Error)]
#[error("syntax error at line {line}: {message}")]
pub struct SyntaxError {
    pub line: u32,
    pub message: String,
}

impl SyntaxError {
    pub fn new(line: u32, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Number(f64),
    Str(String),
    Ident(String),

    // Keywords
    Fn,
    Let,
    If,
    Else,
    While,
    Return,
    Throw,
    True,
    False,
    Null,

    // Punctuation
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Semi,

    // Operators
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Assign,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    AndAnd,
    OrOr,
    Bang,
}

impl Token {
    /// Short description used in parser error messages.
    pub fn describe(&self) -> String {
        match self {
            Token::Number(n) => format!("number `{n}`"),
            Token::Str(_) => "string literal".to_string(),
            Token::Ident(name) => format!("`{name}`"),
            Token::Fn => "`fn`".to_string(),
            Token::Let => "`let`".to_string(),
            Token::If => "`if`".to_string(),
            Token::Else => "`else`".to_string(),
            Token::While => "`while`".to_string(),
            Token::Return => "`return`".to_string(),
            Token::Throw => "`throw`".to_string(),
            Token::True => "`true`".to_string(),
            Token::False => "`false`".to_string(),
            Token::Null => "`null`".to_string(),
            Token::LParen => "`(`".to_string(),
            Token::RParen => "`)`".to_string(),
            Token::LBrace => "`{`".to_string(),
            Token::RBrace => "`}`".to_string(),
            Token::LBracket => "`[`".to_string(),
            Token::RBracket => "`]`".to_string(),
            Token::Comma => "`,`".to_string(),
            Token::Semi => "`;`".to_string(),
            Token::Plus => "`+`".to_string(),
            Token::Minus => "`-`".to_string(),
            Token::Star => "`*`".to_string(),
            Token::Slash => "`/`".to_string(),
            Token::Percent => "`%`".to_string(),
            Token::Assign => "`=`".to_string(),
            Token::Eq => "`==`".to_string(),
            Token::NotEq => "`!=`".to_string(),
            Token::Lt => "`<`".to_string(),
            Token::LtEq => "`<=`".to_string(),
            Token::Gt => "`>`".to_string(),
            Token::GtEq => "`>=`".to_string(),
            Token::AndAnd => "`&&`".to_string(),
            Token::OrOr => "`||`".to_string(),
            Token::Bang => "`!`".to_string(),
        }
    }
}

/// A token plus the line it started on.
#[derive(Debug, Clone)]
pub struct Lexeme {
    pub token: Token,
    pub line: u32,
}

/// Tokenize `src`. Line comments start with `//`.
pub fn lex(src: &str) -> Result<Vec<Lexeme>, SyntaxError> {
    let mut chars = src.chars().peekable();
    let mut lexemes = Vec::new();
    let mut line: u32 = 1;

    while let Some(&c) = chars.peek() {
        match c {
            '\n' => {
                line += 1;
                chars.next();
            }
            c if c.is_whitespace() => {
                chars.next();
            }
            '/' => {
                chars.next();
                if chars.peek() == Some(&'/') {
                    // Line comment, skip to end of line.
                    for c in chars.by_ref() {
                        if c == '\n' {
                            line += 1;
                            break;
                        }
                    }
                } else {
                    lexemes.push(Lexeme {
                        token: Token::Slash,
                        line,
                    });
                }
            }
            '"' => {
                chars.next();
                let token = lex_string(&mut chars, line)?;
                lexemes.push(Lexeme { token, line });
            }
            c if c.is_ascii_digit() => {
                let token = lex_number(&mut chars, line)?;
                lexemes.push(Lexeme { token, line });
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut word = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_alphanumeric() || c == '_' {
                        word.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let token = match word.as_str() {
                    "fn" => Token::Fn,
                    "let" => Token::Let,
                    "if" => Token::If,
                    "else" => Token::Else,
                    "while" => Token::While,
                    "return" => Token::Return,
                    "throw" => Token::Throw,
                    "true" => Token::True,
                    "false" => Token::False,
                    "null" => Token::Null,
                    _ => Token::Ident(word),
                };
                lexemes.push(Lexeme { token, line });
            }
            _ => {
                chars.next();
                let token = match c {
                    '(' => Token::LParen,
                    ')' => Token::RParen,
                    '{' => Token::LBrace,
                    '}' => Token::RBrace,
                    '[' => Token::LBracket,
                    ']' => Token::RBracket,
                    ',' => Token::Comma,
                    ';' => Token::Semi,
                    '+' => Token::Plus,
                    '-' => Token::Minus,
                    '*' => Token::Star,
                    '%' => Token::Percent,
                    '=' => {
                        if chars.peek() == Some(&'=') {
                            chars.next();
                            Token::Eq
                        } else {
                            Token::Assign
                        }
                    }
                    '!' => {
                        if chars.peek() == Some(&'=') {
                            chars.next();
                            Token::NotEq
                        } else {
                            Token::Bang
                        }
                    }
                    '<' => {
                        if chars.peek() == Some(&'=') {
                            chars.next();
                            Token::LtEq
                        } else {
                            Token::Lt
                        }
                    }
                    '>' => {
                        if chars.peek() == Some(&'=') {
                            chars.next();
                            Token::GtEq
                        } else {
                            Token::Gt
                        }
                    }
                    '&' => {
                        if chars.peek() == Some(&'&') {
                            chars.next();
                            Token::AndAnd
                        } else {
                            return Err(SyntaxError::new(line, "expected `&&`"));
                        }
                    }
                    '|' => {
                        if chars.peek() == Some(&'|') {
                            chars.next();
                            Token::OrOr
                        } else {
                            return Err(SyntaxError::new(line, "expected `||`"));
                        }
                    }
                    other => {
                        return Err(SyntaxError::new(
                            line,
                            format!("unexpected character `{other}`"),
                        ));
                    }
                };
                lexemes.push(Lexeme { token, line });
            }
        }
    }

    Ok(lexemes)
}

fn lex_string(
    chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
    line: u32,
) -> Result<Token, SyntaxError> {
    let mut text = String::new();
    loop {
        match chars.next() {
            Some('"') => return Ok(Token::Str(text)),
            Some('\\') => match chars.next() {
                Some('n') => text.push('\n'),
                Some('t') => text.push('\t'),
                Some('\\') => text.push('\\'),
                Some('"') => text.push('"'),
                Some(other) => {
                    return Err(SyntaxError::new(
                        line,
                        format!("unknown escape `\\{other}` in string literal"),
                    ));
                }
                None => return Err(SyntaxError::new(line, "unterminated string literal")),
            },
            Some('\n') | None => {
                return Err(SyntaxError::new(line, "unterminated string literal"));
            }
            Some(c) => text.push(c),
        }
    }
}

fn lex_number(
    chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
    line: u32,
) -> Result<Token, SyntaxError> {
    let mut text = String::new();
    while let Some(&c) = chars.peek() {
        if c.is_ascii_digit() {
            text.push(c);
            chars.next();
        } else if c == '.' && !text.contains('.') {
            text.push(c);
            chars.next();
        } else {
            break;
        }
    }
    text.parse::<f64>()
        .map(Token::Number)
        .map_err(|_| SyntaxError::new(line, format!("invalid number literal `{text}`")))
}
