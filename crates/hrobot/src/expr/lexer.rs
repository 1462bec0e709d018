//! Tokenizer for inventory expressions.

use crate::error::ExpressionError;

/// A lexical token.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Identifier or keyword (`and`, `is`, `true`, ...).
    Ident(String),
    /// Quoted string literal, escapes already resolved.
    Str(String),
    /// Integer literal.
    Int(i64),
    /// Float literal.
    Float(f64),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Dot,
    Pipe,
    Tilde,
    Plus,
    Minus,
    Assign,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Eof,
}

/// A token with the byte offset it starts at.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub offset: usize,
}

/// Split `source` into tokens, always terminated by [`Token::Eof`].
///
/// # Errors
///
/// Returns [`ExpressionError::Syntax`] on unterminated strings, malformed
/// numbers or characters outside the language.
pub fn tokenize(source: &str) -> Result<Vec<Spanned>, ExpressionError> {
    let chars: Vec<(usize, char)> = source.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let (offset, c) = chars[i];

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        let single = match c {
            '(' => Some(Token::LParen),
            ')' => Some(Token::RParen),
            '[' => Some(Token::LBracket),
            ']' => Some(Token::RBracket),
            ',' => Some(Token::Comma),
            '.' => Some(Token::Dot),
            '|' => Some(Token::Pipe),
            '~' => Some(Token::Tilde),
            '+' => Some(Token::Plus),
            '-' => Some(Token::Minus),
            _ => None,
        };
        if let Some(token) = single {
            tokens.push(Spanned { token, offset });
            i += 1;
            continue;
        }

        let next = chars.get(i + 1).map(|&(_, n)| n);
        let two = match (c, next) {
            ('=', Some('=')) => Some(Token::Eq),
            ('!', Some('=')) => Some(Token::Ne),
            ('<', Some('=')) => Some(Token::Le),
            ('>', Some('=')) => Some(Token::Ge),
            _ => None,
        };
        if let Some(token) = two {
            tokens.push(Spanned { token, offset });
            i += 2;
            continue;
        }

        match c {
            '=' => {
                tokens.push(Spanned { token: Token::Assign, offset });
                i += 1;
            }
            '<' => {
                tokens.push(Spanned { token: Token::Lt, offset });
                i += 1;
            }
            '>' => {
                tokens.push(Spanned { token: Token::Gt, offset });
                i += 1;
            }
            '"' | '\'' => {
                let (text, end) = read_string(&chars, i, c)?;
                tokens.push(Spanned { token: Token::Str(text), offset });
                i = end;
            }
            c if c.is_ascii_digit() => {
                let (token, end) = read_number(source, &chars, i)?;
                tokens.push(Spanned { token, offset });
                i = end;
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].1.is_alphanumeric() || chars[i].1 == '_') {
                    i += 1;
                }
                let end = chars.get(i).map_or(source.len(), |&(o, _)| o);
                tokens.push(Spanned {
                    token: Token::Ident(source[chars[start].0..end].to_string()),
                    offset,
                });
            }
            other => {
                return Err(ExpressionError::Syntax {
                    offset,
                    message: format!("unexpected character '{other}'"),
                });
            }
        }
    }

    tokens.push(Spanned {
        token: Token::Eof,
        offset: source.len(),
    });
    Ok(tokens)
}

/// Read a quoted string starting at `start` (the quote). Unknown escapes
/// keep their backslash so regex patterns like `"\.example"` survive.
fn read_string(
    chars: &[(usize, char)],
    start: usize,
    quote: char,
) -> Result<(String, usize), ExpressionError> {
    let mut text = String::new();
    let mut i = start + 1;

    while i < chars.len() {
        let c = chars[i].1;
        if c == quote {
            return Ok((text, i + 1));
        }
        if c == '\\' {
            match chars.get(i + 1).map(|&(_, n)| n) {
                Some('n') => text.push('\n'),
                Some('t') => text.push('\t'),
                Some('\\') => text.push('\\'),
                Some(q @ ('\'' | '"')) => text.push(q),
                Some(other) => {
                    text.push('\\');
                    text.push(other);
                }
                None => break,
            }
            i += 2;
            continue;
        }
        text.push(c);
        i += 1;
    }

    Err(ExpressionError::Syntax {
        offset: chars[start].0,
        message: "unterminated string literal".to_string(),
    })
}

fn read_number(
    source: &str,
    chars: &[(usize, char)],
    start: usize,
) -> Result<(Token, usize), ExpressionError> {
    let mut i = start;
    let mut is_float = false;

    while i < chars.len() && chars[i].1.is_ascii_digit() {
        i += 1;
    }
    // A dot only continues the number when a digit follows it.
    if i + 1 < chars.len() && chars[i].1 == '.' && chars[i + 1].1.is_ascii_digit() {
        is_float = true;
        i += 1;
        while i < chars.len() && chars[i].1.is_ascii_digit() {
            i += 1;
        }
    }

    let offset = chars[start].0;
    let end = chars.get(i).map_or(source.len(), |&(o, _)| o);
    let text = &source[offset..end];
    let bad_number = || ExpressionError::Syntax {
        offset,
        message: format!("invalid number '{text}'"),
    };

    let token = if is_float {
        Token::Float(text.parse().map_err(|_| bad_number())?)
    } else {
        Token::Int(text.parse().map_err(|_| bad_number())?)
    };
    Ok((token, i))
}
