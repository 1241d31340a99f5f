//! Tokenizer and parser for the binding action syntax.
//!
//! ```text
//! expr  := IDENT | NUMBER | STRING | IDENT '(' [expr (',' expr)*] ')'
//! ```
//!
//! The parser only builds the expression tree; [`super::action`] decides
//! what the calls mean.

use crate::mapping::error::ProfileConfigError;

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Call { name: String, args: Vec<Expr> },
    Ident(String),
    Number(f64),
    Str(String),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(f64),
    Str(String),
    Open,
    Close,
    Comma,
}

fn bad(msg: String) -> ProfileConfigError {
    ProfileConfigError::BadArgument(msg)
}

fn tokenize(input: &str) -> Result<Vec<Token>, ProfileConfigError> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some(&(pos, c)) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::Open);
            }
            ')' => {
                chars.next();
                tokens.push(Token::Close);
            }
            ',' => {
                chars.next();
                tokens.push(Token::Comma);
            }
            '"' => {
                chars.next();
                let mut text = String::new();
                let mut closed = false;
                while let Some((_, c)) = chars.next() {
                    match c {
                        '"' => {
                            closed = true;
                            break;
                        }
                        '\\' => match chars.next() {
                            Some((_, escaped)) => text.push(escaped),
                            None => break,
                        },
                        c => text.push(c),
                    }
                }
                if !closed {
                    return Err(bad(format!("unterminated string starting at {pos} in '{input}'")));
                }
                tokens.push(Token::Str(text));
            }
            c if c.is_ascii_digit() || c == '-' || c == '.' => {
                let mut text = String::new();
                while let Some(&(_, c)) = chars.peek() {
                    if c.is_ascii_digit() || c == '-' || c == '.' {
                        text.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let value = text
                    .parse::<f64>()
                    .map_err(|_| bad(format!("invalid number '{text}' in '{input}'")))?;
                tokens.push(Token::Number(value));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut text = String::new();
                while let Some(&(_, c)) = chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        text.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(text));
            }
            other => {
                return Err(bad(format!("unexpected '{other}' at {pos} in '{input}'")));
            }
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn expr(&mut self) -> Result<Expr, ProfileConfigError> {
        match self.next() {
            Some(Token::Ident(name)) => {
                if self.peek() != Some(&Token::Open) {
                    return Ok(Expr::Ident(name));
                }
                self.pos += 1;
                let mut args = Vec::new();
                if self.peek() == Some(&Token::Close) {
                    self.pos += 1;
                    return Ok(Expr::Call { name, args });
                }
                loop {
                    args.push(self.expr()?);
                    match self.next() {
                        Some(Token::Comma) => continue,
                        Some(Token::Close) => break,
                        other => {
                            return Err(bad(format!("expected ',' or ')' in {name}(...), found {other:?}")))
                        }
                    }
                }
                Ok(Expr::Call { name, args })
            }
            Some(Token::Number(value)) => Ok(Expr::Number(value)),
            Some(Token::Str(text)) => Ok(Expr::Str(text)),
            Some(other) => Err(bad(format!("unexpected {other:?}"))),
            None => Err(bad("unexpected end of action".into())),
        }
    }
}

/// Parse one action expression.
pub fn parse(input: &str) -> Result<Expr, ProfileConfigError> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(bad("empty action".into()));
    }
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.expr()?;
    if parser.pos < parser.tokens.len() {
        return Err(bad(format!("trailing input in '{input}'")));
    }
    Ok(expr)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str, args: Vec<Expr>) -> Expr {
        Expr::Call {
            name: name.into(),
            args,
        }
    }

    #[test]
    fn nested_calls() -> Result<(), ProfileConfigError> {
        let expr = parse(r#"macro(button(KEY_A), sleep(50), profile("Two Words"))"#)?;
        assert_eq!(
            expr,
            call(
                "macro",
                vec![
                    call("button", vec![Expr::Ident("KEY_A".into())]),
                    call("sleep", vec![Expr::Number(50.0)]),
                    call("profile", vec![Expr::Str("Two Words".into())]),
                ]
            )
        );
        Ok(())
    }

    #[test]
    fn numbers_and_bare_identifiers() -> Result<(), ProfileConfigError> {
        assert_eq!(
            parse("mouse(REL_X, -2.5)")?,
            call("mouse", vec![Expr::Ident("REL_X".into()), Expr::Number(-2.5)])
        );
        assert_eq!(parse("  KEY_SPACE ")?, Expr::Ident("KEY_SPACE".into()));
        assert_eq!(parse("release()")?, call("release", vec![]));
        Ok(())
    }

    #[test]
    fn malformed_input_is_rejected() {
        for input in ["", "button(KEY_A", "button(KEY_A))", "button(KEY_A KEY_B)", "profile(\"open", "a;b"] {
            assert!(
                matches!(parse(input), Err(ProfileConfigError::BadArgument(_))),
                "{input} should fail"
            );
        }
    }
}
