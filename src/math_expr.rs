//! Math evaluator (spec §4.3).
//!
//! Evaluates infix integer arithmetic (`+ - * / %`) with parentheses and
//! `$name` variable references. Any failure (unknown variable,
//! divide-by-zero, parse error) yields `None`; the orchestrator renders
//! `[math error]` in that case so evaluation can continue (spec: "yields
//! a null result").
//!
//! A small hand-rolled recursive-descent parser, in the same spirit as
//! `astorion::rules::numeral::helpers`'s small numeric-string helpers —
//! no external expression-parsing crate, just enough machinery for the
//! grammar this needs.

use std::collections::HashMap;
use std::iter::Peekable;
use std::str::CharIndices;

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Num(i64),
    Var(String),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    LParen,
    RParen,
}

fn tokenize(expr: &str) -> Option<Vec<Tok>> {
    let mut out = Vec::new();
    let mut chars: Peekable<CharIndices> = expr.char_indices().peekable();

    while let Some(&(i, c)) = chars.peek() {
        match c {
            ' ' | '\t' | '\n' | '\r' => {
                chars.next();
            }
            '+' => {
                out.push(Tok::Plus);
                chars.next();
            }
            '-' => {
                out.push(Tok::Minus);
                chars.next();
            }
            '*' => {
                out.push(Tok::Star);
                chars.next();
            }
            '/' => {
                out.push(Tok::Slash);
                chars.next();
            }
            '%' => {
                out.push(Tok::Percent);
                chars.next();
            }
            '(' => {
                out.push(Tok::LParen);
                chars.next();
            }
            ')' => {
                out.push(Tok::RParen);
                chars.next();
            }
            '$' => {
                let start = i;
                chars.next();
                let mut end = expr.len();
                while let Some(&(j, c2)) = chars.peek() {
                    if c2.is_alphanumeric() || c2 == '_' || c2 == '.' {
                        chars.next();
                    } else {
                        end = j;
                        break;
                    }
                }
                if chars.peek().is_none() {
                    end = expr.len();
                }
                out.push(Tok::Var(expr[start + 1..end].to_string()));
            }
            c if c.is_ascii_digit() => {
                let start = i;
                let mut end = expr.len();
                while let Some(&(j, c2)) = chars.peek() {
                    if c2.is_ascii_digit() {
                        chars.next();
                    } else {
                        end = j;
                        break;
                    }
                }
                if chars.peek().is_none() {
                    end = expr.len();
                }
                out.push(Tok::Num(expr[start..end].parse().ok()?));
            }
            _ => return None,
        }
    }

    Some(out)
}

struct Parser<'a> {
    toks: &'a [Tok],
    pos: usize,
    vars: &'a HashMap<String, String>,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Tok> {
        self.toks.get(self.pos)
    }

    fn next(&mut self) -> Option<&Tok> {
        let t = self.toks.get(self.pos);
        self.pos += 1;
        t
    }

    fn parse_expr(&mut self) -> Option<i64> {
        let mut value = self.parse_term()?;
        loop {
            match self.peek() {
                Some(Tok::Plus) => {
                    self.next();
                    value += self.parse_term()?;
                }
                Some(Tok::Minus) => {
                    self.next();
                    value -= self.parse_term()?;
                }
                _ => break,
            }
        }
        Some(value)
    }

    fn parse_term(&mut self) -> Option<i64> {
        let mut value = self.parse_factor()?;
        loop {
            match self.peek() {
                Some(Tok::Star) => {
                    self.next();
                    value *= self.parse_factor()?;
                }
                Some(Tok::Slash) => {
                    self.next();
                    let rhs = self.parse_factor()?;
                    if rhs == 0 {
                        return None;
                    }
                    value /= rhs;
                }
                Some(Tok::Percent) => {
                    self.next();
                    let rhs = self.parse_factor()?;
                    if rhs == 0 {
                        return None;
                    }
                    value %= rhs;
                }
                _ => break,
            }
        }
        Some(value)
    }

    fn parse_factor(&mut self) -> Option<i64> {
        match self.next()?.clone() {
            Tok::Num(n) => Some(n),
            Tok::Var(name) => {
                let raw = self.vars.get(&name)?;
                raw.trim().parse().ok()
            }
            Tok::Minus => Some(-self.parse_factor()?),
            Tok::LParen => {
                let v = self.parse_expr()?;
                match self.next() {
                    Some(Tok::RParen) => Some(v),
                    _ => None,
                }
            }
            _ => None,
        }
    }
}

/// Evaluate a math expression against a `$name -> value` lookup.
/// Returns `None` on any parse/evaluation failure.
pub fn evaluate(expr: &str, vars: &HashMap<String, String>) -> Option<i64> {
    let toks = tokenize(expr)?;
    if toks.is_empty() {
        return None;
    }
    let mut parser = Parser { toks: &toks, pos: 0, vars };
    let result = parser.parse_expr()?;
    if parser.pos != parser.toks.len() {
        return None;
    }
    Some(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn basic_arithmetic() {
        assert_eq!(evaluate("1 + 2 * 3", &vars(&[])), Some(7));
        assert_eq!(evaluate("(1 + 2) * 3", &vars(&[])), Some(9));
        assert_eq!(evaluate("10 % 3", &vars(&[])), Some(1));
    }

    #[test]
    fn variable_substitution() {
        assert_eq!(evaluate("$a + 1", &vars(&[("a", "4")])), Some(5));
    }

    #[test]
    fn unknown_variable_is_none() {
        assert_eq!(evaluate("$missing + 1", &vars(&[])), None);
    }

    #[test]
    fn divide_by_zero_is_none() {
        assert_eq!(evaluate("1 / 0", &vars(&[])), None);
        assert_eq!(evaluate("1 % 0", &vars(&[])), None);
    }

    #[test]
    fn malformed_expression_is_none() {
        assert_eq!(evaluate("1 +", &vars(&[])), None);
        assert_eq!(evaluate("", &vars(&[])), None);
    }
}
