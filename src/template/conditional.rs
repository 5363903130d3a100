//! Conditional evaluator (spec §4.4).
//!
//! A dedicated lexer recognizes `&&`, `||`, `!`, parentheses, string
//! literals (`"…"`/`'…'`), and the operators `== != > < >= <= contains
//! matches`. Expressions evaluate left-to-right with `&&` binding
//! tighter than `||`. Values resolve via `$name` (variable), `@name.prop`
//! (placeholder), or a numeric/string literal.
//!
//! Decoupled from `context::GenerationContext` through the
//! [`ConditionResolver`] trait so this module stays a pure expression
//! evaluator, in the same spirit as `astorion::engine::trigger`'s
//! input-scanning being independent of the parser that consumes it.

use crate::{ActionKind, Conditional};

pub(crate) trait ConditionResolver {
    fn resolve_variable(&self, name: &str) -> Option<String>;
    fn resolve_placeholder(&self, name: &str, property: &str) -> Option<String>;
    fn set_variable(&mut self, name: &str, value: String);
    /// Evaluate an embedded pattern (the conditional's `value`, which
    /// may itself contain `{{...}}` expressions) to a string.
    fn evaluate_pattern(&mut self, pattern: &str) -> String;
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    And,
    Or,
    Not,
    LParen,
    RParen,
    Op(CmpOp),
    Word(String),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum CmpOp {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    Contains,
    Matches,
}

fn lex(expr: &str) -> Vec<Tok> {
    let mut toks = Vec::new();
    let chars: Vec<char> = expr.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '(' => {
                toks.push(Tok::LParen);
                i += 1;
            }
            ')' => {
                toks.push(Tok::RParen);
                i += 1;
            }
            '!' if chars.get(i + 1) == Some(&'=') => {
                toks.push(Tok::Op(CmpOp::Ne));
                i += 2;
            }
            '!' => {
                toks.push(Tok::Not);
                i += 1;
            }
            '&' if chars.get(i + 1) == Some(&'&') => {
                toks.push(Tok::And);
                i += 2;
            }
            '|' if chars.get(i + 1) == Some(&'|') => {
                toks.push(Tok::Or);
                i += 2;
            }
            '=' if chars.get(i + 1) == Some(&'=') => {
                toks.push(Tok::Op(CmpOp::Eq));
                i += 2;
            }
            '>' if chars.get(i + 1) == Some(&'=') => {
                toks.push(Tok::Op(CmpOp::Ge));
                i += 2;
            }
            '<' if chars.get(i + 1) == Some(&'=') => {
                toks.push(Tok::Op(CmpOp::Le));
                i += 2;
            }
            '>' => {
                toks.push(Tok::Op(CmpOp::Gt));
                i += 1;
            }
            '<' => {
                toks.push(Tok::Op(CmpOp::Lt));
                i += 1;
            }
            '"' | '\'' => {
                let quote = c;
                let start = i + 1;
                let mut j = start;
                while j < chars.len() && chars[j] != quote {
                    j += 1;
                }
                let s: String = chars[start..j].iter().collect();
                toks.push(Tok::Word(format!("\u{0}{s}")));
                i = j + 1;
            }
            _ => {
                let start = i;
                while i < chars.len()
                    && !matches!(chars[i], ' ' | '\t' | '\n' | '\r' | '(' | ')' | '"' | '\'')
                    && !(chars[i] == '&' && chars.get(i + 1) == Some(&'&'))
                    && !(chars[i] == '|' && chars.get(i + 1) == Some(&'|'))
                {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                match word.as_str() {
                    "contains" => toks.push(Tok::Op(CmpOp::Contains)),
                    "matches" => toks.push(Tok::Op(CmpOp::Matches)),
                    "" => {}
                    _ => toks.push(Tok::Word(word)),
                }
            }
        }
    }

    toks
}

/// A string literal is tagged with a leading NUL byte by the lexer so
/// the parser can tell `"foo"` (always a string) apart from a bare word
/// that might resolve through `$`/`@` or coerce to a number.
fn is_quoted(word: &str) -> Option<&str> {
    word.strip_prefix('\u{0}')
}

enum Operand {
    Str(String),
}

struct Parser<'a> {
    toks: &'a [Tok],
    pos: usize,
    resolver: &'a dyn ConditionResolver,
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

    fn parse_or(&mut self) -> bool {
        let mut value = self.parse_and();
        while matches!(self.peek(), Some(Tok::Or)) {
            self.next();
            let rhs = self.parse_and();
            value = value || rhs;
        }
        value
    }

    fn parse_and(&mut self) -> bool {
        let mut value = self.parse_unary();
        while matches!(self.peek(), Some(Tok::And)) {
            self.next();
            let rhs = self.parse_unary();
            value = value && rhs;
        }
        value
    }

    fn parse_unary(&mut self) -> bool {
        if matches!(self.peek(), Some(Tok::Not)) {
            self.next();
            return !self.parse_unary();
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> bool {
        if matches!(self.peek(), Some(Tok::LParen)) {
            self.next();
            let v = self.parse_or();
            if matches!(self.peek(), Some(Tok::RParen)) {
                self.next();
            }
            return v;
        }

        let lhs = match self.parse_operand() {
            Some(v) => v,
            None => return false,
        };

        if let Some(Tok::Op(op)) = self.peek() {
            let op = *op;
            self.next();
            let rhs = match self.parse_operand() {
                Some(v) => v,
                None => return false,
            };
            return compare(op, &lhs.0, &rhs.0);
        }

        truthy(&lhs.0)
    }

    fn parse_operand(&mut self) -> Option<(String,)> {
        let tok = self.next()?.clone();
        match tok {
            Tok::LParen => {
                // Grouped boolean value used as an operand is not valid
                // grammar here; treat as malformed.
                None
            }
            Tok::Word(w) => {
                if let Some(s) = is_quoted(&w) {
                    return Some((s.to_string(),));
                }
                if let Some(name) = w.strip_prefix('$') {
                    return Some((self.resolver.resolve_variable(name).unwrap_or_default(),));
                }
                if let Some(rest) = w.strip_prefix('@') {
                    let (name, prop) = rest.split_once('.')?;
                    return Some((self.resolver.resolve_placeholder(name, prop).unwrap_or_default(),));
                }
                Some((w.clone(),))
            }
            _ => None,
        }
    }
}

fn truthy(s: &str) -> bool {
    !s.is_empty() && s != "false" && s != "0"
}

fn compare(op: CmpOp, lhs: &str, rhs: &str) -> bool {
    match op {
        CmpOp::Contains => lhs.to_lowercase().contains(&rhs.to_lowercase()),
        CmpOp::Matches => regex::RegexBuilder::new(rhs)
            .case_insensitive(true)
            .build()
            .map(|re| re.is_match(lhs))
            .unwrap_or(false),
        CmpOp::Eq | CmpOp::Ne => {
            let eq = match (lhs.parse::<f64>(), rhs.parse::<f64>()) {
                (Ok(a), Ok(b)) => a == b,
                _ => lhs == rhs,
            };
            if op == CmpOp::Eq { eq } else { !eq }
        }
        CmpOp::Gt | CmpOp::Lt | CmpOp::Ge | CmpOp::Le => match (lhs.parse::<f64>(), rhs.parse::<f64>()) {
            (Ok(a), Ok(b)) => match op {
                CmpOp::Gt => a > b,
                CmpOp::Lt => a < b,
                CmpOp::Ge => a >= b,
                CmpOp::Le => a <= b,
                _ => unreachable!(),
            },
            _ => false,
        },
    }
}

/// Evaluate a boolean condition expression against `resolver`.
pub(crate) fn evaluate(expr: &str, resolver: &dyn ConditionResolver) -> bool {
    let toks = lex(expr);
    let mut parser = Parser { toks: &toks, pos: 0, resolver };
    parser.parse_or()
}

/// Apply a list of conditionals, in declaration order, to `text` (spec
/// §4.4, §8 testable property 7: a `prepend` then `append` on the same
/// condition yields `prefix + text + suffix`).
pub(crate) fn apply_conditionals(
    conditionals: &[Conditional],
    mut text: String,
    ctx: &mut impl ConditionResolver,
) -> String {
    for cond in conditionals {
        if !evaluate(&cond.when, ctx) {
            continue;
        }
        let value = ctx.evaluate_pattern(&cond.value);
        match cond.action {
            ActionKind::Append => text.push_str(&value),
            ActionKind::Prepend => text = format!("{value}{text}"),
            ActionKind::Replace => match &cond.target {
                Some(target) => {
                    if let Ok(re) = regex::Regex::new(target) {
                        text = re.replace_all(&text, value.as_str()).into_owned();
                    }
                }
                None => text = value,
            },
            ActionKind::SetVariable => {
                if let Some(name) = &cond.target {
                    ctx.set_variable(name, value);
                }
            }
        }
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashMap;

    struct FakeResolver {
        vars: HashMap<String, String>,
        placeholders: HashMap<(String, String), String>,
        set: RefCell<Vec<(String, String)>>,
    }

    impl ConditionResolver for FakeResolver {
        fn resolve_variable(&self, name: &str) -> Option<String> {
            self.vars.get(name).cloned()
        }
        fn resolve_placeholder(&self, name: &str, property: &str) -> Option<String> {
            self.placeholders.get(&(name.to_string(), property.to_string())).cloned()
        }
        fn set_variable(&mut self, name: &str, value: String) {
            self.set.get_mut().push((name.to_string(), value));
        }
        fn evaluate_pattern(&mut self, pattern: &str) -> String {
            pattern.to_string()
        }
    }

    fn resolver() -> FakeResolver {
        let mut placeholders = HashMap::new();
        placeholders.insert(("creature".to_string(), "size".to_string()), "huge".to_string());
        let mut vars = HashMap::new();
        vars.insert("hp".to_string(), "12".to_string());
        FakeResolver { vars, placeholders, set: RefCell::new(Vec::new()) }
    }

    #[test]
    fn evaluates_string_equality_on_placeholder() {
        let r = resolver();
        assert!(evaluate(r#"@creature.size == "huge""#, &r));
        assert!(!evaluate(r#"@creature.size == "tiny""#, &r));
    }

    #[test]
    fn evaluates_numeric_comparison_on_variable() {
        let r = resolver();
        assert!(evaluate("$hp > 10", &r));
        assert!(!evaluate("$hp > 100", &r));
    }

    #[test]
    fn and_binds_tighter_than_or() {
        let r = resolver();
        // false && true || true  =>  (false && true) || true  => true
        assert!(evaluate(r#"$missing == "x" && $hp > 10 || $hp > 0"#, &r));
    }

    #[test]
    fn contains_is_case_insensitive_matches_is_regex() {
        let r = resolver();
        assert!(evaluate(r#"@creature.size contains "HUG""#, &r));
        assert!(evaluate(r#"@creature.size matches "^h.ge$""#, &r));
        assert!(!evaluate(r#"@creature.size matches "^zzz$""#, &r));
    }

    #[test]
    fn prepend_then_append_wraps_text() {
        let mut r = resolver();
        let conditionals = vec![
            Conditional { when: "$hp > 0".to_string(), action: ActionKind::Prepend, value: "pre-".to_string(), target: None },
            Conditional { when: "$hp > 0".to_string(), action: ActionKind::Append, value: "-post".to_string(), target: None },
        ];
        let out = apply_conditionals(&conditionals, "body".to_string(), &mut r);
        assert_eq!(out, "pre-body-post");
    }

    #[test]
    fn replace_uses_regex_target() {
        let mut r = resolver();
        let conditionals = vec![Conditional {
            when: "$hp > 0".to_string(),
            action: ActionKind::Replace,
            value: "X".to_string(),
            target: Some("b.dy".to_string()),
        }];
        let out = apply_conditionals(&conditionals, "body".to_string(), &mut r);
        assert_eq!(out, "X");
    }

    #[test]
    fn set_variable_records_assignment() {
        let mut r = resolver();
        let conditionals = vec![Conditional {
            when: "$hp > 0".to_string(),
            action: ActionKind::SetVariable,
            value: "42".to_string(),
            target: Some("derived".to_string()),
        }];
        apply_conditionals(&conditionals, "body".to_string(), &mut r);
        assert_eq!(r.set.borrow().as_slice(), &[("derived".to_string(), "42".to_string())]);
    }
}
