//! Template parser (spec §4.1).
//!
//! Tokenizes a pattern string into an ordered stream of literal spans
//! and typed expression tokens. The parser is a simple left-to-right
//! scanner — it does not recursively parse nested patterns; nesting is
//! introduced by re-parsing child patterns during evaluation
//! (`engine::evaluator`).
//!
//! `Token` is the closed sum type the rest of the engine dispatches on
//! (`engine::dispatch`), directly analogous to `astorion`'s
//! `Token`/`TokenKind` at the crate root — there, dispatch is by
//! `Dimension`; here, by `Token` variant.

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Literal(String),
    Dice(String),
    Math(String),
    Variable { alias: Option<String>, name: String },
    Placeholder { name: String, property: Option<String> },
    Table { reference: String },
    MultiRoll { count: CountSpec, reference: String, unique: bool, separator: Option<String> },
    CaptureMultiRoll {
        count: CountSpec,
        reference: String,
        unique: bool,
        var: String,
        silent: bool,
        separator: Option<String>,
    },
    CaptureAccess { var: String, index: Option<i64>, chain: Vec<ChainSegment>, separator: Option<String> },
    Collect { var: String, property: CollectProperty, unique: bool, separator: Option<String> },
    Again { count: Option<CountSpec>, unique: bool },
    Instance { reference: String, name: String },
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum CountSpec {
    Literal(u32),
    Variable(String),
    Dice(String),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ChainSegment {
    Property(String),
    Count,
    Description,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum CollectProperty {
    Value,
    Property(String),
}

/// A `(span, raw, parsed)` triple, as exposed by `extract-expressions`
/// for expression mapping in a live previewer (spec §4.1).
#[derive(Debug, Clone)]
pub(crate) struct ExpressionSpan {
    pub start: usize,
    pub end: usize,
    pub raw: String,
    pub token: Token,
}

/// Scan `pattern` into a flat token stream.
pub(crate) fn tokenize(pattern: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut literal = String::new();
    let bytes = pattern.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        if pattern[i..].starts_with("\\{{") {
            literal.push_str("{{");
            i += 3;
            continue;
        }
        if pattern[i..].starts_with("{{") {
            if !literal.is_empty() {
                tokens.push(Token::Literal(std::mem::take(&mut literal)));
            }
            if let Some(close) = pattern[i + 2..].find("}}") {
                let content = &pattern[i + 2..i + 2 + close];
                let raw = &pattern[i..i + 2 + close + 2];
                tokens.push(classify(content, raw));
                i += 2 + close + 2;
                continue;
            } else {
                // Unterminated expression: treat the rest as literal text.
                literal.push_str(&pattern[i..]);
                break;
            }
        }
        let ch = pattern[i..].chars().next().unwrap();
        literal.push(ch);
        i += ch.len_utf8();
    }

    if !literal.is_empty() {
        tokens.push(Token::Literal(literal));
    }

    tokens
}

/// Return `(span, raw, parsed)` triples for every `{{...}}` expression
/// in `pattern`, skipping literal runs.
pub(crate) fn extract_expressions(pattern: &str) -> Vec<ExpressionSpan> {
    let mut spans = Vec::new();
    let mut i = 0;

    while i < pattern.len() {
        if pattern[i..].starts_with("\\{{") {
            i += 3;
            continue;
        }
        if pattern[i..].starts_with("{{") {
            if let Some(close) = pattern[i + 2..].find("}}") {
                let end = i + 2 + close + 2;
                let content = &pattern[i + 2..i + 2 + close];
                let raw = pattern[i..end].to_string();
                spans.push(ExpressionSpan { start: i, end, raw: raw.clone(), token: classify(content, &raw) });
                i = end;
                continue;
            } else {
                break;
            }
        }
        i += pattern[i..].chars().next().map(|c| c.len_utf8()).unwrap_or(1);
    }

    spans
}

fn classify(content: &str, raw: &str) -> Token {
    let trimmed = content.trim();

    if let Some(rest) = trimmed.strip_prefix("dice:") {
        return Token::Dice(rest.trim().to_string());
    }
    if let Some(rest) = trimmed.strip_prefix("math:") {
        return Token::Math(rest.trim().to_string());
    }
    if let Some(rest) = trimmed.strip_prefix("collect:") {
        if let Some(tok) = parse_collect(rest.trim()) {
            return tok;
        }
        return Token::Literal(raw.to_string());
    }
    if trimmed == "again" || trimmed.starts_with("again*") {
        if let Some(tok) = parse_again(trimmed) {
            return tok;
        }
        return Token::Literal(raw.to_string());
    }
    if trimmed.contains(">>") {
        return parse_capture_multi_roll(trimmed).unwrap_or_else(|| Token::Literal(raw.to_string()));
    }
    if trimmed.starts_with('$') {
        return parse_dollar(trimmed).unwrap_or_else(|| Token::Literal(raw.to_string()));
    }
    if let Some(rest) = trimmed.strip_prefix('@') {
        return parse_placeholder(rest).unwrap_or_else(|| Token::Literal(raw.to_string()));
    }
    if trimmed.contains('#') {
        return parse_instance(trimmed).unwrap_or_else(|| Token::Literal(raw.to_string()));
    }
    if looks_like_dice(trimmed) {
        return Token::Dice(trimmed.to_string());
    }
    if trimmed.contains('*') {
        return parse_multi_roll(trimmed).unwrap_or_else(|| Token::Literal(raw.to_string()));
    }
    if is_dotted_identifier(trimmed) {
        return Token::Table { reference: trimmed.to_string() };
    }

    Token::Literal(raw.to_string())
}

fn looks_like_dice(s: &str) -> bool {
    regex!(r"(?i)^\s*\d*d\d+(kh\d+|kl\d+)?!?(?:[+\-*]\d+)?\s*$").is_match(s)
}

fn is_dotted_identifier(s: &str) -> bool {
    regex!(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)*$").is_match(s)
}

/// Split a trailing `|modifier` chain off the end of `s`. Modifiers are
/// `|"literal separator"`, `|unique`, or `|silent`, and may be chained.
fn split_modifiers(s: &str) -> (&str, Vec<String>) {
    match s.find('|') {
        Some(idx) => (&s[..idx], s[idx + 1..].split('|').map(|p| p.trim().to_string()).collect()),
        None => (s, Vec::new()),
    }
}

fn modifier_separator(mods: &[String]) -> Option<String> {
    mods.iter().find_map(|m| {
        let m = m.trim();
        if m.len() >= 2 && m.starts_with('"') && m.ends_with('"') { Some(m[1..m.len() - 1].to_string()) } else { None }
    })
}

fn modifier_has(mods: &[String], flag: &str) -> bool {
    mods.iter().any(|m| m.trim() == flag)
}

fn parse_count_spec(s: &str) -> Option<CountSpec> {
    if let Some(name) = s.strip_prefix('$') {
        return Some(CountSpec::Variable(name.to_string()));
    }
    if let Ok(n) = s.parse::<u32>() {
        return Some(CountSpec::Literal(n));
    }
    if looks_like_dice(s) {
        return Some(CountSpec::Dice(s.to_string()));
    }
    None
}

fn parse_multi_roll(s: &str) -> Option<Token> {
    let (body, mods) = split_modifiers(s);
    let separator = modifier_separator(&mods);
    let parts: Vec<&str> = body.split('*').collect();

    let (count_str, unique, reference) = match parts.as_slice() {
        [c, r] => (*c, false, *r),
        [c, u, r] if *u == "unique" => (*c, true, *r),
        _ => return None,
    };

    let count = parse_count_spec(count_str)?;
    if reference.is_empty() {
        return None;
    }
    Some(Token::MultiRoll { count, reference: reference.to_string(), unique, separator })
}

fn parse_capture_multi_roll(s: &str) -> Option<Token> {
    let mut halves = s.splitn(2, ">>");
    let left = halves.next()?.trim();
    let right = halves.next()?.trim();

    let left_parts: Vec<&str> = left.split('*').collect();
    let (count_str, unique, reference) = match left_parts.as_slice() {
        [c, r] => (*c, false, *r),
        [c, u, r] if *u == "unique" => (*c, true, *r),
        _ => return None,
    };
    let count = parse_count_spec(count_str)?;

    let (var_body, mods) = split_modifiers(right);
    let var = var_body.strip_prefix('$')?.to_string();
    let silent = modifier_has(&mods, "silent");
    let separator = modifier_separator(&mods);

    Some(Token::CaptureMultiRoll {
        count,
        reference: reference.to_string(),
        unique,
        var,
        silent,
        separator,
    })
}

fn parse_dollar(s: &str) -> Option<Token> {
    let (body, mods) = split_modifiers(s);
    let separator = modifier_separator(&mods);

    let caps = regex!(r"^\$([A-Za-z_][A-Za-z0-9_]*)(\[(-?\d+)\])?((?:\.[A-Za-z_@][A-Za-z0-9_]*)*)$").captures(body)?;
    let var = caps[1].to_string();
    let index: Option<i64> = caps.get(3).and_then(|m| m.as_str().parse().ok());
    let chain_str = caps.get(4).map(|m| m.as_str()).unwrap_or("");
    let segments: Vec<&str> = chain_str.split('.').filter(|s| !s.is_empty()).collect();

    if index.is_none() && separator.is_none() && segments.len() == 1 {
        let seg = segments[0];
        if !seg.starts_with('@') && seg != "count" && seg != "description" {
            return Some(Token::Variable { alias: Some(var), name: seg.to_string() });
        }
    }
    if index.is_none() && separator.is_none() && segments.is_empty() {
        return Some(Token::Variable { alias: None, name: var });
    }

    let mut chain = Vec::with_capacity(segments.len());
    for seg in &segments {
        if let Some(prop) = seg.strip_prefix('@') {
            chain.push(ChainSegment::Property(prop.to_string()));
        } else if *seg == "count" {
            chain.push(ChainSegment::Count);
        } else if *seg == "description" {
            chain.push(ChainSegment::Description);
        } else {
            return None;
        }
    }

    Some(Token::CaptureAccess { var, index, chain, separator })
}

fn parse_placeholder(rest: &str) -> Option<Token> {
    match rest.split_once('.') {
        Some((name, prop)) if !name.is_empty() && !prop.is_empty() => {
            Some(Token::Placeholder { name: name.to_string(), property: Some(prop.to_string()) })
        }
        None if !rest.is_empty() => Some(Token::Placeholder { name: rest.to_string(), property: None }),
        _ => None,
    }
}

fn parse_collect(s: &str) -> Option<Token> {
    let (body, mods) = split_modifiers(s);
    let unique = modifier_has(&mods, "unique");
    let separator = modifier_separator(&mods);

    let caps = regex!(r"^\$([A-Za-z_][A-Za-z0-9_]*)\.(?:@([A-Za-z_][A-Za-z0-9_]*)|(value))$").captures(body)?;
    let var = caps[1].to_string();
    let property =
        if let Some(p) = caps.get(2) { CollectProperty::Property(p.as_str().to_string()) } else { CollectProperty::Value };

    Some(Token::Collect { var, property, unique, separator })
}

fn parse_again(s: &str) -> Option<Token> {
    if s == "again" {
        return Some(Token::Again { count: None, unique: false });
    }
    let rest = s.strip_prefix("again*")?;
    if rest == "unique" {
        return Some(Token::Again { count: None, unique: true });
    }
    let n: u32 = rest.parse().ok()?;
    Some(Token::Again { count: Some(CountSpec::Literal(n)), unique: false })
}

fn parse_instance(s: &str) -> Option<Token> {
    let (reference, name) = s.split_once('#')?;
    if reference.is_empty() || name.is_empty() {
        return None;
    }
    Some(Token::Instance { reference: reference.to_string(), name: name.to_string() })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizes_literal_and_table() {
        let toks = tokenize("You find {{loot}} nearby.");
        assert_eq!(toks.len(), 3);
        assert_eq!(toks[0], Token::Literal("You find ".to_string()));
        assert_eq!(toks[1], Token::Table { reference: "loot".to_string() });
        assert_eq!(toks[2], Token::Literal(" nearby.".to_string()));
    }

    #[test]
    fn tokenizes_dice_forms() {
        assert_eq!(tokenize("{{dice:2d6+3}}")[0], Token::Dice("2d6+3".to_string()));
        assert_eq!(tokenize("{{2d6}}")[0], Token::Dice("2d6".to_string()));
    }

    #[test]
    fn tokenizes_variable_and_capture_access() {
        assert_eq!(tokenize("{{$hero}}")[0], Token::Variable { alias: None, name: "hero".to_string() });
        assert_eq!(
            tokenize("{{$hero.@name}}")[0],
            Token::CaptureAccess {
                var: "hero".to_string(),
                index: None,
                chain: vec![ChainSegment::Property("name".to_string())],
                separator: None
            }
        );
        assert_eq!(
            tokenize("{{$foes[-1].@type}}")[0],
            Token::CaptureAccess {
                var: "foes".to_string(),
                index: Some(-1),
                chain: vec![ChainSegment::Property("type".to_string())],
                separator: None
            }
        );
        assert_eq!(
            tokenize("{{$foes.count}}")[0],
            Token::CaptureAccess { var: "foes".to_string(), index: None, chain: vec![ChainSegment::Count], separator: None }
        );
    }

    #[test]
    fn tokenizes_multi_roll_and_capture_multi_roll() {
        assert_eq!(
            tokenize("{{3*unique*enemies|\" and \"}}")[0],
            Token::MultiRoll {
                count: CountSpec::Literal(3),
                reference: "enemies".to_string(),
                unique: true,
                separator: Some(" and ".to_string())
            }
        );
        assert_eq!(
            tokenize("{{3*enemies >> $foes|silent}}")[0],
            Token::CaptureMultiRoll {
                count: CountSpec::Literal(3),
                reference: "enemies".to_string(),
                unique: false,
                var: "foes".to_string(),
                silent: true,
                separator: None
            }
        );
    }

    #[test]
    fn tokenizes_collect_again_instance_placeholder() {
        assert_eq!(
            tokenize("{{collect:$foes.@type|unique}}")[0],
            Token::Collect {
                var: "foes".to_string(),
                property: CollectProperty::Property("type".to_string()),
                unique: true,
                separator: None
            }
        );
        assert_eq!(tokenize("{{again*3}}")[0], Token::Again { count: Some(CountSpec::Literal(3)), unique: false });
        assert_eq!(tokenize("{{again*unique}}")[0], Token::Again { count: None, unique: true });
        assert_eq!(
            tokenize("{{loot#x}}")[0],
            Token::Instance { reference: "loot".to_string(), name: "x".to_string() }
        );
        assert_eq!(
            tokenize("{{@creature.size}}")[0],
            Token::Placeholder { name: "creature".to_string(), property: Some("size".to_string()) }
        );
    }

    #[test]
    fn extract_expressions_reports_spans() {
        let spans = extract_expressions("A {{dice:1d4}} B");
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].start, 2);
        assert_eq!(spans[0].raw, "{{dice:1d4}}");
        assert_eq!(spans[0].token, Token::Dice("1d4".to_string()));
    }

    #[test]
    fn unrecognized_expression_falls_back_to_literal() {
        let toks = tokenize("{{$$$bad}}");
        assert_eq!(toks[0], Token::Literal("{{$$$bad}}".to_string()));
    }
}
