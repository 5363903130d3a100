//! Dice evaluator (spec §4.2).
//!
//! Accepts `NdM[khK|klK|!][+N|-N|*N]` and computes a total, the
//! individual rolls, the kept subset, an optional modifier, and a
//! breakdown string. Exploding dice (`!`) append a new die whenever the
//! natural maximum is rolled, capped by `max_explosions` (truncated
//! silently, tagged `exploded = true`/`capped = true` for the trace).
//!
//! Structured the way `astorion::rules::numeral::rules` matches a regex
//! against the input and hands the captures to a small producer
//! function — here there's only one shape to match, so the regex and
//! the producer live in the same function.

use rand::Rng;

#[derive(Debug, Clone, PartialEq)]
pub struct DiceResult {
    pub total: i64,
    pub rolls: Vec<i64>,
    pub kept: Vec<i64>,
    pub modifier: Option<Modifier>,
    pub exploded: bool,
    pub explosion_capped: bool,
    pub breakdown: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Modifier {
    Add(i64),
    Sub(i64),
    Mul(i64),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Keep {
    None,
    Highest(u32),
    Lowest(u32),
}

fn dice_regex() -> &'static regex::Regex {
    regex!(r"(?i)^\s*(\d*)d(\d+)(kh(\d+)|kl(\d+))?(!)?(?:([+\-*])(\d+))?\s*$")
}

/// Parse and roll a dice expression like `2d6`, `4d6kh3`, `1d20!`, or
/// `3d8+2`. Returns `None` on a malformed expression (the orchestrator
/// renders `[dice error]` in that case, mirroring the math evaluator's
/// `[math error]` placeholder).
pub fn roll(expr: &str, max_explosions: u32) -> Option<DiceResult> {
    roll_with_rng(expr, max_explosions, &mut rand::thread_rng())
}

pub(crate) fn roll_with_rng(expr: &str, max_explosions: u32, rng: &mut (impl Rng + ?Sized)) -> Option<DiceResult> {
    let caps = dice_regex().captures(expr.trim())?;

    let count: u32 = if caps[1].is_empty() { 1 } else { caps[1].parse().ok()? };
    let sides: u32 = caps[2].parse().ok()?;
    if sides == 0 || count == 0 || count > 10_000 {
        return None;
    }

    let keep = if let Some(kh) = caps.get(4) {
        Keep::Highest(kh.as_str().parse().ok()?)
    } else if let Some(kl) = caps.get(5) {
        Keep::Lowest(kl.as_str().parse().ok()?)
    } else {
        Keep::None
    };

    let exploding = caps.get(6).is_some();

    let modifier = match (caps.get(7), caps.get(8)) {
        (Some(op), Some(n)) => {
            let n: i64 = n.as_str().parse().ok()?;
            match op.as_str() {
                "+" => Some(Modifier::Add(n)),
                "-" => Some(Modifier::Sub(n)),
                "*" => Some(Modifier::Mul(n)),
                _ => None,
            }
        }
        _ => None,
    };

    let mut rolls = Vec::with_capacity(count as usize);
    let mut exploded = false;
    let mut explosion_capped = false;

    for _ in 0..count {
        let mut die = rng.gen_range(1..=sides) as i64;
        let mut explosions = 0u32;
        while exploding && die == sides as i64 {
            if explosions >= max_explosions {
                explosion_capped = true;
                break;
            }
            exploded = true;
            explosions += 1;
            let next = rng.gen_range(1..=sides) as i64;
            rolls.push(die);
            die = next;
        }
        rolls.push(die);
    }

    let mut kept = rolls.clone();
    match keep {
        Keep::None => {}
        Keep::Highest(k) => {
            kept.sort_unstable_by(|a, b| b.cmp(a));
            kept.truncate(k as usize);
        }
        Keep::Lowest(k) => {
            kept.sort_unstable();
            kept.truncate(k as usize);
        }
    }

    let base: i64 = kept.iter().sum();
    let total = match modifier {
        Some(Modifier::Add(n)) => base + n,
        Some(Modifier::Sub(n)) => base - n,
        Some(Modifier::Mul(n)) => base * n,
        None => base,
    };

    let breakdown = format_breakdown(&rolls, &kept, modifier, keep != Keep::None);

    Some(DiceResult { total, rolls, kept, modifier, exploded, explosion_capped, breakdown })
}

fn format_breakdown(rolls: &[i64], kept: &[i64], modifier: Option<Modifier>, has_keep: bool) -> String {
    let mut s = format!("[{}]", rolls.iter().map(|r| r.to_string()).collect::<Vec<_>>().join(", "));
    if has_keep {
        s.push_str(&format!(" kept [{}]", kept.iter().map(|r| r.to_string()).collect::<Vec<_>>().join(", ")));
    }
    if let Some(m) = modifier {
        let (sym, n) = match m {
            Modifier::Add(n) => ("+", n),
            Modifier::Sub(n) => ("-", n),
            Modifier::Mul(n) => ("*", n),
        };
        s.push_str(&format!(" {sym}{n}"));
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn basic_roll_within_bounds() {
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..200 {
            let r = roll_with_rng("2d6", 100, &mut rng).unwrap();
            assert!(r.total >= 2 && r.total <= 12, "total {} out of range", r.total);
            assert_eq!(r.rolls.len(), 2);
        }
    }

    #[test]
    fn keep_highest_reduces_to_k_dice() {
        let mut rng = StdRng::seed_from_u64(2);
        let r = roll_with_rng("4d6kh3", 100, &mut rng).unwrap();
        assert_eq!(r.kept.len(), 3);
        assert!(r.total >= 3 && r.total <= 18);
    }

    #[test]
    fn modifier_applies_after_keep() {
        let mut rng = StdRng::seed_from_u64(3);
        let r = roll_with_rng("2d6+3", 100, &mut rng).unwrap();
        assert_eq!(r.modifier, Some(Modifier::Add(3)));
        assert!(r.total >= 5 && r.total <= 15);
    }

    #[test]
    fn exploding_dice_capped_by_limit() {
        // A d1 with explosion always rolls the max, so it explodes every time.
        let mut rng = StdRng::seed_from_u64(4);
        let r = roll_with_rng("1d1!", 3, &mut rng).unwrap();
        assert!(r.exploded);
        assert!(r.explosion_capped);
        assert_eq!(r.rolls.len(), 4); // 3 explosions + final die
    }

    #[test]
    fn malformed_expression_returns_none() {
        let mut rng = StdRng::seed_from_u64(5);
        assert!(roll_with_rng("not dice", 10, &mut rng).is_none());
        assert!(roll_with_rng("2d0", 10, &mut rng).is_none());
    }
}
