//! Dice notation parsing and rolling.
//!
//! Downtime only needs the simple additive grammar: one or more `XdY`
//! terms plus flat modifiers, e.g. `1d4`, `2d6+3`, `1d8+1d4-1`.

use crate::host::{DiceRoller, HostError};
use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DiceError {
    #[error("invalid dice notation: {0}")]
    InvalidNotation(String),

    #[error("unsupported die size: d{0}")]
    UnsupportedDie(u32),

    #[error("empty dice notation")]
    Empty,
}

/// The die sizes the rules roll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DieType {
    D4,
    D6,
    D8,
    D10,
    D12,
    D20,
}

impl DieType {
    const ALL: [DieType; 6] = [
        DieType::D4,
        DieType::D6,
        DieType::D8,
        DieType::D10,
        DieType::D12,
        DieType::D20,
    ];

    pub fn sides(&self) -> u32 {
        match self {
            DieType::D4 => 4,
            DieType::D6 => 6,
            DieType::D8 => 8,
            DieType::D10 => 10,
            DieType::D12 => 12,
            DieType::D20 => 20,
        }
    }

    pub fn from_sides(sides: u32) -> Option<DieType> {
        DieType::ALL.into_iter().find(|d| d.sides() == sides)
    }
}

impl fmt::Display for DieType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "d{}", self.sides())
    }
}

/// One `XdY` term of an expression.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DiceTerm {
    pub count: u32,
    pub die: DieType,
}

/// A parsed additive dice expression.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiceExpression {
    pub terms: Vec<DiceTerm>,
    pub modifier: i32,
    pub notation: String,
}

impl DiceExpression {
    /// Parse a notation string. Whitespace is ignored; the die count
    /// defaults to 1 when omitted (`d12`).
    pub fn parse(notation: &str) -> Result<Self, DiceError> {
        let compact: String = notation
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_lowercase();
        if compact.is_empty() {
            return Err(DiceError::Empty);
        }

        let mut terms = Vec::new();
        let mut modifier: i32 = 0;

        // Normalize subtraction into signed addition, then take the
        // expression one '+'-separated segment at a time.
        for segment in compact.replace('-', "+-").split('+') {
            if segment.is_empty() {
                continue;
            }
            let (sign, body) = match segment.strip_prefix('-') {
                Some(rest) => (-1i32, rest),
                None => (1i32, segment),
            };
            if body.is_empty() {
                return Err(DiceError::InvalidNotation(notation.to_string()));
            }

            match body.split_once('d') {
                Some((count, sides)) => {
                    if sign < 0 {
                        // Negative dice terms never occur in the rules.
                        return Err(DiceError::InvalidNotation(notation.to_string()));
                    }
                    let count: u32 = if count.is_empty() {
                        1
                    } else {
                        count
                            .parse()
                            .map_err(|_| DiceError::InvalidNotation(notation.to_string()))?
                    };
                    let sides: u32 = sides
                        .parse()
                        .map_err(|_| DiceError::InvalidNotation(notation.to_string()))?;
                    let die = DieType::from_sides(sides).ok_or(DiceError::UnsupportedDie(sides))?;
                    terms.push(DiceTerm { count, die });
                }
                None => {
                    let value: i32 = body
                        .parse()
                        .map_err(|_| DiceError::InvalidNotation(notation.to_string()))?;
                    modifier += sign * value;
                }
            }
        }

        if terms.is_empty() && modifier == 0 {
            return Err(DiceError::Empty);
        }

        Ok(DiceExpression {
            terms,
            modifier,
            notation: compact,
        })
    }

    /// Roll with the thread RNG.
    pub fn roll(&self) -> RollResult {
        self.roll_with_rng(&mut rand::thread_rng())
    }

    /// Roll with a caller-supplied RNG, for deterministic tests.
    pub fn roll_with_rng<R: Rng>(&self, rng: &mut R) -> RollResult {
        let term_rolls: Vec<TermRoll> = self
            .terms
            .iter()
            .map(|term| {
                let faces: Vec<u32> = (0..term.count)
                    .map(|_| rng.gen_range(1..=term.die.sides()))
                    .collect();
                TermRoll {
                    die: term.die,
                    subtotal: faces.iter().sum(),
                    faces,
                }
            })
            .collect();

        let dice_total: i32 = term_rolls.iter().map(|t| t.subtotal as i32).sum();
        RollResult {
            total: dice_total + self.modifier,
            modifier: self.modifier,
            term_rolls,
            expression: self.clone(),
        }
    }
}

impl FromStr for DiceExpression {
    type Err = DiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DiceExpression::parse(s)
    }
}

impl fmt::Display for DiceExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.notation)
    }
}

/// The faces one term produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TermRoll {
    pub die: DieType,
    pub faces: Vec<u32>,
    pub subtotal: u32,
}

/// A fully resolved roll.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollResult {
    pub expression: DiceExpression,
    pub term_rolls: Vec<TermRoll>,
    pub modifier: i32,
    pub total: i32,
}

impl fmt::Display for RollResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, term) in self.term_rolls.iter().enumerate() {
            if i > 0 {
                write!(f, " + ")?;
            }
            let faces: Vec<String> = term.faces.iter().map(|r| r.to_string()).collect();
            write!(f, "[{}]", faces.join(", "))?;
        }
        match self.modifier {
            0 => {}
            m if m > 0 => write!(f, " + {m}")?,
            m => write!(f, " - {}", -m)?,
        }
        write!(f, " = {}", self.total)
    }
}

/// Parse and roll a notation in one step.
pub fn roll(notation: &str) -> Result<RollResult, DiceError> {
    Ok(DiceExpression::parse(notation)?.roll())
}

/// The default [`DiceRoller`]: parses notation and rolls with the thread
/// RNG. The `visible` hint is ignored; host adapters that can animate rolls
/// for connected viewers honor it instead.
#[derive(Debug, Default)]
pub struct TableDice;

impl TableDice {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DiceRoller for TableDice {
    async fn roll(&self, notation: &str, _visible: bool) -> Result<RollResult, HostError> {
        let expr = DiceExpression::parse(notation)?;
        Ok(expr.roll())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple() {
        let expr = DiceExpression::parse("1d4").unwrap();
        assert_eq!(expr.terms.len(), 1);
        assert_eq!(expr.terms[0].count, 1);
        assert_eq!(expr.terms[0].die, DieType::D4);
        assert_eq!(expr.modifier, 0);
    }

    #[test]
    fn test_parse_modifiers_accumulate() {
        assert_eq!(DiceExpression::parse("1d6+2").unwrap().modifier, 2);
        assert_eq!(DiceExpression::parse("2d6-2").unwrap().modifier, -2);
        assert_eq!(DiceExpression::parse("1d4+3-1").unwrap().modifier, 2);
    }

    #[test]
    fn test_parse_multiple_terms() {
        let expr = DiceExpression::parse("1d4+1d6").unwrap();
        assert_eq!(expr.terms.len(), 2);
        assert_eq!(expr.terms[1].die, DieType::D6);
    }

    #[test]
    fn test_parse_count_defaults_to_one() {
        let expr = DiceExpression::parse("d12").unwrap();
        assert_eq!(expr.terms[0].count, 1);
        assert_eq!(expr.terms[0].die, DieType::D12);
    }

    #[test]
    fn test_parse_ignores_whitespace() {
        let expr = DiceExpression::parse(" 1d4 + 2 ").unwrap();
        assert_eq!(expr.terms.len(), 1);
        assert_eq!(expr.modifier, 2);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(DiceExpression::parse(""), Err(DiceError::Empty)));
        assert!(DiceExpression::parse("xdy").is_err());
        assert!(DiceExpression::parse("1d4-1d6").is_err());
        assert!(matches!(
            DiceExpression::parse("1d7"),
            Err(DiceError::UnsupportedDie(7))
        ));
    }

    #[test]
    fn test_roll_range() {
        for _ in 0..100 {
            let result = roll("1d4").unwrap();
            assert!(result.total >= 1 && result.total <= 4);
        }
    }

    #[test]
    fn test_roll_with_modifier() {
        for _ in 0..100 {
            let result = roll("1d6+2").unwrap();
            assert!(result.total >= 3 && result.total <= 8);
        }
    }

    #[test]
    fn test_display_shows_faces_and_total() {
        let result = DiceExpression::parse("2d6+1").unwrap().roll();
        let shown = result.to_string();
        assert!(shown.starts_with('['));
        assert!(shown.contains("+ 1"));
        assert!(shown.contains('='));
    }
}
