//! Boolean combination modes shared by checkers and matchers.

use std::fmt;

use crate::error::{PredicateError, PredicateResult};

/// How two predicate results are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogicMode {
    /// Both operands hold.
    And,
    /// At least one operand holds.
    Or,
    /// Exactly one operand holds.
    Xor,
    /// The single operand does not hold.
    Not,
}

impl LogicMode {
    /// Whether the mode takes two operands.
    pub fn is_binary(self) -> bool {
        !matches!(self, Self::Not)
    }

    /// Combines a left result with an optional right result.
    ///
    /// Binary modes require `right`; `Not` forbids it.
    pub fn calc(self, left: bool, right: Option<bool>) -> PredicateResult<bool> {
        match (self, right) {
            (Self::Not, None) => Ok(!left),
            (Self::Not, Some(_)) => Err(PredicateError::UnexpectedOperand),
            (mode, None) => Err(PredicateError::MissingOperand { mode }),
            (Self::And, Some(right)) => Ok(left && right),
            (Self::Or, Some(right)) => Ok(left || right),
            (Self::Xor, Some(right)) => Ok(left ^ right),
        }
    }

    /// Left-folds a sequence of results with [`calc`](Self::calc).
    ///
    /// An empty sequence is `false`; a single value is returned unchanged.
    pub fn seq_calc(self, values: impl IntoIterator<Item = bool>) -> PredicateResult<bool> {
        if !self.is_binary() {
            return Err(PredicateError::UnsupportedSequenceMode { mode: self });
        }
        let mut values = values.into_iter();
        let Some(first) = values.next() else {
            return Ok(false);
        };
        values.try_fold(first, |acc, value| self.calc(acc, Some(value)))
    }
}

impl fmt::Display for LogicMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::And => "and",
            Self::Or => "or",
            Self::Xor => "xor",
            Self::Not => "not",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calc_truth_tables() {
        for (l, r) in [(false, false), (false, true), (true, false), (true, true)] {
            assert_eq!(LogicMode::And.calc(l, Some(r)).unwrap(), l && r);
            assert_eq!(LogicMode::Or.calc(l, Some(r)).unwrap(), l || r);
            assert_eq!(LogicMode::Xor.calc(l, Some(r)).unwrap(), l != r);
        }
        assert!(LogicMode::Not.calc(false, None).unwrap());
        assert!(!LogicMode::Not.calc(true, None).unwrap());
    }

    #[test]
    fn test_calc_arity_errors() {
        assert!(matches!(
            LogicMode::Not.calc(true, Some(true)),
            Err(PredicateError::UnexpectedOperand)
        ));
        assert!(matches!(
            LogicMode::Xor.calc(true, None),
            Err(PredicateError::MissingOperand {
                mode: LogicMode::Xor
            })
        ));
    }

    #[test]
    fn test_seq_calc() {
        assert!(!LogicMode::Or.seq_calc([]).unwrap());
        assert!(LogicMode::And.seq_calc([true]).unwrap());
        assert!(LogicMode::Or.seq_calc([false, false, true]).unwrap());
        assert!(!LogicMode::And.seq_calc([true, false, true]).unwrap());
        // ((t ^ t) ^ t) = t
        assert!(LogicMode::Xor.seq_calc([true, true, true]).unwrap());
        assert!(matches!(
            LogicMode::Not.seq_calc([true]),
            Err(PredicateError::UnsupportedSequenceMode { .. })
        ));
    }
}
