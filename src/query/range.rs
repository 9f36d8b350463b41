use crate::catalog::key::Key;
use crate::error::IdbError;
use crate::storage::range::KeyRange;
use std::fmt;
use std::str::FromStr;

/// Comparison operator of a where clause. Bracketed operators are intervals:
/// `[` and `]` include their end, `(` and `)` exclude it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Lt,
    Le,
    Ge,
    Gt,
    Closed,
    LeftOpen,
    RightOpen,
    Open,
}

impl Operator {
    pub fn as_str(self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::Ge => ">=",
            Operator::Gt => ">",
            Operator::Closed => "[]",
            Operator::LeftOpen => "(]",
            Operator::RightOpen => "[)",
            Operator::Open => "()",
        }
    }

    pub fn is_interval(self) -> bool {
        matches!(
            self,
            Operator::Closed | Operator::LeftOpen | Operator::RightOpen | Operator::Open
        )
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operator {
    type Err = IdbError;

    fn from_str(op: &str) -> Result<Self, Self::Err> {
        match op {
            "=" => Ok(Operator::Eq),
            "<" => Ok(Operator::Lt),
            "<=" => Ok(Operator::Le),
            ">=" => Ok(Operator::Ge),
            ">" => Ok(Operator::Gt),
            "[]" => Ok(Operator::Closed),
            "(]" => Ok(Operator::LeftOpen),
            "[)" => Ok(Operator::RightOpen),
            "()" => Ok(Operator::Open),
            other => Err(IdbError::UnknownOperator {
                op: other.to_string(),
            }),
        }
    }
}

/// Builds the key range an operator and its operands describe.
///
/// Interval operators need `upper`; it is ignored by the others.
pub fn build_range(op: &str, lower: Key, upper: Option<Key>) -> Result<KeyRange, IdbError> {
    let operator = Operator::from_str(op)?;
    match (operator, upper) {
        (Operator::Eq, _) => KeyRange::only(lower),
        (Operator::Lt, _) => KeyRange::upper_bound(lower, true),
        (Operator::Le, _) => KeyRange::upper_bound(lower, false),
        (Operator::Ge, _) => KeyRange::lower_bound(lower, false),
        (Operator::Gt, _) => KeyRange::lower_bound(lower, true),
        (interval, None) => Err(IdbError::MissingUpperBound {
            op: interval.as_str().to_string(),
        }),
        (Operator::Closed, Some(upper)) => KeyRange::bound(lower, upper, false, false),
        (Operator::LeftOpen, Some(upper)) => KeyRange::bound(lower, upper, true, false),
        (Operator::RightOpen, Some(upper)) => KeyRange::bound(lower, upper, false, true),
        (Operator::Open, Some(upper)) => KeyRange::bound(lower, upper, true, true),
    }
}
