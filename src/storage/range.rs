use crate::catalog::key::Key;
use crate::error::IdbError;
use std::ops::Bound;

/// Contiguous interval of keys. Construction guarantees the interval is not
/// inverted, so it can be handed to ordered-map range scans directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRange {
    lower: Bound<Key>,
    upper: Bound<Key>,
}

impl KeyRange {
    pub fn only(key: impl Into<Key>) -> Result<Self, IdbError> {
        let key = key.into().validate()?;
        Ok(Self {
            lower: Bound::Included(key.clone()),
            upper: Bound::Included(key),
        })
    }

    pub fn lower_bound(key: impl Into<Key>, open: bool) -> Result<Self, IdbError> {
        let key = key.into().validate()?;
        Ok(Self {
            lower: bound(key, open),
            upper: Bound::Unbounded,
        })
    }

    pub fn upper_bound(key: impl Into<Key>, open: bool) -> Result<Self, IdbError> {
        let key = key.into().validate()?;
        Ok(Self {
            lower: Bound::Unbounded,
            upper: bound(key, open),
        })
    }

    pub fn bound(
        lower: impl Into<Key>,
        upper: impl Into<Key>,
        lower_open: bool,
        upper_open: bool,
    ) -> Result<Self, IdbError> {
        let lower = lower.into().validate()?;
        let upper = upper.into().validate()?;
        if lower > upper || (lower == upper && (lower_open || upper_open)) {
            return Err(IdbError::Data(format!(
                "lower bound {lower} is greater than upper bound {upper}"
            )));
        }
        Ok(Self {
            lower: bound(lower, lower_open),
            upper: bound(upper, upper_open),
        })
    }

    pub fn unbounded() -> Self {
        Self {
            lower: Bound::Unbounded,
            upper: Bound::Unbounded,
        }
    }

    pub fn lower(&self) -> &Bound<Key> {
        &self.lower
    }

    pub fn upper(&self) -> &Bound<Key> {
        &self.upper
    }

    pub fn includes(&self, key: &Key) -> bool {
        let above = match &self.lower {
            Bound::Included(lower) => key >= lower,
            Bound::Excluded(lower) => key > lower,
            Bound::Unbounded => true,
        };
        let below = match &self.upper {
            Bound::Included(upper) => key <= upper,
            Bound::Excluded(upper) => key < upper,
            Bound::Unbounded => true,
        };
        above && below
    }

    pub(crate) fn bounds(&self) -> (Bound<Key>, Bound<Key>) {
        (self.lower.clone(), self.upper.clone())
    }
}

fn bound(key: Key, open: bool) -> Bound<Key> {
    if open {
        Bound::Excluded(key)
    } else {
        Bound::Included(key)
    }
}

/// The tighter of two lower bounds.
pub(crate) fn max_lower(a: Bound<Key>, b: Bound<Key>) -> Bound<Key> {
    match (&a, &b) {
        (Bound::Unbounded, _) => b,
        (_, Bound::Unbounded) => a,
        (Bound::Included(x) | Bound::Excluded(x), Bound::Included(y) | Bound::Excluded(y)) => {
            if x > y {
                a
            } else if y > x || matches!(b, Bound::Excluded(_)) {
                b
            } else {
                a
            }
        }
    }
}

/// The tighter of two upper bounds.
pub(crate) fn min_upper(a: Bound<Key>, b: Bound<Key>) -> Bound<Key> {
    match (&a, &b) {
        (Bound::Unbounded, _) => b,
        (_, Bound::Unbounded) => a,
        (Bound::Included(x) | Bound::Excluded(x), Bound::Included(y) | Bound::Excluded(y)) => {
            if x < y {
                a
            } else if y < x || matches!(b, Bound::Excluded(_)) {
                b
            } else {
                a
            }
        }
    }
}

/// Whether a pair of bounds admits no key at all. Ordered-map range scans
/// panic on such pairs, so callers check first.
pub(crate) fn is_empty(lower: &Bound<Key>, upper: &Bound<Key>) -> bool {
    match (lower, upper) {
        (Bound::Included(l), Bound::Included(u)) => l > u,
        (Bound::Included(l), Bound::Excluded(u))
        | (Bound::Excluded(l), Bound::Included(u))
        | (Bound::Excluded(l), Bound::Excluded(u)) => l >= u,
        _ => false,
    }
}
