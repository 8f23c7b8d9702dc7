//! Rating values and aggregation.

use serde::Serialize;

use crate::error::{Error, Result};

/// A star rating, guaranteed to be an integer in `[1, 5]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct RatingValue(u8);

impl RatingValue {
    pub fn new(value: i64) -> Result<Self> {
        if (1..=5).contains(&value) {
            Ok(Self(value as u8))
        } else {
            Err(Error::InvalidValue { value })
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

/// Arithmetic mean of the given ratings; `None` when there are none.
///
/// Stored values stay exact; rounding to whole stars is display-only and
/// happens in clients.
pub fn mean(values: impl IntoIterator<Item = RatingValue>) -> Option<f64> {
    let mut sum = 0u64;
    let mut count = 0u64;
    for v in values {
        sum += u64::from(v.get());
        count += 1;
    }
    if count == 0 {
        None
    } else {
        Some(sum as f64 / count as f64)
    }
}
