//! How a look-ahead slice becomes the training target.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::DatasetError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    /// All look-ahead values.
    #[default]
    Sequence,
    First,
    Last,
    Max,
    Min,
}

impl Target {
    /// The natural reduction for a price column: first `open`, highest
    /// `high`, lowest `low`, last of anything else.
    pub fn for_column(column: &str) -> Self {
        match column {
            "open" => Target::First,
            "high" => Target::Max,
            "low" => Target::Min,
            _ => Target::Last,
        }
    }

    /// Number of target values per window.
    pub fn width(self, look_ahead: usize) -> usize {
        match self {
            Target::Sequence => look_ahead,
            _ => 1,
        }
    }

    /// Reduce a non-empty look-ahead slice into `out`.
    pub fn reduce_into(self, ahead: &[f64], out: &mut Vec<f64>) {
        match self {
            Target::Sequence => out.extend_from_slice(ahead),
            Target::First => out.extend(ahead.first().copied()),
            Target::Last => out.extend(ahead.last().copied()),
            Target::Max => out.push(ahead.iter().copied().fold(f64::NEG_INFINITY, f64::max)),
            Target::Min => out.push(ahead.iter().copied().fold(f64::INFINITY, f64::min)),
        }
    }
}

impl FromStr for Target {
    type Err = DatasetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sequence" => Ok(Target::Sequence),
            "first" => Ok(Target::First),
            "last" => Ok(Target::Last),
            "max" => Ok(Target::Max),
            "min" => Ok(Target::Min),
            other => Err(DatasetError::InvalidParameter(format!(
                "unknown target '{other}'"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_defaults() {
        assert_eq!(Target::for_column("open"), Target::First);
        assert_eq!(Target::for_column("high"), Target::Max);
        assert_eq!(Target::for_column("low"), Target::Min);
        assert_eq!(Target::for_column("close"), Target::Last);
        assert_eq!(Target::for_column("volume"), Target::Last);
    }

    #[test]
    fn reductions() {
        let ahead = [3.0, 1.0, 4.0, 2.0];
        let reduce = |t: Target| {
            let mut out = Vec::new();
            t.reduce_into(&ahead, &mut out);
            out
        };
        assert_eq!(reduce(Target::Sequence), ahead.to_vec());
        assert_eq!(reduce(Target::First), vec![3.0]);
        assert_eq!(reduce(Target::Last), vec![2.0]);
        assert_eq!(reduce(Target::Max), vec![4.0]);
        assert_eq!(reduce(Target::Min), vec![1.0]);
        assert_eq!(Target::Sequence.width(4), 4);
        assert_eq!(Target::Max.width(4), 1);
    }

    #[test]
    fn parses_names() {
        assert_eq!("MAX".parse::<Target>().unwrap(), Target::Max);
        assert!("median".parse::<Target>().is_err());
    }
}
