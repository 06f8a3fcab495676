//! Dataset split tags.

use serde::{Deserialize, Serialize};

use crate::error::{SplitError, SplitResult};

/// Which partition of the data a component works on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSplit {
    Train,
    Val,
    Test,
}

impl DataSplit {
    pub const ALL: [DataSplit; 3] = [DataSplit::Train, DataSplit::Val, DataSplit::Test];

    /// Parse from string (case-insensitive).
    pub fn from_str(s: &str) -> SplitResult<Self> {
        match s.to_lowercase().as_str() {
            "train" | "training" => Ok(Self::Train),
            "val" | "validation" => Ok(Self::Val),
            "test" => Ok(Self::Test),
            _ => Err(SplitError::UnknownVariant {
                kind: "data split",
                value: s.to_string(),
            }),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Train => "train",
            Self::Val => "val",
            Self::Test => "test",
        }
    }
}

impl std::fmt::Display for DataSplit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_from_str() {
        assert_eq!(DataSplit::from_str("TRAIN").unwrap(), DataSplit::Train);
        assert_eq!(DataSplit::from_str("validation").unwrap(), DataSplit::Val);
        assert_eq!(DataSplit::from_str("test").unwrap(), DataSplit::Test);
        assert!(DataSplit::from_str("holdout").is_err());
    }
}
