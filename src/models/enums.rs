use crate::db::DatabaseError;
use serde::{Deserialize, Serialize};

/// Macro to generate enum with as_str + std::str::FromStr pattern
macro_rules! str_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = DatabaseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant)),+,
                    _ => Err(DatabaseError::InvalidEnum {
                        field: stringify!($name).into(),
                        value: s.into(),
                    }),
                }
            }
        }
    };
}

str_enum!(MergeOperation {
    Merge => "merge",
    Unmerge => "unmerge",
    Link => "link",
    Unlink => "unlink",
});

str_enum!(MigrationAction {
    Reassign => "reassign",
});

// A migration only moves forward: pending may become completed or failed,
// and a completed migration may later be marked rolled_back by an unmerge.
str_enum!(MigrationStatus {
    Pending => "pending",
    Completed => "completed",
    Failed => "failed",
    RolledBack => "rolled_back",
});

str_enum!(CandidateStatus {
    Pending => "pending",
    Merged => "merged",
    Dismissed => "dismissed",
});

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn merge_operation_round_trip() {
        for op in [
            MergeOperation::Merge,
            MergeOperation::Unmerge,
            MergeOperation::Link,
            MergeOperation::Unlink,
        ] {
            assert_eq!(MergeOperation::from_str(op.as_str()).unwrap(), op);
        }
    }

    #[test]
    fn migration_status_round_trip() {
        assert_eq!(
            MigrationStatus::from_str("rolled_back").unwrap(),
            MigrationStatus::RolledBack
        );
        assert_eq!(MigrationStatus::Completed.as_str(), "completed");
    }

    #[test]
    fn unknown_value_is_invalid_enum() {
        let err = CandidateStatus::from_str("approved").unwrap_err();
        assert!(matches!(
            err,
            DatabaseError::InvalidEnum { ref field, ref value }
                if field == "CandidateStatus" && value == "approved"
        ));
    }
}
