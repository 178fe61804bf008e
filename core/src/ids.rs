use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Declares a newtype wrapper around `Uuid` for a given entity kind, so the
/// compiler catches `TransactionId` vs `OracleRequestId` mixups at call
/// sites rather than letting them slip through as interchangeable strings.
macro_rules! uuid_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }
    };
}

uuid_id!(UserAccountId);
uuid_id!(WalletId);
uuid_id!(GasAccountId);
uuid_id!(LedgerEntryId);
uuid_id!(TransactionId);
uuid_id!(OracleSourceId);
uuid_id!(OracleRequestId);
uuid_id!(PriceFeedId);
uuid_id!(PriceDatumId);
uuid_id!(TriggerId);
uuid_id!(TriggerEventId);
uuid_id!(SecretId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_distinct_types_with_shared_display() {
        let tx = TransactionId::new();
        let parsed: TransactionId = tx.to_string().parse().unwrap();
        assert_eq!(tx, parsed);
    }
}
