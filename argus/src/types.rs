//! Identifier newtypes shared across the probing, benchmarking and alerting modules.
//!
//! Every entity that crosses a module boundary is addressed by a UUID wrapped in
//! its own type, so a `RuleId` can never be passed where a `ModelId` is expected.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Create a new random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Get the underlying UUID.
            pub fn as_uuid(&self) -> Uuid {
                self.0
            }

            /// Short, readable form used in log lines, e.g. `mdl_1a2b3c4d`.
            pub fn to_short_string(&self) -> String {
                let hex = format!("{:032x}", self.0.as_u128());
                format!("{}_{}", $prefix, &hex[..8])
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.to_short_string())
            }
        }
    };
}

uuid_id!(
    /// Identifies a monitored or benchmarked model (one model offered by one provider account).
    ModelId,
    "mdl"
);
uuid_id!(
    /// Identifies a provider account holding credentials.
    ProviderAccountId,
    "acct"
);
uuid_id!(
    /// Identifies one benchmark run.
    RunId,
    "run"
);
uuid_id!(
    /// Identifies an alert rule.
    RuleId,
    "rule"
);
uuid_id!(
    /// Identifies a single alert (incident).
    AlertId,
    "alert"
);
uuid_id!(
    /// Identifies one uptime check record.
    CheckId,
    "chk"
);
