//! Opaque identifiers minted by the cluster manager.

use serde::{Deserialize, Serialize};

macro_rules! define_value_id {
    ($name:ident) => {
        #[doc = concat!("`", stringify!($name), "` as sent on the wire: `{ \"value\": \"...\" }`.")]
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name {
            pub value: String,
        }

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self {
                    value: value.into(),
                }
            }

            pub fn as_str(&self) -> &str {
                &self.value
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self { value }
            }
        }
    };
}

define_value_id!(FrameworkId);
define_value_id!(OfferId);
define_value_id!(AgentId);
define_value_id!(TaskId);
define_value_id!(ExecutorId);
