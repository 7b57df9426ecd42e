//! `define_id!`: prefixed ULID newtypes.

/// Declares `$name`, a `Copy` ULID newtype whose text form is
/// `{prefix}_{ulid}`.
///
/// The text form is what `Display`, `FromStr` and serde use, so ids read
/// the same in logs, the store and JSON.
#[macro_export]
macro_rules! define_id {
    ($name:ident, $prefix:literal) => {
        #[doc = concat!("Scheduler-minted id, written `", $prefix, "_{ulid}`.")]
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
        )]
        #[serde(try_from = "String", into = "String")]
        pub struct $name($crate::Ulid);

        impl $name {
            pub const PREFIX: &'static str = $prefix;

            #[must_use]
            pub fn new() -> Self {
                Self($crate::Ulid::new())
            }

            pub fn parse(input: &str) -> Result<Self, $crate::IdError> {
                if input.is_empty() {
                    return Err($crate::IdError::Empty { kind: $prefix });
                }
                let raw = input
                    .strip_prefix($prefix)
                    .and_then(|rest| rest.strip_prefix('_'))
                    .ok_or_else(|| $crate::IdError::WrongKind {
                        kind: $prefix,
                        input: input.to_string(),
                    })?;
                $crate::Ulid::from_string(raw)
                    .map(Self)
                    .map_err(|e| $crate::IdError::BadUlid {
                        kind: $prefix,
                        input: input.to_string(),
                        reason: e.to_string(),
                    })
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}_{}", $prefix, self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl TryFrom<String> for $name {
            type Error = $crate::IdError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::parse(&value)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> String {
                id.to_string()
            }
        }
    };
}
