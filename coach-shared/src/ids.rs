use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Longest identifier accepted anywhere in the system.
pub const MAX_ID_LEN: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    #[error("{kind} must not be empty")]
    Empty { kind: &'static str },

    #[error("{kind} is longer than {max} bytes")]
    TooLong { kind: &'static str, max: usize },

    #[error("{kind} contains invalid character {ch:?}")]
    InvalidChar { kind: &'static str, ch: char },
}

impl IdError {
    pub fn kind(&self) -> &'static str {
        match self {
            IdError::Empty { kind } | IdError::TooLong { kind, .. } | IdError::InvalidChar { kind, .. } => kind,
        }
    }
}

fn validate(kind: &'static str, raw: &str) -> Result<(), IdError> {
    if raw.is_empty() {
        return Err(IdError::Empty { kind });
    }
    if raw.len() > MAX_ID_LEN {
        return Err(IdError::TooLong { kind, max: MAX_ID_LEN });
    }
    if let Some(ch) = raw
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':')))
    {
        return Err(IdError::InvalidChar { kind, ch });
    }
    Ok(())
}

// Every identifier is a validated string newtype. Deserialising goes through
// `parse`, so a typed id in memory is always well-formed.
macro_rules! identifier {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            pub fn parse(raw: impl Into<String>) -> Result<Self, IdError> {
                let raw = raw.into();
                validate($kind, &raw)?;
                Ok(Self(raw))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = IdError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::parse(value)
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

identifier!(
    /// One operating instance of a vehicle on one date.
    RunId,
    "run id"
);
identifier!(
    /// Whoever a seat is booked for. Supplied (already verified) by the identity layer.
    HolderId,
    "holder id"
);
identifier!(SeatId, "seat id");
identifier!(VehicleId, "vehicle id");

impl RunId {
    /// Canonical id for a vehicle's schedule on a given date, e.g. `BUS-7:2026-03-01`.
    pub fn for_vehicle(vehicle: &VehicleId, date: NaiveDate) -> Result<Self, IdError> {
        Self::parse(format!("{}:{}", vehicle, date.format("%Y-%m-%d")))
    }
}
