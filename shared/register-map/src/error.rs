use snafu::Snafu;

use crate::bit_interval::BitInterval;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The broad class of a layout failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A structural rule was violated regardless of constraints.
    Configuration,
    /// Two bit intervals that must be disjoint intersect.
    Overlap,
    /// A size or address constraint cannot be satisfied by the current layout.
    Constraint,
    /// Persisted input is malformed.
    Parse,
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("{entity}: {message}"))]
    Configuration { entity: String, message: String },

    #[snafu(display("{entity}: bits {interval} overlap already mapped bits {existing}"))]
    Overlap {
        entity: String,
        interval: BitInterval,
        existing: BitInterval,
    },

    #[snafu(display("{entity}: {message}"))]
    Constraint { entity: String, message: String },

    #[snafu(display("{entity}: {message}"))]
    Parse { entity: String, message: String },

    #[snafu(display("malformed document: {source}"))]
    Json { source: serde_json::Error },
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration { .. } => ErrorKind::Configuration,
            Self::Overlap { .. } => ErrorKind::Overlap,
            Self::Constraint { .. } => ErrorKind::Constraint,
            Self::Parse { .. } | Self::Json { .. } => ErrorKind::Parse,
        }
    }

    /// Canonical id of the entity the failure was detected on, if known.
    pub fn entity(&self) -> Option<&str> {
        match self {
            Self::Configuration { entity, .. }
            | Self::Overlap { entity, .. }
            | Self::Constraint { entity, .. }
            | Self::Parse { entity, .. } => Some(entity),
            Self::Json { .. } => None,
        }
    }
}
