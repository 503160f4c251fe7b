//! Status enums mapping to SMALLINT lookup tables.
//!
//! Each enum variant's discriminant matches the seed data in the
//! corresponding `*_statuses` table; the string label is the wire form
//! used in API payloads and change records.

use crate::error::CoreError;

/// Status ID type matching SMALLINT in the database.
pub type StatusId = i16;

macro_rules! define_status_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = ($val:literal, $label:literal) ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[repr(i16)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        pub enum $name {
            $( $(#[$vmeta])* #[serde(rename = $label)] $variant = $val ),+
        }

        impl $name {
            /// Return the database status ID.
            pub fn id(self) -> StatusId {
                self as StatusId
            }

            /// Resolve a database status ID.
            pub fn from_id(id: StatusId) -> Option<Self> {
                match id {
                    $( $val => Some(Self::$variant), )+
                    _ => None,
                }
            }

            /// Wire label, e.g. `"IN_USE"`.
            pub fn as_str(self) -> &'static str {
                match self {
                    $( Self::$variant => $label, )+
                }
            }
        }

        impl From<$name> for StatusId {
            fn from(value: $name) -> Self {
                value as StatusId
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = CoreError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $( $label => Ok(Self::$variant), )+
                    other => Err(CoreError::Validation(format!(
                        "Unknown {} '{other}'",
                        stringify!($name)
                    ))),
                }
            }
        }
    };
}

define_status_enum! {
    /// Connector availability. `InUse` iff exactly one job is active.
    ConnectorStatus {
        Available = (1, "AVAILABLE"),
        InUse = (2, "IN_USE"),
    }
}

define_status_enum! {
    /// Connector job lifecycle status.
    JobStatus {
        Started = (1, "STARTED"),
        Running = (2, "RUNNING"),
        Succeeded = (3, "SUCCEEDED"),
        Failed = (4, "FAILED"),
        Stopped = (5, "STOPPED"),
        Stopping = (6, "STOPPING"),
    }
}

impl JobStatus {
    /// Statuses that hold the connector (`IN_USE`).
    pub const ACTIVE: [JobStatus; 3] = [JobStatus::Started, JobStatus::Running, JobStatus::Stopping];

    /// Statuses from which no further transition is permitted.
    pub const TERMINAL: [JobStatus; 3] = [JobStatus::Succeeded, JobStatus::Failed, JobStatus::Stopped];

    pub fn is_terminal(self) -> bool {
        Self::TERMINAL.contains(&self)
    }

    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }

    /// Whether the job state machine permits `self -> next`.
    ///
    /// ```text
    /// STARTED  -> RUNNING | STOPPING | SUCCEEDED | FAILED
    /// RUNNING  -> STOPPING | SUCCEEDED | FAILED
    /// STOPPING -> STOPPED | SUCCEEDED | FAILED
    /// ```
    ///
    /// Backend completion is authoritative, so any active status may move
    /// straight to `SUCCEEDED` or `FAILED`. `STOPPED` is only reachable
    /// from `STOPPING`.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;

        match (self, next) {
            (Started, Running | Stopping) => true,
            (Running, Stopping) => true,
            (Stopping, Stopped) => true,
            (from, Succeeded | Failed) => from.is_active(),
            _ => false,
        }
    }
}
