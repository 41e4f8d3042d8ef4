//! Shared enums stored as TEXT columns and exchanged as snake_case JSON strings

use serde::{Deserialize, Serialize};

/// Declares a text-backed enum with `as_str`, `Display`, `FromStr` and
/// `TryFrom<String>` (the latter is what `#[sqlx(try_from = "String")]` needs).
macro_rules! text_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident { $($variant:ident => $text:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.to_ascii_lowercase().as_str() {
                    $($text => Ok($name::$variant),)+
                    _ => Err(format!("Invalid {}: {}", stringify!($name), s)),
                }
            }
        }

        impl TryFrom<String> for $name {
            type Error = String;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }
    };
}

text_enum! {
    /// Lifecycle of an event
    pub enum EventStatus {
        Draft => "draft",
        Published => "published",
        Cancelled => "cancelled",
        Completed => "completed",
    }
}

impl EventStatus {
    /// Allowed forward transitions. Cancelled and completed are terminal.
    pub fn can_transition_to(&self, next: EventStatus) -> bool {
        matches!(
            (self, next),
            (EventStatus::Draft, EventStatus::Published)
                | (EventStatus::Draft, EventStatus::Cancelled)
                | (EventStatus::Published, EventStatus::Cancelled)
                | (EventStatus::Published, EventStatus::Completed)
        )
    }

    pub fn accepts_feedback(&self) -> bool {
        matches!(self, EventStatus::Published | EventStatus::Completed)
    }
}

text_enum! {
    pub enum TaskStatus {
        Todo => "todo",
        InProgress => "in_progress",
        Done => "done",
        Cancelled => "cancelled",
    }
}

text_enum! {
    pub enum TaskPriority {
        Low => "low",
        Medium => "medium",
        High => "high",
        Urgent => "urgent",
    }
}

text_enum! {
    /// Role of a user inside a single department
    pub enum DepartmentRole {
        Admin => "admin",
        Member => "member",
    }
}

text_enum! {
    /// Entity an attachment hangs off
    pub enum OwnerType {
        Event => "event",
        Task => "task",
        Department => "department",
    }
}

impl OwnerType {
    /// Table holding owners of this type. Only ever interpolated from this match.
    pub fn table(&self) -> &'static str {
        match self {
            OwnerType::Event => "events",
            OwnerType::Task => "tasks",
            OwnerType::Department => "departments",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_prints_snake_case() {
        assert_eq!("in_progress".parse::<TaskStatus>().unwrap(), TaskStatus::InProgress);
        assert_eq!("URGENT".parse::<TaskPriority>().unwrap(), TaskPriority::Urgent);
        assert_eq!(TaskStatus::InProgress.to_string(), "in_progress");
        assert!("sideways".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn serde_matches_as_str() {
        for status in EventStatus::ALL {
            let json = serde_json::to_value(status).unwrap();
            assert_eq!(json, serde_json::Value::String(status.as_str().to_string()));
        }
    }

    #[test]
    fn event_transitions() {
        assert!(EventStatus::Draft.can_transition_to(EventStatus::Published));
        assert!(EventStatus::Published.can_transition_to(EventStatus::Completed));
        assert!(!EventStatus::Draft.can_transition_to(EventStatus::Completed));
        assert!(!EventStatus::Cancelled.can_transition_to(EventStatus::Published));
        assert!(!EventStatus::Completed.can_transition_to(EventStatus::Cancelled));
        assert!(!EventStatus::Published.can_transition_to(EventStatus::Published));
    }

    #[test]
    fn feedback_only_for_running_or_finished_events() {
        assert!(!EventStatus::Draft.accepts_feedback());
        assert!(EventStatus::Published.accepts_feedback());
        assert!(EventStatus::Completed.accepts_feedback());
        assert!(!EventStatus::Cancelled.accepts_feedback());
    }

    #[test]
    fn owner_tables() {
        assert_eq!(OwnerType::Task.table(), "tasks");
        assert_eq!("department".parse::<OwnerType>().unwrap().table(), "departments");
    }
}
