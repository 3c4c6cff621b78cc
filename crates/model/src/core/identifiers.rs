use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc};
use uuid::Uuid;

/// Platform-assigned numeric message identifier, ascending within a stream.
pub type MessageId = i64;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(Arc<str>);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(Arc::from(id.into()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self::new(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self::new(s)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(
    /// A source or target channel (numeric id or handle, kept opaque).
    StreamId
);

string_id!(
    /// Unique replication task identifier.
    TaskId
);

string_id!(OwnerId);

string_id!(
    /// Key shared by every item of one multi-item post.
    MediaGroupKey
);

impl TaskId {
    pub fn generate() -> Self {
        Self::new(format!("task-{}", Uuid::new_v4().simple()))
    }
}
