use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// Identifies a worker machine. Chosen by whoever deploys the worker.
    WorkerId
);

string_id!(
    /// Distinguishes independent dequeue attempts of one worker. A worker that
    /// retries a poll with the same request id gets the same bucket back.
    RequestId
);

string_id!(
    /// Identifies a job. Chosen by the client scheduling tests.
    JobId
);

string_id!(
    /// Stable identifier of a bucket. Retries of failed entries get a new one.
    BucketId
);

string_id!(
    /// Issued by the queue server at start. Workers echo it back so results
    /// from a previous server instance are rejected.
    PayloadSignature
);

impl RequestId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl BucketId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl PayloadSignature {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}
