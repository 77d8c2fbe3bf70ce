//! Branded ID newtypes.
//!
//! Every identity the broker passes around is a distinct newtype over
//! `String`, so a session key can never be handed to something expecting a
//! channel name.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create from an existing string value.
            #[must_use]
            pub fn from_string(s: String) -> Self {
                Self(s)
            }

            /// Return the inner string as a slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl std::ops::Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

branded_id! {
    /// Identifier of a RAC provider (owner of endpoints and outposts).
    ProviderId
}

branded_id! {
    /// Identifier of a remote endpoint.
    EndpointId
}

branded_id! {
    /// Identifier of an outpost (a deployment of worker instances).
    OutpostId
}

branded_id! {
    /// Identifier of one worker instance, scoped to its outpost.
    InstanceUid
}

branded_id! {
    /// Key of the authenticated session a connection token was issued under.
    SessionKey
}

branded_id! {
    /// Name of a subscriber on the messaging fabric.
    ChannelName
}

impl ChannelName {
    /// Allocate a fresh, unique channel name under `prefix`.
    ///
    /// Names are `"{prefix}.{uuid}"` with a time-ordered UUID in simple form.
    #[must_use]
    pub fn generate(prefix: &str) -> Self {
        Self(format!("{prefix}.{}", Uuid::now_v7().simple()))
    }
}
