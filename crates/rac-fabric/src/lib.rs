//! # rac-fabric
//!
//! The messaging fabric the broker's components talk over.
//!
//! - **Channels** are named, point-to-point and bounded. A send to a full
//!   channel fails immediately with [`FabricError::ChannelFull`]; it never
//!   blocks the sender.
//! - **Groups** are named sets of channels. A group send fans out to every
//!   current member independently; members whose queue is full miss the
//!   message.
//! - A [`Subscription`] owns its channel. Dropping it removes the channel and
//!   every group membership it held.

#![deny(unsafe_code)]

pub mod errors;
pub mod group;
pub mod layer;

pub use errors::FabricError;
pub use group::GroupName;
pub use layer::{ChannelLayer, Subscription};
