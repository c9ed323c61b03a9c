//! # bach-primitives
//!
//! Identifier types shared by the BachLedger peering layer.
//!
//! - [`ChainId`]: local numeric id of a chain, never sent to other nodes
//! - [`BlockchainRid`]: 32-byte global id of a chain, used on the wire
//! - [`NodeRid`]: public-key derived id of a node

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod node;
mod rid;

pub use error::PrimitiveError;
pub use node::NodeRid;
pub use rid::BlockchainRid;

/// Local chain identifier
pub type ChainId = u64;
