#![doc = include_str!("../README.md")]

mod board;
mod coordinator;
mod error;
mod hub;
mod identity;
mod ledger;
mod record;
mod store;
mod ticket;
mod wire;

pub use crate::board::*;
pub use crate::coordinator::*;
pub use crate::error::*;
pub use crate::hub::*;
pub use crate::identity::*;
pub use crate::ledger::*;
pub use crate::record::*;
pub use crate::store::*;
pub use crate::ticket::*;
pub use crate::wire::*;
