//! Session ticket registry for tpcore.
//!
//! The registry is the single piece of mutable state shared by every loaded
//! protocol module and the inbound RPC path. It owns the canonical
//! [`SessionTicket`](tpcore_types::SessionTicket) records and only ever hands
//! out clones, so a buggy module cannot corrupt another module's view.
//!
//! # Ticket policy
//!
//! - [`SessionRegistry::take`] is a pure copy-out lookup.
//! - [`SessionRegistry::claim`] checks the caller's protocol, bumps
//!   `ref_count` and returns the copy. This is what modules reach through
//!   their `take_session` callback.
//! - [`SessionRegistry::release`] drops one claim; at zero the ticket is
//!   consumed and removed.
//! - Tickets nobody claimed within the time-to-live are expired and swept by
//!   a background task bracketed by `start()` / `stop()`.

mod error;
mod registry;

pub use error::{RegistryError, RegistryResult};
pub use registry::{RegistryConfig, SessionRegistry};
