//! Subscription registries
//!
//! Both variants keep the same interest-set table and share its
//! subscribe/unsubscribe semantics. They differ in how updates are found:
//! the push registry listens to store change events, the poll registry runs
//! a periodic diff query.

mod poll;
mod push;
mod table;

pub use poll::{PollRegistry, DEFAULT_POLL_INTERVAL};
pub use push::PushRegistry;
pub use table::{Removal, Subscription, SubscriptionTable};
