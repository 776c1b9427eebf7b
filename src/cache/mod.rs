//! In-process response cache.
//!
//! The cache is deliberately small: a [`CacheKey`] derived from the request
//! line, an immutable [`CacheEntry`] snapshot of an origin response, a
//! concurrent [`CacheStore`] mapping one to the other, and a [`CachePolicy`]
//! deciding which responses are worth keeping.
//!
//! Entries never expire and the store is unbounded. Anything that wants
//! bounded memory plugs in behind [`CachePolicy`] and [`CacheStore`]; the
//! pipeline in [`crate::proxy`] does not need to change.

pub mod entry;
pub mod key;
pub mod policy;
pub mod store;

pub use entry::CacheEntry;
pub use key::CacheKey;
pub use policy::{CachePolicy, SuccessOnly};
pub use store::CacheStore;
