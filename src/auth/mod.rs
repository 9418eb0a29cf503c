//! Authentication: durable account/session storage and the UDP request
//! handler built on top of it.

pub mod service;
pub mod store;

pub use service::{AuthHandler, AuthService};
pub use store::{AuthStore, StoreError};
