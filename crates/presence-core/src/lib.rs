//! presence-core: in-memory presence registry for the chat frontend.
//!
//! - [`store::SessionStore`] keeps one entry per online username.
//! - [`identity::IdentityGenerator`] issues anonymous identities and username
//!   suggestions without touching the registry.
//!
//! No async runtime here; the daemon crate wires these into HTTP and
//! WebSocket surfaces.

pub mod identity;
pub mod store;
pub mod types;

pub use identity::{IdentityGenerator, normalize, validate_format};
pub use store::SessionStore;
pub use types::{Identity, PresenceEntry, PresenceError, PresenceUser};
