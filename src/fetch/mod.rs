//! Outbound HTTP layer
//!
//! All upstream traffic funnels through [`FetchClient`]: request-URL
//! rewriting (public base → internal base, operator URL mappings), per-host
//! outbound proxy selection, a recursion guard, User-Agent overrides,
//! IP forwarding and timeout enforcement with bounded retries.

pub mod http;

pub use http::{FetchClient, FetchOptions};
