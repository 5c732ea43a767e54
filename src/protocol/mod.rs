//! Shuffle Wire Protocol
//!
//! Everything that crosses a machine or file-format boundary between a
//! producer's shuffle service and a fetcher.
//!
//! ## Submodules
//! - **`header`**: the fixed per-output header framing each payload on the
//!   wire, with its variable-length integer encoding.
//! - **`url`**: construction of the multi-attempt fetch URL for one host
//!   session.
//! - **`auth`**: request signing and reply verification against the shared
//!   job secret.
//! - **`index`**: spill index files written by local producers, used by the
//!   local-disk fetch path.

pub mod auth;
pub mod header;
pub mod index;
pub mod url;

#[cfg(test)]
mod tests;
