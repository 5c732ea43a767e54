//! Fetcher Workers
//!
//! The pull side of the shuffle. A fetcher claims one host assignment at a
//! time and owes the scheduler an outcome for every pending output on it:
//! delivered (`copy_succeeded`), failed (`copy_failed`), or put back for
//! another session.
//!
//! ## Session Shape
//! 1. **Claim**: the scheduler lends a `MapHost` with its pending outputs.
//! 2. **Connect**: one signed keep-alive request fetches every output, in
//!    order, over a single connection. For a co-located producer, the
//!    session reads the spill files directly off local disk instead.
//! 3. **Transfer**: each output's header is parsed and sanity-checked, a
//!    sink is reserved from the allocator, and the payload is streamed into
//!    memory (decompressed) or to disk (raw).
//! 4. **Wind down**: on every exit path the connection is cleaned up, the
//!    host freed, and unfetched outputs put back.
//!
//! ## Submodules
//! - **`connection`**: the keep-alive HTTP session, with timeout- and
//!   shutdown-aware reads.
//! - **`fetcher`**: the host session driver and transfer loop.
//! - **`local`**: the local-disk bypass.
//! - **`pool`**: a worker fleet over an assignment stream.

pub mod connection;
pub mod fetcher;
pub mod local;
pub mod pool;
