//! Fetch URL construction.

use crate::shuffle::types::InputAttemptIdentifier;
use std::fmt::Write;

pub const MAP_PARAM: &str = "map";
pub const REDUCE_PARAM: &str = "reduce";
pub const KEEP_ALIVE_PARAM: &str = "keepAlive";

/// Builds the multi-attempt fetch URL for one host session.
///
/// The attempt list rides in a single `map` parameter so the whole session
/// is one request; the shuffle service streams the outputs back in list
/// order. Deterministic: equal inputs produce the identical string, byte
/// for byte.
pub fn construct_fetch_url<'a>(
    base_url: &str,
    attempts: impl IntoIterator<Item = &'a InputAttemptIdentifier>,
    partition: i32,
    keep_alive: bool,
) -> String {
    let mut url = String::with_capacity(base_url.len() + 64);
    url.push_str(base_url);
    url.push('?');
    url.push_str(MAP_PARAM);
    url.push('=');
    for (idx, attempt) in attempts.into_iter().enumerate() {
        if idx > 0 {
            url.push(',');
        }
        url.push_str(&attempt.path_component);
    }
    let _ = write!(
        url,
        "&{REDUCE_PARAM}={partition}&{KEEP_ALIVE_PARAM}={keep_alive}"
    );
    url
}
