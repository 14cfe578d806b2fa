//! Overlay of locally known rows on top of a server list.

use std::collections::HashSet;

/// Anything with a stable id that can appear in both lists.
pub trait Keyed {
    fn key(&self) -> &str;
}

/// Server rows first, in server order, then every optimistic row whose id the
/// server does not return yet. A server copy always wins over a local one.
pub fn merge_with_optimistic<T: Keyed + Clone>(server: &[T], optimistic: &[T]) -> Vec<T> {
    let known: HashSet<&str> = server.iter().map(Keyed::key).collect();
    server
        .iter()
        .cloned()
        .chain(
            optimistic
                .iter()
                .filter(|row| !known.contains(row.key()))
                .cloned(),
        )
        .collect()
}
