//! Order-preserving split of the product list into report groups

use crate::error::{Error, Result};

/// Split `items` into consecutive groups of at most `chunk_size` elements
///
/// Produces `ceil(n / chunk_size)` groups; only the last one may be shorter. Concatenating
/// the groups gives back the input unchanged. A zero `chunk_size` is a configuration error.
pub fn chunk<T>(items: Vec<T>, chunk_size: usize) -> Result<Vec<Vec<T>>> {
    if chunk_size == 0 {
        return Err(Error::config("CHUNK_SIZE", "chunk size must be positive"));
    }

    let mut groups = Vec::with_capacity(items.len().div_ceil(chunk_size));
    let mut iter = items.into_iter().peekable();
    while iter.peek().is_some() {
        groups.push(iter.by_ref().take(chunk_size).collect());
    }
    Ok(groups)
}
