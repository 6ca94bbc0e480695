mod command_error;

pub mod geo;
pub mod hashes;
pub mod hyperloglog;
pub mod keys;
pub mod lists;
pub mod sets;
pub mod sorted_sets;
pub mod streams;
pub mod strings;

pub use command_error::CommandError;

/// Normalizes an inclusive (start, stop) index pair against a collection of
/// `len` elements. Negative indices count from the end (-1 = last element).
/// Returns None when the normalized range selects nothing.
pub(crate) fn normalize_range(len: usize, start: isize, stop: isize) -> Option<(usize, usize)> {
    if len == 0 {
        return None;
    }

    let len = len as isize;

    let mut start = if start < 0 { len + start } else { start };
    let mut stop = if stop < 0 { len + stop } else { stop };

    start = start.max(0);
    stop = stop.min(len - 1);

    if start >= len || start > stop {
        return None;
    }

    Some((start as usize, stop as usize))
}
