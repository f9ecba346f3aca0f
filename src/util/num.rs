/// Round down `n` to the nearest multiple of `to`
pub fn round_down(n: usize, to: usize) -> usize {
    n - n % to
}

/// Round up `n` to the nearest multiple of `to`
pub fn round_up(n: usize, to: usize) -> usize {
    to * n.div_ceil(to)
}

/// Reinterpret the bits of an address difference as a pointer-sized word, the
/// way `%p` would print a negative offset.
pub fn as_word(n: isize) -> usize {
    n as usize
}
