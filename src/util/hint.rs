/// Mark a failure path as `#[cold]` so the measured allocation sequences stay
/// straight-line.
#[cold]
pub fn cold<R, F: FnOnce() -> R>(f: F) -> R {
    f()
}
