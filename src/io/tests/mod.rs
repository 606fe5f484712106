pub mod helpers;
mod tests_aligned;
mod tests_uring;

// Priority 2 — direct I/O, skipped where the filesystem refuses O_DIRECT
mod tests_direct;
