// ── PassGFW Atoms ──────────────────────────────────────────────────────────
// Pure error types — zero side effects, no I/O.
// Dependency rule: atoms may only depend on std and external pure crates.

pub mod error;
