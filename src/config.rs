//! Process-wide configuration knobs. Naming mirrors the pack's own
//! `SetMaxRecursionDepth`/`GetMaxRecursionDepth`/`GetSerializationVersion`
//! surface, reimplemented here with plain atomics rather than an FFI call.
use std::sync::atomic::{AtomicI32, Ordering};

/// Defensive recursion-depth guard against adversarial structural-tag trees
/// (spec §9). 256 matches the default the spec names.
static MAX_RECURSION_DEPTH: AtomicI32 = AtomicI32::new(256);

/// Set the maximum recursion depth allowed while validating or compiling a
/// structural-tag tree.
pub fn set_max_recursion_depth(depth: i32) {
    MAX_RECURSION_DEPTH.store(depth, Ordering::Relaxed);
}

/// Get the maximum recursion depth allowed while validating or compiling a
/// structural-tag tree.
pub fn get_max_recursion_depth() -> i32 {
    MAX_RECURSION_DEPTH.load(Ordering::Relaxed)
}

/// A stable string identifying the shape of [crate::compiler::CompiledGrammar]
/// serialization. Bumped whenever that shape changes.
pub fn serialization_version() -> &'static str {
    "v1"
}
