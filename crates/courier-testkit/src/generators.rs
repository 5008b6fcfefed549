//! Proptest generators for property-based testing.

use std::collections::BTreeMap;

use proptest::prelude::*;

/// Generate a relative file path up to three levels deep.
///
/// Directory segments never contain a dot and file names always do, so no
/// generated file can collide with a generated directory.
pub fn relative_path() -> impl Strategy<Value = String> {
    (
        prop::collection::vec("[a-z0-9_-]{1,10}", 0..=2),
        "[a-z0-9_-]{1,16}\\.(json|bin)",
    )
        .prop_map(|(dirs, file)| {
            let mut path = dirs.join("/");
            if !path.is_empty() {
                path.push('/');
            }
            path.push_str(&file);
            path
        })
}

/// Generate file contents of up to `max_len` bytes.
pub fn file_contents(max_len: usize) -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..=max_len)
}

/// Generate a non-empty session directory tree.
pub fn session_tree() -> impl Strategy<Value = BTreeMap<String, Vec<u8>>> {
    prop::collection::btree_map(relative_path(), file_contents(4096), 1..24)
}
