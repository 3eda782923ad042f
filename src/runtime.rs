// The runtime symbol catalogue. These names are bit-stable across
// implementations: they are what the emitted objects link against.

use std::collections::HashMap;

use crate::layout::{record_layout_of, Layout};
use crate::mangle::path_sig;


pub fn runtime_panic_sym() -> String {
    path_sig(&["cursive", "runtime", "panic"])
}


pub fn context_init_sym() -> String {
    path_sig(&["cursive", "runtime", "context_init"])
}


pub fn region_sym(op: &str) -> String {
    path_sig(&["cursive", "runtime", "region", op])
}


pub fn string_drop_managed_sym() -> String {
    path_sig(&["cursive", "runtime", "string", "drop_managed"])
}


pub fn bytes_drop_managed_sym() -> String {
    path_sig(&["cursive", "runtime", "bytes", "drop_managed"])
}


// The runtime's region handle: {disc, payload}, two words.
pub fn region_layout() -> (Layout, Vec<(&'static str, u64)>) {
    let (layout, offsets) = record_layout_of(&[Layout::new(1, 1), Layout::new(8, 8)]);
    (
        layout,
        vec![("disc", offsets[0]), ("payload", offsets[1])],
    )
}


lazy_static! {
    static ref BUILTIN_SYMS: HashMap<&'static str, Vec<&'static str>> = {
        let mut map = HashMap::new();
        for op in &[
            "open_read",
            "open_write",
            "open_append",
            "create_write",
            "read_file",
            "read_bytes",
            "write_file",
            "write_stdout",
            "write_stderr",
            "exists",
            "kind",
            "remove",
            "open_dir",
            "create_dir",
            "ensure_dir",
            "restrict",
        ] {
            map.insert(
                Box::leak(format!("FileSystem::{}", op).into_boxed_str()) as &'static str,
                vec!["cursive", "runtime", "fs", op],
            );
        }
        for op in &["with_quota", "alloc_raw", "dealloc_raw"] {
            map.insert(
                Box::leak(format!("HeapAllocator::{}", op).into_boxed_str()) as &'static str,
                vec!["cursive", "runtime", "heap", op],
            );
        }
        for op in &[
            "from",
            "as_view",
            "to_managed",
            "clone_with",
            "append",
            "length",
            "is_empty",
            "drop_managed",
        ] {
            map.insert(
                Box::leak(format!("string::{}", op).into_boxed_str()) as &'static str,
                vec!["cursive", "runtime", "string", op],
            );
            map.insert(
                Box::leak(format!("bytes::{}", op).into_boxed_str()) as &'static str,
                vec!["cursive", "runtime", "bytes", op],
            );
        }
        map
    };
}


// The mangled symbol for a dotted builtin name, or the empty string for
// names outside the catalogue.
pub fn builtin_sym(name: &str) -> String {
    match BUILTIN_SYMS.get(name) {
        Some(comps) => path_sig(comps),
        None        => String::new(),
    }
}
