// Symbol mangling.
//
// Every identifier that reaches the back end passes through here. The
// scheme is deliberately dumb: NFC-normalise, keep ASCII alphanumerics,
// and escape every other byte as "_x" plus two lowercase hex digits.
// "::" in paths is escaped like any other byte pair, which keeps the
// output unambiguous without a separate separator convention.

use unicode_normalization::UnicodeNormalization;


// Canonical composition of a string. Idempotent.
pub fn nfc(s: &str) -> String {
    s.nfc().collect()
}


fn is_ascii_alnum(c: u8) -> bool {
    (b'0'..=b'9').contains(&c) || (b'A'..=b'Z').contains(&c) || (b'a'..=b'z').contains(&c)
}


fn hex_digit(value: u8) -> char {
    let digit = value & 0xF;
    if digit < 10 {
        (b'0' + digit) as char
    } else {
        (b'a' + digit - 10) as char
    }
}


// Escape the NFC form of a string into a symbol-safe prefix.
pub fn path_to_prefix(s: &str) -> String {
    let normalized = nfc(s);
    let mut out = String::with_capacity(normalized.len());
    for &c in normalized.as_bytes() {
        if is_ascii_alnum(c) {
            out.push(c as char);
        } else {
            out.push('_');
            out.push('x');
            out.push(hex_digit(c >> 4));
            out.push(hex_digit(c));
        }
    }
    out
}


pub fn mangle(s: &str) -> String {
    path_to_prefix(s)
}


// Join path components with "::".
pub fn string_of_path<S: AsRef<str>>(comps: &[S]) -> String {
    let mut out = String::new();
    for (i, comp) in comps.iter().enumerate() {
        if i > 0 {
            out.push_str("::");
        }
        out.push_str(comp.as_ref());
    }
    out
}


// Mangle a joined path.
pub fn path_sig(comps: &[&str]) -> String {
    mangle(&string_of_path(comps))
}


// Mangle a "::"-joined module path, NFC-normalising each component first.
pub fn mangle_module_path(module_path: &str) -> String {
    let parts: Vec<String> = module_path.split("::").map(nfc).collect();
    mangle(&string_of_path(&parts))
}
