//! Demangler helpers for Rust and C++ (Itanium) symbols.

use std::borrow::Cow;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolFlavor {
    Rust,
    Itanium,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DemangleResult {
    pub original: String,
    pub demangled: String,
    pub flavor: SymbolFlavor,
}

/// Itanium names start with `_Z`; some toolchains add an extra leading underscore.
fn looks_itanium(s: &str) -> bool {
    s.starts_with("_Z") || s.starts_with("__Z")
}

pub fn detect_flavor(s: &str) -> SymbolFlavor {
    if rustc_demangle::try_demangle(s).is_ok() {
        return SymbolFlavor::Rust;
    }
    if looks_itanium(s) && cpp_demangle::Symbol::new(s).is_ok() {
        return SymbolFlavor::Itanium;
    }
    SymbolFlavor::Unknown
}

/// Attempt to demangle a single symbol. Returns None when not recognized.
pub fn demangle_one(s: &str) -> Option<DemangleResult> {
    // Rust (v0 + legacy) demangler, without the trailing hash
    if let Ok(dm) = rustc_demangle::try_demangle(s) {
        return Some(DemangleResult {
            original: s.to_string(),
            demangled: format!("{:#}", dm),
            flavor: SymbolFlavor::Rust,
        });
    }
    // C++ (Itanium) demangler
    if looks_itanium(s) {
        if let Ok(sym) = cpp_demangle::Symbol::new(s) {
            if let Ok(out) = sym.demangle(&cpp_demangle::DemangleOptions::default()) {
                return Some(DemangleResult {
                    original: s.to_string(),
                    demangled: out,
                    flavor: SymbolFlavor::Itanium,
                });
            }
        }
    }
    None
}

/// Demangled form of `s`, or `s` itself when it is not a recognised mangled name.
pub fn demangle_or_original(s: &str) -> Cow<'_, str> {
    match demangle_one(s) {
        Some(result) => Cow::Owned(result.demangled),
        None => Cow::Borrowed(s),
    }
}
