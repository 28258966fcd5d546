//! Environment handed to the compiler.
//!
//! The child starts from an empty environment. Only variables named in
//! `env_passthrough` are copied from the host, and never the ones below.

use std::collections::HashMap;

/// Host variables that are never forwarded, even when listed in the config.
pub const NEVER_FORWARD: &[&str] = &[
    // Library injection
    "LD_PRELOAD",
    "LD_LIBRARY_PATH",
    "LD_AUDIT",
    "DYLD_INSERT_LIBRARIES",
    "DYLD_LIBRARY_PATH",
    // Interpreter hooks (the compiler commonly runs on node)
    "NODE_OPTIONS",
    "NODE_PATH",
    "PYTHONPATH",
    "PYTHONSTARTUP",
    "PERL5OPT",
    "RUBYOPT",
    // Shell behavior
    "BASH_ENV",
    "ENV",
    "SHELLOPTS",
    "IFS",
    // TeX search paths could reach outside the session
    "TEXINPUTS",
    "TEXMFHOME",
    "TEXMFCNF",
];

/// True if `key` may never be forwarded to the compiler.
pub fn is_forbidden(key: &str) -> bool {
    NEVER_FORWARD.iter().any(|&s| s.eq_ignore_ascii_case(key))
}

/// Pick the allowed variables out of `host`.
pub fn forwarded_env<I>(names: &[String], host: I) -> HashMap<String, String>
where
    I: IntoIterator<Item = (String, String)>,
{
    host.into_iter()
        .filter(|(key, _)| names.iter().any(|n| n == key) && !is_forbidden(key))
        .collect()
}
