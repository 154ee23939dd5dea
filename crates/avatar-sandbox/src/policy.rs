use std::collections::BTreeSet;

/// Top-level modules any sandboxed server may import.
pub const ALLOWED_MODULES: &[&str] = &[
    "abc",
    "base64",
    "collections",
    "contextlib",
    "copy",
    "dataclasses",
    "datetime",
    "decimal",
    "enum",
    "fractions",
    "functools",
    "hashlib",
    "io",
    "itertools",
    "json",
    "logging",
    "math",
    "mcp",
    "operator",
    "pprint",
    "random",
    "re",
    "statistics",
    "string",
    "struct",
    "textwrap",
    "time",
    "typing",
    "uuid",
];

/// Unlocked only for servers created with network access.
pub const NETWORK_MODULES: &[&str] = &[
    "aiohttp", "ftplib", "http", "httpx", "imaplib", "poplib", "requests", "smtplib", "socket",
    "ssl", "urllib", "xmlrpc",
];

pub const DANGEROUS_CALLS: &[&str] = &[
    "eval",
    "exec",
    "compile",
    "__import__",
    "breakpoint",
    "exit",
    "quit",
];

pub const DANGEROUS_ATTRS: &[&str] = &[
    "__class__",
    "__bases__",
    "__subclasses__",
    "__mro__",
    "__globals__",
    "__code__",
    "__builtins__",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleVerdict {
    Allowed,
    NeedsNetwork,
    Forbidden,
}

/// Classify a (possibly dotted) module name by its top-level package.
pub fn check_module(module: &str, allow_network: bool) -> ModuleVerdict {
    let base = module.split('.').next().unwrap_or(module);
    if ALLOWED_MODULES.contains(&base) {
        return ModuleVerdict::Allowed;
    }
    if NETWORK_MODULES.contains(&base) {
        return if allow_network {
            ModuleVerdict::Allowed
        } else {
            ModuleVerdict::NeedsNetwork
        };
    }
    ModuleVerdict::Forbidden
}

/// The exact set the runtime import hook whitelists.
pub fn allowed_modules(allow_network: bool) -> BTreeSet<&'static str> {
    let mut set: BTreeSet<&'static str> = ALLOWED_MODULES.iter().copied().collect();
    if allow_network {
        set.extend(NETWORK_MODULES.iter().copied());
    }
    set
}
