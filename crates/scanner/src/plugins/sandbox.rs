//! Advisory sandbox policy for scripted probe logic
//!
//! Pure data consulted by the plugin loader: an allow-list of importable
//! modules and a block-list of dangerous interpreter builtins. The policy
//! is advisory — it gates what the loader registers, but it is not
//! OS-level isolation and the underlying runtime is not guaranteed to
//! enforce it.

use std::collections::BTreeSet;

use once_cell::sync::Lazy;

/// Modules a plugin may declare in its manifest `imports` list.
static ALLOWED_MODULES: Lazy<BTreeSet<&'static str>> = Lazy::new(|| {
    BTreeSet::from([
        "httpx",
        "requests",
        "json",
        "re",
        "asyncio",
        "datetime",
        "hashlib",
        "base64",
        "urllib.parse",
        "socket",
        "ssl",
        "struct",
        "binascii",
    ])
});

/// Interpreter builtins that must never reach plugin code.
static BLOCKED_BUILTINS: Lazy<BTreeSet<&'static str>> = Lazy::new(|| {
    BTreeSet::from([
        "eval",
        "exec",
        "compile",
        "open",
        "__import__",
        "globals",
        "locals",
        "vars",
        "dir",
        "getattr",
        "setattr",
        "delattr",
        "hasattr",
    ])
});

/// The full builtin namespace of the embedded scripting surface, from
/// which the restricted capability namespace is derived.
const INTERPRETER_BUILTINS: &[&str] = &[
    "__import__", "abs", "all", "any", "ascii", "bin", "bool", "bytearray", "bytes", "callable",
    "chr", "classmethod", "compile", "complex", "delattr", "dict", "dir", "divmod", "enumerate",
    "eval", "exec", "filter", "float", "format", "frozenset", "getattr", "globals", "hasattr",
    "hash", "help", "hex", "id", "input", "int", "isinstance", "issubclass", "iter", "len",
    "list", "locals", "map", "max", "memoryview", "min", "next", "object", "oct", "open", "ord",
    "pow", "print", "property", "range", "repr", "reversed", "round", "set", "setattr", "slice",
    "sorted", "staticmethod", "str", "sum", "super", "tuple", "type", "vars", "zip",
];

/// Allow/block policy consulted by the plugin loader.
#[derive(Debug, Clone, Copy, Default)]
pub struct SandboxPolicy;

impl SandboxPolicy {
    /// Create the policy.
    pub fn new() -> Self {
        Self
    }

    /// Whether importing `module` is allowed.
    ///
    /// A module passes when its full dotted name is on the allow-list
    /// (e.g. `urllib.parse`) or its prefix up to the first `.` is (e.g.
    /// `httpx.Client` via `httpx`).
    pub fn check_import(&self, module: &str) -> bool {
        if ALLOWED_MODULES.contains(module) {
            return true;
        }
        let base = module.split('.').next().unwrap_or(module);
        ALLOWED_MODULES.contains(base)
    }

    /// Build the restricted capability namespace: every public builtin
    /// (no leading underscore) that is not on the block-list.
    pub fn restricted_builtins(&self) -> BTreeSet<&'static str> {
        INTERPRETER_BUILTINS
            .iter()
            .copied()
            .filter(|name| !name.starts_with('_') && !BLOCKED_BUILTINS.contains(name))
            .collect()
    }

    /// The module allow-list.
    pub fn allowed_modules(&self) -> &'static BTreeSet<&'static str> {
        &ALLOWED_MODULES
    }

    /// The builtin block-list.
    pub fn blocked_builtins(&self) -> &'static BTreeSet<&'static str> {
        &BLOCKED_BUILTINS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_import_allowed_modules() {
        let sandbox = SandboxPolicy::new();
        assert!(sandbox.check_import("httpx"));
        assert!(sandbox.check_import("requests"));
        assert!(sandbox.check_import("urllib.parse"));
        // Submodule of an allowed base module.
        assert!(sandbox.check_import("httpx.Client"));
        assert!(sandbox.check_import("hashlib.md5"));
    }

    #[test]
    fn test_check_import_blocked_modules() {
        let sandbox = SandboxPolicy::new();
        assert!(!sandbox.check_import("os"));
        assert!(!sandbox.check_import("os.path"));
        assert!(!sandbox.check_import("subprocess"));
        assert!(!sandbox.check_import("sys"));
        // `urllib` alone is not allow-listed; only `urllib.parse` is.
        assert!(!sandbox.check_import("urllib.request"));
    }

    /// The restricted namespace keeps safe builtins and drops the
    /// dangerous and dunder ones.
    #[test]
    fn test_restricted_builtins() {
        let sandbox = SandboxPolicy::new();
        let builtins = sandbox.restricted_builtins();

        assert!(builtins.contains("print"));
        assert!(builtins.contains("len"));
        assert!(builtins.contains("str"));
        assert!(builtins.contains("isinstance"));

        assert!(!builtins.contains("eval"));
        assert!(!builtins.contains("exec"));
        assert!(!builtins.contains("open"));
        assert!(!builtins.contains("__import__"));
        assert!(!builtins.contains("getattr"));
    }

    #[test]
    fn test_policy_sets_are_disjoint_where_expected() {
        let sandbox = SandboxPolicy::new();
        for blocked in sandbox.blocked_builtins() {
            assert!(
                !sandbox.restricted_builtins().contains(blocked),
                "blocked builtin {blocked} leaked into the restricted namespace"
            );
        }
    }
}
