use std::path::Path;

use crate::policy::allowed_modules;

const WRAPPER_TEMPLATE: &str = r#"import sys
import importlib.abc
import os

_ALLOWED = frozenset(__ALLOWED__)
_SERVER_PATH = __SERVER_PATH__


def _imported_by_server():
    frame = sys._getframe(2)
    while frame is not None:
        filename = frame.f_code.co_filename
        if filename == _SERVER_PATH:
            return True
        if "importlib" not in filename:
            return False
        frame = frame.f_back
    return False


class _SandboxImporter(importlib.abc.MetaPathFinder):
    def find_spec(self, fullname, path=None, target=None):
        base = fullname.split(".")[0]
        if base in _ALLOWED or not _imported_by_server():
            return None
        raise ImportError(
            f"Import of '{fullname}' is not allowed in sandbox. "
            f"Allowed top-level modules: {', '.join(sorted(_ALLOWED))}"
        )


sys.meta_path.insert(0, _SandboxImporter())

_sandbox_dir = os.environ.get("MCP_SANDBOX_DIR", "sandbox")
os.makedirs(_sandbox_dir, exist_ok=True)

with open(_SERVER_PATH, "r", encoding="utf-8") as _f:
    _code = _f.read()

_globals = {"__name__": "__main__", "__file__": _SERVER_PATH, "os": os}
exec(compile(_code, _SERVER_PATH, "exec"), _globals)
"#;

/// Launcher that installs the runtime import hook before `server_py` runs.
///
/// The hook whitelists exactly [`allowed_modules`] for imports issued by the
/// server file itself; modules imported transitively by allowed packages
/// (e.g. `mcp` pulling in `anyio`) resolve normally. `os` is pre-bound in the
/// server's globals so it can read `MCP_SANDBOX_DIR` without importing.
pub fn build_wrapper_script(server_py: &Path, allow_network: bool) -> String {
    let allowed: Vec<&str> = allowed_modules(allow_network).into_iter().collect();
    // JSON string and array literals are valid Python literals.
    let allowed_literal = serde_json::to_string(&allowed).unwrap_or_else(|_| "[]".into());
    let path_literal = serde_json::to_string(&server_py.to_string_lossy())
        .unwrap_or_else(|_| "\"server.py\"".into());

    WRAPPER_TEMPLATE
        .replace("__ALLOWED__", &allowed_literal)
        .replace("__SERVER_PATH__", &path_literal)
}
