//! Guard rails for AI-authored MCP server code.
//!
//! Three layers, applied at different times:
//! - [`validate_code`] parses the code and rejects disallowed imports,
//!   calls and attribute access before it is written to disk;
//! - [`build_wrapper_script`] produces the launcher that installs an import
//!   hook before the server module runs;
//! - [`build_sandbox_env`] gives the subprocess a scrubbed environment.
//!
//! None of this is an OS-level boundary.

mod env;
mod policy;
mod validate;
mod wrapper;

pub use env::{build_sandbox_env, build_sandbox_env_from, SANDBOX_DIR_VAR};
pub use policy::{
    allowed_modules, check_module, ModuleVerdict, ALLOWED_MODULES, DANGEROUS_ATTRS,
    DANGEROUS_CALLS, NETWORK_MODULES,
};
pub use validate::{validate_code, SyntaxError, ValidationError, Violation};
pub use wrapper::build_wrapper_script;
