use std::fmt;

use rustpython_ast::Visitor;
use rustpython_parser::ast;
use rustpython_parser::Parse;

use crate::policy::{check_module, ModuleVerdict, DANGEROUS_ATTRS, DANGEROUS_CALLS};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    NetworkImport { line: usize, module: String },
    ForbiddenImport { line: usize, module: String },
    ForbiddenCall { line: usize, name: String },
    ForbiddenAttribute { line: usize, attr: String },
}

impl Violation {
    pub fn line(&self) -> usize {
        match self {
            Violation::NetworkImport { line, .. }
            | Violation::ForbiddenImport { line, .. }
            | Violation::ForbiddenCall { line, .. }
            | Violation::ForbiddenAttribute { line, .. } => *line,
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::NetworkImport { line, module } => {
                write!(f, "Line {line}: import '{module}' requires allow_network=true")
            }
            Violation::ForbiddenImport { line, module } => {
                write!(f, "Line {line}: import '{module}' is not allowed")
            }
            Violation::ForbiddenCall { line, name } => {
                write!(f, "Line {line}: call to '{name}()' is forbidden")
            }
            Violation::ForbiddenAttribute { line, attr } => {
                write!(f, "Line {line}: access to '{attr}' is forbidden")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Syntax error on line {line}: {message}")]
pub struct SyntaxError {
    pub line: usize,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error(transparent)]
    Syntax(#[from] SyntaxError),
    #[error("{}", join(.0))]
    Rejected(Vec<Violation>),
}

impl ValidationError {
    pub fn violations(&self) -> &[Violation] {
        match self {
            ValidationError::Rejected(v) => v,
            ValidationError::Syntax(_) => &[],
        }
    }
}

fn join(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Byte offset to 1-based line number.
struct LineIndex {
    starts: Vec<usize>,
}

impl LineIndex {
    fn new(source: &str) -> Self {
        let mut starts = vec![0];
        starts.extend(source.match_indices('\n').map(|(i, _)| i + 1));
        Self { starts }
    }

    fn line(&self, offset: impl Into<usize>) -> usize {
        let offset = offset.into();
        self.starts.partition_point(|&start| start <= offset).max(1)
    }
}

/// Statically check AI-authored server code.
///
/// The source is parsed first; a syntax error is reported alone. Otherwise
/// every violation is collected so the author can fix them all in one round.
/// The check is name based: it catches the usual escape idioms, not every
/// possible obfuscation.
pub fn validate_code(code: &str, allow_network: bool) -> Result<(), ValidationError> {
    let lines = LineIndex::new(code);
    let suite = ast::Suite::parse(code, "<server>").map_err(|e| SyntaxError {
        line: lines.line(e.offset),
        message: e.error.to_string(),
    })?;

    let mut checker = Checker {
        lines,
        allow_network,
        found: Vec::new(),
    };
    for stmt in suite {
        checker.visit_stmt(stmt);
    }

    if checker.found.is_empty() {
        return Ok(());
    }
    // Source order: an attribute chain is visited outermost first, so it is
    // keyed by where each attribute name ends.
    checker.found.sort_by_key(|(pos, v)| (v.line(), *pos));
    Err(ValidationError::Rejected(
        checker.found.into_iter().map(|(_, v)| v).collect(),
    ))
}

struct Checker {
    lines: LineIndex,
    allow_network: bool,
    found: Vec<(usize, Violation)>,
}

impl Checker {
    fn check_import(&mut self, module: &str, start: usize) {
        let line = self.lines.line(start);
        let violation = match check_module(module, self.allow_network) {
            ModuleVerdict::Allowed => return,
            ModuleVerdict::NeedsNetwork => Violation::NetworkImport {
                line,
                module: module.to_string(),
            },
            ModuleVerdict::Forbidden => Violation::ForbiddenImport {
                line,
                module: module.to_string(),
            },
        };
        self.found.push((start, violation));
    }
}

impl Visitor for Checker {
    fn visit_stmt(&mut self, node: ast::Stmt) {
        match &node {
            ast::Stmt::Import(import) => {
                for alias in &import.names {
                    self.check_import(alias.name.as_str(), import.range.start().into());
                }
            }
            // `from . import x` names no module; the imported names are
            // attributes, not modules.
            ast::Stmt::ImportFrom(from) => {
                if let Some(module) = &from.module {
                    self.check_import(module.as_str(), from.range.start().into());
                }
            }
            _ => {}
        }
        self.generic_visit_stmt(node);
    }

    fn visit_expr(&mut self, node: ast::Expr) {
        match &node {
            ast::Expr::Call(call) => {
                let name = match call.func.as_ref() {
                    ast::Expr::Name(name) => Some(name.id.as_str()),
                    ast::Expr::Attribute(attr) => Some(attr.attr.as_str()),
                    _ => None,
                };
                if let Some(name) = name.filter(|n| DANGEROUS_CALLS.contains(n)) {
                    let start = call.range.start();
                    let violation = Violation::ForbiddenCall {
                        line: self.lines.line(start),
                        name: name.to_string(),
                    };
                    self.found.push((start.into(), violation));
                }
            }
            ast::Expr::Attribute(attr) if DANGEROUS_ATTRS.contains(&attr.attr.as_str()) => {
                let violation = Violation::ForbiddenAttribute {
                    line: self.lines.line(attr.range.start()),
                    attr: attr.attr.as_str().to_string(),
                };
                self.found.push((attr.range.end().into(), violation));
            }
            _ => {}
        }
        self.generic_visit_expr(node);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FASTMCP_SERVER: &str = r#"from mcp.server.fastmcp import FastMCP
import json
import datetime as dt

mcp = FastMCP("notes")

@mcp.tool()
def today() -> str:
    """Return today's date."""
    return json.dumps({"today": dt.date.today().isoformat()})

mcp.run()
"#;

    #[test]
    fn accepts_plain_fastmcp_server() {
        assert_eq!(validate_code(FASTMCP_SERVER, false), Ok(()));
    }

    #[test]
    fn socket_needs_network_permission() {
        let src = "import socket\n";
        let err = validate_code(src, false).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Line 1: import 'socket' requires allow_network=true"
        );
        assert_eq!(validate_code(src, true), Ok(()));
    }

    #[test]
    fn rejects_eval_and_globals_regardless_of_network() {
        let src = "x = eval('1 + 1')\ny = f.__globals__\n";
        for allow_network in [false, true] {
            let err = validate_code(src, allow_network).unwrap_err();
            assert_eq!(
                err.to_string(),
                "Line 1: call to 'eval()' is forbidden; Line 2: access to '__globals__' is forbidden"
            );
        }
    }

    #[test]
    fn collects_every_violation() {
        let src = "import os, sys\nfrom subprocess import run\nimport requests\nobj.__class__.__mro__\nexec('x')\n";
        let err = validate_code(src, false).unwrap_err();
        let lines: Vec<String> = err.violations().iter().map(ToString::to_string).collect();
        assert_eq!(
            lines,
            vec![
                "Line 1: import 'os' is not allowed",
                "Line 1: import 'sys' is not allowed",
                "Line 2: import 'subprocess' is not allowed",
                "Line 3: import 'requests' requires allow_network=true",
                "Line 4: access to '__class__' is forbidden",
                "Line 4: access to '__mro__' is forbidden",
                "Line 5: call to 'exec()' is forbidden",
            ]
        );
    }

    #[test]
    fn dotted_and_aliased_imports_use_top_level_name() {
        let err = validate_code("import os.path as p\n", false).unwrap_err();
        assert_eq!(err.to_string(), "Line 1: import 'os.path' is not allowed");
        assert!(validate_code("import urllib.request\n", true).is_ok());
    }

    #[test]
    fn parenthesized_from_import_spanning_lines() {
        let src = "from typing import (\n    Any,\n    Dict,\n)\nimport shutil\n";
        let err = validate_code(src, false).unwrap_err();
        assert_eq!(err.to_string(), "Line 5: import 'shutil' is not allowed");
    }

    #[test]
    fn relative_imports() {
        assert!(validate_code("from . import helpers\n", false).is_ok());
        let err = validate_code("from .helpers import thing\n", false).unwrap_err();
        assert_eq!(err.to_string(), "Line 1: import 'helpers' is not allowed");
    }

    #[test]
    fn yield_from_is_not_an_import() {
        let src = "def gen():\n    yield from range(3)\n";
        assert!(validate_code(src, false).is_ok());
    }

    #[test]
    fn method_named_like_primitive_is_still_a_call() {
        let err = validate_code("db.exec(query)\n", false).unwrap_err();
        assert_eq!(err.to_string(), "Line 1: call to 'exec()' is forbidden");
    }

    #[test]
    fn defining_or_referencing_is_not_calling() {
        assert!(validate_code("def compile(x):\n    return x\nf = eval\n", false).is_ok());
    }

    #[test]
    fn strings_and_comments_are_ignored() {
        let src = "# import os\nnote = \"eval(1) and x.__class__\"\n";
        assert!(validate_code(src, false).is_ok());
    }

    #[test]
    fn fstring_expressions_are_checked() {
        let err = validate_code("msg = f\"{__import__('os')}\"\n", false).unwrap_err();
        assert_eq!(err.to_string(), "Line 1: call to '__import__()' is forbidden");
    }

    #[test]
    fn syntax_error_fails_fast() {
        let err = validate_code("import os\nx = (1,\n", false).unwrap_err();
        assert!(matches!(err, ValidationError::Syntax(_)));
        assert!(err.violations().is_empty());
        assert!(err.to_string().starts_with("Syntax error on line "));
    }

    #[test]
    fn plain_syntax_error_is_reported_with_its_line() {
        let err = validate_code("import json\nx = = 1\n", false).unwrap_err();
        match err {
            ValidationError::Syntax(SyntaxError { line, ref message }) => {
                assert_eq!(line, 2);
                assert!(!message.is_empty());
            }
            other => panic!("expected a syntax error, got {other:?}"),
        }
    }

    #[test]
    fn parenthesized_callee_is_still_a_call() {
        let err = validate_code("x = (eval)('1+1')\n", false).unwrap_err();
        assert_eq!(err.to_string(), "Line 1: call to 'eval()' is forbidden");
    }

    #[test]
    fn nested_escape_inside_call_arguments() {
        let src = "print(len(().__class__.__bases__))\n";
        let err = validate_code(src, true).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Line 1: access to '__class__' is forbidden; Line 1: access to '__bases__' is forbidden"
        );
    }

    #[test]
    fn modern_syntax_is_accepted() {
        let src = "import re\n\ndef f(x):\n    if (n := len(x)) > 2:\n        return n\n    match x:\n        case [a, *_]:\n            return a\n        case _:\n            return None\n";
        assert_eq!(validate_code(src, false), Ok(()));
    }

    #[test]
    fn multiline_reports_correct_lines() {
        let src = "\"\"\"docstring\nspanning\nlines\"\"\"\nimport pickle\n";
        let err = validate_code(src, false).unwrap_err();
        assert_eq!(err.to_string(), "Line 4: import 'pickle' is not allowed");
    }
}
