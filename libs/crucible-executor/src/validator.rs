//! Expression Validator - Invocation-Expression Safety Check
//!
//! **Core Responsibility:**
//! Reject invocation expressions that could reach the filesystem, network,
//! process table, or interpreter introspection machinery before they are
//! embedded into generated source.
//!
//! **Why This Exists:**
//! The expression comes from server-controlled problem files, not the end
//! user, so this is defense-in-depth against a compromised or malformed
//! catalog entry. The primary security boundary is the process isolation
//! in the engine, not this check.

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// Substrings that must never appear in an invocation expression.
const FORBIDDEN_TOKENS: &[&str] = &[
    "__",          // dunder access
    "import ",     // import statements
    "open(",       // file access
    "eval(",
    "exec(",
    "compile(",
    "getattr",
    "setattr",
    "delattr",
    "globals",
    "locals",
    "vars(",
    "dir(",
    "os.",
    "sys.",
    "subprocess",
    "shutil",
    "pathlib",
    "socket",
    "http",
    "urllib",
    "\\n",         // escaped newline smuggled as text
    ";",           // statement separator
];

// Starts with an identifier, then only characters typical of calls,
// indexing, and literals.
static SAFE_CALL_SHAPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^[a-zA-Z_][a-zA-Z0-9_]*[\w\s()\[\]'",=.*:_-]*$"#)
        .expect("safe-call regex is valid")
});

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Unsafe function_call expression: contains '{0}'")]
    ForbiddenToken(&'static str),
    #[error("Unsafe function_call expression: failed pattern validation")]
    PatternMismatch,
}

/// Validate a `function_call` expression. Pure check, no side effects;
/// on failure the error names the offending token.
pub fn validate(expression: &str) -> Result<&str, ValidationError> {
    if expression.contains('\n') {
        return Err(ValidationError::ForbiddenToken("\\n"));
    }
    for token in FORBIDDEN_TOKENS {
        if expression.contains(token) {
            return Err(ValidationError::ForbiddenToken(token));
        }
    }
    if !SAFE_CALL_SHAPE.is_match(expression) {
        return Err(ValidationError::PatternMismatch);
    }
    Ok(expression)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_calls() {
        assert_eq!(validate("add(**test_input)").unwrap(), "add(**test_input)");
        assert_eq!(validate("twoSum(**test_input)").unwrap(), "twoSum(**test_input)");
        assert!(validate("solve(test_input['x'])").is_ok());
    }

    #[test]
    fn accepts_sorted_wrappers() {
        // Order-normalizing wrappers used for order-insensitive problems.
        assert!(validate("sorted(twoSum(**test_input))").is_ok());
        assert!(validate("sorted(topKFrequent(**test_input))").is_ok());
        assert!(validate("sorted([sorted(x) for x in threeSum(**test_input)])").is_ok());
        assert!(validate("sorted([sorted(x) for x in groupAnagrams(**test_input)])").is_ok());
    }

    #[test]
    fn accepts_helper_conversion_chains() {
        assert!(validate("list_node_to_list(reverseList(list_node(test_input['head'])))").is_ok());
        assert!(validate("tree_node_to_list(invertTree(tree_node(test_input['root'])))").is_ok());
    }

    #[test]
    fn rejects_import() {
        let err = validate("import os; os.system('rm -rf /')").unwrap_err();
        assert!(err.to_string().contains("import"));
    }

    #[test]
    fn rejects_dunder() {
        let err = validate("__import__('os').system('ls')").unwrap_err();
        assert_eq!(err, ValidationError::ForbiddenToken("__"));
    }

    #[test]
    fn rejects_eval_exec_compile() {
        assert!(validate("eval('bad')").is_err());
        assert!(validate("exec('bad')").is_err());
        assert!(validate("compile('bad', '<s>', 'eval')").is_err());
    }

    #[test]
    fn rejects_file_and_process_access() {
        assert!(matches!(
            validate("open('/etc/passwd')"),
            Err(ValidationError::ForbiddenToken("open("))
        ));
        assert!(matches!(
            validate("os.system('ls')"),
            Err(ValidationError::ForbiddenToken("os."))
        ));
        assert!(matches!(
            validate("subprocess.run('ls')"),
            Err(ValidationError::ForbiddenToken("subprocess"))
        ));
    }

    #[test]
    fn rejects_introspection() {
        assert!(validate("getattr(f, 'x')()").is_err());
        assert!(validate("globals()").is_err());
        assert!(validate("vars(module)").is_err());
        assert!(validate("dir(module)").is_err());
    }

    #[test]
    fn rejects_statement_separators() {
        let err = validate("add(1, 2); evil()").unwrap_err();
        assert_eq!(err, ValidationError::ForbiddenToken(";"));
    }

    #[test]
    fn rejects_newlines_raw_and_escaped() {
        assert_eq!(
            validate("add(1, 2)\nprint(1)").unwrap_err(),
            ValidationError::ForbiddenToken("\\n")
        );
        assert_eq!(
            validate(r"add(1, 2)\nfoo()").unwrap_err(),
            ValidationError::ForbiddenToken("\\n")
        );
        // Denylist tokens hit in order even when an escaped newline smuggles
        // the payload onto one line.
        assert!(validate(r"add(1, 2)\nimport os").is_err());
    }

    #[test]
    fn rejects_non_identifier_start() {
        assert_eq!(validate("(lambda: 1)()").unwrap_err(), ValidationError::PatternMismatch);
        assert_eq!(validate("1 + 2").unwrap_err(), ValidationError::PatternMismatch);
        assert_eq!(validate("").unwrap_err(), ValidationError::PatternMismatch);
    }
}
