//! Shell commands for file operations inside the sandbox.
//!
//! Every operation becomes one `/bin/sh -c <script>` invocation. Paths and
//! file content are embedded in the script as single-quoted words.
//!
//! # Quoting rule
//!
//! Inside single quotes the shell interprets nothing, so the only character
//! that needs care is the single quote itself. Each `'` becomes `'\''`:
//! close the quote, emit an escaped quote, reopen the quote. The result,
//! wrapped in `'...'`, is read back by the shell as the original bytes.

use std::path::Path;

const SHELL: &str = "/bin/sh";

/// Largest single exec argument Linux accepts (`MAX_ARG_STRLEN`), counting
/// the terminating NUL.
pub const MAX_ARG_STRLEN: usize = 128 * 1024;

/// Returns true if every argument of `command` fits the kernel's limit.
#[must_use]
pub fn fits_exec_argument(command: &[String]) -> bool {
    command.iter().all(|arg| arg.len() < MAX_ARG_STRLEN)
}

/// Replaces each `'` with `'\''`.
#[must_use]
pub fn escape_single_quotes(text: &str) -> String {
    text.replace('\'', r"'\''")
}

/// Wraps `text` in single quotes after escaping embedded quotes.
#[must_use]
pub fn shell_quote(text: &str) -> String {
    format!("'{}'", escape_single_quotes(text))
}

/// Resolves a node path under the sandbox mount.
///
/// Relative paths are taken from the node's root, like absolute ones.
#[must_use]
pub fn node_path(mount: &str, path: &str) -> String {
    let mount = mount.trim_end_matches('/');
    if path.is_empty() {
        format!("{mount}/")
    } else if path.starts_with('/') {
        format!("{mount}{path}")
    } else {
        format!("{mount}/{path}")
    }
}

/// Directory that must exist before `dest` can be written, if any.
///
/// `None` for files directly under the node root.
#[must_use]
pub fn parent_dir(dest: &str) -> Option<&str> {
    let parent = Path::new(dest).parent()?.to_str()?;
    match parent {
        "" | "." | "/" => None,
        dir => Some(dir),
    }
}

/// Wraps a script into the argument vector sent to exec.
#[must_use]
pub fn sh(script: String) -> Vec<String> {
    vec![String::from(SHELL), String::from("-c"), script]
}

/// Long-format listing of a node directory.
#[must_use]
pub fn list_command(mount: &str, path: &str) -> Vec<String> {
    sh(format!("ls -la {}", shell_quote(&node_path(mount, path))))
}

/// Prints a node file to stdout.
#[must_use]
pub fn read_command(mount: &str, path: &str) -> Vec<String> {
    sh(format!("cat {}", shell_quote(&node_path(mount, path))))
}

/// Creates a node directory and its parents.
#[must_use]
pub fn mkdir_command(mount: &str, dir: &str) -> Vec<String> {
    sh(format!("mkdir -p {}", shell_quote(&node_path(mount, dir))))
}

/// Writes `content` to a node file, byte for byte.
///
/// `printf '%s'` adds no trailing newline and does not interpret escapes in
/// its argument.
#[must_use]
pub fn write_command(mount: &str, path: &str, content: &str) -> Vec<String> {
    sh(format!(
        "printf '%s' {} > {}",
        shell_quote(content),
        shell_quote(&node_path(mount, path))
    ))
}
