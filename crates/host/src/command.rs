//! Shell command construction for provisioning scripts
//!
//! Scripts are always run as `bash <script> <args...>` inside a shell line.
//! Every argument is quoted so that its bytes reach the script verbatim.

use crate::platform::{to_posix_path, Platform};
use std::path::{Path, PathBuf};

/// Quote for a POSIX shell using single quotes.
///
/// Embedded `'` becomes `'\''` (close, escaped quote, reopen).
pub fn quote_posix_single(arg: &str) -> String {
    format!("'{}'", arg.replace('\'', r"'\''"))
}

/// Quote for bash using double quotes.
///
/// Escapes `\`, `"`, `$` and `` ` `` so nothing inside is expanded.
pub fn quote_posix_double(arg: &str) -> String {
    let mut quoted = String::with_capacity(arg.len() + 2);
    quoted.push('"');
    for c in arg.chars() {
        if matches!(c, '\\' | '"' | '$' | '`') {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

/// A fully prepared invocation: `<program> -c <line>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptCommand {
    pub program: PathBuf,
    pub line: String,
}

impl ScriptCommand {
    /// Build the invocation for `script` on `platform`.
    ///
    /// `shell` is the located bash on Windows and is ignored on Unix, where
    /// `sh` drives the line.
    pub fn build(platform: Platform, shell: Option<&Path>, script: &Path, args: &[String]) -> Self {
        match platform {
            Platform::Unix => {
                let quoted: Vec<String> = args.iter().map(|a| quote_posix_single(a)).collect();
                Self {
                    program: PathBuf::from("sh"),
                    line: join_line(&quote_posix_single(&script.to_string_lossy()), &quoted),
                }
            }
            Platform::Windows => {
                let quoted: Vec<String> = args.iter().map(|a| quote_posix_double(a)).collect();
                Self {
                    program: shell.map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("bash")),
                    line: join_line(&quote_posix_double(&to_posix_path(script)), &quoted),
                }
            }
        }
    }

    /// Human-readable form for logs.
    pub fn display(&self) -> String {
        format!("{} -c {}", self.program.display(), self.line)
    }
}

fn join_line(script: &str, quoted_args: &[String]) -> String {
    let mut line = format!("exec bash {}", script);
    for arg in quoted_args {
        line.push(' ');
        line.push_str(arg);
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_quote_escaping() {
        assert_eq!(quote_posix_single("web1"), "'web1'");
        assert_eq!(quote_posix_single("it's"), r"'it'\''s'");
        assert_eq!(quote_posix_single("a; rm -rf /"), "'a; rm -rf /'");
        assert_eq!(quote_posix_single(""), "''");
    }

    #[test]
    fn test_double_quote_escaping() {
        assert_eq!(quote_posix_double(r#"say "hi""#), r#""say \"hi\"""#);
        assert_eq!(quote_posix_double("$HOME"), r#""\$HOME""#);
        assert_eq!(quote_posix_double("`id`"), r#""\`id\`""#);
        assert_eq!(quote_posix_double(r"C:\tmp"), r#""C:\\tmp""#);
    }

    #[test]
    fn test_unix_command_line() {
        let cmd = ScriptCommand::build(
            Platform::Unix,
            None,
            Path::new("/srv/scripts/create_vm.sh"),
            &["web1".to_string(), "Ubuntu".to_string(), "2".to_string()],
        );
        assert_eq!(cmd.program, PathBuf::from("sh"));
        assert_eq!(cmd.line, "exec bash '/srv/scripts/create_vm.sh' 'web1' 'Ubuntu' '2'");
    }

    #[test]
    fn test_windows_command_line() {
        let cmd = ScriptCommand::build(
            Platform::Windows,
            Some(Path::new(r"C:\Program Files\Git\bin\bash.exe")),
            Path::new(r"C:\app\scripts\manage_users.sh"),
            &["web1".to_string(), "p$ss\"word".to_string()],
        );
        assert_eq!(cmd.program, PathBuf::from(r"C:\Program Files\Git\bin\bash.exe"));
        assert_eq!(
            cmd.line,
            r#"exec bash "/c/app/scripts/manage_users.sh" "web1" "p\$ss\"word""#
        );
    }
}
