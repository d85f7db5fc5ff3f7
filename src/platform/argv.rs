/// Command line splitting and quoting with Windows argv rules
///
/// Creation takes a single command-line string everywhere. Backends that
/// need an argument vector split it here, and re-join argument vectors read
/// back from the OS so a launched command line round-trips.

use std::iter;
use std::mem;

/// Splits a command line the way `CommandLineToArgvW` does
pub fn split_command_line(line: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_arg = false;
    let mut quoted = false;
    let mut backslashes = 0usize;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                backslashes += 1;
                in_arg = true;
            }
            '"' => {
                // 2n backslashes + quote -> n backslashes, toggles quoting
                // 2n+1 backslashes + quote -> n backslashes + literal quote
                current.extend(iter::repeat('\\').take(backslashes / 2));
                if backslashes % 2 == 1 {
                    current.push('"');
                } else if quoted && chars.peek() == Some(&'"') {
                    current.push('"');
                    chars.next();
                } else {
                    quoted = !quoted;
                }
                backslashes = 0;
                in_arg = true;
            }
            ' ' | '\t' if !quoted => {
                current.extend(iter::repeat('\\').take(backslashes));
                backslashes = 0;
                if in_arg {
                    args.push(mem::take(&mut current));
                    in_arg = false;
                }
            }
            _ => {
                current.extend(iter::repeat('\\').take(backslashes));
                backslashes = 0;
                current.push(c);
                in_arg = true;
            }
        }
    }

    current.extend(iter::repeat('\\').take(backslashes));
    if in_arg {
        args.push(current);
    }
    args
}

fn quote_arg(arg: &str, out: &mut String) {
    let needs_quotes = arg.is_empty() || arg.chars().any(|c| c == ' ' || c == '\t' || c == '"');
    if !needs_quotes {
        out.push_str(arg);
        return;
    }

    out.push('"');
    let mut backslashes = 0usize;
    for c in arg.chars() {
        if c == '\\' {
            backslashes += 1;
        } else {
            if c == '"' {
                out.extend(iter::repeat('\\').take(backslashes + 1));
            }
            backslashes = 0;
        }
        out.push(c);
    }
    out.extend(iter::repeat('\\').take(backslashes));
    out.push('"');
}

/// Joins arguments into one command line, quoting where needed
pub fn join_command_line<S: AsRef<str>>(args: &[S]) -> String {
    let mut line = String::new();
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            line.push(' ');
        }
        quote_arg(arg.as_ref(), &mut line);
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_simple() {
        assert_eq!(split_command_line("sleep 30"), vec!["sleep", "30"]);
        assert_eq!(split_command_line("  a\t b  "), vec!["a", "b"]);
        assert!(split_command_line("   ").is_empty());
    }

    #[test]
    fn test_split_quoted() {
        assert_eq!(
            split_command_line(r#"sh -c "sleep 30 & sleep 31; wait""#),
            vec!["sh", "-c", "sleep 30 & sleep 31; wait"]
        );
        assert_eq!(split_command_line(r#"a "" b"#), vec!["a", "", "b"]);
        assert_eq!(split_command_line(r#""a""b""#), vec![r#"a"b"#]);
    }

    #[test]
    fn test_split_backslashes() {
        assert_eq!(split_command_line(r#"a\\\"b"#), vec![r#"a\"b"#]);
        assert_eq!(split_command_line(r#""a\\" b"#), vec![r#"a\"#, "b"]);
        assert_eq!(split_command_line(r"C:\dir\file.exe"), vec![r"C:\dir\file.exe"]);
    }

    #[test]
    fn test_join_quotes_when_needed() {
        assert_eq!(join_command_line(&["sleep", "30"]), "sleep 30");
        assert_eq!(join_command_line(&["echo", "a b", ""]), r#"echo "a b" """#);
        assert_eq!(join_command_line(&[r#"say "hi""#]), r#""say \"hi\"""#);
        assert_eq!(join_command_line(&[r"dir\ x\"]), r#""dir\ x\\""#);
    }

    #[test]
    fn test_join_inverts_split() {
        let line = r#"sh -c "sleep 30 & sleep 31; wait""#;
        assert_eq!(join_command_line(&split_command_line(line)), line);
    }
}
