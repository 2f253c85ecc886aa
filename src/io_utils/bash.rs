//! Composing shell text. The remote transport only understands shell
//! text, thus directory changes and output redirection are expressed
//! as such, with all interpolated pieces quoted.

use std::{borrow::Cow, path::Path};

use itertools::Itertools;

const CHARS_NOT_NEEDING_QUOTING: &str = "_:.-+,/=@[]^";

/// Quote `s` for bash if it contains anything beyond a conservative
/// set of safe characters.
pub fn bash_string_literal(s: &str) -> Cow<'_, str> {
    if !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || CHARS_NOT_NEEDING_QUOTING.contains(c))
    {
        s.into()
    } else {
        let mut ss = String::with_capacity(s.len() + 2);
        ss.push('\'');
        for c in s.chars() {
            if c == '\'' {
                ss.push_str("'\\''");
            } else {
                ss.push(c);
            }
        }
        ss.push('\'');
        ss.into()
    }
}

pub fn bash_string_from_cmd(cmd: impl IntoIterator<Item = impl AsRef<str>>) -> String {
    cmd.into_iter()
        .map(|s| bash_string_literal(s.as_ref()).to_string())
        .join(" ")
}

/// `cd <dir>; <command>`; `command` is already shell text and is not
/// quoted.
pub fn bash_cd_then(dir: &str, command: &str) -> String {
    format!("cd {}; {command}", bash_string_literal(dir))
}

/// Append a stdout redirection to `path` to the shell text `command`.
pub fn bash_redirect_stdout(command: &str, path: &Path) -> String {
    format!(
        "{command} > {}",
        bash_string_literal(&path.to_string_lossy())
    )
}
