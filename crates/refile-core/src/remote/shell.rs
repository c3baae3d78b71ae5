/// Quote `s` for a POSIX shell.
///
/// Plain words pass through untouched; anything else is wrapped in single
/// quotes with embedded quotes written as `'\''`.
pub fn quote(s: &str) -> String {
    if !s.is_empty()
        && s.chars().all(|c| {
            c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '/' | '.' | ':' | '=' | ',' | '+')
        })
    {
        return s.to_owned();
    }

    let mut result = String::with_capacity(s.len() + 2);
    result.push('\'');
    for ch in s.chars() {
        if ch == '\'' {
            result.push_str("'\\''");
        } else {
            result.push(ch);
        }
    }
    result.push('\'');
    result
}
