/// Shell-like splitting of single-string compile commands.

/// Split `command` into arguments.
///
/// Single and double quotes open/close regions in which spaces do not split.
/// A backslash escapes a following quote, space, or backslash; before any
/// other character it is kept literally so Windows paths survive. Empty
/// tokens are dropped.
pub fn split_whitespace(command: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut escape = false;

    for ch in command.chars() {
        if escape {
            escape = false;
            if matches!(ch, '"' | '\'' | ' ' | '\t' | '\\') {
                current.push(ch);
                continue;
            }
            current.push('\\');
        }

        if ch == '\\' {
            escape = true;
            continue;
        }

        match quote {
            Some(q) if ch == q => quote = None,
            Some(_) => current.push(ch),
            None => match ch {
                '"' | '\'' => quote = Some(ch),
                ' ' | '\t' => {
                    if !current.is_empty() {
                        tokens.push(std::mem::take(&mut current));
                    }
                }
                _ => current.push(ch),
            },
        }
    }

    if escape {
        current.push('\\');
    }
    if !current.is_empty() {
        tokens.push(current);
    }

    tokens
}
