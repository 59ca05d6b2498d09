//! Operation keys used to bucket traces in a report.
//!
//! The key is `"# {operation name}\n{signature}"` where the signature is the
//! operation text with insignificant whitespace, commas and comments removed.
//! Anonymous operations use `-` as their name.

/// Strip insignificant whitespace, commas and comments from a GraphQL
/// document. A single space is kept only between two adjacent words (names,
/// numbers, strings); punctuators are never padded. String literals are
/// copied verbatim.
pub fn strip_whitespace(query: &str) -> String {
    let mut out = String::with_capacity(query.len());
    let mut chars = query.char_indices().peekable();
    // Whether a separator was skipped since the last emitted token
    let mut pending_space = false;
    // Whether the last emitted token was a word
    let mut last_word = false;

    while let Some((i, c)) = chars.next() {
        match c {
            c if c.is_whitespace() || c == ',' || c == '\u{feff}' => pending_space = true,
            '#' => {
                while let Some((_, c)) = chars.peek() {
                    if *c == '\n' || *c == '\r' {
                        break;
                    }
                    chars.next();
                }
                pending_space = true;
            }
            '"' => {
                if last_word && pending_space {
                    out.push(' ');
                }
                let end = string_end(query, i);
                out.push_str(&query[i..end]);
                while let Some((j, _)) = chars.peek() {
                    if *j >= end {
                        break;
                    }
                    chars.next();
                }
                pending_space = false;
                last_word = true;
            }
            c if is_word_char(c) => {
                if last_word && pending_space {
                    out.push(' ');
                }
                out.push(c);
                while let Some((_, c)) = chars.peek() {
                    if !is_word_char(*c) {
                        break;
                    }
                    out.push(*c);
                    chars.next();
                }
                pending_space = false;
                last_word = true;
            }
            c => {
                out.push(c);
                pending_space = false;
                last_word = false;
            }
        }
    }
    out
}

/// Byte offset one past the end of the string literal starting at `start`.
fn string_end(query: &str, start: usize) -> usize {
    let rest = &query[start..];
    if rest.starts_with("\"\"\"") {
        let body = &rest[3..];
        let mut offset = 0;
        while let Some(pos) = body[offset..].find("\"\"\"") {
            let abs = offset + pos;
            if body[..abs].ends_with('\\') {
                offset = abs + 3;
                continue;
            }
            return start + 3 + abs + 3;
        }
        return query.len();
    }

    let mut escaped = false;
    for (i, c) in rest.char_indices().skip(1) {
        match c {
            '\\' if !escaped => escaped = true,
            '"' if !escaped => return start + i + 1,
            '\n' => return start + i,
            _ => escaped = false,
        }
    }
    query.len()
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '-' || c == '+'
}

/// Name of the first operation declared in `query`, if it is named.
/// Fragment definitions before it are skipped.
pub fn operation_name_from_source(query: &str) -> Option<String> {
    let stripped = strip_whitespace(query);
    // Nesting of braces, parens and brackets
    let mut depth = 0usize;
    let mut in_fragment = false;
    let mut i = 0;

    while let Some(c) = stripped[i..].chars().next() {
        match c {
            '"' => {
                i = string_end(&stripped, i);
                continue;
            }
            '{' | '(' | '[' => {
                // Selection set of a shorthand query
                if c == '{' && depth == 0 && !in_fragment {
                    return None;
                }
                depth += 1;
            }
            '}' | ')' | ']' => {
                depth = depth.saturating_sub(1);
                if c == '}' && depth == 0 {
                    in_fragment = false;
                }
            }
            c if depth == 0 && is_word_char(c) => {
                let end = stripped[i..]
                    .find(|c: char| !is_word_char(c))
                    .map_or(stripped.len(), |n| i + n);
                match &stripped[i..end] {
                    "fragment" => in_fragment = true,
                    "query" | "mutation" | "subscription" if !in_fragment => {
                        // A named operation keeps exactly one space before its name
                        let name: String = stripped[end..]
                            .strip_prefix(' ')?
                            .chars()
                            .take_while(|c| c.is_alphanumeric() || *c == '_')
                            .collect();
                        return (!name.is_empty()).then_some(name);
                    }
                    _ => {}
                }
                i = end;
                continue;
            }
            _ => {}
        }
        i += c.len_utf8();
    }
    None
}

/// Composite key under which an operation's traces are reported.
pub fn operation_key(operation_name: Option<&str>, query: &str) -> String {
    let name = operation_name.filter(|n| !n.is_empty()).unwrap_or("-");
    format!("# {}\n{}", name, strip_whitespace(query))
}
