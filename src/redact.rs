use std::borrow::Cow;

const JWT_PREFIX: &str = "eyJ";

fn is_token_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '_' || ch == '-' || ch == '.' || ch == '='
}

/// Replaces JWT-shaped tokens (base64url header starting with `eyJ`) with `REDACTED`.
pub fn redact_jwt(input: &str) -> Cow<'_, str> {
    if !input.contains(JWT_PREFIX) {
        return Cow::Borrowed(input);
    }

    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(idx) = rest.find(JWT_PREFIX) {
        let boundary = rest[..idx]
            .chars()
            .next_back()
            .is_none_or(|c| !is_token_char(c));
        out.push_str(&rest[..idx]);
        rest = &rest[idx..];

        let consumed: usize = rest
            .chars()
            .take_while(|c| is_token_char(*c))
            .map(char::len_utf8)
            .sum();
        let candidate = &rest[..consumed];
        // header.payload at minimum
        if boundary && candidate.matches('.').count() >= 1 {
            out.push_str("REDACTED");
        } else {
            out.push_str(candidate);
        }
        rest = &rest[consumed..];
    }
    out.push_str(rest);

    if out == input {
        Cow::Borrowed(input)
    } else {
        Cow::Owned(out)
    }
}

fn find_ascii_case_insensitive(haystack: &str, needle: &str) -> Option<usize> {
    let hay = haystack.as_bytes();
    let nee = needle.as_bytes();
    if nee.is_empty() {
        return Some(0);
    }
    if nee.len() > hay.len() {
        return None;
    }
    (0..=hay.len() - nee.len()).find(|&i| hay[i..i + nee.len()].eq_ignore_ascii_case(nee))
}

fn redact_after_marker(text: String, marker: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text.as_str();
    loop {
        let Some(idx) = find_ascii_case_insensitive(rest, marker) else {
            out.push_str(rest);
            break;
        };
        let end = idx + marker.len();
        out.push_str(&rest[..end]);
        rest = &rest[end..];

        let token_len: usize = rest
            .chars()
            .take_while(|c| !c.is_whitespace() && *c != '"' && *c != ',')
            .map(char::len_utf8)
            .sum();
        if token_len > 0 {
            out.push_str("REDACTED");
        }
        rest = &rest[token_len..];
    }
    out
}

/// Scrubs bearer credentials and token-shaped strings before text reaches a log line.
pub fn redact_secrets(input: &str) -> Cow<'_, str> {
    let mut value = redact_after_marker(input.to_string(), "Bearer ");
    for key in ["access_token=", "refresh_token="] {
        value = redact_after_marker(value, key);
    }
    let value = match redact_jwt(&value) {
        Cow::Borrowed(_) => value,
        Cow::Owned(s) => s,
    };

    if value == input {
        Cow::Borrowed(input)
    } else {
        Cow::Owned(value)
    }
}
