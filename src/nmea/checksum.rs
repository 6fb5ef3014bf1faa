/// XOR of all bytes
pub fn checksum(body: &[u8]) -> u8 {
    body.iter().fold(0, |acc, b| acc ^ b)
}

fn hex_value(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'A'..=b'F' => Some(c - b'A' + 10),
        b'a'..=b'f' => Some(c - b'a' + 10),
        _ => None,
    }
}

/// Splits `$body*XX` into body and transmitted checksum. Trailing
/// whitespace after the checksum is ignored.
fn split(line: &str) -> Option<(&str, u8)> {
    let line = line.trim_end();
    let line = line.strip_prefix('$').or_else(|| line.strip_prefix('!'))?;
    let star = line.rfind('*')?;
    let (body, tail) = (&line[..star], &line.as_bytes()[star + 1..]);
    if tail.len() != 2 {
        return None;
    }
    let value = hex_value(tail[0])? << 4 | hex_value(tail[1])?;
    Some((body, value))
}

/// Checks the `*XX` checksum of a complete sentence. Sentences without a
/// checksum are rejected.
pub fn verify(line: &str) -> bool {
    split(line).is_some_and(|(body, value)| checksum(body.as_bytes()) == value)
}

/// Returns the part between `$` and `*` of a sentence whose checksum is
/// correct
pub fn strip(line: &str) -> Option<&str> {
    split(line)
        .filter(|(body, value)| checksum(body.as_bytes()) == *value)
        .map(|(body, _)| body)
}

/// Builds `$<body>*XX\r\n`
pub fn format_sentence(body: &str) -> String {
    format!("${}*{:02X}\r\n", body, checksum(body.as_bytes()))
}
