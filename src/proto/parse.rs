//! Frame parsing, bit-exact with `irc_client.py`'s `__parse_read_buffer`.

/// Drains every complete `\r?\n`-terminated line out of `buffer`, leaving
/// any partial trailing line in place.
pub fn drain_lines(buffer: &mut String) -> Vec<String> {
    let mut lines = Vec::new();
    while let Some(pos) = buffer.find('\n') {
        let mut line: String = buffer.drain(..=pos).collect();
        line.pop();
        if line.ends_with('\r') {
            line.pop();
        }
        lines.push(line);
    }
    lines
}

/// Splits one line into `(COMMAND, args)`. The command is uppercased; the
/// remainder is split on the first space unless it starts with `:` (a
/// single trailing argument), otherwise on spaces with an optional `" :"`
/// separator introducing a trailing argument that may itself contain
/// spaces.
pub fn parse_line(line: &str) -> Option<(String, Vec<String>)> {
    if line.is_empty() {
        return None;
    }
    let mut split = line.splitn(2, ' ');
    let command = split.next().unwrap_or("").to_uppercase();
    if command.is_empty() {
        return None;
    }
    let rest = split.next();
    let args = match rest {
        None => Vec::new(),
        Some(rest) if rest.starts_with(':') => vec![rest[1..].to_string()],
        Some(rest) => match rest.split_once(" :") {
            Some((head, trailing)) => {
                let mut args: Vec<String> = head.split(' ').filter(|s| !s.is_empty()).map(String::from).collect();
                args.push(trailing.to_string());
                args
            }
            None => rest.split(' ').filter(|s| !s.is_empty()).map(String::from).collect(),
        },
    };
    Some((command, args))
}
