/// Marker that starts a two-character formatting code in server output.
const FORMAT_MARKER: char = '§';

/// Remove `§x` colour and style codes from server output.
pub fn strip_formatting(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();

    while let Some(c) = chars.next() {
        if c == FORMAT_MARKER {
            chars.next();
        } else {
            out.push(c);
        }
    }

    out
}

/// Join a host and port, bracketing bare IPv6 addresses.
pub fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}
