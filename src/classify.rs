//! Text-versus-binary policy for resources opened in a tab.

/// Extensions always shown as text, whatever their byte content.
pub const WELL_KNOWN_TEXT_EXTENSIONS: &[&str] = &[
    ".java", ".xml", ".rss", ".project", ".classpath", ".h", ".c", ".cpp", ".yaml", ".yml",
    ".ini", ".sql", ".js", ".php", ".php5", ".phtml", ".py", ".pyw", ".rb", ".pl", ".sh",
    ".bat", ".cmd", ".ps1", ".css", ".scss", ".less", ".html", ".htm", ".xhtml", ".jsp",
    ".json", ".md", ".txt", ".csv", ".properties", ".mf", ".MF", ".sf", ".SF", ".groovy", ".gradle", ".kt",
    ".kts", ".scala", ".clj", ".cfg", ".conf", ".xsd", ".dtd", ".xsl", ".xslt", ".tld",
    ".svg", ".vm", ".ftl", ".mustache", ".proto", ".list", ".factories", ".imports",
];

/// Text decoded from a resource, one `\n` after every line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedText {
    pub content: String,
    /// Bytes that are `0` or outside ASCII, counted over every line.
    pub non_printable: usize,
}

/// Splits `bytes` into lines (`\n`, `\r\n`, or `\r`) and re-joins them with `\n`.
pub fn decode_lines(bytes: &[u8]) -> DecodedText {
    let text = String::from_utf8_lossy(bytes);
    let mut content = String::with_capacity(text.len() + 1);
    let mut non_printable = 0usize;

    let mut rest: &str = &text;
    while !rest.is_empty() {
        let (line, next) = match rest.find(['\n', '\r']) {
            Some(i) => {
                let skip = if rest[i..].starts_with("\r\n") { 2 } else { 1 };
                (&rest[..i], &rest[i + skip..])
            }
            None => (rest, ""),
        };
        non_printable += line.bytes().filter(|b| *b == 0 || *b >= 0x80).count();
        content.push_str(line);
        content.push('\n');
        rest = next;
    }

    DecodedText {
        content,
        non_printable,
    }
}

/// `"."` plus whatever follows the last dot of `name`; just `"."` without one.
pub fn extension_of(name: &str) -> String {
    match name.rfind('.') {
        Some(i) => name[i..].to_string(),
        None => ".".to_string(),
    }
}

/// Text when the extension is allow-listed, or when fewer than a fifth of the
/// content's UTF-16 units are matched by non-printable bytes.
pub fn is_text(display_name: &str, decoded: &DecodedText) -> bool {
    let extension = extension_of(display_name);
    if WELL_KNOWN_TEXT_EXTENSIONS.contains(&extension.as_str()) {
        return true;
    }
    let length = decoded.content.encode_utf16().count();
    decoded.non_printable < length / 5
}
