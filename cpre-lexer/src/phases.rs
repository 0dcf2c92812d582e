//! The translation phases that transform source text before tokenization.

/// Digraph and trigraph spellings and their single-character replacements.
/// Applied over the whole buffer, string literals included.
const DI_TRI_GRAPHS: [(&str, &str); 14] = [
    // Digraphs
    ("<:", "["),
    (":>", "]"),
    ("<%", "{"),
    ("%>", "}"),
    ("%:", "#"),
    // Trigraphs
    ("??=", "#"),
    ("??/", "\\"),
    ("??'", "^"),
    ("??(", "["),
    ("??)", "]"),
    ("??!", "|"),
    ("??<", "{"),
    ("??>", "}"),
    ("??-", "~"),
];

/// Runs the pre-tokenization translation phases over `source`:
/// digraph/trigraph replacement, backslash-newline splicing, and (unless `keep_comments` is set)
/// comment stripping. The returned buffer always ends with a newline.
pub fn apply(source: &str, keep_comments: bool) -> String {
    let mut text = normalize_newlines(source);
    text = replace_di_trigraphs(&text);
    text = join_backslash(&text);
    if !keep_comments {
        text = strip_comments(&text);
    }
    if !text.ends_with('\n') {
        text.push('\n');
    }
    text
}

/// Folds CRLF line endings so the later phases only ever see `\n`.
fn normalize_newlines(text: &str) -> String {
    text.replace("\r\n", "\n")
}

fn replace_di_trigraphs(text: &str) -> String {
    let mut text = text.to_owned();
    for (spelling, replacement) in DI_TRI_GRAPHS {
        if text.contains(spelling) {
            text = text.replace(spelling, replacement);
        }
    }
    text
}

/// Splices physical lines: a backslash immediately followed by a newline is removed.
fn join_backslash(text: &str) -> String {
    text.replace("\\\n", "")
}

/// Replaces each comment with a single space. Block comments may span lines; their newlines are
/// consumed along with the comment. An unterminated block comment is left in place for the lexer
/// to stumble over.
fn strip_comments(text: &str) -> String {
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'/' && i + 1 < bytes.len() {
            match bytes[i + 1] {
                b'*' => {
                    if let Some(end) = block_comment_end(bytes, i + 2) {
                        out.push(b' ');
                        i = end;
                        continue;
                    }
                }
                b'/' => {
                    let mut j = i + 2;
                    while j < bytes.len() && bytes[j] != b'\n' {
                        j += 1;
                    }
                    out.push(b' ');
                    i = j;
                    continue;
                }
                _ => {}
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8(out).expect("stripping ASCII comments cannot break UTF-8")
}

/// Finds the first `*/` terminator at or after `from`, and returns the position one past it,
/// extended over any directly following `/` characters.
fn block_comment_end(bytes: &[u8], from: usize) -> Option<usize> {
    let mut i = from;
    while i + 1 < bytes.len() {
        if bytes[i] == b'*' && bytes[i + 1] == b'/' {
            let mut end = i + 2;
            while end < bytes.len() && bytes[end] == b'/' {
                end += 1;
            }
            return Some(end);
        }
        i += 1;
    }
    None
}
