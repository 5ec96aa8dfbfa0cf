use percent_encoding::percent_decode_str;

/// Look up a query parameter the way a browser's `URLSearchParams` would.
///
/// Accepts a full URL or a bare query string (with or without the leading
/// `?`). The first occurrence of `name` wins.
pub fn get_param<T: AsRef<str>, U: AsRef<str>>(url_or_query: T, name: U) -> Option<String> {
    let query = query_part(url_or_query.as_ref());
    for pair in query.split('&').filter(|pair| !pair.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        if form_decode(key) == name.as_ref() {
            return Some(form_decode(value));
        }
    }
    None
}

fn query_part(url_or_query: &str) -> &str {
    let without_fragment = match url_or_query.split_once('#') {
        Some((before, _)) => before,
        None => url_or_query,
    };
    match without_fragment.split_once('?') {
        Some((_, query)) => query,
        None => without_fragment,
    }
}

fn form_decode(value: &str) -> String {
    let spaces_restored = value.replace('+', " ");
    percent_decode_str(&spaces_restored)
        .decode_utf8_lossy()
        .into_owned()
}

/// Left-pad a number with zeros to two digits, e.g. for block filenames.
pub fn pad2(n: u32) -> String {
    format!("{n:02}")
}
