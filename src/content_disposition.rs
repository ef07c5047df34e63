use http::header::{self, HeaderMap};

#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct ContentDisposition {
    pub(crate) field_name: Option<String>,
    pub(crate) file_name: Option<String>,
}

impl ContentDisposition {
    pub(crate) fn parse(headers: &HeaderMap) -> ContentDisposition {
        headers
            .get(header::CONTENT_DISPOSITION)
            .map(|val| Self::parse_value(&String::from_utf8_lossy(val.as_bytes())))
            .unwrap_or_default()
    }

    fn parse_value(value: &str) -> ContentDisposition {
        let mut disposition = ContentDisposition::default();
        let mut extended_file_name = None;

        // skip the disposition type, `form-data` in practice.
        let mut rest = match value.find(';') {
            Some(idx) => &value[idx + 1..],
            None => return disposition,
        };

        while let Some((key, val, tail)) = next_param(rest) {
            match key.to_ascii_lowercase().as_str() {
                "name" if disposition.field_name.is_none() => disposition.field_name = Some(val),
                "filename" if disposition.file_name.is_none() => disposition.file_name = Some(val),
                "filename*" => extended_file_name = decode_ext_value(&val),
                _ => {}
            }
            rest = tail;
        }

        if extended_file_name.is_some() {
            disposition.file_name = extended_file_name;
        }

        disposition
    }
}

/// Splits off the next `key=value` parameter. Quoted values may contain `;`
/// and backslash escapes.
fn next_param(input: &str) -> Option<(&str, String, &str)> {
    let input = input.trim_start_matches(|c: char| c == ';' || c.is_whitespace());
    if input.is_empty() {
        return None;
    }

    let eq = input.find('=');
    let semi = input.find(';');
    let eq = match (eq, semi) {
        (Some(eq), Some(semi)) if semi < eq => return next_param(&input[semi..]),
        (Some(eq), _) => eq,
        (None, _) => return None,
    };

    let key = input[..eq].trim();
    let after = input[eq + 1..].trim_start();

    if let Some(quoted) = after.strip_prefix('"') {
        let mut val = String::new();
        let mut chars = quoted.char_indices();
        while let Some((idx, ch)) = chars.next() {
            match ch {
                '\\' => {
                    if let Some((_, escaped)) = chars.next() {
                        val.push(escaped);
                    }
                }
                '"' => return Some((key, val, &quoted[idx + 1..])),
                _ => val.push(ch),
            }
        }
        // unterminated quote: take the rest as the value.
        Some((key, val, ""))
    } else {
        let end = after.find(';').unwrap_or(after.len());
        Some((key, after[..end].trim().to_owned(), &after[end..]))
    }
}

/// Decodes an RFC 5987 `charset'lang'percent-encoded` value. Only UTF-8 and
/// ISO-8859-1 are accepted.
fn decode_ext_value(value: &str) -> Option<String> {
    let mut parts = value.splitn(3, '\'');
    let charset = parts.next()?;
    let _lang = parts.next()?;
    let encoded = parts.next()?;

    let mut bytes = Vec::with_capacity(encoded.len());
    let raw = encoded.as_bytes();
    let mut i = 0;
    while i < raw.len() {
        if raw[i] == b'%' && i + 2 < raw.len() {
            let hex = std::str::from_utf8(&raw[i + 1..i + 3]).ok()?;
            bytes.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            bytes.push(raw[i]);
            i += 1;
        }
    }

    match charset.to_ascii_lowercase().as_str() {
        "utf-8" => String::from_utf8(bytes).ok(),
        "iso-8859-1" => Some(bytes.iter().map(|&b| b as char).collect()),
        _ => None,
    }
}
