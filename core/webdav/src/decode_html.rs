//! HTML entity decoding for names reported by WebDAV servers.

fn named_entity(name: &str) -> Option<char> {
    let c = match name {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        // Servers use it for plain spaces in names.
        "nbsp" => ' ',
        _ => return None,
    };
    Some(c)
}

fn numeric_entity(body: &str) -> Option<char> {
    let code = match body.strip_prefix(['x', 'X']) {
        Some(hex) => u32::from_str_radix(hex, 16).ok()?,
        None => body.parse::<u32>().ok()?,
    };
    char::from_u32(code)
}

/// Replace named (`&amp;`, `&lt;`, ...) and numeric (`&#65;`, `&#x41;`)
/// entities. Unknown or malformed entities are kept verbatim.
pub fn decode_html_entities(text: &str) -> String {
    let mut output = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find('&') {
        output.push_str(&rest[..start]);
        let candidate = &rest[start + 1..];

        let decoded = candidate.find(';').and_then(|end| {
            let body = &candidate[..end];
            let c = match body.strip_prefix('#') {
                Some(number) => numeric_entity(number),
                None => named_entity(body),
            }?;
            Some((c, end))
        });

        match decoded {
            Some((c, end)) => {
                output.push(c);
                rest = &candidate[end + 1..];
            }
            None => {
                output.push('&');
                rest = candidate;
            }
        }
    }

    output.push_str(rest);
    output
}
