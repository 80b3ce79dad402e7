//! Header decoding and address extraction.

use mailparse::{MailAddr, MailHeaderMap, ParsedMail, SingleInfo};
use once_cell::sync::Lazy;
use regex::Regex;

// RFC 2822 addr-spec, transliterated from the perlfaq9 grammar: atoms and
// quoted strings for the local part, dot-atoms and domain literals for the
// domain.
static ADDR_SPEC_RE: Lazy<Regex> = Lazy::new(|| {
    let atom = r"[a-zA-Z0-9_!#$%&'*+/=?^`{}~|-]+";
    let dot_atom = format!(r"{atom}(?:\.{atom})*");
    let quoted = r#""(?:\\[^\r\n]|[^\\"])*""#;
    let local = format!("(?:{dot_atom}|{quoted})");
    let domain_lit = r"\[(?:\\\S|[\x21-\x5a\x5e-\x7e])*\]";
    let domain = format!("(?:{dot_atom}|{domain_lit})");
    Regex::new(&format!("^{local}@{domain}$")).unwrap()
});

/// Collapse RFC 2047 encoded-words into one decoded string. Never fails: a
/// header that cannot be parsed comes back verbatim.
pub fn decode_header(text: &str) -> String {
    let synthetic = format!("X-Decode: {text}\r\n\r\n");
    match mailparse::parse_mail(synthetic.as_bytes()) {
        Ok(parsed) => parsed
            .headers
            .get_first_value("X-Decode")
            .unwrap_or_else(|| text.to_string()),
        Err(_) => text.to_string(),
    }
}

/// Decoded value of the first occurrence of a header.
pub fn header_value(parsed: &ParsedMail, name: &str) -> Option<String> {
    parsed
        .headers
        .get_first_header(name)
        .map(|h| decode_header(&String::from_utf8_lossy(h.get_value_raw())))
}

/// Parse an address-list header into ordered (display name, address) pairs.
/// An address failing strict RFC 2822 validation is replaced with an empty
/// string, keeping its position next to the display name; a bare address
/// doubles as its own display name.
pub fn extract_addresses(parsed: &ParsedMail, header: &str) -> Vec<(String, String)> {
    let values = parsed.headers.get_all_values(header);
    if values.is_empty() {
        return Vec::new();
    }
    let joined = values.join(", ");
    let Ok(list) = mailparse::addrparse(&joined) else {
        return Vec::new();
    };
    let mut pairs = Vec::new();
    for addr in list.iter() {
        match addr {
            MailAddr::Single(info) => pairs.push(pair_from(info)),
            MailAddr::Group(group) => pairs.extend(group.addrs.iter().map(pair_from)),
        }
    }
    pairs
}

fn pair_from(info: &SingleInfo) -> (String, String) {
    let name = match &info.display_name {
        Some(n) if !n.is_empty() => n.clone(),
        _ => info.addr.clone(),
    };
    let addr = if info.addr.is_ascii() && ADDR_SPEC_RE.is_match(&info.addr) {
        info.addr.clone()
    } else {
        String::new()
    };
    (name, addr)
}

/// Render pairs as a single comma-separated header-style string for metadata.
pub fn format_address_list(pairs: &[(String, String)]) -> String {
    pairs
        .iter()
        .map(|(name, addr)| {
            if addr.is_empty() || name == addr {
                if name.is_empty() {
                    addr.clone()
                } else {
                    name.clone()
                }
            } else {
                format!("{name} <{addr}>")
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> ParsedMail<'_> {
        mailparse::parse_mail(raw.as_bytes()).unwrap()
    }

    #[test]
    fn decodes_base64_encoded_word() {
        assert_eq!(decode_header("=?UTF-8?B?aGVsbG8=?="), "hello");
    }

    #[test]
    fn decodes_quoted_printable_encoded_word() {
        assert_eq!(decode_header("=?iso-8859-1?Q?caf=E9?="), "caf\u{e9}");
    }

    #[test]
    fn plain_header_passes_through() {
        assert_eq!(decode_header("just a subject"), "just a subject");
    }

    #[test]
    fn extracts_name_address_pairs_in_order() {
        let mail = parse(
            "To: Alice Example <alice@example.com>, bob@example.com\r\n\r\n",
        );
        let pairs = extract_addresses(&mail, "To");
        assert_eq!(
            pairs,
            vec![
                ("Alice Example".to_string(), "alice@example.com".to_string()),
                // bare address doubles as its own display name
                ("bob@example.com".to_string(), "bob@example.com".to_string()),
            ]
        );
    }

    #[test]
    fn invalid_address_is_blanked_but_keeps_position() {
        let mail = parse("To: Eve <eve@@bad>, Carol <carol@example.com>\r\n\r\n");
        let pairs = extract_addresses(&mail, "To");
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0], ("Eve".to_string(), String::new()));
        assert_eq!(
            pairs[1],
            ("Carol".to_string(), "carol@example.com".to_string())
        );
    }

    #[test]
    fn missing_header_yields_empty_list() {
        let mail = parse("Subject: x\r\n\r\n");
        assert!(extract_addresses(&mail, "Cc").is_empty());
    }

    #[test]
    fn address_list_formatting() {
        let pairs = vec![
            ("Alice".to_string(), "alice@example.com".to_string()),
            ("bob@example.com".to_string(), "bob@example.com".to_string()),
            ("Eve".to_string(), String::new()),
        ];
        assert_eq!(
            format_address_list(&pairs),
            "Alice <alice@example.com>, bob@example.com, Eve"
        );
    }
}
