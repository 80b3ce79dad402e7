//! Message decomposition: one pass over the MIME part tree producing an
//! immutable [`DecomposedMessage`], plus the artifact writers that turn it
//! into an archive entry (raw copy, text, HTML, attachments, metadata).

pub mod headers;

use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use chardetng::EncodingDetector;
use chrono::{DateTime, Utc};
use encoding_rs::Encoding;
use flate2::write::GzEncoder;
use flate2::Compression;
use mailparse::ParsedMail;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

static BODY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<body[^>]*>(.+)</body>").unwrap());

// Day-month-year shape every parseable Date header carries.
static DATE_SHAPE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\d{1,2}\s+[a-z]{3}\s+\d{2,4}").unwrap());

pub const RAW_FILE: &str = "raw.eml.gz";
pub const TEXT_FILE: &str = "message.txt";
pub const HTML_FILE: &str = "message.html";
pub const METADATA_FILE: &str = "metadata.json";
pub const ATTACHMENTS_DIR: &str = "attachments";

/// One non-inline file carried by the message.
#[derive(Debug, Clone)]
pub struct AttachmentPart {
    pub filename: String,
    pub payload: Vec<u8>,
}

/// Immutable product of one decomposition pass. Every later step (artifact
/// writing, metadata, PDF) consumes this value; nothing re-walks the tree.
#[derive(Debug, Clone)]
pub struct DecomposedMessage {
    pub message_id: Option<String>,
    pub subject: String,
    pub from: Vec<(String, String)>,
    pub to: Vec<(String, String)>,
    pub cc: Vec<(String, String)>,
    pub date_header: Option<String>,
    /// Decoded text/plain bodies, in encounter order.
    pub text: Vec<String>,
    /// Decoded text/html bodies, in encounter order.
    pub html: Vec<String>,
    pub attachments: Vec<AttachmentPart>,
    /// (content-id, sanitized filename) for `cid:` rewriting. The parts also
    /// live in `attachments`; embedding does not remove them.
    pub embed_images: Vec<(String, String)>,
}

impl DecomposedMessage {
    pub fn with_text(&self) -> bool {
        !self.text.is_empty()
    }

    pub fn with_html(&self) -> bool {
        !self.html.is_empty()
    }
}

/// Walk the part tree with an explicit stack (deeply nested MIME must not
/// recurse) and classify every leaf.
pub fn decompose(parsed: &ParsedMail) -> Result<DecomposedMessage> {
    let mut msg = DecomposedMessage {
        message_id: headers::header_value(parsed, "Message-Id").map(|v| v.trim().to_string()),
        subject: headers::header_value(parsed, "Subject").unwrap_or_default(),
        from: headers::extract_addresses(parsed, "From"),
        to: headers::extract_addresses(parsed, "To"),
        cc: headers::extract_addresses(parsed, "Cc"),
        date_header: headers::header_value(parsed, "Date"),
        text: Vec::new(),
        html: Vec::new(),
        attachments: Vec::new(),
        embed_images: Vec::new(),
    };

    let mut counter = 1u32;
    let mut stack: Vec<&ParsedMail> = vec![parsed];
    while let Some(part) = stack.pop() {
        // multipart/* are just containers
        if part.ctype.mimetype.starts_with("multipart/") {
            for sub in part.subparts.iter().rev() {
                stack.push(sub);
            }
            continue;
        }

        let declared_name = part_filename(part);
        if declared_name.is_none() {
            if part.ctype.mimetype == "text/plain" {
                msg.text.push(decode_part_text(part)?);
                continue;
            }
            if part.ctype.mimetype == "text/html" {
                msg.html.push(decode_part_text(part)?);
                continue;
            }
        }

        let filename = sanitize_filename(
            &declared_name
                .unwrap_or_else(|| format!("part-{counter:03}{}", extension_for(&part.ctype.mimetype))),
        );

        if let Some(content_id) = headers::header_value(part, "Content-Id") {
            let content_id = content_id
                .trim()
                .trim_start_matches('<')
                .trim_end_matches('>')
                .to_string();
            if !content_id.is_empty() {
                msg.embed_images.push((content_id, filename.clone()));
            }
        }

        counter += 1;
        let payload = part
            .get_body_raw()
            .with_context(|| format!("decoding payload of attachment {filename}"))?;
        msg.attachments.push(AttachmentPart { filename, payload });
    }

    Ok(msg)
}

fn part_filename(part: &ParsedMail) -> Option<String> {
    let disposition = part.get_content_disposition();
    disposition
        .params
        .get("filename")
        .or_else(|| part.ctype.params.get("name"))
        .map(|s| s.to_string())
}

/// Best-guess extension for a synthesized attachment name, `.bin` when the
/// content type maps to nothing.
fn extension_for(mimetype: &str) -> String {
    mime_guess::get_mime_extensions_str(mimetype)
        .and_then(|exts| exts.first())
        .map(|ext| format!(".{ext}"))
        .unwrap_or_else(|| ".bin".to_string())
}

/// Keep alphanumerics, space, `.`, `_`, `-`; drop everything else.
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '.' | '_' | '-'))
        .collect::<String>()
        .trim_end()
        .to_string()
}

/// Decode a text-ish part: transfer decoding via mailparse, then charset
/// decoding via the declared label or a sniffed encoding. Lossy, never fails
/// on bad byte sequences.
fn decode_part_text(part: &ParsedMail) -> Result<String> {
    let raw = part
        .get_body_raw()
        .with_context(|| format!("decoding {} payload", part.ctype.mimetype))?;
    let declared = part.ctype.params.get("charset").map(|s| s.as_str());
    Ok(decode_bytes(&raw, declared))
}

fn decode_bytes(raw: &[u8], declared_charset: Option<&str>) -> String {
    let encoding = declared_charset
        .and_then(|label| Encoding::for_label(label.as_bytes()))
        .unwrap_or_else(|| {
            let mut detector = EncodingDetector::new();
            detector.feed(raw, true);
            detector.guess(None, true)
        });
    let (decoded, _, _) = encoding.decode(raw);
    decoded.into_owned()
}

/// Gzipped verbatim copy of the fetched bytes. Written first so the raw
/// payload survives even when later derivation steps fail.
pub fn write_raw(dir: &Path, raw: &[u8]) -> Result<()> {
    let file = fs::File::create(dir.join(RAW_FILE))
        .with_context(|| format!("creating {RAW_FILE} in {}", dir.display()))?;
    let mut encoder = GzEncoder::new(file, Compression::default());
    encoder.write_all(raw).context("compressing raw message")?;
    encoder.finish().context("finishing gzip stream")?;
    Ok(())
}

/// Write message.txt, message.html, attachments/ and metadata.json for one
/// decomposed message.
pub fn write_artifacts(dir: &Path, msg: &DecomposedMessage) -> Result<()> {
    if msg.with_text() {
        fs::write(dir.join(TEXT_FILE), msg.text.concat())
            .with_context(|| format!("writing {TEXT_FILE}"))?;
    }

    if msg.with_html() {
        fs::write(dir.join(HTML_FILE), render_html(msg))
            .with_context(|| format!("writing {HTML_FILE}"))?;
    }

    if !msg.attachments.is_empty() {
        let attdir = dir.join(ATTACHMENTS_DIR);
        fs::create_dir_all(&attdir)
            .with_context(|| format!("creating {}", attdir.display()))?;
        for part in &msg.attachments {
            // no zero-byte files for empty payloads
            if part.payload.is_empty() {
                continue;
            }
            fs::write(attdir.join(&part.filename), &part.payload)
                .with_context(|| format!("writing attachment {}", part.filename))?;
        }
    }

    write_metadata(dir, msg)?;
    Ok(())
}

/// Inner HTML: concatenated html parts reduced to the `<body>` region when
/// one is present.
fn html_inner(msg: &DecomposedMessage) -> String {
    let content = msg.html.concat();
    match BODY_RE.captures(&content) {
        Some(caps) => caps[1].to_string(),
        None => content,
    }
}

/// Standalone HTML document with `cid:` references rewritten to relative
/// attachment paths.
pub fn render_html(msg: &DecomposedMessage) -> String {
    let mut content = html_inner(msg);
    for (content_id, filename) in &msg.embed_images {
        let pattern = format!(
            r#"(?is)src=["']cid:{}["']"#,
            regex::escape(content_id)
        );
        if let Ok(re) = Regex::new(&pattern) {
            let replacement = format!(r#"src="{ATTACHMENTS_DIR}/{filename}""#);
            content = re
                .replace_all(&content, regex::NoExpand(&replacement))
                .into_owned();
        }
    }

    let author = msg
        .from
        .first()
        .map(|(name, _)| name.as_str())
        .unwrap_or_default();
    format!(
        r#"<!doctype html>
<html>
<head>
    <meta http-equiv="Content-Type" content="text/html; charset=utf-8" />
    <meta name="author" content="{}">
    <title>{}</title>
</head>
<body>
{}
</body>
</html>"#,
        escape_html(author),
        escape_html(&msg.subject),
        content
    )
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Two representations re-derived from the Date header through one parse:
/// a normalized RFC 2822 string and a compact UTC stamp. An unparseable
/// header is kept verbatim with no UTC form.
pub fn normalize_date(header: &str) -> (Option<String>, Option<String>) {
    // dateparse is lenient enough to hand back the epoch for arbitrary text,
    // so only a header with a day-month-year shape is trusted to parse.
    if !DATE_SHAPE_RE.is_match(header) {
        return (Some(header.to_string()), None);
    }
    match mailparse::dateparse(header) {
        Ok(epoch) => match DateTime::<Utc>::from_timestamp(epoch, 0) {
            Some(dt) => (
                Some(dt.to_rfc2822()),
                Some(dt.format("%Y%m%dT%H%M%SZ").to_string()),
            ),
            None => (Some(header.to_string()), None),
        },
        Err(_) => (Some(header.to_string()), None),
    }
}

#[derive(Serialize)]
struct Metadata<'a> {
    #[serde(rename = "Id")]
    id: Option<&'a str>,
    #[serde(rename = "Subject")]
    subject: &'a str,
    #[serde(rename = "From")]
    from: String,
    #[serde(rename = "To")]
    to: String,
    #[serde(rename = "Cc")]
    cc: String,
    #[serde(rename = "Date")]
    date: Option<String>,
    #[serde(rename = "Utc")]
    utc: Option<String>,
    #[serde(rename = "Attachments")]
    attachments: Vec<&'a str>,
    #[serde(rename = "WithHtml")]
    with_html: bool,
    #[serde(rename = "WithText")]
    with_text: bool,
    #[serde(rename = "Body")]
    body: String,
}

/// Plaintext rendition for the metadata body: concatenated text parts, or
/// the HTML with tags stripped when no text part exists.
pub fn body_text(msg: &DecomposedMessage) -> String {
    if msg.with_text() {
        msg.text.concat()
    } else if msg.with_html() {
        let inner = html_inner(msg);
        html2text::from_read(inner.as_bytes(), 80).unwrap_or_default()
    } else {
        String::new()
    }
}

fn write_metadata(dir: &Path, msg: &DecomposedMessage) -> Result<()> {
    // A missing Date header is tolerated with null Date/Utc rather than
    // suppressing the whole metadata file.
    let (date, utc) = match &msg.date_header {
        Some(header) => normalize_date(header),
        None => (None, None),
    };
    let doc = Metadata {
        id: msg.message_id.as_deref(),
        subject: &msg.subject,
        from: headers::format_address_list(&msg.from),
        to: headers::format_address_list(&msg.to),
        cc: headers::format_address_list(&msg.cc),
        date,
        utc,
        attachments: msg
            .attachments
            .iter()
            .map(|a| a.filename.as_str())
            .collect(),
        with_html: msg.with_html(),
        with_text: msg.with_text(),
        body: body_text(msg),
    };
    let json = serde_json::to_string_pretty(&doc).context("serializing metadata")?;
    fs::write(dir.join(METADATA_FILE), json)
        .with_context(|| format!("writing {METADATA_FILE}"))?;
    Ok(())
}
