//! Archive layout: `<root>/<year>/<message-folder>/` with the directory's
//! existence doubling as the dedup marker. Entries are staged in a hidden
//! sibling directory and renamed into place so a crash mid-write never leaves
//! a claimed-but-incomplete entry behind.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use sha3::{Digest, Sha3_256};

static YEAR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d{1,2}\s\w{3}\s(\d{4})").unwrap());

/// 4-digit year from a Date header ("1-2 digit day, 3-letter month, 4-digit
/// year"), or the literal `None` sentinel.
pub fn year_component(date_header: Option<&str>) -> String {
    date_header
        .and_then(|d| YEAR_RE.captures(d))
        .map(|c| c[1].to_string())
        .unwrap_or_else(|| "None".to_string())
}

/// Strip every character outside `[A-Za-z0-9_.()\-\s]` from a Message-Id and
/// trim; `None` when nothing legal remains.
pub fn sanitize_message_id(message_id: &str) -> Option<String> {
    let kept: String = message_id
        .chars()
        .filter(|c| {
            c.is_ascii_alphanumeric()
                || c.is_whitespace()
                || matches!(c, '_' | '.' | '(' | ')' | '-')
        })
        .collect();
    let kept = kept.trim().to_string();
    if kept.is_empty() {
        None
    } else {
        Some(kept)
    }
}

/// Lowercase hex SHA-3/256 of the raw message bytes. Names identifier-less
/// messages without collisions and within filesystem limits.
pub fn content_hash(raw: &[u8]) -> String {
    let mut hasher = Sha3_256::new();
    hasher.update(raw);
    format!("{:x}", hasher.finalize())
}

/// Directory name for one message: sanitized Message-Id when one survives
/// sanitization, otherwise the content hash of the raw bytes.
pub fn entry_name(message_id: Option<&str>, raw: &[u8]) -> String {
    message_id
        .and_then(sanitize_message_id)
        .unwrap_or_else(|| content_hash(raw))
}

/// Final destination for one message's artifacts.
pub fn entry_dir(
    local_root: &Path,
    date_header: Option<&str>,
    message_id: Option<&str>,
    raw: &[u8],
) -> PathBuf {
    local_root
        .join(year_component(date_header))
        .join(entry_name(message_id, raw))
}

/// Server LIST names sometimes arrive quoted; strip one surrounding pair for
/// display and selection.
pub fn normalize_server_folder_name(name: &str) -> &str {
    let name = name.trim();
    name.strip_prefix('"')
        .and_then(|n| n.strip_suffix('"'))
        .unwrap_or(name)
}

/// Fallback folder spelling for servers using the opposite hierarchy
/// separator convention. Never the canonical stored form.
pub fn swap_folder_separators(name: &str) -> String {
    name.replace('.', "/")
}

/// Staged archive entry. Artifacts are written into a hidden temp directory
/// and become visible only on [`publish`](EntryWriter::publish).
pub struct EntryWriter {
    staging: PathBuf,
    final_dir: PathBuf,
    published: bool,
}

impl EntryWriter {
    /// `None` when the entry already exists (the dedup fast path).
    pub fn stage(final_dir: &Path) -> Result<Option<Self>> {
        if final_dir.exists() {
            return Ok(None);
        }
        let parent = final_dir
            .parent()
            .context("entry directory has no parent")?;
        let name = final_dir
            .file_name()
            .and_then(|n| n.to_str())
            .context("entry directory has no name")?;
        let staging = parent.join(format!(".tmp-{name}"));
        if staging.exists() {
            // Leftover from an interrupted run; start clean.
            fs::remove_dir_all(&staging)
                .with_context(|| format!("clearing stale staging dir {}", staging.display()))?;
        }
        fs::create_dir_all(&staging)
            .with_context(|| format!("creating staging dir {}", staging.display()))?;
        Ok(Some(Self {
            staging,
            final_dir: final_dir.to_path_buf(),
            published: false,
        }))
    }

    /// Directory to populate with artifacts.
    pub fn dir(&self) -> &Path {
        &self.staging
    }

    pub fn final_dir(&self) -> &Path {
        &self.final_dir
    }

    /// Move the staged entry into place. Returns `false` when the final
    /// directory appeared concurrently; the rename, not a separate existence
    /// check, is the authoritative dedup signal.
    pub fn publish(mut self) -> Result<bool> {
        match fs::rename(&self.staging, &self.final_dir) {
            Ok(()) => {
                self.published = true;
                Ok(true)
            }
            Err(e)
                if e.kind() == io::ErrorKind::AlreadyExists
                    || self.final_dir.exists() =>
            {
                fs::remove_dir_all(&self.staging).ok();
                self.published = true;
                Ok(false)
            }
            Err(e) => Err(e).with_context(|| {
                format!(
                    "publishing archive entry {} -> {}",
                    self.staging.display(),
                    self.final_dir.display()
                )
            }),
        }
    }
}

impl Drop for EntryWriter {
    fn drop(&mut self) {
        if !self.published {
            fs::remove_dir_all(&self.staging).ok();
        }
    }
}
