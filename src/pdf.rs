//! Optional HTML-to-PDF rendering via an external renderer (wkhtmltopdf or
//! compatible), wall-clock bounded and always best-effort.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::process::Command;
use tracing::debug;

const RENDER_TIMEOUT: Duration = Duration::from_secs(120);

/// Resolved once at startup; the sync engine never probes mid-run.
pub fn renderer_available(renderer: Option<&Path>) -> bool {
    renderer.map(|p| p.is_file()).unwrap_or(false)
}

/// Render `message.html` in an entry directory to `message.pdf`. The child
/// is killed when the ceiling expires; the caller logs and keeps the entry
/// without a PDF.
pub async fn render_pdf(renderer: &Path, entry_dir: &Path) -> Result<()> {
    let html = entry_dir.join(crate::message::HTML_FILE);
    if !html.exists() {
        return Ok(());
    }

    let mut child = Command::new(renderer)
        .arg(crate::message::HTML_FILE)
        .arg("message.pdf")
        .current_dir(entry_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("spawning pdf renderer {}", renderer.display()))?;

    match tokio::time::timeout(RENDER_TIMEOUT, child.wait()).await {
        Ok(Ok(status)) if status.success() => {
            debug!(dir = %entry_dir.display(), "PDF rendered");
            Ok(())
        }
        Ok(Ok(status)) => bail!("pdf renderer exited with {status}"),
        Ok(Err(e)) => Err(e).context("waiting for pdf renderer"),
        Err(_) => {
            child.kill().await.ok();
            bail!(
                "pdf renderer exceeded {}s ceiling",
                RENDER_TIMEOUT.as_secs()
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn availability_requires_an_existing_file() {
        assert!(!renderer_available(None));
        assert!(!renderer_available(Some(Path::new("/nonexistent/wkhtmltopdf"))));
        let file = tempfile::NamedTempFile::new().unwrap();
        assert!(renderer_available(Some(file.path())));
    }

    #[tokio::test]
    async fn missing_html_is_a_quiet_no_op() {
        let dir = tempfile::tempdir().unwrap();
        // renderer path never runs because there is nothing to render
        render_pdf(Path::new("/nonexistent/wkhtmltopdf"), dir.path())
            .await
            .unwrap();
    }
}
