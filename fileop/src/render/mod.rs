//! Thin wrappers around external HTML renderers.
//!
//! Both renderers take the page URL from the command, run the renderer binary against it, and
//! return the rendered file.  The source file of the request is only checked for type and size;
//! the renderer fetches the page itself.
use crate::operation::SourceFile;
use crate::Result;
use sha2::{Digest, Sha256};
use snafu::prelude::*;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tracing::{debug, info, warn};

mod image;
mod pdf;

pub use image::{Html2Image, Html2ImageDescriptor, ImageFormat};
pub use pdf::{Html2Pdf, Html2PdfDescriptor, Orientation};

/// Fail unless the source is a text document within `limit` bytes
pub(crate) fn check_text_source(operation: &'static str, src: &SourceFile, limit: u64) -> Result<()> {
    ensure!(
        src.mime_type.starts_with("text/"),
        crate::error::UnsupportedMimeTypeSnafu {
            operation,
            mime_type: &src.mime_type,
            expected: "text/*"
        }
    );
    ensure!(
        src.size <= limit,
        crate::error::SourceTooLargeSnafu {
            operation,
            size: src.size,
            limit
        }
    );

    Ok(())
}

/// Create an empty temp file for the renderer to write to, and return its path.
///
/// The file is not deleted automatically; ownership passes to whoever consumes the output.
pub(crate) fn temp_output_path(operation: &'static str, url: &str, extension: &str) -> Result<PathBuf> {
    let digest = format!("{:x}", Sha256::digest(url.as_bytes()));

    tempfile::Builder::new()
        .prefix(&format!("{}.", &digest[..16]))
        .suffix(&format!(".result.{extension}"))
        .tempfile()
        .and_then(|file| file.into_temp_path().keep().map_err(|e| e.error))
        .with_context(|_| crate::error::CreateTempFileSnafu { operation })
}

/// Run `program` with `args` followed by the output path, and check that it produced output.
///
/// On failure the output file is removed.
pub(crate) async fn run_renderer(program: &str, args: &[String], output: &Path) -> Result<()> {
    let result = run_renderer_inner(program, args, output).await;

    if result.is_err() {
        if let Err(e) = tokio::fs::remove_file(output).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(err = ?e, output = %output.display(), "Error removing renderer output");
            }
        }
    }

    result
}

async fn run_renderer_inner(program: &str, args: &[String], output: &Path) -> Result<()> {
    info!(program, ?args, output = %output.display(), "Running renderer");

    let result = tokio::process::Command::new(program)
        .args(args)
        .arg(output)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .with_context(|_| crate::error::RendererSpawnSnafu { program })?;

    let stderr = String::from_utf8_lossy(&result.stderr);
    if !stderr.trim().is_empty() {
        info!(program, stderr = %stderr.trim(), "Renderer wrote to stderr");
    }

    ensure!(
        result.status.success(),
        crate::error::RendererFailedSnafu {
            program,
            status: result.status
        }
    );

    let len = tokio::fs::metadata(output)
        .await
        .map(|metadata| metadata.len())
        .unwrap_or(0);
    ensure!(len > 0, crate::error::RendererNoOutputSnafu { program });

    debug!(len, "Renderer finished");

    Ok(())
}
