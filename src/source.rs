use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::Context;

const ACCEPTED_TYPES: [&str; 3] = ["video/mp4", "video/quicktime", "video/webm"];

/// An uploaded recording, checked against the container allow-list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct MediaSource {
    path: PathBuf,
    mime_type: &'static str,
}

impl MediaSource {
    pub(crate) fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let metadata = std::fs::metadata(path)
            .with_context(|| format!("Cannot read {}", path.display()))?;
        if !metadata.is_file() {
            anyhow::bail!("{} is not a file", path.display());
        }

        let sniffed = infer::get_from_path(path)
            .with_context(|| format!("Cannot read {}", path.display()))?
            .map(|kind| kind.mime_type());
        let mime_type = resolve_mime(sniffed, path).ok_or_else(|| {
            anyhow::anyhow!(
                "Unsupported container {} for {} (expected one of {})",
                sniffed.unwrap_or("unknown"),
                path.display(),
                ACCEPTED_TYPES.join(", ")
            )
        })?;

        Ok(Self {
            path: path.to_owned(),
            mime_type,
        })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn mime_type(&self) -> &'static str {
        self.mime_type
    }
}

impl fmt::Display for MediaSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.path.display(), self.mime_type())
    }
}

fn resolve_mime(sniffed: Option<&'static str>, path: &Path) -> Option<&'static str> {
    // M4V is an MP4 with an Apple brand.
    let sniffed = match sniffed {
        Some("video/x-m4v") => Some("video/mp4"),
        other => other,
    };
    if let Some(mime) = sniffed {
        if let Some(accepted) = ACCEPTED_TYPES.iter().copied().find(|accepted| *accepted == mime) {
            return Some(accepted);
        }
    }
    let webm_extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("webm"));
    match sniffed {
        None | Some("video/x-matroska") if webm_extension => Some("video/webm"),
        _ => None,
    }
}
