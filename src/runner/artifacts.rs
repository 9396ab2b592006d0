//! Persisting attachments under a run's artifact directory.

use std::path::{Path, PathBuf};

use crate::mcp_client::{Attachment, MessageEvent};

use super::errors::RunnerError;

/// Replace every character outside `[A-Za-z0-9._-]` with `_`.
///
/// An empty result becomes `"artifact"`.
pub fn sanitize_name(name: &str) -> String {
    let safe: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if safe.is_empty() {
        "artifact".to_string()
    } else {
        safe
    }
}

/// Conventional extensions, chosen over alphabetical order when a MIME type
/// maps to several (`text/plain` also maps to `asm`, `text/html` to `htm`).
const PREFERRED_EXTENSIONS: &[&str] = &[
    "txt", "html", "jpg", "json", "csv", "xml", "md", "js", "mp3", "mp4", "tiff",
];

/// Append an extension guessed from `mime_type` unless `name` already has one.
pub fn ensure_extension(name: &str, mime_type: &str) -> String {
    if Path::new(name).extension().is_some() {
        return name.to_string();
    }

    let essence = mime_type.split(';').next().unwrap_or_default().trim();
    let ext = mime_guess::get_mime_extensions_str(essence).and_then(|exts| {
        PREFERRED_EXTENSIONS
            .iter()
            .find(|p| exts.contains(*p))
            .or_else(|| exts.first())
            .copied()
    });

    format!("{name}.{}", ext.unwrap_or("bin"))
}

/// Writes attachments into `<run>/screenshots` (images) or `<run>/artifacts`.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    screenshots_dir: PathBuf,
    attachments_dir: PathBuf,
}

impl ArtifactStore {
    /// Create the store and its directories under `run_dir`.
    pub fn create(run_dir: &Path) -> Result<Self, RunnerError> {
        let store = Self {
            screenshots_dir: run_dir.join("screenshots"),
            attachments_dir: run_dir.join("artifacts"),
        };
        std::fs::create_dir_all(&store.screenshots_dir)?;
        std::fs::create_dir_all(&store.attachments_dir)?;
        Ok(store)
    }

    /// Write `attachment` to a fresh file and record its path on it.
    ///
    /// Name collisions get `_1`, `_2`, … inserted before the extension.
    pub fn save(&self, attachment: &mut Attachment) -> Result<PathBuf, RunnerError> {
        let dir = if attachment.is_image() {
            &self.screenshots_dir
        } else {
            &self.attachments_dir
        };

        let filename = ensure_extension(&sanitize_name(&attachment.name), &attachment.mime_type);
        let mut destination = dir.join(&filename);

        let stem = Path::new(&filename)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let ext = Path::new(&filename)
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();

        let mut counter = 1;
        while destination.exists() {
            destination = dir.join(format!("{stem}_{counter}{ext}"));
            counter += 1;
        }

        std::fs::write(&destination, &attachment.data)?;
        tracing::debug!(
            name = %attachment.name,
            path = %destination.display(),
            bytes = attachment.data.len(),
            "saved attachment"
        );
        attachment.path = Some(destination.clone());
        Ok(destination)
    }
}

/// Point the event's binary chunks at the files `saved` was written to.
///
/// Each attachment is linked back to the chunk it was extracted from, so
/// chunks the extractor skipped stay unlinked. Chunks that already carry a
/// path are left alone.
pub fn link_chunk_paths(event: &mut MessageEvent, saved: &[Attachment]) {
    for attachment in saved {
        let Some(path) = &attachment.path else {
            continue;
        };
        let Some(binary) = event
            .content
            .get_mut(attachment.chunk_index)
            .and_then(|c| c.binary_mut())
        else {
            tracing::debug!(name = %attachment.name, "attachment has no matching chunk");
            continue;
        };
        if binary.path.is_some() {
            continue;
        }

        binary.path = Some(path.display().to_string());
        if binary.name.is_none() {
            binary.name = Some(attachment.name.clone());
        }
        if binary.mime_type.is_none() {
            binary.mime_type = Some(attachment.mime_type.clone());
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp_client::extract_attachments;
    use crate::mcp_client::types::{BinaryContent, ContentChunk};
    use tempfile::TempDir;

    fn attachment(name: &str, mime: &str, data: &[u8]) -> Attachment {
        Attachment {
            name: name.to_string(),
            mime_type: mime.to_string(),
            data: data.to_vec(),
            path: None,
            chunk_index: 0,
        }
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("login page/step 1.png"), "login_page_step_1.png");
        assert_eq!(sanitize_name("ok-name_1.txt"), "ok-name_1.txt");
        assert_eq!(sanitize_name(""), "artifact");
    }

    #[test]
    fn test_ensure_extension() {
        assert_eq!(ensure_extension("shot.png", "image/jpeg"), "shot.png");
        assert_eq!(ensure_extension("shot", "image/png"), "shot.png");
        assert_eq!(ensure_extension("photo", "image/jpeg"), "photo.jpg");
        assert_eq!(ensure_extension("blob", "application/x-made-up"), "blob.bin");
        assert_eq!(ensure_extension("notes", "text/plain"), "notes.txt");
        assert_eq!(ensure_extension("page", "text/html; charset=utf-8"), "page.html");
        assert_eq!(ensure_extension("data", "application/json"), "data.json");
    }

    #[test]
    fn test_save_routes_by_mime_and_avoids_collisions() {
        let tmp = TempDir::new().unwrap();
        let store = ArtifactStore::create(tmp.path()).unwrap();

        let mut a = attachment("assistant-1", "image/png", b"png-bytes");
        let mut b = attachment("assistant-1", "image/png", b"other");
        let mut c = attachment("trace.zip", "application/zip", b"zip");

        let pa = store.save(&mut a).unwrap();
        let pb = store.save(&mut b).unwrap();
        let pc = store.save(&mut c).unwrap();

        assert_eq!(pa, tmp.path().join("screenshots/assistant-1.png"));
        assert_eq!(pb, tmp.path().join("screenshots/assistant-1_1.png"));
        assert_eq!(pc, tmp.path().join("artifacts/trace.zip"));
        assert_eq!(std::fs::read(&pb).unwrap(), b"other");
        assert_eq!(a.path.as_deref(), Some(pa.as_path()));
    }

    #[test]
    fn test_link_chunk_paths() {
        let mut event = MessageEvent {
            role: "assistant".into(),
            content: vec![
                ContentChunk::text("done"),
                ContentChunk::Image(BinaryContent {
                    data: Some("AA==".into()),
                    ..Default::default()
                }),
                ContentChunk::File(BinaryContent {
                    name: Some("report.csv".into()),
                    data: Some("AA==".into()),
                    ..Default::default()
                }),
            ],
        };
        let mut first = attachment("assistant-1", "image/png", b"x");
        first.path = Some(PathBuf::from("/runs/1/screenshots/assistant-1.png"));
        first.chunk_index = 1;
        let mut second = attachment("report.csv", "text/csv", b"y");
        second.path = Some(PathBuf::from("/runs/1/artifacts/report.csv"));
        second.chunk_index = 2;

        link_chunk_paths(&mut event, &[first, second]);

        let image = event.content[1].binary().unwrap();
        assert_eq!(image.path.as_deref(), Some("/runs/1/screenshots/assistant-1.png"));
        assert_eq!(image.name.as_deref(), Some("assistant-1"));
        assert_eq!(image.mime_type.as_deref(), Some("image/png"));

        let file = event.content[2].binary().unwrap();
        assert_eq!(file.path.as_deref(), Some("/runs/1/artifacts/report.csv"));
    }

    #[test]
    fn test_link_skips_chunks_that_failed_to_decode() {
        let tmp = TempDir::new().unwrap();
        let store = ArtifactStore::create(tmp.path()).unwrap();

        let mut event = MessageEvent {
            role: "assistant".into(),
            content: vec![
                ContentChunk::Image(BinaryContent {
                    mime_type: Some("image/png".into()),
                    data: Some("not*base64".into()),
                    ..Default::default()
                }),
                ContentChunk::Image(BinaryContent {
                    mime_type: Some("image/png".into()),
                    data: Some("iVBORw0KGgo=".into()),
                    ..Default::default()
                }),
            ],
        };

        let mut saved = extract_attachments(&event.content, &event.role);
        for a in saved.iter_mut() {
            store.save(a).unwrap();
        }
        link_chunk_paths(&mut event, &saved);

        assert!(event.content[0].binary().unwrap().path.is_none());
        let valid = event.content[1].binary().unwrap();
        assert!(valid.path.as_deref().unwrap().ends_with("assistant-1.png"));
        assert_eq!(valid.name.as_deref(), Some("assistant-1"));
    }
}
