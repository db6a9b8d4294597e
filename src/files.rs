use std::{
    io::{self, ErrorKind},
    path::{Component, Path, PathBuf},
};

use tracing::{info, warn};

/// Creates the download directory if it is missing. Safe to call on every
/// startup.
pub async fn ensure_download_dir(dir: &Path) -> io::Result<()> {
    let existed = tokio::fs::try_exists(dir).await.unwrap_or(false);
    tokio::fs::create_dir_all(dir).await?;
    if !existed {
        info!("Created download directory {:?}", dir);
    }
    Ok(())
}

/// Maps a client supplied name onto a regular file inside `root`.
///
/// Anything other than plain path segments (`..`, absolute paths, drive
/// prefixes) is refused, and symlinks escaping `root` are ignored.
pub async fn resolve_requested_file(root: &Path, requested: &str) -> io::Result<Option<PathBuf>> {
    let relative = Path::new(requested);
    let only_plain_segments = relative
        .components()
        .all(|component| matches!(component, Component::Normal(_)));

    if requested.is_empty() || !only_plain_segments {
        return Ok(None);
    }

    resolve_within(root, &root.join(relative)).await
}

/// Returns the canonical path of `candidate` when it is a regular file that
/// lives under `root`.
pub async fn resolve_within(root: &Path, candidate: &Path) -> io::Result<Option<PathBuf>> {
    let metadata = match tokio::fs::metadata(candidate).await {
        Ok(metadata) => metadata,
        Err(error) if error.kind() == ErrorKind::NotFound => return Ok(None),
        Err(error) => return Err(error),
    };

    if !metadata.is_file() {
        return Ok(None);
    }

    let canonical_root = match tokio::fs::canonicalize(root).await {
        Ok(path) => path,
        Err(error) if error.kind() == ErrorKind::NotFound => return Ok(None),
        Err(error) => return Err(error),
    };
    let canonical_candidate = tokio::fs::canonicalize(candidate).await?;

    if !canonical_candidate.starts_with(&canonical_root) {
        warn!(
            "Refusing file outside the download directory: {:?}",
            canonical_candidate
        );
        return Ok(None);
    }

    Ok(Some(canonical_candidate))
}

pub fn content_type_for_filename(filename: &str) -> &'static str {
    let extension = Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        "mov" => "video/quicktime",
        "mp3" => "audio/mpeg",
        "m4a" => "audio/mp4",
        "aac" => "audio/aac",
        "wav" => "audio/wav",
        "ogg" | "opus" => "audio/ogg",
        "flac" => "audio/flac",
        _ => "application/octet-stream",
    }
}

pub fn build_content_disposition(filename: &str) -> String {
    let safe_ascii = sanitize_ascii_filename(filename);
    format!(
        "attachment; filename=\"{safe_ascii}\"; filename*=UTF-8''{}",
        urlencoding::encode(filename)
    )
}

fn sanitize_ascii_filename(value: &str) -> String {
    let sanitized = value
        .chars()
        .map(|character| {
            if character.is_ascii_alphanumeric()
                || matches!(character, '.' | '-' | '_' | ' ' | '(' | ')')
            {
                character
            } else {
                '_'
            }
        })
        .collect::<String>();

    let compact = sanitized.trim();
    if compact.is_empty() {
        "download.bin".to_string()
    } else {
        compact.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn download_dir_creation_is_idempotent() {
        let temp = tempfile::tempdir().unwrap();
        let dir = temp.path().join("downloads");

        ensure_download_dir(&dir).await.unwrap();
        std::fs::write(dir.join("kept.mp4"), b"x").unwrap();
        ensure_download_dir(&dir).await.unwrap();

        assert!(dir.is_dir());
        assert!(dir.join("kept.mp4").is_file());
    }

    #[tokio::test]
    async fn resolves_plain_file_names() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::write(temp.path().join("My Clip.mp4"), b"x").unwrap();

        let resolved = resolve_requested_file(temp.path(), "My Clip.mp4")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resolved.file_name().unwrap(), "My Clip.mp4");

        assert!(resolve_requested_file(temp.path(), "missing.mp4")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn refuses_traversal_and_directories() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path().join("downloads");
        std::fs::create_dir_all(root.join("nested")).unwrap();
        std::fs::write(temp.path().join("secret.txt"), b"x").unwrap();

        for requested in ["../secret.txt", "/etc/passwd", "nested", "", "./nested/.."] {
            assert!(
                resolve_requested_file(&root, requested)
                    .await
                    .unwrap()
                    .is_none(),
                "{requested:?} should not resolve"
            );
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn ignores_symlinks_leaving_the_root() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path().join("downloads");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(temp.path().join("outside.mp4"), b"x").unwrap();
        std::os::unix::fs::symlink(temp.path().join("outside.mp4"), root.join("link.mp4")).unwrap();

        assert!(resolve_requested_file(&root, "link.mp4")
            .await
            .unwrap()
            .is_none());
    }

    #[test]
    fn content_types_follow_extension() {
        assert_eq!(content_type_for_filename("clip.MP4"), "video/mp4");
        assert_eq!(content_type_for_filename("song.opus"), "audio/ogg");
        assert_eq!(content_type_for_filename("noext"), "application/octet-stream");
    }

    #[test]
    fn content_disposition_has_ascii_and_utf8_names() {
        assert_eq!(
            build_content_disposition("Canción \"1\".mp4"),
            "attachment; filename=\"Canci_n _1_.mp4\"; filename*=UTF-8''Canci%C3%B3n%20%221%22.mp4"
        );
        assert_eq!(
            build_content_disposition("日本"),
            "attachment; filename=\"__\"; filename*=UTF-8''%E6%97%A5%E6%9C%AC"
        );
    }
}
