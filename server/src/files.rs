use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
};

use chrono::Utc;
use common::data::FormatKind;

/// Placeholder the engine replaces with the real extension.
const EXT_PLACEHOLDER: &str = "%(ext)s";
/// Placeholder the engine replaces with its own sanitized title.
const TITLE_PLACEHOLDER: &str = "%(title)s";
const MAX_TITLE_LEN: usize = 80;

/// Creates the output directory. Called once at startup.
pub fn ensure_dir(dir: &Path) -> io::Result<()> {
    fs::create_dir_all(dir)
}

/// Hands out output paths that no other job in this process gets.
pub struct OutputAllocator {
    dir: PathBuf,
    seq: AtomicU64,
}

impl OutputAllocator {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            seq: AtomicU64::new(0),
        }
    }

    /// Returns `<dir>/<timestamp>_<seq>_<kind>_<title>.%(ext)s`. The sequence
    /// number keeps two allocations in the same microsecond apart.
    pub fn allocate(&self, kind: FormatKind, title: Option<&str>) -> PathBuf {
        let stamp = Utc::now().format("%Y%m%d_%H%M%S_%6f");
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let title = title
            .map(sanitize_title)
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| TITLE_PLACEHOLDER.to_string());
        self.dir
            .join(format!("{stamp}_{seq:06}_{kind}_{title}.{EXT_PLACEHOLDER}"))
    }
}

/// Reduces a title to characters that are safe in a filename and inert in
/// the engine's template syntax.
pub fn sanitize_title(title: &str) -> String {
    let mut out = String::with_capacity(title.len().min(MAX_TITLE_LEN));
    let mut last_sep = true;
    for c in title.chars() {
        if out.chars().count() >= MAX_TITLE_LEN {
            break;
        }
        if c.is_alphanumeric() || c == '-' {
            out.push(c);
            last_sep = false;
        } else if !last_sep {
            out.push('_');
            last_sep = true;
        }
    }
    out.trim_end_matches('_').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn simultaneous_allocations_never_collide() {
        let alloc = Arc::new(OutputAllocator::new("downloads"));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let alloc = Arc::clone(&alloc);
                thread::spawn(move || {
                    (0..250)
                        .map(|_| alloc.allocate(FormatKind::Video, Some("same title")))
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        let mut seen = HashSet::new();
        for h in handles {
            for path in h.join().unwrap() {
                assert!(seen.insert(path), "duplicate path");
            }
        }
        assert_eq!(seen.len(), 2000);
    }

    #[test]
    fn template_shape() {
        let alloc = OutputAllocator::new("/srv/out");
        let p = alloc.allocate(FormatKind::Audio, None);
        assert_eq!(p.parent(), Some(Path::new("/srv/out")));
        let name = p.file_name().unwrap().to_str().unwrap();
        assert!(name.ends_with("_audio_%(title)s.%(ext)s"), "{name}");

        let p = alloc.allocate(FormatKind::Video, Some("My Talk: 100% live!"));
        let name = p.file_name().unwrap().to_str().unwrap();
        assert!(name.ends_with("_000001_video_My_Talk_100_live.%(ext)s"), "{name}");
    }

    #[test]
    fn sanitizing() {
        assert_eq!(sanitize_title("a/b\\c"), "a_b_c");
        assert_eq!(sanitize_title("%(id)s"), "id_s");
        assert_eq!(sanitize_title("???"), "");
        assert_eq!(sanitize_title(&"x".repeat(200)).len(), MAX_TITLE_LEN);
        assert_eq!(sanitize_title("Ünïcode-ok"), "Ünïcode-ok");
    }

    #[test]
    fn ensure_dir_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("nested/downloads");
        ensure_dir(&dir).unwrap();
        ensure_dir(&dir).unwrap();
        assert!(dir.is_dir());
    }
}
