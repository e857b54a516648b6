use std::sync::OnceLock;

use regex::Regex;

fn url_shape() -> &'static Regex {
    static SHAPE: OnceLock<Regex> = OnceLock::new();
    SHAPE.get_or_init(|| {
        Regex::new(r"^(https?://)?(www\.)?(youtube\.com|youtu\.be)/.+").expect("static regex")
    })
}

/// Checks the shape of a video URL. This only looks at the text; whether the
/// video actually exists is up to the extraction engine.
pub fn is_supported_url(url: &str) -> bool {
    url_shape().is_match(url)
}
