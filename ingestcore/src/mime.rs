pub const VIEW_ONCE: &str = "application/x-signal-view-once";
pub const IMAGE_WEBP: &str = "image/webp";

pub fn is_image_type(content_type: &str) -> bool {
    let ct = content_type.to_ascii_lowercase();
    (ct.starts_with("image/") && ct != "image/svg+xml") || ct == VIEW_ONCE
}

pub fn is_video_type(content_type: &str) -> bool {
    content_type.to_ascii_lowercase().starts_with("video/")
}

/// View-once messages may only carry a single image or video.
pub fn is_view_once_type(content_type: &str) -> bool {
    is_image_type(content_type) || is_video_type(content_type)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn view_once_types() {
        assert!(is_view_once_type("image/JPEG"));
        assert!(is_view_once_type("video/mp4"));
        assert!(!is_view_once_type("image/svg+xml"));
        assert!(!is_view_once_type("audio/aac"));
    }
}
