//! Checks that run before an edit is sent off for generation.
//!
//! Uploads are validated before they enter the editor, prompts are
//! sanitized, and every generation request passes through `EditGuard`.

use chrono::Duration;
use regex::Regex;
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::{Arc, Mutex, OnceLock};

use crate::clock::Clock;
use crate::config::Config;
use crate::credits::CreditCache;
use crate::identity::IdentityRegistry;
use crate::state::{EditorState, EncodedImage, ImageKind};

pub const MAX_PROMPT_CHARS: usize = 500;
pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;
pub const MAX_UPLOAD_DIMENSION: u32 = 4096;

const ALLOWED_MIME_TYPES: [&str; 4] = ["image/jpeg", "image/jpg", "image/png", "image/webp"];
const SUSPICIOUS_EXTENSIONS: [&str; 8] = [
    ".exe", ".bat", ".cmd", ".scr", ".pif", ".com", ".js", ".jar",
];

fn markup_chars() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"[<>"'&]"#).expect("static regex"))
}

fn script_schemes() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)(javascript|data|vbscript):").expect("static regex"))
}

/// Strip markup characters and script schemes, trim, cap at 500 chars
pub fn sanitize_prompt(prompt: &str) -> String {
    let without_markup = markup_chars().replace_all(prompt, "");
    let without_schemes = script_schemes().replace_all(&without_markup, "");
    without_schemes.trim().chars().take(MAX_PROMPT_CHARS).collect()
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UploadRejected {
    #[error("Please upload a valid image file (JPEG, PNG, or WebP)")]
    UnsupportedType,

    #[error("File size must be less than 10MB")]
    TooLarge,

    #[error("Invalid file name detected")]
    SuspiciousName,

    #[error("Image dimensions must be less than {max}x{max} pixels")]
    DimensionsTooLarge { max: u32 },

    #[error("Invalid image file")]
    Unreadable,
}

/// Accept an uploaded file as the first history entry of a new session.
///
/// Checks run in order: MIME type, size, file name, then pixel dimensions
/// read from the image header.
pub fn validate_upload(
    file_name: &str,
    mime: &str,
    bytes: &[u8],
) -> Result<EncodedImage, UploadRejected> {
    let mime = mime.to_ascii_lowercase();
    if !ALLOWED_MIME_TYPES.contains(&mime.as_str()) {
        return Err(UploadRejected::UnsupportedType);
    }
    let kind = mime
        .strip_prefix("image/")
        .and_then(ImageKind::from_subtype)
        .ok_or(UploadRejected::UnsupportedType)?;

    if bytes.len() > MAX_UPLOAD_BYTES {
        return Err(UploadRejected::TooLarge);
    }

    let lowered = file_name.to_lowercase();
    if SUSPICIOUS_EXTENSIONS.iter().any(|ext| lowered.contains(ext)) {
        return Err(UploadRejected::SuspiciousName);
    }

    let (width, height) = image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|_| UploadRejected::Unreadable)?
        .into_dimensions()
        .map_err(|_| UploadRejected::Unreadable)?;
    if width > MAX_UPLOAD_DIMENSION || height > MAX_UPLOAD_DIMENSION {
        return Err(UploadRejected::DimensionsTooLarge {
            max: MAX_UPLOAD_DIMENSION,
        });
    }

    Ok(EncodedImage::new(kind, bytes.to_vec()))
}

/// Sliding-window request limiter keyed by identifier
pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    clock: Arc<dyn Clock>,
    requests: Mutex<HashMap<String, Vec<i64>>>,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            max_requests,
            window,
            clock,
            requests: Mutex::new(HashMap::new()),
        }
    }

    /// Record a request for `identifier` if it fits in the window
    pub fn is_allowed(&self, identifier: &str) -> bool {
        let now = self.clock.now_millis();
        let window_ms = self.window.num_milliseconds();
        let mut requests = self.requests.lock().unwrap_or_else(|e| e.into_inner());

        // Forget identifiers whose requests have all aged out
        requests.retain(|_, stamps| {
            stamps.retain(|&at| now - at < window_ms);
            !stamps.is_empty()
        });

        let stamps = requests.entry(identifier.to_string()).or_default();
        if stamps.len() >= self.max_requests {
            return false;
        }
        stamps.push(now);
        true
    }

    /// Identifiers with at least one request inside the window
    pub fn tracked(&self) -> usize {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn remaining(&self, identifier: &str) -> usize {
        let now = self.clock.now_millis();
        let window_ms = self.window.num_milliseconds();
        let requests = self.requests.lock().unwrap_or_else(|e| e.into_inner());
        let used = requests
            .get(identifier)
            .map_or(0, |stamps| stamps.iter().filter(|&&at| now - at < window_ms).count());
        self.max_requests.saturating_sub(used)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EditRejected {
    #[error("No image loaded to edit.")]
    NoImage,

    #[error("Session expired. Please refresh the page.")]
    SessionExpired,

    #[error("Please enter a valid description for your edit.")]
    EmptyPrompt,

    #[error("Please click on the image to select an area to edit.")]
    NoHotspot,

    #[error("Too many requests. Please wait a moment before trying again.")]
    RateLimited,

    #[error("No credits remaining. Purchase more to continue editing.")]
    OutOfCredits,
}

/// Gate in front of every generation request
pub struct EditGuard {
    identity: Arc<IdentityRegistry>,
    credits: Arc<CreditCache>,
    limiter: RateLimiter,
}

impl EditGuard {
    pub fn new(
        identity: Arc<IdentityRegistry>,
        credits: Arc<CreditCache>,
        clock: Arc<dyn Clock>,
        config: &Config,
    ) -> Self {
        Self {
            identity,
            credits,
            limiter: RateLimiter::new(config.rate_limit_max, config.rate_limit_window, clock),
        }
    }

    /// Decide whether `owner_id` may run `prompt` against the editor's
    /// current image. Returns the sanitized prompt to send.
    ///
    /// Does not spend a credit; the caller consumes one once generation
    /// succeeds.
    pub fn authorize(
        &self,
        owner_id: &str,
        editor: &EditorState,
        prompt: &str,
    ) -> Result<String, EditRejected> {
        if editor.is_empty() {
            return Err(EditRejected::NoImage);
        }

        if let Err(err) = self.identity.touch_activity() {
            tracing::warn!(error = %err, "could not record activity");
        }
        if !self.identity.is_live() {
            return Err(EditRejected::SessionExpired);
        }

        let prompt = sanitize_prompt(prompt);
        if prompt.is_empty() {
            return Err(EditRejected::EmptyPrompt);
        }
        if editor.hotspot.is_none() {
            return Err(EditRejected::NoHotspot);
        }
        if !self.limiter.is_allowed(owner_id) {
            tracing::debug!(owner_id, "edit request rate limited");
            return Err(EditRejected::RateLimited);
        }
        if self.credits.balance() == 0 {
            return Err(EditRejected::OutOfCredits);
        }

        Ok(prompt)
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::state::Hotspot;
    use crate::storage::{DurableStore, MemoryMedium};
    use image::{DynamicImage, RgbImage};

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::new(width, height));
        EncodedImage::from_image(&img, ImageKind::Png)
            .unwrap()
            .bytes()
            .to_vec()
    }

    #[test]
    fn test_sanitize_prompt() {
        assert_eq!(
            sanitize_prompt("  make it <b>blue</b> & \"bright\" "),
            "make it bblue/b  bright"
        );
        assert_eq!(sanitize_prompt("JavaScript:alert(1)"), "alert(1)");
        assert_eq!(sanitize_prompt("use DATA:uri and vbscript:x"), "use uri and x");
        assert_eq!(sanitize_prompt("<>&"), "");

        let long = "a".repeat(800);
        assert_eq!(sanitize_prompt(&long).len(), MAX_PROMPT_CHARS);
    }

    #[test]
    fn test_validate_upload_accepts_png() {
        let bytes = png_bytes(32, 24);
        let image = validate_upload("photo.png", "image/png", &bytes).unwrap();
        assert_eq!(image.kind(), ImageKind::Png);
        assert_eq!(image.bytes(), bytes.as_slice());
    }

    #[test]
    fn test_validate_upload_rejections() {
        let bytes = png_bytes(8, 8);
        assert_eq!(
            validate_upload("photo.gif", "image/gif", &bytes),
            Err(UploadRejected::UnsupportedType)
        );
        assert_eq!(
            validate_upload("photo.exe.png", "image/png", &bytes),
            Err(UploadRejected::SuspiciousName)
        );
        assert_eq!(
            validate_upload("photo.png", "image/png", &vec![0u8; MAX_UPLOAD_BYTES + 1]),
            Err(UploadRejected::TooLarge)
        );
        assert_eq!(
            validate_upload("photo.png", "image/png", b"not an image"),
            Err(UploadRejected::Unreadable)
        );

        let wide = png_bytes(MAX_UPLOAD_DIMENSION + 1, 1);
        assert_eq!(
            validate_upload("wide.png", "image/png", &wide),
            Err(UploadRejected::DimensionsTooLarge { max: MAX_UPLOAD_DIMENSION })
        );
    }

    #[test]
    fn test_rate_limiter_window_slides() {
        let clock = Arc::new(ManualClock::new(0));
        let limiter = RateLimiter::new(3, Duration::seconds(60), clock.clone());

        assert!(limiter.is_allowed("u1"));
        clock.advance(Duration::seconds(30));
        assert!(limiter.is_allowed("u1"));
        assert!(limiter.is_allowed("u1"));
        assert!(!limiter.is_allowed("u1"));
        assert_eq!(limiter.remaining("u1"), 0);

        // Other identifiers are counted separately
        assert!(limiter.is_allowed("u2"));

        // The first request falls out of the window
        clock.advance(Duration::seconds(30));
        assert_eq!(limiter.remaining("u1"), 1);
        assert!(limiter.is_allowed("u1"));
    }

    #[test]
    fn test_rate_limiter_forgets_idle_identifiers() {
        let clock = Arc::new(ManualClock::new(0));
        let limiter = RateLimiter::new(3, Duration::seconds(60), clock.clone());

        for id in ["a", "b", "c"] {
            assert!(limiter.is_allowed(id));
        }
        assert_eq!(limiter.tracked(), 3);

        clock.advance(Duration::seconds(61));
        assert!(limiter.is_allowed("d"));
        assert_eq!(limiter.tracked(), 1);
        assert_eq!(limiter.remaining("a"), 3);
    }

    fn guard() -> (EditGuard, Arc<IdentityRegistry>, Arc<CreditCache>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let store = Arc::new(DurableStore::new(MemoryMedium::new(), clock.clone(), "t:"));
        let config = Config::default();
        let identity = Arc::new(IdentityRegistry::new(store.clone(), &config));
        let credits = Arc::new(CreditCache::new(store, &config));
        let guard = EditGuard::new(identity.clone(), credits.clone(), clock.clone(), &config);
        (guard, identity, credits, clock)
    }

    fn editor_with_hotspot() -> EditorState {
        let image = EncodedImage::new(ImageKind::Png, png_bytes(8, 8));
        let mut editor = EditorState::from_upload(image);
        editor.hotspot = Some(Hotspot { x: 2, y: 3 });
        editor
    }

    #[test]
    fn test_authorize_happy_path() {
        let (guard, identity, _, _) = guard();
        identity.initialize_liveness_session().unwrap();

        let prompt = guard
            .authorize("u1", &editor_with_hotspot(), " remove the <lamp> ")
            .unwrap();
        assert_eq!(prompt, "remove the lamp");
    }

    #[test]
    fn test_authorize_rejections_in_order() {
        let (guard, identity, credits, clock) = guard();

        assert_eq!(
            guard.authorize("u1", &EditorState::default(), "x"),
            Err(EditRejected::NoImage)
        );

        let mut editor = editor_with_hotspot();
        assert_eq!(
            guard.authorize("u1", &editor, "x"),
            Err(EditRejected::SessionExpired)
        );

        identity.initialize_liveness_session().unwrap();
        assert_eq!(
            guard.authorize("u1", &editor, "<>"),
            Err(EditRejected::EmptyPrompt)
        );

        editor.hotspot = None;
        assert_eq!(
            guard.authorize("u1", &editor, "x"),
            Err(EditRejected::NoHotspot)
        );

        editor.hotspot = Some(Hotspot { x: 0, y: 0 });
        credits.set(0).unwrap();
        assert_eq!(
            guard.authorize("u1", &editor, "x"),
            Err(EditRejected::OutOfCredits)
        );

        // Liveness tokens have a hard lifetime regardless of activity
        clock.advance(Duration::hours(9));
        assert_eq!(
            guard.authorize("u1", &editor, "x"),
            Err(EditRejected::SessionExpired)
        );
    }

    #[test]
    fn test_authorize_rate_limited() {
        let (guard, identity, _, _) = guard();
        identity.initialize_liveness_session().unwrap();
        let editor = editor_with_hotspot();

        for _ in 0..10 {
            assert!(guard.authorize("u1", &editor, "brighten").is_ok());
        }
        assert_eq!(
            guard.authorize("u1", &editor, "brighten"),
            Err(EditRejected::RateLimited)
        );
    }
}
