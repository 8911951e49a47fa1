pub mod encoding;
pub mod file;
pub mod validation;

pub use encoding::{canonical_json, canonicalize_bytes};
pub use file::*;
pub use validation::{validate_identifier, validate_poll_settings, validate_webhook_url};
