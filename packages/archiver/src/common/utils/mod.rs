pub mod url;

pub use self::url::{extract_path, normalize_domain, validate_archive_url, UrlValidationError};
