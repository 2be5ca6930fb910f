use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref EMAIL_REGEX: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s.]+$").unwrap();
}

/// Check that a string has the `local@domain.tld` shape
///
/// The local part must be non-empty and free of whitespace, the domain must
/// contain at least one dot and the final segment must be non-empty.
/// Leading and trailing whitespace is ignored.
///
/// # Examples
/// ```
/// use sheet_qa::email::validate_email;
///
/// assert!(validate_email("a@b.com"));
/// assert!(!validate_email("not-an-email"));
/// assert!(!validate_email(""));
/// ```
pub fn validate_email(email: &str) -> bool {
    EMAIL_REGEX.is_match(email.trim())
}
