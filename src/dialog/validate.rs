//! Free-text input validation for the registration flow.

/// Maximum accepted display-name length in characters.
const MAX_NAME_CHARS: usize = 50;

/// Accept a display name, trimmed. Empty or absurdly long input is rejected.
pub fn validate_name(input: &str) -> Option<String> {
    let trimmed = input.trim();
    if trimmed.is_empty() || trimmed.chars().count() > MAX_NAME_CHARS {
        return None;
    }
    Some(trimmed.to_string())
}

/// Accept a mobile number: exactly 10 digits starting with `09`, after
/// stripping dashes and whitespace.
pub fn validate_phone(input: &str) -> Option<String> {
    let digits: String = input
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .collect();
    if digits.len() == 10 && digits.starts_with("09") && digits.chars().all(|c| c.is_ascii_digit())
    {
        Some(digits)
    } else {
        None
    }
}

/// Words that abort the current flow.
pub fn is_cancel(input: &str) -> bool {
    matches!(
        input.trim().to_lowercase().as_str(),
        "cancel" | "quit" | "取消"
    )
}

/// Confirmation words accepted in the apply-confirm state.
pub fn is_affirmative(input: &str) -> bool {
    matches!(
        input.trim().to_lowercase().as_str(),
        "yes" | "y" | "confirm" | "ok" | "好" | "是"
    )
}

/// Negation words accepted in the apply-confirm state.
pub fn is_negative(input: &str) -> bool {
    matches!(input.trim().to_lowercase().as_str(), "no" | "n" | "不要")
}
