use chrono::{DateTime, Utc};

use crate::models::{RawUser, Student};

pub fn normalize(raw: &RawUser) -> Student {
    normalize_at(raw, Utc::now())
}

/// `now` stands in for the last access time when the LMS has none on record.
pub fn normalize_at(raw: &RawUser, now: DateTime<Utc>) -> Student {
    let email = match raw.email.as_deref().map(str::trim) {
        Some(email) if !email.is_empty() => email.to_string(),
        _ => placeholder_email(raw.id),
    };

    let last_access = raw
        .last_access
        .filter(|secs| *secs > 0)
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .unwrap_or(now);

    Student {
        id: raw.id,
        full_name: format!("{} {}", raw.first_name, raw.last_name),
        email,
        last_access,
    }
}

pub fn placeholder_email(user_id: i64) -> String {
    format!("user{user_id}@placeholder.invalid")
}
