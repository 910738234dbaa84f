use serde::{Deserialize, Serialize};

/// Canonical sex code. Unknown sex is `Option::<Sex>::None` everywhere
/// downstream of [`normalize_sex`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Sex {
    Male,
    Female,
}

impl Sex {
    pub fn as_code(self) -> &'static str {
        match self {
            Sex::Male => "M",
            Sex::Female => "F",
        }
    }

    /// Inverse of [`Sex::as_code`] for values read back from storage.
    pub fn from_code(code: &str) -> Option<Sex> {
        match code {
            "M" => Some(Sex::Male),
            "F" => Some(Sex::Female),
            _ => None,
        }
    }
}

const MALE_TOKENS: &[&str] = &[
    "m", "male", "man", "boy", "м", "муж", "мужской", "мужчина", "мальчик", "юноша",
];
const FEMALE_TOKENS: &[&str] = &[
    "f", "female", "woman", "girl", "ж", "жен", "женский", "женщина", "девочка", "девушка",
];

/// Map a free-form token (Latin or Cyrillic, any case) to a canonical sex.
///
/// Unrecognised tokens yield `None` rather than an error.
pub fn normalize_sex(token: &str) -> Option<Sex> {
    let t = token.trim().trim_end_matches('.').to_lowercase();
    if t.is_empty() {
        return None;
    }
    // Cyrillic "М" is visually identical to Latin "M" and shows up in
    // spreadsheets either way; lowercasing folds both into the tables above.
    if MALE_TOKENS.contains(&t.as_str()) {
        return Some(Sex::Male);
    }
    if FEMALE_TOKENS.contains(&t.as_str()) {
        return Some(Sex::Female);
    }
    None
}
