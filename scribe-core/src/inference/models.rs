//! Model catalog metadata and id/language normalization helpers.

use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelInfo {
    pub id: &'static str,
    pub label: &'static str,
    /// Size of the weights file.
    pub disk_mb: u32,
    /// Estimated peak engine memory while running this model.
    pub memory_mb: u32,
    /// English-only checkpoints ignore language selection and cannot translate.
    pub english_only: bool,
}

const fn model(
    id: &'static str,
    label: &'static str,
    disk_mb: u32,
    memory_mb: u32,
    english_only: bool,
) -> ModelInfo {
    ModelInfo {
        id,
        label,
        disk_mb,
        memory_mb,
        english_only,
    }
}

pub const CATALOG: &[ModelInfo] = &[
    model("tiny.en", "Tiny English", 75, 273, true),
    model("tiny", "Tiny", 75, 273, false),
    model("base.en", "Base English", 142, 388, true),
    model("base", "Base", 142, 388, false),
    model("small.en", "Small English", 466, 852, true),
    model("small", "Small", 466, 852, false),
    model("medium.en", "Medium English", 1_500, 2_100, true),
    model("medium", "Medium", 1_500, 2_100, false),
    model("large-v3", "Large v3", 2_900, 3_900, false),
    model("tiny.en-q5_1", "Tiny English (Q5_1)", 31, 230, true),
    model("tiny-q5_1", "Tiny (Q5_1)", 31, 230, false),
    model("base.en-q5_1", "Base English (Q5_1)", 57, 300, true),
    model("base-q5_1", "Base (Q5_1)", 57, 300, false),
    model("small.en-q5_1", "Small English (Q5_1)", 181, 570, true),
    model("small-q5_1", "Small (Q5_1)", 181, 570, false),
    model("medium.en-q5_0", "Medium English (Q5_0)", 514, 1_100, true),
    model("medium-q5_0", "Medium (Q5_0)", 514, 1_100, false),
    model("large-v3-q5_0", "Large v3 (Q5_0)", 1_030, 1_900, false),
];

/// Look up a model by canonical id.
pub fn lookup(model_id: &str) -> Option<&'static ModelInfo> {
    CATALOG.iter().find(|m| m.id == model_id)
}

/// Canonicalise user-supplied model ids (`tiny-en` → `tiny.en`, `large` → `large-v3`).
pub fn normalize_model_id(raw: &str) -> String {
    let id = raw.trim().to_ascii_lowercase();
    match id.as_str() {
        "" => "base.en".into(),
        "large" | "large-v3" | "whisper-large-v3" => "large-v3".into(),
        "large-q5_0" => "large-v3-q5_0".into(),
        other => {
            // "tiny-en", "tiny-en-q5_1" → "tiny.en", "tiny.en-q5_1"
            for size in ["tiny", "base", "small", "medium"] {
                if let Some(rest) = other.strip_prefix(size).and_then(|r| r.strip_prefix("-en")) {
                    return format!("{size}.en{rest}");
                }
            }
            other.to_string()
        }
    }
}

/// Canonicalise a language hint to an ISO-639-1 code or `"auto"`.
pub fn normalize_language(raw: &str) -> String {
    let lang = raw.trim().to_ascii_lowercase();
    let code = match lang.as_str() {
        "" | "auto" | "detect" => "auto",
        "english" | "eng" => "en",
        "spanish" | "spa" => "es",
        "french" | "fra" => "fr",
        "german" | "deu" => "de",
        "italian" | "ita" => "it",
        "portuguese" | "por" => "pt",
        "russian" | "rus" => "ru",
        "chinese" | "mandarin" | "zh-cn" | "zh-hans" => "zh",
        "japanese" | "jpn" => "ja",
        "korean" | "kor" => "ko",
        other
            if (2..=3).contains(&other.len())
                && other.chars().all(|c| c.is_ascii_alphabetic()) =>
        {
            other
        }
        _ => "auto",
    };
    code.to_string()
}
