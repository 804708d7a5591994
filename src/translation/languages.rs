//! Supported language table.
//!
//! Clients speak two-letter codes; the engine works with three-letter codes.
//! Anything not listed here is rejected before a request is ever built.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Language {
    pub code: &'static str,
    pub engine_code: &'static str,
    pub name: &'static str,
    pub native_name: &'static str,
}

const fn lang(
    code: &'static str,
    engine_code: &'static str,
    name: &'static str,
    native_name: &'static str,
) -> Language {
    Language { code, engine_code, name, native_name }
}

pub const SUPPORTED_LANGUAGES: &[Language] = &[
    lang("en", "eng", "English", "English"),
    lang("hi", "hin", "Hindi", "हिन्दी"),
    lang("bn", "ben", "Bengali", "বাংলা"),
    lang("te", "tel", "Telugu", "తెలుగు"),
    lang("ta", "tam", "Tamil", "தமிழ்"),
    lang("mr", "mar", "Marathi", "मराठी"),
    lang("gu", "guj", "Gujarati", "ગુજરાતી"),
    lang("kn", "kan", "Kannada", "ಕನ್ನಡ"),
    lang("ml", "mal", "Malayalam", "മലയാളം"),
    lang("pa", "pan", "Punjabi", "ਪੰਜਾਬੀ"),
    lang("ur", "urd", "Urdu", "اردو"),
    lang("as", "asm", "Assamese", "অসমীয়া"),
    lang("or", "ori", "Odia", "ଓଡ଼ିଆ"),
    lang("sd", "snd", "Sindhi", "سنڌي"),
    lang("zh", "zho", "Chinese", "中文"),
    lang("ar", "ara", "Arabic", "العربية"),
    lang("fr", "fra", "French", "Français"),
    lang("de", "deu", "German", "Deutsch"),
    lang("es", "spa", "Spanish", "Español"),
    lang("pt", "por", "Portuguese", "Português"),
    lang("ru", "rus", "Russian", "Русский"),
    lang("ja", "jpn", "Japanese", "日本語"),
    lang("ko", "kor", "Korean", "한국어"),
];

/// Look up a client-facing language code.
pub fn lookup(code: &str) -> Option<&'static Language> {
    SUPPORTED_LANGUAGES.iter().find(|l| l.code == code)
}

pub fn supported_codes() -> Vec<&'static str> {
    SUPPORTED_LANGUAGES.iter().map(|l| l.code).collect()
}
