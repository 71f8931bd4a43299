//! Language resolution for the initial chat request.
//!
//! The server expects a short protocol code (mostly ISO 639-1). Detectors emit
//! ISO 639-3 or custom identifiers, so every raw code goes through
//! [`normalize`], a lookup into [`DETECTOR_CODES`]. Codes with no two-letter
//! form map to themselves; codes absent from the table pass through unchanged.

use std::collections::HashMap;
use std::sync::OnceLock;

use tracing::{debug, warn};

/// Sent when neither a selection nor a detection is available.
pub const AUTO: &str = "auto";

/// Detector code → protocol code.
pub static DETECTOR_CODES: &[(&str, &str)] = &[
    ("eng", "en"),
    ("spa", "es"),
    ("cmn", "zh"),
    ("rus", "ru"),
    ("arb", "ar"),
    ("ben", "bn"),
    ("hin", "hi"),
    ("por", "pt"),
    ("ind", "id"),
    ("jpn", "ja"),
    ("fra", "fr"),
    ("deu", "de"),
    ("jav", "jv"),
    ("kor", "ko"),
    ("tel", "te"),
    ("vie", "vi"),
    ("mar", "mr"),
    ("ita", "it"),
    ("tam", "ta"),
    ("tur", "tr"),
    ("urd", "ur"),
    ("guj", "gu"),
    ("pol", "pl"),
    ("ukr", "uk"),
    ("kan", "kn"),
    ("mai", "mai"),
    ("mal", "ml"),
    ("pes", "fa"),
    ("mya", "my"),
    ("swh", "sw"),
    ("sun", "su"),
    ("ron", "ro"),
    ("pan", "pa"),
    ("bho", "bho"),
    ("amh", "am"),
    ("hau", "ha"),
    ("fuv", "ff"),
    ("bos", "bs"),
    ("hrv", "hr"),
    ("nld", "nl"),
    ("srp", "sr"),
    ("tha", "th"),
    ("ckb", "ckb"),
    ("yor", "yo"),
    ("uzn", "uz"),
    ("zlm", "ms"),
    ("ibo", "ig"),
    ("npi", "ne"),
    ("ceb", "ceb"),
    ("skr", "skr"),
    ("tgl", "tl"),
    ("hun", "hu"),
    ("azj", "az"),
    ("sin", "si"),
    ("koi", "koi"),
    ("ell", "el"),
    ("ces", "cs"),
    ("mag", "mag"),
    ("run", "rn"),
    ("bel", "be"),
    ("plt", "mg"),
    ("qug", "qu"),
    ("mad", "mad"),
    ("nya", "ny"),
    ("zyb", "za"),
    ("pbu", "ps"),
    ("kin", "rw"),
    ("zul", "zu"),
    ("bul", "bg"),
    ("swe", "sv"),
    ("lin", "ln"),
    ("som", "so"),
    ("hms", "hms"),
    ("hnj", "hnj"),
    ("ilo", "ilo"),
    ("kaz", "kk"),
    ("uig", "ug"),
    ("hat", "ht"),
    ("khm", "km"),
    ("prs", "ps"),
    ("hil", "hil"),
    ("sna", "sn"),
    ("tat", "tt"),
    ("xho", "xh"),
    ("hye", "hy"),
    ("min", "min"),
    ("afr", "af"),
    ("lua", "lu"),
    ("sat", "sat"),
    ("bod", "bo"),
    ("tir", "ti"),
    ("fin", "fi"),
    ("slk", "sk"),
    ("tuk", "tk"),
    ("dan", "da"),
    ("nob", "no"),
    ("suk", "suk"),
    ("als", "sq"),
    ("sag", "sg"),
    ("nno", "nn"),
    ("heb", "he"),
    ("mos", "mos"),
    ("tgk", "tg"),
    ("cat", "ca"),
    ("sot", "st"),
    ("kat", "ka"),
    ("bcl", "bcl"),
    ("glg", "gl"),
    ("lao", "lo"),
    ("lit", "lt"),
    ("umb", "umb"),
    ("tsn", "tn"),
    ("vec", "vec"),
    ("nso", "nso"),
    ("ban", "ban"),
    ("bug", "bug"),
    ("knc", "knc"),
];

/// Macrolanguage codes reported by `whatlang` where the table above keys an
/// individual language (`ara` vs `arb`), plus languages it has no entry for.
pub static WHATLANG_CODES: &[(&str, &str)] = &[
    ("ara", "ar"),
    ("aze", "az"),
    ("uzb", "uz"),
    ("nep", "ne"),
    ("est", "et"),
    ("lav", "lv"),
    ("slv", "sl"),
    ("mkd", "mk"),
    ("epo", "eo"),
    ("lat", "la"),
    ("ori", "or"),
    ("yid", "yi"),
    ("aka", "ak"),
];

fn table() -> &'static HashMap<&'static str, &'static str> {
    static TABLE: OnceLock<HashMap<&'static str, &'static str>> = OnceLock::new();
    TABLE.get_or_init(|| {
        DETECTOR_CODES
            .iter()
            .chain(WHATLANG_CODES)
            .copied()
            .collect()
    })
}

/// Map a raw detector code to the protocol code. Unknown codes pass through.
pub fn normalize(code: &str) -> &str {
    table().get(code).copied().unwrap_or(code)
}

/// A detector failed to classify the text.
#[derive(Debug, thiserror::Error)]
#[error("language detection failed: {0}")]
pub struct DetectError(pub String);

/// Black-box language classifier.
///
/// `Ok(None)` means the text was processed but no language was identified.
pub trait LanguageDetector {
    fn detect(&self, text: &str) -> Result<Option<String>, DetectError>;
}

/// Detector backed by `whatlang`, which reports ISO 639-3 codes. Those not
/// keyed in [`DETECTOR_CODES`] are covered by [`WHATLANG_CODES`].
#[derive(Debug, Clone, Copy, Default)]
pub struct WhatlangDetector;

impl LanguageDetector for WhatlangDetector {
    fn detect(&self, text: &str) -> Result<Option<String>, DetectError> {
        Ok(whatlang::detect(text).map(|info| info.lang().code().to_string()))
    }
}

/// The language resolved for one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LanguageTag {
    /// Selection or detector output before normalization.
    pub raw: String,
    /// Code placed in the request.
    pub code: String,
}

impl LanguageTag {
    fn from_raw(raw: &str) -> Self {
        Self {
            raw: raw.to_string(),
            code: normalize(raw).to_string(),
        }
    }

    pub fn auto() -> Self {
        Self::from_raw(AUTO)
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Resolve the protocol language for a prompt.
///
/// An explicit selection wins and the detector is not consulted. Otherwise the
/// detector runs on `text`; a missing detector, blank text, a detector error or
/// an empty detection all resolve to [`AUTO`].
pub fn resolve(
    explicit: Option<&str>,
    text: Option<&str>,
    detector: Option<&dyn LanguageDetector>,
) -> LanguageTag {
    if let Some(selection) = non_blank(explicit) {
        let tag = LanguageTag::from_raw(selection);
        debug!(raw = %tag.raw, code = %tag.code, "using selected language");
        return tag;
    }

    let (Some(text), Some(detector)) = (non_blank(text), detector) else {
        return LanguageTag::auto();
    };

    let tag = match detector.detect(text) {
        Ok(Some(raw)) if !raw.trim().is_empty() => LanguageTag::from_raw(raw.trim()),
        Ok(_) => LanguageTag::auto(),
        Err(e) => {
            warn!(error = %e, "language detector unavailable, falling back to auto");
            LanguageTag::auto()
        }
    };
    debug!(raw = %tag.raw, code = %tag.code, "detected language");
    tag
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct Fixed(Option<&'static str>);

    impl LanguageDetector for Fixed {
        fn detect(&self, _text: &str) -> Result<Option<String>, DetectError> {
            Ok(self.0.map(str::to_string))
        }
    }

    struct Broken;

    impl LanguageDetector for Broken {
        fn detect(&self, _text: &str) -> Result<Option<String>, DetectError> {
            Err(DetectError("model not loaded".into()))
        }
    }

    #[derive(Default)]
    struct Counting(Cell<usize>);

    impl LanguageDetector for Counting {
        fn detect(&self, _text: &str) -> Result<Option<String>, DetectError> {
            self.0.set(self.0.get() + 1);
            Ok(Some("fra".into()))
        }
    }

    #[test]
    fn every_table_entry_maps_to_its_value() {
        for (raw, code) in DETECTOR_CODES.iter().chain(WHATLANG_CODES) {
            assert_eq!(normalize(raw), *code, "mapping for {raw}");
        }
    }

    #[test]
    fn table_keys_are_unique() {
        assert_eq!(table().len(), DETECTOR_CODES.len() + WHATLANG_CODES.len());
    }

    #[test]
    fn absent_codes_pass_through() {
        assert_eq!(normalize("en"), "en");
        assert_eq!(normalize("xyz"), "xyz");
        assert_eq!(normalize(AUTO), AUTO);
    }

    #[test]
    fn detected_eng_resolves_to_en() {
        let tag = resolve(None, Some("How can I work with you?"), Some(&Fixed(Some("eng"))));
        assert_eq!(tag.raw, "eng");
        assert_eq!(tag.code, "en");
    }

    #[test]
    fn explicit_selection_skips_detector() {
        let detector = Counting::default();
        let tag = resolve(Some("es"), Some("How are you?"), Some(&detector));
        assert_eq!(tag.code, "es");
        assert_eq!(detector.0.get(), 0);
    }

    #[test]
    fn explicit_selection_is_normalized() {
        assert_eq!(resolve(Some("spa"), None, None).code, "es");
    }

    #[test]
    fn blank_selection_falls_back_to_detection() {
        let detector = Counting::default();
        let tag = resolve(Some("  "), Some("Bonjour"), Some(&detector));
        assert_eq!(tag.code, "fr");
        assert_eq!(detector.0.get(), 1);
    }

    #[test]
    fn nothing_detectable_resolves_to_auto() {
        assert_eq!(resolve(None, None, None), LanguageTag::auto());
        assert_eq!(resolve(None, Some(""), Some(&Fixed(Some("eng")))).code, AUTO);
        assert_eq!(resolve(None, Some("hi"), None).code, AUTO);
        assert_eq!(resolve(None, Some("hi"), Some(&Fixed(None))).code, AUTO);
    }

    #[test]
    fn detector_failure_resolves_to_auto() {
        assert_eq!(resolve(None, Some("hello"), Some(&Broken)).code, AUTO);
    }

    #[test]
    fn whatlang_detector_reports_iso_639_3() {
        let raw = WhatlangDetector
            .detect("The quick brown fox jumps over the lazy dog and keeps running far away.")
            .unwrap();
        assert_eq!(raw.as_deref(), Some("eng"));
    }

    #[test]
    fn every_whatlang_language_normalizes_to_two_letters() {
        for lang in whatlang::Lang::all() {
            let code = normalize(lang.code());
            assert_eq!(
                code.len(),
                2,
                "{} ({}) normalized to {code}",
                lang.eng_name(),
                lang.code()
            );
        }
    }

    #[test]
    fn whatlang_macrolanguage_codes_normalize() {
        let arabic = "مرحبا بكم في مركز المعلومات، كيف يمكنني مساعدتك اليوم؟";
        let tag = resolve(None, Some(arabic), Some(&WhatlangDetector));
        assert_eq!((tag.raw.as_str(), tag.code.as_str()), ("ara", "ar"));

        assert_eq!(normalize(whatlang::Lang::Uzb.code()), "uz");
        assert_eq!(normalize(whatlang::Lang::Aze.code()), "az");
        assert_eq!(normalize(whatlang::Lang::Nep.code()), "ne");
    }
}
