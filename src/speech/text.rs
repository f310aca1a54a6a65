//! Text handling before playback.

use super::Voice;
use crate::config::SpeechConfig;

/// Punctuation that is kept for prosody; everything else non-alphanumeric goes.
const KEPT_PUNCTUATION: [char; 7] = ['،', '؛', '؟', '.', ',', '!', '?'];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Script {
    Arabic,
    Other,
}

/// Arabic, Arabic Supplement, Arabic Extended-A and the presentation forms.
pub fn is_arabic(c: char) -> bool {
    matches!(c,
        '\u{0600}'..='\u{06FF}'
            | '\u{0750}'..='\u{077F}'
            | '\u{08A0}'..='\u{08FF}'
            | '\u{FB50}'..='\u{FDFF}'
            | '\u{FE70}'..='\u{FEFC}')
}

/// Harakat and superscript alef. They are marks, not letters, but change
/// pronunciation.
fn is_arabic_mark(c: char) -> bool {
    matches!(c, '\u{064B}'..='\u{065F}' | '\u{0670}')
}

pub fn detect_script(text: &str) -> Script {
    if text.chars().any(is_arabic) {
        Script::Arabic
    } else {
        Script::Other
    }
}

pub fn language_for(script: Script, config: &SpeechConfig) -> String {
    match script {
        Script::Arabic => config.arabic_language.clone(),
        Script::Other => config.default_language.clone(),
    }
}

/// Strip symbols the synthesizer would read out literally and collapse
/// whitespace. Idempotent.
pub fn sanitize(text: &str) -> String {
    let kept: String = text
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c.is_whitespace() || is_arabic_mark(c) || KEPT_PUNCTUATION.contains(&c) {
                c
            } else {
                ' '
            }
        })
        .collect();
    kept.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn normalize_tag(tag: &str) -> String {
    tag.trim().to_ascii_lowercase().replace('_', "-")
}

fn primary_subtag(tag: &str) -> &str {
    tag.split('-').next().unwrap_or(tag)
}

/// Pick the voice for `language`: exact tag match first, then same primary
/// language (`ar-SA` matches an `ar` voice).
pub fn select_voice(voices: &[Voice], language: &str) -> Option<Voice> {
    let wanted = normalize_tag(language);
    let wanted_primary = primary_subtag(&wanted);

    voices
        .iter()
        .find(|v| normalize_tag(&v.language) == wanted)
        .or_else(|| {
            voices
                .iter()
                .find(|v| primary_subtag(&normalize_tag(&v.language)) == wanted_primary)
        })
        .cloned()
}
