//! Parsing of pasted multi-line text into grouped URL sets.
//!
//! Source sheets mark backup URLs with a "backup link" line (often written
//! as "link dự phòng") and audio-only variants with an "original sound"
//! line; everything before the first marker is the primary content.

use crate::platform;

/// URLs of one logical content unit, split by role.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupedUrls {
    pub main: Vec<String>,
    pub preventive: Vec<String>,
    pub sound: Vec<String>,
}

impl GroupedUrls {
    pub fn is_empty(&self) -> bool {
        self.main.is_empty() && self.preventive.is_empty() && self.sound.is_empty()
    }
}

#[derive(Clone, Copy)]
enum Section {
    Main,
    Preventive,
    Sound,
}

/// Split a text cell into primary / backup / sound URLs. Marker lines
/// switch the active section and may carry URLs themselves.
pub fn parse_grouped(text: &str) -> GroupedUrls {
    let mut out = GroupedUrls::default();
    let mut section = Section::Main;

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let lower = line.to_lowercase();
        if lower.contains("link dự phòng") || lower.contains("backup link") {
            section = Section::Preventive;
        } else if lower.contains("original_sound") || lower.contains("original sound") {
            section = Section::Sound;
        }
        let urls = platform::split_urls(line);
        let bucket = match section {
            Section::Main => &mut out.main,
            Section::Preventive => &mut out.preventive,
            Section::Sound => &mut out.sound,
        };
        bucket.extend(urls);
    }

    out
}
