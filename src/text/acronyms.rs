use std::borrow::Cow;
use std::collections::{HashMap, HashSet};

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

/// Slang acronyms and what they are read aloud as.
const ACRONYMS: &[(&str, &str)] = &[
    // Judgment threads
    ("AITAH", "Am I the A-hole"),
    ("AITA", "Am I the A-hole"),
    ("WIBTA", "Would I be the A-Hole"),
    ("NTA", "Not the A-hole"),
    ("YTA", "You’re the A-hole"),
    ("ESH", "Everyone Sucks Here"),
    ("NAH", "No A-holes Here"),
    ("INFO", "Need More Information"),
    ("TIFU", "Today I F'ed Up"),
    ("FTFY", "Fixed That For You"),
    ("AH", "A- Hole"),
    // Chat slang
    ("LOL", "Laugh Out Loud"),
    ("LMAO", "Laughing My A** Off"),
    ("LMFAO", "Laughing My F***ing A** Off"),
    ("ROFL", "Rolling On the Floor Laughing"),
    ("OMG", "Oh My God"),
    ("OMFG", "Oh My F***ing God"),
    ("WTF", "What The F***"),
    ("WTH", "What The Heck"),
    ("IDC", "I Don’t Care"),
    ("IDK", "I Don’t Know"),
    ("IMO", "In My Opinion"),
    ("IMHO", "In My Humble Opinion"),
    ("TBH", "To Be Honest"),
    ("TBF", "To Be Fair"),
    ("SMH", "Shaking My Head"),
    ("FR", "For Real"),
    ("FRFR", "For Real For Real"),
    ("NGL", "Not Gonna Lie"),
    ("RN", "Right Now"),
    ("BRB", "Be Right Back"),
    ("TTYL", "Talk To You Later"),
    ("BTW", "By The Way"),
    ("FYI", "For Your Information"),
    ("FTW", "For The Win"),
    ("GG", "Good Game"),
    ("AFK", "Away From Keyboard"),
    ("ICYMI", "In Case You Missed It"),
    ("TL;DR", "Too Long; Didn’t Read"),
    ("TLDR", "Too Long; Didn’t Read"),
    ("JK", "Just Kidding"),
    ("IDCWT", "I Don’t Care What They Think"),
    ("IDCWF", "I Don’t Care Who Finds Out"),
    ("IDGAF", "I Don’t Give A F***"),
    ("IDGAFF", "I Don’t Give A Flying F***"),
    ("STFU", "Shut The F*** Up"),
    ("GTFO", "Get The F*** Out"),
    ("YOLO", "You Only Live Once"),
    ("FOMO", "Fear Of Missing Out"),
    ("SUS", "Suspicious"),
    ("CAP", "Lie"),
    ("BET", "Okay"),
    ("COPE", "Deal With It"),
    ("IYKYK", "If You Know, You Know"),
    ("NSFW", "Not Safe For Work"),
    ("NSFL", "Not Safe For Life"),
    ("OP", "Original Poster"),
    // Dating and confessions
    ("FML", "F*** My Life"),
    ("DTR", "Define The Relationship"),
    ("FWB", "Friends With Benefits"),
    ("SO", "Significant Other"),
    ("BF", "Boyfriend"),
    ("GF", "Girlfriend"),
    ("LDR", "Long-Distance Relationship"),
    ("S/O", "Shout-Out"),
    ("TMI", "Too Much Information"),
    ("BFF", "Best Friends Forever"),
    ("BAE", "Before Anyone Else"),
    // Forum culture
    ("AMA", "Ask Me Anything"),
    ("ELI5", "Explain Like I’m 5"),
    ("CMV", "Change My View"),
    ("PSA", "Public Service Announcement"),
    ("YSK", "You Should Know"),
    ("DAE", "Does Anyone Else"),
    ("LPT", "Life Pro Tip"),
];

/// Acronyms that are also ordinary words; expanded only when written in caps.
const CAPS_ONLY: &[&str] = &["SO", "OP", "FR", "NAH", "SUS", "CAP", "BET", "COPE", "AH"];

static EXPANSIONS: Lazy<HashMap<&'static str, &'static str>> =
    Lazy::new(|| ACRONYMS.iter().copied().collect());

static CAPS_ONLY_SET: Lazy<HashSet<&'static str>> =
    Lazy::new(|| CAPS_ONLY.iter().copied().collect());

static ACRONYM_RE: Lazy<Regex> = Lazy::new(|| {
    let mut keys: Vec<&str> = ACRONYMS.iter().map(|(k, _)| *k).collect();
    // Longest first so FRFR wins over FR.
    keys.sort_by(|a, b| b.len().cmp(&a.len()).then(a.cmp(b)));
    let alternation = keys
        .iter()
        .map(|k| regex::escape(k))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(r"(?i)\b(?:{alternation})\b")).expect("valid acronym regex")
});

/// Replace slang acronyms with their spoken form.
///
/// Matching is whole-word and case-insensitive, except for the acronyms in
/// the caps-only list, which are left alone unless fully upper-case.
pub fn expand_acronyms(text: &str) -> Cow<'_, str> {
    if text.is_empty() {
        return Cow::Borrowed(text);
    }
    ACRONYM_RE.replace_all(text, |caps: &Captures| {
        let matched = &caps[0];
        let upper = matched.to_uppercase();
        if CAPS_ONLY_SET.contains(upper.as_str()) && matched != upper {
            return matched.to_string();
        }
        EXPANSIONS
            .get(upper.as_str())
            .map_or_else(|| matched.to_string(), |expansion| expansion.to_string())
    })
}
