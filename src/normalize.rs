use std::sync::LazyLock;

use regex::Regex;

use crate::config::NormalizeConfig;

/// Characters OCR engines produce from caption borders and glyph fragments
const DECORATION: &[char] = &['|', '¦', '_', '~', '=', '*', '•', '■', '▪', '`', '°'];

/// Single-character tokens that are real text even in a noisy result
const MEANINGFUL_SYMBOLS: &[char] = &['-', '&', '"', '\'', '♪', '?', '!'];

/// Passes before giving up on reaching a fixpoint
const MAX_PASSES: usize = 16;

static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("Invalid whitespace regex"));

static SPACE_BEFORE_PUNCTUATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r" +([,.!?;:])").expect("Invalid punctuation regex"));

static REPEATED_COMMA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",{2,}").expect("Invalid comma regex"));

/// Cleans recognition artifacts out of OCR text.
///
/// Normalization is pure and idempotent: passes are repeated until the text
/// stops changing, so normalizing an already normalized string is a no-op.
#[derive(Debug, Clone)]
pub struct Normalizer {
    drop_duplicate_lines: bool,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(&NormalizeConfig::default())
    }
}

impl Normalizer {
    pub fn new(config: &NormalizeConfig) -> Self {
        Self {
            drop_duplicate_lines: config.drop_duplicate_lines,
        }
    }

    /// Normalize `raw`. `flagged` marks low-confidence recognition and
    /// enables the stricter noise filters.
    pub fn normalize(&self, raw: &str, flagged: bool) -> String {
        let mut current = self.pass(raw, flagged);
        for _ in 1..MAX_PASSES {
            let next = self.pass(&current, flagged);
            if next == current {
                break;
            }
            current = next;
        }
        current
    }

    fn pass(&self, text: &str, flagged: bool) -> String {
        let text = text
            .replace("\r\n", "\n")
            .replace('\r', "\n")
            .replace(['\u{2018}', '\u{2019}'], "'")
            .replace(['\u{201C}', '\u{201D}'], "\"")
            .replace("''", "\"")
            .replace("|'", "I'");

        let mut lines: Vec<String> = text
            .lines()
            .map(clean_line)
            .map(|line| if flagged { drop_noise_tokens(&line) } else { line })
            .filter(|line| !line.is_empty())
            .filter(|line| !flagged || line.chars().any(char::is_alphanumeric))
            .collect();

        lines = join_hyphenated(lines);

        if self.drop_duplicate_lines {
            lines.dedup();
        }

        lines.join("\n")
    }
}

/// Normalize with the default settings.
pub fn normalize(raw: &str, flagged: bool) -> String {
    Normalizer::default().normalize(raw, flagged)
}

fn clean_line(line: &str) -> String {
    let line = line.trim_matches(|c: char| c.is_whitespace() || DECORATION.contains(&c));
    let line = WHITESPACE.replace_all(line, " ");
    let line = SPACE_BEFORE_PUNCTUATION.replace_all(&line, "$1");
    REPEATED_COMMA.replace_all(&line, ",").into_owned()
}

fn drop_noise_tokens(line: &str) -> String {
    line.split(' ')
        .filter(|token| {
            let mut chars = token.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => c.is_alphanumeric() || MEANINGFUL_SYMBOLS.contains(&c),
                _ => true,
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Re-join words split across lines, e.g. `beauti-` followed by `ful day`.
fn join_hyphenated(lines: Vec<String>) -> Vec<String> {
    let mut joined: Vec<String> = Vec::with_capacity(lines.len());

    for line in lines {
        let continues = joined.last().is_some_and(|prev| ends_with_split_word(prev))
            && line.chars().next().is_some_and(char::is_lowercase);

        match joined.last_mut() {
            Some(prev) if continues => {
                prev.pop();
                prev.push_str(&line);
            }
            _ => joined.push(line),
        }
    }

    joined
}

fn ends_with_split_word(line: &str) -> bool {
    let mut tail = line.chars().rev();
    tail.next() == Some('-') && tail.next().is_some_and(char::is_alphabetic)
}
