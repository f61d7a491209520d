/// Wake-phrase spotting
///
/// Matches a transcript against the configured wake phrases. Exact
/// substring matches always win; otherwise a sliding token-window
/// normalized edit distance absorbs the usual transcription mishearings
/// ("hey cloud", "hay claude"). No match is the normal idle outcome.

use crate::stt::Transcript;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum WakeError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// One configured wake phrase and the agent profile it selects
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct WakePhrase {
    /// Spoken trigger, e.g. "hey claude"
    pub phrase: String,

    /// Name of the execution profile this phrase activates
    pub profile: String,
}

/// Wake spotting configuration
#[derive(Debug, Clone)]
pub struct WakeConfig {
    /// Phrases in priority order; the first entry is the primary phrase
    pub phrases: Vec<WakePhrase>,

    /// Whether near-miss transcriptions may match
    pub fuzzy_match: bool,

    /// Similarity floor for fuzzy matches (0.0 - 1.0)
    pub fuzzy_threshold: f32,
}

impl Default for WakeConfig {
    fn default() -> Self {
        Self {
            phrases: vec![WakePhrase {
                phrase: "hey claude".to_string(),
                profile: "default".to_string(),
            }],
            fuzzy_match: true,
            fuzzy_threshold: 0.72,
        }
    }
}

impl WakeConfig {
    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), WakeError> {
        if self.phrases.is_empty() {
            return Err(WakeError::InvalidConfig(
                "at least one wake phrase is required".to_string(),
            ));
        }

        for wp in &self.phrases {
            if wp.phrase.trim().is_empty() {
                return Err(WakeError::InvalidConfig("wake phrase is empty".to_string()));
            }
            if wp.profile.trim().is_empty() {
                return Err(WakeError::InvalidConfig(format!(
                    "wake phrase '{}' has no profile",
                    wp.phrase
                )));
            }
        }

        if !(0.0..=1.0).contains(&self.fuzzy_threshold) {
            return Err(WakeError::InvalidConfig(
                "fuzzy_threshold must be between 0.0 and 1.0".to_string(),
            ));
        }

        Ok(())
    }
}

/// A successful wake detection
#[derive(Debug, Clone, PartialEq)]
pub struct WakeMatch {
    /// The configured phrase that matched
    pub phrase: String,

    /// Execution profile selected by the phrase
    pub profile: String,

    /// Similarity score; 1.0 for exact matches
    pub confidence: f32,

    /// Transcript text after the matched phrase, if the speaker ran the
    /// command into the same utterance ("hey claude list the files")
    pub remainder: String,
}

/// Matches transcripts against configured wake phrases.
pub struct WakeSpotter {
    config: WakeConfig,
}

impl WakeSpotter {
    pub fn new(config: WakeConfig) -> Result<Self, WakeError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Spot a wake phrase in the transcript.
    ///
    /// Phrases are evaluated independently; the highest confidence wins
    /// and ties go to the earlier configured phrase.
    pub fn spot(&self, transcript: &Transcript) -> Option<WakeMatch> {
        let tokens = normalize_tokens(&transcript.text);
        if tokens.is_empty() {
            return None;
        }

        let mut best: Option<WakeMatch> = None;

        for wp in &self.config.phrases {
            let phrase_tokens = normalize_tokens(&wp.phrase);
            if phrase_tokens.is_empty() {
                continue;
            }

            let Some((similarity, end)) = best_window(&tokens, &phrase_tokens) else {
                continue;
            };

            // An exact match always satisfies, independent of the fuzzy
            // toggle; near-misses need fuzzy enabled and the threshold.
            let accepted = similarity >= 1.0
                || (self.config.fuzzy_match && similarity >= self.config.fuzzy_threshold);
            if !accepted {
                continue;
            }

            if best.as_ref().map_or(true, |b| similarity > b.confidence) {
                best = Some(WakeMatch {
                    phrase: wp.phrase.clone(),
                    profile: wp.profile.clone(),
                    confidence: similarity,
                    remainder: tokens[end..].join(" "),
                });
            }
        }

        if let Some(ref m) = best {
            debug!(
                "Wake phrase '{}' matched (confidence {:.2}, profile {})",
                m.phrase, m.confidence, m.profile
            );
        }

        best
    }

    pub fn config(&self) -> &WakeConfig {
        &self.config
    }
}

/// Lowercase, strip punctuation, split on whitespace.
fn normalize_tokens(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split_whitespace()
        .map(|word| {
            word.chars()
                .filter(|c| c.is_alphanumeric() || *c == '\'')
                .collect::<String>()
        })
        .filter(|w| !w.is_empty())
        .collect()
}

/// Best similarity of any phrase-length token window in `tokens`, with
/// the index one past the end of the winning window.
///
/// Returns None only when `tokens` is empty.
fn best_window(tokens: &[String], phrase_tokens: &[String]) -> Option<(f32, usize)> {
    if tokens.is_empty() {
        return None;
    }

    let phrase = phrase_tokens.join(" ");
    let n = phrase_tokens.len();

    if tokens.len() < n {
        // Transcript shorter than the phrase: compare the whole thing
        let sim = similarity(&tokens.join(" "), &phrase);
        return Some((sim, tokens.len()));
    }

    let mut best = (0.0_f32, n);
    for start in 0..=(tokens.len() - n) {
        let window = tokens[start..start + n].join(" ");
        let sim = similarity(&window, &phrase);
        if sim > best.0 {
            best = (sim, start + n);
        }
    }
    Some(best)
}

/// Normalized similarity in [0, 1]: 1 - edit_distance / max_len.
fn similarity(a: &str, b: &str) -> f32 {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - levenshtein_distance(a, b) as f32 / max_len as f32
}

/// Levenshtein edit distance, standard dynamic programming.
pub fn levenshtein_distance(a: &str, b: &str) -> usize {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    let m = a_chars.len();
    let n = b_chars.len();

    let mut dp = vec![vec![0usize; n + 1]; m + 1];
    for (i, row) in dp.iter_mut().enumerate().take(m + 1) {
        row[0] = i;
    }
    for j in 0..=n {
        dp[0][j] = j;
    }

    for i in 1..=m {
        for j in 1..=n {
            let cost = if a_chars[i - 1] == b_chars[j - 1] { 0 } else { 1 };
            dp[i][j] = (dp[i - 1][j] + 1)
                .min(dp[i][j - 1] + 1)
                .min(dp[i - 1][j - 1] + cost);
        }
    }

    dp[m][n]
}
