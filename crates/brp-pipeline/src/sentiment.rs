//! Rule-based lexicon sentiment scorer.
//!
//! Each token with a lexicon entry contributes a valence, adjusted by
//! boosters and negations in the three preceding tokens, ALL-CAPS emphasis
//! and a contrastive "but". Boosters and negations do not reach across
//! clause punctuation. The sum gets punctuation emphasis and is squashed
//! into [-1, 1] with `s / sqrt(s² + ALPHA)`.

use std::collections::{HashMap, HashSet};

use brp_core::Sentiment;

const B_INCR: f64 = 0.293;
const B_DECR: f64 = -0.293;
const C_INCR: f64 = 0.733;
const N_SCALAR: f64 = -0.74;
const ALPHA: f64 = 15.0;

const EXCLAMATION_BOOST: f64 = 0.292;
const MAX_EXCLAMATIONS: usize = 4;
const QUESTION_BOOST: f64 = 0.18;
const MAX_QUESTION_BOOST: f64 = 0.96;

const BUT_BEFORE: f64 = 0.5;
const BUT_AFTER: f64 = 1.5;

/// Decay applied to a booster one, two and three tokens away.
const BOOSTER_DECAY: [f64; 3] = [1.0, 0.95, 0.9];

/// `token<TAB>valence` lines on the -4..+4 scale. Further tab-separated
/// columns (standard deviation, raw ratings) are ignored, so a published
/// rule-based sentiment lexicon in that layout drops in unchanged.
const LEXICON_SOURCE: &str = include_str!("../lexicon/sentiment_lexicon.txt");

const BOOSTERS_UP: &[&str] = &[
    "absolutely",
    "amazingly",
    "completely",
    "considerably",
    "deeply",
    "entirely",
    "especially",
    "exceptionally",
    "extremely",
    "greatly",
    "highly",
    "hugely",
    "incredibly",
    "more",
    "most",
    "particularly",
    "quite",
    "really",
    "remarkably",
    "so",
    "super",
    "thoroughly",
    "too",
    "totally",
    "tremendously",
    "unbelievably",
    "utterly",
    "very",
];

const BOOSTERS_DOWN: &[&str] = &[
    "almost",
    "barely",
    "hardly",
    "less",
    "little",
    "marginally",
    "occasionally",
    "partly",
    "scarcely",
    "slightly",
    "somewhat",
];

const NEGATIONS: &[&str] = &[
    "not", "no", "never", "none", "nothing", "nobody", "nowhere", "neither", "nor", "cannot",
    "cant", "dont", "doesnt", "didnt", "isnt", "wasnt", "wont", "wouldnt", "shouldnt",
    "couldnt", "aint", "arent", "hasnt", "havent", "without",
];

pub struct SentimentAnalyzer {
    lexicon: HashMap<String, f64>,
    boosters: HashMap<&'static str, f64>,
    negations: HashSet<&'static str>,
}

impl Default for SentimentAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl SentimentAnalyzer {
    pub fn new() -> Self {
        let boosters = BOOSTERS_UP
            .iter()
            .map(|w| (*w, B_INCR))
            .chain(BOOSTERS_DOWN.iter().map(|w| (*w, B_DECR)))
            .collect();
        Self {
            lexicon: parse_lexicon(LEXICON_SOURCE),
            boosters,
            negations: NEGATIONS.iter().copied().collect(),
        }
    }

    pub fn polarity(&self, text: &str) -> Sentiment {
        Sentiment::from_score(self.compound(text))
    }

    pub fn compound(&self, text: &str) -> f64 {
        let tokens = tokenize(text);
        if tokens.is_empty() {
            return 0.0;
        }
        let lowered: Vec<String> = tokens.iter().map(|t| t.text.to_lowercase()).collect();
        let cap_differential = has_cap_differential(&tokens);

        let mut valences = Vec::with_capacity(tokens.len());
        for (i, word) in lowered.iter().enumerate() {
            let is_kind_of = word == "kind" && lowered.get(i + 1).map(String::as_str) == Some("of");
            if self.boosters.contains_key(word.as_str()) || is_kind_of {
                valences.push(0.0);
                continue;
            }
            valences.push(self.token_valence(i, &tokens, &lowered, cap_differential));
        }

        if let Some(but) = lowered.iter().position(|w| w == "but") {
            for (i, v) in valences.iter_mut().enumerate() {
                if i < but {
                    *v *= BUT_BEFORE;
                } else if i > but {
                    *v *= BUT_AFTER;
                }
            }
        }

        let mut sum: f64 = valences.iter().sum();
        let emphasis = punctuation_emphasis(text);
        if sum > 0.0 {
            sum += emphasis;
        } else if sum < 0.0 {
            sum -= emphasis;
        }
        normalize(sum)
    }

    fn token_valence(
        &self,
        i: usize,
        tokens: &[Token<'_>],
        lowered: &[String],
        cap_differential: bool,
    ) -> f64 {
        let Some(&base) = self.lexicon.get(lowered[i].as_str()) else {
            return 0.0;
        };
        let mut valence = base;
        if cap_differential && is_all_caps(tokens[i].text) {
            valence += C_INCR.copysign(valence);
        }

        for (distance, decay) in BOOSTER_DECAY.iter().enumerate() {
            let Some(prev) = i.checked_sub(distance + 1) else {
                break;
            };
            if tokens[prev + 1].opens_clause {
                break;
            }
            let prev_word = lowered[prev].as_str();
            if !self.lexicon.contains_key(prev_word) {
                let boost =
                    self.booster_scalar(tokens[prev].text, prev_word, valence, cap_differential);
                valence += boost * decay;
            }
            if self.is_negation(prev_word) {
                valence *= N_SCALAR;
            }
        }
        valence
    }

    fn booster_scalar(&self, token: &str, word: &str, valence: f64, cap_differential: bool) -> f64 {
        let Some(&scalar) = self.boosters.get(word) else {
            return 0.0;
        };
        let mut scalar = if valence < 0.0 { -scalar } else { scalar };
        if cap_differential && is_all_caps(token) {
            scalar += C_INCR.copysign(valence);
        }
        scalar
    }

    fn is_negation(&self, word: &str) -> bool {
        self.negations.contains(word) || word.contains("n't")
    }
}

fn parse_lexicon(source: &str) -> HashMap<String, f64> {
    source
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let mut fields = line.split('\t');
            let word = fields.next()?.trim();
            let valence = fields.next()?.trim().parse::<f64>().ok()?;
            Some((word.to_lowercase(), valence))
        })
        .collect()
}

const CLAUSE_MARKS: [char; 5] = [',', ';', '.', '!', '?'];

#[derive(Debug, Clone, Copy, PartialEq)]
struct Token<'a> {
    text: &'a str,
    /// Clause punctuation sits between this token and the previous one.
    opens_clause: bool,
}

/// Whitespace tokens with surrounding punctuation stripped; tokens of one
/// character or less are dropped.
fn tokenize(text: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut pending_break = false;
    for raw in text.split_whitespace() {
        let word = raw.trim_matches(|c: char| !c.is_alphanumeric());
        if word.chars().count() > 1 {
            tokens.push(Token {
                text: word,
                opens_clause: pending_break,
            });
            pending_break = false;
        }
        let tail = &raw[raw.trim_end_matches(|c: char| !c.is_alphanumeric()).len()..];
        if tail.contains(&CLAUSE_MARKS[..]) {
            pending_break = true;
        }
    }
    tokens
}

fn is_all_caps(token: &str) -> bool {
    token.chars().any(char::is_alphabetic)
        && token
            .chars()
            .filter(|c| c.is_alphabetic())
            .all(char::is_uppercase)
}

/// Caps only count as emphasis when some, but not all, tokens are shouted.
fn has_cap_differential(tokens: &[Token<'_>]) -> bool {
    let caps = tokens.iter().filter(|t| is_all_caps(t.text)).count();
    caps > 0 && caps < tokens.len()
}

fn punctuation_emphasis(text: &str) -> f64 {
    let exclamations = text.matches('!').count().min(MAX_EXCLAMATIONS);
    let questions = text.matches('?').count();
    let question_boost = match questions {
        0 | 1 => 0.0,
        2..=3 => questions as f64 * QUESTION_BOOST,
        _ => MAX_QUESTION_BOOST,
    };
    exclamations as f64 * EXCLAMATION_BOOST + question_boost
}

fn normalize(sum: f64) -> f64 {
    if sum == 0.0 {
        return 0.0;
    }
    (sum / (sum * sum + ALPHA).sqrt()).clamp(-1.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use brp_core::SentimentLabel;

    fn score(text: &str) -> f64 {
        SentimentAnalyzer::new().compound(text)
    }

    #[test]
    fn failed_transfer_is_mildly_negative() {
        let s = SentimentAnalyzer::new().polarity("Transfer failed again");
        assert!((s.score() + 0.392).abs() < 0.005, "score was {}", s.score());
        assert_eq!(s.label(), SentimentLabel::Negative);
    }

    #[test]
    fn praise_is_positive() {
        let s = SentimentAnalyzer::new().polarity("Great app love it");
        assert!(s.score() > 0.8);
        assert_eq!(s.label(), SentimentLabel::Positive);
    }

    #[test]
    fn text_without_lexicon_words_is_neutral() {
        let s = SentimentAnalyzer::new().polarity("Opened the app on Monday");
        assert_eq!(s.score(), 0.0);
        assert_eq!(s.label(), SentimentLabel::Neutral);
        assert_eq!(score(""), 0.0);
    }

    #[test]
    fn negation_flips_polarity() {
        assert!(score("good app") > 0.0);
        assert!(score("not good app") < 0.0);
        assert!(score("it doesn't work and isn't good") < 0.0);
    }

    #[test]
    fn boosters_and_dampeners_scale_intensity() {
        let plain = score("the app is good");
        assert!(score("the app is very good") > plain);
        assert!(score("the app is slightly good") < plain);
        assert!(score("the app is very slow") < score("the app is slow"));
    }

    #[test]
    fn shouting_and_exclamations_add_emphasis() {
        let plain = score("the app is great");
        assert!(score("the app is GREAT") > plain);
        assert!(score("the app is great!!") > plain);
        // all-caps text has no differential
        assert_eq!(score("THE APP IS GREAT"), plain);
    }

    #[test]
    fn clause_after_but_dominates() {
        assert!(score("nice design but very slow") < 0.0);
        assert!(score("slow at times but great support") > 0.0);
    }

    #[test]
    fn everyday_complaints_are_negative() {
        for text in [
            "Stupid app, very unhappy, worthless",
            "I can't login, it's a nightmare",
            "Useless update, keeps crashing",
            "Rude staff and a horrible experience",
            "They overcharged me, total scam",
            "Disgusting service, I regret installing this",
        ] {
            let s = SentimentAnalyzer::new().polarity(text);
            assert_eq!(s.label(), SentimentLabel::Negative, "{text:?} scored {}", s.score());
        }
    }

    #[test]
    fn everyday_praise_is_positive() {
        for text in [
            "Fantastic service, very helpful staff",
            "Smooth and reliable, I recommend it",
            "Thank you, the new version is brilliant",
        ] {
            let s = SentimentAnalyzer::new().polarity(text);
            assert_eq!(s.label(), SentimentLabel::Positive, "{text:?} scored {}", s.score());
        }
    }

    #[test]
    fn negation_stops_at_clause_punctuation() {
        assert!(score("I can't login, it's a nightmare") < -0.5);
        assert!(score("I can't login it's a nightmare") > 0.0);
    }

    #[test]
    fn embedded_lexicon_parses_every_entry() {
        let entries = LEXICON_SOURCE
            .lines()
            .filter(|l| !l.trim().is_empty() && !l.starts_with('#'))
            .count();
        let analyzer = SentimentAnalyzer::new();
        assert_eq!(analyzer.lexicon.len(), entries);
        assert!(analyzer.lexicon.len() > 900);
        assert_eq!(analyzer.lexicon.get("failed"), Some(&-1.65));
    }

    #[test]
    fn lexicon_lines_may_carry_extra_columns() {
        let parsed = parse_lexicon("# header\nnightmare\t-2.7\t0.64\t[-3, -2]\n\nbroken-line\nwow\t2.8\n");
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed.get("nightmare"), Some(&-2.7));
    }

    #[test]
    fn scores_stay_in_range() {
        let s = score("best best best best best great great love love amazing!!!!");
        assert!(s <= 1.0 && s > 0.9);
    }
}
