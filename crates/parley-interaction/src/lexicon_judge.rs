//! Offline judge built on a small feeling/need vocabulary.
//!
//! Both texts are reduced to the canonical feelings and needs they name.
//! Alignment is the share of the subject's terms the guess echoes; every
//! term the guess leaves out is reported as missed.

use async_trait::async_trait;
use parley_core::reconciler::{
    Alignment, GapSeverity, Gaps, Judgment, JudgmentCapability, JudgmentContext, JudgmentError,
    JudgmentRequest,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TermKind {
    Feeling,
    Need,
}

struct Term {
    canonical: &'static str,
    kind: TermKind,
    variants: &'static [&'static str],
}

const VOCABULARY: &[Term] = &[
    Term {
        canonical: "angry",
        kind: TermKind::Feeling,
        variants: &["angry", "mad", "furious", "irritated", "annoyed", "resentful"],
    },
    Term {
        canonical: "frustrated",
        kind: TermKind::Feeling,
        variants: &["frustrated", "frustrating", "fed up", "stuck"],
    },
    Term {
        canonical: "hurt",
        kind: TermKind::Feeling,
        variants: &["hurt", "wounded", "stung"],
    },
    Term {
        canonical: "sad",
        kind: TermKind::Feeling,
        variants: &["sad", "unhappy", "disappointed", "heartbroken", "down"],
    },
    Term {
        canonical: "lonely",
        kind: TermKind::Feeling,
        variants: &["lonely", "alone", "isolated", "left out", "excluded"],
    },
    Term {
        canonical: "anxious",
        kind: TermKind::Feeling,
        variants: &["anxious", "worried", "nervous", "scared", "afraid", "uneasy"],
    },
    Term {
        canonical: "overwhelmed",
        kind: TermKind::Feeling,
        variants: &["overwhelmed", "exhausted", "tired", "drained", "burned out", "burnt out"],
    },
    Term {
        canonical: "unrecognized",
        kind: TermKind::Feeling,
        variants: &[
            "unrecognized",
            "unrecognised",
            "unappreciated",
            "invisible",
            "unseen",
            "overlooked",
            "unnoticed",
            "taken for granted",
        ],
    },
    Term {
        canonical: "dismissed",
        kind: TermKind::Feeling,
        variants: &["dismissed", "disrespected", "belittled", "ignored", "unheard"],
    },
    Term {
        canonical: "ashamed",
        kind: TermKind::Feeling,
        variants: &["ashamed", "embarrassed", "guilty"],
    },
    Term {
        canonical: "betrayed",
        kind: TermKind::Feeling,
        variants: &["betrayed", "deceived", "lied to"],
    },
    Term {
        canonical: "recognition",
        kind: TermKind::Need,
        variants: &[
            "recognition",
            "recognized",
            "recognised",
            "appreciated",
            "appreciation",
            "noticed",
            "thanked",
            "acknowledged",
            "valued",
        ],
    },
    Term {
        canonical: "respect",
        kind: TermKind::Need,
        variants: &["respect", "respected", "taken seriously"],
    },
    Term {
        canonical: "support",
        kind: TermKind::Need,
        variants: &["support", "supported", "help", "helped", "backup"],
    },
    Term {
        canonical: "connection",
        kind: TermKind::Need,
        variants: &["connection", "connected", "closeness", "close", "included", "together"],
    },
    Term {
        canonical: "security",
        kind: TermKind::Need,
        variants: &["safe", "safety", "security", "trust", "reassurance", "reassured"],
    },
    Term {
        canonical: "autonomy",
        kind: TermKind::Need,
        variants: &["autonomy", "freedom", "space", "independence", "choice"],
    },
    Term {
        canonical: "rest",
        kind: TermKind::Need,
        variants: &["rest", "break", "relief", "downtime"],
    },
    Term {
        canonical: "fairness",
        kind: TermKind::Need,
        variants: &["fair", "fairness", "equal", "balance", "share"],
    },
];

/// One vocabulary term found in a text.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Mention {
    canonical: &'static str,
    kind: TermKind,
    /// Number of variant occurrences.
    count: usize,
    /// Token position of the first occurrence.
    first: usize,
}

/// Judge that needs no network access.
#[derive(Debug, Clone, Default)]
pub struct LexiconJudge;

impl LexiconJudge {
    pub fn new() -> Self {
        Self
    }

    /// Compares the two texts.
    pub fn compare(&self, guess: &str, actual: &str) -> Judgment {
        let expressed = mentions(actual);
        let guessed = mentions(guess);

        if expressed.is_empty() {
            return Judgment {
                alignment: Alignment::new(100, "the subject named no feelings or needs"),
                gaps: Gaps::none(),
                sharing_would_help: false,
                suggested_share_focus: None,
                suggested_share_content: None,
            };
        }

        let (echoed, missed): (Vec<&Mention>, Vec<&Mention>) = expressed
            .iter()
            .partition(|m| guessed.iter().any(|g| g.canonical == m.canonical));

        let total = expressed.len();
        let score = (echoed.len() * 100 / total) as u32;
        let severity = severity_for(missed.len(), total);
        let missed_names: Vec<String> = missed.iter().map(|m| m.canonical.to_string()).collect();
        let focus = most_salient(&missed);

        Judgment {
            alignment: Alignment::new(
                score,
                format!("{} of {} named feelings and needs echoed", echoed.len(), total),
            ),
            gaps: Gaps {
                severity,
                summary: if missed_names.is_empty() {
                    String::new()
                } else {
                    format!("not reflected: {}", missed_names.join(", "))
                },
                missed_feelings: missed_names,
            },
            sharing_would_help: missed.iter().any(|m| m.kind == TermKind::Need)
                || severity == GapSeverity::Significant,
            suggested_share_focus: focus.map(str::to_string),
            suggested_share_content: None,
        }
    }
}

#[async_trait]
impl JudgmentCapability for LexiconJudge {
    async fn judge(
        &self,
        context: &JudgmentContext,
        request: &JudgmentRequest,
    ) -> Result<Judgment, JudgmentError> {
        let judgment = self.compare(&request.guess, &request.actual);
        tracing::debug!(
            target: "judge",
            session_id = %context.session_id,
            turn_id = %context.turn_id,
            score = judgment.alignment.score,
            severity = %judgment.gaps.severity,
            "lexicon judgment"
        );
        Ok(judgment)
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphabetic())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Vocabulary terms named in `text`, in order of first occurrence.
fn mentions(text: &str) -> Vec<Mention> {
    let tokens = tokenize(text);
    let mut found: Vec<Mention> = Vec::new();

    for term in VOCABULARY {
        let mut count = 0;
        let mut first = usize::MAX;
        for variant in term.variants {
            let words: Vec<&str> = variant.split(' ').collect();
            for (position, window) in tokens.windows(words.len()).enumerate() {
                if window.iter().zip(&words).all(|(token, word)| token == word) {
                    count += 1;
                    first = first.min(position);
                }
            }
        }
        if count > 0 {
            found.push(Mention {
                canonical: term.canonical,
                kind: term.kind,
                count,
                first,
            });
        }
    }

    found.sort_by_key(|m| m.first);
    found
}

fn severity_for(missed: usize, total: usize) -> GapSeverity {
    if missed == 0 {
        GapSeverity::None
    } else if missed * 3 <= total {
        GapSeverity::Minor
    } else if missed * 3 <= total * 2 {
        GapSeverity::Moderate
    } else {
        GapSeverity::Significant
    }
}

/// The missed need named most often, else the missed feeling named most
/// often. Ties go to the earlier mention.
fn most_salient(missed: &[&Mention]) -> Option<&'static str> {
    let pick = |kind: TermKind| {
        missed
            .iter()
            .filter(|m| m.kind == kind)
            .fold(None::<&&Mention>, |best, m| match best {
                Some(b) if b.count >= m.count => Some(b),
                _ => Some(m),
            })
            .map(|m| m.canonical)
    };
    pick(TermKind::Need).or_else(|| pick(TermKind::Feeling))
}
