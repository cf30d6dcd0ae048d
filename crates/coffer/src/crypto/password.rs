//! Heuristic password scoring. A UX gate only: the KDF is what protects the vault.

const COMMON_SEQUENCES: &[&str] = &[
    "0123456789",
    "abcdefghijklmnopqrstuvwxyz",
    "qwertyuiop",
    "asdfghjkl",
    "zxcvbnm",
];

const COMMON_WORDS: &[&str] = &["password", "passw0rd", "letmein", "welcome", "admin", "iloveyou"];

/// Score in `0..=100`. Length and character-class diversity add points; runs of a
/// repeated character, keyboard/alphabet sequences and common words subtract.
pub fn password_strength(password: &str) -> u8 {
    let chars: Vec<char> = password.chars().collect();
    if chars.is_empty() {
        return 0;
    }
    let len = i32::try_from(chars.len()).unwrap_or(i32::MAX);

    let mut score: i32 = if len < 8 {
        len.saturating_mul(3)
    } else {
        25 + if len >= 12 { 10 } else { 0 } + if len >= 16 { 10 } else { 0 }
    };

    let has_lower = chars.iter().any(|c| c.is_lowercase());
    let has_upper = chars.iter().any(|c| c.is_uppercase());
    let has_digit = chars.iter().any(char::is_ascii_digit);
    let has_other = chars.iter().any(|c| !c.is_alphanumeric());
    let classes = [has_lower, has_upper, has_digit, has_other]
        .iter()
        .filter(|b| **b)
        .count();
    let classes = i32::try_from(classes).unwrap_or(0);
    score += classes * 10;
    if classes >= 3 {
        score += 15;
    }

    score -= 15 * repeated_runs(&chars);
    score -= 20 * sequence_hits(password);

    u8::try_from(score.clamp(0, 100)).unwrap_or(0)
}

/// Number of runs of three or more identical characters.
fn repeated_runs(chars: &[char]) -> i32 {
    let mut runs = 0;
    let mut run_len = 1;
    for pair in chars.windows(2) {
        if let [a, b] = pair {
            if a == b {
                run_len += 1;
                if run_len == 3 {
                    runs += 1;
                }
            } else {
                run_len = 1;
            }
        }
    }
    runs
}

fn sequence_hits(password: &str) -> i32 {
    let lower = password.to_lowercase();
    let mut hits = 0;
    for seq in COMMON_SEQUENCES {
        let seq_chars: Vec<char> = seq.chars().collect();
        let found = seq_chars.windows(3).any(|w| {
            let forward: String = w.iter().collect();
            let backward: String = w.iter().rev().collect();
            lower.contains(&forward) || lower.contains(&backward)
        });
        if found {
            hits += 1;
        }
    }
    hits + COMMON_WORDS
        .iter()
        .filter(|w| lower.contains(*w))
        .count()
        .try_into()
        .unwrap_or(0_i32)
}
