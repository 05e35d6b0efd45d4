use once_cell::sync::Lazy;
use regex::Regex;

static ADDR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<([^>]+)>").unwrap());

/// Truncate to at most `max` bytes without splitting a multi-byte char.
pub fn truncate(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) && end > 0 {
        end -= 1;
    }
    &text[..end]
}

/// Extract the bare address from a sender like `Alice <alice@example.com>`.
pub fn sender_address(sender: &str) -> String {
    if let Some(cap) = ADDR_RE.captures(sender) {
        return cap[1].trim().to_lowercase();
    }
    sender.trim().to_lowercase()
}

/// Extract the domain part of a sender, if it looks like an address.
pub fn sender_domain(sender: &str) -> Option<String> {
    let addr = sender_address(sender);
    addr.rsplit_once('@').map(|(_, dom)| dom.to_string())
}

/// Similarity ratio in [0,1] based on the longest common subsequence.
///
/// Case-insensitive. 1.0 means identical, 0.0 means nothing in common.
pub fn similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.to_lowercase().chars().collect();
    let b: Vec<char> = b.to_lowercase().chars().collect();
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let mut prev = vec![0usize; b.len() + 1];
    let mut cur = vec![0usize; b.len() + 1];
    for ca in &a {
        for (j, cb) in b.iter().enumerate() {
            cur[j + 1] = if ca == cb {
                prev[j] + 1
            } else {
                prev[j + 1].max(cur[j])
            };
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    let lcs = prev[b.len()];
    (2.0 * lcs as f64) / ((a.len() + b.len()) as f64)
}

/// Find the most similar name in `existing`, if any clears `threshold`.
///
/// An exact case-insensitive match wins immediately.
pub fn find_similar_name(target: &str, existing: &[String], threshold: f64) -> Option<String> {
    let target_lower = target.to_lowercase();
    let mut best: Option<(f64, &String)> = None;

    for name in existing {
        if name.to_lowercase() == target_lower {
            return Some(name.clone());
        }
        let ratio = similarity(target, name);
        if ratio >= threshold && best.map(|(r, _)| ratio > r).unwrap_or(true) {
            best = Some((ratio, name));
        }
    }
    best.map(|(_, name)| name.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_ascii() {
        assert_eq!(truncate("hello world", 5), "hello");
        assert_eq!(truncate("hi", 5), "hi");
    }

    #[test]
    fn test_truncate_multibyte() {
        let s = "héllo";
        // 'é' is two bytes; a cut inside it must back off
        assert_eq!(truncate(s, 2), "h");
    }

    #[test]
    fn test_sender_address() {
        assert_eq!(
            sender_address("Alice <Alice@Example.com>"),
            "alice@example.com"
        );
        assert_eq!(sender_address("bob@example.com"), "bob@example.com");
    }

    #[test]
    fn test_sender_domain() {
        assert_eq!(
            sender_domain("Alice <alice@example.com>").as_deref(),
            Some("example.com")
        );
        assert_eq!(sender_domain("no-address-here"), None);
    }

    #[test]
    fn test_similarity_identical() {
        assert_eq!(similarity("Receipts", "receipts"), 1.0);
    }

    #[test]
    fn test_similarity_disjoint() {
        assert!(similarity("abc", "xyz") < 0.01);
    }

    #[test]
    fn test_find_similar_exact_wins() {
        let existing = vec!["Receipts".to_string(), "Recipes".to_string()];
        assert_eq!(
            find_similar_name("receipts", &existing, 0.6).as_deref(),
            Some("Receipts")
        );
    }

    #[test]
    fn test_find_similar_fuzzy() {
        let existing = vec!["Marketing".to_string(), "Travel".to_string()];
        assert_eq!(
            find_similar_name("Marketting", &existing, 0.6).as_deref(),
            Some("Marketing")
        );
    }

    #[test]
    fn test_find_similar_below_threshold() {
        let existing = vec!["Travel".to_string()];
        assert_eq!(find_similar_name("Invoices", &existing, 0.6), None);
    }
}
