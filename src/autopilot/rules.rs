//! Quick-rule matching — deterministic predicates evaluated before AI.

use crate::bridge::mail::EmailMessage;
use crate::config::autopilot::{QuickRule, RuleMatch};
use crate::util::sender_domain;

/// First rule whose predicates all match wins; rules are evaluated in
/// configuration order.
pub fn find_matching_rule<'a>(
    rules: &'a [QuickRule],
    email: &EmailMessage,
) -> Option<&'a QuickRule> {
    rules.iter().find(|rule| rule_matches(&rule.matcher, email))
}

/// Whether any configured rule needs the message body to evaluate.
pub fn any_rule_needs_content(rules: &[QuickRule]) -> bool {
    rules.iter().any(|rule| rule.matcher.needs_content())
}

/// Predicate kinds are ANDed; patterns within a kind are ORed.
pub fn rule_matches(matcher: &RuleMatch, email: &EmailMessage) -> bool {
    if matcher.is_empty() {
        return false;
    }

    let sender = email.sender.to_lowercase();
    if !matcher.sender_contains.is_empty()
        && !matcher
            .sender_contains
            .iter()
            .any(|p| sender.contains(&p.to_lowercase()))
    {
        return false;
    }

    if !matcher.sender_domain.is_empty() {
        let Some(domain) = sender_domain(&email.sender) else {
            return false;
        };
        let matched = matcher.sender_domain.iter().any(|p| {
            let p = p.to_lowercase();
            domain == p || domain.ends_with(&format!(".{}", p))
        });
        if !matched {
            return false;
        }
    }

    let subject = email.subject.to_lowercase();
    if !matcher.subject_contains.is_empty()
        && !matcher
            .subject_contains
            .iter()
            .any(|p| subject.contains(&p.to_lowercase()))
    {
        return false;
    }

    if !matcher.body_contains.is_empty() {
        let Some(body) = &email.content else {
            return false;
        };
        let body = body.to_lowercase();
        if !matcher
            .body_contains
            .iter()
            .any(|p| body.contains(&p.to_lowercase()))
        {
            return false;
        }
    }

    if !matcher.header_contains.is_empty() {
        let headers = header_block(email).to_lowercase();
        if !matcher
            .header_contains
            .iter()
            .any(|p| headers.contains(&p.to_lowercase()))
        {
            return false;
        }
    }

    true
}

/// Synthesized header view of a message for header predicates.
fn header_block(email: &EmailMessage) -> String {
    format!(
        "From: {}\nTo: {}\nSubject: {}\nMessage-Id: {}",
        email.sender,
        email.recipients.join(", "),
        email.subject,
        email.message_id,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::autopilot::RuleAction;

    fn message(sender: &str, subject: &str) -> EmailMessage {
        EmailMessage {
            id: "1".to_string(),
            message_id: "<m1@test>".to_string(),
            subject: subject.to_string(),
            sender: sender.to_string(),
            recipients: vec!["me@example.com".to_string()],
            date_received: None,
            date_sent: None,
            content: None,
            is_read: false,
            mailbox: "INBOX".to_string(),
            account: "Work".to_string(),
        }
    }

    fn rule(name: &str, matcher: RuleMatch) -> QuickRule {
        QuickRule {
            name: name.to_string(),
            matcher,
            actions: vec![RuleAction::MarkRead],
            folder: None,
        }
    }

    #[test]
    fn test_sender_contains_or_within_kind() {
        let matcher = RuleMatch {
            sender_contains: vec!["noreply@".to_string(), "no-reply@".to_string()],
            ..Default::default()
        };
        assert!(rule_matches(&matcher, &message("no-reply@shop.example", "Order")));
        assert!(!rule_matches(&matcher, &message("alice@shop.example", "Order")));
    }

    #[test]
    fn test_kinds_are_anded() {
        let matcher = RuleMatch {
            sender_contains: vec!["billing".to_string()],
            subject_contains: vec!["invoice".to_string()],
            ..Default::default()
        };
        assert!(rule_matches(
            &matcher,
            &message("billing@x.com", "Your Invoice #3")
        ));
        // Sender matches, subject doesn't
        assert!(!rule_matches(&matcher, &message("billing@x.com", "Welcome")));
        // Subject matches, sender doesn't
        assert!(!rule_matches(&matcher, &message("alice@x.com", "invoice")));
    }

    #[test]
    fn test_sender_domain_with_subdomain() {
        let matcher = RuleMatch {
            sender_domain: vec!["github.com".to_string()],
            ..Default::default()
        };
        assert!(rule_matches(
            &matcher,
            &message("Bot <notifications@github.com>", "PR")
        ));
        assert!(rule_matches(
            &matcher,
            &message("Bot <ci@mail.github.com>", "PR")
        ));
        assert!(!rule_matches(
            &matcher,
            &message("Bot <x@github.com.evil.net>", "PR")
        ));
    }

    #[test]
    fn test_body_predicate_without_content_fails() {
        let matcher = RuleMatch {
            body_contains: vec!["unsubscribe".to_string()],
            ..Default::default()
        };
        let mut msg = message("news@x.com", "Weekly");
        assert!(!rule_matches(&matcher, &msg));
        msg.content = Some("Click here to unsubscribe".to_string());
        assert!(rule_matches(&matcher, &msg));
    }

    #[test]
    fn test_empty_matcher_never_matches() {
        assert!(!rule_matches(&RuleMatch::default(), &message("a@b.c", "x")));
    }

    #[test]
    fn test_first_match_wins_in_order() {
        let rules = vec![
            rule(
                "first",
                RuleMatch {
                    subject_contains: vec!["hello".to_string()],
                    ..Default::default()
                },
            ),
            rule(
                "second",
                RuleMatch {
                    sender_contains: vec!["a@b.c".to_string()],
                    ..Default::default()
                },
            ),
        ];
        // Both rules match; listed order decides
        let matched = find_matching_rule(&rules, &message("a@b.c", "hello there")).unwrap();
        assert_eq!(matched.name, "first");
    }
}
