//! Message classifier — pure, deterministic, rule-table driven.
//!
//! Evaluation order per message:
//! 1. Sender-domain exclusion list → `excluded` ("excluded domain")
//! 2. Keyword exclusion list over subject+body → `excluded` ("excluded keyword")
//! 3. Inclusion rules per category, scored by matched signals
//! 4. Nothing matched → `excluded`, score 0
//!
//! Tie-break when several categories match: highest signal count wins; equal
//! counts resolve tech > newsletter > professional > social
//! (`Category::priority`). The rule tables are data so the tie-break stays
//! testable and auditable.

use crate::pipeline::types::{Category, CategoryVerdict, EmailMessage};

/// Inclusion rule for one category: a sender-domain table plus a keyword
/// table.
#[derive(Debug, Clone)]
pub struct CategoryRule {
    pub category: Category,
    pub domains: Vec<String>,
    pub keywords: Vec<String>,
}

impl CategoryRule {
    /// Number of configured positive signals. The domain table counts as one
    /// signal since a sender has exactly one domain.
    fn signal_total(&self) -> usize {
        usize::from(!self.domains.is_empty()) + self.keywords.len()
    }
}

/// The classifier's rule tables.
#[derive(Debug, Clone)]
pub struct ClassifierRules {
    pub exclude_domains: Vec<String>,
    pub exclude_keywords: Vec<String>,
    pub categories: Vec<CategoryRule>,
}

impl ClassifierRules {
    /// Built-in tables: banking/finance/personal exclusions plus the four
    /// inclusion categories.
    pub fn default_rules() -> Self {
        let exclude_domains = [
            "bank.com",
            "chase.com",
            "wellsfargo.com",
            "bankofamerica.com",
            "citibank.com",
            "capitalone.com",
            "paypal.com",
            "venmo.com",
            "fidelity.com",
            "vanguard.com",
            "schwab.com",
            "irs.gov",
            "ssa.gov",
            "healthcare.gov",
        ];
        let exclude_keywords = [
            "account statement",
            "payment due",
            "password reset",
            "verification code",
            "two-factor",
            "appointment reminder",
            "prescription",
            "wire transfer",
        ];

        let categories = vec![
            CategoryRule {
                category: Category::Tech,
                domains: to_strings(&[
                    "github.com",
                    "stackoverflow.com",
                    "dev.to",
                    "medium.com",
                    "techcrunch.com",
                    "arstechnica.com",
                    "theverge.com",
                    "wired.com",
                ]),
                keywords: to_strings(&[
                    "programming",
                    "software",
                    "engineering",
                    "open source",
                    "api",
                    "database",
                    "cloud",
                    "devops",
                    "machine learning",
                    "rust",
                    "javascript",
                    "kubernetes",
                ]),
            },
            CategoryRule {
                category: Category::Newsletter,
                domains: to_strings(&[
                    "substack.com",
                    "mailchimp.com",
                    "convertkit.com",
                    "beehiiv.com",
                    "buttondown.email",
                ]),
                keywords: to_strings(&[
                    "newsletter",
                    "digest",
                    "weekly",
                    "monthly",
                    "roundup",
                    "issue",
                    "edition",
                    "highlights",
                ]),
            },
            CategoryRule {
                category: Category::Social,
                domains: to_strings(&[
                    "linkedin.com",
                    "twitter.com",
                    "facebook.com",
                    "instagram.com",
                    "reddit.com",
                    "mastodon.social",
                ]),
                keywords: to_strings(&[
                    "followed you",
                    "mentioned you",
                    "commented",
                    "liked your",
                    "connection request",
                    "friend request",
                    "tagged you",
                    "trending",
                ]),
            },
            CategoryRule {
                category: Category::Professional,
                domains: to_strings(&[
                    "hbr.org",
                    "bloomberg.com",
                    "reuters.com",
                    "ft.com",
                    "economist.com",
                    "mckinsey.com",
                ]),
                keywords: to_strings(&[
                    "business",
                    "strategy",
                    "market",
                    "leadership",
                    "industry",
                    "management",
                    "quarterly report",
                    "insights",
                ]),
            },
        ];

        Self {
            exclude_domains: to_strings(&exclude_domains),
            exclude_keywords: to_strings(&exclude_keywords),
            categories,
        }
    }

    /// Empty tables (for testing).
    pub fn empty() -> Self {
        Self {
            exclude_domains: Vec::new(),
            exclude_keywords: Vec::new(),
            categories: Vec::new(),
        }
    }

    pub fn add_exclude_domain(&mut self, domain: &str) {
        self.exclude_domains.push(domain.to_lowercase());
    }

    pub fn add_exclude_keyword(&mut self, keyword: &str) {
        self.exclude_keywords.push(keyword.to_lowercase());
    }
}

/// Pure classifier over a set of rule tables.
#[derive(Debug, Clone)]
pub struct Classifier {
    rules: ClassifierRules,
    relevance_threshold: f32,
}

impl Classifier {
    pub fn new(rules: ClassifierRules, relevance_threshold: f32) -> Self {
        Self {
            rules,
            relevance_threshold,
        }
    }

    pub fn with_default_rules(relevance_threshold: f32) -> Self {
        Self::new(ClassifierRules::default_rules(), relevance_threshold)
    }

    /// Classify one message. Deterministic, no I/O.
    pub fn classify(&self, message: &EmailMessage) -> CategoryVerdict {
        let domain = extract_domain(&message.sender);
        let haystack = format!(
            "{} {}",
            message.subject.to_lowercase(),
            message.body.to_lowercase()
        );

        if self
            .rules
            .exclude_domains
            .iter()
            .any(|d| domain_matches(&domain, d))
        {
            return CategoryVerdict::excluded("excluded domain");
        }

        if self
            .rules
            .exclude_keywords
            .iter()
            .any(|k| haystack.contains(k.as_str()))
        {
            return CategoryVerdict::excluded("excluded keyword");
        }

        // Score every inclusion rule; keep (rule, matched signal count).
        let mut best: Option<(&CategoryRule, usize)> = None;
        for rule in &self.rules.categories {
            let domain_hit = rule.domains.iter().any(|d| domain_matches(&domain, d));
            let keyword_hits = rule
                .keywords
                .iter()
                .filter(|k| haystack.contains(k.as_str()))
                .count();
            let matched = usize::from(domain_hit) + keyword_hits;
            if matched == 0 {
                continue;
            }

            best = match best {
                None => Some((rule, matched)),
                Some((current, current_matched)) => {
                    if matched > current_matched
                        || (matched == current_matched
                            && rule.category.priority() < current.category.priority())
                    {
                        Some((rule, matched))
                    } else {
                        Some((current, current_matched))
                    }
                }
            };
        }

        let Some((rule, matched)) = best else {
            return CategoryVerdict::excluded("no inclusion rule matched");
        };

        let score = (matched as f32 / rule.signal_total() as f32).clamp(0.0, 1.0);
        if score < self.relevance_threshold {
            return CategoryVerdict::excluded("below relevance threshold");
        }

        CategoryVerdict {
            category: rule.category,
            score,
            exclusion_reason: None,
        }
    }
}

/// Extract the lowercase domain from "user@host" or "Name <user@host>".
pub fn extract_domain(sender: &str) -> String {
    let addr = match (sender.find('<'), sender.find('>')) {
        (Some(open), Some(close)) if close > open => &sender[open + 1..close],
        _ => sender,
    };
    match addr.rsplit_once('@') {
        Some((_, domain)) => domain.trim().to_lowercase(),
        None => addr.trim().to_lowercase(),
    }
}

/// Exact domain match, or subdomain of a configured domain.
fn domain_matches(domain: &str, configured: &str) -> bool {
    let configured = configured.to_lowercase();
    domain == configured || domain.ends_with(&format!(".{configured}"))
}

fn to_strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn make_message(sender: &str, subject: &str, body: &str) -> EmailMessage {
        EmailMessage {
            id: "test-1".into(),
            received_at: Utc::now(),
            sender: sender.into(),
            subject: subject.into(),
            body: body.into(),
            labels: vec!["INBOX".into()],
        }
    }

    fn rule(category: Category, domains: &[&str], keywords: &[&str]) -> CategoryRule {
        CategoryRule {
            category,
            domains: to_strings(domains),
            keywords: to_strings(keywords),
        }
    }

    #[test]
    fn excludes_banking_domain() {
        let classifier = Classifier::with_default_rules(0.3);
        let msg = make_message("billing@bank.com", "Your statement", "Balance update");
        let verdict = classifier.classify(&msg);
        assert_eq!(verdict.category, Category::Excluded);
        assert_eq!(verdict.exclusion_reason.as_deref(), Some("excluded domain"));
        assert_eq!(verdict.score, 0.0);
    }

    #[test]
    fn excludes_banking_subdomain() {
        let classifier = Classifier::with_default_rules(0.3);
        let msg = make_message("alerts@secure.chase.com", "Alert", "Sign-in detected");
        let verdict = classifier.classify(&msg);
        assert_eq!(verdict.exclusion_reason.as_deref(), Some("excluded domain"));
    }

    #[test]
    fn excludes_by_keyword() {
        let classifier = Classifier::with_default_rules(0.3);
        let msg = make_message(
            "hello@example.com",
            "Reminder",
            "Your verification code is 123456",
        );
        let verdict = classifier.classify(&msg);
        assert_eq!(
            verdict.exclusion_reason.as_deref(),
            Some("excluded keyword")
        );
    }

    #[test]
    fn domain_exclusion_checked_before_keywords() {
        // A banking sender whose body is full of tech keywords is still
        // excluded by domain.
        let classifier = Classifier::with_default_rules(0.3);
        let msg = make_message(
            "news@chase.com",
            "Our new api",
            "programming software cloud database",
        );
        assert_eq!(
            classifier.classify(&msg).exclusion_reason.as_deref(),
            Some("excluded domain")
        );
    }

    #[test]
    fn classifies_tech_newsletter_email() {
        let classifier = Classifier::with_default_rules(0.3);
        let msg = make_message(
            "digest@github.com",
            "Open source programming roundup",
            "This week in software engineering: rust, kubernetes, and devops news.",
        );
        let verdict = classifier.classify(&msg);
        assert_eq!(verdict.category, Category::Tech);
        assert!(verdict.score > 0.3);
        assert!(verdict.exclusion_reason.is_none());
    }

    #[test]
    fn no_rule_match_defaults_to_excluded_with_zero_score() {
        let classifier = Classifier::with_default_rules(0.3);
        let msg = make_message("mom@family.example", "Dinner", "See you at seven");
        let verdict = classifier.classify(&msg);
        assert_eq!(verdict.category, Category::Excluded);
        assert_eq!(verdict.score, 0.0);
        assert_eq!(
            verdict.exclusion_reason.as_deref(),
            Some("no inclusion rule matched")
        );
    }

    #[test]
    fn below_threshold_degrades_to_excluded() {
        let rules = ClassifierRules {
            exclude_domains: Vec::new(),
            exclude_keywords: Vec::new(),
            categories: vec![rule(
                Category::Tech,
                &[],
                &["alpha", "beta", "gamma", "delta", "epsilon"],
            )],
        };
        let classifier = Classifier::new(rules, 0.5);
        // 1 of 5 signals = 0.2 < 0.5.
        let msg = make_message("x@example.com", "alpha", "nothing else relevant");
        let verdict = classifier.classify(&msg);
        assert_eq!(
            verdict.exclusion_reason.as_deref(),
            Some("below relevance threshold")
        );
    }

    #[test]
    fn higher_signal_count_wins() {
        let rules = ClassifierRules {
            exclude_domains: Vec::new(),
            exclude_keywords: Vec::new(),
            categories: vec![
                rule(Category::Social, &[], &["shared", "liked your", "commented"]),
                rule(Category::Newsletter, &[], &["digest"]),
            ],
        };
        let classifier = Classifier::new(rules, 0.1);
        let msg = make_message(
            "x@example.com",
            "digest",
            "Someone liked your post and commented on the thread you shared",
        );
        // Social matches 3 signals, newsletter 1.
        assert_eq!(classifier.classify(&msg).category, Category::Social);
    }

    #[test]
    fn equal_counts_resolve_by_fixed_priority() {
        // Every category matches exactly one signal; tech must win.
        let rules = ClassifierRules {
            exclude_domains: Vec::new(),
            exclude_keywords: Vec::new(),
            categories: vec![
                rule(Category::Social, &[], &["shared"]),
                rule(Category::Professional, &[], &["shared"]),
                rule(Category::Newsletter, &[], &["shared"]),
                rule(Category::Tech, &[], &["shared"]),
            ],
        };
        let classifier = Classifier::new(rules, 0.1);
        let msg = make_message("x@example.com", "fyi", "shared");
        assert_eq!(classifier.classify(&msg).category, Category::Tech);

        // Without tech competing, newsletter outranks professional and social.
        let rules = ClassifierRules {
            exclude_domains: Vec::new(),
            exclude_keywords: Vec::new(),
            categories: vec![
                rule(Category::Social, &[], &["shared"]),
                rule(Category::Professional, &[], &["shared"]),
                rule(Category::Newsletter, &[], &["shared"]),
            ],
        };
        let classifier = Classifier::new(rules, 0.1);
        assert_eq!(classifier.classify(&msg).category, Category::Newsletter);
    }

    #[test]
    fn classification_is_pure() {
        let classifier = Classifier::with_default_rules(0.3);
        let msg = make_message(
            "digest@github.com",
            "Weekly programming digest",
            "software engineering and rust news",
        );
        let first = classifier.classify(&msg);
        for _ in 0..5 {
            assert_eq!(classifier.classify(&msg), first);
        }
    }

    #[test]
    fn extract_domain_handles_display_names() {
        assert_eq!(extract_domain("Jane Doe <jane@Example.COM>"), "example.com");
        assert_eq!(extract_domain("plain@host.org"), "host.org");
        assert_eq!(extract_domain("no-at-sign"), "no-at-sign");
    }
}
