//! Preset rule-group seeds.
//!
//! Seeded into every store at startup. Presets are never deleted at runtime;
//! the operator only toggles them or retargets their outbound.

use once_cell::sync::Lazy;

use crate::types::RuleGroup;

fn group(
    id: &str,
    name: &str,
    site_rules: &[&str],
    ip_rules: &[&str],
    outbound: &str,
    enabled: bool,
) -> RuleGroup {
    RuleGroup {
        id: id.to_string(),
        name: name.to_string(),
        site_rules: site_rules.iter().map(|s| s.to_string()).collect(),
        ip_rules: ip_rules.iter().map(|s| s.to_string()).collect(),
        outbound: outbound.to_string(),
        enabled,
    }
}

static PRESET_GROUPS: Lazy<Vec<RuleGroup>> = Lazy::new(|| {
    vec![
        group("ad-block", "Ad Block", &["category-ads-all"], &[], "REJECT", true),
        group(
            "ai-services",
            "AI Services",
            &["openai", "anthropic", "google-gemini"],
            &[],
            "Proxy",
            true,
        ),
        group("google", "Google", &["google"], &["google"], "Proxy", true),
        group("youtube", "YouTube", &["youtube"], &[], "Proxy", true),
        group("github", "GitHub", &["github"], &[], "Proxy", true),
        group("telegram", "Telegram", &["telegram"], &["telegram"], "Proxy", true),
        group("twitter", "Twitter", &["twitter", "x"], &["twitter"], "Proxy", false),
        group("netflix", "Netflix", &["netflix"], &["netflix"], "Proxy", false),
        group("spotify", "Spotify", &["spotify"], &[], "Proxy", false),
        group("apple", "Apple", &["apple"], &[], "DIRECT", false),
        group("microsoft", "Microsoft", &["microsoft"], &[], "DIRECT", false),
        group(
            "cn",
            "China Direct",
            &["geolocation-cn"],
            &["cn"],
            "DIRECT",
            true,
        ),
        group("private", "Private Network", &["private"], &["private"], "DIRECT", true),
    ]
});

/// The seed rule groups, cloned fresh for a new store.
pub(crate) fn seed_rule_groups() -> Vec<RuleGroup> {
    PRESET_GROUPS.clone()
}
