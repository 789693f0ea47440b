//! Integration tests for the rule model: namespace resolution, edit
//! invariants and the effective-rules ordering contract.

use routectl::{
    generate, namespace, ControlError, CountryGroup, CustomRulePatch, CustomRuleSpec, Filter,
    GenerateOptions, RuleEntry, RuleStore, RuleType,
};

fn hk() -> CountryGroup {
    CountryGroup {
        code: "HK".to_string(),
        emoji: "🇭🇰".to_string(),
        name: "香港".to_string(),
        node_count: 4,
    }
}

fn streaming(enabled: bool) -> Filter {
    Filter {
        id: "filter-streaming".to_string(),
        name: "Streaming".to_string(),
        enabled,
    }
}

fn domain_spec(name: &str, outbound: &str, priority: i32) -> CustomRuleSpec {
    CustomRuleSpec::new(
        name,
        RuleType::DomainSuffix,
        vec![format!("{}.example.com", name)],
        outbound,
    )
    .with_priority(priority)
}

#[test]
fn test_namespace_is_deterministic_with_built_ins_first() {
    let groups = vec![hk()];
    let filters = vec![streaming(true)];

    let first = namespace::resolve(&groups, &filters);
    let second = namespace::resolve(&groups, &filters);
    assert_eq!(first, second);

    assert_eq!(first[0].label, "Proxy");
    assert_eq!(first[1].label, "DIRECT");
    assert_eq!(first[2].label, "REJECT");
}

#[test]
fn test_effective_rules_order_for_mixed_priorities() {
    // Priorities [50, 10, 10, 90] created in that order must come out as
    // [10(a), 10(b), 50, 90], with rule groups always ahead of customs.
    let store = RuleStore::new();
    let p50 = store
        .create_custom_rule(domain_spec("p50", "Proxy", 50), &[])
        .unwrap();
    let p10a = store
        .create_custom_rule(domain_spec("p10a", "Proxy", 10), &[])
        .unwrap();
    let p10b = store
        .create_custom_rule(domain_spec("p10b", "Proxy", 10), &[])
        .unwrap();
    let p90 = store
        .create_custom_rule(domain_spec("p90", "Proxy", 90), &[])
        .unwrap();

    let entries = store.effective_rules();
    let custom_ids: Vec<String> = entries
        .iter()
        .filter_map(|e| match e {
            RuleEntry::Custom(r) => Some(r.id.clone()),
            RuleEntry::Group(_) => None,
        })
        .collect();
    assert_eq!(custom_ids, vec![p10a.id, p10b.id, p50.id, p90.id]);

    let first_custom = entries
        .iter()
        .position(|e| matches!(e, RuleEntry::Custom(_)))
        .unwrap();
    assert!(entries[..first_custom]
        .iter()
        .all(|e| matches!(e, RuleEntry::Group(_))));
}

#[test]
fn test_toggle_and_retarget_sequences_never_leak_disabled_entities() {
    let store = RuleStore::new();
    let ns = namespace::resolve(&[hk()], &[streaming(true)]);

    let rule = store
        .create_custom_rule(domain_spec("ads", "REJECT", 1), &ns)
        .unwrap();

    // An arbitrary toggle/retarget sequence.
    store.toggle_rule_group("google", false).unwrap();
    store.toggle_rule_group("google", true).unwrap();
    store.toggle_rule_group("google", false).unwrap();
    store
        .set_rule_group_outbound("cn", "🇭🇰 香港", &ns)
        .unwrap();
    store.toggle_custom_rule(&rule.id, false).unwrap();

    for entry in store.effective_rules() {
        match entry {
            RuleEntry::Group(g) => assert!(g.enabled, "disabled group '{}' leaked", g.id),
            RuleEntry::Custom(r) => assert!(r.enabled, "disabled rule '{}' leaked", r.id),
        }
    }
}

#[test]
fn test_invalid_outbound_leaves_entity_unchanged() {
    let store = RuleStore::new();
    let ns = namespace::resolve(&[hk()], &[]);

    let before = store.get_rule_group("google").unwrap();
    let err = store
        .set_rule_group_outbound("google", "No Such Target", &ns)
        .unwrap_err();
    assert!(matches!(err, ControlError::InvalidOutbound(_)));

    let after = store.get_rule_group("google").unwrap();
    assert_eq!(after.outbound, before.outbound);
    assert_eq!(store.version(), 0);
}

#[test]
fn test_update_round_trip_with_identical_patch_is_stable() {
    let store = RuleStore::new();
    let ns = namespace::resolve(&[], &[streaming(true)]);
    let rule = store
        .create_custom_rule(domain_spec("media", "Streaming", 20), &ns)
        .unwrap();
    let version = store.version();

    let patch = CustomRulePatch::new()
        .with_name(rule.name.clone())
        .with_values(rule.values.clone())
        .with_outbound(rule.outbound.clone())
        .with_enabled(rule.enabled)
        .with_priority(rule.priority);
    let updated = store.update_custom_rule(&rule.id, patch, &ns).unwrap();

    assert_eq!(updated.id, rule.id);
    assert_eq!(updated.name, rule.name);
    assert_eq!(updated.values, rule.values);
    assert_eq!(updated.outbound, rule.outbound);
    assert_eq!(updated.priority, rule.priority);
    assert_eq!(store.version(), version);
}

#[test]
fn test_generated_route_section_mirrors_effective_rules() {
    let store = RuleStore::new();
    let ns = namespace::resolve(&[hk()], &[]);

    store
        .create_custom_rule(domain_spec("low", "DIRECT", 5), &ns)
        .unwrap();
    store
        .create_custom_rule(domain_spec("high", "🇭🇰 香港", 500), &ns)
        .unwrap();

    let entries = store.effective_rules();
    let doc = generate(&entries, &ns, &GenerateOptions::default()).unwrap();

    assert_eq!(doc.route.rules.len(), entries.len());
    for (rule, entry) in doc.route.rules.iter().zip(entries.iter()) {
        assert_eq!(rule.outbound, entry.outbound());
    }
}

#[test]
fn test_generation_flags_dangling_outbound_after_filter_disappears() {
    let store = RuleStore::new();
    let ns = namespace::resolve(&[], &[streaming(true)]);
    store
        .create_custom_rule(domain_spec("media", "Streaming", 10), &ns)
        .unwrap();

    // The filter gets disabled: the namespace shrinks, the store keeps the
    // now-stale reference, and generation is where it surfaces.
    let shrunk = namespace::resolve(&[], &[streaming(false)]);
    let err = generate(&store.effective_rules(), &shrunk, &GenerateOptions::default()).unwrap_err();
    assert!(matches!(err, ControlError::InvalidOutbound(_)));
}
