//! Unit tests for pragma-line parsing

use jit_harness::{Directive, DirectiveError, DirectiveSet, Flag, OptionKey};
use proptest::prelude::*;
use std::collections::HashSet;

#[test]
fn test_pragma_found_after_other_comments() {
    let source = "// Bug 1234\n\n// |jit-test| heavy; exitstatus=3\nfoo();\n";
    let set = DirectiveSet::parse_source(source).unwrap();
    assert!(set.has_flag(Flag::Heavy));
    assert_eq!(set.option(OptionKey::ExitStatus), Some("3"));
}

#[test]
fn test_directives_keep_source_order() {
    let set = DirectiveSet::parse_pragma_line("// |jit-test| --b; slow; --a", 1).unwrap();
    let keys: Vec<&str> = set.iter().map(Directive::key).collect();
    assert_eq!(keys, vec!["--b", "slow", "--a"]);
}

#[test]
fn test_engine_flag_values_pass_through() {
    let set = DirectiveSet::parse_pragma_line("// |jit-test| --ion-warmup-threshold=50", 1)
        .unwrap();
    assert_eq!(set.engine_args(), vec!["--ion-warmup-threshold=50"]);
}

#[test]
fn test_errors_carry_line_number() {
    let source = "// header\n// |jit-test| bogus\n";
    match DirectiveSet::parse_source(source).unwrap_err() {
        DirectiveError::UnknownDirective { key, position } => {
            assert_eq!(key, "bogus");
            assert_eq!(position.line, 2);
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[test]
fn test_duplicate_engine_flag() {
    let err = DirectiveSet::parse_pragma_line("// |jit-test| --x; --x=1", 1).unwrap_err();
    assert!(matches!(err, DirectiveError::Duplicate { .. }));
}

#[test]
fn test_every_flag_round_trips_by_name() {
    for flag in Flag::ALL {
        assert_eq!(Flag::from_name(flag.as_str()), Some(flag));
    }
    for key in OptionKey::ALL {
        assert_eq!(OptionKey::from_name(key.as_str()), Some(key));
    }
}

const CONDITIONS: &[&str] = &[
    "helperThreadCount() === 0",
    "!('oomTest' in this)",
    "isFeatureSupported('wasm') && getBuildConfiguration('debug')",
    "helperThreadCount() < 2 || !isFeatureSupported(\"SharedArrayBuffer\")",
    "true",
];

fn clause() -> impl Strategy<Value = String> {
    prop_oneof![
        prop::sample::select(Flag::ALL.to_vec()).prop_map(|f| f.as_str().to_string()),
        prop::collection::vec(1u64..50, 1..4).prop_map(|steps| {
            let mut index = 0;
            let indices: Vec<String> = steps
                .into_iter()
                .map(|step| {
                    index += step;
                    index.to_string()
                })
                .collect();
            format!("oom-at={}", indices.join(","))
        }),
        "[A-Z][a-z]{0,6}Error".prop_map(|kind| format!("error={}", kind)),
        "[a-z ]{1,12}".prop_map(|m| format!("error-message={}", m.trim_end().to_owned() + "x")),
        (-128i32..128).prop_map(|n| format!("exitstatus={}", n)),
        prop::sample::select(vec!["main", "promise-task"])
            .prop_map(|t| format!("oom-thread={}", t)),
        (0u8..=25, prop::option::of(1u32..500)).prop_map(|(mode, freq)| match freq {
            Some(freq) => format!("gc-zeal={},{}", mode, freq),
            None => format!("gc-zeal={}", mode),
        }),
        prop::sample::select(vec!["fresh-global", "fresh-compartment", "same-zone"])
            .prop_map(|r| format!("realm={}", r)),
        "[a-z]{1,8}(-[a-z]{1,5})?".prop_map(|name| format!("--{}", name)),
        ("[a-z]{1,8}", "[a-z0-9]{1,4}").prop_map(|(name, v)| format!("--{}={}", name, v)),
        prop::sample::select(CONDITIONS.to_vec()).prop_map(|c| format!("skip-if: {}", c)),
    ]
}

fn clause_key(clause: &str) -> &str {
    if clause.starts_with("skip-if") {
        return "skip-if";
    }
    clause.split('=').next().unwrap_or(clause)
}

proptest! {
    #[test]
    fn test_display_then_parse_is_identity(
        clauses in prop::collection::vec(clause(), 0..8),
        separator in prop::sample::select(vec![";", " ; ", ";  ", "  ;"]),
    ) {
        let mut seen = HashSet::new();
        let unique: Vec<String> = clauses
            .into_iter()
            .filter(|c| seen.insert(clause_key(c).to_string()))
            .collect();
        let line = format!("// |jit-test| {}", unique.join(separator));

        let parsed = DirectiveSet::parse_pragma_line(&line, 1).unwrap();
        prop_assert_eq!(parsed.len(), unique.len());

        let reparsed = DirectiveSet::parse_pragma_line(&parsed.to_string(), 1).unwrap();
        prop_assert_eq!(&parsed, &reparsed);
        prop_assert_eq!(parsed.to_string(), reparsed.to_string());
    }
}
