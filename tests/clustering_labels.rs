// tests/clustering_labels.rs
// Clustering through the full pipeline: alias-matched entities drive the
// co-occurrence graph, and labels come out deterministic.

use chrono::{Duration, TimeZone, Utc};
use narrative_radar::pipeline::CancelFlag;
use narrative_radar::{pipeline, PipelineConfig, RawEvent, RunContext, SourceTag, TimeWindow};

const CONFIG_TOML: &str = r#"
[aliases]
firedancer = ["firedancer"]
jump-crypto = ["jump crypto"]
solana-validators = ["solana validators"]
"#;

fn ctx() -> RunContext {
    let window_start = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
    let window_end = Utc.with_ymd_and_hms(2025, 6, 15, 0, 0, 0).unwrap();
    RunContext {
        run_id: "run_labels".to_string(),
        generated_at: window_end,
        window: TimeWindow::new(window_start, window_end),
        baseline: TimeWindow::new(window_start - Duration::days(42), window_start),
    }
}

fn raw(source: SourceTag, day: i64, title: &str) -> RawEvent {
    RawEvent {
        source: Some(source),
        timestamp: Some(Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap() + Duration::days(day)),
        title: title.to_string(),
        ..Default::default()
    }
}

#[test]
fn label_uses_top_two_entities_with_lexicographic_tiebreak() {
    // Intra-cluster entity counts: firedancer 6, jump-crypto 4,
    // solana-validators 4. Expected label: "Firedancer & Jump Crypto".
    let events = vec![
        raw(SourceTag::Twitter, 0, "Jump Crypto ships new firedancer scheduler"),
        raw(SourceTag::Twitter, 1, "Firedancer benchmarks from Jump Crypto impress"),
        raw(SourceTag::Github, 2, "jump crypto tags a firedancer release"),
        raw(SourceTag::RssBlog, 3, "What Jump Crypto's firedancer work means"),
        raw(SourceTag::Twitter, 4, "Solana validators begin firedancer dry runs"),
        raw(SourceTag::Github, 5, "firedancer configs for solana validators published"),
        raw(SourceTag::RssBlog, 6, "Solana validators debate client diversity"),
        raw(SourceTag::Twitter, 7, "More solana validators join the test cohort"),
    ];
    let cfg = PipelineConfig::from_toml_str(CONFIG_TOML).unwrap();
    let artifact = pipeline::run(&cfg, &ctx(), events, &CancelFlag::new()).unwrap();

    assert_eq!(artifact.narratives.len(), 1);
    assert_eq!(artifact.narratives[0].label, "Firedancer & Jump Crypto");
}

#[test]
fn disjoint_entity_groups_stay_separate_narratives() {
    let mut events = Vec::new();
    for i in 0..4 {
        events.push(raw(SourceTag::Twitter, i, &format!("firedancer progress note {i}")));
    }
    for i in 0..4 {
        events.push(raw(
            SourceTag::Github,
            i + 4,
            &format!("solana validators operations report {i}"),
        ));
    }
    let cfg = PipelineConfig::from_toml_str(CONFIG_TOML).unwrap();
    let artifact = pipeline::run(&cfg, &ctx(), events, &CancelFlag::new()).unwrap();

    let labels: Vec<&str> = artifact.narratives.iter().map(|n| n.label.as_str()).collect();
    assert!(labels.contains(&"Firedancer"), "labels: {labels:?}");
    assert!(labels.contains(&"Solana Validators"), "labels: {labels:?}");
}

#[test]
fn repeated_clustering_gives_the_same_partition() {
    let events: Vec<RawEvent> = (0..6)
        .map(|i| {
            raw(
                if i % 2 == 0 { SourceTag::Twitter } else { SourceTag::Github },
                i,
                &format!("firedancer and jump crypto iteration {i}"),
            )
        })
        .collect();
    let cfg = PipelineConfig::from_toml_str(CONFIG_TOML).unwrap();
    let a = pipeline::run(&cfg, &ctx(), events.clone(), &CancelFlag::new()).unwrap();
    let b = pipeline::run(&cfg, &ctx(), events, &CancelFlag::new()).unwrap();

    let members_a: Vec<&Vec<String>> = a.narratives.iter().map(|n| &n.members).collect();
    let members_b: Vec<&Vec<String>> = b.narratives.iter().map(|n| &n.members).collect();
    assert_eq!(members_a, members_b);
}
