//! Property-based tests for planning, citation and scoring invariants.

use proptest::prelude::*;

use chrono::Utc;
use inquest_core::config::MAX_SUB_TASKS;
use inquest_core::research::decomposition::{SubTask, sanitize_plan};
use inquest_core::research::originality::{OriginalityScorer, TfIdfScorer, max_similarity};
use inquest_core::research::revision::accept_revision;
use inquest_core::research::synthesis::{SynthesizedSection, citation_markers, resolve_citations};
use inquest_core::research::{ContentKind, EvidenceItem, EvidenceStore};

fn evidence(n: usize) -> Vec<EvidenceItem> {
    (1..=n)
        .map(|i| EvidenceItem {
            source_id: format!("T1-S{i}"),
            sub_task_id: "T1".into(),
            location: format!("https://example.org/{i}"),
            title: format!("Source {i}"),
            snippet: String::new(),
            content_kind: ContentKind::Text,
            extracted_text: format!("Body text number {i}"),
            retrieved_at: Utc::now(),
        })
        .collect()
}

fn prose_with_markers() -> impl Strategy<Value = String> {
    prop::collection::vec(("[a-z ]{0,20}", 0usize..12), 0..8).prop_map(|parts| {
        parts
            .into_iter()
            .map(|(words, marker)| format!("{words} [S{marker}]."))
            .collect::<Vec<_>>()
            .join(" ")
    })
}

// --- Planning ---

proptest! {
    #[test]
    fn plan_is_bounded_and_non_empty(
        questions in prop::collection::vec("[ a-zA-Z?]{0,30}", 0..12),
        query in "[a-zA-Z][a-zA-Z ]{0,40}",
    ) {
        let candidates: Vec<SubTask> = questions
            .iter()
            .enumerate()
            .map(|(i, q)| SubTask::new(format!("T{}", i + 1), q.clone(), ""))
            .collect();
        let plan = sanitize_plan(&query, candidates);

        prop_assert!(!plan.sub_tasks.is_empty());
        prop_assert!(plan.sub_tasks.len() <= MAX_SUB_TASKS);
        for task in &plan.sub_tasks {
            prop_assert!(!task.question.trim().is_empty());
        }
        let mut ids: Vec<&str> = plan.sub_tasks.iter().map(|t| t.id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        prop_assert_eq!(ids.len(), plan.sub_tasks.len());
    }

    #[test]
    fn plan_ids_are_renumbered_when_duplicated(count in 2usize..10) {
        let candidates: Vec<SubTask> = (0..count)
            .map(|i| SubTask::new("same", format!("Question {i}?"), ""))
            .collect();
        let plan = sanitize_plan("query", candidates);
        let ids: Vec<String> = plan.sub_tasks.iter().map(|t| t.id.clone()).collect();
        let expected: Vec<String> = (1..=count.min(MAX_SUB_TASKS)).map(|i| format!("T{i}")).collect();
        prop_assert_eq!(ids, expected);
    }
}

// --- Citations ---

proptest! {
    #[test]
    fn resolved_citations_are_supplied_sources(
        text in prose_with_markers(),
        supplied in 0usize..6,
    ) {
        let items = evidence(supplied);
        let (cleaned, citations) = resolve_citations(&text, &items);

        for id in &citations {
            prop_assert!(items.iter().any(|e| &e.source_id == id));
        }
        for marker in citation_markers(&cleaned) {
            prop_assert!(marker >= 1 && marker <= supplied);
        }
    }

    #[test]
    fn accepted_revision_keeps_marker_set(
        original in prose_with_markers(),
        candidate in prose_with_markers(),
    ) {
        let section = |text: &str| SynthesizedSection {
            sub_task_id: "T1".into(),
            narrative_text: text.to_string(),
            citations: vec!["T1-S1".into()],
        };
        if let Some(accepted) = accept_revision(&section(&original), &section(&candidate)) {
            prop_assert_eq!(
                citation_markers(&accepted.narrative_text),
                citation_markers(&original)
            );
            prop_assert_eq!(accepted.citations, vec!["T1-S1".to_string()]);
        }
    }
}

// --- Scoring and storage ---

proptest! {
    #[test]
    fn similarity_is_a_unit_interval(
        prose in "[a-z ]{0,80}",
        others in prop::collection::vec("[a-z ]{0,80}", 0..4),
    ) {
        let refs: Vec<&str> = others.iter().map(String::as_str).collect();
        if let Some((idx, score)) = max_similarity(&prose, &refs) {
            prop_assert!(idx < refs.len());
            prop_assert!((0.0..=1.0 + 1e-9).contains(&score));
        }
    }

    #[test]
    fn verdict_flag_matches_threshold(
        prose in "[a-z ]{1,80}",
        threshold in 0.05f64..1.0,
    ) {
        let items = evidence(2);
        let section = SynthesizedSection {
            sub_task_id: "T1".into(),
            narrative_text: format!("{prose} [S1] [S2]"),
            citations: vec!["T1-S1".into(), "T1-S2".into()],
        };
        let verdict = TfIdfScorer::new(threshold).score(&section, &items);
        prop_assert_eq!(verdict.flagged, verdict.score >= threshold);
    }

    #[test]
    fn evidence_store_truncates_to_limit(
        text in "\\PC{0,200}",
        limit in 1usize..100,
    ) {
        let mut store = EvidenceStore::new(limit);
        let mut item = evidence(1).remove(0);
        item.extracted_text = text;
        store.put("T1", item);
        prop_assert!(store.get("T1")[0].extracted_text.chars().count() <= limit);
    }
}
