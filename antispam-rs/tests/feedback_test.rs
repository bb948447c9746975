use antispam_rs::config::EngineConfig;
use antispam_rs::geo::GeoResolver;
use antispam_rs::{
    AntispamError, InMemoryArchive, Label, MessageArchive, SpamEngine, Submission, TrainOutcome,
};
use std::sync::Arc;

fn engine_with_archive(config: EngineConfig) -> (SpamEngine, Arc<InMemoryArchive>) {
    let archive = Arc::new(InMemoryArchive::new());
    let engine = SpamEngine::new(
        config,
        GeoResolver::unavailable(16),
        Some(archive.clone() as Arc<dyn MessageArchive>),
    )
    .unwrap();
    (engine, archive)
}

fn submission(id: &str, sender: &str, message: &str) -> Submission {
    Submission::new("contact", sender)
        .with_id(id)
        .with_field("email", "visitor@example.org")
        .with_field("message", message)
        .with_field("honeypot", "")
}

#[test]
fn test_reclassify_is_idempotent() {
    let (engine, _) = engine_with_archive(EngineConfig::default());
    engine.evaluate(&submission("s1", "203.0.113.7", "cheap casino bonus"));

    let first = engine.reclassify("s1", Label::Spam).unwrap();
    assert!(matches!(first, TrainOutcome::Trained { label: Label::Spam, .. }));
    let model_after_first = engine.model().snapshot().unwrap();

    for _ in 0..3 {
        assert_eq!(engine.reclassify("s1", Label::Spam).unwrap(), TrainOutcome::AlreadyTrained);
    }
    assert_eq!(engine.model().snapshot().unwrap(), model_after_first);
    assert_eq!(engine.trainer().offenses("203.0.113.7").unwrap(), 1);
}

#[test]
fn test_reclassify_rejects_unknown_label() {
    let (engine, _) = engine_with_archive(EngineConfig::default());
    engine.evaluate(&submission("s1", "203.0.113.7", "hello"));

    assert!(matches!(
        engine.reclassify("s1", Label::Unknown),
        Err(AntispamError::InvalidLabel(_))
    ));
    assert_eq!(engine.model().training_counts(), (0, 0));
}

#[test]
fn test_reclassify_missing_submission() {
    let (engine, _) = engine_with_archive(EngineConfig::default());
    assert!(matches!(
        engine.reclassify("never-seen", Label::Ham),
        Err(AntispamError::NotFound(_))
    ));
}

#[test]
fn test_honeypot_kept_out_of_training() {
    let (engine, archive) = engine_with_archive(EngineConfig::default());
    let tampered = Submission::new("contact", "203.0.113.7")
        .with_id("s1")
        .with_field("message", "hello")
        .with_field("honeypot", "zanzibar");
    assert!(engine.evaluate(&tampered).is_spam());
    assert!(archive.get("s1").unwrap().unwrap().submission.field("honeypot").is_none());

    engine.reclassify("s1", Label::Spam).unwrap();
    assert!(engine.model().token_counts("zanzibar").unwrap().is_none());
    assert!(engine.model().token_counts("hello").unwrap().is_some());
}

#[test]
fn test_repeat_offender_blacklisted_on_next_evaluation() {
    let config = EngineConfig {
        auto_blacklist_threshold: 2,
        ..EngineConfig::default()
    };
    let (engine, _) = engine_with_archive(config);

    engine.evaluate(&submission("s1", "203.0.113.7", "buy now"));
    engine.evaluate(&submission("s2", "203.0.113.7", "buy again"));

    assert_eq!(
        engine.reclassify("s1", Label::Spam).unwrap(),
        TrainOutcome::Trained {
            label: Label::Spam,
            promoted: None
        }
    );
    assert_eq!(
        engine.reclassify("s2", Label::Spam).unwrap(),
        TrainOutcome::Trained {
            label: Label::Spam,
            promoted: Some("203.0.113.7".to_string())
        }
    );

    let verdict = engine.evaluate(&submission("s3", "203.0.113.7", "a perfectly normal question"));
    assert!(verdict.is_spam());
    assert!(verdict.mentions("blacklist match: 203.0.113.7"));
}

#[test]
fn test_ham_correction_keeps_blacklist() {
    let config = EngineConfig {
        auto_blacklist_threshold: 1,
        ..EngineConfig::default()
    };
    let (engine, _) = engine_with_archive(config);
    engine.evaluate(&submission("s1", "203.0.113.7", "buy now"));
    engine.reclassify("s1", Label::Spam).unwrap();
    assert_eq!(engine.blacklist_entries().unwrap().len(), 1);

    assert!(matches!(
        engine.reclassify("s1", Label::Ham).unwrap(),
        TrainOutcome::Trained { label: Label::Ham, .. }
    ));
    assert_eq!(engine.blacklist_entries().unwrap().len(), 1);
}

#[test]
fn test_concurrent_corrections_train_once() {
    let (engine, _) = engine_with_archive(EngineConfig::default());
    engine.evaluate(&submission("s1", "203.0.113.7", "cheap casino bonus"));

    let trained = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| scope.spawn(|| engine.reclassify("s1", Label::Spam).unwrap()))
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|outcome| matches!(outcome, TrainOutcome::Trained { .. }))
            .count()
    });

    assert_eq!(trained, 1);
    assert_eq!(engine.model().training_counts(), (1, 0));
}

#[test]
fn test_bootstrap_from_existing_archive() {
    let (seed_engine, archive) = engine_with_archive(EngineConfig::default());
    for i in 0..3 {
        seed_engine.evaluate(&submission(&format!("spam-{}", i), "198.51.100.1", "casino jackpot"));
        seed_engine.evaluate(&submission(&format!("ham-{}", i), "198.51.100.2", "meeting agenda"));
        archive.set_label(&format!("spam-{}", i), Label::Spam).unwrap();
    }

    // A fresh engine installed over the same archive
    let engine = SpamEngine::new(
        EngineConfig::default(),
        GeoResolver::unavailable(16),
        Some(archive.clone() as Arc<dyn MessageArchive>),
    )
    .unwrap();
    let summary = engine.bootstrap_from_archive().unwrap();
    assert_eq!(summary.trained, 6);
    assert_eq!(engine.model().training_counts(), (3, 3));

    let verdict = engine.evaluate(&submission("new", "192.0.2.10", "casino jackpot"));
    assert!(verdict.mentions("classifier recommends spam"));
}

#[test]
fn test_reset_allows_retraining() {
    let (engine, _) = engine_with_archive(EngineConfig::default());
    engine.evaluate(&submission("s1", "203.0.113.7", "casino"));
    engine.reclassify("s1", Label::Spam).unwrap();

    engine.reset_model().unwrap();
    assert_eq!(engine.model().training_counts(), (0, 0));

    assert!(matches!(
        engine.reclassify("s1", Label::Spam).unwrap(),
        TrainOutcome::Trained { .. }
    ));
}
