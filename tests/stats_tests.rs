//! Statistical filters driven through `sh` scripts
#![cfg(unix)]

use sitesieve::Settings;
use sitesieve::bus::{ProgressEvent, channel_listener};
use sitesieve::lineage::ListKind;
use sitesieve::session::Session;
use sitesieve::store::{Base, MemoryStore, Record, RecordStore};
use sitesieve::task::{RunOutcome, TaskState};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Fisher-style script: sites with at least 5 edited reads are significant
const FISHER_SCRIPT: &str = r#"
while IFS="$(printf '\t')" read -r chrom pos ref alt qual depth rc ac; do
  if [ "$ac" -ge 5 ]; then p=0.001; else p=0.5; fi
  printf '%s\t%s\t%s\t%s\n' "$chrom" "$pos" "$p" "$p"
done < "$1" > "$2"
"#;

/// Likelihood-ratio script: the score is the edited read count
const LLR_SCRIPT: &str = r#"
while IFS="$(printf '\t')" read -r chrom pos ref alt qual depth rc ac; do
  printf '%s\t%s\t%s\n' "$chrom" "$pos" "$ac"
done < "$1" > "$2"
"#;

/// Likelihood-ratio script that cannot score low-coverage sites
const LLR_NA_SCRIPT: &str = r#"
while IFS="$(printf '\t')" read -r chrom pos ref alt qual depth rc ac; do
  if [ "$ac" -ge 5 ]; then v=$ac; else v=NA; fi
  printf '%s\t%s\t%s\n' "$chrom" "$pos" "$v"
done < "$1" > "$2"
"#;

struct StatsScenario {
    dir: TempDir,
    store: Arc<MemoryStore>,
    session: Session,
}

impl StatsScenario {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        let counts = [(10, 0), (4, 6), (8, 2), (1, 9), (5, 5)];
        let rows = counts
            .iter()
            .enumerate()
            .map(|(i, &(rc, ac))| {
                Ok(Record::new("chr2", i as u64 + 100, Base::A, Base::G)
                    .with_quality(30.0, rc + ac)
                    .with_counts(rc, ac))
            })
            .collect();
        store.insert_records("rna", rows).unwrap();

        let mut settings = Settings::default();
        settings.stats.interpreter = "sh".to_string();
        settings.stats.poll_interval_ms = 10;
        let session = Session::open(store.clone(), "rna", "All sites", ListKind::Site, settings).unwrap();
        Self { dir, store, session }
    }

    fn script(&self, name: &str, body: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, body).unwrap();
        path
    }

    fn positions(&self, table: &sitesieve::store::Handle) -> Vec<u64> {
        self.store
            .stream_rows(table)
            .unwrap()
            .map(|row| row.unwrap().position)
            .collect()
    }
}

fn path_str(path: &Path) -> &str {
    path.to_str().unwrap()
}

#[tokio::test]
async fn test_fisher_filter_keeps_significant_sites() {
    let scenario = StatsScenario::new();
    let script = scenario.script("fisher.sh", FISHER_SCRIPT);
    let root = scenario.session.active().unwrap();

    let mut task = scenario.session.task_by_key("fisher", root).unwrap();
    assert!(!task.is_ready());
    task.set_option("script", path_str(&script)).unwrap();
    assert!(task.is_ready());

    let report = task.start().unwrap().wait().await.unwrap();
    let list = report.completed().expect("fisher run completes");
    assert_eq!(scenario.positions(&list.backing), vec![101, 103, 104]);

    let tree = scenario.session.snapshot().unwrap();
    assert!(tree.list(list.id).unwrap().backing.starts_with("fetfilter_results"));
}

#[tokio::test]
async fn test_likelihood_ratio_threshold_is_inclusive() {
    let scenario = StatsScenario::new();
    let script = scenario.script("llr.sh", LLR_SCRIPT);
    let root = scenario.session.active().unwrap();

    let mut task = scenario.session.task_by_key("likelihood_ratio", root).unwrap();
    task.set_option("script", path_str(&script)).unwrap();
    task.set_option("threshold", "6").unwrap();

    let report = task.start().unwrap().wait().await.unwrap();
    let list = report.completed().expect("likelihood ratio run completes");
    assert_eq!(scenario.positions(&list.backing), vec![101, 103]);
    assert_eq!(scenario.session.snapshot().unwrap().list(list.id).unwrap().description, "LLR >= 6");
}

#[tokio::test]
async fn test_unscored_sites_become_warnings() {
    let scenario = StatsScenario::new();
    let script = scenario.script("llr_na.sh", LLR_NA_SCRIPT);
    let root = scenario.session.active().unwrap();

    let mut task = scenario.session.task_by_key("likelihood_ratio", root).unwrap();
    task.set_option("script", path_str(&script)).unwrap();
    let (listener, receiver) = channel_listener();
    let _subscription = task.add_progress_listener(listener);

    let report = task.start().unwrap().wait().await.unwrap();
    let list = report.completed().expect("NA values do not fail the run");
    assert_eq!(scenario.positions(&list.backing), vec![101, 103, 104]);
    assert_eq!(report.warnings.len(), 2);
    assert!(report.warnings.iter().all(|w| w.contains("'NA'")));

    let events: Vec<_> = receiver.try_iter().collect();
    let warnings = events
        .iter()
        .filter(|e| matches!(e, ProgressEvent::Warning { .. }))
        .count();
    assert_eq!(warnings, 2);
    assert!(matches!(events.last(), Some(ProgressEvent::Completed { .. })));
}

#[tokio::test]
async fn test_failing_script_reports_its_stderr() {
    let scenario = StatsScenario::new();
    let script = scenario.script("broken.sh", "echo 'model did not converge' >&2\nexit 3\n");
    let root = scenario.session.active().unwrap();

    let mut task = scenario.session.task_by_key("likelihood_ratio", root).unwrap();
    task.set_option("script", path_str(&script)).unwrap();
    let (listener, receiver) = channel_listener();
    let _subscription = task.add_progress_listener(listener);

    let report = task.start().unwrap().wait().await.unwrap();
    match &report.outcome {
        RunOutcome::Failed { cause } => assert!(cause.contains("model did not converge")),
        other => panic!("expected failure, got {other:?}"),
    }
    let events: Vec<_> = receiver.try_iter().collect();
    assert!(matches!(events.last(), Some(ProgressEvent::Exception { .. })));
    assert_eq!(scenario.store.table_names(), vec!["rna".to_string()]);
}

#[tokio::test]
async fn test_cancelling_kills_a_slow_script() {
    let scenario = StatsScenario::new();
    let script = scenario.script("slow.sh", "sleep 30\n");
    let root = scenario.session.active().unwrap();

    let mut task = scenario.session.task_by_key("likelihood_ratio", root).unwrap();
    task.set_option("script", path_str(&script)).unwrap();

    let handle = task.start().unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    handle.cancel();

    let report = tokio::time::timeout(Duration::from_secs(10), handle.wait())
        .await
        .expect("cancelled script stops promptly")
        .unwrap();
    assert_eq!(report.outcome, RunOutcome::Cancelled);
    assert_eq!(task.state(), TaskState::Cancelled);
    assert!(scenario.session.snapshot().unwrap().children(root).is_empty());
}

#[tokio::test]
async fn test_missing_interpreter_fails_the_run() {
    let scenario = StatsScenario::new();
    let script = scenario.script("llr.sh", LLR_SCRIPT);
    let mut settings = scenario.session.settings().clone();
    settings.stats.interpreter = "sitesieve-no-such-interpreter".to_string();
    let session = Session::open(scenario.store.clone(), "rna", "All sites", ListKind::Site, settings).unwrap();
    let root = session.active().unwrap();

    let mut task = session.task_by_key("likelihood_ratio", root).unwrap();
    task.set_option("script", path_str(&script)).unwrap();

    let report = task.start().unwrap().wait().await.unwrap();
    match &report.outcome {
        RunOutcome::Failed { cause } => assert!(cause.contains("not found")),
        other => panic!("expected failure, got {other:?}"),
    }
}
