//! End-to-end behaviour of filter runs over the in-memory store

use crossbeam::channel::Receiver;
use sitesieve::Settings;
use sitesieve::bus::{ProgressEvent, channel_listener};
use sitesieve::lineage::{LineageTree, ListKind};
use sitesieve::session::{ProjectFile, Session};
use sitesieve::store::{
    Annotation, Base, Handle, MalformedRow, MemoryStore, Operation, Record, RecordStore, Row,
    RowStream, SiteKey,
};
use sitesieve::task::{RunOutcome, TaskState};
use std::sync::{Arc, OnceLock};
use tokio_util::sync::CancellationToken;

fn site(position: u64, quality: f64, depth: u32) -> Row {
    Ok(Record::new("chr1", position, Base::A, Base::G).with_quality(quality, depth))
}

fn quality_rows() -> Vec<Row> {
    vec![
        site(1, 25.0, 8),
        site(2, 10.0, 8),
        site(3, 25.0, 3),
        site(4, 19.0, 6),
        site(5, 30.0, 20),
    ]
}

fn bulk_rows(count: u64) -> Vec<Row> {
    (1..=count).map(|p| site(p, 40.0, 30)).collect()
}

fn session_with(rows: Vec<Row>, settings: Settings) -> (Arc<MemoryStore>, Session) {
    let store = Arc::new(MemoryStore::new());
    store.insert_records("rna", rows).unwrap();
    let session = Session::open(store.clone(), "rna", "All sites", ListKind::Site, settings).unwrap();
    (store, session)
}

fn terminal_events(events: &[ProgressEvent]) -> Vec<&ProgressEvent> {
    events.iter().filter(|e| e.is_terminal()).collect()
}

fn drain(receiver: &Receiver<ProgressEvent>) -> Vec<ProgressEvent> {
    receiver.try_iter().collect()
}

#[tokio::test]
async fn test_quality_depth_scenario_keeps_first_and_last() {
    let (store, session) = session_with(quality_rows(), Settings::default());
    let root = session.active().unwrap();

    let mut task = session.task_by_key("quality", root).unwrap();
    task.set_option("quality", "20").unwrap();
    task.set_option("depth", "6").unwrap();
    let report = task.start().unwrap().wait().await.unwrap();

    let list = report.completed().expect("run completes").clone();
    assert_eq!(list.member_count, 2);
    assert_eq!(list.parent, root);

    let positions: Vec<u64> = store
        .stream_rows(&list.backing)
        .unwrap()
        .map(|row| row.unwrap().position)
        .collect();
    assert_eq!(positions, vec![1, 5]);

    let tree = session.snapshot().unwrap();
    let node = tree.list(list.id).unwrap();
    assert_eq!(node.description, "quality >= 20, depth >= 6");
    assert_eq!(node.name, "All sites | Quality/depth filter");
    assert!(node.backing.starts_with("qualityfilter_results"));
}

#[tokio::test]
async fn test_result_attaches_under_given_input_even_if_cursor_moves() {
    let (_store, session) = session_with(quality_rows(), Settings::default());
    let root = session.active().unwrap();

    let mut first = session.task_by_key("editing_type", root).unwrap();
    let a = first.start().unwrap().wait().await.unwrap().completed().unwrap().id;

    let mut second = session.task_by_key("quality", a).unwrap();
    let handle = second.start().unwrap();
    session.set_active(root).unwrap();
    let report = handle.wait().await.unwrap();

    let list = report.completed().unwrap();
    assert_eq!(list.parent, a);
    let tree = session.snapshot().unwrap();
    assert_eq!(tree.parent(list.id), Some(a));
    assert_eq!(tree.active(), root);
}

#[tokio::test]
async fn test_every_listener_sees_exactly_one_terminal_event() {
    let (_store, session) = session_with(bulk_rows(500), Settings::default());
    let root = session.active().unwrap();
    let mut task = session.task_by_key("quality", root).unwrap();

    let receivers: Vec<_> = (0..3)
        .map(|_| {
            let (listener, receiver) = channel_listener();
            let _subscription = task.add_progress_listener(listener);
            receiver
        })
        .collect();

    task.start().unwrap().wait().await.unwrap();

    for receiver in &receivers {
        let events = drain(receiver);
        assert_eq!(events.first(), Some(&ProgressEvent::Started));
        assert_eq!(terminal_events(&events).len(), 1);
        assert!(events.last().unwrap().is_terminal());
    }
}

#[tokio::test]
async fn test_progress_is_monotonic_and_throttled() {
    let total = 10_000;
    let (_store, session) = session_with(bulk_rows(total), Settings::default());
    let root = session.active().unwrap();
    let mut task = session.task_by_key("quality", root).unwrap();
    let (listener, receiver) = channel_listener();
    let _subscription = task.add_progress_listener(listener);

    task.start().unwrap().wait().await.unwrap();

    let updates: Vec<(usize, usize)> = drain(&receiver)
        .into_iter()
        .filter_map(|event| match event {
            ProgressEvent::Updated { current, total, .. } => Some((current, total)),
            _ => None,
        })
        .collect();

    let n = total as usize;
    let step = n / 100 + 1;
    assert!(!updates.is_empty());
    assert!(updates.len() <= n.div_ceil(step));
    assert!(updates.windows(2).all(|w| w[0].0 <= w[1].0));
    assert!(updates.iter().all(|(current, total)| current <= total));
}

/// Delegates to a memory store, cancelling a token while streaming
struct CancellingStore {
    inner: MemoryStore,
    token: OnceLock<CancellationToken>,
    cancel_at: usize,
}

struct CancellingStream {
    inner: RowStream,
    yielded: usize,
    cancel_at: usize,
    token: Option<CancellationToken>,
}

impl Iterator for CancellingStream {
    type Item = Row;

    fn next(&mut self) -> Option<Row> {
        let row = self.inner.next()?;
        self.yielded += 1;
        if self.yielded == self.cancel_at
            && let Some(token) = &self.token
        {
            token.cancel();
        }
        Some(row)
    }
}

impl RecordStore for CancellingStore {
    fn select_working_set(&self, name: &str) -> anyhow::Result<Handle> {
        self.inner.select_working_set(name)
    }

    fn run_filter_operation(
        &self,
        input: &Handle,
        operation: &Operation,
        cancel: &CancellationToken,
    ) -> anyhow::Result<Handle> {
        self.inner.run_filter_operation(input, operation, cancel)
    }

    fn deduplicate(&self, result: &Handle, cancel: &CancellationToken) -> anyhow::Result<Handle> {
        self.inner.deduplicate(result, cancel)
    }

    fn stream_rows(&self, result: &Handle) -> anyhow::Result<RowStream> {
        Ok(Box::new(CancellingStream {
            inner: self.inner.stream_rows(result)?,
            yielded: 0,
            cancel_at: self.cancel_at,
            token: self.token.get().cloned(),
        }))
    }

    fn drop_result(&self, result: &Handle) -> anyhow::Result<()> {
        self.inner.drop_result(result)
    }
}

#[tokio::test]
async fn test_cancellation_after_2500_rows() {
    let inner = MemoryStore::new();
    inner.insert_records("rna", bulk_rows(10_000)).unwrap();
    let store = Arc::new(CancellingStore {
        inner,
        token: OnceLock::new(),
        cancel_at: 2_501,
    });
    let session = Session::open(store.clone(), "rna", "All sites", ListKind::Site, Settings::default()).unwrap();
    let root = session.active().unwrap();

    let mut task = session.task_by_key("quality", root).unwrap();
    store.token.set(task.cancel_token()).unwrap();
    let (listener, receiver) = channel_listener();
    let _subscription = task.add_progress_listener(listener);

    let report = task.start().unwrap().wait().await.unwrap();

    assert_eq!(report.outcome, RunOutcome::Cancelled);
    assert_eq!(report.processed, 2_500);
    assert_eq!(task.state(), TaskState::Cancelled);

    let events = drain(&receiver);
    let terminal = terminal_events(&events);
    assert_eq!(terminal, vec![&ProgressEvent::Cancelled]);
    assert!(!events.iter().any(|e| matches!(e, ProgressEvent::Completed { .. })));
    let last_update = events.iter().rev().find_map(|e| match e {
        ProgressEvent::Updated { current, .. } => Some(*current),
        _ => None,
    });
    assert!(last_update.is_some_and(|current| current <= 2_500));

    let tree = session.snapshot().unwrap();
    assert_eq!(tree.len(), 1);
    assert!(tree.children(root).is_empty());
    assert_eq!(store.inner.table_names(), vec!["rna".to_string()]);
}

#[tokio::test]
async fn test_cancel_before_start_reports_cancelled() {
    let (store, session) = session_with(bulk_rows(100), Settings::default());
    let root = session.active().unwrap();
    let mut task = session.task_by_key("quality", root).unwrap();
    task.cancel_token().cancel();

    let report = task.start().unwrap().wait().await.unwrap();
    assert_eq!(report.outcome, RunOutcome::Cancelled);
    assert_eq!(store.table_names(), vec!["rna".to_string()]);
}

#[tokio::test]
async fn test_empty_result_completes_and_can_be_discarded() {
    let (store, session) = session_with(quality_rows(), Settings::default());
    let root = session.active().unwrap();
    let mut task = session.task_by_key("quality", root).unwrap();
    task.set_option("quality", "99").unwrap();

    let report = task.start().unwrap().wait().await.unwrap();
    let list = report.completed().expect("empty runs still complete").clone();
    assert_eq!(list.member_count, 0);
    assert_eq!(session.snapshot().unwrap().children(root), &[list.id]);

    // Default policy keeps empty lists
    assert!(!session.apply_empty_policy(&report).unwrap());
    session.discard(list.id).unwrap();

    let tree = session.snapshot().unwrap();
    assert!(tree.children(root).is_empty());
    assert!(tree.get(list.id).is_none());
    assert!(!store.contains(&list.backing.table));
}

#[tokio::test]
async fn test_drop_empty_policy_discards_automatically() {
    let mut settings = Settings::default();
    settings.output.drop_empty = true;
    let (_store, session) = session_with(quality_rows(), settings);
    let root = session.active().unwrap();
    let mut task = session.task_by_key("editing_type", root).unwrap();
    task.set_option("alternate", "T").unwrap();

    let report = task.start().unwrap().wait().await.unwrap();
    assert!(session.apply_empty_policy(&report).unwrap());
    assert!(session.snapshot().unwrap().children(root).is_empty());
}

#[tokio::test]
async fn test_store_failure_is_a_single_exception() {
    let (store, session) = session_with(quality_rows(), Settings::default());
    let root = session.active().unwrap();
    let mut task = session.task_by_key("known_snp", root).unwrap();
    task.select_source("missing_table").unwrap();
    let (listener, receiver) = channel_listener();
    let _subscription = task.add_progress_listener(listener);

    let report = task.start().unwrap().wait().await.unwrap();

    match &report.outcome {
        RunOutcome::Failed { cause } => assert!(cause.contains("missing_table")),
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(task.state(), TaskState::Failed);
    let events = drain(&receiver);
    let terminal = terminal_events(&events);
    assert_eq!(terminal.len(), 1);
    assert!(matches!(terminal[0], ProgressEvent::Exception { .. }));
    assert_eq!(session.snapshot().unwrap().len(), 1);
    assert_eq!(store.table_names(), vec!["rna".to_string()]);
}

/// Store whose row stream panics
struct PanickingStore(MemoryStore);

impl RecordStore for PanickingStore {
    fn select_working_set(&self, name: &str) -> anyhow::Result<Handle> {
        self.0.select_working_set(name)
    }

    fn run_filter_operation(
        &self,
        input: &Handle,
        operation: &Operation,
        cancel: &CancellationToken,
    ) -> anyhow::Result<Handle> {
        self.0.run_filter_operation(input, operation, cancel)
    }

    fn deduplicate(&self, result: &Handle, cancel: &CancellationToken) -> anyhow::Result<Handle> {
        self.0.deduplicate(result, cancel)
    }

    fn stream_rows(&self, _result: &Handle) -> anyhow::Result<RowStream> {
        panic!("storage driver bug");
    }

    fn drop_result(&self, result: &Handle) -> anyhow::Result<()> {
        self.0.drop_result(result)
    }
}

#[tokio::test]
async fn test_panic_in_run_becomes_exception() {
    let inner = MemoryStore::new();
    inner.insert_records("rna", quality_rows()).unwrap();
    let store = Arc::new(PanickingStore(inner));
    let session = Session::open(store.clone(), "rna", "All sites", ListKind::Site, Settings::default()).unwrap();
    let root = session.active().unwrap();
    let mut task = session.task_by_key("quality", root).unwrap();
    let (listener, receiver) = channel_listener();
    let _subscription = task.add_progress_listener(listener);

    let report = task.start().unwrap().wait().await.unwrap();

    match &report.outcome {
        RunOutcome::Failed { cause } => assert!(cause.contains("storage driver bug")),
        other => panic!("expected failure, got {other:?}"),
    }
    let events = drain(&receiver);
    assert_eq!(terminal_events(&events).len(), 1);
    assert_eq!(store.0.table_names(), vec!["rna".to_string()]);
}

#[tokio::test]
async fn test_malformed_rows_surface_as_bounded_warnings() {
    let mut rows = quality_rows();
    for line in 0..4 {
        rows.push(Err(MalformedRow {
            origin: format!("calls.tsv:{}", line + 10),
            reason: "bad depth".to_string(),
        }));
    }
    let mut settings = Settings::default();
    settings.pipeline.warning_limit = 3;
    let (_store, session) = session_with(rows, settings);
    let root = session.active().unwrap();
    let mut task = session.task_by_key("quality", root).unwrap();
    let (listener, receiver) = channel_listener();
    let _subscription = task.add_progress_listener(listener);

    let report = task.start().unwrap().wait().await.unwrap();

    assert_eq!(report.warnings.len(), 3);
    assert_eq!(report.suppressed_warnings, 1);
    assert_eq!(report.completed().unwrap().member_count, 2);

    let events = drain(&receiver);
    let warning_positions: Vec<usize> = events
        .iter()
        .enumerate()
        .filter(|(_, e)| matches!(e, ProgressEvent::Warning { .. }))
        .map(|(i, _)| i)
        .collect();
    assert_eq!(warning_positions.len(), 3);
    let terminal_position = events.iter().position(|e| e.is_terminal()).unwrap();
    assert!(warning_positions.iter().all(|&i| i < terminal_position));
    assert_eq!(terminal_position, events.len() - 1);
}

#[tokio::test]
async fn test_malformed_rows_are_reported_once_along_a_chain() {
    let mut rows = quality_rows();
    rows.push(Err(MalformedRow {
        origin: "calls.tsv:9".to_string(),
        reason: "bad depth".to_string(),
    }));
    let (store, session) = session_with(rows, Settings::default());
    let root = session.active().unwrap();
    assert_eq!(session.snapshot().unwrap().list(root).unwrap().member_count, 5);

    let mut quality = session.task_by_key("quality", root).unwrap();
    let first = quality.start().unwrap().wait().await.unwrap();
    let hq = first.completed().unwrap().clone();
    assert_eq!(first.warnings, vec!["malformed row at calls.tsv:9: bad depth".to_string()]);
    assert_eq!(first.input_members, 5);
    assert_eq!(hq.member_count, 2);
    assert_eq!(hq.backing.rows, hq.member_count);
    assert_eq!(store.stream_rows(&hq.backing).unwrap().count(), 2);

    let mut editing = session.task_by_key("editing_type", hq.id).unwrap();
    let second = editing.start().unwrap().wait().await.unwrap();
    let a2g = second.completed().unwrap();
    assert!(second.warnings.is_empty());
    assert_eq!(second.input_members, 2);
    assert_eq!(a2g.member_count, 2);
    assert_eq!(a2g.backing.rows, a2g.member_count);
}

#[tokio::test]
async fn test_duplicate_sites_are_collapsed() {
    let mut rows = quality_rows();
    rows.push(site(1, 50.0, 50));
    rows.push(site(5, 50.0, 50));
    let (_store, session) = session_with(rows, Settings::default());
    let root = session.active().unwrap();
    let mut task = session.task_by_key("quality", root).unwrap();

    let report = task.start().unwrap().wait().await.unwrap();
    assert_eq!(report.completed().unwrap().member_count, 2);
    assert_eq!(report.total, 2);
}

#[tokio::test]
async fn test_annotation_filters_chain() {
    let store = Arc::new(MemoryStore::new());
    store.insert_records("rna", bulk_rows(10)).unwrap();
    store
        .insert_annotation(
            "dbsnp",
            Annotation::known_sites([SiteKey::new("chr1", 2)]),
        )
        .unwrap();
    store
        .insert_annotation(
            "repeats",
            Annotation::regions([("chr1", 5u64, 7u64)]),
        )
        .unwrap();
    let session = Session::open(store.clone(), "rna", "All sites", ListKind::Site, Settings::default()).unwrap();
    let root = session.active().unwrap();

    let mut snp = session.task_by_key("known_snp", root).unwrap();
    assert!(!snp.is_ready());
    assert!(snp.select_source("dbsnp").unwrap());
    let no_snp = snp.start().unwrap().wait().await.unwrap().completed().unwrap().clone();
    assert_eq!(no_snp.member_count, 9);

    let mut repeat = session.task_by_key("repeat_region", no_snp.id).unwrap();
    repeat.select_source("repeats").unwrap();
    let no_repeat = repeat.start().unwrap().wait().await.unwrap().completed().unwrap().clone();

    let positions: Vec<u64> = store
        .stream_rows(&no_repeat.backing)
        .unwrap()
        .map(|row| row.unwrap().position)
        .collect();
    assert_eq!(positions, vec![1, 3, 4, 5, 8, 9, 10]);

    let tree = session.snapshot().unwrap();
    assert_eq!(tree.ancestors(no_repeat.id), vec![no_repeat.id, no_snp.id, root]);
}

#[tokio::test]
async fn test_lineage_survives_project_round_trip() {
    let (_store, session) = session_with(quality_rows(), Settings::default());
    let root = session.active().unwrap();
    for key in ["quality", "editing_type"] {
        let mut task = session.task_by_key(key, root).unwrap();
        let list = task.start().unwrap().wait().await.unwrap().completed().unwrap().clone();
        session.lineage().write().unwrap().set_comments(list.id, "reviewed").unwrap();
    }

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("project.yaml");
    session.save(&path).unwrap();

    let restored: LineageTree = ProjectFile::load(&path).unwrap().lineage().unwrap();
    let original = session.snapshot().unwrap();
    assert_eq!(restored.render(), original.render());
    for (a, b) in restored.preorder().into_iter().zip(original.preorder()) {
        let (a, b) = (restored.list(a).unwrap(), original.list(b).unwrap());
        assert_eq!(
            (&a.name, &a.description, &a.comments, a.member_count, &a.backing),
            (&b.name, &b.description, &b.comments, b.member_count, &b.backing)
        );
    }
}
