use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

use serde_json::json;
use taospipe_core::{
    INSERT_PREFIX, Pipeline, PipelineError, PipelineState, RetryPolicy, Row, Store, StoreError,
};

const FAST: Duration = Duration::from_millis(1);

/// Records every successfully executed statement.
#[derive(Default)]
struct Recording {
    executed: Mutex<Vec<String>>,
}

impl Recording {
    fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }
}

impl Store for Recording {
    fn execute(&self, sql: &str) -> Result<u64, StoreError> {
        self.executed.lock().unwrap().push(sql.to_string());
        Ok(1)
    }

    fn query(&self, _sql: &str) -> Result<Vec<Row>, StoreError> {
        Ok(vec![])
    }
}

/// Blocks every execution until the gate opens.
#[derive(Default)]
struct Gated {
    open: Mutex<bool>,
    cond: Condvar,
    started: AtomicUsize,
    executed: AtomicUsize,
}

impl Gated {
    fn open(&self) {
        *self.open.lock().unwrap() = true;
        self.cond.notify_all();
    }
}

impl Store for Gated {
    fn execute(&self, _sql: &str) -> Result<u64, StoreError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        let mut open = self.open.lock().unwrap();
        while !*open {
            open = self.cond.wait(open).unwrap();
        }
        self.executed.fetch_add(1, Ordering::SeqCst);
        Ok(1)
    }

    fn query(&self, _sql: &str) -> Result<Vec<Row>, StoreError> {
        Ok(vec![])
    }
}

/// Fails the first `fail_first` attempts of every distinct statement.
struct Flaky {
    fail_first: usize,
    attempts: Mutex<HashMap<String, usize>>,
    succeeded: Mutex<Vec<String>>,
}

impl Flaky {
    fn new(fail_first: usize) -> Self {
        Self {
            fail_first,
            attempts: Mutex::new(HashMap::new()),
            succeeded: Mutex::new(Vec::new()),
        }
    }
}

impl Store for Flaky {
    fn execute(&self, sql: &str) -> Result<u64, StoreError> {
        let mut attempts = self.attempts.lock().unwrap();
        let n = attempts.entry(sql.to_string()).or_insert(0);
        *n += 1;
        if *n <= self.fail_first {
            return Err(StoreError::Http {
                status: None,
                message: "connection reset".into(),
            });
        }
        self.succeeded.lock().unwrap().push(sql.to_string());
        Ok(1)
    }

    fn query(&self, _sql: &str) -> Result<Vec<Row>, StoreError> {
        Ok(vec![])
    }
}

fn fragment(tag: char, len: usize) -> String {
    std::iter::once(' ')
        .chain(std::iter::repeat(tag).take(len - 1))
        .collect()
}

fn row(v: serde_json::Value) -> Row {
    match v {
        serde_json::Value::Object(m) => m,
        _ => panic!("not an object"),
    }
}

/// Number of rows packed into an executed statement
fn rows_in(sql: &str) -> usize {
    sql.matches(" VALUES ").count()
}

#[test]
fn hundred_byte_budget_three_fifty_byte_fragments() {
    let store = Arc::new(Recording::default());
    let p = Pipeline::builder(store.clone())
        .workers(1)
        .max_batch_bytes(100)
        .build()
        .unwrap();

    let frags: Vec<String> = ['a', 'b', 'c'].iter().map(|&c| fragment(c, 50)).collect();
    for f in &frags {
        p.append_fragment(f).unwrap();
    }
    assert_eq!(p.pending_bytes(), 50);

    p.await_drain();
    assert_eq!(p.outstanding(), 0);
    assert_eq!(p.pending_bytes(), 0);

    let expected: Vec<String> = frags.iter().map(|f| format!("{INSERT_PREFIX}{f}")).collect();
    assert_eq!(store.executed(), expected);
}

#[test]
fn drain_accounts_for_every_row_across_producers() {
    const PRODUCERS: usize = 8;
    const ROWS: usize = 500;

    let store = Arc::new(Recording::default());
    let p = Arc::new(
        Pipeline::builder(store.clone())
            .workers(4)
            .max_batch_bytes(2048)
            .build()
            .unwrap(),
    );

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|t| {
            let p = p.clone();
            thread::spawn(move || {
                for i in 0..ROWS {
                    let fields = row(json!({"ts": i, "v": t}));
                    p.append_row("db", "meters", &format!("d{t}"), &fields, None)
                        .unwrap();
                }
            })
        })
        .collect();
    for h in producers {
        h.join().unwrap();
    }

    p.await_drain();
    assert_eq!(p.outstanding(), 0);
    assert_eq!(p.pending_bytes(), 0);

    let executed = store.executed();
    let total: usize = executed.iter().map(|s| rows_in(s)).sum();
    assert_eq!(total, PRODUCERS * ROWS);
    for sql in &executed {
        assert!(sql.starts_with(INSERT_PREFIX));
        assert!(sql.len() < 2048);
    }
}

#[test]
fn drain_concurrent_with_producers_is_a_barrier() {
    let store = Arc::new(Recording::default());
    let p = Arc::new(
        Pipeline::builder(store.clone())
            .workers(3)
            .max_batch_bytes(512)
            .build()
            .unwrap(),
    );

    let appended = Arc::new(AtomicUsize::new(0));
    let producer = {
        let p = p.clone();
        let appended = appended.clone();
        thread::spawn(move || {
            for i in 0..2000 {
                p.append_fragment(&format!(" `db`.`t` (`tbname`,`v`) VALUES ('d',{i})"))
                    .unwrap();
                appended.fetch_add(1, Ordering::SeqCst);
            }
        })
    };

    for _ in 0..5 {
        let before = appended.load(Ordering::SeqCst);
        p.await_drain();
        let done: usize = store.executed().iter().map(|s| rows_in(s)).sum();
        assert!(done >= before, "drain returned with {done} < {before} rows applied");
        thread::sleep(Duration::from_millis(2));
    }

    producer.join().unwrap();
    p.await_drain();
    let done: usize = store.executed().iter().map(|s| rows_in(s)).sum();
    assert_eq!(done, 2000);
}

#[test]
fn drain_leaves_pipeline_running() {
    let store = Arc::new(Recording::default());
    let p = Pipeline::builder(store.clone()).workers(2).build().unwrap();

    p.append_fragment(" one VALUES ").unwrap();
    p.await_drain();
    assert_eq!(p.state(), PipelineState::Running);

    p.append_fragment(" two VALUES ").unwrap();
    p.await_drain();
    assert_eq!(store.executed().len(), 2);
}

#[test]
fn close_twice_executes_each_batch_once() {
    let store = Arc::new(Recording::default());
    let p = Pipeline::builder(store.clone())
        .workers(3)
        .max_batch_bytes(64)
        .build()
        .unwrap();

    for i in 0..20 {
        p.append_fragment(&format!(" frag-{i:03}-padding-padding")).unwrap();
    }
    p.close();
    let after_first = store.executed();
    p.close();
    assert_eq!(store.executed(), after_first);
    assert_eq!(p.state(), PipelineState::Closed);
    assert_eq!(p.outstanding(), 0);

    let mut seen: Vec<String> = after_first
        .iter()
        .flat_map(|s| s.split(" frag-").skip(1).map(|f| f[..3].to_string()))
        .collect();
    seen.sort();
    let expected: Vec<String> = (0..20).map(|i| format!("{i:03}")).collect();
    assert_eq!(seen, expected);
}

#[test]
fn concurrent_close_calls_all_return() {
    let store = Arc::new(Recording::default());
    let p = Arc::new(Pipeline::builder(store.clone()).workers(2).build().unwrap());
    p.append_fragment(" x VALUES ").unwrap();

    let closers: Vec<_> = (0..4)
        .map(|_| {
            let p = p.clone();
            thread::spawn(move || {
                p.close();
                p.state()
            })
        })
        .collect();
    for c in closers {
        assert_eq!(c.join().unwrap(), PipelineState::Closed);
    }
    assert_eq!(store.executed().len(), 1);
}

#[test]
fn append_after_close_is_rejected() {
    let p = Pipeline::builder(Recording::default())
        .workers(1)
        .build()
        .unwrap();
    p.close();
    let fields = row(json!({"v": 1}));
    assert!(matches!(
        p.append_row("db", "st", "t", &fields, None),
        Err(PipelineError::Closed)
    ));
}

/// Flush `total` batches from one producer against `workers` stalled
/// workers and a queue of `capacity`; check that exactly `capacity`
/// flushes get through before the producer blocks.
fn assert_flushes_block_at_capacity(workers: usize, capacity: usize, total: usize) {
    let store = Arc::new(Gated::default());
    let p = Arc::new(
        Pipeline::builder(store.clone())
            .workers(workers)
            .queue_capacity(capacity)
            .build()
            .unwrap(),
    );

    let flushed = Arc::new(AtomicUsize::new(0));
    let producer = {
        let p = p.clone();
        let flushed = flushed.clone();
        thread::spawn(move || {
            for i in 0..total {
                p.append_fragment(&format!(" batch-{i}")).unwrap();
                p.flush().unwrap();
                flushed.fetch_add(1, Ordering::SeqCst);
            }
        })
    };

    thread::sleep(Duration::from_millis(150));
    // Executing statements still hold their slots
    assert_eq!(flushed.load(Ordering::SeqCst), capacity);
    assert_eq!(store.started.load(Ordering::SeqCst), capacity.min(workers));
    assert!(!producer.is_finished());
    assert_eq!(p.outstanding(), capacity);

    store.open();
    producer.join().unwrap();
    p.await_drain();
    assert_eq!(store.executed.load(Ordering::SeqCst), total);
    assert_eq!(p.outstanding(), 0);
}

#[test]
fn full_queue_blocks_producer_until_worker_frees_slot() {
    assert_flushes_block_at_capacity(1, 1, 3);
}

#[test]
fn backpressure_counts_in_flight_batches() {
    assert_flushes_block_at_capacity(2, 2, 6);
}

#[test]
fn failed_attempts_are_retried_until_success() {
    let store = Arc::new(Flaky::new(3));
    let p = Pipeline::builder(store.clone())
        .workers(2)
        .retry_interval(FAST)
        .build()
        .unwrap();

    p.append_fragment(" only VALUES ").unwrap();
    p.await_drain();

    assert_eq!(p.outstanding(), 0);
    let succeeded = store.succeeded.lock().unwrap().clone();
    assert_eq!(succeeded, vec![format!("{INSERT_PREFIX} only VALUES ")]);
    let attempts = store.attempts.lock().unwrap();
    assert_eq!(attempts.values().copied().collect::<Vec<_>>(), vec![4]);
}

#[test]
fn panicking_store_does_not_kill_workers() {
    struct PanicOnce {
        calls: AtomicUsize,
        done: AtomicUsize,
    }
    impl Store for PanicOnce {
        fn execute(&self, _sql: &str) -> Result<u64, StoreError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("driver bug");
            }
            self.done.fetch_add(1, Ordering::SeqCst);
            Ok(1)
        }
        fn query(&self, _sql: &str) -> Result<Vec<Row>, StoreError> {
            Ok(vec![])
        }
    }

    let store = Arc::new(PanicOnce {
        calls: AtomicUsize::new(0),
        done: AtomicUsize::new(0),
    });
    let p = Pipeline::builder(store.clone())
        .workers(1)
        .retry_interval(FAST)
        .build()
        .unwrap();
    p.append_fragment(" a").unwrap();
    p.await_drain();
    p.append_fragment(" b").unwrap();
    p.await_drain();
    assert_eq!(store.done.load(Ordering::SeqCst), 2);
    p.close();
}

#[test]
fn drop_drains_outstanding_rows() {
    let store = Arc::new(Recording::default());
    {
        let p = Pipeline::builder(store.clone()).workers(2).build().unwrap();
        p.append_fragment(" pending VALUES ").unwrap();
    }
    assert_eq!(store.executed().len(), 1);
}

#[test]
fn sync_insert_surfaces_error_after_budget() {
    let store = Arc::new(Flaky::new(5));
    let p = Pipeline::builder(store.clone()).workers(1).build().unwrap();
    let fields = row(json!({"v": 1}));

    let err = p
        .insert_row("db", "st", "t1", &fields, None, &RetryPolicy::bounded(1, FAST))
        .unwrap_err();
    assert!(matches!(err, StoreError::Http { .. }));

    let ok = p
        .insert_row("db", "st", "t2", &fields, None, &RetryPolicy::bounded(5, FAST))
        .unwrap();
    assert_eq!(ok, 1);
    assert_eq!(
        store.succeeded.lock().unwrap().as_slice(),
        ["INSERT INTO `db`.`st` (`tbname`,`v`) VALUES ('t2',1)"]
    );
}

#[test]
fn query_passes_through() {
    struct OneRow;
    impl Store for OneRow {
        fn execute(&self, _sql: &str) -> Result<u64, StoreError> {
            Ok(0)
        }
        fn query(&self, sql: &str) -> Result<Vec<Row>, StoreError> {
            Ok(vec![row(json!({"sql": sql}))])
        }
    }
    let p = Pipeline::builder(OneRow).workers(1).build().unwrap();
    let rows = p
        .execute_query("select 1", &RetryPolicy::once())
        .unwrap();
    assert_eq!(rows[0]["sql"], "select 1");
}
