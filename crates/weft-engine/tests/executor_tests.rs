//! End-to-end tests for the worker pool, task queue and batch runner
#![cfg(test)]
#![allow(
    clippy::expect_used,
    clippy::min_ident_chars,
    clippy::shadow_unrelated,
    clippy::absolute_paths,
    clippy::missing_panics_doc,
    clippy::assertions_on_result_states,
    reason = "Test code prioritizes clarity over efficiency"
)]

use std::result::Result as StdResult;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use weft_engine::{
    EngineError, JOURNAL_FAILURE_CODE, PoolConfig, Task, TaskBase, TaskContext, TaskFailure,
    TaskQueue, TaskStatus, UNEXPECTED_FAILURE_CODE, WorkerHooks, WorkerPool, run_batch,
};
use weft_journal::{EngineMutex, Journal, Model, NodeId, SharedBuffer};

#[derive(Debug, Clone, PartialEq, Eq)]
struct Section {
    label: String,
    points: Vec<i64>,
}

impl Section {
    fn new(label: &str, points: &[i64]) -> Self {
        Self {
            label: label.to_owned(),
            points: points.to_vec(),
        }
    }
}

fn init_tracing() {
    drop(
        tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::DEBUG)
            .try_init(),
    );
}

fn seeded_model(count: usize) -> (Arc<Model<Section>>, Journal<Section>, Vec<NodeId>) {
    let model = Model::new();
    let mut main = Journal::new();
    let nodes = (0..count)
        .map(|index| {
            match model.create(&mut main, Section::new(&format!("seed-{index}"), &[0, 1])) {
                Ok(node) => node,
                Err(error) => panic!("seed failed: {error}"),
            }
        })
        .collect();
    (model, main, nodes)
}

/// Offsets one section and adds a derived one; optionally fails or panics afterwards.
struct Offset {
    base: TaskBase,
    node: NodeId,
    offset: i64,
    delay: Duration,
    fail_with: Option<i32>,
    panic: bool,
    derived: Option<NodeId>,
}

impl Offset {
    fn new(node: NodeId, offset: i64) -> Self {
        Self {
            base: TaskBase::new(),
            node,
            offset,
            delay: Duration::ZERO,
            fail_with: None,
            panic: false,
            derived: None,
        }
    }

    fn failing(mut self, code: i32) -> Self {
        self.fail_with = Some(code);
        self
    }

    fn panicking(mut self) -> Self {
        self.panic = true;
        self
    }

    fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

impl Task for Offset {
    type Node = Section;

    fn base(&self) -> &TaskBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut TaskBase {
        &mut self.base
    }

    fn process(&mut self, ctx: &mut TaskContext<'_, Section>) -> StdResult<(), TaskFailure> {
        thread::sleep(self.delay);

        let mut copy = ctx.working_copy(self.node)?;
        for point in &mut copy.points {
            *point += self.offset;
        }
        let label = format!("{}+{}", copy.label, self.offset);
        let points = copy.points.clone();
        ctx.store(copy)?;
        let derived = ctx.create(Section { label, points })?;

        if let Some(code) = self.fail_with {
            return Err(TaskFailure::new(code, "induced failure"));
        }
        assert!(!self.panic, "induced panic");

        self.derived = Some(derived);
        Ok(())
    }
}

#[test]
fn test_fail_soft_batch_collects_every_task() {
    init_tracing();
    let (model, mut main, nodes) = seeded_model(10);
    let seeds_before = model.snapshot();

    let mut tasks: Vec<Offset> = nodes
        .iter()
        .enumerate()
        .map(|(index, node)| {
            let task = Offset::new(*node, 10);
            if matches!(index, 2 | 5 | 9) {
                task.failing(40 + index as i32)
            } else {
                task
            }
        })
        .collect();

    let result = run_batch(&model, &mut tasks, 4, WorkerHooks::new(), &mut main);
    assert!(matches!(
        result,
        Err(EngineError::TasksFailed {
            failed: 3,
            first_code: 42
        })
    ));

    assert_eq!(tasks.len(), 10);
    for (index, task) in tasks.iter().enumerate() {
        assert_eq!(task.id(), Some(index));
        if matches!(index, 2 | 5 | 9) {
            assert_eq!(task.status(), TaskStatus::Failed(40 + index as i32));
            assert!(task.derived.is_none());
            assert_eq!(model.get(task.node).map(|section| (*section).clone()), seeds_before.get(task.node).cloned());
        } else {
            assert_eq!(task.status(), TaskStatus::Succeeded);
            assert!(task.derived.is_some());
        }
    }

    let succeeded = tasks.iter().filter(|task| task.status().is_success()).count();
    assert_eq!(succeeded, 7);
    assert_eq!(model.len(), 10 + 7);
    // 10 seeds + 7 successful tasks x (modify + create)
    assert_eq!(main.len(), 10 + 7 * 2);
}

#[test]
fn test_splice_order_follows_submission_not_completion() {
    init_tracing();
    let (model, mut main, nodes) = seeded_model(8);
    let seeded = main.len();

    let mut pool = WorkerPool::new(Arc::clone(&model), PoolConfig::default());
    if let Err(error) = pool.initialize(4, WorkerHooks::new()) {
        panic!("initialize failed: {error}");
    }
    let mut queue = TaskQueue::new(pool);

    // Pseudo-random latencies so completion order differs from submission order.
    let mut state: u64 = 0x2545_f491_4f6c_dd1d;
    for (index, node) in nodes.iter().enumerate() {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        let delay = Duration::from_millis(state % 40);
        let task = Offset::new(*node, index as i64).delayed(delay);
        if let Err(error) = queue.add_and_dispatch(task) {
            panic!("dispatch failed: {error}");
        }
    }

    if let Err(error) = queue.wait_for_completion(&mut main) {
        panic!("wave failed: {error}");
    }

    let spliced: Vec<NodeId> = main.records()[seeded..]
        .iter()
        .step_by(2)
        .map(weft_journal::Change::node)
        .collect();
    assert_eq!(spliced, nodes);

    let derived_labels: Vec<String> = main.records()[seeded..]
        .iter()
        .skip(1)
        .step_by(2)
        .filter_map(|change| change.resulting_value().map(|section| section.label.clone()))
        .collect();
    let expected: Vec<String> = (0..nodes.len())
        .map(|index| format!("seed-{index}+{index}"))
        .collect();
    assert_eq!(derived_labels, expected);
}

/// Mutates a private copy, then reports what it saw of the peer's node before either stored.
struct Peek {
    base: TaskBase,
    own: NodeId,
    peer: NodeId,
    rendezvous: Arc<Barrier>,
    peer_seen: Option<Section>,
    journal_before_store: usize,
}

impl Task for Peek {
    type Node = Section;

    fn base(&self) -> &TaskBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut TaskBase {
        &mut self.base
    }

    fn process(&mut self, ctx: &mut TaskContext<'_, Section>) -> StdResult<(), TaskFailure> {
        let mut copy = ctx.working_copy(self.own)?;
        copy.points.push(99);
        copy.label.push_str("-edited");

        self.rendezvous.wait();
        self.peer_seen = ctx.get(self.peer).map(|section| (*section).clone());
        self.journal_before_store = ctx.journal_len();
        self.rendezvous.wait();

        ctx.store(copy)?;
        Ok(())
    }
}

#[test]
fn test_tasks_do_not_see_each_others_uncommitted_work() {
    init_tracing();
    let (model, mut main, nodes) = seeded_model(2);
    let rendezvous = Arc::new(Barrier::new(2));

    let peek = |own: NodeId, peer: NodeId| Peek {
        base: TaskBase::new(),
        own,
        peer,
        rendezvous: Arc::clone(&rendezvous),
        peer_seen: None,
        journal_before_store: usize::MAX,
    };
    let mut tasks = vec![peek(nodes[0], nodes[1]), peek(nodes[1], nodes[0])];

    if let Err(error) = run_batch(&model, &mut tasks, 2, WorkerHooks::new(), &mut main) {
        panic!("batch failed: {error}");
    }

    for task in &tasks {
        let seen = task.peer_seen.as_ref().expect("peer node readable");
        assert_eq!(seen.points, vec![0, 1]);
        assert!(!seen.label.ends_with("-edited"));
        assert_eq!(task.journal_before_store, 0);
    }
    for node in &nodes {
        let section = model.get(*node).expect("node exists");
        assert!(section.label.ends_with("-edited"));
    }
}

#[test]
fn test_pool_reuse_across_waves() {
    init_tracing();
    let (model, mut main, nodes) = seeded_model(6);

    let mut pool = WorkerPool::new(Arc::clone(&model), PoolConfig::default());
    if let Err(error) = pool.initialize(3, WorkerHooks::new()) {
        panic!("initialize failed: {error}");
    }
    let mut queue = TaskQueue::new(pool);

    for wave in nodes.chunks(3) {
        for node in wave {
            if let Err(error) = queue.add_and_dispatch(Offset::new(*node, 1)) {
                panic!("dispatch failed: {error}");
            }
        }
        assert!(queue.wait_for_completion(&mut main).is_ok());

        assert_eq!(queue.outstanding(), 0);
        assert!(matches!(queue.pool().thread_count(), Ok(3)));
        assert_eq!(queue.pool().journal_pool_size(), 3);
        assert_eq!(queue.pool().journals_created(), 3);
    }

    assert_eq!(queue.len(), 6);
    assert!(queue.tasks().all(|task| task.status().is_success()));
    assert_eq!(queue.pool().stats().dispatched, 6);

    let mut pool = queue.into_pool();
    assert!(pool.terminate().is_ok());
    assert!(!pool.is_initialized());
}

#[test]
fn test_terminate_guards() {
    let (model, mut main, nodes) = seeded_model(1);
    let mut pool: WorkerPool<Offset> = WorkerPool::new(model, PoolConfig::default());

    match pool.terminate() {
        Err(error) => {
            assert!(matches!(error, EngineError::NotInitialized));
            assert!(error.is_configuration());
        }
        Ok(()) => panic!("terminate before initialize succeeded"),
    }

    if let Err(error) = pool.initialize(1, WorkerHooks::new()) {
        panic!("initialize failed: {error}");
    }
    if let Err(error) = pool.dispatch(Offset::new(nodes[0], 1).delayed(Duration::from_millis(20))) {
        panic!("dispatch failed: {error}");
    }
    assert!(matches!(
        pool.terminate(),
        Err(EngineError::TasksOutstanding(1))
    ));
    assert!(matches!(pool.thread_count(), Ok(1)));

    let wave = pool.barrier(&mut main).expect("barrier");
    assert!(wave.outcome().is_ok());
    assert!(pool.terminate().is_ok());
    assert!(matches!(pool.terminate(), Err(EngineError::NotInitialized)));
}

#[test]
fn test_panicking_task_does_not_kill_worker() {
    init_tracing();
    let (model, mut main, nodes) = seeded_model(3);
    let before = model.snapshot();

    let mut pool = WorkerPool::new(Arc::clone(&model), PoolConfig::default());
    if let Err(error) = pool.initialize(1, WorkerHooks::new()) {
        panic!("initialize failed: {error}");
    }
    let mut queue = TaskQueue::new(pool);
    for (index, node) in nodes.iter().enumerate() {
        let task = Offset::new(*node, 5);
        let task = if index == 1 { task.panicking() } else { task };
        if let Err(error) = queue.add_and_dispatch(task) {
            panic!("dispatch failed: {error}");
        }
    }

    let result = queue.wait_for_completion(&mut main);
    assert!(matches!(
        result,
        Err(EngineError::TasksFailed {
            failed: 1,
            first_code: UNEXPECTED_FAILURE_CODE
        })
    ));

    let statuses: Vec<TaskStatus> = queue.tasks().map(Task::status).collect();
    assert_eq!(
        statuses,
        vec![
            TaskStatus::Succeeded,
            TaskStatus::Failed(UNEXPECTED_FAILURE_CODE),
            TaskStatus::Succeeded
        ]
    );
    assert_eq!(model.snapshot().get(nodes[1]), before.get(nodes[1]));
    assert!(model.claim_holder(nodes[1]).is_none());
    assert_eq!(queue.pool().stats().panicked, 1);
    assert!(matches!(queue.pool().thread_count(), Ok(1)));
}

#[test]
fn test_spliced_journal_replays_to_same_state() {
    let (model, mut main, nodes) = seeded_model(5);
    let mut tasks: Vec<Offset> = nodes
        .iter()
        .map(|node| Offset::new(*node, 3))
        .collect();
    tasks[3] = Offset::new(nodes[3], 3).failing(7);

    assert!(run_batch(&model, &mut tasks, 3, WorkerHooks::new(), &mut main).is_err());
    main.commit();

    let fresh = Model::new();
    assert_eq!(main.replay(&fresh), main.len());
    assert_eq!(fresh.snapshot(), model.snapshot());
}

/// Records a result in a shared buffer, with an exactly-once "first" marker
/// decided under the engine mutex.
struct Tally {
    base: TaskBase,
    label: usize,
    lock: Arc<EngineMutex>,
    results: SharedBuffer<String>,
}

impl Tally {
    fn record_first(&self) {
        let _scope = self.lock.scope();
        if self.results.with(|items| items.iter().all(|item| item != "first")) {
            self.results.push("first".to_owned());
        }
    }
}

impl Task for Tally {
    type Node = Section;

    fn base(&self) -> &TaskBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut TaskBase {
        &mut self.base
    }

    fn process(&mut self, _ctx: &mut TaskContext<'_, Section>) -> StdResult<(), TaskFailure> {
        let outer = self.lock.scope();
        self.record_first();
        drop(outer);

        self.results.push(format!("task-{}", self.label));
        Ok(())
    }
}

#[test]
fn test_shared_buffer_and_engine_mutex_in_tasks() {
    let model = Model::new();
    let mut main = Journal::new();
    let lock = Arc::new(EngineMutex::new());
    let results = SharedBuffer::new();

    let mut tasks: Vec<Tally> = (0..12)
        .map(|label| Tally {
            base: TaskBase::new(),
            label,
            lock: Arc::clone(&lock),
            results: results.clone(),
        })
        .collect();

    if let Err(error) = run_batch(&model, &mut tasks, 4, WorkerHooks::new(), &mut main) {
        panic!("batch failed: {error}");
    }

    let collected = results.snapshot();
    assert_eq!(collected.len(), 13);
    assert_eq!(collected.iter().filter(|item| *item == "first").count(), 1);
    assert_eq!(lock.depth(), 0);
    assert!(main.is_empty());
}

#[test]
fn test_conflicting_working_copies_fail_one_task() {
    let (model, mut main, nodes) = seeded_model(1);
    let mut tasks = vec![
        Offset::new(nodes[0], 1).delayed(Duration::from_millis(5)),
        Offset::new(nodes[0], 2).delayed(Duration::from_millis(5)),
    ];

    let result = run_batch(&model, &mut tasks, 2, WorkerHooks::new(), &mut main);
    assert!(matches!(
        result,
        Err(EngineError::TasksFailed {
            failed: 1,
            first_code: JOURNAL_FAILURE_CODE
        })
    ));

    let succeeded = tasks.iter().filter(|task| task.status().is_success()).count();
    assert_eq!(succeeded, 1);
    let section = model.get(nodes[0]).expect("seed exists");
    assert!(section.points == vec![1, 2] || section.points == vec![2, 3]);
    assert!(model.claim_holder(nodes[0]).is_none());
}

/// Replaces a section's points, pausing before taking the copy and after storing it.
struct Overwrite {
    base: TaskBase,
    node: NodeId,
    value: i64,
    before_copy: Duration,
    after_store: Duration,
    fail_with: Option<i32>,
}

impl Overwrite {
    fn new(node: NodeId, value: i64) -> Self {
        Self {
            base: TaskBase::new(),
            node,
            value,
            before_copy: Duration::ZERO,
            after_store: Duration::ZERO,
            fail_with: None,
        }
    }
}

impl Task for Overwrite {
    type Node = Section;

    fn base(&self) -> &TaskBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut TaskBase {
        &mut self.base
    }

    fn process(&mut self, ctx: &mut TaskContext<'_, Section>) -> StdResult<(), TaskFailure> {
        thread::sleep(self.before_copy);
        let mut copy = ctx.working_copy(self.node)?;
        copy.points = vec![self.value];
        ctx.store(copy)?;
        thread::sleep(self.after_store);

        match self.fail_with {
            Some(code) => Err(TaskFailure::new(code, "failed after store")),
            None => Ok(()),
        }
    }
}

#[test]
fn test_failed_task_unwind_cannot_clobber_sibling_store() {
    init_tracing();
    let (model, mut main, nodes) = seeded_model(1);
    let original = model.snapshot();

    let mut tasks = vec![
        Overwrite {
            after_store: Duration::from_millis(150),
            fail_with: Some(11),
            ..Overwrite::new(nodes[0], 100)
        },
        Overwrite {
            before_copy: Duration::from_millis(50),
            ..Overwrite::new(nodes[0], 200)
        },
    ];

    let result = run_batch(&model, &mut tasks, 2, WorkerHooks::new(), &mut main);
    assert!(matches!(
        result,
        Err(EngineError::TasksFailed {
            failed: 2,
            first_code: 11
        })
    ));
    assert_eq!(tasks[0].status(), TaskStatus::Failed(11));
    assert_eq!(tasks[1].status(), TaskStatus::Failed(JOURNAL_FAILURE_CODE));
    assert_eq!(model.snapshot(), original);
    assert!(model.claim_holder(nodes[0]).is_none());

    main.commit();
    let fresh = Model::new();
    assert_eq!(main.replay(&fresh), main.len());
    assert_eq!(fresh.snapshot(), model.snapshot());
}

const FRAGILE_PREFIX: &str = "fragile-worker";

/// Refuses status updates on worker threads, which takes the worker down with it.
struct Fragile {
    base: TaskBase,
}

impl Task for Fragile {
    type Node = Section;

    fn base(&self) -> &TaskBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut TaskBase {
        let on_worker = thread::current()
            .name()
            .is_some_and(|name| name.starts_with(FRAGILE_PREFIX));
        assert!(!on_worker, "status is read-only on workers");
        &mut self.base
    }

    fn process(&mut self, _ctx: &mut TaskContext<'_, Section>) -> StdResult<(), TaskFailure> {
        Ok(())
    }
}

#[test]
fn test_task_is_returned_when_no_worker_is_left() {
    init_tracing();
    let config = PoolConfig {
        thread_name_prefix: FRAGILE_PREFIX.to_owned(),
        ..PoolConfig::default()
    };
    let mut pool = WorkerPool::new(Model::new(), config);
    if let Err(error) = pool.initialize(1, WorkerHooks::new()) {
        panic!("initialize failed: {error}");
    }
    let mut queue = TaskQueue::new(pool);
    let mut main = Journal::new();

    assert!(matches!(
        queue.add_and_dispatch(Fragile {
            base: TaskBase::new()
        }),
        Ok(0)
    ));
    assert!(matches!(
        queue.add_and_dispatch(Fragile {
            base: TaskBase::new()
        }),
        Err(EngineError::WorkerLost)
    ));
    assert_eq!(queue.outstanding(), 2);

    assert!(matches!(
        queue.wait_for_completion(&mut main),
        Err(EngineError::WorkerLost)
    ));
    assert!(queue.task(0).is_none());
    let returned = queue.task(1).expect("undelivered task is tracked");
    assert_eq!(returned.status(), TaskStatus::Failed(UNEXPECTED_FAILURE_CODE));
    assert_eq!(queue.pool().stats().failed, 1);

    let taken = queue.take_tasks().expect("wave collected");
    assert_eq!(taken.len(), 1);
    let mut pool = queue.into_pool();
    assert!(pool.terminate().is_ok());
    assert_eq!(pool.term_codes(), &[UNEXPECTED_FAILURE_CODE]);
}
