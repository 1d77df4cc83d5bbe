//! End-to-end scenarios: launching, skipping, restarting and operating jobs.

use super::*;
use crate::core::BatchStatus;
use crate::domain::{JobParameters, StepContribution};
use crate::errors::{BatchError, ItemError, JobRestartError};
use crate::events::{types, CollectingEventSink};
use crate::item::FnItemProcessor;
use crate::repository::{InMemoryJobRepository, JobRepository};
use crate::step::{ChunkContext, RepeatStatus, StepBuilder, Tasklet, TaskletStep};
use crate::testing::{
    assert_job_status, assert_step_counts, FailingItemProcessor, FailingItemWriter, ScriptedReader, StepCounts,
};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

fn numbers(n: i32) -> Vec<i32> {
    (1..=n).collect()
}

fn params() -> JobParameters {
    JobParameters::new().with_string("input", "numbers.csv")
}

fn setup() -> (Arc<InMemoryJobRepository>, JobLauncher) {
    let repository = Arc::new(InMemoryJobRepository::new());
    let launcher = JobLauncher::new(repository.clone());
    (repository, launcher)
}

/// Finishes on its first call and counts how often it ran.
struct Finish(Arc<AtomicUsize>);

impl Tasklet for Finish {
    fn execute(
        &self,
        _contribution: &mut StepContribution,
        _chunk_context: &mut ChunkContext<'_, '_>,
    ) -> Result<RepeatStatus, BatchError> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(RepeatStatus::Finished)
    }
}

/// Fails the first `failures` calls, then finishes.
struct FailFirst(Mutex<u32>);

impl Tasklet for FailFirst {
    fn execute(
        &self,
        _contribution: &mut StepContribution,
        _chunk_context: &mut ChunkContext<'_, '_>,
    ) -> Result<RepeatStatus, BatchError> {
        let mut remaining = self.0.lock();
        if *remaining > 0 {
            *remaining -= 1;
            return Err(BatchError::Internal("downstream unavailable".to_string()));
        }
        Ok(RepeatStatus::Finished)
    }
}

fn finish_step(repository: &Arc<InMemoryJobRepository>, name: &str, calls: &Arc<AtomicUsize>) -> TaskletStep {
    StepBuilder::new(name, repository.clone()).tasklet(Arc::new(Finish(Arc::clone(calls))))
}

fn fail_first_step(repository: &Arc<InMemoryJobRepository>, name: &str, failures: u32) -> TaskletStep {
    StepBuilder::new(name, repository.clone()).tasklet(Arc::new(FailFirst(Mutex::new(failures))))
}

#[tokio::test]
async fn test_ten_items_commit_interval_three() {
    let (repository, launcher) = setup();
    let writer = FailingItemWriter::new();
    let log = writer.log();
    let step = StepBuilder::new("load", repository.clone())
        .chunk::<i32>(3)
        .reader(ScriptedReader::new("numbers", numbers(10)))
        .writer(writer)
        .build()
        .unwrap();
    let job = JobBuilder::new("import", repository.clone()).step(step).build().unwrap();

    let execution = launcher.run(&job, params()).await.unwrap();

    assert_job_status(&execution, BatchStatus::Completed);
    assert_step_counts(
        &execution,
        "load",
        StepCounts {
            read: 10,
            write: 10,
            commit: 4,
            ..StepCounts::default()
        },
    );
    assert_eq!(log.batch_sizes(), vec![3, 3, 3, 1]);
    assert_eq!(execution.exit_status.exit_code, "COMPLETED");
}

#[tokio::test]
async fn test_invalid_item_is_skipped_within_limit() {
    let (repository, launcher) = setup();
    let writer = FailingItemWriter::new();
    let log = writer.log();
    let step = StepBuilder::new("load", repository.clone())
        .chunk::<i32>(10)
        .reader(ScriptedReader::new("numbers", numbers(5)))
        .processor(FailingItemProcessor::new().fail_on(3, ItemError::validation("malformed record")))
        .writer(writer)
        .skip_limit(1)
        .build()
        .unwrap();
    let job = JobBuilder::new("import", repository.clone()).step(step).build().unwrap();

    let execution = launcher.run(&job, params()).await.unwrap();

    assert_job_status(&execution, BatchStatus::Completed);
    let load = execution.step_execution("load").unwrap();
    assert_eq!(load.write_count, 4);
    assert_eq!(load.skip_count(), 1);
    assert_eq!(load.process_skip_count, 1);
    assert_eq!(log.written(), vec![1, 2, 4, 5]);
}

#[tokio::test]
async fn test_skip_limit_zero_fails_with_committed_counts() {
    let (repository, launcher) = setup();
    let step = StepBuilder::new("load", repository.clone())
        .chunk::<i32>(2)
        .reader(ScriptedReader::new("numbers", numbers(5)))
        .processor(FailingItemProcessor::new().fail_on(3, ItemError::validation("malformed record")))
        .writer(FailingItemWriter::new())
        .skip_limit(0)
        .build()
        .unwrap();
    let job = JobBuilder::new("import", repository.clone()).step(step).build().unwrap();

    let execution = launcher.run(&job, params()).await.unwrap();

    assert_job_status(&execution, BatchStatus::Failed);
    let load = execution.step_execution("load").unwrap();
    assert_eq!(load.status(), BatchStatus::Failed);
    assert_eq!(load.write_count, 2);
    assert_eq!(load.commit_count, 1);
    assert_eq!(load.skip_count(), 0);
    assert_eq!(load.rollback_count, 1);

    let report = execution.failure_report().unwrap();
    assert_eq!(report.step_name.as_deref(), Some("load"));
    assert_eq!(report.write_count, 2);
    assert_eq!(report.commit_count, 1);
}

#[tokio::test]
async fn test_scan_isolates_bad_item_in_failed_write() {
    let (repository, launcher) = setup();
    let writer = FailingItemWriter::new().fail_on(3, ItemError::validation("constraint violation"));
    let log = writer.log();
    let step = StepBuilder::new("load", repository.clone())
        .chunk::<i32>(5)
        .reader(ScriptedReader::new("numbers", numbers(5)))
        .writer(writer)
        .skip_limit(1)
        .build()
        .unwrap();
    let job = JobBuilder::new("import", repository.clone()).step(step).build().unwrap();

    let execution = launcher.run(&job, params()).await.unwrap();

    assert_job_status(&execution, BatchStatus::Completed);
    let load = execution.step_execution("load").unwrap();
    assert_eq!(load.write_count, 4);
    assert_eq!(load.write_skip_count, 1);
    assert_eq!(log.written(), vec![1, 2, 4, 5]);
}

#[tokio::test]
async fn test_unskippable_write_failure_rolls_back_once() {
    let (repository, launcher) = setup();
    let writer = FailingItemWriter::new().fail_on(2, ItemError::validation("constraint violation"));
    let log = writer.log();
    let step = StepBuilder::new("load", repository.clone())
        .chunk::<i32>(3)
        .reader(ScriptedReader::new("numbers", numbers(3)))
        .writer(writer)
        .build()
        .unwrap();
    let job = JobBuilder::new("import", repository.clone()).step(step).build().unwrap();

    let execution = launcher.run(&job, params()).await.unwrap();

    assert_job_status(&execution, BatchStatus::Failed);
    let load = execution.step_execution("load").unwrap();
    assert_eq!(load.commit_count, 0);
    assert_eq!(load.rollback_count, 1);
    assert_eq!(log.write_calls(), 1);
}

#[tokio::test]
async fn test_commit_count_follows_commit_interval() {
    // (items, commit interval, items whose read is skipped)
    let cases = [
        (0, 1, 0),
        (0, 3, 0),
        (1, 1, 0),
        (5, 1, 0),
        (5, 5, 0),
        (6, 3, 0),
        (7, 3, 0),
        (10, 4, 0),
        (7, 3, 1),
        (10, 3, 1),
        (9, 4, 1),
    ];

    for (items, interval, skipped) in cases {
        let (repository, launcher) = setup();
        let mut reader = ScriptedReader::new("numbers", numbers(items));
        if skipped > 0 {
            reader = reader.fail_at(0, ItemError::validation("unparseable line"));
        }
        let step = StepBuilder::new("load", repository.clone())
            .chunk::<i32>(interval)
            .reader(reader)
            .writer(FailingItemWriter::new())
            .skip_limit(1)
            .build()
            .unwrap();
        let job = JobBuilder::new("import", repository.clone()).step(step).build().unwrap();

        let execution = launcher.run(&job, params()).await.unwrap();

        let kept = u64::try_from(items).unwrap() - skipped;
        let interval = u64::try_from(interval).unwrap();
        assert_job_status(&execution, BatchStatus::Completed);
        assert_step_counts(
            &execution,
            "load",
            StepCounts {
                read: kept,
                write: kept,
                skip: skipped,
                commit: kept.div_ceil(interval),
                ..StepCounts::default()
            },
        );
    }
}

#[tokio::test]
async fn test_fully_filtered_chunk_commits() {
    for write_empty_chunks in [false, true] {
        let (repository, launcher) = setup();
        let writer = FailingItemWriter::new();
        let log = writer.log();
        let step = StepBuilder::new("load", repository.clone())
            .chunk::<i32>(3)
            .reader(ScriptedReader::new("numbers", numbers(3)))
            .processor(FailingItemProcessor::new().filter(1).filter(2).filter(3))
            .writer(writer)
            .write_empty_chunks(write_empty_chunks)
            .build()
            .unwrap();
        let job = JobBuilder::new("import", repository.clone()).step(step).build().unwrap();

        let execution = launcher.run(&job, params()).await.unwrap();

        assert_job_status(&execution, BatchStatus::Completed);
        assert_step_counts(
            &execution,
            "load",
            StepCounts {
                read: 3,
                filter: 3,
                commit: 1,
                ..StepCounts::default()
            },
        );
        let expected: Vec<usize> = if write_empty_chunks { vec![0] } else { Vec::new() };
        assert_eq!(log.batch_sizes(), expected);
    }
}

#[tokio::test]
async fn test_restart_resumes_without_reprocessing() {
    let (repository, launcher) = setup();
    let writer = FailingItemWriter::new();
    let log = writer.log();
    let step = StepBuilder::new("load", repository.clone())
        .chunk::<i32>(3)
        .reader(ScriptedReader::new("numbers", numbers(10)).fail_transiently_at(6, 1))
        .writer(writer)
        .build()
        .unwrap();
    let job = JobBuilder::new("import", repository.clone()).step(step).build().unwrap();

    let first = launcher.run(&job, params()).await.unwrap();
    assert_job_status(&first, BatchStatus::Failed);
    assert_eq!(first.step_execution("load").unwrap().write_count, 6);

    let second = launcher.run(&job, params()).await.unwrap();
    assert_job_status(&second, BatchStatus::Completed);
    assert_eq!(second.job_instance.id, first.job_instance.id);
    assert_step_counts(
        &second,
        "load",
        StepCounts {
            read: 4,
            write: 4,
            commit: 2,
            ..StepCounts::default()
        },
    );
    assert_eq!(log.written(), numbers(10));
    assert_eq!(repository.instance_count(), 1);
    assert_eq!(repository.job_execution_count(), 2);
}

#[tokio::test]
async fn test_start_limit_exceeded_fails_job() {
    let (repository, launcher) = setup();
    let step = StepBuilder::new("publish", repository.clone())
        .start_limit(1)
        .tasklet(Arc::new(FailFirst(Mutex::new(1))));
    let job = JobBuilder::new("report", repository.clone()).step(step).build().unwrap();

    let first = launcher.run(&job, params()).await.unwrap();
    assert_job_status(&first, BatchStatus::Failed);

    let second = launcher.run(&job, params()).await.unwrap();
    assert_job_status(&second, BatchStatus::Failed);
    assert!(second.step_executions.is_empty());
    assert_eq!(second.failures.len(), 1);
    assert_eq!(second.failures[0].error_type, "JobRestartError");
}

#[tokio::test]
async fn test_completed_steps_rerun_only_when_allowed() {
    let (repository, launcher) = setup();
    let events = Arc::new(CollectingEventSink::new());
    let setup_calls = Arc::new(AtomicUsize::new(0));
    let extract_calls = Arc::new(AtomicUsize::new(0));

    let job = JobBuilder::new("etl", repository.clone())
        .step(
            StepBuilder::new("setup", repository.clone())
                .allow_start_if_complete(true)
                .tasklet(Arc::new(Finish(Arc::clone(&setup_calls)))),
        )
        .step(finish_step(&repository, "extract", &extract_calls))
        .step(fail_first_step(&repository, "publish", 1))
        .with_events(events.clone())
        .build()
        .unwrap();

    let first = launcher.run(&job, params()).await.unwrap();
    assert_job_status(&first, BatchStatus::Failed);

    let second = launcher.run(&job, params()).await.unwrap();
    assert_job_status(&second, BatchStatus::Completed);

    assert_eq!(setup_calls.load(Ordering::SeqCst), 2);
    assert_eq!(extract_calls.load(Ordering::SeqCst), 1);
    let names: Vec<&str> = second.step_executions.iter().map(|s| s.step_name.as_str()).collect();
    assert_eq!(names, vec!["setup", "publish"]);
    assert_eq!(events.events_of_type(types::JOB_FAILED).len(), 1);
    assert_eq!(events.events_of_type(types::JOB_COMPLETED).len(), 1);
}

#[tokio::test]
async fn test_failed_exit_code_routes_to_recovery_step() {
    let (repository, launcher) = setup();
    let cleanup_calls = Arc::new(AtomicUsize::new(0));
    let job = JobBuilder::new("import", repository.clone())
        .step_with_transitions(
            fail_first_step(&repository, "load", 1),
            vec![Transition::to("FAILED", "cleanup"), Transition::end("*")],
        )
        .step(finish_step(&repository, "cleanup", &cleanup_calls))
        .build()
        .unwrap();

    let execution = launcher.run(&job, params()).await.unwrap();

    assert_job_status(&execution, BatchStatus::Completed);
    assert_eq!(cleanup_calls.load(Ordering::SeqCst), 1);
    assert_eq!(execution.step_execution("load").unwrap().status(), BatchStatus::Failed);
}

#[tokio::test]
async fn test_end_transition_skips_remaining_steps() {
    let (repository, launcher) = setup();
    let load_calls = Arc::new(AtomicUsize::new(0));
    let cleanup_calls = Arc::new(AtomicUsize::new(0));
    let job = JobBuilder::new("import", repository.clone())
        .step_with_transitions(
            finish_step(&repository, "load", &load_calls),
            vec![Transition::to("FAILED", "cleanup"), Transition::end("*")],
        )
        .step(finish_step(&repository, "cleanup", &cleanup_calls))
        .build()
        .unwrap();

    let execution = launcher.run(&job, params()).await.unwrap();

    assert_job_status(&execution, BatchStatus::Completed);
    assert_eq!(load_calls.load(Ordering::SeqCst), 1);
    assert_eq!(cleanup_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_fail_transition_fails_job() {
    let (repository, launcher) = setup();
    let calls = Arc::new(AtomicUsize::new(0));
    let job = JobBuilder::new("import", repository.clone())
        .step_with_transitions(finish_step(&repository, "load", &calls), vec![Transition::fail("COMPLETED")])
        .build()
        .unwrap();

    let execution = launcher.run(&job, params()).await.unwrap();

    assert_job_status(&execution, BatchStatus::Failed);
    assert_eq!(execution.step_execution("load").unwrap().status(), BatchStatus::Completed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_split_runs_branches_and_aggregates() {
    let (repository, launcher) = setup();
    let calls = Arc::new(AtomicUsize::new(0));
    let left_writer = FailingItemWriter::new();
    let left_log = left_writer.log();
    let left = FlowBuilder::new("left")
        .step(
            StepBuilder::new("customers", repository.clone())
                .chunk::<i32>(2)
                .reader(ScriptedReader::new("customers", numbers(4)))
                .writer(left_writer)
                .build()
                .unwrap(),
        )
        .build();
    let right = FlowBuilder::new("right")
        .step(finish_step(&repository, "orders", &calls))
        .build();

    let job = JobBuilder::new("sync", repository.clone())
        .split("parallel", vec![left, right])
        .step(finish_step(&repository, "summary", &calls))
        .build()
        .unwrap();

    let execution = launcher.run(&job, params()).await.unwrap();

    assert_job_status(&execution, BatchStatus::Completed);
    assert_eq!(execution.step_executions.len(), 3);
    assert_eq!(left_log.written(), numbers(4));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failed_branch_fails_split() {
    let (repository, launcher) = setup();
    let calls = Arc::new(AtomicUsize::new(0));
    let left = FlowBuilder::new("left").step(finish_step(&repository, "customers", &calls)).build();
    let right = FlowBuilder::new("right").step(fail_first_step(&repository, "orders", 1)).build();

    let job = JobBuilder::new("sync", repository.clone())
        .split("parallel", vec![left, right])
        .step(finish_step(&repository, "summary", &calls))
        .build()
        .unwrap();

    let execution = launcher.run(&job, params()).await.unwrap();

    assert_job_status(&execution, BatchStatus::Failed);
    assert!(execution.step_execution("summary").is_none());
}

#[tokio::test]
async fn test_fatal_configuration_aborts_job_despite_transitions() {
    let (repository, launcher) = setup();
    let cleanup_calls = Arc::new(AtomicUsize::new(0));
    let load = StepBuilder::new("load", repository.clone())
        .chunk::<i32>(3)
        .reader(
            ScriptedReader::new("numbers", numbers(5)).fail_at(1, ItemError::fatal_configuration("no schema")),
        )
        .writer(FailingItemWriter::new())
        .skip_limit(10)
        .skippable([crate::errors::ItemErrorKind::FatalConfiguration])
        .build()
        .unwrap();
    let job = JobBuilder::new("import", repository.clone())
        .step_with_transitions(load, vec![Transition::to("*", "cleanup")])
        .step(finish_step(&repository, "cleanup", &cleanup_calls))
        .build()
        .unwrap();

    let execution = launcher.run(&job, params()).await.unwrap();

    assert_job_status(&execution, BatchStatus::Failed);
    assert_eq!(cleanup_calls.load(Ordering::SeqCst), 0);
    let load = execution.step_execution("load").unwrap();
    assert!(load.has_fatal_failure());
    assert_eq!(load.skip_count(), 0);
}

#[tokio::test]
async fn test_operator_stop_then_restart() {
    let (repository, launcher) = setup();
    let launcher = Arc::new(launcher);
    let operator = Arc::new(JobOperator::new(repository.clone(), Arc::clone(&launcher)));

    let stop_once = Arc::new(AtomicBool::new(false));
    let stopper = {
        let operator = Arc::clone(&operator);
        let stop_once = Arc::clone(&stop_once);
        FnItemProcessor::new(move |item: &i32| {
            if *item == 4 && !stop_once.swap(true, Ordering::SeqCst) {
                let to_item_error = |e: BatchError| ItemError::other("operator", e.to_string());
                for id in operator.running_executions("import").map_err(to_item_error)? {
                    operator.stop(id).map_err(to_item_error)?;
                }
            }
            Ok(Some(*item))
        })
    };

    let writer = FailingItemWriter::new();
    let log = writer.log();
    let step = StepBuilder::new("load", repository.clone())
        .chunk::<i32>(3)
        .reader(ScriptedReader::new("numbers", numbers(9)))
        .processor(stopper)
        .writer(writer)
        .build()
        .unwrap();
    let job = JobBuilder::new("import", repository.clone()).step(step).build().unwrap();

    let stopped = launcher.run(&job, params()).await.unwrap();
    assert_job_status(&stopped, BatchStatus::Stopped);
    assert_eq!(stopped.exit_status.exit_code, "STOPPED");
    assert_eq!(stopped.exit_status.exit_description, "stop requested by operator");
    assert_eq!(stopped.step_execution("load").unwrap().write_count, 6);
    assert!(launcher.running_executions().is_empty());

    let restarted = operator.restart(&job, stopped.id).await.unwrap();
    assert_job_status(&restarted, BatchStatus::Completed);
    assert_eq!(restarted.step_execution("load").unwrap().write_count, 3);
    assert_eq!(log.written(), numbers(9));
}

#[tokio::test]
async fn test_abandoned_execution_cannot_restart() {
    let (repository, launcher) = setup();
    let launcher = Arc::new(launcher);
    let operator = JobOperator::new(repository.clone(), Arc::clone(&launcher));
    let job = JobBuilder::new("report", repository.clone())
        .step(fail_first_step(&repository, "publish", 1))
        .build()
        .unwrap();

    let failed = launcher.run(&job, params()).await.unwrap();
    assert_job_status(&failed, BatchStatus::Failed);

    let abandoned = operator.abandon(failed.id).unwrap();
    assert_eq!(abandoned.status, BatchStatus::Abandoned);
    let stored = repository.get_job_execution(failed.id).unwrap().unwrap();
    assert_eq!(stored.status, BatchStatus::Abandoned);
    assert_eq!(stored.step_executions[0].status(), BatchStatus::Abandoned);

    let err = launcher.run(&job, params()).await.unwrap_err();
    assert!(matches!(err, BatchError::Restart(JobRestartError::AlreadyComplete { .. })));
    assert!(operator.abandon(failed.id).is_err());
}

#[tokio::test]
async fn test_orphaned_execution_can_be_stopped_and_abandoned() {
    let (repository, launcher) = setup();
    let launcher = Arc::new(launcher);
    let operator = JobOperator::new(repository.clone(), Arc::clone(&launcher));
    let calls = Arc::new(AtomicUsize::new(0));
    let job = JobBuilder::new("report", repository.clone())
        .step(finish_step(&repository, "publish", &calls))
        .build()
        .unwrap();
    let instance = repository.get_or_create_job_instance("report", &params()).unwrap();
    let orphan = repository.create_job_execution(&instance, &params()).unwrap();

    operator.stop(orphan.id).unwrap();
    let stored = repository.get_job_execution(orphan.id).unwrap().unwrap();
    assert_eq!(stored.status, BatchStatus::Stopped);
    assert!(stored.end_time.is_some());
    assert!(!stored.is_running());

    let abandoned = operator.abandon(orphan.id).unwrap();
    assert_eq!(abandoned.status, BatchStatus::Abandoned);

    let err = launcher.run(&job, params()).await.unwrap_err();
    assert!(matches!(err, BatchError::Restart(JobRestartError::AlreadyComplete { .. })));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_stored_stopping_execution_without_launcher_can_be_abandoned() {
    let (repository, launcher) = setup();
    let operator = JobOperator::new(repository.clone(), Arc::new(launcher));
    let instance = repository.get_or_create_job_instance("report", &params()).unwrap();
    let mut stale = repository.create_job_execution(&instance, &params()).unwrap();
    stale.status = BatchStatus::Stopping;
    repository.update_job_execution(&stale).unwrap();

    let abandoned = operator.abandon(stale.id).unwrap();

    assert_eq!(abandoned.status, BatchStatus::Abandoned);
    assert!(abandoned.end_time.is_some());
    let stored = repository.get_job_execution(stale.id).unwrap().unwrap();
    assert_eq!(stored.status, BatchStatus::Abandoned);
}

#[tokio::test]
async fn test_stop_rejects_finished_execution() {
    let (repository, launcher) = setup();
    let launcher = Arc::new(launcher);
    let operator = JobOperator::new(repository.clone(), Arc::clone(&launcher));
    let calls = Arc::new(AtomicUsize::new(0));
    let job = JobBuilder::new("report", repository.clone())
        .step(finish_step(&repository, "publish", &calls))
        .build()
        .unwrap();

    let execution = launcher.run(&job, params()).await.unwrap();

    let err = operator.stop(execution.id).unwrap_err();
    assert!(matches!(err, BatchError::Restart(JobRestartError::NotRunning(_))));
}

#[tokio::test]
async fn test_launcher_rejects_completed_instance() {
    let (repository, launcher) = setup();
    let calls = Arc::new(AtomicUsize::new(0));
    let job = JobBuilder::new("report", repository.clone())
        .step(finish_step(&repository, "publish", &calls))
        .build()
        .unwrap();

    launcher.run(&job, params()).await.unwrap();
    let err = launcher.run(&job, params()).await.unwrap_err();
    assert!(matches!(err, BatchError::Restart(JobRestartError::AlreadyComplete { .. })));

    let other = launcher
        .run(&job, JobParameters::new().with_string("input", "other.csv"))
        .await
        .unwrap();
    assert_job_status(&other, BatchStatus::Completed);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_launcher_rejects_running_instance() {
    let (repository, launcher) = setup();
    let calls = Arc::new(AtomicUsize::new(0));
    let job = JobBuilder::new("report", repository.clone())
        .step(finish_step(&repository, "publish", &calls))
        .build()
        .unwrap();

    let instance = repository.get_or_create_job_instance("report", &params()).unwrap();
    repository.create_job_execution(&instance, &params()).unwrap();

    let err = launcher.run(&job, params()).await.unwrap_err();
    assert!(matches!(err, BatchError::Restart(JobRestartError::AlreadyRunning { .. })));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_launcher_rejects_restart_of_non_restartable_job() {
    let (repository, launcher) = setup();
    let job = JobBuilder::new("report", repository.clone())
        .step(fail_first_step(&repository, "publish", 1))
        .restartable(false)
        .build()
        .unwrap();

    let failed = launcher.run(&job, params()).await.unwrap();
    assert_job_status(&failed, BatchStatus::Failed);

    let err = launcher.run(&job, params()).await.unwrap_err();
    assert!(matches!(err, BatchError::Restart(JobRestartError::NotRestartable { .. })));
}

#[tokio::test]
async fn test_launcher_validates_parameters() {
    let (repository, launcher) = setup();
    let calls = Arc::new(AtomicUsize::new(0));
    let job = JobBuilder::new("report", repository.clone())
        .step(finish_step(&repository, "publish", &calls))
        .validator(Arc::new(DefaultJobParametersValidator::new(["run.date"], Vec::<String>::new())))
        .build()
        .unwrap();

    let err = launcher.run(&job, params()).await.unwrap_err();

    assert!(matches!(err, BatchError::InvalidParameters(_)));
    assert_eq!(repository.instance_count(), 0);
}

#[tokio::test]
async fn test_step_configured_from_json() -> anyhow::Result<()> {
    let (repository, launcher) = setup();
    let config = crate::config::StepConfig::from_json(
        r#"{"commit_interval": 4, "fault_tolerance": {"skip_limit": 2}}"#,
    )?;
    let writer = FailingItemWriter::new();
    let log = writer.log();
    let step = StepBuilder::new("load", repository.clone())
        .from_config::<i32>(&config)
        .reader(ScriptedReader::new("numbers", numbers(10)).fail_at(5, ItemError::validation("bad row")))
        .writer(writer)
        .build()?;
    let job = JobBuilder::new("import", repository.clone()).step(step).build()?;

    let execution = launcher.run(&job, params()).await?;

    assert_job_status(&execution, BatchStatus::Completed);
    let load = execution.step_execution("load").unwrap();
    assert_eq!(load.read_skip_count, 1);
    assert_eq!(load.write_count, 9);
    assert_eq!(log.batch_sizes(), vec![4, 4, 1]);
    Ok(())
}
