//! Integration tests for the pipeline executors, run against the real
//! store with recording cluster and primitive fakes.

mod common;

use chrono::Utc;
use uuid::Uuid;

use faultline_core::cluster::api::label_keys;
use faultline_core::error::ExecError;
use faultline_core::events::names;
use faultline_core::executor::fault_injection::FaultInjectionExecutor;
use faultline_core::executor::restart_pedestal::RestartPedestalExecutor;
use faultline_core::executor::run_algorithm::RunAlgorithmExecutor;
use faultline_core::executor::collect_result::CollectResultExecutor;
use faultline_core::executor::{ExecOutcome, Executor};
use faultline_db::models::{InjectionState, TaskKind, TaskState, TraceKind};
use faultline_db::queries::{executions, injections, queue, tasks as task_db};
use faultline_test_utils::{create_test_db, drop_test_db};

use common::{make_engine, make_task_with_trace, restart_payload};

#[tokio::test]
async fn restart_pedestal_locks_namespace_and_chains_injection() {
    let (pool, db_name) = create_test_db().await;
    let engine = make_engine(&pool, &["ts0"], 0).await;

    // interval=10, fault_duration=5: the injection runs 5 minutes after
    // the restart completes.
    let task = make_task_with_trace(
        &pool,
        TraceKind::FullPipeline,
        TaskKind::RestartPedestal,
        1,
        restart_payload(10, 5),
    )
    .await;
    engine.queue.submit_ready(&task).await.unwrap();
    let task = engine
        .queue
        .get_ready(std::time::Duration::from_secs(1))
        .await
        .unwrap()
        .unwrap();

    let before = Utc::now();
    let outcome = RestartPedestalExecutor
        .execute(&engine.ctx, &task)
        .await
        .unwrap();
    assert_eq!(
        outcome,
        ExecOutcome::Completed {
            event: names::RESTART_PEDESTAL_COMPLETED
        }
    );

    // The namespace is leased by this trace.
    assert!(
        engine
            .monitor
            .is_held_by("ts0", &task.trace_id.to_string())
            .await
            .unwrap()
    );

    // The installer ran against ts0 with its parsed index.
    let installs = engine.installer.installs.lock().await;
    assert_eq!(installs.as_slice(), &[("ts0".to_owned(), 0, "trainticket".to_owned())]);
    drop(installs);

    // A fault-injection task waits in the delayed tier, due in
    // interval - fault_duration = 5 minutes.
    let children = task_db::list_tasks_for_trace(&pool, task.trace_id)
        .await
        .unwrap();
    let child = children
        .iter()
        .find(|t| t.kind == TaskKind::FaultInjection)
        .expect("fault-injection task enqueued");
    assert_eq!(child.parent_task_id, Some(task.id));
    assert_eq!(child.level, 2);
    let delay = (child.execute_at - before).num_seconds();
    assert!((295..=305).contains(&delay), "expected ~300 s, got {delay}");
    assert_eq!(child.payload["namespace"], "ts0");

    // Parent row is completed.
    let parent = task_db::get_task(&pool, task.id).await.unwrap().unwrap();
    assert_eq!(parent.state, TaskState::Completed);

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn restart_pedestal_without_free_namespace_reschedules() {
    let (pool, db_name) = create_test_db().await;
    let engine = make_engine(&pool, &["ts0"], 0).await;

    let first = make_task_with_trace(
        &pool,
        TraceKind::FullPipeline,
        TaskKind::RestartPedestal,
        1,
        restart_payload(10, 5),
    )
    .await;
    engine.queue.submit_ready(&first).await.unwrap();
    let first = engine
        .queue
        .get_ready(std::time::Duration::from_secs(1))
        .await
        .unwrap()
        .unwrap();
    RestartPedestalExecutor
        .execute(&engine.ctx, &first)
        .await
        .unwrap();

    // Second trace: the only namespace is taken.
    let second = make_task_with_trace(
        &pool,
        TraceKind::FullPipeline,
        TaskKind::RestartPedestal,
        1,
        restart_payload(10, 5),
    )
    .await;
    engine.queue.submit_ready(&second).await.unwrap();
    let second = engine
        .queue
        .get_ready(std::time::Duration::from_secs(1))
        .await
        .unwrap()
        .unwrap();

    let err = RestartPedestalExecutor
        .execute(&engine.ctx, &second)
        .await
        .unwrap_err();
    let delay = match err.downcast_ref::<ExecError>() {
        Some(ExecError::Contention(delay)) => *delay,
        other => panic!("expected contention, got {other:?}"),
    };
    // First contention backs off roughly a minute, capped far below the
    // five-minute ceiling.
    assert!(delay.as_secs() >= 45 && delay.as_secs() <= 300, "delay {delay:?}");

    // The task went back to the delayed tier in rescheduled state, not
    // error.
    let row = task_db::get_task(&pool, second.id).await.unwrap().unwrap();
    assert_eq!(row.state, TaskState::Rescheduled);
    assert_eq!(row.restart_num, 1);
    let (_, delayed, dead) = queue::tier_lengths(&pool).await.unwrap();
    assert_eq!(dead, 0);
    assert!(delayed >= 1);

    // The restart token was returned.
    assert_eq!(
        engine
            .limiter
            .occupancy(faultline_db::models::RateService::RestartPedestal)
            .await
            .unwrap(),
        0
    );

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn fault_injection_persists_batch_and_creates_resources() {
    let (pool, db_name) = create_test_db().await;
    let engine = make_engine(&pool, &["ts0"], 0).await;

    let payload = serde_json::json!({
        "benchmark": {"id": "b1", "name": "tt-bench", "image_ref": "registry.local/tt:1"},
        "pre_duration": 2,
        "nodes": [
            {"fault_type": "pod-kill", "category": "pod", "duration": 5,
             "spec": {"selector": {"app": "ts-order"}}},
            {"fault_type": "network-delay", "category": "network", "duration": 5,
             "spec": {"selector": {"app": "ts-auth"}, "latency": "200ms"}},
        ],
        "namespace": "ts0",
        "pedestal": {"id": "ped-1", "name": "tt", "ns_pattern": "^ts[0-9]+$", "chart": "c"},
        "pedestal_id": "ped-1",
        "labels": {"suite": "nightly"},
    });
    let task = make_task_with_trace(
        &pool,
        TraceKind::FullPipeline,
        TaskKind::FaultInjection,
        2,
        payload,
    )
    .await;
    faultline_db::queries::tasks::upsert_task(&pool, &task).await.unwrap();

    // The trace must hold the namespace lease.
    engine
        .monitor
        .acquire_lock(
            "ts0",
            Utc::now().timestamp() + 600,
            &task.trace_id.to_string(),
            TaskKind::FaultInjection,
        )
        .await
        .unwrap();

    let outcome = FaultInjectionExecutor
        .execute(&engine.ctx, &task)
        .await
        .unwrap();
    assert_eq!(
        outcome,
        ExecOutcome::InFlight {
            event: names::FAULT_INJECTION_STARTED
        }
    );

    // One injection row in initial state, with both nodes serialised.
    let injection = injections::get_by_task(&pool, task.id)
        .await
        .unwrap()
        .expect("injection row");
    assert_eq!(injection.state, InjectionState::Initial);
    assert_eq!(injection.engine_config.as_array().unwrap().len(), 2);
    assert_eq!(injection.groundtruths.as_array().unwrap().len(), 2);
    assert_eq!(injection.pre_duration, 2);

    // Two chaos resources created in ts0, carrying identity labels and
    // carrier annotations.
    let chaos = engine.cluster.chaos.lock().await;
    assert_eq!(chaos.len(), 1);
    let (ns, batch) = &chaos[0];
    assert_eq!(ns, "ts0");
    assert_eq!(batch.len(), 2);
    assert_eq!(batch[0].labels[label_keys::TASK_ID], task.id.to_string());
    assert_eq!(batch[0].labels[label_keys::INJECTION_NAME], injection.name);
    assert!(
        batch[0]
            .annotations
            .contains_key(faultline_core::carrier::TRACE_CARRIER_ANNOTATION)
    );

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn fault_injection_rejects_lost_namespace() {
    let (pool, db_name) = create_test_db().await;
    let engine = make_engine(&pool, &["ts0"], 0).await;

    let payload = serde_json::json!({
        "benchmark": {"id": "b1", "name": "tt-bench", "image_ref": "registry.local/tt:1"},
        "nodes": [{"fault_type": "pod-kill", "category": "pod", "duration": 5, "spec": {}}],
        "namespace": "ts0",
        "pedestal": {"id": "p", "name": "p", "ns_pattern": ".*", "chart": "c"},
        "pedestal_id": "p",
    });
    let task = make_task_with_trace(
        &pool,
        TraceKind::FullPipeline,
        TaskKind::FaultInjection,
        2,
        payload,
    )
    .await;

    // Nobody holds ts0 for this trace.
    let err = FaultInjectionExecutor
        .execute(&engine.ctx, &task)
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ExecError>(),
        Some(ExecError::Business(_))
    ));

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn run_algorithm_records_execution_and_submits_job() {
    let (pool, db_name) = create_test_db().await;
    let engine = make_engine(&pool, &[], 0).await;

    let payload = serde_json::json!({
        "algorithm": {"name": "detector", "version_id": "v1", "image_ref": "registry.local/det:1"},
        "datapack": {"name": "inj-abc", "start_time": 1700000000, "end_time": 1700000600,
                     "pre_duration": 2},
        "dataset_version_id": "ds-1",
    });
    let task = make_task_with_trace(
        &pool,
        TraceKind::AlgorithmRun,
        TaskKind::RunAlgorithm,
        1,
        payload,
    )
    .await;

    let outcome = RunAlgorithmExecutor
        .execute(&engine.ctx, &task)
        .await
        .unwrap();
    assert_eq!(
        outcome,
        ExecOutcome::InFlight {
            event: names::ALGO_RUN_SUBMITTED
        }
    );

    // The job carries the execution id and asks for its output dir.
    let jobs = engine.cluster.jobs.lock().await;
    assert_eq!(jobs.len(), 1);
    let job = &jobs[0];
    let execution_id: Uuid = job.labels[label_keys::EXECUTION_ID].parse().unwrap();
    assert!(job.create_output_dir.is_some());
    assert!(
        job.env
            .iter()
            .any(|(k, v)| k == "EXECUTION_ID" && *v == execution_id.to_string())
    );
    drop(jobs);

    // The execution row exists in initial state.
    let execution = executions::get(&pool, execution_id).await.unwrap().unwrap();
    assert_eq!(execution.datapack_id, "inj-abc");

    // The token stays held for the controller to release.
    assert_eq!(
        engine
            .limiter
            .occupancy(faultline_db::models::RateService::AlgoExecution)
            .await
            .unwrap(),
        1
    );

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn collect_result_detector_paths() {
    let (pool, db_name) = create_test_db().await;
    let engine = make_engine(&pool, &[], 0).await;

    let rca = serde_json::json!([
        {"name": "e-diagnose", "version_id": "v1", "image_ref": "registry.local/ed:1"},
        {"name": "micro-rca", "version_id": "v2", "image_ref": "registry.local/mr:1"},
    ]);

    // Case 1: no detector rows at all.
    let execution_a = Uuid::now_v7();
    let task = make_task_with_trace(
        &pool,
        TraceKind::FullPipeline,
        TaskKind::CollectResult,
        5,
        serde_json::json!({
            "algorithm": {"name": "detector", "version_id": "v1", "image_ref": "r/d:1"},
            "datapack": {"name": "dp", "start_time": 0, "end_time": 600},
            "execution_id": execution_a,
            "rca_algorithms": rca,
        }),
    )
    .await;
    faultline_db::queries::tasks::upsert_task(&pool, &task).await.unwrap();
    let outcome = CollectResultExecutor.execute(&engine.ctx, &task).await.unwrap();
    assert_eq!(
        outcome,
        ExecOutcome::Completed {
            event: names::DATAPACK_NO_DETECTOR_DATA
        }
    );

    // Case 2: rows, but nothing anomalous.
    let execution_b = Uuid::now_v7();
    executions::insert_detector_result(&pool, execution_b, "ts-order", 0)
        .await
        .unwrap();
    let task = make_task_with_trace(
        &pool,
        TraceKind::FullPipeline,
        TaskKind::CollectResult,
        5,
        serde_json::json!({
            "algorithm": {"name": "detector", "version_id": "v1", "image_ref": "r/d:1"},
            "datapack": {"name": "dp", "start_time": 0, "end_time": 600},
            "execution_id": execution_b,
            "rca_algorithms": rca,
        }),
    )
    .await;
    faultline_db::queries::tasks::upsert_task(&pool, &task).await.unwrap();
    let outcome = CollectResultExecutor.execute(&engine.ctx, &task).await.unwrap();
    assert_eq!(
        outcome,
        ExecOutcome::Completed {
            event: names::DATAPACK_NO_ANOMALY
        }
    );
    // No RCA fan-out happened.
    let children = task_db::list_tasks_for_trace(&pool, task.trace_id).await.unwrap();
    assert_eq!(children.iter().filter(|t| t.kind == TaskKind::RunAlgorithm).count(), 0);

    // Case 3: anomalies: one RunAlgorithm per configured RCA algorithm.
    let execution_c = Uuid::now_v7();
    executions::insert_detector_result(&pool, execution_c, "ts-order", 3)
        .await
        .unwrap();
    let task = make_task_with_trace(
        &pool,
        TraceKind::FullPipeline,
        TaskKind::CollectResult,
        5,
        serde_json::json!({
            "algorithm": {"name": "detector", "version_id": "v1", "image_ref": "r/d:1"},
            "datapack": {"name": "dp", "start_time": 0, "end_time": 600},
            "execution_id": execution_c,
            "rca_algorithms": rca,
        }),
    )
    .await;
    faultline_db::queries::tasks::upsert_task(&pool, &task).await.unwrap();
    let outcome = CollectResultExecutor.execute(&engine.ctx, &task).await.unwrap();
    assert_eq!(
        outcome,
        ExecOutcome::Completed {
            event: names::DATAPACK_RESULT_COLLECTION
        }
    );

    let children = task_db::list_tasks_for_trace(&pool, task.trace_id).await.unwrap();
    let runs: Vec<_> = children
        .iter()
        .filter(|t| t.kind == TaskKind::RunAlgorithm)
        .collect();
    assert_eq!(runs.len(), 2);
    assert!(runs.iter().all(|t| t.level == 6));
    assert!(runs.iter().all(|t| t.parent_task_id == Some(task.id)));

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn collect_result_rca_paths() {
    let (pool, db_name) = create_test_db().await;
    let engine = make_engine(&pool, &[], 0).await;

    // RCA algorithm with rows.
    let execution = Uuid::now_v7();
    executions::insert_granularity_result(&pool, execution, "service", "ts-order", 1)
        .await
        .unwrap();
    let task = make_task_with_trace(
        &pool,
        TraceKind::AlgorithmRun,
        TaskKind::CollectResult,
        2,
        serde_json::json!({
            "algorithm": {"name": "e-diagnose", "version_id": "v1", "image_ref": "r/e:1"},
            "datapack": {"name": "dp", "start_time": 0, "end_time": 600},
            "execution_id": execution,
        }),
    )
    .await;
    faultline_db::queries::tasks::upsert_task(&pool, &task).await.unwrap();
    let outcome = CollectResultExecutor.execute(&engine.ctx, &task).await.unwrap();
    assert_eq!(
        outcome,
        ExecOutcome::Completed {
            event: names::ALGO_RESULT_COLLECTION
        }
    );

    // RCA algorithm without rows.
    let task = make_task_with_trace(
        &pool,
        TraceKind::AlgorithmRun,
        TaskKind::CollectResult,
        2,
        serde_json::json!({
            "algorithm": {"name": "e-diagnose", "version_id": "v1", "image_ref": "r/e:1"},
            "datapack": {"name": "dp", "start_time": 0, "end_time": 600},
            "execution_id": Uuid::now_v7(),
        }),
    )
    .await;
    faultline_db::queries::tasks::upsert_task(&pool, &task).await.unwrap();
    let outcome = CollectResultExecutor.execute(&engine.ctx, &task).await.unwrap();
    assert_eq!(
        outcome,
        ExecOutcome::Completed {
            event: names::ALGO_NO_RESULT_DATA
        }
    );

    drop_test_db(&db_name).await;
}
