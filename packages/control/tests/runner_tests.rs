//! End-to-end tests of submission, notification and execution against
//! Postgres. Provisioning collaborators are the in-memory mocks; the
//! directory is the real one.

mod common;

use std::sync::Arc;
use std::time::Duration;

use crate::common::{insert_member, insert_society, unique_crsid, TestHarness};
use control::common::JobId;
use control::domains::directory::Society;
use control::domains::jobs::{CreateSocietyDatabase, CreateUserDatabase};
use control::kernel::jobs::{
    ChannelNotifications, JobAction, JobNotifications, JobRunner, JobRunnerConfig, JobService,
    JobState, JobStore, LogEntry, MemoryLockTable, NewJobRecord, PgJobNotifications, StateChange,
    SubmissionContext, Wakeup, JOBS_CHANNEL, RUNNER_LOCK_KEY,
};
use control::kernel::{PostgresDirectory, SqlEngine, TestDependencies};
use test_context::test_context;

fn context() -> SubmissionContext {
    SubmissionContext::builder()
        .remote_addr("192.0.2.1")
        .host("control.srcf.net")
        .build()
}

/// Mocks for everything but the directory.
fn test_deps(ctx: &TestHarness) -> (TestDependencies, control::kernel::JobDeps) {
    let mocks = TestDependencies::new();
    let mut deps = mocks.job_deps();
    deps.directory = Arc::new(PostgresDirectory::new(ctx.db_pool.clone()));
    (mocks, deps)
}

fn runner(store: Arc<dyn JobStore>, deps: control::kernel::JobDeps) -> JobRunner {
    let (_tx, notifications) = ChannelNotifications::channel();
    let lock = MemoryLockTable::new().acquire(RUNNER_LOCK_KEY).unwrap();
    JobRunner::with_config(
        store,
        Box::new(notifications),
        Box::new(lock),
        deps,
        JobRunnerConfig::with_poll_timeout(Duration::from_secs(5)),
    )
}

/// Wait until `id` is announced; other tests' jobs are skipped.
async fn wait_for(notifications: &mut PgJobNotifications, id: JobId) -> bool {
    for _ in 0..50 {
        match notifications.recv(Duration::from_secs(5)).await.unwrap() {
            Wakeup::Job(got) if got == id => return true,
            Wakeup::Timeout => return false,
            _ => continue,
        }
    }
    false
}

#[test_context(TestHarness)]
#[tokio::test]
async fn queued_insert_is_announced(ctx: &TestHarness) {
    let mut notifications = PgJobNotifications::listen(&ctx.db_pool, JOBS_CHANNEL).await.unwrap();
    let job = ctx
        .store()
        .create(
            NewJobRecord::builder()
                .job_type("reset_user_password")
                .owner(Some(unique_crsid()))
                .build(),
            LogEntry::created("test"),
        )
        .await
        .unwrap();

    assert!(wait_for(&mut notifications, job.job_id).await);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn approval_is_announced(ctx: &TestHarness) {
    let store = ctx.store();
    let job = store
        .create(
            NewJobRecord::builder()
                .job_type("reset_user_password")
                .owner(Some(unique_crsid()))
                .state(JobState::Unapproved)
                .build(),
            LogEntry::created("test"),
        )
        .await
        .unwrap();

    let mut notifications = PgJobNotifications::listen(&ctx.db_pool, JOBS_CHANNEL).await.unwrap();
    store
        .transition(job.job_id, StateChange::for_action(JobAction::Approve, None, None))
        .await
        .unwrap();

    assert!(wait_for(&mut notifications, job.job_id).await);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn submitted_database_job_runs_to_done(ctx: &TestHarness) {
    let crsid = unique_crsid();
    let member = insert_member(&ctx.db_pool, &crsid, false).await;
    let (mocks, deps) = test_deps(ctx);
    let store: Arc<dyn JobStore> = Arc::new(ctx.store());
    let service = JobService::new(store.clone(), deps.clone());

    let job = service
        .submit(CreateUserDatabase::new(SqlEngine::Postgres, &member), &context())
        .await
        .unwrap();
    assert_eq!(job.state, JobState::Queued);

    let finished = runner(store.clone(), deps)
        .process_candidate(job.job_id)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(finished.state, JobState::Done);
    assert_eq!(finished.state_message, None);
    assert!(mocks.databases.has_database(SqlEngine::Postgres, &crsid));

    let logs = service.logs(job.job_id).await.unwrap();
    assert_eq!(logs.len(), 2);
    assert!(logs[0].message.starts_with(&format!("Job submitted by {} from 192.0.2.1", crsid)));
}

#[test_context(TestHarness)]
#[tokio::test]
async fn dangerous_member_waits_for_approval(ctx: &TestHarness) {
    let crsid = unique_crsid();
    let member = insert_member(&ctx.db_pool, &crsid, true).await;
    let (mocks, deps) = test_deps(ctx);
    let store: Arc<dyn JobStore> = Arc::new(ctx.store());
    let service = JobService::new(store.clone(), deps.clone());

    let job = service
        .submit(CreateUserDatabase::new(SqlEngine::MySql, &member), &context())
        .await
        .unwrap();
    assert_eq!(job.state, JobState::Unapproved);
    assert!(runner(store.clone(), deps.clone())
        .process_candidate(job.job_id)
        .await
        .unwrap()
        .is_none());

    let mail = mocks.notifier.sent_to("sysadmins@srcf.net");
    assert_eq!(mail.len(), 1);
    assert!(mail[0].body.contains(&format!("member {} is flagged as dangerous", crsid)));

    service.approve(job.job_id, "admin1").await.unwrap();
    let finished = runner(store, deps)
        .process_candidate(job.job_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(finished.state, JobState::Done);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn society_job_mails_every_admin(ctx: &TestHarness) {
    let (alice, bob) = (unique_crsid(), unique_crsid());
    let requester = insert_member(&ctx.db_pool, &alice, false).await;
    insert_member(&ctx.db_pool, &bob, false).await;
    let name = format!("soc{}", &unique_crsid()[1..]);
    insert_society(&ctx.db_pool, &name, &[&alice, &bob]).await;
    let society = Society::find_by_name(&name, &ctx.db_pool).await.unwrap().unwrap();
    assert_eq!(society.admins.len(), 2);

    let (mocks, deps) = test_deps(ctx);
    let store: Arc<dyn JobStore> = Arc::new(ctx.store());
    let service = JobService::new(store.clone(), deps.clone());

    let job = service
        .submit(CreateSocietyDatabase::new(SqlEngine::MySql, &requester, &society), &context())
        .await
        .unwrap();
    let finished = runner(store, deps)
        .process_candidate(job.job_id)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(finished.state, JobState::Done);
    assert_eq!(mocks.notifier.sent_to(&format!("{}@example.org", alice)).len(), 2);
    assert_eq!(mocks.notifier.sent_to(&format!("{}@example.org", bob)).len(), 1);
}
