//! Integration tests for full provisioning runs.
//!
//! Tests: SagaCoordinator → StepExecutor → actions → in-memory clients → DeploymentPoller
//!
//! Verifies:
//! - A run with every client succeeding completes all nine steps in order
//! - A failure at any step stops the run there, with earlier steps completed
//! - Asynchronous deployments hand control back and are finished by the poller
//! - Cancellation, retries and timeouts behave as configured

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use proptest::prelude::*;

    use shopforge_core::DeploymentId;
    use shopforge_saga::{
        DeploymentStatus, FailureKind, InMemoryObserver, OverallStatus, PROVISIONING_STEPS,
        ProgressEvent, ProvisioningInput, SagaError, StepFailure, StepId, StepStatus,
        ValidationError,
    };

    use crate::clients::{ClientError, InMemoryBackend, Operation, ProvisioningClients};
    use crate::coordinator::SagaCoordinator;
    use crate::executor::{StepAction, StepInput, StepOutput};
    use crate::handle::RunPhase;
    use crate::poller::PollerConfig;
    use crate::retry::{RetryPolicy, StepPolicy};

    fn acme() -> ProvisioningInput {
        ProvisioningInput {
            plan_id: "pro".into(),
            merchant_name: "Acme".into(),
            merchant_email: "a@acme.com".into(),
            custom_subdomain: None,
        }
    }

    fn setup() -> (Arc<InMemoryBackend>, Arc<InMemoryObserver>, SagaCoordinator) {
        let backend = Arc::new(InMemoryBackend::new());
        let observer = Arc::new(InMemoryObserver::new());
        let coordinator = SagaCoordinator::builder(ProvisioningClients::in_memory(backend.clone()))
            .observer(observer.clone())
            .build();
        (backend, observer, coordinator)
    }

    fn step_ids() -> Vec<StepId> {
        PROVISIONING_STEPS.iter().map(|s| s.id).collect()
    }

    fn finished_events(observer: &InMemoryObserver) -> usize {
        observer
            .all()
            .iter()
            .filter(|e| matches!(e, ProgressEvent::RunFinished { .. }))
            .count()
    }

    struct FailingFinalize;

    #[async_trait]
    impl StepAction for FailingFinalize {
        async fn run(&self, _input: &StepInput) -> Result<StepOutput, StepFailure> {
            Err(StepFailure::new(FailureKind::Unavailable, "storefront announcer down"))
        }
    }

    #[tokio::test]
    async fn all_clients_succeeding_completes_every_step_in_order() {
        let (backend, observer, coordinator) = setup();

        let run = coordinator.submit(acme()).unwrap().finished().await;

        assert_eq!(run.overall_status(), OverallStatus::Completed);
        let ids: Vec<StepId> = run.results().iter().map(|r| r.step_id).collect();
        assert_eq!(ids, step_ids());
        assert!(run.results().iter().all(|r| r.status == StepStatus::Completed));
        assert!(run.finished_at().is_some());
        assert!(run.invariants_hold());

        assert_eq!(backend.merchants().len(), 1);
        assert_eq!(backend.subscriptions().len(), 1);
        let database = &backend.databases()[0];
        assert_eq!(database.collections.len(), 6);
        assert_eq!(database.indexes, 8);

        assert_eq!(observer.finished(), Some(OverallStatus::Completed));
        assert_eq!(finished_events(&observer), 1);
        // running + completed per step
        assert_eq!(observer.step_statuses().len(), 18);
    }

    #[tokio::test]
    async fn local_deployments_complete_without_polling() {
        let (backend, _observer, coordinator) = setup();
        backend.script_deployment("d9", "QUEUED", Some("http://localhost:3000/stores/acme"));

        let run = coordinator.submit(acme()).unwrap().finished().await;

        assert_eq!(run.overall_status(), OverallStatus::Completed);
        assert_eq!(backend.calls(Operation::GetDeploymentStatus), 0);
        assert_eq!(
            run.deployment().unwrap().url.as_deref(),
            Some("http://localhost:3000/stores/acme")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn queued_deployment_is_finished_by_the_poller() {
        let (backend, observer, coordinator) = setup();
        backend.script_deployment("d1", "QUEUED", None);
        backend.script_statuses([
            Ok(("BUILDING", None)),
            Ok(("READY", Some("acme.example.com"))),
        ]);
        backend.set_latency(Operation::GetDeploymentStatus, Duration::from_secs(1));

        let handle = coordinator.submit(acme()).unwrap();
        let accepted = handle.accepted().await;

        assert_eq!(handle.phase(), RunPhase::Accepted);
        assert_eq!(accepted.overall_status(), OverallStatus::Running);
        assert_eq!(accepted.results().len(), 7);
        assert_eq!(
            accepted.result(StepId::CreateDeployment).unwrap().status,
            StepStatus::Running
        );
        let deployment = accepted.deployment().unwrap();
        assert_eq!(deployment.deployment_id.as_str(), "d1");
        assert_eq!(deployment.last_known_status, DeploymentStatus::Queued);

        // First query goes out at acceptance and answers BUILDING after 1s.
        tokio::time::sleep(Duration::from_secs(2)).await;
        let building = handle.snapshot().await;
        assert_eq!(backend.calls(Operation::GetDeploymentStatus), 1);
        assert_eq!(building.overall_status(), OverallStatus::Running);
        let step = building.result(StepId::CreateDeployment).unwrap();
        assert_eq!(step.status, StepStatus::Running);
        assert_eq!(step.message.as_deref(), Some("deployment status: BUILDING"));
        assert_eq!(
            building.deployment().unwrap().last_known_status,
            DeploymentStatus::Building
        );
        assert_eq!(handle.phase(), RunPhase::Accepted);

        // Second query at 5s answers READY.
        tokio::time::sleep(Duration::from_secs(5)).await;
        let run = handle.snapshot().await;

        assert_eq!(run.overall_status(), OverallStatus::Completed);
        assert_eq!(run.deployment().unwrap().url.as_deref(), Some("acme.example.com"));
        assert_eq!(backend.calls(Operation::GetDeploymentStatus), 2);
        assert!(observer.all().iter().any(|e| matches!(
            e,
            ProgressEvent::Step(t) if t.message.as_deref() == Some("deployment status: BUILDING")
        )));

        let record = backend
            .deployment(&DeploymentId::parse("d1").unwrap())
            .unwrap();
        assert!(record
            .environment
            .contains(&("STORE_URL".to_string(), "acme.example.com".to_string())));
    }

    #[tokio::test(start_paused = true)]
    async fn non_terminal_status_keeps_the_run_running_with_one_query_at_a_time() {
        let (backend, _observer, coordinator) = setup();
        backend.script_deployment("d1", "QUEUED", None);
        backend.script_statuses([Ok(("BUILDING", None))]);
        // Slower than the poll interval.
        backend.set_latency(Operation::GetDeploymentStatus, Duration::from_secs(7));

        let handle = coordinator.submit(acme()).unwrap();
        handle.accepted().await;
        tokio::time::sleep(Duration::from_secs(120)).await;

        let run = handle.snapshot().await;
        assert_eq!(run.overall_status(), OverallStatus::Running);
        assert_eq!(
            run.result(StepId::CreateDeployment).unwrap().status,
            StepStatus::Running
        );
        assert!(backend.calls(Operation::GetDeploymentStatus) > 5);
        assert_eq!(backend.max_concurrent_status_queries(), 1);
        assert_eq!(backend.calls(Operation::ConfigureEnvironment), 0);

        handle.cancel().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn poller_gives_up_after_its_bound() {
        let backend = Arc::new(InMemoryBackend::new());
        backend.script_deployment("d1", "QUEUED", None);
        backend.script_statuses([Ok(("BUILDING", None))]);
        let coordinator = SagaCoordinator::builder(ProvisioningClients::in_memory(backend.clone()))
            .observer(Arc::new(InMemoryObserver::new()))
            .poller(PollerConfig {
                interval: Duration::from_secs(1),
                max_attempts: 3,
                max_duration: Duration::from_secs(600),
            })
            .build();

        let run = coordinator.submit(acme()).unwrap().finished().await;

        assert_eq!(run.overall_status(), OverallStatus::Failed);
        let (step, _) = run.failure().unwrap();
        assert_eq!(step, StepId::CreateDeployment);
        assert_eq!(
            run.result(step).unwrap().failure_kind,
            Some(FailureKind::DeploymentTimeout)
        );
        assert_eq!(backend.calls(Operation::GetDeploymentStatus), 3);
        assert_eq!(backend.calls(Operation::ConfigureEnvironment), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn error_status_fails_the_deployment_step() {
        let (backend, observer, coordinator) = setup();
        backend.script_deployment("d1", "QUEUED", None);
        backend.script_statuses([Ok(("QUEUED", None)), Ok(("error", None))]);

        let run = coordinator.submit(acme()).unwrap().finished().await;

        assert_eq!(run.overall_status(), OverallStatus::Failed);
        assert_eq!(run.failure().map(|(s, _)| s), Some(StepId::CreateDeployment));
        assert_eq!(run.completed_steps().len(), 6);
        assert!(run.invariants_hold());
        assert_eq!(observer.finished(), Some(OverallStatus::Failed));
    }

    #[tokio::test]
    async fn invalid_subdomain_fails_before_any_step() {
        let (backend, observer, coordinator) = setup();

        let err = coordinator
            .submit(ProvisioningInput {
                custom_subdomain: Some("My Store!".into()),
                ..acme()
            })
            .unwrap_err();

        assert!(matches!(err, ValidationError::CustomSubdomain(_)));
        assert_eq!(err.field(), "custom_subdomain");
        assert_eq!(backend.total_calls(), 0);
        assert!(observer.all().is_empty());
    }

    #[tokio::test]
    async fn plan_not_found_at_subscription_stops_the_run() {
        let (backend, _observer, coordinator) = setup();
        backend.fail_once(
            Operation::CreateSubscription,
            ClientError::PlanNotFound("pro".into()),
        );

        let run = coordinator.submit(acme()).unwrap().finished().await;

        assert_eq!(run.overall_status(), OverallStatus::Failed);
        let merchant = run.result(StepId::CreateMerchant).unwrap();
        assert_eq!(merchant.status, StepStatus::Completed);
        assert!(run.context().merchant_id.is_some());

        let subscription = run.result(StepId::CreateSubscription).unwrap();
        assert_eq!(subscription.status, StepStatus::Error);
        assert_eq!(subscription.failure_kind, Some(FailureKind::PlanNotFound));

        assert_eq!(run.results().len(), 3);
        assert_eq!(backend.calls(Operation::CreateDatabase), 0);
        assert_eq!(backend.calls(Operation::CreateDeployment), 0);
    }

    #[tokio::test]
    async fn inactive_plan_fails_plan_selection() {
        let (backend, _observer, coordinator) = setup();

        let run = coordinator
            .submit(ProvisioningInput {
                plan_id: "legacy".into(),
                ..acme()
            })
            .unwrap()
            .finished()
            .await;

        assert_eq!(run.failure().map(|(s, _)| s), Some(StepId::SelectPlan));
        assert_eq!(backend.calls(Operation::CreateMerchant), 0);
    }

    #[tokio::test]
    async fn second_run_for_the_same_email_conflicts() {
        let (_backend, _observer, coordinator) = setup();

        let first = coordinator.submit(acme()).unwrap().finished().await;
        let second = coordinator.submit(acme()).unwrap().finished().await;

        assert_eq!(first.overall_status(), OverallStatus::Completed);
        assert_eq!(second.overall_status(), OverallStatus::Failed);
        let merchant = second.result(StepId::CreateMerchant).unwrap();
        assert_eq!(merchant.failure_kind, Some(FailureKind::Conflict));
    }

    #[tokio::test]
    async fn taken_subdomain_fails_the_deployment() {
        let (backend, _observer, coordinator) = setup();
        backend.reserve_subdomain("acme");

        let run = coordinator
            .submit(ProvisioningInput {
                custom_subdomain: Some("acme".into()),
                ..acme()
            })
            .unwrap()
            .finished()
            .await;

        let deployment = run.result(StepId::CreateDeployment).unwrap();
        assert_eq!(deployment.failure_kind, Some(FailureKind::SubdomainTaken));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried_when_the_step_allows_it() {
        let backend = Arc::new(InMemoryBackend::new());
        backend.fail_once(
            Operation::CreateMerchant,
            ClientError::Unavailable("registry restarting".into()),
        );
        let coordinator = SagaCoordinator::builder(ProvisioningClients::in_memory(backend.clone()))
            .observer(Arc::new(InMemoryObserver::new()))
            .step_policy(
                StepId::CreateMerchant,
                StepPolicy::default().with_retry(RetryPolicy::fixed(3, Duration::from_secs(1))),
            )
            .build();

        let run = coordinator.submit(acme()).unwrap().finished().await;

        assert_eq!(run.overall_status(), OverallStatus::Completed);
        assert_eq!(run.result(StepId::CreateMerchant).unwrap().attempts, 2);
        assert_eq!(backend.calls(Operation::CreateMerchant), 2);
    }

    #[tokio::test]
    async fn steps_without_retry_fail_on_the_first_transient_error() {
        let (backend, _observer, coordinator) = setup();
        backend.fail_once(
            Operation::CreateMerchant,
            ClientError::Unavailable("registry restarting".into()),
        );

        let run = coordinator.submit(acme()).unwrap().finished().await;

        assert_eq!(run.failure().map(|(s, _)| s), Some(StepId::CreateMerchant));
        assert_eq!(backend.calls(Operation::CreateMerchant), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_steps_time_out() {
        let backend = Arc::new(InMemoryBackend::new());
        backend.set_latency(Operation::CreateDatabase, Duration::from_secs(60));
        let coordinator = SagaCoordinator::builder(ProvisioningClients::in_memory(backend.clone()))
            .observer(Arc::new(InMemoryObserver::new()))
            .default_policy(StepPolicy::new(Duration::from_secs(10)))
            .build();

        let run = coordinator.submit(acme()).unwrap().finished().await;

        let database = run.result(StepId::CreateDatabase).unwrap();
        assert_eq!(database.status, StepStatus::Error);
        assert_eq!(database.failure_kind, Some(FailureKind::Timeout));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelling_stops_the_run_and_discards_in_flight_results() {
        let (backend, observer, coordinator) = setup();
        backend.set_latency(Operation::CreateDatabase, Duration::from_secs(10));

        let handle = coordinator.submit(acme()).unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        let cancelled = handle.cancel().await.unwrap();

        assert_eq!(cancelled.overall_status(), OverallStatus::Cancelled);
        assert_eq!(
            cancelled.result(StepId::CreateDatabase).unwrap().status,
            StepStatus::Cancelled
        );
        assert_eq!(handle.phase(), RunPhase::Finished(OverallStatus::Cancelled));

        // Let the in-flight call return.
        tokio::time::sleep(Duration::from_secs(30)).await;
        let run = handle.snapshot().await;
        assert_eq!(run.results().len(), 4);
        assert_eq!(
            run.result(StepId::CreateDatabase).unwrap().status,
            StepStatus::Cancelled
        );
        assert_eq!(backend.calls(Operation::InitializeSchema), 0);
        assert!(run.invariants_hold());
        assert_eq!(finished_events(&observer), 1);

        assert!(matches!(
            handle.cancel().await,
            Err(SagaError::RunFinished("cancelled"))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelling_while_polling_stops_the_poller() {
        let (backend, _observer, coordinator) = setup();
        backend.script_deployment("d1", "QUEUED", None);
        backend.script_statuses([Ok(("BUILDING", None))]);

        let handle = coordinator.submit(acme()).unwrap();
        handle.accepted().await;
        tokio::time::sleep(Duration::from_secs(11)).await;
        handle.cancel().await.unwrap();
        let calls = backend.calls(Operation::GetDeploymentStatus);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(backend.calls(Operation::GetDeploymentStatus), calls);
        let run = handle.finished().await;
        assert_eq!(
            run.result(StepId::CreateDeployment).unwrap().status,
            StepStatus::Cancelled
        );
    }

    fn run_failing_at(index: usize) -> Result<(), TestCaseError> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async {
            let steps = step_ids();
            let failing = steps[index];
            let backend = Arc::new(InMemoryBackend::new());
            let mut builder = SagaCoordinator::builder(ProvisioningClients::in_memory(backend.clone()))
                .observer(Arc::new(InMemoryObserver::new()));
            match Operation::for_step(failing) {
                Some(op) => backend.fail_always(op, ClientError::Validation("rejected".into())),
                None => builder = builder.action(failing, Arc::new(FailingFinalize)),
            }

            let run = builder.build().submit(acme()).unwrap().finished().await;

            prop_assert_eq!(run.overall_status(), OverallStatus::Failed);
            prop_assert_eq!(run.results().len(), index + 1);
            for (i, (step, status)) in run.step_statuses().into_iter().enumerate() {
                prop_assert_eq!(step, steps[i]);
                let expected = match i.cmp(&index) {
                    std::cmp::Ordering::Less => StepStatus::Completed,
                    std::cmp::Ordering::Equal => StepStatus::Error,
                    std::cmp::Ordering::Greater => StepStatus::Pending,
                };
                prop_assert_eq!(status, expected);
            }
            prop_assert_eq!(run.failure().map(|(s, _)| s), Some(failing));
            prop_assert!(run.invariants_hold());
            for later in &steps[index + 1..] {
                if let Some(op) = Operation::for_step(*later) {
                    prop_assert_eq!(backend.calls(op), 0);
                }
            }
            Ok(())
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        /// Property: failing step i leaves steps before i completed, step i in
        /// error and every later step never executed.
        #[test]
        fn failing_any_step_stops_the_run_there(index in 0usize..9) {
            run_failing_at(index)?;
        }
    }
}
