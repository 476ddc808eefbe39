use std::sync::Arc;
use std::time::Duration;

use crate::agent_engine::control::{RequestState, TaskRegistry};
use crate::agent_engine::event_bus::{EventBus, TaskEvent};
use crate::agent_engine::history::ExecutionLedger;
use crate::agent_engine::loop_control::RepetitionTracker;
use crate::agent_engine::state::{StepResult, TaskOutcome, TaskReport, TaskStatus};
use crate::config::OrchestratorConfig;
use crate::device::DeviceDriver;
use crate::errors::{PilotError, PilotResult};
use crate::executor::launch::AppCatalog;
use crate::executor::{DeviceHandle, StepExecutor};
use crate::perception::snapshot::{gather, DeviceSnapshot};
use crate::perception::types::DeviceInfo;
use crate::planner::types::{
    summarize_elements, ActionStep, InitialPlanRequest, NextStepRequest, OnFail, Plan, RetryPolicy,
};
use crate::planner::Planner;
use crate::verifier::Verifier;

/// Per-task mutable state of one control loop run.
struct TaskRun {
    task_id: String,
    goal: String,
    device: DeviceInfo,
    handle: DeviceHandle,
    ledger: ExecutionLedger,
    tracker: RepetitionTracker,
    /// Ledger length at the last repetition check.
    observed: usize,
    iteration: u32,
}

/// What the loop does after a plan has been executed.
enum PlanFlow {
    Continue,
    Abort { step_id: String },
}

/// Drives tasks: observe the device, ask the planner, execute and verify the
/// returned steps, repeat until the planner has nothing left to do.
#[derive(Clone)]
pub struct Orchestrator {
    driver: Arc<dyn DeviceDriver>,
    planner: Arc<dyn Planner>,
    executor: StepExecutor,
    verifier: Verifier,
    events: EventBus,
    registry: TaskRegistry,
    config: Arc<OrchestratorConfig>,
}

impl Orchestrator {
    pub fn new(
        driver: Arc<dyn DeviceDriver>,
        planner: Arc<dyn Planner>,
        events: EventBus,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            executor: StepExecutor::new(driver.clone(), Arc::new(AppCatalog::default())),
            verifier: Verifier::new(driver.clone()),
            driver,
            planner,
            events,
            registry: TaskRegistry::default(),
            config: Arc::new(config),
        }
    }

    /// Replaces the app-name table used by `Launch` actions.
    pub fn with_catalog(mut self, catalog: AppCatalog) -> Self {
        self.executor = StepExecutor::new(self.driver.clone(), Arc::new(catalog));
        self
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<TaskEvent> {
        self.events.subscribe()
    }

    pub async fn active_tasks(&self) -> Vec<String> {
        self.registry.ids().await
    }

    /// Registers a task and runs it in the background. Progress and the final
    /// report arrive on the event stream.
    pub async fn start_task(&self, goal: &str, device: Option<String>) -> PilotResult<String> {
        let task_id = uuid::Uuid::new_v4().to_string();
        let state = self.registry.register(&task_id).await;
        tracing::info!(task_id = %task_id, goal = %goal, "task registered");

        let this = self.clone();
        let id = task_id.clone();
        let goal = goal.to_string();
        tokio::spawn(async move {
            if let Err(e) = this.drive(&id, &goal, device.as_deref(), state).await {
                tracing::error!(task_id = %id, error = %e, "task failed to start");
            }
        });
        Ok(task_id)
    }

    /// Runs a task to completion without spawning it.
    pub async fn run_task(&self, goal: &str, device: Option<&str>) -> PilotResult<TaskReport> {
        let task_id = uuid::Uuid::new_v4().to_string();
        let state = self.registry.register(&task_id).await;
        self.drive(&task_id, goal, device, state).await
    }

    pub async fn stop_task(&self, task_id: &str) -> bool {
        let stopped = self.registry.stop(task_id).await;
        if stopped {
            tracing::info!(task_id, "stop requested");
            self.status_changed(task_id, TaskStatus::Stopped);
        }
        stopped
    }

    pub async fn pause_task(&self, task_id: &str) -> bool {
        let paused = self.registry.pause(task_id).await;
        if paused {
            tracing::info!(task_id, "pause requested");
            self.status_changed(task_id, TaskStatus::Paused);
        }
        paused
    }

    pub async fn resume_task(&self, task_id: &str) -> bool {
        let resumed = self.registry.resume(task_id).await;
        if resumed {
            tracing::info!(task_id, "resume requested");
            self.status_changed(task_id, TaskStatus::Running);
        }
        resumed
    }

    fn status_changed(&self, task_id: &str, status: TaskStatus) {
        self.events.emit(TaskEvent::StatusChanged { task_id: task_id.to_string(), status });
    }

    /// Setup, loop, teardown. The task is unregistered however it ends.
    async fn drive(
        &self,
        task_id: &str,
        goal: &str,
        device: Option<&str>,
        state: Arc<RequestState>,
    ) -> PilotResult<TaskReport> {
        let result = match self.prepare(task_id, goal, device).await {
            Ok(run) => Ok(self.run_loop(run, &state).await),
            Err(e) => Err(e),
        };
        self.registry.remove(task_id).await;

        match &result {
            Ok(report) => {
                tracing::info!(
                    task_id,
                    success = report.success,
                    outcome = ?report.outcome,
                    total = report.summary.total,
                    failed = report.summary.failed,
                    iterations = report.summary.iterations,
                    "task finished"
                );
                self.events.emit(TaskEvent::Finished { report: report.clone() });
            }
            Err(e) => {
                tracing::error!(task_id, error = %e, "task setup failed");
                self.events.emit(TaskEvent::Failed { task_id: task_id.to_string(), error: e.to_string() });
            }
        }
        result
    }

    async fn prepare(&self, task_id: &str, goal: &str, preferred: Option<&str>) -> PilotResult<TaskRun> {
        let device = self.select_device(preferred).await?;

        let readiness = self.driver.check_ready(&device.id).await;
        if !readiness.ready() {
            return Err(PilotError::DeviceNotReady(readiness.issues().join(", ")));
        }
        tracing::info!(
            task_id,
            serial = %device.id,
            model = %device.model,
            foreground = ?readiness.foreground,
            "device ready"
        );

        self.events.emit(TaskEvent::Started {
            task_id: task_id.to_string(),
            goal: goal.to_string(),
            device: device.clone(),
        });

        let ledger = if self.config.persist_ledger {
            ExecutionLedger::persistent(task_id)
        } else {
            ExecutionLedger::in_memory()
        };
        Ok(TaskRun {
            task_id: task_id.to_string(),
            goal: goal.to_string(),
            handle: DeviceHandle::from(&device),
            device,
            ledger,
            tracker: RepetitionTracker::new(),
            observed: 0,
            iteration: 0,
        })
    }

    /// The preferred device when connected, else the first one.
    async fn select_device(&self, preferred: Option<&str>) -> PilotResult<DeviceInfo> {
        let devices = self.driver.list_devices().await?;
        if let Some(id) = preferred {
            if let Some(found) = devices.iter().find(|d| d.id == id) {
                return Ok(found.clone());
            }
        }
        let first = devices.into_iter().next().ok_or(PilotError::NoDevice)?;
        if let Some(id) = preferred {
            tracing::warn!(requested = id, using = %first.id, "requested device not connected");
        }
        Ok(first)
    }

    async fn run_loop(&self, mut run: TaskRun, state: &RequestState) -> TaskReport {
        let mut watcher = state.watcher();
        let mut completion_message = None;

        let outcome = loop {
            if !watcher.checkpoint().await {
                break TaskOutcome::Stopped;
            }
            if run.iteration >= self.config.max_iterations {
                break TaskOutcome::Exhausted;
            }
            run.iteration += 1;
            tracing::info!(task_id = %run.task_id, iteration = run.iteration, "iteration started");
            self.events.log(&run.task_id, format!("iteration {}", run.iteration));

            let snapshot = self.observe(&mut run).await;

            let plan = match self.request_plan(&run, snapshot).await {
                Ok(plan) => plan,
                Err(e) => {
                    tracing::error!(task_id = %run.task_id, error = %e, "planner request failed");
                    break TaskOutcome::Failed { reason: e.to_string() };
                }
            };
            if plan.is_complete() {
                tracing::info!(task_id = %run.task_id, message = ?plan.message, "planner reports goal reached");
                completion_message = plan.message;
                break TaskOutcome::Completed;
            }

            tracing::info!(task_id = %run.task_id, steps = plan.steps.len(), "plan received");
            match self.execute_plan(&mut run, plan).await {
                PlanFlow::Continue => {}
                PlanFlow::Abort { step_id } => break TaskOutcome::Aborted { step_id },
            }

            tokio::time::sleep(Duration::from_millis(self.config.iteration_delay_ms)).await;
        };

        let summary = run.ledger.summary(run.iteration);
        let success = TaskReport::is_success(&outcome, &summary);
        let message = match &outcome {
            TaskOutcome::Completed => completion_message.unwrap_or_else(|| "goal reached".into()),
            TaskOutcome::Exhausted => format!("iteration limit of {} reached", self.config.max_iterations),
            TaskOutcome::Stopped => "stopped by request".into(),
            TaskOutcome::Aborted { step_id } => format!("step {step_id} failed and aborted the task"),
            TaskOutcome::Failed { reason } => reason.clone(),
        };
        TaskReport {
            task_id: run.task_id,
            outcome,
            success,
            results: run.ledger.into_results(),
            summary,
            message,
        }
    }

    /// Gathers device state and updates the progress trackers.
    async fn observe(&self, run: &mut TaskRun) -> DeviceSnapshot {
        let snapshot = gather(self.driver.as_ref(), &run.handle.serial).await;

        if let Some(data) = &snapshot.screenshot {
            self.events.emit(TaskEvent::Screenshot {
                task_id: run.task_id.clone(),
                iteration: run.iteration,
                data: data.clone(),
            });
        }

        run.tracker.record_ui_snapshot(snapshot.has_hierarchy());
        if !snapshot.has_hierarchy() {
            tracing::warn!(
                task_id = %run.task_id,
                consecutive = run.tracker.ui_failures(),
                fallback = snapshot.elements.is_some(),
                "UI hierarchy not obtained"
            );
        }

        if run.ledger.len() > run.observed {
            if let Some(last) = run.ledger.last() {
                run.tracker.observe(last.signature());
            }
            run.observed = run.ledger.len();
        }
        snapshot
    }

    async fn request_plan(&self, run: &TaskRun, snapshot: DeviceSnapshot) -> PilotResult<Plan> {
        if run.iteration == 1 {
            let ui_summary = snapshot
                .elements
                .as_deref()
                .map(|els| summarize_elements(els, run.device.screen_width, run.device.screen_height));
            let req = InitialPlanRequest {
                goal: run.goal.clone(),
                device: run.device.clone(),
                ui_summary,
                window: snapshot.window,
                screenshot: snapshot.screenshot,
            };
            return self.planner.request_initial_plan(&req).await;
        }

        let repetition_hints = run.tracker.hints();
        if !repetition_hints.is_empty() {
            tracing::warn!(task_id = %run.task_id, hints = ?repetition_hints, "repeated operations detected");
        }
        let req = NextStepRequest {
            goal: run.goal.clone(),
            device: run.device.clone(),
            history: run.ledger.history().to_vec(),
            repetition_hints,
            ui_hint: run.tracker.ui_hint(),
            window: snapshot.window,
            screenshot: snapshot.screenshot,
            ui_elements: snapshot.elements,
        };
        self.planner.request_next_step(&req).await
    }

    async fn execute_plan(&self, run: &mut TaskRun, plan: Plan) -> PlanFlow {
        for step in plan.steps {
            let step = step.bind_serial(&run.handle.serial);
            let result = self.run_step(&step, &run.handle, run.iteration).await;
            let success = result.success;

            self.events.emit(TaskEvent::StepFinished { task_id: run.task_id.clone(), result: result.clone() });
            run.ledger.record(result);

            if success {
                continue;
            }
            match step.on_fail {
                OnFail::Abort => {
                    tracing::error!(task_id = %run.task_id, step_id = %step.id, "step failed, aborting task");
                    return PlanFlow::Abort { step_id: step.id };
                }
                OnFail::ReplanRequest => {
                    tracing::warn!(task_id = %run.task_id, step_id = %step.id, "step failed, next iteration replans");
                    self.events.log(&run.task_id, format!("step {} failed, replan requested", step.id));
                }
                OnFail::Retry => {
                    tracing::warn!(task_id = %run.task_id, step_id = %step.id, "step failed after retries, continuing");
                }
            }
        }
        PlanFlow::Continue
    }

    /// Execute, settle, verify. A failed verification under the `retry`
    /// policy re-runs the step while the attempt budget lasts.
    async fn run_step(&self, step: &ActionStep, device: &DeviceHandle, iteration: u32) -> StepResult {
        let budget = step.retry_policy.max_attempts.max(1);
        let mut used = 0;
        let finish = |success, command_result, verify_result, error, attempts| StepResult {
            step_id: step.id.clone(),
            description: step.description.clone(),
            iteration,
            success,
            command_result,
            verify_result,
            error,
            attempts,
            finished_at: chrono::Utc::now(),
        };

        loop {
            let policy = RetryPolicy { max_attempts: budget - used, ..step.retry_policy };
            let executed = match self.executor.execute_with_retry(step, device, policy).await {
                Ok(executed) => executed,
                Err(e) => return finish(false, None, None, Some(e.to_string()), budget),
            };
            used += executed.attempts;

            if step.wait_after_ms > 0 {
                tokio::time::sleep(Duration::from_millis(step.wait_after_ms)).await;
            }
            if step.verify.is_empty() {
                return finish(true, Some(executed.output), None, None, used);
            }

            let verdict = self.verifier.verify_step(step, device, &executed.output).await;
            if verdict.success {
                return finish(true, Some(executed.output), Some(verdict), None, used);
            }
            if step.on_fail == OnFail::Retry && used < budget {
                tracing::warn!(
                    step_id = %step.id,
                    reason = %verdict.message,
                    attempt = used,
                    max = budget,
                    "verification failed, re-executing step"
                );
                tokio::time::sleep(Duration::from_millis(step.retry_policy.backoff_ms)).await;
                continue;
            }
            let error = PilotError::Verification(verdict.message.clone()).to_string();
            return finish(false, Some(executed.output), Some(verdict), Some(error), used);
        }
    }
}
