//! The dispatcher (C6): the one place that turns a matched rule into
//! actionner/output/notifier calls, owns the continue/halt policy, and
//! recovers from a plugin panicking instead of taking the whole process
//! down with it.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tracing::{error, info, info_span, warn, Instrument};

use crate::config::ParamExtractor;
use crate::context;
use crate::error::StageError;
use crate::event::Event;
use crate::logline::{LogLine, Stage, Status};
use crate::observability::Metrics;
use crate::registry::{
    ActionnerOutcome, ActionnerRegistry, ContextProviderRegistry, NotifierRegistry, OutputRegistry,
};
use crate::rule::{Action, Rule, RuleSet};

/// Everything the dispatcher needs to turn one event into zero or more
/// stage invocations. Cheap to clone: every field is an `Arc`.
#[derive(Clone)]
pub struct Dispatcher {
    rules: Arc<RuleSet>,
    actionners: Arc<ActionnerRegistry>,
    outputs: Arc<OutputRegistry>,
    notifiers: Arc<NotifierRegistry>,
    context_providers: Arc<ContextProviderRegistry>,
    metrics: Arc<Metrics>,
    /// Dispatcher-level deadline applied to every action's
    /// precondition-check-plus-run, absent a per-action `timeout_seconds`
    /// parameter override (spec.md §5: "dispatcher-level deadline applies
    /// to the whole chain; per-action deadlines may be set via
    /// parameters"). `None` means no default timeout.
    default_action_timeout: Option<Duration>,
}

impl Dispatcher {
    pub fn new(
        rules: Arc<RuleSet>,
        actionners: Arc<ActionnerRegistry>,
        outputs: Arc<OutputRegistry>,
        notifiers: Arc<NotifierRegistry>,
        context_providers: Arc<ContextProviderRegistry>,
        metrics: Arc<Metrics>,
    ) -> Dispatcher {
        Dispatcher {
            rules,
            actionners,
            outputs,
            notifiers,
            context_providers,
            metrics,
            default_action_timeout: None,
        }
    }

    /// Sets the default per-action deadline used when an action doesn't
    /// specify its own `timeout_seconds` parameter.
    pub fn with_default_action_timeout(mut self, timeout: Option<Duration>) -> Dispatcher {
        self.default_action_timeout = timeout;
        self
    }

    /// Enriches `event`, then evaluates every rule against it in
    /// declaration order and runs the actions of each one that matches.
    /// Rule boundaries never stop dispatch by themselves (spec.md §4.2):
    /// every matching rule's action chain runs, independent of whether an
    /// earlier rule's chain halted on a failure.
    pub async fn dispatch_event(&self, mut event: Event) {
        context::enrich(&mut event, &self.context_providers).await;

        for rule in self.rules.iter() {
            let matched = match rule.predicate.matches(&event) {
                Ok(m) => m,
                Err(err) => {
                    warn!(rule = rule.name(), error = %err, "rule predicate failed to evaluate, skipping rule");
                    continue;
                }
            };
            if !matched {
                continue;
            }

            let mut matched_event = event.clone();
            matched_event.rule = rule.name().to_string();
            self.dispatch_rule(&matched_event, rule).await;
        }
    }

    /// Runs `rule`'s action chain strictly in order, stopping early when an
    /// action's outcome halts the chain (spec.md §4.4 step 5).
    async fn dispatch_rule(&self, event: &Event, rule: &Rule) {
        let span = info_span!("rule", trace_id = %event.trace_id, rule = rule.name());
        async {
            for action in &rule.spec.actions {
                let continue_on_error = action.continue_on_error.unwrap_or(rule.spec.continue_on_error);
                let should_continue = self
                    .dispatch_action(event, rule.name(), action, continue_on_error)
                    .await;
                if !should_continue {
                    break;
                }
            }
        }
        .instrument(span)
        .await;
    }

    /// Runs one action to completion and returns whether the rule's
    /// remaining actions should still run.
    async fn dispatch_action(
        &self,
        event: &Event,
        rule_name: &str,
        action: &Action,
        continue_on_error: bool,
    ) -> bool {
        let span = info_span!("action", trace_id = %event.trace_id, action = action.name.as_str());
        async {
            let mut line = LogLine::new(event.trace_id.clone());
            line.rule = Some(rule_name.to_string());
            line.action = Some(action.name.clone());
            line.actionner = Some(action.actionner.clone());
            line.stage = Some(Stage::Action);
            line.message = Some("action".to_string());

            let actionner = match self.actionners.get(&action.actionner) {
                Ok(a) => a,
                Err(err) => {
                    error!(error = %err, "actionner lookup failed after rule validation, this should not happen");
                    return true;
                }
            };
            line.actionner_category = Some(actionner.category().to_string());

            let action_timeout_seconds = ParamExtractor::new(&action.parameters).u64("timeout_seconds", 0);
            let timeout = if action_timeout_seconds > 0 {
                Some(Duration::from_secs(action_timeout_seconds))
            } else {
                self.default_action_timeout
            };

            let precondition = match timeout {
                Some(d) => match tokio::time::timeout(d, actionner.check_precondition(event, &action.parameters)).await {
                    Ok(result) => result,
                    Err(_) => Err(StageError::Cancelled),
                },
                None => actionner.check_precondition(event, &action.parameters).await,
            };

            if let Err(err) = precondition {
                // A timed-out precondition check is a cancellation, not a
                // precondition miss: it halts the chain like any other
                // cancellation (spec.md §7), everything else downgrades to
                // *ignored* and never halts.
                if matches!(err, StageError::Cancelled) {
                    self.metrics.record_action(rule_name, &action.actionner, "failure");
                    self.finish(line.with_status(Status::Failure), Some(&err), &action.notifiers)
                        .await;
                    return false;
                }
                self.metrics.record_action(rule_name, &action.actionner, "ignored");
                self.finish(
                    line.with_status(Status::Ignored),
                    Some(&err),
                    &action.notifiers,
                )
                .await;
                return true;
            }

            let outcome = self.run_action(&actionner, event, &action.parameters, timeout).await;

            let outcome = match outcome {
                Ok(outcome) => {
                    self.metrics.record_action(rule_name, &action.actionner, "success");
                    line.objects = outcome.objects.clone();
                    line.output = outcome.output.clone();
                    line.result = outcome.result.clone();
                    self.finish(line.clone().with_status(Status::Success), None, &action.notifiers)
                        .await;
                    outcome
                }
                Err(err) => {
                    // A precondition that failed inside `run` itself (not
                    // the dedicated `check_precondition` step) is still a
                    // precondition failure: downgraded to *ignored*, never
                    // halts (spec.md §7, testable property 5).
                    let status = if err.is_precondition() {
                        Status::Ignored
                    } else {
                        Status::Failure
                    };
                    self.metrics.record_action(
                        rule_name,
                        &action.actionner,
                        if status == Status::Ignored { "ignored" } else { "failure" },
                    );
                    let halt = status == Status::Failure && err.halts_chain(continue_on_error);
                    self.finish(line.with_status(status), Some(&err), &action.notifiers)
                        .await;
                    return !halt;
                }
            };

            for binding in &action.outputs {
                self.dispatch_output(event, rule_name, action, &binding.output, &outcome)
                    .await;
            }
            true
        }
        .instrument(span)
        .await
    }

    /// Runs the actionner's `action` method with panic recovery: a plugin
    /// panicking (e.g. on an unexpected nil/None it didn't guard against)
    /// becomes a [`StageError::Internal`] instead of aborting the event
    /// loop task.
    async fn run_action(
        &self,
        actionner: &Arc<dyn crate::registry::Actionner>,
        event: &Event,
        parameters: &crate::registry::Parameters,
        timeout: Option<Duration>,
    ) -> Result<ActionnerOutcome, StageError> {
        let started = tokio::time::Instant::now();
        let fut = AssertUnwindSafe(actionner.action(event, parameters)).catch_unwind();
        let result = match timeout {
            Some(d) => match tokio::time::timeout(d, fut).await {
                Ok(result) => result,
                // Dropping `fut` here aborts whatever in-flight I/O the
                // actionner was doing; the caller observes a `Cancelled`
                // failure rather than a hung dispatch (spec.md §5).
                Err(_) => {
                    self.metrics
                        .observe_action_duration(actionner.name(), started.elapsed().as_secs_f64());
                    return Err(StageError::Cancelled);
                }
            },
            None => fut.await,
        };
        self.metrics
            .observe_action_duration(actionner.name(), started.elapsed().as_secs_f64());
        match result {
            Ok(result) => result,
            Err(panic) => {
                let message = panic_message(&panic);
                Err(StageError::Internal(anyhow::anyhow!("actionner panicked: {message}")))
            }
        }
    }

    /// Publishes `outcome` through one bound output, subject to the same
    /// `timeout_seconds`-parameter-or-dispatcher-default deadline as an
    /// actionner (spec.md §5: "every actionner/output's run signature...
    /// wraps calls in `tokio::time::timeout`").
    async fn dispatch_output(
        &self,
        event: &Event,
        rule_name: &str,
        action: &Action,
        output_name: &str,
        outcome: &ActionnerOutcome,
    ) {
        let span = info_span!("output", trace_id = %event.trace_id, output = output_name);
        async {
            let mut line = LogLine::new(event.trace_id.clone());
            line.rule = Some(rule_name.to_string());
            line.action = Some(action.name.clone());
            line.stage = Some(Stage::Output);
            line.message = Some("output".to_string());
            line.target = Some(output_name.to_string());

            let binding = action.outputs.iter().find(|b| b.output == output_name);
            let output = match self.outputs.get(output_name) {
                Ok(o) => o,
                Err(err) => {
                    error!(error = %err, "output lookup failed after rule validation, this should not happen");
                    return;
                }
            };

            let empty = Default::default();
            let parameters = binding.map(|b| &b.parameters).unwrap_or(&empty);
            let output_timeout_seconds = ParamExtractor::new(parameters).u64("timeout_seconds", 0);
            let timeout = if output_timeout_seconds > 0 {
                Some(Duration::from_secs(output_timeout_seconds))
            } else {
                self.default_action_timeout
            };

            let fut = AssertUnwindSafe(output.publish(outcome, parameters)).catch_unwind();
            let result = match timeout {
                Some(d) => match tokio::time::timeout(d, fut).await {
                    Ok(result) => result,
                    Err(_) => {
                        self.finish(
                            line.with_status(Status::Failure),
                            Some(&StageError::Cancelled),
                            &action.notifiers,
                        )
                        .await;
                        return;
                    }
                },
                None => fut.await,
            };

            match result {
                Ok(Ok(())) => {
                    self.finish(line.with_status(Status::Success), None, &action.notifiers)
                        .await;
                }
                Ok(Err(err)) => {
                    self.finish(line.with_status(Status::Failure), Some(&err), &action.notifiers)
                        .await;
                }
                Err(panic) => {
                    let message = panic_message(&panic);
                    let err = StageError::Internal(anyhow::anyhow!("output panicked: {message}"));
                    self.finish(line.with_status(Status::Failure), Some(&err), &action.notifiers)
                        .await;
                }
            }
        }
        .instrument(span)
        .await;
    }

    /// Fills in the error message (if any), emits the log line through
    /// every bound notifier, and records the metric for the stage's
    /// outcome.
    async fn finish(&self, mut line: LogLine, err: Option<&StageError>, notifier_names: &[String]) {
        if let Some(err) = err {
            line.error = Some(err.to_string());
        }
        // Notifier payloads present object-map keys title-cased for
        // presentational consistency (spec.md §4.6); this is a pure
        // function of the lowercase key, independent of delivery order.
        line.objects = line
            .objects
            .into_iter()
            .map(|(key, value)| (crate::notify::title_case(&key.to_lowercase()), value))
            .collect();
        info!(
            trace_id = %line.trace_id,
            rule = line.rule.as_deref().unwrap_or(""),
            action = line.action.as_deref().unwrap_or(""),
            status = ?line.status,
            "stage finished"
        );

        let names: Vec<String> = if notifier_names.is_empty() {
            self.notifiers.names().map(str::to_string).collect()
        } else {
            notifier_names.to_vec()
        };

        let line = Arc::new(line);
        for name in names {
            let Ok(notifier) = self.notifiers.get(&name) else {
                continue;
            };
            let line = Arc::clone(&line);
            let span = info_span!("notification", trace_id = %line.trace_id, notifier = name.as_str());
            // Fire-and-forget: the dispatcher doesn't wait for delivery
            // beyond opening the span, matching every other notifier
            // running independently of this one's latency.
            tokio::spawn(
                async move {
                    if let Err(err) = notifier.notify(&line).await {
                        warn!(notifier = name.as_str(), error = %err, "notifier failed");
                    }
                }
                .instrument(span),
            );
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Event, Priority};
    use crate::registry::{
        ActionnerRegistryBuilder, Capabilities, ContextProviderRegistryBuilder, NotifierRegistryBuilder,
        OutputRegistryBuilder, Parameters,
    };
    use crate::rule::{RuleSet, RuleSpec};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Clone, Copy)]
    enum ScriptedOutcome {
        Success,
        TransientFailure,
        Panic,
        Hangs,
    }

    struct ScriptedActionner {
        name: &'static str,
        precondition_ok: bool,
        outcome: ScriptedOutcome,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl crate::registry::Actionner for ScriptedActionner {
        fn name(&self) -> &str {
            self.name
        }
        fn category(&self) -> &str {
            "test"
        }
        fn capabilities(&self) -> Capabilities {
            Capabilities::ActionOnly
        }
        fn check_parameters(&self, _parameters: &Parameters) -> Result<(), StageError> {
            Ok(())
        }
        async fn check_precondition(&self, _event: &Event, _parameters: &Parameters) -> Result<(), StageError> {
            if self.precondition_ok {
                Ok(())
            } else {
                Err(StageError::Precondition("precondition not met".to_string()))
            }
        }
        async fn action(&self, _event: &Event, _parameters: &Parameters) -> Result<ActionnerOutcome, StageError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.outcome {
                ScriptedOutcome::Success => {
                    let mut objects = std::collections::BTreeMap::new();
                    objects.insert("node".to_string(), "worker-1".to_string());
                    Ok(ActionnerOutcome {
                        objects,
                        output: Some("done".to_string()),
                        result: None,
                    })
                }
                ScriptedOutcome::TransientFailure => {
                    Err(StageError::TransientRemote(anyhow::anyhow!("boom")))
                }
                ScriptedOutcome::Panic => panic!("scripted panic"),
                ScriptedOutcome::Hangs => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    unreachable!("timeout should have cut this off first")
                }
            }
        }
    }

    struct RecordingNotifier {
        lines: Arc<Mutex<Vec<LogLine>>>,
    }

    #[async_trait]
    impl crate::registry::Notifier for RecordingNotifier {
        fn name(&self) -> &str {
            "recorder"
        }
        async fn notify(&self, line: &LogLine) -> Result<(), StageError> {
            self.lines.lock().unwrap().push(line.clone());
            Ok(())
        }
    }

    fn sample_event() -> Event {
        Event {
            trace_id: "t1".to_string(),
            rule: String::new(),
            priority: Priority::Critical,
            source: "syscall".to_string(),
            output: String::new(),
            output_fields: Default::default(),
            tags: vec![],
            time: Utc::now(),
        }
    }

    fn action(name: &str, actionner: &str, continue_on_error: Option<bool>) -> Action {
        Action {
            name: name.to_string(),
            actionner: actionner.to_string(),
            parameters: Parameters::new(),
            outputs: vec![],
            notifiers: vec![],
            continue_on_error,
        }
    }

    async fn build(
        actionners: Vec<Arc<dyn crate::registry::Actionner>>,
        rules: Vec<RuleSpec>,
        notifier: Arc<RecordingNotifier>,
    ) -> Dispatcher {
        let mut actionner_builder = ActionnerRegistryBuilder::new();
        for a in actionners {
            actionner_builder.register(a).unwrap();
        }
        let actionner_registry = actionner_builder.freeze();

        let outputs = OutputRegistryBuilder::new().freeze();

        let mut notifier_builder = NotifierRegistryBuilder::new();
        notifier_builder.register(notifier).unwrap();
        let notifiers = notifier_builder.freeze();

        let context_providers = ContextProviderRegistryBuilder::new().freeze();

        let rule_set = RuleSet::try_build(rules, &actionner_registry, &outputs, &notifiers).unwrap();

        Dispatcher::new(
            Arc::new(rule_set),
            Arc::new(actionner_registry),
            Arc::new(outputs),
            Arc::new(notifiers),
            Arc::new(context_providers),
            Arc::new(Metrics::new()),
        )
    }

    /// S6: a failing action with no continue override halts the rest of
    /// the rule's chain.
    #[tokio::test]
    async fn failure_halts_chain_without_continue_override() {
        let calls_a = Arc::new(AtomicUsize::new(0));
        let calls_b = Arc::new(AtomicUsize::new(0));
        let actionner_a = Arc::new(ScriptedActionner {
            name: "test:fails",
            precondition_ok: true,
            outcome: ScriptedOutcome::TransientFailure,
            calls: calls_a.clone(),
        });
        let actionner_b = Arc::new(ScriptedActionner {
            name: "test:succeeds",
            precondition_ok: true,
            outcome: ScriptedOutcome::Success,
            calls: calls_b.clone(),
        });

        let rule = RuleSpec {
            name: "r1".to_string(),
            sources: vec![],
            tags: vec![],
            match_fields: Default::default(),
            match_expr: Some("1 == 1".to_string()),
            priority_floor: None,
            continue_on_error: false,
            actions: vec![action("a1", "test:fails", None), action("a2", "test:succeeds", None)],
        };

        let lines = Arc::new(Mutex::new(Vec::new()));
        let notifier = Arc::new(RecordingNotifier { lines });
        let dispatcher = build(vec![actionner_a, actionner_b], vec![rule], notifier).await;
        dispatcher.dispatch_event(sample_event()).await;

        assert_eq!(calls_a.load(Ordering::SeqCst), 1);
        assert_eq!(
            calls_b.load(Ordering::SeqCst),
            0,
            "second action must not run after a halting failure"
        );
    }

    /// An action-level continue override lets the chain proceed past a
    /// failure that would otherwise halt it.
    #[tokio::test]
    async fn continue_override_lets_chain_proceed_past_failure() {
        let calls_a = Arc::new(AtomicUsize::new(0));
        let calls_b = Arc::new(AtomicUsize::new(0));
        let actionner_a = Arc::new(ScriptedActionner {
            name: "test:fails",
            precondition_ok: true,
            outcome: ScriptedOutcome::TransientFailure,
            calls: calls_a.clone(),
        });
        let actionner_b = Arc::new(ScriptedActionner {
            name: "test:succeeds",
            precondition_ok: true,
            outcome: ScriptedOutcome::Success,
            calls: calls_b.clone(),
        });

        let rule = RuleSpec {
            name: "r1".to_string(),
            sources: vec![],
            tags: vec![],
            match_fields: Default::default(),
            match_expr: Some("1 == 1".to_string()),
            priority_floor: None,
            continue_on_error: false,
            actions: vec![
                action("a1", "test:fails", Some(true)),
                action("a2", "test:succeeds", None),
            ],
        };

        let lines = Arc::new(Mutex::new(Vec::new()));
        let notifier = Arc::new(RecordingNotifier { lines });
        let dispatcher = build(vec![actionner_a, actionner_b], vec![rule], notifier).await;
        dispatcher.dispatch_event(sample_event()).await;

        assert_eq!(calls_a.load(Ordering::SeqCst), 1);
        assert_eq!(calls_b.load(Ordering::SeqCst), 1);
    }

    /// Invariant 5: a precondition outcome never halts the chain, even
    /// with the rule's default continue flag set to halt.
    #[tokio::test]
    async fn precondition_failure_never_halts_chain() {
        let calls_a = Arc::new(AtomicUsize::new(0));
        let calls_b = Arc::new(AtomicUsize::new(0));
        let actionner_a = Arc::new(ScriptedActionner {
            name: "test:unmet",
            precondition_ok: false,
            outcome: ScriptedOutcome::Success,
            calls: calls_a.clone(),
        });
        let actionner_b = Arc::new(ScriptedActionner {
            name: "test:succeeds",
            precondition_ok: true,
            outcome: ScriptedOutcome::Success,
            calls: calls_b.clone(),
        });

        let rule = RuleSpec {
            name: "r1".to_string(),
            sources: vec![],
            tags: vec![],
            match_fields: Default::default(),
            match_expr: Some("1 == 1".to_string()),
            priority_floor: None,
            continue_on_error: false,
            actions: vec![action("a1", "test:unmet", None), action("a2", "test:succeeds", None)],
        };

        let lines = Arc::new(Mutex::new(Vec::new()));
        let notifier = Arc::new(RecordingNotifier { lines });
        let dispatcher = build(vec![actionner_a, actionner_b], vec![rule], notifier).await;
        dispatcher.dispatch_event(sample_event()).await;

        // The unmet precondition short-circuits before `action()` runs at all.
        assert_eq!(calls_a.load(Ordering::SeqCst), 0);
        assert_eq!(calls_b.load(Ordering::SeqCst), 1);
    }

    /// A panic inside an actionner is recovered and never halts the chain
    /// (spec.md §7: internal errors continue).
    #[tokio::test]
    async fn panic_is_recovered_and_chain_continues() {
        let calls_a = Arc::new(AtomicUsize::new(0));
        let calls_b = Arc::new(AtomicUsize::new(0));
        let actionner_a = Arc::new(ScriptedActionner {
            name: "test:panics",
            precondition_ok: true,
            outcome: ScriptedOutcome::Panic,
            calls: calls_a.clone(),
        });
        let actionner_b = Arc::new(ScriptedActionner {
            name: "test:succeeds",
            precondition_ok: true,
            outcome: ScriptedOutcome::Success,
            calls: calls_b.clone(),
        });

        let rule = RuleSpec {
            name: "r1".to_string(),
            sources: vec![],
            tags: vec![],
            match_fields: Default::default(),
            match_expr: Some("1 == 1".to_string()),
            priority_floor: None,
            continue_on_error: false,
            actions: vec![action("a1", "test:panics", None), action("a2", "test:succeeds", None)],
        };

        let lines = Arc::new(Mutex::new(Vec::new()));
        let notifier = Arc::new(RecordingNotifier { lines });
        let dispatcher = build(vec![actionner_a, actionner_b], vec![rule], notifier).await;
        dispatcher.dispatch_event(sample_event()).await;

        assert_eq!(calls_a.load(Ordering::SeqCst), 1);
        assert_eq!(calls_b.load(Ordering::SeqCst), 1);
    }

    /// spec.md §4.2: rule boundaries don't stop dispatch by default — a
    /// halting failure in one rule's chain doesn't prevent a separately
    /// matching rule from running its own chain.
    #[tokio::test]
    async fn a_halted_rule_does_not_block_other_matching_rules() {
        let calls_a = Arc::new(AtomicUsize::new(0));
        let calls_b = Arc::new(AtomicUsize::new(0));
        let actionner_a = Arc::new(ScriptedActionner {
            name: "test:fails",
            precondition_ok: true,
            outcome: ScriptedOutcome::TransientFailure,
            calls: calls_a.clone(),
        });
        let actionner_b = Arc::new(ScriptedActionner {
            name: "test:succeeds",
            precondition_ok: true,
            outcome: ScriptedOutcome::Success,
            calls: calls_b.clone(),
        });

        let rules = vec![
            RuleSpec {
                name: "r1".to_string(),
                sources: vec![],
                tags: vec![],
                match_fields: Default::default(),
                match_expr: Some("1 == 1".to_string()),
                priority_floor: None,
                continue_on_error: false,
                actions: vec![action("a1", "test:fails", None)],
            },
            RuleSpec {
                name: "r2".to_string(),
                sources: vec![],
                tags: vec![],
                match_fields: Default::default(),
                match_expr: Some("1 == 1".to_string()),
                priority_floor: None,
                continue_on_error: false,
                actions: vec![action("a2", "test:succeeds", None)],
            },
        ];

        let lines = Arc::new(Mutex::new(Vec::new()));
        let notifier = Arc::new(RecordingNotifier { lines });
        let dispatcher = build(vec![actionner_a, actionner_b], rules, notifier).await;
        dispatcher.dispatch_event(sample_event()).await;

        assert_eq!(calls_a.load(Ordering::SeqCst), 1);
        assert_eq!(calls_b.load(Ordering::SeqCst), 1);
    }

    /// Testable property 7: notifier payloads carry title-cased object-map
    /// keys, a pure function of the lowercase key.
    #[tokio::test]
    async fn notifier_payload_object_keys_are_title_cased() {
        let calls = Arc::new(AtomicUsize::new(0));
        let actionner = Arc::new(ScriptedActionner {
            name: "test:succeeds",
            precondition_ok: true,
            outcome: ScriptedOutcome::Success,
            calls,
        });

        let rule = RuleSpec {
            name: "r1".to_string(),
            sources: vec![],
            tags: vec![],
            match_fields: Default::default(),
            match_expr: Some("1 == 1".to_string()),
            priority_floor: None,
            continue_on_error: false,
            actions: vec![action("a1", "test:succeeds", None)],
        };

        let lines = Arc::new(Mutex::new(Vec::new()));
        let notifier = Arc::new(RecordingNotifier { lines: lines.clone() });
        let dispatcher = build(vec![actionner], vec![rule], notifier).await;
        dispatcher.dispatch_event(sample_event()).await;

        // The notifier's `notify` is fired via `tokio::spawn`; give it a
        // chance to run before inspecting what it recorded.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let recorded = lines.lock().unwrap();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].objects.get("Node").map(String::as_str), Some("worker-1"));
        assert!(!recorded[0].objects.contains_key("node"));
    }

    /// spec.md §5: a per-action `timeout_seconds` cuts off a hung actionner
    /// rather than letting the dispatch task block forever, surfacing as a
    /// `Cancelled` failure that halts the chain regardless of the rule's
    /// continue policy.
    #[tokio::test(start_paused = true)]
    async fn action_timeout_cancels_a_hung_actionner_and_halts_the_chain() {
        let calls_a = Arc::new(AtomicUsize::new(0));
        let calls_b = Arc::new(AtomicUsize::new(0));
        let actionner_a = Arc::new(ScriptedActionner {
            name: "test:hangs",
            precondition_ok: true,
            outcome: ScriptedOutcome::Hangs,
            calls: calls_a.clone(),
        });
        let actionner_b = Arc::new(ScriptedActionner {
            name: "test:succeeds",
            precondition_ok: true,
            outcome: ScriptedOutcome::Success,
            calls: calls_b.clone(),
        });

        let mut timed_action = action("a1", "test:hangs", Some(true));
        timed_action
            .parameters
            .insert("timeout_seconds".to_string(), serde_json::json!(1));

        let rule = RuleSpec {
            name: "r1".to_string(),
            sources: vec![],
            tags: vec![],
            match_fields: Default::default(),
            match_expr: Some("1 == 1".to_string()),
            priority_floor: None,
            continue_on_error: false,
            actions: vec![timed_action, action("a2", "test:succeeds", None)],
        };

        let lines = Arc::new(Mutex::new(Vec::new()));
        let notifier = Arc::new(RecordingNotifier { lines });
        let dispatcher = build(vec![actionner_a, actionner_b], vec![rule], notifier).await;

        // Paused-clock auto-advance fast-forwards through the actionner's
        // 3600s sleep as soon as the 1s timeout timer is the only
        // outstanding work, so this resolves immediately in test time.
        dispatcher.dispatch_event(sample_event()).await;

        assert_eq!(calls_a.load(Ordering::SeqCst), 1);
        assert_eq!(
            calls_b.load(Ordering::SeqCst),
            0,
            "a cancelled action halts the chain even with continue=true"
        );
    }
}
