use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

/// Well-known stage names for deriving child budgets. Any string is accepted
/// by [`TimeBudget::child()`]; these are the ones the crate itself uses.
pub mod stage {
    pub const ORCHESTRATION: &str = "orchestration";
    pub const LOADER: &str = "loader";
    pub const FETCH: &str = "fetch";
}

/// Raised when a [`TimeBudget`] is found exhausted before or during an
/// operation. Terminal for the operation chain it belongs to.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("time budget '{label}' exhausted")]
pub struct BudgetExpired {
    label: String,
}

impl BudgetExpired {
    pub fn label(&self) -> &str {
        &self.label
    }
}

/// How much of the remaining time a named stage must leave behind for its
/// caller, and the smallest allowance the stage may be handed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MarginRule {
    /// Reserved for the caller's own overhead and response assembly.
    pub reserve: Duration,
    /// The child allowance never goes below this, though it never exceeds
    /// what the parent actually has left.
    pub floor: Duration,
}

impl MarginRule {
    pub fn new(reserve: Duration, floor: Duration) -> Self {
        Self { reserve, floor }
    }
}

/// Per-stage reservation table consulted by [`TimeBudget::child()`].
///
/// Stages without an explicit rule fall back to [`BudgetPolicy::fallback`],
/// which defaults to a 50ms reserve and no floor.
#[derive(Clone, Debug)]
pub struct BudgetPolicy {
    rules: HashMap<String, MarginRule>,
    fallback: MarginRule,
}

impl Default for BudgetPolicy {
    fn default() -> Self {
        Self {
            rules: HashMap::new(),
            fallback: MarginRule::new(Duration::from_millis(50), Duration::ZERO),
        }
    }
}

impl BudgetPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_margin(mut self, stage: impl Into<String>, reserve: Duration, floor: Duration) -> Self {
        self.rules.insert(stage.into(), MarginRule::new(reserve, floor));
        self
    }

    pub fn with_fallback(mut self, reserve: Duration, floor: Duration) -> Self {
        self.fallback = MarginRule::new(reserve, floor);
        self
    }

    pub fn rule(&self, stage: &str) -> MarginRule {
        self.rules.get(stage).copied().unwrap_or(self.fallback)
    }
}

/// A shrinking time allowance handed from outer layers to inner ones.
///
/// A root budget is minted at request ingress from the transport deadline;
/// every nested layer derives its own slice with [`child()`](Self::child),
/// so no layer can consume more time than its caller has left. An already
/// elapsed budget reports itself as expired instead of producing a negative
/// duration.
#[derive(Clone, Debug)]
pub struct TimeBudget {
    label: Arc<str>,
    deadline: Instant,
    policy: Arc<BudgetPolicy>,
}

impl TimeBudget {
    /// Mint the request's root budget from the total duration granted by the
    /// ingress transport layer.
    pub fn root(total: Duration) -> Self {
        Self::root_with_policy(total, BudgetPolicy::default())
    }

    pub fn root_with_policy(total: Duration, policy: BudgetPolicy) -> Self {
        Self {
            label: Arc::from("root"),
            deadline: Instant::now() + total,
            policy: Arc::new(policy),
        }
    }

    /// Derive the allowance for a nested stage: what is left, minus the
    /// stage's reserved margin, clamped into `[floor, remaining]`.
    pub fn child(&self, stage: &str) -> TimeBudget {
        let rule = self.policy.rule(stage);
        let remaining = self.remaining();
        let allowance = remaining.saturating_sub(rule.reserve).max(rule.floor).min(remaining);
        TimeBudget {
            label: Arc::from(stage),
            deadline: Instant::now() + allowance,
            policy: Arc::clone(&self.policy),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Time left before the deadline; zero once elapsed, never negative.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        self.remaining() == Duration::ZERO
    }

    /// Fail-fast check to run before any blocking or async operation.
    pub fn ensure(&self) -> Result<(), BudgetExpired> {
        if self.is_expired() {
            Err(BudgetExpired {
                label: self.label.to_string(),
            })
        }
        else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn child_is_smaller_by_margin() {
        let policy = BudgetPolicy::new().with_margin(stage::ORCHESTRATION, Duration::from_millis(50), Duration::ZERO);
        let root = TimeBudget::root_with_policy(Duration::from_millis(1000), policy);
        let child = root.child(stage::ORCHESTRATION);

        assert!(child.deadline() <= root.deadline() - Duration::from_millis(50));
        assert_eq!(child.remaining(), Duration::from_millis(950));
    }

    #[tokio::test(start_paused = true)]
    async fn fallback_rule_applies_to_unknown_stage() {
        let root = TimeBudget::root(Duration::from_millis(200));
        let child = root.child("no-such-stage");
        assert_eq!(child.remaining(), Duration::from_millis(150));
    }

    #[tokio::test(start_paused = true)]
    async fn floor_clamps_but_never_exceeds_remaining() {
        let policy = BudgetPolicy::new().with_margin("fetch", Duration::from_millis(50), Duration::from_millis(5));
        let root = TimeBudget::root_with_policy(Duration::from_millis(10), policy);

        // 10ms left, a 50ms reserve would strand the child at zero; the floor
        // lifts it back to 5ms, still within what the parent has.
        let child = root.child("fetch");
        let left = child.remaining();
        assert!(left >= Duration::from_millis(4) && left <= Duration::from_millis(10), "left={left:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn elapsed_budget_reports_expired() {
        let root = TimeBudget::root(Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(root.is_expired());
        assert_eq!(root.remaining(), Duration::ZERO);

        let child = root.child("fetch");
        assert!(child.is_expired());

        let err = child.ensure().unwrap_err();
        assert_eq!(err.label(), "fetch");
    }

    #[tokio::test(start_paused = true)]
    async fn cascade_is_strictly_decreasing() {
        let policy = BudgetPolicy::new()
            .with_margin(stage::ORCHESTRATION, Duration::from_millis(50), Duration::ZERO)
            .with_margin(stage::FETCH, Duration::from_millis(50), Duration::ZERO);
        let root = TimeBudget::root_with_policy(Duration::from_millis(1000), policy);
        let orchestration = root.child(stage::ORCHESTRATION);
        let fetch = orchestration.child(stage::FETCH);

        assert_eq!(orchestration.remaining(), Duration::from_millis(950));
        assert_eq!(fetch.remaining(), Duration::from_millis(900));
        assert!(fetch.deadline() < orchestration.deadline());
        assert!(orchestration.deadline() < root.deadline());
    }
}
