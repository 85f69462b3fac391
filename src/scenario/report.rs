use crate::error::HarnessError;
use crate::poll::PollOutcome;
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckStatus {
    Passed,
    Failed { reason: String },
}

/// Result of one named capability check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckOutcome {
    pub name: String,
    pub status: CheckStatus,
    pub elapsed: Duration,
    pub attempts: u32,
}

impl CheckOutcome {
    pub fn passed<S: Into<String>>(name: S, attempts: u32, elapsed: Duration) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Passed,
            elapsed,
            attempts,
        }
    }

    pub fn failed<S: Into<String>>(name: S, reason: S, attempts: u32, elapsed: Duration) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Failed {
                reason: reason.into(),
            },
            elapsed,
            attempts,
        }
    }

    /// Attribute a verifier outcome to the named check
    pub fn from_poll<T>(name: &str, outcome: PollOutcome<T>) -> Self {
        let attempts = outcome.attempts();
        let elapsed = outcome.elapsed();
        match outcome.into_result(name) {
            Ok(_) => Self::passed(name, attempts, elapsed),
            Err(e) => Self::failed(name.to_string(), e.to_string(), attempts, elapsed),
        }
    }

    pub fn is_passed(&self) -> bool {
        self.status == CheckStatus::Passed
    }

    pub fn reason(&self) -> Option<&str> {
        match &self.status {
            CheckStatus::Passed => None,
            CheckStatus::Failed { reason } => Some(reason),
        }
    }
}

impl fmt::Display for CheckOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.status {
            CheckStatus::Passed => write!(
                f,
                "✓ {} ({} attempt(s), {:?})",
                self.name, self.attempts, self.elapsed
            ),
            CheckStatus::Failed { reason } => write!(
                f,
                "✗ {} ({} attempt(s), {:?}): {}",
                self.name, self.attempts, self.elapsed, reason
            ),
        }
    }
}

/// Everything one scenario run produced.
///
/// Setup failures, check outcomes and teardown errors are kept apart, so a
/// teardown problem never replaces the failure that preceded it.
#[derive(Debug, Default)]
pub struct ScenarioReport {
    pub setup_error: Option<HarnessError>,
    pub checks: Vec<CheckOutcome>,
    pub teardown_errors: Vec<HarnessError>,
    pub elapsed: Duration,
}

impl ScenarioReport {
    /// Setup succeeded and every check passed
    pub fn passed(&self) -> bool {
        self.setup_error.is_none()
            && !self.checks.is_empty()
            && self.checks.iter().all(CheckOutcome::is_passed)
    }

    pub fn failed_checks(&self) -> impl Iterator<Item = &CheckOutcome> {
        self.checks.iter().filter(|c| !c.is_passed())
    }

    pub fn check(&self, name: &str) -> Option<&CheckOutcome> {
        self.checks.iter().find(|c| c.name == name)
    }

    /// 0 only for a passing run that also tore down cleanly
    pub fn exit_code(&self) -> i32 {
        if self.passed() && self.teardown_errors.is_empty() {
            0
        } else {
            1
        }
    }
}

impl fmt::Display for ScenarioReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(e) = &self.setup_error {
            let stage = if e.is_setup_error() { "setup" } else { "harness" };
            writeln!(f, "✗ {}: {}", stage, e)?;
        }
        for check in &self.checks {
            writeln!(f, "{}", check)?;
        }
        for e in &self.teardown_errors {
            writeln!(f, "✗ teardown: {}", e)?;
        }

        let passed = self.checks.iter().filter(|c| c.is_passed()).count();
        write!(
            f,
            "{}: {}/{} checks passed in {:?}",
            if self.passed() { "PASS" } else { "FAIL" },
            passed,
            self.checks.len(),
            self.elapsed
        )
    }
}
