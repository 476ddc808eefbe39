// Progress tracking across iterations: repeated operations and missing UI
// snapshots are turned into hints for the next planner call.

/// UI snapshot failures in a row before the planner is told about it.
const UI_FAILURE_HINT_THRESHOLD: u32 = 2;
/// Consecutive repeats of one operation before it is flagged.
const REPEAT_HINT_THRESHOLD: u32 = 2;

#[derive(Debug, Default)]
pub struct RepetitionTracker {
    counts: Vec<(String, u32)>,
    last: Option<String>,
    ui_failures: u32,
}

impl RepetitionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the signature of the most recent step. A repeat of the
    /// previous signature bumps its count; counts are never lowered.
    pub fn observe(&mut self, signature: &str) {
        let repeated = self.last.as_deref() == Some(signature);
        match self.counts.iter_mut().find(|(s, _)| s == signature) {
            Some((_, n)) if repeated => *n += 1,
            Some(_) => {}
            None => self.counts.push((signature.to_string(), 1)),
        }
        self.last = Some(signature.to_string());
    }

    /// Operations repeated enough to warrant a change of approach.
    pub fn hints(&self) -> Vec<String> {
        self.counts
            .iter()
            .filter(|(_, n)| *n >= REPEAT_HINT_THRESHOLD)
            .map(|(sig, n)| format!("{sig} (repeated {n} times)"))
            .collect()
    }

    pub fn record_ui_snapshot(&mut self, obtained: bool) {
        if obtained {
            self.ui_failures = 0;
        } else {
            self.ui_failures += 1;
        }
    }

    pub fn ui_failures(&self) -> u32 {
        self.ui_failures
    }

    pub fn ui_hint(&self) -> Option<String> {
        (self.ui_failures >= UI_FAILURE_HINT_THRESHOLD).then(|| {
            format!(
                "UI hierarchy unavailable for {} consecutive iterations; rely on the screenshot and window state",
                self.ui_failures
            )
        })
    }
}
