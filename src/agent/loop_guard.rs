//! Loop Guard - stops a model that repeats the same tool calls
//!
//! The fingerprint of an iteration is the ordered list of tool names it
//! requested. Two consecutive iterations with the same fingerprint mean the
//! model is not converging, and the turn is concluded.

/// Verdict for one iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopVerdict {
    Continue,
    LoopDetected,
}

/// Compare the current iteration's tool names with the previous one's
pub struct LoopGuard;

impl LoopGuard {
    /// `iteration` is 1-based. The first iteration never loops.
    pub fn check<S: AsRef<str>>(iteration: usize, current: &[S], previous: &[S]) -> LoopVerdict {
        let same = current.len() == previous.len()
            && current
                .iter()
                .zip(previous)
                .all(|(a, b)| a.as_ref() == b.as_ref());

        if iteration > 1 && same {
            LoopVerdict::LoopDetected
        } else {
            LoopVerdict::Continue
        }
    }
}

/// Per-turn iteration counter and last tool fingerprint
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IterationState {
    pub count: usize,
    pub recent_tool_fingerprint: Vec<String>,
}

impl IterationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the next iteration; returns its 1-based index
    pub fn advance(&mut self) -> usize {
        self.count += 1;
        self.count
    }

    /// Check `names` against the previous iteration, then remember them
    pub fn observe(&mut self, names: Vec<String>) -> LoopVerdict {
        let verdict = LoopGuard::check(self.count, &names, &self.recent_tool_fingerprint);
        self.recent_tool_fingerprint = names;
        verdict
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_iteration_never_loops() {
        let empty: [&str; 0] = [];
        assert_eq!(LoopGuard::check(1, &empty, &empty), LoopVerdict::Continue);
        assert_eq!(
            LoopGuard::check(1, &["list_dir"], &["list_dir"]),
            LoopVerdict::Continue
        );
    }

    #[test]
    fn test_identical_sequence_is_a_loop() {
        assert_eq!(
            LoopGuard::check(3, &["grep_search", "list_dir"], &["grep_search", "list_dir"]),
            LoopVerdict::LoopDetected
        );
    }

    #[test]
    fn test_order_matters() {
        assert_eq!(
            LoopGuard::check(2, &["a", "b"], &["b", "a"]),
            LoopVerdict::Continue
        );
        assert_eq!(LoopGuard::check(2, &["a"], &["a", "a"]), LoopVerdict::Continue);
    }

    #[test]
    fn test_iteration_state_tracks_previous() {
        let mut state = IterationState::new();

        state.advance();
        assert_eq!(state.observe(vec!["list_dir".into()]), LoopVerdict::Continue);

        state.advance();
        assert_eq!(state.observe(vec!["grep_search".into()]), LoopVerdict::Continue);

        state.advance();
        assert_eq!(
            state.observe(vec!["grep_search".into()]),
            LoopVerdict::LoopDetected
        );
        assert_eq!(state.count, 3);
    }
}
