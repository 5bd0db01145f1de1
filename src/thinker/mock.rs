use anyhow::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::{Context, Step, StepResult, Thinker};

/// A scripted thinker for tests. Returns pre-defined steps in order.
pub struct MockThinker {
    steps: Vec<StepResult>,
    index: AtomicUsize,
}

impl MockThinker {
    pub fn new(steps: Vec<StepResult>) -> Self {
        Self {
            steps,
            index: AtomicUsize::new(0),
        }
    }

    /// Steps without token usage.
    pub fn from_steps(steps: Vec<Step>) -> Self {
        Self::new(
            steps
                .into_iter()
                .map(|step| StepResult { step, usage: None })
                .collect(),
        )
    }

    /// Answer once per stage run, in order.
    pub fn answers<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_steps(
            answers
                .into_iter()
                .map(|answer| Step::Finish {
                    thought: String::new(),
                    answer: answer.into(),
                })
                .collect(),
        )
    }
}

#[async_trait]
impl Thinker for MockThinker {
    async fn next_step(&self, _context: &Context) -> Result<StepResult> {
        let i = self.index.fetch_add(1, Ordering::SeqCst);
        let result = self
            .steps
            .get(i)
            .ok_or_else(|| anyhow::anyhow!("MockThinker: no more steps (called {} times)", i + 1))?;
        Ok(result.clone())
    }
}
