use super::ExpressionActions;
use crate::block::Header;
use crate::error::Result;

#[derive(Clone, Debug)]
pub struct ChainStep {
    pub actions: ExpressionActions,
    /// Columns this step must hand to whatever consumes it (the filter column
    /// for WHERE, keys and arguments for aggregation, ...).
    pub required_output: Vec<String>,
}

/// A sequence of expression steps, each fed by the previous one's output.
///
/// Steps are assembled front to back; [`Self::finalize`] then walks back to
/// front so every step keeps only what it or a later step uses.
#[derive(Clone, Debug)]
pub struct ExpressionChain {
    steps: Vec<ChainStep>,
}

impl ExpressionChain {
    #[must_use]
    pub fn new(input: Header) -> Self {
        Self { steps: vec![ChainStep { actions: ExpressionActions::new(input), required_output: Vec::new() }] }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Index of the step currently being assembled.
    #[must_use]
    pub fn last_index(&self) -> usize {
        self.steps.len() - 1
    }

    pub fn last_step(&mut self) -> &mut ChainStep {
        let last = self.last_index();
        &mut self.steps[last]
    }

    /// Record `name` as an output of the current step.
    pub fn require(&mut self, name: impl Into<String>) {
        let name = name.into();
        let step = self.last_step();
        if !step.required_output.contains(&name) {
            step.required_output.push(name);
        }
    }

    /// Start a new step whose input is everything the current step produces.
    pub fn add_step(&mut self) {
        let input = self.steps[self.last_index()].actions.sample_header();
        self.steps.push(ChainStep { actions: ExpressionActions::new(input), required_output: Vec::new() });
    }

    /// # Errors
    /// If a step's required output cannot be produced.
    pub fn finalize(&mut self) -> Result<()> {
        for i in (0..self.steps.len()).rev() {
            let mut required = self.steps[i].required_output.clone();
            if let Some(next) = self.steps.get(i + 1) {
                for c in next.actions.input().names() {
                    if !required.contains(&c) {
                        required.push(c);
                    }
                }
            }
            self.steps[i].actions.finalize(&required)?;
        }
        Ok(())
    }

    /// Hand out the finalized steps.
    #[must_use]
    pub fn into_steps(self) -> Vec<ChainStep> {
        self.steps
    }
}
