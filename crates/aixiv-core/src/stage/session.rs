//! Completion calls made on behalf of one stage attempt.

use aixiv_state::PromptFingerprint;
use serde::de::DeserializeOwned;

use super::parse::{clip, extract_json};
use super::{DecisionDraft, StageOutput};
use crate::completion::{CompletionRequest, CompletionService, SamplingParams};
use crate::domain::error::StageError;

const SUMMARY_CHARS: usize = 1000;

/// Tracks the calls of one attempt so the decision record can fingerprint
/// the first prompt and count the rest.
pub(crate) struct Session<'a> {
    completion: &'a dyn CompletionService,
    model: &'a str,
    params: &'a SamplingParams,
    corrective_hint: Option<&'a str>,
    first_prompt: Option<PromptFingerprint>,
    calls: u32,
}

impl<'a> Session<'a> {
    pub(crate) fn new(
        completion: &'a dyn CompletionService,
        model: &'a str,
        params: &'a SamplingParams,
        corrective_hint: Option<&'a str>,
    ) -> Self {
        Self {
            completion,
            model,
            params,
            corrective_hint,
            first_prompt: None,
            calls: 0,
        }
    }

    pub(crate) fn for_stage(ctx: &'a super::StageContext, services: &'a super::StageServices) -> Self {
        Self::new(
            services.completion.as_ref(),
            &ctx.settings.model,
            &ctx.settings.params,
            ctx.corrective_hint.as_deref(),
        )
    }

    /// Send `prompt` (plus any corrective hint) and return the raw text.
    pub(crate) async fn ask(&mut self, prompt: String) -> Result<String, StageError> {
        let prompt = match self.corrective_hint {
            Some(hint) => format!("{prompt}\n\n{hint}"),
            None => prompt,
        };
        if self.first_prompt.is_none() {
            self.first_prompt = Some(PromptFingerprint::of(&prompt));
        }
        self.calls += 1;
        let request = CompletionRequest {
            prompt,
            model: self.model.to_string(),
            params: self.params.clone(),
        };
        self.completion.complete(&request).await
    }

    pub(crate) async fn ask_json<T: DeserializeOwned>(&mut self, prompt: String) -> Result<T, StageError> {
        let text = self.ask(prompt).await?;
        extract_json(&text)
    }

    pub(crate) fn draft(&self, input_summary: &str, output_summary: &str) -> DecisionDraft {
        DecisionDraft {
            model: self.model.to_string(),
            prompt_fingerprint: self.first_prompt.clone(),
            input_summary: clip(input_summary, SUMMARY_CHARS),
            output_summary: clip(output_summary, SUMMARY_CHARS),
            completion_calls: self.calls,
        }
    }

    pub(crate) fn finish(
        self,
        payload: serde_json::Value,
        input_summary: &str,
        output_summary: &str,
    ) -> StageOutput {
        StageOutput {
            decision: self.draft(input_summary, output_summary),
            payload,
        }
    }
}

/// Render items as a numbered list.
pub(crate) fn numbered<T: AsRef<str>>(items: &[T]) -> String {
    items
        .iter()
        .enumerate()
        .map(|(i, s)| format!("{}. {}", i + 1, s.as_ref()))
        .collect::<Vec<_>>()
        .join("\n")
}

/// First line of every prompt; identifies the task for routing and audit.
pub const TASK_PREFIX: &str = "TASK: ";

pub(crate) fn header(task: &str) -> String {
    format!("{TASK_PREFIX}{task}\n\n")
}

/// The task name a prompt was built for, if it carries a header.
pub fn task_of(prompt: &str) -> Option<&str> {
    prompt
        .lines()
        .next()
        .and_then(|l| l.strip_prefix(TASK_PREFIX))
        .map(str::trim)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_header_round_trips() {
        let prompt = format!("{}Write things.", header("method_draft"));
        assert_eq!(task_of(&prompt), Some("method_draft"));
        assert_eq!(task_of("no header"), None);
    }

    #[test]
    fn numbered_list() {
        assert_eq!(numbered(&["a", "b"]), "1. a\n2. b");
    }
}
