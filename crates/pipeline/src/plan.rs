//! Expansion of a [`GenerationRequest`] into the ordered steps a worker
//! executes.
//!
//! Every plan starts with an `initializing` announcement and ends with a
//! `compositing` announcement followed by the [`StepKind::Composite`] step
//! whose artifact becomes the job result. Countable work in between
//! reports `k/n steps` after each unit finishes.

use atelier_core::progress::{Phase, Progress};
use atelier_core::request::GenerationRequest;
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// Render one character of a group portrait.
    CharacterPass,
    /// Cut the subject out of the source image.
    Cutout,
    SynthesizeBackground,
    FaceRestore,
    /// Combine earlier artifacts into the final image.
    Composite,
}

/// One unit of work sent to the generation backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepInput {
    pub step: StepKind,
    pub inputs: serde_json::Value,
}

impl StepInput {
    fn new(step: StepKind, inputs: serde_json::Value) -> Self {
        Self { step, inputs }
    }

    /// Attach the artifacts of earlier steps as `inputs.layers`.
    pub fn with_layers(mut self, layers: &[String]) -> Self {
        if let Some(map) = self.inputs.as_object_mut() {
            map.insert("layers".to_string(), json!(layers));
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlanStep {
    /// Write a named phase before the work that follows it.
    Announce(Phase),
    /// Run a backend step, then write `report` if present.
    Run {
        input: StepInput,
        report: Option<Progress>,
    },
}

/// Build the step list for `request`.
pub fn plan(request: &GenerationRequest) -> Vec<PlanStep> {
    let mut steps = vec![PlanStep::Announce(Phase::Initializing)];

    match request {
        GenerationRequest::GroupPortrait {
            characters,
            prompt,
            style,
            aspect_ratio,
        } => {
            let total = characters.len() as u32;
            for (index, character) in characters.iter().enumerate() {
                let done = index as u32 + 1;
                steps.push(PlanStep::Run {
                    input: StepInput::new(
                        StepKind::CharacterPass,
                        json!({
                            "index": index,
                            "name": character.name,
                            "image_url": character.image_url,
                            "pose": character.pose,
                            "prompt": prompt,
                            "style": style,
                        }),
                    ),
                    report: Some(Progress::steps(done, total)),
                });
            }
            push_composite(
                &mut steps,
                json!({ "prompt": prompt, "style": style, "aspect_ratio": aspect_ratio }),
            );
        }
        GenerationRequest::BackgroundRemoval {
            image_url,
            background_prompt,
        } => {
            steps.push(PlanStep::Run {
                input: StepInput::new(StepKind::Cutout, json!({ "image_url": image_url })),
                report: Some(Progress::steps(1, 1)),
            });
            if let Some(background_prompt) = background_prompt {
                steps.push(PlanStep::Announce(Phase::Background));
                steps.push(PlanStep::Run {
                    input: StepInput::new(
                        StepKind::SynthesizeBackground,
                        json!({ "prompt": background_prompt }),
                    ),
                    report: None,
                });
            }
            push_composite(&mut steps, json!({ "image_url": image_url }));
        }
        GenerationRequest::FaceRestore { image_url } => {
            steps.push(PlanStep::Run {
                input: StepInput::new(StepKind::FaceRestore, json!({ "image_url": image_url })),
                report: Some(Progress::steps(1, 1)),
            });
            push_composite(&mut steps, json!({ "image_url": image_url }));
        }
    }

    steps
}

fn push_composite(steps: &mut Vec<PlanStep>, inputs: serde_json::Value) {
    steps.push(PlanStep::Announce(Phase::Compositing));
    steps.push(PlanStep::Run {
        input: StepInput::new(StepKind::Composite, inputs),
        report: None,
    });
}
