//! Generation requests accepted by the job creation endpoint, their
//! validation rules, and the credit cost charged for each.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Limits
// ---------------------------------------------------------------------------

/// Upper bound on characters in a single group portrait.
pub const MAX_GROUP_CHARACTERS: usize = 6;

/// Maximum prompt length in characters.
pub const MAX_PROMPT_LENGTH: usize = 2_000;

/// Maximum length of a character display name.
pub const MAX_CHARACTER_NAME_LENGTH: usize = 100;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// One character in a group portrait: a reference image plus optional
/// per-character pose instructions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacterRef {
    pub name: String,
    pub image_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pose: Option<String>,
}

/// Output framing requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AspectRatio {
    #[default]
    #[serde(rename = "1:1")]
    Square,
    #[serde(rename = "4:3")]
    Landscape,
    #[serde(rename = "3:4")]
    Portrait,
    #[serde(rename = "16:9")]
    Wide,
}

/// A generation job's payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GenerationRequest {
    /// Several characters composited into one scene.
    GroupPortrait {
        characters: Vec<CharacterRef>,
        prompt: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        style: Option<String>,
        #[serde(default)]
        aspect_ratio: AspectRatio,
    },
    /// Cut the subject out of an image, optionally placing it on a newly
    /// synthesised background.
    BackgroundRemoval {
        image_url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        background_prompt: Option<String>,
    },
    /// Restore and enhance faces in an image.
    FaceRestore { image_url: String },
}

impl GenerationRequest {
    /// Short machine name, used in logs and metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            GenerationRequest::GroupPortrait { .. } => "group_portrait",
            GenerationRequest::BackgroundRemoval { .. } => "background_removal",
            GenerationRequest::FaceRestore { .. } => "face_restore",
        }
    }

    /// Credits charged for this request.
    ///
    /// - Group portrait: one per character plus one for composition.
    /// - Background removal: one, plus one when a new background is
    ///   synthesised.
    /// - Face restore: one.
    pub fn cost(&self) -> i64 {
        match self {
            GenerationRequest::GroupPortrait { characters, .. } => characters.len() as i64 + 1,
            GenerationRequest::BackgroundRemoval {
                background_prompt, ..
            } => 1 + i64::from(background_prompt.is_some()),
            GenerationRequest::FaceRestore { .. } => 1,
        }
    }

    /// Validate the request before anything is charged.
    pub fn validate(&self) -> Result<(), CoreError> {
        match self {
            GenerationRequest::GroupPortrait {
                characters,
                prompt,
                style,
                ..
            } => {
                if characters.is_empty() {
                    return Err(CoreError::Validation(
                        "A group portrait needs at least one character".to_string(),
                    ));
                }
                if characters.len() > MAX_GROUP_CHARACTERS {
                    return Err(CoreError::Validation(format!(
                        "A group portrait supports at most {MAX_GROUP_CHARACTERS} characters (got {})",
                        characters.len()
                    )));
                }
                for character in characters {
                    validate_character(character)?;
                }
                validate_prompt("prompt", prompt, true)?;
                if let Some(style) = style {
                    validate_prompt("style", style, false)?;
                }
                Ok(())
            }
            GenerationRequest::BackgroundRemoval {
                image_url,
                background_prompt,
            } => {
                validate_image_url(image_url)?;
                if let Some(prompt) = background_prompt {
                    validate_prompt("background_prompt", prompt, true)?;
                }
                Ok(())
            }
            GenerationRequest::FaceRestore { image_url } => validate_image_url(image_url),
        }
    }
}

// ---------------------------------------------------------------------------
// Validation helpers
// ---------------------------------------------------------------------------

fn validate_character(character: &CharacterRef) -> Result<(), CoreError> {
    let name = character.name.trim();
    if name.is_empty() {
        return Err(CoreError::Validation(
            "Character name must not be empty".to_string(),
        ));
    }
    if name.chars().count() > MAX_CHARACTER_NAME_LENGTH {
        return Err(CoreError::Validation(format!(
            "Character name exceeds {MAX_CHARACTER_NAME_LENGTH} characters"
        )));
    }
    validate_image_url(&character.image_url)?;
    if let Some(pose) = &character.pose {
        validate_prompt("pose", pose, false)?;
    }
    Ok(())
}

/// Reference images must be fetchable by the inference backend.
pub fn validate_image_url(url: &str) -> Result<(), CoreError> {
    if url.starts_with("https://") || url.starts_with("http://") {
        Ok(())
    } else {
        Err(CoreError::Validation(format!(
            "Image URL must be http(s): '{url}'"
        )))
    }
}

fn validate_prompt(field: &str, text: &str, required: bool) -> Result<(), CoreError> {
    if required && text.trim().is_empty() {
        return Err(CoreError::Validation(format!("{field} must not be empty")));
    }
    let len = text.chars().count();
    if len > MAX_PROMPT_LENGTH {
        return Err(CoreError::Validation(format!(
            "{field} exceeds maximum length of {MAX_PROMPT_LENGTH} characters (got {len})"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
