use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError, ValidationErrors};

use crate::analysis::{
    error::{AnalysisError, invalid_input},
    types::{AnalysisRequest, Framework, MAX_SCENARIO_CHARS},
};

/// Request body as it arrives on the wire, before framework parsing.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct RawAnalysisRequest {
    #[serde(default)]
    #[validate(
        custom(function = "validate_scenario"),
        length(max = MAX_SCENARIO_CHARS, message = "scenario exceeds 20000 characters")
    )]
    pub scenario: String,
    #[serde(default)]
    pub frameworks: Vec<String>,
    #[serde(skip)]
    pub caller_id: Option<String>,
}

impl RawAnalysisRequest {
    pub fn new(scenario: impl Into<String>, frameworks: &[&str]) -> Self {
        Self {
            scenario: scenario.into(),
            frameworks: frameworks.iter().map(|name| name.to_string()).collect(),
            caller_id: None,
        }
    }

    pub fn with_caller_id(mut self, caller_id: Option<String>) -> Self {
        self.caller_id = caller_id.filter(|id| !id.trim().is_empty());
        self
    }
}

fn validate_scenario(scenario: &str) -> Result<(), ValidationError> {
    if scenario.trim().is_empty() {
        let mut err = ValidationError::new("empty_scenario");
        err.message = Some("scenario must not be empty".into());
        return Err(err);
    }
    Ok(())
}

/// Turns a raw body into an immutable [`AnalysisRequest`].
pub fn parse_request(raw: RawAnalysisRequest) -> Result<AnalysisRequest, AnalysisError> {
    raw.validate()
        .map_err(|errors| invalid_input(describe(&errors)))?;

    let mut frameworks = BTreeSet::new();
    for name in &raw.frameworks {
        let framework = Framework::parse(name)
            .ok_or_else(|| invalid_input(format!("unknown framework '{}'", name.trim())))?;
        frameworks.insert(framework);
    }
    if frameworks.is_empty() {
        frameworks.extend(Framework::ALL);
    }

    Ok(AnalysisRequest {
        scenario: raw.scenario.trim().to_string(),
        frameworks,
        caller_id: raw.caller_id,
    })
}

fn describe(errors: &ValidationErrors) -> String {
    let mut messages = Vec::new();
    for (field, field_errors) in errors.field_errors() {
        for err in field_errors {
            let message = err
                .message
                .as_ref()
                .map(|message| message.to_string())
                .unwrap_or_else(|| err.code.to_string());
            messages.push(format!("{field}: {message}"));
        }
    }
    messages.sort();
    if messages.is_empty() {
        "invalid analysis request".to_string()
    } else {
        messages.join("; ")
    }
}
