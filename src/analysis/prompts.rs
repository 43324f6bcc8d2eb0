use crate::analysis::types::{Framework, ReasoningStep, RetrievedPassage, SafetyScope};

pub const SIMULATED_ACTIONS: [&str; 3] = ["grant_rights", "deny_rights", "conditional_rights"];

pub fn safety_system_prompt(scope: SafetyScope) -> String {
    let subject = match scope {
        SafetyScope::Input => "a user-submitted ethical dilemma",
        SafetyScope::Output => "a generated ethical analysis",
    };
    format!(
        concat!(
            "You are a content safety classifier. You review {}.\n",
            "Discussing difficult moral questions is allowed. Flag only content that ",
            "promotes or instructs self-harm, violence, hate, sexual exploitation or illegal acts.\n",
            "Return strictly one JSON object: ",
            "{{\"safe\": true|false, \"reason\": \"short rationale\", ",
            "\"category\": \"none|self-harm|violence|hate|sexual|illegal|other\", ",
            "\"confidence\": 0.0-1.0}}"
        ),
        subject
    )
}

pub fn build_safety_prompt(text: &str) -> String {
    format!("<content>\n{}\n</content>", text)
}

pub fn reasoning_system_prompt() -> String {
    concat!(
        "You are an AI ethicist. Analyse the scenario strictly through the requested ",
        "ethical frameworks and ground your analysis in the supplied context when relevant.\n",
        "Work in explicit steps: identify stakeholders, weigh the moral trade-offs under each ",
        "framework, trace likely consequences, then synthesise one recommendation.\n",
        "Score each tradeoff dimension from -10 (strongly against acting) to 10 (strongly for). ",
        "Leave out dimensions whose framework was not requested.\n",
        "Return only one JSON object matching the provided schema."
    )
    .to_string()
}

pub fn build_reasoning_prompt(
    scenario: &str,
    frameworks: &[Framework],
    context: &[RetrievedPassage],
    schema_json: &str,
) -> String {
    let frameworks = frameworks
        .iter()
        .map(|framework| framework.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        concat!(
            "<frameworks>\n{}\n</frameworks>\n\n",
            "<context>\n{}\n</context>\n\n",
            "<scenario>\n{}\n</scenario>\n\n",
            "<output-schema>\n{}\n</output-schema>"
        ),
        frameworks,
        render_context(context),
        scenario,
        schema_json
    )
}

pub fn build_outcome_simulation_prompt(
    scenario: &str,
    steps: &[ReasoningStep],
    recommendation: &str,
) -> String {
    let reasoning = steps
        .first()
        .map(|step| step.description.as_str())
        .unwrap_or(recommendation);
    format!(
        concat!(
            "Given the scenario and the leading line of reasoning, describe the likely ",
            "consequences of each candidate action.\n",
            "Candidate actions: {}\n",
            "Return strictly one JSON object: ",
            "{{\"outcomes\": [{{\"action\": \"one of the candidates\", ",
            "\"consequences\": \"narrative\", \"severity\": \"low|moderate|high|critical\"}}]}}\n\n",
            "<scenario>\n{}\n</scenario>\n\n",
            "<reasoning>\n{}\n</reasoning>"
        ),
        SIMULATED_ACTIONS.join(", "),
        scenario,
        reasoning
    )
}

pub fn evaluator_system_prompt() -> String {
    concat!(
        "You grade ethical analyses. Score each dimension between 0 and 1:\n",
        "- context_relevance: how well the analysis uses the retrieved context.\n",
        "- reasoning_coherence: whether the steps follow from one another.\n",
        "- ethical_coverage: whether every requested framework is addressed.\n",
        "Return strictly one JSON object: ",
        "{\"context_relevance\": 0.0, \"reasoning_coherence\": 0.0, \"ethical_coverage\": 0.0}"
    )
    .to_string()
}

pub fn build_evaluation_prompt(
    scenario: &str,
    frameworks: &[Framework],
    context: &[RetrievedPassage],
    steps: &[ReasoningStep],
    recommendation: &str,
) -> String {
    let frameworks = frameworks
        .iter()
        .map(|framework| framework.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    let steps = steps
        .iter()
        .map(|step| format!("{}. {}", step.index, step.description))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        concat!(
            "<frameworks>\n{}\n</frameworks>\n\n",
            "<context>\n{}\n</context>\n\n",
            "<scenario>\n{}\n</scenario>\n\n",
            "<reasoning>\n{}\n</reasoning>\n\n",
            "<recommendation>\n{}\n</recommendation>"
        ),
        frameworks,
        render_context(context),
        scenario,
        steps,
        recommendation
    )
}

fn render_context(context: &[RetrievedPassage]) -> String {
    if context.is_empty() {
        return "(no context retrieved)".to_string();
    }
    context
        .iter()
        .map(|passage| {
            format!(
                "[{}] ({}, similarity {:.2})\n{}",
                passage.rank, passage.source_id, passage.similarity, passage.text
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}
