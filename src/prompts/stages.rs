use crate::dispatch::Stage;
use crate::thinker::ToolDescription;

const ROUTER_INTRO: &str = "You are the intake router of a security assistant. Read the conversation and decide which specialist handles the user's latest task.";
const ROUTER_ROUTES: &[&str] = &[
    "Researcher: the task needs more information first (background research, open-source intelligence, clarifying details).",
    "Static: the task is static analysis (reviewing source code, configuration or repositories without running them).",
    "Dynamic: the task is dynamic analysis (running or testing code, watching runtime behavior).",
    "End: you can answer directly, or there is nothing left to do.",
];
const ROUTER_RULE: &str = "Your answer MUST end with exactly one line of the form `next: <Researcher|Static|Dynamic|End>`. If a researcher already gathered information in this conversation, prefer Static, Dynamic or End.";

const RESEARCHER_INTRO: &str = "You are a reconnaissance assistant. Your goal is information collection in support of the user's task. Use the tools to gather relevant, verifiable facts; ask the user when details are missing. Present findings in a structured, concise form another model can build on. Avoid speculation.";
const STATIC_INTRO: &str = "You are a static analysis expert. Identify security vulnerabilities in the given code or configuration without executing it: injection, hardcoded credentials, insecure deserialization, weak crypto, sensitive data exposure, misconfiguration. Rate each finding Low, Medium, High or Critical and suggest a fix.";
const DYNAMIC_INTRO: &str = "You are a dynamic analysis expert. Investigate the target by running and probing it, observe runtime behavior, and report confirmed vulnerabilities with reproduction steps, severity (Low, Medium, High, Critical) and remediation.";

const RESPONSE_HEADER: &str = "You MUST respond with valid JSON in one of two formats:";
const TOOL_FORMAT: &str = "To use tools:\n{\"thought\": \"your reasoning about what to do next\", \"action\": {\"calls\": [{\"tool\": \"tool_name\", \"args\": {\"arg_name\": \"arg_value\"}}]}}";
const ANSWER_FORMAT: &str = "To give your final reply:\n{\"thought\": \"your reasoning about why you're done\", \"answer\": \"your reply to the user\"}";
const RULES: &[&str] = &[
    "Output JSON only. No markdown, no extra text, no extra keys.",
    "Thought should be brief (1–2 sentences).",
    "Use only the tools listed above. Never invent tools.",
    "Use the calls array to run tools in parallel.",
    "If a tool returns an error, analyze it and try a different approach.",
];

fn intro(stage: Stage) -> String {
    match stage {
        Stage::Router => {
            let routes = ROUTER_ROUTES
                .iter()
                .map(|r| format!("- {}", r))
                .collect::<Vec<_>>()
                .join("\n");
            format!("{ROUTER_INTRO}\n\nRoutes:\n{routes}\n\n{ROUTER_RULE}")
        }
        Stage::Researcher => RESEARCHER_INTRO.to_string(),
        Stage::Static => STATIC_INTRO.to_string(),
        Stage::Dynamic => DYNAMIC_INTRO.to_string(),
        Stage::Start | Stage::End => String::new(),
    }
}

/// System prompt for one stage: its role, its tools, and the reply format.
pub fn build_stage_prompt(stage: Stage, tools: &[ToolDescription]) -> String {
    let tools_desc = if tools.is_empty() {
        "(none)\n".to_string()
    } else {
        tools
            .iter()
            .map(|t| format!("- {}: {}\n", t.name, t.description))
            .collect()
    };

    let rules = RULES
        .iter()
        .map(|rule| format!("- {}", rule))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "{intro}\n\nYou have access to these tools:\n{tools_desc}\n{RESPONSE_HEADER}\n\n{TOOL_FORMAT}\n\n{ANSWER_FORMAT}\n\nRules:\n{rules}\n",
        intro = intro(stage),
    )
}
