use crate::llm::ToolDefinition;

use super::skill::Skill;

/// System prompt of the decision loop.
pub fn decision_prompt(agent_prompt: &str, skill_names: &[&str], memory: &str) -> String {
    let mut prompt = format!(
        "{agent_prompt}\n\n\
         You should use skill functions to attend to the user's request. Skill functions \
         understand instructions, but be succinct and clear about the instruction you pass \
         to each one. Do not choose the same skill more than once in a turn; a skill can \
         handle several sub-tasks from a single instruction. Call `stop` when no further \
         skill is needed.\n\n\
         Available skills: {}\n",
        skill_names.join(", ")
    );
    if !memory.is_empty() {
        prompt.push_str(
            "\nAll the memory learned from the user's previous interactions is provided below. \
             Use it as context to answer the user's question.\n\n",
        );
        prompt.push_str(memory);
    }
    prompt
}

/// System prompt for one skill run.
pub fn skill_prompt(agent_prompt: &str, skill_prompt: &str, memory: &str) -> String {
    let mut prompt = format!("{agent_prompt}\n\n{skill_prompt}\n");
    if !memory.is_empty() {
        prompt.push('\n');
        prompt.push_str(memory);
    }
    prompt
}

/// Final developer turn asking for a synthesized answer.
pub fn synthesis_instruction(question: &str) -> String {
    format!("Based on the conversation history, answer my original question.\nQuestion:{question}")
}

/// A skill exposed to the decision loop as a function taking `instruction`.
pub fn skill_definition(skill: &Skill) -> ToolDefinition {
    ToolDefinition {
        name: skill.name.clone(),
        description: skill.description.clone(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "instruction": {
                    "type": "string",
                    "description": "What the skill should do, in one or two sentences."
                }
            },
            "required": ["instruction"]
        }),
    }
}
