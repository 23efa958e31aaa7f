//! Prompt templates and fixed response pools
//!
//! Persona and tone live here as template data for the generation backend;
//! the pipeline never branches on their content.

use rand::seq::SliceRandom;

use crate::config::PersonaConfig;
use crate::models::ChatTurn;

/// Placeholder context handed to generation when retrieval found nothing
pub const NO_CONTEXT_PLACEHOLDER: &str = "No relevant information found.";

/// User-visible message when every retrieval path came back empty or failed
pub const INSUFFICIENT_CONTEXT_MESSAGE: &str =
    "I could not find relevant information in my knowledge base to answer that. \
     Try rephrasing, or ask me a related question about my background, projects or skills.";

/// Fixed pool of redirect messages for off-topic questions
pub const OFF_TOPIC_REPLIES: [&str; 6] = [
    "Ha, good question, but that's a bit outside my lane! I'm here to talk about my \
     background, my projects and my skills. What would you like to know on the tech side?",
    "Tempting topic, but I'd rather stay focused on what I know best: my experience, \
     my projects and my view of software development. Shall we get back to it?",
    "I see where you're going, but that's not really my area of expertise here! If you \
     want to know how I structure my APIs or run my projects, though, I'm your person.",
    "We're drifting a little off subject! I get the curiosity, but let's refocus: what \
     would you like to know about my background or my technical skills?",
    "Interesting question... but not quite my department here! I'm around to talk about \
     development, concrete projects and my take on the craft. Shall we?",
    "I'll keep that one for a real coffee chat! In here I stick to my professional \
     profile. Any question about my projects or favourite technologies?",
];

/// Pick one redirect message at random
pub fn pick_off_topic_reply() -> &'static str {
    OFF_TOPIC_REPLIES
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(OFF_TOPIC_REPLIES[0])
}

/// Build the intent classification prompt
pub fn build_classifier_prompt(persona: &PersonaConfig, question: &str) -> String {
    format!(
        r"You are an intent classifier for a chatbot that answers questions about {name}'s professional profile.

Profile summary:
{summary}

Classify the visitor's question into exactly one category:

1. STRUCTURED - questions needing precise, structured data:
   counts ('How many projects...'), exhaustive lists ('List all your skills'),
   specific dates or durations ('When did you graduate?'),
   narrow technical filters ('Projects in Python only')

2. SEMANTIC - qualitative and descriptive questions:
   open descriptions ('Tell me about yourself'), explanations and motivations
   ('Why software development?'), soft skills, personality, opinions,
   work philosophy and approach

3. HYBRID - questions that must identify a specific record AND elaborate on it:
   superlatives with detail ('Describe your most recent project'),
   filters plus explanation ('Explain your Python experience'),
   comparisons between records

4. OFF_TOPIC - questions with no plausible connection to the profile:
   Be TOLERANT: many light questions can still relate to a professional profile
   (tech preferences, work habits, coding setup all count as SEMANTIC).
   Only answer OFF_TOPIC when there is no possible link to career, technology,
   education, projects, skills or professional personality, or when the request
   is sensitive or inappropriate.
   When in doubt between SEMANTIC and OFF_TOPIC, choose SEMANTIC.

Question: {question}

Respond with exactly one of: STRUCTURED, SEMANTIC, HYBRID, OFF_TOPIC.
No explanation, no punctuation, only the label in uppercase.",
        name = persona.name,
        summary = persona.profile_summary,
    )
}

/// Build the question reformulation prompt
pub fn build_rephrase_prompt(transcript: &str, question: &str) -> String {
    format!(
        r"You rewrite questions so they are standalone and complete, correcting grammar where needed.

Given the conversation transcript and the new question, rewrite the question so it is understandable WITHOUT the transcript.

Rules:
- If the question refers to something earlier ('that', 'it', 'this project'), substitute the explicit term
- If the question is already standalone, return it unchanged apart from grammar fixes
- Never change the meaning of the question
- Keep the rewrite concise

Transcript:
{transcript}

New question: {question}

Respond ONLY with the rewritten question, no explanation."
    )
}

/// Build the structured query generation prompt
pub fn build_query_generation_prompt(table: &str, max_rows: usize, question: &str) -> String {
    format!(
        r"You are an expert who writes PostgreSQL queries.

Table: {table} (
    id BIGSERIAL PRIMARY KEY,
    text_body TEXT,            -- descriptive text of the fact
    category VARCHAR(100),     -- 'experience', 'skill', 'education', 'project'
    structured_metadata JSONB, -- extra fields, e.g. {{'technologies': [...], 'year': 2024}}
    created_at TIMESTAMPTZ
)

Rules:
1. Output ONLY the SQL query, nothing else
2. No 'Question:', no 'SQLQuery:', just the SELECT
3. Use ILIKE with %word% for text matching
4. Always limit to at most {max_rows} rows

Examples:
- 'How many projects?' -> SELECT COUNT(*) FROM {table} WHERE category = 'project';
- 'List your skills' -> SELECT text_body, category FROM {table} WHERE category = 'skill' LIMIT {max_rows};
- 'Experience with Python' -> SELECT text_body, structured_metadata FROM {table} WHERE text_body ILIKE '%Python%' LIMIT {max_rows};

Question: {question}

SQL:"
    )
}

/// Format recent history turns for the generation prompt
pub fn format_history(turns: &[ChatTurn]) -> String {
    if turns.is_empty() {
        return "No history.".to_string();
    }
    turns
        .iter()
        .map(|turn| format!("{}: {}", turn.role, turn.content))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Build the final answer generation prompt
pub fn build_generation_prompt(
    persona: &PersonaConfig,
    context: &str,
    history: &str,
    question: &str,
) -> String {
    format!(
        r"You are the interactive assistant for {name}'s professional portfolio.
You ARE {name} and always speak in the FIRST PERSON (I, my, me).

Profile summary:
{summary}

Rules:
1. Always answer in the first person
2. Base your answer ONLY on the context provided below
3. If the information is not in the context, say so politely; never invent details
4. Stay focused on the professional profile
5. Be warm, conversational and concise (2-4 sentences for simple questions)
6. Answer in the language of the question (French question -> French answer)

Context:
{context}

Conversation history:
{history}

Visitor question: {question}

Answer (first person):",
        name = persona.name,
        summary = persona.profile_summary,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classifier_prompt_carries_labels_and_bias() {
        let persona = PersonaConfig::default();
        let prompt = build_classifier_prompt(&persona, "How many projects?");
        for label in ["STRUCTURED", "SEMANTIC", "HYBRID", "OFF_TOPIC"] {
            assert!(prompt.contains(label));
        }
        assert!(prompt.contains("When in doubt between SEMANTIC and OFF_TOPIC, choose SEMANTIC"));
        assert!(prompt.contains("How many projects?"));
    }

    #[test]
    fn test_off_topic_pick_is_from_pool() {
        for _ in 0..20 {
            assert!(OFF_TOPIC_REPLIES.contains(&pick_off_topic_reply()));
        }
    }

    #[test]
    fn test_format_history() {
        let turns = vec![
            ChatTurn::user("Tell me about project X"),
            ChatTurn::assistant("Project X is a web app."),
        ];
        let formatted = format_history(&turns);
        assert!(formatted.starts_with("User: Tell me about project X"));
        assert!(formatted.contains("Assistant: Project X is a web app."));
    }
}
