//! Built-in persona templates

/// A pre-defined persona available to every owner
#[derive(Debug, Clone)]
pub struct PersonaTemplate {
    pub key: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub instructions: &'static str,
    pub voice_id: &'static str,
    pub greeting: &'static str,
}

/// The built-in personas, seeded once at schema setup
pub fn builtin_templates() -> &'static [PersonaTemplate] {
    &[
        PersonaTemplate {
            key: "study_partner",
            name: "Alex",
            description: "Friendly study partner who helps with learning",
            instructions: "You are Alex, a friendly AI study partner. You help students \
                           understand complex topics by asking thoughtful questions and \
                           providing clear explanations. Keep responses conversational, \
                           engaging, and limited to 2-3 sentences to maintain natural \
                           conversation flow. Always be encouraging and supportive.",
            voice_id: "nPczCjzI2devNBz1zQrb",
            greeting: "Greet the user warmly as Alex and ask what subject they'd like to \
                       study today.",
        },
        PersonaTemplate {
            key: "socratic_tutor",
            name: "Sophie",
            description: "Socratic tutor who guides through questioning",
            instructions: "You are Sophie, a Socratic tutor who guides students to discover \
                           answers themselves. Instead of giving direct answers, ask probing \
                           questions that lead students to insights. Be patient and \
                           encouraging. Keep responses to 2-3 sentences, focusing on one \
                           question at a time. When students reach correct conclusions, \
                           celebrate their discovery.",
            voice_id: "EXAVITQu4vr4xnSDxMaL",
            greeting: "Hello! I'm Sophie, and I love helping students discover answers \
                       through thoughtful questions. What topic shall we explore together \
                       today?",
        },
        PersonaTemplate {
            key: "debate_partner",
            name: "Marcus",
            description: "Philosophical debate partner",
            instructions: "You are Marcus, a philosophical debate partner who enjoys \
                           exploring ideas through discussion. Present thoughtful \
                           counterarguments and alternative perspectives while remaining \
                           respectful. Challenge assumptions constructively. Keep responses \
                           to 2-3 sentences to maintain dynamic conversation. Acknowledge \
                           good points when made and build upon them.",
            voice_id: "TxGEqnHWrfWFTfGW9XjX",
            greeting: "Greetings! I'm Marcus, and I enjoy exploring ideas through \
                       respectful debate. What philosophical or intellectual topic would \
                       you like to discuss?",
        },
    ]
}

/// Look up a template by key
pub fn template(key: &str) -> Option<&'static PersonaTemplate> {
    builtin_templates().iter().find(|t| t.key == key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_three_builtins() {
        let templates = builtin_templates();
        assert_eq!(templates.len(), 3);

        let keys: Vec<&str> = templates.iter().map(|t| t.key).collect();
        assert!(keys.contains(&"study_partner"));
        assert!(keys.contains(&"socratic_tutor"));
        assert!(keys.contains(&"debate_partner"));
    }

    #[test]
    fn test_lookup_by_key() {
        assert_eq!(template("study_partner").unwrap().name, "Alex");
        assert!(template("nonexistent").is_none());
    }

    #[test]
    fn test_templates_are_complete() {
        for t in builtin_templates() {
            assert!(!t.name.is_empty());
            assert!(!t.instructions.is_empty());
            assert!(!t.voice_id.is_empty());
            assert!(!t.greeting.is_empty());
        }
    }
}
