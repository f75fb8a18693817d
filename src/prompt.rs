//! Prompt assembly for SQL generation.
//!
//! `PromptAssembler::build` is a pure function of its inputs. Section order
//! is fixed: domain primer, one DDL block per table, worked example, output
//! constraints, then the literal user question.

use crate::schema_rag::corpus::TableDefinition;
use crate::schema_rag::retriever::ExampleMatch;

/// Entity and relationship rules for the identity-governance schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainRules {
    pub primer: String,
    pub key_points: Vec<String>,
}

impl Default for DomainRules {
    fn default() -> Self {
        Self {
            primer: "You are a MySQL expert writing queries against a SailPoint IdentityIQ database.\n\
                     spt_identity holds one row per person (identity). spt_application holds one row per \
                     connected application. spt_link holds one row per account an identity owns on an \
                     application: spt_link.identity_id references spt_identity.id and \
                     spt_link.application references spt_application.id. An identity can have several \
                     spt_link rows for the same application."
                .to_string(),
            key_points: vec![
                "Always use proper JOINs when accessing multiple tables".to_string(),
                "Active identities have i.inactive = 0".to_string(),
                "Use DISTINCT when a join through spt_link can duplicate identities".to_string(),
                "Follow MySQL syntax".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PromptAssembler;

impl PromptAssembler {
    pub fn new() -> Self {
        Self
    }

    /// Build the generation prompt. Identical inputs give byte-identical output.
    pub fn build(
        &self,
        query: &str,
        definitions: &[TableDefinition],
        example: Option<&ExampleMatch>,
        rules: &DomainRules,
    ) -> String {
        self.build_attempt(query, definitions, example, rules, 1)
    }

    /// Prompt for a numbered attempt. From the second attempt on, a retry
    /// note sits between the output constraints and the user request.
    pub fn build_attempt(
        &self,
        query: &str,
        definitions: &[TableDefinition],
        example: Option<&ExampleMatch>,
        rules: &DomainRules,
        attempt: usize,
    ) -> String {
        let mut parts = Vec::new();

        parts.push(format!("{}\n", rules.primer));
        if !rules.key_points.is_empty() {
            parts.push("Key points to remember:".to_string());
            for point in &rules.key_points {
                parts.push(format!("- {}", point));
            }
            parts.push(String::new());
        }

        if !definitions.is_empty() {
            parts.push("## TABLE DEFINITIONS\n".to_string());
            for def in definitions {
                parts.push(format!("### {}", def.name));
                parts.push(format!("{}\n", def.ddl.trim()));
            }
        }

        if let Some(m) = example {
            parts.push(format!("## RELEVANT EXAMPLE (similarity {:.3})\n", m.score));
            parts.push(format!("Q: {}", m.example.natural_language));
            parts.push(format!("A: {}", m.example.sql));
            if !m.example.explanation.is_empty() {
                parts.push(format!("Explanation: {}", m.example.explanation));
            }
            parts.push(String::new());
        }

        parts.push("## OUTPUT".to_string());
        parts.push(
            "Return exactly one read-only SELECT statement (a WITH query is allowed). \
             Do not modify data. No prose, no explanations, no markdown.\n"
                .to_string(),
        );

        if let Some(note) = retry_note(attempt) {
            parts.push(format!("{}\n", note));
        }

        parts.push(format!("User Request: {}", query));
        parts.push("SQL:".to_string());
        parts.join("\n")
    }
}

fn retry_note(attempt: usize) -> Option<String> {
    (attempt > 1).then(|| {
        format!(
            "RETRY ATTEMPT {}: Previous attempt failed. Please ensure the SQL is syntactically correct and follows MySQL standards.",
            attempt
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema_rag::corpus::Corpus;

    fn example() -> ExampleMatch {
        ExampleMatch {
            example: Corpus::builtin().examples[0].clone(),
            score: 0.8123,
        }
    }

    #[test]
    fn test_build_is_deterministic() {
        let defs = Corpus::builtin().tables;
        let ex = example();
        let a = PromptAssembler::new().build("users in Workday", &defs, Some(&ex), &DomainRules::default());
        let b = PromptAssembler::new().build("users in Workday", &defs, Some(&ex), &DomainRules::default());
        assert_eq!(a, b);
    }

    #[test]
    fn test_sections_appear_in_order() {
        let defs = Corpus::builtin().tables;
        let ex = example();
        let prompt = PromptAssembler::new().build("users in Workday", &defs, Some(&ex), &DomainRules::default());

        let primer = prompt.find("SailPoint IdentityIQ").unwrap();
        let identity = prompt.find("### spt_identity").unwrap();
        let link = prompt.find("### spt_link").unwrap();
        let example = prompt.find("## RELEVANT EXAMPLE (similarity 0.812)").unwrap();
        let output = prompt.find("## OUTPUT").unwrap();
        let request = prompt.find("User Request: users in Workday").unwrap();
        assert!(primer < identity && identity < link && link < example);
        assert!(example < output && output < request);
    }

    #[test]
    fn test_empty_context_keeps_base_instructions() {
        let prompt = PromptAssembler::new().build("what is the weather", &[], None, &DomainRules::default());
        assert!(prompt.contains("read-only SELECT"));
        assert!(prompt.contains("User Request: what is the weather"));
        assert!(!prompt.contains("## TABLE DEFINITIONS"));
        assert!(!prompt.contains("## RELEVANT EXAMPLE"));
    }

    #[test]
    fn test_first_attempt_has_no_retry_note() {
        let defs = Corpus::builtin().tables;
        let rules = DomainRules::default();
        let assembler = PromptAssembler::new();
        let first = assembler.build_attempt("users in Workday", &defs, None, &rules, 1);
        assert_eq!(first, assembler.build("users in Workday", &defs, None, &rules));
        assert!(!first.contains("RETRY ATTEMPT"));
    }

    #[test]
    fn test_retry_note_precedes_user_request() {
        let defs = Corpus::builtin().tables;
        let prompt = PromptAssembler::new().build_attempt(
            "users in Workday",
            &defs,
            Some(&example()),
            &DomainRules::default(),
            3,
        );

        let output = prompt.find("## OUTPUT").unwrap();
        let retry = prompt.find("RETRY ATTEMPT 3").unwrap();
        let request = prompt.find("User Request: users in Workday").unwrap();
        assert!(output < retry && retry < request);
        assert!(prompt.ends_with("User Request: users in Workday\nSQL:"));
    }
}
