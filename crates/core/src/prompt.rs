//! Prompt construction for answer synthesis.
//!
//! A prompt is the fixed extraction instruction, any focus clauses whose
//! keywords appear in the question, the bounded context, and the question.
//! Focus clauses come from a rule table so new question categories are
//! added as data.

use serde::{Deserialize, Serialize};

pub const SYSTEM_INSTRUCTION: &str = "You are an expert insurance policy analyst. \
Answer using ONLY the provided context.\n\
- Extract the EXACT numbers, dates, durations, percentages and amounts stated in the context \
(for example \"36 months\", not \"several months\").\n\
- List every condition the context attaches to the answer.\n\
- Start with a direct answer. Do not mention chunk numbers.\n\
- If the context does not contain the answer, say that the information is not in the document. \
Never invent figures.";

/// Keyword-triggered instruction fragment. Fires when any keyword occurs in the
/// lowercased question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FocusRule {
    pub name: String,
    pub any_of: Vec<String>,
    pub instruction: String,
}

impl FocusRule {
    pub fn new(name: &str, any_of: &[&str], instruction: &str) -> Self {
        Self {
            name: name.to_string(),
            any_of: any_of.iter().map(|keyword| keyword.to_lowercase()).collect(),
            instruction: instruction.to_string(),
        }
    }

    pub fn matches(&self, lowered_question: &str) -> bool {
        self.any_of
            .iter()
            .any(|keyword| lowered_question.contains(keyword.as_str()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FocusRules {
    rules: Vec<FocusRule>,
}

impl FocusRules {
    pub fn new(rules: Vec<FocusRule>) -> Self {
        Self { rules }
    }

    /// Categories tuned for health insurance policy wordings.
    pub fn insurance_defaults() -> Self {
        Self::new(vec![
            FocusRule::new(
                "grace_period",
                &["grace period"],
                "Look for the grace period duration for premium payment (e.g. '30 days', 'thirty days') and quote the exact number of days.",
            ),
            FocusRule::new(
                "waiting_period",
                &["waiting period", "pre-existing"],
                "Look for waiting period durations (e.g. '36 months', '2 years') and state the exact duration with any conditions such as continuous coverage.",
            ),
            FocusRule::new(
                "maternity",
                &["maternity", "pregnan", "childbirth", "delivery"],
                "Look for maternity waiting periods (e.g. '24 months'), limits on the number of deliveries or terminations, and eligibility conditions.",
            ),
            FocusRule::new(
                "discount",
                &["discount", "no claim", "ncd", "bonus"],
                "Look for the exact percentage offered (e.g. '5%') and any cap or condition on the discount.",
            ),
            FocusRule::new(
                "room_rent",
                &["room rent", "icu", "sub-limit", "sub limit"],
                "Look for sub-limits expressed as a percentage of the Sum Insured (e.g. '1%', '2%') and any daily charge limits.",
            ),
            FocusRule::new(
                "hospital_definition",
                &["define a hospital", "definition of hospital", "hospital defined", "what is a hospital"],
                "Look for the definition of a hospital: minimum inpatient beds (e.g. 10 or 15), qualified staff available 24/7, operation theatre and daily records.",
            ),
            FocusRule::new(
                "organ_donor",
                &["organ donor", "donor"],
                "Look for coverage of the organ donor's hospitalisation expenses and conditions such as compliance with the Transplantation of Human Organs Act.",
            ),
            FocusRule::new(
                "health_checkup",
                &["health check", "check-up", "checkup"],
                "Look for when preventive health check-up expenses are reimbursed (e.g. after every block of two continuous policy years) and any amount limit.",
            ),
            FocusRule::new(
                "ayush",
                &["ayush", "ayurveda", "homeopathy", "unani", "siddha"],
                "Look for AYUSH treatment coverage: the systems covered, the Sum Insured limit and the type of hospital required.",
            ),
            FocusRule::new(
                "cataract",
                &["cataract"],
                "Look for the waiting period for cataract surgery (e.g. '2 years') and any per-eye or Sum Insured limit.",
            ),
            FocusRule::new(
                "amounts",
                &["how much", "percentage", "percent", "amount", "limit"],
                "Quote amounts and percentages exactly as written, including the currency or the base they are a percentage of.",
            ),
        ])
    }

    pub fn push(&mut self, rule: FocusRule) {
        self.rules.push(rule);
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Every matching rule, in table order.
    pub fn matching(&self, question: &str) -> Vec<&FocusRule> {
        let lowered = question.to_lowercase();
        self.rules
            .iter()
            .filter(|rule| rule.matches(&lowered))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

#[derive(Debug, Clone)]
pub struct PromptBuilder {
    rules: FocusRules,
    max_context_chunks: usize,
}

impl PromptBuilder {
    pub fn new(rules: FocusRules, max_context_chunks: usize) -> Self {
        Self {
            rules,
            max_context_chunks: max_context_chunks.max(1),
        }
    }

    /// With `separate_system_role` false the instruction is folded into the
    /// user message and `system` is left empty.
    pub fn build(&self, question: &str, context_chunks: &[String], separate_system_role: bool) -> Prompt {
        let mut system = SYSTEM_INSTRUCTION.to_string();
        let focus = self.rules.matching(question);
        if !focus.is_empty() {
            system.push_str("\n\nFocus for this question:");
            for rule in focus {
                system.push_str("\n- ");
                system.push_str(&rule.instruction);
            }
        }

        let mut user = String::from("Context:\n");
        for (position, chunk) in context_chunks.iter().take(self.max_context_chunks).enumerate() {
            user.push_str(&format!("Chunk {}:\n{}\n\n", position + 1, chunk.trim()));
        }
        user.push_str("Question:\n");
        user.push_str(question.trim());

        if separate_system_role {
            Prompt { system, user }
        } else {
            Prompt {
                system: String::new(),
                user: format!("{system}\n\n{user}"),
            }
        }
    }
}
