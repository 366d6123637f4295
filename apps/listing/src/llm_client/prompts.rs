// Shared prompt fragments.
// Section-specific prompt building lives in generation::prompts; these are the
// cross-cutting pieces every caller reuses.

/// Appended to a section's system prompt when the JSON protocol is active.
pub const JSON_ONLY_SYSTEM: &str = "Return valid json only. \
    You MUST respond with exactly one JSON object. \
    Do NOT use markdown code fences. \
    Do NOT include explanations or any text outside the JSON object.";

/// Closing reminder on every section user prompt.
pub const EXECUTION_REMINDER: &str = "Follow the output and constraints in the \
    system YAML strictly; every hard constraint must be satisfied.";

/// Tail of every repair instruction.
pub const REPAIR_TAIL: &str = "Fix the previous version directly and output only \
    the corrected final text, with no explanation.";
