//! Response templates with `{placeholder}` substitution.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([^{}]+)\}").expect("placeholder pattern is valid"));

static SIGN_OFF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:Best regards|Regards|Thanks|Sincerely|Cheers),?\s*([^\n]*)")
        .expect("sign-off pattern is valid")
});

static HONORIFIC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:Mr\.|Mrs\.|Ms\.|Dr\.|Prof\.)\s+").expect("honorific pattern is valid")
});

pub const ACCESS_ISSUE: &str = "access_issue";
pub const BILLING_INQUIRY: &str = "billing_inquiry";
pub const FEATURE_REQUEST: &str = "feature_request";
pub const TECHNICAL_ISSUE: &str = "technical_issue";
pub const AMBIGUOUS_REQUEST: &str = "ambiguous_request";

const TEMPLATES: &[(&str, &str)] = &[
    (
        ACCESS_ISSUE,
        "Hello {name},

I understand you're having trouble accessing the {feature}. Let me help you resolve this.

{diagnosis}

{resolution_steps}

Priority Status: {priority_level}

Estimated Resolution: {eta}

Please let me know if you need any clarification.

Best regards,
Support Team",
    ),
    (
        BILLING_INQUIRY,
        "Hi {name},

Thank you for your inquiry about {billing_topic}.

{explanation}

{next_steps}

If you have any questions, don't hesitate to ask.

Best regards,
Billing Team",
    ),
    (
        FEATURE_REQUEST,
        "Hello {name},

Thank you for suggesting {feature_name}.

{feedback}

{timeline}

We appreciate your input in making our product better.

Best regards,
Product Team",
    ),
    (
        TECHNICAL_ISSUE,
        "Hello {name},

I'm sorry you're experiencing an issue with {issue_description}.

{troubleshooting}

{solution}

Priority Status: {priority_level}

If you need further assistance, please don't hesitate to reach out.

Best regards,
Technical Support",
    ),
    (
        AMBIGUOUS_REQUEST,
        "Hello {name},

Thank you for contacting support.

To better assist you with your request, I would appreciate if you could provide some additional details:

{questions}

Once I have this information, I'll be able to help you more effectively.

Best regards,
Support Team",
    ),
];

/// Look up a template by identifier.
pub fn template(id: &str) -> Option<&'static str> {
    TEMPLATES
        .iter()
        .find(|(name, _)| *name == id)
        .map(|(_, body)| *body)
}

/// Identifiers of all known templates.
pub fn template_ids() -> impl Iterator<Item = &'static str> {
    TEMPLATES.iter().map(|(name, _)| *name)
}

/// Substitute `{placeholder}`s from `vars`. Placeholders without a value are
/// rendered as `[placeholder]` so gaps stay visible to a reviewer.
pub fn fill_template(template: &str, vars: &HashMap<&str, String>) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &regex::Captures<'_>| {
            let key = &caps[1];
            match vars.get(key) {
                Some(value) => value.clone(),
                None => format!("[{key}]"),
            }
        })
        .into_owned()
}

/// Extract the customer's name from a sign-off line such as
/// `Thanks,\nJohn Smith`. Falls back to `"Customer"`.
pub fn extract_customer_name(text: &str) -> String {
    SIGN_OFF
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .map(|m| HONORIFIC.replace(m.as_str().trim(), "").trim().to_string())
        .find(|name| !name.is_empty())
        .unwrap_or_else(|| "Customer".to_string())
}
