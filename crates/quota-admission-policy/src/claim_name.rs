use rand::Rng;
use sha2::{Digest, Sha256};

use crate::errors::PolicyError;
use crate::expression::{EvaluationContext, ExpressionEngine};
use crate::policy::Policy;

const DNS_LABEL_MAX: usize = 253;

/// The (namespace, name) a claim will have, derived deterministically so a
/// waiter registered before claim creation is guaranteed to match the
/// resulting event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClaimIdentity {
    pub namespace: String,
    pub name: String,
}

/// Inputs stable across repeated invocations; the caller is responsible for
/// deriving these from the admission request before calling `derive`.
pub struct ClaimNameInputs<'a> {
    pub policy_name: &'a str,
    pub group: &'a str,
    pub kind: &'a str,
    pub namespace: &'a str,
    pub resource_name: &'a str,
}

pub fn derive(
    engine: &dyn ExpressionEngine,
    policy: &Policy,
    context: &EvaluationContext,
    inputs: &ClaimNameInputs,
) -> Result<ClaimIdentity, PolicyError> {
    let metadata = &policy.claim_template.metadata;

    let namespace = match &metadata.namespace {
        Some(template) if !template.is_empty() => engine.render_template(template, context)?,
        _ => inputs.namespace.to_string(),
    };

    if let Some(template) = &metadata.name
        && !template.is_empty()
    {
        let rendered = engine.render_template(template, context)?;
        if !rendered.is_empty() {
            return Ok(ClaimIdentity {
                namespace,
                name: rendered,
            });
        }
    }

    if let Some(template) = &metadata.generate_name
        && !template.is_empty()
    {
        let rendered = engine.render_template(template, context)?;
        if !rendered.is_empty() {
            return Ok(ClaimIdentity {
                namespace,
                name: with_random_suffix(&rendered),
            });
        }
    }

    Ok(ClaimIdentity {
        namespace,
        name: fallback_name(inputs),
    })
}

fn with_random_suffix(generate_name: &str) -> String {
    const SUFFIX_ALPHABET: &[u8] = b"bcdfghjklmnpqrstvwxz2456789";
    let mut rng = rand::thread_rng();
    let suffix: String = (0..5)
        .map(|_| {
            let idx = rng.gen_range(0..SUFFIX_ALPHABET.len());
            SUFFIX_ALPHABET[idx] as char
        })
        .collect();
    format!("{generate_name}{suffix}")
}

fn fallback_name(inputs: &ClaimNameInputs) -> String {
    let hash_input = format!(
        "{}/{}/{}/{}/{}",
        inputs.policy_name, inputs.group, inputs.kind, inputs.namespace, inputs.resource_name
    );
    let digest = Sha256::digest(hash_input.as_bytes());
    let hash8: String = digest.iter().take(4).map(|b| format!("{b:02x}")).collect();

    let sanitized_resource = sanitize(inputs.resource_name);
    let sanitized_kind = sanitize(&inputs.kind.to_lowercase());
    let suffix = format!("-{sanitized_kind}-claim-{hash8}");

    let max_prefix_len = DNS_LABEL_MAX.saturating_sub(suffix.len());
    let prefix: String = sanitized_resource.chars().take(max_prefix_len).collect();
    let prefix = prefix.trim_end_matches('-').to_string();

    format!("{prefix}{suffix}")
}

/// Lowercase; pass `[a-z0-9]` verbatim; map `[-._]` to `-`; drop everything
/// else; strip leading/trailing `-`; substitute `unnamed` if empty.
pub fn sanitize(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.to_lowercase().chars() {
        match ch {
            'a'..='z' | '0'..='9' => out.push(ch),
            '-' | '.' | '_' => out.push('-'),
            _ => {}
        }
    }
    let trimmed = out.trim_matches('-');
    if trimmed.is_empty() {
        "unnamed".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::lowercases_and_maps_punctuation("My_Resource.Name", "my-resource-name")]
    #[case::drops_unsupported_characters("a!b@c#d", "abcd")]
    #[case::strips_leading_trailing_dashes("--hello--", "hello")]
    #[case::all_dropped_becomes_unnamed("!!!", "unnamed")]
    #[case::empty_becomes_unnamed("", "unnamed")]
    fn sanitize_cases(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(sanitize(input), expected);
    }

    #[test]
    fn fallback_name_is_deterministic() {
        let inputs = ClaimNameInputs {
            policy_name: "deploy-quota",
            group: "apps",
            kind: "Deployment",
            namespace: "team-a",
            resource_name: "web",
        };
        let a = fallback_name(&inputs);
        let b = fallback_name(&inputs);
        assert_eq!(a, b);
        assert!(a.starts_with("web-deployment-claim-"));
    }

    #[test]
    fn fallback_name_respects_dns_label_max_and_keeps_hash_suffix() {
        let long_name = "x".repeat(400);
        let inputs = ClaimNameInputs {
            policy_name: "p",
            group: "g",
            kind: "Kind",
            namespace: "ns",
            resource_name: &long_name,
        };
        let name = fallback_name(&inputs);
        assert!(name.len() <= DNS_LABEL_MAX);
        assert!(name.contains("-kind-claim-"));
    }

    #[test]
    fn fallback_name_matches_dns_label_pattern() {
        let inputs = ClaimNameInputs {
            policy_name: "p",
            group: "g",
            kind: "ConfigMap",
            namespace: "ns",
            resource_name: "My.Weird_Name!!",
        };
        let name = fallback_name(&inputs);
        let re_ok = name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
        assert!(re_ok);
        assert!(!name.starts_with('-'));
        assert!(!name.ends_with('-'));
    }
}
