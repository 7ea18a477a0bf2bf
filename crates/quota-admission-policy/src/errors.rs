use thiserror::Error;

/// Errors raised by the policy data model, the expression-language boundary,
/// and claim name derivation.
#[derive(Error, Debug)]
pub enum PolicyError {
    #[error("failed to evaluate trigger constraints: {0}")]
    ConstraintEvaluation(String),

    #[error("failed to render claim template: {0}")]
    TemplateRender(String),

    #[error("failed to convert admission object to an evaluation context: {0}")]
    ObjectConversion(String),

    #[error("policy {0} is malformed: {1}")]
    InvalidPolicy(String, String),
}
