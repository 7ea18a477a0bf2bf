use rhai::{Dynamic, Engine, Scope};
use serde::Serialize;

use crate::admission_request::UserInfo;
use crate::errors::PolicyError;

/// Variables exposed to the expression language: the object being admitted,
/// the requesting user, and request metadata.
#[derive(Clone, Debug, Serialize)]
pub struct EvaluationContext {
    pub trigger: serde_json::Value,
    pub user: UserInfo,
    pub request_info: RequestInfo,
}

#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestInfo {
    pub verb: String,
    pub api_group: String,
    pub resource: String,
    pub namespace: String,
    pub name: String,
}

/// The expression-language boundary the core treats as a black box: a
/// constraint evaluator and a template renderer, both pure and
/// side-effect-free.
pub trait ExpressionEngine: Send + Sync {
    fn evaluate_conditions(
        &self,
        exprs: &[String],
        context: &EvaluationContext,
    ) -> Result<bool, PolicyError>;

    fn render_template(&self, template: &str, context: &EvaluationContext) -> Result<String, PolicyError>;
}

/// Rhai-backed implementation. Each evaluation gets a fresh raw engine (no
/// standard library, no I/O) and a scope populated with `trigger`, `user`,
/// `requestInfo`.
#[derive(Default)]
pub struct RhaiExpressionEngine;

impl RhaiExpressionEngine {
    pub fn new() -> Self {
        RhaiExpressionEngine
    }

    fn scope_for(&self, context: &EvaluationContext) -> Result<Scope<'static>, PolicyError> {
        let mut scope = Scope::new();
        scope.push(
            "trigger",
            Self::to_dynamic(&context.trigger).map_err(PolicyError::ObjectConversion)?,
        );
        scope.push(
            "user",
            Self::to_dynamic(&context.user).map_err(PolicyError::ObjectConversion)?,
        );
        scope.push(
            "requestInfo",
            Self::to_dynamic(&context.request_info).map_err(PolicyError::ObjectConversion)?,
        );
        Ok(scope)
    }

    fn to_dynamic<T: Serialize>(value: &T) -> Result<Dynamic, String> {
        rhai::serde::to_dynamic(value).map_err(|e| e.to_string())
    }

    fn engine() -> Engine {
        Engine::new_raw()
    }
}

impl ExpressionEngine for RhaiExpressionEngine {
    fn evaluate_conditions(
        &self,
        exprs: &[String],
        context: &EvaluationContext,
    ) -> Result<bool, PolicyError> {
        if exprs.is_empty() {
            return Ok(true);
        }
        let engine = Self::engine();
        let mut scope = self.scope_for(context)?;
        for expr in exprs {
            let result = engine
                .eval_expression_with_scope::<bool>(&mut scope, expr)
                .map_err(|e| PolicyError::ConstraintEvaluation(e.to_string()))?;
            if !result {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn render_template(&self, template: &str, context: &EvaluationContext) -> Result<String, PolicyError> {
        let engine = Self::engine();
        let mut scope = self.scope_for(context)?;
        let mut rendered = String::with_capacity(template.len());
        let mut rest = template;
        while let Some(start) = rest.find("${") {
            rendered.push_str(&rest[..start]);
            let after_open = &rest[start + 2..];
            let end = after_open.find('}').ok_or_else(|| {
                PolicyError::TemplateRender(format!("unterminated expression in template: {template}"))
            })?;
            let expr = &after_open[..end];
            let value: Dynamic = engine
                .eval_expression_with_scope(&mut scope, expr)
                .map_err(|e| PolicyError::TemplateRender(e.to_string()))?;
            rendered.push_str(&dynamic_to_string(&value));
            rest = &after_open[end + 1..];
        }
        rendered.push_str(rest);
        Ok(rendered)
    }
}

fn dynamic_to_string(value: &Dynamic) -> String {
    if let Some(s) = value.clone().try_cast::<String>() {
        s
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> EvaluationContext {
        EvaluationContext {
            trigger: json!({"metadata": {"namespace": "team-a", "name": "web"}}),
            user: UserInfo {
                username: Some("alice".to_string()),
                uid: None,
                groups: None,
                extra: None,
            },
            request_info: RequestInfo {
                verb: "create".to_string(),
                api_group: "apps".to_string(),
                resource: "deployments".to_string(),
                namespace: "team-a".to_string(),
                name: "web".to_string(),
            },
        }
    }

    #[test]
    fn empty_constraints_are_vacuously_true() {
        let engine = RhaiExpressionEngine::new();
        assert!(engine.evaluate_conditions(&[], &ctx()).unwrap());
    }

    #[test]
    fn all_true_constraints_pass() {
        let engine = RhaiExpressionEngine::new();
        let exprs = vec![
            "requestInfo.namespace == \"team-a\"".to_string(),
            "requestInfo.verb == \"create\"".to_string(),
        ];
        assert!(engine.evaluate_conditions(&exprs, &ctx()).unwrap());
    }

    #[test]
    fn one_false_constraint_fails_all() {
        let engine = RhaiExpressionEngine::new();
        let exprs = vec!["requestInfo.namespace == \"team-b\"".to_string()];
        assert!(!engine.evaluate_conditions(&exprs, &ctx()).unwrap());
    }

    #[test]
    fn malformed_expression_is_an_error() {
        let engine = RhaiExpressionEngine::new();
        let exprs = vec!["not an expression !!".to_string()];
        assert!(engine.evaluate_conditions(&exprs, &ctx()).is_err());
    }

    #[test]
    fn render_template_substitutes_expressions() {
        let engine = RhaiExpressionEngine::new();
        let rendered = engine
            .render_template("${requestInfo.name}-claim", &ctx())
            .unwrap();
        assert_eq!(rendered, "web-claim");
    }

    #[test]
    fn render_template_with_no_expressions_is_passthrough() {
        let engine = RhaiExpressionEngine::new();
        let rendered = engine.render_template("static-name", &ctx()).unwrap();
        assert_eq!(rendered, "static-name");
    }
}
