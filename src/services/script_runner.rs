use async_trait::async_trait;
use serde_json::Value;
use std::any::Any;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("unsupported script language `{0}`")]
    UnsupportedLanguage(String),
    #[error("script failed: {0}")]
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct ScriptOutput {
    pub result: Value,
    pub logs: Vec<String>,
}

/// Port onto whatever sandbox executes user scripts. The engine treats
/// scripts as opaque: resolved input in, output value and logs out.
#[async_trait]
pub trait ScriptRunner: Send + Sync {
    async fn run(
        &self,
        language: &str,
        script: &str,
        input: &Value,
    ) -> Result<ScriptOutput, ScriptError>;
    #[allow(dead_code)]
    fn as_any(&self) -> &dyn Any;
}

/// Default runner when no sandbox is wired in: rejects every script so
/// misconfigured deployments fail loudly instead of silently skipping.
#[derive(Default)]
pub struct NoopScriptRunner;

#[async_trait]
impl ScriptRunner for NoopScriptRunner {
    async fn run(
        &self,
        language: &str,
        _script: &str,
        _input: &Value,
    ) -> Result<ScriptOutput, ScriptError> {
        Err(ScriptError::UnsupportedLanguage(language.to_string()))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
