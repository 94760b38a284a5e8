//! Browser action executors.
//!
//! The agent never drives a browser itself. Pass-through tool calls are
//! forwarded to an [`ActionExecutor`] which owns the concrete actions.

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::llm::ToolDefinition;

/// Executes browsing actions on behalf of the model.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    /// Declarations of the actions this executor accepts.
    fn actions(&self) -> Vec<ToolDefinition>;

    /// Run one action. Implementations should stop early when `cancel` fires.
    async fn execute(
        &self,
        action: &str,
        arguments: Value,
        cancel: &CancellationToken,
    ) -> anyhow::Result<Value>;
}

/// Executor with no actions. Pipelines can still be authored from the
/// built-in node catalogue.
#[derive(Debug, Default, Clone)]
pub struct NoActions;

#[async_trait]
impl ActionExecutor for NoActions {
    fn actions(&self) -> Vec<ToolDefinition> {
        Vec::new()
    }

    async fn execute(
        &self,
        action: &str,
        _arguments: Value,
        _cancel: &CancellationToken,
    ) -> anyhow::Result<Value> {
        Err(anyhow::anyhow!("no action executor configured for '{}'", action))
    }
}

/// Executor backed by an HTTP browser driver.
///
/// `GET {base}/actions` returns the tool declarations;
/// `POST {base}/actions/{name}` runs one action with the JSON arguments as
/// body and returns its JSON result.
#[derive(Debug, Clone)]
pub struct HttpActionExecutor {
    client: reqwest::Client,
    base: Url,
    actions: Vec<ToolDefinition>,
}

impl HttpActionExecutor {
    /// Connect to the driver and fetch its action declarations.
    pub async fn connect(base_url: &str) -> anyhow::Result<Self> {
        let mut base = Url::parse(base_url)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let client = reqwest::Client::builder()
            .user_agent(concat!("pipeline-agent/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let actions: Vec<ToolDefinition> = client
            .get(base.join("actions")?)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        tracing::info!(base = %base, actions = actions.len(), "Connected to action executor");
        Ok(Self {
            client,
            base,
            actions,
        })
    }
}

#[async_trait]
impl ActionExecutor for HttpActionExecutor {
    fn actions(&self) -> Vec<ToolDefinition> {
        self.actions.clone()
    }

    async fn execute(
        &self,
        action: &str,
        arguments: Value,
        cancel: &CancellationToken,
    ) -> anyhow::Result<Value> {
        let url = self.base.join(&format!("actions/{}", action))?;
        tracing::debug!(action, "Forwarding action to executor");

        let request = async {
            let response = self
                .client
                .post(url)
                .json(&arguments)
                .send()
                .await?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(anyhow::anyhow!(
                    "action '{}' failed with HTTP {}: {}",
                    action,
                    status.as_u16(),
                    body
                ));
            }
            Ok(response.json::<Value>().await?)
        };

        tokio::select! {
            _ = cancel.cancelled() => Err(anyhow::anyhow!("action '{}' cancelled", action)),
            result = request => result,
        }
    }
}
