use std::time::Duration;

use anyhow::{Context, anyhow, bail};
use tidal_shared::{CreateTaskInput, Counters, Task, TaskId, TaskPage, UpdateTaskInput};
use tracing::{debug, instrument};
use url::Url;

/// Request/response access to the task backend.
#[allow(async_fn_in_trait)]
pub trait TaskGateway {
    async fn fetch_page(&self, page: u32) -> anyhow::Result<TaskPage>;

    async fn create_task(&self, input: &CreateTaskInput) -> anyhow::Result<Task>;

    async fn update_task(&self, id: TaskId, patch: &UpdateTaskInput) -> anyhow::Result<Task>;

    async fn delete_task(&self, id: TaskId) -> anyhow::Result<()>;
}

#[allow(async_fn_in_trait)]
pub trait CounterGateway {
    async fn fetch_counters(&self) -> anyhow::Result<Counters>;
}

/// JSON-over-HTTP gateway. Any transport failure, non-success status or
/// undecodable body is reported as a failed request.
#[derive(Debug, Clone)]
pub struct HttpGateway {
    client: reqwest::Client,
    base: Url,
}

impl HttpGateway {
    pub fn new(base: Url, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed building HTTP client for task gateway")?;
        Ok(Self {
            client,
            base: with_trailing_slash(base),
        })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    pub fn page_url(&self, page: u32) -> anyhow::Result<Url> {
        let mut url = self.endpoint("tasks")?;
        url.query_pairs_mut().append_pair("page", &page.to_string());
        Ok(url)
    }

    pub fn task_url(&self, id: TaskId) -> anyhow::Result<Url> {
        self.endpoint(&format!("tasks/{id}"))
    }

    fn endpoint(&self, path: &str) -> anyhow::Result<Url> {
        self.base
            .join(path)
            .with_context(|| format!("invalid endpoint path {path} for {}", self.base))
    }

    async fn send(&self, request: reqwest::RequestBuilder, what: &str) -> anyhow::Result<String> {
        let response = request
            .send()
            .await
            .with_context(|| format!("{what}: request failed"))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .with_context(|| format!("{what}: failed reading response body"))?;
        if !status.is_success() {
            debug!(%status, body_len = body.len(), "non-success response");
            bail!("{what}: request failed with HTTP {status}");
        }
        Ok(body)
    }

    fn json_request(
        &self,
        request: reqwest::RequestBuilder,
        body: &impl serde::Serialize,
    ) -> anyhow::Result<reqwest::RequestBuilder> {
        let payload = serde_json::to_string(body).context("failed encoding request body")?;
        Ok(request
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(payload))
    }
}

impl TaskGateway for HttpGateway {
    #[instrument(skip(self))]
    async fn fetch_page(&self, page: u32) -> anyhow::Result<TaskPage> {
        let url = self.page_url(page)?;
        let body = self
            .send(self.client.get(url), "fetch tasks")
            .await?;
        decode_page(&body)
    }

    #[instrument(skip(self, input), fields(title_len = input.title.len()))]
    async fn create_task(&self, input: &CreateTaskInput) -> anyhow::Result<Task> {
        let url = self.endpoint("tasks")?;
        let request = self.json_request(self.client.post(url), input)?;
        let body = self.send(request, "create task").await?;
        decode_task(&body)
    }

    #[instrument(skip(self, patch))]
    async fn update_task(&self, id: TaskId, patch: &UpdateTaskInput) -> anyhow::Result<Task> {
        let url = self.task_url(id)?;
        let request = self.json_request(self.client.put(url), patch)?;
        let body = self.send(request, "update task").await?;
        decode_task(&body)
    }

    #[instrument(skip(self))]
    async fn delete_task(&self, id: TaskId) -> anyhow::Result<()> {
        let url = self.task_url(id)?;
        self.send(self.client.delete(url), "delete task").await?;
        Ok(())
    }
}

impl CounterGateway for HttpGateway {
    #[instrument(skip(self))]
    async fn fetch_counters(&self) -> anyhow::Result<Counters> {
        let url = self.endpoint("analytics/")?;
        let body = self
            .send(self.client.get(url), "fetch analytics")
            .await?;
        serde_json::from_str(&body).map_err(|err| anyhow!("fetch analytics: request failed: {err}"))
    }
}

pub fn decode_page(body: &str) -> anyhow::Result<TaskPage> {
    serde_json::from_str(body).map_err(|err| anyhow!("fetch tasks: request failed: {err}"))
}

pub fn decode_task(body: &str) -> anyhow::Result<Task> {
    serde_json::from_str(body).map_err(|err| anyhow!("task response: request failed: {err}"))
}

fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}
