//! ModelScope image generation
//!
//! ModelScope only offers an asynchronous API: a submit call returns a task id,
//! which is then polled until it reaches a terminal state. The whole operation
//! is bounded by `max_poll_time`, measured from the start of the submit call.

use std::future::Future;
use std::time::Duration;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tokio::time::{interval_at, sleep_until, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::{classify_status, ErrorCode, GenerateError, GenerateResult, StatusTexts};

const NAME: &str = "ModelScope";

const DEFAULT_BASE_URL: &str = "https://api-inference.modelscope.cn";
const DEFAULT_MODEL: &str = "Tongyi-MAI/Z-Image-Turbo";
const DEFAULT_SIZE: &str = "1024x1024";
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
const DEFAULT_MAX_POLL_TIME: Duration = Duration::from_secs(120);

const TEXTS: StatusTexts = StatusTexts {
    label: "ModelScope ",
    unauthorized_hint: "请检查配置文件中的 api.image_key 是否正确，或前往 ModelScope 控制台获取新的 API Key",
    rate_limit_hint: "ModelScope API 有速率限制，请等待一段时间后再试",
    bad_request_hint: "请检查图片尺寸、模型名称等参数是否正确。支持的模型: Tongyi-MAI/Z-Image-Turbo",
    payment_required_hint: "请前往 ModelScope 控制台检查账户余额和 API 使用权限",
    unknown_hint: "请稍后重试，或访问 ModelScope 控制台查看服务状态",
};

/// Remote task state, normalized
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl TaskStatus {
    /// Unrecognized strings count as still running
    pub fn normalize(raw: &str) -> Self {
        match raw.trim().to_uppercase().as_str() {
            "PENDING" => TaskStatus::Pending,
            "RUNNING" | "PROCESSING" => TaskStatus::Running,
            "SUCCEED" | "SUCCEEDED" | "SUCCESS" => TaskStatus::Succeeded,
            "FAILED" | "FAILURE" => TaskStatus::Failed,
            _ => TaskStatus::Running,
        }
    }
}

/// State of one submitted generation task
#[derive(Debug, Clone)]
pub struct GenerateTask {
    pub task_id: String,
    pub status: TaskStatus,
    pub result_url: Option<String>,
    pub error_message: Option<String>,
}

impl GenerateTask {
    fn new(task_id: String) -> Self {
        Self {
            task_id,
            status: TaskStatus::Pending,
            result_url: None,
            error_message: None,
        }
    }

    fn apply(&mut self, update: TaskResponse) {
        let error_message = update.error_message.filter(|m| !m.is_empty());

        self.status = if error_message.is_some() {
            TaskStatus::Failed
        } else {
            TaskStatus::normalize(&update.task_status)
        };
        self.error_message = error_message;
        self.result_url = match self.status {
            TaskStatus::Succeeded => update.output_images.into_iter().find(|u| !u.is_empty()),
            _ => None,
        };
    }
}

#[derive(Debug, Serialize)]
struct CreateTaskRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    n: u32,
    width: u32,
    height: u32,
}

#[derive(Debug, Deserialize)]
struct CreateTaskResponse {
    #[serde(default)]
    task_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TaskResponse {
    #[serde(default)]
    task_status: String,
    #[serde(default)]
    output_images: Vec<String>,
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ModelScopeProvider {
    api_key: String,
    base_url: String,
    model: String,
    size: String,
    client: reqwest::Client,
    poll_interval: Duration,
    max_poll_time: Duration,
}

impl ModelScopeProvider {
    /// Empty `base_url`, `model` or `size` select the defaults
    pub fn new(
        api_key: &str,
        base_url: &str,
        model: &str,
        size: &str,
        client: reqwest::Client,
    ) -> Self {
        let pick = |value: &str, default: &str| {
            if value.is_empty() {
                default.to_string()
            } else {
                value.to_string()
            }
        };

        Self {
            api_key: api_key.to_string(),
            base_url: pick(base_url, DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            model: pick(model, DEFAULT_MODEL),
            size: pick(size, DEFAULT_SIZE),
            client,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_poll_time: DEFAULT_MAX_POLL_TIME,
        }
    }

    pub fn with_polling(mut self, interval: Duration, max_poll_time: Duration) -> Self {
        self.poll_interval = interval;
        self.max_poll_time = max_poll_time;
        self
    }

    pub fn name(&self) -> &'static str {
        NAME
    }

    pub async fn generate(
        &self,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<GenerateResult, GenerateError> {
        let deadline = Instant::now() + self.max_poll_time;

        let (width, height) = parse_size(&self.size).map_err(|e| {
            GenerateError::new(
                NAME,
                ErrorCode::InvalidSize,
                format!("图片尺寸格式错误: {}", e),
                Some("请使用 WIDTHxHEIGHT 格式，如 1024x1024"),
            )
        })?;

        let task_id = self
            .bounded(cancel, deadline, self.create_task(prompt, width, height))
            .await?;
        tracing::info!("ModelScope task submitted: {}", task_id);

        let mut task = GenerateTask::new(task_id);
        self.poll(&mut task, cancel, deadline).await?;

        match task.result_url {
            Some(url) => Ok(GenerateResult {
                url,
                revised_prompt: None,
                model: self.model.clone(),
                size: self.size.clone(),
            }),
            None => Err(GenerateError::new(
                NAME,
                ErrorCode::NoImage,
                "任务已完成但未返回图片",
                Some("提示词可能不符合内容政策，请尝试修改提示词"),
            )),
        }
    }

    /// Poll until the task is terminal. Returns with `task.status == Succeeded`
    /// or an error.
    async fn poll(
        &self,
        task: &mut GenerateTask,
        cancel: &CancellationToken,
        deadline: Instant,
    ) -> Result<(), GenerateError> {
        let mut ticker = interval_at(Instant::now() + self.poll_interval, self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut ticks = 0u32;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(GenerateError::canceled(NAME)),
                _ = sleep_until(deadline) => return Err(self.timeout_error()),
                _ = ticker.tick() => {}
            }
            ticks += 1;

            let update = self
                .bounded(cancel, deadline, self.fetch_status(&task.task_id))
                .await?;
            task.apply(update);
            tracing::debug!("ModelScope task {} tick {}: {:?}", task.task_id, ticks, task.status);

            match task.status {
                TaskStatus::Succeeded => return Ok(()),
                TaskStatus::Failed => {
                    let message = match &task.error_message {
                        Some(msg) => format!("图片生成任务失败: {}", msg),
                        None => "图片生成任务失败".to_string(),
                    };
                    return Err(GenerateError::new(
                        NAME,
                        ErrorCode::TaskFailed,
                        message,
                        Some("提示词可能不符合内容政策，请尝试修改提示词"),
                    ));
                }
                TaskStatus::Pending | TaskStatus::Running => {}
            }
        }
    }

    /// Run `fut` unless canceled or past the deadline first
    async fn bounded<T>(
        &self,
        cancel: &CancellationToken,
        deadline: Instant,
        fut: impl Future<Output = Result<T, GenerateError>>,
    ) -> Result<T, GenerateError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(GenerateError::canceled(NAME)),
            _ = sleep_until(deadline) => Err(self.timeout_error()),
            result = fut => result,
        }
    }

    fn timeout_error(&self) -> GenerateError {
        GenerateError::new(
            NAME,
            ErrorCode::Timeout,
            format!("图片生成超时（超过 {:?}）", self.max_poll_time),
            Some("图片生成时间较长，任务可能稍后仍会完成，请稍后查看结果，或尝试简化提示词"),
        )
    }

    async fn create_task(
        &self,
        prompt: &str,
        width: u32,
        height: u32,
    ) -> Result<String, GenerateError> {
        let url = format!("{}/v1/images/generations", self.base_url);
        let request = CreateTaskRequest {
            model: &self.model,
            prompt,
            n: 1,
            width,
            height,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("X-ModelScope-Async-Mode", "true")
            .json(&request)
            .send()
            .await
            .map_err(|e| GenerateError::network(NAME, "网络请求失败，请检查网络连接", e))?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!("ModelScope submit failed: {}", status);
            return Err(classify_status(NAME, &TEXTS, status.as_u16(), &body));
        }

        let data: CreateTaskResponse = response
            .json()
            .await
            .map_err(|e| GenerateError::decode(NAME, "响应解析失败", e))?;

        data.task_id.filter(|id| !id.is_empty()).ok_or_else(|| {
            GenerateError::new(
                NAME,
                ErrorCode::NoTaskId,
                "未获取到任务 ID",
                Some("API 返回格式可能已变更，请检查 ModelScope 文档"),
            )
        })
    }

    async fn fetch_status(&self, task_id: &str) -> Result<TaskResponse, GenerateError> {
        let url = format!("{}/v1/tasks/{}", self.base_url, task_id);

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .header("X-ModelScope-Task-Type", "image_generation")
            .send()
            .await
            .map_err(|e| GenerateError::network(NAME, "查询任务状态失败，请检查网络连接", e))?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(NAME, &TEXTS, status.as_u16(), &body));
        }

        response
            .json()
            .await
            .map_err(|e| GenerateError::decode(NAME, "任务状态响应解析失败", e))
    }
}

/// Parse "<width>x<height>", digits only
fn parse_size(size: &str) -> Result<(u32, u32), String> {
    let (w, h) = size
        .split_once('x')
        .ok_or_else(|| format!("invalid size format: {}, expected WIDTHxHEIGHT", size))?;
    let width = parse_dimension(w).ok_or_else(|| format!("invalid width: {}", w))?;
    let height = parse_dimension(h).ok_or_else(|| format!("invalid height: {}", h))?;
    Ok((width, height))
}

fn parse_dimension(s: &str) -> Option<u32> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse::<u32>().ok().filter(|v| *v > 0)
}
