//! LLM-judge scoring of predictions against ground truth.
//!
//! Each prediction is sent to a chat-completions endpoint with a fixed
//! evaluation prompt; the reply must be a Python-dict-style string of the
//! form `{'score': N}`. Failed requests are retried with error-specific
//! delays, and a request rejected as malformed or oversized downgrades the
//! remaining attempts to a fallback model.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde_json::json;
use tracing::{info, warn};

use crate::config::JudgeConfig;
use crate::error::LlmError;
use crate::manifest::{JudgeRecord, MatchLabel, PredictionRecord};
use crate::model::{map_http_error, map_transport_error, parse_completion};

/// Which evaluation rubric the judge applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JudgeVariant {
    /// Integer 1-5 scale, match at score > 2.5.
    Recognition,
    /// Continuous 1.0-5.0 scale, match at score >= 3.5.
    Forecasting,
}

impl std::str::FromStr for JudgeVariant {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "recognition" => Ok(JudgeVariant::Recognition),
            "forecasting" => Ok(JudgeVariant::Forecasting),
            other => Err(format!(
                "unknown judge variant '{other}', expected 'recognition' or 'forecasting'"
            )),
        }
    }
}

impl JudgeVariant {
    /// Threshold a score into the binary verdict.
    pub fn is_match(&self, score: f64) -> MatchLabel {
        let matched = match self {
            JudgeVariant::Recognition => score > 2.5,
            JudgeVariant::Forecasting => score >= 3.5,
        };
        if matched { MatchLabel::Yes } else { MatchLabel::No }
    }

    fn system_prompt(&self) -> &'static str {
        match self {
            JudgeVariant::Recognition => {
                "You are an intelligent chatbot designed for evaluating the similarity between \
                 ground truth action sequences and predicted action sequences in videos. \
                 Your task is to compare the predicted action sequences with the ground truth \
                 action sequences and determine how similar they are.\n\
                 ------\n\
                 ## INSTRUCTIONS:\n\
                 - Focus on the meaningful similarity between the predicted action sequences \
                 and the ground truth action sequences.\n\
                 - Consider synonyms or paraphrases as contributing to similarity.\n\
                 - Evaluate the similarity of the prediction compared to the ground truth on a \
                 scale from 1 to 5."
            }
            JudgeVariant::Forecasting => {
                "You are an AI designed for evaluating the similarity between ground truth and \
                 predicted actions in videos. Your task is to compare the predicted action \
                 sequences with the ground truth action sequences and determine how similar \
                 they are. Here are your evaluation guidelines:\
                 ------\
                 ##EVALUATION GUIDELINES: \
                 - Use a continuous scale from 1.0 to 5.0 to score the similarity.\n\
                 - 5.0: Perfect match in action and objects.\n\
                 - 4.0-4.9: Very good match with minor differences.\n\
                 - 3.0-3.9: Good match, capturing the main idea but may miss some details.\n\
                 - 2.0-2.9: Partial match, some relation but missing key aspects.\n\
                 - 1.0-1.9: Minimal or no match, mostly unrelated.\n\
                 - Consider the specific actions, objects, and overall context in your \
                 evaluation.\n\
                 - You can use any value between 1.0 and 5.0, such as 3.7 or 4.2, to provide a \
                 nuanced evaluation."
            }
        }
    }

    fn user_prompt(&self, ground_truth: &str, prediction: &str) -> String {
        match self {
            JudgeVariant::Recognition => format!(
                "Please evaluate the following video-based action sequence pair:\n\n\
                 Ground Truth: {ground_truth}\n\
                 Predicted Action: {prediction}\n\n\
                 Provide your evaluation as a similarity score between 1 and 5, where 1 \
                 indicates the least similarity and 5 indicates the highest similarity. \
                 Please generate the response in the form of a Python dictionary string with \
                 key 'score', where the value is an INTEGER between 1 and 5. \
                 DO NOT PROVIDE ANY OTHER OUTPUT TEXT OR EXPLANATION. Only provide the Python \
                 dictionary string. \
                 For example, your response should look like this: {{'score': 4}}."
            ),
            JudgeVariant::Forecasting => format!(
                "Evaluate the following video-based action pair:\n\n\
                 Ground Truth: {ground_truth}\n\
                 Predicted Action: {prediction}\n\n\
                 Provide your evaluation as a similarity score between 1.0 and 5.0, where 1.0 \
                 indicates the least similarity and 5.0 indicates the highest similarity. \
                 Please generate the response in the form of a Python dictionary string with \
                 key 'score', where the value is a FLOAT between 1.0 and 5.0.\
                 DO NOT PROVIDE ANY OTHER OUTPUT TEXT OR EXPLANATION. Only provide the Python \
                 dictionary string. \
                 For example, your response should look like this: {{'score': 4.2}}."
            ),
        }
    }
}

static SCORE_REPLY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^\{\s*['"]score['"]\s*:\s*(-?\d+(?:\.\d+)?)\s*\}$"#).unwrap()
});

/// Parse a judge reply of the form `{'score': N}`.
///
/// The reply must contain nothing but the dict literal, the score must lie
/// in 1..=5, and the recognition rubric additionally requires an integer.
pub fn parse_score(reply: &str, variant: JudgeVariant) -> Result<f64, LlmError> {
    let trimmed = reply.trim();
    let captures = SCORE_REPLY
        .captures(trimmed)
        .ok_or_else(|| LlmError::ResponseParse {
            message: format!("reply is not a score dict: {trimmed:?}"),
        })?;
    let score: f64 = captures[1].parse().map_err(|e| LlmError::ResponseParse {
        message: format!("bad score number: {e}"),
    })?;
    if !(1.0..=5.0).contains(&score) {
        return Err(LlmError::ResponseParse {
            message: format!("score {score} out of range 1..=5"),
        });
    }
    if variant == JudgeVariant::Recognition && score.fract() != 0.0 {
        return Err(LlmError::ResponseParse {
            message: format!("recognition score must be an integer, got {score}"),
        });
    }
    Ok(score)
}

/// Minimal chat-completions seam so the retry driver can be tested against
/// a mock endpoint.
#[async_trait]
pub trait ChatCompletionApi: Send + Sync {
    async fn complete(&self, model: &str, system: &str, user: &str) -> Result<String, LlmError>;
}

/// Chat-completions client for the judge endpoint.
pub struct OpenAiChatApi {
    client: Client,
    base_url: String,
    api_key: String,
    temperature: f64,
    timeout_secs: u64,
}

impl OpenAiChatApi {
    pub fn new(config: &JudgeConfig) -> Result<Self, LlmError> {
        let api_key = config
            .api_key
            .clone()
            .or_else(|| std::env::var(&config.api_key_env).ok())
            .ok_or_else(|| LlmError::AuthFailed {
                provider: format!(
                    "OpenAI-compatible: env var '{}' not set",
                    config.api_key_env
                ),
            })?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| LlmError::Connection {
                message: e.to_string(),
            })?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            temperature: config.temperature,
            timeout_secs: config.request_timeout_secs,
        })
    }
}

#[async_trait]
impl ChatCompletionApi for OpenAiChatApi {
    async fn complete(&self, model: &str, system: &str, user: &str) -> Result<String, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = json!({
            "model": model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
            "temperature": self.temperature,
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| map_transport_error(e, &self.base_url, self.timeout_secs))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| map_transport_error(e, &self.base_url, self.timeout_secs))?;

        if !status.is_success() {
            return Err(map_http_error(status, &text));
        }
        parse_completion(&text)
    }
}

/// What to do after a failed judge request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RetryAction {
    delay: Duration,
    downgrade: bool,
}

/// Error-specific retry policy: connection problems wait longest, rate
/// limits wait a fixed ten seconds, and a rejected request switches to the
/// fallback model after a short pause.
fn retry_action(error: &LlmError) -> RetryAction {
    match error {
        LlmError::Connection { .. } | LlmError::Timeout { .. } => RetryAction {
            delay: Duration::from_secs(30),
            downgrade: false,
        },
        LlmError::RateLimited { .. } => RetryAction {
            delay: Duration::from_secs(10),
            downgrade: false,
        },
        LlmError::BadRequest { .. } => RetryAction {
            delay: Duration::from_secs(5),
            downgrade: true,
        },
        _ => RetryAction {
            delay: Duration::from_secs(10),
            downgrade: false,
        },
    }
}

/// Scores predictions against ground truth via an LLM judge.
pub struct JudgeClient {
    api: Arc<dyn ChatCompletionApi>,
    config: JudgeConfig,
    variant: JudgeVariant,
}

impl JudgeClient {
    pub fn new(config: JudgeConfig, variant: JudgeVariant) -> Result<Self, LlmError> {
        let api = Arc::new(OpenAiChatApi::new(&config)?);
        Ok(Self::with_api(api, config, variant))
    }

    /// Build a client over an existing API implementation. Used by tests.
    pub fn with_api(
        api: Arc<dyn ChatCompletionApi>,
        config: JudgeConfig,
        variant: JudgeVariant,
    ) -> Self {
        Self {
            api,
            config,
            variant,
        }
    }

    /// Issue one judge request with the retry-and-downgrade policy.
    async fn request_with_retry(&self, system: &str, user: &str) -> Result<String, LlmError> {
        let mut model = self.config.model.clone();
        for attempt in 1..=self.config.max_attempts {
            match self.api.complete(&model, system, user).await {
                Ok(reply) => return Ok(reply),
                Err(error) => {
                    let action = retry_action(&error);
                    warn!(
                        attempt,
                        max_attempts = self.config.max_attempts,
                        model = %model,
                        error = %error,
                        delay_secs = action.delay.as_secs(),
                        "judge request failed"
                    );
                    if action.downgrade && model != self.config.fallback_model {
                        model = self.config.fallback_model.clone();
                    }
                    if attempt < self.config.max_attempts {
                        tokio::time::sleep(action.delay).await;
                    }
                }
            }
        }
        Err(LlmError::AttemptsExhausted {
            attempts: self.config.max_attempts,
        })
    }

    /// Score one ground-truth / prediction pair.
    pub async fn score(&self, ground_truth: &str, prediction: &str) -> Result<f64, LlmError> {
        let system = self.variant.system_prompt();
        let user = self.variant.user_prompt(ground_truth, prediction);
        let reply = self.request_with_retry(system, &user).await?;
        parse_score(&reply, self.variant).inspect_err(|_| {
            warn!(raw = %reply, "judge reply did not parse as a score");
        })
    }

    /// Score every prediction serially. A prediction whose request or parse
    /// ultimately fails is logged and excluded from the results.
    ///
    /// Recognition keys results by video id (a repeated id overwrites);
    /// forecasting suffixes every occurrence as `<id>_<n>` so repeated clips
    /// are scored separately.
    pub async fn judge_predictions(
        &self,
        records: &[PredictionRecord],
    ) -> BTreeMap<String, JudgeRecord> {
        let mut results = BTreeMap::new();
        let mut occurrences: HashMap<String, u32> = HashMap::new();

        for record in records {
            let key = match self.variant {
                JudgeVariant::Recognition => record.video_id.clone(),
                JudgeVariant::Forecasting => {
                    let n = occurrences
                        .entry(record.video_id.clone())
                        .and_modify(|n| *n += 1)
                        .or_insert(1);
                    format!("{}_{}", record.video_id, n)
                }
            };

            match self.score(&record.ground_truth, &record.prediction).await {
                Ok(score) => {
                    let label = self.variant.is_match(score);
                    info!(video_id = %key, score, %label, "judged");
                    results.insert(key, JudgeRecord { score, label });
                }
                Err(error) => {
                    warn!(video_id = %key, error = %error, "failed to judge prediction");
                }
            }
        }
        results
    }
}

/// Fraction of judged predictions labelled `yes`, or `None` when nothing was
/// judged successfully.
pub fn accuracy(results: &BTreeMap<String, JudgeRecord>) -> Option<f64> {
    if results.is_empty() {
        return None;
    }
    let correct = results
        .values()
        .filter(|r| r.label == MatchLabel::Yes)
        .count();
    Some(correct as f64 / results.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Mock endpoint that pops queued replies and records the model used
    /// for each call.
    #[derive(Default)]
    struct MockApi {
        replies: Mutex<VecDeque<Result<String, LlmError>>>,
        models: Mutex<Vec<String>>,
    }

    impl MockApi {
        fn queue(&self, reply: Result<String, LlmError>) {
            self.replies.lock().unwrap().push_back(reply);
        }

        fn models_used(&self) -> Vec<String> {
            self.models.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChatCompletionApi for MockApi {
        async fn complete(
            &self,
            model: &str,
            _system: &str,
            _user: &str,
        ) -> Result<String, LlmError> {
            self.models.lock().unwrap().push(model.to_string());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok("{'score': 3}".to_string()))
        }
    }

    fn client_with(api: Arc<MockApi>, variant: JudgeVariant) -> JudgeClient {
        JudgeClient::with_api(api, JudgeConfig::default(), variant)
    }

    fn record(id: &str) -> PredictionRecord {
        PredictionRecord {
            video_id: id.to_string(),
            question: "q".into(),
            ground_truth: "opening a door".into(),
            prediction: "opens the door".into(),
        }
    }

    #[test]
    fn parse_score_accepts_both_quote_styles() {
        assert_eq!(parse_score("{'score': 4}", JudgeVariant::Recognition).unwrap(), 4.0);
        assert_eq!(
            parse_score("{\"score\": 3.7}", JudgeVariant::Forecasting).unwrap(),
            3.7
        );
        assert_eq!(
            parse_score("  {'score': 5}  ", JudgeVariant::Recognition).unwrap(),
            5.0
        );
    }

    #[test]
    fn parse_score_rejects_surrounding_text() {
        assert!(parse_score("Sure! {'score': 4}", JudgeVariant::Recognition).is_err());
        assert!(parse_score("{'score': 4} is my rating", JudgeVariant::Recognition).is_err());
        assert!(parse_score("4", JudgeVariant::Recognition).is_err());
        assert!(parse_score("{'score': 4, 'reason': 'close'}", JudgeVariant::Recognition).is_err());
        assert!(parse_score("{'rating': 4}", JudgeVariant::Recognition).is_err());
    }

    #[test]
    fn parse_score_enforces_range() {
        assert!(parse_score("{'score': 0}", JudgeVariant::Forecasting).is_err());
        assert!(parse_score("{'score': 6}", JudgeVariant::Forecasting).is_err());
        assert!(parse_score("{'score': -2}", JudgeVariant::Forecasting).is_err());
    }

    #[test]
    fn recognition_requires_integer_score() {
        assert!(parse_score("{'score': 3.5}", JudgeVariant::Recognition).is_err());
        assert_eq!(
            parse_score("{'score': 3.5}", JudgeVariant::Forecasting).unwrap(),
            3.5
        );
    }

    #[test]
    fn thresholds_at_boundaries() {
        // Recognition is a strict greater-than: exactly 2.5 is "no".
        assert_eq!(JudgeVariant::Recognition.is_match(2.5), MatchLabel::No);
        assert_eq!(JudgeVariant::Recognition.is_match(3.0), MatchLabel::Yes);
        assert_eq!(JudgeVariant::Recognition.is_match(2.0), MatchLabel::No);
        // Forecasting includes the boundary: exactly 3.5 is "yes".
        assert_eq!(JudgeVariant::Forecasting.is_match(3.5), MatchLabel::Yes);
        assert_eq!(JudgeVariant::Forecasting.is_match(3.4), MatchLabel::No);
    }

    #[test]
    fn retry_policy_per_error_class() {
        let conn = retry_action(&LlmError::Connection {
            message: "refused".into(),
        });
        assert_eq!(conn.delay, Duration::from_secs(30));
        assert!(!conn.downgrade);

        let rate = retry_action(&LlmError::RateLimited {
            retry_after_secs: 99,
        });
        assert_eq!(rate.delay, Duration::from_secs(10));

        let bad = retry_action(&LlmError::BadRequest {
            message: "too long".into(),
        });
        assert_eq!(bad.delay, Duration::from_secs(5));
        assert!(bad.downgrade);

        let other = retry_action(&LlmError::ApiRequest {
            message: "boom".into(),
        });
        assert_eq!(other.delay, Duration::from_secs(10));
        assert!(!other.downgrade);
    }

    #[tokio::test(start_paused = true)]
    async fn connection_failure_waits_thirty_seconds() {
        let api = Arc::new(MockApi::default());
        api.queue(Err(LlmError::Connection {
            message: "refused".into(),
        }));
        api.queue(Ok("{'score': 4}".to_string()));
        let client = client_with(api, JudgeVariant::Recognition);

        let start = tokio::time::Instant::now();
        let score = client.score("gt", "pred").await.unwrap();
        assert_eq!(score, 4.0);
        assert_eq!(start.elapsed(), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn bad_request_downgrades_to_fallback_model() {
        let api = Arc::new(MockApi::default());
        api.queue(Err(LlmError::BadRequest {
            message: "context too long".into(),
        }));
        api.queue(Ok("{'score': 2}".to_string()));
        let client = client_with(api.clone(), JudgeVariant::Recognition);

        let score = client.score("gt", "pred").await.unwrap();
        assert_eq!(score, 2.0);
        assert_eq!(api.models_used(), vec!["gpt-4o-mini", "gpt-3.5-turbo"]);
    }

    #[tokio::test(start_paused = true)]
    async fn attempts_exhausted_after_budget() {
        let api = Arc::new(MockApi::default());
        for _ in 0..5 {
            api.queue(Err(LlmError::ApiRequest {
                message: "down".into(),
            }));
        }
        let client = client_with(api.clone(), JudgeVariant::Recognition);

        let err = client.score("gt", "pred").await.unwrap_err();
        assert!(matches!(err, LlmError::AttemptsExhausted { attempts: 5 }));
        assert_eq!(api.models_used().len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_predictions_are_excluded_not_fatal() {
        let api = Arc::new(MockApi::default());
        api.queue(Ok("{'score': 4}".to_string()));
        // Second prediction replies with prose on every attempt; the parse
        // failure is not retried, so it burns a single reply.
        api.queue(Ok("I think it's a 4".to_string()));
        api.queue(Ok("{'score': 1}".to_string()));
        let client = client_with(api, JudgeVariant::Recognition);

        let results = client
            .judge_predictions(&[record("A"), record("B"), record("C")])
            .await;
        assert_eq!(results.len(), 2);
        assert_eq!(results["A"].label, MatchLabel::Yes);
        assert_eq!(results["C"].label, MatchLabel::No);
        assert!(!results.contains_key("B"));
    }

    #[tokio::test(start_paused = true)]
    async fn forecasting_suffixes_repeated_ids() {
        let api = Arc::new(MockApi::default());
        api.queue(Ok("{'score': 4.0}".to_string()));
        api.queue(Ok("{'score': 2.0}".to_string()));
        api.queue(Ok("{'score': 5.0}".to_string()));
        let client = client_with(api, JudgeVariant::Forecasting);

        let results = client
            .judge_predictions(&[record("P01"), record("P01"), record("P02")])
            .await;
        let keys: Vec<_> = results.keys().cloned().collect();
        assert_eq!(keys, vec!["P01_1", "P01_2", "P02_1"]);
        assert_eq!(results["P01_2"].score, 2.0);
    }

    #[test]
    fn accuracy_over_results() {
        let mut results = BTreeMap::new();
        assert_eq!(accuracy(&results), None);

        results.insert(
            "A".to_string(),
            JudgeRecord {
                score: 4.0,
                label: MatchLabel::Yes,
            },
        );
        results.insert(
            "B".to_string(),
            JudgeRecord {
                score: 1.0,
                label: MatchLabel::No,
            },
        );
        assert_eq!(accuracy(&results), Some(0.5));
    }

    #[test]
    fn prompts_embed_the_pair() {
        let user = JudgeVariant::Recognition.user_prompt("opening a door", "opens the door");
        assert!(user.contains("Ground Truth: opening a door"));
        assert!(user.contains("Predicted Action: opens the door"));
        assert!(user.ends_with("{'score': 4}."));

        let user = JudgeVariant::Forecasting.user_prompt("gt", "pred");
        assert!(user.contains("between 1.0 and 5.0"));
        assert!(user.ends_with("{'score': 4.2}."));
    }
}
