// src/oracle/llm.rs
//! Text-model backed oracles.
//!
//! `TextModel` is the low-level remote call; `LlmOracles` owns the prompts and
//! the strict parsing of replies, so the same logic runs against the real model
//! in production and a canned model in tests.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{
    parse_price, truncate_chars, ForecastOracle, Horizon, ParaphraseRequest, Paraphrased,
    Paraphraser, SentimentOracle, MAX_SOURCE_CHARS,
};
use crate::error::OracleError;
use crate::store::Sentiment;

/// One prompt in, one text reply out.
#[async_trait]
pub trait TextModel: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, OracleError>;
    fn name(&self) -> &'static str;
}

const GEMINI_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Google Gemini `generateContent` over REST. Requires `GEMINI_API_KEY`.
pub struct GeminiModel {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiModel {
    pub fn new(api_key: String, model: String, timeout: Duration) -> Result<Self, OracleError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("crypto-bunker/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(4))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            api_key,
            model,
            base_url: GEMINI_BASE.to_string(),
        })
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }
}

#[derive(Serialize)]
struct GenerateReq<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<PartIn<'a>>,
}

#[derive(Serialize)]
struct PartIn<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct GenerateResp {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<PartOut>,
}

#[derive(Deserialize)]
struct PartOut {
    #[serde(default)]
    text: String,
}

#[async_trait]
impl TextModel for GeminiModel {
    async fn generate(&self, prompt: &str) -> Result<String, OracleError> {
        if self.api_key.is_empty() {
            return Err(OracleError::Config("GEMINI_API_KEY not set".into()));
        }

        let url = format!("{}/{}:generateContent", self.base_url, self.model);
        let req = GenerateReq {
            contents: vec![Content {
                parts: vec![PartIn { text: prompt }],
            }],
        };

        let resp = self
            .http
            .post(url)
            .query(&[("key", self.api_key.as_str())])
            .json(&req)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(OracleError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body: GenerateResp = resp.json().await?;
        let text: String = body
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().map(|p| p.text).collect())
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(OracleError::Empty("text model"));
        }
        Ok(text)
    }

    fn name(&self) -> &'static str {
        "gemini"
    }
}

/// Paraphrase, sentiment and forecast oracles over one `TextModel`.
pub struct LlmOracles<M: TextModel> {
    model: M,
}

impl<M: TextModel> LlmOracles<M> {
    pub fn new(model: M) -> Self {
        Self { model }
    }

    pub fn model(&self) -> &M {
        &self.model
    }
}

fn body_prompt(attribution: &str, text: &str) -> String {
    format!(
        "Paraphrase the following blog post from {attribution}. Speak as if you're the one \
         reporting the information and don't mention this information is from elsewhere. \
         Return plain HTML paragraphs only: {text}"
    )
}

fn headline_prompt(attribution: &str, headline: &str) -> String {
    format!(
        "Paraphrase the title of the following blog post from {attribution}. \
         Return only the new title, without quotes or formatting: {headline}"
    )
}

fn sentiment_prompt(coin: &str, headline: &str) -> String {
    format!(
        "Return -1 if the following headline could have a negative impact on the market value \
         of {coin}, 1 for positive, 0 for no effect at all. Answer with the number only: {headline}"
    )
}

fn forecast_prompt(coin: &str, horizon: Horizon, samples: &[f64]) -> String {
    let values: Vec<String> = samples.iter().map(|v| format!("{:.0}", v)).collect();
    format!(
        "You are a financial consultant. It is required you give a best guess. Only provide a \
         USD estimate and nothing else. Do not use special characters, just numbers. Forecast \
         the price of {coin} {} from now. Here is a list of recent values in USD, newest first: [{}]",
        horizon.label(),
        values.join(", ")
    )
}

/// Trim model decoration off a one-line headline.
fn clean_headline(raw: &str) -> String {
    let line = raw.lines().find(|l| !l.trim().is_empty()).unwrap_or_default();
    line.trim()
        .trim_start_matches('#')
        .trim()
        .trim_matches('*')
        .trim_matches(|c| c == '"' || c == '\'' || c == '\u{201C}' || c == '\u{201D}')
        .trim()
        .to_string()
}

#[async_trait]
impl<M: TextModel> Paraphraser for LlmOracles<M> {
    async fn paraphrase(&self, req: &ParaphraseRequest) -> Result<Paraphrased, OracleError> {
        let text = truncate_chars(&req.text, MAX_SOURCE_CHARS);

        let body = self
            .model
            .generate(&body_prompt(&req.attribution, text))
            .await?;
        let body = body.trim().to_string();
        if body.is_empty() {
            return Err(OracleError::Empty("paraphrase body"));
        }

        let headline = clean_headline(
            &self
                .model
                .generate(&headline_prompt(&req.attribution, &req.headline))
                .await?,
        );
        if headline.is_empty() {
            return Err(OracleError::Empty("paraphrase headline"));
        }

        Ok(Paraphrased { body, headline })
    }
}

#[async_trait]
impl<M: TextModel> SentimentOracle for LlmOracles<M> {
    async fn score(&self, headline: &str, coin: &str) -> Result<Sentiment, OracleError> {
        let reply = self.model.generate(&sentiment_prompt(coin, headline)).await?;
        reply.parse::<Sentiment>()
    }
}

#[async_trait]
impl<M: TextModel> ForecastOracle for LlmOracles<M> {
    async fn forecast(
        &self,
        coin: &str,
        horizon: Horizon,
        samples: &[f64],
    ) -> Result<f64, OracleError> {
        let reply = self
            .model
            .generate(&forecast_prompt(coin, horizon, samples))
            .await?;
        parse_price(&reply)
    }
}
