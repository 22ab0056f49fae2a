//! Core services - 예약된 `core` 네임스페이스
//!
//! 번역, 문장 분석, 사전 조회. 실제 구현은 앱이 `CoreServices`로 주입한다.

use async_trait::async_trait;
use eterm_foundation::{Error, Result};
use serde_json::Value;

/// 예약 네임스페이스 ID
pub const CORE_NAMESPACE: &str = "core";

pub const TRANSLATE: &str = "translate";
pub const ANALYZE_SENTENCE: &str = "analyzeSentence";
pub const DICTIONARY_LOOKUP: &str = "dictionaryLookup";

#[async_trait]
pub trait CoreServices: Send + Sync {
    async fn translate(&self, text: &str, target_language: Option<&str>) -> Result<Value>;

    async fn analyze_sentence(&self, sentence: &str) -> Result<Value>;

    async fn dictionary_lookup(&self, word: &str) -> Result<Value>;
}

pub fn is_core_service(name: &str) -> bool {
    matches!(name, TRANSLATE | ANALYZE_SENTENCE | DICTIONARY_LOOKUP)
}

/// `core` 네임스페이스 호출 디스패치
pub(crate) async fn dispatch(
    core: Option<&dyn CoreServices>,
    service_name: &str,
    params: &Value,
) -> Result<Value> {
    if !is_core_service(service_name) {
        return Err(Error::NotImplemented(format!(
            "{}.{}",
            CORE_NAMESPACE, service_name
        )));
    }
    let Some(core) = core else {
        return Err(Error::NotImplemented(format!(
            "core services unavailable ({})",
            service_name
        )));
    };

    match service_name {
        TRANSLATE => {
            let text = require(params, service_name, "text")?;
            let target = params.get("targetLanguage").and_then(Value::as_str);
            core.translate(text, target).await
        }
        ANALYZE_SENTENCE => {
            let sentence = require(params, service_name, "sentence")?;
            core.analyze_sentence(sentence).await
        }
        _ => {
            let word = require(params, service_name, "word")?;
            core.dictionary_lookup(word).await
        }
    }
}

fn require<'a>(params: &'a Value, service: &str, key: &str) -> Result<&'a str> {
    params
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| Error::InvalidParams(format!("core.{} requires '{}'", service, key)))
}
