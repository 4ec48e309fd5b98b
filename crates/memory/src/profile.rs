//! User profile service
//!
//! Detects preference signals in user messages, extracts structured
//! identity/preference/interest data through the LLM, and merges it into the
//! durable profile record. The service is the sole writer of the profile
//! key; two concurrent extractions may lose one merge, which is tolerated —
//! the next turn re-extracts.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Deserializer, Serialize};

use chat_agent_llm::{build_messages, extract_json_object, GenerationParams, LlmClient};

use crate::kv::{keys, KvStore};

/// Substrings that gate LLM extraction; a message containing none of these
/// is skipped without a model call
const SIGNAL_KEYWORDS: &[&str] = &[
    "我喜欢", "我不喜欢", "我讨厌", "我爱", "我恨", "我是", "我在", "我的", "我想", "我希望",
    "我需要", "我今年", "我住在", "我的职业", "我的工作", "我的爱好", "我的兴趣", "我的名字",
    "我叫", "我来自", "我姓", "我的年龄", "我的城市", "我是做", "我是一名", "我毕业于",
    "我的专业", "我的学历", "我感兴趣", "我的家人",
];

/// Identity fields; last-writer-wins per field
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Identity {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Age as stated; models return numbers or strings, both accepted
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "string_or_number")]
    pub age: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub education: Option<String>,
}

impl Identity {
    fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.age.is_none()
            && self.location.is_none()
            && self.job.is_none()
            && self.education.is_none()
    }

    fn merge(&mut self, other: Identity) {
        if other.name.is_some() {
            self.name = other.name;
        }
        if other.age.is_some() {
            self.age = other.age;
        }
        if other.location.is_some() {
            self.location = other.location;
        }
        if other.job.is_some() {
            self.job = other.job;
        }
        if other.education.is_some() {
            self.education = other.education;
        }
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| match v {
        serde_json::Value::String(s) if !s.is_empty() => Some(s),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }))
}

/// Durable user profile
///
/// Known fields are typed; anything else an extraction returns lands in
/// `extras` so the record can grow without schema migrations. Missing fields
/// are omitted from the stored JSON, never serialized as null.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct UserProfile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<Identity>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub preferences: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interests: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub communication_style: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,
    #[serde(flatten)]
    pub extras: serde_json::Map<String, serde_json::Value>,
}

impl UserProfile {
    /// Whether the profile carries any user-visible information
    pub fn is_empty(&self) -> bool {
        self.identity.as_ref().map(|i| i.is_empty()).unwrap_or(true)
            && self.preferences.is_empty()
            && self.interests.is_empty()
            && self.communication_style.is_none()
    }

    /// Merge one extraction into the stored record
    ///
    /// Identity fields overwrite, list fields append-dedup, the style
    /// overwrites when non-empty, confidence overwrites.
    pub fn merge(&mut self, extracted: UserProfile) {
        if let Some(identity) = extracted.identity {
            self.identity.get_or_insert_with(Identity::default).merge(identity);
        }

        for preference in extracted.preferences {
            if !self.preferences.contains(&preference) {
                self.preferences.push(preference);
            }
        }
        for interest in extracted.interests {
            if !self.interests.contains(&interest) {
                self.interests.push(interest);
            }
        }

        if let Some(style) = extracted.communication_style {
            if !style.is_empty() {
                self.communication_style = Some(style);
            }
        }
        if extracted.confidence.is_some() {
            self.confidence = extracted.confidence;
        }

        for (key, value) in extracted.extras {
            self.extras.insert(key, value);
        }
    }
}

/// Render the identity/preferences/interests block
pub fn format_profile_block(profile: &UserProfile) -> String {
    let mut parts: Vec<String> = Vec::new();

    if let Some(ref identity) = profile.identity {
        let mut lines = Vec::new();
        if let Some(ref name) = identity.name {
            lines.push(format!("姓名：{name}"));
        }
        if let Some(ref age) = identity.age {
            lines.push(format!("年龄：{age}岁"));
        }
        if let Some(ref location) = identity.location {
            lines.push(format!("居住地：{location}"));
        }
        if let Some(ref job) = identity.job {
            lines.push(format!("职业：{job}"));
        }
        if let Some(ref education) = identity.education {
            lines.push(format!("学历：{education}"));
        }
        if !lines.is_empty() {
            parts.push("【用户身份】".to_string());
            parts.extend(lines);
        }
    }

    if !profile.preferences.is_empty() {
        parts.push(format!("【用户偏好】{}", profile.preferences.join(", ")));
    }
    if !profile.interests.is_empty() {
        parts.push(format!("【用户兴趣】{}", profile.interests.join(", ")));
    }

    parts.join("\n")
}

/// Profile extraction and retrieval
pub struct ProfileService {
    kv: Arc<dyn KvStore>,
    llm: Arc<dyn LlmClient>,
    ttl_seconds: u64,
}

impl ProfileService {
    pub fn new(kv: Arc<dyn KvStore>, llm: Arc<dyn LlmClient>, ttl_seconds: u64) -> Self {
        Self { kv, llm, ttl_seconds }
    }

    /// Stored profile for one user; empty when absent or unreadable
    pub async fn profile(&self, user_id: &str) -> UserProfile {
        let key = keys::profile(user_id);
        match self.kv.get(&key).await {
            Ok(Some(json)) => serde_json::from_str(&json).unwrap_or_else(|e| {
                tracing::warn!(user_id, error = %e, "stored profile unreadable");
                UserProfile::default()
            }),
            Ok(None) => UserProfile::default(),
            Err(e) => {
                tracing::warn!(user_id, error = %e, "profile read failed");
                UserProfile::default()
            },
        }
    }

    /// Extract profile data from one message and merge it into the record
    ///
    /// Returns whether anything was extracted and written.
    pub async fn extract(&self, user_id: &str, message: &str) -> bool {
        if !has_signal(message) {
            return false;
        }

        let Some(extracted) = self.extract_with_llm(message).await else {
            return false;
        };
        if extracted.is_empty() && extracted.extras.is_empty() {
            return false;
        }

        let mut profile = self.profile(user_id).await;
        profile.merge(extracted);
        profile.last_updated = Some(Utc::now().to_rfc3339());

        let key = keys::profile(user_id);
        match serde_json::to_string(&profile) {
            Ok(json) => match self.kv.set_ex(&key, self.ttl_seconds, &json).await {
                Ok(()) => {
                    tracing::info!(user_id, "profile updated");
                    true
                },
                Err(e) => {
                    tracing::warn!(user_id, error = %e, "profile write failed");
                    false
                },
            },
            Err(e) => {
                tracing::error!(user_id, error = %e, "profile serialization failed");
                false
            },
        }
    }

    /// Chinese preamble describing what is known about the user
    ///
    /// Empty when the profile is empty.
    pub async fn build_contextual_prompt(&self, user_id: &str) -> String {
        let profile = self.profile(user_id).await;
        if profile.is_empty() {
            return String::new();
        }

        let mut parts = vec![
            "以下是关于用户的一些已知信息，请在对话中自然地利用这些信息，让用户感受到你认识他们："
                .to_string(),
        ];

        let block = format_profile_block(&profile);
        if !block.is_empty() {
            parts.push(block);
        }
        if let Some(ref style) = profile.communication_style {
            parts.push(format!("【沟通风格】{style}"));
        }
        if let Some(confidence) = profile.confidence {
            let label = if confidence > 0.8 {
                "高"
            } else if confidence > 0.6 {
                "中等"
            } else {
                "较低"
            };
            parts.push(format!("【信息可信度】{label}"));
        }

        parts.push("\n请在回答时，结合上述信息，提供更个性化和连贯的回复。".to_string());
        parts.join("\n")
    }

    async fn extract_with_llm(&self, message: &str) -> Option<UserProfile> {
        let prompt = format!(
            "请从以下用户消息中提取用户偏好、习惯、兴趣、身份信息等。\n\n\
             要求：\n\
             1. 如果消息中包含\"我是\"、\"我叫\"、\"我的名字是\"等，请提取姓名\n\
             2. 如果包含\"我今年\"、\"我的年龄是\"等，请提取年龄\n\
             3. 如果包含\"我住在\"、\"我来自\"等，请提取居住地\n\
             4. 如果包含\"我的职业是\"、\"我是一名\"、\"我是做\"等，请提取职业\n\
             5. 如果包含\"我喜欢\"、\"我爱\"、\"我讨厌\"、\"我不喜欢\"等，请提取偏好\n\
             6. 如果包含\"我的爱好是\"、\"我感兴趣\"等，请提取兴趣\n\
             7. 分析用户的沟通风格（正式/随意/直接/详细）\n\
             8. 评估信息的可信度（0-1）\n\n\
             请以JSON格式返回提取到的信息，例如：\n\
             {{\n\
                 \"identity\": {{\"name\": \"张三\", \"age\": 25, \"location\": \"北京\", \"job\": \"软件工程师\"}},\n\
                 \"preferences\": [\"喜欢咖啡\", \"不喜欢甜饮料\"],\n\
                 \"interests\": [\"编程\", \"电影\"],\n\
                 \"communication_style\": \"友好、直接\",\n\
                 \"confidence\": 0.9\n\
             }}\n\n\
             如果未提取到任何信息，请返回空JSON对象 {{}}。\n\n\
             用户消息: \"{message}\"\n\n\
             请生成提取结果："
        );

        let messages = build_messages("你是一个信息提取助手，只输出JSON。", &prompt);
        let response = match self.llm.generate(&messages, &GenerationParams::deterministic()).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %e, "profile extraction call failed");
                return None;
            },
        };

        let json = extract_json_object(&response)?;
        match serde_json::from_str::<UserProfile>(json) {
            Ok(profile) => Some(profile),
            Err(e) => {
                tracing::warn!(error = %e, "profile extraction JSON unparseable");
                None
            },
        }
    }
}

fn has_signal(message: &str) -> bool {
    SIGNAL_KEYWORDS.iter().any(|keyword| message.contains(keyword))
}
