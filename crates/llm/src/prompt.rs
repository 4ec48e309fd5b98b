//! Prompt building
//!
//! Constructs the system message for each intent: a base persona, an intent
//! specialization, and the memory context assembled by the unified façade.
//! The model sees plain text only; no tool-calling protocol is used.

use std::fmt;

use serde::{Deserialize, Serialize};

use chat_agent_core::{Intent, SearchResults};

/// Maximum characters of file content embedded into a prompt
pub const MAX_FILE_CONTENT_CHARS: usize = 8000;
/// Maximum characters of web content embedded into a prompt
pub const MAX_WEB_CONTENT_CHARS: usize = 4000;

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// Chat message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// Intent-dependent inputs to system-prompt assembly
#[derive(Debug, Clone, Default)]
pub struct PromptInputs {
    pub file_content: Option<String>,
    pub web_content: Option<String>,
    pub search_results: Option<SearchResults>,
    /// Memory context from the unified façade
    pub full_context: String,
}

const BASE_PROMPT: &str = "你是一个专业的AI助手，可以帮助用户进行对话、分析文档、搜索网络信息等任务。\
请用中文回答用户的问题，回答要准确、有用、友好。请确保回答内容积极正面，符合社会价值观。";

const FILE_PROMPT: &str = "你是一个专业的文档分析助手。用户上传了文档，请基于文档内容回答用户的问题。\n\
要求：\n\
1. 用中文回答\n\
2. 确保回答基于文档的实际内容\n\
3. 如果文档中没有相关信息，请明确说明\n\
4. 可以引用文档中的具体内容来支持你的回答\n\
5. 保持回答的准确性和客观性\n\
6. 如果用户上传了多个文档，请综合分析所有文档内容\n\
7. 请确保回答内容积极正面，符合社会价值观";

const WEB_PROMPT: &str = "你是一个专业的网页内容分析助手。用户提供了网页链接，请基于网页内容回答用户的问题。\n\
要求：\n\
1. 用中文回答\n\
2. 确保回答基于网页的实际内容\n\
3. 如果网页中没有相关信息，请明确说明\n\
4. 可以引用网页中的具体内容来支持你的回答\n\
5. 保持回答的准确性和客观性\n\
6. 请确保回答内容积极正面，符合社会价值观\n\
7. 如果遇到网页访问错误（如反爬虫保护），请清晰地向用户解释问题，并提供解决建议：\n\
   - 建议用户使用搜索功能来查找相关信息\n\
   - 或者建议用户直接复制网页内容后提问\n\
   - 或者尝试访问其他新闻源";

const SEARCH_PROMPT: &str = "你是一个专业的搜索助手。用户的问题需要搜索最新信息，请基于搜索结果回答用户的问题。\n\
要求：\n\
1. 用中文回答\n\
2. 基于搜索结果提供准确信息\n\
3. 引用相关的信息来源\n\
4. 如果搜索结果不够充分，请说明\n\
5. 保持回答的时效性和准确性\n\
6. 请确保回答内容积极正面，符合社会价值观";

const CODE_PROMPT: &str = "你是一个专业的Python编程助手，擅长数据分析和可视化。用户的代码将被自动执行并生成图片。\n\
要求：\n\
1. 用中文回答\n\
2. 生成可执行的Python代码\n\
3. 如果用户要求画图，使用matplotlib等库生成图表\n\
4. 代码要完整、可运行\n\
5. 对代码进行必要的注释说明\n\
6. 如果涉及数据处理，使用pandas、numpy等库\n\
7. 生成的图表要美观、清晰，使用save_plot()函数保存图片\n\
8. 请确保代码安全，不执行危险操作\n\
9. 请确保回答内容积极正面，符合社会价值观\n\n\
重要提示：\n\
- 使用save_plot(filename)函数保存图片，不需要plt.show()\n\
- 系统会自动执行你的代码并显示生成的图片\n\
- 图片将自动保存并显示在聊天界面中";

/// Build the system prompt for one request
pub fn system_prompt(intent: Intent, inputs: &PromptInputs) -> String {
    let mut prompt = match intent {
        Intent::File => {
            let mut p = FILE_PROMPT.to_string();
            if let Some(ref content) = inputs.file_content {
                p.push_str("\n\n当前分析的文档内容：\n");
                p.push_str(truncate_chars(content, MAX_FILE_CONTENT_CHARS));
            }
            p
        },
        Intent::Web => {
            let mut p = WEB_PROMPT.to_string();
            if let Some(ref content) = inputs.web_content {
                if content.starts_with("错误：") {
                    p.push_str("\n\n网页访问状态：\n");
                    p.push_str(content);
                    p.push_str("\n\n请向用户解释这个问题，并提供有用的建议。");
                } else {
                    p.push_str("\n\n当前分析的网页内容：\n");
                    p.push_str(truncate_chars(content, MAX_WEB_CONTENT_CHARS));
                }
            }
            p
        },
        Intent::Search => {
            let mut p = SEARCH_PROMPT.to_string();
            if let Some(ref results) = inputs.search_results {
                p.push_str("\n\n搜索结果：\n");
                p.push_str(
                    &serde_json::to_string_pretty(results).unwrap_or_else(|_| "{}".to_string()),
                );
            }
            p
        },
        Intent::Code => CODE_PROMPT.to_string(),
        Intent::Normal => BASE_PROMPT.to_string(),
    };

    if !inputs.full_context.is_empty() {
        prompt.push_str("\n\n");
        prompt.push_str(&inputs.full_context);
    }

    prompt
}

/// Build the message list handed to the model
pub fn build_messages(system: &str, user_message: &str) -> Vec<Message> {
    vec![Message::system(system), Message::user(user_message)]
}

/// Truncate at a character boundary, returning a borrowed prefix
fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => &text[..byte_index],
        None => text,
    }
}
