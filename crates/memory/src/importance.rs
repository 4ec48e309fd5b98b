//! Importance scoring
//!
//! Deterministic [0,1] score deciding whether a turn is worth long-term
//! storage. The score is a sum of bounded components: length, intent,
//! keywords, personal claims, emotion, and conversation context. The clock
//! enters only through `ScoreContext`, so the function stays pure.

use chrono::Timelike;

/// High-importance keywords: +0.03 each, capped at 0.15
const HIGH_KEYWORDS: &[&str] = &["重要", "关键", "必须", "紧急", "优先", "核心", "主要", "决定", "选择"];

/// Medium-importance keywords: +0.01 each, capped at 0.05
const MEDIUM_KEYWORDS: &[&str] = &["需要", "想要", "希望", "计划", "打算", "考虑", "建议", "推荐"];

/// Low-importance keywords: −0.005 each, capped at −0.02
const LOW_KEYWORDS: &[&str] = &["可能", "也许", "大概", "或者", "随便", "无所谓"];

/// Personal claim prefixes counted in the user message
const PERSONAL_KEYWORDS: &[&str] = &[
    "我的", "我是", "我在", "我会", "我想", "我需要", "我喜欢", "我不喜欢", "我讨厌", "我爱",
    "我恨", "我叫", "我的名字", "我今年", "我住在", "我的职业", "我的工作", "我的爱好",
    "我的兴趣", "我的家人",
];

const STRONG_EMOTION: &[&str] =
    &["非常喜欢", "超级爱", "特别", "极其", "绝对", "完全", "非常讨厌", "超级恨"];

const MODERATE_EMOTION: &[&str] =
    &["喜欢", "爱", "好", "不错", "可以", "讨厌", "不喜欢", "不好", "不行", "不能"];

/// Conversation-level inputs to the context component
#[derive(Debug, Clone)]
pub struct ScoreContext {
    pub turn_count: usize,
    /// Supplied activity signal in [0,1]; 0 when untracked
    pub user_activity_score: f32,
    /// Local hour of day, 0..=23
    pub hour: u32,
}

impl ScoreContext {
    /// Context for a fresh single-turn write, stamped with the current hour
    pub fn single_turn() -> Self {
        Self {
            turn_count: 1,
            user_activity_score: 0.0,
            hour: chrono::Local::now().hour(),
        }
    }

    pub fn with_turn_count(mut self, turn_count: usize) -> Self {
        self.turn_count = turn_count;
        self
    }
}

/// Deterministic importance scorer
#[derive(Debug, Clone, Default)]
pub struct ImportanceScorer;

impl ImportanceScorer {
    pub fn new() -> Self {
        Self
    }

    /// Composite importance of one `(message, response)` pair
    pub fn score(&self, message: &str, response: &str, intent: &str, ctx: &ScoreContext) -> f32 {
        let total = self.length_score(message, response)
            + self.intent_score(intent)
            + self.keyword_score(message, response)
            + self.personal_score(message)
            + self.emotion_score(message, response)
            + self.context_score(ctx);

        total.clamp(0.0, 1.0)
    }

    /// Length component, max 0.25
    fn length_score(&self, message: &str, response: &str) -> f32 {
        let total = message.chars().count() + response.chars().count();
        match total {
            n if n > 1000 => 0.25,
            n if n > 500 => 0.20,
            n if n > 200 => 0.15,
            n if n > 100 => 0.10,
            _ => 0.05,
        }
    }

    /// Intent component, max 0.40
    fn intent_score(&self, intent: &str) -> f32 {
        match intent {
            "search" | "web" | "file" => 0.40,
            "code" | "image" => 0.30,
            "greeting" | "goodbye" => 0.05,
            _ => 0.10,
        }
    }

    /// Keyword component, max 0.20, floored at 0
    fn keyword_score(&self, message: &str, response: &str) -> f32 {
        let text = format!("{message} {response}");
        let mut score = 0.0f32;

        let high = HIGH_KEYWORDS.iter().filter(|k| text.contains(*k)).count();
        if high > 0 {
            score += (high as f32 * 0.03).min(0.15);
        }

        let medium = MEDIUM_KEYWORDS.iter().filter(|k| text.contains(*k)).count();
        if medium > 0 {
            score += (medium as f32 * 0.01).min(0.05);
        }

        let low = LOW_KEYWORDS.iter().filter(|k| text.contains(*k)).count();
        if low > 0 {
            score -= (low as f32 * 0.005).min(0.02);
        }

        score.max(0.0)
    }

    /// Personal-claim component over the user message, max 0.10
    fn personal_score(&self, message: &str) -> f32 {
        let count = PERSONAL_KEYWORDS.iter().filter(|k| message.contains(*k)).count();
        match count {
            n if n >= 3 => 0.10,
            2 => 0.07,
            1 => 0.05,
            _ => 0.0,
        }
    }

    /// Emotion component, max 0.05
    fn emotion_score(&self, message: &str, response: &str) -> f32 {
        let text = format!("{message} {response}");
        let mut score = 0.0f32;

        if STRONG_EMOTION.iter().any(|k| text.contains(*k)) {
            score += 0.03;
        }
        if MODERATE_EMOTION.iter().any(|k| text.contains(*k)) {
            score += 0.02;
        }

        score.min(0.05)
    }

    /// Context component, max 0.10
    fn context_score(&self, ctx: &ScoreContext) -> f32 {
        let mut score = 0.0f32;

        score += match ctx.turn_count {
            n if n > 10 => 0.03,
            n if n > 5 => 0.02,
            n if n > 2 => 0.01,
            _ => 0.0,
        };

        if (9..=18).contains(&ctx.hour) {
            score += 0.02;
        }

        score += match ctx.user_activity_score {
            a if a > 0.8 => 0.03,
            a if a > 0.5 => 0.02,
            a if a > 0.2 => 0.01,
            _ => 0.0,
        };

        score.min(0.10)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> ScoreContext {
        // Outside working hours so the clock component is inert
        ScoreContext { turn_count: 1, user_activity_score: 0.0, hour: 3 }
    }

    #[test]
    fn test_score_is_bounded() {
        let scorer = ImportanceScorer::new();
        let long = "重要关键必须紧急优先核心主要决定选择我的我是我在非常喜欢".repeat(50);
        let inputs = [
            ("", "", "normal"),
            ("你好", "你好！", "greeting"),
            (long.as_str(), long.as_str(), "search"),
            ("随便可能也许", "或者无所谓", "normal"),
        ];

        let max_ctx = ScoreContext { turn_count: 50, user_activity_score: 1.0, hour: 10 };
        for (message, response, intent) in inputs {
            let low = scorer.score(message, response, intent, &ctx());
            let high = scorer.score(message, response, intent, &max_ctx);
            assert!((0.0..=1.0).contains(&low), "score {low} out of range");
            assert!((0.0..=1.0).contains(&high), "score {high} out of range");
        }
    }

    #[test]
    fn test_length_component_is_monotone() {
        let scorer = ImportanceScorer::new();
        // Same intent/keywords/personal/emotion profile, growing length
        let steps = [50, 150, 300, 600, 1200];
        let mut previous = 0.0;
        for chars in steps {
            let message = "呃".repeat(chars);
            let score = scorer.score(&message, "", "normal", &ctx());
            assert!(score >= previous, "length growth reduced score: {previous} -> {score}");
            previous = score;
        }
    }

    #[test]
    fn test_intent_weights() {
        let scorer = ImportanceScorer::new();
        let base = ctx();
        let search = scorer.score("x", "y", "search", &base);
        let code = scorer.score("x", "y", "code", &base);
        let normal = scorer.score("x", "y", "normal", &base);
        let greeting = scorer.score("x", "y", "greeting", &base);

        assert!(search > code);
        assert!(code > normal);
        assert!(normal > greeting);
        assert!((search - greeting - 0.35).abs() < 1e-6);
    }

    #[test]
    fn test_greeting_stays_below_storage_threshold() {
        let scorer = ImportanceScorer::new();
        let score = scorer.score("你好", "你好！有什么可以帮你的吗？", "normal", &ctx());
        assert!(score < 0.6, "greeting scored {score}, would be stored");
    }

    #[test]
    fn test_keyword_caps() {
        let scorer = ImportanceScorer::new();
        // All nine high keywords present, cap at 0.15 not 0.27
        let message = HIGH_KEYWORDS.concat();
        let with_keywords = scorer.score(&message, "", "normal", &ctx());
        let without = scorer.score(&"呃".repeat(message.chars().count()), "", "normal", &ctx());
        assert!((with_keywords - without - 0.15).abs() < 1e-6);
    }

    #[test]
    fn test_low_keywords_never_push_negative() {
        let scorer = ImportanceScorer::new();
        let score = scorer.score("随便", "无所谓，可能吧", "greeting", &ctx());
        assert!(score >= 0.0);
    }

    #[test]
    fn test_personal_claims_graded() {
        let scorer = ImportanceScorer::new();
        let one = scorer.score("我叫张三", "", "normal", &ctx());
        let three = scorer.score("我叫张三，我住在北京，我的职业是工程师", "", "normal", &ctx());
        let none = scorer.score("今天天气怎么样", "", "normal", &ctx());

        assert!(one > none);
        assert!(three > one);
    }

    #[test]
    fn test_working_hours_bonus() {
        let scorer = ImportanceScorer::new();
        let night = scorer.score("x", "y", "normal", &ctx());
        let day = scorer.score(
            "x",
            "y",
            "normal",
            &ScoreContext { hour: 10, ..ctx() },
        );
        assert!((day - night - 0.02).abs() < 1e-6);
    }

    #[test]
    fn test_context_component_capped() {
        let scorer = ImportanceScorer::new();
        let maxed = ScoreContext { turn_count: 100, user_activity_score: 0.95, hour: 12 };
        let base = scorer.score("x", "y", "normal", &ctx());
        let boosted = scorer.score("x", "y", "normal", &maxed);
        // 0.03 + 0.02 + 0.03 = 0.08, under the 0.10 cap
        assert!((boosted - base - 0.08).abs() < 1e-6);
    }

    #[test]
    fn test_deterministic() {
        let scorer = ImportanceScorer::new();
        let context = ctx();
        let a = scorer.score("我喜欢咖啡，重要的偏好", "记住了", "normal", &context);
        let b = scorer.score("我喜欢咖啡，重要的偏好", "记住了", "normal", &context);
        assert_eq!(a, b);
    }
}
