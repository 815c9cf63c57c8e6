//! Deterministic Stage C checks.
//!
//! [`parse_summary`] enforces the JSON shape; [`validate`] enforces the
//! content bounds. Violations are short codes (`too_long:intro`,
//! `bullets:count`, `simplified:method`, ...) that are logged, fed back to
//! Stage B in the correction instruction, and surfaced in
//! `ValidationFailed`.

use paperbrief_shared::SummaryPayload;
use serde_json::Value;

/// Maximum characters (Unicode scalar values) per section.
pub const MAX_SECTION_CHARS: usize = 900;
pub const MIN_BULLETS: usize = 3;
pub const MAX_BULLETS: usize = 5;

/// Characters that only occur in Simplified Chinese. Their presence means the
/// text is not Traditional Chinese.
const SIMPLIFIED_ONLY: &str = "这们为个来时会对发过进还么样学实现经问题数据与处务产结构练习语论种应该从动关将让专业\
东车长门开间见观点图网络训计机译识检测评显认变设现总统无传说话请读写买卖书电脑师类层级选择优质资调环区国际术\
输确验证简单归头线组织码编续维约给针错误较达运远边亿复杂纳";

fn is_han(c: char) -> bool {
    matches!(c, '\u{4e00}'..='\u{9fff}' | '\u{3400}'..='\u{4dbf}' | '\u{f900}'..='\u{faff}')
}

/// The text contains at least one Han character and no Simplified-only ones.
pub fn is_traditional_chinese(text: &str) -> bool {
    text.chars().any(is_han) && !text.chars().any(|c| SIMPLIFIED_ONLY.contains(c))
}

/// Pull the JSON object out of a completion that may be wrapped in code
/// fences or prose.
fn extract_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Parse a Stage B completion into a payload. Returns the schema violations
/// when the shape is wrong.
pub fn parse_summary(text: &str) -> Result<SummaryPayload, Vec<String>> {
    match parse_json_object(text) {
        Some(value) => payload_from_value(&value),
        None => Err(vec!["schema:not_json".into()]),
    }
}

/// The JSON object embedded in a completion, if there is one.
pub fn parse_json_object(text: &str) -> Option<Value> {
    let value: Value = serde_json::from_str(extract_object(text)?).ok()?;
    value.is_object().then_some(value)
}

/// Build a payload from an already-parsed JSON value.
pub fn payload_from_value(value: &Value) -> Result<SummaryPayload, Vec<String>> {
    let Some(obj) = value.as_object() else {
        return Err(vec!["schema:not_object".into()]);
    };

    let mut violations = Vec::new();
    let mut section = |name: &str| match obj.get(name).and_then(Value::as_str) {
        Some(s) => s.trim().to_string(),
        None => {
            violations.push(format!("missing:{name}"));
            String::new()
        }
    };
    let intro = section("intro");
    let background = section("background");
    let method = section("method");
    let conclusion = section("conclusion");

    let bullet_points = match obj.get("bullet_points").and_then(Value::as_array) {
        Some(items) => {
            let bullets: Option<Vec<String>> = items
                .iter()
                .map(|b| b.as_str().map(|s| s.trim().to_string()))
                .collect();
            bullets.unwrap_or_else(|| {
                violations.push("schema:bullet_points".into());
                Vec::new()
            })
        }
        None => {
            violations.push("missing:bullet_points".into());
            Vec::new()
        }
    };

    let limitations = obj
        .get("limitations")
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    if !violations.is_empty() {
        return Err(violations);
    }

    Ok(SummaryPayload {
        intro,
        background,
        method,
        conclusion,
        bullet_points,
        limitations,
        heuristic: false,
    })
}

/// Content checks. An empty result means the payload is valid.
pub fn validate(payload: &SummaryPayload) -> Vec<String> {
    let mut violations = Vec::new();

    let mut check = |name: &str, text: &str| {
        if text.trim().is_empty() {
            violations.push(format!("empty:{name}"));
            return;
        }
        if text.chars().count() > MAX_SECTION_CHARS {
            violations.push(format!("too_long:{name}"));
        }
        if !text.chars().any(is_han) {
            violations.push(format!("language:{name}"));
        } else if !is_traditional_chinese(text) {
            violations.push(format!("simplified:{name}"));
        }
    };

    for (name, text) in payload.sections() {
        check(name, text);
    }
    if let Some(limitations) = &payload.limitations {
        check("limitations", limitations);
    }
    for (i, bullet) in payload.bullet_points.iter().enumerate() {
        check(&format!("bullet_points[{i}]"), bullet);
    }

    let n = payload.bullet_points.len();
    if !(MIN_BULLETS..=MAX_BULLETS).contains(&n) {
        violations.push(format!("bullets:count={n}"));
    }

    violations
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn valid_payload() -> SummaryPayload {
        SummaryPayload {
            intro: "本文提出稀疏專家混合模型，用於長文本檢索。作者證明其效率優於密集模型。".into(),
            background: "長文本檢索需要大量運算資源。既有方法在推論成本上難以擴展。".into(),
            method: "作者設計路由器，每個詞元只啟用兩位專家。此設計降低了推論成本。".into(),
            conclusion: "實驗顯示此方法在五個基準上與密集模型表現相當。推論成本約減半。".into(),
            bullet_points: vec![
                "提出稀疏專家路由".into(),
                "推論成本減半".into(),
                "五個基準表現相當".into(),
            ],
            limitations: Some("僅在英文資料上評估。".into()),
            heuristic: false,
        }
    }

    #[test]
    fn valid_payload_passes() {
        assert!(validate(&valid_payload()).is_empty());
    }

    #[test]
    fn section_of_900_chars_passes_and_901_fails() {
        let mut payload = valid_payload();
        payload.intro = "研".repeat(900);
        assert!(validate(&payload).is_empty());

        payload.intro = "研".repeat(901);
        assert_eq!(validate(&payload), vec!["too_long:intro"]);
    }

    #[test]
    fn bullet_count_bounds() {
        let mut payload = valid_payload();
        payload.bullet_points.truncate(2);
        assert_eq!(validate(&payload), vec!["bullets:count=2"]);

        let mut payload = valid_payload();
        payload.bullet_points = (0..6).map(|i| format!("重點{i}")).collect();
        assert_eq!(validate(&payload), vec!["bullets:count=6"]);

        let mut payload = valid_payload();
        payload.bullet_points = (0..5).map(|i| format!("重點{i}")).collect();
        assert!(validate(&payload).is_empty());
    }

    #[test]
    fn simplified_and_non_chinese_text_fail() {
        let mut payload = valid_payload();
        payload.method = "作者设计了一个路由器。".into();
        assert_eq!(validate(&payload), vec!["simplified:method"]);

        let mut payload = valid_payload();
        payload.background = "Long-context retrieval is expensive.".into();
        assert_eq!(validate(&payload), vec!["language:background"]);

        let mut payload = valid_payload();
        payload.bullet_points[1] = "这是重点".into();
        assert_eq!(validate(&payload), vec!["simplified:bullet_points[1]"]);
    }

    #[test]
    fn english_terms_are_allowed() {
        assert!(is_traditional_chinese("本文使用 Transformer 與 LoRA 微調。"));
        assert!(!is_traditional_chinese("LoRA only"));
    }

    #[test]
    fn parse_accepts_fenced_json() {
        let text = "```json\n{\"intro\":\"簡介\",\"background\":\"背景\",\"method\":\"方法\",\
                    \"conclusion\":\"結論\",\"bullet_points\":[\"一\",\"二\",\"三\"]}\n```";
        let payload = parse_summary(text).expect("parse");
        assert_eq!(payload.intro, "簡介");
        assert_eq!(payload.limitations, None);
        assert!(!payload.heuristic);
    }

    #[test]
    fn parse_reports_schema_problems() {
        assert_eq!(parse_summary("not json at all"), Err(vec!["schema:not_json".into()]));
        assert_eq!(parse_summary("{\"intro\": }"), Err(vec!["schema:not_json".into()]));

        let errs = parse_summary("{\"intro\":\"簡介\",\"bullet_points\":[1,2,3]}").expect_err("schema");
        assert!(errs.contains(&"missing:method".to_string()));
        assert!(errs.contains(&"schema:bullet_points".to_string()));
    }
}
