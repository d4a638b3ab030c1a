//! 通知渲染 - 模板变量替换与多语言正文
//!
//! 模板占位符语法 `${path.to.field ?? other.path ?? 'literal'}`：
//! 按点路径在事件上下文里寻值，`??` 依次回退，单引号包裹的备选是
//! 字面量，全部落空时替换为空串。正文模板按 locale 选择。

use std::collections::HashMap;

use serde_json::Value;

use crate::config::TemplatesConfig;

/// 渲染结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Composed {
    pub title: String,
    pub body: String,
}

/// 通知渲染器
pub struct Composer {
    title_template: String,
    body_by_locale: HashMap<String, String>,
}

impl Composer {
    pub fn new(templates: &TemplatesConfig) -> Self {
        Self {
            title_template: templates.title.clone(),
            body_by_locale: templates.body_by_locale.clone(),
        }
    }

    /// 渲染标题与正文；未知 locale 回退到 en，再退到任意模板
    pub fn compose(&self, ctx: &Value, locale: &str) -> Composed {
        let body_template = self
            .body_by_locale
            .get(locale)
            .or_else(|| self.body_by_locale.get("en"))
            .or_else(|| self.body_by_locale.values().next())
            .map(String::as_str)
            .unwrap_or("${message ?? notes ?? ''}");

        Composed {
            title: render(&self.title_template, ctx),
            body: render(body_template, ctx),
        }
    }
}

/// 渲染一个模板串
pub fn render(template: &str, ctx: &Value) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                out.push_str(&resolve_placeholder(&after[..end], ctx));
                rest = &after[end + 1..];
            }
            None => {
                // 未闭合的占位符按字面输出
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// 解析 `a.b ?? c ?? 'fallback'` 形式的占位符内容
fn resolve_placeholder(expr: &str, ctx: &Value) -> String {
    for alternative in expr.split("??") {
        let alternative = alternative.trim();
        if alternative.is_empty() {
            continue;
        }
        // 单引号字面量
        if alternative.len() >= 2 && alternative.starts_with('\'') && alternative.ends_with('\'') {
            return alternative[1..alternative.len() - 1].to_string();
        }
        if let Some(text) = resolve_path(ctx, alternative) {
            return text;
        }
    }
    String::new()
}

/// 沿点路径取值并转为展示文本；Null 与缺失视为未命中
fn resolve_path(ctx: &Value, path: &str) -> Option<String> {
    let mut current = ctx;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    match current {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        // 对象 / 数组给紧凑 JSON，便于 webhook 调试
        other => serde_json::to_string(other).ok(),
    }
}

/// 把指标表压成一行 `k=v, k=v` 摘要（如 `risk=2.1%, slip=4bps`）
pub fn summarize_metrics(metrics: &Value) -> Option<String> {
    let map = metrics.as_object()?;
    if map.is_empty() {
        return None;
    }
    let parts: Vec<String> = map
        .iter()
        .map(|(k, v)| match v {
            Value::String(s) => format!("{}={}", k, s),
            Value::Number(n) => format!("{}={}", k, n),
            other => format!("{}={}", k, other),
        })
        .collect();
    Some(parts.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn templates() -> TemplatesConfig {
        TemplatesConfig {
            title: "[${severity}] ${type ?? slo ?? kind}".to_string(),
            body_by_locale: HashMap::from([
                (
                    "en".to_string(),
                    "${message ?? notes ?? 'incident update'} | ${metrics_summary ?? status ?? ''}".to_string(),
                ),
                (
                    "zh".to_string(),
                    "${message ?? notes ?? '事件更新'} | ${metrics_summary ?? status ?? ''}".to_string(),
                ),
            ]),
        }
    }

    #[test]
    fn test_render_simple_path() {
        let ctx = json!({"severity": "high", "type": "drawdown"});
        assert_eq!(render("[${severity}] ${type}", &ctx), "[high] drawdown");
    }

    #[test]
    fn test_render_nested_path() {
        let ctx = json!({"scope": {"symbol": "BTC-USDT"}});
        assert_eq!(render("sym=${scope.symbol}", &ctx), "sym=BTC-USDT");
    }

    #[test]
    fn test_fallback_chain() {
        let ctx = json!({"notes": "manual check"});
        assert_eq!(render("${message ?? notes ?? 'n/a'}", &ctx), "manual check");
    }

    #[test]
    fn test_literal_fallback() {
        let ctx = json!({});
        assert_eq!(render("${message ?? 'n/a'}", &ctx), "n/a");
    }

    #[test]
    fn test_missing_everything_renders_empty() {
        let ctx = json!({});
        assert_eq!(render("x${a.b ?? c}y", &ctx), "xy");
    }

    #[test]
    fn test_null_falls_through() {
        let ctx = json!({"message": null, "notes": "fallback hit"});
        assert_eq!(render("${message ?? notes}", &ctx), "fallback hit");
    }

    #[test]
    fn test_number_rendering() {
        let ctx = json!({"error_budget_used_pct": 104.2});
        assert_eq!(render("${error_budget_used_pct}%", &ctx), "104.2%");
    }

    #[test]
    fn test_unclosed_placeholder_is_literal() {
        let ctx = json!({});
        assert_eq!(render("oops ${broken", &ctx), "oops ${broken");
    }

    #[test]
    fn test_compose_locale_selection() {
        let composer = Composer::new(&templates());
        let ctx = json!({"severity": "critical", "type": "drawdown"});

        let en = composer.compose(&ctx, "en");
        assert_eq!(en.title, "[critical] drawdown");
        assert!(en.body.starts_with("incident update"));

        let zh = composer.compose(&ctx, "zh");
        assert!(zh.body.starts_with("事件更新"));

        // 未知 locale 回退 en
        let fr = composer.compose(&ctx, "fr");
        assert_eq!(fr.body, en.body);
    }

    #[test]
    fn test_summarize_metrics() {
        let metrics = json!({"risk": "2.1%", "slip": "4bps"});
        let summary = summarize_metrics(&metrics).unwrap();
        // serde_json 默认按键序输出
        assert!(summary.contains("risk=2.1%"));
        assert!(summary.contains("slip=4bps"));
        assert!(summary.contains(", "));
    }

    #[test]
    fn test_summarize_metrics_empty() {
        assert_eq!(summarize_metrics(&json!({})), None);
        assert_eq!(summarize_metrics(&json!(null)), None);
    }
}
