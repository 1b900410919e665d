// ==========================================
// 多租户导入引擎 - 数据清洗器
// ==========================================
// 职责: TRIM / NULL 标准化 / 映射级变换 / 按字段类型转换
// 说明: 转换失败返回错误消息，由调用方记为 TYPE_COERCION
// ==========================================

use crate::domain::job::FieldTransform;
use crate::domain::record::FieldValue;
use crate::domain::types::ValueType;
use chrono::{DateTime, NaiveDate, NaiveDateTime};

/// 视为空值的占位写法（忽略大小写）
const NULL_TOKENS: [&str; 5] = ["null", "nil", "n/a", "#n/a", "none"];

/// 未指定 date_format 时依次尝试的日期格式
const DATE_FORMATS: [&str; 7] = [
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%Y%m%d",
    "%m/%d/%Y",
    "%d.%m.%Y",
    "%b %d, %Y",
    "%d %b %Y",
];

pub struct DataCleaner;

impl DataCleaner {
    /// TRIM + NULL 标准化
    pub fn normalize_null(&self, value: &str) -> Option<String> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return None;
        }
        let lower = trimmed.to_lowercase();
        if NULL_TOKENS.contains(&lower.as_str()) {
            None
        } else {
            Some(trimmed.to_string())
        }
    }

    /// 应用映射级文本变换（DateFormat 在类型转换阶段生效）
    pub fn apply_transform(&self, value: &str, transform: &FieldTransform) -> String {
        match transform {
            FieldTransform::Trim => value.trim().to_string(),
            FieldTransform::Lowercase => value.to_lowercase(),
            FieldTransform::Uppercase => value.to_uppercase(),
            FieldTransform::TitleCase => title_case(value),
            FieldTransform::DigitsOnly => value.chars().filter(|c| c.is_ascii_digit()).collect(),
            FieldTransform::DateFormat(_) => value.to_string(),
        }
    }

    /// 按字段类型转换
    pub fn coerce(
        &self,
        value: &str,
        value_type: ValueType,
        date_format: Option<&str>,
    ) -> Result<FieldValue, String> {
        match value_type {
            ValueType::String => Ok(FieldValue::Text(value.to_string())),
            ValueType::Email => self.parse_email(value).map(FieldValue::Text),
            ValueType::Number => self.parse_number(value).map(FieldValue::Number),
            ValueType::Date => self.parse_date(value, date_format).map(FieldValue::Date),
            ValueType::Bool => self.parse_bool(value).map(FieldValue::Bool),
        }
    }

    /// 数值: 允许千分位逗号、货币符号和空格
    pub fn parse_number(&self, value: &str) -> Result<f64, String> {
        let cleaned: String = value
            .chars()
            .filter(|c| !matches!(c, ',' | '$' | '€' | '£' | '¥' | ' '))
            .collect();
        match cleaned.parse::<f64>() {
            Ok(n) if n.is_finite() => Ok(n),
            _ => Err(format!("无法解析为数值: {}", value)),
        }
    }

    pub fn parse_date(&self, value: &str, date_format: Option<&str>) -> Result<NaiveDate, String> {
        if let Some(format) = date_format {
            return NaiveDate::parse_from_str(value, format)
                .map_err(|_| format!("日期 '{}' 不符合格式 {}", value, format));
        }

        for format in DATE_FORMATS {
            if let Ok(date) = NaiveDate::parse_from_str(value, format) {
                return Ok(date);
            }
        }
        // 带时间部分的取日期
        if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
            return Ok(dt.date_naive());
        }
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S") {
            return Ok(dt.date());
        }
        Err(format!("无法解析为日期: {}", value))
    }

    pub fn parse_bool(&self, value: &str) -> Result<bool, String> {
        match value.trim().to_lowercase().as_str() {
            "true" | "yes" | "y" | "1" | "是" => Ok(true),
            "false" | "no" | "n" | "0" | "否" => Ok(false),
            _ => Err(format!("无法解析为布尔值: {}", value)),
        }
    }

    /// 邮箱语法校验（不做投递性检查）
    pub fn parse_email(&self, value: &str) -> Result<String, String> {
        let invalid = || format!("邮箱格式无效: {}", value);
        if value.chars().any(char::is_whitespace) {
            return Err(invalid());
        }
        let (local, domain) = value.split_once('@').ok_or_else(invalid)?;
        if local.is_empty() || domain.contains('@') {
            return Err(invalid());
        }
        let labels_ok = domain.split('.').count() >= 2 && domain.split('.').all(|l| !l.is_empty());
        if !labels_ok {
            return Err(invalid());
        }
        Ok(value.to_string())
    }
}

fn title_case(value: &str) -> String {
    value
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_null() {
        let cleaner = DataCleaner;
        assert_eq!(cleaner.normalize_null("   "), None);
        assert_eq!(cleaner.normalize_null("N/A"), None);
        assert_eq!(cleaner.normalize_null("NULL"), None);
        assert_eq!(cleaner.normalize_null("  value  "), Some("value".to_string()));
    }

    #[test]
    fn test_transforms() {
        let cleaner = DataCleaner;
        assert_eq!(cleaner.apply_transform("acme CORP", &FieldTransform::TitleCase), "Acme Corp");
        assert_eq!(cleaner.apply_transform("+1 (555) 010-99", &FieldTransform::DigitsOnly), "155501099");
        assert_eq!(cleaner.apply_transform("Ann@Corp.IO", &FieldTransform::Lowercase), "ann@corp.io");
        assert_eq!(cleaner.apply_transform("abc", &FieldTransform::Uppercase), "ABC");
    }

    #[test]
    fn test_parse_number() {
        let cleaner = DataCleaner;
        assert_eq!(cleaner.parse_number("1,250.50"), Ok(1250.5));
        assert_eq!(cleaner.parse_number("$ 12"), Ok(12.0));
        assert_eq!(cleaner.parse_number("-3"), Ok(-3.0));
        assert!(cleaner.parse_number("abc").is_err());
        assert!(cleaner.parse_number("NaN").is_err());
    }

    #[test]
    fn test_parse_date_defaults_and_custom_format() {
        let cleaner = DataCleaner;
        let expected = NaiveDate::from_ymd_opt(2025, 3, 14).unwrap();
        assert_eq!(cleaner.parse_date("2025-03-14", None), Ok(expected));
        assert_eq!(cleaner.parse_date("20250314", None), Ok(expected));
        assert_eq!(cleaner.parse_date("03/14/2025", None), Ok(expected));
        assert_eq!(cleaner.parse_date("2025-03-14T09:30:00Z", None), Ok(expected));
        assert_eq!(cleaner.parse_date("14/03/2025", Some("%d/%m/%Y")), Ok(expected));
        assert!(cleaner.parse_date("2025-03-14", Some("%d/%m/%Y")).is_err());
        assert!(cleaner.parse_date("yesterday", None).is_err());
    }

    #[test]
    fn test_parse_bool() {
        let cleaner = DataCleaner;
        assert_eq!(cleaner.parse_bool("Yes"), Ok(true));
        assert_eq!(cleaner.parse_bool("0"), Ok(false));
        assert_eq!(cleaner.parse_bool("否"), Ok(false));
        assert!(cleaner.parse_bool("maybe").is_err());
    }

    #[test]
    fn test_parse_email() {
        let cleaner = DataCleaner;
        assert!(cleaner.parse_email("ann@corp.io").is_ok());
        assert!(cleaner.parse_email("ann.lee+ops@mail.corp.io").is_ok());
        assert!(cleaner.parse_email("ann@corp").is_err());
        assert!(cleaner.parse_email("@corp.io").is_err());
        assert!(cleaner.parse_email("ann lee@corp.io").is_err());
        assert!(cleaner.parse_email("ann@@corp.io").is_err());
        assert!(cleaner.parse_email("ann@corp..io").is_err());
    }

    #[test]
    fn test_coerce_dispatches_by_type() {
        let cleaner = DataCleaner;
        assert_eq!(
            cleaner.coerce("2.5", ValueType::Number, None),
            Ok(FieldValue::Number(2.5))
        );
        assert_eq!(
            cleaner.coerce("hello", ValueType::String, None),
            Ok(FieldValue::Text("hello".to_string()))
        );
        assert!(cleaner.coerce("x", ValueType::Bool, None).is_err());
    }
}
