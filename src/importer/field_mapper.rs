// ==========================================
// 多租户导入引擎 - 字段映射器
// ==========================================
// 职责: 表头归一化 / 映射建议 / 映射校验 / 原始行 → TypedRecord
// 红线: 建议阶段只做精确匹配，不做模糊猜测
// ==========================================

use crate::domain::job::{ColumnMapping, FieldTransform, Row};
use crate::domain::record::TypedRecord;
use crate::domain::types::EntityType;
use crate::importer::data_cleaner::DataCleaner;
use crate::importer::error::{ImportError, ImportResult};
use crate::importer::field_catalog::{fields_for, primary_field, FieldSpec};
use std::collections::{HashMap, HashSet};

/// 表头归一化: 小写 + 去除非字母数字字符
pub fn normalize_header(header: &str) -> String {
    header
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// 为每个表头生成一条映射建议
///
/// 仅当归一化后与字段名或别名完全相同时才给出 target_field；
/// 同一字段只分配给最先出现的表头
pub fn suggest_mappings(headers: &[String], fields: &[FieldSpec]) -> Vec<ColumnMapping> {
    let mut index: HashMap<String, &'static str> = HashMap::new();
    for spec in fields {
        for key in std::iter::once(spec.name).chain(spec.aliases.iter().copied()) {
            let normalized = normalize_header(key);
            match index.get(&normalized) {
                Some(owner) if *owner != spec.name => {
                    tracing::warn!(
                        alias = %key,
                        owner = %owner,
                        ignored_field = %spec.name,
                        "别名冲突，保留先注册的字段"
                    );
                }
                Some(_) => {}
                None => {
                    index.insert(normalized, spec.name);
                }
            }
        }
    }

    let mut claimed: HashSet<&str> = HashSet::new();
    headers
        .iter()
        .map(|header| match index.get(&normalize_header(header)) {
            Some(field) if claimed.insert(*field) => ColumnMapping::new(header.clone(), *field),
            Some(field) => {
                tracing::debug!(header = %header, field = %field, "字段已被前列占用，保持未映射");
                ColumnMapping::unmapped(header.clone())
            }
            None => ColumnMapping::unmapped(header.clone()),
        })
        .collect()
}

/// 映射中未覆盖的必填字段
pub fn unmapped_required(mapping: &[ColumnMapping], fields: &[FieldSpec]) -> Vec<String> {
    let mapped: HashSet<&str> = mapping
        .iter()
        .filter_map(|m| m.target_field.as_deref())
        .collect();
    fields
        .iter()
        .filter(|f| f.required && !mapped.contains(f.name))
        .map(|f| f.name.to_string())
        .collect()
}

// ==========================================
// PreparedMapping - 校验过的映射（按列下标）
// ==========================================
#[derive(Debug, Clone)]
struct MappedColumn {
    index: usize,
    spec: &'static FieldSpec,
    transform: Option<FieldTransform>,
}

/// 字段级类型转换失败
#[derive(Debug, Clone, PartialEq)]
pub struct CoercionIssue {
    pub field: String,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct PreparedMapping {
    entity_type: EntityType,
    columns: Vec<MappedColumn>,
    primary_index: Option<usize>,
}

impl PreparedMapping {
    /// 校验映射并解析为列下标
    ///
    /// 空映射、未知目标字段、未知源列、多对一 → ConfigError
    pub fn prepare(
        entity_type: EntityType,
        columns: &[String],
        mapping: &[ColumnMapping],
    ) -> ImportResult<Self> {
        if mapping.iter().all(|m| m.target_field.is_none()) {
            return Err(ImportError::config("映射为空，至少需要映射一列"));
        }

        let fields = fields_for(entity_type);
        let mut targets: HashSet<&str> = HashSet::new();
        let mut sources: HashSet<&str> = HashSet::new();
        let mut mapped = Vec::new();

        for entry in mapping {
            let Some(target) = entry.target_field.as_deref() else {
                continue;
            };
            let spec = fields.iter().find(|f| f.name == target).ok_or_else(|| {
                ImportError::config(format!("{} 没有字段 '{}'", entity_type, target))
            })?;
            let index = columns
                .iter()
                .position(|c| c == &entry.source_column)
                .ok_or_else(|| {
                    ImportError::config(format!("源列 '{}' 不存在", entry.source_column))
                })?;
            if !targets.insert(target) {
                return Err(ImportError::config(format!(
                    "字段 '{}' 被多个源列映射",
                    target
                )));
            }
            if !sources.insert(entry.source_column.as_str()) {
                return Err(ImportError::config(format!(
                    "源列 '{}' 重复出现在映射中",
                    entry.source_column
                )));
            }
            mapped.push(MappedColumn {
                index,
                spec,
                transform: entry.transform.clone(),
            });
        }

        let primary = primary_field(entity_type);
        let primary_index = mapped
            .iter()
            .find(|c| c.spec.name == primary)
            .map(|c| c.index);

        Ok(Self {
            entity_type,
            columns: mapped,
            primary_index,
        })
    }

    pub fn entity_type(&self) -> EntityType {
        self.entity_type
    }

    /// 原始行的主键展示值（映射/转换失败时用于错误报告）
    pub fn raw_primary_key(&self, row: &Row) -> String {
        self.primary_index
            .and_then(|i| row.get(i))
            .map(|v| v.trim().to_string())
            .unwrap_or_default()
    }

    /// 应用映射 + 清洗 + 类型转换
    pub fn apply(&self, cleaner: &DataCleaner, row: &Row) -> Result<TypedRecord, Vec<CoercionIssue>> {
        let mut record = TypedRecord::new();
        let mut issues = Vec::new();

        for column in &self.columns {
            let raw = row.get(column.index).map(String::as_str).unwrap_or("");
            let Some(mut value) = cleaner.normalize_null(raw) else {
                continue;
            };

            let mut date_format = None;
            if let Some(transform) = &column.transform {
                if let FieldTransform::DateFormat(format) = transform {
                    date_format = Some(format.as_str());
                }
                value = cleaner.apply_transform(&value, transform);
                if value.is_empty() {
                    continue;
                }
            }

            match cleaner.coerce(&value, column.spec.value_type, date_format) {
                Ok(typed) => record.insert(column.spec.name, typed),
                Err(message) => issues.push(CoercionIssue {
                    field: column.spec.name.to_string(),
                    message,
                }),
            }
        }

        if issues.is_empty() {
            Ok(record)
        } else {
            Err(issues)
        }
    }
}
