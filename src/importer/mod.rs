// ==========================================
// 多租户导入引擎 - 导入层
// ==========================================
// 职责: 表格解析 → 字段映射 → 试运行 → 执行落库
// 支持: CSV 文本, XLSX 工作簿
// ==========================================

// 模块声明
pub mod conflict_handler;
pub mod data_cleaner;
pub mod dq_validator;
pub mod error;
pub mod execution_engine;
pub mod execution_lock;
pub mod field_catalog;
pub mod field_mapper;
pub mod file_parser;
pub mod importer_trait;
pub mod reference_resolver;
pub mod row_classifier;
pub mod tabular_importer;
pub mod validation_engine;

// 重导出核心类型
pub use error::{ImportError, ImportResult};
pub use execution_engine::ExecutionEngine;
pub use execution_lock::{lock_set, ExecutionGuard, ExecutionLocks};
pub use field_catalog::{fields_for, FieldSpec};
pub use field_mapper::{normalize_header, suggest_mappings, PreparedMapping};
pub use file_parser::{escape_field, generate_csv, parse, parse_workbook, ParsedTable};
pub use tabular_importer::{TabularImporter, TabularJobImport};
pub use validation_engine::{ValidationEngine, ValidationOutput};

// 重导出 Trait 接口
pub use importer_trait::{BatchImport, Importer, NoopPhaseListener, PhaseListener};
