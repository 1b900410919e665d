// ==========================================
// 多租户导入引擎 - 表格解析器
// ==========================================
// 阶段: 原始文本/字节 → 表头 + 数据行
// 支持: CSV 文本 / Excel (.xlsx) 首个工作表
// 约束: 行数上限在解析中即时检查（超限立即中止，不做部分消费）
// ==========================================

use crate::domain::job::Row;
use crate::importer::error::{ImportError, ImportResult};
use calamine::{open_workbook_from_rs, Reader, Xlsx};
use csv::ReaderBuilder;
use std::collections::HashSet;
use std::io::Cursor;

const UTF8_BOM: char = '\u{feff}';

// ==========================================
// ParsedTable - 解析结果
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTable {
    pub headers: Vec<String>,
    pub rows: Vec<Row>,
    /// 解析到的数据行数（不含表头）
    pub raw_row_count: usize,
}

// ==========================================
// 引号语法预检
// ==========================================
// csv crate 对引号错误较宽松（未闭合引号会吞掉剩余文本），
// 这里先按 RFC 4180 扫描一遍：
// - 引号字段必须闭合
// - 闭合引号后只能跟分隔符或行尾
// 未加引号字段中的孤立引号按字面值保留
#[derive(Clone, Copy, PartialEq, Eq)]
enum QuoteState {
    FieldStart,
    Unquoted,
    Quoted,
    QuoteInQuoted,
}

fn check_quoting(text: &str, delimiter: char) -> ImportResult<()> {
    let mut state = QuoteState::FieldStart;
    let mut line = 1usize;
    let mut quote_opened_at = 0usize;

    for ch in text.chars() {
        state = match (state, ch) {
            (QuoteState::FieldStart, '"') => {
                quote_opened_at = line;
                QuoteState::Quoted
            }
            (QuoteState::FieldStart | QuoteState::Unquoted, '\n') => {
                line += 1;
                QuoteState::FieldStart
            }
            (QuoteState::FieldStart | QuoteState::Unquoted, c) if c == delimiter || c == '\r' => {
                QuoteState::FieldStart
            }
            (QuoteState::FieldStart | QuoteState::Unquoted, _) => QuoteState::Unquoted,
            (QuoteState::Quoted, '"') => QuoteState::QuoteInQuoted,
            (QuoteState::Quoted, c) => {
                if c == '\n' {
                    line += 1;
                }
                QuoteState::Quoted
            }
            // 双引号转义
            (QuoteState::QuoteInQuoted, '"') => QuoteState::Quoted,
            (QuoteState::QuoteInQuoted, '\n') => {
                line += 1;
                QuoteState::FieldStart
            }
            (QuoteState::QuoteInQuoted, c) if c == delimiter || c == '\r' => QuoteState::FieldStart,
            (QuoteState::QuoteInQuoted, c) => {
                return Err(ImportError::parse(
                    line,
                    format!("闭合引号后出现非法字符 '{}'", c.escape_default()),
                ));
            }
        };
    }

    if state == QuoteState::Quoted {
        return Err(ImportError::parse(quote_opened_at, "引号字段未闭合"));
    }
    Ok(())
}

// ==========================================
// CSV 解析
// ==========================================

/// 解析逗号分隔文本
///
/// # 参数
/// - raw_text: 完整文本（可带 UTF-8 BOM）
/// - max_rows: 数据行上限（不含表头）
///
/// # 返回
/// - 表头原样保留，数据行按表头宽度补齐/截断
/// - 超过 max_rows 立即返回 RowLimitExceeded
pub fn parse(raw_text: &str, max_rows: usize) -> ImportResult<ParsedTable> {
    let text = raw_text.strip_prefix(UTF8_BOM).unwrap_or(raw_text);
    check_quoting(text, ',')?;

    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true) // 行长度不一致时按表头补齐
        .from_reader(text.as_bytes());

    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    if headers.is_empty() {
        return Err(ImportError::parse(1, "缺少表头"));
    }

    let width = headers.len();
    let mut rows: Vec<Row> = Vec::new();
    for result in reader.records() {
        let record = result?;
        if rows.len() >= max_rows {
            return Err(ImportError::RowLimitExceeded { max_rows });
        }

        let mut row: Row = record.iter().take(width).map(str::to_string).collect();
        row.resize(width, String::new());
        rows.push(row);
    }

    let raw_row_count = rows.len();
    tracing::debug!(columns = width, rows = raw_row_count, "CSV 解析完成");
    Ok(ParsedTable {
        headers,
        rows,
        raw_row_count,
    })
}

// ==========================================
// Excel 解析
// ==========================================

/// 读取 .xlsx 首个工作表；首行为表头，契约同 `parse`
pub fn parse_workbook(bytes: &[u8], max_rows: usize) -> ImportResult<ParsedTable> {
    let mut workbook: Xlsx<_> = open_workbook_from_rs(Cursor::new(bytes))?;

    let sheet_names = workbook.sheet_names();
    let sheet_name = sheet_names
        .first()
        .cloned()
        .ok_or_else(|| ImportError::ExcelParseError("Excel 文件无工作表".to_string()))?;

    let range = workbook.worksheet_range(&sheet_name)?;
    let mut sheet_rows = range.rows();

    let headers: Vec<String> = sheet_rows
        .next()
        .ok_or_else(|| ImportError::ExcelParseError("Excel 文件无表头行".to_string()))?
        .iter()
        .map(|cell| cell.to_string())
        .collect();

    let width = headers.len();
    let mut rows: Vec<Row> = Vec::new();
    for data_row in sheet_rows {
        if rows.len() >= max_rows {
            return Err(ImportError::RowLimitExceeded { max_rows });
        }
        let mut row: Row = data_row.iter().take(width).map(|c| c.to_string()).collect();
        row.resize(width, String::new());
        rows.push(row);
    }

    let raw_row_count = rows.len();
    tracing::debug!(sheet = %sheet_name, columns = width, rows = raw_row_count, "Excel 解析完成");
    Ok(ParsedTable {
        headers,
        rows,
        raw_row_count,
    })
}

// ==========================================
// 上传规范化
// ==========================================

/// 上传前的表格整理
///
/// - 表头去空白；空表头或重复表头视为解析错误
/// - 丢弃全空白行
pub fn sanitize_upload(table: ParsedTable) -> ImportResult<ParsedTable> {
    let headers: Vec<String> = table.headers.iter().map(|h| h.trim().to_string()).collect();

    let mut seen = HashSet::new();
    for (idx, header) in headers.iter().enumerate() {
        if header.is_empty() {
            return Err(ImportError::parse(1, format!("第 {} 列表头为空", idx + 1)));
        }
        if !seen.insert(header.to_lowercase()) {
            return Err(ImportError::parse(1, format!("表头重复: {}", header)));
        }
    }

    let before = table.rows.len();
    let rows: Vec<Row> = table
        .rows
        .into_iter()
        .filter(|row| row.iter().any(|v| !v.trim().is_empty()))
        .collect();

    if rows.len() < before {
        tracing::debug!(dropped = before - rows.len(), "已丢弃空白行");
    }

    Ok(ParsedTable {
        headers,
        raw_row_count: rows.len(),
        rows,
    })
}

// ==========================================
// CSV 生成
// ==========================================

/// 转义单个字段（含逗号/引号/换行时加引号，引号双写）
pub fn escape_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// 生成 CSV 文本；`parse(generate_csv(h, r)) == (h, r)`
///
/// 单列且为空的行写作 `""`，否则会被读取端当作空行跳过
pub fn generate_csv(headers: &[String], rows: &[Row]) -> String {
    let mut out = String::new();
    write_line(&mut out, headers);
    for row in rows {
        write_line(&mut out, row);
    }
    out
}

fn write_line(out: &mut String, fields: &[String]) {
    if let [only] = fields {
        if only.is_empty() {
            out.push_str("\"\"\n");
            return;
        }
    }
    let line: Vec<String> = fields.iter().map(|f| escape_field(f)).collect();
    out.push_str(&line.join(","));
    out.push('\n');
}
