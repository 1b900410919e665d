// ==========================================
// 多租户导入引擎 - 连接器层
// ==========================================
// 职责: 外部项目管理系统 → 本地实体库
// 组成: RemoteClient（外部读取）/ ClientResolver（客户关联）/ ConnectorPipeline（编排）
// ==========================================

pub mod client;
pub mod client_resolver;
pub mod error;
pub mod pipeline;
pub mod tally;
pub mod writer;

pub use client::{InMemoryRemoteClient, RemoteClient, RemoteResult};
pub use client_resolver::ClientResolver;
pub use error::{ConnectorError, ConnectorResult, ExternalApiError, ExternalErrorKind};
pub use pipeline::{ConnectorImport, ConnectorPipeline};
