// ==========================================
// 多租户导入引擎 - 客户关联解析
// ==========================================
// 职责: 按 ClientMappingStrategy 为远程项目确定本地客户名
// 输出: Ok(客户名) / Err(UNMAPPED_CLIENT 的原因)
// ==========================================

use crate::domain::connector::{ClientMappingStrategy, RemoteProject, RemoteTeam};
use std::collections::HashMap;

pub struct ClientResolver<'a> {
    strategy: &'a ClientMappingStrategy,
    /// team_id → 团队名
    team_names: HashMap<String, String>,
}

impl<'a> ClientResolver<'a> {
    pub fn new(strategy: &'a ClientMappingStrategy, teams: &[RemoteTeam]) -> Self {
        let team_names = teams
            .iter()
            .map(|t| (t.id.clone(), t.name.clone()))
            .collect();
        Self {
            strategy,
            team_names,
        }
    }

    /// 该策略是否需要团队列表
    pub fn needs_teams(strategy: &ClientMappingStrategy) -> bool {
        matches!(strategy, ClientMappingStrategy::Team { .. })
    }

    pub fn resolve(&self, project: &RemoteProject) -> Result<String, String> {
        let candidate = match self.strategy {
            ClientMappingStrategy::Single { client_name } => Some(client_name.clone()),
            ClientMappingStrategy::Team { team_clients } => {
                let team_id = project
                    .team_id
                    .as_deref()
                    .ok_or_else(|| "项目未归属任何团队".to_string())?;
                // 覆盖表可按团队 ID 或团队名配置
                let team_name = self.team_names.get(team_id);
                team_clients
                    .get(team_id)
                    .or_else(|| team_name.and_then(|name| team_clients.get(name)))
                    .or(team_name)
                    .cloned()
            }
            ClientMappingStrategy::PerProject { project_clients } => {
                project_clients.get(&project.id).cloned()
            }
            ClientMappingStrategy::CustomField { field_name } => {
                project.custom_fields.get(field_name).cloned()
            }
        };

        match candidate.map(|name| name.trim().to_string()) {
            Some(name) if !name.is_empty() => Ok(name),
            _ => Err(self.unmapped_reason(project)),
        }
    }

    fn unmapped_reason(&self, project: &RemoteProject) -> String {
        match self.strategy {
            ClientMappingStrategy::Single { .. } => "single 策略未配置客户名".to_string(),
            ClientMappingStrategy::Team { .. } => {
                format!("项目 '{}' 的团队无法确定客户", project.name)
            }
            ClientMappingStrategy::PerProject { .. } => {
                format!("项目 '{}' 未配置客户映射", project.name)
            }
            ClientMappingStrategy::CustomField { field_name } => {
                format!("项目 '{}' 缺少自定义字段 '{}'", project.name, field_name)
            }
        }
    }
}
