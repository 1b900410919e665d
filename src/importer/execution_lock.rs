// ==========================================
// 多租户导入引擎 - 执行锁
// ==========================================
// 职责: 按 (租户, 实体类型) 串行化写入
// 约束: 多把锁按 EntityType 顺序获取，避免死锁
// 锁域: admins 与 users 同存于用户表，共用 users 锁
// ==========================================

use crate::domain::types::EntityType;
use crate::importer::error::{ImportError, ImportResult};
use crate::importer::field_catalog::fields_for;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type LockKey = (String, EntityType);

fn lock_domain(entity_type: EntityType) -> EntityType {
    match entity_type {
        EntityType::Admins => EntityType::Users,
        other => other,
    }
}

/// 执行某类作业需持有的锁: 自身，开启自动创建时再加上字段直接引用的实体类型
pub fn lock_set(entity_type: EntityType, auto_create_missing: bool) -> Vec<EntityType> {
    let mut types = vec![entity_type];
    if auto_create_missing {
        types.extend(fields_for(entity_type).iter().filter_map(|f| f.references));
    }
    types
}

/// 持有期间独占 (租户, 实体类型)
pub struct ExecutionGuard {
    _guards: Vec<OwnedMutexGuard<()>>,
}

#[derive(Default)]
pub struct ExecutionLocks {
    registry: Mutex<HashMap<LockKey, Arc<AsyncMutex<()>>>>,
}

impl ExecutionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn handle(&self, tenant_id: &str, entity_type: EntityType) -> ImportResult<Arc<AsyncMutex<()>>> {
        let mut registry = self
            .registry
            .lock()
            .map_err(|e| ImportError::InternalError(format!("锁注册表不可用: {}", e)))?;
        Ok(registry
            .entry((tenant_id.to_string(), entity_type))
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone())
    }

    pub async fn acquire(&self, tenant_id: &str, entity_type: EntityType) -> ImportResult<ExecutionGuard> {
        self.acquire_many(tenant_id, &[entity_type]).await
    }

    /// 一次获取多把锁（排序去重后依次获取）
    pub async fn acquire_many(
        &self,
        tenant_id: &str,
        entity_types: &[EntityType],
    ) -> ImportResult<ExecutionGuard> {
        let mut ordered: Vec<EntityType> = entity_types.iter().copied().map(lock_domain).collect();
        ordered.sort();
        ordered.dedup();

        let mut guards = Vec::with_capacity(ordered.len());
        for entity_type in ordered {
            let handle = self.handle(tenant_id, entity_type)?;
            guards.push(handle.lock_owned().await);
            tracing::debug!(tenant_id = %tenant_id, entity_type = %entity_type, "执行锁已获取");
        }
        Ok(ExecutionGuard { _guards: guards })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_key_is_exclusive() {
        let locks = Arc::new(ExecutionLocks::new());
        let guard = locks.acquire("t1", EntityType::Clients).await.unwrap();

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _g = locks.acquire("t1", EntityType::Clients).await.unwrap();
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), contender)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_other_tenant_and_entity_not_blocked() {
        let locks = ExecutionLocks::new();
        let _guard = locks.acquire("t1", EntityType::Clients).await.unwrap();

        tokio::time::timeout(Duration::from_millis(200), locks.acquire("t2", EntityType::Clients))
            .await
            .unwrap()
            .unwrap();
        tokio::time::timeout(Duration::from_millis(200), locks.acquire("t1", EntityType::Projects))
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_acquire_many_dedups() {
        let locks = ExecutionLocks::new();
        let guard = locks
            .acquire_many("t1", &[EntityType::Users, EntityType::Clients, EntityType::Users])
            .await
            .unwrap();
        assert_eq!(guard._guards.len(), 2);
    }

    #[tokio::test]
    async fn test_admins_share_users_lock() {
        let locks = Arc::new(ExecutionLocks::new());
        let guard = locks.acquire("t1", EntityType::Users).await.unwrap();

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _g = locks.acquire("t1", EntityType::Admins).await.unwrap();
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), contender)
            .await
            .unwrap()
            .unwrap();

        let guard = locks
            .acquire_many("t1", &[EntityType::Admins, EntityType::Users])
            .await
            .unwrap();
        assert_eq!(guard._guards.len(), 1);
    }

    #[test]
    fn test_lock_set_follows_references_when_auto_creating() {
        assert_eq!(lock_set(EntityType::Clients, true), vec![EntityType::Clients]);
        assert_eq!(lock_set(EntityType::TimeEntries, false), vec![EntityType::TimeEntries]);

        let set = lock_set(EntityType::TimeEntries, true);
        for expected in [
            EntityType::TimeEntries,
            EntityType::Users,
            EntityType::Projects,
            EntityType::Tasks,
        ] {
            assert!(set.contains(&expected), "{:?} 缺少 {}", set, expected);
        }
        assert!(!set.contains(&EntityType::Clients));

        let set = lock_set(EntityType::Projects, true);
        assert!(set.contains(&EntityType::Clients));
    }
}
