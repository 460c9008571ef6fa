use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::{MessageRecord, NotificationKind, NotificationRecord, ReadOutcome, Store};
use crate::error::StoreError;

/// 进程内存储实现 / In-process store implementation
///
/// 默认运行时与测试共用；持久后端在同一trait后替换
/// Shared by the default runtime and tests; durable backends slot in behind
/// the same trait
pub struct MemoryStore {
    messages: DashMap<String, MessageRecord>,
    notifications: DashMap<String, NotificationRecord>,
    /// (user_id, related_id) -> notification_id，entry占位即唯一约束
    /// (user_id, related_id) -> notification_id; the entry slot is the
    /// uniqueness constraint
    message_index: DashMap<(String, String), String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            messages: DashMap::new(),
            notifications: DashMap::new(),
            message_index: DashMap::new(),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_message(&self, record: MessageRecord) -> Result<MessageRecord, StoreError> {
        self.messages
            .insert(record.message_id.clone(), record.clone());
        Ok(record)
    }

    async fn find_message(&self, message_id: &str) -> Result<Option<MessageRecord>, StoreError> {
        Ok(self.messages.get(message_id).map(|r| r.clone()))
    }

    async fn delete_message(&self, message_id: &str) -> Result<bool, StoreError> {
        Ok(self.messages.remove(message_id).is_some())
    }

    async fn bulk_mark_messages_read(
        &self,
        message_ids: &[String],
        reader_id: &str,
        read_at: DateTime<Utc>,
    ) -> Result<ReadOutcome, StoreError> {
        let mut outcome = ReadOutcome::default();
        for id in message_ids {
            if let Some(mut rec) = self.messages.get_mut(id) {
                if rec.recipient_id == reader_id && !rec.is_read {
                    outcome.matched += 1;
                    rec.is_read = true;
                    rec.read_at = Some(read_at);
                    outcome.modified += 1;
                    outcome.updated.push(rec.clone());
                }
            }
        }
        Ok(outcome)
    }

    async fn create_notification_if_absent(
        &self,
        record: NotificationRecord,
    ) -> Result<(NotificationRecord, bool), StoreError> {
        let key = (record.user_id.clone(), record.related_id.clone());
        match self.message_index.entry(key) {
            Entry::Occupied(mut slot) => {
                // 已存在即成功，返回现有记录 / Already present counts as success
                let existing_id = slot.get().clone();
                match self.notifications.get(&existing_id) {
                    Some(existing) => Ok((existing.clone(), false)),
                    None => {
                        // 索引残留（记录已被清理），重新占位
                        // Stale index slot (record cleaned up), re-occupy it
                        slot.insert(record.notification_id.clone());
                        self.notifications
                            .insert(record.notification_id.clone(), record.clone());
                        Ok((record, true))
                    }
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(record.notification_id.clone());
                self.notifications
                    .insert(record.notification_id.clone(), record.clone());
                Ok((record, true))
            }
        }
    }

    async fn unread_notifications(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<NotificationRecord>, StoreError> {
        let mut list: Vec<NotificationRecord> = self
            .notifications
            .iter()
            .filter(|e| e.user_id == user_id && !e.is_read)
            .map(|e| e.clone())
            .collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        list.truncate(limit);
        Ok(list)
    }

    async fn count_unread_notifications(&self, user_id: &str) -> Result<usize, StoreError> {
        Ok(self
            .notifications
            .iter()
            .filter(|e| e.user_id == user_id && !e.is_read)
            .count())
    }

    async fn bulk_mark_message_notifications_read(
        &self,
        message_ids: &[String],
        user_id: &str,
        read_at: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let mut modified = 0usize;
        for mut entry in self.notifications.iter_mut() {
            if entry.user_id == user_id
                && entry.kind == NotificationKind::Message
                && !entry.is_read
                && message_ids.iter().any(|id| *id == entry.related_id)
            {
                entry.is_read = true;
                entry.read_at = Some(read_at);
                modified += 1;
            }
        }
        Ok(modified)
    }

    async fn bulk_mark_notifications_read(
        &self,
        notification_ids: &[String],
        user_id: &str,
        read_at: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let mut modified = 0usize;
        for id in notification_ids {
            if let Some(mut rec) = self.notifications.get_mut(id) {
                if rec.user_id == user_id && !rec.is_read {
                    rec.is_read = true;
                    rec.read_at = Some(read_at);
                    modified += 1;
                }
            }
        }
        Ok(modified)
    }

    async fn delete_notifications_by_related(
        &self,
        related_id: &str,
    ) -> Result<usize, StoreError> {
        let doomed: Vec<String> = self
            .notifications
            .iter()
            .filter(|e| e.related_id == related_id)
            .map(|e| e.notification_id.clone())
            .collect();
        for id in &doomed {
            self.notifications.remove(id);
        }
        self.message_index.retain(|key, _| key.1 != related_id);
        Ok(doomed.len())
    }
}
