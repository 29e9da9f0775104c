//! 去重优先级队列
//!
//! 所有操作都在同一把锁内完成，保证并发生产者与消费者看到一致的队列长度，
//! 并保证同一 `hash` 至多只有一个存活条目。
//!
//! 出队顺序为 `(priority, seq)` 升序：数值越小越先出队，同优先级按插入顺序。

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use scheduler_core::{FilterRequest, ItemKind, PrioritizedItem, QueueError};

#[derive(Debug)]
struct Slot {
    item: PrioritizedItem,
    seq: u64,
}

#[derive(Debug, Default)]
struct QueueState {
    order: BTreeMap<(i64, u64), Uuid>,
    entries: HashMap<Uuid, Slot>,
    by_hash: HashMap<String, Uuid>,
    next_seq: u64,
}

impl QueueState {
    fn insert(&mut self, item: PrioritizedItem) -> PrioritizedItem {
        let seq = self.next_seq;
        self.next_seq += 1;

        self.order.insert((item.priority, seq), item.id);
        if let Some(hash) = &item.hash {
            self.by_hash.insert(hash.clone(), item.id);
        }
        self.entries.insert(
            item.id,
            Slot {
                item: item.clone(),
                seq,
            },
        );
        item
    }

    fn take(&mut self, id: &Uuid) -> Option<PrioritizedItem> {
        let slot = self.entries.remove(id)?;
        self.order.remove(&(slot.item.priority, slot.seq));
        if let Some(hash) = &slot.item.hash {
            if self.by_hash.get(hash) == Some(id) {
                self.by_hash.remove(hash);
            }
        }
        Some(slot.item)
    }
}

/// 队列状态快照
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueStatus {
    pub id: String,
    pub item_type: ItemKind,
    pub maxsize: usize,
    pub qsize: usize,
    pub allow_replace: bool,
    pub allow_updates: bool,
    pub allow_priority_updates: bool,
}

/// 线程安全的最小优先级队列
///
/// 同一 `hash` 已在队列中时的处理策略：
/// - `allow_replace`: 整个替换旧条目，新条目排到同优先级的末尾
/// - `allow_updates`: 负载不同时更新负载，保留原 id 和插入顺序
/// - `allow_priority_updates`: 优先级不同时更新优先级，保留原 id 和插入顺序
/// - 都不满足时返回 `NotAllowed`
///
/// `maxsize` 为 0 表示不限容量；只有新哈希的条目才会触发 `QueueFull`。
#[derive(Debug)]
pub struct PriorityQueue {
    pq_id: String,
    item_type: ItemKind,
    maxsize: usize,
    allow_replace: bool,
    allow_updates: bool,
    allow_priority_updates: bool,
    state: Mutex<QueueState>,
}

impl PriorityQueue {
    pub fn new(pq_id: impl Into<String>, item_type: ItemKind, maxsize: usize) -> Self {
        Self {
            pq_id: pq_id.into(),
            item_type,
            maxsize,
            allow_replace: false,
            allow_updates: false,
            allow_priority_updates: false,
            state: Mutex::new(QueueState::default()),
        }
    }

    pub fn with_replace(mut self, allow: bool) -> Self {
        self.allow_replace = allow;
        self
    }

    pub fn with_updates(mut self, allow: bool) -> Self {
        self.allow_updates = allow;
        self
    }

    pub fn with_priority_updates(mut self, allow: bool) -> Self {
        self.allow_priority_updates = allow;
        self
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 推入条目，返回队列中实际保存的条目
    pub fn push(&self, item: PrioritizedItem) -> Result<PrioritizedItem, QueueError> {
        self.item_type
            .validate(&item.data)
            .map_err(QueueError::InvalidPrioritizedItem)?;

        let mut state = self.lock();

        let existing_id = item
            .hash
            .as_ref()
            .and_then(|hash| state.by_hash.get(hash).copied());

        if let Some(other) = state.entries.get(&item.id) {
            if Some(item.id) != existing_id {
                return Err(QueueError::InvalidPrioritizedItem(format!(
                    "条目 id {} 已被哈希为 {:?} 的条目占用",
                    item.id, other.item.hash
                )));
            }
        }

        let Some(existing_id) = existing_id else {
            if self.maxsize > 0 && state.entries.len() >= self.maxsize {
                return Err(QueueError::QueueFull(format!(
                    "{} (maxsize={})",
                    self.pq_id, self.maxsize
                )));
            }

            debug!(queue_id = %self.pq_id, item.id = %item.id, item.hash = ?item.hash, "条目入队");
            return Ok(state.insert(item));
        };

        if self.allow_replace {
            state.take(&existing_id);
            debug!(queue_id = %self.pq_id, item.id = %item.id, replaced = %existing_id, "替换队列中的同哈希条目");
            return Ok(state.insert(item));
        }

        let slot = state
            .entries
            .get_mut(&existing_id)
            .ok_or_else(|| QueueError::InvalidPrioritizedItem(format!("哈希索引失效: {existing_id}")))?;

        let payload_changed = slot.item.data != item.data;
        let priority_changed = slot.item.priority != item.priority;
        let update_payload = self.allow_updates && payload_changed;
        let update_priority = self.allow_priority_updates && priority_changed;

        if !update_payload && !update_priority {
            return Err(QueueError::NotAllowed(format!(
                "哈希 {} 已在队列 {} 中",
                item.hash.as_deref().unwrap_or_default(),
                self.pq_id
            )));
        }

        let old_key = (slot.item.priority, slot.seq);
        if update_payload {
            slot.item.data = item.data;
        }
        if update_priority {
            slot.item.priority = item.priority;
        }
        slot.item.modified_at = Utc::now();

        let new_key = (slot.item.priority, slot.seq);
        let stored = slot.item.clone();
        if old_key != new_key {
            state.order.remove(&old_key);
            state.order.insert(new_key, existing_id);
        }

        debug!(
            queue_id = %self.pq_id,
            item.id = %stored.id,
            update_payload,
            update_priority,
            "更新队列中的同哈希条目"
        );
        Ok(stored)
    }

    /// 弹出满足过滤条件、优先级数值最小的条目
    pub fn pop(&self, filters: Option<&FilterRequest>) -> Result<PrioritizedItem, QueueError> {
        let mut state = self.lock();

        let id = state
            .order
            .values()
            .find(|id| match (filters, state.entries.get(*id)) {
                (Some(request), Some(slot)) => request.matches(&slot.item),
                (None, Some(_)) => true,
                (_, None) => false,
            })
            .copied()
            .ok_or_else(|| QueueError::QueueEmpty(self.pq_id.clone()))?;

        state
            .take(&id)
            .ok_or_else(|| QueueError::QueueEmpty(self.pq_id.clone()))
    }

    pub fn peek(&self) -> Option<PrioritizedItem> {
        let state = self.lock();
        state
            .order
            .values()
            .next()
            .and_then(|id| state.entries.get(id))
            .map(|slot| slot.item.clone())
    }

    pub fn remove(&self, id: &Uuid) -> Option<PrioritizedItem> {
        self.lock().take(id)
    }

    pub fn get_item_by_identifier(&self, id: &Uuid) -> Option<PrioritizedItem> {
        self.lock().entries.get(id).map(|slot| slot.item.clone())
    }

    pub fn get_item_by_hash(&self, hash: &str) -> Option<PrioritizedItem> {
        let state = self.lock();
        state
            .by_hash
            .get(hash)
            .and_then(|id| state.entries.get(id))
            .map(|slot| slot.item.clone())
    }

    pub fn is_item_on_queue_by_hash(&self, hash: &str) -> bool {
        self.lock().by_hash.contains_key(hash)
    }

    pub fn qsize(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn maxsize(&self) -> usize {
        self.maxsize
    }

    pub fn full(&self) -> bool {
        self.maxsize > 0 && self.qsize() >= self.maxsize
    }

    pub fn empty(&self) -> bool {
        self.qsize() == 0
    }

    /// 按出队顺序排列的条目快照
    pub fn items(&self) -> Vec<PrioritizedItem> {
        let state = self.lock();
        state
            .order
            .values()
            .filter_map(|id| state.entries.get(id))
            .map(|slot| slot.item.clone())
            .collect()
    }

    pub fn pq_id(&self) -> &str {
        &self.pq_id
    }

    pub fn item_type(&self) -> ItemKind {
        self.item_type
    }

    pub fn status(&self) -> QueueStatus {
        QueueStatus {
            id: self.pq_id.clone(),
            item_type: self.item_type,
            maxsize: self.maxsize,
            qsize: self.qsize(),
            allow_replace: self.allow_replace,
            allow_updates: self.allow_updates,
            allow_priority_updates: self.allow_priority_updates,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scheduler_core::{Boefje, BoefjeTask, Filter};
    use serde_json::json;

    fn item(boefje: &str, ooi: &str, priority: i64) -> PrioritizedItem {
        let task = BoefjeTask::new(Boefje::new(boefje), Some(ooi.to_string()), "org1");
        PrioritizedItem::from_task("boefje-org1", task.id, task.hash(), priority, &task).unwrap()
    }

    fn queue(maxsize: usize) -> PriorityQueue {
        PriorityQueue::new("boefje-org1", ItemKind::Boefje, maxsize)
    }

    #[test]
    fn test_push_then_pop_returns_same_item() {
        let pq = queue(10);
        let pushed = item("nmap", "IPAddressV4|internet|1.1.1.1", 5);
        pq.push(pushed.clone()).unwrap();

        let popped = pq.pop(None).unwrap();
        assert_eq!(popped, pushed);
        assert!(pq.empty());
    }

    #[test]
    fn test_pop_orders_by_priority_then_insertion() {
        let pq = queue(0);
        let a = pq.push(item("a", "x", 5)).unwrap();
        let b = pq.push(item("b", "x", 1)).unwrap();
        let c = pq.push(item("c", "x", 5)).unwrap();

        assert_eq!(pq.peek().unwrap().id, b.id);
        assert_eq!(pq.pop(None).unwrap().id, b.id);
        assert_eq!(pq.pop(None).unwrap().id, a.id);
        assert_eq!(pq.pop(None).unwrap().id, c.id);
        assert!(matches!(pq.pop(None), Err(QueueError::QueueEmpty(_))));
    }

    #[test]
    fn test_duplicate_hash_not_allowed() {
        let pq = queue(10);
        let first = item("nmap", "x", 5);
        pq.push(first.clone()).unwrap();

        let mut second = item("nmap", "x", 3);
        second.data = first.data.clone();
        let err = pq.push(second).unwrap_err();
        assert!(matches!(err, QueueError::NotAllowed(_)));
        assert_eq!(pq.qsize(), 1);
    }

    #[test]
    fn test_queue_full_then_space_after_pop() {
        let pq = queue(2);
        pq.push(item("a", "x", 1)).unwrap();
        pq.push(item("b", "x", 2)).unwrap();
        assert!(pq.full());

        let err = pq.push(item("c", "x", 3)).unwrap_err();
        assert!(matches!(err, QueueError::QueueFull(_)));

        pq.pop(None).unwrap();
        assert!(pq.push(item("c", "x", 3)).is_ok());
    }

    #[test]
    fn test_replace_on_full_queue_is_allowed() {
        let pq = queue(1).with_replace(true);
        let first = pq.push(item("a", "x", 5)).unwrap();
        let second = pq.push(item("a", "x", 2)).unwrap();

        assert_eq!(pq.qsize(), 1);
        assert_ne!(first.id, second.id);
        assert!(pq.get_item_by_identifier(&first.id).is_none());
        assert_eq!(pq.pop(None).unwrap().id, second.id);
    }

    #[test]
    fn test_priority_update_keeps_identity() {
        let pq = queue(0).with_priority_updates(true);
        let first = pq.push(item("a", "x", 5)).unwrap();
        pq.push(item("b", "x", 3)).unwrap();

        let mut update = item("a", "x", 1);
        update.id = Uuid::new_v4();
        let stored = pq.push(update).unwrap();

        assert_eq!(stored.id, first.id);
        assert_eq!(stored.priority, 1);
        assert_eq!(stored.data, first.data);
        assert_eq!(pq.qsize(), 2);
        assert_eq!(pq.pop(None).unwrap().id, first.id);
    }

    #[test]
    fn test_payload_update_requires_changed_payload() {
        let pq = queue(0).with_updates(true);
        let first = pq.push(item("a", "x", 5)).unwrap();

        let mut same = first.clone();
        same.id = Uuid::new_v4();
        assert!(matches!(pq.push(same), Err(QueueError::NotAllowed(_))));

        let changed = item("a", "x", 5);
        assert_ne!(changed.data, first.data);
        let stored = pq.push(changed.clone()).unwrap();
        assert_eq!(stored.id, first.id);
        assert_eq!(stored.data, changed.data);
    }

    #[test]
    fn test_invalid_payload_rejected() {
        let pq = queue(0);
        let bad = PrioritizedItem::new("boefje-org1", Some("h".into()), 1, json!({"x": 1}));
        assert!(matches!(
            pq.push(bad),
            Err(QueueError::InvalidPrioritizedItem(_))
        ));
    }

    #[test]
    fn test_id_collision_with_other_hash_rejected() {
        let pq = queue(0);
        let first = pq.push(item("a", "x", 5)).unwrap();
        let mut other = item("b", "y", 5);
        other.id = first.id;
        assert!(matches!(
            pq.push(other),
            Err(QueueError::InvalidPrioritizedItem(_))
        ));
        assert_eq!(pq.qsize(), 1);
    }

    #[test]
    fn test_pop_with_filters() {
        let pq = queue(0);
        pq.push(item("a", "x", 1)).unwrap();
        let wanted = pq.push(item("b", "y", 9)).unwrap();

        let request = FilterRequest::all(vec![
            Filter::new("data", Some("boefje__id"), "eq", json!("b")).unwrap(),
        ]);
        assert_eq!(pq.pop(Some(&request)).unwrap().id, wanted.id);
        assert!(matches!(
            pq.pop(Some(&request)),
            Err(QueueError::QueueEmpty(_))
        ));
        assert_eq!(pq.qsize(), 1);
    }

    #[test]
    fn test_remove_and_lookup() {
        let pq = queue(0);
        let stored = pq.push(item("a", "x", 1)).unwrap();
        let hash = stored.hash.clone().unwrap();

        assert!(pq.is_item_on_queue_by_hash(&hash));
        assert_eq!(pq.get_item_by_hash(&hash).unwrap().id, stored.id);
        assert_eq!(pq.remove(&stored.id).unwrap().id, stored.id);
        assert!(!pq.is_item_on_queue_by_hash(&hash));
        assert!(pq.remove(&stored.id).is_none());
    }

    #[test]
    fn test_status_snapshot() {
        let pq = queue(3).with_priority_updates(true);
        pq.push(item("a", "x", 1)).unwrap();

        let status = pq.status();
        assert_eq!(status.id, "boefje-org1");
        assert_eq!(status.qsize, 1);
        assert_eq!(status.maxsize, 3);
        assert!(status.allow_priority_updates);
        assert!(!status.allow_replace);
    }
}
