// expert_cache.rs
// 片上专家缓存，固定容量、严格 LRU 替换，并统计命中/未命中/驱逐次数。
use crate::error::{Error, Result};
use crate::types::ExpertId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

/// 一次 `access` 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheAccess {
    /// 命中，专家已被移到最近使用端
    Hit,
    /// 未命中，专家已装入缓存；若缓存已满则附带被驱逐的专家
    Miss { evicted: Option<ExpertId> },
}

impl CacheAccess {
    pub fn is_hit(&self) -> bool {
        matches!(self, CacheAccess::Hit)
    }
}

/// 缓存统计快照
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub capacity: usize,
    pub resident: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub hit_rate: f64,
}

/// 双向链表节点，链表头为最久未使用，链表尾为最近使用
#[derive(Debug, Clone)]
struct Node {
    expert_id: ExpertId,
    prev: Option<usize>,
    next: Option<usize>,
}

/// 固定容量的 LRU 专家缓存
///
/// 节点存放在一个容量有界的 slab 中，驱逐时复用被驱逐节点的槽位，
/// 因此移到最近使用端和驱逐最久未使用都是 O(1)。
#[derive(Debug, Clone)]
pub struct ExpertCache {
    capacity: usize,
    nodes: Vec<Node>,
    index: HashMap<ExpertId, usize>,
    head: Option<usize>,
    tail: Option<usize>,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl ExpertCache {
    /// 创建缓存，容量为 0 是配置错误
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::Config("专家缓存容量必须至少为 1".to_string()));
        }
        info!("MoE 专家缓存初始化: 容量 = {} 个专家", capacity);
        Ok(Self {
            capacity,
            nodes: Vec::with_capacity(capacity),
            index: HashMap::with_capacity(capacity),
            head: None,
            tail: None,
            hits: 0,
            misses: 0,
            evictions: 0,
        })
    }

    /// 纯成员查询，不改变访问顺序和统计
    pub fn is_cached(&self, expert_id: ExpertId) -> bool {
        self.index.contains_key(&expert_id)
    }

    /// 访问专家：命中则移到最近使用端，未命中则装入（必要时驱逐最久未使用者）
    pub fn access(&mut self, expert_id: ExpertId) -> CacheAccess {
        if let Some(&idx) = self.index.get(&expert_id) {
            self.hits += 1;
            self.touch(idx);
            CacheAccess::Hit
        } else {
            self.misses += 1;
            let evicted = self.insert(expert_id);
            CacheAccess::Miss { evicted }
        }
    }

    /// 预先装入专家，不计入命中/未命中
    ///
    /// 已驻留时只刷新访问顺序；返回因装入而被驱逐的专家。
    pub fn warm(&mut self, expert_id: ExpertId) -> Option<ExpertId> {
        match self.index.get(&expert_id) {
            Some(&idx) => {
                self.touch(idx);
                None
            }
            None => self.insert(expert_id),
        }
    }

    /// 当前驻留专家，从最久未使用到最近使用
    pub fn residents(&self) -> Vec<ExpertId> {
        let mut out = Vec::with_capacity(self.index.len());
        let mut cursor = self.head;
        while let Some(idx) = cursor {
            out.push(self.nodes[idx].expert_id);
            cursor = self.nodes[idx].next;
        }
        out
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    pub fn evictions(&self) -> u64 {
        self.evictions
    }

    /// 命中率，没有任何访问时为 0
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            return 0.0;
        }
        self.hits as f64 / total as f64
    }

    /// 清零统计，驻留集合与访问顺序保持不变
    pub fn reset_stats(&mut self) {
        self.hits = 0;
        self.misses = 0;
        self.evictions = 0;
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            capacity: self.capacity,
            resident: self.len(),
            hits: self.hits,
            misses: self.misses,
            evictions: self.evictions,
            hit_rate: self.hit_rate(),
        }
    }

    /// 装入一个当前不在缓存中的专家
    fn insert(&mut self, expert_id: ExpertId) -> Option<ExpertId> {
        let mut evicted = None;
        let idx = if self.index.len() >= self.capacity {
            match self.evict_lru() {
                Some((slot, old)) => {
                    evicted = Some(old);
                    self.nodes[slot].expert_id = expert_id;
                    slot
                }
                None => self.alloc(expert_id),
            }
        } else {
            self.alloc(expert_id)
        };
        self.index.insert(expert_id, idx);
        self.push_back(idx);
        debug!(
            "专家 {} 装入缓存, 占用 {}/{}",
            expert_id,
            self.index.len(),
            self.capacity
        );
        evicted
    }

    fn alloc(&mut self, expert_id: ExpertId) -> usize {
        self.nodes.push(Node {
            expert_id,
            prev: None,
            next: None,
        });
        self.nodes.len() - 1
    }

    /// 摘下链表头（最久未使用），返回其槽位和专家编号
    fn evict_lru(&mut self) -> Option<(usize, ExpertId)> {
        let lru = self.head?;
        self.unlink(lru);
        let expert_id = self.nodes[lru].expert_id;
        self.index.remove(&expert_id);
        self.evictions += 1;
        debug!("驱逐专家 {}", expert_id);
        Some((lru, expert_id))
    }

    fn touch(&mut self, idx: usize) {
        if self.tail != Some(idx) {
            self.unlink(idx);
            self.push_back(idx);
        }
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = (self.nodes[idx].prev, self.nodes[idx].next);
        match prev {
            Some(p) => self.nodes[p].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.nodes[n].prev = prev,
            None => self.tail = prev,
        }
        self.nodes[idx].prev = None;
        self.nodes[idx].next = None;
    }

    fn push_back(&mut self, idx: usize) {
        self.nodes[idx].prev = self.tail;
        self.nodes[idx].next = None;
        match self.tail {
            Some(t) => self.nodes[t].next = Some(idx),
            None => self.head = Some(idx),
        }
        self.tail = Some(idx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    const A: ExpertId = 0;
    const B: ExpertId = 1;
    const C: ExpertId = 2;

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(matches!(ExpertCache::new(0), Err(Error::Config(_))));
    }

    #[test]
    fn test_lru_eviction_sequence() {
        let mut cache = ExpertCache::new(2).unwrap();
        assert_eq!(cache.access(A), CacheAccess::Miss { evicted: None });
        assert_eq!(cache.access(B), CacheAccess::Miss { evicted: None });
        assert!(cache.is_cached(A) && cache.is_cached(B));

        assert_eq!(cache.access(C), CacheAccess::Miss { evicted: Some(A) });
        assert!(!cache.is_cached(A));

        assert_eq!(cache.access(A), CacheAccess::Miss { evicted: Some(B) });
        assert_eq!(cache.residents(), vec![C, A]);
        assert_eq!(cache.misses(), 4);
        assert_eq!(cache.hits(), 0);
        assert_eq!(cache.evictions(), 2);
    }

    #[test]
    fn test_hit_moves_to_most_recent() {
        let mut cache = ExpertCache::new(2).unwrap();
        cache.access(A);
        cache.access(B);
        assert!(cache.access(A).is_hit());
        // B 现在最久未使用
        assert_eq!(cache.access(C), CacheAccess::Miss { evicted: Some(B) });
        assert_eq!(cache.residents(), vec![A, C]);
    }

    #[test]
    fn test_is_cached_does_not_touch_order() {
        let mut cache = ExpertCache::new(2).unwrap();
        cache.access(A);
        cache.access(B);
        assert!(cache.is_cached(A));
        assert_eq!(cache.access(C), CacheAccess::Miss { evicted: Some(A) });
        assert_eq!(cache.hits() + cache.misses(), 3);
    }

    #[test]
    fn test_hit_rate_and_reset() {
        let mut cache = ExpertCache::new(4).unwrap();
        assert_eq!(cache.hit_rate(), 0.0);
        cache.access(A);
        cache.access(A);
        cache.access(A);
        cache.access(B);
        assert!((cache.hit_rate() - 0.5).abs() < 1e-12);

        cache.reset_stats();
        assert_eq!(cache.stats().hits, 0);
        assert_eq!(cache.stats().misses, 0);
        assert_eq!(cache.hit_rate(), 0.0);
        assert_eq!(cache.residents(), vec![A, B]);
    }

    #[test]
    fn test_warm_does_not_count_access() {
        let mut cache = ExpertCache::new(1).unwrap();
        assert_eq!(cache.warm(A), None);
        assert_eq!(cache.warm(B), Some(A));
        assert_eq!(cache.hits() + cache.misses(), 0);
        assert!(cache.access(B).is_hit());
    }

    #[test]
    fn test_matches_reference_lru_under_random_access() {
        // 以按访问时间戳选最旧者的朴素实现作为对照
        let mut rng = StdRng::seed_from_u64(7);
        for capacity in 1..6 {
            let mut cache = ExpertCache::new(capacity).unwrap();
            let mut last_access: Vec<(ExpertId, u64)> = Vec::new();
            for t in 0..500u64 {
                let id: ExpertId = rng.gen_range(0..10);
                let found = last_access.iter().position(|e| e.0 == id);
                let expected = if let Some(pos) = found {
                    last_access[pos].1 = t;
                    CacheAccess::Hit
                } else {
                    let mut evicted = None;
                    if last_access.len() == capacity {
                        let (pos, _) = last_access
                            .iter()
                            .enumerate()
                            .min_by_key(|(_, e)| e.1)
                            .unwrap();
                        evicted = Some(last_access.remove(pos).0);
                    }
                    last_access.push((id, t));
                    CacheAccess::Miss { evicted }
                };
                assert_eq!(cache.access(id), expected);
                assert!(cache.len() <= capacity);
            }
            let mut expected_order = last_access.clone();
            expected_order.sort_by_key(|e| e.1);
            let expected_ids: Vec<ExpertId> = expected_order.iter().map(|e| e.0).collect();
            assert_eq!(cache.residents(), expected_ids);
            assert_eq!(cache.hits() + cache.misses(), 500);
        }
    }
}
