//! Probabilistic skip list ordered by `(score, member)`.
//!
//! Every forward pointer carries a `span` — the number of bottom-level
//! nodes it skips — which makes rank queries O(log n) instead of a full
//! walk. Nodes live in an arena `Vec` and link by index, with a free
//! list for reuse; index links keep the structure in safe Rust and make
//! it cheaply `Clone` for undo-log snapshots.
//!
//! Ranks in this module are 1-based (0 means "not found"), matching the
//! span arithmetic; the sorted-set wrapper converts to the 0-based ranks
//! commands expose.

use bytes::Bytes;
use rand::Rng;

use super::border::{is_empty_range, ScoreBorder};

pub(crate) const MAX_LEVEL: usize = 16;
const PROMOTE_P: f64 = 0.75;

/// Arena index of the header node.
const HEAD: u32 = 0;

/// A member with its score, as returned by range queries.
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub member: Bytes,
    pub score: f64,
}

#[derive(Debug, Clone, Default)]
struct Level {
    forward: Option<u32>,
    span: u64,
}

#[derive(Debug, Clone)]
struct Node {
    member: Bytes,
    score: f64,
    backward: Option<u32>,
    levels: Vec<Level>,
}

#[derive(Debug, Clone)]
pub struct SkipList {
    nodes: Vec<Node>,
    free: Vec<u32>,
    tail: Option<u32>,
    length: u64,
    level: usize,
}

fn random_level() -> usize {
    let mut level = 1;
    let mut rng = rand::thread_rng();
    while level < MAX_LEVEL && rng.gen::<f64>() < PROMOTE_P {
        level += 1;
    }
    level
}

/// Ordering used throughout: by score, member bytes breaking ties.
fn precedes(score_a: f64, member_a: &Bytes, score_b: f64, member_b: &Bytes) -> bool {
    score_a < score_b || (score_a == score_b && member_a < member_b)
}

impl SkipList {
    pub fn new() -> Self {
        let header = Node {
            member: Bytes::new(),
            score: 0.0,
            backward: None,
            levels: vec![Level::default(); MAX_LEVEL],
        };
        Self {
            nodes: vec![header],
            free: Vec::new(),
            tail: None,
            length: 0,
            level: 1,
        }
    }

    pub fn len(&self) -> u64 {
        self.length
    }

    fn node(&self, idx: u32) -> &Node {
        &self.nodes[idx as usize]
    }

    pub(crate) fn element(&self, idx: u32) -> Element {
        let node = self.node(idx);
        Element {
            member: node.member.clone(),
            score: node.score,
        }
    }

    /// First node in bottom-level order.
    pub(crate) fn first(&self) -> Option<u32> {
        self.node(HEAD).levels[0].forward
    }

    pub(crate) fn tail(&self) -> Option<u32> {
        self.tail
    }

    pub(crate) fn next(&self, idx: u32) -> Option<u32> {
        self.node(idx).levels[0].forward
    }

    pub(crate) fn prev(&self, idx: u32) -> Option<u32> {
        self.node(idx).backward
    }

    fn alloc(&mut self, member: Bytes, score: f64, level: usize) -> u32 {
        let node = Node {
            member,
            score,
            backward: None,
            levels: vec![Level::default(); level],
        };
        match self.free.pop() {
            Some(idx) => {
                self.nodes[idx as usize] = node;
                idx
            }
            None => {
                self.nodes.push(node);
                (self.nodes.len() - 1) as u32
            }
        }
    }

    /// Inserts a new `(member, score)` node. The caller guarantees the
    /// member is not already present (the sorted set removes first on a
    /// score change).
    pub fn insert(&mut self, member: Bytes, score: f64) {
        let mut update = [HEAD; MAX_LEVEL];
        let mut rank = [0u64; MAX_LEVEL];

        // find the predecessor at every level, accumulating the rank of
        // each predecessor along the way
        let mut node = HEAD;
        for i in (0..self.level).rev() {
            rank[i] = if i == self.level - 1 { 0 } else { rank[i + 1] };
            while let Some(next) = self.node(node).levels[i].forward {
                let n = self.node(next);
                if precedes(n.score, &n.member, score, &member) {
                    rank[i] += self.node(node).levels[i].span;
                    node = next;
                } else {
                    break;
                }
            }
            update[i] = node;
        }

        let level = random_level();
        if level > self.level {
            for i in self.level..level {
                rank[i] = 0;
                update[i] = HEAD;
                self.nodes[HEAD as usize].levels[i].span = self.length;
            }
            self.level = level;
        }

        let idx = self.alloc(member, score, level);
        for i in 0..level {
            let up = update[i] as usize;
            let up_forward = self.nodes[up].levels[i].forward;
            let up_span = self.nodes[up].levels[i].span;

            // rank[0] is the new node's predecessor rank; the old span
            // splits into the stretch before the new node and after it
            let node_level = &mut self.nodes[idx as usize].levels[i];
            node_level.forward = up_forward;
            node_level.span = up_span - (rank[0] - rank[i]);

            let up_level = &mut self.nodes[up].levels[i];
            up_level.forward = Some(idx);
            up_level.span = (rank[0] - rank[i]) + 1;
        }

        // levels above the new node's height just got one node longer
        for i in level..self.level {
            self.nodes[update[i] as usize].levels[i].span += 1;
        }

        self.nodes[idx as usize].backward = if update[0] == HEAD {
            None
        } else {
            Some(update[0])
        };
        match self.nodes[idx as usize].levels[0].forward {
            Some(next) => self.nodes[next as usize].backward = Some(idx),
            None => self.tail = Some(idx),
        }
        self.length += 1;
    }

    /// Removes the node with exactly this `(member, score)`. Returns
    /// whether it was present.
    pub fn remove(&mut self, member: &Bytes, score: f64) -> bool {
        let mut update = [HEAD; MAX_LEVEL];
        let mut node = HEAD;
        for i in (0..self.level).rev() {
            while let Some(next) = self.node(node).levels[i].forward {
                let n = self.node(next);
                if precedes(n.score, &n.member, score, member) {
                    node = next;
                } else {
                    break;
                }
            }
            update[i] = node;
        }
        match self.node(node).levels[0].forward {
            Some(target)
                if self.node(target).score == score && self.node(target).member == *member =>
            {
                self.remove_node(target, &update);
                true
            }
            _ => false,
        }
    }

    fn remove_node(&mut self, target: u32, update: &[u32; MAX_LEVEL]) {
        for i in 0..self.level {
            let up = update[i] as usize;
            if self.nodes[up].levels[i].forward == Some(target) {
                let t_span = self.nodes[target as usize].levels[i].span;
                let t_forward = self.nodes[target as usize].levels[i].forward;
                let up_level = &mut self.nodes[up].levels[i];
                // summed before the -1: t_span is 0 for a tail node
                up_level.span = (up_level.span + t_span).saturating_sub(1);
                up_level.forward = t_forward;
            } else {
                // span is meaningless when forward is None, hence saturating
                let up_level = &mut self.nodes[up].levels[i];
                up_level.span = up_level.span.saturating_sub(1);
            }
        }

        let t_backward = self.nodes[target as usize].backward;
        match self.nodes[target as usize].levels[0].forward {
            Some(next) => self.nodes[next as usize].backward = t_backward,
            None => self.tail = t_backward,
        }
        while self.level > 1 && self.nodes[HEAD as usize].levels[self.level - 1].forward.is_none()
        {
            self.level -= 1;
        }
        self.length -= 1;

        // return the slot to the arena
        self.nodes[target as usize].member = Bytes::new();
        self.nodes[target as usize].levels.clear();
        self.free.push(target);
    }

    /// 1-based rank of `(member, score)`, or 0 if absent.
    pub fn rank_of(&self, member: &Bytes, score: f64) -> u64 {
        let mut rank = 0u64;
        let mut node = HEAD;
        for i in (0..self.level).rev() {
            while let Some(next) = self.node(node).levels[i].forward {
                let n = self.node(next);
                if n.score < score || (n.score == score && n.member <= *member) {
                    rank += self.node(node).levels[i].span;
                    node = next;
                } else {
                    break;
                }
            }
            if node != HEAD && self.node(node).member == *member {
                return rank;
            }
        }
        0
    }

    /// Node at the given 1-based rank.
    pub(crate) fn by_rank(&self, rank: u64) -> Option<u32> {
        if rank == 0 || rank > self.length {
            return None;
        }
        let mut count = 0u64;
        let mut node = HEAD;
        for i in (0..self.level).rev() {
            while let Some(next) = self.node(node).levels[i].forward {
                let span = self.node(node).levels[i].span;
                if count + span <= rank {
                    count += span;
                    node = next;
                } else {
                    break;
                }
            }
            if count == rank && node != HEAD {
                return Some(node);
            }
        }
        None
    }

    fn has_in_range(&self, min: &ScoreBorder, max: &ScoreBorder) -> bool {
        if is_empty_range(min, max) {
            return false;
        }
        match self.tail {
            None => return false,
            Some(t) if !min.less(self.node(t).score) => return false,
            _ => {}
        }
        match self.first() {
            None => false,
            Some(f) if !max.greater(self.node(f).score) => false,
            _ => true,
        }
    }

    /// First node whose score falls inside `[min, max]`.
    pub(crate) fn first_in_range(&self, min: &ScoreBorder, max: &ScoreBorder) -> Option<u32> {
        if !self.has_in_range(min, max) {
            return None;
        }
        let mut node = HEAD;
        for i in (0..self.level).rev() {
            // advance while the next node is still below the lower border
            while let Some(next) = self.node(node).levels[i].forward {
                if !min.less(self.node(next).score) {
                    node = next;
                } else {
                    break;
                }
            }
        }
        let candidate = self.node(node).levels[0].forward?;
        if !max.greater(self.node(candidate).score) {
            return None;
        }
        Some(candidate)
    }

    /// Last node whose score falls inside `[min, max]`.
    pub(crate) fn last_in_range(&self, min: &ScoreBorder, max: &ScoreBorder) -> Option<u32> {
        if !self.has_in_range(min, max) {
            return None;
        }
        let mut node = HEAD;
        for i in (0..self.level).rev() {
            // advance while the next node is still within the upper border
            while let Some(next) = self.node(node).levels[i].forward {
                if max.greater(self.node(next).score) {
                    node = next;
                } else {
                    break;
                }
            }
        }
        if node == HEAD || !min.less(self.node(node).score) {
            return None;
        }
        Some(node)
    }

    /// Removes every node with a score inside `[min, max]`, returning
    /// the removed elements in ascending order.
    pub fn remove_range_by_score(
        &mut self,
        min: &ScoreBorder,
        max: &ScoreBorder,
    ) -> Vec<Element> {
        let mut update = [HEAD; MAX_LEVEL];
        let mut removed = Vec::new();
        let mut node = HEAD;
        for i in (0..self.level).rev() {
            while let Some(next) = self.node(node).levels[i].forward {
                if min.less(self.node(next).score) {
                    break;
                }
                node = next;
            }
            update[i] = node;
        }

        let mut cursor = self.node(node).levels[0].forward;
        while let Some(c) = cursor {
            if !max.greater(self.node(c).score) {
                break;
            }
            let next = self.node(c).levels[0].forward;
            removed.push(self.element(c));
            self.remove_node(c, &update);
            cursor = next;
        }
        removed
    }

    /// Removes nodes with 1-based ranks in `[start, stop)`, returning
    /// them in ascending order.
    pub fn remove_range_by_rank(&mut self, start: u64, stop: u64) -> Vec<Element> {
        let mut removed = Vec::new();
        if stop <= start {
            return removed;
        }
        let mut count = 0u64;
        let mut update = [HEAD; MAX_LEVEL];
        let mut node = HEAD;
        for i in (0..self.level).rev() {
            while let Some(next) = self.node(node).levels[i].forward {
                let span = self.node(node).levels[i].span;
                if count + span < start {
                    count += span;
                    node = next;
                } else {
                    break;
                }
            }
            update[i] = node;
        }

        count += 1;
        let mut cursor = self.node(node).levels[0].forward;
        while let Some(c) = cursor {
            if count >= stop {
                break;
            }
            let next = self.node(c).levels[0].forward;
            removed.push(self.element(c));
            self.remove_node(c, &update);
            cursor = next;
            count += 1;
        }
        removed
    }
}

impl Default for SkipList {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn m(s: &str) -> Bytes {
        Bytes::copy_from_slice(s.as_bytes())
    }

    fn filled() -> SkipList {
        let mut list = SkipList::new();
        for (member, score) in [("a", 1.0), ("b", 2.0), ("c", 3.0), ("d", 4.0), ("e", 5.0)] {
            list.insert(m(member), score);
        }
        list
    }

    fn members_in_order(list: &SkipList) -> Vec<String> {
        let mut out = Vec::new();
        let mut cursor = list.first();
        while let Some(idx) = cursor {
            out.push(String::from_utf8_lossy(&list.element(idx).member).into_owned());
            cursor = list.next(idx);
        }
        out
    }

    #[test]
    fn insert_keeps_order() {
        let mut list = SkipList::new();
        for (member, score) in [("c", 3.0), ("a", 1.0), ("e", 5.0), ("b", 2.0), ("d", 4.0)] {
            list.insert(m(member), score);
        }
        assert_eq!(members_in_order(&list), vec!["a", "b", "c", "d", "e"]);
        assert_eq!(list.len(), 5);
    }

    #[test]
    fn equal_scores_break_ties_by_member() {
        let mut list = SkipList::new();
        for member in ["delta", "alpha", "charlie", "bravo"] {
            list.insert(m(member), 7.0);
        }
        assert_eq!(
            members_in_order(&list),
            vec!["alpha", "bravo", "charlie", "delta"]
        );
    }

    #[test]
    fn rank_queries() {
        let list = filled();
        assert_eq!(list.rank_of(&m("a"), 1.0), 1);
        assert_eq!(list.rank_of(&m("c"), 3.0), 3);
        assert_eq!(list.rank_of(&m("e"), 5.0), 5);
        assert_eq!(list.rank_of(&m("missing"), 9.0), 0);

        assert_eq!(list.by_rank(0), None);
        assert_eq!(list.element(list.by_rank(1).unwrap()).member, m("a"));
        assert_eq!(list.element(list.by_rank(5).unwrap()).member, m("e"));
        assert_eq!(list.by_rank(6), None);
    }

    #[test]
    fn remove_updates_links_and_ranks() {
        let mut list = filled();
        assert!(list.remove(&m("c"), 3.0));
        assert!(!list.remove(&m("c"), 3.0));
        // wrong score does not remove
        assert!(!list.remove(&m("d"), 9.0));
        assert_eq!(members_in_order(&list), vec!["a", "b", "d", "e"]);
        assert_eq!(list.rank_of(&m("d"), 4.0), 3);
        assert_eq!(list.len(), 4);

        // backward chain survives
        let tail = list.tail().unwrap();
        assert_eq!(list.element(tail).member, m("e"));
        assert_eq!(list.element(list.prev(tail).unwrap()).member, m("d"));
    }

    #[test]
    fn score_range_lookups() {
        let list = filled();
        let b = |v| ScoreBorder::Value {
            value: v,
            exclusive: false,
        };
        let bx = |v| ScoreBorder::Value {
            value: v,
            exclusive: true,
        };

        let first = list.first_in_range(&b(2.0), &b(4.0)).unwrap();
        assert_eq!(list.element(first).member, m("b"));
        let last = list.last_in_range(&b(2.0), &b(4.0)).unwrap();
        assert_eq!(list.element(last).member, m("d"));

        // exclusive borders shrink the range
        let first = list.first_in_range(&bx(2.0), &b(4.0)).unwrap();
        assert_eq!(list.element(first).member, m("c"));
        let last = list.last_in_range(&b(2.0), &bx(4.0)).unwrap();
        assert_eq!(list.element(last).member, m("c"));

        // disjoint range
        assert_eq!(list.first_in_range(&b(10.0), &b(20.0)), None);
        assert_eq!(list.first_in_range(&b(4.0), &b(2.0)), None);
    }

    #[test]
    fn remove_range_by_score_returns_ascending() {
        let mut list = filled();
        let b = |v| ScoreBorder::Value {
            value: v,
            exclusive: false,
        };
        let removed = list.remove_range_by_score(&b(2.0), &b(4.0));
        let names: Vec<_> = removed.iter().map(|e| e.member.clone()).collect();
        assert_eq!(names, vec![m("b"), m("c"), m("d")]);
        assert_eq!(members_in_order(&list), vec!["a", "e"]);
        assert_eq!(list.rank_of(&m("e"), 5.0), 2);
    }

    #[test]
    fn remove_range_by_rank_is_half_open() {
        let mut list = filled();
        let removed = list.remove_range_by_rank(2, 4);
        let names: Vec<_> = removed.iter().map(|e| e.member.clone()).collect();
        assert_eq!(names, vec![m("b"), m("c")]);
        assert_eq!(members_in_order(&list), vec!["a", "d", "e"]);

        assert!(list.remove_range_by_rank(3, 3).is_empty());
    }

    #[test]
    fn arena_reuses_freed_slots() {
        let mut list = SkipList::new();
        for i in 0..64 {
            list.insert(m(&format!("m{i:02}")), i as f64);
        }
        for i in 0..64 {
            assert!(list.remove(&m(&format!("m{i:02}")), i as f64));
        }
        let arena_size = list.nodes.len();
        for i in 0..64 {
            list.insert(m(&format!("n{i:02}")), i as f64);
        }
        assert_eq!(list.nodes.len(), arena_size, "freed nodes should be reused");
        assert_eq!(list.len(), 64);
    }

    #[test]
    fn spans_agree_with_a_reference_ordering() {
        // randomized cross-check: ranks must match a sorted vector
        let mut list = SkipList::new();
        let mut reference: Vec<(f64, String)> = Vec::new();
        let mut state: u64 = 0x9e37_79b9;
        for i in 0..200 {
            // cheap deterministic pseudo-random scores
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let score = (state >> 33) as f64 / 1e6;
            let member = format!("k{i:03}");
            list.insert(m(&member), score);
            reference.push((score, member));
        }
        reference.sort_by(|a, b| a.partial_cmp(b).unwrap());
        for (expected_rank, (score, member)) in reference.iter().enumerate() {
            assert_eq!(
                list.rank_of(&m(member), *score),
                expected_rank as u64 + 1,
                "rank mismatch for {member}"
            );
        }
    }
}
