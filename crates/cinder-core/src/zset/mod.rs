//! Sorted set: a member→score map paired with a skip list.
//!
//! The hash map answers point lookups in O(1); the skip list keeps
//! members ordered by `(score, member)` for rank and range queries.
//! Both indexes always hold exactly the same membership.

mod border;
mod skiplist;

pub use border::ScoreBorder;
pub use skiplist::Element;

use std::collections::HashMap;

use bytes::Bytes;

use skiplist::SkipList;

#[derive(Debug, Clone)]
pub struct SortedSet {
    scores: HashMap<Bytes, f64>,
    list: SkipList,
}

impl SortedSet {
    pub fn new() -> Self {
        Self {
            scores: HashMap::new(),
            list: SkipList::new(),
        }
    }

    pub fn len(&self) -> u64 {
        self.scores.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    /// Adds a member or updates its score. Returns `true` when the
    /// member is new.
    pub fn add(&mut self, member: Bytes, score: f64) -> bool {
        match self.scores.insert(member.clone(), score) {
            Some(old_score) => {
                if old_score != score {
                    self.list.remove(&member, old_score);
                    self.list.insert(member, score);
                }
                false
            }
            None => {
                self.list.insert(member, score);
                true
            }
        }
    }

    /// Removes a member. Returns whether it was present.
    pub fn remove(&mut self, member: &Bytes) -> bool {
        match self.scores.remove(member) {
            Some(score) => {
                self.list.remove(member, score);
                true
            }
            None => false,
        }
    }

    pub fn score(&self, member: &Bytes) -> Option<f64> {
        self.scores.get(member).copied()
    }

    /// 0-based rank of a member, lowest score first — or highest first
    /// when `desc`.
    pub fn rank(&self, member: &Bytes, desc: bool) -> Option<u64> {
        let score = self.score(member)?;
        let rank = self.list.rank_of(member, score);
        if rank == 0 {
            return None;
        }
        Some(if desc { self.len() - rank } else { rank - 1 })
    }

    /// Visits members with 0-based ranks in `[start, stop)`, in rank
    /// order (reversed when `desc`). The consumer returns `false` to
    /// stop early.
    pub fn for_each_in_rank_range(
        &self,
        start: u64,
        stop: u64,
        desc: bool,
        mut consumer: impl FnMut(&Element) -> bool,
    ) {
        let size = self.len();
        if start >= size || stop <= start {
            return;
        }
        let stop = stop.min(size);

        let mut cursor = if desc {
            // 0-based rank r from the top is 1-based rank size - r
            self.list.by_rank(size - start)
        } else {
            self.list.by_rank(start + 1)
        };
        let mut remaining = stop - start;
        while let Some(idx) = cursor {
            if remaining == 0 {
                break;
            }
            remaining -= 1;
            if !consumer(&self.list.element(idx)) {
                break;
            }
            cursor = if desc {
                self.list.prev(idx)
            } else {
                self.list.next(idx)
            };
        }
    }

    /// Members with 0-based ranks in `[start, stop)`.
    pub fn range_by_rank(&self, start: u64, stop: u64, desc: bool) -> Vec<Element> {
        let mut out = Vec::new();
        self.for_each_in_rank_range(start, stop, desc, |element| {
            out.push(element.clone());
            true
        });
        out
    }

    /// Number of members with scores inside `[min, max]`.
    pub fn count_by_score(&self, min: &ScoreBorder, max: &ScoreBorder) -> u64 {
        let mut count = 0;
        self.for_each_in_rank_range(0, self.len(), false, |element| {
            if !min.less(element.score) {
                // below the range, keep scanning
                return true;
            }
            if !max.greater(element.score) {
                // past the range, stop
                return false;
            }
            count += 1;
            true
        });
        count
    }

    /// Visits members with scores inside `[min, max]`, skipping
    /// `offset` and yielding at most `limit` (negative = unlimited).
    pub fn for_each_by_score(
        &self,
        min: &ScoreBorder,
        max: &ScoreBorder,
        offset: u64,
        limit: i64,
        desc: bool,
        mut consumer: impl FnMut(&Element) -> bool,
    ) {
        let mut cursor = if desc {
            self.list.last_in_range(min, max)
        } else {
            self.list.first_in_range(min, max)
        };

        let step = |idx: u32| {
            if desc {
                self.list.prev(idx)
            } else {
                self.list.next(idx)
            }
        };

        let mut skipped = 0;
        while let Some(idx) = cursor {
            if skipped == offset {
                break;
            }
            skipped += 1;
            cursor = step(idx);
        }

        let mut yielded: i64 = 0;
        while let Some(idx) = cursor {
            if limit >= 0 && yielded >= limit {
                break;
            }
            let element = self.list.element(idx);
            if !min.less(element.score) || !max.greater(element.score) {
                break;
            }
            if !consumer(&element) {
                break;
            }
            yielded += 1;
            cursor = step(idx);
        }
    }

    /// Members with scores inside `[min, max]`, with offset/limit.
    pub fn range_by_score(
        &self,
        min: &ScoreBorder,
        max: &ScoreBorder,
        offset: u64,
        limit: i64,
        desc: bool,
    ) -> Vec<Element> {
        if limit == 0 {
            return Vec::new();
        }
        let mut out = Vec::new();
        self.for_each_by_score(min, max, offset, limit, desc, |element| {
            out.push(element.clone());
            true
        });
        out
    }

    /// Removes members with scores inside `[min, max]`. Returns how
    /// many were removed.
    pub fn remove_range_by_score(&mut self, min: &ScoreBorder, max: &ScoreBorder) -> u64 {
        let removed = self.list.remove_range_by_score(min, max);
        for element in &removed {
            self.scores.remove(&element.member);
        }
        removed.len() as u64
    }

    /// Removes members with 0-based ranks in `[start, stop)`. Returns
    /// how many were removed.
    pub fn remove_range_by_rank(&mut self, start: u64, stop: u64) -> u64 {
        let removed = self.list.remove_range_by_rank(start + 1, stop + 1);
        for element in &removed {
            self.scores.remove(&element.member);
        }
        removed.len() as u64
    }
}

impl Default for SortedSet {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for SortedSet {
    fn eq(&self, other: &Self) -> bool {
        self.scores == other.scores
    }
}
