//! Water parcels in pipes and tanks.
//!
//! Segments live in a pool arena and are addressed by index. A [`SegList`]
//! runs from `first` (the downstream, oldest parcel) to `last` (the upstream,
//! newest one). Freed segments go on a free list and are reused.

pub type SegId = usize;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Segment {
  /// Volume (ft3)
  pub v: f64,
  /// Concentration
  pub c: f64,
  next: Option<SegId>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SegList {
  pub first: Option<SegId>,
  pub last: Option<SegId>,
}

impl SegList {
  pub fn is_empty(&self) -> bool {
    self.first.is_none()
  }
}

#[derive(Debug, Clone)]
pub struct SegPool {
  segs: Vec<Segment>,
  free: Vec<SegId>,
  live: usize,
  limit: usize,
  /// Set once an allocation fails; stays set until `reset`
  pub out_of_memory: bool,
}

impl SegPool {
  pub fn new(limit: usize) -> Self {
    Self { segs: Vec::new(), free: Vec::new(), live: 0, limit, out_of_memory: false }
  }

  /// Drop every segment
  pub fn reset(&mut self) {
    self.segs.clear();
    self.free.clear();
    self.live = 0;
    self.out_of_memory = false;
  }

  /// Number of segments in use
  pub fn live(&self) -> usize {
    self.live
  }

  fn alloc(&mut self, v: f64, c: f64) -> Option<SegId> {
    if self.live >= self.limit {
      self.out_of_memory = true;
      return None;
    }
    self.live += 1;
    let seg = Segment { v, c, next: None };
    match self.free.pop() {
      Some(id) => {
        self.segs[id] = seg;
        Some(id)
      }
      None => {
        self.segs.push(seg);
        Some(self.segs.len() - 1)
      }
    }
  }

  fn release(&mut self, id: SegId) {
    self.live -= 1;
    self.free.push(id);
  }

  pub fn get(&self, id: SegId) -> &Segment {
    &self.segs[id]
  }

  pub fn get_mut(&mut self, id: SegId) -> &mut Segment {
    &mut self.segs[id]
  }

  /// Append a segment at the upstream end. Returns false when the pool is exhausted.
  pub fn push_back(&mut self, list: &mut SegList, v: f64, c: f64) -> bool {
    let Some(id) = self.alloc(v, c) else { return false };
    match list.last {
      Some(last) => self.segs[last].next = Some(id),
      None => list.first = Some(id),
    }
    list.last = Some(id);
    true
  }

  /// Insert a segment at the downstream end. Returns false when the pool is exhausted.
  pub fn push_front(&mut self, list: &mut SegList, v: f64, c: f64) -> bool {
    let Some(id) = self.alloc(v, c) else { return false };
    self.segs[id].next = list.first;
    list.first = Some(id);
    if list.last.is_none() {
      list.last = Some(id);
    }
    true
  }

  /// Remove the downstream segment and recycle it
  pub fn pop_front(&mut self, list: &mut SegList) -> Option<Segment> {
    let id = list.first?;
    let seg = self.segs[id];
    list.first = seg.next;
    if list.first.is_none() {
      list.last = None;
    }
    self.release(id);
    Some(seg)
  }

  /// Recycle every segment of a list
  pub fn clear(&mut self, list: &mut SegList) {
    while self.pop_front(list).is_some() {}
  }

  /// Reverse a list end to end, after its link's flow changed direction
  pub fn reverse(&mut self, list: &mut SegList) {
    let mut prev = None;
    let mut current = list.first;
    while let Some(id) = current {
      current = self.segs[id].next;
      self.segs[id].next = prev;
      prev = Some(id);
    }
    std::mem::swap(&mut list.first, &mut list.last);
  }

  /// Segment ids from downstream to upstream
  pub fn ids(&self, list: &SegList) -> impl Iterator<Item = SegId> + '_ {
    std::iter::successors(list.first, move |&id| self.segs[id].next)
  }

  pub fn iter(&self, list: &SegList) -> impl Iterator<Item = &Segment> + '_ {
    self.ids(list).map(move |id| &self.segs[id])
  }

  /// Visit every segment of a list from downstream to upstream
  pub fn for_each_mut<F: FnMut(&mut Segment)>(&mut self, list: &SegList, mut f: F) {
    let mut current = list.first;
    while let Some(id) = current {
      let seg = &mut self.segs[id];
      f(seg);
      current = seg.next;
    }
  }

  pub fn volume(&self, list: &SegList) -> f64 {
    self.iter(list).map(|s| s.v).sum()
  }

  pub fn mass(&self, list: &SegList) -> f64 {
    self.iter(list).map(|s| s.v * s.c).sum()
  }

  pub fn len(&self, list: &SegList) -> usize {
    self.ids(list).count()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn freed_segments_are_reused() {
    let mut pool = SegPool::new(10);
    let mut list = SegList::default();
    assert!(pool.push_back(&mut list, 1.0, 0.5));
    assert!(pool.push_back(&mut list, 2.0, 0.7));
    let first = pool.pop_front(&mut list).unwrap();
    assert_eq!(first.v, 1.0);
    assert!(pool.push_back(&mut list, 3.0, 0.9));
    assert_eq!(pool.live(), 2);
    // the recycled slot is handed out again
    assert_eq!(list.last, Some(0));
    assert_eq!(pool.volume(&list), 5.0);
  }

  #[test]
  fn reverse_swaps_ends() {
    let mut pool = SegPool::new(10);
    let mut list = SegList::default();
    for c in [1.0, 2.0, 3.0] {
      pool.push_back(&mut list, 1.0, c);
    }
    pool.reverse(&mut list);
    let order: Vec<f64> = pool.iter(&list).map(|s| s.c).collect();
    assert_eq!(order, vec![3.0, 2.0, 1.0]);
    assert_eq!(pool.get(list.last.unwrap()).c, 1.0);
  }

  #[test]
  fn exhausted_pool_sets_flag() {
    let mut pool = SegPool::new(1);
    let mut list = SegList::default();
    assert!(pool.push_front(&mut list, 1.0, 0.0));
    assert!(!pool.push_front(&mut list, 1.0, 0.0));
    assert!(pool.out_of_memory);
    pool.reset();
    assert!(!pool.out_of_memory);
    assert_eq!(pool.live(), 0);
  }

  mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
      #[test]
      fn live_count_matches_lists(ops in proptest::collection::vec(0u8..3, 1..200)) {
        let mut pool = SegPool::new(1000);
        let mut list = SegList::default();
        let mut expected = 0usize;
        for op in ops {
          match op {
            0 => { pool.push_back(&mut list, 1.0, 0.0); expected += 1; }
            1 => { pool.push_front(&mut list, 1.0, 0.0); expected += 1; }
            _ => { if pool.pop_front(&mut list).is_some() { expected -= 1; } }
          }
          prop_assert_eq!(pool.live(), expected);
          prop_assert_eq!(pool.len(&list), expected);
          prop_assert!((pool.volume(&list) - expected as f64).abs() < 1e-9);
        }
      }
    }
  }
}
