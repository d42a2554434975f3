//! Singly-linked run queue threaded through slot indices.

#[derive(Debug)]
pub(super) struct TaskQueue {
    head: Option<u16>,
    tail: Option<u16>,
    next: Box<[Option<u16>]>,
    len: usize,
}

impl TaskQueue {
    pub(super) fn new(capacity: usize) -> Self {
        Self {
            head: None,
            tail: None,
            next: vec![None; capacity].into_boxed_slice(),
            len: 0,
        }
    }

    pub(super) fn len(&self) -> usize {
        self.len
    }

    /// Append a slot index. The index must not already be linked.
    pub(super) fn push_back(&mut self, index: usize) {
        let Ok(link) = u16::try_from(index) else {
            return;
        };
        self.next[index] = None;
        match self.tail {
            Some(tail) => self.next[usize::from(tail)] = Some(link),
            None => self.head = Some(link),
        }
        self.tail = Some(link);
        self.len += 1;
    }

    /// Remove a slot index from the queue. Returns false if it was not linked.
    pub(super) fn unlink(&mut self, index: usize) -> bool {
        let mut prev: Option<u16> = None;
        let mut cursor = self.head;
        while let Some(current) = cursor {
            let after = self.next[usize::from(current)];
            if usize::from(current) == index {
                match prev {
                    Some(prev) => self.next[usize::from(prev)] = after,
                    None => self.head = after,
                }
                if self.tail == Some(current) {
                    self.tail = prev;
                }
                self.next[index] = None;
                self.len -= 1;
                return true;
            }
            prev = Some(current);
            cursor = after;
        }
        false
    }

    /// Slot indices in queue order.
    pub(super) fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        let mut cursor = self.head;
        std::iter::from_fn(move || {
            let current = cursor?;
            cursor = self.next[usize::from(current)];
            Some(usize::from(current))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(queue: &TaskQueue) -> Vec<usize> {
        queue.iter().collect()
    }

    #[test]
    fn keeps_insertion_order() {
        let mut queue = TaskQueue::new(4);
        queue.push_back(2);
        queue.push_back(0);
        queue.push_back(3);
        assert_eq!(order(&queue), vec![2, 0, 3]);
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn unlink_head_middle_and_tail() {
        let mut queue = TaskQueue::new(4);
        for index in 0..4 {
            queue.push_back(index);
        }
        assert!(queue.unlink(0));
        assert!(queue.unlink(2));
        assert!(queue.unlink(3));
        assert_eq!(order(&queue), vec![1]);
        queue.push_back(3);
        assert_eq!(order(&queue), vec![1, 3]);
    }

    #[test]
    fn unlink_missing_index_is_reported() {
        let mut queue = TaskQueue::new(2);
        queue.push_back(0);
        assert!(!queue.unlink(1));
        assert!(queue.unlink(0));
        assert!(!queue.unlink(0));
        assert_eq!(queue.len(), 0);
        assert!(order(&queue).is_empty());
    }
}
