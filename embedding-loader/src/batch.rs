/// Accumulates items into batches of a fixed capacity.
///
/// `push` hands back the batch the moment it fills up, and `finish` hands back whatever is left.
/// Every batch but the last one produced by a `Batcher` therefore has exactly `capacity` items.
#[derive(Debug)]
pub struct Batcher<T> {
    capacity: usize,
    items: Vec<T>,
}

impl<T> Batcher<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            items: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, item: T) -> Option<Vec<T>> {
        self.items.push(item);
        if self.items.len() >= self.capacity {
            Some(std::mem::replace(
                &mut self.items,
                Vec::with_capacity(self.capacity),
            ))
        } else {
            None
        }
    }

    /// The final partial batch, if any.
    pub fn finish(self) -> Option<Vec<T>> {
        if self.items.is_empty() {
            None
        } else {
            Some(self.items)
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
