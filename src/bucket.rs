use crate::{common, IndexEntry, IndexError};

use parking_lot::Mutex;
use std::{mem, sync::Arc};

pub(crate) struct ChainNode<E> {
    entry: Arc<E>,
    hash: u32,
    next: Option<Box<ChainNode<E>>>,
}

impl<E> ChainNode<E> {
    pub(crate) fn hash(&self) -> u32 {
        self.hash
    }
}

/// A singly linked collision chain. Nodes are boxed and only ever owned by one
/// chain; moving a node to another chain transfers the box.
pub(crate) struct Chain<E> {
    head: Option<Box<ChainNode<E>>>,
}

impl<E> Default for Chain<E> {
    fn default() -> Self {
        Self { head: None }
    }
}

impl<E> Drop for Chain<E> {
    fn drop(&mut self) {
        // Unlink iteratively. The default drop would recurse once per node.
        let mut link = self.head.take();
        while let Some(mut node) = link {
            link = node.next.take();
        }
    }
}

impl<E: IndexEntry> Chain<E> {
    pub(crate) fn find(&self, key: &[u8]) -> Option<&Arc<E>> {
        let mut link = &self.head;
        while let Some(node) = link {
            if node.entry.key() == key {
                return Some(&node.entry);
            }
            link = &node.next;
        }
        None
    }

    pub(crate) fn push(&mut self, entry: Arc<E>, hash: u32) {
        self.push_node(Box::new(ChainNode {
            entry,
            hash,
            next: None,
        }));
    }

    /// Unlinks the first node with the given key and returns its entry.
    pub(crate) fn remove(&mut self, key: &[u8]) -> Option<Arc<E>> {
        let mut link = &mut self.head;
        while link.as_ref().map_or(false, |node| node.entry.key() != key) {
            link = &mut link.as_mut()?.next;
        }
        // `link` now points at the matching node, or at the end of the chain.
        let mut node = link.take()?;
        *link = node.next.take();
        Some(node.entry)
    }
}

impl<E> Chain<E> {
    pub(crate) fn push_node(&mut self, mut node: Box<ChainNode<E>>) {
        node.next = self.head.take();
        self.head = Some(node);
    }

    pub(crate) fn pop_node(&mut self) -> Option<Box<ChainNode<E>>> {
        let mut node = self.head.take()?;
        self.head = node.next.take();
        Some(node)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        let mut len = 0;
        let mut link = &self.head;
        while let Some(node) = link {
            len += 1;
            link = &node.next;
        }
        len
    }

    #[cfg(test)]
    pub(crate) fn keys(&self) -> Vec<Vec<u8>>
    where
        E: IndexEntry,
    {
        let mut keys = Vec::new();
        let mut link = &self.head;
        while let Some(node) = link {
            keys.push(node.entry.key().to_vec());
            link = &node.next;
        }
        keys
    }
}

/// A power-of-two array of chain heads.
pub(crate) struct BucketArray<E> {
    buckets: Box<[Mutex<Chain<E>>]>,
    hash_power: u8,
}

impl<E> BucketArray<E> {
    pub(crate) fn try_with_hash_power(hash_power: u8) -> Result<Self, IndexError> {
        let length = 1usize
            .checked_shl(hash_power as u32)
            .ok_or(IndexError::Allocation { hash_power })?;

        let mut buckets = Vec::new();
        buckets
            .try_reserve_exact(length)
            .map_err(|_| IndexError::Allocation { hash_power })?;
        buckets.extend(std::iter::repeat_with(Default::default).take(length));

        Ok(Self {
            buckets: buckets.into_boxed_slice(),
            hash_power,
        })
    }

    pub(crate) fn hash_power(&self) -> u8 {
        self.hash_power
    }

    pub(crate) fn len(&self) -> usize {
        self.buckets.len()
    }

    pub(crate) fn mask(&self) -> usize {
        common::mask(self.hash_power)
    }

    pub(crate) fn byte_size(&self) -> u64 {
        (self.buckets.len() * mem::size_of::<Mutex<Chain<E>>>()) as u64
    }

    pub(crate) fn bucket(&self, index: usize) -> &Mutex<Chain<E>> {
        &self.buckets[index]
    }

    /// Moves every node of bucket `index` into `dest`, placing each node by its
    /// hash under `dest`'s mask.
    pub(crate) fn move_bucket(&self, index: usize, dest: &BucketArray<E>) -> usize {
        let mut chain = self.buckets[index].lock();
        let mut moved = 0;
        while let Some(node) = chain.pop_node() {
            let dest_index = node.hash() as usize & dest.mask();
            dest.bucket(dest_index).lock().push_node(node);
            moved += 1;
        }
        debug_assert!(chain.is_empty());
        moved
    }
}
