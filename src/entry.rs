/// A cache entry that can be threaded into the index.
///
/// The index never allocates, frees or mutates entries. It only reads their keys
/// and keeps an `Arc` to each indexed entry until the entry is deleted.
pub trait IndexEntry {
    /// The key bytes of this entry. The index compares keys by length and then
    /// by content.
    fn key(&self) -> &[u8];
}

impl IndexEntry for Vec<u8> {
    fn key(&self) -> &[u8] {
        self
    }
}

impl IndexEntry for Box<[u8]> {
    fn key(&self) -> &[u8] {
        self
    }
}

impl IndexEntry for String {
    fn key(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl IndexEntry for &'static [u8] {
    fn key(&self) -> &[u8] {
        self
    }
}
