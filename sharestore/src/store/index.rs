//! The in-memory document index of a share.

use std::{
    cmp::Ordering,
    collections::{btree_map, btree_set, BTreeMap, BTreeSet},
    ops::Bound,
};

use crate::doc::{Document, DocumentId};

use super::{
    query::{HistoryMode, Query, SortBy},
    snapshot::{MalformedSnapshot, Snapshot, SnapshotData},
};

/// In-memory index over the documents of one share.
///
/// Documents are stored once, grouped by path and ordered newest first within each path.
/// That single map is the authoritative store: the by-path-and-author view is its
/// flattening and the latest document of a path is the head of its group. The by-local-index
/// set is derived from it and updated in the same `&mut self` call.
///
/// The index has no internal locking.
#[derive(Debug, Clone, Default)]
pub struct DocumentIndex {
    /// Documents by path, newest first, at most one per author.
    paths: BTreeMap<String, Vec<Document>>,
    /// (local index, id) of every document.
    by_local_index: BTreeSet<(u64, DocumentId)>,
    len: usize,
    max_local_index: Option<u64>,
}

/// Order of documents at the same path: newest timestamp first, equal timestamps broken
/// by the lexicographically greatest author first.
pub fn newest_first(a: &Document, b: &Document) -> Ordering {
    b.timestamp
        .cmp(&a.timestamp)
        .then_with(|| b.author.cmp(&a.author))
}

impl DocumentIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a document, replacing the document with the same path and author.
    ///
    /// Returns the replaced document, if any.
    pub fn upsert(&mut self, doc: Document) -> Option<Document> {
        let docs = self.paths.entry(doc.path.clone()).or_default();
        let replaced = docs
            .iter()
            .position(|d| d.author == doc.author)
            .map(|pos| docs.remove(pos));
        match &replaced {
            Some(old) => {
                self.by_local_index.remove(&(old.local_index, old.id()));
            }
            None => self.len += 1,
        }
        let pos = docs.partition_point(|d| newest_first(d, &doc) == Ordering::Less);
        self.by_local_index.insert((doc.local_index, doc.id()));
        self.max_local_index = self.max_local_index.max(Some(doc.local_index));
        docs.insert(pos, doc);
        replaced
    }

    /// Highest local index of all documents ever upserted, `None` if the index is empty.
    pub fn max_local_index(&self) -> Option<u64> {
        self.max_local_index
    }

    /// Number of documents.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the index holds no documents.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Get the document of `author` at `path`.
    pub fn get(&self, path: &str, author: &str) -> Option<&Document> {
        self.paths.get(path)?.iter().find(|d| d.author == author)
    }

    /// Get the newest document at `path`.
    pub fn latest(&self, path: &str) -> Option<&Document> {
        self.paths.get(path)?.first()
    }

    /// All documents at `path`, newest first.
    pub fn newest_first(&self, path: &str) -> &[Document] {
        self.paths.get(path).map(Vec::as_slice).unwrap_or_default()
    }

    /// Iterate over all paths with their documents, newest first.
    pub fn paths(&self) -> impl Iterator<Item = (&str, &[Document])> {
        self.paths.iter().map(|(p, docs)| (p.as_str(), docs.as_slice()))
    }

    /// Run a query.
    ///
    /// The returned iterator is lazy; clone it to restart from the beginning.
    pub fn query<'a>(&'a self, query: &'a Query) -> QueryIter<'a> {
        let cursor = match query.sort_by {
            SortBy::Path => Cursor::Path {
                paths: self.paths.range::<str, _>(query.filter_path.range()),
                current: [].iter(),
            },
            SortBy::LocalIndex => {
                let start = match query.start_after_local_index {
                    // (after, default id) sorts before every id with that local index
                    Some(after) => after.checked_add(1).map(|s| (s, DocumentId::default())),
                    None => Some((0, DocumentId::default())),
                };
                let ids = match start {
                    Some(start) => self.by_local_index.range(start..),
                    None => self
                        .by_local_index
                        .range((Bound::Excluded(self.last_id()), Bound::Unbounded)),
                };
                Cursor::LocalIndex { ids }
            }
        };
        QueryIter {
            index: self,
            query,
            cursor,
            emitted: 0,
        }
    }

    fn last_id(&self) -> (u64, DocumentId) {
        self.by_local_index
            .last()
            .cloned()
            .unwrap_or((u64::MAX, DocumentId::default()))
    }

    /// Remove all documents.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Export the full state of the index.
    pub fn snapshot_all(&self) -> Snapshot<'_> {
        let by_path_and_author = self
            .paths
            .values()
            .flatten()
            .map(|doc| (doc.id().to_composite(), doc))
            .collect();
        let by_path_newest_first = self
            .paths
            .iter()
            .map(|(path, docs)| (path.as_str(), docs.as_slice()))
            .collect();
        let latest_by_path = self
            .paths
            .iter()
            .filter_map(|(path, docs)| Some((path.as_str(), docs.first()?)))
            .collect();
        Snapshot {
            by_path_and_author,
            by_path_newest_first,
            latest_by_path,
            max_local_index: self.max_local_index,
        }
    }

    /// Rebuild an index from exported state.
    ///
    /// Every view is derived from the by-path-and-author documents, so snapshots written
    /// with a different ordering restore to the same state as replaying the documents.
    /// The maximum local index is recomputed from the documents and raised to the stored
    /// counter, so it never moves backwards across a restore even if documents were
    /// replaced by ones with lower local indices.
    pub fn restore_all(data: SnapshotData) -> Result<Self, MalformedSnapshot> {
        let mut index = Self::default();
        for (composite, doc) in data.by_path_and_author {
            if DocumentId::from_composite(&composite).as_ref() != Some(&doc.id()) {
                return Err(MalformedSnapshot::KeyMismatch { key: composite });
            }
            index.upsert(doc);
        }
        if !index.is_empty() {
            index.max_local_index = index.max_local_index.max(data.max_local_index);
        }
        Ok(index)
    }
}

/// Iterator over the results of a [`Query`].
#[derive(Debug, Clone)]
pub struct QueryIter<'a> {
    index: &'a DocumentIndex,
    query: &'a Query,
    cursor: Cursor<'a>,
    emitted: u64,
}

#[derive(Debug, Clone)]
enum Cursor<'a> {
    Path {
        paths: btree_map::Range<'a, String, Vec<Document>>,
        current: std::slice::Iter<'a, Document>,
    },
    LocalIndex {
        ids: btree_set::Range<'a, (u64, DocumentId)>,
    },
}

impl<'a> QueryIter<'a> {
    fn next_candidate(&mut self) -> Option<&'a Document> {
        match &mut self.cursor {
            Cursor::Path { paths, current } => loop {
                if let Some(doc) = current.next() {
                    return Some(doc);
                }
                let (path, docs) = paths.next()?;
                if !self.query.filter_path.matches(path) {
                    // paths are ordered, no later path can match a prefix either
                    return None;
                }
                *current = match self.query.history {
                    HistoryMode::All => docs.iter(),
                    HistoryMode::Latest => docs[..docs.len().min(1)].iter(),
                };
            },
            Cursor::LocalIndex { ids } => loop {
                let (_, id) = ids.next()?;
                if !self.query.filter_path.matches(id.path()) {
                    continue;
                }
                let doc = match self.query.history {
                    HistoryMode::All => self.index.get(id.path(), id.author()),
                    HistoryMode::Latest => self
                        .index
                        .latest(id.path())
                        .filter(|doc| doc.author == id.author()),
                };
                if let Some(doc) = doc {
                    return Some(doc);
                }
            },
        }
    }
}

impl<'a> Iterator for QueryIter<'a> {
    type Item = &'a Document;

    fn next(&mut self) -> Option<Self::Item> {
        if self.query.limit.is_some_and(|limit| self.emitted >= limit) {
            return None;
        }
        loop {
            let doc = self.next_candidate()?;
            if self.query.matches(doc) {
                self.emitted += 1;
                return Some(doc);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::doc::tests::doc;

    fn paths(iter: QueryIter<'_>) -> Vec<(String, String)> {
        iter.map(|d| (d.path.clone(), d.author.clone())).collect()
    }

    #[test]
    fn test_upsert_and_views() {
        let mut index = DocumentIndex::new();
        assert_eq!(index.max_local_index(), None);

        let suzy = doc("/a", "@suzy", 100, 0);
        assert_eq!(index.upsert(suzy.clone()), None);
        assert_eq!(index.max_local_index(), Some(0));
        assert_eq!(index.latest("/a"), Some(&suzy));

        let timmy = doc("/a", "@timmy", 200, 1);
        index.upsert(timmy.clone());
        assert_eq!(index.newest_first("/a"), &[timmy.clone(), suzy.clone()]);
        assert_eq!(index.latest("/a"), Some(&timmy));
        assert_eq!(index.max_local_index(), Some(1));
        assert_eq!(index.len(), 2);

        // a newer document by suzy replaces hers and takes the lead
        let suzy2 = doc("/a", "@suzy", 300, 2);
        assert_eq!(index.upsert(suzy2.clone()), Some(suzy));
        assert_eq!(index.newest_first("/a"), &[suzy2.clone(), timmy]);
        assert_eq!(index.len(), 2);
        assert_eq!(index.get("/a", "@suzy"), Some(&suzy2));

        index.clear();
        assert!(index.is_empty());
        assert_eq!(index.max_local_index(), None);
        assert_eq!(index.latest("/a"), None);
    }

    #[test]
    fn test_tie_break_by_author() {
        let mut index = DocumentIndex::new();
        index.upsert(doc("/a", "@bob", 100, 0));
        index.upsert(doc("/a", "@zed", 100, 1));
        index.upsert(doc("/a", "@amy", 100, 2));
        let authors: Vec<_> = index
            .newest_first("/a")
            .iter()
            .map(|d| d.author.as_str())
            .collect();
        assert_eq!(authors, ["@zed", "@bob", "@amy"]);
        assert_eq!(index.latest("/a").unwrap().author, "@zed");
    }

    #[test]
    fn test_query_filters() {
        let mut index = DocumentIndex::new();
        index.upsert(doc("/a", "@suzy", 100, 0));
        index.upsert(doc("/a", "@timmy", 200, 1));
        index.upsert(doc("/ab", "@suzy", 50, 2));
        index.upsert(doc("/b", "@timmy", 10, 3));
        index.upsert(doc("/", "@suzy", 10, 4));

        let q = Query::path_exact("/a").build();
        assert_eq!(
            paths(index.query(&q)),
            [("/a".into(), "@timmy".into()), ("/a".into(), "@suzy".into())]
        );

        let q = Query::path_prefix("/a").build();
        assert_eq!(index.query(&q).count(), 3);

        let q = Query::author("@suzy").build();
        assert_eq!(index.query(&q).count(), 3);

        let q = Query::all().timestamp_range(50..200).build();
        assert_eq!(
            paths(index.query(&q)),
            [("/a".into(), "@suzy".into()), ("/ab".into(), "@suzy".into())]
        );

        // the latest document of /a is timmy's, so suzy has no latest document there
        let q = Query::latest().path_exact("/a").author("@suzy").build();
        assert_eq!(index.query(&q).count(), 0);
        let q = Query::latest().path_prefix("/a").build();
        assert_eq!(
            paths(index.query(&q)),
            [("/a".into(), "@timmy".into()), ("/ab".into(), "@suzy".into())]
        );

        let q = Query::all().limit(2).build();
        assert_eq!(index.query(&q).count(), 2);
        let q = Query::path_exact("/missing").build();
        assert_eq!(index.query(&q).count(), 0);
    }

    #[test]
    fn test_query_by_local_index() {
        let mut index = DocumentIndex::new();
        index.upsert(doc("/b", "@suzy", 100, 0));
        index.upsert(doc("/a", "@suzy", 100, 1));
        index.upsert(doc("/a", "@timmy", 200, 2));
        // replacing moves the document to its new local index
        index.upsert(doc("/b", "@suzy", 300, 3));

        let q = Query::all().sort_by(SortBy::LocalIndex).build();
        let indices: Vec<_> = index.query(&q).map(|d| d.local_index).collect();
        assert_eq!(indices, [1, 2, 3]);

        let q = Query::all()
            .sort_by(SortBy::LocalIndex)
            .start_after_local_index(1)
            .build();
        let indices: Vec<_> = index.query(&q).map(|d| d.local_index).collect();
        assert_eq!(indices, [2, 3]);

        let q = Query::latest().sort_by(SortBy::LocalIndex).build();
        let indices: Vec<_> = index.query(&q).map(|d| d.local_index).collect();
        assert_eq!(indices, [2, 3]);

        let q = Query::all()
            .sort_by(SortBy::LocalIndex)
            .start_after_local_index(u64::MAX)
            .build();
        assert_eq!(index.query(&q).count(), 0);
    }

    #[test]
    fn test_query_is_restartable() {
        let mut index = DocumentIndex::new();
        index.upsert(doc("/a", "@suzy", 100, 0));
        index.upsert(doc("/b", "@suzy", 100, 1));
        let q = Query::all().build();
        let mut iter = index.query(&q);
        let restart = iter.clone();
        assert!(iter.next().is_some());
        assert_eq!(restart.count(), 2);
        assert_eq!(iter.count(), 1);
    }

    #[test]
    fn test_restore_rejects_mismatched_keys() {
        let mut index = DocumentIndex::new();
        index.upsert(doc("/a", "@suzy", 100, 0));
        let mut data = index.snapshot_all().to_data();
        let doc = data.by_path_and_author.pop_first().unwrap().1;
        data.by_path_and_author.insert("@timmy|/a".into(), doc);
        assert!(DocumentIndex::restore_all(data).is_err());
    }

    #[test]
    fn test_restore_keeps_max_of_replaced_docs() {
        let mut index = DocumentIndex::new();
        index.upsert(doc("/a", "@suzy", 100, 5));
        index.upsert(doc("/a", "@suzy", 200, 3));
        assert_eq!(index.max_local_index(), Some(5));

        let data = index.snapshot_all().to_data();
        assert_eq!(data.max_local_index, Some(5));
        let restored = DocumentIndex::restore_all(data.clone()).unwrap();
        assert_eq!(restored.max_local_index(), Some(5));

        // snapshots without a counter fall back to the documents
        let restored = DocumentIndex::restore_all(SnapshotData {
            max_local_index: None,
            ..data
        })
        .unwrap();
        assert_eq!(restored.max_local_index(), Some(3));
    }

    fn arb_doc() -> impl Strategy<Value = Document> {
        (
            prop::sample::select(vec!["/a", "/a/b", "/b", "/c/d"]),
            prop::sample::select(vec!["@amy", "@bob", "@suzy", "@timmy"]),
            0u64..5,
            0u64..1000,
        )
            .prop_map(|(path, author, timestamp, local_index)| {
                doc(path, author, timestamp, local_index)
            })
    }

    fn assert_views_consistent(index: &DocumentIndex) {
        let mut count = 0;
        for (path, docs) in index.paths() {
            assert!(!docs.is_empty());
            for pair in docs.windows(2) {
                assert_eq!(newest_first(&pair[0], &pair[1]), Ordering::Less);
            }
            let mut authors: Vec<_> = docs.iter().map(|d| &d.author).collect();
            authors.sort();
            authors.dedup();
            assert_eq!(authors.len(), docs.len());
            assert_eq!(index.latest(path), docs.first());
            count += docs.len();
        }
        assert_eq!(count, index.len());
        assert_eq!(index.by_local_index.len(), index.len());
    }

    proptest! {
        #[test]
        fn index_invariants(docs in prop::collection::vec(arb_doc(), 0..40)) {
            let mut index = DocumentIndex::new();
            for doc in &docs {
                index.upsert(doc.clone());
                assert_views_consistent(&index);
            }
            let expected = docs.iter().map(|d| d.local_index).max();
            prop_assert_eq!(index.max_local_index(), expected);
        }

        #[test]
        fn upsert_is_idempotent(docs in prop::collection::vec(arb_doc(), 1..20)) {
            let mut index = DocumentIndex::new();
            for doc in &docs {
                index.upsert(doc.clone());
            }
            let last = docs.last().unwrap().clone();
            let before = index.snapshot_all().to_data();
            index.upsert(last);
            prop_assert_eq!(index.snapshot_all().to_data(), before);
        }

        #[test]
        fn snapshot_restore(docs in prop::collection::vec(arb_doc(), 0..40)) {
            let mut index = DocumentIndex::new();
            for doc in &docs {
                index.upsert(doc.clone());
            }
            let data = index.snapshot_all().to_data();
            let restored = DocumentIndex::restore_all(data.clone()).unwrap();
            prop_assert_eq!(restored.snapshot_all().to_data(), data);
            prop_assert_eq!(restored.max_local_index(), index.max_local_index());
        }
    }
}
