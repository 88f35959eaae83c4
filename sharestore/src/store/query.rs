//! Queries over the documents of a share.

use std::ops::{Bound, RangeBounds};

use crate::doc::Document;

/// A query builder for document queries.
#[derive(Debug, Default)]
pub struct QueryBuilder {
    query: Query,
}

impl QueryBuilder {
    /// Filter by exact path match.
    pub fn path_exact(mut self, path: impl Into<String>) -> Self {
        self.query.filter_path = PathFilter::Exact(path.into());
        self
    }
    /// Filter by path prefix.
    pub fn path_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.query.filter_path = PathFilter::Prefix(prefix.into());
        self
    }
    /// Filter by author.
    pub fn author(mut self, author: impl Into<String>) -> Self {
        self.query.filter_author = AuthorFilter::Exact(author.into());
        self
    }
    /// Only return documents whose timestamp lies within `range`.
    pub fn timestamp_range(mut self, range: impl RangeBounds<u64>) -> Self {
        self.query.filter_timestamp = (range.start_bound().cloned(), range.end_bound().cloned());
        self
    }
    /// Only return documents with a local index strictly greater than `local_index`.
    pub fn start_after_local_index(mut self, local_index: u64) -> Self {
        self.query.start_after_local_index = Some(local_index);
        self
    }
    /// Set the sort order.
    pub fn sort_by(mut self, sort_by: SortBy) -> Self {
        self.query.sort_by = sort_by;
        self
    }
    /// Set the maximum number of documents to be returned.
    pub fn limit(mut self, limit: u64) -> Self {
        self.query.limit = Some(limit);
        self
    }
    /// Build the query.
    pub fn build(self) -> Query {
        self.query
    }
}

impl From<QueryBuilder> for Query {
    fn from(builder: QueryBuilder) -> Query {
        builder.build()
    }
}

/// A query over documents.
///
/// Note: with [`HistoryMode::Latest`] the newest document of each path is selected
/// *before* the author and timestamp filters are applied, so a path whose newest document
/// does not match the filters yields nothing.
#[derive(Debug, Clone)]
pub struct Query {
    pub(crate) history: HistoryMode,
    pub(crate) filter_path: PathFilter,
    pub(crate) filter_author: AuthorFilter,
    pub(crate) filter_timestamp: (Bound<u64>, Bound<u64>),
    pub(crate) start_after_local_index: Option<u64>,
    pub(crate) sort_by: SortBy,
    pub(crate) limit: Option<u64>,
}

impl Default for Query {
    fn default() -> Self {
        Self {
            history: HistoryMode::All,
            filter_path: PathFilter::Any,
            filter_author: AuthorFilter::Any,
            filter_timestamp: (Bound::Unbounded, Bound::Unbounded),
            start_after_local_index: None,
            sort_by: SortBy::default(),
            limit: None,
        }
    }
}

impl Query {
    /// Query all documents, including every author's version of each path.
    pub fn all() -> QueryBuilder {
        QueryBuilder::default()
    }

    /// Query only the newest document of each path.
    pub fn latest() -> QueryBuilder {
        let mut builder = QueryBuilder::default();
        builder.query.history = HistoryMode::Latest;
        builder
    }

    /// Create a [`Query::all`] query filtered by a path prefix.
    pub fn path_prefix(prefix: impl Into<String>) -> QueryBuilder {
        Self::all().path_prefix(prefix)
    }

    /// Create a [`Query::all`] query filtered by a single path.
    pub fn path_exact(path: impl Into<String>) -> QueryBuilder {
        Self::all().path_exact(path)
    }

    /// Create a [`Query::all`] query filtered by a single author.
    pub fn author(author: impl Into<String>) -> QueryBuilder {
        Self::all().author(author)
    }

    /// Get the history mode of this query.
    pub fn history(&self) -> HistoryMode {
        self.history
    }

    /// Get the sort order of this query.
    pub fn sort_by(&self) -> SortBy {
        self.sort_by
    }

    /// Get the limit for this query (max. number of documents to emit).
    pub fn limit(&self) -> Option<u64> {
        self.limit
    }

    /// Test the filters of this query, except for the path filter, against a document.
    pub(crate) fn matches(&self, doc: &Document) -> bool {
        self.filter_author.matches(&doc.author)
            && self.filter_timestamp.contains(&doc.timestamp)
            && self
                .start_after_local_index
                .map_or(true, |after| doc.local_index > after)
    }
}

/// Which versions of a path a query returns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HistoryMode {
    /// Every author's document at each path.
    #[default]
    All,
    /// Only the newest document at each path.
    Latest,
}

/// Orders in which query results can be returned.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortBy {
    /// Ascending by path, and newest first within a path.
    #[default]
    Path,
    /// Ascending by local index, the order in which this replica ingested documents.
    LocalIndex,
}

/// Path matching.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum PathFilter {
    /// Matches any path.
    #[default]
    Any,
    /// Only paths that are exactly the provided value.
    Exact(String),
    /// All paths that start with the provided value.
    Prefix(String),
}

impl PathFilter {
    /// Test if a path is matched by this [`PathFilter`].
    pub fn matches(&self, path: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Exact(p) => p == path,
            Self::Prefix(p) => path.starts_with(p.as_str()),
        }
    }

    /// The range of paths that can match, in path order.
    pub(crate) fn range(&self) -> (Bound<&str>, Bound<&str>) {
        match self {
            Self::Any => (Bound::Unbounded, Bound::Unbounded),
            Self::Exact(p) => (Bound::Included(p.as_str()), Bound::Included(p.as_str())),
            Self::Prefix(p) => (Bound::Included(p.as_str()), Bound::Unbounded),
        }
    }
}

/// Author matching.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum AuthorFilter {
    /// Matches any author.
    #[default]
    Any,
    /// Matches exactly the provided author.
    Exact(String),
}

impl AuthorFilter {
    /// Test if an author is matched by this [`AuthorFilter`].
    pub fn matches(&self, author: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Exact(a) => a == author,
        }
    }
}
