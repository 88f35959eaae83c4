//! Documents stored in a share.

use serde::{Deserialize, Serialize};

use crate::keys::ShareAddress;

/// A versioned, authored, path-addressed document.
///
/// Documents reach the store already validated and with their conflicts resolved. The
/// store only looks at [`Self::path`], [`Self::author`], [`Self::timestamp`] and
/// [`Self::local_index`]; everything else is carried along untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    /// Document format identifier, e.g. `es.5`.
    pub format: String,
    /// Address of the author that signed this document.
    pub author: String,
    /// Path of the document inside its share, always starting with `/`.
    pub path: String,
    /// Share this document belongs to.
    pub share: ShareAddress,
    /// Logical timestamp used to order documents at the same path.
    pub timestamp: u64,
    /// Text content.
    pub text: String,
    /// Hash of [`Self::text`].
    pub text_hash: String,
    /// Signature over the document.
    pub signature: String,
    /// Optional expiry timestamp for ephemeral documents.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_after: Option<u64>,
    /// Index assigned by the local replica when the document was ingested.
    #[serde(rename = "_localIndex")]
    pub local_index: u64,
}

impl Document {
    /// Identifier of this document within its share.
    pub fn id(&self) -> DocumentId {
        DocumentId::new(&self.path, &self.author)
    }
}

/// Identifier of a document: its path and its author.
///
/// Ordered by path first, so a range of ids covers a range of paths.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DocumentId {
    path: String,
    author: String,
}

/// Separator of the composite `author|path` form of a [`DocumentId`].
///
/// Author addresses never contain it, so splitting at the first occurrence is unambiguous.
pub(crate) const ID_SEPARATOR: char = '|';

impl DocumentId {
    /// Create a new identifier.
    pub fn new(path: impl Into<String>, author: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            author: author.into(),
        }
    }

    /// The path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The author.
    pub fn author(&self) -> &str {
        &self.author
    }

    /// Composite string form used as the key of the persisted by-path-and-author map.
    pub fn to_composite(&self) -> String {
        format!("{}{ID_SEPARATOR}{}", self.author, self.path)
    }

    /// Parse the composite string form produced by [`Self::to_composite`].
    pub fn from_composite(s: &str) -> Option<Self> {
        let (author, path) = s.split_once(ID_SEPARATOR)?;
        Some(Self::new(path, author))
    }
}
