//! Cursor-based pagination
//!
//! A page is a window over `filter` ordered by `(sort field, _id)`. Paging
//! backward (`last`) scans in the inverted direction, so a single comparison
//! (`Gt` when scanning ascending, `Lt` when descending) positions the window
//! after the cursor either way. The window is re-reversed before it is
//! returned, so nodes always come back in the requested sort order.
//!
//! One extra row is fetched to learn whether more rows lie beyond the page.
//! The total count and the window are read in the same session.
//!
//! Cursors are URL-safe base64 of the JSON pair `[sort value, _id]`. They
//! round-trip exactly but carry no ordering a caller could exploit.
//!
//! # Example
//!
//! ```
//! use warden_shared::db::pagination::PaginationArgs;
//! use warden_shared::db::query::{Filter, SortDirection};
//! use warden_shared::db::Db;
//! use warden_shared::id::IdGenerator;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let docs = Db::memory().collection::<serde_json::Value>("docs", IdGenerator::new());
//! let args = PaginationArgs::first(3).sort_by("name", SortDirection::Ascending);
//!
//! let page = docs.paginate(&Filter::All, &args).await?;
//! if page.page_info.has_next_page {
//!     let next = args.clone().after(page.page_info.end_cursor.unwrap_or_default());
//!     docs.paginate(&Filter::All, &next).await?;
//! }
//! # Ok(())
//! # }
//! ```

use super::collection::{decode, Collection, Scoped};
use super::document::{self, Document};
use super::query::{Filter, FindOptions, SortDirection};
use super::StoreError;
use crate::error::Error;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

const ID_FIELD: &str = "_id";

/// Window arguments
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PaginationArgs {
    /// Page size when paging forward
    pub first: Option<i64>,
    /// Page size when paging backward
    pub last: Option<i64>,
    pub after: Option<String>,
    pub before: Option<String>,
    /// Defaults to `_id`
    pub sort_field: Option<String>,
    pub sort_direction: SortDirection,
}

impl PaginationArgs {
    pub fn first(count: i64) -> Self {
        Self {
            first: Some(count),
            ..Default::default()
        }
    }

    pub fn last(count: i64) -> Self {
        Self {
            last: Some(count),
            ..Default::default()
        }
    }

    pub fn after(mut self, cursor: impl Into<String>) -> Self {
        self.after = Some(cursor.into());
        self
    }

    pub fn before(mut self, cursor: impl Into<String>) -> Self {
        self.before = Some(cursor.into());
        self
    }

    pub fn sort_by(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.sort_field = Some(field.into());
        self.sort_direction = direction;
        self
    }

    /// Page size and whether the window runs backward
    ///
    /// A zero count is treated as absent.
    pub fn validate(&self) -> Result<(usize, bool), PaginationError> {
        let first = self.first.filter(|n| *n != 0);
        let last = self.last.filter(|n| *n != 0);

        match (first, last) {
            (None, None) => Err(PaginationError::InvalidArguments(
                "You must provide a `first` or `last` value to properly paginate the connection.".to_string(),
            )),
            (Some(_), Some(_)) => Err(PaginationError::InvalidArguments(
                "Passing both `first` and `last` to paginate the connection is not supported.".to_string(),
            )),
            (None, Some(n)) if n < 0 => Err(PaginationError::InvalidArguments(
                "Last should be non negative.".to_string(),
            )),
            (Some(n), None) if n < 0 => Err(PaginationError::InvalidArguments(
                "First should be non negative.".to_string(),
            )),
            (None, Some(n)) => Ok((n as usize, true)),
            (Some(n), None) => Ok((n as usize, false)),
        }
    }
}

/// Page boundaries and neighbours
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub has_next_page: bool,
    pub has_previous_page: bool,
    pub start_cursor: Option<String>,
    pub end_cursor: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge<T> {
    pub cursor: String,
    pub node: T,
}

/// One page of results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection<T> {
    /// Matches for the filter, ignoring the window
    pub total_count: u64,
    pub page_info: PageInfo,
    pub nodes: Vec<T>,
    pub edges: Vec<Edge<T>>,
}

#[derive(Debug, thiserror::Error)]
pub enum PaginationError {
    #[error("{0}")]
    InvalidArguments(String),

    #[error("Invalid cursor provided.")]
    InvalidCursor,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<PaginationError> for Error {
    fn from(err: PaginationError) -> Self {
        match err {
            PaginationError::InvalidArguments(message) => Error::UserInput(message),
            PaginationError::InvalidCursor => Error::user_input("Invalid cursor provided."),
            PaginationError::Store(err) => err.into(),
        }
    }
}

/// Cursor for a document under `sort_field`
pub fn encode_cursor(doc: &Document, sort_field: &str) -> String {
    let value = document::get_path(doc, sort_field).cloned().unwrap_or(Value::Null);
    let id = doc.get(ID_FIELD).cloned().unwrap_or(Value::Null);
    URL_SAFE_NO_PAD.encode(Value::Array(vec![value, id]).to_string())
}

/// Inverse of [`encode_cursor`]: the sort value and the primary key
pub fn decode_cursor(cursor: &str) -> Result<(Value, String), PaginationError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(cursor)
        .map_err(|_| PaginationError::InvalidCursor)?;

    let pair: Value = serde_json::from_slice(&bytes).map_err(|_| PaginationError::InvalidCursor)?;
    match pair {
        Value::Array(mut items) if items.len() == 2 => {
            let id = items.pop().and_then(|id| id.as_str().map(str::to_string));
            let value = items.pop().unwrap_or(Value::Null);
            id.map(|id| (value, id)).ok_or(PaginationError::InvalidCursor)
        }
        _ => Err(PaginationError::InvalidCursor),
    }
}

/// Filter selecting the rows strictly past `cursor` in the scan direction
fn cursor_filter(sort_field: &str, scan: SortDirection, cursor: &str) -> Result<Filter, PaginationError> {
    let (value, id) = decode_cursor(cursor)?;
    let past = |path: &str, value: Value| match scan {
        SortDirection::Ascending => Filter::Gt(path.to_string(), value),
        SortDirection::Descending => Filter::Lt(path.to_string(), value),
    };

    if sort_field == ID_FIELD {
        return Ok(past(ID_FIELD, Value::String(id)));
    }

    Ok(Filter::Or(vec![
        past(sort_field, value.clone()),
        Filter::And(vec![
            Filter::Eq(sort_field.to_string(), value),
            past(ID_FIELD, Value::String(id)),
        ]),
    ]))
}

impl<T> Scoped<'_, T>
where
    T: Serialize + DeserializeOwned + Send + Sync + Clone,
{
    /// Reads one page of `filter` inside this session
    pub async fn paginate(&mut self, filter: &Filter, args: &PaginationArgs) -> Result<Connection<T>, PaginationError> {
        let (limit, backward) = args.validate()?;
        let sort_field = args.sort_field.as_deref().unwrap_or(ID_FIELD).to_string();
        let scan = if backward {
            args.sort_direction.reverse()
        } else {
            args.sort_direction
        };

        let sort = if sort_field == ID_FIELD {
            vec![(ID_FIELD.to_string(), scan)]
        } else {
            vec![(sort_field.clone(), scan), (ID_FIELD.to_string(), scan)]
        };

        let cursor = if backward {
            args.before.as_ref().or(args.after.as_ref())
        } else {
            args.after.as_ref().or(args.before.as_ref())
        };

        let window = match cursor {
            Some(cursor) => filter.clone().and(cursor_filter(&sort_field, scan, cursor)?),
            None => filter.clone(),
        };

        let name = self.collection().name().to_string();
        let session = self.session();
        let total_count = session.count(&name, filter).await?;
        let options = FindOptions {
            sort,
            limit: Some(limit + 1),
        };
        let mut docs = session.find(&name, &window, &options).await?;

        let has_more = docs.len() > limit;
        docs.truncate(limit);
        if backward {
            docs.reverse();
        }

        let page_info = PageInfo {
            has_previous_page: args.after.is_some() || (backward && has_more),
            has_next_page: args.before.is_some() || (!backward && has_more),
            start_cursor: docs.first().map(|doc| encode_cursor(doc, &sort_field)),
            end_cursor: docs.last().map(|doc| encode_cursor(doc, &sort_field)),
        };

        let mut edges = Vec::with_capacity(docs.len());
        for doc in docs {
            let cursor = encode_cursor(&doc, &sort_field);
            edges.push(Edge {
                cursor,
                node: decode::<T>(doc)?,
            });
        }
        let nodes = edges.iter().map(|edge| edge.node.clone()).collect();

        Ok(Connection {
            total_count,
            page_info,
            nodes,
            edges,
        })
    }
}

impl<T> Collection<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + Clone,
{
    /// Reads one page of `filter`
    pub async fn paginate(&self, filter: &Filter, args: &PaginationArgs) -> Result<Connection<T>, PaginationError> {
        let mut session = self.db().begin().await?;
        let page = self.in_session(session.as_mut()).paginate(filter, args).await?;
        session.commit().await?;
        Ok(page)
    }
}
