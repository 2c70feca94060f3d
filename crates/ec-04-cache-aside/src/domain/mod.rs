pub mod cursor;
pub mod keys;
pub mod ttl;

pub use cursor::{
    Comparison, Cursor, CursorError, KeysetPage, KeysetQuery, PageDirection, SortDirection,
    DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT,
};
pub use keys::{
    entity_key, namespace_prefix, normalize_params, query_key, PRODUCT_NAMESPACE,
    PRODUCT_SEARCH_NAMESPACE,
};
pub use ttl::{hours, minutes, seconds, DEFAULT_ENTITY_TTL, DEFAULT_SEARCH_TTL};
