// logflume-search - Read path: search service and look-aside cache
//
// The service issues one search-store query for the page plus full-set
// aggregations, degrading to the authoritative store (page-scoped
// aggregations) when the search backend is unhealthy. The cache sits in
// front and never fails a request on its own account.

mod cache;
mod service;

pub use cache::{CachedSearch, MemoryResultCache};
pub use service::{SearchError, SearchService};
