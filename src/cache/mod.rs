//! # Cache Module
//!
//! Key-value cache with per-key expiry, used read-through in front of the
//! record stores.
//!
//! ## Architecture
//!
//! ```text
//!  CacheLayer (read-through, JSON values, errors degrade to a miss)
//!       │
//!       ▼
//!  CacheProvider (enum dispatch)
//!     ├── RedisCacheService     GET / SETEX / DEL / SCAN+DEL
//!     ├── InMemoryCacheService  tokio-clock expiry
//!     └── NoOpCacheService      always miss
//! ```

pub mod errors;
pub mod keys;
pub mod layer;
pub mod provider;
pub mod providers;
pub mod traits;

pub use errors::{CacheError, CacheResult};
pub use keys::{detail_key, list_key, list_prefix};
pub use layer::CacheLayer;
pub use provider::CacheProvider;
pub use providers::{InMemoryCacheService, NoOpCacheService, RedisCacheService};
pub use traits::CacheService;
