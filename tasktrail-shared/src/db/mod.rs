/// Database layer
///
/// - `pool`: connection pool setup and health checks
/// - `migrations`: embedded schema migrations
///
/// Row types and their queries live in `crate::models`; the trait seam the
/// services depend on is `crate::repository`.

pub mod migrations;
pub mod pool;
