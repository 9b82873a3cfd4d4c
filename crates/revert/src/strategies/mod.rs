mod goods;
mod order;
mod user;

pub use goods::{GoodsRevertStrategy, GOODS_REVERT_LIMIT_DAYS};
pub use order::{OrderRevertStrategy, ORDER_REVERT_LIMIT_DAYS};
pub use user::{UserRevertStrategy, USER_REVERT_LIMIT_DAYS};

/// Elapsed milliseconds since `started`.
pub(crate) fn elapsed_ms(started: std::time::Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
