//! Ports - 抽象化レイヤー
//!
//! 各 trait はキュー本体と外部（時刻・ID・FIFO・実処理）の境界です。
//! テストでは FixedClock などに差し替えます。

pub mod clock;
pub mod delivery_queue;
pub mod id_generator;
pub mod processor;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::delivery_queue::DeliveryQueue;
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::processor::{FnProcessor, TaskProcessor};
