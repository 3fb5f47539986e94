//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **InMemoryDeliveryQueue**: プロセス内 FIFO（永続化なし）

pub mod inmem_delivery;

pub use self::inmem_delivery::InMemoryDeliveryQueue;
