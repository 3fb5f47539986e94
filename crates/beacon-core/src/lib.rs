//! beacon-core
//!
//! Core building blocks for the emergency notification queue.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, task, state, record, stats）
//! - **ports**: 抽象化レイヤー（Clock, IdGenerator, DeliveryQueue, TaskProcessor）
//! - **impls**: 実装（InMemoryDeliveryQueue）
//! - **queue**: TaskQueue 本体（registry + worker pool）
//! - **resilience**: retry / circuit breaker / live config / processor layers
//! - **metrics**: notifier ごとの実行時間と成功率
//! - **runtime**: task_type -> processor の registry と Router
//! - **dispatch**: emergency notification の配信（channel, template, preferences）
//! - **settings**: QueueSettings（環境変数から読む）

pub mod dispatch;
pub mod domain;
pub mod error;
pub mod impls;
pub mod metrics;
pub mod ports;
pub mod queue;
pub mod resilience;
pub mod runtime;
pub mod settings;

mod worker;

pub use crate::domain::{QueueStats, TaskId, TaskRecord, TaskSnapshot, TaskStatus, TaskType};
pub use crate::error::BeaconError;
pub use crate::metrics::PerformanceMetrics;
pub use crate::ports::{FnProcessor, TaskProcessor};
pub use crate::queue::{TaskQueue, TaskQueueBuilder};
pub use crate::runtime::{HandlerRegistry, Router};
pub use crate::settings::QueueSettings;
