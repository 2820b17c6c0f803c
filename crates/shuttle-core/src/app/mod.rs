//! App - アプリケーション層
//!
//! ports を組み合わせて協調プロトコルを実装します。
//!
//! # 主要コンポーネント
//! - **WorkerBuilder**: ワーカーの構築とワイヤリング
//! - **WorkerLoop**: タスク実行ループ（pick→claim→execute→complete）
//! - **TaskLifecycle**: claim → commit → release の状態遷移
//! - **ClaimArbiter** / **TaskPicker** / **DependencyResolver**
//! - **EventBus** / **EventCursor** / **ProgressReporter**: イベントの発行と読み出し
//! - **RetryPolicy** / **StreamDebouncer**
//! - **StatusReport**: タスク集合の集計と診断

pub mod builder;
pub mod claim;
pub mod debounce;
pub mod dependency;
pub mod event_bus;
pub mod lifecycle;
pub mod picker;
pub mod progress;
pub mod retry;
pub mod status;
pub mod worker_loop;

// 主要な型を再エクスポート
pub use self::builder::{BuildError, WorkerBuilder};
pub use self::claim::ClaimArbiter;
pub use self::debounce::StreamDebouncer;
pub use self::dependency::{DependencyGraph, DependencyResolver, WaitOutcome};
pub use self::event_bus::{EventBus, EventCursor};
pub use self::lifecycle::{ClaimedTask, TaskLifecycle};
pub use self::picker::{TaskPicker, TaskSnapshot};
pub use self::progress::ProgressReporter;
pub use self::retry::{RetryPolicy, Retryable};
pub use self::status::{ActiveTask, BlockedTask, StatusReport, TaskCounts};
pub use self::worker_loop::{ExitReason, WorkerLoop, WorkerReport, WorkerSettings};
