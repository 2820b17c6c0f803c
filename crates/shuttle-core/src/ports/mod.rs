//! Ports - 抽象化レイヤー
//!
//! Hexagonal Architecture の「ポート」を定義します。
//! 各 trait は外部システム（remote store, event stream, executor）への
//! インターフェースで、実装の詳細は `impls` 側に隠蔽します。
//!
//! # 設計原則
//! - remote store が唯一の共有可変状態（source of truth）
//! - core はロック状態を持たない。claim の調停は store の責務
//! - 時刻と ID 生成は差し替え可能（テスト容易性）

pub mod clock;
pub mod event_stream;
pub mod executor;
pub mod id_generator;
pub mod remote_store;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::event_stream::EventStream;
pub use self::executor::{ExecutorOutput, ProgressSink, TaskExecutor};
pub use self::id_generator::{AgentIdGenerator, UlidAgentIds};
pub use self::remote_store::{
    ClaimOutcome, CommitId, CommitRequest, EntryKind, RemoteStore, TreeEntry,
};
