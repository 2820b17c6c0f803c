//! shuttle-core
//!
//! Core building blocks for swarm task coordination: workers share one
//! remote store, pick tasks from a descriptor directory, arbitrate through
//! store-side claims, and report progress on an append-only event stream.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, status, descriptor, codec, events, errors）
//! - **ports**: 抽象化レイヤー（RemoteStore, EventStream, TaskExecutor, Clock, AgentIdGenerator）
//! - **app**: アプリケーションロジック（picker, claim, lifecycle, worker_loop, など）
//! - **impls**: 実装（HttpStore, InMemoryStore, Retrying）
//! - **config**: ワーカー設定（YAML + 既定値）

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;
