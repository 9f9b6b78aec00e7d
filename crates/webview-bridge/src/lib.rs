//! SoulBrowser webview bridge.
//!
//! Turns a renderer's one-shot "send text, get an acknowledgment" query primitive into an
//! ordered event channel plus correlated request/response calls between host code and
//! script running inside an embedded webview. One [`BridgeEndpoint`] exists per attached
//! renderer; a [`BridgeRuntime`] owns them and fans renderer lifecycle callbacks out.
//!
//! Outbound envelopes buffer in a bounded queue until the content-side bootstrap script
//! reports `ready`, then flush in call order. Navigation drops readiness and fails every
//! pending request with [`BridgeError::PageChanged`].

pub mod bootstrap;
pub mod codec;
pub mod config;
pub mod diagnostics;
pub mod endpoint;
pub mod error;
pub mod executor;
pub mod json;
pub mod lifecycle;
pub mod metrics;
pub mod options;
pub mod pending;
pub mod protocol;
pub mod queue;
pub mod registry;
pub mod renderer;
pub mod router;
pub mod runtime;
pub mod subscription;

pub use config::BridgeConfigFile;
pub use diagnostics::{
    BridgeDiagnostics, BroadcastDiagnostics, DiagnosticEvent, NoopDiagnostics, TracingDiagnostics,
};
pub use endpoint::BridgeEndpoint;
pub use error::{BridgeError, BridgeResult};
pub use executor::{HostExecutor, HostLoop, InlineExecutor};
pub use metrics::BridgeMetricsSnapshot;
pub use options::{BridgeOptions, BridgeOptionsBuilder};
pub use pending::{JsonResponse, PendingResponse};
pub use queue::OverflowPolicy;
pub use renderer::{ChannelCallback, QueryCallback, QueryReply, RendererHost};
pub use runtime::{BridgeRuntime, WatchdogHandle};
pub use subscription::Subscription;
