pub mod config;
pub mod dispatch;
pub mod envelope;
pub mod error;
pub mod intent;
pub mod logging;
pub mod providers;
pub mod relay;
pub mod route;
pub mod server;
pub mod telemetry;
pub mod translate;

pub use config::{ConfigSource, RouterConfig};
pub use dispatch::{DispatchResponse, Dispatcher};
pub use error::{ProxyError, Result};
pub use logging::SharedLogger;
pub use route::CustomRouter;
pub use server::{build_router, AppState};
pub use telemetry::{PriceTable, Telemetry, TelemetryRecord, TelemetrySink};
